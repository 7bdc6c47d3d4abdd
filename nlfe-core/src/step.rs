//! Analysis steps and time stepping.
//!
//! A step owns its solver settings and the components that live only for
//! its duration. Solving a step marches time points from the step start to
//! its end time; each time point is predicted, driven to convergence by the
//! Newton core and committed, or rolled back on failure. With automatic
//! time stepping a failed point is retried with half the step size.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::callback::{CallbackEvent, CallbackInfo, CallbackStatus, Hooks};
use crate::config::{IntegrationConfig, NewtonConfig, TimeStepperConfig};
use crate::error::{Error, Result};
use crate::newton::{NewtonOutcome, NewtonSolver, SolverStats};
use crate::problem::{AnalysisKind, ComponentRef, Problem, ACTIVATION_ORDER};
use crate::solver::LinearSolverKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    Interrupted,
}

/// Time marching state, kept across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub start_time: f64,
    /// Last converged time.
    pub time: f64,
    /// Step size of the next time point.
    pub dt: f64,
    pub time_points: usize,
    /// Cutbacks of the current time point.
    pub retries: usize,
}

/// One analysis step.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisStep {
    pub name: String,
    pub kind: AnalysisKind,
    pub n_steps: usize,
    pub dt: f64,
    pub newton: NewtonConfig,
    pub auto_stepper: Option<TimeStepperConfig>,
    pub integration: IntegrationConfig,
    /// Components active only during this step.
    pub components: Vec<ComponentRef>,
    status: StepStatus,
    progress: Option<StepProgress>,
    #[serde(skip)]
    solver: Option<NewtonSolver>,
}

impl AnalysisStep {
    pub fn new(name: &str, kind: AnalysisKind, n_steps: usize, dt: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            n_steps,
            dt,
            newton: NewtonConfig::default(),
            auto_stepper: None,
            integration: IntegrationConfig::default(),
            components: Vec::new(),
            status: StepStatus::Pending,
            progress: None,
            solver: None,
        }
    }

    pub fn with_newton(mut self, config: NewtonConfig) -> Self {
        self.newton = config;
        self
    }

    pub fn with_auto_stepper(mut self, config: TimeStepperConfig) -> Self {
        self.auto_stepper = Some(config);
        self
    }

    pub fn with_integration(mut self, integration: IntegrationConfig) -> Self {
        self.integration = integration;
        self
    }

    pub fn with_component(mut self, component: ComponentRef) -> Self {
        self.components.push(component);
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn progress(&self) -> Option<&StepProgress> {
        self.progress.as_ref()
    }

    /// Counters accumulated by the solver of this step.
    pub fn stats(&self) -> Option<SolverStats> {
        self.solver.as_ref().map(|s| *s.total_stats())
    }

    /// Use a specific linear solver instead of the configured kind.
    pub fn set_solver(&mut self, solver: NewtonSolver) {
        self.solver = Some(solver);
    }

    pub fn duration(&self) -> f64 {
        self.n_steps as f64 * self.dt
    }

    pub fn init(&self, problem: &Problem) -> Result<()> {
        if self.n_steps == 0 || !(self.dt > 0.0) {
            return Err(Error::Init(format!(
                "step \"{}\": needs a positive step count and size, got {} x {}",
                self.name, self.n_steps, self.dt
            )));
        }
        self.newton.validate()?;
        if let Some(auto) = &self.auto_stepper {
            auto.validate()?;
        }
        if self.kind == AnalysisKind::Dynamic {
            self.integration.parameters()?;
        }
        self.solver_config(problem)?;
        problem.validate_refs(&self.components)
    }

    /// Newton settings for `problem`. A nonsymmetric stiffness is stored
    /// in full, so it cannot go to a Cholesky factorization.
    fn solver_config(&self, problem: &Problem) -> Result<NewtonConfig> {
        let mut config = self.newton.clone();
        if config.symmetric && problem.is_nonsymmetric() {
            if config.linear_solver == LinearSolverKind::Cholesky {
                return Err(Error::Init(format!(
                    "step \"{}\": Cholesky cannot factor the nonsymmetric stiffness",
                    self.name
                )));
            }
            config.symmetric = false;
        }
        Ok(config)
    }

    /// Activate the step components starting at `start_time`. A step
    /// restored mid-run keeps its progress and only renumbers.
    pub fn activate(&mut self, problem: &mut Problem, start_time: f64) -> Result<()> {
        let (beta, gamma) = match self.kind {
            AnalysisKind::Dynamic => self.integration.parameters()?,
            _ => (0.25, 0.5),
        };
        problem.scheme = self.newton.scheme;
        problem.set_integration(self.kind, beta, gamma);
        if self.status == StepStatus::Active && self.progress.is_some() {
            problem.renumber()?;
        } else {
            let own = &self.components;
            problem.activate_in_order(&ACTIVATION_ORDER, &|c| own.contains(&c))?;
            self.progress = Some(StepProgress {
                start_time,
                time: start_time,
                dt: self.dt,
                time_points: 0,
                retries: 0,
            });
            self.status = StepStatus::Active;
        }
        if self.solver.is_none() {
            let config = self.solver_config(problem)?;
            if config.symmetric != self.newton.symmetric {
                info!(step = %self.name, "nonsymmetric stiffness, using full storage");
            }
            self.solver = Some(NewtonSolver::new(config));
        }
        info!(step = %self.name, kind = ?self.kind, neq = problem.equations().neq, "step activated");
        Ok(())
    }

    pub(crate) fn restore_progress(&mut self, status: StepStatus, progress: Option<StepProgress>) {
        self.status = status;
        self.progress = progress;
    }

    pub fn deactivate(&mut self, problem: &mut Problem) {
        problem.deactivate(&self.components);
    }

    /// Forget progress so the step runs from its start again.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.progress = None;
        self.solver = None;
    }

    /// March the step to its end time.
    pub fn solve(&mut self, problem: &mut Problem, hooks: &mut Hooks, index: usize) -> Result<StepOutcome> {
        let mut progress = self
            .progress
            .ok_or_else(|| Error::Init(format!("step \"{}\" solved before activation", self.name)))?;
        let mut solver = match self.solver.take() {
            Some(solver) => solver,
            None => NewtonSolver::new(self.solver_config(problem)?),
        };
        let result = self.march(problem, hooks, index, &mut progress, &mut solver);
        self.progress = Some(progress);
        self.solver = Some(solver);
        let outcome = result?;
        self.status = match outcome {
            StepOutcome::Completed => StepStatus::Completed,
            StepOutcome::Failed(_) => StepStatus::Failed,
            StepOutcome::Interrupted => StepStatus::Active,
        };
        Ok(outcome)
    }

    fn march(
        &self,
        problem: &mut Problem,
        hooks: &mut Hooks,
        index: usize,
        progress: &mut StepProgress,
        solver: &mut NewtonSolver,
    ) -> Result<StepOutcome> {
        let end = progress.start_time + self.duration();
        let eps = 1e-12 * end.abs().max(1.0);
        while progress.time < end - eps {
            let dt = progress.dt.min(end - progress.time);
            let t = progress.time + dt;
            problem.set_time(t, dt);
            let outcome = match problem.prep_step() {
                Ok(()) => solver.solve(problem, hooks, index)?,
                Err(e) if e.is_numerical() => NewtonOutcome::Failed(e.to_string()),
                Err(e) => return Err(e),
            };
            match outcome {
                NewtonOutcome::Converged { iterations } => {
                    problem.commit();
                    solver.mark_committed();
                    progress.time = t;
                    progress.time_points += 1;
                    progress.retries = 0;
                    if let Some(auto) = &self.auto_stepper {
                        let factor = (auto.optimal_iterations as f64 / iterations.max(1) as f64).sqrt();
                        progress.dt = (progress.dt * factor).min(auto.dtmax);
                    }
                    info!(step = %self.name, time = t, iterations, next_dt = progress.dt, "time point converged");
                    let info = CallbackInfo {
                        event: CallbackEvent::MajorIters,
                        step: index,
                        time: t,
                        iteration: iterations,
                    };
                    if hooks.fire(info) == CallbackStatus::ExitRequest {
                        return Ok(StepOutcome::Interrupted);
                    }
                }
                NewtonOutcome::Interrupted => {
                    problem.rollback()?;
                    problem.set_time(progress.time, progress.dt);
                    warn!(step = %self.name, time = t, "interrupted");
                    return Ok(StepOutcome::Interrupted);
                }
                NewtonOutcome::Failed(reason) => {
                    problem.rollback()?;
                    problem.set_time(progress.time, progress.dt);
                    if let Some(auto) = &self.auto_stepper {
                        let next = 0.5 * progress.dt;
                        if progress.retries < auto.max_retries && next >= auto.dtmin {
                            progress.retries += 1;
                            progress.dt = next;
                            warn!(step = %self.name, time = t, %reason, dt = next, retry = progress.retries, "cutting back");
                            continue;
                        }
                    }
                    warn!(step = %self.name, time = t, %reason, "time point failed");
                    return Ok(StepOutcome::Failed(reason));
                }
            }
        }
        Ok(StepOutcome::Completed)
    }
}
