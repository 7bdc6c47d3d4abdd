//! Model container: the problem, its analysis steps and the run lifecycle.

use std::collections::HashSet;
use std::io::{Read, Write};

use tracing::{info, warn};

use crate::callback::{CallbackEvent, CallbackInfo, CallbackStatus, Hooks, InterruptHandle};
use crate::dof::DofRegistry;
use crate::dump::{read_problem, read_state, write_problem, write_state, DumpMode, DumpReader, DumpWriter};
use crate::error::{Error, Result};
use crate::problem::{ComponentRef, Problem, Reaction, ACTIVATION_ORDER};
use crate::registry::Registry;
use crate::step::{AnalysisStep, StepOutcome, StepProgress, StepStatus};

/// Final status of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    Completed,
    StepFailed { step: usize, reason: String },
    Interrupted { step: usize },
}

impl SolveStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, SolveStatus::Completed)
    }
}

/// A model and its analysis steps.
#[derive(Debug)]
pub struct Model {
    pub problem: Problem,
    steps: Vec<AnalysisStep>,
    current: usize,
    hooks: Hooks,
    registry: Registry,
    initialized: bool,
    activated: bool,
    /// Full dump taken at `init`, used by `reset`.
    initial: Option<Vec<u8>>,
}

impl Model {
    pub fn new(problem: Problem) -> Self {
        Self::with_registry(problem, Registry::default())
    }

    pub fn with_registry(problem: Problem, registry: Registry) -> Self {
        Self {
            problem,
            steps: Vec::new(),
            current: 0,
            hooks: Hooks::new(),
            registry,
            initialized: false,
            activated: false,
            initial: None,
        }
    }

    pub fn add_step(&mut self, step: AnalysisStep) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    pub fn steps(&self) -> &[AnalysisStep] {
        &self.steps
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut AnalysisStep> {
        self.steps.get_mut(index)
    }

    /// Index of the first step not yet completed.
    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn current_time(&self) -> f64 {
        self.problem.time().current_time
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register_callback<F>(&mut self, events: &[CallbackEvent], f: F)
    where
        F: FnMut(&CallbackInfo) -> CallbackStatus + Send + 'static,
    {
        self.hooks.register(events, f);
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.hooks.interrupt_handle()
    }

    pub fn reaction_forces(&self) -> Result<Vec<Reaction>> {
        self.problem.reaction_forces()
    }

    fn fire(&mut self, event: CallbackEvent, step: usize) -> CallbackStatus {
        let info = CallbackInfo {
            event,
            step,
            time: self.problem.time().current_time,
            iteration: 0,
        };
        self.hooks.fire(info)
    }

    /// Validate the problem and every step.
    pub fn init(&mut self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Init("model has no analysis steps".into()));
        }
        self.problem.init()?;
        for step in &self.steps {
            step.init(&self.problem)?;
        }
        if self.initial.is_none() && !self.activated {
            self.initial = Some(self.to_bytes(DumpMode::Full)?);
        }
        if self.fire(CallbackEvent::Init, self.current) == CallbackStatus::ExitRequest {
            return Err(Error::Init("exit requested during init".into()));
        }
        self.initialized = true;
        info!(
            nodes = self.problem.mesh.n_nodes(),
            domains = self.problem.domains.len(),
            steps = self.steps.len(),
            "model initialized"
        );
        Ok(())
    }

    /// Activate every component not owned by a step.
    pub fn activate(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::Init("model activated before init".into()));
        }
        let owned: HashSet<ComponentRef> = self
            .steps
            .iter()
            .flat_map(|s| s.components.iter().copied())
            .collect();
        if let Some(first) = self.steps.first() {
            self.problem.scheme = first.newton.scheme;
        }
        self.problem
            .activate_in_order(&ACTIVATION_ORDER, &|c| !owned.contains(&c))?;
        self.activated = true;
        Ok(())
    }

    /// Run every remaining step.
    pub fn solve(&mut self) -> Result<SolveStatus> {
        if !self.initialized {
            self.init()?;
        }
        if !self.activated {
            self.activate()?;
        }
        while self.current < self.steps.len() {
            let index = self.current;
            match self.solve_next_step()? {
                StepOutcome::Completed => {}
                StepOutcome::Failed(reason) => {
                    warn!(step = index, %reason, "analysis failed");
                    self.fire(CallbackEvent::Solved, index);
                    return Ok(SolveStatus::StepFailed { step: index, reason });
                }
                StepOutcome::Interrupted => return Ok(SolveStatus::Interrupted { step: index }),
            }
        }
        info!(time = self.current_time(), "analysis completed");
        self.fire(CallbackEvent::Solved, self.current);
        Ok(SolveStatus::Completed)
    }

    /// Activate and solve the current step. On completion the step is
    /// deactivated and the model moves to the next one.
    pub fn solve_next_step(&mut self) -> Result<StepOutcome> {
        let index = self.current;
        let start = self.problem.time().current_time;
        let step = self
            .steps
            .get_mut(index)
            .ok_or_else(|| Error::Init(format!("step {} does not exist", index)))?;
        step.activate(&mut self.problem, start)?;
        if self.fire(CallbackEvent::StepActive, index) == CallbackStatus::ExitRequest {
            return Ok(StepOutcome::Interrupted);
        }
        let step = &mut self.steps[index];
        let outcome = step.solve(&mut self.problem, &mut self.hooks, index)?;
        if outcome == StepOutcome::Completed {
            step.deactivate(&mut self.problem);
            self.current += 1;
            if self.fire(CallbackEvent::StepSolved, index) == CallbackStatus::ExitRequest {
                return Ok(StepOutcome::Interrupted);
            }
        }
        Ok(outcome)
    }

    /// Return to the state captured by `init`.
    pub fn reset(&mut self) -> Result<()> {
        let bytes = self
            .initial
            .clone()
            .ok_or_else(|| Error::Init("model reset before init".into()))?;
        let mut r = DumpReader::new(&bytes[..])?;
        let (problem, steps, _) = read_model(&mut r, &self.registry)?;
        self.problem = problem;
        self.steps = steps;
        self.current = 0;
        self.activated = false;
        self.initialized = false;
        Ok(())
    }

    /// Drop every component and step.
    pub fn clear(&mut self) {
        self.problem = Problem::new(DofRegistry::default());
        self.steps.clear();
        self.current = 0;
        self.initialized = false;
        self.activated = false;
        self.initial = None;
    }

    pub fn save<W: Write>(&self, writer: W, mode: DumpMode) -> Result<()> {
        let mut w = DumpWriter::new(writer, mode)?;
        match mode {
            DumpMode::Full => {
                write_problem(&mut w, &self.problem)?;
                w.section("steps")?;
                w.write(&self.steps)?;
            }
            DumpMode::Shallow => {
                write_state(&mut w, &self.problem)?;
                w.section("steps")?;
                let progress: Vec<(StepStatus, Option<StepProgress>)> = self
                    .steps
                    .iter()
                    .map(|s| (s.status(), s.progress().copied()))
                    .collect();
                w.write(&progress)?;
            }
        }
        w.section("control")?;
        w.write(&(self.current, self.activated))
    }

    pub fn to_bytes(&self, mode: DumpMode) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.save(&mut bytes, mode)?;
        Ok(bytes)
    }

    /// Rebuild a model from a full dump.
    pub fn load<R: Read>(reader: R, registry: Registry) -> Result<Self> {
        let mut r = DumpReader::new(reader)?;
        if r.mode() != DumpMode::Full {
            return Err(Error::Serialization("shallow dump cannot create a model".into()));
        }
        let (problem, steps, (current, activated)) = read_model(&mut r, &registry)?;
        let mut model = Self::with_registry(problem, registry);
        model.steps = steps;
        model.current = current;
        model.activated = activated;
        if activated && model.current < model.steps.len() {
            model.problem.renumber()?;
        }
        info!(step = current, time = model.current_time(), "model restored");
        Ok(model)
    }

    /// Restore iteration state into a model with the same topology.
    pub fn restore_shallow<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut r = DumpReader::new(reader)?;
        if r.mode() != DumpMode::Shallow {
            return Err(Error::Serialization("expected a shallow dump".into()));
        }
        read_state(&mut r, &mut self.problem)?;
        r.expect_section("steps")?;
        let progress: Vec<(StepStatus, Option<StepProgress>)> = r.read()?;
        if progress.len() != self.steps.len() {
            return Err(Error::Serialization(format!(
                "{} steps in stream, model has {}",
                progress.len(),
                self.steps.len()
            )));
        }
        for (step, (status, p)) in self.steps.iter_mut().zip(progress) {
            step.restore_progress(status, p);
        }
        r.expect_section("control")?;
        let (current, activated): (usize, bool) = r.read()?;
        self.current = current;
        self.activated = activated;
        Ok(())
    }
}

type ModelParts = (Problem, Vec<AnalysisStep>, (usize, bool));

fn read_model<R: Read>(r: &mut DumpReader<R>, registry: &Registry) -> Result<ModelParts> {
    let problem = read_problem(r, registry)?;
    r.expect_section("steps")?;
    let steps: Vec<AnalysisStep> = r.read()?;
    r.expect_section("control")?;
    let control = r.read()?;
    Ok((problem, steps, control))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::FixedBc;
    use crate::domain::{ElasticSolidDomain, Kinematics};
    use crate::load::{LoadScale, NodalLoad};
    use crate::material::LinearElastic;
    use crate::mesh::{ElementConnectivity, ElementType};
    use crate::problem::AnalysisKind;
    use crate::types::Point3;
    use std::sync::{Arc, Mutex};

    fn loaded_tet() -> Model {
        let mut p = Problem::new(DofRegistry::solid());
        p.mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        p.materials.push(Box::new(LinearElastic::new(100.0, 0.25).unwrap()));
        let mut d = ElasticSolidDomain::new("solid", 0, Kinematics::SmallStrain);
        d.add_element(ElementConnectivity::new(ElementType::Tet4, vec![0, 1, 2, 3]).unwrap());
        p.domains.push(Box::new(d));
        p.fixed_bcs.push(FixedBc::new(vec![0, 1, 2], vec![0, 1, 2]));
        p.nodal_loads.push(NodalLoad::new(vec![3], 2, LoadScale::constant(1.0)));
        let mut model = Model::new(p);
        model.add_step(AnalysisStep::new("load", AnalysisKind::Static, 1, 1.0));
        model
    }

    #[test]
    fn test_init_requires_steps() {
        let mut model = loaded_tet();
        model.steps.clear();
        assert!(matches!(model.init(), Err(Error::Init(_))));
    }

    #[test]
    fn test_events_fire_in_order() {
        let mut model = loaded_tet();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        model.register_callback(
            &[
                CallbackEvent::Init,
                CallbackEvent::StepActive,
                CallbackEvent::MajorIters,
                CallbackEvent::StepSolved,
                CallbackEvent::Solved,
            ],
            move |info| {
                s.lock().unwrap().push(info.event);
                CallbackStatus::Continue
            },
        );
        assert_eq!(model.solve().unwrap(), SolveStatus::Completed);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CallbackEvent::Init,
                CallbackEvent::StepActive,
                CallbackEvent::MajorIters,
                CallbackEvent::StepSolved,
                CallbackEvent::Solved,
            ]
        );
        assert_eq!(model.current_step(), 1);
    }

    #[test]
    fn test_exit_request_aborts_init() {
        let mut model = loaded_tet();
        model.register_callback(&[CallbackEvent::Init], |_| CallbackStatus::ExitRequest);
        assert!(matches!(model.init(), Err(Error::Init(_))));
        assert!(matches!(model.activate(), Err(Error::Init(_))));
        assert!(model.solve().is_err());
        assert_eq!(model.current_step(), 0);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut model = loaded_tet();
        model.solve().unwrap();
        assert!(model.problem.mesh.nodes[3].dofs[2].value > 0.0);
        model.reset().unwrap();
        assert_eq!(model.problem.mesh.nodes[3].dofs[2].value, 0.0);
        assert_eq!(model.current_step(), 0);
        assert!(model.solve().unwrap().is_completed());
    }

    #[test]
    fn test_clear() {
        let mut model = loaded_tet();
        model.clear();
        assert!(model.steps().is_empty());
        assert!(model.problem.domains.is_empty());
    }

    #[test]
    fn test_shallow_dump_cannot_load() {
        let mut model = loaded_tet();
        model.init().unwrap();
        let bytes = model.to_bytes(DumpMode::Shallow).unwrap();
        assert!(matches!(
            Model::load(&bytes[..], Registry::default()),
            Err(Error::Serialization(_))
        ));
    }
}
