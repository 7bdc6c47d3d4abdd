//! Newton-Raphson core with BFGS quasi-Newton updates.
//!
//! One call to [`NewtonSolver::solve`] drives a single time point to
//! convergence:
//!
//! 1. build the profile, prescribed increments and the starting residual,
//! 2. reform (assemble and factor K) when required,
//! 3. iterate: solve, line search, update, check the residual,
//!    displacement and energy norms,
//! 4. on convergence run augmentation passes until the constraints are
//!    satisfied.
//!
//! Failure to converge is an [`NewtonOutcome`], not an error; the step
//! controller decides whether to cut back. Numerical errors raised inside
//! an iteration (inverted elements, singular pivots, NaN) are converted to
//! failed outcomes as well.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assembly::{GlobalMatrix, GlobalVector};
use crate::callback::{CallbackEvent, CallbackInfo, CallbackStatus, Hooks};
use crate::config::{NewtonConfig, QuasiNewtonMethod};
use crate::error::{Error, Result};
use crate::problem::Problem;
use crate::solver::{select_solver, LinearSolver};
use crate::sparse::dot;

/// Result of driving one time point.
#[derive(Debug, Clone, PartialEq)]
pub enum NewtonOutcome {
    Converged { iterations: usize },
    Failed(String),
    /// An exit request arrived; the trial state must be discarded.
    Interrupted,
}

impl NewtonOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, NewtonOutcome::Converged { .. })
    }
}

/// Observable solver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverState {
    #[default]
    Idle,
    Reforming,
    Iterating,
    Augmenting,
    Converged,
    Diverged,
    Committed,
}

/// Counters for one time point (or accumulated over a run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolverStats {
    pub iterations: usize,
    pub reformations: usize,
    pub rhs_evaluations: usize,
    pub augmentations: usize,
}

impl SolverStats {
    fn accumulate(&mut self, other: &SolverStats) {
        self.iterations += other.iterations;
        self.reformations += other.reformations;
        self.rhs_evaluations += other.rhs_evaluations;
        self.augmentations += other.augmentations;
    }
}

/// Squared norms of one iteration against the baseline of the first one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConvergenceNorms {
    /// R·R at the first iteration.
    pub residual_initial: f64,
    /// |u·R| at the first iteration.
    pub energy_initial: f64,
    /// R·R after the update.
    pub residual: f64,
    /// Squared length of the applied increment.
    pub increment: f64,
    /// Squared length of the accumulated increment.
    pub total: f64,
    /// |s u·R| after the update.
    pub energy: f64,
}

impl ConvergenceNorms {
    /// All enabled criteria must pass. A residual below the `rmin` floor
    /// is converged regardless of the ratios.
    pub fn converged(&self, config: &NewtonConfig) -> bool {
        if config.rmin > 0.0 && self.residual < config.rmin {
            return true;
        }
        let mut ok = true;
        if config.rtol > 0.0 && self.residual > config.rtol * self.residual_initial {
            ok = false;
        }
        if config.dtol > 0.0 && self.increment > config.dtol * config.dtol * self.total {
            ok = false;
        }
        if config.etol > 0.0 && self.energy > config.etol * self.energy_initial {
            ok = false;
        }
        ok
    }
}

/// Work of an increment against the residual; negative work means the
/// direction is not a descent direction.
pub fn is_negative_work(increment: &[f64], residual: &[f64]) -> bool {
    dot(increment, residual) < 0.0
}

/// Rank-two BFGS updates on top of the last factorization.
#[derive(Debug, Clone, Default)]
pub struct Bfgs {
    v: Vec<Vec<f64>>,
    w: Vec<Vec<f64>>,
    max_updates: usize,
    cmax: f64,
}

impl Bfgs {
    pub fn new(max_updates: usize, cmax: f64) -> Self {
        Self {
            v: Vec::new(),
            w: Vec::new(),
            max_updates,
            cmax,
        }
    }

    pub fn reset(&mut self) {
        self.v.clear();
        self.w.clear();
    }

    pub fn n_updates(&self) -> usize {
        self.v.len()
    }

    pub fn is_full(&self) -> bool {
        self.v.len() >= self.max_updates
    }

    /// Store an update from the step `s·u` taking the residual from `r0` to
    /// `r1`. Returns false when the update would be ill-conditioned.
    pub fn update(&mut self, s: f64, u: &[f64], r0: &[f64], r1: &[f64]) -> bool {
        let d: Vec<f64> = u.iter().map(|x| s * x).collect();
        let g: Vec<f64> = r0.iter().zip(r1).map(|(a, b)| a - b).collect();
        let h: Vec<f64> = r0.iter().map(|x| s * x).collect();
        let dg = dot(&d, &g);
        let dh = dot(&d, &h);
        let r = dg / dh;
        if !(r > 0.0) {
            return false;
        }
        let c = r.sqrt();
        if c > self.cmax {
            return false;
        }
        self.v.push(h.iter().zip(&g).map(|(h, g)| -c * h - g).collect());
        self.w.push(d.iter().map(|x| x / dg).collect());
        true
    }

    /// Solve with the factorization and the stored updates.
    pub fn solve(&self, solver: &dyn LinearSolver, rhs: &[f64]) -> Result<Vec<f64>> {
        let mut tmp = rhs.to_vec();
        for (v, w) in self.v.iter().zip(&self.w).rev() {
            let wi = dot(w, &tmp);
            tmp.iter_mut().zip(v).for_each(|(t, v)| *t += wi * v);
        }
        let mut x = solver.back_solve(&tmp)?;
        for (v, w) in self.v.iter().zip(&self.w) {
            let vr = dot(v, &x);
            x.iter_mut().zip(w).for_each(|(x, w)| *x += vr * w);
        }
        Ok(x)
    }
}

/// Newton-Raphson driver.
pub struct NewtonSolver {
    config: NewtonConfig,
    matrix: GlobalMatrix,
    solver: Box<dyn LinearSolver>,
    bfgs: Bfgs,
    stats: SolverStats,
    total: SolverStats,
    state: SolverState,
    preprocessed: Option<u64>,
    factored: Option<u64>,
}

impl fmt::Debug for NewtonSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewtonSolver")
            .field("config", &self.config)
            .field("solver", &self.solver.name())
            .field("stats", &self.stats)
            .field("state", &self.state)
            .finish()
    }
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        let solver = select_solver(config.linear_solver, config.symmetric);
        Self::with_linear_solver(config, solver)
    }

    pub fn with_linear_solver(config: NewtonConfig, solver: Box<dyn LinearSolver>) -> Self {
        let bfgs = Bfgs::new(config.max_updates, config.cmax);
        Self {
            matrix: GlobalMatrix::new(config.symmetric),
            config,
            solver,
            bfgs,
            stats: SolverStats::default(),
            total: SolverStats::default(),
            state: SolverState::Idle,
            preprocessed: None,
            factored: None,
        }
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    /// Counters of the last time point.
    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Counters accumulated over every time point.
    pub fn total_stats(&self) -> &SolverStats {
        &self.total
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn linear_solver_name(&self) -> &str {
        self.solver.name()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = SolverState::Committed;
    }

    /// Drive the current time point of `problem` to convergence.
    pub fn solve(&mut self, problem: &mut Problem, hooks: &mut Hooks, step: usize) -> Result<NewtonOutcome> {
        if self.solver.requires_symmetric() && !self.config.symmetric {
            return Err(Error::Solver(format!(
                "{} needs symmetric storage",
                self.solver.name()
            )));
        }
        self.stats = SolverStats::default();
        self.bfgs = Bfgs::new(self.config.max_updates, self.config.cmax);
        self.state = SolverState::Idle;

        let outcome = match self.quasin(problem, hooks, step) {
            Ok(outcome) => outcome,
            Err(e) if e.is_numerical() => {
                warn!(error = %e, "iteration failed");
                NewtonOutcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };
        self.state = match outcome {
            NewtonOutcome::Converged { .. } => SolverState::Converged,
            _ => SolverState::Diverged,
        };
        self.total.accumulate(&self.stats);
        Ok(outcome)
    }

    fn residual(&mut self, problem: &Problem) -> Result<Vec<f64>> {
        self.stats.rhs_evaluations += 1;
        let mut r = GlobalVector::new(problem.equations());
        problem.residual(&mut r)?;
        if let Some(i) = r.r.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFinite(format!("residual of equation {}", i)));
        }
        Ok(r.r)
    }

    /// Assemble and factor the stiffness matrix.
    fn reform(&mut self, problem: &Problem) -> Result<()> {
        self.state = SolverState::Reforming;
        if problem.has_dynamic_profile() {
            problem.build_matrix_profile(&mut self.matrix, false)?;
        }
        let version = self.matrix.version();
        self.matrix.zero();
        problem.stiffness(&mut self.matrix)?;
        let k = self
            .matrix
            .matrix()
            .ok_or_else(|| Error::Assembly("stiffness matrix was never allocated".into()))?;
        if self.preprocessed != Some(version) {
            self.solver.set_partitions(&problem.equations().partitions);
            self.solver.pre_process(k)?;
            self.preprocessed = Some(version);
        }
        self.solver.factor(k)?;
        self.factored = Some(version);
        self.bfgs.reset();
        self.stats.reformations += 1;
        debug!(reformations = self.stats.reformations, nnz = k.csr().nnz(), "stiffness reformed");
        Ok(())
    }

    /// Reform unless the limit is exhausted. Returns false on exhaustion.
    fn try_reform(&mut self, problem: &Problem) -> Result<bool> {
        if !self.config.do_reforms {
            self.bfgs.reset();
            return Ok(true);
        }
        if self.stats.reformations > self.config.max_reformations {
            return Ok(false);
        }
        self.reform(problem)?;
        Ok(true)
    }

    /// Apply `total + s·u` and return the new residual.
    fn trial(
        &mut self,
        problem: &mut Problem,
        total: &[f64],
        u: &[f64],
        s: f64,
        apply_prescribed: bool,
    ) -> Result<Vec<f64>> {
        let du: Vec<f64> = total.iter().zip(u).map(|(t, u)| t + s * u).collect();
        problem.update(&du, apply_prescribed)?;
        self.residual(problem)
    }

    /// Quadratic line search on the energy `u·R(s)`.
    fn line_search(
        &mut self,
        problem: &mut Problem,
        total: &[f64],
        u: &[f64],
        r0: &[f64],
        apply_prescribed: bool,
    ) -> Result<(f64, Vec<f64>)> {
        let ls = self.config.line_search;
        let e0 = dot(u, r0);
        let mut s = 1.0;
        let mut r1 = self.trial(problem, total, u, s, apply_prescribed)?;
        let mut e1 = dot(u, &r1);
        let mut smin = s;
        let mut emin = e0.abs();
        let mut n = 0;
        while e1.abs() > ls.tolerance * e0.abs() && n < ls.max_iterations {
            let a = e0 / (e0 - e1);
            let aa = 1.0 + a * (s - 1.0);
            let b = a * s * s;
            let d = b * b - 4.0 * aa * b;
            s = if d >= 0.0 {
                let mut x = (b + d.sqrt()) / (2.0 * aa);
                if x < 0.0 {
                    x = (b - d.sqrt()) / (2.0 * aa);
                }
                x.max(0.0)
            } else {
                0.5 * b / aa
            };
            s = s.max(ls.min_step);
            n += 1;
            r1 = self.trial(problem, total, u, s, apply_prescribed)?;
            e1 = dot(u, &r1);
            if e1.abs() < emin {
                smin = s;
                emin = e1.abs();
            }
            debug!(n, s, energy = e1, "line search");
        }
        if n >= ls.max_iterations && s != smin {
            s = smin;
            r1 = self.trial(problem, total, u, s, apply_prescribed)?;
        }
        Ok((s, r1))
    }

    fn quasin(&mut self, problem: &mut Problem, hooks: &mut Hooks, step: usize) -> Result<NewtonOutcome> {
        let neq = problem.equations().neq;
        let time = problem.time().current_time;

        problem.build_matrix_profile(&mut self.matrix, false)?;
        let prescribed = problem.prescribed_increments();
        let mut apply_prescribed = prescribed.iter().any(|v| *v != 0.0);
        self.matrix.set_prescribed(prescribed);

        let mut r0 = self.residual(problem)?;
        if !apply_prescribed
            && !problem.has_augmentations()
            && self.config.rmin > 0.0
            && dot(&r0, &r0) < self.config.rmin
        {
            debug!(residual = dot(&r0, &r0), "time point starts in equilibrium");
            self.matrix.clear_prescribed();
            return Ok(NewtonOutcome::Converged { iterations: 0 });
        }
        if self.config.reform_each_time_step
            || self.factored != Some(self.matrix.version())
            || self.matrix.has_prescribed()
        {
            self.reform(problem)?;
        }
        if apply_prescribed {
            r0.iter_mut().zip(self.matrix.fd()).for_each(|(r, f)| *r += f);
        }

        let mut total = vec![0.0; neq];
        let mut baseline: Option<(f64, f64)> = None;
        let mut energy_max = 0.0;
        let mut pass = 0;
        let mut iteration = 0;

        loop {
            if iteration >= self.config.max_iterations {
                return Ok(NewtonOutcome::Failed(format!(
                    "no convergence after {} iterations",
                    iteration
                )));
            }
            self.state = SolverState::Iterating;
            let u = self.bfgs.solve(self.solver.as_ref(), &r0)?;
            let work = dot(&u, &r0);

            if work < 0.0 {
                warn!(iteration, work, "negative work, increment is not a descent direction");
                if self.config.divergence_reform && self.config.do_reforms {
                    if !self.try_reform(problem)? {
                        return Ok(NewtonOutcome::Failed("negative work after maximum reformations".into()));
                    }
                    iteration += 1;
                    self.stats.iterations = iteration;
                    continue;
                }
                return Ok(NewtonOutcome::Failed("negative work".into()));
            }

            let (residual_initial, energy_initial) = *baseline.get_or_insert_with(|| {
                energy_max = work.abs();
                (dot(&r0, &r0), work.abs())
            });

            let (s, r1) = if self.config.line_search.is_enabled() {
                self.line_search(problem, &total, &u, &r0, apply_prescribed)?
            } else {
                let r1 = self.trial(problem, &total, &u, 1.0, apply_prescribed)?;
                (1.0, r1)
            };
            total.iter_mut().zip(&u).for_each(|(t, u)| *t += s * u);
            if apply_prescribed {
                self.matrix.clear_prescribed();
                apply_prescribed = false;
            }
            iteration += 1;
            self.stats.iterations = iteration;

            let norms = ConvergenceNorms {
                residual_initial,
                energy_initial,
                residual: dot(&r1, &r1),
                increment: s * s * dot(&u, &u),
                total: dot(&total, &total),
                energy: s * dot(&u, &r1).abs(),
            };
            let converged = norms.converged(&self.config);
            info!(
                iteration,
                step_size = s,
                residual = norms.residual,
                residual_ref = self.config.rtol * norms.residual_initial,
                increment = norms.increment,
                increment_ref = self.config.dtol * self.config.dtol * norms.total,
                energy = norms.energy,
                energy_ref = self.config.etol * norms.energy_initial,
                converged,
                "newton iteration"
            );

            let info = CallbackInfo {
                event: CallbackEvent::MinorIters,
                step,
                time,
                iteration,
            };
            if hooks.fire(info) == CallbackStatus::ExitRequest {
                return Ok(NewtonOutcome::Interrupted);
            }

            if converged {
                if !(self.config.augmentation && problem.has_augmentations()) {
                    return Ok(NewtonOutcome::Converged { iterations: iteration });
                }
                self.state = SolverState::Augmenting;
                self.stats.augmentations += 1;
                if problem.augment(pass)? {
                    debug!(pass, "augmentations satisfied");
                    return Ok(NewtonOutcome::Converged { iterations: iteration });
                }
                pass += 1;
                if pass > self.config.max_augmentations {
                    return Ok(NewtonOutcome::Failed(format!(
                        "augmentations not satisfied after {} passes",
                        pass
                    )));
                }
                info!(pass, "augmentation pass, resuming iterations");
                r0 = self.residual(problem)?;
                self.reform(problem)?;
                baseline = None;
                continue;
            }

            let mut needs_reform = false;
            if self.config.divergence_reform && norms.energy > energy_max {
                debug!(energy = norms.energy, energy_max, "energy increased");
                needs_reform = true;
            }
            energy_max = f64::max(energy_max, norms.energy);
            if !needs_reform {
                needs_reform = match self.config.method {
                    QuasiNewtonMethod::FullNewton => true,
                    QuasiNewtonMethod::Bfgs => self.bfgs.is_full() || !self.bfgs.update(s, &u, &r0, &r1),
                };
            }
            r0 = r1;
            if needs_reform && !self.try_reform(problem)? {
                return Ok(NewtonOutcome::Failed(format!(
                    "maximum reformations ({}) exceeded",
                    self.config.max_reformations
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{FixedBc, PrescribedBc};
    use crate::domain::{ElasticSolidDomain, Kinematics};
    use crate::dof::DofRegistry;
    use crate::load::LoadScale;
    use crate::material::LinearElastic;
    use crate::mesh::{ElementConnectivity, ElementType};
    use crate::problem::ACTIVATION_ORDER;
    use crate::solver::DenseLuSolver;
    use crate::sparse::SystemMatrix;
    use crate::types::Point3;
    use approx::assert_relative_eq;

    /// Unit tet, base fixed, top node pulled up by 0.01.
    fn pulled_tet() -> Problem {
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
        p.prescribed_bcs.push(PrescribedBc::new(vec![3], 2, LoadScale::constant(0.01)));
        p.init().unwrap();
        p.activate_in_order(&ACTIVATION_ORDER, &|_| true).unwrap();
        p.set_time(1.0, 1.0);
        p.prep_step().unwrap();
        p
    }

    /// Returns the negated solution, so every increment does negative work.
    struct Flipped(DenseLuSolver);

    impl LinearSolver for Flipped {
        fn name(&self) -> &str {
            "flipped"
        }
        fn pre_process(&mut self, matrix: &SystemMatrix) -> Result<()> {
            self.0.pre_process(matrix)
        }
        fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
            self.0.factor(matrix)
        }
        fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
            Ok(self.0.back_solve(rhs)?.into_iter().map(|x| -x).collect())
        }
    }

    #[test]
    fn test_norm_criteria() {
        let config = NewtonConfig::default();
        let mut n = ConvergenceNorms {
            residual_initial: 1.0,
            energy_initial: 1.0,
            residual: 0.5,
            increment: 1e-9,
            total: 1.0,
            energy: 1e-3,
        };
        // rtol is disabled by default
        assert!(n.converged(&config));
        n.energy = 0.5;
        assert!(!n.converged(&config));
        n.residual = 1e-21;
        assert!(n.converged(&config));
    }

    #[test]
    fn test_negative_work_detected() {
        assert!(is_negative_work(&[1.0, -2.0], &[1.0, 1.0]));
        assert!(!is_negative_work(&[1.0, 2.0], &[1.0, 1.0]));
    }

    #[test]
    fn test_bfgs_rejects_ill_conditioned_update() {
        let mut bfgs = Bfgs::new(10, 1e5);
        // residual grew along the step: D·G < 0
        assert!(!bfgs.update(1.0, &[1.0, 0.0], &[1.0, 0.0], &[2.0, 0.0]));
        assert!(bfgs.update(1.0, &[1.0, 0.0], &[1.0, 0.0], &[0.5, 0.0]));
        assert_eq!(bfgs.n_updates(), 1);
    }

    #[test]
    fn test_bfgs_secant_condition() {
        // K = 2 I factored, true stiffness 4 I: after one update the solve
        // satisfies the secant equation on the update direction.
        let mut p = crate::sparse::MatrixProfile::new(2);
        p.add_entries(&[0, 1]);
        let mut k = SystemMatrix::new(&p, false).unwrap();
        k.add(0, 0, 2.0);
        k.add(1, 1, 2.0);
        let mut solver = DenseLuSolver::new();
        solver.pre_process(&k).unwrap();
        solver.factor(&k).unwrap();

        let mut bfgs = Bfgs::new(10, 1e5);
        let r0 = [4.0, 0.0];
        let u = bfgs.solve(&solver, &r0).unwrap();
        assert_relative_eq!(u[0], 2.0);
        // R(u) = r0 - 4u
        let r1 = [4.0 - 4.0 * u[0], 0.0];
        assert!(bfgs.update(1.0, &u, &r0, &r1));
        let g = [r0[0] - r1[0], 0.0];
        let d = bfgs.solve(&solver, &g).unwrap();
        assert_relative_eq!(d[0], u[0], epsilon = 1e-12);
    }

    #[test]
    fn test_prescribed_pull_converges() {
        let mut p = pulled_tet();
        let mut newton = NewtonSolver::new(NewtonConfig::full_newton());
        let outcome = newton.solve(&mut p, &mut Hooks::new(), 0).unwrap();
        assert!(outcome.is_converged(), "{:?}", outcome);
        assert_relative_eq!(p.mesh.nodes[3].dofs[2].value, 0.01, epsilon = 1e-14);
        assert_eq!(newton.state(), SolverState::Converged);
    }

    #[test]
    fn test_negative_work_reforms_then_fails() {
        let mut p = pulled_tet();
        let mut config = NewtonConfig::default();
        config.max_reformations = 3;
        let mut newton = NewtonSolver::with_linear_solver(config, Box::new(Flipped(DenseLuSolver::new())));
        let outcome = newton.solve(&mut p, &mut Hooks::new(), 0).unwrap();
        assert!(matches!(outcome, NewtonOutcome::Failed(_)));
        assert!(newton.stats().reformations > 1);
        assert_eq!(newton.state(), SolverState::Diverged);
    }

    #[test]
    fn test_exit_request_interrupts() {
        let mut p = pulled_tet();
        let mut hooks = Hooks::new();
        hooks.register(&[CallbackEvent::MinorIters], |_| CallbackStatus::ExitRequest);
        let mut newton = NewtonSolver::new(NewtonConfig::default());
        let outcome = newton.solve(&mut p, &mut hooks, 0).unwrap();
        assert_eq!(outcome, NewtonOutcome::Interrupted);
    }
}
