//! Solver and time-stepping configuration.

use serde::{Deserialize, Serialize};

use crate::dof::EquationScheme;
use crate::error::{Error, Result};
use crate::solver::LinearSolverKind;

/// Stiffness update strategy between reformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuasiNewtonMethod {
    /// Reform and refactor every iteration.
    FullNewton,
    /// BFGS rank-two updates on the last factorization.
    #[default]
    Bfgs,
}

/// Line search on the energy norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSearchConfig {
    /// Ratio |ui·R(s)| / |ui·R0| accepted without searching; zero disables
    /// the line search.
    pub tolerance: f64,
    /// Smallest step size.
    pub min_step: f64,
    pub max_iterations: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.9,
            min_step: 0.01,
            max_iterations: 5,
        }
    }
}

impl LineSearchConfig {
    pub fn disabled() -> Self {
        Self {
            tolerance: 0.0,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tolerance > 0.0
    }
}

/// Newton-Raphson settings of one analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonConfig {
    /// Relative residual tolerance; zero disables the check.
    pub rtol: f64,
    /// Relative displacement tolerance; zero disables the check.
    pub dtol: f64,
    /// Relative energy tolerance; zero disables the check.
    pub etol: f64,
    /// Absolute residual floor: below it the residual check passes and the
    /// ratio test is skipped.
    pub rmin: f64,
    pub max_iterations: usize,
    /// Stiffness reformations allowed per time step.
    pub max_reformations: usize,
    pub method: QuasiNewtonMethod,
    /// BFGS updates between reformations.
    pub max_updates: usize,
    /// Largest accepted BFGS condition number.
    pub cmax: f64,
    pub line_search: LineSearchConfig,
    /// Reform instead of failing when the energy norm grows.
    pub divergence_reform: bool,
    /// Allow reformations at all (otherwise BFGS failures end the step).
    pub do_reforms: bool,
    /// Reform at the start of every time step.
    pub reform_each_time_step: bool,
    pub augmentation: bool,
    pub max_augmentations: usize,
    /// Store only the lower triangle of the stiffness.
    pub symmetric: bool,
    pub scheme: EquationScheme,
    pub linear_solver: LinearSolverKind,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            rtol: 0.0,
            dtol: 1e-3,
            etol: 1e-2,
            rmin: 1e-20,
            max_iterations: 50,
            max_reformations: 15,
            method: QuasiNewtonMethod::Bfgs,
            max_updates: 10,
            cmax: 1e5,
            line_search: LineSearchConfig::default(),
            divergence_reform: true,
            do_reforms: true,
            reform_each_time_step: true,
            augmentation: true,
            max_augmentations: 10,
            symmetric: true,
            scheme: EquationScheme::Staggered,
            linear_solver: LinearSolverKind::Auto,
        }
    }
}

impl NewtonConfig {
    /// Reform every iteration, no line search.
    pub fn full_newton() -> Self {
        Self {
            method: QuasiNewtonMethod::FullNewton,
            max_updates: 0,
            max_reformations: 50,
            line_search: LineSearchConfig::disabled(),
            ..Default::default()
        }
    }

    /// Tight tolerances on all three norms.
    pub fn strict() -> Self {
        Self {
            rtol: 1e-10,
            dtol: 1e-8,
            etol: 1e-10,
            ..Self::full_newton()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("rtol", self.rtol), ("dtol", self.dtol), ("etol", self.etol), ("rmin", self.rmin)] {
            if !(v >= 0.0) || !v.is_finite() {
                return Err(Error::Init(format!("{} must be non-negative, got {}", name, v)));
            }
        }
        if self.max_iterations == 0 {
            return Err(Error::Init("max_iterations must be positive".into()));
        }
        if self.cmax <= 1.0 {
            return Err(Error::Init(format!("cmax must exceed 1, got {}", self.cmax)));
        }
        let ls = &self.line_search;
        if ls.is_enabled() && !(ls.min_step > 0.0 && ls.min_step < 1.0) {
            return Err(Error::Init(format!(
                "line search min_step must be in (0, 1), got {}",
                ls.min_step
            )));
        }
        Ok(())
    }
}

/// Automatic time step control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStepperConfig {
    /// Cutbacks allowed per time point.
    pub max_retries: usize,
    /// Target Newton iterations per step.
    pub optimal_iterations: usize,
    pub dtmin: f64,
    pub dtmax: f64,
}

impl Default for TimeStepperConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            optimal_iterations: 10,
            dtmin: 1e-6,
            dtmax: f64::INFINITY,
        }
    }
}

impl TimeStepperConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.dtmin > 0.0) || self.dtmax < self.dtmin || self.optimal_iterations == 0 {
            return Err(Error::Init(format!(
                "invalid time stepper: dtmin={} dtmax={} optimal_iterations={}",
                self.dtmin, self.dtmax, self.optimal_iterations
            )));
        }
        Ok(())
    }
}

/// Time integration for dynamic steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IntegrationConfig {
    Newmark { beta: f64, gamma: f64 },
    /// Newmark parameters of the generalized-α family with the given
    /// high-frequency spectral radius.
    SpectralRadius(f64),
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        IntegrationConfig::Newmark {
            beta: 0.25,
            gamma: 0.5,
        }
    }
}

impl IntegrationConfig {
    /// (beta, gamma)
    pub fn parameters(&self) -> Result<(f64, f64)> {
        match *self {
            IntegrationConfig::Newmark { beta, gamma } => {
                if beta <= 0.0 || gamma < 0.0 {
                    return Err(Error::Init(format!(
                        "invalid Newmark parameters beta={} gamma={}",
                        beta, gamma
                    )));
                }
                Ok((beta, gamma))
            }
            IntegrationConfig::SpectralRadius(rho) => {
                if !(0.0..=1.0).contains(&rho) {
                    return Err(Error::Init(format!("spectral radius {} outside [0, 1]", rho)));
                }
                let alpha_f = 1.0 / (1.0 + rho);
                let alpha_m = (2.0 - rho) / (1.0 + rho);
                let gamma = 0.5 + alpha_m - alpha_f;
                let beta = 0.25 * (1.0 + alpha_m - alpha_f).powi(2);
                Ok((beta, gamma))
            }
        }
    }
}
