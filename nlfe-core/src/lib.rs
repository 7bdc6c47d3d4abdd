//! NLFE Core - nonlinear finite element solution core
//!
//! Implicit quasi-static and dynamic analysis of solid and biphasic models:
//! - DOF registry and equation numbering with fixed, prescribed and linked DOFs
//! - Parallel element assembly using Rayon with deterministic scatter
//! - Sparse matrix profiles and CSR storage, symmetric or full
//! - Newton-Raphson with BFGS updates, line search and augmented Lagrangian
//!   constraints
//! - Analysis steps with automatic time stepping and restart streams
//!
//! # Architecture
//!
//! - [`Problem`]: mesh, domains, boundary conditions and the global
//!   residual, stiffness and update operations
//! - [`Domain`] trait: element assembly for one physics type
//! - [`NewtonSolver`]: drives a time point to convergence
//! - [`LinearSolver`] trait: factor and back-solve strategies
//! - [`AnalysisStep`] and [`Model`]: time marching and the run lifecycle

pub mod types;
pub mod error;
pub mod dof;
pub mod mesh;
pub mod element;
pub mod material_point;
pub mod material;
pub mod sparse;
pub mod assembly;
pub mod domain;
pub mod load;
pub mod boundary;
pub mod linear_constraint;
pub mod constraint;
pub mod contact;
pub mod solver;
pub mod schur;
pub mod config;
pub mod callback;
pub mod problem;
pub mod newton;
pub mod step;
pub mod registry;
pub mod dump;
pub mod model;

pub use types::{Point3, StrainTensor, StressTensor, TimeInfo, Vec3};
pub use error::{Error, Result};
pub use dof::{DofRegistry, DofStatus, EquationMap, EquationScheme};
pub use mesh::{ElementConnectivity, ElementType, Mesh};
pub use material::Material;
pub use domain::{BiphasicDomain, Domain, ElasticSolidDomain, Kinematics};
pub use solver::{LinearSolver, LinearSolverKind};
pub use config::{IntegrationConfig, NewtonConfig, TimeStepperConfig};
pub use callback::{CallbackEvent, CallbackStatus, InterruptHandle};
pub use problem::{AnalysisKind, ComponentRef, Problem};
pub use newton::{NewtonOutcome, NewtonSolver, SolverStats};
pub use step::{AnalysisStep, StepOutcome};
pub use registry::Registry;
pub use dump::DumpMode;
pub use model::{Model, SolveStatus};
