//! Nonlinear constraints enforced by augmented Lagrangian.
//!
//! A constraint contributes a residual and a stiffness like a domain, adds
//! its couplings to the dynamic matrix profile and takes part in the
//! augmentation loop that runs after Newton convergence: `augment` updates
//! the multipliers and reports whether the constraint is satisfied.

use std::fmt::Debug;

use nalgebra::{DMatrix, Matrix3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::{GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::types::Vec3;

/// Interface shared by nonlinear constraints.
pub trait NonlinearConstraint: Send + Sync + Debug {
    fn type_tag(&self) -> &'static str;

    /// Validate node references and parameters.
    fn init(&mut self, mesh: &Mesh) -> Result<()>;

    fn activate(&mut self, mesh: &Mesh) -> Result<()>;

    fn deactivate(&mut self);

    fn is_active(&self) -> bool;

    /// Clear multipliers.
    fn reset(&mut self);

    fn residual(&self, mesh: &Mesh, r: &mut GlobalVector) -> Result<()>;

    fn stiffness(&self, mesh: &Mesh, k: &mut GlobalMatrix) -> Result<()>;

    /// Couplings for the dynamic profile.
    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder);

    /// Refresh internal geometry from the trial solution.
    fn update(&mut self, _mesh: &Mesh) -> Result<()> {
        Ok(())
    }

    /// Update multipliers. Returns true when the constraint is satisfied.
    fn augment(&mut self, mesh: &Mesh, pass: usize) -> Result<bool>;

    fn commit(&mut self) {}

    fn rollback(&mut self) {}

    /// Complete payload for a full dump.
    fn save(&self) -> Result<Vec<u8>>;

    /// Multipliers only.
    fn save_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Multiplier state shared by [`DistanceConstraint`] snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Multiplier {
    lambda: f64,
    lambda_prev: f64,
}

/// Keeps the distance between two nodes at a target length.
///
/// W = λ g + ½ ε g² with g = |x_b − x_a| − L.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraint {
    pub nodes: [usize; 2],
    /// Target length; captured from the configuration at activation when
    /// `None`.
    pub target: Option<f64>,
    pub penalty: f64,
    /// Relative multiplier change accepted as converged.
    pub tolerance: f64,
    /// Absolute gap accepted as converged (zero disables).
    pub gap_tolerance: f64,
    pub min_augmentations: usize,
    pub max_augmentations: usize,
    length: f64,
    lambda: f64,
    lambda_prev: f64,
    active: bool,
}

impl DistanceConstraint {
    pub const TAG: &'static str = "node distance";

    pub fn new(nodes: [usize; 2], penalty: f64) -> Self {
        Self {
            nodes,
            target: None,
            penalty,
            tolerance: 1e-2,
            gap_tolerance: 0.0,
            min_augmentations: 0,
            max_augmentations: 50,
            length: 0.0,
            lambda: 0.0,
            lambda_prev: 0.0,
            active: false,
        }
    }

    pub fn with_target(mut self, length: f64) -> Self {
        self.target = Some(length);
        self
    }

    pub fn multiplier(&self) -> f64 {
        self.lambda
    }

    /// Unit direction, current length and gap.
    fn geometry(&self, mesh: &Mesh) -> Result<(Vec3, f64, f64)> {
        let xa = mesh.nodes[self.nodes[0]].current_position();
        let xb = mesh.nodes[self.nodes[1]].current_position();
        let d = xb - xa;
        let l = d.norm();
        if l <= f64::EPSILON {
            return Err(Error::NonFinite(format!(
                "distance constraint nodes {:?} coincide",
                self.nodes
            )));
        }
        Ok((d / l, l, l - self.length))
    }

    fn lm(&self, mesh: &Mesh) -> Vec<Option<usize>> {
        mesh.lm(&self.nodes, &[0, 1, 2])
    }

    fn force(&self, gap: f64) -> f64 {
        self.lambda + self.penalty * gap
    }
}

impl NonlinearConstraint for DistanceConstraint {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn init(&mut self, mesh: &Mesh) -> Result<()> {
        mesh.validate_nodes(&self.nodes)?;
        if self.nodes[0] == self.nodes[1] {
            return Err(Error::Init("distance constraint needs two distinct nodes".into()));
        }
        if !(self.penalty > 0.0) {
            return Err(Error::Init(format!(
                "distance constraint penalty must be positive, got {}",
                self.penalty
            )));
        }
        Ok(())
    }

    fn activate(&mut self, mesh: &Mesh) -> Result<()> {
        self.length = match self.target {
            Some(l) => l,
            None => {
                let xa = mesh.nodes[self.nodes[0]].current_position();
                let xb = mesh.nodes[self.nodes[1]].current_position();
                (xb - xa).norm()
            }
        };
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn reset(&mut self) {
        self.lambda = 0.0;
        self.lambda_prev = 0.0;
    }

    fn residual(&self, mesh: &Mesh, r: &mut GlobalVector) -> Result<()> {
        let (n, _, g) = self.geometry(mesh)?;
        let f = n * self.force(g);
        let fe = [f.x, f.y, f.z, -f.x, -f.y, -f.z];
        r.assemble(&self.lm(mesh), &fe);
        Ok(())
    }

    fn stiffness(&self, mesh: &Mesh, k: &mut GlobalMatrix) -> Result<()> {
        let (n, l, g) = self.geometry(mesh)?;
        let nn = n * n.transpose();
        let kb = nn * self.penalty + (Matrix3::identity() - nn) * (self.force(g) / l);
        let mut ke = DMatrix::zeros(6, 6);
        for (a, b, s) in [(0, 0, 1.0), (0, 3, -1.0), (3, 0, -1.0), (3, 3, 1.0)] {
            let mut block = ke.fixed_view_mut::<3, 3>(a, b);
            block += kb * s;
        }
        let lm = self.lm(mesh);
        k.assemble(&lm, &lm, &ke);
        Ok(())
    }

    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder) {
        builder.add(&self.lm(mesh));
    }

    fn augment(&mut self, mesh: &Mesh, pass: usize) -> Result<bool> {
        let (_, _, g) = self.geometry(mesh)?;
        let lambda_new = self.force(g);
        let change = if lambda_new.abs() > 0.0 {
            ((lambda_new - self.lambda) / lambda_new).abs()
        } else {
            0.0
        };
        let mut satisfied = change <= self.tolerance
            || (self.gap_tolerance > 0.0 && g.abs() <= self.gap_tolerance);
        if pass < self.min_augmentations {
            satisfied = false;
        }
        if pass >= self.max_augmentations {
            satisfied = true;
        }
        debug!(pass, gap = g, lambda = lambda_new, change, satisfied, "distance constraint augmentation");
        if !satisfied {
            self.lambda = lambda_new;
        }
        Ok(satisfied)
    }

    fn commit(&mut self) {
        self.lambda_prev = self.lambda;
    }

    fn rollback(&mut self) {
        self.lambda = self.lambda_prev;
    }

    fn save(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&Multiplier {
            lambda: self.lambda,
            lambda_prev: self.lambda_prev,
        })?)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        let m: Multiplier = bincode::deserialize(bytes)?;
        self.lambda = m.lambda;
        self.lambda_prev = m.lambda_prev;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::{init_equations, DofRegistry, EquationScheme};
    use crate::types::Point3;
    use approx::assert_relative_eq;

    fn setup() -> (Mesh, DistanceConstraint) {
        let mut mesh = Mesh::new(3);
        mesh.add_nodes([Point3::zeros(), Point3::new(2.0, 0.0, 0.0)]);
        let mut c = DistanceConstraint::new([0, 1], 100.0).with_target(1.0);
        c.init(&mesh).unwrap();
        c.activate(&mesh).unwrap();
        (mesh, c)
    }

    #[test]
    fn test_residual_pulls_nodes_together() {
        let (mut mesh, c) = setup();
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let mut r = GlobalVector::new(&map);
        c.residual(&mesh, &mut r).unwrap();
        // gap 1, force 100 along +x on node 0, -x on node 1
        assert_relative_eq!(r.r[0], 100.0);
        assert_relative_eq!(r.r[3], -100.0);
    }

    #[test]
    fn test_augmentation_converges_multiplier() {
        let (mesh, mut c) = setup();
        assert!(!c.augment(&mesh, 0).unwrap());
        assert_relative_eq!(c.multiplier(), 100.0);
        // geometry unchanged: next multiplier is 200, change 50 %
        assert!(!c.augment(&mesh, 1).unwrap());
        c.tolerance = 0.5;
        assert!(c.augment(&mesh, 2).unwrap());
    }

    #[test]
    fn test_state_round_trip() {
        let (mesh, mut c) = setup();
        c.augment(&mesh, 0).unwrap();
        let bytes = c.save_state().unwrap();
        c.reset();
        c.restore_state(&bytes).unwrap();
        assert_relative_eq!(c.multiplier(), 100.0);
    }

    #[test]
    fn test_rollback_restores_committed_multiplier() {
        let (mesh, mut c) = setup();
        c.commit();
        c.augment(&mesh, 0).unwrap();
        c.rollback();
        assert_eq!(c.multiplier(), 0.0);
    }
}
