//! Contact interfaces.
//!
//! Contact pairs change between iterations, so interfaces only contribute
//! to the dynamic part of the matrix profile. [`NodeToNodeContact`] pairs
//! every slave node with its nearest master node in the current
//! configuration and enforces a non-negative normal gap with a penalty
//! plus an augmented Lagrange multiplier.

use std::fmt::Debug;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::{GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::types::Vec3;

/// Interface shared by contact formulations.
pub trait ContactInterface: Send + Sync + Debug {
    fn type_tag(&self) -> &'static str;

    fn init(&mut self, mesh: &Mesh) -> Result<()>;

    fn activate(&mut self, mesh: &Mesh) -> Result<()>;

    fn deactivate(&mut self);

    fn is_active(&self) -> bool;

    fn residual(&self, mesh: &Mesh, r: &mut GlobalVector) -> Result<()>;

    fn stiffness(&self, mesh: &Mesh, k: &mut GlobalMatrix) -> Result<()>;

    /// Couplings of the current pairs.
    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder);

    /// Re-evaluate pairing and gaps from the trial solution.
    fn update(&mut self, mesh: &Mesh) -> Result<()>;

    /// Update multipliers. Returns true when the interface is satisfied.
    fn augment(&mut self, mesh: &Mesh, pass: usize) -> Result<bool>;

    fn commit(&mut self) {}

    fn rollback(&mut self) {}

    fn save(&self) -> Result<Vec<u8>>;

    fn save_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Per-slave contact state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Index into the master node list.
    pub master: Option<usize>,
    /// Normal gap, negative when penetrating.
    pub gap: f64,
    pub lambda: f64,
    pub lambda_prev: f64,
}

impl ContactPoint {
    /// Normal contact pressure ⟨λ − ε g⟩.
    pub fn pressure(&self, penalty: f64) -> f64 {
        (self.lambda - penalty * self.gap).max(0.0)
    }
}

/// Node-to-node contact along a fixed interface normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeToNodeContact {
    pub slaves: Vec<usize>,
    pub masters: Vec<usize>,
    /// Unit normal pointing from the master side into the slave side.
    pub normal: Vec3,
    pub penalty: f64,
    /// Relative change of the multiplier norm accepted as converged.
    pub tolerance: f64,
    /// Largest penetration accepted as converged (zero disables).
    pub gap_tolerance: f64,
    /// Pairs farther apart than this (tangentially) are ignored.
    pub search_radius: f64,
    pub augmented: bool,
    pub max_augmentations: usize,
    points: Vec<ContactPoint>,
    active: bool,
}

impl NodeToNodeContact {
    pub const TAG: &'static str = "node-to-node";

    pub fn new(slaves: Vec<usize>, masters: Vec<usize>, normal: Vec3, penalty: f64) -> Self {
        let points = vec![ContactPoint::default(); slaves.len()];
        Self {
            slaves,
            masters,
            normal,
            penalty,
            tolerance: 0.1,
            gap_tolerance: 0.0,
            search_radius: f64::INFINITY,
            augmented: false,
            max_augmentations: 10,
            points,
            active: false,
        }
    }

    pub fn points(&self) -> &[ContactPoint] {
        &self.points
    }

    fn pair_lm(&self, mesh: &Mesh, slave: usize, master: usize) -> Vec<Option<usize>> {
        mesh.lm(&[self.slaves[slave], self.masters[master]], &[0, 1, 2])
    }

    fn nearest_master(&self, mesh: &Mesh, x: &Vec3) -> Option<(usize, f64)> {
        self.masters
            .iter()
            .enumerate()
            .map(|(m, &node)| {
                let d = x - mesh.nodes[node].current_position();
                let tangential = (d - self.normal * d.dot(&self.normal)).norm();
                (m, tangential)
            })
            .filter(|&(_, t)| t <= self.search_radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl ContactInterface for NodeToNodeContact {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn init(&mut self, mesh: &Mesh) -> Result<()> {
        mesh.validate_nodes(&self.slaves)?;
        mesh.validate_nodes(&self.masters)?;
        if self.masters.is_empty() {
            return Err(Error::Init("contact interface has no master nodes".into()));
        }
        let len = self.normal.norm();
        if !(len > 0.0) {
            return Err(Error::Init("contact normal must be non-zero".into()));
        }
        self.normal /= len;
        if !(self.penalty > 0.0) {
            return Err(Error::Init(format!("contact penalty must be positive, got {}", self.penalty)));
        }
        self.points.resize(self.slaves.len(), ContactPoint::default());
        Ok(())
    }

    fn activate(&mut self, mesh: &Mesh) -> Result<()> {
        self.active = true;
        self.update(mesh)
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn residual(&self, mesh: &Mesh, r: &mut GlobalVector) -> Result<()> {
        for (s, pt) in self.points.iter().enumerate() {
            let Some(m) = pt.master else { continue };
            let p = pt.pressure(self.penalty);
            if p == 0.0 {
                continue;
            }
            let f = self.normal * p;
            r.assemble(&self.pair_lm(mesh, s, m), &[f.x, f.y, f.z, -f.x, -f.y, -f.z]);
        }
        Ok(())
    }

    fn stiffness(&self, mesh: &Mesh, k: &mut GlobalMatrix) -> Result<()> {
        let nn = self.normal * self.normal.transpose() * self.penalty;
        let mut ke = DMatrix::zeros(6, 6);
        for (a, b, s) in [(0, 0, 1.0), (0, 3, -1.0), (3, 0, -1.0), (3, 3, 1.0)] {
            let mut block = ke.fixed_view_mut::<3, 3>(a, b);
            block += nn * s;
        }
        for (s, pt) in self.points.iter().enumerate() {
            let Some(m) = pt.master else { continue };
            if pt.pressure(self.penalty) > 0.0 {
                let lm = self.pair_lm(mesh, s, m);
                k.assemble(&lm, &lm, &ke);
            }
        }
        Ok(())
    }

    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder) {
        for (s, pt) in self.points.iter().enumerate() {
            if let Some(m) = pt.master {
                builder.add(&self.pair_lm(mesh, s, m));
            }
        }
    }

    fn update(&mut self, mesh: &Mesh) -> Result<()> {
        for s in 0..self.slaves.len() {
            let x = mesh.nodes[self.slaves[s]].current_position();
            let pair = self.nearest_master(mesh, &x);
            let pt = &mut self.points[s];
            match pair {
                Some((m, _)) => {
                    let xm = mesh.nodes[self.masters[m]].current_position();
                    pt.master = Some(m);
                    pt.gap = (x - xm).dot(&self.normal);
                }
                None => {
                    pt.master = None;
                    pt.gap = 0.0;
                }
            }
        }
        Ok(())
    }

    fn augment(&mut self, _mesh: &Mesh, pass: usize) -> Result<bool> {
        if !self.augmented {
            return Ok(true);
        }
        let (mut norm_old, mut norm_new, mut max_pen) = (0.0, 0.0, 0.0f64);
        for pt in &self.points {
            let l = pt.pressure(self.penalty);
            norm_old += pt.lambda * pt.lambda;
            norm_new += l * l;
            if pt.master.is_some() {
                max_pen = max_pen.max(-pt.gap);
            }
        }
        let change = if norm_new > 0.0 {
            ((norm_new.sqrt() - norm_old.sqrt()) / norm_new.sqrt()).abs()
        } else {
            0.0
        };
        let satisfied = change <= self.tolerance
            || (self.gap_tolerance > 0.0 && max_pen <= self.gap_tolerance)
            || pass >= self.max_augmentations;
        debug!(pass, change, max_penetration = max_pen, satisfied, "contact augmentation");
        if !satisfied {
            let penalty = self.penalty;
            for pt in self.points.iter_mut() {
                pt.lambda = pt.pressure(penalty);
            }
        }
        Ok(satisfied)
    }

    fn commit(&mut self) {
        for pt in self.points.iter_mut() {
            pt.lambda_prev = pt.lambda;
        }
    }

    fn rollback(&mut self) {
        for pt in self.points.iter_mut() {
            pt.lambda = pt.lambda_prev;
        }
    }

    fn save(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.points)?)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        let points: Vec<ContactPoint> = bincode::deserialize(bytes)?;
        if points.len() != self.slaves.len() {
            return Err(Error::Serialization(format!(
                "contact state has {} points, interface has {} slaves",
                points.len(),
                self.slaves.len()
            )));
        }
        self.points = points;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::{init_equations, DofRegistry, EquationScheme};
    use crate::types::Point3;
    use approx::assert_relative_eq;

    /// Slave node 0 above masters 1 and 2.
    fn setup() -> (Mesh, NodeToNodeContact) {
        let mut mesh = Mesh::new(3);
        mesh.add_nodes([
            Point3::new(0.1, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ]);
        let mut c = NodeToNodeContact::new(vec![0], vec![1, 2], Vec3::new(0.0, 0.0, 2.0), 10.0);
        c.init(&mesh).unwrap();
        c.activate(&mesh).unwrap();
        (mesh, c)
    }

    #[test]
    fn test_pairing_follows_motion() {
        let (mut mesh, mut c) = setup();
        assert_eq!(c.points()[0].master, Some(0));
        mesh.nodes[0].dofs[0].value = 0.8;
        c.update(&mesh).unwrap();
        assert_eq!(c.points()[0].master, Some(1));
    }

    #[test]
    fn test_penetration_pushes_slave_out() {
        let (mut mesh, mut c) = setup();
        mesh.nodes[0].dofs[2].value = -0.1;
        c.update(&mesh).unwrap();
        assert_relative_eq!(c.points()[0].gap, -0.1);
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let mut r = GlobalVector::new(&map);
        c.residual(&mesh, &mut r).unwrap();
        assert_relative_eq!(r.r[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r.r[5], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_separated_pair_is_inert() {
        let (mut mesh, mut c) = setup();
        mesh.nodes[0].dofs[2].value = 0.5;
        c.update(&mesh).unwrap();
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let mut r = GlobalVector::new(&map);
        c.residual(&mesh, &mut r).unwrap();
        assert!(r.r.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_profile_tracks_pairs() {
        let (mut mesh, c) = setup();
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let mut b = ProfileBuilder::new(&map);
        c.build_matrix_profile(&mesh, &mut b);
        let p = b.finish();
        assert!(p.contains(0, 3));
        assert!(!p.contains(0, 6));
    }

    #[test]
    fn test_augmentation_stores_pressure() {
        let (mut mesh, mut c) = setup();
        c.augmented = true;
        mesh.nodes[0].dofs[2].value = -0.1;
        c.update(&mesh).unwrap();
        assert!(!c.augment(&mesh, 0).unwrap());
        assert_relative_eq!(c.points()[0].lambda, 1.0, epsilon = 1e-12);
    }
}
