//! Essential boundary conditions and initial conditions.
//!
//! Each component carries an `active` flag. Activation changes the status
//! of the DOFs it touches, so equations must be renumbered afterwards.

use serde::{Deserialize, Serialize};

use crate::dof::DofStatus;
use crate::error::{Error, Result};
use crate::load::{ControllerValues, LoadScale};
use crate::mesh::Mesh;

pub(crate) fn check_dof(mesh: &Mesh, dof: usize) -> Result<()> {
    if dof >= mesh.dofs_per_node() {
        return Err(Error::Init(format!(
            "dof {} out of range ({} per node)",
            dof,
            mesh.dofs_per_node()
        )));
    }
    Ok(())
}

/// Homogeneous Dirichlet condition: the DOFs keep their current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedBc {
    pub nodes: Vec<usize>,
    pub dofs: Vec<usize>,
    pub active: bool,
}

impl FixedBc {
    pub const TAG: &'static str = "fix";

    pub fn new(nodes: Vec<usize>, dofs: Vec<usize>) -> Self {
        Self { nodes, dofs, active: false }
    }

    pub fn init(&self, mesh: &Mesh) -> Result<()> {
        mesh.validate_nodes(&self.nodes)?;
        self.dofs.iter().try_for_each(|&d| check_dof(mesh, d))
    }

    pub fn activate(&mut self, mesh: &mut Mesh) {
        for &n in &self.nodes {
            for &d in &self.dofs {
                mesh.nodes[n].dofs[d].status = DofStatus::Fixed;
            }
        }
        self.active = true;
    }

    pub fn deactivate(&mut self, mesh: &mut Mesh) {
        for &n in &self.nodes {
            for &d in &self.dofs {
                mesh.nodes[n].dofs[d].status = DofStatus::Open;
            }
        }
        self.active = false;
    }
}

/// Prescribed value `offset + scale · lc(t)` on one DOF of a node set.
///
/// A relative BC captures the value present at activation as the offset,
/// so it must activate after any initial condition on the same DOF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescribedBc {
    pub nodes: Vec<usize>,
    pub dof: usize,
    pub scale: LoadScale,
    pub relative: bool,
    offsets: Vec<f64>,
    pub active: bool,
}

impl PrescribedBc {
    pub const TAG: &'static str = "prescribe";

    pub fn new(nodes: Vec<usize>, dof: usize, scale: LoadScale) -> Self {
        let offsets = vec![0.0; nodes.len()];
        Self {
            nodes,
            dof,
            scale,
            relative: false,
            offsets,
            active: false,
        }
    }

    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }

    pub fn init(&self, mesh: &Mesh, n_controllers: usize) -> Result<()> {
        mesh.validate_nodes(&self.nodes)?;
        check_dof(mesh, self.dof)?;
        self.scale.validate(n_controllers)
    }

    pub fn activate(&mut self, mesh: &mut Mesh) {
        self.offsets = self
            .nodes
            .iter()
            .map(|&n| {
                let d = &mut mesh.nodes[n].dofs[self.dof];
                d.status = DofStatus::Prescribed;
                if self.relative {
                    d.value
                } else {
                    0.0
                }
            })
            .collect();
        self.active = true;
    }

    pub fn deactivate(&mut self, mesh: &mut Mesh) {
        for &n in &self.nodes {
            mesh.nodes[n].dofs[self.dof].status = DofStatus::Open;
        }
        self.active = false;
    }

    /// Offsets captured at activation.
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// (node, dof, target value) at the current controller values.
    pub fn targets<'a>(
        &'a self,
        lc: &ControllerValues,
    ) -> impl Iterator<Item = (usize, usize, f64)> + 'a {
        let s = self.scale.eval(lc);
        self.nodes
            .iter()
            .zip(&self.offsets)
            .map(move |(&n, &off)| (n, self.dof, off + s))
    }
}

/// What an initial condition sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InitialValue {
    Value(f64),
    Velocity(f64),
}

/// Initial DOF value or velocity, applied once at activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialCondition {
    pub nodes: Vec<usize>,
    pub dof: usize,
    pub value: InitialValue,
    pub active: bool,
}

impl InitialCondition {
    pub const TAG: &'static str = "initial";

    pub fn new(nodes: Vec<usize>, dof: usize, value: InitialValue) -> Self {
        Self { nodes, dof, value, active: false }
    }

    pub fn init(&self, mesh: &Mesh) -> Result<()> {
        mesh.validate_nodes(&self.nodes)?;
        check_dof(mesh, self.dof)
    }

    pub fn activate(&mut self, mesh: &mut Mesh) {
        for &n in &self.nodes {
            let d = &mut mesh.nodes[n].dofs[self.dof];
            match self.value {
                InitialValue::Value(v) => {
                    d.value = v;
                    d.prev = v;
                    d.base = v;
                }
                InitialValue::Velocity(v) => {
                    d.velocity = v;
                    d.velocity_prev = v;
                }
            }
        }
        self.active = true;
    }
}
