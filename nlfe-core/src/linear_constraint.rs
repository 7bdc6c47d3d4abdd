//! Linear multi-point constraints `u_parent = Σ cᵢ u_childᵢ`.
//!
//! Parent DOFs are eliminated: they get [`DofStatus::Linked`] and an id in
//! the linked range of the [`EquationMap`], whose expansion routes every
//! contribution to the children (Tᵀ K T).

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::ProfileBuilder;
use crate::dof::{DofStatus, EquationMap};
use crate::error::{Error, Result};
use crate::mesh::Mesh;

/// (node, dof) pair.
pub type NodeDofRef = (usize, usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub parent: NodeDofRef,
    /// (node, dof, coefficient)
    pub children: Vec<(usize, usize, f64)>,
}

impl LinearConstraint {
    pub fn new(parent: NodeDofRef, children: Vec<(usize, usize, f64)>) -> Self {
        Self { parent, children }
    }
}

/// Owns all linear constraints; activated after every other component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraintManager {
    constraints: Vec<LinearConstraint>,
    active: bool,
}

impl LinearConstraintManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: LinearConstraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn parent_index(&self, node: usize, dof: usize) -> Option<usize> {
        self.constraints.iter().position(|c| c.parent == (node, dof))
    }

    /// Validate references and reject duplicate parents and cycles.
    pub fn init(&self, mesh: &Mesh) -> Result<()> {
        let ndof = mesh.dofs_per_node();
        for (k, c) in self.constraints.iter().enumerate() {
            let refs = std::iter::once(c.parent).chain(c.children.iter().map(|&(n, d, _)| (n, d)));
            for (n, d) in refs {
                if n >= mesh.n_nodes() || d >= ndof {
                    return Err(Error::Init(format!(
                        "linear constraint {}: invalid reference node {} dof {}",
                        k, n, d
                    )));
                }
            }
        }
        if let Some((n, d)) = self.constraints.iter().map(|c| c.parent).duplicates().next() {
            return Err(Error::Init(format!(
                "linear constraints: node {} dof {} is a parent twice",
                n, d
            )));
        }
        for k in 0..self.constraints.len() {
            self.check_acyclic(k, &mut vec![k])?;
        }
        Ok(())
    }

    fn check_acyclic(&self, k: usize, path: &mut Vec<usize>) -> Result<()> {
        for &(n, d, _) in &self.constraints[k].children {
            if let Some(j) = self.parent_index(n, d) {
                if path.contains(&j) {
                    return Err(Error::Init(format!("linear constraint {} is cyclic", k)));
                }
                path.push(j);
                self.check_acyclic(j, path)?;
                path.pop();
            }
        }
        Ok(())
    }

    pub fn activate(&mut self, mesh: &mut Mesh) -> Result<()> {
        for c in &self.constraints {
            let d = &mut mesh.nodes[c.parent.0].dofs[c.parent.1];
            if d.status != DofStatus::Open {
                return Err(Error::Init(format!(
                    "linear constraint parent node {} dof {} is already constrained",
                    c.parent.0, c.parent.1
                )));
            }
            d.status = DofStatus::Linked;
        }
        self.active = true;
        Ok(())
    }

    /// Number the parent DOFs in the linked range and record the expansion.
    pub fn assign_equations(&self, mesh: &mut Mesh, map: &mut EquationMap) {
        map.links.clear();
        if !self.active {
            return;
        }
        let base = map.link_base();
        for (k, c) in self.constraints.iter().enumerate() {
            mesh.nodes[c.parent.0].dofs[c.parent.1].equation = Some(base + k);
        }
        map.links = self
            .constraints
            .iter()
            .map(|c| {
                c.children
                    .iter()
                    .filter_map(|&(n, d, coef)| mesh.nodes[n].dofs[d].equation.map(|id| (id, coef)))
                    .collect()
            })
            .collect();
        debug!(n_links = map.links.len(), "linear constraints numbered");
    }

    /// Couple the children of every constraint.
    pub fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder) {
        if !self.active {
            return;
        }
        for c in &self.constraints {
            let lm: Vec<Option<usize>> = c
                .children
                .iter()
                .map(|&(n, d, _)| mesh.nodes[n].dofs[d].equation)
                .collect();
            builder.add(&lm);
        }
    }

    fn evaluate(&self, mesh: &Mesh, k: usize, field: fn(&crate::mesh::NodeDof) -> f64) -> f64 {
        self.constraints[k]
            .children
            .iter()
            .map(|&(n, d, coef)| {
                let v = match self.parent_index(n, d) {
                    Some(j) => self.evaluate(mesh, j, field),
                    None => field(&mesh.nodes[n].dofs[d]),
                };
                coef * v
            })
            .sum()
    }

    /// Recover parent values, velocities and accelerations from the children.
    pub fn update(&self, mesh: &mut Mesh) {
        if !self.active {
            return;
        }
        for k in 0..self.constraints.len() {
            let value = self.evaluate(mesh, k, |d| d.value);
            let velocity = self.evaluate(mesh, k, |d| d.velocity);
            let accel = self.evaluate(mesh, k, |d| d.accel);
            let (n, d) = self.constraints[k].parent;
            let dof = &mut mesh.nodes[n].dofs[d];
            dof.value = value;
            dof.velocity = velocity;
            dof.accel = accel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::GlobalVector;
    use crate::dof::{init_equations, DofRegistry, EquationScheme};
    use crate::types::Point3;

    fn three_nodes() -> Mesh {
        let mut mesh = Mesh::new(3);
        mesh.add_nodes([Point3::zeros(), Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)]);
        mesh
    }

    #[test]
    fn test_parent_is_eliminated() {
        let mut mesh = three_nodes();
        let mut lcm = LinearConstraintManager::new();
        lcm.add(LinearConstraint::new((1, 0), vec![(0, 0, 0.5), (2, 0, 0.5)]));
        lcm.init(&mesh).unwrap();
        lcm.activate(&mut mesh).unwrap();
        let mut map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        lcm.assign_equations(&mut mesh, &mut map);
        assert_eq!(map.neq, 8);
        assert_eq!(mesh.nodes[1].dofs[0].equation, Some(map.link_base()));

        // a force on the parent splits to the children
        let mut r = GlobalVector::new(&map);
        r.assemble(&mesh.lm(&[1], &[0]), &[2.0]);
        let x0 = mesh.nodes[0].dofs[0].equation.unwrap();
        let x2 = mesh.nodes[2].dofs[0].equation.unwrap();
        assert_eq!(r.r[x0], 1.0);
        assert_eq!(r.r[x2], 1.0);
    }

    #[test]
    fn test_update_recovers_parent_through_chain() {
        let mut mesh = three_nodes();
        let mut lcm = LinearConstraintManager::new();
        lcm.add(LinearConstraint::new((1, 0), vec![(0, 0, 2.0)]));
        lcm.add(LinearConstraint::new((2, 0), vec![(1, 0, 3.0)]));
        lcm.init(&mesh).unwrap();
        lcm.activate(&mut mesh).unwrap();
        mesh.nodes[0].dofs[0].value = 0.5;
        lcm.update(&mut mesh);
        assert_eq!(mesh.nodes[1].dofs[0].value, 1.0);
        assert_eq!(mesh.nodes[2].dofs[0].value, 3.0);
    }

    #[test]
    fn test_cycle_rejected() {
        let mesh = three_nodes();
        let mut lcm = LinearConstraintManager::new();
        lcm.add(LinearConstraint::new((1, 0), vec![(2, 0, 1.0)]));
        lcm.add(LinearConstraint::new((2, 0), vec![(1, 0, 1.0)]));
        assert!(matches!(lcm.init(&mesh), Err(Error::Init(_))));
    }
}
