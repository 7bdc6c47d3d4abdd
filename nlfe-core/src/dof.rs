//! Degree-of-freedom registry and equation numbering.
//!
//! Physical variables (displacement, fluid pressure, ...) are registered as
//! named groups of scalar DOFs. Every node carries one slot per registered
//! DOF. [`init_equations`] walks the mesh and assigns equation ids:
//!
//! - `[0, neq)`: free equations (solved for)
//! - `[neq, neq + nc)`: constrained slots (fixed and prescribed DOFs),
//!   used for reaction forces and the prescribed-displacement correction
//! - `[neq + nc, ..)`: linked DOFs, expanded through linear constraints

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{Error, Result};
use crate::mesh::Mesh;

/// A named group of scalar DOFs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofVariable {
    pub name: String,
    pub dofs: Vec<String>,
    first: usize,
}

/// Ordered set of registered variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofRegistry {
    variables: Vec<DofVariable>,
}

impl DofRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a 3-component displacement variable.
    pub fn solid() -> Self {
        let mut reg = Self::new();
        reg.add_variable("displacement", &["x", "y", "z"]);
        reg
    }

    /// Registry with displacement and fluid pressure.
    pub fn biphasic() -> Self {
        let mut reg = Self::solid();
        reg.add_variable("fluid pressure", &["p"]);
        reg
    }

    /// Register a variable. Returns its index; re-registering a name returns
    /// the existing index unchanged.
    pub fn add_variable(&mut self, name: &str, dofs: &[&str]) -> usize {
        if let Some(i) = self.variable_index(name) {
            return i;
        }
        let first = self.total_dofs();
        self.variables.push(DofVariable {
            name: name.to_string(),
            dofs: dofs.iter().map(|s| s.to_string()).collect(),
            first,
        });
        self.variables.len() - 1
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn variables(&self) -> &[DofVariable] {
        &self.variables
    }

    /// Node slot of a DOF by its symbol, or `None` if not registered.
    pub fn dof_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().find_map(|v| {
            v.dofs.iter().position(|d| d == name).map(|k| v.first + k)
        })
    }

    /// Node slot of the `n`-th component of a variable.
    pub fn variable_dof(&self, variable: &str, n: usize) -> Option<usize> {
        let v = &self.variables[self.variable_index(variable)?];
        (n < v.dofs.len()).then(|| v.first + n)
    }

    /// Node slots covered by a variable.
    pub fn variable_dofs(&self, variable: usize) -> Range<usize> {
        let v = &self.variables[variable];
        v.first..v.first + v.dofs.len()
    }

    pub fn total_dofs(&self) -> usize {
        self.variables.iter().map(|v| v.dofs.len()).sum()
    }
}

/// Status of one nodal DOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DofStatus {
    #[default]
    Open,
    Fixed,
    Prescribed,
    /// Eliminated by a linear constraint.
    Linked,
}

/// Ordering of free equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EquationScheme {
    /// Node by node, all DOFs of a node adjacent.
    #[default]
    Staggered,
    /// Variable by variable; block solvers read the partition sizes.
    Block,
}

/// Result of equation numbering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquationMap {
    /// Number of free equations.
    pub neq: usize,
    /// Number of constrained slots (fixed + prescribed).
    pub n_constrained: usize,
    /// Free equations per variable (Block scheme only, empty otherwise).
    pub partitions: Vec<usize>,
    /// Expansion of linked ids: `links[k]` lists `(equation id, coefficient)`
    /// for id `neq + n_constrained + k`.
    pub links: Vec<Vec<(usize, f64)>>,
}

/// Classification of an equation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationKind {
    Free(usize),
    Constrained(usize),
    Linked(usize),
}

impl EquationMap {
    pub fn classify(&self, id: usize) -> EquationKind {
        if id < self.neq {
            EquationKind::Free(id)
        } else if id < self.neq + self.n_constrained {
            EquationKind::Constrained(id - self.neq)
        } else {
            EquationKind::Linked(id - self.neq - self.n_constrained)
        }
    }

    /// First linked id.
    pub fn link_base(&self) -> usize {
        self.neq + self.n_constrained
    }

    /// Expand an id into `(free or constrained id, coefficient)` pairs,
    /// following links recursively.
    pub fn expand(&self, id: usize, coef: f64, out: &mut Vec<(usize, f64)>) {
        match self.classify(id) {
            EquationKind::Linked(k) => {
                if let Some(children) = self.links.get(k) {
                    for &(child, c) in children {
                        self.expand(child, coef * c, out);
                    }
                }
            }
            _ => out.push((id, coef)),
        }
    }
}

/// Assign equation ids to every active nodal DOF.
///
/// Linked DOFs are left unnumbered here; the linear constraint manager
/// assigns them afterwards. Fails with [`Error::NoEquations`] when no free
/// DOF exists.
pub fn init_equations(
    mesh: &mut Mesh,
    registry: &DofRegistry,
    scheme: EquationScheme,
) -> Result<EquationMap> {
    let ndof = registry.total_dofs();
    for node in mesh.nodes.iter_mut() {
        if node.dofs.len() != ndof {
            return Err(Error::Mesh(format!(
                "node has {} dof slots, registry defines {}",
                node.dofs.len(),
                ndof
            )));
        }
        for dof in node.dofs.iter_mut() {
            dof.equation = None;
        }
    }

    let is_free = |d: &crate::mesh::NodeDof| d.active && d.status == DofStatus::Open;
    let mut neq = 0;
    let mut partitions = Vec::new();
    match scheme {
        EquationScheme::Staggered => {
            for node in mesh.nodes.iter_mut() {
                for dof in node.dofs.iter_mut().filter(|d| is_free(d)) {
                    dof.equation = Some(neq);
                    neq += 1;
                }
            }
        }
        EquationScheme::Block => {
            for v in 0..registry.variables().len() {
                let start = neq;
                for node in mesh.nodes.iter_mut() {
                    for k in registry.variable_dofs(v) {
                        let dof = &mut node.dofs[k];
                        if is_free(dof) {
                            dof.equation = Some(neq);
                            neq += 1;
                        }
                    }
                }
                partitions.push(neq - start);
            }
        }
    }

    if neq == 0 {
        return Err(Error::NoEquations);
    }

    let mut nc = 0;
    for node in mesh.nodes.iter_mut() {
        for dof in node.dofs.iter_mut() {
            if dof.active && matches!(dof.status, DofStatus::Fixed | DofStatus::Prescribed) {
                dof.equation = Some(neq + nc);
                nc += 1;
            }
        }
    }

    tracing::debug!(neq, n_constrained = nc, ?scheme, "equations numbered");
    Ok(EquationMap {
        neq,
        n_constrained: nc,
        partitions,
        links: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::types::Point3;

    fn line_mesh(n: usize, registry: &DofRegistry) -> Mesh {
        let mut mesh = Mesh::new(registry.total_dofs());
        for i in 0..n {
            mesh.add_node(Point3::new(i as f64, 0.0, 0.0));
        }
        mesh
    }

    #[test]
    fn test_dof_lookup() {
        let reg = DofRegistry::biphasic();
        assert_eq!(reg.dof_index("y"), Some(1));
        assert_eq!(reg.dof_index("p"), Some(3));
        assert_eq!(reg.dof_index("c"), None);
        assert_eq!(reg.variable_dof("fluid pressure", 0), Some(3));
        assert_eq!(reg.variable_dof("displacement", 3), None);
        assert_eq!(reg.total_dofs(), 4);
    }

    #[test]
    fn test_add_variable_is_idempotent() {
        let mut reg = DofRegistry::solid();
        assert_eq!(reg.add_variable("displacement", &["x", "y", "z"]), 0);
        assert_eq!(reg.total_dofs(), 3);
    }

    #[test]
    fn test_numbering_contiguous_and_unique() {
        let reg = DofRegistry::solid();
        for mask in 0u32..64 {
            let mut mesh = line_mesh(2, &reg);
            let mut expected_free = 0;
            for bit in 0..6 {
                let (n, d) = (bit / 3, bit % 3);
                if mask & (1 << bit) != 0 {
                    mesh.nodes[n].dofs[d].status = DofStatus::Fixed;
                } else {
                    expected_free += 1;
                }
            }
            let result = init_equations(&mut mesh, &reg, EquationScheme::Staggered);
            if expected_free == 0 {
                assert!(matches!(result, Err(Error::NoEquations)));
                continue;
            }
            let map = result.unwrap();
            assert_eq!(map.neq, expected_free);
            let mut ids: Vec<usize> = mesh
                .nodes
                .iter()
                .flat_map(|n| n.dofs.iter())
                .filter(|d| d.status == DofStatus::Open)
                .map(|d| d.equation.unwrap())
                .collect();
            ids.sort_unstable();
            assert_eq!(ids, (0..expected_free).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_block_scheme_partitions() {
        let reg = DofRegistry::biphasic();
        let mut mesh = line_mesh(3, &reg);
        mesh.nodes[0].dofs[3].status = DofStatus::Fixed;
        let map = init_equations(&mut mesh, &reg, EquationScheme::Block).unwrap();
        assert_eq!(map.partitions, vec![9, 2]);
        assert_eq!(mesh.nodes[1].dofs[3].equation, Some(9));
        assert_eq!(mesh.nodes[0].dofs[3].equation, Some(11));
        assert_eq!(map.n_constrained, 1);
    }

    #[test]
    fn test_inactive_dofs_are_unnumbered() {
        let reg = DofRegistry::biphasic();
        let mut mesh = line_mesh(2, &reg);
        mesh.nodes[1].dofs[3].active = false;
        let map = init_equations(&mut mesh, &reg, EquationScheme::Staggered).unwrap();
        assert_eq!(map.neq, 7);
        assert_eq!(mesh.nodes[1].dofs[3].equation, None);
    }

    #[test]
    fn test_expand_links() {
        let map = EquationMap {
            neq: 2,
            n_constrained: 1,
            partitions: vec![],
            links: vec![vec![(0, 0.5), (2, 2.0)]],
        };
        let mut out = Vec::new();
        map.expand(3, 2.0, &mut out);
        assert_eq!(out, vec![(0, 1.0), (2, 4.0)]);
        assert_eq!(map.classify(2), EquationKind::Constrained(0));
    }
}
