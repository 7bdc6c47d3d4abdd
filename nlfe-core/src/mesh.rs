//! Mesh data structure.
//!
//! Stores reference nodal coordinates together with the per-node DOF state
//! (status, equation id, current and converged values). Element
//! connectivity is owned by the domains and facets by the surface loads;
//! both are described with [`ElementConnectivity`].

use serde::{Deserialize, Serialize};

use crate::dof::DofStatus;
use crate::error::{Error, Result};
use crate::types::{Point3, Vec3};

/// Supported element and facet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// 4-node tetrahedron (linear).
    Tet4,
    /// 8-node hexahedron (linear).
    Hex8,
    /// 3-node triangular facet.
    Tri3,
    /// 4-node quadrilateral facet.
    Quad4,
    /// 2-node edge.
    Line2,
}

impl ElementType {
    /// Number of nodes for this element type.
    pub fn n_nodes(self) -> usize {
        match self {
            ElementType::Tet4 => 4,
            ElementType::Hex8 => 8,
            ElementType::Tri3 => 3,
            ElementType::Quad4 => 4,
            ElementType::Line2 => 2,
        }
    }

    /// Parametric dimension.
    pub fn dimension(self) -> usize {
        match self {
            ElementType::Tet4 | ElementType::Hex8 => 3,
            ElementType::Tri3 | ElementType::Quad4 => 2,
            ElementType::Line2 => 1,
        }
    }
}

/// Element connectivity - node indices for an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementConnectivity {
    /// Element type identifier.
    pub element_type: ElementType,
    /// Node indices (0-based).
    pub nodes: Vec<usize>,
}

impl ElementConnectivity {
    pub fn new(element_type: ElementType, nodes: Vec<usize>) -> Result<Self> {
        if nodes.len() != element_type.n_nodes() {
            return Err(Error::Mesh(format!(
                "Element type {:?} requires {} nodes, got {}",
                element_type,
                element_type.n_nodes(),
                nodes.len()
            )));
        }
        Ok(Self { element_type, nodes })
    }
}

/// State of one nodal DOF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeDof {
    /// Inactive DOFs are unused and never numbered.
    pub active: bool,
    pub status: DofStatus,
    /// Global equation id, see [`crate::dof::EquationMap`].
    pub equation: Option<usize>,
    /// Current (trial) value.
    pub value: f64,
    /// Value at the last converged time point.
    pub prev: f64,
    /// Start value of the current increment (predicted value for dynamics).
    pub base: f64,
    pub velocity: f64,
    pub accel: f64,
    pub velocity_prev: f64,
    pub accel_prev: f64,
}

impl Default for NodeDof {
    fn default() -> Self {
        Self {
            active: true,
            status: DofStatus::Open,
            equation: None,
            value: 0.0,
            prev: 0.0,
            base: 0.0,
            velocity: 0.0,
            accel: 0.0,
            velocity_prev: 0.0,
            accel_prev: 0.0,
        }
    }
}

/// A mesh node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Reference position.
    pub position: Point3,
    pub dofs: Vec<NodeDof>,
}

impl Node {
    /// Displacement, read from the first three DOF slots.
    pub fn displacement(&self) -> Vec3 {
        Vec3::new(self.dofs[0].value, self.dofs[1].value, self.dofs[2].value)
    }

    /// Nodal acceleration, read from the first three DOF slots.
    pub fn acceleration(&self) -> Vec3 {
        Vec3::new(self.dofs[0].accel, self.dofs[1].accel, self.dofs[2].accel)
    }

    /// Current (deformed) position.
    pub fn current_position(&self) -> Point3 {
        self.position + self.displacement()
    }

    /// Accept the trial state as converged.
    pub fn commit(&mut self) {
        for d in self.dofs.iter_mut() {
            d.prev = d.value;
            d.base = d.value;
            d.velocity_prev = d.velocity;
            d.accel_prev = d.accel;
        }
    }

    /// Discard the trial state.
    pub fn rollback(&mut self) {
        for d in self.dofs.iter_mut() {
            d.value = d.prev;
            d.base = d.prev;
            d.velocity = d.velocity_prev;
            d.accel = d.accel_prev;
        }
    }
}

/// Finite element mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Number of DOF slots per node.
    dofs_per_node: usize,
    pub nodes: Vec<Node>,
}

impl Mesh {
    /// Create a new empty mesh whose nodes carry `dofs_per_node` slots.
    pub fn new(dofs_per_node: usize) -> Self {
        Self {
            dofs_per_node,
            nodes: Vec::new(),
        }
    }

    /// Add a node to the mesh, returning its index.
    pub fn add_node(&mut self, point: Point3) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            position: point,
            dofs: vec![NodeDof::default(); self.dofs_per_node],
        });
        idx
    }

    /// Add multiple nodes at once.
    pub fn add_nodes(&mut self, points: impl IntoIterator<Item = Point3>) {
        for p in points {
            self.add_node(p);
        }
    }

    /// Number of nodes in the mesh.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    /// Check that every index in `nodes` refers to an existing node.
    pub fn validate_nodes(&self, nodes: &[usize]) -> Result<()> {
        for &node_idx in nodes {
            if node_idx >= self.nodes.len() {
                return Err(Error::Mesh(format!(
                    "Node index {} out of bounds (mesh has {} nodes)",
                    node_idx,
                    self.nodes.len()
                )));
            }
        }
        Ok(())
    }

    /// Reference coordinates of the given nodes.
    pub fn coords(&self, nodes: &[usize]) -> Vec<Point3> {
        nodes.iter().map(|&n| self.nodes[n].position).collect()
    }

    /// Equation ids of `dofs` on each node in `nodes`, node-major.
    pub fn lm(&self, nodes: &[usize], dofs: &[usize]) -> Vec<Option<usize>> {
        nodes
            .iter()
            .flat_map(|&n| dofs.iter().map(move |&d| self.nodes[n].dofs[d].equation))
            .collect()
    }

    /// Current values of `dofs` on each node in `nodes`, node-major.
    pub fn values(&self, nodes: &[usize], dofs: &[usize]) -> Vec<f64> {
        nodes
            .iter()
            .flat_map(|&n| dofs.iter().map(move |&d| self.nodes[n].dofs[d].value))
            .collect()
    }

    /// Bounding box (min, max) of the reference configuration.
    pub fn bounding_box(&self) -> Option<(Point3, Point3)> {
        let first = self.nodes.first()?.position;
        Some(self.nodes.iter().fold((first, first), |(lo, hi), n| {
            (lo.inf(&n.position), hi.sup(&n.position))
        }))
    }

    pub fn commit(&mut self) {
        self.nodes.iter_mut().for_each(Node::commit);
    }

    pub fn rollback(&mut self) {
        self.nodes.iter_mut().for_each(Node::rollback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tet_mesh() -> Mesh {
        let mut mesh = Mesh::new(3);
        mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        mesh
    }

    #[test]
    fn test_connectivity_validation() {
        assert!(ElementConnectivity::new(ElementType::Tet4, vec![0, 1, 2, 3]).is_ok());
        let err = ElementConnectivity::new(ElementType::Hex8, vec![0, 1, 2]);
        assert!(matches!(err, Err(Error::Mesh(_))));
    }

    #[test]
    fn test_validate_nodes() {
        let mesh = tet_mesh();
        assert!(mesh.validate_nodes(&[0, 3]).is_ok());
        assert!(mesh.validate_nodes(&[4]).is_err());
    }

    #[test]
    fn test_commit_and_rollback() {
        let mut mesh = tet_mesh();
        mesh.nodes[1].dofs[0].value = 0.5;
        mesh.commit();
        mesh.nodes[1].dofs[0].value = 0.9;
        mesh.nodes[1].dofs[0].velocity = 2.0;
        mesh.rollback();
        assert_eq!(mesh.nodes[1].dofs[0].value, 0.5);
        assert_eq!(mesh.nodes[1].dofs[0].velocity, 0.0);
        assert_eq!(mesh.nodes[1].current_position(), Point3::new(1.5, 0.0, 0.0));
    }

    #[test]
    fn test_lm_node_major() {
        let mut mesh = tet_mesh();
        mesh.nodes[2].dofs[1].equation = Some(7);
        let lm = mesh.lm(&[2, 0], &[0, 1]);
        assert_eq!(lm, vec![None, Some(7), None, None]);
    }

    #[test]
    fn test_bounding_box() {
        let (lo, hi) = tet_mesh().bounding_box().unwrap();
        assert_eq!(lo, Point3::zeros());
        assert_eq!(hi, Point3::new(1.0, 1.0, 1.0));
    }
}
