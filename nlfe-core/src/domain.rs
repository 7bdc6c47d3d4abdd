//! Domain assembly layer.
//!
//! A domain owns a set of elements of one physics type together with their
//! material points. Each domain declares which operations it supports
//! through [`Capabilities`]; the caller skips unsupported ones and every
//! default trait method is an empty contribution, never an error.
//!
//! Element loops compute local vectors and matrices in parallel with rayon
//! and scatter them sequentially in element order, so floating-point
//! summation order does not depend on thread scheduling.

use std::fmt::Debug;

use nalgebra::{DMatrix, Matrix3};
use serde::{Deserialize, Serialize};

use crate::assembly::{ElementMatrix, GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::element::spatial_gradients;
use crate::error::{Error, Result};
use crate::material::Material;
use crate::mesh::{ElementConnectivity, ElementType, Mesh};
use crate::types::{Point3, TimeInfo, Vec3};

pub mod biphasic;
pub mod solid;

pub use biphasic::BiphasicDomain;
pub use solid::ElasticSolidDomain;

/// Operations a domain contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub internal_forces: bool,
    pub stiffness: bool,
    pub body_force: bool,
    pub inertial_forces: bool,
    pub mass_matrix: bool,
    pub update: bool,
    /// The stiffness is not symmetric and needs full storage.
    pub nonsymmetric: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            internal_forces: true,
            stiffness: true,
            body_force: true,
            inertial_forces: true,
            mass_matrix: true,
            update: true,
            nonsymmetric: false,
        }
    }
}

/// Strain measure used by solid formulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Kinematics {
    #[default]
    SmallStrain,
    /// Spatial (updated Lagrangian) formulation with geometric stiffness.
    Finite,
}

/// Read-only data shared by every domain call in one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DomainContext<'a> {
    pub mesh: &'a Mesh,
    pub materials: &'a [Box<dyn Material>],
    pub time: &'a TimeInfo,
}

impl<'a> DomainContext<'a> {
    pub fn material(&self, index: usize) -> Result<&'a dyn Material> {
        self.materials
            .get(index)
            .map(|m| m.as_ref())
            .ok_or_else(|| Error::Init(format!("material {} does not exist", index)))
    }
}

/// Physics domain interface.
pub trait Domain: Send + Sync + Debug {
    /// Registry tag.
    fn type_tag(&self) -> &'static str;

    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Index of the domain material.
    fn material(&self) -> usize;

    /// Validate connectivity and material references.
    fn init(&mut self, mesh: &Mesh, materials: &[Box<dyn Material>]) -> Result<()>;

    /// Create and initialize the material points.
    fn activate(&mut self, mesh: &Mesh, materials: &[Box<dyn Material>]) -> Result<()>;

    /// Register element couplings in the static profile.
    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder);

    fn internal_forces(&self, _ctx: &DomainContext, _r: &mut GlobalVector) -> Result<()> {
        Ok(())
    }

    /// Steady-state internal forces, without storage terms.
    fn internal_forces_ss(&self, ctx: &DomainContext, r: &mut GlobalVector) -> Result<()> {
        self.internal_forces(ctx, r)
    }

    fn stiffness_matrix(&self, _ctx: &DomainContext, _k: &mut GlobalMatrix) -> Result<()> {
        Ok(())
    }

    /// Steady-state stiffness, without storage terms.
    fn stiffness_matrix_ss(&self, ctx: &DomainContext, k: &mut GlobalMatrix) -> Result<()> {
        self.stiffness_matrix(ctx, k)
    }

    /// External force of a body load with acceleration `b`.
    fn body_force(&self, _ctx: &DomainContext, _b: &Vec3, _r: &mut GlobalVector) -> Result<()> {
        Ok(())
    }

    fn inertial_forces(&self, _ctx: &DomainContext, _r: &mut GlobalVector) -> Result<()> {
        Ok(())
    }

    /// Add `scale * M` to the stiffness.
    fn mass_matrix(&self, _ctx: &DomainContext, _scale: f64, _k: &mut GlobalMatrix) -> Result<()> {
        Ok(())
    }

    /// Refresh material points from the trial solution.
    fn update(&mut self, _ctx: &DomainContext) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) {}

    fn rollback(&mut self) {}

    /// Complete domain payload for a full dump.
    fn save(&self) -> Result<Vec<u8>>;

    /// Material point payload for a shallow dump.
    fn save_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Kinematic quantities at one integration point.
#[derive(Debug, Clone)]
pub(crate) struct PointKinematics {
    /// Gradients used by the formulation (spatial for finite strain).
    pub grad: Vec<Vec3>,
    /// Reference volume weight (w · det J0).
    pub dv0: f64,
    pub f: Matrix3<f64>,
    pub j: f64,
}

/// Evaluate kinematics for element `element` at one integration point.
pub(crate) fn point_kinematics(
    element: usize,
    x0: &[Point3],
    u: &[Vec3],
    dn: &[Vec3],
    weight: f64,
    kinematics: Kinematics,
) -> Result<PointKinematics> {
    let (grad0, det0) = spatial_gradients(x0, dn)
        .ok_or(Error::NegativeJacobian { element, jacobian: 0.0 })?;
    if det0 <= 0.0 {
        return Err(Error::NegativeJacobian { element, jacobian: det0 });
    }
    let f = u
        .iter()
        .zip(&grad0)
        .fold(Matrix3::identity(), |f, (ua, ga)| f + ua * ga.transpose());
    let j = f.determinant();
    let grad = match kinematics {
        Kinematics::SmallStrain => grad0,
        Kinematics::Finite => {
            if j <= 0.0 {
                return Err(Error::NegativeJacobian { element, jacobian: j });
            }
            let fit = f
                .try_inverse()
                .ok_or(Error::NegativeJacobian { element, jacobian: j })?
                .transpose();
            grad0.iter().map(|g| fit * g).collect()
        }
    };
    Ok(PointKinematics {
        grad,
        dv0: weight * det0,
        f,
        j,
    })
}

/// Validate element node references and types.
pub(crate) fn check_elements(
    name: &str,
    mesh: &Mesh,
    elements: &[ElementConnectivity],
) -> Result<()> {
    for (e, conn) in elements.iter().enumerate() {
        if !matches!(conn.element_type, ElementType::Tet4 | ElementType::Hex8) {
            return Err(Error::Init(format!(
                "domain \"{}\": element {} has unsupported type {:?}",
                name, e, conn.element_type
            )));
        }
        mesh.validate_nodes(&conn.nodes)?;
    }
    Ok(())
}

/// Scatter element matrices in order.
pub(crate) fn scatter_matrices(k: &mut GlobalMatrix, matrices: Vec<ElementMatrix>) {
    for em in &matrices {
        k.assemble_element(em);
    }
}

/// Scatter element vectors in order.
pub(crate) fn scatter_vectors(r: &mut GlobalVector, vectors: Vec<(Vec<Option<usize>>, Vec<f64>)>) {
    for (lm, fe) in &vectors {
        r.assemble(lm, fe);
    }
}

/// Consistent mass block ρ N_a N_b (one scalar per node pair).
pub(crate) fn scalar_mass(n: &[f64], rho_dv: f64) -> DMatrix<f64> {
    let k = n.len();
    DMatrix::from_fn(k, k, |a, b| rho_dv * n[a] * n[b])
}

/// Node displacements of an element.
pub(crate) fn element_displacements(mesh: &Mesh, nodes: &[usize]) -> Vec<Vec3> {
    nodes.iter().map(|&n| mesh.nodes[n].displacement()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::integration_rule;
    use approx::assert_relative_eq;

    fn unit_tet() -> Vec<Point3> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_stretch_deformation_gradient() {
        let x0 = unit_tet();
        let u: Vec<Vec3> = x0.iter().map(|x| Vec3::new(0.1 * x.x, 0.0, 0.0)).collect();
        let p = &integration_rule(ElementType::Tet4).points[0];
        let k = point_kinematics(0, &x0, &u, &p.dn, p.weight, Kinematics::Finite).unwrap();
        assert_relative_eq!(k.f[(0, 0)], 1.1, epsilon = 1e-14);
        assert_relative_eq!(k.j, 1.1, epsilon = 1e-14);
        // spatial gradient of N_1 = X / 1.1
        assert_relative_eq!(k.grad[1].x, 1.0 / 1.1, epsilon = 1e-14);
    }

    #[test]
    fn test_inverted_point_reports_element() {
        let x0 = unit_tet();
        let u: Vec<Vec3> = x0.iter().map(|x| Vec3::new(-2.0 * x.x, 0.0, 0.0)).collect();
        let p = &integration_rule(ElementType::Tet4).points[0];
        let err = point_kinematics(7, &x0, &u, &p.dn, p.weight, Kinematics::Finite).unwrap_err();
        assert!(matches!(err, Error::NegativeJacobian { element: 7, .. }));
        assert!(err.is_numerical());
        // small strain does not check the current configuration
        assert!(point_kinematics(7, &x0, &u, &p.dn, p.weight, Kinematics::SmallStrain).is_ok());
    }

    #[test]
    fn test_default_capabilities_are_empty() {
        let c = Capabilities::default();
        assert!(!c.stiffness && !c.mass_matrix);
        assert!(Capabilities::all().update);
    }
}
