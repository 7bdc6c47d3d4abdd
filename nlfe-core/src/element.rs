//! Shape functions and integration rules.
//!
//! Domains and surface loads consume elements as a service: for an
//! [`ElementType`] they get a precomputed [`IntegrationRule`] (weights,
//! shape values and natural derivatives at each Gauss point) and map it
//! to physical gradients with [`spatial_gradients`].
//!
//! # Submodules
//!
//! - [`gauss`] - Gauss quadrature rules
//! - [`tet4`], [`hex8`] - solid shapes
//! - [`facet`] - Tri3 / Quad4 facets and Line2 edges

use crate::mesh::ElementType;
use crate::types::{Point3, Vec3};
use nalgebra::Matrix3;
use std::sync::OnceLock;

pub mod facet;
pub mod gauss;
pub mod hex8;
pub mod tet4;

pub use facet::{Line2, Quad4, Tri3};
pub use gauss::GaussPoint;
pub use hex8::Hex8;
pub use tet4::Tet4;

/// Shape function family of one element type.
///
/// Implementations are stateless and thread-safe so integration loops can
/// run in parallel.
pub trait Shape: Send + Sync {
    /// Number of nodes.
    fn n_nodes(&self) -> usize;

    /// Shape function values at natural coordinates.
    fn values(&self, xi: &[f64; 3]) -> Vec<f64>;

    /// Shape function derivatives with respect to the natural coordinates.
    /// Unused parametric directions are zero.
    fn derivatives(&self, xi: &[f64; 3]) -> Vec<Vec3>;

    /// Default quadrature rule.
    fn quadrature(&self) -> Vec<GaussPoint>;
}

/// Shape of an element type.
pub fn shape(element_type: ElementType) -> &'static dyn Shape {
    match element_type {
        ElementType::Tet4 => &Tet4,
        ElementType::Hex8 => &Hex8,
        ElementType::Tri3 => &Tri3,
        ElementType::Quad4 => &Quad4,
        ElementType::Line2 => &Line2,
    }
}

/// Shape data at one integration point.
#[derive(Debug, Clone)]
pub struct IntegrationPoint {
    pub weight: f64,
    pub n: Vec<f64>,
    pub dn: Vec<Vec3>,
}

/// Precomputed integration rule of an element type.
#[derive(Debug, Clone)]
pub struct IntegrationRule {
    pub points: Vec<IntegrationPoint>,
}

impl IntegrationRule {
    pub fn new(element_type: ElementType) -> Self {
        let s = shape(element_type);
        let points = s
            .quadrature()
            .into_iter()
            .map(|gp| IntegrationPoint {
                weight: gp.weight,
                n: s.values(&gp.coords),
                dn: s.derivatives(&gp.coords),
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Shared integration rule of an element type, built on first use.
pub fn integration_rule(element_type: ElementType) -> &'static IntegrationRule {
    static TET4: OnceLock<IntegrationRule> = OnceLock::new();
    static HEX8: OnceLock<IntegrationRule> = OnceLock::new();
    static TRI3: OnceLock<IntegrationRule> = OnceLock::new();
    static QUAD4: OnceLock<IntegrationRule> = OnceLock::new();
    static LINE2: OnceLock<IntegrationRule> = OnceLock::new();
    let cell = match element_type {
        ElementType::Tet4 => &TET4,
        ElementType::Hex8 => &HEX8,
        ElementType::Tri3 => &TRI3,
        ElementType::Quad4 => &QUAD4,
        ElementType::Line2 => &LINE2,
    };
    cell.get_or_init(|| IntegrationRule::new(element_type))
}

/// Jacobian J[r][c] = Σ ∂N_i/∂ξ_r · x_ic of a solid element.
pub fn jacobian(coords: &[Point3], dn: &[Vec3]) -> Matrix3<f64> {
    coords
        .iter()
        .zip(dn)
        .fold(Matrix3::zeros(), |j, (x, d)| j + d * x.transpose())
}

/// Physical shape gradients and Jacobian determinant.
///
/// Returns `None` when the Jacobian is singular. A negative determinant is
/// returned as-is; callers decide whether it is an inverted element.
pub fn spatial_gradients(coords: &[Point3], dn: &[Vec3]) -> Option<(Vec<Vec3>, f64)> {
    let j = jacobian(coords, dn);
    let det = j.determinant();
    if det.abs() < f64::EPSILON * 1e-3 {
        return None;
    }
    let inv = j.try_inverse()?;
    Some((dn.iter().map(|d| inv * d).collect(), det))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_partition_of_unity() {
        for et in [ElementType::Tet4, ElementType::Hex8, ElementType::Tri3, ElementType::Quad4] {
            let rule = IntegrationRule::new(et);
            for p in &rule.points {
                assert_relative_eq!(p.n.iter().sum::<f64>(), 1.0, epsilon = 1e-14);
                let dsum = p.dn.iter().fold(Vec3::zeros(), |a, d| a + d);
                assert_relative_eq!(dsum.norm(), 0.0, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_unit_cube_volume() {
        let coords = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let rule = IntegrationRule::new(ElementType::Hex8);
        let volume: f64 = rule
            .points
            .iter()
            .map(|p| p.weight * spatial_gradients(&coords, &p.dn).unwrap().1)
            .sum();
        assert_relative_eq!(volume, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradients_reproduce_linear_field() {
        let coords = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 3.0),
        ];
        // f = x + 2y - z
        let f: Vec<f64> = coords.iter().map(|c| c.x + 2.0 * c.y - c.z).collect();
        let rule = IntegrationRule::new(ElementType::Tet4);
        let (g, det) = spatial_gradients(&coords, &rule.points[0].dn).unwrap();
        let grad = g.iter().zip(&f).fold(Vec3::zeros(), |a, (gi, fi)| a + gi * *fi);
        assert_relative_eq!(grad, Vec3::new(1.0, 2.0, -1.0), epsilon = 1e-12);
        assert_relative_eq!(det, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_element_has_negative_determinant() {
        let coords = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let (_, det) = spatial_gradients(&coords, &Tet4.derivatives(&[0.25; 3])).unwrap();
        assert!(det < 0.0);
    }
}
