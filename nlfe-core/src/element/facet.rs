//! Surface facets and edges used by boundary loads and contact.
//!
//! - [`Tri3`]: N = (1 - r - s, r, s), 3-point rule
//! - [`Quad4`]: bilinear, 2×2 rule
//! - [`Line2`]: N = ((1 - ξ)/2, (1 + ξ)/2), 2-point rule

use crate::element::gauss::{gauss_line, gauss_quad, gauss_tri, GaussPoint};
use crate::element::Shape;
use crate::types::{Point3, Vec3};

/// 3-node triangular facet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tri3;

impl Shape for Tri3 {
    fn n_nodes(&self) -> usize {
        3
    }

    fn values(&self, xi: &[f64; 3]) -> Vec<f64> {
        vec![1.0 - xi[0] - xi[1], xi[0], xi[1]]
    }

    fn derivatives(&self, _xi: &[f64; 3]) -> Vec<Vec3> {
        vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    fn quadrature(&self) -> Vec<GaussPoint> {
        gauss_tri(3)
    }
}

const QX: [f64; 4] = [-1.0, 1.0, 1.0, -1.0];
const QY: [f64; 4] = [-1.0, -1.0, 1.0, 1.0];

/// 4-node quadrilateral facet.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quad4;

impl Shape for Quad4 {
    fn n_nodes(&self) -> usize {
        4
    }

    fn values(&self, xi: &[f64; 3]) -> Vec<f64> {
        (0..4)
            .map(|i| 0.25 * (1.0 + QX[i] * xi[0]) * (1.0 + QY[i] * xi[1]))
            .collect()
    }

    fn derivatives(&self, xi: &[f64; 3]) -> Vec<Vec3> {
        (0..4)
            .map(|i| {
                Vec3::new(
                    0.25 * QX[i] * (1.0 + QY[i] * xi[1]),
                    0.25 * (1.0 + QX[i] * xi[0]) * QY[i],
                    0.0,
                )
            })
            .collect()
    }

    fn quadrature(&self) -> Vec<GaussPoint> {
        gauss_quad(2)
    }
}

/// 2-node edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct Line2;

impl Shape for Line2 {
    fn n_nodes(&self) -> usize {
        2
    }

    fn values(&self, xi: &[f64; 3]) -> Vec<f64> {
        vec![0.5 * (1.0 - xi[0]), 0.5 * (1.0 + xi[0])]
    }

    fn derivatives(&self, _xi: &[f64; 3]) -> Vec<Vec3> {
        vec![Vec3::new(-0.5, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0)]
    }

    fn quadrature(&self) -> Vec<GaussPoint> {
        gauss_line(2)
    }
}

/// Area-weighted facet normal g_ξ × g_η at a point.
///
/// Its length is the surface Jacobian; its direction follows the
/// right-hand rule over the facet node ordering.
pub fn facet_normal(coords: &[Point3], dn: &[Vec3]) -> Vec3 {
    let (mut g1, mut g2) = (Vec3::zeros(), Vec3::zeros());
    for (x, d) in coords.iter().zip(dn) {
        g1 += x * d[0];
        g2 += x * d[1];
    }
    g1.cross(&g2)
}

/// Edge tangent dx/dξ; its length is the line Jacobian.
pub fn edge_tangent(coords: &[Point3], dn: &[Vec3]) -> Vec3 {
    coords.iter().zip(dn).fold(Vec3::zeros(), |t, (x, d)| t + x * d[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::IntegrationRule;
    use crate::mesh::ElementType;
    use approx::assert_relative_eq;

    #[test]
    fn test_quad_area_and_normal() {
        let coords = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 3.0, 0.0),
            Point3::new(0.0, 3.0, 0.0),
        ];
        let rule = IntegrationRule::new(ElementType::Quad4);
        let area: Vec3 = rule
            .points
            .iter()
            .map(|p| facet_normal(&coords, &p.dn) * p.weight)
            .fold(Vec3::zeros(), |a, b| a + b);
        assert_relative_eq!(area, Vec3::new(0.0, 0.0, 6.0), epsilon = 1e-12);
    }

    #[test]
    fn test_tri_area() {
        let coords = [
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let rule = IntegrationRule::new(ElementType::Tri3);
        let area: f64 = rule
            .points
            .iter()
            .map(|p| facet_normal(&coords, &p.dn).norm() * p.weight)
            .sum();
        assert_relative_eq!(area, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_edge_length() {
        let coords = [Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 0.0)];
        let rule = IntegrationRule::new(ElementType::Line2);
        let len: f64 = rule
            .points
            .iter()
            .map(|p| edge_tangent(&coords, &p.dn).norm() * p.weight)
            .sum();
        assert_relative_eq!(len, 5.0, epsilon = 1e-12);
    }
}
