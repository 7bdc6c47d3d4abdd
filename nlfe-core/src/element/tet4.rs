//! 4-node tetrahedron (Tet4).
//!
//! Linear shape functions in the natural coordinates (r, s, t) of the unit
//! tetrahedron:
//! ```text
//! N_0 = 1 - r - s - t,  N_1 = r,  N_2 = s,  N_3 = t
//! ```
//! Gradients are constant, so strain is constant within the element.
//! Integrated with the 4-point rule so the consistent mass matrix is exact.
//!
//! # Limitations
//!
//! - Volumetric locking in nearly incompressible materials (ν → 0.5)
//! - Low accuracy - requires fine meshes

use crate::element::gauss::{gauss_tet, GaussPoint};
use crate::element::Shape;
use crate::types::Vec3;

/// 4-node tetrahedral element (constant strain tetrahedron).
#[derive(Debug, Clone, Copy, Default)]
pub struct Tet4;

impl Shape for Tet4 {
    fn n_nodes(&self) -> usize {
        4
    }

    fn values(&self, xi: &[f64; 3]) -> Vec<f64> {
        let [r, s, t] = *xi;
        vec![1.0 - r - s - t, r, s, t]
    }

    fn derivatives(&self, _xi: &[f64; 3]) -> Vec<Vec3> {
        vec![
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ]
    }

    fn quadrature(&self) -> Vec<GaussPoint> {
        gauss_tet(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nodal_interpolation() {
        let corners = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        for (i, c) in corners.iter().enumerate() {
            let n = Tet4.values(c);
            for (j, v) in n.iter().enumerate() {
                assert_relative_eq!(*v, if i == j { 1.0 } else { 0.0 });
            }
        }
    }
}
