//! 8-node hexahedron (Hex8).
//!
//! Trilinear shape functions in natural coordinates (ξ, η, ζ) ∈ [-1, 1]³:
//! ```text
//! N_i = (1 + ξ_i*ξ)(1 + η_i*η)(1 + ζ_i*ζ) / 8
//! ```
//! where (ξ_i, η_i, ζ_i) are ±1 for node i.
//!
//! # Node Numbering
//!
//! ```text
//!        7-------6
//!       /|      /|
//!      / |     / |
//!     4-------5  |
//!     |  3----|--2
//!     | /     | /
//!     |/      |/
//!     0-------1
//! ```
//!
//! Integrated with the full 2×2×2 rule.

use crate::element::gauss::{gauss_hex, GaussPoint};
use crate::element::Shape;
use crate::types::Vec3;

const XI: [f64; 8] = [-1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0];
const ETA: [f64; 8] = [-1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
const ZETA: [f64; 8] = [-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0];

/// 8-node hexahedral element (trilinear brick).
#[derive(Debug, Clone, Copy, Default)]
pub struct Hex8;

impl Shape for Hex8 {
    fn n_nodes(&self) -> usize {
        8
    }

    fn values(&self, xi: &[f64; 3]) -> Vec<f64> {
        (0..8)
            .map(|i| 0.125 * (1.0 + XI[i] * xi[0]) * (1.0 + ETA[i] * xi[1]) * (1.0 + ZETA[i] * xi[2]))
            .collect()
    }

    fn derivatives(&self, xi: &[f64; 3]) -> Vec<Vec3> {
        (0..8)
            .map(|i| {
                let a = 1.0 + XI[i] * xi[0];
                let b = 1.0 + ETA[i] * xi[1];
                let c = 1.0 + ZETA[i] * xi[2];
                0.125 * Vec3::new(XI[i] * b * c, a * ETA[i] * c, a * b * ZETA[i])
            })
            .collect()
    }

    fn quadrature(&self) -> Vec<GaussPoint> {
        gauss_hex(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shape_functions_at_nodes() {
        for i in 0..8 {
            let n = Hex8.values(&[XI[i], ETA[i], ZETA[i]]);
            for (j, v) in n.iter().enumerate() {
                assert_relative_eq!(*v, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_derivatives_at_center() {
        let dn = Hex8.derivatives(&[0.0; 3]);
        assert_relative_eq!(dn[6], Vec3::new(0.125, 0.125, 0.125), epsilon = 1e-14);
        assert_relative_eq!(dn[0], Vec3::new(-0.125, -0.125, -0.125), epsilon = 1e-14);
    }
}
