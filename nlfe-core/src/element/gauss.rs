//! Gauss quadrature rules for numerical integration.
//!
//! All rules return points in the natural coordinates of the reference
//! cell used by the matching shape functions:
//! - line: ξ ∈ [-1, 1]
//! - triangle / tetrahedron: (r, s[, t]) with r, s, t ≥ 0 and r + s + t ≤ 1
//! - quadrilateral / hexahedron: ξ, η, ζ ∈ [-1, 1]
//!
//! ```
//! use nlfe_core::element::gauss::gauss_hex;
//!
//! let total: f64 = gauss_hex(2).iter().map(|gp| gp.weight).sum();
//! assert!((total - 8.0).abs() < 1e-14);
//! ```

/// A Gauss quadrature point with natural coordinates and weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPoint {
    /// Natural coordinates; unused trailing entries are zero.
    pub coords: [f64; 3],
    /// Integration weight.
    pub weight: f64,
}

impl GaussPoint {
    pub fn new(coords: [f64; 3], weight: f64) -> Self {
        Self { coords, weight }
    }
}

/// 1D Gauss-Legendre points and weights on [-1, 1].
///
/// # Panics
///
/// Panics if `n` is not in 1..=3.
pub fn gauss_1d(n: usize) -> Vec<(f64, f64)> {
    match n {
        1 => vec![(0.0, 2.0)],
        2 => {
            let p = 1.0 / 3.0_f64.sqrt();
            vec![(-p, 1.0), (p, 1.0)]
        }
        3 => {
            let p = (3.0 / 5.0_f64).sqrt();
            vec![(-p, 5.0 / 9.0), (0.0, 8.0 / 9.0), (p, 5.0 / 9.0)]
        }
        _ => panic!("gauss_1d: n must be 1, 2, or 3, got {}", n),
    }
}

/// Line rule as [`GaussPoint`]s.
pub fn gauss_line(n: usize) -> Vec<GaussPoint> {
    gauss_1d(n)
        .into_iter()
        .map(|(xi, w)| GaussPoint::new([xi, 0.0, 0.0], w))
        .collect()
}

/// Tetrahedral rule; weights sum to the reference volume 1/6.
///
/// # Panics
///
/// Panics if `n` is not 1 or 4.
pub fn gauss_tet(n: usize) -> Vec<GaussPoint> {
    match n {
        1 => vec![GaussPoint::new([0.25, 0.25, 0.25], 1.0 / 6.0)],
        4 => {
            let sqrt5 = 5.0_f64.sqrt();
            let a = (5.0 + 3.0 * sqrt5) / 20.0;
            let b = (5.0 - sqrt5) / 20.0;
            let w = 1.0 / 24.0;
            vec![
                GaussPoint::new([b, b, b], w),
                GaussPoint::new([a, b, b], w),
                GaussPoint::new([b, a, b], w),
                GaussPoint::new([b, b, a], w),
            ]
        }
        _ => panic!("gauss_tet: n must be 1 or 4, got {}", n),
    }
}

/// Tensor-product hexahedral rule with `n` points per direction.
pub fn gauss_hex(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(n * n * n);
    for &(zeta, wz) in &rule {
        for &(eta, wy) in &rule {
            for &(xi, wx) in &rule {
                points.push(GaussPoint::new([xi, eta, zeta], wx * wy * wz));
            }
        }
    }
    points
}

/// Triangle rule; weights sum to the reference area 1/2.
///
/// # Panics
///
/// Panics if `n` is not 1 or 3.
pub fn gauss_tri(n: usize) -> Vec<GaussPoint> {
    match n {
        1 => vec![GaussPoint::new([1.0 / 3.0, 1.0 / 3.0, 0.0], 0.5)],
        3 => {
            let w = 1.0 / 6.0;
            vec![
                GaussPoint::new([1.0 / 6.0, 1.0 / 6.0, 0.0], w),
                GaussPoint::new([2.0 / 3.0, 1.0 / 6.0, 0.0], w),
                GaussPoint::new([1.0 / 6.0, 2.0 / 3.0, 0.0], w),
            ]
        }
        _ => panic!("gauss_tri: n must be 1 or 3, got {}", n),
    }
}

/// Tensor-product quadrilateral rule with `n` points per direction.
pub fn gauss_quad(n: usize) -> Vec<GaussPoint> {
    let rule = gauss_1d(n);
    let mut points = Vec::with_capacity(n * n);
    for &(eta, wy) in &rule {
        for &(xi, wx) in &rule {
            points.push(GaussPoint::new([xi, eta, 0.0], wx * wy));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gauss_1d_integrates_cubic() {
        // ∫ x³ + x² dx over [-1, 1] = 2/3
        let sum: f64 = gauss_1d(2).iter().map(|&(x, w)| w * (x.powi(3) + x * x)).sum();
        assert_relative_eq!(sum, 2.0 / 3.0, epsilon = 1e-14);
    }

    #[test]
    fn test_reference_measures() {
        let tet: f64 = gauss_tet(4).iter().map(|g| g.weight).sum();
        let tri: f64 = gauss_tri(3).iter().map(|g| g.weight).sum();
        let quad: f64 = gauss_quad(2).iter().map(|g| g.weight).sum();
        assert_relative_eq!(tet, 1.0 / 6.0, epsilon = 1e-14);
        assert_relative_eq!(tri, 0.5, epsilon = 1e-14);
        assert_relative_eq!(quad, 4.0, epsilon = 1e-14);
    }

    #[test]
    fn test_gauss_tet_integrates_linear() {
        // ∫ r dV over the reference tet = 1/24
        let sum: f64 = gauss_tet(4).iter().map(|g| g.weight * g.coords[0]).sum();
        assert_relative_eq!(sum, 1.0 / 24.0, epsilon = 1e-14);
    }

    #[test]
    fn test_gauss_hex_point_count() {
        assert_eq!(gauss_hex(1).len(), 1);
        assert_eq!(gauss_hex(2).len(), 8);
    }

    #[test]
    #[should_panic(expected = "gauss_tet")]
    fn test_gauss_tet_invalid_n() {
        gauss_tet(5);
    }
}
