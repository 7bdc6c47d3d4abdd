//! Core data types shared by materials, domains and the solver.
//!
//! - Geometric primitives (points, vectors)
//! - Stress and strain tensors in Voigt notation
//! - Time information passed down the assembly chain

use nalgebra::{Matrix3, Matrix6, SMatrix, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (displacement, force, etc.).
pub type Vec3 = Vector3<f64>;

/// Strain-displacement block of one node, shape (6, 3).
pub type NodalB = SMatrix<f64, 6, 3>;

/// Symmetric stress tensor in Voigt notation.
///
/// Components are ordered as: [σ_xx, σ_yy, σ_zz, τ_xy, τ_yz, τ_xz]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressTensor(pub Vector6<f64>);

impl StressTensor {
    /// Create a new stress tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero stress state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Build from a symmetric 3x3 matrix (upper triangle is read).
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self::new([m[(0, 0)], m[(1, 1)], m[(2, 2)], m[(0, 1)], m[(1, 2)], m[(0, 2)]])
    }

    /// Extract the full 3x3 symmetric stress matrix.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let s = &self.0;
        Matrix3::new(
            s[0], s[3], s[5],
            s[3], s[1], s[4],
            s[5], s[4], s[2],
        )
    }
}

impl Default for StressTensor {
    fn default() -> Self {
        Self::zero()
    }
}

/// Symmetric strain tensor in Voigt notation.
///
/// Components are ordered as: [ε_xx, ε_yy, ε_zz, γ_xy, γ_yz, γ_xz]
/// where γ = 2ε for engineering shear strain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainTensor(pub Vector6<f64>);

impl StrainTensor {
    /// Create a new strain tensor from Voigt components.
    pub fn new(components: [f64; 6]) -> Self {
        Self(Vector6::from_row_slice(&components))
    }

    /// Zero strain state.
    pub fn zero() -> Self {
        Self(Vector6::zeros())
    }

    /// Small strain from a displacement gradient H = ∂u/∂X.
    pub fn from_displacement_gradient(h: &Matrix3<f64>) -> Self {
        Self::new([
            h[(0, 0)],
            h[(1, 1)],
            h[(2, 2)],
            h[(0, 1)] + h[(1, 0)],
            h[(1, 2)] + h[(2, 1)],
            h[(0, 2)] + h[(2, 0)],
        ])
    }

    /// Compute volumetric strain.
    pub fn volumetric(&self) -> f64 {
        self.0[0] + self.0[1] + self.0[2]
    }

    /// Extract the full 3x3 symmetric strain matrix.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let e = &self.0;
        // off-diagonal terms are γ/2 = ε
        Matrix3::new(
            e[0],       e[3] / 2.0, e[5] / 2.0,
            e[3] / 2.0, e[1],       e[4] / 2.0,
            e[5] / 2.0, e[4] / 2.0, e[2],
        )
    }
}

impl Default for StrainTensor {
    fn default() -> Self {
        Self::zero()
    }
}

/// Constitutive matrix (material stiffness) in Voigt notation.
///
/// Maps strain tensor to stress tensor: σ = D * ε. For finite strain
/// materials this is the spatial elasticity tensor in the same layout.
pub type ConstitutiveMatrix = Matrix6<f64>;

/// Strain-displacement block for one node given its shape function gradient.
pub fn nodal_b(g: &Vec3) -> NodalB {
    let mut b = NodalB::zeros();
    b[(0, 0)] = g[0];
    b[(1, 1)] = g[1];
    b[(2, 2)] = g[2];
    b[(3, 0)] = g[1];
    b[(3, 1)] = g[0];
    b[(4, 1)] = g[2];
    b[(4, 2)] = g[1];
    b[(5, 0)] = g[2];
    b[(5, 2)] = g[0];
    b
}

/// Voigt identity used for volumetric coupling terms (m = [1 1 1 0 0 0]).
pub fn voigt_identity() -> Vector6<f64> {
    Vector6::new(1.0, 1.0, 1.0, 0.0, 0.0, 0.0)
}

/// Time information for the current evaluation point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Time at the end of the current increment.
    pub current_time: f64,
    /// Size of the current increment.
    pub time_increment: f64,
    /// Newmark displacement parameter.
    pub beta: f64,
    /// Newmark velocity parameter.
    pub gamma: f64,
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            time_increment: 0.0,
            beta: 0.25,
            gamma: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stress_matrix_round_trip() {
        let stress = StressTensor::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let back = StressTensor::from_matrix(&stress.to_matrix());
        assert_eq!(stress, back);
    }

    #[test]
    fn test_small_strain_from_gradient() {
        let h = Matrix3::new(0.01, 0.002, 0.0, 0.004, -0.02, 0.0, 0.0, 0.0, 0.0);
        let e = StrainTensor::from_displacement_gradient(&h);
        assert_relative_eq!(e.0[3], 0.006, epsilon = 1e-15);
        assert_relative_eq!(e.volumetric(), -0.01, epsilon = 1e-15);
    }

    #[test]
    fn test_nodal_b_shear_rows() {
        let b = nodal_b(&Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(b[(3, 0)], 2.0);
        assert_eq!(b[(3, 1)], 1.0);
        assert_eq!(b[(5, 2)], 1.0);
    }
}
