//! Per-integration-point state.
//!
//! A [`MaterialPoint`] is owned by the domain that created it. Every Newton
//! iteration refreshes `current`; `converged` only changes on
//! [`MaterialPoint::commit`], so a failed step restores the last converged
//! state with [`MaterialPoint::rollback`].

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::types::{Point3, StrainTensor, StressTensor, Vec3};

/// Physics state at an integration point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointState {
    /// Deformation gradient.
    pub f: Matrix3<f64>,
    /// det(F).
    pub j: f64,
    /// Small-strain tensor.
    pub strain: StrainTensor,
    /// Cauchy stress (effective stress for biphasic points).
    pub stress: StressTensor,
    /// Interpolated fluid pressure.
    pub pressure: f64,
    /// Fluid pressure gradient.
    pub pressure_gradient: Vec3,
    /// Darcy flux.
    pub flux: Vec3,
    /// Material-specific internal variables.
    pub internal: Vec<f64>,
}

impl Default for PointState {
    fn default() -> Self {
        Self {
            f: Matrix3::identity(),
            j: 1.0,
            strain: StrainTensor::zero(),
            stress: StressTensor::zero(),
            pressure: 0.0,
            pressure_gradient: Vec3::zeros(),
            flux: Vec3::zeros(),
            internal: Vec::new(),
        }
    }
}

/// Material point with trial and converged state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialPoint {
    /// Reference position of the integration point.
    pub position: Point3,
    pub current: PointState,
    pub converged: PointState,
}

impl MaterialPoint {
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Accept the trial state.
    pub fn commit(&mut self) {
        self.converged.clone_from(&self.current);
    }

    /// Restore the last converged state.
    pub fn rollback(&mut self) {
        self.current.clone_from(&self.converged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_discards_trial_state() {
        let mut mp = MaterialPoint::new(Point3::zeros());
        mp.current.stress = StressTensor::new([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        mp.commit();
        mp.current.stress = StressTensor::new([5.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        mp.current.internal.push(3.0);
        mp.rollback();
        assert_eq!(mp.current.stress.0[0], 1.0);
        assert!(mp.current.internal.is_empty());
    }

    #[test]
    fn test_copy_preserves_history() {
        let mut mp = MaterialPoint::new(Point3::new(1.0, 2.0, 3.0));
        mp.current.internal = vec![0.1, 0.2];
        mp.commit();
        let copy = mp.clone();
        assert_eq!(copy, mp);
        assert_eq!(copy.converged.internal, vec![0.1, 0.2]);
    }
}
