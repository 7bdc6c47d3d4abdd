//! Material models.
//!
//! Domains consume materials through the [`Material`] trait: a stress and a
//! spatial tangent evaluated from a [`PointState`]. Three reference models
//! are provided:
//!
//! - [`LinearElastic`]: isotropic Hooke's law on the small strain
//! - [`NeoHookean`]: compressible neo-Hookean on the deformation gradient
//! - [`PoroElastic`]: linear elastic solid matrix with isotropic Darcy
//!   permeability, used by biphasic domains
//!
//! Materials are persisted as a type tag, a name and a flat parameter list;
//! [`crate::registry::Registry`] rebuilds them from that triple.

use std::fmt::Debug;

use nalgebra::{Matrix3, Matrix6};

use crate::error::{Error, Result};
use crate::material_point::{MaterialPoint, PointState};
use crate::types::{ConstitutiveMatrix, StressTensor};

/// Named scalar material parameters.
pub type Parameters = Vec<(String, f64)>;

/// Constitutive model interface.
pub trait Material: Send + Sync + Debug {
    /// Registry tag.
    fn type_tag(&self) -> &'static str;

    /// User-facing name.
    fn name(&self) -> &str;

    /// Parameters in a form the registry constructor accepts.
    fn parameters(&self) -> Parameters;

    /// Validate parameters.
    fn init(&self) -> Result<()>;

    /// Prepare a freshly created material point.
    fn init_point(&self, _mp: &mut MaterialPoint) {}

    /// Mass density.
    fn density(&self) -> f64;

    /// Cauchy stress.
    fn stress(&self, pt: &PointState) -> StressTensor;

    /// Spatial elasticity tensor in Voigt notation.
    fn tangent(&self, pt: &PointState) -> ConstitutiveMatrix;

    /// Spatial permeability; zero for materials without a fluid phase.
    fn permeability(&self, _pt: &PointState) -> Matrix3<f64> {
        Matrix3::zeros()
    }
}

/// Read a named parameter.
pub fn parameter(params: &[(String, f64)], key: &str) -> Result<f64> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| *v)
        .ok_or_else(|| Error::InvalidMaterial(format!("missing parameter \"{}\"", key)))
}

fn check_elastic(youngs_modulus: f64, poissons_ratio: f64) -> Result<()> {
    if youngs_modulus <= 0.0 {
        return Err(Error::InvalidMaterial(
            "Young's modulus must be positive".into(),
        ));
    }
    if poissons_ratio <= -1.0 || poissons_ratio >= 0.5 {
        return Err(Error::InvalidMaterial(
            "Poisson's ratio must be in range (-1, 0.5)".into(),
        ));
    }
    Ok(())
}

fn check_density(density: f64) -> Result<()> {
    if density < 0.0 {
        return Err(Error::InvalidMaterial("Density must be non-negative".into()));
    }
    Ok(())
}

fn lame(youngs_modulus: f64, poissons_ratio: f64) -> (f64, f64) {
    let (e, nu) = (youngs_modulus, poissons_ratio);
    (e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu)), e / (2.0 * (1.0 + nu)))
}

/// Isotropic Voigt tensor λ I⊗I + 2μ 𝕀 with engineering shear.
fn isotropic_tensor(lambda: f64, mu: f64) -> ConstitutiveMatrix {
    let c11 = lambda + 2.0 * mu;
    let c12 = lambda;
    Matrix6::new(
        c11, c12, c12, 0.0, 0.0, 0.0,
        c12, c11, c12, 0.0, 0.0, 0.0,
        c12, c12, c11, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, mu, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0, mu, 0.0,
        0.0, 0.0, 0.0, 0.0, 0.0, mu,
    )
}

/// Isotropic linear elastic material.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearElastic {
    pub name: String,
    /// Young's modulus.
    pub youngs_modulus: f64,
    /// Poisson's ratio (dimensionless, -1 < ν < 0.5).
    pub poissons_ratio: f64,
    pub density: f64,
}

impl LinearElastic {
    pub const TAG: &'static str = "isotropic elastic";

    /// # Errors
    ///
    /// Returns error if material properties are physically invalid.
    pub fn new(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        check_elastic(youngs_modulus, poissons_ratio)?;
        Ok(Self {
            name: "elastic".into(),
            youngs_modulus,
            poissons_ratio,
            density: 1.0,
        })
    }

    pub fn with_density(mut self, density: f64) -> Result<Self> {
        check_density(density)?;
        self.density = density;
        Ok(self)
    }

    pub fn from_parameters(name: &str, params: &[(String, f64)]) -> Result<Self> {
        let mut m = Self::new(parameter(params, "E")?, parameter(params, "v")?)?
            .with_density(parameter(params, "density")?)?;
        m.name = name.to_string();
        Ok(m)
    }

    /// 3D constitutive matrix, σ = D * ε in Voigt notation.
    pub fn constitutive_3d(&self) -> ConstitutiveMatrix {
        let (lambda, mu) = lame(self.youngs_modulus, self.poissons_ratio);
        isotropic_tensor(lambda, mu)
    }
}

impl Material for LinearElastic {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Parameters {
        vec![
            ("E".into(), self.youngs_modulus),
            ("v".into(), self.poissons_ratio),
            ("density".into(), self.density),
        ]
    }

    fn init(&self) -> Result<()> {
        check_elastic(self.youngs_modulus, self.poissons_ratio)?;
        check_density(self.density)
    }

    fn density(&self) -> f64 {
        self.density
    }

    fn stress(&self, pt: &PointState) -> StressTensor {
        StressTensor(self.constitutive_3d() * pt.strain.0)
    }

    fn tangent(&self, _pt: &PointState) -> ConstitutiveMatrix {
        self.constitutive_3d()
    }
}

/// Compressible neo-Hookean material.
///
/// σ = μ/J (b - I) + λ ln J / J I
#[derive(Debug, Clone, PartialEq)]
pub struct NeoHookean {
    pub name: String,
    pub youngs_modulus: f64,
    pub poissons_ratio: f64,
    pub density: f64,
}

impl NeoHookean {
    pub const TAG: &'static str = "neo-Hookean";

    pub fn new(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        check_elastic(youngs_modulus, poissons_ratio)?;
        Ok(Self {
            name: "neo-Hookean".into(),
            youngs_modulus,
            poissons_ratio,
            density: 1.0,
        })
    }

    pub fn from_parameters(name: &str, params: &[(String, f64)]) -> Result<Self> {
        let mut m = Self::new(parameter(params, "E")?, parameter(params, "v")?)?;
        m.density = parameter(params, "density")?;
        check_density(m.density)?;
        m.name = name.to_string();
        Ok(m)
    }
}

impl Material for NeoHookean {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Parameters {
        vec![
            ("E".into(), self.youngs_modulus),
            ("v".into(), self.poissons_ratio),
            ("density".into(), self.density),
        ]
    }

    fn init(&self) -> Result<()> {
        check_elastic(self.youngs_modulus, self.poissons_ratio)?;
        check_density(self.density)
    }

    fn density(&self) -> f64 {
        self.density
    }

    fn stress(&self, pt: &PointState) -> StressTensor {
        let (lambda, mu) = lame(self.youngs_modulus, self.poissons_ratio);
        let j = pt.j;
        let b = pt.f * pt.f.transpose();
        let s = (b - Matrix3::identity()) * (mu / j) + Matrix3::identity() * (lambda * j.ln() / j);
        StressTensor::from_matrix(&s)
    }

    fn tangent(&self, pt: &PointState) -> ConstitutiveMatrix {
        let (lambda, mu) = lame(self.youngs_modulus, self.poissons_ratio);
        let j = pt.j;
        let mu_eff = (mu - lambda * j.ln()) / j;
        isotropic_tensor(lambda / j, mu_eff)
    }
}

/// Linear poroelastic material: linear elastic matrix plus isotropic
/// permeability. The stress returned is the effective (solid) stress.
#[derive(Debug, Clone, PartialEq)]
pub struct PoroElastic {
    pub solid: LinearElastic,
    /// Isotropic hydraulic permeability.
    pub permeability: f64,
}

impl PoroElastic {
    pub const TAG: &'static str = "biphasic";

    pub fn new(solid: LinearElastic, permeability: f64) -> Result<Self> {
        if permeability <= 0.0 {
            return Err(Error::InvalidMaterial("Permeability must be positive".into()));
        }
        Ok(Self { solid, permeability })
    }

    pub fn from_parameters(name: &str, params: &[(String, f64)]) -> Result<Self> {
        Self::new(
            LinearElastic::from_parameters(name, params)?,
            parameter(params, "perm")?,
        )
    }
}

impl Material for PoroElastic {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.solid.name
    }

    fn parameters(&self) -> Parameters {
        let mut p = self.solid.parameters();
        p.push(("perm".into(), self.permeability));
        p
    }

    fn init(&self) -> Result<()> {
        self.solid.init()?;
        if self.permeability <= 0.0 {
            return Err(Error::InvalidMaterial("Permeability must be positive".into()));
        }
        Ok(())
    }

    fn density(&self) -> f64 {
        self.solid.density
    }

    fn stress(&self, pt: &PointState) -> StressTensor {
        self.solid.stress(pt)
    }

    fn tangent(&self, pt: &PointState) -> ConstitutiveMatrix {
        self.solid.tangent(pt)
    }

    fn permeability(&self, _pt: &PointState) -> Matrix3<f64> {
        Matrix3::identity() * self.permeability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrainTensor;
    use approx::assert_relative_eq;

    #[test]
    fn test_material_validation() {
        assert!(LinearElastic::new(200e9, 0.3).is_ok());
        assert!(LinearElastic::new(-1.0, 0.3).is_err());
        assert!(LinearElastic::new(200e9, 0.5).is_err());
        assert!(NeoHookean::new(1.0, 0.6).is_err());
        assert!(PoroElastic::new(LinearElastic::new(1.0, 0.0).unwrap(), 0.0).is_err());
    }

    #[test]
    fn test_uniaxial_strain_stress() {
        let m = LinearElastic::new(1.0, 0.25).unwrap();
        let pt = PointState {
            strain: StrainTensor::new([0.01, 0.0, 0.0, 0.0, 0.0, 0.0]),
            ..Default::default()
        };
        let (lambda, mu) = lame(1.0, 0.25);
        let s = m.stress(&pt);
        assert_relative_eq!(s.0[0], (lambda + 2.0 * mu) * 0.01, epsilon = 1e-14);
        assert_relative_eq!(s.0[1], lambda * 0.01, epsilon = 1e-14);
    }

    #[test]
    fn test_neo_hookean_reference_state() {
        let m = NeoHookean::new(10.0, 0.3).unwrap();
        let pt = PointState::default();
        assert_relative_eq!(m.stress(&pt).0.norm(), 0.0, epsilon = 1e-14);
        let lin = LinearElastic::new(10.0, 0.3).unwrap();
        assert_relative_eq!(m.tangent(&pt), lin.constitutive_3d(), epsilon = 1e-12);
    }

    #[test]
    fn test_neo_hookean_matches_linear_for_small_stretch() {
        let m = NeoHookean::new(10.0, 0.3).unwrap();
        let lin = LinearElastic::new(10.0, 0.3).unwrap();
        let eps = 1e-6;
        let mut f = Matrix3::identity();
        f[(0, 0)] += eps;
        let pt = PointState {
            f,
            j: f.determinant(),
            strain: StrainTensor::new([eps, 0.0, 0.0, 0.0, 0.0, 0.0]),
            ..Default::default()
        };
        assert_relative_eq!(m.stress(&pt).0, lin.stress(&pt).0, epsilon = 1e-9);
    }

    #[test]
    fn test_parameter_round_trip() {
        let m = PoroElastic::new(LinearElastic::new(2.0, 0.1).unwrap(), 1e-3).unwrap();
        let back = PoroElastic::from_parameters(m.name(), &m.parameters()).unwrap();
        assert_eq!(back, m);
    }
}
