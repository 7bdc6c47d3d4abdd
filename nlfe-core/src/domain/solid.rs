//! Elastic solid domain.
//!
//! Tet4/Hex8 elements with displacement DOFs. Small-strain kinematics use
//! reference gradients and the linearized strain; finite kinematics use
//! the spatial formulation with geometric stiffness:
//!
//! ```text
//! f_a  = ∫ B_aᵀ σ dv
//! K_ab = ∫ B_aᵀ c B_b dv + ∫ (∇N_a · σ ∇N_b) I dv
//! ```

use nalgebra::{DMatrix, Matrix3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    check_elements, element_displacements, point_kinematics, scalar_mass, scatter_matrices,
    scatter_vectors, Capabilities, Domain, DomainContext, Kinematics,
};
use crate::assembly::{ElementMatrix, GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::element::integration_rule;
use crate::error::{Error, Result};
use crate::material::Material;
use crate::material_point::MaterialPoint;
use crate::mesh::{ElementConnectivity, Mesh};
use crate::types::{nodal_b, StrainTensor, Vec3};

const DISPLACEMENT: [usize; 3] = [0, 1, 2];

/// Solid domain with an elastic material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticSolidDomain {
    name: String,
    material: usize,
    kinematics: Kinematics,
    elements: Vec<ElementConnectivity>,
    points: Vec<Vec<MaterialPoint>>,
}

impl ElasticSolidDomain {
    pub const TAG: &'static str = "elastic-solid";

    pub fn new(name: &str, material: usize, kinematics: Kinematics) -> Self {
        Self {
            name: name.to_string(),
            material,
            kinematics,
            elements: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn add_element(&mut self, element: ElementConnectivity) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn elements(&self) -> &[ElementConnectivity] {
        &self.elements
    }

    pub fn kinematics(&self) -> Kinematics {
        self.kinematics
    }

    /// Material points of one element.
    pub fn points(&self, element: usize) -> &[MaterialPoint] {
        &self.points[element]
    }

    pub fn restore(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn element_forces(
        &self,
        e: usize,
        ctx: &DomainContext,
    ) -> Result<(Vec<Option<usize>>, Vec<f64>)> {
        let conn = &self.elements[e];
        let mesh = ctx.mesh;
        let x0 = mesh.coords(&conn.nodes);
        let u = element_displacements(mesh, &conn.nodes);
        let rule = integration_rule(conn.element_type);
        let mut fe = vec![0.0; 3 * conn.nodes.len()];
        for (p, mp) in rule.points.iter().zip(&self.points[e]) {
            let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, self.kinematics)?;
            let dv = match self.kinematics {
                Kinematics::SmallStrain => k.dv0,
                Kinematics::Finite => k.dv0 * k.j,
            };
            let sigma = mp.current.stress.0;
            for (a, g) in k.grad.iter().enumerate() {
                let fa = nodal_b(g).transpose() * sigma * dv;
                for i in 0..3 {
                    fe[3 * a + i] += fa[i];
                }
            }
        }
        // residual = external - internal
        fe.iter_mut().for_each(|v| *v = -*v);
        Ok((mesh.lm(&conn.nodes, &DISPLACEMENT), fe))
    }

    fn element_stiffness(&self, e: usize, ctx: &DomainContext) -> Result<ElementMatrix> {
        let conn = &self.elements[e];
        let mesh = ctx.mesh;
        let material = ctx.material(self.material)?;
        let x0 = mesh.coords(&conn.nodes);
        let u = element_displacements(mesh, &conn.nodes);
        let rule = integration_rule(conn.element_type);
        let nn = conn.nodes.len();
        let mut ke = DMatrix::zeros(3 * nn, 3 * nn);
        for (p, mp) in rule.points.iter().zip(&self.points[e]) {
            let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, self.kinematics)?;
            let c = material.tangent(&mp.current);
            let (dv, sigma) = match self.kinematics {
                Kinematics::SmallStrain => (k.dv0, None),
                Kinematics::Finite => (k.dv0 * k.j, Some(mp.current.stress.to_matrix())),
            };
            let bs: Vec<_> = k.grad.iter().map(nodal_b).collect();
            for a in 0..nn {
                let btc = bs[a].transpose() * c;
                for b in 0..nn {
                    let mut kab = btc * bs[b] * dv;
                    if let Some(s) = sigma.as_ref() {
                        let geo = k.grad[a].dot(&(s * k.grad[b])) * dv;
                        kab += Matrix3::identity() * geo;
                    }
                    let mut block = ke.fixed_view_mut::<3, 3>(3 * a, 3 * b);
                    block += kab;
                }
            }
        }
        Ok(ElementMatrix::square(mesh.lm(&conn.nodes, &DISPLACEMENT), ke))
    }
}

impl Domain for ElasticSolidDomain {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn material(&self) -> usize {
        self.material
    }

    fn init(&mut self, mesh: &Mesh, materials: &[Box<dyn Material>]) -> Result<()> {
        check_elements(&self.name, mesh, &self.elements)?;
        let material = materials.get(self.material).ok_or_else(|| {
            Error::Init(format!("domain \"{}\": material {} does not exist", self.name, self.material))
        })?;
        material.init()
    }

    fn activate(&mut self, mesh: &Mesh, materials: &[Box<dyn Material>]) -> Result<()> {
        let material = materials
            .get(self.material)
            .ok_or_else(|| Error::Init(format!("material {} does not exist", self.material)))?;
        self.points = self
            .elements
            .iter()
            .map(|conn| {
                let x0 = mesh.coords(&conn.nodes);
                integration_rule(conn.element_type)
                    .points
                    .iter()
                    .map(|p| {
                        let x = x0.iter().zip(&p.n).fold(Vec3::zeros(), |s, (x, n)| s + x * *n);
                        let mut mp = MaterialPoint::new(x);
                        material.init_point(&mut mp);
                        mp
                    })
                    .collect()
            })
            .collect();
        Ok(())
    }

    fn build_matrix_profile(&self, mesh: &Mesh, builder: &mut ProfileBuilder) {
        for conn in &self.elements {
            builder.add(&mesh.lm(&conn.nodes, &DISPLACEMENT));
        }
    }

    fn internal_forces(&self, ctx: &DomainContext, r: &mut GlobalVector) -> Result<()> {
        let forces = (0..self.elements.len())
            .into_par_iter()
            .map(|e| self.element_forces(e, ctx))
            .collect::<Result<Vec<_>>>()?;
        scatter_vectors(r, forces);
        Ok(())
    }

    fn stiffness_matrix(&self, ctx: &DomainContext, k: &mut GlobalMatrix) -> Result<()> {
        let matrices = (0..self.elements.len())
            .into_par_iter()
            .map(|e| self.element_stiffness(e, ctx))
            .collect::<Result<Vec<_>>>()?;
        scatter_matrices(k, matrices);
        Ok(())
    }

    fn body_force(&self, ctx: &DomainContext, b: &Vec3, r: &mut GlobalVector) -> Result<()> {
        let rho = ctx.material(self.material)?.density();
        let forces = self
            .elements
            .par_iter()
            .enumerate()
            .map(|(e, conn)| {
                let x0 = ctx.mesh.coords(&conn.nodes);
                let rule = integration_rule(conn.element_type);
                let mut fe = vec![0.0; 3 * conn.nodes.len()];
                for p in &rule.points {
                    let (_, det0) = crate::element::spatial_gradients(&x0, &p.dn)
                        .ok_or(Error::NegativeJacobian { element: e, jacobian: 0.0 })?;
                    for (a, na) in p.n.iter().enumerate() {
                        for i in 0..3 {
                            fe[3 * a + i] += rho * na * b[i] * det0 * p.weight;
                        }
                    }
                }
                Ok((ctx.mesh.lm(&conn.nodes, &DISPLACEMENT), fe))
            })
            .collect::<Result<Vec<_>>>()?;
        scatter_vectors(r, forces);
        Ok(())
    }

    fn inertial_forces(&self, ctx: &DomainContext, r: &mut GlobalVector) -> Result<()> {
        let rho = ctx.material(self.material)?.density();
        let forces = self
            .elements
            .par_iter()
            .enumerate()
            .map(|(e, conn)| {
                let x0 = ctx.mesh.coords(&conn.nodes);
                let acc: Vec<Vec3> = conn.nodes.iter().map(|&n| ctx.mesh.nodes[n].acceleration()).collect();
                let rule = integration_rule(conn.element_type);
                let mut fe = vec![0.0; 3 * conn.nodes.len()];
                for p in &rule.points {
                    let (_, det0) = crate::element::spatial_gradients(&x0, &p.dn)
                        .ok_or(Error::NegativeJacobian { element: e, jacobian: 0.0 })?;
                    let a_gp = acc.iter().zip(&p.n).fold(Vec3::zeros(), |s, (a, n)| s + a * *n);
                    for (a, na) in p.n.iter().enumerate() {
                        for i in 0..3 {
                            fe[3 * a + i] -= rho * na * a_gp[i] * det0 * p.weight;
                        }
                    }
                }
                Ok((ctx.mesh.lm(&conn.nodes, &DISPLACEMENT), fe))
            })
            .collect::<Result<Vec<_>>>()?;
        scatter_vectors(r, forces);
        Ok(())
    }

    fn mass_matrix(&self, ctx: &DomainContext, scale: f64, k: &mut GlobalMatrix) -> Result<()> {
        let rho = ctx.material(self.material)?.density();
        let matrices = self
            .elements
            .par_iter()
            .enumerate()
            .map(|(e, conn)| {
                let x0 = ctx.mesh.coords(&conn.nodes);
                let rule = integration_rule(conn.element_type);
                let nn = conn.nodes.len();
                let mut me = DMatrix::zeros(3 * nn, 3 * nn);
                for p in &rule.points {
                    let (_, det0) = crate::element::spatial_gradients(&x0, &p.dn)
                        .ok_or(Error::NegativeJacobian { element: e, jacobian: 0.0 })?;
                    let m = scalar_mass(&p.n, scale * rho * det0 * p.weight);
                    for a in 0..nn {
                        for b in 0..nn {
                            for i in 0..3 {
                                me[(3 * a + i, 3 * b + i)] += m[(a, b)];
                            }
                        }
                    }
                }
                Ok(ElementMatrix::square(ctx.mesh.lm(&conn.nodes, &DISPLACEMENT), me))
            })
            .collect::<Result<Vec<_>>>()?;
        scatter_matrices(k, matrices);
        Ok(())
    }

    fn update(&mut self, ctx: &DomainContext) -> Result<()> {
        let material = ctx.material(self.material)?;
        let kinematics = self.kinematics;
        self.elements
            .par_iter()
            .zip(self.points.par_iter_mut())
            .enumerate()
            .try_for_each(|(e, (conn, points))| {
                let x0 = ctx.mesh.coords(&conn.nodes);
                let u = element_displacements(ctx.mesh, &conn.nodes);
                let rule = integration_rule(conn.element_type);
                for (p, mp) in rule.points.iter().zip(points.iter_mut()) {
                    let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, kinematics)?;
                    let h = k.f - Matrix3::identity();
                    mp.current.f = k.f;
                    mp.current.j = k.j;
                    mp.current.strain = StrainTensor::from_displacement_gradient(&h);
                    mp.current.stress = material.stress(&mp.current);
                }
                Ok(())
            })
    }

    fn commit(&mut self) {
        self.points.iter_mut().flatten().for_each(MaterialPoint::commit);
    }

    fn rollback(&mut self) {
        self.points.iter_mut().flatten().for_each(MaterialPoint::rollback);
    }

    fn save(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.points)?)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        let points: Vec<Vec<MaterialPoint>> = bincode::deserialize(bytes)?;
        if points.len() != self.elements.len() {
            return Err(Error::Serialization(format!(
                "domain \"{}\": {} element states for {} elements",
                self.name,
                points.len(),
                self.elements.len()
            )));
        }
        self.points = points;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::{init_equations, DofRegistry, EquationScheme};
    use crate::material::LinearElastic;
    use crate::mesh::ElementType;
    use crate::types::{Point3, TimeInfo};
    use approx::assert_relative_eq;

    fn setup(kinematics: Kinematics) -> (Mesh, Vec<Box<dyn Material>>, ElasticSolidDomain) {
        let mut mesh = Mesh::new(3);
        mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        let materials: Vec<Box<dyn Material>> = vec![Box::new(LinearElastic::new(100.0, 0.25).unwrap())];
        let mut dom = ElasticSolidDomain::new("solid", 0, kinematics);
        dom.add_element(ElementConnectivity::new(ElementType::Tet4, vec![0, 1, 2, 3]).unwrap());
        dom.init(&mesh, &materials).unwrap();
        dom.activate(&mesh, &materials).unwrap();
        (mesh, materials, dom)
    }

    #[test]
    fn test_rigid_translation_is_stress_free() {
        let (mut mesh, materials, mut dom) = setup(Kinematics::Finite);
        for n in mesh.nodes.iter_mut() {
            n.dofs[0].value = 0.3;
            n.dofs[2].value = -0.1;
        }
        let time = TimeInfo::default();
        let ctx = DomainContext { mesh: &mesh, materials: &materials, time: &time };
        dom.update(&ctx).unwrap();
        for mp in dom.points(0) {
            assert_relative_eq!(mp.current.stress.0.norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stiffness_is_symmetric_with_rigid_null_space() {
        let (mut mesh, materials, dom) = setup(Kinematics::SmallStrain);
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let mut b = ProfileBuilder::new(&map);
        dom.build_matrix_profile(&mesh, &mut b);
        let mut gm = GlobalMatrix::new(false);
        let p = b.finish();
        gm.set_static_profile(&map, p.clone());
        gm.set_profile(p).unwrap();
        let time = TimeInfo::default();
        let ctx = DomainContext { mesh: &mesh, materials: &materials, time: &time };
        dom.stiffness_matrix(&ctx, &mut gm).unwrap();
        let k = gm.matrix().unwrap().to_dense();
        assert_relative_eq!(k.clone(), k.transpose(), epsilon = 1e-10);
        let ones_x = nalgebra::DVector::from_fn(12, |i, _| if i % 3 == 0 { 1.0 } else { 0.0 });
        assert_relative_eq!((k * ones_x).norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_internal_force_balances_external_in_patch() {
        // uniform stretch: resultant internal force sums to zero
        let (mut mesh, materials, mut dom) = setup(Kinematics::SmallStrain);
        for n in mesh.nodes.iter_mut() {
            n.dofs[0].value = 0.01 * n.position.x;
        }
        let map = init_equations(&mut mesh, &DofRegistry::solid(), EquationScheme::Staggered).unwrap();
        let time = TimeInfo::default();
        let ctx = DomainContext { mesh: &mesh, materials: &materials, time: &time };
        dom.update(&ctx).unwrap();
        let mut r = GlobalVector::new(&map);
        dom.internal_forces(&ctx, &mut r).unwrap();
        let sx: f64 = r.r.iter().step_by(3).sum();
        assert_relative_eq!(sx, 0.0, epsilon = 1e-12);
        assert!(r.r[3] < 0.0);
    }

    #[test]
    fn test_state_round_trip() {
        let (mesh, materials, mut dom) = setup(Kinematics::SmallStrain);
        let bytes = dom.save_state().unwrap();
        dom.activate(&mesh, &materials).unwrap();
        dom.restore_state(&bytes).unwrap();
        let full = ElasticSolidDomain::restore(&dom.save().unwrap()).unwrap();
        assert_eq!(full.elements(), dom.elements());
    }
}
