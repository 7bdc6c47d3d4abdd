//! Biphasic (poroelastic) domain.
//!
//! Small-strain u–p formulation: a linear elastic solid matrix saturated by
//! a fluid obeying Darcy's law. Per node the element carries three
//! displacements and one fluid pressure. With m = [1 1 1 0 0 0]:
//!
//! ```text
//! f_u = ∫ Bᵀ (σ' - p m) dV
//! f_p = ∫ N (ε_v - ε_v,n) / Δt dV + ∫ ∇N · k ∇p dV
//! K_uu = ∫ Bᵀ C B    K_up = -∫ Bᵀ m N
//! K_pu = ∫ N mᵀ B / Δt    K_pp = ∫ ∇N · k ∇N
//! ```
//!
//! The steady-state variants drop the volumetric rate term (and `K_pu`).
//! The coupled matrix is nonsymmetric.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    check_elements, point_kinematics, scatter_matrices, scatter_vectors, Capabilities, Domain,
    DomainContext, Kinematics,
};
use crate::assembly::{ElementMatrix, GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::element::{integration_rule, spatial_gradients};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::material_point::MaterialPoint;
use crate::mesh::{ElementConnectivity, Mesh};
use crate::types::{nodal_b, voigt_identity, StrainTensor, Vec3};

/// Biphasic domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiphasicDomain {
    name: String,
    material: usize,
    /// Node slots: x, y, z, p.
    dofs: [usize; 4],
    elements: Vec<ElementConnectivity>,
    points: Vec<Vec<MaterialPoint>>,
}

impl BiphasicDomain {
    pub const TAG: &'static str = "biphasic";

    /// `pressure_dof` is the node slot of the fluid pressure.
    pub fn new(name: &str, material: usize, pressure_dof: usize) -> Self {
        Self {
            name: name.to_string(),
            material,
            dofs: [0, 1, 2, pressure_dof],
            elements: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn add_element(&mut self, element: ElementConnectivity) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn points(&self, element: usize) -> &[MaterialPoint] {
        &self.points[element]
    }

    pub fn restore(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn element_values(&self, mesh: &Mesh, conn: &ElementConnectivity) -> (Vec<Vec3>, Vec<f64>) {
        let u = conn.nodes.iter().map(|&n| mesh.nodes[n].displacement()).collect();
        let p = conn.nodes.iter().map(|&n| mesh.nodes[n].dofs[self.dofs[3]].value).collect();
        (u, p)
    }

    fn element_forces(
        &self,
        e: usize,
        ctx: &DomainContext,
        steady: bool,
    ) -> Result<(Vec<Option<usize>>, Vec<f64>)> {
        let conn = &self.elements[e];
        let material = ctx.material(self.material)?;
        let dt = ctx.time.time_increment;
        if !steady && dt <= 0.0 {
            return Err(Error::Assembly(format!(
                "domain \"{}\": transient biphasic analysis needs a positive time increment",
                self.name
            )));
        }
        let x0 = ctx.mesh.coords(&conn.nodes);
        let (u, _) = self.element_values(ctx.mesh, conn);
        let rule = integration_rule(conn.element_type);
        let m = voigt_identity();
        let mut fe = vec![0.0; 4 * conn.nodes.len()];
        for (p, mp) in rule.points.iter().zip(&self.points[e]) {
            let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, Kinematics::SmallStrain)?;
            let st = &mp.current;
            let total = st.stress.0 - m * st.pressure;
            let perm = material.permeability(st);
            let rate = if steady {
                0.0
            } else {
                (st.strain.volumetric() - mp.converged.strain.volumetric()) / dt
            };
            for (a, g) in k.grad.iter().enumerate() {
                let fa = nodal_b(g).transpose() * total * k.dv0;
                for i in 0..3 {
                    fe[4 * a + i] += fa[i];
                }
                fe[4 * a + 3] += (p.n[a] * rate + g.dot(&(perm * st.pressure_gradient))) * k.dv0;
            }
        }
        fe.iter_mut().for_each(|v| *v = -*v);
        Ok((ctx.mesh.lm(&conn.nodes, &self.dofs), fe))
    }

    fn element_stiffness(&self, e: usize, ctx: &DomainContext, steady: bool) -> Result<ElementMatrix> {
        let conn = &self.elements[e];
        let material = ctx.material(self.material)?;
        let dt = ctx.time.time_increment;
        let x0 = ctx.mesh.coords(&conn.nodes);
        let (u, _) = self.element_values(ctx.mesh, conn);
        let rule = integration_rule(conn.element_type);
        let m = voigt_identity();
        let nn = conn.nodes.len();
        let mut ke = DMatrix::zeros(4 * nn, 4 * nn);
        for (p, mp) in rule.points.iter().zip(&self.points[e]) {
            let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, Kinematics::SmallStrain)?;
            let c = material.tangent(&mp.current);
            let perm = material.permeability(&mp.current);
            let bs: Vec<_> = k.grad.iter().map(nodal_b).collect();
            for a in 0..nn {
                let btc = bs[a].transpose() * c;
                let btm = bs[a].transpose() * m;
                for b in 0..nn {
                    let kuu = btc * bs[b] * k.dv0;
                    let mut block = ke.fixed_view_mut::<3, 3>(4 * a, 4 * b);
                    block += kuu;
                    for i in 0..3 {
                        ke[(4 * a + i, 4 * b + 3)] -= btm[i] * p.n[b] * k.dv0;
                    }
                    if !steady && dt > 0.0 {
                        let mtb = m.transpose() * bs[b];
                        for j in 0..3 {
                            ke[(4 * a + 3, 4 * b + j)] += p.n[a] * mtb[j] * k.dv0 / dt;
                        }
                    }
                    ke[(4 * a + 3, 4 * b + 3)] += k.grad[a].dot(&(perm * k.grad[b])) * k.dv0;
                }
            }
        }
        Ok(ElementMatrix::square(ctx.mesh.lm(&conn.nodes, &self.dofs), ke))
    }

    fn forces(&self, ctx: &DomainContext, r: &mut GlobalVector, steady: bool) -> Result<()> {
        let forces = (0..self.elements.len())
            .into_par_iter()
            .map(|e| self.element_forces(e, ctx, steady))
            .collect::<Result<Vec<_>>>()?;
        scatter_vectors(r, forces);
        Ok(())
    }

    fn stiffness(&self, ctx: &DomainContext, k: &mut GlobalMatrix, steady: bool) -> Result<()> {
        let matrices = (0..self.elements.len())
            .into_par_iter()
            .map(|e| self.element_stiffness(e, ctx, steady))
            .collect::<Result<Vec<_>>>()?;
        scatter_matrices(k, matrices);
        Ok(())
    }
}

impl Domain for BiphasicDomain {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            internal_forces: true,
            stiffness: true,
            body_force: true,
            inertial_forces: false,
            mass_matrix: false,
            update: true,
            nonsymmetric: true,
        }
    }

    fn material(&self) -> usize {
        self.material
    }

    fn init(&mut self, mesh: &Mesh, materials: &[Box<dyn Material>]) -> Result<()> {
        check_elements(&self.name, mesh, &self.elements)?;
        if self.dofs[3] >= mesh.dofs_per_node() {
            return Err(Error::Init(format!(
                "domain \"{}\": pressure dof {} not present on nodes",
                self.name, self.dofs[3]
            )));
        }
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
            builder.add(&mesh.lm(&conn.nodes, &self.dofs));
        }
    }

    fn internal_forces(&self, ctx: &DomainContext, r: &mut GlobalVector) -> Result<()> {
        self.forces(ctx, r, false)
    }

    fn internal_forces_ss(&self, ctx: &DomainContext, r: &mut GlobalVector) -> Result<()> {
        self.forces(ctx, r, true)
    }

    fn stiffness_matrix(&self, ctx: &DomainContext, k: &mut GlobalMatrix) -> Result<()> {
        self.stiffness(ctx, k, false)
    }

    fn stiffness_matrix_ss(&self, ctx: &DomainContext, k: &mut GlobalMatrix) -> Result<()> {
        self.stiffness(ctx, k, true)
    }

    fn body_force(&self, ctx: &DomainContext, b: &Vec3, r: &mut GlobalVector) -> Result<()> {
        let rho = ctx.material(self.material)?.density();
        for (e, conn) in self.elements.iter().enumerate() {
            let x0 = ctx.mesh.coords(&conn.nodes);
            let mut fe = vec![0.0; 4 * conn.nodes.len()];
            for p in &integration_rule(conn.element_type).points {
                let (_, det0) = spatial_gradients(&x0, &p.dn)
                    .ok_or(Error::NegativeJacobian { element: e, jacobian: 0.0 })?;
                for (a, na) in p.n.iter().enumerate() {
                    for i in 0..3 {
                        fe[4 * a + i] += rho * na * b[i] * det0 * p.weight;
                    }
                }
            }
            r.assemble(&ctx.mesh.lm(&conn.nodes, &self.dofs), &fe);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &DomainContext) -> Result<()> {
        let material = ctx.material(self.material)?;
        let pdof = self.dofs[3];
        self.elements
            .par_iter()
            .zip(self.points.par_iter_mut())
            .enumerate()
            .try_for_each(|(e, (conn, points))| {
                let x0 = ctx.mesh.coords(&conn.nodes);
                let u: Vec<Vec3> = conn.nodes.iter().map(|&n| ctx.mesh.nodes[n].displacement()).collect();
                let pn: Vec<f64> = conn.nodes.iter().map(|&n| ctx.mesh.nodes[n].dofs[pdof].value).collect();
                for (p, mp) in integration_rule(conn.element_type).points.iter().zip(points.iter_mut()) {
                    let k = point_kinematics(e, &x0, &u, &p.dn, p.weight, Kinematics::SmallStrain)?;
                    let h = k.f - nalgebra::Matrix3::identity();
                    let st = &mut mp.current;
                    st.f = k.f;
                    st.j = k.j;
                    st.strain = StrainTensor::from_displacement_gradient(&h);
                    st.pressure = p.n.iter().zip(&pn).map(|(n, v)| n * v).sum();
                    st.pressure_gradient = k.grad.iter().zip(&pn).fold(Vec3::zeros(), |s, (g, v)| s + g * *v);
                    st.stress = material.stress(st);
                    st.flux = -(material.permeability(st) * st.pressure_gradient);
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
