//! The discretized problem: mesh, physics and boundary conditions together
//! with the global operations the Newton core drives.
//!
//! [`Problem`] assembles the residual `R = f_ext − f_int` and the tangent
//! `K = ∂f_int/∂u`, applies trial increments and commits or rolls back the
//! trial state. It knows nothing about iteration strategy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::{GlobalMatrix, GlobalVector, ProfileBuilder};
use crate::boundary::{FixedBc, InitialCondition, PrescribedBc};
use crate::constraint::NonlinearConstraint;
use crate::contact::ContactInterface;
use crate::dof::{init_equations, DofRegistry, DofStatus, EquationKind, EquationMap, EquationScheme};
use crate::domain::{Domain, DomainContext};
use crate::error::{Error, Result};
use crate::linear_constraint::LinearConstraintManager;
use crate::load::{
    BodyLoad, ControllerValues, EdgeLoad, GlobalData, LoadController, ModelLoad, NodalLoad, SurfaceLoad,
};
use crate::material::Material;
use crate::mesh::Mesh;
use crate::types::TimeInfo;

/// Kind of analysis a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisKind {
    #[default]
    Static,
    /// Newmark time integration with inertia.
    Dynamic,
    /// Static analysis without storage terms.
    SteadyState,
}

/// Reference to one activatable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentRef {
    FixedBc(usize),
    InitialCondition(usize),
    PrescribedBc(usize),
    NodalLoad(usize),
    BodyLoad(usize),
    ModelLoad(usize),
    Constraint(usize),
    SurfaceLoad(usize),
    EdgeLoad(usize),
    Domain(usize),
    Contact(usize),
    LinearConstraints,
}

/// Activation stages. Relative prescribed BCs read values set by initial
/// conditions, and linear constraints eliminate DOFs touched by everything
/// before them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationStage {
    FixedBcs,
    InitialConditions,
    PrescribedBcs,
    ModelLoads,
    NonlinearConstraints,
    SurfaceLoads,
    MaterialPoints,
    ContactInterfaces,
    LinearConstraints,
}

/// Required activation order.
pub const ACTIVATION_ORDER: [ActivationStage; 9] = [
    ActivationStage::FixedBcs,
    ActivationStage::InitialConditions,
    ActivationStage::PrescribedBcs,
    ActivationStage::ModelLoads,
    ActivationStage::NonlinearConstraints,
    ActivationStage::SurfaceLoads,
    ActivationStage::MaterialPoints,
    ActivationStage::ContactInterfaces,
    ActivationStage::LinearConstraints,
];

/// Reaction force on one constrained DOF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reaction {
    pub node: usize,
    pub dof: usize,
    pub force: f64,
}

/// Mesh, physics and boundary conditions of a model.
#[derive(Debug, Default)]
pub struct Problem {
    pub registry: DofRegistry,
    pub mesh: Mesh,
    pub materials: Vec<Box<dyn Material>>,
    pub domains: Vec<Box<dyn Domain>>,
    pub controllers: Vec<LoadController>,
    pub fixed_bcs: Vec<FixedBc>,
    pub prescribed_bcs: Vec<PrescribedBc>,
    pub initial_conditions: Vec<InitialCondition>,
    pub nodal_loads: Vec<NodalLoad>,
    pub surface_loads: Vec<SurfaceLoad>,
    pub edge_loads: Vec<EdgeLoad>,
    pub body_loads: Vec<BodyLoad>,
    pub model_loads: Vec<ModelLoad>,
    pub constraints: Vec<Box<dyn NonlinearConstraint>>,
    pub contacts: Vec<Box<dyn ContactInterface>>,
    pub linear_constraints: LinearConstraintManager,
    pub constants: BTreeMap<String, f64>,
    pub global_data: Vec<GlobalData>,
    pub(crate) scheme: EquationScheme,
    pub(crate) kind: AnalysisKind,
    equations: EquationMap,
    pub(crate) time: TimeInfo,
    lc: ControllerValues,
}

impl Problem {
    /// Empty problem whose nodes carry every DOF of `registry`.
    pub fn new(registry: DofRegistry) -> Self {
        let mesh = Mesh::new(registry.total_dofs());
        Self {
            registry,
            mesh,
            ..Default::default()
        }
    }

    pub fn equations(&self) -> &EquationMap {
        &self.equations
    }

    pub fn time(&self) -> &TimeInfo {
        &self.time
    }

    pub fn analysis_kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn controller_values(&self) -> &ControllerValues {
        &self.lc
    }

    pub fn set_constant(&mut self, name: &str, value: f64) {
        self.constants.insert(name.to_string(), value);
    }

    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    /// Set the time point and re-evaluate the load controllers.
    pub fn set_time(&mut self, current_time: f64, time_increment: f64) {
        self.time.current_time = current_time;
        self.time.time_increment = time_increment;
        self.lc = ControllerValues::evaluate(&self.controllers, current_time);
    }

    pub(crate) fn set_integration(&mut self, kind: AnalysisKind, beta: f64, gamma: f64) {
        self.kind = kind;
        self.time.beta = beta;
        self.time.gamma = gamma;
    }

    /// Validate every component.
    pub fn init(&mut self) -> Result<()> {
        if self.mesh.dofs_per_node() != self.registry.total_dofs() {
            return Err(Error::Init(format!(
                "mesh has {} dofs per node, registry defines {}",
                self.mesh.dofs_per_node(),
                self.registry.total_dofs()
            )));
        }
        if self.domains.is_empty() {
            return Err(Error::Init("model has no domains".into()));
        }
        let nlc = self.controllers.len();
        for m in &self.materials {
            m.init()?;
        }
        for d in self.domains.iter_mut() {
            d.init(&self.mesh, &self.materials)?;
        }
        for bc in &self.fixed_bcs {
            bc.init(&self.mesh)?;
        }
        for bc in &self.prescribed_bcs {
            bc.init(&self.mesh, nlc)?;
        }
        for ic in &self.initial_conditions {
            ic.init(&self.mesh)?;
        }
        for l in &self.nodal_loads {
            l.init(&self.mesh, nlc)?;
        }
        for l in &self.surface_loads {
            for f in &l.facets {
                self.mesh.validate_nodes(&f.nodes)?;
            }
            l.pressure.validate(nlc)?;
        }
        for l in &self.edge_loads {
            for e in &l.edges {
                self.mesh.validate_nodes(e)?;
            }
            l.scale.validate(nlc)?;
        }
        for l in &self.body_loads {
            l.scale.validate(nlc)?;
            if let Some(d) = l.domains.iter().flatten().find(|&&d| d >= self.domains.len()) {
                return Err(Error::Init(format!("body load references missing domain {}", d)));
            }
        }
        for l in &self.model_loads {
            self.mesh.validate_nodes(&l.nodes)?;
            l.scale.validate(nlc)?;
        }
        for c in self.constraints.iter_mut() {
            c.init(&self.mesh)?;
        }
        for c in self.contacts.iter_mut() {
            c.init(&self.mesh)?;
        }
        self.linear_constraints.init(&self.mesh)?;
        self.lc = ControllerValues::evaluate(&self.controllers, self.time.current_time);
        Ok(())
    }

    /// Activate the components accepted by `filter`, stage by stage in
    /// `order`, then renumber the equations.
    pub fn activate_in_order(
        &mut self,
        order: &[ActivationStage],
        filter: &dyn Fn(ComponentRef) -> bool,
    ) -> Result<()> {
        for stage in order {
            match stage {
                ActivationStage::FixedBcs => {
                    for (i, bc) in self.fixed_bcs.iter_mut().enumerate() {
                        if filter(ComponentRef::FixedBc(i)) {
                            bc.activate(&mut self.mesh);
                        }
                    }
                }
                ActivationStage::InitialConditions => {
                    for (i, ic) in self.initial_conditions.iter_mut().enumerate() {
                        if filter(ComponentRef::InitialCondition(i)) {
                            ic.activate(&mut self.mesh);
                        }
                    }
                }
                ActivationStage::PrescribedBcs => {
                    for (i, bc) in self.prescribed_bcs.iter_mut().enumerate() {
                        if filter(ComponentRef::PrescribedBc(i)) {
                            bc.activate(&mut self.mesh);
                        }
                    }
                }
                ActivationStage::ModelLoads => {
                    for (i, l) in self.nodal_loads.iter_mut().enumerate() {
                        l.active |= filter(ComponentRef::NodalLoad(i));
                    }
                    for (i, l) in self.body_loads.iter_mut().enumerate() {
                        l.active |= filter(ComponentRef::BodyLoad(i));
                    }
                    for (i, l) in self.model_loads.iter_mut().enumerate() {
                        l.active |= filter(ComponentRef::ModelLoad(i));
                    }
                }
                ActivationStage::NonlinearConstraints => {
                    for (i, c) in self.constraints.iter_mut().enumerate() {
                        if filter(ComponentRef::Constraint(i)) {
                            c.activate(&self.mesh)?;
                        }
                    }
                }
                ActivationStage::SurfaceLoads => {
                    for (i, l) in self.surface_loads.iter_mut().enumerate() {
                        l.active |= filter(ComponentRef::SurfaceLoad(i));
                    }
                    for (i, l) in self.edge_loads.iter_mut().enumerate() {
                        l.active |= filter(ComponentRef::EdgeLoad(i));
                    }
                }
                ActivationStage::MaterialPoints => {
                    for (i, d) in self.domains.iter_mut().enumerate() {
                        if filter(ComponentRef::Domain(i)) {
                            d.activate(&self.mesh, &self.materials)?;
                        }
                    }
                }
                ActivationStage::ContactInterfaces => {
                    for (i, c) in self.contacts.iter_mut().enumerate() {
                        if filter(ComponentRef::Contact(i)) {
                            c.activate(&self.mesh)?;
                        }
                    }
                }
                ActivationStage::LinearConstraints => {
                    if filter(ComponentRef::LinearConstraints)
                        && !self.linear_constraints.is_empty()
                        && !self.linear_constraints.is_active()
                    {
                        self.linear_constraints.activate(&mut self.mesh)?;
                    }
                }
            }
            debug!(?stage, "activation stage done");
        }
        self.renumber()
    }

    /// Deactivate the given step-owned components.
    pub fn deactivate(&mut self, components: &[ComponentRef]) {
        for c in components {
            match *c {
                ComponentRef::FixedBc(i) => self.fixed_bcs[i].deactivate(&mut self.mesh),
                ComponentRef::PrescribedBc(i) => self.prescribed_bcs[i].deactivate(&mut self.mesh),
                ComponentRef::InitialCondition(i) => self.initial_conditions[i].active = false,
                ComponentRef::NodalLoad(i) => self.nodal_loads[i].active = false,
                ComponentRef::BodyLoad(i) => self.body_loads[i].active = false,
                ComponentRef::ModelLoad(i) => self.model_loads[i].active = false,
                ComponentRef::SurfaceLoad(i) => self.surface_loads[i].active = false,
                ComponentRef::EdgeLoad(i) => self.edge_loads[i].active = false,
                ComponentRef::Constraint(i) => self.constraints[i].deactivate(),
                ComponentRef::Contact(i) => self.contacts[i].deactivate(),
                ComponentRef::Domain(_) | ComponentRef::LinearConstraints => {}
            }
        }
    }

    /// Check that every component reference exists.
    pub fn validate_refs(&self, refs: &[ComponentRef]) -> Result<()> {
        for r in refs {
            let ok = match *r {
                ComponentRef::FixedBc(i) => i < self.fixed_bcs.len(),
                ComponentRef::InitialCondition(i) => i < self.initial_conditions.len(),
                ComponentRef::PrescribedBc(i) => i < self.prescribed_bcs.len(),
                ComponentRef::NodalLoad(i) => i < self.nodal_loads.len(),
                ComponentRef::BodyLoad(i) => i < self.body_loads.len(),
                ComponentRef::ModelLoad(i) => i < self.model_loads.len(),
                ComponentRef::Constraint(i) => i < self.constraints.len(),
                ComponentRef::SurfaceLoad(i) => i < self.surface_loads.len(),
                ComponentRef::EdgeLoad(i) => i < self.edge_loads.len(),
                ComponentRef::Domain(i) => i < self.domains.len(),
                ComponentRef::Contact(i) => i < self.contacts.len(),
                ComponentRef::LinearConstraints => true,
            };
            if !ok {
                return Err(Error::Init(format!("{:?} does not exist", r)));
            }
        }
        Ok(())
    }

    /// Number the equations from the current DOF status.
    pub fn renumber(&mut self) -> Result<()> {
        let mut map = init_equations(&mut self.mesh, &self.registry, self.scheme)?;
        self.linear_constraints.assign_equations(&mut self.mesh, &mut map);
        self.equations = map;
        Ok(())
    }

    /// Whether some domain assembles a nonsymmetric stiffness.
    pub fn is_nonsymmetric(&self) -> bool {
        self.domains.iter().any(|d| d.capabilities().nonsymmetric)
    }

    /// Whether contact or nonlinear constraints add dynamic profile entries.
    pub fn has_dynamic_profile(&self) -> bool {
        self.contacts.iter().any(|c| c.is_active()) || self.constraints.iter().any(|c| c.is_active())
    }

    /// Build the matrix profile. `reset` rebuilds the static part from the
    /// domains and linear constraints; the dynamic entries of the active
    /// contact interfaces and nonlinear constraints are always added on top.
    pub fn build_matrix_profile(&self, gm: &mut GlobalMatrix, reset: bool) -> Result<()> {
        if reset || gm.static_profile().is_none() || gm.equations() != &self.equations {
            let mut b = ProfileBuilder::new(&self.equations);
            for d in &self.domains {
                d.build_matrix_profile(&self.mesh, &mut b);
            }
            self.linear_constraints.build_matrix_profile(&self.mesh, &mut b);
            gm.set_static_profile(&self.equations, b.finish());
        }
        let base = gm
            .static_profile()
            .cloned()
            .ok_or_else(|| Error::Assembly("static profile missing".into()))?;
        let mut b = ProfileBuilder::extend(&self.equations, base);
        for c in self.contacts.iter().filter(|c| c.is_active()) {
            c.build_matrix_profile(&self.mesh, &mut b);
        }
        for c in self.constraints.iter().filter(|c| c.is_active()) {
            c.build_matrix_profile(&self.mesh, &mut b);
        }
        gm.set_profile(b.finish())
    }

    fn context(&self) -> DomainContext<'_> {
        DomainContext {
            mesh: &self.mesh,
            materials: &self.materials,
            time: &self.time,
        }
    }

    /// Assemble R = f_ext − f_int.
    pub fn residual(&self, r: &mut GlobalVector) -> Result<()> {
        let ctx = self.context();
        for d in &self.domains {
            let caps = d.capabilities();
            if caps.internal_forces {
                match self.kind {
                    AnalysisKind::SteadyState => d.internal_forces_ss(&ctx, r)?,
                    _ => d.internal_forces(&ctx, r)?,
                }
            }
            if self.kind == AnalysisKind::Dynamic && caps.inertial_forces {
                d.inertial_forces(&ctx, r)?;
            }
        }
        for (i, d) in self.domains.iter().enumerate() {
            if !d.capabilities().body_force {
                continue;
            }
            for l in self.body_loads.iter().filter(|l| l.active && l.applies_to(i)) {
                d.body_force(&ctx, &l.value(&self.lc), r)?;
            }
        }
        for l in self.nodal_loads.iter().filter(|l| l.active) {
            l.residual(&self.mesh, &self.lc, r);
        }
        for l in self.model_loads.iter().filter(|l| l.active) {
            l.residual(&self.mesh, &self.lc, r);
        }
        for l in self.surface_loads.iter().filter(|l| l.active) {
            l.residual(&self.mesh, &self.lc, r);
        }
        for l in self.edge_loads.iter().filter(|l| l.active) {
            l.residual(&self.mesh, &self.lc, r);
        }
        for c in self.contacts.iter().filter(|c| c.is_active()) {
            c.residual(&self.mesh, r)?;
        }
        for c in self.constraints.iter().filter(|c| c.is_active()) {
            c.residual(&self.mesh, r)?;
        }
        Ok(())
    }

    /// Assemble the tangent into a zeroed matrix.
    pub fn stiffness(&self, k: &mut GlobalMatrix) -> Result<()> {
        let ctx = self.context();
        for d in &self.domains {
            let caps = d.capabilities();
            if caps.stiffness {
                match self.kind {
                    AnalysisKind::SteadyState => d.stiffness_matrix_ss(&ctx, k)?,
                    _ => d.stiffness_matrix(&ctx, k)?,
                }
            }
            if self.kind == AnalysisKind::Dynamic && caps.mass_matrix {
                let dt = self.time.time_increment;
                if dt <= 0.0 {
                    return Err(Error::Assembly("dynamic stiffness needs a positive time step".into()));
                }
                d.mass_matrix(&ctx, 1.0 / (self.time.beta * dt * dt), k)?;
            }
        }
        for c in self.contacts.iter().filter(|c| c.is_active()) {
            c.stiffness(&self.mesh, k)?;
        }
        for c in self.constraints.iter().filter(|c| c.is_active()) {
            c.stiffness(&self.mesh, k)?;
        }
        Ok(())
    }

    fn prescribed_targets(&self) -> Vec<(usize, usize, f64)> {
        self.prescribed_bcs
            .iter()
            .filter(|bc| bc.active)
            .flat_map(|bc| bc.targets(&self.lc))
            .filter(|&(n, d, _)| self.mesh.nodes[n].dofs[d].status == DofStatus::Prescribed)
            .collect()
    }

    /// Increment needed to reach the prescribed targets, per constrained
    /// slot (zero for fixed DOFs).
    pub fn prescribed_increments(&self) -> Vec<f64> {
        let mut du = vec![0.0; self.equations.n_constrained];
        for (n, d, target) in self.prescribed_targets() {
            let dof = &self.mesh.nodes[n].dofs[d];
            if let Some(EquationKind::Constrained(i)) = dof.equation.map(|id| self.equations.classify(id)) {
                du[i] = target - dof.value;
            }
        }
        du
    }

    /// Start a time point: predict the solution and refresh the material
    /// points from it.
    pub fn prep_step(&mut self) -> Result<()> {
        if self.kind == AnalysisKind::Dynamic {
            let dt = self.time.time_increment;
            let beta = self.time.beta;
            for node in self.mesh.nodes.iter_mut() {
                for d in node.dofs.iter_mut().filter(|d| d.active && d.status == DofStatus::Open) {
                    let pred = d.prev + dt * d.velocity_prev + dt * dt * (0.5 - beta) * d.accel_prev;
                    d.base = pred;
                    d.value = pred;
                }
            }
            self.update_kinematics();
        }
        self.linear_constraints.update(&mut self.mesh);
        self.update_state()
    }

    /// Newmark velocity and acceleration from the trial displacement.
    fn update_kinematics(&mut self) {
        if self.kind != AnalysisKind::Dynamic {
            return;
        }
        let TimeInfo {
            time_increment: dt,
            beta,
            gamma,
            ..
        } = self.time;
        for node in self.mesh.nodes.iter_mut() {
            for d in node.dofs.iter_mut().filter(|d| d.active) {
                d.accel = (d.value - d.prev) / (beta * dt * dt)
                    - d.velocity_prev / (beta * dt)
                    - (0.5 / beta - 1.0) * d.accel_prev;
                d.velocity = d.velocity_prev + dt * ((1.0 - gamma) * d.accel_prev + gamma * d.accel);
            }
        }
    }

    fn update_state(&mut self) -> Result<()> {
        let ctx = DomainContext {
            mesh: &self.mesh,
            materials: &self.materials,
            time: &self.time,
        };
        for d in self.domains.iter_mut() {
            if d.capabilities().update {
                d.update(&ctx)?;
            }
        }
        for c in self.contacts.iter_mut().filter(|c| c.is_active()) {
            c.update(&self.mesh)?;
        }
        for c in self.constraints.iter_mut().filter(|c| c.is_active()) {
            c.update(&self.mesh)?;
        }
        Ok(())
    }

    /// Apply the accumulated increment `du` (over the free equations) to
    /// the start values of the time point. With `apply_prescribed`,
    /// prescribed DOFs move to their targets.
    pub fn update(&mut self, du: &[f64], apply_prescribed: bool) -> Result<()> {
        if let Some(i) = du.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFinite(format!("increment of equation {}", i)));
        }
        let neq = self.equations.neq;
        for node in self.mesh.nodes.iter_mut() {
            for d in node.dofs.iter_mut() {
                if let Some(id) = d.equation.filter(|&id| id < neq) {
                    d.value = d.base + du[id];
                }
            }
        }
        if apply_prescribed {
            for (n, d, target) in self.prescribed_targets() {
                self.mesh.nodes[n].dofs[d].value = target;
            }
        }
        self.linear_constraints.update(&mut self.mesh);
        self.update_kinematics();
        self.update_state()
    }

    /// Whether any component takes part in augmentation.
    pub fn has_augmentations(&self) -> bool {
        self.has_dynamic_profile()
    }

    /// One augmentation pass; true when every component is satisfied.
    pub fn augment(&mut self, pass: usize) -> Result<bool> {
        let mut satisfied = true;
        for c in self.contacts.iter_mut().filter(|c| c.is_active()) {
            satisfied &= c.augment(&self.mesh, pass)?;
        }
        for c in self.constraints.iter_mut().filter(|c| c.is_active()) {
            satisfied &= c.augment(&self.mesh, pass)?;
        }
        Ok(satisfied)
    }

    /// Accept the trial state of the current time point.
    pub fn commit(&mut self) {
        self.mesh.commit();
        self.domains.iter_mut().for_each(|d| d.commit());
        self.contacts.iter_mut().for_each(|c| c.commit());
        self.constraints.iter_mut().for_each(|c| c.commit());
    }

    /// Discard the trial state and restore the last converged one.
    pub fn rollback(&mut self) -> Result<()> {
        self.mesh.rollback();
        self.domains.iter_mut().for_each(|d| d.rollback());
        self.contacts.iter_mut().for_each(|c| c.rollback());
        self.constraints.iter_mut().for_each(|c| c.rollback());
        for c in self.contacts.iter_mut().filter(|c| c.is_active()) {
            c.update(&self.mesh)?;
        }
        Ok(())
    }

    /// Reaction forces on the fixed and prescribed DOFs.
    pub fn reaction_forces(&self) -> Result<Vec<Reaction>> {
        let mut r = GlobalVector::new(&self.equations);
        self.residual(&mut r)?;
        let mut out = Vec::new();
        for (n, node) in self.mesh.nodes.iter().enumerate() {
            for (d, dof) in node.dofs.iter().enumerate() {
                if let Some(EquationKind::Constrained(i)) = dof.equation.map(|id| self.equations.classify(id)) {
                    out.push(Reaction { node: n, dof: d, force: -r.reactions[i] });
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::InitialValue;
    use crate::domain::{ElasticSolidDomain, Kinematics};
    use crate::load::LoadScale;
    use crate::material::LinearElastic;
    use crate::mesh::{ElementConnectivity, ElementType};
    use crate::types::Point3;
    use approx::assert_relative_eq;

    /// Unit tet fixed at the base, node 3 on top.
    fn tet_problem() -> Problem {
        let mut p = Problem::new(DofRegistry::solid());
        p.mesh.add_nodes([
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        p.materials.push(Box::new(LinearElastic::new(100.0, 0.25).unwrap()));
        let mut d = ElasticSolidDomain::new("solid", 0, Kinematics::SmallStrain);
        d.add_element(ElementConnectivity::new(ElementType::Tet4, vec![0, 1, 2, 3]).unwrap());
        p.domains.push(Box::new(d));
        p.fixed_bcs.push(FixedBc::new(vec![0, 1, 2], vec![0, 1, 2]));
        p
    }

    #[test]
    fn test_activation_numbers_free_dofs() {
        let mut p = tet_problem();
        p.init().unwrap();
        p.activate_in_order(&ACTIVATION_ORDER, &|_| true).unwrap();
        assert_eq!(p.equations().neq, 3);
        assert_eq!(p.equations().n_constrained, 9);
    }

    #[test]
    fn test_activation_order_matters_for_relative_bc() {
        let build = || {
            let mut p = tet_problem();
            p.initial_conditions.push(InitialCondition::new(vec![3], 2, InitialValue::Value(1.0)));
            p.prescribed_bcs.push(PrescribedBc::new(vec![3], 2, LoadScale::constant(0.5)).relative());
            p.init().unwrap();
            p
        };
        let mut forward = build();
        forward.activate_in_order(&ACTIVATION_ORDER, &|_| true).unwrap();
        let mut reversed = build();
        let mut order = ACTIVATION_ORDER;
        order.reverse();
        reversed.activate_in_order(&order, &|_| true).unwrap();

        assert_relative_eq!(forward.prescribed_increments()[9], 0.5);
        assert_relative_eq!(reversed.prescribed_increments()[9], -0.5);
    }

    #[test]
    fn test_profile_reset_matches_incremental() {
        let mut p = tet_problem();
        p.init().unwrap();
        p.activate_in_order(&ACTIVATION_ORDER, &|_| true).unwrap();
        let mut gm = GlobalMatrix::new(true);
        p.build_matrix_profile(&mut gm, true).unwrap();
        let full = gm.profile().cloned().unwrap();
        p.build_matrix_profile(&mut gm, false).unwrap();
        assert!(full.is_superset_of(gm.profile().unwrap()));
        assert_eq!(&full, gm.profile().unwrap());
    }

    #[test]
    fn test_unknown_component_reference() {
        let p = tet_problem();
        assert!(p.validate_refs(&[ComponentRef::PrescribedBc(0)]).is_err());
        assert!(p.validate_refs(&[ComponentRef::FixedBc(0)]).is_ok());
    }

    #[test]
    fn test_nodal_load_dof_checked_at_init() {
        let mut p = tet_problem();
        p.nodal_loads.push(NodalLoad::new(vec![3], 7, LoadScale::constant(1.0)));
        assert!(matches!(p.init(), Err(Error::Init(_))));
    }

    #[test]
    fn test_reaction_balances_nodal_load() {
        let mut p = tet_problem();
        p.nodal_loads.push(NodalLoad::new(vec![3], 2, LoadScale::constant(-2.0)));
        p.init().unwrap();
        p.activate_in_order(&ACTIVATION_ORDER, &|_| true).unwrap();
        // undeformed: internal forces vanish, so the load is not balanced yet
        let total: f64 = p
            .reaction_forces()
            .unwrap()
            .iter()
            .filter(|r| r.dof == 2)
            .map(|r| r.force)
            .sum();
        assert_relative_eq!(total, 0.0);
    }
}
