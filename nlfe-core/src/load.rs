//! Load controllers and external loads.
//!
//! A [`LoadController`] maps time to a scalar; loads and prescribed BCs
//! reference one by index through a [`LoadScale`]. External loads add to
//! the residual only (reference-configuration loads, no stiffness).

use serde::{Deserialize, Serialize};

use crate::assembly::GlobalVector;
use crate::boundary::check_dof;
use crate::element::facet::{edge_tangent, facet_normal};
use crate::element::integration_rule;
use crate::error::{Error, Result};
use crate::mesh::{ElementConnectivity, ElementType, Mesh};
use crate::types::Vec3;

/// Interpolation between load curve points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
}

/// Piecewise load curve with constant extrapolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadCurve {
    points: Vec<(f64, f64)>,
    interpolation: Interpolation,
}

impl LoadCurve {
    /// Points must be sorted by time.
    pub fn new(points: Vec<(f64, f64)>, interpolation: Interpolation) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Init("load curve needs at least one point".into()));
        }
        if points.windows(2).any(|w| w[1].0 < w[0].0) {
            return Err(Error::Init("load curve times must be increasing".into()));
        }
        Ok(Self { points, interpolation })
    }

    /// Linear ramp from 0 at t=0 to 1 at `t1`.
    pub fn ramp(t1: f64) -> Self {
        Self {
            points: vec![(0.0, 0.0), (t1, 1.0)],
            interpolation: Interpolation::Linear,
        }
    }

    pub fn value(&self, t: f64) -> f64 {
        let pts = &self.points;
        let (first, last) = (pts[0], pts[pts.len() - 1]);
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        let k = pts.partition_point(|p| p.0 <= t);
        let (p0, p1) = (pts[k - 1], pts[k]);
        match self.interpolation {
            Interpolation::Step => p0.1,
            Interpolation::Linear => {
                let s = (t - p0.0) / (p1.0 - p0.0);
                p0.1 + s * (p1.1 - p0.1)
            }
        }
    }
}

/// Time function driving loads and prescribed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadController {
    Constant(f64),
    Curve(LoadCurve),
}

impl LoadController {
    pub fn type_tag(&self) -> &'static str {
        match self {
            LoadController::Constant(_) => "constant",
            LoadController::Curve(_) => "loadcurve",
        }
    }

    pub fn value(&self, t: f64) -> f64 {
        match self {
            LoadController::Constant(v) => *v,
            LoadController::Curve(c) => c.value(t),
        }
    }
}

/// Controller values evaluated at the current time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerValues(pub Vec<f64>);

impl ControllerValues {
    pub fn evaluate(controllers: &[LoadController], t: f64) -> Self {
        Self(controllers.iter().map(|c| c.value(t)).collect())
    }
}

/// A scale factor, optionally multiplied by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadScale {
    pub value: f64,
    pub controller: Option<usize>,
}

impl LoadScale {
    pub fn constant(value: f64) -> Self {
        Self { value, controller: None }
    }

    pub fn controlled(value: f64, controller: usize) -> Self {
        Self {
            value,
            controller: Some(controller),
        }
    }

    pub fn eval(&self, lc: &ControllerValues) -> f64 {
        match self.controller {
            Some(i) => self.value * lc.0.get(i).copied().unwrap_or(0.0),
            None => self.value,
        }
    }

    /// Check the controller reference.
    pub fn validate(&self, n_controllers: usize) -> Result<()> {
        match self.controller {
            Some(i) if i >= n_controllers => Err(Error::Init(format!(
                "load controller {} does not exist ({} defined)",
                i, n_controllers
            ))),
            _ => Ok(()),
        }
    }
}

/// Concentrated nodal force on one DOF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodalLoad {
    pub nodes: Vec<usize>,
    pub dof: usize,
    pub scale: LoadScale,
    pub active: bool,
}

impl NodalLoad {
    pub const TAG: &'static str = "nodal_load";

    pub fn new(nodes: Vec<usize>, dof: usize, scale: LoadScale) -> Self {
        Self { nodes, dof, scale, active: false }
    }

    pub fn init(&self, mesh: &Mesh, n_controllers: usize) -> Result<()> {
        mesh.validate_nodes(&self.nodes)?;
        check_dof(mesh, self.dof)?;
        self.scale.validate(n_controllers)
    }

    pub fn residual(&self, mesh: &Mesh, lc: &ControllerValues, r: &mut GlobalVector) {
        let f = self.scale.eval(lc);
        for &n in &self.nodes {
            if let Some(id) = mesh.nodes[n].dofs[self.dof].equation {
                r.add(id, f);
            }
        }
    }
}

/// Pressure on Tri3/Quad4 facets, acting against the facet normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceLoad {
    pub facets: Vec<ElementConnectivity>,
    pub pressure: LoadScale,
    pub active: bool,
}

impl SurfaceLoad {
    pub const TAG: &'static str = "pressure";

    pub fn new(facets: Vec<ElementConnectivity>, pressure: LoadScale) -> Result<Self> {
        if let Some(f) = facets
            .iter()
            .find(|f| !matches!(f.element_type, ElementType::Tri3 | ElementType::Quad4))
        {
            return Err(Error::Init(format!("{:?} is not a surface facet", f.element_type)));
        }
        Ok(Self { facets, pressure, active: false })
    }

    pub fn residual(&self, mesh: &Mesh, lc: &ControllerValues, r: &mut GlobalVector) {
        let p = self.pressure.eval(lc);
        for facet in &self.facets {
            let x0 = mesh.coords(&facet.nodes);
            let mut fe = vec![0.0; 3 * facet.nodes.len()];
            for gp in &integration_rule(facet.element_type).points {
                let n = facet_normal(&x0, &gp.dn);
                for (a, na) in gp.n.iter().enumerate() {
                    for i in 0..3 {
                        fe[3 * a + i] -= p * na * n[i] * gp.weight;
                    }
                }
            }
            r.assemble(&mesh.lm(&facet.nodes, &[0, 1, 2]), &fe);
        }
    }
}

/// Constant traction per unit length along 2-node edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeLoad {
    pub edges: Vec<[usize; 2]>,
    pub traction: Vec3,
    pub scale: LoadScale,
    pub active: bool,
}

impl EdgeLoad {
    pub const TAG: &'static str = "edge_load";

    pub fn new(edges: Vec<[usize; 2]>, traction: Vec3, scale: LoadScale) -> Self {
        Self { edges, traction, scale, active: false }
    }

    pub fn residual(&self, mesh: &Mesh, lc: &ControllerValues, r: &mut GlobalVector) {
        let t = self.traction * self.scale.eval(lc);
        for edge in &self.edges {
            let x0 = mesh.coords(edge);
            let mut fe = [0.0; 6];
            for gp in &integration_rule(ElementType::Line2).points {
                let jac = edge_tangent(&x0, &gp.dn).norm();
                for (a, na) in gp.n.iter().enumerate() {
                    for i in 0..3 {
                        fe[3 * a + i] += na * t[i] * jac * gp.weight;
                    }
                }
            }
            r.assemble(&mesh.lm(edge, &[0, 1, 2]), &fe);
        }
    }
}

/// Body acceleration applied through the domains' body-force capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyLoad {
    pub acceleration: Vec3,
    pub scale: LoadScale,
    /// Restrict to these domains; all domains when `None`.
    pub domains: Option<Vec<usize>>,
    pub active: bool,
}

impl BodyLoad {
    pub const TAG: &'static str = "body_force";

    pub fn new(acceleration: Vec3, scale: LoadScale) -> Self {
        Self {
            acceleration,
            scale,
            domains: None,
            active: false,
        }
    }

    pub fn applies_to(&self, domain: usize) -> bool {
        self.domains.as_ref().map_or(true, |d| d.contains(&domain))
    }

    pub fn value(&self, lc: &ControllerValues) -> Vec3 {
        self.acceleration * self.scale.eval(lc)
    }
}

/// Total force spread evenly over a node set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLoad {
    pub nodes: Vec<usize>,
    pub force: Vec3,
    pub scale: LoadScale,
    pub active: bool,
}

impl ModelLoad {
    pub const TAG: &'static str = "distributed_force";

    pub fn new(nodes: Vec<usize>, force: Vec3, scale: LoadScale) -> Self {
        Self { nodes, force, scale, active: false }
    }

    pub fn residual(&self, mesh: &Mesh, lc: &ControllerValues, r: &mut GlobalVector) {
        if self.nodes.is_empty() {
            return;
        }
        let f = self.force * (self.scale.eval(lc) / self.nodes.len() as f64);
        for &n in &self.nodes {
            r.assemble(&mesh.lm(&[n], &[0, 1, 2]), f.as_slice());
        }
    }
}

/// Named global data block (e.g. ambient fluid properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalData {
    pub type_tag: String,
    pub name: String,
    pub values: Vec<(String, f64)>,
}
