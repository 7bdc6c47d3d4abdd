//! Global residual and stiffness assembly.
//!
//! Element contributions are addressed by equation ids (see
//! [`crate::dof::EquationMap`]). Both assemblers apply the same routing:
//!
//! - `None` entries (unused DOFs) are skipped
//! - free ids scatter into the solved system
//! - constrained ids go to the reaction accumulator (residual) or to the
//!   prescribed-displacement correction `Fd` (stiffness)
//! - linked ids are expanded through the linear constraint coefficients
//!
//! Duplicate (row, col) pairs accumulate.

use nalgebra::DMatrix;

use crate::dof::{EquationKind, EquationMap};
use crate::error::Result;
use crate::sparse::{MatrixProfile, SystemMatrix};

/// Local element matrix with its row and column equation ids.
#[derive(Debug, Clone)]
pub struct ElementMatrix {
    pub rows: Vec<Option<usize>>,
    pub cols: Vec<Option<usize>>,
    pub ke: DMatrix<f64>,
}

impl ElementMatrix {
    /// Square contribution sharing rows and columns.
    pub fn square(lm: Vec<Option<usize>>, ke: DMatrix<f64>) -> Self {
        Self {
            rows: lm.clone(),
            cols: lm,
            ke,
        }
    }
}

/// Global residual with a separate reaction-force accumulator.
#[derive(Debug, Clone)]
pub struct GlobalVector<'a> {
    map: &'a EquationMap,
    /// Residual over the free equations.
    pub r: Vec<f64>,
    /// Reaction forces over the constrained slots.
    pub reactions: Vec<f64>,
    scratch: Vec<(usize, f64)>,
}

impl<'a> GlobalVector<'a> {
    pub fn new(map: &'a EquationMap) -> Self {
        Self {
            map,
            r: vec![0.0; map.neq],
            reactions: vec![0.0; map.n_constrained],
            scratch: Vec::new(),
        }
    }

    pub fn equations(&self) -> &EquationMap {
        self.map
    }

    /// Scatter-add a single value.
    pub fn add(&mut self, id: usize, value: f64) {
        self.scratch.clear();
        self.map.expand(id, 1.0, &mut self.scratch);
        for &(k, c) in &self.scratch {
            match self.map.classify(k) {
                EquationKind::Free(i) => self.r[i] += c * value,
                EquationKind::Constrained(i) => self.reactions[i] += c * value,
                EquationKind::Linked(_) => {}
            }
        }
    }

    /// Scatter-add a local vector.
    pub fn assemble(&mut self, lm: &[Option<usize>], fe: &[f64]) {
        debug_assert_eq!(lm.len(), fe.len());
        for (id, &v) in lm.iter().zip(fe) {
            if let Some(id) = *id {
                self.add(id, v);
            }
        }
    }
}

/// Collects the nonzero pattern of the free equations.
#[derive(Debug)]
pub struct ProfileBuilder<'a> {
    map: &'a EquationMap,
    profile: MatrixProfile,
}

impl<'a> ProfileBuilder<'a> {
    pub fn new(map: &'a EquationMap) -> Self {
        Self {
            map,
            profile: MatrixProfile::new(map.neq),
        }
    }

    /// Continue from an existing profile.
    pub fn extend(map: &'a EquationMap, profile: MatrixProfile) -> Self {
        Self { map, profile }
    }

    /// Couple all free equations reachable from `lm`.
    pub fn add(&mut self, lm: &[Option<usize>]) {
        let mut expanded = Vec::new();
        for id in lm.iter().flatten() {
            self.map.expand(*id, 1.0, &mut expanded);
        }
        let mut free: Vec<usize> = expanded
            .into_iter()
            .map(|(i, _)| i)
            .filter(|&i| i < self.map.neq)
            .collect();
        free.sort_unstable();
        free.dedup();
        self.profile.add_entries(&free);
    }

    pub fn finish(self) -> MatrixProfile {
        self.profile
    }
}

/// Global stiffness matrix together with its profile and the
/// prescribed-displacement correction `Fd`.
#[derive(Debug, Clone, Default)]
pub struct GlobalMatrix {
    symmetric: bool,
    map: EquationMap,
    static_profile: Option<MatrixProfile>,
    profile: Option<MatrixProfile>,
    matrix: Option<SystemMatrix>,
    prescribed: Vec<f64>,
    fd: Vec<f64>,
    version: u64,
}

impl GlobalMatrix {
    pub fn new(symmetric: bool) -> Self {
        Self {
            symmetric,
            ..Default::default()
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn equations(&self) -> &EquationMap {
        &self.map
    }

    /// Full profile built by the last `reset = true` pass.
    pub fn static_profile(&self) -> Option<&MatrixProfile> {
        self.static_profile.as_ref()
    }

    /// Profile the matrix is currently allocated with.
    pub fn profile(&self) -> Option<&MatrixProfile> {
        self.profile.as_ref()
    }

    /// Incremented whenever the pattern changes; solvers re-run their
    /// symbolic analysis when it moves.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_static_profile(&mut self, map: &EquationMap, profile: MatrixProfile) {
        self.map = map.clone();
        self.prescribed = vec![0.0; map.n_constrained];
        self.fd = vec![0.0; map.neq];
        self.static_profile = Some(profile);
    }

    /// Allocate the matrix for `profile`. An unchanged profile keeps the
    /// current allocation and version.
    pub fn set_profile(&mut self, profile: MatrixProfile) -> Result<()> {
        if self.profile.as_ref() == Some(&profile) && self.matrix.is_some() {
            return Ok(());
        }
        self.matrix = Some(SystemMatrix::new(&profile, self.symmetric)?);
        self.profile = Some(profile);
        self.version += 1;
        Ok(())
    }

    /// Prescribed increment per constrained slot, used for `Fd`.
    pub fn set_prescribed(&mut self, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.map.n_constrained);
        self.prescribed = values;
    }

    pub fn clear_prescribed(&mut self) {
        self.prescribed.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn has_prescribed(&self) -> bool {
        self.prescribed.iter().any(|v| *v != 0.0)
    }

    /// Prescribed-displacement correction from the last assembly.
    pub fn fd(&self) -> &[f64] {
        &self.fd
    }

    /// Zero the matrix and `Fd` ahead of a reform.
    pub fn zero(&mut self) {
        if let Some(m) = self.matrix.as_mut() {
            m.zero();
        }
        self.fd.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn matrix(&self) -> Option<&SystemMatrix> {
        self.matrix.as_ref()
    }

    /// Scatter-add a local matrix.
    ///
    /// # Panics
    ///
    /// Panics when called before a profile was built.
    pub fn assemble(&mut self, rows: &[Option<usize>], cols: &[Option<usize>], ke: &DMatrix<f64>) {
        let matrix = self
            .matrix
            .as_mut()
            .unwrap_or_else(|| panic!("stiffness assembled before the matrix profile was built"));
        let neq = self.map.neq;

        let expand = |lm: &[Option<usize>]| -> Vec<Vec<(usize, f64)>> {
            lm.iter()
                .map(|id| {
                    let mut out = Vec::new();
                    if let Some(id) = id {
                        self.map.expand(*id, 1.0, &mut out);
                    }
                    out
                })
                .collect()
        };
        let erows = expand(rows);
        let ecols = expand(cols);

        for (a, row) in erows.iter().enumerate() {
            for &(i, ca) in row.iter().filter(|(i, _)| *i < neq) {
                for (b, col) in ecols.iter().enumerate() {
                    let kab = ke[(a, b)];
                    if kab == 0.0 {
                        continue;
                    }
                    for &(j, cb) in col {
                        let k = ca * cb * kab;
                        if j < neq {
                            if !(self.symmetric && j > i) {
                                matrix.add(i, j, k);
                            }
                        } else {
                            let du = self.prescribed.get(j - neq).copied().unwrap_or(0.0);
                            if du != 0.0 {
                                self.fd[i] -= k * du;
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn assemble_element(&mut self, em: &ElementMatrix) {
        self.assemble(&em.rows, &em.cols, &em.ke);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn map() -> EquationMap {
        EquationMap {
            neq: 3,
            n_constrained: 2,
            partitions: vec![],
            links: vec![vec![(0, 0.5), (1, 0.5)]],
        }
    }

    #[test]
    fn test_residual_skips_none() {
        let m = map();
        let mut gv = GlobalVector::new(&m);
        gv.assemble(&[None, Some(1), None], &[100.0, 2.0, -7.0]);
        assert_eq!(gv.r, vec![0.0, 2.0, 0.0]);
        assert!(gv.reactions.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_residual_routes_reactions_and_links() {
        let m = map();
        let mut gv = GlobalVector::new(&m);
        gv.assemble(&[Some(4), Some(5), Some(2)], &[3.0, 4.0, 1.0]);
        assert_eq!(gv.reactions, vec![0.0, 3.0]);
        assert_eq!(gv.r, vec![2.0, 2.0, 1.0]);
    }

    #[test]
    #[should_panic(expected = "before the matrix profile")]
    fn test_assemble_without_profile_panics() {
        let mut gm = GlobalMatrix::new(false);
        gm.assemble(&[Some(0)], &[Some(0)], &DMatrix::from_element(1, 1, 1.0));
    }

    #[test]
    fn test_duplicates_accumulate_and_fd() {
        let m = map();
        let mut b = ProfileBuilder::new(&m);
        b.add(&[Some(0), Some(1), Some(3)]);
        let mut gm = GlobalMatrix::new(false);
        let p = b.finish();
        gm.set_static_profile(&m, p.clone());
        gm.set_profile(p).unwrap();
        gm.set_prescribed(vec![0.1, 0.0]);
        gm.zero();

        let lm = vec![Some(0), Some(3)];
        let ke = DMatrix::from_row_slice(2, 2, &[2.0, -2.0, -2.0, 2.0]);
        gm.assemble(&lm, &lm, &ke);
        gm.assemble(&lm, &lm, &ke);

        let k = gm.matrix().unwrap();
        assert_relative_eq!(k.get(0, 0), 4.0);
        // Fd_0 = -(k_03 * du_3) summed twice
        assert_relative_eq!(gm.fd()[0], 0.4, epsilon = 1e-15);
    }

    #[test]
    fn test_profile_version_only_moves_on_change() {
        let m = map();
        let mut gm = GlobalMatrix::new(true);
        let p = ProfileBuilder::new(&m).finish();
        gm.set_static_profile(&m, p.clone());
        gm.set_profile(p.clone()).unwrap();
        let v = gm.version();
        gm.set_profile(p).unwrap();
        assert_eq!(gm.version(), v);
    }
}
