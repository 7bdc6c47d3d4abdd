//! Linear system solvers.
//!
//! The Newton core treats the linear solver as a black box behind
//! [`LinearSolver`]: a symbolic `pre_process` whenever the matrix profile
//! changes, a numeric `factor` on every reformation and any number of
//! `back_solve` calls against the last factorization (quasi-Newton
//! iterations reuse it).
//!
//! # Solver Backends
//!
//! - [`FaerCholeskySolver`]: sparse LLᵀ with cached symbolic analysis. Reads
//!   the lower triangle only; the matrix must be symmetric positive definite.
//! - [`FaerLuSolver`]: sparse LU for nonsymmetric systems (biphasic coupling).
//! - [`DenseLuSolver`]: nalgebra dense LU, for small systems and tests.
//! - [`SchurSolver`](crate::schur::SchurSolver): block solver for
//!   partitioned saddle-point systems.

use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt, SymbolicLu};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat, Triplet};
use nalgebra::{DVector, Dyn, LU};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schur::SchurSolver;
use crate::sparse::{CsrMatrix, SystemMatrix};

/// Linear solver interface.
pub trait LinearSolver: Send + Sync {
    /// Solver name for diagnostics.
    fn name(&self) -> &str;

    /// Symbolic analysis of the matrix pattern. Called after every profile
    /// change; must be called before `factor`.
    fn pre_process(&mut self, matrix: &SystemMatrix) -> Result<()>;

    /// Numeric factorization.
    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()>;

    /// Solve against the last factorization.
    fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>>;

    /// Block sizes of a partitioned equation numbering.
    fn set_partitions(&mut self, _partitions: &[usize]) {}

    /// Whether the solver only reads the lower triangle.
    fn requires_symmetric(&self) -> bool {
        false
    }

    /// Pre-process, factor and solve in one call.
    fn solve(&mut self, matrix: &SystemMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        self.pre_process(matrix)?;
        self.factor(matrix)?;
        self.back_solve(rhs)
    }
}

/// Solver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Cholesky for symmetric storage, LU otherwise.
    #[default]
    Auto,
    Cholesky,
    Lu,
    DenseLu,
    /// Schur complement over a two-block partition.
    Schur,
}

/// Create a solver for the given kind and storage mode.
pub fn select_solver(kind: LinearSolverKind, symmetric: bool) -> Box<dyn LinearSolver> {
    match kind {
        LinearSolverKind::Auto if symmetric => Box::new(FaerCholeskySolver::new()),
        LinearSolverKind::Auto => Box::new(FaerLuSolver::new()),
        LinearSolverKind::Cholesky => Box::new(FaerCholeskySolver::new()),
        LinearSolverKind::Lu => Box::new(FaerLuSolver::new()),
        LinearSolverKind::DenseLu => Box::new(DenseLuSolver::new()),
        LinearSolverKind::Schur => Box::new(SchurSolver::new()),
    }
}

fn check_rhs(n: usize, rhs: &[f64]) -> Result<()> {
    if n != rhs.len() {
        return Err(Error::Solver(format!("RHS size mismatch: {} != {}", rhs.len(), n)));
    }
    Ok(())
}

fn check_finite(x: Vec<f64>) -> Result<Vec<f64>> {
    match x.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(Error::NonFinite(format!("solution entry {}", i))),
        None => Ok(x),
    }
}

/// Convert a nalgebra-sparse CSR matrix to faer CSC with the same entries.
///
/// Each CSR row becomes scattered over the CSC columns, so the stored
/// triangle is preserved.
pub(crate) fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let nrows = csr.nrows();
    let ncols = csr.ncols();
    let row_offsets = csr.row_offsets();
    let col_indices = csr.col_indices();
    let values = csr.values();

    let mut col_offsets = vec![0usize; ncols + 1];
    for &col in col_indices {
        col_offsets[col + 1] += 1;
    }
    for i in 0..ncols {
        col_offsets[i + 1] += col_offsets[i];
    }

    let nnz = values.len();
    let mut row_indices = vec![0usize; nnz];
    let mut csc_values = vec![0.0f64; nnz];
    let mut next = col_offsets[..ncols].to_vec();
    for row in 0..nrows {
        for idx in row_offsets[row]..row_offsets[row + 1] {
            let col = col_indices[idx];
            row_indices[next[col]] = row;
            csc_values[next[col]] = values[idx];
            next[col] += 1;
        }
    }

    // SAFETY: offsets are monotone and rows within each column are sorted
    // because CSR rows are visited in order.
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(nrows, ncols, col_offsets, None, row_indices),
            csc_values,
        )
    }
}

/// Full (both triangles) CSC copy of a system matrix.
pub(crate) fn full_csc(matrix: &SystemMatrix) -> Result<SparseColMat<usize, f64>> {
    if !matrix.is_symmetric() {
        return Ok(csr_to_faer_csc(matrix.csr()));
    }
    let n = matrix.nrows();
    let triplets: Vec<_> = matrix
        .triplets(true)
        .into_iter()
        .map(|(i, j, v)| Triplet::new(i, j, v))
        .collect();
    SparseColMat::try_new_from_triplets(n, n, &triplets)
        .map_err(|e| Error::Solver(format!("invalid sparse matrix: {:?}", e)))
}

/// Sparse Cholesky solver using the faer library.
///
/// The symbolic analysis is cached until the next `pre_process`; numeric
/// factorizations reuse it.
#[derive(Default)]
pub struct FaerCholeskySolver {
    symbolic: Option<SymbolicLlt<usize>>,
    llt: Option<Llt<usize, f64>>,
    n: usize,
}

impl FaerCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for FaerCholeskySolver {
    fn name(&self) -> &str {
        "faer Sparse Cholesky (LLᵀ)"
    }

    fn pre_process(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let csc = csr_to_faer_csc(matrix.csr());
        let symbolic = SymbolicLlt::try_new(csc.as_ref().symbolic(), faer::Side::Lower)
            .map_err(|_| Error::Solver("Symbolic Cholesky analysis failed".into()))?;
        self.symbolic = Some(symbolic);
        self.llt = None;
        self.n = matrix.nrows();
        Ok(())
    }

    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or_else(|| Error::Solver("factor called before pre_process".into()))?;
        if matrix.nrows() != self.n {
            return Err(Error::Solver("matrix size changed since pre_process".into()));
        }
        let csc = csr_to_faer_csc(matrix.csr());
        let llt = Llt::try_new_with_symbolic(symbolic.clone(), csc.as_ref(), faer::Side::Lower)
            .map_err(|e| match e {
                SparseLltError::Generic(err) => {
                    Error::Solver(format!("Sparse Cholesky error: {:?}", err))
                }
                SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                    Error::SingularMatrix(format!(
                        "Matrix is not positive definite at pivot {}",
                        index
                    ))
                }
            })?;
        self.llt = Some(llt);
        Ok(())
    }

    fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let llt = self
            .llt
            .as_ref()
            .ok_or_else(|| Error::Solver("back_solve called before factor".into()))?;
        check_rhs(self.n, rhs)?;
        let mut x = faer::Mat::from_fn(self.n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());
        check_finite((0..self.n).map(|i| x[(i, 0)]).collect())
    }

    fn requires_symmetric(&self) -> bool {
        true
    }
}

/// Sparse LU solver using the faer library.
#[derive(Default)]
pub struct FaerLuSolver {
    symbolic: Option<SymbolicLu<usize>>,
    lu: Option<Lu<usize, f64>>,
    n: usize,
}

impl FaerLuSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for FaerLuSolver {
    fn name(&self) -> &str {
        "faer Sparse LU"
    }

    fn pre_process(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let csc = full_csc(matrix)?;
        let symbolic = SymbolicLu::try_new(csc.symbolic())
            .map_err(|e| Error::Solver(format!("Symbolic LU analysis failed: {:?}", e)))?;
        self.symbolic = Some(symbolic);
        self.lu = None;
        self.n = matrix.nrows();
        Ok(())
    }

    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or_else(|| Error::Solver("factor called before pre_process".into()))?;
        let csc = full_csc(matrix)?;
        let lu = Lu::try_new_with_symbolic(symbolic.clone(), csc.as_ref())
            .map_err(|e| Error::SingularMatrix(format!("sparse LU failed: {:?}", e)))?;
        self.lu = Some(lu);
        Ok(())
    }

    fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| Error::Solver("back_solve called before factor".into()))?;
        check_rhs(self.n, rhs)?;
        let mut x = faer::Mat::from_fn(self.n, 1, |i, _| rhs[i]);
        lu.solve_in_place(x.as_mut());
        check_finite((0..self.n).map(|i| x[(i, 0)]).collect())
    }
}

/// Dense LU using nalgebra (small problems only).
#[derive(Default)]
pub struct DenseLuSolver {
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl DenseLuSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for DenseLuSolver {
    fn name(&self) -> &str {
        "Dense LU"
    }

    fn pre_process(&mut self, _matrix: &SystemMatrix) -> Result<()> {
        self.lu = None;
        Ok(())
    }

    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let lu = matrix.to_dense().lu();
        if !lu.is_invertible() {
            return Err(Error::SingularMatrix("LU factorization failed".into()));
        }
        self.lu = Some(lu);
        Ok(())
    }

    fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| Error::Solver("back_solve called before factor".into()))?;
        check_rhs(lu.l().nrows(), rhs)?;
        let x = lu
            .solve(&DVector::from_column_slice(rhs))
            .ok_or_else(|| Error::SingularMatrix("LU back substitution failed".into()))?;
        check_finite(x.as_slice().to_vec())
    }
}
