//! Sparse matrix structures.
//!
//! - [`MatrixProfile`]: the nonzero pattern of the global stiffness matrix,
//!   built from element, linear constraint and contact connectivity
//! - [`SystemMatrix`]: a CSR matrix whose pattern is fixed by a profile,
//!   optionally storing only the lower triangle
//! - [`TripletMatrix`]: COO builder, used for sub-block extraction

use nalgebra::DMatrix;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

use crate::error::{Error, Result};

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Nonzero pattern over the free equations.
///
/// Every row always holds its diagonal entry. Rows are kept sorted, so
/// re-adding an existing entry is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixProfile {
    rows: Vec<Vec<usize>>,
}

impl MatrixProfile {
    /// Diagonal profile of size `n`.
    pub fn new(n: usize) -> Self {
        Self {
            rows: (0..n).map(|i| vec![i]).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Couple every pair of the given free equations.
    pub fn add_entries(&mut self, equations: &[usize]) {
        for &i in equations {
            let row = &mut self.rows[i];
            for &j in equations {
                if let Err(pos) = row.binary_search(&j) {
                    row.insert(pos, j);
                }
            }
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows
            .get(row)
            .is_some_and(|r| r.binary_search(&col).is_ok())
    }

    /// True when every entry of `other` is also present here.
    pub fn is_superset_of(&self, other: &MatrixProfile) -> bool {
        other.size() <= self.size()
            && other
                .rows
                .iter()
                .enumerate()
                .all(|(i, r)| r.iter().all(|&j| self.contains(i, j)))
    }

    /// Number of stored entries (full storage).
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Zero-valued CSR matrix with this pattern.
    pub fn to_csr(&self, symmetric: bool) -> Result<CsrMatrix> {
        let n = self.size();
        let mut offsets = Vec::with_capacity(n + 1);
        let mut indices = Vec::with_capacity(self.nnz());
        offsets.push(0);
        for (i, row) in self.rows.iter().enumerate() {
            indices.extend(row.iter().copied().filter(|&j| !symmetric || j <= i));
            offsets.push(indices.len());
        }
        let values = vec![0.0; indices.len()];
        CsrMatrix::try_from_csr_data(n, n, offsets, indices, values)
            .map_err(|e| Error::Assembly(format!("invalid matrix profile: {}", e)))
    }
}

/// Global system matrix with a fixed sparsity pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMatrix {
    csr: CsrMatrix,
    symmetric: bool,
}

impl SystemMatrix {
    pub fn new(profile: &MatrixProfile, symmetric: bool) -> Result<Self> {
        Ok(Self {
            csr: profile.to_csr(symmetric)?,
            symmetric,
        })
    }

    /// Only the lower triangle is stored.
    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn nrows(&self) -> usize {
        self.csr.nrows()
    }

    pub fn csr(&self) -> &CsrMatrix {
        &self.csr
    }

    pub fn zero(&mut self) {
        self.csr.values_mut().iter_mut().for_each(|v| *v = 0.0);
    }

    /// Accumulate into an entry.
    ///
    /// # Panics
    ///
    /// Panics when (row, col) lies outside the pattern; assembly must only
    /// touch entries the profile declared.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        let mut r = self.csr.row_mut(row);
        let (cols, vals) = r.cols_and_values_mut();
        match cols.binary_search(&col) {
            Ok(k) => vals[k] += value,
            Err(_) => panic!("entry ({}, {}) is outside the matrix profile", row, col),
        }
    }

    /// Stored value, zero if not in the pattern.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (row, col) = if self.symmetric && col > row { (col, row) } else { (row, col) };
        let r = self.csr.row(row);
        r.col_indices()
            .binary_search(&col)
            .map(|k| r.values()[k])
            .unwrap_or(0.0)
    }

    /// y = A x, mirroring the lower triangle in symmetric storage.
    pub fn mult_vector(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.nrows()];
        for (i, row) in self.csr.row_iter().enumerate() {
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                y[i] += v * x[j];
                if self.symmetric && j != i {
                    y[j] += v * x[i];
                }
            }
        }
        y
    }

    /// Entries as (row, col, value), expanded to both triangles when `full`.
    pub fn triplets(&self, full: bool) -> Vec<(usize, usize, f64)> {
        let mut out = Vec::with_capacity(self.csr.nnz() * if full { 2 } else { 1 });
        for (i, row) in self.csr.row_iter().enumerate() {
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                out.push((i, j, v));
                if full && self.symmetric && j != i {
                    out.push((j, i, v));
                }
            }
        }
        out
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.nrows();
        let mut m = DMatrix::zeros(n, n);
        for (i, j, v) in self.triplets(true) {
            m[(i, j)] += v;
        }
        m
    }
}

/// Builder for assembling a sparse matrix from triplets (COO format).
///
/// Duplicates are summed during conversion.
#[derive(Debug, Clone, Default)]
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            ..Default::default()
        }
    }

    /// Add a value at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Convert to CSR format, summing duplicate entries.
    pub fn to_csr(self) -> Result<CsrMatrix> {
        let coo = CooMatrix::try_from_triplets(
            self.n_rows,
            self.n_cols,
            self.rows,
            self.cols,
            self.values,
        )
        .map_err(|e| Error::Assembly(format!("invalid triplet data: {}", e)))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// y = A x for a general CSR matrix.
pub fn csr_mult(a: &CsrMatrix, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum()
        })
        .collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chain_profile() -> MatrixProfile {
        let mut p = MatrixProfile::new(4);
        p.add_entries(&[0, 1]);
        p.add_entries(&[1, 2]);
        p
    }

    #[test]
    fn test_profile_idempotent() {
        let mut p = chain_profile();
        let before = p.clone();
        p.add_entries(&[2, 1]);
        assert_eq!(p, before);
        assert_eq!(p.nnz(), 4 + 4);
    }

    #[test]
    fn test_profile_superset() {
        let p = chain_profile();
        let mut q = p.clone();
        q.add_entries(&[0, 3]);
        assert!(q.is_superset_of(&p));
        assert!(!p.is_superset_of(&q));
    }

    #[test]
    fn test_symmetric_storage_mult() {
        let p = chain_profile();
        let mut k = SystemMatrix::new(&p, true).unwrap();
        k.add(0, 0, 2.0);
        k.add(1, 0, -1.0);
        k.add(1, 1, 2.0);
        k.add(2, 1, -1.0);
        k.add(2, 2, 2.0);
        k.add(3, 3, 1.0);
        let y = k.mult_vector(&[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(y, vec![1.0, 0.0, 1.0, 1.0]);
        assert_eq!(k.get(0, 1), -1.0);
        assert_relative_eq!(k.to_dense()[(1, 2)], -1.0);
    }

    #[test]
    #[should_panic(expected = "outside the matrix profile")]
    fn test_add_outside_profile_panics() {
        let mut k = SystemMatrix::new(&chain_profile(), false).unwrap();
        k.add(0, 3, 1.0);
    }

    #[test]
    fn test_triplet_duplicates_summed() {
        let mut t = TripletMatrix::new(2, 2);
        t.add(0, 1, 1.5);
        t.add(0, 1, 2.5);
        let csr = t.to_csr().unwrap();
        assert_eq!(csr_mult(&csr, &[0.0, 1.0]), vec![4.0, 0.0]);
    }
}
