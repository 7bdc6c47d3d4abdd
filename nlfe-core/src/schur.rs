//! Schur complement block solver.
//!
//! For a two-block system
//!
//! ```text
//! | A  B | | x |   | f |
//! | C  D | | y | = | g |
//! ```
//!
//! the complement `S = C A⁻¹ B − D` gives `S y = C A⁻¹ f − g` and then
//! `x = A⁻¹ (f − B y)`. The block sizes come from a
//! [`EquationScheme::Block`](crate::dof::EquationScheme::Block) numbering:
//! the first partition is `A`, the remaining partitions form `D`.

use nalgebra::{DMatrix, DVector, Dyn, LU};

use crate::error::{Error, Result};
use crate::solver::{select_solver, LinearSolver, LinearSolverKind};
use crate::sparse::{csr_mult, CsrMatrix, MatrixProfile, SystemMatrix, TripletMatrix};

/// Operator S = C A⁻¹ B − D over the second block.
pub struct SchurComplement {
    a: Box<dyn LinearSolver>,
    b: CsrMatrix,
    c: CsrMatrix,
    d: Option<CsrMatrix>,
    n_a: usize,
    n_b: usize,
}

impl SchurComplement {
    /// Split `matrix` after the first `n_a` equations and factor `A`.
    pub fn new(matrix: &SystemMatrix, n_a: usize) -> Result<Self> {
        let n = matrix.nrows();
        if n_a == 0 || n_a >= n {
            return Err(Error::Solver(format!(
                "invalid Schur partition {} of {} equations",
                n_a, n
            )));
        }
        let n_b = n - n_a;
        let symmetric = matrix.is_symmetric();

        let full = matrix.triplets(true);
        let mut profile = MatrixProfile::new(n_a);
        for &(i, j, _) in &full {
            if i < n_a && j < n_a {
                profile.add_entries(&[i, j]);
            }
        }
        let mut a = SystemMatrix::new(&profile, symmetric)?;
        let mut b = TripletMatrix::new(n_a, n_b);
        let mut c = TripletMatrix::new(n_b, n_a);
        let mut d = TripletMatrix::new(n_b, n_b);
        for (i, j, v) in full {
            match (i < n_a, j < n_a) {
                (true, true) => {
                    if !symmetric || j <= i {
                        a.add(i, j, v);
                    }
                }
                (true, false) => b.add(i, j - n_a, v),
                (false, true) => c.add(i - n_a, j, v),
                (false, false) => d.add(i - n_a, j - n_a, v),
            }
        }

        let mut solver = select_solver(LinearSolverKind::Auto, symmetric);
        solver.pre_process(&a)?;
        solver.factor(&a)?;
        let d = if d.nnz() > 0 { Some(d.to_csr()?) } else { None };
        Ok(Self {
            a: solver,
            b: b.to_csr()?,
            c: c.to_csr()?,
            d,
            n_a,
            n_b,
        })
    }

    /// Size of the complement.
    pub fn size(&self) -> usize {
        self.n_b
    }

    /// r = C A⁻¹ B x − D x
    pub fn mult_vector(&self, x: &[f64]) -> Result<Vec<f64>> {
        let tmp = self.a.back_solve(&csr_mult(&self.b, x))?;
        let mut r = csr_mult(&self.c, &tmp);
        if let Some(d) = &self.d {
            for (ri, di) in r.iter_mut().zip(csr_mult(d, x)) {
                *ri -= di;
            }
        }
        Ok(r)
    }

    /// Dense S assembled column by column.
    pub fn to_dense(&self) -> Result<DMatrix<f64>> {
        let mut s = DMatrix::zeros(self.n_b, self.n_b);
        let mut e = vec![0.0; self.n_b];
        for j in 0..self.n_b {
            e[j] = 1.0;
            let col = self.mult_vector(&e)?;
            s.column_mut(j).copy_from_slice(&col);
            e[j] = 0.0;
        }
        Ok(s)
    }
}

/// Block solver built on [`SchurComplement`].
#[derive(Default)]
pub struct SchurSolver {
    partitions: Vec<usize>,
    complement: Option<SchurComplement>,
    s_lu: Option<LU<f64, Dyn, Dyn>>,
}

impl SchurSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(&self, n: usize) -> Result<usize> {
        match self.partitions.first() {
            Some(&n_a) if self.partitions.len() >= 2 && self.partitions.iter().sum::<usize>() == n => {
                Ok(n_a)
            }
            _ => Err(Error::Solver(
                "Schur solver requires a two-block equation partition".into(),
            )),
        }
    }
}

impl LinearSolver for SchurSolver {
    fn name(&self) -> &str {
        "Schur complement"
    }

    fn set_partitions(&mut self, partitions: &[usize]) {
        self.partitions = partitions.to_vec();
    }

    fn pre_process(&mut self, matrix: &SystemMatrix) -> Result<()> {
        self.split(matrix.nrows())?;
        self.complement = None;
        self.s_lu = None;
        Ok(())
    }

    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let n_a = self.split(matrix.nrows())?;
        let complement = SchurComplement::new(matrix, n_a)?;
        let lu = complement.to_dense()?.lu();
        if !lu.is_invertible() {
            return Err(Error::SingularMatrix("Schur complement is singular".into()));
        }
        self.complement = Some(complement);
        self.s_lu = Some(lu);
        Ok(())
    }

    fn back_solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let (sc, lu) = match (&self.complement, &self.s_lu) {
            (Some(sc), Some(lu)) => (sc, lu),
            _ => return Err(Error::Solver("back_solve called before factor".into())),
        };
        if rhs.len() != sc.n_a + sc.n_b {
            return Err(Error::Solver("RHS size mismatch".into()));
        }
        let (f, g) = rhs.split_at(sc.n_a);

        let t = sc.a.back_solve(f)?;
        let mut h = csr_mult(&sc.c, &t);
        for (hi, gi) in h.iter_mut().zip(g) {
            *hi -= gi;
        }
        let y = lu
            .solve(&DVector::from_vec(h))
            .ok_or_else(|| Error::SingularMatrix("Schur back substitution failed".into()))?;

        let by = csr_mult(&sc.b, y.as_slice());
        let fx: Vec<f64> = f.iter().zip(&by).map(|(fi, bi)| fi - bi).collect();
        let mut x = sc.a.back_solve(&fx)?;
        x.extend_from_slice(y.as_slice());
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Saddle-point system [2 0 1; 0 2 1; 1 1 0] (D = 0).
    fn saddle() -> SystemMatrix {
        let mut p = MatrixProfile::new(3);
        p.add_entries(&[0, 2]);
        p.add_entries(&[1, 2]);
        let mut k = SystemMatrix::new(&p, false).unwrap();
        for (i, j, v) in [(0, 0, 2.0), (1, 1, 2.0), (0, 2, 1.0), (2, 0, 1.0), (1, 2, 1.0), (2, 1, 1.0)] {
            k.add(i, j, v);
        }
        k
    }

    #[test]
    fn test_mult_vector_matches_dense() {
        let sc = SchurComplement::new(&saddle(), 2).unwrap();
        // C A⁻¹ B = [1 1] diag(1/2) [1; 1] = 1
        let s = sc.mult_vector(&[1.0]).unwrap();
        assert_relative_eq!(s[0], 1.0, epsilon = 1e-12);
        assert_eq!(sc.size(), 1);
    }

    #[test]
    fn test_block_solve() {
        let k = saddle();
        let mut solver = SchurSolver::new();
        solver.set_partitions(&[2, 1]);
        let b = [3.0, 1.0, 1.0];
        let x = solver.solve(&k, &b).unwrap();
        let y = k.mult_vector(&x);
        for i in 0..3 {
            assert_relative_eq!(y[i], b[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_requires_partitions() {
        let mut solver = SchurSolver::new();
        assert!(solver.pre_process(&saddle()).is_err());
    }
}
