//! Sparse symmetric positive-definite systems and their solvers.

use thiserror::Error;

/// Failure of a [`QuadraticSolver`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    /// The iteration produced non-finite values or lost positive definiteness.
    #[error("quadratic solve diverged after {iterations} iterations")]
    Diverged {
        /// Iterations completed before the failure.
        iterations: usize,
    },
    /// The residual did not fall below tolerance within the iteration limit.
    #[error("quadratic solve did not converge in {iterations} iterations (residual {residual:.3e})")]
    NotConverged {
        /// Iterations run.
        iterations: usize,
        /// Relative residual at exit.
        residual: f64,
    },
}

/// A system `A x = b` assembled from two-terminal connections.
///
/// Off-diagonal entries are kept as triplets while assembling; duplicates
/// are summed when converting to [`CsrMatrix`].
#[derive(Debug, Clone, Default)]
pub struct SparseSystem {
    diag: Vec<f64>,
    off: Vec<(usize, usize, f64)>,
    rhs: Vec<f64>,
}

impl SparseSystem {
    /// Creates an empty system with `n` unknowns.
    pub fn new(n: usize) -> Self {
        Self {
            diag: vec![0.0; n],
            off: Vec::new(),
            rhs: vec![0.0; n],
        }
    }

    /// Number of unknowns.
    pub fn len(&self) -> usize {
        self.diag.len()
    }

    /// Returns `true` for a system without unknowns.
    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    /// Adds a spring of weight `w` between unknowns `i` and `j`, whose
    /// coordinates are offset by `oi` and `oj` inside their units.
    pub fn connect(&mut self, i: usize, j: usize, w: f64, oi: f64, oj: f64) {
        if i == j {
            return;
        }
        self.diag[i] += w;
        self.diag[j] += w;
        self.off.push((i, j, -w));
        self.off.push((j, i, -w));
        self.rhs[i] += w * (oj - oi);
        self.rhs[j] += w * (oi - oj);
    }

    /// Adds a spring of weight `w` from unknown `i` (pin offset `oi`) to a
    /// fixed coordinate.
    pub fn anchor(&mut self, i: usize, w: f64, target: f64, oi: f64) {
        self.diag[i] += w;
        self.rhs[i] += w * (target - oi);
    }

    /// Diagonal entry of row `i`.
    pub fn diagonal(&self, i: usize) -> f64 {
        self.diag[i]
    }

    /// Right-hand side.
    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    /// Converts the matrix to compressed sparse rows.
    pub fn to_csr(&self) -> CsrMatrix {
        let n = self.diag.len();
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for (i, &d) in self.diag.iter().enumerate() {
            if d != 0.0 {
                rows[i].push((i, d));
            }
        }
        for &(i, j, v) in &self.off {
            rows[i].push((j, v));
        }
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            let mut k = 0;
            while k < row.len() {
                let (j, mut v) = row[k];
                k += 1;
                while k < row.len() && row[k].0 == j {
                    v += row[k].1;
                    k += 1;
                }
                cols.push(j);
                vals.push(v);
            }
            row_ptr.push(cols.len());
        }
        CsrMatrix {
            row_ptr,
            cols,
            vals,
        }
    }
}

/// A square matrix in compressed sparse row form.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl CsrMatrix {
    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    /// Stored non-zeros.
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Computes `y = A x`.
    pub fn mul(&self, x: &[f64], y: &mut [f64]) {
        for (i, out) in y.iter_mut().enumerate().take(self.rows()) {
            let mut s = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                s += self.vals[k] * x[self.cols[k]];
            }
            *out = s;
        }
    }
}

/// A backend that solves an assembled [`SparseSystem`].
pub trait QuadraticSolver: Send + Sync {
    /// Solves in place, starting from the values already in `x`.
    ///
    /// Returns the number of iterations used.
    fn solve(&self, system: &SparseSystem, x: &mut [f64]) -> Result<usize, SolveError>;
}

/// Jacobi-preconditioned conjugate gradient.
///
/// Rows with an empty diagonal are left at their starting value.
#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradient {
    /// Iteration limit.
    pub max_iterations: usize,
    /// Relative residual tolerance.
    pub tolerance: f64,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-6,
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl QuadraticSolver for ConjugateGradient {
    fn solve(&self, system: &SparseSystem, x: &mut [f64]) -> Result<usize, SolveError> {
        let n = system.len();
        let a = system.to_csr();
        let inv: Vec<f64> = system
            .diag
            .iter()
            .map(|&d| if d > 0.0 { 1.0 / d } else { 0.0 })
            .collect();
        // rows without connections contribute nothing to the residual
        let b: Vec<f64> = system
            .rhs
            .iter()
            .zip(&inv)
            .map(|(&v, &m)| if m > 0.0 { v } else { 0.0 })
            .collect();

        let mut ax = vec![0.0; n];
        a.mul(x, &mut ax);
        let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
        let mut z: Vec<f64> = r.iter().zip(&inv).map(|(ri, mi)| ri * mi).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        // scale by |b| or the starting residual, whichever is larger
        let b_norm = dot(&b, &b)
            .sqrt()
            .max(dot(&r, &r).sqrt())
            .max(f64::MIN_POSITIVE);
        let mut ap = vec![0.0; n];

        for iteration in 0..self.max_iterations {
            let residual = dot(&r, &r).sqrt() / b_norm;
            if !residual.is_finite() {
                return Err(SolveError::Diverged { iterations: iteration });
            }
            if residual <= self.tolerance || rz == 0.0 {
                return Ok(iteration);
            }
            a.mul(&p, &mut ap);
            let pap = dot(&p, &ap);
            if !pap.is_finite() || pap <= 0.0 {
                return Err(SolveError::Diverged { iterations: iteration });
            }
            let alpha = rz / pap;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }
            for i in 0..n {
                z[i] = r[i] * inv[i];
            }
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
            rz = rz_next;
        }

        let residual = dot(&r, &r).sqrt() / b_norm;
        if !residual.is_finite() || x.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::Diverged {
                iterations: self.max_iterations,
            });
        }
        if residual <= self.tolerance {
            Ok(self.max_iterations)
        } else {
            Err(SolveError::NotConverged {
                iterations: self.max_iterations,
                residual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_sums_duplicates() {
        let mut s = SparseSystem::new(2);
        s.connect(0, 1, 1.0, 0.0, 0.0);
        s.connect(0, 1, 2.0, 0.0, 0.0);
        let a = s.to_csr();
        assert_eq!(a.rows(), 2);
        assert_eq!(a.nnz(), 4);
        let mut y = vec![0.0; 2];
        a.mul(&[1.0, 0.0], &mut y);
        assert_eq!(y, vec![3.0, -3.0]);
    }

    #[test]
    fn chain_between_anchors() {
        // 0 -- x0 -- x1 -- 3, all unit springs: x = [1, 2]
        let mut s = SparseSystem::new(2);
        s.anchor(0, 1.0, 0.0, 0.0);
        s.connect(0, 1, 1.0, 0.0, 0.0);
        s.anchor(1, 1.0, 3.0, 0.0);
        let mut x = vec![0.0; 2];
        ConjugateGradient::default().solve(&s, &mut x).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6);
        assert!((x[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn offsets_shift_the_solution() {
        // pin of x0 sits 1 unit right of its origin; pin must meet anchor at 4
        let mut s = SparseSystem::new(1);
        s.anchor(0, 2.0, 4.0, 1.0);
        let mut x = vec![0.0];
        ConjugateGradient::default().solve(&s, &mut x).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_rows_keep_their_value() {
        let mut s = SparseSystem::new(2);
        s.anchor(0, 1.0, 5.0, 0.0);
        let mut x = vec![0.0, 7.5];
        ConjugateGradient::default().solve(&s, &mut x).unwrap();
        assert!((x[0] - 5.0).abs() < 1e-9);
        assert_eq!(x[1], 7.5);
    }

    #[test]
    fn iteration_limit_reports_not_converged() {
        let mut s = SparseSystem::new(2);
        s.anchor(0, 1.0, 1.0, 0.0);
        s.connect(0, 1, 1.0, 0.0, 0.0);
        let cg = ConjugateGradient {
            max_iterations: 0,
            tolerance: 1e-12,
        };
        let err = cg.solve(&s, &mut [0.0, 0.0]).unwrap_err();
        assert!(matches!(err, SolveError::NotConverged { iterations: 0, .. }));
    }

    #[test]
    fn nan_input_diverges() {
        let mut s = SparseSystem::new(1);
        s.anchor(0, 1.0, f64::NAN, 0.0);
        let err = ConjugateGradient::default().solve(&s, &mut [0.0]).unwrap_err();
        assert!(matches!(err, SolveError::Diverged { .. }));
    }
}
