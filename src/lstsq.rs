use core::fmt;

use dyn_stack::{GlobalPodBuffer, PodStack, ReborrowMut};
use faer_core::mat;
use faer_core::{Conj, Parallelism};
use faer_sparse::qr::{factorize_symbolic_qr, QrSymbolicParams};

use crate::matrix::CscMatrix;

/// Errors from an unconstrained least-squares solve.
#[derive(Debug)]
pub enum LstsqError {
    /// The right-hand side has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// More columns than rows; the QR path needs a tall matrix.
    Underdetermined { nrows: usize, ncols: usize },
    /// The solution is not finite (rank-deficient or badly conditioned matrix).
    Singular,
    /// faer reported an error during symbolic factorization.
    Faer(faer_sparse::FaerError),
    /// Workspace requirement overflowed.
    WorkspaceOverflow,
    /// Workspace allocation failed.
    WorkspaceAlloc,
}

impl fmt::Display for LstsqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "rhs length {actual} does not match expected {expected}")
            }
            Self::Underdetermined { nrows, ncols } => {
                write!(f, "underdetermined system: nrows={nrows}, ncols={ncols}")
            }
            Self::Singular => write!(f, "least-squares solution is not finite"),
            Self::Faer(err) => write!(f, "faer error: {err:?}"),
            Self::WorkspaceOverflow => write!(f, "workspace size overflow"),
            Self::WorkspaceAlloc => write!(f, "workspace allocation failed"),
        }
    }
}

impl std::error::Error for LstsqError {}

/// Unconstrained sparse least squares: `argmin_z ||A z - b||_2`.
///
/// The NNLS solver calls this on column-restricted copies of its matrix, so
/// implementations see a different `A` on every call.
pub trait LeastSquares {
    fn solve(&mut self, a: &CscMatrix, b: &[f64]) -> Result<Vec<f64>, LstsqError>;
}

impl<L: LeastSquares + ?Sized> LeastSquares for &mut L {
    fn solve(&mut self, a: &CscMatrix, b: &[f64]) -> Result<Vec<f64>, LstsqError> {
        (**self).solve(a, b)
    }
}

impl<L: LeastSquares + ?Sized> LeastSquares for Box<L> {
    fn solve(&mut self, a: &CscMatrix, b: &[f64]) -> Result<Vec<f64>, LstsqError> {
        (**self).solve(a, b)
    }
}

fn check_rhs(a: &CscMatrix, b: &[f64]) -> Result<(), LstsqError> {
    if b.len() != a.nrows() {
        return Err(LstsqError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Direct solve through a sparse QR factorization (faer).
#[derive(Debug, Clone, Copy)]
pub struct SparseQr {
    parallelism: Parallelism,
}

impl SparseQr {
    pub fn new(parallelism: Parallelism) -> Self {
        Self { parallelism }
    }
}

impl Default for SparseQr {
    fn default() -> Self {
        Self::new(Parallelism::None)
    }
}

impl LeastSquares for SparseQr {
    fn solve(&mut self, a: &CscMatrix, b: &[f64]) -> Result<Vec<f64>, LstsqError> {
        check_rhs(a, b)?;
        let m = a.nrows();
        let n = a.ncols();
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > m {
            return Err(LstsqError::Underdetermined { nrows: m, ncols: n });
        }

        let symbolic_qr = factorize_symbolic_qr(a.as_symbolic(), QrSymbolicParams::default())
            .map_err(LstsqError::Faer)?;

        let factor_req = symbolic_qr
            .factorize_numeric_qr_req::<f64>(self.parallelism)
            .map_err(|_| LstsqError::WorkspaceOverflow)?;
        let solve_req = symbolic_qr
            .solve_in_place_req::<f64>(1, self.parallelism)
            .map_err(|_| LstsqError::WorkspaceOverflow)?;
        let req = factor_req
            .try_or(solve_req)
            .map_err(|_| LstsqError::WorkspaceOverflow)?;
        let mut qr_stack = GlobalPodBuffer::try_new(req).map_err(|_| LstsqError::WorkspaceAlloc)?;

        let mut qr_indices = vec![0usize; symbolic_qr.len_indices()];
        let mut qr_values = vec![0.0; symbolic_qr.len_values()];

        let mut stack = PodStack::new(&mut qr_stack);
        let qr = symbolic_qr.factorize_numeric_qr::<f64>(
            &mut qr_indices,
            &mut qr_values,
            a.as_faer(),
            self.parallelism,
            stack.rb_mut(),
        );

        // Q^T b followed by the triangular solve; the first n entries hold z.
        let mut rhs = b.to_vec();
        let mut rhs_mat = mat::from_column_major_slice_mut::<f64>(&mut rhs, m, 1);
        let mut stack = PodStack::new(&mut qr_stack);
        qr.solve_in_place_with_conj(
            Conj::No,
            rhs_mat.rb_mut(),
            self.parallelism,
            stack.rb_mut(),
        );

        rhs.truncate(n);
        if rhs.iter().any(|v| !v.is_finite()) {
            return Err(LstsqError::Singular);
        }
        Ok(rhs)
    }
}

/// Options for the LSQR iteration.
#[derive(Debug, Clone)]
pub struct LsqrOptions {
    /// Relative error tolerance on A.
    pub atol: f64,
    /// Relative error tolerance on b.
    pub btol: f64,
    /// Stop once the condition estimate reaches this value.
    pub conlim: f64,
    /// Iteration cap; `None` means `4 * ncols + 10`.
    pub max_iters: Option<usize>,
}

impl Default for LsqrOptions {
    fn default() -> Self {
        Self {
            atol: 1e-12,
            btol: 1e-12,
            conlim: 1e12,
            max_iters: None,
        }
    }
}

/// Iterative solve with LSQR (Paige and Saunders, TOMS 8(1), 1982).
///
/// Columns are scaled to unit 2-norm before the bidiagonalization, which keeps
/// the iteration count reasonable when columns differ by orders of magnitude.
#[derive(Debug, Clone, Default)]
pub struct Lsqr {
    options: LsqrOptions,
}

impl Lsqr {
    pub fn new(options: LsqrOptions) -> Self {
        Self { options }
    }
}

impl LeastSquares for Lsqr {
    fn solve(&mut self, a: &CscMatrix, b: &[f64]) -> Result<Vec<f64>, LstsqError> {
        check_rhs(a, b)?;
        let m = a.nrows();
        let n = a.ncols();
        if n == 0 {
            return Ok(Vec::new());
        }
        let opts = &self.options;
        let max_iters = opts.max_iters.unwrap_or(4 * n + 10);

        let scale: Vec<f64> = (0..n)
            .map(|col| {
                let norm = l2_norm(a.values_of_col(col));
                if norm > f64::MIN_POSITIVE {
                    norm.recip()
                } else {
                    1.0
                }
            })
            .collect();

        let mut u = b.to_vec();
        let mut beta = normalize(&mut u);
        let mut v = vec![0.0; n];
        a.tr_mul_vec(&u, &mut v);
        for (vi, si) in v.iter_mut().zip(&scale) {
            *vi *= si;
        }
        let mut alpha = normalize(&mut v);

        let mut x = vec![0.0; n];
        if beta == 0.0 || alpha == 0.0 {
            return Ok(x);
        }

        let mut w = v.clone();
        let mut phi_bar = beta;
        let mut rho_bar = alpha;
        let norm_b = beta;
        let mut anorm_sq = 0.0;
        let mut dnorm_sq = 0.0;

        let mut scaled_v = vec![0.0; n];
        let mut av = vec![0.0; m];
        let mut atu = vec![0.0; n];

        for _ in 0..max_iters {
            // Continue the bidiagonalization.
            for ((sv, vi), si) in scaled_v.iter_mut().zip(&v).zip(&scale) {
                *sv = vi * si;
            }
            a.mul_vec(&scaled_v, &mut av);
            for (ui, avi) in u.iter_mut().zip(&av) {
                *ui = avi - alpha * *ui;
            }
            beta = normalize(&mut u);
            anorm_sq += alpha * alpha + beta * beta;

            a.tr_mul_vec(&u, &mut atu);
            for ((vi, atui), si) in v.iter_mut().zip(&atu).zip(&scale) {
                *vi = atui * si - beta * *vi;
            }
            alpha = normalize(&mut v);

            // Next plane rotation.
            let rho = rho_bar.hypot(beta);
            if rho == 0.0 {
                break;
            }
            let c = rho_bar / rho;
            let s = beta / rho;
            let theta = s * alpha;
            rho_bar = -c * alpha;
            let phi = c * phi_bar;
            phi_bar *= s;

            dnorm_sq += dot(&w, &w) / (rho * rho);
            let step = phi / rho;
            let shrink = theta / rho;
            for ((xi, wi), vi) in x.iter_mut().zip(w.iter_mut()).zip(&v) {
                *xi += step * *wi;
                *wi = vi - shrink * *wi;
            }

            let rnorm = phi_bar;
            let arnorm = phi_bar * alpha * c.abs();
            let anorm = anorm_sq.sqrt();
            let xnorm = l2_norm(&x);
            let acond = anorm * dnorm_sq.sqrt();
            if rnorm <= opts.btol * norm_b + opts.atol * anorm * xnorm
                || arnorm <= opts.atol * anorm * rnorm
                || acond >= opts.conlim
            {
                break;
            }
        }

        for (xi, si) in x.iter_mut().zip(&scale) {
            *xi *= si;
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LstsqError::Singular);
        }
        Ok(x)
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

pub(crate) fn l2_norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

fn normalize(x: &mut [f64]) -> f64 {
    let norm = l2_norm(x);
    if norm > 0.0 {
        for v in x.iter_mut() {
            *v /= norm;
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tall() -> (CscMatrix, Vec<f64>) {
        // Consistent system with solution [1, 2].
        let a = CscMatrix::from_dense(3, 2, &[1.0, 0.0, 0.0, 2.0, 1.0, 1.0]).unwrap();
        (a, vec![1.0, 4.0, 3.0])
    }

    #[test]
    fn qr_solves_consistent_system() {
        let (a, b) = tall();
        let z = SparseQr::default().solve(&a, &b).unwrap();
        assert!((z[0] - 1.0).abs() < 1e-10);
        assert!((z[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn lsqr_solves_consistent_system() {
        let (a, b) = tall();
        let z = Lsqr::default().solve(&a, &b).unwrap();
        assert!((z[0] - 1.0).abs() < 1e-8);
        assert!((z[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn qr_rejects_wide_matrix() {
        let a = CscMatrix::from_dense(1, 2, &[1.0, 1.0]).unwrap();
        let err = SparseQr::default().solve(&a, &[1.0]).unwrap_err();
        assert!(matches!(err, LstsqError::Underdetermined { nrows: 1, ncols: 2 }));
    }

    #[test]
    fn empty_column_set() {
        let a = CscMatrix::from_dense(2, 0, &[]).unwrap();
        assert!(SparseQr::default().solve(&a, &[1.0, 2.0]).unwrap().is_empty());
        assert!(Lsqr::default().solve(&a, &[1.0, 2.0]).unwrap().is_empty());
    }

    #[test]
    fn rhs_length_checked() {
        let (a, _) = tall();
        let err = Lsqr::default().solve(&a, &[1.0]).unwrap_err();
        assert!(matches!(err, LstsqError::DimensionMismatch { expected: 3, actual: 1 }));
    }
}
