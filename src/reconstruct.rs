//! MinDivLP abundance reconstruction.
//!
//! The large k-mer profile only enters through a diversity weight per taxon,
//! `f_j = 1 / ((B^T y_large)_j^(1-q) + epsilon)` with `B` the support of `A_large`.
//! Stacking `f^T` above `lambda * A_small` makes the NNLS objective trade fit to the
//! small k-mer profile against a penalty on taxa whose k-mers are poorly covered
//! by the sample.

use core::fmt;

use crate::lstsq::{LeastSquares, SparseQr};
use crate::matrix::CscMatrix;
use crate::report::{Reporter, SolverStats};
use crate::solver::{NnlsOptions, NnlsSolver, SolveError};

/// Errors from a reconstruction.
#[derive(Debug)]
pub enum ReconstructError {
    /// A scalar parameter is outside its valid range.
    InvalidParameter { name: &'static str, value: f64 },
    /// Matrix and vector shapes do not line up.
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The solver returned a vector that cannot be normalized.
    DegenerateSolution { sum: f64 },
    /// The NNLS solve failed.
    Solve(SolveError),
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter { name, value } => {
                write!(f, "invalid parameter {name} = {value}")
            }
            Self::ShapeMismatch {
                what,
                expected,
                actual,
            } => {
                write!(f, "{what}: expected {expected}, got {actual}")
            }
            Self::DegenerateSolution { sum } => {
                write!(f, "cannot normalize reconstruction: solver output sums to {sum}")
            }
            Self::Solve(err) => write!(f, "solve failed: {err}"),
        }
    }
}

impl std::error::Error for ReconstructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Solve(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SolveError> for ReconstructError {
    fn from(err: SolveError) -> Self {
        Self::Solve(err)
    }
}

/// Options for a reconstruction.
#[derive(Debug, Clone)]
pub struct ReconstructOptions {
    /// Added to the diversity denominator so taxa with no k-mer support in the
    /// sample get a large but finite weight.
    pub epsilon: f64,
    /// Normalized abundances below this are set to zero.
    pub threshold: f64,
    /// Options for the inner NNLS solve.
    pub nnls: NnlsOptions,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            epsilon: 1e-4,
            threshold: 0.01,
            nnls: NnlsOptions::default(),
        }
    }
}

/// Relative abundances plus the stats of the solve that produced them.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// One entry per reference taxon; sums to 1 before thresholding.
    pub abundances: Vec<f64>,
    pub stats: SolverStats,
}

impl Reconstruction {
    /// Indices of the taxa with nonzero abundance.
    pub fn support(&self) -> Vec<usize> {
        self.abundances
            .iter()
            .enumerate()
            .filter_map(|(j, &v)| (v > 0.0).then_some(j))
            .collect()
    }
}

/// Diversity weights `f_j = 1 / ((B^T y_large)_j^(1-q) + epsilon)`.
pub fn diversity_weights(a_large: &CscMatrix, y_large: &[f64], q: f64, epsilon: f64) -> Vec<f64> {
    let mut coverage = vec![0.0; a_large.ncols()];
    a_large.support_tr_mul_vec(y_large, &mut coverage);
    coverage
        .into_iter()
        .map(|c| (c.powf(1.0 - q) + epsilon).recip())
        .collect()
}

/// Builds `C = [f^T; lambda * A_small]` and `d = [0, lambda * y_small]`.
pub fn augmented_system(
    a_small: &CscMatrix,
    y_small: &[f64],
    weights: &[f64],
    lambda: f64,
) -> (CscMatrix, Vec<f64>) {
    let c = a_small.scaled(lambda).with_dense_top_row(weights);
    let mut d = Vec::with_capacity(y_small.len() + 1);
    d.push(0.0);
    d.extend(y_small.iter().map(|y| lambda * y));
    (c, d)
}

/// Reusable reconstruction front end holding the options and least-squares backend.
pub struct Reconstructor<L = SparseQr> {
    solver: NnlsSolver<L>,
    options: ReconstructOptions,
}

impl Reconstructor<SparseQr> {
    pub fn new(options: ReconstructOptions) -> Self {
        Self::with_lstsq(options, SparseQr::default())
    }
}

impl Default for Reconstructor<SparseQr> {
    fn default() -> Self {
        Self::new(ReconstructOptions::default())
    }
}

impl<L: LeastSquares> Reconstructor<L> {
    pub fn with_lstsq(options: ReconstructOptions, lstsq: L) -> Self {
        Self {
            solver: NnlsSolver::new(lstsq),
            options,
        }
    }

    pub fn options(&self) -> &ReconstructOptions {
        &self.options
    }

    /// Estimate taxon abundances from the small and large k-mer profiles.
    ///
    /// `lambda > 0` weights the fit to the small profile; `0 < q < 1` controls how
    /// strongly poorly covered taxa are penalized.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        &mut self,
        a_small: &CscMatrix,
        a_large: &CscMatrix,
        y_small: &[f64],
        y_large: &[f64],
        lambda: f64,
        q: f64,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<Reconstruction, ReconstructError> {
        validate(a_small, a_large, y_small, y_large, lambda, q, &self.options)?;

        let weights = diversity_weights(a_large, y_large, q, self.options.epsilon);
        let (c, d) = augmented_system(a_small, y_small, &weights, lambda);
        log::debug!(
            "MinDivLP: {} taxa, C is {}x{} with {} nonzeros, lambda = {lambda}, q = {q}",
            c.ncols(),
            c.nrows(),
            c.ncols(),
            c.nnz()
        );

        let solution = self.solver.solve(&c, &d, &self.options.nnls, reporter)?;
        let mut x = solution.x;

        let sum: f64 = x.iter().sum();
        if sum == 0.0 || !sum.is_finite() {
            return Err(ReconstructError::DegenerateSolution { sum });
        }
        let threshold = self.options.threshold;
        for v in x.iter_mut() {
            *v /= sum;
            // Not renormalized afterwards; the thresholded vector may sum to slightly below 1.
            if *v < threshold {
                *v = 0.0;
            }
        }

        Ok(Reconstruction {
            abundances: x,
            stats: solution.stats,
        })
    }
}

/// Estimate taxon abundances with the default sparse QR backend.
pub fn reconstruct(
    a_small: &CscMatrix,
    a_large: &CscMatrix,
    y_small: &[f64],
    y_large: &[f64],
    lambda: f64,
    q: f64,
    options: &ReconstructOptions,
) -> Result<Reconstruction, ReconstructError> {
    Reconstructor::new(options.clone()).reconstruct(a_small, a_large, y_small, y_large, lambda, q, None)
}

fn validate(
    a_small: &CscMatrix,
    a_large: &CscMatrix,
    y_small: &[f64],
    y_large: &[f64],
    lambda: f64,
    q: f64,
    options: &ReconstructOptions,
) -> Result<(), ReconstructError> {
    if !(lambda.is_finite() && lambda > 0.0) {
        return Err(ReconstructError::InvalidParameter {
            name: "lambda",
            value: lambda,
        });
    }
    if !(q > 0.0 && q < 1.0) {
        return Err(ReconstructError::InvalidParameter { name: "q", value: q });
    }
    if !(options.epsilon.is_finite() && options.epsilon > 0.0) {
        return Err(ReconstructError::InvalidParameter {
            name: "epsilon",
            value: options.epsilon,
        });
    }
    if !(options.threshold >= 0.0) {
        return Err(ReconstructError::InvalidParameter {
            name: "threshold",
            value: options.threshold,
        });
    }
    if a_large.ncols() != a_small.ncols() {
        return Err(ReconstructError::ShapeMismatch {
            what: "A_large columns",
            expected: a_small.ncols(),
            actual: a_large.ncols(),
        });
    }
    if y_small.len() != a_small.nrows() {
        return Err(ReconstructError::ShapeMismatch {
            what: "y_small length",
            expected: a_small.nrows(),
            actual: y_small.len(),
        });
    }
    if y_large.len() != a_large.nrows() {
        return Err(ReconstructError::ShapeMismatch {
            what: "y_large length",
            expected: a_large.nrows(),
            actual: y_large.len(),
        });
    }
    check_sample("y_small entry", y_small)?;
    check_sample("y_large entry", y_large)?;
    Ok(())
}

/// Sample profiles are k-mer frequencies: finite and nonnegative.
fn check_sample(name: &'static str, y: &[f64]) -> Result<(), ReconstructError> {
    match y.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
        Some(&value) => Err(ReconstructError::InvalidParameter { name, value }),
        None => Ok(()),
    }
}
