//! Sparse nonnegative least squares and MinDivLP abundance reconstruction.
//!
//! The solver computes `argmin ||Cx - d||_2` subject to `x >= 0` for a sparse `C`
//! in compressed sparse column (CSC) form, using the Lawson-Hanson active-set method.
//! Each passive-set subproblem is an unconstrained sparse least-squares solve
//! delegated to a [`LeastSquares`] backend (faer sparse QR by default, LSQR as an
//! iterative alternative).
//!
//! On top of it, [`reconstruct`] estimates the relative abundance of reference taxa
//! from two k-mer profiles of a sample taken at different k-mer sizes.
//!
//! How it works (high level):
//! - Weight each taxon by how well the sample covers its large k-mers.
//! - Build `C = [f^T; lambda * A_small]`, `d = [0; lambda * y_small]`.
//! - Solve the NNLS problem, normalize to a probability vector, zero small entries.
//!
//! Calling it:
//! - Build the sensing matrices as `CscMatrix` (columns summing to 1).
//! - Pass the normalized sample vectors, `lambda` and `q` to `reconstruct`.
//!
//! Example:
//! ```rust,no_run
//! use mindivlp::{reconstruct, CscMatrix, ReconstructOptions};
//!
//! let a_small = CscMatrix::from_dense(2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap();
//! let a_large = CscMatrix::from_dense(2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap();
//! let y = [1.0, 0.0];
//! let result = reconstruct(&a_small, &a_large, &y, &y, 1e4, 0.1, &ReconstructOptions::default())
//!     .unwrap();
//! assert!(result.abundances[0] > 0.99);
//! ```

mod lstsq;
mod matrix;
mod partition;
mod reconstruct;
mod report;
mod solver;

pub use lstsq::{LeastSquares, Lsqr, LsqrOptions, LstsqError, SparseQr};
pub use matrix::{CscMatrix, MatrixError};
pub use reconstruct::{
    augmented_system, diversity_weights, reconstruct, ReconstructError, ReconstructOptions,
    Reconstruction, Reconstructor,
};
pub use report::{IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};
pub use solver::{default_tolerance, nnls, NnlsOptions, NnlsSolver, Solution, SolveError};

pub use faer_core::Parallelism;
