use core::fmt;

use std::time::{Duration, Instant};

use crate::lstsq::{l2_norm, LeastSquares, LstsqError, SparseQr};
use crate::matrix::CscMatrix;
use crate::partition::ActiveSet;
use crate::report::{emit_line, IterationReport, Reporter, SolveStatus, SolverStats, StdoutReporter};

/// Errors specific to a solve call.
#[derive(Debug)]
pub enum SolveError {
    /// d has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// The unconstrained subproblem on the passive columns failed.
    Subproblem(LstsqError),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "d length {actual} does not match expected {expected}")
            }
            Self::Subproblem(err) => write!(f, "least-squares subproblem failed: {err}"),
        }
    }
}

impl std::error::Error for SolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Subproblem(err) => Some(err),
            Self::DimensionMismatch { .. } => None,
        }
    }
}

impl From<LstsqError> for SolveError {
    fn from(err: LstsqError) -> Self {
        Self::Subproblem(err)
    }
}

/// Options controlling the active-set NNLS solve.
#[derive(Debug, Clone)]
pub struct NnlsOptions {
    /// Multiplier and zero tolerance. `None` uses
    /// `10 * eps * ||C||_1 * (max(m, n) + 1)`.
    pub tol: Option<f64>,
    /// The inner-iteration budget is `max_iters_factor * n`.
    pub max_iters_factor: usize,
    /// Emit per-iteration diagnostics to stdout by default.
    pub verbose: bool,
}

impl Default for NnlsOptions {
    fn default() -> Self {
        Self {
            tol: None,
            max_iters_factor: 3,
            verbose: false,
        }
    }
}

/// Result of an NNLS solve.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Vec<f64>,
    pub stats: SolverStats,
}

/// Default tolerance for `C`: `10 * eps * ||C||_1 * (max(m, n) + 1)`.
pub fn default_tolerance(c: &CscMatrix) -> f64 {
    let size = c.nrows().max(c.ncols()) + 1;
    10.0 * f64::EPSILON * c.norm_l1() * size as f64
}

/// Active-set solver for `min ||Cx - d||_2` subject to `x >= 0` with sparse `C`.
///
/// Each passive-set subproblem is delegated to a [`LeastSquares`] backend.
pub struct NnlsSolver<L = SparseQr> {
    lstsq: L,
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

impl Default for NnlsSolver<SparseQr> {
    fn default() -> Self {
        Self::new(SparseQr::default())
    }
}

impl<L: LeastSquares> NnlsSolver<L> {
    pub fn new(lstsq: L) -> Self {
        Self { lstsq }
    }

    /// The least-squares backend.
    pub fn lstsq(&self) -> &L {
        &self.lstsq
    }

    /// Solve `min ||Cx - d||_2` subject to `x >= 0`.
    ///
    /// Running out of inner iterations is not an error: the last unconstrained
    /// subsolution is returned with [`SolveStatus::MaxIterations`] and a warning is
    /// logged. Failures of the least-squares backend are returned as
    /// [`SolveError::Subproblem`].
    pub fn solve(
        &mut self,
        c: &CscMatrix,
        d: &[f64],
        options: &NnlsOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<Solution, SolveError> {
        let m = c.nrows();
        let n = c.ncols();
        if d.len() != m {
            return Err(SolveError::DimensionMismatch {
                expected: m,
                actual: d.len(),
            });
        }
        let start_time = options.verbose.then(Instant::now);
        let mut reporter = ReporterSlot::new(reporter, options.verbose);

        let tol = options.tol.unwrap_or_else(|| default_tolerance(c));
        let max_iters = options.max_iters_factor.saturating_mul(n);

        let mut set = ActiveSet::new(n);
        let mut x = vec![0.0; n];
        let mut residuals = vec![0.0; m];
        let mut w = vec![0.0; n];
        let mut residual_norm = multipliers(c, d, &x, &mut residuals, &mut w);

        let mut outer = 0;
        let mut inner = 0;

        let status = loop {
            // KKT check over the active columns.
            let Some((t, w_t)) = set.argmax_active(&w) else {
                break SolveStatus::AllPassive;
            };
            if !(w_t > tol) {
                break SolveStatus::Converged;
            }

            outer += 1;
            set.make_passive(t);
            let mut z = self.passive_solve(c, d, &set)?;
            let mut inner_steps = 0;

            // Step back toward feasibility until the subsolution is positive on P.
            while has_nonpositive_passive(&set, &z) {
                inner += 1;
                inner_steps += 1;
                if inner > max_iters {
                    log::warn!(
                        "sparse NNLS: iteration count exceeded ({max_iters}); returning unconstrained estimate"
                    );
                    residual_norm = multipliers(c, d, &z, &mut residuals, &mut w);
                    let stats = SolverStats {
                        status: SolveStatus::MaxIterations,
                        outer_iterations: outer,
                        inner_iterations: inner - 1,
                        tol,
                        residual_norm,
                        max_multiplier: max_active_multiplier(&set, &w),
                        passive: set.passive_len(),
                    };
                    return Ok(finish(Solution { x: z, stats }, start_time, &mut reporter));
                }

                let alpha = feasible_step(&set, &x, &z);
                for (xj, zj) in x.iter_mut().zip(&z) {
                    *xj += alpha * (zj - *xj);
                }
                for (col, xj) in x.iter().enumerate() {
                    if set.is_passive(col) && xj.abs() < tol {
                        set.make_active(col);
                    }
                }
                z = self.passive_solve(c, d, &set)?;
            }

            x = z;
            residual_norm = multipliers(c, d, &x, &mut residuals, &mut w);
            log::debug!(
                "sparse NNLS: outer {outer}: column {t} entered (w = {w_t:.3e}), {} passive, residual {residual_norm:.4e}",
                set.passive_len()
            );
            if let Some(reporter) = reporter.as_mut() {
                reporter.on_iteration(&IterationReport {
                    iteration: outer,
                    entering: t,
                    multiplier: w_t,
                    inner_steps,
                    passive: set.passive_len(),
                    residual_norm,
                });
            }
        };

        let stats = SolverStats {
            status,
            outer_iterations: outer,
            inner_iterations: inner,
            tol,
            residual_norm,
            max_multiplier: max_active_multiplier(&set, &w),
            passive: set.passive_len(),
        };
        log::debug!(
            "sparse NNLS: {status:?} after {outer} outer / {inner} inner iterations, residual {residual_norm:.4e}"
        );
        Ok(finish(Solution { x, stats }, start_time, &mut reporter))
    }

    /// Unconstrained solve on the passive columns; zero elsewhere.
    fn passive_solve(
        &mut self,
        c: &CscMatrix,
        d: &[f64],
        set: &ActiveSet,
    ) -> Result<Vec<f64>, SolveError> {
        let mut z = vec![0.0; set.len()];
        let cols = set.passive_indices();
        if cols.is_empty() {
            return Ok(z);
        }
        let restricted = c.select_columns(&cols);
        let z_passive = self.lstsq.solve(&restricted, d)?;
        for (&col, &value) in cols.iter().zip(&z_passive) {
            z[col] = value;
        }
        Ok(z)
    }
}

/// Solve `min ||Cx - d||_2, x >= 0` with the default sparse QR backend.
pub fn nnls(c: &CscMatrix, d: &[f64], options: &NnlsOptions) -> Result<Solution, SolveError> {
    NnlsSolver::<SparseQr>::default().solve(c, d, options, None)
}

/// `r = d - Cx`, `w = C^T r`; returns `||r||_2`.
fn multipliers(c: &CscMatrix, d: &[f64], x: &[f64], residuals: &mut [f64], w: &mut [f64]) -> f64 {
    c.mul_vec(x, residuals);
    for (r, di) in residuals.iter_mut().zip(d) {
        *r = di - *r;
    }
    c.tr_mul_vec(residuals, w);
    l2_norm(residuals)
}

fn has_nonpositive_passive(set: &ActiveSet, z: &[f64]) -> bool {
    z.iter()
        .enumerate()
        .any(|(col, &zj)| set.is_passive(col) && zj <= 0.0)
}

/// Largest step along `z - x` that keeps every passive entry nonnegative.
///
/// A zero denominator (`x_j == z_j == 0`) contributes a zero step.
fn feasible_step(set: &ActiveSet, x: &[f64], z: &[f64]) -> f64 {
    let mut alpha = f64::INFINITY;
    for (col, (&xj, &zj)) in x.iter().zip(z).enumerate() {
        if !set.is_passive(col) || zj > 0.0 {
            continue;
        }
        let denom = xj - zj;
        let ratio = if denom > 0.0 { xj / denom } else { 0.0 };
        alpha = alpha.min(ratio);
    }
    alpha
}

/// Largest multiplier over the active columns, 0 when every column is passive.
fn max_active_multiplier(set: &ActiveSet, w: &[f64]) -> f64 {
    set.argmax_active(w).map_or(0.0, |(_, value)| value)
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn finish(
    solution: Solution,
    start_time: Option<Instant>,
    reporter: &mut ReporterSlot<'_>,
) -> Solution {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    if let Some(start) = start_time {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!(
            "status: {:?}, passive: {}, time: {elapsed}",
            solution.stats.status, solution.stats.passive
        ));
    }
    solution
}
