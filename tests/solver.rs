use mindivlp::{
    default_tolerance, CscMatrix, IterationReport, LeastSquares, Lsqr, LstsqError, NnlsOptions,
    NnlsSolver, Reporter, SolveError, SolveStatus, SparseQr,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn matrix_from_triplets_1b(nrows: usize, ncols: usize, entries: &[(usize, usize, f64)]) -> CscMatrix {
    let zero_based: Vec<(usize, usize, f64)> = entries
        .iter()
        .map(|&(row, col, value)| (row - 1, col - 1, value))
        .collect();
    CscMatrix::from_triplets(nrows, ncols, &zero_based).unwrap()
}

fn solve_default(c: &CscMatrix, d: &[f64]) -> (Vec<f64>, SolveStatus) {
    let mut solver: NnlsSolver = NnlsSolver::default();
    let solution = solver.solve(c, d, &NnlsOptions::default(), None).unwrap();
    (solution.x, solution.stats.status)
}

fn assert_converged(status: SolveStatus) {
    assert!(status.is_converged(), "unexpected status: {status:?}");
}

fn multipliers(c: &CscMatrix, d: &[f64], x: &[f64]) -> Vec<f64> {
    let mut r = vec![0.0; c.nrows()];
    c.mul_vec(x, &mut r);
    for (ri, di) in r.iter_mut().zip(d) {
        *ri = di - *ri;
    }
    let mut w = vec![0.0; c.ncols()];
    c.tr_mul_vec(&r, &mut w);
    w
}

fn residual_norm(c: &CscMatrix, d: &[f64], x: &[f64]) -> f64 {
    let mut r = vec![0.0; c.nrows()];
    c.mul_vec(x, &mut r);
    r.iter().zip(d).map(|(ri, di)| (ri - di) * (ri - di)).sum::<f64>().sqrt()
}

/// Random tall problem with a boosted diagonal so every column is nonzero.
fn random_problem(rng: &mut StdRng, m: usize, n: usize) -> (CscMatrix, Vec<f64>) {
    let mut triplets = Vec::new();
    for col in 0..n {
        for row in 0..m {
            if row == col {
                triplets.push((row, col, 1.0 + rng.random::<f64>()));
            } else if rng.random_bool(0.6) {
                triplets.push((row, col, rng.random_range(-1.0..1.0)));
            }
        }
    }
    let c = CscMatrix::from_triplets(m, n, &triplets).unwrap();
    let d = (0..m).map(|_| rng.random_range(-1.0..1.0)).collect();
    (c, d)
}

/// Exhaustive NNLS: best feasible unconstrained solution over every column subset.
fn brute_force_nnls(c: &CscMatrix, d: &[f64]) -> (Vec<f64>, f64) {
    let n = c.ncols();
    let mut qr = SparseQr::default();
    let mut best = (vec![0.0; n], residual_norm(c, d, &vec![0.0; n]));
    for mask in 1u32..(1 << n) {
        let cols: Vec<usize> = (0..n).filter(|j| mask & (1 << j) != 0).collect();
        let Ok(z) = qr.solve(&c.select_columns(&cols), d) else {
            continue;
        };
        if z.iter().any(|&v| v < 0.0) {
            continue;
        }
        let mut x = vec![0.0; n];
        for (&col, &v) in cols.iter().zip(&z) {
            x[col] = v;
        }
        let res = residual_norm(c, d, &x);
        if res < best.1 {
            best = (x, res);
        }
    }
    best
}

#[test]
fn unconstrained_optimum_is_returned_when_feasible() {
    // Consistent system with a positive solution [1, 2].
    let c = matrix_from_triplets_1b(3, 2, &[(1, 1, 1.0), (3, 1, 1.0), (2, 2, 2.0), (3, 2, 1.0)]);
    let (x, status) = solve_default(&c, &[1.0, 4.0, 3.0]);
    assert_eq!(status, SolveStatus::AllPassive);
    assert!((x[0] - 1.0).abs() <= 1e-10);
    assert!((x[1] - 2.0).abs() <= 1e-10);
}

#[test]
fn negative_correlation_keeps_column_at_zero() {
    let c = matrix_from_triplets_1b(2, 2, &[(1, 1, 1.0), (2, 2, 1.0)]);
    let (x, status) = solve_default(&c, &[3.0, -1.0]);
    assert_converged(status);
    assert!((x[0] - 3.0).abs() <= 1e-12);
    assert_eq!(x[1], 0.0);
}

#[test]
fn zero_rhs_gives_zero_solution() {
    let c = matrix_from_triplets_1b(2, 2, &[(1, 1, 1.0), (2, 1, 1.0), (2, 2, 1.0)]);
    let (x, status) = solve_default(&c, &[0.0, 0.0]);
    assert_eq!(status, SolveStatus::Converged);
    assert_eq!(x, vec![0.0, 0.0]);
}

#[test]
fn matches_exhaustive_search() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..20 {
        let (c, d) = random_problem(&mut rng, 8, 5);
        let (x, status) = solve_default(&c, &d);
        assert_converged(status);
        let (expected, expected_res) = brute_force_nnls(&c, &d);
        let res = residual_norm(&c, &d, &x);
        assert!((res - expected_res).abs() <= 1e-9, "{res} vs {expected_res}");
        for (a, b) in x.iter().zip(&expected) {
            assert!((a - b).abs() <= 1e-8, "{x:?} vs {expected:?}");
        }
    }
}

#[test]
fn solution_is_feasible_and_satisfies_kkt() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let (c, d) = random_problem(&mut rng, 10, 7);
        let mut solver: NnlsSolver = NnlsSolver::default();
        let solution = solver.solve(&c, &d, &NnlsOptions::default(), None).unwrap();
        assert_converged(solution.stats.status);
        let tol = solution.stats.tol;
        assert!((tol - default_tolerance(&c)).abs() <= f64::EPSILON * tol);
        let w = multipliers(&c, &d, &solution.x);
        for (&xj, &wj) in solution.x.iter().zip(&w) {
            assert!(xj >= -tol, "infeasible entry {xj}");
            if xj > tol {
                assert!(wj.abs() <= 1e-9, "slackness violated: x = {xj}, w = {wj}");
            } else {
                assert!(wj <= 1e-9, "multiplier {wj} at a zero entry");
            }
        }
    }
}

#[test]
fn repeated_solves_are_identical() {
    let mut rng = StdRng::seed_from_u64(3);
    let (c, d) = random_problem(&mut rng, 12, 9);
    let (first, _) = solve_default(&c, &d);
    let (second, _) = solve_default(&c, &d);
    assert_eq!(first, second);
}

#[test]
fn ties_enter_lowest_index_first() {
    // Columns 0 and 1 are identical; only the first may become passive.
    let c = matrix_from_triplets_1b(2, 2, &[(1, 1, 1.0), (2, 1, 1.0), (1, 2, 1.0), (2, 2, 1.0)]);
    let (x, status) = solve_default(&c, &[1.0, 1.0]);
    assert_eq!(status, SolveStatus::Converged);
    assert!((x[0] - 1.0).abs() <= 1e-12);
    assert_eq!(x[1], 0.0);
}

#[test]
fn lsqr_backend_matches_qr() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..10 {
        let (c, d) = random_problem(&mut rng, 8, 5);
        let (expected, _) = solve_default(&c, &d);
        let mut solver = NnlsSolver::new(Lsqr::default());
        let solution = solver.solve(&c, &d, &NnlsOptions::default(), None).unwrap();
        assert_converged(solution.stats.status);
        for (a, b) in solution.x.iter().zip(&expected) {
            assert!((a - b).abs() <= 1e-6, "{:?} vs {expected:?}", solution.x);
        }
    }
}

#[test]
fn boxed_backend_is_accepted() {
    let c = matrix_from_triplets_1b(2, 1, &[(1, 1, 1.0), (2, 1, 1.0)]);
    let backend: Box<dyn LeastSquares> = Box::new(Lsqr::default());
    let mut solver = NnlsSolver::new(backend);
    let solution = solver.solve(&c, &[1.0, 3.0], &NnlsOptions::default(), None).unwrap();
    assert!((solution.x[0] - 2.0).abs() <= 1e-10);
}

#[test]
fn explicit_tolerance_is_used() {
    let c = matrix_from_triplets_1b(1, 1, &[(1, 1, 1.0)]);
    let options = NnlsOptions {
        tol: Some(0.5),
        ..NnlsOptions::default()
    };
    let mut solver: NnlsSolver = NnlsSolver::default();
    // w = 0.25 is below the tolerance, so nothing enters.
    let solution = solver.solve(&c, &[0.25], &options, None).unwrap();
    assert_eq!(solution.stats.tol, 0.5);
    assert_eq!(solution.stats.status, SolveStatus::Converged);
    assert_eq!(solution.x, vec![0.0]);
}

#[test]
fn exact_fit_stops_before_second_column() {
    // One row: column 1 alone fits exactly, so column 0 never enters.
    let c = matrix_from_triplets_1b(1, 2, &[(1, 1, 1.0), (1, 2, 2.0)]);
    let (x, status) = solve_default(&c, &[1.0]);
    assert_eq!(status, SolveStatus::Converged);
    assert!((x[1] - 0.5).abs() <= 1e-12);
    assert_eq!(x[0], 0.0);
}

#[test]
fn subproblem_failure_is_propagated() {
    struct Failing;
    impl LeastSquares for Failing {
        fn solve(&mut self, _a: &CscMatrix, _b: &[f64]) -> Result<Vec<f64>, LstsqError> {
            Err(LstsqError::Singular)
        }
    }
    let c = matrix_from_triplets_1b(2, 1, &[(1, 1, 1.0), (2, 1, 1.0)]);
    let mut solver = NnlsSolver::new(Failing);
    let err = solver
        .solve(&c, &[1.0, 1.0], &NnlsOptions::default(), None)
        .unwrap_err();
    assert!(matches!(err, SolveError::Subproblem(LstsqError::Singular)));
}

#[test]
fn dimension_mismatch_is_reported() {
    let c = matrix_from_triplets_1b(2, 1, &[(1, 1, 1.0)]);
    let mut solver: NnlsSolver = NnlsSolver::default();
    let err = solver
        .solve(&c, &[1.0, 2.0, 3.0], &NnlsOptions::default(), None)
        .unwrap_err();
    assert!(matches!(err, SolveError::DimensionMismatch { expected: 2, actual: 3 }));
}

#[derive(Default)]
struct CountingReporter {
    rows: Vec<IterationReport>,
    finished: usize,
}

impl Reporter for CountingReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        self.finished += 1;
    }
}

#[test]
fn reporter_sees_every_outer_iteration() {
    let mut rng = StdRng::seed_from_u64(5);
    let (c, d) = random_problem(&mut rng, 8, 6);
    let mut reporter = CountingReporter::default();
    let mut solver: NnlsSolver = NnlsSolver::default();
    let solution = solver
        .solve(&c, &d, &NnlsOptions::default(), Some(&mut reporter))
        .unwrap();
    assert_eq!(reporter.finished, 1);
    assert_eq!(reporter.rows.len(), solution.stats.outer_iterations);
    for (i, row) in reporter.rows.iter().enumerate() {
        assert_eq!(row.iteration, i + 1);
        assert!(row.multiplier > solution.stats.tol);
    }
    if let Some(last) = reporter.rows.last() {
        assert_eq!(last.passive, solution.stats.passive);
    }
}

#[test]
fn verbose_solve_prints_summary() {
    let c = matrix_from_triplets_1b(2, 2, &[(1, 1, 10.0), (1, 2, 0.6), (2, 2, 0.8)]);
    let options = NnlsOptions {
        verbose: true,
        ..NnlsOptions::default()
    };
    let mut solver: NnlsSolver = NnlsSolver::default();
    let solution = solver.solve(&c, &[0.1, 1.0], &options, None).unwrap();
    assert_eq!(solution.stats.inner_iterations, 1);
    assert!((solution.x[1] - 0.86).abs() <= 1e-12);
}
