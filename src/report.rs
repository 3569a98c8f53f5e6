use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// How an NNLS solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// No multiplier of an active column exceeds the tolerance (KKT point).
    Converged,
    /// Every column ended up passive.
    AllPassive,
    /// The inner-iteration budget ran out; the returned vector is the last
    /// unconstrained subsolution and may be infeasible.
    MaxIterations,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, Self::Converged | Self::AllPassive)
    }
}

#[derive(Debug, Clone)]
pub struct SolverStats {
    pub status: SolveStatus,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub tol: f64,
    pub residual_norm: f64,
    pub max_multiplier: f64,
    pub passive: usize,
}

/// One row per outer iteration of the active-set method.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    pub entering: usize,
    pub multiplier: f64,
    pub inner_steps: usize,
    pub passive: usize,
    pub residual_norm: f64,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("enter").set_alignment(CellAlignment::Right),
            Cell::new("w").set_alignment(CellAlignment::Right),
            Cell::new("inner").set_alignment(CellAlignment::Right),
            Cell::new("passive").set_alignment(CellAlignment::Right),
            Cell::new("resid").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(row.entering).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.multiplier)).set_alignment(CellAlignment::Right),
                Cell::new(row.inner_steps).set_alignment(CellAlignment::Right),
                Cell::new(row.passive).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.residual_norm)).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
