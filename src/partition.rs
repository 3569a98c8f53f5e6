/// Which side of the active-set partition a column is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// Free to take a nonzero value.
    Passive,
    /// Held at zero.
    Active,
}

/// Tagged partition of `0..n` into passive and active columns.
///
/// Every column carries exactly one tag, so the two sets always cover all columns
/// without overlap.
#[derive(Debug, Clone)]
pub(crate) struct ActiveSet {
    sides: Vec<Side>,
    passive: usize,
}

impl ActiveSet {
    /// All columns active.
    pub(crate) fn new(n: usize) -> Self {
        Self {
            sides: vec![Side::Active; n],
            passive: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sides.len()
    }

    pub(crate) fn passive_len(&self) -> usize {
        self.passive
    }

    pub(crate) fn is_passive(&self, col: usize) -> bool {
        self.sides[col] == Side::Passive
    }

    pub(crate) fn make_passive(&mut self, col: usize) {
        if self.sides[col] == Side::Active {
            self.sides[col] = Side::Passive;
            self.passive += 1;
        }
    }

    pub(crate) fn make_active(&mut self, col: usize) {
        if self.sides[col] == Side::Passive {
            self.sides[col] = Side::Active;
            self.passive -= 1;
        }
    }

    /// Passive columns in increasing order.
    pub(crate) fn passive_indices(&self) -> Vec<usize> {
        self.sides
            .iter()
            .enumerate()
            .filter_map(|(col, &side)| (side == Side::Passive).then_some(col))
            .collect()
    }

    /// Active column with the largest `w`, lowest index on ties.
    ///
    /// Returns `None` when no column is active.
    pub(crate) fn argmax_active(&self, w: &[f64]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (col, &side) in self.sides.iter().enumerate() {
            if side != Side::Active {
                continue;
            }
            match best {
                Some((_, value)) if w[col] <= value => {}
                _ => best = Some((col, w[col])),
            }
        }
        best
    }
}
