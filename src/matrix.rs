use core::fmt;
use core::ops::Range;

use faer_core::sparse::{SparseColMatRef, SymbolicSparseColMatRef};

/// Sparse matrix in compressed sparse column (CSC) form.
///
/// Indices are zero-based; each column's row indices must be strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    col_ptrs: Vec<usize>,
    row_indices: Vec<usize>,
    values: Vec<f64>,
}

/// Validation errors for a CscMatrix.
#[derive(Debug, Clone)]
pub enum MatrixError {
    /// col_ptrs length is not ncols + 1.
    ColPtrLen { expected: usize, actual: usize },
    /// col_ptrs[0] is not 0.
    ColPtrStart { value: usize },
    /// col_ptrs is not non-decreasing.
    ColPtrNotMonotonic { col: usize, prev: usize, next: usize },
    /// col_ptrs[ncols] does not match row_indices length.
    ColPtrOutOfBounds { last: usize, row_indices_len: usize },
    /// values and row_indices have different lengths.
    ValuesLen { expected: usize, actual: usize },
    /// A row index is >= nrows.
    RowIndexOutOfBounds { col: usize, row: usize, nrows: usize },
    /// Row indices in a column are not strictly increasing.
    RowIndexNotSorted { col: usize, prev: usize, next: usize },
    /// A stored value is NaN or infinite.
    NonFiniteValue { row: usize, col: usize },
    /// A triplet or dense entry lies outside the matrix shape.
    EntryOutOfBounds { row: usize, col: usize, nrows: usize, ncols: usize },
    /// Dense input does not hold nrows * ncols values.
    DenseLen { expected: usize, actual: usize },
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColPtrLen { expected, actual } => {
                write!(f, "col_ptrs length {actual} does not match expected {expected}")
            }
            Self::ColPtrStart { value } => {
                write!(f, "col_ptrs must start at 0 (got {value})")
            }
            Self::ColPtrNotMonotonic { col, prev, next } => {
                write!(f, "col_ptrs not monotonic at col {col}: {prev} > {next}")
            }
            Self::ColPtrOutOfBounds {
                last,
                row_indices_len,
            } => {
                write!(
                    f,
                    "col_ptrs end {last} does not match row_indices length {row_indices_len}"
                )
            }
            Self::ValuesLen { expected, actual } => {
                write!(f, "values length {actual} does not match row_indices length {expected}")
            }
            Self::RowIndexOutOfBounds { col, row, nrows } => {
                write!(f, "row index {row} in col {col} exceeds nrows {nrows}")
            }
            Self::RowIndexNotSorted { col, prev, next } => {
                write!(f, "row indices not sorted in col {col}: {prev} >= {next}")
            }
            Self::NonFiniteValue { row, col } => {
                write!(f, "non-finite value at ({row}, {col})")
            }
            Self::EntryOutOfBounds {
                row,
                col,
                nrows,
                ncols,
            } => {
                write!(f, "entry ({row}, {col}) outside {nrows}x{ncols} matrix")
            }
            Self::DenseLen { expected, actual } => {
                write!(f, "dense data length {actual} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for MatrixError {}

impl CscMatrix {
    /// Creates a validated CSC matrix.
    ///
    /// Requirements:
    /// - `col_ptrs.len() == ncols + 1`
    /// - `col_ptrs` is non-decreasing and starts at `0`
    /// - `col_ptrs[ncols] == row_indices.len() == values.len()`
    /// - row indices are strictly increasing and `< nrows` within each column
    /// - every value is finite
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, MatrixError> {
        let expected = ncols + 1;
        if col_ptrs.len() != expected {
            return Err(MatrixError::ColPtrLen {
                expected,
                actual: col_ptrs.len(),
            });
        }
        if col_ptrs[0] != 0 {
            return Err(MatrixError::ColPtrStart {
                value: col_ptrs[0],
            });
        }
        for col in 0..ncols {
            let prev = col_ptrs[col];
            let next = col_ptrs[col + 1];
            if prev > next {
                return Err(MatrixError::ColPtrNotMonotonic { col, prev, next });
            }
        }
        let last = col_ptrs[ncols];
        if last != row_indices.len() {
            return Err(MatrixError::ColPtrOutOfBounds {
                last,
                row_indices_len: row_indices.len(),
            });
        }
        if values.len() != row_indices.len() {
            return Err(MatrixError::ValuesLen {
                expected: row_indices.len(),
                actual: values.len(),
            });
        }

        for col in 0..ncols {
            let start = col_ptrs[col];
            let end = col_ptrs[col + 1];
            let mut prev: Option<usize> = None;
            for idx in start..end {
                let row = row_indices[idx];
                if row >= nrows {
                    return Err(MatrixError::RowIndexOutOfBounds { col, row, nrows });
                }
                if let Some(prev) = prev {
                    if prev >= row {
                        return Err(MatrixError::RowIndexNotSorted { col, prev, next: row });
                    }
                }
                if !values[idx].is_finite() {
                    return Err(MatrixError::NonFiniteValue { row, col });
                }
                prev = Some(row);
            }
        }

        Ok(Self {
            nrows,
            ncols,
            col_ptrs,
            row_indices,
            values,
        })
    }

    /// Builds a matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates are summed and entries that end up exactly zero are dropped.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self, MatrixError> {
        let mut cols: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ncols];
        for &(row, col, value) in triplets {
            if row >= nrows || col >= ncols {
                return Err(MatrixError::EntryOutOfBounds {
                    row,
                    col,
                    nrows,
                    ncols,
                });
            }
            cols[col].push((row, value));
        }

        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());
        col_ptrs.push(0);
        for mut entries in cols {
            entries.sort_by_key(|&(row, _)| row);
            let mut iter = entries.into_iter().peekable();
            while let Some((row, mut value)) = iter.next() {
                while let Some(&(next_row, next_value)) = iter.peek() {
                    if next_row != row {
                        break;
                    }
                    value += next_value;
                    iter.next();
                }
                if value != 0.0 {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptrs.push(row_indices.len());
        }

        Self::new(nrows, ncols, col_ptrs, row_indices, values)
    }

    /// Builds a matrix from row-major dense data, storing only the nonzero entries.
    pub fn from_dense(nrows: usize, ncols: usize, data: &[f64]) -> Result<Self, MatrixError> {
        let expected = nrows * ncols;
        if data.len() != expected {
            return Err(MatrixError::DenseLen {
                expected,
                actual: data.len(),
            });
        }
        let mut col_ptrs = Vec::with_capacity(ncols + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_ptrs.push(0);
        for col in 0..ncols {
            for row in 0..nrows {
                let value = data[row * ncols + col];
                if value != 0.0 {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptrs.push(row_indices.len());
        }
        Self::new(nrows, ncols, col_ptrs, row_indices, values)
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    /// Column pointer array in CSC format.
    pub fn col_ptrs(&self) -> &[usize] {
        &self.col_ptrs
    }

    /// Row index array in CSC format.
    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    /// Stored values, aligned with row_indices.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Index range in row_indices for the given column.
    pub fn col_range(&self, col: usize) -> Range<usize> {
        self.col_ptrs[col]..self.col_ptrs[col + 1]
    }

    /// Sorted row indices for the given column.
    pub fn row_indices_of_col(&self, col: usize) -> &[usize] {
        &self.row_indices[self.col_range(col)]
    }

    /// Values for the given column, aligned with row_indices_of_col.
    pub fn values_of_col(&self, col: usize) -> &[f64] {
        &self.values[self.col_range(col)]
    }

    /// Entry at `(row, col)`, zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let rows = self.row_indices_of_col(col);
        match rows.binary_search(&row) {
            Ok(pos) => self.values_of_col(col)[pos],
            Err(_) => 0.0,
        }
    }

    /// `out = A x`.
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(out.len(), self.nrows);
        out.fill(0.0);
        for col in 0..self.ncols {
            let xj = x[col];
            if xj == 0.0 {
                continue;
            }
            let range = self.col_range(col);
            for (&row, &value) in self.row_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
            {
                out[row] += value * xj;
            }
        }
    }

    /// `out = A^T r`.
    pub fn tr_mul_vec(&self, r: &[f64], out: &mut [f64]) {
        assert_eq!(r.len(), self.nrows);
        assert_eq!(out.len(), self.ncols);
        for col in 0..self.ncols {
            let range = self.col_range(col);
            let mut sum = 0.0;
            for (&row, &value) in self.row_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
            {
                sum += value * r[row];
            }
            out[col] = sum;
        }
    }

    /// `out = B^T y` where `B` is the indicator of the strictly positive entries.
    pub fn support_tr_mul_vec(&self, y: &[f64], out: &mut [f64]) {
        assert_eq!(y.len(), self.nrows);
        assert_eq!(out.len(), self.ncols);
        for col in 0..self.ncols {
            let range = self.col_range(col);
            let mut sum = 0.0;
            for (&row, &value) in self.row_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
            {
                if value > 0.0 {
                    sum += y[row];
                }
            }
            out[col] = sum;
        }
    }

    /// Induced 1-norm: the largest absolute column sum.
    pub fn norm_l1(&self) -> f64 {
        (0..self.ncols)
            .map(|col| self.values_of_col(col).iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Copy with every value multiplied by `factor`.
    ///
    /// `factor` must be finite; it is only checked in debug builds.
    pub fn scaled(&self, factor: f64) -> Self {
        debug_assert!(factor.is_finite());
        Self {
            nrows: self.nrows,
            ncols: self.ncols,
            col_ptrs: self.col_ptrs.clone(),
            row_indices: self.row_indices.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    /// Stacks the dense row `top` above this matrix, giving an `(nrows + 1) x ncols` matrix.
    ///
    /// Zero entries of `top` are not stored. Entries must be finite; like `scaled`,
    /// this is only checked in debug builds.
    pub fn with_dense_top_row(&self, top: &[f64]) -> Self {
        assert_eq!(top.len(), self.ncols);
        debug_assert!(top.iter().all(|v| v.is_finite()));
        let mut col_ptrs = Vec::with_capacity(self.ncols + 1);
        let mut row_indices = Vec::with_capacity(self.nnz() + self.ncols);
        let mut values = Vec::with_capacity(self.nnz() + self.ncols);
        col_ptrs.push(0);
        for (col, &head) in top.iter().enumerate() {
            if head != 0.0 {
                row_indices.push(0);
                values.push(head);
            }
            let range = self.col_range(col);
            row_indices.extend(self.row_indices[range.clone()].iter().map(|row| row + 1));
            values.extend_from_slice(&self.values[range]);
            col_ptrs.push(row_indices.len());
        }
        Self {
            nrows: self.nrows + 1,
            ncols: self.ncols,
            col_ptrs,
            row_indices,
            values,
        }
    }

    /// Copy restricted to the given columns, in the given order.
    pub fn select_columns(&self, cols: &[usize]) -> Self {
        let nnz = cols.iter().map(|&col| self.col_range(col).len()).sum();
        let mut col_ptrs = Vec::with_capacity(cols.len() + 1);
        let mut row_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        col_ptrs.push(0);
        for &col in cols {
            let range = self.col_range(col);
            row_indices.extend_from_slice(&self.row_indices[range.clone()]);
            values.extend_from_slice(&self.values[range]);
            col_ptrs.push(row_indices.len());
        }
        Self {
            nrows: self.nrows,
            ncols: cols.len(),
            col_ptrs,
            row_indices,
            values,
        }
    }

    /// Row-major dense copy.
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.nrows * self.ncols];
        for col in 0..self.ncols {
            let range = self.col_range(col);
            for (&row, &value) in self.row_indices[range.clone()]
                .iter()
                .zip(&self.values[range])
            {
                dense[row * self.ncols + col] = value;
            }
        }
        dense
    }

    pub(crate) fn as_symbolic(&self) -> SymbolicSparseColMatRef<'_, usize> {
        // Invariants are checked in `new` and preserved by every constructor above.
        unsafe {
            SymbolicSparseColMatRef::new_unchecked(
                self.nrows,
                self.ncols,
                &self.col_ptrs,
                None,
                &self.row_indices,
            )
        }
    }

    pub(crate) fn as_faer(&self) -> SparseColMatRef<'_, usize, f64> {
        SparseColMatRef::<'_, usize, f64>::new(self.as_symbolic(), self.values.as_slice())
    }
}
