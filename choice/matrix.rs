//! Compressed sparse-column storage for the design matrix.
//!
//! The design matrix is structurally sparse: intercept and interaction
//! columns are zero outside one subject's or one alternative's rows, so a
//! dense layout would grow quadratically with the number of repeat subjects.
//! Only the two kernels the likelihood engine needs are implemented: a
//! matrix-vector product (linear predictors per row) and a transposed
//! matrix-vector product (gradient accumulation).

use ndarray::Array1;

/// Column-major sparse matrix with explicit `col_ptr` / `row_idx` / `values`
/// arrays. Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CscMatrix {
    /// Assembles a matrix from per-column entry lists. Row indices within a
    /// column must be strictly ascending and below `nrows`.
    pub fn from_columns(nrows: usize, columns: Vec<Vec<(usize, f64)>>) -> Self {
        let ncols = columns.len();
        let nnz: usize = columns.iter().map(Vec::len).sum();
        let mut col_ptr = Vec::with_capacity(ncols + 1);
        let mut row_idx = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        col_ptr.push(0);
        for column in columns {
            for (row, value) in column {
                debug_assert!(row < nrows);
                debug_assert!(row_idx.len() == col_ptr[col_ptr.len() - 1]
                    || *row_idx.last().unwrap() < row);
                row_idx.push(row);
                values.push(value);
            }
            col_ptr.push(row_idx.len());
        }
        Self {
            nrows,
            ncols,
            col_ptr,
            row_idx,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Fraction of stored cells, useful for logging the blow-up avoided.
    pub fn density(&self) -> f64 {
        if self.nrows == 0 || self.ncols == 0 {
            return 0.0;
        }
        self.nnz() as f64 / (self.nrows as f64 * self.ncols as f64)
    }

    /// Computes `X · theta`, one value per row.
    pub fn matrix_vector_multiply(&self, theta: &Array1<f64>) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.nrows);
        for col in 0..self.ncols {
            let start = self.col_ptr[col];
            let end = self.col_ptr[col + 1];
            let x = theta[col];
            for idx in start..end {
                output[self.row_idx[idx]] += self.values[idx] * x;
            }
        }
        output
    }

    /// Computes `Xᵀ · w`, one value per column.
    pub fn transpose_vector_multiply(&self, w: &[f64]) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.ncols);
        for col in 0..self.ncols {
            let mut acc = 0.0;
            let start = self.col_ptr[col];
            let end = self.col_ptr[col + 1];
            for idx in start..end {
                acc += self.values[idx] * w[self.row_idx[idx]];
            }
            output[col] = acc;
        }
        output
    }

    /// Dense copy of a single column, mainly for tests and diagnostics.
    pub fn column_dense(&self, col: usize) -> Array1<f64> {
        let mut output = Array1::<f64>::zeros(self.nrows);
        for idx in self.col_ptr[col]..self.col_ptr[col + 1] {
            output[self.row_idx[idx]] = self.values[idx];
        }
        output
    }
}
