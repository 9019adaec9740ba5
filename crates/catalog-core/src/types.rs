//! Common types.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Dense row-major 2-D matrix.
///
/// Rows are features (tokens or hash functions), columns are items. Column
/// order is the item order and stays stable through every transformation
/// except [`Matrix::select_columns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> Matrix<T> {
    /// Wrap row-major `data` with the given shape.
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(CoreError::ShapeMismatch {
                expected: format!("{rows}x{cols}"),
                got: format!("{} elements", data.len()),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// True when the matrix has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `(row, col)`, if in range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// One row as a slice.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn row(&self, row: usize) -> &[T] {
        assert!(row < self.rows, "row {row} out of range ({})", self.rows);
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Mutable access to one row.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        assert!(row < self.rows, "row {row} out of range ({})", self.rows);
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Iterate one column top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = &T> + '_ {
        let cols = self.cols;
        let take = if col < cols { self.rows } else { 0 };
        self.data.iter().skip(col).step_by(cols.max(1)).take(take)
    }

    /// Row-major element storage.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consume into row-major storage.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Element-wise conversion preserving shape.
    #[must_use]
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Clone> Matrix<T> {
    /// Matrix of the given shape with every element set to `value`.
    #[must_use]
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build from a list of equally sized rows.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let num_rows = rows.len();
        let mut data = Vec::with_capacity(num_rows * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(CoreError::ShapeMismatch {
                    expected: format!("{cols} columns"),
                    got: format!("{} columns in row {i}", row.len()),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: num_rows,
            cols,
            data,
        })
    }

    /// Copy one column into a vector.
    #[must_use]
    pub fn column_vec(&self, col: usize) -> Vec<T> {
        self.column(col).cloned().collect()
    }

    /// New matrix made of the given columns, in the given order.
    ///
    /// Columns may repeat, which bootstrap samples rely on.
    pub fn select_columns(&self, columns: &[usize]) -> Result<Self> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.cols) {
            return Err(CoreError::ShapeMismatch {
                expected: format!("column < {}", self.cols),
                got: format!("column {bad}"),
            });
        }
        let mut data = Vec::with_capacity(self.rows * columns.len());
        for r in 0..self.rows {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            data.extend(columns.iter().map(|&c| row[c].clone()));
        }
        Ok(Self {
            rows: self.rows,
            cols: columns.len(),
            data,
        })
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        &self.row(row)[col]
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        assert!(col < self.cols, "column {col} out of range ({})", self.cols);
        &mut self.row_mut(row)[col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix<u32> {
        Matrix::from_rows(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap()
    }

    #[test]
    fn test_shape_and_access() {
        let m = sample();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(1, 2)], 6);
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.row(0), &[1, 2, 3]);
        assert_eq!(m.column_vec(1), vec![2, 5]);
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let result = Matrix::new(2, 2, vec![1u8, 2, 3]);
        assert!(matches!(result, Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let result = Matrix::from_rows(vec![vec![1u8, 2], vec![3]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_select_columns_with_repeats() {
        let m = sample();
        let s = m.select_columns(&[2, 0, 2]).unwrap();
        assert_eq!(s.shape(), (2, 3));
        assert_eq!(s.row(0), &[3, 1, 3]);
        assert_eq!(s.row(1), &[6, 4, 6]);

        assert!(m.select_columns(&[3]).is_err());
    }

    #[test]
    fn test_empty_matrix_column_iter() {
        let m: Matrix<u8> = Matrix::filled(3, 0, 0);
        assert!(m.is_empty());
        assert_eq!(m.column(0).count(), 0);
    }

    #[test]
    fn test_map_preserves_shape() {
        let m = sample().map(|&v| v % 2 == 0);
        assert_eq!(m.shape(), (2, 3));
        assert!(m[(0, 1)]);
        assert!(!m[(0, 0)]);
    }
}
