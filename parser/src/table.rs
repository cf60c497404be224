//! Row capture and column-major conversion for tabular bodies.

use crate::types::ParseError;

/// Row-major buffer that enforces a fixed cell count per row.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    width: usize,
    rows: Vec<Vec<f64>>,
}

impl RowBuffer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row read from `line`, failing if its cell count differs.
    pub fn push(&mut self, line: usize, row: Vec<f64>) -> Result<(), ParseError> {
        if row.len() != self.width {
            return Err(ParseError::RowColumnMismatch {
                line,
                expected: self.width,
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }

    pub fn into_columns(self) -> Vec<Vec<f64>> {
        transpose(&self.rows)
    }
}

/// Convert equal-length rows into columns: `out[c][r] == rows[r][c]`.
///
/// Zero rows give an empty result.
pub fn transpose(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    (0..first.len())
        .map(|c| rows.iter().map(|row| row[c]).collect())
        .collect()
}

/// Truncate or pad `headers` to `columns` entries, naming padding with
/// `placeholder(index)`.
pub fn fit_headers(
    mut headers: Vec<String>,
    columns: usize,
    placeholder: impl Fn(usize) -> String,
) -> Vec<String> {
    headers.truncate(columns);
    let start = headers.len();
    headers.extend((start..columns).map(placeholder));
    headers
}
