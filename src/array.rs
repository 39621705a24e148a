//! Assay and embedding matrices.
//!
//! Arrays read from a dataset start as [`ReloadedArray`] handles that only
//! know where their payload lives and what shape it has. The payload is
//! opened on first access (`realize` or `value`). Realized arrays are dense
//! column-major or compressed sparse column matrices, following the
//! sparsity the payload declares.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ScrnaError;
use crate::reader::read_json;

pub const DENSE_PAYLOAD: &str = "array.json";
pub const SPARSE_PAYLOAD: &str = "matrix.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    nrow: usize,
    ncol: usize,
    dtype: DataType,
    values: Vec<f64>,
}

impl DenseMatrix {
    /// `values` are column-major; missing entries are `NaN`.
    pub fn new(
        nrow: usize,
        ncol: usize,
        dtype: DataType,
        values: Vec<f64>,
    ) -> Result<Self, ScrnaError> {
        let expected = element_count(nrow, ncol)?;
        if values.len() != expected {
            return Err(ScrnaError::DimensionMismatch {
                context: format!("dense matrix of shape {nrow}x{ncol}"),
                expected,
                found: values.len(),
            });
        }
        Ok(Self {
            nrow,
            ncol,
            dtype,
            values,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrow || col >= self.ncol {
            return None;
        }
        self.values.get(col * self.nrow + row).copied()
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Fraction of entries that are non-zero or missing.
    pub fn density(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let occupied = self
            .values
            .iter()
            .filter(|value| **value != 0.0 || value.is_nan())
            .count();
        occupied as f64 / self.values.len() as f64
    }

    pub fn to_sparse(&self) -> SparseMatrix {
        let mut indptr = Vec::with_capacity(self.ncol + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for col in 0..self.ncol {
            for row in 0..self.nrow {
                let value = self.values[col * self.nrow + row];
                if value != 0.0 || value.is_nan() {
                    indices.push(row);
                    data.push(value);
                }
            }
            indptr.push(data.len());
        }
        SparseMatrix {
            nrow: self.nrow,
            ncol: self.ncol,
            dtype: self.dtype,
            indptr,
            indices,
            data,
        }
    }
}

/// Number of entries of an `nrow` x `ncol` matrix. Constructors check it
/// so that the layouts below can index without overflowing.
fn element_count(nrow: usize, ncol: usize) -> Result<usize, ScrnaError> {
    nrow.checked_mul(ncol).ok_or_else(|| shape_overflow(nrow, ncol))
}

fn shape_overflow(nrow: usize, ncol: usize) -> ScrnaError {
    ScrnaError::Object {
        path: "matrix".to_string(),
        message: format!("shape {nrow}x{ncol} is too large"),
    }
}

/// Compressed sparse column matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    nrow: usize,
    ncol: usize,
    dtype: DataType,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl SparseMatrix {
    pub fn new(
        nrow: usize,
        ncol: usize,
        dtype: DataType,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self, ScrnaError> {
        element_count(nrow, ncol)?;
        let pointer_count = ncol.checked_add(1).ok_or_else(|| shape_overflow(nrow, ncol))?;
        if indptr.len() != pointer_count {
            return Err(ScrnaError::DimensionMismatch {
                context: "sparse matrix column pointers".to_string(),
                expected: pointer_count,
                found: indptr.len(),
            });
        }
        if indices.len() != data.len() {
            return Err(ScrnaError::DimensionMismatch {
                context: "sparse matrix row indices".to_string(),
                expected: data.len(),
                found: indices.len(),
            });
        }
        let pointers_ok = indptr.first() == Some(&0)
            && indptr.last() == Some(&data.len())
            && indptr.windows(2).all(|pair| pair[0] <= pair[1]);
        if !pointers_ok {
            return Err(ScrnaError::Object {
                path: "sparse matrix".to_string(),
                message: "column pointers are not monotonic".to_string(),
            });
        }
        for col in 0..ncol {
            let rows = &indices[indptr[col]..indptr[col + 1]];
            let sorted = rows.windows(2).all(|pair| pair[0] < pair[1]);
            if !sorted || rows.iter().any(|row| *row >= nrow) {
                return Err(ScrnaError::Object {
                    path: "sparse matrix".to_string(),
                    message: format!("invalid row indices in column {col}"),
                });
            }
        }
        Ok(Self {
            nrow,
            ncol,
            dtype,
            indptr,
            indices,
            data,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn density(&self) -> f64 {
        let total = self.nrow * self.ncol;
        if total == 0 {
            return 0.0;
        }
        self.data.len() as f64 / total as f64
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.nrow || col >= self.ncol {
            return None;
        }
        let rows = &self.indices[self.indptr[col]..self.indptr[col + 1]];
        match rows.binary_search(&row) {
            Ok(pos) => Some(self.data[self.indptr[col] + pos]),
            Err(_) => Some(0.0),
        }
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut values = vec![0.0; self.nrow * self.ncol];
        for col in 0..self.ncol {
            for idx in self.indptr[col]..self.indptr[col + 1] {
                values[col * self.nrow + self.indices[idx]] = self.data[idx];
            }
        }
        DenseMatrix {
            nrow: self.nrow,
            ncol: self.ncol,
            dtype: self.dtype,
            values,
        }
    }
}

/// Lazily-backed array: a payload location plus its declared layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ReloadedArray {
    location: Utf8PathBuf,
    shape: (usize, usize),
    dtype: DataType,
    sparse: bool,
}

#[derive(Deserialize)]
struct DensePayload {
    values: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct SparsePayload {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<Option<f64>>,
}

impl ReloadedArray {
    pub fn new(location: Utf8PathBuf, shape: (usize, usize), dtype: DataType, sparse: bool) -> Self {
        Self {
            location,
            shape,
            dtype,
            sparse,
        }
    }

    /// Directory holding the payload.
    pub fn location(&self) -> &Utf8Path {
        &self.location
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn realize(&self) -> Result<ArrayData, ScrnaError> {
        let (nrow, ncol) = self.shape;
        if self.sparse {
            let payload: SparsePayload = read_json(&self.location.join(SPARSE_PAYLOAD))?;
            let data = payload.data.into_iter().map(or_nan).collect();
            let matrix =
                SparseMatrix::new(nrow, ncol, self.dtype, payload.indptr, payload.indices, data)
                    .map_err(|err| self.payload_error(err))?;
            Ok(ArrayData::Sparse(matrix))
        } else {
            let payload: DensePayload = read_json(&self.location.join(DENSE_PAYLOAD))?;
            let values = payload.values.into_iter().map(or_nan).collect();
            let matrix = DenseMatrix::new(nrow, ncol, self.dtype, values)
                .map_err(|err| self.payload_error(err))?;
            Ok(ArrayData::Dense(matrix))
        }
    }

    fn payload_error(&self, err: ScrnaError) -> ScrnaError {
        match err {
            ScrnaError::DimensionMismatch {
                expected, found, ..
            } => ScrnaError::DimensionMismatch {
                context: format!("payload of {}", self.location),
                expected,
                found,
            },
            ScrnaError::Object { message, .. } => ScrnaError::Object {
                path: self.location.to_string(),
                message,
            },
            other => other,
        }
    }
}

fn or_nan(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Reloaded(ReloadedArray),
    Dense(DenseMatrix),
    Sparse(SparseMatrix),
}

impl ArrayData {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            ArrayData::Reloaded(array) => array.shape(),
            ArrayData::Dense(matrix) => matrix.shape(),
            ArrayData::Sparse(matrix) => matrix.shape(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            ArrayData::Reloaded(array) => array.dtype(),
            ArrayData::Dense(matrix) => matrix.dtype(),
            ArrayData::Sparse(matrix) => matrix.dtype(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        match self {
            ArrayData::Reloaded(array) => array.is_sparse(),
            ArrayData::Dense(_) => false,
            ArrayData::Sparse(_) => true,
        }
    }

    pub fn is_realized(&self) -> bool {
        !matches!(self, ArrayData::Reloaded(_))
    }

    /// Loads a lazy array into memory; realized arrays are returned as is.
    pub fn realize(self) -> Result<ArrayData, ScrnaError> {
        match self {
            ArrayData::Reloaded(array) => array.realize(),
            realized => Ok(realized),
        }
    }

    /// Reads one entry, opening the payload if the array is still lazy.
    /// Returns `None` when the position is out of range.
    pub fn value(&self, row: usize, col: usize) -> Result<Option<f64>, ScrnaError> {
        match self {
            ArrayData::Reloaded(array) => array.realize()?.value(row, col),
            ArrayData::Dense(matrix) => Ok(matrix.get(row, col)),
            ArrayData::Sparse(matrix) => Ok(matrix.get(row, col)),
        }
    }
}
