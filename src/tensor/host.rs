//! Host-visible tensor snapshots.

use crate::error::{FlexForgeError, ForgeResult};
use crate::tensor::{element_count, DType};

/// Row-major host copy of a tensor's values.
///
/// Values travel as f64 regardless of the storage type; `dtype` records what
/// they were read from (or should be written as).
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl HostTensor {
    pub fn from_vec(dtype: DType, shape: Vec<usize>, data: Vec<f64>) -> ForgeResult<Self> {
        let expected = element_count(&shape);
        if data.len() != expected {
            return Err(FlexForgeError::ShapeMismatch {
                expected: shape,
                got: vec![data.len()],
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn full(dtype: DType, shape: Vec<usize>, value: f64) -> Self {
        let n = element_count(&shape);
        Self {
            dtype,
            shape,
            data: vec![value; n],
        }
    }

    /// `0, 1, 2, ...` in row-major order.
    pub fn arange(dtype: DType, shape: Vec<usize>) -> Self {
        let n = element_count(&shape);
        Self {
            dtype,
            shape,
            data: (0..n).map(|i| i as f64).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar(&self) -> ForgeResult<f64> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(FlexForgeError::NotAScalar(self.shape.clone())),
        }
    }

    /// Value at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &dim) in index.iter().zip(self.shape.iter()) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        self.data.get(flat).copied()
    }

    /// Reference permutation: result axis `k` is this tensor's axis `axes[k]`.
    pub fn permute(&self, axes: &[usize]) -> ForgeResult<Self> {
        crate::tensor::check_permutation(axes, self.rank())?;
        let out_shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let src_strides = crate::tensor::contiguous_strides(&self.shape);
        let mut data = Vec::with_capacity(self.data.len());
        let mut index = vec![0usize; out_shape.len()];
        for _ in 0..self.data.len() {
            let src: isize = index
                .iter()
                .enumerate()
                .map(|(k, &i)| i as isize * src_strides[axes[k]])
                .sum();
            data.push(self.data[src as usize]);
            advance(&mut index, &out_shape);
        }
        Ok(Self {
            dtype: self.dtype,
            shape: out_shape,
            data,
        })
    }
}

/// Increment a row-major multi-index (rightmost dimension first).
pub(crate) fn advance(index: &mut [usize], dims: &[usize]) {
    for i in (0..dims.len()).rev() {
        index[i] += 1;
        if index[i] < dims[i] {
            return;
        }
        index[i] = 0;
    }
}
