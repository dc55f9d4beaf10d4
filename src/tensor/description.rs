//! Symbolic tensor descriptions.
//!
//! A description is what the graph compiler knows about a tensor before any
//! device memory exists: identity, element type, shape and strides. Strides
//! and offset are counted in elements, relative to the start of the backing
//! buffer, so a view (`base = Some(..)`) shares the numbers of the tensor it
//! was carved from.

use std::fmt;

use crate::error::{FlexForgeError, ForgeResult};
use crate::flex::FlexId;
use crate::malformed;
use crate::tensor::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Row-major strides for `shape`.
pub fn contiguous_strides(shape: &[usize]) -> Vec<isize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut stride: isize = 1;
    for dim in shape.iter().rev() {
        strides.push(stride);
        stride = stride.saturating_mul(*dim as isize);
    }
    strides.reverse();
    strides
}

pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().copied().product()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescription {
    pub id: TensorId,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub offset: usize,
    pub base: Option<TensorId>,
    pub flex_id: Option<FlexId>,
}

impl TensorDescription {
    /// Contiguous row-major description.
    pub fn new(id: TensorId, dtype: DType, shape: Vec<usize>) -> Self {
        let strides = contiguous_strides(&shape);
        Self {
            id,
            dtype,
            shape,
            strides,
            offset: 0,
            base: None,
            flex_id: None,
        }
    }

    /// Description with explicit strides and offset.
    pub fn with_layout(
        id: TensorId,
        dtype: DType,
        shape: Vec<usize>,
        strides: Vec<isize>,
        offset: usize,
    ) -> ForgeResult<Self> {
        let desc = Self {
            id,
            dtype,
            shape,
            strides,
            offset,
            base: None,
            flex_id: None,
        };
        desc.validate()?;
        Ok(desc)
    }

    pub fn with_flex(mut self, flex_id: FlexId) -> Self {
        self.flex_id = Some(flex_id);
        self
    }

    /// Check rank agreement and that every reachable element has a
    /// non-negative storage index.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.strides.len() != self.shape.len() {
            return Err(malformed!(
                "{}: shape {:?} has rank {} but strides {:?} have rank {}",
                self.id,
                self.shape,
                self.shape.len(),
                self.strides,
                self.strides.len()
            ));
        }
        let (lo, _) = self.index_range();
        if lo < 0 {
            return Err(malformed!(
                "{}: strides {:?} with offset {} reach index {}",
                self.id,
                self.strides,
                self.offset,
                lo
            ));
        }
        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn is_view(&self) -> bool {
        self.base.is_some()
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn byte_size(&self) -> usize {
        self.element_count().saturating_mul(self.dtype.size())
    }

    /// Smallest stride, `None` for scalars.
    pub fn min_stride(&self) -> Option<isize> {
        self.strides.iter().copied().min()
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == contiguous_strides(&self.shape)
    }

    /// Lowest and highest storage index reachable through this layout.
    pub fn index_range(&self) -> (isize, isize) {
        let mut lo = self.offset as isize;
        let mut hi = self.offset as isize;
        if self.shape.contains(&0) {
            return (lo, hi);
        }
        for (&dim, &stride) in self.shape.iter().zip(self.strides.iter()) {
            let span = (dim as isize - 1) * stride;
            if span < 0 {
                lo += span;
            } else {
                hi += span;
            }
        }
        (lo, hi)
    }

    /// Number of elements the backing buffer must hold.
    pub fn storage_len(&self) -> usize {
        let (_, hi) = self.index_range();
        (hi + 1).max(1) as usize
    }

    /// View reversing `axis`: negative stride, offset moved to the last element.
    pub fn flipped(&self, id: TensorId, axis: usize) -> ForgeResult<Self> {
        if axis >= self.rank() {
            return Err(FlexForgeError::InvalidAxes(format!(
                "cannot flip axis {} of rank-{} tensor",
                axis,
                self.rank()
            )));
        }
        let mut view = self.view(id);
        let dim = self.shape[axis];
        if dim > 0 {
            let shift = (dim as isize - 1) * self.strides[axis];
            view.offset = (self.offset as isize + shift) as usize;
        }
        view.strides[axis] = -self.strides[axis];
        view.validate()?;
        Ok(view)
    }

    /// View whose axis `k` is this description's axis `axes[k]`.
    pub fn permuted(&self, id: TensorId, axes: &[usize]) -> ForgeResult<Self> {
        check_permutation(axes, self.rank())?;
        let mut view = self.view(id);
        view.shape = axes.iter().map(|&a| self.shape[a]).collect();
        view.strides = axes.iter().map(|&a| self.strides[a]).collect();
        Ok(view)
    }

    fn view(&self, id: TensorId) -> Self {
        Self {
            id,
            base: Some(self.base.unwrap_or(self.id)),
            ..self.clone()
        }
    }
}

/// Validate that `axes` is a permutation of `0..rank`.
pub fn check_permutation(axes: &[usize], rank: usize) -> ForgeResult<()> {
    if axes.len() != rank {
        return Err(FlexForgeError::InvalidAxes(format!(
            "{:?} has {} entries for a rank-{} tensor",
            axes,
            axes.len(),
            rank
        )));
    }
    let mut seen = vec![false; rank];
    for &axis in axes {
        if axis >= rank || seen[axis] {
            return Err(FlexForgeError::InvalidAxes(format!(
                "{:?} is not a permutation of 0..{}",
                axes, rank
            )));
        }
        seen[axis] = true;
    }
    Ok(())
}

/// Inverse of a permutation.
pub fn inverse_permutation(axes: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; axes.len()];
    for (new_axis, &old_axis) in axes.iter().enumerate() {
        inverse[old_axis] = new_axis;
    }
    inverse
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(shape: Vec<usize>) -> TensorDescription {
        TensorDescription::new(TensorId(0), DType::F32, shape)
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
        assert!(desc(vec![2, 3]).is_contiguous());
    }

    #[test]
    fn test_rank_mismatch_is_malformed() {
        let result =
            TensorDescription::with_layout(TensorId(1), DType::F32, vec![2, 3], vec![1], 0);
        assert!(matches!(result, Err(FlexForgeError::MalformedDescriptor(_))));
    }

    #[test]
    fn test_negative_reach_is_malformed() {
        let result =
            TensorDescription::with_layout(TensorId(1), DType::F32, vec![3], vec![-1], 1);
        assert!(matches!(result, Err(FlexForgeError::MalformedDescriptor(_))));
    }

    #[test]
    fn test_flipped_view() {
        let base = desc(vec![2, 3]);
        let view = base.flipped(TensorId(1), 1).unwrap();
        assert_eq!(view.strides, vec![3, -1]);
        assert_eq!(view.offset, 2);
        assert_eq!(view.base, Some(TensorId(0)));
        assert_eq!(view.min_stride(), Some(-1));
        assert_eq!(view.index_range(), (0, 5));
    }

    #[test]
    fn test_permuted_view() {
        let base = desc(vec![2, 3, 4]);
        let view = base.permuted(TensorId(2), &[2, 0, 1]).unwrap();
        assert_eq!(view.shape, vec![4, 2, 3]);
        assert_eq!(view.strides, vec![1, 12, 4]);
        assert!(base.permuted(TensorId(3), &[0, 0, 1]).is_err());
    }

    #[test]
    fn test_storage_len() {
        assert_eq!(desc(vec![2, 3]).storage_len(), 6);
        assert_eq!(desc(vec![]).storage_len(), 1);
        assert_eq!(desc(vec![0, 3]).storage_len(), 1);
    }

    #[test]
    fn test_inverse_permutation() {
        assert_eq!(inverse_permutation(&[2, 0, 1]), vec![1, 2, 0]);
        assert_eq!(inverse_permutation(&[1, 0]), vec![1, 0]);
    }
}
