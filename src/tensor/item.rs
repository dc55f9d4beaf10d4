//! Slice expressions for item assignment.
//!
//! Semantics follow basic array indexing: an `Index` selects one position
//! and drops the axis, a `Range` keeps the axis with `start`, `stop`, `step`
//! (negative positions count from the end, negative steps walk backwards),
//! and axes not covered by the item are taken whole.

use crate::error::{FlexForgeError, ForgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSpec {
    Index(isize),
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    Full,
}

impl SliceSpec {
    /// `start..stop` with unit step.
    pub fn range(start: isize, stop: isize) -> Self {
        SliceSpec::Range {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    /// Whole axis walked with `step`.
    pub fn stepped(step: isize) -> Self {
        SliceSpec::Range {
            start: None,
            stop: None,
            step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item(pub Vec<SliceSpec>);

/// Strided layout produced by applying an item: shape, strides, offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicedLayout {
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub offset: isize,
}

impl Item {
    pub fn new(specs: Vec<SliceSpec>) -> Self {
        Item(specs)
    }

    pub fn specs(&self) -> &[SliceSpec] {
        &self.0
    }

    /// Apply this item to a layout.
    pub fn apply(&self, shape: &[usize], strides: &[isize], offset: isize) -> ForgeResult<SlicedLayout> {
        if self.0.len() > shape.len() {
            return Err(FlexForgeError::InvalidItem(format!(
                "{} slice entries for a rank-{} tensor",
                self.0.len(),
                shape.len()
            )));
        }

        let mut out = SlicedLayout {
            shape: Vec::with_capacity(shape.len()),
            strides: Vec::with_capacity(shape.len()),
            offset,
        };

        for (axis, (&dim, &stride)) in shape.iter().zip(strides.iter()).enumerate() {
            let spec = self.0.get(axis).copied().unwrap_or(SliceSpec::Full);
            let n = dim as isize;
            match spec {
                SliceSpec::Full => {
                    out.shape.push(dim);
                    out.strides.push(stride);
                }
                SliceSpec::Index(i) => {
                    let pos = if i < 0 { i + n } else { i };
                    if pos < 0 || pos >= n {
                        return Err(FlexForgeError::InvalidItem(format!(
                            "index {} out of range for axis {} of size {}",
                            i, axis, dim
                        )));
                    }
                    out.offset += pos * stride;
                }
                SliceSpec::Range { start, stop, step } => {
                    let (first, len) = normalize_range(start, stop, step, n).ok_or_else(|| {
                        FlexForgeError::InvalidItem(format!("zero step on axis {}", axis))
                    })?;
                    if len > 0 {
                        out.offset += first * stride;
                    }
                    out.shape.push(len as usize);
                    out.strides.push(stride * step);
                }
            }
        }

        Ok(out)
    }
}

/// Resolve a range against an axis of size `n`: first position and length.
/// `None` for a zero step.
fn normalize_range(start: Option<isize>, stop: Option<isize>, step: isize, n: isize) -> Option<(isize, isize)> {
    if step == 0 {
        return None;
    }
    let wrap = |v: isize| if v < 0 { v + n } else { v };
    if step > 0 {
        let first = start.map(wrap).unwrap_or(0).clamp(0, n);
        let stop = stop.map(wrap).unwrap_or(n).clamp(0, n);
        let len = if stop > first {
            (stop - first + step - 1) / step
        } else {
            0
        };
        Some((first, len))
    } else {
        let first = start.map(wrap).unwrap_or(n - 1).clamp(-1, n - 1);
        let stop = stop.map(wrap).unwrap_or(-1).clamp(-1, n - 1);
        let len = if first > stop {
            (first - stop + (-step) - 1) / (-step)
        } else {
            0
        };
        Some((first, len))
    }
}

/// Check that `value` broadcasts to `target` (dims right-aligned, each 1 or equal).
pub fn check_broadcast(value: &[usize], target: &[usize]) -> ForgeResult<()> {
    let compatible = value.len() <= target.len()
        && value
            .iter()
            .rev()
            .zip(target.iter().rev())
            .all(|(&v, &t)| v == 1 || v == t);
    if compatible {
        Ok(())
    } else {
        Err(FlexForgeError::ShapeMismatch {
            expected: target.to_vec(),
            got: value.to_vec(),
        })
    }
}

/// Row-major index into a value of shape `value` for a target multi-index.
pub fn broadcast_index(index: &[usize], value: &[usize]) -> usize {
    let skip = index.len() - value.len();
    let mut flat = 0;
    for (&i, &dim) in index[skip..].iter().zip(value.iter()) {
        flat = flat * dim + if dim == 1 { 0 } else { i };
    }
    flat
}
