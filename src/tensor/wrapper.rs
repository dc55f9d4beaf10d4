//! Fixed-rank view of a tensor description for kernel generation.

use crate::error::ForgeResult;
use crate::tensor::{DType, TensorDescription};

/// Canonical form of a description: scalars become `[1]`, and trailing unit
/// dimensions with stride 0 pad the rank up to `min_rank`.
#[derive(Debug, Clone)]
pub struct TensorDescriptionWrapper {
    td: TensorDescription,
    shape: Vec<usize>,
    strides: Vec<isize>,
}

impl TensorDescriptionWrapper {
    pub fn new(td: &TensorDescription, min_rank: usize) -> ForgeResult<Self> {
        td.validate()?;

        let mut shape = td.shape.clone();
        let mut strides = td.strides.clone();
        if shape.is_empty() {
            shape.push(1);
            strides.push(0);
        }
        while shape.len() < min_rank {
            shape.push(1);
            strides.push(0);
        }

        Ok(Self {
            td: td.clone(),
            shape,
            strides,
        })
    }

    pub fn td(&self) -> &TensorDescription {
        &self.td
    }

    pub fn dtype(&self) -> DType {
        self.td.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlexForgeError;
    use crate::tensor::TensorId;

    #[test]
    fn test_scalar_padding() {
        let td = TensorDescription::new(TensorId(0), DType::F32, vec![]);
        let w = TensorDescriptionWrapper::new(&td, 2).unwrap();
        assert_eq!(w.shape(), &[1, 1]);
        assert_eq!(w.strides(), &[0, 0]);
    }

    #[test]
    fn test_vector_padding() {
        let td = TensorDescription::new(TensorId(0), DType::F16, vec![5]);
        let w = TensorDescriptionWrapper::new(&td, 2).unwrap();
        assert_eq!(w.shape(), &[5, 1]);
        assert_eq!(w.strides(), &[1, 0]);
        assert_eq!(w.dtype(), DType::F16);
    }

    #[test]
    fn test_no_padding_needed() {
        let td = TensorDescription::new(TensorId(0), DType::F32, vec![2, 3, 4]);
        let w = TensorDescriptionWrapper::new(&td, 2).unwrap();
        assert_eq!(w.shape(), &[2, 3, 4]);
        assert_eq!(w.strides(), &[12, 4, 1]);
        assert_eq!(w.rank(), 3);
    }

    #[test]
    fn test_malformed_description_rejected() {
        let mut td = TensorDescription::new(TensorId(0), DType::F32, vec![2, 3]);
        td.strides.pop();
        let result = TensorDescriptionWrapper::new(&td, 2);
        assert!(matches!(result, Err(FlexForgeError::MalformedDescriptor(_))));
    }
}
