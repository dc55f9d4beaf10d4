//! Kernel launch parameters
//!
//! A parameter list is built at construction time from symbolic descriptions
//! and structural integers, resolved once against device memory, and then
//! frozen so every launch reuses the same resolved list.

use std::sync::Arc;

use crate::device::{AddressResolver, DeviceAddress};
use crate::error::{FlexForgeError, ForgeResult};
use crate::tensor::TensorDescription;

#[derive(Debug, Clone)]
pub enum Param {
    /// Buffer argument not yet resolved to an address
    Unresolved(TensorDescription),
    /// Buffer argument resolved at bind time
    Resolved(DeviceAddress),
    Int(i64),
    Float(f64),
}

impl Param {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Param::Unresolved(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Param::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&DeviceAddress> {
        match self {
            Param::Resolved(addr) => Some(addr),
            _ => None,
        }
    }
}

/// Ordered launch arguments of one kernel.
#[derive(Debug, Clone)]
pub struct ParameterList {
    label: String,
    params: Arc<[Param]>,
    bound: bool,
}

impl ParameterList {
    pub fn new(label: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            label: label.into(),
            params: params.into(),
            bound: false,
        }
    }

    /// Resolve every `Unresolved` entry through `resolver`.
    ///
    /// # Errors
    ///
    /// - `AlreadyBound` - called a second time
    /// - `TensorNotAllocated` - a description has no storage yet
    pub fn bind(&mut self, resolver: &dyn AddressResolver) -> ForgeResult<()> {
        if self.bound {
            return Err(FlexForgeError::AlreadyBound(self.label.clone()));
        }
        let resolved = self
            .params
            .iter()
            .map(|p| -> ForgeResult<Param> {
                match p {
                    Param::Unresolved(td) => Ok(Param::Resolved(resolver.resolve(td)?.address())),
                    other => Ok(other.clone()),
                }
            })
            .collect::<ForgeResult<Vec<_>>>()?;
        self.params = resolved.into();
        self.bound = true;
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Shared handle on the resolved list, for launching.
    pub fn frozen(&self) -> ForgeResult<Arc<[Param]>> {
        if !self.bound {
            return Err(FlexForgeError::NotBound(self.label.clone()));
        }
        Ok(Arc::clone(&self.params))
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceMemory;
    use crate::tensor::{DType, TensorId};

    #[test]
    fn test_bind_once() {
        let mem = DeviceMemory::default();
        let td = TensorDescription::new(TensorId(0), DType::F32, vec![4]);
        mem.allocate(&td).unwrap();

        let mut list = ParameterList::new("k", vec![Param::Unresolved(td), Param::Int(4)]);
        assert!(matches!(list.frozen(), Err(FlexForgeError::NotBound(_))));

        list.bind(&mem).unwrap();
        let frozen = list.frozen().unwrap();
        assert!(frozen.iter().all(Param::is_resolved));
        assert_eq!(frozen[1].as_int(), Some(4));

        assert!(matches!(list.bind(&mem), Err(FlexForgeError::AlreadyBound(_))));
    }

    #[test]
    fn test_bind_unallocated_fails() {
        let mem = DeviceMemory::default();
        let td = TensorDescription::new(TensorId(9), DType::F32, vec![4]);
        let mut list = ParameterList::new("k", vec![Param::Unresolved(td)]);
        assert!(list.bind(&mem).is_err());
        assert!(!list.is_bound());
    }
}
