//! Kernel objects
//!
//! Every graph op becomes one kernel object with a fixed lifecycle:
//!
//! 1. construction: symbolic only, no device memory is touched
//! 2. `bind_buffers`: descriptions resolved to device memory, exactly once
//! 3. `bind_flex_scales`: flex kernels snapshot their output scale
//! 4. `execute`: enqueued on the runtime stream, any number of times
//!
//! - `params`: launch parameter lists
//! - `transpose`: dimshuffle kernel generation, cache and kernel
//! - `fill`, `rng_fill`: constant and random fills (flex-capable)
//! - `transfer`: send/recv over channels
//! - `set_item`: strided item assignment

pub mod fill;
pub mod params;
pub mod rng_fill;
pub mod set_item;
pub mod transfer;
pub mod transpose;

use std::fmt;

use crate::device::{AddressResolver, DeviceTensor};
use crate::error::{FlexForgeError, ForgeResult};
use crate::flex::FlexId;
use crate::tensor::TensorDescription;

pub use fill::FillKernel;
pub use params::{Param, ParameterList};
pub use rng_fill::{Distribution, RngFillKernel};
pub use set_item::{ItemValue, SetItemKernel};
pub use transfer::{RecvKernel, SendKernel};
pub use transpose::{DimShuffleKernel, KernelCache, KernelHandle};

/// A constructed kernel object.
pub trait Kernel: Send + fmt::Debug {
    fn name(&self) -> &str;

    /// Resolve every symbolic operand to device memory.
    fn bind_buffers(&mut self) -> ForgeResult<()>;

    /// Snapshot flex scales. Kernels without flex outputs do nothing.
    fn bind_flex_scales(&mut self) -> ForgeResult<()> {
        Ok(())
    }

    fn execute(&self) -> ForgeResult<()>;

    /// Flex entries this kernel reports `maxabs` to.
    fn output_flex_ids(&self) -> Vec<FlexId> {
        Vec::new()
    }
}

/// Kernel attribute holding a description until bind time.
#[derive(Debug, Clone)]
pub enum Binding<T> {
    Unresolved(TensorDescription),
    Resolved(T),
}

impl<T> Binding<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Binding::Resolved(_))
    }

    /// Resolve with `f`. Fails with `AlreadyBound` on a second call.
    pub fn resolve_with<F>(&mut self, what: &str, f: F) -> ForgeResult<()>
    where
        F: FnOnce(&TensorDescription) -> ForgeResult<T>,
    {
        match self {
            Binding::Resolved(_) => Err(FlexForgeError::AlreadyBound(what.to_string())),
            Binding::Unresolved(td) => {
                let value = f(td)?;
                *self = Binding::Resolved(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, what: &str) -> ForgeResult<&T> {
        match self {
            Binding::Resolved(value) => Ok(value),
            Binding::Unresolved(_) => Err(FlexForgeError::NotBound(what.to_string())),
        }
    }
}

impl Binding<DeviceTensor> {
    pub fn bind(&mut self, what: &str, resolver: &dyn AddressResolver) -> ForgeResult<()> {
        self.resolve_with(what, |td| resolver.resolve(td))
    }
}
