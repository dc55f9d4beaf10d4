//! Constant fill kernel

use std::sync::Arc;

use crate::device::{DeviceTensor, Runtime};
use crate::error::{FlexForgeError, ForgeResult};
use crate::flex::{FlexCapability, FlexId};
use crate::kernels::{Binding, Kernel};
use crate::tensor::TensorDescription;

/// Sets every element of a tensor to one value.
///
/// When the destination is a flex tensor, the value is quantized with the
/// bound scale and clipped before it is stored, and the stored magnitude is
/// reported as the entry's `maxabs`.
#[derive(Debug)]
pub struct FillKernel {
    runtime: Arc<Runtime>,
    name: String,
    out: Binding<DeviceTensor>,
    value: f64,
    flex: Option<FlexCapability>,
}

impl FillKernel {
    pub fn new(runtime: Arc<Runtime>, td: &TensorDescription, value: f64) -> ForgeResult<Self> {
        td.validate()?;
        let flex = match td.flex_id {
            Some(id) => Some(FlexCapability::new(
                runtime.flex().entry_or_register(id, td.dtype)?,
            )),
            None => None,
        };
        let name = format!("fill({})", td.id);
        tracing::debug!(kernel = %name, value, flex = flex.is_some(), "constructed");
        Ok(Self {
            runtime,
            name,
            out: Binding::Unresolved(td.clone()),
            value,
            flex,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Kernel for FillKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        self.out.bind(&self.name, self.runtime.memory())
    }

    fn bind_flex_scales(&mut self) -> ForgeResult<()> {
        let Some(flex) = self.flex.as_mut() else {
            return Ok(());
        };
        // Scales bind after buffers
        if !self.out.is_resolved() {
            return Err(FlexForgeError::NotBound(self.name.clone()));
        }
        flex.bind_scale()
    }

    fn execute(&self) -> ForgeResult<()> {
        let out = self.out.get(&self.name)?;
        tracing::trace!(kernel = %self.name, "execute");

        let Some(flex) = &self.flex else {
            return out.fill(self.runtime.stream(), self.value);
        };

        let scale = flex.scale()?;
        let (stored, clipped) = flex.dtype().quantize(self.value, scale);
        if clipped {
            tracing::debug!(
                kernel = %self.name,
                flex = %flex.id(),
                value = self.value,
                scale,
                stored,
                "flex fill clipped"
            );
        }
        out.fill(self.runtime.stream(), stored as f64)?;
        let entry = Arc::clone(flex.entry());
        self.runtime.stream().enqueue("flex_report", move || {
            entry.report_maxabs(stored.abs());
            Ok(())
        })
    }

    fn output_flex_ids(&self) -> Vec<FlexId> {
        self.flex.iter().map(FlexCapability::id).collect()
    }
}
