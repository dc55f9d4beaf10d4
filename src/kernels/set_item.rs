//! Item assignment kernel
//!
//! `tensor[item] = value`. Copy kernels cannot walk negative strides, so a
//! whole-tensor assignment of a tensor value into a destination with a
//! negative stride is lowered to an identity dimshuffle from the value's
//! layout into the destination's. Every other case is a direct strided
//! assignment with broadcasting.

use std::sync::Arc;

use crate::device::{DeviceTensor, Runtime, SetSource};
use crate::error::{FlexForgeError, ForgeResult};
use crate::graph::{Op, OpKind};
use crate::kernels::transpose::{get_dimshuffle, KernelHandle};
use crate::kernels::{Binding, Kernel, ParameterList};
use crate::tensor::item::check_broadcast;
use crate::tensor::{HostTensor, Item, TensorDescription, TensorDescriptionWrapper};

/// Right-hand side of an item assignment.
#[derive(Debug, Clone)]
pub enum ItemValue {
    Scalar(f64),
    Array(HostTensor),
    Tensor(TensorDescription),
}

impl ItemValue {
    pub fn shape(&self) -> &[usize] {
        match self {
            ItemValue::Scalar(_) => &[],
            ItemValue::Array(h) => &h.shape,
            ItemValue::Tensor(td) => &td.shape,
        }
    }
}

#[derive(Debug)]
enum SourceBinding {
    Scalar(f64),
    Array(HostTensor),
    Tensor(Binding<DeviceTensor>),
}

#[derive(Debug)]
struct Fallback {
    handle: Arc<KernelHandle>,
    params: ParameterList,
}

#[derive(Debug)]
pub struct SetItemKernel {
    runtime: Arc<Runtime>,
    name: String,
    dst: Binding<DeviceTensor>,
    source: SourceBinding,
    item: Option<Item>,
    fallback: Option<Fallback>,
}

impl SetItemKernel {
    pub fn new(runtime: Arc<Runtime>, op: &Op) -> ForgeResult<Self> {
        let (value, item) = match &op.kind {
            OpKind::SetItem { value, item } => (value, item),
            other => {
                return Err(FlexForgeError::InvalidOp(format!(
                    "set_item kernel given {}",
                    other.name()
                )))
            }
        };
        let td = op.tensor_description();
        td.validate()?;

        // Reject bad items and shapes now rather than on the stream
        let target_shape = match item {
            Some(item) => item.apply(&td.shape, &td.strides, td.offset as isize)?.shape,
            None => td.shape.clone(),
        };
        let single = matches!(value, ItemValue::Array(h) if h.len() == 1);
        if !(td.is_scalar() && single) {
            check_broadcast(value.shape(), &target_shape)?;
        }

        let name = format!("set_item({})", td.id);
        let fallback = Self::dimshuffle_fallback(&runtime, td, value, item.as_ref())?;
        tracing::debug!(kernel = %name, fallback = fallback.is_some(), "constructed");

        let source = match value {
            ItemValue::Scalar(v) => SourceBinding::Scalar(*v),
            ItemValue::Array(h) => SourceBinding::Array(h.clone()),
            ItemValue::Tensor(src) => {
                src.validate()?;
                SourceBinding::Tensor(Binding::Unresolved(src.clone()))
            }
        };

        Ok(Self {
            runtime,
            name,
            dst: Binding::Unresolved(td.clone()),
            source,
            item: item.clone(),
            fallback,
        })
    }

    /// Identity dimshuffle for a whole-tensor copy into a negatively strided
    /// destination. Requires matching shape and dtype; anything else is
    /// assigned directly.
    fn dimshuffle_fallback(
        runtime: &Runtime,
        td: &TensorDescription,
        value: &ItemValue,
        item: Option<&Item>,
    ) -> ForgeResult<Option<Fallback>> {
        let src = match value {
            ItemValue::Tensor(src) => src,
            _ => return Ok(None),
        };
        let negative = matches!(td.min_stride(), Some(s) if s < 0);
        if td.rank() == 0 || !negative || item.is_some() {
            return Ok(None);
        }
        if src.shape != td.shape || src.dtype != td.dtype {
            return Ok(None);
        }

        let min_rank = runtime.config().min_kernel_rank;
        let src_w = TensorDescriptionWrapper::new(src, min_rank)?;
        let dst_w = TensorDescriptionWrapper::new(td, min_rank)?;
        let axes: Vec<usize> = (0..src_w.rank()).collect();
        let (handle, params) = get_dimshuffle(
            runtime.kernel_cache(),
            td.dtype,
            src_w.shape(),
            &axes,
            &src_w,
            &dst_w,
        )?;
        Ok(Some(Fallback { handle, params }))
    }

    pub fn uses_dimshuffle(&self) -> bool {
        self.fallback.is_some()
    }
}

impl Kernel for SetItemKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        let memory = self.runtime.memory();
        self.dst.bind(&self.name, memory)?;
        if let SourceBinding::Tensor(src) = &mut self.source {
            src.bind(&self.name, memory)?;
        }
        if let Some(fallback) = &mut self.fallback {
            fallback.params.bind(memory)?;
        }
        Ok(())
    }

    fn execute(&self) -> ForgeResult<()> {
        let dst = self.dst.get(&self.name)?;
        let stream = self.runtime.stream();
        tracing::trace!(kernel = %self.name, "execute");

        if let Some(fallback) = &self.fallback {
            return fallback.handle.launch(
                stream,
                fallback.params.frozen()?,
                self.runtime.config().parallel_threshold,
            );
        }

        let source = match &self.source {
            SourceBinding::Scalar(v) => SetSource::Scalar(*v),
            SourceBinding::Array(h) => SetSource::Host(h.clone()),
            SourceBinding::Tensor(src) => SetSource::Device(src.get(&self.name)?.clone()),
        };

        if dst.is_scalar() {
            match &source {
                SetSource::Scalar(v) => return dst.fill(stream, *v),
                SetSource::Host(h) => return dst.fill(stream, h.to_scalar()?),
                SetSource::Device(_) => {}
            }
        }
        dst.set_item(stream, self.item.as_ref(), source)
    }
}
