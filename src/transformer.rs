//! Graph to kernel transformation and execution.
//!
//! A [`Transformer`] turns a [`Graph`] into a [`Computation`]: one kernel
//! object per op, constructed symbolically, then every description is
//! allocated, kernels bind their buffers, and flex kernels bind their scales.
//! Running a computation executes every kernel in graph order and waits on
//! the stream.

use std::sync::Arc;

use crate::channel::{channel, ChannelReceiver, ChannelSender};
use crate::config::RuntimeConfig;
use crate::device::{AddressResolver, Runtime};
use crate::error::ForgeResult;
use crate::flex::{FlexId, ScaleController};
use crate::graph::{Graph, Op, OpKind};
use crate::kernels::transpose::KernelCache;
use crate::kernels::{
    DimShuffleKernel, FillKernel, Kernel, RecvKernel, RngFillKernel, SendKernel, SetItemKernel,
};
use crate::tensor::{HostTensor, TensorDescription};

/// Compiles graphs into computations.
///
/// Computations created by one transformer share its kernel cache.
#[derive(Debug, Clone)]
pub struct Transformer {
    config: RuntimeConfig,
    kernel_cache: Arc<KernelCache>,
}

impl Transformer {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_cache(config, Arc::new(KernelCache::new()))
    }

    pub fn with_cache(config: RuntimeConfig, kernel_cache: Arc<KernelCache>) -> Self {
        Self {
            config,
            kernel_cache,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn kernel_cache(&self) -> &Arc<KernelCache> {
        &self.kernel_cache
    }

    /// Channel for a send/recv pair between computations of this
    /// transformer, sized by the configured `channel_capacity`.
    pub fn channel(&self) -> (ChannelSender, ChannelReceiver) {
        channel(self.config.channel_capacity)
    }

    /// Build a computation on a fresh runtime.
    pub fn computation(&self, graph: &Graph) -> ForgeResult<Computation> {
        let runtime = Runtime::with_cache(self.config.clone(), Arc::clone(&self.kernel_cache))?;
        Computation::new(runtime, graph)
    }
}

/// Convert one op into its kernel object.
pub fn make_kernel(runtime: &Arc<Runtime>, op: &Op) -> ForgeResult<Box<dyn Kernel>> {
    let rt = Arc::clone(runtime);
    let td = op.tensor_description();
    Ok(match &op.kind {
        OpKind::DimShuffle { .. } => Box::new(DimShuffleKernel::new(rt, op)?),
        OpKind::Fill { value } => Box::new(FillKernel::new(rt, td, *value)?),
        OpKind::RngFill { tag, params } => Box::new(RngFillKernel::new(rt, td, tag, params)?),
        OpKind::SetItem { .. } => Box::new(SetItemKernel::new(rt, op)?),
        OpKind::Send { sender } => Box::new(SendKernel::new(rt, td, sender.clone())?),
        OpKind::Recv { receiver } => Box::new(RecvKernel::new(rt, td, receiver.clone())?),
    })
}

/// Bound kernels of one graph, ready to run.
#[derive(Debug)]
pub struct Computation {
    runtime: Arc<Runtime>,
    kernels: Vec<Box<dyn Kernel>>,
    runs: u64,
}

impl Computation {
    pub fn new(runtime: Arc<Runtime>, graph: &Graph) -> ForgeResult<Self> {
        let mut kernels = graph
            .ops()
            .iter()
            .map(|op| make_kernel(&runtime, op))
            .collect::<ForgeResult<Vec<_>>>()?;

        runtime.memory().allocate_all(graph.tensors())?;
        for kernel in kernels.iter_mut() {
            kernel.bind_buffers()?;
        }
        for kernel in kernels.iter_mut() {
            kernel.bind_flex_scales()?;
        }

        tracing::info!(
            runtime = %runtime.name(),
            kernels = kernels.len(),
            memory = %runtime.memory().stats()?,
            "computation ready"
        );

        Ok(Self {
            runtime,
            kernels,
            runs: 0,
        })
    }

    /// Execute every kernel once, then wait for the stream.
    pub fn run(&mut self) -> ForgeResult<()> {
        let _span = tracing::debug_span!("run", runtime = %self.runtime.name(), n = self.runs).entered();
        for kernel in &self.kernels {
            kernel.execute()?;
        }
        self.runtime.synchronize()?;
        self.runs += 1;
        Ok(())
    }

    /// Overwrite a tensor from the host.
    pub fn write(&self, td: &TensorDescription, value: &HostTensor) -> ForgeResult<()> {
        self.runtime.synchronize()?;
        self.runtime.memory().resolve(td)?.write_host(value)
    }

    /// Read a tensor back to the host.
    pub fn read(&self, td: &TensorDescription) -> ForgeResult<HostTensor> {
        self.runtime
            .memory()
            .resolve(td)?
            .get(self.runtime.stream())
    }

    /// Recalibrate flex scales from the last reports and rebind them.
    /// Returns how many scales changed.
    pub fn recalibrate_flex(&mut self) -> ForgeResult<usize> {
        let controller = ScaleController::new(&self.runtime.config().flex);
        let changed = controller.adjust_all(self.runtime.flex())?;
        if changed > 0 {
            for kernel in self.kernels.iter_mut() {
                kernel.bind_flex_scales()?;
            }
        }
        Ok(changed)
    }

    /// Flex ids reported to by this computation's kernels.
    pub fn output_flex_ids(&self) -> Vec<FlexId> {
        let mut ids: Vec<FlexId> = self
            .kernels
            .iter()
            .flat_map(|k| k.output_flex_ids())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name()).collect()
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}
