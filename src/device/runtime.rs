//! Per-endpoint runtime: the stream, memory, rng and flex registry kernels run against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::channel::{channel, ChannelReceiver, ChannelSender};
use crate::config::RuntimeConfig;
use crate::device::{DeviceMemory, DeviceRng, Stream};
use crate::error::ForgeResult;
use crate::flex::FlexManager;
use crate::kernels::transpose::KernelCache;

static NEXT_RUNTIME: AtomicUsize = AtomicUsize::new(0);

/// Execution context of one endpoint.
///
/// Kernels hold an `Arc<Runtime>`; it outlives every kernel built against it.
#[derive(Debug)]
pub struct Runtime {
    name: String,
    config: RuntimeConfig,
    stream: Stream,
    memory: DeviceMemory,
    rng: DeviceRng,
    flex: FlexManager,
    kernel_cache: Arc<KernelCache>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> ForgeResult<Arc<Self>> {
        Self::with_cache(config, Arc::new(KernelCache::new()))
    }

    /// Runtime sharing an existing kernel cache.
    pub fn with_cache(config: RuntimeConfig, kernel_cache: Arc<KernelCache>) -> ForgeResult<Arc<Self>> {
        config.validate()?;
        let name = format!("flexforge-{}", NEXT_RUNTIME.fetch_add(1, Ordering::Relaxed));
        let stream = Stream::new(format!("{}-stream", name))?;
        let memory = DeviceMemory::new(config.memory_limit);
        let rng = DeviceRng::new(config.rng_seed);
        let flex = FlexManager::new(config.flex.clone());

        tracing::info!(
            runtime = %name,
            seed = ?config.rng_seed,
            min_kernel_rank = config.min_kernel_rank,
            "runtime created"
        );

        Ok(Arc::new(Self {
            name,
            config,
            stream,
            memory,
            rng,
            flex,
            kernel_cache,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    pub fn rng(&self) -> &DeviceRng {
        &self.rng
    }

    pub fn flex(&self) -> &FlexManager {
        &self.flex
    }

    pub fn kernel_cache(&self) -> &Arc<KernelCache> {
        &self.kernel_cache
    }

    pub fn synchronize(&self) -> ForgeResult<()> {
        self.stream.synchronize()
    }

    /// Channel sized by the configured `channel_capacity`.
    pub fn channel(&self) -> (ChannelSender, ChannelReceiver) {
        channel(self.config.channel_capacity)
    }
}
