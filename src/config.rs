//! Runtime configuration
//!
//! [`RuntimeConfig`] controls the per-endpoint runtime: rng seeding, channel
//! capacity, the rank kernels are canonicalized to, when host kernels go
//! parallel, and the defaults used for new flex entries.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelCapacity;
use crate::error::{FlexForgeError, ForgeResult};

/// Environment variable for a fixed rng seed
pub const RNG_SEED_ENV: &str = "FLEXFORGE_RNG_SEED";

/// Environment variable for channel capacity ("unbounded" or a count)
pub const CHANNEL_CAPACITY_ENV: &str = "FLEXFORGE_CHANNEL_CAPACITY";

/// Environment variable for the minimum kernel rank
pub const MIN_KERNEL_RANK_ENV: &str = "FLEXFORGE_MIN_KERNEL_RANK";

/// Defaults for flex entries created by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexConfig {
    /// Scale assigned to newly registered entries
    pub initial_scale: f64,
    /// Fraction of the clip range targeted when recalibrating
    pub headroom: f64,
    /// Scale multiplier applied after an overflow
    pub overflow_growth: f64,
}

impl Default for FlexConfig {
    fn default() -> Self {
        Self {
            initial_scale: 1.0,
            headroom: 0.5,
            overflow_growth: 2.0,
        }
    }
}

/// Configuration for one runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fixed rng seed; entropy-seeded when absent
    pub rng_seed: Option<u64>,

    /// Capacity of channels created for send/recv pairs
    pub channel_capacity: ChannelCapacity,

    /// Rank every kernel operand is padded to
    pub min_kernel_rank: usize,

    /// Element count above which copy kernels gather in parallel
    pub parallel_threshold: usize,

    /// Cap on device memory in bytes
    pub memory_limit: Option<usize>,

    /// Flex entry defaults
    pub flex: FlexConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            channel_capacity: ChannelCapacity::Unbounded,
            min_kernel_rank: 2,
            parallel_threshold: 1 << 16,
            memory_limit: None,
            flex: FlexConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_min_kernel_rank(mut self, rank: usize) -> Self {
        self.min_kernel_rank = rank;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_flex(mut self, flex: FlexConfig) -> Self {
        self.flex = flex;
        self
    }

    /// Defaults overridden by `FLEXFORGE_*` environment variables.
    pub fn from_env() -> ForgeResult<Self> {
        let mut config = Self::default();

        if let Ok(seed) = std::env::var(RNG_SEED_ENV) {
            let seed = seed.trim().parse::<u64>().map_err(|e| {
                FlexForgeError::InvalidConfiguration(format!("{}={:?}: {}", RNG_SEED_ENV, seed, e))
            })?;
            config.rng_seed = Some(seed);
        }

        if let Ok(capacity) = std::env::var(CHANNEL_CAPACITY_ENV) {
            config.channel_capacity = capacity.parse()?;
        }

        if let Ok(rank) = std::env::var(MIN_KERNEL_RANK_ENV) {
            config.min_kernel_rank = rank.trim().parse::<usize>().map_err(|e| {
                FlexForgeError::InvalidConfiguration(format!(
                    "{}={:?}: {}",
                    MIN_KERNEL_RANK_ENV, rank, e
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            FlexForgeError::InvalidConfiguration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ForgeResult<()> {
        let invalid = |msg: String| Err(FlexForgeError::InvalidConfiguration(msg));

        if self.min_kernel_rank < 2 {
            return invalid(format!(
                "min_kernel_rank must be at least 2, got {}",
                self.min_kernel_rank
            ));
        }
        if let ChannelCapacity::Bounded(0) = self.channel_capacity {
            return invalid("bounded channel capacity must be positive".to_string());
        }
        if !(self.flex.initial_scale > 0.0 && self.flex.initial_scale.is_finite()) {
            return invalid(format!(
                "flex initial_scale must be positive, got {}",
                self.flex.initial_scale
            ));
        }
        if !(self.flex.headroom > 0.0 && self.flex.headroom <= 1.0) {
            return invalid(format!(
                "flex headroom must be in (0, 1], got {}",
                self.flex.headroom
            ));
        }
        if !(self.flex.overflow_growth > 1.0) {
            return invalid(format!(
                "flex overflow_growth must exceed 1, got {}",
                self.flex.overflow_growth
            ));
        }
        Ok(())
    }
}
