//! Random fill kernel

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::tensor::{read_elements, write_elements};
use crate::device::{DeviceTensor, Runtime};
use crate::error::{FlexForgeError, ForgeResult};
use crate::flex::{FlexCapability, FlexId};
use crate::kernels::{Binding, Kernel};
use crate::tensor::{DType, TensorDescription};

/// Sampling distribution of a random fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    Uniform { low: f64, high: f64 },
    Normal { loc: f64, scale: f64 },
}

impl Distribution {
    /// Parse a distribution tag and its named parameters.
    ///
    /// # Errors
    ///
    /// - `UnsupportedDistribution` - tag is neither `uniform` nor `normal`
    /// - `MissingDistributionParam` - `low`/`high` or `loc`/`scale` absent
    pub fn from_tag(tag: &str, params: &HashMap<String, f64>) -> ForgeResult<Self> {
        let param = |name: &str| {
            params
                .get(name)
                .copied()
                .ok_or_else(|| FlexForgeError::MissingDistributionParam {
                    distribution: tag.to_string(),
                    param: name.to_string(),
                })
        };
        match tag {
            "uniform" => Ok(Distribution::Uniform {
                low: param("low")?,
                high: param("high")?,
            }),
            "normal" => Ok(Distribution::Normal {
                loc: param("loc")?,
                scale: param("scale")?,
            }),
            other => Err(FlexForgeError::UnsupportedDistribution(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Distribution::Uniform { .. } => "uniform",
            Distribution::Normal { .. } => "normal",
        }
    }

    /// Named parameters, as accepted by [`Distribution::from_tag`].
    pub fn params(&self) -> HashMap<String, f64> {
        let pairs = match *self {
            Distribution::Uniform { low, high } => [("low", low), ("high", high)],
            Distribution::Normal { loc, scale } => [("loc", loc), ("scale", scale)],
        };
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    /// `(mul, add)` mapping a base sample onto this distribution.
    fn affine(&self) -> (f64, f64) {
        match *self {
            Distribution::Uniform { low, high } => (high - low, low),
            Distribution::Normal { loc, scale } => (scale, loc),
        }
    }
}

/// Fills a tensor with samples from a uniform or normal distribution.
///
/// Samples are drawn from the base distribution (`U[0, 1)` or `N(0, 1)`)
/// and moved into place with one affine pass. A flex destination is sampled
/// through an f32 scratch tensor, then quantized and clipped into storage.
#[derive(Debug)]
pub struct RngFillKernel {
    runtime: Arc<Runtime>,
    name: String,
    out: Binding<DeviceTensor>,
    distribution: Distribution,
    flex: Option<FlexCapability>,
    scratch: Option<DeviceTensor>,
}

impl RngFillKernel {
    pub fn new(
        runtime: Arc<Runtime>,
        td: &TensorDescription,
        tag: &str,
        params: &HashMap<String, f64>,
    ) -> ForgeResult<Self> {
        Self::with_distribution(runtime, td, Distribution::from_tag(tag, params)?)
    }

    pub fn with_distribution(
        runtime: Arc<Runtime>,
        td: &TensorDescription,
        distribution: Distribution,
    ) -> ForgeResult<Self> {
        td.validate()?;
        let flex = match td.flex_id {
            Some(id) => Some(FlexCapability::new(
                runtime.flex().entry_or_register(id, td.dtype)?,
            )),
            None => None,
        };
        let name = format!("rng_fill({})", td.id);
        tracing::debug!(kernel = %name, ?distribution, flex = flex.is_some(), "constructed");
        Ok(Self {
            runtime,
            name,
            out: Binding::Unresolved(td.clone()),
            distribution,
            flex,
            scratch: None,
        })
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    fn sample_into(&self, target: &DeviceTensor) -> ForgeResult<()> {
        let stream = self.runtime.stream();
        match self.distribution {
            Distribution::Uniform { .. } => self.runtime.rng().fill_uniform(stream, target)?,
            Distribution::Normal { .. } => self.runtime.rng().fill_normal(stream, target)?,
        }
        let (mul, add) = self.distribution.affine();
        target.affine_inplace(stream, mul, add)
    }
}

impl Kernel for RngFillKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        self.out.bind(&self.name, self.runtime.memory())?;
        if self.flex.is_some() {
            let shape = self.out.get(&self.name)?.shape().to_vec();
            self.scratch = Some(self.runtime.memory().allocate_scratch(DType::F32, &shape)?);
        }
        Ok(())
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
            return self.sample_into(out);
        };

        let scale = flex.scale()?;
        let scratch = self
            .scratch
            .as_ref()
            .ok_or_else(|| FlexForgeError::NotBound(self.name.clone()))?;
        self.sample_into(scratch)?;

        let src = scratch.clone();
        let dst = out.clone();
        let dtype = flex.dtype();
        let entry = Arc::clone(flex.entry());
        let name = self.name.clone();
        self.runtime.stream().enqueue("flex_quantize", move || {
            let samples = {
                let bytes = src.buffer().read()?;
                read_elements(&bytes, src.dtype(), &src.storage_indices())
            };

            let mut maxabs = 0i64;
            let mut clipped = 0usize;
            let stored: Vec<f64> = samples
                .into_iter()
                .map(|v| {
                    let (q, c) = dtype.quantize(v, scale);
                    maxabs = maxabs.max(q.abs());
                    clipped += c as usize;
                    q as f64
                })
                .collect();
            if clipped > 0 {
                tracing::debug!(kernel = %name, flex = %entry.id(), clipped, "flex rng fill clipped");
            }

            let indices = dst.storage_indices();
            let mut bytes = dst.buffer().write()?;
            write_elements(&mut bytes, dst.dtype(), &indices, stored.into_iter());
            entry.report_maxabs(maxabs);
            Ok(())
        })
    }

    fn output_flex_ids(&self) -> Vec<FlexId> {
        self.flex.iter().map(FlexCapability::id).collect()
    }
}
