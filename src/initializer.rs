//! Weight initializers
//!
//! Each initializer becomes a fill or random fill op on the weight tensor.
//! Fan-in scaled schemes need to know which axes feed a unit: [`WeightAxes`]
//! names them, and every other axis counts as fan-out.

use crate::error::{FlexForgeError, ForgeResult};
use crate::graph::OpKind;
use crate::kernels::Distribution;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    /// `std` is passed through as the normal scale
    Gaussian { mean: f64, std: f64 },
    /// `U(-s, s)` with `s = sqrt(6 / (fan_in + fan_out))`
    Glorot,
    /// `U(-s, s)` with `s = sqrt(3 / fan_in)`
    Xavier,
    /// `N(0, s)` with `s = sqrt(2 / fan_in)`
    Kaiming,
}

impl Initializer {
    pub fn constant(value: f64) -> Self {
        Initializer::Constant { value }
    }

    pub fn uniform(low: f64, high: f64) -> Self {
        Initializer::Uniform { low, high }
    }

    pub fn gaussian(mean: f64, std: f64) -> Self {
        Initializer::Gaussian { mean, std }
    }

    /// Fill op for a weight of `shape`.
    pub fn op_kind(&self, shape: &[usize], axes: &WeightAxes) -> ForgeResult<OpKind> {
        let random = |d: Distribution| OpKind::RngFill {
            tag: d.tag().to_string(),
            params: d.params(),
        };

        Ok(match *self {
            Initializer::Constant { value } => OpKind::Fill { value },
            Initializer::Uniform { low, high } => random(Distribution::Uniform { low, high }),
            Initializer::Gaussian { mean, std } => random(Distribution::Normal {
                loc: mean,
                scale: std,
            }),
            Initializer::Glorot => {
                let (fan_in, fan_out) = axes.fans(shape)?;
                let s = (6.0 / (fan_in + fan_out) as f64).sqrt();
                random(Distribution::Uniform { low: -s, high: s })
            }
            Initializer::Xavier => {
                let (fan_in, _) = axes.fans(shape)?;
                let s = (3.0 / fan_in as f64).sqrt();
                random(Distribution::Uniform { low: -s, high: s })
            }
            Initializer::Kaiming => {
                let (fan_in, _) = axes.fans(shape)?;
                let s = (2.0 / fan_in as f64).sqrt();
                random(Distribution::Normal { loc: 0.0, scale: s })
            }
        })
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::Constant { value: 0.0 }
    }
}

/// Which axes of a weight are fan-in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WeightAxes {
    /// Axis 0 is the output; the rest are fan-in
    #[default]
    OutputFirst,
    FanIn(Vec<usize>),
}

impl WeightAxes {
    /// `(fan_in, fan_out)` element counts for `shape`.
    pub fn fans(&self, shape: &[usize]) -> ForgeResult<(usize, usize)> {
        let fan_in_axes: Vec<usize> = match self {
            WeightAxes::OutputFirst => (1..shape.len()).collect(),
            WeightAxes::FanIn(axes) => axes.clone(),
        };

        if fan_in_axes.is_empty() {
            return Err(FlexForgeError::InvalidConfiguration(format!(
                "weight of shape {:?} has no fan-in axes",
                shape
            )));
        }
        let mut is_fan_in = vec![false; shape.len()];
        for &axis in &fan_in_axes {
            match is_fan_in.get_mut(axis) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(FlexForgeError::InvalidConfiguration(format!(
                        "fan-in axes {:?} invalid for shape {:?}",
                        fan_in_axes, shape
                    )))
                }
            }
        }

        let (fan_in, fan_out) = shape
            .iter()
            .zip(is_fan_in)
            .fold((1, 1), |(i, o), (&d, fan_in)| {
                if fan_in {
                    (i * d, o)
                } else {
                    (i, o * d)
                }
            });
        if fan_in == 0 {
            return Err(FlexForgeError::InvalidConfiguration(format!(
                "weight of shape {:?} has zero fan-in",
                shape
            )));
        }
        Ok((fan_in, fan_out))
    }
}
