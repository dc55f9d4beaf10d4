//! Device random number facility.
//!
//! One ChaCha8 generator per runtime, advanced only on the stream worker, so
//! a seeded runtime produces the same sequence on every run.

use std::sync::{Arc, Mutex};

use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::device::tensor::write_elements;
use crate::device::{DeviceTensor, Stream};
use crate::error::ForgeResult;

#[derive(Clone)]
pub struct DeviceRng {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl std::fmt::Debug for DeviceRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRng").finish_non_exhaustive()
    }
}

impl DeviceRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Enqueue samples of `U[0, 1)` into every element of `tensor`.
    pub fn fill_uniform(&self, stream: &Stream, tensor: &DeviceTensor) -> ForgeResult<()> {
        let dist = Uniform::new(0.0_f64, 1.0);
        self.fill_with(stream, tensor, "rng_uniform", move |rng| dist.sample(rng))
    }

    /// Enqueue samples of `N(0, 1)` into every element of `tensor`.
    pub fn fill_normal(&self, stream: &Stream, tensor: &DeviceTensor) -> ForgeResult<()> {
        self.fill_with(stream, tensor, "rng_normal", |rng| StandardNormal.sample(rng))
    }

    fn fill_with<F>(
        &self,
        stream: &Stream,
        tensor: &DeviceTensor,
        label: &'static str,
        sample: F,
    ) -> ForgeResult<()>
    where
        F: Fn(&mut ChaCha8Rng) -> f64 + Send + 'static,
    {
        let rng = Arc::clone(&self.rng);
        let target = tensor.clone();
        stream.enqueue(label, move || {
            let indices = target.storage_indices();
            let values: Vec<f64> = {
                let mut guard = rng.lock()?;
                (0..indices.len()).map(|_| sample(&mut *guard)).collect()
            };
            let mut bytes = target.buffer().write()?;
            write_elements(&mut bytes, target.dtype(), &indices, values.into_iter());
            Ok(())
        })
    }
}
