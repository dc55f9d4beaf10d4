//! Shared helpers for integration tests
//!
//! Every runtime built here is seeded so random fills repeat across runs.

#![allow(dead_code)]

use std::sync::Arc;

use flexforge::device::Runtime;
use flexforge::{Computation, Graph, HostTensor, RuntimeConfig, TensorDescription, Transformer};

pub const TEST_SEED: u64 = 0x5eed;

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig::new().with_rng_seed(TEST_SEED)
}

pub fn transformer() -> Transformer {
    Transformer::new(test_config())
}

pub fn runtime() -> Arc<Runtime> {
    Runtime::new(test_config()).expect("runtime")
}

/// Build the computation, write `inputs`, run once.
pub fn run_with(graph: &Graph, inputs: &[(&TensorDescription, &HostTensor)]) -> Computation {
    let mut computation = transformer().computation(graph).expect("computation");
    for (td, value) in inputs {
        computation.write(td, value).expect("write input");
    }
    computation.run().expect("run");
    computation
}

pub fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "element {}: {} vs {}", i, a, e);
    }
}
