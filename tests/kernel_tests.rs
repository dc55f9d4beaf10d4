//! Fill, random fill and kernel lifecycle tests

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use flexforge::device::Runtime;
use flexforge::kernels::{FillKernel, RngFillKernel};
use flexforge::{
    DType, FlexForgeError, FlexId, Graph, HostTensor, Initializer, Kernel, RuntimeConfig,
    TensorDescription, TensorId, WeightAxes,
};

fn params(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

#[test]
fn test_fill_scalar() {
    let mut g = Graph::new();
    let s = g.add_tensor(DType::F32, vec![]);
    g.fill(&s, 5.0).unwrap();

    let c = common::run_with(&g, &[]);
    let out = c.read(&s).unwrap();
    assert!(out.shape.is_empty());
    assert_eq!(out.to_scalar().unwrap(), 5.0);
}

#[test]
fn test_fill_tensor_and_view() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::I32, vec![3, 4]);
    let t = g.permute(&a, &[1, 0]).unwrap();
    g.fill(&a, -2.0).unwrap();
    g.fill(&t, 7.0).unwrap();

    let c = common::run_with(&g, &[]);
    assert_eq!(c.read(&a).unwrap().data, vec![7.0; 12]);
    assert_eq!(c.read(&t).unwrap().shape, vec![4, 3]);
}

#[test]
fn test_fill_converts_to_dtype() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::U8, vec![2]);
    g.fill(&a, 3.9).unwrap();

    let c = common::run_with(&g, &[]);
    assert_eq!(c.read(&a).unwrap().data, vec![3.0, 3.0]);
}

#[test]
fn test_rng_uniform_bounds_and_mean() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![100, 100]);
    g.rng_fill(&a, "uniform", params(&[("low", -1.0), ("high", 3.0)]))
        .unwrap();

    let c = common::run_with(&g, &[]);
    let data = c.read(&a).unwrap().data;
    assert!(data.iter().all(|&x| (-1.0..3.0).contains(&x)));
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    assert!((mean - 1.0).abs() < 0.05, "mean {}", mean);
}

#[test]
fn test_rng_normal_moments() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F64, vec![20000]);
    g.rng_fill(&a, "normal", params(&[("loc", 2.0), ("scale", 0.5)]))
        .unwrap();

    let c = common::run_with(&g, &[]);
    let data = c.read(&a).unwrap().data;
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    assert!((mean - 2.0).abs() < 0.02, "mean {}", mean);
    assert!((var.sqrt() - 0.5).abs() < 0.02, "std {}", var.sqrt());
}

#[test]
fn test_rng_seeded_runs_repeat() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![16]);
    g.rng_fill(&a, "uniform", params(&[("low", 0.0), ("high", 1.0)]))
        .unwrap();

    let first = common::run_with(&g, &[]).read(&a).unwrap();
    let second = common::run_with(&g, &[]).read(&a).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_rng_unsupported_distribution() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![4]);
    g.rng_fill(&a, "poisson", params(&[("lam", 1.0)])).unwrap();

    let err = common::transformer().computation(&g).unwrap_err();
    assert!(matches!(err, FlexForgeError::UnsupportedDistribution(ref t) if t == "poisson"));
}

#[test]
fn test_initializer_glorot_bounds() {
    let mut g = Graph::new();
    let w = g.add_tensor(DType::F32, vec![8, 16]);
    g.initialize(&w, &Initializer::Glorot, &WeightAxes::default())
        .unwrap();

    let c = common::run_with(&g, &[]);
    let bound = (6.0f64 / 24.0).sqrt();
    assert!(c
        .read(&w)
        .unwrap()
        .data
        .iter()
        .all(|x| x.abs() <= bound + 1e-6));
}

#[test]
fn test_execute_before_bind_fails() {
    let runtime = common::runtime();
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![4]);

    let kernel = FillKernel::new(Arc::clone(&runtime), &a, 1.0).unwrap();
    assert!(matches!(kernel.execute(), Err(FlexForgeError::NotBound(_))));
}

#[test]
fn test_bind_twice_fails() {
    let runtime = common::runtime();
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![4]);
    runtime.memory().allocate(&a).unwrap();

    let mut kernel = FillKernel::new(Arc::clone(&runtime), &a, 1.0).unwrap();
    kernel.bind_buffers().unwrap();
    assert!(matches!(
        kernel.bind_buffers(),
        Err(FlexForgeError::AlreadyBound(_))
    ));

    // The first binding is still usable
    kernel.execute().unwrap();
    runtime.synchronize().unwrap();
}

#[test]
fn test_bind_before_allocation_fails() {
    let runtime = common::runtime();
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![4]);

    let mut kernel = FillKernel::new(Arc::clone(&runtime), &a, 1.0).unwrap();
    assert!(matches!(
        kernel.bind_buffers(),
        Err(FlexForgeError::TensorNotAllocated(id)) if id == a.id
    ));
}

#[test]
fn test_flex_kernel_needs_scale_binding() {
    let runtime = common::runtime();
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![4]).unwrap();
    runtime.memory().allocate(&a).unwrap();

    let mut kernel = RngFillKernel::new(
        Arc::clone(&runtime),
        &a,
        "uniform",
        &params(&[("low", 0.0), ("high", 1.0)]),
    )
    .unwrap();
    kernel.bind_buffers().unwrap();
    assert!(matches!(
        kernel.execute(),
        Err(FlexForgeError::FlexScaleUnbound(_))
    ));

    kernel.bind_flex_scales().unwrap();
    kernel.execute().unwrap();
    runtime.synchronize().unwrap();
}

#[test]
fn test_flex_scales_bind_after_buffers() {
    let runtime = common::runtime();
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I16, vec![4]).unwrap();
    runtime.memory().allocate(&a).unwrap();

    let mut fill = FillKernel::new(Arc::clone(&runtime), &a, 2.0).unwrap();
    assert!(matches!(
        fill.bind_flex_scales(),
        Err(FlexForgeError::NotBound(_))
    ));
    fill.bind_buffers().unwrap();
    fill.bind_flex_scales().unwrap();

    let mut rng = RngFillKernel::new(
        Arc::clone(&runtime),
        &a,
        "uniform",
        &params(&[("low", 0.0), ("high", 1.0)]),
    )
    .unwrap();
    assert!(matches!(
        rng.bind_flex_scales(),
        Err(FlexForgeError::NotBound(_))
    ));
}

#[test]
fn test_float_flex_tensor_rejected() {
    let runtime = common::runtime();
    let td = TensorDescription::new(TensorId(0), DType::F64, vec![2]).with_flex(FlexId(0));

    assert!(matches!(
        FillKernel::new(Arc::clone(&runtime), &td, 1.0),
        Err(FlexForgeError::DTypeMismatch { got: DType::F64, .. })
    ));
    assert!(matches!(
        RngFillKernel::new(
            Arc::clone(&runtime),
            &td,
            "uniform",
            &params(&[("low", 0.0), ("high", 1.0)]),
        ),
        Err(FlexForgeError::DTypeMismatch { .. })
    ));
    assert!(runtime.flex().is_empty());
}

#[test]
fn test_memory_limit() {
    let config = RuntimeConfig::new().with_memory_limit(64);
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![8]);
    g.fill(&a, 0.0).unwrap();
    let b = g.add_tensor(DType::F32, vec![16]);
    g.fill(&b, 0.0).unwrap();

    let err = flexforge::Transformer::new(config)
        .computation(&g)
        .unwrap_err();
    assert!(matches!(err, FlexForgeError::AllocationFailed(_)));
}

#[test]
fn test_write_shape_checked() {
    let mut g = Graph::new();
    let a = g.add_tensor(DType::F32, vec![2, 2]);
    g.fill(&a, 0.0).unwrap();

    let c = common::run_with(&g, &[]);
    let err = c
        .write(&a, &HostTensor::full(DType::F32, vec![4], 1.0))
        .unwrap_err();
    assert!(matches!(err, FlexForgeError::ShapeMismatch { .. }));
}

#[test]
fn test_runtime_rejects_invalid_config() {
    let config = RuntimeConfig::new().with_min_kernel_rank(1);
    assert!(matches!(
        Runtime::new(config),
        Err(FlexForgeError::InvalidConfiguration(_))
    ));
}
