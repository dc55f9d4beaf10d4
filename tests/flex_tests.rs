//! Flex quantization: clipping, maxabs reporting and scale recalibration

mod common;

use std::collections::HashMap;

use flexforge::device::Runtime;
use flexforge::{
    Computation, DType, FlexConfig, FlexDType, FlexId, Graph, Transformer,
};

#[test]
fn test_flex_fill_clips_to_pclip() {
    let runtime = common::runtime();
    runtime
        .flex()
        .register(FlexId(0), FlexDType::with_bits(DType::I16, 8).unwrap(), 1.0)
        .unwrap();

    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I16, vec![2, 2]).unwrap();
    g.fill(&a, 300.0).unwrap();

    let mut c = Computation::new(runtime, &g).unwrap();
    c.run().unwrap();

    assert_eq!(c.read(&a).unwrap().data, vec![127.0; 4]);
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!(entry.maxabs(), Some(127));
    assert!(entry.overflowed());
    assert_eq!(c.output_flex_ids(), vec![FlexId(0)]);
}

#[test]
fn test_flex_fill_clips_to_nclip() {
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![3]).unwrap();
    g.fill(&a, -300.0).unwrap();

    let c = common::run_with(&g, &[]);
    assert_eq!(c.read(&a).unwrap().data, vec![-128.0; 3]);
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!(entry.maxabs(), Some(128));
}

#[test]
fn test_unsigned_flex_storage_clips_at_zero() {
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::U8, vec![2]).unwrap();
    g.fill(&a, -5.0).unwrap();

    let c = common::run_with(&g, &[]);
    assert_eq!(c.read(&a).unwrap().data, vec![0.0, 0.0]);
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!((entry.dtype().pclip, entry.dtype().nclip), (127, 0));
    assert_eq!(entry.maxabs(), Some(0));
}

#[test]
fn test_clip_width_limited_by_storage() {
    let runtime = common::runtime();
    runtime
        .flex()
        .register(FlexId(0), FlexDType::with_bits(DType::I8, 16).unwrap(), 1.0)
        .unwrap();

    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![3]).unwrap();
    g.fill(&a, 1000.0).unwrap();

    let mut c = Computation::new(runtime, &g).unwrap();
    c.run().unwrap();

    let stored = c.read(&a).unwrap().data;
    assert_eq!(stored, vec![127.0; 3]);
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!(entry.maxabs(), Some(127));
    assert!(entry.overflowed());
}

#[test]
fn test_flex_fill_in_range() {
    let flex = FlexConfig {
        initial_scale: 0.25,
        ..FlexConfig::default()
    };
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I16, vec![4]).unwrap();
    g.fill(&a, 10.3).unwrap();

    let mut c = Transformer::new(common::test_config().with_flex(flex))
        .computation(&g)
        .unwrap();
    c.run().unwrap();

    // trunc(10.3 / 0.25) = 41
    assert_eq!(c.read(&a).unwrap().data, vec![41.0; 4]);
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!(entry.maxabs(), Some(41));
    assert!(!entry.overflowed());
}

#[test]
fn test_flex_rng_fill_stays_in_range() {
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![1000]).unwrap();
    let params: HashMap<String, f64> = [("low".to_string(), -1000.0), ("high".to_string(), 1000.0)]
        .into_iter()
        .collect();
    g.rng_fill(&a, "uniform", params).unwrap();

    let c = common::run_with(&g, &[]);
    let data = c.read(&a).unwrap().data;
    assert!(data.iter().all(|&x| (-128.0..=127.0).contains(&x)));

    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    let maxabs = entry.maxabs().unwrap();
    assert!(maxabs >= 127);
    assert_eq!(
        maxabs as f64,
        data.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
    );
}

#[test]
fn test_recalibration_converges() {
    let runtime = Runtime::new(common::test_config()).unwrap();
    runtime
        .flex()
        .register(FlexId(0), FlexDType::new(DType::I8).unwrap(), 1.0)
        .unwrap();

    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![8]).unwrap();
    g.fill(&a, 300.0).unwrap();
    let mut c = Computation::new(runtime, &g).unwrap();

    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    for _ in 0..4 {
        c.run().unwrap();
        if !entry.overflowed() {
            break;
        }
        assert_eq!(c.recalibrate_flex().unwrap(), 1);
    }

    assert!(!entry.overflowed());
    let stored = c.read(&a).unwrap().data[0];
    assert!(stored > 0.0 && stored < 127.0, "stored {}", stored);
    assert_eq!(entry.scale().unwrap(), 4.0);
}

#[test]
fn test_recalibration_targets_headroom() {
    let mut g = Graph::new();
    let a = g.add_flex_tensor(DType::I8, vec![2]).unwrap();
    g.fill(&a, 20.0).unwrap();

    let mut c = common::run_with(&g, &[]);
    assert_eq!(c.recalibrate_flex().unwrap(), 1);
    c.run().unwrap();

    // 20 lands at headroom * pclip = 63.5
    let entry = c.runtime().flex().entry(FlexId(0)).unwrap();
    assert_eq!(entry.maxabs(), Some(63));
    assert_eq!(c.read(&a).unwrap().data, vec![63.0; 2]);
}

#[test]
fn test_unreported_entries_untouched() {
    let runtime = common::runtime();
    runtime
        .flex()
        .register(FlexId(9), FlexDType::new(DType::I16).unwrap(), 3.0)
        .unwrap();

    let mut c = Computation::new(runtime, &Graph::new()).unwrap();
    assert_eq!(c.recalibrate_flex().unwrap(), 0);
    assert_eq!(
        c.runtime().flex().entry(FlexId(9)).unwrap().scale().unwrap(),
        3.0
    );
    assert_eq!(c.runtime().flex().reports().unwrap(), vec![(FlexId(9), None)]);
}
