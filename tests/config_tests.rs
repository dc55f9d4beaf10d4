//! Runtime configuration loading

mod common;

use std::io::Write;

use flexforge::config::{CHANNEL_CAPACITY_ENV, MIN_KERNEL_RANK_ENV, RNG_SEED_ENV};
use flexforge::{ChannelCapacity, FlexForgeError, RuntimeConfig};
use serial_test::serial;

fn clear_env() {
    for var in [RNG_SEED_ENV, CHANNEL_CAPACITY_ENV, MIN_KERNEL_RANK_ENV] {
        std::env::remove_var(var);
    }
}

#[test]
fn test_json_file_partial() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{ "rng_seed": 3, "channel_capacity": {{ "bounded": 8 }}, "flex": {{ "headroom": 0.75 }} }}"#
    )
    .unwrap();

    let config = RuntimeConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.rng_seed, Some(3));
    assert_eq!(config.channel_capacity, ChannelCapacity::Bounded(8));
    assert_eq!(config.flex.headroom, 0.75);
    assert_eq!(config.flex.overflow_growth, 2.0);
    assert_eq!(config.min_kernel_rank, 2);
}

#[test]
fn test_json_file_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{ "flex": {{ "overflow_growth": 1.0 }} }}"#).unwrap();
    assert!(matches!(
        RuntimeConfig::from_json_file(file.path()),
        Err(FlexForgeError::InvalidConfiguration(_))
    ));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "not json").unwrap();
    assert!(matches!(
        RuntimeConfig::from_json_file(file.path()),
        Err(FlexForgeError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_json_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, FlexForgeError::IoError(_)));
}

#[test]
#[serial]
fn test_from_env() {
    clear_env();
    std::env::set_var(RNG_SEED_ENV, "17");
    std::env::set_var(CHANNEL_CAPACITY_ENV, "4");
    std::env::set_var(MIN_KERNEL_RANK_ENV, "3");
    let config = RuntimeConfig::from_env();
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.rng_seed, Some(17));
    assert_eq!(config.channel_capacity, ChannelCapacity::Bounded(4));
    assert_eq!(config.min_kernel_rank, 3);
}

#[test]
#[serial]
fn test_from_env_rejects_garbage() {
    clear_env();
    std::env::set_var(RNG_SEED_ENV, "seed");
    let result = RuntimeConfig::from_env();
    clear_env();
    assert!(matches!(result, Err(FlexForgeError::InvalidConfiguration(_))));
}

#[test]
#[serial]
fn test_env_seed_drives_rng() {
    clear_env();
    std::env::set_var(RNG_SEED_ENV, "99");
    let config = RuntimeConfig::from_env();
    clear_env();
    let config = config.unwrap();

    let mut g = flexforge::Graph::new();
    let a = g.add_tensor(flexforge::DType::F32, vec![8]);
    let params = [("low".to_string(), 0.0), ("high".to_string(), 1.0)]
        .into_iter()
        .collect();
    g.rng_fill(&a, "uniform", params).unwrap();

    let t = flexforge::Transformer::new(config);
    let mut first = t.computation(&g).unwrap();
    let mut second = t.computation(&g).unwrap();
    first.run().unwrap();
    second.run().unwrap();
    assert_eq!(first.read(&a).unwrap(), second.read(&a).unwrap());
    assert_ne!(common::test_config().rng_seed, Some(99));
}
