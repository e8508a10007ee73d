use muqun::config::{GroupConfig, InitialOffset};
use std::path::PathBuf;
use tokio::time::Duration;

#[test]
fn loads_layered_config_files() {
    let cfg = GroupConfig::load(PathBuf::from(env!("CARGO_MANIFEST_DIR"))).unwrap();
    assert_eq!(cfg.initial, InitialOffset::Newest);
    assert_eq!(cfg.processing_timeout, Duration::from_secs(5));
    assert_eq!(cfg.commit_interval, Duration::from_secs(1));
    assert_eq!(cfg.session_timeout, Duration::from_secs(10));
    assert_eq!(cfg.channel_buffer_size, 64);
    assert!(!cfg.reset_offsets);
}

#[test]
fn falls_back_to_defaults_without_config_files() {
    let cfg = GroupConfig::load(PathBuf::from("/nonexistent")).unwrap();
    assert_eq!(cfg.initial, InitialOffset::Oldest);
    assert_eq!(cfg.processing_timeout, Duration::from_secs(60));
    assert_eq!(cfg.commit_interval, Duration::from_secs(10));
    assert_eq!(cfg.session_timeout, Duration::from_secs(30));
    assert_eq!(cfg.channel_buffer_size, 256);
}

#[test]
fn validates_durations() {
    let cfg = GroupConfig {
        session_timeout: Duration::ZERO,
        ..GroupConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = GroupConfig {
        processing_timeout: Duration::ZERO,
        ..GroupConfig::default()
    };
    assert!(cfg.validate().is_err());

    assert!(GroupConfig::default().validate().is_ok());
}
