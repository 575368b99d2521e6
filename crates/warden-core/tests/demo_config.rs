use std::path::PathBuf;

use warden_core::CoordinatorConfig;

fn demos_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

#[test]
fn demo_config_loads_and_validates() {
    let config = CoordinatorConfig::load_from_path(demos_dir().join("warden.toml")).unwrap();

    assert_eq!(config.host.as_str(), "warden");
    assert_eq!(config.execution.pool_size, 2);
    assert_eq!(config.membership.isolation_timeout_ms, 3_000);
    // unset keys keep their defaults
    assert_eq!(config.membership.register_attempts, 5);
    assert!(config.engine_defaults.contains_key("jdbc"));
}

#[test]
fn effective_config_round_trips_through_toml() {
    let config = CoordinatorConfig::load_from_path(demos_dir().join("warden.toml")).unwrap();

    let rendered = config.to_toml_string().unwrap();
    let reloaded = CoordinatorConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(reloaded, config);
}
