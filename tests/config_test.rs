//! Tests for config loading from the environment and TOML files

use serial_test::serial;
use std::io::Write;

use revisit::config::Config;
use revisit::scheduler::{EngineSettings, ProxyPool};

const ENV_KEYS: &[&str] = &[
    "REVISIT_TICK_INTERVAL",
    "REVISIT_QUOTA",
    "REVISIT_INITIAL_CYCLE_DAYS",
    "REVISIT_ROLLOVER_CYCLE_DAYS",
    "REVISIT_PROXY_COOLDOWN_HOURS",
    "REVISIT_SKEW",
    "REVISIT_PRE_VISIT_DELAY_MS",
    "REVISIT_SQLITE_PATH",
    "REVISIT_PROXIES",
    "HTTP_PROXIES",
    "HTTP_PROXY_1",
    "HTTP_PROXY_2",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = Config::from_env().unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.engine.quota, 100);
    assert_eq!(config.engine.tick_interval_secs, 60);
    assert!(config.proxies.pool.is_empty());
    assert_eq!(
        config.database.sqlite_path,
        std::path::PathBuf::from("data/revisit.db")
    );
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("REVISIT_QUOTA", "250");
    std::env::set_var("REVISIT_ROLLOVER_CYCLE_DAYS", "30");
    std::env::set_var("REVISIT_PROXY_COOLDOWN_HOURS", "12");
    std::env::set_var("REVISIT_PRE_VISIT_DELAY_MS", "500-900");
    std::env::set_var("REVISIT_SQLITE_PATH", "/tmp/revisit-test.db");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.engine.quota, 250);
    assert_eq!(config.rollover_cycle_length(), chrono::Duration::days(30));
    assert_eq!(config.initial_cycle_length(), chrono::Duration::days(45));
    assert_eq!(config.proxy_cooldown(), chrono::Duration::hours(12));
    assert_eq!(config.pre_visit_delay(), 500..=900);

    let settings = EngineSettings::from_config(&config).unwrap();
    assert_eq!(settings.policy.quota, 250);
}

#[test]
#[serial]
fn test_unparsable_env_falls_back_to_default() {
    clear_env();
    std::env::set_var("REVISIT_QUOTA", "lots");
    std::env::set_var("REVISIT_PRE_VISIT_DELAY_MS", "fast");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.engine.quota, 100);
    assert_eq!(config.pre_visit_delay(), 1_000..=3_000);
}

#[test]
#[serial]
fn test_proxies_from_env() {
    clear_env();
    std::env::set_var("REVISIT_PROXIES", "http://a:1,http://b:2");
    std::env::set_var("HTTP_PROXY_1", "http://c:3");
    std::env::set_var("HTTP_PROXY_2", "http://a:1");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(
        config.proxies.pool,
        vec!["http://a:1", "http://b:2", "http://c:3"]
    );
    assert_eq!(ProxyPool::from_config(&config.proxies).len(), 3);
}

#[test]
fn test_from_file() {
    let mut config = Config::default();
    config.engine.quota = 40;
    config.engine.skew = 5.0;
    config.proxies.pool = vec![
        "http://a:1".to_string(),
        " http://a:1 ".to_string(),
        "http://b:2".to_string(),
    ];

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml::to_string(&config).unwrap().as_bytes())
        .unwrap();

    let loaded = Config::from_file(file.path()).unwrap();
    assert!(loaded.validate().is_ok());
    assert_eq!(loaded.engine.quota, 40);
    assert_eq!(loaded.engine.skew, 5.0);
    assert_eq!(loaded.proxies.pool, vec!["http://a:1", "http://b:2"]);
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[engine]\nquota = \"many\"\n").unwrap();
    assert!(Config::from_file(file.path()).is_err());

    assert!(Config::from_file(std::path::Path::new("/nonexistent/revisit.toml")).is_err());
}

#[test]
fn test_validation_rejects_zero_cycle() {
    let mut config = Config::default();
    config.engine.initial_cycle_days = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.engine.tick_interval_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_example_config_is_valid() {
    let config = Config::from_file(std::path::Path::new("revisit.example.toml"))
        .expect("revisit.example.toml should parse");
    assert!(config.validate().is_ok());
    assert!(config.proxies.pool.is_empty());
    assert_eq!(config.engine.quota, Config::default().engine.quota);
}
