//! Integration tests for config discovery and environment overrides
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate MMV_* variables are marked with #[serial].

use mmv_common::config::{env_override, resolve_config_path, CONFIG_ENV_VAR};
use mmv_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
#[serial]
fn test_env_var_used_when_no_explicit_path() {
    env::set_var(CONFIG_ENV_VAR, "/etc/mmv/batch.toml");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(PathBuf::from("/etc/mmv/batch.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/etc/mmv/batch.toml");
    let explicit = PathBuf::from("/srv/mmv.toml");

    let resolved = resolve_config_path(Some(&explicit), CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(explicit));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_override_parses_and_rejects() {
    env::set_var("MMV_TEST_CONCURRENCY", "8");
    assert_eq!(env_override::<usize>("MMV_TEST_CONCURRENCY").unwrap(), Some(8));

    env::set_var("MMV_TEST_CONCURRENCY", "eight");
    assert!(matches!(
        env_override::<usize>("MMV_TEST_CONCURRENCY"),
        Err(Error::Config(_))
    ));

    env::remove_var("MMV_TEST_CONCURRENCY");
    assert_eq!(env_override::<usize>("MMV_TEST_CONCURRENCY").unwrap(), None);
}
