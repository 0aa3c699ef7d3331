//! Unit tests for probe credential loading.
//!
//! The test keychain has no `stallguard` entries, so these exercise the
//! environment-variable fallback.
//!
//! NOTE: These tests mutate process-global env vars and must run serially.

use stallguard::config::GlobalConfig;
use stallguard::probe::http::HttpHealthProbe;

fn config_with_env(env_key: &str) -> GlobalConfig {
    GlobalConfig::from_toml_str(&format!(
        r#"
[probe]
url = "http://127.0.0.1:9/models"
auth_header = "x-api-key"
credential_env = "{env_key}"
"#
    ))
    .expect("config parses")
}

#[tokio::test]
#[serial_test::serial]
async fn credential_loaded_from_env_var() {
    let key = "STALLGUARD_TEST_CREDENTIAL_SET";
    std::env::set_var(key, "secret-value");
    let mut config = config_with_env(key);

    config.load_credentials().await.expect("credential loads");

    let probe = config.probe.as_ref().expect("probe section");
    assert_eq!(probe.credential.as_deref(), Some("secret-value"));
    assert!(HttpHealthProbe::from_config(probe).is_ok());

    std::env::remove_var(key);
}

#[tokio::test]
#[serial_test::serial]
async fn missing_credential_names_the_env_var() {
    let key = "STALLGUARD_TEST_CREDENTIAL_MISSING";
    std::env::remove_var(key);
    let mut config = config_with_env(key);

    let err = config
        .load_credentials()
        .await
        .expect_err("missing credential");

    let text = err.to_string();
    assert!(text.starts_with("config:"), "{text}");
    assert!(text.contains(key), "{text}");
}

#[tokio::test]
#[serial_test::serial]
async fn empty_env_var_counts_as_missing() {
    let key = "STALLGUARD_TEST_CREDENTIAL_EMPTY";
    std::env::set_var(key, "");
    let mut config = config_with_env(key);

    assert!(config.load_credentials().await.is_err());

    std::env::remove_var(key);
}

#[tokio::test]
#[serial_test::serial]
async fn probe_without_auth_header_needs_no_credential() {
    let mut config = GlobalConfig::from_toml_str(
        r#"
[probe]
url = "http://127.0.0.1:9/models"
"#,
    )
    .expect("config parses");

    config.load_credentials().await.expect("nothing to load");
    assert!(config.probe.expect("probe").credential.is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn no_probe_section_is_a_no_op() {
    let mut config = GlobalConfig::default();
    config.load_credentials().await.expect("nothing to load");
    assert!(config.probe.is_none());
}

#[test]
fn probe_from_config_requires_loaded_credential() {
    let config = config_with_env("STALLGUARD_TEST_CREDENTIAL_UNLOADED");
    let probe = config.probe.as_ref().expect("probe section");

    let err = HttpHealthProbe::from_config(probe).expect_err("credential not loaded");
    assert!(err.to_string().contains("x-api-key"));
}
