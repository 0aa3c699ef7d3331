//! Configuration parsing, validation, and probe credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name under which probe credentials are stored.
const KEYRING_SERVICE: &str = "stallguard";

/// Keychain entry holding the probe credential.
const KEYRING_PROBE_KEY: &str = "probe_credential";

/// Timing thresholds for a single stall detector, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DetectorConfig {
    /// How long to wait for the first activity event before investigating.
    #[serde(default = "default_first_event_timeout_ms")]
    pub first_event_timeout_ms: u64,
    /// Silence tolerated between activity events before investigating.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Upper bound on a single health probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// A responsive probe faster than this confirms a request-specific stall.
    #[serde(default = "default_probe_responsive_threshold_ms")]
    pub probe_responsive_threshold_ms: u64,
    /// Optional ceiling on total silence; `None` keeps probing indefinitely.
    #[serde(default)]
    pub max_silence_ms: Option<u64>,
}

fn default_first_event_timeout_ms() -> u64 {
    15_000
}

fn default_idle_timeout_ms() -> u64 {
    10_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_probe_responsive_threshold_ms() -> u64 {
    3_000
}

fn default_provider() -> String {
    "default".into()
}

fn default_credential_env() -> String {
    "STALLGUARD_PROBE_CREDENTIAL".into()
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            first_event_timeout_ms: default_first_event_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_responsive_threshold_ms: default_probe_responsive_threshold_ms(),
            max_silence_ms: None,
        }
    }
}

impl DetectorConfig {
    /// First-event timeout as a [`Duration`].
    #[must_use]
    pub fn first_event_timeout(&self) -> Duration {
        Duration::from_millis(self.first_event_timeout_ms)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Responsive threshold as a [`Duration`].
    #[must_use]
    pub fn probe_responsive_threshold(&self) -> Duration {
        Duration::from_millis(self.probe_responsive_threshold_ms)
    }

    /// Silence ceiling as a [`Duration`], if configured.
    #[must_use]
    pub fn max_silence(&self) -> Option<Duration> {
        self.max_silence_ms.map(Duration::from_millis)
    }

    /// Check that every threshold is usable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any duration is zero or the silence
    /// ceiling is shorter than the idle timeout.
    pub fn validate(&self) -> Result<()> {
        self.check_bounds()?;

        if self.probe_responsive_threshold_ms >= self.probe_timeout_ms {
            warn!(
                threshold_ms = self.probe_responsive_threshold_ms,
                probe_timeout_ms = self.probe_timeout_ms,
                "responsive threshold is not below the probe timeout; every completed probe counts as fast"
            );
        }

        Ok(())
    }

    /// Hard limits only: non-zero durations and a ceiling no shorter than the
    /// idle timeout.
    pub(crate) fn check_bounds(&self) -> Result<()> {
        let fields = [
            ("first_event_timeout_ms", self.first_event_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            (
                "probe_responsive_threshold_ms",
                self.probe_responsive_threshold_ms,
            ),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if let Some(ceiling) = self.max_silence_ms {
            if ceiling < self.idle_timeout_ms {
                return Err(AppError::Config(format!(
                    "max_silence_ms ({ceiling}) must not be shorter than idle_timeout_ms ({})",
                    self.idle_timeout_ms
                )));
            }
        }

        Ok(())
    }
}

/// HTTP health probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProbeConfig {
    /// Cheap endpoint to GET (e.g. a model listing).
    pub url: String,
    /// Header carrying the credential; no credential is sent when absent.
    #[serde(default)]
    pub auth_header: Option<String>,
    /// Environment variable consulted when the keychain has no credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Credential value (populated at runtime).
    #[serde(skip)]
    pub credential: Option<String>,
}

/// Top-level configuration parsed from `stallguard.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Label identifying the remote service in logs and stall reasons.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Detector thresholds.
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Health probe settings; without them stalls are declared on silence alone.
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            detector: DetectorConfig::default(),
            probe: None,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the probe credential from the OS keychain with env-var fallback.
    ///
    /// Does nothing when no probe is configured or the probe sends no
    /// credential header.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a credential header is configured but
    /// neither the keychain nor the environment provides a value.
    pub async fn load_credentials(&mut self) -> Result<()> {
        let Some(probe) = self.probe.as_mut() else {
            return Ok(());
        };
        if probe.auth_header.is_none() {
            return Ok(());
        }
        probe.credential = Some(load_credential(KEYRING_PROBE_KEY, &probe.credential_env).await?);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(AppError::Config("provider must not be empty".into()));
        }

        if let Some(ref probe) = self.probe {
            if !probe.url.starts_with("http://") && !probe.url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "probe url must be http(s): {}",
                    probe.url
                )));
            }
        }

        self.detector.validate()
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
