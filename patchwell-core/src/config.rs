use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    midi: MidiConfig,
}

#[derive(Deserialize, Default)]
struct RetryConfig {
    max_attempts: Option<u32>,
    retry_interval_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    backoff_factor: Option<f64>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    client_name: Option<String>,
    send_interval_ms: Option<u64>,
}

pub struct Config {
    retry: RetryConfig,
    midi: MidiConfig,
}

impl Config {
    /// Embedded defaults merged with the user's config file, if present.
    pub fn load() -> Self {
        let mut config = Self::embedded();

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        if let Err(e) = config.merge_str(&contents) {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    }
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    /// Defaults only, without looking at the user's config directory.
    pub fn embedded() -> Self {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded config.toml");
        Config {
            retry: base.retry,
            midi: base.midi,
        }
    }

    /// Overlay the keys present in `contents` on top of this config.
    pub fn merge_str(&mut self, contents: &str) -> Result<(), toml::de::Error> {
        let user: ConfigFile = toml::from_str(contents)?;
        merge_retry(&mut self.retry, user.retry);
        merge_midi(&mut self.midi, user.midi);
        Ok(())
    }

    pub fn retry(&self) -> RetryPolicy {
        let fallback = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(fallback.max_attempts).max(1),
            retry_interval: self
                .retry
                .retry_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.retry_interval),
            poll_interval: self
                .retry
                .poll_interval_ms
                .map(|ms| Duration::from_millis(ms.clamp(1, 100)))
                .unwrap_or(fallback.poll_interval),
            backoff_factor: self
                .retry
                .backoff_factor
                .filter(|f| f.is_finite() && *f >= 1.0)
                .unwrap_or(fallback.backoff_factor),
        }
    }

    /// Pause inserted between consecutive outbound messages.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.midi.send_interval_ms.unwrap_or(0))
    }

    pub fn client_name(&self) -> &str {
        self.midi.client_name.as_deref().unwrap_or("patchwell")
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("patchwell").join("config.toml"))
}

fn merge_retry(base: &mut RetryConfig, user: RetryConfig) {
    if user.max_attempts.is_some() {
        base.max_attempts = user.max_attempts;
    }
    if user.retry_interval_ms.is_some() {
        base.retry_interval_ms = user.retry_interval_ms;
    }
    if user.poll_interval_ms.is_some() {
        base.poll_interval_ms = user.poll_interval_ms;
    }
    if user.backoff_factor.is_some() {
        base.backoff_factor = user.backoff_factor;
    }
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.client_name.is_some() {
        base.client_name = user.client_name;
    }
    if user.send_interval_ms.is_some() {
        base.send_interval_ms = user.send_interval_ms;
    }
}
