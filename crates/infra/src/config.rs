//! Workflow configuration.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::status_store::records::DEFAULT_KEY_PREFIX;

pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Maximum age of the newest tracked job for a sweep to touch a part.
    pub recovery_window: Duration,
    /// Link thumbnail generation after conversion.
    pub thumbnails_enabled: bool,
    /// Link lossless re-encoding after conversion.
    pub compress_enabled: bool,
    pub inference_device: String,
    pub default_segmentation_model: Option<String>,
    pub status_key_prefix: String,
    pub sweep_interval: Duration,
    pub redis_url: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            thumbnails_enabled: true,
            compress_enabled: true,
            inference_device: "cpu".to_string(),
            default_segmentation_model: None,
            status_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            redis_url: None,
        }
    }
}

impl WorkflowConfig {
    /// Read `FOLIO_*` variables (and `REDIS_URL`), keeping defaults for
    /// unset or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parsed::<u64>(&lookup, "FOLIO_RECOVERY_WINDOW_SECS") {
            config.recovery_window = Duration::from_secs(secs);
        }
        if let Some(on) = flag(&lookup, "FOLIO_THUMBNAILS_ENABLED") {
            config.thumbnails_enabled = on;
        }
        if let Some(on) = flag(&lookup, "FOLIO_COMPRESS_ENABLED") {
            config.compress_enabled = on;
        }
        if let Some(device) = non_empty(&lookup, "FOLIO_INFERENCE_DEVICE") {
            config.inference_device = device;
        }
        config.default_segmentation_model = non_empty(&lookup, "FOLIO_DEFAULT_SEGMENTATION_MODEL");
        if let Some(prefix) = non_empty(&lookup, "FOLIO_STATUS_KEY_PREFIX") {
            config.status_key_prefix = prefix;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "FOLIO_SWEEP_INTERVAL_SECS") {
            if secs == 0 {
                warn!("FOLIO_SWEEP_INTERVAL_SECS must be positive, keeping default");
            } else {
                config.sweep_interval = Duration::from_secs(secs);
            }
        }
        config.redis_url = non_empty(&lookup, "REDIS_URL");

        config
    }

    pub fn with_recovery_window(mut self, window: Duration) -> Self {
        self.recovery_window = window;
        self
    }

    pub fn with_thumbnails(mut self, enabled: bool) -> Self {
        self.thumbnails_enabled = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_enabled = enabled;
        self
    }

    pub fn with_inference_device(mut self, device: impl Into<String>) -> Self {
        self.inference_device = device.into();
        self
    }

    pub fn with_default_segmentation_model(mut self, handle: impl Into<String>) -> Self {
        self.default_segmentation_model = Some(handle.into());
        self
    }

    pub fn with_status_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.status_key_prefix = prefix.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn recovery_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.recovery_window).unwrap_or(chrono::Duration::MAX)
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = non_empty(lookup, key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = non_empty(lookup, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "ignoring unparsable boolean flag");
            None
        }
    }
}
