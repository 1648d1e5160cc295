use anyhow::{bail, Context, Result};
use safety_evaluator::EvaluatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geofence::RestrictedZone;

/// Location-ingestion limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Minimum spacing between two accepted snapshots of one subject.
    pub min_interval_secs: u64,
    /// Prior snapshots kept per subject and handed to the evaluator.
    pub history_len: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 5 * 60,
            history_len: 12,
        }
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Operator webhook receiving JSON notifications (None = log only).
    pub webhook_url: Option<String>,
    /// Per-request timeout for the webhook.
    pub webhook_timeout_secs: Option<u64>,
}

/// Top-level service configuration.
///
/// Resolution order: defaults, then the TOML file, then `SENTINEL_*`
/// environment variables, then CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub evaluator: EvaluatorConfig,
    pub ingestion: IngestionConfig,
    pub notify: NotifyConfig,
    /// Append-only JSON-lines audit trail (None = events are not persisted).
    pub audit_log: Option<PathBuf>,
    /// Period of the confirmation-window finalizer.
    pub finalize_interval_secs: u64,
    pub zones: Vec<RestrictedZone>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorConfig::default(),
            ingestion: IngestionConfig::default(),
            notify: NotifyConfig::default(),
            audit_log: None,
            finalize_interval_secs: 5,
            zones: Vec::new(),
        }
    }
}

impl SentinelConfig {
    /// Load from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SENTINEL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{key}={raw:?} is not a valid value"))
        }

        if let Some(v) = lookup("SENTINEL_MIN_INTERVAL_SECS") {
            self.ingestion.min_interval_secs = parse("SENTINEL_MIN_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("SENTINEL_HISTORY_LEN") {
            self.ingestion.history_len = parse("SENTINEL_HISTORY_LEN", v)?;
        }
        if let Some(v) = lookup("SENTINEL_COOLDOWN_SECS") {
            self.evaluator.cooldown_secs = parse("SENTINEL_COOLDOWN_SECS", v)?;
        }
        if let Some(v) = lookup("SENTINEL_CONFIRMATION_WINDOW_SECS") {
            self.evaluator.confirmation_window_secs =
                parse("SENTINEL_CONFIRMATION_WINDOW_SECS", v)?;
        }
        if let Some(v) = lookup("SENTINEL_MIN_CONFIDENCE") {
            self.evaluator.min_confidence = parse("SENTINEL_MIN_CONFIDENCE", v)?;
        }
        if let Some(v) = lookup("SENTINEL_UTC_OFFSET_MINUTES") {
            self.evaluator.environment.utc_offset_minutes =
                parse("SENTINEL_UTC_OFFSET_MINUTES", v)?;
        }
        if let Some(v) = lookup("SENTINEL_WEBHOOK_URL") {
            self.notify.webhook_url = Some(v).filter(|url| !url.trim().is_empty());
        }
        if let Some(v) = lookup("SENTINEL_AUDIT_LOG") {
            self.audit_log = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.evaluator
            .validate()
            .context("Invalid [evaluator] section")?;
        if self.ingestion.history_len == 0 {
            bail!("ingestion.history_len must be at least 1");
        }
        if self.finalize_interval_secs == 0 {
            bail!("finalize_interval_secs must be at least 1");
        }
        for zone in &self.zones {
            zone.validate()
                .with_context(|| format!("Invalid restricted zone {:?}", zone.id))?;
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
