//! Deployment configuration for the relay core.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::selector::SelectionPolicy;

#[derive(Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Service-wide fallback model when neither the account nor the request
    /// names one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Service-wide default region.
    #[serde(default = "default_region")]
    pub default_region: String,
    /// Region override for the small/fast model family; falls back to
    /// `default_region` when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_model_region: Option<String>,
    /// Hard ceiling applied to every request's `max_tokens`.
    #[serde(default = "default_max_tokens_limit")]
    pub max_tokens_limit: u32,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    /// Offset in whole hours from UTC used for daily quota day boundaries.
    #[serde(default)]
    pub timezone_offset_hours: i32,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    /// Master secret for credential encryption. Never logged.
    pub vault_secret: String,
    #[serde(default = "default_vault_salt")]
    pub vault_salt: String,
    /// Accept pre-encryption plaintext credential records during migration.
    #[serde(default)]
    pub allow_legacy_plaintext: bool,
    /// Webhook URL for anomaly notifications; none means notifications are
    /// dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_webhook_url: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_tokens_limit() -> u32 {
    32_000
}

fn default_upstream_timeout_secs() -> u64 {
    120
}

fn default_vault_salt() -> String {
    "relaymux-vault".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_region: default_region(),
            small_model_region: None,
            max_tokens_limit: default_max_tokens_limit(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            timezone_offset_hours: 0,
            selection_policy: SelectionPolicy::default(),
            vault_secret: String::new(),
            vault_salt: default_vault_salt(),
            allow_legacy_plaintext: false,
            notify_webhook_url: None,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("default_model", &self.default_model)
            .field("default_region", &self.default_region)
            .field("small_model_region", &self.small_model_region)
            .field("max_tokens_limit", &self.max_tokens_limit)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("timezone_offset_hours", &self.timezone_offset_hours)
            .field("selection_policy", &self.selection_policy)
            .field("vault_secret", &"<redacted>")
            .field("vault_salt", &self.vault_salt)
            .field("allow_legacy_plaintext", &self.allow_legacy_plaintext)
            .field("notify_webhook_url", &self.notify_webhook_url)
            .finish()
    }
}

impl RelayConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| RelayError::Configuration(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vault_secret.trim().is_empty() {
            return Err(RelayError::Configuration(
                "vault_secret must not be empty".to_string(),
            ));
        }
        if self.max_tokens_limit == 0 {
            return Err(RelayError::Configuration(
                "max_tokens_limit must be > 0".to_string(),
            ));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(RelayError::Configuration(
                "upstream_timeout_secs must be > 0".to_string(),
            ));
        }
        if !(-23..=23).contains(&self.timezone_offset_hours) {
            return Err(RelayError::Configuration(format!(
                "timezone_offset_hours {} out of range",
                self.timezone_offset_hours
            )));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let config = RelayConfig::from_toml("vault_secret = \"s3cret\"\n").expect("parse");
        assert_eq!(config.default_region, "us-east-1");
        assert_eq!(config.max_tokens_limit, 32_000);
        assert_eq!(config.selection_policy, SelectionPolicy::BestPriority);
        assert!(!config.allow_legacy_plaintext);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut file,
            b"vault_secret = \"s3cret\"\nselection_policy = \"round_robin\"\n",
        )
        .expect("write");
        let config = RelayConfig::load(file.path()).expect("load");
        assert_eq!(config.selection_policy, SelectionPolicy::RoundRobin);
    }

    #[test]
    fn rejects_missing_vault_secret() {
        let err = RelayConfig::from_toml("default_region = \"eu-west-1\"\n").unwrap_err();
        assert!(err.to_string().contains("config"));
    }

    #[test]
    fn rejects_out_of_range_timezone() {
        let raw = "vault_secret = \"x\"\ntimezone_offset_hours = 30\n";
        assert!(RelayConfig::from_toml(raw).is_err());
    }

    #[test]
    fn debug_redacts_master_secret() {
        let mut config = RelayConfig::default();
        config.vault_secret = "super-secret".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
