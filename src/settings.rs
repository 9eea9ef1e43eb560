use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BankmailError, Result};
use crate::oracle::{OracleConfig, DEFAULT_TIMEOUT_SECS};

/// Tuning constants for the parse/categorize pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Regex results below this confidence go to the fallback parser.
    pub confidence_threshold: f64,
    pub fallback_batch_size: usize,
    pub categorize_batch_size: usize,
    /// Bodies are cut to this many characters before being sent to the oracle.
    pub fallback_body_chars: usize,
    /// Fixed confidence assigned to oracle-parsed transactions.
    pub llm_confidence: f64,
    /// Time budget for each oracle batch call. The only oracle timeout.
    pub oracle_timeout_secs: u64,
    pub incremental_days: u32,
    pub backfill_months: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            fallback_batch_size: 25,
            categorize_batch_size: 100,
            fallback_body_chars: 800,
            llm_confidence: 0.7,
            oracle_timeout_secs: DEFAULT_TIMEOUT_SECS,
            incremental_days: 7,
            backfill_months: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub mail_dir: Option<String>,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_user_id() -> String {
    "default".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_id: default_user_id(),
            user_email: None,
            mail_dir: None,
            oracle: OracleConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("bankmail.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("logs")
    }

    /// Oracle settings with environment overrides applied.
    pub fn resolved_oracle(&self) -> OracleConfig {
        let mut oracle = self.oracle.clone();
        apply_env_overrides(&mut oracle, |key| std::env::var(key).ok());
        oracle
    }
}

/// `BANKMAIL_API_KEY` beats `OPENAI_API_KEY`; empty values are ignored.
pub fn apply_env_overrides(oracle: &mut OracleConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(key) = get("BANKMAIL_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
        oracle.api_key = Some(key);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        oracle.base_url = url;
    }
    if let Some(model) = get("BANKMAIL_MODEL") {
        oracle.model = model;
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("bankmail")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("bankmail")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| BankmailError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "pipeline": {"fallback_batch_size": 10}}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.user_id, "default");
        assert_eq!(s.pipeline.fallback_batch_size, 10);
        assert_eq!(s.pipeline.categorize_batch_size, 100);
        assert_eq!(s.pipeline.confidence_threshold, 0.7);
        assert!(!s.oracle.is_configured());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            mail_dir: Some("/tmp/mail".to_string()),
            ..Settings::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let loaded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.mail_dir.as_deref(), Some("/tmp/mail"));
        assert_eq!(loaded.pipeline, PipelineConfig::default());
        assert_eq!(loaded.db_path(), PathBuf::from("/tmp/test/bankmail.db"));
    }

    #[test]
    fn test_oracle_timeout_lives_in_pipeline_only() {
        let json = r#"{"data_dir": "/tmp/test", "oracle": {"api_key": "k", "timeout_secs": 5},
                       "pipeline": {"oracle_timeout_secs": 15}}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.pipeline.oracle_timeout_secs, 15);
        let saved = serde_json::to_value(&s.oracle).unwrap();
        assert!(saved.get("timeout_secs").is_none());
        assert_eq!(PipelineConfig::default().oracle_timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("BANKMAIL_API_KEY", "sk-bankmail"),
            ("BANKMAIL_MODEL", "gpt-test"),
            ("OPENAI_BASE_URL", ""),
        ]);
        let mut oracle = OracleConfig::default();
        apply_env_overrides(&mut oracle, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(oracle.api_key.as_deref(), Some("sk-bankmail"));
        assert_eq!(oracle.model, "gpt-test");
        assert_eq!(oracle.base_url, crate::oracle::DEFAULT_BASE_URL);
        assert!(oracle.is_configured());
    }

    #[test]
    fn test_no_key_anywhere_means_not_configured() {
        let mut oracle = OracleConfig::default();
        apply_env_overrides(&mut oracle, |_| None);
        assert!(!oracle.is_configured());
    }
}
