//! Settings types. Every section is `#[serde(default)]` so a partial
//! `settings.json` only needs to name the keys it changes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrailSettings {
    pub ingestion: IngestionSettings,
    pub session: SessionSettings,
    pub pipeline: PipelineSettings,
    pub llm: LlmSettings,
    pub lint: LintSettings,
    pub vcs: VcsSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Ingestion queue and edit debounce timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestionSettings {
    /// Interval between queue flushes.
    pub flush_interval_ms: u64,
    /// Maximum tasks drained per flush. Zero is treated as one.
    pub batch_size: usize,
    /// Quiet period before a file edit is recorded.
    pub debounce_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
            batch_size: 10,
            debounce_ms: 2000,
        }
    }
}

/// Session boundary thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub idle_timeout_ms: u64,
    pub idle_check_interval_ms: u64,
    /// Sessions younger than this never close on pattern drift.
    pub min_session_age_ms: u64,
    /// Drift requires strictly more recent files than this.
    pub min_recent_files: usize,
    pub recent_file_window: usize,
    /// Extensions (with leading dot) that never count toward drift.
    pub ignored_extensions: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30 * 60 * 1000,
            idle_check_interval_ms: 5 * 60 * 1000,
            min_session_age_ms: 5 * 60 * 1000,
            min_recent_files: 3,
            recent_file_window: 5,
            ignored_extensions: [".log", ".txt", ".md", ".json", ".yaml", ".yml"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub analyze_all_files: bool,
    pub max_files_to_analyze: usize,
    /// Period of background pipeline runs in `trail watch`. Zero disables them.
    pub interval_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            analyze_all_files: false,
            max_files_to_analyze: 10,
            interval_secs: 0,
        }
    }
}

/// LLM and embedding provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// Use the offline deterministic client instead of the HTTP provider.
    pub mock: bool,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub api_base: String,
    pub timeout_ms: u64,
    /// Filled from `GEMINI_API_KEY`; never written back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            mock: false,
            model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimensions: 768,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_ms: 60_000,
            api_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LintSettings {
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8765/lint".to_string(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VcsSettings {
    pub timeout_ms: u64,
}

impl Default for VcsSettings {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Database path, relative to `~/.trail` unless absolute.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "trail.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    /// Persist warn+ records to the `logs` table.
    pub log_to_sqlite: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            log_to_sqlite: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names_are_camel_case() {
        let value = serde_json::to_value(TrailSettings::default()).unwrap();
        assert!(value["ingestion"]["flushIntervalMs"].is_number());
        assert!(value["session"]["ignoredExtensions"].is_array());
        assert!(value["pipeline"]["analyzeAllFiles"].is_boolean());
        assert!(value["llm"]["embeddingDimensions"].is_number());
        assert!(value["storage"]["dbPath"].is_string());
    }

    #[test]
    fn api_key_is_not_serialized() {
        let mut settings = TrailSettings::default();
        settings.llm.api_key = Some("secret".into());
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let s: SessionSettings = serde_json::from_str(r#"{"idleTimeoutMs": 1000}"#).unwrap();
        assert_eq!(s.idle_timeout_ms, 1000);
        assert_eq!(s.recent_file_window, 5);
        assert_eq!(s.ignored_extensions.len(), 6);
    }
}
