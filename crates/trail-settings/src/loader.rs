//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TrailSettings;

/// `~/.trail`, falling back to `/tmp/.trail` without a home directory.
pub fn trail_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".trail")
}

pub fn settings_path() -> PathBuf {
    trail_home().join("settings.json")
}

pub fn load_settings() -> Result<TrailSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TrailSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TrailSettings> {
    let defaults = serde_json::to_value(TrailSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut TrailSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored, leaving the file/default value in place.
pub fn apply_overrides_with(settings: &mut TrailSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Ingestion ───────────────────────────────────────────────────
    if let Some(v) = env.u64("TRAIL_FLUSH_INTERVAL_MS", 10, 60_000) {
        settings.ingestion.flush_interval_ms = v;
    }
    if let Some(v) = env.usize("TRAIL_BATCH_SIZE", 1, 10_000) {
        settings.ingestion.batch_size = v;
    }
    if let Some(v) = env.u64("TRAIL_DEBOUNCE_MS", 0, 600_000) {
        settings.ingestion.debounce_ms = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("TRAIL_IDLE_TIMEOUT_MS", 1000, 86_400_000) {
        settings.session.idle_timeout_ms = v;
    }

    // ── Pipeline ────────────────────────────────────────────────────
    if let Some(v) = env.bool("TRAIL_ANALYZE_ALL") {
        settings.pipeline.analyze_all_files = v;
    }
    if let Some(v) = env.usize("TRAIL_MAX_FILES", 1, 1000) {
        settings.pipeline.max_files_to_analyze = v;
    }
    if let Some(v) = env.u64("TRAIL_PIPELINE_INTERVAL_SECS", 0, 86_400) {
        settings.pipeline.interval_secs = v;
    }

    // ── Providers ───────────────────────────────────────────────────
    if let Some(v) = env.bool("TRAIL_LLM_MOCK") {
        settings.llm.mock = v;
    }
    if let Some(v) = env.string("TRAIL_LLM_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.string("TRAIL_LLM_API_BASE") {
        settings.llm.api_base = v;
    }
    if let Some(v) = env.string("GEMINI_API_KEY") {
        settings.llm.api_key = Some(v);
    }
    if let Some(v) = env.string("TRAIL_LINT_URL") {
        settings.lint.url = v;
    }
    if let Some(v) = env.bool("TRAIL_LINT_ENABLED") {
        settings.lint.enabled = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = env.string("TRAIL_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = env.string("TRAIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"session": {"idle": 1, "window": 5}});
        let source = serde_json::json!({"session": {"idle": 9}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["session"]["idle"], 9);
        assert_eq!(merged["session"]["window"], 5);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"exts": [".md", ".txt"]});
        let source = serde_json::json!({"exts": [".log"]});
        assert_eq!(deep_merge(target, source)["exts"], serde_json::json!([".log"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.ingestion.batch_size, 10);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"ingestion": {"batchSize": 25}, "pipeline": {"analyzeAllFiles": true}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.ingestion.batch_size, 25);
        assert_eq!(settings.ingestion.flush_interval_ms, 500);
        assert!(settings.pipeline.analyze_all_files);
        assert_eq!(settings.pipeline.max_files_to_analyze, 10);
    }

    #[test]
    fn array_in_file_replaces_default_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"ignoredExtensions": [".lock"]}}"#).unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.session.ignored_extensions, vec![".lock".to_string()]);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = TrailSettings::default();
        apply_overrides_with(
            &mut settings,
            env(&[
                ("TRAIL_BATCH_SIZE", "3"),
                ("TRAIL_ANALYZE_ALL", "yes"),
                ("TRAIL_LLM_MOCK", "1"),
                ("GEMINI_API_KEY", "k-123"),
                ("TRAIL_DB_PATH", "/tmp/x.db"),
            ]),
        );
        assert_eq!(settings.ingestion.batch_size, 3);
        assert!(settings.pipeline.analyze_all_files);
        assert!(settings.llm.mock);
        assert_eq!(settings.llm.api_key.as_deref(), Some("k-123"));
        assert_eq!(settings.storage.db_path, "/tmp/x.db");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = TrailSettings::default();
        apply_overrides_with(
            &mut settings,
            env(&[
                ("TRAIL_BATCH_SIZE", "0"),
                ("TRAIL_FLUSH_INTERVAL_MS", "fast"),
                ("TRAIL_ANALYZE_ALL", "maybe"),
                ("TRAIL_LLM_MODEL", ""),
            ]),
        );
        assert_eq!(settings.ingestion.batch_size, 10);
        assert_eq!(settings.ingestion.flush_interval_ms, 500);
        assert!(!settings.pipeline.analyze_all_files);
        assert_eq!(settings.llm.model, "gemini-2.0-flash");
    }

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("500", 10, 60_000), Some(500));
        assert_eq!(parse_u64_range("5", 10, 60_000), None);
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
        assert_eq!(parse_usize_range("abc", 1, 10_000), None);
    }
}
