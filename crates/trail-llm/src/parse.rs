//! Tolerant extraction of JSON objects from model output.
//!
//! Order: fenced ```json block, balanced `{...}` spans in order of their
//! opening brace, whole text. The first candidate that decodes as the target
//! type wins; when none does the caller gets a fixed stub instead of an error.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::warn;
use trail_core::RiskLevel;

use crate::types::{BatchAnalysis, CodeAnalysis, PerFileAnalysis};

pub const UNPARSEABLE_SUMMARY: &str = "Analysis could not parse the model response";

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Content of the first fenced code block, if any.
pub fn fenced_block(text: &str) -> Option<&str> {
    fence_regex()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// First balanced top-level `{...}` span, skipping braces inside strings.
pub fn balanced_object(text: &str) -> Option<&str> {
    balanced_objects(text).next()
}

/// Every balanced `{...}` span, one per opening brace, in text order.
///
/// Nested objects are yielded too, after their parent, so a caller can skip a
/// span that does not decode and try the next one.
pub fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, ch)| ch == '{')
        .filter_map(move |(start, _)| balanced_from(text, start))
}

fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Try each extraction strategy in order and return the first that decodes.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    fenced_block(text)
        .into_iter()
        .chain(balanced_objects(text))
        .chain(std::iter::once(text.trim()))
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

pub fn unparseable_analysis() -> CodeAnalysis {
    CodeAnalysis {
        issues: Vec::new(),
        suggestions: Vec::new(),
        risk_level: RiskLevel::Medium,
        summary: Some(UNPARSEABLE_SUMMARY.to_string()),
        tests: None,
    }
}

pub fn parse_analysis(text: &str) -> CodeAnalysis {
    extract_json(text).unwrap_or_else(|| {
        warn!(len = text.len(), "unparseable analysis response, using stub");
        unparseable_analysis()
    })
}

/// Decode a batch response, guaranteeing one entry per requested file.
///
/// Files the model skipped (or the whole batch, when unparseable) receive the
/// stub analysis so callers never see a missing per-file slot.
pub fn parse_batch(text: &str, files: &BTreeMap<String, String>) -> BatchAnalysis {
    let mut batch: BatchAnalysis = extract_json(text).unwrap_or_else(|| {
        warn!(len = text.len(), files = files.len(), "unparseable batch response, using stub");
        BatchAnalysis {
            global_summary: UNPARSEABLE_SUMMARY.to_string(),
            per_file_results: Vec::new(),
        }
    });

    batch.per_file_results.retain(|r| files.contains_key(&r.file_path));
    for path in files.keys() {
        if batch.for_file(path).is_none() {
            batch.per_file_results.push(PerFileAnalysis {
                file_path: path.clone(),
                analysis: unparseable_analysis(),
            });
        }
    }
    batch
}
