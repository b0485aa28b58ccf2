//! Line-to-function attribution by scanning for definitions.
//!
//! The scanner looks for the nearest definition header at or above the edited
//! line. It does not track where a body ends, so an edit between two functions
//! is attributed to the one above it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::debounce::SymbolResolver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    Go,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str())? {
            "rs" => Some(Self::Rust),
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    fn definition(self) -> Option<&'static Regex> {
        static RUST: OnceLock<Option<Regex>> = OnceLock::new();
        static PYTHON: OnceLock<Option<Regex>> = OnceLock::new();
        static JAVASCRIPT: OnceLock<Option<Regex>> = OnceLock::new();
        static GO: OnceLock<Option<Regex>> = OnceLock::new();

        let (cell, pattern) = match self {
            Self::Rust => (
                &RUST,
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe)\s+)*(?:extern\s+(?:\x22[^\x22]*\x22\s+)?)?fn\s+([A-Za-z_][A-Za-z0-9_]*)",
            ),
            Self::Python => (&PYTHON, r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)"),
            Self::JavaScript => (
                &JAVASCRIPT,
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)|^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>",
            ),
            Self::Go => (&GO, r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)"),
        };
        cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
    }
}

/// Name of the nearest definition at or above zero-based `line`.
pub fn enclosing_function(language: Language, source: &str, line: u32) -> Option<String> {
    let re = language.definition()?;
    source
        .lines()
        .take(line as usize + 1)
        .filter_map(|text| {
            let caps = re.captures(text)?;
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().to_string())
        })
        .last()
}

/// Resolver that reads the edited file from disk under `root`.
pub struct DefinitionScanner {
    root: PathBuf,
}

impl DefinitionScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SymbolResolver for DefinitionScanner {
    async fn function_at(&self, path: &str, line: u32) -> Option<String> {
        let full = self.root.join(path);
        let language = Language::from_path(&full)?;
        let source = match tokio::fs::read_to_string(&full).await {
            Ok(source) => source,
            Err(e) => {
                debug!(path, error = %e, "cannot read file for symbol lookup");
                return None;
            }
        };
        enclosing_function(language, &source, line)
    }
}
