//! Workspace host: the editor-side view of the project.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use trail_llm::CursorPosition;
use walkdir::{DirEntry, WalkDir};

use crate::error::EngineError;

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", "dist", "build", "__pycache__", ".venv"];
const DEFAULT_MAX_FILE_BYTES: u64 = 256 * 1024;
const DEFAULT_MAX_FILES: usize = 2000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkspaceFile {
    /// Relative to the workspace root, `/`-separated.
    pub path: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveDocument {
    pub path: String,
    pub content: String,
    pub cursor: Option<CursorPosition>,
}

#[async_trait]
pub trait WorkspaceHost: Send + Sync {
    /// Failing to resolve the root is fatal for a pipeline run.
    fn workspace_root(&self) -> Result<PathBuf, EngineError>;

    async fn list_files(&self) -> Result<Vec<WorkspaceFile>, EngineError>;

    async fn active_document(&self) -> Option<ActiveDocument>;

    async fn open_files(&self) -> Vec<String>;

    /// Current diagnostics, rendered one per line.
    async fn diagnostics(&self) -> Vec<String>;

    async fn read_file(&self, path: &str) -> Option<String>;
}

/// Filesystem-backed host. Editor state (active document, open files,
/// diagnostics) is pushed in by the caller.
pub struct FsWorkspace {
    root: PathBuf,
    max_file_bytes: u64,
    max_files: usize,
    active: Mutex<Option<ActiveDocument>>,
    open: Mutex<Vec<String>>,
    diagnostics: Mutex<Vec<String>>,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            active: Mutex::new(None),
            open: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make `path` the active document, loading its content from disk.
    /// Returns false if the file cannot be read.
    pub fn set_active(&self, path: &str, cursor: Option<CursorPosition>) -> bool {
        let Ok(content) = std::fs::read_to_string(self.resolve(path)) else {
            return false;
        };
        let path = self.relative(path);
        self.open_file(&path);
        *self.active.lock() = Some(ActiveDocument { path, content, cursor });
        true
    }

    pub fn set_active_buffer(&self, path: &str, content: impl Into<String>, cursor: Option<CursorPosition>) {
        *self.active.lock() = Some(ActiveDocument {
            path: self.relative(path),
            content: content.into(),
            cursor,
        });
    }

    pub fn open_file(&self, path: &str) {
        let path = self.relative(path);
        let mut open = self.open.lock();
        if !open.contains(&path) {
            open.push(path);
        }
    }

    pub fn close_file(&self, path: &str) {
        let path = self.relative(path);
        self.open.lock().retain(|p| *p != path);
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|doc| doc.path == path) {
            *active = None;
        }
    }

    pub fn set_diagnostics(&self, diagnostics: Vec<String>) {
        *self.diagnostics.lock() = diagnostics;
    }

    /// Root-relative form of `path`; paths outside the root are kept as given.
    pub fn relative(&self, path: &str) -> String {
        let p = Path::new(path);
        let rel = p.strip_prefix(&self.root).unwrap_or(p);
        rel.to_string_lossy().replace('\\', "/")
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

#[async_trait]
impl WorkspaceHost for FsWorkspace {
    fn workspace_root(&self) -> Result<PathBuf, EngineError> {
        let root = self
            .root
            .canonicalize()
            .map_err(|e| EngineError::Context(format!("workspace root {}: {e}", self.root.display())))?;
        if !root.is_dir() {
            return Err(EngineError::Context(format!("workspace root {} is not a directory", root.display())));
        }
        Ok(root)
    }

    async fn list_files(&self) -> Result<Vec<WorkspaceFile>, EngineError> {
        let root = self.workspace_root()?;
        let max_bytes = self.max_file_bytes;
        let max_files = self.max_files;
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_skipped(e))
                .filter_map(Result::ok)
            {
                if files.len() >= max_files {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let too_big = entry.metadata().map(|m| m.len() > max_bytes).unwrap_or(true);
                if too_big {
                    debug!(path = %entry.path().display(), "skipping oversized file");
                    continue;
                }
                // Non-UTF-8 content is treated as binary and skipped.
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                files.push(WorkspaceFile {
                    path: rel.to_string_lossy().replace('\\', "/"),
                    content,
                });
            }
            files
        })
        .await
        .map_err(|e| EngineError::Internal(format!("workspace scan panicked: {e}")))
    }

    async fn active_document(&self) -> Option<ActiveDocument> {
        self.active.lock().clone()
    }

    async fn open_files(&self) -> Vec<String> {
        self.open.lock().clone()
    }

    async fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().clone()
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        tokio::fs::read_to_string(self.resolve(path)).await.ok()
    }
}
