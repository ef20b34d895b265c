//! Shared file cache: repo-relative path → content and content hash.
//!
//! Each path is read at most once per cache. The first caller for a path
//! performs the read; concurrent callers for the same path block on the same
//! cell and receive the identical result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;

use crate::indexer::filesystem::{compute_content_hash, detect_language};
use crate::models::SourceFile;

type Cell = Arc<OnceLock<Option<SourceFile>>>;

pub struct FileCache {
    repo_root: PathBuf,
    entries: Mutex<HashMap<String, Cell>>,
    disk_reads: AtomicUsize,
}

impl FileCache {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            entries: Mutex::new(HashMap::new()),
            disk_reads: AtomicUsize::new(0),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Snapshot of `rel_path`, or `None` if it cannot be read.
    pub fn get(&self, rel_path: &str) -> Option<SourceFile> {
        let cell = {
            let mut entries = self.entries.lock();
            entries
                .entry(rel_path.to_string())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };
        cell.get_or_init(|| self.read(rel_path)).clone()
    }

    fn read(&self, rel_path: &str) -> Option<SourceFile> {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let bytes = match std::fs::read(self.repo_root.join(rel_path)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = rel_path, error = %e, "failed to read file");
                return None;
            }
        };
        let content_hash = compute_content_hash(&bytes);
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = rel_path, "file is not valid UTF-8; extracting from lossy text");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Some(SourceFile {
            path: rel_path.to_string(),
            language: detect_language(rel_path),
            content: Arc::from(content),
            content_hash,
        })
    }

    /// Number of reads that actually hit the filesystem.
    pub fn disk_reads(&self) -> usize {
        self.disk_reads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
