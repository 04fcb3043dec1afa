// File Emitter
//
// Store for per-file emit results, plus the watch-mode emit history used
// to tell whether a file's output actually changed between builds.

use crate::paths::{denormalize_path, normalize_path};
use std::collections::HashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Output of emitting one program file, as served to the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitFileResult {
    pub content: String,
    pub map: Option<String>,
    /// Native (platform-separator) paths of everything this output depends
    /// on, ready to hand to the bundler's watcher.
    pub dependencies: Vec<String>,
}

impl EmitFileResult {
    pub fn new(content: String, map: Option<String>, dependencies: Vec<String>) -> Self {
        let dependencies = dependencies.iter().map(|d| denormalize_path(d)).collect();
        Self {
            content,
            map,
            dependencies,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmitHistoryItem {
    length: usize,
    hash: u64,
}

/// Emit results keyed by normalized source path. Results persist across
/// builds so a rebuild whose emit was skipped can still serve the previous
/// output. The history is only maintained in watch mode; a single build has
/// nothing to compare against.
pub struct FileEmitter {
    watch_mode: bool,
    results: HashMap<String, EmitFileResult>,
    history: HashMap<String, EmitHistoryItem>,
}

impl FileEmitter {
    pub fn new(watch_mode: bool) -> Self {
        Self {
            watch_mode,
            results: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn insert(&mut self, file_name: &str, result: EmitFileResult) {
        self.results.insert(normalize_path(file_name), result);
    }

    pub fn get(&self, file_name: &str) -> Option<&EmitFileResult> {
        self.results.get(&normalize_path(file_name))
    }

    pub fn remove(&mut self, file_name: &str) {
        let key = normalize_path(file_name);
        self.results.remove(&key);
        self.history.remove(&key);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Record the emitted content in the history and report whether it
    /// differs from the previous build's output for the same file. Outside
    /// watch mode every output counts as changed and no history is kept.
    pub fn output_changed(&mut self, file_name: &str, content: &str) -> bool {
        if !self.watch_mode {
            return true;
        }
        let key = normalize_path(file_name);
        let item = EmitHistoryItem {
            length: content.len(),
            hash: xxh3_64(content.as_bytes()),
        };
        match self.history.insert(key, item) {
            Some(previous) => previous != item,
            None => true,
        }
    }
}
