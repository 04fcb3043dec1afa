// Source File Cache
//
// Persistent mapping from normalized path to a previously parsed source
// file, plus a side-table of per-file diagnostics from the last analysis.
// Lives for the process lifetime in watch mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use ts::{Diagnostic, SourceFile};

/// Timestamp entry reported by the bundler's watcher for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTimestamp {
    /// The watcher is told not to track this file meaningfully.
    Ignore,
    /// No reliable timestamp is available; treat the file as changed.
    Unknown,
    /// Millisecond timestamp of the last modification.
    Time(u64),
}

#[derive(Default)]
pub struct SourceFileCache {
    files: HashMap<String, Arc<SourceFile>>,
    diagnostics: HashMap<String, Vec<Diagnostic>>,
}

impl SourceFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, file_name: &str) -> Option<Arc<SourceFile>> {
        self.files.get(file_name).cloned()
    }

    pub fn insert(&mut self, file_name: String, file: Arc<SourceFile>) {
        self.files.insert(file_name, file);
    }

    pub fn remove(&mut self, file_name: &str) {
        self.files.remove(file_name);
        self.diagnostics.remove(file_name);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get_file_diagnostics(&self, file_name: &str) -> Option<&[Diagnostic]> {
        self.diagnostics.get(file_name).map(|d| d.as_slice())
    }

    pub fn set_file_diagnostics(&mut self, file_name: String, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.insert(file_name, diagnostics);
    }

    /// Drop cached diagnostics for files affected by a change elsewhere in
    /// the program, without touching their parsed trees.
    pub fn invalidate_diagnostics<'a>(&mut self, affected: impl IntoIterator<Item = &'a str>) {
        for file in affected {
            self.diagnostics.remove(file);
        }
    }

    /// Invalidate entries based on watcher timestamps. A file counts as
    /// changed when its timestamp is unknown or at/after the last successful
    /// build; `Ignore` entries are skipped entirely. Returns the normalized
    /// changed set.
    pub fn invalidate(
        &mut self,
        timestamps: &HashMap<String, FileTimestamp>,
        last_build_time: Option<u64>,
    ) -> HashSet<String> {
        let mut changed = HashSet::new();
        for (file, entry) in timestamps {
            let file = crate::paths::normalize_path(file);
            match entry {
                FileTimestamp::Ignore => {}
                FileTimestamp::Unknown => {
                    changed.insert(file);
                }
                FileTimestamp::Time(time) => match last_build_time {
                    Some(last) if *time < last => {}
                    _ => {
                        changed.insert(file);
                    }
                },
            }
        }
        for file in &changed {
            self.remove(file);
        }
        changed
    }
}
