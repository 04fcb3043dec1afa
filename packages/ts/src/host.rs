// Compiler Host
//
// Abstraction for the compilation host environment. The plugin decorates
// these methods (caching, dependency collection, substitution, ...) without
// the compiler side knowing.

use crate::source_file::SourceFile;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Result of resolving one module specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub resolved_file_name: String,
    /// Whether the target lives under a dependency directory. Affects how
    /// the compiler treats the file for diagnostics purposes.
    pub is_external_library_import: bool,
}

impl ResolvedModule {
    pub fn new(resolved_file_name: impl Into<String>) -> Self {
        let resolved_file_name = resolved_file_name.into();
        let is_external_library_import = resolved_file_name.contains("/node_modules/");
        Self {
            resolved_file_name,
            is_external_library_import,
        }
    }
}

/// Compilation host interface.
pub trait CompilerHost {
    /// Read a file.
    fn read_file(&self, file_name: &str) -> Option<String>;

    /// Write a file.
    fn write_file(&self, file_name: &str, content: &str);

    /// Check if a file exists.
    fn file_exists(&self, file_name: &str) -> bool;

    /// Get the current directory.
    fn get_current_directory(&self) -> String;

    /// Canonical (forward-slash) form of a file name.
    fn get_canonical_file_name(&self, file_name: &str) -> String {
        file_name.replace('\\', "/")
    }

    /// Get a parsed source file. `force` requests a fresh parse even when an
    /// implementation would otherwise serve a cached tree.
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        let _ = force;
        self.read_file(file_name)
            .map(|text| Arc::new(SourceFile::new(file_name, text)))
    }

    /// Resolve a module specifier against a containing file.
    fn resolve_module_name(
        &self,
        module_name: &str,
        containing_file: &str,
    ) -> Option<ResolvedModule>;
}

/// Directory part of a canonical path.
pub fn directory_of(file_name: &str) -> String {
    match file_name.rfind('/') {
        Some(pos) if pos > 0 => file_name[..pos].to_string(),
        Some(_) => "/".to_string(),
        None => ".".to_string(),
    }
}

/// Join a relative specifier onto a directory, resolving `.` and `..`
/// segments. Both inputs are expected in canonical form.
pub fn join_relative(dir: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if dir.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Candidate file names for a resolved specifier, in priority order.
fn resolution_candidates(base: &str) -> Vec<String> {
    vec![
        base.to_string(),
        format!("{}.ts", base),
        format!("{}.tsx", base),
        format!("{}.d.ts", base),
        format!("{}.js", base),
        format!("{}/index.ts", base),
        format!("{}/index.d.ts", base),
    ]
}

fn resolve_against<H: CompilerHost + ?Sized>(
    host: &H,
    module_name: &str,
    containing_file: &str,
) -> Option<ResolvedModule> {
    let containing = host.get_canonical_file_name(containing_file);
    let base = if module_name.starts_with('.') {
        join_relative(&directory_of(&containing), module_name)
    } else {
        format!(
            "{}/node_modules/{}",
            host.get_current_directory(),
            module_name
        )
    };
    resolution_candidates(&base)
        .into_iter()
        .find(|candidate| host.file_exists(candidate))
        .map(ResolvedModule::new)
}

/// In-memory compiler host for testing.
#[derive(Default)]
pub struct InMemoryCompilerHost {
    files: RefCell<HashMap<String, String>>,
    current_dir: String,
}

impl InMemoryCompilerHost {
    pub fn new(current_dir: impl Into<String>) -> Self {
        Self {
            files: RefCell::new(HashMap::new()),
            current_dir: current_dir.into(),
        }
    }

    /// Add a file.
    pub fn add_file(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files.borrow_mut().insert(path.into(), content.into());
    }

    pub fn remove_file(&self, path: &str) {
        self.files.borrow_mut().remove(path);
    }
}

impl CompilerHost for InMemoryCompilerHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.files.borrow().get(file_name).cloned()
    }

    fn write_file(&self, file_name: &str, content: &str) {
        self.files
            .borrow_mut()
            .insert(file_name.to_string(), content.to_string());
    }

    fn file_exists(&self, file_name: &str) -> bool {
        self.files.borrow().contains_key(file_name)
    }

    fn get_current_directory(&self) -> String {
        self.current_dir.clone()
    }

    fn resolve_module_name(
        &self,
        module_name: &str,
        containing_file: &str,
    ) -> Option<ResolvedModule> {
        resolve_against(self, module_name, containing_file)
    }
}

/// Filesystem-backed compiler host.
pub struct NodeCompilerHost {
    current_dir: String,
}

impl NodeCompilerHost {
    pub fn new() -> Self {
        let current_dir = std::env::current_dir()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| ".".to_string());
        Self { current_dir }
    }

    pub fn with_current_directory(current_dir: impl Into<String>) -> Self {
        Self {
            current_dir: current_dir.into(),
        }
    }
}

impl Default for NodeCompilerHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerHost for NodeCompilerHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        std::fs::read_to_string(file_name).ok()
    }

    fn write_file(&self, file_name: &str, content: &str) {
        if let Some(parent) = Path::new(file_name).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(file_name, content);
    }

    fn file_exists(&self, file_name: &str) -> bool {
        Path::new(file_name).is_file()
    }

    fn get_current_directory(&self) -> String {
        self.current_dir.clone()
    }

    fn resolve_module_name(
        &self,
        module_name: &str,
        containing_file: &str,
    ) -> Option<ResolvedModule> {
        resolve_against(self, module_name, containing_file)
    }
}
