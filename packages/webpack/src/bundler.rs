// Bundler Interface
//
// The bundler side of the boundary: the compilation object the plugin
// attaches to, the watcher's timestamp map, and the nested child build used
// to compile resources through the user's configured loader chain.

use crate::cache::FileTimestamp;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use ts::CompilerHost;

/// One bundler compilation. Errors and warnings accumulated here are what
/// the bundler reports to the user; the plugin never throws for
/// recoverable compilation problems.
#[derive(Default)]
pub struct Compilation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Timestamps reported by the file watcher. Empty on the first build.
    pub file_timestamps: HashMap<String, FileTimestamp>,
    /// Files the bundler should watch for the next rebuild.
    pub file_dependencies: HashSet<String>,
    pub(crate) plugin_attached: bool,
}

impl Compilation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamps(file_timestamps: HashMap<String, FileTimestamp>) -> Self {
        Self {
            file_timestamps,
            ..Default::default()
        }
    }
}

/// Result of one nested child build for a single resource entry.
#[derive(Debug, Clone, Default)]
pub struct NestedCompilationResult {
    pub content: String,
    pub map: Option<String>,
    /// Files the compiled output depends on (the resource itself included).
    pub file_dependencies: Vec<String>,
    pub errors: Vec<String>,
}

impl NestedCompilationResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A child compiler targeting a single synthetic output file. The real
/// implementation runs the bundler's loader chain; tests substitute mocks.
pub trait NestedCompiler {
    /// Compile a resource file as a single entry point.
    fn compile_file(&mut self, entry_name: &str, file_path: &str) -> NestedCompilationResult;

    /// Compile raw data that has no file on disk (inline styles).
    fn compile_data(&mut self, entry_name: &str, data: &str, mime_type: &str)
        -> NestedCompilationResult;
}

/// Pass-through nested compiler: serves file content unchanged with the file
/// itself as the only dependency. Used when no loader chain is configured.
pub struct PassthroughNestedCompiler {
    host: Rc<dyn CompilerHost>,
}

impl PassthroughNestedCompiler {
    pub fn new(host: Rc<dyn CompilerHost>) -> Self {
        Self { host }
    }
}

impl NestedCompiler for PassthroughNestedCompiler {
    fn compile_file(&mut self, _entry_name: &str, file_path: &str) -> NestedCompilationResult {
        match self.host.read_file(file_path) {
            Some(content) => NestedCompilationResult {
                content,
                map: None,
                file_dependencies: vec![file_path.to_string()],
                errors: Vec::new(),
            },
            None => NestedCompilationResult {
                errors: vec![format!("Child compilation failed: could not read {}", file_path)],
                ..Default::default()
            },
        }
    }

    fn compile_data(
        &mut self,
        _entry_name: &str,
        data: &str,
        _mime_type: &str,
    ) -> NestedCompilationResult {
        NestedCompilationResult {
            content: data.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts::InMemoryCompilerHost;

    #[test]
    fn passthrough_serves_file_content_with_self_dependency() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/app.html", "<div></div>");
        let mut compiler = PassthroughNestedCompiler::new(host);
        let result = compiler.compile_file("resource-0", "/src/app.html");
        assert!(result.success());
        assert_eq!(result.content, "<div></div>");
        assert_eq!(result.file_dependencies, vec!["/src/app.html"]);
    }

    #[test]
    fn missing_file_is_a_failed_result_not_a_panic() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        let mut compiler = PassthroughNestedCompiler::new(host);
        let result = compiler.compile_file("resource-0", "/src/missing.html");
        assert!(!result.success());
    }
}
