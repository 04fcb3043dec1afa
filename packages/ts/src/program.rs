// Program
//
// Minimal shared surface of a compiler program, as consumed by the build
// orchestrator. Concrete programs live on the plugin side; the real
// toolchain implements the same trait.

use crate::diagnostics::Diagnostic;
use crate::source_file::SourceFile;
use std::sync::Arc;

/// Output of emitting a single file.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFile {
    pub output_text: String,
    pub source_map: Option<String>,
}

pub trait Program {
    fn get_root_file_names(&self) -> Vec<String>;
    fn get_source_files(&self) -> Vec<Arc<SourceFile>>;
    fn get_source_file(&self, file_name: &str) -> Option<Arc<SourceFile>>;
    fn get_options_diagnostics(&self) -> Vec<Diagnostic>;
    fn get_syntactic_diagnostics(&self) -> Vec<Diagnostic>;
    fn get_semantic_diagnostics(&self) -> Vec<Diagnostic>;
    /// Emit one file. `None` means the file is not part of this program.
    fn emit_file(&self, file_name: &str) -> Option<EmittedFile>;
}
