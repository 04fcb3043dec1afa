// Diagnostics
//
// Diagnostic structures shared between the plugin, the program facade and
// the forked type-checker wire protocol.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCategory {
    Warning,
    Error,
    Suggestion,
    Message,
}

/// Diagnostic message produced by the compiler or by the plugin itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub code: i32,
    pub message: String,
    /// File the diagnostic is attached to, if any.
    pub file: Option<String>,
    pub start: Option<usize>,
    pub length: Option<usize>,
}

impl Diagnostic {
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            category: DiagnosticCategory::Error,
            code,
            message: message.into(),
            file: None,
            start: None,
            length: None,
        }
    }

    pub fn warning(code: i32, message: impl Into<String>) -> Self {
        Self {
            category: DiagnosticCategory::Warning,
            code,
            message: message.into(),
            file: None,
            start: None,
            length: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// True if any diagnostic in the slice is of Error category.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.category == DiagnosticCategory::Error)
}

/// Format diagnostics for terminal display.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();
    for diag in diagnostics {
        let category = match diag.category {
            DiagnosticCategory::Error => "error",
            DiagnosticCategory::Warning => "warning",
            DiagnosticCategory::Suggestion => "suggestion",
            DiagnosticCategory::Message => "message",
        };
        match (&diag.file, diag.start) {
            (Some(file), Some(start)) => {
                output.push_str(&format!(
                    "{} TS{}: {} ({}:{})\n",
                    category, diag.code, diag.message, file, start
                ));
            }
            (Some(file), None) => {
                output.push_str(&format!(
                    "{} TS{}: {} ({})\n",
                    category, diag.code, diag.message, file
                ));
            }
            _ => {
                output.push_str(&format!("{} TS{}: {}\n", category, diag.code, diag.message));
            }
        }
    }
    output
}
