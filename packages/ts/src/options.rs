// Compiler Options
//
// Trimmed-down option surface for the compilation unit. Options are parsed
// once per process from tsconfig and treated as immutable for the duration
// of a build.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptTarget {
    ES5,
    ES2015,
    ES2017,
    ES2020,
    ES2022,
    ESNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    None,
    CommonJS,
    ES2015,
    ES2020,
    ESNext,
}

/// Compiler options for one compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Base path of the project (directory of the tsconfig).
    pub base_path: Option<String>,
    /// Base URL for non-relative module resolution.
    pub base_url: Option<String>,
    /// Output directory for compiled files.
    pub out_dir: Option<String>,
    /// Root directory of input files.
    pub root_dir: Option<String>,
    pub module: Option<ModuleKind>,
    pub target: Option<ScriptTarget>,
    pub source_map: bool,
    pub inline_source_map: bool,
    pub declaration: bool,
    pub strict: bool,
    /// Path mapping entries, relative to `base_url`.
    pub paths: Option<HashMap<String, Vec<String>>>,
    /// Locale used for localized builds.
    pub locale: Option<String>,
    /// i18n translation input file.
    pub i18n_in_file: Option<String>,
    /// i18n translation input format.
    pub i18n_in_format: Option<String>,
    /// i18n extraction output file.
    pub i18n_out_file: Option<String>,
    /// i18n extraction output format.
    pub i18n_out_format: Option<String>,
}

impl CompilerOptions {
    /// Effective module kind, defaulting to ES modules.
    pub fn module_kind(&self) -> ModuleKind {
        self.module.unwrap_or(ModuleKind::ES2015)
    }
}
