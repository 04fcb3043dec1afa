// Configuration
//
// tsconfig reading and root-name computation. Root names are recomputed at
// the start of every build because newly discovered lazy routes may add new
// entry points.

use crate::paths::{dirname, normalize_path, resolve};
use ts::{CompilerHost, CompilerOptions, Diagnostic, ModuleKind, ScriptTarget};

/// Parsed configuration from tsconfig.json.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfiguration {
    /// Path to the project tsconfig.
    pub project: String,
    /// Directory containing the tsconfig.
    pub base_path: String,
    /// Root source file names, normalized.
    pub root_names: Vec<String>,
    /// Compiler options.
    pub options: CompilerOptions,
    /// Configuration errors.
    pub errors: Vec<Diagnostic>,
}

impl ParsedConfiguration {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Read a tsconfig through the host. `files` entries resolve through the
/// host; `include` globs go through the filesystem since hosts expose no
/// directory listing.
pub fn read_configuration(host: &dyn CompilerHost, project: &str) -> ParsedConfiguration {
    let project = normalize_path(project);
    let base_path = dirname(&project);
    let mut config = ParsedConfiguration {
        project: project.clone(),
        base_path: base_path.clone(),
        ..Default::default()
    };

    let content = match host.read_file(&project) {
        Some(content) => content,
        None => {
            config.errors.push(Diagnostic::error(
                5083,
                format!("Cannot read file '{}'.", project),
            ));
            return config;
        }
    };

    let json = match serde_json::from_str::<serde_json::Value>(&strip_json_comments(&content)) {
        Ok(json) => json,
        Err(e) => {
            config.errors.push(
                Diagnostic::error(5014, format!("Failed to parse file '{}': {}.", project, e))
                    .with_file(project.clone()),
            );
            return config;
        }
    };

    config.options = parse_compiler_options(&json, &base_path);

    let files: Vec<String> = json
        .get("files")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    if !files.is_empty() {
        for file in files {
            let full = resolve(&base_path, &file);
            if host.file_exists(&full) {
                config.root_names.push(full);
            } else {
                config.errors.push(Diagnostic::error(
                    6053,
                    format!("File '{}' not found.", full),
                ));
            }
        }
    } else {
        let include: Vec<String> = json
            .get("include")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_else(|| vec!["**/*.ts".to_string()]);
        let exclude: Vec<String> = json
            .get("exclude")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_else(|| vec!["**/node_modules/**".to_string()]);
        config.root_names = discover_files(&base_path, &include, &exclude);
    }

    config
}

/// Strip single-line and leading block comments for JSON5-ish tsconfig files.
pub fn strip_json_comments(input: &str) -> String {
    let mut result = String::new();
    for line in input.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("//") && !trimmed.starts_with("/*") {
            result.push_str(line);
            result.push('\n');
        }
    }
    result
}

fn parse_compiler_options(json: &serde_json::Value, base_path: &str) -> CompilerOptions {
    let mut options = CompilerOptions {
        base_path: Some(base_path.to_string()),
        ..Default::default()
    };
    let Some(raw) = json.get("compilerOptions") else {
        return options;
    };

    if let Some(s) = raw.get("baseUrl").and_then(|v| v.as_str()) {
        options.base_url = Some(resolve(base_path, s));
    }
    if let Some(s) = raw.get("outDir").and_then(|v| v.as_str()) {
        options.out_dir = Some(resolve(base_path, s));
    }
    if let Some(s) = raw.get("rootDir").and_then(|v| v.as_str()) {
        options.root_dir = Some(resolve(base_path, s));
    }
    if let Some(b) = raw.get("sourceMap").and_then(|v| v.as_bool()) {
        options.source_map = b;
    }
    if let Some(b) = raw.get("inlineSourceMap").and_then(|v| v.as_bool()) {
        options.inline_source_map = b;
    }
    if let Some(b) = raw.get("declaration").and_then(|v| v.as_bool()) {
        options.declaration = b;
    }
    if let Some(b) = raw.get("strict").and_then(|v| v.as_bool()) {
        options.strict = b;
    }
    if let Some(s) = raw.get("module").and_then(|v| v.as_str()) {
        options.module = match s.to_ascii_lowercase().as_str() {
            "none" => Some(ModuleKind::None),
            "commonjs" => Some(ModuleKind::CommonJS),
            "es2015" | "es6" => Some(ModuleKind::ES2015),
            "es2020" => Some(ModuleKind::ES2020),
            "esnext" => Some(ModuleKind::ESNext),
            _ => None,
        };
    }
    if let Some(s) = raw.get("target").and_then(|v| v.as_str()) {
        options.target = match s.to_ascii_lowercase().as_str() {
            "es5" => Some(ScriptTarget::ES5),
            "es2015" | "es6" => Some(ScriptTarget::ES2015),
            "es2017" => Some(ScriptTarget::ES2017),
            "es2020" => Some(ScriptTarget::ES2020),
            "es2022" => Some(ScriptTarget::ES2022),
            "esnext" => Some(ScriptTarget::ESNext),
            _ => None,
        };
    }
    if let Some(s) = raw.get("locale").and_then(|v| v.as_str()) {
        options.locale = Some(s.to_string());
    }

    options
}

fn discover_files(base_path: &str, include: &[String], exclude: &[String]) -> Vec<String> {
    let mut files = Vec::new();
    for pattern in include {
        let full_pattern = format!("{}/{}", base_path, pattern);
        let Ok(paths) = glob::glob(&full_pattern) else {
            continue;
        };
        for path in paths.flatten() {
            let path_str = normalize_path(&path.to_string_lossy());
            let excluded = exclude.iter().any(|excl| {
                if excl.contains("node_modules") && path_str.contains("node_modules") {
                    return true;
                }
                glob::Pattern::new(&format!("{}/{}", base_path, excl))
                    .map(|p| p.matches(&path_str))
                    .unwrap_or_else(|_| path_str.contains(excl.as_str()))
            });
            if !excluded && path.is_file() {
                files.push(path_str);
            }
        }
    }
    files.sort();
    files
}
