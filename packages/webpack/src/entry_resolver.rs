// Entry Resolver
//
// Finds the application's entry NgModule by locating the single static
// `bootstrapModule(X)` call in the main file, then tracing the symbol X
// through named imports and re-export chains to its declaring file.

use crate::error::PluginError;
use crate::paths::normalize_path;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use ts::CompilerHost;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryModule {
    /// Normalized path of the file declaring the module class.
    pub path: String,
    pub class_name: String,
}

impl EntryModule {
    /// Parse an `path#ClassName` override as passed in plugin options.
    pub fn parse(spec: &str) -> Option<Self> {
        let (path, class_name) = spec.split_once('#')?;
        if path.is_empty() || class_name.is_empty() {
            return None;
        }
        Some(Self {
            path: normalize_path(path),
            class_name: class_name.to_string(),
        })
    }
}

impl fmt::Display for EntryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.class_name)
    }
}

static BOOTSTRAP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bootstrapModule\s*\(\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*[),]").expect("static regex")
});

static NAMED_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]"#).expect("static regex")
});

static NAMED_REEXPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"export\s*\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]"#).expect("static regex")
});

static STAR_REEXPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"export\s*\*\s*from\s*['"]([^'"]+)['"]"#).expect("static regex")
});

fn class_declaration_re(name: &str) -> Regex {
    Regex::new(&format!(
        r"\bclass\s+{}\b",
        regex::escape(name)
    ))
    .expect("escaped identifier regex")
}

/// Parse one `A, B as C` specifier list into `(exported_name, local_name)`
/// pairs.
fn parse_specifiers(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter_map(|spec| {
            let spec = spec.trim();
            if spec.is_empty() {
                return None;
            }
            match spec.split_once(" as ") {
                Some((original, alias)) => {
                    Some((original.trim().to_string(), alias.trim().to_string()))
                }
                None => Some((spec.to_string(), spec.to_string())),
            }
        })
        .collect()
}

/// Resolve the single statically analyzable bootstrap call in `main_path`.
pub fn resolve_entry_module(
    host: &dyn CompilerHost,
    main_path: &str,
) -> Result<EntryModule, PluginError> {
    let main_path = normalize_path(main_path);
    let text = host.read_file(&main_path).ok_or_else(|| {
        PluginError::EntryModuleNotFound(format!("could not read main file {}", main_path))
    })?;

    let mut identifiers: Vec<String> = BOOTSTRAP_RE
        .captures_iter(&text)
        .map(|c| c[1].to_string())
        .collect();
    identifiers.dedup();
    let identifier = match identifiers.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(PluginError::EntryModuleNotFound(format!(
                "no statically analyzable bootstrapModule call in {}. Either add one or set the entryModule option.",
                main_path
            )))
        }
        _ => {
            return Err(PluginError::EntryModuleNotFound(format!(
                "multiple bootstrapModule calls in {}; the entry module is ambiguous. Set the entryModule option.",
                main_path
            )))
        }
    };

    // Declared in the main file itself.
    if class_declaration_re(&identifier).is_match(&text) {
        return Ok(EntryModule {
            path: main_path,
            class_name: identifier,
        });
    }

    // Otherwise follow the named import binding the identifier.
    for captures in NAMED_IMPORT_RE.captures_iter(&text) {
        for (exported, local) in parse_specifiers(&captures[1]) {
            if local != identifier {
                continue;
            }
            let specifier = &captures[2];
            let Some(resolved) = host.resolve_module_name(specifier, &main_path) else {
                continue;
            };
            let mut visited = HashSet::new();
            if let Some(path) = find_exported_class(
                host,
                &normalize_path(&resolved.resolved_file_name),
                &exported,
                &mut visited,
            ) {
                return Ok(EntryModule {
                    path,
                    class_name: exported,
                });
            }
        }
    }

    Err(PluginError::EntryModuleNotFound(format!(
        "could not trace {} to its declaring module from {}",
        identifier, main_path
    )))
}

/// Find the file declaring `class {name}`, following re-export chains.
fn find_exported_class(
    host: &dyn CompilerHost,
    file: &str,
    name: &str,
    visited: &mut HashSet<String>,
) -> Option<String> {
    if !visited.insert(file.to_string()) {
        return None;
    }
    let text = host.read_file(file)?;

    if class_declaration_re(name).is_match(&text) {
        return Some(file.to_string());
    }

    for captures in NAMED_REEXPORT_RE.captures_iter(&text) {
        for (original, exported) in parse_specifiers(&captures[1]) {
            if exported != name {
                continue;
            }
            if let Some(resolved) = host.resolve_module_name(&captures[2], file) {
                let target = normalize_path(&resolved.resolved_file_name);
                if let Some(found) = find_exported_class(host, &target, &original, visited) {
                    return Some(found);
                }
            }
        }
    }

    for captures in STAR_REEXPORT_RE.captures_iter(&text) {
        if let Some(resolved) = host.resolve_module_name(&captures[1], file) {
            let target = normalize_path(&resolved.resolved_file_name);
            if let Some(found) = find_exported_class(host, &target, name, visited) {
                return Some(found);
            }
        }
    }

    None
}
