// Lazy Routes
//
// Discovery of statically declared `loadChildren` references and the merge
// into the process-lifetime route map. Stale entries are never removed when
// a route disappears from the program; that is a documented limitation of
// the map, not something the merge step repairs.

use crate::error::PluginError;
use crate::paths::normalize_path;
use crate::program::CompilationMode;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use ts::CompilerHost;

/// Route token (`modulePath#exportName`) to resolved module file path.
/// Entries persist for the process lifetime; insert or overwrite only.
pub type LazyRouteMap = IndexMap<String, String>;

static LOAD_CHILDREN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"loadChildren\s*:\s*['"]([^'"]+)['"]"#).expect("static regex")
});

/// Scan one file's text for string-literal `loadChildren` properties.
pub fn scan_source_for_lazy_routes(text: &str) -> Vec<String> {
    LOAD_CHILDREN_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolve a route token's module part against its containing file.
fn resolve_route_module(
    host: &dyn CompilerHost,
    token: &str,
    containing_file: &str,
) -> Option<(String, String)> {
    let (module_part, _export) = split_route(token);
    if module_part.is_empty() {
        return None;
    }
    let resolved = host.resolve_module_name(module_part, containing_file)?;
    Some((
        token.to_string(),
        normalize_path(&resolved.resolved_file_name),
    ))
}

fn split_route(token: &str) -> (&str, Option<&str>) {
    match token.split_once('#') {
        Some((module, export)) => (module, Some(export)),
        None => (token, None),
    }
}

/// AST-scan strategy: discover routes in exactly the given set of changed
/// files, keeping only pairs whose target actually exists on the host.
pub fn find_lazy_routes_in_files(
    host: &dyn CompilerHost,
    files: &[String],
) -> IndexMap<String, String> {
    let mut discovered = IndexMap::new();
    for file in files {
        let Some(text) = host.read_file(file) else {
            continue;
        };
        for token in scan_source_for_lazy_routes(&text) {
            if let Some((route, path)) = resolve_route_module(host, &token, file) {
                discovered.insert(route, path);
            }
        }
    }
    discovered
}

pub enum WholeProgramDiscoveryError {
    /// The router package is not resolvable anywhere in the program; the
    /// application simply has no routes.
    RouterPackageNotFound,
}

/// Whole-program listing strategy (first build only): walks the import
/// closure from the root names, so routes declared in library declaration
/// files are found without a prior AST scan.
pub fn discover_lazy_routes_whole_program(
    host: &dyn CompilerHost,
    root_names: &[String],
    router_package: &str,
) -> Result<IndexMap<String, String>, WholeProgramDiscoveryError> {
    let mut router_seen = false;
    let mut visited = std::collections::HashSet::new();
    let mut queue: Vec<String> = root_names.iter().map(|r| normalize_path(r)).collect();
    let mut discovered = IndexMap::new();

    while let Some(file) = queue.pop() {
        if !visited.insert(file.clone()) {
            continue;
        }
        let Some(text) = host.read_file(&file) else {
            continue;
        };
        for token in scan_source_for_lazy_routes(&text) {
            if let Some((route, path)) = resolve_route_module(host, &token, &file) {
                discovered.insert(route, path);
            }
        }
        for specifier in crate::program::scan_module_specifiers(&file, &text) {
            if specifier == router_package || specifier.starts_with(&format!("{}/", router_package))
            {
                router_seen = true;
            }
            if let Some(resolved) = host.resolve_module_name(&specifier, &file) {
                let resolved = normalize_path(&resolved.resolved_file_name);
                if resolved.ends_with(".ts") || resolved.ends_with(".tsx") {
                    queue.push(resolved);
                }
            }
        }
    }

    if !router_seen && host.resolve_module_name(router_package, "/").is_none() {
        return Err(WholeProgramDiscoveryError::RouterPackageNotFound);
    }
    Ok(discovered)
}

/// Program-native listing strategy: reduces the program's own lazy-route
/// listing, failing fast on a route key that maps to two different paths.
/// That API enforces global uniqueness strictly.
pub fn reduce_program_listing(
    listing: &[(String, String)],
) -> Result<IndexMap<String, String>, PluginError> {
    let mut reduced: IndexMap<String, String> = IndexMap::new();
    for (route, path) in listing {
        let path = normalize_path(path);
        match reduced.get(route) {
            Some(existing) if existing != &path => {
                return Err(PluginError::DuplicateLazyRoute {
                    route: route.clone(),
                    left: existing.clone(),
                    right: path,
                });
            }
            _ => {
                reduced.insert(route.clone(), path);
            }
        }
    }
    Ok(reduced)
}

/// Merge discovered routes into the persistent map. Conflicts here are
/// warnings with a latest-wins policy; a full rebuild is recommended to
/// validate that no real overlap exists.
pub fn process_lazy_routes(
    lazy_routes: &mut LazyRouteMap,
    discovered: &IndexMap<String, String>,
    mode: CompilationMode,
) -> Vec<String> {
    let mut warnings = Vec::new();

    for (route_key, ts_file) in discovered {
        let (module_part, export) = split_route(route_key);
        if module_part.is_empty() {
            continue;
        }
        let ts_file = normalize_path(ts_file);

        let (module_key, module_path) = match mode {
            CompilationMode::Jit => (route_key.clone(), ts_file),
            CompilationMode::Aot => {
                let stripped = strip_ts_extension(&ts_file);
                let factory_export = export
                    .map(|e| format!("#{}NgFactory", e))
                    .unwrap_or_default();
                (
                    format!("{}.ngfactory{}", module_part, factory_export),
                    format!("{}.ngfactory.js", stripped),
                )
            }
        };

        match lazy_routes.get(&module_key) {
            Some(existing) if existing == &module_path => {}
            Some(existing) => {
                warnings.push(format!(
                    "Duplicated path in loadChildren detected during a rebuild: \"{}\" changed from {} to {}. We will take the latest version detected and override it to save rebuild time. You should perform a full build to validate that your routes don't overlap.",
                    module_key, existing, module_path
                ));
                lazy_routes.insert(module_key, module_path);
            }
            None => {
                if let Some((other_key, _)) = lazy_routes
                    .iter()
                    .find(|(k, v)| *v == &module_path && **k != module_key)
                {
                    warnings.push(format!(
                        "Duplicated path in loadChildren detected: \"{}\" and \"{}\" both point to {}. We will take the latest version detected. You should perform a full build to validate that your routes don't overlap.",
                        other_key, module_key, module_path
                    ));
                }
                lazy_routes.insert(module_key, module_path);
            }
        }
    }

    warnings
}

fn strip_ts_extension(path: &str) -> String {
    for suffix in [".d.tsx", ".d.ts", ".tsx", ".ts"] {
        if let Some(stripped) = path.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts::InMemoryCompilerHost;

    #[test]
    fn scans_string_literal_load_children() {
        let text = r#"
            const routes = [
                { path: 'admin', loadChildren: './admin/admin.module#AdminModule' },
                { path: 'shop', loadChildren: () => import('./shop') },
            ];
        "#;
        assert_eq!(
            scan_source_for_lazy_routes(text),
            vec!["./admin/admin.module#AdminModule"]
        );
    }

    #[test]
    fn discovery_keeps_only_existing_targets() {
        let host = InMemoryCompilerHost::new("/p");
        host.add_file(
            "/src/app.routes.ts",
            r#"const r = [{ loadChildren: './a/a.module#AModule' }, { loadChildren: './gone#Gone' }];"#,
        );
        host.add_file("/src/a/a.module.ts", "export class AModule {}");

        let discovered =
            find_lazy_routes_in_files(&host, &["/src/app.routes.ts".to_string()]);
        assert_eq!(discovered.len(), 1);
        assert_eq!(
            discovered.get("./a/a.module#AModule").map(String::as_str),
            Some("/src/a/a.module.ts")
        );
    }

    #[test]
    fn program_listing_rejects_conflicting_duplicates() {
        let listing = vec![
            ("./a#A".to_string(), "/src/a.ts".to_string()),
            ("./a#A".to_string(), "/src/other.ts".to_string()),
        ];
        assert!(matches!(
            reduce_program_listing(&listing),
            Err(PluginError::DuplicateLazyRoute { .. })
        ));
    }

    #[test]
    fn program_listing_accepts_identical_duplicates() {
        let listing = vec![
            ("./a#A".to_string(), "/src/a.ts".to_string()),
            ("./a#A".to_string(), "/src/a.ts".to_string()),
        ];
        let reduced = reduce_program_listing(&listing).unwrap();
        assert_eq!(reduced.len(), 1);
    }

    #[test]
    fn jit_merge_keeps_route_key_and_ts_path() {
        let mut map = LazyRouteMap::new();
        let mut discovered = IndexMap::new();
        discovered.insert("./a#AModule".to_string(), "/src/a.ts".to_string());
        let warnings = process_lazy_routes(&mut map, &discovered, CompilationMode::Jit);
        assert!(warnings.is_empty());
        assert_eq!(map.get("./a#AModule").map(String::as_str), Some("/src/a.ts"));
    }

    #[test]
    fn aot_merge_rewrites_to_factory_references() {
        let mut map = LazyRouteMap::new();
        let mut discovered = IndexMap::new();
        discovered.insert("./a#AModule".to_string(), "/src/a.ts".to_string());
        process_lazy_routes(&mut map, &discovered, CompilationMode::Aot);
        assert_eq!(
            map.get("./a.ngfactory#AModuleNgFactory").map(String::as_str),
            Some("/src/a.ngfactory.js")
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut map = LazyRouteMap::new();
        let mut discovered = IndexMap::new();
        discovered.insert("./a#AModule".to_string(), "/src/shared.module.ts".to_string());
        discovered.insert("./b#BModule".to_string(), "/src/shared.module.ts".to_string());

        let first = process_lazy_routes(&mut map, &discovered, CompilationMode::Jit);
        assert_eq!(first.len(), 1);
        let size = map.len();

        let second = process_lazy_routes(&mut map, &discovered, CompilationMode::Jit);
        assert!(second.is_empty());
        assert_eq!(map.len(), size);
    }

    #[test]
    fn conflicting_rebuild_discovery_warns_and_takes_latest() {
        let mut map = LazyRouteMap::new();
        map.insert("./a#AModule".to_string(), "/src/old.ts".to_string());
        let mut discovered = IndexMap::new();
        discovered.insert("./a#AModule".to_string(), "/src/new.ts".to_string());

        let warnings = process_lazy_routes(&mut map, &discovered, CompilationMode::Jit);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("full build"));
        assert_eq!(map.get("./a#AModule").map(String::as_str), Some("/src/new.ts"));
    }

    #[test]
    fn entries_are_never_removed() {
        let mut map = LazyRouteMap::new();
        map.insert("./gone#GoneModule".to_string(), "/src/gone.ts".to_string());
        let discovered = IndexMap::new();
        process_lazy_routes(&mut map, &discovered, CompilationMode::Jit);
        assert!(map.contains_key("./gone#GoneModule"));
    }
}
