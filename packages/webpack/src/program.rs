// Program
//
// Concrete program implementations over the augmented host: the module
// graph walked from the root names, plus the ahead-of-time variant that
// analyzes component resources and lazy routes exactly once per program.

use crate::compiler_host::ResourceHost;
use crate::error::PluginError;
use crate::lazy_routes::scan_source_for_lazy_routes;
use crate::paths::normalize_path;
use crate::transformers::{apply_transforms, Transform};
use indexmap::IndexMap;
use once_cell::sync::{Lazy, OnceCell};
use oxc_allocator::Allocator;
use oxc_ast::ast::Statement;
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use ts::{
    syntactic_diagnostics, transpile_module, CompilerHost, CompilerOptions, Diagnostic, EmittedFile,
    Program, SourceFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationMode {
    Jit,
    Aot,
}

/// Module specifiers of all static import and re-export statements, in
/// source order without duplicates.
pub fn scan_module_specifiers(file_name: &str, text: &str) -> Vec<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(Path::new(file_name)).unwrap_or_default();
    let parsed = Parser::new(&allocator, text, source_type).parse();

    let mut seen = HashSet::new();
    let mut specifiers = Vec::new();
    for statement in &parsed.program.body {
        let specifier = match statement {
            Statement::ImportDeclaration(decl) => Some(decl.source.value.as_str()),
            Statement::ExportNamedDeclaration(decl) => {
                decl.source.as_ref().map(|s| s.value.as_str())
            }
            Statement::ExportAllDeclaration(decl) => Some(decl.source.value.as_str()),
            _ => None,
        };
        if let Some(specifier) = specifier {
            if seen.insert(specifier.to_string()) {
                specifiers.push(specifier.to_string());
            }
        }
    }
    specifiers
}

fn is_script(path: &str) -> bool {
    path.ends_with(".ts") || path.ends_with(".tsx")
}

/// The module graph reachable from the root names. Construction walks the
/// graph through the host once; afterwards the program is a pure snapshot,
/// safe to read from worker threads during bulk emit.
pub struct TsProgram {
    root_names: Vec<String>,
    options: CompilerOptions,
    files: IndexMap<String, Arc<SourceFile>>,
    semantic: Vec<Diagnostic>,
    transforms: Vec<Arc<dyn Transform>>,
}

impl TsProgram {
    pub fn new(
        root_names: &[String],
        options: CompilerOptions,
        host: &Rc<dyn CompilerHost>,
    ) -> Self {
        let root_names: Vec<String> = root_names.iter().map(|r| normalize_path(r)).collect();
        let mut files: IndexMap<String, Arc<SourceFile>> = IndexMap::new();
        let mut semantic = Vec::new();
        let mut queue: Vec<String> = root_names.clone();

        while let Some(file_name) = queue.pop() {
            if files.contains_key(&file_name) {
                continue;
            }
            let Some(source) = host.get_source_file(&file_name, false) else {
                semantic.push(
                    Diagnostic::error(6053, format!("File '{}' not found.", file_name))
                        .with_file(file_name.clone()),
                );
                continue;
            };
            let text = source.text().to_string();
            files.insert(file_name.clone(), source);

            for specifier in scan_module_specifiers(&file_name, &text) {
                match host.resolve_module_name(&specifier, &file_name) {
                    Some(resolved) => {
                        let resolved = normalize_path(&resolved.resolved_file_name);
                        if is_script(&resolved) || resolved.ends_with(".d.ts") {
                            queue.push(resolved);
                        }
                    }
                    None if specifier.starts_with('.') => {
                        semantic.push(
                            Diagnostic::error(
                                2307,
                                format!("Cannot find module '{}'.", specifier),
                            )
                            .with_file(file_name.clone()),
                        );
                    }
                    // Unresolvable bare specifiers are ambient; the real
                    // type system decides, not the graph walk.
                    None => {}
                }
            }
        }

        Self {
            root_names,
            options,
            files,
            semantic,
            transforms: Vec::new(),
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn set_transforms(&mut self, transforms: Vec<Arc<dyn Transform>>) {
        self.transforms = transforms;
    }

    pub fn has_file(&self, file_name: &str) -> bool {
        self.files.contains_key(&normalize_path(file_name))
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

impl Program for TsProgram {
    fn get_root_file_names(&self) -> Vec<String> {
        self.root_names.clone()
    }

    fn get_source_files(&self) -> Vec<Arc<SourceFile>> {
        self.files.values().cloned().collect()
    }

    fn get_source_file(&self, file_name: &str) -> Option<Arc<SourceFile>> {
        self.files.get(&normalize_path(file_name)).cloned()
    }

    fn get_options_diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.options.source_map && self.options.inline_source_map {
            diagnostics.push(Diagnostic::error(
                5053,
                "Option 'sourceMap' cannot be specified with option 'inlineSourceMap'.",
            ));
        }
        diagnostics
    }

    fn get_syntactic_diagnostics(&self) -> Vec<Diagnostic> {
        self.files
            .iter()
            .filter(|(name, _)| !name.ends_with(".d.ts") && !name.contains("/node_modules/"))
            .flat_map(|(name, file)| syntactic_diagnostics(name, file.text()))
            .collect()
    }

    fn get_semantic_diagnostics(&self) -> Vec<Diagnostic> {
        self.semantic.clone()
    }

    fn emit_file(&self, file_name: &str) -> Option<EmittedFile> {
        let key = normalize_path(file_name);
        let source = self.files.get(&key)?;
        if key.ends_with(".d.ts") {
            // Declaration files produce no output.
            return Some(EmittedFile {
                output_text: String::new(),
                source_map: None,
            });
        }
        let transformed = apply_transforms(&self.transforms, &key, source.text());
        Some(transpile_module(&key, &transformed, &self.options))
    }
}

static TEMPLATE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"templateUrl\s*:\s*['"]([^'"]+)['"]"#).expect("static regex"));

static STYLE_URLS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"styleUrls\s*:\s*\[([^\]]*)\]").expect("static regex"));

static INLINE_STYLES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"styles\s*:\s*\[([^\]]*)\]").expect("static regex"));

static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"`]([^'"`]+)['"`]"#).expect("static regex"));

/// Result of the one-time structural analysis of an ahead-of-time program.
pub struct NgAnalysis {
    /// Source file to the resource files its components reference.
    pub resources_by_file: IndexMap<String, Vec<String>>,
    /// Raw lazy-route listing before uniqueness reduction.
    pub lazy_route_listing: Vec<(String, String)>,
    /// Diagnostics produced while loading resources.
    pub diagnostics: Vec<Diagnostic>,
}

/// Ahead-of-time program: the module graph plus a structural analysis that
/// runs at most once for the lifetime of the program. Rebuilds that need a
/// fresh analysis create a fresh program.
pub struct NgProgram {
    core: TsProgram,
    analysis: OnceCell<NgAnalysis>,
}

impl NgProgram {
    pub fn new(core: TsProgram) -> Self {
        Self {
            core,
            analysis: OnceCell::new(),
        }
    }

    pub fn core(&self) -> &TsProgram {
        &self.core
    }

    pub fn set_transforms(&mut self, transforms: Vec<Arc<dyn Transform>>) {
        self.core.set_transforms(transforms);
    }

    /// Analyze component resources and lazy routes. The first call performs
    /// the analysis through the resource host; every later call returns the
    /// memoized result untouched.
    pub fn load_ng_structure(&self, resource_host: &dyn ResourceHost) -> &NgAnalysis {
        self.analysis.get_or_init(|| {
            let mut resources_by_file = IndexMap::new();
            let mut lazy_route_listing = Vec::new();
            let mut diagnostics = Vec::new();

            for (file_name, source) in &self.core.files {
                let text = source.text();
                let mut resources = Vec::new();

                // Declaration files carry no resources, but libraries do
                // declare lazy routes, so the route scan below still runs
                // for them.
                if !file_name.ends_with(".d.ts") {
                    for captures in TEMPLATE_URL_RE.captures_iter(text) {
                        let resolved =
                            resource_host.resource_name_to_file_name(&captures[1], file_name);
                        match resource_host.read_resource(&resolved) {
                            Ok(_) => resources.push(resolved),
                            Err(message) => diagnostics.push(
                                Diagnostic::error(99001, message).with_file(file_name.clone()),
                            ),
                        }
                    }
                    for captures in STYLE_URLS_RE.captures_iter(text) {
                        for literal in STRING_LITERAL_RE.captures_iter(&captures[1]) {
                            let resolved =
                                resource_host.resource_name_to_file_name(&literal[1], file_name);
                            match resource_host.read_resource(&resolved) {
                                Ok(_) => resources.push(resolved),
                                Err(message) => diagnostics.push(
                                    Diagnostic::error(99001, message).with_file(file_name.clone()),
                                ),
                            }
                        }
                    }
                    if !text.contains("styleUrls") {
                        for captures in INLINE_STYLES_RE.captures_iter(text) {
                            for literal in STRING_LITERAL_RE.captures_iter(&captures[1]) {
                                if let Err(message) =
                                    resource_host.transform_resource(&literal[1], "text/css")
                                {
                                    diagnostics.push(
                                        Diagnostic::error(99002, message)
                                            .with_file(file_name.clone()),
                                    );
                                }
                            }
                        }
                    }
                }

                for token in scan_source_for_lazy_routes(text) {
                    let module_part = token.split('#').next().unwrap_or("");
                    if module_part.is_empty() {
                        continue;
                    }
                    if let Some(resolved) =
                        resource_host.resolve_module_name(module_part, file_name)
                    {
                        lazy_route_listing.push((
                            token,
                            normalize_path(&resolved.resolved_file_name),
                        ));
                    }
                }

                if !resources.is_empty() {
                    resources_by_file.insert(file_name.clone(), resources);
                }
            }

            NgAnalysis {
                resources_by_file,
                lazy_route_listing,
                diagnostics,
            }
        })
    }

    pub fn analysis(&self) -> Option<&NgAnalysis> {
        self.analysis.get()
    }

    /// Program-native lazy-route listing with strict uniqueness.
    pub fn list_lazy_routes(&self) -> Result<IndexMap<String, String>, PluginError> {
        match self.analysis.get() {
            Some(analysis) => crate::lazy_routes::reduce_program_listing(&analysis.lazy_route_listing),
            None => Ok(IndexMap::new()),
        }
    }

    /// Source files whose components reference any of the given resource
    /// files, so their previous emit can no longer be reused.
    pub fn files_affected_by_resources(&self, resources: &HashSet<String>) -> Vec<String> {
        let Some(analysis) = self.analysis.get() else {
            return Vec::new();
        };
        analysis
            .resources_by_file
            .iter()
            .filter(|(_, file_resources)| {
                file_resources
                    .iter()
                    .any(|r| resources.contains(&normalize_path(r)))
            })
            .map(|(file, _)| file.clone())
            .collect()
    }
}

impl Program for NgProgram {
    fn get_root_file_names(&self) -> Vec<String> {
        self.core.get_root_file_names()
    }
    fn get_source_files(&self) -> Vec<Arc<SourceFile>> {
        self.core.get_source_files()
    }
    fn get_source_file(&self, file_name: &str) -> Option<Arc<SourceFile>> {
        self.core.get_source_file(file_name)
    }
    fn get_options_diagnostics(&self) -> Vec<Diagnostic> {
        self.core.get_options_diagnostics()
    }
    fn get_syntactic_diagnostics(&self) -> Vec<Diagnostic> {
        self.core.get_syntactic_diagnostics()
    }
    fn get_semantic_diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.core.get_semantic_diagnostics();
        if let Some(analysis) = self.analysis.get() {
            diagnostics.extend(analysis.diagnostics.iter().cloned());
        }
        diagnostics
    }
    fn emit_file(&self, file_name: &str) -> Option<EmittedFile> {
        self.core.emit_file(file_name)
    }
}

/// The program a build runs against, by compilation mode.
pub enum ProgramVariant {
    Jit(TsProgram),
    Aot(NgProgram),
}

impl ProgramVariant {
    pub fn as_program(&self) -> &dyn Program {
        match self {
            ProgramVariant::Jit(p) => p,
            ProgramVariant::Aot(p) => p,
        }
    }

    pub fn core(&self) -> &TsProgram {
        match self {
            ProgramVariant::Jit(p) => p,
            ProgramVariant::Aot(p) => p.core(),
        }
    }

    pub fn set_transforms(&mut self, transforms: Vec<Arc<dyn Transform>>) {
        match self {
            ProgramVariant::Jit(p) => p.set_transforms(transforms),
            ProgramVariant::Aot(p) => p.set_transforms(transforms),
        }
    }

    pub fn as_aot(&self) -> Option<&NgProgram> {
        match self {
            ProgramVariant::Aot(p) => Some(p),
            ProgramVariant::Jit(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler_host::WebpackResourceHost;
    use crate::resource_loader::WebpackResourceLoader;
    use std::cell::RefCell;
    use ts::InMemoryCompilerHost;

    fn program_host() -> Rc<InMemoryCompilerHost> {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/main.ts",
            "import { AppModule } from './app.module';\nbootstrap(AppModule);\n",
        );
        host.add_file(
            "/src/app.module.ts",
            "import { helper } from './helper';\nexport class AppModule {}\n",
        );
        host.add_file("/src/helper.ts", "export const helper = 1;\n");
        host
    }

    fn build(host: &Rc<InMemoryCompilerHost>) -> TsProgram {
        let dyn_host: Rc<dyn CompilerHost> = host.clone();
        TsProgram::new(
            &["/src/main.ts".to_string()],
            CompilerOptions::default(),
            &dyn_host,
        )
    }

    #[test]
    fn scans_import_and_reexport_specifiers() {
        let text = r#"
            import { A } from './a';
            import './side-effect';
            export { B } from './b';
            export * from './c';
            export const local = 1;
        "#;
        assert_eq!(
            scan_module_specifiers("/src/x.ts", text),
            vec!["./a", "./side-effect", "./b", "./c"]
        );
    }

    #[test]
    fn walks_the_import_closure_from_roots() {
        let host = program_host();
        let program = build(&host);
        assert!(program.has_file("/src/main.ts"));
        assert!(program.has_file("/src/app.module.ts"));
        assert!(program.has_file("/src/helper.ts"));
        assert_eq!(program.get_source_files().len(), 3);
    }

    #[test]
    fn unresolved_relative_import_is_a_semantic_error() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "import { X } from './missing';\n");
        let program = build(&host);
        let semantic = program.get_semantic_diagnostics();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].code, 2307);
        assert!(semantic[0].message.contains("./missing"));
    }

    #[test]
    fn unresolved_bare_specifier_is_tolerated() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "import { of } from 'rxjs';\n");
        let program = build(&host);
        assert!(program.get_semantic_diagnostics().is_empty());
    }

    #[test]
    fn missing_root_is_reported_not_panicked() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        let dyn_host: Rc<dyn CompilerHost> = host.clone();
        let program = TsProgram::new(
            &["/src/main.ts".to_string()],
            CompilerOptions::default(),
            &dyn_host,
        );
        let semantic = program.get_semantic_diagnostics();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].code, 6053);
    }

    #[test]
    fn emit_strips_types_and_returns_none_for_unknown_files() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/main.ts",
            "interface Config { a: number; }\nconst x = 1;\n",
        );
        let program = build(&host);
        let emitted = program.emit_file("/src/main.ts").unwrap();
        assert!(emitted.output_text.contains("const x = 1;"));
        assert!(!emitted.output_text.contains("interface"));
        assert!(program.emit_file("/src/not-in-program.ts").is_none());
    }

    #[test]
    fn emit_applies_installed_transforms() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/app.component.ts",
            "const meta = { templateUrl: './app.component.html' };\n",
        );
        let dyn_host: Rc<dyn CompilerHost> = host.clone();
        let mut program = TsProgram::new(
            &["/src/app.component.ts".to_string()],
            CompilerOptions::default(),
            &dyn_host,
        );
        program.set_transforms(vec![Arc::new(crate::transformers::ReplaceResources)]);
        let emitted = program.emit_file("/src/app.component.ts").unwrap();
        assert!(emitted
            .output_text
            .contains(r#"template: require("./app.component.html")"#));
    }

    fn resource_host(host: Rc<InMemoryCompilerHost>) -> WebpackResourceHost {
        let loader = Rc::new(RefCell::new(WebpackResourceLoader::new()));
        loader.borrow_mut().update(
            Box::new(crate::bundler::PassthroughNestedCompiler::new(host.clone())),
            None,
        );
        WebpackResourceHost::new(host, loader, false)
    }

    #[test]
    fn ng_analysis_records_component_resources() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/app.component.ts",
            "@Component({ templateUrl: './app.component.html', styleUrls: ['./app.component.css'] })\nexport class AppComponent {}\n",
        );
        host.add_file("/src/app.component.html", "<div></div>");
        host.add_file("/src/app.component.css", "div {}");
        let program = NgProgram::new(build_roots(&host, &["/src/app.component.ts"]));

        let rh = resource_host(host);
        let analysis = program.load_ng_structure(&rh);
        assert!(analysis.diagnostics.is_empty());
        let resources = &analysis.resources_by_file["/src/app.component.ts"];
        assert!(resources.contains(&"/src/app.component.html".to_string()));
        assert!(resources.contains(&"/src/app.component.css".to_string()));
    }

    #[test]
    fn ng_analysis_runs_exactly_once() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/app.component.ts",
            "@Component({ templateUrl: './t.html' })\nclass C {}\n",
        );
        host.add_file("/src/t.html", "a");
        let program = NgProgram::new(build_roots(&host, &["/src/app.component.ts"]));
        let rh = resource_host(host.clone());
        let first = program.load_ng_structure(&rh) as *const NgAnalysis;

        // Even with the resource now missing, the memoized analysis stands.
        host.remove_file("/src/t.html");
        let second = program.load_ng_structure(&rh) as *const NgAnalysis;
        assert_eq!(first, second);
        assert!(program.analysis().unwrap().diagnostics.is_empty());
    }

    #[test]
    fn missing_resource_is_a_diagnostic() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/app.component.ts",
            "@Component({ templateUrl: './missing.html' })\nclass C {}\n",
        );
        let program = NgProgram::new(build_roots(&host, &["/src/app.component.ts"]));
        let rh = resource_host(host);
        let analysis = program.load_ng_structure(&rh);
        assert_eq!(analysis.diagnostics.len(), 1);
        assert!(program
            .get_semantic_diagnostics()
            .iter()
            .any(|d| d.code == 99001));
    }

    #[test]
    fn conflicting_lazy_route_targets_fail_the_program_listing() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        // The same route token resolves to two different files depending on
        // the declaring directory.
        host.add_file(
            "/src/a.routes.ts",
            "const r = [{ loadChildren: './lazy#LazyModule' }];",
        );
        host.add_file(
            "/src/sub/b.routes.ts",
            "const r = [{ loadChildren: './lazy#LazyModule' }];",
        );
        host.add_file("/src/lazy.ts", "export class LazyModule {}");
        host.add_file("/src/sub/lazy.ts", "export class LazyModule {}");
        let program = NgProgram::new(build_roots(
            &host,
            &["/src/a.routes.ts", "/src/sub/b.routes.ts"],
        ));
        let rh = resource_host(host);
        program.load_ng_structure(&rh);
        assert!(matches!(
            program.list_lazy_routes(),
            Err(PluginError::DuplicateLazyRoute { .. })
        ));
    }

    #[test]
    fn unique_lazy_routes_pass_the_program_listing() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/a.routes.ts",
            "const r = [{ loadChildren: './lazy#LazyModule' }];",
        );
        host.add_file("/src/lazy.ts", "export class LazyModule {}");
        let program = NgProgram::new(build_roots(&host, &["/src/a.routes.ts"]));
        let rh = resource_host(host);
        program.load_ng_structure(&rh);
        let routes = program.list_lazy_routes().unwrap();
        assert_eq!(
            routes.get("./lazy#LazyModule").map(String::as_str),
            Some("/src/lazy.ts")
        );
    }

    #[test]
    fn files_affected_by_changed_resources_are_reported() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file(
            "/src/a.component.ts",
            "@Component({ templateUrl: './a.html' })\nclass A {}\n",
        );
        host.add_file(
            "/src/b.component.ts",
            "import './a.component';\n@Component({ templateUrl: './b.html' })\nclass B {}\n",
        );
        host.add_file("/src/a.html", "a");
        host.add_file("/src/b.html", "b");
        let program = NgProgram::new(build_roots(&host, &["/src/b.component.ts"]));
        let rh = resource_host(host);
        program.load_ng_structure(&rh);

        let changed: HashSet<String> = ["/src/a.html".to_string()].into();
        let affected = program.files_affected_by_resources(&changed);
        assert_eq!(affected, vec!["/src/a.component.ts".to_string()]);
    }

    fn build_roots(host: &Rc<InMemoryCompilerHost>, roots: &[&str]) -> TsProgram {
        let dyn_host: Rc<dyn CompilerHost> = host.clone();
        let roots: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
        TsProgram::new(&roots, CompilerOptions::default(), &dyn_host)
    }
}
