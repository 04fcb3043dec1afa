// Plugin
//
// The build orchestrator. Owns the augmented host, the program, the
// resource loader and the emit results, and drives one synchronous update
// per bundler compilation: invalidate, rebuild, analyze, check, emit.

use crate::bundler::{Compilation, NestedCompiler, PassthroughNestedCompiler};
use crate::cache::SourceFileCache;
use crate::compiler_host::{
    create_augmented_host, FileDependencyMap, HostOptions, ResourceHost, WebpackResourceHost,
};
use crate::config::read_configuration;
use crate::entry_resolver::{resolve_entry_module, EntryModule};
use crate::error::PluginError;
use crate::file_emitter::{EmitFileResult, FileEmitter};
use crate::lazy_routes::{
    discover_lazy_routes_whole_program, find_lazy_routes_in_files, process_lazy_routes,
    LazyRouteMap, WholeProgramDiscoveryError,
};
use crate::locales::normalize_locale;
use crate::logging::Logger;
use crate::ngcc_processor::NgccProcessor;
use crate::paths::{denormalize_path, normalize_path};
use crate::program::{CompilationMode, NgProgram, ProgramVariant, TsProgram};
use crate::resource_loader::WebpackResourceLoader;
use crate::transformers::{transforms_for, Platform, TransformContext};
use crate::type_checker::{ForkedTypeChecker, TypeCheckerMessage};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use ts::{
    format_diagnostics, has_errors, CompilerHost, CompilerOptions, Diagnostic,
    DiagnosticCategory, Program,
};

const ROUTER_PACKAGE: &str = "@angular/router";

pub struct AngularCompilerPluginOptions {
    pub tsconfig_path: String,
    /// Entry module override as `path#ClassName`; resolved from the main
    /// file's bootstrap call when absent.
    pub entry_module: Option<String>,
    pub main_path: Option<String>,
    /// Skip ahead-of-time code generation and build in JIT mode.
    pub skip_code_generation: bool,
    pub platform: Platform,
    pub host_replacement_paths: HashMap<String, String>,
    /// Identifier to replacement text, applied as whole-word substitutions.
    pub substitutions: HashMap<String, String>,
    pub direct_template_loading: bool,
    pub fork_type_checker: bool,
    /// Worker binary path for the forked checker.
    pub type_checker_worker_path: Option<String>,
    pub discover_lazy_routes: bool,
    /// Route token to module path entries merged into every discovery pass,
    /// for modules loaded through means the scanners cannot see.
    pub additional_lazy_modules: HashMap<String, String>,
    /// Derive chunk names from route tokens instead of numeric ids.
    pub named_chunks: bool,
    pub ngcc_binary: Option<String>,
    pub watch_mode: bool,
    pub locale: Option<String>,
}

impl Default for AngularCompilerPluginOptions {
    fn default() -> Self {
        Self {
            tsconfig_path: "tsconfig.json".to_string(),
            entry_module: None,
            main_path: None,
            skip_code_generation: false,
            platform: Platform::Browser,
            host_replacement_paths: HashMap::new(),
            substitutions: HashMap::new(),
            direct_template_loading: false,
            fork_type_checker: false,
            type_checker_worker_path: None,
            discover_lazy_routes: true,
            additional_lazy_modules: HashMap::new(),
            named_chunks: true,
            ngcc_binary: None,
            watch_mode: false,
            locale: None,
        }
    }
}

pub struct AngularCompilerPlugin {
    options: AngularCompilerPluginOptions,
    mode: CompilationMode,
    base_path: String,
    compiler_options: CompilerOptions,
    config_root_names: Vec<String>,
    main_path: Option<String>,
    normalized_locale: Option<String>,

    base_host: Rc<dyn CompilerHost>,
    host: Rc<dyn CompilerHost>,
    ngcc: Option<Rc<NgccProcessor>>,
    resource_host: Rc<WebpackResourceHost>,
    resource_loader: Rc<RefCell<WebpackResourceLoader>>,
    source_cache: Rc<RefCell<SourceFileCache>>,
    dependencies: Rc<RefCell<FileDependencyMap>>,

    program: Option<ProgramVariant>,
    entry_module: Option<EntryModule>,
    lazy_routes: LazyRouteMap,
    lazy_route_files: HashSet<String>,
    file_emitter: FileEmitter,
    forked_checker: Option<ForkedTypeChecker>,

    /// Files changed since the last successful emit.
    changed_files: HashSet<String>,
    last_build_time: Option<u64>,
    first_run: bool,
    emit_skipped: bool,
    pending_warnings: Vec<String>,

    logger: Rc<dyn Logger>,
}

fn is_source_file(file: &str) -> bool {
    (file.ends_with(".ts") || file.ends_with(".tsx")) && !file.ends_with(".d.ts")
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl AngularCompilerPlugin {
    pub fn new(
        options: AngularCompilerPluginOptions,
        base_host: Rc<dyn CompilerHost>,
        logger: Rc<dyn Logger>,
    ) -> Result<Self, PluginError> {
        let config = read_configuration(base_host.as_ref(), &options.tsconfig_path);
        if config.has_errors() {
            return Err(PluginError::Configuration(format_diagnostics(
                &config.errors,
            )));
        }

        let mut pending_warnings = Vec::new();
        let raw_locale = options
            .locale
            .clone()
            .or_else(|| config.options.locale.clone());
        let normalized_locale = match raw_locale {
            Some(raw) => {
                let normalized = normalize_locale(&raw);
                if normalized.is_none() && !raw.eq_ignore_ascii_case("en-us") {
                    pending_warnings.push(format!(
                        "Locale data for '{}' cannot be found. No locale data will be included for this locale.",
                        raw
                    ));
                }
                normalized
            }
            None => None,
        };

        let mode = if options.skip_code_generation {
            CompilationMode::Jit
        } else {
            CompilationMode::Aot
        };

        let ngcc = options.ngcc_binary.as_ref().map(|binary| {
            Rc::new(NgccProcessor::new(
                Some(binary.clone()),
                config.base_path.clone(),
                config.project.clone(),
            ))
        });
        if let Some(processor) = &ngcc {
            processor.process()?;
        }

        let source_cache = Rc::new(RefCell::new(SourceFileCache::new()));
        let dependencies = Rc::new(RefCell::new(FileDependencyMap::new()));
        let host = create_augmented_host(
            base_host.clone(),
            HostOptions {
                replacements: options.host_replacement_paths.clone(),
                substitutions: options.substitutions.clone(),
                ngcc: ngcc.clone(),
            },
            source_cache.clone(),
            dependencies.clone(),
        );
        let resource_loader = Rc::new(RefCell::new(WebpackResourceLoader::new()));
        let resource_host = Rc::new(WebpackResourceHost::new(
            host.clone(),
            resource_loader.clone(),
            options.direct_template_loading,
        ));

        let forked_checker = if options.fork_type_checker {
            match &options.type_checker_worker_path {
                Some(worker_path) => match ForkedTypeChecker::spawn(worker_path, &[]) {
                    Ok(checker) => Some(checker),
                    Err(error) => {
                        pending_warnings.push(format!(
                            "Could not start the forked type checker ({}). Type checking will run on the main thread.",
                            error
                        ));
                        None
                    }
                },
                None => {
                    pending_warnings.push(
                        "forkTypeChecker is enabled but no worker binary is configured. Type checking will run on the main thread."
                            .to_string(),
                    );
                    None
                }
            }
        } else {
            None
        };

        let entry_module = options
            .entry_module
            .as_deref()
            .and_then(EntryModule::parse);
        let main_path = options.main_path.as_ref().map(|p| normalize_path(p));
        let watch_mode = options.watch_mode;

        Ok(Self {
            options,
            mode,
            base_path: config.base_path,
            compiler_options: config.options,
            config_root_names: config.root_names,
            main_path,
            normalized_locale,
            base_host,
            host,
            ngcc,
            resource_host,
            resource_loader,
            source_cache,
            dependencies,
            program: None,
            entry_module,
            lazy_routes: LazyRouteMap::new(),
            lazy_route_files: HashSet::new(),
            file_emitter: FileEmitter::new(watch_mode),
            forked_checker,
            changed_files: HashSet::new(),
            last_build_time: None,
            first_run: true,
            emit_skipped: false,
            pending_warnings,
            logger,
        })
    }

    pub fn entry_module(&self) -> Option<&EntryModule> {
        self.entry_module.as_ref()
    }

    pub fn lazy_routes(&self) -> &LazyRouteMap {
        &self.lazy_routes
    }

    /// Chunk name for a lazy route token, derived from the module file name.
    /// `None` when named chunks are disabled or the route is unknown.
    pub fn lazy_chunk_name(&self, route: &str) -> Option<String> {
        if !self.options.named_chunks || !self.lazy_routes.contains_key(route) {
            return None;
        }
        let module = route.split('#').next().unwrap_or(route);
        let name = module.rsplit('/').next().unwrap_or(module);
        Some(name.to_string())
    }

    pub fn emit_skipped(&self) -> bool {
        self.emit_skipped
    }

    /// Attach to a compilation and run one build update. Exactly one plugin
    /// may drive a given compilation.
    pub fn on_build_start(&mut self, compilation: &mut Compilation) -> Result<(), PluginError> {
        if compilation.plugin_attached {
            return Err(PluginError::AlreadyCompiling);
        }
        compilation.plugin_attached = true;
        let result = self.update(compilation);
        self.register_file_dependencies(compilation);
        result
    }

    pub fn on_build_end(&mut self, compilation: &mut Compilation) {
        compilation.plugin_attached = false;
    }

    fn update(&mut self, compilation: &mut Compilation) -> Result<(), PluginError> {
        compilation.warnings.append(&mut self.pending_warnings);

        // 1. Invalidate caches from watcher timestamps.
        let changed = self
            .source_cache
            .borrow_mut()
            .invalidate(&compilation.file_timestamps, self.last_build_time);
        self.last_build_time = Some(current_millis());
        {
            let mut dependencies = self.dependencies.borrow_mut();
            for file in &changed {
                dependencies.clear_file(file);
            }
        }
        self.changed_files.extend(changed.iter().cloned());

        let changed_resources: HashSet<String> = self
            .changed_files
            .iter()
            .filter(|f| !f.ends_with(".ts") && !f.ends_with(".tsx"))
            .cloned()
            .collect();
        self.resource_host
            .set_modified_resource_files(changed_resources.clone());
        if !changed_resources.is_empty() {
            // A resource edit changes its owners' verdicts without touching
            // their source text.
            if let Some(ng) = self.program.as_ref().and_then(|p| p.as_aot()) {
                let affected = ng.files_affected_by_resources(&changed_resources);
                self.source_cache
                    .borrow_mut()
                    .invalidate_diagnostics(affected.iter().map(String::as_str));
            }
        }

        // 2. Rebind the resource loader to this compilation.
        let nested: Box<dyn NestedCompiler> =
            Box::new(PassthroughNestedCompiler::new(self.base_host.clone()));
        self.resource_loader.borrow_mut().update(
            nested,
            if self.first_run { None } else { Some(&changed) },
        );

        // 3. Nothing changed: every prior result stands.
        if !self.first_run && self.changed_files.is_empty() && self.program.is_some() {
            self.logger.debug("Nothing changed; reusing previous build.");
            return Ok(());
        }

        // 4. Root names: the configuration plus every known lazy module.
        let root_names = self.current_root_names();

        // 5. Keep the forked checker in step, fire-and-forget.
        self.push_to_forked_checker(&root_names, compilation);

        // 6. Create the program for this build.
        self.create_program(&root_names)?;

        // 7. Entry module, resolved once per process.
        if self.entry_module.is_none()
            && (self.mode == CompilationMode::Aot || self.normalized_locale.is_some())
        {
            if let Some(main) = self.main_path.clone() {
                match resolve_entry_module(self.host.as_ref(), &main) {
                    Ok(entry) => self.entry_module = Some(entry),
                    Err(error) => compilation.errors.push(error.to_string()),
                }
            }
        }

        // 8. Lazy route discovery and merge.
        if self.options.discover_lazy_routes {
            let mut discovered = self.discover_lazy_routes()?;
            for (route, path) in &self.options.additional_lazy_modules {
                discovered.insert(route.clone(), normalize_path(path));
            }
            let mut new_files = false;
            for path in discovered.values() {
                if is_source_file(path) && self.lazy_route_files.insert(path.clone()) {
                    new_files = true;
                }
            }
            let warnings = process_lazy_routes(&mut self.lazy_routes, &discovered, self.mode);
            compilation.warnings.extend(warnings);
            if new_files {
                // Newly discovered modules become program roots.
                let root_names = self.current_root_names();
                self.create_program(&root_names)?;
            }
        }

        // Failures recorded by on-demand linking during resolution are
        // fatal, like a failed whole-tree link at setup.
        if let Some(ngcc) = &self.ngcc {
            if let Some(error) = ngcc.take_error() {
                return Err(error);
            }
        }

        // 9. Install this build's emit transforms.
        let transforms = {
            let ctx = TransformContext {
                mode: self.mode,
                platform: self.options.platform,
                main_path: self.main_path.as_deref(),
                entry_module: self.entry_module.as_ref(),
                lazy_routes: &self.lazy_routes,
                locale: self.normalized_locale.as_deref(),
            };
            transforms_for(&ctx)
        };
        if let Some(program) = self.program.as_mut() {
            program.set_transforms(transforms);
        }

        // 10. Diagnostics. Semantic results come from the forked checker
        // when one is alive, except on the first run where the main thread
        // always checks.
        let diagnostics = self.gather_diagnostics();
        let build_has_errors = has_errors(&diagnostics);
        for diagnostic in &diagnostics {
            let formatted = format_diagnostics(std::slice::from_ref(diagnostic))
                .trim_end()
                .to_string();
            match diagnostic.category {
                DiagnosticCategory::Error => compilation.errors.push(formatted),
                _ => compilation.warnings.push(formatted),
            }
        }

        // 11. Emit, gated on error diagnostics. At most one emit per build.
        if build_has_errors {
            self.emit_skipped = true;
        } else {
            self.emit(&changed_resources, compilation);
        }
        self.first_run = false;
        Ok(())
    }

    fn current_root_names(&self) -> Vec<String> {
        let mut root_names = self.config_root_names.clone();
        // Route entries are never removed from the map; a module that moved
        // away would otherwise poison the program as a missing root.
        let mut extra: Vec<String> = self
            .lazy_route_files
            .iter()
            .filter(|f| !root_names.contains(f) && self.host.file_exists(f))
            .cloned()
            .collect();
        extra.sort();
        root_names.extend(extra);
        root_names
    }

    /// One message per build: `Init` on the first run (the main thread
    /// checks that build itself), `Update` on every run after it.
    fn checker_message(&self, root_names: &[String]) -> TypeCheckerMessage {
        if self.first_run {
            TypeCheckerMessage::Init {
                compiler_options: self.compiler_options.clone(),
                base_path: self.base_path.clone(),
                jit_mode: self.mode == CompilationMode::Jit,
                root_names: root_names.to_vec(),
            }
        } else {
            let mut changed_compilation_files: Vec<String> =
                self.changed_files.iter().cloned().collect();
            changed_compilation_files.sort();
            TypeCheckerMessage::Update {
                root_names: root_names.to_vec(),
                changed_compilation_files,
            }
        }
    }

    fn push_to_forked_checker(&mut self, root_names: &[String], compilation: &mut Compilation) {
        if self.forked_checker.is_none() {
            return;
        }
        let message = self.checker_message(root_names);
        let Some(checker) = self.forked_checker.as_mut() else {
            return;
        };
        checker.send(&message);
        if checker.take_unexpected_exit() {
            compilation.warnings.push(
                "The forked type checker exited unexpectedly. Falling back to type checking on the main thread."
                    .to_string(),
            );
        }
    }

    fn create_program(&mut self, root_names: &[String]) -> Result<(), PluginError> {
        let core = TsProgram::new(root_names, self.compiler_options.clone(), &self.host);
        let program = match self.mode {
            CompilationMode::Jit => ProgramVariant::Jit(core),
            CompilationMode::Aot => {
                let ng = NgProgram::new(core);
                ng.load_ng_structure(self.resource_host.as_ref() as &dyn ResourceHost);
                ProgramVariant::Aot(ng)
            }
        };
        self.program = Some(program);
        Ok(())
    }

    fn discover_lazy_routes(&mut self) -> Result<IndexMap<String, String>, PluginError> {
        if self.first_run {
            match self.program.as_ref().and_then(|p| p.as_aot()) {
                Some(ng) => ng.list_lazy_routes(),
                None => match discover_lazy_routes_whole_program(
                    self.host.as_ref(),
                    &self.current_root_names(),
                    ROUTER_PACKAGE,
                ) {
                    Ok(discovered) => Ok(discovered),
                    Err(WholeProgramDiscoveryError::RouterPackageNotFound) => {
                        // No router, no routes.
                        Ok(IndexMap::new())
                    }
                },
            }
        } else {
            let mut changed_scripts: Vec<String> = self
                .changed_files
                .iter()
                .filter(|f| is_source_file(f))
                .cloned()
                .collect();
            changed_scripts.sort();
            Ok(find_lazy_routes_in_files(
                self.host.as_ref(),
                &changed_scripts,
            ))
        }
    }

    fn gather_diagnostics(&self) -> Vec<Diagnostic> {
        let Some(variant) = self.program.as_ref() else {
            return Vec::new();
        };
        let program = variant.as_program();
        let mut diagnostics = program.get_options_diagnostics();
        diagnostics.extend(program.get_syntactic_diagnostics());
        let fork_alive = self
            .forked_checker
            .as_ref()
            .map(|c| !c.is_broken())
            .unwrap_or(false);
        if self.first_run || !fork_alive {
            let semantic = program.get_semantic_diagnostics();
            self.record_file_verdicts(variant, &semantic);
            diagnostics.extend(semantic);
        } else {
            // The fork covers fresh checking; cached verdicts for files that
            // did not change keep gating emit in the meantime.
            let cache = self.source_cache.borrow();
            for file in variant.core().file_names() {
                if let Some(cached) = cache.get_file_diagnostics(&file) {
                    diagnostics.extend(cached.iter().cloned());
                }
            }
        }
        diagnostics
    }

    /// Store each program file's semantic verdict in the cache side-table.
    /// An empty entry marks a file known clean; invalidation removes the
    /// entry entirely.
    fn record_file_verdicts(&self, variant: &ProgramVariant, semantic: &[Diagnostic]) {
        let mut by_file: HashMap<String, Vec<Diagnostic>> = HashMap::new();
        for diagnostic in semantic {
            if let Some(file) = &diagnostic.file {
                by_file
                    .entry(file.clone())
                    .or_default()
                    .push(diagnostic.clone());
            }
        }
        let mut cache = self.source_cache.borrow_mut();
        for file in variant.core().file_names() {
            let verdict = by_file.remove(&file).unwrap_or_default();
            cache.set_file_diagnostics(file, verdict);
        }
    }

    fn emit(&mut self, changed_resources: &HashSet<String>, compilation: &mut Compilation) {
        let to_emit: Vec<String> = {
            let Some(program) = self.program.as_ref() else {
                return;
            };
            let core = program.core();
            if self.first_run {
                core.file_names()
                    .into_iter()
                    .filter(|f| !f.ends_with(".d.ts"))
                    .collect()
            } else {
                let mut set: HashSet<String> = self
                    .changed_files
                    .iter()
                    .filter(|f| is_source_file(f) && core.has_file(f))
                    .cloned()
                    .collect();
                if let Some(ng) = program.as_aot() {
                    // Files whose component resources changed must re-emit
                    // even though their own text did not.
                    set.extend(ng.files_affected_by_resources(changed_resources));
                }
                // Files new to the program have no previous result to serve.
                for file in core.file_names() {
                    if !file.ends_with(".d.ts") && self.file_emitter.get(&file).is_none() {
                        set.insert(file);
                    }
                }
                let mut files: Vec<String> = set.into_iter().collect();
                files.sort();
                files
            }
        };

        let emitted: Vec<(String, Option<ts::EmittedFile>)> = {
            let Some(program) = self.program.as_ref() else {
                return;
            };
            let core = program.core();
            to_emit
                .par_iter()
                .map(|file| (file.clone(), core.emit_file(file)))
                .collect()
        };

        let mut internal_error = false;
        for (file, result) in emitted {
            match result {
                Some(output) => {
                    let dependencies = self.get_dependencies(&file);
                    if self.file_emitter.output_changed(&file, &output.output_text) {
                        self.logger.debug(&format!("Emitted {}.", file));
                    }
                    self.file_emitter.insert(
                        &file,
                        EmitFileResult::new(output.output_text, output.source_map, dependencies),
                    );
                }
                None => {
                    internal_error = true;
                    compilation
                        .errors
                        .push(format!("Internal error: could not emit {}.", file));
                }
            }
        }

        if internal_error {
            // Unrecognized emit failure: discard the program so the next
            // build starts from a clean slate.
            self.program = None;
            self.emit_skipped = true;
        } else {
            self.emit_skipped = false;
            self.changed_files.clear();
        }
    }

    /// Compiled output for a program file, as served to the loader. While
    /// emit is skipped, a previously emitted result is served stale; a file
    /// with no result yet gets empty content whose dependencies are the
    /// files still awaiting a clean build.
    pub fn get_compiled_file(&self, file_name: &str) -> Result<EmitFileResult, PluginError> {
        let key = normalize_path(file_name);
        if let Some(result) = self.file_emitter.get(&key) {
            return Ok(result.clone());
        }
        if self.emit_skipped {
            let mut error_dependencies: Vec<String> =
                self.changed_files.iter().map(|f| denormalize_path(f)).collect();
            error_dependencies.sort();
            return Ok(EmitFileResult::new(String::new(), None, error_dependencies));
        }
        Err(PluginError::MissingFromCompilation(key))
    }

    /// Everything a file's output depends on: its resolved imports, its
    /// component resources, and one hop of each resource's own dependencies.
    pub fn get_dependencies(&self, file_name: &str) -> Vec<String> {
        let key = normalize_path(file_name);
        let mut deps = self.dependencies.borrow().get(&key);

        if let Some(ng) = self.program.as_ref().and_then(|p| p.as_aot()) {
            if let Some(analysis) = ng.analysis() {
                if let Some(resources) = analysis.resources_by_file.get(&key) {
                    let loader = self.resource_loader.borrow();
                    for resource in resources {
                        deps.insert(resource.clone());
                        for resource_dep in loader.get_resource_dependencies(resource) {
                            deps.insert(resource_dep);
                        }
                    }
                }
            }
        }

        let mut out: Vec<String> = deps.iter().map(|d| denormalize_path(d)).collect();
        out.sort();
        out.dedup();
        out
    }

    fn register_file_dependencies(&self, compilation: &mut Compilation) {
        if let Some(program) = self.program.as_ref() {
            for file in program.core().file_names() {
                compilation.file_dependencies.insert(denormalize_path(&file));
            }
            if let Some(analysis) = program.as_aot().and_then(|ng| ng.analysis()) {
                let loader = self.resource_loader.borrow();
                for resources in analysis.resources_by_file.values() {
                    for resource in resources {
                        compilation
                            .file_dependencies
                            .insert(denormalize_path(resource));
                        for dep in loader.get_resource_dependencies(resource) {
                            compilation.file_dependencies.insert(denormalize_path(&dep));
                        }
                    }
                }
            }
        }
        compilation
            .file_dependencies
            .insert(denormalize_path(&normalize_path(&self.options.tsconfig_path)));
    }
}
