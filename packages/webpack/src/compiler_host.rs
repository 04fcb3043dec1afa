// Compiler Host Augmentation
//
// Composable wrappers around the compiler host. Each decorator overrides
// one capability and delegates the rest; the composition order is fixed in
// `create_augmented_host` and nowhere else.

use crate::cache::SourceFileCache;
use crate::ngcc_processor::NgccProcessor;
use crate::paths::normalize_path;
use crate::resource_loader::WebpackResourceLoader;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use ts::{CompilerHost, ResolvedModule, SourceFile};

/// Forward map from a file to the set of files it statically imports or
/// includes as a resource. Built incrementally as module resolution runs.
#[derive(Default)]
pub struct FileDependencyMap {
    map: HashMap<String, HashSet<String>>,
}

impl FileDependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a dependency into a file's existing set; resolution happens
    /// piecemeal over the program's lifetime, so sets are never replaced.
    pub fn add(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.map.entry(from.into()).or_default().insert(to.into());
    }

    pub fn get(&self, file: &str) -> HashSet<String> {
        self.map.get(file).cloned().unwrap_or_default()
    }

    pub fn clear_file(&mut self, file: &str) {
        self.map.remove(file);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Caching decorator: parsed trees come from the shared source-file cache;
/// misses parse through the wrapped host with fresh-parse semantics forced,
/// avoiding nested caching ambiguity.
pub struct CachingHost {
    inner: Rc<dyn CompilerHost>,
    cache: Rc<RefCell<SourceFileCache>>,
}

impl CachingHost {
    pub fn new(inner: Rc<dyn CompilerHost>, cache: Rc<RefCell<SourceFileCache>>) -> Self {
        Self { inner, cache }
    }
}

impl CompilerHost for CachingHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        let key = normalize_path(file_name);
        if !force {
            if let Some(cached) = self.cache.borrow().get(&key) {
                return Some(cached);
            }
        }
        let parsed = self.inner.get_source_file(file_name, true)?;
        self.cache.borrow_mut().insert(key, parsed.clone());
        Some(parsed)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        self.inner.resolve_module_name(module_name, containing)
    }
}

/// Versioning decorator: stamps each parsed file with a content hash if it
/// does not already carry one, as required by program reuse.
pub struct VersioningHost {
    inner: Rc<dyn CompilerHost>,
}

impl VersioningHost {
    pub fn new(inner: Rc<dyn CompilerHost>) -> Self {
        Self { inner }
    }
}

impl CompilerHost for VersioningHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        let file = self.inner.get_source_file(file_name, force)?;
        file.ensure_version();
        Some(file)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        self.inner.resolve_module_name(module_name, containing)
    }
}

/// Dependency-collection decorator: records every successfully resolved
/// module target into the shared dependency map, keyed by the importing
/// file's normalized path.
pub struct DependencyCollectingHost {
    inner: Rc<dyn CompilerHost>,
    dependencies: Rc<RefCell<FileDependencyMap>>,
}

impl DependencyCollectingHost {
    pub fn new(
        inner: Rc<dyn CompilerHost>,
        dependencies: Rc<RefCell<FileDependencyMap>>,
    ) -> Self {
        Self {
            inner,
            dependencies,
        }
    }
}

impl CompilerHost for DependencyCollectingHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        self.inner.get_source_file(file_name, force)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        let resolved = self.inner.resolve_module_name(module_name, containing)?;
        self.dependencies.borrow_mut().add(
            normalize_path(containing),
            normalize_path(&resolved.resolved_file_name),
        );
        Some(resolved)
    }
}

/// Replacement decorator: substitutes a user-configured replacement target
/// when a resolution lands exactly on a configured source path.
pub struct ReplacementHost {
    inner: Rc<dyn CompilerHost>,
    replacements: HashMap<String, String>,
}

impl ReplacementHost {
    pub fn new(inner: Rc<dyn CompilerHost>, replacements: HashMap<String, String>) -> Self {
        let replacements = replacements
            .into_iter()
            .map(|(k, v)| (normalize_path(&k), normalize_path(&v)))
            .collect();
        Self {
            inner,
            replacements,
        }
    }
}

impl CompilerHost for ReplacementHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        self.inner.get_source_file(file_name, force)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        let resolved = self.inner.resolve_module_name(module_name, containing)?;
        let key = normalize_path(&resolved.resolved_file_name);
        match self.replacements.get(&key) {
            Some(replacement) => Some(ResolvedModule::new(replacement.clone())),
            None => Some(resolved),
        }
    }
}

/// Ngcc-linking decorator: triggers on-demand linking of a resolved
/// dependency entry point before returning the resolution, so downstream
/// type-checking sees linked metadata.
pub struct NgccLinkingHost {
    inner: Rc<dyn CompilerHost>,
    processor: Rc<NgccProcessor>,
}

impl NgccLinkingHost {
    pub fn new(inner: Rc<dyn CompilerHost>, processor: Rc<NgccProcessor>) -> Self {
        Self { inner, processor }
    }
}

impl CompilerHost for NgccLinkingHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        self.inner.get_source_file(file_name, force)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        let resolved = self.inner.resolve_module_name(module_name, containing)?;
        if resolved.is_external_library_import {
            self.processor
                .process_module(module_name, &resolved.resolved_file_name);
        }
        Some(resolved)
    }
}

/// Substitution decorator: applies whole-word regex substitutions to file
/// contents before the compiler ever sees them (define-style constants).
pub struct SubstitutionHost {
    inner: Rc<dyn CompilerHost>,
    substitutions: Vec<(Regex, String)>,
}

impl SubstitutionHost {
    pub fn new(inner: Rc<dyn CompilerHost>, substitutions: &HashMap<String, String>) -> Self {
        let mut compiled: Vec<(Regex, String)> = substitutions
            .iter()
            .filter_map(|(ident, replacement)| {
                Regex::new(&format!(r"\b{}\b", regex::escape(ident)))
                    .ok()
                    .map(|re| (re, replacement.clone()))
            })
            .collect();
        compiled.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Self {
            inner,
            substitutions: compiled,
        }
    }
}

impl CompilerHost for SubstitutionHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        let mut content = self.inner.read_file(file_name)?;
        for (pattern, replacement) in &self.substitutions {
            content = pattern
                .replace_all(&content, replacement.as_str())
                .into_owned();
        }
        Some(content)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        // Parse from the substituted text, not the raw file.
        let _ = force;
        self.read_file(file_name)
            .map(|text| Arc::new(SourceFile::new(file_name, text)))
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        self.inner.resolve_module_name(module_name, containing)
    }
}

static TEMPLATE_EXTENSIONS: Lazy<Vec<&'static str>> = Lazy::new(|| vec![".html", ".svg"]);

/// Capabilities added on top of the base host for resource handling.
pub trait ResourceHost: CompilerHost {
    /// Read a resource, either directly from the host for template files in
    /// direct-loading mode, or through the resource loader's compiled path.
    fn read_resource(&self, file_name: &str) -> Result<String, String>;

    /// Join a resource reference relative to its containing file.
    fn resource_name_to_file_name(&self, name: &str, containing_file: &str) -> String;

    fn get_modified_resource_files(&self) -> HashSet<String>;

    /// Process an inline style resource. Only styles go through this path.
    fn transform_resource(&self, data: &str, mime_type: &str) -> Result<String, String>;
}

pub struct WebpackResourceHost {
    inner: Rc<dyn CompilerHost>,
    loader: Rc<RefCell<WebpackResourceLoader>>,
    direct_template_loading: bool,
    modified: RefCell<HashSet<String>>,
}

impl WebpackResourceHost {
    pub fn new(
        inner: Rc<dyn CompilerHost>,
        loader: Rc<RefCell<WebpackResourceLoader>>,
        direct_template_loading: bool,
    ) -> Self {
        Self {
            inner,
            loader,
            direct_template_loading,
            modified: RefCell::new(HashSet::new()),
        }
    }

    pub fn set_modified_resource_files(&self, files: HashSet<String>) {
        *self.modified.borrow_mut() = files;
    }
}

impl CompilerHost for WebpackResourceHost {
    fn read_file(&self, file_name: &str) -> Option<String> {
        self.inner.read_file(file_name)
    }
    fn write_file(&self, file_name: &str, content: &str) {
        self.inner.write_file(file_name, content)
    }
    fn file_exists(&self, file_name: &str) -> bool {
        self.inner.file_exists(file_name)
    }
    fn get_current_directory(&self) -> String {
        self.inner.get_current_directory()
    }
    fn get_source_file(&self, file_name: &str, force: bool) -> Option<Arc<SourceFile>> {
        self.inner.get_source_file(file_name, force)
    }
    fn resolve_module_name(&self, module_name: &str, containing: &str) -> Option<ResolvedModule> {
        self.inner.resolve_module_name(module_name, containing)
    }
}

impl ResourceHost for WebpackResourceHost {
    fn read_resource(&self, file_name: &str) -> Result<String, String> {
        let is_template = TEMPLATE_EXTENSIONS
            .iter()
            .any(|ext| file_name.ends_with(ext));
        if self.direct_template_loading && is_template {
            return self
                .inner
                .read_file(file_name)
                .ok_or_else(|| format!("Resource not found: {}", file_name));
        }
        self.loader.borrow_mut().get(file_name)
    }

    fn resource_name_to_file_name(&self, name: &str, containing_file: &str) -> String {
        crate::paths::resolve(&crate::paths::dirname(containing_file), name)
    }

    fn get_modified_resource_files(&self) -> HashSet<String> {
        self.modified.borrow().clone()
    }

    fn transform_resource(&self, data: &str, mime_type: &str) -> Result<String, String> {
        self.loader.borrow_mut().process(data, mime_type)
    }
}

/// Shared handles into the augmented host pipeline.
pub struct HostHandles {
    pub source_cache: Rc<RefCell<SourceFileCache>>,
    pub dependencies: Rc<RefCell<FileDependencyMap>>,
}

/// Options for host construction.
#[derive(Default)]
pub struct HostOptions {
    pub replacements: HashMap<String, String>,
    pub substitutions: HashMap<String, String>,
    pub ngcc: Option<Rc<NgccProcessor>>,
}

/// Compose the decorator pipeline. Fixed order, innermost first:
/// substitution (raw reads) -> caching -> versioning -> ngcc -> replacement
/// -> dependency collection. Dependency collection is outermost so it
/// records post-replacement targets.
pub fn create_augmented_host(
    base: Rc<dyn CompilerHost>,
    options: HostOptions,
    source_cache: Rc<RefCell<SourceFileCache>>,
    dependencies: Rc<RefCell<FileDependencyMap>>,
) -> Rc<dyn CompilerHost> {
    let mut host: Rc<dyn CompilerHost> = base;
    if !options.substitutions.is_empty() {
        host = Rc::new(SubstitutionHost::new(host, &options.substitutions));
    }
    host = Rc::new(CachingHost::new(host, source_cache));
    host = Rc::new(VersioningHost::new(host));
    if let Some(processor) = options.ngcc {
        host = Rc::new(NgccLinkingHost::new(host, processor));
    }
    if !options.replacements.is_empty() {
        host = Rc::new(ReplacementHost::new(host, options.replacements));
    }
    host = Rc::new(DependencyCollectingHost::new(host, dependencies));
    host
}
