// Resource Loader
//
// Compiles non-script assets (templates, stylesheets, inline styles)
// through a nested child build so the user's loader chain applies, caches
// the result, and tracks what each compiled resource itself depended on.

use crate::bundler::{NestedCompilationResult, NestedCompiler};
use crate::paths::normalize_path;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct CompilationOutput {
    content: String,
    #[allow(dead_code)]
    map: Option<String>,
}

#[derive(Default)]
pub struct WebpackResourceLoader {
    compiler: Option<Box<dyn NestedCompiler>>,
    cache: HashMap<String, CompilationOutput>,
    /// resource -> files its compiled output depends on
    file_dependencies: HashMap<String, HashSet<String>>,
    /// dependency file -> resources whose output was produced using it
    reverse_dependencies: HashMap<String, HashSet<String>>,
    /// Counter for synthetic inline entry names. Never reset, even across
    /// builds, so entry names stay unique for the process lifetime.
    inline_counter: usize,
}

impl WebpackResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebind the loader to a new parent build. With a changed-file set,
    /// only resources affected by those files are purged (one reverse hop is
    /// sufficient: TypeScript-level dependency collection already captures
    /// transitive static imports). Without one, the whole cache is cleared.
    pub fn update(
        &mut self,
        compiler: Box<dyn NestedCompiler>,
        changed_files: Option<&HashSet<String>>,
    ) {
        self.compiler = Some(compiler);
        match changed_files {
            Some(changed) => {
                let mut to_purge = HashSet::new();
                for file in changed {
                    let file = normalize_path(file);
                    if let Some(resources) = self.reverse_dependencies.get(&file) {
                        to_purge.extend(resources.iter().cloned());
                    }
                }
                for resource in to_purge {
                    self.cache.remove(&resource);
                }
            }
            None => self.cache.clear(),
        }
    }

    /// Files the compiled output of `resource_path` depends on.
    pub fn get_resource_dependencies(&self, resource_path: &str) -> Vec<String> {
        let resource_path = normalize_path(resource_path);
        self.file_dependencies
            .get(&resource_path)
            .map(|deps| {
                let mut deps: Vec<String> = deps.iter().cloned().collect();
                deps.sort();
                deps
            })
            .unwrap_or_default()
    }

    /// Compiled text for a resource file, from cache or a nested build.
    pub fn get(&mut self, file_path: &str) -> Result<String, String> {
        let file_path = normalize_path(file_path);
        if let Some(output) = self.cache.get(&file_path) {
            return Ok(output.content.clone());
        }
        let entry_name = format!("resource-{}", self.next_entry_id());
        let result = match self.compiler.as_mut() {
            Some(compiler) => compiler.compile_file(&entry_name, &file_path),
            None => return Err("Resource loader has no active compilation.".to_string()),
        };
        self.finish_compilation(&file_path, result, true)
    }

    /// Compiled text for inline content with no file on disk. Empty input
    /// short-circuits without spinning up a nested build.
    pub fn process(&mut self, data: &str, mime_type: &str) -> Result<String, String> {
        if data.trim().is_empty() {
            return Ok(String::new());
        }
        let entry_name = format!("resource-{}", self.next_entry_id());
        let result = match self.compiler.as_mut() {
            Some(compiler) => compiler.compile_data(&entry_name, data, mime_type),
            None => return Err("Resource loader has no active compilation.".to_string()),
        };
        self.finish_compilation(&entry_name, result, false)
    }

    fn next_entry_id(&mut self) -> usize {
        let id = self.inline_counter;
        self.inline_counter += 1;
        id
    }

    fn finish_compilation(
        &mut self,
        key: &str,
        result: NestedCompilationResult,
        cache: bool,
    ) -> Result<String, String> {
        if !result.success() {
            // Failed compilations are never cached so every request retries.
            return Err(result.errors.join("\n"));
        }

        let dependencies: HashSet<String> = result
            .file_dependencies
            .iter()
            .map(|d| normalize_path(d))
            .collect();
        for dep in &dependencies {
            self.reverse_dependencies
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.file_dependencies
            .insert(key.to_string(), dependencies);

        if cache {
            self.cache.insert(
                key.to_string(),
                CompilationOutput {
                    content: result.content.clone(),
                    map: result.map,
                },
            );
        }
        Ok(result.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Mock nested compiler with scripted outputs and a call counter.
    #[derive(Clone, Default)]
    struct MockNestedCompiler {
        outputs: Rc<RefCell<HashMap<String, NestedCompilationResult>>>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl MockNestedCompiler {
        fn add(&self, path: &str, content: &str, deps: &[&str]) {
            self.outputs.borrow_mut().insert(
                path.to_string(),
                NestedCompilationResult {
                    content: content.to_string(),
                    map: None,
                    file_dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    errors: Vec::new(),
                },
            );
        }

        fn call_count(&self, path: &str) -> usize {
            self.calls.borrow().iter().filter(|c| *c == path).count()
        }
    }

    impl NestedCompiler for MockNestedCompiler {
        fn compile_file(&mut self, _entry: &str, file_path: &str) -> NestedCompilationResult {
            self.calls.borrow_mut().push(file_path.to_string());
            self.outputs
                .borrow()
                .get(file_path)
                .cloned()
                .unwrap_or_else(|| NestedCompilationResult {
                    errors: vec![format!("no such resource: {}", file_path)],
                    ..Default::default()
                })
        }

        fn compile_data(&mut self, entry: &str, data: &str, _mime: &str) -> NestedCompilationResult {
            self.calls.borrow_mut().push(entry.to_string());
            NestedCompilationResult {
                content: format!("processed:{}", data),
                ..Default::default()
            }
        }
    }

    fn loader_with(mock: &MockNestedCompiler) -> WebpackResourceLoader {
        let mut loader = WebpackResourceLoader::new();
        loader.update(Box::new(mock.clone()), None);
        loader
    }

    #[test]
    fn get_caches_successful_compilations() {
        let mock = MockNestedCompiler::default();
        mock.add("/src/app.html", "<div/>", &["/src/app.html"]);
        let mut loader = loader_with(&mock);

        assert_eq!(loader.get("/src/app.html").unwrap(), "<div/>");
        assert_eq!(loader.get("/src/app.html").unwrap(), "<div/>");
        assert_eq!(mock.call_count("/src/app.html"), 1);
    }

    #[test]
    fn failed_compilations_are_retried() {
        let mock = MockNestedCompiler::default();
        let mut loader = loader_with(&mock);

        assert!(loader.get("/src/app.html").is_err());
        mock.add("/src/app.html", "<div/>", &["/src/app.html"]);
        assert_eq!(loader.get("/src/app.html").unwrap(), "<div/>");
    }

    #[test]
    fn changed_dependency_purges_only_affected_resources() {
        let mock = MockNestedCompiler::default();
        mock.add(
            "/src/a.scss",
            "a{}",
            &["/src/a.scss", "/src/shared/vars.scss"],
        );
        mock.add("/src/b.scss", "b{}", &["/src/b.scss"]);
        let mut loader = loader_with(&mock);
        loader.get("/src/a.scss").unwrap();
        loader.get("/src/b.scss").unwrap();

        let changed: HashSet<String> = ["/src/shared/vars.scss".to_string()].into();
        loader.update(Box::new(mock.clone()), Some(&changed));

        loader.get("/src/a.scss").unwrap();
        loader.get("/src/b.scss").unwrap();
        assert_eq!(mock.call_count("/src/a.scss"), 2);
        assert_eq!(mock.call_count("/src/b.scss"), 1);
    }

    #[test]
    fn update_without_changed_set_clears_everything() {
        let mock = MockNestedCompiler::default();
        mock.add("/src/a.scss", "a{}", &["/src/a.scss"]);
        let mut loader = loader_with(&mock);
        loader.get("/src/a.scss").unwrap();

        loader.update(Box::new(mock.clone()), None);
        loader.get("/src/a.scss").unwrap();
        assert_eq!(mock.call_count("/src/a.scss"), 2);
    }

    #[test]
    fn empty_inline_content_skips_the_nested_build() {
        let mock = MockNestedCompiler::default();
        let mut loader = loader_with(&mock);
        assert_eq!(loader.process("   \n", "text/css").unwrap(), "");
        assert!(mock.calls.borrow().is_empty());
    }

    #[test]
    fn inline_entry_names_stay_unique_across_builds() {
        let mock = MockNestedCompiler::default();
        let mut loader = loader_with(&mock);
        loader.process("a{}", "text/css").unwrap();
        loader.update(Box::new(mock.clone()), None);
        loader.process("b{}", "text/css").unwrap();
        let calls = mock.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1]);
    }

    #[test]
    fn resource_dependencies_are_recorded() {
        let mock = MockNestedCompiler::default();
        mock.add(
            "/src/a.scss",
            "a{}",
            &["/src/a.scss", "/src/shared/vars.scss"],
        );
        let mut loader = loader_with(&mock);
        loader.get("/src/a.scss").unwrap();
        let deps = loader.get_resource_dependencies("/src/a.scss");
        assert_eq!(deps, vec!["/src/a.scss", "/src/shared/vars.scss"]);
    }
}
