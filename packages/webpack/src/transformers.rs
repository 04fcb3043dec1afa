// Transformers
//
// Source rewrites applied at emit time. Each step declares for itself
// whether it applies to a given file; the selection and ordering of steps
// for a build is decided once, in `transforms_for`.

use crate::entry_resolver::EntryModule;
use crate::lazy_routes::LazyRouteMap;
use crate::paths::normalize_path;
use crate::program::CompilationMode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Browser,
    Server,
}

/// One emit-time rewrite step. Implementations are pure text-to-text so the
/// bulk emit can run them from worker threads.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewritten text, or `None` when the step does not apply to this file.
    fn transform(&self, file_name: &str, text: &str) -> Option<String>;
}

fn is_app_file(file_name: &str) -> bool {
    !file_name.contains("/node_modules/") && !file_name.ends_with(".d.ts")
}

static TEMPLATE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"templateUrl\s*:\s*['"]([^'"]+)['"]"#).expect("static regex"));

static STYLE_URLS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"styleUrls\s*:\s*\[([^\]]*)\]").expect("static regex"));

static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).expect("static regex"));

/// Turns `templateUrl`/`styleUrls` references into inline `require` calls so
/// the bundler's loader chain serves the resource content at runtime.
pub struct ReplaceResources;

impl Transform for ReplaceResources {
    fn name(&self) -> &'static str {
        "replace-resources"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if !is_app_file(file_name) {
            return None;
        }
        if !text.contains("templateUrl") && !text.contains("styleUrls") {
            return None;
        }
        let text = TEMPLATE_URL_RE.replace_all(text, |caps: &regex::Captures| {
            format!("template: require(\"{}\")", &caps[1])
        });
        let text = STYLE_URLS_RE.replace_all(&text, |caps: &regex::Captures| {
            let requires: Vec<String> = STRING_LITERAL_RE
                .captures_iter(&caps[1])
                .map(|c| format!("require(\"{}\")", &c[1]))
                .collect();
            format!("styles: [{}]", requires.join(", "))
        });
        Some(text.into_owned())
    }
}

const ANGULAR_DECORATORS: &[&str] = &["Component", "Directive", "NgModule", "Pipe", "Injectable"];

/// Strips Angular decorator expressions from compiled-ahead files; the
/// generated factories carry the metadata instead.
pub struct RemoveDecorators;

impl Transform for RemoveDecorators {
    fn name(&self) -> &'static str {
        "remove-decorators"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if !is_app_file(file_name) || !text.contains('@') {
            return None;
        }
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let Some((start, after_open)) = find_decorator_start(rest) else {
                output.push_str(rest);
                break;
            };
            output.push_str(&rest[..start]);
            let Some(close) = matching_paren(&rest[after_open..]) else {
                // Unbalanced text; keep it untouched from here on.
                output.push_str(&rest[start..]);
                break;
            };
            rest = &rest[after_open + close + 1..];
            // Swallow a trailing newline left behind by the decorator line.
            if let Some(stripped) = rest.strip_prefix('\n') {
                rest = stripped;
            }
        }
        if output == text {
            None
        } else {
            Some(output)
        }
    }
}

/// Byte offset of the next Angular decorator and the offset just past its
/// opening parenthesis.
fn find_decorator_start(text: &str) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for name in ANGULAR_DECORATORS {
        let mut from = 0;
        while let Some(pos) = text[from..].find(&format!("@{}", name)) {
            let start = from + pos;
            let after_name = start + 1 + name.len();
            let tail = text[after_name..].trim_start();
            if tail.starts_with('(') {
                let open = after_name + (text[after_name..].len() - tail.len());
                if best.map_or(true, |(b, _)| start < b) {
                    best = Some((start, open + 1));
                }
                break;
            }
            from = after_name;
        }
    }
    best
}

/// Offset of the parenthesis closing an already-open group, counting nested
/// groups but not string contents; decorator metadata rarely embeds
/// unbalanced parens in strings.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrites the dynamic bootstrap in the main file to the factory-based
/// bootstrap against the generated ngfactory.
pub struct ReplaceBootstrap {
    main_path: String,
    entry: EntryModule,
    platform: Platform,
}

impl ReplaceBootstrap {
    pub fn new(main_path: &str, entry: EntryModule, platform: Platform) -> Self {
        Self {
            main_path: normalize_path(main_path),
            entry,
            platform,
        }
    }
}

impl Transform for ReplaceBootstrap {
    fn name(&self) -> &'static str {
        "replace-bootstrap"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if normalize_path(file_name) != self.main_path || !text.contains("bootstrapModule") {
            return None;
        }
        let class_name = &self.entry.class_name;
        let factory_name = format!("{}NgFactory", class_name);

        let import_re = Regex::new(&format!(
            r#"import\s*\{{\s*{}\s*\}}\s*from\s*['"]([^'"]+)['"]"#,
            regex::escape(class_name)
        ))
        .expect("escaped identifier regex");
        let mut text = import_re
            .replace_all(text, |caps: &regex::Captures| {
                format!(
                    "import {{ {} }} from \"{}.ngfactory\"",
                    factory_name, &caps[1]
                )
            })
            .into_owned();

        let bootstrap_re = Regex::new(&format!(
            r"bootstrapModule\s*\(\s*{}\s*\)",
            regex::escape(class_name)
        ))
        .expect("escaped identifier regex");
        text = bootstrap_re
            .replace_all(&text, format!("bootstrapModuleFactory({})", factory_name))
            .into_owned();

        match self.platform {
            Platform::Browser => {
                text = text
                    .replace("platformBrowserDynamic", "platformBrowser")
                    .replace(
                        "@angular/platform-browser-dynamic",
                        "@angular/platform-browser",
                    );
            }
            Platform::Server => {
                text = text
                    .replace("platformDynamicServer", "platformServer")
                    .replace("@angular/platform-server/dynamic", "@angular/platform-server");
            }
        }
        Some(text)
    }
}

/// Re-exports the generated factory from the entry module's file so server
/// rendering can import it without knowing the factory file layout.
pub struct ExportNgFactory {
    entry: EntryModule,
}

impl ExportNgFactory {
    pub fn new(entry: EntryModule) -> Self {
        Self { entry }
    }
}

impl Transform for ExportNgFactory {
    fn name(&self) -> &'static str {
        "export-ngfactory"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if normalize_path(file_name) != self.entry.path {
            return None;
        }
        let stem = file_stem(&self.entry.path);
        Some(format!(
            "{}\nexport {{ {}NgFactory }} from \"./{}.ngfactory\";\n",
            text.trim_end(),
            self.entry.class_name,
            stem
        ))
    }
}

/// Exports the lazy-route map from the main file for server-side chunk
/// resolution.
pub struct ExportLazyModuleMap {
    main_path: String,
    routes: Vec<(String, String)>,
}

impl ExportLazyModuleMap {
    pub fn new(main_path: &str, routes: &LazyRouteMap) -> Self {
        Self {
            main_path: normalize_path(main_path),
            routes: routes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl Transform for ExportLazyModuleMap {
    fn name(&self) -> &'static str {
        "export-lazy-module-map"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if normalize_path(file_name) != self.main_path {
            return None;
        }
        let entries: Vec<String> = self
            .routes
            .iter()
            .map(|(route, path)| format!("  \"{}\": require(\"{}\")", route, path))
            .collect();
        Some(format!(
            "{}\nexport const LAZY_MODULE_MAP = {{\n{}\n}};\n",
            text.trim_end(),
            entries.join(",\n")
        ))
    }
}

/// Registers locale data for the configured locale in the entry module file.
pub struct RegisterLocale {
    entry_path: String,
    locale: String,
}

impl RegisterLocale {
    pub fn new(entry: &EntryModule, locale: &str) -> Self {
        Self {
            entry_path: entry.path.clone(),
            locale: locale.to_string(),
        }
    }
}

impl Transform for RegisterLocale {
    fn name(&self) -> &'static str {
        "register-locale"
    }

    fn transform(&self, file_name: &str, text: &str) -> Option<String> {
        if normalize_path(file_name) != self.entry_path {
            return None;
        }
        let binding = format!("__locale_{}", self.locale.replace('-', "_"));
        Some(format!(
            "import {{ registerLocaleData }} from \"@angular/common\";\nimport {} from \"@angular/common/locales/{}\";\nregisterLocaleData({});\n{}",
            binding, self.locale, binding, text
        ))
    }
}

/// Inputs that decide which rewrite steps a build installs.
pub struct TransformContext<'a> {
    pub mode: CompilationMode,
    pub platform: Platform,
    pub main_path: Option<&'a str>,
    pub entry_module: Option<&'a EntryModule>,
    pub lazy_routes: &'a LazyRouteMap,
    /// Normalized locale, already validated against the known-locale table.
    pub locale: Option<&'a str>,
}

/// Select and order the rewrite steps for one build.
pub fn transforms_for(ctx: &TransformContext<'_>) -> Vec<Arc<dyn Transform>> {
    let mut transforms: Vec<Arc<dyn Transform>> = Vec::new();

    match ctx.mode {
        CompilationMode::Jit => transforms.push(Arc::new(ReplaceResources)),
        CompilationMode::Aot => transforms.push(Arc::new(RemoveDecorators)),
    }

    match ctx.platform {
        Platform::Browser => {
            if let (Some(entry), Some(locale)) = (ctx.entry_module, ctx.locale) {
                transforms.push(Arc::new(RegisterLocale::new(entry, locale)));
            }
            if ctx.mode == CompilationMode::Aot {
                if let (Some(main), Some(entry)) = (ctx.main_path, ctx.entry_module) {
                    transforms.push(Arc::new(ReplaceBootstrap::new(
                        main,
                        entry.clone(),
                        Platform::Browser,
                    )));
                }
            }
        }
        Platform::Server => {
            if let Some(main) = ctx.main_path {
                transforms.push(Arc::new(ExportLazyModuleMap::new(main, ctx.lazy_routes)));
            }
            if ctx.mode == CompilationMode::Aot {
                if let (Some(main), Some(entry)) = (ctx.main_path, ctx.entry_module) {
                    transforms.push(Arc::new(ExportNgFactory::new(entry.clone())));
                    transforms.push(Arc::new(ReplaceBootstrap::new(
                        main,
                        entry.clone(),
                        Platform::Server,
                    )));
                }
            }
        }
    }

    transforms
}

/// Apply the installed steps in order; steps that do not apply pass the
/// text through unchanged.
pub fn apply_transforms(
    transforms: &[Arc<dyn Transform>],
    file_name: &str,
    text: &str,
) -> String {
    let mut current = text.to_string();
    for step in transforms {
        if let Some(rewritten) = step.transform(file_name, &current) {
            current = rewritten;
        }
    }
    current
}

fn file_stem(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.strip_suffix(".tsx")
        .or_else(|| base.strip_suffix(".ts"))
        .unwrap_or(base)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_resources_rewrites_template_and_styles() {
        let input = r#"
            @Component({
                selector: 'app-root',
                templateUrl: './app.component.html',
                styleUrls: ['./app.component.css', './theme.css'],
            })
            export class AppComponent {}
        "#;
        let out = ReplaceResources
            .transform("/src/app.component.ts", input)
            .unwrap();
        assert!(out.contains(r#"template: require("./app.component.html")"#));
        assert!(out.contains(r#"styles: [require("./app.component.css"), require("./theme.css")]"#));
        assert!(!out.contains("templateUrl"));
    }

    #[test]
    fn replace_resources_skips_declaration_files() {
        assert!(ReplaceResources
            .transform("/p/node_modules/lib/index.d.ts", "templateUrl: './x.html'")
            .is_none());
    }

    #[test]
    fn remove_decorators_strips_balanced_decorator_expressions() {
        let input = "@NgModule({\n  imports: [f(), g(h())],\n})\nexport class AppModule {}\n";
        let out = RemoveDecorators
            .transform("/src/app.module.ts", input)
            .unwrap();
        assert!(!out.contains("@NgModule"));
        assert!(out.contains("export class AppModule {}"));
    }

    #[test]
    fn remove_decorators_leaves_other_decorators_alone() {
        let input = "@CustomThing()\nexport class X {}\n";
        assert!(RemoveDecorators.transform("/src/x.ts", input).is_none());
    }

    #[test]
    fn replace_bootstrap_rewrites_to_factory_bootstrap() {
        let entry = EntryModule {
            path: "/src/app/app.module.ts".to_string(),
            class_name: "AppModule".to_string(),
        };
        let step = ReplaceBootstrap::new("/src/main.ts", entry, Platform::Browser);
        let input = r#"
            import { platformBrowserDynamic } from '@angular/platform-browser-dynamic';
            import { AppModule } from './app/app.module';
            platformBrowserDynamic().bootstrapModule(AppModule);
        "#;
        let out = step.transform("/src/main.ts", input).unwrap();
        assert!(out.contains(r#"import { AppModuleNgFactory } from "./app/app.module.ngfactory""#));
        assert!(out.contains("bootstrapModuleFactory(AppModuleNgFactory)"));
        assert!(out.contains("@angular/platform-browser"));
        assert!(!out.contains("platform-browser-dynamic"));
    }

    #[test]
    fn replace_bootstrap_only_touches_the_main_file() {
        let entry = EntryModule {
            path: "/src/app/app.module.ts".to_string(),
            class_name: "AppModule".to_string(),
        };
        let step = ReplaceBootstrap::new("/src/main.ts", entry, Platform::Browser);
        assert!(step
            .transform("/src/other.ts", "bootstrapModule(AppModule)")
            .is_none());
    }

    #[test]
    fn export_ngfactory_appends_factory_reexport() {
        let entry = EntryModule {
            path: "/src/app/app.module.ts".to_string(),
            class_name: "AppModule".to_string(),
        };
        let out = ExportNgFactory::new(entry)
            .transform("/src/app/app.module.ts", "export class AppModule {}")
            .unwrap();
        assert!(out.contains(
            r#"export { AppModuleNgFactory } from "./app.module.ngfactory";"#
        ));
    }

    #[test]
    fn export_lazy_module_map_lists_all_routes() {
        let mut routes = LazyRouteMap::new();
        routes.insert("./a#AModule".to_string(), "/src/a.ts".to_string());
        routes.insert("./b#BModule".to_string(), "/src/b.ts".to_string());
        let out = ExportLazyModuleMap::new("/src/main.ts", &routes)
            .transform("/src/main.ts", "bootstrap();")
            .unwrap();
        assert!(out.contains("LAZY_MODULE_MAP"));
        assert!(out.contains(r#""./a#AModule": require("/src/a.ts")"#));
        assert!(out.contains(r#""./b#BModule": require("/src/b.ts")"#));
    }

    #[test]
    fn register_locale_imports_and_registers_locale_data() {
        let entry = EntryModule {
            path: "/src/app/app.module.ts".to_string(),
            class_name: "AppModule".to_string(),
        };
        let out = RegisterLocale::new(&entry, "fr")
            .transform("/src/app/app.module.ts", "export class AppModule {}")
            .unwrap();
        assert!(out.contains("@angular/common/locales/fr"));
        assert!(out.contains("registerLocaleData("));
    }

    #[test]
    fn jit_browser_pipeline_starts_with_resource_replacement() {
        let routes = LazyRouteMap::new();
        let ctx = TransformContext {
            mode: CompilationMode::Jit,
            platform: Platform::Browser,
            main_path: Some("/src/main.ts"),
            entry_module: None,
            lazy_routes: &routes,
            locale: None,
        };
        let transforms = transforms_for(&ctx);
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].name(), "replace-resources");
    }

    #[test]
    fn aot_server_pipeline_has_factory_export_and_bootstrap() {
        let entry = EntryModule {
            path: "/src/app/app.module.ts".to_string(),
            class_name: "AppModule".to_string(),
        };
        let routes = LazyRouteMap::new();
        let ctx = TransformContext {
            mode: CompilationMode::Aot,
            platform: Platform::Server,
            main_path: Some("/src/main.ts"),
            entry_module: Some(&entry),
            lazy_routes: &routes,
            locale: None,
        };
        let names: Vec<&str> = transforms_for(&ctx).iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "remove-decorators",
                "export-lazy-module-map",
                "export-ngfactory",
                "replace-bootstrap"
            ]
        );
    }
}
