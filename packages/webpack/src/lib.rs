// ngtools-webpack
//
// Angular build orchestration for a webpack-style bundler: an incremental
// program over an augmented compiler host, resource compilation through
// nested child builds, lazy-route discovery, emit-time source rewrites and
// an optional forked type-checker process.

pub mod bundler;
pub mod cache;
pub mod compiler_host;
pub mod config;
pub mod entry_resolver;
pub mod error;
pub mod file_emitter;
pub mod lazy_routes;
pub mod locales;
pub mod logging;
pub mod ngcc_processor;
pub mod paths;
pub mod plugin;
pub mod program;
pub mod resource_loader;
pub mod transformers;
pub mod type_checker;

pub use bundler::{Compilation, NestedCompilationResult, NestedCompiler};
pub use cache::{FileTimestamp, SourceFileCache};
pub use entry_resolver::EntryModule;
pub use error::PluginError;
pub use file_emitter::EmitFileResult;
pub use lazy_routes::LazyRouteMap;
pub use plugin::{AngularCompilerPlugin, AngularCompilerPluginOptions};
pub use program::CompilationMode;
pub use resource_loader::WebpackResourceLoader;
pub use transformers::Platform;
