// Errors
//
// Fatal error taxonomy. Recoverable compilation diagnostics are values
// (`ts::Diagnostic`) flushed into the bundler compilation; only the cases
// below terminate an operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("An @ngtools/webpack plugin already exist for this compilation.")]
    AlreadyCompiling,

    #[error(
        "{0} is missing from the TypeScript compilation. Please make sure it is in your \
         tsconfig via the 'files' or 'include' property.\nThe missing file seems to be part \
         of a third party library. TS files in published libraries are often a sign of a \
         badly packaged library. Please open an issue in the library repository to alert its \
         author and ask them to package the library using the Angular Package Format."
    )]
    MissingFromCompilation(String),

    #[error("Entry module not found: {0}")]
    EntryModuleNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duplicated path in loadChildren detected: \"{route}\" is used in 2 loadChildren, but they point to different modules ({left} and {right}). Webpack cannot distinguish on context and would fail to load the proper one.")]
    DuplicateLazyRoute {
        route: String,
        left: String,
        right: String,
    },

    #[error("NGCC failed{}", match .0 { Some(msg) => format!(":\n{}", msg), None => String::new() })]
    NgccFailed(Option<String>),
}
