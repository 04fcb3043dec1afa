//! TypeScript-compatible interfaces and types for the webpack plugin.
//! This crate serves as the boundary to the external compiler toolchain:
//! the plugin orchestrates *when* and *what* to compile, while everything
//! behind [`Program`] and [`CompilerHost`] is replaceable by the real
//! compiler implementation.

pub mod diagnostics;
pub mod host;
pub mod options;
pub mod program;
pub mod source_file;
pub mod transpile;

pub use diagnostics::*;
pub use host::*;
pub use options::*;
pub use program::*;
pub use source_file::*;
pub use transpile::*;
