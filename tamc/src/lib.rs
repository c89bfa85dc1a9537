//! `tamc` is the incremental compilation driver for the [Tamarin] language.
//!
//! Source files lower through a fixed pipeline (preprocessed text, tokens,
//! AST, type-checked AST, borrow-checked AST, HIR, THIR, MIR, IR text) with
//! every stage memoized behind [`query::QueryContext::force`] and persisted
//! across sessions by the red/green incremental engine.
//!
//! [tamarin]: https://tamarin-lang.dev

#![deny(clippy::dbg_macro)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(rust_2018_idioms)]

pub mod behaviors;
pub mod compiler;
pub mod diagnostics;
pub mod intern;
mod internal;
pub mod query;
pub mod version;

/// Extension of Tamarin source files.
pub const TAMARIN_SOURCE_EXTENSION: &str = "tam";
/// Default name of the on-disk incremental cache directory.
pub const INCR_CACHE_DIR_NAME: &str = ".incr-cache";
