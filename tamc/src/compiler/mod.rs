//! Pipeline stages: preprocessed text → tokens → AST → type-checked AST →
//! borrow-checked AST → HIR → THIR → MIR → IR text.
//!
//! Each stage is a pure function `run(inputs) -> (result, diagnostics)`. The
//! query driver is agnostic to the representations; it only needs results
//! that fingerprint deterministically and clone cheaply. Stage internals are
//! intentionally small; the subject of this crate is the driver around them.

pub mod borrowck;
pub mod codegen;
pub mod hir;
pub mod lexer;
pub mod mir;
pub mod parser;
pub mod source;
pub mod thir;
pub mod typeck;
