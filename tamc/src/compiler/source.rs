//! Source reading and preprocessing.

use camino::Utf8PathBuf;

use crate::diagnostics::Diagnostic;
use crate::query::fingerprint::Fingerprint;

/// A preprocessed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    /// Text after conditional-inclusion and comment stripping.
    pub text: String,
}

impl SourceFile {
    pub fn stable_digest(&self) -> Fingerprint {
        Fingerprint::of_str(&self.text)
    }
}

/// Preprocess raw source text.
///
/// Supported directives, all line-based:
/// - `#if NAME` ... `#endif`: the enclosed lines survive only when `NAME` is
///   among the configured defines. Blocks nest.
/// - `//` line comments are stripped.
///
/// Line structure is preserved (suppressed lines become empty) so diagnostics
/// from later stages keep their 1-based line numbers.
pub fn preprocess(
    path: Utf8PathBuf,
    raw: &str,
    defines: &[String],
) -> (SourceFile, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut text = String::with_capacity(raw.len());
    // One entry per open `#if`: whether the block is being kept.
    let mut if_stack: Vec<bool> = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("#if") {
            let symbol = rest.trim();
            if symbol.is_empty() {
                diagnostics
                    .push(Diagnostic::error("preprocess", "`#if` without a symbol").at_line(line_no));
            }
            let parent_live = if_stack.last().copied().unwrap_or(true);
            if_stack.push(parent_live && defines.iter().any(|d| d == symbol));
            text.push('\n');
            continue;
        }
        if trimmed.starts_with("#endif") {
            if if_stack.pop().is_none() {
                diagnostics.push(
                    Diagnostic::error("preprocess", "`#endif` without matching `#if`")
                        .at_line(line_no),
                );
            }
            text.push('\n');
            continue;
        }

        let live = if_stack.last().copied().unwrap_or(true);
        if live {
            let code = match line.find("//") {
                Some(pos) => &line[..pos],
                None => line,
            };
            text.push_str(code.trim_end());
        }
        text.push('\n');
    }

    for _ in &if_stack {
        diagnostics.push(Diagnostic::error("preprocess", "unterminated `#if` block"));
    }

    (SourceFile { path, text }, diagnostics)
}
