//! Structured diagnostics emitted by pipeline stages and analyses.
//!
//! The driver only collects; rendering belongs to the embedder.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single diagnostic message tied to a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stage that produced the diagnostic, e.g. `"parse"` or `"mir"`.
    pub stage: SmolStr,
    pub message: String,
    /// 1-based source line, when known.
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn error(stage: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            stage: stage.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn warning(stage: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            stage: stage.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{severity}[{}]: {}", self.stage, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let diag = Diagnostic::error("parse", "unexpected token `}`").at_line(3);
        assert_eq!(
            diag.to_string(),
            "error[parse]: unexpected token `}` (line 3)"
        );
    }

    #[test]
    fn serde_round_trip() {
        let diag = Diagnostic::warning("mir", "dead block");
        let json = serde_json::to_string(&diag).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(diag, back);
    }
}
