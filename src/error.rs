//! Error taxonomy and the final build report.
//!
//! Errors are attached to the resource that produced them and surface in one
//! sweep at the end of the build; they are never thrown across resource
//! boundaries. Only a missing app entry or an unknown platform aborts the
//! build outright.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// An import id could not be resolved from its base directory. The edge
    /// is dropped; sibling edges of the same resource continue.
    #[error("cannot resolve `{id}` in `{base}`")]
    Resolution { id: String, base: String },

    /// The source violates the constrained component dialect (anonymous or
    /// duplicate declaration, malformed `if` consequent, unsupported
    /// attribute-value expression, ...). Compilation of the resource stops.
    #[error("{message} at line {line}")]
    Shape { message: String, line: u32 },

    /// The source failed to parse at all.
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Fatal: the app entry file does not exist. No work is performed.
    #[error("invalid entry file path `{0}`")]
    MissingEntry(PathBuf),

    /// Fatal: the platform selector is not one of the closed set.
    #[error("unknown platform `{0}`, expected one of wx, ali, bu, tt, quick")]
    UnknownPlatform(String),
}

impl CompileError {
    pub fn shape(message: impl Into<String>, line: u32) -> Self {
        CompileError::Shape {
            message: message.into(),
            line,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CompileError::MissingEntry(_) | CompileError::UnknownPlatform(_)
        )
    }
}

/// 1-based line of a byte offset, for shape errors that name source lines.
pub(crate) fn source_line(source: &str, offset: u32) -> u32 {
    let end = (offset as usize).min(source.len());
    source[..end].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

/// One failed resource in the final sweep.
#[derive(Debug)]
pub struct FailureBlock {
    pub source_path: PathBuf,
    pub message: String,
}

/// Aggregated outcome of a build. Successful resources are written even when
/// unrelated resources failed, so both lists can be non-empty.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub emitted: Vec<PathBuf>,
    pub failures: Vec<FailureBlock>,
}

impl BuildReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, source_path: &Path, message: String) {
        self.failures.push(FailureBlock {
            source_path: source_path.to_path_buf(),
            message,
        });
    }

    /// User-facing report: one block per failing resource.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for failure in &self.failures {
            out.push_str("CompileError:\n");
            out.push_str(&format!(
                "  SourceFilePath: {}\n",
                failure.source_path.display()
            ));
            out.push_str(&format!("  ErrorMessage: {}\n", failure.message));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CompileError::MissingEntry(PathBuf::from("/x/app.js")).is_fatal());
        assert!(CompileError::UnknownPlatform("swan".into()).is_fatal());
        assert!(!CompileError::shape("two component declarations", 4).is_fatal());
    }

    #[test]
    fn report_renders_one_block_per_failure() {
        let mut report = BuildReport::default();
        report.record_failure(Path::new("/p/source/pages/a.js"), "bad render".into());
        report.record_failure(Path::new("/p/source/pages/b.js"), "bad import".into());

        let text = report.render();
        assert_eq!(text.matches("CompileError:").count(), 2);
        assert!(text.contains("/p/source/pages/a.js"));
        assert!(text.contains("bad import"));
        assert!(!report.ok());
    }
}
