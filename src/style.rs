//! Style sheet handling: import resolution plus the seam to the external
//! CSS/SCSS processor.
//!
//! The compiler owns two things only: resolving `@import` ids (suffixing
//! extensionless ids with `.scss`, then going through the synchronous
//! resolver variant) and choosing the platform output extension. Actual
//! preprocessing is delegated to a `StylePreprocessor` implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::CompileError;
use crate::resolver::ModuleResolver;

lazy_static! {
    static ref IMPORT_RE: Regex =
        Regex::new(r#"@import\s+(?:url\()?["']([^"']+)["']\)?\s*;"#).unwrap();
}

/// The external style collaborator. The default implementation passes the
/// sheet through untouched.
pub trait StylePreprocessor {
    fn process(&self, source: &str, path: &Path) -> Result<String, CompileError>;
}

#[derive(Debug, Default)]
pub struct PassthroughPreprocessor;

impl StylePreprocessor for PassthroughPreprocessor {
    fn process(&self, source: &str, _path: &Path) -> Result<String, CompileError> {
        Ok(source.to_string())
    }
}

/// Inline `@import` statements recursively. Unresolvable imports are
/// recorded and dropped; a cyclic import is inlined once and then ignored.
pub fn resolve_imports(
    source: &str,
    path: &Path,
    resolver: &mut ModuleResolver,
) -> (String, Vec<CompileError>) {
    let mut errors = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(path.to_path_buf());
    let out = inline_imports(source, path, resolver, &mut visited, &mut errors);
    (out, errors)
}

fn inline_imports(
    source: &str,
    path: &Path,
    resolver: &mut ModuleResolver,
    visited: &mut HashSet<PathBuf>,
    errors: &mut Vec<CompileError>,
) -> String {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut out = String::with_capacity(source.len());
    let mut last_end = 0;

    for caps in IMPORT_RE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        out.push_str(&source[last_end..whole.start()]);
        last_end = whole.end();

        let id = style_import_id(&caps[1]);
        match resolver.resolve_sync(&id, dir) {
            Ok(location) => {
                if visited.insert(location.clone()) {
                    match std::fs::read_to_string(&location) {
                        Ok(imported) => {
                            debug!(from = %path.display(), import = %location.display(), "inlined");
                            out.push_str(&inline_imports(
                                &imported, &location, resolver, visited, errors,
                            ));
                        }
                        Err(e) => errors.push(CompileError::Io(e)),
                    }
                }
            }
            Err(e) => errors.push(e),
        }
    }
    out.push_str(&source[last_end..]);
    out
}

/// Extensionless style ids resolve as `.scss` files.
fn style_import_id(id: &str) -> String {
    if id.ends_with(".scss") || id.ends_with(".sass") || id.ends_with(".css") || id.ends_with(".less")
    {
        id.to_string()
    } else {
        format!("{}.scss", id)
    }
}
