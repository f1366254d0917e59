//! Module resolution with an alias table and a monotone cache.
//!
//! Two kinds of cache entries exist: `alias` bindings are base-independent
//! and always win; `resolved` outcomes are keyed by (id, base) and are never
//! overwritten. The cache is never invalidated within one build.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::CompileError;

#[derive(Debug, Default)]
pub struct ModuleResolver {
    /// Alias keys in registration order; longest-prefix match scans this.
    alias_keys: Vec<String>,
    alias_cache: HashMap<String, PathBuf>,
    resolved_cache: HashMap<(String, PathBuf), PathBuf>,
    /// Number of filesystem resolution attempts, for cache verification.
    fs_resolutions: u64,
}

impl ModuleResolver {
    pub fn new() -> Self {
        ModuleResolver::default()
    }

    /// Bind a virtual id to a fixed location. A duplicate key keeps the
    /// first binding.
    pub fn set_alias(&mut self, key: &str, location: PathBuf) {
        if self.alias_cache.contains_key(key) {
            warn!(alias = key, "duplicated alias ignored, keeping first binding");
            return;
        }
        self.alias_keys.push(key.to_string());
        self.alias_cache.insert(key.to_string(), location);
    }

    pub fn fs_resolutions(&self) -> u64 {
        self.fs_resolutions
    }

    /// Resolve an import id against a base directory.
    pub async fn resolve(&mut self, id: &str, base: &Path) -> Result<PathBuf, CompileError> {
        let normalized = normalize_id(id);

        if let Some(hit) = self.alias_cache.get(normalized.as_str()) {
            return Ok(hit.clone());
        }
        if let Some(hit) = self
            .resolved_cache
            .get(&(normalized.clone(), base.to_path_buf()))
        {
            return Ok(hit.clone());
        }

        self.fs_resolutions += 1;
        let mut outcome = None;
        for candidate in candidate_paths(&normalized, base) {
            if is_file_async(&candidate).await {
                outcome = Some(candidate);
                break;
            }
        }

        // Standard resolution failed: retry with the longest alias prefix
        // substituted in.
        if outcome.is_none() {
            if let Some((key, location)) = self.longest_alias_prefix(&normalized) {
                self.fs_resolutions += 1;
                for candidate in file_candidates(&substitute_alias(&normalized, &key, &location)) {
                    if is_file_async(&candidate).await {
                        outcome = Some(candidate);
                        break;
                    }
                }
            }
        }

        match outcome {
            Some(location) => {
                let location = normalize_path(&location);
                debug!(id = normalized.as_str(), location = %location.display(), "resolved");
                self.resolved_cache
                    .entry((normalized, base.to_path_buf()))
                    .or_insert_with(|| location.clone());
                Ok(location)
            }
            None => Err(CompileError::Resolution {
                id: id.to_string(),
                base: base.display().to_string(),
            }),
        }
    }

    /// Synchronous variant for phases that cannot suspend (the style
    /// collaborator's import hook).
    pub fn resolve_sync(&mut self, id: &str, base: &Path) -> Result<PathBuf, CompileError> {
        let normalized = normalize_id(id);

        if let Some(hit) = self.alias_cache.get(normalized.as_str()) {
            return Ok(hit.clone());
        }
        if let Some(hit) = self
            .resolved_cache
            .get(&(normalized.clone(), base.to_path_buf()))
        {
            return Ok(hit.clone());
        }

        self.fs_resolutions += 1;
        let mut outcome = candidate_paths(&normalized, base)
            .into_iter()
            .find(|c| c.is_file());

        if outcome.is_none() {
            if let Some((key, location)) = self.longest_alias_prefix(&normalized) {
                self.fs_resolutions += 1;
                outcome = file_candidates(&substitute_alias(&normalized, &key, &location))
                    .into_iter()
                    .find(|c| c.is_file());
            }
        }

        match outcome {
            Some(location) => {
                let location = normalize_path(&location);
                self.resolved_cache
                    .entry((normalized, base.to_path_buf()))
                    .or_insert_with(|| location.clone());
                Ok(location)
            }
            None => Err(CompileError::Resolution {
                id: id.to_string(),
                base: base.display().to_string(),
            }),
        }
    }

    fn longest_alias_prefix(&self, id: &str) -> Option<(String, PathBuf)> {
        self.alias_keys
            .iter()
            .filter(|key| id == *key || id.starts_with(&format!("{}/", key)))
            .max_by_key(|key| key.len())
            .map(|key| (key.clone(), self.alias_cache[key].clone()))
    }
}

async fn is_file_async(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Ids starting with `/` address the source root and are normalized to
/// relative form before resolution.
fn normalize_id(id: &str) -> String {
    if let Some(rest) = id.strip_prefix('/') {
        format!("./{}", rest)
    } else {
        id.to_string()
    }
}

fn is_relative_id(id: &str) -> bool {
    id.starts_with("./") || id.starts_with("../") || id == "." || id == ".."
}

/// Probe order for one location: the exact path, `<path>.js`,
/// `<path>/index.js`.
fn file_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if path.extension().is_some() {
        candidates.push(path.to_path_buf());
    }
    let mut with_js = path.as_os_str().to_os_string();
    with_js.push(".js");
    candidates.push(PathBuf::from(with_js));
    candidates.push(path.join("index.js"));
    if path.extension().is_none() {
        candidates.push(path.to_path_buf());
    }
    candidates
}

fn candidate_paths(id: &str, base: &Path) -> Vec<PathBuf> {
    if is_relative_id(id) {
        return file_candidates(&normalize_path(&base.join(id)));
    }
    // Package lookup: walk `node_modules` up from the base directory.
    let mut candidates = Vec::new();
    for ancestor in base.ancestors() {
        let target = ancestor.join("node_modules").join(id);
        candidates.extend(file_candidates(&target));
    }
    candidates
}

fn substitute_alias(id: &str, key: &str, location: &Path) -> PathBuf {
    let remainder = id[key.len()..].trim_start_matches('/');
    if remainder.is_empty() {
        location.to_path_buf()
    } else {
        location.join(remainder)
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_relative_ids_with_extension_probing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("source/pages");
        fs::create_dir_all(&base).unwrap();
        fs::write(dir.path().join("source/util.js"), "export default 1;").unwrap();

        let mut resolver = ModuleResolver::new();
        let rt = runtime();
        let location = rt.block_on(resolver.resolve("../util", &base)).unwrap();
        assert_eq!(location, normalize_path(&dir.path().join("source/util.js")));
    }

    #[test]
    fn repeated_resolution_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("source");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("a.js"), "").unwrap();

        let mut resolver = ModuleResolver::new();
        let rt = runtime();
        let first = rt.block_on(resolver.resolve("./a", &base)).unwrap();
        let second = rt.block_on(resolver.resolve("./a", &base)).unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.fs_resolutions(), 1);
    }

    #[test]
    fn alias_hits_return_unconditionally_and_win_over_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_file = dir.path().join("ReactWX.js");
        fs::write(&runtime_file, "").unwrap();

        let mut resolver = ModuleResolver::new();
        resolver.set_alias("@react", runtime_file.clone());

        let rt = runtime();
        let a = rt
            .block_on(resolver.resolve("@react", dir.path()))
            .unwrap();
        let b = rt
            .block_on(resolver.resolve("@react", &dir.path().join("elsewhere")))
            .unwrap();
        assert_eq!(a, runtime_file);
        assert_eq!(b, runtime_file);
        assert_eq!(resolver.fs_resolutions(), 0);
    }

    #[test]
    fn alias_prefix_substitution_retries_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let components = dir.path().join("source/components");
        fs::create_dir_all(components.join("Row")).unwrap();
        fs::write(components.join("Row/index.js"), "").unwrap();

        let mut resolver = ModuleResolver::new();
        resolver.set_alias("@components", components.clone());

        let rt = runtime();
        let location = rt
            .block_on(resolver.resolve("@components/Row", dir.path()))
            .unwrap();
        assert_eq!(location, components.join("Row/index.js"));
    }

    #[test]
    fn leading_slash_ids_are_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("source");
        fs::create_dir_all(base.join("assets")).unwrap();
        fs::write(base.join("assets/logo.png"), [0u8; 4]).unwrap();

        let mut resolver = ModuleResolver::new();
        let rt = runtime();
        let location = rt
            .block_on(resolver.resolve("/assets/logo.png", &base))
            .unwrap();
        assert_eq!(location, base.join("assets/logo.png"));
    }

    #[test]
    fn unresolved_ids_report_id_and_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = ModuleResolver::new();
        let err = resolver.resolve_sync("./missing", dir.path()).unwrap_err();
        match err {
            CompileError::Resolution { id, base } => {
                assert_eq!(id, "./missing");
                assert!(base.contains(dir.path().to_str().unwrap()));
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_alias_keeps_first_binding() {
        let mut resolver = ModuleResolver::new();
        resolver.set_alias("@react", PathBuf::from("/a/ReactWX.js"));
        resolver.set_alias("@react", PathBuf::from("/b/ReactWX.js"));
        let rt = runtime();
        let hit = rt
            .block_on(resolver.resolve("@react", Path::new("/anywhere")))
            .unwrap();
        assert_eq!(hit, PathBuf::from("/a/ReactWX.js"));
    }
}
