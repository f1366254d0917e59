//! Build orchestration.
//!
//! The builder owns the resolver, the uid generator and the resource graph.
//! Starting from the app entry it discovers dependencies wave by wave:
//! every wave's file reads fan out concurrently, then each resource is
//! compiled exclusively; no two transform passes ever touch one resource
//! at the same time. Discovery requests resolve through the resolver,
//! classify by the source layout convention and dedupe against the graph,
//! so recursion terminates on the absolute path. After the frontier drains,
//! everything that reached `Emit` is written and the error sweep builds the
//! report.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::cache::{ArtifactCache, CachedArtifacts};
use crate::component::{
    classify_import, collect_module_imports, emit_script, extract_unit, rewrite_plain_module,
    EmitEnv, ImportDisposition, Registration,
};
use crate::config_eval::normalize_page_config;
use crate::error::{BuildReport, CompileError};
use crate::platform::Platform;
use crate::resolver::{normalize_path, ModuleResolver};
use crate::resource::{Resource, ResourceKind, ResourceState};
use crate::style::{resolve_imports, PassthroughPreprocessor, StylePreprocessor};
use crate::uid::UidGenerator;

const APP_ENTRY_FILE: &str = "app.js";
const SOURCE_DIR: &str = "source";
const RUNTIME_PACKAGE: &str = "kaleido-runtime";

/// Process-exit seam for the CLI collaborator; invoked on fatal failures.
pub trait ExitHook {
    fn exit(&self, code: i32);
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub project_root: PathBuf,
    pub platform: Platform,
    /// Destination root name under the project root.
    pub dest_dir: String,
    /// Enables the on-disk artifact cache.
    pub cache: bool,
}

impl BuildOptions {
    pub fn new(project_root: impl Into<PathBuf>, platform: Platform) -> Self {
        BuildOptions {
            project_root: project_root.into(),
            platform,
            dest_dir: "dist".to_string(),
            cache: false,
        }
    }
}

pub struct Builder {
    options: BuildOptions,
    resolver: ModuleResolver,
    uids: UidGenerator,
    graph: BTreeMap<PathBuf, Resource>,
    cache: Option<ArtifactCache>,
    style_preprocessor: Box<dyn StylePreprocessor>,
    exit_hook: Option<Box<dyn ExitHook>>,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Self {
        let cache = options
            .cache
            .then(|| ArtifactCache::new(&options.project_root, options.platform));
        Builder {
            options,
            resolver: ModuleResolver::new(),
            uids: UidGenerator::new(),
            graph: BTreeMap::new(),
            cache,
            style_preprocessor: Box::new(PassthroughPreprocessor),
            exit_hook: None,
        }
    }

    pub fn with_style_preprocessor(mut self, preprocessor: Box<dyn StylePreprocessor>) -> Self {
        self.style_preprocessor = preprocessor;
        self
    }

    pub fn with_exit_hook(mut self, hook: Box<dyn ExitHook>) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    fn source_dir(&self) -> PathBuf {
        self.options.project_root.join(SOURCE_DIR)
    }

    fn dest_root(&self) -> PathBuf {
        self.options.project_root.join(&self.options.dest_dir)
    }

    fn app_entry(&self) -> PathBuf {
        self.source_dir().join(APP_ENTRY_FILE)
    }

    fn runtime_dest(&self) -> PathBuf {
        self.dest_root()
            .join(self.options.platform.row().runtime_file)
    }

    /// Destination path: the source path re-rooted under the destination,
    /// extension swapped per platform. Resources living outside the source
    /// tree (the runtime package) land at the destination root.
    fn dest_path(&self, source_path: &Path, kind: ResourceKind) -> PathBuf {
        let row = self.options.platform.row();
        if kind == ResourceKind::RuntimeLibrary {
            return self.runtime_dest();
        }
        let rel = source_path
            .strip_prefix(self.source_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(source_path.file_name().unwrap_or_default()));
        let mut dest = self.dest_root().join(rel);
        let ext = match kind {
            ResourceKind::App
            | ResourceKind::Page
            | ResourceKind::Component
            | ResourceKind::PlainScript => Some(row.script_ext),
            ResourceKind::Style => Some(row.style_ext),
            ResourceKind::Template => Some(row.template_ext),
            ResourceKind::Config => Some(".json"),
            ResourceKind::Binary | ResourceKind::RuntimeLibrary => None,
        };
        if let Some(ext) = ext {
            dest.set_extension(ext.trim_start_matches('.'));
        }
        dest
    }

    /// Layout convention: `source/pages/**` are pages, `source/components/**`
    /// are components, styles and binaries by extension, anything else is a
    /// plain module.
    fn classify_path(&self, path: &Path) -> ResourceKind {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "scss" | "sass" | "less" | "css" => ResourceKind::Style,
            "js" | "jsx" | "mjs" => {
                let row = self.options.platform.row();
                if path == self.app_entry() {
                    ResourceKind::App
                } else if path.file_name().and_then(|n| n.to_str()) == Some(row.runtime_file) {
                    ResourceKind::RuntimeLibrary
                } else if path.starts_with(self.source_dir().join("pages")) {
                    ResourceKind::Page
                } else if path.starts_with(self.source_dir().join("components")) {
                    ResourceKind::Component
                } else {
                    ResourceKind::PlainScript
                }
            }
            _ => ResourceKind::Binary,
        }
    }

    /// Register a resource for processing. A second registration of the
    /// same absolute path is a no-op and the graph keeps the first
    /// instance.
    fn schedule(&mut self, source_path: &Path, kind: ResourceKind) -> Option<PathBuf> {
        if self.graph.contains_key(source_path) {
            return None;
        }
        let dest = self.dest_path(source_path, kind);
        self.graph.insert(
            source_path.to_path_buf(),
            Resource::new(source_path.to_path_buf(), dest, kind),
        );
        Some(source_path.to_path_buf())
    }

    async fn schedule_runtime(&mut self) -> Option<PathBuf> {
        let location = self
            .resolver
            .resolve("@react", &self.source_dir())
            .await
            .ok()?;
        self.schedule(&location, ResourceKind::RuntimeLibrary)
    }

    async fn register_aliases(&mut self) {
        let row = self.options.platform.row();
        let packaged = self
            .options
            .project_root
            .join("node_modules")
            .join(RUNTIME_PACKAGE)
            .join("runtime")
            .join(row.runtime_file);
        let runtime = if tokio::fs::try_exists(&packaged).await.unwrap_or(false) {
            packaged
        } else {
            self.source_dir().join(row.runtime_file)
        };
        self.resolver.set_alias("@react", runtime);
        self.resolver
            .set_alias("@components", self.source_dir().join("components"));
    }

    /// Run the whole build. `Err` is reserved for fatal failures; ordinary
    /// per-resource errors surface in the report.
    pub async fn build(&mut self) -> Result<BuildReport, CompileError> {
        let entry = self.app_entry();
        if !tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            let err = CompileError::MissingEntry(entry);
            error!(%err, "fatal");
            if let Some(hook) = &self.exit_hook {
                hook.exit(-1);
            }
            return Err(err);
        }

        self.register_aliases().await;

        self.schedule(&entry, ResourceKind::App);
        let mut pending = vec![entry];

        while !pending.is_empty() {
            let batch: Vec<PathBuf> = std::mem::take(&mut pending);
            let mut wave: Vec<Resource> = batch
                .iter()
                .filter_map(|path| self.graph.remove(path))
                .collect();

            // I/O fans out; transforms below run one resource at a time.
            join_all(wave.iter_mut().map(|resource| resource.read())).await;

            for mut resource in wave {
                if resource.state == ResourceState::Read {
                    let discovered = self.process_resource(&mut resource).await;
                    pending.extend(discovered);
                }
                self.graph.insert(resource.source_path.clone(), resource);
            }
        }

        let mut writable: Vec<&mut Resource> = self.graph.values_mut().collect();
        join_all(writable.iter_mut().map(|resource| resource.write())).await;

        let mut report = BuildReport::default();
        for resource in self.graph.values() {
            match resource.state {
                ResourceState::Emitted => report.emitted.push(resource.dest_path.clone()),
                ResourceState::Error | ResourceState::FatalError => {
                    let message = resource
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".to_string());
                    report.record_failure(&resource.source_path, message);
                }
                _ => {}
            }
        }
        info!(
            emitted = report.emitted.len(),
            failed = report.failures.len(),
            "build finished"
        );
        Ok(report)
    }

    async fn process_resource(&mut self, resource: &mut Resource) -> Vec<PathBuf> {
        debug!(path = %resource.source_path.display(), kind = ?resource.kind, "processing");
        match resource.kind {
            ResourceKind::App | ResourceKind::Page | ResourceKind::Component => {
                self.process_unit(resource).await
            }
            ResourceKind::PlainScript => self.process_plain(resource).await,
            ResourceKind::Style => {
                self.process_style(resource);
                Vec::new()
            }
            ResourceKind::Binary | ResourceKind::RuntimeLibrary => {
                resource.mark_emit();
                Vec::new()
            }
            ResourceKind::Template | ResourceKind::Config => Vec::new(),
        }
    }

    // ── component / page / app units ────────────────────────────────────────

    async fn process_unit(&mut self, resource: &mut Resource) -> Vec<PathBuf> {
        let mut discovered = Vec::new();
        let Some(source) = resource.utf8().map(str::to_string) else {
            resource.fail(CompileError::shape("source is not valid UTF-8", 1));
            return discovered;
        };
        let row = self.options.platform.row();
        let is_app = resource.kind == ResourceKind::App;
        let base = resource
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let dest_dir = resource
            .dest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        // Cached artifacts skip the transform but replay discovery.
        let cache_hit = if is_app {
            None
        } else {
            self.cache
                .as_ref()
                .and_then(|cache| cache.get(&resource.source_path, resource.bytes()))
        };
        if let Some(hit) = cache_hit {
            for id in &hit.deps {
                if id == "@react" {
                    discovered.extend(self.schedule_runtime().await);
                    continue;
                }
                if let Ok(location) = self.resolver.resolve(id, &base).await {
                    let kind = self.classify_path(&location);
                    discovered.extend(self.schedule(&location, kind));
                }
            }
            self.spawn_unit_artifacts(resource, hit.template, hit.config);
            resource.finish(hit.script.into_bytes());
            return discovered;
        }

        let mut unit = match extract_unit(&source, row, &mut self.uids, !is_app) {
            Ok(unit) => unit,
            Err(e) => {
                resource.fail(e);
                return discovered;
            }
        };

        let mut errors: Vec<CompileError> = std::mem::take(&mut unit.errors);
        let mut kept_imports = Vec::new();
        let mut component_locations: HashMap<String, PathBuf> = HashMap::new();
        let mut pages: Vec<String> = Vec::new();

        for record in &unit.imports {
            let disposition = classify_import(record, is_app, unit.superclass.as_deref());
            if disposition == ImportDisposition::Runtime {
                discovered.extend(self.schedule_runtime().await);
                continue;
            }
            match self.resolver.resolve(&record.id, &base).await {
                Ok(location) => {
                    let kind = match disposition {
                        ImportDisposition::Style => ResourceKind::Style,
                        ImportDisposition::PageEntry => ResourceKind::Page,
                        _ => self.classify_path(&location),
                    };
                    discovered.extend(self.schedule(&location, kind));
                    match disposition {
                        ImportDisposition::PageEntry => {
                            pages.push(record.id.trim_start_matches("./").to_string());
                        }
                        ImportDisposition::SubComponent => {
                            if let Some(local) = &record.default_local {
                                component_locations.insert(local.clone(), location.clone());
                            }
                        }
                        ImportDisposition::KeepAlias => {
                            let target = self.dest_path(&location, kind);
                            kept_imports
                                .push(record.with_source(&relative_id(&dest_dir, &target)));
                        }
                        ImportDisposition::Keep => kept_imports.push(record.text.clone()),
                        _ => {}
                    }
                }
                // The edge is dropped; sibling edges continue.
                Err(e) => errors.push(e),
            }
        }

        let mut config = unit.config.clone();
        if is_app {
            config.insert(
                "pages".to_string(),
                Value::Array(pages.iter().cloned().map(Value::String).collect()),
            );
            for id in tab_bar_icon_ids(&config, row.env_id) {
                match self.resolver.resolve(&id, &base).await {
                    Ok(location) => {
                        discovered.extend(self.schedule(&location, ResourceKind::Binary));
                    }
                    Err(e) => errors.push(e),
                }
            }
        }

        // The template's config side effect: referenced sub-components land
        // in `usingComponents` with their compiled relative paths.
        let mut using = Map::new();
        for name in &unit.components_used {
            match component_locations.get(name) {
                Some(location) => {
                    let target = self
                        .dest_path(location, ResourceKind::Component)
                        .with_extension("");
                    using.insert(
                        name.clone(),
                        Value::String(relative_id(&dest_dir, &target)),
                    );
                }
                None => errors.push(CompileError::shape(
                    format!("component `{}` is not imported", name),
                    1,
                )),
            }
        }

        if !errors.is_empty() {
            for extra in errors.iter().skip(1) {
                warn!(path = %resource.source_path.display(), error = %extra, "additional error");
            }
            resource.fail(errors.swap_remove(0));
            return discovered;
        }

        let registration = match resource.kind {
            ResourceKind::App => Registration::App,
            ResourceKind::Page => Registration::Page(self.source_relative(&resource.source_path)),
            _ => Registration::Component,
        };
        let env = EmitEnv {
            runtime_id: relative_id(&dest_dir, &self.runtime_dest()),
            kept_imports,
            registration,
            env_id: row.env_id,
        };
        let script = emit_script(&unit, &env);

        let config_map = match resource.kind {
            ResourceKind::App => Some(config),
            ResourceKind::Page => {
                normalize_page_config(&mut config);
                if !using.is_empty() {
                    config.insert("usingComponents".to_string(), Value::Object(using));
                }
                Some(config)
            }
            _ => {
                let mut component_config = Map::new();
                component_config.insert("component".to_string(), Value::Bool(true));
                if !using.is_empty() {
                    component_config.insert("usingComponents".to_string(), Value::Object(using));
                }
                Some(component_config)
            }
        };
        let config_json = config_map.map(|map| {
            serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_else(|_| "{}".to_string())
        });
        let template = if is_app { None } else { unit.template.clone() };

        self.spawn_unit_artifacts(resource, template.clone(), config_json.clone());

        if !is_app {
            if let Some(cache) = &self.cache {
                cache.set(
                    &resource.source_path,
                    resource.bytes(),
                    CachedArtifacts {
                        script: script.clone(),
                        template,
                        config: config_json,
                        deps: unit.imports.iter().map(|r| r.id.clone()).collect(),
                    },
                );
            }
        }

        resource.finish(script.into_bytes());
        discovered
    }

    /// Spawn the derived template/config resources next to their creator.
    fn spawn_unit_artifacts(
        &mut self,
        resource: &Resource,
        template: Option<String>,
        config_json: Option<String>,
    ) {
        let row = self.options.platform.row();
        if let Some(markup) = template {
            let source = resource
                .source_path
                .with_extension(row.template_ext.trim_start_matches('.'));
            let dest = resource
                .dest_path
                .with_extension(row.template_ext.trim_start_matches('.'));
            if !self.graph.contains_key(&source) {
                self.graph.insert(
                    source.clone(),
                    Resource::derived(
                        source,
                        dest,
                        ResourceKind::Template,
                        &resource.source_path,
                        markup,
                    ),
                );
            }
        }
        if let Some(json) = config_json {
            let source = resource.source_path.with_extension("json");
            let dest = resource.dest_path.with_extension("json");
            if !self.graph.contains_key(&source) {
                self.graph.insert(
                    source.clone(),
                    Resource::derived(
                        source,
                        dest,
                        ResourceKind::Config,
                        &resource.source_path,
                        json,
                    ),
                );
            }
        }
    }

    // ── plain modules ───────────────────────────────────────────────────────

    async fn process_plain(&mut self, resource: &mut Resource) -> Vec<PathBuf> {
        let mut discovered = Vec::new();
        let Some(source) = resource.utf8().map(str::to_string) else {
            resource.fail(CompileError::shape("source is not valid UTF-8", 1));
            return discovered;
        };
        let ids = match collect_module_imports(&source) {
            Ok(ids) => ids,
            Err(e) => {
                resource.fail(e);
                return discovered;
            }
        };
        let base = resource
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let dest_dir = resource
            .dest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut replacements = HashMap::new();
        let mut errors = Vec::new();
        for id in &ids {
            if id == "@react" {
                discovered.extend(self.schedule_runtime().await);
                replacements.insert(id.clone(), relative_id(&dest_dir, &self.runtime_dest()));
                continue;
            }
            match self.resolver.resolve(id, &base).await {
                Ok(location) => {
                    let kind = self.classify_path(&location);
                    discovered.extend(self.schedule(&location, kind));
                    if id.starts_with('@') {
                        let target = self.dest_path(&location, kind);
                        replacements.insert(id.clone(), relative_id(&dest_dir, &target));
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            resource.fail(errors.swap_remove(0));
            return discovered;
        }
        let env_id = self.options.platform.row().env_id;
        match rewrite_plain_module(&source, &replacements, env_id) {
            Ok(out) => resource.finish(out.into_bytes()),
            Err(e) => resource.fail(e),
        }
        discovered
    }

    // ── styles ──────────────────────────────────────────────────────────────

    fn process_style(&mut self, resource: &mut Resource) {
        let Some(source) = resource.utf8().map(str::to_string) else {
            resource.fail(CompileError::shape("source is not valid UTF-8", 1));
            return;
        };
        let path = resource.source_path.clone();
        let (css, mut errors) = resolve_imports(&source, &path, &mut self.resolver);
        if !errors.is_empty() {
            resource.fail(errors.swap_remove(0));
            return;
        }
        match self.style_preprocessor.process(&css, &path) {
            Ok(out) => resource.finish(out.into_bytes()),
            Err(e) => resource.fail(e),
        }
    }

    fn source_relative(&self, path: &Path) -> String {
        path.strip_prefix(self.source_dir())
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// App `tabBar` icon ids, platform list first, normalized to relative form.
fn tab_bar_icon_ids(config: &Map<String, Value>, env_id: &str) -> Vec<String> {
    let Some(Value::Object(tab_bar)) = config.get("tabBar") else {
        return Vec::new();
    };
    let list = tab_bar
        .get(&format!("{}List", env_id))
        .or_else(|| tab_bar.get("list"));
    let Some(Value::Array(items)) = list else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    for item in items {
        for key in ["iconPath", "selectedIconPath"] {
            if let Some(Value::String(id)) = item.get(key) {
                let id = if let Some(rest) = id.strip_prefix('/') {
                    format!("./{}", rest)
                } else if !id.starts_with('.') {
                    format!("./{}", id)
                } else {
                    id.clone()
                };
                ids.push(id);
            }
        }
    }
    ids
}

/// Relative import id from one destination directory to a target path.
pub(crate) fn relative_id(from_dir: &Path, to: &Path) -> String {
    let from: Vec<String> = normalize_path(from_dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let to: Vec<String> = normalize_path(to)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(to[common..].iter().cloned());
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{}", joined)
    }
}
