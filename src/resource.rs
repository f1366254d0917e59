//! The resource model: one physical output-producing unit tracked through a
//! lifecycle state machine.
//!
//! States move one way, `Ready → Read → Emit → Emitted`, and the error
//! states are terminal. A resource is owned by the builder's graph, keyed by
//! absolute source path, and is only ever mutated by its own processing
//! pass.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    Ready,
    Read,
    Emit,
    Emitted,
    Error,
    FatalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    App,
    Page,
    Component,
    PlainScript,
    RuntimeLibrary,
    Style,
    Binary,
    /// Declarative markup derived from a script resource.
    Template,
    /// JSON configuration derived from a script resource.
    Config,
}

impl ResourceKind {
    /// Derived resources are spawned in `Emit` by their creator and never
    /// enter the discovery frontier.
    pub fn is_derived(self) -> bool {
        matches!(self, ResourceKind::Template | ResourceKind::Config)
    }
}

#[derive(Debug)]
pub struct Resource {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub error: Option<CompileError>,
    /// Raw byte buffer: source bytes after `read()`, output bytes once the
    /// processing pass finalizes them.
    data: Vec<u8>,
    /// Non-owning back-reference to the resource whose processing spawned
    /// this one, stored as a path and resolved through the graph.
    pub creator: Option<PathBuf>,
}

impl Resource {
    pub fn new(source_path: PathBuf, dest_path: PathBuf, kind: ResourceKind) -> Self {
        Resource {
            source_path,
            dest_path,
            kind,
            state: ResourceState::Ready,
            error: None,
            data: Vec::new(),
            creator: None,
        }
    }

    /// A resource produced by another resource's processing pass; enters
    /// the graph ready to write.
    pub fn derived(
        source_path: PathBuf,
        dest_path: PathBuf,
        kind: ResourceKind,
        creator: &Path,
        content: String,
    ) -> Self {
        Resource {
            source_path,
            dest_path,
            kind,
            state: ResourceState::Emit,
            error: None,
            data: content.into_bytes(),
            creator: Some(creator.to_path_buf()),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Replace the buffer with finalized output content and move to `Emit`.
    pub fn finish(&mut self, content: Vec<u8>) {
        self.data = content;
        self.state = ResourceState::Emit;
    }

    /// Promote the buffer as-is (opaque byte copies: binaries, the runtime
    /// library).
    pub fn mark_emit(&mut self) {
        if self.state == ResourceState::Read {
            self.state = ResourceState::Emit;
        }
    }

    /// Record a failure. Fatal errors are sticky at the fatal level; an
    /// already-terminal resource keeps its first error.
    pub fn fail(&mut self, error: CompileError) {
        if matches!(
            self.state,
            ResourceState::Error | ResourceState::FatalError
        ) {
            return;
        }
        self.state = if error.is_fatal() {
            ResourceState::FatalError
        } else {
            ResourceState::Error
        };
        self.error = Some(error);
    }

    pub async fn read(&mut self) {
        if self.state != ResourceState::Ready {
            return;
        }
        match tokio::fs::read(&self.source_path).await {
            Ok(bytes) => {
                self.data = bytes;
                self.state = ResourceState::Read;
            }
            Err(e) => self.fail(CompileError::Io(e)),
        }
    }

    /// Writing is a no-op unless the resource reached `Emit`.
    pub async fn write(&mut self) {
        if self.state != ResourceState::Emit {
            return;
        }
        if let Some(parent) = self.dest_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.fail(CompileError::Io(e));
                return;
            }
        }
        match tokio::fs::write(&self.dest_path, &self.data).await {
            Ok(()) => {
                debug!(dest = %self.dest_path.display(), "emitted");
                self.state = ResourceState::Emitted;
            }
            Err(e) => self.fail(CompileError::Io(e)),
        }
    }
}
