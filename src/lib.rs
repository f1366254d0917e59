//! kaleido compiles one JSX component source tree into parallel output
//! trees for the mini-program runtime platforms.
//!
//! For every source unit the build derives three coupled artifacts: a
//! script that registers the component with the platform runtime, a
//! declarative template in the platform's markup dialect, and a JSON
//! configuration object. The pipeline is deterministic: one source tree and
//! one platform selector always re-derive the same outputs.
//!
//! The crate is the compilation core. The CLI front end, project
//! scaffolding and remote template retrieval are external collaborators
//! that drive [`builder::Builder`] through [`builder::BuildOptions`] and
//! the [`builder::ExitHook`] seam.

mod builder;
mod cache;
mod component;
mod config_eval;
mod error;
mod platform;
mod resolver;
mod resource;
mod style;
mod template;
mod uid;

pub use builder::{BuildOptions, Builder, ExitHook};
pub use cache::{ArtifactCache, CachedArtifacts};
pub use component::{
    ExtractedUnit, ImportDisposition, ImportRecord, ObjectEntry, Registration, ENV_EXPRESSION,
};
pub use config_eval::{evaluate_config, evaluate_literal};
pub use error::{BuildReport, CompileError, FailureBlock};
pub use platform::{Platform, PlatformRow};
pub use resolver::ModuleResolver;
pub use resource::{Resource, ResourceKind, ResourceState};
pub use style::{PassthroughPreprocessor, StylePreprocessor};
pub use template::{
    AttributeValue, ConditionalBranch, ElementNode, LoopNode, TemplateAttribute, TemplateNode,
};
pub use uid::UidGenerator;

#[cfg(test)]
mod pipeline_tests;
