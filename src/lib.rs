//! # Lumen SSR
//!
//! Component-to-render pipeline for the Lumen static site builder.
//!
//! The pipeline bundles single-file component sources into executable
//! modules, maps bundle output back to logical component identities, tracks
//! per-component CSS, builds a nested route tree with inherited
//! permalink/pagination data, and server-renders pages against that tree.
//!
//! The pipeline core never compiles, loads, aggregates CSS, or renders by
//! itself. Those concerns live behind collaborator traits supplied by the
//! host build orchestrator:
//!
//! - [`Compiler`] — bundles component sources into chunks
//! - [`ModuleLoader`] — loads one compiled module from disk
//! - [`CssRegistry`] — aggregates component CSS for final page assembly
//! - [`SsrRuntime`] / [`RouterCapability`] — rendering and path substitution
//!
//! A compile failure aborts the whole build step; there is no partial or
//! degraded mode.

pub mod bundle;
pub mod css;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod routes;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use bundle::{
    BundleOrchestrator, ChunkNamer, Compiler, CompilerArtifacts, EmittedChunk, RoutesChunkBuild,
};
pub use css::{CssLedger, CssRegistry};
pub use paths::PathResolver;
pub use pipeline::{ComponentPipeline, PageOutput, PipelineCollaborators, PipelineConfig};
pub use registry::{ComponentRegistry, ModuleLoader};
pub use render::{RenderEngine, RouteRecord, RouterCapability, SsrApp, SsrRuntime};
pub use routes::{
    ComponentRefDescriptor, MergedRouteData, PermalinkSpec, RouteComponentRef, RouteDescriptor,
    RouteNode, RouteTree,
};

/// Boxed future used at dyn-compatible collaborator seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Logical component identity
// ---------------------------------------------------------------------------

/// Working-directory-relative identity of one component source.
///
/// Derived deterministically from an absolute source path by stripping the
/// working-directory prefix (the path is kept verbatim when the prefix is
/// absent) and truncating after the component file extension. Stable across
/// rebuilds; the identity key for every mapping in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPath(String);

impl LogicalPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Compiled module shapes
// ---------------------------------------------------------------------------

/// A facade-bearing compiler chunk, after orchestrator filtering.
///
/// Superseded (not merged) by the next build of the same source.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledOutput {
    /// Emitted output file name, relative to the cache directory.
    pub file_name: String,
    /// The originating component source file.
    pub facade: PathBuf,
    /// Output file names of statically imported chunks.
    pub imports: Vec<String>,
}

/// Raw exports of one loaded compiled module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedModule {
    pub default_export: Value,
    /// Chunked route components expose their component under a `script`
    /// sub-export instead of the default export.
    pub script_export: Option<Value>,
}

/// A loaded component together with its logical identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentModule {
    pub source: LogicalPath,
    pub export: Value,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Errors that abort a build step or a page.
///
/// All variants bubble to the host orchestrator uncaught; the pipeline
/// performs no retries. A malformed route or missing mapping is an authoring
/// error, not a transient condition.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Compiler collaborator failure, propagated verbatim. Fatal to the
    /// current build pass; no partial output is accepted.
    #[error("compile failed: {0}")]
    Compile(#[source] anyhow::Error),

    /// Source discovery failure (invalid glob pattern or unreadable entry).
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A logical component has no recorded output mapping, or the mapped
    /// module cannot be loaded. Fatal for the page being processed only.
    #[error("failed to load component '{logical}': {reason}")]
    Load { logical: LogicalPath, reason: String },

    /// A permalink route-object targets a route node without a `name`.
    #[error("permalink route object targets a route without a name: {route_object}")]
    UnnamedRoute { route_object: Value },

    /// A permalink route-object references a component absent from the
    /// route tree.
    #[error("permalink route object references a component absent from the route tree: {route_object}")]
    UnreachableRoute { route_object: Value },

    /// Router collaborator failed to substitute parameters into a path.
    #[error("route resolution failed: {0}")]
    RouteResolve(#[source] anyhow::Error),

    /// SSR runtime failure, propagated verbatim.
    #[error("render failed: {0}")]
    Render(#[source] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
