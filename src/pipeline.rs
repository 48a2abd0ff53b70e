//! Pipeline facade.
//!
//! Wires the path resolver, CSS ledger, component registry, bundle
//! orchestrator and render engine together, and exposes the operations the
//! host build orchestrator drives:
//!
//! - [`ComponentPipeline::build`] / [`ComponentPipeline::build_routes`]
//! - [`ComponentPipeline::before_rebuild`] / [`ComponentPipeline::after_build`]
//! - [`ComponentPipeline::compile_page`]

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::bundle::{BundleOrchestrator, Compiler};
use crate::css::{CssLedger, CssRegistry};
use crate::paths::PathResolver;
use crate::registry::{ComponentRegistry, ModuleLoader};
use crate::render::{RenderEngine, RouterCapability, SsrRuntime};
use crate::routes::{self, PermalinkSpec, RouteDescriptor, RouteTree};
use crate::{LogicalPath, PipelineError};

/// Directory layout and component extension, as configured by the host.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub working_dir: PathBuf,
    /// Relative to `working_dir`.
    pub input_dir: PathBuf,
    /// Relative to `working_dir`.
    pub includes_dir: PathBuf,
    /// Relative to `working_dir`; compiled modules land here.
    pub cache_dir: PathBuf,
    /// Component file extension, with the leading dot (`.comp`).
    pub extension: String,
}

/// The external collaborators the pipeline delegates to.
pub struct PipelineCollaborators {
    pub compiler: Arc<dyn Compiler>,
    pub loader: Arc<dyn ModuleLoader>,
    pub runtime: Arc<dyn SsrRuntime>,
    pub router: Arc<dyn RouterCapability>,
    pub css_registry: Option<Arc<dyn CssRegistry>>,
}

/// What processing one page produced: a redirect to an already-final URL,
/// or rendered markup.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutput {
    Url(String),
    Html(String),
}

/// The component-to-render pipeline.
pub struct ComponentPipeline {
    extension: String,
    paths: Arc<PathResolver>,
    css: Arc<CssLedger>,
    registry: Arc<ComponentRegistry>,
    bundler: BundleOrchestrator,
    engine: RenderEngine,
    router: Arc<dyn RouterCapability>,
    loader: Arc<dyn ModuleLoader>,
    routes: RwLock<Arc<RouteTree>>,
}

impl ComponentPipeline {
    pub fn new(config: PipelineConfig, collaborators: PipelineCollaborators) -> Self {
        let paths = Arc::new(PathResolver::new(
            config.working_dir,
            &config.input_dir,
            &config.includes_dir,
            config.cache_dir,
        ));
        let css = Arc::new(CssLedger::new());
        if let Some(registry) = &collaborators.css_registry {
            css.set_registry(Arc::clone(registry));
        }

        let registry = Arc::new(ComponentRegistry::new(
            Arc::clone(&paths),
            Arc::clone(&css),
            Arc::clone(&collaborators.loader),
            config.extension.clone(),
        ));
        let bundler = BundleOrchestrator::new(
            Arc::clone(&paths),
            Arc::clone(&css),
            collaborators.compiler,
            config.extension.clone(),
        );
        let engine = RenderEngine::new(collaborators.runtime);

        Self {
            extension: config.extension,
            paths,
            css,
            registry,
            bundler,
            engine,
            router: collaborators.router,
            loader: collaborators.loader,
            routes: RwLock::new(Arc::new(RouteTree::default())),
        }
    }

    /// Compile component sources and record their identity mappings, CSS,
    /// and style relationships. `None` discovers every component under the
    /// input directory. Returns the number of components mapped.
    pub async fn build(&self, sources: Option<Vec<PathBuf>>) -> Result<usize, PipelineError> {
        let sources = match sources {
            Some(sources) => sources,
            None => self.bundler.discover(None)?,
        };
        let outputs = self.bundler.compile(&sources).await?;
        self.registry.create_from_outputs(&outputs);
        Ok(self.registry.write_count())
    }

    /// Routes-chunked build: compile, record identities from the chunk
    /// table, then load the routes entry module and build the route tree
    /// from its exported descriptor list.
    ///
    /// The routes entry must be the first source; its compiled module's
    /// default export is the descriptor list. No outputs means no routes.
    pub async fn build_routes(
        &self,
        sources: Option<Vec<PathBuf>>,
    ) -> Result<usize, PipelineError> {
        let sources = match sources {
            Some(sources) => sources,
            None => self.bundler.discover(None)?,
        };
        let build = self.bundler.compile_routes_chunked(&sources).await?;
        self.registry
            .create_from_chunk_map(&build.chunk_map, &build.chunk_imports);

        let Some(entry) = build.outputs.first() else {
            *self.routes.write().expect("route tree lock poisoned") =
                Arc::new(RouteTree::default());
            return Ok(self.registry.write_count());
        };

        let entry_logical = self.paths.to_logical_path(&entry.facade, &self.extension);
        let module = self
            .loader
            .load(&self.paths.to_output_path(&entry.file_name))
            .map_err(|e| PipelineError::Load {
                logical: entry_logical.clone(),
                reason: e.to_string(),
            })?;
        let descriptors: Vec<RouteDescriptor> = serde_json::from_value(module.default_export)
            .map_err(|e| PipelineError::Load {
                logical: entry_logical,
                reason: format!("routes export is not a route list: {e}"),
            })?;

        let tree = RouteTree::from_descriptors(&descriptors, &self.registry).await?;
        *self.routes.write().expect("route tree lock poisoned") = Arc::new(tree);
        Ok(self.registry.write_count())
    }

    /// Reset state before a rebuild.
    ///
    /// With a change list, only the listed sources' CSS entries and cached
    /// modules are purged. Without one, everything is: the CSS ledger, the
    /// external registry, and the whole module cache.
    pub fn before_rebuild(&self, changed: Option<&[PathBuf]>) {
        match changed {
            Some(changed) if !changed.is_empty() => {
                for source in changed {
                    let logical = self.paths.to_logical_path(source, &self.extension);
                    self.css.reset_one(&logical);
                    if let (Some(output), Some(registry)) =
                        (self.registry.output_for(&logical), self.css.registry())
                    {
                        registry.reset_one(&output);
                    }
                }
                self.registry.invalidate(changed);
                debug!(changed = changed.len(), "scoped rebuild reset");
            }
            _ => {
                self.css.reset();
                if let Some(registry) = self.css.registry() {
                    registry.reset_all();
                }
                self.registry.invalidate(&[]);
                debug!("full rebuild reset");
            }
        }
    }

    /// Report how many components the last build pass mapped.
    pub fn after_build(&self) -> usize {
        let count = self.registry.write_count();
        info!(components = count, "build pass finished");
        count
    }

    /// Process one page: short-circuit to a URL when its permalink already
    /// decides the output location, render to markup otherwise.
    pub async fn compile_page(
        &self,
        input_path: &Path,
        permalink: Option<&PermalinkSpec>,
        data: &Value,
        mixin: &Value,
        wrapper: Option<&Path>,
    ) -> Result<PageOutput, PipelineError> {
        let logical = self.paths.to_logical_path(input_path, &self.extension);

        match permalink {
            Some(PermalinkSpec::Literal(url)) => Ok(PageOutput::Url(url.clone())),
            Some(PermalinkSpec::Compute(f)) => match f(data) {
                Value::String(url) => Ok(PageOutput::Url(url)),
                object => self
                    .resolve_permalink_object(&logical, object, data)
                    .map(PageOutput::Url),
            },
            Some(PermalinkSpec::RouteObject(object)) => self
                .resolve_permalink_object(&logical, object.clone(), data)
                .map(PageOutput::Url),
            None => self.render_page(&logical, data, mixin, wrapper).await,
        }
    }

    /// The current route tree.
    pub fn routes(&self) -> Arc<RouteTree> {
        self.routes.read().expect("route tree lock poisoned").clone()
    }

    /// Resolve a route-object permalink against the page's own position in
    /// the route tree. Ancestor permalink params apply beneath the object's
    /// explicit ones.
    fn resolve_permalink_object(
        &self,
        logical: &LogicalPath,
        route_object: Value,
        data: &Value,
    ) -> Result<String, PipelineError> {
        let tree = self.routes();
        let chain = tree.find_path_to(logical);
        let merged = RouteTree::merge_ancestor_data(&chain, data);
        let effective = match merged.permalink {
            Some(base) => routes::merge_permalink(base, route_object),
            None => route_object,
        };
        RouteTree::resolve_route_object(&chain, &effective, self.router.as_ref())
    }

    async fn render_page(
        &self,
        logical: &LogicalPath,
        data: &Value,
        mixin: &Value,
        wrapper: Option<&Path>,
    ) -> Result<PageOutput, PipelineError> {
        let component = self.registry.load_component(logical)?;
        let wrapper = wrapper
            .map(|path| {
                let wrapper_logical = self.paths.to_logical_path(path, &self.extension);
                self.registry.load_component(&wrapper_logical)
            })
            .transpose()?;

        let tree = self.routes();
        let chain = tree.find_path_to(logical);
        let merged = RouteTree::merge_ancestor_data(&chain, data);

        let mut data = data.clone();
        if !merged.pagination.is_empty() {
            if let Value::Object(map) = &mut data {
                map.insert("pagination".into(), Value::Array(merged.pagination));
            }
        }

        let records = tree.flatten();
        let html = self
            .engine
            .render(&component, &data, mixin, wrapper.as_ref(), &records)
            .await?;
        Ok(PageOutput::Html(html))
    }
}
