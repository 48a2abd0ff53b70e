//! Server-side rendering.
//!
//! Every page render builds a fresh application value: the page's component
//! (or its wrapper layout) as root, the flattened route records, the
//! document URL, and the page's data context exposed through the
//! `$page_data` channel. Nothing is shared between renders, so one page's
//! state can never leak into another's markup.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{BoxFuture, ComponentModule, LogicalPath, PipelineError};

/// Router collaborator: substitutes `params` into the named route's path
/// pattern.
pub trait RouterCapability: Send + Sync {
    fn resolve(&self, name: &str, params: &Value) -> anyhow::Result<String>;
}

/// SSR runtime collaborator: renders one application to markup.
pub trait SsrRuntime: Send + Sync {
    fn render_to_string<'a>(&'a self, app: &'a SsrApp) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// One flattened route, as handed to the SSR application.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecord {
    pub path: String,
    pub name: Option<String>,
    pub source: LogicalPath,
    pub component: Value,
}

/// Everything the runtime needs to render one page. Built per render and
/// discarded afterwards.
#[derive(Debug, Clone)]
pub struct SsrApp {
    /// Root component export: the page's wrapper layout when one exists,
    /// the page component itself otherwise.
    pub root: Value,
    pub routes: Vec<RouteRecord>,
    /// Document URL the router is navigated to before rendering.
    pub url: String,
    /// Page data context, exposed to components as `$page_data`.
    pub page_data: Value,
    /// Host-supplied mixin merged into every component instance.
    pub mixin: Value,
}

/// Drives the SSR runtime collaborator.
pub struct RenderEngine {
    runtime: Arc<dyn SsrRuntime>,
}

impl RenderEngine {
    pub fn new(runtime: Arc<dyn SsrRuntime>) -> Self {
        Self { runtime }
    }

    /// Render one page to markup.
    ///
    /// The URL comes from `data.page.url`; absent that, the router is
    /// navigated to `/`.
    pub async fn render(
        &self,
        component: &ComponentModule,
        data: &Value,
        mixin: &Value,
        wrapper: Option<&ComponentModule>,
        routes: &[RouteRecord],
    ) -> Result<String, PipelineError> {
        let root = wrapper.unwrap_or(component).export.clone();
        let url = data
            .pointer("/page/url")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        debug!(%url, source = %component.source, "rendering page");

        let app = SsrApp {
            root,
            routes: routes.to_vec(),
            url,
            page_data: data.clone(),
            mixin: mixin.clone(),
        };
        self.runtime
            .render_to_string(&app)
            .await
            .map_err(PipelineError::Render)
    }
}
