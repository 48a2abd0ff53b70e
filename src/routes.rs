//! Route tree and inherited route data.
//!
//! Routes arrive as a nested descriptor list exported by the compiled routes
//! module. Each node references a component either directly or through a
//! lazy loader; lazy references are resolved eagerly when the tree is built
//! so later passes see a uniform tree.
//!
//! The tree also answers data-cascade questions: given the component a page
//! was authored with, which ancestor chain owns it, and what permalink and
//! pagination data does that chain contribute.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::registry::ComponentRegistry;
use crate::render::{RouteRecord, RouterCapability};
use crate::{BoxFuture, ComponentModule, LogicalPath, PipelineError};

// ---------------------------------------------------------------------------
// Component references
// ---------------------------------------------------------------------------

type LazyComponent =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ComponentModule, PipelineError>> + Send + Sync>;

/// A route's component: already loaded, or a deferred loader.
#[derive(Clone)]
pub enum RouteComponentRef {
    Direct(ComponentModule),
    Lazy(LazyComponent),
}

impl RouteComponentRef {
    /// The loaded component, when this reference has been resolved.
    pub fn as_direct(&self) -> Option<&ComponentModule> {
        match self {
            Self::Direct(module) => Some(module),
            Self::Lazy(_) => None,
        }
    }
}

impl fmt::Debug for RouteComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(module) => f.debug_tuple("Direct").field(&module.source).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Permalinks
// ---------------------------------------------------------------------------

type PermalinkFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// How a route or page declares its output location.
#[derive(Clone)]
pub enum PermalinkSpec {
    /// A ready URL string, used verbatim.
    Literal(String),
    /// A named-route reference with optional `params`, resolved against the
    /// route tree.
    RouteObject(Value),
    /// Host-supplied callback evaluated against the page's data context.
    Compute(PermalinkFn),
}

impl PermalinkSpec {
    /// Lift a descriptor value: strings are literals, everything else is a
    /// route object.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(url) => Self::Literal(url),
            other => Self::RouteObject(other),
        }
    }

    pub fn evaluate(&self, data: &Value) -> Value {
        match self {
            Self::Literal(url) => Value::String(url.clone()),
            Self::RouteObject(object) => object.clone(),
            Self::Compute(f) => f(data),
        }
    }
}

impl fmt::Debug for PermalinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(url) => f.debug_tuple("Literal").field(url).finish(),
            Self::RouteObject(object) => f.debug_tuple("RouteObject").field(object).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// One node of the route tree.
#[derive(Debug, Clone)]
pub struct RouteNode {
    pub path: String,
    pub name: Option<String>,
    pub component: RouteComponentRef,
    pub permalink: Option<PermalinkSpec>,
    pub pagination: Option<Value>,
    pub children: Vec<RouteNode>,
}

/// The full nested route tree for one build.
#[derive(Debug, Clone, Default)]
pub struct RouteTree {
    pub roots: Vec<RouteNode>,
}

/// Route data contributed by an ancestor chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedRouteData {
    pub permalink: Option<Value>,
    /// Pagination blocks in chain order, ancestors first. Duplicates are
    /// kept; every block in the chain applies.
    pub pagination: Vec<Value>,
}

impl RouteTree {
    /// Build the tree from deserialized descriptors, loading direct
    /// components through the registry and resolving every lazy reference
    /// eagerly.
    pub async fn from_descriptors(
        descriptors: &[RouteDescriptor],
        registry: &Arc<ComponentRegistry>,
    ) -> Result<Self, PipelineError> {
        let mut roots = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let node = node_from_descriptor(descriptor, registry)?;
            roots.push(resolve_async_children(node).await?);
        }
        debug!(roots = roots.len(), "built route tree");
        Ok(Self { roots })
    }

    /// The ancestor chain (root first, owner last) of the node whose
    /// component was authored at `target`. Empty when no node matches.
    pub fn find_path_to(&self, target: &LogicalPath) -> Vec<&RouteNode> {
        for root in &self.roots {
            let mut chain = Vec::new();
            if find_in(root, target, &mut chain) {
                return chain;
            }
        }
        Vec::new()
    }

    /// Fold the chain's route data, ancestors first.
    ///
    /// Pagination blocks concatenate. Permalinks merge shallowly with the
    /// descendant winning per key; `params` sub-objects merge the same way,
    /// so an ancestor's parameter survives unless a descendant re-declares
    /// it.
    pub fn merge_ancestor_data(chain: &[&RouteNode], data: &Value) -> MergedRouteData {
        let mut merged = MergedRouteData::default();
        for node in chain {
            if let Some(pagination) = &node.pagination {
                merged.pagination.push(pagination.clone());
            }
            if let Some(spec) = &node.permalink {
                let next = spec.evaluate(data);
                merged.permalink = Some(match merged.permalink.take() {
                    Some(base) => merge_permalink(base, next),
                    None => next,
                });
            }
        }
        merged
    }

    /// Turn a route-object permalink into a final document URL.
    ///
    /// The deepest node of `chain` supplies the route name; its absence is
    /// an authoring error, as is an empty chain. The router substitutes the
    /// object's `params` into the named route's path, and bare directory
    /// paths are rewritten to their index document.
    pub fn resolve_route_object(
        chain: &[&RouteNode],
        route_object: &Value,
        router: &dyn RouterCapability,
    ) -> Result<String, PipelineError> {
        let deepest = chain.last().ok_or_else(|| PipelineError::UnreachableRoute {
            route_object: route_object.clone(),
        })?;
        let name = deepest
            .name
            .as_deref()
            .ok_or_else(|| PipelineError::UnnamedRoute {
                route_object: route_object.clone(),
            })?;

        let params = route_object
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let path = router
            .resolve(name, &params)
            .map_err(PipelineError::RouteResolve)?;
        Ok(ensure_index_document(path))
    }

    /// Flatten to the record list handed to the SSR application. Lazy
    /// references are skipped; a tree built through
    /// [`Self::from_descriptors`] has none.
    pub fn flatten(&self) -> Vec<RouteRecord> {
        let mut records = Vec::new();
        for root in &self.roots {
            flatten_into(root, &mut records);
        }
        records
    }
}

fn find_in<'a>(
    node: &'a RouteNode,
    target: &LogicalPath,
    chain: &mut Vec<&'a RouteNode>,
) -> bool {
    chain.push(node);
    if let Some(module) = node.component.as_direct() {
        if &module.source == target {
            return true;
        }
    }
    for child in &node.children {
        if find_in(child, target, chain) {
            return true;
        }
    }
    chain.pop();
    false
}

fn flatten_into(node: &RouteNode, records: &mut Vec<RouteRecord>) {
    if let Some(module) = node.component.as_direct() {
        records.push(RouteRecord {
            path: node.path.clone(),
            name: node.name.clone(),
            source: module.source.clone(),
            component: module.export.clone(),
        });
    }
    for child in &node.children {
        flatten_into(child, records);
    }
}

pub(crate) fn merge_permalink(base: Value, next: Value) -> Value {
    let (mut base_map, next_map) = match (base, next) {
        (Value::Object(base_map), Value::Object(next_map)) => (base_map, next_map),
        // A non-object permalink replaces whatever came before it.
        (_, next) => return next,
    };
    for (key, value) in next_map {
        if key == "params" {
            let merged_params = match (base_map.remove("params"), value) {
                (Some(Value::Object(mut base_params)), Value::Object(next_params)) => {
                    base_params.extend(next_params);
                    Value::Object(base_params)
                }
                (_, next_params) => next_params,
            };
            base_map.insert(key, merged_params);
        } else {
            base_map.insert(key, value);
        }
    }
    Value::Object(base_map)
}

/// Append `index.html` when the path's last segment names a directory
/// rather than a document.
fn ensure_index_document(path: String) -> String {
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if last.contains('.') {
        path
    } else if path.ends_with('/') {
        format!("{path}index.html")
    } else {
        format!("{path}/index.html")
    }
}

/// Resolve every lazy component reference in `node` and its descendants.
pub fn resolve_async_children(
    node: RouteNode,
) -> BoxFuture<'static, Result<RouteNode, PipelineError>> {
    Box::pin(async move {
        let RouteNode {
            path,
            name,
            component,
            permalink,
            pagination,
            children,
        } = node;

        let component = match component {
            RouteComponentRef::Lazy(loader) => RouteComponentRef::Direct(loader().await?),
            direct @ RouteComponentRef::Direct(_) => direct,
        };

        let mut resolved = Vec::with_capacity(children.len());
        for child in children {
            resolved.push(resolve_async_children(child).await?);
        }

        Ok(RouteNode {
            path,
            name,
            component,
            permalink,
            pagination,
            children: resolved,
        })
    })
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Component reference as it appears in the routes module export.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ComponentRefDescriptor {
    /// `{ "lazy": "./src/page.comp" }` defers loading to tree build time.
    Lazy { lazy: String },
    /// A logical path string loads immediately.
    Direct(String),
}

/// One route entry of the routes module export.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDescriptor {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    pub component: ComponentRefDescriptor,
    #[serde(default)]
    pub permalink: Option<Value>,
    #[serde(default)]
    pub pagination: Option<Value>,
    #[serde(default)]
    pub children: Vec<RouteDescriptor>,
}

fn node_from_descriptor(
    descriptor: &RouteDescriptor,
    registry: &Arc<ComponentRegistry>,
) -> Result<RouteNode, PipelineError> {
    let component = match &descriptor.component {
        ComponentRefDescriptor::Direct(logical) => {
            RouteComponentRef::Direct(registry.load_component(&LogicalPath::new(logical.clone()))?)
        }
        ComponentRefDescriptor::Lazy { lazy } => {
            let registry = Arc::clone(registry);
            let logical = LogicalPath::new(lazy.clone());
            RouteComponentRef::Lazy(Arc::new(move || {
                let registry = Arc::clone(&registry);
                let logical = logical.clone();
                Box::pin(async move { registry.load_component(&logical) })
            }))
        }
    };

    let mut children = Vec::with_capacity(descriptor.children.len());
    for child in &descriptor.children {
        children.push(node_from_descriptor(child, registry)?);
    }

    Ok(RouteNode {
        path: descriptor.path.clone(),
        name: descriptor.name.clone(),
        component,
        permalink: descriptor.permalink.clone().map(PermalinkSpec::from_value),
        pagination: descriptor.pagination.clone(),
        children,
    })
}
