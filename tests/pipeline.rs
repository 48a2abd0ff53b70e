//! End-to-end pipeline tests with stubbed collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use lumen_ssr::{
    BoxFuture, ChunkNamer, Compiler, CompilerArtifacts, ComponentPipeline, CssRegistry,
    EmittedChunk, LoadedModule, ModuleLoader, PageOutput, PermalinkSpec, PipelineCollaborators,
    PipelineConfig, RouterCapability, SsrApp, SsrRuntime,
};

// ---------------------------------------------------------------------------
// Collaborator stubs
// ---------------------------------------------------------------------------

/// Compiler stub: one chunk per source, named after the file stem, with
/// canned CSS and import edges.
#[derive(Default)]
struct FakeCompiler {
    css: HashMap<PathBuf, Vec<String>>,
    imports: HashMap<PathBuf, Vec<String>>,
    runs: AtomicUsize,
}

impl FakeCompiler {
    fn with_css(mut self, source: impl Into<PathBuf>, css: &str) -> Self {
        self.css.entry(source.into()).or_default().push(css.into());
        self
    }

    fn with_import(mut self, source: impl Into<PathBuf>, imported_file: &str) -> Self {
        self.imports
            .entry(source.into())
            .or_default()
            .push(imported_file.into());
        self
    }

    fn stem(source: &Path) -> String {
        source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn artifacts_for(&self, sources: &[PathBuf]) -> CompilerArtifacts {
        let chunks = sources
            .iter()
            .map(|source| EmittedChunk {
                file_name: format!("{}.js", Self::stem(source)),
                facade: Some(source.clone()),
                imports: self.imports.get(source).cloned().unwrap_or_default(),
            })
            .collect();
        let css_by_source = sources
            .iter()
            .filter_map(|source| {
                self.css
                    .get(source)
                    .map(|fragments| (source.clone(), fragments.clone()))
            })
            .collect();
        CompilerArtifacts {
            chunks,
            css_by_source,
        }
    }
}

impl Compiler for FakeCompiler {
    fn compile<'a>(
        &'a self,
        sources: &'a [PathBuf],
    ) -> BoxFuture<'a, anyhow::Result<CompilerArtifacts>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.artifacts_for(sources))
        })
    }

    fn compile_chunked<'a>(
        &'a self,
        sources: &'a [PathBuf],
        namer: &'a mut ChunkNamer,
    ) -> BoxFuture<'a, anyhow::Result<CompilerArtifacts>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut chunks = Vec::new();
            for source in sources {
                let id = source.to_string_lossy();
                if let Some(name) = namer.assign(&id, &[]) {
                    chunks.push(EmittedChunk {
                        file_name: format!("{name}.js"),
                        facade: Some(source.clone()),
                        imports: Vec::new(),
                    });
                }
            }
            Ok(CompilerArtifacts {
                chunks,
                css_by_source: self
                    .css
                    .iter()
                    .filter(|(source, _)| sources.contains(source))
                    .map(|(source, fragments)| (source.clone(), fragments.clone()))
                    .collect(),
            })
        })
    }
}

/// Loader stub serving canned modules by output path.
#[derive(Default)]
struct FakeLoader {
    modules: Mutex<HashMap<PathBuf, LoadedModule>>,
}

impl FakeLoader {
    fn insert(&self, path: impl Into<PathBuf>, default_export: Value) {
        self.modules.lock().unwrap().insert(
            path.into(),
            LoadedModule {
                default_export,
                script_export: None,
            },
        );
    }
}

impl ModuleLoader for FakeLoader {
    fn load(&self, output_path: &Path) -> anyhow::Result<LoadedModule> {
        self.modules
            .lock()
            .unwrap()
            .get(output_path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no module at {}", output_path.display()))
    }
}

/// CSS registry stub recording everything forwarded to it.
#[derive(Default)]
struct RecordingCssRegistry {
    code: Mutex<Vec<(String, String)>>,
    relationships: Mutex<Vec<(String, String)>>,
    resets: Mutex<Vec<String>>,
    full_resets: AtomicUsize,
}

impl CssRegistry for RecordingCssRegistry {
    fn add_code(&self, output_file: &str, css: &str) {
        self.code
            .lock()
            .unwrap()
            .push((output_file.into(), css.into()));
    }

    fn add_relationship(&self, output_file: &str, imported_output_file: &str) {
        self.relationships
            .lock()
            .unwrap()
            .push((output_file.into(), imported_output_file.into()));
    }

    fn aggregated_css_for_url(&self, _url: &str) -> String {
        self.code
            .lock()
            .unwrap()
            .iter()
            .map(|(_, css)| css.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn reset_all(&self) {
        self.full_resets.fetch_add(1, Ordering::SeqCst);
        self.code.lock().unwrap().clear();
    }

    fn reset_one(&self, output_file: &str) {
        self.resets.lock().unwrap().push(output_file.into());
        self.code
            .lock()
            .unwrap()
            .retain(|(file, _)| file != output_file);
    }
}

struct FakeRouter;

impl RouterCapability for FakeRouter {
    fn resolve(&self, name: &str, params: &Value) -> anyhow::Result<String> {
        match name {
            "home" => Ok("/".to_string()),
            "about" => Ok("/about".to_string()),
            "post" => Ok(format!(
                "/blog/{}",
                params["slug"].as_str().unwrap_or("unknown")
            )),
            other => anyhow::bail!("unknown route: {other}"),
        }
    }
}

/// Runtime stub rendering a recognizable envelope around the app state.
struct EchoRuntime;

impl SsrRuntime for EchoRuntime {
    fn render_to_string<'a>(&'a self, app: &'a SsrApp) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            Ok(format!(
                "<html data-url=\"{}\" data-routes=\"{}\">{}</html>",
                app.url,
                app.routes.len(),
                app.root["template"].as_str().unwrap_or("")
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    pipeline: ComponentPipeline,
    compiler: Arc<FakeCompiler>,
    loader: Arc<FakeLoader>,
    css: Arc<RecordingCssRegistry>,
}

fn harness(compiler: FakeCompiler) -> Harness {
    let compiler = Arc::new(compiler);
    let loader = Arc::new(FakeLoader::default());
    let css = Arc::new(RecordingCssRegistry::default());
    let pipeline = ComponentPipeline::new(
        PipelineConfig {
            working_dir: PathBuf::from("/site"),
            input_dir: PathBuf::from("src"),
            includes_dir: PathBuf::from("src/_includes"),
            cache_dir: PathBuf::from(".cache"),
            extension: ".comp".into(),
        },
        PipelineCollaborators {
            compiler: compiler.clone(),
            loader: loader.clone(),
            runtime: Arc::new(EchoRuntime),
            router: Arc::new(FakeRouter),
            css_registry: Some(css.clone()),
        },
    );
    Harness {
        pipeline,
        compiler,
        loader,
        css,
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[tokio::test]
async fn build_maps_components_and_forwards_css() {
    let h = harness(
        FakeCompiler::default()
            .with_css("/site/src/a.comp", ".a { color: red }")
            .with_css("/site/src/_includes/b.comp", ".b { color: blue }")
            .with_import("/site/src/a.comp", "b.js"),
    );

    let count = h
        .pipeline
        .build(Some(vec![
            PathBuf::from("/site/src/a.comp"),
            PathBuf::from("/site/src/_includes/b.comp"),
        ]))
        .await
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(h.pipeline.after_build(), 2);

    let code = h.css.code.lock().unwrap().clone();
    assert_eq!(
        code,
        vec![
            ("a.js".to_string(), ".a { color: red }".to_string()),
            ("b.js".to_string(), ".b { color: blue }".to_string()),
        ]
    );

    // Only the top-level component declares a style relationship; the
    // include gets none.
    let relationships = h.css.relationships.lock().unwrap().clone();
    assert_eq!(relationships, vec![("a.js".to_string(), "b.js".to_string())]);
}

#[tokio::test]
async fn empty_build_is_a_no_op() {
    let h = harness(FakeCompiler::default());
    let count = h.pipeline.build(Some(Vec::new())).await.unwrap();
    assert_eq!(count, 0);
    assert_eq!(h.compiler.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rebuild_scoped_to_changed_sources() {
    let h = harness(
        FakeCompiler::default()
            .with_css("/site/src/x.comp", ".x{}")
            .with_css("/site/src/y.comp", ".y{}"),
    );
    let sources = vec![
        PathBuf::from("/site/src/x.comp"),
        PathBuf::from("/site/src/y.comp"),
    ];
    h.pipeline.build(Some(sources)).await.unwrap();

    // Only x changed. Its registry entry is reset; y's survives.
    let changed = [PathBuf::from("/site/src/x.comp")];
    h.pipeline.before_rebuild(Some(&changed));

    assert_eq!(h.css.resets.lock().unwrap().clone(), vec!["x.js".to_string()]);
    assert_eq!(h.css.full_resets.load(Ordering::SeqCst), 0);

    let count = h
        .pipeline
        .build(Some(changed.to_vec()))
        .await
        .unwrap();
    assert_eq!(count, 1);

    // y's CSS was never re-sent; x's was, exactly once after the reset.
    let code = h.css.code.lock().unwrap().clone();
    let x_entries = code.iter().filter(|(file, _)| file == "x.js").count();
    let y_entries = code.iter().filter(|(file, _)| file == "y.js").count();
    assert_eq!(x_entries, 1);
    assert_eq!(y_entries, 1);
}

#[tokio::test]
async fn unscoped_rebuild_resets_everything() {
    let h = harness(FakeCompiler::default().with_css("/site/src/x.comp", ".x{}"));
    h.pipeline
        .build(Some(vec![PathBuf::from("/site/src/x.comp")]))
        .await
        .unwrap();

    h.pipeline.before_rebuild(None);

    assert_eq!(h.css.full_resets.load(Ordering::SeqCst), 1);
    assert!(h.css.code.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Routes and rendering
// ---------------------------------------------------------------------------

fn seed_routes(h: &Harness) {
    h.loader.insert(
        "/site/.cache/routes.js",
        json!([
            {"path": "/", "name": "home", "component": "./src/home.comp"},
            {
                "path": "/blog",
                "name": "blog",
                "component": "./src/blog.comp",
                "pagination": {"data": "posts", "size": 10},
                "children": [
                    {"path": ":slug", "name": "post", "component": {"lazy": "./src/post.comp"}}
                ]
            }
        ]),
    );
    h.loader
        .insert("/site/.cache/home.js", json!({"template": "home"}));
    h.loader
        .insert("/site/.cache/blog.js", json!({"template": "blog"}));
    h.loader
        .insert("/site/.cache/post.js", json!({"template": "post"}));
}

async fn built_routes(h: &Harness) {
    seed_routes(h);
    h.pipeline
        .build_routes(Some(vec![
            PathBuf::from("/site/src/routes.comp"),
            PathBuf::from("/site/src/home.comp"),
            PathBuf::from("/site/src/blog.comp"),
            PathBuf::from("/site/src/post.comp"),
        ]))
        .await
        .unwrap();
}

#[tokio::test]
async fn build_routes_resolves_the_whole_tree() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;

    let tree = h.pipeline.routes();
    let records = tree.flatten();
    let names: Vec<_> = records.iter().map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec![Some("home"), Some("blog"), Some("post")]);
    // The lazy post component came out fully loaded.
    assert_eq!(records[2].component, json!({"template": "post"}));
}

#[tokio::test]
async fn build_routes_with_no_sources_leaves_an_empty_tree() {
    let h = harness(FakeCompiler::default());
    h.pipeline.build_routes(Some(Vec::new())).await.unwrap();
    assert!(h.pipeline.routes().flatten().is_empty());
}

#[tokio::test]
async fn page_renders_against_the_route_tree() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;

    let output = h
        .pipeline
        .compile_page(
            Path::new("/site/src/post.comp"),
            None,
            &json!({"page": {"url": "/blog/first/"}}),
            &json!({}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        output,
        PageOutput::Html(
            "<html data-url=\"/blog/first/\" data-routes=\"3\">post</html>".to_string()
        )
    );
}

#[tokio::test]
async fn page_inherits_ancestor_pagination() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;

    // Rendering succeeds; the pagination cascade is asserted structurally
    // through the tree since the echo runtime ignores page data.
    let tree = h.pipeline.routes();
    let chain = tree.find_path_to(&lumen_ssr::LogicalPath::new("./src/post.comp"));
    let merged = lumen_ssr::RouteTree::merge_ancestor_data(&chain, &json!({}));
    assert_eq!(merged.pagination, vec![json!({"data": "posts", "size": 10})]);
}

#[tokio::test]
async fn route_object_permalink_resolves_to_an_index_document() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;

    let output = h
        .pipeline
        .compile_page(
            Path::new("/site/src/post.comp"),
            Some(&PermalinkSpec::RouteObject(json!({"params": {"slug": "first"}}))),
            &json!({}),
            &json!({}),
            None,
        )
        .await
        .unwrap();

    assert_eq!(output, PageOutput::Url("/blog/first/index.html".to_string()));
}

#[tokio::test]
async fn permalink_for_a_component_outside_the_tree_fails() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;

    let err = h
        .pipeline
        .compile_page(
            Path::new("/site/src/orphan.comp"),
            Some(&PermalinkSpec::RouteObject(json!({"params": {}}))),
            &json!({}),
            &json!({}),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, lumen_ssr::PipelineError::UnreachableRoute { .. }));
}

#[tokio::test]
async fn wrapper_layout_takes_over_the_root() {
    let h = harness(FakeCompiler::default());
    built_routes(&h).await;
    h.loader.insert(
        "/site/.cache/layout.js",
        json!({"template": "layout"}),
    );
    // The layout was part of an earlier build pass; map it by hand here.
    h.pipeline
        .build(Some(vec![PathBuf::from("/site/src/_includes/layout.comp")]))
        .await
        .unwrap();

    let output = h
        .pipeline
        .compile_page(
            Path::new("/site/src/home.comp"),
            None,
            &json!({"page": {"url": "/"}}),
            &json!({}),
            Some(Path::new("/site/src/_includes/layout.comp")),
        )
        .await
        .unwrap();

    assert_eq!(
        output,
        PageOutput::Html("<html data-url=\"/\" data-routes=\"3\">layout</html>".to_string())
    );
}
