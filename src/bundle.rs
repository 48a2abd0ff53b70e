//! Source discovery and compile orchestration.
//!
//! - Discovers component sources under the input directory
//! - Drives the external [`Compiler`] collaborator
//! - Absorbs emitted CSS into the ledger
//! - Owns chunk naming for the routes-chunked build
//!
//! The orchestrator never parses, transforms, or emits modules itself; the
//! compiler collaborator does all of that. What stays in-core is the part
//! the rest of the pipeline depends on for identity: which chunk name maps
//! to which source file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use glob::{glob_with, MatchOptions};
use regex::Regex;
use tracing::{debug, info};

use crate::css::CssLedger;
use crate::paths::PathResolver;
use crate::{BoxFuture, CompiledOutput, PipelineError};

// ---------------------------------------------------------------------------
// Compiler collaborator
// ---------------------------------------------------------------------------

/// One chunk emitted by the compiler.
#[derive(Debug, Clone)]
pub struct EmittedChunk {
    /// Output file name relative to the cache directory.
    pub file_name: String,
    /// The source file this chunk is the entry for, when it has one.
    /// Shared-code chunks synthesized by the compiler have no facade.
    pub facade: Option<PathBuf>,
    /// Output file names of statically imported chunks.
    pub imports: Vec<String>,
}

/// Everything one compile pass produced.
#[derive(Debug, Clone, Default)]
pub struct CompilerArtifacts {
    pub chunks: Vec<EmittedChunk>,
    /// CSS fragments keyed by originating source file, in emission order.
    pub css_by_source: HashMap<PathBuf, Vec<String>>,
}

/// External bundler collaborator.
///
/// `compile_chunked` is the routes-tree variant: the compiler must call
/// [`ChunkNamer::assign`] once per module it processes so chunk naming and
/// script-import capture stay in-core.
pub trait Compiler: Send + Sync {
    fn compile<'a>(
        &'a self,
        sources: &'a [PathBuf],
    ) -> BoxFuture<'a, anyhow::Result<CompilerArtifacts>>;

    fn compile_chunked<'a>(
        &'a self,
        sources: &'a [PathBuf],
        namer: &'a mut ChunkNamer,
    ) -> BoxFuture<'a, anyhow::Result<CompilerArtifacts>>;
}

// ---------------------------------------------------------------------------
// Chunk naming
// ---------------------------------------------------------------------------

/// Assigns deduplicated chunk names during a routes-chunked compile and
/// records which component modules each facade's script part statically
/// imports.
///
/// Naming is first-come-first-served: the first source whose file stem is
/// `about` gets chunk `about`, the next gets `about-1`, and so on. The
/// mapping must be consulted, never recomputed, to locate a chunk's source.
#[derive(Debug)]
pub struct ChunkNamer {
    facade_re: Regex,
    script_re: Regex,
    chunk_map: BTreeMap<String, PathBuf>,
    taken: HashMap<String, usize>,
    script_imports: HashMap<PathBuf, Vec<PathBuf>>,
}

impl ChunkNamer {
    pub fn new(extension: &str) -> Self {
        let ext = regex::escape(extension);
        let marker = regex::escape(extension.trim_start_matches('.'));
        Self {
            // A module id ending in the bare extension is a component facade.
            facade_re: Regex::new(&format!(r"([^/]*){ext}$")).expect("facade regex"),
            // A script-part module carries the bundler's type=script query.
            script_re: Regex::new(&format!(r"^(.*)\?{marker}&type=script"))
                .expect("script regex"),
            chunk_map: BTreeMap::new(),
            taken: HashMap::new(),
            script_imports: HashMap::new(),
        }
    }

    /// Classify one module the compiler is about to emit.
    ///
    /// Facade modules get a chunk name; script-part modules record their
    /// component imports and return `None` (the compiler folds them into
    /// their facade's chunk). Any other module also returns `None`.
    pub fn assign(&mut self, module_id: &str, imported_ids: &[String]) -> Option<String> {
        if let Some(captures) = self.script_re.captures(module_id) {
            let facade = PathBuf::from(&captures[1]);
            let imports: Vec<PathBuf> = imported_ids
                .iter()
                .filter(|id| self.facade_re.is_match(id))
                .map(PathBuf::from)
                .collect();
            if !imports.is_empty() {
                self.script_imports.entry(facade).or_default().extend(imports);
            }
            return None;
        }

        let captures = self.facade_re.captures(module_id)?;
        let stem = captures[1].to_string();
        let name = self.dedup(stem);
        self.chunk_map.insert(name.clone(), PathBuf::from(module_id));
        Some(name)
    }

    fn dedup(&mut self, stem: String) -> String {
        let count = self.taken.entry(stem.clone()).or_insert(0);
        loop {
            let name = if *count == 0 {
                stem.clone()
            } else {
                format!("{stem}-{count}")
            };
            *count += 1;
            // A generated name can still clash with a stem assigned
            // literally, e.g. a source named `about-1` next to two `about`s.
            if !self.chunk_map.contains_key(&name) {
                return name;
            }
        }
    }

    /// Chunk name → originating source file, in name order.
    pub fn chunk_map(&self) -> &BTreeMap<String, PathBuf> {
        &self.chunk_map
    }

    /// Facade source → component sources its script part imports.
    pub fn script_imports(&self) -> &HashMap<PathBuf, Vec<PathBuf>> {
        &self.script_imports
    }

    pub fn into_parts(self) -> (BTreeMap<String, PathBuf>, HashMap<PathBuf, Vec<PathBuf>>) {
        (self.chunk_map, self.script_imports)
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Result of a routes-chunked compile pass.
#[derive(Debug)]
pub struct RoutesChunkBuild {
    pub outputs: Vec<CompiledOutput>,
    pub chunk_map: BTreeMap<String, PathBuf>,
    pub chunk_imports: HashMap<PathBuf, Vec<PathBuf>>,
}

/// Discovery plus compile driving, shared by the per-page and routes-chunked
/// build paths.
pub struct BundleOrchestrator {
    paths: Arc<PathResolver>,
    css: Arc<CssLedger>,
    compiler: Arc<dyn Compiler>,
    extension: String,
}

impl BundleOrchestrator {
    pub fn new(
        paths: Arc<PathResolver>,
        css: Arc<CssLedger>,
        compiler: Arc<dyn Compiler>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            paths,
            css,
            compiler,
            extension: extension.into(),
        }
    }

    /// Enumerate component sources under the input directory.
    ///
    /// Matching is case-insensitive, so `About.COMP` is discovered alongside
    /// `about.comp`. Unreadable directory entries abort discovery.
    pub fn discover(&self, pattern: Option<&str>) -> Result<Vec<PathBuf>, PipelineError> {
        let default = format!("**/*{}", self.extension);
        let pattern = pattern.unwrap_or(&default);
        let full = self.paths.input_dir().join(pattern);

        let options = MatchOptions {
            case_sensitive: false,
            ..Default::default()
        };
        let entries = glob_with(&full.to_string_lossy(), options)
            .map_err(|e| PipelineError::Discovery(e.to_string()))?;

        let mut sources = Vec::new();
        for entry in entries {
            sources.push(entry.map_err(|e| PipelineError::Discovery(e.to_string()))?);
        }
        debug!(count = sources.len(), "discovered component sources");
        Ok(sources)
    }

    /// Compile `sources` and absorb the emitted CSS into the ledger.
    ///
    /// Facade-less chunks (shared code split out by the compiler) are
    /// dropped from the returned list; they carry no component identity. An
    /// empty source list short-circuits without touching the compiler.
    pub async fn compile(
        &self,
        sources: &[PathBuf],
    ) -> Result<Vec<CompiledOutput>, PipelineError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let artifacts = self
            .compiler
            .compile(sources)
            .await
            .map_err(PipelineError::Compile)?;
        self.absorb_css(&artifacts);

        let outputs = Self::facade_outputs(artifacts);
        info!(outputs = outputs.len(), "compiled component sources");
        Ok(outputs)
    }

    /// Routes-chunked compile: the compiler consults a [`ChunkNamer`] so
    /// chunk identity stays in-core.
    pub async fn compile_routes_chunked(
        &self,
        sources: &[PathBuf],
    ) -> Result<RoutesChunkBuild, PipelineError> {
        if sources.is_empty() {
            return Ok(RoutesChunkBuild {
                outputs: Vec::new(),
                chunk_map: BTreeMap::new(),
                chunk_imports: HashMap::new(),
            });
        }

        let mut namer = ChunkNamer::new(&self.extension);
        let artifacts = self
            .compiler
            .compile_chunked(sources, &mut namer)
            .await
            .map_err(PipelineError::Compile)?;
        self.absorb_css(&artifacts);

        let outputs = Self::facade_outputs(artifacts);
        let (chunk_map, chunk_imports) = namer.into_parts();
        info!(chunks = chunk_map.len(), "compiled routes-chunked build");
        Ok(RoutesChunkBuild {
            outputs,
            chunk_map,
            chunk_imports,
        })
    }

    fn facade_outputs(artifacts: CompilerArtifacts) -> Vec<CompiledOutput> {
        artifacts
            .chunks
            .into_iter()
            .filter_map(|chunk| {
                let facade = chunk.facade?;
                Some(CompiledOutput {
                    file_name: chunk.file_name,
                    facade,
                    imports: chunk.imports,
                })
            })
            .collect()
    }

    fn absorb_css(&self, artifacts: &CompilerArtifacts) {
        for (source, fragments) in &artifacts.css_by_source {
            let logical = self.paths.to_logical_path(source, &self.extension);
            for css in fragments {
                self.css.record(logical.clone(), css);
            }
        }
    }
}
