//! Component registry.
//!
//! Owns the logical-identity → compiled-output mapping and an explicit keyed
//! module cache. Nothing in the pipeline relies on implicit module
//! memoization: every cached module lives here and is purged through
//! [`ComponentRegistry::invalidate`] before the paths it serves are
//! recompiled — otherwise stale modules would be served.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::css::CssLedger;
use crate::paths::PathResolver;
use crate::{ComponentModule, CompiledOutput, LoadedModule, LogicalPath, PipelineError};

/// Module loading collaborator: reads one compiled module from its absolute
/// output path. Called on cache misses only — memoization and invalidation
/// belong to the registry.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, output_path: &Path) -> anyhow::Result<LoadedModule>;
}

/// Identity maps, module cache, and the per-pass component write counter.
pub struct ComponentRegistry {
    paths: Arc<PathResolver>,
    css: Arc<CssLedger>,
    loader: Arc<dyn ModuleLoader>,
    extension: String,
    output_by_source: DashMap<LogicalPath, String>,
    module_cache: DashMap<PathBuf, LoadedModule>,
    write_count: AtomicUsize,
}

impl ComponentRegistry {
    pub fn new(
        paths: Arc<PathResolver>,
        css: Arc<CssLedger>,
        loader: Arc<dyn ModuleLoader>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            paths,
            css,
            loader,
            extension: extension.into(),
            output_by_source: DashMap::new(),
            module_cache: DashMap::new(),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Record the identity mapping for one component. Last write wins.
    pub fn map_source_to_output(&self, logical: LogicalPath, file_name: impl Into<String>) {
        self.output_by_source.insert(logical, file_name.into());
    }

    /// Compiled output file name mapped for `logical`, if any.
    pub fn output_for(&self, logical: &LogicalPath) -> Option<String> {
        self.output_by_source
            .get(logical)
            .map(|entry| entry.value().clone())
    }

    /// Absolute output path for `logical`; `Load` error when unmapped.
    pub fn output_path_for(&self, logical: &LogicalPath) -> Result<PathBuf, PipelineError> {
        let file_name = self.output_for(logical).ok_or_else(|| PipelineError::Load {
            logical: logical.clone(),
            reason: "no compiled output mapped".into(),
        })?;
        Ok(self.paths.to_output_path(&file_name))
    }

    /// Load the component mapped for `logical`, through the module cache.
    ///
    /// Chunked route components carry their component under a `script`
    /// sub-export; that export wins over the module's default export.
    pub fn load_component(&self, logical: &LogicalPath) -> Result<ComponentModule, PipelineError> {
        let output_path = self.output_path_for(logical)?;

        let module = match self.module_cache.get(&output_path) {
            Some(hit) => hit.value().clone(),
            None => {
                let loaded =
                    self.loader
                        .load(&output_path)
                        .map_err(|e| PipelineError::Load {
                            logical: logical.clone(),
                            reason: e.to_string(),
                        })?;
                self.module_cache.insert(output_path, loaded.clone());
                loaded
            }
        };

        let export = module.script_export.unwrap_or(module.default_export);
        Ok(ComponentModule {
            source: logical.clone(),
            export,
        })
    }

    /// Purge cached modules before recompilation.
    ///
    /// A non-empty `changed` set purges only the cache-directory outputs
    /// mapped for those sources; an empty set purges the entire cache (the
    /// unscoped-rebuild signal).
    pub fn invalidate(&self, changed: &[PathBuf]) {
        if changed.is_empty() {
            let purged = self.module_cache.len();
            self.module_cache.clear();
            debug!(purged, "purged entire module cache");
            return;
        }

        let cache_root = self.paths.cache_root();
        let mut purged = 0usize;
        for source in changed {
            let logical = self.paths.to_logical_path(source, &self.extension);
            if let Some(file_name) = self.output_for(&logical) {
                let output_path = self.paths.to_output_path(&file_name);
                if output_path.starts_with(&cache_root)
                    && self.module_cache.remove(&output_path).is_some()
                {
                    purged += 1;
                }
            }
        }
        debug!(purged, changed = changed.len(), "purged changed modules");
    }

    /// Record one build's compiled outputs: identity mappings, pending CSS,
    /// and style relationships for the static imports of every top-level
    /// (non-include) output. Resets and then counts `write_count` per entry.
    pub fn create_from_outputs(&self, outputs: &[CompiledOutput]) {
        self.write_count.store(0, Ordering::SeqCst);

        for entry in outputs {
            let logical = self.paths.to_logical_path(&entry.facade, &self.extension);
            self.map_source_to_output(logical.clone(), entry.file_name.clone());

            let css = self.css.css_for(&logical);
            if !css.is_empty() {
                self.css.record_code(&entry.file_name, &css);
            }

            if !self.paths.is_under_includes_dir(&entry.facade) {
                for import in &entry.imports {
                    self.css.record_relationship(&entry.file_name, import);
                }
            }

            self.write_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Routes-chunked variant of [`Self::create_from_outputs`], driven by
    /// the chunk table instead of direct compiler output. Relationships come
    /// from the script-part import table, since chunked route components
    /// never go through the per-page compile path.
    pub fn create_from_chunk_map(
        &self,
        chunk_map: &BTreeMap<String, PathBuf>,
        chunk_imports: &HashMap<PathBuf, Vec<PathBuf>>,
    ) {
        self.write_count.store(0, Ordering::SeqCst);

        for (chunk_name, source) in chunk_map {
            let logical = self.paths.to_logical_path(source, &self.extension);
            let file_name = format!("{chunk_name}.js");
            self.map_source_to_output(logical.clone(), file_name.clone());

            let css = self.css.css_for(&logical);
            if !css.is_empty() {
                self.css.record_code(&file_name, &css);
            }

            self.write_count.fetch_add(1, Ordering::SeqCst);
        }

        for source in chunk_map.values() {
            if self.paths.is_under_includes_dir(source) {
                continue;
            }
            let Some(imports) = chunk_imports.get(source) else {
                continue;
            };
            let from = self.output_for(&self.paths.to_logical_path(source, &self.extension));
            let Some(from) = from else { continue };
            for import in imports {
                let to = self.output_for(&self.paths.to_logical_path(import, &self.extension));
                if let Some(to) = to {
                    self.css.record_relationship(&from, &to);
                }
            }
        }
    }

    /// Components mapped during the most recent creation pass. Reporting
    /// only — never a control input.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }
}
