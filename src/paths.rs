//! Path identity mapping.
//!
//! Maps between on-disk component source paths, working-directory-relative
//! logical identities, and compiled output file locations. Pure path/string
//! logic — no I/O.

use std::path::{Path, PathBuf};

use crate::LogicalPath;

/// Resolves the three path spaces the pipeline moves between: absolute
/// source paths, logical component identities, and cache-directory output
/// paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    working_dir: PathBuf,
    input_dir: PathBuf,
    includes_dir: PathBuf,
    cache_dir: PathBuf,
}

impl PathResolver {
    /// `input_dir`, `includes_dir` and `cache_dir` are taken relative to
    /// `working_dir`, matching the host orchestrator's configuration shape.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        input_dir: impl AsRef<Path>,
        includes_dir: impl AsRef<Path>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let working_dir = working_dir.into();
        Self {
            input_dir: working_dir.join(input_dir.as_ref()),
            includes_dir: working_dir.join(includes_dir.as_ref()),
            cache_dir: cache_dir.into(),
            working_dir,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Absolute input directory; discovery globs run under this root.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Absolute cache directory holding compiled output modules.
    pub fn cache_root(&self) -> PathBuf {
        self.working_dir.join(&self.cache_dir)
    }

    /// Derive the logical identity of a component source.
    ///
    /// Strips the working-directory prefix, keeping a leading `./` so the
    /// identity reads as a relative path, and truncates after the first
    /// occurrence of `extension`. A path outside the working directory is
    /// returned unmodified — intentional, to tolerate externally-rooted
    /// sources. Likewise a path that never mentions `extension` passes
    /// through untouched.
    pub fn to_logical_path(&self, source: &Path, extension: &str) -> LogicalPath {
        let full = source.to_string_lossy();
        let working = self.working_dir.to_string_lossy();
        let relative = match full.strip_prefix(working.as_ref()) {
            Some(rest) => format!(".{rest}"),
            None => full.into_owned(),
        };
        match relative.find(extension) {
            Some(at) => LogicalPath::new(&relative[..at + extension.len()]),
            None => LogicalPath::new(relative),
        }
    }

    /// Whether a source lives under the includes directory. Includes are
    /// reusable fragments: they get no route or CSS-cascade treatment.
    pub fn is_under_includes_dir(&self, source: &Path) -> bool {
        source.starts_with(&self.includes_dir)
    }

    /// Absolute path of a compiled output file. Pure join, no I/O.
    pub fn to_output_path(&self, compiled_file_name: &str) -> PathBuf {
        self.working_dir.join(&self.cache_dir).join(compiled_file_name)
    }
}
