//! Per-component CSS accumulation.
//!
//! The compiler emits CSS fragments keyed by originating source file; the
//! ledger stores them under the source's logical identity until a build pass
//! hands them to the external CSS registry. The ledger never aggregates or
//! rewrites CSS — relationship declarations and final page assembly are
//! forwarded outward.

use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;

use dashmap::DashMap;
use tracing::debug;

use crate::LogicalPath;

/// External CSS/asset registry collaborator.
///
/// Aggregation lives entirely on the collaborator side: the pipeline only
/// pushes compiled CSS keyed by output file and declares "output A pulls in
/// the styles of output B" edges.
pub trait CssRegistry: Send + Sync {
    fn add_code(&self, output_file: &str, css: &str);
    fn add_relationship(&self, output_file: &str, imported_output_file: &str);
    fn aggregated_css_for_url(&self, url: &str) -> String;
    fn reset_all(&self);
    fn reset_one(&self, output_file: &str);
}

/// Ordered CSS fragments per logical component, plus a handle to the
/// external registry for outward forwarding.
///
/// Repeated identical fragments accumulate — recording is not idempotent by
/// design. Callers must reset the affected entries before recompiling, or
/// duplicates pile up.
#[derive(Default)]
pub struct CssLedger {
    fragments: DashMap<LogicalPath, Vec<String>>,
    registry: RwLock<Option<Arc<dyn CssRegistry>>>,
}

impl CssLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the external registry. Forwarding methods are no-ops until
    /// this is called.
    pub fn set_registry(&self, registry: Arc<dyn CssRegistry>) {
        *self.registry.write().expect("css registry lock poisoned") = Some(registry);
    }

    pub fn registry(&self) -> Option<Arc<dyn CssRegistry>> {
        self.registry
            .read()
            .expect("css registry lock poisoned")
            .clone()
    }

    /// Append a trimmed fragment under `logical`.
    pub fn record(&self, logical: LogicalPath, css: &str) {
        self.fragments
            .entry(logical)
            .or_default()
            .push(css.trim().to_string());
    }

    /// All fragments for `logical`, newline-joined; empty string if none.
    pub fn css_for(&self, logical: &LogicalPath) -> String {
        self.fragments
            .get(logical)
            .map(|entry| entry.join("\n"))
            .unwrap_or_default()
    }

    /// Clear every entry. Used before a full rebuild.
    pub fn reset(&self) {
        let count = self.fragments.len();
        self.fragments.clear();
        debug!(entries = count, "cleared css ledger");
    }

    /// Clear one entry's fragments. Must run before recompiling that path.
    pub fn reset_one(&self, logical: &LogicalPath) {
        self.fragments.insert(logical.clone(), Vec::new());
    }

    /// Forward compiled CSS for an output file to the external registry.
    pub fn record_code(&self, output_file: &str, css: &str) {
        if let Some(registry) = self.registry() {
            registry.add_code(output_file, css);
        }
    }

    /// Forward a "pulls in the styles of" edge to the external registry.
    pub fn record_relationship(&self, output_file: &str, imported_output_file: &str) {
        if let Some(registry) = self.registry() {
            registry.add_relationship(output_file, imported_output_file);
        }
    }
}

impl fmt::Debug for CssLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CssLedger")
            .field("entries", &self.fragments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn logical(path: &str) -> LogicalPath {
        LogicalPath::new(path)
    }

    #[test]
    fn record_and_join() {
        let ledger = CssLedger::new();
        ledger.record(logical("./a.comp"), ".a { color: red }\n");
        ledger.record(logical("./a.comp"), ".b { color: blue }");
        assert_eq!(
            ledger.css_for(&logical("./a.comp")),
            ".a { color: red }\n.b { color: blue }"
        );
    }

    #[test]
    fn missing_entry_is_empty_string() {
        let ledger = CssLedger::new();
        assert_eq!(ledger.css_for(&logical("./missing.comp")), "");
    }

    #[test]
    fn duplicates_accumulate() {
        let ledger = CssLedger::new();
        ledger.record(logical("./a.comp"), ".a{}");
        ledger.record(logical("./a.comp"), ".a{}");
        assert_eq!(ledger.css_for(&logical("./a.comp")), ".a{}\n.a{}");
    }

    #[test]
    fn reset_one_leaves_no_residue() {
        let ledger = CssLedger::new();
        ledger.record(logical("./a.comp"), ".old{}");
        ledger.reset_one(&logical("./a.comp"));
        ledger.record(logical("./a.comp"), ".new{}");
        assert_eq!(ledger.css_for(&logical("./a.comp")), ".new{}");
    }

    #[test]
    fn reset_clears_everything() {
        let ledger = CssLedger::new();
        ledger.record(logical("./a.comp"), ".a{}");
        ledger.record(logical("./b.comp"), ".b{}");
        ledger.reset();
        assert_eq!(ledger.css_for(&logical("./a.comp")), "");
        assert_eq!(ledger.css_for(&logical("./b.comp")), "");
    }

    #[derive(Default)]
    struct RecordingRegistry {
        code: Mutex<Vec<(String, String)>>,
        relationships: Mutex<Vec<(String, String)>>,
    }

    impl CssRegistry for RecordingRegistry {
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
            String::new()
        }
        fn reset_all(&self) {}
        fn reset_one(&self, _output_file: &str) {}
    }

    #[test]
    fn forwards_to_attached_registry() {
        let ledger = CssLedger::new();
        let registry = Arc::new(RecordingRegistry::default());
        ledger.set_registry(registry.clone());

        ledger.record_code("a.js", ".a{}");
        ledger.record_relationship("a.js", "b.js");

        assert_eq!(
            registry.code.lock().unwrap().as_slice(),
            &[("a.js".to_string(), ".a{}".to_string())]
        );
        assert_eq!(
            registry.relationships.lock().unwrap().as_slice(),
            &[("a.js".to_string(), "b.js".to_string())]
        );
    }

    #[test]
    fn forwarding_without_registry_is_a_noop() {
        let ledger = CssLedger::new();
        ledger.record_code("a.js", ".a{}");
        ledger.record_relationship("a.js", "b.js");
    }
}
