//! Configuration for the IR converter.
//!
//! This module provides the configuration type controlling call graph construction, cycle
//! elimination and the worker pool used to process waves.

use crate::{
    callgraph::{CallGraphBuilder, CycleEliminator},
    program::{MethodId, Program},
    Result,
};

/// Configuration for the IR converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    /// Number of dispatch targets from which the call edges of a virtual or interface invoke
    /// are flagged as likely spurious (default: 50).
    pub likely_spurious_call_edge_threshold: usize,

    /// Add call edges for invokes resolving into library classes (default: false).
    ///
    /// Library methods tend to have many program overrides, e.g. `toString`, so these
    /// edges mostly create cycles.
    pub add_call_edges_for_library_invokes: bool,

    /// Break cycles at likely spurious call edges before other call edges (default: true).
    pub prefer_breaking_likely_spurious_edges: bool,

    /// Worker threads per wave, `0` for the rayon default (default: 0).
    pub threads: usize,

    /// Cross-check call graph construction and re-run cycle elimination to verify that it
    /// is stable (default: on in debug builds).
    pub verify_call_graph: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            likely_spurious_call_edge_threshold: CallGraphBuilder::DEFAULT_LIKELY_SPURIOUS_THRESHOLD,
            add_call_edges_for_library_invokes: false,
            prefer_breaking_likely_spurious_edges: true,
            threads: 0,
            verify_call_graph: cfg!(debug_assertions),
        }
    }
}

impl ConversionConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration processing every wave on the calling thread only.
    ///
    /// Useful for reproducing issues where concurrency might hide the culprit.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            threads: 1,
            ..Self::default()
        }
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the likely spurious call edge threshold.
    #[must_use]
    pub fn with_likely_spurious_threshold(mut self, threshold: usize) -> Self {
        self.likely_spurious_call_edge_threshold = threshold;
        self
    }

    /// Enables or disables call graph verification.
    #[must_use]
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify_call_graph = enabled;
        self
    }

    /// A call graph builder over all methods with code, set up from this configuration.
    #[must_use]
    pub fn call_graph_builder<'p>(&self, program: &'p Program) -> CallGraphBuilder<'p> {
        CallGraphBuilder::new(program)
            .likely_spurious_threshold(self.likely_spurious_call_edge_threshold)
            .add_call_edges_for_library_invokes(self.add_call_edges_for_library_invokes)
            .verify(self.verify_call_graph)
    }

    /// A call graph builder restricted to `seeds`, set up from this configuration.
    #[must_use]
    pub fn partial_call_graph_builder<'p>(
        &self,
        program: &'p Program,
        seeds: impl IntoIterator<Item = MethodId>,
    ) -> CallGraphBuilder<'p> {
        self.call_graph_builder(program).with_seeds(seeds)
    }

    /// A cycle eliminator set up from this configuration.
    #[must_use]
    pub fn cycle_eliminator(&self) -> CycleEliminator {
        CycleEliminator::new()
            .prefer_breaking_likely_spurious_edges(self.prefer_breaking_likely_spurious_edges)
            .verify(self.verify_call_graph)
    }

    /// Builds the worker pool used to process waves.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ThreadPool`] if rayon cannot spawn the workers.
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("dexconv-worker-{index}"))
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_eq!(config.likely_spurious_call_edge_threshold, 50);
        assert!(!config.add_call_edges_for_library_invokes);
        assert!(config.prefer_breaking_likely_spurious_edges);
        assert_eq!(config.threads, 0);
        assert_eq!(config.verify_call_graph, cfg!(debug_assertions));
    }

    #[test]
    fn test_single_threaded_pool() -> Result<()> {
        let config = ConversionConfig::single_threaded().with_likely_spurious_threshold(10);
        assert_eq!(config.likely_spurious_call_edge_threshold, 10);
        let pool = config.thread_pool()?;
        assert_eq!(pool.current_num_threads(), 1);
        Ok(())
    }
}
