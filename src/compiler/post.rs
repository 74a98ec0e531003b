//! The post method processor: reprocessing of methods invalidated by the primary phase.

use crossbeam_skiplist::SkipSet;

use crate::{
    callgraph::{CallSiteInformation, CycleEliminationResult},
    compiler::{
        processor::{plan_waves, WaveRunner},
        ConversionConfig, EventKind, EventLog, MethodProcessor, ProcessorKind,
    },
    program::{MethodId, Program},
    Result,
};

/// Collects the methods to reprocess after the primary phase.
///
/// Methods may be added concurrently. [`PostMethodProcessorBuilder::build`] drops methods
/// that no longer have code.
#[derive(Debug, Default)]
pub struct PostMethodProcessorBuilder {
    methods: SkipSet<MethodId>,
}

impl PostMethodProcessorBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one method.
    pub fn add(&self, method: MethodId) {
        self.methods.insert(method);
    }

    /// Adds several methods.
    pub fn add_all(&self, methods: impl IntoIterator<Item = MethodId>) {
        for method in methods {
            self.add(method);
        }
    }

    /// Adds both ends of every call edge removed by cycle elimination.
    ///
    /// The caller was processed without facts about the callee; the callee may have been
    /// processed before facts flowing from the caller were known.
    pub fn seed_from_cycle_elimination(&self, result: &CycleEliminationResult) {
        for callee in result.callees_with_removed_callers() {
            self.add(callee);
            result.for_each_removed_caller(callee, |caller| self.add(caller));
        }
    }

    /// Adds single call site methods whose committed info says they were inlined into
    /// their call site.
    pub fn add_single_call_site_methods(
        &self,
        program: &Program,
        call_site_information: &CallSiteInformation,
    ) {
        for method in call_site_information.single_call_site_methods() {
            let inlined = program
                .get_method(method)
                .is_some_and(|m| m.optimization_info().is_inlined_into_single_call_site());
            if inlined {
                self.add(method);
            }
        }
    }

    /// Number of collected methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if no method was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Collected methods, in method order.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.methods.iter().map(|entry| *entry.value())
    }

    /// Plans the post-processing waves over the collected methods that still have code.
    ///
    /// The call graph only holds edges between collected methods. Returns `None` when
    /// nothing is left to process.
    ///
    /// # Errors
    ///
    /// Propagates call graph construction and cycle elimination errors.
    pub fn build(
        self,
        program: &Program,
        config: &ConversionConfig,
        events: &EventLog,
    ) -> Result<Option<PostMethodProcessor>> {
        let seeds: Vec<MethodId> = self
            .methods()
            .filter(|&method| {
                program
                    .get_method(method)
                    .is_some_and(|m| m.has_code() && program.is_program_method(method))
            })
            .collect();
        if seeds.is_empty() {
            return Ok(None);
        }

        events
            .record(EventKind::PostProcessingScheduled)
            .count(seeds.len());
        let _span = tracing::debug_span!("post_call_graph", seeds = seeds.len()).entered();

        let graph = config.partial_call_graph_builder(program, seeds).build()?;
        let (waves, cycle_elimination_result) =
            plan_waves(graph, config, events, ProcessorKind::Post)?;

        Ok(Some(PostMethodProcessor {
            waves,
            runner: WaveRunner::new(ProcessorKind::Post),
            cycle_elimination_result,
        }))
    }
}

/// Reprocesses a set of methods in waves over their partial call graph.
#[derive(Debug)]
pub struct PostMethodProcessor {
    waves: Vec<Vec<MethodId>>,
    runner: WaveRunner,
    cycle_elimination_result: CycleEliminationResult,
}

impl PostMethodProcessor {
    /// The planned waves, empty once they ran.
    #[must_use]
    pub fn waves(&self) -> &[Vec<MethodId>] {
        &self.waves
    }

    /// The edges removed from the partial graph.
    #[must_use]
    pub fn cycle_elimination_result(&self) -> &CycleEliminationResult {
        &self.cycle_elimination_result
    }

    /// Runs the planned waves; see
    /// [`crate::compiler::PrimaryMethodProcessor::for_each_method`].
    ///
    /// # Errors
    ///
    /// Returns the first error of any callback.
    pub fn for_each_method<S, P, D>(
        &mut self,
        pool: &rayon::ThreadPool,
        events: &EventLog,
        wave_start: S,
        process: P,
        wave_done: D,
    ) -> Result<usize>
    where
        S: FnMut(usize, &[MethodId]) -> Result<()>,
        P: Fn(MethodId, &dyn MethodProcessor) -> Result<()> + Sync,
        D: FnMut(usize, &[MethodId]) -> Result<()>,
    {
        let waves = std::mem::take(&mut self.waves);
        self.runner
            .run(waves, pool, events, wave_start, process, wave_done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        callgraph::{CallGraph, CycleEliminator},
        program::{ClassBuilder, MethodBuilder},
    };

    fn program() -> Result<Program> {
        Program::builder()
            .class(
                ClassBuilder::new("LA;")
                    .method(MethodBuilder::new_static("a", "()V").empty_body())
                    .method(MethodBuilder::new_static("b", "()V").empty_body())
                    .method(MethodBuilder::new_static("c", "()V").empty_body())
                    .method(MethodBuilder::new_static("d", "()V").abstract_method()),
            )
            .build()
    }

    #[test]
    fn test_seeds_from_removed_edges() -> Result<()> {
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        let result = CycleEliminator::new().break_cycles(&mut graph)?;

        let builder = PostMethodProcessorBuilder::new();
        builder.seed_from_cycle_elimination(&result);
        assert_eq!(
            builder.methods().collect::<Vec<_>>(),
            vec![MethodId::new(0), MethodId::new(2)]
        );
        Ok(())
    }

    #[test]
    fn test_build_skips_methods_without_code() -> Result<()> {
        let program = program()?;
        let config = ConversionConfig::single_threaded();
        let events = EventLog::new();

        let builder = PostMethodProcessorBuilder::new();
        builder.add(MethodId::new(3));
        assert!(builder.build(&program, &config, &events)?.is_none());

        let builder = PostMethodProcessorBuilder::new();
        builder.add_all([MethodId::new(1), MethodId::new(3), MethodId::new(0)]);
        let processor = builder.build(&program, &config, &events)?;
        let waves = processor.map(|p| p.waves().to_vec()).unwrap_or_default();
        assert_eq!(waves, vec![vec![MethodId::new(0), MethodId::new(1)]]);
        assert_eq!(events.count(EventKind::PostProcessingScheduled), 1);
        Ok(())
    }

    #[test]
    fn test_inlined_single_call_site_methods() -> Result<()> {
        let program = program()?;
        let graph = CallGraph::from_edges(3, &[(0, 1), (0, 2)], &[]);
        let information = graph.call_site_information(&program);
        program
            .method(MethodId::new(2))
            .update_optimization_info(|info| info.set_inlined_into_single_call_site());

        let builder = PostMethodProcessorBuilder::new();
        builder.add_single_call_site_methods(&program, &information);
        assert_eq!(builder.methods().collect::<Vec<_>>(), vec![MethodId::new(2)]);
        Ok(())
    }
}
