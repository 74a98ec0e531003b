//! The primary method processor: every method with code, bottom-up.

use crate::{
    callgraph::{CallSiteInformation, CycleEliminationResult},
    compiler::{
        processor::{plan_waves, WaveRunner},
        ConversionConfig, EventLog, MethodProcessor, ProcessorKind,
    },
    program::{MethodId, Program},
    Result,
};

/// Processes every method with code in waves derived from the full call graph.
///
/// Creating the processor builds the call graph, records call site information, breaks
/// all cycles and extracts the waves up front. [`PrimaryMethodProcessor::for_each_method`]
/// then runs them; a method runs only after its callees and the unique writers of the
/// fields it reads, unless the connecting edge was removed to break a cycle.
///
/// # Examples
///
/// ```rust
/// use dexconv::compiler::{ConversionConfig, EventLog, PrimaryMethodProcessor};
/// use dexconv::program::{ClassBuilder, MethodBuilder, Program};
///
/// let program = Program::builder()
///     .class(ClassBuilder::new("LMain;").method(MethodBuilder::new_static("run", "()V").empty_body()))
///     .build()?;
/// let config = ConversionConfig::single_threaded();
/// let events = EventLog::new();
///
/// let mut processor = PrimaryMethodProcessor::create(&program, &config, &events)?;
/// assert_eq!(processor.waves().len(), 1);
///
/// let pool = config.thread_pool()?;
/// let processed = processor.for_each_method(&pool, &events, |_, _| Ok(()), |_, _| Ok(()), |_, _| Ok(()))?;
/// assert_eq!(processed, 1);
/// # Ok::<(), dexconv::Error>(())
/// ```
#[derive(Debug)]
pub struct PrimaryMethodProcessor {
    waves: Vec<Vec<MethodId>>,
    runner: WaveRunner,
    call_site_information: CallSiteInformation,
    cycle_elimination_result: CycleEliminationResult,
}

impl PrimaryMethodProcessor {
    /// Builds the call graph of `program` and plans the waves.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CyclicForceInlining`] if cycles cannot be broken,
    /// [`crate::Error::MissingNode`] if verification finds a method without node, and
    /// [`crate::Error::GraphError`] if the graph does not drain.
    pub fn create(program: &Program, config: &ConversionConfig, events: &EventLog) -> Result<Self> {
        let _span = tracing::debug_span!("primary_call_graph").entered();

        let graph = config.call_graph_builder(program).build()?;
        let call_site_information = graph.call_site_information(program);
        let (waves, cycle_elimination_result) =
            plan_waves(graph, config, events, ProcessorKind::Primary)?;

        Ok(Self {
            waves,
            runner: WaveRunner::new(ProcessorKind::Primary),
            call_site_information,
            cycle_elimination_result,
        })
    }

    /// The planned waves, empty once they ran.
    #[must_use]
    pub fn waves(&self) -> &[Vec<MethodId>] {
        &self.waves
    }

    /// Single and double call site facts of the full call graph.
    #[must_use]
    pub fn call_site_information(&self) -> &CallSiteInformation {
        &self.call_site_information
    }

    /// The edges removed to make the graph acyclic.
    #[must_use]
    pub fn cycle_elimination_result(&self) -> &CycleEliminationResult {
        &self.cycle_elimination_result
    }

    /// Methods that optimizations asked to post-process, in method order.
    #[must_use]
    pub fn post_requests(&self) -> Vec<MethodId> {
        self.runner.post_requests()
    }

    /// Runs the planned waves on `pool` and returns the number of processed methods.
    ///
    /// `wave_start` is called before each wave, `process` for each method of it in
    /// parallel and `wave_done` once all methods of the wave are processed. The waves are
    /// consumed; a second call processes nothing.
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
