//! Wave execution shared by the primary and post method processors.

use std::{collections::BTreeSet, sync::RwLock};

use crossbeam_skiplist::SkipSet;
use rayon::prelude::*;
use strum::Display;

use crate::{
    callgraph::{CallGraph, CycleEliminationResult, RemovedEdge},
    compiler::{ConversionConfig, EventKind, EventLog},
    program::MethodId,
    Result,
};

/// Which processing phase a [`MethodProcessor`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessorKind {
    /// The first pass over every method with code.
    Primary,
    /// The second pass over methods whose results were invalidated.
    Post,
}

/// View of the running processor handed to code optimizations.
pub trait MethodProcessor: Sync {
    /// The phase being run.
    fn kind(&self) -> ProcessorKind;

    /// Returns `true` if `method` belongs to the wave currently being processed, so its
    /// optimization info may change concurrently.
    fn is_processed_concurrently(&self, method: MethodId) -> bool;

    /// Schedules `method` for processing after the current wave, e.g. a synthesized
    /// method. Methods already part of this phase, processed or still pending, are
    /// ignored.
    fn schedule_method_for_processing(&self, method: MethodId);

    /// Asks for `method` to be processed again once the primary phase is over.
    fn request_post_processing(&self, method: MethodId);
}

/// Runs a sequence of waves on a worker pool.
///
/// A wave is processed in parallel and joined before the next one starts. Methods
/// scheduled during a wave form a follow-up wave with the same index, repeated until no
/// method is scheduled anymore. Every method runs at most once per phase.
#[derive(Debug)]
pub(crate) struct WaveRunner {
    kind: ProcessorKind,
    current: RwLock<BTreeSet<MethodId>>,
    /// Methods of all planned waves plus every accepted extension.
    planned: SkipSet<MethodId>,
    extension: SkipSet<MethodId>,
    post_requests: SkipSet<MethodId>,
}

impl WaveRunner {
    pub(crate) fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            current: RwLock::new(BTreeSet::new()),
            planned: SkipSet::new(),
            extension: SkipSet::new(),
            post_requests: SkipSet::new(),
        }
    }

    /// Processes `waves` in order.
    ///
    /// `wave_start` runs before and `wave_done` after every wave and every follow-up wave.
    /// The first error of `process` aborts the remaining waves.
    pub(crate) fn run<S, P, D>(
        &self,
        waves: Vec<Vec<MethodId>>,
        pool: &rayon::ThreadPool,
        events: &EventLog,
        mut wave_start: S,
        process: P,
        mut wave_done: D,
    ) -> Result<usize>
    where
        S: FnMut(usize, &[MethodId]) -> Result<()>,
        P: Fn(MethodId, &dyn MethodProcessor) -> Result<()> + Sync,
        D: FnMut(usize, &[MethodId]) -> Result<()>,
    {
        for &method in waves.iter().flatten() {
            self.planned.insert(method);
        }

        let mut processed = 0;
        for (index, wave) in waves.into_iter().enumerate() {
            let mut batch = wave;
            while !batch.is_empty() {
                *write_lock!(self.current) = batch.iter().copied().collect();
                events
                    .record(EventKind::WaveStarted)
                    .wave(index)
                    .count(batch.len())
                    .message(self.kind.to_string());
                wave_start(index, &batch)?;

                pool.install(|| {
                    batch
                        .par_iter()
                        .try_for_each(|&method| process(method, self))
                })?;
                processed += batch.len();

                wave_done(index, &batch)?;
                events
                    .record(EventKind::WaveCompleted)
                    .wave(index)
                    .count(batch.len())
                    .message(self.kind.to_string());

                batch = self.drain_extension();
                if !batch.is_empty() {
                    events
                        .record(EventKind::WaveExtended)
                        .wave(index)
                        .count(batch.len());
                }
            }
        }
        write_lock!(self.current).clear();
        Ok(processed)
    }

    /// Methods requested for post-processing so far, in method order.
    pub(crate) fn post_requests(&self) -> Vec<MethodId> {
        self.post_requests.iter().map(|entry| *entry.value()).collect()
    }

    fn drain_extension(&self) -> Vec<MethodId> {
        let mut batch = Vec::new();
        while let Some(entry) = self.extension.pop_front() {
            batch.push(*entry.value());
        }
        batch
    }
}

/// Breaks the cycles of `graph` and drains it into waves, logging every removed edge.
pub(crate) fn plan_waves(
    mut graph: CallGraph,
    config: &ConversionConfig,
    events: &EventLog,
    kind: ProcessorKind,
) -> Result<(Vec<Vec<MethodId>>, CycleEliminationResult)> {
    events
        .record(EventKind::CallGraphBuilt)
        .count(graph.len())
        .message(format!(
            "{kind}: {} call edges, {} field-read edges",
            graph.number_of_call_edges(),
            graph.number_of_field_read_edges()
        ));

    let eliminated = config.cycle_eliminator().break_cycles(&mut graph)?;
    for edge in eliminated.removed_edges() {
        match *edge {
            RemovedEdge::Call { caller, callee } => {
                events
                    .record(EventKind::CallEdgeRemoved)
                    .method(caller)
                    .message(format!("{caller} -> {callee}"));
            }
            RemovedEdge::FieldRead { reader, writer } => {
                events
                    .record(EventKind::FieldReadEdgeRemoved)
                    .method(reader)
                    .message(format!("{reader} reads from {writer}"));
            }
        }
    }

    let waves = graph.into_waves()?;
    tracing::debug!(
        processor = %kind,
        waves = waves.len(),
        removed_edges = eliminated.removed_edges().len(),
        "planned processing waves"
    );
    Ok((waves, eliminated))
}

impl MethodProcessor for WaveRunner {
    fn kind(&self) -> ProcessorKind {
        self.kind
    }

    fn is_processed_concurrently(&self, method: MethodId) -> bool {
        read_lock!(self.current).contains(&method)
    }

    fn schedule_method_for_processing(&self, method: MethodId) {
        if self.planned.contains(&method) {
            tracing::trace!(%method, "already part of the phase, not scheduled");
            return;
        }
        self.planned.insert(method);
        self.extension.insert(method);
    }

    fn request_post_processing(&self, method: MethodId) {
        self.post_requests.insert(method);
    }
}
