//! The IR converter driving both processing phases and finalization.

use std::fmt;

use dashmap::DashMap;

use crate::{
    compiler::{
        CodeOptimization, ConversionConfig, EventKind, EventLog, Finalizer, IrProvider,
        MethodProcessor, OptimizationContext, OptimizationFeedbackDelayed,
        PostMethodProcessorBuilder, PrimaryMethodProcessor,
    },
    ir::{IrCode, TypeConstraintResolver},
    program::{MethodId, Program},
    Error, Result,
};

/// What a conversion did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Number of primary waves, not counting follow-up waves.
    pub primary_waves: usize,
    /// Number of post-processing waves.
    pub post_waves: usize,
    /// Methods processed by the primary phase, including scheduled methods.
    pub methods_processed: usize,
    /// Methods processed again by the post phase.
    pub methods_reprocessed: usize,
    /// Call edges removed to break cycles in the primary graph.
    pub removed_call_edges: usize,
    /// Field-read edges removed to break cycles in the primary graph.
    pub removed_field_read_edges: usize,
    /// Methods handed to the finalizer.
    pub methods_finalized: usize,
}

impl fmt::Display for ConversionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conversion Summary:")?;
        writeln!(f, "  Primary waves: {}", self.primary_waves)?;
        writeln!(f, "  Post waves: {}", self.post_waves)?;
        writeln!(f, "  Methods processed: {}", self.methods_processed)?;
        writeln!(f, "  Methods reprocessed: {}", self.methods_reprocessed)?;
        writeln!(f, "  Removed call edges: {}", self.removed_call_edges)?;
        writeln!(f, "  Removed field-read edges: {}", self.removed_field_read_edges)?;
        write!(f, "  Methods finalized: {}", self.methods_finalized)
    }
}

/// Converts every method of a program to IR, optimizes it bottom-up and finalizes it.
///
/// A conversion runs these steps:
///
/// 1. Build the call graph, break its cycles and plan the primary waves.
/// 2. Process each wave in parallel: build IR through the [`IrProvider`], resolve
///    imprecise types and run every [`CodeOptimization`] in order. Facts reported by the
///    optimizations become visible when the wave is done.
/// 3. Reprocess the methods invalidated during the primary phase over a partial call graph.
/// 4. Remove dead code, check that every value has a precise type and hand each method to
///    the [`Finalizer`] in method order.
///
/// Every step records into the converter's [`EventLog`].
///
/// # Examples
///
/// ```rust
/// use dexconv::compiler::{ControlFlowIrProvider, ConversionConfig, IrConverter};
/// use dexconv::ir::IrCode;
/// use dexconv::program::{ClassBuilder, MethodBuilder, MethodId, Program};
///
/// let program = Program::builder()
///     .class(ClassBuilder::new("LMain;").method(MethodBuilder::new_static("run", "()V").empty_body()))
///     .build()?;
///
/// let converter = IrConverter::new(ConversionConfig::single_threaded(), ControlFlowIrProvider);
/// let mut finalized = Vec::new();
/// let summary = converter.convert(&program, &mut |_: &Program, method: MethodId, _: IrCode| -> dexconv::Result<()> {
///     finalized.push(method);
///     Ok(())
/// })?;
///
/// assert_eq!(summary.methods_finalized, 1);
/// assert_eq!(finalized, vec![MethodId::new(0)]);
/// # Ok::<(), dexconv::Error>(())
/// ```
pub struct IrConverter {
    config: ConversionConfig,
    provider: Box<dyn IrProvider>,
    optimizations: Vec<Box<dyn CodeOptimization>>,
    events: EventLog,
}

impl IrConverter {
    /// Creates a converter without optimizations.
    pub fn new(config: ConversionConfig, provider: impl IrProvider + 'static) -> Self {
        Self {
            config,
            provider: Box::new(provider),
            optimizations: Vec::new(),
            events: EventLog::new(),
        }
    }

    /// Appends an optimization; optimizations run in the order they were added.
    #[must_use]
    pub fn with_optimization(mut self, optimization: impl CodeOptimization + 'static) -> Self {
        self.optimizations.push(Box::new(optimization));
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Names of the registered optimizations, in order.
    pub fn optimization_names(&self) -> impl Iterator<Item = &str> {
        self.optimizations.iter().map(|optimization| optimization.name())
    }

    /// Everything recorded by conversions so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Converts every method with code of `program`.
    ///
    /// # Errors
    ///
    /// Returns the first error of call graph construction, cycle elimination, IR
    /// construction, type resolution, any optimization or the finalizer. Returns
    /// [`Error::Finalization`] if a value is left with an imprecise type.
    pub fn convert(&self, program: &Program, finalizer: &mut dyn Finalizer) -> Result<ConversionSummary> {
        let _span = tracing::info_span!("convert", methods = program.method_count()).entered();

        let pool = self.config.thread_pool()?;
        let feedback = OptimizationFeedbackDelayed::new();
        let irs: DashMap<MethodId, IrCode> = DashMap::new();
        let mut summary = ConversionSummary::default();

        let mut primary = PrimaryMethodProcessor::create(program, &self.config, &self.events)?;
        let call_site_information = primary.call_site_information().clone();
        let context = OptimizationContext {
            program,
            call_site_information: &call_site_information,
            events: &self.events,
        };
        summary.primary_waves = primary.waves().len();
        summary.removed_call_edges = primary
            .cycle_elimination_result()
            .number_of_removed_call_edges();
        summary.removed_field_read_edges = primary.cycle_elimination_result().removed_edges().len()
            - summary.removed_call_edges;

        let process = |method: MethodId, processor: &dyn MethodProcessor| {
            self.process_method(method, processor, &feedback, &irs, &context)
        };

        summary.methods_processed = primary.for_each_method(
            &pool,
            &self.events,
            |_, _| Ok(()),
            &process,
            |index, _| {
                self.commit_feedback(program, &feedback, index);
                Ok(())
            },
        )?;

        let post_builder = PostMethodProcessorBuilder::new();
        post_builder.add_all(primary.post_requests());
        post_builder.seed_from_cycle_elimination(primary.cycle_elimination_result());
        post_builder.add_single_call_site_methods(program, &call_site_information);

        if let Some(mut post) = post_builder.build(program, &self.config, &self.events)? {
            summary.post_waves = post.waves().len();
            summary.methods_reprocessed = post.for_each_method(
                &pool,
                &self.events,
                |_, _| Ok(()),
                &process,
                |index, _| {
                    self.commit_feedback(program, &feedback, index);
                    Ok(())
                },
            )?;
        }
        debug_assert!(feedback.no_updates_left());

        summary.methods_finalized = self.finalize(program, irs, finalizer)?;
        tracing::debug!(
            primary_waves = summary.primary_waves,
            post_waves = summary.post_waves,
            finalized = summary.methods_finalized,
            "conversion finished"
        );
        Ok(summary)
    }

    fn process_method(
        &self,
        method: MethodId,
        processor: &dyn MethodProcessor,
        feedback: &OptimizationFeedbackDelayed,
        irs: &DashMap<MethodId, IrCode>,
        context: &OptimizationContext<'_>,
    ) -> Result<()> {
        let program = context.program;

        // Reprocessing continues from the IR of the previous phase.
        let mut ir = match irs.remove(&method) {
            Some((_, ir)) => ir,
            None => {
                let Some(code) = program.get_method(method).and_then(|m| m.code()) else {
                    return Ok(());
                };
                let mut ir = self.provider.build_ir(program, method, &code)?;
                TypeConstraintResolver::new().resolve(&mut ir)?;
                ir
            }
        };

        for optimization in &self.optimizations {
            optimization.optimize(&mut ir, feedback, processor, context)?;
        }

        self.events
            .record(EventKind::MethodProcessed)
            .method(method)
            .message(processor.kind().to_string());
        irs.insert(method, ir);
        Ok(())
    }

    fn commit_feedback(&self, program: &Program, feedback: &OptimizationFeedbackDelayed, wave: usize) {
        let committed = feedback.update_visible_optimization_info(program);
        if committed > 0 {
            self.events
                .record(EventKind::FeedbackCommitted)
                .wave(wave)
                .count(committed);
        }
    }

    fn finalize(
        &self,
        program: &Program,
        irs: DashMap<MethodId, IrCode>,
        finalizer: &mut dyn Finalizer,
    ) -> Result<usize> {
        let _span = tracing::debug_span!("finalize", methods = irs.len()).entered();

        let mut methods: Vec<(MethodId, IrCode)> = irs.into_iter().collect();
        methods.sort_unstable_by_key(|(method, _)| *method);

        let mut finalized = 0;
        for (method, mut ir) in methods {
            let removed = ir.remove_unreachable_blocks() + ir.remove_dead_definitions();
            if removed > 0 {
                self.events
                    .record(EventKind::DeadCodeRemoved)
                    .method(method)
                    .count(removed);
            }

            if let Some(value) = ir.first_imprecise_value() {
                return Err(Error::Finalization {
                    method,
                    message: format!("value {value} has imprecise type {}", ir.value_type(value)),
                });
            }

            finalizer.finalize(program, method, ir)?;
            self.events.record(EventKind::MethodFinalized).method(method);
            finalized += 1;
        }
        Ok(finalized)
    }
}

impl fmt::Debug for IrConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrConverter")
            .field("config", &self.config)
            .field(
                "optimizations",
                &self.optimization_names().collect::<Vec<_>>(),
            )
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}
