//! End-to-end tests of the converter: wave order, feedback visibility, wave extension and
//! post-processing.

use std::sync::Mutex;

use dexconv::{
    code::{DexCode, InstructionKind, InvokeType},
    compiler::{
        CodeOptimization, ControlFlowIrProvider, ConversionConfig, EventKind, IrConverter,
        MethodProcessor, OptimizationContext, OptimizationFeedback, ProcessorKind,
    },
    ir::IrCode,
    program::{ClassBuilder, MethodBuilder, MethodId, MethodRef, Program},
    Result,
};

fn calls(targets: &[&str]) -> DexCode {
    let mut instructions: Vec<InstructionKind> = targets
        .iter()
        .map(|target| InstructionKind::Invoke {
            kind: InvokeType::Static,
            method: MethodRef::new("LApp;", *target, "()V"),
            args: Vec::new(),
        })
        .collect();
    instructions.push(InstructionKind::ReturnVoid);
    DexCode::new(1, 0, instructions)
}

/// Records every processing of a method, together with the phase.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<(ProcessorKind, MethodId)>>,
}

impl Recorder {
    fn processed(&self) -> Vec<(ProcessorKind, MethodId)> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl CodeOptimization for &'static Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn optimize(
        &self,
        code: &mut IrCode,
        _feedback: &dyn OptimizationFeedback,
        processor: &dyn MethodProcessor,
        _context: &OptimizationContext<'_>,
    ) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push((processor.kind(), code.method()));
        }
        Ok(())
    }
}

fn leak(recorder: Recorder) -> &'static Recorder {
    Box::leak(Box::new(recorder))
}

fn finalize_all(converter: &IrConverter, program: &Program) -> Result<Vec<MethodId>> {
    let mut finalized = Vec::new();
    converter.convert(
        program,
        &mut |_: &Program, method: MethodId, _: IrCode| -> Result<()> {
            finalized.push(method);
            Ok(())
        },
    )?;
    Ok(finalized)
}

/// A diamond main -> {left, right} -> leaf runs in three waves.
#[test]
fn test_diamond_runs_bottom_up() -> Result<()> {
    // ids: leaf=0, left=1, main=2, right=3
    let program = Program::builder()
        .class(
            ClassBuilder::new("LApp;")
                .method(MethodBuilder::new_static("main", "()V").code(calls(&["left", "right"])))
                .method(MethodBuilder::new_static("left", "()V").code(calls(&["leaf"])))
                .method(MethodBuilder::new_static("right", "()V").code(calls(&["leaf"])))
                .method(MethodBuilder::new_static("leaf", "()V").empty_body()),
        )
        .build()?;

    let recorder = leak(Recorder::default());
    let converter =
        IrConverter::new(ConversionConfig::default().with_threads(4), ControlFlowIrProvider)
            .with_optimization(recorder);

    let finalized = finalize_all(&converter, &program)?;
    assert_eq!(
        finalized,
        vec![MethodId::new(0), MethodId::new(1), MethodId::new(2), MethodId::new(3)]
    );

    let processed = recorder.processed();
    let position = |method: usize| {
        processed
            .iter()
            .position(|&(_, m)| m == MethodId::new(method))
            .unwrap_or(usize::MAX)
    };
    assert!(position(0) < position(1));
    assert!(position(0) < position(3));
    assert!(position(1) < position(2));
    assert!(position(3) < position(2));

    let events = converter.events();
    assert_eq!(events.count(EventKind::WaveStarted), 3);
    assert_eq!(events.count(EventKind::MethodProcessed), 4);
    assert_eq!(events.count(EventKind::MethodFinalized), 4);
    assert!(!events.has(EventKind::PostProcessingScheduled));
    Ok(())
}

/// Both ends of an edge removed from a cycle are reprocessed after the primary phase.
#[test]
fn test_cycle_members_are_reprocessed() -> Result<()> {
    // ids: a=0, b=1, c=2; a -> b -> c -> a loses c -> a
    let program = Program::builder()
        .class(
            ClassBuilder::new("LApp;")
                .method(MethodBuilder::new_static("a", "()V").code(calls(&["b"])))
                .method(MethodBuilder::new_static("b", "()V").code(calls(&["c"])))
                .method(MethodBuilder::new_static("c", "()V").code(calls(&["a"]))),
        )
        .build()?;

    let recorder = leak(Recorder::default());
    let converter = IrConverter::new(ConversionConfig::single_threaded(), ControlFlowIrProvider)
        .with_optimization(recorder);

    let mut finalized = Vec::new();
    let summary = converter.convert(
        &program,
        &mut |_: &Program, method: MethodId, _: IrCode| -> Result<()> {
            finalized.push(method);
            Ok(())
        },
    )?;

    assert_eq!(summary.removed_call_edges, 1);
    assert_eq!(summary.primary_waves, 3);
    assert_eq!(summary.methods_processed, 3);
    // The partial graph over {a, c} keeps c -> a, so a runs before c again.
    assert_eq!(summary.post_waves, 2);
    assert_eq!(summary.methods_reprocessed, 2);
    assert_eq!(summary.methods_finalized, 3);
    assert_eq!(finalized.len(), 3);

    let post: Vec<MethodId> = recorder
        .processed()
        .into_iter()
        .filter(|&(kind, _)| kind == ProcessorKind::Post)
        .map(|(_, method)| method)
        .collect();
    assert_eq!(post, vec![MethodId::new(0), MethodId::new(2)]);
    assert_eq!(converter.events().count(EventKind::CallGraphBuilt), 2);
    Ok(())
}

/// Asks for post-processing of every method named `again`. When processing `main` it
/// synthesizes the body of `extra` and schedules it.
struct Requests;

impl CodeOptimization for Requests {
    fn name(&self) -> &str {
        "requests"
    }

    fn optimize(
        &self,
        code: &mut IrCode,
        _feedback: &dyn OptimizationFeedback,
        processor: &dyn MethodProcessor,
        context: &OptimizationContext<'_>,
    ) -> Result<()> {
        let method = context.program.method(code.method());
        if processor.kind() != ProcessorKind::Primary {
            return Ok(());
        }
        match method.reference().name() {
            "again" => processor.request_post_processing(method.id()),
            "main" => {
                if let Some(extra) = context
                    .program
                    .lookup_method(&MethodRef::new("LApp;", "extra", "()V"))
                {
                    context.program.method(extra).set_code(calls(&[]));
                    processor.schedule_method_for_processing(extra);
                    // Already processed in this phase.
                    processor.schedule_method_for_processing(method.id());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[test]
fn test_requests_from_optimizations() -> Result<()> {
    // ids: again=0, extra=1, main=2; extra has no body until main is processed
    let program = Program::builder()
        .class(
            ClassBuilder::new("LApp;")
                .method(MethodBuilder::new_static("again", "()V").empty_body())
                .method(MethodBuilder::new_static("extra", "()V"))
                .method(MethodBuilder::new_static("main", "()V").code(calls(&["again"]))),
        )
        .build()?;

    let recorder = leak(Recorder::default());
    let converter = IrConverter::new(ConversionConfig::single_threaded(), ControlFlowIrProvider)
        .with_optimization(Requests)
        .with_optimization(recorder);

    let summary = {
        let mut finalize = |_: &Program, _: MethodId, _: IrCode| -> Result<()> { Ok(()) };
        converter.convert(&program, &mut finalize)?
    };

    // again forms wave 0 and main wave 1; extra follows main in a follow-up wave.
    assert_eq!(summary.primary_waves, 2);
    assert_eq!(summary.methods_processed, 3);
    assert_eq!(summary.methods_finalized, 3);
    assert_eq!(summary.methods_reprocessed, 1);
    assert_eq!(converter.events().count(EventKind::WaveExtended), 1);

    let post: Vec<MethodId> = recorder
        .processed()
        .into_iter()
        .filter(|&(kind, _)| kind == ProcessorKind::Post)
        .map(|(_, method)| method)
        .collect();
    assert_eq!(post, vec![MethodId::new(0)]);

    let primary: Vec<MethodId> = recorder
        .processed()
        .into_iter()
        .filter(|&(kind, _)| kind == ProcessorKind::Primary)
        .map(|(_, method)| method)
        .collect();
    assert_eq!(primary, vec![MethodId::new(0), MethodId::new(2), MethodId::new(1)]);
    Ok(())
}

/// Counts how many of its callees were already known to be side-effect free.
struct Purity {
    observed: Mutex<Vec<(MethodId, usize)>>,
}

impl CodeOptimization for &'static Purity {
    fn name(&self) -> &str {
        "purity"
    }

    fn optimize(
        &self,
        code: &mut IrCode,
        feedback: &dyn OptimizationFeedback,
        _processor: &dyn MethodProcessor,
        context: &OptimizationContext<'_>,
    ) -> Result<()> {
        let program = context.program;
        let method = program.method(code.method());
        let pure_callees = method
            .code()
            .map(|body| {
                body.instructions()
                    .iter()
                    .filter_map(|instruction| match &instruction.kind {
                        InstructionKind::Invoke { method, .. } => program.lookup_method(method),
                        _ => None,
                    })
                    .filter(|&callee| !program.method(callee).optimization_info().may_have_side_effects())
                    .count()
            })
            .unwrap_or(0);
        if let Ok(mut observed) = self.observed.lock() {
            observed.push((method.id(), pure_callees));
        }
        feedback.method_may_not_have_side_effects(method);
        Ok(())
    }
}

/// Facts committed at the end of a wave are visible to every later wave and the outcome
/// does not depend on the number of workers.
#[test]
fn test_feedback_is_deterministic_across_thread_counts() -> Result<()> {
    let build = || {
        let mut class = ClassBuilder::new("LApp;").method(
            MethodBuilder::new_static("root", "()V").code(calls(&[
                "w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7",
            ])),
        );
        for index in 0..8 {
            class = class.method(MethodBuilder::new_static(format!("w{index}"), "()V").empty_body());
        }
        Program::builder().class(class).build()
    };

    let mut outcomes = Vec::new();
    for threads in [1, 4] {
        let program = build()?;
        let purity: &'static Purity = Box::leak(Box::new(Purity {
            observed: Mutex::new(Vec::new()),
        }));
        let converter = IrConverter::new(
            ConversionConfig::default().with_threads(threads),
            ControlFlowIrProvider,
        )
        .with_optimization(purity);
        finalize_all(&converter, &program)?;

        let mut observed = purity
            .observed
            .lock()
            .map(|observed| observed.clone())
            .unwrap_or_default();
        observed.sort_unstable();
        outcomes.push(observed);
    }

    assert_eq!(outcomes[0], outcomes[1]);
    let root = outcomes[0].iter().find(|(method, _)| *method == MethodId::new(0));
    assert_eq!(root, Some(&(MethodId::new(0), 8)));
    Ok(())
}
