//! Method processing: scheduling optimizations bottom-up over the call graph.
//!
//! This module sits between the call graph and the consumers of optimized IR:
//!
//! - [`crate::callgraph`]: call graph construction and cycle elimination
//! - [`compiler`](self): waves, optimization feedback, the converter driver
//! - [`Finalizer`]: lowering of the optimized IR, provided by the caller
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        IrConverter                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PrimaryMethodProcessor      Full call graph, waves planned      │
//! │    ├─ build IR               (IrProvider + type resolution)      │
//! │    ├─ CodeOptimization list  (in registration order)             │
//! │    └─ wave done              (delayed feedback committed)        │
//! │                                                                  │
//! │  PostMethodProcessor         Partial graph over invalidated      │
//! │    └─ same waves             methods, reusing their IR           │
//! │                                                                  │
//! │  Finalization                Dead code removal, precision        │
//! │    └─ Finalizer              check, method order                 │
//! │                                                                  │
//! │  EventLog                    What happened, for diagnostics      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Within a wave, methods run in parallel on a rayon pool sized by
//! [`ConversionConfig::threads`]. Facts an optimization learns about a method go through
//! [`OptimizationFeedbackDelayed`] and only become visible once the wave is done, so the
//! result does not depend on the interleaving of workers.

mod config;
mod converter;
mod events;
mod feedback;
mod optimization;
mod post;
mod primary;
mod processor;

pub use config::ConversionConfig;
pub use converter::{ConversionSummary, IrConverter};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use feedback::{
    InfoUpdate, OptimizationFeedback, OptimizationFeedbackDelayed, OptimizationFeedbackIgnore,
    OptimizationFeedbackSimple,
};
pub use optimization::{
    CodeOptimization, ControlFlowIrProvider, Finalizer, IrProvider, OptimizationContext,
};
pub use post::{PostMethodProcessor, PostMethodProcessorBuilder};
pub use primary::PrimaryMethodProcessor;
pub use processor::{MethodProcessor, ProcessorKind};
