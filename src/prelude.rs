//! # dexconv Prelude
//!
//! The types needed to describe a program, run a conversion and inspect its call graph.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexconv operations
pub use crate::Error;

/// The result type used throughout dexconv
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

pub use crate::program::{
    ClassBuilder, DexType, FieldRef, Method, MethodBuilder, MethodId, MethodRef, Program,
    ProgramBuilder,
};

/// Bytecode bodies
pub use crate::code::{DexCode, InstructionKind, InvokeType};

// ================================================================================================
// Call Graph
// ================================================================================================

pub use crate::callgraph::{
    CallGraph, CallGraphBuilder, CallSiteInformation, CycleEliminationResult, CycleEliminator,
};

// ================================================================================================
// Conversion and Scheduling
// ================================================================================================

pub use crate::compiler::{
    CodeOptimization, ControlFlowIrProvider, ConversionConfig, ConversionSummary, EventKind,
    EventLog, Finalizer, IrConverter, IrProvider, MethodProcessor, OptimizationContext,
    OptimizationFeedback,
};

/// SSA bodies
pub use crate::ir::{IrCode, TypeConstraintResolver, ValueType};
