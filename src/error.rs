use thiserror::Error;

use crate::program::MethodId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Message reported when force inlining constraints form a cycle that cannot be broken.
pub const CYCLIC_FORCE_INLINING_MESSAGE: &str =
    "Unable to satisfy force inlining constraints due to cyclic force inlining";

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is fatal for the phase that produced it. The conversion core performs no
/// retries and has no notion of partial success: a method is either fully optimized or the
/// whole conversion fails with one of these errors.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Bytecode with dangling offsets or payloads
///
/// ## Compilation Errors
/// - [`Error::CyclicForceInlining`] - Force inlining constraints form an unbreakable cycle
/// - [`Error::TypeUnification`] - Two SSA values are forced to different precise types
/// - [`Error::Optimization`] - A code optimization failed on a method
/// - [`Error::Finalization`] - A finalizer rejected a method's IR
///
/// ## Internal Errors
/// - [`Error::MissingNode`] - A method with code has no call graph node
/// - [`Error::GraphError`] - Call graph invariant violation
/// - [`Error::ThreadPool`] - The worker pool could not be created
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use dexconv::Error;
///
/// fn report(result: dexconv::Result<()>) {
///     match result {
///         Ok(()) => {}
///         Err(Error::CyclicForceInlining) => eprintln!("fix the force-inline rules"),
///         Err(Error::TypeUnification { left, right }) => {
///             eprintln!("internal compiler error: {left} vs {right}")
///         }
///         Err(e) => eprintln!("conversion failed: {e}"),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged or references offsets that do not exist.
    ///
    /// Raised by the source adapter for jump targets, payload offsets or try ranges that do
    /// not land on an instruction. Carries the location in this crate that detected it.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Every edge of a call graph cycle targets a force-inline method.
    ///
    /// Removing any of them would let a caller be processed before its force-inlined
    /// callee, so the conversion cannot proceed.
    #[error("{}", CYCLIC_FORCE_INLINING_MESSAGE)]
    CyclicForceInlining,

    /// Two SSA values with different precise types must share a type.
    #[error("Cannot unify types for values {left} and {right}")]
    TypeUnification {
        /// Description of the first value and its type
        left: String,
        /// Description of the second value and its type
        right: String,
    },

    /// A method with code has no node in the call graph.
    #[error("Missing call graph node for method {0}")]
    MissingNode(MethodId),

    /// A code optimization failed on a method.
    #[error("Optimization {pass} failed on method {method}: {message}")]
    Optimization {
        /// The method being processed
        method: MethodId,
        /// Name of the failing optimization
        pass: String,
        /// What went wrong
        message: String,
    },

    /// A finalizer could not lower a method.
    #[error("Finalization of method {method} failed: {message}")]
    Finalization {
        /// The method being finalized
        method: MethodId,
        /// What went wrong
        message: String,
    },

    /// The worker pool could not be created.
    #[error("Failed to build worker pool - {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Failed to lock target
    ///
    /// Only produced when a lock was poisoned by a panicking worker.
    #[error("Failed to lock target")]
    LockError,

    /// General call graph error.
    ///
    /// Used for internal consistency checks such as residual cycles after elimination or
    /// dangling edges.
    #[error("{0}")]
    GraphError(String),
}
