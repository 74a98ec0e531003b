//! Register-based bytecode: the input form of every method body.
//!
//! A [`DexCode`] is a linear list of [`Instruction`]s addressed by code-unit offsets, with
//! [`TryRange`]s mapping covered code units to [`TryHandler`] lists. Branches and payload
//! references are relative, as encoded; turning them into control flow is the job of
//! [`crate::conversion::DexSourceCode`].
//!
//! The [`UseRegistry`] visitor is how analyses observe what a body references without
//! matching on instructions themselves. The call graph builder and the field write
//! collector are both registries.

mod body;
mod instruction;
mod registry;

pub use body::{DexCode, TryHandler, TryRange};
pub use instruction::{
    BinaryOp, CallSite, IfTest, Instruction, InstructionKind, InvokeType, MethodHandle,
};
pub use registry::UseRegistry;
