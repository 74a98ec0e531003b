//! SSA intermediate representation.
//!
//! [`IrCode`] is the per-method SSA body handed to code optimizations and finalizers. It
//! is deliberately small: blocks with phis, a handful of instruction forms and a type per
//! value. Building it from bytecode is the job of an [`crate::compiler::IrProvider`].
//!
//! # Key Components
//!
//! - [`IrCode`] / [`BasicBlock`] / [`IrInstruction`]: The body
//! - [`ValueType`]: Precise and imprecise value types
//! - [`TypeConstraintResolver`]: Narrows imprecise types after construction

mod code;
mod typing;
mod value;

pub use code::{BasicBlock, BlockId, IrCode, IrInstruction, Phi};
pub use typing::TypeConstraintResolver;
pub use value::{ValueId, ValueType};
