//! Control-flow reconstruction from linear bytecode.
//!
//! [`DexSourceCode`] adapts a [`crate::code::DexCode`] body for an IR builder: it resolves
//! payloads up front and then reports, one instruction at a time, which instructions end a
//! basic block and which edges leave it. Any [`IrBuilder`] can consume those reports;
//! [`trace_blocks`] is the worklist driver that turns them into a [`BlockGraph`].
//!
//! # Example
//!
//! ```rust
//! use dexconv::code::{DexCode, IfTest, InstructionKind};
//! use dexconv::conversion::{trace_blocks, DexSourceCode};
//!
//! let code = DexCode::new(1, 1, vec![
//!     InstructionKind::IfZ { test: IfTest::Eq, a: 0, target: 3 },
//!     InstructionKind::ReturnVoid,
//!     InstructionKind::ReturnVoid,
//! ]);
//! let mut source = DexSourceCode::new(&code);
//! source.set_up()?;
//! let blocks = trace_blocks(&source)?;
//! assert_eq!(blocks.block_starts().collect::<Vec<_>>(), vec![0, 2, 3]);
//! # Ok::<(), dexconv::Error>(())
//! ```

mod payload;
mod source;
mod tracer;

pub use payload::{
    ArrayFilledData, ArrayFilledDataPayloadResolver, ResolvedSwitch, SwitchPayloadResolver,
};
pub use source::{DexSourceCode, NO_HANDLER};
pub use tracer::{trace_blocks, BlockGraph, BlockInfo, IrBuilder};
