//! Extension points of the converter: IR construction, code optimizations and finalizers.

use std::collections::BTreeMap;

use crate::{
    callgraph::CallSiteInformation,
    code::DexCode,
    compiler::{EventLog, MethodProcessor, OptimizationFeedback},
    conversion::{trace_blocks, DexSourceCode},
    ir::{BlockId, IrCode, IrInstruction},
    program::{MethodId, Program},
    Result,
};

/// Read-only state shared by every optimization of a processing phase.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationContext<'a> {
    /// The program being converted.
    pub program: &'a Program,
    /// Call site facts of the primary call graph.
    pub call_site_information: &'a CallSiteInformation,
    /// The converter's event log.
    pub events: &'a EventLog,
}

/// An optimization applied to one method at a time.
///
/// Optimizations run in list order on the IR of a method once all of its callees and
/// the unique writers of the fields it reads have been processed. Facts about the method
/// must be reported through `feedback`; the processor allows scheduling additional
/// methods into the running wave or requesting post-processing.
pub trait CodeOptimization: Send + Sync {
    /// Name used in errors and events.
    fn name(&self) -> &str;

    /// Optimizes `code` in place.
    ///
    /// # Errors
    ///
    /// Any error aborts the processing phase and is returned by the converter.
    fn optimize(
        &self,
        code: &mut IrCode,
        feedback: &dyn OptimizationFeedback,
        processor: &dyn MethodProcessor,
        context: &OptimizationContext<'_>,
    ) -> Result<()>;
}

/// Builds the SSA form of a method body.
pub trait IrProvider: Send + Sync {
    /// Builds IR for `method` from its current bytecode.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the body cannot be decoded.
    fn build_ir(&self, program: &Program, method: MethodId, code: &DexCode) -> Result<IrCode>;
}

/// Consumes the final IR of every converted method.
pub trait Finalizer {
    /// Lowers the IR of `method`, e.g. into an output encoding.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Finalization`] if the IR cannot be lowered.
    fn finalize(&mut self, program: &Program, method: MethodId, code: IrCode) -> Result<()>;
}

impl<F> Finalizer for F
where
    F: FnMut(&Program, MethodId, IrCode) -> Result<()>,
{
    fn finalize(&mut self, program: &Program, method: MethodId, code: IrCode) -> Result<()> {
        self(program, method, code)
    }
}

/// Builds an IR skeleton holding only the control flow of a body.
///
/// Every basic block found by [`trace_blocks`] becomes one IR block with the same normal
/// and exceptional successors; blocks without successors end in a void return. No values
/// are created. Useful to drive scheduling without a full SSA builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFlowIrProvider;

impl IrProvider for ControlFlowIrProvider {
    fn build_ir(&self, _program: &Program, method: MethodId, code: &DexCode) -> Result<IrCode> {
        let mut ir = IrCode::new(method);
        if code.is_empty() {
            ir.push(ir.entry(), IrInstruction::Return { src: None });
            return Ok(ir);
        }

        let mut source = DexSourceCode::new(code);
        source.set_up()?;
        let blocks = trace_blocks(&source)?;

        let mut ids = BTreeMap::new();
        for start in blocks.block_starts() {
            let id = if start == 0 { ir.entry() } else { ir.add_block() };
            ids.insert(start, id);
        }
        let block_id = |offset: u32| -> Result<BlockId> {
            ids.get(&offset)
                .copied()
                .ok_or_else(|| malformed_error!("No block starts at offset {}", offset))
        };

        for (start, info) in blocks.iter() {
            let from = block_id(start)?;
            for &successor in &info.normal_successors {
                ir.add_successor(from, block_id(successor)?);
            }
            for &handler in &info.exceptional_successors {
                ir.add_exceptional_successor(from, block_id(handler)?);
            }
            if info.normal_successors.is_empty() {
                ir.push(from, IrInstruction::Return { src: None });
            }
        }
        Ok(ir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{IfTest, InstructionKind};

    #[test]
    fn test_control_flow_skeleton() -> Result<()> {
        let program = Program::builder().build()?;
        let code = DexCode::new(
            1,
            1,
            vec![
                InstructionKind::IfZ {
                    test: IfTest::Eq,
                    a: 0,
                    target: 3,
                },
                InstructionKind::ReturnVoid,
                InstructionKind::ReturnVoid,
            ],
        );

        let ir = ControlFlowIrProvider.build_ir(&program, MethodId::new(0), &code)?;
        assert_eq!(ir.block_count(), 3);
        let entry = ir.block(ir.entry()).map(|block| block.successors.len());
        assert_eq!(entry, Some(2));
        assert_eq!(ir.instructions().count(), 2);
        Ok(())
    }

    #[test]
    fn test_closure_finalizer() -> Result<()> {
        let program = Program::builder().build()?;
        let mut seen = Vec::new();
        let mut finalizer = |_: &Program, method: MethodId, _: IrCode| -> Result<()> {
            seen.push(method);
            Ok(())
        };
        finalizer.finalize(&program, MethodId::new(4), IrCode::new(MethodId::new(4)))?;
        assert_eq!(seen, vec![MethodId::new(4)]);
        Ok(())
    }
}
