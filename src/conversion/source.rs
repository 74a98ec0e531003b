//! Control-flow discovery over a linear method body.

use std::collections::{BTreeSet, HashMap};

use crate::{
    code::{DexCode, Instruction, InstructionKind, TryRange},
    conversion::{
        payload::{absolute_offset, ArrayFilledData, ArrayFilledDataPayloadResolver},
        IrBuilder, SwitchPayloadResolver,
    },
    program::DexType,
    Result,
};

/// Handler address meaning "no handler" in a handler table.
pub const NO_HANDLER: u32 = u32::MAX;

/// Adapter exposing a [`DexCode`] body to an [`IrBuilder`].
///
/// After [`DexSourceCode::set_up`] every payload is paired with its user, and
/// [`DexSourceCode::trace_instruction`] reports the control-flow edges of one instruction
/// at a time. Block boundaries are decided by the builder from the reported edges.
#[derive(Debug)]
pub struct DexSourceCode<'a> {
    code: &'a DexCode,
    offset_to_index: HashMap<u32, usize>,
    switch_payloads: SwitchPayloadResolver,
    array_data_payloads: ArrayFilledDataPayloadResolver,
}

impl<'a> DexSourceCode<'a> {
    /// Wraps a method body. Call [`DexSourceCode::set_up`] before tracing.
    #[must_use]
    pub fn new(code: &'a DexCode) -> Self {
        Self {
            code,
            offset_to_index: HashMap::with_capacity(code.len()),
            switch_payloads: SwitchPayloadResolver::default(),
            array_data_payloads: ArrayFilledDataPayloadResolver::default(),
        }
    }

    /// Indexes instruction offsets and resolves every payload against its user.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a payload reference does not land on a
    /// payload of the right kind, or a payload is inconsistent.
    pub fn set_up(&mut self) -> Result<()> {
        for (index, instruction) in self.code.instructions().iter().enumerate() {
            self.offset_to_index.insert(instruction.offset, index);
            let kind = &instruction.kind;
            if kind.is_payload() {
                if kind.is_switch_payload() {
                    self.switch_payloads.resolve(instruction.offset, kind)?;
                } else {
                    self.array_data_payloads.resolve(instruction.offset, kind)?;
                }
            } else if let Some(relative) = kind.payload_offset() {
                if kind.is_switch() {
                    self.switch_payloads
                        .add_payload_user(instruction.offset, relative)?;
                } else {
                    self.array_data_payloads
                        .add_payload_user(instruction.offset, relative)?;
                }
            }
        }

        for instruction in self.code.instructions() {
            let Some(relative) = instruction.kind.payload_offset() else {
                continue;
            };
            let payload = absolute_offset(instruction.offset, relative)?;
            let resolved = if instruction.kind.is_switch() {
                self.switch_payloads.get(payload).is_some()
            } else {
                self.array_data_payloads.get(payload).is_some()
            };
            if !resolved {
                return Err(malformed_error!(
                    "No {} payload at {:#x} for instruction at {:#x}",
                    instruction.kind.mnemonic(),
                    payload,
                    instruction.offset
                ));
            }
        }
        Ok(())
    }

    /// The wrapped body.
    #[must_use]
    pub fn code(&self) -> &'a DexCode {
        self.code
    }

    /// Number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.code.len()
    }

    /// Offset of the instruction at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an index past the end of the body.
    pub fn instruction_offset(&self, index: usize) -> Result<u32> {
        self.instruction_at(index).map(|instruction| instruction.offset)
    }

    /// Index of the instruction starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no instruction starts at `offset`.
    pub fn instruction_index(&self, offset: u32) -> Result<usize> {
        self.offset_to_index
            .get(&offset)
            .copied()
            .ok_or_else(|| malformed_error!("No instruction starts at offset {:#x}", offset))
    }

    /// Resolved absolute targets of the switch at `index`, keys first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the instruction is not a resolved switch.
    pub fn switch_targets(&self, index: usize) -> Result<(&[i32], &[u32])> {
        let instruction = self.instruction_at(index)?;
        let payload = self.payload_of(instruction)?;
        match (
            self.switch_payloads.keys(payload),
            self.switch_payloads.absolute_targets(payload),
        ) {
            (Some(keys), Some(targets)) if instruction.kind.is_switch() => Ok((keys, targets)),
            _ => Err(malformed_error!(
                "Instruction at {:#x} has no resolved switch table",
                instruction.offset
            )),
        }
    }

    /// Resolved payload of the fill-array-data at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the instruction has no resolved array data.
    pub fn fill_array_data(&self, index: usize) -> Result<&ArrayFilledData> {
        let instruction = self.instruction_at(index)?;
        let payload = self.payload_of(instruction)?;
        self.array_data_payloads
            .get(payload)
            .filter(|_| matches!(instruction.kind, InstructionKind::FillArrayData { .. }))
            .ok_or_else(|| {
                malformed_error!(
                    "Instruction at {:#x} has no resolved array data",
                    instruction.offset
                )
            })
    }

    /// Catch clauses active at the instruction at `index`, as guard and handler offset.
    ///
    /// Clauses after a `Throwable` guard are unreachable and omitted; an untyped catch-all
    /// is reported with the `Throwable` guard.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an out-of-range index or handler index.
    pub fn catch_handlers_at(&self, index: usize) -> Result<Vec<(DexType, u32)>> {
        let offset = self.instruction_offset(index)?;
        match self.code.try_covering(offset) {
            Some(range) => self.try_handlers(range),
            None => Ok(Vec::new()),
        }
    }

    /// Reports the control flow of the instruction at `index` to `builder`.
    ///
    /// Returns `Some(index)` of the instruction that closes the current block, which is
    /// `index` itself or the move-result following an invoke inside a try range, and
    /// `None` when the block continues with the next instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for targets or handlers that do not land on an
    /// instruction and for payloads that were not resolved by [`DexSourceCode::set_up`].
    pub fn trace_instruction(
        &self,
        index: usize,
        builder: &mut dyn IrBuilder,
    ) -> Result<Option<usize>> {
        let instruction = self.instruction_at(index)?;
        let offset = instruction.offset;
        debug_assert!(!instruction.kind.is_payload());

        if let Some(targets) = instruction.kind.targets() {
            debug_assert!(!instruction.kind.can_throw());
            for relative in targets {
                let target = self.checked_target(offset, relative)?;
                builder.ensure_normal_successor_block(offset, target);
            }
            return Ok(Some(index));
        }

        if instruction.kind.can_throw() {
            let Some(range) = self.code.try_covering(offset) else {
                return Ok(instruction.kind.is_throw().then_some(index));
            };

            // A try range starting at a move-result would split it from its invoke.
            let mut try_start = range.start_address;
            let start_index = self.instruction_index(try_start)?;
            if self.instruction_at(start_index)?.kind.is_move_result() {
                try_start += 1;
            }
            builder.ensure_block_without_enqueuing(try_start);

            for handler in self.unique_handler_offsets(range)? {
                self.instruction_index(handler)?;
                builder.ensure_exceptional_successor_block(offset, handler);
            }

            let mut closing = index;
            let mut last = instruction;
            if let Some(next) = self.code.instruction(index + 1) {
                if next.kind.is_move_result() {
                    debug_assert!(instruction.kind.is_invoke());
                    closing = index + 1;
                    last = next;
                }
            }

            if !last.kind.is_throw() {
                builder.ensure_normal_successor_block(offset, last.next_offset());
            }
            return Ok(Some(closing));
        }

        if instruction.kind.is_switch() {
            let (_, targets) = self.switch_targets(index)?;
            for &target in targets {
                self.instruction_index(target)?;
                builder.ensure_normal_successor_block(offset, target);
            }
            builder.ensure_normal_successor_block(offset, instruction.next_offset());
            return Ok(Some(index));
        }

        Ok(None)
    }

    fn instruction_at(&self, index: usize) -> Result<&'a Instruction> {
        self.code.instruction(index).ok_or_else(|| {
            malformed_error!(
                "Instruction index {} out of range ({} instructions)",
                index,
                self.code.len()
            )
        })
    }

    fn payload_of(&self, instruction: &Instruction) -> Result<u32> {
        let relative = instruction.kind.payload_offset().ok_or_else(|| {
            malformed_error!(
                "Instruction at {:#x} does not reference a payload",
                instruction.offset
            )
        })?;
        absolute_offset(instruction.offset, relative)
    }

    fn checked_target(&self, offset: u32, relative: i32) -> Result<u32> {
        let target = absolute_offset(offset, relative)?;
        self.instruction_index(target)?;
        Ok(target)
    }

    /// Walks the handler list of a try range, stopping after a catch-all.
    fn for_each_handler(
        &self,
        range: &TryRange,
        mut f: impl FnMut(DexType, u32),
    ) -> Result<()> {
        let handler = self.code.handlers().get(range.handler_index).ok_or_else(|| {
            malformed_error!(
                "Try range at {:#x} refers to missing handler {}",
                range.start_address,
                range.handler_index
            )
        })?;

        let throwable = DexType::throwable();
        for (guard, address) in &handler.pairs {
            f(guard.clone(), *address);
            if *guard == throwable {
                return Ok(());
            }
        }
        if let Some(address) = handler.catch_all_address.filter(|&a| a != NO_HANDLER) {
            f(throwable, address);
        }
        Ok(())
    }

    fn try_handlers(&self, range: &TryRange) -> Result<Vec<(DexType, u32)>> {
        let mut handlers = Vec::new();
        self.for_each_handler(range, |guard, address| handlers.push((guard, address)))?;
        Ok(handlers)
    }

    /// Unique handler offsets in first-seen order.
    fn unique_handler_offsets(&self, range: &TryRange) -> Result<Vec<u32>> {
        let mut seen = BTreeSet::new();
        let mut offsets = Vec::new();
        self.for_each_handler(range, |_, address| {
            if seen.insert(address) {
                offsets.push(address);
            }
        })?;
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{IfTest, InvokeType, TryHandler},
        program::MethodRef,
    };

    #[derive(Default)]
    struct EdgeRecorder {
        normal: Vec<(u32, u32)>,
        exceptional: Vec<(u32, u32)>,
        unqueued: Vec<u32>,
    }

    impl IrBuilder for EdgeRecorder {
        fn ensure_normal_successor_block(&mut self, source_offset: u32, target_offset: u32) {
            self.normal.push((source_offset, target_offset));
        }

        fn ensure_exceptional_successor_block(&mut self, source_offset: u32, target_offset: u32) {
            self.exceptional.push((source_offset, target_offset));
        }

        fn ensure_block_without_enqueuing(&mut self, offset: u32) {
            self.unqueued.push(offset);
        }
    }

    fn invoke() -> InstructionKind {
        InstructionKind::Invoke {
            kind: InvokeType::Static,
            method: MethodRef::new("LA;", "f", "()I"),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_conditional_branch_edges() -> Result<()> {
        let code = DexCode::new(
            1,
            0,
            vec![
                InstructionKind::IfZ {
                    test: IfTest::Eq,
                    a: 0,
                    target: 3,
                },
                InstructionKind::Nop,
                InstructionKind::ReturnVoid,
            ],
        );
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;

        let mut recorder = EdgeRecorder::default();
        assert_eq!(source.trace_instruction(0, &mut recorder)?, Some(0));
        assert_eq!(recorder.normal, vec![(0, 3), (0, 2)]);
        assert_eq!(source.trace_instruction(1, &mut recorder)?, None);
        Ok(())
    }

    #[test]
    fn test_invoke_in_try_keeps_move_result() -> Result<()> {
        let code = DexCode::new(
            1,
            0,
            vec![
                invoke(),
                InstructionKind::MoveResult { dest: 0 },
                InstructionKind::Return { src: 0 },
                InstructionKind::MoveException { dest: 0 },
                InstructionKind::Return { src: 0 },
            ],
        )
        .with_try(0, 3, 0)
        .with_handler(
            TryHandler::catching("Ljava/lang/RuntimeException;", 5)
                .and_catching("Ljava/lang/Exception;", 5)
                .with_catch_all(5),
        );
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;

        let mut recorder = EdgeRecorder::default();
        assert_eq!(source.trace_instruction(0, &mut recorder)?, Some(1));
        assert_eq!(recorder.exceptional, vec![(0, 5)]);
        assert_eq!(recorder.normal, vec![(0, 4)]);
        assert_eq!(recorder.unqueued, vec![0]);
        Ok(())
    }

    #[test]
    fn test_try_start_at_move_result_is_shifted() -> Result<()> {
        let code = DexCode::new(
            1,
            0,
            vec![
                invoke(),
                InstructionKind::MoveResult { dest: 0 },
                InstructionKind::Throw { src: 0 },
                InstructionKind::MoveException { dest: 0 },
                InstructionKind::ReturnVoid,
            ],
        )
        .with_try(3, 2, 0)
        .with_handler(TryHandler::catch_all(5));
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;

        let mut recorder = EdgeRecorder::default();
        assert_eq!(source.trace_instruction(2, &mut recorder)?, Some(2));
        assert_eq!(recorder.unqueued, vec![4]);
        assert_eq!(recorder.exceptional, vec![(4, 5)]);
        assert!(recorder.normal.is_empty());
        Ok(())
    }

    #[test]
    fn test_throw_outside_try_closes_block() -> Result<()> {
        let code = DexCode::new(
            1,
            0,
            vec![invoke(), InstructionKind::Throw { src: 0 }],
        );
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;

        let mut recorder = EdgeRecorder::default();
        assert_eq!(source.trace_instruction(0, &mut recorder)?, None);
        assert_eq!(source.trace_instruction(1, &mut recorder)?, Some(1));
        assert!(recorder.normal.is_empty());
        Ok(())
    }

    #[test]
    fn test_handlers_stop_after_throwable() -> Result<()> {
        let code = DexCode::new(1, 0, vec![invoke(), InstructionKind::ReturnVoid])
            .with_try(0, 3, 0)
            .with_handler(
                TryHandler::catching("Ljava/lang/Throwable;", 3)
                    .and_catching("Ljava/lang/Error;", 3)
                    .with_catch_all(3),
            );
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;
        let handlers = source.catch_handlers_at(0)?;
        assert_eq!(handlers, vec![(DexType::throwable(), 3)]);
        Ok(())
    }

    #[test]
    fn test_packed_switch_edges() -> Result<()> {
        let code = DexCode::new(
            1,
            0,
            vec![
                InstructionKind::PackedSwitch { src: 0, payload: 7 },
                InstructionKind::ReturnVoid,
                InstructionKind::ReturnVoid,
                InstructionKind::ReturnVoid,
                InstructionKind::Nop,
                InstructionKind::PackedSwitchPayload {
                    first_key: 0,
                    targets: vec![4, 5],
                },
            ],
        );
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;

        let mut recorder = EdgeRecorder::default();
        assert_eq!(source.trace_instruction(0, &mut recorder)?, Some(0));
        assert_eq!(recorder.normal, vec![(0, 4), (0, 5), (0, 3)]);
        Ok(())
    }

    #[test]
    fn test_missing_target_is_malformed() -> Result<()> {
        let code = DexCode::new(1, 0, vec![InstructionKind::Goto { target: 7 }]);
        let mut source = DexSourceCode::new(&code);
        source.set_up()?;
        let mut recorder = EdgeRecorder::default();
        let result = source.trace_instruction(0, &mut recorder);
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
        Ok(())
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let code = DexCode::new(
            1,
            0,
            vec![
                InstructionKind::PackedSwitch { src: 0, payload: 8 },
                InstructionKind::ReturnVoid,
            ],
        );
        let mut source = DexSourceCode::new(&code);
        assert!(matches!(
            source.set_up(),
            Err(crate::Error::Malformed { .. })
        ));
    }
}
