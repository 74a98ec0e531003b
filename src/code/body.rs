//! Method bodies: instructions, try ranges and handler tables.

use std::fmt;

use crate::{
    code::{Instruction, InstructionKind, UseRegistry},
    program::DexType,
};

/// A range of code units covered by one handler list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRange {
    /// Offset of the first covered code unit.
    pub start_address: u32,
    /// Number of covered code units.
    pub code_unit_count: u32,
    /// Index into [`DexCode::handlers`].
    pub handler_index: usize,
}

impl TryRange {
    /// Exclusive end offset.
    #[must_use]
    pub fn end_address(&self) -> u32 {
        self.start_address + self.code_unit_count
    }

    /// Returns `true` if the code unit at `offset` is covered.
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        self.start_address <= offset && offset < self.end_address()
    }
}

/// An ordered list of typed catch clauses plus an optional catch-all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TryHandler {
    /// Guard type and handler offset, in match order.
    pub pairs: Vec<(DexType, u32)>,
    /// Handler offset of the untyped catch-all.
    pub catch_all_address: Option<u32>,
}

impl TryHandler {
    /// A handler list with a single typed clause.
    pub fn catching(ty: impl Into<DexType>, address: u32) -> Self {
        Self {
            pairs: vec![(ty.into(), address)],
            catch_all_address: None,
        }
    }

    /// A handler list consisting only of a catch-all.
    #[must_use]
    pub fn catch_all(address: u32) -> Self {
        Self {
            pairs: Vec::new(),
            catch_all_address: Some(address),
        }
    }

    /// Adds a typed clause after the existing ones.
    #[must_use]
    pub fn and_catching(mut self, ty: impl Into<DexType>, address: u32) -> Self {
        self.pairs.push((ty.into(), address));
        self
    }

    /// Sets the catch-all handler.
    #[must_use]
    pub fn with_catch_all(mut self, address: u32) -> Self {
        self.catch_all_address = Some(address);
        self
    }
}

/// The body of a method in register-based form.
///
/// Instructions are laid out contiguously; each one starts where the previous one ends.
/// Payload pseudo-instructions follow the regular code.
#[derive(Clone, PartialEq)]
pub struct DexCode {
    registers: u16,
    incoming_registers: u16,
    instructions: Vec<Instruction>,
    tries: Vec<TryRange>,
    handlers: Vec<TryHandler>,
}

impl DexCode {
    /// Creates a body from instruction kinds, assigning offsets sequentially from zero.
    #[must_use]
    pub fn new(registers: u16, incoming_registers: u16, kinds: Vec<InstructionKind>) -> Self {
        let mut offset = 0;
        let instructions = kinds
            .into_iter()
            .map(|kind| {
                let instruction = Instruction { offset, kind };
                offset += instruction.size();
                instruction
            })
            .collect();

        Self {
            registers,
            incoming_registers,
            instructions,
            tries: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Adds a try range covering `code_unit_count` units from `start_address`.
    #[must_use]
    pub fn with_try(mut self, start_address: u32, code_unit_count: u32, handler_index: usize) -> Self {
        self.tries.push(TryRange {
            start_address,
            code_unit_count,
            handler_index,
        });
        self.tries.sort_by_key(|range| range.start_address);
        self
    }

    /// Appends a handler list; its index is the number of handlers added before it.
    #[must_use]
    pub fn with_handler(mut self, handler: TryHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Total number of registers.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }

    /// Number of registers holding arguments, placed at the top of the frame.
    #[must_use]
    pub fn incoming_registers(&self) -> u16 {
        self.incoming_registers
    }

    /// The instructions in layout order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the instruction at a list index.
    #[must_use]
    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Number of instructions, payloads included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if the body has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Size of the body in code units.
    #[must_use]
    pub fn code_units(&self) -> u32 {
        self.instructions.last().map_or(0, Instruction::next_offset)
    }

    /// The try ranges, sorted by start address.
    #[must_use]
    pub fn tries(&self) -> &[TryRange] {
        &self.tries
    }

    /// The handler lists referenced by the try ranges.
    #[must_use]
    pub fn handlers(&self) -> &[TryHandler] {
        &self.handlers
    }

    /// The try range covering the code unit at `offset`.
    #[must_use]
    pub fn try_covering(&self, offset: u32) -> Option<&TryRange> {
        self.tries.iter().find(|range| range.contains(offset))
    }

    /// Reports every reference made by the body to `registry`, in instruction order.
    ///
    /// Guard types of the handler tables are reported after the instructions.
    pub fn register_code_references(&self, registry: &mut dyn UseRegistry) {
        for instruction in &self.instructions {
            match &instruction.kind {
                InstructionKind::Invoke { kind, method, .. } => {
                    registry.register_invoke(*kind, method);
                }
                InstructionKind::InvokeCustom { call_site, .. } => {
                    registry.register_call_site(call_site);
                }
                InstructionKind::NewInstance { ty, .. } => registry.register_new_instance(ty),
                InstructionKind::NewArray { ty, .. } | InstructionKind::FilledNewArray { ty, .. } => {
                    registry.register_type_reference(ty);
                }
                InstructionKind::InstanceGet { field, .. } => {
                    registry.register_instance_field_read(field);
                }
                InstructionKind::InstancePut { field, .. } => {
                    registry.register_instance_field_write(field);
                }
                InstructionKind::StaticGet { field, .. } => {
                    registry.register_static_field_read(field);
                }
                InstructionKind::StaticPut { field, .. } => {
                    registry.register_static_field_write(field);
                }
                InstructionKind::CheckCast { ty, .. } => registry.register_check_cast(ty),
                InstructionKind::InstanceOf { ty, .. } => registry.register_instance_of(ty),
                InstructionKind::ConstClass { ty, .. } => registry.register_const_class(ty),
                InstructionKind::InitClass { ty, .. } => registry.register_init_class(ty),
                _ => {}
            }
        }

        for handler in &self.handlers {
            for (guard, _) in &handler.pairs {
                registry.register_exception_guard(guard);
            }
        }
    }
}

impl fmt::Debug for DexCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexCode")
            .field("registers", &self.registers)
            .field("instructions", &self.instructions.len())
            .field("tries", &self.tries.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DexCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::InvokeType,
        program::{FieldRef, MethodRef},
    };

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl UseRegistry for Recorder {
        fn register_invoke_virtual(&mut self, method: &MethodRef) {
            self.events.push(format!("virtual {method}"));
        }
        fn register_invoke_direct(&mut self, method: &MethodRef) {
            self.events.push(format!("direct {method}"));
        }
        fn register_invoke_static(&mut self, method: &MethodRef) {
            self.events.push(format!("static {method}"));
        }
        fn register_invoke_interface(&mut self, method: &MethodRef) {
            self.events.push(format!("interface {method}"));
        }
        fn register_invoke_super(&mut self, method: &MethodRef) {
            self.events.push(format!("super {method}"));
        }
        fn register_instance_field_read(&mut self, field: &FieldRef) {
            self.events.push(format!("iget {field}"));
        }
        fn register_instance_field_write(&mut self, field: &FieldRef) {
            self.events.push(format!("iput {field}"));
        }
        fn register_static_field_read(&mut self, field: &FieldRef) {
            self.events.push(format!("sget {field}"));
        }
        fn register_static_field_write(&mut self, field: &FieldRef) {
            self.events.push(format!("sput {field}"));
        }
        fn register_new_instance(&mut self, ty: &DexType) {
            self.events.push(format!("new {ty}"));
        }
        fn register_type_reference(&mut self, ty: &DexType) {
            self.events.push(format!("type {ty}"));
        }
    }

    #[test]
    fn test_offsets_are_sequential() {
        let code = DexCode::new(
            2,
            0,
            vec![
                InstructionKind::Const { dest: 0, value: 1 },
                InstructionKind::Nop,
                InstructionKind::Goto { target: -4 },
                InstructionKind::ReturnVoid,
            ],
        );
        let offsets: Vec<_> = code.instructions().iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 3, 4, 6]);
        assert_eq!(code.code_units(), 7);
    }

    #[test]
    fn test_try_covering() {
        let code = DexCode::new(1, 0, vec![InstructionKind::Nop; 6])
            .with_try(2, 2, 0)
            .with_handler(TryHandler::catch_all(5));
        assert!(code.try_covering(1).is_none());
        assert_eq!(code.try_covering(3).map(|r| r.handler_index), Some(0));
        assert!(code.try_covering(4).is_none());
    }

    #[test]
    fn test_register_code_references_in_order() {
        let code = DexCode::new(
            2,
            0,
            vec![
                InstructionKind::NewInstance {
                    dest: 0,
                    ty: DexType::new("LA;"),
                },
                InstructionKind::Invoke {
                    kind: InvokeType::Direct,
                    method: MethodRef::new("LA;", "<init>", "()V"),
                    args: vec![0],
                },
                InstructionKind::StaticGet {
                    dest: 1,
                    field: FieldRef::new("LA;", "f", "I"),
                },
                InstructionKind::CheckCast {
                    src: 0,
                    ty: DexType::new("LB;"),
                },
                InstructionKind::ReturnVoid,
            ],
        )
        .with_try(0, 3, 0)
        .with_handler(TryHandler::catching("Ljava/lang/Exception;", 9));

        let mut recorder = Recorder::default();
        code.register_code_references(&mut recorder);
        assert_eq!(
            recorder.events,
            vec![
                "new LA;",
                "direct LA;-><init>()V",
                "sget LA;->f:I",
                "type LB;",
                "type Ljava/lang/Exception;",
            ]
        );
    }
}
