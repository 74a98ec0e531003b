//! Register-based bytecode instructions.
//!
//! Instructions are addressed by their offset in 16-bit code units. Branch targets and payload
//! references are stored relative to the offset of the instruction that carries them, exactly
//! as they are encoded. Switch and fill-array-data tables are out-of-line payload
//! pseudo-instructions placed after the regular code.

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

use crate::program::{DexType, FieldRef, MethodRef};

/// The dispatch kind of an invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeType {
    /// Private methods and constructors.
    Direct,
    /// Static methods.
    Static,
    /// Superclass (or default interface) implementation.
    Super,
    /// Virtual dispatch on a class type.
    Virtual,
    /// Virtual dispatch on an interface type.
    Interface,
}

impl InvokeType {
    /// Returns `true` for kinds that dispatch on the receiver's runtime type.
    #[must_use]
    pub fn is_dynamic_dispatch(self) -> bool {
        matches!(self, Self::Virtual | Self::Interface)
    }
}

/// Comparison performed by a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IfTest {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Integer division, throws on zero.
    Div,
    /// Integer remainder, throws on zero.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    Ushr,
}

/// A method handle constant, used as the bootstrap of a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodHandle {
    /// Invokes a method with the given dispatch kind.
    Invoke {
        /// How the method is invoked.
        kind: InvokeType,
        /// The invoked method.
        method: MethodRef,
    },
    /// Reads a field.
    FieldGet {
        /// The field.
        field: FieldRef,
        /// Whether the field is static.
        is_static: bool,
    },
    /// Writes a field.
    FieldPut {
        /// The field.
        field: FieldRef,
        /// Whether the field is static.
        is_static: bool,
    },
}

/// An invoke-custom call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// The bootstrap method.
    pub bootstrap: MethodHandle,
    /// The call site name passed to the bootstrap method.
    pub name: Arc<str>,
    /// The call site prototype passed to the bootstrap method.
    pub proto: Arc<str>,
}

/// The operation and operands of an instruction.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum InstructionKind {
    Nop,
    Const { dest: u16, value: i32 },
    ConstWide { dest: u16, value: i64 },
    ConstString { dest: u16, value: Arc<str> },
    ConstClass { dest: u16, ty: DexType },
    Move { dest: u16, src: u16 },
    MoveResult { dest: u16 },
    MoveException { dest: u16 },
    ReturnVoid,
    Return { src: u16 },
    Throw { src: u16 },
    Goto { target: i32 },
    If { test: IfTest, a: u16, b: u16, target: i32 },
    IfZ { test: IfTest, a: u16, target: i32 },
    PackedSwitch { src: u16, payload: i32 },
    SparseSwitch { src: u16, payload: i32 },
    FillArrayData { array: u16, payload: i32 },
    Invoke { kind: InvokeType, method: MethodRef, args: Vec<u16> },
    InvokeCustom { call_site: CallSite, args: Vec<u16> },
    NewInstance { dest: u16, ty: DexType },
    NewArray { dest: u16, size: u16, ty: DexType },
    FilledNewArray { ty: DexType, args: Vec<u16> },
    InstanceGet { dest: u16, object: u16, field: FieldRef },
    InstancePut { src: u16, object: u16, field: FieldRef },
    StaticGet { dest: u16, field: FieldRef },
    StaticPut { src: u16, field: FieldRef },
    CheckCast { src: u16, ty: DexType },
    InstanceOf { dest: u16, src: u16, ty: DexType },
    ArrayGet { dest: u16, array: u16, index: u16 },
    ArrayPut { src: u16, array: u16, index: u16 },
    Binary { op: BinaryOp, dest: u16, a: u16, b: u16 },
    MonitorEnter { src: u16 },
    MonitorExit { src: u16 },
    InitClass { dest: u16, ty: DexType },
    PackedSwitchPayload { first_key: i32, targets: Vec<i32> },
    SparseSwitchPayload { keys: Vec<i32>, targets: Vec<i32> },
    FillArrayDataPayload { element_width: u16, data: Vec<u8> },
}

impl InstructionKind {
    /// Size of the encoded instruction in 16-bit code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            Self::Nop
            | Self::Move { .. }
            | Self::MoveResult { .. }
            | Self::MoveException { .. }
            | Self::ReturnVoid
            | Self::Return { .. }
            | Self::Throw { .. }
            | Self::MonitorEnter { .. }
            | Self::MonitorExit { .. } => 1,
            Self::ConstString { .. }
            | Self::ConstClass { .. }
            | Self::Goto { .. }
            | Self::If { .. }
            | Self::IfZ { .. }
            | Self::NewInstance { .. }
            | Self::NewArray { .. }
            | Self::InstanceGet { .. }
            | Self::InstancePut { .. }
            | Self::StaticGet { .. }
            | Self::StaticPut { .. }
            | Self::CheckCast { .. }
            | Self::InstanceOf { .. }
            | Self::ArrayGet { .. }
            | Self::ArrayPut { .. }
            | Self::Binary { .. }
            | Self::InitClass { .. } => 2,
            Self::Const { .. }
            | Self::PackedSwitch { .. }
            | Self::SparseSwitch { .. }
            | Self::FillArrayData { .. }
            | Self::Invoke { .. }
            | Self::InvokeCustom { .. }
            | Self::FilledNewArray { .. } => 3,
            Self::ConstWide { .. } => 5,
            Self::PackedSwitchPayload { targets, .. } => 4 + 2 * targets.len() as u32,
            Self::SparseSwitchPayload { keys, .. } => 2 + 4 * keys.len() as u32,
            Self::FillArrayDataPayload { data, .. } => 4 + (data.len() as u32).div_ceil(2),
        }
    }

    /// Relative branch targets, `None` for instructions that do not branch.
    ///
    /// Conditional branches list the taken target followed by the fallthrough. Returns
    /// yield an empty list: they end the block without successors.
    #[must_use]
    pub fn targets(&self) -> Option<Vec<i32>> {
        match self {
            Self::Goto { target } => Some(vec![*target]),
            Self::If { target, .. } | Self::IfZ { target, .. } => {
                Some(vec![*target, self.size() as i32])
            }
            Self::ReturnVoid | Self::Return { .. } => Some(Vec::new()),
            _ => None,
        }
    }

    /// Relative offset of the payload referenced by a switch or fill-array-data.
    #[must_use]
    pub fn payload_offset(&self) -> Option<i32> {
        match self {
            Self::PackedSwitch { payload, .. }
            | Self::SparseSwitch { payload, .. }
            | Self::FillArrayData { payload, .. } => Some(*payload),
            _ => None,
        }
    }

    /// Returns `true` if executing the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            Self::Throw { .. }
            | Self::ConstClass { .. }
            | Self::FillArrayData { .. }
            | Self::Invoke { .. }
            | Self::InvokeCustom { .. }
            | Self::NewInstance { .. }
            | Self::NewArray { .. }
            | Self::FilledNewArray { .. }
            | Self::InstanceGet { .. }
            | Self::InstancePut { .. }
            | Self::StaticGet { .. }
            | Self::StaticPut { .. }
            | Self::CheckCast { .. }
            | Self::InstanceOf { .. }
            | Self::ArrayGet { .. }
            | Self::ArrayPut { .. }
            | Self::MonitorEnter { .. }
            | Self::MonitorExit { .. }
            | Self::InitClass { .. } => true,
            Self::Binary { op, .. } => matches!(op, BinaryOp::Div | BinaryOp::Rem),
            _ => false,
        }
    }

    /// Returns `true` for out-of-line payload pseudo-instructions.
    #[must_use]
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            Self::PackedSwitchPayload { .. }
                | Self::SparseSwitchPayload { .. }
                | Self::FillArrayDataPayload { .. }
        )
    }

    /// Returns `true` for switch payloads.
    #[must_use]
    pub fn is_switch_payload(&self) -> bool {
        matches!(
            self,
            Self::PackedSwitchPayload { .. } | Self::SparseSwitchPayload { .. }
        )
    }

    /// Returns `true` for packed and sparse switches.
    #[must_use]
    pub fn is_switch(&self) -> bool {
        matches!(self, Self::PackedSwitch { .. } | Self::SparseSwitch { .. })
    }

    /// Returns `true` for `throw`.
    #[must_use]
    pub fn is_throw(&self) -> bool {
        matches!(self, Self::Throw { .. })
    }

    /// Returns `true` for move-result pseudo-instructions.
    #[must_use]
    pub fn is_move_result(&self) -> bool {
        matches!(self, Self::MoveResult { .. })
    }

    /// Returns `true` for invokes, including filled-new-array whose result is moved the same way.
    #[must_use]
    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            Self::Invoke { .. } | Self::InvokeCustom { .. } | Self::FilledNewArray { .. }
        )
    }

    /// The mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Const { .. } => "const",
            Self::ConstWide { .. } => "const-wide",
            Self::ConstString { .. } => "const-string",
            Self::ConstClass { .. } => "const-class",
            Self::Move { .. } => "move",
            Self::MoveResult { .. } => "move-result",
            Self::MoveException { .. } => "move-exception",
            Self::ReturnVoid => "return-void",
            Self::Return { .. } => "return",
            Self::Throw { .. } => "throw",
            Self::Goto { .. } => "goto/16",
            Self::If { .. } => "if-test",
            Self::IfZ { .. } => "if-testz",
            Self::PackedSwitch { .. } => "packed-switch",
            Self::SparseSwitch { .. } => "sparse-switch",
            Self::FillArrayData { .. } => "fill-array-data",
            Self::Invoke { .. } => "invoke",
            Self::InvokeCustom { .. } => "invoke-custom",
            Self::NewInstance { .. } => "new-instance",
            Self::NewArray { .. } => "new-array",
            Self::FilledNewArray { .. } => "filled-new-array",
            Self::InstanceGet { .. } => "iget",
            Self::InstancePut { .. } => "iput",
            Self::StaticGet { .. } => "sget",
            Self::StaticPut { .. } => "sput",
            Self::CheckCast { .. } => "check-cast",
            Self::InstanceOf { .. } => "instance-of",
            Self::ArrayGet { .. } => "aget",
            Self::ArrayPut { .. } => "aput",
            Self::Binary { .. } => "binop",
            Self::MonitorEnter { .. } => "monitor-enter",
            Self::MonitorExit { .. } => "monitor-exit",
            Self::InitClass { .. } => "init-class",
            Self::PackedSwitchPayload { .. } => "packed-switch-payload",
            Self::SparseSwitchPayload { .. } => "sparse-switch-payload",
            Self::FillArrayDataPayload { .. } => "fill-array-data-payload",
        }
    }
}

/// An instruction placed at a code-unit offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset in code units from the start of the method body.
    pub offset: u32,
    /// The operation.
    pub kind: InstructionKind,
}

impl Instruction {
    /// Size in code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.kind.size()
    }

    /// Offset of the next instruction.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}: {}", self.offset, self.kind.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sizes() {
        let packed = InstructionKind::PackedSwitchPayload {
            first_key: 0,
            targets: vec![1, 2, 3],
        };
        assert_eq!(packed.size(), 10);

        let sparse = InstructionKind::SparseSwitchPayload {
            keys: vec![1, 5],
            targets: vec![4, 8],
        };
        assert_eq!(sparse.size(), 10);

        let data = InstructionKind::FillArrayDataPayload {
            element_width: 1,
            data: vec![1, 2, 3],
        };
        assert_eq!(data.size(), 6);
    }

    #[test]
    fn test_conditional_targets_include_fallthrough() {
        let branch = InstructionKind::IfZ {
            test: IfTest::Eq,
            a: 0,
            target: 6,
        };
        assert_eq!(branch.targets(), Some(vec![6, 2]));
        assert_eq!(InstructionKind::ReturnVoid.targets(), Some(Vec::new()));
        assert_eq!(InstructionKind::Nop.targets(), None);
    }

    #[test]
    fn test_can_throw() {
        assert!(InstructionKind::Throw { src: 0 }.can_throw());
        assert!(!InstructionKind::MoveResult { dest: 0 }.can_throw());
        assert!(InstructionKind::Binary {
            op: BinaryOp::Div,
            dest: 0,
            a: 1,
            b: 2
        }
        .can_throw());
        assert!(!InstructionKind::Binary {
            op: BinaryOp::Add,
            dest: 0,
            a: 1,
            b: 2
        }
        .can_throw());
    }
}
