//! SSA method bodies.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
    sync::Arc,
};

use crate::{
    code::{BinaryOp, IfTest, InvokeType},
    ir::{ValueId, ValueType},
    program::{DexType, FieldRef, MethodId, MethodRef},
};

/// Identifier of a basic block within one [`IrCode`]. Block 0 is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A phi at the start of a block, with one operand per predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The defined value.
    pub dest: ValueId,
    /// Incoming values keyed by predecessor block.
    pub operands: Vec<(BlockId, ValueId)>,
}

#[allow(missing_docs)]
/// An SSA instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum IrInstruction {
    Argument { dest: ValueId, index: u16 },
    Const { dest: ValueId, bits: i64 },
    ConstString { dest: ValueId, value: Arc<str> },
    Binary { op: BinaryOp, dest: ValueId, a: ValueId, b: ValueId },
    Invoke {
        kind: InvokeType,
        method: MethodRef,
        dest: Option<ValueId>,
        args: Vec<ValueId>,
    },
    NewInstance { dest: ValueId, ty: DexType },
    StaticGet { dest: ValueId, field: FieldRef },
    StaticPut { src: ValueId, field: FieldRef },
    InstanceGet { dest: ValueId, object: ValueId, field: FieldRef },
    InstancePut { src: ValueId, object: ValueId, field: FieldRef },
    /// Compares two values, or one value against zero when `b` is `None`.
    If { test: IfTest, a: ValueId, b: Option<ValueId>, target: BlockId },
    Goto { target: BlockId },
    Return { src: Option<ValueId> },
    Throw { src: ValueId },
}

impl IrInstruction {
    /// The value defined by the instruction.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Self::Argument { dest, .. }
            | Self::Const { dest, .. }
            | Self::ConstString { dest, .. }
            | Self::Binary { dest, .. }
            | Self::NewInstance { dest, .. }
            | Self::StaticGet { dest, .. }
            | Self::InstanceGet { dest, .. } => Some(*dest),
            Self::Invoke { dest, .. } => *dest,
            _ => None,
        }
    }

    /// The values used by the instruction.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Self::Binary { a, b, .. } => vec![*a, *b],
            Self::Invoke { args, .. } => args.clone(),
            Self::StaticPut { src, .. } | Self::Throw { src } => vec![*src],
            Self::InstanceGet { object, .. } => vec![*object],
            Self::InstancePut { src, object, .. } => vec![*src, *object],
            Self::If { a, b, .. } => std::iter::once(*a).chain(*b).collect(),
            Self::Return { src } => src.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` for instructions defining a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Const { .. } | Self::ConstString { .. })
    }

    /// Returns `true` if the instruction can be dropped when its value is unused.
    ///
    /// Arguments stay to preserve the method signature; field reads may trigger class
    /// initialization and division may throw.
    #[must_use]
    pub fn is_removable_if_unused(&self) -> bool {
        match self {
            Self::Const { .. } | Self::ConstString { .. } => true,
            Self::Binary { op, .. } => !matches!(op, BinaryOp::Div | BinaryOp::Rem),
            _ => false,
        }
    }

    /// Returns `true` for instructions that end a block.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Self::If { .. } | Self::Goto { .. } | Self::Return { .. } | Self::Throw { .. }
        )
    }
}

/// A basic block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    /// Phis, evaluated on entry.
    pub phis: Vec<Phi>,
    /// Instructions in execution order.
    pub instructions: Vec<IrInstruction>,
    /// Normal successors.
    pub successors: Vec<BlockId>,
    /// Catch handler successors.
    pub exceptional_successors: Vec<BlockId>,
}

/// The SSA form of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct IrCode {
    method: MethodId,
    values: Vec<ValueType>,
    blocks: BTreeMap<BlockId, BasicBlock>,
    next_block: u32,
}

impl IrCode {
    /// Creates an empty body for `method` with an empty entry block.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        let mut code = Self {
            method,
            values: Vec::new(),
            blocks: BTreeMap::new(),
            next_block: 0,
        };
        code.add_block();
        code
    }

    /// The method this body belongs to.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Allocates a value of the given type.
    pub fn new_value(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ty);
        id
    }

    /// Number of allocated values, live or not.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// The current type of a value.
    ///
    /// # Panics
    ///
    /// Panics if the value was not allocated by this body.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> ValueType {
        self.values[value.index()]
    }

    pub(crate) fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.values[value.index()] = ty;
    }

    /// Appends an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, BasicBlock::default());
        id
    }

    /// Returns a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    /// Returns a block for modification.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    /// Iterates blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.iter().map(|(&id, block)| (id, block))
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Appends an instruction to a block. Jumps also record the normal successors.
    pub fn push(&mut self, block: BlockId, instruction: IrInstruction) {
        let successors = match &instruction {
            IrInstruction::Goto { target } => vec![*target],
            IrInstruction::If { target, .. } => vec![*target],
            _ => Vec::new(),
        };
        if let Some(b) = self.blocks.get_mut(&block) {
            for successor in successors {
                if !b.successors.contains(&successor) {
                    b.successors.push(successor);
                }
            }
            b.instructions.push(instruction);
        }
    }

    /// Adds a phi to a block.
    pub fn add_phi(&mut self, block: BlockId, dest: ValueId, operands: Vec<(BlockId, ValueId)>) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.phis.push(Phi { dest, operands });
        }
    }

    /// Adds a normal edge, e.g. the fallthrough of a conditional branch.
    pub fn add_successor(&mut self, from: BlockId, to: BlockId) {
        if let Some(b) = self.blocks.get_mut(&from) {
            if !b.successors.contains(&to) {
                b.successors.push(to);
            }
        }
    }

    /// Adds an exceptional edge to a catch handler.
    pub fn add_exceptional_successor(&mut self, from: BlockId, to: BlockId) {
        if let Some(b) = self.blocks.get_mut(&from) {
            if !b.exceptional_successors.contains(&to) {
                b.exceptional_successors.push(to);
            }
        }
    }

    /// Iterates all instructions in block order.
    pub fn instructions(&self) -> impl Iterator<Item = &IrInstruction> {
        self.blocks.values().flat_map(|block| block.instructions.iter())
    }

    /// Values defined by a phi or an instruction, in block order.
    #[must_use]
    pub fn defined_values(&self) -> Vec<ValueId> {
        self.blocks
            .values()
            .flat_map(|block| {
                block
                    .phis
                    .iter()
                    .map(|phi| phi.dest)
                    .chain(block.instructions.iter().filter_map(IrInstruction::dest))
            })
            .collect()
    }

    /// The first defined value whose type is still imprecise.
    #[must_use]
    pub fn first_imprecise_value(&self) -> Option<ValueId> {
        self.defined_values()
            .into_iter()
            .find(|&value| !self.value_type(value).is_precise())
    }

    /// Blocks reachable from the entry through normal and exceptional edges.
    #[must_use]
    pub fn reachable_blocks(&self) -> BTreeSet<BlockId> {
        let mut reachable = BTreeSet::new();
        let mut worklist = VecDeque::from([self.entry()]);
        while let Some(id) = worklist.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(block) = self.blocks.get(&id) {
                worklist.extend(
                    block
                        .successors
                        .iter()
                        .chain(&block.exceptional_successors)
                        .copied(),
                );
            }
        }
        reachable
    }

    /// Removes blocks the entry cannot reach, and phi operands flowing in from them.
    ///
    /// Returns the number of removed blocks.
    pub fn remove_unreachable_blocks(&mut self) -> usize {
        let reachable = self.reachable_blocks();
        let before = self.blocks.len();
        self.blocks.retain(|id, _| reachable.contains(id));
        for block in self.blocks.values_mut() {
            for phi in &mut block.phis {
                phi.operands.retain(|(pred, _)| reachable.contains(pred));
            }
        }
        before - self.blocks.len()
    }

    /// Removes unused phis and unused side-effect free definitions until none are left.
    ///
    /// Returns the number of removed phis and instructions.
    pub fn remove_dead_definitions(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let used = self.used_values();
            let mut changed = false;
            for block in self.blocks.values_mut() {
                let before = block.phis.len() + block.instructions.len();
                block.phis.retain(|phi| used.contains(&phi.dest));
                block.instructions.retain(|instruction| {
                    !instruction.is_removable_if_unused()
                        || instruction.dest().is_some_and(|dest| used.contains(&dest))
                });
                let after = block.phis.len() + block.instructions.len();
                if after != before {
                    removed += before - after;
                    changed = true;
                }
            }
            if !changed {
                return removed;
            }
        }
    }

    fn used_values(&self) -> BTreeSet<ValueId> {
        let mut used = BTreeSet::new();
        for block in self.blocks.values() {
            for phi in &block.phis {
                // A phi only feeding itself is not a use.
                used.extend(
                    phi.operands
                        .iter()
                        .map(|&(_, value)| value)
                        .filter(|&value| value != phi.dest),
                );
            }
            for instruction in &block.instructions {
                used.extend(instruction.operands());
            }
        }
        used
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}:", self.method)?;
        for (id, block) in &self.blocks {
            writeln!(f, "  {id}:")?;
            for phi in &block.phis {
                writeln!(
                    f,
                    "    {}: {} = phi {:?}",
                    phi.dest,
                    self.value_type(phi.dest),
                    phi.operands
                )?;
            }
            for instruction in &block.instructions {
                match instruction.dest() {
                    Some(dest) => {
                        writeln!(f, "    {dest}: {} = {instruction:?}", self.value_type(dest))?;
                    }
                    None => writeln!(f, "    {instruction:?}")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_blocks_and_phi_operands_are_removed() {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let join = code.add_block();
        let dead = code.add_block();

        let a = code.new_value(ValueType::Int);
        let b = code.new_value(ValueType::Int);
        let phi = code.new_value(ValueType::Int);
        code.push(entry, IrInstruction::Const { dest: a, bits: 1 });
        code.push(entry, IrInstruction::Goto { target: join });
        code.push(dead, IrInstruction::Const { dest: b, bits: 2 });
        code.push(dead, IrInstruction::Goto { target: join });
        code.add_phi(join, phi, vec![(entry, a), (dead, b)]);
        code.push(join, IrInstruction::Return { src: Some(phi) });

        assert_eq!(code.remove_unreachable_blocks(), 1);
        let phis = &code.block(join).expect("join").phis;
        assert_eq!(phis[0].operands, vec![(entry, a)]);
    }

    #[test]
    fn test_dead_definitions_cascade() {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let a = code.new_value(ValueType::Int);
        let b = code.new_value(ValueType::Int);
        let sum = code.new_value(ValueType::Int);
        code.push(entry, IrInstruction::Const { dest: a, bits: 1 });
        code.push(entry, IrInstruction::Const { dest: b, bits: 2 });
        code.push(
            entry,
            IrInstruction::Binary {
                op: BinaryOp::Add,
                dest: sum,
                a,
                b,
            },
        );
        code.push(entry, IrInstruction::Return { src: None });

        assert_eq!(code.remove_dead_definitions(), 3);
        assert_eq!(code.instructions().count(), 1);
    }

    #[test]
    fn test_throwing_division_is_kept() {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let a = code.new_value(ValueType::Int);
        let q = code.new_value(ValueType::Int);
        code.push(entry, IrInstruction::Argument { dest: a, index: 0 });
        code.push(
            entry,
            IrInstruction::Binary {
                op: BinaryOp::Div,
                dest: q,
                a,
                b: a,
            },
        );
        code.push(entry, IrInstruction::Return { src: None });
        assert_eq!(code.remove_dead_definitions(), 0);
    }
}
