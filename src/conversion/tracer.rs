//! Basic block discovery driven by [`DexSourceCode::trace_instruction`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{conversion::DexSourceCode, utils::BitSet, Result};

/// Receives the control-flow facts reported while tracing a method body.
///
/// Offsets are code-unit offsets of instructions. A source offset may be any instruction
/// inside the block that has the edge; implementations attribute it to the block
/// containing that instruction.
pub trait IrBuilder {
    /// Ensures a block starts at `target_offset` and records a normal edge to it.
    fn ensure_normal_successor_block(&mut self, source_offset: u32, target_offset: u32);

    /// Ensures a block starts at `target_offset` and records an exceptional edge to it.
    fn ensure_exceptional_successor_block(&mut self, source_offset: u32, target_offset: u32);

    /// Ensures a block starts at `offset` without scheduling it for tracing.
    fn ensure_block_without_enqueuing(&mut self, offset: u32);
}

/// Edges of one basic block, keyed by block start offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Normal successors.
    pub normal_successors: BTreeSet<u32>,
    /// Exceptional successors (catch handlers).
    pub exceptional_successors: BTreeSet<u32>,
    /// Normal predecessors.
    pub normal_predecessors: BTreeSet<u32>,
    /// Exceptional predecessors.
    pub exceptional_predecessors: BTreeSet<u32>,
}

/// The basic blocks of a traced method, ordered by start offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockGraph {
    blocks: BTreeMap<u32, BlockInfo>,
}

impl BlockGraph {
    /// Block start offsets in ascending order.
    pub fn block_starts(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.keys().copied()
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no block was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block starting at `offset`.
    #[must_use]
    pub fn block(&self, offset: u32) -> Option<&BlockInfo> {
        self.blocks.get(&offset)
    }

    /// Start offset of the block containing the instruction at `offset`.
    #[must_use]
    pub fn block_start_of(&self, offset: u32) -> Option<u32> {
        self.blocks.range(..=offset).next_back().map(|(&start, _)| start)
    }

    /// Iterates `(start, info)` pairs in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &BlockInfo)> {
        self.blocks.iter().map(|(&start, info)| (start, info))
    }
}

/// Traces every reachable instruction of `source` and returns its basic blocks.
///
/// Blocks are discovered from a FIFO worklist seeded with offset 0. Each block is traced
/// until an instruction closes it or the next instruction already starts a block, in
/// which case a fallthrough edge is added. Entering an already traced block in the
/// middle splits it.
///
/// # Errors
///
/// Propagates [`crate::Error::Malformed`] from [`DexSourceCode::trace_instruction`].
pub fn trace_blocks(source: &DexSourceCode<'_>) -> Result<BlockGraph> {
    let count = source.instruction_count();
    let mut tracer = BlockTracer {
        source,
        graph: BlockGraph::default(),
        processed: BitSet::new(count),
        worklist: VecDeque::new(),
    };
    if count == 0 {
        return Ok(tracer.graph);
    }

    tracer.ensure_block(0, true);
    while let Some(start_offset) = tracer.worklist.pop_front() {
        let start_index = source.instruction_index(start_offset)?;
        if tracer.processed.contains(start_index) {
            continue;
        }

        let mut index = start_index;
        while index < count {
            tracer.processed.insert(index);
            if let Some(closed_at) = source.trace_instruction(index, &mut tracer)? {
                for absorbed in index + 1..=closed_at {
                    tracer.processed.insert(absorbed);
                }
                if closed_at + 1 < count {
                    let next = source.instruction_offset(closed_at + 1)?;
                    tracer.ensure_block(next, false);
                }
                break;
            }

            if index + 1 < count {
                let next = source.instruction_offset(index + 1)?;
                if tracer.graph.blocks.contains_key(&next) {
                    tracer.ensure_successor(start_offset, next, true);
                    break;
                }
            }
            index += 1;
        }
    }
    Ok(tracer.graph)
}

struct BlockTracer<'s, 'a> {
    source: &'s DexSourceCode<'a>,
    graph: BlockGraph,
    processed: BitSet,
    worklist: VecDeque<u32>,
}

impl BlockTracer<'_, '_> {
    fn is_offset_processed(&self, offset: u32) -> bool {
        self.source
            .instruction_index(offset)
            .is_ok_and(|index| self.processed.contains(index))
    }

    fn ensure_block(&mut self, offset: u32, enqueue: bool) {
        if enqueue && !self.is_offset_processed(offset) {
            self.worklist.push_back(offset);
        }
        if self.graph.blocks.contains_key(&offset) {
            return;
        }

        let info = match self.graph.block_start_of(offset) {
            Some(start) if self.is_offset_processed(offset) => self.split(start, offset),
            _ => BlockInfo::default(),
        };
        self.graph.blocks.insert(offset, info);
    }

    /// Splits the traced block at `start` so that a new block begins at `offset`.
    ///
    /// The tail takes over the normal successors and shares the exceptional ones; the head
    /// falls through to the tail.
    fn split(&mut self, start: u32, offset: u32) -> BlockInfo {
        let (normal_successors, exceptional_successors) = match self.graph.blocks.get_mut(&start) {
            Some(existing) => {
                let normal = std::mem::replace(
                    &mut existing.normal_successors,
                    BTreeSet::from([offset]),
                );
                (normal, existing.exceptional_successors.clone())
            }
            None => return BlockInfo::default(),
        };

        for successor in &normal_successors {
            if let Some(info) = self.graph.blocks.get_mut(successor) {
                info.normal_predecessors.remove(&start);
                info.normal_predecessors.insert(offset);
            }
        }
        for successor in &exceptional_successors {
            if let Some(info) = self.graph.blocks.get_mut(successor) {
                info.exceptional_predecessors.insert(offset);
            }
        }

        BlockInfo {
            normal_successors,
            exceptional_successors,
            normal_predecessors: BTreeSet::from([start]),
            exceptional_predecessors: BTreeSet::new(),
        }
    }

    fn ensure_successor(&mut self, source_offset: u32, target_offset: u32, normal: bool) {
        self.ensure_block(target_offset, true);
        let Some(source_start) = self.graph.block_start_of(source_offset) else {
            return;
        };

        if let Some(source) = self.graph.blocks.get_mut(&source_start) {
            if normal {
                source.normal_successors.insert(target_offset);
            } else {
                source.exceptional_successors.insert(target_offset);
            }
        }
        if let Some(target) = self.graph.blocks.get_mut(&target_offset) {
            if normal {
                target.normal_predecessors.insert(source_start);
            } else {
                target.exceptional_predecessors.insert(source_start);
            }
        }
    }
}

impl IrBuilder for BlockTracer<'_, '_> {
    fn ensure_normal_successor_block(&mut self, source_offset: u32, target_offset: u32) {
        self.ensure_successor(source_offset, target_offset, true);
    }

    fn ensure_exceptional_successor_block(&mut self, source_offset: u32, target_offset: u32) {
        self.ensure_successor(source_offset, target_offset, false);
    }

    fn ensure_block_without_enqueuing(&mut self, offset: u32) {
        self.ensure_block(offset, false);
    }
}
