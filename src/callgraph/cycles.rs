//! Call graph cycle elimination.
//!
//! Waves can only be extracted from an acyclic graph, so every cycle has to lose one edge.
//! The eliminator runs an iterative depth-first search over callees and writers and breaks
//! each back edge it meets, choosing the edge to remove by the following preferences:
//!
//! 1. a field-read edge, which never carries an inlining obligation
//! 2. a call to a class initializer, which is never inlined
//! 3. a call edge produced only by large dispatch fan-outs (when enabled)
//! 4. the back edge itself, unless its callee must be force inlined
//! 5. the first call edge of the cycle whose callee is not force inlined
//!
//! Removing an edge inside the cycle instead of the back edge can leave other cycles through
//! the same nodes undetected in the current pass, so the search is repeated from every node
//! whose incoming edge was removed until a pass removes nothing new.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::{
    callgraph::{CallGraph, CallGraphNode},
    program::MethodId,
    Error, Result,
};

/// An edge removed by the [`CycleEliminator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovedEdge {
    /// A call edge from `caller` to `callee`.
    Call {
        /// The calling method.
        caller: MethodId,
        /// The called method.
        callee: MethodId,
    },
    /// A field-read edge from the single `writer` of a field to a `reader` of it.
    FieldRead {
        /// The reading method.
        reader: MethodId,
        /// The only method writing the field.
        writer: MethodId,
    },
}

/// The edges removed by one run of the [`CycleEliminator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleEliminationResult {
    removed_call_edges: BTreeMap<MethodId, BTreeSet<MethodId>>,
    removed_edges: Vec<RemovedEdge>,
}

impl CycleEliminationResult {
    /// Calls `f` with every caller whose call edge to `callee` was removed.
    pub fn for_each_removed_caller(&self, callee: MethodId, mut f: impl FnMut(MethodId)) {
        if let Some(callers) = self.removed_call_edges.get(&callee) {
            callers.iter().copied().for_each(&mut f);
        }
    }

    /// Callees that lost at least one caller, in method order.
    pub fn callees_with_removed_callers(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.removed_call_edges.keys().copied()
    }

    /// Number of removed call edges. Field-read edges are not counted.
    #[must_use]
    pub fn number_of_removed_call_edges(&self) -> usize {
        self.removed_call_edges.values().map(BTreeSet::len).sum()
    }

    /// Every removed edge in the order the removals were applied.
    #[must_use]
    pub fn removed_edges(&self) -> &[RemovedEdge] {
        &self.removed_edges
    }

    /// Returns `true` if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_edges.is_empty()
    }
}

/// Position of a node on the depth-first stack.
#[derive(Debug, Clone, Copy)]
struct StackEntryInfo {
    index: usize,
    predecessor: Option<MethodId>,
    /// The incoming edge has already been scheduled for removal.
    processed: bool,
}

#[derive(Debug)]
enum WorkItem {
    /// Visit a node.
    Node(MethodId),
    /// Continue with the successors of a node already on the stack.
    Iterator {
        node: MethodId,
        successors: Vec<MethodId>,
        position: usize,
    },
}

/// The subsets of the stack whose incoming edge is cheap to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Substack {
    Writer,
    ClassInitializer,
    LikelySpurious,
}

/// Makes a [`CallGraph`] acyclic.
///
/// The eliminator is reusable: all traversal state is cleared after every run. Successors
/// are visited in method order, so the set and order of removed edges only depend on the
/// graph.
///
/// # Example
///
/// ```rust,ignore
/// let mut graph = CallGraphBuilder::new(&program).build()?;
/// let removed = CycleEliminator::new().break_cycles(&mut graph)?;
/// assert!(graph.is_acyclic());
/// ```
#[derive(Debug, Default)]
pub struct CycleEliminator {
    prefer_breaking_likely_spurious_edges: bool,
    verify: bool,

    stack: Vec<MethodId>,
    stack_info: HashMap<MethodId, StackEntryInfo>,
    writer_stack: Vec<MethodId>,
    class_initializer_stack: Vec<MethodId>,
    likely_spurious_stack: Vec<MethodId>,
    marked: HashSet<MethodId>,

    callees_to_be_removed: HashMap<MethodId, BTreeSet<MethodId>>,
    writers_to_be_removed: HashMap<MethodId, BTreeSet<MethodId>>,

    revisit: Vec<MethodId>,
    revisit_set: HashSet<MethodId>,

    result: CycleEliminationResult,
}

impl CycleEliminator {
    /// Creates an eliminator with the default preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefers removing likely spurious call edges inside a cycle over the back edge.
    #[must_use]
    pub fn prefer_breaking_likely_spurious_edges(mut self, enabled: bool) -> Self {
        self.prefer_breaking_likely_spurious_edges = enabled;
        self
    }

    /// Re-runs elimination after each run and fails if anything is left to remove.
    #[must_use]
    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Removes edges from `graph` until it is acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicForceInlining`] if a cycle consists only of calls to
    /// force-inline methods, [`Error::MissingNode`] if an edge points outside the graph and
    /// [`Error::GraphError`] if verification finds a cycle left behind.
    pub fn break_cycles(&mut self, graph: &mut CallGraph) -> Result<CycleEliminationResult> {
        let outcome = self.run(graph);
        self.reset();
        let result = outcome?;

        tracing::debug!(
            removed_call_edges = result.number_of_removed_call_edges(),
            removed_edges = result.removed_edges().len(),
            "call graph cycles broken"
        );

        if self.verify {
            let residual = self.run(graph);
            self.reset();
            let residual = residual?;
            if !residual.is_empty() {
                return Err(Error::GraphError(format!(
                    "cycle elimination is not stable: {} edges removed on the second run",
                    residual.removed_edges().len()
                )));
            }
        }
        Ok(result)
    }

    fn run(&mut self, graph: &mut CallGraph) -> Result<CycleEliminationResult> {
        let mut roots: Vec<MethodId> = graph.methods().collect();
        loop {
            self.traverse(graph, &roots)?;
            roots = std::mem::take(&mut self.revisit);
            self.revisit_set.clear();
            self.marked.clear();
            if roots.is_empty() {
                break;
            }
            tracing::trace!(roots = roots.len(), "revisiting after removal inside cycles");
        }
        Ok(std::mem::take(&mut self.result))
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.stack_info.clear();
        self.writer_stack.clear();
        self.class_initializer_stack.clear();
        self.likely_spurious_stack.clear();
        self.marked.clear();
        self.callees_to_be_removed.clear();
        self.writers_to_be_removed.clear();
        self.revisit.clear();
        self.revisit_set.clear();
        self.result = CycleEliminationResult::default();
    }

    fn traverse(&mut self, graph: &mut CallGraph, roots: &[MethodId]) -> Result<()> {
        let mut work: VecDeque<WorkItem> = roots.iter().copied().map(WorkItem::Node).collect();

        while let Some(item) = work.pop_front() {
            match item {
                WorkItem::Node(method) => {
                    if self.marked.contains(&method) {
                        continue;
                    }
                    let node = graph.node(method).ok_or(Error::MissingNode(method))?;
                    let successors: Vec<MethodId> =
                        node.callees.iter().chain(&node.writers).copied().collect();
                    let predecessor = self.stack.last().copied();
                    self.push(graph, method, predecessor)?;
                    work.push_front(WorkItem::Iterator {
                        node: method,
                        successors,
                        position: 0,
                    });
                }
                WorkItem::Iterator {
                    node,
                    successors,
                    mut position,
                } => match self.iterate_successors(graph, node, &successors, &mut position)? {
                    Some(next) => {
                        work.push_front(WorkItem::Iterator {
                            node,
                            successors,
                            position,
                        });
                        work.push_front(WorkItem::Node(next));
                    }
                    None => {
                        self.pop(node);
                        self.marked.insert(node);
                        self.apply_removals(graph, node);
                    }
                },
            }
        }
        Ok(())
    }

    /// Continues with the successors of `node`. Returns the next node to descend into, or
    /// `None` once all successors are handled.
    fn iterate_successors(
        &mut self,
        graph: &CallGraph,
        node: MethodId,
        successors: &[MethodId],
        position: &mut usize,
    ) -> Result<Option<MethodId>> {
        while let Some(&successor) = successors.get(*position) {
            *position += 1;

            let Some(successor_index) = self.stack_info.get(&successor).map(|info| info.index)
            else {
                return Ok(Some(successor));
            };
            let target = graph.node(successor).ok_or(Error::MissingNode(successor))?;

            if target.has_reader(node) {
                self.remove_field_read_edge(node, successor);
                continue;
            }
            if self.remove_incoming_edge_on_substack(Substack::Writer, successor_index) {
                continue;
            }
            if target.is_class_initializer() && call_edge_removal_is_safe(target) {
                self.remove_call_edge(node, successor);
                continue;
            }
            if self.remove_incoming_edge_on_substack(Substack::ClassInitializer, successor_index) {
                continue;
            }
            if self.prefer_breaking_likely_spurious_edges
                && self.remove_incoming_edge_on_substack(Substack::LikelySpurious, successor_index)
            {
                continue;
            }
            if call_edge_removal_is_safe(target) {
                self.remove_call_edge(node, successor);
                continue;
            }

            // The back edge must stay, find another edge in the cycle.
            let cycle = self.extract_cycle(successor);
            let edge = find_call_edge_for_removal(graph, &cycle);
            self.recover_stack(cycle);
            if let Some((caller, callee)) = edge? {
                tracing::trace!(%caller, %callee, "removing call edge to keep force inlining");
                self.remove_call_edge(caller, callee);
                self.mark_for_revisit(callee);
            }
        }
        Ok(None)
    }

    /// Schedules removal of the incoming edge of the newest substack entry if that entry is
    /// part of the cycle closed at `successor_index`.
    fn remove_incoming_edge_on_substack(&mut self, kind: Substack, successor_index: usize) -> bool {
        let substack = match kind {
            Substack::Writer => &self.writer_stack,
            Substack::ClassInitializer => &self.class_initializer_stack,
            Substack::LikelySpurious => &self.likely_spurious_stack,
        };
        let Some(&entry) = substack.last() else {
            return false;
        };
        let Some(info) = self.stack_info.get_mut(&entry) else {
            return false;
        };
        if info.index <= successor_index {
            return false;
        }
        if info.processed {
            return true;
        }
        let Some(predecessor) = info.predecessor else {
            return false;
        };
        info.processed = true;

        match kind {
            Substack::Writer => self.remove_field_read_edge(predecessor, entry),
            Substack::ClassInitializer | Substack::LikelySpurious => {
                self.remove_call_edge(predecessor, entry);
            }
        }
        self.mark_for_revisit(entry);
        true
    }

    fn push(
        &mut self,
        graph: &CallGraph,
        method: MethodId,
        predecessor: Option<MethodId>,
    ) -> Result<()> {
        debug_assert!(!self.stack_info.contains_key(&method));
        self.stack_info.insert(
            method,
            StackEntryInfo {
                index: self.stack.len(),
                predecessor,
                processed: false,
            },
        );
        self.stack.push(method);

        let Some(predecessor) = predecessor else {
            return Ok(());
        };
        let node = graph.node(method).ok_or(Error::MissingNode(method))?;
        let from = graph
            .node(predecessor)
            .ok_or(Error::MissingNode(predecessor))?;

        if node.is_class_initializer()
            && node.has_caller(predecessor)
            && call_edge_removal_is_safe(node)
        {
            self.class_initializer_stack.push(method);
        } else if from.has_writer(method) {
            self.writer_stack.push(method);
        } else if node.is_likely_spurious_caller(predecessor) && call_edge_removal_is_safe(node) {
            self.likely_spurious_stack.push(method);
        }
        Ok(())
    }

    fn pop(&mut self, method: MethodId) {
        let popped = self.stack.pop();
        debug_assert_eq!(popped, Some(method));
        self.stack_info.remove(&method);
        for substack in [
            &mut self.writer_stack,
            &mut self.class_initializer_stack,
            &mut self.likely_spurious_stack,
        ] {
            if substack.last() == Some(&method) {
                substack.pop();
            }
        }
    }

    fn remove_call_edge(&mut self, caller: MethodId, callee: MethodId) {
        self.callees_to_be_removed
            .entry(caller)
            .or_default()
            .insert(callee);
    }

    fn remove_field_read_edge(&mut self, reader: MethodId, writer: MethodId) {
        self.writers_to_be_removed
            .entry(reader)
            .or_default()
            .insert(writer);
    }

    fn mark_for_revisit(&mut self, method: MethodId) {
        if self.revisit_set.insert(method) {
            self.revisit.push(method);
        }
    }

    /// Applies the removals deferred while `method` was on the stack.
    fn apply_removals(&mut self, graph: &mut CallGraph, method: MethodId) {
        if let Some(callees) = self.callees_to_be_removed.remove(&method) {
            for callee in callees {
                if graph.remove_call_edge(method, callee) {
                    self.result
                        .removed_call_edges
                        .entry(callee)
                        .or_default()
                        .insert(method);
                    self.result.removed_edges.push(RemovedEdge::Call {
                        caller: method,
                        callee,
                    });
                }
            }
        }
        if let Some(writers) = self.writers_to_be_removed.remove(&method) {
            for writer in writers {
                if graph.remove_field_read_edge(method, writer) {
                    self.result.removed_edges.push(RemovedEdge::FieldRead {
                        reader: method,
                        writer,
                    });
                }
            }
        }
    }

    /// Pops the stack down to and including `entry`. The first element is the old top.
    fn extract_cycle(&mut self, entry: MethodId) -> Vec<MethodId> {
        let mut cycle = Vec::new();
        while let Some(top) = self.stack.pop() {
            cycle.push(top);
            if top == entry {
                break;
            }
        }
        cycle
    }

    fn recover_stack(&mut self, cycle: Vec<MethodId>) {
        self.stack.extend(cycle.into_iter().rev());
    }
}

/// Every call edge to a force-inline method must stay so the callee is processed first.
fn call_edge_removal_is_safe(callee: &CallGraphNode) -> bool {
    !callee.is_force_inline()
}

/// Walks the cycle from the newest edge backwards and returns the first call edge that can
/// be removed, or `None` if the cycle is already broken.
fn find_call_edge_for_removal(
    graph: &CallGraph,
    cycle: &[MethodId],
) -> Result<Option<(MethodId, MethodId)>> {
    let Some(&entry) = cycle.last() else {
        return Ok(None);
    };
    let mut callee = entry;
    for &caller in cycle {
        let node = graph.node(caller).ok_or(Error::MissingNode(caller))?;
        if node.has_writer(callee) {
            callee = caller;
            continue;
        }
        if !node.has_callee(callee) {
            return Ok(None);
        }
        let target = graph.node(callee).ok_or(Error::MissingNode(callee))?;
        if call_edge_removal_is_safe(target) {
            return Ok(Some((caller, callee)));
        }
        callee = caller;
    }
    Err(Error::CyclicForceInlining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(index: usize) -> MethodId {
        MethodId::new(index)
    }

    #[test]
    fn test_simple_cycle_loses_back_edge() -> Result<()> {
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        let result = CycleEliminator::new().break_cycles(&mut graph)?;

        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(2),
                callee: m(0)
            }]
        );
        assert_eq!(result.number_of_removed_call_edges(), 1);
        assert!(graph.is_acyclic());
        Ok(())
    }

    #[test]
    fn test_field_read_edge_in_cycle_is_preferred() -> Result<()> {
        // m0 reads a field only m1 writes, m1 calls m0.
        let mut graph = CallGraph::from_edges(2, &[(1, 0)], &[(0, 1)]);
        let result = CycleEliminator::new().break_cycles(&mut graph)?;

        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::FieldRead {
                reader: m(0),
                writer: m(1)
            }]
        );
        assert_eq!(result.number_of_removed_call_edges(), 0);
        assert!(graph.node(m(1)).is_some_and(|node| node.has_callee(m(0))));
        Ok(())
    }

    #[test]
    fn test_force_inline_back_edge_is_kept() -> Result<()> {
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        graph.set_force_inline(m(0), true);
        let result = CycleEliminator::new().break_cycles(&mut graph)?;

        // 2 -> 0 must stay, the walk back from it picks 1 -> 2.
        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(1),
                callee: m(2)
            }]
        );
        assert!(graph.node(m(2)).is_some_and(|node| node.has_callee(m(0))));
        assert!(graph.is_acyclic());
        Ok(())
    }

    #[test]
    fn test_all_force_inline_fails() {
        let mut graph = CallGraph::from_edges(2, &[(0, 1), (1, 0)], &[]);
        graph.set_force_inline(m(0), true);
        graph.set_force_inline(m(1), true);
        let result = CycleEliminator::new().break_cycles(&mut graph);
        assert!(matches!(result, Err(Error::CyclicForceInlining)));
    }

    #[test]
    fn test_class_initializer_edge_is_preferred() -> Result<()> {
        // m0 -> m1 (clinit) -> m2 -> m0: the call into the initializer goes.
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        graph.set_class_initializer(m(1), true);
        let result = CycleEliminator::new().verify(true).break_cycles(&mut graph)?;

        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(0),
                callee: m(1)
            }]
        );
        assert!(graph.is_acyclic());
        Ok(())
    }

    #[test]
    fn test_likely_spurious_edge_is_preferred_when_enabled() -> Result<()> {
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        graph.set_likely_spurious(m(0), m(1));

        let mut preferred = graph.clone();
        let result = CycleEliminator::new()
            .prefer_breaking_likely_spurious_edges(true)
            .break_cycles(&mut preferred)?;
        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(0),
                callee: m(1)
            }]
        );

        let result = CycleEliminator::new().break_cycles(&mut graph)?;
        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(2),
                callee: m(0)
            }]
        );
        Ok(())
    }

    #[test]
    fn test_force_inline_class_initializer_keeps_its_caller() -> Result<()> {
        // m0 -> m1 (force-inline clinit) -> m0: the edge into the initializer must stay.
        let mut graph = CallGraph::from_edges(2, &[(0, 1), (1, 0)], &[]);
        graph.set_class_initializer(m(1), true);
        graph.set_force_inline(m(1), true);
        let result = CycleEliminator::new().verify(true).break_cycles(&mut graph)?;

        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(1),
                callee: m(0)
            }]
        );
        assert!(graph.node(m(0)).is_some_and(|node| node.has_callee(m(1))));
        Ok(())
    }

    #[test]
    fn test_force_inline_class_initializer_inside_cycle_is_not_preferred() -> Result<()> {
        // m0 -> m1 (force-inline clinit) -> m2 -> m0: 2 -> 0 goes instead of 0 -> 1.
        let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
        graph.set_class_initializer(m(1), true);
        graph.set_force_inline(m(1), true);
        let result = CycleEliminator::new().verify(true).break_cycles(&mut graph)?;

        assert_eq!(
            result.removed_edges(),
            &[RemovedEdge::Call {
                caller: m(2),
                callee: m(0)
            }]
        );
        assert!(graph.is_acyclic());
        Ok(())
    }

    /// Random graphs with random force-inline and class initializer flags.
    fn arb_flagged_graph(
    ) -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<(usize, usize)>, Vec<(bool, bool)>)>
    {
        (1usize..16).prop_flat_map(|size| {
            let edge = (0..size, 0..size);
            (
                Just(size),
                prop::collection::vec(edge.clone(), 0..size * 3),
                prop::collection::vec(edge, 0..size),
                prop::collection::vec(
                    (prop::bool::weighted(0.25), prop::bool::weighted(0.25)),
                    size,
                ),
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_force_inline_callees_keep_their_callers(
            (size, calls, reads, flags) in arb_flagged_graph(),
            prefer_spurious in any::<bool>(),
        ) {
            let mut graph = CallGraph::from_edges(size, &calls, &reads);
            for (index, &(force_inline, class_initializer)) in flags.iter().enumerate() {
                graph.set_force_inline(m(index), force_inline);
                graph.set_class_initializer(m(index), class_initializer);
            }
            for &(caller, callee) in &calls {
                if caller % 3 == 0 {
                    graph.set_likely_spurious(m(caller), m(callee));
                }
            }

            let result = CycleEliminator::new()
                .prefer_breaking_likely_spurious_edges(prefer_spurious)
                .break_cycles(&mut graph);
            match result {
                Err(Error::CyclicForceInlining) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
                Ok(result) => {
                    prop_assert!(graph.is_acyclic());
                    for edge in result.removed_edges() {
                        if let RemovedEdge::Call { callee, .. } = *edge {
                            prop_assert!(!flags[callee.index()].0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_acyclic_graph_is_untouched() -> Result<()> {
        let mut graph = CallGraph::from_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)], &[]);
        let before = graph.clone();
        let result = CycleEliminator::new().verify(true).break_cycles(&mut graph)?;
        assert!(result.is_empty());
        assert_eq!(graph, before);
        Ok(())
    }
}
