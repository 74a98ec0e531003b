//! Call graph nodes.

use std::collections::BTreeSet;

use crate::program::MethodId;

/// A method in the call graph together with its incoming and outgoing edges.
///
/// Two edge kinds exist. A call edge `caller -> callee` means the callee should be processed
/// before the caller. A field-read edge `writer -> reader` means the single method writing a
/// field should be processed before the methods reading it. For the processing order both
/// kinds point the same way: `callees` and `writers` must be processed first.
///
/// Sets are ordered by method id, so every iteration over a node is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallGraphNode {
    /// The method represented by this node.
    pub method: MethodId,
    pub(crate) callees: BTreeSet<MethodId>,
    pub(crate) callers: BTreeSet<MethodId>,
    pub(crate) readers: BTreeSet<MethodId>,
    pub(crate) writers: BTreeSet<MethodId>,
    pub(crate) likely_spurious_callers: BTreeSet<MethodId>,
    pub(crate) number_of_call_sites: usize,
    pub(crate) is_class_initializer: bool,
    pub(crate) force_inline: bool,
}

impl CallGraphNode {
    /// Creates a node without edges.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            callees: BTreeSet::new(),
            callers: BTreeSet::new(),
            readers: BTreeSet::new(),
            writers: BTreeSet::new(),
            likely_spurious_callers: BTreeSet::new(),
            number_of_call_sites: 0,
            is_class_initializer: false,
            force_inline: false,
        }
    }

    /// Methods called by this method.
    #[must_use]
    pub fn callees(&self) -> &BTreeSet<MethodId> {
        &self.callees
    }

    /// Methods calling this method.
    #[must_use]
    pub fn callers(&self) -> &BTreeSet<MethodId> {
        &self.callers
    }

    /// Methods reading a field that this method is the only writer of.
    #[must_use]
    pub fn readers(&self) -> &BTreeSet<MethodId> {
        &self.readers
    }

    /// The single writers of fields this method reads.
    #[must_use]
    pub fn writers(&self) -> &BTreeSet<MethodId> {
        &self.writers
    }

    /// Returns `true` if `callee` is called by this method.
    #[must_use]
    pub fn has_callee(&self, callee: MethodId) -> bool {
        self.callees.contains(&callee)
    }

    /// Returns `true` if `caller` calls this method.
    #[must_use]
    pub fn has_caller(&self, caller: MethodId) -> bool {
        self.callers.contains(&caller)
    }

    /// Returns `true` if `reader` reads a field written only by this method.
    #[must_use]
    pub fn has_reader(&self, reader: MethodId) -> bool {
        self.readers.contains(&reader)
    }

    /// Returns `true` if this method reads a field written only by `writer`.
    #[must_use]
    pub fn has_writer(&self, writer: MethodId) -> bool {
        self.writers.contains(&writer)
    }

    /// Returns `true` if every call site that produced the edge from `caller` was a virtual
    /// dispatch with a large fan-out.
    #[must_use]
    pub fn is_likely_spurious_caller(&self, caller: MethodId) -> bool {
        self.likely_spurious_callers.contains(&caller)
    }

    /// Number of call sites targeting this method, recursive self-calls included.
    ///
    /// Counted at build time and not updated when edges are removed.
    #[must_use]
    pub fn number_of_call_sites(&self) -> usize {
        self.number_of_call_sites
    }

    /// Returns `true` if the method is a class initializer.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.is_class_initializer
    }

    /// Returns `true` if the method must be inlined into its callers.
    #[must_use]
    pub fn is_force_inline(&self) -> bool {
        self.force_inline
    }

    /// A leaf has no outgoing edges of either kind and can be processed now.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.callees.is_empty() && self.writers.is_empty()
    }

    /// A root has no incoming edges of either kind.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.callers.is_empty() && self.readers.is_empty()
    }

    pub(crate) fn remove_callee(&mut self, callee: MethodId) -> bool {
        self.callees.remove(&callee)
    }

    pub(crate) fn remove_caller(&mut self, caller: MethodId) -> bool {
        self.likely_spurious_callers.remove(&caller);
        self.callers.remove(&caller)
    }

    pub(crate) fn remove_reader(&mut self, reader: MethodId) -> bool {
        self.readers.remove(&reader)
    }

    pub(crate) fn remove_writer(&mut self, writer: MethodId) -> bool {
        self.writers.remove(&writer)
    }
}
