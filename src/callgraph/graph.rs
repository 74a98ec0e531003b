//! The frozen call graph and its wave extraction.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::{
    callgraph::{CallGraphNode, CallSiteInformation},
    program::{MethodId, Program},
    utils::escape_dot,
    Error, Result,
};

/// Directed graph over the methods of one processing phase.
///
/// Nodes are kept in method order. The graph is built by
/// [`crate::callgraph::CallGraphBuilder`], made acyclic by
/// [`crate::callgraph::CycleEliminator`] and then consumed wave by wave with
/// [`CallGraph::extract_leaves`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraph {
    nodes: BTreeMap<MethodId, CallGraphNode>,
}

impl CallGraph {
    /// Creates an empty call graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_nodes(nodes: BTreeMap<MethodId, CallGraphNode>) -> Self {
        Self { nodes }
    }

    /// Builds a graph over methods `0..method_count` from explicit edge lists.
    ///
    /// `calls` holds `(caller, callee)` and `reads` holds `(reader, writer)` pairs of raw
    /// method indices. Self edges are dropped, a self call only counts as a call site. A read
    /// edge parallel to a call edge is dropped as well, as the builder does.
    #[must_use]
    pub fn from_edges(
        method_count: usize,
        calls: &[(usize, usize)],
        reads: &[(usize, usize)],
    ) -> Self {
        let mut nodes: BTreeMap<MethodId, CallGraphNode> = (0..method_count)
            .map(|index| (MethodId::new(index), CallGraphNode::new(MethodId::new(index))))
            .collect();

        for &(caller, callee) in calls {
            let (caller, callee) = (MethodId::new(caller), MethodId::new(callee));
            if let Some(node) = nodes.get_mut(&callee) {
                node.number_of_call_sites += 1;
                if caller != callee {
                    node.callers.insert(caller);
                }
            }
            if caller != callee {
                if let Some(node) = nodes.get_mut(&caller) {
                    node.callees.insert(callee);
                }
            }
        }
        for &(reader, writer) in reads {
            let (reader, writer) = (MethodId::new(reader), MethodId::new(writer));
            let ordered_by_call = nodes
                .get(&reader)
                .is_some_and(|node| node.callees.contains(&writer));
            if reader == writer || ordered_by_call {
                continue;
            }
            if let Some(node) = nodes.get_mut(&writer) {
                node.readers.insert(reader);
            }
            if let Some(node) = nodes.get_mut(&reader) {
                node.writers.insert(writer);
            }
        }
        Self { nodes }
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` once every node has been extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node of a method.
    #[must_use]
    pub fn node(&self, method: MethodId) -> Option<&CallGraphNode> {
        self.nodes.get(&method)
    }

    /// Returns `true` if the method has a node.
    #[must_use]
    pub fn contains(&self, method: MethodId) -> bool {
        self.nodes.contains_key(&method)
    }

    /// Iterates all nodes in method order.
    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.values()
    }

    /// Iterates the methods of all nodes in method order.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of call edges.
    #[must_use]
    pub fn number_of_call_edges(&self) -> usize {
        self.nodes.values().map(|node| node.callees.len()).sum()
    }

    /// Number of field-read edges.
    #[must_use]
    pub fn number_of_field_read_edges(&self) -> usize {
        self.nodes.values().map(|node| node.writers.len()).sum()
    }

    pub(crate) fn remove_call_edge(&mut self, caller: MethodId, callee: MethodId) -> bool {
        let removed = self
            .nodes
            .get_mut(&caller)
            .is_some_and(|node| node.remove_callee(callee));
        if let Some(node) = self.nodes.get_mut(&callee) {
            node.remove_caller(caller);
        }
        removed
    }

    pub(crate) fn remove_field_read_edge(&mut self, reader: MethodId, writer: MethodId) -> bool {
        let removed = self
            .nodes
            .get_mut(&reader)
            .is_some_and(|node| node.remove_writer(writer));
        if let Some(node) = self.nodes.get_mut(&writer) {
            node.remove_reader(reader);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn set_force_inline(&mut self, method: MethodId, value: bool) {
        if let Some(node) = self.nodes.get_mut(&method) {
            node.force_inline = value;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_class_initializer(&mut self, method: MethodId, value: bool) {
        if let Some(node) = self.nodes.get_mut(&method) {
            node.is_class_initializer = value;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_likely_spurious(&mut self, caller: MethodId, callee: MethodId) {
        if let Some(node) = self.nodes.get_mut(&callee) {
            if node.callers.contains(&caller) {
                node.likely_spurious_callers.insert(caller);
            }
        }
    }

    /// Removes every leaf and returns the removed methods in method order.
    ///
    /// A leaf has no callees and no writers. Removing it deletes it from the callees of its
    /// callers and the writers of its readers, which may turn those into leaves for the next
    /// call. On an acyclic graph repeated calls drain the graph; each returned set is one
    /// wave.
    pub fn extract_leaves(&mut self) -> Vec<MethodId> {
        let leaves: Vec<MethodId> = self
            .nodes
            .values()
            .filter(|node| node.is_leaf())
            .map(|node| node.method)
            .collect();

        for leaf in &leaves {
            let Some(node) = self.nodes.remove(leaf) else {
                continue;
            };
            for caller in &node.callers {
                if let Some(caller) = self.nodes.get_mut(caller) {
                    caller.remove_callee(*leaf);
                }
            }
            for reader in &node.readers {
                if let Some(reader) = self.nodes.get_mut(reader) {
                    reader.remove_writer(*leaf);
                }
            }
        }
        leaves
    }

    /// Drains the graph into waves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if a cycle prevents the graph from draining.
    pub fn into_waves(mut self) -> Result<Vec<Vec<MethodId>>> {
        let mut waves = Vec::new();
        while !self.is_empty() {
            let wave = self.extract_leaves();
            if wave.is_empty() {
                return Err(Error::GraphError(format!(
                    "call graph has a cycle through {} remaining methods",
                    self.len()
                )));
            }
            waves.push(wave);
        }
        Ok(waves)
    }

    /// Returns `true` if no cycle exists over call and field-read edges.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        let mut outgoing: BTreeMap<MethodId, usize> = self
            .nodes
            .values()
            .map(|node| (node.method, node.callees.len() + node.writers.len()))
            .collect();
        let mut ready: Vec<MethodId> = outgoing
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&method, _)| method)
            .collect();

        let mut drained = 0;
        while let Some(method) = ready.pop() {
            drained += 1;
            let Some(node) = self.nodes.get(&method) else {
                continue;
            };
            for predecessor in node.callers.iter().chain(&node.readers) {
                if let Some(count) = outgoing.get_mut(predecessor) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(*predecessor);
                    }
                }
            }
        }
        drained == self.nodes.len()
    }

    /// Derives single and double call site information from the current nodes.
    #[must_use]
    pub fn call_site_information(&self, program: &Program) -> CallSiteInformation {
        CallSiteInformation::from_graph(self, program)
    }

    /// Returns statistics about the call graph.
    #[must_use]
    pub fn stats(&self) -> CallGraphStats {
        let likely_spurious_edges = self
            .nodes
            .values()
            .map(|node| node.likely_spurious_callers.len())
            .sum();

        CallGraphStats {
            method_count: self.nodes.len(),
            call_edge_count: self.number_of_call_edges(),
            field_read_edge_count: self.number_of_field_read_edges(),
            likely_spurious_edges,
            leaf_methods: self.nodes.values().filter(|n| n.is_leaf()).count(),
            root_methods: self.nodes.values().filter(|n| n.is_root()).count(),
            force_inline_methods: self.nodes.values().filter(|n| n.force_inline).count(),
            class_initializers: self
                .nodes
                .values()
                .filter(|n| n.is_class_initializer)
                .count(),
        }
    }

    /// Generates a DOT format representation of this call graph.
    ///
    /// Leaves are filled blue and force-inline methods orange. Field-read edges are dashed
    /// and likely spurious call edges dotted. With a program, nodes are labelled with their
    /// method reference instead of the method id.
    #[must_use]
    pub fn to_dot(&self, program: Option<&Program>, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CallGraph {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{}\";", escape_dot(name));
        } else {
            dot.push_str("    label=\"Call Graph\";\n");
        }
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    rankdir=TB;\n\n");

        for node in self.nodes.values() {
            let style = if node.force_inline {
                ", style=filled, fillcolor=orange"
            } else if node.is_leaf() {
                ", style=filled, fillcolor=lightblue"
            } else {
                ""
            };
            let label = match program.and_then(|p| p.get_method(node.method)) {
                Some(method) => method.reference().to_string(),
                None => node.method.to_string(),
            };
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\"{style}];",
                node.method,
                escape_dot(&label)
            );
        }

        dot.push('\n');

        for node in self.nodes.values() {
            for callee in &node.callees {
                let spurious = self
                    .nodes
                    .get(callee)
                    .is_some_and(|target| target.is_likely_spurious_caller(node.method));
                let style = if spurious { " [style=dotted]" } else { "" };
                let _ = writeln!(dot, "    \"{}\" -> \"{callee}\"{style};", node.method);
            }
            for writer in &node.writers {
                let _ = writeln!(dot, "    \"{}\" -> \"{writer}\" [style=dashed];", node.method);
            }
        }

        dot.push_str("}\n");
        dot
    }
}

/// Statistics about a call graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraphStats {
    /// Number of methods (nodes) in the graph.
    pub method_count: usize,
    /// Number of call edges between methods.
    pub call_edge_count: usize,
    /// Number of field-read edges.
    pub field_read_edge_count: usize,
    /// Number of call edges flagged as likely spurious.
    pub likely_spurious_edges: usize,
    /// Number of methods without callees and writers.
    pub leaf_methods: usize,
    /// Number of methods without callers and readers.
    pub root_methods: usize,
    /// Number of force-inline methods.
    pub force_inline_methods: usize,
    /// Number of class initializers.
    pub class_initializers: usize,
}

impl CallGraphStats {
    /// Average number of outgoing edges per method, `0.0` for an empty graph.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_out_degree(&self) -> f64 {
        if self.method_count == 0 {
            0.0
        } else {
            (self.call_edge_count + self.field_read_edge_count) as f64 / self.method_count as f64
        }
    }
}
