//! Concurrent call graph construction.
//!
//! Every method with code is scanned on the rayon pool with its own [`UseRegistry`] visitor.
//! Nodes live in an arena indexed by [`MethodId`]: a slot is created on first use and edge
//! mutation locks one slot at a time, so the scan never needs a global lock. Once the scan is
//! done the arena is frozen into an ordered [`CallGraph`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, OnceLock, PoisonError},
};

use rayon::prelude::*;

use crate::{
    callgraph::{CallGraph, CallGraphNode, CallResolver},
    code::{InvokeType, UseRegistry},
    program::{DexType, FieldRef, MethodId, MethodRef, Program},
    utils::BitSet,
    Error, Result,
};

/// Edges collected for one method while the scan is running.
#[derive(Debug, Default)]
struct PendingNode {
    callees: BTreeSet<MethodId>,
    writers: BTreeSet<MethodId>,
    /// Caller to "every sighting was likely spurious".
    callers: BTreeMap<MethodId, bool>,
    readers: BTreeSet<MethodId>,
    number_of_call_sites: usize,
}

/// Builds a [`CallGraph`] over the methods of a [`Program`].
///
/// By default every program method with code is scanned and may be a target. A seed set
/// restricts both: only seeds are scanned and edges are only added between seeds, which is
/// how the post-processing phase builds its partial graph.
///
/// # Example
///
/// ```rust
/// use dexconv::callgraph::CallGraphBuilder;
/// use dexconv::program::{ClassBuilder, MethodBuilder, Program};
///
/// let program = Program::builder()
///     .class(ClassBuilder::new("LMain;").method(MethodBuilder::new_static("main", "()V").empty_body()))
///     .build()?;
/// let graph = CallGraphBuilder::new(&program).build()?;
/// assert_eq!(graph.len(), 1);
/// # Ok::<(), dexconv::Error>(())
/// ```
#[derive(Debug)]
pub struct CallGraphBuilder<'p> {
    program: &'p Program,
    resolver: CallResolver<'p>,
    slots: Vec<OnceLock<Mutex<PendingNode>>>,
    seeds: Option<BitSet>,
    likely_spurious_threshold: usize,
    library_invokes: bool,
    verify: bool,
}

impl<'p> CallGraphBuilder<'p> {
    /// Default number of dispatch targets from which call edges count as likely spurious.
    pub const DEFAULT_LIKELY_SPURIOUS_THRESHOLD: usize = 50;

    /// Creates a builder over all methods with code.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            resolver: CallResolver::new(program),
            slots: (0..program.method_count()).map(|_| OnceLock::new()).collect(),
            seeds: None,
            likely_spurious_threshold: Self::DEFAULT_LIKELY_SPURIOUS_THRESHOLD,
            library_invokes: false,
            verify: cfg!(debug_assertions),
        }
    }

    /// Restricts the scan and the edge targets to the given methods.
    #[must_use]
    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = MethodId>) -> Self {
        self.seeds = Some(BitSet::with_indices(
            self.program.method_count(),
            seeds.into_iter().map(MethodId::index),
        ));
        self
    }

    /// Sets the dispatch fan-out from which call edges are flagged as likely spurious.
    #[must_use]
    pub fn likely_spurious_threshold(mut self, threshold: usize) -> Self {
        self.likely_spurious_threshold = threshold;
        self
    }

    /// Also adds dispatch edges for invokes whose resolved holder is a library class.
    #[must_use]
    pub fn add_call_edges_for_library_invokes(mut self, enabled: bool) -> Self {
        self.library_invokes = enabled;
        self
    }

    /// Enables the post-scan check that every scanned method has a node.
    #[must_use]
    pub fn verify(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Scans all methods and freezes the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNode`] if verification is enabled and a scanned method ended
    /// up without a node.
    pub fn build(self) -> Result<CallGraph> {
        let methods = self.methods_to_scan();
        methods.par_iter().for_each(|&method| self.scan(method));

        if self.verify {
            if let Some(&missing) = methods
                .iter()
                .find(|method| self.slots[method.index()].get().is_none())
            {
                return Err(Error::MissingNode(missing));
            }
        }

        let graph = self.freeze();
        tracing::debug!(
            nodes = graph.len(),
            call_edges = graph.number_of_call_edges(),
            read_edges = graph.number_of_field_read_edges(),
            "built call graph"
        );
        Ok(graph)
    }

    fn methods_to_scan(&self) -> Vec<MethodId> {
        match &self.seeds {
            Some(seeds) => seeds
                .iter()
                .map(MethodId::new)
                .filter(|&id| {
                    self.program.is_program_method(id) && self.program.method(id).has_code()
                })
                .collect(),
            None => self.program.methods_with_code(),
        }
    }

    fn scan(&self, method: MethodId) {
        self.slot(method);
        // The body may have been cleared since the method list was taken.
        let Some(code) = self.program.method(method).code() else {
            return;
        };
        let mut extractor = InvokeExtractor {
            builder: self,
            caller: method,
        };
        code.register_code_references(&mut extractor);
    }

    fn slot(&self, method: MethodId) -> &Mutex<PendingNode> {
        self.slots[method.index()].get_or_init(|| Mutex::new(PendingNode::default()))
    }

    fn is_target(&self, method: MethodId) -> bool {
        match &self.seeds {
            Some(seeds) => seeds.contains(method.index()),
            None => {
                self.program.is_program_method(method) && self.program.method(method).has_code()
            }
        }
    }

    fn add_call_edge(&self, caller: MethodId, callee: MethodId, likely_spurious: bool) {
        if !self.is_target(callee) {
            return;
        }
        let target = self.program.method(callee);
        if target.is_abstract() || target.is_native() {
            return;
        }
        // Kept methods are neither inlined nor analysed, an edge would only add cycles.
        if self.program.is_pinned(callee) {
            return;
        }

        {
            let mut node = lock!(self.slot(callee));
            node.number_of_call_sites += 1;
            if caller == callee {
                return;
            }
            node.callers
                .entry(caller)
                .and_modify(|spurious| *spurious &= likely_spurious)
                .or_insert(likely_spurious);
        }
        lock!(self.slot(caller)).callees.insert(callee);
    }

    fn add_field_read_edge(&self, reader: MethodId, writer: MethodId) {
        if reader == writer || !self.is_target(writer) {
            return;
        }
        lock!(self.slot(writer)).readers.insert(reader);
        lock!(self.slot(reader)).writers.insert(writer);
    }

    fn freeze(self) -> CallGraph {
        let program = self.program;
        let mut nodes = BTreeMap::new();

        for (index, slot) in self.slots.into_iter().enumerate() {
            let Some(pending) = slot.into_inner() else {
                continue;
            };
            let pending = pending.into_inner().unwrap_or_else(PoisonError::into_inner);
            let id = MethodId::new(index);
            let method = program.method(id);

            let mut node = CallGraphNode::new(id);
            node.callees = pending.callees;
            node.writers = pending.writers;
            node.readers = pending.readers;
            node.number_of_call_sites = pending.number_of_call_sites;
            node.is_class_initializer = method.is_class_initializer();
            node.force_inline = method.is_force_inline();
            for (caller, likely_spurious) in pending.callers {
                node.callers.insert(caller);
                if likely_spurious {
                    node.likely_spurious_callers.insert(caller);
                }
            }
            nodes.insert(id, node);
        }

        // A call edge already orders the pair, the read edge adds nothing.
        let redundant: Vec<(MethodId, MethodId)> = nodes
            .values()
            .flat_map(|reader| {
                reader
                    .writers
                    .iter()
                    .filter(|writer| reader.callees.contains(writer))
                    .map(move |&writer| (reader.method, writer))
            })
            .collect();
        for (reader, writer) in redundant {
            if let Some(node) = nodes.get_mut(&reader) {
                node.remove_writer(writer);
            }
            if let Some(node) = nodes.get_mut(&writer) {
                node.remove_reader(reader);
            }
        }

        CallGraph::from_nodes(nodes)
    }
}

/// Visitor turning the references of one method body into graph edges.
struct InvokeExtractor<'a, 'p> {
    builder: &'a CallGraphBuilder<'p>,
    caller: MethodId,
}

impl InvokeExtractor<'_, '_> {
    fn program(&self) -> &Program {
        self.builder.program
    }

    fn add_class_initializer_target(&self, ty: &DexType) {
        let Some(class) = self.program().program_definition_for(ty) else {
            return;
        };
        if let Some(initializer) = class.class_initializer() {
            self.builder.add_call_edge(self.caller, initializer, false);
        }
    }

    fn process_invoke(&self, kind: InvokeType, reference: &MethodRef) {
        let lookup = self.program().graph_lens().lookup_method(reference, kind);

        if lookup.invoke_type.is_dynamic_dispatch() {
            if let Some(resolved) = self.program().resolve_method(&lookup.reference) {
                self.process_invoke_with_dynamic_dispatch(resolved);
            }
            return;
        }

        let Some(target) =
            self.program()
                .lookup_single_target(lookup.invoke_type, &lookup.reference, self.caller)
        else {
            return;
        };
        if lookup.invoke_type == InvokeType::Static {
            let holder = self.program().method(target).reference().holder().clone();
            self.add_class_initializer_target(&holder);
        }
        self.builder.add_call_edge(self.caller, target, false);
    }

    fn process_invoke_with_dynamic_dispatch(&self, resolved: MethodId) {
        let Some(holder) = self.program().holder_of(resolved) else {
            tracing::trace!(method = %resolved, "no holder for resolved dispatch target");
            return;
        };
        // Library methods usually have too many overriders to be useful.
        if holder.is_library_class() && !self.builder.library_invokes {
            return;
        }

        let targets = self.builder.resolver.possible_program_targets(resolved);
        let likely_spurious = targets.len() >= self.builder.likely_spurious_threshold;
        for &target in targets.iter() {
            self.builder
                .add_call_edge(self.caller, target, likely_spurious);
        }
    }

    fn process_field_read(&self, field: &FieldRef) {
        let program = self.program();
        let Some((class, resolved)) = program.resolve_field(field) else {
            return;
        };
        if program.is_field_pinned(resolved.reference()) || !class.is_program_class() {
            return;
        }

        if resolved.is_static() {
            self.add_class_initializer_target(class.ty());
        }

        let Some(info) = program.field_access_info(resolved.reference()) else {
            return;
        };
        if info.has_known_write_contexts() && info.number_of_write_contexts() == 1 {
            for writer in info.write_contexts() {
                self.builder.add_field_read_edge(self.caller, writer);
            }
        }
    }

    fn process_field_write(&self, field: &FieldRef) {
        if let Some((class, resolved)) = self.program().resolve_field(field) {
            if resolved.is_static() {
                self.add_class_initializer_target(class.ty());
            }
        }
    }
}

impl UseRegistry for InvokeExtractor<'_, '_> {
    fn register_invoke_virtual(&mut self, method: &MethodRef) {
        self.process_invoke(InvokeType::Virtual, method);
    }

    fn register_invoke_direct(&mut self, method: &MethodRef) {
        self.process_invoke(InvokeType::Direct, method);
    }

    fn register_invoke_static(&mut self, method: &MethodRef) {
        self.process_invoke(InvokeType::Static, method);
    }

    fn register_invoke_interface(&mut self, method: &MethodRef) {
        self.process_invoke(InvokeType::Interface, method);
    }

    fn register_invoke_super(&mut self, method: &MethodRef) {
        self.process_invoke(InvokeType::Super, method);
    }

    fn register_instance_field_read(&mut self, field: &FieldRef) {
        self.process_field_read(field);
    }

    fn register_instance_field_write(&mut self, field: &FieldRef) {
        self.process_field_write(field);
    }

    fn register_static_field_read(&mut self, field: &FieldRef) {
        self.process_field_read(field);
    }

    fn register_static_field_write(&mut self, field: &FieldRef) {
        self.process_field_write(field);
    }

    fn register_new_instance(&mut self, ty: &DexType) {
        if ty.is_class_type() {
            self.add_class_initializer_target(ty);
        }
    }

    fn register_init_class(&mut self, ty: &DexType) {
        self.add_class_initializer_target(ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{DexCode, InstructionKind},
        program::{ClassBuilder, MethodBuilder},
    };

    fn invoke_static(holder: &str, name: &str) -> InstructionKind {
        InstructionKind::Invoke {
            kind: InvokeType::Static,
            method: MethodRef::new(holder, name, "()V"),
            args: vec![],
        }
    }

    fn body(mut instructions: Vec<InstructionKind>) -> DexCode {
        instructions.push(InstructionKind::ReturnVoid);
        DexCode::new(1, 0, instructions)
    }

    fn id(program: &Program, holder: &str, name: &str) -> MethodId {
        program
            .lookup_method(&MethodRef::new(holder, name, "()V"))
            .unwrap_or_else(|| panic!("missing {holder}->{name}"))
    }

    #[test]
    fn test_static_invoke_adds_class_initializer_edge() -> crate::Result<()> {
        let program = Program::builder()
            .class(
                ClassBuilder::new("LA;").method(
                    MethodBuilder::new_static("a", "()V").code(body(vec![invoke_static("LB;", "b")])),
                ),
            )
            .class(
                ClassBuilder::new("LB;")
                    .method(MethodBuilder::new_static("b", "()V").empty_body())
                    .method(MethodBuilder::class_initializer().empty_body()),
            )
            .build()?;

        let graph = CallGraphBuilder::new(&program).build()?;
        let a = id(&program, "LA;", "a");
        let b = id(&program, "LB;", "b");
        let clinit = id(&program, "LB;", "<clinit>");

        let node = graph.node(a).ok_or(Error::MissingNode(a))?;
        assert!(node.has_callee(b));
        assert!(node.has_callee(clinit));
        assert!(graph.node(clinit).is_some_and(CallGraphNode::is_class_initializer));
        Ok(())
    }

    #[test]
    fn test_self_call_counts_without_edge() -> crate::Result<()> {
        let program = Program::builder()
            .class(ClassBuilder::new("LA;").method(
                MethodBuilder::new_static("a", "()V")
                    .code(body(vec![invoke_static("LA;", "a"), invoke_static("LA;", "a")])),
            ))
            .build()?;

        let graph = CallGraphBuilder::new(&program).build()?;
        let a = id(&program, "LA;", "a");
        let node = graph.node(a).ok_or(Error::MissingNode(a))?;
        assert!(node.callees().is_empty());
        assert!(node.callers().is_empty());
        assert_eq!(node.number_of_call_sites(), 2);
        Ok(())
    }

    #[test]
    fn test_pinned_and_native_targets_are_skipped() -> crate::Result<()> {
        let program = Program::builder()
            .class(
                ClassBuilder::new("LA;")
                    .method(MethodBuilder::new_static("a", "()V").code(body(vec![
                        invoke_static("LA;", "kept"),
                        invoke_static("LA;", "jni"),
                    ])))
                    .method(MethodBuilder::new_static("kept", "()V").empty_body())
                    .method(MethodBuilder::new_static("jni", "()V").native_method()),
            )
            .pin_method(MethodRef::new("LA;", "kept", "()V"))
            .build()?;

        let graph = CallGraphBuilder::new(&program).build()?;
        let a = id(&program, "LA;", "a");
        assert!(graph.node(a).is_some_and(CallGraphNode::is_leaf));
        assert!(graph.node(id(&program, "LA;", "jni")).is_none());
        Ok(())
    }

    #[test]
    fn test_seeds_limit_edges() -> crate::Result<()> {
        let program = Program::builder()
            .class(
                ClassBuilder::new("LA;")
                    .method(MethodBuilder::new_static("a", "()V").code(body(vec![
                        invoke_static("LA;", "b"),
                        invoke_static("LA;", "c"),
                    ])))
                    .method(MethodBuilder::new_static("b", "()V").empty_body())
                    .method(MethodBuilder::new_static("c", "()V").empty_body()),
            )
            .build()?;

        let a = id(&program, "LA;", "a");
        let b = id(&program, "LA;", "b");
        let c = id(&program, "LA;", "c");
        let graph = CallGraphBuilder::new(&program).with_seeds([a, b]).build()?;
        assert_eq!(graph.len(), 2);
        assert!(graph.node(c).is_none());
        let node = graph.node(a).ok_or(Error::MissingNode(a))?;
        assert_eq!(node.callees().iter().copied().collect::<Vec<_>>(), vec![b]);
        Ok(())
    }
}
