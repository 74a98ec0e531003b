//! The application view: every class and method the conversion sees.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::{
    code::InvokeType,
    program::{
        Class, DexType, Field, FieldAccessInfo, FieldRef, GraphLens, Method, MethodId, MethodRef,
        ProgramBuilder,
    },
};

/// An immutable-shape view of the program being compiled.
///
/// Classes and methods cannot be added or removed once the program is built; method bodies
/// and optimization info can change while the conversion runs.
///
/// Method ids are dense and follow the [`MethodRef`] order, so `program.methods()` iterates
/// in a deterministic order.
pub struct Program {
    pub(crate) classes: BTreeMap<DexType, Class>,
    pub(crate) methods: Vec<Method>,
    pub(crate) method_index: HashMap<MethodRef, MethodId>,
    pub(crate) subtypes: HashMap<DexType, Vec<DexType>>,
    pub(crate) field_access: HashMap<FieldRef, FieldAccessInfo>,
    pub(crate) pinned_methods: HashSet<MethodId>,
    pub(crate) pinned_fields: HashSet<FieldRef>,
    pub(crate) lens: GraphLens,
}

impl Program {
    /// Starts building a program.
    #[must_use]
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::new()
    }

    /// Returns the method with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this program.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    /// Returns the method with the given id, if it belongs to this program.
    #[must_use]
    pub fn get_method(&self, id: MethodId) -> Option<&Method> {
        self.methods.get(id.index())
    }

    /// Iterates all methods in method order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter()
    }

    /// Number of methods, which is also the exclusive upper bound of method indices.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Finds the id of a method definition by its exact reference.
    #[must_use]
    pub fn lookup_method(&self, reference: &MethodRef) -> Option<MethodId> {
        self.method_index.get(reference).copied()
    }

    /// Iterates all class definitions in type order.
    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    /// Returns the definition of a type. Array types resolve to their element type.
    #[must_use]
    pub fn definition_for(&self, ty: &DexType) -> Option<&Class> {
        if ty.is_array_type() {
            return self.classes.get(&ty.base_type());
        }
        self.classes.get(ty)
    }

    /// Returns the definition of a type if it is a program class.
    #[must_use]
    pub fn program_definition_for(&self, ty: &DexType) -> Option<&Class> {
        self.definition_for(ty).filter(|class| class.is_program_class())
    }

    /// Returns the class declaring a method.
    #[must_use]
    pub fn holder_of(&self, id: MethodId) -> Option<&Class> {
        self.definition_for(self.method(id).reference().holder())
    }

    /// Returns `true` if the method is declared by a program class.
    #[must_use]
    pub fn is_program_method(&self, id: MethodId) -> bool {
        self.holder_of(id).is_some_and(Class::is_program_class)
    }

    /// Program methods that currently have code, in method order.
    #[must_use]
    pub fn methods_with_code(&self) -> Vec<MethodId> {
        self.methods
            .iter()
            .filter(|method| method.has_code() && self.is_program_method(method.id()))
            .map(Method::id)
            .collect()
    }

    /// Returns `true` if the method is retained by keep rules.
    #[must_use]
    pub fn is_pinned(&self, id: MethodId) -> bool {
        self.pinned_methods.contains(&id)
    }

    /// Returns `true` if the field is retained by keep rules.
    #[must_use]
    pub fn is_field_pinned(&self, field: &FieldRef) -> bool {
        self.pinned_fields.contains(field)
    }

    /// Write information for a resolved program field.
    #[must_use]
    pub fn field_access_info(&self, field: &FieldRef) -> Option<&FieldAccessInfo> {
        self.field_access.get(field)
    }

    /// The active renaming view.
    #[must_use]
    pub fn graph_lens(&self) -> &GraphLens {
        &self.lens
    }

    /// Direct subtypes of a type: extending classes and implementing classes or interfaces.
    #[must_use]
    pub fn direct_subtypes(&self, ty: &DexType) -> &[DexType] {
        self.subtypes.get(ty).map_or(&[], Vec::as_slice)
    }

    /// Resolves a method reference against the hierarchy.
    ///
    /// The holder and its superclasses are searched first. Failing that, the interfaces of
    /// the hierarchy are searched breadth-first, preferring a default method over an
    /// abstract declaration.
    #[must_use]
    pub fn resolve_method(&self, reference: &MethodRef) -> Option<MethodId> {
        let holder = self.definition_for(reference.holder())?;

        let mut current = Some(holder);
        while let Some(class) = current {
            if let Some(found) = self.find_declared_method(class, reference) {
                return Some(found);
            }
            current = class.superclass().and_then(|ty| self.definition_for(ty));
        }

        let mut abstract_candidate = None;
        for interface in self.all_interfaces(reference.holder()) {
            let Some(class) = self.definition_for(&interface) else {
                continue;
            };
            if let Some(found) = self.find_declared_method(class, reference) {
                if !self.method(found).is_abstract() {
                    return Some(found);
                }
                abstract_candidate.get_or_insert(found);
            }
        }
        abstract_candidate
    }

    /// Resolves a field reference, searching superclasses and then interfaces.
    #[must_use]
    pub fn resolve_field(&self, field: &FieldRef) -> Option<(&Class, &Field)> {
        let holder = self.definition_for(field.holder())?;

        let mut current = Some(holder);
        while let Some(class) = current {
            if let Some(found) = class.lookup_field(field) {
                return Some((class, found));
            }
            current = class.superclass().and_then(|ty| self.definition_for(ty));
        }

        self.all_interfaces(field.holder())
            .into_iter()
            .filter_map(|interface| self.definition_for(&interface))
            .find_map(|class| class.lookup_field(field).map(|found| (class, found)))
    }

    /// Looks up the single target of a non-dispatching invoke.
    ///
    /// Returns `None` for virtual and interface invokes (which need dispatch analysis), for
    /// unresolvable references, and when the resolved method has the wrong staticness for
    /// the invoke kind.
    #[must_use]
    pub fn lookup_single_target(
        &self,
        invoke_type: InvokeType,
        reference: &MethodRef,
        context: MethodId,
    ) -> Option<MethodId> {
        match invoke_type {
            InvokeType::Direct => self
                .resolve_method(reference)
                .filter(|&target| !self.method(target).is_static()),
            InvokeType::Static => self
                .resolve_method(reference)
                .filter(|&target| self.method(target).is_static()),
            InvokeType::Super => {
                let context_holder = self.holder_of(context)?;
                let start = if context_holder.is_interface() {
                    reference.holder().clone()
                } else {
                    context_holder.superclass()?.clone()
                };
                self.resolve_method(&reference.with_holder(start))
                    .filter(|&target| !self.method(target).is_static())
            }
            InvokeType::Virtual | InvokeType::Interface => None,
        }
    }

    fn find_declared_method(&self, class: &Class, reference: &MethodRef) -> Option<MethodId> {
        class
            .methods()
            .iter()
            .copied()
            .find(|&id| self.method(id).reference().has_same_signature(reference))
    }

    /// All interfaces implemented by a type, breadth-first in declaration order.
    fn all_interfaces(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut worklist = VecDeque::new();

        let mut current = self.definition_for(ty);
        while let Some(class) = current {
            if class.is_interface() && seen.insert(class.ty().clone()) {
                result.push(class.ty().clone());
            }
            worklist.extend(class.interfaces().iter().cloned());
            current = class.superclass().and_then(|s| self.definition_for(s));
        }

        while let Some(interface) = worklist.pop_front() {
            if !seen.insert(interface.clone()) {
                continue;
            }
            if let Some(class) = self.definition_for(&interface) {
                worklist.extend(class.interfaces().iter().cloned());
            }
            result.push(interface);
        }
        result
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .field("pinned_methods", &self.pinned_methods.len())
            .finish_non_exhaustive()
    }
}
