//! Construction of [`Program`] instances.
//!
//! Front ends (and tests) describe classes with [`ClassBuilder`] and [`MethodBuilder`]; the
//! [`ProgramBuilder`] assigns method ids in reference order, links the hierarchy and computes
//! field write contexts by scanning every program method body.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    code::{DexCode, InstructionKind, UseRegistry},
    program::{
        Class, ClassFlags, ClassKind, DexType, Field, FieldAccessInfo, FieldRef, GraphLens, Method,
        MethodFlags, MethodId, MethodOptimizationInfo, MethodRef, Program,
    },
    Result,
};

/// Describes one method of a class under construction.
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    proto: String,
    flags: MethodFlags,
    code: Option<DexCode>,
    info: MethodOptimizationInfo,
}

impl MethodBuilder {
    /// A public instance method without a body.
    pub fn new(name: impl Into<String>, proto: impl Into<String>) -> Self {
        let name = name.into();
        let mut flags = MethodFlags::PUBLIC;
        if name == "<init>" {
            flags |= MethodFlags::CONSTRUCTOR;
        }
        Self {
            name,
            proto: proto.into(),
            flags,
            code: None,
            info: MethodOptimizationInfo::default(),
        }
    }

    /// A public static method without a body.
    pub fn new_static(name: impl Into<String>, proto: impl Into<String>) -> Self {
        Self::new(name, proto).with_flags(MethodFlags::STATIC)
    }

    /// The `<clinit>` method without a body.
    #[must_use]
    pub fn class_initializer() -> Self {
        Self::new("<clinit>", "()V").flags(MethodFlags::STATIC | MethodFlags::CONSTRUCTOR)
    }

    /// Replaces the access flags.
    #[must_use]
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Adds access flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Marks the method abstract and drops any body.
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.flags |= MethodFlags::ABSTRACT;
        self.code = None;
        self
    }

    /// Marks the method native and drops any body.
    #[must_use]
    pub fn native_method(mut self) -> Self {
        self.flags |= MethodFlags::NATIVE;
        self.code = None;
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn code(mut self, code: DexCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Sets a body consisting of a single `return-void`.
    #[must_use]
    pub fn empty_body(self) -> Self {
        self.code(DexCode::new(1, 0, vec![InstructionKind::ReturnVoid]))
    }

    /// Requires the method to be inlined into every caller.
    #[must_use]
    pub fn force_inline(mut self) -> Self {
        self.info.set_force_inline(true);
        self
    }
}

/// Describes one class under construction.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    ty: DexType,
    superclass: Option<DexType>,
    interfaces: Vec<DexType>,
    kind: ClassKind,
    flags: ClassFlags,
    methods: Vec<MethodBuilder>,
    fields: Vec<(String, DexType, bool)>,
}

impl ClassBuilder {
    /// A public program class extending `java.lang.Object`.
    pub fn new(descriptor: impl AsRef<str>) -> Self {
        let ty = DexType::new(descriptor);
        let superclass = (ty != DexType::object()).then(DexType::object);
        Self {
            ty,
            superclass,
            interfaces: Vec::new(),
            kind: ClassKind::Program,
            flags: ClassFlags::PUBLIC,
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Sets the superclass.
    #[must_use]
    pub fn extends(mut self, descriptor: impl AsRef<str>) -> Self {
        self.superclass = Some(DexType::new(descriptor));
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, descriptor: impl AsRef<str>) -> Self {
        self.interfaces.push(DexType::new(descriptor));
        self
    }

    /// Declares the class as an interface.
    #[must_use]
    pub fn interface(mut self) -> Self {
        self.flags |= ClassFlags::INTERFACE | ClassFlags::ABSTRACT;
        self
    }

    /// Adds access flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ClassFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Marks the class as a library class.
    #[must_use]
    pub fn library(mut self) -> Self {
        self.kind = ClassKind::Library;
        self
    }

    /// Marks the class as a classpath class.
    #[must_use]
    pub fn classpath(mut self) -> Self {
        self.kind = ClassKind::Classpath;
        self
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a static field.
    #[must_use]
    pub fn static_field(mut self, name: impl Into<String>, ty: impl AsRef<str>) -> Self {
        self.fields.push((name.into(), DexType::new(ty), true));
        self
    }

    /// Adds an instance field.
    #[must_use]
    pub fn instance_field(mut self, name: impl Into<String>, ty: impl AsRef<str>) -> Self {
        self.fields.push((name.into(), DexType::new(ty), false));
        self
    }
}

/// Assembles a [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    classes: Vec<ClassBuilder>,
    pinned_methods: Vec<MethodRef>,
    pinned_fields: Vec<FieldRef>,
    unknown_field_writes: Vec<FieldRef>,
    lens: GraphLens,
}

impl ProgramBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class.
    #[must_use]
    pub fn class(mut self, class: ClassBuilder) -> Self {
        self.classes.push(class);
        self
    }

    /// Pins a method (retained by keep rules).
    #[must_use]
    pub fn pin_method(mut self, method: MethodRef) -> Self {
        self.pinned_methods.push(method);
        self
    }

    /// Pins a field (retained by keep rules), making its writes unknown.
    #[must_use]
    pub fn pin_field(mut self, field: FieldRef) -> Self {
        self.pinned_fields.push(field);
        self
    }

    /// Declares that a field is written from outside the program, e.g. reflectively.
    #[must_use]
    pub fn unknown_field_writes(mut self, field: FieldRef) -> Self {
        self.unknown_field_writes.push(field);
        self
    }

    /// Sets the renaming view.
    #[must_use]
    pub fn lens(mut self, lens: GraphLens) -> Self {
        self.lens = lens;
        self
    }

    /// Builds the program.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for duplicate class or method definitions.
    pub fn build(self) -> Result<Program> {
        let mut classes = BTreeMap::new();
        let mut declared = Vec::new();

        for class in self.classes {
            if classes.contains_key(&class.ty) {
                return Err(malformed_error!("Duplicate class definition {}", class.ty));
            }

            for method in class.methods {
                let reference = MethodRef::new(class.ty.clone(), &method.name, &method.proto);
                declared.push((reference, method.flags, method.code, method.info));
            }

            let fields = class
                .fields
                .into_iter()
                .map(|(name, ty, is_static)| {
                    Field::new(FieldRef::new(class.ty.clone(), name, ty), is_static)
                })
                .collect();

            classes.insert(
                class.ty.clone(),
                Class {
                    ty: class.ty,
                    superclass: class.superclass,
                    interfaces: class.interfaces,
                    kind: class.kind,
                    flags: class.flags,
                    methods: Vec::new(),
                    fields,
                    class_initializer: None,
                },
            );
        }

        declared.sort_by(|a, b| a.0.cmp(&b.0));

        let mut methods = Vec::with_capacity(declared.len());
        let mut method_index = HashMap::with_capacity(declared.len());
        for (index, (reference, flags, code, info)) in declared.into_iter().enumerate() {
            let id = MethodId::new(index);
            if method_index.insert(reference.clone(), id).is_some() {
                return Err(malformed_error!("Duplicate method definition {}", reference));
            }
            let Some(holder) = classes.get_mut(reference.holder()) else {
                return Err(malformed_error!("Method {} has no holder", reference));
            };
            holder.methods.push(id);
            let method = Method::new(id, reference, flags, code, info);
            if method.is_class_initializer() {
                holder.class_initializer = Some(id);
            }
            methods.push(method);
        }

        let mut subtypes: HashMap<DexType, Vec<DexType>> = HashMap::new();
        for class in classes.values() {
            for supertype in class.superclass.iter().chain(class.interfaces.iter()) {
                subtypes
                    .entry(supertype.clone())
                    .or_default()
                    .push(class.ty.clone());
            }
        }

        let pinned_methods = self
            .pinned_methods
            .iter()
            .filter_map(|reference| method_index.get(reference).copied())
            .collect();

        let mut program = Program {
            classes,
            methods,
            method_index,
            subtypes,
            field_access: HashMap::new(),
            pinned_methods,
            pinned_fields: self.pinned_fields.into_iter().collect(),
            lens: self.lens,
        };

        let unknown: HashSet<FieldRef> = self.unknown_field_writes.into_iter().collect();
        program.field_access = collect_field_access(&program, &unknown);
        Ok(program)
    }
}

/// Computes the write contexts of every program field.
fn collect_field_access(
    program: &Program,
    unknown: &HashSet<FieldRef>,
) -> HashMap<FieldRef, FieldAccessInfo> {
    let mut access: HashMap<FieldRef, FieldAccessInfo> = program
        .classes()
        .filter(|class| class.is_program_class())
        .flat_map(Class::fields)
        .map(|field| {
            let reference = field.reference().clone();
            let info = if unknown.contains(&reference) || program.is_field_pinned(&reference) {
                FieldAccessInfo::unknown()
            } else {
                FieldAccessInfo::with_write_contexts([])
            };
            (reference, info)
        })
        .collect();

    for id in program.methods_with_code() {
        let Some(code) = program.method(id).code() else {
            continue;
        };
        let mut collector = FieldWriteCollector {
            program,
            writes: Vec::new(),
        };
        code.register_code_references(&mut collector);
        for field in collector.writes {
            if let Some(info) = access.get_mut(&field) {
                info.record_write(id);
            }
        }
    }

    // Writes from non-program code cannot be enumerated.
    for (field, info) in &mut access {
        if program
            .definition_for(field.holder())
            .is_some_and(|class| !class.is_program_class())
        {
            info.set_unknown();
        }
    }
    access
}

/// Records the resolved target of every field write.
struct FieldWriteCollector<'a> {
    program: &'a Program,
    writes: Vec<FieldRef>,
}

impl FieldWriteCollector<'_> {
    fn record(&mut self, field: &FieldRef) {
        if let Some((_, resolved)) = self.program.resolve_field(field) {
            self.writes.push(resolved.reference().clone());
        }
    }
}

impl UseRegistry for FieldWriteCollector<'_> {
    fn register_invoke_virtual(&mut self, _method: &MethodRef) {}

    fn register_invoke_direct(&mut self, _method: &MethodRef) {}

    fn register_invoke_static(&mut self, _method: &MethodRef) {}

    fn register_invoke_interface(&mut self, _method: &MethodRef) {}

    fn register_invoke_super(&mut self, _method: &MethodRef) {}

    fn register_instance_field_read(&mut self, _field: &FieldRef) {}

    fn register_instance_field_write(&mut self, field: &FieldRef) {
        self.record(field);
    }

    fn register_static_field_read(&mut self, _field: &FieldRef) {}

    fn register_static_field_write(&mut self, field: &FieldRef) {
        self.record(field);
    }

    fn register_new_instance(&mut self, _ty: &DexType) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::InstructionKind;

    #[test]
    fn test_duplicate_class_is_malformed() {
        let result = ProgramBuilder::new()
            .class(ClassBuilder::new("LA;"))
            .class(ClassBuilder::new("LA;"))
            .build();
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_class_initializer_is_linked() -> Result<()> {
        let program = ProgramBuilder::new()
            .class(ClassBuilder::new("LA;").method(MethodBuilder::class_initializer().empty_body()))
            .build()?;
        let class = program.definition_for(&DexType::new("LA;")).expect("class");
        let clinit = class.class_initializer().expect("clinit");
        assert!(program.method(clinit).is_class_initializer());
        Ok(())
    }

    #[test]
    fn test_field_write_contexts_are_collected() -> Result<()> {
        let field = FieldRef::new("LA;", "f", "I");
        let writer = DexCode::new(
            2,
            0,
            vec![
                InstructionKind::Const { dest: 0, value: 1 },
                InstructionKind::StaticPut {
                    src: 0,
                    field: field.clone(),
                },
                InstructionKind::ReturnVoid,
            ],
        );
        let program = ProgramBuilder::new()
            .class(
                ClassBuilder::new("LA;")
                    .static_field("f", "I")
                    .static_field("g", "I")
                    .method(MethodBuilder::new_static("write", "()V").code(writer)),
            )
            .unknown_field_writes(FieldRef::new("LA;", "g", "I"))
            .build()?;

        let writer_id = program
            .lookup_method(&MethodRef::new("LA;", "write", "()V"))
            .expect("writer");
        let info = program.field_access_info(&field).expect("info");
        assert_eq!(info.unique_write_context(), Some(writer_id));

        let unknown = program
            .field_access_info(&FieldRef::new("LA;", "g", "I"))
            .expect("info");
        assert!(!unknown.has_known_write_contexts());
        Ok(())
    }
}
