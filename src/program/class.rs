//! Class definitions.

use bitflags::bitflags;
use strum::Display;

use crate::program::{DexType, FieldRef, MethodId};

/// Where a class definition comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClassKind {
    /// Compiled and optimized as part of the program.
    Program,
    /// Available for resolution, not part of the output.
    Classpath,
    /// Provided by the runtime.
    Library,
}

bitflags! {
    /// Access flags of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        /// Visible everywhere.
        const PUBLIC = 0x0001;
        /// Cannot be subclassed.
        const FINAL = 0x0010;
        /// Declares an interface.
        const INTERFACE = 0x0200;
        /// Cannot be instantiated.
        const ABSTRACT = 0x0400;
        /// Compiler-generated.
        const SYNTHETIC = 0x1000;
        /// Declares an enum.
        const ENUM = 0x4000;
    }
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    reference: FieldRef,
    is_static: bool,
}

impl Field {
    pub(crate) fn new(reference: FieldRef, is_static: bool) -> Self {
        Self {
            reference,
            is_static,
        }
    }

    /// The field reference.
    #[must_use]
    pub fn reference(&self) -> &FieldRef {
        &self.reference
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }
}

/// A class definition.
#[derive(Debug, Clone)]
pub struct Class {
    pub(crate) ty: DexType,
    pub(crate) superclass: Option<DexType>,
    pub(crate) interfaces: Vec<DexType>,
    pub(crate) kind: ClassKind,
    pub(crate) flags: ClassFlags,
    pub(crate) methods: Vec<MethodId>,
    pub(crate) fields: Vec<Field>,
    pub(crate) class_initializer: Option<MethodId>,
}

impl Class {
    /// The class type.
    #[must_use]
    pub fn ty(&self) -> &DexType {
        &self.ty
    }

    /// The direct superclass, `None` for the root.
    #[must_use]
    pub fn superclass(&self) -> Option<&DexType> {
        self.superclass.as_ref()
    }

    /// The directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[DexType] {
        &self.interfaces
    }

    /// Where the definition comes from.
    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// The access flags.
    #[must_use]
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Returns `true` for program classes.
    #[must_use]
    pub fn is_program_class(&self) -> bool {
        self.kind == ClassKind::Program
    }

    /// Returns `true` for library classes.
    #[must_use]
    pub fn is_library_class(&self) -> bool {
        self.kind == ClassKind::Library
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// Methods declared by this class, in method order.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    /// Fields declared by this class.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The `<clinit>` method, if declared.
    #[must_use]
    pub fn class_initializer(&self) -> Option<MethodId> {
        self.class_initializer
    }

    /// Looks up a declared field by name and type.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> Option<&Field> {
        self.fields
            .iter()
            .find(|candidate| candidate.reference.has_same_signature(field))
    }
}
