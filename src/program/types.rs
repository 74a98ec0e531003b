//! Interned references to types, methods and fields.
//!
//! All references compare structurally, and their derived ordering is the total order used
//! everywhere a deterministic iteration order is required (method ids are assigned in this
//! order, so sorting by [`crate::program::MethodId`] and sorting by [`MethodRef`] agree).

use std::{fmt, sync::Arc};

/// A type descriptor such as `Lcom/example/Foo;`, `I` or `[Ljava/lang/String;`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexType(Arc<str>);

impl DexType {
    /// Creates a type from its descriptor.
    pub fn new(descriptor: impl AsRef<str>) -> Self {
        Self(Arc::from(descriptor.as_ref()))
    }

    /// The `java.lang.Object` root type.
    #[must_use]
    pub fn object() -> Self {
        Self::new("Ljava/lang/Object;")
    }

    /// The `java.lang.Throwable` type used as the implicit guard of catch-all handlers.
    #[must_use]
    pub fn throwable() -> Self {
        Self::new("Ljava/lang/Throwable;")
    }

    /// Returns the raw descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.0
    }

    /// Returns `true` for class types (`L...;`).
    #[must_use]
    pub fn is_class_type(&self) -> bool {
        self.0.starts_with('L')
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array_type(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Returns `true` for primitive types, `void` included.
    #[must_use]
    pub fn is_primitive_type(&self) -> bool {
        self.0.len() == 1
    }

    /// Returns `true` for `long` and `double`, which occupy two registers.
    #[must_use]
    pub fn is_wide_type(&self) -> bool {
        matches!(&*self.0, "J" | "D")
    }

    /// Returns the element type of an array after stripping every dimension.
    #[must_use]
    pub fn base_type(&self) -> DexType {
        let stripped = self.0.trim_start_matches('[');
        if stripped.len() == self.0.len() {
            self.clone()
        } else {
            DexType::new(stripped)
        }
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexType({})", self.0)
    }
}

impl From<&str> for DexType {
    fn from(descriptor: &str) -> Self {
        Self::new(descriptor)
    }
}

/// A method reference: holder, name and prototype descriptor such as `(ILjava/lang/String;)V`.
///
/// The derived ordering compares holder, then name, then prototype.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    holder: DexType,
    name: Arc<str>,
    proto: Arc<str>,
}

impl MethodRef {
    /// Creates a new method reference.
    pub fn new(holder: impl Into<DexType>, name: impl AsRef<str>, proto: impl AsRef<str>) -> Self {
        Self {
            holder: holder.into(),
            name: Arc::from(name.as_ref()),
            proto: Arc::from(proto.as_ref()),
        }
    }

    /// The declaring (or referenced) type.
    #[must_use]
    pub fn holder(&self) -> &DexType {
        &self.holder
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The prototype descriptor.
    #[must_use]
    pub fn proto(&self) -> &str {
        &self.proto
    }

    /// Returns `true` for `<clinit>`.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        &*self.name == "<clinit>"
    }

    /// Returns `true` for `<init>`.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        &*self.name == "<init>"
    }

    /// Returns `true` if both references have the same name and prototype.
    #[must_use]
    pub fn has_same_signature(&self, other: &MethodRef) -> bool {
        self.name == other.name && self.proto == other.proto
    }

    /// Returns a copy of this reference rebound to another holder.
    #[must_use]
    pub fn with_holder(&self, holder: DexType) -> MethodRef {
        MethodRef {
            holder,
            name: Arc::clone(&self.name),
            proto: Arc::clone(&self.proto),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.holder, self.name, self.proto)
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodRef({self})")
    }
}

/// A field reference: holder, name and field type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    holder: DexType,
    name: Arc<str>,
    ty: DexType,
}

impl FieldRef {
    /// Creates a new field reference.
    pub fn new(holder: impl Into<DexType>, name: impl AsRef<str>, ty: impl Into<DexType>) -> Self {
        Self {
            holder: holder.into(),
            name: Arc::from(name.as_ref()),
            ty: ty.into(),
        }
    }

    /// The declaring (or referenced) type.
    #[must_use]
    pub fn holder(&self) -> &DexType {
        &self.holder
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field type.
    #[must_use]
    pub fn field_type(&self) -> &DexType {
        &self.ty
    }

    /// Returns `true` if both references have the same name and type.
    #[must_use]
    pub fn has_same_signature(&self, other: &FieldRef) -> bool {
        self.name == other.name && self.ty == other.ty
    }

    /// Returns a copy of this reference rebound to another holder.
    #[must_use]
    pub fn with_holder(&self, holder: DexType) -> FieldRef {
        FieldRef {
            holder,
            name: Arc::clone(&self.name),
            ty: self.ty.clone(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.holder, self.name, self.ty)
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldRef({self})")
    }
}
