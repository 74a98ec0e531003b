//! Method definitions and their dense identifiers.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use bitflags::bitflags;

use crate::{
    code::DexCode,
    program::{MethodOptimizationInfo, MethodRef},
};

/// Dense identifier of a method within a [`crate::program::Program`].
///
/// Ids are assigned in the total order of [`MethodRef`], so ordering by id is a
/// deterministic order that does not depend on discovery order or hashing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub(crate) u32);

impl MethodId {
    /// Creates a method id from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

bitflags! {
    /// Access and property flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        /// Visible everywhere.
        const PUBLIC = 0x0001;
        /// Visible only inside the holder.
        const PRIVATE = 0x0002;
        /// Visible to subclasses.
        const PROTECTED = 0x0004;
        /// No receiver.
        const STATIC = 0x0008;
        /// Cannot be overridden.
        const FINAL = 0x0010;
        /// Holds the receiver monitor.
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge.
        const BRIDGE = 0x0040;
        /// Implemented outside the bytecode.
        const NATIVE = 0x0100;
        /// Declared without a body.
        const ABSTRACT = 0x0400;
        /// Compiler-generated.
        const SYNTHETIC = 0x1000;
        /// Instance or class initializer.
        const CONSTRUCTOR = 0x10000;
    }
}

/// A method definition owned by the program.
///
/// The identity and flags are immutable. Code and optimization info change while the
/// program is being converted and are guarded by locks so that concurrent workers can
/// observe them.
pub struct Method {
    id: MethodId,
    reference: MethodRef,
    flags: MethodFlags,
    code: RwLock<Option<Arc<DexCode>>>,
    optimization_info: RwLock<MethodOptimizationInfo>,
}

impl Method {
    pub(crate) fn new(
        id: MethodId,
        reference: MethodRef,
        flags: MethodFlags,
        code: Option<DexCode>,
        optimization_info: MethodOptimizationInfo,
    ) -> Self {
        Self {
            id,
            reference,
            flags,
            code: RwLock::new(code.map(Arc::new)),
            optimization_info: RwLock::new(optimization_info),
        }
    }

    /// The method id.
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// The method reference.
    #[must_use]
    pub fn reference(&self) -> &MethodRef {
        &self.reference
    }

    /// The access flags.
    #[must_use]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    /// Returns `true` for native methods.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodFlags::NATIVE)
    }

    /// Returns `true` for bridge methods.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.flags.contains(MethodFlags::BRIDGE)
    }

    /// Returns `true` for the static `<clinit>` method.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.is_static() && self.reference.is_class_initializer()
    }

    /// Returns `true` for methods taking part in virtual dispatch.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_static()
            && !self.flags.contains(MethodFlags::PRIVATE)
            && !self.reference.is_instance_initializer()
    }

    /// Returns `true` if the method currently has a body.
    #[must_use]
    pub fn has_code(&self) -> bool {
        read_lock!(self.code).is_some()
    }

    /// Returns the current body.
    #[must_use]
    pub fn code(&self) -> Option<Arc<DexCode>> {
        read_lock!(self.code).clone()
    }

    /// Attaches a new body, e.g. for a synthesized method.
    pub fn set_code(&self, code: DexCode) {
        *write_lock!(self.code) = Some(Arc::new(code));
    }

    /// Removes the body.
    pub fn clear_code(&self) {
        *write_lock!(self.code) = None;
    }

    /// Returns a snapshot of the committed optimization info.
    #[must_use]
    pub fn optimization_info(&self) -> MethodOptimizationInfo {
        read_lock!(self.optimization_info).clone()
    }

    /// Returns `true` if the committed info marks the method as force-inline.
    #[must_use]
    pub fn is_force_inline(&self) -> bool {
        with_read!(self.optimization_info, MethodOptimizationInfo::force_inline)
    }

    pub(crate) fn update_optimization_info<R>(
        &self,
        f: impl FnOnce(&mut MethodOptimizationInfo) -> R,
    ) -> R {
        with_write!(self.optimization_info, f)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("reference", &self.reference)
            .field("flags", &self.flags)
            .field("has_code", &self.has_code())
            .finish()
    }
}
