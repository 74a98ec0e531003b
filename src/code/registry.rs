//! Visitor over the references a method body makes.

use crate::{
    code::{CallSite, InvokeType, MethodHandle},
    program::{DexType, FieldRef, MethodRef},
};

/// Receives every method, field and type reference of a method body.
///
/// [`crate::code::DexCode::register_code_references`] walks the instructions in order and
/// calls one method per reference. Invokes and field accesses must be handled by every
/// registry; type-only references and call sites have default implementations that
/// forward to the closest required method or ignore the reference.
pub trait UseRegistry {
    /// A virtual invoke.
    fn register_invoke_virtual(&mut self, method: &MethodRef);

    /// A direct invoke of a private method or constructor.
    fn register_invoke_direct(&mut self, method: &MethodRef);

    /// A static invoke.
    fn register_invoke_static(&mut self, method: &MethodRef);

    /// An interface invoke.
    fn register_invoke_interface(&mut self, method: &MethodRef);

    /// A super invoke.
    fn register_invoke_super(&mut self, method: &MethodRef);

    /// An instance field read.
    fn register_instance_field_read(&mut self, field: &FieldRef);

    /// An instance field write.
    fn register_instance_field_write(&mut self, field: &FieldRef);

    /// A static field read.
    fn register_static_field_read(&mut self, field: &FieldRef);

    /// A static field write.
    fn register_static_field_write(&mut self, field: &FieldRef);

    /// An allocation of a class instance.
    fn register_new_instance(&mut self, ty: &DexType);

    /// An explicit class initialization barrier.
    fn register_init_class(&mut self, ty: &DexType) {
        self.register_type_reference(ty);
    }

    /// Any other mention of a type.
    fn register_type_reference(&mut self, _ty: &DexType) {}

    /// An `instance-of` check.
    fn register_instance_of(&mut self, ty: &DexType) {
        self.register_type_reference(ty);
    }

    /// A `check-cast`.
    fn register_check_cast(&mut self, ty: &DexType) {
        self.register_type_reference(ty);
    }

    /// A `const-class`.
    fn register_const_class(&mut self, ty: &DexType) {
        self.register_type_reference(ty);
    }

    /// The guard type of a catch handler.
    fn register_exception_guard(&mut self, ty: &DexType) {
        self.register_type_reference(ty);
    }

    /// An `invoke-custom` call site. The bootstrap handle is reported.
    fn register_call_site(&mut self, call_site: &CallSite) {
        self.register_method_handle(&call_site.bootstrap);
    }

    /// A method handle constant.
    ///
    /// Invoke handles are reported as invokes of the handle's kind, field handles as the
    /// matching field access.
    fn register_method_handle(&mut self, handle: &MethodHandle) {
        match handle {
            MethodHandle::Invoke { kind, method } => self.register_invoke(*kind, method),
            MethodHandle::FieldGet { field, is_static } => {
                if *is_static {
                    self.register_static_field_read(field);
                } else {
                    self.register_instance_field_read(field);
                }
            }
            MethodHandle::FieldPut { field, is_static } => {
                if *is_static {
                    self.register_static_field_write(field);
                } else {
                    self.register_instance_field_write(field);
                }
            }
        }
    }

    /// Dispatches an invoke to the method matching its kind.
    fn register_invoke(&mut self, kind: InvokeType, method: &MethodRef) {
        match kind {
            InvokeType::Direct => self.register_invoke_direct(method),
            InvokeType::Static => self.register_invoke_static(method),
            InvokeType::Super => self.register_invoke_super(method),
            InvokeType::Virtual => self.register_invoke_virtual(method),
            InvokeType::Interface => self.register_invoke_interface(method),
        }
    }
}
