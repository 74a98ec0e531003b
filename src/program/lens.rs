//! Renaming view over method references.
//!
//! Whole-program passes that run before conversion (class merging, member rebinding, ...)
//! rename or move methods without rewriting every method body. The [`GraphLens`] records
//! those rewrites so that references read from old bytecode are mapped to the current
//! definitions, possibly with a different invoke kind (e.g. a virtual method made static).

use std::collections::HashMap;

use crate::{code::InvokeType, program::MethodRef};

/// The result of mapping a method reference through a [`GraphLens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLookupResult {
    /// The current reference.
    pub reference: MethodRef,
    /// The current invoke kind.
    pub invoke_type: InvokeType,
}

/// A mapping from original to current method references.
#[derive(Debug, Clone, Default)]
pub struct GraphLens {
    methods: HashMap<MethodRef, (MethodRef, Option<InvokeType>)>,
}

impl GraphLens {
    /// Creates the identity lens.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Returns `true` if no rewrites are recorded.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.methods.is_empty()
    }

    /// Records that `from` now lives at `to`, keeping the invoke kind of each use.
    pub fn map_method(&mut self, from: MethodRef, to: MethodRef) {
        self.methods.insert(from, (to, None));
    }

    /// Records that `from` now lives at `to` and must be invoked with `invoke_type`.
    pub fn map_method_with_type(&mut self, from: MethodRef, to: MethodRef, invoke_type: InvokeType) {
        self.methods.insert(from, (to, Some(invoke_type)));
    }

    /// Maps a method reference and its invoke kind to the current definition.
    ///
    /// Chains are not followed, each rewrite is expected to name the final reference.
    #[must_use]
    pub fn lookup_method(&self, reference: &MethodRef, invoke_type: InvokeType) -> MethodLookupResult {
        match self.methods.get(reference) {
            Some((mapped, mapped_type)) => MethodLookupResult {
                reference: mapped.clone(),
                invoke_type: mapped_type.unwrap_or(invoke_type),
            },
            None => MethodLookupResult {
                reference: reference.clone(),
                invoke_type,
            },
        }
    }
}
