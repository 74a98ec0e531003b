//! Optimization facts about methods and access facts about fields.

use std::collections::BTreeSet;

use strum::Display;

use crate::{
    program::{DexType, MethodId},
    utils::BitSet,
};

/// The most permissive context a processed method may be inlined into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InliningConstraint {
    /// The method must never be inlined.
    Never,
    /// The method may only be inlined into methods of the same class.
    SameClass,
    /// The method may only be inlined into methods of the same package.
    SamePackage,
    /// The method may be inlined anywhere.
    Always,
}

/// Facts collected about a method while it is being optimized.
///
/// Every fact starts at its conservative default. Facts are written through an
/// [`crate::compiler::OptimizationFeedback`] sink, never directly by optimizations, so
/// that delayed feedback can buffer them for the duration of a wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOptimizationInfo {
    force_inline: bool,
    inlined_into_single_call_site: bool,
    returned_argument: Option<u16>,
    never_returns_normally: bool,
    may_have_side_effects: bool,
    return_value_only_depends_on_arguments: bool,
    dynamic_return_type: Option<DexType>,
    class_initializer_may_be_postponed: bool,
    non_null_params_on_normal_exits: Option<BitSet>,
    unused_arguments: Option<BitSet>,
    inlining_constraint: Option<InliningConstraint>,
}

impl Default for MethodOptimizationInfo {
    fn default() -> Self {
        Self {
            force_inline: false,
            inlined_into_single_call_site: false,
            returned_argument: None,
            never_returns_normally: false,
            may_have_side_effects: true,
            return_value_only_depends_on_arguments: false,
            dynamic_return_type: None,
            class_initializer_may_be_postponed: false,
            non_null_params_on_normal_exits: None,
            unused_arguments: None,
            inlining_constraint: None,
        }
    }
}

impl MethodOptimizationInfo {
    /// Returns `true` if the method must be inlined into every caller.
    #[must_use]
    pub fn force_inline(&self) -> bool {
        self.force_inline
    }

    /// Returns `true` if the method has been inlined into its single call site.
    #[must_use]
    pub fn is_inlined_into_single_call_site(&self) -> bool {
        self.inlined_into_single_call_site
    }

    /// The argument the method always returns, if known.
    #[must_use]
    pub fn returned_argument(&self) -> Option<u16> {
        self.returned_argument
    }

    /// Returns `true` if every path through the method throws.
    #[must_use]
    pub fn never_returns_normally(&self) -> bool {
        self.never_returns_normally
    }

    /// Returns `true` unless the method was proven free of side effects.
    #[must_use]
    pub fn may_have_side_effects(&self) -> bool {
        self.may_have_side_effects
    }

    /// Returns `true` if the return value only depends on the arguments.
    #[must_use]
    pub fn return_value_only_depends_on_arguments(&self) -> bool {
        self.return_value_only_depends_on_arguments
    }

    /// The most precise known return type.
    #[must_use]
    pub fn dynamic_return_type(&self) -> Option<&DexType> {
        self.dynamic_return_type.as_ref()
    }

    /// Returns `true` if the holder's class initializer may run after this method.
    #[must_use]
    pub fn class_initializer_may_be_postponed(&self) -> bool {
        self.class_initializer_may_be_postponed
    }

    /// Parameters known to be non-null whenever the method returns normally.
    #[must_use]
    pub fn non_null_params_on_normal_exits(&self) -> Option<&BitSet> {
        self.non_null_params_on_normal_exits.as_ref()
    }

    /// Arguments that are never read.
    #[must_use]
    pub fn unused_arguments(&self) -> Option<&BitSet> {
        self.unused_arguments.as_ref()
    }

    /// The inlining constraint recorded once the method was processed.
    #[must_use]
    pub fn inlining_constraint(&self) -> Option<InliningConstraint> {
        self.inlining_constraint
    }

    /// Returns `true` once the method has been processed at least once.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.inlining_constraint.is_some()
    }

    pub(crate) fn set_force_inline(&mut self, value: bool) {
        self.force_inline = value;
    }

    pub(crate) fn set_inlined_into_single_call_site(&mut self) {
        self.inlined_into_single_call_site = true;
    }

    pub(crate) fn set_returned_argument(&mut self, value: Option<u16>) {
        self.returned_argument = value;
    }

    pub(crate) fn set_never_returns_normally(&mut self) {
        self.never_returns_normally = true;
    }

    pub(crate) fn set_may_have_side_effects(&mut self, value: bool) {
        self.may_have_side_effects = value;
    }

    pub(crate) fn set_return_value_only_depends_on_arguments(&mut self) {
        self.return_value_only_depends_on_arguments = true;
    }

    pub(crate) fn set_dynamic_return_type(&mut self, value: Option<DexType>) {
        self.dynamic_return_type = value;
    }

    pub(crate) fn set_class_initializer_may_be_postponed(&mut self) {
        self.class_initializer_may_be_postponed = true;
    }

    pub(crate) fn set_non_null_params_on_normal_exits(&mut self, value: Option<BitSet>) {
        self.non_null_params_on_normal_exits = value;
    }

    pub(crate) fn set_unused_arguments(&mut self, value: Option<BitSet>) {
        self.unused_arguments = value;
    }

    pub(crate) fn set_inlining_constraint(&mut self, value: InliningConstraint) {
        self.inlining_constraint = Some(value);
    }
}

/// What is known about the writes to a field.
///
/// Writes are either unknown (the field is pinned, written reflectively, or written from
/// outside the program) or an exact set of writing methods.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldAccessInfo {
    write_contexts: Option<BTreeSet<MethodId>>,
}

impl FieldAccessInfo {
    /// Creates access info with unknown write contexts.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            write_contexts: None,
        }
    }

    /// Creates access info with the given exact set of writers.
    pub fn with_write_contexts(writers: impl IntoIterator<Item = MethodId>) -> Self {
        Self {
            write_contexts: Some(writers.into_iter().collect()),
        }
    }

    /// Returns `true` if every writer of the field is known.
    #[must_use]
    pub fn has_known_write_contexts(&self) -> bool {
        self.write_contexts.is_some()
    }

    /// Number of known writers, zero when unknown.
    #[must_use]
    pub fn number_of_write_contexts(&self) -> usize {
        self.write_contexts.as_ref().map_or(0, BTreeSet::len)
    }

    /// Returns the unique writer if exactly one write context is known.
    #[must_use]
    pub fn unique_write_context(&self) -> Option<MethodId> {
        match &self.write_contexts {
            Some(writers) if writers.len() == 1 => writers.iter().next().copied(),
            _ => None,
        }
    }

    /// Iterates the known write contexts in method order.
    pub fn write_contexts(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.write_contexts.iter().flatten().copied()
    }

    pub(crate) fn record_write(&mut self, writer: MethodId) {
        if let Some(writers) = &mut self.write_contexts {
            writers.insert(writer);
        }
    }

    pub(crate) fn set_unknown(&mut self) {
        self.write_contexts = None;
    }
}
