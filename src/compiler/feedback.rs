//! Sinks for facts that optimizations learn about methods.
//!
//! Optimizations never write [`MethodOptimizationInfo`] directly. They report facts through
//! an [`OptimizationFeedback`], which decides when the facts become visible:
//!
//! - [`OptimizationFeedbackIgnore`] drops them, for passes whose results must not leak
//! - [`OptimizationFeedbackSimple`] applies them immediately, for single-threaded phases
//! - [`OptimizationFeedbackDelayed`] buffers them until the end of the current wave, so a
//!   method never observes a half-updated fact of a method processed concurrently

use dashmap::DashMap;

use crate::{
    program::{DexType, InliningConstraint, Method, MethodId, MethodOptimizationInfo, Program},
    utils::BitSet,
};

/// One fact reported about a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoUpdate {
    /// The method always returns the argument with this index.
    ReturnsArgument(u16),
    /// Every path through the method throws.
    NeverReturnsNormally,
    /// The method has no observable side effects.
    MayNotHaveSideEffects,
    /// The return value depends on the arguments only.
    ReturnValueOnlyDependsOnArguments,
    /// The most precise known return type.
    DynamicReturnType(DexType),
    /// Sets or clears force-inline.
    ForceInline(bool),
    /// The method was inlined into its single call site.
    InlinedIntoSingleCallSite,
    /// The holder's class initializer may run after this method.
    ClassInitializerMayBePostponed,
    /// Parameters that are non-null whenever the method returns normally.
    NonNullParamsOnNormalExits(BitSet),
    /// Arguments that are never read.
    UnusedArguments(BitSet),
    /// The method was processed and may be inlined under this constraint.
    Processed(InliningConstraint),
}

impl InfoUpdate {
    /// Applies the fact to `info`.
    pub fn apply(self, info: &mut MethodOptimizationInfo) {
        match self {
            InfoUpdate::ReturnsArgument(index) => info.set_returned_argument(Some(index)),
            InfoUpdate::NeverReturnsNormally => info.set_never_returns_normally(),
            InfoUpdate::MayNotHaveSideEffects => info.set_may_have_side_effects(false),
            InfoUpdate::ReturnValueOnlyDependsOnArguments => {
                info.set_return_value_only_depends_on_arguments();
            }
            InfoUpdate::DynamicReturnType(ty) => info.set_dynamic_return_type(Some(ty)),
            InfoUpdate::ForceInline(value) => info.set_force_inline(value),
            InfoUpdate::InlinedIntoSingleCallSite => info.set_inlined_into_single_call_site(),
            InfoUpdate::ClassInitializerMayBePostponed => {
                info.set_class_initializer_may_be_postponed();
            }
            InfoUpdate::NonNullParamsOnNormalExits(params) => {
                info.set_non_null_params_on_normal_exits(Some(params));
            }
            InfoUpdate::UnusedArguments(arguments) => info.set_unused_arguments(Some(arguments)),
            InfoUpdate::Processed(constraint) => info.set_inlining_constraint(constraint),
        }
    }
}

/// Receiver of optimization facts.
///
/// Implementations only need [`OptimizationFeedback::update`]; the named operations are
/// shorthands for the individual facts.
pub trait OptimizationFeedback: Send + Sync {
    /// Records one fact about `method`.
    fn update(&self, method: &Method, update: InfoUpdate);

    /// Records that `method` always returns argument `index`.
    fn method_returns_argument(&self, method: &Method, index: u16) {
        self.update(method, InfoUpdate::ReturnsArgument(index));
    }

    /// Records that `method` never returns normally.
    fn method_never_returns_normally(&self, method: &Method) {
        self.update(method, InfoUpdate::NeverReturnsNormally);
    }

    /// Records that `method` has no side effects.
    fn method_may_not_have_side_effects(&self, method: &Method) {
        self.update(method, InfoUpdate::MayNotHaveSideEffects);
    }

    /// Records that the return value of `method` only depends on its arguments.
    fn method_return_value_only_depends_on_arguments(&self, method: &Method) {
        self.update(method, InfoUpdate::ReturnValueOnlyDependsOnArguments);
    }

    /// Records the dynamic return type of `method`.
    fn method_returns_type(&self, method: &Method, ty: DexType) {
        self.update(method, InfoUpdate::DynamicReturnType(ty));
    }

    /// Marks `method` as force-inline.
    fn mark_force_inline(&self, method: &Method) {
        self.update(method, InfoUpdate::ForceInline(true));
    }

    /// Clears force-inline on `method`.
    fn unset_force_inline(&self, method: &Method) {
        self.update(method, InfoUpdate::ForceInline(false));
    }

    /// Records that `method` was inlined into its single call site.
    fn mark_inlined_into_single_call_site(&self, method: &Method) {
        self.update(method, InfoUpdate::InlinedIntoSingleCallSite);
    }

    /// Records that the class initializer of the holder may be postponed.
    fn class_initializer_may_be_postponed(&self, method: &Method) {
        self.update(method, InfoUpdate::ClassInitializerMayBePostponed);
    }

    /// Records the parameters that are non-null on normal exits.
    fn set_non_null_params_on_normal_exits(&self, method: &Method, params: BitSet) {
        self.update(method, InfoUpdate::NonNullParamsOnNormalExits(params));
    }

    /// Records the unused arguments of `method`.
    fn set_unused_arguments(&self, method: &Method, arguments: BitSet) {
        self.update(method, InfoUpdate::UnusedArguments(arguments));
    }

    /// Marks `method` as processed under `constraint`.
    fn mark_processed(&self, method: &Method, constraint: InliningConstraint) {
        self.update(method, InfoUpdate::Processed(constraint));
    }
}

/// Feedback that discards every fact.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationFeedbackIgnore;

impl OptimizationFeedback for OptimizationFeedbackIgnore {
    fn update(&self, _method: &Method, _update: InfoUpdate) {}
}

/// Feedback that writes every fact straight into the method.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationFeedbackSimple;

impl OptimizationFeedback for OptimizationFeedbackSimple {
    fn update(&self, method: &Method, update: InfoUpdate) {
        method.update_optimization_info(|info| update.apply(info));
    }
}

/// Feedback buffered per method until [`OptimizationFeedbackDelayed::update_visible_optimization_info`].
///
/// The first fact reported for a method copies its committed info; later facts update the
/// copy, so the last fact of a kind within a wave wins. Committing replaces the method's
/// info with the copy in method order.
#[derive(Debug, Default)]
pub struct OptimizationFeedbackDelayed {
    pending: DashMap<MethodId, MethodOptimizationInfo>,
}

impl OptimizationFeedbackDelayed {
    /// Creates feedback with nothing buffered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes every buffered fact and returns the number of methods updated.
    pub fn update_visible_optimization_info(&self, program: &Program) -> usize {
        let mut methods: Vec<MethodId> = self.pending.iter().map(|entry| *entry.key()).collect();
        methods.sort_unstable();

        let mut committed = 0;
        for id in methods {
            let Some((_, info)) = self.pending.remove(&id) else {
                continue;
            };
            if let Some(method) = program.get_method(id) {
                method.update_optimization_info(|current| *current = info);
                committed += 1;
            }
        }
        committed
    }

    /// Returns `true` if no fact is waiting to be committed.
    #[must_use]
    pub fn no_updates_left(&self) -> bool {
        self.pending.is_empty()
    }

    /// The buffered info of a method, if any fact was reported since the last commit.
    #[must_use]
    pub fn pending_info(&self, method: MethodId) -> Option<MethodOptimizationInfo> {
        self.pending.get(&method).map(|info| info.clone())
    }
}

impl OptimizationFeedback for OptimizationFeedbackDelayed {
    fn update(&self, method: &Method, update: InfoUpdate) {
        let mut info = self
            .pending
            .entry(method.id())
            .or_insert_with(|| method.optimization_info());
        update.apply(&mut info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ClassBuilder, MethodBuilder};

    fn program() -> crate::Result<Program> {
        Program::builder()
            .class(
                ClassBuilder::new("LA;")
                    .method(MethodBuilder::new_static("a", "(I)I").empty_body())
                    .method(MethodBuilder::new_static("b", "()V").empty_body()),
            )
            .build()
    }

    #[test]
    fn test_ignore_drops_facts() -> crate::Result<()> {
        let program = program()?;
        let method = program.method(MethodId::new(0));
        OptimizationFeedbackIgnore.method_never_returns_normally(method);
        assert!(!method.optimization_info().never_returns_normally());
        Ok(())
    }

    #[test]
    fn test_simple_applies_immediately() -> crate::Result<()> {
        let program = program()?;
        let method = program.method(MethodId::new(0));
        OptimizationFeedbackSimple.method_returns_argument(method, 0);
        OptimizationFeedbackSimple.mark_processed(method, InliningConstraint::Always);

        let info = method.optimization_info();
        assert_eq!(info.returned_argument(), Some(0));
        assert!(info.is_processed());
        Ok(())
    }

    #[test]
    fn test_delayed_commits_at_once() -> crate::Result<()> {
        let program = program()?;
        let feedback = OptimizationFeedbackDelayed::new();
        let a = program.method(MethodId::new(0));
        let b = program.method(MethodId::new(1));

        feedback.mark_force_inline(a);
        feedback.method_may_not_have_side_effects(b);
        feedback.unset_force_inline(a);
        feedback.mark_force_inline(a);

        assert!(!a.is_force_inline());
        assert!(b.optimization_info().may_have_side_effects());
        assert!(!feedback.no_updates_left());
        assert!(feedback
            .pending_info(a.id())
            .is_some_and(|info| info.force_inline()));

        assert_eq!(feedback.update_visible_optimization_info(&program), 2);
        assert!(feedback.no_updates_left());
        assert!(a.is_force_inline());
        assert!(!b.optimization_info().may_have_side_effects());
        Ok(())
    }

    #[test]
    fn test_delayed_keeps_committed_facts() -> crate::Result<()> {
        let program = program()?;
        let method = program.method(MethodId::new(0));
        OptimizationFeedbackSimple.method_never_returns_normally(method);

        let feedback = OptimizationFeedbackDelayed::new();
        feedback.set_unused_arguments(method, BitSet::with_indices(1, [0]));
        feedback.update_visible_optimization_info(&program);

        let info = method.optimization_info();
        assert!(info.never_returns_normally());
        assert_eq!(info.unused_arguments().map(BitSet::count), Some(1));
        Ok(())
    }
}
