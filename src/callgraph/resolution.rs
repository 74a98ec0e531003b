//! Dispatch target resolution using Class Hierarchy Analysis (CHA).
//!
//! A virtual or interface invoke can reach the resolved method and every override of it
//! declared in a subtype of the resolved holder. The resolver computes that set once per
//! resolved method and shares it between all scanning threads.

use std::{
    collections::{BTreeSet, HashSet, VecDeque},
    sync::Arc,
};

use dashmap::DashMap;

use crate::program::{DexType, MethodId, Program};

/// Resolves the possible runtime targets of dynamically dispatched invokes.
///
/// Results are memoized in a concurrent map keyed by the resolved method, so the resolver can
/// be shared by reference across the parallel call graph scan. Only program methods with a
/// concrete implementation are reported.
#[derive(Debug)]
pub struct CallResolver<'p> {
    program: &'p Program,
    possible_targets: DashMap<MethodId, Arc<[MethodId]>>,
}

impl<'p> CallResolver<'p> {
    /// Creates a resolver with an empty cache.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            possible_targets: DashMap::new(),
        }
    }

    /// Returns the program methods a dispatch on `resolved` may reach, in method order.
    ///
    /// Non-virtual methods dispatch only to themselves. Abstract declarations are never
    /// targets.
    pub fn possible_program_targets(&self, resolved: MethodId) -> Arc<[MethodId]> {
        if let Some(cached) = self.possible_targets.get(&resolved) {
            return Arc::clone(cached.value());
        }
        let computed: Arc<[MethodId]> = self.compute_targets(resolved).into_iter().collect();
        Arc::clone(
            self.possible_targets
                .entry(resolved)
                .or_insert(computed)
                .value(),
        )
    }

    /// All transitive subtypes of a type, breadth-first, without the type itself.
    fn all_subtypes(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&DexType> = self.program.direct_subtypes(ty).iter().collect();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            result.push(current.clone());
            queue.extend(self.program.direct_subtypes(current));
        }
        result
    }

    fn compute_targets(&self, resolved: MethodId) -> BTreeSet<MethodId> {
        let program = self.program;
        let method = program.method(resolved);
        let mut targets = BTreeSet::new();

        if !method.is_abstract() && program.is_program_method(resolved) {
            targets.insert(resolved);
        }
        if !method.is_virtual() {
            return targets;
        }

        for subtype in self.all_subtypes(method.reference().holder()) {
            let Some(class) = program.definition_for(&subtype) else {
                continue;
            };
            if !class.is_program_class() {
                continue;
            }
            let overrider = class.methods().iter().copied().find(|&id| {
                let candidate = program.method(id);
                candidate.is_virtual()
                    && candidate
                        .reference()
                        .has_same_signature(method.reference())
            });
            if let Some(id) = overrider {
                if !program.method(id).is_abstract() {
                    targets.insert(id);
                }
            }
        }
        targets
    }
}
