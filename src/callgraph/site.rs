//! Call site counts derived from a call graph.

use std::collections::BTreeSet;

use crate::{
    callgraph::CallGraph,
    program::{MethodId, Program},
};

/// Methods known to be called from exactly one or exactly two call sites.
///
/// Counts come from the call graph before cycle elimination removes any edge, so a method
/// whose only call was cut from a cycle still counts as single call site. Pinned methods
/// never qualify: callers outside the program may exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSiteInformation {
    single_call_site: BTreeSet<MethodId>,
    double_call_site: BTreeSet<MethodId>,
}

impl CallSiteInformation {
    /// Information that knows nothing about any method.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Collects the counts of every node in `graph`.
    #[must_use]
    pub fn from_graph(graph: &CallGraph, program: &Program) -> Self {
        let mut information = Self::default();
        for node in graph.nodes() {
            if program.is_pinned(node.method) {
                continue;
            }
            match node.number_of_call_sites() {
                1 => {
                    information.single_call_site.insert(node.method);
                }
                2 => {
                    information.double_call_site.insert(node.method);
                }
                _ => {}
            }
        }
        information
    }

    /// Returns `true` if the method is invoked from exactly one call site.
    #[must_use]
    pub fn has_single_call_site(&self, method: MethodId) -> bool {
        self.single_call_site.contains(&method)
    }

    /// Returns `true` if the method is invoked from exactly two call sites.
    #[must_use]
    pub fn has_double_call_site(&self, method: MethodId) -> bool {
        self.double_call_site.contains(&method)
    }

    /// Methods with a single call site, in method order.
    pub fn single_call_site_methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.single_call_site.iter().copied()
    }

    /// Forgets what is known about a method, e.g. after it was inlined into its caller.
    pub fn unset(&mut self, method: MethodId) {
        self.single_call_site.remove(&method);
        self.double_call_site.remove(&method);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ClassBuilder, MethodBuilder};

    #[test]
    fn test_single_and_double_call_sites() -> crate::Result<()> {
        let program = Program::builder()
            .class(
                ClassBuilder::new("LA;")
                    .method(MethodBuilder::new_static("a", "()V"))
                    .method(MethodBuilder::new_static("b", "()V"))
                    .method(MethodBuilder::new_static("c", "()V"))
                    .method(MethodBuilder::new_static("d", "()V")),
            )
            .build()?;

        // ids follow name order: a=0, b=1, c=2, d=3
        let graph = CallGraph::from_edges(4, &[(0, 1), (0, 2), (3, 2), (3, 3)], &[]);
        let mut information = graph.call_site_information(&program);

        assert!(information.has_single_call_site(MethodId::new(1)));
        assert!(information.has_double_call_site(MethodId::new(2)));
        assert!(information.has_single_call_site(MethodId::new(3)));
        assert!(!information.has_single_call_site(MethodId::new(0)));

        information.unset(MethodId::new(1));
        assert_eq!(
            information.single_call_site_methods().collect::<Vec<_>>(),
            vec![MethodId::new(3)]
        );
        Ok(())
    }
}
