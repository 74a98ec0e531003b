//! Inter-procedural call graph construction and cycle elimination.
//!
//! The call graph decides the order in which methods are optimized: a method is processed
//! only after every method it calls (so facts about callees are available) and after the
//! single writer of every field it reads. Both relations are edges of one directed graph
//! over program methods.
//!
//! # Architecture
//!
//! Construction scans method bodies in parallel through the
//! [`crate::code::UseRegistry`] visitor. Invokes with a single target produce one call
//! edge; virtual and interface invokes use Class Hierarchy Analysis (CHA) and produce an
//! edge to every program override. Static member access and allocation add an edge to the
//! class initializer that may run.
//!
//! The resulting graph usually has cycles. [`CycleEliminator`] removes edges until the graph
//! is acyclic, never removing a call into a method that must be force inlined. Waves are
//! then extracted from the leaves up with [`CallGraph::extract_leaves`].
//!
//! # Components
//!
//! - [`CallGraphBuilder`]: Concurrent construction over a [`crate::program::Program`]
//! - [`CallGraph`] / [`CallGraphNode`]: The frozen, ordered graph
//! - `CallResolver`: Dispatch target resolution using CHA, owned by the builder
//! - [`CycleEliminator`] / [`CycleEliminationResult`]: Cycle breaking and its record
//! - [`CallSiteInformation`]: Single and double call site facts
//!
//! # Example
//!
//! ```rust
//! use dexconv::callgraph::{CallGraph, CycleEliminator};
//!
//! // 0 -> 1 -> 2 -> 0
//! let mut graph = CallGraph::from_edges(3, &[(0, 1), (1, 2), (2, 0)], &[]);
//! let removed = CycleEliminator::new().break_cycles(&mut graph)?;
//! assert_eq!(removed.number_of_removed_call_edges(), 1);
//!
//! let waves = graph.into_waves()?;
//! assert_eq!(waves.len(), 3);
//! # Ok::<(), dexconv::Error>(())
//! ```

mod builder;
mod cycles;
mod graph;
mod node;
mod resolution;
mod site;

pub use builder::CallGraphBuilder;
pub use cycles::{CycleEliminationResult, CycleEliminator, RemovedEdge};
pub use graph::{CallGraph, CallGraphStats};
pub use node::CallGraphNode;
pub(crate) use resolution::CallResolver;
pub use site::CallSiteInformation;
