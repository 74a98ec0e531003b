// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dexconv
//!
//! The method-level core of an ahead-of-time bytecode compiler: conversion of register-based
//! method bodies into SSA, and the scheduling of code optimizations across methods in call
//! graph order.
//!
//! ## Features
//!
//! - **Control-flow reconstruction** - Basic blocks, switch and array payloads, exception
//!   handlers, recovered from linear bytecode
//! - **Type resolution** - Union-find narrowing of imprecise constant types in SSA
//! - **Call graph** - Concurrent construction with Class Hierarchy Analysis for virtual
//!   dispatch, plus field-read dependencies and class initializer edges
//! - **Cycle elimination** - Deterministic edge removal that respects force inlining
//! - **Wave scheduling** - Bottom-up parallel processing with delayed optimization feedback
//!   and a post-processing pass
//!
//! ## Quick Start
//!
//! ```rust
//! use dexconv::prelude::*;
//!
//! let program = Program::builder()
//!     .class(
//!         ClassBuilder::new("LMain;")
//!             .method(MethodBuilder::new_static("main", "()V").empty_body()),
//!     )
//!     .build()?;
//!
//! let converter = IrConverter::new(ConversionConfig::default(), ControlFlowIrProvider);
//! let summary = converter.convert(&program, &mut |_: &Program, _: MethodId, _: IrCode| -> Result<()> {
//!     Ok(())
//! })?;
//! assert_eq!(summary.methods_finalized, 1);
//! # Ok::<(), dexconv::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`program`] - Classes, methods, fields, hierarchy and resolution
//! - [`code`] - Bytecode instructions and the use-registry visitor
//! - [`conversion`] - Control-flow reconstruction for IR builders
//! - [`ir`] - SSA bodies and type constraint resolution
//! - [`callgraph`] - Call graph construction and cycle elimination
//! - [`compiler`] - Wave scheduling, optimization feedback, the converter driver
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dexconv::prelude::*;
///
/// let mut graph = CallGraph::from_edges(2, &[(0, 1), (1, 0)], &[]);
/// CycleEliminator::new().break_cycles(&mut graph)?;
/// assert!(graph.is_acyclic());
/// # Ok::<(), dexconv::Error>(())
/// ```
pub mod prelude;

pub mod callgraph;
pub mod code;
pub mod compiler;
pub mod conversion;
pub mod ir;
pub mod program;
pub mod utils;

/// `dexconv` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dexconv` Error type
///
/// # Examples
///
/// ```rust
/// use dexconv::{callgraph::CallGraph, Error};
///
/// let graph = CallGraph::from_edges(2, &[(0, 1), (1, 0)], &[]);
/// match graph.into_waves() {
///     Ok(waves) => println!("{} waves", waves.len()),
///     Err(Error::GraphError(message)) => println!("not acyclic: {message}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;
