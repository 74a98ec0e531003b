//! The program model the conversion operates on.
//!
//! A [`Program`] owns every [`Class`] and [`Method`] definition. Methods are addressed by
//! dense [`MethodId`]s whose order equals the order of their [`MethodRef`]s, which gives the
//! whole crate a single total order over methods for deterministic iteration.
//!
//! # Components
//!
//! - [`Program`]: Definitions, hierarchy queries and method/field resolution
//! - [`ProgramBuilder`], [`ClassBuilder`], [`MethodBuilder`]: Construction
//! - [`MethodOptimizationInfo`]: Facts collected by optimizations
//! - [`FieldAccessInfo`]: Known write contexts of a field
//! - [`GraphLens`]: Renaming view applied to references read from bytecode

mod app;
mod builder;
mod class;
mod info;
mod lens;
mod method;
mod types;

pub use app::Program;
pub use builder::{ClassBuilder, MethodBuilder, ProgramBuilder};
pub use class::{Class, ClassFlags, ClassKind, Field};
pub use info::{FieldAccessInfo, InliningConstraint, MethodOptimizationInfo};
pub use lens::{GraphLens, MethodLookupResult};
pub use method::{Method, MethodFlags, MethodId};
pub use types::{DexType, FieldRef, MethodRef};
