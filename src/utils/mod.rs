//! Small shared helpers.

mod bitset;
mod dot;

pub use bitset::BitSet;
pub(crate) use dot::escape_dot;
