//! SSA values and their types.

use std::fmt;

use strum::Display;

/// Identifier of an SSA value within one [`crate::ir::IrCode`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Creates a value id from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// The raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The type of an SSA value.
///
/// Register-based bytecode does not say whether a 32-bit constant is an int or a float,
/// or whether zero is a null reference. Such values start with one of the imprecise types
/// and are narrowed by [`crate::ir::TypeConstraintResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ValueType {
    /// 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Reference.
    Object,
    /// A 32-bit value that is an int or a float.
    IntOrFloat,
    /// A 64-bit value that is a long or a double.
    LongOrDouble,
    /// A 32-bit value that is an int, a float or the null reference.
    IntOrFloatOrNull,
}

impl ValueType {
    /// Returns `true` for the five precise types.
    #[must_use]
    pub fn is_precise(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Long | Self::Double | Self::Object
        )
    }

    /// Returns `true` for 64-bit types.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(self, Self::Long | Self::Double | Self::LongOrDouble)
    }

    /// The most precise type compatible with both, or `None` if they cannot denote the same
    /// value.
    #[must_use]
    pub fn meet(self, other: Self) -> Option<Self> {
        use ValueType::{Double, Float, Int, IntOrFloat, IntOrFloatOrNull, Long, LongOrDouble, Object};

        if self == other {
            return Some(self);
        }
        match (self, other) {
            (IntOrFloatOrNull, t) | (t, IntOrFloatOrNull)
                if matches!(t, Int | Float | Object | IntOrFloat) =>
            {
                Some(t)
            }
            (IntOrFloat, t) | (t, IntOrFloat) if matches!(t, Int | Float) => Some(t),
            (LongOrDouble, t) | (t, LongOrDouble) if matches!(t, Long | Double) => Some(t),
            _ => None,
        }
    }

    /// The precise type an unconstrained value of this type takes.
    ///
    /// Ambiguous 32-bit values default to int and ambiguous 64-bit values to long. Null is
    /// never chosen as a default.
    #[must_use]
    pub fn default_precise(self) -> Self {
        match self {
            Self::IntOrFloat | Self::IntOrFloatOrNull => Self::Int,
            Self::LongOrDouble => Self::Long,
            precise => precise,
        }
    }
}
