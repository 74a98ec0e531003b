//! Resolution of imprecise value types.

use std::collections::HashSet;

use crate::{
    code::IfTest,
    ir::{IrCode, IrInstruction, ValueId, ValueType},
    Error, Result,
};

/// Union-find over the values of one [`IrCode`] that gives every value a precise type.
///
/// Values that must share a type are linked: a phi with each of its operands, and the two
/// operands of an `==`/`!=` comparison when neither is a constant (constants compare
/// bitwise and impose nothing). The representative of a class carries the class type.
/// After linking, every value takes its representative's type; types that are still
/// ambiguous fall back to int or long.
#[derive(Debug, Default)]
pub struct TypeConstraintResolver {
    parent: Vec<u32>,
    types: Vec<ValueType>,
}

impl TypeConstraintResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the types of every value in `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeUnification`] if two linked values have different precise
    /// types, or a precise type incompatible with the other side's imprecise type.
    pub fn resolve(&mut self, code: &mut IrCode) -> Result<()> {
        let count = code.value_count();
        self.parent = (0..count as u32).collect();
        self.types = (0..count).map(|i| code.value_type(ValueId::new(i))).collect();

        let constants: HashSet<ValueId> = code
            .instructions()
            .filter(|instruction| instruction.is_constant())
            .filter_map(IrInstruction::dest)
            .collect();

        let mut links = Vec::new();
        for (_, block) in code.blocks() {
            for phi in &block.phis {
                links.extend(phi.operands.iter().map(|&(_, operand)| (phi.dest, operand)));
            }
            for instruction in &block.instructions {
                if let IrInstruction::If {
                    test: IfTest::Eq | IfTest::Ne,
                    a,
                    b: Some(b),
                    ..
                } = instruction
                {
                    if !constants.contains(a) && !constants.contains(b) {
                        links.push((*a, *b));
                    }
                }
            }
        }
        for (a, b) in links {
            self.link(a, b)?;
        }

        let mut narrowed = 0usize;
        for index in 0..count {
            let value = ValueId::new(index);
            let current = code.value_type(value);
            if current.is_precise() {
                continue;
            }
            let representative = self.find(index);
            let resolved = self.types[representative].default_precise();
            code.set_value_type(value, resolved);
            narrowed += 1;
        }

        tracing::trace!(
            method = %code.method(),
            values = count,
            narrowed,
            "resolved value types"
        );
        Ok(())
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] as usize != root {
            root = self.parent[root] as usize;
        }
        let mut current = index;
        while self.parent[current] as usize != root {
            let next = self.parent[current] as usize;
            self.parent[current] = root as u32;
            current = next;
        }
        root
    }

    fn link(&mut self, a: ValueId, b: ValueId) -> Result<()> {
        let first = self.find(a.index());
        let second = self.find(b.index());
        if first == second {
            return Ok(());
        }

        let first_type = self.types[first];
        let second_type = self.types[second];
        let unification_error = || Error::TypeUnification {
            left: format!("{a} ({first_type})"),
            right: format!("{b} ({second_type})"),
        };

        match (first_type.is_precise(), second_type.is_precise()) {
            (true, true) => {
                if first_type != second_type {
                    return Err(unification_error());
                }
            }
            (true, false) => {
                first_type.meet(second_type).ok_or_else(unification_error)?;
                self.parent[second] = first as u32;
            }
            (false, true) => {
                second_type.meet(first_type).ok_or_else(unification_error)?;
                self.parent[first] = second as u32;
            }
            (false, false) => {
                let meet = first_type.meet(second_type).ok_or_else(unification_error)?;
                self.parent[second] = first as u32;
                self.types[first] = meet;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::BlockId, program::MethodId};

    fn phi_code(left: ValueType, right: ValueType) -> (IrCode, ValueId, ValueId, ValueId) {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let other = code.add_block();
        let join = code.add_block();
        let a = code.new_value(left);
        let b = code.new_value(right);
        let phi = code.new_value(ValueType::IntOrFloat);
        code.push(entry, IrInstruction::Argument { dest: a, index: 0 });
        code.push(entry, IrInstruction::Goto { target: join });
        code.push(other, IrInstruction::Const { dest: b, bits: 0 });
        code.push(other, IrInstruction::Goto { target: join });
        code.add_phi(join, phi, vec![(entry, a), (other, b)]);
        code.push(join, IrInstruction::Return { src: Some(phi) });
        (code, a, b, phi)
    }

    #[test]
    fn test_phi_propagates_precise_type() -> crate::Result<()> {
        let (mut code, _, b, phi) = phi_code(ValueType::Float, ValueType::IntOrFloat);
        TypeConstraintResolver::new().resolve(&mut code)?;
        assert_eq!(code.value_type(b), ValueType::Float);
        assert_eq!(code.value_type(phi), ValueType::Float);
        assert!(code.first_imprecise_value().is_none());
        Ok(())
    }

    #[test]
    fn test_conflicting_precise_types_fail() {
        let (mut code, _, _, _) = phi_code(ValueType::Int, ValueType::Float);
        let result = TypeConstraintResolver::new().resolve(&mut code);
        assert!(matches!(result, Err(Error::TypeUnification { .. })));
    }

    #[test]
    fn test_incompatible_imprecise_types_fail() {
        let (mut code, _, _, _) = phi_code(ValueType::LongOrDouble, ValueType::IntOrFloat);
        let result = TypeConstraintResolver::new().resolve(&mut code);
        assert!(matches!(result, Err(Error::TypeUnification { .. })));
    }

    #[test]
    fn test_null_or_number_defaults_to_int() -> crate::Result<()> {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let zero = code.new_value(ValueType::IntOrFloatOrNull);
        code.push(entry, IrInstruction::Const { dest: zero, bits: 0 });
        code.push(entry, IrInstruction::Return { src: Some(zero) });
        TypeConstraintResolver::new().resolve(&mut code)?;
        assert_eq!(code.value_type(zero), ValueType::Int);
        Ok(())
    }

    #[test]
    fn test_equality_links_non_constant_operands() -> crate::Result<()> {
        let mut code = IrCode::new(MethodId::new(0));
        let entry = code.entry();
        let exit = code.add_block();
        let float = code.new_value(ValueType::Float);
        let loaded = code.new_value(ValueType::IntOrFloat);
        let constant = code.new_value(ValueType::IntOrFloat);
        code.push(entry, IrInstruction::Argument { dest: float, index: 0 });
        code.push(entry, IrInstruction::Argument { dest: loaded, index: 1 });
        code.push(entry, IrInstruction::Const { dest: constant, bits: 0 });
        code.push(
            entry,
            IrInstruction::If {
                test: IfTest::Eq,
                a: float,
                b: Some(loaded),
                target: exit,
            },
        );
        code.push(
            entry,
            IrInstruction::If {
                test: IfTest::Ne,
                a: float,
                b: Some(constant),
                target: exit,
            },
        );
        code.add_successor(entry, exit);
        code.push(exit, IrInstruction::Return { src: None });

        TypeConstraintResolver::new().resolve(&mut code)?;
        assert_eq!(code.value_type(loaded), ValueType::Float);
        assert_eq!(code.value_type(constant), ValueType::Int);
        assert_eq!(code.entry(), BlockId(0));
        Ok(())
    }
}
