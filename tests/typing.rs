//! Type resolution as seen through the converter: optimizations only ever observe precise
//! types, and conflicts abort the conversion.

use std::sync::Mutex;

use dexconv::{
    code::{DexCode, IfTest},
    compiler::{
        CodeOptimization, ConversionConfig, IrConverter, IrProvider, MethodProcessor,
        OptimizationContext, OptimizationFeedback,
    },
    ir::{IrCode, IrInstruction, ValueId, ValueType},
    program::{ClassBuilder, MethodBuilder, MethodId, Program},
    Error, Result,
};

/// Builds `phi(argument, constant)` where the argument has type `argument` and the
/// constant starts out as `constant`.
struct PhiProvider {
    argument: ValueType,
    constant: ValueType,
}

impl IrProvider for PhiProvider {
    fn build_ir(&self, _program: &Program, method: MethodId, _code: &DexCode) -> Result<IrCode> {
        let mut ir = IrCode::new(method);
        let entry = ir.entry();
        let other = ir.add_block();
        let join = ir.add_block();

        let argument = ir.new_value(self.argument);
        let constant = ir.new_value(self.constant);
        let phi = ir.new_value(self.constant);
        ir.push(entry, IrInstruction::Argument { dest: argument, index: 0 });
        ir.push(
            entry,
            IrInstruction::If {
                test: IfTest::Eq,
                a: argument,
                b: None,
                target: other,
            },
        );
        ir.push(entry, IrInstruction::Goto { target: join });
        ir.push(other, IrInstruction::Const { dest: constant, bits: 0 });
        ir.push(other, IrInstruction::Goto { target: join });
        ir.add_successor(entry, other);
        ir.add_successor(entry, join);
        ir.add_successor(other, join);
        ir.add_phi(join, phi, vec![(entry, argument), (other, constant)]);
        ir.push(join, IrInstruction::Return { src: Some(phi) });
        Ok(ir)
    }
}

/// Records the type of every value when the optimization runs.
#[derive(Default)]
struct TypeSnapshot {
    types: Mutex<Vec<ValueType>>,
}

impl CodeOptimization for &'static TypeSnapshot {
    fn name(&self) -> &str {
        "type-snapshot"
    }

    fn optimize(
        &self,
        code: &mut IrCode,
        _feedback: &dyn OptimizationFeedback,
        _processor: &dyn MethodProcessor,
        _context: &OptimizationContext<'_>,
    ) -> Result<()> {
        if let Ok(mut types) = self.types.lock() {
            types.extend((0..code.value_count()).map(|index| code.value_type(ValueId::new(index))));
        }
        Ok(())
    }
}

fn single_method() -> Result<Program> {
    Program::builder()
        .class(
            ClassBuilder::new("LMath;")
                .method(MethodBuilder::new_static("pick", "(I)I").empty_body()),
        )
        .build()
}

#[test]
fn test_ambiguous_phi_operand_takes_int() -> Result<()> {
    let program = single_method()?;
    let snapshot: &'static TypeSnapshot = Box::leak(Box::default());
    let converter = IrConverter::new(
        ConversionConfig::single_threaded(),
        PhiProvider {
            argument: ValueType::Int,
            constant: ValueType::IntOrFloat,
        },
    )
    .with_optimization(snapshot);

    let mut finalized = Vec::new();
    converter.convert(
        &program,
        &mut |_: &Program, _: MethodId, ir: IrCode| -> Result<()> {
            finalized.push(ir);
            Ok(())
        },
    )?;

    let observed = snapshot.types.lock().map(|t| t.clone()).unwrap_or_default();
    assert_eq!(observed, vec![ValueType::Int; 3]);
    assert_eq!(finalized.len(), 1);
    assert!(finalized[0].first_imprecise_value().is_none());
    Ok(())
}

#[test]
fn test_float_argument_narrows_constant_to_float() -> Result<()> {
    let program = single_method()?;
    let snapshot: &'static TypeSnapshot = Box::leak(Box::default());
    let converter = IrConverter::new(
        ConversionConfig::single_threaded(),
        PhiProvider {
            argument: ValueType::Float,
            constant: ValueType::IntOrFloatOrNull,
        },
    )
    .with_optimization(snapshot);

    converter.convert(&program, &mut |_: &Program, _: MethodId, _: IrCode| -> Result<()> {
        Ok(())
    })?;

    let observed = snapshot.types.lock().map(|t| t.clone()).unwrap_or_default();
    assert_eq!(observed, vec![ValueType::Float; 3]);
    Ok(())
}

#[test]
fn test_conflicting_phi_aborts_conversion() -> Result<()> {
    let program = single_method()?;
    let converter = IrConverter::new(
        ConversionConfig::single_threaded(),
        PhiProvider {
            argument: ValueType::Object,
            constant: ValueType::LongOrDouble,
        },
    );

    let mut calls = 0;
    let result = converter.convert(&program, &mut |_: &Program, _: MethodId, _: IrCode| -> Result<()> {
        calls += 1;
        Ok(())
    });
    assert!(matches!(result, Err(Error::TypeUnification { .. })));
    assert_eq!(calls, 0);
    Ok(())
}
