//! End-to-end integration tests for spvfront.
//!
//! These tests build small modules with `rspirv`, translate them and either
//! inspect the resulting IR or run it through the test interpreter.

mod common;

use anyhow::Result;
use common::{
    assemble, f32s, instructions, named_variable, shader_module, translate_module, translate_with, vec4,
    Interpreter, Scaffold,
};
use rspirv::dr::{Instruction, Operand};
use rspirv::spirv::{BuiltIn, Decoration, ExecutionMode, ExecutionModel, FunctionControl, GLOp, Op, StorageClass, Word};
use spvfront::ir::{AluOp, CfNode, ConstValue, IrInstr, Jump, ShaderStage};
use spvfront::{SpecOverride, TranslateOptions};

/// Fragment shader writing `value` to the output `color`.
fn constant_color_module() -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let out_vec4 = b.type_pointer(None, StorageClass::Output, s.vec4);
    let color = named_variable(&mut b, out_vec4, StorageClass::Output, "color");
    let one = b.constant_bit32(s.float, 1.0f32.to_bits());
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());
    let red = b.constant_composite(s.vec4, [one, zero, zero, one]);

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [color]);
    b.execution_mode(s.main, ExecutionMode::OriginUpperLeft, []);
    b.decorate(color, Decoration::Location, [Operand::LiteralBit32(0)]);

    s.begin_main(&mut b)?;
    b.store(color, red, None, [])?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_constant_color() -> Result<()> {
    let shader = translate_module(&constant_color_module()?, ShaderStage::Fragment)?;

    println!("IR:\n{shader}");

    assert_eq!(shader.info.stage, ShaderStage::Fragment);
    assert_eq!(shader.info.entry_point, "main");
    assert!(shader.info.fragment.origin_upper_left);
    assert_eq!(shader.functions.len(), 1);

    let color = shader
        .variables
        .iter()
        .find(|v| v.name.as_deref() == Some("color"))
        .expect("color variable");
    assert_eq!(color.data.location, Some(0));

    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(f32s(&interp.output("color")?), vec![1.0, 0.0, 0.0, 1.0]);
    Ok(())
}

#[test]
fn test_vector_times_scalar() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_vec4 = b.type_pointer(None, StorageClass::Input, s.vec4);
    let out_vec4 = b.type_pointer(None, StorageClass::Output, s.vec4);
    let v = named_variable(&mut b, in_vec4, StorageClass::Input, "v");
    let o = named_variable(&mut b, out_vec4, StorageClass::Output, "o");
    let two = b.constant_bit32(s.float, 2.0f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [v, o]);
    s.begin_main(&mut b)?;
    let loaded = b.load(s.vec4, None, v, None, [])?;
    let scaled = b.vector_times_scalar(s.vec4, None, loaded, two)?;
    b.store(o, scaled, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    let mul = instructions(shader.entry_function())
        .into_iter()
        .any(|i| matches!(i, IrInstr::Alu { op: AluOp::FMul, .. }));
    assert!(mul, "expected an fmul");

    let mut interp = Interpreter::new(&shader);
    interp.set_input("v", vec4([1.0, -2.0, 0.5, 3.0]))?;
    interp.run()?;
    assert_eq!(f32s(&interp.output("o")?), vec![2.0, -4.0, 1.0, 6.0]);
    Ok(())
}

#[test]
fn test_composite_insert_and_extract() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_vec4 = b.type_pointer(None, StorageClass::Input, s.vec4);
    let out_vec4 = b.type_pointer(None, StorageClass::Output, s.vec4);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let v = named_variable(&mut b, in_vec4, StorageClass::Input, "v");
    let o = named_variable(&mut b, out_vec4, StorageClass::Output, "o");
    let f = named_variable(&mut b, out_float, StorageClass::Output, "f");
    let g = named_variable(&mut b, out_float, StorageClass::Output, "g");
    let nine = b.constant_bit32(s.float, 9.0f32.to_bits());
    let three = b.constant_bit32(s.int, 3);

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [v, o, f, g]);
    s.begin_main(&mut b)?;
    let loaded = b.load(s.vec4, None, v, None, [])?;
    let inserted = b.composite_insert(s.vec4, None, nine, loaded, [2])?;
    b.store(o, inserted, None, [])?;
    let extracted = b.composite_extract(s.float, None, inserted, [2])?;
    b.store(f, extracted, None, [])?;
    let dynamic = b.vector_extract_dynamic(s.float, None, loaded, three)?;
    b.store(g, dynamic, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    let mut interp = Interpreter::new(&shader);
    interp.set_input("v", vec4([1.0, 2.0, 3.0, 4.0]))?;
    interp.run()?;
    assert_eq!(f32s(&interp.output("o")?), vec![1.0, 2.0, 9.0, 4.0]);
    assert_eq!(f32s(&interp.output("f")?), vec![9.0]);
    assert_eq!(f32s(&interp.output("g")?), vec![4.0]);
    Ok(())
}

/// `vec4 main() { return vec4(1, 2, 3, 4); }`
#[test]
fn test_return_constant_vector() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let fn_vec4 = b.type_function(s.vec4, vec![]);
    let parts: Vec<u32> = [1.0f32, 2.0, 3.0, 4.0]
        .iter()
        .map(|v| b.constant_bit32(s.float, v.to_bits()))
        .collect();
    let value = b.constant_composite(s.vec4, parts);

    b.entry_point(ExecutionModel::Fragment, s.main, "main", Vec::<Word>::new());
    b.begin_function(s.vec4, Some(s.main), FunctionControl::NONE, fn_vec4)?;
    b.begin_block(None)?;
    b.ret_value(value)?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    let func = shader.entry_function();
    assert_eq!(func.body.len(), 1, "expected a single block");
    let CfNode::Block(block) = &func.body[0] else {
        panic!("expected a block, got {:?}", func.body[0]);
    };
    let Some(Jump::Return { values }) = &block.jump else {
        panic!("expected a return, got {:?}", block.jump);
    };
    assert_eq!(values.len(), 1);
    let constants: Vec<&ConstValue> = block
        .instructions
        .iter()
        .filter_map(|i| match i {
            IrInstr::Const { dest, value } if *dest == values[0] => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(constants.len(), 1);
    assert_eq!(f32s(constants[0]), vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

// ── Compute metadata ─────────────────────────────────────────────────────────

fn compute_module(workgroup_builtin: bool) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let uvec3 = b.type_vector(s.uint, 3);
    b.entry_point(ExecutionModel::GLCompute, s.main, "main", Vec::<Word>::new());
    b.execution_mode(s.main, ExecutionMode::LocalSize, [8, 4, 1]);
    if workgroup_builtin {
        let x = b.constant_bit32(s.uint, 16);
        let y = b.constant_bit32(s.uint, 2);
        let z = b.constant_bit32(s.uint, 1);
        let size = b.constant_composite(uvec3, [x, y, z]);
        b.decorate(size, Decoration::BuiltIn, [Operand::BuiltIn(BuiltIn::WorkgroupSize)]);
    }
    s.begin_main(&mut b)?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_local_size() -> Result<()> {
    let shader = translate_module(&compute_module(false)?, ShaderStage::Compute)?;
    assert_eq!(shader.info.workgroup_size, [8, 4, 1]);
    Ok(())
}

#[test]
fn test_workgroup_size_builtin_overrides_local_size() -> Result<()> {
    let shader = translate_module(&compute_module(true)?, ShaderStage::Compute)?;
    assert_eq!(shader.info.workgroup_size, [16, 2, 1]);
    Ok(())
}

// ── Specialization ───────────────────────────────────────────────────────────

fn spec_constant_module() -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let out_int = b.type_pointer(None, StorageClass::Output, s.int);
    let value = named_variable(&mut b, out_int, StorageClass::Output, "value");
    let plus_one = named_variable(&mut b, out_int, StorageClass::Output, "plus_one");
    let spec = b.spec_constant_bit32(s.int, 7);
    b.decorate(spec, Decoration::SpecId, [Operand::LiteralBit32(3)]);
    let one = b.constant_bit32(s.int, 1);
    let sum = b.id();
    b.module_mut().types_global_values.push(Instruction::new(
        Op::SpecConstantOp,
        Some(s.int),
        Some(sum),
        vec![
            Operand::LiteralSpecConstantOpInteger(Op::IAdd),
            Operand::IdRef(spec),
            Operand::IdRef(one),
        ],
    ));

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [value, plus_one]);
    s.begin_main(&mut b)?;
    b.store(value, spec, None, [])?;
    b.store(plus_one, sum, None, [])?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_spec_constant_default() -> Result<()> {
    let shader = translate_module(&spec_constant_module()?, ShaderStage::Fragment)?;
    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(interp.output("value")?.as_i64(0), 7);
    assert_eq!(interp.output("plus_one")?.as_i64(0), 8);
    Ok(())
}

#[test]
fn test_spec_constant_override() -> Result<()> {
    let specs = [SpecOverride { id: 3, value: 42 }];
    let shader = translate_with(
        &spec_constant_module()?,
        ShaderStage::Fragment,
        &specs,
        &TranslateOptions::default(),
    )?;
    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(interp.output("value")?.as_i64(0), 42);
    assert_eq!(interp.output("plus_one")?.as_i64(0), 43);
    Ok(())
}

#[test]
fn test_override_for_unknown_id_is_ignored() -> Result<()> {
    let specs = [SpecOverride { id: 99, value: 5 }];
    let shader = translate_with(
        &spec_constant_module()?,
        ShaderStage::Fragment,
        &specs,
        &TranslateOptions::default(),
    )?;
    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(interp.output("value")?.as_i64(0), 7);
    Ok(())
}

// ── Functions ────────────────────────────────────────────────────────────────

#[test]
fn test_function_call() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_float = b.type_pointer(None, StorageClass::Input, s.float);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let x = named_variable(&mut b, in_float, StorageClass::Input, "x");
    let y = named_variable(&mut b, out_float, StorageClass::Output, "y");
    let two = b.constant_bit32(s.float, 2.0f32.to_bits());
    let fn_float = b.type_function(s.float, vec![s.float]);
    let twice = b.id();
    b.name(twice, "twice");

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [x, y]);

    s.begin_main(&mut b)?;
    let loaded = b.load(s.float, None, x, None, [])?;
    let result = b.function_call(s.float, None, twice, [loaded])?;
    b.store(y, result, None, [])?;
    b.ret()?;
    b.end_function()?;

    b.begin_function(s.float, Some(twice), FunctionControl::NONE, fn_float)?;
    let param = b.function_parameter(s.float)?;
    b.begin_block(None)?;
    let doubled = b.f_mul(s.float, None, param, two)?;
    b.ret_value(doubled)?;
    b.end_function()?;

    // Never called, so never emitted.
    b.begin_function(s.void, None, FunctionControl::NONE, s.fn_void)?;
    b.begin_block(None)?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    assert_eq!(shader.functions.len(), 2);
    assert!(shader.functions.iter().any(|f| f.name.as_deref() == Some("twice")));
    assert!(instructions(shader.entry_function())
        .into_iter()
        .any(|i| matches!(i, IrInstr::Call { .. })));

    let mut interp = Interpreter::new(&shader);
    interp.set_input("x", ConstValue::f32(3.0))?;
    interp.run()?;
    assert_eq!(f32s(&interp.output("y")?), vec![6.0]);
    Ok(())
}

#[test]
fn test_glsl_extended_instructions() -> Result<()> {
    let mut b = shader_module();
    let glsl = b.ext_inst_import("GLSL.std.450");
    let s = Scaffold::new(&mut b);
    let in_float = b.type_pointer(None, StorageClass::Input, s.float);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let x = named_variable(&mut b, in_float, StorageClass::Input, "x");
    let clamped = named_variable(&mut b, out_float, StorageClass::Output, "clamped");
    let root = named_variable(&mut b, out_float, StorageClass::Output, "root");
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());
    let one = b.constant_bit32(s.float, 1.0f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [x, clamped, root]);
    s.begin_main(&mut b)?;
    let loaded = b.load(s.float, None, x, None, [])?;
    let c = b.ext_inst(
        s.float,
        None,
        glsl,
        GLOp::FClamp as u32,
        [Operand::IdRef(loaded), Operand::IdRef(zero), Operand::IdRef(one)],
    )?;
    b.store(clamped, c, None, [])?;
    let r = b.ext_inst(s.float, None, glsl, GLOp::Sqrt as u32, [Operand::IdRef(loaded)])?;
    b.store(root, r, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    let mut interp = Interpreter::new(&shader);
    interp.set_input("x", ConstValue::f32(4.0))?;
    interp.run()?;
    assert_eq!(f32s(&interp.output("clamped")?), vec![1.0]);
    assert_eq!(f32s(&interp.output("root")?), vec![2.0]);
    Ok(())
}

// ── Errors and determinism ───────────────────────────────────────────────────

#[test]
fn test_missing_entry_point() -> Result<()> {
    let words = constant_color_module()?;
    let err = spvfront::translate(&words, ShaderStage::Fragment, "nope", &[], &TranslateOptions::default())
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("nope"), "unexpected error: {message}");
    Ok(())
}

#[test]
fn test_wrong_stage_is_not_found() -> Result<()> {
    let err = translate_module(&constant_color_module()?, ShaderStage::Vertex).unwrap_err();
    assert!(format!("{err:#}").contains("entry point"));
    Ok(())
}

#[test]
fn test_bad_magic_is_rejected() -> Result<()> {
    let mut words = constant_color_module()?;
    words[0] = 0xdead_beef;
    assert!(translate_module(&words, ShaderStage::Fragment).is_err());
    Ok(())
}

#[test]
fn test_oversized_id_bound_is_rejected() -> Result<()> {
    let mut words = constant_color_module()?;
    words[3] = u32::MAX;
    let err = translate_module(&words, ShaderStage::Fragment).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("ID bound"), "unexpected error: {message}");
    Ok(())
}

#[test]
fn test_output_is_deterministic() -> Result<()> {
    let words = spec_constant_module()?;
    let first = translate_module(&words, ShaderStage::Fragment)?;
    let second = translate_module(&words, ShaderStage::Fragment)?;
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
    Ok(())
}

#[test]
fn test_translate_bytes_accepts_both_byte_orders() -> Result<()> {
    let words = constant_color_module()?;
    let little: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let big: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let options = TranslateOptions::default();
    let a = spvfront::translate_bytes(&little, ShaderStage::Fragment, "main", &[], &options)?;
    let b = spvfront::translate_bytes(&big, ShaderStage::Fragment, "main", &[], &options)?;
    assert_eq!(a, b);
    Ok(())
}
