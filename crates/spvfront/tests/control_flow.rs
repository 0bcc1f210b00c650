//! Structured control flow: selections, loops, phis and switches.

mod common;

use anyhow::Result;
use common::{assemble, f32s, named_variable, shader_module, translate_module, Interpreter, Scaffold};
use rspirv::dr::Operand;
use rspirv::spirv::{Decoration, ExecutionModel, LoopControl, SelectionControl, StorageClass, Word};
use spvfront::ir::{CfNode, ConstValue, ShaderStage};

fn has_loop(body: &[CfNode]) -> bool {
    body.iter().any(|node| match node {
        CfNode::Loop(_) => true,
        CfNode::If(i) => has_loop(&i.then_body) || has_loop(&i.else_body),
        CfNode::Block(_) => false,
    })
}

/// `sum = 0; for (i = 0; i < 4; i++) { if (skip_one && i == 1) continue; sum += 1.5; }`
fn counting_loop(skip_one: bool) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let sum_out = named_variable(&mut b, out_float, StorageClass::Output, "sum");
    let zero_i = b.constant_bit32(s.int, 0);
    let one_i = b.constant_bit32(s.int, 1);
    let four_i = b.constant_bit32(s.int, 4);
    let zero_f = b.constant_bit32(s.float, 0.0f32.to_bits());
    let step = b.constant_bit32(s.float, 1.5f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [sum_out]);

    let header = b.id();
    let check = b.id();
    let body = b.id();
    let add = b.id();
    let cont = b.id();
    let merge = b.id();
    let i = b.id();
    let sum = b.id();
    let i_next = b.id();
    let sum_next = b.id();
    let sum_cont = b.id();

    let entry = s.begin_main(&mut b)?;
    b.branch(header)?;

    b.begin_block(Some(header))?;
    b.phi(s.int, Some(i), [(zero_i, entry), (i_next, cont)])?;
    b.phi(s.float, Some(sum), [(zero_f, entry), (sum_cont, cont)])?;
    b.loop_merge(merge, cont, LoopControl::NONE, [])?;
    b.branch(check)?;

    b.begin_block(Some(check))?;
    let in_range = b.s_less_than(s.bool_, None, i, four_i)?;
    b.branch_conditional(in_range, body, merge, [])?;

    b.begin_block(Some(body))?;
    if skip_one {
        let is_one = b.i_equal(s.bool_, None, i, one_i)?;
        b.branch_conditional(is_one, cont, add, [])?;
    } else {
        b.branch(add)?;
    }

    b.begin_block(Some(add))?;
    b.f_add(s.float, Some(sum_next), sum, step)?;
    b.branch(cont)?;

    b.begin_block(Some(cont))?;
    if skip_one {
        b.phi(s.float, Some(sum_cont), [(sum, body), (sum_next, add)])?;
    } else {
        b.phi(s.float, Some(sum_cont), [(sum_next, add)])?;
    }
    b.i_add(s.int, Some(i_next), i, one_i)?;
    b.branch(header)?;

    b.begin_block(Some(merge))?;
    b.store(sum_out, sum, None, [])?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_loop_with_phis() -> Result<()> {
    let shader = translate_module(&counting_loop(false)?, ShaderStage::Fragment)?;
    println!("IR:\n{shader}");
    assert!(has_loop(&shader.entry_function().body));

    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(f32s(&interp.output("sum")?), vec![6.0]);
    Ok(())
}

#[test]
fn test_loop_continue() -> Result<()> {
    let shader = translate_module(&counting_loop(true)?, ShaderStage::Fragment)?;
    println!("IR:\n{shader}");

    let mut interp = Interpreter::new(&shader);
    interp.run()?;
    assert_eq!(f32s(&interp.output("sum")?), vec![4.5]);
    Ok(())
}

/// `o = x > 0 ? x : -x` written as a selection with a phi at the merge.
#[test]
fn test_if_else_phi() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_float = b.type_pointer(None, StorageClass::Input, s.float);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let x = named_variable(&mut b, in_float, StorageClass::Input, "x");
    let o = named_variable(&mut b, out_float, StorageClass::Output, "o");
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [x, o]);
    let then_label = b.id();
    let else_label = b.id();
    let merge = b.id();

    s.begin_main(&mut b)?;
    let loaded = b.load(s.float, None, x, None, [])?;
    let positive = b.f_ord_greater_than(s.bool_, None, loaded, zero)?;
    b.selection_merge(merge, SelectionControl::NONE)?;
    b.branch_conditional(positive, then_label, else_label, [])?;

    b.begin_block(Some(then_label))?;
    b.branch(merge)?;

    b.begin_block(Some(else_label))?;
    let negated = b.f_negate(s.float, None, loaded)?;
    b.branch(merge)?;

    b.begin_block(Some(merge))?;
    let result = b.phi(s.float, None, [(loaded, then_label), (negated, else_label)])?;
    b.store(o, result, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    assert!(shader
        .entry_function()
        .body
        .iter()
        .any(|n| matches!(n, CfNode::If(_))));

    for (input, expected) in [(3.0, 3.0), (-2.5, 2.5)] {
        let mut interp = Interpreter::new(&shader);
        interp.set_input("x", ConstValue::f32(input))?;
        interp.run()?;
        assert_eq!(f32s(&interp.output("o")?), vec![expected], "input {input}");
    }
    Ok(())
}

/// entry -> a -> c -> a with plain branches and no `OpLoopMerge`.
#[test]
fn test_back_edge_without_loop_merge_is_rejected() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    b.entry_point(ExecutionModel::Fragment, s.main, "main", Vec::<Word>::new());
    let a = b.id();
    let c = b.id();

    s.begin_main(&mut b)?;
    b.branch(a)?;
    b.begin_block(Some(a))?;
    b.branch(c)?;
    b.begin_block(Some(c))?;
    b.branch(a)?;
    b.end_function()?;

    let err = translate_module(&assemble(b), ShaderStage::Fragment).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("unstructured control flow"), "unexpected error: {message}");
    Ok(())
}

/// ```text
/// a = 0; b = 0;
/// switch (sel) {
/// case 1: a = 1; // falls through
/// case 2: b = 1; break;
/// default: a = 2; b = 2;
/// }
/// ```
///
/// With `case2_first`, case 2 is listed and laid out before case 1.
fn switch_module(case2_first: bool) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_int = b.type_pointer(None, StorageClass::Input, s.int);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let sel = named_variable(&mut b, in_int, StorageClass::Input, "sel");
    b.decorate(sel, Decoration::Flat, []);
    let a = named_variable(&mut b, out_float, StorageClass::Output, "a");
    let bv = named_variable(&mut b, out_float, StorageClass::Output, "b");
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());
    let one = b.constant_bit32(s.float, 1.0f32.to_bits());
    let two = b.constant_bit32(s.float, 2.0f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [sel, a, bv]);
    let case1 = b.id();
    let case2 = b.id();
    let default = b.id();
    let merge = b.id();

    s.begin_main(&mut b)?;
    b.store(a, zero, None, [])?;
    b.store(bv, zero, None, [])?;
    let selector = b.load(s.int, None, sel, None, [])?;
    b.selection_merge(merge, SelectionControl::NONE)?;
    if case2_first {
        b.switch(
            selector,
            default,
            [(Operand::LiteralBit32(2), case2), (Operand::LiteralBit32(1), case1)],
        )?;
        b.begin_block(Some(case2))?;
        b.store(bv, one, None, [])?;
        b.branch(merge)?;
        b.begin_block(Some(case1))?;
        b.store(a, one, None, [])?;
        b.branch(case2)?;
    } else {
        b.switch(
            selector,
            default,
            [(Operand::LiteralBit32(1), case1), (Operand::LiteralBit32(2), case2)],
        )?;
        b.begin_block(Some(case1))?;
        b.store(a, one, None, [])?;
        b.branch(case2)?;
        b.begin_block(Some(case2))?;
        b.store(bv, one, None, [])?;
        b.branch(merge)?;
    }

    b.begin_block(Some(default))?;
    b.store(a, two, None, [])?;
    b.store(bv, two, None, [])?;
    b.branch(merge)?;

    b.begin_block(Some(merge))?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

fn check_switch(words: &[u32]) -> Result<()> {
    let shader = translate_module(words, ShaderStage::Fragment)?;
    println!("IR:\n{shader}");

    for (selector, a, b) in [(1, 1.0, 1.0), (2, 0.0, 1.0), (7, 2.0, 2.0), (-1, 2.0, 2.0)] {
        let mut interp = Interpreter::new(&shader);
        interp.set_input("sel", ConstValue::i32(selector))?;
        interp.run()?;
        assert_eq!(f32s(&interp.output("a")?), vec![a], "selector {selector}");
        assert_eq!(f32s(&interp.output("b")?), vec![b], "selector {selector}");
    }
    Ok(())
}

#[test]
fn test_switch_with_fallthrough() -> Result<()> {
    check_switch(&switch_module(false)?)
}

/// The falling case is declared and laid out after its target, so the cases
/// have to be reordered to keep the fallthrough adjacent.
#[test]
fn test_switch_fallthrough_declared_out_of_order() -> Result<()> {
    check_switch(&switch_module(true)?)
}

/// Ordered comparisons are false on NaN, unordered ones true.
#[test]
fn test_ordered_and_unordered_compares() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let in_float = b.type_pointer(None, StorageClass::Input, s.float);
    let out_float = b.type_pointer(None, StorageClass::Output, s.float);
    let x = named_variable(&mut b, in_float, StorageClass::Input, "x");
    let ord = named_variable(&mut b, out_float, StorageClass::Output, "ord");
    let unord = named_variable(&mut b, out_float, StorageClass::Output, "unord");
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());
    let one = b.constant_bit32(s.float, 1.0f32.to_bits());

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [x, ord, unord]);
    s.begin_main(&mut b)?;
    let loaded = b.load(s.float, None, x, None, [])?;
    let o = b.f_ord_equal(s.bool_, None, loaded, one)?;
    let u = b.f_unord_equal(s.bool_, None, loaded, one)?;
    let of = b.select(s.float, None, o, one, zero)?;
    let uf = b.select(s.float, None, u, one, zero)?;
    b.store(ord, of, None, [])?;
    b.store(unord, uf, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    for (input, expected_ord, expected_unord) in [(f32::NAN, 0.0, 1.0), (1.0, 1.0, 1.0), (2.0, 0.0, 0.0)] {
        let mut interp = Interpreter::new(&shader);
        interp.set_input("x", ConstValue::f32(input))?;
        interp.run()?;
        assert_eq!(f32s(&interp.output("ord")?), vec![expected_ord], "input {input}");
        assert_eq!(f32s(&interp.output("unord")?), vec![expected_unord], "input {input}");
    }
    Ok(())
}

#[test]
fn test_kill_marks_discard() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    b.entry_point(ExecutionModel::Fragment, s.main, "main", Vec::<Word>::new());
    s.begin_main(&mut b)?;
    b.kill()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    assert!(shader.info.uses_discard);
    Ok(())
}
