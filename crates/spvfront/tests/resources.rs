//! Buffers, shared memory, atomics, barriers and images.

mod common;

use anyhow::{Context, Result};
use common::{assemble, fold_constant, instructions, named_variable, shader_module, translate_module, translate_with, Scaffold};
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{
    Decoration, Dim, ExecutionMode, ExecutionModel, ImageFormat, ImageOperands, StorageClass, Word,
};
use spvfront::ir::utils::count_instrs;
use spvfront::ir::{AtomicOp, DerefKind, ImageDim, Intrinsic, IrInstr, ShaderStage, TexOp, TexSrc, VariableMode};
use spvfront::{Shader, TranslateOptions};

fn intrinsics(shader: &Shader) -> Vec<(Intrinsic, usize)> {
    instructions(shader.entry_function())
        .into_iter()
        .filter_map(|i| match i {
            IrInstr::Intrinsic { op, srcs, .. } => Some((*op, srcs.len())),
            _ => None,
        })
        .collect()
}

fn has_cast(shader: &Shader) -> bool {
    count_instrs(&shader.entry_function().body, |i| {
        matches!(i, IrInstr::Deref { kind: DerefKind::Cast { .. }, .. })
    }) > 0
}

fn offsets() -> TranslateOptions {
    TranslateOptions {
        lower_ubo_ssbo_access_to_offsets: true,
        lower_workgroup_access_to_offsets: true,
        ..Default::default()
    }
}

/// `void main()` as a 1x1x1 compute entry point with no interface.
fn compute_entry(b: &mut Builder, s: &Scaffold, local_x: u32) {
    b.entry_point(ExecutionModel::GLCompute, s.main, "main", Vec::<Word>::new());
    b.execution_mode(s.main, ExecutionMode::LocalSize, [local_x, 1, 1]);
}

fn binding(b: &mut Builder, var: Word, set: u32, binding: u32) {
    b.decorate(var, Decoration::DescriptorSet, [Operand::LiteralBit32(set)]);
    b.decorate(var, Decoration::Binding, [Operand::LiteralBit32(binding)]);
}

// ── Buffers ──────────────────────────────────────────────────────────────────

/// `buffer Buf { uint a; uint b; }; a = b;` at set 0, binding 1.
fn ssbo_copy_module(block: Decoration, class: StorageClass) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let buf_ty = b.type_struct([s.uint, s.uint]);
    b.name(buf_ty, "Buf");
    b.decorate(buf_ty, block, []);
    b.member_decorate(buf_ty, 0, Decoration::Offset, [Operand::LiteralBit32(0)]);
    b.member_decorate(buf_ty, 1, Decoration::Offset, [Operand::LiteralBit32(4)]);
    let buf_ptr = b.type_pointer(None, class, buf_ty);
    let uint_ptr = b.type_pointer(None, class, s.uint);
    let buf = named_variable(&mut b, buf_ptr, class, "buf");
    binding(&mut b, buf, 0, 1);
    let zero = b.constant_bit32(s.int, 0);
    let one = b.constant_bit32(s.int, 1);

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    let b_ptr = b.access_chain(uint_ptr, None, buf, [one])?;
    let value = b.load(s.uint, None, b_ptr, None, [])?;
    let a_ptr = b.access_chain(uint_ptr, None, buf, [zero])?;
    b.store(a_ptr, value, None, [])?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_ssbo_through_derefs() -> Result<()> {
    let words = ssbo_copy_module(Decoration::BufferBlock, StorageClass::Uniform)?;
    let shader = translate_module(&words, ShaderStage::Compute)?;
    println!("IR:\n{shader}");

    assert_eq!(shader.bindings.len(), 1);
    let binding = &shader.bindings[0];
    assert_eq!(binding.mode, VariableMode::Ssbo);
    assert_eq!((binding.descriptor_set, binding.binding), (0, 1));

    assert!(has_cast(&shader));
    let ops = intrinsics(&shader);
    assert!(ops.iter().any(|(op, _)| *op == Intrinsic::ResourceIndex));
    assert!(ops.iter().any(|(op, _)| *op == Intrinsic::LoadDescriptor));
    assert!(!ops.iter().any(|(op, _)| *op == Intrinsic::LoadSsbo));
    Ok(())
}

#[test]
fn test_ssbo_through_offsets() -> Result<()> {
    let words = ssbo_copy_module(Decoration::BufferBlock, StorageClass::Uniform)?;
    let shader = translate_with(&words, ShaderStage::Compute, &[], &offsets())?;
    println!("IR:\n{shader}");

    assert!(!has_cast(&shader));
    let ops = intrinsics(&shader);
    assert!(ops.contains(&(Intrinsic::LoadSsbo, 2)));
    assert!(ops.contains(&(Intrinsic::StoreSsbo, 3)));
    Ok(())
}

#[test]
fn test_storage_buffer_class_is_an_ssbo() -> Result<()> {
    let words = ssbo_copy_module(Decoration::Block, StorageClass::StorageBuffer)?;
    let shader = translate_with(&words, ShaderStage::Compute, &[], &offsets())?;
    assert_eq!(shader.bindings[0].mode, VariableMode::Ssbo);
    assert!(intrinsics(&shader).contains(&(Intrinsic::StoreSsbo, 3)));
    Ok(())
}

#[test]
fn test_ubo_store_is_rejected() -> Result<()> {
    let words = ssbo_copy_module(Decoration::Block, StorageClass::Uniform)?;
    assert!(translate_with(&words, ShaderStage::Compute, &[], &offsets()).is_err());
    Ok(())
}

// ── Shared memory and atomics ────────────────────────────────────────────────

/// `shared uint counter; atomicAdd(counter, 1); atomicCompSwap(counter, 1, 2);`
fn shared_atomic_module() -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let wg_uint = b.type_pointer(None, StorageClass::Workgroup, s.uint);
    let counter = named_variable(&mut b, wg_uint, StorageClass::Workgroup, "counter");
    let device = b.constant_bit32(s.uint, 1);
    let relaxed = b.constant_bit32(s.uint, 0);
    let one = device;
    let two = b.constant_bit32(s.uint, 2);

    compute_entry(&mut b, &s, 64);
    s.begin_main(&mut b)?;
    b.atomic_i_add(s.uint, None, counter, device, relaxed, one)?;
    b.atomic_compare_exchange(s.uint, None, counter, device, relaxed, relaxed, two, one)?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_shared_atomics_through_derefs() -> Result<()> {
    let shader = translate_module(&shared_atomic_module()?, ShaderStage::Compute)?;
    let ops = intrinsics(&shader);
    assert!(ops.contains(&(Intrinsic::DerefAtomic(AtomicOp::Add), 2)));
    assert!(ops.contains(&(Intrinsic::DerefAtomic(AtomicOp::CompSwap), 3)));
    Ok(())
}

#[test]
fn test_shared_atomics_through_offsets() -> Result<()> {
    let shader = translate_with(&shared_atomic_module()?, ShaderStage::Compute, &[], &offsets())?;
    let ops = intrinsics(&shader);
    assert!(ops.contains(&(Intrinsic::SharedAtomic(AtomicOp::Add), 2)));
    assert!(ops.contains(&(Intrinsic::SharedAtomic(AtomicOp::CompSwap), 3)));
    assert_eq!(shader.info.shared_size, 4);
    Ok(())
}

/// `struct S { uint x; uint y; }; shared S s; (&s)[1].y = (&s)[1].y;`
///
/// The element index steps by the `ArrayStride` of the pointer type `s` is
/// declared with, when `stride` is given.
fn shared_ptr_chain_module(stride: Option<u32>) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let s_ty = b.type_struct([s.uint, s.uint]);
    let s_ptr = b.type_pointer(None, StorageClass::Workgroup, s_ty);
    if let Some(stride) = stride {
        b.decorate(s_ptr, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
    }
    let uint_ptr = b.type_pointer(None, StorageClass::Workgroup, s.uint);
    let var = named_variable(&mut b, s_ptr, StorageClass::Workgroup, "s");
    let one = b.constant_bit32(s.int, 1);

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    let y = b.ptr_access_chain(uint_ptr, None, var, one, [one])?;
    let value = b.load(s.uint, None, y, None, [])?;
    b.store(y, value, None, [])?;
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_ptr_access_chain_uses_base_array_stride() -> Result<()> {
    let shader = translate_with(&shared_ptr_chain_module(Some(8))?, ShaderStage::Compute, &[], &offsets())?;
    println!("IR:\n{shader}");

    let func = shader.entry_function();
    let offset = instructions(func)
        .into_iter()
        .find_map(|i| match i {
            IrInstr::Intrinsic {
                op: Intrinsic::LoadShared,
                srcs,
                ..
            } => Some(srcs[0]),
            _ => None,
        })
        .context("no shared load")?;
    // One 8-byte element past `s`, then member `y` at 4.
    assert_eq!(fold_constant(func, offset)?.as_u64(0), 12);
    Ok(())
}

#[test]
fn test_ptr_access_chain_without_array_stride_is_rejected() -> Result<()> {
    let words = shared_ptr_chain_module(None)?;
    let err = translate_with(&words, ShaderStage::Compute, &[], &offsets()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("ArrayStride"), "unexpected error: {message}");
    Ok(())
}

/// One `shared float[len]` variable per entry of `lengths`, each read at
/// element 0.
fn shared_arrays_module(lengths: &[u32]) -> Result<Vec<u32>> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let float_ptr = b.type_pointer(None, StorageClass::Workgroup, s.float);
    let zero = b.constant_bit32(s.int, 0);
    let mut vars = Vec::new();
    for (i, &len) in lengths.iter().enumerate() {
        let len_id = b.constant_bit32(s.uint, len);
        let array = b.type_array(s.float, len_id);
        let ptr = b.type_pointer(None, StorageClass::Workgroup, array);
        vars.push(named_variable(&mut b, ptr, StorageClass::Workgroup, &format!("data{i}")));
    }

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    for var in vars {
        let element = b.access_chain(float_ptr, None, var, [zero])?;
        b.load(s.float, None, element, None, [])?;
    }
    b.ret()?;
    b.end_function()?;
    Ok(assemble(b))
}

#[test]
fn test_oversized_shared_array_is_rejected() -> Result<()> {
    let words = shared_arrays_module(&[0x4000_0001])?;
    let err = translate_with(&words, ShaderStage::Compute, &[], &offsets()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("too large"), "unexpected error: {message}");
    Ok(())
}

#[test]
fn test_shared_memory_overflow_is_rejected() -> Result<()> {
    // 3 GiB each: either fits alone, the pair does not.
    let words = shared_arrays_module(&[0x3000_0000, 0x3000_0000])?;
    let err = translate_with(&words, ShaderStage::Compute, &[], &offsets()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("does not fit in shared memory"), "unexpected error: {message}");
    Ok(())
}

#[test]
fn test_ssbo_atomic_through_offsets() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let buf_ty = b.type_struct([s.uint]);
    b.decorate(buf_ty, Decoration::Block, []);
    b.member_decorate(buf_ty, 0, Decoration::Offset, [Operand::LiteralBit32(0)]);
    let buf_ptr = b.type_pointer(None, StorageClass::StorageBuffer, buf_ty);
    let uint_ptr = b.type_pointer(None, StorageClass::StorageBuffer, s.uint);
    let buf = named_variable(&mut b, buf_ptr, StorageClass::StorageBuffer, "buf");
    binding(&mut b, buf, 0, 0);
    let zero = b.constant_bit32(s.int, 0);
    let device = b.constant_bit32(s.uint, 1);
    let relaxed = b.constant_bit32(s.uint, 0);
    let five = b.constant_bit32(s.uint, 5);

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    let ptr = b.access_chain(uint_ptr, None, buf, [zero])?;
    b.atomic_u_max(s.uint, None, ptr, device, relaxed, five)?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_with(&assemble(b), ShaderStage::Compute, &[], &offsets())?;
    assert!(intrinsics(&shader).contains(&(Intrinsic::SsboAtomic(AtomicOp::UMax), 3)));
    Ok(())
}

#[test]
fn test_control_barrier() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let workgroup = b.constant_bit32(s.uint, 2);
    // AcquireRelease | WorkgroupMemory
    let semantics = b.constant_bit32(s.uint, 0x8 | 0x100);

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    b.control_barrier(workgroup, workgroup, semantics)?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Compute)?;
    let ops: Vec<Intrinsic> = intrinsics(&shader).into_iter().map(|(op, _)| op).collect();
    assert_eq!(ops, vec![Intrinsic::GroupMemoryBarrier, Intrinsic::Barrier]);
    Ok(())
}

// ── Images ───────────────────────────────────────────────────────────────────

#[test]
fn test_sampling_with_bias_and_gradients() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let vec2 = b.type_vector(s.float, 2);
    let image = b.type_image(s.float, Dim::Dim2D, 0, 0, 0, 1, ImageFormat::Unknown, None);
    let sampled_image = b.type_sampled_image(image);
    let tex_ptr = b.type_pointer(None, StorageClass::UniformConstant, sampled_image);
    let tex = named_variable(&mut b, tex_ptr, StorageClass::UniformConstant, "tex");
    binding(&mut b, tex, 0, 0);
    let out_vec4 = b.type_pointer(None, StorageClass::Output, s.vec4);
    let biased = named_variable(&mut b, out_vec4, StorageClass::Output, "biased");
    let graded = named_variable(&mut b, out_vec4, StorageClass::Output, "graded");
    let half = b.constant_bit32(s.float, 0.5f32.to_bits());
    let tenth = b.constant_bit32(s.float, 0.1f32.to_bits());
    let zero = b.constant_bit32(s.float, 0.0f32.to_bits());
    let coord = b.constant_composite(vec2, [half, half]);
    let ddx = b.constant_composite(vec2, [tenth, zero]);
    let ddy = b.constant_composite(vec2, [zero, tenth]);

    b.entry_point(ExecutionModel::Fragment, s.main, "main", [biased, graded]);
    s.begin_main(&mut b)?;
    let t = b.load(sampled_image, None, tex, None, [])?;
    let a = b.image_sample_implicit_lod(
        s.vec4,
        None,
        t,
        coord,
        Some(ImageOperands::BIAS),
        [Operand::IdRef(half)],
    )?;
    b.store(biased, a, None, [])?;
    let g = b.image_sample_explicit_lod(
        s.vec4,
        None,
        t,
        coord,
        ImageOperands::GRAD,
        [Operand::IdRef(ddx), Operand::IdRef(ddy)],
    )?;
    b.store(graded, g, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Fragment)?;
    println!("IR:\n{shader}");

    let texs: Vec<_> = instructions(shader.entry_function())
        .into_iter()
        .filter_map(|i| match i {
            IrInstr::Tex(t) => Some(t.as_ref()),
            _ => None,
        })
        .collect();
    assert_eq!(texs.len(), 2);

    let srcs = |i: usize| texs[i].sources.iter().map(|(s, _)| *s).collect::<Vec<_>>();
    assert_eq!(texs[0].op, TexOp::Txb);
    assert_eq!(texs[1].op, TexOp::Txd);
    for (i, tex) in texs.iter().enumerate() {
        assert_eq!(tex.dim, ImageDim::D2);
        assert!(!tex.is_array);
        assert!(!tex.is_shadow);
        assert_eq!(tex.coord_components, 2);
        assert!(srcs(i).contains(&TexSrc::TextureDeref));
        assert!(srcs(i).contains(&TexSrc::SamplerDeref));
        assert!(srcs(i).contains(&TexSrc::Coord));
    }
    assert!(srcs(0).contains(&TexSrc::Bias));
    assert!(srcs(1).contains(&TexSrc::Ddx));
    assert!(srcs(1).contains(&TexSrc::Ddy));
    Ok(())
}

/// r32ui storage image: `imageAtomicAdd`, `imageLoad` and `imageStore`.
#[test]
fn test_storage_image_access() -> Result<()> {
    let mut b = shader_module();
    let s = Scaffold::new(&mut b);
    let ivec2 = b.type_vector(s.int, 2);
    let uvec4 = b.type_vector(s.uint, 4);
    let image = b.type_image(s.uint, Dim::Dim2D, 0, 0, 0, 2, ImageFormat::R32ui, None);
    let image_ptr = b.type_pointer(None, StorageClass::UniformConstant, image);
    let texel_ptr = b.type_pointer(None, StorageClass::Image, s.uint);
    let img = named_variable(&mut b, image_ptr, StorageClass::UniformConstant, "img");
    binding(&mut b, img, 0, 2);
    let zero_i = b.constant_bit32(s.int, 0);
    let one_i = b.constant_bit32(s.int, 1);
    let coord = b.constant_composite(ivec2, [one_i, zero_i]);
    let sample = b.constant_bit32(s.uint, 0);
    let device = b.constant_bit32(s.uint, 1);
    let relaxed = sample;
    let one_u = device;

    compute_entry(&mut b, &s, 1);
    s.begin_main(&mut b)?;
    let texel = b.image_texel_pointer(texel_ptr, None, img, coord, sample)?;
    b.atomic_i_add(s.uint, None, texel, device, relaxed, one_u)?;
    let handle = b.load(image, None, img, None, [])?;
    let value = b.image_read(uvec4, None, handle, coord, None, [])?;
    b.image_write(handle, coord, value, None, [])?;
    b.ret()?;
    b.end_function()?;

    let shader = translate_module(&assemble(b), ShaderStage::Compute)?;
    println!("IR:\n{shader}");

    let ops = intrinsics(&shader);
    assert!(ops.contains(&(Intrinsic::ImageAtomic(AtomicOp::Add), 4)));
    assert!(ops.contains(&(Intrinsic::ImageLoad, 3)));
    assert!(ops.contains(&(Intrinsic::ImageStore, 4)));
    Ok(())
}
