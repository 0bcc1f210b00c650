//! Texture sampling, image queries and storage image access.
//!
//! Every sample, fetch, gather and query instruction goes through one
//! dispatcher. The opcode fixes the base texture op and which fixed operands
//! follow the image (coordinate, depth reference, gather component); the
//! trailing image-operand mask then consumes the remaining words in bit
//! order and may upgrade the op (`Bias` turns a plain sample into `Txb`,
//! `Grad` turns an explicit-lod sample into `Txd`, `Sample` turns a fetch
//! into `TxfMs`).

use super::pointers::Pointer;
use super::types::{ImageType, SpirvType, TypeKind};
use super::values::{SpvId, SsaValue, Value};
use super::Translator;
use crate::ir::{Intrinsic, IrInstr, IrType, TexInstr, TexOp, TexSrc, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use std::rc::Rc;
use tracing::trace;

/// An image and a sampler bound together by `OpSampledImage`, or passed as
/// a combined image-sampler parameter.
#[derive(Debug, Clone)]
pub struct SampledImage {
    pub ty: Rc<SpirvType>,
    pub image: Rc<Pointer>,
    pub sampler: Rc<Pointer>,
}

/// A texel address from `OpImageTexelPointer`; only atomics consume it.
#[derive(Debug, Clone)]
pub struct ImagePointer {
    pub image: Rc<Pointer>,
    pub coord: VarId,
    pub sample: VarId,
}

/// `ImageOperands` mask bits, in the order their operands appear.
mod operand {
    pub const BIAS: u32 = 0x1;
    pub const LOD: u32 = 0x2;
    pub const GRAD: u32 = 0x4;
    pub const CONST_OFFSET: u32 = 0x8;
    pub const OFFSET: u32 = 0x10;
    pub const CONST_OFFSETS: u32 = 0x20;
    pub const SAMPLE: u32 = 0x40;
    pub const MIN_LOD: u32 = 0x80;

    pub const ALL: u32 = BIAS | LOD | GRAD | CONST_OFFSET | OFFSET | CONST_OFFSETS | SAMPLE | MIN_LOD;
}

/// Base texture op of a sample, fetch, gather or query opcode.
fn base_tex_op(op: Op) -> Option<TexOp> {
    Some(match op {
        Op::ImageSampleImplicitLod
        | Op::ImageSampleDrefImplicitLod
        | Op::ImageSampleProjImplicitLod
        | Op::ImageSampleProjDrefImplicitLod => TexOp::Tex,
        Op::ImageSampleExplicitLod
        | Op::ImageSampleDrefExplicitLod
        | Op::ImageSampleProjExplicitLod
        | Op::ImageSampleProjDrefExplicitLod => TexOp::Txl,
        Op::ImageFetch => TexOp::Txf,
        Op::ImageGather | Op::ImageDrefGather => TexOp::Tg4,
        Op::ImageQuerySizeLod | Op::ImageQuerySize => TexOp::Txs,
        Op::ImageQueryLod => TexOp::Lod,
        Op::ImageQueryLevels => TexOp::QueryLevels,
        Op::ImageQuerySamples => TexOp::TextureSamples,
        _ => return None,
    })
}

fn has_dref(op: Op) -> bool {
    matches!(
        op,
        Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageDrefGather
    )
}

fn is_proj(op: Op) -> bool {
    matches!(
        op,
        Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
    )
}

/// Texture op after applying the image operand `bit`.
fn upgrade(op: TexOp, bit: u32) -> Result<TexOp> {
    Ok(match (bit, op) {
        (operand::BIAS, TexOp::Tex) => TexOp::Txb,
        (operand::BIAS, _) => bail!("Bias image operand on a {op:?} lookup"),
        (operand::LOD, TexOp::Tex) => bail!("Lod image operand on an implicit-lod lookup"),
        (operand::GRAD, TexOp::Txl) => TexOp::Txd,
        (operand::GRAD, _) => bail!("Grad image operand on a {op:?} lookup"),
        (operand::SAMPLE, TexOp::Txf) => TexOp::TxfMs,
        _ => op,
    })
}

impl Translator<'_> {
    /// Image and optional sampler behind a texture operand.
    fn texture_handles(&self, id: SpvId) -> Result<(Rc<Pointer>, Option<Rc<Pointer>>)> {
        match self.values.get_untyped(id)? {
            Value::SampledImage(si) => Ok((si.image.clone(), Some(si.sampler.clone()))),
            // A combined image-sampler variable is both.
            Value::Pointer(p) if matches!(p.ty.kind, TypeKind::SampledImage(_)) => Ok((p.clone(), Some(p.clone()))),
            Value::Pointer(p) => Ok((p.clone(), None)),
            other => bail!("a {} cannot be used as a texture", other.kind()),
        }
    }

    pub(super) fn handle_texture(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        match op {
            Op::SampledImage => {
                let ty = self.result_type(inst)?;
                let id = SpvId(inst.word(2)?);
                let image = self.values.pointer(SpvId(inst.word(3)?))?;
                let sampler = self.values.pointer(SpvId(inst.word(4)?))?;
                return self
                    .values
                    .define(id, Value::SampledImage(Rc::new(SampledImage { ty, image, sampler })));
            }
            Op::Image => {
                let id = SpvId(inst.word(2)?);
                let (image, _) = self.texture_handles(SpvId(inst.word(3)?))?;
                return self.values.define(id, Value::Pointer(image));
            }
            _ => {}
        }

        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let (image, sampler) = self.texture_handles(SpvId(inst.word(3)?))?;
        let image_ty: ImageType = image
            .ty
            .image()
            .with_context(|| format!("{op:?} on a non-image {}", image.ty.describe()))?
            .clone();
        let info = image_ty.info();

        // Storage images answer queries through image intrinsics.
        if info.storage && matches!(op, Op::ImageQuerySize | Op::ImageQuerySamples) {
            let deref = self.pointer_deref(&image)?;
            let intrinsic = if op == Op::ImageQuerySize {
                Intrinsic::ImageSize
            } else {
                Intrinsic::ImageSamples
            };
            let var = self
                .builder
                .intrinsic(intrinsic, Some(ty.ir_type()?), &[deref], &[])
                .context("image query has a result")?;
            return self.define_ssa(id, SsaValue::leaf(ty, var));
        }

        let mut tex_op = base_tex_op(op).with_context(|| format!("{op:?} is not a texture instruction"))?;
        let mut sources = vec![(TexSrc::TextureDeref, self.pointer_deref(&image)?)];
        if let Some(sampler) = &sampler {
            sources.push((TexSrc::SamplerDeref, self.pointer_deref(sampler)?));
        }

        let mut idx = 4;
        let mut coord_components = 0;
        if !matches!(op, Op::ImageQuerySize | Op::ImageQueryLevels | Op::ImageQuerySamples | Op::ImageQuerySizeLod) {
            let coord = self.ssa_def(SpvId(inst.word(idx)?))?;
            idx += 1;
            coord_components = info.dim.coordinate_components();
            if info.arrayed && tex_op != TexOp::Lod {
                coord_components += 1;
            }
            let have = self.builder.var_type(coord).components;
            let needed = coord_components + u8::from(is_proj(op));
            if have < needed {
                bail!("{op:?} needs {needed} coordinate components, got {have}");
            }
            let trimmed = if have == coord_components {
                coord
            } else {
                let comps: Vec<u8> = (0..coord_components).collect();
                self.builder.swizzle(coord, &comps)
            };
            sources.push((TexSrc::Coord, trimmed));
            if is_proj(op) {
                let projector = self.builder.channel(coord, coord_components);
                sources.push((TexSrc::Projector, projector));
            }
        }

        let mut component = 0;
        if op == Op::ImageGather {
            let c = self.values.constant(SpvId(inst.word(idx)?))?;
            component = u8::try_from(c.scalar_u64()?).context("gather component out of range")?;
            idx += 1;
        }
        let mut comparator = false;
        if has_dref(op) {
            sources.push((TexSrc::Comparator, self.ssa_def(SpvId(inst.word(idx)?))?));
            comparator = true;
            idx += 1;
        }
        if op == Op::ImageQuerySizeLod {
            sources.push((TexSrc::Lod, self.ssa_def(SpvId(inst.word(idx)?))?));
            idx += 1;
        }

        if idx < inst.len() {
            let mask = inst.word(idx)?;
            idx += 1;
            if mask & !operand::ALL != 0 {
                bail!("unsupported image operands {:#x}", mask & !operand::ALL);
            }
            for bit in [
                operand::BIAS,
                operand::LOD,
                operand::GRAD,
                operand::CONST_OFFSET,
                operand::OFFSET,
                operand::CONST_OFFSETS,
                operand::SAMPLE,
                operand::MIN_LOD,
            ] {
                if mask & bit == 0 {
                    continue;
                }
                tex_op = upgrade(tex_op, bit)?;
                match bit {
                    operand::BIAS => sources.push((TexSrc::Bias, self.next_operand(inst, &mut idx)?)),
                    operand::LOD => sources.push((TexSrc::Lod, self.next_operand(inst, &mut idx)?)),
                    operand::GRAD => {
                        sources.push((TexSrc::Ddx, self.next_operand(inst, &mut idx)?));
                        sources.push((TexSrc::Ddy, self.next_operand(inst, &mut idx)?));
                    }
                    operand::CONST_OFFSET | operand::OFFSET => sources.push((TexSrc::Offset, self.next_operand(inst, &mut idx)?)),
                    operand::CONST_OFFSETS => bail!("the ConstOffsets image operand is not supported"),
                    operand::SAMPLE => sources.push((TexSrc::MsIndex, self.next_operand(inst, &mut idx)?)),
                    _ => sources.push((TexSrc::MinLod, self.next_operand(inst, &mut idx)?)),
                }
            }
        }

        let dest_ir: IrType = ty.ir_type()?;
        let is_shadow = info.shadow || comparator;
        let dest = self.builder.new_var(dest_ir);
        trace!(?tex_op, sources = sources.len(), "texture instruction");
        self.builder.emit(IrInstr::Tex(Box::new(TexInstr {
            dest,
            op: tex_op,
            sources,
            dim: info.dim,
            is_array: info.arrayed,
            is_shadow,
            is_new_style_shadow: is_shadow && dest_ir.components == 1,
            coord_components,
            component,
            dest_type: dest_ir.base,
        })));
        self.define_ssa(id, SsaValue::leaf(ty, dest))
    }

    // ── Storage images ───────────────────────────────────────────────────

    pub(super) fn handle_image(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        match op {
            Op::ImageTexelPointer => {
                let id = SpvId(inst.word(2)?);
                let image = self.values.pointer(SpvId(inst.word(3)?))?;
                let coord = self.ssa_def(SpvId(inst.word(4)?))?;
                let sample = self.ssa_def(SpvId(inst.word(5)?))?;
                self.values
                    .define(id, Value::ImagePointer(Rc::new(ImagePointer { image, coord, sample })))
            }
            Op::ImageRead => {
                let ty = self.result_type(inst)?;
                let id = SpvId(inst.word(2)?);
                let image = self.values.pointer(SpvId(inst.word(3)?))?;
                let coord = self.ssa_def(SpvId(inst.word(4)?))?;
                let sample = self.image_sample_operand(inst, 5)?;
                let deref = self.pointer_deref(&image)?;
                let var = self
                    .builder
                    .intrinsic(Intrinsic::ImageLoad, Some(ty.ir_type()?), &[deref, coord, sample], &[])
                    .context("image load has a result")?;
                self.define_ssa(id, SsaValue::leaf(ty, var))
            }
            Op::ImageWrite => {
                let image = self.values.pointer(SpvId(inst.word(1)?))?;
                let coord = self.ssa_def(SpvId(inst.word(2)?))?;
                let texel = self.ssa_def(SpvId(inst.word(3)?))?;
                let sample = self.image_sample_operand(inst, 4)?;
                let deref = self.pointer_deref(&image)?;
                self.builder
                    .intrinsic(Intrinsic::ImageStore, None, &[deref, coord, sample, texel], &[]);
                Ok(())
            }
            _ => bail!("{op:?} is not an image instruction"),
        }
    }

    fn next_operand(&mut self, inst: &Instruction<'_>, idx: &mut usize) -> Result<VarId> {
        let var = self.ssa_def(SpvId(inst.word(*idx)?))?;
        *idx += 1;
        Ok(var)
    }

    /// The `Sample` image operand of a read or write, or undef.
    fn image_sample_operand(&mut self, inst: &Instruction<'_>, mask_word: usize) -> Result<VarId> {
        if mask_word < inst.len() {
            let mask = inst.word(mask_word)?;
            if mask & operand::SAMPLE != 0 {
                if mask & !operand::SAMPLE != 0 {
                    bail!("unsupported image operands {mask:#x} on a storage image access");
                }
                return self.ssa_def(SpvId(inst.word(mask_word + 1)?));
            }
            if mask != 0 {
                bail!("unsupported image operands {mask:#x} on a storage image access");
            }
        }
        Ok(self.builder.undef(IrType::U32))
    }
}
