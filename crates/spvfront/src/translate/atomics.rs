//! Atomics, barriers and geometry stream instructions.
//!
//! Atomics are routed by what the pointer operand is: a texel pointer goes
//! to image atomics, and a memory pointer goes to the shared, SSBO or deref
//! variant depending on the addressing its storage class was given.

use super::pointers::Address;
use super::values::{SpvId, SsaValue, Value};
use super::variables::StorageMode;
use super::Translator;
use crate::ir::{AluOp, AtomicOp, Intrinsic, ShaderStage, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use tracing::trace;

/// `MemorySemantics` storage bits.
mod semantics {
    pub const UNIFORM: u32 = 0x40;
    pub const WORKGROUP: u32 = 0x100;
    pub const ATOMIC_COUNTER: u32 = 0x400;
    pub const IMAGE: u32 = 0x800;

    pub const ALL_MEMORY: u32 = UNIFORM | WORKGROUP | ATOMIC_COUNTER | IMAGE;
}

/// `Scope` values.
mod scope {
    pub const CROSS_DEVICE: u32 = 0;
    pub const WORKGROUP: u32 = 2;
    pub const SUBGROUP: u32 = 3;
}

fn atomic_op(op: Op) -> Option<AtomicOp> {
    Some(match op {
        Op::AtomicExchange => AtomicOp::Exchange,
        Op::AtomicCompareExchange | Op::AtomicCompareExchangeWeak => AtomicOp::CompSwap,
        Op::AtomicIIncrement | Op::AtomicIDecrement | Op::AtomicIAdd | Op::AtomicISub => AtomicOp::Add,
        Op::AtomicSMin => AtomicOp::IMin,
        Op::AtomicUMin => AtomicOp::UMin,
        Op::AtomicSMax => AtomicOp::IMax,
        Op::AtomicUMax => AtomicOp::UMax,
        Op::AtomicAnd => AtomicOp::And,
        Op::AtomicOr => AtomicOp::Or,
        Op::AtomicXor => AtomicOp::Xor,
        _ => return None,
    })
}

/// Barrier intrinsics for a memory barrier over `semantics` at `scope`.
fn memory_barriers(scope: u32, semantics: u32) -> Result<Vec<Intrinsic>> {
    let memory = semantics & semantics::ALL_MEMORY;
    if memory == 0 {
        return Ok(Vec::new());
    }
    match scope {
        scope::CROSS_DEVICE => bail!("cross-device memory barriers are not supported"),
        scope::SUBGROUP => return Ok(Vec::new()),
        scope::WORKGROUP => return Ok(vec![Intrinsic::GroupMemoryBarrier]),
        _ => {}
    }
    if memory == semantics::ALL_MEMORY {
        return Ok(vec![Intrinsic::MemoryBarrier]);
    }
    let mut out = Vec::new();
    for (bit, intrinsic) in [
        (semantics::UNIFORM, Intrinsic::MemoryBarrierBuffer),
        (semantics::WORKGROUP, Intrinsic::MemoryBarrierShared),
        (semantics::ATOMIC_COUNTER, Intrinsic::MemoryBarrierAtomicCounter),
        (semantics::IMAGE, Intrinsic::MemoryBarrierImage),
    ] {
        if memory & bit != 0 {
            out.push(intrinsic);
        }
    }
    Ok(out)
}

impl Translator<'_> {
    fn constant_u32(&self, id: SpvId) -> Result<u32> {
        let value = self.values.constant(id)?.scalar_u64()?;
        u32::try_from(value).with_context(|| format!("constant {value} does not fit a scope or semantics operand"))
    }

    // ── Atomics ──────────────────────────────────────────────────────────

    pub(super) fn handle_atomic(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let atomic = atomic_op(op).with_context(|| format!("{op:?} is not an atomic instruction"))?;
        let ir_ty = ty.ir_type()?;

        let data: Vec<VarId> = match op {
            Op::AtomicIIncrement => vec![self.imm_for(ir_ty, 1)],
            Op::AtomicIDecrement => vec![self.imm_for(ir_ty, -1)],
            Op::AtomicISub => {
                let value = self.ssa_def(SpvId(inst.word(6)?))?;
                vec![self.builder.alu(AluOp::INeg, ir_ty, &[value])]
            }
            Op::AtomicCompareExchange | Op::AtomicCompareExchangeWeak => {
                let value = self.ssa_def(SpvId(inst.word(7)?))?;
                let comparator = self.ssa_def(SpvId(inst.word(8)?))?;
                vec![comparator, value]
            }
            _ => vec![self.ssa_def(SpvId(inst.word(6)?))?],
        };

        let pointer_id = SpvId(inst.word(3)?);
        let (intrinsic, mut srcs) = match self.values.get_untyped(pointer_id)?.clone() {
            Value::ImagePointer(texel) => {
                let deref = self.pointer_deref(&texel.image)?;
                (Intrinsic::ImageAtomic(atomic), vec![deref, texel.coord, texel.sample])
            }
            Value::Pointer(ptr) => match ptr.strategy().dereference(self, &ptr)? {
                Address::Offset {
                    block_index, offset, ..
                } => match (ptr.mode, block_index) {
                    (StorageMode::Workgroup, _) => (Intrinsic::SharedAtomic(atomic), vec![offset]),
                    (StorageMode::Ssbo, Some(block_index)) => {
                        (Intrinsic::SsboAtomic(atomic), vec![block_index, offset])
                    }
                    (mode, _) => bail!("atomics are not supported on {mode:?} memory"),
                },
                Address::Deref { deref, component: None } => (Intrinsic::DerefAtomic(atomic), vec![deref]),
                Address::Deref { .. } => bail!("atomic on a vector component"),
            },
            other => bail!("atomic on a {}", other.kind()),
        };
        srcs.extend(data);
        trace!(?intrinsic, "atomic");
        let var = self
            .builder
            .intrinsic(intrinsic, Some(ir_ty), &srcs, &[])
            .context("atomic has a result")?;
        self.define_ssa(id, SsaValue::leaf(ty, var))
    }

    // ── Barriers ─────────────────────────────────────────────────────────

    pub(super) fn handle_barrier(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        match op {
            Op::ControlBarrier => {
                let execution = self.constant_u32(SpvId(inst.word(1)?))?;
                let memory = self.constant_u32(SpvId(inst.word(2)?))?;
                let semantics = self.constant_u32(SpvId(inst.word(3)?))?;
                self.emit_memory_barrier(memory, semantics)?;
                if execution == scope::WORKGROUP {
                    self.builder.intrinsic(Intrinsic::Barrier, None, &[], &[]);
                }
            }
            Op::MemoryBarrier => {
                let memory = self.constant_u32(SpvId(inst.word(1)?))?;
                let semantics = self.constant_u32(SpvId(inst.word(2)?))?;
                self.emit_memory_barrier(memory, semantics)?;
            }
            _ => bail!("{op:?} is not a barrier instruction"),
        }
        Ok(())
    }

    fn emit_memory_barrier(&mut self, scope: u32, semantics: u32) -> Result<()> {
        for intrinsic in memory_barriers(scope, semantics)? {
            self.builder.intrinsic(intrinsic, None, &[], &[]);
        }
        Ok(())
    }

    // ── Geometry streams ─────────────────────────────────────────────────

    pub(super) fn handle_geometry(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        if self.stage != ShaderStage::Geometry {
            bail!("{op:?} outside a geometry shader");
        }
        let stream = match op {
            Op::EmitStreamVertex | Op::EndStreamPrimitive => self.constant_u32(SpvId(inst.word(1)?))?,
            _ => 0,
        };
        let intrinsic = match op {
            Op::EmitVertex | Op::EmitStreamVertex => Intrinsic::EmitVertex,
            Op::EndPrimitive | Op::EndStreamPrimitive => Intrinsic::EndPrimitive,
            _ => bail!("{op:?} is not a geometry instruction"),
        };
        self.builder.intrinsic(intrinsic, None, &[], &[stream]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barriers_without_memory_bits_emit_nothing() {
        assert!(memory_barriers(1, 0x2).unwrap().is_empty());
    }

    #[test]
    fn workgroup_scope_is_a_group_barrier() {
        assert_eq!(
            memory_barriers(scope::WORKGROUP, semantics::WORKGROUP).unwrap(),
            vec![Intrinsic::GroupMemoryBarrier]
        );
    }

    #[test]
    fn device_scope_picks_per_storage_barriers() {
        assert_eq!(
            memory_barriers(1, semantics::ALL_MEMORY).unwrap(),
            vec![Intrinsic::MemoryBarrier]
        );
        assert_eq!(
            memory_barriers(1, semantics::UNIFORM | semantics::IMAGE).unwrap(),
            vec![Intrinsic::MemoryBarrierBuffer, Intrinsic::MemoryBarrierImage]
        );
    }

    #[test]
    fn subgroup_and_cross_device_scopes() {
        assert!(memory_barriers(scope::SUBGROUP, semantics::UNIFORM).unwrap().is_empty());
        assert!(memory_barriers(scope::CROSS_DEVICE, semantics::UNIFORM).is_err());
    }

    #[test]
    fn increments_and_subtracts_are_adds() {
        assert_eq!(atomic_op(Op::AtomicIDecrement), Some(AtomicOp::Add));
        assert_eq!(atomic_op(Op::AtomicISub), Some(AtomicOp::Add));
        assert_eq!(atomic_op(Op::AtomicCompareExchangeWeak), Some(AtomicOp::CompSwap));
        assert_eq!(atomic_op(Op::AtomicLoad), None);
    }
}
