//! Scalar and vector arithmetic, logic, comparisons and conversions.
//!
//! Most opcodes map onto one [`AluOp`]. The rest are short sequences:
//! SPIR-V's ordered and unordered float comparisons add an explicit NaN
//! test, greater-than forms swap their operands, and the carry and
//! extended-multiply ops produce two-member structs. Anything with a matrix
//! operand is handed to the matrix translator.

use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, SsaValue};
use super::Translator;
use crate::ir::{AluOp, BaseType, ConstValue, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use std::rc::Rc;

/// The IR op for a SPIR-V opcode that maps onto a single ALU instruction,
/// and whether its two operands must be swapped first.
pub(super) fn alu_op_for_opcode(op: Op) -> Option<(AluOp, bool)> {
    let alu = match op {
        Op::SNegate => AluOp::INeg,
        Op::FNegate => AluOp::FNeg,
        Op::Not => AluOp::INot,
        Op::IAdd => AluOp::IAdd,
        Op::FAdd => AluOp::FAdd,
        Op::ISub => AluOp::ISub,
        Op::FSub => AluOp::FSub,
        Op::IMul => AluOp::IMul,
        Op::FMul => AluOp::FMul,
        Op::UDiv => AluOp::UDiv,
        Op::SDiv => AluOp::IDiv,
        Op::FDiv => AluOp::FDiv,
        Op::UMod => AluOp::UMod,
        Op::SRem => AluOp::IRem,
        Op::SMod => AluOp::IMod,
        Op::FRem => AluOp::FRem,
        Op::FMod => AluOp::FMod,

        Op::ShiftRightLogical => AluOp::UShr,
        Op::ShiftRightArithmetic => AluOp::IShr,
        Op::ShiftLeftLogical => AluOp::IShl,
        Op::BitwiseOr | Op::LogicalOr => AluOp::IOr,
        Op::BitwiseXor => AluOp::IXor,
        Op::BitwiseAnd | Op::LogicalAnd => AluOp::IAnd,
        Op::LogicalNot => AluOp::INot,
        Op::BitFieldInsert => AluOp::BitfieldInsert,
        Op::BitFieldSExtract => AluOp::IBitfieldExtract,
        Op::BitFieldUExtract => AluOp::UBitfieldExtract,
        Op::BitReverse => AluOp::BitfieldReverse,
        Op::BitCount => AluOp::BitCount,

        Op::Select => AluOp::BCsel,
        Op::Any => AluOp::BAny,
        Op::All => AluOp::BAll,

        // Comparisons
        Op::LogicalEqual | Op::IEqual => AluOp::IEq,
        Op::LogicalNotEqual | Op::INotEqual => AluOp::INe,
        Op::ULessThan => AluOp::ULt,
        Op::SLessThan => AluOp::ILt,
        Op::UGreaterThanEqual => AluOp::UGe,
        Op::SGreaterThanEqual => AluOp::IGe,
        Op::UGreaterThan => return Some((AluOp::ULt, true)),
        Op::SGreaterThan => return Some((AluOp::ILt, true)),
        Op::ULessThanEqual => return Some((AluOp::UGe, true)),
        Op::SLessThanEqual => return Some((AluOp::IGe, true)),
        Op::FOrdEqual | Op::FUnordEqual => AluOp::FEq,
        Op::FOrdNotEqual | Op::FUnordNotEqual => AluOp::FNe,
        Op::FOrdLessThan | Op::FUnordLessThan => AluOp::FLt,
        Op::FOrdGreaterThanEqual | Op::FUnordGreaterThanEqual => AluOp::FGe,
        Op::FOrdGreaterThan | Op::FUnordGreaterThan => return Some((AluOp::FLt, true)),
        Op::FOrdLessThanEqual | Op::FUnordLessThanEqual => return Some((AluOp::FGe, true)),

        // Conversions
        Op::ConvertFToU => AluOp::F2U,
        Op::ConvertFToS => AluOp::F2I,
        Op::ConvertSToF => AluOp::I2F,
        Op::ConvertUToF => AluOp::U2F,
        Op::UConvert => AluOp::U2U,
        Op::SConvert => AluOp::I2I,
        Op::FConvert => AluOp::F2F,
        Op::Bitcast => AluOp::Bitcast,
        Op::QuantizeToF16 => AluOp::FQuantize2F16,

        // Derivatives
        Op::DPdx => AluOp::FDdx,
        Op::DPdy => AluOp::FDdy,
        Op::DPdxFine => AluOp::FDdxFine,
        Op::DPdyFine => AluOp::FDdyFine,
        Op::DPdxCoarse => AluOp::FDdxCoarse,
        Op::DPdyCoarse => AluOp::FDdyCoarse,

        _ => return None,
    };
    Some((alu, false))
}

fn is_ordered_compare(op: Op) -> bool {
    matches!(
        op,
        Op::FOrdEqual
            | Op::FOrdNotEqual
            | Op::FOrdLessThan
            | Op::FOrdGreaterThan
            | Op::FOrdLessThanEqual
            | Op::FOrdGreaterThanEqual
    )
}

fn is_unordered_compare(op: Op) -> bool {
    matches!(
        op,
        Op::FUnordEqual
            | Op::FUnordNotEqual
            | Op::FUnordLessThan
            | Op::FUnordGreaterThan
            | Op::FUnordLessThanEqual
            | Op::FUnordGreaterThanEqual
    )
}

/// Operand `i`, or an error naming the missing operand.
pub(super) fn nth<T: Clone>(srcs: &[T], i: usize) -> Result<T> {
    srcs.get(i)
        .cloned()
        .with_context(|| format!("missing operand {i}"))
}

impl Translator<'_> {
    pub(super) fn handle_alu(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let mut srcs = Vec::new();
        for &w in inst.words_from(3) {
            srcs.push(self.ssa_value(SpvId(w))?);
        }

        if op == Op::Select && !ty.is_vector_or_scalar() {
            let cond = nth(&srcs, 0)?.def()?;
            let value = self.select_tree(cond, &nth(&srcs, 1)?, &nth(&srcs, 2)?)?;
            return self.define_ssa(id, value);
        }
        if ty.is_matrix() || srcs.iter().any(|s| s.ty.is_matrix()) {
            let value = self.matrix_alu(op, &ty, &srcs)?;
            return self.define_ssa(id, value);
        }

        let value = match op {
            Op::IAddCarry | Op::ISubBorrow | Op::UMulExtended | Op::SMulExtended => {
                let a = nth(&srcs, 0)?.def()?;
                let b = nth(&srcs, 1)?.def()?;
                self.extended_arith(op, &ty, a, b)?
            }
            _ => {
                let defs = srcs.iter().map(|s| s.def()).collect::<Result<Vec<_>>>()?;
                let var = self.alu_leaf(op, ty.ir_type()?, &defs)?;
                SsaValue::leaf(ty, var)
            }
        };
        self.define_ssa(id, value)
    }

    /// One scalar or vector ALU opcode.
    fn alu_leaf(&mut self, op: Op, ty: IrType, srcs: &[VarId]) -> Result<VarId> {
        let var = match op {
            Op::VectorTimesScalar => {
                let scalar = self.builder.broadcast(nth(srcs, 1)?, ty.components);
                self.builder.alu(AluOp::FMul, ty, &[nth(srcs, 0)?, scalar])
            }
            Op::Dot => self.dot(nth(srcs, 0)?, nth(srcs, 1)?),

            Op::ShiftLeftLogical | Op::ShiftRightLogical | Op::ShiftRightArithmetic => {
                let amount = self.shift_amount(nth(srcs, 1)?);
                let alu = match op {
                    Op::ShiftLeftLogical => AluOp::IShl,
                    Op::ShiftRightLogical => AluOp::UShr,
                    _ => AluOp::IShr,
                };
                self.builder.alu(alu, ty, &[nth(srcs, 0)?, amount])
            }

            Op::IsNan => {
                let x = nth(srcs, 0)?;
                self.builder.alu(AluOp::FNe, ty, &[x, x])
            }
            Op::IsInf => {
                let x = nth(srcs, 0)?;
                let abs = self.builder.alu_same(AluOp::FAbs, &[x]);
                let inf = self.fconst(x, f64::INFINITY);
                self.builder.alu(AluOp::FEq, ty, &[abs, inf])
            }

            Op::Fwidth | Op::FwidthFine | Op::FwidthCoarse => {
                let (ddx, ddy) = match op {
                    Op::FwidthFine => (AluOp::FDdxFine, AluOp::FDdyFine),
                    Op::FwidthCoarse => (AluOp::FDdxCoarse, AluOp::FDdyCoarse),
                    _ => (AluOp::FDdx, AluOp::FDdy),
                };
                let x = nth(srcs, 0)?;
                let dx = self.builder.alu(ddx, ty, &[x]);
                let dy = self.builder.alu(ddy, ty, &[x]);
                let dx = self.builder.alu(AluOp::FAbs, ty, &[dx]);
                let dy = self.builder.alu(AluOp::FAbs, ty, &[dy]);
                self.builder.alu(AluOp::FAdd, ty, &[dx, dy])
            }

            _ => {
                let (alu, swap) = alu_op_for_opcode(op).with_context(|| format!("unhandled ALU opcode {op:?}"))?;
                let mut srcs = srcs.to_vec();
                if swap {
                    if srcs.len() != 2 {
                        bail!("{op:?} takes two operands, found {}", srcs.len());
                    }
                    srcs.swap(0, 1);
                }
                let base = self.builder.alu(alu, ty, &srcs);
                if is_ordered_compare(op) {
                    // Both operands must be numbers.
                    let (a, b) = (nth(&srcs, 0)?, nth(&srcs, 1)?);
                    let a_ok = self.builder.alu(AluOp::FEq, ty, &[a, a]);
                    let b_ok = self.builder.alu(AluOp::FEq, ty, &[b, b]);
                    let both = self.builder.alu(AluOp::IAnd, ty, &[a_ok, b_ok]);
                    self.builder.alu(AluOp::IAnd, ty, &[base, both])
                } else if is_unordered_compare(op) {
                    let (a, b) = (nth(&srcs, 0)?, nth(&srcs, 1)?);
                    let a_nan = self.builder.alu(AluOp::FNe, ty, &[a, a]);
                    let b_nan = self.builder.alu(AluOp::FNe, ty, &[b, b]);
                    let either = self.builder.alu(AluOp::IOr, ty, &[a_nan, b_nan]);
                    self.builder.alu(AluOp::IOr, ty, &[base, either])
                } else {
                    base
                }
            }
        };
        Ok(var)
    }

    /// The carry, borrow and extended-multiply ops: a struct of the low
    /// result and the carry, borrow or high half.
    fn extended_arith(&mut self, op: Op, ty: &Rc<SpirvType>, a: VarId, b: VarId) -> Result<Rc<SsaValue>> {
        let TypeKind::Struct(members) = &ty.kind else {
            bail!("{op:?} must produce a struct, not {}", ty.describe());
        };
        let [lo_member, hi_member] = members.as_slice() else {
            bail!("{op:?} must produce a two-member struct");
        };
        let (lo_op, hi_op) = match op {
            Op::IAddCarry => (AluOp::IAdd, AluOp::UAddCarry),
            Op::ISubBorrow => (AluOp::ISub, AluOp::USubBorrow),
            Op::UMulExtended => (AluOp::IMul, AluOp::UMulHigh),
            Op::SMulExtended => (AluOp::IMul, AluOp::IMulHigh),
            _ => bail!("{op:?} is not an extended arithmetic op"),
        };
        let lo = self.builder.alu(lo_op, lo_member.ty.ir_type()?, &[a, b]);
        let hi = self.builder.alu(hi_op, hi_member.ty.ir_type()?, &[a, b]);
        Ok(SsaValue::composite(
            ty.clone(),
            vec![
                SsaValue::leaf(lo_member.ty.clone(), lo),
                SsaValue::leaf(hi_member.ty.clone(), hi),
            ],
        ))
    }

    /// `OpSelect` on composites: the same scalar condition picks every leaf.
    fn select_tree(&mut self, cond: VarId, a: &Rc<SsaValue>, b: &Rc<SsaValue>) -> Result<Rc<SsaValue>> {
        if a.ty.is_vector_or_scalar() {
            let (x, y) = (a.def()?, b.def()?);
            let ty = self.builder.var_type(x);
            let var = self.builder.alu(AluOp::BCsel, ty, &[cond, x, y]);
            return Ok(SsaValue::leaf(a.ty.clone(), var));
        }
        let (xs, ys) = (a.elems()?, b.elems()?);
        if xs.len() != ys.len() {
            bail!("OpSelect between composites of different shapes");
        }
        let mut elems = Vec::with_capacity(xs.len());
        for (x, y) in xs.iter().zip(ys) {
            elems.push(self.select_tree(cond, x, y)?);
        }
        Ok(SsaValue::composite(a.ty.clone(), elems))
    }

    fn shift_amount(&mut self, amount: VarId) -> VarId {
        let ty = self.builder.var_type(amount);
        if ty.base == BaseType::Uint && ty.bit_size == 32 {
            return amount;
        }
        self.builder
            .alu(AluOp::U2U, IrType::U32.with_components(ty.components), &[amount])
    }

    // ── Helpers shared with the extended instruction sets ────────────────

    /// Float constant with the type of `like`, in every component.
    pub(super) fn fconst(&mut self, like: VarId, value: f64) -> VarId {
        let ty = self.builder.var_type(like);
        let c = ConstValue::float(ty.bit_size, value).splat(ty.components);
        self.builder.constant(c)
    }

    /// Integer constant with the type of `like`, in every component.
    pub(super) fn iconst(&mut self, like: VarId, value: i64) -> VarId {
        let ty = self.builder.var_type(like);
        let c = ConstValue::new(ty.scalar_type(), vec![value as u64]).splat(ty.components);
        self.builder.constant(c)
    }

    /// Sum of the component-wise product of two float vectors.
    pub(super) fn dot(&mut self, a: VarId, b: VarId) -> VarId {
        let product = self.builder.alu_same(AluOp::FMul, &[a, b]);
        let n = self.builder.var_type(product).components;
        if n == 1 {
            return product;
        }
        let mut sum = self.builder.channel(product, 0);
        for c in 1..n {
            let next = self.builder.channel(product, c);
            sum = self.builder.alu_same(AluOp::FAdd, &[sum, next]);
        }
        sum
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greater_than_forms_swap_operands() {
        assert_eq!(alu_op_for_opcode(Op::SGreaterThan), Some((AluOp::ILt, true)));
        assert_eq!(alu_op_for_opcode(Op::ULessThanEqual), Some((AluOp::UGe, true)));
        assert_eq!(alu_op_for_opcode(Op::FOrdGreaterThan), Some((AluOp::FLt, true)));
        assert_eq!(alu_op_for_opcode(Op::SLessThan), Some((AluOp::ILt, false)));
    }

    #[test]
    fn non_alu_opcodes_have_no_mapping() {
        assert_eq!(alu_op_for_opcode(Op::Load), None);
        assert_eq!(alu_op_for_opcode(Op::Dot), None);
        assert_eq!(alu_op_for_opcode(Op::VectorTimesScalar), None);
    }

    #[test]
    fn float_compares_are_classified() {
        assert!(is_ordered_compare(Op::FOrdLessThanEqual));
        assert!(!is_ordered_compare(Op::FUnordLessThanEqual));
        assert!(is_unordered_compare(Op::FUnordNotEqual));
        assert!(!is_unordered_compare(Op::IEqual));
    }
}
