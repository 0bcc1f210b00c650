//! The `OpenCL.std` extended instruction set, math subset.
//!
//! Covers the scalar and vector math, common, geometric and integer
//! functions that have a direct counterpart among the ALU primitives or the
//! `GLSL.std.450` builders. Memory, printf and vector load/store
//! instructions are rejected.

use super::alu::nth;
use super::values::{SpvId, SsaValue};
use super::Translator;
use crate::ir::{AluOp, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Result};
use std::f64::consts::LOG2_10;

/// Instruction numbers, from the OpenCL extended instruction set grammar.
mod cl {
    pub const ACOS: u32 = 0;
    pub const ACOSH: u32 = 1;
    pub const ASIN: u32 = 3;
    pub const ASINH: u32 = 4;
    pub const ATAN: u32 = 6;
    pub const ATAN2: u32 = 7;
    pub const ATANH: u32 = 8;
    pub const CEIL: u32 = 12;
    pub const COPYSIGN: u32 = 13;
    pub const COS: u32 = 14;
    pub const COSH: u32 = 15;
    pub const EXP: u32 = 19;
    pub const EXP2: u32 = 20;
    pub const EXP10: u32 = 21;
    pub const FABS: u32 = 23;
    pub const FLOOR: u32 = 25;
    pub const FMA: u32 = 26;
    pub const FMAX: u32 = 27;
    pub const FMIN: u32 = 28;
    pub const FMOD: u32 = 29;
    pub const FRACT: u32 = 30;
    pub const LOG: u32 = 37;
    pub const LOG2: u32 = 38;
    pub const LOG10: u32 = 39;
    pub const MAD: u32 = 42;
    pub const POW: u32 = 48;
    pub const POWR: u32 = 50;
    pub const RINT: u32 = 53;
    pub const ROUND: u32 = 55;
    pub const RSQRT: u32 = 56;
    pub const SIN: u32 = 57;
    pub const SINH: u32 = 59;
    pub const SQRT: u32 = 61;
    pub const TAN: u32 = 62;
    pub const TANH: u32 = 63;
    pub const TRUNC: u32 = 66;

    pub const FCLAMP: u32 = 95;
    pub const DEGREES: u32 = 96;
    pub const FMAX_COMMON: u32 = 97;
    pub const FMIN_COMMON: u32 = 98;
    pub const MIX: u32 = 99;
    pub const RADIANS: u32 = 100;
    pub const STEP: u32 = 101;
    pub const SMOOTHSTEP: u32 = 102;
    pub const SIGN: u32 = 103;

    pub const CROSS: u32 = 104;
    pub const DISTANCE: u32 = 105;
    pub const LENGTH: u32 = 106;
    pub const NORMALIZE: u32 = 107;
    pub const FAST_DISTANCE: u32 = 108;
    pub const FAST_LENGTH: u32 = 109;
    pub const FAST_NORMALIZE: u32 = 110;

    pub const S_ABS: u32 = 141;
    pub const S_CLAMP: u32 = 149;
    pub const U_CLAMP: u32 = 150;
    pub const CLZ: u32 = 151;
    pub const CTZ: u32 = 152;
    pub const S_MAX: u32 = 156;
    pub const U_MAX: u32 = 157;
    pub const S_MIN: u32 = 158;
    pub const U_MIN: u32 = 159;
    pub const S_MUL_HI: u32 = 160;
    pub const POPCOUNT: u32 = 166;
    pub const U_ABS: u32 = 201;
    pub const U_MUL_HI: u32 = 203;
}

/// ALU op for instructions that are exactly one primitive.
fn direct_op(number: u32) -> Option<AluOp> {
    Some(match number {
        cl::CEIL => AluOp::FCeil,
        cl::COPYSIGN => AluOp::FCopysign,
        cl::COS => AluOp::FCos,
        cl::EXP2 => AluOp::FExp2,
        cl::FABS => AluOp::FAbs,
        cl::FLOOR => AluOp::FFloor,
        cl::FMA | cl::MAD => AluOp::FFma,
        cl::FMAX | cl::FMAX_COMMON => AluOp::FMax,
        cl::FMIN | cl::FMIN_COMMON => AluOp::FMin,
        cl::FMOD => AluOp::FRem,
        cl::LOG2 => AluOp::FLog2,
        cl::POW | cl::POWR => AluOp::FPow,
        cl::RINT => AluOp::FRoundEven,
        cl::RSQRT => AluOp::FRsq,
        cl::SIN => AluOp::FSin,
        cl::SQRT => AluOp::FSqrt,
        cl::TRUNC => AluOp::FTrunc,
        cl::MIX => AluOp::FLrp,
        cl::SIGN => AluOp::FSign,
        cl::S_ABS => AluOp::IAbs,
        cl::U_ABS => AluOp::Mov,
        cl::S_MAX => AluOp::IMax,
        cl::U_MAX => AluOp::UMax,
        cl::S_MIN => AluOp::IMin,
        cl::U_MIN => AluOp::UMin,
        cl::S_MUL_HI => AluOp::IMulHigh,
        cl::U_MUL_HI => AluOp::UMulHigh,
        cl::POPCOUNT => AluOp::BitCount,
        _ => return None,
    })
}

impl Translator<'_> {
    pub(super) fn handle_opencl(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let number = inst.word(4)?;
        let operands: Vec<SpvId> = inst.words_from(5).iter().map(|&w| SpvId(w)).collect();

        if number == cl::FRACT {
            // fract(x, *floor): the floor goes out through the pointer.
            let x = self.ssa_def(nth(&operands, 0)?)?;
            let ptr = self.values.pointer(nth(&operands, 1)?)?;
            let floor = self.builder.alu_same(AluOp::FFloor, &[x]);
            let fract = self.builder.alu_same(AluOp::FSub, &[x, floor]);
            // Largest float below one.
            let below_one = self.fconst(x, 1.0 - f64::from(f32::EPSILON) / 2.0);
            let fract = self.builder.alu_same(AluOp::FMin, &[fract, below_one]);
            self.store_pointer(&ptr, &SsaValue::leaf(ptr.ty.clone(), floor))?;
            return self.define_ssa(id, SsaValue::leaf(ty, fract));
        }

        let mut srcs = Vec::with_capacity(operands.len());
        for &operand in &operands {
            srcs.push(self.ssa_def(operand)?);
        }
        let var = self.opencl_leaf(number, ty.ir_type()?, &srcs)?;
        self.define_ssa(id, SsaValue::leaf(ty, var))
    }

    fn opencl_leaf(&mut self, number: u32, ty: IrType, srcs: &[VarId]) -> Result<VarId> {
        if let Some(alu) = direct_op(number) {
            return Ok(self.builder.alu(alu, ty, srcs));
        }
        let x = nth(srcs, 0)?;
        let var = match number {
            cl::ACOS => self.build_acos(x),
            cl::ACOSH => self.build_acosh(x),
            cl::ASIN => self.build_asin(x),
            cl::ASINH => self.build_asinh(x),
            cl::ATAN => self.build_atan(x),
            cl::ATAN2 => self.build_atan2(x, nth(srcs, 1)?),
            cl::ATANH => self.build_atanh(x),
            cl::COSH => self.build_cosh(x),
            cl::EXP => self.build_exp(x),
            cl::EXP10 => {
                let t = self.scale(x, LOG2_10);
                self.builder.alu_same(AluOp::FExp2, &[t])
            }
            cl::LOG => self.build_log(x),
            cl::LOG10 => {
                let t = self.builder.alu_same(AluOp::FLog2, &[x]);
                self.scale(t, 1.0 / LOG2_10)
            }
            cl::ROUND => {
                // Halfway cases round away from zero.
                let abs = self.builder.alu_same(AluOp::FAbs, &[x]);
                let half = self.fconst(x, 0.5);
                let t = self.builder.alu_same(AluOp::FAdd, &[abs, half]);
                let t = self.builder.alu_same(AluOp::FFloor, &[t]);
                let sign = self.builder.alu_same(AluOp::FSign, &[x]);
                self.builder.alu_same(AluOp::FMul, &[sign, t])
            }
            cl::SINH => self.build_sinh(x),
            cl::TAN => self.build_tan(x),
            cl::TANH => self.build_tanh(x),

            cl::FCLAMP => self.clamp(AluOp::FMax, AluOp::FMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            cl::DEGREES => self.scale(x, 180.0 / std::f64::consts::PI),
            cl::RADIANS => self.scale(x, std::f64::consts::PI / 180.0),
            cl::STEP => self.build_step(x, nth(srcs, 1)?),
            cl::SMOOTHSTEP => self.build_smoothstep(x, nth(srcs, 1)?, nth(srcs, 2)?),

            cl::CROSS => self.build_cross(x, nth(srcs, 1)?),
            cl::DISTANCE | cl::FAST_DISTANCE => {
                let d = self.builder.alu_same(AluOp::FSub, &[x, nth(srcs, 1)?]);
                self.build_length(d)
            }
            cl::LENGTH | cl::FAST_LENGTH => self.build_length(x),
            cl::NORMALIZE | cl::FAST_NORMALIZE => self.build_normalize(x),

            cl::S_CLAMP => self.clamp(AluOp::IMax, AluOp::IMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            cl::U_CLAMP => self.clamp(AluOp::UMax, AluOp::UMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            cl::CLZ => {
                // The MSB search yields -1 for zero, which gives the full width.
                let msb = self.builder.alu(AluOp::UFindMsb, ty, &[x]);
                let top = self.iconst(msb, i64::from(ty.bit_size) - 1);
                self.builder.alu(AluOp::ISub, ty, &[top, msb])
            }
            cl::CTZ => {
                let lsb = self.builder.alu(AluOp::FindLsb, ty, &[x]);
                let zero = self.iconst(x, 0);
                let is_zero = self.builder.compare(AluOp::IEq, x, zero);
                let width = self.iconst(lsb, i64::from(ty.bit_size));
                self.builder.alu(AluOp::BCsel, ty, &[is_zero, width, lsb])
            }
            _ => bail!("unsupported OpenCL.std instruction {number}"),
        };
        Ok(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_primitive_instructions() {
        assert_eq!(direct_op(cl::MAD), Some(AluOp::FFma));
        assert_eq!(direct_op(cl::FMIN_COMMON), Some(AluOp::FMin));
        assert_eq!(direct_op(cl::POPCOUNT), Some(AluOp::BitCount));
        assert_eq!(direct_op(cl::ATAN2), None);
        assert_eq!(direct_op(cl::CLZ), None);
    }
}
