//! The `GLSL.std.450` extended instruction set.
//!
//! Most instructions are one ALU op. The rest are built from the ALU
//! primitives here; the OpenCL handler reuses the same builders.

use super::alu::nth;
use super::types::TypeKind;
use super::values::{SpvId, SsaValue};
use super::Translator;
use crate::ir::{AluOp, Intrinsic, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::GLOp;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, LN_2, LOG2_E, PI};

/// Coefficients of the odd polynomial approximating `atan` on [0, 1].
const ATAN_COEFFS: [f64; 6] = [
    0.999_979_312_831_035_5,
    -0.332_675_641_809_124_6,
    0.193_892_497_711_561,
    -0.117_350_319_478_685_1,
    0.053_681_378_431_040_6,
    -0.012_132_321_317_344_4,
];

impl Translator<'_> {
    pub(super) fn handle_glsl450(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let number = inst.word(4)?;
        let op = GLOp::from_u32(number).with_context(|| format!("unknown GLSL.std.450 instruction {number}"))?;
        let operands: Vec<SpvId> = inst.words_from(5).iter().map(|&w| SpvId(w)).collect();

        let value = match op {
            GLOp::Determinant => {
                let m = self.ssa_value(nth(&operands, 0)?)?;
                SsaValue::leaf(ty, self.determinant(&m)?)
            }
            GLOp::MatrixInverse => {
                let m = self.ssa_value(nth(&operands, 0)?)?;
                self.matrix_inverse(&m)?
            }

            GLOp::Modf | GLOp::Frexp => {
                let x = self.ssa_def(nth(&operands, 0)?)?;
                let ptr = self.values.pointer(nth(&operands, 1)?)?;
                let (first, second) = self.split_float(op, x, ptr.ty.ir_type()?);
                self.store_pointer(&ptr, &SsaValue::leaf(ptr.ty.clone(), second))?;
                SsaValue::leaf(ty, first)
            }
            GLOp::ModfStruct | GLOp::FrexpStruct => {
                let TypeKind::Struct(members) = &ty.kind else {
                    bail!("{op:?} must produce a struct");
                };
                let [m0, m1] = members.as_slice() else {
                    bail!("{op:?} must produce a two-member struct");
                };
                let x = self.ssa_def(nth(&operands, 0)?)?;
                let split = if op == GLOp::ModfStruct { GLOp::Modf } else { GLOp::Frexp };
                let (first, second) = self.split_float(split, x, m1.ty.ir_type()?);
                SsaValue::composite(
                    ty.clone(),
                    vec![SsaValue::leaf(m0.ty.clone(), first), SsaValue::leaf(m1.ty.clone(), second)],
                )
            }

            GLOp::InterpolateAtCentroid | GLOp::InterpolateAtSample | GLOp::InterpolateAtOffset => {
                let ptr = self.values.pointer(nth(&operands, 0)?)?;
                let deref = self.pointer_deref(&ptr)?;
                let mut srcs = vec![deref];
                let intrinsic = match op {
                    GLOp::InterpolateAtCentroid => Intrinsic::InterpolateAtCentroid,
                    GLOp::InterpolateAtSample => {
                        srcs.push(self.ssa_def(nth(&operands, 1)?)?);
                        Intrinsic::InterpolateAtSample
                    }
                    _ => {
                        srcs.push(self.ssa_def(nth(&operands, 1)?)?);
                        Intrinsic::InterpolateAtOffset
                    }
                };
                let var = self
                    .builder
                    .intrinsic(intrinsic, Some(ty.ir_type()?), &srcs, &[])
                    .context("interpolation has a result")?;
                SsaValue::leaf(ty, var)
            }

            _ => {
                let mut srcs = Vec::with_capacity(operands.len());
                for &operand in &operands {
                    srcs.push(self.ssa_def(operand)?);
                }
                let var = self.glsl_leaf(op, ty.ir_type()?, &srcs)?;
                SsaValue::leaf(ty, var)
            }
        };
        self.define_ssa(id, value)
    }

    fn glsl_leaf(&mut self, op: GLOp, ty: IrType, srcs: &[VarId]) -> Result<VarId> {
        let x = nth(srcs, 0)?;
        let direct = match op {
            GLOp::Round | GLOp::RoundEven => Some(AluOp::FRoundEven),
            GLOp::Trunc => Some(AluOp::FTrunc),
            GLOp::FAbs => Some(AluOp::FAbs),
            GLOp::SAbs => Some(AluOp::IAbs),
            GLOp::FSign => Some(AluOp::FSign),
            GLOp::SSign => Some(AluOp::ISign),
            GLOp::Floor => Some(AluOp::FFloor),
            GLOp::Ceil => Some(AluOp::FCeil),
            GLOp::Fract => Some(AluOp::FFract),
            GLOp::Sin => Some(AluOp::FSin),
            GLOp::Cos => Some(AluOp::FCos),
            GLOp::Pow => Some(AluOp::FPow),
            GLOp::Exp2 => Some(AluOp::FExp2),
            GLOp::Log2 => Some(AluOp::FLog2),
            GLOp::Sqrt => Some(AluOp::FSqrt),
            GLOp::InverseSqrt => Some(AluOp::FRsq),
            GLOp::FMin | GLOp::NMin => Some(AluOp::FMin),
            GLOp::UMin => Some(AluOp::UMin),
            GLOp::SMin => Some(AluOp::IMin),
            GLOp::FMax | GLOp::NMax => Some(AluOp::FMax),
            GLOp::UMax => Some(AluOp::UMax),
            GLOp::SMax => Some(AluOp::IMax),
            GLOp::FMix => Some(AluOp::FLrp),
            GLOp::Fma => Some(AluOp::FFma),
            GLOp::Ldexp => Some(AluOp::FLdexp),
            GLOp::FindILsb => Some(AluOp::FindLsb),
            GLOp::FindSMsb => Some(AluOp::IFindMsb),
            GLOp::FindUMsb => Some(AluOp::UFindMsb),
            GLOp::PackSnorm4x8 => Some(AluOp::PackSnorm4x8),
            GLOp::PackUnorm4x8 => Some(AluOp::PackUnorm4x8),
            GLOp::PackSnorm2x16 => Some(AluOp::PackSnorm2x16),
            GLOp::PackUnorm2x16 => Some(AluOp::PackUnorm2x16),
            GLOp::PackHalf2x16 => Some(AluOp::PackHalf2x16),
            GLOp::PackDouble2x32 => Some(AluOp::PackDouble2x32),
            GLOp::UnpackSnorm4x8 => Some(AluOp::UnpackSnorm4x8),
            GLOp::UnpackUnorm4x8 => Some(AluOp::UnpackUnorm4x8),
            GLOp::UnpackSnorm2x16 => Some(AluOp::UnpackSnorm2x16),
            GLOp::UnpackUnorm2x16 => Some(AluOp::UnpackUnorm2x16),
            GLOp::UnpackHalf2x16 => Some(AluOp::UnpackHalf2x16),
            GLOp::UnpackDouble2x32 => Some(AluOp::UnpackDouble2x32),
            _ => None,
        };
        if let Some(alu) = direct {
            return Ok(self.builder.alu(alu, ty, srcs));
        }

        let var = match op {
            GLOp::Radians => self.scale(x, PI / 180.0),
            GLOp::Degrees => self.scale(x, 180.0 / PI),
            GLOp::Tan => self.build_tan(x),
            GLOp::Asin => self.build_asin(x),
            GLOp::Acos => self.build_acos(x),
            GLOp::Atan => self.build_atan(x),
            GLOp::Atan2 => self.build_atan2(x, nth(srcs, 1)?),
            GLOp::Sinh => self.build_sinh(x),
            GLOp::Cosh => self.build_cosh(x),
            GLOp::Tanh => self.build_tanh(x),
            GLOp::Asinh => self.build_asinh(x),
            GLOp::Acosh => self.build_acosh(x),
            GLOp::Atanh => self.build_atanh(x),
            GLOp::Exp => self.build_exp(x),
            GLOp::Log => self.build_log(x),
            GLOp::FClamp | GLOp::NClamp => self.clamp(AluOp::FMax, AluOp::FMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            GLOp::UClamp => self.clamp(AluOp::UMax, AluOp::UMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            GLOp::SClamp => self.clamp(AluOp::IMax, AluOp::IMin, x, nth(srcs, 1)?, nth(srcs, 2)?),
            GLOp::Step => self.build_step(x, nth(srcs, 1)?),
            GLOp::SmoothStep => self.build_smoothstep(x, nth(srcs, 1)?, nth(srcs, 2)?),
            GLOp::Length => self.build_length(x),
            GLOp::Distance => {
                let d = self.builder.alu_same(AluOp::FSub, &[x, nth(srcs, 1)?]);
                self.build_length(d)
            }
            GLOp::Cross => self.build_cross(x, nth(srcs, 1)?),
            GLOp::Normalize => self.build_normalize(x),
            GLOp::FaceForward => {
                let (i, nref) = (nth(srcs, 1)?, nth(srcs, 2)?);
                let d = self.dot(nref, i);
                let zero = self.fconst(d, 0.0);
                let facing = self.builder.compare(AluOp::FLt, d, zero);
                let neg = self.builder.alu_same(AluOp::FNeg, &[x]);
                self.builder.alu(AluOp::BCsel, ty, &[facing, x, neg])
            }
            GLOp::Reflect => {
                let n = nth(srcs, 1)?;
                let d = self.dot(n, x);
                let two_d = self.scale(d, 2.0);
                let width = self.builder.var_type(x).components;
                let two_d = self.builder.broadcast(two_d, width);
                let t = self.builder.alu_same(AluOp::FMul, &[two_d, n]);
                self.builder.alu_same(AluOp::FSub, &[x, t])
            }
            GLOp::Refract => self.build_refract(x, nth(srcs, 1)?, nth(srcs, 2)?),
            GLOp::IMix => bail!("GLSL.std.450 IMix is not supported"),
            _ => bail!("unsupported GLSL.std.450 instruction {op:?}"),
        };
        Ok(var)
    }

    /// `Modf` and `Frexp`: the returned part and the part written out.
    fn split_float(&mut self, op: GLOp, x: VarId, second_ty: IrType) -> (VarId, VarId) {
        if op == GLOp::Modf {
            let whole = self.builder.alu_same(AluOp::FTrunc, &[x]);
            let fract = self.builder.alu_same(AluOp::FSub, &[x, whole]);
            (fract, whole)
        } else {
            let sig = self.builder.alu_same(AluOp::FrexpSig, &[x]);
            let exp = self.builder.alu(AluOp::FrexpExp, second_ty, &[x]);
            (sig, exp)
        }
    }

    // ── Builders shared with OpenCL.std ──────────────────────────────────

    pub(super) fn scale(&mut self, x: VarId, factor: f64) -> VarId {
        let k = self.fconst(x, factor);
        self.builder.alu_same(AluOp::FMul, &[x, k])
    }

    pub(super) fn clamp(&mut self, max: AluOp, min: AluOp, x: VarId, lo: VarId, hi: VarId) -> VarId {
        let t = self.builder.alu_same(max, &[x, lo]);
        self.builder.alu_same(min, &[t, hi])
    }

    pub(super) fn build_exp(&mut self, x: VarId) -> VarId {
        let t = self.scale(x, LOG2_E);
        self.builder.alu_same(AluOp::FExp2, &[t])
    }

    pub(super) fn build_log(&mut self, x: VarId) -> VarId {
        let t = self.builder.alu_same(AluOp::FLog2, &[x]);
        self.scale(t, LN_2)
    }

    pub(super) fn build_tan(&mut self, x: VarId) -> VarId {
        let s = self.builder.alu_same(AluOp::FSin, &[x]);
        let c = self.builder.alu_same(AluOp::FCos, &[x]);
        self.builder.alu_same(AluOp::FDiv, &[s, c])
    }

    /// `sign(x) * (pi/2 - sqrt(1 - |x|) * (pi/2 + |x| * (pi/4 - 1 + |x| * (p0 + |x| * p1))))`
    pub(super) fn build_asin(&mut self, x: VarId) -> VarId {
        let abs = self.builder.alu_same(AluOp::FAbs, &[x]);
        let p1 = self.fconst(x, -0.031_029_55);
        let p0 = self.fconst(x, 0.086_566_724);
        let q = self.fconst(x, FRAC_PI_4 - 1.0);
        let half_pi = self.fconst(x, FRAC_PI_2);
        let one = self.fconst(x, 1.0);

        let t = self.builder.alu_same(AluOp::FMul, &[abs, p1]);
        let t = self.builder.alu_same(AluOp::FAdd, &[p0, t]);
        let t = self.builder.alu_same(AluOp::FMul, &[abs, t]);
        let t = self.builder.alu_same(AluOp::FAdd, &[q, t]);
        let t = self.builder.alu_same(AluOp::FMul, &[abs, t]);
        let t = self.builder.alu_same(AluOp::FAdd, &[half_pi, t]);
        let r = self.builder.alu_same(AluOp::FSub, &[one, abs]);
        let r = self.builder.alu_same(AluOp::FSqrt, &[r]);
        let t = self.builder.alu_same(AluOp::FMul, &[r, t]);
        let t = self.builder.alu_same(AluOp::FSub, &[half_pi, t]);
        let sign = self.builder.alu_same(AluOp::FSign, &[x]);
        self.builder.alu_same(AluOp::FMul, &[sign, t])
    }

    pub(super) fn build_acos(&mut self, x: VarId) -> VarId {
        let asin = self.build_asin(x);
        let half_pi = self.fconst(x, FRAC_PI_2);
        self.builder.alu_same(AluOp::FSub, &[half_pi, asin])
    }

    /// Polynomial on `min(|y|, 1) / max(|y|, 1)`, mirrored for `|y| > 1`,
    /// then given the sign of `y`.
    pub(super) fn build_atan(&mut self, y: VarId) -> VarId {
        let ty = self.builder.var_type(y);
        let abs = self.builder.alu_same(AluOp::FAbs, &[y]);
        let one = self.fconst(y, 1.0);
        let num = self.builder.alu_same(AluOp::FMin, &[abs, one]);
        let den = self.builder.alu_same(AluOp::FMax, &[abs, one]);
        let x = self.builder.alu_same(AluOp::FDiv, &[num, den]);

        let x2 = self.builder.alu_same(AluOp::FMul, &[x, x]);
        let mut poly = self.fconst(y, ATAN_COEFFS[5]);
        for &c in ATAN_COEFFS[..5].iter().rev() {
            let k = self.fconst(y, c);
            poly = self.builder.alu_same(AluOp::FMul, &[poly, x2]);
            poly = self.builder.alu_same(AluOp::FAdd, &[poly, k]);
        }
        let mut tmp = self.builder.alu_same(AluOp::FMul, &[poly, x]);

        // atan(y) = pi/2 - atan(1/y) for |y| > 1
        let big = self.builder.compare(AluOp::FLt, one, abs);
        let big = self.builder.alu(AluOp::B2F, ty, &[big]);
        let fix = self.scale(tmp, -2.0);
        let half_pi = self.fconst(y, FRAC_PI_2);
        let fix = self.builder.alu_same(AluOp::FAdd, &[fix, half_pi]);
        let fix = self.builder.alu_same(AluOp::FMul, &[big, fix]);
        tmp = self.builder.alu_same(AluOp::FAdd, &[tmp, fix]);

        let sign = self.builder.alu_same(AluOp::FSign, &[y]);
        self.builder.alu_same(AluOp::FMul, &[tmp, sign])
    }

    pub(super) fn build_atan2(&mut self, y: VarId, x: VarId) -> VarId {
        let ty = self.builder.var_type(y);
        let zero = self.fconst(y, 0.0);
        let abs_x = self.builder.alu_same(AluOp::FAbs, &[x]);
        let abs_y = self.builder.alu_same(AluOp::FAbs, &[y]);
        let tiny = self.scale(abs_y, 1.0e-8);
        let finite = self.builder.compare(AluOp::FGe, abs_x, tiny);

        let ratio = self.builder.alu_same(AluOp::FDiv, &[y, x]);
        let atan = self.build_atan(ratio);
        let upper = self.builder.compare(AluOp::FGe, y, zero);
        let pi = self.fconst(y, PI);
        let neg_pi = self.fconst(y, -PI);
        let shift = self.builder.alu(AluOp::BCsel, ty, &[upper, pi, neg_pi]);
        let shifted = self.builder.alu_same(AluOp::FAdd, &[atan, shift]);
        let left = self.builder.compare(AluOp::FLt, x, zero);
        let r_then = self.builder.alu(AluOp::BCsel, ty, &[left, shifted, atan]);

        let sign = self.builder.alu_same(AluOp::FSign, &[y]);
        let r_else = self.scale(sign, FRAC_PI_2);
        self.builder.alu(AluOp::BCsel, ty, &[finite, r_then, r_else])
    }

    /// `e^x` and `e^-x`.
    fn exp_pair(&mut self, x: VarId) -> (VarId, VarId) {
        let pos = self.build_exp(x);
        let neg = self.builder.alu_same(AluOp::FNeg, &[x]);
        let neg = self.build_exp(neg);
        (pos, neg)
    }

    pub(super) fn build_sinh(&mut self, x: VarId) -> VarId {
        let (pos, neg) = self.exp_pair(x);
        let d = self.builder.alu_same(AluOp::FSub, &[pos, neg]);
        self.scale(d, 0.5)
    }

    pub(super) fn build_cosh(&mut self, x: VarId) -> VarId {
        let (pos, neg) = self.exp_pair(x);
        let s = self.builder.alu_same(AluOp::FAdd, &[pos, neg]);
        self.scale(s, 0.5)
    }

    /// `(e^x - e^-x) / (e^x + e^-x)` with `x` clamped to [-10, 10], where
    /// the result is already +-1 and the exponentials would overflow.
    pub(super) fn build_tanh(&mut self, x: VarId) -> VarId {
        let lo = self.fconst(x, -10.0);
        let hi = self.fconst(x, 10.0);
        let x = self.clamp(AluOp::FMax, AluOp::FMin, x, lo, hi);
        let (pos, neg) = self.exp_pair(x);
        let num = self.builder.alu_same(AluOp::FSub, &[pos, neg]);
        let den = self.builder.alu_same(AluOp::FAdd, &[pos, neg]);
        self.builder.alu_same(AluOp::FDiv, &[num, den])
    }

    pub(super) fn build_asinh(&mut self, x: VarId) -> VarId {
        let abs = self.builder.alu_same(AluOp::FAbs, &[x]);
        let one = self.fconst(x, 1.0);
        let sq = self.builder.alu_same(AluOp::FMul, &[x, x]);
        let sq = self.builder.alu_same(AluOp::FAdd, &[sq, one]);
        let root = self.builder.alu_same(AluOp::FSqrt, &[sq]);
        let sum = self.builder.alu_same(AluOp::FAdd, &[abs, root]);
        let log = self.build_log(sum);
        let sign = self.builder.alu_same(AluOp::FSign, &[x]);
        self.builder.alu_same(AluOp::FMul, &[sign, log])
    }

    pub(super) fn build_acosh(&mut self, x: VarId) -> VarId {
        let one = self.fconst(x, 1.0);
        let sq = self.builder.alu_same(AluOp::FMul, &[x, x]);
        let sq = self.builder.alu_same(AluOp::FSub, &[sq, one]);
        let root = self.builder.alu_same(AluOp::FSqrt, &[sq]);
        let sum = self.builder.alu_same(AluOp::FAdd, &[x, root]);
        self.build_log(sum)
    }

    pub(super) fn build_atanh(&mut self, x: VarId) -> VarId {
        let one = self.fconst(x, 1.0);
        let num = self.builder.alu_same(AluOp::FAdd, &[one, x]);
        let den = self.builder.alu_same(AluOp::FSub, &[one, x]);
        let q = self.builder.alu_same(AluOp::FDiv, &[num, den]);
        let log = self.build_log(q);
        self.scale(log, 0.5)
    }

    pub(super) fn build_step(&mut self, edge: VarId, x: VarId) -> VarId {
        let ty = self.builder.var_type(x);
        let ge = self.builder.compare(AluOp::FGe, x, edge);
        self.builder.alu(AluOp::B2F, ty, &[ge])
    }

    /// `t * t * (3 - 2t)` with `t = clamp((x - e0) / (e1 - e0), 0, 1)`.
    pub(super) fn build_smoothstep(&mut self, e0: VarId, e1: VarId, x: VarId) -> VarId {
        let num = self.builder.alu_same(AluOp::FSub, &[x, e0]);
        let den = self.builder.alu_same(AluOp::FSub, &[e1, e0]);
        let t = self.builder.alu_same(AluOp::FDiv, &[num, den]);
        let zero = self.fconst(t, 0.0);
        let one = self.fconst(t, 1.0);
        let t = self.clamp(AluOp::FMax, AluOp::FMin, t, zero, one);
        let three = self.fconst(t, 3.0);
        let two_t = self.scale(t, 2.0);
        let poly = self.builder.alu_same(AluOp::FSub, &[three, two_t]);
        let t2 = self.builder.alu_same(AluOp::FMul, &[t, t]);
        self.builder.alu_same(AluOp::FMul, &[t2, poly])
    }

    pub(super) fn build_length(&mut self, x: VarId) -> VarId {
        if self.builder.var_type(x).components == 1 {
            return self.builder.alu_same(AluOp::FAbs, &[x]);
        }
        let d = self.dot(x, x);
        self.builder.alu_same(AluOp::FSqrt, &[d])
    }

    pub(super) fn build_normalize(&mut self, x: VarId) -> VarId {
        let n = self.builder.var_type(x).components;
        if n == 1 {
            return self.builder.alu_same(AluOp::FSign, &[x]);
        }
        let d = self.dot(x, x);
        let rsq = self.builder.alu_same(AluOp::FRsq, &[d]);
        let rsq = self.builder.broadcast(rsq, n);
        self.builder.alu_same(AluOp::FMul, &[x, rsq])
    }

    /// `a.yzx * b.zxy - a.zxy * b.yzx`
    pub(super) fn build_cross(&mut self, a: VarId, b: VarId) -> VarId {
        let a_yzx = self.builder.swizzle(a, &[1, 2, 0]);
        let b_zxy = self.builder.swizzle(b, &[2, 0, 1]);
        let a_zxy = self.builder.swizzle(a, &[2, 0, 1]);
        let b_yzx = self.builder.swizzle(b, &[1, 2, 0]);
        let l = self.builder.alu_same(AluOp::FMul, &[a_yzx, b_zxy]);
        let r = self.builder.alu_same(AluOp::FMul, &[a_zxy, b_yzx]);
        self.builder.alu_same(AluOp::FSub, &[l, r])
    }

    /// `k = 1 - eta^2 (1 - dot(n, i)^2)`; zero if `k < 0`, otherwise
    /// `eta * i - (eta * dot(n, i) + sqrt(k)) * n`.
    fn build_refract(&mut self, i: VarId, n: VarId, eta: VarId) -> VarId {
        let ty = self.builder.var_type(i);
        let width = ty.components;
        let d = self.dot(n, i);
        let eta_s = if self.builder.var_type(eta).bit_size == ty.bit_size {
            eta
        } else {
            self.builder.alu(AluOp::F2F, ty.scalar_type(), &[eta])
        };
        let one = self.fconst(d, 1.0);
        let d2 = self.builder.alu_same(AluOp::FMul, &[d, d]);
        let t = self.builder.alu_same(AluOp::FSub, &[one, d2]);
        let eta2 = self.builder.alu_same(AluOp::FMul, &[eta_s, eta_s]);
        let t = self.builder.alu_same(AluOp::FMul, &[eta2, t]);
        let k = self.builder.alu_same(AluOp::FSub, &[one, t]);

        let eta_v = self.builder.broadcast(eta_s, width);
        let scaled_i = self.builder.alu_same(AluOp::FMul, &[eta_v, i]);
        let root = self.builder.alu_same(AluOp::FSqrt, &[k]);
        let eta_d = self.builder.alu_same(AluOp::FMul, &[eta_s, d]);
        let coeff = self.builder.alu_same(AluOp::FAdd, &[eta_d, root]);
        let coeff = self.builder.broadcast(coeff, width);
        let scaled_n = self.builder.alu_same(AluOp::FMul, &[coeff, n]);
        let refracted = self.builder.alu_same(AluOp::FSub, &[scaled_i, scaled_n]);

        let zero_k = self.fconst(k, 0.0);
        let total = self.builder.compare(AluOp::FLt, k, zero_k);
        let zero = self.fconst(i, 0.0);
        self.builder.alu(AluOp::BCsel, ty, &[total, zero, refracted])
    }
}
