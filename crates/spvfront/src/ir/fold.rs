//! Constant evaluator for ALU operations.
//!
//! Used to fold `OpSpecConstantOp` once specialization values are known.
//! Operands are evaluated component-wise; single-component operands are
//! broadcast against wider ones.

use super::types::*;
use anyhow::{bail, Result};

/// Evaluate `op` on constant operands, producing a value of type `dest`.
pub fn eval_alu(op: AluOp, dest: IrType, srcs: &[&ConstValue]) -> Result<ConstValue> {
    if srcs.is_empty() {
        bail!("cannot fold {op:?} without operands");
    }
    let bits = match op {
        AluOp::Vec => srcs.iter().flat_map(|s| s.bits.iter().copied()).collect(),
        AluOp::BAny => vec![u64::from(srcs[0].bits.iter().any(|&b| b != 0))],
        AluOp::BAll => vec![u64::from(srcs[0].bits.iter().all(|&b| b != 0))],
        AluOp::Bitcast => bitcast(srcs[0], dest)?,
        _ => {
            let mut bits = Vec::with_capacity(usize::from(dest.components));
            for i in 0..usize::from(dest.components) {
                let args: Vec<Scalar> = srcs
                    .iter()
                    .map(|s| Scalar {
                        ty: s.ty,
                        bits: if s.bits.len() == 1 { s.bits[0] } else { s.bits[i] },
                    })
                    .collect();
                bits.push(eval_scalar(op, dest, &args)?);
            }
            bits
        }
    };
    Ok(ConstValue::new(dest, bits))
}

#[derive(Debug, Clone, Copy)]
struct Scalar {
    ty: IrType,
    bits: u64,
}

impl Scalar {
    fn u(self) -> u64 {
        self.bits & bit_mask(self.ty.bit_size)
    }

    fn i(self) -> i64 {
        sign_extend(self.bits, self.ty.bit_size)
    }

    fn f(self) -> f64 {
        bits_to_float(self.bits, self.ty.bit_size)
    }

    fn b(self) -> bool {
        self.bits != 0
    }
}

fn arg(args: &[Scalar], i: usize) -> Result<Scalar> {
    match args.get(i) {
        Some(a) => Ok(*a),
        None => bail!("constant expression is missing operand {i}"),
    }
}

// ── Scalar evaluation ────────────────────────────────────────────────────────

fn eval_scalar(op: AluOp, dest: IrType, args: &[Scalar]) -> Result<u64> {
    let a = arg(args, 0)?;
    let bits = u32::from(a.ty.bit_size.max(1));
    let float = |v: f64| float_to_bits(v, dest.bit_size);
    let boolean = |v: bool| u64::from(v);

    let result = match op {
        AluOp::Mov => a.bits,

        // ── Float arithmetic ────────────────────────────────────────────
        AluOp::FNeg => float(-a.f()),
        AluOp::FAbs => float(a.f().abs()),
        AluOp::FSign => float(if a.f() > 0.0 {
            1.0
        } else if a.f() < 0.0 {
            -1.0
        } else {
            0.0
        }),
        AluOp::FFloor => float(a.f().floor()),
        AluOp::FCeil => float(a.f().ceil()),
        AluOp::FTrunc => float(a.f().trunc()),
        AluOp::FFract => float(a.f() - a.f().floor()),
        AluOp::FRoundEven => float(a.f().round_ties_even()),
        AluOp::FSqrt => float(a.f().sqrt()),
        AluOp::FRsq => float(1.0 / a.f().sqrt()),
        AluOp::FRcp => float(1.0 / a.f()),
        AluOp::FExp2 => float(a.f().exp2()),
        AluOp::FLog2 => float(a.f().log2()),
        AluOp::FSin => float(a.f().sin()),
        AluOp::FCos => float(a.f().cos()),
        AluOp::FQuantize2F16 => float(f64::from(half_to_f32(f32_to_half(a.f() as f32)))),
        AluOp::FPow => float(a.f().powf(arg(args, 1)?.f())),
        AluOp::FAdd => float(a.f() + arg(args, 1)?.f()),
        AluOp::FSub => float(a.f() - arg(args, 1)?.f()),
        AluOp::FMul => float(a.f() * arg(args, 1)?.f()),
        AluOp::FDiv => float(a.f() / arg(args, 1)?.f()),
        // Sign follows the dividend.
        AluOp::FRem => float(a.f() % arg(args, 1)?.f()),
        // Sign follows the divisor.
        AluOp::FMod => {
            let b = arg(args, 1)?.f();
            float(a.f() - b * (a.f() / b).floor())
        }
        AluOp::FMin => float(a.f().min(arg(args, 1)?.f())),
        AluOp::FMax => float(a.f().max(arg(args, 1)?.f())),
        AluOp::FCopysign => float(a.f().copysign(arg(args, 1)?.f())),
        AluOp::FLdexp => float(a.f() * 2f64.powi(arg(args, 1)?.i() as i32)),
        AluOp::FFma => float(a.f().mul_add(arg(args, 1)?.f(), arg(args, 2)?.f())),
        AluOp::FLrp => {
            let (b, t) = (arg(args, 1)?.f(), arg(args, 2)?.f());
            float(a.f() * (1.0 - t) + b * t)
        }

        // ── Integer arithmetic ──────────────────────────────────────────
        AluOp::INeg => a.i().wrapping_neg() as u64,
        AluOp::IAbs => a.i().wrapping_abs() as u64,
        AluOp::ISign => a.i().signum() as u64,
        AluOp::IAdd => a.u().wrapping_add(arg(args, 1)?.u()),
        AluOp::ISub => a.u().wrapping_sub(arg(args, 1)?.u()),
        AluOp::IMul => a.u().wrapping_mul(arg(args, 1)?.u()),
        AluOp::IDiv => {
            let b = arg(args, 1)?.i();
            if b == 0 {
                bail!("division by zero in constant expression");
            }
            a.i().wrapping_div(b) as u64
        }
        AluOp::UDiv => {
            let b = arg(args, 1)?.u();
            if b == 0 {
                bail!("division by zero in constant expression");
            }
            a.u() / b
        }
        AluOp::IRem | AluOp::IMod => {
            let b = arg(args, 1)?.i();
            if b == 0 {
                bail!("division by zero in constant expression");
            }
            let rem = a.i().wrapping_rem(b);
            if op == AluOp::IMod && rem != 0 && (rem < 0) != (b < 0) {
                (rem + b) as u64
            } else {
                rem as u64
            }
        }
        AluOp::UMod => {
            let b = arg(args, 1)?.u();
            if b == 0 {
                bail!("division by zero in constant expression");
            }
            a.u() % b
        }
        AluOp::IMin => a.i().min(arg(args, 1)?.i()) as u64,
        AluOp::IMax => a.i().max(arg(args, 1)?.i()) as u64,
        AluOp::UMin => a.u().min(arg(args, 1)?.u()),
        AluOp::UMax => a.u().max(arg(args, 1)?.u()),
        AluOp::UMulHigh => ((u128::from(a.u()) * u128::from(arg(args, 1)?.u())) >> bits) as u64,
        AluOp::IMulHigh => ((i128::from(a.i()) * i128::from(arg(args, 1)?.i())) >> bits) as u64,
        AluOp::UAddCarry => {
            let sum = u128::from(a.u()) + u128::from(arg(args, 1)?.u());
            u64::from(sum >> bits != 0)
        }
        AluOp::USubBorrow => u64::from(a.u() < arg(args, 1)?.u()),

        // ── Bitwise ─────────────────────────────────────────────────────
        AluOp::IAnd => a.u() & arg(args, 1)?.u(),
        AluOp::IOr => a.u() | arg(args, 1)?.u(),
        AluOp::IXor => a.u() ^ arg(args, 1)?.u(),
        AluOp::INot => !a.u(),
        AluOp::IShl => a.u().wrapping_shl(arg(args, 1)?.u() as u32 % bits),
        AluOp::IShr => a.i().wrapping_shr(arg(args, 1)?.u() as u32 % bits) as u64,
        AluOp::UShr => a.u().wrapping_shr(arg(args, 1)?.u() as u32 % bits),
        AluOp::BitCount => u64::from(a.u().count_ones()),
        AluOp::BitfieldReverse => a.u().reverse_bits() >> (64 - bits),
        AluOp::FindLsb => {
            if a.u() == 0 {
                u64::MAX
            } else {
                u64::from(a.u().trailing_zeros())
            }
        }
        AluOp::UFindMsb => find_msb(a.u()),
        AluOp::IFindMsb => {
            let v = if a.i() < 0 { !a.u() & bit_mask(a.ty.bit_size) } else { a.u() };
            find_msb(v)
        }
        AluOp::BitfieldInsert => {
            let (insert, offset, count) = (arg(args, 1)?.u(), arg(args, 2)?.u(), arg(args, 3)?.u());
            let mask = bit_mask(count as u8).wrapping_shl(offset as u32);
            (a.u() & !mask) | (insert.wrapping_shl(offset as u32) & mask)
        }
        AluOp::UBitfieldExtract => {
            let (offset, count) = (arg(args, 1)?.u(), arg(args, 2)?.u());
            a.u().wrapping_shr(offset as u32) & bit_mask(count as u8)
        }
        AluOp::IBitfieldExtract => {
            let (offset, count) = (arg(args, 1)?.u(), arg(args, 2)?.u());
            if count == 0 {
                0
            } else {
                let field = a.u().wrapping_shr(offset as u32) & bit_mask(count as u8);
                sign_extend(field, count as u8) as u64
            }
        }

        // ── Comparisons ─────────────────────────────────────────────────
        AluOp::FEq => boolean(a.f() == arg(args, 1)?.f()),
        AluOp::FNe => boolean(a.f() != arg(args, 1)?.f()),
        AluOp::FLt => boolean(a.f() < arg(args, 1)?.f()),
        AluOp::FGe => boolean(a.f() >= arg(args, 1)?.f()),
        AluOp::IEq => boolean(a.u() == arg(args, 1)?.u()),
        AluOp::INe => boolean(a.u() != arg(args, 1)?.u()),
        AluOp::ILt => boolean(a.i() < arg(args, 1)?.i()),
        AluOp::IGe => boolean(a.i() >= arg(args, 1)?.i()),
        AluOp::ULt => boolean(a.u() < arg(args, 1)?.u()),
        AluOp::UGe => boolean(a.u() >= arg(args, 1)?.u()),
        AluOp::BCsel => {
            if a.b() {
                arg(args, 1)?.bits
            } else {
                arg(args, 2)?.bits
            }
        }

        // ── Conversions ─────────────────────────────────────────────────
        AluOp::F2F => float(a.f()),
        AluOp::F2I => a.f() as i64 as u64,
        AluOp::F2U => a.f() as u64,
        AluOp::I2F => float(a.i() as f64),
        AluOp::U2F => float(a.u() as f64),
        AluOp::I2I => a.i() as u64,
        AluOp::U2U => a.u(),
        AluOp::B2F => float(if a.b() { 1.0 } else { 0.0 }),
        AluOp::B2I => u64::from(a.b()),

        _ => bail!("{op:?} cannot be evaluated on constants"),
    };
    Ok(result & bit_mask(dest.bit_size))
}

fn find_msb(v: u64) -> u64 {
    if v == 0 {
        u64::MAX
    } else {
        u64::from(63 - v.leading_zeros())
    }
}

/// Reinterpret the bits of `src` as `dest`, splitting or joining components
/// when the component sizes differ.
fn bitcast(src: &ConstValue, dest: IrType) -> Result<Vec<u64>> {
    let src_bits = u32::from(src.ty.bit_size);
    let dst_bits = u32::from(dest.bit_size);
    let total_src = src_bits * src.bits.len() as u32;
    let total_dst = dst_bits * u32::from(dest.components);
    if total_src != total_dst {
        bail!("bitcast from {} to {} changes the total size", src.ty, dest);
    }
    if src_bits == dst_bits {
        return Ok(src.bits.clone());
    }
    // Component 0 holds the low bits.
    let mut out = Vec::new();
    if src_bits < dst_bits {
        let per = (dst_bits / src_bits) as usize;
        for chunk in src.bits.chunks(per) {
            let joined = chunk
                .iter()
                .enumerate()
                .fold(0u64, |acc, (k, b)| acc | (b << (k as u32 * src_bits)));
            out.push(joined);
        }
    } else {
        let per = src_bits / dst_bits;
        for b in &src.bits {
            for k in 0..per {
                out.push((b >> (k * dst_bits)) & bit_mask(dest.bit_size));
            }
        }
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────
