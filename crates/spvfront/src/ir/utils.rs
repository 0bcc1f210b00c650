//! Shared helpers for walking IR instructions.

use super::types::*;

// ── Instruction variable traversal ───────────────────────────────────────────

/// Calls `f` with every value read by `instr`.
pub fn for_each_use<F: FnMut(VarId)>(instr: &IrInstr, mut f: F) {
    match instr {
        IrInstr::Const { .. } | IrInstr::Undef { .. } | IrInstr::Marker(_) => {}
        IrInstr::Alu { srcs, .. } | IrInstr::Intrinsic { srcs, .. } => {
            srcs.iter().copied().for_each(f);
        }
        IrInstr::Swizzle { src, .. } => f(*src),
        IrInstr::Deref { kind, .. } => match kind {
            DerefKind::Var(_) => {}
            DerefKind::Struct { parent, .. } | DerefKind::Cast { parent, .. } => f(*parent),
            DerefKind::Array { parent, index } | DerefKind::PtrAsArray { parent, index } => {
                f(*parent);
                f(*index);
            }
        },
        IrInstr::Load { deref, .. } => f(*deref),
        IrInstr::Store { deref, value, .. } => {
            f(*deref);
            f(*value);
        }
        IrInstr::Copy { dest, src } => {
            f(*dest);
            f(*src);
        }
        IrInstr::Tex(tex) => tex.sources.iter().for_each(|(_, v)| f(*v)),
        IrInstr::Call { args, .. } => args.iter().copied().for_each(f),
    }
}

/// Mutable counterpart of [`for_each_use`].
pub fn for_each_use_mut<F: FnMut(&mut VarId)>(instr: &mut IrInstr, mut f: F) {
    match instr {
        IrInstr::Const { .. } | IrInstr::Undef { .. } | IrInstr::Marker(_) => {}
        IrInstr::Alu { srcs, .. } | IrInstr::Intrinsic { srcs, .. } => {
            srcs.iter_mut().for_each(f);
        }
        IrInstr::Swizzle { src, .. } => f(src),
        IrInstr::Deref { kind, .. } => match kind {
            DerefKind::Var(_) => {}
            DerefKind::Struct { parent, .. } | DerefKind::Cast { parent, .. } => f(parent),
            DerefKind::Array { parent, index } | DerefKind::PtrAsArray { parent, index } => {
                f(parent);
                f(index);
            }
        },
        IrInstr::Load { deref, .. } => f(deref),
        IrInstr::Store { deref, value, .. } => {
            f(deref);
            f(value);
        }
        IrInstr::Copy { dest, src } => {
            f(dest);
            f(src);
        }
        IrInstr::Tex(tex) => tex.sources.iter_mut().for_each(|(_, v)| f(v)),
        IrInstr::Call { args, .. } => args.iter_mut().for_each(f),
    }
}

// ── Instruction destination ──────────────────────────────────────────────────

/// Calls `f` with every value defined by `instr`.
pub fn for_each_def<F: FnMut(VarId)>(instr: &IrInstr, mut f: F) {
    match instr {
        IrInstr::Const { dest, .. }
        | IrInstr::Undef { dest, .. }
        | IrInstr::Alu { dest, .. }
        | IrInstr::Swizzle { dest, .. }
        | IrInstr::Deref { dest, .. }
        | IrInstr::Load { dest, .. } => f(*dest),
        IrInstr::Intrinsic { dest, .. } => dest.iter().copied().for_each(f),
        IrInstr::Tex(tex) => f(tex.dest),
        IrInstr::Call { dests, .. } => dests.iter().copied().for_each(f),
        IrInstr::Store { .. } | IrInstr::Copy { .. } | IrInstr::Marker(_) => {}
    }
}

pub fn for_each_use_jump<F: FnMut(VarId)>(jump: &Jump, f: F) {
    if let Jump::Return { values } = jump {
        values.iter().copied().for_each(f);
    }
}

pub fn for_each_use_jump_mut<F: FnMut(&mut VarId)>(jump: &mut Jump, f: F) {
    if let Jump::Return { values } = jump {
        values.iter_mut().for_each(f);
    }
}

// ── Tree traversal ───────────────────────────────────────────────────────────

/// Visit every block of a structured body in program order.
pub fn for_each_block<F: FnMut(&IrBlock)>(body: &[CfNode], f: &mut F) {
    for node in body {
        match node {
            CfNode::Block(block) => f(block),
            CfNode::If(i) => {
                for_each_block(&i.then_body, f);
                for_each_block(&i.else_body, f);
            }
            CfNode::Loop(l) => for_each_block(&l.body, f),
        }
    }
}

/// Count instructions matching `pred` anywhere in a body.
pub fn count_instrs<F: Fn(&IrInstr) -> bool>(body: &[CfNode], pred: F) -> usize {
    let mut n = 0;
    for_each_block(body, &mut |b| {
        n += b.instructions.iter().filter(|i| pred(i)).count();
    });
    n
}

// ── Tests ────────────────────────────────────────────────────────────────────
