//! Composite values: construction, extraction, insertion and shuffles.
//!
//! Composites other than vectors never exist as single IR values; they are
//! trees of [`SsaValue`]s, so extract and insert on them only rebuild the
//! tree. Vector components go through swizzles, and dynamic component
//! indices become a select chain over every component.

use super::pointers::Link;
use super::values::{SpvId, SsaValue, Value};
use super::Translator;
use crate::ir::{AluOp, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use std::rc::Rc;

/// Marks an undefined component in `OpVectorShuffle`.
const SHUFFLE_UNDEF: u32 = 0xffff_ffff;

impl Translator<'_> {
    pub(super) fn handle_composite(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);

        let value = match op {
            Op::VectorExtractDynamic => {
                let vec = self.ssa_def(SpvId(inst.word(3)?))?;
                let index = self.ssa_def(SpvId(inst.word(4)?))?;
                let var = self.vector_extract(vec, Link::Dynamic(index))?;
                SsaValue::leaf(ty, var)
            }
            Op::VectorInsertDynamic => {
                let vec = self.ssa_def(SpvId(inst.word(3)?))?;
                let component = self.ssa_def(SpvId(inst.word(4)?))?;
                let index = self.ssa_def(SpvId(inst.word(5)?))?;
                let var = self.vector_insert(vec, component, Link::Dynamic(index))?;
                SsaValue::leaf(ty, var)
            }
            Op::VectorShuffle => {
                let a = self.ssa_def(SpvId(inst.word(3)?))?;
                let b = self.ssa_def(SpvId(inst.word(4)?))?;
                let var = self.vector_shuffle(a, b, inst.words_from(5))?;
                SsaValue::leaf(ty, var)
            }
            Op::CompositeConstruct => {
                let parts = inst.words_from(3);
                if ty.is_vector_or_scalar() {
                    let mut scalars = Vec::new();
                    for &part in parts {
                        let var = self.ssa_def(SpvId(part))?;
                        let n = self.builder.var_type(var).components;
                        if n == 1 {
                            scalars.push(var);
                        } else {
                            for c in 0..n {
                                scalars.push(self.builder.channel(var, c));
                            }
                        }
                    }
                    if scalars.len() != usize::from(ty.ir_type()?.components) {
                        bail!("{} constituents cannot build a {}", scalars.len(), ty.describe());
                    }
                    SsaValue::leaf(ty, self.builder.vec(&scalars))
                } else {
                    if parts.len() != ty.length() as usize {
                        bail!("{} constituents cannot build a {}", parts.len(), ty.describe());
                    }
                    let mut elems = Vec::with_capacity(parts.len());
                    for &part in parts {
                        elems.push(self.ssa_value(SpvId(part))?);
                    }
                    SsaValue::composite(ty, elems)
                }
            }
            Op::CompositeExtract => {
                let base = self.ssa_value(SpvId(inst.word(3)?))?;
                self.composite_extract(&base, inst.words_from(4))?
            }
            Op::CompositeInsert => {
                let object = self.ssa_value(SpvId(inst.word(3)?))?;
                let base = self.ssa_value(SpvId(inst.word(4)?))?;
                self.composite_insert(&base, object, inst.words_from(5))?
            }
            Op::CopyObject => {
                let src = SpvId(inst.word(3)?);
                match self.values.get_untyped(src)?.clone() {
                    // Handles and pointers are copied as themselves.
                    v @ (Value::Pointer(_) | Value::SampledImage(_) | Value::ImagePointer(_)) => {
                        return self.values.define(id, v);
                    }
                    _ => self.ssa_value(src)?,
                }
            }
            _ => bail!("{op:?} is not a composite instruction"),
        };
        self.define_ssa(id, value)
    }

    // ── Vectors ──────────────────────────────────────────────────────────

    /// Component `link` of `vec`.
    pub(super) fn vector_extract(&mut self, vec: VarId, link: Link) -> Result<VarId> {
        let n = self.builder.var_type(vec).components;
        match link {
            Link::Literal(i) => {
                if i < 0 || i >= i64::from(n) {
                    bail!("component {i} is out of bounds for a {n}-component vector");
                }
                Ok(self.builder.channel(vec, i as u8))
            }
            Link::Dynamic(index) => {
                let mut dest = self.builder.channel(vec, 0);
                let component_ty = self.builder.var_type(dest);
                let index_ty = self.builder.var_type(index);
                for c in 1..n {
                    let imm = self.imm_for(index_ty, i64::from(c));
                    let is_c = self.builder.compare(AluOp::IEq, index, imm);
                    let value = self.builder.channel(vec, c);
                    dest = self.builder.alu(AluOp::BCsel, component_ty, &[is_c, value, dest]);
                }
                Ok(dest)
            }
        }
    }

    /// `vec` with component `link` replaced by `value`.
    pub(super) fn vector_insert(&mut self, vec: VarId, value: VarId, link: Link) -> Result<VarId> {
        let vec_ty = self.builder.var_type(vec);
        let n = vec_ty.components;
        match link {
            Link::Literal(i) => {
                if i < 0 || i >= i64::from(n) {
                    bail!("component {i} is out of bounds for a {n}-component vector");
                }
                if n == 1 {
                    return Ok(value);
                }
                let mut scalars = Vec::with_capacity(usize::from(n));
                for c in 0..n {
                    if i64::from(c) == i {
                        scalars.push(value);
                    } else {
                        scalars.push(self.builder.channel(vec, c));
                    }
                }
                Ok(self.builder.vec(&scalars))
            }
            Link::Dynamic(index) => {
                let index_ty = self.builder.var_type(index);
                let mut dest = self.vector_insert(vec, value, Link::Literal(0))?;
                for c in 1..n {
                    let imm = self.imm_for(index_ty, i64::from(c));
                    let is_c = self.builder.compare(AluOp::IEq, index, imm);
                    let inserted = self.vector_insert(vec, value, Link::Literal(i64::from(c)))?;
                    dest = self.builder.alu(AluOp::BCsel, vec_ty, &[is_c, inserted, dest]);
                }
                Ok(dest)
            }
        }
    }

    fn vector_shuffle(&mut self, a: VarId, b: VarId, selectors: &[u32]) -> Result<VarId> {
        let a_len = u32::from(self.builder.var_type(a).components);
        let b_len = u32::from(self.builder.var_type(b).components);
        let scalar: IrType = self.builder.var_type(a).scalar_type();

        // A shuffle of one operand is a swizzle.
        if selectors.iter().all(|&s| s < a_len) {
            let comps: Vec<u8> = selectors.iter().map(|&s| s as u8).collect();
            return Ok(self.builder.swizzle(a, &comps));
        }
        if selectors.iter().all(|&s| s != SHUFFLE_UNDEF && s >= a_len && s < a_len + b_len) {
            let comps: Vec<u8> = selectors.iter().map(|&s| (s - a_len) as u8).collect();
            return Ok(self.builder.swizzle(b, &comps));
        }

        let mut scalars = Vec::with_capacity(selectors.len());
        for &s in selectors {
            let var = if s == SHUFFLE_UNDEF {
                self.builder.undef(scalar)
            } else if s < a_len {
                self.builder.channel(a, s as u8)
            } else if s < a_len + b_len {
                self.builder.channel(b, (s - a_len) as u8)
            } else {
                bail!("shuffle selector {s} is out of bounds");
            };
            scalars.push(var);
        }
        Ok(self.builder.vec(&scalars))
    }

    // ── Trees ────────────────────────────────────────────────────────────

    fn composite_extract(&mut self, base: &Rc<SsaValue>, indices: &[u32]) -> Result<Rc<SsaValue>> {
        let mut cur = base.clone();
        for (n, &index) in indices.iter().enumerate() {
            if cur.ty.is_vector_or_scalar() {
                if n + 1 != indices.len() {
                    bail!("extract indexes past a vector component");
                }
                let component = cur.ty.child(index)?;
                let var = self.vector_extract(cur.def()?, Link::Literal(i64::from(index)))?;
                return Ok(SsaValue::leaf(component, var));
            }
            cur = cur.elem(index)?;
        }
        Ok(cur)
    }

    fn composite_insert(&mut self, base: &Rc<SsaValue>, object: Rc<SsaValue>, indices: &[u32]) -> Result<Rc<SsaValue>> {
        let Some((&index, rest)) = indices.split_first() else {
            return Ok(object);
        };
        if base.ty.is_vector_or_scalar() {
            if !rest.is_empty() {
                bail!("insert indexes past a vector component");
            }
            let var = self.vector_insert(base.def()?, object.def()?, Link::Literal(i64::from(index)))?;
            return Ok(SsaValue::leaf(base.ty.clone(), var));
        }
        let mut elems = base.elems()?.to_vec();
        let slot = elems
            .get_mut(index as usize)
            .with_context(|| format!("insert index {index} is out of bounds"))?;
        *slot = self.composite_insert(&slot.clone(), object, rest)?;
        Ok(SsaValue::composite(base.ty.clone(), elems))
    }
}
