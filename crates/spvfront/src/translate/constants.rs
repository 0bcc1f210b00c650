//! Constants, specialization and constant materialization.

use super::alu::alu_op_for_opcode;
use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, SsaValue, Value};
use super::Translator;
use crate::ir::{fold, ConstValue, IrConstant, IrType};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::{BuiltIn, Decoration, Op};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Components of a scalar or vector, one bit pattern each.
    Scalar(Vec<u64>),
    /// Matrix columns, array elements or struct members.
    Composite(Vec<Rc<Constant>>),
    Undef,
}

#[derive(Debug, Clone)]
pub struct ConstantValue {
    pub ty: Rc<SpirvType>,
    pub value: Rc<Constant>,
    pub is_null: bool,
}

impl ConstantValue {
    /// First component of a scalar constant, zero-extended.
    pub fn scalar_u64(&self) -> Result<u64> {
        match &*self.value {
            Constant::Scalar(bits) if !bits.is_empty() => Ok(bits[0]),
            Constant::Undef => Ok(0),
            _ => bail!("expected a scalar constant, found a {}", self.ty.describe()),
        }
    }

    /// First component sign-extended according to the type.
    pub fn scalar_i64(&self) -> Result<i64> {
        let bits = self.scalar_u64()?;
        let ir = self.ty.ir_type()?;
        Ok(ConstValue::new(ir.scalar_type(), vec![bits]).as_i64(0))
    }
}

/// Largest composite an instruction word count can describe.
const MAX_COMPOSITE_ELEMENTS: u32 = 0xffff;

/// Zero value of `ty`.
pub fn null_constant(ty: &SpirvType) -> Result<Constant> {
    Ok(match &ty.kind {
        TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } => Constant::Scalar(vec![0]),
        TypeKind::Vector { count, .. } => Constant::Scalar(vec![0; usize::from(*count)]),
        TypeKind::Matrix { column, columns, .. } => {
            let col = Rc::new(null_constant(column)?);
            Constant::Composite(vec![col; usize::from(*columns)])
        }
        TypeKind::Array { element, length, .. } => {
            if *length > MAX_COMPOSITE_ELEMENTS {
                bail!("null constant of {} has too many elements", ty.describe());
            }
            let elem = Rc::new(null_constant(element)?);
            Constant::Composite(vec![elem; *length as usize])
        }
        TypeKind::Struct(members) => Constant::Composite(
            members
                .iter()
                .map(|m| null_constant(&m.ty).map(Rc::new))
                .collect::<Result<_>>()?,
        ),
        _ => bail!("no null value for {}", ty.describe()),
    })
}

/// Walk `indices` into a constant tree. The last index may select a single
/// vector component.
pub fn extract_constant(c: &Rc<Constant>, indices: &[u32]) -> Result<Rc<Constant>> {
    let Some((&first, rest)) = indices.split_first() else {
        return Ok(c.clone());
    };
    match &**c {
        Constant::Composite(children) => match children.get(first as usize) {
            Some(child) => extract_constant(child, rest),
            None => bail!("constant index {first} out of bounds"),
        },
        Constant::Scalar(bits) => {
            if !rest.is_empty() {
                bail!("constant extract goes past a vector component");
            }
            match bits.get(first as usize) {
                Some(b) => Ok(Rc::new(Constant::Scalar(vec![*b]))),
                None => bail!("constant component {first} out of bounds"),
            }
        }
        Constant::Undef => Ok(c.clone()),
    }
}

/// Replace the element of `c` at `indices` with `value`.
pub fn insert_constant(c: &Rc<Constant>, value: &Rc<Constant>, indices: &[u32]) -> Result<Rc<Constant>> {
    let Some((&first, rest)) = indices.split_first() else {
        return Ok(value.clone());
    };
    match &**c {
        Constant::Composite(children) => {
            let mut children = children.clone();
            let Some(child) = children.get_mut(first as usize) else {
                bail!("constant index {first} out of bounds");
            };
            *child = insert_constant(child, value, rest)?;
            Ok(Rc::new(Constant::Composite(children)))
        }
        Constant::Scalar(bits) => {
            let Constant::Scalar(v) = &**value else {
                bail!("inserting a composite into a vector component");
            };
            let mut bits = bits.clone();
            match (bits.get_mut(first as usize), v.first()) {
                (Some(slot), Some(new)) if rest.is_empty() => *slot = *new,
                _ => bail!("constant component {first} out of bounds"),
            }
            Ok(Rc::new(Constant::Scalar(bits)))
        }
        Constant::Undef => bail!("cannot insert into an undefined constant"),
    }
}

pub(super) fn flat_components(c: &Constant, len: usize) -> Vec<u64> {
    match c {
        Constant::Scalar(bits) => bits.clone(),
        _ => vec![0; len],
    }
}

// ── Constant instructions ────────────────────────────────────────────────────

impl Translator<'_> {
    fn spec_override(&self, id: SpvId) -> Option<u64> {
        let spec_id = self.decorations.find(id, Decoration::SpecId)?.literals.first().copied()?;
        self.specs.iter().find(|s| s.id == spec_id).map(|s| s.value)
    }

    pub(super) fn handle_constant(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let op = inst.op().context("unknown opcode")?;
        let ty = self.values.type_(SpvId(inst.word(1)?))?;
        let id = SpvId(inst.word(2)?);
        let mut is_null = false;

        let value = match op {
            Op::ConstantTrue | Op::ConstantFalse | Op::SpecConstantTrue | Op::SpecConstantFalse => {
                if !matches!(ty.kind, TypeKind::Bool) {
                    bail!("boolean constant of type {}", ty.describe());
                }
                let mut value = matches!(op, Op::ConstantTrue | Op::SpecConstantTrue);
                if matches!(op, Op::SpecConstantTrue | Op::SpecConstantFalse) {
                    if let Some(v) = self.spec_override(id) {
                        value = v != 0;
                    }
                }
                Constant::Scalar(vec![u64::from(value)])
            }
            Op::Constant | Op::SpecConstant => {
                let bits = match &ty.kind {
                    TypeKind::Int { bits, .. } | TypeKind::Float { bits } => *bits,
                    _ => bail!("literal constant of type {}", ty.describe()),
                };
                let mut value = if bits > 32 {
                    u64::from(inst.word(3)?) | (u64::from(inst.word(4)?) << 32)
                } else {
                    u64::from(inst.word(3)?)
                };
                if op == Op::SpecConstant {
                    if let Some(v) = self.spec_override(id) {
                        value = v;
                    }
                }
                Constant::Scalar(vec![value & crate::ir::bit_mask(bits)])
            }
            Op::ConstantComposite | Op::SpecConstantComposite => {
                let mut elems = Vec::new();
                for &w in inst.words_from(3) {
                    elems.push(self.values.constant(SpvId(w))?.value.clone());
                }
                match &ty.kind {
                    TypeKind::Vector { count, .. } => {
                        let mut bits = Vec::with_capacity(usize::from(*count));
                        for e in &elems {
                            bits.extend(flat_components(e, 1));
                        }
                        if bits.len() != usize::from(*count) {
                            bail!("vector constant has {} components, type wants {count}", bits.len());
                        }
                        Constant::Scalar(bits)
                    }
                    TypeKind::Matrix { .. } | TypeKind::Array { .. } | TypeKind::Struct(_) => {
                        if elems.len() != ty.length() as usize {
                            bail!("composite constant has {} elements, type wants {}", elems.len(), ty.length());
                        }
                        Constant::Composite(elems)
                    }
                    _ => bail!("composite constant of type {}", ty.describe()),
                }
            }
            Op::ConstantNull => {
                is_null = true;
                null_constant(&ty)?
            }
            Op::Undef => Constant::Undef,
            Op::SpecConstantOp => self.spec_constant_op(&ty, inst)?,
            Op::ConstantSampler => bail!("OpConstantSampler is a kernel feature and is not supported"),
            _ => bail!("unhandled constant instruction {}", inst.name()),
        };

        if let Some(builtin) = self.decorations.find(id, Decoration::BuiltIn) {
            if BuiltIn::from_u32(builtin.literal(0)?) == Some(BuiltIn::WorkgroupSize) {
                if !matches!(&ty.kind, TypeKind::Vector { count: 3, .. }) {
                    bail!("WorkgroupSize constant must be a 3-component vector");
                }
                self.workgroup_size_builtin = Some(id);
            }
        }

        self.values.define(
            id,
            Value::Constant(Rc::new(ConstantValue {
                ty,
                value: Rc::new(value),
                is_null,
            })),
        )
    }

    fn spec_constant_op(&mut self, ty: &Rc<SpirvType>, inst: &Instruction<'_>) -> Result<Constant> {
        let raw = inst.word(3)?;
        let opcode = Op::from_u32(raw).with_context(|| format!("unknown opcode {raw} in OpSpecConstantOp"))?;
        let operands = inst.words_from(4);
        let operand = |i: usize| -> Result<SpvId> {
            operands
                .get(i)
                .map(|&w| SpvId(w))
                .with_context(|| format!("OpSpecConstantOp {opcode:?} is missing operand {i}"))
        };

        match opcode {
            Op::VectorShuffle => {
                let a = self.values.constant(operand(0)?)?;
                let b = self.values.constant(operand(1)?)?;
                let mut all = flat_components(&a.value, a.ty.length() as usize);
                all.extend(flat_components(&b.value, b.ty.length() as usize));
                let mut out = Vec::new();
                for &index in operands.get(2..).unwrap_or(&[]) {
                    if index == u32::MAX {
                        out.push(0);
                    } else {
                        match all.get(index as usize) {
                            Some(v) => out.push(*v),
                            None => bail!("shuffle index {index} out of bounds"),
                        }
                    }
                }
                Ok(Constant::Scalar(out))
            }
            Op::CompositeExtract => {
                let base = self.values.constant(operand(0)?)?;
                let c = extract_constant(&base.value, operands.get(1..).unwrap_or(&[]))?;
                Ok((*c).clone())
            }
            Op::CompositeInsert => {
                let object = self.values.constant(operand(0)?)?;
                let base = self.values.constant(operand(1)?)?;
                let c = insert_constant(&base.value, &object.value, operands.get(2..).unwrap_or(&[]))?;
                Ok((*c).clone())
            }
            _ => {
                let Some((alu, swap)) = alu_op_for_opcode(opcode) else {
                    bail!("unsupported OpSpecConstantOp opcode {opcode:?}");
                };
                let mut srcs = Vec::new();
                for &w in operands {
                    let c = self.values.constant(SpvId(w))?;
                    let ir = c.ty.ir_type()?;
                    let bits = flat_components(&c.value, usize::from(ir.components));
                    srcs.push(ConstValue::new(ir, bits));
                }
                if swap && srcs.len() == 2 {
                    srcs.swap(0, 1);
                }
                let refs: Vec<&ConstValue> = srcs.iter().collect();
                let result = fold::eval_alu(alu, ty.ir_type()?, &refs)
                    .with_context(|| format!("folding OpSpecConstantOp {opcode:?}"))?;
                Ok(Constant::Scalar(result.bits))
            }
        }
    }

    // ── Materialization ──────────────────────────────────────────────────

    /// SSA form of a constant in the current function, built once per
    /// function and reused.
    pub(super) fn constant_ssa(&mut self, id: SpvId, c: &ConstantValue) -> Result<Rc<SsaValue>> {
        if let Some(v) = self.const_cache.get(&id) {
            return Ok(v.clone());
        }
        let v = self.materialize(&c.ty, &c.value)?;
        self.const_cache.insert(id, v.clone());
        Ok(v)
    }

    pub(super) fn materialize(&mut self, ty: &Rc<SpirvType>, c: &Constant) -> Result<Rc<SsaValue>> {
        match c {
            Constant::Undef => self.undef_ssa(ty),
            Constant::Scalar(bits) => {
                let ir = ty.ir_type()?;
                let var = self.builder.constant(ConstValue::new(ir, bits.clone()));
                Ok(SsaValue::leaf(ty.clone(), var))
            }
            Constant::Composite(children) => {
                let mut elems = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    let child_ty = ty.child(i as u32)?;
                    elems.push(self.materialize(&child_ty, child)?);
                }
                Ok(SsaValue::composite(ty.clone(), elems))
            }
        }
    }

    pub(super) fn undef_ssa(&mut self, ty: &Rc<SpirvType>) -> Result<Rc<SsaValue>> {
        if ty.is_vector_or_scalar() {
            let var = self.builder.undef(ty.ir_type()?);
            return Ok(SsaValue::leaf(ty.clone(), var));
        }
        let mut elems = Vec::new();
        for i in 0..ty.length() {
            let child = ty.child(i)?;
            elems.push(self.undef_ssa(&child)?);
        }
        Ok(SsaValue::composite(ty.clone(), elems))
    }

    /// Constant tree for a variable initializer.
    pub(super) fn ir_constant(ty: &SpirvType, c: &Constant) -> Result<IrConstant> {
        Ok(match c {
            Constant::Undef => IrConstant::Undef,
            Constant::Scalar(bits) => IrConstant::Value(ConstValue::new(ty.ir_type()?, bits.clone())),
            Constant::Composite(children) => {
                let mut out = Vec::with_capacity(children.len());
                for (i, child) in children.iter().enumerate() {
                    out.push(Self::ir_constant(&*ty.child(i as u32)?, child)?);
                }
                IrConstant::Composite(out)
            }
        })
    }

    /// Scalar 32-bit integer constant as an IR immediate.
    pub(super) fn imm_for(&mut self, ty: IrType, value: i64) -> crate::ir::VarId {
        self.builder.constant(ConstValue::new(ty, vec![value as u64]))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(v: u64) -> Rc<Constant> {
        Rc::new(Constant::Scalar(vec![v]))
    }

    #[test]
    fn extract_reaches_vector_components() {
        let col0 = Rc::new(Constant::Scalar(vec![1, 2]));
        let col1 = Rc::new(Constant::Scalar(vec![3, 4]));
        let mat = Rc::new(Constant::Composite(vec![col0, col1]));
        assert_eq!(*extract_constant(&mat, &[1, 0]).unwrap(), Constant::Scalar(vec![3]));
        assert!(extract_constant(&mat, &[2]).is_err());
        assert!(extract_constant(&mat, &[0, 0, 0]).is_err());
    }

    #[test]
    fn insert_then_extract_round_trips() {
        let v = Rc::new(Constant::Scalar(vec![1, 2, 3, 4]));
        let s = Rc::new(Constant::Composite(vec![v, scalar(9)]));
        let updated = insert_constant(&s, &scalar(7), &[0, 2]).unwrap();
        assert_eq!(*extract_constant(&updated, &[0, 2]).unwrap(), Constant::Scalar(vec![7]));
        assert_eq!(*extract_constant(&updated, &[0, 1]).unwrap(), Constant::Scalar(vec![2]));
        assert_eq!(*extract_constant(&updated, &[1]).unwrap(), Constant::Scalar(vec![9]));
    }

    #[test]
    fn null_struct_is_recursive() {
        let f = Rc::new(SpirvType::new(SpvId(1), TypeKind::Float { bits: 32 }));
        let v = Rc::new(SpirvType::new(
            SpvId(2),
            TypeKind::Vector {
                component: f.clone(),
                count: 3,
            },
        ));
        let arr = Rc::new(SpirvType::new(
            SpvId(3),
            TypeKind::Array {
                element: f,
                length: 2,
                stride: 4,
            },
        ));
        let s = SpirvType::new(
            SpvId(4),
            TypeKind::Struct(vec![
                super::super::types::StructMember {
                    ty: v,
                    offset: None,
                    name: None,
                    builtin: None,
                },
                super::super::types::StructMember {
                    ty: arr,
                    offset: None,
                    name: None,
                    builtin: None,
                },
            ]),
        );
        let null = null_constant(&s).unwrap();
        let Constant::Composite(members) = null else {
            panic!("composite expected");
        };
        assert_eq!(*members[0], Constant::Scalar(vec![0, 0, 0]));
        assert_eq!(*members[1], Constant::Composite(vec![scalar(0), scalar(0)]));
    }

    #[test]
    fn null_of_huge_array_is_an_error() {
        let f = Rc::new(SpirvType::new(SpvId(1), TypeKind::Float { bits: 32 }));
        let arr = SpirvType::new(
            SpvId(2),
            TypeKind::Array {
                element: f,
                length: u32::MAX,
                stride: 0,
            },
        );
        let err = null_constant(&arr).unwrap_err().to_string();
        assert!(err.contains("too many elements"), "unexpected error: {err}");
    }
}
