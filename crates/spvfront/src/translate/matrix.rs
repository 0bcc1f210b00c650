//! Matrix arithmetic.
//!
//! A matrix is a tree of column vectors. Multiplication treats a vector as
//! a one-column matrix, and the result of `OpTranspose` remembers its source
//! so a later multiply can read the rows it needs as columns of the
//! original instead of rebuilding them.

use super::alu::nth;
use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, SsaNode, SsaValue};
use super::Translator;
use crate::ir::{AluOp, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use std::rc::Rc;

/// A column-major matrix type with `rows` x `columns` elements of `scalar`.
fn matrix_type(scalar: &Rc<SpirvType>, rows: u8, columns: u8) -> Rc<SpirvType> {
    let column = vector_type(scalar, rows);
    Rc::new(SpirvType::new(
        scalar.id,
        TypeKind::Matrix {
            column,
            columns,
            row_major: false,
            stride: 0,
        },
    ))
}

fn vector_type(scalar: &Rc<SpirvType>, count: u8) -> Rc<SpirvType> {
    if count == 1 {
        return scalar.clone();
    }
    Rc::new(SpirvType::new(
        scalar.id,
        TypeKind::Vector {
            component: scalar.clone(),
            count,
        },
    ))
}

/// Scalar type of a vector, matrix or scalar.
fn scalar_of(ty: &Rc<SpirvType>) -> Rc<SpirvType> {
    match &ty.kind {
        TypeKind::Vector { component, .. } => component.clone(),
        TypeKind::Matrix { column, .. } => scalar_of(column),
        _ => ty.clone(),
    }
}

impl Translator<'_> {
    pub(super) fn handle_matrix(&mut self, op: Op, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let mut srcs = Vec::new();
        for &w in inst.words_from(3) {
            srcs.push(self.ssa_value(SpvId(w))?);
        }
        let value = self.matrix_alu(op, &ty, &srcs)?;
        self.define_ssa(id, value)
    }

    /// Any matrix opcode, including the element-wise ones the generic ALU
    /// path forwards here.
    pub(super) fn matrix_alu(&mut self, op: Op, ty: &Rc<SpirvType>, srcs: &[Rc<SsaValue>]) -> Result<Rc<SsaValue>> {
        match op {
            Op::Transpose => self.transpose(&nth(srcs, 0)?),
            Op::MatrixTimesScalar => {
                let (m, s) = (nth(srcs, 0)?, nth(srcs, 1)?.def()?);
                let mut columns = Vec::new();
                for column in m.elems()? {
                    let c = column.def()?;
                    let n = self.builder.var_type(c).components;
                    let s = self.builder.broadcast(s, n);
                    let var = self.builder.alu_same(AluOp::FMul, &[c, s]);
                    columns.push(SsaValue::leaf(column.ty.clone(), var));
                }
                Ok(SsaValue::composite(ty.clone(), columns))
            }
            Op::VectorTimesMatrix => {
                let (v, m) = (nth(srcs, 0)?, nth(srcs, 1)?);
                let mt = self.transpose(&m)?;
                self.matrix_multiply(ty, &mt, &v)
            }
            Op::MatrixTimesVector | Op::MatrixTimesMatrix => self.matrix_multiply(ty, &nth(srcs, 0)?, &nth(srcs, 1)?),
            Op::OuterProduct => {
                let (a, b) = (nth(srcs, 0)?.def()?, nth(srcs, 1)?.def()?);
                let n = self.builder.var_type(b).components;
                let column_ty = ty.child(0)?;
                let mut columns = Vec::with_capacity(usize::from(n));
                for i in 0..n {
                    let bi = self.builder.channel(b, i);
                    let width = self.builder.var_type(a).components;
                    let bi = self.builder.broadcast(bi, width);
                    let var = self.builder.alu_same(AluOp::FMul, &[a, bi]);
                    columns.push(SsaValue::leaf(column_ty.clone(), var));
                }
                Ok(SsaValue::composite(ty.clone(), columns))
            }
            Op::FNegate | Op::FAdd | Op::FSub => {
                let alu = match op {
                    Op::FNegate => AluOp::FNeg,
                    Op::FAdd => AluOp::FAdd,
                    _ => AluOp::FSub,
                };
                let first = nth(srcs, 0)?;
                let mut columns = Vec::new();
                for (i, column) in first.elems()?.iter().enumerate() {
                    let mut operands = vec![column.def()?];
                    for other in &srcs[1..] {
                        operands.push(other.elem(i as u32)?.def()?);
                    }
                    let var = self.builder.alu_same(alu, &operands);
                    columns.push(SsaValue::leaf(column.ty.clone(), var));
                }
                Ok(SsaValue::composite(ty.clone(), columns))
            }
            _ => bail!("{op:?} is not supported on matrices"),
        }
    }

    /// Column vectors of a matrix, or the vector itself as one column.
    fn columns(v: &SsaValue) -> Result<Vec<VarId>> {
        match &v.node {
            SsaNode::Leaf(var) => Ok(vec![*var]),
            SsaNode::Elems(elems) => elems.iter().map(|e| e.def()).collect(),
        }
    }

    pub(super) fn transpose(&mut self, m: &Rc<SsaValue>) -> Result<Rc<SsaValue>> {
        if let Some(original) = &m.transposed {
            return Ok(original.clone());
        }
        let columns = Self::columns(m)?;
        let first = *columns.first().context("transposing a matrix without columns")?;
        let rows = self.builder.var_type(first).components;
        let scalar = scalar_of(&m.ty);
        let ty = matrix_type(&scalar, columns.len() as u8, rows);
        let column_ty = ty.child(0)?;

        let mut out = Vec::with_capacity(usize::from(rows));
        for r in 0..rows {
            let mut row = Vec::with_capacity(columns.len());
            for &c in &columns {
                row.push(self.builder.channel(c, r));
            }
            let var = self.builder.vec(&row);
            out.push(SsaValue::leaf(column_ty.clone(), var));
        }
        Ok(Rc::new(SsaValue {
            ty,
            node: SsaNode::Elems(out),
            transposed: Some(m.clone()),
        }))
    }

    /// `src0 * src1`, where either side may be a vector standing in for a
    /// one-column matrix. The result has type `ty`.
    fn matrix_multiply(&mut self, ty: &Rc<SpirvType>, src0: &Rc<SsaValue>, src1: &Rc<SsaValue>) -> Result<Rc<SsaValue>> {
        // (A^T B^T) = (B A)^T
        if let (Some(a), Some(b)) = (&src0.transposed, &src1.transposed) {
            let scalar = scalar_of(ty);
            let b_cols = Self::columns(b)?;
            let a_cols = Self::columns(a)?;
            let first = *b_cols.first().context("multiplying a matrix without columns")?;
            let rows = self.builder.var_type(first).components;
            let inner_ty = matrix_type(&scalar, rows, a_cols.len() as u8);
            let product = self.matrix_multiply(&inner_ty, b, a)?;
            let t = self.transpose(&product)?;
            return Ok(SsaValue::composite(ty.clone(), t.elems()?.to_vec()));
        }

        let right = Self::columns(src1)?;
        let is_float = scalar_of(ty).ir_type()?.is_float();
        let mut out = Vec::with_capacity(right.len());

        if let (Some(original), true) = (&src0.transposed, is_float) {
            // Row j of src0 is column j of the matrix it transposes.
            let rows = Self::columns(original)?;
            for &column in &right {
                let mut elems = Vec::with_capacity(rows.len());
                for &row in &rows {
                    elems.push(self.dot(row, column));
                }
                out.push(self.builder.vec(&elems));
            }
        } else {
            let left = Self::columns(src0)?;
            let (mul, add) = if is_float {
                (AluOp::FMul, AluOp::FAdd)
            } else {
                (AluOp::IMul, AluOp::IAdd)
            };
            let first = *left.first().context("multiplying a matrix without columns")?;
            let rows = self.builder.var_type(first).components;
            for &column in &right {
                let mut acc: Option<VarId> = None;
                for (j, &l) in left.iter().enumerate() {
                    let s = self.builder.channel(column, j as u8);
                    let s = self.builder.broadcast(s, rows);
                    let term = self.builder.alu_same(mul, &[l, s]);
                    acc = Some(match acc {
                        Some(a) => self.builder.alu_same(add, &[a, term]),
                        None => term,
                    });
                }
                match acc {
                    Some(a) => out.push(a),
                    None => bail!("multiplying a matrix without columns"),
                }
            }
        }

        if ty.is_vector_or_scalar() {
            let [column] = out.as_slice() else {
                bail!("a {} result needs exactly one column", ty.describe());
            };
            return Ok(SsaValue::leaf(ty.clone(), *column));
        }
        let column_ty = ty.child(0)?;
        Ok(SsaValue::composite(
            ty.clone(),
            out.into_iter().map(|c| SsaValue::leaf(column_ty.clone(), c)).collect(),
        ))
    }

    // ── Determinant and inverse ──────────────────────────────────────────

    /// Scalars of a square matrix, indexed `[column][row]`.
    fn matrix_scalars(&mut self, m: &SsaValue) -> Result<Vec<Vec<VarId>>> {
        let columns = Self::columns(m)?;
        let n = columns.len();
        let mut out = Vec::with_capacity(n);
        for &c in &columns {
            if usize::from(self.builder.var_type(c).components) != n {
                bail!("determinant and inverse need a square matrix");
            }
            out.push((0..n as u8).map(|r| self.builder.channel(c, r)).collect());
        }
        Ok(out)
    }

    /// Determinant by cofactor expansion along the first column.
    fn determinant_of(&mut self, m: &[Vec<VarId>]) -> VarId {
        let n = m.len();
        if n == 1 {
            return m[0][0];
        }
        if n == 2 {
            let ad = self.builder.alu_same(AluOp::FMul, &[m[0][0], m[1][1]]);
            let bc = self.builder.alu_same(AluOp::FMul, &[m[1][0], m[0][1]]);
            return self.builder.alu_same(AluOp::FSub, &[ad, bc]);
        }
        let mut sum: Option<VarId> = None;
        for r in 0..n {
            let minor = minor(m, 0, r);
            let sub = self.determinant_of(&minor);
            let term = self.builder.alu_same(AluOp::FMul, &[m[0][r], sub]);
            sum = Some(match sum {
                None => term,
                Some(s) if r % 2 == 0 => self.builder.alu_same(AluOp::FAdd, &[s, term]),
                Some(s) => self.builder.alu_same(AluOp::FSub, &[s, term]),
            });
        }
        sum.unwrap_or(m[0][0])
    }

    pub(super) fn determinant(&mut self, m: &SsaValue) -> Result<VarId> {
        let scalars = self.matrix_scalars(m)?;
        Ok(self.determinant_of(&scalars))
    }

    /// Inverse as the adjugate divided by the determinant.
    pub(super) fn matrix_inverse(&mut self, m: &Rc<SsaValue>) -> Result<Rc<SsaValue>> {
        let scalars = self.matrix_scalars(m)?;
        let n = scalars.len();
        if n < 2 {
            bail!("cannot invert a {n}x{n} matrix");
        }
        let det = self.determinant_of(&scalars);
        let inv_det = self.builder.alu_same(AluOp::FRcp, &[det]);
        let column_ty = m.ty.child(0)?;

        let mut columns = Vec::with_capacity(n);
        for c in 0..n {
            let mut elems = Vec::with_capacity(n);
            for r in 0..n {
                // Element (r, c) of the inverse is the cofactor at (c, r).
                let minor = minor(&scalars, r, c);
                let mut cofactor = self.determinant_of(&minor);
                if (r + c) % 2 == 1 {
                    cofactor = self.builder.alu_same(AluOp::FNeg, &[cofactor]);
                }
                elems.push(self.builder.alu_same(AluOp::FMul, &[cofactor, inv_det]));
            }
            let var = self.builder.vec(&elems);
            columns.push(SsaValue::leaf(column_ty.clone(), var));
        }
        Ok(SsaValue::composite(m.ty.clone(), columns))
    }
}

/// `m` without column `skip_col` and row `skip_row`.
fn minor(m: &[Vec<VarId>], skip_col: usize, skip_row: usize) -> Vec<Vec<VarId>> {
    m.iter()
        .enumerate()
        .filter(|(c, _)| *c != skip_col)
        .map(|(_, column)| {
            column
                .iter()
                .enumerate()
                .filter(|(r, _)| *r != skip_row)
                .map(|(_, v)| *v)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_drops_one_row_and_column() {
        let v = |n: u32| VarId(n);
        let m = vec![
            vec![v(0), v(1), v(2)],
            vec![v(3), v(4), v(5)],
            vec![v(6), v(7), v(8)],
        ];
        assert_eq!(minor(&m, 1, 0), vec![vec![v(1), v(2)], vec![v(7), v(8)]]);
        assert_eq!(minor(&m, 0, 2), vec![vec![v(3), v(4)], vec![v(6), v(7)]]);
    }

    #[test]
    fn synthesized_matrix_types_are_column_major() {
        let f = Rc::new(SpirvType::new(SpvId(1), TypeKind::Float { bits: 32 }));
        let m = matrix_type(&f, 3, 2);
        assert_eq!(m.length(), 2);
        assert_eq!(m.child(0).unwrap().length(), 3);
        assert!(scalar_of(&m).ir_type().unwrap().is_float());
    }
}
