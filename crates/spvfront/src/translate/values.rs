//! The ID-indexed value table.
//!
//! Every result ID of the module resolves through this table. Slots start
//! out `Undefined` and are written exactly once.

use super::constants::ConstantValue;
use super::image::{ImagePointer, SampledImage};
use super::pointers::Pointer;
use super::types::SpirvType;
use crate::ir::VarId;
use anyhow::{bail, Result};
use std::fmt;
use std::rc::Rc;

/// A SPIR-V result ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpvId(pub u32);

impl fmt::Display for SpvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Extended instruction sets we know how to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtSet {
    Glsl450,
    OpenCl,
}

// ── SSA values ───────────────────────────────────────────────────────────────

/// A SPIR-V value as seen by the IR: scalars and vectors are one IR value,
/// matrices, arrays and structs are trees of them.
#[derive(Debug, Clone)]
pub struct SsaValue {
    pub ty: Rc<SpirvType>,
    pub node: SsaNode,
    /// Set on the result of a transpose: the matrix this one is the
    /// transpose of. Lets a multiply read rows without rebuilding them.
    pub transposed: Option<Rc<SsaValue>>,
}

#[derive(Debug, Clone)]
pub enum SsaNode {
    Leaf(VarId),
    Elems(Vec<Rc<SsaValue>>),
}

impl SsaValue {
    pub fn leaf(ty: Rc<SpirvType>, var: VarId) -> Rc<Self> {
        Rc::new(Self {
            ty,
            node: SsaNode::Leaf(var),
            transposed: None,
        })
    }

    pub fn composite(ty: Rc<SpirvType>, elems: Vec<Rc<SsaValue>>) -> Rc<Self> {
        Rc::new(Self {
            ty,
            node: SsaNode::Elems(elems),
            transposed: None,
        })
    }

    /// The IR value of a scalar or vector.
    pub fn def(&self) -> Result<VarId> {
        match &self.node {
            SsaNode::Leaf(var) => Ok(*var),
            SsaNode::Elems(_) => bail!("expected a scalar or vector value, found a {}", self.ty.describe()),
        }
    }

    pub fn elems(&self) -> Result<&[Rc<SsaValue>]> {
        match &self.node {
            SsaNode::Elems(elems) => Ok(elems),
            SsaNode::Leaf(_) => bail!("expected a composite value, found a {}", self.ty.describe()),
        }
    }

    pub fn elem(&self, i: u32) -> Result<Rc<SsaValue>> {
        let elems = self.elems()?;
        match elems.get(i as usize) {
            Some(e) => Ok(e.clone()),
            None => bail!("index {i} is out of bounds for a composite of {} elements", elems.len()),
        }
    }

    /// All IR values of the tree, depth first.
    pub fn flatten(&self, out: &mut Vec<VarId>) {
        match &self.node {
            SsaNode::Leaf(var) => out.push(*var),
            SsaNode::Elems(elems) => elems.iter().for_each(|e| e.flatten(out)),
        }
    }
}

// ── Values ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    String,
    DecorationGroup,
    Type,
    Constant,
    Pointer,
    Function,
    Block,
    Ssa,
    ExtensionHandler,
    ImagePointer,
    SampledImage,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Undefined => "undefined",
            ValueKind::String => "string",
            ValueKind::DecorationGroup => "decoration group",
            ValueKind::Type => "type",
            ValueKind::Constant => "constant",
            ValueKind::Pointer => "pointer",
            ValueKind::Function => "function",
            ValueKind::Block => "block",
            ValueKind::Ssa => "SSA value",
            ValueKind::ExtensionHandler => "extended instruction set",
            ValueKind::ImagePointer => "image pointer",
            ValueKind::SampledImage => "sampled image",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    String(String),
    DecorationGroup,
    Type(Rc<SpirvType>),
    Constant(Rc<ConstantValue>),
    Pointer(Rc<Pointer>),
    /// Index into the translator's function list.
    Function(usize),
    /// Index into the translator's block list.
    Block(usize),
    Ssa(Rc<SsaValue>),
    ExtensionHandler(ExtSet),
    ImagePointer(Rc<ImagePointer>),
    SampledImage(Rc<SampledImage>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::String(_) => ValueKind::String,
            Value::DecorationGroup => ValueKind::DecorationGroup,
            Value::Type(_) => ValueKind::Type,
            Value::Constant(_) => ValueKind::Constant,
            Value::Pointer(_) => ValueKind::Pointer,
            Value::Function(_) => ValueKind::Function,
            Value::Block(_) => ValueKind::Block,
            Value::Ssa(_) => ValueKind::Ssa,
            Value::ExtensionHandler(_) => ValueKind::ExtensionHandler,
            Value::ImagePointer(_) => ValueKind::ImagePointer,
            Value::SampledImage(_) => ValueKind::SampledImage,
        }
    }

    /// SPIR-V type of a value-producing entry (constants, SSA values and
    /// pointers, which report their pointee type).
    pub fn value_type(&self) -> Option<Rc<SpirvType>> {
        match self {
            Value::Constant(c) => Some(c.ty.clone()),
            Value::Ssa(v) => Some(v.ty.clone()),
            Value::Pointer(p) => Some(p.ty.clone()),
            Value::SampledImage(s) => Some(s.ty.clone()),
            _ => None,
        }
    }
}

// ── Table ────────────────────────────────────────────────────────────────────

/// Dense write-once table sized by the module's ID bound.
#[derive(Debug)]
pub struct ValueTable {
    slots: Vec<Value>,
}

impl ValueTable {
    pub fn new(bound: u32) -> Self {
        Self {
            slots: vec![Value::Undefined; bound as usize],
        }
    }

    pub fn bound(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Fill the slot of `id`. Fails if `id` is outside the bound or the slot
    /// already holds a value.
    pub fn define(&mut self, id: SpvId, value: Value) -> Result<()> {
        let bound = self.bound();
        let Some(slot) = self.slots.get_mut(id.0 as usize) else {
            bail!("ID {id} is outside the module's ID bound of {bound}");
        };
        if !matches!(slot, Value::Undefined) {
            bail!("ID {id} is defined twice (already a {})", slot.kind());
        }
        *slot = value;
        Ok(())
    }

    /// Look up `id` without checking what kind of value it holds.
    pub fn get_untyped(&self, id: SpvId) -> Result<&Value> {
        match self.slots.get(id.0 as usize) {
            Some(Value::Undefined) => bail!("ID {id} is used before it is defined"),
            Some(value) => Ok(value),
            None => bail!("ID {id} is outside the module's ID bound of {}", self.bound()),
        }
    }

    /// Kind of `id`, `Undefined` for empty or out-of-range slots.
    pub fn kind(&self, id: SpvId) -> ValueKind {
        self.slots
            .get(id.0 as usize)
            .map(Value::kind)
            .unwrap_or(ValueKind::Undefined)
    }

    pub fn get(&self, id: SpvId, kind: ValueKind) -> Result<&Value> {
        let value = self.get_untyped(id)?;
        if value.kind() != kind {
            bail!("ID {id} is a {}, expected a {kind}", value.kind());
        }
        Ok(value)
    }

    pub fn type_(&self, id: SpvId) -> Result<Rc<SpirvType>> {
        match self.get(id, ValueKind::Type)? {
            Value::Type(ty) => Ok(ty.clone()),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn constant(&self, id: SpvId) -> Result<Rc<ConstantValue>> {
        match self.get(id, ValueKind::Constant)? {
            Value::Constant(c) => Ok(c.clone()),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn pointer(&self, id: SpvId) -> Result<Rc<Pointer>> {
        match self.get(id, ValueKind::Pointer)? {
            Value::Pointer(p) => Ok(p.clone()),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn function(&self, id: SpvId) -> Result<usize> {
        match self.get(id, ValueKind::Function)? {
            Value::Function(f) => Ok(*f),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn block(&self, id: SpvId) -> Result<usize> {
        match self.get(id, ValueKind::Block)? {
            Value::Block(b) => Ok(*b),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn ext_set(&self, id: SpvId) -> Result<ExtSet> {
        match self.get(id, ValueKind::ExtensionHandler)? {
            Value::ExtensionHandler(set) => Ok(*set),
            _ => unreachable!("kind checked by get"),
        }
    }

    pub fn string(&self, id: SpvId) -> Result<&str> {
        match self.get(id, ValueKind::String)? {
            Value::String(s) => Ok(s),
            _ => unreachable!("kind checked by get"),
        }
    }

    /// SPIR-V type of whatever value `id` names.
    pub fn value_type(&self, id: SpvId) -> Result<Rc<SpirvType>> {
        match self.get_untyped(id)?.value_type() {
            Some(ty) => Ok(ty),
            None => bail!("ID {id} is a {}, which has no value type", self.kind(id)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get_returns_the_same_kind() {
        let mut table = ValueTable::new(8);
        for i in 1..8 {
            table.define(SpvId(i), Value::Block(i as usize)).unwrap();
        }
        for i in 1..8 {
            assert_eq!(table.block(SpvId(i)).unwrap(), i as usize);
            assert_eq!(table.kind(SpvId(i)), ValueKind::Block);
        }
    }

    #[test]
    fn get_before_define_fails() {
        let table = ValueTable::new(4);
        let err = table.get_untyped(SpvId(2)).unwrap_err();
        assert!(err.to_string().contains("before it is defined"), "got: {err}");
    }

    #[test]
    fn redefinition_fails() {
        let mut table = ValueTable::new(4);
        table.define(SpvId(1), Value::DecorationGroup).unwrap();
        let err = table.define(SpvId(1), Value::Block(0)).unwrap_err();
        assert!(err.to_string().contains("defined twice"), "got: {err}");
        assert_eq!(table.kind(SpvId(1)), ValueKind::DecorationGroup, "first value must survive");
    }

    #[test]
    fn ids_past_the_bound_are_rejected() {
        let mut table = ValueTable::new(4);
        assert!(table.define(SpvId(4), Value::Block(0)).is_err());
        assert!(table.get_untyped(SpvId(100)).is_err());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let mut table = ValueTable::new(4);
        table.define(SpvId(3), Value::ExtensionHandler(ExtSet::Glsl450)).unwrap();
        let err = table.get(SpvId(3), ValueKind::Type).unwrap_err();
        assert!(err.to_string().contains("expected a type"), "got: {err}");
        assert_eq!(table.ext_set(SpvId(3)).unwrap(), ExtSet::Glsl450);
    }
}
