//! Pointers, access chains and the two addressing strategies.
//!
//! A pointer is a root (a variable, or a pointer function parameter) plus a
//! chain of links. The chain is only turned into IR when the pointer is used.
//! Buffer and shared-memory pointers can be lowered either to structured
//! derefs or to a block index plus a byte offset; which one is fixed when the
//! pointer is created.

use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, SsaValue, Value};
use super::variables::{StorageMode, VarStorage};
use super::{TranslateOptions, Translator};
use crate::ir::{AluOp, BaseType, ConstValue, DerefKind, Intrinsic, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::{Decoration, Op};
use std::rc::Rc;

/// One access chain index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    Literal(i64),
    Dynamic(VarId),
}

/// Element index applied to the root of a chain by `OpPtrAccessChain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootIndex {
    pub index: Link,
    /// `ArrayStride` of the base pointer type the index was applied through.
    pub stride: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Deref,
    Offset,
}

impl Addressing {
    pub fn for_mode(mode: StorageMode, options: &TranslateOptions) -> Self {
        match mode {
            StorageMode::Ubo | StorageMode::Ssbo if options.lower_ubo_ssbo_access_to_offsets => Addressing::Offset,
            StorageMode::PushConstant => Addressing::Offset,
            StorageMode::Workgroup if options.lower_workgroup_access_to_offsets => Addressing::Offset,
            _ => Addressing::Deref,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PointerRoot {
    /// Index into the translator's variable list.
    Variable(usize),
    /// A deref passed in as a function parameter.
    Deref(VarId),
    /// A block index and byte offset passed in as function parameters.
    Offset {
        block_index: Option<VarId>,
        offset: VarId,
    },
}

#[derive(Debug, Clone)]
pub struct Pointer {
    pub mode: StorageMode,
    pub addressing: Addressing,
    /// Pointee type at the end of the chain.
    pub ty: Rc<SpirvType>,
    /// Type at the root of the chain.
    pub root_ty: Rc<SpirvType>,
    /// The `OpTypePointer` this pointer was created with.
    pub ptr_type: Rc<SpirvType>,
    pub root: PointerRoot,
    /// Element index applied to the root itself, from `OpPtrAccessChain`
    /// on a pointer with no links yet.
    pub root_index: Option<RootIndex>,
    pub links: Vec<Link>,
}

impl Pointer {
    pub fn strategy(&self) -> &'static dyn AddressingStrategy {
        match self.addressing {
            Addressing::Deref => &DerefAddressing,
            Addressing::Offset => &OffsetAddressing,
        }
    }

    /// Pointer to child `index` of the pointee.
    pub fn child(&self, index: u32) -> Result<Pointer> {
        let mut links = self.links.clone();
        links.push(Link::Literal(i64::from(index)));
        Ok(Pointer {
            ty: self.ty.child(index)?,
            links,
            ..self.clone()
        })
    }
}

/// Resolved address of the end of a chain.
#[derive(Debug, Clone)]
pub enum Address {
    /// `component` is set when the chain ends with an index into a vector.
    Deref {
        deref: VarId,
        component: Option<Link>,
    },
    Offset {
        block_index: Option<VarId>,
        offset: VarId,
        /// Byte distance between the components of the addressed vector.
        component_stride: u32,
    },
}

/// How a pointer's chain turns into memory accesses.
pub trait AddressingStrategy {
    fn dereference(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<Address>;
    /// Load a scalar or vector.
    fn load(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<VarId>;
    /// Store a scalar or vector.
    fn store(&self, t: &mut Translator<'_>, ptr: &Pointer, value: VarId) -> Result<()>;
}

// ── Structured derefs ────────────────────────────────────────────────────────

pub struct DerefAddressing;

impl AddressingStrategy for DerefAddressing {
    fn dereference(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<Address> {
        let mut ty = ptr.root_ty.clone();
        let mut links = ptr.links.as_slice();
        let mut root_index = ptr.root_index;

        let mut deref = match &ptr.root {
            PointerRoot::Deref(d) => *d,
            PointerRoot::Offset { .. } => bail!("offset-addressed parameter used with a deref pointer"),
            PointerRoot::Variable(index) => {
                let info = t.vars.get(*index).context("unknown variable")?.clone();
                match &info.storage {
                    VarStorage::Single(var) => t.builder.deref_var(*var),
                    VarStorage::Members { vars, per_vertex } => {
                        let (vertex, member_link) = if *per_vertex {
                            let [vertex, member, ..] = links else {
                                bail!("split per-vertex interface block {} needs a vertex and member index", info.id);
                            };
                            links = &links[2..];
                            ty = ty.child(0)?;
                            (Some(*vertex), *member)
                        } else {
                            let [member, ..] = links else {
                                bail!("split interface block {} must be accessed member by member", info.id);
                            };
                            links = &links[1..];
                            (None, *member)
                        };
                        let Link::Literal(member) = member_link else {
                            bail!("interface block member index must be a constant");
                        };
                        let var = vars
                            .get(member as usize)
                            .with_context(|| format!("interface block {} has no member {member}", info.id))?;
                        ty = ty.child(member as u32)?;
                        let mut d = t.builder.deref_var(*var);
                        if let Some(vertex) = vertex {
                            let index = t.link_ssa(vertex);
                            d = t.builder.deref_array(d, index);
                        }
                        d
                    }
                    VarStorage::Descriptor { set, binding } => {
                        let (set, binding) = (*set, *binding);
                        let mut array_index = None;
                        while matches!(ty.kind, TypeKind::Array { .. } | TypeKind::RuntimeArray { .. })
                            && ty.is_block_array_or_block()
                        {
                            let Some((first, rest)) = links.split_first() else {
                                bail!("pointer to an array of blocks cannot be dereferenced as a whole");
                            };
                            let index = t.link_ssa(*first);
                            array_index = Some(match array_index {
                                None => index,
                                Some(outer) => {
                                    let len = t.builder.imm_u32(ty.length());
                                    let scaled = t.builder.alu(AluOp::IMul, IrType::U32, &[outer, len]);
                                    t.builder.alu(AluOp::IAdd, IrType::U32, &[scaled, index])
                                }
                            });
                            ty = ty.child(0)?;
                            links = rest;
                        }
                        let array_index = match array_index {
                            Some(i) => i,
                            None => t.builder.imm_u32(0),
                        };
                        let mut res = t.resource_index(set, binding, array_index)?;
                        if let Some(extra) = root_index.take() {
                            let delta = t.link_ssa(extra.index);
                            res = t
                                .builder
                                .intrinsic(Intrinsic::ResourceReindex, Some(IrType::U32), &[res, delta], &[])
                                .context("resource reindex has a result")?;
                        }
                        let desc = t
                            .builder
                            .intrinsic(Intrinsic::LoadDescriptor, Some(IrType::DEREF), &[res], &[])
                            .context("descriptor load has a result")?;
                        t.builder.deref(DerefKind::Cast {
                            parent: desc,
                            mode: ptr.mode.variable_mode(),
                            ty: Box::new(ty.mem_type()?),
                            stride: 0,
                        })
                    }
                    VarStorage::SharedOffset { .. } => bail!("shared variable {} uses offsets", info.id),
                }
            }
        };

        if let Some(root) = root_index {
            let index = t.link_ssa(root.index);
            deref = t.builder.deref(DerefKind::PtrAsArray { parent: deref, index });
        }

        for (i, link) in links.iter().enumerate() {
            match &ty.kind {
                TypeKind::Struct(_) => {
                    let Link::Literal(member) = link else {
                        bail!("struct member index must be a constant");
                    };
                    deref = t.builder.deref_struct(deref, *member as u32);
                    ty = ty.child(*member as u32)?;
                }
                TypeKind::Array { .. } | TypeKind::RuntimeArray { .. } | TypeKind::Matrix { .. } => {
                    let index = t.link_ssa(*link);
                    deref = t.builder.deref_array(deref, index);
                    ty = ty.child(0)?;
                }
                TypeKind::Vector { .. } => {
                    if i + 1 != links.len() {
                        bail!("access chain continues past a vector component");
                    }
                    return Ok(Address::Deref {
                        deref,
                        component: Some(*link),
                    });
                }
                _ => bail!("cannot index into {}", ty.describe()),
            }
        }
        Ok(Address::Deref {
            deref,
            component: None,
        })
    }

    fn load(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<VarId> {
        let Address::Deref { deref, component } = self.dereference(t, ptr)? else {
            bail!("deref strategy produced an offset");
        };
        match component {
            None => Ok(t.builder.load(deref, ptr.ty.ir_type()?)),
            Some(link) => {
                let vec_ty = ptr.ty.ir_type()?.with_components(vector_len(ptr)?);
                let vec = t.builder.load(deref, vec_ty);
                t.vector_extract(vec, link)
            }
        }
    }

    fn store(&self, t: &mut Translator<'_>, ptr: &Pointer, value: VarId) -> Result<()> {
        let Address::Deref { deref, component } = self.dereference(t, ptr)? else {
            bail!("deref strategy produced an offset");
        };
        match component {
            None => t.builder.store(deref, value),
            Some(link) => {
                let vec_ty = ptr.ty.ir_type()?.with_components(vector_len(ptr)?);
                let vec = t.builder.load(deref, vec_ty);
                let updated = t.vector_insert(vec, value, link)?;
                t.builder.store(deref, updated);
            }
        }
        Ok(())
    }
}

/// Component count of the vector a component pointer points into.
fn vector_len(ptr: &Pointer) -> Result<u8> {
    let mut ty = ptr.root_ty.clone();
    let Some((_, parents)) = ptr.links.split_last() else {
        bail!("component pointer without links");
    };
    for link in parents {
        let index = match link {
            Link::Literal(i) => *i as u32,
            Link::Dynamic(_) => 0,
        };
        ty = ty.child(index)?;
    }
    match &ty.kind {
        TypeKind::Vector { count, .. } => Ok(*count),
        _ => bail!("component pointer does not point into a vector"),
    }
}

// ── Linear offsets ───────────────────────────────────────────────────────────

pub struct OffsetAddressing;

impl AddressingStrategy for OffsetAddressing {
    fn dereference(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<Address> {
        let mut ty = ptr.root_ty.clone();
        let mut links = ptr.links.as_slice();

        let (mut block_index, mut offset) = match &ptr.root {
            PointerRoot::Offset { block_index, offset } => (*block_index, *offset),
            PointerRoot::Deref(_) => bail!("deref parameter used with an offset pointer"),
            PointerRoot::Variable(index) => {
                let info = t.vars.get(*index).context("unknown variable")?.clone();
                match &info.storage {
                    VarStorage::SharedOffset { .. } => {
                        let base = t.shared_base(*index)?;
                        (None, t.builder.imm_u32(base))
                    }
                    VarStorage::Descriptor { .. } if info.mode == StorageMode::PushConstant => {
                        (None, t.builder.imm_u32(0))
                    }
                    VarStorage::Descriptor { set, binding } => {
                        let (set, binding) = (*set, *binding);
                        let mut array_index = None;
                        while matches!(ty.kind, TypeKind::Array { .. } | TypeKind::RuntimeArray { .. })
                            && ty.is_block_array_or_block()
                        {
                            let Some((first, rest)) = links.split_first() else {
                                bail!("pointer to an array of blocks cannot be dereferenced as a whole");
                            };
                            let index = t.link_ssa(*first);
                            array_index = Some(match array_index {
                                None => index,
                                Some(outer) => {
                                    let len = t.builder.imm_u32(ty.length());
                                    let scaled = t.builder.alu(AluOp::IMul, IrType::U32, &[outer, len]);
                                    t.builder.alu(AluOp::IAdd, IrType::U32, &[scaled, index])
                                }
                            });
                            ty = ty.child(0)?;
                            links = rest;
                        }
                        let array_index = match array_index {
                            Some(i) => i,
                            None => t.builder.imm_u32(0),
                        };
                        let res = t.resource_index(set, binding, array_index)?;
                        (Some(res), t.builder.imm_u32(0))
                    }
                    _ => bail!("variable {} cannot be addressed with offsets", info.id),
                }
            }
        };

        if let Some(root) = ptr.root_index {
            match block_index {
                Some(bi) if ty.is_block_array_or_block() => {
                    let delta = t.link_ssa(root.index);
                    block_index = t
                        .builder
                        .intrinsic(Intrinsic::ResourceReindex, Some(IrType::U32), &[bi, delta], &[]);
                }
                _ => {
                    let stride = root
                        .stride
                        .context("OpPtrAccessChain on a pointer type without ArrayStride")?;
                    offset = t.add_scaled_link(offset, root.index, stride);
                }
            }
        }

        let mut component_stride = ty.scalar_bytes();
        for (i, link) in links.iter().enumerate() {
            match &ty.kind {
                TypeKind::Struct(members) => {
                    let Link::Literal(member) = link else {
                        bail!("struct member index must be a constant");
                    };
                    let m = members
                        .get(*member as usize)
                        .with_context(|| format!("struct {} has no member {member}", ty.id))?;
                    let delta = m
                        .offset
                        .with_context(|| format!("member {member} of struct {} has no Offset decoration", ty.id))?;
                    offset = t.add_scaled_link(offset, Link::Literal(1), delta);
                    ty = m.ty.clone();
                    component_stride = ty.scalar_bytes();
                }
                TypeKind::Array { element, stride, .. } | TypeKind::RuntimeArray { element, stride } => {
                    offset = t.add_scaled_link(offset, *link, *stride);
                    ty = element.clone();
                    component_stride = ty.scalar_bytes();
                }
                TypeKind::Matrix {
                    column,
                    row_major,
                    stride,
                    ..
                } => {
                    let comp = column.scalar_bytes();
                    let (column_step, element_step) = if *row_major { (comp, *stride) } else { (*stride, comp) };
                    offset = t.add_scaled_link(offset, *link, column_step);
                    ty = column.clone();
                    component_stride = element_step;
                }
                TypeKind::Vector { component, .. } => {
                    if i + 1 != links.len() {
                        bail!("access chain continues past a vector component");
                    }
                    offset = t.add_scaled_link(offset, *link, component_stride);
                    ty = component.clone();
                    component_stride = ty.scalar_bytes();
                }
                _ => bail!("cannot index into {}", ty.describe()),
            }
        }

        Ok(Address::Offset {
            block_index,
            offset,
            component_stride,
        })
    }

    fn load(&self, t: &mut Translator<'_>, ptr: &Pointer) -> Result<VarId> {
        let Address::Offset {
            block_index,
            offset,
            component_stride,
        } = self.dereference(t, ptr)?
        else {
            bail!("offset strategy produced a deref");
        };
        let ty = ptr.ty.ir_type()?;
        let mem_ty = if ty.is_bool() {
            IrType::U32.with_components(ty.components)
        } else {
            ty
        };

        let loaded = if ty.components > 1 && component_stride != ty.component_bytes() {
            let mut comps = Vec::with_capacity(usize::from(ty.components));
            for i in 0..ty.components {
                let off = t.add_scaled_link(offset, Link::Literal(i64::from(i)), component_stride);
                comps.push(t.offset_load(ptr.mode, block_index, off, mem_ty.scalar_type())?);
            }
            t.builder.vec(&comps)
        } else {
            t.offset_load(ptr.mode, block_index, offset, mem_ty)?
        };

        if ty.is_bool() {
            let zero = t.builder.imm_u32(0);
            let zero = t.builder.broadcast(zero, ty.components);
            Ok(t.builder.compare(AluOp::INe, loaded, zero))
        } else {
            Ok(loaded)
        }
    }

    fn store(&self, t: &mut Translator<'_>, ptr: &Pointer, value: VarId) -> Result<()> {
        let Address::Offset {
            block_index,
            offset,
            component_stride,
        } = self.dereference(t, ptr)?
        else {
            bail!("offset strategy produced a deref");
        };
        let ty = t.builder.var_type(value);
        let value = if ty.is_bool() {
            t.builder.alu(AluOp::B2I, IrType::U32.with_components(ty.components), &[value])
        } else {
            value
        };

        if ty.components > 1 && component_stride != ty.component_bytes() {
            for i in 0..ty.components {
                let off = t.add_scaled_link(offset, Link::Literal(i64::from(i)), component_stride);
                let comp = t.builder.channel(value, i);
                t.offset_store(ptr.mode, block_index, off, comp)?;
            }
            Ok(())
        } else {
            t.offset_store(ptr.mode, block_index, offset, value)
        }
    }
}

// ── Translator glue ──────────────────────────────────────────────────────────

impl Translator<'_> {
    /// A link as a 32-bit unsigned index.
    pub(super) fn link_ssa(&mut self, link: Link) -> VarId {
        match link {
            Link::Literal(v) => self.builder.imm_u32(v as u32),
            Link::Dynamic(var) => {
                let ty = self.builder.var_type(var);
                if ty.bit_size != 32 || ty.base != BaseType::Uint {
                    self.builder.alu(AluOp::U2U, IrType::U32, &[var])
                } else {
                    var
                }
            }
        }
    }

    /// `offset + link * stride`, folding literal links.
    fn add_scaled_link(&mut self, offset: VarId, link: Link, stride: u32) -> VarId {
        match link {
            Link::Literal(0) => offset,
            Link::Literal(v) => {
                let delta = self.builder.imm_u32((v as u32).wrapping_mul(stride));
                self.builder.alu(AluOp::IAdd, IrType::U32, &[offset, delta])
            }
            Link::Dynamic(_) => {
                let index = self.link_ssa(link);
                let stride = self.builder.imm_u32(stride);
                let scaled = self.builder.alu(AluOp::IMul, IrType::U32, &[index, stride]);
                self.builder.alu(AluOp::IAdd, IrType::U32, &[offset, scaled])
            }
        }
    }

    pub(super) fn resource_index(&mut self, set: u32, binding: u32, array_index: VarId) -> Result<VarId> {
        self.builder
            .intrinsic(Intrinsic::ResourceIndex, Some(IrType::U32), &[array_index], &[set, binding])
            .context("resource index has a result")
    }

    fn offset_load(&mut self, mode: StorageMode, block_index: Option<VarId>, offset: VarId, ty: IrType) -> Result<VarId> {
        let (op, srcs) = match (mode, block_index) {
            (StorageMode::Ubo, Some(bi)) => (Intrinsic::LoadUbo, vec![bi, offset]),
            (StorageMode::Ssbo, Some(bi)) => (Intrinsic::LoadSsbo, vec![bi, offset]),
            (StorageMode::PushConstant, _) => (Intrinsic::LoadPushConstant, vec![offset]),
            (StorageMode::Workgroup, _) => (Intrinsic::LoadShared, vec![offset]),
            _ => bail!("{mode:?} memory cannot be loaded through an offset"),
        };
        self.builder
            .intrinsic(op, Some(ty), &srcs, &[])
            .context("load intrinsic has a result")
    }

    fn offset_store(&mut self, mode: StorageMode, block_index: Option<VarId>, offset: VarId, value: VarId) -> Result<()> {
        let mask = (1u32 << self.builder.var_type(value).components) - 1;
        match (mode, block_index) {
            (StorageMode::Ssbo, Some(bi)) => {
                self.builder
                    .intrinsic(Intrinsic::StoreSsbo, None, &[value, bi, offset], &[mask]);
            }
            (StorageMode::Workgroup, _) => {
                self.builder.intrinsic(Intrinsic::StoreShared, None, &[value, offset], &[mask]);
            }
            (StorageMode::Ubo | StorageMode::PushConstant, _) => bail!("{mode:?} memory is read-only"),
            _ => bail!("{mode:?} memory cannot be stored through an offset"),
        }
        Ok(())
    }

    /// Deref of a pointer's target, for images, samplers and atomics.
    pub(super) fn pointer_deref(&mut self, ptr: &Pointer) -> Result<VarId> {
        match ptr.strategy().dereference(self, ptr)? {
            Address::Deref { deref, component: None } => Ok(deref),
            Address::Deref { .. } => bail!("pointer to a vector component cannot be used here"),
            Address::Offset { .. } => bail!("pointer in {:?} memory has no deref", ptr.mode),
        }
    }

    // ── Loads and stores ─────────────────────────────────────────────────

    /// Load the whole pointee, recursing over arrays, matrices and structs.
    pub(super) fn load_pointer(&mut self, ptr: &Pointer) -> Result<Rc<SsaValue>> {
        let ty = ptr.ty.clone();
        if ty.is_vector_or_scalar() {
            let var = ptr.strategy().load(self, ptr)?;
            return Ok(SsaValue::leaf(ty, var));
        }
        match &ty.kind {
            TypeKind::Matrix { .. } | TypeKind::Array { .. } | TypeKind::Struct(_) => {
                let mut elems = Vec::with_capacity(ty.length() as usize);
                for i in 0..ty.length() {
                    elems.push(self.load_pointer(&ptr.child(i)?)?);
                }
                Ok(SsaValue::composite(ty, elems))
            }
            TypeKind::RuntimeArray { .. } => bail!("runtime arrays cannot be loaded as a whole"),
            _ => bail!("cannot load a value of type {}", ty.describe()),
        }
    }

    pub(super) fn store_pointer(&mut self, ptr: &Pointer, value: &SsaValue) -> Result<()> {
        let ty = ptr.ty.clone();
        if ty.is_vector_or_scalar() {
            let var = value.def()?;
            let var = self.legacy_store_conversion(&ty, var)?;
            return ptr.strategy().store(self, ptr, var);
        }
        match &ty.kind {
            TypeKind::Matrix { .. } | TypeKind::Array { .. } | TypeKind::Struct(_) => {
                for i in 0..ty.length() {
                    self.store_pointer(&ptr.child(i)?, &*value.elem(i)?)?;
                }
                Ok(())
            }
            _ => bail!("cannot store a value of type {}", ty.describe()),
        }
    }

    /// Old producers stored integers through boolean pointers.
    fn legacy_store_conversion(&mut self, ty: &SpirvType, value: VarId) -> Result<VarId> {
        let want = ty.ir_type()?;
        let have = self.builder.var_type(value);
        if want == have {
            return Ok(value);
        }
        if want.is_bool() && have.is_integer() && want.components == have.components {
            self.warn("storing an integer through a boolean pointer, converting".to_string());
            let zero = self
                .builder
                .constant(ConstValue::new(have, vec![0; usize::from(have.components)]));
            return Ok(self.builder.compare(AluOp::INe, value, zero));
        }
        if want.components == have.components && want.bit_size == have.bit_size {
            return Ok(value);
        }
        bail!("storing a {have} value through a pointer to {want}")
    }

    // ── Instructions ─────────────────────────────────────────────────────

    pub(super) fn handle_access_chain(&mut self, inst: &Instruction<'_>, ptr_as_array: bool) -> Result<()> {
        let result_type = self.values.type_(SpvId(inst.word(1)?))?;
        let id = SpvId(inst.word(2)?);
        let base = self.values.pointer(SpvId(inst.word(3)?))?;
        let TypeKind::Pointer { pointee, .. } = &result_type.kind else {
            bail!("access chain result type {} is not a pointer", result_type.describe());
        };

        let mut links = Vec::new();
        for &w in inst.words_from(4) {
            links.push(self.chain_link(SpvId(w))?);
        }

        let mut ptr = (*base).clone();
        if ptr_as_array {
            let Some(element) = (!links.is_empty()).then(|| links.remove(0)) else {
                bail!("OpPtrAccessChain without an element index");
            };
            match ptr.links.last_mut() {
                Some(last) => *last = self.add_links(*last, element),
                None => {
                    let stride = self
                        .decorations
                        .find(base.ptr_type.id, Decoration::ArrayStride)
                        .and_then(|d| d.literals.first().copied());
                    ptr.root_index = Some(match ptr.root_index {
                        Some(existing) => RootIndex {
                            index: self.add_links(existing.index, element),
                            stride: existing.stride.or(stride),
                        },
                        None => RootIndex { index: element, stride },
                    });
                }
            }
        }

        // Check the chain against the type as we go.
        let mut ty = ptr.ty.clone();
        for link in &links {
            let index = match (link, &ty.kind) {
                (Link::Literal(i), _) => *i as u32,
                (Link::Dynamic(_), TypeKind::Struct(_)) => bail!("struct member index must be a constant"),
                (Link::Dynamic(_), _) => 0,
            };
            ty = ty.child(index)?;
        }
        ptr.links.extend(links);
        ptr.ty = pointee.clone();
        ptr.ptr_type = result_type.clone();
        self.values.define(id, Value::Pointer(Rc::new(ptr)))
    }

    fn chain_link(&mut self, id: SpvId) -> Result<Link> {
        if let Ok(c) = self.values.constant(id) {
            return match &c.ty.kind {
                TypeKind::Int { bits: 32 | 64, .. } => Ok(Link::Literal(c.scalar_i64()?)),
                _ => bail!("access chain index {id} must be a 32 or 64-bit integer, found {}", c.ty.describe()),
            };
        }
        let value = self.ssa_value(id)?;
        if !matches!(value.ty.kind, TypeKind::Int { .. }) {
            bail!("access chain index {id} is not an integer");
        }
        Ok(Link::Dynamic(value.def()?))
    }

    fn add_links(&mut self, a: Link, b: Link) -> Link {
        match (a, b) {
            (Link::Literal(x), Link::Literal(y)) => Link::Literal(x + y),
            _ => {
                let a = self.link_ssa(a);
                let b = self.link_ssa(b);
                Link::Dynamic(self.builder.alu(AluOp::IAdd, IrType::U32, &[a, b]))
            }
        }
    }

    pub(super) fn handle_load(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let result_type = self.values.type_(SpvId(inst.word(1)?))?;
        let id = SpvId(inst.word(2)?);
        let ptr = self.values.pointer(SpvId(inst.word(3)?))?;

        // Opaque handles stay pointers; texture instructions take the deref.
        if ptr.ty.is_opaque() || is_array_of_opaque(&ptr.ty) {
            let ptr = match self.sampler_forwards.get(&ptr_key(&ptr)) {
                Some(forwarded) => forwarded.clone(),
                None => ptr,
            };
            return self.values.define(id, Value::Pointer(ptr));
        }

        let mut value = self.load_pointer(&ptr)?;
        if !same_shape(&value.ty, &result_type) {
            if !compatible_shape(&value.ty, &result_type) {
                bail!(
                    "OpLoad of a {} through a pointer to {}",
                    result_type.describe(),
                    ptr.ty.describe()
                );
            }
            self.warn(format!(
                "OpLoad result type {} differs from the pointee type {}, accepting",
                result_type.describe(),
                ptr.ty.describe()
            ));
            value = retype(&value, &result_type)?;
        }
        self.values.define(id, Value::Ssa(value))
    }

    pub(super) fn handle_store(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ptr = self.values.pointer(SpvId(inst.word(1)?))?;
        let value_id = SpvId(inst.word(2)?);

        if ptr.ty.is_opaque() {
            // Old producers stored samplers into function variables; the
            // handle itself is what later instructions need.
            self.warn("storing an opaque handle, forwarding the source instead".to_string());
            if let Value::Pointer(src) = self.values.get_untyped(value_id)?.clone() {
                self.sampler_forwards.insert(ptr_key(&ptr), src);
                return Ok(());
            }
            bail!("stored opaque value {value_id} is not a handle");
        }

        let value = self.ssa_value(value_id)?;
        if !same_shape(&value.ty, &ptr.ty) {
            if !compatible_shape(&value.ty, &ptr.ty) && !is_bool_pointer_store(&value.ty, &ptr.ty) {
                bail!("OpStore of a {} through a pointer to {}", value.ty.describe(), ptr.ty.describe());
            }
            if !is_bool_pointer_store(&value.ty, &ptr.ty) {
                self.warn(format!(
                    "OpStore value type {} differs from the pointee type {}, accepting",
                    value.ty.describe(),
                    ptr.ty.describe()
                ));
            }
        }
        self.store_pointer(&ptr, &value)
    }

    pub(super) fn handle_copy_memory(&mut self, inst: &Instruction<'_>) -> Result<()> {
        if inst.op() == Some(Op::CopyMemorySized) {
            bail!("OpCopyMemorySized is not supported");
        }
        let dst = self.values.pointer(SpvId(inst.word(1)?))?;
        let src = self.values.pointer(SpvId(inst.word(2)?))?;
        if !same_shape(&dst.ty, &src.ty) {
            bail!("OpCopyMemory between {} and {}", src.ty.describe(), dst.ty.describe());
        }
        let value = self.load_pointer(&src)?;
        self.store_pointer(&dst, &value)
    }

    pub(super) fn handle_array_length(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let result_type = self.values.type_(SpvId(inst.word(1)?))?;
        let id = SpvId(inst.word(2)?);
        let ptr = self.values.pointer(SpvId(inst.word(3)?))?;
        let member = inst.word(4)?;

        let TypeKind::Struct(members) = &ptr.ty.kind else {
            bail!("OpArrayLength needs a pointer to a struct");
        };
        let m = members.get(member as usize).context("OpArrayLength member out of range")?;
        let TypeKind::RuntimeArray { stride, .. } = &m.ty.kind else {
            bail!("OpArrayLength member {member} is not a runtime array");
        };
        let stride = *stride;
        let member_offset = m.offset.unwrap_or(0);

        let length = match ptr.strategy().dereference(self, &ptr)? {
            Address::Deref { deref, .. } => {
                let array = self.builder.deref_struct(deref, member);
                self.builder
                    .intrinsic(Intrinsic::DerefBufferArrayLength, Some(IrType::U32), &[array], &[])
                    .context("array length has a result")?
            }
            Address::Offset {
                block_index: Some(bi), ..
            } => {
                let size = self
                    .builder
                    .intrinsic(Intrinsic::GetBufferSize, Some(IrType::U32), &[bi], &[])
                    .context("buffer size has a result")?;
                let offset = self.builder.imm_u32(member_offset);
                let stride = self.builder.imm_u32(stride);
                let bytes = self.builder.alu(AluOp::ISub, IrType::U32, &[size, offset]);
                self.builder.alu(AluOp::UDiv, IrType::U32, &[bytes, stride])
            }
            Address::Offset { .. } => bail!("OpArrayLength on memory without a buffer"),
        };
        self.values
            .define(id, Value::Ssa(SsaValue::leaf(result_type, length)))
    }
}

/// Identity of a pointer for the opaque store workaround.
pub(super) fn ptr_key(ptr: &Pointer) -> (usize, Vec<Link>) {
    let root = match ptr.root {
        PointerRoot::Variable(i) => i,
        _ => usize::MAX,
    };
    (root, ptr.links.clone())
}

fn is_array_of_opaque(ty: &SpirvType) -> bool {
    match &ty.kind {
        TypeKind::Array { element, .. } | TypeKind::RuntimeArray { element, .. } => {
            element.is_opaque() || is_array_of_opaque(element)
        }
        _ => false,
    }
}

fn is_bool_pointer_store(value: &SpirvType, pointee: &SpirvType) -> bool {
    let (Ok(v), Ok(p)) = (value.ir_type(), pointee.ir_type()) else {
        return false;
    };
    p.is_bool() && v.is_integer() && v.components == p.components
}

/// Same type tree, ignoring IDs and layout.
pub(super) fn same_shape(a: &SpirvType, b: &SpirvType) -> bool {
    match (&a.kind, &b.kind) {
        (TypeKind::Bool, TypeKind::Bool) => true,
        (TypeKind::Int { bits: x, signed: s }, TypeKind::Int { bits: y, signed: t }) => x == y && s == t,
        (TypeKind::Float { bits: x }, TypeKind::Float { bits: y }) => x == y,
        (TypeKind::Vector { component: x, count: n }, TypeKind::Vector { component: y, count: m }) => {
            n == m && same_shape(x, y)
        }
        (
            TypeKind::Matrix {
                column: x, columns: n, ..
            },
            TypeKind::Matrix {
                column: y, columns: m, ..
            },
        ) => n == m && same_shape(x, y),
        (
            TypeKind::Array {
                element: x, length: n, ..
            },
            TypeKind::Array {
                element: y, length: m, ..
            },
        ) => n == m && same_shape(x, y),
        (TypeKind::Struct(x), TypeKind::Struct(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| same_shape(&p.ty, &q.ty))
        }
        _ => a.id == b.id,
    }
}

/// Same tree with scalars of equal width, e.g. signed and unsigned swapped.
fn compatible_shape(a: &SpirvType, b: &SpirvType) -> bool {
    if let (Ok(x), Ok(y)) = (a.ir_type(), b.ir_type()) {
        return x.components == y.components && x.bit_size == y.bit_size && x.is_bool() == y.is_bool();
    }
    if a.length() != b.length() {
        return false;
    }
    match (&a.kind, &b.kind) {
        (TypeKind::Matrix { .. }, TypeKind::Matrix { .. })
        | (TypeKind::Array { .. }, TypeKind::Array { .. })
        | (TypeKind::Struct(_), TypeKind::Struct(_)) => (0..a.length()).all(|i| match (a.child(i), b.child(i)) {
            (Ok(x), Ok(y)) => compatible_shape(&x, &y),
            _ => false,
        }),
        _ => false,
    }
}

/// Relabel a value with a structurally compatible type.
fn retype(value: &Rc<SsaValue>, ty: &Rc<SpirvType>) -> Result<Rc<SsaValue>> {
    match &value.node {
        super::values::SsaNode::Leaf(var) => Ok(SsaValue::leaf(ty.clone(), *var)),
        super::values::SsaNode::Elems(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for (i, e) in elems.iter().enumerate() {
                out.push(retype(e, &ty.child(i as u32)?)?);
            }
            Ok(SsaValue::composite(ty.clone(), out))
        }
    }
}
