//! Variable creation: storage modes, backing storage and decoration replay.

use super::decorations::DecorationRecord;
use super::pointers::{Addressing, Pointer, PointerRoot};
use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, Value};
use super::Translator;
use crate::ir::{
    Interpolation, IrConstant, IrVariable, ResourceBinding, ShaderStage, VariableData, VariableMode,
    VariableRef,
};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::{BuiltIn, Decoration, StorageClass};
use std::rc::Rc;
use tracing::debug;

/// Where a pointer's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    Private,
    Function,
    Input,
    Output,
    UniformConstant,
    Ubo,
    Ssbo,
    PushConstant,
    Workgroup,
    PhysicalBuffer,
    CrossWorkgroup,
    Generic,
}

impl StorageMode {
    /// Map a storage class to a storage mode. `Uniform` depends on whether
    /// the pointee is a `Block` or `BufferBlock` struct (or array of them).
    pub fn from_class(class: StorageClass, pointee: &SpirvType) -> Result<Self> {
        Ok(match class {
            StorageClass::Uniform => {
                let block = interface_struct(pointee);
                match block {
                    Some(s) if s.buffer_block => StorageMode::Ssbo,
                    Some(s) if s.block => StorageMode::Ubo,
                    _ => StorageMode::UniformConstant,
                }
            }
            StorageClass::StorageBuffer => StorageMode::Ssbo,
            StorageClass::PushConstant => StorageMode::PushConstant,
            StorageClass::Input => StorageMode::Input,
            StorageClass::Output => StorageMode::Output,
            StorageClass::Private => StorageMode::Private,
            StorageClass::Function => StorageMode::Function,
            StorageClass::Workgroup => StorageMode::Workgroup,
            StorageClass::UniformConstant | StorageClass::AtomicCounter => StorageMode::UniformConstant,
            StorageClass::CrossWorkgroup => StorageMode::CrossWorkgroup,
            StorageClass::PhysicalStorageBuffer => StorageMode::PhysicalBuffer,
            StorageClass::Generic => StorageMode::Generic,
            other => bail!("unsupported storage class {other:?}"),
        })
    }

    pub fn variable_mode(self) -> VariableMode {
        match self {
            StorageMode::Private => VariableMode::Private,
            StorageMode::Function => VariableMode::Function,
            StorageMode::Input => VariableMode::ShaderIn,
            StorageMode::Output => VariableMode::ShaderOut,
            StorageMode::UniformConstant => VariableMode::Uniform,
            StorageMode::Ubo => VariableMode::Ubo,
            StorageMode::Ssbo => VariableMode::Ssbo,
            StorageMode::PushConstant => VariableMode::PushConstant,
            StorageMode::Workgroup => VariableMode::Shared,
            StorageMode::PhysicalBuffer | StorageMode::CrossWorkgroup | StorageMode::Generic => {
                VariableMode::Global
            }
        }
    }

    /// Buffer modes whose blocks are reached through descriptors.
    pub fn is_external_block(self) -> bool {
        matches!(self, StorageMode::Ubo | StorageMode::Ssbo | StorageMode::PushConstant)
    }
}

/// The struct at the core of an interface type, looking through arrays.
fn interface_struct(ty: &SpirvType) -> Option<&SpirvType> {
    match &ty.kind {
        TypeKind::Struct(_) => Some(ty),
        TypeKind::Array { element, .. } | TypeKind::RuntimeArray { element, .. } => interface_struct(element),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum VarStorage {
    Single(VariableRef),
    /// Interface block split into one variable per member. With
    /// `per_vertex` the block was wrapped in an array and every member
    /// variable is an array of the member type.
    Members {
        vars: Vec<VariableRef>,
        per_vertex: bool,
    },
    /// Buffer block reached through set and binding.
    Descriptor { set: u32, binding: u32 },
    /// Shared memory at a linear offset assigned on first use.
    SharedOffset { base: Option<u32>, size: u32, align: u32 },
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub id: SpvId,
    pub mode: StorageMode,
    pub ty: Rc<SpirvType>,
    pub storage: VarStorage,
}

fn is_per_vertex_interface(stage: ShaderStage, mode: StorageMode, patch: bool) -> bool {
    if patch {
        return false;
    }
    match mode {
        StorageMode::Input => matches!(
            stage,
            ShaderStage::TessControl | ShaderStage::TessEval | ShaderStage::Geometry
        ),
        StorageMode::Output => stage == ShaderStage::TessControl,
        _ => false,
    }
}

impl Translator<'_> {
    pub(super) fn handle_variable(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ptr_type = self.values.type_(SpvId(inst.word(1)?))?;
        let id = SpvId(inst.word(2)?);
        let TypeKind::Pointer { storage_class, pointee } = &ptr_type.kind else {
            bail!("OpVariable result type {} is not a pointer", ptr_type.describe());
        };
        let class = StorageClass::from_u32(inst.word(3)?).context("unknown storage class")?;
        if class != *storage_class {
            bail!("OpVariable storage class {class:?} does not match its pointer type ({storage_class:?})");
        }
        let pointee = pointee.clone();
        let mode = StorageMode::from_class(class, &pointee)?;
        match mode {
            StorageMode::PhysicalBuffer => bail!("variables cannot be declared in PhysicalStorageBuffer"),
            StorageMode::CrossWorkgroup | StorageMode::Generic => {
                bail!("{class:?} variables are a kernel feature and are not supported")
            }
            StorageMode::Function if self.current_function.is_none() => {
                bail!("Function storage variable declared outside a function")
            }
            _ => {}
        }

        let initializer = if inst.len() > 4 {
            if !matches!(mode, StorageMode::Output | StorageMode::Private | StorageMode::Function) {
                bail!("variables in {class:?} storage cannot have initializers");
            }
            let c = self
                .values
                .constant(SpvId(inst.word(4)?))
                .context("variable initializers must be constants")?;
            Some(Self::ir_constant(&pointee, &c.value)?)
        } else {
            None
        };

        let name = self.names.get(&id).cloned();
        let data = self.variable_data(id)?;
        let mut ty = pointee.clone();

        let storage = match mode {
            StorageMode::Ubo | StorageMode::Ssbo | StorageMode::PushConstant => {
                let set = data.descriptor_set.unwrap_or(0);
                let binding = data.binding.unwrap_or(0);
                if mode != StorageMode::PushConstant && (data.descriptor_set.is_none() || data.binding.is_none()) {
                    self.warn(format!("buffer block {id} has no descriptor set or binding, assuming 0"));
                }
                self.bindings.push(ResourceBinding {
                    name: name.clone(),
                    mode: mode.variable_mode(),
                    descriptor_set: set,
                    binding,
                    ty: pointee.mem_type()?,
                });
                VarStorage::Descriptor { set, binding }
            }
            StorageMode::Workgroup if self.options.lower_workgroup_access_to_offsets => {
                let (laid_out, size, align) = pointee.std430_layout()?;
                ty = laid_out;
                VarStorage::SharedOffset {
                    base: None,
                    size,
                    align,
                }
            }
            StorageMode::Function => {
                let var = self.builder.add_local(name.clone(), pointee.mem_type()?);
                if let Some(init) = initializer {
                    self.builder.set_local_initializer(var, init);
                }
                VarStorage::Single(var)
            }
            StorageMode::Input | StorageMode::Output => {
                self.create_interface_variable(id, mode, &pointee, name.as_deref(), data, initializer)?
            }
            _ => {
                let var = self.push_shader_variable(IrVariable {
                    name: name.clone(),
                    mode: mode.variable_mode(),
                    ty: pointee.mem_type()?,
                    data,
                    initializer,
                });
                VarStorage::Single(VariableRef::Global(var))
            }
        };

        debug!(%id, ?mode, name = name.as_deref().unwrap_or(""), "created variable");
        let index = self.vars.len();
        self.vars.push(VariableInfo {
            id,
            mode,
            ty: ty.clone(),
            storage,
        });
        let pointer = Pointer {
            mode,
            addressing: Addressing::for_mode(mode, self.options),
            ty: ty.clone(),
            root_ty: ty,
            ptr_type,
            root: PointerRoot::Variable(index),
            root_index: None,
            links: Vec::new(),
        };
        self.values.define(id, Value::Pointer(Rc::new(pointer)))
    }

    fn push_shader_variable(&mut self, var: IrVariable) -> u32 {
        self.shader_vars.push(var);
        self.shader_vars.len() as u32 - 1
    }

    /// Input and output variables. Structs decorated `Block` (directly or
    /// as the element of a per-vertex array) are split into one variable per
    /// member so member decorations land on their own variable.
    fn create_interface_variable(
        &mut self,
        id: SpvId,
        mode: StorageMode,
        pointee: &Rc<SpirvType>,
        name: Option<&str>,
        data: VariableData,
        initializer: Option<IrConstant>,
    ) -> Result<VarStorage> {
        let per_vertex = is_per_vertex_interface(self.stage, mode, data.patch);
        let (block, array_len) = match &pointee.kind {
            TypeKind::Struct(_) if pointee.block => (Some(pointee.clone()), None),
            TypeKind::Array { element, length, .. } if per_vertex && element.is_struct() && element.block => {
                (Some(element.clone()), Some(*length))
            }
            _ => (None, None),
        };

        let Some(block) = block else {
            let var = self.push_shader_variable(IrVariable {
                name: name.map(str::to_string),
                mode: mode.variable_mode(),
                ty: pointee.mem_type()?,
                data,
                initializer,
            });
            return Ok(VarStorage::Single(VariableRef::Global(var)));
        };

        let TypeKind::Struct(members) = &block.kind else {
            bail!("interface block {id} is not a struct");
        };
        if initializer.is_some() {
            bail!("interface block {id} cannot have an initializer");
        }
        let mut location = data.location;
        let mut vars = Vec::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            let mut member_data = VariableData {
                location: None,
                builtin: member.builtin,
                ..data.clone()
            };
            let records: Vec<DecorationRecord> = self.decorations.member(block.id, i as u32).cloned().collect();
            for rec in &records {
                self.apply_variable_decoration(&mut member_data, rec)?;
            }
            if member_data.location.is_some() {
                location = member_data.location;
            }
            if member_data.builtin.is_none() {
                if let Some(loc) = location {
                    member_data.location = Some(loc);
                    let slots = member.ty.slot_count()?;
                    location = Some(
                        loc.checked_add(slots)
                            .with_context(|| format!("member {i} of {} overflows the location space", block.id))?,
                    );
                }
            }
            let ty = match array_len {
                Some(length) => crate::ir::MemType::Array {
                    element: Box::new(member.ty.mem_type()?),
                    length,
                    stride: 0,
                },
                None => member.ty.mem_type()?,
            };
            let member_name = match (name, &member.name) {
                (Some(block), Some(m)) => Some(format!("{block}.{m}")),
                (None, Some(m)) => Some(m.clone()),
                (Some(block), None) => Some(format!("{block}.{i}")),
                (None, None) => None,
            };
            let var = self.push_shader_variable(IrVariable {
                name: member_name,
                mode: mode.variable_mode(),
                ty,
                data: member_data,
                initializer: None,
            });
            vars.push(VariableRef::Global(var));
        }
        Ok(VarStorage::Members {
            vars,
            per_vertex: array_len.is_some(),
        })
    }

    /// Replay the whole-variable decorations of `id`.
    fn variable_data(&mut self, id: SpvId) -> Result<VariableData> {
        let mut data = VariableData::default();
        let records: Vec<DecorationRecord> = self.decorations.whole(id).cloned().collect();
        for rec in &records {
            self.apply_variable_decoration(&mut data, rec)?;
        }
        Ok(data)
    }

    fn apply_variable_decoration(&mut self, data: &mut VariableData, rec: &DecorationRecord) -> Result<()> {
        match rec.decoration {
            Decoration::Location => data.location = Some(rec.literal(0)?),
            Decoration::Component => data.component = Some(rec.literal(0)?),
            Decoration::Index => data.index = Some(rec.literal(0)?),
            Decoration::Binding => data.binding = Some(rec.literal(0)?),
            Decoration::DescriptorSet => data.descriptor_set = Some(rec.literal(0)?),
            Decoration::InputAttachmentIndex => data.input_attachment_index = Some(rec.literal(0)?),
            Decoration::BuiltIn => {
                let raw = rec.literal(0)?;
                data.builtin = Some(BuiltIn::from_u32(raw).with_context(|| format!("unknown builtin {raw}"))?);
            }
            Decoration::Flat => data.interpolation = Interpolation::Flat,
            Decoration::NoPerspective => data.interpolation = Interpolation::NoPerspective,
            Decoration::Centroid => data.centroid = true,
            Decoration::Sample => data.sample = true,
            Decoration::Patch => data.patch = true,
            Decoration::Invariant => data.invariant = true,
            Decoration::NonWritable => data.access.non_writable = true,
            Decoration::NonReadable => data.access.non_readable = true,
            Decoration::Coherent => data.access.coherent = true,
            Decoration::Volatile => data.access.volatile = true,
            Decoration::Restrict => data.access.restrict = true,
            Decoration::Offset => data.offset = Some(rec.literal(0)?),
            Decoration::XfbBuffer => data.xfb_buffer = Some(rec.literal(0)?),
            Decoration::XfbStride => data.xfb_stride = Some(rec.literal(0)?),
            Decoration::Stream => data.stream = Some(rec.literal(0)?),
            Decoration::RelaxedPrecision
            | Decoration::Aliased
            | Decoration::NoContraction
            | Decoration::SpecId
            | Decoration::Block
            | Decoration::BufferBlock
            | Decoration::RowMajor
            | Decoration::ColMajor
            | Decoration::ArrayStride
            | Decoration::MatrixStride
            | Decoration::Uniform => {}
            other => self.warn(format!("decoration {other:?} is not supported on variables")),
        }
        Ok(())
    }

    /// Linear shared-memory base of a variable, assigned on first use.
    pub(super) fn shared_base(&mut self, index: usize) -> Result<u32> {
        let shared_size = self.info.shared_size;
        let info = self.vars.get_mut(index).context("unknown variable")?;
        let VarStorage::SharedOffset { base, size, align } = &mut info.storage else {
            bail!("variable {} has no shared-memory offset", info.id);
        };
        if let Some(b) = base {
            return Ok(*b);
        }
        let start = super::types::align_up(shared_size, *align)?;
        let end = start
            .checked_add(*size)
            .with_context(|| format!("variable {} does not fit in shared memory", info.id))?;
        *base = Some(start);
        self.info.shared_size = end;
        debug!(id = %info.id, offset = start, size = *size, "assigned shared memory");
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(kind: TypeKind) -> Rc<SpirvType> {
        Rc::new(SpirvType::new(SpvId(1), kind))
    }

    #[test]
    fn uniform_class_depends_on_block_decorations() {
        let mut block = SpirvType::new(SpvId(2), TypeKind::Struct(Vec::new()));
        block.block = true;
        let block = Rc::new(block);
        let mut buffer = SpirvType::new(SpvId(3), TypeKind::Struct(Vec::new()));
        buffer.buffer_block = true;
        let array = ty(TypeKind::Array {
            element: block.clone(),
            length: 4,
            stride: 0,
        });

        let mode = |t: &SpirvType| StorageMode::from_class(StorageClass::Uniform, t).unwrap();
        assert_eq!(mode(&block), StorageMode::Ubo);
        assert_eq!(mode(&buffer), StorageMode::Ssbo);
        assert_eq!(mode(&array), StorageMode::Ubo, "arrays of blocks are still UBOs");
        assert_eq!(mode(&ty(TypeKind::Sampler)), StorageMode::UniformConstant);
    }

    #[test]
    fn per_vertex_interfaces() {
        assert!(is_per_vertex_interface(ShaderStage::Geometry, StorageMode::Input, false));
        assert!(is_per_vertex_interface(ShaderStage::TessControl, StorageMode::Output, false));
        assert!(!is_per_vertex_interface(ShaderStage::TessControl, StorageMode::Output, true));
        assert!(!is_per_vertex_interface(ShaderStage::Vertex, StorageMode::Input, false));
        assert!(!is_per_vertex_interface(ShaderStage::Fragment, StorageMode::Output, false));
    }
}
