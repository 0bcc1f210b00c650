//! SPIR-V type mirror.
//!
//! Types are immutable once built. Layout decorations (offsets, strides,
//! matrix majorness) are folded in when the type instruction is seen, since
//! the annotation section always precedes the type declarations.

use super::values::{SpvId, Value};
use super::Translator;
use crate::ir::{BaseType, ImageDim, ImageInfo, IrType, MemField, MemType, PixelFormat};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::{BuiltIn, Decoration, Op, StorageClass};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct SpirvType {
    pub id: SpvId,
    pub kind: TypeKind,
    /// Struct decorated `Block`.
    pub block: bool,
    /// Struct decorated `BufferBlock`.
    pub buffer_block: bool,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Void,
    Bool,
    Int {
        bits: u8,
        signed: bool,
    },
    Float {
        bits: u8,
    },
    Vector {
        component: Rc<SpirvType>,
        count: u8,
    },
    Matrix {
        column: Rc<SpirvType>,
        columns: u8,
        row_major: bool,
        stride: u32,
    },
    Array {
        element: Rc<SpirvType>,
        length: u32,
        stride: u32,
    },
    RuntimeArray {
        element: Rc<SpirvType>,
        stride: u32,
    },
    Struct(Vec<StructMember>),
    Image(ImageType),
    Sampler,
    SampledImage(Rc<SpirvType>),
    Pointer {
        storage_class: StorageClass,
        pointee: Rc<SpirvType>,
    },
    Function {
        ret: Rc<SpirvType>,
        params: Vec<Rc<SpirvType>>,
    },
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub ty: Rc<SpirvType>,
    pub offset: Option<u32>,
    pub name: Option<String>,
    pub builtin: Option<BuiltIn>,
}

#[derive(Debug, Clone)]
pub struct ImageType {
    pub sampled_type: Rc<SpirvType>,
    pub dim: ImageDim,
    pub depth: bool,
    pub arrayed: bool,
    pub multisampled: bool,
    /// 1 for sampled images, 2 for storage images, 0 when only known at runtime.
    pub sampled: u32,
    pub format: PixelFormat,
}

impl ImageType {
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            dim: self.dim,
            arrayed: self.arrayed,
            multisampled: self.multisampled,
            shadow: self.depth,
            sampled_type: self.sampled_type.ir_type().map(|t| t.base).unwrap_or(BaseType::Float),
            storage: self.sampled == 2,
            format: self.format,
        }
    }
}

/// SPIR-V `ImageFormat` operand, in enumerant order.
const IMAGE_FORMATS: [PixelFormat; 40] = [
    PixelFormat::None,
    PixelFormat::R32G32B32A32Float,
    PixelFormat::R16G16B16A16Float,
    PixelFormat::R32Float,
    PixelFormat::R8G8B8A8Unorm,
    PixelFormat::R8G8B8A8Snorm,
    PixelFormat::R32G32Float,
    PixelFormat::R16G16Float,
    PixelFormat::R11G11B10Float,
    PixelFormat::R16Float,
    PixelFormat::R16G16B16A16Unorm,
    PixelFormat::R10G10B10A2Unorm,
    PixelFormat::R16G16Unorm,
    PixelFormat::R8G8Unorm,
    PixelFormat::R16Unorm,
    PixelFormat::R8Unorm,
    PixelFormat::R16G16B16A16Snorm,
    PixelFormat::R16G16Snorm,
    PixelFormat::R8G8Snorm,
    PixelFormat::R16Snorm,
    PixelFormat::R8Snorm,
    PixelFormat::R32G32B32A32Sint,
    PixelFormat::R16G16B16A16Sint,
    PixelFormat::R8G8B8A8Sint,
    PixelFormat::R32Sint,
    PixelFormat::R32G32Sint,
    PixelFormat::R16G16Sint,
    PixelFormat::R8G8Sint,
    PixelFormat::R16Sint,
    PixelFormat::R8Sint,
    PixelFormat::R32G32B32A32Uint,
    PixelFormat::R16G16B16A16Uint,
    PixelFormat::R8G8B8A8Uint,
    PixelFormat::R32Uint,
    PixelFormat::R10G10B10A2Uint,
    PixelFormat::R32G32Uint,
    PixelFormat::R16G16Uint,
    PixelFormat::R8G8Uint,
    PixelFormat::R16Uint,
    PixelFormat::R8Uint,
];

pub fn translate_image_format(format: u32) -> Result<PixelFormat> {
    match IMAGE_FORMATS.get(format as usize) {
        Some(f) => Ok(*f),
        None => bail!("unsupported image format {format}"),
    }
}

fn translate_dim(dim: u32) -> Result<ImageDim> {
    Ok(match dim {
        0 => ImageDim::D1,
        1 => ImageDim::D2,
        2 => ImageDim::D3,
        3 => ImageDim::Cube,
        4 => ImageDim::Rect,
        5 => ImageDim::Buffer,
        6 => ImageDim::SubpassData,
        other => bail!("unsupported image dimensionality {other}"),
    })
}

pub(super) fn align_up(value: u32, align: u32) -> Result<u32> {
    if align == 0 {
        return Ok(value);
    }
    value
        .div_ceil(align)
        .checked_mul(align)
        .with_context(|| format!("offset {value} overflows when aligned to {align}"))
}

impl SpirvType {
    pub fn new(id: SpvId, kind: TypeKind) -> Self {
        Self {
            id,
            kind,
            block: false,
            buffer_block: false,
        }
    }

    /// Short human-readable name used in diagnostics.
    pub fn describe(&self) -> String {
        match &self.kind {
            TypeKind::Void => "void".into(),
            TypeKind::Bool => "bool".into(),
            TypeKind::Int { bits, signed: true } => format!("i{bits}"),
            TypeKind::Int { bits, signed: false } => format!("u{bits}"),
            TypeKind::Float { bits } => format!("f{bits}"),
            TypeKind::Vector { component, count } => format!("{}x{count}", component.describe()),
            TypeKind::Matrix { column, columns, .. } => format!("mat{columns}<{}>", column.describe()),
            TypeKind::Array { element, length, .. } => format!("[{}; {length}]", element.describe()),
            TypeKind::RuntimeArray { element, .. } => format!("[{}]", element.describe()),
            TypeKind::Struct(m) => format!("struct {} ({} members)", self.id, m.len()),
            TypeKind::Image(_) => "image".into(),
            TypeKind::Sampler => "sampler".into(),
            TypeKind::SampledImage(_) => "sampled image".into(),
            TypeKind::Pointer { pointee, .. } => format!("pointer to {}", pointee.describe()),
            TypeKind::Function { .. } => "function".into(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. })
    }

    pub fn is_vector_or_scalar(&self) -> bool {
        self.is_scalar() || matches!(self.kind, TypeKind::Vector { .. })
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.kind, TypeKind::Matrix { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. } | TypeKind::RuntimeArray { .. })
    }

    /// Images, samplers and combined image-samplers.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Image(_) | TypeKind::Sampler | TypeKind::SampledImage(_)
        )
    }

    pub fn image(&self) -> Option<&ImageType> {
        match &self.kind {
            TypeKind::Image(img) => Some(img),
            TypeKind::SampledImage(inner) => inner.image(),
            _ => None,
        }
    }

    /// IR type of a scalar or vector.
    pub fn ir_type(&self) -> Result<IrType> {
        Ok(match &self.kind {
            TypeKind::Bool => IrType::BOOL,
            TypeKind::Int { bits, signed } => {
                let base = if *signed { BaseType::Int } else { BaseType::Uint };
                IrType::scalar(base, *bits)
            }
            TypeKind::Float { bits } => IrType::scalar(BaseType::Float, *bits),
            TypeKind::Vector { component, count } => component.ir_type()?.with_components(*count),
            _ => bail!("{} is not a scalar or vector type", self.describe()),
        })
    }

    /// Number of addressable children: vector components, matrix columns,
    /// array elements or struct members.
    pub fn length(&self) -> u32 {
        match &self.kind {
            TypeKind::Vector { count, .. } => u32::from(*count),
            TypeKind::Matrix { columns, .. } => u32::from(*columns),
            TypeKind::Array { length, .. } => *length,
            TypeKind::Struct(members) => members.len() as u32,
            _ => 1,
        }
    }

    /// Type of child `index`.
    pub fn child(&self, index: u32) -> Result<Rc<SpirvType>> {
        match &self.kind {
            TypeKind::Vector { component, .. } => Ok(component.clone()),
            TypeKind::Matrix { column, .. } => Ok(column.clone()),
            TypeKind::Array { element, .. } | TypeKind::RuntimeArray { element, .. } => Ok(element.clone()),
            TypeKind::Struct(members) => match members.get(index as usize) {
                Some(m) => Ok(m.ty.clone()),
                None => bail!("struct {} has no member {index}", self.id),
            },
            _ => bail!("{} cannot be indexed", self.describe()),
        }
    }

    /// Byte stride between consecutive children of an array or matrix.
    pub fn stride(&self) -> u32 {
        match &self.kind {
            TypeKind::Array { stride, .. } | TypeKind::RuntimeArray { stride, .. } => *stride,
            TypeKind::Matrix { stride, .. } => *stride,
            TypeKind::Vector { component, .. } => component.scalar_bytes(),
            _ => 0,
        }
    }

    pub fn scalar_bytes(&self) -> u32 {
        match &self.kind {
            TypeKind::Bool => 4,
            TypeKind::Int { bits, .. } | TypeKind::Float { bits } => u32::from(*bits) / 8,
            TypeKind::Vector { component, .. } => component.scalar_bytes(),
            _ => 0,
        }
    }

    /// Whether this is a Block/BufferBlock struct or an array of them, i.e.
    /// indexing it selects a descriptor rather than memory inside a buffer.
    pub fn is_block_array_or_block(&self) -> bool {
        match &self.kind {
            TypeKind::Struct(_) => self.block || self.buffer_block,
            TypeKind::Array { element, .. } | TypeKind::RuntimeArray { element, .. } => {
                element.is_block_array_or_block()
            }
            _ => false,
        }
    }

    /// Interface slots (locations) the type occupies.
    pub fn slot_count(&self) -> Result<u32> {
        Ok(match &self.kind {
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } => 1,
            TypeKind::Vector { component, count } => {
                if component.scalar_bytes() == 8 && *count > 2 {
                    2
                } else {
                    1
                }
            }
            TypeKind::Matrix { column, columns, .. } => u32::from(*columns) * column.slot_count()?,
            TypeKind::Array { element, length, .. } => length
                .checked_mul(element.slot_count()?)
                .with_context(|| format!("{} needs too many interface slots", self.describe()))?,
            TypeKind::Struct(members) => {
                let mut total = 0u32;
                for m in members {
                    total = total
                        .checked_add(m.ty.slot_count()?)
                        .with_context(|| format!("{} needs too many interface slots", self.describe()))?;
                }
                total
            }
            _ => 1,
        })
    }

    /// Memory type used for IR variables and derefs.
    pub fn mem_type(&self) -> Result<MemType> {
        Ok(match &self.kind {
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } | TypeKind::Vector { .. } => {
                MemType::Vector(self.ir_type()?)
            }
            TypeKind::Matrix {
                column,
                columns,
                row_major,
                stride,
            } => MemType::Matrix {
                column: column.ir_type()?,
                columns: *columns,
                row_major: *row_major,
                stride: *stride,
            },
            TypeKind::Array { element, length, stride } => MemType::Array {
                element: Box::new(element.mem_type()?),
                length: *length,
                stride: *stride,
            },
            TypeKind::RuntimeArray { element, stride } => MemType::Array {
                element: Box::new(element.mem_type()?),
                length: 0,
                stride: *stride,
            },
            TypeKind::Struct(members) => {
                let mut fields = Vec::with_capacity(members.len());
                for m in members {
                    fields.push(MemField {
                        name: m.name.clone(),
                        ty: m.ty.mem_type()?,
                        offset: m.offset.unwrap_or(0),
                    });
                }
                MemType::Struct(fields)
            }
            TypeKind::Image(img) => MemType::Image(img.info()),
            TypeKind::Sampler => MemType::Sampler,
            TypeKind::SampledImage(img) => match img.image() {
                Some(i) => MemType::SampledImage(i.info()),
                None => bail!("sampled image does not wrap an image type"),
            },
            TypeKind::Void | TypeKind::Pointer { .. } | TypeKind::Function { .. } => {
                bail!("{} has no memory representation", self.describe())
            }
        })
    }

    /// Rebuild the type with std430 offsets and strides. Returns the laid-out
    /// type with its size and alignment.
    pub fn std430_layout(self: &Rc<Self>) -> Result<(Rc<SpirvType>, u32, u32)> {
        match &self.kind {
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } => {
                let size = self.scalar_bytes();
                Ok((self.clone(), size, size))
            }
            TypeKind::Vector { component, count } => {
                let comp = component.scalar_bytes();
                let align_count = if *count == 3 { 4 } else { u32::from(*count) };
                Ok((self.clone(), comp * u32::from(*count), comp * align_count))
            }
            TypeKind::Matrix {
                column,
                columns,
                row_major,
                ..
            } => {
                let (column, col_size, col_align) = column.std430_layout()?;
                let stride = align_up(col_size, col_align)?;
                let ty = SpirvType {
                    kind: TypeKind::Matrix {
                        column,
                        columns: *columns,
                        row_major: *row_major,
                        stride,
                    },
                    ..(**self).clone()
                };
                let size = stride
                    .checked_mul(u32::from(*columns))
                    .with_context(|| format!("{} is too large for shared memory", self.describe()))?;
                Ok((Rc::new(ty), size, col_align))
            }
            TypeKind::Array { element, length, .. } => {
                let (element, size, align) = element.std430_layout()?;
                let stride = align_up(size, align)?;
                let ty = SpirvType {
                    kind: TypeKind::Array {
                        element,
                        length: *length,
                        stride,
                    },
                    ..(**self).clone()
                };
                let size = stride
                    .checked_mul(*length)
                    .with_context(|| format!("{} is too large for shared memory", self.describe()))?;
                Ok((Rc::new(ty), size, align))
            }
            TypeKind::Struct(members) => {
                let mut offset = 0;
                let mut max_align = 0;
                let mut laid_out = Vec::with_capacity(members.len());
                for m in members {
                    let (ty, size, align) = m.ty.std430_layout()?;
                    offset = align_up(offset, align)?;
                    laid_out.push(StructMember {
                        ty,
                        offset: Some(offset),
                        ..m.clone()
                    });
                    offset = offset
                        .checked_add(size)
                        .with_context(|| format!("{} is too large for shared memory", self.describe()))?;
                    max_align = max_align.max(align);
                }
                let ty = SpirvType {
                    kind: TypeKind::Struct(laid_out),
                    ..(**self).clone()
                };
                Ok((Rc::new(ty), align_up(offset, max_align)?, max_align))
            }
            _ => bail!("{} cannot be placed in shared memory", self.describe()),
        }
    }
}

/// Apply a `MatrixStride` or majorness member decoration to the matrix
/// inside `ty`, looking through arrays.
fn patch_matrix(ty: &Rc<SpirvType>, stride: Option<u32>, row_major: Option<bool>) -> Result<Rc<SpirvType>> {
    let kind = match &ty.kind {
        TypeKind::Matrix {
            column,
            columns,
            row_major: rm,
            stride: s,
        } => TypeKind::Matrix {
            column: column.clone(),
            columns: *columns,
            row_major: row_major.unwrap_or(*rm),
            stride: stride.unwrap_or(*s),
        },
        TypeKind::Array { element, length, stride: s } => TypeKind::Array {
            element: patch_matrix(element, stride, row_major)?,
            length: *length,
            stride: *s,
        },
        TypeKind::RuntimeArray { element, stride: s } => TypeKind::RuntimeArray {
            element: patch_matrix(element, stride, row_major)?,
            stride: *s,
        },
        _ => bail!("matrix layout decoration on a member of type {}", ty.describe()),
    };
    Ok(Rc::new(SpirvType {
        kind,
        ..(**ty).clone()
    }))
}

// ── Type instructions ────────────────────────────────────────────────────────

impl Translator<'_> {
    pub(super) fn handle_type(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let id = SpvId(inst.word(1)?);
        let op = inst.op().context("unknown opcode")?;
        let kind = match op {
            Op::TypeVoid => TypeKind::Void,
            Op::TypeBool => TypeKind::Bool,
            Op::TypeInt => {
                let bits = inst.word(2)?;
                if !matches!(bits, 8 | 16 | 32 | 64) {
                    bail!("unsupported integer width {bits}");
                }
                TypeKind::Int {
                    bits: bits as u8,
                    signed: inst.word(3)? != 0,
                }
            }
            Op::TypeFloat => {
                let bits = inst.word(2)?;
                if !matches!(bits, 16 | 32 | 64) {
                    bail!("unsupported float width {bits}");
                }
                TypeKind::Float { bits: bits as u8 }
            }
            Op::TypeVector => {
                let component = self.values.type_(SpvId(inst.word(2)?))?;
                let count = inst.word(3)?;
                if !component.is_scalar() {
                    bail!("vector component must be a scalar, found {}", component.describe());
                }
                if !matches!(count, 2..=4 | 8 | 16) {
                    bail!("unsupported vector size {count}");
                }
                TypeKind::Vector {
                    component,
                    count: count as u8,
                }
            }
            Op::TypeMatrix => {
                let column = self.values.type_(SpvId(inst.word(2)?))?;
                let columns = inst.word(3)?;
                if !matches!(column.kind, TypeKind::Vector { .. }) || !(2..=4).contains(&columns) {
                    bail!("unsupported matrix shape: {columns} columns of {}", column.describe());
                }
                TypeKind::Matrix {
                    column,
                    columns: columns as u8,
                    row_major: false,
                    stride: 0,
                }
            }
            Op::TypeArray | Op::TypeRuntimeArray => {
                let element = self.values.type_(SpvId(inst.word(2)?))?;
                let stride = self.array_stride(id);
                if op == Op::TypeRuntimeArray {
                    TypeKind::RuntimeArray { element, stride }
                } else {
                    let length_id = SpvId(inst.word(3)?);
                    let length = self
                        .values
                        .constant(length_id)
                        .with_context(|| format!("array length {length_id}"))?
                        .scalar_u64()?;
                    let length = u32::try_from(length)
                        .with_context(|| format!("array length {length} of type {id} does not fit in 32 bits"))?;
                    TypeKind::Array {
                        element,
                        length,
                        stride,
                    }
                }
            }
            Op::TypeStruct => return self.handle_struct_type(id, inst),
            Op::TypeFunction => {
                let ret = self.values.type_(SpvId(inst.word(2)?))?;
                let params = inst
                    .words_from(3)
                    .iter()
                    .map(|&w| self.values.type_(SpvId(w)))
                    .collect::<Result<Vec<_>>>()?;
                TypeKind::Function { ret, params }
            }
            Op::TypePointer => {
                let sc = inst.word(2)?;
                let storage_class =
                    StorageClass::from_u32(sc).with_context(|| format!("unknown storage class {sc}"))?;
                let pointee = self.values.type_(SpvId(inst.word(3)?))?;
                TypeKind::Pointer { storage_class, pointee }
            }
            Op::TypeImage => {
                let sampled_type = self.values.type_(SpvId(inst.word(2)?))?;
                let dim = translate_dim(inst.word(3)?)?;
                let depth = inst.word(4)? == 1;
                let arrayed = inst.word(5)? != 0;
                let multisampled = inst.word(6)? != 0;
                let sampled = inst.word(7)?;
                let format = translate_image_format(inst.word(8)?)?;
                if inst.len() > 9 {
                    self.warn(format!("access qualifier on image type {id} ignored"));
                }
                TypeKind::Image(ImageType {
                    sampled_type,
                    dim,
                    depth,
                    arrayed,
                    multisampled,
                    sampled,
                    format,
                })
            }
            Op::TypeSampledImage => {
                let image = self.values.type_(SpvId(inst.word(2)?))?;
                if !matches!(image.kind, TypeKind::Image(_)) {
                    bail!("sampled image of non-image type {}", image.describe());
                }
                TypeKind::SampledImage(image)
            }
            Op::TypeSampler => TypeKind::Sampler,
            Op::TypeForwardPointer => bail!("forward pointers require physical addressing, which is unsupported"),
            Op::TypeOpaque
            | Op::TypeEvent
            | Op::TypeDeviceEvent
            | Op::TypeReserveId
            | Op::TypeQueue
            | Op::TypePipe => bail!("{} is a kernel type and is not supported", inst.name()),
            _ => bail!("unhandled type instruction {}", inst.name()),
        };
        self.values.define(id, Value::Type(Rc::new(SpirvType::new(id, kind))))
    }

    fn array_stride(&self, id: SpvId) -> u32 {
        self.decorations
            .find(id, Decoration::ArrayStride)
            .and_then(|d| d.literals.first().copied())
            .unwrap_or(0)
    }

    fn handle_struct_type(&mut self, id: SpvId, inst: &Instruction<'_>) -> Result<()> {
        let mut members = Vec::new();
        for (i, &w) in inst.words_from(2).iter().enumerate() {
            members.push(StructMember {
                ty: self.values.type_(SpvId(w))?,
                offset: None,
                name: self.member_names.get(&(id, i as u32)).cloned(),
                builtin: None,
            });
        }

        let mut ty = SpirvType::new(id, TypeKind::Void);
        for rec in self.decorations.of(id) {
            match rec.member {
                None => match rec.decoration {
                    Decoration::Block => ty.block = true,
                    Decoration::BufferBlock => ty.buffer_block = true,
                    _ => {}
                },
                Some(m) => {
                    let Some(member) = members.get_mut(m as usize) else {
                        bail!("member decoration on member {m} of struct {id} which has {} members", inst.len() - 2);
                    };
                    match rec.decoration {
                        Decoration::Offset => member.offset = Some(rec.literal(0)?),
                        Decoration::MatrixStride => {
                            member.ty = patch_matrix(&member.ty, Some(rec.literal(0)?), None)?;
                        }
                        Decoration::RowMajor => member.ty = patch_matrix(&member.ty, None, Some(true))?,
                        Decoration::ColMajor => member.ty = patch_matrix(&member.ty, None, Some(false))?,
                        Decoration::BuiltIn => {
                            let raw = rec.literal(0)?;
                            member.builtin =
                                Some(BuiltIn::from_u32(raw).with_context(|| format!("unknown builtin {raw}"))?);
                        }
                        _ => {}
                    }
                }
            }
        }
        ty.kind = TypeKind::Struct(members);
        self.values.define(id, Value::Type(Rc::new(ty)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn float() -> Rc<SpirvType> {
        Rc::new(SpirvType::new(SpvId(1), TypeKind::Float { bits: 32 }))
    }

    fn vec(n: u8) -> Rc<SpirvType> {
        Rc::new(SpirvType::new(
            SpvId(2),
            TypeKind::Vector {
                component: float(),
                count: n,
            },
        ))
    }

    fn member(ty: Rc<SpirvType>) -> StructMember {
        StructMember {
            ty,
            offset: None,
            name: None,
            builtin: None,
        }
    }

    #[test]
    fn std430_vec3_aligns_like_vec4() {
        let s = Rc::new(SpirvType::new(
            SpvId(3),
            TypeKind::Struct(vec![member(float()), member(vec(3)), member(float())]),
        ));
        let (laid_out, size, align) = s.std430_layout().unwrap();
        let TypeKind::Struct(members) = &laid_out.kind else {
            panic!("struct expected");
        };
        let offsets: Vec<_> = members.iter().map(|m| m.offset.unwrap()).collect();
        assert_eq!(offsets, vec![0, 16, 28]);
        assert_eq!((size, align), (32, 16));
    }

    #[test]
    fn std430_array_stride_is_element_size_rounded() {
        let arr = Rc::new(SpirvType::new(
            SpvId(4),
            TypeKind::Array {
                element: vec(3),
                length: 4,
                stride: 0,
            },
        ));
        let (laid_out, size, _) = arr.std430_layout().unwrap();
        assert_eq!(laid_out.stride(), 16);
        assert_eq!(size, 64);
    }

    #[test]
    fn slots_count_matrix_columns_and_array_elements() {
        let mat = Rc::new(SpirvType::new(
            SpvId(5),
            TypeKind::Matrix {
                column: vec(4),
                columns: 3,
                row_major: false,
                stride: 16,
            },
        ));
        assert_eq!(mat.slot_count().unwrap(), 3);
        let arr = SpirvType::new(
            SpvId(6),
            TypeKind::Array {
                element: mat,
                length: 2,
                stride: 48,
            },
        );
        assert_eq!(arr.slot_count().unwrap(), 6);
    }

    #[test]
    fn oversized_layouts_are_errors() {
        let arr = Rc::new(SpirvType::new(
            SpvId(4),
            TypeKind::Array {
                element: float(),
                length: 0x4000_0001,
                stride: 0,
            },
        ));
        let err = arr.std430_layout().unwrap_err().to_string();
        assert!(err.contains("too large"), "unexpected error: {err}");

        let s = Rc::new(SpirvType::new(
            SpvId(5),
            TypeKind::Struct(vec![member(vec(4)), member(arr.clone())]),
        ));
        assert!(s.std430_layout().is_err());

        let nested = SpirvType::new(
            SpvId(6),
            TypeKind::Array {
                element: arr,
                length: 4,
                stride: 0,
            },
        );
        assert!(nested.slot_count().is_err());
    }

    #[test]
    fn align_up_rounds_and_checks() {
        assert_eq!(align_up(13, 4).unwrap(), 16);
        assert_eq!(align_up(16, 16).unwrap(), 16);
        assert_eq!(align_up(7, 0).unwrap(), 7);
        assert!(align_up(u32::MAX - 1, 16).is_err());
    }

    #[test]
    fn row_major_reaches_through_arrays() {
        let mat = Rc::new(SpirvType::new(
            SpvId(5),
            TypeKind::Matrix {
                column: vec(4),
                columns: 4,
                row_major: false,
                stride: 0,
            },
        ));
        let arr = Rc::new(SpirvType::new(
            SpvId(6),
            TypeKind::Array {
                element: mat,
                length: 2,
                stride: 64,
            },
        ));
        let patched = patch_matrix(&arr, Some(16), Some(true)).unwrap();
        let TypeKind::Matrix { row_major, stride, .. } = patched.child(0).unwrap().kind.clone() else {
            panic!("matrix expected");
        };
        assert!(row_major);
        assert_eq!(stride, 16);
        assert_eq!(patched.stride(), 64, "array stride is untouched");
    }

    #[test]
    fn image_formats_follow_enumerant_order() {
        assert_eq!(translate_image_format(0).unwrap(), PixelFormat::None);
        assert_eq!(translate_image_format(4).unwrap(), PixelFormat::R8G8B8A8Unorm);
        assert_eq!(translate_image_format(39).unwrap(), PixelFormat::R8Uint);
        assert!(translate_image_format(40).is_err());
    }
}
