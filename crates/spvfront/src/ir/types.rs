//! IR type definitions.
//!
//! These types describe the structured SSA intermediate representation that
//! SPIR-V functions are translated into. Every value is a `VarId` defined by
//! exactly one instruction, control flow is a tree of blocks, ifs and loops,
//! and memory is reached through explicit deref values.

use rspirv::spirv::BuiltIn;
use std::fmt;

/// Unique identifier for an SSA value within one function.
/// Values are numbered sequentially: v0, v1, v2, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index into `Shader::functions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Placeholder left at the end of a translated SPIR-V block so that code can
/// be inserted there after the whole function has been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub u32);

/// A variable, either shader-level (`Shader::variables`) or function-local
/// (`IrFunction::locals`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableRef {
    Global(u32),
    Local(u32),
}

// ── Value types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Int,
    Uint,
    Float,
    /// Address of a memory location produced by a deref instruction.
    Deref,
}

/// Type of an SSA value: a scalar or a vector of up to 16 components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrType {
    pub base: BaseType,
    pub bit_size: u8,
    pub components: u8,
}

impl IrType {
    pub const BOOL: IrType = IrType::scalar(BaseType::Bool, 1);
    pub const U32: IrType = IrType::scalar(BaseType::Uint, 32);
    pub const I32: IrType = IrType::scalar(BaseType::Int, 32);
    pub const F32: IrType = IrType::scalar(BaseType::Float, 32);
    pub const DEREF: IrType = IrType::scalar(BaseType::Deref, 32);

    pub const fn scalar(base: BaseType, bit_size: u8) -> Self {
        Self {
            base,
            bit_size,
            components: 1,
        }
    }

    pub const fn vector(base: BaseType, bit_size: u8, components: u8) -> Self {
        Self {
            base,
            bit_size,
            components,
        }
    }

    /// Same base type and bit size with a different component count.
    pub fn with_components(self, components: u8) -> Self {
        Self { components, ..self }
    }

    pub fn scalar_type(self) -> Self {
        self.with_components(1)
    }

    pub fn with_base(self, base: BaseType) -> Self {
        Self { base, ..self }
    }

    pub fn is_float(self) -> bool {
        self.base == BaseType::Float
    }

    pub fn is_bool(self) -> bool {
        self.base == BaseType::Bool
    }

    pub fn is_integer(self) -> bool {
        matches!(self.base, BaseType::Int | BaseType::Uint)
    }

    /// Size in bytes of one component as stored in memory. Booleans occupy
    /// 32 bits in externally visible memory.
    pub fn component_bytes(self) -> u32 {
        if self.is_bool() {
            4
        } else {
            u32::from(self.bit_size) / 8
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base {
            BaseType::Bool => "b",
            BaseType::Int => "i",
            BaseType::Uint => "u",
            BaseType::Float => "f",
            BaseType::Deref => return write!(f, "deref"),
        };
        if self.components == 1 {
            write!(f, "{base}{}", self.bit_size)
        } else {
            write!(f, "{base}{}x{}", self.bit_size, self.components)
        }
    }
}

/// Constant payload: one bit pattern per component, truncated to `bit_size`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstValue {
    pub ty: IrType,
    pub bits: Vec<u64>,
}

impl ConstValue {
    pub fn new(ty: IrType, bits: Vec<u64>) -> Self {
        let mask = bit_mask(ty.bit_size);
        Self {
            ty,
            bits: bits.into_iter().map(|b| b & mask).collect(),
        }
    }

    pub fn u32(value: u32) -> Self {
        Self::new(IrType::U32, vec![u64::from(value)])
    }

    pub fn i32(value: i32) -> Self {
        Self::new(IrType::I32, vec![value as u32 as u64])
    }

    pub fn bool(value: bool) -> Self {
        Self::new(IrType::BOOL, vec![u64::from(value)])
    }

    pub fn f32(value: f32) -> Self {
        Self::new(IrType::F32, vec![u64::from(value.to_bits())])
    }

    /// Float constant of the given bit size.
    pub fn float(bit_size: u8, value: f64) -> Self {
        let ty = IrType::scalar(BaseType::Float, bit_size);
        Self::new(ty, vec![float_to_bits(value, bit_size)])
    }

    /// Replicate a scalar across `components` lanes.
    pub fn splat(&self, components: u8) -> Self {
        Self {
            ty: self.ty.with_components(components),
            bits: vec![self.bits[0]; usize::from(components)],
        }
    }

    pub fn component(&self, i: usize) -> Self {
        Self {
            ty: self.ty.scalar_type(),
            bits: vec![self.bits[i]],
        }
    }

    /// Component `i` zero-extended.
    pub fn as_u64(&self, i: usize) -> u64 {
        self.bits[i]
    }

    /// Component `i` sign-extended from `bit_size`.
    pub fn as_i64(&self, i: usize) -> i64 {
        sign_extend(self.bits[i], self.ty.bit_size)
    }

    /// Component `i` interpreted as a float of `bit_size`.
    pub fn as_f64(&self, i: usize) -> f64 {
        bits_to_float(self.bits[i], self.ty.bit_size)
    }
}

pub fn bit_mask(bit_size: u8) -> u64 {
    if bit_size >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_size) - 1
    }
}

pub fn sign_extend(bits: u64, bit_size: u8) -> i64 {
    if bit_size >= 64 {
        bits as i64
    } else {
        let shift = 64 - u32::from(bit_size);
        ((bits << shift) as i64) >> shift
    }
}

pub fn bits_to_float(bits: u64, bit_size: u8) -> f64 {
    match bit_size {
        16 => f64::from(half_to_f32(bits as u16)),
        32 => f64::from(f32::from_bits(bits as u32)),
        _ => f64::from_bits(bits),
    }
}

pub fn float_to_bits(value: f64, bit_size: u8) -> u64 {
    match bit_size {
        16 => u64::from(f32_to_half(value as f32)),
        32 => u64::from((value as f32).to_bits()),
        _ => value.to_bits(),
    }
}

/// IEEE half to single conversion.
pub fn half_to_f32(h: u16) -> f32 {
    let sign = u32::from(h >> 15) << 31;
    let exp = u32::from((h >> 10) & 0x1f);
    let man = u32::from(h & 0x3ff);
    let bits = match (exp, man) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: renormalize.
            let mut e = 127 - 15 + 1;
            let mut m = man;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (e << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7fc0_0000 | (man << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (man << 13),
    };
    f32::from_bits(bits)
}

/// IEEE single to half conversion, rounding to nearest even.
pub fn f32_to_half(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let man = bits & 0x7f_ffff;
    if exp == 0xff {
        let nan = if man != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan;
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = man | 0x80_0000;
        let shift = (14 - e) as u32;
        let half = 1u32 << (shift - 1);
        let rest = m & ((1 << shift) - 1);
        let mut out = m >> shift;
        if rest > half || (rest == half && out & 1 == 1) {
            out += 1;
        }
        return sign | out as u16;
    }
    let mut out = ((e as u32) << 10) | (man >> 13);
    let rest = man & 0x1fff;
    if rest > 0x1000 || (rest == 0x1000 && out & 1 == 1) {
        out += 1;
    }
    sign | out as u16
}

/// Constant tree used for variable initializers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrConstant {
    Value(ConstValue),
    Composite(Vec<IrConstant>),
    Undef,
}

// ── Memory types ─────────────────────────────────────────────────────────────

/// Layout-carrying type of a variable or deref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemType {
    /// Scalars are single-component vectors.
    Vector(IrType),
    Matrix {
        column: IrType,
        columns: u8,
        row_major: bool,
        stride: u32,
    },
    /// `length == 0` marks a runtime-sized array.
    Array {
        element: Box<MemType>,
        length: u32,
        stride: u32,
    },
    Struct(Vec<MemField>),
    Image(ImageInfo),
    Sampler,
    SampledImage(ImageInfo),
}

impl MemType {
    /// Value type of a vector-like memory type.
    pub fn value_type(&self) -> Option<IrType> {
        match self {
            MemType::Vector(ty) => Some(*ty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemField {
    pub name: Option<String>,
    pub ty: MemType,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDim {
    D1,
    D2,
    D3,
    Cube,
    Rect,
    Buffer,
    SubpassData,
}

impl ImageDim {
    /// Coordinate components needed to address a texel, array layer excluded.
    pub fn coordinate_components(self) -> u8 {
        match self {
            ImageDim::D1 | ImageDim::Buffer => 1,
            ImageDim::D2 | ImageDim::Rect | ImageDim::SubpassData => 2,
            ImageDim::D3 | ImageDim::Cube => 3,
        }
    }
}

/// Pixel formats of storage images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    None,
    R32G32B32A32Float,
    R16G16B16A16Float,
    R32Float,
    R8G8B8A8Unorm,
    R8G8B8A8Snorm,
    R32G32Float,
    R16G16Float,
    R11G11B10Float,
    R16Float,
    R16G16B16A16Unorm,
    R10G10B10A2Unorm,
    R16G16Unorm,
    R8G8Unorm,
    R16Unorm,
    R8Unorm,
    R16G16B16A16Snorm,
    R16G16Snorm,
    R8G8Snorm,
    R16Snorm,
    R8Snorm,
    R32G32B32A32Sint,
    R16G16B16A16Sint,
    R8G8B8A8Sint,
    R32Sint,
    R32G32Sint,
    R16G16Sint,
    R8G8Sint,
    R16Sint,
    R8Sint,
    R32G32B32A32Uint,
    R16G16B16A16Uint,
    R8G8B8A8Uint,
    R32Uint,
    R10G10B10A2Uint,
    R32G32Uint,
    R16G16Uint,
    R8G8Uint,
    R16Uint,
    R8Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    pub dim: ImageDim,
    pub arrayed: bool,
    pub multisampled: bool,
    pub shadow: bool,
    /// Base type of a texel fetch or sample result.
    pub sampled_type: BaseType,
    /// Storage image (read/write through image intrinsics) rather than sampled.
    pub storage: bool,
    pub format: PixelFormat,
}

// ── Variables ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableMode {
    ShaderIn,
    ShaderOut,
    Private,
    Function,
    /// Opaque uniforms: images, samplers and atomic counters.
    Uniform,
    Ubo,
    Ssbo,
    PushConstant,
    Shared,
    Global,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Interpolation {
    #[default]
    Smooth,
    Flat,
    NoPerspective,
}

/// Memory access qualifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Access {
    pub non_writable: bool,
    pub non_readable: bool,
    pub coherent: bool,
    pub volatile: bool,
    pub restrict: bool,
}

/// Interface and binding metadata of a variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableData {
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub index: Option<u32>,
    pub binding: Option<u32>,
    pub descriptor_set: Option<u32>,
    pub input_attachment_index: Option<u32>,
    pub builtin: Option<BuiltIn>,
    pub interpolation: Interpolation,
    pub centroid: bool,
    pub sample: bool,
    pub patch: bool,
    pub invariant: bool,
    pub access: Access,
    pub offset: Option<u32>,
    pub xfb_buffer: Option<u32>,
    pub xfb_stride: Option<u32>,
    pub stream: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrVariable {
    pub name: Option<String>,
    pub mode: VariableMode,
    pub ty: MemType,
    pub data: VariableData,
    pub initializer: Option<IrConstant>,
}

/// An externally addressed buffer block. These have no backing variable;
/// accesses go through resource indices built from set and binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: Option<String>,
    pub mode: VariableMode,
    pub descriptor_set: u32,
    pub binding: u32,
    pub ty: MemType,
}

// ── Instructions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Mov,
    /// Build a vector from scalar sources.
    Vec,

    // Float arithmetic
    FNeg,
    FAbs,
    FSign,
    FFloor,
    FCeil,
    FTrunc,
    FFract,
    FRoundEven,
    FSqrt,
    FRsq,
    FRcp,
    FExp2,
    FLog2,
    FSin,
    FCos,
    FPow,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FMod,
    FMin,
    FMax,
    FFma,
    FLrp,
    FCopysign,
    FLdexp,
    FrexpSig,
    FrexpExp,
    FQuantize2F16,
    FDdx,
    FDdy,
    FDdxFine,
    FDdyFine,
    FDdxCoarse,
    FDdyCoarse,

    // Integer arithmetic
    INeg,
    IAbs,
    ISign,
    IAdd,
    ISub,
    IMul,
    IDiv,
    UDiv,
    IRem,
    IMod,
    UMod,
    IMin,
    IMax,
    UMin,
    UMax,
    UMulHigh,
    IMulHigh,
    UAddCarry,
    USubBorrow,

    // Bitwise (also the boolean logic ops)
    IAnd,
    IOr,
    IXor,
    INot,
    IShl,
    IShr,
    UShr,
    BitCount,
    BitfieldReverse,
    BitfieldInsert,
    IBitfieldExtract,
    UBitfieldExtract,
    FindLsb,
    IFindMsb,
    UFindMsb,

    // Comparisons, producing booleans
    FEq,
    FNe,
    FLt,
    FGe,
    IEq,
    INe,
    ILt,
    IGe,
    ULt,
    UGe,

    BCsel,
    /// Horizontal OR of a boolean vector.
    BAny,
    /// Horizontal AND of a boolean vector.
    BAll,

    // Conversions; the destination type selects the result width.
    F2F,
    F2I,
    F2U,
    I2F,
    U2F,
    I2I,
    U2U,
    B2F,
    B2I,
    /// Reinterpret bits; component counts may differ when total size matches.
    Bitcast,

    // Packing
    PackSnorm4x8,
    PackUnorm4x8,
    PackSnorm2x16,
    PackUnorm2x16,
    PackHalf2x16,
    UnpackSnorm4x8,
    UnpackUnorm4x8,
    UnpackSnorm2x16,
    UnpackUnorm2x16,
    UnpackHalf2x16,
    PackDouble2x32,
    UnpackDouble2x32,
}

impl AluOp {
    /// Ops whose result is a boolean regardless of the operand types.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            AluOp::FEq
                | AluOp::FNe
                | AluOp::FLt
                | AluOp::FGe
                | AluOp::IEq
                | AluOp::INe
                | AluOp::ILt
                | AluOp::IGe
                | AluOp::ULt
                | AluOp::UGe
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOp {
    Add,
    IMin,
    UMin,
    IMax,
    UMax,
    And,
    Or,
    Xor,
    Exchange,
    CompSwap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// `indices = [descriptor_set, binding]`, `srcs = [array_index]`.
    ResourceIndex,
    /// `srcs = [resource_index, offset]`.
    ResourceReindex,
    /// `srcs = [resource_index]`, result is a deref base for casts.
    LoadDescriptor,
    /// `srcs = [block_index, offset]`.
    LoadUbo,
    LoadSsbo,
    /// `srcs = [value, block_index, offset]`, `indices = [write_mask]`.
    StoreSsbo,
    /// `srcs = [offset]`.
    LoadPushConstant,
    LoadShared,
    /// `srcs = [value, offset]`, `indices = [write_mask]`.
    StoreShared,
    /// `srcs = [block_index, offset, data..]`.
    SsboAtomic(AtomicOp),
    /// `srcs = [offset, data..]`.
    SharedAtomic(AtomicOp),
    /// `srcs = [deref, data..]`.
    DerefAtomic(AtomicOp),
    /// `srcs = [image_deref, coord, sample, data..]`.
    ImageAtomic(AtomicOp),
    /// `srcs = [image_deref, coord, sample]`.
    ImageLoad,
    /// `srcs = [image_deref, coord, sample, value]`.
    ImageStore,
    ImageSize,
    ImageSamples,
    /// `srcs = [deref of runtime array]`.
    DerefBufferArrayLength,
    /// `srcs = [block_index]`.
    GetBufferSize,
    Barrier,
    MemoryBarrier,
    GroupMemoryBarrier,
    MemoryBarrierBuffer,
    MemoryBarrierShared,
    MemoryBarrierAtomicCounter,
    MemoryBarrierImage,
    Discard,
    /// `indices = [stream]`.
    EmitVertex,
    EndPrimitive,
    InterpolateAtCentroid,
    InterpolateAtSample,
    InterpolateAtOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerefKind {
    Var(VariableRef),
    Struct { parent: VarId, member: u32 },
    Array { parent: VarId, index: VarId },
    PtrAsArray { parent: VarId, index: VarId },
    /// Reinterpret a descriptor as the root of a block.
    Cast {
        parent: VarId,
        mode: VariableMode,
        ty: Box<MemType>,
        stride: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexOp {
    Tex,
    Txb,
    Txl,
    Txd,
    Txf,
    TxfMs,
    Txs,
    Lod,
    Tg4,
    QueryLevels,
    TextureSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexSrc {
    TextureDeref,
    SamplerDeref,
    Coord,
    Projector,
    Comparator,
    Bias,
    Lod,
    Ddx,
    Ddy,
    Offset,
    MsIndex,
    MinLod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexInstr {
    pub dest: VarId,
    pub op: TexOp,
    pub sources: Vec<(TexSrc, VarId)>,
    pub dim: ImageDim,
    pub is_array: bool,
    pub is_shadow: bool,
    /// Shadow lookup returning a single comparison result.
    pub is_new_style_shadow: bool,
    pub coord_components: u8,
    /// Gathered component for `Tg4`.
    pub component: u8,
    pub dest_type: BaseType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrInstr {
    Const {
        dest: VarId,
        value: ConstValue,
    },
    Undef {
        dest: VarId,
        ty: IrType,
    },
    Alu {
        dest: VarId,
        op: AluOp,
        srcs: Vec<VarId>,
    },
    /// Pick (and possibly repeat) components of a vector.
    Swizzle {
        dest: VarId,
        src: VarId,
        components: Vec<u8>,
    },
    Deref {
        dest: VarId,
        kind: DerefKind,
    },
    Load {
        dest: VarId,
        deref: VarId,
    },
    Store {
        deref: VarId,
        value: VarId,
        write_mask: u8,
    },
    Copy {
        dest: VarId,
        src: VarId,
    },
    Intrinsic {
        dest: Option<VarId>,
        op: Intrinsic,
        srcs: Vec<VarId>,
        indices: Vec<u32>,
    },
    Tex(Box<TexInstr>),
    Call {
        dests: Vec<VarId>,
        function: FunctionId,
        args: Vec<VarId>,
    },
    /// Insertion point; removed when the function is finished.
    Marker(MarkerId),
}

// ── Control flow ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jump {
    Break,
    Continue,
    Return { values: Vec<VarId> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrBlock {
    pub instructions: Vec<IrInstr>,
    /// `None` falls through to the next node.
    pub jump: Option<Jump>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrIf {
    pub condition: VarId,
    pub then_body: Vec<CfNode>,
    pub else_body: Vec<CfNode>,
}

/// Falling off the end of the body starts the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrLoop {
    pub body: Vec<CfNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfNode {
    Block(IrBlock),
    If(IrIf),
    Loop(IrLoop),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrFunction {
    pub name: Option<String>,
    pub params: Vec<VarId>,
    pub results: Vec<IrType>,
    pub locals: Vec<IrVariable>,
    pub body: Vec<CfNode>,
    /// Type of every SSA value, indexed by `VarId`.
    pub var_types: Vec<IrType>,
}

impl IrFunction {
    pub fn var_type(&self, var: VarId) -> IrType {
        self.var_types[var.0 as usize]
    }
}

// ── Shader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
    Quads,
    Isolines,
    LineStrip,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DepthLayout {
    #[default]
    None,
    Any,
    Greater,
    Less,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TessSpacing {
    Equal,
    FractionalEven,
    FractionalOdd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentInfo {
    pub early_fragment_tests: bool,
    pub depth_layout: DepthLayout,
    pub origin_upper_left: bool,
    pub pixel_center_integer: bool,
    pub stencil_ref_replacing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryInfo {
    pub input_primitive: Option<Primitive>,
    pub output_primitive: Option<Primitive>,
    pub vertices_in: u32,
    pub vertices_out: u32,
    pub invocations: u32,
}

impl Default for GeometryInfo {
    fn default() -> Self {
        Self {
            input_primitive: None,
            output_primitive: None,
            vertices_in: 0,
            vertices_out: 0,
            invocations: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TessInfo {
    pub primitive_mode: Option<Primitive>,
    pub spacing: Option<TessSpacing>,
    pub ccw: bool,
    pub point_mode: bool,
    pub vertices_out: u32,
}

/// Stage metadata gathered from execution modes and builtins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    /// Bytes of shared memory assigned by offset lowering.
    pub shared_size: u32,
    pub uses_discard: bool,
    pub fragment: FragmentInfo,
    pub geometry: GeometryInfo,
    pub tess: TessInfo,
}

impl ShaderInfo {
    pub fn new(stage: ShaderStage, entry_point: &str) -> Self {
        Self {
            stage,
            entry_point: entry_point.to_string(),
            workgroup_size: [0; 3],
            shared_size: 0,
            uses_discard: false,
            fragment: FragmentInfo::default(),
            geometry: GeometryInfo::default(),
            tess: TessInfo::default(),
        }
    }
}

/// Result of translating one entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    pub info: ShaderInfo,
    pub variables: Vec<IrVariable>,
    pub bindings: Vec<ResourceBinding>,
    pub functions: Vec<IrFunction>,
    pub entry_point: FunctionId,
    pub warnings: Vec<String>,
}

impl Shader {
    pub fn entry_function(&self) -> &IrFunction {
        &self.functions[self.entry_point.0 as usize]
    }
}
