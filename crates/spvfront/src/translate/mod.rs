//! SPIR-V to IR translation.
//!
//! The [`Translator`] owns everything one translation needs: the value table,
//! decorations, the per-function control-flow skeletons and the IR builder.
//! The module is read in four walks over the word stream:
//!
//! 1. the preamble (capabilities, imports, entry points, names, decorations),
//! 2. types, constants and global variables,
//! 3. block discovery for every function,
//! 4. emission of the functions reachable from the selected entry point.

mod alu;
mod atomics;
mod cfg;
mod composite;
mod constants;
mod decorations;
mod emit;
mod function;
mod glsl450;
mod image;
mod matrix;
mod opencl;
mod pointers;
mod types;
mod values;
mod variables;

use crate::ir::{
    FunctionBuilder, FunctionId, IrFunction, IrVariable, MarkerId, ResourceBinding, Shader, ShaderInfo,
    ShaderStage,
};
use crate::parser::{parse_header, Instruction, InstructionReader, SourceLocation, HEADER_WORDS};
pub(crate) use crate::{Capabilities, SpecOverride, TranslateOptions};
use anyhow::{bail, Context, Result};
use cfg::{CfgBlock, FunctionInfo, OpenBlock};
use decorations::Decorations;
use emit::PhiShadow;
use pointers::{Link, Pointer};
use rspirv::spirv::{AddressingModel, Capability, ExecutionModel, MemoryModel, Op};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, warn};
use types::SpirvType;
use values::{ExtSet, SpvId, SsaValue, Value, ValueTable};
use variables::VariableInfo;

/// An `OpEntryPoint` declaration.
#[derive(Debug, Clone)]
struct EntryPointDecl {
    stage: Option<ShaderStage>,
    function: SpvId,
    name: String,
}

fn stage_for_model(model: ExecutionModel) -> Option<ShaderStage> {
    Some(match model {
        ExecutionModel::Vertex => ShaderStage::Vertex,
        ExecutionModel::TessellationControl => ShaderStage::TessControl,
        ExecutionModel::TessellationEvaluation => ShaderStage::TessEval,
        ExecutionModel::Geometry => ShaderStage::Geometry,
        ExecutionModel::Fragment => ShaderStage::Fragment,
        ExecutionModel::GLCompute => ShaderStage::Compute,
        _ => return None,
    })
}

/// Translation state for one module and one entry point.
pub(crate) struct Translator<'a> {
    words: &'a [u32],
    options: &'a TranslateOptions,
    specs: &'a [SpecOverride],
    stage: ShaderStage,
    entry_name: &'a str,
    location: SourceLocation,

    values: ValueTable,
    decorations: Decorations,
    names: HashMap<SpvId, String>,
    member_names: HashMap<(SpvId, u32), String>,
    entry_points: Vec<EntryPointDecl>,
    info: ShaderInfo,
    /// Constant decorated `BuiltIn WorkgroupSize`; overrides `LocalSize`.
    workgroup_size_builtin: Option<SpvId>,

    vars: Vec<VariableInfo>,
    shader_vars: Vec<IrVariable>,
    bindings: Vec<ResourceBinding>,
    warnings: Vec<String>,

    // Block discovery
    functions: Vec<FunctionInfo>,
    blocks: Vec<CfgBlock>,
    labels: HashMap<SpvId, usize>,
    result_types: HashMap<SpvId, SpvId>,
    cfg_function: Option<usize>,
    cfg_block: Option<OpenBlock>,

    // Emission
    function_ids: HashMap<usize, FunctionId>,
    emit_queue: VecDeque<usize>,
    ir_functions: Vec<Option<IrFunction>>,

    // Per-function state, reset before each function is emitted
    builder: FunctionBuilder,
    const_cache: HashMap<SpvId, Rc<SsaValue>>,
    phis: Vec<PhiShadow>,
    block_ends: HashMap<usize, MarkerId>,
    has_loop_continue: bool,
    current_function: Option<usize>,
    sampler_forwards: HashMap<(usize, Vec<Link>), Rc<Pointer>>,
}

impl<'a> Translator<'a> {
    pub(crate) fn new(
        words: &'a [u32],
        stage: ShaderStage,
        entry_name: &'a str,
        specs: &'a [SpecOverride],
        options: &'a TranslateOptions,
    ) -> Result<Self> {
        let header = parse_header(words)?;
        debug!(
            version = %format_args!("{}.{}", header.major(), header.minor()),
            generator = header.generator,
            bound = header.bound,
            "read module header"
        );
        Ok(Self {
            words,
            options,
            specs,
            stage,
            entry_name,
            location: SourceLocation::default(),
            values: ValueTable::new(header.bound),
            decorations: Decorations::default(),
            names: HashMap::new(),
            member_names: HashMap::new(),
            entry_points: Vec::new(),
            info: ShaderInfo::new(stage, entry_name),
            workgroup_size_builtin: None,
            vars: Vec::new(),
            shader_vars: Vec::new(),
            bindings: Vec::new(),
            warnings: Vec::new(),
            functions: Vec::new(),
            blocks: Vec::new(),
            labels: HashMap::new(),
            result_types: HashMap::new(),
            cfg_function: None,
            cfg_block: None,
            function_ids: HashMap::new(),
            emit_queue: VecDeque::new(),
            ir_functions: Vec::new(),
            builder: FunctionBuilder::new(),
            const_cache: HashMap::new(),
            phis: Vec::new(),
            block_ends: HashMap::new(),
            has_loop_continue: false,
            current_function: None,
            sampler_forwards: HashMap::new(),
        })
    }

    /// Run every pass and assemble the shader.
    pub(crate) fn run(mut self) -> Result<Shader> {
        let end = self.words.len();

        let types_start = self.walk_instructions(HEADER_WORDS, end, Self::handle_preamble)?;
        self.decorations.flatten()?;
        let entry = self.find_entry_point()?;
        debug!(entry = %entry.function, "preamble done");

        let functions_start = self.walk_instructions(types_start, end, Self::handle_global)?;
        self.apply_execution_modes(entry.function)?;
        self.apply_workgroup_size_builtin()?;

        self.walk_instructions(functions_start, end, Self::handle_cfg_instruction)?;
        if self.cfg_function.is_some() {
            bail!("module ends inside a function");
        }

        let entry_index = self
            .values
            .function(entry.function)
            .with_context(|| format!("entry point `{}` does not name a function", entry.name))?;
        self.emit_functions(entry_index)?;

        let functions = self
            .ir_functions
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.with_context(|| format!("function {i} was referenced but never emitted")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Shader {
            info: self.info,
            variables: self.shader_vars,
            bindings: self.bindings,
            functions,
            entry_point: FunctionId(0),
            warnings: self.warnings,
        })
    }

    // ── Walking ──────────────────────────────────────────────────────────

    /// Feed instructions in `start..end` to `handler` until it returns false.
    /// Returns the offset of the instruction that stopped the walk, or `end`.
    fn walk_instructions(
        &mut self,
        start: usize,
        end: usize,
        mut handler: impl FnMut(&mut Self, &Instruction<'a>) -> Result<bool>,
    ) -> Result<usize> {
        let mut reader = InstructionReader::with_location(self.words, start, end, self.location);
        loop {
            let Some(inst) = reader.next_instruction()? else {
                self.location = reader.location();
                return Ok(end);
            };
            self.location = reader.location();
            let keep_going = handler(self, &inst).with_context(|| self.describe_instruction(&inst))?;
            if !keep_going {
                return Ok(inst.offset);
            }
        }
    }

    fn describe_instruction(&self, inst: &Instruction<'_>) -> String {
        let mut msg = format!("translating {} at word {}", inst.name(), inst.offset);
        if let Some(file) = self.location.file {
            let file = self
                .values
                .string(SpvId(file))
                .map(str::to_string)
                .unwrap_or_else(|_| format!("%{file}"));
            msg.push_str(&format!(" ({}:{}:{})", file, self.location.line, self.location.column));
        }
        msg
    }

    /// Non-fatal diagnostic: logged and kept on the shader.
    fn warn(&mut self, message: String) {
        warn!(location = %self.location, "{message}");
        self.warnings.push(message);
    }

    // ── Preamble ─────────────────────────────────────────────────────────

    fn handle_preamble(&mut self, inst: &Instruction<'_>) -> Result<bool> {
        let op = inst.op().with_context(|| format!("unknown opcode {}", inst.opcode))?;
        match op {
            Op::Nop | Op::Source | Op::SourceContinued | Op::SourceExtension | Op::ModuleProcessed => {}
            Op::String => {
                let (s, _) = inst.string(2)?;
                self.values.define(SpvId(inst.word(1)?), Value::String(s))?;
            }
            Op::Name => {
                let (name, _) = inst.string(2)?;
                if !name.is_empty() {
                    self.names.insert(SpvId(inst.word(1)?), name);
                }
            }
            Op::MemberName => {
                let (name, _) = inst.string(3)?;
                self.member_names.insert((SpvId(inst.word(1)?), inst.word(2)?), name);
            }
            Op::Extension => {
                let (name, _) = inst.string(1)?;
                debug!(extension = %name, "module extension");
            }
            Op::Capability => self.handle_capability(inst.word(1)?)?,
            Op::ExtInstImport => {
                let (name, _) = inst.string(2)?;
                let set = match name.as_str() {
                    "GLSL.std.450" => ExtSet::Glsl450,
                    "OpenCL.std" => ExtSet::OpenCl,
                    _ => bail!("unsupported extended instruction set `{name}`"),
                };
                self.values.define(SpvId(inst.word(1)?), Value::ExtensionHandler(set))?;
            }
            Op::MemoryModel => {
                let addressing = inst.word(1)?;
                if AddressingModel::from_u32(addressing) != Some(AddressingModel::Logical) {
                    bail!("addressing model {addressing} is not supported; only Logical is");
                }
                let memory = inst.word(2)?;
                match MemoryModel::from_u32(memory) {
                    Some(MemoryModel::Simple | MemoryModel::GLSL450 | MemoryModel::Vulkan) => {}
                    _ => bail!("memory model {memory} is not supported"),
                }
            }
            Op::EntryPoint => {
                let model = inst.word(1)?;
                let model = ExecutionModel::from_u32(model).with_context(|| format!("unknown execution model {model}"))?;
                let (name, _) = inst.string(3)?;
                self.entry_points.push(EntryPointDecl {
                    stage: stage_for_model(model),
                    function: SpvId(inst.word(2)?),
                    name,
                });
            }
            Op::ExecutionMode | Op::ExecutionModeId => self.handle_execution_mode_decl(inst)?,
            Op::Decorate
            | Op::DecorateId
            | Op::DecorateString
            | Op::MemberDecorate
            | Op::MemberDecorateString
            | Op::DecorationGroup
            | Op::GroupDecorate
            | Op::GroupMemberDecorate => self.handle_decoration(inst)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn handle_capability(&mut self, raw: u32) -> Result<()> {
        let cap = Capability::from_u32(raw).with_context(|| format!("unknown capability {raw}"))?;
        let caps = &self.options.supported_capabilities;
        let supported = match cap {
            Capability::Matrix
            | Capability::Shader
            | Capability::ClipDistance
            | Capability::CullDistance
            | Capability::ImageCubeArray
            | Capability::SampledCubeArray
            | Capability::ImageRect
            | Capability::SampledRect
            | Capability::Sampled1D
            | Capability::Image1D
            | Capability::SampledBuffer
            | Capability::ImageBuffer
            | Capability::ImageQuery
            | Capability::InterpolationFunction
            | Capability::SampleRateShading
            | Capability::DerivativeControl
            | Capability::MinLod
            | Capability::MultiViewport
            | Capability::InputAttachment
            | Capability::StorageImageExtendedFormats
            | Capability::ImageGatherExtended
            | Capability::UniformBufferArrayDynamicIndexing
            | Capability::SampledImageArrayDynamicIndexing
            | Capability::StorageBufferArrayDynamicIndexing
            | Capability::StorageImageArrayDynamicIndexing
            | Capability::TessellationPointSize
            | Capability::GeometryPointSize => true,

            Capability::Float64 => caps.float64,
            Capability::Int64 => caps.int64,
            Capability::Int64Atomics => caps.int64_atomics,
            Capability::Int16 => caps.int16,
            Capability::Geometry => caps.geometry,
            Capability::GeometryStreams => caps.geometry_streams,
            Capability::Tessellation => caps.tessellation,
            Capability::ImageMSArray => caps.image_ms_array,
            Capability::StorageImageMultisample => caps.storage_image_multisample,
            Capability::StorageImageReadWithoutFormat => caps.image_read_without_format,
            Capability::StorageImageWriteWithoutFormat => caps.image_write_without_format,
            Capability::MultiView => caps.multiview,
            Capability::VariablePointers | Capability::VariablePointersStorageBuffer => caps.variable_pointers,
            Capability::DrawParameters => caps.draw_parameters,
            Capability::ShaderViewportIndexLayerEXT => self.options.shader_viewport_index_layer_supported,

            Capability::Addresses
            | Capability::Kernel
            | Capability::Pipes
            | Capability::DeviceEnqueue
            | Capability::LiteralSampler
            | Capability::GenericPointer
            | Capability::PhysicalStorageBufferAddresses => {
                bail!("capability {cap:?} is not supported")
            }
            _ => false,
        };
        if !supported {
            self.warn(format!("unsupported capability {cap:?}"));
        }
        Ok(())
    }

    fn find_entry_point(&self) -> Result<EntryPointDecl> {
        self.entry_points
            .iter()
            .find(|e| e.name == self.entry_name && e.stage == Some(self.stage))
            .cloned()
            .with_context(|| format!("no {:?} entry point named `{}`", self.stage, self.entry_name))
    }

    // ── Globals ──────────────────────────────────────────────────────────

    fn handle_global(&mut self, inst: &Instruction<'_>) -> Result<bool> {
        let op = inst.op().with_context(|| format!("unknown opcode {}", inst.opcode))?;
        match op {
            Op::Nop => {}
            Op::TypeVoid
            | Op::TypeBool
            | Op::TypeInt
            | Op::TypeFloat
            | Op::TypeVector
            | Op::TypeMatrix
            | Op::TypeImage
            | Op::TypeSampler
            | Op::TypeSampledImage
            | Op::TypeArray
            | Op::TypeRuntimeArray
            | Op::TypeStruct
            | Op::TypeOpaque
            | Op::TypePointer
            | Op::TypeFunction
            | Op::TypeEvent
            | Op::TypeDeviceEvent
            | Op::TypeReserveId
            | Op::TypeQueue
            | Op::TypePipe
            | Op::TypeForwardPointer => self.handle_type(inst)?,
            Op::ConstantTrue
            | Op::ConstantFalse
            | Op::Constant
            | Op::ConstantComposite
            | Op::ConstantSampler
            | Op::ConstantNull
            | Op::SpecConstantTrue
            | Op::SpecConstantFalse
            | Op::SpecConstant
            | Op::SpecConstantComposite
            | Op::SpecConstantOp
            | Op::Undef => self.handle_constant(inst)?,
            Op::Variable => self.handle_variable(inst)?,
            Op::Function => return Ok(false),
            _ => bail!("{} is not allowed among the module's global declarations", inst.name()),
        }
        Ok(true)
    }

    fn apply_workgroup_size_builtin(&mut self) -> Result<()> {
        let Some(id) = self.workgroup_size_builtin else {
            return Ok(());
        };
        let c = self.values.constant(id)?;
        let components = constants::flat_components(&c.value, 3);
        for (dst, v) in self.info.workgroup_size.iter_mut().zip(components) {
            *dst = v as u32;
        }
        debug!(size = ?self.info.workgroup_size, "workgroup size from the WorkgroupSize builtin");
        Ok(())
    }

    // ── Function bodies ──────────────────────────────────────────────────

    /// Translate one non-control-flow instruction of a function body.
    fn handle_body_instruction(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let op = inst.op().with_context(|| format!("unknown opcode {}", inst.opcode))?;
        match op {
            Op::Nop | Op::Label | Op::SelectionMerge | Op::LoopMerge | Op::Name | Op::MemberName => {}

            Op::Phi => self.allocate_shadow(inst)?,

            Op::Undef
            | Op::ConstantTrue
            | Op::ConstantFalse
            | Op::Constant
            | Op::ConstantComposite
            | Op::ConstantNull => self.handle_constant(inst)?,

            // Memory
            Op::Variable => self.handle_variable(inst)?,
            Op::Load | Op::AtomicLoad => self.handle_load(inst)?,
            Op::Store | Op::AtomicStore => self.handle_store(inst)?,
            Op::CopyMemory | Op::CopyMemorySized => self.handle_copy_memory(inst)?,
            Op::AccessChain | Op::InBoundsAccessChain => self.handle_access_chain(inst, false)?,
            Op::PtrAccessChain | Op::InBoundsPtrAccessChain => self.handle_access_chain(inst, true)?,
            Op::ArrayLength => self.handle_array_length(inst)?,

            Op::FunctionCall => self.handle_call(inst)?,

            // Composites
            Op::VectorExtractDynamic
            | Op::VectorInsertDynamic
            | Op::VectorShuffle
            | Op::CompositeConstruct
            | Op::CompositeExtract
            | Op::CompositeInsert
            | Op::CopyObject => self.handle_composite(op, inst)?,

            // Textures and images
            Op::SampledImage
            | Op::Image
            | Op::ImageSampleImplicitLod
            | Op::ImageSampleExplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod
            | Op::ImageFetch
            | Op::ImageGather
            | Op::ImageDrefGather
            | Op::ImageQuerySizeLod
            | Op::ImageQuerySize
            | Op::ImageQueryLod
            | Op::ImageQueryLevels
            | Op::ImageQuerySamples => self.handle_texture(op, inst)?,
            Op::ImageTexelPointer | Op::ImageRead | Op::ImageWrite => self.handle_image(op, inst)?,

            Op::AtomicExchange
            | Op::AtomicCompareExchange
            | Op::AtomicCompareExchangeWeak
            | Op::AtomicIIncrement
            | Op::AtomicIDecrement
            | Op::AtomicIAdd
            | Op::AtomicISub
            | Op::AtomicSMin
            | Op::AtomicUMin
            | Op::AtomicSMax
            | Op::AtomicUMax
            | Op::AtomicAnd
            | Op::AtomicOr
            | Op::AtomicXor => self.handle_atomic(op, inst)?,

            Op::ControlBarrier | Op::MemoryBarrier => self.handle_barrier(op, inst)?,
            Op::EmitVertex | Op::EndPrimitive | Op::EmitStreamVertex | Op::EndStreamPrimitive => {
                self.handle_geometry(op, inst)?
            }

            Op::ExtInst => match self.values.ext_set(SpvId(inst.word(3)?))? {
                ExtSet::Glsl450 => self.handle_glsl450(inst)?,
                ExtSet::OpenCl => self.handle_opencl(inst)?,
            },

            // Matrices
            Op::Transpose
            | Op::MatrixTimesScalar
            | Op::VectorTimesMatrix
            | Op::MatrixTimesVector
            | Op::MatrixTimesMatrix
            | Op::OuterProduct => self.handle_matrix(op, inst)?,

            // Arithmetic, logic, comparisons and conversions
            Op::SNegate
            | Op::FNegate
            | Op::IAdd
            | Op::FAdd
            | Op::ISub
            | Op::FSub
            | Op::IMul
            | Op::FMul
            | Op::UDiv
            | Op::SDiv
            | Op::FDiv
            | Op::UMod
            | Op::SRem
            | Op::SMod
            | Op::FRem
            | Op::FMod
            | Op::VectorTimesScalar
            | Op::Dot
            | Op::IAddCarry
            | Op::ISubBorrow
            | Op::UMulExtended
            | Op::SMulExtended
            | Op::ShiftRightLogical
            | Op::ShiftRightArithmetic
            | Op::ShiftLeftLogical
            | Op::BitwiseOr
            | Op::BitwiseXor
            | Op::BitwiseAnd
            | Op::Not
            | Op::BitFieldInsert
            | Op::BitFieldSExtract
            | Op::BitFieldUExtract
            | Op::BitReverse
            | Op::BitCount
            | Op::Any
            | Op::All
            | Op::IsNan
            | Op::IsInf
            | Op::LogicalEqual
            | Op::LogicalNotEqual
            | Op::LogicalOr
            | Op::LogicalAnd
            | Op::LogicalNot
            | Op::Select
            | Op::IEqual
            | Op::INotEqual
            | Op::UGreaterThan
            | Op::SGreaterThan
            | Op::UGreaterThanEqual
            | Op::SGreaterThanEqual
            | Op::ULessThan
            | Op::SLessThan
            | Op::ULessThanEqual
            | Op::SLessThanEqual
            | Op::FOrdEqual
            | Op::FUnordEqual
            | Op::FOrdNotEqual
            | Op::FUnordNotEqual
            | Op::FOrdLessThan
            | Op::FUnordLessThan
            | Op::FOrdGreaterThan
            | Op::FUnordGreaterThan
            | Op::FOrdLessThanEqual
            | Op::FUnordLessThanEqual
            | Op::FOrdGreaterThanEqual
            | Op::FUnordGreaterThanEqual
            | Op::ConvertFToU
            | Op::ConvertFToS
            | Op::ConvertSToF
            | Op::ConvertUToF
            | Op::UConvert
            | Op::SConvert
            | Op::FConvert
            | Op::QuantizeToF16
            | Op::Bitcast
            | Op::DPdx
            | Op::DPdy
            | Op::Fwidth
            | Op::DPdxFine
            | Op::DPdyFine
            | Op::FwidthFine
            | Op::DPdxCoarse
            | Op::DPdyCoarse
            | Op::FwidthCoarse => self.handle_alu(op, inst)?,

            _ => bail!("unsupported instruction {}", inst.name()),
        }
        Ok(())
    }

    // ── Shared helpers ───────────────────────────────────────────────────

    /// The SSA value of `id`, materializing constants on first use in the
    /// current function.
    fn ssa_value(&mut self, id: SpvId) -> Result<Rc<SsaValue>> {
        match self.values.get_untyped(id)? {
            Value::Ssa(v) => Ok(v.clone()),
            Value::Constant(c) => {
                let c = c.clone();
                self.constant_ssa(id, &c)
            }
            other => bail!("ID {id} is a {}, expected a value", other.kind()),
        }
    }

    /// IR value of a scalar or vector operand.
    fn ssa_def(&mut self, id: SpvId) -> Result<crate::ir::VarId> {
        self.ssa_value(id)?.def()
    }

    fn result_type(&self, inst: &Instruction<'_>) -> Result<Rc<SpirvType>> {
        self.values.type_(SpvId(inst.word(1)?))
    }

    fn define_ssa(&mut self, id: SpvId, value: Rc<SsaValue>) -> Result<()> {
        self.values.define(id, Value::Ssa(value))
    }

    /// Define the result of `inst` as a single IR value of its result type.
    fn define_leaf(&mut self, inst: &Instruction<'_>, var: crate::ir::VarId) -> Result<()> {
        let ty = self.result_type(inst)?;
        self.define_ssa(SpvId(inst.word(2)?), SsaValue::leaf(ty, var))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_models_map_to_stages() {
        assert_eq!(stage_for_model(ExecutionModel::GLCompute), Some(ShaderStage::Compute));
        assert_eq!(stage_for_model(ExecutionModel::TessellationEvaluation), Some(ShaderStage::TessEval));
        assert_eq!(stage_for_model(ExecutionModel::Kernel), None);
    }
}
