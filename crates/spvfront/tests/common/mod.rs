//! Shared helpers for the integration tests: module scaffolding on top of
//! `rspirv::dr::Builder` and an interpreter for the structured IR.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use rspirv::binary::Assemble;
use rspirv::dr::Builder;
use rspirv::spirv::{AddressingModel, Capability, FunctionControl, MemoryModel, StorageClass, Word};
use spvfront::ir::fold::eval_alu;
use spvfront::ir::{CfNode, ConstValue, DerefKind, IrFunction, IrInstr, IrType, Jump, Shader, VarId, VariableRef};
use spvfront::{translate, ShaderStage, SpecOverride, TranslateOptions};
use std::collections::HashMap;

// ── Modules ──────────────────────────────────────────────────────────────────

/// A SPIR-V 1.3 `Shader` module with the logical GLSL450 memory model.
pub fn shader_module() -> Builder {
    let mut b = Builder::new();
    b.set_version(1, 3);
    b.capability(Capability::Shader);
    b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
    b
}

/// A global variable with an `OpName`.
pub fn named_variable(b: &mut Builder, ptr_ty: Word, class: StorageClass, name: &str) -> Word {
    let var = b.variable(ptr_ty, None, class, None);
    b.name(var, name);
    var
}

pub fn assemble(b: Builder) -> Vec<u32> {
    b.module().assemble()
}

/// Common scaffolding for single-function shaders.
pub struct Scaffold {
    pub void: Word,
    pub fn_void: Word,
    pub float: Word,
    pub int: Word,
    pub uint: Word,
    pub bool_: Word,
    pub vec4: Word,
    pub main: Word,
}

impl Scaffold {
    pub fn new(b: &mut Builder) -> Self {
        let void = b.type_void();
        let fn_void = b.type_function(void, vec![]);
        let float = b.type_float(32);
        let int = b.type_int(32, 1);
        let uint = b.type_int(32, 0);
        let bool_ = b.type_bool();
        let vec4 = b.type_vector(float, 4);
        let main = b.id();
        Scaffold {
            void,
            fn_void,
            float,
            int,
            uint,
            bool_,
            vec4,
            main,
        }
    }

    /// Open `void main()` and its first block. Returns the block label.
    pub fn begin_main(&self, b: &mut Builder) -> Result<Word> {
        b.begin_function(self.void, Some(self.main), FunctionControl::NONE, self.fn_void)?;
        Ok(b.begin_block(None)?)
    }
}

// ── Translation ──────────────────────────────────────────────────────────────

pub fn translate_module(words: &[u32], stage: ShaderStage) -> Result<Shader> {
    translate(words, stage, "main", &[], &TranslateOptions::default())
}

pub fn translate_with(
    words: &[u32],
    stage: ShaderStage,
    specs: &[SpecOverride],
    options: &TranslateOptions,
) -> Result<Shader> {
    translate(words, stage, "main", specs, options)
}

/// Every instruction of `func`, in tree order.
pub fn instructions(func: &IrFunction) -> Vec<&IrInstr> {
    fn walk<'a>(body: &'a [CfNode], out: &mut Vec<&'a IrInstr>) {
        for node in body {
            match node {
                CfNode::Block(b) => out.extend(b.instructions.iter()),
                CfNode::If(i) => {
                    walk(&i.then_body, out);
                    walk(&i.else_body, out);
                }
                CfNode::Loop(l) => walk(&l.body, out),
            }
        }
    }
    let mut out = Vec::new();
    walk(&func.body, &mut out);
    out
}

/// Fold `var` to a constant through the constants and ALU ops that define it.
pub fn fold_constant(func: &IrFunction, var: VarId) -> Result<ConstValue> {
    let instrs = instructions(func);
    let def = instrs
        .iter()
        .find(|i| match i {
            IrInstr::Const { dest, .. } | IrInstr::Alu { dest, .. } => *dest == var,
            _ => false,
        })
        .with_context(|| format!("{var} is not defined by a constant or ALU op"))?;
    match def {
        IrInstr::Const { value, .. } => Ok(value.clone()),
        IrInstr::Alu { op, srcs, .. } => {
            let values = srcs.iter().map(|s| fold_constant(func, *s)).collect::<Result<Vec<_>>>()?;
            let refs: Vec<&ConstValue> = values.iter().collect();
            eval_alu(*op, func.var_type(var), &refs)
        }
        other => bail!("cannot fold {other:?}"),
    }
}

// ── Interpreter ──────────────────────────────────────────────────────────────

enum Flow {
    Next,
    Break,
    Continue,
    Return(Vec<ConstValue>),
}

/// Runs a shader's entry point over whole-variable memory.
///
/// Only constants, ALU ops, swizzles, variable derefs, loads, stores and
/// calls are understood; intrinsics and texture instructions are skipped.
pub struct Interpreter<'a> {
    shader: &'a Shader,
    pub memory: HashMap<VariableRef, ConstValue>,
    steps: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(shader: &'a Shader) -> Self {
        Self {
            shader,
            memory: HashMap::new(),
            steps: 0,
        }
    }

    fn global(&self, name: &str) -> Result<VariableRef> {
        let index = self
            .shader
            .variables
            .iter()
            .position(|v| v.name.as_deref() == Some(name))
            .with_context(|| format!("no variable named {name}"))?;
        Ok(VariableRef::Global(index as u32))
    }

    pub fn set_input(&mut self, name: &str, value: ConstValue) -> Result<()> {
        let var = self.global(name)?;
        self.memory.insert(var, value);
        Ok(())
    }

    pub fn output(&self, name: &str) -> Result<ConstValue> {
        let var = self.global(name)?;
        self.memory.get(&var).cloned().with_context(|| format!("{name} was never written"))
    }

    pub fn run(&mut self) -> Result<()> {
        let shader = self.shader;
        self.call(shader.entry_function(), &[])?;
        Ok(())
    }

    fn call(&mut self, func: &'a IrFunction, args: &[ConstValue]) -> Result<Vec<ConstValue>> {
        let mut frame = Frame {
            values: HashMap::new(),
            derefs: HashMap::new(),
            locals: HashMap::new(),
        };
        for (param, arg) in func.params.iter().zip(args) {
            frame.values.insert(*param, arg.clone());
        }
        match self.exec(func, &func.body, &mut frame)? {
            Flow::Return(values) => Ok(values),
            Flow::Next => Ok(Vec::new()),
            Flow::Break | Flow::Continue => bail!("break or continue outside a loop"),
        }
    }

    fn exec(&mut self, func: &'a IrFunction, body: &'a [CfNode], frame: &mut Frame) -> Result<Flow> {
        for node in body {
            let flow = match node {
                CfNode::Block(block) => {
                    for instr in &block.instructions {
                        self.step(func, instr, frame)?;
                    }
                    match &block.jump {
                        None => Flow::Next,
                        Some(Jump::Break) => Flow::Break,
                        Some(Jump::Continue) => Flow::Continue,
                        Some(Jump::Return { values }) => {
                            let values = values.iter().map(|v| frame.get(*v)).collect::<Result<_>>()?;
                            Flow::Return(values)
                        }
                    }
                }
                CfNode::If(node) => {
                    let cond = frame.get(node.condition)?;
                    if cond.bits[0] != 0 {
                        self.exec(func, &node.then_body, frame)?
                    } else {
                        self.exec(func, &node.else_body, frame)?
                    }
                }
                CfNode::Loop(l) => loop {
                    self.steps += 1;
                    if self.steps > 10_000 {
                        bail!("loop does not terminate");
                    }
                    match self.exec(func, &l.body, frame)? {
                        Flow::Next | Flow::Continue => continue,
                        Flow::Break => break Flow::Next,
                        ret @ Flow::Return(_) => break ret,
                    }
                },
            };
            if !matches!(flow, Flow::Next) {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn step(&mut self, func: &'a IrFunction, instr: &'a IrInstr, frame: &mut Frame) -> Result<()> {
        match instr {
            IrInstr::Const { dest, value } => {
                frame.values.insert(*dest, value.clone());
            }
            IrInstr::Undef { dest, ty } => {
                frame.values.insert(*dest, zero(*ty));
            }
            IrInstr::Alu { dest, op, srcs } => {
                let values: Vec<ConstValue> = srcs.iter().map(|s| frame.get(*s)).collect::<Result<_>>()?;
                let refs: Vec<&ConstValue> = values.iter().collect();
                let result = eval_alu(*op, func.var_type(*dest), &refs)?;
                frame.values.insert(*dest, result);
            }
            IrInstr::Swizzle { dest, src, components } => {
                let value = frame.get(*src)?;
                let bits = components.iter().map(|&c| value.bits[usize::from(c)]).collect();
                frame.values.insert(*dest, ConstValue::new(func.var_type(*dest), bits));
            }
            IrInstr::Deref { dest, kind } => match kind {
                DerefKind::Var(var) => {
                    frame.derefs.insert(*dest, *var);
                }
                other => bail!("interpreter does not follow {other:?}"),
            },
            IrInstr::Load { dest, deref } => {
                let var = frame.deref(*deref)?;
                let ty = func.var_type(*dest);
                let value = match var {
                    VariableRef::Local(_) => frame.locals.get(&var).cloned(),
                    VariableRef::Global(_) => self.memory.get(&var).cloned(),
                }
                .unwrap_or_else(|| zero(ty));
                frame.values.insert(*dest, value);
            }
            IrInstr::Store {
                deref,
                value,
                write_mask,
            } => {
                let var = frame.deref(*deref)?;
                let value = frame.get(*value)?;
                let memory = match var {
                    VariableRef::Local(_) => &mut frame.locals,
                    VariableRef::Global(_) => &mut self.memory,
                };
                let full = (1u16 << value.bits.len()) - 1;
                let merged = match memory.get(&var) {
                    Some(old) if u16::from(*write_mask) != full && old.bits.len() == value.bits.len() => {
                        let bits = (0..value.bits.len())
                            .map(|i| {
                                if write_mask & (1 << i) != 0 {
                                    value.bits[i]
                                } else {
                                    old.bits[i]
                                }
                            })
                            .collect();
                        ConstValue::new(value.ty, bits)
                    }
                    _ => value,
                };
                memory.insert(var, merged);
            }
            IrInstr::Copy { dest, src } => {
                let (dest, src) = (frame.deref(*dest)?, frame.deref(*src)?);
                let value = match src {
                    VariableRef::Local(_) => frame.locals.get(&src).cloned(),
                    VariableRef::Global(_) => self.memory.get(&src).cloned(),
                }
                .context("copy from an unwritten variable")?;
                match dest {
                    VariableRef::Local(_) => frame.locals.insert(dest, value),
                    VariableRef::Global(_) => self.memory.insert(dest, value),
                };
            }
            IrInstr::Call { dests, function, args } => {
                let args: Vec<ConstValue> = args.iter().map(|a| frame.get(*a)).collect::<Result<_>>()?;
                let shader = self.shader;
                let callee = shader
                    .functions
                    .get(function.0 as usize)
                    .context("call to a missing function")?;
                let results = self.call(callee, &args)?;
                for (dest, value) in dests.iter().zip(results) {
                    frame.values.insert(*dest, value);
                }
            }
            IrInstr::Intrinsic { .. } | IrInstr::Tex(_) | IrInstr::Marker(_) => {}
        }
        Ok(())
    }
}

struct Frame {
    values: HashMap<VarId, ConstValue>,
    derefs: HashMap<VarId, VariableRef>,
    locals: HashMap<VariableRef, ConstValue>,
}

impl Frame {
    fn get(&self, var: VarId) -> Result<ConstValue> {
        self.values.get(&var).cloned().with_context(|| format!("{var} is not defined"))
    }

    fn deref(&self, var: VarId) -> Result<VariableRef> {
        self.derefs.get(&var).copied().with_context(|| format!("{var} is not a deref"))
    }
}

fn zero(ty: IrType) -> ConstValue {
    ConstValue::new(ty, vec![0; usize::from(ty.components)])
}

pub fn f32s(value: &ConstValue) -> Vec<f32> {
    value.bits.iter().map(|&b| f32::from_bits(b as u32)).collect()
}

pub fn vec4(values: [f32; 4]) -> ConstValue {
    ConstValue::new(
        IrType::vector(spvfront::ir::BaseType::Float, 32, 4),
        values.iter().map(|v| u64::from(v.to_bits())).collect(),
    )
}
