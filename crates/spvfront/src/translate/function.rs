//! Functions: the emission worklist, parameters and calls.
//!
//! Only functions reachable from the entry point are emitted. A function gets
//! its `FunctionId` the first time it is referenced (the entry point is 0) and
//! is queued; the queue drains in reference order, which keeps the output
//! independent of where functions sit in the module.

use super::image::SampledImage;
use super::pointers::{Address, Addressing, Pointer, PointerRoot};
use super::types::{SpirvType, TypeKind};
use super::values::{SpvId, SsaValue, Value};
use super::variables::StorageMode;
use super::Translator;
use crate::ir::{repair, FunctionId, IrFunction, IrInstr, IrType, VarId};
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::spirv::StorageClass;
use std::rc::Rc;
use tracing::debug;

impl Translator<'_> {
    /// Emit the entry function and everything it calls.
    pub(super) fn emit_functions(&mut self, entry: usize) -> Result<()> {
        self.function_id(entry);
        while let Some(func) = self.emit_queue.pop_front() {
            let id = self.functions[func].id;
            let ir = self
                .emit_function(func)
                .with_context(|| format!("emitting function {id}"))?;
            let slot = self.function_ids[&func].0 as usize;
            self.ir_functions[slot] = Some(ir);
        }
        Ok(())
    }

    /// IR id of function `func`, queueing it for emission on first use.
    fn function_id(&mut self, func: usize) -> FunctionId {
        if let Some(id) = self.function_ids.get(&func) {
            return *id;
        }
        let id = FunctionId(self.ir_functions.len() as u32);
        self.ir_functions.push(None);
        self.function_ids.insert(func, id);
        self.emit_queue.push_back(func);
        id
    }

    fn emit_function(&mut self, func: usize) -> Result<IrFunction> {
        self.builder.reset();
        self.const_cache.clear();
        self.phis.clear();
        self.block_ends.clear();
        self.sampler_forwards.clear();
        self.has_loop_continue = false;
        self.current_function = Some(func);

        let info = self.functions[func].clone();
        let fn_type = self.values.type_(info.ty)?;
        let TypeKind::Function { params, .. } = &fn_type.kind else {
            bail!("function {} has non-function type {}", info.id, fn_type.describe());
        };
        if params.len() != info.params.len() {
            bail!(
                "function {} declares {} parameters but its type has {}",
                info.id,
                info.params.len(),
                params.len()
            );
        }
        for &(id, ty) in &info.params {
            let ty = self.values.type_(ty)?;
            self.define_param(id, &ty)
                .with_context(|| format!("parameter {id}"))?;
        }

        let body = self.structure_function(func)?;
        self.emit_cf_list(&body, None, &mut false)?;
        let inserts = self.finalize_predecessors()?;

        let ret = self.values.type_(info.return_type)?;
        let mut results = Vec::new();
        leaf_types(&ret, &mut results)?;

        let name = self.names.get(&info.id).cloned();
        let mut ir = self.builder.finish(name, results, inserts)?;
        if self.has_loop_continue {
            let repaired = repair::repair_ssa(&mut ir);
            debug!(function = %info.id, repaired, "repaired SSA after continue constructs");
        }
        debug!(function = %info.id, "emitted function");
        self.current_function = None;
        Ok(ir)
    }

    // ── Parameters ───────────────────────────────────────────────────────

    fn define_param(&mut self, id: SpvId, ty: &Rc<SpirvType>) -> Result<()> {
        let value = match &ty.kind {
            TypeKind::Pointer { storage_class, pointee } => {
                let mode = StorageMode::from_class(*storage_class, pointee)?;
                let addressing = Addressing::for_mode(mode, self.options);
                let root = match addressing {
                    Addressing::Deref => PointerRoot::Deref(self.builder.add_param(IrType::DEREF)),
                    Addressing::Offset => {
                        let block_index = matches!(mode, StorageMode::Ubo | StorageMode::Ssbo)
                            .then(|| self.builder.add_param(IrType::U32));
                        PointerRoot::Offset {
                            block_index,
                            offset: self.builder.add_param(IrType::U32),
                        }
                    }
                };
                Value::Pointer(Rc::new(Pointer {
                    mode,
                    addressing,
                    ty: pointee.clone(),
                    root_ty: pointee.clone(),
                    ptr_type: ty.clone(),
                    root,
                    root_index: None,
                    links: Vec::new(),
                }))
            }
            TypeKind::Image(_) | TypeKind::Sampler => Value::Pointer(self.handle_param(ty)),
            TypeKind::SampledImage(image) => {
                let image = image.clone();
                let sampler = Rc::new(SpirvType::new(ty.id, TypeKind::Sampler));
                Value::SampledImage(Rc::new(SampledImage {
                    ty: ty.clone(),
                    image: self.handle_param(&image),
                    sampler: self.handle_param(&sampler),
                }))
            }
            _ => Value::Ssa(self.value_tree(ty, true)?),
        };
        self.values.define(id, value)
    }

    /// An image or sampler handle passed in as a deref.
    fn handle_param(&mut self, ty: &Rc<SpirvType>) -> Rc<Pointer> {
        let deref = self.builder.add_param(IrType::DEREF);
        let ptr_type = Rc::new(SpirvType::new(
            ty.id,
            TypeKind::Pointer {
                storage_class: StorageClass::UniformConstant,
                pointee: ty.clone(),
            },
        ));
        Rc::new(Pointer {
            mode: StorageMode::UniformConstant,
            addressing: Addressing::Deref,
            ty: ty.clone(),
            root_ty: ty.clone(),
            ptr_type,
            root: PointerRoot::Deref(deref),
            root_index: None,
            links: Vec::new(),
        })
    }

    /// A value of type `ty` made of fresh IR values, one per leaf: function
    /// parameters when `params` is set, call results otherwise.
    fn value_tree(&mut self, ty: &Rc<SpirvType>, params: bool) -> Result<Rc<SsaValue>> {
        if ty.is_vector_or_scalar() {
            let ir_ty = ty.ir_type()?;
            let var = if params {
                self.builder.add_param(ir_ty)
            } else {
                self.builder.new_var(ir_ty)
            };
            return Ok(SsaValue::leaf(ty.clone(), var));
        }
        match &ty.kind {
            TypeKind::Matrix { .. } | TypeKind::Array { .. } | TypeKind::Struct(_) => {
                let mut elems = Vec::with_capacity(ty.length() as usize);
                for i in 0..ty.length() {
                    elems.push(self.value_tree(&ty.child(i)?, params)?);
                }
                Ok(SsaValue::composite(ty.clone(), elems))
            }
            _ => bail!("a {} cannot be passed by value", ty.describe()),
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    pub(super) fn handle_call(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ret = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let func = self.values.function(SpvId(inst.word(3)?))?;
        let callee = self.function_id(func);

        let mut args = Vec::new();
        for &arg in inst.words_from(4) {
            self.push_call_arg(SpvId(arg), &mut args)
                .with_context(|| format!("argument {}", SpvId(arg)))?;
        }

        let result = match ret.kind {
            TypeKind::Void => None,
            _ => Some(self.value_tree(&ret, false)?),
        };
        let mut dests = Vec::new();
        if let Some(value) = &result {
            value.flatten(&mut dests);
        }
        self.builder.emit(IrInstr::Call {
            dests,
            function: callee,
            args,
        });
        if let Some(value) = result {
            self.define_ssa(id, value)?;
        }
        Ok(())
    }

    fn push_call_arg(&mut self, arg: SpvId, args: &mut Vec<VarId>) -> Result<()> {
        match self.values.get_untyped(arg)?.clone() {
            Value::Pointer(ptr) => match ptr.addressing {
                Addressing::Deref => args.push(self.pointer_deref(&ptr)?),
                Addressing::Offset => match ptr.strategy().dereference(self, &ptr)? {
                    Address::Offset { block_index, offset, .. } => {
                        if matches!(ptr.mode, StorageMode::Ubo | StorageMode::Ssbo) {
                            args.push(block_index.context("buffer pointer without a block index")?);
                        }
                        args.push(offset);
                    }
                    Address::Deref { .. } => bail!("offset pointer resolved to a deref"),
                },
            },
            Value::SampledImage(si) => {
                args.push(self.pointer_deref(&si.image)?);
                args.push(self.pointer_deref(&si.sampler)?);
            }
            Value::Ssa(_) | Value::Constant(_) => self.ssa_value(arg)?.flatten(args),
            other => bail!("a {} cannot be passed to a function", other.kind()),
        }
        Ok(())
    }
}

/// IR types of the leaves of `ty`, depth first. `void` has none.
fn leaf_types(ty: &SpirvType, out: &mut Vec<IrType>) -> Result<()> {
    if matches!(ty.kind, TypeKind::Void) {
        return Ok(());
    }
    if ty.is_vector_or_scalar() {
        out.push(ty.ir_type()?);
        return Ok(());
    }
    for i in 0..ty.length() {
        leaf_types(&*ty.child(i)?, out)?;
    }
    Ok(())
}
