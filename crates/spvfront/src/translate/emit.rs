//! Emission of a structured control-flow tree into the IR builder.
//!
//! Switches become a chain of ifs guarded by a "fall" flag: a case runs if
//! its selector matches or the previous case fell into it, and a break
//! clears the flag, which then guards everything after the break. Non-empty
//! continue constructs move to the top of the loop behind a flag that skips
//! them on the first iteration.
//!
//! Phis are lowered through function locals in two phases: every `OpPhi`
//! becomes a load of a shadow local when its block is emitted, and once the
//! whole function exists a store into that local is inserted at the end of
//! every predecessor.

use super::cfg::{BranchType, CfItem, Terminator};
use super::pointers::{Addressing, Pointer, PointerRoot};
use super::types::{SpirvType, TypeKind};
use super::values::SpvId;
use super::variables::{StorageMode, VarStorage, VariableInfo};
use super::Translator;
use crate::ir::{AluOp, Intrinsic, IrInstr, IrType, Jump, MarkerId, MemType, VariableRef, VarId};
use crate::parser::{Instruction, InstructionReader};
use anyhow::{bail, Context, Result};
use rspirv::spirv::StorageClass;
use std::collections::HashMap;
use std::rc::Rc;

/// The local standing in for one `OpPhi`.
#[derive(Debug, Clone)]
pub struct PhiShadow {
    id: SpvId,
    /// Word offset of the `OpPhi`, re-read to find its incoming values.
    offset: usize,
    pointer: Rc<Pointer>,
}

impl Translator<'_> {
    // ── Locals ───────────────────────────────────────────────────────────

    /// A function-local variable addressed like an `OpVariable` in
    /// `Function` storage.
    pub(super) fn function_local(&mut self, id: SpvId, name: Option<String>, ty: &Rc<SpirvType>) -> Result<Rc<Pointer>> {
        let var = self.builder.add_local(name, ty.mem_type()?);
        let index = self.vars.len();
        self.vars.push(VariableInfo {
            id,
            mode: StorageMode::Function,
            ty: ty.clone(),
            storage: VarStorage::Single(var),
        });
        let ptr_type = Rc::new(SpirvType::new(
            id,
            TypeKind::Pointer {
                storage_class: StorageClass::Function,
                pointee: ty.clone(),
            },
        ));
        Ok(Rc::new(Pointer {
            mode: StorageMode::Function,
            addressing: Addressing::Deref,
            ty: ty.clone(),
            root_ty: ty.clone(),
            ptr_type,
            root: PointerRoot::Variable(index),
            root_index: None,
            links: Vec::new(),
        }))
    }

    fn flag_local(&mut self, name: &str) -> VariableRef {
        self.builder
            .add_local(Some(name.to_string()), MemType::Vector(IrType::BOOL))
    }

    fn store_flag(&mut self, flag: VariableRef, value: bool) {
        let value = self.builder.imm_bool(value);
        let deref = self.builder.deref_var(flag);
        self.builder.store(deref, value);
    }

    fn load_flag(&mut self, flag: VariableRef) -> VarId {
        let deref = self.builder.deref_var(flag);
        self.builder.load(deref, IrType::BOOL)
    }

    // ── Phis ─────────────────────────────────────────────────────────────

    /// First phase: the phi's value is a load of a fresh shadow local.
    pub(super) fn allocate_shadow(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let ty = self.result_type(inst)?;
        let id = SpvId(inst.word(2)?);
        let name = self.names.get(&id).map(|n| format!("{n}.phi"));
        let pointer = self.function_local(id, name, &ty)?;
        let value = self.load_pointer(&pointer)?;
        self.define_ssa(id, value)?;
        self.phis.push(PhiShadow {
            id,
            offset: inst.offset,
            pointer,
        });
        Ok(())
    }

    /// Second phase: store each incoming value at the end of its
    /// predecessor. Predecessors that were never emitted are unreachable
    /// and contribute nothing.
    pub(super) fn finalize_predecessors(&mut self) -> Result<HashMap<MarkerId, Vec<IrInstr>>> {
        let mut inserts: HashMap<MarkerId, Vec<IrInstr>> = HashMap::new();
        let phis = std::mem::take(&mut self.phis);
        for phi in &phis {
            let mut reader = InstructionReader::new(self.words, phi.offset, self.words.len());
            let inst = reader
                .next_instruction()?
                .with_context(|| format!("phi {} vanished from the module", phi.id))?;
            let operands = inst.words_from(3);
            if operands.len() % 2 != 0 {
                bail!("OpPhi {} has an unpaired incoming value", phi.id);
            }
            for pair in operands.chunks(2) {
                let (value_id, parent) = (SpvId(pair[0]), SpvId(pair[1]));
                let block = *self
                    .labels
                    .get(&parent)
                    .with_context(|| format!("OpPhi {} names unknown predecessor {parent}", phi.id))?;
                let Some(&marker) = self.block_ends.get(&block) else {
                    continue;
                };
                self.builder.begin_detached();
                let stored = self
                    .ssa_value(value_id)
                    .and_then(|value| self.store_pointer(&phi.pointer, &value));
                let instrs = self.builder.end_detached();
                stored.with_context(|| format!("incoming value {value_id} of OpPhi {}", phi.id))?;
                inserts.entry(marker).or_default().extend(instrs);
            }
        }
        Ok(inserts)
    }

    // ── Structured lists ─────────────────────────────────────────────────

    /// Emit `list`. `switch_fall` is the fall flag of the innermost switch
    /// case being emitted; `has_switch_break` is set when a break out of that
    /// switch was emitted somewhere in the list.
    pub(super) fn emit_cf_list(
        &mut self,
        list: &[CfItem],
        switch_fall: Option<VariableRef>,
        has_switch_break: &mut bool,
    ) -> Result<()> {
        // Ifs opened to skip the rest of the list after a switch break.
        let mut guards = 0;
        for item in list {
            match item {
                CfItem::Block(index) => self.emit_block(*index, switch_fall, has_switch_break)?,

                CfItem::If(node) => {
                    let condition = self.ssa_def(node.condition)?;
                    let mut sw_break = false;
                    self.builder.push_if(condition);
                    if node.then_type == BranchType::None {
                        self.emit_cf_list(&node.then_body, switch_fall, &mut sw_break)?;
                    } else {
                        self.emit_branch(node.then_type, switch_fall, &mut sw_break)?;
                    }
                    self.builder.push_else()?;
                    if node.else_type == BranchType::None {
                        self.emit_cf_list(&node.else_body, switch_fall, &mut sw_break)?;
                    } else {
                        self.emit_branch(node.else_type, switch_fall, &mut sw_break)?;
                    }
                    self.builder.pop_if()?;

                    if sw_break {
                        let fall = switch_fall.context("switch break outside of a switch")?;
                        *has_switch_break = true;
                        let still_going = self.load_flag(fall);
                        self.builder.push_if(still_going);
                        guards += 1;
                    }
                }

                CfItem::Loop(node) => {
                    let do_cont = if node.cont_body.is_empty() {
                        None
                    } else {
                        let flag = self.flag_local("cont");
                        self.store_flag(flag, false);
                        Some(flag)
                    };

                    self.builder.push_loop();
                    self.emit_cf_list(&node.body, None, &mut false)?;
                    if let Some(flag) = do_cont {
                        self.builder.begin_loop_prologue()?;
                        let cond = self.load_flag(flag);
                        self.builder.push_if(cond);
                        self.emit_cf_list(&node.cont_body, None, &mut false)?;
                        self.builder.pop_if()?;
                        self.store_flag(flag, true);
                        self.builder.end_loop_prologue()?;
                        self.has_loop_continue = true;
                    }
                    self.builder.pop_loop()?;
                }

                CfItem::Switch(node) => {
                    let fall = self.flag_local("fall");
                    self.store_flag(fall, false);

                    let selector = self.ssa_def(node.selector)?;
                    let sel_ty = self.builder.var_type(selector);

                    // All conditions up front: default needs the OR of the others.
                    let mut conditions = Vec::with_capacity(node.cases.len());
                    let mut any: Option<VarId> = None;
                    for case in &node.cases {
                        if case.is_default {
                            conditions.push(None);
                            continue;
                        }
                        let mut cond: Option<VarId> = None;
                        for &value in &case.values {
                            let imm = self.imm_for(sel_ty, value as i64);
                            let is_value = self.builder.compare(AluOp::IEq, selector, imm);
                            cond = Some(match cond {
                                Some(c) => self.builder.alu(AluOp::IOr, IrType::BOOL, &[c, is_value]),
                                None => is_value,
                            });
                        }
                        let cond = cond.context("switch case without values")?;
                        any = Some(match any {
                            Some(a) => self.builder.alu(AluOp::IOr, IrType::BOOL, &[a, cond]),
                            None => cond,
                        });
                        conditions.push(Some(cond));
                    }

                    for (case, cond) in node.cases.iter().zip(conditions) {
                        let cond = match cond {
                            Some(c) => c,
                            None => match any {
                                Some(a) => self.builder.alu(AluOp::INot, IrType::BOOL, &[a]),
                                None => self.builder.imm_bool(true),
                            },
                        };
                        let fell = self.load_flag(fall);
                        let cond = self.builder.alu(AluOp::IOr, IrType::BOOL, &[cond, fell]);
                        self.builder.push_if(cond);
                        self.store_flag(fall, true);
                        self.emit_cf_list(&case.body, Some(fall), &mut false)?;
                        self.builder.pop_if()?;
                    }
                }
            }
        }
        for _ in 0..guards {
            self.builder.pop_if()?;
        }
        Ok(())
    }

    fn emit_block(&mut self, index: usize, switch_fall: Option<VariableRef>, has_switch_break: &mut bool) -> Result<()> {
        let (start, body_end) = (self.blocks[index].start, self.blocks[index].body_end);
        self.walk_instructions(start, body_end, |t, inst| {
            t.handle_body_instruction(inst)?;
            Ok(true)
        })?;

        let marker = self.builder.marker();
        self.block_ends.insert(index, marker);

        let block = &self.blocks[index];
        match (block.terminator.clone(), block.branch_type) {
            (Terminator::ReturnValue(id), _) => {
                let value = self.ssa_value(id)?;
                let mut values = Vec::new();
                value.flatten(&mut values);
                self.builder.jump(Jump::Return { values });
                Ok(())
            }
            (_, branch_type) => self.emit_branch(branch_type, switch_fall, has_switch_break),
        }
    }

    fn emit_branch(
        &mut self,
        branch_type: BranchType,
        switch_fall: Option<VariableRef>,
        has_switch_break: &mut bool,
    ) -> Result<()> {
        match branch_type {
            BranchType::None | BranchType::SwitchFallthrough => {}
            BranchType::SwitchBreak => {
                let fall = switch_fall.context("switch break outside of a switch")?;
                self.store_flag(fall, false);
                *has_switch_break = true;
            }
            BranchType::LoopBreak => self.builder.jump(Jump::Break),
            BranchType::LoopContinue => self.builder.jump(Jump::Continue),
            BranchType::Return => self.builder.jump(Jump::Return { values: Vec::new() }),
            BranchType::Discard => {
                self.builder.intrinsic(Intrinsic::Discard, None, &[], &[]);
                self.info.uses_discard = true;
            }
        }
        Ok(())
    }
}
