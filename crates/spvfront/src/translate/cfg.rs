//! Control-flow recovery.
//!
//! The first pass splits every function into blocks and records each block's
//! merge and terminator. The second pass walks the blocks from the function
//! entry and rebuilds the structured tree: loops, ifs and switches, with every
//! branch that leaves a construct classified as a break, continue,
//! fallthrough, return or discard.

use super::values::{SpvId, Value};
use super::Translator;
use crate::parser::Instruction;
use anyhow::{bail, Context, Result};
use rspirv::grammar::{CoreInstructionTable, OperandKind};
use rspirv::spirv::Op;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    Selection { merge: SpvId },
    Loop { merge: SpvId, cont: SpvId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Branch(SpvId),
    BranchConditional {
        condition: SpvId,
        then_label: SpvId,
        else_label: SpvId,
    },
    Switch {
        selector: SpvId,
        default: SpvId,
        targets: Vec<(u64, SpvId)>,
    },
    Return,
    ReturnValue(SpvId),
    Kill,
    Unreachable,
}

/// How control leaves a block or one side of an if.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchType {
    #[default]
    None,
    SwitchBreak,
    SwitchFallthrough,
    LoopBreak,
    LoopContinue,
    Return,
    Discard,
}

#[derive(Debug, Clone)]
pub struct CfgBlock {
    pub label: SpvId,
    /// Word offset of the `OpLabel`.
    pub start: usize,
    /// Word offset of the merge instruction, or of the terminator.
    pub body_end: usize,
    pub merge: Option<Merge>,
    pub terminator: Terminator,
    pub branch_type: BranchType,
    /// Case this block starts, if it is the target of a switch.
    pub switch_case: Option<usize>,
    /// Set once the loop headed by this block has been built.
    pub loop_built: bool,
    /// Set once the block has been placed in the structured tree.
    pub placed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfItem {
    /// Index into the block list.
    Block(usize),
    If(CfIf),
    Loop(CfLoop),
    Switch(CfSwitch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfIf {
    pub condition: SpvId,
    pub then_type: BranchType,
    pub else_type: BranchType,
    pub then_body: Vec<CfItem>,
    pub else_body: Vec<CfItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfLoop {
    pub body: Vec<CfItem>,
    pub cont_body: Vec<CfItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfSwitch {
    pub selector: SpvId,
    /// Cases in emission order; fallthrough chains are adjacent.
    pub cases: Vec<CfCase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfCase {
    pub block: usize,
    pub values: Vec<u64>,
    pub is_default: bool,
    /// Block index of the case this one falls into.
    pub fallthrough: Option<usize>,
    pub body: Vec<CfItem>,
}

/// A function found by the first pass.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub id: SpvId,
    pub ty: SpvId,
    pub return_type: SpvId,
    pub params: Vec<(SpvId, SpvId)>,
    /// Global block indices, in module order.
    pub blocks: Vec<usize>,
}

// ── Pass 1 ───────────────────────────────────────────────────────────────────

/// Result type of an instruction, if its grammar has one.
fn result_type_of(inst: &Instruction<'_>) -> Option<(SpvId, SpvId)> {
    let op = inst.op()?;
    let def = CoreInstructionTable::lookup_opcode(op as u16)?;
    let mut kinds = def.operands.iter().map(|o| o.kind);
    if kinds.next()? != OperandKind::IdResultType || kinds.next()? != OperandKind::IdResult {
        return None;
    }
    Some((SpvId(*inst.words.get(2)?), SpvId(*inst.words.get(1)?)))
}

/// Block whose terminator the first pass has not reached yet.
#[derive(Debug)]
pub struct OpenBlock {
    label: SpvId,
    start: usize,
    merge: Option<(Merge, usize)>,
}

impl Translator<'_> {
    /// First pass over the function section. Returns false at the end of
    /// the module.
    pub(super) fn handle_cfg_instruction(&mut self, inst: &Instruction<'_>) -> Result<bool> {
        let op = inst.op().with_context(|| format!("unknown opcode {}", inst.opcode))?;
        if let Some((id, ty)) = result_type_of(inst) {
            self.result_types.insert(id, ty);
        }
        match op {
            Op::Function => {
                if self.cfg_function.is_some() {
                    bail!("OpFunction inside another function");
                }
                let return_type = SpvId(inst.word(1)?);
                let id = SpvId(inst.word(2)?);
                let ty = SpvId(inst.word(4)?);
                let index = self.functions.len();
                self.functions.push(FunctionInfo {
                    id,
                    ty,
                    return_type,
                    params: Vec::new(),
                    blocks: Vec::new(),
                });
                self.cfg_function = Some(index);
                self.values.define(id, Value::Function(index))?;
            }
            Op::FunctionParameter => {
                let func = self.cfg_function.context("OpFunctionParameter outside a function")?;
                self.functions[func]
                    .params
                    .push((SpvId(inst.word(2)?), SpvId(inst.word(1)?)));
            }
            Op::FunctionEnd => {
                if self.cfg_block.is_some() {
                    bail!("function ends inside an unterminated block");
                }
                let func = self.cfg_function.take().context("OpFunctionEnd outside a function")?;
                if self.functions[func].blocks.is_empty() {
                    bail!("function {} has no body; linkage is not supported", self.functions[func].id);
                }
            }
            Op::Label => {
                if self.cfg_block.is_some() {
                    bail!("OpLabel inside an unterminated block");
                }
                if self.cfg_function.is_none() {
                    bail!("OpLabel outside a function");
                }
                self.cfg_block = Some(OpenBlock {
                    label: SpvId(inst.word(1)?),
                    start: inst.offset,
                    merge: None,
                });
            }
            Op::SelectionMerge | Op::LoopMerge => {
                let block = self.cfg_block.as_mut().context("merge instruction outside a block")?;
                let merge = if op == Op::LoopMerge {
                    Merge::Loop {
                        merge: SpvId(inst.word(1)?),
                        cont: SpvId(inst.word(2)?),
                    }
                } else {
                    Merge::Selection {
                        merge: SpvId(inst.word(1)?),
                    }
                };
                block.merge = Some((merge, inst.offset));
            }
            Op::Branch
            | Op::BranchConditional
            | Op::Switch
            | Op::Return
            | Op::ReturnValue
            | Op::Kill
            | Op::Unreachable => {
                let open = self.cfg_block.take().context("terminator outside a block")?;
                let terminator = self.parse_terminator(op, inst)?;
                let (merge, body_end) = match open.merge {
                    Some((merge, at)) => (Some(merge), at),
                    None => (None, inst.offset),
                };
                let index = self.blocks.len();
                self.blocks.push(CfgBlock {
                    label: open.label,
                    start: open.start,
                    body_end,
                    merge,
                    terminator,
                    branch_type: BranchType::None,
                    switch_case: None,
                    loop_built: false,
                    placed: false,
                });
                self.labels.insert(open.label, index);
                self.values.define(open.label, Value::Block(index))?;
                let func = self.cfg_function.context("block outside a function")?;
                self.functions[func].blocks.push(index);
            }
            Op::Nop => {}
            _ => {
                if self.cfg_function.is_none() {
                    bail!("{} between function definitions", inst.name());
                }
            }
        }
        Ok(true)
    }

    fn parse_terminator(&self, op: Op, inst: &Instruction<'_>) -> Result<Terminator> {
        Ok(match op {
            Op::Branch => Terminator::Branch(SpvId(inst.word(1)?)),
            Op::BranchConditional => Terminator::BranchConditional {
                condition: SpvId(inst.word(1)?),
                then_label: SpvId(inst.word(2)?),
                else_label: SpvId(inst.word(3)?),
            },
            Op::Switch => {
                let selector = SpvId(inst.word(1)?);
                let sel_ty = match self.values.value_type(selector) {
                    Ok(ty) => ty,
                    Err(_) => {
                        let ty = self
                            .result_types
                            .get(&selector)
                            .with_context(|| format!("switch selector {selector} has no known type"))?;
                        self.values.type_(*ty)?
                    }
                };
                let super::types::TypeKind::Int { bits, .. } = sel_ty.kind else {
                    bail!("switch selector must be an integer, found {}", sel_ty.describe());
                };
                let literal_words = if bits > 32 { 2 } else { 1 };
                let mut targets = Vec::new();
                let mut rest = inst.words_from(3);
                while !rest.is_empty() {
                    if rest.len() < literal_words + 1 {
                        bail!("truncated OpSwitch target list");
                    }
                    let value = if literal_words == 2 {
                        u64::from(rest[0]) | (u64::from(rest[1]) << 32)
                    } else {
                        u64::from(rest[0])
                    };
                    targets.push((value, SpvId(rest[literal_words])));
                    rest = &rest[literal_words + 1..];
                }
                Terminator::Switch {
                    selector,
                    default: SpvId(inst.word(2)?),
                    targets,
                }
            }
            Op::Return => Terminator::Return,
            Op::ReturnValue => Terminator::ReturnValue(SpvId(inst.word(1)?)),
            Op::Kill => Terminator::Kill,
            _ => Terminator::Unreachable,
        })
    }

    /// Structure the body of function `func`.
    pub(super) fn structure_function(&mut self, func: usize) -> Result<Vec<CfItem>> {
        let start = *self.functions[func]
            .blocks
            .first()
            .context("function without blocks")?;
        let mut s = Structurizer::new(&mut self.blocks, &self.labels);
        let body = s.build(start)?;
        trace!(function = %self.functions[func].id, "structured control flow");
        Ok(body)
    }
}

// ── Pass 2 ───────────────────────────────────────────────────────────────────

/// Case under construction.
#[derive(Debug)]
struct CaseData {
    block: usize,
    values: Vec<u64>,
    is_default: bool,
    fallthrough: Option<usize>,
    body: Vec<CfItem>,
    visited: bool,
}

/// Rebuilds structured control flow over a block list.
pub struct Structurizer<'b> {
    blocks: &'b mut [CfgBlock],
    labels: &'b HashMap<SpvId, usize>,
    cases: Vec<CaseData>,
}

/// The constructs a walk is nested in.
#[derive(Debug, Clone, Copy)]
struct Scope {
    switch_case: Option<usize>,
    switch_break: Option<usize>,
    loop_break: Option<usize>,
    loop_cont: Option<usize>,
}

impl<'b> Structurizer<'b> {
    pub fn new(blocks: &'b mut [CfgBlock], labels: &'b HashMap<SpvId, usize>) -> Self {
        Self {
            blocks,
            labels,
            cases: Vec::new(),
        }
    }

    pub fn build(&mut self, start: usize) -> Result<Vec<CfItem>> {
        let mut list = Vec::new();
        let scope = Scope {
            switch_case: None,
            switch_break: None,
            loop_break: None,
            loop_cont: None,
        };
        self.walk(&mut list, start, scope, None)?;
        Ok(list)
    }

    fn block(&self, label: SpvId) -> Result<usize> {
        self.labels
            .get(&label)
            .copied()
            .with_context(|| format!("branch to unknown block {label}"))
    }

    fn branch_type(&mut self, target: usize, scope: Scope) -> Result<BranchType> {
        if let Some(case) = self.blocks[target].switch_case {
            let Some(current) = scope.switch_case else {
                bail!("branch into switch case {} from outside the switch", self.blocks[target].label);
            };
            let cur = &mut self.cases[current];
            if cur.fallthrough.is_some_and(|f| f != case) {
                bail!("switch case falls through to two different cases");
            }
            cur.fallthrough = Some(case);
            return Ok(BranchType::SwitchFallthrough);
        }
        Ok(if Some(target) == scope.loop_break {
            BranchType::LoopBreak
        } else if Some(target) == scope.loop_cont {
            BranchType::LoopContinue
        } else if Some(target) == scope.switch_break {
            BranchType::SwitchBreak
        } else {
            BranchType::None
        })
    }

    fn walk(&mut self, list: &mut Vec<CfItem>, start: usize, scope: Scope, end: Option<usize>) -> Result<()> {
        let mut block = start;
        while Some(block) != end {
            if let Some(Merge::Loop { merge, cont }) = self.blocks[block].merge.clone() {
                if !self.blocks[block].loop_built {
                    self.blocks[block].loop_built = true;
                    let merge = self.block(merge)?;
                    let cont = self.block(cont)?;

                    // The header is walked again as the first block of the
                    // body; `loop_built` sends it down the plain path.
                    let mut body = Vec::new();
                    let body_scope = Scope {
                        switch_case: scope.switch_case,
                        switch_break: None,
                        loop_break: Some(merge),
                        loop_cont: Some(cont),
                    };
                    self.walk(&mut body, block, body_scope, None)?;

                    let mut cont_body = Vec::new();
                    let cont_scope = Scope {
                        switch_case: None,
                        switch_break: None,
                        loop_break: Some(merge),
                        loop_cont: None,
                    };
                    self.walk(&mut cont_body, cont, cont_scope, Some(block))?;
                    list.push(CfItem::Loop(CfLoop { body, cont_body }));

                    match self.branch_type(merge, scope)? {
                        BranchType::None => {}
                        // The loop's merge is the enclosing loop's continue
                        // target, which the enclosing walk visits itself.
                        BranchType::LoopContinue => return Ok(()),
                        other => bail!("loop merge block leaves the enclosing construct as {other:?}"),
                    }
                    block = merge;
                    continue;
                }
            }

            if self.blocks[block].placed {
                bail!(
                    "block {} reached twice; unstructured control flow",
                    self.blocks[block].label
                );
            }
            self.blocks[block].placed = true;
            list.push(CfItem::Block(block));
            match self.blocks[block].terminator.clone() {
                Terminator::Branch(target) => {
                    let target = self.block(target)?;
                    let bt = self.branch_type(target, scope)?;
                    self.blocks[block].branch_type = bt;
                    if bt != BranchType::None {
                        return Ok(());
                    }
                    block = target;
                }
                Terminator::Return | Terminator::ReturnValue(_) => {
                    self.blocks[block].branch_type = BranchType::Return;
                    return Ok(());
                }
                Terminator::Kill => {
                    self.blocks[block].branch_type = BranchType::Discard;
                    return Ok(());
                }
                Terminator::Unreachable => return Ok(()),
                Terminator::BranchConditional {
                    condition,
                    then_label,
                    else_label,
                } => {
                    let then_block = self.block(then_label)?;
                    let else_block = self.block(else_label)?;
                    let then_type = self.branch_type(then_block, scope)?;
                    let else_type = self.branch_type(else_block, scope)?;

                    if then_block == else_block {
                        self.blocks[block].branch_type = then_type;
                        if then_type != BranchType::None {
                            return Ok(());
                        }
                        block = then_block;
                        continue;
                    }

                    let mut node = CfIf {
                        condition,
                        then_type,
                        else_type,
                        then_body: Vec::new(),
                        else_body: Vec::new(),
                    };
                    match (then_type, else_type) {
                        (BranchType::None, BranchType::None) => {
                            let Some(Merge::Selection { merge }) = self.blocks[block].merge.clone() else {
                                bail!(
                                    "conditional branch in block {} needs an OpSelectionMerge",
                                    self.blocks[block].label
                                );
                            };
                            let merge = self.block(merge)?;
                            self.walk(&mut node.then_body, then_block, scope, Some(merge))?;
                            self.walk(&mut node.else_body, else_block, scope, Some(merge))?;
                            list.push(CfItem::If(node));
                            if self.branch_type(merge, scope)? != BranchType::None {
                                return Ok(());
                            }
                            block = merge;
                        }
                        (BranchType::None, _) => {
                            list.push(CfItem::If(node));
                            block = then_block;
                        }
                        (_, BranchType::None) => {
                            list.push(CfItem::If(node));
                            block = else_block;
                        }
                        _ => {
                            list.push(CfItem::If(node));
                            return Ok(());
                        }
                    }
                }
                Terminator::Switch {
                    selector,
                    default,
                    targets,
                } => {
                    let Some(Merge::Selection { merge }) = self.blocks[block].merge.clone() else {
                        bail!("OpSwitch in block {} needs an OpSelectionMerge", self.blocks[block].label);
                    };
                    let break_block = self.block(merge)?;

                    let mut created = Vec::new();
                    self.add_case(&mut created, break_block, default, None)?;
                    for &(value, label) in &targets {
                        self.add_case(&mut created, break_block, label, Some(value))?;
                    }

                    for &case in &created {
                        let mut body = Vec::new();
                        let case_scope = Scope {
                            switch_case: Some(case),
                            switch_break: Some(break_block),
                            loop_break: scope.loop_break,
                            loop_cont: scope.loop_cont,
                        };
                        self.walk(&mut body, self.cases[case].block, case_scope, None)?;
                        self.cases[case].body = body;
                    }

                    // Fallthrough chains must end up adjacent.
                    let mut order = Vec::new();
                    for label in std::iter::once(default).chain(targets.iter().map(|t| t.1)) {
                        let b = self.block(label)?;
                        if b == break_block {
                            continue;
                        }
                        let case = self.blocks[b].switch_case.context("switch target without a case")?;
                        self.order_case(&mut order, case);
                    }

                    let cases = order
                        .iter()
                        .map(|&c| {
                            let fallthrough = self.cases[c].fallthrough.map(|f| self.cases[f].block);
                            let data = &mut self.cases[c];
                            CfCase {
                                block: data.block,
                                values: std::mem::take(&mut data.values),
                                is_default: data.is_default,
                                fallthrough,
                                body: std::mem::take(&mut data.body),
                            }
                        })
                        .collect();
                    list.push(CfItem::Switch(CfSwitch { selector, cases }));

                    let outer = Scope {
                        switch_break: None,
                        ..scope
                    };
                    match self.branch_type(break_block, outer)? {
                        BranchType::None => {}
                        BranchType::LoopContinue => return Ok(()),
                        other => bail!("switch merge block leaves the enclosing construct as {other:?}"),
                    }
                    block = break_block;
                }
            }
        }
        Ok(())
    }

    fn add_case(&mut self, created: &mut Vec<usize>, break_block: usize, label: SpvId, value: Option<u64>) -> Result<()> {
        let block = self.block(label)?;
        if block == break_block {
            return Ok(());
        }
        let case = match self.blocks[block].switch_case {
            Some(case) => case,
            None => {
                let case = self.cases.len();
                self.cases.push(CaseData {
                    block,
                    values: Vec::new(),
                    is_default: false,
                    fallthrough: None,
                    body: Vec::new(),
                    visited: false,
                });
                self.blocks[block].switch_case = Some(case);
                created.push(case);
                case
            }
        };
        match value {
            None => self.cases[case].is_default = true,
            Some(v) => self.cases[case].values.push(v),
        }
        Ok(())
    }

    /// Depth-first placement: a case that falls through goes right before
    /// its target.
    fn order_case(&mut self, order: &mut Vec<usize>, case: usize) {
        if self.cases[case].visited {
            return;
        }
        self.cases[case].visited = true;
        order.retain(|&c| c != case);
        match self.cases[case].fallthrough {
            Some(target) => {
                self.order_case(order, target);
                let at = order.iter().position(|&c| c == target).unwrap_or(order.len());
                order.insert(at, case);
            }
            None => order.push(case),
        }
    }
}

/// Every block referenced by a structured list, depth first.
pub fn collect_blocks(list: &[CfItem], out: &mut Vec<usize>) {
    for item in list {
        match item {
            CfItem::Block(b) => out.push(*b),
            CfItem::If(i) => {
                collect_blocks(&i.then_body, out);
                collect_blocks(&i.else_body, out);
            }
            CfItem::Loop(l) => {
                collect_blocks(&l.body, out);
                collect_blocks(&l.cont_body, out);
            }
            CfItem::Switch(s) => {
                for case in &s.cases {
                    collect_blocks(&case.body, out);
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds block lists by label number.
    struct Cfg {
        blocks: Vec<CfgBlock>,
        labels: HashMap<SpvId, usize>,
    }

    impl Cfg {
        fn new() -> Self {
            Self {
                blocks: Vec::new(),
                labels: HashMap::new(),
            }
        }

        fn add(&mut self, label: u32, merge: Option<Merge>, terminator: Terminator) -> &mut Self {
            self.labels.insert(SpvId(label), self.blocks.len());
            self.blocks.push(CfgBlock {
                label: SpvId(label),
                start: 0,
                body_end: 0,
                merge,
                terminator,
                branch_type: BranchType::None,
                switch_case: None,
                loop_built: false,
                placed: false,
            });
            self
        }

        fn try_build(&mut self) -> Result<Vec<CfItem>> {
            Structurizer::new(&mut self.blocks, &self.labels).build(0)
        }

        fn build(&mut self) -> Vec<CfItem> {
            self.try_build().unwrap()
        }

        fn label(&self, index: usize) -> u32 {
            self.blocks[index].label.0
        }
    }

    fn br(l: u32) -> Terminator {
        Terminator::Branch(SpvId(l))
    }

    fn cond(t: u32, e: u32) -> Terminator {
        Terminator::BranchConditional {
            condition: SpvId(100),
            then_label: SpvId(t),
            else_label: SpvId(e),
        }
    }

    fn sel(m: u32) -> Option<Merge> {
        Some(Merge::Selection { merge: SpvId(m) })
    }

    #[test]
    fn if_else_with_merge() {
        let mut cfg = Cfg::new();
        cfg.add(1, sel(4), cond(2, 3))
            .add(2, None, br(4))
            .add(3, None, br(4))
            .add(4, None, Terminator::Return);
        let body = cfg.build();

        assert_eq!(body.len(), 3, "header, if, merge: {body:?}");
        let CfItem::If(node) = &body[1] else {
            panic!("expected an if, got {:?}", body[1]);
        };
        assert_eq!(node.then_body, vec![CfItem::Block(1)]);
        assert_eq!(node.else_body, vec![CfItem::Block(2)]);
        assert_eq!(cfg.blocks[3].branch_type, BranchType::Return);
    }

    #[test]
    fn loop_with_break_and_continue() {
        // 1 -> 2 (header) -> 3 (cond: break to 5 or continue to 4) ; 4 -> 2 ; 5 ret
        let mut cfg = Cfg::new();
        cfg.add(1, None, br(2))
            .add(
                2,
                Some(Merge::Loop {
                    merge: SpvId(5),
                    cont: SpvId(4),
                }),
                br(3),
            )
            .add(3, None, cond(5, 4))
            .add(4, None, br(2))
            .add(5, None, Terminator::Return);
        let body = cfg.build();

        let CfItem::Loop(l) = &body[1] else {
            panic!("expected a loop, got {body:?}");
        };
        assert_eq!(l.body[0], CfItem::Block(1), "header opens the body");
        let CfItem::If(node) = &l.body[2] else {
            panic!("expected the exit if, got {:?}", l.body);
        };
        assert_eq!(node.then_type, BranchType::LoopBreak);
        assert_eq!(node.else_type, BranchType::LoopContinue);
        assert_eq!(l.cont_body, vec![CfItem::Block(3)]);
        assert_eq!(body[2], CfItem::Block(4), "walk resumes at the merge");
    }

    #[test]
    fn every_block_appears_once() {
        // A loop containing an if, followed by a switch.
        let mut cfg = Cfg::new();
        cfg.add(1, None, br(2))
            .add(
                2,
                Some(Merge::Loop {
                    merge: SpvId(7),
                    cont: SpvId(6),
                }),
                br(3),
            )
            .add(3, sel(6), cond(4, 5))
            .add(4, None, br(6))
            .add(5, None, br(7))
            .add(6, None, cond(2, 7))
            .add(
                7,
                sel(10),
                Terminator::Switch {
                    selector: SpvId(100),
                    default: SpvId(10),
                    targets: vec![(1, SpvId(8)), (2, SpvId(9))],
                },
            )
            .add(8, None, br(9))
            .add(9, None, br(10))
            .add(10, None, Terminator::Return);
        let body = cfg.build();

        let mut seen = Vec::new();
        collect_blocks(&body, &mut seen);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>(), "body: {body:#?}");
    }

    #[test]
    fn switch_fallthrough_order() {
        // Cases in target order C, A, B with A -> B -> C fallthrough.
        let mut cfg = Cfg::new();
        cfg.add(
            1,
            sel(9),
            Terminator::Switch {
                selector: SpvId(100),
                default: SpvId(9),
                targets: vec![(3, SpvId(4)), (1, SpvId(2)), (2, SpvId(3))],
            },
        )
        .add(2, None, br(3)) // A
        .add(3, None, br(4)) // B
        .add(4, None, br(9)) // C
        .add(9, None, Terminator::Return);
        let body = cfg.build();

        let CfItem::Switch(s) = &body[1] else {
            panic!("expected a switch, got {body:?}");
        };
        let labels: Vec<u32> = s.cases.iter().map(|c| cfg.label(c.block)).collect();
        assert_eq!(labels, vec![2, 3, 4], "A, B, C must be adjacent and in order");
        assert_eq!(s.cases[0].fallthrough, Some(2), "A falls into B");
        assert_eq!(s.cases[1].fallthrough, Some(3), "B falls into C");
        assert_eq!(s.cases[2].fallthrough, None);
        assert_eq!(cfg.blocks[1].branch_type, BranchType::SwitchFallthrough);
        assert_eq!(cfg.blocks[3].branch_type, BranchType::SwitchBreak);
    }

    #[test]
    fn switch_cases_share_blocks() {
        let mut cfg = Cfg::new();
        cfg.add(
            1,
            sel(3),
            Terminator::Switch {
                selector: SpvId(100),
                default: SpvId(2),
                targets: vec![(5, SpvId(2)), (6, SpvId(2)), (7, SpvId(3))],
            },
        )
        .add(2, None, br(3))
        .add(3, None, Terminator::Return);
        let body = cfg.build();

        let CfItem::Switch(s) = &body[1] else {
            panic!("expected a switch");
        };
        assert_eq!(s.cases.len(), 1, "break-block targets are pruned");
        assert!(s.cases[0].is_default);
        assert_eq!(s.cases[0].values, vec![5, 6]);
    }

    #[test]
    fn one_sided_branch_threads_through() {
        let mut cfg = Cfg::new();
        cfg.add(1, None, br(2))
            .add(
                2,
                Some(Merge::Loop {
                    merge: SpvId(5),
                    cont: SpvId(4),
                }),
                cond(5, 3),
            )
            .add(3, None, br(4))
            .add(4, None, br(2))
            .add(5, None, Terminator::Kill);
        let body = cfg.build();

        let CfItem::Loop(l) = &body[1] else {
            panic!("expected a loop");
        };
        assert_eq!(l.body.len(), 3, "header, break if, then block 3 inline: {:?}", l.body);
        assert_eq!(l.body[2], CfItem::Block(2));
        assert_eq!(cfg.blocks[2].branch_type, BranchType::LoopContinue);
        assert_eq!(cfg.blocks[4].branch_type, BranchType::Discard);
    }

    #[test]
    fn back_edge_without_loop_merge_is_rejected() {
        // 1 -> 2 -> 3 -> 2, no OpLoopMerge anywhere.
        let mut cfg = Cfg::new();
        cfg.add(1, None, br(2)).add(2, None, br(3)).add(3, None, br(2));
        let err = cfg.try_build().unwrap_err().to_string();
        assert!(err.contains("reached twice"), "unexpected error: {err}");
        assert!(err.contains("unstructured"), "unexpected error: {err}");
    }

    #[test]
    fn branch_back_to_built_loop_header_is_rejected() {
        // The body jumps straight back to the header instead of through the
        // continue target.
        let mut cfg = Cfg::new();
        cfg.add(1, None, br(2))
            .add(
                2,
                Some(Merge::Loop {
                    merge: SpvId(5),
                    cont: SpvId(4),
                }),
                br(3),
            )
            .add(3, None, cond(2, 4))
            .add(4, None, br(2))
            .add(5, None, Terminator::Return);
        let err = cfg.try_build().unwrap_err().to_string();
        assert!(err.contains("reached twice"), "unexpected error: {err}");
    }
}
