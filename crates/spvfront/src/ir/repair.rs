//! SSA repair.
//!
//! Structured emission can move code away from the values it uses: a loop's
//! continue construct is emitted at the top of the loop, ahead of the body
//! that defines values it reads. This pass finds every value used outside
//! the region where its definition is visible and demotes it to a function
//! local: a store right after the definition and a load in front of every
//! use.

use super::types::*;
use super::utils::{for_each_def, for_each_use, for_each_use_jump, for_each_use_jump_mut, for_each_use_mut};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Demote all values with out-of-scope uses. Returns how many were demoted.
pub fn repair_ssa(func: &mut IrFunction) -> usize {
    let bad = find_undominated_uses(func);
    if bad.is_empty() {
        return 0;
    }

    let mut slots = BTreeMap::new();
    for &var in &bad {
        let ty = func.var_type(var);
        func.locals.push(IrVariable {
            name: Some(format!("ssa_repair_{}", var.0)),
            mode: VariableMode::Function,
            ty: MemType::Vector(ty),
            data: VariableData::default(),
            initializer: None,
        });
        slots.insert(var, func.locals.len() as u32 - 1);
    }

    let mut rewriter = Rewriter {
        slots,
        var_types: &mut func.var_types,
    };
    rewriter.rewrite(&mut func.body);
    bad.len()
}

// ── Analysis ─────────────────────────────────────────────────────────────────

/// Values read at a point where their definition is not in scope.
pub fn find_undominated_uses(func: &IrFunction) -> BTreeSet<VarId> {
    let mut walk = ScopeWalk {
        visible: func.params.iter().copied().collect(),
        scopes: vec![Vec::new()],
        bad: BTreeSet::new(),
    };
    walk.body(&func.body);
    walk.bad
}

struct ScopeWalk {
    visible: HashSet<VarId>,
    scopes: Vec<Vec<VarId>>,
    bad: BTreeSet<VarId>,
}

impl ScopeWalk {
    fn use_var(&mut self, var: VarId) {
        if !self.visible.contains(&var) {
            self.bad.insert(var);
        }
    }

    fn def_var(&mut self, var: VarId) {
        self.visible.insert(var);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(var);
        }
    }

    fn nested(&mut self, body: &[CfNode]) {
        self.scopes.push(Vec::new());
        self.body(body);
        if let Some(scope) = self.scopes.pop() {
            for var in scope {
                self.visible.remove(&var);
            }
        }
    }

    fn body(&mut self, body: &[CfNode]) {
        for node in body {
            match node {
                CfNode::Block(block) => {
                    for instr in &block.instructions {
                        let mut uses = Vec::new();
                        for_each_use(instr, |v| uses.push(v));
                        uses.into_iter().for_each(|v| self.use_var(v));
                        let mut defs = Vec::new();
                        for_each_def(instr, |v| defs.push(v));
                        defs.into_iter().for_each(|v| self.def_var(v));
                    }
                    if let Some(jump) = &block.jump {
                        let mut uses = Vec::new();
                        for_each_use_jump(jump, |v| uses.push(v));
                        uses.into_iter().for_each(|v| self.use_var(v));
                    }
                }
                CfNode::If(i) => {
                    self.use_var(i.condition);
                    self.nested(&i.then_body);
                    self.nested(&i.else_body);
                }
                CfNode::Loop(l) => self.nested(&l.body),
            }
        }
    }
}

// ── Rewrite ──────────────────────────────────────────────────────────────────

struct Rewriter<'a> {
    /// Demoted value → index of its local.
    slots: BTreeMap<VarId, u32>,
    var_types: &'a mut Vec<IrType>,
}

impl Rewriter<'_> {
    fn new_var(&mut self, ty: IrType) -> VarId {
        let id = VarId(self.var_types.len() as u32);
        self.var_types.push(ty);
        id
    }

    /// Emit a load of `var`'s local into `out`, returning the fresh value.
    fn reload(&mut self, var: VarId, out: &mut Vec<IrInstr>) -> VarId {
        let slot = self.slots[&var];
        let deref = self.new_var(IrType::DEREF);
        out.push(IrInstr::Deref {
            dest: deref,
            kind: DerefKind::Var(VariableRef::Local(slot)),
        });
        let ty = self.var_types[var.0 as usize];
        let value = self.new_var(ty);
        out.push(IrInstr::Load { dest: value, deref });
        value
    }

    fn spill(&mut self, var: VarId, out: &mut Vec<IrInstr>) {
        let slot = self.slots[&var];
        let deref = self.new_var(IrType::DEREF);
        out.push(IrInstr::Deref {
            dest: deref,
            kind: DerefKind::Var(VariableRef::Local(slot)),
        });
        let components = self.var_types[var.0 as usize].components;
        out.push(IrInstr::Store {
            deref,
            value: var,
            write_mask: ((1u32 << components) - 1) as u8,
        });
    }

    fn rewrite(&mut self, body: &mut Vec<CfNode>) {
        let mut i = 0;
        while i < body.len() {
            match &mut body[i] {
                CfNode::Block(block) => self.rewrite_block(block),
                CfNode::Loop(l) => self.rewrite(&mut l.body),
                CfNode::If(node) => {
                    let mut pre = Vec::new();
                    if self.slots.contains_key(&node.condition) {
                        node.condition = self.reload(node.condition, &mut pre);
                    }
                    self.rewrite(&mut node.then_body);
                    self.rewrite(&mut node.else_body);
                    if !pre.is_empty() {
                        body.insert(
                            i,
                            CfNode::Block(IrBlock {
                                instructions: pre,
                                jump: None,
                            }),
                        );
                        i += 1;
                    }
                }
            }
            i += 1;
        }
    }

    fn rewrite_block(&mut self, block: &mut IrBlock) {
        let old = std::mem::take(&mut block.instructions);
        let mut out = Vec::with_capacity(old.len());
        for mut instr in old {
            let mut uses = Vec::new();
            for_each_use(&instr, |v| {
                if self.slots.contains_key(&v) {
                    uses.push(v);
                }
            });
            uses.sort();
            uses.dedup();
            let mut renames = BTreeMap::new();
            for v in uses {
                let fresh = self.reload(v, &mut out);
                renames.insert(v, fresh);
            }
            if !renames.is_empty() {
                for_each_use_mut(&mut instr, |v| {
                    if let Some(fresh) = renames.get(v) {
                        *v = *fresh;
                    }
                });
            }
            let mut defs = Vec::new();
            for_each_def(&instr, |v| {
                if self.slots.contains_key(&v) {
                    defs.push(v);
                }
            });
            out.push(instr);
            for v in defs {
                self.spill(v, &mut out);
            }
        }
        if let Some(jump) = block.jump.as_mut() {
            let mut uses = Vec::new();
            for_each_use_jump(jump, |v| {
                if self.slots.contains_key(&v) {
                    uses.push(v);
                }
            });
            let mut renames = BTreeMap::new();
            for v in uses {
                let fresh = self.reload(v, &mut out);
                renames.insert(v, fresh);
            }
            for_each_use_jump_mut(jump, |v| {
                if let Some(fresh) = renames.get(v) {
                    *v = *fresh;
                }
            });
        }
        block.instructions = out;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn block(instructions: Vec<IrInstr>, jump: Option<Jump>) -> CfNode {
        CfNode::Block(IrBlock { instructions, jump })
    }

    /// loop { v2 = v1 + v0; v1 = v0 * v0; break }  with v0 a parameter.
    fn continue_style_function() -> IrFunction {
        IrFunction {
            name: None,
            params: vec![VarId(0)],
            results: vec![],
            locals: vec![],
            body: vec![CfNode::Loop(IrLoop {
                body: vec![block(
                    vec![
                        IrInstr::Alu {
                            dest: VarId(2),
                            op: AluOp::IAdd,
                            srcs: vec![VarId(1), VarId(0)],
                        },
                        IrInstr::Alu {
                            dest: VarId(1),
                            op: AluOp::IMul,
                            srcs: vec![VarId(0), VarId(0)],
                        },
                    ],
                    Some(Jump::Break),
                )],
            })],
            var_types: vec![IrType::U32; 3],
        }
    }

    #[test]
    fn detects_use_before_definition() {
        let func = continue_style_function();
        let bad = find_undominated_uses(&func);
        assert_eq!(bad.into_iter().collect::<Vec<_>>(), vec![VarId(1)]);
    }

    #[test]
    fn demotes_to_a_local() {
        let mut func = continue_style_function();
        assert_eq!(repair_ssa(&mut func), 1);
        assert_eq!(func.locals.len(), 1, "one repair slot");
        assert!(find_undominated_uses(&func).is_empty(), "repair must leave no bad uses");

        let CfNode::Loop(l) = &func.body[0] else {
            panic!("loop expected");
        };
        let CfNode::Block(b) = &l.body[0] else {
            panic!("block expected");
        };
        // deref + load before the add, then the add, the mul and its spill.
        assert!(matches!(b.instructions[1], IrInstr::Load { .. }));
        assert!(matches!(b.instructions.last(), Some(IrInstr::Store { value, .. }) if *value == VarId(1)));
    }

    #[test]
    fn values_leaving_an_if_are_flagged() {
        let func = IrFunction {
            name: None,
            params: vec![VarId(0)],
            results: vec![],
            locals: vec![],
            body: vec![
                CfNode::If(IrIf {
                    condition: VarId(0),
                    then_body: vec![block(
                        vec![IrInstr::Undef {
                            dest: VarId(1),
                            ty: IrType::U32,
                        }],
                        None,
                    )],
                    else_body: vec![],
                }),
                block(vec![], Some(Jump::Return { values: vec![VarId(1)] })),
            ],
            var_types: vec![IrType::BOOL, IrType::U32],
        };
        assert!(find_undominated_uses(&func).contains(&VarId(1)));
    }

    #[test]
    fn clean_functions_are_untouched() {
        let mut func = IrFunction {
            name: None,
            params: vec![],
            results: vec![IrType::U32],
            locals: vec![],
            body: vec![block(
                vec![IrInstr::Const {
                    dest: VarId(0),
                    value: ConstValue::u32(3),
                }],
                Some(Jump::Return { values: vec![VarId(0)] }),
            )],
            var_types: vec![IrType::U32],
        };
        let before = func.clone();
        assert_eq!(repair_ssa(&mut func), 0);
        assert_eq!(func, before);
    }
}
