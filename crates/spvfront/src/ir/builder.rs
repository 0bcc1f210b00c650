//! Structured function builder.
//!
//! `FunctionBuilder` is the cursor the translator emits into. It keeps a stack
//! of open control-flow frames (if/else/loop) and appends instructions to the
//! innermost one, creating blocks as needed. Constants and undefs go to a
//! prologue that is placed at the very start of the function so that they
//! dominate every use.

use super::types::*;
use anyhow::{bail, Result};
use std::collections::HashMap;

#[derive(Debug)]
enum FrameKind {
    Root,
    Then { condition: VarId },
    Else { condition: VarId, then_body: Vec<CfNode> },
    Loop,
    /// Code that is spliced in front of the enclosing loop's body.
    LoopPrologue,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    nodes: Vec<CfNode>,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
        }
    }

    /// The trailing block if it can still take instructions.
    fn open_block(&mut self) -> &mut IrBlock {
        let reuse = matches!(self.nodes.last(), Some(CfNode::Block(b)) if b.jump.is_none());
        if !reuse {
            self.nodes.push(CfNode::Block(IrBlock::default()));
        }
        match self.nodes.last_mut() {
            Some(CfNode::Block(block)) => block,
            _ => unreachable!("a block was just ensured at the end of the frame"),
        }
    }
}

/// Builder state for one function.
#[derive(Debug)]
pub struct FunctionBuilder {
    frames: Vec<Frame>,
    var_types: Vec<IrType>,
    prologue: Vec<IrInstr>,
    locals: Vec<IrVariable>,
    params: Vec<VarId>,
    next_marker: u32,
    detached: Option<Vec<IrInstr>>,
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionBuilder {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(FrameKind::Root)],
            var_types: Vec::new(),
            prologue: Vec::new(),
            locals: Vec::new(),
            params: Vec::new(),
            next_marker: 0,
            detached: None,
        }
    }

    /// Drop all state and start a new function.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // ── Values ───────────────────────────────────────────────────────────

    pub fn new_var(&mut self, ty: IrType) -> VarId {
        let id = VarId(self.var_types.len() as u32);
        self.var_types.push(ty);
        id
    }

    pub fn var_type(&self, var: VarId) -> IrType {
        self.var_types[var.0 as usize]
    }

    pub fn add_param(&mut self, ty: IrType) -> VarId {
        let var = self.new_var(ty);
        self.params.push(var);
        var
    }

    pub fn add_local(&mut self, name: Option<String>, ty: MemType) -> VariableRef {
        self.locals.push(IrVariable {
            name,
            mode: VariableMode::Function,
            ty,
            data: VariableData::default(),
            initializer: None,
        });
        VariableRef::Local(self.locals.len() as u32 - 1)
    }

    pub fn set_local_initializer(&mut self, var: VariableRef, init: IrConstant) {
        if let VariableRef::Local(i) = var {
            self.locals[i as usize].initializer = Some(init);
        }
    }

    // ── Emission ─────────────────────────────────────────────────────────

    pub fn emit(&mut self, instr: IrInstr) {
        if let Some(buf) = self.detached.as_mut() {
            buf.push(instr);
            return;
        }
        self.current().open_block().instructions.push(instr);
    }

    fn current(&mut self) -> &mut Frame {
        // The root frame is never popped.
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn constant(&mut self, value: ConstValue) -> VarId {
        let dest = self.new_var(value.ty);
        self.prologue.push(IrInstr::Const { dest, value });
        dest
    }

    pub fn imm_u32(&mut self, value: u32) -> VarId {
        self.constant(ConstValue::u32(value))
    }

    pub fn imm_i32(&mut self, value: i32) -> VarId {
        self.constant(ConstValue::i32(value))
    }

    pub fn imm_bool(&mut self, value: bool) -> VarId {
        self.constant(ConstValue::bool(value))
    }

    /// Float immediate matching the bit size of `like`.
    pub fn imm_float(&mut self, bit_size: u8, value: f64) -> VarId {
        self.constant(ConstValue::float(bit_size, value))
    }

    pub fn undef(&mut self, ty: IrType) -> VarId {
        let dest = self.new_var(ty);
        self.prologue.push(IrInstr::Undef { dest, ty });
        dest
    }

    pub fn alu(&mut self, op: AluOp, ty: IrType, srcs: &[VarId]) -> VarId {
        let dest = self.new_var(ty);
        self.emit(IrInstr::Alu {
            dest,
            op,
            srcs: srcs.to_vec(),
        });
        dest
    }

    /// ALU op whose result type equals the first operand's type.
    pub fn alu_same(&mut self, op: AluOp, srcs: &[VarId]) -> VarId {
        let ty = self.var_type(srcs[0]);
        self.alu(op, ty, srcs)
    }

    /// Comparison producing a boolean per component of the first operand.
    pub fn compare(&mut self, op: AluOp, a: VarId, b: VarId) -> VarId {
        let n = self.var_type(a).components;
        self.alu(op, IrType::BOOL.with_components(n), &[a, b])
    }

    pub fn swizzle(&mut self, src: VarId, components: &[u8]) -> VarId {
        let ty = self.var_type(src).with_components(components.len() as u8);
        let dest = self.new_var(ty);
        self.emit(IrInstr::Swizzle {
            dest,
            src,
            components: components.to_vec(),
        });
        dest
    }

    pub fn channel(&mut self, src: VarId, component: u8) -> VarId {
        self.swizzle(src, &[component])
    }

    /// Build a vector from scalars; a single source is returned unchanged.
    pub fn vec(&mut self, srcs: &[VarId]) -> VarId {
        if srcs.len() == 1 {
            return srcs[0];
        }
        let ty = self.var_type(srcs[0]).with_components(srcs.len() as u8);
        self.alu(AluOp::Vec, ty, srcs)
    }

    /// Replicate a scalar across `components` lanes.
    pub fn broadcast(&mut self, src: VarId, components: u8) -> VarId {
        if components == 1 || self.var_type(src).components != 1 {
            return src;
        }
        self.swizzle(src, &vec![0; usize::from(components)])
    }

    pub fn deref(&mut self, kind: DerefKind) -> VarId {
        let dest = self.new_var(IrType::DEREF);
        self.emit(IrInstr::Deref { dest, kind });
        dest
    }

    pub fn deref_var(&mut self, var: VariableRef) -> VarId {
        self.deref(DerefKind::Var(var))
    }

    pub fn deref_struct(&mut self, parent: VarId, member: u32) -> VarId {
        self.deref(DerefKind::Struct { parent, member })
    }

    pub fn deref_array(&mut self, parent: VarId, index: VarId) -> VarId {
        self.deref(DerefKind::Array { parent, index })
    }

    pub fn load(&mut self, deref: VarId, ty: IrType) -> VarId {
        let dest = self.new_var(ty);
        self.emit(IrInstr::Load { dest, deref });
        dest
    }

    pub fn store(&mut self, deref: VarId, value: VarId) {
        let mask = (1u32 << self.var_type(value).components) - 1;
        self.emit(IrInstr::Store {
            deref,
            value,
            write_mask: mask as u8,
        });
    }

    pub fn intrinsic(
        &mut self,
        op: Intrinsic,
        ty: Option<IrType>,
        srcs: &[VarId],
        indices: &[u32],
    ) -> Option<VarId> {
        let dest = ty.map(|ty| self.new_var(ty));
        self.emit(IrInstr::Intrinsic {
            dest,
            op,
            srcs: srcs.to_vec(),
            indices: indices.to_vec(),
        });
        dest
    }

    pub fn jump(&mut self, jump: Jump) {
        if self.detached.is_some() {
            return;
        }
        self.current().open_block().jump = Some(jump);
    }

    // ── Markers ──────────────────────────────────────────────────────────

    /// Leave an insertion point at the current position.
    pub fn marker(&mut self) -> MarkerId {
        let id = MarkerId(self.next_marker);
        self.next_marker += 1;
        self.emit(IrInstr::Marker(id));
        id
    }

    /// Redirect emission into a side buffer until [`Self::end_detached`].
    pub fn begin_detached(&mut self) {
        self.detached = Some(Vec::new());
    }

    pub fn end_detached(&mut self) -> Vec<IrInstr> {
        self.detached.take().unwrap_or_default()
    }

    // ── Structured control flow ──────────────────────────────────────────

    pub fn push_if(&mut self, condition: VarId) {
        self.frames.push(Frame::new(FrameKind::Then { condition }));
    }

    pub fn push_else(&mut self) -> Result<()> {
        let frame = self.pop_frame()?;
        match frame.kind {
            FrameKind::Then { condition } => {
                self.frames.push(Frame::new(FrameKind::Else {
                    condition,
                    then_body: frame.nodes,
                }));
                Ok(())
            }
            other => bail!("push_else outside of an if (in {other:?})"),
        }
    }

    pub fn pop_if(&mut self) -> Result<()> {
        let frame = self.pop_frame()?;
        let node = match frame.kind {
            FrameKind::Then { condition } => IrIf {
                condition,
                then_body: frame.nodes,
                else_body: Vec::new(),
            },
            FrameKind::Else {
                condition,
                then_body,
            } => IrIf {
                condition,
                then_body,
                else_body: frame.nodes,
            },
            other => bail!("pop_if outside of an if (in {other:?})"),
        };
        self.current().nodes.push(CfNode::If(node));
        Ok(())
    }

    pub fn push_loop(&mut self) {
        self.frames.push(Frame::new(FrameKind::Loop));
    }

    pub fn pop_loop(&mut self) -> Result<()> {
        let frame = self.pop_frame()?;
        if !matches!(frame.kind, FrameKind::Loop) {
            bail!("pop_loop outside of a loop (in {:?})", frame.kind);
        }
        self.current().nodes.push(CfNode::Loop(IrLoop { body: frame.nodes }));
        Ok(())
    }

    /// Start emitting code that will run at the top of the innermost loop,
    /// ahead of everything already emitted into its body.
    pub fn begin_loop_prologue(&mut self) -> Result<()> {
        if !matches!(self.current().kind, FrameKind::Loop) {
            bail!("loop prologue requested outside of a loop");
        }
        self.frames.push(Frame::new(FrameKind::LoopPrologue));
        Ok(())
    }

    pub fn end_loop_prologue(&mut self) -> Result<()> {
        let frame = self.pop_frame()?;
        if !matches!(frame.kind, FrameKind::LoopPrologue) {
            bail!("end_loop_prologue without a matching begin");
        }
        let body = std::mem::take(&mut self.current().nodes);
        let mut nodes = frame.nodes;
        nodes.extend(body);
        self.current().nodes = nodes;
        Ok(())
    }

    fn pop_frame(&mut self) -> Result<Frame> {
        if self.frames.len() <= 1 {
            bail!("control-flow frame stack underflow");
        }
        match self.frames.pop() {
            Some(frame) => Ok(frame),
            None => bail!("control-flow frame stack underflow"),
        }
    }

    // ── Finalization ─────────────────────────────────────────────────────

    /// Close the function. `inserts` supplies the code to place at each
    /// marker; markers without an entry simply disappear.
    pub fn finish(
        &mut self,
        name: Option<String>,
        results: Vec<IrType>,
        mut inserts: HashMap<MarkerId, Vec<IrInstr>>,
    ) -> Result<IrFunction> {
        if self.frames.len() != 1 {
            bail!("function finished with {} open control-flow frames", self.frames.len() - 1);
        }
        let state = std::mem::take(self);
        let mut body = state.frames.into_iter().next().map(|f| f.nodes).unwrap_or_default();

        if !state.prologue.is_empty() {
            match body.first_mut() {
                Some(CfNode::Block(block)) => {
                    let mut instrs = state.prologue;
                    instrs.append(&mut block.instructions);
                    block.instructions = instrs;
                }
                _ => body.insert(
                    0,
                    CfNode::Block(IrBlock {
                        instructions: state.prologue,
                        jump: None,
                    }),
                ),
            }
        }
        resolve_markers(&mut body, &mut inserts);

        Ok(IrFunction {
            name,
            params: state.params,
            results,
            locals: state.locals,
            body,
            var_types: state.var_types,
        })
    }
}

fn resolve_markers(body: &mut [CfNode], inserts: &mut HashMap<MarkerId, Vec<IrInstr>>) {
    for node in body {
        match node {
            CfNode::Block(block) => {
                if !block.instructions.iter().any(|i| matches!(i, IrInstr::Marker(_))) {
                    continue;
                }
                let old = std::mem::take(&mut block.instructions);
                for instr in old {
                    match instr {
                        IrInstr::Marker(m) => {
                            block.instructions.extend(inserts.remove(&m).unwrap_or_default())
                        }
                        other => block.instructions.push(other),
                    }
                }
            }
            CfNode::If(i) => {
                resolve_markers(&mut i.then_body, inserts);
                resolve_markers(&mut i.else_body, inserts);
            }
            CfNode::Loop(l) => resolve_markers(&mut l.body, inserts),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_land_in_the_entry_block() {
        let mut b = FunctionBuilder::new();
        let one = b.imm_u32(1);
        let two = b.alu_same(AluOp::IAdd, &[one, one]);
        b.jump(Jump::Return { values: vec![two] });
        let func = b.finish(None, vec![IrType::U32], HashMap::new()).unwrap();

        assert_eq!(func.body.len(), 1, "one block expected");
        let CfNode::Block(block) = &func.body[0] else {
            panic!("expected a block");
        };
        assert!(matches!(block.instructions[0], IrInstr::Const { dest, .. } if dest == one));
        assert_eq!(block.jump, Some(Jump::Return { values: vec![two] }));
    }

    #[test]
    fn if_else_nesting() {
        let mut b = FunctionBuilder::new();
        let cond = b.imm_bool(true);
        b.push_if(cond);
        b.jump(Jump::Break);
        b.push_else().unwrap();
        b.undef(IrType::F32);
        b.pop_if().unwrap();
        let func = b.finish(None, vec![], HashMap::new()).unwrap();

        let CfNode::If(node) = &func.body[1] else {
            panic!("expected an if after the prologue block, got {:?}", func.body);
        };
        assert_eq!(node.condition, cond);
        assert_eq!(node.then_body.len(), 1);
        assert!(node.else_body.is_empty(), "undefs go to the prologue");
    }

    #[test]
    fn loop_prologue_is_spliced_in_front() {
        let mut b = FunctionBuilder::new();
        b.push_loop();
        let x = b.new_var(IrType::U32);
        b.emit(IrInstr::Undef {
            dest: x,
            ty: IrType::U32,
        });
        b.jump(Jump::Break);
        b.begin_loop_prologue().unwrap();
        let y = b.new_var(IrType::U32);
        b.emit(IrInstr::Undef {
            dest: y,
            ty: IrType::U32,
        });
        b.end_loop_prologue().unwrap();
        b.pop_loop().unwrap();
        let func = b.finish(None, vec![], HashMap::new()).unwrap();

        let CfNode::Loop(l) = &func.body[0] else {
            panic!("expected a loop");
        };
        let CfNode::Block(first) = &l.body[0] else {
            panic!("expected a block");
        };
        assert!(matches!(first.instructions[0], IrInstr::Undef { dest, .. } if dest == y));
    }

    #[test]
    fn markers_are_replaced() {
        let mut b = FunctionBuilder::new();
        let m = b.marker();
        b.jump(Jump::Return { values: vec![] });

        b.begin_detached();
        let v = b.new_var(IrType::U32);
        b.emit(IrInstr::Undef {
            dest: v,
            ty: IrType::U32,
        });
        let code = b.end_detached();

        let func = b.finish(None, vec![], HashMap::from([(m, code)])).unwrap();
        let CfNode::Block(block) = &func.body[0] else {
            panic!("expected a block");
        };
        assert_eq!(block.instructions.len(), 1);
        assert!(matches!(block.instructions[0], IrInstr::Undef { .. }));
    }

    #[test]
    fn unbalanced_frames_fail() {
        let mut b = FunctionBuilder::new();
        assert!(b.pop_if().is_err());
        b.push_loop();
        assert!(b.finish(None, vec![], HashMap::new()).is_err());
    }
}
