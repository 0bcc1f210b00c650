//! Decoration and execution-mode tracking.
//!
//! Decorations are collected raw while the annotation section is read, then
//! flattened once: group references are expanded recursively so consumers
//! only ever see plain records on the decorated ID.

use super::values::{SpvId, Value};
use super::Translator;
use crate::ir::{DepthLayout, Primitive, ShaderStage, TessSpacing};
use crate::parser::Instruction;
use anyhow::{anyhow, bail, Context, Result};
use rspirv::spirv::{Decoration, ExecutionMode, Op};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecorationRecord {
    /// Struct member the decoration applies to, `None` for the whole ID.
    pub member: Option<u32>,
    pub decoration: Decoration,
    pub literals: Vec<u32>,
}

impl DecorationRecord {
    pub fn literal(&self, i: usize) -> Result<u32> {
        self.literals
            .get(i)
            .copied()
            .ok_or_else(|| anyhow!("{:?} decoration is missing literal operand {i}", self.decoration))
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Record(DecorationRecord),
    Group { group: SpvId, member: Option<u32> },
}

#[derive(Debug, Clone)]
pub struct ExecutionModeRecord {
    pub mode: ExecutionMode,
    pub operands: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct Decorations {
    raw: BTreeMap<SpvId, Vec<Entry>>,
    flat: HashMap<SpvId, Vec<DecorationRecord>>,
    modes: HashMap<SpvId, Vec<ExecutionModeRecord>>,
}

impl Decorations {
    pub fn add(&mut self, target: SpvId, record: DecorationRecord) {
        self.raw.entry(target).or_default().push(Entry::Record(record));
    }

    /// `target` (or one of its members) inherits everything on `group`.
    pub fn add_group(&mut self, target: SpvId, group: SpvId, member: Option<u32>) {
        self.raw
            .entry(target)
            .or_default()
            .push(Entry::Group { group, member });
    }

    pub fn add_execution_mode(&mut self, entry: SpvId, record: ExecutionModeRecord) {
        self.modes.entry(entry).or_default().push(record);
    }

    /// Expand all group references. Must run once, after the last
    /// annotation instruction.
    pub fn flatten(&mut self) -> Result<()> {
        let mut flat = HashMap::new();
        for &id in self.raw.keys() {
            let mut visiting = HashSet::new();
            let records = self.expand(id, &mut visiting)?;
            flat.insert(id, records);
        }
        self.flat = flat;
        Ok(())
    }

    fn expand(&self, id: SpvId, visiting: &mut HashSet<SpvId>) -> Result<Vec<DecorationRecord>> {
        if !visiting.insert(id) {
            bail!("decoration group {id} includes itself");
        }
        let mut out = Vec::new();
        for entry in self.raw.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            match entry {
                Entry::Record(rec) => out.push(rec.clone()),
                Entry::Group { group, member } => {
                    for mut rec in self.expand(*group, visiting)? {
                        if member.is_some() {
                            rec.member = *member;
                        }
                        out.push(rec);
                    }
                }
            }
        }
        visiting.remove(&id);
        Ok(out)
    }

    /// Every decoration on `id`, member decorations included.
    pub fn of(&self, id: SpvId) -> &[DecorationRecord] {
        self.flat.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decorations on the ID as a whole.
    pub fn whole(&self, id: SpvId) -> impl Iterator<Item = &DecorationRecord> {
        self.of(id).iter().filter(|d| d.member.is_none())
    }

    pub fn member(&self, id: SpvId, member: u32) -> impl Iterator<Item = &DecorationRecord> {
        self.of(id).iter().filter(move |d| d.member == Some(member))
    }

    pub fn find(&self, id: SpvId, decoration: Decoration) -> Option<&DecorationRecord> {
        self.whole(id).find(|d| d.decoration == decoration)
    }

    pub fn has(&self, id: SpvId, decoration: Decoration) -> bool {
        self.find(id, decoration).is_some()
    }

    pub fn execution_modes(&self, entry: SpvId) -> &[ExecutionModeRecord] {
        self.modes.get(&entry).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── Annotation instructions ──────────────────────────────────────────────────

impl Translator<'_> {
    pub(super) fn handle_decoration(&mut self, inst: &Instruction<'_>) -> Result<()> {
        match inst.op() {
            Some(Op::DecorationGroup) => {
                self.values.define(SpvId(inst.word(1)?), Value::DecorationGroup)?;
            }
            Some(Op::Decorate | Op::DecorateId) => {
                let target = SpvId(inst.word(1)?);
                if let Some(record) = self.decoration_record(None, inst.word(2)?, inst.words_from(3)) {
                    self.decorations.add(target, record);
                }
            }
            Some(Op::MemberDecorate) => {
                let target = SpvId(inst.word(1)?);
                let member = inst.word(2)?;
                if let Some(record) = self.decoration_record(Some(member), inst.word(3)?, inst.words_from(4)) {
                    self.decorations.add(target, record);
                }
            }
            Some(Op::GroupDecorate) => {
                let group = SpvId(inst.word(1)?);
                for &target in inst.words_from(2) {
                    self.decorations.add_group(SpvId(target), group, None);
                }
            }
            Some(Op::GroupMemberDecorate) => {
                let group = SpvId(inst.word(1)?);
                for pair in inst.words_from(2).chunks(2) {
                    let [target, member] = pair else {
                        bail!("OpGroupMemberDecorate has an unpaired target");
                    };
                    self.decorations.add_group(SpvId(*target), group, Some(*member));
                }
            }
            // Semantic strings carry no information we use.
            Some(Op::DecorateString | Op::MemberDecorateString) => {}
            _ => bail!("unhandled decoration instruction {}", inst.name()),
        }
        Ok(())
    }

    fn decoration_record(&mut self, member: Option<u32>, raw: u32, literals: &[u32]) -> Option<DecorationRecord> {
        match Decoration::from_u32(raw) {
            Some(decoration) => Some(DecorationRecord {
                member,
                decoration,
                literals: literals.to_vec(),
            }),
            None => {
                self.warn(format!("unknown decoration {raw} ignored"));
                None
            }
        }
    }

    pub(super) fn handle_execution_mode_decl(&mut self, inst: &Instruction<'_>) -> Result<()> {
        let entry = SpvId(inst.word(1)?);
        let raw = inst.word(2)?;
        let Some(mode) = ExecutionMode::from_u32(raw) else {
            bail!("unknown execution mode {raw}");
        };
        self.decorations.add_execution_mode(
            entry,
            ExecutionModeRecord {
                mode,
                operands: inst.words_from(3).to_vec(),
            },
        );
        Ok(())
    }

    // ── Execution modes ──────────────────────────────────────────────────

    /// Fold the execution modes of the selected entry point into the shader
    /// metadata, checking each against the stage.
    pub(super) fn apply_execution_modes(&mut self, entry: SpvId) -> Result<()> {
        let modes = self.decorations.execution_modes(entry).to_vec();
        for rec in modes {
            self.apply_execution_mode(&rec)
                .with_context(|| format!("execution mode {:?}", rec.mode))?;
        }
        Ok(())
    }

    fn require_stage(&self, allowed: &[ShaderStage]) -> Result<()> {
        if !allowed.contains(&self.stage) {
            bail!("not allowed in a {:?} shader", self.stage);
        }
        Ok(())
    }

    fn apply_execution_mode(&mut self, rec: &ExecutionModeRecord) -> Result<()> {
        use ShaderStage::*;
        let operand = |i: usize| -> Result<u32> {
            rec.operands
                .get(i)
                .copied()
                .with_context(|| format!("missing operand {i}"))
        };
        let is_tess = matches!(self.stage, TessControl | TessEval);

        match rec.mode {
            ExecutionMode::OriginUpperLeft | ExecutionMode::OriginLowerLeft => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.origin_upper_left = rec.mode == ExecutionMode::OriginUpperLeft;
            }
            ExecutionMode::EarlyFragmentTests => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.early_fragment_tests = true;
            }
            ExecutionMode::PixelCenterInteger => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.pixel_center_integer = true;
            }
            ExecutionMode::DepthReplacing => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.depth_layout = DepthLayout::Any;
            }
            ExecutionMode::DepthGreater => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.depth_layout = DepthLayout::Greater;
            }
            ExecutionMode::DepthLess => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.depth_layout = DepthLayout::Less;
            }
            ExecutionMode::DepthUnchanged => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.depth_layout = DepthLayout::Unchanged;
            }
            ExecutionMode::StencilRefReplacingEXT => {
                self.require_stage(&[Fragment])?;
                self.info.fragment.stencil_ref_replacing = true;
            }
            ExecutionMode::Invocations => {
                self.require_stage(&[Geometry])?;
                self.info.geometry.invocations = operand(0)?.max(1);
            }
            ExecutionMode::LocalSize => {
                self.require_stage(&[Compute])?;
                self.info.workgroup_size = [operand(0)?, operand(1)?, operand(2)?];
            }
            ExecutionMode::LocalSizeId => {
                self.require_stage(&[Compute])?;
                let mut size = [0; 3];
                for (i, s) in size.iter_mut().enumerate() {
                    *s = self.values.constant(SpvId(operand(i)?))?.scalar_u64()? as u32;
                }
                self.info.workgroup_size = size;
            }
            ExecutionMode::LocalSizeHint | ExecutionMode::LocalSizeHintId => {}
            ExecutionMode::OutputVertices => {
                if is_tess {
                    self.info.tess.vertices_out = operand(0)?;
                } else if self.stage == Geometry {
                    self.info.geometry.vertices_out = operand(0)?;
                } else {
                    bail!("not allowed in a {:?} shader", self.stage);
                }
            }
            ExecutionMode::InputPoints
            | ExecutionMode::InputLines
            | ExecutionMode::InputLinesAdjacency
            | ExecutionMode::Triangles
            | ExecutionMode::InputTrianglesAdjacency
            | ExecutionMode::Quads
            | ExecutionMode::Isolines => {
                let (primitive, vertices) = match rec.mode {
                    ExecutionMode::InputPoints => (Primitive::Points, 1),
                    ExecutionMode::InputLines => (Primitive::Lines, 2),
                    ExecutionMode::InputLinesAdjacency => (Primitive::LinesAdjacency, 4),
                    ExecutionMode::Triangles => (Primitive::Triangles, 3),
                    ExecutionMode::InputTrianglesAdjacency => (Primitive::TrianglesAdjacency, 6),
                    ExecutionMode::Quads => (Primitive::Quads, 0),
                    _ => (Primitive::Isolines, 0),
                };
                if is_tess {
                    if !matches!(primitive, Primitive::Triangles | Primitive::Quads | Primitive::Isolines) {
                        bail!("{primitive:?} is not a tessellation primitive");
                    }
                    self.info.tess.primitive_mode = Some(primitive);
                } else if self.stage == Geometry {
                    if vertices == 0 {
                        bail!("{primitive:?} is not a geometry input primitive");
                    }
                    self.info.geometry.input_primitive = Some(primitive);
                    self.info.geometry.vertices_in = vertices;
                } else {
                    bail!("not allowed in a {:?} shader", self.stage);
                }
            }
            ExecutionMode::OutputPoints | ExecutionMode::OutputLineStrip | ExecutionMode::OutputTriangleStrip => {
                self.require_stage(&[Geometry])?;
                self.info.geometry.output_primitive = Some(match rec.mode {
                    ExecutionMode::OutputPoints => Primitive::Points,
                    ExecutionMode::OutputLineStrip => Primitive::LineStrip,
                    _ => Primitive::TriangleStrip,
                });
            }
            ExecutionMode::SpacingEqual | ExecutionMode::SpacingFractionalEven | ExecutionMode::SpacingFractionalOdd => {
                self.require_stage(&[TessControl, TessEval])?;
                self.info.tess.spacing = Some(match rec.mode {
                    ExecutionMode::SpacingEqual => TessSpacing::Equal,
                    ExecutionMode::SpacingFractionalEven => TessSpacing::FractionalEven,
                    _ => TessSpacing::FractionalOdd,
                });
            }
            ExecutionMode::VertexOrderCw | ExecutionMode::VertexOrderCcw => {
                self.require_stage(&[TessControl, TessEval])?;
                self.info.tess.ccw = rec.mode == ExecutionMode::VertexOrderCcw;
            }
            ExecutionMode::PointMode => {
                self.require_stage(&[TessControl, TessEval])?;
                self.info.tess.point_mode = true;
            }
            ExecutionMode::Xfb => self.warn("transform feedback execution mode ignored".to_string()),
            ExecutionMode::ContractionOff | ExecutionMode::VecTypeHint => {
                self.warn(format!("kernel execution mode {:?} ignored", rec.mode));
            }
            other => bail!("unhandled execution mode {other:?}"),
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(decoration: Decoration, literals: &[u32]) -> DecorationRecord {
        DecorationRecord {
            member: None,
            decoration,
            literals: literals.to_vec(),
        }
    }

    #[test]
    fn groups_expand_into_targets() {
        let mut d = Decorations::default();
        d.add(SpvId(10), rec(Decoration::DescriptorSet, &[1]));
        d.add(SpvId(10), rec(Decoration::Binding, &[3]));
        d.add_group(SpvId(20), SpvId(10), None);
        d.add(SpvId(20), rec(Decoration::NonWritable, &[]));
        d.flatten().unwrap();

        let kinds: Vec<_> = d.of(SpvId(20)).iter().map(|r| r.decoration).collect();
        assert_eq!(
            kinds,
            vec![Decoration::DescriptorSet, Decoration::Binding, Decoration::NonWritable]
        );
        assert_eq!(d.find(SpvId(20), Decoration::Binding).unwrap().literal(0).unwrap(), 3);
    }

    #[test]
    fn nested_groups_are_expanded_transitively() {
        let mut d = Decorations::default();
        d.add(SpvId(1), rec(Decoration::Flat, &[]));
        d.add_group(SpvId(2), SpvId(1), None);
        d.add(SpvId(2), rec(Decoration::Centroid, &[]));
        d.add_group(SpvId(30), SpvId(2), None);
        d.flatten().unwrap();
        assert!(d.has(SpvId(30), Decoration::Flat), "inner group must reach the target");
        assert!(d.has(SpvId(30), Decoration::Centroid));
    }

    #[test]
    fn member_group_applies_to_the_member_only() {
        let mut d = Decorations::default();
        d.add(SpvId(1), rec(Decoration::Offset, &[16]));
        d.add_group(SpvId(5), SpvId(1), Some(2));
        d.flatten().unwrap();
        assert!(d.find(SpvId(5), Decoration::Offset).is_none());
        let member: Vec<_> = d.member(SpvId(5), 2).collect();
        assert_eq!(member.len(), 1);
        assert_eq!(member[0].literals, vec![16]);
    }

    #[test]
    fn cyclic_groups_are_rejected() {
        let mut d = Decorations::default();
        d.add_group(SpvId(1), SpvId(2), None);
        d.add_group(SpvId(2), SpvId(1), None);
        assert!(d.flatten().is_err());
    }
}
