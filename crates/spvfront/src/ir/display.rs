//! Textual dump of translated shaders.

use super::types::*;
use heck::ToSnakeCase;
use std::fmt::{self, Write};

fn op_name<T: fmt::Debug>(op: &T) -> String {
    format!("{op:?}").to_snake_case()
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = (0..self.bits.len())
            .map(|i| match self.ty.base {
                BaseType::Float => format!("{:?}", self.as_f64(i)),
                BaseType::Int => self.as_i64(i).to_string(),
                BaseType::Bool => (self.bits[i] != 0).to_string(),
                _ => self.as_u64(i).to_string(),
            })
            .collect();
        if parts.len() == 1 {
            write!(f, "{} {}", self.ty, parts[0])
        } else {
            write!(f, "{} ({})", self.ty, parts.join(", "))
        }
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableRef::Global(i) => write!(f, "@{i}"),
            VariableRef::Local(i) => write!(f, "%{i}"),
        }
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemType::Vector(ty) => write!(f, "{ty}"),
            MemType::Matrix {
                column,
                columns,
                row_major,
                stride,
            } => {
                write!(f, "mat{columns}<{column}>")?;
                if *row_major {
                    write!(f, " row_major")?;
                }
                if *stride != 0 {
                    write!(f, " stride={stride}")?;
                }
                Ok(())
            }
            MemType::Array {
                element,
                length,
                stride,
            } => {
                if *length == 0 {
                    write!(f, "[{element}]")?;
                } else {
                    write!(f, "[{element}; {length}]")?;
                }
                if *stride != 0 {
                    write!(f, " stride={stride}")?;
                }
                Ok(())
            }
            MemType::Struct(fields) => {
                write!(f, "struct {{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(name) = &field.name {
                        write!(f, "{name}: ")?;
                    }
                    write!(f, "{} @{}", field.ty, field.offset)?;
                }
                write!(f, " }}")
            }
            MemType::Image(info) => write!(f, "image<{}>", image_desc(info)),
            MemType::Sampler => write!(f, "sampler"),
            MemType::SampledImage(info) => write!(f, "sampled_image<{}>", image_desc(info)),
        }
    }
}

fn image_desc(info: &ImageInfo) -> String {
    let mut s = op_name(&info.dim);
    if info.arrayed {
        s.push_str(" array");
    }
    if info.multisampled {
        s.push_str(" ms");
    }
    if info.shadow {
        s.push_str(" shadow");
    }
    if info.format != PixelFormat::None {
        let _ = write!(s, " {:?}", info.format);
    }
    s
}

impl fmt::Display for IrVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", op_name(&self.mode), self.ty)?;
        if let Some(name) = &self.name {
            write!(f, " \"{name}\"")?;
        }
        let d = &self.data;
        if let Some(builtin) = d.builtin {
            write!(f, " builtin={builtin:?}")?;
        }
        if let Some(location) = d.location {
            write!(f, " location={location}")?;
        }
        if let Some(set) = d.descriptor_set {
            write!(f, " set={set}")?;
        }
        if let Some(binding) = d.binding {
            write!(f, " binding={binding}")?;
        }
        if d.interpolation != Interpolation::Smooth {
            write!(f, " {}", op_name(&d.interpolation))?;
        }
        if d.patch {
            write!(f, " patch")?;
        }
        if self.initializer.is_some() {
            write!(f, " initialized")?;
        }
        Ok(())
    }
}

fn list(vars: &[VarId]) -> String {
    vars.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn fmt_instr(instr: &IrInstr, func: &IrFunction, out: &mut String) -> fmt::Result {
    match instr {
        IrInstr::Const { dest, value } => write!(out, "{dest} = const {value}"),
        IrInstr::Undef { dest, ty } => write!(out, "{dest} = undef {ty}"),
        IrInstr::Alu { dest, op, srcs } => write!(
            out,
            "{dest}: {} = {} {}",
            func.var_type(*dest),
            op_name(op),
            list(srcs)
        ),
        IrInstr::Swizzle {
            dest,
            src,
            components,
        } => {
            const LANES: &[u8] = b"xyzwabcdefghijkl";
            let mask: String = components
                .iter()
                .map(|&c| LANES.get(usize::from(c)).copied().unwrap_or(b'?') as char)
                .collect();
            write!(out, "{dest} = {src}.{mask}")
        }
        IrInstr::Deref { dest, kind } => match kind {
            DerefKind::Var(var) => write!(out, "{dest} = &{var}"),
            DerefKind::Struct { parent, member } => write!(out, "{dest} = &{parent}->{member}"),
            DerefKind::Array { parent, index } => write!(out, "{dest} = &{parent}[{index}]"),
            DerefKind::PtrAsArray { parent, index } => {
                write!(out, "{dest} = &({parent} + {index})")
            }
            DerefKind::Cast {
                parent,
                mode,
                ty,
                stride,
            } => write!(
                out,
                "{dest} = cast {parent} as {} {ty} stride={stride}",
                op_name(mode)
            ),
        },
        IrInstr::Load { dest, deref } => {
            write!(out, "{dest}: {} = load {deref}", func.var_type(*dest))
        }
        IrInstr::Store {
            deref,
            value,
            write_mask,
        } => write!(out, "store {deref}, {value} mask={write_mask:#x}"),
        IrInstr::Copy { dest, src } => write!(out, "copy {dest}, {src}"),
        IrInstr::Intrinsic {
            dest,
            op,
            srcs,
            indices,
        } => {
            if let Some(dest) = dest {
                write!(out, "{dest}: {} = ", func.var_type(*dest))?;
            }
            write!(out, "@{}({})", op_name(op), list(srcs))?;
            if !indices.is_empty() {
                write!(out, " {indices:?}")?;
            }
            Ok(())
        }
        IrInstr::Tex(tex) => {
            write!(
                out,
                "{}: {} = tex.{} {}",
                tex.dest,
                func.var_type(tex.dest),
                op_name(&tex.op),
                op_name(&tex.dim)
            )?;
            if tex.is_array {
                write!(out, " array")?;
            }
            if tex.is_shadow {
                write!(out, " shadow")?;
            }
            for (src, var) in &tex.sources {
                write!(out, " {}={var}", op_name(src))?;
            }
            Ok(())
        }
        IrInstr::Call {
            dests,
            function,
            args,
        } => {
            if !dests.is_empty() {
                write!(out, "{} = ", list(dests))?;
            }
            write!(out, "call {function}({})", list(args))
        }
        IrInstr::Marker(m) => write!(out, "marker {}", m.0),
    }
}

fn fmt_body(body: &[CfNode], func: &IrFunction, depth: usize, out: &mut String) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for node in body {
        match node {
            CfNode::Block(block) => {
                for instr in &block.instructions {
                    out.push_str(&pad);
                    fmt_instr(instr, func, out)?;
                    out.push('\n');
                }
                match &block.jump {
                    Some(Jump::Break) => writeln!(out, "{pad}break")?,
                    Some(Jump::Continue) => writeln!(out, "{pad}continue")?,
                    Some(Jump::Return { values }) if values.is_empty() => writeln!(out, "{pad}return")?,
                    Some(Jump::Return { values }) => writeln!(out, "{pad}return {}", list(values))?,
                    None => {}
                }
            }
            CfNode::If(node) => {
                writeln!(out, "{pad}if {} {{", node.condition)?;
                fmt_body(&node.then_body, func, depth + 1, out)?;
                if !node.else_body.is_empty() {
                    writeln!(out, "{pad}}} else {{")?;
                    fmt_body(&node.else_body, func, depth + 1, out)?;
                }
                writeln!(out, "{pad}}}")?;
            }
            CfNode::Loop(l) => {
                writeln!(out, "{pad}loop {{")?;
                fmt_body(&l.body, func, depth + 1, out)?;
                writeln!(out, "{pad}}}")?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{p}: {}", self.var_type(*p)))
            .collect();
        write!(f, "fn {}({})", self.name.as_deref().unwrap_or("_"), params.join(", "))?;
        if !self.results.is_empty() {
            let results: Vec<String> = self.results.iter().map(|t| t.to_string()).collect();
            write!(f, " -> {}", results.join(", "))?;
        }
        writeln!(f, " {{")?;
        for (i, local) in self.locals.iter().enumerate() {
            writeln!(f, "  %{i}: {local}")?;
        }
        let mut body = String::new();
        fmt_body(&self.body, self, 1, &mut body)?;
        f.write_str(&body)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.info;
        writeln!(f, "shader {} \"{}\"", op_name(&info.stage), info.entry_point)?;
        match info.stage {
            ShaderStage::Compute => {
                let [x, y, z] = info.workgroup_size;
                writeln!(f, "  workgroup_size {x} {y} {z}")?;
                if info.shared_size != 0 {
                    writeln!(f, "  shared_size {}", info.shared_size)?;
                }
            }
            ShaderStage::Fragment => {
                let fs = &info.fragment;
                writeln!(
                    f,
                    "  origin_upper_left={} pixel_center_integer={} early_fragment_tests={} depth={}",
                    fs.origin_upper_left,
                    fs.pixel_center_integer,
                    fs.early_fragment_tests,
                    op_name(&fs.depth_layout)
                )?;
            }
            ShaderStage::Geometry => {
                let gs = &info.geometry;
                writeln!(
                    f,
                    "  input={:?} output={:?} vertices_in={} vertices_out={} invocations={}",
                    gs.input_primitive, gs.output_primitive, gs.vertices_in, gs.vertices_out, gs.invocations
                )?;
            }
            ShaderStage::TessControl | ShaderStage::TessEval => {
                let ts = &info.tess;
                writeln!(
                    f,
                    "  primitive={:?} spacing={:?} ccw={} point_mode={} vertices_out={}",
                    ts.primitive_mode, ts.spacing, ts.ccw, ts.point_mode, ts.vertices_out
                )?;
            }
            ShaderStage::Vertex => {}
        }
        for (i, var) in self.variables.iter().enumerate() {
            writeln!(f, "@{i}: {var}")?;
        }
        for binding in &self.bindings {
            write!(
                f,
                "{} set={} binding={} {}",
                op_name(&binding.mode),
                binding.descriptor_set,
                binding.binding,
                binding.ty
            )?;
            match &binding.name {
                Some(name) => writeln!(f, " \"{name}\"")?,
                None => writeln!(f)?,
            }
        }
        for (i, func) in self.functions.iter().enumerate() {
            if i as u32 == self.entry_point.0 {
                write!(f, "entry ")?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_print_by_base_type() {
        assert_eq!(ConstValue::f32(1.5).to_string(), "f32 1.5");
        assert_eq!(ConstValue::i32(-4).to_string(), "i32 -4");
        let v = ConstValue::new(IrType::U32.with_components(2), vec![1, 2]);
        assert_eq!(v.to_string(), "u32x2 (1, 2)");
    }

    #[test]
    fn op_names_are_snake_case() {
        assert_eq!(op_name(&AluOp::FRoundEven), "f_round_even");
        assert_eq!(op_name(&Intrinsic::LoadUbo), "load_ubo");
    }
}
