//! Display implementations and text dump for debugging.

use std::fmt;
use std::fmt::Write as _;

use crate::arena::UniqueArena;
use crate::func::{Function, Terminator};
use crate::instr::{AtomicOp, DerefKind, InstrKind, Intrinsic, Value};
use crate::shader::Shader;
use crate::types::{ArraySize, Scalar, ScalarKind, Type, TypeInner, VectorSize};
use crate::var::{Constant, HowDeclared, Mode, Variable};

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Sint => write!(f, "sint"),
            Self::Uint => write!(f, "uint"),
            Self::Float => write!(f, "float"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for VectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::IMin => "imin",
            Self::IMax => "imax",
            Self::UMin => "umin",
            Self::UMax => "umax",
            Self::Exchange => "xchg",
            Self::CompareExchange => "cmpxchg",
        };
        f.write_str(name)
    }
}

/// Formats a type using the type arena for resolving inner references.
pub fn format_type(ty: &Type, types: &UniqueArena<Type>) -> String {
    if let Some(ref name) = ty.name {
        return name.clone();
    }
    format_type_inner(&ty.inner, types)
}

/// Formats a [`TypeInner`] using the type arena for resolving references.
pub fn format_type_inner(inner: &TypeInner, types: &UniqueArena<Type>) -> String {
    match inner {
        TypeInner::Scalar(s) => format!("{s}"),
        TypeInner::Vector { size, scalar } => format!("vec{size}<{scalar}>"),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
            stride,
        } => format!("mat{columns}x{rows}<{scalar}> /*stride {stride}*/"),
        TypeInner::Atomic(s) => format!("atomic<{s}>"),
        TypeInner::Array { base, size, stride } => {
            let base_str = format_type(&types[*base], types);
            match size {
                ArraySize::Constant(n) => format!("array<{base_str}, {n}> /*stride {stride}*/"),
                ArraySize::Dynamic => format!("array<{base_str}> /*stride {stride}*/"),
            }
        }
        TypeInner::Struct { members, span } => {
            let fields: Vec<_> = members
                .iter()
                .map(|m| format!("{}@{}", format_type(&types[m.ty], types), m.offset))
                .collect();
            format!("struct {{ {} }} /*span {span}*/", fields.join(", "))
        }
    }
}

fn format_constant(c: &Constant) -> String {
    match c {
        Constant::Zero => "zero".into(),
        Constant::Scalar(bits) => format!("{bits:#x}"),
        Constant::Composite(parts) => {
            let parts: Vec<_> = parts.iter().map(format_constant).collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn format_variable(var: &Variable, types: &UniqueArena<Type>) -> String {
    let mut line = format!(
        "decl_var {} {} {}",
        var.mode,
        format_type(&types[var.ty], types),
        var.name.as_deref().unwrap_or("_")
    );
    if let Some(slot) = var.data.location {
        let _ = write!(line, " @location({slot})");
    }
    if let Some(sv) = var.data.system_value {
        let _ = write!(line, " @builtin({sv})");
    }
    if let Some(binding) = var.data.binding {
        let _ = write!(line, " @binding{binding}");
    }
    if let Some(layout) = var.data.explicit {
        let _ = write!(
            line,
            " @explicit(offset={}, size={}, align={})",
            layout.offset, layout.size, layout.align
        );
    }
    if matches!(var.mode, Mode::ShaderIn | Mode::ShaderOut) || var.data.explicit.is_some() {
        let _ = write!(line, " (driver_location={})", var.data.driver_location);
    }
    if var.data.how_declared == HowDeclared::Injected {
        line.push_str(" /*injected*/");
    }
    if let Some(init) = &var.init {
        let _ = write!(line, " = {}", format_constant(init));
    }
    line
}

fn list(values: &[Value]) -> String {
    let parts: Vec<_> = values.iter().map(|v| format!("%{}", v.index())).collect();
    parts.join(", ")
}

fn format_intrinsic(intrinsic: &Intrinsic) -> String {
    let op = intrinsic.op();
    let srcs = list(&intrinsic.srcs());
    let extra = match intrinsic {
        Intrinsic::StoreDeref { write_mask, .. }
        | Intrinsic::StoreSsbo { write_mask, .. }
        | Intrinsic::StoreShared { write_mask, .. }
        | Intrinsic::StoreScratch { write_mask, .. }
        | Intrinsic::StoreGlobal { write_mask, .. } => format!(" (wrmask={write_mask:#x})"),
        Intrinsic::DerefAtomic { op, .. }
        | Intrinsic::SsboAtomic { op, .. }
        | Intrinsic::SharedAtomic { op, .. }
        | Intrinsic::GlobalAtomic { op, .. } => format!(" ({op})"),
        Intrinsic::LoadSystemValue(sv) => format!(" ({sv})"),
        Intrinsic::ResourceIndex { binding, .. } => format!(" (binding={binding})"),
        Intrinsic::LoadDescriptor { mode, .. } => format!(" ({mode})"),
        Intrinsic::LoadUbo {
            align,
            range_base,
            range,
            ..
        } => format!(
            " (align={}+{}, range_base={range_base}, range={range})",
            align.mul, align.offset
        ),
        Intrinsic::LoadUniform {
            base, range, align, ..
        }
        | Intrinsic::LoadPushConstant {
            base, range, align, ..
        }
        | Intrinsic::LoadConstant {
            base, range, align, ..
        } => format!(
            " (base={base}, range={range}, align={}+{})",
            align.mul, align.offset
        ),
        Intrinsic::LoadSsbo { align, .. }
        | Intrinsic::LoadShared { align, .. }
        | Intrinsic::LoadScratch { align, .. }
        | Intrinsic::LoadGlobal { align, .. } => format!(" (align={}+{})", align.mul, align.offset),
        _ => String::new(),
    };
    format!("{op} ({srcs}){extra}")
}

/// Formats the right-hand side of an instruction.
pub fn format_instr(kind: &InstrKind, shader: &Shader) -> String {
    match kind {
        InstrKind::Const(values) => {
            let parts: Vec<_> = values.iter().map(|v| format!("{v:#x}")).collect();
            format!("load_const ({})", parts.join(", "))
        }
        InstrKind::Undef => "undefined".into(),
        InstrKind::Alu { op, srcs } => format!("{op} {}", list(srcs)),
        InstrKind::Intrinsic(intrinsic) => format_intrinsic(intrinsic),
        InstrKind::Deref(deref) => {
            let ty = format_type(&shader.types[deref.ty], &shader.types);
            match deref.kind {
                DerefKind::Var(var) => {
                    let name = shader
                        .variables
                        .try_get(var)
                        .and_then(|v| v.name.as_deref())
                        .unwrap_or("_");
                    format!("deref_var &{name} ({} {ty})", deref.mode)
                }
                DerefKind::Array { parent, index } => format!(
                    "deref_array &%{}[%{}] ({} {ty})",
                    parent.index(),
                    index.index(),
                    deref.mode
                ),
                DerefKind::Struct { parent, member } => format!(
                    "deref_struct &%{}->{member} ({} {ty})",
                    parent.index(),
                    deref.mode
                ),
            }
        }
        InstrKind::Phi(srcs) => {
            let parts: Vec<_> = srcs
                .iter()
                .map(|s| format!("block_{}: %{}", s.pred.index(), s.value.index()))
                .collect();
            format!("phi {}", parts.join(", "))
        }
        InstrKind::Call { callee, args } => {
            let name = shader.functions[*callee].name.as_deref().unwrap_or("_");
            format!("call {name} ({})", list(args))
        }
        InstrKind::Param(index) => format!("param {index}"),
    }
}

fn dump_function(out: &mut String, func: &Function, shader: &Shader) {
    let name = func.name.as_deref().unwrap_or("_");
    let _ = writeln!(out, "impl {name} {{");
    let mut order = func.reverse_postorder();
    // Unreachable blocks still get printed, after the reachable ones.
    for (block, _) in func.blocks.iter() {
        if !order.contains(&block) {
            order.push(block);
        }
    }
    for block in order {
        let data = &func.blocks[block];
        let _ = writeln!(out, "    block block_{}:", block.index());
        for &value in &data.instrs {
            let instr = &func.instrs[value];
            let rhs = format_instr(&instr.kind, shader);
            match instr.def {
                Some(def) => {
                    let def = def.to_string();
                    let _ = writeln!(out, "        {def:<6} %{} = {rhs}", value.index());
                }
                None => {
                    let _ = writeln!(out, "        {rhs}");
                }
            }
        }
        let term = match &data.terminator {
            Terminator::Jump(target) => format!("jump block_{}", target.index()),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => format!(
                "branch %{} ? block_{} : block_{}",
                cond.index(),
                then_block.index(),
                else_block.index()
            ),
            Terminator::Return(Some(v)) => format!("return %{}", v.index()),
            Terminator::Return(None) => "return".into(),
            Terminator::Discard => "discard".into(),
            Terminator::Unreachable => "unreachable".into(),
        };
        let _ = writeln!(out, "        {term}");
    }
    out.push_str("}\n");
}

/// Produces a human-readable text dump of a [`Shader`].
pub fn dump_shader(shader: &Shader) -> String {
    let mut out = String::new();
    let info = &shader.info;

    let _ = writeln!(out, "shader: {}", info.stage);
    if let Some(name) = &info.name {
        let _ = writeln!(out, "name: {name}");
    }
    let _ = writeln!(out, "inputs_read: {}", info.inputs_read);
    let _ = writeln!(out, "outputs_written: {}", info.outputs_written);
    let _ = writeln!(out, "system_values_read: {}", info.system_values_read);
    if info.stage == crate::Stage::Compute {
        let [x, y, z] = info.workgroup_size;
        let _ = writeln!(out, "workgroup_size: {x}, {y}, {z}");
    }
    let _ = writeln!(out, "shared_size: {}", info.shared_size);
    let _ = writeln!(out, "scratch_size: {}", info.scratch_size);
    let _ = writeln!(out, "constant_data_size: {}", info.constant_data_size);

    for (_, var) in shader.variables.iter() {
        let _ = writeln!(out, "{}", format_variable(var, &shader.types));
    }

    for (handle, func) in shader.functions.iter() {
        if handle == shader.entry_point {
            out.push_str("entrypoint ");
        }
        dump_function(&mut out, func, shader);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::slot::Slot;
    use crate::var::DescriptorBinding;
    use crate::{Def, Stage};

    #[test]
    fn display_scalar() {
        assert_eq!(format!("{}", Scalar::F32), "f32");
        assert_eq!(format!("{}", Scalar::I32), "i32");
        assert_eq!(format!("{}", Scalar::U64), "u64");
        assert_eq!(format!("{}", Scalar::BOOL), "bool");
    }

    #[test]
    fn dump_lists_variables_and_instructions() {
        let mut shader = Shader::new(Stage::Vertex);
        let vec4 = shader.add_type(TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        });
        let out = shader
            .add_variable(Variable::new("pos", vec4, Mode::ShaderOut).with_location(Slot::POS));
        shader.add_variable(
            Variable::new("ubo", vec4, Mode::Ubo).with_binding(DescriptorBinding::new(0, 1)),
        );
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let zero = b.zero(Def::new(4, 32));
        let d = b.deref_var(out, Mode::ShaderOut, vec4);
        b.store_deref(d, zero);

        let dump = dump_shader(&shader);
        assert!(dump.contains("shader: vertex"));
        assert!(dump.contains("decl_var shader_out vec4<f32> pos @location(POS)"));
        assert!(dump.contains("decl_var ubo vec4<f32> ubo @binding(0, 1)"));
        assert!(dump.contains("load_const (0x0, 0x0, 0x0, 0x0)"));
        assert!(dump.contains("deref_var &pos (shader_out vec4<f32>)"));
        assert!(dump.contains("store_deref (%1, %0) (wrmask=0xf)"));
        assert!(dump.contains("entrypoint impl main {"));
    }
}
