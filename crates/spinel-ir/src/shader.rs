//! The shader: functions, variables, types and stage-level metadata.

use std::fmt;

use crate::arena::{Arena, Handle, Pool, UniqueArena};
use crate::func::Function;
use crate::instr::{InstrKind, Intrinsic};
use crate::slot::{Slot, SlotSet, SysvalSet};
use crate::types::{Type, TypeInner};
use crate::var::{Mode, Variable};

/// Pipeline stage.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Stage {
    Vertex,
    TessCtrl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    /// Returns `true` for stages that may feed the rasterizer.
    pub fn is_pre_raster(self) -> bool {
        matches!(self, Self::Vertex | Self::TessEval | Self::Geometry)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessCtrl => "tess_ctrl",
            Self::TessEval => "tess_eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stage-level facts about a shader, refreshed by [`Shader::gather_info`].
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderInfo {
    pub name: Option<String>,
    pub stage: Stage,
    pub inputs_read: SlotSet,
    pub outputs_written: SlotSet,
    pub system_values_read: SysvalSet,
    pub workgroup_size: [u32; 3],
    pub shared_size: u32,
    pub scratch_size: u32,
    pub constant_data_size: u32,
    pub num_uniforms: u32,
}

impl ShaderInfo {
    pub fn new(stage: Stage) -> Self {
        Self {
            name: None,
            stage,
            inputs_read: SlotSet::EMPTY,
            outputs_written: SlotSet::EMPTY,
            system_values_read: SysvalSet::EMPTY,
            workgroup_size: [1, 1, 1],
            shared_size: 0,
            scratch_size: 0,
            constant_data_size: 0,
            num_uniforms: 0,
        }
    }
}

/// A shader program for one pipeline stage.
#[derive(Clone, Debug)]
pub struct Shader {
    pub info: ShaderInfo,
    pub types: UniqueArena<Type>,
    pub variables: Pool<Variable>,
    pub functions: Arena<Function>,
    pub entry_point: Handle<Function>,
    /// Initial contents of [`Mode::Constant`] memory.
    pub constant_data: Vec<u8>,
}

impl Shader {
    /// Creates a shader with an empty `main` entry point.
    pub fn new(stage: Stage) -> Self {
        let mut functions = Arena::new();
        let entry_point = functions.append(Function::new("main"));
        Self {
            info: ShaderInfo::new(stage),
            types: UniqueArena::new(),
            variables: Pool::new(),
            functions,
            entry_point,
            constant_data: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.info.stage
    }

    pub fn entry(&self) -> &Function {
        &self.functions[self.entry_point]
    }

    pub fn entry_mut(&mut self) -> &mut Function {
        &mut self.functions[self.entry_point]
    }

    pub fn add_type(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type::anonymous(inner))
    }

    pub fn add_variable(&mut self, var: Variable) -> Handle<Variable> {
        self.variables.append(var)
    }

    /// Live variables of one mode, in declaration order.
    pub fn variables_with_mode(&self, mode: Mode) -> Vec<Handle<Variable>> {
        self.variables
            .iter()
            .filter(|(_, v)| v.mode == mode)
            .map(|(h, _)| h)
            .collect()
    }

    /// Finds a live variable by name.
    pub fn find_variable(&self, name: &str) -> Option<Handle<Variable>> {
        self.variables
            .iter()
            .find(|(_, v)| v.name.as_deref() == Some(name))
            .map(|(h, _)| h)
    }

    /// Interface slots covered by an input or output variable.
    pub fn variable_slots(&self, var: Handle<Variable>) -> SlotSet {
        let var = &self.variables[var];
        let Some(first) = var.data.location else {
            return SlotSet::EMPTY;
        };
        let inner = &self.types[var.ty].inner;
        let count = match (first, inner) {
            // Clip and cull distances are packed four to a slot.
            (Slot::CLIP_DIST0 | Slot::CULL_DIST0, TypeInner::Array { size, .. }) => match size {
                crate::types::ArraySize::Constant(n) => n.div_ceil(4),
                crate::types::ArraySize::Dynamic => 1,
            },
            _ => inner.slot_count(&self.types),
        };
        (0..count).filter_map(|i| first.offset(i)).collect()
    }

    /// Total number of live instructions across all functions.
    pub fn instr_count(&self) -> usize {
        self.functions.iter().map(|(_, f)| f.instrs.len()).sum()
    }

    /// Recomputes `inputs_read`, `outputs_written` and `system_values_read`
    /// from the instructions that access them.
    pub fn gather_info(&mut self) {
        let mut inputs_read = SlotSet::EMPTY;
        let mut outputs_written = SlotSet::EMPTY;
        let mut system_values_read = SysvalSet::EMPTY;

        for (_, func) in self.functions.iter() {
            for (_, instr) in func.instrs.iter() {
                let InstrKind::Intrinsic(intrinsic) = &instr.kind else {
                    continue;
                };
                match *intrinsic {
                    Intrinsic::LoadSystemValue(value) => system_values_read.insert(value),
                    Intrinsic::LoadDeref { deref } => {
                        let var = func.deref_root(deref);
                        match self.variables[var].mode {
                            Mode::ShaderIn => inputs_read |= self.variable_slots(var),
                            Mode::SystemValue => {
                                if let Some(value) = self.variables[var].data.system_value {
                                    system_values_read.insert(value);
                                }
                            }
                            _ => {}
                        }
                    }
                    Intrinsic::StoreDeref { deref, .. } => {
                        let var = func.deref_root(deref);
                        if self.variables[var].mode == Mode::ShaderOut {
                            outputs_written |= self.variable_slots(var);
                        }
                    }
                    _ => {}
                }
            }
        }

        self.info.inputs_read = inputs_read;
        self.info.outputs_written = outputs_written;
        self.info.system_values_read = system_values_read;
    }
}
