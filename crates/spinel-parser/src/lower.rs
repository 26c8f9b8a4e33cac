//! Lowering pass: one `naga::EntryPoint` → `spinel_ir::Shader`.
//!
//! naga's structured control flow becomes a CFG of blocks with explicit
//! terminators. Local variables stay in memory as `FunctionTemp` variables,
//! so no phis are built here.

use std::collections::HashMap;

use spinel_ir::{
    AluOp, ArraySize, AtomicOp, Block, Builder, Constant, Def, DescriptorBinding, Function,
    Handle, InstrKind, Intrinsic, Mode, Scalar, ScalarKind, Shader, Slot, Stage, StructMember,
    SystemValue, Terminator, Type, TypeInner, Value, Variable, VectorSize,
};

use crate::{DebugLevel, DebugSink, ParseError, ParseOptions, TargetEnv};

type NagaHandle<T> = naga::Handle<T>;

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Module-level lowering context. Types, globals and callees are lowered
/// on first use.
struct ModuleLowerer<'a> {
    naga: &'a naga::Module,
    shader: Shader,
    env: TargetEnv,
    sink: &'a dyn DebugSink,
    types: HashMap<NagaHandle<naga::Type>, Handle<Type>>,
    globals: HashMap<NagaHandle<naga::GlobalVariable>, Handle<Variable>>,
    functions: HashMap<NagaHandle<naga::Function>, Handle<Function>>,
}

/// The type a lowered pointer points at. Pointers into vectors and matrix
/// columns name types naga never puts in its arena.
#[derive(Clone, Copy, Debug)]
enum Pointee {
    Type(NagaHandle<naga::Type>),
    Value {
        size: Option<naga::VectorSize>,
        scalar: naga::Scalar,
    },
}

/// What a naga expression lowered to.
#[derive(Clone, Debug)]
enum Lowered {
    /// A scalar or vector SSA value.
    Value { value: Value, scalar: Scalar },
    /// A deref chain.
    Pointer { deref: Value, pointee: Pointee },
    /// Matrix columns, array elements or struct members.
    Composite { parts: Vec<Lowered> },
}

impl Lowered {
    fn value(&self) -> Result<(Value, Scalar), ParseError> {
        match *self {
            Self::Value { value, scalar } => Ok((value, scalar)),
            _ => Err(ParseError::Lowering(
                "expected a scalar or vector value".into(),
            )),
        }
    }
}

/// Stage outputs written on return from the entry point.
#[derive(Clone, Debug)]
enum Interface {
    Variable {
        var: Handle<Variable>,
        ty: NagaHandle<naga::Type>,
    },
    Members(Vec<Interface>),
}

/// Where `break` and `continue` go.
#[derive(Clone, Copy, Debug)]
enum Target {
    Loop {
        continuing: Handle<Block>,
        exit: Handle<Block>,
    },
    Switch {
        exit: Handle<Block>,
    },
}

#[derive(Clone, Copy, Debug)]
enum Index {
    Constant(u32),
    Dynamic(NagaHandle<naga::Expression>),
}

enum BuiltinInput {
    System(SystemValue),
    Varying(Slot),
}

/// Per-function lowering context.
struct FunctionLowerer<'m, 'a> {
    module: &'m mut ModuleLowerer<'a>,
    naga_func: &'a naga::Function,
    entry: Option<&'a naga::EntryPoint>,
    func: Function,
    /// Block new instructions are appended to.
    block: Handle<Block>,
    /// `false` once `block` has been terminated.
    live: bool,
    exprs: HashMap<NagaHandle<naga::Expression>, Lowered>,
    locals: HashMap<NagaHandle<naga::LocalVariable>, Handle<Variable>>,
    args: Vec<Lowered>,
    outputs: Option<Interface>,
    targets: Vec<Target>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub(crate) fn lower_entry_point(
    naga: &naga::Module,
    ep: &naga::EntryPoint,
    options: &ParseOptions<'_>,
) -> Result<Shader, ParseError> {
    let stage = crate::stage_of(ep.stage)
        .ok_or_else(|| unsupported(format!("{:?} entry points", ep.stage)))?;
    let mut module = ModuleLowerer {
        naga,
        shader: Shader::new(stage),
        env: options.target_env,
        sink: options.debug_sink,
        types: HashMap::new(),
        globals: HashMap::new(),
        functions: HashMap::new(),
    };

    let entry = FunctionLowerer::new(&mut module, &ep.function, Some(ep))?.lower()?;
    let mut shader = module.shader;
    let handle = shader.entry_point;
    shader.functions[handle] = entry;
    shader.info.name = Some(ep.name.clone());
    if stage == Stage::Compute {
        shader.info.workgroup_size = ep.workgroup_size;
    }
    shader.gather_info();
    log::debug!(
        "lowered `{}`: {} functions, {} instructions",
        ep.name,
        shader.functions.len(),
        shader.instr_count()
    );
    Ok(shader)
}

// ---------------------------------------------------------------------------
// Type lowering
// ---------------------------------------------------------------------------

impl ModuleLowerer<'_> {
    fn ty(&mut self, handle: NagaHandle<naga::Type>) -> Result<Handle<Type>, ParseError> {
        if let Some(&ty) = self.types.get(&handle) {
            return Ok(ty);
        }
        let naga = self.naga;
        let ty = &naga.types[handle];
        let inner = self.type_inner(&ty.inner)?;
        let lowered = self.shader.types.insert(Type {
            name: ty.name.clone(),
            inner,
        });
        self.types.insert(handle, lowered);
        Ok(lowered)
    }

    fn type_inner(&mut self, inner: &naga::TypeInner) -> Result<TypeInner, ParseError> {
        Ok(match *inner {
            naga::TypeInner::Scalar(s) => TypeInner::Scalar(lower_scalar(s)?),
            naga::TypeInner::Vector { size, scalar } => TypeInner::Vector {
                size: lower_vector_size(size),
                scalar: lower_scalar(scalar)?,
            },
            naga::TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => TypeInner::Matrix {
                columns: lower_vector_size(columns),
                rows: lower_vector_size(rows),
                scalar: lower_scalar(scalar)?,
                stride: matrix_stride(rows, scalar),
            },
            naga::TypeInner::Atomic(s) => TypeInner::Atomic(lower_scalar(s)?),
            naga::TypeInner::Array { base, size, stride } => TypeInner::Array {
                base: self.ty(base)?,
                size: lower_array_size(size)?,
                stride,
            },
            naga::TypeInner::Struct { ref members, span } => {
                let mut lowered = Vec::with_capacity(members.len());
                for m in members {
                    lowered.push(StructMember {
                        name: m.name.clone(),
                        ty: self.ty(m.ty)?,
                        offset: m.offset,
                    });
                }
                TypeInner::Struct {
                    members: lowered,
                    span,
                }
            }
            naga::TypeInner::Pointer { .. } | naga::TypeInner::ValuePointer { .. } => {
                return Err(unsupported("pointer values"));
            }
            naga::TypeInner::Image { .. } | naga::TypeInner::Sampler { .. } => {
                return Err(unsupported("image and sampler resources"));
            }
            ref other => return Err(unsupported(format!("type {other:?}"))),
        })
    }

    fn pointee_inner(&self, pointee: Pointee) -> naga::TypeInner {
        match pointee {
            Pointee::Type(ty) => self.naga.types[ty].inner.clone(),
            Pointee::Value {
                size: Some(size),
                scalar,
            } => naga::TypeInner::Vector { size, scalar },
            Pointee::Value { size: None, scalar } => naga::TypeInner::Scalar(scalar),
        }
    }

    fn pointee_type(&mut self, pointee: Pointee) -> Result<Handle<Type>, ParseError> {
        match pointee {
            Pointee::Type(ty) => self.ty(ty),
            Pointee::Value { size, scalar } => {
                let scalar = lower_scalar(scalar)?;
                Ok(self.shader.add_type(match size {
                    Some(size) => TypeInner::Vector {
                        size: lower_vector_size(size),
                        scalar,
                    },
                    None => TypeInner::Scalar(scalar),
                }))
            }
        }
    }

    /// Shape of a function parameter or result.
    fn value_def(&mut self, ty: NagaHandle<naga::Type>) -> Result<Def, ParseError> {
        let ty = self.ty(ty)?;
        self.shader.types[ty]
            .inner
            .value_def()
            .ok_or_else(|| unsupported("composite function parameters and results"))
    }
}

// ---------------------------------------------------------------------------
// Global variables
// ---------------------------------------------------------------------------

impl ModuleLowerer<'_> {
    fn global(
        &mut self,
        handle: NagaHandle<naga::GlobalVariable>,
    ) -> Result<Handle<Variable>, ParseError> {
        if let Some(&var) = self.globals.get(&handle) {
            return Ok(var);
        }
        let naga = self.naga;
        let global = &naga.global_variables[handle];
        let mode = lower_address_space(global.space)?;
        let ty = self.ty(global.ty)?;
        let name = global
            .name
            .clone()
            .unwrap_or_else(|| format!("global{}", handle.index()));

        let mut var = Variable::new(name, ty, mode);
        if let Some(ref binding) = global.binding {
            var = var.with_binding(DescriptorBinding::new(binding.group, binding.binding));
        }
        var.init = global.init.map(|init| self.global_constant(init)).transpose()?;
        let lowered = self.shader.add_variable(var);
        self.globals.insert(handle, lowered);
        Ok(lowered)
    }

    /// Creates the variable behind one bound entry point argument or result.
    fn interface_variable(
        &mut self,
        binding: &naga::Binding,
        ty: NagaHandle<naga::Type>,
        name: Option<&str>,
        direction: Mode,
    ) -> Result<Handle<Variable>, ParseError> {
        let lowered_ty = self.ty(ty)?;
        let stage = self.shader.stage();
        let (mode, location, system_value) = match *binding {
            naga::Binding::Location { location, .. } => {
                let slot = if direction == Mode::ShaderOut && stage == Stage::Fragment {
                    frag_data_slot(location)?
                } else {
                    varying_slot(location)?
                };
                (direction, Some(slot), None)
            }
            naga::Binding::BuiltIn(builtin) if direction == Mode::ShaderIn => {
                match builtin_input(builtin, stage, self.env)? {
                    BuiltinInput::System(sv) => (Mode::SystemValue, None, Some(sv)),
                    BuiltinInput::Varying(slot) => (Mode::ShaderIn, Some(slot), None),
                }
            }
            naga::Binding::BuiltIn(builtin) => {
                if let naga::BuiltIn::Position { invariant: true } = builtin {
                    self.sink
                        .message(DebugLevel::Warning, 0, "invariance of the position is not tracked");
                }
                (Mode::ShaderOut, Some(builtin_output(builtin)?), None)
            }
        };

        let name = match (name, location, system_value) {
            (Some(name), ..) => name.to_owned(),
            (None, _, Some(sv)) => sv.name().to_owned(),
            (None, Some(slot), _) => format!("{}_{slot}", if direction == Mode::ShaderIn { "in" } else { "out" }),
            (None, None, None) => "interface".to_owned(),
        };
        let mut var = Variable::new(name, lowered_ty, mode);
        var.data.location = location;
        var.data.system_value = system_value;
        Ok(self.shader.add_variable(var))
    }
}

// ---------------------------------------------------------------------------
// Global (constant) expressions
// ---------------------------------------------------------------------------

impl ModuleLowerer<'_> {
    fn global_constant(
        &self,
        expr: NagaHandle<naga::Expression>,
    ) -> Result<Constant, ParseError> {
        let naga = self.naga;
        Ok(match naga.global_expressions[expr] {
            naga::Expression::Literal(lit) => Constant::Scalar(lower_literal(lit)?.0),
            naga::Expression::Constant(c) => return self.global_constant(naga.constants[c].init),
            naga::Expression::ZeroValue(_) => Constant::Zero,
            naga::Expression::Compose { ref components, .. } => Constant::Composite(
                components
                    .iter()
                    .map(|&c| self.global_constant(c))
                    .collect::<Result<_, _>>()?,
            ),
            naga::Expression::Splat { size, value } => {
                Constant::Composite(vec![self.global_constant(value)?; size as usize])
            }
            ref other => return Err(unsupported(format!("constant expression {other:?}"))),
        })
    }

    fn function(
        &mut self,
        handle: NagaHandle<naga::Function>,
    ) -> Result<Handle<Function>, ParseError> {
        if let Some(&func) = self.functions.get(&handle) {
            return Ok(func);
        }
        let naga = self.naga;
        let func = FunctionLowerer::new(self, &naga.functions[handle], None)?.lower()?;
        let lowered = self.shader.functions.append(func);
        self.functions.insert(handle, lowered);
        Ok(lowered)
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    fn new(
        module: &'m mut ModuleLowerer<'a>,
        naga_func: &'a naga::Function,
        entry: Option<&'a naga::EntryPoint>,
    ) -> Result<Self, ParseError> {
        let name = match (entry, &naga_func.name) {
            (Some(ep), _) => ep.name.clone(),
            (None, Some(name)) => name.clone(),
            (None, None) => format!("function{}", module.functions.len()),
        };
        let func = Function::new(name);
        let block = func.entry;

        let mut locals = HashMap::new();
        for (handle, local) in naga_func.local_variables.iter() {
            let ty = module.ty(local.ty)?;
            let name = local
                .name
                .clone()
                .unwrap_or_else(|| format!("local{}", handle.index()));
            let var = module
                .shader
                .add_variable(Variable::new(name, ty, Mode::FunctionTemp));
            locals.insert(handle, var);
        }

        Ok(Self {
            module,
            naga_func,
            entry,
            func,
            block,
            live: true,
            exprs: HashMap::new(),
            locals,
            args: Vec::new(),
            outputs: None,
            targets: Vec::new(),
        })
    }

    fn lower(mut self) -> Result<Function, ParseError> {
        let naga_func = self.naga_func;

        if self.entry.is_some() {
            for arg in &naga_func.arguments {
                let lowered = self.input(arg.binding.as_ref(), arg.ty, arg.name.as_deref())?;
                self.args.push(lowered);
            }
            if let Some(ref result) = naga_func.result {
                self.outputs = Some(self.output(result.binding.as_ref(), result.ty, None)?);
            }
        } else {
            for (index, arg) in naga_func.arguments.iter().enumerate() {
                let naga = self.module.naga;
                if let naga::TypeInner::Pointer { .. } = naga.types[arg.ty].inner {
                    return Err(unsupported("pointer arguments"));
                }
                let def = self.module.value_def(arg.ty)?;
                let scalar = value_scalar(&naga.types[arg.ty].inner)?;
                self.func.params.push(def);
                let value = self.b().insert(InstrKind::Param(index as u32), Some(def));
                self.args.push(Lowered::Value { value, scalar });
            }
            if let Some(ref result) = naga_func.result {
                self.func.result = Some(self.module.value_def(result.ty)?);
            }
        }

        for (handle, local) in naga_func.local_variables.iter() {
            if let Some(init) = local.init {
                let value = self.expr(init)?;
                let deref = self.local_deref(handle)?;
                self.store(deref, Pointee::Type(local.ty), &value)?;
            }
        }

        self.lower_block(&naga_func.body)?;
        if self.live {
            self.lower_return(None)?;
        }
        Ok(self.func)
    }

    fn b(&mut self) -> Builder<'_> {
        Builder::at_end(&mut self.func, self.block)
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.func.blocks[self.block].terminator = terminator;
        self.live = false;
    }

    fn start(&mut self, block: Handle<Block>) {
        self.block = block;
        self.live = true;
    }

    fn input(
        &mut self,
        binding: Option<&naga::Binding>,
        ty: NagaHandle<naga::Type>,
        name: Option<&str>,
    ) -> Result<Lowered, ParseError> {
        let naga = self.module.naga;
        let Some(binding) = binding else {
            let naga::TypeInner::Struct { ref members, .. } = naga.types[ty].inner else {
                return Err(ParseError::Lowering(
                    "entry point argument without a binding".into(),
                ));
            };
            let parts = members
                .iter()
                .map(|m| self.input(m.binding.as_ref(), m.ty, m.name.as_deref()))
                .collect::<Result<_, _>>()?;
            return Ok(Lowered::Composite { parts });
        };

        let var = self
            .module
            .interface_variable(binding, ty, name, Mode::ShaderIn)?;
        let lowered_ty = self.module.ty(ty)?;
        let mode = self.module.shader.variables[var].mode;
        let deref = self.b().deref_var(var, mode, lowered_ty);
        self.load(deref, Pointee::Type(ty))
    }

    fn output(
        &mut self,
        binding: Option<&naga::Binding>,
        ty: NagaHandle<naga::Type>,
        name: Option<&str>,
    ) -> Result<Interface, ParseError> {
        let naga = self.module.naga;
        let Some(binding) = binding else {
            let naga::TypeInner::Struct { ref members, .. } = naga.types[ty].inner else {
                return Err(ParseError::Lowering(
                    "entry point result without a binding".into(),
                ));
            };
            let members = members
                .iter()
                .map(|m| self.output(m.binding.as_ref(), m.ty, m.name.as_deref()))
                .collect::<Result<_, _>>()?;
            return Ok(Interface::Members(members));
        };
        let var = self
            .module
            .interface_variable(binding, ty, name, Mode::ShaderOut)?;
        Ok(Interface::Variable { var, ty })
    }

    fn store_outputs(&mut self, interface: &Interface, value: &Lowered) -> Result<(), ParseError> {
        match (interface, value) {
            (&Interface::Variable { var, ty }, _) => {
                let lowered_ty = self.module.ty(ty)?;
                let deref = self.b().deref_var(var, Mode::ShaderOut, lowered_ty);
                self.store(deref, Pointee::Type(ty), value)
            }
            (Interface::Members(members), Lowered::Composite { parts })
                if members.len() == parts.len() =>
            {
                for (member, part) in members.iter().zip(parts) {
                    self.store_outputs(member, part)?;
                }
                Ok(())
            }
            _ => Err(ParseError::Lowering(
                "entry point result does not match its outputs".into(),
            )),
        }
    }

    fn local_deref(&mut self, handle: NagaHandle<naga::LocalVariable>) -> Result<Value, ParseError> {
        let var = *self
            .locals
            .get(&handle)
            .ok_or_else(|| ParseError::Lowering(format!("unmapped local variable {handle:?}")))?;
        let ty = self.module.shader.variables[var].ty;
        Ok(self.b().deref_var(var, Mode::FunctionTemp, ty))
    }

    /// Loads the value at `deref`, one access per scalar or vector leaf.
    fn load(&mut self, deref: Value, pointee: Pointee) -> Result<Lowered, ParseError> {
        match self.module.pointee_inner(pointee) {
            naga::TypeInner::Scalar(s) | naga::TypeInner::Atomic(s) => {
                let scalar = lower_scalar(s)?;
                let value = self.b().load_deref(deref, Def::scalar(scalar.bit_size()));
                Ok(Lowered::Value { value, scalar })
            }
            naga::TypeInner::Vector { size, scalar } => {
                let scalar = lower_scalar(scalar)?;
                let def = Def::new(size as u8, scalar.bit_size());
                let value = self.b().load_deref(deref, def);
                Ok(Lowered::Value { value, scalar })
            }
            naga::TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = Pointee::Value {
                    size: Some(rows),
                    scalar,
                };
                let mut parts = Vec::with_capacity(columns as usize);
                for c in 0..columns as u32 {
                    let deref = self.element(deref, column, c)?;
                    parts.push(self.load(deref, column)?);
                }
                Ok(Lowered::Composite { parts })
            }
            naga::TypeInner::Array {
                base,
                size: naga::ArraySize::Constant(count),
                ..
            } => {
                let mut parts = Vec::with_capacity(count.get() as usize);
                for i in 0..count.get() {
                    let deref = self.element(deref, Pointee::Type(base), i)?;
                    parts.push(self.load(deref, Pointee::Type(base))?);
                }
                Ok(Lowered::Composite { parts })
            }
            naga::TypeInner::Array { .. } => Err(unsupported("loads of runtime-sized arrays")),
            naga::TypeInner::Struct { members, .. } => {
                let mut parts = Vec::with_capacity(members.len());
                for (i, member) in members.iter().enumerate() {
                    let ty = self.module.ty(member.ty)?;
                    let deref = self.b().deref_struct(deref, i as u32, ty);
                    parts.push(self.load(deref, Pointee::Type(member.ty))?);
                }
                Ok(Lowered::Composite { parts })
            }
            other => Err(unsupported(format!("loads of {other:?}"))),
        }
    }

    fn store(&mut self, deref: Value, pointee: Pointee, value: &Lowered) -> Result<(), ParseError> {
        let parts = match value {
            Lowered::Value { value, .. } => {
                self.b().store_deref(deref, *value);
                return Ok(());
            }
            Lowered::Composite { parts } => parts,
            Lowered::Pointer { .. } => {
                return Err(ParseError::Lowering("cannot store a pointer".into()));
            }
        };
        match self.module.pointee_inner(pointee) {
            naga::TypeInner::Matrix { rows, scalar, .. } => {
                let column = Pointee::Value {
                    size: Some(rows),
                    scalar,
                };
                for (c, part) in parts.iter().enumerate() {
                    let deref = self.element(deref, column, c as u32)?;
                    self.store(deref, column, part)?;
                }
            }
            naga::TypeInner::Array { base, .. } => {
                for (i, part) in parts.iter().enumerate() {
                    let deref = self.element(deref, Pointee::Type(base), i as u32)?;
                    self.store(deref, Pointee::Type(base), part)?;
                }
            }
            naga::TypeInner::Struct { members, .. } => {
                for (i, (member, part)) in members.iter().zip(parts).enumerate() {
                    let ty = self.module.ty(member.ty)?;
                    let deref = self.b().deref_struct(deref, i as u32, ty);
                    self.store(deref, Pointee::Type(member.ty), part)?;
                }
            }
            other => {
                return Err(ParseError::Lowering(format!(
                    "composite value stored to {other:?}"
                )));
            }
        }
        Ok(())
    }

    /// Array deref of element `index`.
    fn element(&mut self, deref: Value, element: Pointee, index: u32) -> Result<Value, ParseError> {
        let ty = self.module.pointee_type(element)?;
        let mut b = self.b();
        let index = b.const_u32(index);
        Ok(b.deref_array(deref, index, ty))
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

impl FunctionLowerer<'_, '_> {
    /// Lowered form of `handle`.
    ///
    /// Expressions naga never emits (literals, constants, variable
    /// references and constant composites) are lowered on first use at the
    /// end of the entry block, which dominates every use.
    fn expr(&mut self, handle: NagaHandle<naga::Expression>) -> Result<Lowered, ParseError> {
        if let Some(lowered) = self.exprs.get(&handle) {
            return Ok(lowered.clone());
        }
        if let naga::Expression::CallResult(_)
        | naga::Expression::AtomicResult { .. }
        | naga::Expression::WorkGroupUniformLoadResult { .. } =
            self.naga_func.expressions[handle]
        {
            return Err(ParseError::Lowering(format!(
                "{handle:?} is used before the statement producing it"
            )));
        }

        let current = std::mem::replace(&mut self.block, self.func.entry);
        let lowered = self.lower_expr(handle);
        self.block = current;
        let lowered = lowered?;
        self.exprs.insert(handle, lowered.clone());
        Ok(lowered)
    }

    fn lower_expr(&mut self, handle: NagaHandle<naga::Expression>) -> Result<Lowered, ParseError> {
        use naga::Expression as E;

        let naga = self.module.naga;
        let naga_func = self.naga_func;
        match naga_func.expressions[handle] {
            E::Literal(lit) => {
                let (bits, scalar) = lower_literal(lit)?;
                let value = self.b().const_uint(bits, scalar.bit_size());
                Ok(Lowered::Value { value, scalar })
            }
            E::Constant(c) => {
                let constant = &naga.constants[c];
                let value = self.module.global_constant(constant.init)?;
                self.materialize(&naga.types[constant.ty].inner, &value)
            }
            E::ZeroValue(ty) => self.materialize(&naga.types[ty].inner, &Constant::Zero),
            E::Compose { ty, ref components } => self.compose(ty, components),
            E::Access { base, index } => self.access(base, Index::Dynamic(index)),
            E::AccessIndex { base, index } => self.access(base, Index::Constant(index)),
            E::Splat { size, value } => {
                let (value, scalar) = self.expr(value)?.value()?;
                let value = self.splat(value, size as u8);
                Ok(Lowered::Value { value, scalar })
            }
            E::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let (vector, scalar) = self.expr(vector)?.value()?;
                let mut b = self.b();
                let components: Vec<Value> = pattern[..size as usize]
                    .iter()
                    .map(|&c| b.extract(vector, c as u8))
                    .collect();
                let value = b.vec(&components);
                Ok(Lowered::Value { value, scalar })
            }
            E::FunctionArgument(index) => self.args.get(index as usize).cloned().ok_or_else(|| {
                ParseError::Lowering(format!("unmapped function argument {index}"))
            }),
            E::GlobalVariable(global) => {
                let var = self.module.global(global)?;
                let ty = naga.global_variables[global].ty;
                let lowered_ty = self.module.ty(ty)?;
                let mode = self.module.shader.variables[var].mode;
                let deref = self.b().deref_var(var, mode, lowered_ty);
                Ok(Lowered::Pointer {
                    deref,
                    pointee: Pointee::Type(ty),
                })
            }
            E::LocalVariable(local) => {
                let deref = self.local_deref(local)?;
                Ok(Lowered::Pointer {
                    deref,
                    pointee: Pointee::Type(naga_func.local_variables[local].ty),
                })
            }
            E::Load { pointer } => {
                let Lowered::Pointer { deref, pointee } = self.expr(pointer)? else {
                    return Err(ParseError::Lowering("load through a non-pointer".into()));
                };
                self.load(deref, pointee)
            }
            E::Unary { op, expr } => self.unary(op, expr),
            E::Binary { op, left, right } => self.binary(op, left, right),
            E::Select {
                condition,
                accept,
                reject,
            } => self.select(condition, accept, reject),
            E::Relational { fun, argument } => self.relational(fun, argument),
            E::Math {
                fun,
                arg,
                arg1,
                arg2,
                ..
            } => self.math(fun, arg, arg1, arg2),
            E::As {
                expr,
                kind,
                convert,
            } => self.cast(expr, kind, convert),
            E::ImageSample { .. } | E::ImageLoad { .. } | E::ImageQuery { .. } => {
                Err(unsupported("image operations"))
            }
            E::Derivative { .. } => Err(unsupported("derivatives")),
            E::ArrayLength(_) => Err(unsupported("runtime array length")),
            ref other => Err(unsupported(format!("expression {other:?}"))),
        }
    }

    /// Builds a constant of naga type `inner` from a folded initializer.
    fn materialize(
        &mut self,
        inner: &naga::TypeInner,
        constant: &Constant,
    ) -> Result<Lowered, ParseError> {
        let naga = self.module.naga;
        match *inner {
            naga::TypeInner::Scalar(s) => {
                let scalar = lower_scalar(s)?;
                let value = self
                    .b()
                    .const_uint(constant_bits(constant)?, scalar.bit_size());
                Ok(Lowered::Value { value, scalar })
            }
            naga::TypeInner::Vector { size, scalar } => {
                let scalar = lower_scalar(scalar)?;
                let bits = constant_parts(constant, size as usize)?
                    .iter()
                    .map(constant_bits)
                    .collect::<Result<Vec<_>, _>>()?;
                let value = self.b().constant(bits, scalar.bit_size());
                Ok(Lowered::Value { value, scalar })
            }
            naga::TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = naga::TypeInner::Vector { size: rows, scalar };
                let parts = constant_parts(constant, columns as usize)?
                    .iter()
                    .map(|c| self.materialize(&column, c))
                    .collect::<Result<_, _>>()?;
                Ok(Lowered::Composite { parts })
            }
            naga::TypeInner::Array {
                base,
                size: naga::ArraySize::Constant(count),
                ..
            } => {
                let parts = constant_parts(constant, count.get() as usize)?
                    .iter()
                    .map(|c| self.materialize(&naga.types[base].inner, c))
                    .collect::<Result<_, _>>()?;
                Ok(Lowered::Composite { parts })
            }
            naga::TypeInner::Struct { ref members, .. } => {
                let parts = constant_parts(constant, members.len())?
                    .iter()
                    .zip(members)
                    .map(|(c, m)| self.materialize(&naga.types[m.ty].inner, c))
                    .collect::<Result<_, _>>()?;
                Ok(Lowered::Composite { parts })
            }
            ref other => Err(unsupported(format!("constants of type {other:?}"))),
        }
    }

    fn compose(
        &mut self,
        ty: NagaHandle<naga::Type>,
        components: &[NagaHandle<naga::Expression>],
    ) -> Result<Lowered, ParseError> {
        let naga = self.module.naga;
        let naga::TypeInner::Vector { scalar, .. } = naga.types[ty].inner else {
            let parts = components
                .iter()
                .map(|&c| self.expr(c))
                .collect::<Result<_, _>>()?;
            return Ok(Lowered::Composite { parts });
        };

        // Vectors may be built from smaller vectors; flatten to scalars.
        let mut scalars = Vec::new();
        for &c in components {
            let (value, _) = self.expr(c)?.value()?;
            let n = self.func.def_of(value).num_components;
            if n == 1 {
                scalars.push(value);
            } else {
                let mut b = self.b();
                scalars.extend((0..n).map(|i| b.extract(value, i)));
            }
        }
        let value = self.b().vec(&scalars);
        Ok(Lowered::Value {
            value,
            scalar: lower_scalar(scalar)?,
        })
    }

    fn access(
        &mut self,
        base: NagaHandle<naga::Expression>,
        index: Index,
    ) -> Result<Lowered, ParseError> {
        match self.expr(base)? {
            Lowered::Pointer { deref, pointee } => {
                let element = match self.module.pointee_inner(pointee) {
                    naga::TypeInner::Struct { members, .. } => {
                        let Index::Constant(i) = index else {
                            return Err(ParseError::Lowering(
                                "dynamic struct member index".into(),
                            ));
                        };
                        let member = members.get(i as usize).ok_or_else(|| {
                            ParseError::Lowering(format!("struct member {i} out of range"))
                        })?;
                        let ty = self.module.ty(member.ty)?;
                        let deref = self.b().deref_struct(deref, i, ty);
                        return Ok(Lowered::Pointer {
                            deref,
                            pointee: Pointee::Type(member.ty),
                        });
                    }
                    naga::TypeInner::Array { base, .. } => Pointee::Type(base),
                    naga::TypeInner::Matrix { rows, scalar, .. } => Pointee::Value {
                        size: Some(rows),
                        scalar,
                    },
                    naga::TypeInner::Vector { scalar, .. } => Pointee::Value { size: None, scalar },
                    other => {
                        return Err(ParseError::Lowering(format!("cannot index into {other:?}")));
                    }
                };
                let ty = self.module.pointee_type(element)?;
                let index = match index {
                    Index::Constant(i) => self.b().const_u32(i),
                    Index::Dynamic(i) => self.expr(i)?.value()?.0,
                };
                let deref = self.b().deref_array(deref, index, ty);
                Ok(Lowered::Pointer {
                    deref,
                    pointee: element,
                })
            }
            Lowered::Value { value, scalar } => {
                let value = match index {
                    Index::Constant(i) => self.b().extract(value, i as u8),
                    Index::Dynamic(i) => {
                        let (index, _) = self.expr(i)?.value()?;
                        let n = self.func.def_of(value).num_components;
                        let mut b = self.b();
                        let mut picked = b.extract(value, 0);
                        for c in 1..n {
                            let component = b.extract(value, c);
                            let c = b.const_u32(u32::from(c));
                            let hit = b.alu(AluOp::IEq, &[index, c]);
                            picked = b.bcsel(hit, component, picked);
                        }
                        picked
                    }
                };
                Ok(Lowered::Value { value, scalar })
            }
            Lowered::Composite { parts } => match index {
                Index::Constant(i) => parts.get(i as usize).cloned().ok_or_else(|| {
                    ParseError::Lowering(format!("composite index {i} out of range"))
                }),
                Index::Dynamic(i) => {
                    let (index, _) = self.expr(i)?.value()?;
                    let (mut picked, scalar) = parts
                        .first()
                        .ok_or_else(|| ParseError::Lowering("empty composite".into()))?
                        .value()
                        .map_err(|_| unsupported("dynamic indexing of nested composites"))?;
                    for (c, part) in parts.iter().enumerate().skip(1) {
                        let (part, _) = part.value()?;
                        let mut b = self.b();
                        let c = b.const_u32(c as u32);
                        let hit = b.alu(AluOp::IEq, &[index, c]);
                        picked = b.bcsel(hit, part, picked);
                    }
                    Ok(Lowered::Value {
                        value: picked,
                        scalar,
                    })
                }
            },
        }
    }

    fn splat(&mut self, value: Value, n: u8) -> Value {
        let components = vec![value; n as usize];
        self.b().vec(&components)
    }

    /// Widens a scalar to `n` components.
    fn broadcast(&mut self, value: Value, n: u8) -> Value {
        if n > 1 && self.func.def_of(value).num_components == 1 {
            self.splat(value, n)
        } else {
            value
        }
    }

    fn components(&self, value: Value) -> u8 {
        self.func.def_of(value).num_components
    }

    fn float_const(&mut self, scalar: Scalar, value: f64, n: u8) -> Result<Value, ParseError> {
        let bits = match scalar.width {
            4 => u64::from((value as f32).to_bits()),
            8 => value.to_bits(),
            width => return Err(unsupported(format!("{}-bit float constants", width * 8))),
        };
        Ok(self.b().constant(vec![bits; n as usize], scalar.bit_size()))
    }

    fn unary(
        &mut self,
        op: naga::UnaryOperator,
        expr: NagaHandle<naga::Expression>,
    ) -> Result<Lowered, ParseError> {
        let (value, scalar) = self.expr(expr)?.value()?;
        let op = match op {
            naga::UnaryOperator::Negate if scalar.kind == ScalarKind::Float => AluOp::FNeg,
            naga::UnaryOperator::Negate => AluOp::INeg,
            naga::UnaryOperator::LogicalNot | naga::UnaryOperator::BitwiseNot => AluOp::INot,
        };
        let value = self.b().alu(op, &[value]);
        Ok(Lowered::Value { value, scalar })
    }

    fn binary(
        &mut self,
        op: naga::BinaryOperator,
        left: NagaHandle<naga::Expression>,
        right: NagaHandle<naga::Expression>,
    ) -> Result<Lowered, ParseError> {
        let left = self.expr(left)?;
        let right = self.expr(right)?;
        match (&left, &right) {
            (Lowered::Value { .. }, Lowered::Value { .. }) => {
                self.binary_values(op, left.value()?, right.value()?)
            }
            _ if matches!(op, naga::BinaryOperator::Multiply) => self.matrix_multiply(&left, &right),
            (Lowered::Composite { parts: a }, Lowered::Composite { parts: b })
                if a.len() == b.len()
                    && matches!(
                        op,
                        naga::BinaryOperator::Add | naga::BinaryOperator::Subtract
                    ) =>
            {
                let parts = a
                    .iter()
                    .zip(b)
                    .map(|(a, b)| self.binary_values(op, a.value()?, b.value()?))
                    .collect::<Result<_, _>>()?;
                Ok(Lowered::Composite { parts })
            }
            _ => Err(unsupported(format!("{op:?} on composite operands"))),
        }
    }

    fn binary_values(
        &mut self,
        op: naga::BinaryOperator,
        (a, scalar): (Value, Scalar),
        (b, _): (Value, Scalar),
    ) -> Result<Lowered, ParseError> {
        use naga::BinaryOperator as B;

        let n = self.components(a).max(self.components(b));
        let a = self.broadcast(a, n);
        let b = self.broadcast(b, n);
        let float = scalar.kind == ScalarKind::Float;
        let signed = scalar.kind == ScalarKind::Sint;
        let pick = |f: AluOp, s: AluOp, u: AluOp| {
            if float {
                f
            } else if signed {
                s
            } else {
                u
            }
        };

        let (alu, swap) = match op {
            B::Add => (pick(AluOp::FAdd, AluOp::IAdd, AluOp::IAdd), false),
            B::Subtract => (pick(AluOp::FSub, AluOp::ISub, AluOp::ISub), false),
            B::Multiply => (pick(AluOp::FMul, AluOp::IMul, AluOp::IMul), false),
            B::Divide => (pick(AluOp::FDiv, AluOp::IDiv, AluOp::UDiv), false),
            B::Modulo if float => {
                // x - y * trunc(x / y)
                let mut bld = self.b();
                let quotient = bld.alu(AluOp::FDiv, &[a, b]);
                let truncated = bld.alu(AluOp::FTrunc, &[quotient]);
                let product = bld.alu(AluOp::FMul, &[b, truncated]);
                let value = bld.alu(AluOp::FSub, &[a, product]);
                return Ok(Lowered::Value { value, scalar });
            }
            B::Modulo if signed => (AluOp::IRem, false),
            B::Modulo => (AluOp::UMod, false),
            B::Equal => (pick(AluOp::FEq, AluOp::IEq, AluOp::IEq), false),
            B::NotEqual => (pick(AluOp::FNe, AluOp::INe, AluOp::INe), false),
            B::Less => (pick(AluOp::FLt, AluOp::ILt, AluOp::ULt), false),
            B::GreaterEqual => (pick(AluOp::FGe, AluOp::IGe, AluOp::UGe), false),
            B::Greater => (pick(AluOp::FLt, AluOp::ILt, AluOp::ULt), true),
            B::LessEqual => (pick(AluOp::FGe, AluOp::IGe, AluOp::UGe), true),
            B::And | B::LogicalAnd => (AluOp::IAnd, false),
            B::InclusiveOr | B::LogicalOr => (AluOp::IOr, false),
            B::ExclusiveOr => (AluOp::IXor, false),
            B::ShiftLeft => (AluOp::IShl, false),
            B::ShiftRight => (pick(AluOp::UShr, AluOp::IShr, AluOp::UShr), false),
        };
        let srcs = if swap { [b, a] } else { [a, b] };
        let value = self.b().alu(alu, &srcs);
        let scalar = if alu.is_comparison() {
            Scalar::BOOL
        } else {
            scalar
        };
        Ok(Lowered::Value { value, scalar })
    }

    /// Column-major products involving at least one matrix.
    fn matrix_multiply(&mut self, left: &Lowered, right: &Lowered) -> Result<Lowered, ParseError> {
        match (left, right) {
            (Lowered::Composite { parts: columns }, Lowered::Value { value, scalar })
                if self.components(*value) == 1 =>
            {
                self.scale_columns(columns, *value, *scalar)
            }
            (Lowered::Value { value, scalar }, Lowered::Composite { parts: columns })
                if self.components(*value) == 1 =>
            {
                self.scale_columns(columns, *value, *scalar)
            }
            (Lowered::Composite { parts: columns }, Lowered::Value { value, scalar }) => {
                let value = self.matrix_times_vector(columns, *value)?;
                Ok(Lowered::Value {
                    value,
                    scalar: *scalar,
                })
            }
            (Lowered::Value { value, scalar }, Lowered::Composite { parts: columns }) => {
                let mut dots = Vec::with_capacity(columns.len());
                for column in columns {
                    let (column, _) = column.value()?;
                    dots.push(self.b().alu(AluOp::FDot, &[*value, column]));
                }
                let value = self.b().vec(&dots);
                Ok(Lowered::Value {
                    value,
                    scalar: *scalar,
                })
            }
            (Lowered::Composite { parts: a }, Lowered::Composite { parts: b }) => {
                let mut parts = Vec::with_capacity(b.len());
                for column in b {
                    let (column, scalar) = column.value()?;
                    let value = self.matrix_times_vector(a, column)?;
                    parts.push(Lowered::Value { value, scalar });
                }
                Ok(Lowered::Composite { parts })
            }
            _ => Err(ParseError::Lowering("invalid multiply operands".into())),
        }
    }

    fn scale_columns(
        &mut self,
        columns: &[Lowered],
        factor: Value,
        scalar: Scalar,
    ) -> Result<Lowered, ParseError> {
        let mut parts = Vec::with_capacity(columns.len());
        for column in columns {
            let (column, _) = column.value()?;
            let n = self.components(column);
            let factor = self.broadcast(factor, n);
            let value = self.b().alu(AluOp::FMul, &[column, factor]);
            parts.push(Lowered::Value { value, scalar });
        }
        Ok(Lowered::Composite { parts })
    }

    fn matrix_times_vector(&mut self, columns: &[Lowered], vector: Value) -> Result<Value, ParseError> {
        let mut sum = None;
        for (c, column) in columns.iter().enumerate() {
            let (column, _) = column.value()?;
            let n = self.components(column);
            let component = self.b().extract(vector, c as u8);
            let component = self.broadcast(component, n);
            let term = self.b().alu(AluOp::FMul, &[column, component]);
            sum = Some(match sum {
                Some(sum) => self.b().alu(AluOp::FAdd, &[sum, term]),
                None => term,
            });
        }
        sum.ok_or_else(|| ParseError::Lowering("matrix without columns".into()))
    }

    fn select(
        &mut self,
        condition: NagaHandle<naga::Expression>,
        accept: NagaHandle<naga::Expression>,
        reject: NagaHandle<naga::Expression>,
    ) -> Result<Lowered, ParseError> {
        let (condition, _) = self.expr(condition)?.value()?;
        let accept = self.expr(accept)?;
        let reject = self.expr(reject)?;
        let (Ok((accept, scalar)), Ok((reject, _))) = (accept.value(), reject.value()) else {
            return Err(unsupported("select of composite values"));
        };
        let n = self.components(accept);
        let condition = self.broadcast(condition, n);
        let value = self.b().bcsel(condition, accept, reject);
        Ok(Lowered::Value { value, scalar })
    }

    fn relational(
        &mut self,
        fun: naga::RelationalFunction,
        argument: NagaHandle<naga::Expression>,
    ) -> Result<Lowered, ParseError> {
        let (x, scalar) = self.expr(argument)?.value()?;
        let n = self.components(x);
        let value = match fun {
            naga::RelationalFunction::All | naga::RelationalFunction::Any => {
                let op = if let naga::RelationalFunction::All = fun {
                    AluOp::IAnd
                } else {
                    AluOp::IOr
                };
                let mut b = self.b();
                let mut folded = b.extract(x, 0);
                for c in 1..n {
                    let component = b.extract(x, c);
                    folded = b.alu(op, &[folded, component]);
                }
                folded
            }
            naga::RelationalFunction::IsNan => self.b().alu(AluOp::FNe, &[x, x]),
            naga::RelationalFunction::IsInf => {
                let infinity = match scalar.width {
                    2 => 0x7c00,
                    4 => u64::from(f32::INFINITY.to_bits()),
                    _ => f64::INFINITY.to_bits(),
                };
                let mut b = self.b();
                let infinity = b.constant(vec![infinity; n as usize], scalar.bit_size());
                let magnitude = b.alu(AluOp::FAbs, &[x]);
                b.alu(AluOp::FEq, &[magnitude, infinity])
            }
        };
        Ok(Lowered::Value {
            value,
            scalar: Scalar::BOOL,
        })
    }

    fn math(
        &mut self,
        fun: naga::MathFunction,
        arg: NagaHandle<naga::Expression>,
        arg1: Option<NagaHandle<naga::Expression>>,
        arg2: Option<NagaHandle<naga::Expression>>,
    ) -> Result<Lowered, ParseError> {
        use naga::MathFunction as M;

        let (x, scalar) = self.expr(arg)?.value()?;
        let n = self.components(x);
        let y = match arg1 {
            Some(h) => Some(self.expr(h)?.value()?.0),
            None => None,
        };
        let z = match arg2 {
            Some(h) => Some(self.expr(h)?.value()?.0),
            None => None,
        };
        let operand =
            |v: Option<Value>| v.ok_or_else(|| ParseError::Lowering(format!("{fun:?} is missing an operand")));
        let float = scalar.kind == ScalarKind::Float;
        let signed = scalar.kind == ScalarKind::Sint;
        let pick = |f: AluOp, s: AluOp, u: AluOp| {
            if float {
                f
            } else if signed {
                s
            } else {
                u
            }
        };

        let value = match fun {
            M::Abs if !float && !signed => x,
            M::Abs => self.b().alu(pick(AluOp::FAbs, AluOp::IAbs, AluOp::IAbs), &[x]),
            M::Min | M::Max => {
                let op = if let M::Min = fun {
                    pick(AluOp::FMin, AluOp::IMin, AluOp::UMin)
                } else {
                    pick(AluOp::FMax, AluOp::IMax, AluOp::UMax)
                };
                let y = self.broadcast(operand(y)?, n);
                self.b().alu(op, &[x, y])
            }
            M::Clamp => {
                let low = self.broadcast(operand(y)?, n);
                let high = self.broadcast(operand(z)?, n);
                let max = pick(AluOp::FMax, AluOp::IMax, AluOp::UMax);
                let min = pick(AluOp::FMin, AluOp::IMin, AluOp::UMin);
                let mut b = self.b();
                let raised = b.alu(max, &[x, low]);
                b.alu(min, &[raised, high])
            }
            M::Saturate => {
                let zero = self.float_const(scalar, 0.0, n)?;
                let one = self.float_const(scalar, 1.0, n)?;
                let mut b = self.b();
                let raised = b.alu(AluOp::FMax, &[x, zero]);
                b.alu(AluOp::FMin, &[raised, one])
            }
            M::Floor => self.b().alu(AluOp::FFloor, &[x]),
            M::Ceil => self.b().alu(AluOp::FCeil, &[x]),
            M::Fract => self.b().alu(AluOp::FFract, &[x]),
            M::Trunc => self.b().alu(AluOp::FTrunc, &[x]),
            M::Sin => self.b().alu(AluOp::FSin, &[x]),
            M::Cos => self.b().alu(AluOp::FCos, &[x]),
            M::Tan => {
                let mut b = self.b();
                let sin = b.alu(AluOp::FSin, &[x]);
                let cos = b.alu(AluOp::FCos, &[x]);
                b.alu(AluOp::FDiv, &[sin, cos])
            }
            M::Sqrt => self.b().alu(AluOp::FSqrt, &[x]),
            M::InverseSqrt => self.b().alu(AluOp::FRsq, &[x]),
            M::Exp2 => self.b().alu(AluOp::FExp2, &[x]),
            M::Log2 => self.b().alu(AluOp::FLog2, &[x]),
            M::Exp => {
                let log2_e = self.float_const(scalar, std::f64::consts::LOG2_E, n)?;
                let mut b = self.b();
                let scaled = b.alu(AluOp::FMul, &[x, log2_e]);
                b.alu(AluOp::FExp2, &[scaled])
            }
            M::Log => {
                let ln_2 = self.float_const(scalar, std::f64::consts::LN_2, n)?;
                let mut b = self.b();
                let log2 = b.alu(AluOp::FLog2, &[x]);
                b.alu(AluOp::FMul, &[log2, ln_2])
            }
            M::Pow => self.b().alu(AluOp::FPow, &[x, operand(y)?]),
            M::Radians | M::Degrees => {
                let factor = if let M::Radians = fun {
                    std::f64::consts::PI / 180.0
                } else {
                    180.0 / std::f64::consts::PI
                };
                let factor = self.float_const(scalar, factor, n)?;
                self.b().alu(AluOp::FMul, &[x, factor])
            }
            M::Dot if float => self.b().alu(AluOp::FDot, &[x, operand(y)?]),
            M::Dot => {
                let y = operand(y)?;
                let mut b = self.b();
                let product = b.alu(AluOp::IMul, &[x, y]);
                let mut sum = b.extract(product, 0);
                for c in 1..n {
                    let component = b.extract(product, c);
                    sum = b.iadd(sum, component);
                }
                sum
            }
            M::Cross => {
                let y = operand(y)?;
                let mut b = self.b();
                let [x0, x1, x2] = [0, 1, 2].map(|c| b.extract(x, c));
                let [y0, y1, y2] = [0, 1, 2].map(|c| b.extract(y, c));
                let c0 = cross_term(&mut b, [x1, y2], [x2, y1]);
                let c1 = cross_term(&mut b, [x2, y0], [x0, y2]);
                let c2 = cross_term(&mut b, [x0, y1], [x1, y0]);
                b.vec(&[c0, c1, c2])
            }
            M::Length => self.length(x),
            M::Distance => {
                let difference = self.b().alu(AluOp::FSub, &[x, operand(y)?]);
                self.length(difference)
            }
            M::Normalize => {
                let mut b = self.b();
                let squared = b.alu(AluOp::FDot, &[x, x]);
                let inverse = b.alu(AluOp::FRsq, &[squared]);
                let inverse = self.broadcast(inverse, n);
                self.b().alu(AluOp::FMul, &[x, inverse])
            }
            M::Mix => {
                let y = operand(y)?;
                let t = self.broadcast(operand(z)?, n);
                let mut b = self.b();
                let delta = b.alu(AluOp::FSub, &[y, x]);
                let scaled = b.alu(AluOp::FMul, &[delta, t]);
                b.alu(AluOp::FAdd, &[x, scaled])
            }
            M::Step => {
                // step(edge, x) is 0.0 where x < edge
                let value = operand(y)?;
                let n = self.components(value);
                let edge = self.broadcast(x, n);
                let zero = self.float_const(scalar, 0.0, n)?;
                let one = self.float_const(scalar, 1.0, n)?;
                let mut b = self.b();
                let below = b.alu(AluOp::FLt, &[value, edge]);
                b.bcsel(below, zero, one)
            }
            M::Fma => self.b().alu(AluOp::FFma, &[x, operand(y)?, operand(z)?]),
            other => return Err(unsupported(format!("math function {other:?}"))),
        };
        Ok(Lowered::Value { value, scalar })
    }

    fn length(&mut self, x: Value) -> Value {
        let mut b = self.b();
        if b.func.def_of(x).num_components == 1 {
            return b.alu(AluOp::FAbs, &[x]);
        }
        let squared = b.alu(AluOp::FDot, &[x, x]);
        b.alu(AluOp::FSqrt, &[squared])
    }

    fn cast(
        &mut self,
        expr: NagaHandle<naga::Expression>,
        kind: naga::ScalarKind,
        convert: Option<naga::Bytes>,
    ) -> Result<Lowered, ParseError> {
        let (value, from) = self.expr(expr)?.value()?;
        let Some(width) = convert else {
            // Bitcast: same bits, new kind.
            let scalar = lower_scalar(naga::Scalar {
                kind,
                width: from.width,
            })?;
            return Ok(Lowered::Value { value, scalar });
        };

        let to = lower_scalar(naga::Scalar { kind, width })?;
        let bits = to.bit_size();
        let value = match (from.kind, to.kind) {
            (_, ScalarKind::Bool) => {
                let def = self.func.def_of(value);
                let op = if from.kind == ScalarKind::Float {
                    AluOp::FNe
                } else {
                    AluOp::INe
                };
                let mut b = self.b();
                let zero = b.zero(def);
                b.alu(op, &[value, zero])
            }
            (ScalarKind::Bool, ScalarKind::Float) => self.b().alu(AluOp::B2F(bits), &[value]),
            (ScalarKind::Bool, _) => self.b().alu(AluOp::B2I(bits), &[value]),
            (ScalarKind::Float, ScalarKind::Float) if from.width == to.width => value,
            (ScalarKind::Float, ScalarKind::Float) => self.b().alu(AluOp::F2F(bits), &[value]),
            (ScalarKind::Float, ScalarKind::Sint) => self.b().alu(AluOp::F2I(bits), &[value]),
            (ScalarKind::Float, _) => self.b().alu(AluOp::F2U(bits), &[value]),
            (ScalarKind::Sint, ScalarKind::Float) => self.b().alu(AluOp::I2F(bits), &[value]),
            (_, ScalarKind::Float) => self.b().alu(AluOp::U2F(bits), &[value]),
            _ if from.width == to.width => value,
            (ScalarKind::Sint, _) => self.b().alu(AluOp::I2I(bits), &[value]),
            _ => self.b().alu(AluOp::U2U(bits), &[value]),
        };
        Ok(Lowered::Value { value, scalar: to })
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

impl FunctionLowerer<'_, '_> {
    fn lower_block(&mut self, block: &naga::Block) -> Result<(), ParseError> {
        for stmt in block.iter() {
            if !self.live {
                // Statements after a terminator are unreachable.
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &naga::Statement) -> Result<(), ParseError> {
        use naga::Statement as S;

        match *stmt {
            S::Emit(ref range) => {
                for handle in range.clone() {
                    if !self.exprs.contains_key(&handle) {
                        let lowered = self.lower_expr(handle)?;
                        self.exprs.insert(handle, lowered);
                    }
                }
            }
            S::Block(ref block) => self.lower_block(block)?,
            S::If {
                condition,
                ref accept,
                ref reject,
            } => self.lower_if(condition, accept, reject)?,
            S::Switch {
                selector,
                ref cases,
            } => self.lower_switch(selector, cases)?,
            S::Loop {
                ref body,
                ref continuing,
                break_if,
            } => self.lower_loop(body, continuing, break_if)?,
            S::Break => {
                let exit = match self.targets.last() {
                    Some(Target::Loop { exit, .. } | Target::Switch { exit }) => *exit,
                    None => return Err(ParseError::Lowering("break outside a loop or switch".into())),
                };
                self.terminate(Terminator::Jump(exit));
            }
            S::Continue => {
                let continuing = self
                    .targets
                    .iter()
                    .rev()
                    .find_map(|t| match *t {
                        Target::Loop { continuing, .. } => Some(continuing),
                        Target::Switch { .. } => None,
                    })
                    .ok_or_else(|| ParseError::Lowering("continue outside a loop".into()))?;
                self.terminate(Terminator::Jump(continuing));
            }
            S::Return { value } => self.lower_return(value)?,
            S::Kill => self.terminate(Terminator::Discard),
            S::ControlBarrier(_) | S::MemoryBarrier(_) => {
                self.b().intrinsic(Intrinsic::Barrier, None);
            }
            S::Store { pointer, value } => {
                let Lowered::Pointer { deref, pointee } = self.expr(pointer)? else {
                    return Err(ParseError::Lowering("store through a non-pointer".into()));
                };
                let value = self.expr(value)?;
                self.store(deref, pointee, &value)?;
            }
            S::Call {
                function,
                ref arguments,
                result,
            } => self.lower_call(function, arguments, result)?,
            S::Atomic {
                pointer,
                ref fun,
                value,
                result,
            } => self.lower_atomic(pointer, fun, value, result)?,
            S::WorkGroupUniformLoad { pointer, result } => {
                let Lowered::Pointer { deref, pointee } = self.expr(pointer)? else {
                    return Err(ParseError::Lowering("uniform load through a non-pointer".into()));
                };
                self.b().intrinsic(Intrinsic::Barrier, None);
                let loaded = self.load(deref, pointee)?;
                self.b().intrinsic(Intrinsic::Barrier, None);
                self.exprs.insert(result, loaded);
            }
            S::ImageStore { .. } | S::ImageAtomic { .. } => {
                return Err(unsupported("image operations"));
            }
            ref other => return Err(unsupported(format!("statement {other:?}"))),
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: NagaHandle<naga::Expression>,
        accept: &naga::Block,
        reject: &naga::Block,
    ) -> Result<(), ParseError> {
        let (condition, _) = self.expr(condition)?.value()?;
        let then_block = self.func.add_block();
        let else_block = self.func.add_block();
        let merge = self.func.add_block();
        self.terminate(Terminator::Branch {
            cond: condition,
            then_block,
            else_block,
        });

        let mut reaches_merge = false;
        for (block, body) in [(then_block, accept), (else_block, reject)] {
            self.start(block);
            self.lower_block(body)?;
            if self.live {
                self.terminate(Terminator::Jump(merge));
                reaches_merge = true;
            }
        }
        self.block = merge;
        self.live = reaches_merge;
        Ok(())
    }

    fn lower_loop(
        &mut self,
        body: &naga::Block,
        continuing: &naga::Block,
        break_if: Option<NagaHandle<naga::Expression>>,
    ) -> Result<(), ParseError> {
        let header = self.func.add_block();
        let continue_block = self.func.add_block();
        let exit = self.func.add_block();
        self.terminate(Terminator::Jump(header));

        self.start(header);
        self.targets.push(Target::Loop {
            continuing: continue_block,
            exit,
        });
        self.lower_block(body)?;
        if self.live {
            self.terminate(Terminator::Jump(continue_block));
        }
        self.targets.pop();

        self.start(continue_block);
        self.lower_block(continuing)?;
        if self.live {
            let back_edge = match break_if {
                Some(condition) => Terminator::Branch {
                    cond: self.expr(condition)?.value()?.0,
                    then_block: exit,
                    else_block: header,
                },
                None => Terminator::Jump(header),
            };
            self.terminate(back_edge);
        }
        self.start(exit);
        Ok(())
    }

    fn lower_switch(
        &mut self,
        selector: NagaHandle<naga::Expression>,
        cases: &[naga::SwitchCase],
    ) -> Result<(), ParseError> {
        let (selector, _) = self.expr(selector)?.value()?;
        let exit = self.func.add_block();
        let bodies: Vec<_> = cases.iter().map(|_| self.func.add_block()).collect();

        // Compare against each case value in order; fall to the default.
        let mut default = exit;
        for (case, &body) in cases.iter().zip(&bodies) {
            let value = match case.value {
                naga::SwitchValue::I32(v) => v as u32,
                naga::SwitchValue::U32(v) => v,
                naga::SwitchValue::Default => {
                    default = body;
                    continue;
                }
            };
            let next = self.func.add_block();
            let mut b = self.b();
            let value = b.const_u32(value);
            let hit = b.alu(AluOp::IEq, &[selector, value]);
            self.terminate(Terminator::Branch {
                cond: hit,
                then_block: body,
                else_block: next,
            });
            self.start(next);
        }
        self.terminate(Terminator::Jump(default));

        self.targets.push(Target::Switch { exit });
        for (i, case) in cases.iter().enumerate() {
            self.start(bodies[i]);
            self.lower_block(&case.body)?;
            if self.live {
                let next = match bodies.get(i + 1) {
                    Some(&next) if case.fall_through => next,
                    _ => exit,
                };
                self.terminate(Terminator::Jump(next));
            }
        }
        self.targets.pop();
        self.start(exit);
        Ok(())
    }

    fn lower_return(&mut self, value: Option<NagaHandle<naga::Expression>>) -> Result<(), ParseError> {
        let value = value.map(|v| self.expr(v)).transpose()?;
        if self.entry.is_some() {
            if let (Some(outputs), Some(value)) = (self.outputs.clone(), value) {
                self.store_outputs(&outputs, &value)?;
            }
            self.terminate(Terminator::Return(None));
        } else {
            let value = value.map(|v| v.value().map(|(v, _)| v)).transpose()?;
            self.terminate(Terminator::Return(value));
        }
        Ok(())
    }

    fn lower_call(
        &mut self,
        function: NagaHandle<naga::Function>,
        arguments: &[NagaHandle<naga::Expression>],
        result: Option<NagaHandle<naga::Expression>>,
    ) -> Result<(), ParseError> {
        let callee = self.module.function(function)?;
        let mut args = Vec::with_capacity(arguments.len());
        for &arg in arguments {
            args.push(self.expr(arg)?.value()?.0);
        }
        let def = self.module.shader.functions[callee].result;
        let value = self.b().insert(InstrKind::Call { callee, args }, def);

        if let Some(result) = result {
            let naga = self.module.naga;
            let ty = naga.functions[function]
                .result
                .as_ref()
                .ok_or_else(|| ParseError::Lowering("call result of a void function".into()))?
                .ty;
            let scalar = value_scalar(&naga.types[ty].inner)?;
            self.exprs.insert(result, Lowered::Value { value, scalar });
        }
        Ok(())
    }

    fn lower_atomic(
        &mut self,
        pointer: NagaHandle<naga::Expression>,
        fun: &naga::AtomicFunction,
        value: NagaHandle<naga::Expression>,
        result: Option<NagaHandle<naga::Expression>>,
    ) -> Result<(), ParseError> {
        use naga::AtomicFunction as A;

        let Lowered::Pointer { deref, .. } = self.expr(pointer)? else {
            return Err(ParseError::Lowering("atomic through a non-pointer".into()));
        };
        let (data, scalar) = self.expr(value)?.value()?;
        let signed = scalar.kind == ScalarKind::Sint;
        let (op, data, compare) = match *fun {
            A::Add => (AtomicOp::Add, data, None),
            A::Subtract => (AtomicOp::Add, self.b().alu(AluOp::INeg, &[data]), None),
            A::And => (AtomicOp::And, data, None),
            A::InclusiveOr => (AtomicOp::Or, data, None),
            A::ExclusiveOr => (AtomicOp::Xor, data, None),
            A::Min if signed => (AtomicOp::IMin, data, None),
            A::Min => (AtomicOp::UMin, data, None),
            A::Max if signed => (AtomicOp::IMax, data, None),
            A::Max => (AtomicOp::UMax, data, None),
            A::Exchange { compare: None } => (AtomicOp::Exchange, data, None),
            A::Exchange {
                compare: Some(compare),
            } => (
                AtomicOp::CompareExchange,
                data,
                Some(self.expr(compare)?.value()?.0),
            ),
        };

        let def = Def::scalar(scalar.bit_size());
        let old = self.b().intrinsic(
            Intrinsic::DerefAtomic {
                deref,
                op,
                data,
                compare,
            },
            Some(def),
        );
        if let Some(result) = result {
            let lowered = match compare {
                // naga models the result as an `{old_value, exchanged}` struct.
                Some(compare) => {
                    let exchanged = self.b().alu(AluOp::IEq, &[old, compare]);
                    Lowered::Composite {
                        parts: vec![
                            Lowered::Value { value: old, scalar },
                            Lowered::Value {
                                value: exchanged,
                                scalar: Scalar::BOOL,
                            },
                        ],
                    }
                }
                None => Lowered::Value { value: old, scalar },
            };
            self.exprs.insert(result, lowered);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Enum mapping helpers
// ---------------------------------------------------------------------------

/// `p0 * p1 - q0 * q1`
fn cross_term(b: &mut Builder<'_>, p: [Value; 2], q: [Value; 2]) -> Value {
    let p = b.alu(AluOp::FMul, &p);
    let q = b.alu(AluOp::FMul, &q);
    b.alu(AluOp::FSub, &[p, q])
}

fn lower_scalar(s: naga::Scalar) -> Result<Scalar, ParseError> {
    let kind = match s.kind {
        naga::ScalarKind::Bool => ScalarKind::Bool,
        naga::ScalarKind::Sint => ScalarKind::Sint,
        naga::ScalarKind::Uint => ScalarKind::Uint,
        naga::ScalarKind::Float => ScalarKind::Float,
        naga::ScalarKind::AbstractInt => return Ok(Scalar::I64),
        naga::ScalarKind::AbstractFloat => return Ok(Scalar::F64),
    };
    Ok(Scalar {
        kind,
        width: s.width,
    })
}

fn lower_vector_size(size: naga::VectorSize) -> VectorSize {
    match size {
        naga::VectorSize::Bi => VectorSize::Bi,
        naga::VectorSize::Tri => VectorSize::Tri,
        naga::VectorSize::Quad => VectorSize::Quad,
    }
}

fn lower_array_size(size: naga::ArraySize) -> Result<ArraySize, ParseError> {
    match size {
        naga::ArraySize::Constant(n) => Ok(ArraySize::Constant(n.get())),
        naga::ArraySize::Dynamic => Ok(ArraySize::Dynamic),
        #[allow(unreachable_patterns)]
        _ => Err(unsupported("override-sized arrays")),
    }
}

/// Column stride of a matrix: two-row columns pack tightly, wider ones
/// take four components.
fn matrix_stride(rows: naga::VectorSize, scalar: naga::Scalar) -> u32 {
    let width = u32::from(scalar.width);
    match rows {
        naga::VectorSize::Bi => 2 * width,
        naga::VectorSize::Tri | naga::VectorSize::Quad => 4 * width,
    }
}

fn lower_address_space(space: naga::AddressSpace) -> Result<Mode, ParseError> {
    match space {
        naga::AddressSpace::Private => Ok(Mode::ShaderTemp),
        naga::AddressSpace::WorkGroup => Ok(Mode::Shared),
        naga::AddressSpace::Uniform => Ok(Mode::Ubo),
        naga::AddressSpace::Storage { .. } => Ok(Mode::Ssbo),
        naga::AddressSpace::PushConstant => Ok(Mode::PushConstant),
        naga::AddressSpace::Handle => Err(unsupported("image and sampler resources")),
        naga::AddressSpace::Function => Err(ParseError::Lowering(
            "global variable in the function address space".into(),
        )),
        #[allow(unreachable_patterns)]
        other => Err(unsupported(format!("address space {other:?}"))),
    }
}

fn builtin_input(
    builtin: naga::BuiltIn,
    stage: Stage,
    env: TargetEnv,
) -> Result<BuiltinInput, ParseError> {
    use naga::BuiltIn as B;
    use BuiltinInput::{System, Varying};

    Ok(match builtin {
        B::VertexIndex => System(SystemValue::VertexId),
        B::InstanceIndex => System(SystemValue::InstanceId),
        B::BaseVertex => System(match env {
            TargetEnv::OpenGl => SystemValue::BaseVertex,
            _ => SystemValue::FirstVertex,
        }),
        B::BaseInstance => System(SystemValue::BaseInstance),
        B::DrawID => System(SystemValue::DrawId),
        B::ViewIndex => System(SystemValue::ViewIndex),
        B::FrontFacing => System(SystemValue::FrontFace),
        B::Position { .. } if stage == Stage::Fragment => System(SystemValue::FragCoord),
        B::SampleIndex => System(SystemValue::SampleId),
        B::SampleMask => System(SystemValue::SampleMaskIn),
        B::GlobalInvocationId => System(SystemValue::GlobalInvocationId),
        B::LocalInvocationId => System(SystemValue::LocalInvocationId),
        B::LocalInvocationIndex => System(SystemValue::LocalInvocationIndex),
        B::WorkGroupId => System(SystemValue::WorkgroupId),
        B::NumWorkGroups => System(SystemValue::NumWorkgroups),
        B::PrimitiveIndex => Varying(Slot::PRIMITIVE_ID),
        B::PointCoord => Varying(Slot::PNTC),
        other => return Err(unsupported(format!("input builtin {other:?}"))),
    })
}

fn builtin_output(builtin: naga::BuiltIn) -> Result<Slot, ParseError> {
    use naga::BuiltIn as B;

    Ok(match builtin {
        B::Position { .. } => Slot::POS,
        B::PointSize => Slot::PSIZ,
        B::ClipDistance => Slot::CLIP_DIST0,
        B::CullDistance => Slot::CULL_DIST0,
        B::FragDepth => Slot::FRAG_DEPTH,
        B::SampleMask => Slot::SAMPLE_MASK,
        other => return Err(unsupported(format!("output builtin {other:?}"))),
    })
}

fn varying_slot(location: u32) -> Result<Slot, ParseError> {
    u8::try_from(location)
        .ok()
        .filter(|&n| n < Slot::MAX_VARYINGS)
        .map(Slot::var)
        .ok_or_else(|| unsupported(format!("varying location {location}")))
}

fn frag_data_slot(location: u32) -> Result<Slot, ParseError> {
    u8::try_from(location)
        .ok()
        .filter(|&n| n < 8)
        .map(Slot::frag_data)
        .ok_or_else(|| unsupported(format!("fragment output location {location}")))
}

/// Raw bits of a literal, zero-extended, and its scalar type.
fn lower_literal(lit: naga::Literal) -> Result<(u64, Scalar), ParseError> {
    Ok(match lit {
        naga::Literal::F64(v) => (v.to_bits(), Scalar::F64),
        naga::Literal::F32(v) => (u64::from(v.to_bits()), Scalar::F32),
        naga::Literal::U32(v) => (u64::from(v), Scalar::U32),
        naga::Literal::I32(v) => (u64::from(v as u32), Scalar::I32),
        naga::Literal::U64(v) => (v, Scalar::U64),
        naga::Literal::I64(v) => (v as u64, Scalar::I64),
        naga::Literal::Bool(v) => (u64::from(v), Scalar::BOOL),
        naga::Literal::AbstractInt(v) => (v as u64, Scalar::I64),
        naga::Literal::AbstractFloat(v) => (v.to_bits(), Scalar::F64),
        #[allow(unreachable_patterns)]
        other => return Err(unsupported(format!("literal {other:?}"))),
    })
}

fn value_scalar(inner: &naga::TypeInner) -> Result<Scalar, ParseError> {
    match *inner {
        naga::TypeInner::Scalar(s) | naga::TypeInner::Vector { scalar: s, .. } => lower_scalar(s),
        _ => Err(unsupported("composite function parameters and results")),
    }
}

fn constant_bits(constant: &Constant) -> Result<u64, ParseError> {
    match *constant {
        Constant::Zero => Ok(0),
        Constant::Scalar(bits) => Ok(bits),
        Constant::Composite(_) => Err(ParseError::Lowering(
            "composite constant where a scalar was expected".into(),
        )),
    }
}

fn constant_parts(constant: &Constant, count: usize) -> Result<Vec<Constant>, ParseError> {
    match constant {
        Constant::Zero => Ok(vec![Constant::Zero; count]),
        Constant::Composite(parts) if parts.len() == count => Ok(parts.clone()),
        _ => Err(ParseError::Lowering(format!(
            "constant does not have {count} components"
        ))),
    }
}

fn unsupported(what: impl Into<String>) -> ParseError {
    ParseError::Unsupported(what.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
