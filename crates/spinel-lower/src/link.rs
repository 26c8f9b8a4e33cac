//! Inter-stage linking.
//!
//! Two adjacent stages must agree on which varyings they exchange and where
//! each one lives. Linking drops what only one side uses, fills reads of
//! unwritten inputs with zero, and packs the exchanged varyings into the
//! lowest driver locations in slot order, identically on both sides.

use std::ops::{BitOr, BitOrAssign};

use spinel_ir::{
    AluOp, Builder, Cursor, Def, DescriptorBinding, Handle, InstrKind, Intrinsic, IntrinsicOp,
    Metadata, Mode, Scalar, Shader, Slot, SlotSet, Stage, TypeInner, Value, Variable, VectorSize,
};
use spinel_opt::run_intrinsics_pass;

use crate::runtime::{RuntimeConf, VIEWPORT_SIZE, add_runtime_data_variable, load_runtime_field};

/// Pipeline state linking depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkOptions {
    /// The pipeline rasterizes points, so point size writes matter.
    pub points_topology: bool,
    /// Binding of the producer's runtime-data buffer.
    pub runtime_data_cbv: DescriptorBinding,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            points_topology: false,
            runtime_data_cbv: RuntimeConf::default().runtime_data_cbv,
        }
    }
}

/// Outcome of linking a producer/consumer pair.
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkResult {
    pub progress: bool,
    /// The producer now reads its runtime-data buffer. Linking declares the
    /// buffer itself; the driver must bind it.
    pub producer_requires_runtime_data: bool,
}

impl BitOr for LinkResult {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            progress: self.progress | rhs.progress,
            producer_requires_runtime_data: self.producer_requires_runtime_data
                | rhs.producer_requires_runtime_data,
        }
    }
}

impl BitOrAssign for LinkResult {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Builtin inputs a consumer may read without the producer writing them.
fn has_default(slot: Slot, consumer: Stage) -> bool {
    matches!(
        slot,
        Slot::LAYER | Slot::VIEWPORT | Slot::PRIMITIVE_ID | Slot::FACE | Slot::PNTC
    ) || (slot == Slot::POS && consumer == Stage::Fragment)
}

/// Links `producer` to the `consumer` stage that follows it.
///
/// Linking an already linked pair makes no progress.
///
/// # Panics
///
/// Panics if the consumer reads a builtin input that the producer never
/// writes and that has no default value.
pub fn link_shaders(producer: &mut Shader, consumer: &mut Shader, opts: &LinkOptions) -> LinkResult {
    log::debug!("linking {} -> {}", producer.stage(), consumer.stage());
    producer.gather_info();
    consumer.gather_info();
    let mut result = LinkResult::default();

    if consumer.stage() == Stage::Fragment && !opts.points_topology {
        for var in producer.variables_with_mode(Mode::ShaderOut) {
            if producer.variables[var].data.location == Some(Slot::PSIZ) {
                log::debug!("dropping point size output of {} shader", producer.stage());
                erase_variable(producer, var);
                result.progress = true;
            }
        }
    }

    if consumer.info.inputs_read.contains(Slot::PNTC)
        && !producer.info.outputs_written.contains(Slot::PNTC)
        && inject_point_coord(producer, opts)
    {
        result.progress = true;
        result.producer_requires_runtime_data = true;
    }

    producer.gather_info();
    let written = producer.info.outputs_written;
    for var in consumer.variables_with_mode(Mode::ShaderIn) {
        let slots = consumer.variable_slots(var);
        if slots.is_subset(written) {
            continue;
        }
        let Some(location) = consumer.variables[var].data.location else {
            continue;
        };
        if location.is_generic() {
            log::debug!("zeroing input {location}, not written by {} shader", producer.stage());
            erase_variable(consumer, var);
            result.progress = true;
        } else if let Some(missing) = (slots - written)
            .iter()
            .find(|&slot| !has_default(slot, consumer.stage()))
        {
            panic!(
                "{} shader reads builtin {missing} that the {} shader never writes",
                consumer.stage(),
                producer.stage()
            );
        }
    }

    consumer.gather_info();
    let read = consumer.info.inputs_read;
    for var in producer.variables_with_mode(Mode::ShaderOut) {
        let Some(location) = producer.variables[var].data.location else {
            continue;
        };
        if !location.is_generic()
            || producer.variable_slots(var).intersects(read)
            || is_read_back(producer, var)
        {
            continue;
        }
        log::debug!("removing output {location}, not read by {} shader", consumer.stage());
        erase_variable(producer, var);
        result.progress = true;
    }

    producer.gather_info();
    let exchanged = producer.info.outputs_written.generic() & consumer.info.inputs_read.generic();
    let span = exchanged_span(producer, Mode::ShaderOut, exchanged)
        | exchanged_span(consumer, Mode::ShaderIn, exchanged);
    result.progress |= assign_driver_locations(producer, Mode::ShaderOut, span);
    result.progress |= assign_driver_locations(consumer, Mode::ShaderIn, span);
    result
}

/// Links every adjacent pair of a pipeline given in stage order, starting
/// from the last stage so each producer sees its consumer's final inputs.
pub fn link_pipeline(shaders: &mut [Shader], opts: &LinkOptions) -> LinkResult {
    let mut result = LinkResult::default();
    for i in (1..shaders.len()).rev() {
        let (head, tail) = shaders.split_at_mut(i);
        result |= link_shaders(&mut head[i - 1], &mut tail[0], opts);
    }
    result
}

/// Every generic slot covered by a variable of `mode` that takes part in
/// the exchange. An array varying counts with all of its elements.
fn exchanged_span(shader: &Shader, mode: Mode, exchanged: SlotSet) -> SlotSet {
    shader
        .variables_with_mode(mode)
        .into_iter()
        .map(|var| shader.variable_slots(var).generic())
        .filter(|slots| slots.intersects(exchanged))
        .fold(exchanged, |span, slots| span | slots)
}

/// Numbers varyings inside `span` by the rank of their first slot in it; the
/// rest go after them in declaration order, each taking as many locations as
/// it has slots. Returns `true` if any location changed.
fn assign_driver_locations(shader: &mut Shader, mode: Mode, span: SlotSet) -> bool {
    let mut changed = false;
    let mut next_private = span.len();
    for var in shader.variables_with_mode(mode) {
        let slots = shader.variable_slots(var);
        let data = &mut shader.variables[var].data;
        let Some(location) = data.location.filter(|l| l.is_generic()) else {
            continue;
        };
        let driver_location = if span.contains(location) {
            span.count_below(location)
        } else {
            next_private += slots.len().max(1);
            next_private - slots.len().max(1)
        };
        if data.driver_location != driver_location {
            data.driver_location = driver_location;
            changed = true;
        }
    }
    changed
}

/// Returns `true` if the shader loads from its own output variable.
fn is_read_back(shader: &Shader, var: Handle<Variable>) -> bool {
    shader.functions.iter().any(|(_, func)| {
        func.instrs.iter().any(|(_, instr)| {
            matches!(instr.kind, InstrKind::Intrinsic(Intrinsic::LoadDeref { deref })
                if func.deref_root(deref) == var)
        })
    })
}

/// Removes a variable with everything that accesses it. Loads are replaced
/// with zero of their width.
fn erase_variable(shader: &mut Shader, var: Handle<Variable>) {
    for (_, func) in shader.functions.iter_mut() {
        let mut derefs = Vec::new();
        let mut accesses = Vec::new();
        for (value, instr) in func.instrs.iter() {
            match instr.kind {
                InstrKind::Deref(_) if func.deref_root(value) == var => derefs.push(value),
                InstrKind::Intrinsic(
                    Intrinsic::LoadDeref { deref }
                    | Intrinsic::StoreDeref { deref, .. }
                    | Intrinsic::DerefAtomic { deref, .. },
                ) if func.deref_root(deref) == var => accesses.push(value),
                _ => {}
            }
        }
        for access in accesses {
            if let Some(def) = func.def(access) {
                let zero = Builder::new(func, Cursor::Before(access)).zero(def);
                func.replace_all_uses(access, zero);
            }
            func.remove_instr(access);
        }
        for deref in derefs {
            func.remove_instr(deref);
        }
    }
    shader.variables.remove(var);
}

/// Adds a point-coordinate output computed from every whole store to the
/// position output: `(pos.xy / pos.w * 0.5 + 0.5) * viewport_size`.
/// Returns `false` if the producer writes no position.
fn inject_point_coord(producer: &mut Shader, opts: &LinkOptions) -> bool {
    let has_position = producer.variables_with_mode(Mode::ShaderOut)
        .into_iter()
        .any(|v| producer.variables[v].data.location == Some(Slot::POS));
    if !has_position {
        log::warn!(
            "{} shader writes no position to derive the point coordinate from",
            producer.stage()
        );
        return false;
    }

    let vec2 = producer.add_type(TypeInner::Vector {
        size: VectorSize::Bi,
        scalar: Scalar::F32,
    });
    let pntc = producer.add_variable(
        Variable::new("point_coord", vec2, Mode::ShaderOut)
            .with_location(Slot::PNTC)
            .injected(),
    );
    let conf = RuntimeConf {
        runtime_data_cbv: opts.runtime_data_cbv,
        ..RuntimeConf::default()
    };

    let injected = run_intrinsics_pass(producer, &[IntrinsicOp::StoreDeref], Metadata::ALL, |ctx| {
        let InstrKind::Intrinsic(Intrinsic::StoreDeref { deref, value, .. }) = *ctx.kind() else {
            return false;
        };
        let var = &ctx.shader.variables[ctx.func.deref_root(deref)];
        if var.data.location != Some(Slot::POS)
            || ctx.func.deref_path(deref).len() != 1
            || ctx.func.def_of(value).num_components != 4
        {
            return false;
        }
        let mut b = ctx.after();
        let coord = point_coord(&mut b, &conf, value);
        let d = b.deref_var(pntc, Mode::ShaderOut, vec2);
        b.store_deref(d, coord);
        true
    });

    if injected {
        add_runtime_data_variable(producer, &conf);
    } else {
        producer.variables.remove(pntc);
    }
    injected
}

fn point_coord(b: &mut Builder<'_>, conf: &RuntimeConf, position: Value) -> Value {
    let x = b.extract(position, 0);
    let y = b.extract(position, 1);
    let w = b.extract(position, 3);
    let xy = b.vec(&[x, y]);
    let ww = b.vec(&[w, w]);
    let ndc = b.alu(AluOp::FDiv, &[xy, ww]);
    let half = b.constant(vec![u64::from(0.5f32.to_bits()); 2], 32);
    let scaled = b.alu(AluOp::FMul, &[ndc, half]);
    let unit = b.alu(AluOp::FAdd, &[scaled, half]);
    let viewport = load_runtime_field(b, conf, VIEWPORT_SIZE, Def::new(2, 32));
    b.alu(AluOp::FMul, &[unit, viewport])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use spinel_ir::validate;

    struct Pair {
        producer: Shader,
        consumer: Shader,
    }

    fn vec4_type(shader: &mut Shader) -> Handle<spinel_ir::Type> {
        shader.add_type(TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        })
    }

    fn write_outputs(shader: &mut Shader, slots: &[Slot]) {
        let vec4 = vec4_type(shader);
        for &slot in slots {
            let var = shader.add_variable(
                Variable::new(format!("out_{slot}"), vec4, Mode::ShaderOut).with_location(slot),
            );
            let entry = shader.entry().entry;
            let mut b = Builder::at_end(shader.entry_mut(), entry);
            let one = b.const_f32(1.0);
            let v = b.vec(&[one, one, one, one]);
            let d = b.deref_var(var, Mode::ShaderOut, vec4);
            b.store_deref(d, v);
        }
    }

    /// Loads every input and adds them into one color output.
    fn read_inputs(shader: &mut Shader, slots: &[Slot]) -> Value {
        let vec4 = vec4_type(shader);
        let color = shader.add_variable(
            Variable::new("color", vec4, Mode::ShaderOut).with_location(Slot::frag_data(0)),
        );
        let vars: Vec<_> = slots
            .iter()
            .map(|&slot| {
                shader.add_variable(
                    Variable::new(format!("in_{slot}"), vec4, Mode::ShaderIn).with_location(slot),
                )
            })
            .collect();
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let mut sum = b.zero(Def::new(4, 32));
        for var in vars {
            let d = b.deref_var(var, Mode::ShaderIn, vec4);
            let v = b.load_deref(d, Def::new(4, 32));
            sum = b.alu(AluOp::FAdd, &[sum, v]);
        }
        let d = b.deref_var(color, Mode::ShaderOut, vec4);
        b.store_deref(d, sum);
        sum
    }

    fn pair(written: &[Slot], read: &[Slot]) -> Pair {
        let mut producer = Shader::new(Stage::Vertex);
        write_outputs(&mut producer, written);
        let mut consumer = Shader::new(Stage::Fragment);
        read_inputs(&mut consumer, read);
        Pair { producer, consumer }
    }

    fn driver_location(shader: &Shader, mode: Mode, slot: Slot) -> Option<u32> {
        shader
            .variables
            .iter()
            .find(|(_, v)| v.mode == mode && v.data.location == Some(slot))
            .map(|(_, v)| v.data.driver_location)
    }

    #[test]
    fn unmatched_varyings_are_dropped_and_exchanged_ones_packed() {
        let Pair {
            mut producer,
            mut consumer,
        } = pair(&[Slot::POS, Slot::var(3), Slot::var(7)], &[Slot::var(7), Slot::var(9)]);
        set_driver_location(&mut producer, Slot::var(7), 5);

        let result = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
        assert!(result.progress);
        assert!(!result.producer_requires_runtime_data);
        assert_eq!(validate(&producer), Ok(()));
        assert_eq!(validate(&consumer), Ok(()));

        assert_eq!(
            producer.info.outputs_written.iter().collect::<Vec<_>>(),
            vec![Slot::POS, Slot::var(7)]
        );
        assert_eq!(
            consumer.info.inputs_read.iter().collect::<Vec<_>>(),
            vec![Slot::var(7)]
        );
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(3)), None);
        assert_eq!(driver_location(&consumer, Mode::ShaderIn, Slot::var(9)), None);
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(7)), Some(0));
        assert_eq!(driver_location(&consumer, Mode::ShaderIn, Slot::var(7)), Some(0));
    }

    fn set_driver_location(shader: &mut Shader, slot: Slot, location: u32) {
        for (_, var) in shader.variables.iter_mut() {
            if var.data.location == Some(slot) {
                var.data.driver_location = location;
            }
        }
    }

    #[test]
    fn array_varying_keeps_its_elements_aligned() {
        let mut producer = Shader::new(Stage::Vertex);
        let vec4 = vec4_type(&mut producer);
        let array = producer.add_type(TypeInner::Array {
            base: vec4,
            size: spinel_ir::ArraySize::Constant(3),
            stride: 16,
        });
        let arr = producer.add_variable(
            Variable::new("arr", array, Mode::ShaderOut).with_location(Slot::var(0)),
        );
        let entry = producer.entry().entry;
        let mut b = Builder::at_end(producer.entry_mut(), entry);
        let one = b.const_f32(1.0);
        let v = b.vec(&[one, one, one, one]);
        let index = b.const_u32(1);
        let root = b.deref_var(arr, Mode::ShaderOut, array);
        let element = b.deref_array(root, index, vec4);
        b.store_deref(element, v);
        let mut consumer = Shader::new(Stage::Fragment);
        read_inputs(&mut consumer, &[Slot::var(1)]);

        let _ = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
        assert_eq!(validate(&producer), Ok(()));
        let base = driver_location(&producer, Mode::ShaderOut, Slot::var(0))
            .expect("array output is exchanged");
        let input = driver_location(&consumer, Mode::ShaderIn, Slot::var(1))
            .expect("input is exchanged");
        assert_eq!(base + 1, input);
    }

    #[test]
    fn private_array_varyings_do_not_overlap() {
        let mut producer = Shader::new(Stage::Vertex);
        let vec4 = vec4_type(&mut producer);
        let array = producer.add_type(TypeInner::Array {
            base: vec4,
            size: spinel_ir::ArraySize::Constant(2),
            stride: 16,
        });
        producer.add_variable(Variable::new("a", array, Mode::ShaderOut).with_location(Slot::var(4)));
        producer.add_variable(Variable::new("b", vec4, Mode::ShaderOut).with_location(Slot::var(6)));

        assert!(assign_driver_locations(&mut producer, Mode::ShaderOut, SlotSet::EMPTY));
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(4)), Some(0));
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(6)), Some(2));
    }

    #[test]
    fn unwritten_input_reads_become_zero() {
        let mut producer = Shader::new(Stage::Vertex);
        write_outputs(&mut producer, &[Slot::POS]);
        let mut consumer = Shader::new(Stage::Fragment);
        let sum = read_inputs(&mut consumer, &[Slot::var(0)]);

        let _ = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
        let func = consumer.entry();
        let InstrKind::Alu { srcs, .. } = func.kind(sum) else {
            panic!("sum was rewritten");
        };
        assert_eq!(func.as_const(srcs[1]), Some(&[0u64, 0, 0, 0][..]));
        assert_eq!(func.def(srcs[1]), Some(Def::new(4, 32)));
    }

    #[test]
    fn relinking_is_a_no_op() {
        let Pair {
            mut producer,
            mut consumer,
        } = pair(
            &[Slot::POS, Slot::PSIZ, Slot::var(1), Slot::var(4)],
            &[Slot::var(4), Slot::var(1), Slot::var(2)],
        );
        let opts = LinkOptions::default();
        assert!(link_shaders(&mut producer, &mut consumer, &opts).progress);
        let counts = (producer.instr_count(), consumer.instr_count());
        assert_eq!(link_shaders(&mut producer, &mut consumer, &opts), LinkResult::default());
        assert_eq!((producer.instr_count(), consumer.instr_count()), counts);
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(1)), Some(0));
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::var(4)), Some(1));
    }

    #[test]
    fn point_size_survives_only_for_points() {
        let Pair {
            mut producer,
            mut consumer,
        } = pair(&[Slot::POS, Slot::PSIZ], &[]);
        let points = LinkOptions {
            points_topology: true,
            ..LinkOptions::default()
        };
        let _ = link_shaders(&mut producer, &mut consumer, &points);
        assert!(producer.info.outputs_written.contains(Slot::PSIZ));

        let _ = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
        assert!(!producer.info.outputs_written.contains(Slot::PSIZ));
        assert_eq!(driver_location(&producer, Mode::ShaderOut, Slot::PSIZ), None);
    }

    #[test]
    fn point_coord_is_injected_from_position() {
        let Pair {
            mut producer,
            mut consumer,
        } = pair(&[Slot::POS], &[Slot::PNTC]);
        let result = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
        assert!(result.progress);
        assert!(result.producer_requires_runtime_data);
        assert_eq!(validate(&producer), Ok(()));
        assert!(producer.info.outputs_written.contains(Slot::PNTC));
        assert!(consumer.info.inputs_read.contains(Slot::PNTC));
        assert!(
            producer
                .variables
                .iter()
                .any(|(_, v)| v.mode == Mode::Ubo && v.data.binding == Some(LinkOptions::default().runtime_data_cbv))
        );
    }

    #[test]
    #[should_panic(expected = "never writes")]
    fn unwritten_builtin_without_default_panics() {
        let Pair {
            mut producer,
            mut consumer,
        } = pair(&[Slot::POS], &[Slot::CLIP_DIST0]);
        let _ = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
    }

    #[test]
    fn pipeline_links_back_to_front() {
        let mut vs = Shader::new(Stage::Vertex);
        write_outputs(&mut vs, &[Slot::POS, Slot::var(2), Slot::var(5)]);
        let mut gs = Shader::new(Stage::Geometry);
        read_inputs(&mut gs, &[Slot::var(5)]);
        write_outputs(&mut gs, &[Slot::POS, Slot::var(6)]);
        let mut fs = Shader::new(Stage::Fragment);
        read_inputs(&mut fs, &[Slot::var(6)]);

        let mut pipeline = [vs, gs, fs];
        assert!(link_pipeline(&mut pipeline, &LinkOptions::default()).progress);
        let [vs, gs, fs] = &pipeline;
        assert_eq!(driver_location(vs, Mode::ShaderOut, Slot::var(2)), None);
        assert_eq!(driver_location(vs, Mode::ShaderOut, Slot::var(5)), Some(0));
        assert_eq!(driver_location(gs, Mode::ShaderIn, Slot::var(5)), Some(0));
        assert_eq!(driver_location(gs, Mode::ShaderOut, Slot::var(6)), Some(0));
        assert_eq!(driver_location(fs, Mode::ShaderIn, Slot::var(6)), Some(0));
        assert!(!link_pipeline(&mut pipeline, &LinkOptions::default()).progress);
    }
}
