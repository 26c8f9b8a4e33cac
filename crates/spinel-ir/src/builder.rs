//! Instruction builder with an insertion cursor.

use crate::arena::Handle;
use crate::func::{Block, Function};
use crate::instr::{
    AluOp, Def, Deref, DerefKind, Instr, InstrKind, Intrinsic, PhiSrc, Value,
};
use crate::slot::SystemValue;
use crate::types::Type;
use crate::var::{Mode, Variable};

/// Where the next instruction goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cursor {
    /// Immediately before an instruction. Stays put, so successive inserts keep their order.
    Before(Value),
    /// Immediately after an instruction. Advances past each insert.
    After(Value),
    /// After the phis of a block.
    BlockStart(Handle<Block>),
    /// At the end of a block, before its terminator.
    BlockEnd(Handle<Block>),
}

/// Appends instructions to a [`Function`] at a [`Cursor`].
pub struct Builder<'f> {
    pub func: &'f mut Function,
    pub cursor: Cursor,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function, cursor: Cursor) -> Self {
        Self { func, cursor }
    }

    pub fn at_end(func: &'f mut Function, block: Handle<Block>) -> Self {
        Self::new(func, Cursor::BlockEnd(block))
    }

    /// Inserts a raw instruction at the cursor.
    pub fn insert(&mut self, kind: InstrKind, def: Option<Def>) -> Value {
        let (block, index) = match self.cursor {
            Cursor::Before(v) => {
                let block = self.func.instrs[v].block;
                (block, self.index_of(block, v))
            }
            Cursor::After(v) => {
                let block = self.func.instrs[v].block;
                (block, self.index_of(block, v) + 1)
            }
            Cursor::BlockStart(block) => {
                let phis = self.func.blocks[block]
                    .instrs
                    .iter()
                    .take_while(|&&v| self.func.instrs[v].kind.is_phi())
                    .count();
                (block, phis)
            }
            Cursor::BlockEnd(block) => (block, self.func.blocks[block].instrs.len()),
        };
        let value = self.func.instrs.append(Instr { kind, def, block });
        self.func.blocks[block].instrs.insert(index, value);
        if !matches!(self.cursor, Cursor::Before(_)) {
            self.cursor = Cursor::After(value);
        }
        value
    }

    fn index_of(&self, block: Handle<Block>, value: Value) -> usize {
        self.func.blocks[block]
            .instrs
            .iter()
            .position(|&v| v == value)
            .unwrap_or_else(|| panic!("cursor instruction {value:?} is not in its block"))
    }

    pub fn constant(&mut self, values: Vec<u64>, bit_size: u8) -> Value {
        let def = Def::new(values.len() as u8, bit_size);
        let mask = def.bit_mask();
        let values = values.into_iter().map(|v| v & mask).collect();
        self.insert(InstrKind::Const(values), Some(def))
    }

    pub fn const_uint(&mut self, value: u64, bit_size: u8) -> Value {
        self.constant(vec![value], bit_size)
    }

    pub fn const_u32(&mut self, value: u32) -> Value {
        self.const_uint(u64::from(value), 32)
    }

    pub fn const_f32(&mut self, value: f32) -> Value {
        self.const_uint(u64::from(value.to_bits()), 32)
    }

    pub fn const_bool(&mut self, value: bool) -> Value {
        self.const_uint(u64::from(value), 1)
    }

    /// All-zero constant of the given shape.
    pub fn zero(&mut self, def: Def) -> Value {
        self.constant(vec![0; def.num_components as usize], def.bit_size)
    }

    pub fn undef(&mut self, def: Def) -> Value {
        self.insert(InstrKind::Undef, Some(def))
    }

    /// ALU instruction with an inferred result shape.
    pub fn alu(&mut self, op: AluOp, srcs: &[Value]) -> Value {
        let defs: Vec<Def> = srcs.iter().map(|&s| self.func.def_of(s)).collect();
        let def = op.infer_def(&defs);
        self.insert(
            InstrKind::Alu {
                op,
                srcs: srcs.to_vec(),
            },
            Some(def),
        )
    }

    pub fn iadd(&mut self, a: Value, b: Value) -> Value {
        self.alu(AluOp::IAdd, &[a, b])
    }

    pub fn imul(&mut self, a: Value, b: Value) -> Value {
        self.alu(AluOp::IMul, &[a, b])
    }

    /// Adds an immediate, skipping the add for zero.
    pub fn iadd_imm(&mut self, a: Value, imm: u64) -> Value {
        if imm == 0 {
            return a;
        }
        let bits = self.func.def_of(a).bit_size;
        let c = self.const_uint(imm, bits);
        self.iadd(a, c)
    }

    /// Multiplies by an immediate, skipping the multiply for one.
    pub fn imul_imm(&mut self, a: Value, imm: u64) -> Value {
        if imm == 1 {
            return a;
        }
        let bits = self.func.def_of(a).bit_size;
        let c = self.const_uint(imm, bits);
        self.imul(a, c)
    }

    pub fn extract(&mut self, v: Value, component: u8) -> Value {
        self.alu(AluOp::Extract(component), &[v])
    }

    pub fn vec(&mut self, components: &[Value]) -> Value {
        if let [single] = components {
            return *single;
        }
        self.alu(AluOp::Vec, components)
    }

    pub fn bcsel(&mut self, cond: Value, a: Value, b: Value) -> Value {
        self.alu(AluOp::BCsel, &[cond, a, b])
    }

    /// Converts an unsigned integer to `bit_size`, if it is not that wide already.
    pub fn u2u(&mut self, v: Value, bit_size: u8) -> Value {
        if self.func.def_of(v).bit_size == bit_size {
            return v;
        }
        self.alu(AluOp::U2U(bit_size), &[v])
    }

    pub fn intrinsic(&mut self, intrinsic: Intrinsic, def: Option<Def>) -> Value {
        self.insert(InstrKind::Intrinsic(intrinsic), def)
    }

    pub fn load_system_value(&mut self, value: SystemValue) -> Value {
        self.intrinsic(Intrinsic::LoadSystemValue(value), Some(value.def()))
    }

    pub fn deref_var(&mut self, var: Handle<Variable>, mode: Mode, ty: Handle<Type>) -> Value {
        self.insert(
            InstrKind::Deref(Deref {
                kind: DerefKind::Var(var),
                mode,
                ty,
            }),
            Some(Def::U32),
        )
    }

    pub fn deref_array(&mut self, parent: Value, index: Value, ty: Handle<Type>) -> Value {
        let mode = self.deref_mode(parent);
        self.insert(
            InstrKind::Deref(Deref {
                kind: DerefKind::Array { parent, index },
                mode,
                ty,
            }),
            Some(Def::U32),
        )
    }

    pub fn deref_struct(&mut self, parent: Value, member: u32, ty: Handle<Type>) -> Value {
        let mode = self.deref_mode(parent);
        self.insert(
            InstrKind::Deref(Deref {
                kind: DerefKind::Struct { parent, member },
                mode,
                ty,
            }),
            Some(Def::U32),
        )
    }

    fn deref_mode(&self, parent: Value) -> Mode {
        match self.func.kind(parent) {
            InstrKind::Deref(d) => d.mode,
            other => panic!("deref parent {parent:?} is not a deref: {other:?}"),
        }
    }

    pub fn load_deref(&mut self, deref: Value, def: Def) -> Value {
        self.intrinsic(Intrinsic::LoadDeref { deref }, Some(def))
    }

    pub fn store_deref(&mut self, deref: Value, value: Value) -> Value {
        let components = self.func.def_of(value).num_components;
        self.intrinsic(
            Intrinsic::StoreDeref {
                deref,
                value,
                write_mask: (1u8 << components) - 1,
            },
            None,
        )
    }

    /// Adds a phi to the start of `block`, after any existing phis.
    pub fn phi(&mut self, block: Handle<Block>, srcs: Vec<PhiSrc>, def: Def) -> Value {
        let saved = std::mem::replace(&mut self.cursor, Cursor::BlockStart(block));
        let value = self.insert(InstrKind::Phi(srcs), Some(def));
        self.cursor = saved;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_cursor_preserves_insertion_order() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let last = Builder::at_end(&mut func, entry).const_u32(3);
        let mut b = Builder::new(&mut func, Cursor::Before(last));
        let first = b.const_u32(1);
        let second = b.const_u32(2);
        assert_eq!(func.blocks[entry].instrs, vec![first, second, last]);
    }

    #[test]
    fn after_cursor_advances() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let a = Builder::at_end(&mut func, entry).const_u32(0);
        let z = Builder::at_end(&mut func, entry).const_u32(9);
        let mut b = Builder::new(&mut func, Cursor::After(a));
        let x = b.const_u32(1);
        let y = b.const_u32(2);
        assert_eq!(func.blocks[entry].instrs, vec![a, x, y, z]);
    }

    #[test]
    fn phis_stay_in_front() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let c = Builder::at_end(&mut func, entry).const_u32(0);
        let mut b = Builder::at_end(&mut func, entry);
        let p = b.phi(entry, Vec::new(), Def::U32);
        let d = b.const_u32(1);
        assert_eq!(func.blocks[entry].instrs, vec![p, c, d]);
    }

    #[test]
    fn constants_are_masked_to_bit_size() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let v = Builder::at_end(&mut func, entry).const_uint(0x1_ffff, 16);
        assert_eq!(func.as_uint(v), Some(0xffff));
        assert_eq!(func.def(v), Some(Def::scalar(16)));
    }

    #[test]
    fn alu_infers_def() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let mut b = Builder::at_end(&mut func, entry);
        let x = b.const_u32(1);
        let y = b.const_u32(2);
        let v = b.vec(&[x, y]);
        let e = b.extract(v, 1);
        let wide = b.u2u(e, 64);
        assert_eq!(func.def(v), Some(Def::new(2, 32)));
        assert_eq!(func.def(e), Some(Def::U32));
        assert_eq!(func.def(wide), Some(Def::U64));
    }
}
