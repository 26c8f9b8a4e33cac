//! Functions, basic blocks and control flow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::arena::{Handle, Pool};
use crate::instr::{Def, DerefKind, Instr, InstrKind, Value};
use crate::metadata::{DomTree, LoopForest, Metadata};
use crate::var::Variable;

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Jump(Handle<Block>),
    Branch {
        cond: Value,
        then_block: Handle<Block>,
        else_block: Handle<Block>,
    },
    Return(Option<Value>),
    /// Fragment invocation is killed.
    Discard,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<Handle<Block>> {
        match *self {
            Self::Jump(target) => vec![target],
            Self::Branch {
                then_block,
                else_block,
                ..
            } => {
                if then_block == else_block {
                    vec![then_block]
                } else {
                    vec![then_block, else_block]
                }
            }
            Self::Return(_) | Self::Discard | Self::Unreachable => Vec::new(),
        }
    }

    pub fn srcs(&self) -> Vec<Value> {
        match *self {
            Self::Branch { cond, .. } => vec![cond],
            Self::Return(Some(value)) => vec![value],
            _ => Vec::new(),
        }
    }

    pub fn srcs_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Self::Branch { cond, .. } => vec![cond],
            Self::Return(Some(value)) => vec![value],
            _ => Vec::new(),
        }
    }

    /// Redirects every edge to `from` towards `to`.
    pub fn retarget(&mut self, from: Handle<Block>, to: Handle<Block>) {
        match self {
            Self::Jump(target) => {
                if *target == from {
                    *target = to;
                }
            }
            Self::Branch {
                then_block,
                else_block,
                ..
            } => {
                if *then_block == from {
                    *then_block = to;
                }
                if *else_block == from {
                    *else_block = to;
                }
            }
            _ => {}
        }
    }
}

/// A basic block: phis first, then straight-line instructions, then a terminator.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub instrs: Vec<Value>,
    pub terminator: Terminator,
}

impl Block {
    pub fn new(terminator: Terminator) -> Self {
        Self {
            instrs: Vec::new(),
            terminator,
        }
    }
}

/// An IR function in SSA form over a control-flow graph.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Def>,
    pub result: Option<Def>,
    pub instrs: Pool<Instr>,
    pub blocks: Pool<Block>,
    pub entry: Handle<Block>,
    valid: Metadata,
    block_order: Option<Arc<Vec<Handle<Block>>>>,
    dominance: Option<Arc<DomTree>>,
    loops: Option<Arc<LoopForest>>,
}

impl Default for Function {
    fn default() -> Self {
        let mut blocks = Pool::new();
        let entry = blocks.append(Block::new(Terminator::Return(None)));
        Self {
            name: None,
            params: Vec::new(),
            result: None,
            instrs: Pool::new(),
            blocks,
            entry,
            valid: Metadata::NONE,
            block_order: None,
            dominance: None,
            loops: None,
        }
    }
}

impl Function {
    /// Creates a function whose body is a single empty block that returns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Adds a block that is not yet reachable from anywhere.
    pub fn add_block(&mut self) -> Handle<Block> {
        self.blocks.append(Block::new(Terminator::Unreachable))
    }

    pub fn def(&self, value: Value) -> Option<Def> {
        self.instrs.try_get(value).and_then(|instr| instr.def)
    }

    /// Shape of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` was removed or defines nothing.
    pub fn def_of(&self, value: Value) -> Def {
        self.def(value)
            .unwrap_or_else(|| panic!("value {value:?} does not define a result"))
    }

    pub fn kind(&self, value: Value) -> &InstrKind {
        &self.instrs[value].kind
    }

    /// Immediate components of `value` if it is a constant.
    pub fn as_const(&self, value: Value) -> Option<&[u64]> {
        self.instrs.try_get(value).and_then(|i| i.kind.as_const())
    }

    /// Scalar immediate of a one-component constant.
    pub fn as_uint(&self, value: Value) -> Option<u64> {
        match self.as_const(value) {
            Some([v]) => Some(*v),
            _ => None,
        }
    }

    pub fn successors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.blocks[block].terminator.successors()
    }

    /// Predecessor lists of every live block, in a deterministic order.
    pub fn predecessors(&self) -> HashMap<Handle<Block>, Vec<Handle<Block>>> {
        let mut preds: HashMap<_, Vec<_>> =
            self.blocks.handles().into_iter().map(|b| (b, Vec::new())).collect();
        for (block, data) in self.blocks.iter() {
            for succ in data.terminator.successors() {
                preds.entry(succ).or_default().push(block);
            }
        }
        preds
    }

    /// Blocks reachable from the entry, in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<Handle<Block>> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some((block, next)) = stack.pop() {
            let succs = self.successors(block);
            if let Some(&succ) = succs.get(next) {
                stack.push((block, next + 1));
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        postorder
    }

    /// Index of `value` within its block.
    pub fn position(&self, value: Value) -> Option<usize> {
        let block = self.instrs.try_get(value)?.block;
        self.blocks[block].instrs.iter().position(|&v| v == value)
    }

    /// Removes an instruction from its block and tombstones it.
    pub fn remove_instr(&mut self, value: Value) {
        if let Some(instr) = self.instrs.remove(value) {
            if let Some(block) = self.blocks.try_get_mut(instr.block) {
                block.instrs.retain(|&v| v != value);
            }
        }
    }

    /// Removes a block and every instruction in it.
    pub fn remove_block(&mut self, block: Handle<Block>) {
        if let Some(data) = self.blocks.remove(block) {
            for value in data.instrs {
                self.instrs.remove(value);
            }
        }
    }

    /// Rewrites every use of `old`, including terminators, to `new`.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) -> bool {
        let mut changed = false;
        for (_, instr) in self.instrs.iter_mut() {
            for src in instr.kind.srcs_mut() {
                if *src == old {
                    *src = new;
                    changed = true;
                }
            }
        }
        for (_, block) in self.blocks.iter_mut() {
            for src in block.terminator.srcs_mut() {
                if *src == old {
                    *src = new;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Number of uses of every value, terminators included.
    pub fn use_counts(&self) -> HashMap<Value, usize> {
        let mut counts = HashMap::new();
        for (_, instr) in self.instrs.iter() {
            for src in instr.kind.srcs() {
                *counts.entry(src).or_insert(0) += 1;
            }
        }
        for (_, block) in self.blocks.iter() {
            for src in block.terminator.srcs() {
                *counts.entry(src).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Variable at the root of a deref chain.
    ///
    /// # Panics
    ///
    /// Panics if `deref` is not a deref instruction or its chain is broken.
    pub fn deref_root(&self, deref: Value) -> Handle<Variable> {
        let mut current = deref;
        loop {
            match self.instrs.try_get(current).map(|i| &i.kind) {
                Some(InstrKind::Deref(d)) => match d.kind {
                    DerefKind::Var(var) => return var,
                    DerefKind::Array { parent, .. } | DerefKind::Struct { parent, .. } => {
                        current = parent
                    }
                },
                _ => panic!("deref chain of {deref:?} does not resolve to a variable"),
            }
        }
    }

    /// The chain from the root variable deref down to `deref`.
    pub fn deref_path(&self, deref: Value) -> Vec<Value> {
        let mut path = vec![deref];
        let mut current = deref;
        while let Some(InstrKind::Deref(d)) = self.instrs.try_get(current).map(|i| &i.kind) {
            match d.kind {
                DerefKind::Var(_) => break,
                DerefKind::Array { parent, .. } | DerefKind::Struct { parent, .. } => {
                    path.push(parent);
                    current = parent;
                }
            }
        }
        path.reverse();
        path
    }

    /// Currently valid analyses.
    pub fn valid_metadata(&self) -> Metadata {
        self.valid
    }

    /// Drops every cached analysis not in `keep`.
    pub fn preserve_metadata(&mut self, keep: Metadata) {
        self.valid = self.valid & keep;
        if !self.valid.contains(Metadata::BLOCK_INDEX) {
            self.block_order = None;
        }
        if !self.valid.contains(Metadata::DOMINANCE) {
            self.dominance = None;
        }
        if !self.valid.contains(Metadata::LOOP_ANALYSIS) {
            self.loops = None;
        }
    }

    /// Reverse postorder, computed on demand and cached.
    pub fn block_order(&mut self) -> Arc<Vec<Handle<Block>>> {
        if let Some(order) = &self.block_order {
            return Arc::clone(order);
        }
        let order = Arc::new(self.reverse_postorder());
        self.block_order = Some(Arc::clone(&order));
        self.valid = self.valid | Metadata::BLOCK_INDEX;
        order
    }

    /// Dominator tree, computed on demand and cached.
    pub fn dominance(&mut self) -> Arc<DomTree> {
        if let Some(dom) = &self.dominance {
            return Arc::clone(dom);
        }
        let dom = Arc::new(DomTree::compute(self));
        self.dominance = Some(Arc::clone(&dom));
        self.valid = self.valid | Metadata::DOMINANCE;
        dom
    }

    /// Natural loops, computed on demand and cached.
    pub fn loops(&mut self) -> Arc<LoopForest> {
        if let Some(loops) = &self.loops {
            return Arc::clone(loops);
        }
        let dom = self.dominance();
        let loops = Arc::new(LoopForest::compute(self, &dom));
        self.loops = Some(Arc::clone(&loops));
        self.valid = self.valid | Metadata::LOOP_ANALYSIS;
        loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, Cursor};
    use crate::instr::AluOp;

    #[test]
    fn new_function_has_single_returning_block() {
        let func = Function::new("main");
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[func.entry].terminator, Terminator::Return(None));
        assert_eq!(func.reverse_postorder(), vec![func.entry]);
    }

    #[test]
    fn replace_all_uses_covers_terminators() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let exit = func.add_block();
        let (a, b, cmp) = {
            let mut b = Builder::at_end(&mut func, entry);
            let x = b.const_u32(1);
            let y = b.const_u32(2);
            let cmp = b.alu(AluOp::ULt, &[x, y]);
            (x, y, cmp)
        };
        func.blocks[entry].terminator = Terminator::Branch {
            cond: cmp,
            then_block: exit,
            else_block: exit,
        };
        func.blocks[exit].terminator = Terminator::Return(Some(a));

        assert!(func.replace_all_uses(a, b));
        assert_eq!(func.blocks[exit].terminator, Terminator::Return(Some(b)));
        // both operands of `cmp` plus the return
        assert_eq!(func.use_counts().get(&b), Some(&3));
        assert_eq!(func.use_counts().get(&a), None);
        assert_eq!(func.successors(entry), vec![exit]);
    }

    #[test]
    fn remove_instr_unlinks_from_block() {
        let mut func = Function::new("f");
        let entry = func.entry;
        let v = Builder::new(&mut func, Cursor::BlockEnd(entry)).const_u32(7);
        assert_eq!(func.blocks[entry].instrs, vec![v]);
        func.remove_instr(v);
        assert!(func.blocks[entry].instrs.is_empty());
        assert!(!func.instrs.contains(v));
    }

    #[test]
    fn metadata_is_cached_until_invalidated() {
        let mut func = Function::new("f");
        let _ = func.dominance();
        assert!(func.valid_metadata().contains(Metadata::DOMINANCE));
        func.preserve_metadata(Metadata::BLOCK_INDEX);
        assert!(!func.valid_metadata().contains(Metadata::DOMINANCE));
        let _ = func.loops();
        assert!(func.valid_metadata().contains(Metadata::LOOP_ANALYSIS));
        assert!(func.valid_metadata().contains(Metadata::DOMINANCE));
    }
}
