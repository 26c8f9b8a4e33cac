//! Cached control-flow analyses: block order, dominance and natural loops.

use std::collections::{HashMap, HashSet};

use crate::arena::Handle;
use crate::func::{Block, Function};

/// Bitflags naming the analyses a pass leaves valid.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct Metadata(u8);

impl Metadata {
    pub const NONE: Self = Self(0);
    pub const BLOCK_INDEX: Self = Self(1);
    pub const DOMINANCE: Self = Self(2);
    pub const LOOP_ANALYSIS: Self = Self(4);
    /// Everything a pass that leaves the CFG alone keeps valid.
    pub const ALL: Self = Self(7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Metadata {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Metadata {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Dominator tree over the blocks reachable from the entry.
///
/// Built with the iterative algorithm of Cooper, Harvey and Kennedy over the
/// reverse postorder.
#[derive(Clone, Debug)]
pub struct DomTree {
    rpo: Vec<Handle<Block>>,
    rpo_index: HashMap<Handle<Block>, usize>,
    idom: HashMap<Handle<Block>, Handle<Block>>,
}

impl DomTree {
    pub fn compute(func: &Function) -> Self {
        let rpo = func.reverse_postorder();
        let rpo_index: HashMap<_, _> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let preds = func.predecessors();

        let mut idom: HashMap<Handle<Block>, Handle<Block>> = HashMap::new();
        idom.insert(func.entry, func.entry);

        let intersect = |idom: &HashMap<Handle<Block>, Handle<Block>>,
                         mut a: Handle<Block>,
                         mut b: Handle<Block>| {
            while a != b {
                while rpo_index[&a] > rpo_index[&b] {
                    a = idom[&a];
                }
                while rpo_index[&b] > rpo_index[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &pred in preds.get(&block).map(Vec::as_slice).unwrap_or_default() {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom
                    && idom.get(&block) != Some(&new_idom)
                {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        Self {
            rpo,
            rpo_index,
            idom,
        }
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> &[Handle<Block>] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: Handle<Block>) -> bool {
        self.rpo_index.contains_key(&block)
    }

    /// Immediate dominator, `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: Handle<Block>) -> Option<Handle<Block>> {
        self.idom.get(&block).copied().filter(|&d| d != block)
    }

    /// Returns `true` if every path from the entry to `b` passes through `a`.
    pub fn dominates(&self, a: Handle<Block>, b: Handle<Block>) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        while let Some(parent) = self.idom(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }
}

/// A natural loop.
#[derive(Clone, Debug)]
pub struct Loop {
    pub header: Handle<Block>,
    pub blocks: HashSet<Handle<Block>>,
    /// The single block outside the loop that jumps to the header, if any.
    pub preheader: Option<Handle<Block>>,
}

impl Loop {
    pub fn contains(&self, block: Handle<Block>) -> bool {
        self.blocks.contains(&block)
    }
}

/// The natural loops of a function, innermost first.
#[derive(Clone, Debug, Default)]
pub struct LoopForest {
    pub loops: Vec<Loop>,
}

impl LoopForest {
    pub fn compute(func: &Function, dom: &DomTree) -> Self {
        let preds = func.predecessors();
        let mut by_header: HashMap<Handle<Block>, HashSet<Handle<Block>>> = HashMap::new();

        for &block in dom.rpo() {
            for succ in func.successors(block) {
                if !dom.dominates(succ, block) {
                    continue;
                }
                // Back edge block -> succ: walk predecessors up to the header.
                let body = by_header.entry(succ).or_insert_with(|| HashSet::from([succ]));
                let mut worklist = vec![block];
                while let Some(b) = worklist.pop() {
                    if body.insert(b) {
                        for &p in preds.get(&b).map(Vec::as_slice).unwrap_or_default() {
                            if dom.is_reachable(p) {
                                worklist.push(p);
                            }
                        }
                    }
                }
            }
        }

        let mut loops: Vec<Loop> = by_header
            .into_iter()
            .map(|(header, blocks)| {
                let outside: Vec<_> = preds
                    .get(&header)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .copied()
                    .filter(|p| !blocks.contains(p) && dom.is_reachable(*p))
                    .collect();
                let preheader = match outside.as_slice() {
                    [single] if func.successors(*single) == [header] => Some(*single),
                    _ => None,
                };
                Loop {
                    header,
                    blocks,
                    preheader,
                }
            })
            .collect();
        loops.sort_by_key(|l| (l.blocks.len(), l.header));
        Self { loops }
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}
