//! Error types for the Spinel IR.

/// A broken IR invariant found by [`validate`](crate::validate).
///
/// Values and blocks are reported by their arena index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("in `{function}`: instruction %{user} uses removed value %{operand}")]
    DanglingOperand {
        function: String,
        user: usize,
        operand: usize,
    },

    #[error("in `{function}`: instruction %{user} uses %{operand}, which defines no value")]
    MissingDef {
        function: String,
        user: usize,
        operand: usize,
    },

    #[error("in `{function}`: use of %{operand} in %{user} is not dominated by its definition")]
    NotDominated {
        function: String,
        user: usize,
        operand: usize,
    },

    #[error("in `{function}`: phi %{phi} does not match the predecessors of block {block}")]
    PhiPredecessorMismatch {
        function: String,
        phi: usize,
        block: usize,
    },

    #[error("in `{function}`: phi %{phi} follows a non-phi instruction")]
    MisplacedPhi { function: String, phi: usize },

    #[error("in `{function}`: block {block} branches to removed block {target}")]
    BadBranchTarget {
        function: String,
        block: usize,
        target: usize,
    },

    #[error("in `{function}`: instruction %{instr} is listed in block {listed} but records block {recorded}")]
    BlockMismatch {
        function: String,
        instr: usize,
        listed: usize,
        recorded: usize,
    },

    #[error("in `{function}`: deref %{deref} names removed variable {variable}")]
    DanglingVariable {
        function: String,
        deref: usize,
        variable: usize,
    },
}
