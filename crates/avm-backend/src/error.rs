//! Compilation errors
//!
//! Every error is fatal for the one method being compiled and names the
//! offending block, node or variable. There is no recovery path.

use avm_ir::{BlockId, CfgError, NodeId, VariableId};
use thiserror::Error;

use crate::looper::LoopId;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Malformed CFG: {0}")]
    MalformedCfg(#[from] CfgError),

    #[error("Malformed method graph JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Block {block} ends in a terminator its control node cannot compile")]
    UnexpectedTerminator { block: BlockId },

    #[error("Phi {node} has no bound variable")]
    UnboundPhi { node: NodeId },

    #[error("Node {node} does not exist")]
    UnknownNode { node: NodeId },

    #[error("Variable {variable} does not exist")]
    UnknownVariable { variable: VariableId },

    #[error("Node {node} is a statement and cannot be used as a value")]
    StatementInExpression { node: NodeId },

    #[error("Exception region entered at {entry} is split across structured regions")]
    RegionSplit { entry: BlockId },

    #[error("Edge {from} -> {to} was never assigned a control transfer")]
    UnclassifiedEdge { from: BlockId, to: BlockId },

    #[error("Jump to loop {target} from outside of it")]
    InvalidJumpTarget { target: LoopId },

    #[error("Internal compiler error: {message}")]
    InternalError { message: String },
}
