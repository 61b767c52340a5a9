//! # AVM method graph
//!
//! The input contract of the structured JavaScript backend: a method's
//! value graph (typed IR nodes, already in SSA form with phis resolved
//! through explicit moves) together with its control-flow graph of basic
//! blocks, declared loop headers and exception regions.
//!
//! Graphs are produced upstream by the bytecode verifier and are immutable
//! once handed over. They can also be built in code with [`GraphBuilder`]
//! or loaded from JSON, since every type here derives `serde`.

// ============================================================================
// Modules
// ============================================================================

pub mod builder;
pub mod cfg;
pub mod display;
pub mod node;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::GraphBuilder;
pub use cfg::{BasicBlock, CfgError, ExceptionRegion, MethodGraph, Terminator};
pub use node::{BinaryOp, ConstValue, Node, NodeKind, ObjectHandle, UnaryOp, Variable};
pub use types::{BlockId, NodeId, VariableId};
