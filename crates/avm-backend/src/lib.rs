//! # AVM structured backend
//!
//! Compiles one method at a time from its control-flow graph and value
//! graph ([`avm_ir::MethodGraph`]) to JavaScript source text.
//!
//! ## Pipeline
//!
//! ```text
//! MethodGraph ──validate──▶ Looper ──▶ ControlTree ──Context──▶ AST ──JsPrinter──▶ source
//!                                                     │
//!                                             lowering + ConstantPool
//! ```
//!
//! - [`looper`] recovers structured control flow (loops, conditionals,
//!   switches, try/catch) from an arbitrary CFG, falling back to a label
//!   variable and a dispatch loop for irreducible regions.
//! - [`context`] walks the control tree and drives [`lower`], which maps IR
//!   nodes to [`ast`] expressions and statements.
//! - [`constants`] is the process-wide pool through which generated code
//!   reaches non-primitive constants.
//!
//! The generated text is handed to an external loader; nothing here
//! executes it.

// ============================================================================
// Modules
// ============================================================================

pub mod ast;
pub mod backend;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod looper;
pub mod lower;

// ============================================================================
// Re-exports
// ============================================================================

pub use ast::{CodePrinter, JsPrinter};
pub use backend::{Backend, CompiledMethod};
pub use config::{BackendConfig, PrinterConfig};
pub use constants::ConstantPool;
pub use context::Context;
pub use error::{CompileError, CompileResult};
pub use looper::{structure, Control, ControlId, ControlTree, LoopId};
