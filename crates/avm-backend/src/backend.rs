//! Method compilation pipeline
//!
//! Validate → structure → compile the control tree → print. One `Backend`
//! can compile any number of methods, from any number of threads; only the
//! constant pool is shared between compilations.

use avm_ir::MethodGraph;

use crate::ast::{CodePrinter, JsPrinter};
use crate::config::BackendConfig;
use crate::constants::ConstantPool;
use crate::context::Context;
use crate::error::CompileResult;
use crate::looper;

/// Source text of one compiled method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMethod {
    pub name: String,
    pub parameters: Vec<String>,
    /// Body statements alone, for loaders that build the closure from a
    /// parameter list and a body
    pub body: String,
    /// The whole `function (...) { ... }` expression
    pub source: String,
}

/// Compiles method graphs to source text
pub struct Backend<'p> {
    config: BackendConfig,
    pool: &'p ConstantPool,
    printer: JsPrinter,
}

impl Backend<'static> {
    /// Backend interning into the process-wide constant pool
    pub fn new(config: BackendConfig) -> Self {
        Backend::with_pool(config, ConstantPool::global())
    }
}

impl Default for Backend<'static> {
    fn default() -> Self {
        Backend::new(BackendConfig::default())
    }
}

impl<'p> Backend<'p> {
    /// Backend interning into a caller-owned pool
    pub fn with_pool(config: BackendConfig, pool: &'p ConstantPool) -> Self {
        let printer = JsPrinter::new(config.printer.clone());
        Backend {
            config,
            pool,
            printer,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn pool(&self) -> &'p ConstantPool {
        self.pool
    }

    pub fn compile(&self, graph: &MethodGraph) -> CompileResult<CompiledMethod> {
        tracing::trace!("compiling:\n{}", graph);
        let tree = looper::structure(graph)?;

        let mut ctx = Context::new(graph, &self.config, self.pool);
        let body = ctx.compile(&tree)?;
        let function = ctx.into_function(body);

        let source = self.printer.print_function(&function);
        let body = self.printer.print_statements(&function.body);
        tracing::debug!(
            method = %graph.name,
            blocks = graph.blocks.len(),
            loops = tree.loop_count(),
            label_dispatch = tree.uses_label(),
            bytes = source.len(),
            "compiled method"
        );
        Ok(CompiledMethod {
            name: graph.name.clone(),
            parameters: function.params,
            body,
            source,
        })
    }

    /// Compile a method graph handed over as JSON
    pub fn compile_json(&self, text: &str) -> CompileResult<CompiledMethod> {
        let graph: MethodGraph = serde_json::from_str(text)?;
        self.compile(&graph)
    }
}
