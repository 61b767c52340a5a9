//! Backend configuration
//!
//! Names the generated code reserves for itself, and printer layout. All
//! fields have defaults, so a partial JSON object is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::CompileResult;

/// Layout of printed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// Prefix for every printed line (default: "")
    pub base: String,
    /// One level of indentation (default: two spaces)
    pub indent: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        PrinterConfig {
            base: String::new(),
            indent: "  ".to_string(),
        }
    }
}

/// Configuration for the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub printer: PrinterConfig,
    /// Variable used for label dispatch (default: "$L")
    pub label_variable: String,
    /// Runtime table the constant pool is exposed as (default: "$C")
    pub constants_name: String,
    /// Catch clause parameter (default: "$e")
    pub exception_variable: String,
    /// Prefix of JS statement labels on loops (default: "L")
    pub loop_label_prefix: String,
    /// Prefix of variables introduced for unbound scheduled nodes (default: "$t")
    pub temporary_prefix: String,
    /// Prefix of placeholder names for unused parameters (default: "_")
    pub unused_parameter_prefix: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            printer: PrinterConfig::default(),
            label_variable: "$L".to_string(),
            constants_name: "$C".to_string(),
            exception_variable: "$e".to_string(),
            loop_label_prefix: "L".to_string(),
            temporary_prefix: "$t".to_string(),
            unused_parameter_prefix: "_".to_string(),
        }
    }
}

impl BackendConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
