use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tuna_contracts::{TUNA_AST_SCHEMA_VERSION, TUNA_AST_SCHEMA_VERSIONS_SUPPORTED};

use crate::compile::{CompileErrorKind, CompilerError};
use crate::ir::{RootNode, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    pub schema: Schema,
}

/// One function body. Inputs occupy heap slots `0..input.len()` in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescription {
    #[serde(default)]
    pub input: Vec<Input>,
    pub computation: Vec<RootNode>,
}

impl FunctionDescription {
    pub fn new(input: Vec<Input>, computation: Vec<RootNode>) -> Self {
        Self { input, computation }
    }

    /// Rebuilds the body root by root, keeping the inputs.
    pub fn try_map<E>(
        &self,
        mut f: impl FnMut(RootNode) -> Result<RootNode, E>,
    ) -> Result<FunctionDescription, E> {
        let computation = self
            .computation
            .iter()
            .cloned()
            .map(&mut f)
            .collect::<Result<Vec<_>, E>>()?;
        Ok(FunctionDescription {
            input: self.input.clone(),
            computation,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Declared global objects. Empty means references are not checked.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub globals: BTreeSet<String>,
    pub functions: BTreeMap<String, FunctionDescription>,
}

fn default_schema_version() -> String {
    TUNA_AST_SCHEMA_VERSION.to_string()
}

pub fn parse_program_json(bytes: &[u8]) -> Result<Program, CompilerError> {
    let program: Program = serde_json::from_slice(bytes).map_err(|e| {
        CompilerError::new(CompileErrorKind::Parse, format!("invalid program JSON: {e}"))
    })?;
    if !TUNA_AST_SCHEMA_VERSIONS_SUPPORTED.contains(&program.schema_version.as_str()) {
        return Err(CompilerError::new(
            CompileErrorKind::Parse,
            format!(
                "unsupported schema_version {:?} (supported: {})",
                program.schema_version,
                TUNA_AST_SCHEMA_VERSIONS_SUPPORTED.join(", ")
            ),
        ));
    }
    Ok(program)
}
