use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tuna_contracts::TUNA_DIAG_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Lower,
    Codegen,
    Analyze,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Function { name: String },
}

impl Location {
    fn sort_key(&self) -> (&'static str, &str) {
        match self {
            Location::Function { name } => ("function", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: TUNA_DIAG_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            let ak = a.loc.as_ref().map(Location::sort_key).unwrap_or(("", ""));
            let bk = b.loc.as_ref().map(Location::sort_key).unwrap_or(("", ""));
            ak.cmp(&bk)
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }
}
