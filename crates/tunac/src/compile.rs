use std::collections::BTreeMap;

use tracing::{debug, trace};
use tuna_contracts::DIAG_CODE_LOCK_REQUIRED;

use crate::diagnostics::{Diagnostic, Location, Report, Severity, Stage};
use crate::emit;
use crate::locks::{self, LockKind, LockRequirements};
use crate::lower;
use crate::ops::Op;
use crate::program::{FunctionDescription, Program};
use crate::summarize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Parse,
    UnknownGlobal,
    GlobalAsValue,
    AbstractNode,
    MalformedBranch,
    NotAddressable,
    UnknownVariable,
    InvalidSchema,
}

impl CompileErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            CompileErrorKind::Parse => "TUNA-PARSE-0001",
            CompileErrorKind::UnknownGlobal => "TUNA-LOWER-0001",
            CompileErrorKind::GlobalAsValue => "TUNA-LOWER-0002",
            CompileErrorKind::AbstractNode => "TUNA-LOWER-0003",
            CompileErrorKind::MalformedBranch => "TUNA-CODEGEN-0001",
            CompileErrorKind::NotAddressable => "TUNA-CODEGEN-0002",
            CompileErrorKind::UnknownVariable => "TUNA-CODEGEN-0003",
            CompileErrorKind::InvalidSchema => "TUNA-CODEGEN-0004",
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            CompileErrorKind::Parse => Stage::Parse,
            CompileErrorKind::UnknownGlobal
            | CompileErrorKind::GlobalAsValue
            | CompileErrorKind::AbstractNode => Stage::Lower,
            CompileErrorKind::MalformedBranch
            | CompileErrorKind::NotAddressable
            | CompileErrorKind::UnknownVariable
            | CompileErrorKind::InvalidSchema => Stage::Codegen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompileErrorKind,
    pub message: String,
    /// Function being processed when the error was raised, if known.
    pub function: Option<String>,
}

impl CompilerError {
    pub fn new(kind: CompileErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            function: None,
        }
    }

    /// Records the function being processed and prefixes the message with it.
    pub fn in_function(self, name: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{name}: {}", self.message),
            function: Some(name.to_string()),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            code: self.kind.code().to_string(),
            severity: Severity::Error,
            stage: self.kind.stage(),
            message: self.message.clone(),
            loc: self.function.as_ref().map(|name| Location::Function {
                name: name.clone(),
            }),
            notes: Vec::new(),
            data: BTreeMap::new(),
        }
    }
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CompilerError {}

/// Lowers and compiles every function of `program`.
pub fn compile_program(program: &Program) -> Result<BTreeMap<String, Vec<Op>>, CompilerError> {
    let lowered = lower::lower_program(program)?;
    let mut out = BTreeMap::new();
    for (name, f) in &lowered.functions {
        let ops = compile_function(f).map_err(|e| e.in_function(name))?;
        debug!(function = %name, ops = ops.len(), "compiled function");
        out.insert(name.clone(), ops);
    }
    Ok(out)
}

/// Compiles one already-lowered function, prologue included.
pub fn compile_function(f: &FunctionDescription) -> Result<Vec<Op>, CompilerError> {
    emit::emit_function(f)
}

/// Lowers every function of `program` and computes its lock requirements.
pub fn analyze_program(
    program: &Program,
) -> Result<BTreeMap<String, LockRequirements>, CompilerError> {
    let lowered = lower::lower_program(program)?;
    let mut out = BTreeMap::new();
    for (name, f) in &lowered.functions {
        let reqs = analyze_function(f).map_err(|e| e.in_function(name))?;
        debug!(function = %name, locks = reqs.len(), "analyzed function");
        out.insert(name.clone(), reqs);
    }
    Ok(out)
}

/// Lock requirements of one already-lowered function.
pub fn analyze_function(f: &FunctionDescription) -> Result<LockRequirements, CompilerError> {
    let actions = summarize::summarize_function(f)?;
    let reqs = locks::calculate_lock_requirements(&actions);
    trace!(actions = actions.len(), "summarized function");
    Ok(reqs)
}

/// Advisory report: one warning per function that needs any lock.
pub fn lock_report(requirements: &BTreeMap<String, LockRequirements>) -> Report {
    let diagnostics = requirements
        .iter()
        .filter(|(_, reqs)| !reqs.is_empty())
        .map(|(name, reqs)| {
            let notes = reqs
                .iter()
                .map(|(global, kind)| format!("{} lock on {global}", kind.as_str()))
                .collect();
            let mut data = BTreeMap::new();
            for (global, kind) in reqs {
                data.insert(
                    global.clone(),
                    serde_json::Value::String(kind.as_str().to_string()),
                );
            }
            Diagnostic {
                code: DIAG_CODE_LOCK_REQUIRED.to_string(),
                severity: Severity::Warning,
                stage: Stage::Analyze,
                message: format!(
                    "function {name} needs {} to run concurrently",
                    describe_locks(reqs)
                ),
                loc: Some(Location::Function { name: name.clone() }),
                notes,
                data,
            }
        })
        .collect();
    Report::ok().with_diagnostics(diagnostics)
}

fn describe_locks(reqs: &LockRequirements) -> String {
    let writes = reqs.values().filter(|k| **k == LockKind::Write).count();
    let reads = reqs.len() - writes;
    match (writes, reads) {
        (0, r) => format!("{r} read lock(s)"),
        (w, 0) => format!("{w} write lock(s)"),
        (w, r) => format!("{w} write and {r} read lock(s)"),
    }
}

/// Human-readable advisory text, as printed by `tunac warn`.
pub fn render_lock_warnings(requirements: &BTreeMap<String, LockRequirements>) -> String {
    let mut out = String::new();
    for (name, reqs) in requirements {
        if reqs.is_empty() {
            continue;
        }
        out.push_str(&format!("Function {name} requires:\n"));
        for (global, kind) in reqs {
            out.push_str(&format!("\t-{} lock on {global}\n", kind.as_str()));
        }
    }
    out
}

pub fn error_report(err: &CompilerError) -> Report {
    Report::ok().with_diagnostics(vec![err.to_diagnostic()])
}
