//! Global-object lowering.
//!
//! Replaces every abstract `GlobalObject` reference with the store kind that
//! implements the access. Only the positions listed in [`GlobalLowering`] may
//! hold a global; any other occurrence is rejected by the rewriter's defaults.

use std::collections::BTreeSet;

use tracing::debug;

use crate::compile::{CompileErrorKind, CompilerError};
use crate::ir::{count_kind, Edit, NodeKind, Operation, RootNode, UpdateTarget, ValueNode};
use crate::program::{FunctionDescription, Program};
use crate::rewrite::{walk_operation, RewriteResult, Rewriter};

pub struct GlobalLowering<'a> {
    /// Declared globals; `None` accepts any name.
    declared: Option<&'a BTreeSet<String>>,
}

impl<'a> GlobalLowering<'a> {
    pub fn new(declared: Option<&'a BTreeSet<String>>) -> Self {
        Self { declared }
    }

    fn check(&self, name: &str) -> RewriteResult<String> {
        match self.declared {
            Some(globals) if !globals.contains(name) => Err(CompilerError::new(
                CompileErrorKind::UnknownGlobal,
                format!("reference to undeclared global object `{name}`"),
            )),
            _ => Ok(name.to_string()),
        }
    }

    fn no_globals_in(&self, values: Vec<ValueNode>, context: &str) -> RewriteResult<Vec<ValueNode>> {
        if let Some(ValueNode::GlobalObject { name }) = values
            .iter()
            .find(|v| matches!(v, ValueNode::GlobalObject { .. }))
        {
            return Err(CompilerError::new(
                CompileErrorKind::GlobalAsValue,
                format!("cannot use global object `{name}` in {context}"),
            ));
        }
        self.values(values)
    }
}

impl Rewriter for GlobalLowering<'_> {
    fn selection(&self, root: ValueNode, level: Vec<ValueNode>) -> RewriteResult<ValueNode> {
        let ValueNode::GlobalObject { name } = root else {
            return Ok(ValueNode::Selection {
                root: Box::new(self.value(root)?),
                level: self.values(level)?,
            });
        };
        let obj = self.check(&name)?;
        if level.is_empty() {
            return Ok(ValueNode::GetWholeObject { name: obj });
        }
        if !matches!(level[0], ValueNode::Keys { .. }) {
            return Ok(ValueNode::GetKeyFromObject {
                obj,
                key: self.values(level)?,
            });
        }
        let keys = ValueNode::GetKeysOnly { obj };
        let rest: Vec<ValueNode> = level.into_iter().skip(1).collect();
        if rest.is_empty() {
            return Ok(keys);
        }
        Ok(ValueNode::Selection {
            root: Box::new(keys),
            level: self.values(rest)?,
        })
    }

    fn field_exists(&self, value: ValueNode, field: ValueNode) -> RewriteResult<ValueNode> {
        match value {
            ValueNode::GlobalObject { name } => Ok(ValueNode::KeyExists {
                obj: self.check(&name)?,
                key: Box::new(self.value(field)?),
            }),
            value => Ok(ValueNode::FieldExists {
                value: Box::new(self.value(value)?),
                field: Box::new(self.value(field)?),
            }),
        }
    }

    fn keys(&self, from: ValueNode) -> RewriteResult<ValueNode> {
        match from {
            ValueNode::GlobalObject { name } => Ok(ValueNode::GetKeysOnly {
                obj: self.check(&name)?,
            }),
            from => Ok(ValueNode::Keys {
                from: Box::new(self.value(from)?),
            }),
        }
    }

    fn array_literal(&self, values: Vec<ValueNode>) -> RewriteResult<ValueNode> {
        Ok(ValueNode::ArrayLiteral {
            values: self.no_globals_in(values, "an array literal")?,
        })
    }

    fn push_values(&self, values: Vec<ValueNode>) -> RewriteResult<Vec<ValueNode>> {
        self.no_globals_in(values, "a push")
    }

    fn update(
        &self,
        root: UpdateTarget,
        level: Vec<ValueNode>,
        operation: Operation,
    ) -> RewriteResult<RootNode> {
        let name = match root {
            UpdateTarget::GlobalObject { name } => name,
            UpdateTarget::Saved { arg } => {
                if matches!(operation, Operation::Edit(Edit::DeleteField)) {
                    require_deletable_field(&arg, &level)?;
                }
                return Ok(RootNode::Update {
                    root: UpdateTarget::Saved { arg },
                    level: self.values(level)?,
                    operation: walk_operation(self, operation)?,
                });
            }
        };
        let obj = self.check(&name)?;
        require_store_key(&obj, &level)?;
        let key = self.values(level)?;
        Ok(match operation {
            Operation::Edit(Edit::Push { values }) => RootNode::PushAtKeyOnObject {
                obj,
                key,
                values: self.push_values(values)?,
            },
            Operation::Edit(Edit::DeleteField) => RootNode::DeleteKeyOnObject { obj, key },
            Operation::Set(value) => RootNode::SetKeyOnObject {
                obj,
                key,
                value: self.value(value)?,
            },
        })
    }
}

/// Splits a store key path into the document key and the nested path. Every
/// store write and keyed read addresses at least one document.
pub(crate) fn require_store_key<'k>(
    obj: &str,
    key: &'k [ValueNode],
) -> Result<(&'k ValueNode, &'k [ValueNode]), CompilerError> {
    key.split_first().ok_or_else(|| {
        CompilerError::new(
            CompileErrorKind::NotAddressable,
            format!("access to global object `{obj}` needs at least one key"),
        )
    })
}

pub(crate) fn require_deletable_field(arg: &str, level: &[ValueNode]) -> Result<(), CompilerError> {
    if level.is_empty() {
        return Err(CompilerError::new(
            CompileErrorKind::NotAddressable,
            format!("cannot delete variable `{arg}` itself, only its fields"),
        ));
    }
    Ok(())
}

/// Lowers one function body. Lowering an already-lowered body returns it unchanged.
pub fn lower_function(
    f: &FunctionDescription,
    declared: Option<&BTreeSet<String>>,
) -> Result<FunctionDescription, CompilerError> {
    let lowering = GlobalLowering::new(declared);
    let out = f.try_map(|root| lowering.root(root))?;
    debug_assert_eq!(
        count_kind(&out.computation, NodeKind::GlobalObject),
        0,
        "abstract global object survived lowering"
    );
    Ok(out)
}

pub fn lower_program(program: &Program) -> Result<Program, CompilerError> {
    let declared = (!program.globals.is_empty()).then_some(&program.globals);
    let mut out = program.clone();
    for (name, f) in out.functions.iter_mut() {
        *f = lower_function(f, declared).map_err(|e| e.in_function(name))?;
        debug!(function = %name, "lowered function");
    }
    Ok(out)
}
