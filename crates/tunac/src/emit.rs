//! Lowered node trees to VM instructions.
//!
//! Each function is compiled by one [`Emitter`] whose resolver tracks heap slots.
//! The heap length always equals the resolver's next free slot at the point an
//! instruction runs: `Save` appends, and every scope that declared variables is
//! closed with a `truncateHeap` of exactly the slots it freed.

use serde_json::json;

use crate::compile::{CompileErrorKind, CompilerError};
use crate::ir::{
    BoolAlgSign, Branch, ComparisonSign, Edit, Field, MathSign, Operation, RootNode, UpdateTarget,
    ValueNode,
};
use crate::lower::require_deletable_field;
use crate::ops::Op;
use crate::program::{FunctionDescription, Input};
use crate::scope::VarResolver;

pub(crate) struct Emitter {
    pub(crate) resolver: VarResolver,
}

/// An `If` after normalization: conditional arms (optionally ending in one `Else`)
/// and the `Finally` body, if the source had one.
#[derive(Debug)]
pub(crate) struct BranchShape<'a> {
    pub arms: Vec<&'a Branch>,
    pub finally: Option<&'a [RootNode]>,
}

fn malformed(message: String) -> CompilerError {
    CompilerError::new(CompileErrorKind::MalformedBranch, message)
}

/// Checks `Conditional+ Else? Finally?` and splits the `Finally` off.
pub(crate) fn normalize_branches(branches: &[Branch]) -> Result<BranchShape<'_>, CompilerError> {
    let mut arms: Vec<&Branch> = Vec::new();
    let mut finally = None;
    let mut seen_else = false;
    for (index, branch) in branches.iter().enumerate() {
        if finally.is_some() {
            return Err(malformed(format!(
                "branch {index} follows the Finally branch"
            )));
        }
        if arms.is_empty() && !matches!(branch, Branch::Conditional { .. }) {
            return Err(malformed(
                "an If must start with a Conditional branch".to_string(),
            ));
        }
        match branch {
            Branch::Conditional { .. } if seen_else => {
                return Err(malformed(format!(
                    "branch {index}: Conditional after Else"
                )));
            }
            Branch::Conditional { .. } => arms.push(branch),
            Branch::Else { .. } if seen_else => {
                return Err(malformed(format!("branch {index}: second Else")));
            }
            Branch::Else { .. } => {
                seen_else = true;
                arms.push(branch);
            }
            Branch::Finally { body } => finally = Some(body.as_slice()),
        }
    }
    if arms.is_empty() {
        return Err(malformed("an If needs at least one Conditional branch".to_string()));
    }
    Ok(BranchShape { arms, finally })
}

pub fn emit_function(f: &FunctionDescription) -> Result<Vec<Op>, CompilerError> {
    let mut emitter = Emitter::new();
    let mut ops = emitter.emit_prologue(&f.input);
    ops.extend(emitter.emit_roots(&f.computation)?);
    Ok(ops)
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self {
            resolver: VarResolver::new(),
        }
    }

    pub(crate) fn err(&self, kind: CompileErrorKind, message: String) -> CompilerError {
        CompilerError::new(kind, message)
    }

    /// Checks the heap holds exactly the inputs and that each matches its schema.
    fn emit_prologue(&mut self, inputs: &[Input]) -> Vec<Op> {
        let mut ops = vec![Op::AssertHeapLen(inputs.len() as u64)];
        for input in inputs {
            let slot = self.resolver.add(&input.name);
            ops.push(Op::EnforceSchemaInstanceOnHeap {
                schema: input.schema.clone(),
                heap_pos: slot as u64,
            });
            ops.push(Op::skip(1));
            ops.push(Op::RaiseError("invalid input".to_string()));
        }
        ops
    }

    pub(crate) fn emit_roots(&mut self, roots: &[RootNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = Vec::new();
        for root in roots {
            ops.extend(self.emit_root(root)?);
        }
        Ok(ops)
    }

    pub(crate) fn emit_values(&mut self, values: &[ValueNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = Vec::new();
        for v in values {
            ops.extend(self.emit_value(v)?);
        }
        Ok(ops)
    }

    /// `[]` followed by each value pushed onto it.
    pub(crate) fn emit_array_of(&mut self, values: &[ValueNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = vec![Op::instantiate(json!([]))];
        for v in values {
            ops.extend(self.emit_value(v)?);
            ops.push(Op::ArrayPush);
        }
        Ok(ops)
    }

    /// Compiles `roots` in a fresh scope and drops whatever it declared.
    fn emit_scoped(&mut self, roots: &[RootNode]) -> Result<Vec<Op>, CompilerError> {
        self.resolver.push();
        let body = self.emit_roots(roots);
        let freed = self.resolver.pop();
        let mut ops = body?;
        if freed > 0 {
            ops.push(Op::TruncateHeap(freed as u64));
        }
        Ok(ops)
    }

    pub(crate) fn emit_root(&mut self, root: &RootNode) -> Result<Vec<Op>, CompilerError> {
        let mut ops = Vec::new();
        match root {
            RootNode::Return { value: Some(value) } => {
                ops.extend(self.emit_value(value)?);
                ops.push(Op::ReturnStackTop);
            }
            RootNode::Return { value: None } => ops.push(Op::ReturnVoid),
            RootNode::Save { name, value } => {
                ops.extend(self.emit_value(value)?);
                self.resolver.add(name);
                ops.push(Op::MoveStackTopToHeap);
            }
            RootNode::Update {
                root,
                level,
                operation,
            } => ops.extend(self.emit_update(root, level, operation)?),
            RootNode::If { conditionally } => ops.extend(self.emit_if(conditionally)?),
            RootNode::ArrayForEach { target, arg, body } => {
                ops.extend(self.emit_for_each(target, arg, body)?)
            }
            RootNode::Call {
                function_name,
                args,
            } => {
                ops.extend(self.emit_call(function_name, args)?);
                ops.push(Op::PopStack);
            }
            RootNode::Noop => ops.push(Op::Noop),
            RootNode::SetKeyOnObject { .. }
            | RootNode::DeleteKeyOnObject { .. }
            | RootNode::PushAtKeyOnObject { .. } => ops.extend(self.emit_store_write(root)?),
        }
        Ok(ops)
    }

    fn emit_update(
        &mut self,
        root: &UpdateTarget,
        level: &[ValueNode],
        operation: &Operation,
    ) -> Result<Vec<Op>, CompilerError> {
        let name = match root {
            UpdateTarget::Saved { arg } => arg,
            UpdateTarget::GlobalObject { name } => {
                return Err(self.err(
                    CompileErrorKind::AbstractNode,
                    format!("update of global object `{name}` was not lowered"),
                ));
            }
        };
        let index = self.resolver.get(name)? as u64;
        let field_depth = level.len() as u64;
        let mut ops = Vec::new();
        match operation {
            Operation::Edit(Edit::Push { values }) if level.is_empty() => {
                for v in values {
                    ops.extend(self.emit_value(v)?);
                    ops.push(Op::MoveStackToHeapArray(index));
                }
            }
            Operation::Edit(Edit::Push { values }) => {
                ops.extend(self.emit_values(level)?);
                ops.extend(self.emit_array_of(values)?);
                ops.push(Op::PushSavedField { field_depth, index });
            }
            Operation::Edit(Edit::DeleteField) => {
                require_deletable_field(name, level)?;
                ops.extend(self.emit_values(level)?);
                ops.push(Op::DeleteSavedField { field_depth, index });
            }
            Operation::Set(value) if level.is_empty() => {
                ops.extend(self.emit_value(value)?);
                ops.push(Op::OverwriteHeap(index));
            }
            Operation::Set(value) => {
                ops.extend(self.emit_values(level)?);
                ops.extend(self.emit_value(value)?);
                ops.push(Op::SetSavedField { field_depth, index });
            }
        }
        Ok(ops)
    }

    /// Each arm tests its condition, runs its body in its own scope and jumps to
    /// the `Finally`. A false condition skips the arm entirely.
    fn emit_if(&mut self, branches: &[Branch]) -> Result<Vec<Op>, CompilerError> {
        let shape = normalize_branches(branches)?;
        let mut arms = Vec::new();
        let mut jumps = Vec::new();
        for arm in &shape.arms {
            let mut body = self.emit_scoped(arm.body())?;
            match arm {
                Branch::Conditional { cond, .. } => {
                    arms.extend(self.emit_value(cond)?);
                    arms.push(Op::NegatePrev);
                    arms.push(Op::skip(body.len() + 1));
                }
                Branch::Else { .. } | Branch::Finally { .. } => {}
            }
            body.push(Op::Noop);
            arms.extend(body);
            jumps.push(arms.len() - 1);
        }
        let len = arms.len();
        for at in jumps {
            arms[at] = Op::jump_forward(len - at - 1);
        }
        match shape.finally {
            Some(body) => arms.extend(self.emit_scoped(body)?),
            None => arms.push(Op::Noop),
        }
        Ok(arms)
    }

    /// Pops elements off the target until it is empty. The row variable lives in
    /// the loop's scope and the scope is truncated at the end of every iteration.
    fn emit_for_each(
        &mut self,
        target: &ValueNode,
        arg: &str,
        body: &[RootNode],
    ) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_value(target)?;

        self.resolver.push();
        self.resolver.add(arg);
        let inner = self.emit_roots(body);
        let freed = self.resolver.pop();

        let mut iteration = vec![Op::PopArray, Op::MoveStackTopToHeap];
        iteration.extend(inner?);
        iteration.push(Op::TruncateHeap(freed as u64));
        // Back to `ndArrayLen`: past the iteration and the 3 ops ahead of the skip.
        iteration.push(Op::jump_back(iteration.len() + 1 + 3));

        ops.extend([
            Op::NdArrayLen,
            Op::instantiate(0),
            Op::Equal,
            Op::skip(iteration.len()),
        ]);
        ops.extend(iteration);
        ops.push(Op::PopStack);
        Ok(ops)
    }

    fn emit_call(&mut self, name: &str, args: &[ValueNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_values(args)?;
        ops.push(Op::Invoke {
            name: name.to_string(),
            args: args.len() as u64,
        });
        Ok(ops)
    }

    fn emit_field(&mut self, field: &Field) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_value(&field.key)?;
        ops.extend(self.emit_value(&field.value)?);
        ops.push(Op::set_field(1));
        Ok(ops)
    }

    fn emit_binary(
        &mut self,
        left: &ValueNode,
        right: &ValueNode,
        tail: Vec<Op>,
    ) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_value(left)?;
        ops.extend(self.emit_value(right)?);
        ops.extend(tail);
        Ok(ops)
    }

    fn emit_unary(&mut self, value: &ValueNode, tail: Op) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_value(value)?;
        ops.push(tail);
        Ok(ops)
    }

    pub(crate) fn emit_value(&mut self, value: &ValueNode) -> Result<Vec<Op>, CompilerError> {
        Ok(match value {
            ValueNode::Bool { value } => vec![Op::instantiate(*value)],
            ValueNode::Int { value } => vec![Op::instantiate(*value)],
            ValueNode::Double { value } => vec![Op::instantiate(*value)],
            ValueNode::String { value } => vec![Op::instantiate(value.as_str())],
            ValueNode::None => vec![Op::instantiate(serde_json::Value::Null)],
            ValueNode::Object { fields } => {
                let mut ops = vec![Op::instantiate(json!({}))];
                for field in fields {
                    ops.extend(self.emit_field(field)?);
                }
                ops
            }
            ValueNode::Comparison { sign, left, right } => {
                self.emit_binary(left, right, comparison_ops(*sign))?
            }
            ValueNode::Math { sign, left, right } => {
                let op = match sign {
                    MathSign::Plus => Op::Plus,
                    MathSign::Minus => Op::NMinus,
                    MathSign::Mult => Op::NMult,
                    MathSign::Div => Op::NDivide,
                };
                self.emit_binary(left, right, vec![op])?
            }
            ValueNode::BoolAlg { sign, left, right } => {
                let op = match sign {
                    BoolAlgSign::And => Op::BoolAnd,
                    BoolAlgSign::Or => Op::BoolOr,
                };
                self.emit_binary(left, right, vec![op])?
            }
            ValueNode::Not { value } => self.emit_unary(value, Op::NegatePrev)?,
            ValueNode::GetType { value } => self.emit_unary(value, Op::GetType)?,
            ValueNode::Is { value, ty } => self.emit_unary(
                value,
                Op::StackTopMatches {
                    schema: ty.clone(),
                },
            )?,
            ValueNode::Saved { arg } => vec![Op::CopyFromHeap(self.resolver.get(arg)? as u64)],
            ValueNode::Selection { root, level } => {
                let mut ops = self.emit_value(root)?;
                if !level.is_empty() {
                    ops.extend(self.emit_values(level)?);
                    ops.push(Op::get_field(level.len()));
                }
                ops
            }
            ValueNode::FieldExists { value, field } => {
                self.emit_binary(value, field, vec![Op::FieldExists])?
            }
            ValueNode::Keys { from } => self.emit_unary(from, Op::GetKeys)?,
            ValueNode::ArrayLiteral { values } => self.emit_array_of(values)?,
            ValueNode::Call {
                function_name,
                args,
            } => self.emit_call(function_name, args)?,
            ValueNode::RoleInstance { role, state } => {
                let Some(name) = role.role_name() else {
                    return Err(self.err(
                        CompileErrorKind::InvalidSchema,
                        format!("role instance needs a Role schema, got {}", role.0),
                    ));
                };
                let mut ops = vec![Op::instantiate(json!({ "_name": name }))];
                if let Some(state) = state {
                    ops.push(Op::instantiate("_state"));
                    ops.extend(self.emit_value(state)?);
                    ops.push(Op::set_field(1));
                }
                ops.push(Op::SignRole);
                ops
            }
            ValueNode::GlobalObject { name } => {
                return Err(self.err(
                    CompileErrorKind::AbstractNode,
                    format!("global object `{name}` was not lowered"),
                ));
            }
            ValueNode::GetWholeObject { .. }
            | ValueNode::GetKeyFromObject { .. }
            | ValueNode::KeyExists { .. }
            | ValueNode::GetKeysOnly { .. } => self.emit_store_read(value)?,
        })
    }
}

fn comparison_ops(sign: ComparisonSign) -> Vec<Op> {
    match sign {
        ComparisonSign::Eq => vec![Op::Equal],
        ComparisonSign::Neq => vec![Op::Equal, Op::NegatePrev],
        ComparisonSign::Lt => vec![Op::Less],
        ComparisonSign::Gt => vec![Op::Lesseq, Op::NegatePrev],
        ComparisonSign::Geq => vec![Op::Less, Op::NegatePrev],
        ComparisonSign::Leq => vec![Op::Lesseq],
    }
}
