//! Generic tree rewriting.
//!
//! A [`Rewriter`] overrides the hooks for the kinds whose shape it changes; every
//! other kind is rebuilt by the `walk_*` functions with its children rewritten.
//! The default hooks pass their node through, except the ones that would have to
//! keep an abstract `GlobalObject` alive: those fail, so a rewriter that forgets a
//! position cannot silently leak an abstract reference.

use crate::compile::{CompileErrorKind, CompilerError};
use crate::ir::{Branch, Edit, Field, Operation, RootNode, UpdateTarget, ValueNode};

pub type RewriteResult<T> = Result<T, CompilerError>;

pub fn abstract_global_error(name: &str, context: &str) -> CompilerError {
    CompilerError::new(
        CompileErrorKind::AbstractNode,
        format!("global object `{name}` has no replacement rule {context}"),
    )
}

pub trait Rewriter: Sized {
    fn value(&self, node: ValueNode) -> RewriteResult<ValueNode> {
        walk_value(self, node)
    }

    fn root(&self, node: RootNode) -> RewriteResult<RootNode> {
        walk_root(self, node)
    }

    fn global_object(&self, name: String) -> RewriteResult<ValueNode> {
        Err(abstract_global_error(&name, "as a value"))
    }

    fn selection(&self, root: ValueNode, level: Vec<ValueNode>) -> RewriteResult<ValueNode> {
        Ok(ValueNode::Selection {
            root: Box::new(self.value(root)?),
            level: self.values(level)?,
        })
    }

    fn field_exists(&self, value: ValueNode, field: ValueNode) -> RewriteResult<ValueNode> {
        Ok(ValueNode::FieldExists {
            value: Box::new(self.value(value)?),
            field: Box::new(self.value(field)?),
        })
    }

    fn keys(&self, from: ValueNode) -> RewriteResult<ValueNode> {
        Ok(ValueNode::Keys {
            from: Box::new(self.value(from)?),
        })
    }

    fn array_literal(&self, values: Vec<ValueNode>) -> RewriteResult<ValueNode> {
        Ok(ValueNode::ArrayLiteral {
            values: self.values(values)?,
        })
    }

    fn push_values(&self, values: Vec<ValueNode>) -> RewriteResult<Vec<ValueNode>> {
        self.values(values)
    }

    fn update(
        &self,
        root: UpdateTarget,
        level: Vec<ValueNode>,
        operation: Operation,
    ) -> RewriteResult<RootNode> {
        if let UpdateTarget::GlobalObject { name } = &root {
            return Err(abstract_global_error(name, "as an update target"));
        }
        Ok(RootNode::Update {
            root,
            level: self.values(level)?,
            operation: walk_operation(self, operation)?,
        })
    }

    fn values(&self, nodes: Vec<ValueNode>) -> RewriteResult<Vec<ValueNode>> {
        nodes.into_iter().map(|n| self.value(n)).collect()
    }

    fn roots(&self, nodes: Vec<RootNode>) -> RewriteResult<Vec<RootNode>> {
        nodes.into_iter().map(|n| self.root(n)).collect()
    }
}

fn boxed<R: Rewriter>(r: &R, node: Box<ValueNode>) -> RewriteResult<Box<ValueNode>> {
    Ok(Box::new(r.value(*node)?))
}

pub fn walk_value<R: Rewriter>(r: &R, node: ValueNode) -> RewriteResult<ValueNode> {
    Ok(match node {
        ValueNode::Bool { .. }
        | ValueNode::Int { .. }
        | ValueNode::Double { .. }
        | ValueNode::String { .. }
        | ValueNode::None
        | ValueNode::Saved { .. }
        | ValueNode::GetWholeObject { .. }
        | ValueNode::GetKeysOnly { .. } => node,
        ValueNode::Object { fields } => ValueNode::Object {
            fields: fields
                .into_iter()
                .map(|f| {
                    Ok(Field {
                        key: r.value(f.key)?,
                        value: r.value(f.value)?,
                    })
                })
                .collect::<RewriteResult<Vec<_>>>()?,
        },
        ValueNode::Comparison { sign, left, right } => ValueNode::Comparison {
            sign,
            left: boxed(r, left)?,
            right: boxed(r, right)?,
        },
        ValueNode::Math { sign, left, right } => ValueNode::Math {
            sign,
            left: boxed(r, left)?,
            right: boxed(r, right)?,
        },
        ValueNode::BoolAlg { sign, left, right } => ValueNode::BoolAlg {
            sign,
            left: boxed(r, left)?,
            right: boxed(r, right)?,
        },
        ValueNode::Not { value } => ValueNode::Not {
            value: boxed(r, value)?,
        },
        ValueNode::GetType { value } => ValueNode::GetType {
            value: boxed(r, value)?,
        },
        ValueNode::Is { value, ty } => ValueNode::Is {
            value: boxed(r, value)?,
            ty,
        },
        ValueNode::Selection { root, level } => return r.selection(*root, level),
        ValueNode::FieldExists { value, field } => return r.field_exists(*value, *field),
        ValueNode::Keys { from } => return r.keys(*from),
        ValueNode::ArrayLiteral { values } => return r.array_literal(values),
        ValueNode::Call {
            function_name,
            args,
        } => ValueNode::Call {
            function_name,
            args: r.values(args)?,
        },
        ValueNode::RoleInstance { role, state } => ValueNode::RoleInstance {
            role,
            state: state.map(|s| boxed(r, s)).transpose()?,
        },
        ValueNode::GlobalObject { name } => return r.global_object(name),
        ValueNode::GetKeyFromObject { obj, key } => ValueNode::GetKeyFromObject {
            obj,
            key: r.values(key)?,
        },
        ValueNode::KeyExists { obj, key } => ValueNode::KeyExists {
            obj,
            key: boxed(r, key)?,
        },
    })
}

pub fn walk_operation<R: Rewriter>(r: &R, operation: Operation) -> RewriteResult<Operation> {
    Ok(match operation {
        Operation::Edit(Edit::Push { values }) => Operation::Edit(Edit::Push {
            values: r.push_values(values)?,
        }),
        Operation::Edit(Edit::DeleteField) => Operation::Edit(Edit::DeleteField),
        Operation::Set(value) => Operation::Set(r.value(value)?),
    })
}

pub fn walk_branch<R: Rewriter>(r: &R, branch: Branch) -> RewriteResult<Branch> {
    Ok(match branch {
        Branch::Conditional { cond, body } => Branch::Conditional {
            cond: r.value(cond)?,
            body: r.roots(body)?,
        },
        Branch::Else { body } => Branch::Else {
            body: r.roots(body)?,
        },
        Branch::Finally { body } => Branch::Finally {
            body: r.roots(body)?,
        },
    })
}

pub fn walk_root<R: Rewriter>(r: &R, node: RootNode) -> RewriteResult<RootNode> {
    Ok(match node {
        RootNode::Return { value } => RootNode::Return {
            value: value.map(|v| r.value(v)).transpose()?,
        },
        RootNode::Save { name, value } => RootNode::Save {
            name,
            value: r.value(value)?,
        },
        RootNode::Update {
            root,
            level,
            operation,
        } => return r.update(root, level, operation),
        RootNode::If { conditionally } => RootNode::If {
            conditionally: conditionally
                .into_iter()
                .map(|b| walk_branch(r, b))
                .collect::<RewriteResult<Vec<_>>>()?,
        },
        RootNode::ArrayForEach { target, arg, body } => RootNode::ArrayForEach {
            target: r.value(target)?,
            arg,
            body: r.roots(body)?,
        },
        RootNode::Call {
            function_name,
            args,
        } => RootNode::Call {
            function_name,
            args: r.values(args)?,
        },
        RootNode::Noop => RootNode::Noop,
        RootNode::SetKeyOnObject { obj, key, value } => RootNode::SetKeyOnObject {
            obj,
            key: r.values(key)?,
            value: r.value(value)?,
        },
        RootNode::DeleteKeyOnObject { obj, key } => RootNode::DeleteKeyOnObject {
            obj,
            key: r.values(key)?,
        },
        RootNode::PushAtKeyOnObject { obj, key, values } => RootNode::PushAtKeyOnObject {
            obj,
            key: r.values(key)?,
            values: r.push_values(values)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::MathSign;

    /// Rewrites every integer literal to its double.
    struct DoubleInts;

    impl Rewriter for DoubleInts {
        fn value(&self, node: ValueNode) -> RewriteResult<ValueNode> {
            match node {
                ValueNode::Int { value } => Ok(ValueNode::Int { value: value * 2 }),
                other => walk_value(self, other),
            }
        }
    }

    /// Uses only the default hooks.
    struct Identity;

    impl Rewriter for Identity {}

    fn int(value: i64) -> ValueNode {
        ValueNode::Int { value }
    }

    #[test]
    fn overrides_reach_nested_children() {
        let tree = RootNode::If {
            conditionally: vec![Branch::Conditional {
                cond: ValueNode::Math {
                    sign: MathSign::Plus,
                    left: Box::new(int(1)),
                    right: Box::new(int(2)),
                },
                body: vec![RootNode::Return { value: Some(int(3)) }],
            }],
        };
        let out = DoubleInts.root(tree).expect("rewrite");
        let RootNode::If { conditionally } = out else {
            panic!("expected If");
        };
        let Branch::Conditional { cond, body } = &conditionally[0] else {
            panic!("expected Conditional");
        };
        assert_eq!(
            cond,
            &ValueNode::Math {
                sign: MathSign::Plus,
                left: Box::new(int(2)),
                right: Box::new(int(4)),
            }
        );
        assert_eq!(body, &vec![RootNode::Return { value: Some(int(6)) }]);
    }

    #[test]
    fn default_hooks_pass_concrete_trees_through() {
        let tree = RootNode::SetKeyOnObject {
            obj: "g".to_string(),
            key: vec![ValueNode::String {
                value: "k".to_string(),
            }],
            value: ValueNode::GetKeyFromObject {
                obj: "g".to_string(),
                key: vec![ValueNode::Saved {
                    arg: "x".to_string(),
                }],
            },
        };
        assert_eq!(Identity.root(tree.clone()).expect("rewrite"), tree);
    }

    #[test]
    fn default_hooks_reject_abstract_globals() {
        let tree = RootNode::Save {
            name: "x".to_string(),
            value: ValueNode::GlobalObject {
                name: "g".to_string(),
            },
        };
        let err = Identity.root(tree).expect_err("abstract must not survive");
        assert_eq!(err.kind, CompileErrorKind::AbstractNode);

        let update = RootNode::Update {
            root: UpdateTarget::GlobalObject {
                name: "g".to_string(),
            },
            level: Vec::new(),
            operation: Operation::Set(int(1)),
        };
        let err = Identity.root(update).expect_err("abstract must not survive");
        assert!(err.message.contains("update target"), "{}", err.message);
    }
}
