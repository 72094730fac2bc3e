//! Abstract interpretation of a lowered function into global-object actions.
//!
//! The summarizer walks a function once, in evaluation order, and records every
//! store read and write. A write depends on the globals its value (and keys) were
//! computed from, directly or through local variables, and on every global that
//! decided whether execution reached it.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::compile::{CompileErrorKind, CompilerError};
use crate::emit::normalize_branches;
use crate::ir::{Branch, Edit, Operation, RootNode, UpdateTarget, ValueNode};
use crate::lower::{require_deletable_field, require_store_key};
use crate::program::FunctionDescription;
use crate::scope::VarResolver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    Get {
        global: String,
    },
    Mutate {
        global: String,
        depends_on: BTreeSet<String>,
    },
}

type Taint = BTreeSet<String>;

struct Summarizer {
    resolver: VarResolver,
    /// Globals reaching each open expression group, innermost last.
    groups: Vec<Taint>,
    slot_taints: BTreeMap<usize, Taint>,
    /// Globals that influenced whether the current code runs.
    path_taint: Taint,
    actions: Vec<Action>,
}

pub fn summarize_function(f: &FunctionDescription) -> Result<Vec<Action>, CompilerError> {
    let mut s = Summarizer::new();
    for input in &f.input {
        s.resolver.add(&input.name);
    }
    for root in &f.computation {
        s.visit_root(root)?;
    }
    Ok(s.actions)
}

impl Summarizer {
    fn new() -> Self {
        Self {
            resolver: VarResolver::new(),
            groups: vec![Taint::new()],
            slot_taints: BTreeMap::new(),
            path_taint: Taint::new(),
            actions: Vec::new(),
        }
    }

    fn slot_taint(&mut self, slot: usize) -> &mut Taint {
        self.slot_taints.entry(slot).or_default()
    }

    fn taint_group(&mut self, globals: impl IntoIterator<Item = String>) {
        if let Some(group) = self.groups.last_mut() {
            group.extend(globals);
        }
    }

    /// Runs `f` in a fresh group and returns what reached it.
    fn in_group(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), CompilerError>,
    ) -> Result<Taint, CompilerError> {
        self.groups.push(Taint::new());
        let result = f(self);
        let taint = self.groups.pop().unwrap_or_default();
        result.map(|()| taint)
    }

    fn values_taint(&mut self, values: &[&ValueNode]) -> Result<Taint, CompilerError> {
        self.in_group(|s| values.iter().try_for_each(|v| s.visit_value(v)))
    }

    fn read(&mut self, global: &str, keys: &[&ValueNode]) -> Result<(), CompilerError> {
        let mut taint = self.values_taint(keys)?;
        self.actions.push(Action::Get {
            global: global.to_string(),
        });
        taint.insert(global.to_string());
        self.taint_group(taint);
        Ok(())
    }

    fn write(&mut self, global: &str, inputs: &[&ValueNode]) -> Result<(), CompilerError> {
        let taint = self.values_taint(inputs)?;
        let depends_on = taint.union(&self.path_taint).cloned().collect();
        self.actions.push(Action::Mutate {
            global: global.to_string(),
            depends_on,
        });
        Ok(())
    }

    /// Globals that decide the rest of the current branch or loop.
    fn guard(&mut self, value: &ValueNode) -> Result<Taint, CompilerError> {
        let taint = self.values_taint(&[value])?;
        self.path_taint.extend(taint.iter().cloned());
        Ok(taint)
    }

    fn close_scope(&mut self) {
        let freed = self.resolver.pop();
        let first = self.resolver.next_slot();
        for slot in first..first + freed {
            self.slot_taints.remove(&slot);
        }
    }

    fn visit_scoped(&mut self, body: &[RootNode]) -> Result<(), CompilerError> {
        self.resolver.push();
        let result = body.iter().try_for_each(|r| self.visit_root(r));
        self.close_scope();
        result
    }

    fn visit_value(&mut self, value: &ValueNode) -> Result<(), CompilerError> {
        match value {
            ValueNode::Bool { .. }
            | ValueNode::Int { .. }
            | ValueNode::Double { .. }
            | ValueNode::String { .. }
            | ValueNode::None => Ok(()),
            ValueNode::Object { .. }
            | ValueNode::Comparison { .. }
            | ValueNode::Math { .. }
            | ValueNode::BoolAlg { .. }
            | ValueNode::Not { .. }
            | ValueNode::GetType { .. }
            | ValueNode::Is { .. }
            | ValueNode::Selection { .. }
            | ValueNode::FieldExists { .. }
            | ValueNode::Keys { .. }
            | ValueNode::ArrayLiteral { .. }
            | ValueNode::Call { .. }
            | ValueNode::RoleInstance { .. } => value
                .children()
                .into_iter()
                .try_for_each(|child| self.visit_value(child)),
            ValueNode::Saved { arg } => {
                let slot = self.resolver.get(arg)?;
                let taint = self.slot_taint(slot).clone();
                self.taint_group(taint);
                Ok(())
            }
            ValueNode::GlobalObject { name } => Err(CompilerError::new(
                CompileErrorKind::AbstractNode,
                format!("global object `{name}` was not lowered"),
            )),
            ValueNode::GetWholeObject { name } => self.read(name, &[]),
            ValueNode::GetKeyFromObject { obj, key } => {
                self.read(obj, &key.iter().collect::<Vec<_>>())
            }
            ValueNode::KeyExists { obj, key } => self.read(obj, &[key.as_ref()]),
            ValueNode::GetKeysOnly { obj } => self.read(obj, &[]),
        }
    }

    fn visit_root(&mut self, root: &RootNode) -> Result<(), CompilerError> {
        match root {
            RootNode::Return { value } => {
                if let Some(value) = value {
                    self.values_taint(&[value])?;
                }
                Ok(())
            }
            RootNode::Save { name, value } => {
                let taint = self.values_taint(&[value])?;
                let slot = self.resolver.add(name);
                *self.slot_taint(slot) = taint;
                Ok(())
            }
            RootNode::Update {
                root,
                level,
                operation,
            } => self.visit_update(root, level, operation),
            RootNode::If { conditionally } => self.visit_if(conditionally),
            RootNode::ArrayForEach { target, arg, body } => {
                let taint = self.guard(target)?;
                self.resolver.push();
                let row = self.resolver.add(arg);
                *self.slot_taint(row) = taint;
                let result = body.iter().try_for_each(|r| self.visit_root(r));
                self.close_scope();
                result
            }
            RootNode::Call { args, .. } => {
                self.values_taint(&args.iter().collect::<Vec<_>>())?;
                Ok(())
            }
            RootNode::Noop => Ok(()),
            RootNode::SetKeyOnObject { obj, key, value } => {
                require_store_key(obj, key)?;
                let mut inputs: Vec<&ValueNode> = key.iter().collect();
                inputs.push(value);
                self.write(obj, &inputs)
            }
            RootNode::DeleteKeyOnObject { obj, key } => {
                require_store_key(obj, key)?;
                self.write(obj, &key.iter().collect::<Vec<_>>())
            }
            RootNode::PushAtKeyOnObject { obj, key, values } => {
                require_store_key(obj, key)?;
                let inputs: Vec<&ValueNode> = key.iter().chain(values.iter()).collect();
                self.write(obj, &inputs)
            }
        }
    }

    fn visit_update(
        &mut self,
        root: &UpdateTarget,
        level: &[ValueNode],
        operation: &Operation,
    ) -> Result<(), CompilerError> {
        let arg = match root {
            UpdateTarget::Saved { arg } => arg,
            UpdateTarget::GlobalObject { name } => {
                return Err(CompilerError::new(
                    CompileErrorKind::AbstractNode,
                    format!("update of global object `{name}` was not lowered"),
                ));
            }
        };
        let slot = self.resolver.get(arg)?;
        let mut inputs: Vec<&ValueNode> = level.iter().collect();
        let partial = match operation {
            Operation::Edit(Edit::Push { values }) => {
                inputs.extend(values.iter());
                true
            }
            Operation::Edit(Edit::DeleteField) => {
                require_deletable_field(arg, level)?;
                true
            }
            Operation::Set(value) => {
                inputs.push(value);
                !level.is_empty()
            }
        };
        let taint = self.values_taint(&inputs)?;
        let slot_taint = self.slot_taint(slot);
        if partial {
            slot_taint.extend(taint);
        } else {
            *slot_taint = taint;
        }
        Ok(())
    }

    fn visit_if(&mut self, branches: &[Branch]) -> Result<(), CompilerError> {
        let shape = normalize_branches(branches)?;
        for arm in shape.arms {
            if let Branch::Conditional { cond, .. } = arm {
                self.guard(cond)?;
            }
            self.visit_scoped(arm.body())?;
        }
        if let Some(body) = shape.finally {
            self.visit_scoped(body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::MathSign;

    fn s(value: &str) -> ValueNode {
        ValueNode::String {
            value: value.to_string(),
        }
    }

    fn saved(arg: &str) -> ValueNode {
        ValueNode::Saved {
            arg: arg.to_string(),
        }
    }

    fn get_key(obj: &str, key: &str) -> ValueNode {
        ValueNode::GetKeyFromObject {
            obj: obj.to_string(),
            key: vec![s(key)],
        }
    }

    fn set_key(obj: &str, value: ValueNode) -> RootNode {
        RootNode::SetKeyOnObject {
            obj: obj.to_string(),
            key: vec![s("k")],
            value,
        }
    }

    fn deps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn summarize(computation: Vec<RootNode>) -> Vec<Action> {
        summarize_function(&FunctionDescription::new(Vec::new(), computation)).expect("summarize")
    }

    #[test]
    fn increment_depends_on_itself() {
        let actions = summarize(vec![set_key(
            "g",
            ValueNode::Math {
                sign: MathSign::Plus,
                left: Box::new(get_key("g", "k")),
                right: Box::new(ValueNode::Int { value: 1 }),
            },
        )]);
        assert_eq!(
            actions,
            vec![
                Action::Get {
                    global: "g".to_string()
                },
                Action::Mutate {
                    global: "g".to_string(),
                    depends_on: deps(&["g"]),
                },
            ]
        );
    }

    #[test]
    fn every_store_read_taints_its_group() {
        let reads = vec![
            ValueNode::GetWholeObject {
                name: "a".to_string(),
            },
            ValueNode::GetKeysOnly {
                obj: "b".to_string(),
            },
            ValueNode::KeyExists {
                obj: "c".to_string(),
                key: Box::new(s("k")),
            },
        ];
        let actions = summarize(vec![set_key(
            "out",
            ValueNode::ArrayLiteral { values: reads },
        )]);
        assert_eq!(
            actions.last(),
            Some(&Action::Mutate {
                global: "out".to_string(),
                depends_on: deps(&["a", "b", "c"]),
            })
        );
    }

    #[test]
    fn overwrite_sheds_taint_but_partial_update_keeps_it() {
        let overwrite = summarize(vec![
            RootNode::Save {
                name: "x".to_string(),
                value: get_key("a", "k"),
            },
            RootNode::Update {
                root: UpdateTarget::Saved {
                    arg: "x".to_string(),
                },
                level: Vec::new(),
                operation: Operation::Set(ValueNode::Int { value: 0 }),
            },
            set_key("out", saved("x")),
        ]);
        assert_eq!(
            overwrite.last(),
            Some(&Action::Mutate {
                global: "out".to_string(),
                depends_on: BTreeSet::new(),
            })
        );

        let partial = summarize(vec![
            RootNode::Save {
                name: "x".to_string(),
                value: get_key("a", "k"),
            },
            RootNode::Update {
                root: UpdateTarget::Saved {
                    arg: "x".to_string(),
                },
                level: vec![s("f")],
                operation: Operation::Set(get_key("b", "k")),
            },
            set_key("out", saved("x")),
        ]);
        assert_eq!(
            partial.last(),
            Some(&Action::Mutate {
                global: "out".to_string(),
                depends_on: deps(&["a", "b"]),
            })
        );
    }

    #[test]
    fn conditions_taint_writes_in_their_branch_once() {
        let actions = summarize(vec![RootNode::If {
            conditionally: vec![Branch::Conditional {
                cond: ValueNode::KeyExists {
                    obj: "flags".to_string(),
                    key: Box::new(s("on")),
                },
                body: vec![set_key("out", ValueNode::Int { value: 1 })],
            }],
        }]);
        assert_eq!(
            actions,
            vec![
                Action::Get {
                    global: "flags".to_string()
                },
                Action::Mutate {
                    global: "out".to_string(),
                    depends_on: deps(&["flags"]),
                },
            ]
        );
    }

    #[test]
    fn branch_locals_do_not_leak() {
        let err = summarize_function(&FunctionDescription::new(
            Vec::new(),
            vec![
                RootNode::If {
                    conditionally: vec![Branch::Conditional {
                        cond: ValueNode::Bool { value: true },
                        body: vec![RootNode::Save {
                            name: "tmp".to_string(),
                            value: ValueNode::Int { value: 1 },
                        }],
                    }],
                },
                set_key("out", saved("tmp")),
            ],
        ))
        .expect_err("tmp is out of scope");
        assert_eq!(err.kind, CompileErrorKind::UnknownVariable);
    }

    #[test]
    fn serializes_actions_by_kind() {
        let v = serde_json::to_value(Action::Mutate {
            global: "g".to_string(),
            depends_on: deps(&["h"]),
        })
        .expect("serialize action");
        assert_eq!(
            v,
            serde_json::json!({"kind": "mutate", "global": "g", "depends_on": ["h"]})
        );
    }

    #[test]
    fn unlowered_globals_fail_analysis() {
        let g = || ValueNode::GlobalObject {
            name: "g".to_string(),
        };
        let bodies = vec![
            vec![set_key("out", g())],
            vec![RootNode::Call {
                function_name: "log".to_string(),
                args: vec![g()],
            }],
            vec![RootNode::Update {
                root: UpdateTarget::GlobalObject {
                    name: "g".to_string(),
                },
                level: vec![s("k")],
                operation: Operation::Set(ValueNode::Int { value: 1 }),
            }],
        ];
        for body in bodies {
            let err = summarize_function(&FunctionDescription::new(Vec::new(), body))
                .expect_err("unlowered");
            assert_eq!(err.kind, CompileErrorKind::AbstractNode, "{}", err.message);
        }
    }

    #[test]
    fn unaddressable_writes_fail_analysis() {
        let err = summarize_function(&FunctionDescription::new(
            Vec::new(),
            vec![RootNode::SetKeyOnObject {
                obj: "g".to_string(),
                key: Vec::new(),
                value: ValueNode::Int { value: 1 },
            }],
        ))
        .expect_err("store write without a key");
        assert_eq!(err.kind, CompileErrorKind::NotAddressable);

        let err = summarize_function(&FunctionDescription::new(
            Vec::new(),
            vec![
                RootNode::Save {
                    name: "x".to_string(),
                    value: ValueNode::Int { value: 1 },
                },
                RootNode::Update {
                    root: UpdateTarget::Saved {
                        arg: "x".to_string(),
                    },
                    level: Vec::new(),
                    operation: Operation::Edit(Edit::DeleteField),
                },
            ],
        ))
        .expect_err("whole variable delete");
        assert_eq!(err.kind, CompileErrorKind::NotAddressable);
    }
}
