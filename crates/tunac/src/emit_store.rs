//! Document-store code generation.
//!
//! A global object is a collection of `{_key, _val}` documents. The first key of
//! an access selects the document; deeper keys address into `_val` through a
//! dotted path (`_val.a.b`).

use serde_json::json;

use crate::compile::{CompileErrorKind, CompilerError};
use crate::emit::Emitter;
use crate::ir::{RootNode, ValueNode};
use crate::lower::require_store_key;
use crate::ops::Op;

const MISSING_KEY: &str = "Key does not exist on global";
const MISSING_NESTED_KEY: &str = "Nested key does not exist";

impl Emitter {
    /// `{_key: <first>}`, the filter selecting one document.
    fn emit_key_filter(&mut self, first: &ValueNode) -> Result<Vec<Op>, CompilerError> {
        let mut ops = vec![
            Op::instantiate(json!({ "_key": {} })),
            Op::instantiate("_key"),
        ];
        ops.extend(self.emit_value(first)?);
        ops.push(Op::set_field(1));
        Ok(ops)
    }

    /// `"_val." + rest.join(".")` left on the stack.
    fn emit_nested_path(&mut self, rest: &[ValueNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = vec![Op::instantiate("_val")];
        ops.extend(self.emit_values(rest)?);
        ops.push(Op::StringConcat {
            n_strings: rest.len() as u64 + 1,
            joiner: ".".to_string(),
        });
        Ok(ops)
    }

    /// `{$each: [values...]}`.
    fn emit_each_doc(&mut self, values: &[ValueNode]) -> Result<Vec<Op>, CompilerError> {
        let mut ops = vec![Op::instantiate(json!({})), Op::instantiate("$each")];
        ops.extend(self.emit_array_of(values)?);
        ops.push(Op::set_field(1));
        Ok(ops)
    }

    /// Runs the update, failing when a nested write found no document.
    fn emit_update_one(
        &mut self,
        obj: &str,
        first: &ValueNode,
        upsert: bool,
    ) -> Result<Vec<Op>, CompilerError> {
        let mut ops = self.emit_key_filter(first)?;
        ops.extend([
            Op::UpdateOne {
                store: obj.to_string(),
                upsert,
            },
            Op::IsLastNone,
            Op::skip(2),
            Op::PopStack,
            Op::jump_forward(1),
            Op::RaiseError(MISSING_NESTED_KEY.to_string()),
        ]);
        Ok(ops)
    }

    pub(crate) fn emit_store_read(&mut self, node: &ValueNode) -> Result<Vec<Op>, CompilerError> {
        match node {
            ValueNode::GetWholeObject { name } => Ok(vec![
                Op::GetAllFromStore(name.clone()),
                Op::RepackageCollection,
            ]),
            ValueNode::GetKeyFromObject { obj, key } => {
                let (first, rest) = require_store_key(obj, key)?;
                let mut found = Vec::new();
                let mut missing = Vec::new();
                if !rest.is_empty() {
                    found.extend(self.emit_values(rest)?);
                    found.push(Op::get_field(rest.len()));
                    missing.push(Op::RaiseError(MISSING_KEY.to_string()));
                }
                let mut ops = self.emit_key_filter(first)?;
                ops.extend([
                    Op::FindOneInStore(obj.clone(), json!({})),
                    Op::IsLastNone,
                    Op::skip(1 + found.len() + missing.len()),
                    Op::TryGetField("_val".to_string()),
                ]);
                ops.extend(found);
                ops.push(Op::jump_forward(missing.len() + 1));
                ops.extend(missing);
                ops.push(Op::instantiate(serde_json::Value::Null));
                Ok(ops)
            }
            ValueNode::KeyExists { obj, key } => {
                let mut ops = self.emit_key_filter(key)?;
                ops.extend([
                    Op::FindOneInStore(obj.clone(), json!({ "_val": false })),
                    Op::IsLastNone,
                    Op::skip(3),
                    Op::PopStack,
                    Op::instantiate(true),
                    Op::jump_forward(2),
                    Op::PopStack,
                    Op::instantiate(false),
                ]);
                Ok(ops)
            }
            ValueNode::GetKeysOnly { obj } => {
                let collect = [
                    Op::PopArray,
                    Op::instantiate("_key"),
                    Op::get_field(1),
                    Op::PArrayPush { stack_offset: 1 },
                ];
                let check = [
                    Op::NdArrayLen,
                    Op::instantiate(0),
                    Op::Equal,
                    Op::skip(collect.len() + 1),
                ];
                let back = collect.len() + check.len();
                let mut ops = vec![
                    Op::instantiate(json!([])),
                    Op::instantiate(json!({})),
                    Op::QueryStore(obj.clone(), json!({ "_val": false })),
                ];
                ops.extend(check);
                ops.extend(collect);
                ops.push(Op::jump_back(back));
                ops.push(Op::PopStack);
                Ok(ops)
            }
            other => Err(self.err(
                CompileErrorKind::AbstractNode,
                format!("{} is not a store read", other.kind()),
            )),
        }
    }

    pub(crate) fn emit_store_write(&mut self, node: &RootNode) -> Result<Vec<Op>, CompilerError> {
        match node {
            RootNode::SetKeyOnObject { obj, key, value } => {
                let (first, rest) = require_store_key(obj, key)?;
                let mut ops = if rest.is_empty() {
                    vec![
                        Op::instantiate(json!({ "$set": { "_val": {} } })),
                        Op::instantiate("$set"),
                        Op::instantiate("_val"),
                    ]
                } else {
                    let mut ops = vec![
                        Op::instantiate(json!({ "$set": {} })),
                        Op::instantiate("$set"),
                    ];
                    ops.extend(self.emit_nested_path(rest)?);
                    ops
                };
                ops.extend(self.emit_value(value)?);
                ops.push(Op::set_field(2));
                ops.extend(self.emit_update_one(obj, first, rest.is_empty())?);
                Ok(ops)
            }
            RootNode::PushAtKeyOnObject { obj, key, values } => {
                let (first, rest) = require_store_key(obj, key)?;
                let mut ops = if rest.is_empty() {
                    let mut ops = vec![
                        Op::instantiate(json!({ "$push": { "_val": {} } })),
                        Op::instantiate("$push"),
                        Op::instantiate("_val"),
                        Op::instantiate("$each"),
                    ];
                    ops.extend(self.emit_array_of(values)?);
                    ops.push(Op::set_field(3));
                    ops
                } else {
                    let mut ops = vec![
                        Op::instantiate(json!({ "$push": {} })),
                        Op::instantiate("$push"),
                    ];
                    ops.extend(self.emit_nested_path(rest)?);
                    ops.extend(self.emit_each_doc(values)?);
                    ops.push(Op::set_field(2));
                    ops
                };
                ops.extend(self.emit_update_one(obj, first, rest.is_empty())?);
                Ok(ops)
            }
            RootNode::DeleteKeyOnObject { obj, key } => {
                let (first, rest) = require_store_key(obj, key)?;
                let mut ops = Vec::new();
                if rest.is_empty() {
                    ops.extend(self.emit_key_filter(first)?);
                    ops.push(Op::DeleteOneInStore(obj.clone()));
                } else {
                    ops.extend([
                        Op::instantiate(json!({ "$unset": {} })),
                        Op::instantiate("$unset"),
                    ]);
                    ops.extend(self.emit_nested_path(rest)?);
                    ops.push(Op::instantiate(""));
                    ops.push(Op::set_field(2));
                    ops.extend(self.emit_key_filter(first)?);
                    ops.push(Op::UpdateOne {
                        store: obj.clone(),
                        upsert: false,
                    });
                }
                ops.push(Op::PopStack);
                Ok(ops)
            }
            other => Err(self.err(
                CompileErrorKind::AbstractNode,
                format!("{} is not a store write", other.kind()),
            )),
        }
    }
}
