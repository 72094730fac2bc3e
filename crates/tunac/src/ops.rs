//! Instruction catalogue of the stack-and-heap VM.
//!
//! Serialized as `{"kind": <op>, "data": <payload>}` with the VM's opcode names.
//!
//! Cursor model: every op advances the cursor by one after it runs.
//! `conditonallySkipXops(n)` pops a bool and, when true, also skips the next `n` ops.
//! `offsetOpCursor {offset, fwd: true}` skips the next `offset` ops;
//! with `fwd: false` execution resumes `offset` ops before the jump itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ir::Schema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum Op {
    // Stack.
    Instantiate(Value),
    PopStack,
    PopArray,
    ArrayPush,
    PArrayPush {
        stack_offset: u64,
    },
    NdArrayLen,

    // Heap.
    MoveStackTopToHeap,
    MoveStackToHeapArray(u64),
    CopyFromHeap(u64),
    OverwriteHeap(u64),
    TruncateHeap(u64),
    AssertHeapLen(u64),
    EnforceSchemaInstanceOnHeap {
        schema: Schema,
        heap_pos: u64,
    },

    // Fields.
    GetField {
        field_depth: u64,
    },
    SetField {
        field_depth: u64,
    },
    SetSavedField {
        field_depth: u64,
        index: u64,
    },
    DeleteSavedField {
        field_depth: u64,
        index: u64,
    },
    PushSavedField {
        field_depth: u64,
        index: u64,
    },
    FieldExists,
    TryGetField(String),
    GetKeys,
    StringConcat {
        #[serde(rename = "nStrings")]
        n_strings: u64,
        joiner: String,
    },

    // Logic and arithmetic.
    Equal,
    Less,
    Lesseq,
    BoolAnd,
    BoolOr,
    NegatePrev,
    Plus,
    NMinus,
    NMult,
    NDivide,
    GetType,
    StackTopMatches {
        schema: String,
    },
    IsLastNone,

    // Control.
    OffsetOpCursor {
        offset: u64,
        fwd: bool,
    },
    #[serde(rename = "conditonallySkipXops")]
    ConditionallySkipXops(u64),
    Noop,
    ReturnStackTop,
    ReturnVoid,
    RaiseError(String),
    Invoke {
        name: String,
        args: u64,
    },

    SignRole,

    // Document store.
    GetAllFromStore(String),
    RepackageCollection,
    FindOneInStore(String, Value),
    QueryStore(String, Value),
    UpdateOne {
        store: String,
        upsert: bool,
    },
    DeleteOneInStore(String),
}

impl Op {
    pub fn instantiate(value: impl Into<Value>) -> Op {
        Op::Instantiate(value.into())
    }

    pub fn skip(count: usize) -> Op {
        Op::ConditionallySkipXops(count as u64)
    }

    pub fn jump_forward(offset: usize) -> Op {
        Op::OffsetOpCursor {
            offset: offset as u64,
            fwd: true,
        }
    }

    pub fn jump_back(offset: usize) -> Op {
        Op::OffsetOpCursor {
            offset: offset as u64,
            fwd: false,
        }
    }

    pub fn get_field(depth: usize) -> Op {
        Op::GetField {
            field_depth: depth as u64,
        }
    }

    pub fn set_field(depth: usize) -> Op {
        Op::SetField {
            field_depth: depth as u64,
        }
    }
}
