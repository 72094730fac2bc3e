//! The node set shared by every stage of the back end.
//!
//! Value nodes produce a value when evaluated; root nodes only have effects. The two
//! are separate enums so a statement can never appear where a value is expected.
//! Kinds that only make sense as a field of their parent (`Conditional`, `Else`,
//! `Finally`, `Field`, `Push`, `DeleteField`) get their own types for the same reason.
//!
//! One enum carries both the abstract `GlobalObject` reference and the concrete
//! store kinds that replace it. Lowering removes every `GlobalObject`; see
//! [`crate::lower`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonSign {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Leq,
    #[serde(rename = ">=")]
    Geq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathSign {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    #[serde(rename = "*")]
    Mult,
    #[serde(rename = "/")]
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolAlgSign {
    And,
    Or,
}

/// A declared schema, carried opaquely to the VM which enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(pub serde_json::Value);

impl Schema {
    /// Name of a `Role` schema (`{"kind": "Role", "data": [name, [...]]}`).
    pub fn role_name(&self) -> Option<&str> {
        if self.0.get("kind")?.as_str()? != "Role" {
            return None;
        }
        self.0.get("data")?.get(0)?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub struct Field {
    pub key: ValueNode,
    pub value: ValueNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ValueNode {
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Double {
        value: f64,
    },
    String {
        value: String,
    },
    None,
    Object {
        fields: Vec<Field>,
    },
    Comparison {
        sign: ComparisonSign,
        left: Box<ValueNode>,
        right: Box<ValueNode>,
    },
    Math {
        sign: MathSign,
        left: Box<ValueNode>,
        right: Box<ValueNode>,
    },
    BoolAlg {
        sign: BoolAlgSign,
        left: Box<ValueNode>,
        right: Box<ValueNode>,
    },
    Not {
        value: Box<ValueNode>,
    },
    GetType {
        value: Box<ValueNode>,
    },
    Is {
        value: Box<ValueNode>,
        #[serde(rename = "type")]
        ty: String,
    },
    Saved {
        arg: String,
    },
    Selection {
        root: Box<ValueNode>,
        #[serde(default)]
        level: Vec<ValueNode>,
    },
    FieldExists {
        value: Box<ValueNode>,
        field: Box<ValueNode>,
    },
    Keys {
        from: Box<ValueNode>,
    },
    ArrayLiteral {
        values: Vec<ValueNode>,
    },
    Call {
        function_name: String,
        #[serde(default)]
        args: Vec<ValueNode>,
    },
    RoleInstance {
        role: Schema,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Box<ValueNode>>,
    },
    /// Abstract reference to a named global object.
    GlobalObject {
        name: String,
    },
    GetWholeObject {
        name: String,
    },
    GetKeyFromObject {
        obj: String,
        key: Vec<ValueNode>,
    },
    KeyExists {
        obj: String,
        key: Box<ValueNode>,
    },
    GetKeysOnly {
        obj: String,
    },
}

/// What an `Update` writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum UpdateTarget {
    Saved { arg: String },
    GlobalObject { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Edit {
    Push { values: Vec<ValueNode> },
    DeleteField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Edit(Edit),
    Set(ValueNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Branch {
    Conditional {
        cond: ValueNode,
        #[serde(rename = "do")]
        body: Vec<RootNode>,
    },
    Else {
        #[serde(rename = "do")]
        body: Vec<RootNode>,
    },
    Finally {
        #[serde(rename = "do")]
        body: Vec<RootNode>,
    },
}

impl Branch {
    pub fn body(&self) -> &[RootNode] {
        match self {
            Branch::Conditional { body, .. } | Branch::Else { body } | Branch::Finally { body } => {
                body
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RootNode {
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ValueNode>,
    },
    Save {
        name: String,
        value: ValueNode,
    },
    Update {
        root: UpdateTarget,
        #[serde(default)]
        level: Vec<ValueNode>,
        operation: Operation,
    },
    If {
        conditionally: Vec<Branch>,
    },
    ArrayForEach {
        target: ValueNode,
        arg: String,
        #[serde(rename = "do")]
        body: Vec<RootNode>,
    },
    Call {
        function_name: String,
        #[serde(default)]
        args: Vec<ValueNode>,
    },
    Noop,
    SetKeyOnObject {
        obj: String,
        key: Vec<ValueNode>,
        value: ValueNode,
    },
    DeleteKeyOnObject {
        obj: String,
        key: Vec<ValueNode>,
    },
    PushAtKeyOnObject {
        obj: String,
        key: Vec<ValueNode>,
        values: Vec<ValueNode>,
    },
}

/// The closed catalogue of node kinds, used for diagnostics and structural checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Bool,
    Int,
    Double,
    String,
    None,
    Object,
    Field,
    Comparison,
    Math,
    BoolAlg,
    Not,
    GetType,
    Is,
    Saved,
    Selection,
    FieldExists,
    Keys,
    ArrayLiteral,
    Call,
    RoleInstance,
    GlobalObject,
    GetWholeObject,
    GetKeyFromObject,
    KeyExists,
    GetKeysOnly,
    Return,
    Save,
    Update,
    If,
    Conditional,
    Else,
    Finally,
    ArrayForEach,
    Noop,
    Push,
    DeleteField,
    SetKeyOnObject,
    DeleteKeyOnObject,
    PushAtKeyOnObject,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Bool => "Bool",
            NodeKind::Int => "Int",
            NodeKind::Double => "Double",
            NodeKind::String => "String",
            NodeKind::None => "None",
            NodeKind::Object => "Object",
            NodeKind::Field => "Field",
            NodeKind::Comparison => "Comparison",
            NodeKind::Math => "Math",
            NodeKind::BoolAlg => "BoolAlg",
            NodeKind::Not => "Not",
            NodeKind::GetType => "GetType",
            NodeKind::Is => "Is",
            NodeKind::Saved => "Saved",
            NodeKind::Selection => "Selection",
            NodeKind::FieldExists => "FieldExists",
            NodeKind::Keys => "Keys",
            NodeKind::ArrayLiteral => "ArrayLiteral",
            NodeKind::Call => "Call",
            NodeKind::RoleInstance => "RoleInstance",
            NodeKind::GlobalObject => "GlobalObject",
            NodeKind::GetWholeObject => "GetWholeObject",
            NodeKind::GetKeyFromObject => "GetKeyFromObject",
            NodeKind::KeyExists => "KeyExists",
            NodeKind::GetKeysOnly => "GetKeysOnly",
            NodeKind::Return => "Return",
            NodeKind::Save => "Save",
            NodeKind::Update => "Update",
            NodeKind::If => "If",
            NodeKind::Conditional => "Conditional",
            NodeKind::Else => "Else",
            NodeKind::Finally => "Finally",
            NodeKind::ArrayForEach => "ArrayForEach",
            NodeKind::Noop => "Noop",
            NodeKind::Push => "Push",
            NodeKind::DeleteField => "DeleteField",
            NodeKind::SetKeyOnObject => "SetKeyOnObject",
            NodeKind::DeleteKeyOnObject => "DeleteKeyOnObject",
            NodeKind::PushAtKeyOnObject => "PushAtKeyOnObject",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValueNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            ValueNode::Bool { .. } => NodeKind::Bool,
            ValueNode::Int { .. } => NodeKind::Int,
            ValueNode::Double { .. } => NodeKind::Double,
            ValueNode::String { .. } => NodeKind::String,
            ValueNode::None => NodeKind::None,
            ValueNode::Object { .. } => NodeKind::Object,
            ValueNode::Comparison { .. } => NodeKind::Comparison,
            ValueNode::Math { .. } => NodeKind::Math,
            ValueNode::BoolAlg { .. } => NodeKind::BoolAlg,
            ValueNode::Not { .. } => NodeKind::Not,
            ValueNode::GetType { .. } => NodeKind::GetType,
            ValueNode::Is { .. } => NodeKind::Is,
            ValueNode::Saved { .. } => NodeKind::Saved,
            ValueNode::Selection { .. } => NodeKind::Selection,
            ValueNode::FieldExists { .. } => NodeKind::FieldExists,
            ValueNode::Keys { .. } => NodeKind::Keys,
            ValueNode::ArrayLiteral { .. } => NodeKind::ArrayLiteral,
            ValueNode::Call { .. } => NodeKind::Call,
            ValueNode::RoleInstance { .. } => NodeKind::RoleInstance,
            ValueNode::GlobalObject { .. } => NodeKind::GlobalObject,
            ValueNode::GetWholeObject { .. } => NodeKind::GetWholeObject,
            ValueNode::GetKeyFromObject { .. } => NodeKind::GetKeyFromObject,
            ValueNode::KeyExists { .. } => NodeKind::KeyExists,
            ValueNode::GetKeysOnly { .. } => NodeKind::GetKeysOnly,
        }
    }

    /// Direct child value nodes, in evaluation order.
    pub fn children(&self) -> Vec<&ValueNode> {
        match self {
            ValueNode::Bool { .. }
            | ValueNode::Int { .. }
            | ValueNode::Double { .. }
            | ValueNode::String { .. }
            | ValueNode::None
            | ValueNode::Saved { .. }
            | ValueNode::GlobalObject { .. }
            | ValueNode::GetWholeObject { .. }
            | ValueNode::GetKeysOnly { .. } => Vec::new(),
            ValueNode::Object { fields } => fields.iter().flat_map(|f| [&f.key, &f.value]).collect(),
            ValueNode::Comparison { left, right, .. }
            | ValueNode::Math { left, right, .. }
            | ValueNode::BoolAlg { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ValueNode::Not { value } | ValueNode::GetType { value } | ValueNode::Is { value, .. } => {
                vec![value.as_ref()]
            }
            ValueNode::Selection { root, level } => {
                let mut out = vec![root.as_ref()];
                out.extend(level.iter());
                out
            }
            ValueNode::FieldExists { value, field } => vec![value.as_ref(), field.as_ref()],
            ValueNode::Keys { from } => vec![from.as_ref()],
            ValueNode::ArrayLiteral { values } => values.iter().collect(),
            ValueNode::Call { args, .. } => args.iter().collect(),
            ValueNode::RoleInstance { state, .. } => state.iter().map(|s| &**s).collect(),
            ValueNode::GetKeyFromObject { key, .. } => key.iter().collect(),
            ValueNode::KeyExists { key, .. } => vec![key.as_ref()],
        }
    }
}

impl RootNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            RootNode::Return { .. } => NodeKind::Return,
            RootNode::Save { .. } => NodeKind::Save,
            RootNode::Update { .. } => NodeKind::Update,
            RootNode::If { .. } => NodeKind::If,
            RootNode::ArrayForEach { .. } => NodeKind::ArrayForEach,
            RootNode::Call { .. } => NodeKind::Call,
            RootNode::Noop => NodeKind::Noop,
            RootNode::SetKeyOnObject { .. } => NodeKind::SetKeyOnObject,
            RootNode::DeleteKeyOnObject { .. } => NodeKind::DeleteKeyOnObject,
            RootNode::PushAtKeyOnObject { .. } => NodeKind::PushAtKeyOnObject,
        }
    }
}

/// Counts nodes of `kind` reachable from `roots`, including abstract update targets.
pub fn count_kind(roots: &[RootNode], kind: NodeKind) -> usize {
    fn value(v: &ValueNode, kind: NodeKind) -> usize {
        let own = match v {
            ValueNode::Object { fields } if kind == NodeKind::Field => fields.len(),
            _ => usize::from(v.kind() == kind),
        };
        own + v.children().into_iter().map(|c| value(c, kind)).sum::<usize>()
    }

    fn values(vs: &[ValueNode], kind: NodeKind) -> usize {
        vs.iter().map(|v| value(v, kind)).sum()
    }

    fn root(r: &RootNode, kind: NodeKind) -> usize {
        let own = usize::from(r.kind() == kind);
        let inner = match r {
            RootNode::Return { value: v } => v.as_ref().map_or(0, |v| value(v, kind)),
            RootNode::Save { value: v, .. } => value(v, kind),
            RootNode::Update {
                root: target,
                level,
                operation,
            } => {
                let target_count = match target {
                    UpdateTarget::GlobalObject { .. } => usize::from(kind == NodeKind::GlobalObject),
                    UpdateTarget::Saved { .. } => usize::from(kind == NodeKind::Saved),
                };
                let op_count = match operation {
                    Operation::Edit(Edit::Push { values: vs }) => {
                        usize::from(kind == NodeKind::Push) + values(vs, kind)
                    }
                    Operation::Edit(Edit::DeleteField) => usize::from(kind == NodeKind::DeleteField),
                    Operation::Set(v) => value(v, kind),
                };
                target_count + values(level, kind) + op_count
            }
            RootNode::If { conditionally } => conditionally
                .iter()
                .map(|b| {
                    let (own, cond) = match b {
                        Branch::Conditional { cond, .. } => {
                            (NodeKind::Conditional, value(cond, kind))
                        }
                        Branch::Else { .. } => (NodeKind::Else, 0),
                        Branch::Finally { .. } => (NodeKind::Finally, 0),
                    };
                    usize::from(own == kind) + cond + roots_count(b.body(), kind)
                })
                .sum(),
            RootNode::ArrayForEach { target, body, .. } => {
                value(target, kind) + roots_count(body, kind)
            }
            RootNode::Call { args, .. } => values(args, kind),
            RootNode::Noop => 0,
            RootNode::SetKeyOnObject { key, value: v, .. } => values(key, kind) + value(v, kind),
            RootNode::DeleteKeyOnObject { key, .. } => values(key, kind),
            RootNode::PushAtKeyOnObject {
                key, values: vs, ..
            } => values(key, kind) + values(vs, kind),
        };
        own + inner
    }

    fn roots_count(rs: &[RootNode], kind: NodeKind) -> usize {
        rs.iter().map(|r| root(r, kind)).sum()
    }

    roots_count(roots, kind)
}
