use serde_json::json;
use tunac::compile::CompileErrorKind;
use tunac::ir::{count_kind, NodeKind};
use tunac::lower::lower_program;


use tuna_program::*;

fn store_program() -> tunac::program::Program {
    program(
        &["users", "counters"],
        json!({
            "touch": function(&[("id", "string")], vec![
                save("all", select(global("users"), vec![])),
                save("one", select(global("users"), vec![saved("id"), string("name")])),
                save("ids", select(global("users"), vec![keys(saved("all"))])),
                save("has", field_exists(global("users"), saved("id"))),
                save("names", keys(global("counters"))),
                update(global("counters"), vec![saved("id")], plus(select(global("counters"), vec![saved("id")]), int(1))),
                update(global("users"), vec![saved("id"), string("tags")], push(vec![string("seen")])),
                update(global("users"), vec![saved("id"), string("old")], delete_field()),
                if_(vec![conditional(saved("has"), vec![call("log", vec![saved("one")])])]),
                for_each(saved("names"), "n", vec![
                    update(global("counters"), vec![saved("n")], int(0)),
                ]),
                ret(saved("ids")),
            ]),
        }),
    )
}

#[test]
fn lowering_removes_every_global_object() {
    let p = store_program();
    let before: usize = p
        .functions
        .values()
        .map(|f| count_kind(&f.computation, NodeKind::GlobalObject))
        .sum();
    assert_eq!(before, 10);

    let lowered = lower_program(&p).expect("lower");
    let body = &lowered.functions["touch"].computation;
    assert_eq!(count_kind(body, NodeKind::GlobalObject), 0);
    assert_eq!(count_kind(body, NodeKind::GetWholeObject), 1);
    assert_eq!(count_kind(body, NodeKind::GetKeyFromObject), 2);
    assert_eq!(count_kind(body, NodeKind::KeyExists), 1);
    assert_eq!(count_kind(body, NodeKind::GetKeysOnly), 2);
    assert_eq!(count_kind(body, NodeKind::SetKeyOnObject), 2);
    assert_eq!(count_kind(body, NodeKind::PushAtKeyOnObject), 1);
    assert_eq!(count_kind(body, NodeKind::DeleteKeyOnObject), 1);
    assert_eq!(count_kind(body, NodeKind::Update), 0);
    assert_eq!(lowered.functions["touch"].input, p.functions["touch"].input);
}

#[test]
fn leading_keys_level_selects_key_listing() {
    let lowered = lower_program(&store_program()).expect("lower");
    let doc = serde_json::to_value(&lowered.functions["touch"].computation[2]).expect("encode");
    assert_eq!(
        doc,
        json!({
            "kind": "Save",
            "name": "ids",
            "value": {"kind": "GetKeysOnly", "obj": "users"},
        })
    );

    let p = program(
        &["users"],
        json!({ "f": function(&[], vec![
            ret(select(global("users"), vec![keys(int(0)), int(0)])),
        ]) }),
    );
    let lowered = lower_program(&p).expect("lower");
    let doc = serde_json::to_value(&lowered.functions["f"].computation[0]).expect("encode");
    assert_eq!(
        doc["value"],
        json!({
            "kind": "Selection",
            "root": {"kind": "GetKeysOnly", "obj": "users"},
            "level": [{"kind": "Int", "value": 0}],
        })
    );
}

#[test]
fn lowering_is_idempotent() {
    let once = lower_program(&store_program()).expect("lower once");
    let twice = lower_program(&once).expect("lower twice");
    assert_eq!(once, twice);
}

#[test]
fn undeclared_globals_are_rejected() {
    let p = program(
        &["users"],
        json!({ "f": function(&[], vec![ret(select(global("orders"), vec![string("k")]))]) }),
    );
    let err = lower_program(&p).expect_err("orders is undeclared");
    assert_eq!(err.kind, CompileErrorKind::UnknownGlobal);
    assert!(err.message.contains("orders"), "{}", err.message);
    assert!(err.message.starts_with("f: "), "{}", err.message);
}

#[test]
fn undeclared_program_accepts_any_global() {
    let p = program(
        &[],
        json!({ "f": function(&[], vec![ret(select(global("anything"), vec![]))]) }),
    );
    let lowered = lower_program(&p).expect("lower");
    assert_eq!(
        count_kind(&lowered.functions["f"].computation, NodeKind::GetWholeObject),
        1
    );
}

#[test]
fn bare_global_values_are_rejected() {
    let p = program(&[], json!({ "f": function(&[], vec![ret(global("g"))]) }));
    assert_eq!(
        lower_program(&p).expect_err("bare global").kind,
        CompileErrorKind::AbstractNode
    );

    let p = program(
        &[],
        json!({ "f": function(&[], vec![
            ret(json!({"kind": "ArrayLiteral", "values": [global("g")]})),
        ]) }),
    );
    assert_eq!(
        lower_program(&p).expect_err("global in array").kind,
        CompileErrorKind::GlobalAsValue
    );
}

#[test]
fn globals_lower_in_every_value_position() {
    let read = || select(global("g"), vec![string("k")]);
    let positions: Vec<(&str, serde_json::Value)> = vec![
        (
            "object field",
            json!({"kind": "Object", "fields": [
                {"kind": "Field", "key": string("a"), "value": read()},
            ]}),
        ),
        (
            "role state",
            json!({
                "kind": "RoleInstance",
                "role": {"kind": "Role", "data": ["admin", []]},
                "state": read(),
            }),
        ),
        ("call argument", json!({"kind": "Call", "function_name": "h", "args": [read()]})),
        (
            "comparison operand",
            json!({"kind": "Comparison", "sign": "<", "left": int(0), "right": read()}),
        ),
        ("math operand", plus(read(), int(1))),
        ("negation", json!({"kind": "Not", "value": field_exists(global("g"), string("k"))})),
        ("nested selection root", select(read(), vec![string("inner")])),
        ("field name", field_exists(saved("o"), read())),
        ("key expression", select(global("g"), vec![read()])),
    ];
    for (position, value) in positions {
        let p = program(
            &["g"],
            json!({ "f": function(&[("o", "Any")], vec![
                if_(vec![conditional(boolean(true), vec![ret(value.clone())])]),
                for_each(keys(global("g")), "row", vec![call("h", vec![value])]),
            ]) }),
        );
        let lowered = lower_program(&p).unwrap_or_else(|e| panic!("{position}: {e}"));
        let body = &lowered.functions["f"].computation;
        assert_eq!(count_kind(body, NodeKind::GlobalObject), 0, "{position}");
        let reads = count_kind(body, NodeKind::GetKeyFromObject)
            + count_kind(body, NodeKind::KeyExists);
        assert!(reads >= 2, "{position}: {reads} store reads");
        assert_eq!(lower_program(&lowered).expect("relower"), lowered, "{position}");
    }
}
