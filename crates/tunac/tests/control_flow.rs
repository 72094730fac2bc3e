use serde_json::{json, Value};
use tunac::compile::{compile_program, CompileErrorKind};
use tunac::ops::Op;


use tuna_program::*;

fn branch_arm(index: i64) -> Vec<Value> {
    vec![
        save("t", int(index)),
        call("branch", vec![saved("t")]),
    ]
}

fn router() -> Vec<Op> {
    let body = vec![
        if_(vec![
            conditional(saved("a"), branch_arm(0)),
            conditional(saved("b"), branch_arm(1)),
            conditional(saved("c"), branch_arm(2)),
            else_(vec![
                save("t", int(3)),
                save("unused", int(30)),
                call("branch", vec![saved("t")]),
            ]),
            finally(vec![
                save("f", int(9)),
                call("finally", vec![saved("a"), saved("f")]),
            ]),
        ]),
        ret(saved("c")),
    ];
    let p = program(
        &[],
        json!({ "route": function(&[("a", "bool"), ("b", "bool"), ("c", "bool")], body) }),
    );
    let mut compiled = compile_program(&p).expect("compile router");
    compiled.remove("route").expect("route procedure")
}

#[test]
fn if_chain_runs_exactly_one_arm_then_finally() {
    let ops = router();
    for mask in 0..8u8 {
        let flags = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0];
        let expected_arm = flags.iter().position(|f| *f).unwrap_or(3) as i64;
        let inputs: Vec<Value> = flags.iter().map(|f| Value::Bool(*f)).collect();

        let out = op_sim::run(&ops, inputs.clone());

        assert_eq!(out.raised, None, "flags={flags:?}");
        assert_eq!(
            out.call_names(),
            vec!["branch", "finally"],
            "flags={flags:?}"
        );
        assert_eq!(out.calls[0].args, vec![json!(expected_arm)], "flags={flags:?}");
        assert_eq!(
            out.calls[1].args,
            vec![inputs[0].clone(), json!(9)],
            "flags={flags:?}"
        );
        assert_eq!(out.returned, Some(inputs[2].clone()), "flags={flags:?}");
        assert_eq!(out.heap, inputs, "branch locals must be dropped");
        assert!(out.stack.is_empty(), "flags={flags:?} stack={:?}", out.stack);
    }
}

#[test]
fn missing_finally_falls_through() {
    let p = program(
        &[],
        json!({ "f": function(&[("a", "bool")], vec![
            if_(vec![conditional(saved("a"), vec![call("yes", vec![])])]),
            call("after", vec![]),
        ]) }),
    );
    let ops = compile_program(&p).expect("compile")["f"].clone();
    assert_eq!(
        op_sim::run(&ops, vec![json!(true)]).call_names(),
        vec!["yes", "after"]
    );
    assert_eq!(
        op_sim::run(&ops, vec![json!(false)]).call_names(),
        vec!["after"]
    );
}

fn visitor() -> Vec<Op> {
    let body = vec![
        for_each(
            saved("xs"),
            "x",
            vec![
                save("y", plus(saved("x"), int(10))),
                call("visit", vec![saved("y")]),
                if_(vec![conditional(
                    json!({"kind": "Comparison", "sign": "==", "left": saved("x"), "right": int(2)}),
                    vec![save("z", int(0)), call("two", vec![saved("z")])],
                )]),
            ],
        ),
        ret(saved("xs")),
    ];
    let p = program(&[], json!({ "visit_all": function(&[("xs", "Array")], body) }));
    compile_program(&p).expect("compile visitor")["visit_all"].clone()
}

#[test]
fn loops_visit_every_element_and_restore_the_heap() {
    let ops = visitor();
    let out = op_sim::run(&ops, vec![json!([1, 2, 3])]);
    assert_eq!(out.raised, None);
    assert_eq!(out.call_names(), vec!["visit", "visit", "two", "visit"]);
    let visited: Vec<Value> = out
        .calls
        .iter()
        .filter(|c| c.name == "visit")
        .map(|c| c.args[0].clone())
        .collect();
    assert_eq!(visited, vec![json!(13), json!(12), json!(11)]);
    assert_eq!(out.returned, Some(json!([1, 2, 3])));
    assert_eq!(out.heap, vec![json!([1, 2, 3])]);
    assert!(out.stack.is_empty(), "stack={:?}", out.stack);
}

#[test]
fn empty_arrays_skip_the_loop_body() {
    let out = op_sim::run(&visitor(), vec![json!([])]);
    assert!(out.calls.is_empty());
    assert_eq!(out.returned, Some(json!([])));
    assert!(out.stack.is_empty());
}

#[test]
fn loop_variables_are_scoped_to_the_loop() {
    let p = program(
        &[],
        json!({ "f": function(&[("xs", "Array")], vec![
            for_each(saved("xs"), "x", vec![]),
            ret(saved("x")),
        ]) }),
    );
    let err = compile_program(&p).expect_err("x is out of scope");
    assert_eq!(err.kind, CompileErrorKind::UnknownVariable);
    assert!(err.message.starts_with("f: "), "{}", err.message);
}

#[test]
fn local_pushes_and_field_writes_reach_the_heap() {
    let p = program(
        &[],
        json!({ "f": function(&[], vec![
            save("xs", json!({"kind": "ArrayLiteral", "values": [int(1)]})),
            update(saved("xs"), vec![], push(vec![int(2), int(3)])),
            update(saved("xs"), vec![], int(7)),
            ret(saved("xs")),
        ]) }),
    );
    let ops = compile_program(&p).expect("compile")["f"].clone();
    let out = op_sim::run(&ops, Vec::new());
    assert_eq!(out.returned, Some(json!(7)));

    let p = program(
        &[],
        json!({ "g": function(&[], vec![
            save("xs", json!({"kind": "ArrayLiteral", "values": [int(1)]})),
            update(saved("xs"), vec![], push(vec![int(2), int(3)])),
            ret(saved("xs")),
        ]) }),
    );
    let ops = compile_program(&p).expect("compile")["g"].clone();
    assert_eq!(op_sim::run(&ops, Vec::new()).returned, Some(json!([1, 2, 3])));
}
