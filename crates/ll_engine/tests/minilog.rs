use ll_core::{Answer, LogicEngine, LogicLoomError, OutputSink, Resumable, Term, TxAction};
use ll_engine::{library, MiniLog};

fn engine_with(source: &str) -> MiniLog {
    let mut engine = MiniLog::new();
    engine.consult(source, "user").expect("consult failed");
    engine
}

fn binding(answer: &Answer, var: &str) -> String {
    match answer {
        Answer::Success(b) => b[var].to_string(),
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn test_enumerates_facts_lazily() {
    let mut engine = engine_with("p(1). p(2). p(3). p(4). p(5).");
    let mut cursor = engine.query("p(X)").unwrap();
    assert_eq!(cursor.variables(), &["X".to_string()]);

    for expected in 1..=4 {
        let answer = engine.solve(&mut cursor);
        assert_eq!(binding(&answer, "X"), expected.to_string());
        assert!(cursor.has_choice_points());
    }
    // 最后一条子句之后不再留下选择点
    assert_eq!(binding(&engine.solve(&mut cursor), "X"), "5");
    assert!(!cursor.has_choice_points());
    assert_eq!(engine.solve(&mut cursor), Answer::Failure);
}

#[test]
fn test_cursor_resumes_after_serialization() {
    let mut engine = engine_with("color(red). color(green). color(blue).");
    let mut cursor = engine.query("color(C)").unwrap();
    engine.solve(&mut cursor);

    let saved = serde_json::to_string(&cursor).unwrap();
    let mut restored: ll_engine::Cursor = serde_json::from_str(&saved).unwrap();
    assert_eq!(binding(&engine.solve(&mut restored), "C"), "green");
    assert_eq!(binding(&engine.solve(&mut restored), "C"), "blue");
}

#[test]
fn test_errors_are_answers() {
    let mut engine = MiniLog::new();
    assert_eq!(
        engine.run_once("throw(oops)").unwrap(),
        Answer::Error(Term::atom("oops"))
    );
    let unknown = engine.run_once("nope(1)").unwrap();
    assert_eq!(
        unknown.ball().unwrap().to_string(),
        "error(existence_error(procedure, nope / 1), _)"
    );
    assert_eq!(
        engine.run_once("X is foo + 1").unwrap().ball().unwrap().to_string(),
        "error(type_error(evaluable, foo / 0), _)"
    );
}

#[test]
fn test_control_constructs() {
    let mut engine = engine_with(
        "max_of(X, Y, Z) :- ( X >= Y -> Z = X ; Z = Y ).\n\
         first(X) :- member(X, [a, b, c]), !.",
    );
    assert_eq!(binding(&engine.run_once("max_of(3, 7, M)").unwrap(), "M"), "7");
    assert_eq!(binding(&engine.run_once("max_of(9, 7, M)").unwrap(), "M"), "9");

    let mut cursor = engine.query("first(X)").unwrap();
    assert_eq!(binding(&engine.solve(&mut cursor), "X"), "a");
    assert!(!cursor.has_choice_points());

    assert!(engine.run_once("\\+ member(z, [a, b])").unwrap().is_success());
    assert_eq!(
        binding(&engine.run_once("findall(X, between(1, 3, X), L)").unwrap(), "L"),
        "[1, 2, 3]"
    );
    assert_eq!(
        binding(&engine.run_once("length([a, b, c], N)").unwrap(), "N"),
        "3"
    );
    assert!(engine
        .run_once("forall(member(X, [1, 2]), X > 0)")
        .unwrap()
        .is_success());
    assert_eq!(
        binding(&engine.run_once("T =.. [point, 1, 2]").unwrap(), "T"),
        "point(1, 2)"
    );
}

#[test]
fn test_assert_is_captured_with_module() {
    let mut engine = MiniLog::new();
    let answer = engine
        .run_once("assertz(counter(1)), shared:assertz(fact(a))")
        .unwrap();
    assert!(answer.is_success());

    let ops = engine.take_transaction();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].module, None);
    assert_eq!(ops[0].action, TxAction::Assertz);
    assert_eq!(ops[1].to_string(), "shared:assertz(fact(a))");
    assert!(engine.take_transaction().is_empty());

    assert_eq!(
        engine.dump_module("user"),
        ":- dynamic counter/1.\ncounter(1).\n"
    );
    assert_eq!(engine.dump_module("shared"), ":- dynamic fact/1.\nfact(a).\n");
}

#[test]
fn test_retract_is_deterministic() {
    let mut engine = engine_with(":- dynamic item/1.\nitem(a). item(b).");
    let mut cursor = engine.query("retract(item(X))").unwrap();
    assert_eq!(binding(&engine.solve(&mut cursor), "X"), "a");
    assert!(!cursor.has_choice_points());

    let ops = engine.take_transaction();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].goal().to_string(), "retract(item(a))");
    assert_eq!(engine.dump_module("user"), ":- dynamic item/1.\nitem(b).\n");

    engine.run_once("retractall(item(_))").unwrap();
    assert_eq!(engine.dump_module("user"), ":- dynamic item/1.\n");
}

#[test]
fn test_dump_round_trip() {
    let source = "parent(tom, bob).\n\
                  parent(bob, ann).\n\
                  ancestor(X, Y) :- parent(X, Y).\n\
                  ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).\n";
    let mut original = engine_with(source);
    let dumped = original.dump_module("user");
    assert_eq!(
        dumped,
        "parent(tom, bob).\nparent(bob, ann).\n\
         ancestor(A, B) :- parent(A, B).\n\
         ancestor(A, B) :- parent(A, C), ancestor(C, B).\n"
    );

    let mut reloaded = engine_with(&dumped);
    let goal = "findall(X-Y, ancestor(X, Y), L)";
    assert_eq!(
        original.run_once(goal).unwrap(),
        reloaded.run_once(goal).unwrap()
    );
    assert_eq!(
        binding(&reloaded.run_once(goal).unwrap(), "L"),
        "[tom - bob, bob - ann, tom - ann]"
    );
}

#[test]
fn test_halted_cursor_reports_stopped() {
    let mut engine = engine_with("n(1). n(2).");
    let mut cursor = engine.query("n(X)").unwrap();
    engine.solve(&mut cursor);
    cursor.halt();
    assert!(!cursor.has_choice_points());
    assert_eq!(engine.solve(&mut cursor), Answer::Stopped);
}

#[test]
fn test_output_goes_to_sink() {
    let mut engine = MiniLog::new();
    let sink = OutputSink::detached();
    engine.set_output(sink.clone());
    engine
        .run_once("write(hello), nl, format(\"~w-~d~n\", [a, 3])")
        .unwrap();
    assert_eq!(sink.take(), "hello\na-3\n");
}

#[test]
fn test_consult_errors() {
    let mut engine = MiniLog::new();
    assert!(matches!(
        engine.consult("foo(", "user"),
        Err(LogicLoomError::Syntax { .. })
    ));
    assert!(matches!(
        engine.consult(":- fail.", "user"),
        Err(LogicLoomError::Consult { .. })
    ));
    assert!(matches!(
        engine.consult("s --> [a].", "user"),
        Err(LogicLoomError::Consult { .. })
    ));
}

#[test]
fn test_modules_and_clear() {
    let mut engine = engine_with("a.");
    engine.consult("b.", "extra").unwrap();
    let modules = engine.modules();
    let lists = modules.iter().find(|m| m.name == library::LISTS).unwrap();
    assert!(lists.library);
    assert!(modules.iter().any(|m| m.name == "extra" && !m.library));

    engine.clear_module("extra");
    assert!(!engine.modules().iter().any(|m| m.name == "extra"));
    assert!(engine.run_once("extra:b").unwrap().ball().is_some());
}

#[test]
fn test_inference_limit() {
    let mut engine = MiniLog::new().with_max_inferences(1_000);
    engine.consult("loop :- loop.", "user").unwrap();
    assert_eq!(
        engine.run_once("loop").unwrap().ball().unwrap().to_string(),
        "error(resource_error(inferences), _)"
    );
}
