//! End-to-end scenarios: whole programs through the full pipeline, asserting
//! on the exact program-visible output lines.

use std::cell::RefCell;
use std::rc::Rc;

use indoc::indoc;

use keikaku::interpreter::error::RuntimeError;
use keikaku::voice::RecordedVoice;
use keikaku::{run_source, Interpreter, ScriptError, Value};

struct Session {
    interp: Interpreter,
    recorder: Rc<RefCell<RecordedVoice>>,
}

impl Session {
    fn new() -> Self {
        let recorder = Rc::new(RefCell::new(RecordedVoice::default()));
        let interp = Interpreter::new(Box::new(recorder.clone()));
        Self { interp, recorder }
    }

    fn run(&mut self, source: &str) -> Result<Value, ScriptError> {
        run_source(&mut self.interp, source)
    }

    fn displayed(&self) -> Vec<String> {
        self.recorder.borrow().displayed.clone()
    }

    fn narrated(&self) -> Vec<String> {
        self.recorder.borrow().narrated.clone()
    }
}

fn output_of(source: &str) -> Vec<String> {
    let mut session = Session::new();
    session.run(source).expect("program should run cleanly");
    session.displayed()
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(output_of("declare(1 + 2 * 3)\n"), vec!["  7"]);
}

#[test]
fn announce_is_an_alias_of_declare() {
    assert_eq!(output_of("announce(\"as planned\")\n"), vec!["  as planned"]);
}

#[test]
fn string_repetition() {
    let source = indoc! {"
        designate s = \"a\" * 3
        declare(s)
    "};
    assert_eq!(output_of(source), vec!["  aaa"]);
}

#[test]
fn generator_yields_in_order() {
    let source = indoc! {"
        sequence g():
            cycle from 1 to 4 as i:
                yield i
        gen := g()
        declare(proceed(gen), proceed(gen), proceed(gen))
    "};
    assert_eq!(output_of(source), vec!["  1 2 3"]);
}

#[test]
fn transmit_and_receive_round_trip() {
    let source = indoc! {"
        sequence e():
            cycle while true:
                m := receive()
                yield \"got:\" + text(m)
        g := e()
        proceed(g)
        declare(transmit(g, 7))
    "};
    assert_eq!(output_of(source), vec!["  got:7"]);
}

#[test]
fn inheritance_with_super_call() {
    let source = indoc! {"
        entity A:
            protocol construct(x):
                self.x = x
        entity B inherits A:
            protocol construct(x, y):
                ascend construct(x)
                self.y = y
        b := manifest B(1, 2)
        declare(b.x, b.y)
    "};
    assert_eq!(output_of(source), vec!["  1 2"]);
}

#[test]
fn attempt_recovers_from_division_by_zero() {
    let source = indoc! {"
        attempt:
            declare(1 / 0)
        recover e:
            declare(\"caught\")
    "};
    assert_eq!(output_of(source), vec!["  caught"]);
}

#[test]
fn recover_binds_the_error_message() {
    let source = indoc! {"
        attempt:
            declare(missing)
        recover as e:
            declare(e)
    "};
    assert_eq!(
        output_of(source),
        vec!["  'missing' is unknown. Perhaps you intended to designate it first."]
    );
}

#[test]
fn integer_arithmetic_stays_integral() {
    let source = indoc! {"
        declare(7 // 2)
        declare(7 % 3)
        declare(2 + 3 * 4 - 1)
        declare(classify(7 // 2))
    "};
    assert_eq!(output_of(source), vec!["  3", "  1", "  13", "  int"]);
}

#[test]
fn division_always_yields_float() {
    assert_eq!(output_of("declare(4 / 2)\ndeclare(classify(4 / 2))\n"), vec!["  2", "  float"]);
}

#[test]
fn float_promotion() {
    assert_eq!(
        output_of("declare(1 + 2.5)\ndeclare(classify(1 + 2.5))\n"),
        vec!["  3.5", "  float"]
    );
}

#[test]
fn modulo_by_zero_is_an_error() {
    let mut session = Session::new();
    let err = session.run("declare(1 % 0)\n").expect_err("expected error");
    assert!(err.to_string().contains("Division by zero"));
}

#[test]
fn comparison_and_logic() {
    let source = indoc! {"
        declare(1 < 2 and 2 <= 2)
        declare(1 > 2 or not false)
        declare(\"a\" == \"a\", \"a\" != \"b\")
    "};
    assert_eq!(output_of(source), vec!["  true", "  true", "  true true"]);
}

#[test]
fn foresee_alternate_otherwise() {
    let source = indoc! {"
        protocol label(n):
            foresee n == 0:
                yield \"zero\"
            alternate n == 1:
                yield \"one\"
            otherwise:
                yield \"many\"
        declare(label(0), label(1), label(5))
    "};
    assert_eq!(output_of(source), vec!["  zero one many"]);
}

#[test]
fn situation_matches_value_lists() {
    let source = indoc! {"
        protocol kind(n):
            designate result = \"\"
            situation n:
                alignment 1, 2:
                    result = \"small\"
                alignment 3:
                    result = \"three\"
                otherwise:
                    result = \"big\"
            yield result
        declare(kind(2), kind(3), kind(9))
    "};
    assert_eq!(output_of(source), vec!["  small three big"]);
}

#[test]
fn cycle_while_with_break_and_continue() {
    let source = indoc! {"
        designate n = 0
        designate total = 0
        cycle while true:
            n = n + 1
            foresee n == 3:
                continue
            foresee n > 5:
                break
            total = total + n
        declare(n, total)
    "};
    assert_eq!(output_of(source), vec!["  6 12"]);
}

#[test]
fn cycle_through_with_destructuring() {
    let source = indoc! {"
        cycle through [[1, \"one\"], [2, \"two\"]] as [n, name]:
            declare(n, name)
    "};
    assert_eq!(output_of(source), vec!["  1 one", "  2 two"]);
}

#[test]
fn closures_share_their_captured_scope() {
    let source = indoc! {"
        protocol counter():
            designate n = 0
            designate bump = () => :
                n = n + 1
                yield n
            yield bump
        c := counter()
        declare(c(), c(), c())
    "};
    assert_eq!(output_of(source), vec!["  1 2 3"]);
}

#[test]
fn default_and_rest_parameters() {
    let source = indoc! {"
        protocol f(a, b := 10, ...rest):
            yield a + b + measure(rest)
        declare(f(1))
        declare(f(1, 2))
        declare(f(1, 2, 3, 4))
    "};
    assert_eq!(output_of(source), vec!["  11", "  3", "  5"]);
}

#[test]
fn spread_splices_arguments_and_lists() {
    let source = indoc! {"
        designate parts = [2, 3]
        declare(...parts)
        declare(measure([1, ...parts, 4]))
    "};
    assert_eq!(output_of(source), vec!["  2 3", "  4"]);
}

#[test]
fn destructuring_pads_and_truncates() {
    let source = indoc! {"
        [a, b, c] = [1, 2]
        declare(a, b, c)
        [x] = [7, 8, 9]
        declare(x)
    "};
    assert_eq!(output_of(source), vec!["  1 2 void", "  7"]);
}

#[test]
fn index_assignment_writes_through() {
    let source = indoc! {"
        designate xs = [1, 2, 3]
        xs[1] = 9
        declare(xs)
        designate d = {\"a\": 1}
        d[\"b\"] = 2
        declare(d[\"a\"], d[\"b\"])
    "};
    assert_eq!(output_of(source), vec!["  [1, 9, 3]", "  1 2"]);
}

#[test]
fn out_of_range_index_yields_null() {
    assert_eq!(output_of("declare([1, 2][5])\n"), vec!["  void"]);
}

#[test]
fn slices_with_negative_bounds_and_step() {
    let source = indoc! {"
        designate xs = [0, 1, 2, 3, 4, 5]
        declare(xs[1:4])
        declare(xs[:3])
        declare(xs[-2:])
        declare(xs[::2])
        declare(xs[::-1])
        declare(\"keikaku\"[0:3])
    "};
    assert_eq!(
        output_of(source),
        vec![
            "  [1, 2, 3]",
            "  [0, 1, 2]",
            "  [4, 5]",
            "  [0, 2, 4]",
            "  [5, 4, 3, 2, 1, 0]",
            "  kei",
        ]
    );
}

#[test]
fn slice_step_zero_is_an_error() {
    let mut session = Session::new();
    let err = session
        .run("declare([1, 2][::0])\n")
        .expect_err("expected error");
    assert!(err.to_string().contains("step cannot be zero"));
}

#[test]
fn list_comprehension_with_filter() {
    let source = indoc! {"
        declare([n * n cycle through span(6) as n foresee n % 2 == 0])
    "};
    assert_eq!(output_of(source), vec!["  [0, 4, 16]"]);
}

#[test]
fn generator_expression_over_list_and_sequence() {
    let source = indoc! {"
        declare((n * 2 for n through [1, 2, 3] where n > 1))
        sequence nums():
            yield 4
            yield 5
        declare((n + 1 for n through nums()))
    "};
    assert_eq!(output_of(source), vec!["  [4, 6]", "  [5, 6]"]);
}

#[test]
fn ternary_expression() {
    assert_eq!(
        output_of("declare(\"yes\" foresee 1 < 2 otherwise \"no\")\n"),
        vec!["  yes"]
    );
}

#[test]
fn higher_order_builtins() {
    let source = indoc! {"
        designate xs = [1, 2, 3, 4]
        declare(transform(xs, (n) => n * n))
        declare(select(xs, (n) => n % 2 == 0))
        declare(fold(xs, (acc, n) => acc + n, 0))
    "};
    assert_eq!(
        output_of(source),
        vec!["  [1, 4, 9, 16]", "  [2, 4]", "  10"]
    );
}

#[test]
fn lambda_block_body_and_walrus_assignment() {
    let source = indoc! {"
        clamp := (n) => :
            foresee n < 0:
                yield 0
            yield n
        declare(clamp(-5), clamp(5))
    "};
    assert_eq!(output_of(source), vec!["  0 5"]);
}

#[test]
fn delegate_yields_from_lists_and_generators() {
    let source = indoc! {"
        sequence inner():
            yield \"b\"
        sequence g():
            yield \"a\"
            delegate inner()
            delegate [\"c\", \"d\"]
        out := g()
        declare(proceed(out), proceed(out), proceed(out), proceed(out))
    "};
    assert_eq!(output_of(source), vec!["  a b c d"]);
}

#[test]
fn await_pulls_resolved_promises_and_generators() {
    let source = indoc! {"
        declare(await resolve(42))
        sequence g():
            yield 9
        declare(await g())
        declare(await 5)
    "};
    assert_eq!(output_of(source), vec!["  42", "  9", "  5"]);
}

#[test]
fn await_pending_promise_passes_through() {
    use keikaku::interpreter::env::env_define;
    use keikaku::interpreter::value::Promise;

    let mut session = Session::new();
    session
        .run("protocol probe(p):\n    yield classify(await p)\n")
        .expect("define");
    // A pending promise cannot be built from the language itself; inject one.
    let pending = Value::Promise(Rc::new(RefCell::new(Promise::pending())));
    env_define(session.interp.global_env(), "p", pending);
    let value = session.run("probe(p)\n").expect("probe");
    assert_eq!(value, Value::Str("promise".to_string()));
}

#[test]
fn override_writes_to_the_root_scope() {
    let source = indoc! {"
        designate x = 1
        protocol deep():
            override x = 99
            yield 0
        deep()
        declare(x)
    "};
    let mut session = Session::new();
    session.run(source).expect("run");
    assert_eq!(session.displayed(), vec!["  99"]);
    assert!(session
        .narrated()
        .iter()
        .any(|line| line.contains("Override applied: x := 99")));
}

#[test]
fn scheme_and_preview_and_absolute_narrate() {
    let source = indoc! {"
        scheme:
            designate x = 2
        execute
        preview x * 10
        absolute x == 3
    "};
    let mut session = Session::new();
    session.run(source).expect("run");
    assert!(session.displayed().is_empty());
    let narrated = session.narrated().join("\n");
    assert!(narrated.contains("Scheme registered"));
    assert!(narrated.contains("Scheme executed"));
    assert!(narrated.contains("Preview: 20"));
    assert!(narrated.contains("ABSOLUTE DEVIATION"));
    assert!(narrated.contains("x == 3"));
}

#[test]
fn anomaly_narrates_entry_and_exit() {
    let mut session = Session::new();
    session
        .run("anomaly:\n    declare(\"inside\")\n")
        .expect("run");
    assert_eq!(session.displayed(), vec!["  inside"]);
    let narrated = session.narrated().join("\n");
    assert!(narrated.contains("Anomaly block entered"));
    assert!(narrated.contains("Anomaly concluded"));
}

#[test]
fn private_members_are_guarded() {
    let source = indoc! {"
        entity Vault:
            protocol construct(secret):
                self._secret = secret
            protocol reveal():
                yield self._secret
        v := manifest Vault(7)
        declare(v.reveal())
    "};
    assert_eq!(output_of(source), vec!["  7"]);

    let mut session = Session::new();
    session.run(source).expect("setup");
    let err = session
        .run("declare(v._secret)\n")
        .expect_err("expected privacy violation");
    assert!(err.to_string().contains("private member"));
}

#[test]
fn repeated_errors_escalate_the_report() {
    let mut session = Session::new();
    for _ in 0..3 {
        let _ = session.run("declare(1 / 0)\n");
    }
    let narrated = session.narrated();
    assert!(narrated[0].contains("A deviation has occurred"));
    assert!(narrated[1].contains("The same deviation persists"));
    assert!(narrated[2].contains("TERMINAL DEVIATION"));
}

#[test]
fn absolute_failure_does_not_halt() {
    let source = indoc! {"
        absolute 1 == 2
        declare(\"still here\")
    "};
    assert_eq!(output_of(source), vec!["  still here"]);
}

#[test]
fn terminate_carries_the_exit_code() {
    let mut session = Session::new();
    let err = session
        .run("terminate(3)\ndeclare(\"unreachable\")\n")
        .expect_err("expected termination");
    match err {
        ScriptError::Runtime(RuntimeError::Terminated { code }) => assert_eq!(code, 3),
        other => panic!("expected termination, got {other}"),
    }
    assert!(session.displayed().is_empty());
}

#[test]
fn attempt_does_not_intercept_terminate() {
    let mut session = Session::new();
    let source = indoc! {"
        attempt:
            terminate(1)
        recover e:
            declare(\"recovered\")
    "};
    let err = session.run(source).expect_err("expected termination");
    assert!(matches!(
        err,
        ScriptError::Runtime(RuntimeError::Terminated { code: 1 })
    ));
}

#[test]
fn repl_style_expression_value_is_returned() {
    let mut session = Session::new();
    let value = session.run("1 + 2\n").expect("run");
    assert_eq!(value, Value::Int(3));
    let value = session.run("designate x = 5\n").expect("run");
    assert_eq!(value, Value::Null);
}

#[test]
fn state_persists_across_chunks_like_a_repl() {
    let mut session = Session::new();
    session.run("designate total = 0\n").expect("chunk 1");
    session.run("total = total + 41\n").expect("chunk 2");
    let value = session.run("total + 1\n").expect("chunk 3");
    assert_eq!(value, Value::Int(42));
}

#[test]
fn lexer_and_parser_errors_carry_line_numbers() {
    let mut session = Session::new();
    let err = session.run("x = \"open\n").expect_err("lex error");
    assert_eq!(err.line(), 1);
    let err = session.run("y = 1\nz = )\n").expect_err("parse error");
    assert_eq!(err.line(), 2);
}

#[test]
fn incorporate_executes_a_file_in_the_current_scope() {
    let dir = std::env::temp_dir().join("keikaku-incorporate-test");
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("shared.kei");
    std::fs::write(&path, "designate shared = 123\n").expect("write module");

    let mut session = Session::new();
    let source = format!("incorporate \"{}\"\ndeclare(shared)\n", path.display());
    session.run(&source).expect("run");
    assert_eq!(session.displayed(), vec!["  123"]);
    assert!(session
        .narrated()
        .iter()
        .any(|line| line.contains("Incorporating")));
}

#[test]
fn dict_literals_render_and_measure() {
    let source = indoc! {"
        designate d = {\"a\": 1, \"b\": [2, 3]}
        declare(d)
        declare(measure(d))
    "};
    assert_eq!(
        output_of(source),
        vec!["  {\"a\": 1, \"b\": [2, 3]}", "  2"]
    );
}

#[test]
fn string_concat_stringifies_the_other_side() {
    let source = indoc! {"
        declare(\"n=\" + 4)
        declare(1 + \"!\")
        declare(\"list: \" + [1, 2])
    "};
    assert_eq!(
        output_of(source),
        vec!["  n=4", "  1!", "  list: [1, 2]"]
    );
}
