// Integration tests for running stories end to end

use inkvm::interpreter::command::{ChoiceFlags, Command, ContainerFlags};
use inkvm::story::builder::StoryBuilder;
use inkvm::{HostValue, Limit, RuntimeConfig, RuntimeError, Story};
use std::cell::RefCell;
use std::rc::Rc;

fn load(b: &StoryBuilder) -> Rc<Story> {
    Story::from_bytes(&b.build().expect("Story build failed")).expect("Story load failed")
}

/// Global declaration block setting `name` to `value`, placed after the story body
fn declare_int(b: &mut StoryBuilder, name: &str, value: i32) {
    let decl = b.begin_global_decl();
    b.start_eval().int(value).end_eval().set_variable(name);
    b.end_container(decl);
    b.end();
}

fn choice_texts(runner: &inkvm::Runner) -> Vec<String> {
    runner.choices().iter().map(|c| c.text().to_string()).collect()
}

#[test]
fn test_glue_across_lines() {
    let mut b = StoryBuilder::new();
    b.text("Hello").newline();
    b.glue().text(" world").newline();
    b.text("Bye").newline();
    b.end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "Hello world\nBye\n");
}

#[test]
fn test_arithmetic_output() {
    let mut b = StoryBuilder::new();
    b.text("Sum: ");
    b.start_eval().int(3).int(4).op(Command::Add).output().end_eval();
    b.newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(
        runner.advance_one_line().expect("Execution failed"),
        Some("Sum: 7".to_string())
    );
}

#[test]
fn test_integer_division_by_zero_is_reported() {
    let mut b = StoryBuilder::new();
    b.start_eval().int(1).int(0).op(Command::Divide).output().end_eval();
    b.newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    let err = runner.advance_one_line().expect_err("Division should fail");
    assert!(matches!(err.root(), RuntimeError::DivisionByZero { .. }));
    assert!(!runner.can_continue());
}

#[test]
fn test_once_only_choice_disappears() {
    let mut b = StoryBuilder::new();
    let hub = b.label();
    let left = b.label();
    let right = b.label();

    b.place(hub);
    let h = b.begin_container("hub", ContainerFlags::TRACK_VISITS);
    b.text("Hub").newline();
    b.start_eval().text("Left").end_eval();
    b.choice(left, ChoiceFlags::HAS_START_CONTENT | ChoiceFlags::IS_ONCE_ONLY);
    b.start_eval().text("Right").end_eval();
    b.choice(right, ChoiceFlags::HAS_START_CONTENT);
    b.done();
    b.end_container(h);

    b.place(left);
    let l = b.begin_container("left", ContainerFlags::TRACK_VISITS);
    b.text("Went left").newline();
    b.divert(hub);
    b.end_container(l);

    b.place(right);
    let r = b.begin_container("right", ContainerFlags::TRACK_VISITS);
    b.text("Went right").newline();
    b.end();
    b.end_container(r);

    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "Hub\n");
    assert_eq!(choice_texts(&runner), vec!["Left", "Right"]);

    runner.choose(0).expect("Choice failed");
    assert_eq!(runner.advance_all().expect("Execution failed"), "Went left\nHub\n");
    assert_eq!(choice_texts(&runner), vec!["Right"]);
    assert_eq!(runner.globals().turn().expect("turn"), 1);

    runner.choose(0).expect("Choice failed");
    assert_eq!(runner.advance_all().expect("Execution failed"), "Went right\n");
    assert!(!runner.can_continue());
    assert!(!runner.has_choices());
}

#[test]
fn test_invalid_choice_index() {
    let mut b = StoryBuilder::new();
    let target = b.label();
    b.text("Pick").newline();
    b.start_eval().text("Only").end_eval();
    b.choice(target, ChoiceFlags::HAS_START_CONTENT);
    b.done();
    b.place(target);
    b.end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");
    runner.advance_all().expect("Execution failed");

    assert!(matches!(
        runner.choose(3),
        Err(RuntimeError::InvalidChoice { index: 3, available: 1 })
    ));
}

#[test]
fn test_thread_choices_are_gathered() {
    let mut b = StoryBuilder::new();
    let thread = b.label();
    let from_thread = b.label();
    let from_main = b.label();

    b.thread(thread);
    b.start_eval().text("Main option").end_eval();
    b.choice(from_main, ChoiceFlags::HAS_START_CONTENT);
    b.done();

    b.place(thread);
    b.start_eval().text("Thread option").end_eval();
    b.choice(from_thread, ChoiceFlags::HAS_START_CONTENT);
    b.done();

    b.place(from_thread);
    b.text("Took the thread option").newline().end();
    b.place(from_main);
    b.text("Took the main option").newline().end();

    let story = load(&b);

    let mut runner = story.new_runner(None).expect("Runner creation failed");
    runner.advance_all().expect("Execution failed");
    assert_eq!(choice_texts(&runner), vec!["Thread option", "Main option"]);
    assert!(runner.choice(0).expect("choice").thread().is_some());
    assert!(runner.choice(1).expect("choice").thread().is_none());
    runner.choose(0).expect("Choice failed");
    assert_eq!(
        runner.advance_all().expect("Execution failed"),
        "Took the thread option\n"
    );

    let mut runner = story.new_runner(None).expect("Runner creation failed");
    runner.advance_all().expect("Execution failed");
    runner.choose(1).expect("Choice failed");
    assert_eq!(
        runner.advance_all().expect("Execution failed"),
        "Took the main option\n"
    );
}

#[test]
fn test_list_output_and_count() {
    let mut b = StoryBuilder::new();
    let colour = b.declare_list("colour", &[("red", 1), ("green", 2), ("blue", 3)]);
    let literal = b.list_literal(&[(colour, 0), (colour, 2)]);
    b.start_eval().list(literal).output().end_eval().newline();
    b.start_eval().list(literal).op(Command::ListCount).output().end_eval().newline();
    b.end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "red, blue\n2\n");
}

#[test]
fn test_tags_by_position() {
    let mut b = StoryBuilder::new();
    b.tag("title: Test");
    b.text("Hello").tag("loud").newline();
    b.text("Quiet").newline();
    b.end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_one_line().expect("line"), Some("Hello".to_string()));
    assert_eq!(runner.num_global_tags(), 1);
    assert_eq!(runner.get_global_tag(0).as_deref(), Some("title: Test"));
    assert_eq!(runner.num_tags(), 2);
    assert_eq!(runner.get_tag(1).as_deref(), Some("loud"));

    assert_eq!(runner.advance_one_line().expect("line"), Some("Quiet".to_string()));
    assert!(!runner.has_tags());
}

fn external_story() -> Rc<Story> {
    let mut b = StoryBuilder::new();
    let fallback = b.label();
    b.start_eval()
        .int(21)
        .call_external("scale", 1)
        .fallback_function(fallback)
        .output()
        .end_eval();
    b.newline().end();

    b.place(fallback);
    let f = b.begin_container("scale_fallback", ContainerFlags::empty());
    b.define_temp("x");
    b.start_eval()
        .push_variable("x")
        .int(2)
        .op(Command::Multiply)
        .end_eval();
    b.function_return();
    b.end_container(f);
    load(&b)
}

#[test]
fn test_external_function_is_called() {
    let story = external_story();
    let mut runner = story.new_runner(None).expect("Runner creation failed");
    runner
        .bind("scale", |args| {
            HostValue::Int(args.first().and_then(HostValue::as_int).unwrap_or(0) * 3)
        })
        .expect("bind");

    assert_eq!(runner.advance_all().expect("Execution failed"), "63\n");
}

#[test]
fn test_unbound_external_uses_fallback() {
    let story = external_story();
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "42\n");
}

#[test]
fn test_unbound_external_without_fallback_fails() {
    let mut b = StoryBuilder::new();
    b.start_eval().call_external("missing", 0).output().end_eval();
    b.newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    let err = runner.advance_one_line().expect_err("External should be unbound");
    assert!(matches!(err.root(), RuntimeError::UnboundExternal { .. }));
}

#[test]
fn test_lookahead_rolls_back_globals() {
    let mut b = StoryBuilder::new();
    b.text("A").newline();
    b.start_eval().int(1).end_eval().set_variable("x");
    b.text("B").newline();
    b.end();
    declare_int(&mut b, "x", 0);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    runner
        .globals()
        .observe("x", move |new, old| {
            sink.borrow_mut().push((new.clone(), old.cloned()));
        })
        .expect("observe");

    assert_eq!(runner.advance_one_line().expect("line"), Some("A".to_string()));
    assert_eq!(
        runner.globals().get_variable("x").expect("get"),
        Some(HostValue::Int(0))
    );
    assert!(seen.borrow().is_empty());

    assert_eq!(runner.advance_one_line().expect("line"), Some("B".to_string()));
    assert_eq!(
        runner.globals().get_variable("x").expect("get"),
        Some(HostValue::Int(1))
    );
    assert_eq!(
        *seen.borrow(),
        vec![(HostValue::Int(1), Some(HostValue::Int(0)))]
    );
}

#[test]
fn test_host_sets_global() {
    let mut b = StoryBuilder::new();
    b.text("Courage ").start_eval().push_variable("courage").output().end_eval();
    b.newline().end();
    declare_int(&mut b, "courage", 0);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert!(runner.globals().set_variable("courage", 5).expect("set"));
    assert!(!runner.globals().set_variable("fear", 5).expect("set"));
    assert_eq!(runner.advance_all().expect("Execution failed"), "Courage 5\n");
}

#[test]
fn test_move_to_knot() {
    let mut b = StoryBuilder::new();
    b.text("Main").newline().end();
    let side = b.begin_container("side", ContainerFlags::TRACK_VISITS | ContainerFlags::IS_KNOT);
    b.text("Side").newline().end();
    b.end_container(side);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert!(runner.move_to_path("side").expect("move"));
    assert_eq!(runner.advance_all().expect("Execution failed"), "Side\n");
    assert_eq!(runner.globals().visits("side").expect("visits"), Some(1));
    assert!(!runner.move_to_path("nowhere").expect("move"));
}

#[test]
fn test_runners_share_globals() {
    let mut b = StoryBuilder::new();
    b.start_eval().push_variable("n").int(1).op(Command::Add).end_eval().set_variable("n");
    b.text("tick").newline().end();
    declare_int(&mut b, "n", 0);
    let story = load(&b);

    let globals = story.new_globals();
    let mut first = story.new_runner(Some(&globals)).expect("Runner creation failed");
    let mut second = story.new_runner(Some(&globals)).expect("Runner creation failed");
    assert_eq!(globals.num_runners().expect("runners"), 2);

    first.advance_all().expect("Execution failed");
    second.advance_all().expect("Execution failed");
    assert_eq!(globals.get_variable("n").expect("get"), Some(HostValue::Int(2)));

    drop(second);
    assert_eq!(globals.num_runners().expect("runners"), 1);
}

#[test]
fn test_tunnel_returns_after_call() {
    let mut b = StoryBuilder::new();
    let tunnel = b.label();
    b.text("A").newline();
    b.tunnel(tunnel);
    b.text("C").newline();
    b.end();

    b.place(tunnel);
    b.text("B").newline();
    b.tunnel_return();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "A\nB\nC\n");
}

#[test]
fn test_tunnel_return_to_other_target() {
    let mut b = StoryBuilder::new();
    let tunnel = b.label();
    let elsewhere = b.label();
    b.text("A").newline();
    b.tunnel(tunnel);
    b.text("Not here").newline();
    b.end();

    b.place(elsewhere);
    b.text("C").newline().end();

    b.place(tunnel);
    b.text("B").newline();
    b.start_eval().divert_val(elsewhere).end_eval();
    b.tunnel_return();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "A\nB\nC\n");
}

#[test]
fn test_function_output_inside_text() {
    let mut b = StoryBuilder::new();
    let func = b.label();
    b.text("x");
    b.start_eval().function(func).output().end_eval();
    b.text("y").newline().end();

    b.place(func);
    b.text("mid");
    b.start_eval().int(5).end_eval();
    b.function_return();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "xmid5y\n");
}

#[test]
fn test_reference_parameter_writes_back() {
    let mut b = StoryBuilder::new();
    let add_ten = b.label();
    b.start_eval().int(1).end_eval().define_temp("t");
    b.start_eval()
        .value_pointer("t", false)
        .function(add_ten)
        .op(Command::Pop)
        .end_eval();
    b.start_eval().push_variable("t").output().end_eval();
    b.newline().end();

    b.place(add_ten);
    b.define_temp("n");
    b.start_eval()
        .push_variable("n")
        .int(10)
        .op(Command::Add)
        .end_eval()
        .set_variable("n");
    b.start_eval().void().end_eval();
    b.function_return();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_one_line().expect("line"), Some("11".to_string()));
}

#[test]
fn test_divert_through_variable() {
    let mut b = StoryBuilder::new();
    let target = b.label();
    b.start_eval().divert_val(target).end_eval().define_temp("dest");
    b.divert_to_variable("dest");
    b.text("missed").newline().end();

    b.place(target);
    b.text("landed").newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "landed\n");
}

#[test]
fn test_calls_through_variables() {
    let mut b = StoryBuilder::new();
    let tunnel = b.label();
    let triple = b.label();
    b.start_eval().divert_val(tunnel).end_eval().define_temp("tunnel");
    b.start_eval().divert_val(triple).end_eval().define_temp("func");
    b.tunnel_to_variable("tunnel");
    b.start_eval()
        .int(2)
        .function_to_variable("func")
        .output()
        .end_eval();
    b.newline().end();

    b.place(tunnel);
    b.text("Through").newline();
    b.tunnel_return();

    b.place(triple);
    b.define_temp("n");
    b.start_eval()
        .push_variable("n")
        .int(3)
        .op(Command::Multiply)
        .end_eval();
    b.function_return();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "Through\n6\n");
}

#[test]
fn test_redefine_creates_global() {
    let mut b = StoryBuilder::new();
    b.start_eval().int(4).end_eval().redefine_variable("fresh");
    b.start_eval().push_variable("fresh").output().end_eval();
    b.newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_one_line().expect("line"), Some("4".to_string()));
    assert_eq!(
        runner.globals().get_variable("fresh").expect("get"),
        Some(HostValue::Int(4))
    );

    let mut b = StoryBuilder::new();
    b.start_eval().int(4).end_eval().set_variable("fresh");
    b.text("unreachable").newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    let err = runner.advance_one_line().expect_err("Assignment should fail");
    assert!(matches!(err.root(), RuntimeError::UnknownVariable { .. }));
}

#[test]
fn test_fallthrough_continues_and_stops_at_end() {
    let mut b = StoryBuilder::new();
    let out = b.label();
    let past_end = b.label();
    let inner = b.begin_container("inner", ContainerFlags::TRACK_VISITS);
    b.text("in").newline();
    b.fallthrough(out);
    b.text("skipped").newline();
    b.place(out);
    b.end_container(inner);
    b.text("after").newline();
    b.fallthrough(past_end);
    b.text("never").newline();
    b.place(past_end);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_one_line().expect("line"), Some("in".to_string()));
    assert_eq!(runner.advance_one_line().expect("line"), Some("after".to_string()));
    assert!(!runner.can_continue());
    assert_eq!(runner.globals().visits("inner").expect("visits"), Some(1));
}

#[test]
fn test_invisible_default_is_taken() {
    let mut b = StoryBuilder::new();
    let target = b.label();
    b.text("Start").newline();
    b.start_eval().text("hidden").end_eval();
    b.choice(
        target,
        ChoiceFlags::HAS_START_CONTENT | ChoiceFlags::IS_INVISIBLE_DEFAULT,
    );
    b.done();
    b.place(target);
    b.text("Default taken").newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_one_line().expect("line"), Some("Start".to_string()));
    assert!(!runner.has_choices());
    assert!(runner.can_continue());
    assert_eq!(
        runner.advance_one_line().expect("line"),
        Some("Default taken".to_string())
    );
    assert!(!runner.can_continue());
}

#[test]
fn test_shuffle_sequence_visits_every_element() {
    let mut b = StoryBuilder::new();
    let shuffle = b.begin_container("shuffle", ContainerFlags::empty());
    for count in 0..3 {
        b.start_eval()
            .int(count)
            .int(3)
            .op(Command::Sequence)
            .output()
            .end_eval();
        b.newline();
    }
    b.end();
    b.end_container(shuffle);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    let text = runner.advance_all().expect("Execution failed");
    let mut picks: Vec<&str> = text.lines().collect();
    picks.sort_unstable();
    assert_eq!(picks, vec!["0", "1", "2"]);
}

#[test]
fn test_count_start_only_ignores_mid_entry() {
    let mut b = StoryBuilder::new();
    let middle_a = b.label();
    let middle_b = b.label();
    b.divert(middle_a);

    let a = b.begin_container(
        "start_only",
        ContainerFlags::TRACK_VISITS | ContainerFlags::COUNT_START_ONLY,
    );
    b.text("a-start").newline();
    b.place(middle_a);
    b.text("a-middle").newline();
    b.divert(middle_b);
    b.end_container(a);

    let c = b.begin_container("anywhere", ContainerFlags::TRACK_VISITS);
    b.text("b-start").newline();
    b.place(middle_b);
    b.text("b-middle").newline();
    b.end();
    b.end_container(c);
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(
        runner.advance_all().expect("Execution failed"),
        "a-middle\nb-middle\n"
    );
    assert_eq!(runner.globals().visits("start_only").expect("visits"), Some(0));
    assert_eq!(runner.globals().visits("anywhere").expect("visits"), Some(1));
}

#[test]
fn test_fixed_eval_stack_overflows() {
    let mut b = StoryBuilder::new();
    b.start_eval()
        .int(1)
        .int(2)
        .int(3)
        .op(Command::Add)
        .op(Command::Add)
        .output()
        .end_eval();
    b.newline().end();
    let story = load(&b);

    let mut roomy = story.new_runner(None).expect("Runner creation failed");
    assert_eq!(roomy.advance_all().expect("Execution failed"), "6\n");

    let globals = story.new_globals_with(RuntimeConfig::new().with_eval_stack(Limit::Fixed(2)));
    let mut tight = story.new_runner(Some(&globals)).expect("Runner creation failed");
    let err = tight.advance_one_line().expect_err("Third push should overflow");
    assert!(matches!(
        err.root(),
        RuntimeError::CapacityExceeded { capacity: 2, .. }
    ));
    assert!(!tight.can_continue());
}

#[test]
fn test_empty_list_expands_to_all_items() {
    let mut b = StoryBuilder::new();
    let colour = b.declare_list("colour", &[("red", 1), ("green", 2), ("blue", 3)]);
    let empty = b.empty_list_of(colour);
    b.start_eval().list(empty).op(Command::ListCount).output().end_eval().newline();
    b.start_eval().list(empty).op(Command::ListAll).output().end_eval().newline();
    b.end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(
        runner.advance_all().expect("Execution failed"),
        "0\nred, green, blue\n"
    );
}

#[test]
fn test_temporary_list_reassignment() {
    let mut b = StoryBuilder::new();
    let colour = b.declare_list("colour", &[("red", 1), ("green", 2), ("blue", 3)]);
    let red = b.list_literal(&[(colour, 0)]);
    let blue = b.list_literal(&[(colour, 2)]);
    b.start_eval().list(red).end_eval().define_temp("c");
    b.start_eval().list(blue).end_eval().set_variable("c");
    b.start_eval().push_variable("c").output().end_eval();
    b.newline().end();
    let story = load(&b);
    let mut runner = story.new_runner(None).expect("Runner creation failed");

    assert_eq!(runner.advance_all().expect("Execution failed"), "blue\n");
}
