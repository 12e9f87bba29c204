// Snapshot round trips through bytes

use inkvm::interpreter::command::{ChoiceFlags, ContainerFlags};
use inkvm::story::builder::StoryBuilder;
use inkvm::{HostValue, RuntimeError, Snapshot, Story};
use std::rc::Rc;

fn story() -> Rc<Story> {
    let mut b = StoryBuilder::new();
    let go = b.label();
    let stay = b.label();

    b.tag("title: Snap");
    b.text("Start").newline();
    b.start_eval().text("Go").end_eval();
    b.choice(go, ChoiceFlags::HAS_START_CONTENT);
    b.start_eval().text("Stay").end_eval();
    b.choice(stay, ChoiceFlags::HAS_START_CONTENT);
    b.done();

    b.place(go);
    let g = b.begin_container("go", ContainerFlags::TRACK_VISITS | ContainerFlags::IS_KNOT);
    b.text("Gone with courage ")
        .start_eval()
        .push_variable("courage")
        .output()
        .end_eval()
        .newline();
    b.end();
    b.end_container(g);

    b.place(stay);
    b.text("Stayed").newline().end();

    let decl = b.begin_global_decl();
    b.start_eval().int(0).end_eval().set_variable("courage");
    b.end_container(decl);
    b.end();

    Story::from_bytes(&b.build().expect("Story build failed")).expect("Story load failed")
}

#[test]
fn test_resume_at_choice() {
    let story = story();
    let mut runner = story.new_runner(None).expect("Runner creation failed");
    assert_eq!(runner.advance_all().expect("Execution failed"), "Start\n");
    assert!(runner.globals().set_variable("courage", 3).expect("set"));

    let bytes = runner
        .create_snapshot()
        .expect("Snapshot failed")
        .to_bytes()
        .to_vec();

    let snapshot = Snapshot::from_bytes(bytes).expect("Snapshot rejected");
    assert_eq!(snapshot.num_runners(), 1);
    let globals = story
        .new_globals_from_snapshot(&snapshot)
        .expect("Globals load failed");
    let mut resumed = story
        .new_runner_from_snapshot(&snapshot, &globals, 0)
        .expect("Runner load failed");

    assert_eq!(
        globals.get_variable("courage").expect("get"),
        Some(HostValue::Int(3))
    );
    assert_eq!(resumed.num_choices(), 2);
    assert_eq!(resumed.choice(1).expect("choice").text(), "Stay");
    assert_eq!(resumed.get_global_tag(0).as_deref(), Some("title: Snap"));

    resumed.choose(0).expect("Choice failed");
    runner.choose(0).expect("Choice failed");
    let expected = runner.advance_all().expect("Execution failed");
    assert_eq!(expected, "Gone with courage 3\n");
    assert_eq!(resumed.advance_all().expect("Execution failed"), expected);
    assert_eq!(globals.visits("go").expect("visits"), Some(1));
    assert_eq!(globals.turn().expect("turn"), 1);
}

#[test]
fn test_resume_mid_story() {
    let story = story();
    let mut runner = story.new_runner(None).expect("Runner creation failed");
    let snapshot = runner.create_snapshot().expect("Snapshot failed");

    let globals = story
        .new_globals_from_snapshot(&snapshot)
        .expect("Globals load failed");
    let mut resumed = story
        .new_runner_from_snapshot(&snapshot, &globals, 0)
        .expect("Runner load failed");

    assert_eq!(
        resumed.advance_all().expect("Execution failed"),
        runner.advance_all().expect("Execution failed")
    );
}

#[test]
fn test_every_runner_is_captured() {
    let story = story();
    let globals = story.new_globals();
    let mut first = story.new_runner(Some(&globals)).expect("Runner creation failed");
    let _second = story.new_runner(Some(&globals)).expect("Runner creation failed");
    first.advance_all().expect("Execution failed");

    let snapshot = globals.create_snapshot().expect("Snapshot failed");
    assert_eq!(snapshot.num_runners(), 2);

    let restored = story
        .new_globals_from_snapshot(&snapshot)
        .expect("Globals load failed");
    let a = story
        .new_runner_from_snapshot(&snapshot, &restored, 0)
        .expect("Runner load failed");
    let b = story
        .new_runner_from_snapshot(&snapshot, &restored, 1)
        .expect("Runner load failed");
    assert_eq!(a.num_choices(), 2);
    assert!(b.can_continue());
    assert!(!b.has_choices());

    assert!(matches!(
        story.new_runner_from_snapshot(&snapshot, &restored, 2),
        Err(RuntimeError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn test_runner_needs_snapshot_globals() {
    let story = story();
    let runner = story.new_runner(None).expect("Runner creation failed");
    let snapshot = runner.create_snapshot().expect("Snapshot failed");

    let fresh = story.new_globals();
    assert!(matches!(
        story.new_runner_from_snapshot(&snapshot, &fresh, 0),
        Err(RuntimeError::SnapshotMismatch { .. })
    ));
}

#[test]
fn test_garbage_is_rejected() {
    assert!(matches!(
        Snapshot::from_bytes(b"not a snapshot at all".to_vec()),
        Err(RuntimeError::CorruptSnapshot { .. })
    ));
    assert!(matches!(
        Snapshot::from_bytes(Vec::new()),
        Err(RuntimeError::CorruptSnapshot { .. })
    ));
}
