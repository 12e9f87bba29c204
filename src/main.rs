// inkvm: terminal player for compiled ink stories

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use env_logger::{Env, Target};
use log::info;
use ratatui::{backend::CrosstermBackend, Terminal};

use inkvm::interpreter::command::{ChoiceFlags, Command, ContainerFlags};
use inkvm::story::builder::StoryBuilder;
use inkvm::ui::App;
use inkvm::{Runner, RuntimeError, Snapshot, Story};

/// Log to a file; the terminal belongs to the player
fn init_logging() -> io::Result<()> {
    let file = File::create("inkvm.log")?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

/// A short story exercising choices, knots, tags and a global
fn demo_story() -> Result<Rc<Story>, RuntimeError> {
    let mut b = StoryBuilder::new();
    let door = b.label();
    let stay = b.label();

    b.tag("title: The Lantern");
    b.text("The lantern flickers as the wind picks up.").newline();
    b.text("Courage: ").start_eval().push_variable("courage").output().end_eval().newline();
    b.start_eval().text("Open the door").end_eval();
    b.choice(door, ChoiceFlags::HAS_START_CONTENT);
    b.start_eval().text("Stay by the fire").end_eval();
    b.choice(stay, ChoiceFlags::HAS_START_CONTENT);
    b.done();

    b.place(door);
    let d = b.begin_container("door", ContainerFlags::TRACK_VISITS | ContainerFlags::IS_KNOT);
    b.tag("location: outside");
    b.start_eval()
        .push_variable("courage")
        .int(1)
        .op(Command::Add)
        .end_eval()
        .set_variable("courage");
    b.text("You step into the night.").newline();
    b.glue().text(" The cold bites.").newline();
    b.end();
    b.end_container(d);

    b.place(stay);
    let s = b.begin_container("stay", ContainerFlags::TRACK_VISITS | ContainerFlags::IS_KNOT);
    b.text("You stay where it is warm.").newline();
    b.end();
    b.end_container(s);

    let decl = b.begin_global_decl();
    b.start_eval().int(0).end_eval().set_variable("courage");
    b.end_container(decl);
    b.end();

    Story::from_bytes(&b.build()?)
}

fn usage(program_name: &str) {
    eprintln!("Usage: {} <story.bin> [snapshot]", program_name);
    eprintln!("       {} --demo", program_name);
    eprintln!();
    eprintln!("Keys: → / space next line, 1-9 choose, ↵ continue or take the selected choice,");
    eprintln!("      tab switch pane, s write a snapshot, q quit");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let program_name = args.first().map(|s| s.as_str()).unwrap_or("inkvm");

    let Some(first) = args.get(1) else {
        eprintln!("Error: No story provided");
        eprintln!();
        usage(program_name);
        std::process::exit(1);
    };

    init_logging()?;

    let (story, snapshot_path) = if first == "--demo" {
        (demo_story()?, PathBuf::from("demo.snapshot"))
    } else {
        if !Path::new(first).exists() {
            eprintln!("Error: File '{}' not found", first);
            usage(program_name);
            std::process::exit(1);
        }
        let story = match Story::from_file(first) {
            Ok(story) => story,
            Err(e) => {
                eprintln!("Story error: {}", e);
                std::process::exit(1);
            }
        };
        (story, Path::new(first).with_extension("snapshot"))
    };

    let runner = match args.get(2) {
        Some(path) => {
            let snapshot = Snapshot::from_bytes(fs::read(path)?)?;
            info!("resuming from {} ({} runners)", path, snapshot.num_runners());
            let globals = story.new_globals_from_snapshot(&snapshot)?;
            story.new_runner_from_snapshot(&snapshot, &globals, 0)?
        }
        None => Runner::new(Rc::clone(&story), story.new_globals())?,
    };

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(runner, snapshot_path);
    let res = app.run(&mut terminal);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}
