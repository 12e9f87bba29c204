//! # Introduction
//!
//! inkvm runs compiled [ink](https://www.inklestudios.com/ink/) stories: a
//! branching-narrative bytecode of text, glue, choices, diverts, knots, tunnels,
//! functions and threads. A host loads a [`Story`], creates [`Globals`] and one or
//! more [`Runner`]s on it, and pulls text out line by line, choosing between the
//! options the story presents.
//!
//! ## Execution pipeline
//!
//! ```text
//! story.bin → Story → Globals ← Runner → lines, tags, choices → host
//!                        ↕          ↕
//!                      Snapshot (bytes)
//! ```
//!
//! 1. [`story`] parses and validates the binary and offers a
//!    [`story::builder::StoryBuilder`] that assembles one.
//! 2. [`interpreter`] steps the bytecode, looking past each newline for glue.
//! 3. [`memory`] holds the value model and the restorable collections the
//!    lookahead checkpoints.
//! 4. [`globals`] owns variables, visit counts, runtime strings and lists,
//!    shared by every runner of one story.
//! 5. [`snapshot`] serialises globals and runners to bytes and back.
//! 6. [`ui`] is the ratatui story player; not part of the stable library API.
//!
//! ## Example
//!
//! ```ignore
//! let story = Story::from_file("story.bin")?;
//! let mut runner = story.new_runner(None)?;
//! while runner.can_continue() {
//!     print!("{}", runner.advance_all()?);
//!     if runner.has_choices() {
//!         runner.choose(0)?;
//!     }
//! }
//! ```

pub mod config;
pub mod globals;
pub mod interpreter;
pub mod memory;
pub mod snapshot;
pub mod story;
pub mod ui;

pub use config::{Limit, RuntimeConfig};
pub use globals::Globals;
pub use interpreter::choices::Choice;
pub use interpreter::engine::Runner;
pub use interpreter::errors::RuntimeError;
pub use memory::value::{hash_string, Hash, HostValue};
pub use snapshot::Snapshot;
pub use story::Story;
