//! Terminal story player built on [ratatui](https://github.com/ratatui-org/ratatui).
//!
//! The UI is organized into three layers:
//!
//! - **[`app`]**: player state, keyboard event loop, pane focus, choice selection
//! - **[`panes`]**: stateless render functions for each visible pane (story text,
//!   choices, runner state, status bar)
//! - **[`theme`]**: centralized color palette used by all panes
//!
//! The entry point for consumers is [`App`]: construct it with a [`Runner`] and
//! call [`App::run`] to start the event loop.
//!
//! [`Runner`]: crate::interpreter::engine::Runner
//! [`App::run`]: app::App::run

pub mod app;
pub mod panes;
pub mod theme;

pub use app::App;
