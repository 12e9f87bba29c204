//! Main TUI application state and logic

use super::panes::{self, StateRenderData, StoryLine};
use crate::interpreter::choices::Choice;
use crate::interpreter::engine::Runner;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use log::{info, warn};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Which pane is currently focused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusedPane {
    Story,
    Choices,
    State,
}

impl FocusedPane {
    /// Move focus to the next pane (story -> choices -> state)
    pub fn next(self) -> Self {
        match self {
            FocusedPane::Story => FocusedPane::Choices,
            FocusedPane::Choices => FocusedPane::State,
            FocusedPane::State => FocusedPane::Story,
        }
    }
}

/// The main application state
pub struct App {
    /// The runner being played
    pub runner: Runner,

    /// Text read so far, with echoed choices and errors
    pub lines: Vec<StoryLine>,

    /// Choices on offer, refreshed after every step
    pub choices: Vec<Choice>,
    pub selected_choice: usize,

    /// Currently focused pane
    pub focused_pane: FocusedPane,

    /// Per-pane scroll offsets
    pub story_scroll: usize,
    pub state_scroll: usize,

    /// Number of story lines read
    pub lines_read: usize,

    /// Where `s` writes a snapshot
    pub snapshot_path: PathBuf,

    /// Whether the last action failed
    pub has_error: bool,

    /// Whether the app should quit
    pub should_quit: bool,

    /// Status message to display
    pub status_message: String,
}

impl App {
    /// Create a new app playing `runner`
    pub fn new(runner: Runner, snapshot_path: PathBuf) -> Self {
        let choices = runner.choices();
        App {
            runner,
            lines: Vec::new(),
            choices,
            selected_choice: 0,
            focused_pane: FocusedPane::Story,
            story_scroll: 0,
            state_scroll: 0,
            lines_read: 0,
            snapshot_path,
            has_error: false,
            should_quit: false,
            status_message: String::from("Ready!"),
        }
    }

    /// Run the TUI application
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;

            if self.should_quit {
                break;
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key_event(key);
                    }
                }
            }
        }

        Ok(())
    }

    /// Render the UI
    fn render(&mut self, frame: &mut Frame) {
        let size = frame.area();

        // Story pane on the left, choices and state on the right, status bar at the bottom
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(size);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(main_chunks[0]);

        let right_rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(columns[1]);

        panes::render_story_pane(
            frame,
            columns[0],
            &self.lines,
            self.focused_pane == FocusedPane::Story,
            &mut self.story_scroll,
        );

        let can_continue = self.runner.can_continue();
        panes::render_choices_pane(
            frame,
            right_rows[0],
            &self.choices,
            self.selected_choice,
            can_continue,
            self.focused_pane == FocusedPane::Choices,
        );

        let global_tags: Vec<String> = (0..self.runner.num_global_tags())
            .filter_map(|i| self.runner.get_global_tag(i))
            .collect();
        let knot_tags: Vec<String> = (0..self.runner.num_knot_tags())
            .filter_map(|i| self.runner.get_knot_tag(i))
            .collect();
        let globals = self.runner.globals();
        let variables = globals.variables().unwrap_or_default();
        panes::render_state_pane(
            frame,
            right_rows[1],
            StateRenderData {
                turn: globals.turn().unwrap_or(0),
                knot: self.runner.current_knot(),
                global_tags: &global_tags,
                knot_tags: &knot_tags,
                variables: &variables,
            },
            self.focused_pane == FocusedPane::State,
            &mut self.state_scroll,
        );

        panes::render_status_bar(
            frame,
            main_chunks[1],
            &self.status_message,
            self.lines_read,
            self.has_error,
            can_continue,
            self.choices.len(),
        );
    }

    /// Handle keyboard events
    fn handle_key_event(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => {
                self.should_quit = true;
            }
            KeyCode::Char(c @ '1'..='9') => {
                if let Some(n) = c.to_digit(10) {
                    self.choose(n as usize - 1);
                }
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                self.save_snapshot();
            }
            KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
            }
            KeyCode::Right | KeyCode::Char(' ') => {
                self.advance();
            }
            KeyCode::Enter => {
                if self.runner.can_continue() {
                    self.advance();
                } else {
                    self.choose(self.selected_choice);
                }
            }
            KeyCode::Up => match self.focused_pane {
                FocusedPane::Story => self.story_scroll = self.story_scroll.saturating_sub(1),
                FocusedPane::Choices => {
                    self.selected_choice = self.selected_choice.saturating_sub(1);
                }
                FocusedPane::State => self.state_scroll = self.state_scroll.saturating_sub(1),
            },
            KeyCode::Down => match self.focused_pane {
                FocusedPane::Story => self.story_scroll = self.story_scroll.saturating_add(1),
                FocusedPane::Choices => {
                    if self.selected_choice + 1 < self.choices.len() {
                        self.selected_choice += 1;
                    }
                }
                FocusedPane::State => self.state_scroll = self.state_scroll.saturating_add(1),
            },
            _ => {}
        }
    }

    /// Read the next line of story text
    fn advance(&mut self) {
        if !self.runner.can_continue() {
            self.status_message = if self.choices.is_empty() {
                "The story has ended".to_string()
            } else {
                "Pick a choice to continue".to_string()
            };
            return;
        }
        match self.runner.advance_one_line() {
            Ok(Some(text)) => {
                let tags = (0..self.runner.num_tags())
                    .filter_map(|i| self.runner.get_tag(i))
                    .collect();
                self.lines.push(StoryLine::Text { text, tags });
                self.lines_read += 1;
                self.has_error = false;
                self.status_message = "Continued".to_string();
            }
            Ok(None) => {
                self.status_message = "No more text".to_string();
            }
            Err(e) => {
                warn!("story error: {}", e);
                self.lines.push(StoryLine::Error(e.to_string()));
                self.has_error = true;
                self.status_message = "Runtime error, the runner was reset".to_string();
            }
        }
        self.refresh_choices();
        // Auto-scroll story to bottom
        self.story_scroll = usize::MAX;
    }

    fn choose(&mut self, index: usize) {
        let Some(text) = self.choices.get(index).map(|c| c.text().to_string()) else {
            self.status_message = format!("No choice {}", index + 1);
            return;
        };
        match self.runner.choose(index) {
            Ok(()) => {
                self.lines.push(StoryLine::Chosen(text));
                self.has_error = false;
                self.status_message = format!("Chose {}", index + 1);
            }
            Err(e) => {
                self.lines.push(StoryLine::Error(e.to_string()));
                self.has_error = true;
                self.status_message = "Choice failed".to_string();
            }
        }
        self.refresh_choices();
        self.story_scroll = usize::MAX;
    }

    fn refresh_choices(&mut self) {
        self.choices = self.runner.choices();
        self.selected_choice = 0;
    }

    /// Write globals and runners to the snapshot file
    fn save_snapshot(&mut self) {
        let result = self
            .runner
            .create_snapshot()
            .map_err(|e| e.to_string())
            .and_then(|snapshot| {
                std::fs::write(&self.snapshot_path, snapshot.to_bytes())
                    .map(|()| snapshot.len())
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(len) => {
                info!("wrote {} byte snapshot to {}", len, self.snapshot_path.display());
                self.has_error = false;
                self.status_message = format!("Saved {} bytes to {}", len, self.snapshot_path.display());
            }
            Err(message) => {
                warn!("snapshot failed: {}", message);
                self.has_error = true;
                self.status_message = format!("Snapshot failed: {}", message);
            }
        }
    }
}
