//! TUI pane rendering modules
//!
//! This module provides the rendering logic for all visual panes in the player.
//!
//! # Pane Modules
//!
//! - [`story`]: Story text produced so far, with the tags of each line
//! - [`choices`]: Options currently presented by the runner
//! - [`state`]: Turn, current knot, tags and global variables
//! - [`status`]: Status bar with keybindings and runner state
//!
//! Each pane module exports a primary `render_*` function that draws from
//! borrowed data and the pane's scroll offset.

pub mod choices;
pub mod state;
pub mod status;
pub mod story;

pub use choices::render_choices_pane;
pub use state::{render_state_pane, StateRenderData};
pub use status::render_status_bar;
pub use story::{render_story_pane, StoryLine};

use crate::ui::theme::DEFAULT_THEME;
use ratatui::style::{Modifier, Style};

/// Border style shared by every pane
pub(crate) fn border_style(is_focused: bool) -> Style {
    if is_focused {
        Style::default()
            .fg(DEFAULT_THEME.border_focused)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DEFAULT_THEME.border_normal)
    }
}

/// Clamp `offset` so the last page stays full, and return the visible row count
pub(crate) fn clamp_scroll(offset: &mut usize, total_items: usize, height: u16) -> usize {
    let visible_height = height.saturating_sub(2).max(1) as usize; // Account for borders, min 1
    if total_items > visible_height {
        *offset = (*offset).min(total_items - visible_height);
    } else {
        *offset = 0;
    }
    visible_height
}
