//! Tag collection
//!
//! Tags seen before any content belong to the story (global tags) or, after a knot
//! is entered, to that knot. Every tag also lands on the line being produced.

use super::engine::RunnerState;
use super::errors::RuntimeError;

/// Which tag list new tags extend besides the line's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum TagPhase {
    #[default]
    Global,
    Knot,
    Line,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tags {
    pub phase: TagPhase,
    pub global: Vec<String>,
    pub knot: Vec<String>,
    pub line: Vec<String>,
}

impl Tags {
    /// A knot was entered: the tags at its top are collected afresh
    pub fn enter_knot(&mut self) {
        if self.phase != TagPhase::Global || !self.global.is_empty() {
            self.knot.clear();
        }
        self.phase = TagPhase::Knot;
    }

    /// Content was produced; further tags are line tags only
    pub fn content(&mut self) {
        self.phase = TagPhase::Line;
    }
}

impl RunnerState {
    pub(crate) fn add_tag(&mut self, tag: &str) -> Result<(), RuntimeError> {
        let tag = tag.trim().to_string();
        let limit = self.config.active_tags;
        if let Some(max) = limit.max() {
            if self.tags.line.len() >= max {
                return Err(RuntimeError::CapacityExceeded {
                    collection: "line tags",
                    capacity: max,
                });
            }
        }
        match self.tags.phase {
            TagPhase::Global => self.tags.global.push(tag.clone()),
            TagPhase::Knot => self.tags.knot.push(tag.clone()),
            TagPhase::Line => {}
        }
        self.tags.line.push(tag);
        Ok(())
    }

    /// Line tags added since the current choice text began
    pub(crate) fn take_choice_tags(&mut self) -> Vec<String> {
        match self.regs.choice_tag_mark.take() {
            Some(mark) if mark <= self.tags.line.len() => self.tags.line.split_off(mark),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knot_entry_resets_knot_tags() {
        let mut tags = Tags::default();
        tags.enter_knot();
        tags.knot.push("a".to_string());
        tags.content();
        tags.enter_knot();
        assert!(tags.knot.is_empty());
        assert_eq!(tags.phase, TagPhase::Knot);
    }
}
