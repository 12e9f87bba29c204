//! Choice presentation and selection
//!
//! CHOICE instructions build [`Choice`]s from the evaluated content on the eval
//! stack. Choosing one resumes the thread that offered it at its done point, collapses
//! the callstack onto that thread and diverts into the choice's target.

use super::command::{ChoiceFlags, Instruction};
use super::engine::RunnerState;
use super::errors::RuntimeError;
use crate::memory::value::Value;
use log::debug;

/// One option offered to the player
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub(crate) index: usize,
    pub(crate) text: String,
    pub(crate) path: u32,
    pub(crate) thread: Option<u32>,
    pub(crate) tags: Vec<String>,
}

impl Choice {
    /// Position in the runner's current choice list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Offset execution continues at when the choice is taken
    pub fn path(&self) -> u32 {
        self.path
    }

    /// Thread that offered the choice, `None` for the main flow
    pub fn thread(&self) -> Option<u32> {
        self.thread
    }
}

impl RunnerState {
    pub(crate) fn add_choice(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let flags = ChoiceFlags::from_bits_truncate(inst.flag);
        let path = inst.payload;

        let visible = if flags.contains(ChoiceFlags::HAS_CONDITION) {
            self.pop_truthy()?
        } else {
            true
        };
        let start = if flags.contains(ChoiceFlags::HAS_START_CONTENT) {
            Some(self.eval.pop()?)
        } else {
            None
        };
        let choice_only = if flags.contains(ChoiceFlags::HAS_CHOICE_ONLY_CONTENT) {
            Some(self.eval.pop()?)
        } else {
            None
        };

        let already_taken = if flags.contains(ChoiceFlags::IS_ONCE_ONLY) {
            match self.story.container_at(path) {
                Some(container) => self.globals.borrow()?.visits(container)? > 0,
                None => false,
            }
        } else {
            false
        };
        if !visible || already_taken {
            self.regs.choice_tag_mark = None;
            return Ok(());
        }

        let text = {
            let g = self.globals.borrow()?;
            let texts = g.texts();
            self.output.append(Value::Marker, &texts)?;
            for part in [start, choice_only].into_iter().flatten() {
                self.output.append(part, &texts)?;
            }
            self.output.extract(&texts)?
        };
        let tags = self.take_choice_tags();

        let choice = Choice {
            index: self.choices.len(),
            text: text.trim().to_string(),
            path,
            thread: self.current_thread(),
            tags,
        };
        if flags.contains(ChoiceFlags::IS_INVISIBLE_DEFAULT) {
            self.regs.fallback = Some(choice);
        } else {
            self.choices.push(choice)?;
        }
        Ok(())
    }

    pub(crate) fn choose(&mut self, index: usize) -> Result<(), RuntimeError> {
        let choice = self
            .choices
            .get(index)
            .cloned()
            .ok_or(RuntimeError::InvalidChoice {
                index,
                available: self.choices.len(),
            })?;
        debug!("choose {}: {:?}", index, choice.text);
        self.follow_choice(&choice).inspect_err(|_| self.reset())
    }

    /// Resume the offering thread and divert into the choice's target
    pub(crate) fn follow_choice(&mut self, choice: &Choice) -> Result<(), RuntimeError> {
        let resume = match choice.thread {
            None => self.regs.done,
            Some(thread) => self.thread_done_point(thread),
        }
        .ok_or(RuntimeError::MissingDonePoint)?;

        self.regs.falling = false;
        self.regs.eval_mode = false;
        self.jump(resume, false)?;
        self.regs.done = None;

        self.callstack.collapse_to_thread(choice.thread)?;
        self.threads.clear();
        self.thread_done.clear();

        self.jump(choice.path, true)?;
        self.choices.clear();
        self.regs.fallback = None;
        self.tags.line.clear();
        self.globals.borrow_mut()?.next_turn();
        Ok(())
    }

    fn thread_done_point(&self, thread: u32) -> Option<u32> {
        self.thread_done
            .iter_rev()
            .find(|(t, _)| *t == thread)
            .and_then(|(_, point)| *point)
    }
}
