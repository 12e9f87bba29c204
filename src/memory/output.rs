//! Output stream
//!
//! Text, numbers and structural elements (newline, glue, markers, function
//! boundaries) are appended here as the story runs. Whitespace rules are applied
//! twice:
//!
//! - on append: a leading newline is dropped, a newline right after a function start
//!   is ignored, and glue or a function end blanks the run of newlines and
//!   whitespace-only strings before it (in place, so a checkpoint can undo it)
//! - on extraction: repeated newlines and newlines after glue are skipped, runs of
//!   whitespace collapse to one space, spaces around newlines and at both ends are
//!   trimmed
//!
//! A [`Value::Marker`] opens a region (a string being built, a choice's text, a
//! dynamic tag); extraction reads from the last marker and truncates the stream back
//! to it.

use super::restorable::RestorableStack;
use super::value::Value;
use super::{is_whitespace, TextSource};
use crate::config::Limit;
use crate::interpreter::errors::RuntimeError;

#[derive(Debug, Clone)]
pub struct OutputStream {
    data: RestorableStack<Value>,
}

impl OutputStream {
    pub fn new(limit: Limit) -> Self {
        OutputStream {
            data: RestorableStack::new("output stream", limit),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Last visible element
    pub fn last(&self) -> Option<&Value> {
        self.data.top().ok()
    }

    pub fn append<S>(&mut self, value: Value, text: &S) -> Result<(), RuntimeError>
    where
        S: TextSource + ?Sized,
    {
        match value {
            // void prints nothing
            Value::Null => return Ok(()),
            Value::Newline if self.data.is_empty() => return Ok(()),
            Value::Newline if matches!(self.last(), Some(Value::FuncStart)) => return Ok(()),
            _ => {}
        }

        self.data.push(value)?;

        if matches!(value, Value::Glue | Value::FuncEnd) {
            self.trim_before_top(text)?;
        }
        Ok(())
    }

    /// Blank out newlines and whitespace-only strings directly below the top
    fn trim_before_top<S>(&mut self, text: &S) -> Result<(), RuntimeError>
    where
        S: TextSource + ?Sized,
    {
        let mut i = self.data.len() - 1;
        while i > 0 {
            i -= 1;
            let blank = match self.data.get(i) {
                Some(Value::Null) => continue,
                Some(Value::Newline) => true,
                Some(Value::Str(chain)) => is_whitespace(&text.chain_text(chain)?),
                _ => false,
            };
            if !blank {
                break;
            }
            self.data.set(i, Value::Null)?;
        }
        Ok(())
    }

    pub fn ends_with_newline(&self) -> bool {
        matches!(self.last(), Some(Value::Newline))
    }

    /// Whether the element just below the save point is still a newline
    pub fn saved_ends_with_newline(&self) -> Result<bool, RuntimeError> {
        let save = self.data.save_point().ok_or(RuntimeError::NotSaved {
            collection: self.data.name(),
        })?;
        if save == 0 {
            return Ok(false);
        }
        Ok(matches!(self.data.get(save - 1), Some(Value::Newline)))
    }

    /// Whether printable, non-whitespace content was appended since the save point
    pub fn text_past_save<S>(&self, text: &S) -> Result<bool, RuntimeError>
    where
        S: TextSource + ?Sized,
    {
        let save = self.data.save_point().ok_or(RuntimeError::NotSaved {
            collection: self.data.name(),
        })?;
        for i in save..self.data.len() {
            if let Some(value) = self.data.get(i) {
                if let Some(rendered) = text.render(value)? {
                    if !rendered.is_empty() && !is_whitespace(&rendered) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Whether anything printable and non-blank is queued
    pub fn has_text<S>(&self, text: &S) -> Result<bool, RuntimeError>
    where
        S: TextSource + ?Sized,
    {
        for value in self.data.iter() {
            if let Some(rendered) = text.render(value)? {
                if !rendered.is_empty() && !is_whitespace(&rendered) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn has_marker(&self) -> bool {
        self.data.iter().any(|v| matches!(v, Value::Marker))
    }

    /// Index of the last marker, or 0
    fn find_start(&self) -> Result<usize, RuntimeError> {
        let start = (0..self.data.len())
            .rev()
            .find(|i| matches!(self.data.get(*i), Some(Value::Marker)))
            .unwrap_or(0);
        if let Some(save) = self.data.save_point() {
            if start < save {
                return Err(RuntimeError::OutputBehindSave { start, save });
            }
        }
        Ok(start)
    }

    /// Render everything since the last marker and truncate back to it
    pub fn extract<S>(&mut self, text: &S) -> Result<String, RuntimeError>
    where
        S: TextSource + ?Sized,
    {
        let start = self.find_start()?;
        let mut raw = String::new();
        let mut has_glue = false;
        let mut last_newline = false;
        for i in start..self.data.len() {
            let Some(value) = self.data.get(i) else {
                break;
            };
            match value {
                Value::Newline => {
                    if last_newline || has_glue {
                        continue;
                    }
                    last_newline = true;
                    raw.push('\n');
                }
                Value::Glue => has_glue = true,
                other => {
                    if let Some(rendered) = text.render(other)? {
                        has_glue = false;
                        last_newline = false;
                        raw.push_str(&rendered);
                    }
                }
            }
        }
        self.data.truncate(start)?;
        Ok(collapse_whitespace(&raw))
    }

    pub fn save(&mut self) -> Result<(), RuntimeError> {
        self.data.save()
    }

    pub fn restore(&mut self) -> Result<(), RuntimeError> {
        self.data.restore()
    }

    pub fn forget(&mut self) -> Result<(), RuntimeError> {
        self.data.forget()
    }

    pub fn is_saved(&self) -> bool {
        self.data.is_saved()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Every stored element, including ones hidden by the checkpoint
    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.data.iter_all()
    }

    /// Visible elements, for serialisation
    pub fn to_vec(&self) -> Vec<Value> {
        self.data.to_vec()
    }

    pub fn replace(&mut self, values: Vec<Value>) -> Result<(), RuntimeError> {
        self.data.replace(values)
    }
}

/// Collapse whitespace runs to one space, drop spaces next to newlines, trim the
/// front and trailing spaces
fn collapse_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        match c {
            ' ' | '\t' => pending_space = true,
            '\n' => {
                pending_space = false;
                if !out.is_empty() {
                    out.push('\n');
                }
            }
            _ => {
                if pending_space && !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }
    out
}
