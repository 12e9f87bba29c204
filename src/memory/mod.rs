//! Data model of the story runtime
//!
//! This module provides the collections and value types the interpreter runs on:
//! - [`value`]: Tagged runtime value, string chains, casting matrix, host values
//! - [`restorable`]: Stack with a single save / restore / forget checkpoint
//! - [`array`]: Fixed-length array with a shadow-buffer checkpoint
//! - [`output`]: Output stream with glue and whitespace rules
//! - [`callstack`]: Temporaries, function/tunnel frames and ink threads
//! - [`list_table`]: Bitset list values
//! - [`string_table`]: Runtime strings with mark-and-sweep collection
//!
//! # Checkpoints
//!
//! Everything a runner mutates while speculatively looking past a newline lives in
//! a restorable collection. The runner saves all of them together, and either
//! restores all of them (the lookahead found new content) or forgets the checkpoint
//! (the newline was glued away).

pub mod array;
pub mod callstack;
pub mod list_table;
pub mod output;
pub mod restorable;
pub mod string_table;
pub mod value;

use crate::interpreter::errors::RuntimeError;
use value::{format_float, ListFlag, ListId, StrChain, StrRef, Value};

/// Resolves string references and list handles to text
///
/// Implemented by the runner's view of its story and globals; the output stream and
/// the string operators render through it.
pub trait TextSource {
    /// Bytes of a string in the story's string section
    fn story_text(&self, offset: u32) -> Result<&str, RuntimeError>;

    /// Bytes of a runtime string
    fn heap_text(&self, id: u32) -> Result<&str, RuntimeError>;

    /// A list rendered as its flag names
    fn list_text(&self, id: ListId) -> Result<String, RuntimeError>;

    /// Name of a single flag
    fn flag_text(&self, flag: ListFlag) -> Result<String, RuntimeError>;

    fn part_text(&self, part: StrRef) -> Result<&str, RuntimeError> {
        match part {
            StrRef::Story(offset) => self.story_text(offset),
            StrRef::Heap(id) => self.heap_text(id),
        }
    }

    fn chain_text(&self, chain: &StrChain) -> Result<String, RuntimeError> {
        let mut text = String::new();
        for part in chain.parts() {
            text.push_str(self.part_text(*part)?);
        }
        Ok(text)
    }

    /// Printable text of a value, `None` for values that print nothing
    fn render(&self, value: &Value) -> Result<Option<String>, RuntimeError> {
        Ok(match value {
            Value::Int(i) => Some(i.to_string()),
            Value::Uint(u) => Some(u.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            Value::Str(chain) => Some(self.chain_text(chain)?),
            Value::List(id) => Some(self.list_text(*id)?),
            Value::ListFlag(flag) if flag.is_null() => Some(String::new()),
            Value::ListFlag(flag) => Some(self.flag_text(*flag)?),
            _ => None,
        })
    }
}

/// Whether `text` consists only of spaces and tabs
pub fn is_whitespace(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c == '\t')
}
