//! Assembler for story binaries
//!
//! [`StoryBuilder`] emits instructions into a growing buffer and writes the full
//! file layout on [`StoryBuilder::build`]. Diverts go through [`Label`]s, which are
//! back-patched once every label has been placed.
//!
//! ```ignore
//! let mut b = StoryBuilder::new();
//! let end = b.label();
//! b.text("Hello");
//! b.newline();
//! b.divert(end);
//! b.place(end);
//! b.end();
//! let bytes = b.build()?;
//! ```

use super::header::{Header, SECTION_ALIGN};
use super::{GLOBAL_DECL, ORIGIN_ONLY};
use crate::interpreter::command::{
    AssignmentFlags, CallFlags, ChoiceFlags, Command, ContainerFlags, DivertFlags,
};
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{hash_string, Hash};
use rustc_hash::FxHashMap;

/// A code location that can be diverted to before it is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// An open container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHandle(pub u32);

#[derive(Debug, Clone)]
struct BuiltContainer {
    parent: Option<u32>,
    flags: ContainerFlags,
    start: u32,
    end: Option<u32>,
    hash: Hash,
}

#[derive(Debug, Default)]
pub struct StoryBuilder {
    strings: Vec<u8>,
    string_index: FxHashMap<String, u32>,
    lists: Vec<(u32, Vec<(u32, i32)>)>,
    literals: Vec<Vec<(u16, u16)>>,
    containers: Vec<BuiltContainer>,
    open: Vec<u32>,
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
    paths: Vec<(Hash, u32)>,
    errors: Vec<String>,
}

impl StoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next instruction will be written at
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Offset of a string in the string section, adding it if new
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(offset) = self.string_index.get(text) {
            return *offset;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        self.string_index.insert(text.to_string(), offset);
        offset
    }

    // -- raw emission -----------------------------------------------------------

    /// Command without payload
    pub fn op(&mut self, command: Command) -> &mut Self {
        self.op_flag(command, 0)
    }

    pub fn op_flag(&mut self, command: Command, flag: u8) -> &mut Self {
        if command.has_payload() {
            self.errors
                .push(format!("{} needs a payload", command.mnemonic()));
        }
        self.code.push(command as u8);
        self.code.push(flag);
        self
    }

    /// Command with a 4-byte payload
    pub fn op_payload(&mut self, command: Command, flag: u8, payload: u32) -> &mut Self {
        if !command.has_payload() {
            self.errors
                .push(format!("{} takes no payload", command.mnemonic()));
        }
        self.code.push(command as u8);
        self.code.push(flag);
        self.code.extend_from_slice(&payload.to_ne_bytes());
        self
    }

    fn op_label(&mut self, command: Command, flag: u8, target: Label) -> &mut Self {
        self.code.push(command as u8);
        self.code.push(flag);
        self.fixups.push((self.code.len(), target));
        self.code.extend_from_slice(&0u32.to_ne_bytes());
        self
    }

    // -- labels, paths and containers -------------------------------------------

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn place(&mut self, label: Label) -> &mut Self {
        let offset = self.offset();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(offset),
            Some(Some(_)) => self.errors.push(format!("label {} placed twice", label.0)),
            None => self.errors.push(format!("label {} does not exist", label.0)),
        }
        self
    }

    /// New label placed at the current offset
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.place(label);
        label
    }

    /// Make the current offset addressable by `path`
    pub fn mark(&mut self, path: &str) -> &mut Self {
        let offset = self.offset();
        self.paths.push((hash_string(path), offset));
        self
    }

    /// Open a container; an empty `name` leaves it unaddressable
    pub fn begin_container(&mut self, name: &str, flags: ContainerFlags) -> ContainerHandle {
        let id = self.containers.len() as u32;
        let start = self.offset();
        let hash = if name.is_empty() { 0 } else { hash_string(name) };
        if hash != 0 {
            self.paths.push((hash, start));
        }
        self.containers.push(BuiltContainer {
            parent: self.open.last().copied(),
            flags,
            start,
            end: None,
            hash,
        });
        self.open.push(id);
        self.op_payload(Command::StartContainerMarker, flags.bits(), id);
        ContainerHandle(id)
    }

    pub fn end_container(&mut self, handle: ContainerHandle) -> &mut Self {
        if self.open.last() != Some(&handle.0) {
            self.errors
                .push(format!("container {} closed out of order", handle.0));
        }
        self.open.retain(|id| *id != handle.0);
        let end = self.offset();
        if let Some(c) = self.containers.get_mut(handle.0 as usize) {
            c.end = Some(end);
        }
        self.op_payload(Command::EndContainerMarker, 0, handle.0)
    }

    /// Open the container that initialises global variables
    pub fn begin_global_decl(&mut self) -> ContainerHandle {
        self.begin_container(GLOBAL_DECL, ContainerFlags::empty())
    }

    // -- lists ------------------------------------------------------------------

    /// Declare a list type; returns its index
    pub fn declare_list(&mut self, name: &str, flags: &[(&str, i32)]) -> usize {
        let name = self.intern(name);
        let flags = flags
            .iter()
            .map(|(flag, value)| (self.intern(flag), *value))
            .collect();
        self.lists.push((name, flags));
        self.lists.len() - 1
    }

    /// Declare a list literal from `(list, flag)` pairs; returns its index
    pub fn list_literal(&mut self, flags: &[(usize, usize)]) -> u32 {
        self.literals
            .push(flags.iter().map(|(l, f)| (*l as u16, *f as u16)).collect());
        (self.literals.len() - 1) as u32
    }

    /// Declare an empty list literal that still knows its origin list
    pub fn empty_list_of(&mut self, list: usize) -> u32 {
        self.literals.push(vec![(list as u16, ORIGIN_ONLY)]);
        (self.literals.len() - 1) as u32
    }

    // -- values -----------------------------------------------------------------

    pub fn text(&mut self, text: &str) -> &mut Self {
        let offset = self.intern(text);
        self.op_payload(Command::Str, 0, offset)
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        self.op_payload(Command::Int, 0, value as u32)
    }

    pub fn float(&mut self, value: f32) -> &mut Self {
        self.op_payload(Command::Float, 0, value.to_bits())
    }

    pub fn boolean(&mut self, value: bool) -> &mut Self {
        self.op_payload(Command::Bool, 0, value as u32)
    }

    pub fn list(&mut self, literal: u32) -> &mut Self {
        self.op_payload(Command::List, 0, literal)
    }

    pub fn divert_val(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::DivertVal, 0, target)
    }

    /// Pointer to a global (`global`) or a temporary of the current frame
    pub fn value_pointer(&mut self, name: &str, global: bool) -> &mut Self {
        self.op_payload(Command::ValuePointer, if global { 0 } else { 1 }, hash_string(name))
    }

    pub fn newline(&mut self) -> &mut Self {
        self.op(Command::Newline)
    }

    pub fn glue(&mut self) -> &mut Self {
        self.op(Command::Glue)
    }

    pub fn void(&mut self) -> &mut Self {
        self.op(Command::Void)
    }

    pub fn tag(&mut self, text: &str) -> &mut Self {
        let offset = self.intern(text);
        self.op_payload(Command::Tag, 0, offset)
    }

    // -- flow -------------------------------------------------------------------

    pub fn divert(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Divert, 0, target)
    }

    /// Divert taken when the popped condition is truthy
    pub fn divert_if(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Divert, DivertFlags::HAS_CONDITION.bits(), target)
    }

    /// Divert that falls out of the enclosing containers
    pub fn fallthrough(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Divert, DivertFlags::IS_FALLTHROUGH.bits(), target)
    }

    pub fn divert_to_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::DivertToVariable, 0, hash_string(name))
    }

    pub fn tunnel(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Tunnel, 0, target)
    }

    pub fn function(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Function, 0, target)
    }

    /// Ink fallback body for the CALL_EXTERNAL just emitted
    pub fn fallback_function(&mut self, target: Label) -> &mut Self {
        self.op_label(Command::Function, CallFlags::FALLBACK_FUNCTION.bits(), target)
    }

    pub fn function_to_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::Function, CallFlags::TO_VARIABLE.bits(), hash_string(name))
    }

    pub fn tunnel_to_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::Tunnel, CallFlags::TO_VARIABLE.bits(), hash_string(name))
    }

    /// Fork a thread into `target`
    pub fn thread(&mut self, target: Label) -> &mut Self {
        self.op(Command::Thread);
        self.divert(target)
    }

    pub fn done(&mut self) -> &mut Self {
        self.op(Command::Done)
    }

    pub fn end(&mut self) -> &mut Self {
        self.op(Command::End)
    }

    pub fn tunnel_return(&mut self) -> &mut Self {
        self.op(Command::TunnelReturn)
    }

    pub fn function_return(&mut self) -> &mut Self {
        self.op(Command::FunctionReturn)
    }

    pub fn call_external(&mut self, name: &str, arguments: u8) -> &mut Self {
        self.op_payload(Command::CallExternal, arguments, hash_string(name))
    }

    pub fn choice(&mut self, target: Label, flags: ChoiceFlags) -> &mut Self {
        self.op_label(Command::Choice, flags.bits(), target)
    }

    // -- variables --------------------------------------------------------------

    pub fn define_temp(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::DefineTemp, 0, hash_string(name))
    }

    pub fn set_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::SetVariable, 0, hash_string(name))
    }

    pub fn redefine_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(
            Command::SetVariable,
            AssignmentFlags::IS_REDEFINE.bits(),
            hash_string(name),
        )
    }

    pub fn push_variable(&mut self, name: &str) -> &mut Self {
        self.op_payload(Command::PushVariableValue, 0, hash_string(name))
    }

    pub fn read_count(&mut self, container: ContainerHandle) -> &mut Self {
        self.op_payload(Command::ReadCount, 0, container.0)
    }

    pub fn start_eval(&mut self) -> &mut Self {
        self.op(Command::StartEval)
    }

    pub fn end_eval(&mut self) -> &mut Self {
        self.op(Command::EndEval)
    }

    pub fn output(&mut self) -> &mut Self {
        self.op(Command::Output)
    }

    // -- output -----------------------------------------------------------------

    /// Write the story file
    pub fn build(&self) -> Result<Vec<u8>, RuntimeError> {
        let mut errors = self.errors.clone();
        if let Some(open) = self.open.last() {
            errors.push(format!("container {} is never closed", open));
        }

        let mut code = self.code.clone();
        for (pos, label) in &self.fixups {
            match self.labels.get(label.0).copied().flatten() {
                Some(offset) => code[*pos..*pos + 4].copy_from_slice(&offset.to_ne_bytes()),
                None => errors.push(format!("label {} is never placed", label.0)),
            }
        }

        let mut markers = Vec::new();
        for (id, c) in self.containers.iter().enumerate() {
            if c.start > 0x0fff_ffff {
                errors.push(format!("container {} starts past the 28-bit limit", id));
            }
            markers.push((c.start, id as u32));
            if let Some(end) = c.end {
                markers.push((end, id as u32));
            }
        }
        markers.sort_by_key(|(offset, _)| *offset);

        let mut paths = self.paths.clone();
        paths.sort_by_key(|(hash, _)| *hash);
        if let Some(w) = paths.windows(2).find(|w| w[0].0 == w[1].0) {
            errors.push(format!("path hash 0x{:08x} registered twice", w[0].0));
        }

        if !errors.is_empty() {
            return Err(RuntimeError::MalformedStory {
                message: errors.join("; "),
            });
        }

        let mut out = Vec::new();
        Header::write(&mut out);

        write_section(&mut out, &self.strings);

        let mut meta = Vec::new();
        put(&mut meta, self.lists.len() as u32);
        for (name, flags) in &self.lists {
            put(&mut meta, *name);
            put(&mut meta, flags.len() as u32);
            for (flag, value) in flags {
                put(&mut meta, *flag);
                put(&mut meta, *value as u32);
            }
        }
        write_section(&mut out, &meta);

        let mut lits = Vec::new();
        put(&mut lits, self.literals.len() as u32);
        for literal in &self.literals {
            put(&mut lits, literal.len() as u32);
            for (list, flag) in literal {
                lits.extend_from_slice(&list.to_ne_bytes());
                lits.extend_from_slice(&flag.to_ne_bytes());
            }
        }
        write_section(&mut out, &lits);

        let mut conts = Vec::new();
        put(&mut conts, self.containers.len() as u32);
        for c in &self.containers {
            put(&mut conts, c.parent.unwrap_or(u32::MAX));
            put(&mut conts, ((c.flags.bits() as u32) << 28) | c.start);
            put(&mut conts, c.end.unwrap_or(c.start));
            put(&mut conts, c.hash);
        }
        write_section(&mut out, &conts);

        let mut omap = Vec::new();
        put(&mut omap, markers.len() as u32);
        for (offset, id) in &markers {
            put(&mut omap, *offset);
            put(&mut omap, *id);
        }
        write_section(&mut out, &omap);

        let mut hmap = Vec::new();
        put(&mut hmap, paths.len() as u32);
        for (hash, offset) in &paths {
            put(&mut hmap, *hash);
            put(&mut hmap, *offset);
        }
        write_section(&mut out, &hmap);

        write_section(&mut out, &code);
        Ok(out)
    }
}

fn put(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn write_section(out: &mut Vec<u8>, payload: &[u8]) {
    let aligned = out.len().div_ceil(SECTION_ALIGN) * SECTION_ALIGN;
    out.resize(aligned, 0);
    put(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unplaced_label_is_an_error() {
        let mut b = StoryBuilder::new();
        let nowhere = b.label();
        b.divert(nowhere);
        assert!(matches!(
            b.build(),
            Err(RuntimeError::MalformedStory { .. })
        ));
    }

    #[test]
    fn test_strings_are_interned_once() {
        let mut b = StoryBuilder::new();
        assert_eq!(b.intern("a"), 0);
        assert_eq!(b.intern("bc"), 2);
        assert_eq!(b.intern("a"), 0);
    }

    #[test]
    fn test_sections_are_aligned() {
        let mut b = StoryBuilder::new();
        b.text("x").end();
        let bytes = b.build().expect("build");
        // strings section: length prefix at 32, payload "x\0"
        assert_eq!(u32::from_ne_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]), 2);
        assert_eq!(u32::from_ne_bytes([bytes[64], bytes[65], bytes[66], bytes[67]]), 4);
    }

    #[test]
    fn test_containers_must_nest() {
        let mut b = StoryBuilder::new();
        let outer = b.begin_container("outer", ContainerFlags::empty());
        let _inner = b.begin_container("", ContainerFlags::empty());
        b.end_container(outer);
        assert!(b.build().is_err());
    }
}
