//! Compiled story binaries
//!
//! A [`Story`] is the immutable, parsed form of a story file. It is shared by every
//! [`Globals`] and [`Runner`] created from it through an `Rc`.
//!
//! # Layout
//!
//! After the [`header`], seven sections follow, each starting on a 32-byte boundary
//! and prefixed with its payload length:
//!
//! 1. strings (NUL-terminated; a reference is a byte offset into this section)
//! 2. list metadata
//! 3. list literals
//! 4. containers
//! 5. offset map: `(offset, container id)` sorted by offset
//! 6. hash map: `(path hash, offset)` sorted by hash
//! 7. instructions
//!
//! The [`builder`] writes this format.

pub mod builder;
pub mod header;

use crate::config::RuntimeConfig;
use crate::globals::Globals;
use crate::interpreter::command::{Command, ContainerFlags};
use crate::interpreter::engine::Runner;
use crate::interpreter::errors::RuntimeError;
use crate::memory::list_table::{FlagDefinition, ListDefinition};
use crate::memory::value::{hash_string, Hash, ListFlag};
use crate::snapshot::Snapshot;
use header::{ByteOrder, Header, Reader, HEADER_SIZE};
use log::debug;
use std::path::Path;
use std::rc::Rc;

/// Name of the container holding global variable initialisation
pub const GLOBAL_DECL: &str = "global decl";

/// Flag index of a literal entry that only names an origin list
pub const ORIGIN_ONLY: u16 = u16::MAX;

/// A container as declared in the story
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub parent: Option<u32>,
    pub flags: ContainerFlags,
    pub start: u32,
    pub end: u32,
    pub hash: Hash,
}

#[derive(Debug)]
pub struct Story {
    header: Header,
    strings: Vec<u8>,
    lists: Vec<ListDefinition>,
    literals: Vec<Vec<ListFlag>>,
    containers: Vec<ContainerInfo>,
    offsets: Vec<(u32, u32)>,
    hashes: Vec<(Hash, u32)>,
    code: Vec<u8>,
}

fn malformed(message: impl Into<String>) -> RuntimeError {
    RuntimeError::MalformedStory {
        message: message.into(),
    }
}

impl Story {
    /// Parse a story binary
    pub fn from_bytes(data: &[u8]) -> Result<Rc<Story>, RuntimeError> {
        let header = Header::parse(data)?;
        let mut reader = Reader::new(data, header.order);
        reader.seek(HEADER_SIZE);

        let strings = section(&mut reader)?.to_vec();
        let string_at = |offset: u32| -> Result<String, RuntimeError> {
            read_cstr(&strings, offset).map(str::to_string)
        };

        let mut meta = Reader::new(section(&mut reader)?, header.order);
        let num_lists = meta.u32()?;
        let mut lists = Vec::with_capacity(num_lists as usize);
        for _ in 0..num_lists {
            let name = string_at(meta.u32()?)?;
            let num_flags = meta.u32()?;
            let mut flags = Vec::with_capacity(num_flags as usize);
            for _ in 0..num_flags {
                let flag_name = string_at(meta.u32()?)?;
                let value = meta.i32()?;
                flags.push(FlagDefinition {
                    name: flag_name,
                    value,
                });
            }
            lists.push(ListDefinition { name, flags });
        }

        let mut lit = Reader::new(section(&mut reader)?, header.order);
        let num_literals = lit.u32()?;
        let mut literals = Vec::with_capacity(num_literals as usize);
        for _ in 0..num_literals {
            let n = lit.u32()?;
            let mut flags = Vec::with_capacity(n as usize);
            for _ in 0..n {
                let list = lit.u16()? as usize;
                let flag = lit.u16()?;
                if list >= lists.len() {
                    return Err(malformed(format!("list literal names list {list}")));
                }
                if flag == ORIGIN_ONLY {
                    flags.push(ListFlag { list: list as i16, flag: -1 });
                    continue;
                }
                if flag as usize >= lists[list].flags.len() {
                    return Err(malformed(format!("list literal names flag ({list}, {flag})")));
                }
                flags.push(ListFlag::new(list, flag as usize));
            }
            literals.push(flags);
        }

        let mut cont = Reader::new(section(&mut reader)?, header.order);
        let num_containers = cont.u32()?;
        let mut containers = Vec::with_capacity(num_containers as usize);
        for _ in 0..num_containers {
            let parent = cont.u32()?;
            let packed = cont.u32()?;
            let end = cont.u32()?;
            let hash = cont.u32()?;
            containers.push(ContainerInfo {
                parent: (parent != u32::MAX).then_some(parent),
                flags: ContainerFlags::from_bits_truncate((packed >> 28) as u8),
                start: packed & 0x0fff_ffff,
                end,
                hash,
            });
        }

        let mut omap = Reader::new(section(&mut reader)?, header.order);
        let num_offsets = omap.u32()?;
        let mut offsets = Vec::with_capacity(num_offsets as usize);
        for _ in 0..num_offsets {
            let offset = omap.u32()?;
            let id = omap.u32()?;
            if id >= num_containers {
                return Err(malformed(format!("offset map names container {id}")));
            }
            offsets.push((offset, id));
        }

        let mut hmap = Reader::new(section(&mut reader)?, header.order);
        let num_hashes = hmap.u32()?;
        let mut hashes = Vec::with_capacity(num_hashes as usize);
        for _ in 0..num_hashes {
            let hash = hmap.u32()?;
            let offset = hmap.u32()?;
            hashes.push((hash, offset));
        }

        let mut code = section(&mut reader)?.to_vec();
        if header.order == ByteOrder::Swapped {
            swap_payloads(&mut code)?;
        }

        if !offsets.windows(2).all(|w| w[0].0 <= w[1].0) {
            return Err(malformed("offset map is not sorted"));
        }
        if !hashes.windows(2).all(|w| w[0].0 <= w[1].0) {
            return Err(malformed("hash map is not sorted"));
        }
        if let Some((_, offset)) = hashes.iter().find(|(_, o)| *o as usize > code.len()) {
            return Err(malformed(format!("path points past the program at {offset}")));
        }

        debug!(
            "loaded story: {} bytes of strings, {} lists, {} literals, {} containers, {} paths, {} bytes of code",
            strings.len(),
            lists.len(),
            literals.len(),
            containers.len(),
            hashes.len(),
            code.len()
        );

        Ok(Rc::new(Story {
            header,
            strings,
            lists,
            literals,
            containers,
            offsets,
            hashes,
            code,
        }))
    }

    /// Read and parse a story file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Rc<Story>, RuntimeError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| malformed(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&data)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Instruction bytes
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Offset one past the last instruction
    pub fn end(&self) -> u32 {
        self.code.len() as u32
    }

    /// String at a byte offset of the string section
    pub fn string(&self, offset: u32) -> Result<&str, RuntimeError> {
        read_cstr(&self.strings, offset)
    }

    pub fn list_definitions(&self) -> &[ListDefinition] {
        &self.lists
    }

    pub fn num_flags(&self) -> usize {
        self.lists.iter().map(|l| l.flags.len()).sum()
    }

    /// Flags of a list literal; an entry with a negative flag only names an origin list
    pub fn literal(&self, index: u32) -> Result<&[ListFlag], RuntimeError> {
        self.literals
            .get(index as usize)
            .map(Vec::as_slice)
            .ok_or(RuntimeError::UnknownList {
                list: index as i32,
                flag: -1,
            })
    }

    pub fn num_literals(&self) -> usize {
        self.literals.len()
    }

    pub fn num_containers(&self) -> u32 {
        self.containers.len() as u32
    }

    pub fn container(&self, id: u32) -> Result<&ContainerInfo, RuntimeError> {
        self.containers
            .get(id as usize)
            .ok_or(RuntimeError::UnknownContainer { id })
    }

    /// Container start and end markers in offset order
    pub fn container_markers(&self) -> &[(u32, u32)] {
        &self.offsets
    }

    /// Container whose marker sits exactly at `offset`
    pub fn container_at(&self, offset: u32) -> Option<u32> {
        let i = self.offsets.partition_point(|(o, _)| *o < offset);
        self.offsets
            .get(i)
            .filter(|(o, _)| *o == offset)
            .map(|(_, id)| *id)
    }

    /// Offset of a named path
    pub fn find_offset(&self, path: Hash) -> Option<u32> {
        self.hashes
            .binary_search_by_key(&path, |(h, _)| *h)
            .ok()
            .map(|i| self.hashes[i].1)
    }

    /// Offset of the global initialisation block, if the story declares one
    pub fn global_decl(&self) -> Option<u32> {
        self.find_offset(hash_string(GLOBAL_DECL))
    }

    /// Create a globals store with default limits
    pub fn new_globals(self: &Rc<Self>) -> Globals {
        Globals::new(Rc::clone(self), RuntimeConfig::default())
    }

    pub fn new_globals_with(self: &Rc<Self>, config: RuntimeConfig) -> Globals {
        Globals::new(Rc::clone(self), config)
    }

    /// Create a runner; with no globals given, a fresh store is made for it
    pub fn new_runner(self: &Rc<Self>, globals: Option<&Globals>) -> Result<Runner, RuntimeError> {
        let globals = match globals {
            Some(g) => g.clone(),
            None => self.new_globals(),
        };
        Runner::new(Rc::clone(self), globals)
    }

    /// Rebuild the globals store captured in a snapshot
    pub fn new_globals_from_snapshot(
        self: &Rc<Self>,
        snapshot: &Snapshot,
    ) -> Result<Globals, RuntimeError> {
        crate::snapshot::load_globals(Rc::clone(self), snapshot, RuntimeConfig::default())
    }

    /// Rebuild the `index`-th runner captured in a snapshot on top of `globals`
    pub fn new_runner_from_snapshot(
        self: &Rc<Self>,
        snapshot: &Snapshot,
        globals: &Globals,
        index: usize,
    ) -> Result<Runner, RuntimeError> {
        crate::snapshot::load_runner(Rc::clone(self), snapshot, globals, index)
    }
}

/// Next aligned, length-prefixed section
fn section<'a>(reader: &mut Reader<'a>) -> Result<&'a [u8], RuntimeError> {
    reader.align();
    let len = reader.u32()? as usize;
    reader.bytes(len)
}

fn read_cstr(strings: &[u8], offset: u32) -> Result<&str, RuntimeError> {
    let tail = strings
        .get(offset as usize..)
        .ok_or_else(|| malformed(format!("string offset {offset} is outside the string table")))?;
    let len = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| malformed(format!("string at {offset} is not terminated")))?;
    std::str::from_utf8(&tail[..len])
        .map_err(|e| malformed(format!("string at {offset} is not UTF-8: {e}")))
}

/// Swap every instruction payload of a program written with the other byte order
fn swap_payloads(code: &mut [u8]) -> Result<(), RuntimeError> {
    let mut at = 0usize;
    while at < code.len() {
        let command = Command::from_u8(code[at])
            .map_err(|_| malformed(format!("unknown opcode 0x{:02x} at {at}", code[at])))?;
        if command.has_payload() {
            let payload = code
                .get_mut(at + 2..at + 6)
                .ok_or_else(|| malformed(format!("truncated instruction at {at}")))?;
            payload.reverse();
        }
        at += command.size() as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::builder::StoryBuilder;
    use super::*;

    #[test]
    fn test_load_built_story() {
        let mut b = StoryBuilder::new();
        let root = b.begin_container("start", ContainerFlags::TRACK_VISITS);
        b.text("Hello");
        b.newline();
        b.done();
        b.end_container(root);
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");

        assert_eq!(story.num_containers(), 1);
        let info = *story.container(0).expect("container");
        assert_eq!(info.flags, ContainerFlags::TRACK_VISITS);
        assert_eq!(info.parent, None);
        assert_eq!(story.find_offset(hash_string("start")), Some(info.start));
        assert_eq!(story.container_at(info.start), Some(0));
        assert_eq!(story.container_at(info.start + 1), None);
        assert!(story.global_decl().is_none());
    }

    #[test]
    fn test_string_lookup() {
        let mut b = StoryBuilder::new();
        b.text("first");
        b.text("second");
        b.end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        assert_eq!(story.string(0).expect("string"), "first");
        assert_eq!(story.string(6).expect("string"), "second");
        assert!(story.string(400).is_err());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let mut b = StoryBuilder::new();
        b.end();
        let bytes = b.build().expect("build");
        assert!(matches!(
            Story::from_bytes(&bytes[..40]),
            Err(RuntimeError::MalformedStory { .. })
        ));
    }

    #[test]
    fn test_swapped_payloads() {
        let mut code = vec![Command::Int as u8, 0, 1, 2, 3, 4, Command::End as u8, 0];
        swap_payloads(&mut code).expect("swap");
        assert_eq!(&code[2..6], &[4, 3, 2, 1]);
        assert_eq!(code[6], Command::End as u8);
    }
}
