//! Story file header and byte-order handling
//!
//! ```text
//! 0   u16  byte order marker 0x0001
//! 2   u16  reserved
//! 4   u32  ink version
//! 8   u32  binary version
//! 12  ...  zero padding up to 32
//! ```
//!
//! Integers everywhere in the file use the writer's byte order. A reader on a host
//! with the other order sees the marker as `0x0100` and swaps every integer it reads.

use crate::interpreter::errors::RuntimeError;

/// Ink language version the compiler targets
pub const INK_VERSION: u32 = 21;

/// Layout version of the story binary; anything else is rejected
pub const BIN_VERSION: u32 = 1;

/// Sections start on multiples of this
pub const SECTION_ALIGN: usize = 32;

pub const HEADER_SIZE: usize = 32;

const MARKER_SAME: u16 = 0x0001;
const MARKER_DIFFER: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Written by a host with our byte order
    Same,
    /// Written by a host with the opposite byte order
    Swapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub order: ByteOrder,
    pub ink_version: u32,
    pub bin_version: u32,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Header, RuntimeError> {
        if data.len() < HEADER_SIZE {
            return Err(RuntimeError::MalformedStory {
                message: format!("file is {} bytes, shorter than the header", data.len()),
            });
        }
        let order = match u16::from_ne_bytes([data[0], data[1]]) {
            MARKER_SAME => ByteOrder::Same,
            MARKER_DIFFER => ByteOrder::Swapped,
            other => {
                return Err(RuntimeError::MalformedStory {
                    message: format!("bad byte order marker 0x{:04x}", other),
                })
            }
        };
        let mut reader = Reader::new(data, order);
        reader.seek(4);
        let ink_version = reader.u32()?;
        let bin_version = reader.u32()?;
        if bin_version != BIN_VERSION {
            return Err(RuntimeError::VersionMismatch {
                expected: BIN_VERSION,
                found: bin_version,
            });
        }
        Ok(Header {
            order,
            ink_version,
            bin_version,
        })
    }

    /// Header bytes for a story written on this host
    pub fn write(out: &mut Vec<u8>) {
        out.extend_from_slice(&MARKER_SAME.to_ne_bytes());
        out.extend_from_slice(&0u16.to_ne_bytes());
        out.extend_from_slice(&INK_VERSION.to_ne_bytes());
        out.extend_from_slice(&BIN_VERSION.to_ne_bytes());
        out.resize(HEADER_SIZE, 0);
    }
}

/// Cursor over the story bytes that applies the file's byte order
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Reader {
            data,
            pos: 0,
            order,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Move forward to the next section boundary
    pub fn align(&mut self) {
        self.pos = self.pos.div_ceil(SECTION_ALIGN) * SECTION_ALIGN;
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(RuntimeError::MalformedStory {
                message: format!(
                    "needs {} bytes at offset {}, file has {}",
                    len,
                    self.pos,
                    self.data.len()
                ),
            });
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u16(&mut self) -> Result<u16, RuntimeError> {
        let b = self.bytes(2)?;
        let v = u16::from_ne_bytes([b[0], b[1]]);
        Ok(match self.order {
            ByteOrder::Same => v,
            ByteOrder::Swapped => v.swap_bytes(),
        })
    }

    pub fn u32(&mut self) -> Result<u32, RuntimeError> {
        let b = self.bytes(4)?;
        let v = u32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
        Ok(match self.order {
            ByteOrder::Same => v,
            ByteOrder::Swapped => v.swap_bytes(),
        })
    }

    pub fn i32(&mut self) -> Result<i32, RuntimeError> {
        Ok(self.u32()? as i32)
    }
}
