//! Runtime error types for the story runtime
//!
//! This module defines [`RuntimeError`], which represents every error the runtime can
//! report: contract violations inside the collections, malformed bytecode, story and
//! snapshot format problems, and host misuse.
//!
//! Errors raised while executing an instruction are fatal - the runner resets its
//! execution state before handing the error back. The instruction offset is attached
//! with [`RuntimeError::at`].

use std::fmt;

/// Runtime errors that can occur while loading or running a story
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Popped or peeked an empty collection
    StackUnderflow { collection: &'static str },

    /// A fixed-capacity collection ran out of room
    CapacityExceeded {
        collection: &'static str,
        capacity: usize,
    },

    /// `save()` called while a checkpoint is already active
    AlreadySaved { collection: &'static str },

    /// `restore()` or `forget()` called without an active checkpoint
    NotSaved { collection: &'static str },

    /// Index outside of a collection
    IndexOutOfBounds {
        collection: &'static str,
        index: usize,
        len: usize,
    },

    /// Tried to read the output stream behind the active checkpoint
    OutputBehindSave { start: usize, save: usize },

    /// The instruction stream holds a byte that is not a command
    UnknownOpcode { opcode: u8 },

    /// An instruction or payload runs past the end of the program
    UnexpectedEndOfProgram { offset: u32 },

    /// A divert or return address points outside of the program
    InvalidAddress { address: u32 },

    /// No operator is defined for these operand types
    TypeMismatch { operation: String, got: String },

    /// A value can not be cast to the requested type
    InvalidCast { from: String, to: String },

    /// Integer division or modulo by zero
    DivisionByZero { operation: String },

    /// Variable not found in the callstack or globals
    UnknownVariable { name: u32 },

    /// Script called an external function that is not bound and has no fallback
    UnboundExternal { name: u32 },

    /// Host passed a choice index that is not presented
    InvalidChoice { index: usize, available: usize },

    /// `choose` called but no done point was recorded for the choice's thread
    MissingDonePoint,

    /// A thread marker could not be found in the callstack
    ThreadNotFound { thread: u32 },

    /// Returned from a function or tunnel with no frame on the callstack
    MissingFrame { expected: &'static str },

    /// Left a container that is not on top of the container stack
    ContainerMismatch { expected: u32, found: Option<u32> },

    /// Referenced a container id the story does not declare
    UnknownContainer { id: u32 },

    /// Referenced a list or list flag the story does not declare
    UnknownList { list: i32, flag: i32 },

    /// Story binary could not be parsed
    MalformedStory { message: String },

    /// Story binary was produced for another binary version
    VersionMismatch { expected: u32, found: u32 },

    /// Snapshot was taken from a different story
    SnapshotMismatch { message: String },

    /// Snapshot data is truncated or inconsistent
    CorruptSnapshot { message: String },

    /// A handle's object is borrowed elsewhere or no longer exists
    Invalidated { what: &'static str },

    /// Runner was asked to run with a checkpoint outstanding
    CheckpointActive { operation: &'static str },

    /// Error raised while executing the instruction at `offset`
    Fault {
        offset: u32,
        error: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// Attach the offset of the faulting instruction
    pub fn at(self, offset: u32) -> Self {
        match self {
            RuntimeError::Fault { .. } => self,
            other => RuntimeError::Fault {
                offset,
                error: Box::new(other),
            },
        }
    }

    /// Instruction offset, if the error happened during execution
    pub fn offset(&self) -> Option<u32> {
        match self {
            RuntimeError::Fault { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// The error without its location wrapper
    pub fn root(&self) -> &RuntimeError {
        match self {
            RuntimeError::Fault { error, .. } => error.root(),
            other => other,
        }
    }

    /// Whether this error came from a broken contract during execution, as opposed to
    /// a rejected story or snapshot file
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.root(),
            RuntimeError::MalformedStory { .. }
                | RuntimeError::VersionMismatch { .. }
                | RuntimeError::SnapshotMismatch { .. }
                | RuntimeError::CorruptSnapshot { .. }
                | RuntimeError::InvalidChoice { .. }
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::StackUnderflow { collection } => {
                write!(f, "Stack underflow: {} is empty", collection)
            }
            RuntimeError::CapacityExceeded {
                collection,
                capacity,
            } => {
                write!(
                    f,
                    "Capacity exceeded: {} is limited to {} entries",
                    collection, capacity
                )
            }
            RuntimeError::AlreadySaved { collection } => {
                write!(f, "{} already has an active save point", collection)
            }
            RuntimeError::NotSaved { collection } => {
                write!(f, "{} has no save point to restore or forget", collection)
            }
            RuntimeError::IndexOutOfBounds {
                collection,
                index,
                len,
            } => {
                write!(
                    f,
                    "Index {} out of bounds for {} of length {}",
                    index, collection, len
                )
            }
            RuntimeError::OutputBehindSave { start, save } => {
                write!(
                    f,
                    "Output read from {} reaches behind the save point at {}",
                    start, save
                )
            }
            RuntimeError::UnknownOpcode { opcode } => {
                write!(f, "Unknown opcode 0x{:02x}", opcode)
            }
            RuntimeError::UnexpectedEndOfProgram { offset } => {
                write!(f, "Unexpected end of program at offset {}", offset)
            }
            RuntimeError::InvalidAddress { address } => {
                write!(f, "Address {} is outside of the program", address)
            }
            RuntimeError::TypeMismatch { operation, got } => {
                write!(f, "Type error: {} is not defined for {}", operation, got)
            }
            RuntimeError::InvalidCast { from, to } => {
                write!(f, "Can not cast {} to {}", from, to)
            }
            RuntimeError::DivisionByZero { operation } => {
                write!(f, "{} by zero", operation)
            }
            RuntimeError::UnknownVariable { name } => {
                write!(f, "Unknown variable 0x{:08x}", name)
            }
            RuntimeError::UnboundExternal { name } => {
                write!(
                    f,
                    "External function 0x{:08x} is not bound and has no fallback",
                    name
                )
            }
            RuntimeError::InvalidChoice { index, available } => {
                write!(
                    f,
                    "Choice {} does not exist ({} choice{} available)",
                    index,
                    available,
                    if *available == 1 { "" } else { "s" }
                )
            }
            RuntimeError::MissingDonePoint => {
                write!(f, "No done point recorded before the choice was presented")
            }
            RuntimeError::ThreadNotFound { thread } => {
                write!(f, "Thread {} has no marker on the callstack", thread)
            }
            RuntimeError::MissingFrame { expected } => {
                write!(f, "No {} frame on the callstack", expected)
            }
            RuntimeError::ContainerMismatch { expected, found } => match found {
                Some(found) => write!(
                    f,
                    "Leaving container {} while inside container {}",
                    expected, found
                ),
                None => write!(
                    f,
                    "Leaving container {} while outside of every container",
                    expected
                ),
            },
            RuntimeError::UnknownContainer { id } => {
                write!(f, "Unknown container {}", id)
            }
            RuntimeError::UnknownList { list, flag } => {
                write!(f, "Unknown list flag ({}, {})", list, flag)
            }
            RuntimeError::MalformedStory { message } => {
                write!(f, "Malformed story binary: {}", message)
            }
            RuntimeError::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Story binary version {} is not supported (expected {})",
                    found, expected
                )
            }
            RuntimeError::SnapshotMismatch { message } => {
                write!(f, "Snapshot does not belong to this story: {}", message)
            }
            RuntimeError::CorruptSnapshot { message } => {
                write!(f, "Corrupt snapshot: {}", message)
            }
            RuntimeError::Invalidated { what } => {
                write!(f, "The {} behind this handle is in use or no longer exists", what)
            }
            RuntimeError::CheckpointActive { operation } => {
                write!(f, "Can not {} while a lookahead checkpoint is active", operation)
            }
            RuntimeError::Fault { offset, error } => {
                write!(f, "{} (instruction at offset {})", error, offset)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_wraps_once() {
        let err = RuntimeError::StackUnderflow {
            collection: "eval stack",
        }
        .at(12)
        .at(40);

        assert_eq!(err.offset(), Some(12));
        assert_eq!(
            err.root(),
            &RuntimeError::StackUnderflow {
                collection: "eval stack"
            }
        );
        assert!(err.to_string().contains("offset 12"));
    }

    #[test]
    fn test_format_errors_are_not_fatal() {
        let err = RuntimeError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert!(!err.is_fatal());
        assert!(RuntimeError::UnknownOpcode { opcode: 0xff }.at(3).is_fatal());
    }
}
