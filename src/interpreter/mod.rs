//! Story execution engine
//!
//! This module provides the runner and everything it executes:
//! - [`engine`]: Runner state, the line stepper with glue lookahead, the host-facing [`engine::Runner`]
//! - [`command`]: Instruction set, flags and decoding
//! - [`statements`]: Per-instruction semantics
//! - [`jumps`]: Diverts, calls, threads and container tracking
//! - [`ops`]: Operator table dispatched on the common base type of the operands
//! - [`choices`]: Choice collection and selection
//! - [`tags`]: Global, knot and line tags
//! - [`externals`]: Host functions bound by name
//! - [`random`]: Seeded generator for sequences and `RANDOM`
//! - [`errors`]: Runtime error types
//!
//! # Execution Model
//!
//! A runner steps one instruction at a time until the output stream holds a
//! complete line. When a newline is reached, the runner saves every restorable
//! collection and keeps going: if glue removes the newline the checkpoint is
//! forgotten, and if new content shows up first it is restored and the line is
//! handed to the host.

pub mod choices;
pub mod command;
pub mod engine;
pub mod errors;
pub mod externals;
pub mod jumps;
pub mod ops;
pub mod random;
pub mod statements;
pub mod tags;
