//! Callstack of temporaries, frames and ink threads
//!
//! The callstack is one flat [`RestorableStack`] of [`Entry`]s. Frames and threads
//! are marker entries, and nothing is ever removed from the middle:
//!
//! - [`Entry::Frame`] starts a function or tunnel frame and records where to return
//! - [`Entry::ThreadStart`] starts a forked ink thread
//! - [`Entry::ThreadEnd`] closes a thread; walking down from it jumps straight below
//!   the matching `ThreadStart`, hiding the thread's entries from whoever continues
//! - [`Entry::Jump`] records that a frame was popped while a thread marker sat above
//!   it; walking down from it skips that many entries
//! - [`Entry::Shadow`] holds a pointer write into an outer frame that a thread
//!   marker separates from the writer; only walks passing over it see the new value
//!
//! ```text
//! [X=100][Y=200][ThreadStart 0][X=200][ThreadEnd 0][Z=500]
//!                 └──────── hidden from the main thread ───┘
//! ```
//!
//! The entries a thread can see are produced by a *logical walk* from the top of the
//! stack (or from just below the thread's `ThreadEnd`). Collapsing to a thread
//! rebuilds the stack from that walk with the thread markers stripped.
//!
//! Variable pointers name their frame by ordinal: region 1 lies below the first
//! frame or thread boundary of the walk, region 2 above it, and so on. Ordinal 0 is
//! reserved for globals.

use super::restorable::RestorableStack;
use super::value::{Hash, Value};
use crate::config::Limit;
use crate::interpreter::errors::RuntimeError;

/// Kind of a call frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Function,
    Tunnel,
}

impl FrameKind {
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Function => "function",
            FrameKind::Tunnel => "tunnel",
        }
    }
}

/// One callstack entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry {
    Var {
        name: Hash,
        value: Value,
    },
    Frame {
        kind: FrameKind,
        ret: u32,
        eval: bool,
    },
    ThreadStart {
        id: u32,
        ret: u32,
        eval: bool,
    },
    ThreadEnd {
        id: u32,
    },
    Jump {
        skip: u32,
    },
    Shadow {
        name: Hash,
        frame: u32,
        value: Value,
    },
}

impl Entry {
    fn is_boundary(&self) -> bool {
        matches!(self, Entry::Frame { .. } | Entry::ThreadStart { .. })
    }

    fn is_thread_marker(&self) -> bool {
        matches!(self, Entry::ThreadStart { .. } | Entry::ThreadEnd { .. })
    }
}

/// Where a popped frame or completed thread resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Return {
    pub ret: u32,
    pub eval: bool,
}

#[derive(Debug, Clone)]
pub struct Callstack {
    entries: RestorableStack<Entry>,
    next_thread: u32,
    saved_next_thread: Option<u32>,
}

impl Callstack {
    pub fn new(limit: Limit) -> Self {
        Callstack {
            entries: RestorableStack::new("callstack", limit),
            next_thread: 0,
            saved_next_thread: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, index: usize) -> Result<Entry, RuntimeError> {
        self.entries
            .get(index)
            .copied()
            .ok_or(RuntimeError::IndexOutOfBounds {
                collection: "callstack",
                index,
                len: self.entries.len(),
            })
    }

    fn find_thread_start(&self, below: usize, thread: u32) -> Result<usize, RuntimeError> {
        for i in (0..below).rev() {
            if let Entry::ThreadStart { id, .. } = self.entry(i)? {
                if id == thread {
                    return Ok(i);
                }
            }
        }
        Err(RuntimeError::ThreadNotFound { thread })
    }

    /// Indices of the entries visible when walking down from just below `from`,
    /// top to bottom
    fn logical(&self, from: usize) -> Result<Vec<usize>, RuntimeError> {
        let mut visible = Vec::new();
        let mut skip = 0u32;
        let mut i = from;
        while i > 0 {
            i -= 1;
            match self.entry(i)? {
                Entry::ThreadEnd { id } => i = self.find_thread_start(i, id)?,
                Entry::Jump { skip: n } => skip += n,
                _ if skip > 0 => skip -= 1,
                _ => visible.push(i),
            }
        }
        Ok(visible)
    }

    /// Ordinal of the innermost region of a walk
    fn frame_of(&self, walk: &[usize]) -> u32 {
        1 + walk
            .iter()
            .filter(|i| self.entries.get(**i).is_some_and(Entry::is_boundary))
            .count() as u32
    }

    /// Stored value of a variable entry
    fn value_at(&self, index: usize) -> Result<Option<Value>, RuntimeError> {
        Ok(match self.entry(index)? {
            Entry::Var { value, .. } | Entry::Shadow { value, .. } => Some(value),
            _ => None,
        })
    }

    /// Whether a thread marker sits above `index`
    fn shared_above(&self, index: usize) -> bool {
        (index + 1..self.entries.len())
            .any(|j| self.entries.get(j).is_some_and(Entry::is_thread_marker))
    }

    /// Index of `name` in the current frame
    fn find_local(&self, name: Hash) -> Result<Option<usize>, RuntimeError> {
        let walk = self.logical(self.entries.len())?;
        let current = self.frame_of(&walk);
        for i in walk {
            match self.entry(i)? {
                Entry::Var { name: n, .. } if n == name => return Ok(Some(i)),
                Entry::Shadow { name: n, frame, .. } if n == name && frame == current => {
                    return Ok(Some(i))
                }
                e if e.is_boundary() => break,
                _ => {}
            }
        }
        Ok(None)
    }

    /// Value of a temporary in the current frame
    pub fn get(&self, name: Hash) -> Result<Option<Value>, RuntimeError> {
        match self.find_local(name)? {
            Some(i) => self.value_at(i),
            None => Ok(None),
        }
    }

    /// Set a temporary in the current frame, defining it if needed
    ///
    /// A variable shared with a forked thread is shadowed by a new entry instead of
    /// being overwritten, so the other thread keeps seeing its own copy.
    pub fn set(&mut self, name: Hash, value: Value) -> Result<(), RuntimeError> {
        let entry = Entry::Var { name, value };
        match self.find_local(name)? {
            Some(i) if self.shared_above(i) => self.entries.push(entry),
            Some(i) => self.entries.set(i, entry),
            None => self.entries.push(entry),
        }
    }

    /// Ordinal of the current frame, for variable pointers
    pub fn current_frame(&self) -> Result<u32, RuntimeError> {
        let walk = self.logical(self.entries.len())?;
        Ok(self.frame_of(&walk))
    }

    fn find_in_frame(&self, name: Hash, frame: u32) -> Result<Option<usize>, RuntimeError> {
        let walk = self.logical(self.entries.len())?;
        let mut region = self.frame_of(&walk);
        for i in walk {
            match self.entry(i)? {
                Entry::Var { name: n, .. } if n == name && region == frame => return Ok(Some(i)),
                Entry::Shadow { name: n, frame: f, .. } if n == name && f == frame => {
                    return Ok(Some(i))
                }
                e if e.is_boundary() => {
                    region -= 1;
                    if region < frame {
                        break;
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Value of `name` in the frame with the given ordinal
    pub fn get_in_frame(&self, name: Hash, frame: u32) -> Result<Option<Value>, RuntimeError> {
        match self.find_in_frame(name, frame)? {
            Some(i) => self.value_at(i),
            None => Ok(None),
        }
    }

    /// Overwrite `name` in the frame with the given ordinal
    ///
    /// Like [`Callstack::set`], a variable shared with a forked thread is shadowed
    /// rather than overwritten.
    pub fn set_in_frame(&mut self, name: Hash, frame: u32, value: Value) -> Result<(), RuntimeError> {
        if frame == self.current_frame()? {
            if self.find_local(name)?.is_none() {
                return Err(RuntimeError::UnknownVariable { name });
            }
            return self.set(name, value);
        }
        match self.find_in_frame(name, frame)? {
            Some(i) if self.shared_above(i) => self.entries.push(Entry::Shadow { name, frame, value }),
            Some(i) => {
                let entry = match self.entry(i)? {
                    Entry::Shadow { .. } => Entry::Shadow { name, frame, value },
                    _ => Entry::Var { name, value },
                };
                self.entries.set(i, entry)
            }
            None => Err(RuntimeError::UnknownVariable { name }),
        }
    }

    pub fn push_frame(&mut self, kind: FrameKind, ret: u32, eval: bool) -> Result<(), RuntimeError> {
        self.entries.push(Entry::Frame { kind, ret, eval })
    }

    /// Kind of the innermost frame, looking through thread starts
    pub fn has_frame(&self) -> Result<Option<FrameKind>, RuntimeError> {
        for i in self.logical(self.entries.len())? {
            if let Entry::Frame { kind, .. } = self.entry(i)? {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    /// Leave the innermost function or tunnel frame
    pub fn pop_frame(&mut self) -> Result<(FrameKind, Return), RuntimeError> {
        let mut crossed = 0u32;
        let mut found = None;
        let mut shadows = Vec::new();
        for i in self.logical(self.entries.len())? {
            crossed += 1;
            match self.entry(i)? {
                Entry::Frame { kind, ret, eval } => {
                    found = Some((i, kind, Return { ret, eval }));
                    break;
                }
                shadow @ Entry::Shadow { .. } => shadows.push(shadow),
                _ => {}
            }
        }
        let (index, kind, ret) = found.ok_or(RuntimeError::MissingFrame {
            expected: "function or tunnel",
        })?;

        let shared = (index + 1..self.entries.len()).any(|j| {
            self.entries
                .get(j)
                .is_some_and(|e| e.is_thread_marker() || matches!(e, Entry::Jump { .. }))
        });
        if shared {
            self.entries.push(Entry::Jump { skip: crossed })?;
        } else {
            self.entries.truncate(index)?;
        }

        // writes into frames that outlive this one stay visible
        let current = self.current_frame()?;
        for shadow in shadows.into_iter().rev() {
            if let Entry::Shadow { frame, .. } = shadow {
                if frame <= current {
                    self.entries.push(shadow)?;
                }
            }
        }
        Ok((kind, ret))
    }

    /// Start a new ink thread that returns to `ret`
    pub fn fork_thread(&mut self, ret: u32, eval: bool) -> Result<u32, RuntimeError> {
        let id = self.next_thread;
        self.entries.push(Entry::ThreadStart { id, ret, eval })?;
        self.next_thread += 1;
        Ok(id)
    }

    /// Close `thread`, returning where it resumes
    pub fn complete_thread(&mut self, thread: u32) -> Result<Return, RuntimeError> {
        let start = self.find_thread_start(self.entries.len(), thread)?;
        let Entry::ThreadStart { ret, eval, .. } = self.entry(start)? else {
            return Err(RuntimeError::ThreadNotFound { thread });
        };
        self.entries.push(Entry::ThreadEnd { id: thread })?;
        Ok(Return { ret, eval })
    }

    /// Rebuild the stack as `thread` (or the main thread) sees it, with every
    /// thread marker stripped
    pub fn collapse_to_thread(&mut self, thread: Option<u32>) -> Result<(), RuntimeError> {
        if self.entries.is_saved() {
            return Err(RuntimeError::CheckpointActive {
                operation: "collapse the callstack",
            });
        }
        let from = match thread {
            None => self.entries.len(),
            Some(id) => (0..self.entries.len())
                .rev()
                .find(|i| matches!(self.entries.get(*i), Some(Entry::ThreadEnd { id: t }) if *t == id))
                .ok_or(RuntimeError::ThreadNotFound { thread: id })?,
        };
        let mut kept = Vec::new();
        for i in self.logical(from)?.into_iter().rev() {
            let entry = self.entry(i)?;
            if !entry.is_thread_marker() {
                kept.push(entry);
            }
        }
        self.entries.replace(kept)?;
        self.next_thread = 0;
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), RuntimeError> {
        self.entries.save()?;
        self.saved_next_thread = Some(self.next_thread);
        Ok(())
    }

    pub fn restore(&mut self) -> Result<(), RuntimeError> {
        self.entries.restore()?;
        if let Some(next) = self.saved_next_thread.take() {
            self.next_thread = next;
        }
        Ok(())
    }

    pub fn forget(&mut self) -> Result<(), RuntimeError> {
        self.entries.forget()?;
        self.saved_next_thread = None;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_thread = 0;
        self.saved_next_thread = None;
    }

    /// Every stored variable value, hidden ones included
    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.entries.iter_all().filter_map(|e| match e {
            Entry::Var { value, .. } | Entry::Shadow { value, .. } => Some(value),
            _ => None,
        })
    }

    pub fn next_thread(&self) -> u32 {
        self.next_thread
    }

    /// Raw entries, for serialisation
    pub fn to_vec(&self) -> Vec<Entry> {
        self.entries.to_vec()
    }

    pub fn replace(&mut self, entries: Vec<Entry>, next_thread: u32) -> Result<(), RuntimeError> {
        self.entries.replace(entries)?;
        self.next_thread = next_thread;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::value::hash_string;

    fn x() -> Hash {
        hash_string("X")
    }
    fn y() -> Hash {
        hash_string("Y")
    }
    fn z() -> Hash {
        hash_string("Z")
    }

    fn int(stack: &Callstack, name: Hash) -> Option<i32> {
        stack
            .get(name)
            .expect("walk")
            .and_then(|v| v.as_int())
    }

    fn with_temps() -> Callstack {
        let mut stack = Callstack::new(Limit::Dynamic(50));
        stack.set(x(), Value::Int(100)).expect("set");
        stack.set(y(), Value::Int(200)).expect("set");
        stack
    }

    #[test]
    fn test_fork_hides_outer_temps() {
        let mut stack = with_temps();
        stack.fork_thread(0, false).expect("fork");
        assert_eq!(int(&stack, x()), None);
        stack.set(x(), Value::Int(200)).expect("set");
        assert_eq!(int(&stack, x()), Some(200));
    }

    #[test]
    fn test_completed_thread_is_hidden() {
        let mut stack = with_temps();
        let thread = stack.fork_thread(12, true).expect("fork");
        stack.set(x(), Value::Int(200)).expect("set");
        let ret = stack.complete_thread(thread).expect("complete");
        assert_eq!(ret, Return { ret: 12, eval: true });
        assert_eq!(int(&stack, x()), Some(100));
        assert_eq!(int(&stack, y()), Some(200));
    }

    #[test]
    fn test_collapse_to_thread_or_main() {
        let mut stack = with_temps();
        let thread = stack.fork_thread(0, false).expect("fork");
        stack.set(x(), Value::Int(200)).expect("set");
        stack.complete_thread(thread).expect("complete");

        let mut to_thread = stack.clone();
        to_thread.collapse_to_thread(Some(thread)).expect("collapse");
        assert_eq!(int(&to_thread, x()), Some(200));
        assert_eq!(int(&to_thread, y()), Some(200));

        stack.collapse_to_thread(None).expect("collapse");
        assert_eq!(int(&stack, x()), Some(100));
        assert_eq!(int(&stack, y()), Some(200));
        assert_eq!(stack.next_thread(), 0);
    }

    #[test]
    fn test_main_thread_writes_after_completion() {
        let mut stack = with_temps();
        let thread = stack.fork_thread(0, false).expect("fork");
        stack.set(x(), Value::Int(200)).expect("set");
        stack.complete_thread(thread).expect("complete");
        stack.set(z(), Value::Int(500)).expect("set");

        let mut first = stack.clone();
        first.collapse_to_thread(Some(thread)).expect("collapse");
        assert_eq!(int(&first, z()), None);

        let thread2 = stack.fork_thread(0, false).expect("fork");
        stack.set(x(), Value::Int(999)).expect("set");
        stack.complete_thread(thread2).expect("complete");

        let mut main = stack.clone();
        main.collapse_to_thread(None).expect("collapse");
        assert_eq!(int(&main, x()), Some(100));
        assert_eq!(int(&main, y()), Some(200));
        assert_eq!(int(&main, z()), Some(500));

        stack.collapse_to_thread(Some(thread)).expect("collapse");
        assert_eq!(int(&stack, x()), Some(200));
        assert_eq!(int(&stack, z()), None);
    }

    #[test]
    fn test_nested_threads() {
        let mut stack = with_temps();
        let outer = stack.fork_thread(0, false).expect("fork");
        stack.set(x(), Value::Int(200)).expect("set");
        let inner = stack.fork_thread(0, false).expect("fork");
        stack.set(x(), Value::Int(999)).expect("set");
        stack.complete_thread(inner).expect("complete");
        stack.complete_thread(outer).expect("complete");

        let mut to_inner = stack.clone();
        to_inner.collapse_to_thread(Some(inner)).expect("collapse");
        assert_eq!(int(&to_inner, x()), Some(999));

        let mut to_outer = stack.clone();
        to_outer.collapse_to_thread(Some(outer)).expect("collapse");
        assert_eq!(int(&to_outer, x()), Some(200));

        stack.collapse_to_thread(None).expect("collapse");
        assert_eq!(int(&stack, x()), Some(100));
        assert_eq!(int(&stack, y()), Some(200));
    }

    #[test]
    fn test_tunnel_return_from_forked_thread() {
        let mut stack = with_temps();
        stack.push_frame(FrameKind::Tunnel, 505, false).expect("frame");
        stack.set(x(), Value::Int(101)).expect("set");
        stack.set(y(), Value::Int(201)).expect("set");

        let thread = stack.fork_thread(7, false).expect("fork");
        let (kind, ret) = stack.pop_frame().expect("pop");
        assert_eq!(kind, FrameKind::Tunnel);
        assert_eq!(ret.ret, 505);
        assert_eq!(int(&stack, x()), Some(100));

        // the main thread still sits inside the tunnel
        stack.complete_thread(thread).expect("complete");
        assert_eq!(int(&stack, x()), Some(101));
        assert_eq!(stack.has_frame().expect("frame"), Some(FrameKind::Tunnel));
    }

    #[test]
    fn test_pop_frame_without_threads_truncates() {
        let mut stack = with_temps();
        stack.push_frame(FrameKind::Function, 40, true).expect("frame");
        stack.set(x(), Value::Int(1)).expect("set");
        assert_eq!(int(&stack, y()), None);

        let (kind, ret) = stack.pop_frame().expect("pop");
        assert_eq!(kind, FrameKind::Function);
        assert_eq!(ret, Return { ret: 40, eval: true });
        assert_eq!(stack.len(), 2);
        assert!(matches!(
            stack.pop_frame(),
            Err(RuntimeError::MissingFrame { .. })
        ));
    }

    #[test]
    fn test_thread_write_leaves_main_unchanged() {
        let mut stack = with_temps();
        stack.push_frame(FrameKind::Tunnel, 1, false).expect("frame");
        stack.set(x(), Value::Int(5)).expect("set");
        let thread = stack.fork_thread(0, false).expect("fork");
        stack.pop_frame().expect("pop");
        // thread now sees the outer frame and writes to it
        stack.set(x(), Value::Int(42)).expect("set");
        assert_eq!(int(&stack, x()), Some(42));
        stack.complete_thread(thread).expect("complete");
        stack.pop_frame().expect("pop");
        stack.collapse_to_thread(None).expect("collapse");
        assert_eq!(int(&stack, x()), Some(100));
    }

    #[test]
    fn test_pointer_write_in_thread_leaves_main_unchanged() {
        let mut stack = with_temps();
        let thread = stack.fork_thread(0, false).expect("fork");
        stack.push_frame(FrameKind::Function, 0, false).expect("frame");
        assert_eq!(stack.current_frame().expect("frame"), 3);

        stack.set_in_frame(x(), 1, Value::Int(7)).expect("set");
        assert_eq!(stack.get_in_frame(x(), 1).expect("get"), Some(Value::Int(7)));
        stack.pop_frame().expect("pop");
        assert_eq!(stack.get_in_frame(x(), 1).expect("get"), Some(Value::Int(7)));

        stack.complete_thread(thread).expect("complete");
        assert_eq!(int(&stack, x()), Some(100));

        let mut to_thread = stack.clone();
        to_thread.collapse_to_thread(Some(thread)).expect("collapse");
        assert_eq!(int(&to_thread, x()), Some(7));
        assert_eq!(int(&to_thread, y()), Some(200));

        stack.collapse_to_thread(None).expect("collapse");
        assert_eq!(int(&stack, x()), Some(100));
    }

    #[test]
    fn test_frame_ordinals() {
        let mut stack = with_temps();
        assert_eq!(stack.current_frame().expect("frame"), 1);
        stack.push_frame(FrameKind::Function, 0, false).expect("frame");
        stack.set(x(), Value::Int(7)).expect("set");
        assert_eq!(stack.current_frame().expect("frame"), 2);

        assert_eq!(stack.get_in_frame(x(), 1).expect("get"), Some(Value::Int(100)));
        assert_eq!(stack.get_in_frame(x(), 2).expect("get"), Some(Value::Int(7)));
        stack.set_in_frame(y(), 1, Value::Int(3)).expect("set");
        stack.pop_frame().expect("pop");
        assert_eq!(int(&stack, y()), Some(3));
    }

    #[test]
    fn test_restore_rolls_back_entries_and_ids() {
        let mut stack = with_temps();
        stack.save().expect("save");
        stack.set(x(), Value::Int(1)).expect("set");
        stack.fork_thread(0, false).expect("fork");
        stack.restore().expect("restore");
        assert_eq!(int(&stack, x()), Some(100));
        assert_eq!(stack.next_thread(), 0);
        assert!(!stack.entries.is_saved());
    }
}
