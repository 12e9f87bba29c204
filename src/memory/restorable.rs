//! Append-only stack with a single-level save / restore / forget checkpoint
//!
//! [`RestorableStack`] is the collection behind the eval stack, the callstack, the
//! output stream, the container stack and the thread list. While a checkpoint is
//! active the buffer is split in three regions:
//!
//! ```text
//! [0, jump)        committed entries still visible
//! [jump, save)     committed entries popped since save(), hidden but kept
//! [save, len)      entries pushed since save()
//! ```
//!
//! - `restore()` truncates to `save` and brings the hidden region back
//! - `forget()` drains the hidden region, committing the pops for good
//!
//! In-place writes below the save point are undone by `restore()` through a small
//! undo log, so glue trimming and variable updates can run speculatively.

use crate::config::Limit;
use crate::interpreter::errors::RuntimeError;

/// Checkpoint state of a restorable collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    None,
    Active { save: usize, jump: usize },
}

/// Stack with one level of speculative history
#[derive(Debug, Clone)]
pub struct RestorableStack<T> {
    data: Vec<T>,
    checkpoint: Checkpoint,
    undo: Vec<(usize, T)>,
    limit: Limit,
    name: &'static str,
}

impl<T: Clone> RestorableStack<T> {
    pub fn new(name: &'static str, limit: Limit) -> Self {
        RestorableStack {
            data: Vec::with_capacity(limit.initial()),
            checkpoint: Checkpoint::None,
            undo: Vec::new(),
            limit,
            name,
        }
    }

    /// Name used in error messages
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Number of visible entries
    pub fn len(&self) -> usize {
        match self.checkpoint {
            Checkpoint::None => self.data.len(),
            Checkpoint::Active { save, jump } => jump + (self.data.len() - save),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.checkpoint, Checkpoint::Active { .. })
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Visible index of the save point, if one is active
    pub fn save_point(&self) -> Option<usize> {
        match self.checkpoint {
            Checkpoint::None => None,
            Checkpoint::Active { jump, .. } => Some(jump),
        }
    }

    fn ensure_room(&mut self) -> Result<(), RuntimeError> {
        if let Limit::Fixed(max) = self.limit {
            if self.data.len() >= max {
                return Err(RuntimeError::CapacityExceeded {
                    collection: self.name,
                    capacity: max,
                });
            }
        }
        if self.data.len() < self.data.capacity() {
            return Ok(());
        }
        match self.limit {
            Limit::Fixed(max) => {
                self.data.reserve_exact(max - self.data.len());
            }
            Limit::Dynamic(_) => {
                let target = self.limit.grow(self.data.len()).unwrap_or(self.data.len() + 1);
                self.data.reserve_exact(target - self.data.len());
            }
        }
        Ok(())
    }

    pub fn push(&mut self, value: T) -> Result<(), RuntimeError> {
        self.ensure_room()?;
        self.data.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<T, RuntimeError> {
        match &mut self.checkpoint {
            Checkpoint::Active { save, jump } if self.data.len() == *save => {
                if *jump == 0 {
                    return Err(RuntimeError::StackUnderflow {
                        collection: self.name,
                    });
                }
                *jump -= 1;
                Ok(self.data[*jump].clone())
            }
            _ => self.data.pop().ok_or(RuntimeError::StackUnderflow {
                collection: self.name,
            }),
        }
    }

    pub fn top(&self) -> Result<&T, RuntimeError> {
        let len = self.len();
        if len == 0 {
            return Err(RuntimeError::StackUnderflow {
                collection: self.name,
            });
        }
        Ok(&self.data[self.physical(len - 1)])
    }

    fn physical(&self, index: usize) -> usize {
        match self.checkpoint {
            Checkpoint::Active { save, jump } if index >= jump => index - jump + save,
            _ => index,
        }
    }

    /// Visible entry at `index`, counted from the bottom
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len() {
            return None;
        }
        self.data.get(self.physical(index))
    }

    /// Overwrite the visible entry at `index`
    pub fn set(&mut self, index: usize, value: T) -> Result<(), RuntimeError> {
        let len = self.len();
        if index >= len {
            return Err(RuntimeError::IndexOutOfBounds {
                collection: self.name,
                index,
                len,
            });
        }
        let physical = self.physical(index);
        if let Checkpoint::Active { save, .. } = self.checkpoint {
            if physical < save {
                let old = std::mem::replace(&mut self.data[physical], value);
                self.undo.push((physical, old));
                return Ok(());
            }
        }
        self.data[physical] = value;
        Ok(())
    }

    /// Pop until only `len` visible entries remain
    pub fn truncate(&mut self, len: usize) -> Result<(), RuntimeError> {
        while self.len() > len {
            self.pop()?;
        }
        Ok(())
    }

    /// Visible entries, bottom to top
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (low, high) = match self.checkpoint {
            Checkpoint::None => (&self.data[..], &self.data[self.data.len()..]),
            Checkpoint::Active { save, jump } => (&self.data[..jump], &self.data[save..]),
        };
        low.iter().chain(high.iter())
    }

    /// Visible entries, top to bottom
    pub fn iter_rev(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().rev()
    }

    /// Every stored entry, hidden ones and undo-log copies included
    pub fn iter_all(&self) -> impl Iterator<Item = &T> + '_ {
        self.data.iter().chain(self.undo.iter().map(|(_, v)| v))
    }

    pub fn save(&mut self) -> Result<(), RuntimeError> {
        if self.is_saved() {
            return Err(RuntimeError::AlreadySaved {
                collection: self.name,
            });
        }
        let len = self.data.len();
        self.checkpoint = Checkpoint::Active {
            save: len,
            jump: len,
        };
        Ok(())
    }

    pub fn restore(&mut self) -> Result<(), RuntimeError> {
        let Checkpoint::Active { save, .. } = self.checkpoint else {
            return Err(RuntimeError::NotSaved {
                collection: self.name,
            });
        };
        self.data.truncate(save);
        while let Some((index, old)) = self.undo.pop() {
            self.data[index] = old;
        }
        self.checkpoint = Checkpoint::None;
        Ok(())
    }

    pub fn forget(&mut self) -> Result<(), RuntimeError> {
        let Checkpoint::Active { save, jump } = self.checkpoint else {
            return Err(RuntimeError::NotSaved {
                collection: self.name,
            });
        };
        self.data.drain(jump..save);
        self.undo.clear();
        self.checkpoint = Checkpoint::None;
        Ok(())
    }

    /// Drop everything, checkpoint included
    pub fn clear(&mut self) {
        self.data.clear();
        self.undo.clear();
        self.checkpoint = Checkpoint::None;
    }

    /// Replace the contents wholesale; only valid without a checkpoint
    pub fn replace(&mut self, entries: Vec<T>) -> Result<(), RuntimeError> {
        if self.is_saved() {
            return Err(RuntimeError::AlreadySaved {
                collection: self.name,
            });
        }
        if let Some(max) = self.limit.max() {
            if entries.len() > max {
                return Err(RuntimeError::CapacityExceeded {
                    collection: self.name,
                    capacity: max,
                });
            }
        }
        self.data = entries;
        self.undo.clear();
        Ok(())
    }

    /// Visible entries as an owned vector
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> RestorableStack<i32> {
        let mut s = RestorableStack::new("test stack", Limit::Dynamic(4));
        for v in [1, 2, 3] {
            s.push(v).expect("push");
        }
        s
    }

    #[test]
    fn test_restore_undoes_pushes_and_pops() {
        let mut s = stack();
        s.save().expect("save");
        s.push(4).expect("push");
        assert_eq!(s.pop().expect("pop"), 4);
        assert_eq!(s.pop().expect("pop"), 3);
        assert_eq!(s.pop().expect("pop"), 2);
        s.push(9).expect("push");
        assert_eq!(s.to_vec(), vec![1, 9]);

        s.restore().expect("restore");
        assert_eq!(s.to_vec(), vec![1, 2, 3]);
        assert_eq!(*s.top().expect("top"), 3);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_forget_commits_pops() {
        let mut s = stack();
        s.save().expect("save");
        s.pop().expect("pop");
        s.pop().expect("pop");
        s.push(7).expect("push");
        s.forget().expect("forget");
        assert_eq!(s.to_vec(), vec![1, 7]);
        assert!(!s.is_saved());
    }

    #[test]
    fn test_set_below_save_is_undone() {
        let mut s = stack();
        s.save().expect("save");
        s.set(0, 10).expect("set");
        s.push(4).expect("push");
        s.set(3, 40).expect("set");
        assert_eq!(s.to_vec(), vec![10, 2, 3, 40]);
        s.restore().expect("restore");
        assert_eq!(s.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_double_save_is_an_error() {
        let mut s = stack();
        s.save().expect("save");
        assert!(matches!(s.save(), Err(RuntimeError::AlreadySaved { .. })));
        assert!(matches!(
            RestorableStack::<i32>::new("x", Limit::Dynamic(1)).restore(),
            Err(RuntimeError::NotSaved { .. })
        ));
    }

    #[test]
    fn test_underflow_below_checkpoint() {
        let mut s = RestorableStack::new("test stack", Limit::Dynamic(2));
        s.push(1).expect("push");
        s.save().expect("save");
        assert_eq!(s.pop().expect("pop"), 1);
        assert!(matches!(s.pop(), Err(RuntimeError::StackUnderflow { .. })));
    }

    #[test]
    fn test_fixed_capacity_overflows() {
        let mut s = RestorableStack::new("fixed", Limit::Fixed(2));
        s.push(1).expect("push");
        s.push(2).expect("push");
        assert!(matches!(
            s.push(3),
            Err(RuntimeError::CapacityExceeded { capacity: 2, .. })
        ));
    }

    #[test]
    fn test_fixed_limit_holds_after_replace() {
        let mut s = RestorableStack::new("fixed", Limit::Fixed(2));
        let mut entries = Vec::with_capacity(16);
        entries.push(1);
        s.replace(entries).expect("replace");
        s.push(2).expect("push");
        assert!(matches!(
            s.push(3),
            Err(RuntimeError::CapacityExceeded { capacity: 2, .. })
        ));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_iteration_skips_hidden_region() {
        let mut s = stack();
        s.save().expect("save");
        s.pop().expect("pop");
        s.push(5).expect("push");
        let forward: Vec<i32> = s.iter().copied().collect();
        let backward: Vec<i32> = s.iter_rev().copied().collect();
        assert_eq!(forward, vec![1, 2, 5]);
        assert_eq!(backward, vec![5, 2, 1]);
        assert_eq!(s.iter_all().count(), 4);
    }
}
