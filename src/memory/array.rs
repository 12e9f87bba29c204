//! Fixed-length array with a shadow-buffer checkpoint
//!
//! Unlike [`RestorableStack`](super::restorable::RestorableStack), writes here are
//! point updates. While saved, [`RestorableArray::set`] lands in a parallel shadow
//! buffer and reads prefer the shadow; `forget()` copies the shadow over the main
//! buffer and `restore()` throws it away.

use crate::interpreter::errors::RuntimeError;

#[derive(Debug, Clone)]
pub struct RestorableArray<T> {
    data: Vec<T>,
    shadow: Vec<Option<T>>,
    saved: bool,
    null: T,
    name: &'static str,
}

impl<T: Clone + PartialEq> RestorableArray<T> {
    /// Array of `len` entries, all set to the `null` sentinel
    pub fn new(name: &'static str, len: usize, null: T) -> Self {
        RestorableArray {
            data: vec![null.clone(); len],
            shadow: Vec::new(),
            saved: false,
            null,
            name,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The sentinel empty entries hold
    pub fn null(&self) -> &T {
        &self.null
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    fn check(&self, index: usize) -> Result<(), RuntimeError> {
        if index >= self.data.len() {
            return Err(RuntimeError::IndexOutOfBounds {
                collection: self.name,
                index,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&T, RuntimeError> {
        self.check(index)?;
        if self.saved {
            if let Some(Some(value)) = self.shadow.get(index) {
                return Ok(value);
            }
        }
        Ok(&self.data[index])
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<(), RuntimeError> {
        self.check(index)?;
        if self.saved {
            self.shadow[index] = Some(value);
        } else {
            self.data[index] = value;
        }
        Ok(())
    }

    /// Grow to at least `len` entries, filling with the sentinel
    pub fn resize(&mut self, len: usize) -> Result<(), RuntimeError> {
        if self.saved {
            return Err(RuntimeError::CheckpointActive {
                operation: "resize an array",
            });
        }
        if len > self.data.len() {
            self.data.resize(len, self.null.clone());
        }
        Ok(())
    }

    /// Reset every entry to the sentinel
    pub fn clear(&mut self) {
        let null = self.null.clone();
        self.data.iter_mut().for_each(|v| *v = null.clone());
        self.shadow.clear();
        self.saved = false;
    }

    pub fn save(&mut self) -> Result<(), RuntimeError> {
        if self.saved {
            return Err(RuntimeError::AlreadySaved {
                collection: self.name,
            });
        }
        self.shadow.clear();
        self.shadow.resize(self.data.len(), None);
        self.saved = true;
        Ok(())
    }

    pub fn restore(&mut self) -> Result<(), RuntimeError> {
        if !self.saved {
            return Err(RuntimeError::NotSaved {
                collection: self.name,
            });
        }
        self.shadow.clear();
        self.saved = false;
        Ok(())
    }

    pub fn forget(&mut self) -> Result<(), RuntimeError> {
        if !self.saved {
            return Err(RuntimeError::NotSaved {
                collection: self.name,
            });
        }
        for (slot, pending) in self.data.iter_mut().zip(self.shadow.drain(..)) {
            if let Some(value) = pending {
                *slot = value;
            }
        }
        self.saved = false;
        Ok(())
    }

    /// Current values, shadow applied
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.data.len()).map(move |i| match self.shadow.get(i) {
            Some(Some(value)) if self.saved => value,
            _ => &self.data[i],
        })
    }

    /// Every stored value, shadowed originals included
    pub fn iter_all(&self) -> impl Iterator<Item = &T> + '_ {
        self.data
            .iter()
            .chain(self.shadow.iter().filter_map(|v| v.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_hides_writes_until_forget() {
        let mut a = RestorableArray::new("visits", 3, 0u32);
        a.set(1, 5).expect("set");
        a.save().expect("save");
        a.set(1, 6).expect("set");
        a.set(2, 1).expect("set");
        assert_eq!(*a.get(1).expect("get"), 6);

        a.forget().expect("forget");
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![0, 6, 1]);
    }

    #[test]
    fn test_restore_drops_shadow() {
        let mut a = RestorableArray::new("visits", 2, 0u32);
        a.set(0, 3).expect("set");
        a.save().expect("save");
        a.set(0, 4).expect("set");
        a.restore().expect("restore");
        assert_eq!(*a.get(0).expect("get"), 3);
        assert!(matches!(a.forget(), Err(RuntimeError::NotSaved { .. })));
    }

    #[test]
    fn test_out_of_bounds() {
        let a = RestorableArray::new("visits", 2, 0u32);
        assert!(matches!(
            a.get(2),
            Err(RuntimeError::IndexOutOfBounds { index: 2, len: 2, .. })
        ));
    }
}
