//! Runtime string storage with mark-and-sweep collection
//!
//! Strings created while running (concatenations, numbers cast to text, choice and
//! tag text, `END_STR` results) are interned here and referenced by id from
//! [`Value`](super::value::Value)s. Collection is driven by the globals store:
//! [`StringTable::clear_usage`], then every owner marks what it references, then
//! [`StringTable::gc`] drops the rest.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
struct StringEntry {
    text: String,
    used: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StringTable {
    entries: FxHashMap<u32, StringEntry>,
    next_id: u32,
}

impl StringTable {
    pub fn new() -> Self {
        StringTable {
            entries: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Store a string and return its id
    pub fn insert(&mut self, text: impl Into<String>) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.entries.insert(
            id,
            StringEntry {
                text: text.into(),
                used: true,
            },
        );
        id
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(|e| e.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark every string as unused
    pub fn clear_usage(&mut self) {
        for entry in self.entries.values_mut() {
            entry.used = false;
        }
    }

    pub fn mark_used(&mut self, id: u32) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.used = true;
        }
    }

    /// Drop every string not marked since the last `clear_usage`; returns the number
    /// of strings freed
    pub fn gc(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.used);
        before - self.entries.len()
    }

    /// Live entries ordered by id
    pub fn entries(&self) -> Vec<(u32, &str)> {
        let mut all: Vec<(u32, &str)> = self
            .entries
            .iter()
            .map(|(id, e)| (*id, e.text.as_str()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_keeps_marked() {
        let mut table = StringTable::new();
        let keep = table.insert("keep");
        let drop = table.insert("drop");

        table.clear_usage();
        table.mark_used(keep);
        assert_eq!(table.gc(), 1);
        assert_eq!(table.get(keep), Some("keep"));
        assert_eq!(table.get(drop), None);
    }

    #[test]
    fn test_new_strings_survive_the_next_sweep() {
        let mut table = StringTable::new();
        let id = table.insert("fresh");
        assert_eq!(table.gc(), 0);
        assert_eq!(table.get(id), Some("fresh"));
    }
}
