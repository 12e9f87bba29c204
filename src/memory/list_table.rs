//! Bitset-encoded list values
//!
//! Every list instance is a row of `u32` words in one flat buffer. A row holds:
//! - one *membership* bit per declared list type (which lists the value draws from)
//! - one *containment* bit per flag, numbered globally across all list types
//!
//! ```text
//! bit:  0 .. num_lists | num_lists .. num_lists + num_flags
//!       membership     | containment
//! ```
//!
//! Membership survives when every flag is removed, so an emptied list still knows
//! its origin (needed by `LIST_ALL`, `LIST_INVERT` and `redefine`).
//!
//! Instances are reclaimed by mark-and-sweep together with the string table.

use super::value::{ListFlag, ListId, NULL_FLAG};
use crate::interpreter::errors::RuntimeError;

const BITS: usize = 32;

/// Flag declaration loaded from the story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagDefinition {
    pub name: String,
    pub value: i32,
}

/// List type declaration loaded from the story
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDefinition {
    pub name: String,
    pub flags: Vec<FlagDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Empty,
    Unused,
    Used,
}

#[derive(Debug, Clone)]
pub struct ListTable {
    list_names: Vec<String>,
    list_start: Vec<usize>,
    flag_names: Vec<String>,
    flag_values: Vec<i32>,
    words: usize,
    data: Vec<u32>,
    state: Vec<EntryState>,
}

impl ListTable {
    pub fn new(definitions: &[ListDefinition]) -> Self {
        let mut list_start = Vec::with_capacity(definitions.len() + 1);
        let mut flag_names = Vec::new();
        let mut flag_values = Vec::new();
        for def in definitions {
            list_start.push(flag_names.len());
            for flag in &def.flags {
                flag_names.push(flag.name.clone());
                flag_values.push(flag.value);
            }
        }
        list_start.push(flag_names.len());
        let bits = definitions.len() + flag_names.len();
        ListTable {
            list_names: definitions.iter().map(|d| d.name.clone()).collect(),
            list_start,
            flag_names,
            flag_values,
            words: bits.div_ceil(BITS).max(1),
            data: Vec::new(),
            state: Vec::new(),
        }
    }

    pub fn num_lists(&self) -> usize {
        self.list_names.len()
    }

    pub fn num_flags(&self) -> usize {
        self.flag_names.len()
    }

    /// Number of instance slots, free ones included
    pub fn capacity(&self) -> usize {
        self.state.len()
    }

    /// Number of live instances
    pub fn live(&self) -> usize {
        self.state
            .iter()
            .filter(|s| **s != EntryState::Empty)
            .count()
    }

    pub fn find_list(&self, name: &str) -> Option<usize> {
        self.list_names.iter().position(|n| n == name)
    }

    /// Look a flag up by `flag` or `list.flag`
    pub fn find_flag(&self, name: &str) -> Option<ListFlag> {
        if let Some((list, flag)) = name.split_once('.') {
            let list = self.find_list(list)?;
            let range = self.flag_range(list);
            let start = range.start;
            return range
                .into_iter()
                .find(|fid| self.flag_names[*fid] == flag)
                .map(|fid| ListFlag::new(list, fid - start));
        }
        let fid = self.flag_names.iter().position(|n| n == name)?;
        self.flag_of(fid)
    }

    fn flag_range(&self, list: usize) -> std::ops::Range<usize> {
        self.list_start[list]..self.list_start[list + 1]
    }

    fn fid(&self, flag: ListFlag) -> Result<usize, RuntimeError> {
        let list = flag.list as usize;
        if flag.is_null() || list >= self.num_lists() {
            return Err(RuntimeError::UnknownList {
                list: flag.list as i32,
                flag: flag.flag as i32,
            });
        }
        let fid = self.list_start[list] + flag.flag as usize;
        if fid >= self.list_start[list + 1] {
            return Err(RuntimeError::UnknownList {
                list: flag.list as i32,
                flag: flag.flag as i32,
            });
        }
        Ok(fid)
    }

    fn flag_of(&self, fid: usize) -> Option<ListFlag> {
        let list = self.list_start.iter().rposition(|start| *start <= fid)?;
        if list >= self.num_lists() {
            return None;
        }
        Some(ListFlag::new(list, fid - self.list_start[list]))
    }

    fn list_of_fid(&self, fid: usize) -> usize {
        self.list_start
            .iter()
            .rposition(|start| *start <= fid)
            .unwrap_or(0)
            .min(self.num_lists().saturating_sub(1))
    }

    pub fn flag_name(&self, flag: ListFlag) -> Result<&str, RuntimeError> {
        Ok(&self.flag_names[self.fid(flag)?])
    }

    /// Numeric value of a flag
    pub fn flag_value(&self, flag: ListFlag) -> Result<i32, RuntimeError> {
        Ok(self.flag_values[self.fid(flag)?])
    }

    /// Flag of `list` whose value is `value`
    pub fn flag_with_value(&self, list: usize, value: i32) -> Option<ListFlag> {
        if list >= self.num_lists() {
            return None;
        }
        let start = self.list_start[list];
        self.flag_range(list)
            .find(|fid| self.flag_values[*fid] == value)
            .map(|fid| ListFlag::new(list, fid - start))
    }

    // -- row access -------------------------------------------------------------

    fn row(&self, id: ListId) -> Result<&[u32], RuntimeError> {
        let i = id.0 as usize;
        match self.state.get(i) {
            Some(EntryState::Empty) | None => Err(RuntimeError::IndexOutOfBounds {
                collection: "list table",
                index: i,
                len: self.state.len(),
            }),
            Some(_) => Ok(&self.data[i * self.words..(i + 1) * self.words]),
        }
    }

    fn get_bit(row: &[u32], bit: usize) -> bool {
        row[bit / BITS] & (1 << (bit % BITS)) != 0
    }

    fn set_bit(row: &mut [u32], bit: usize, on: bool) {
        if on {
            row[bit / BITS] |= 1 << (bit % BITS);
        } else {
            row[bit / BITS] &= !(1 << (bit % BITS));
        }
    }

    fn has_list(&self, row: &[u32], list: usize) -> bool {
        Self::get_bit(row, list)
    }

    fn has_flag(&self, row: &[u32], fid: usize) -> bool {
        Self::get_bit(row, self.num_lists() + fid)
    }

    fn flags_in(&self, row: &[u32]) -> impl Iterator<Item = usize> + '_ {
        let row = row.to_vec();
        (0..self.num_flags()).filter(move |fid| Self::get_bit(&row, self.num_lists() + fid))
    }

    /// Recompute membership bits from containment bits; falls back to `origin`
    /// membership when nothing is contained
    fn fix_membership(&self, row: &mut [u32], origin: &[u32]) {
        let mut any = false;
        for list in 0..self.num_lists() {
            let contained = self.flag_range(list).any(|fid| self.has_flag(row, fid));
            Self::set_bit(row, list, contained);
            any |= contained;
        }
        if !any {
            for list in 0..self.num_lists() {
                Self::set_bit(row, list, Self::get_bit(origin, list));
            }
        }
    }

    fn alloc(&mut self, state: EntryState) -> ListId {
        if let Some(i) = self.state.iter().position(|s| *s == EntryState::Empty) {
            self.state[i] = state;
            self.data[i * self.words..(i + 1) * self.words].fill(0);
            return ListId(i as u32);
        }
        self.state.push(state);
        self.data.extend(std::iter::repeat(0).take(self.words));
        ListId((self.state.len() - 1) as u32)
    }

    fn store(&mut self, row: Vec<u32>) -> ListId {
        let id = self.alloc(EntryState::Used);
        let i = id.0 as usize;
        self.data[i * self.words..(i + 1) * self.words].copy_from_slice(&row);
        id
    }

    /// New empty list with no origin
    pub fn create(&mut self) -> ListId {
        self.alloc(EntryState::Used)
    }

    /// Add `flag` to `id` in place
    pub fn add_flag_inplace(&mut self, id: ListId, flag: ListFlag) -> Result<(), RuntimeError> {
        let fid = self.fid(flag)?;
        self.row(id)?;
        let list = flag.list as usize;
        let bits = self.num_lists() + fid;
        let i = id.0 as usize;
        let row = &mut self.data[i * self.words..(i + 1) * self.words];
        Self::set_bit(row, list, true);
        Self::set_bit(row, bits, true);
        Ok(())
    }

    /// Mark `list` as an origin of `id` without adding flags
    pub fn add_origin_inplace(&mut self, id: ListId, list: usize) -> Result<(), RuntimeError> {
        self.row(id)?;
        let i = id.0 as usize;
        let row = &mut self.data[i * self.words..(i + 1) * self.words];
        Self::set_bit(row, list, true);
        Ok(())
    }

    /// List holding exactly `flag`
    pub fn from_flag(&mut self, flag: ListFlag) -> Result<ListId, RuntimeError> {
        let id = self.create();
        if !flag.is_null() {
            self.add_flag_inplace(id, flag)?;
        }
        Ok(id)
    }

    pub fn contains(&self, id: ListId, flag: ListFlag) -> Result<bool, RuntimeError> {
        let fid = self.fid(flag)?;
        Ok(self.has_flag(self.row(id)?, fid))
    }

    /// Contained flags, ordered by value then list declaration order
    pub fn flags(&self, id: ListId) -> Result<Vec<ListFlag>, RuntimeError> {
        let row = self.row(id)?;
        let mut fids: Vec<usize> = self.flags_in(row).collect();
        fids.sort_by_key(|fid| (self.flag_values[*fid], self.list_of_fid(*fid)));
        Ok(fids.into_iter().filter_map(|fid| self.flag_of(fid)).collect())
    }

    /// Lists this value draws from
    pub fn origins(&self, id: ListId) -> Result<Vec<usize>, RuntimeError> {
        let row = self.row(id)?;
        Ok((0..self.num_lists()).filter(|l| self.has_list(row, *l)).collect())
    }

    // -- set algebra ------------------------------------------------------------

    /// Union of both lists
    pub fn union(&mut self, lhs: ListId, rhs: ListId) -> Result<ListId, RuntimeError> {
        let l = self.row(lhs)?;
        let r = self.row(rhs)?;
        let row: Vec<u32> = l.iter().zip(r).map(|(a, b)| a | b).collect();
        Ok(self.store(row))
    }

    /// `lhs` without the flags of `rhs`
    pub fn difference(&mut self, lhs: ListId, rhs: ListId) -> Result<ListId, RuntimeError> {
        let l = self.row(lhs)?.to_vec();
        let r = self.row(rhs)?;
        let mut row: Vec<u32> = l.iter().zip(r).map(|(a, b)| a & !b).collect();
        self.fix_membership(&mut row, &l);
        Ok(self.store(row))
    }

    /// Flags present in both lists
    pub fn intersection(&mut self, lhs: ListId, rhs: ListId) -> Result<ListId, RuntimeError> {
        let l = self.row(lhs)?.to_vec();
        let r = self.row(rhs)?;
        let mut row: Vec<u32> = l.iter().zip(r).map(|(a, b)| a & b).collect();
        self.fix_membership(&mut row, &l);
        Ok(self.store(row))
    }

    /// Move every flag `by` ranks within its own list; flags shifted out of range
    /// are dropped
    pub fn shift(&mut self, id: ListId, by: i32) -> Result<ListId, RuntimeError> {
        let src = self.row(id)?.to_vec();
        let mut row = vec![0u32; self.words];
        for fid in self.flags_in(&src).collect::<Vec<_>>() {
            let list = self.list_of_fid(fid);
            let target = self.flag_values[fid].saturating_add(by);
            if let Some(flag) = self.flag_with_value(list, target) {
                let tfid = self.fid(flag)?;
                Self::set_bit(&mut row, self.num_lists() + tfid, true);
            }
        }
        self.fix_membership(&mut row, &src);
        Ok(self.store(row))
    }

    /// Flag `by` ranks away from `flag` in the same list, or the null flag
    pub fn shift_flag(&self, flag: ListFlag, by: i32) -> Result<ListFlag, RuntimeError> {
        let value = self.flag_value(flag)?.saturating_add(by);
        Ok(self
            .flag_with_value(flag.list as usize, value)
            .unwrap_or(NULL_FLAG))
    }

    /// Copy of `new` that keeps the origin of `old` when `new` has none
    pub fn redefine(&mut self, old: ListId, new: ListId) -> Result<ListId, RuntimeError> {
        let o = self.row(old)?.to_vec();
        let mut row = self.row(new)?.to_vec();
        let has_origin = (0..self.num_lists()).any(|l| self.has_list(&row, l));
        if !has_origin {
            for list in 0..self.num_lists() {
                Self::set_bit(&mut row, list, Self::get_bit(&o, list));
            }
        }
        Ok(self.store(row))
    }

    pub fn count(&self, id: ListId) -> Result<i32, RuntimeError> {
        Ok(self.flags_in(self.row(id)?).count() as i32)
    }

    pub fn is_empty(&self, id: ListId) -> Result<bool, RuntimeError> {
        Ok(self.count(id)? == 0)
    }

    /// Lowest valued flag, or the null flag for an empty list
    pub fn min(&self, id: ListId) -> Result<ListFlag, RuntimeError> {
        Ok(self.flags(id)?.first().copied().unwrap_or(NULL_FLAG))
    }

    /// Highest valued flag, or the null flag for an empty list
    pub fn max(&self, id: ListId) -> Result<ListFlag, RuntimeError> {
        let row = self.row(id)?;
        let best = self
            .flags_in(row)
            .min_by_key(|fid| (-(self.flag_values[*fid] as i64), self.list_of_fid(*fid)));
        Ok(best.and_then(|fid| self.flag_of(fid)).unwrap_or(NULL_FLAG))
    }

    /// Every flag of every origin list
    pub fn all(&mut self, id: ListId) -> Result<ListId, RuntimeError> {
        let src = self.row(id)?.to_vec();
        let mut row = vec![0u32; self.words];
        for list in 0..self.num_lists() {
            if self.has_list(&src, list) {
                Self::set_bit(&mut row, list, true);
                for fid in self.flag_range(list) {
                    Self::set_bit(&mut row, self.num_lists() + fid, true);
                }
            }
        }
        Ok(self.store(row))
    }

    /// Every flag of the origin lists that is not contained
    pub fn invert(&mut self, id: ListId) -> Result<ListId, RuntimeError> {
        let src = self.row(id)?.to_vec();
        let mut row = vec![0u32; self.words];
        for list in 0..self.num_lists() {
            if self.has_list(&src, list) {
                Self::set_bit(&mut row, list, true);
                for fid in self.flag_range(list) {
                    let bit = self.num_lists() + fid;
                    Self::set_bit(&mut row, bit, !Self::get_bit(&src, bit));
                }
            }
        }
        Ok(self.store(row))
    }

    /// Flags whose value lies in `min..=max`
    pub fn range(&mut self, id: ListId, min: i32, max: i32) -> Result<ListId, RuntimeError> {
        let src = self.row(id)?.to_vec();
        let mut row = src.clone();
        for fid in self.flags_in(&src).collect::<Vec<_>>() {
            let value = self.flag_values[fid];
            if value < min || value > max {
                Self::set_bit(&mut row, self.num_lists() + fid, false);
            }
        }
        self.fix_membership(&mut row, &src);
        Ok(self.store(row))
    }

    /// The `n`-th contained flag in value order
    pub fn nth(&self, id: ListId, n: usize) -> Result<ListFlag, RuntimeError> {
        Ok(self.flags(id)?.get(n).copied().unwrap_or(NULL_FLAG))
    }

    // -- comparison -------------------------------------------------------------

    fn bounds(&self, id: ListId) -> Result<Option<(i32, i32)>, RuntimeError> {
        let flags = self.flags(id)?;
        match (flags.first(), flags.last()) {
            (Some(lo), Some(_)) => {
                let hi = self.max(id)?;
                Ok(Some((self.flag_value(*lo)?, self.flag_value(hi)?)))
            }
            _ => Ok(None),
        }
    }

    /// Same flags contained
    pub fn equal(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        let l = self.row(lhs)?;
        let r = self.row(rhs)?;
        Ok(self.flags_in(l).eq(self.flags_in(r)))
    }

    /// Every flag of `lhs` is below every flag of `rhs`
    pub fn less(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        Ok(match (self.bounds(lhs)?, self.bounds(rhs)?) {
            (Some((_, lmax)), Some((rmin, _))) => lmax < rmin,
            (None, Some(_)) => true,
            _ => false,
        })
    }

    /// Every flag of `lhs` is above every flag of `rhs`
    pub fn greater(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        Ok(match (self.bounds(lhs)?, self.bounds(rhs)?) {
            (Some((lmin, _)), Some((_, rmax))) => lmin > rmax,
            (Some(_), None) => true,
            _ => false,
        })
    }

    pub fn less_equal(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        Ok(match (self.bounds(lhs)?, self.bounds(rhs)?) {
            (Some((lmin, lmax)), Some((rmin, rmax))) => lmax <= rmax && lmin <= rmin,
            (None, _) => true,
            _ => false,
        })
    }

    pub fn greater_equal(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        Ok(match (self.bounds(lhs)?, self.bounds(rhs)?) {
            (Some((lmin, lmax)), Some((rmin, rmax))) => lmin >= rmin && lmax >= rmax,
            (_, None) => true,
            _ => false,
        })
    }

    /// `lhs` contains every flag of a non-empty `rhs`
    pub fn has(&self, lhs: ListId, rhs: ListId) -> Result<bool, RuntimeError> {
        let l = self.row(lhs)?;
        let r = self.row(rhs)?;
        let mut any = false;
        for fid in self.flags_in(r) {
            any = true;
            if !self.has_flag(l, fid) {
                return Ok(false);
            }
        }
        Ok(any)
    }

    // -- rendering --------------------------------------------------------------

    /// Flag names joined by ", " in value order
    pub fn render(&self, id: ListId) -> Result<String, RuntimeError> {
        let names = self
            .flags(id)?
            .into_iter()
            .map(|f| self.flag_name(f).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.join(", "))
    }

    // -- collection -------------------------------------------------------------

    /// Mark every collectable instance as unused
    pub fn clear_usage(&mut self) {
        for state in &mut self.state {
            if *state == EntryState::Used {
                *state = EntryState::Unused;
            }
        }
    }

    pub fn mark_used(&mut self, id: ListId) {
        if let Some(state) = self.state.get_mut(id.0 as usize) {
            if *state == EntryState::Unused {
                *state = EntryState::Used;
            }
        }
    }

    /// Free every unmarked instance; returns the number freed
    pub fn gc(&mut self) -> usize {
        let mut freed = 0;
        for i in 0..self.state.len() {
            if self.state[i] == EntryState::Unused {
                self.state[i] = EntryState::Empty;
                self.data[i * self.words..(i + 1) * self.words].fill(0);
                freed += 1;
            }
        }
        freed
    }

    /// Live instances with their raw rows, for serialisation
    pub fn rows(&self) -> Vec<(ListId, &[u32])> {
        self.state
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != EntryState::Empty)
            .map(|(i, _)| (ListId(i as u32), &self.data[i * self.words..(i + 1) * self.words]))
            .collect()
    }

    /// Words per row
    pub fn row_words(&self) -> usize {
        self.words
    }

    /// Recreate an instance from a serialised row
    pub fn insert_row(&mut self, row: &[u32]) -> Result<ListId, RuntimeError> {
        if row.len() != self.words {
            return Err(RuntimeError::CorruptSnapshot {
                message: format!(
                    "list row has {} words, story needs {}",
                    row.len(),
                    self.words
                ),
            });
        }
        let id = self.alloc(EntryState::Used);
        let i = id.0 as usize;
        self.data[i * self.words..(i + 1) * self.words].copy_from_slice(row);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ListTable {
        let colors = ListDefinition {
            name: "colors".to_string(),
            flags: ["red", "green", "blue"]
                .iter()
                .enumerate()
                .map(|(i, n)| FlagDefinition {
                    name: n.to_string(),
                    value: i as i32 + 1,
                })
                .collect(),
        };
        let sizes = ListDefinition {
            name: "sizes".to_string(),
            flags: ["small", "large"]
                .iter()
                .enumerate()
                .map(|(i, n)| FlagDefinition {
                    name: n.to_string(),
                    value: i as i32 + 1,
                })
                .collect(),
        };
        ListTable::new(&[colors, sizes])
    }

    fn list_of(t: &mut ListTable, names: &[&str]) -> ListId {
        let id = t.create();
        for name in names {
            let flag = t.find_flag(name).expect("flag exists");
            t.add_flag_inplace(id, flag).expect("add");
        }
        id
    }

    #[test]
    fn test_union_commutes() {
        let mut t = table();
        let a = list_of(&mut t, &["red", "small"]);
        let b = list_of(&mut t, &["blue"]);
        let ab = t.union(a, b).expect("union");
        let ba = t.union(b, a).expect("union");
        assert!(t.equal(ab, ba).expect("equal"));
        assert_eq!(t.render(ab).expect("render"), "red, small, blue");
    }

    #[test]
    fn test_difference_keeps_elements_absent_from_rhs() {
        let mut t = table();
        let a = list_of(&mut t, &["red", "green"]);
        let b = list_of(&mut t, &["green", "blue"]);
        let ab = t.union(a, b).expect("union");
        let diff = t.difference(ab, b).expect("difference");
        assert_eq!(t.render(diff).expect("render"), "red");

        let emptied = t.difference(a, a).expect("difference");
        assert_eq!(t.count(emptied).expect("count"), 0);
        assert_eq!(t.origins(emptied).expect("origins"), vec![0]);
    }

    #[test]
    fn test_redefine_inherits_origin() {
        let mut t = table();
        let old = list_of(&mut t, &["large"]);
        let empty = t.create();
        let redefined = t.redefine(old, empty).expect("redefine");
        assert!(t.equal(redefined, empty).expect("equal"));
        assert_eq!(t.origins(redefined).expect("origins"), vec![1]);

        let all = t.all(redefined).expect("all");
        assert_eq!(t.render(all).expect("render"), "small, large");
    }

    #[test]
    fn test_shift_within_list() {
        let mut t = table();
        let a = list_of(&mut t, &["red", "blue"]);
        let up = t.shift(a, 1).expect("shift");
        assert_eq!(t.render(up).expect("render"), "green");

        let green = t.find_flag("colors.green").expect("flag");
        assert_eq!(t.shift_flag(green, 5).expect("shift"), NULL_FLAG);
        assert_eq!(
            t.shift_flag(green, -1).expect("shift"),
            t.find_flag("red").expect("flag")
        );
    }

    #[test]
    fn test_ordering_uses_min_and_max() {
        let mut t = table();
        let low = list_of(&mut t, &["red"]);
        let high = list_of(&mut t, &["green", "blue"]);
        assert!(t.less(low, high).expect("less"));
        assert!(t.greater(high, low).expect("greater"));
        assert!(t.less_equal(low, high).expect("le"));
        assert!(!t.greater_equal(low, high).expect("ge"));
        assert_eq!(t.min(high).expect("min"), t.find_flag("green").expect("flag"));
        assert_eq!(t.max(high).expect("max"), t.find_flag("blue").expect("flag"));
    }

    #[test]
    fn test_has_and_invert() {
        let mut t = table();
        let a = list_of(&mut t, &["red", "green"]);
        let b = list_of(&mut t, &["green"]);
        let empty = t.create();
        assert!(t.has(a, b).expect("has"));
        assert!(!t.has(b, a).expect("has"));
        assert!(!t.has(a, empty).expect("has"));

        let inv = t.invert(a).expect("invert");
        assert_eq!(t.render(inv).expect("render"), "blue");
    }

    #[test]
    fn test_gc_frees_unmarked() {
        let mut t = table();
        let keep = list_of(&mut t, &["red"]);
        let _drop = list_of(&mut t, &["blue"]);

        t.clear_usage();
        t.mark_used(keep);
        assert_eq!(t.gc(), 1);
        assert_eq!(t.live(), 1);
        assert!(t.count(keep).is_ok());

        let reused = t.create();
        assert_eq!(reused, ListId(1));
    }
}
