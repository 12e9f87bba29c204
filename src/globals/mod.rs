//! Story-wide state shared by every runner of a story
//!
//! [`Globals`] owns the global variables, the visit and turn counters of every
//! container, the runtime string and list tables, and the variable observers. Runners
//! register themselves here so the garbage collector can find every string and list
//! they still reference.
//!
//! # Checkpoints
//!
//! While a runner looks ahead past a newline the store is saved together with the
//! runner: variable writes go to a pending map, counter writes to the shadow buffers
//! of [`RestorableArray`], and observer notifications are queued. A restore throws all
//! of it away; a forget commits it.
//!
//! # Garbage collection
//!
//! Runtime strings and list instances are collected by mark and sweep at line
//! boundaries: every entry is marked unused, the variables and every live runner
//! mark what they reference, and the rest is freed.

use crate::config::RuntimeConfig;
use crate::interpreter::engine::RunnerState;
use crate::interpreter::errors::RuntimeError;
use crate::memory::array::RestorableArray;
use crate::memory::list_table::ListTable;
use crate::memory::string_table::StringTable;
use crate::memory::value::{hash_string, Hash, HostValue, ListFlag, ListId, StrRef, Value};
use crate::memory::TextSource;
use crate::snapshot::Snapshot;
use crate::story::Story;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

/// Callback run when an observed variable changes: `(new, old)`, where `old` is
/// `None` on the first assignment
pub type Observer = Box<dyn FnMut(&HostValue, Option<&HostValue>)>;

#[derive(Debug, Clone, PartialEq)]
struct Notification {
    name: Hash,
    new: HostValue,
    old: Option<HostValue>,
}

/// Id translation from a snapshot's dense tables to the freshly rebuilt ones
#[derive(Debug, Clone, Default)]
pub(crate) struct SnapshotIds {
    pub strings: Vec<u32>,
    pub lists: Vec<ListId>,
}

pub(crate) struct GlobalsImpl {
    pub(crate) story: Rc<Story>,
    pub(crate) config: RuntimeConfig,
    pub(crate) strings: StringTable,
    pub(crate) lists: ListTable,
    variables: FxHashMap<Hash, Value>,
    pending: Option<FxHashMap<Hash, Value>>,
    visits: RestorableArray<u32>,
    turns: RestorableArray<i32>,
    turn: u32,
    saved_turn: Option<u32>,
    notifications: Vec<Notification>,
    saved_notifications: Option<usize>,
    observers: Vec<(Hash, Observer)>,
    runners: Vec<Weak<RefCell<RunnerState>>>,
    initialized: bool,
    pub(crate) snapshot_ids: Option<SnapshotIds>,
}

/// Read-only text view over a story and its globals
pub(crate) struct Texts<'a> {
    pub story: &'a Story,
    pub globals: &'a GlobalsImpl,
}

impl TextSource for Texts<'_> {
    fn story_text(&self, offset: u32) -> Result<&str, RuntimeError> {
        self.story.string(offset)
    }

    fn heap_text(&self, id: u32) -> Result<&str, RuntimeError> {
        self.globals
            .strings
            .get(id)
            .ok_or(RuntimeError::IndexOutOfBounds {
                collection: "string table",
                index: id as usize,
                len: self.globals.strings.len(),
            })
    }

    fn list_text(&self, id: ListId) -> Result<String, RuntimeError> {
        self.globals.lists.render(id)
    }

    fn flag_text(&self, flag: ListFlag) -> Result<String, RuntimeError> {
        self.globals.lists.flag_name(flag).map(str::to_string)
    }
}

impl GlobalsImpl {
    fn new(story: Rc<Story>, config: RuntimeConfig) -> Self {
        let containers = story.num_containers() as usize;
        let lists = ListTable::new(story.list_definitions());
        GlobalsImpl {
            story,
            config,
            strings: StringTable::new(),
            lists,
            variables: FxHashMap::default(),
            pending: None,
            visits: RestorableArray::new("visit counts", containers, 0),
            turns: RestorableArray::new("turn counts", containers, -1),
            turn: 0,
            saved_turn: None,
            notifications: Vec::new(),
            saved_notifications: None,
            observers: Vec::new(),
            runners: Vec::new(),
            initialized: false,
            snapshot_ids: None,
        }
    }

    pub(crate) fn texts(&self) -> Texts<'_> {
        Texts {
            story: &self.story,
            globals: self,
        }
    }

    // -- variables --------------------------------------------------------------

    pub(crate) fn get(&self, name: Hash) -> Option<Value> {
        self.pending
            .as_ref()
            .and_then(|p| p.get(&name))
            .or_else(|| self.variables.get(&name))
            .copied()
    }

    pub(crate) fn contains(&self, name: Hash) -> bool {
        self.get(name).is_some()
    }

    /// Assign a global, queueing a notification if someone observes it
    ///
    /// Values are compared as the host sees them, so equal text held in two
    /// different strings is not a change.
    pub(crate) fn set(&mut self, name: Hash, value: Value) -> Result<(), RuntimeError> {
        if self.observers.iter().any(|(n, _)| *n == name) {
            let new_host = self.to_host(&value)?;
            let old_host = match self.get(name) {
                Some(v) => Some(self.to_host(&v)?),
                None => None,
            };
            if old_host.as_ref() != Some(&new_host) {
                self.notifications.push(Notification {
                    name,
                    new: new_host,
                    old: old_host,
                });
            }
        }
        match &mut self.pending {
            Some(pending) => {
                pending.insert(name, value);
            }
            None => {
                self.variables.insert(name, value);
            }
        }
        Ok(())
    }

    /// Every variable in hash order, pending writes applied
    pub(crate) fn variables(&self) -> Vec<(Hash, Value)> {
        let mut all: FxHashMap<Hash, Value> = self.variables.clone();
        if let Some(pending) = &self.pending {
            all.extend(pending.iter().map(|(k, v)| (*k, *v)));
        }
        let mut vars: Vec<(Hash, Value)> = all.into_iter().collect();
        vars.sort_by_key(|(name, _)| *name);
        vars
    }

    /// Value as the host sees it
    pub(crate) fn to_host(&self, value: &Value) -> Result<HostValue, RuntimeError> {
        let texts = self.texts();
        Ok(match *value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Int(i) => HostValue::Int(i),
            Value::Uint(u) => HostValue::Uint(u),
            Value::Float(f) => HostValue::Float(f),
            Value::Divert(offset) => HostValue::Uint(offset),
            Value::Pointer { name, frame: 0 } => match self.get(name) {
                Some(target) if !matches!(target, Value::Pointer { .. }) => self.to_host(&target)?,
                _ => HostValue::Null,
            },
            ref other => match texts.render(other)? {
                Some(text) => HostValue::Str(text),
                None => HostValue::Null,
            },
        })
    }

    /// Host value as a runtime value; strings are copied into the string table
    pub(crate) fn from_host(&mut self, value: &HostValue) -> Value {
        match value {
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Int(i) => Value::Int(*i),
            HostValue::Uint(u) => Value::Uint(*u),
            HostValue::Float(f) => Value::Float(*f),
            HostValue::Str(s) => Value::heap_str(self.strings.insert(s.as_str())),
        }
    }

    // -- counters ---------------------------------------------------------------

    /// Record an entry into `container`
    pub(crate) fn visit(&mut self, container: u32) -> Result<(), RuntimeError> {
        let visits = *self.visits.get(container as usize)?;
        self.visits.set(container as usize, visits + 1)?;
        self.turns.set(container as usize, self.turn as i32)?;
        trace!("visit container {} ({} times)", container, visits + 1);
        Ok(())
    }

    pub(crate) fn visits(&self, container: u32) -> Result<u32, RuntimeError> {
        self.visits.get(container as usize).copied()
    }

    /// Turns since `container` was last visited, -1 if never
    pub(crate) fn turns_since(&self, container: u32) -> Result<i32, RuntimeError> {
        let last = *self.turns.get(container as usize)?;
        Ok(if last < 0 { -1 } else { self.turn as i32 - last })
    }

    pub(crate) fn turn(&self) -> u32 {
        self.turn
    }

    pub(crate) fn next_turn(&mut self) {
        self.turn += 1;
    }

    pub(crate) fn counters(&self) -> (Vec<u32>, Vec<i32>) {
        (
            self.visits.iter().copied().collect(),
            self.turns.iter().copied().collect(),
        )
    }

    /// Replace counters and variables with state read back from a snapshot
    pub(crate) fn load(
        &mut self,
        initialized: bool,
        turn: u32,
        visits: &[u32],
        turns: &[i32],
        variables: Vec<(Hash, Value)>,
    ) -> Result<(), RuntimeError> {
        for (i, count) in visits.iter().enumerate() {
            self.visits.set(i, *count)?;
        }
        for (i, last) in turns.iter().enumerate() {
            self.turns.set(i, *last)?;
        }
        self.turn = turn;
        self.variables = variables.into_iter().collect();
        self.initialized = initialized;
        Ok(())
    }

    // -- checkpoint -------------------------------------------------------------

    pub(crate) fn save(&mut self) -> Result<(), RuntimeError> {
        if self.pending.is_some() {
            return Err(RuntimeError::AlreadySaved {
                collection: "global variables",
            });
        }
        self.visits.save()?;
        self.turns.save()?;
        self.pending = Some(FxHashMap::default());
        self.saved_turn = Some(self.turn);
        self.saved_notifications = Some(self.notifications.len());
        Ok(())
    }

    pub(crate) fn restore(&mut self) -> Result<(), RuntimeError> {
        if self.pending.take().is_none() {
            return Err(RuntimeError::NotSaved {
                collection: "global variables",
            });
        }
        self.visits.restore()?;
        self.turns.restore()?;
        if let Some(turn) = self.saved_turn.take() {
            self.turn = turn;
        }
        if let Some(len) = self.saved_notifications.take() {
            self.notifications.truncate(len);
        }
        Ok(())
    }

    pub(crate) fn forget(&mut self) -> Result<(), RuntimeError> {
        let Some(pending) = self.pending.take() else {
            return Err(RuntimeError::NotSaved {
                collection: "global variables",
            });
        };
        self.variables.extend(pending);
        self.visits.forget()?;
        self.turns.forget()?;
        self.saved_turn = None;
        self.saved_notifications = None;
        Ok(())
    }

    pub(crate) fn is_saved(&self) -> bool {
        self.pending.is_some()
    }

    // -- runners ----------------------------------------------------------------

    pub(crate) fn register(&mut self, runner: &Rc<RefCell<RunnerState>>) {
        self.runners.retain(|r| r.strong_count() > 0);
        self.runners.push(Rc::downgrade(runner));
        debug!("runner registered, {} live", self.runners.len());
    }

    pub(crate) fn unregister(&mut self, runner: &Rc<RefCell<RunnerState>>) {
        let target = Rc::downgrade(runner);
        self.runners
            .retain(|r| r.strong_count() > 0 && !r.ptr_eq(&target));
    }

    /// Live runners in creation order
    pub(crate) fn runners(&self) -> Vec<Rc<RefCell<RunnerState>>> {
        self.runners.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn set_initialized(&mut self) {
        self.initialized = true;
    }

    // -- garbage collection -----------------------------------------------------

    fn mark(&mut self, value: &Value) {
        match value {
            Value::Str(chain) => {
                for part in chain.parts() {
                    if let StrRef::Heap(id) = part {
                        self.strings.mark_used(*id);
                    }
                }
            }
            Value::List(id) => self.lists.mark_used(*id),
            _ => {}
        }
    }

    fn collect(&mut self) {
        let runners = self.runners();
        let mut marked = Vec::new();
        for runner in &runners {
            let Ok(state) = runner.try_borrow() else {
                trace!("gc skipped: a runner is executing");
                return;
            };
            marked.extend(state.live_values());
        }

        self.strings.clear_usage();
        self.lists.clear_usage();
        for value in marked {
            self.mark(&value);
        }
        let globals: Vec<Value> = self
            .variables
            .values()
            .chain(self.pending.iter().flat_map(|p| p.values()))
            .copied()
            .collect();
        for value in globals {
            self.mark(&value);
        }

        let strings = self.strings.gc();
        let lists = self.lists.gc();
        if strings > 0 || lists > 0 {
            debug!("gc freed {} strings and {} lists", strings, lists);
        }
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        if self.saved_notifications.is_some() {
            return Vec::new();
        }
        std::mem::take(&mut self.notifications)
    }
}

/// Shared handle to a story's global state
#[derive(Clone)]
pub struct Globals {
    inner: Rc<RefCell<GlobalsImpl>>,
}

impl std::fmt::Debug for Globals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(g) => f
                .debug_struct("Globals")
                .field("variables", &g.variables.len())
                .field("turn", &g.turn)
                .field("runners", &g.runners.len())
                .finish(),
            Err(_) => f.write_str("Globals { <in use> }"),
        }
    }
}

impl Globals {
    pub fn new(story: Rc<Story>, config: RuntimeConfig) -> Self {
        Globals {
            inner: Rc::new(RefCell::new(GlobalsImpl::new(story, config))),
        }
    }

    pub(crate) fn from_impl(inner: GlobalsImpl) -> Self {
        Globals {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub(crate) fn empty_impl(story: Rc<Story>, config: RuntimeConfig) -> GlobalsImpl {
        GlobalsImpl::new(story, config)
    }

    pub(crate) fn borrow(&self) -> Result<Ref<'_, GlobalsImpl>, RuntimeError> {
        self.inner
            .try_borrow()
            .map_err(|_| RuntimeError::Invalidated { what: "globals" })
    }

    pub(crate) fn borrow_mut(&self) -> Result<RefMut<'_, GlobalsImpl>, RuntimeError> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| RuntimeError::Invalidated { what: "globals" })
    }

    pub fn story(&self) -> Result<Rc<Story>, RuntimeError> {
        Ok(Rc::clone(&self.borrow()?.story))
    }

    pub fn config(&self) -> Result<RuntimeConfig, RuntimeError> {
        Ok(self.borrow()?.config)
    }

    pub fn is_initialized(&self) -> Result<bool, RuntimeError> {
        Ok(self.borrow()?.initialized)
    }

    pub fn get_variable(&self, name: &str) -> Result<Option<HostValue>, RuntimeError> {
        self.get_variable_hash(hash_string(name))
    }

    pub fn get_variable_hash(&self, name: Hash) -> Result<Option<HostValue>, RuntimeError> {
        let g = self.borrow()?;
        match g.get(name) {
            Some(value) => Ok(Some(g.to_host(&value)?)),
            None => Ok(None),
        }
    }

    /// Every global as the host sees it, ordered by name hash
    pub fn variables(&self) -> Result<Vec<(Hash, HostValue)>, RuntimeError> {
        let g = self.borrow()?;
        g.variables()
            .iter()
            .map(|(name, value)| Ok((*name, g.to_host(value)?)))
            .collect()
    }

    /// Assign an existing global; `Ok(false)` if the story declares no such variable
    pub fn set_variable(&self, name: &str, value: impl Into<HostValue>) -> Result<bool, RuntimeError> {
        let name = hash_string(name);
        let value = value.into();
        {
            let mut g = self.borrow_mut()?;
            if !g.contains(name) {
                return Ok(false);
            }
            if g.is_saved() {
                return Err(RuntimeError::CheckpointActive {
                    operation: "set a variable from the host",
                });
            }
            let value = g.from_host(&value);
            g.set(name, value)?;
        }
        self.dispatch_notifications()?;
        Ok(true)
    }

    /// Call `callback` whenever the variable changes
    pub fn observe<F>(&self, name: &str, callback: F) -> Result<(), RuntimeError>
    where
        F: FnMut(&HostValue, Option<&HostValue>) + 'static,
    {
        let mut g = self.borrow_mut()?;
        g.observers.push((hash_string(name), Box::new(callback)));
        Ok(())
    }

    /// Times the container at `path` has been entered, `None` if no such path
    pub fn visits(&self, path: &str) -> Result<Option<u32>, RuntimeError> {
        let g = self.borrow()?;
        let Some(offset) = g.story.find_offset(hash_string(path)) else {
            return Ok(None);
        };
        match g.story.container_at(offset) {
            Some(id) => Ok(Some(g.visits(id)?)),
            None => Ok(None),
        }
    }

    /// Number of choices taken so far
    pub fn turn(&self) -> Result<u32, RuntimeError> {
        Ok(self.borrow()?.turn)
    }

    pub fn num_runners(&self) -> Result<usize, RuntimeError> {
        Ok(self.borrow()?.runners().len())
    }

    /// Free runtime strings and lists nothing references any more
    pub fn gc(&self) -> Result<(), RuntimeError> {
        self.borrow_mut()?.collect();
        Ok(())
    }

    /// Serialise these globals and every live runner on them
    pub fn create_snapshot(&self) -> Result<Snapshot, RuntimeError> {
        crate::snapshot::create(self)
    }

    /// Run observer callbacks for every committed change
    ///
    /// Callbacks run with nothing borrowed, so they may read variables through
    /// this handle.
    pub(crate) fn dispatch_notifications(&self) -> Result<(), RuntimeError> {
        let (notifications, mut observers) = {
            let mut g = self.borrow_mut()?;
            let notifications = g.take_notifications();
            if notifications.is_empty() {
                return Ok(());
            }
            (notifications, std::mem::take(&mut g.observers))
        };
        for n in &notifications {
            for (name, callback) in observers.iter_mut() {
                if *name == n.name {
                    callback(&n.new, n.old.as_ref());
                }
            }
        }
        let mut g = self.borrow_mut()?;
        observers.append(&mut g.observers);
        g.observers = observers;
        Ok(())
    }

    pub(crate) fn ptr_eq(&self, other: &Globals) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::builder::StoryBuilder;
    use std::cell::Cell;

    fn story() -> Rc<Story> {
        let mut b = StoryBuilder::new();
        let root = b.begin_container("root", crate::interpreter::command::ContainerFlags::TRACK_VISITS);
        b.done();
        b.end_container(root);
        Story::from_bytes(&b.build().expect("build")).expect("load")
    }

    #[test]
    fn test_pending_writes_restore() {
        let globals = story().new_globals();
        let mut g = globals.borrow_mut().expect("borrow");
        let x = hash_string("x");
        g.set(x, Value::Int(1)).expect("set");
        g.save().expect("save");
        g.set(x, Value::Int(2)).expect("set");
        assert_eq!(g.get(x), Some(Value::Int(2)));
        g.restore().expect("restore");
        assert_eq!(g.get(x), Some(Value::Int(1)));

        g.save().expect("save");
        g.set(x, Value::Int(3)).expect("set");
        g.forget().expect("forget");
        assert_eq!(g.get(x), Some(Value::Int(3)));
    }

    #[test]
    fn test_visit_counts_and_turns() {
        let globals = story().new_globals();
        let mut g = globals.borrow_mut().expect("borrow");
        assert_eq!(g.turns_since(0).expect("turns"), -1);
        g.visit(0).expect("visit");
        g.next_turn();
        g.next_turn();
        assert_eq!(g.visits(0).expect("visits"), 1);
        assert_eq!(g.turns_since(0).expect("turns"), 2);
        assert!(g.visit(9).is_err());
    }

    #[test]
    fn test_observer_sees_old_value() {
        let globals = story().new_globals();
        let x = hash_string("x");
        globals
            .borrow_mut()
            .expect("borrow")
            .set(x, Value::Int(1))
            .expect("set");

        let seen = Rc::new(Cell::new((0, 0)));
        let sink = Rc::clone(&seen);
        globals
            .observe("x", move |new, old| {
                sink.set((
                    new.as_int().unwrap_or(-1),
                    old.and_then(HostValue::as_int).unwrap_or(-1),
                ));
            })
            .expect("observe");

        assert!(globals.set_variable("x", 5).expect("set"));
        assert_eq!(seen.get(), (5, 1));
        assert!(!globals.set_variable("missing", 5).expect("set"));
    }

    #[test]
    fn test_same_text_is_not_a_change() {
        let globals = story().new_globals();
        globals
            .borrow_mut()
            .expect("borrow")
            .set(hash_string("name"), Value::Null)
            .expect("set");

        let calls = Rc::new(Cell::new(0));
        let sink = Rc::clone(&calls);
        globals
            .observe("name", move |_, _| sink.set(sink.get() + 1))
            .expect("observe");

        assert!(globals.set_variable("name", "Ada").expect("set"));
        assert!(globals.set_variable("name", "Ada").expect("set"));
        assert_eq!(calls.get(), 1);
        assert!(globals.set_variable("name", "Grace").expect("set"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_gc_frees_unreferenced_strings() {
        let globals = story().new_globals();
        {
            let mut g = globals.borrow_mut().expect("borrow");
            let kept = g.strings.insert("kept");
            g.strings.insert("dropped");
            g.set(hash_string("s"), Value::heap_str(kept)).expect("set");
        }
        globals.gc().expect("gc");
        let g = globals.borrow().expect("borrow");
        assert_eq!(g.strings.len(), 1);
        assert_eq!(
            g.to_host(&g.get(hash_string("s")).expect("var")).expect("host"),
            HostValue::Str("kept".to_string())
        );
    }
}
