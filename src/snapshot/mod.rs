// Serialised runner and globals state

use crate::config::RuntimeConfig;
use crate::globals::{Globals, GlobalsImpl, SnapshotIds};
use crate::interpreter::choices::Choice;
use crate::interpreter::engine::{Registers, Runner, RunnerState};
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::random::Prng;
use crate::interpreter::tags::{TagPhase, Tags};
use crate::memory::callstack::{Entry, FrameKind};
use crate::memory::value::{ListFlag, ListId, StrChain, StrRef, Value, MAX_STRING_PARTS};
use crate::story::header::BIN_VERSION;
use crate::story::Story;
use log::debug;
use rustc_hash::FxHashMap;
use std::rc::Rc;

const MAGIC: [u8; 4] = *b"INKS";
const HEADER_WORDS: usize = 7;

/// A serialised globals store together with every runner sharing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    data: Vec<u8>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Wrap bytes produced by [`Snapshot::to_bytes`]; only the envelope is checked here
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Snapshot, RuntimeError> {
        let snapshot = Snapshot { data: data.into() };
        let mut r = SnapReader::new(&snapshot.data);
        let fingerprint = Fingerprint::read(&mut r)?;
        if fingerprint.total as usize != snapshot.data.len() {
            return Err(corrupt(format!(
                "length field says {} bytes, got {}",
                fingerprint.total,
                snapshot.data.len()
            )));
        }
        Ok(snapshot)
    }

    pub fn num_runners(&self) -> usize {
        let mut r = SnapReader::new(&self.data);
        Fingerprint::read(&mut r)
            .map(|f| f.runners.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn corrupt(message: impl Into<String>) -> RuntimeError {
    RuntimeError::CorruptSnapshot {
        message: message.into(),
    }
}

fn mismatch(message: impl Into<String>) -> RuntimeError {
    RuntimeError::SnapshotMismatch {
        message: message.into(),
    }
}

// -- writer --------------------------------------------------------------------

/// Byte sink with a sizing mode: the first pass only counts, the second writes
pub(crate) struct SnapWriter {
    out: Vec<u8>,
    len: usize,
    sizing: bool,
}

impl SnapWriter {
    fn sizer() -> Self {
        SnapWriter {
            out: Vec::new(),
            len: 0,
            sizing: true,
        }
    }

    fn with_capacity(capacity: usize) -> Self {
        SnapWriter {
            out: Vec::with_capacity(capacity),
            len: 0,
            sizing: false,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
        if !self.sizing {
            self.out.extend_from_slice(bytes);
        }
    }

    fn u8(&mut self, value: u8) {
        self.bytes(&[value]);
    }

    fn bool(&mut self, value: bool) {
        self.u8(value as u8);
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_ne_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.bytes(&value.to_ne_bytes());
    }

    fn opt_u32(&mut self, value: Option<u32>) {
        self.bool(value.is_some());
        self.u32(value.unwrap_or(0));
    }

    fn str(&mut self, text: &str) {
        self.u32(text.len() as u32);
        self.bytes(text.as_bytes());
    }

    fn strs(&mut self, texts: &[String]) {
        self.u32(texts.len() as u32);
        for text in texts {
            self.str(text);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Dense renumbering of the runtime string and list tables
struct DenseIds {
    strings: FxHashMap<u32, u32>,
    lists: FxHashMap<ListId, u32>,
}

impl DenseIds {
    fn string(&self, id: u32) -> Result<u32, RuntimeError> {
        self.strings
            .get(&id)
            .copied()
            .ok_or_else(|| corrupt(format!("string {} is not in the string table", id)))
    }

    fn list(&self, id: ListId) -> Result<u32, RuntimeError> {
        self.lists
            .get(&id)
            .copied()
            .ok_or_else(|| corrupt(format!("list {} is not in the list table", id.0)))
    }
}

fn write_value(w: &mut SnapWriter, ids: &DenseIds, value: &Value) -> Result<(), RuntimeError> {
    match *value {
        Value::Null => w.u8(0),
        Value::Bool(b) => {
            w.u8(1);
            w.bool(b);
        }
        Value::Uint(u) => {
            w.u8(2);
            w.u32(u);
        }
        Value::Int(i) => {
            w.u8(3);
            w.i32(i);
        }
        Value::Float(f) => {
            w.u8(4);
            w.u32(f.to_bits());
        }
        Value::Str(chain) => {
            w.u8(5);
            w.u8(chain.parts().len() as u8);
            for part in chain.parts() {
                match *part {
                    StrRef::Story(offset) => {
                        w.u8(0);
                        w.u32(offset);
                    }
                    StrRef::Heap(id) => {
                        w.u8(1);
                        w.u32(ids.string(id)?);
                    }
                }
            }
        }
        Value::ListFlag(flag) => {
            w.u8(6);
            w.bytes(&flag.list.to_ne_bytes());
            w.bytes(&flag.flag.to_ne_bytes());
        }
        Value::List(id) => {
            w.u8(7);
            w.u32(ids.list(id)?);
        }
        Value::Divert(offset) => {
            w.u8(8);
            w.u32(offset);
        }
        Value::Pointer { name, frame } => {
            w.u8(9);
            w.u32(name);
            w.u32(frame);
        }
        Value::Newline => w.u8(10),
        Value::Glue => w.u8(11),
        Value::Marker => w.u8(12),
        Value::FuncStart => w.u8(13),
        Value::FuncEnd => w.u8(14),
    }
    Ok(())
}

fn write_values(w: &mut SnapWriter, ids: &DenseIds, values: &[Value]) -> Result<(), RuntimeError> {
    w.u32(values.len() as u32);
    for value in values {
        write_value(w, ids, value)?;
    }
    Ok(())
}

fn write_choice(w: &mut SnapWriter, choice: &Choice) {
    w.u32(choice.index as u32);
    w.str(&choice.text);
    w.u32(choice.path);
    w.opt_u32(choice.thread);
    w.strs(&choice.tags);
}

fn write_globals(w: &mut SnapWriter, g: &GlobalsImpl, ids: &DenseIds) -> Result<(), RuntimeError> {
    let strings = g.strings.entries();
    w.u32(strings.len() as u32);
    for (_, text) in &strings {
        w.str(text);
    }

    let rows = g.lists.rows();
    w.u32(g.lists.row_words() as u32);
    w.u32(rows.len() as u32);
    for (_, row) in &rows {
        for word in row.iter() {
            w.u32(*word);
        }
    }

    w.bool(g.is_initialized());
    w.u32(g.turn());
    let (visits, turns) = g.counters();
    w.u32(visits.len() as u32);
    for count in &visits {
        w.u32(*count);
    }
    for last in &turns {
        w.i32(*last);
    }

    let variables = g.variables();
    w.u32(variables.len() as u32);
    for (name, value) in &variables {
        w.u32(*name);
        write_value(w, ids, value)?;
    }
    Ok(())
}

fn write_runner(w: &mut SnapWriter, s: &RunnerState, ids: &DenseIds) -> Result<(), RuntimeError> {
    let regs = &s.regs;
    w.opt_u32(regs.ip);
    w.u32(regs.last);
    w.opt_u32(regs.done);
    w.bool(regs.falling);
    w.bool(regs.eval_mode);
    w.u32(regs.rng.seed());
    w.u32(regs.rng.state());
    w.bool(regs.fallback.is_some());
    if let Some(fallback) = &regs.fallback {
        write_choice(w, fallback);
    }
    w.opt_u32(regs.choice_tag_mark.map(|m| m as u32));

    write_values(w, ids, &s.eval.to_vec())?;
    write_values(w, ids, &s.output.to_vec())?;

    w.u32(s.callstack.next_thread());
    let entries = s.callstack.to_vec();
    w.u32(entries.len() as u32);
    for entry in &entries {
        match *entry {
            Entry::Var { name, ref value } => {
                w.u8(0);
                w.u32(name);
                write_value(w, ids, value)?;
            }
            Entry::Frame { kind, ret, eval } => {
                w.u8(1);
                w.bool(kind == FrameKind::Tunnel);
                w.u32(ret);
                w.bool(eval);
            }
            Entry::ThreadStart { id, ret, eval } => {
                w.u8(2);
                w.u32(id);
                w.u32(ret);
                w.bool(eval);
            }
            Entry::ThreadEnd { id } => {
                w.u8(3);
                w.u32(id);
            }
            Entry::Jump { skip } => {
                w.u8(4);
                w.u32(skip);
            }
            Entry::Shadow { name, frame, ref value } => {
                w.u8(5);
                w.u32(name);
                w.u32(frame);
                write_value(w, ids, value)?;
            }
        }
    }

    for stack in [&s.containers, &s.threads] {
        w.u32(stack.len() as u32);
        for id in stack.iter() {
            w.u32(*id);
        }
    }
    w.u32(s.thread_done.len() as u32);
    for (thread, point) in s.thread_done.iter() {
        w.u32(*thread);
        w.opt_u32(*point);
    }

    w.u32(s.choices.len() as u32);
    for choice in s.choices.iter() {
        write_choice(w, choice);
    }

    w.u8(match s.tags.phase {
        TagPhase::Global => 0,
        TagPhase::Knot => 1,
        TagPhase::Line => 2,
    });
    w.strs(&s.tags.global);
    w.strs(&s.tags.knot);
    w.strs(&s.tags.line);
    Ok(())
}

/// Serialise `globals` and its runners, in the order they were created
pub(crate) fn create(globals: &Globals) -> Result<Snapshot, RuntimeError> {
    let g = globals.borrow()?;
    if g.is_saved() {
        return Err(RuntimeError::CheckpointActive {
            operation: "create a snapshot",
        });
    }

    let runners = g.runners();
    let mut states = Vec::with_capacity(runners.len());
    for runner in &runners {
        let state = runner
            .try_borrow()
            .map_err(|_| RuntimeError::Invalidated { what: "runner" })?;
        if state.is_saved() {
            return Err(RuntimeError::CheckpointActive {
                operation: "create a snapshot",
            });
        }
        states.push(state);
    }

    let ids = DenseIds {
        strings: g
            .strings
            .entries()
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i as u32))
            .collect(),
        lists: g
            .lists
            .rows()
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i as u32))
            .collect(),
    };

    let encode = |w: &mut SnapWriter, offsets: &[u32], total: u32| -> Result<Vec<u32>, RuntimeError> {
        w.bytes(&MAGIC);
        w.u32(states.len() as u32);
        w.u32(total);
        w.u32(BIN_VERSION);
        w.u32(g.story.num_containers());
        w.u32(g.lists.num_lists() as u32);
        w.u32(g.lists.num_flags() as u32);
        for offset in offsets {
            w.u32(*offset);
        }
        write_globals(w, &g, &ids)?;
        let mut starts = Vec::with_capacity(states.len());
        for state in &states {
            starts.push(w.len() as u32);
            write_runner(w, state, &ids)?;
        }
        Ok(starts)
    };

    let mut sizer = SnapWriter::sizer();
    let starts = encode(&mut sizer, &vec![0; states.len()], 0)?;
    let total = sizer.len();

    let mut writer = SnapWriter::with_capacity(total);
    encode(&mut writer, &starts, total as u32)?;
    let data = writer.finish();

    debug!(
        "snapshot: {} bytes, {} runners, {} strings, {} lists",
        data.len(),
        states.len(),
        ids.strings.len(),
        ids.lists.len()
    );
    Ok(Snapshot { data })
}

// -- reader --------------------------------------------------------------------

pub(crate) struct SnapReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SnapReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        SnapReader { data, pos: 0 }
    }

    fn seek(&mut self, pos: usize) -> Result<(), RuntimeError> {
        if pos > self.data.len() {
            return Err(corrupt(format!("offset {} is past the end", pos)));
        }
        self.pos = pos;
        Ok(())
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], RuntimeError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(corrupt(format!(
                "truncated: wanted {} bytes at offset {}",
                len, self.pos
            ))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RuntimeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.array::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool, RuntimeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(corrupt(format!("bad boolean {}", other))),
        }
    }

    fn u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(u32::from_ne_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, RuntimeError> {
        Ok(i32::from_ne_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, RuntimeError> {
        Ok(i16::from_ne_bytes(self.array()?))
    }

    fn opt_u32(&mut self) -> Result<Option<u32>, RuntimeError> {
        let present = self.bool()?;
        let value = self.u32()?;
        Ok(present.then_some(value))
    }

    /// Element count, bounded by the bytes left so corrupt counts fail early
    fn count(&mut self) -> Result<usize, RuntimeError> {
        let n = self.u32()? as usize;
        if n > self.data.len() - self.pos {
            return Err(corrupt(format!("count {} exceeds the remaining data", n)));
        }
        Ok(n)
    }

    fn str(&mut self) -> Result<String, RuntimeError> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("string is not UTF-8"))
    }

    fn strs(&mut self) -> Result<Vec<String>, RuntimeError> {
        let n = self.count()?;
        (0..n).map(|_| self.str()).collect()
    }
}

/// Header fields a snapshot must share with the story it is loaded into
struct Fingerprint {
    runners: Vec<u32>,
    total: u32,
    bin_version: u32,
    containers: u32,
    lists: u32,
    flags: u32,
}

impl Fingerprint {
    fn read(r: &mut SnapReader<'_>) -> Result<Fingerprint, RuntimeError> {
        if r.array::<4>()? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let num_runners = r.count()?;
        let mut words = [0u32; HEADER_WORDS - 2];
        for word in words.iter_mut() {
            *word = r.u32()?;
        }
        let runners = (0..num_runners)
            .map(|_| r.u32())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Fingerprint {
            runners,
            total: words[0],
            bin_version: words[1],
            containers: words[2],
            lists: words[3],
            flags: words[4],
        })
    }

    /// Refuse a snapshot taken from a different story
    fn verify(&self, story: &Story) -> Result<(), RuntimeError> {
        if self.bin_version != BIN_VERSION {
            return Err(RuntimeError::VersionMismatch {
                expected: BIN_VERSION,
                found: self.bin_version,
            });
        }
        if self.containers != story.num_containers() {
            return Err(mismatch(format!(
                "{} containers, story has {}",
                self.containers,
                story.num_containers()
            )));
        }
        if self.lists as usize != story.list_definitions().len() || self.flags as usize != story.num_flags() {
            return Err(mismatch(format!(
                "{} lists with {} flags, story has {} with {}",
                self.lists,
                self.flags,
                story.list_definitions().len(),
                story.num_flags()
            )));
        }
        Ok(())
    }
}

fn read_value(r: &mut SnapReader<'_>, ids: &SnapshotIds) -> Result<Value, RuntimeError> {
    let tag = r.u8()?;
    Ok(match tag {
        0 => Value::Null,
        1 => Value::Bool(r.bool()?),
        2 => Value::Uint(r.u32()?),
        3 => Value::Int(r.i32()?),
        4 => Value::Float(f32::from_bits(r.u32()?)),
        5 => {
            let n = r.u8()? as usize;
            if n == 0 || n > MAX_STRING_PARTS {
                return Err(corrupt(format!("string with {} parts", n)));
            }
            let mut chain: Option<StrChain> = None;
            for _ in 0..n {
                let part = match r.u8()? {
                    0 => StrRef::Story(r.u32()?),
                    1 => {
                        let index = r.u32()? as usize;
                        let id = ids
                            .strings
                            .get(index)
                            .ok_or_else(|| corrupt(format!("string index {}", index)))?;
                        StrRef::Heap(*id)
                    }
                    other => return Err(corrupt(format!("string part kind {}", other))),
                };
                let single = StrChain::single(part);
                chain = Some(match chain {
                    None => single,
                    Some(c) => c.concat(&single).ok_or_else(|| corrupt("string chain too long"))?,
                });
            }
            match chain {
                Some(chain) => Value::Str(chain),
                None => return Err(corrupt("empty string chain")),
            }
        }
        6 => {
            let list = r.i16()?;
            let flag = r.i16()?;
            Value::ListFlag(ListFlag { list, flag })
        }
        7 => {
            let index = r.u32()? as usize;
            let id = ids
                .lists
                .get(index)
                .ok_or_else(|| corrupt(format!("list index {}", index)))?;
            Value::List(*id)
        }
        8 => Value::Divert(r.u32()?),
        9 => Value::Pointer {
            name: r.u32()?,
            frame: r.u32()?,
        },
        10 => Value::Newline,
        11 => Value::Glue,
        12 => Value::Marker,
        13 => Value::FuncStart,
        14 => Value::FuncEnd,
        other => return Err(corrupt(format!("unknown value tag {}", other))),
    })
}

fn read_values(r: &mut SnapReader<'_>, ids: &SnapshotIds) -> Result<Vec<Value>, RuntimeError> {
    let n = r.count()?;
    (0..n).map(|_| read_value(r, ids)).collect()
}

fn read_choice(r: &mut SnapReader<'_>) -> Result<Choice, RuntimeError> {
    Ok(Choice {
        index: r.u32()? as usize,
        text: r.str()?,
        path: r.u32()?,
        thread: r.opt_u32()?,
        tags: r.strs()?,
    })
}

/// Rebuild the globals store of a snapshot
pub(crate) fn load_globals(
    story: Rc<Story>,
    snapshot: &Snapshot,
    config: RuntimeConfig,
) -> Result<Globals, RuntimeError> {
    let mut r = SnapReader::new(&snapshot.data);
    Fingerprint::read(&mut r)?.verify(&story)?;

    let mut g = Globals::empty_impl(Rc::clone(&story), config);

    let num_strings = r.count()?;
    let mut strings = Vec::with_capacity(num_strings);
    for _ in 0..num_strings {
        let text = r.str()?;
        strings.push(g.strings.insert(text));
    }

    let words = r.u32()? as usize;
    if words != g.lists.row_words() {
        return Err(mismatch(format!(
            "list rows of {} words, story needs {}",
            words,
            g.lists.row_words()
        )));
    }
    let num_lists = r.count()?;
    let mut lists = Vec::with_capacity(num_lists);
    for _ in 0..num_lists {
        let row = (0..words)
            .map(|_| r.u32())
            .collect::<Result<Vec<_>, _>>()?;
        lists.push(g.lists.insert_row(&row)?);
    }
    let ids = SnapshotIds { strings, lists };

    let initialized = r.bool()?;
    let turn = r.u32()?;
    let num_containers = r.count()?;
    if num_containers != story.num_containers() as usize {
        return Err(corrupt(format!("{} visit counters", num_containers)));
    }
    let visits = (0..num_containers)
        .map(|_| r.u32())
        .collect::<Result<Vec<_>, _>>()?;
    let turns = (0..num_containers)
        .map(|_| r.i32())
        .collect::<Result<Vec<_>, _>>()?;

    let num_variables = r.count()?;
    let mut variables = Vec::with_capacity(num_variables);
    for _ in 0..num_variables {
        let name = r.u32()?;
        variables.push((name, read_value(&mut r, &ids)?));
    }

    g.load(initialized, turn, &visits, &turns, variables)?;
    debug!(
        "loaded globals: {} strings, {} lists, {} variables, turn {}",
        ids.strings.len(),
        ids.lists.len(),
        num_variables,
        turn
    );
    g.snapshot_ids = Some(ids);
    Ok(Globals::from_impl(g))
}

/// Rebuild the `index`-th runner of a snapshot on globals loaded from the same snapshot
pub(crate) fn load_runner(
    story: Rc<Story>,
    snapshot: &Snapshot,
    globals: &Globals,
    index: usize,
) -> Result<Runner, RuntimeError> {
    let mut r = SnapReader::new(&snapshot.data);
    let fingerprint = Fingerprint::read(&mut r)?;
    fingerprint.verify(&story)?;
    let offset = *fingerprint
        .runners
        .get(index)
        .ok_or(RuntimeError::IndexOutOfBounds {
            collection: "snapshot runners",
            index,
            len: fingerprint.runners.len(),
        })?;

    let (ids, config) = {
        let g = globals.borrow()?;
        let ids = g.snapshot_ids.clone().ok_or_else(|| {
            mismatch("globals were not loaded from a snapshot")
        })?;
        (ids, g.config)
    };

    r.seek(offset as usize)?;
    let mut state = RunnerState::new(story, globals.clone(), config);

    let ip = r.opt_u32()?;
    let last = r.u32()?;
    let done = r.opt_u32()?;
    let falling = r.bool()?;
    let eval_mode = r.bool()?;
    let seed = r.u32()?;
    let rng_state = r.u32()?;
    let fallback = if r.bool()? { Some(read_choice(&mut r)?) } else { None };
    let choice_tag_mark = r.opt_u32()?.map(|m| m as usize);
    state.regs = Registers {
        ip,
        last,
        done,
        falling,
        eval_mode,
        rng: Prng::from_parts(seed, rng_state),
        fallback,
        choice_tag_mark,
    };

    state.eval.replace(read_values(&mut r, &ids)?)?;
    state.output.replace(read_values(&mut r, &ids)?)?;

    let next_thread = r.u32()?;
    let num_entries = r.count()?;
    let mut entries = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        entries.push(match r.u8()? {
            0 => Entry::Var {
                name: r.u32()?,
                value: read_value(&mut r, &ids)?,
            },
            1 => Entry::Frame {
                kind: if r.bool()? { FrameKind::Tunnel } else { FrameKind::Function },
                ret: r.u32()?,
                eval: r.bool()?,
            },
            2 => Entry::ThreadStart {
                id: r.u32()?,
                ret: r.u32()?,
                eval: r.bool()?,
            },
            3 => Entry::ThreadEnd { id: r.u32()? },
            4 => Entry::Jump { skip: r.u32()? },
            5 => Entry::Shadow {
                name: r.u32()?,
                frame: r.u32()?,
                value: read_value(&mut r, &ids)?,
            },
            other => return Err(corrupt(format!("unknown callstack entry {}", other))),
        });
    }
    state.callstack.replace(entries, next_thread)?;

    let n = r.count()?;
    let containers = (0..n).map(|_| r.u32()).collect::<Result<Vec<_>, _>>()?;
    state.containers.replace(containers)?;
    let n = r.count()?;
    let threads = (0..n).map(|_| r.u32()).collect::<Result<Vec<_>, _>>()?;
    state.threads.replace(threads)?;
    let n = r.count()?;
    let mut thread_done = Vec::with_capacity(n);
    for _ in 0..n {
        thread_done.push((r.u32()?, r.opt_u32()?));
    }
    state.thread_done.replace(thread_done)?;

    let n = r.count()?;
    let choices = (0..n).map(|_| read_choice(&mut r)).collect::<Result<Vec<_>, _>>()?;
    state.choices.replace(choices)?;

    let phase = match r.u8()? {
        0 => TagPhase::Global,
        1 => TagPhase::Knot,
        2 => TagPhase::Line,
        other => return Err(corrupt(format!("tag phase {}", other))),
    };
    state.tags = Tags {
        phase,
        global: r.strs()?,
        knot: r.strs()?,
        line: r.strs()?,
    };

    debug!("loaded runner {} at {:?}", index, state.regs.ip);
    Runner::from_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::command::ContainerFlags;
    use crate::story::builder::StoryBuilder;

    fn story() -> Rc<Story> {
        let mut b = StoryBuilder::new();
        b.text("one").newline().text("two").newline().end();
        Story::from_bytes(&b.build().expect("build")).expect("load")
    }

    #[test]
    fn test_truncated_snapshot_is_rejected() {
        let story = story();
        let runner = story.new_runner(None).expect("runner");
        let snapshot = runner.create_snapshot().expect("snapshot");
        let bytes = snapshot.to_bytes();
        assert!(matches!(
            Snapshot::from_bytes(&bytes[..bytes.len() - 1]),
            Err(RuntimeError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_other_story_is_rejected() {
        let runner = story().new_runner(None).expect("runner");
        let snapshot = runner.create_snapshot().expect("snapshot");

        let mut b = StoryBuilder::new();
        let c = b.begin_container("extra", ContainerFlags::empty());
        b.end_container(c);
        b.end();
        let other = Story::from_bytes(&b.build().expect("build")).expect("load");
        assert!(matches!(
            other.new_globals_from_snapshot(&snapshot),
            Err(RuntimeError::SnapshotMismatch { .. })
        ));
    }

    #[test]
    fn test_header_records_runners() {
        let story = story();
        let globals = story.new_globals();
        let _a = story.new_runner(Some(&globals)).expect("runner");
        let _b = story.new_runner(Some(&globals)).expect("runner");
        let snapshot = globals.create_snapshot().expect("snapshot");
        assert_eq!(snapshot.num_runners(), 2);
        assert_eq!(&snapshot.to_bytes()[..4], b"INKS");
    }
}
