// Execution engine for story bytecode

use crate::config::RuntimeConfig;
use crate::globals::Globals;
use crate::interpreter::choices::Choice;
use crate::interpreter::command::{ContainerFlags, Instruction};
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::externals::Externals;
use crate::interpreter::random::Prng;
use crate::interpreter::tags::Tags;
use crate::memory::callstack::Callstack;
use crate::memory::output::OutputStream;
use crate::memory::restorable::RestorableStack;
use crate::memory::value::{hash_string, Hash, HostValue, Value};
use crate::snapshot::Snapshot;
use crate::story::Story;
use log::{debug, trace, warn};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Scalar execution state, saved and restored as a whole with the collections
#[derive(Debug, Clone, Default)]
pub(crate) struct Registers {
    /// Next instruction, `None` once the runner has stopped
    pub ip: Option<u32>,
    /// Where execution stopped, the origin for the next jump
    pub last: u32,
    /// Resume point of the main thread when a choice is taken
    pub done: Option<u32>,
    /// Falling out of containers through fallthrough diverts
    pub falling: bool,
    /// Values go to the eval stack instead of the output
    pub eval_mode: bool,
    pub rng: Prng,
    /// Invisible default choice, taken when nothing else is offered
    pub fallback: Option<Choice>,
    /// Number of line tags present when the current choice text began
    pub choice_tag_mark: Option<usize>,
}

/// What a lookahead step did to the line ending at the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    None,
    /// Glue removed the newline; the line goes on
    NewlineRemoved,
    /// New text arrived after the newline; the line is complete
    ExtendedPastNewline,
}

/// Everything one runner owns
pub(crate) struct RunnerState {
    pub(crate) story: Rc<Story>,
    pub(crate) globals: Globals,
    pub(crate) config: RuntimeConfig,
    pub(crate) regs: Registers,
    saved_regs: Option<Registers>,
    pub(crate) eval: RestorableStack<Value>,
    pub(crate) output: OutputStream,
    pub(crate) callstack: Callstack,
    pub(crate) containers: RestorableStack<u32>,
    pub(crate) threads: RestorableStack<u32>,
    /// Resume point of each thread, latest entry wins
    pub(crate) thread_done: RestorableStack<(u32, Option<u32>)>,
    pub(crate) choices: RestorableStack<Choice>,
    pub(crate) tags: Tags,
    saved_tags: Option<Tags>,
    pub(crate) externals: Externals,
    /// Running the global declaration block
    pub(crate) initializing: bool,
    saved: bool,
}

impl RunnerState {
    pub(crate) fn new(story: Rc<Story>, globals: Globals, config: RuntimeConfig) -> Self {
        RunnerState {
            story,
            globals,
            config,
            regs: Registers {
                ip: Some(0),
                ..Registers::default()
            },
            saved_regs: None,
            eval: RestorableStack::new("eval stack", config.eval_stack),
            output: OutputStream::new(config.output),
            callstack: Callstack::new(config.runtime_stack),
            containers: RestorableStack::new("container stack", config.container_depth),
            threads: RestorableStack::new("thread stack", config.thread_depth),
            thread_done: RestorableStack::new("thread done points", config.thread_depth),
            choices: RestorableStack::new("choices", config.choices),
            tags: Tags::default(),
            saved_tags: None,
            externals: Externals::default(),
            initializing: false,
            saved: false,
        }
    }

    /// Run the global declaration block, then rewind to the start of the story
    fn initialize_globals(&mut self) -> Result<(), RuntimeError> {
        if let Some(offset) = self.story.global_decl() {
            debug!("initialising globals from offset {}", offset);
            self.initializing = true;
            self.regs.ip = Some(offset);
            self.regs.last = offset;
            while self.regs.ip.is_some() {
                if let Err(e) = self.step() {
                    self.initializing = false;
                    return Err(e);
                }
            }
            self.initializing = false;
        }
        self.globals.borrow_mut()?.set_initialized();
        self.reset();
        self.regs.ip = Some(0);
        Ok(())
    }

    /// Drop all execution state; the runner can not continue until moved
    pub(crate) fn reset(&mut self) {
        if let Ok(mut g) = self.globals.borrow_mut() {
            if g.is_saved() {
                if let Err(e) = g.restore() {
                    warn!("dropping the globals checkpoint failed: {}", e);
                }
            }
        }
        self.eval.clear();
        self.output.clear();
        self.callstack.clear();
        self.containers.clear();
        self.threads.clear();
        self.thread_done.clear();
        self.choices.clear();
        self.regs = Registers {
            rng: self.regs.rng,
            ..Registers::default()
        };
        self.saved_regs = None;
        self.tags.line.clear();
        self.saved_tags = None;
        self.saved = false;
    }

    // -- checkpoint -------------------------------------------------------------

    pub(crate) fn save(&mut self) -> Result<(), RuntimeError> {
        trace!("lookahead: save at {:?}", self.regs.ip);
        self.eval.save()?;
        self.output.save()?;
        self.callstack.save()?;
        self.containers.save()?;
        self.threads.save()?;
        self.thread_done.save()?;
        self.choices.save()?;
        self.globals.borrow_mut()?.save()?;
        self.saved_regs = Some(self.regs.clone());
        self.saved_tags = Some(self.tags.clone());
        self.saved = true;
        Ok(())
    }

    pub(crate) fn restore(&mut self) -> Result<(), RuntimeError> {
        trace!("lookahead: restore to {:?}", self.saved_regs.as_ref().and_then(|r| r.ip));
        self.eval.restore()?;
        self.output.restore()?;
        self.callstack.restore()?;
        self.containers.restore()?;
        self.threads.restore()?;
        self.thread_done.restore()?;
        self.choices.restore()?;
        self.globals.borrow_mut()?.restore()?;
        if let Some(regs) = self.saved_regs.take() {
            self.regs = regs;
        }
        if let Some(tags) = self.saved_tags.take() {
            self.tags = tags;
        }
        self.saved = false;
        Ok(())
    }

    pub(crate) fn forget(&mut self) -> Result<(), RuntimeError> {
        trace!("lookahead: forget");
        self.eval.forget()?;
        self.output.forget()?;
        self.callstack.forget()?;
        self.containers.forget()?;
        self.threads.forget()?;
        self.thread_done.forget()?;
        self.choices.forget()?;
        self.globals.borrow_mut()?.forget()?;
        self.saved_regs = None;
        self.saved_tags = None;
        self.saved = false;
        Ok(())
    }

    pub(crate) fn is_saved(&self) -> bool {
        self.saved
    }

    // -- line loop --------------------------------------------------------------

    /// Execute one instruction; a failure resets the runner
    pub(crate) fn step(&mut self) -> Result<(), RuntimeError> {
        let Some(ip) = self.regs.ip else {
            return Ok(());
        };
        if ip >= self.story.end() {
            // running off the end of the program is an implied done
            return self.on_done(false).map_err(|e| self.fail(e, ip));
        }
        let inst = match Instruction::decode(self.story.code(), ip) {
            Ok(inst) => inst,
            Err(e) => return Err(self.fail(e, ip)),
        };
        trace!("{:6} {}", ip, inst.command.mnemonic());
        self.regs.ip = Some(inst.next());
        self.execute(&inst).map_err(|e| self.fail(e, ip))
    }

    fn fail(&mut self, error: RuntimeError, ip: u32) -> RuntimeError {
        warn!("runtime error at {}: {}", ip, error);
        self.reset();
        error.at(ip)
    }

    fn detect_change(&self) -> Result<Change, RuntimeError> {
        let g = self.globals.borrow()?;
        let texts = g.texts();
        let still_has_newline = self.output.saved_ends_with_newline()?;
        if !still_has_newline {
            return Ok(Change::NewlineRemoved);
        }
        if self.output.text_past_save(&texts)? {
            return Ok(Change::ExtendedPastNewline);
        }
        Ok(Change::None)
    }

    /// Step once; `true` when the current line is complete
    fn line_step(&mut self) -> Result<bool, RuntimeError> {
        self.step()?;
        self.lookahead().map_err(|e| self.fail_between_steps(e))
    }

    /// A checkpoint failure between instructions resets the runner like a failed step
    fn fail_between_steps(&mut self, error: RuntimeError) -> RuntimeError {
        let ip = self.regs.ip.unwrap_or(self.regs.last);
        self.fail(error, ip)
    }

    /// Take, commit or roll back the lookahead checkpoint after a step
    fn lookahead(&mut self) -> Result<bool, RuntimeError> {
        // a string, choice or tag is being assembled
        if self.output.has_marker() {
            return Ok(false);
        }

        if self.saved {
            match self.detect_change()? {
                Change::ExtendedPastNewline => {
                    self.restore()?;
                    return Ok(true);
                }
                Change::NewlineRemoved => self.forget()?,
                Change::None => {}
            }
        }

        if self.output.ends_with_newline() {
            if self.regs.ip.is_some() {
                // look past the newline for glue before giving the line out
                if !self.saved {
                    self.save()?;
                }
            } else if self.saved {
                self.forget()?;
            }
        }
        Ok(false)
    }

    pub(crate) fn can_continue(&self) -> bool {
        self.regs.ip.is_some() || (self.choices.is_empty() && self.regs.fallback.is_some())
    }

    fn has_text(&self) -> Result<bool, RuntimeError> {
        let g = self.globals.borrow()?;
        self.output.has_text(&g.texts())
    }

    pub(crate) fn advance_one_line(&mut self) -> Result<Option<String>, RuntimeError> {
        if !self.can_continue() {
            return Ok(None);
        }
        self.tags.line.clear();
        self.regs.choice_tag_mark = None;

        loop {
            while self.regs.ip.is_some() {
                if self.line_step()? {
                    break;
                }
            }
            if self.saved {
                self.forget().map_err(|e| self.fail_between_steps(e))?;
            }
            if self.regs.ip.is_none() && self.choices.is_empty() && !self.has_text()? {
                if let Some(fallback) = self.regs.fallback.take() {
                    trace!("taking invisible default choice to {}", fallback.path());
                    self.follow_choice(&fallback)?;
                    continue;
                }
            }
            break;
        }

        let line = {
            let g = self.globals.borrow()?;
            let texts = g.texts();
            self.output.extract(&texts)?
        };
        Ok(Some(line.strip_suffix('\n').unwrap_or(&line).to_string()))
    }

    /// Jump to a named path with fresh execution state
    pub(crate) fn move_to(&mut self, path: Hash) -> Result<bool, RuntimeError> {
        let Some(destination) = self.story.find_offset(path) else {
            warn!("move_to: no path with hash 0x{:08x}", path);
            return Ok(false);
        };
        self.reset();
        self.regs.ip = Some(0);
        self.jump(destination, true)?;
        Ok(true)
    }

    /// Hash of the innermost knot being executed
    pub(crate) fn current_knot(&self) -> Option<Hash> {
        self.containers.iter_rev().find_map(|id| {
            self.story
                .container(*id)
                .ok()
                .filter(|c| c.flags.contains(ContainerFlags::IS_KNOT))
                .map(|c| c.hash)
        })
    }

    /// Every value this runner holds, hidden checkpoint data included
    pub(crate) fn live_values(&self) -> Vec<Value> {
        self.eval
            .iter_all()
            .chain(self.output.values())
            .chain(self.callstack.values())
            .copied()
            .collect()
    }
}

/// A running instance of a story
///
/// Created through [`Story::new_runner`]. Several runners can share one [`Globals`].
/// Host callbacks (bound external functions) must not call back into the runner
/// that invoked them.
pub struct Runner {
    state: Rc<RefCell<RunnerState>>,
    globals: Globals,
}

impl Runner {
    pub fn new(story: Rc<Story>, globals: Globals) -> Result<Runner, RuntimeError> {
        let config = globals.config()?;
        let state = Rc::new(RefCell::new(RunnerState::new(story, globals.clone(), config)));
        globals.borrow_mut()?.register(&state);
        let runner = Runner { state, globals };
        if !runner.globals.is_initialized()? {
            runner.state_mut()?.initialize_globals()?;
        }
        Ok(runner)
    }

    /// Wrap a state rebuilt from a snapshot
    pub(crate) fn from_state(state: RunnerState) -> Result<Runner, RuntimeError> {
        let globals = state.globals.clone();
        let state = Rc::new(RefCell::new(state));
        globals.borrow_mut()?.register(&state);
        Ok(Runner { state, globals })
    }

    fn state(&self) -> Result<Ref<'_, RunnerState>, RuntimeError> {
        self.state
            .try_borrow()
            .map_err(|_| RuntimeError::Invalidated { what: "runner" })
    }

    fn state_mut(&self) -> Result<RefMut<'_, RunnerState>, RuntimeError> {
        self.state
            .try_borrow_mut()
            .map_err(|_| RuntimeError::Invalidated { what: "runner" })
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Whether there is more content before the next choice or the end
    pub fn can_continue(&self) -> bool {
        self.state().map(|s| s.can_continue()).unwrap_or(false)
    }

    /// Run until one full line of text is produced
    ///
    /// Returns `Ok(None)` if the runner can not continue. The line carries no
    /// trailing newline.
    pub fn advance_one_line(&mut self) -> Result<Option<String>, RuntimeError> {
        let line = self.state_mut()?.advance_one_line()?;
        self.globals.gc()?;
        self.globals.dispatch_notifications()?;
        Ok(line)
    }

    /// Run until the runner can not continue, joining every line
    pub fn advance_all(&mut self) -> Result<String, RuntimeError> {
        let mut text = String::new();
        while self.can_continue() {
            match self.advance_one_line()? {
                Some(line) => {
                    text.push_str(&line);
                    text.push('\n');
                }
                None => break,
            }
        }
        Ok(text)
    }

    pub fn has_choices(&self) -> bool {
        self.num_choices() > 0
    }

    pub fn num_choices(&self) -> usize {
        self.state().map(|s| s.choices.len()).unwrap_or(0)
    }

    pub fn choice(&self, index: usize) -> Option<Choice> {
        self.state().ok()?.choices.get(index).cloned()
    }

    pub fn choices(&self) -> Vec<Choice> {
        self.state().map(|s| s.choices.to_vec()).unwrap_or_default()
    }

    /// Take the choice at `index` of [`Runner::choices`]
    pub fn choose(&mut self, index: usize) -> Result<(), RuntimeError> {
        self.state_mut()?.choose(index)
    }

    pub fn has_tags(&self) -> bool {
        self.num_tags() > 0
    }

    /// Tags of the last line
    pub fn num_tags(&self) -> usize {
        self.state().map(|s| s.tags.line.len()).unwrap_or(0)
    }

    pub fn get_tag(&self, index: usize) -> Option<String> {
        self.state().ok()?.tags.line.get(index).cloned()
    }

    /// Tags at the top of the current knot
    pub fn num_knot_tags(&self) -> usize {
        self.state().map(|s| s.tags.knot.len()).unwrap_or(0)
    }

    pub fn get_knot_tag(&self, index: usize) -> Option<String> {
        self.state().ok()?.tags.knot.get(index).cloned()
    }

    /// Tags at the top of the story
    pub fn num_global_tags(&self) -> usize {
        self.state().map(|s| s.tags.global.len()).unwrap_or(0)
    }

    pub fn get_global_tag(&self, index: usize) -> Option<String> {
        self.state().ok()?.tags.global.get(index).cloned()
    }

    /// Bind a host function the story calls as an external
    pub fn bind<F>(&mut self, name: &str, function: F) -> Result<(), RuntimeError>
    where
        F: FnMut(&[HostValue]) -> HostValue + 'static,
    {
        self.state_mut()?
            .externals
            .bind(hash_string(name), Box::new(function));
        Ok(())
    }

    pub fn unbind(&mut self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state_mut()?.externals.unbind(hash_string(name)))
    }

    /// Continue from the container named by `path`; `Ok(false)` if there is none
    pub fn move_to(&mut self, path: Hash) -> Result<bool, RuntimeError> {
        self.state_mut()?.move_to(path)
    }

    pub fn move_to_path(&mut self, path: &str) -> Result<bool, RuntimeError> {
        self.move_to(hash_string(path))
    }

    /// Path hash of the knot being executed
    pub fn current_knot(&self) -> Option<Hash> {
        self.state().ok()?.current_knot()
    }

    /// Re-seed the random number generator
    pub fn seed(&mut self, seed: u32) -> Result<(), RuntimeError> {
        self.state_mut()?.regs.rng.srand(seed);
        Ok(())
    }

    /// Serialise the globals and every runner sharing them
    pub fn create_snapshot(&self) -> Result<Snapshot, RuntimeError> {
        self.globals.create_snapshot()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Ok(mut g) = self.globals.borrow_mut() {
            g.unregister(&self.state);
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state() {
            Ok(s) => f
                .debug_struct("Runner")
                .field("ip", &s.regs.ip)
                .field("choices", &s.choices.len())
                .finish(),
            Err(_) => f.write_str("Runner { <in use> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::builder::StoryBuilder;

    #[test]
    fn test_lines_split_at_newline() {
        let mut b = StoryBuilder::new();
        b.text("Hello").newline().text("World").newline().end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");

        assert_eq!(runner.advance_one_line().expect("line"), Some("Hello".to_string()));
        assert!(runner.can_continue());
        assert_eq!(runner.advance_one_line().expect("line"), Some("World".to_string()));
        assert!(!runner.can_continue());
        assert_eq!(runner.advance_one_line().expect("line"), None);
    }

    #[test]
    fn test_glue_joins_lines() {
        let mut b = StoryBuilder::new();
        b.text("Hello").newline().glue().text(" there").newline().text("Next").end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");

        assert_eq!(
            runner.advance_one_line().expect("line"),
            Some("Hello there".to_string())
        );
        assert_eq!(runner.advance_one_line().expect("line"), Some("Next".to_string()));
    }

    #[test]
    fn test_error_resets_runner() {
        let mut b = StoryBuilder::new();
        b.start_eval().op(crate::interpreter::command::Command::Add).end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");

        let err = runner.advance_one_line().expect_err("underflow");
        assert_eq!(err.offset(), Some(2));
        assert!(matches!(err.root(), RuntimeError::StackUnderflow { .. }));
        assert!(!runner.can_continue());
    }

    #[test]
    fn test_failed_checkpoint_resets_runner() {
        let mut b = StoryBuilder::new();
        b.text("A").newline().text("B").newline().end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");

        // the lookahead after "A" can not checkpoint globals that are already saved
        runner.globals().borrow_mut().expect("borrow").save().expect("save");
        let err = runner.advance_one_line().expect_err("checkpoint should fail");
        assert!(matches!(err.root(), RuntimeError::AlreadySaved { .. }));

        assert!(!runner.can_continue());
        assert!(!runner.globals().borrow().expect("borrow").is_saved());
        let state = runner.state().expect("state");
        assert!(!state.is_saved());
        assert!(!state.eval.is_saved());
        assert!(!state.output.is_saved());
    }

    #[test]
    fn test_move_to_unknown_path() {
        let mut b = StoryBuilder::new();
        b.end();
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");
        assert!(!runner.move_to_path("nowhere").expect("move"));
    }
}
