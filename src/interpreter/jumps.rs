use crate::interpreter::command::{CallFlags, Command, ContainerFlags, DivertFlags, Instruction};
use crate::interpreter::engine::RunnerState;
use crate::interpreter::errors::RuntimeError;
use crate::memory::callstack::FrameKind;
use crate::memory::restorable::RestorableStack;
use crate::memory::value::{Hash, Value};
use std::rc::Rc;

impl RunnerState {
    /// Move execution to `dest`, keeping the container stack in step
    ///
    /// Every container marker between the current position and `dest` is crossed:
    /// a marker for the container on top of the stack leaves it, any other enters it.
    pub(crate) fn jump(&mut self, dest: u32, record_visits: bool) -> Result<(), RuntimeError> {
        if dest > self.story.end() {
            return Err(RuntimeError::InvalidAddress { address: dest });
        }
        if self.regs.falling {
            self.regs.ip = Some(dest);
            return Ok(());
        }

        let story = Rc::clone(&self.story);
        let markers = story.container_markers();
        let origin = self.regs.ip.unwrap_or(self.regs.last);
        let mut lowest = self.containers.len();

        let mut cross = |containers: &mut RestorableStack<u32>, id: u32| -> Result<(), RuntimeError> {
            if containers.top().ok() == Some(&id) {
                containers.pop()?;
                lowest = lowest.min(containers.len());
            } else {
                containers.push(id)?;
            }
            Ok(())
        };

        if dest >= origin {
            let first = markers.partition_point(|(offset, _)| *offset < origin);
            for (_, id) in markers[first..].iter().take_while(|(offset, _)| *offset < dest) {
                cross(&mut self.containers, *id)?;
            }
        } else {
            let end = markers.partition_point(|(offset, _)| *offset < origin);
            for (_, id) in markers[..end].iter().rev().take_while(|(offset, _)| *offset >= dest) {
                cross(&mut self.containers, *id)?;
            }
        }

        let entered: Vec<u32> = (lowest..self.containers.len())
            .filter_map(|i| self.containers.get(i).copied())
            .collect();
        for id in entered {
            let info = story.container(id)?;
            if record_visits
                && info.flags.contains(ContainerFlags::TRACK_VISITS)
                && !info.flags.contains(ContainerFlags::COUNT_START_ONLY)
            {
                self.globals.borrow_mut()?.visit(id)?;
            }
            if info.flags.contains(ContainerFlags::IS_KNOT) {
                self.tags.enter_knot();
            }
        }

        self.regs.ip = Some(dest);
        Ok(())
    }

    /// Stop the current thread, or the runner when no thread is running
    pub(crate) fn on_done(&mut self, set_done: bool) -> Result<(), RuntimeError> {
        if let Some(thread) = self.current_thread() {
            self.threads.pop()?;
            if set_done {
                self.thread_done.push((thread, self.regs.ip))?;
            }
            let ret = self.callstack.complete_thread(thread)?;
            self.regs.eval_mode = ret.eval;
            self.regs.falling = false;
            return self.jump(ret.ret, true);
        }
        if set_done {
            self.regs.done = self.regs.ip;
        }
        self.halt();
        Ok(())
    }

    pub(crate) fn halt(&mut self) {
        if let Some(ip) = self.regs.ip.take() {
            self.regs.last = ip;
        }
    }

    pub(crate) fn current_thread(&self) -> Option<u32> {
        self.threads.top().ok().copied()
    }

    /// Record where the current thread resumes when one of its choices is taken
    pub(crate) fn set_done_ptr(&mut self, ptr: Option<u32>) -> Result<(), RuntimeError> {
        match self.current_thread() {
            Some(thread) => self.thread_done.push((thread, ptr)),
            None => {
                self.regs.done = ptr;
                Ok(())
            }
        }
    }

    pub(crate) fn execute_divert(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let flags = DivertFlags::from_bits_truncate(inst.flag);
        if flags.contains(DivertFlags::HAS_CONDITION) && !self.pop_truthy()? {
            return Ok(());
        }
        let target = inst.payload;

        if flags.contains(DivertFlags::IS_FALLTHROUGH) && !self.regs.falling {
            self.set_done_ptr(self.regs.ip)?;
            self.regs.falling = true;
        }
        if self.regs.falling && target == self.story.end() {
            return self.on_done(false);
        }
        self.jump(target, true)
    }

    /// Divert target held by a variable
    fn divert_target(&self, name: Hash) -> Result<u32, RuntimeError> {
        match self.read_variable(name)? {
            Value::Divert(target) => Ok(target),
            other => Err(RuntimeError::TypeMismatch {
                operation: "divert to variable".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    pub(crate) fn execute_divert_to_variable(
        &mut self,
        inst: &Instruction,
    ) -> Result<(), RuntimeError> {
        if DivertFlags::from_bits_truncate(inst.flag).contains(DivertFlags::HAS_CONDITION)
            && !self.pop_truthy()?
        {
            return Ok(());
        }
        let target = self.divert_target(inst.payload)?;
        self.jump(target, true)
    }

    /// TUNNEL and FUNCTION: push a frame, then divert
    pub(crate) fn execute_call(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let flags = CallFlags::from_bits_truncate(inst.flag);
        let target = if flags.contains(CallFlags::TO_VARIABLE) {
            self.divert_target(inst.payload)?
        } else {
            inst.payload
        };
        let ret = self.regs.ip.unwrap_or(inst.next());

        let kind = if inst.command == Command::Function {
            self.emit(Value::FuncStart)?;
            FrameKind::Function
        } else {
            FrameKind::Tunnel
        };
        self.callstack.push_frame(kind, ret, self.regs.eval_mode)?;
        if kind == FrameKind::Function {
            self.regs.eval_mode = false;
        }
        self.jump(target, true)
    }

    /// Leave the innermost function or tunnel frame
    pub(crate) fn execute_return(&mut self, command: Command) -> Result<(), RuntimeError> {
        let expected = if command == Command::TunnelReturn {
            FrameKind::Tunnel
        } else {
            FrameKind::Function
        };
        match self.callstack.has_frame()? {
            Some(kind) if kind == expected => {}
            _ => {
                return Err(RuntimeError::MissingFrame {
                    expected: expected.name(),
                })
            }
        }
        let (kind, ret) = self.callstack.pop_frame()?;
        if kind == FrameKind::Function {
            self.emit(Value::FuncEnd)?;
        }
        self.regs.eval_mode = ret.eval;

        let mut dest = ret.ret;
        if kind == FrameKind::Tunnel {
            // `->-> target` leaves an override on the eval stack
            match self.eval.top().ok().copied() {
                Some(Value::Divert(target)) => {
                    self.eval.pop()?;
                    dest = target;
                }
                Some(Value::Null) => {
                    self.eval.pop()?;
                }
                _ => {}
            }
        }
        self.jump(dest, true)
    }

    /// Fork a thread that runs the divert following this instruction
    pub(crate) fn execute_thread(&mut self) -> Result<(), RuntimeError> {
        let after = self.regs.ip.ok_or(RuntimeError::UnexpectedEndOfProgram {
            offset: self.regs.last,
        })?;
        let ret = after + Command::Divert.size();
        let id = self.callstack.fork_thread(ret, self.regs.eval_mode)?;
        self.threads.push(id)
    }

    pub(crate) fn enter_container(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let id = inst.payload;
        let flags = ContainerFlags::from_bits_truncate(inst.flag);
        self.containers.push(id)?;
        if flags.contains(ContainerFlags::TRACK_VISITS) {
            self.globals.borrow_mut()?.visit(id)?;
        }
        if flags.contains(ContainerFlags::IS_KNOT) {
            self.tags.enter_knot();
        }
        Ok(())
    }

    pub(crate) fn leave_container(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let id = inst.payload;
        let top = self.containers.top().ok().copied();
        if top != Some(id) {
            return Err(RuntimeError::ContainerMismatch {
                expected: id,
                found: top,
            });
        }
        self.containers.pop()?;

        if self.containers.is_empty() {
            self.regs.falling = false;
            if !self.threads.is_empty() {
                return self.on_done(false);
            }
            if self.callstack.has_frame()? == Some(FrameKind::Function) {
                // implicit return from a function body with no explicit value
                self.eval.push(Value::Null)?;
                return self.execute_return(Command::FunctionReturn);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::command::{Command, ContainerFlags};
    use crate::story::builder::StoryBuilder;
    use crate::story::Story;

    #[test]
    fn test_divert_counts_visits() {
        let mut b = StoryBuilder::new();
        let knot = b.label();
        let again = b.label();
        b.divert(knot);
        b.place(knot);
        let k = b.begin_container("knot", ContainerFlags::TRACK_VISITS | ContainerFlags::IS_KNOT);
        b.text("in knot").newline();
        b.start_eval().read_count(k).int(2).op(Command::LessThan).end_eval();
        b.divert_if(again);
        b.end();
        b.place(again);
        b.end_container(k);
        b.divert(knot);
        let story = Story::from_bytes(&b.build().expect("build")).expect("load");
        let mut runner = story.new_runner(None).expect("runner");

        let text = runner.advance_all().expect("run");
        assert_eq!(text, "in knot\nin knot\n");
        assert_eq!(runner.globals().visits("knot").expect("visits"), Some(2));
    }
}
