//! Instruction execution
//!
//! This module dispatches every decoded instruction:
//!
//! - Literal values, which go to the eval stack in evaluation mode and to the
//!   output stream otherwise
//! - Variable definition, assignment and lookup, following variable pointers
//! - String, tag and choice assembly between output markers
//! - Visit and turn counters, sequences and the random seed
//!
//! Flow control lives in `jumps`, operators in `ops`.
//!
//! # Implementation
//!
//! All instruction methods are implemented as `pub(crate)` methods on
//! [`RunnerState`], so they reach the runner's stacks and its globals directly.

use crate::globals::GlobalsImpl;
use crate::interpreter::command::{AssignmentFlags, Command, DivertFlags, Instruction};
use crate::interpreter::engine::RunnerState;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::ops::truthy;
use crate::interpreter::random::shuffle_index;
use crate::interpreter::tags::TagPhase;
use crate::memory::is_whitespace;
use crate::memory::value::{Hash, Value};
use crate::memory::TextSource;

impl RunnerState {
    pub(crate) fn execute(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let command = inst.command;

        let keeps_falling = command == Command::EndContainerMarker
            || (command == Command::Divert
                && DivertFlags::from_bits_truncate(inst.flag).contains(DivertFlags::IS_FALLTHROUGH));
        if self.regs.falling && !keeps_falling {
            self.regs.falling = false;
            self.set_done_ptr(None)?;
        }

        if command.is_operator() {
            return self.execute_operator(command);
        }

        match command {
            Command::Str => self.push_or_emit(Value::story_str(inst.payload)),
            Command::Int => self.push_or_emit(Value::Int(inst.payload_i32())),
            Command::Bool => self.push_or_emit(Value::Bool(inst.payload != 0)),
            Command::Float => self.push_or_emit(Value::Float(inst.payload_f32())),
            Command::ValuePointer => self.push_pointer(inst),
            Command::DivertVal => self.eval.push(Value::Divert(inst.payload)),
            Command::List => self.push_list_literal(inst.payload),
            Command::Newline => self.push_or_emit(Value::Newline),
            Command::Glue => self.push_or_emit(Value::Glue),
            Command::Void => {
                if self.regs.eval_mode {
                    self.eval.push(Value::Null)?;
                }
                Ok(())
            }
            Command::Tag => {
                let tag = self.story.string(inst.payload)?.to_string();
                self.add_tag(&tag)
            }

            Command::Divert => self.execute_divert(inst),
            Command::DivertToVariable => self.execute_divert_to_variable(inst),
            Command::Tunnel | Command::Function => self.execute_call(inst),
            Command::Done => self.on_done(true),
            Command::End => {
                self.halt();
                Ok(())
            }
            Command::TunnelReturn | Command::FunctionReturn => self.execute_return(command),
            Command::Thread => self.execute_thread(),
            Command::CallExternal => self.call_external(inst),

            Command::DefineTemp => {
                let value = self.eval.pop()?;
                self.callstack.set(inst.payload, value)
            }
            Command::SetVariable => self.execute_set_variable(inst),
            Command::PushVariableValue => {
                let value = self.read_variable(inst.payload)?;
                self.eval.push(value)
            }

            Command::StartEval => {
                self.regs.eval_mode = true;
                Ok(())
            }
            Command::EndEval => {
                self.regs.eval_mode = false;
                Ok(())
            }
            Command::Output => {
                let value = self.eval.pop()?;
                self.emit(value)
            }
            Command::Pop => self.eval.pop().map(|_| ()),
            Command::Duplicate => {
                let top = *self.eval.top()?;
                self.eval.push(top)
            }

            Command::Visit => {
                let container = *self.containers.top()?;
                let visits = self.globals.borrow()?.visits(container)?;
                self.eval.push(Value::Int(visits as i32 - 1))
            }
            Command::Turn => {
                let turn = self.globals.borrow()?.turn();
                self.eval.push(Value::Int(turn as i32))
            }
            Command::ReadCount => {
                let visits = self.globals.borrow()?.visits(inst.payload)?;
                self.eval.push(Value::Int(visits as i32))
            }
            Command::Sequence => self.execute_sequence(),
            Command::Seed => {
                let seed = self.pop_int("SEED")?;
                self.regs.rng.srand(seed as u32);
                self.eval.push(Value::Null)
            }
            Command::ChoiceCount => self.eval.push(Value::Int(self.choices.len() as i32)),

            Command::StartStr => {
                self.regs.eval_mode = false;
                if self.regs.choice_tag_mark.is_none() {
                    self.regs.choice_tag_mark = Some(self.tags.line.len());
                }
                self.emit(Value::Marker)
            }
            Command::EndStr => {
                let text = self.extract_marked()?;
                let id = self.globals.borrow_mut()?.strings.insert(text);
                self.regs.eval_mode = true;
                self.eval.push(Value::heap_str(id))
            }
            Command::StartTag => self.emit(Value::Marker),
            Command::EndTag => {
                let tag = self.extract_marked()?;
                self.add_tag(&tag)
            }
            Command::Choice => self.add_choice(inst),

            Command::StartContainerMarker => self.enter_container(inst),
            Command::EndContainerMarker => self.leave_container(inst),

            _ => Err(RuntimeError::UnknownOpcode {
                opcode: command as u8,
            }),
        }
    }

    // -- output -----------------------------------------------------------------

    /// Append to the output stream regardless of evaluation mode
    pub(crate) fn emit(&mut self, value: Value) -> Result<(), RuntimeError> {
        let g = self.globals.borrow()?;
        let texts = g.texts();
        if self.tags.phase != TagPhase::Line
            && value.value_type().is_printable()
        {
            if let Some(text) = texts.render(&value)? {
                if !is_whitespace(&text) {
                    self.tags.content();
                }
            }
        }
        self.output.append(value, &texts)
    }

    fn push_or_emit(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.regs.eval_mode {
            self.eval.push(value)
        } else {
            self.emit(value)
        }
    }

    /// Text between the innermost output marker and the end of the stream
    fn extract_marked(&mut self) -> Result<String, RuntimeError> {
        let g = self.globals.borrow()?;
        let texts = g.texts();
        self.output.extract(&texts)
    }

    // -- eval stack helpers -----------------------------------------------------

    pub(crate) fn pop_truthy(&mut self) -> Result<bool, RuntimeError> {
        let value = self.eval.pop()?;
        let g = self.globals.borrow()?;
        truthy(&value, &g)
    }

    fn pop_int(&mut self, operation: &str) -> Result<i32, RuntimeError> {
        let value = self.eval.pop()?;
        value.as_int().ok_or_else(|| RuntimeError::TypeMismatch {
            operation: operation.to_string(),
            got: value.type_name().to_string(),
        })
    }

    fn execute_sequence(&mut self) -> Result<(), RuntimeError> {
        let elements = self.pop_int("SEQUENCE")?;
        let count = self.pop_int("SEQUENCE")?;
        let container = *self.containers.top()?;
        let index = shuffle_index(container, count, elements, self.regs.rng.seed());
        self.eval.push(Value::Int(index))
    }

    fn push_list_literal(&mut self, index: u32) -> Result<(), RuntimeError> {
        let flags = self.story.literal(index)?.to_vec();
        let list = {
            let mut g = self.globals.borrow_mut()?;
            let id = g.lists.create();
            for flag in flags {
                if flag.flag < 0 {
                    g.lists.add_origin_inplace(id, flag.list as usize)?;
                } else {
                    g.lists.add_flag_inplace(id, flag)?;
                }
            }
            id
        };
        self.push_or_emit(Value::List(list))
    }

    // -- variables --------------------------------------------------------------

    /// Follow a variable pointer to the value it names
    fn dereference(&self, value: Value) -> Result<Value, RuntimeError> {
        let Value::Pointer { name, frame } = value else {
            return Ok(value);
        };
        let target = if frame == 0 {
            self.globals.borrow()?.get(name)
        } else {
            self.callstack.get_in_frame(name, frame)?
        };
        target.ok_or(RuntimeError::UnknownVariable { name })
    }

    /// Value of a temporary or, failing that, a global
    pub(crate) fn read_variable(&self, name: Hash) -> Result<Value, RuntimeError> {
        let value = match self.callstack.get(name)? {
            Some(value) => value,
            None => self
                .globals
                .borrow()?
                .get(name)
                .ok_or(RuntimeError::UnknownVariable { name })?,
        };
        self.dereference(value)
    }

    fn push_pointer(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let name = inst.payload;
        if inst.flag == 0 {
            return self.eval.push(Value::Pointer { name, frame: 0 });
        }
        // passing a reference parameter on keeps pointing at the original
        if let Some(pointer @ Value::Pointer { .. }) = self.callstack.get(name)? {
            return self.eval.push(pointer);
        }
        let frame = self.callstack.current_frame()?;
        self.eval.push(Value::Pointer { name, frame })
    }

    fn execute_set_variable(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let name = inst.payload;
        let redefine = AssignmentFlags::from_bits_truncate(inst.flag)
            .contains(AssignmentFlags::IS_REDEFINE);
        let value = self.eval.pop()?;

        if let Some(existing) = self.callstack.get(name)? {
            return match existing {
                Value::Pointer { name: target, frame } => self.write_through(target, frame, value),
                old => {
                    let value = {
                        let mut g = self.globals.borrow_mut()?;
                        reassign(&mut g, old, value)?
                    };
                    self.callstack.set(name, value)
                }
            };
        }

        let existing = self.globals.borrow()?.get(name);
        match existing {
            Some(Value::Pointer { name: target, frame }) => self.write_through(target, frame, value),
            Some(old) => {
                let mut g = self.globals.borrow_mut()?;
                let value = reassign(&mut g, old, value)?;
                g.set(name, value)
            }
            None if redefine || self.initializing => self.globals.borrow_mut()?.set(name, value),
            None => Err(RuntimeError::UnknownVariable { name }),
        }
    }

    fn write_through(&mut self, name: Hash, frame: u32, value: Value) -> Result<(), RuntimeError> {
        if frame == 0 {
            let mut g = self.globals.borrow_mut()?;
            let value = match g.get(name) {
                Some(old) => reassign(&mut g, old, value)?,
                None => value,
            };
            return g.set(name, value);
        }
        self.callstack.set_in_frame(name, frame, value)
    }
}

/// Assigning a list to a list variable keeps the variable's origin lists
fn reassign(globals: &mut GlobalsImpl, old: Value, new: Value) -> Result<Value, RuntimeError> {
    match (old, new) {
        (Value::List(old), Value::List(new)) => Ok(Value::List(globals.lists.redefine(old, new)?)),
        _ => Ok(new),
    }
}
