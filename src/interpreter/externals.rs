//! Host functions callable from a story

use super::command::{CallFlags, Command, Instruction};
use super::engine::RunnerState;
use super::errors::RuntimeError;
use crate::memory::value::{Hash, HostValue, Value};
use log::{trace, warn};
use rustc_hash::FxHashMap;

pub type ExternalFunction = Box<dyn FnMut(&[HostValue]) -> HostValue>;

/// Bound external functions of one runner, keyed by name hash
#[derive(Default)]
pub(crate) struct Externals {
    functions: FxHashMap<Hash, ExternalFunction>,
}

impl Externals {
    pub fn bind(&mut self, name: Hash, function: ExternalFunction) {
        self.functions.insert(name, function);
    }

    pub fn unbind(&mut self, name: Hash) -> bool {
        self.functions.remove(&name).is_some()
    }

    pub fn is_bound(&self, name: Hash) -> bool {
        self.functions.contains_key(&name)
    }
}

impl RunnerState {
    /// Whether the instruction at the current ip is an ink fallback for an external
    fn fallback_follows(&self) -> bool {
        let Some(ip) = self.regs.ip else {
            return false;
        };
        match Instruction::decode(self.story.code(), ip) {
            Ok(next) => {
                next.command == Command::Function
                    && CallFlags::from_bits_truncate(next.flag).contains(CallFlags::FALLBACK_FUNCTION)
            }
            Err(_) => false,
        }
    }

    pub(crate) fn call_external(&mut self, inst: &Instruction) -> Result<(), RuntimeError> {
        let name = inst.payload;
        let argc = inst.flag as usize;

        if !self.externals.is_bound(name) {
            if self.fallback_follows() {
                warn!("external 0x{:08x} is unbound, using its ink fallback", name);
                return Ok(());
            }
            return Err(RuntimeError::UnboundExternal { name });
        }

        let mut args = vec![Value::Null; argc];
        for slot in args.iter_mut().rev() {
            *slot = self.eval.pop()?;
        }
        let host_args = {
            let g = self.globals.borrow()?;
            args.iter()
                .map(|v| g.to_host(v))
                .collect::<Result<Vec<_>, _>>()?
        };

        trace!("call external 0x{:08x} with {:?}", name, host_args);
        let result = match self.externals.functions.get_mut(&name) {
            Some(function) => function(&host_args),
            None => return Err(RuntimeError::UnboundExternal { name }),
        };
        let value = self.globals.borrow_mut()?.from_host(&result);
        self.eval.push(value)?;

        if self.fallback_follows() {
            if let Some(ip) = self.regs.ip {
                self.regs.ip = Some(ip + Command::Function.size());
            }
        }
        Ok(())
    }
}
