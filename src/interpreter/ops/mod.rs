pub mod list;
pub mod misc;
pub mod numeric;
pub mod string;

// Operators are looked up in one table keyed by (command, operand type); each
// submodule registers the handlers for its types.
use crate::globals::GlobalsImpl;
use crate::interpreter::command::Command;
use crate::interpreter::engine::RunnerState;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::random::Prng;
use crate::memory::value::{common_base_of, Value, ValueType};
use crate::memory::TextSource;
use log::trace;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

/// What an operator handler may touch
pub(crate) struct OpContext<'a> {
    pub globals: &'a mut GlobalsImpl,
    pub rng: &'a mut Prng,
}

impl OpContext<'_> {
    /// Intern `text` as a runtime string value
    pub(crate) fn new_string(&mut self, text: String) -> Value {
        Value::heap_str(self.globals.strings.insert(text))
    }

    pub(crate) fn render(&self, value: &Value) -> Result<String, RuntimeError> {
        Ok(self.globals.texts().render(value)?.unwrap_or_default())
    }
}

pub(crate) type Handler = fn(&mut OpContext<'_>, Command, &[Value]) -> Result<Value, RuntimeError>;

pub(crate) struct OperatorTable {
    handlers: FxHashMap<(Command, ValueType), Handler>,
}

impl OperatorTable {
    fn build() -> Self {
        let mut table = OperatorTable {
            handlers: FxHashMap::default(),
        };
        numeric::register(&mut table);
        string::register(&mut table);
        list::register(&mut table);
        misc::register(&mut table);
        table
    }

    /// The process-wide table, built on first use
    pub(crate) fn get() -> &'static OperatorTable {
        static TABLE: OnceLock<OperatorTable> = OnceLock::new();
        TABLE.get_or_init(Self::build)
    }

    pub(crate) fn register(&mut self, commands: &[Command], ty: ValueType, handler: Handler) {
        for command in commands {
            self.handlers.insert((*command, ty), handler);
        }
    }

    pub(crate) fn call(
        &self,
        ctx: &mut OpContext<'_>,
        command: Command,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let base = operand_type(command, args)?;
        let handler = self
            .handlers
            .get(&(command, base))
            .ok_or_else(|| mismatch(command, args))?;

        let mut cast = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            // LIST_RANGE bounds stay as they are; only the list is widened
            if command == Command::ListRange && i > 0 {
                cast.push(*arg);
            } else {
                cast.push(cast_to(ctx, arg, base)?);
            }
        }
        handler(ctx, command, &cast)
    }
}

/// Type the operands are dispatched on
fn operand_type(command: Command, args: &[Value]) -> Result<ValueType, RuntimeError> {
    let base = match command {
        Command::ListRange | Command::ListInt => args.first().map(|v| match v.value_type() {
            ValueType::ListFlag => ValueType::List,
            other => other,
        }),
        _ => common_base_of(args),
    };
    base.ok_or_else(|| mismatch(command, args))
}

pub(crate) fn mismatch(command: Command, args: &[Value]) -> RuntimeError {
    RuntimeError::TypeMismatch {
        operation: command.mnemonic().to_string(),
        got: args
            .iter()
            .map(Value::type_name)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Widen `value` to `to`
///
/// Numbers next to a list keep their type; list arithmetic takes them as offsets.
pub(crate) fn cast_to(
    ctx: &mut OpContext<'_>,
    value: &Value,
    to: ValueType,
) -> Result<Value, RuntimeError> {
    let from = value.value_type();
    if from == to {
        return Ok(*value);
    }
    match to {
        ValueType::Str if from.is_printable() => {
            let text = ctx.render(value)?;
            Ok(ctx.new_string(text))
        }
        ValueType::List => match value {
            Value::ListFlag(flag) if flag.is_null() => Ok(Value::List(ctx.globals.lists.create())),
            Value::ListFlag(flag) => Ok(Value::List(ctx.globals.lists.from_flag(*flag)?)),
            v if from.is_numeric() => Ok(*v),
            _ => Err(invalid_cast(from, to)),
        },
        ValueType::ListFlag if from.is_numeric() => Ok(*value),
        _ => value.widen(to).ok_or_else(|| invalid_cast(from, to)),
    }
}

fn invalid_cast(from: ValueType, to: ValueType) -> RuntimeError {
    RuntimeError::InvalidCast {
        from: from.name().to_string(),
        to: to.name().to_string(),
    }
}

/// Truth value used by conditions and the logical operators
pub(crate) fn truthy(value: &Value, globals: &GlobalsImpl) -> Result<bool, RuntimeError> {
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Uint(u) => *u != 0,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(chain) => !globals.texts().chain_text(chain)?.is_empty(),
        Value::ListFlag(flag) => !flag.is_null(),
        Value::List(id) => !globals.lists.is_empty(*id)?,
        Value::Divert(_) => true,
        other => {
            return Err(RuntimeError::TypeMismatch {
                operation: "condition".to_string(),
                got: other.type_name().to_string(),
            })
        }
    })
}

impl RunnerState {
    /// Pop an operator's operands, apply it and push the result
    pub(crate) fn execute_operator(&mut self, command: Command) -> Result<(), RuntimeError> {
        let mut args = vec![Value::Null; command.arity()];
        for slot in args.iter_mut().rev() {
            *slot = self.eval.pop()?;
        }
        let result = {
            let mut g = self.globals.borrow_mut()?;
            let mut ctx = OpContext {
                globals: &mut g,
                rng: &mut self.regs.rng,
            };
            OperatorTable::get().call(&mut ctx, command, &args)?
        };
        trace!("{} {:?} -> {:?}", command.mnemonic(), args, result);
        self.eval.push(result)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{apply, globals};
    use super::*;

    #[test]
    fn test_mixed_numbers_widen() {
        let g = globals();
        assert_eq!(
            apply(&g, Command::Add, &[Value::Int(1), Value::Float(0.5)]).expect("add"),
            Value::Float(1.5)
        );
        assert_eq!(
            apply(&g, Command::Add, &[Value::Bool(true), Value::Int(2)]).expect("add"),
            Value::Int(3)
        );
    }

    #[test]
    fn test_incompatible_operands() {
        let g = globals();
        let err = apply(&g, Command::Subtract, &[Value::Divert(0), Value::Int(1)])
            .expect_err("mismatch");
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_truthiness() {
        let g = globals();
        let g = g.borrow().expect("globals");
        assert!(!truthy(&Value::Int(0), &g).expect("int"));
        assert!(truthy(&Value::Float(0.1), &g).expect("float"));
        assert!(!truthy(&Value::Null, &g).expect("null"));
        assert!(truthy(&Value::Divert(4), &g).expect("divert"));
    }
}
