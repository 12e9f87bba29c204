use super::{mismatch, OpContext, OperatorTable};
use crate::interpreter::command::Command;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{Value, ValueType};

pub(crate) fn register(table: &mut OperatorTable) {
    table.register(
        &[
            Command::IsEqual,
            Command::NotEqual,
            Command::ReadCountVar,
            Command::Turns,
        ],
        ValueType::Divert,
        divert_op,
    );
}

/// Operators on divert targets: identity and the counters of the target container
fn divert_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::Divert(target) = args[0] else {
        return Err(mismatch(command, args));
    };
    match (command, args.get(1)) {
        (Command::IsEqual, Some(Value::Divert(other))) => Ok(Value::Bool(target == *other)),
        (Command::NotEqual, Some(Value::Divert(other))) => Ok(Value::Bool(target != *other)),
        (Command::ReadCountVar | Command::Turns, None) => {
            let container = ctx
                .globals
                .story
                .container_at(target)
                .ok_or(RuntimeError::InvalidAddress { address: target })?;
            Ok(Value::Int(if command == Command::Turns {
                ctx.globals.turns_since(container)?
            } else {
                ctx.globals.visits(container)? as i32
            }))
        }
        _ => Err(mismatch(command, args)),
    }
}
