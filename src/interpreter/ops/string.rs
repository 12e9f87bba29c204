use super::{mismatch, OpContext, OperatorTable};
use crate::interpreter::command::Command;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{Value, ValueType};
use crate::memory::TextSource;

pub(crate) fn register(table: &mut OperatorTable) {
    table.register(
        &[
            Command::Add,
            Command::IsEqual,
            Command::NotEqual,
            Command::Has,
            Command::Hasnt,
        ],
        ValueType::Str,
        string_op,
    );
}

fn string_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let (Value::Str(lhs), Value::Str(rhs)) = (args[0], args[1]) else {
        return Err(mismatch(command, args));
    };

    if command == Command::Add {
        // short concatenations stay references into existing strings
        if let Some(chain) = lhs.concat(&rhs) {
            return Ok(Value::Str(chain));
        }
        let texts = ctx.globals.texts();
        let text = texts.chain_text(&lhs)? + &texts.chain_text(&rhs)?;
        return Ok(ctx.new_string(text));
    }

    let texts = ctx.globals.texts();
    let a = texts.chain_text(&lhs)?;
    let b = texts.chain_text(&rhs)?;
    Ok(Value::Bool(match command {
        Command::IsEqual => a == b,
        Command::NotEqual => a != b,
        Command::Has => a.contains(&b),
        Command::Hasnt => !a.contains(&b),
        _ => return Err(mismatch(command, args)),
    }))
}
