use super::{mismatch, OpContext, OperatorTable};
use crate::interpreter::command::Command;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{Value, ValueType};

const INT_OPS: &[Command] = &[
    Command::Add,
    Command::Subtract,
    Command::Divide,
    Command::Multiply,
    Command::Mod,
    Command::Random,
    Command::IsEqual,
    Command::GreaterThan,
    Command::LessThan,
    Command::GreaterThanEquals,
    Command::LessThanEquals,
    Command::NotEqual,
    Command::And,
    Command::Or,
    Command::Min,
    Command::Max,
    Command::Not,
    Command::Negate,
    Command::Floor,
    Command::Ceiling,
    Command::IntCast,
];

pub(crate) fn register(table: &mut OperatorTable) {
    table.register(INT_OPS, ValueType::Int, int_op);
    table.register(INT_OPS, ValueType::Uint, widened_int_op);
    table.register(INT_OPS, ValueType::Bool, bool_op);
    table.register(INT_OPS, ValueType::Float, float_op);
}

fn int(value: &Value) -> i32 {
    value.as_int().unwrap_or(0)
}

fn float(value: &Value) -> f32 {
    match *value {
        Value::Float(f) => f,
        other => other.as_int().unwrap_or(0) as f32,
    }
}

fn int_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = int(&args[0]);
    let b = args.get(1).map(int).unwrap_or(0);
    Ok(match command {
        Command::Add => Value::Int(a.wrapping_add(b)),
        Command::Subtract => Value::Int(a.wrapping_sub(b)),
        Command::Multiply => Value::Int(a.wrapping_mul(b)),
        Command::Divide | Command::Mod if b == 0 => {
            return Err(RuntimeError::DivisionByZero {
                operation: command.mnemonic().to_string(),
            })
        }
        Command::Divide => Value::Int(a.wrapping_div(b)),
        Command::Mod => Value::Int(a.wrapping_rem(b)),
        Command::Random => Value::Int(ctx.rng.range(a, b)),
        Command::IsEqual => Value::Bool(a == b),
        Command::NotEqual => Value::Bool(a != b),
        Command::GreaterThan => Value::Bool(a > b),
        Command::LessThan => Value::Bool(a < b),
        Command::GreaterThanEquals => Value::Bool(a >= b),
        Command::LessThanEquals => Value::Bool(a <= b),
        Command::And => Value::Bool(a != 0 && b != 0),
        Command::Or => Value::Bool(a != 0 || b != 0),
        Command::Min => Value::Int(a.min(b)),
        Command::Max => Value::Int(a.max(b)),
        Command::Not => Value::Bool(a == 0),
        Command::Negate => Value::Int(a.wrapping_neg()),
        Command::Floor | Command::Ceiling => Value::Float(a as f32),
        Command::IntCast => Value::Int(a),
        _ => return Err(mismatch(command, args)),
    })
}

/// Unsigned operands are computed as signed integers
fn widened_int_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let args: Vec<Value> = args.iter().map(|v| Value::Int(int(v))).collect();
    int_op(ctx, command, &args)
}

fn bool_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let bools: Vec<bool> = args.iter().map(|v| matches!(v, Value::Bool(true))).collect();
    match (command, bools.as_slice()) {
        (Command::And, [a, b]) => Ok(Value::Bool(*a && *b)),
        (Command::Or, [a, b]) => Ok(Value::Bool(*a || *b)),
        (Command::IsEqual, [a, b]) => Ok(Value::Bool(a == b)),
        (Command::NotEqual, [a, b]) => Ok(Value::Bool(a != b)),
        (Command::Not, [a]) => Ok(Value::Bool(!a)),
        _ => widened_int_op(ctx, command, args),
    }
}

fn float_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = float(&args[0]);
    let b = args.get(1).map(float).unwrap_or(0.0);
    Ok(match command {
        Command::Add => Value::Float(a + b),
        Command::Subtract => Value::Float(a - b),
        Command::Multiply => Value::Float(a * b),
        Command::Divide => Value::Float(a / b),
        Command::Mod => Value::Float(a % b),
        Command::Random => Value::Int(ctx.rng.range(a as i32, b as i32)),
        Command::IsEqual => Value::Bool(a == b),
        Command::NotEqual => Value::Bool(a != b),
        Command::GreaterThan => Value::Bool(a > b),
        Command::LessThan => Value::Bool(a < b),
        Command::GreaterThanEquals => Value::Bool(a >= b),
        Command::LessThanEquals => Value::Bool(a <= b),
        Command::And => Value::Bool(a != 0.0 && b != 0.0),
        Command::Or => Value::Bool(a != 0.0 || b != 0.0),
        Command::Min => Value::Float(a.min(b)),
        Command::Max => Value::Float(a.max(b)),
        Command::Not => Value::Bool(a == 0.0),
        Command::Negate => Value::Float(-a),
        Command::Floor => Value::Float(a.floor()),
        Command::Ceiling => Value::Float(a.ceil()),
        Command::IntCast => Value::Int(a as i32),
        _ => return Err(mismatch(command, args)),
    })
}
