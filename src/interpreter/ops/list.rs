use super::{mismatch, OpContext, OperatorTable};
use crate::interpreter::command::Command;
use crate::interpreter::errors::RuntimeError;
use crate::memory::value::{ListFlag, ListId, Value, ValueType, NULL_FLAG};

const LIST_OPS: &[Command] = &[
    Command::Add,
    Command::Subtract,
    Command::IsEqual,
    Command::NotEqual,
    Command::GreaterThan,
    Command::LessThan,
    Command::GreaterThanEquals,
    Command::LessThanEquals,
    Command::And,
    Command::Or,
    Command::Has,
    Command::Hasnt,
    Command::Intersection,
    Command::ListInt,
    Command::Not,
    Command::ListCount,
    Command::ListMin,
    Command::ListMax,
    Command::Lrnd,
    Command::ListAll,
    Command::ListInvert,
    Command::ListValue,
    Command::IntCast,
    Command::ListRange,
];

pub(crate) fn register(table: &mut OperatorTable) {
    table.register(LIST_OPS, ValueType::List, list_op);
    table.register(LIST_OPS, ValueType::ListFlag, flag_op);
}

/// Integer operand of list arithmetic: a number, or the value of a flag
fn offset(ctx: &OpContext<'_>, value: &Value) -> Result<i32, RuntimeError> {
    match value {
        Value::ListFlag(flag) => ctx.globals.lists.flag_value(*flag),
        Value::List(id) => {
            let max = ctx.globals.lists.max(*id)?;
            if max.is_null() {
                Ok(0)
            } else {
                ctx.globals.lists.flag_value(max)
            }
        }
        other => other.as_int().ok_or_else(|| RuntimeError::TypeMismatch {
            operation: "list arithmetic".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

fn list_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::List(lhs) = args[0] else {
        return Err(mismatch(command, args));
    };
    let rhs = match args.get(1) {
        Some(Value::List(id)) => Some(*id),
        _ => None,
    };

    let value = match (command, rhs) {
        (Command::Add, Some(rhs)) => Value::List(ctx.globals.lists.union(lhs, rhs)?),
        (Command::Subtract, Some(rhs)) => Value::List(ctx.globals.lists.difference(lhs, rhs)?),
        (Command::Add, None) => {
            let by = offset(ctx, &args[1])?;
            Value::List(ctx.globals.lists.shift(lhs, by)?)
        }
        (Command::Subtract, None) => {
            let by = offset(ctx, &args[1])?;
            Value::List(ctx.globals.lists.shift(lhs, -by)?)
        }
        (Command::IsEqual, Some(rhs)) => Value::Bool(ctx.globals.lists.equal(lhs, rhs)?),
        (Command::NotEqual, Some(rhs)) => Value::Bool(!ctx.globals.lists.equal(lhs, rhs)?),
        (Command::GreaterThan, Some(rhs)) => Value::Bool(ctx.globals.lists.greater(lhs, rhs)?),
        (Command::LessThan, Some(rhs)) => Value::Bool(ctx.globals.lists.less(lhs, rhs)?),
        (Command::GreaterThanEquals, Some(rhs)) => Value::Bool(ctx.globals.lists.greater_equal(lhs, rhs)?),
        (Command::LessThanEquals, Some(rhs)) => Value::Bool(ctx.globals.lists.less_equal(lhs, rhs)?),
        (Command::And, Some(rhs)) => Value::Bool(!ctx.globals.lists.is_empty(lhs)? && !ctx.globals.lists.is_empty(rhs)?),
        (Command::Or, Some(rhs)) => Value::Bool(!ctx.globals.lists.is_empty(lhs)? || !ctx.globals.lists.is_empty(rhs)?),
        (Command::Has, Some(rhs)) => Value::Bool(ctx.globals.lists.has(lhs, rhs)?),
        (Command::Hasnt, Some(rhs)) => Value::Bool(!ctx.globals.lists.has(lhs, rhs)?),
        (Command::Intersection, Some(rhs)) => Value::List(ctx.globals.lists.intersection(lhs, rhs)?),
        (Command::ListInt, None) => {
            let wanted = offset(ctx, &args[1])?;
            let flag = ctx
                .globals
                .lists
                .origins(lhs)?
                .into_iter()
                .find_map(|list| ctx.globals.lists.flag_with_value(list, wanted))
                .unwrap_or(NULL_FLAG);
            Value::ListFlag(flag)
        }
        (Command::ListRange, None) => {
            let min = offset(ctx, &args[1])?;
            let max = offset(ctx, &args[2])?;
            Value::List(ctx.globals.lists.range(lhs, min, max)?)
        }
        (Command::Not, None) => Value::Bool(ctx.globals.lists.is_empty(lhs)?),
        (Command::ListCount, None) => Value::Int(ctx.globals.lists.count(lhs)?),
        (Command::ListMin, None) => Value::ListFlag(ctx.globals.lists.min(lhs)?),
        (Command::ListMax, None) => Value::ListFlag(ctx.globals.lists.max(lhs)?),
        (Command::ListAll, None) => Value::List(ctx.globals.lists.all(lhs)?),
        (Command::ListInvert, None) => Value::List(ctx.globals.lists.invert(lhs)?),
        (Command::ListValue | Command::IntCast, None) => Value::Int(offset(ctx, &args[0])?),
        (Command::Lrnd, None) => {
            let count = ctx.globals.lists.count(lhs)?;
            if count == 0 {
                Value::List(ctx.globals.lists.create())
            } else {
                let pick = ctx.rng.range(0, count - 1) as usize;
                let flag = ctx.globals.lists.nth(lhs, pick)?;
                Value::List(ctx.globals.lists.from_flag(flag)?)
            }
        }
        _ => return Err(mismatch(command, args)),
    };
    Ok(value)
}

fn flag_op(ctx: &mut OpContext<'_>, command: Command, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::ListFlag(flag) = args[0] else {
        return Err(mismatch(command, args));
    };
    let rhs_flag: Option<ListFlag> = match args.get(1) {
        Some(Value::ListFlag(f)) => Some(*f),
        _ => None,
    };

    let value = match (command, rhs_flag) {
        (Command::Add, None) => {
            let by = offset(ctx, &args[1])?;
            Value::ListFlag(ctx.globals.lists.shift_flag(flag, by)?)
        }
        (Command::Subtract, None) => {
            let by = offset(ctx, &args[1])?;
            Value::ListFlag(ctx.globals.lists.shift_flag(flag, -by)?)
        }
        (Command::IsEqual, Some(rhs)) => Value::Bool(flag == rhs),
        (Command::NotEqual, Some(rhs)) => Value::Bool(flag != rhs),
        (Command::GreaterThan | Command::LessThan | Command::GreaterThanEquals | Command::LessThanEquals, Some(rhs)) => {
            let a = flag_value(ctx, flag)?;
            let b = flag_value(ctx, rhs)?;
            Value::Bool(match command {
                Command::GreaterThan => a > b,
                Command::LessThan => a < b,
                Command::GreaterThanEquals => a >= b,
                _ => a <= b,
            })
        }
        (Command::And, Some(rhs)) => Value::Bool(!flag.is_null() && !rhs.is_null()),
        (Command::Or, Some(rhs)) => Value::Bool(!flag.is_null() || !rhs.is_null()),
        (Command::Not, None) => Value::Bool(flag.is_null()),
        (Command::ListCount, None) => Value::Int(if flag.is_null() { 0 } else { 1 }),
        (Command::ListMin | Command::ListMax, None) => Value::ListFlag(flag),
        (Command::ListValue | Command::IntCast, None) => Value::Int(flag_value(ctx, flag)?),
        _ => {
            // everything else treats the flags as one-element lists
            let mut lists = Vec::with_capacity(args.len());
            for arg in args {
                lists.push(match arg {
                    Value::ListFlag(f) => Value::List(as_list(ctx, *f)?),
                    other => *other,
                });
            }
            return list_op(ctx, command, &lists);
        }
    };
    Ok(value)
}

fn flag_value(ctx: &OpContext<'_>, flag: ListFlag) -> Result<i32, RuntimeError> {
    if flag.is_null() {
        Ok(0)
    } else {
        ctx.globals.lists.flag_value(flag)
    }
}

fn as_list(ctx: &mut OpContext<'_>, flag: ListFlag) -> Result<ListId, RuntimeError> {
    if flag.is_null() {
        Ok(ctx.globals.lists.create())
    } else {
        ctx.globals.lists.from_flag(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{apply, globals};
    use super::*;
    use crate::globals::Globals;

    fn colour(g: &Globals, names: &[&str]) -> Value {
        let mut gi = g.borrow_mut().expect("globals");
        let id = gi.lists.create();
        for name in names {
            let flag = gi.lists.find_flag(name).expect("flag");
            gi.lists.add_flag_inplace(id, flag).expect("add");
        }
        Value::List(id)
    }

    fn render(g: &Globals, value: &Value) -> String {
        let Value::List(id) = value else {
            panic!("expected a list, got {:?}", value);
        };
        g.borrow().expect("globals").lists.render(*id).expect("render")
    }

    #[test]
    fn test_union_and_difference() {
        let g = globals();
        let a = colour(&g, &["red"]);
        let b = colour(&g, &["blue", "green"]);
        let both = apply(&g, Command::Add, &[a, b]).expect("union");
        assert_eq!(render(&g, &both), "red, green, blue");
        let rest = apply(&g, Command::Subtract, &[both, a]).expect("difference");
        assert_eq!(render(&g, &rest), "green, blue");
    }

    #[test]
    fn test_shift_by_number() {
        let g = globals();
        let a = colour(&g, &["red", "green"]);
        let up = apply(&g, Command::Add, &[a, Value::Int(1)]).expect("shift");
        assert_eq!(render(&g, &up), "green, blue");
    }

    #[test]
    fn test_min_max_value() {
        let g = globals();
        let a = colour(&g, &["red", "blue"]);
        let max = apply(&g, Command::ListMax, &[a]).expect("max");
        assert_eq!(apply(&g, Command::ListValue, &[max]).expect("value"), Value::Int(3));
        assert_eq!(apply(&g, Command::ListCount, &[a]).expect("count"), Value::Int(2));
    }

    #[test]
    fn test_has_and_range() {
        let g = globals();
        let all = colour(&g, &["red", "green", "blue"]);
        let red = colour(&g, &["red"]);
        assert_eq!(apply(&g, Command::Has, &[all, red]).expect("has"), Value::Bool(true));
        let middle = apply(&g, Command::ListRange, &[all, Value::Int(2), Value::Int(2)]).expect("range");
        assert_eq!(render(&g, &middle), "green");
    }

    #[test]
    fn test_list_int_finds_flag() {
        let g = globals();
        let origin = colour(&g, &["red"]);
        let flag = apply(&g, Command::ListInt, &[origin, Value::Int(3)]).expect("list int");
        let expected = g.borrow().expect("globals").lists.find_flag("blue").expect("blue");
        assert_eq!(flag, Value::ListFlag(expected));
    }
}
