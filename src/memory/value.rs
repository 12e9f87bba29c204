//! Runtime value representation
//!
//! [`Value`] is a small `Copy` tagged union. Strings are references into the story's
//! string section or the runtime [`StringTable`](super::string_table::StringTable);
//! a concatenation keeps up to [`MAX_STRING_PARTS`] references chained in one value
//! before it has to be flattened into a fresh table entry.
//!
//! The structural variants (`Newline`, `Glue`, `Marker`, `FuncStart`, `FuncEnd`)
//! only ever live in the output stream or on the eval stack between string markers.
//!
//! # Casting
//!
//! [`common_base`] resolves the type both operands of a binary operator are widened
//! to before dispatch. Casts only ever widen:
//!
//! ```text
//! bool → uint → int → float → string
//! list flag → list
//! ```


/// 32-bit name hash used for variables, paths and external functions
pub type Hash = u32;

/// FNV-1a hash of a name or path
pub fn hash_string(name: &str) -> Hash {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Where the bytes of a string live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrRef {
    /// Byte offset into the story's string section
    Story(u32),
    /// Id in the runtime string table
    Heap(u32),
}

/// Number of string references one value can chain before flattening
pub const MAX_STRING_PARTS: usize = 4;

/// A string value made of one or more chained references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrChain {
    parts: [StrRef; MAX_STRING_PARTS],
    len: u8,
}

impl StrChain {
    pub fn single(part: StrRef) -> Self {
        StrChain {
            parts: [part; MAX_STRING_PARTS],
            len: 1,
        }
    }

    pub fn parts(&self) -> &[StrRef] {
        &self.parts[..self.len as usize]
    }

    /// Chain `other` after `self`, if both fit in one value
    pub fn concat(&self, other: &StrChain) -> Option<StrChain> {
        let total = self.len as usize + other.len as usize;
        if total > MAX_STRING_PARTS {
            return None;
        }
        let mut parts = self.parts;
        parts[self.len as usize..total].copy_from_slice(other.parts());
        Some(StrChain {
            parts,
            len: total as u8,
        })
    }
}

/// One flag of one list type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListFlag {
    pub list: i16,
    pub flag: i16,
}

/// The "no flag" value, produced when list arithmetic runs out of range
pub const NULL_FLAG: ListFlag = ListFlag { list: -1, flag: -1 };

impl ListFlag {
    pub fn new(list: usize, flag: usize) -> Self {
        ListFlag {
            list: list as i16,
            flag: flag as i16,
        }
    }

    pub fn is_null(&self) -> bool {
        self.list < 0 || self.flag < 0
    }
}

/// Handle to a list instance in the list table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub u32);

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Void, or an output element erased by glue
    Null,
    Bool(bool),
    Uint(u32),
    Int(i32),
    Float(f32),
    Str(StrChain),
    ListFlag(ListFlag),
    List(ListId),
    /// Divert target: byte offset of the destination
    Divert(u32),
    /// Reference to a variable; frame 0 is the globals store
    Pointer { name: Hash, frame: u32 },
    Newline,
    Glue,
    /// Start of a string, tag or choice being assembled in the output stream
    Marker,
    FuncStart,
    FuncEnd,
}

/// Discriminant of [`Value`], ordered so that numeric widening goes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Null,
    Bool,
    Uint,
    Int,
    Float,
    ListFlag,
    List,
    Str,
    Divert,
    Pointer,
    Newline,
    Glue,
    Marker,
    FuncStart,
    FuncEnd,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::Bool | ValueType::Uint | ValueType::Int | ValueType::Float
        )
    }

    pub fn is_list(self) -> bool {
        matches!(self, ValueType::ListFlag | ValueType::List)
    }

    /// Whether values of this type can be rendered as text
    pub fn is_printable(self) -> bool {
        self.is_numeric() || self.is_list() || self == ValueType::Str
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "void",
            ValueType::Bool => "bool",
            ValueType::Uint => "uint",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::ListFlag => "list flag",
            ValueType::List => "list",
            ValueType::Str => "string",
            ValueType::Divert => "divert",
            ValueType::Pointer => "variable pointer",
            ValueType::Newline => "newline",
            ValueType::Glue => "glue",
            ValueType::Marker => "marker",
            ValueType::FuncStart => "function start",
            ValueType::FuncEnd => "function end",
        }
    }
}

/// Type both operands are widened to, or `None` if the pair is incompatible
pub fn common_base(lhs: ValueType, rhs: ValueType) -> Option<ValueType> {
    use ValueType::*;
    if lhs == rhs {
        return Some(lhs);
    }
    match (lhs, rhs) {
        (Str, other) | (other, Str) if other.is_printable() => Some(Str),
        (a, b) if a.is_numeric() && b.is_numeric() => Some(a.max(b)),
        (ListFlag, List) | (List, ListFlag) => Some(List),
        (list, number) | (number, list) if list.is_list() && number.is_numeric() => Some(list),
        _ => None,
    }
}

/// Common base of every operand, folded left to right
pub fn common_base_of(values: &[Value]) -> Option<ValueType> {
    let mut iter = values.iter().map(Value::value_type);
    let first = iter.next()?;
    iter.try_fold(first, common_base)
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Uint(_) => ValueType::Uint,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::ListFlag(_) => ValueType::ListFlag,
            Value::List(_) => ValueType::List,
            Value::Divert(_) => ValueType::Divert,
            Value::Pointer { .. } => ValueType::Pointer,
            Value::Newline => ValueType::Newline,
            Value::Glue => ValueType::Glue,
            Value::Marker => ValueType::Marker,
            Value::FuncStart => ValueType::FuncStart,
            Value::FuncEnd => ValueType::FuncEnd,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    pub fn story_str(offset: u32) -> Self {
        Value::Str(StrChain::single(StrRef::Story(offset)))
    }

    pub fn heap_str(id: u32) -> Self {
        Value::Str(StrChain::single(StrRef::Heap(id)))
    }

    /// Numeric widening; `None` for anything that is not a widening numeric cast
    pub fn widen(&self, to: ValueType) -> Option<Value> {
        let widened = match (*self, to) {
            (v, t) if v.value_type() == t => v,
            (Value::Bool(b), ValueType::Uint) => Value::Uint(b as u32),
            (Value::Bool(b), ValueType::Int) => Value::Int(b as i32),
            (Value::Bool(b), ValueType::Float) => Value::Float(if b { 1.0 } else { 0.0 }),
            (Value::Uint(u), ValueType::Int) => Value::Int(u as i32),
            (Value::Uint(u), ValueType::Float) => Value::Float(u as f32),
            (Value::Int(i), ValueType::Float) => Value::Float(i as f32),
            _ => return None,
        };
        Some(widened)
    }

    /// Integer view of a numeric value
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Value::Bool(b) => Some(b as i32),
            Value::Uint(u) => Some(u as i32),
            Value::Int(i) => Some(i),
            Value::Float(f) => Some(f as i32),
            _ => None,
        }
    }
}

/// Render a float the way story text expects: integral values lose the fraction
pub fn format_float(value: f32) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e9 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Values exchanged with the host: external function arguments, results, observers
/// and variable access
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Str(String),
}

impl HostValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            HostValue::Bool(b) => Some(*b as i32),
            HostValue::Int(i) => Some(*i),
            HostValue::Uint(u) => Some(*u as i32),
            HostValue::Float(f) => Some(*f as i32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Int(v)
    }
}

impl From<u32> for HostValue {
    fn from(v: u32) -> Self {
        HostValue::Uint(v)
    }
}

impl From<f32> for HostValue {
    fn from(v: f32) -> Self {
        HostValue::Float(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::Str(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::Str(v)
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_base_matrix() {
        use ValueType::*;
        assert_eq!(common_base(Int, Float), Some(Float));
        assert_eq!(common_base(Bool, Int), Some(Int));
        assert_eq!(common_base(Uint, Int), Some(Int));
        assert_eq!(common_base(Str, Int), Some(Str));
        assert_eq!(common_base(List, Str), Some(Str));
        assert_eq!(common_base(ListFlag, List), Some(List));
        assert_eq!(common_base(List, Int), Some(List));
        assert_eq!(common_base(Divert, Int), None);
        assert_eq!(common_base(Divert, Divert), Some(Divert));
    }

    #[test]
    fn test_widening_only() {
        assert_eq!(Value::Int(3).widen(ValueType::Float), Some(Value::Float(3.0)));
        assert_eq!(Value::Bool(true).widen(ValueType::Int), Some(Value::Int(1)));
        assert_eq!(Value::Float(3.5).widen(ValueType::Int), None);
    }

    #[test]
    fn test_chain_capacity() {
        let a = StrChain::single(StrRef::Story(0));
        let b = a.concat(&a).expect("two parts fit");
        let c = b.concat(&b).expect("four parts fit");
        assert_eq!(c.parts().len(), MAX_STRING_PARTS);
        assert!(c.concat(&a).is_none());
    }

    #[test]
    fn test_hash_is_fnv1a() {
        assert_eq!(hash_string(""), 0x811c_9dc5);
        assert_eq!(hash_string("a"), 0xe40c_292c);
        assert_ne!(hash_string("knot"), hash_string("knot.stitch"));
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
    }
}
