//! Bytecode commands and their flag sets
//!
//! An instruction is one command byte, one flag byte, and a 4-byte payload when the
//! command carries one. Payloads are stored in the story's byte order and are not
//! aligned.
//!
//! The operand count of an operator follows from its position:
//!
//! ```text
//! ListRange              ternary
//! Add ..= ListInt        binary
//! Not ..= ListValue      unary
//! ```

use super::errors::RuntimeError;
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Command {
    // == Value commands
    Str = 0,
    Int,
    Bool,
    Float,
    ValuePointer,
    DivertVal,
    List,
    Newline,
    Glue,
    Void,
    Tag,

    // == Diverts
    Divert,
    DivertToVariable,
    Tunnel,
    Function,

    // == Terminal
    Done,
    End,
    TunnelReturn,
    FunctionReturn,

    // == Variables
    DefineTemp,
    SetVariable,

    // == Evaluation stack
    StartEval,
    EndEval,
    Output,
    Pop,
    Duplicate,
    PushVariableValue,
    Visit,
    Turn,
    ReadCount,
    Sequence,
    Seed,

    // == String stack
    StartStr,
    EndStr,
    StartTag,
    EndTag,

    Choice,
    Thread,

    // == Ternary operators
    ListRange,

    // == Binary operators
    Add,
    Subtract,
    Divide,
    Multiply,
    Mod,
    Random,
    IsEqual,
    GreaterThan,
    LessThan,
    GreaterThanEquals,
    LessThanEquals,
    NotEqual,
    And,
    Or,
    Min,
    Max,
    Has,
    Hasnt,
    Intersection,
    ListInt,

    // == Unary operators
    Not,
    Negate,
    ListCount,
    ListMin,
    ListMax,
    ReadCountVar,
    Turns,
    Lrnd,
    Floor,
    Ceiling,
    IntCast,
    ListAll,
    ListInvert,
    ListValue,

    ChoiceCount,
    StartContainerMarker,
    EndContainerMarker,
    CallExternal,
}

const ALL: [Command; 77] = [
    Command::Str,
    Command::Int,
    Command::Bool,
    Command::Float,
    Command::ValuePointer,
    Command::DivertVal,
    Command::List,
    Command::Newline,
    Command::Glue,
    Command::Void,
    Command::Tag,
    Command::Divert,
    Command::DivertToVariable,
    Command::Tunnel,
    Command::Function,
    Command::Done,
    Command::End,
    Command::TunnelReturn,
    Command::FunctionReturn,
    Command::DefineTemp,
    Command::SetVariable,
    Command::StartEval,
    Command::EndEval,
    Command::Output,
    Command::Pop,
    Command::Duplicate,
    Command::PushVariableValue,
    Command::Visit,
    Command::Turn,
    Command::ReadCount,
    Command::Sequence,
    Command::Seed,
    Command::StartStr,
    Command::EndStr,
    Command::StartTag,
    Command::EndTag,
    Command::Choice,
    Command::Thread,
    Command::ListRange,
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
    Command::Has,
    Command::Hasnt,
    Command::Intersection,
    Command::ListInt,
    Command::Not,
    Command::Negate,
    Command::ListCount,
    Command::ListMin,
    Command::ListMax,
    Command::ReadCountVar,
    Command::Turns,
    Command::Lrnd,
    Command::Floor,
    Command::Ceiling,
    Command::IntCast,
    Command::ListAll,
    Command::ListInvert,
    Command::ListValue,
    Command::ChoiceCount,
    Command::StartContainerMarker,
    Command::EndContainerMarker,
    Command::CallExternal,
];

impl Command {
    pub fn from_u8(byte: u8) -> Result<Command, RuntimeError> {
        ALL.get(byte as usize)
            .copied()
            .ok_or(RuntimeError::UnknownOpcode { opcode: byte })
    }

    /// Whether a 4-byte payload follows the flag byte
    pub fn has_payload(self) -> bool {
        use Command::*;
        matches!(
            self,
            Str | Int
                | Bool
                | Float
                | ValuePointer
                | DivertVal
                | List
                | Tag
                | Divert
                | DivertToVariable
                | Tunnel
                | Function
                | DefineTemp
                | SetVariable
                | PushVariableValue
                | ReadCount
                | Choice
                | StartContainerMarker
                | EndContainerMarker
                | CallExternal
        )
    }

    /// Encoded size in bytes
    pub fn size(self) -> u32 {
        if self.has_payload() {
            6
        } else {
            2
        }
    }

    /// Number of eval-stack operands an operator consumes; 0 for everything else
    pub fn arity(self) -> usize {
        let code = self as u8;
        if code == Command::ListRange as u8 {
            3
        } else if (Command::Add as u8..=Command::ListInt as u8).contains(&code) {
            2
        } else if (Command::Not as u8..=Command::ListValue as u8).contains(&code) {
            1
        } else {
            0
        }
    }

    pub fn is_operator(self) -> bool {
        self.arity() > 0
    }

    /// Short name used in logs and the player
    pub fn mnemonic(self) -> &'static str {
        use Command::*;
        match self {
            Str => "str",
            Int => "int",
            Bool => "bool",
            Float => "float",
            ValuePointer => "ptr",
            DivertVal => "divert_val",
            List => "list",
            Newline => "\\n",
            Glue => "<>",
            Void => "void",
            Tag => "tag",
            Divert => "divert",
            DivertToVariable => "divert_var",
            Tunnel => "->->call",
            Function => "call",
            Done => "done",
            End => "end",
            TunnelReturn => "->->",
            FunctionReturn => "~ret",
            DefineTemp => "temp=",
            SetVariable => "set",
            StartEval => "ev",
            EndEval => "/ev",
            Output => "out",
            Pop => "pop",
            Duplicate => "du",
            PushVariableValue => "var",
            Visit => "visit",
            Turn => "turn",
            ReadCount => "read_count",
            Sequence => "seq",
            Seed => "srnd",
            StartStr => "str(",
            EndStr => ")str",
            StartTag => "#",
            EndTag => "/#",
            Choice => "choice",
            Thread => "thread",
            ListRange => "range",
            Add => "+",
            Subtract => "-",
            Divide => "/",
            Multiply => "*",
            Mod => "%",
            Random => "rnd",
            IsEqual => "==",
            GreaterThan => ">",
            LessThan => "<",
            GreaterThanEquals => ">=",
            LessThanEquals => "<=",
            NotEqual => "!=",
            And => "&&",
            Or => "||",
            Min => "min",
            Max => "max",
            Has => "?",
            Hasnt => "!?",
            Intersection => "^",
            ListInt => "list_int",
            Not => "!",
            Negate => "neg",
            ListCount => "list_count",
            ListMin => "list_min",
            ListMax => "list_max",
            ReadCountVar => "read_count_var",
            Turns => "turns",
            Lrnd => "lrnd",
            Floor => "floor",
            Ceiling => "ceiling",
            IntCast => "int()",
            ListAll => "list_all",
            ListInvert => "list_invert",
            ListValue => "list_value",
            ChoiceCount => "choice_count",
            StartContainerMarker => "container(",
            EndContainerMarker => ")container",
            CallExternal => "x()",
        }
    }
}

bitflags! {
    /// Flags of CHOICE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChoiceFlags: u8 {
        const HAS_CONDITION = 1 << 0;
        const HAS_START_CONTENT = 1 << 1;
        const HAS_CHOICE_ONLY_CONTENT = 1 << 2;
        const IS_INVISIBLE_DEFAULT = 1 << 3;
        const IS_ONCE_ONLY = 1 << 4;
    }
}

bitflags! {
    /// Flags of DIVERT and DIVERT_TO_VARIABLE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DivertFlags: u8 {
        const HAS_CONDITION = 1 << 0;
        const IS_FALLTHROUGH = 1 << 1;
    }
}

bitflags! {
    /// Flags of START_CONTAINER_MARKER, also stored in the container table
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags: u8 {
        const TRACK_VISITS = 1 << 0;
        const TRACK_TURNS = 1 << 1;
        const COUNT_START_ONLY = 1 << 2;
        const IS_KNOT = 1 << 3;
    }
}

bitflags! {
    /// Flags of SET_VARIABLE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AssignmentFlags: u8 {
        const IS_REDEFINE = 1 << 0;
    }
}

bitflags! {
    /// Flags of FUNCTION and TUNNEL
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CallFlags: u8 {
        /// The payload names a divert-valued variable instead of an offset
        const TO_VARIABLE = 1 << 0;
        /// The function is the ink fallback for the preceding CALL_EXTERNAL
        const FALLBACK_FUNCTION = 1 << 1;
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub command: Command,
    pub flag: u8,
    pub payload: u32,
}

impl Instruction {
    /// Decode the instruction at `offset`
    pub fn decode(code: &[u8], offset: u32) -> Result<Instruction, RuntimeError> {
        let at = offset as usize;
        let head = code
            .get(at..at + 2)
            .ok_or(RuntimeError::UnexpectedEndOfProgram { offset })?;
        let command = Command::from_u8(head[0])?;
        let payload = if command.has_payload() {
            let bytes = code
                .get(at + 2..at + 6)
                .ok_or(RuntimeError::UnexpectedEndOfProgram { offset })?;
            u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            0
        };
        Ok(Instruction {
            offset,
            command,
            flag: head[1],
            payload,
        })
    }

    /// Offset of the following instruction
    pub fn next(&self) -> u32 {
        self.offset + self.command.size()
    }

    pub fn payload_i32(&self) -> i32 {
        self.payload as i32
    }

    pub fn payload_f32(&self) -> f32 {
        f32::from_bits(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_opcode() {
        for (i, cmd) in ALL.iter().enumerate() {
            assert_eq!(*cmd as u8 as usize, i);
            assert_eq!(Command::from_u8(i as u8).expect("known"), *cmd);
        }
        assert!(matches!(
            Command::from_u8(ALL.len() as u8),
            Err(RuntimeError::UnknownOpcode { .. })
        ));
    }

    #[test]
    fn test_operator_bands() {
        assert_eq!(Command::ListRange.arity(), 3);
        assert_eq!(Command::Add.arity(), 2);
        assert_eq!(Command::ListInt.arity(), 2);
        assert_eq!(Command::Not.arity(), 1);
        assert_eq!(Command::ListValue.arity(), 1);
        assert_eq!(Command::ChoiceCount.arity(), 0);
        assert_eq!(Command::Thread.arity(), 0);
    }

    #[test]
    fn test_decode_with_and_without_payload() {
        let mut code = vec![Command::Int as u8, 0];
        code.extend_from_slice(&7i32.to_ne_bytes());
        code.extend_from_slice(&[Command::Done as u8, 0]);

        let first = Instruction::decode(&code, 0).expect("decode");
        assert_eq!(first.command, Command::Int);
        assert_eq!(first.payload_i32(), 7);
        assert_eq!(first.next(), 6);

        let second = Instruction::decode(&code, 6).expect("decode");
        assert_eq!(second.command, Command::Done);
        assert_eq!(second.next(), 8);

        assert!(matches!(
            Instruction::decode(&code[..4], 0),
            Err(RuntimeError::UnexpectedEndOfProgram { offset: 0 })
        ));
    }
}
