use std::fmt;

use derive_more::{Display, From, IsVariant};

use crate::common::{escape, format_float, print_vec};

/// Literal operand. Booleans render as 0/1 everywhere downstream.
#[derive(Clone, Debug, PartialEq, Display)]
pub enum Constant {
    #[display("{_0}")]
    Int(i64),
    #[display("{}", format_float(*_0))]
    Float(f64),
    #[display("{}", if *_0 { 1 } else { 0 })]
    Bool(bool),
    #[display("\"{}\"", escape(_0))]
    Str(String),
}

impl Constant {
    pub fn is_zero(&self) -> bool {
        match self {
            Constant::Int(v) => *v == 0,
            Constant::Float(v) => *v == 0.0,
            Constant::Bool(v) => !*v,
            Constant::Str(_) => false,
        }
    }
}

/// A storage slot: a dense per-function temporary or a named local.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IsVariant)]
pub enum Place {
    #[display("%t{_0}")]
    Temp(usize),
    #[display("{_0}")]
    Var(String),
}

#[derive(Clone, Debug, PartialEq, Display, From)]
pub enum Value {
    #[display("{_0}")]
    Constant(Constant),
    #[display("{_0}")]
    Place(Place),
}

impl Value {
    pub fn as_place(&self) -> Option<&Place> {
        match self {
            Value::Place(place) => Some(place),
            Value::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Constant(constant) => Some(constant),
            Value::Place(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum BinaryOp {
    #[display("+")]
    Add,
    #[display("-")]
    Subtract,
    #[display("*")]
    Multiply,
    #[display("/")]
    Divide,
    #[display("%")]
    Remainder,
    #[display("==")]
    Equal,
    #[display("!=")]
    NotEqual,
    #[display("<")]
    Less,
    #[display("<=")]
    LessEqual,
    #[display(">")]
    Greater,
    #[display(">=")]
    GreaterEqual,
}

impl BinaryOp {
    pub fn is_commutative(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Add | Multiply | Equal | NotEqual)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum UnaryOp {
    #[display("-")]
    Negate,
    #[display("!")]
    Not,
}

/// Scalar conversions between the int/float/bool family. Identity casts
/// lower to plain copies and never reach here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum CastOp {
    #[display("i2f")]
    IntToFloat,
    #[display("f2i")]
    FloatToInt,
    #[display("i2b")]
    IntToBool,
    #[display("b2i")]
    BoolToInt,
    #[display("f2b")]
    FloatToBool,
    #[display("b2f")]
    BoolToFloat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ScalarType {
    #[display("int")]
    Int,
    #[display("float")]
    Float,
    #[display("bool")]
    Bool,
    #[display("text")]
    Text,
}

/// Type of an IR slot. Arrays only ever live in named locals; temporaries
/// are scalars or whole records.
#[derive(Clone, Debug, PartialEq, Display)]
pub enum IrType {
    #[display("{_0}")]
    Scalar(ScalarType),
    #[display("{_0}")]
    Record(String),
    #[display("array<{_0},{_1}>")]
    Array(Box<IrType>, usize),
}

/// Branch target. The tag keeps dumps readable; (tag, index) is unique
/// within a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{tag}_{index}")]
pub struct Label {
    pub tag: &'static str,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Display)]
pub enum Instruction {
    #[display("{_1} = {_0}")]
    Copy(Value, Place),
    #[display("{_2} = {_0}{_1}")]
    Unary(UnaryOp, Value, Place),
    #[display("{_3} = {_1} {_0} {_2}")]
    Binary(BinaryOp, Value, Value, Place),
    #[display("{_2} = {_0}({_1})")]
    Cast(CastOp, Value, Place),
    #[display("{dest} = {base}[{index}]")]
    IndexLoad {
        base: Place,
        index: Value,
        dest: Place,
    },
    #[display("{base}[{index}] = {value}")]
    IndexStore {
        base: Place,
        index: Value,
        value: Value,
    },
    #[display("{dest} = {base}.{field}")]
    FieldLoad {
        base: Place,
        field: String,
        dest: Place,
    },
    #[display("{base}.{field} = {value}")]
    FieldStore {
        base: Place,
        field: String,
        value: Value,
    },
    #[display("goto {_0}")]
    Jump(Label),
    #[display("ifz {_0} goto {_1}")]
    JumpIfZero(Value, Label),
    #[display("ifnz {_0} goto {_1}")]
    JumpIfNotZero(Value, Label),
    #[display("{_0}:")]
    Label(Label),
    #[display("{}call {name}({})", match dest { Some(d) => format!("{} = ", d), None => String::new() }, print_vec(args, ", "))]
    Call {
        name: String,
        args: Vec<Value>,
        dest: Option<Place>,
    },
    #[display("return{}", match _0 { Some(v) => format!(" {}", v), None => String::new() })]
    Return(Option<Value>),
    #[display("print_{_1}({_0})")]
    Print(Value, ScalarType),
    #[display("{_0} = read_int()")]
    Read(Place),
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_)
                | Instruction::JumpIfZero(..)
                | Instruction::JumpIfNotZero(..)
                | Instruction::Return(_)
        )
    }

    pub fn is_conditional_jump(&self) -> bool {
        matches!(
            self,
            Instruction::JumpIfZero(..) | Instruction::JumpIfNotZero(..)
        )
    }

    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Instruction::Jump(label)
            | Instruction::JumpIfZero(_, label)
            | Instruction::JumpIfNotZero(_, label) => Some(*label),
            _ => None,
        }
    }

    /// The place this instruction defines, if it is a plain definition.
    /// Stores through an index or field are writes into an aggregate, not
    /// definitions of a slot.
    pub fn defined_place(&self) -> Option<&Place> {
        match self {
            Instruction::Copy(_, dest)
            | Instruction::Unary(_, _, dest)
            | Instruction::Binary(_, _, _, dest)
            | Instruction::Cast(_, _, dest)
            | Instruction::IndexLoad { dest, .. }
            | Instruction::FieldLoad { dest, .. }
            | Instruction::Read(dest) => Some(dest),
            Instruction::Call { dest, .. } => dest.as_ref(),
            _ => None,
        }
    }

    /// Every place read by this instruction. Aggregate stores count their
    /// base as used so liveness never drops the backing slot.
    pub fn used_places(&self) -> Vec<&Place> {
        let mut used = vec![];
        match self {
            Instruction::Copy(src, _)
            | Instruction::Unary(_, src, _)
            | Instruction::Cast(_, src, _)
            | Instruction::JumpIfZero(src, _)
            | Instruction::JumpIfNotZero(src, _)
            | Instruction::Print(src, _) => {
                if let Some(place) = src.as_place() {
                    used.push(place);
                }
            }
            Instruction::Binary(_, lhs, rhs, _) => {
                for value in [lhs, rhs] {
                    if let Some(place) = value.as_place() {
                        used.push(place);
                    }
                }
            }
            Instruction::IndexLoad { base, index, .. } => {
                used.push(base);
                if let Some(place) = index.as_place() {
                    used.push(place);
                }
            }
            Instruction::IndexStore { base, index, value } => {
                used.push(base);
                for v in [index, value] {
                    if let Some(place) = v.as_place() {
                        used.push(place);
                    }
                }
            }
            Instruction::FieldLoad { base, .. } => {
                used.push(base);
            }
            Instruction::FieldStore { base, value, .. } => {
                used.push(base);
                if let Some(place) = value.as_place() {
                    used.push(place);
                }
            }
            Instruction::Call { args, .. } => {
                for arg in args {
                    if let Some(place) = arg.as_place() {
                        used.push(place);
                    }
                }
            }
            Instruction::Return(Some(value)) => {
                if let Some(place) = value.as_place() {
                    used.push(place);
                }
            }
            Instruction::Return(None)
            | Instruction::Jump(_)
            | Instruction::Label(_)
            | Instruction::Read(_) => {}
        }
        used
    }

    /// Instructions whose removal would change observable behavior. A pure
    /// definition whose result is dead may be dropped; these may not.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            Instruction::Call { .. }
                | Instruction::IndexStore { .. }
                | Instruction::FieldStore { .. }
                | Instruction::Print(..)
                | Instruction::Read(_)
                | Instruction::Return(_)
                | Instruction::Jump(_)
                | Instruction::JumpIfZero(..)
                | Instruction::JumpIfNotZero(..)
                | Instruction::Label(_)
        )
    }

    /// Pure computations: safe to hoist, fold, or share.
    pub fn is_pure_definition(&self) -> bool {
        matches!(
            self,
            Instruction::Copy(..)
                | Instruction::Unary(..)
                | Instruction::Binary(..)
                | Instruction::Cast(..)
        )
    }

    pub fn replace_operands(&mut self, mut replace: impl FnMut(&Value) -> Option<Value>) {
        let mut apply = |value: &mut Value| {
            if let Some(replacement) = replace(value) {
                *value = replacement;
            }
        };
        match self {
            Instruction::Copy(src, _)
            | Instruction::Unary(_, src, _)
            | Instruction::Cast(_, src, _)
            | Instruction::JumpIfZero(src, _)
            | Instruction::JumpIfNotZero(src, _)
            | Instruction::Print(src, _) => apply(src),
            Instruction::Binary(_, lhs, rhs, _) => {
                apply(lhs);
                apply(rhs);
            }
            Instruction::IndexLoad { index, .. } => apply(index),
            Instruction::IndexStore { index, value, .. } => {
                apply(index);
                apply(value);
            }
            Instruction::FieldStore { value, .. } => apply(value),
            Instruction::Call { args, .. } => {
                for arg in args {
                    apply(arg);
                }
            }
            Instruction::Return(Some(value)) => apply(value),
            _ => {}
        }
    }
}

#[derive(Clone, Debug)]
pub struct IrFunction {
    pub name: String,
    /// Parameter slot names, in call order.
    pub params: Vec<String>,
    pub body: Vec<Instruction>,
    /// Types of the dense temporaries, indexed by temp id.
    pub temp_types: Vec<IrType>,
    /// Declared locals (params included), in declaration order.
    pub locals: Vec<(String, IrType)>,
}

impl IrFunction {
    pub fn local_type(&self, name: &str) -> Option<&IrType> {
        self.locals
            .iter()
            .find(|(local, _)| local == name)
            .map(|(_, ty)| ty)
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func {}({}):", self.name, self.params.join(", "))?;
        if self.body.is_empty() {
            writeln!(f, "  <empty>")?;
        }
        for instruction in &self.body {
            writeln!(f, "  {}", instruction)?;
        }
        Ok(())
    }
}

/// The flattened program handed to the optimizer and both backends. The
/// entry function is always last and named `__main__`.
#[derive(Clone, Debug, Default)]
pub struct IrProgram {
    pub functions: Vec<IrFunction>,
}

impl IrProgram {
    pub const MAIN: &'static str = "__main__";

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
