use std::collections::BTreeMap;
use std::fmt;

use crate::parser::ast::AggregateKind;

/// Resolved type of an expression or declaration. `bhai` and `decimal`
/// never mix implicitly; `bool` is its own type; aggregates compare by
/// name. `Error` marks a subtree that already produced a diagnostic, and
/// is silently compatible with everything so one mistake reports once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    Bool,
    Text,
    Void,
    Record(String),
    Array(Box<Type>, usize),
    Error,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_printable(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Bool | Type::Text)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(element, _) => Some(element),
            _ => None,
        }
    }

    /// Whether a `target(…)` cast from `self` is allowed: identity for
    /// every type, any direction among the scalar int/float/bool family.
    pub fn castable_to(&self, target: &Type) -> bool {
        if self.is_error() || target.is_error() || self == target {
            return true;
        }
        matches!(self, Type::Int | Type::Float | Type::Bool)
            && matches!(target, Type::Int | Type::Float | Type::Bool)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::Text => write!(f, "text"),
            Type::Void => write!(f, "void"),
            Type::Record(name) => write!(f, "{}", name),
            Type::Array(element, size) => write!(f, "array<{},{}>", element, size),
            Type::Error => write!(f, "<error>"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FunctionSig {
    pub return_type: Type,
    pub params: Vec<(String, Type)>,
}

/// One user-defined aggregate. Field order is declaration order and must
/// survive into the C backend.
#[derive(Clone, Debug)]
pub struct RecordDef {
    pub kind: AggregateKind,
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl RecordDef {
    pub fn field_type(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}

/// The public signatures surviving semantic analysis; this is all the
/// backends ever see of the symbol table.
#[derive(Clone, Debug, Default)]
pub struct Signatures {
    pub functions: BTreeMap<String, FunctionSig>,
    /// Declaration order, as the C backend emits typedefs in order.
    pub records: Vec<RecordDef>,
}

impl Signatures {
    pub fn record(&self, name: &str) -> Option<&RecordDef> {
        self.records.iter().find(|r| r.name == name)
    }
}
