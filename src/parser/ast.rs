use derive_more::Display;

use crate::common::Span;
use crate::semantic::types::Type;

/// A parsed compilation unit: leading imports, aggregate and function
/// declarations, then the `shuru … bass` main block.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub imports: Vec<ImportDecl>,
    pub type_decls: Vec<TypeDecl>,
    pub functions: Vec<FunctionDecl>,
    pub main: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct ImportDecl {
    pub path: String,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AggregateKind {
    #[display("struct")]
    Struct,
    #[display("kaksha")]
    Class,
}

#[derive(Clone, Debug)]
pub struct TypeDecl {
    pub kind: AggregateKind,
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub type_name: TypeName,
    pub name: String,
    pub array_size: Option<usize>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub type_name: TypeName,
    pub name: String,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: TypeName,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

/// A type as written in source. Resolution against declared aggregates
/// happens in the semantic pass.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum TypeName {
    #[display("bhai")]
    Int,
    #[display("decimal")]
    Float,
    #[display("bool")]
    Bool,
    #[display("text")]
    Text,
    #[display("khali")]
    Void,
    #[display("{_0}")]
    Named(String),
}

#[derive(Clone, Debug)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    VarDecl {
        type_name: TypeName,
        name: String,
        array_size: Option<usize>,
        init: Option<Expr>,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        condition: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    DoWhile {
        body: Block,
        condition: Expr,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<CaseArm>,
        default_arm: Option<Block>,
    },
    Break,
    Continue,
    Print(Expr),
    Return(Option<Expr>),
    Expr(Expr),
    Block(Block),
    /// Placeholder left behind by parser recovery. Later passes skip it.
    Error,
}

#[derive(Clone, Debug)]
pub struct CaseArm {
    pub value: Expr,
    pub body: Block,
    pub span: Span,
}

/// Expressions carry their resolved type once the semantic pass has run.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Option<Type>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }

    /// The type the semantic pass resolved. Error placeholders and nodes
    /// inside failed subtrees answer `Type::Error`.
    pub fn resolved_type(&self) -> Type {
        self.ty.clone().unwrap_or(Type::Error)
    }

    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Name(_) | ExprKind::Index { .. } | ExprKind::Field { .. }
        )
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    StrLit(String),
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Short-circuit `&&` / `||`; kept apart from `Binary` so the IR
    /// builder always lowers them to branches.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast {
        target: TypeName,
        operand: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        base: Box<Expr>,
        name: String,
    },
    /// `bata()` — read one value from stdin.
    Input,
    Increment {
        op: IncDecOp,
        fixity: Fixity,
        target: Box<Expr>,
    },
    /// Placeholder left behind by parser recovery.
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[display("-")]
    Negate,
    #[display("!")]
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
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
    pub fn is_arithmetic(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Add | Subtract | Multiply | Divide | Remainder)
    }

    pub fn is_relational(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Less | LessEqual | Greater | GreaterEqual)
    }

    pub fn is_equality(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Equal | NotEqual)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum LogicalOp {
    #[display("&&")]
    And,
    #[display("||")]
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum IncDecOp {
    #[display("++")]
    Increment,
    #[display("--")]
    Decrement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fixity {
    Pre,
    Post,
}
