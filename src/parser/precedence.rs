use std::{collections::HashMap, sync::LazyLock};

use crate::lexer::TokenType::{self, *};

/// Binding strength, tight to loose: unary > multiplicative > additive >
/// relational > equality > logical-and > logical-or. Assignment is not an
/// expression in this language, so it has no row here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Minimum,
    Or,
    And,
    Equality,
    Relational,
    Additive,
    Multiplicative,
    Maximum,
}

impl Precedence {
    pub fn increment(self) -> Self {
        use Precedence::*;
        match self {
            Minimum => Or,
            Or => And,
            And => Equality,
            Equality => Relational,
            Relational => Additive,
            Additive => Multiplicative,
            Multiplicative => Maximum,
            Maximum => Maximum,
        }
    }
}

pub static BINARY_PRECEDENCES: LazyLock<HashMap<TokenType, Precedence>> = LazyLock::new(|| {
    [
        (PipePipe, Precedence::Or),
        (AndAnd, Precedence::And),
        (EqualEqual, Precedence::Equality),
        (BangEqual, Precedence::Equality),
        (Less, Precedence::Relational),
        (LessEqual, Precedence::Relational),
        (Greater, Precedence::Relational),
        (GreaterEqual, Precedence::Relational),
        (Plus, Precedence::Additive),
        (Minus, Precedence::Additive),
        (Star, Precedence::Multiplicative),
        (Slash, Precedence::Multiplicative),
        (Percent, Precedence::Multiplicative),
    ]
    .into()
});
