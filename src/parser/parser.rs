use std::collections::HashSet;

use thiserror::Error;

use super::ast::*;
use super::precedence::{Precedence, BINARY_PRECEDENCES};
use crate::common::Span;
use crate::diagnostics::DiagnosticSink;
use crate::lexer::{
    Token,
    TokenType::{self, *},
};

/// A syntax error travelling up to the nearest recovery point. It never
/// leaves the parser; recovery converts it into a sink diagnostic.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub code: &'static str,
    pub message: String,
    pub span: Span,
}

type Result<T> = std::result::Result<T, SyntaxError>;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    index: usize,
    sink: &'a mut DiagnosticSink,
    known_types: HashSet<String>,
}

/// Token kinds a statement can legally end on. A newline is a terminator
/// only when it follows one of these; everywhere else it is line noise and
/// gets dropped before parsing (so expressions may continue after an
/// operator or a comma at end of line).
fn can_end_statement(token_type: TokenType) -> bool {
    matches!(
        token_type,
        Identifier
            | IntLiteral
            | FloatLiteral
            | StringLiteral
            | SachKeyword
            | JhoothKeyword
            | CloseParen
            | CloseBracket
            | CloseBrace
            | PlusPlus
            | MinusMinus
            | BreakKeyword
            | ContinueKeyword
            | NikalKeyword
            | ShuruKeyword
            | BassKeyword
            | Error
    )
}

/// Parse a token stream into a `Program`. All syntax errors land in the
/// sink; the returned AST covers everything that survived recovery and may
/// contain `Error` placeholder statements.
pub fn parse_tokens(tokens: Vec<Token>, sink: &mut DiagnosticSink) -> Program {
    Parser::new(tokens, sink).program()
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, sink: &'a mut DiagnosticSink) -> Self {
        let mut filtered: Vec<Token> = Vec::with_capacity(tokens.len());
        for token in tokens {
            if token.token_type == Newline {
                let keep = filtered
                    .last()
                    .is_some_and(|prev| can_end_statement(prev.token_type));
                if !keep {
                    continue;
                }
            }
            filtered.push(token);
        }

        Self {
            tokens: filtered,
            index: 0,
            sink,
            known_types: HashSet::new(),
        }
    }

    // ---- token plumbing ------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn peek_kind(&self, distance: usize) -> TokenType {
        self.tokens
            .get(self.index + distance)
            .map(|t| t.token_type)
            .unwrap_or(EOF)
    }

    fn is_at_end(&self) -> bool {
        self.current().token_type == EOF
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        if !self.is_at_end() {
            self.index += 1;
        }
        token
    }

    fn previous_kind(&self) -> TokenType {
        if self.index == 0 {
            EOF
        } else {
            self.tokens[self.index - 1].token_type
        }
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current().token_type == token_type
    }

    fn match_token(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: TokenType, code: &'static str, message: &str) -> Result<Token> {
        if self.check(token_type) {
            Ok(self.advance())
        } else {
            Err(self.error_here(code, message))
        }
    }

    /// Structural tokens (`{`, `:`, the `tabtak` of a do-while…) may sit on
    /// the next line; terminator newlines before them are insignificant.
    fn expect_past_newlines(
        &mut self,
        token_type: TokenType,
        code: &'static str,
        message: &str,
    ) -> Result<Token> {
        self.skip_newlines();
        self.expect(token_type, code, message)
    }

    fn skip_newlines(&mut self) {
        while self.check(Newline) {
            self.advance();
        }
    }

    fn error_here(&self, code: &'static str, message: &str) -> SyntaxError {
        SyntaxError {
            code,
            message: message.to_owned(),
            span: self.current().span,
        }
    }

    fn report(&mut self, err: SyntaxError) {
        self.sink.error(err.code, err.message, err.span);
    }

    // ---- recovery ------------------------------------------------------

    /// Panic-mode synchronization: drop tokens until a statement boundary
    /// (just-passed terminator) or a statement-starting keyword. `}` only
    /// counts when we are inside a block, so an unmatched brace does not
    /// strand the outer loop.
    fn synchronize(&mut self, in_block: bool) {
        while !self.is_at_end() {
            if matches!(self.previous_kind(), Semicolon | Newline) {
                return;
            }
            let current = self.current().token_type;
            if current == CloseBrace {
                if in_block {
                    return;
                }
            } else if current.is_sync_point() {
                return;
            }
            self.advance();
        }
    }

    fn synchronize_top_level(&mut self) {
        while !self.is_at_end()
            && !matches!(
                self.current().token_type,
                ImportKeyword | StructKeyword | ClassKeyword | KaamKeyword | ShuruKeyword
            )
        {
            self.advance();
        }
    }

    // ---- program structure ---------------------------------------------

    fn program(mut self) -> Program {
        let mut program = Program::default();

        loop {
            self.skip_newlines();
            if self.check(ShuruKeyword) || self.is_at_end() {
                break;
            }
            let checkpoint = self.index;
            let result = if self.match_token(ImportKeyword) {
                self.import_decl().map(|decl| program.imports.push(decl))
            } else if self.check(StructKeyword) || self.check(ClassKeyword) {
                self.type_decl().map(|decl| program.type_decls.push(decl))
            } else if self.check(KaamKeyword) {
                self.function_decl().map(|f| program.functions.push(f))
            } else {
                Err(self.error_here(
                    "unexpected_token",
                    "Only `import`, `struct`, `kaksha`, or `kaam` declarations allowed before `shuru`.",
                ))
            };
            if let Err(err) = result {
                self.report(err);
                self.synchronize_top_level();
            }
            if self.index == checkpoint && !self.is_at_end() {
                self.advance();
            }
        }

        if !self.match_token(ShuruKeyword) {
            let err = self.error_here("expected_start", "Program should start with `shuru`.");
            self.report(err);
            while !self.is_at_end() && !self.check(ShuruKeyword) {
                self.advance();
            }
            self.match_token(ShuruKeyword);
        }

        loop {
            self.skip_newlines();
            if self.check(BassKeyword) || self.is_at_end() {
                break;
            }
            let checkpoint = self.index;
            match self.statement() {
                Ok(stmt) => program.main.push(stmt),
                Err(err) => {
                    let span = err.span;
                    self.report(err);
                    self.synchronize(false);
                    program.main.push(Stmt::new(StmtKind::Error, span));
                }
            }
            if self.index == checkpoint && !self.is_at_end() {
                self.advance();
            }
        }

        if !self.match_token(BassKeyword) {
            let err = self.error_here("expected_end", "Program should end with `bass`.");
            self.report(err);
        }

        self.skip_newlines();
        if !self.is_at_end() {
            let err = self.error_here("unexpected_token", "Unexpected tokens found after `bass`.");
            self.report(err);
        }

        program
    }

    fn import_decl(&mut self) -> Result<ImportDecl> {
        let path_token = self.expect(
            StringLiteral,
            "invalid_statement",
            "Expected import path string after `import`.",
        )?;
        self.end_statement();
        Ok(ImportDecl {
            path: path_token.text().to_owned(),
            span: path_token.span,
        })
    }

    fn type_decl(&mut self) -> Result<TypeDecl> {
        let kind_token = self.advance();
        let kind = if kind_token.token_type == StructKeyword {
            AggregateKind::Struct
        } else {
            AggregateKind::Class
        };
        let name_token = self.expect(
            Identifier,
            "invalid_statement",
            &format!("Expected name after `{}`.", kind),
        )?;
        self.expect_past_newlines(
            OpenBrace,
            "missing_lbrace",
            &format!("Expected `{{` in {} declaration.", kind),
        )?;

        let mut fields = vec![];
        loop {
            self.skip_newlines();
            if self.match_token(CloseBrace) {
                break;
            }
            if self.is_at_end() {
                return Err(self.error_here(
                    "missing_rbrace",
                    "Expected `}` to close type declaration.",
                ));
            }
            let (type_name, _) = self.type_spec(false)?;
            let field_token = self.expect(
                Identifier,
                "invalid_statement",
                "Expected field name in type declaration.",
            )?;
            let array_size = self.optional_array_size()?;
            self.match_token(Semicolon);
            fields.push(FieldDecl {
                type_name,
                name: field_token.text().to_owned(),
                array_size,
                span: field_token.span,
            });
        }
        self.match_token(Semicolon);

        let name = name_token.text().to_owned();
        self.known_types.insert(name.clone());
        Ok(TypeDecl {
            kind,
            name,
            fields,
            span: kind_token.span,
        })
    }

    fn function_decl(&mut self) -> Result<FunctionDecl> {
        let fn_token = self.expect(
            KaamKeyword,
            "invalid_function",
            "Expected `kaam` at function declaration.",
        )?;

        // Legacy form: `kaam name(a, b)` — untyped, everything is bhai.
        let (return_type, name_token) = if self.check(Identifier) && self.peek_kind(1) == OpenParen
        {
            (TypeName::Int, self.advance())
        } else {
            let (return_type, _) = self.type_spec(true)?;
            let name_token =
                self.expect(Identifier, "invalid_function", "Expected function name.")?;
            (return_type, name_token)
        };

        self.expect(
            OpenParen,
            "missing_lparen",
            "Expected `(` after function name.",
        )?;
        let mut params = vec![];
        if !self.check(CloseParen) {
            params.push(self.param()?);
            while self.match_token(Comma) {
                params.push(self.param()?);
            }
        }
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after parameters.",
        )?;
        let body = self.block()?;

        Ok(FunctionDecl {
            name: name_token.text().to_owned(),
            return_type,
            params,
            body,
            span: fn_token.span,
        })
    }

    fn param(&mut self) -> Result<Param> {
        if self.check(Identifier) && matches!(self.peek_kind(1), Comma | CloseParen) {
            let name_token = self.advance();
            return Ok(Param {
                type_name: TypeName::Int,
                name: name_token.text().to_owned(),
                span: name_token.span,
            });
        }
        let (type_name, _) = self.type_spec(false)?;
        let name_token = self.expect(Identifier, "invalid_params", "Expected parameter name.")?;
        Ok(Param {
            type_name,
            name: name_token.text().to_owned(),
            span: name_token.span,
        })
    }

    // ---- statements ----------------------------------------------------

    /// A `;`, a terminator newline, or a closing construct ends the
    /// statement. The jabtak-header separators never go through here.
    /// A missing terminator is reported but does not throw away the
    /// statement that just parsed.
    fn end_statement(&mut self) {
        if self.match_token(Semicolon) || self.match_token(Newline) {
            return;
        }
        if matches!(
            self.current().token_type,
            CloseBrace | BassKeyword | EOF | CaseKeyword | DefaultKeyword
        ) {
            return;
        }
        let err = self.error_here(
            "missing_terminator",
            "Expected `;` or end of line after statement.",
        );
        self.report(err);
    }

    fn statement(&mut self) -> Result<Stmt> {
        let span = self.current().span;
        if self.check(OpenBrace) {
            let block = self.block()?;
            return Ok(Stmt::new(StmtKind::Block(block), span));
        }
        if self.is_var_decl_start() {
            let stmt = self.var_decl()?;
            self.end_statement();
            return Ok(stmt);
        }
        if self.match_token(AgarKeyword) {
            return self.if_statement(span);
        }
        if self.match_token(WhileKeyword) {
            return self.while_statement(span);
        }
        if self.match_token(ForKeyword) {
            return self.for_statement(span);
        }
        if self.match_token(DoKeyword) {
            return self.do_while_statement(span);
        }
        if self.match_token(SwitchKeyword) {
            return self.switch_statement(span);
        }
        if self.match_token(BreakKeyword) {
            self.end_statement();
            return Ok(Stmt::new(StmtKind::Break, span));
        }
        if self.match_token(ContinueKeyword) {
            self.end_statement();
            return Ok(Stmt::new(StmtKind::Continue, span));
        }
        if self.match_token(BolKeyword) {
            self.expect(OpenParen, "missing_lparen", "Expected `(` after `bol`.")?;
            let value = self.expression(Precedence::Minimum)?;
            self.expect(
                CloseParen,
                "missing_rparen",
                "Expected `)` after print expression.",
            )?;
            self.end_statement();
            return Ok(Stmt::new(StmtKind::Print(value), span));
        }
        if self.match_token(NikalKeyword) {
            let value = if self.at_return_boundary() {
                None
            } else {
                Some(self.expression(Precedence::Minimum)?)
            };
            self.end_statement();
            return Ok(Stmt::new(StmtKind::Return(value), span));
        }
        self.assign_or_expr_statement(true)
    }

    fn var_decl(&mut self) -> Result<Stmt> {
        let (type_name, type_span) = self.type_spec(false)?;
        let name_token = self.expect(
            Identifier,
            "invalid_statement",
            "Expected variable name in declaration.",
        )?;
        let array_size = self.optional_array_size()?;
        let init = if self.match_token(Equal) {
            Some(self.expression(Precedence::Minimum)?)
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::VarDecl {
                type_name,
                name: name_token.text().to_owned(),
                array_size,
                init,
            },
            type_span,
        ))
    }

    fn optional_array_size(&mut self) -> Result<Option<usize>> {
        if !self.match_token(OpenBracket) {
            return Ok(None);
        }
        let size_token = self.expect(
            IntLiteral,
            "invalid_statement",
            "Expected numeric array size.",
        )?;
        let size: usize = size_token
            .text()
            .parse()
            .map_err(|_| self.error_here("invalid_statement", "Array size out of range."))?;
        self.expect(
            CloseBracket,
            "unexpected_token",
            "Expected `]` after array size.",
        )?;
        Ok(Some(size))
    }

    fn if_statement(&mut self, span: Span) -> Result<Stmt> {
        self.expect(OpenParen, "missing_lparen", "Expected `(` after `agar`.")?;
        let condition = self.expression(Precedence::Minimum)?;
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after if condition.",
        )?;
        let then_block = self.block()?;
        self.skip_newlines();
        let else_block = if self.match_token(WarnaKeyword) {
            Some(self.block()?)
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_block,
                else_block,
            },
            span,
        ))
    }

    fn while_statement(&mut self, span: Span) -> Result<Stmt> {
        self.expect(OpenParen, "missing_lparen", "Expected `(` after `tabtak`.")?;
        let condition = self.expression(Precedence::Minimum)?;
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after while condition.",
        )?;
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::While { condition, body }, span))
    }

    fn for_statement(&mut self, span: Span) -> Result<Stmt> {
        self.expect(OpenParen, "missing_lparen", "Expected `(` after `jabtak`.")?;
        let init = if self.check(Semicolon) {
            None
        } else if self.is_var_decl_start() {
            Some(Box::new(self.var_decl()?))
        } else {
            Some(Box::new(self.assign_or_expr_statement(false)?))
        };
        self.expect_past_newlines(
            Semicolon,
            "missing_semicolon",
            "Expected `;` after jabtak-init.",
        )?;
        let condition = if self.check(Semicolon) {
            None
        } else {
            Some(self.expression(Precedence::Minimum)?)
        };
        self.expect_past_newlines(
            Semicolon,
            "missing_semicolon",
            "Expected `;` after jabtak-condition.",
        )?;
        let post = if self.check(CloseParen) {
            None
        } else {
            Some(Box::new(self.assign_or_expr_statement(false)?))
        };
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after jabtak-clause.",
        )?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::For {
                init,
                condition,
                post,
                body,
            },
            span,
        ))
    }

    fn do_while_statement(&mut self, span: Span) -> Result<Stmt> {
        let body = self.block()?;
        self.expect_past_newlines(
            WhileKeyword,
            "invalid_statement",
            "Expected `tabtak` after `kar` block.",
        )?;
        self.expect(OpenParen, "missing_lparen", "Expected `(` after `tabtak`.")?;
        let condition = self.expression(Precedence::Minimum)?;
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after do-while condition.",
        )?;
        self.end_statement();
        Ok(Stmt::new(StmtKind::DoWhile { body, condition }, span))
    }

    fn switch_statement(&mut self, span: Span) -> Result<Stmt> {
        self.expect(OpenParen, "missing_lparen", "Expected `(` after `switch`.")?;
        let discriminant = self.expression(Precedence::Minimum)?;
        self.expect(
            CloseParen,
            "missing_rparen",
            "Expected `)` after switch condition.",
        )?;
        self.expect_past_newlines(
            OpenBrace,
            "missing_lbrace",
            "Expected `{` after switch condition.",
        )?;

        let mut cases: Vec<CaseArm> = vec![];
        let mut default_arm: Option<Block> = None;
        loop {
            self.skip_newlines();
            if self.match_token(CloseBrace) {
                break;
            }
            if self.is_at_end() {
                return Err(
                    self.error_here("missing_rbrace", "Expected `}` to close switch block.")
                );
            }

            if self.check(CaseKeyword) {
                let case_token = self.advance();
                let value = self.expression(Precedence::Minimum)?;
                self.expect_past_newlines(
                    Colon,
                    "unexpected_token",
                    "Expected `:` after case label.",
                )?;
                let body = self.case_body(case_token.span)?;
                cases.push(CaseArm {
                    value,
                    body,
                    span: case_token.span,
                });
                continue;
            }

            if self.check(DefaultKeyword) {
                let default_token = self.advance();
                if default_arm.is_some() {
                    return Err(SyntaxError {
                        code: "duplicate_default",
                        message: "Only one `default` block is allowed in switch.".to_owned(),
                        span: default_token.span,
                    });
                }
                self.expect_past_newlines(
                    Colon,
                    "unexpected_token",
                    "Expected `:` after `default`.",
                )?;
                default_arm = Some(self.case_body(default_token.span)?);
                continue;
            }

            return Err(self.error_here(
                "unexpected_token",
                "Expected `case` or `default` inside switch block.",
            ));
        }

        Ok(Stmt::new(
            StmtKind::Switch {
                discriminant,
                cases,
                default_arm,
            },
            span,
        ))
    }

    fn case_body(&mut self, span: Span) -> Result<Block> {
        let mut statements = vec![];
        loop {
            self.skip_newlines();
            if matches!(
                self.current().token_type,
                CaseKeyword | DefaultKeyword | CloseBrace | EOF
            ) {
                break;
            }
            statements.push(self.statement()?);
        }
        Ok(Block { statements, span })
    }

    fn block(&mut self) -> Result<Block> {
        let lbrace = self.expect_past_newlines(
            OpenBrace,
            "missing_lbrace",
            "Expected `{` to start block.",
        )?;
        let mut statements = vec![];
        loop {
            self.skip_newlines();
            if self.match_token(CloseBrace) {
                break;
            }
            if self.is_at_end() {
                return Err(self.error_here("missing_rbrace", "Expected `}` before end of file."));
            }
            let checkpoint = self.index;
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    let span = err.span;
                    self.report(err);
                    self.synchronize(true);
                    statements.push(Stmt::new(StmtKind::Error, span));
                }
            }
            if self.index == checkpoint && !self.is_at_end() {
                self.advance();
            }
        }
        Ok(Block {
            statements,
            span: lbrace.span,
        })
    }

    /// Assignment (with compound-assignment sugar expanded on the spot) or
    /// a bare expression statement. Increment/decrement arrive here already
    /// folded into `Increment` expressions by the unary/postfix parsers.
    fn assign_or_expr_statement(&mut self, consume_terminator: bool) -> Result<Stmt> {
        let expr = self.expression(Precedence::Minimum)?;
        let span = expr.span;

        let op_kind = self.current().token_type;
        let stmt = if op_kind == Equal || op_kind.is_compound_assign() {
            let op_token = self.advance();
            if !expr.is_lvalue() {
                return Err(SyntaxError {
                    code: "invalid_lvalue",
                    message: "Left side of assignment must be variable/field/index.".to_owned(),
                    span: op_token.span,
                });
            }
            let rhs = self.expression(Precedence::Minimum)?;
            let value = if op_kind == Equal {
                rhs
            } else {
                // `x += e` is sugar for `x = x + e`.
                let binop = match op_kind {
                    PlusEqual => BinaryOp::Add,
                    MinusEqual => BinaryOp::Subtract,
                    StarEqual => BinaryOp::Multiply,
                    SlashEqual => BinaryOp::Divide,
                    PercentEqual => BinaryOp::Remainder,
                    _ => unreachable!(),
                };
                Expr::new(
                    ExprKind::Binary {
                        op: binop,
                        left: Box::new(expr.clone()),
                        right: Box::new(rhs),
                    },
                    op_token.span,
                )
            };
            Stmt::new(
                StmtKind::Assign {
                    target: expr,
                    value,
                },
                span,
            )
        } else {
            Stmt::new(StmtKind::Expr(expr), span)
        };

        if consume_terminator {
            self.end_statement();
        }
        Ok(stmt)
    }

    // ---- expressions ---------------------------------------------------

    fn expression(&mut self, min_prec: Precedence) -> Result<Expr> {
        let mut left = self.unary()?;

        while let Some(&precedence) = BINARY_PRECEDENCES.get(&self.current().token_type) {
            if precedence < min_prec {
                break;
            }
            let op_token = self.advance();
            let right = self.expression(precedence.increment())?;
            let kind = match op_token.token_type {
                AndAnd => ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                PipePipe => ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                t => ExprKind::Binary {
                    op: binary_op_for(t),
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
            left = Expr::new(kind, op_token.span);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let span = self.current().span;
        match self.current().token_type {
            Bang => {
                self.advance();
                let operand = self.unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            Minus => {
                self.advance();
                let operand = self.unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            PlusPlus | MinusMinus => {
                let op_token = self.advance();
                let target = self.unary()?;
                self.increment_expr(op_token, target, Fixity::Pre)
            }
            t if t.is_primitive_type() && self.peek_kind(1) == OpenParen => {
                let (target, type_span) = self.type_spec(false)?;
                self.expect(OpenParen, "missing_lparen", "Expected `(` after cast type.")?;
                let operand = self.expression(Precedence::Minimum)?;
                self.expect(
                    CloseParen,
                    "missing_rparen",
                    "Expected `)` after cast expression.",
                )?;
                Ok(Expr::new(
                    ExprKind::Cast {
                        target,
                        operand: Box::new(operand),
                    },
                    type_span,
                ))
            }
            _ => self.postfix(),
        }
    }

    fn increment_expr(&mut self, op_token: Token, target: Expr, fixity: Fixity) -> Result<Expr> {
        if !target.is_lvalue() {
            return Err(SyntaxError {
                code: "invalid_lvalue",
                message: "Increment/decrement target must be variable/field/index.".to_owned(),
                span: op_token.span,
            });
        }
        let op = if op_token.token_type == PlusPlus {
            IncDecOp::Increment
        } else {
            IncDecOp::Decrement
        };
        Ok(Expr::new(
            ExprKind::Increment {
                op,
                fixity,
                target: Box::new(target),
            },
            op_token.span,
        ))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.current().token_type {
                OpenParen => {
                    let paren = self.advance();
                    let mut args = vec![];
                    if !self.check(CloseParen) {
                        args.push(self.expression(Precedence::Minimum)?);
                        while self.match_token(Comma) {
                            args.push(self.expression(Precedence::Minimum)?);
                        }
                    }
                    self.expect(
                        CloseParen,
                        "missing_rparen",
                        "Expected `)` after call arguments.",
                    )?;
                    let ExprKind::Name(callee) = expr.kind else {
                        return Err(SyntaxError {
                            code: "invalid_expression",
                            message: "Only function identifiers can be called.".to_owned(),
                            span: paren.span,
                        });
                    };
                    expr = Expr::new(ExprKind::Call { callee, args }, expr.span);
                }
                OpenBracket => {
                    self.advance();
                    let index = self.expression(Precedence::Minimum)?;
                    let bracket = self.expect(
                        CloseBracket,
                        "unexpected_token",
                        "Expected `]` after index.",
                    )?;
                    expr = Expr::new(
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        bracket.span,
                    );
                }
                Dot => {
                    self.advance();
                    let member = self.expect(
                        Identifier,
                        "invalid_expression",
                        "Expected member name after `.`.",
                    )?;
                    expr = Expr::new(
                        ExprKind::Field {
                            base: Box::new(expr),
                            name: member.text().to_owned(),
                        },
                        member.span,
                    );
                }
                PlusPlus | MinusMinus => {
                    let op_token = self.advance();
                    expr = self.increment_expr(op_token, expr, Fixity::Post)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        match token.token_type {
            IntLiteral => {
                self.advance();
                let value: i64 = token.text().parse().map_err(|_| SyntaxError {
                    code: "invalid_expression",
                    message: format!("Integer constant `{}` is too large.", token.text()),
                    span: token.span,
                })?;
                Ok(Expr::new(ExprKind::IntLit(value), token.span))
            }
            FloatLiteral => {
                self.advance();
                let value: f64 = token.text().parse().map_err(|_| SyntaxError {
                    code: "invalid_expression",
                    message: format!("Malformed float constant `{}`.", token.text()),
                    span: token.span,
                })?;
                Ok(Expr::new(ExprKind::FloatLit(value), token.span))
            }
            StringLiteral => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::StrLit(token.text().to_owned()),
                    token.span,
                ))
            }
            SachKeyword => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(true), token.span))
            }
            JhoothKeyword => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(false), token.span))
            }
            Identifier => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Name(token.text().to_owned()),
                    token.span,
                ))
            }
            BataKeyword => {
                self.advance();
                self.expect(OpenParen, "missing_lparen", "Expected `(` after `bata`.")?;
                self.expect(
                    CloseParen,
                    "missing_rparen",
                    "`bata` takes no arguments; expected `)`.",
                )?;
                Ok(Expr::new(ExprKind::Input, token.span))
            }
            OpenParen => {
                self.advance();
                let inner = self.expression(Precedence::Minimum)?;
                self.expect(
                    CloseParen,
                    "missing_rparen",
                    "Expected `)` after expression.",
                )?;
                Ok(inner)
            }
            TokenType::Error => {
                // The lexer already reported this one; absorb it quietly so
                // one bad character does not cascade.
                self.advance();
                Ok(Expr::new(ExprKind::Error, token.span))
            }
            _ => Err(SyntaxError {
                code: "invalid_expression",
                message: format!("Unexpected token in expression ({:?}).", token.token_type),
                span: token.span,
            }),
        }
    }

    // ---- type references ----------------------------------------------

    fn type_spec(&mut self, allow_void: bool) -> Result<(TypeName, Span)> {
        let token = self.current().clone();
        match token.token_type {
            BhaiKeyword => {
                self.advance();
                Ok((TypeName::Int, token.span))
            }
            DecimalKeyword => {
                self.advance();
                Ok((TypeName::Float, token.span))
            }
            BoolKeyword => {
                self.advance();
                Ok((TypeName::Bool, token.span))
            }
            TextKeyword => {
                self.advance();
                Ok((TypeName::Text, token.span))
            }
            KhaliKeyword => {
                self.advance();
                if !allow_void {
                    return Err(SyntaxError {
                        code: "type_mismatch",
                        message: "`khali` type not allowed here.".to_owned(),
                        span: token.span,
                    });
                }
                Ok((TypeName::Void, token.span))
            }
            StructKeyword | ClassKeyword => {
                self.advance();
                let name = self.expect(
                    Identifier,
                    "invalid_statement",
                    "Expected aggregate type name.",
                )?;
                Ok((TypeName::Named(name.text().to_owned()), token.span))
            }
            Identifier if self.known_types.contains(token.text()) => {
                self.advance();
                Ok((TypeName::Named(token.text().to_owned()), token.span))
            }
            _ => Err(SyntaxError {
                code: "invalid_statement",
                message: "Expected a type name.".to_owned(),
                span: token.span,
            }),
        }
    }

    fn is_var_decl_start(&self) -> bool {
        let current = self.current();
        if current.token_type.is_primitive_type() {
            return self.peek_kind(1) == Identifier;
        }
        if matches!(current.token_type, StructKeyword | ClassKeyword) {
            return self.peek_kind(1) == Identifier && self.peek_kind(2) == Identifier;
        }
        current.token_type == Identifier
            && self.known_types.contains(current.text())
            && self.peek_kind(1) == Identifier
    }

    fn at_return_boundary(&self) -> bool {
        if matches!(
            self.current().token_type,
            Semicolon
                | Newline
                | CloseBrace
                | BassKeyword
                | EOF
                | AgarKeyword
                | WarnaKeyword
                | WhileKeyword
                | ForKeyword
                | DoKeyword
                | SwitchKeyword
                | CaseKeyword
                | DefaultKeyword
                | BreakKeyword
                | ContinueKeyword
                | BolKeyword
                | NikalKeyword
        ) {
            return true;
        }
        self.is_var_decl_start()
    }
}

fn binary_op_for(token_type: TokenType) -> BinaryOp {
    match token_type {
        Plus => BinaryOp::Add,
        Minus => BinaryOp::Subtract,
        Star => BinaryOp::Multiply,
        Slash => BinaryOp::Divide,
        Percent => BinaryOp::Remainder,
        EqualEqual => BinaryOp::Equal,
        BangEqual => BinaryOp::NotEqual,
        Less => BinaryOp::Less,
        LessEqual => BinaryOp::LessEqual,
        Greater => BinaryOp::Greater,
        GreaterEqual => BinaryOp::GreaterEqual,
        t => unreachable!("not a binary operator: {:?}", t),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex_source;

    fn parse(source: &str) -> (Program, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let program = parse_tokens(tokens, &mut sink);
        (program, sink)
    }

    fn parse_clean(source: &str) -> Program {
        let (program, sink) = parse(source);
        assert!(
            !sink.has_errors(),
            "unexpected errors: {}",
            sink.render(|_| ("test.bhai".into(), None))
        );
        program
    }

    #[test]
    fn test_minimal_program() {
        let program = parse_clean("shuru\nbhai x = 2 + 3 * 4\nbol(x)\nnikal 0\nbass");
        assert_eq!(program.main.len(), 3);
        let StmtKind::VarDecl { init: Some(init), .. } = &program.main[0].kind else {
            panic!("expected var decl");
        };
        // 2 + (3 * 4): multiplication binds tighter.
        let ExprKind::Binary { op, right, .. } = &init.kind else {
            panic!("expected binary init");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_semicolons_and_newlines_both_terminate() {
        let a = parse_clean("shuru\nbhai x = 1; bol(x);\nnikal 0;\nbass");
        let b = parse_clean("shuru\nbhai x = 1\nbol(x)\nnikal 0\nbass");
        assert_eq!(a.main.len(), b.main.len());
    }

    #[test]
    fn test_missing_terminator_between_statements_is_reported() {
        let (_, sink) = parse("shuru\nbhai a = 1 bol(a)\nnikal 0\nbass");
        assert!(sink.has_errors());
    }

    #[test]
    fn test_expression_continues_after_operator_newline() {
        let program = parse_clean("shuru\nbhai x = 1 +\n2\nbol(x)\nbass");
        let StmtKind::VarDecl { init: Some(init), .. } = &program.main[0].kind else {
            panic!("expected var decl");
        };
        assert!(matches!(
            init.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_compound_assignment_expands() {
        let program = parse_clean("shuru\nbhai x = 1\nx += 2\nbass");
        let StmtKind::Assign { value, .. } = &program.main[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_pre_and_post_increment_positions() {
        let program = parse_clean("shuru\nbhai x = 1\n++x\nx--\nbhai y = x++ + 1\nbass");
        let StmtKind::Expr(pre) = &program.main[1].kind else {
            panic!("expected expr stmt");
        };
        assert!(matches!(
            pre.kind,
            ExprKind::Increment {
                fixity: Fixity::Pre,
                op: IncDecOp::Increment,
                ..
            }
        ));
        let StmtKind::Expr(post) = &program.main[2].kind else {
            panic!("expected expr stmt");
        };
        assert!(matches!(
            post.kind,
            ExprKind::Increment {
                fixity: Fixity::Post,
                op: IncDecOp::Decrement,
                ..
            }
        ));
    }

    #[test]
    fn test_for_header_requires_literal_semicolons() {
        let (_, sink) = parse("shuru\njabtak (bhai i = 0\ni < 5; ++i) { bol(i) }\nbass");
        assert!(sink.has_errors());
        let clean = parse_clean("shuru\njabtak (bhai i = 0; i < 5; ++i) { bol(i) }\nbass");
        assert!(matches!(clean.main[0].kind, StmtKind::For { .. }));
    }

    #[test]
    fn test_logical_operators_get_dedicated_nodes() {
        let program = parse_clean("shuru\nbool ok = sach && jhooth || sach\nbass");
        let StmtKind::VarDecl { init: Some(init), .. } = &program.main[0].kind else {
            panic!("expected var decl");
        };
        let ExprKind::Logical { op, left, .. } = &init.kind else {
            panic!("expected logical node");
        };
        assert_eq!(*op, LogicalOp::Or);
        assert!(matches!(
            left.kind,
            ExprKind::Logical {
                op: LogicalOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_switch_with_cases_and_default() {
        let program = parse_clean(
            "shuru\nbhai x = 2\nswitch (x) {\ncase 1:\nbol(1)\ncase 2:\nbol(2)\ndefault:\nbol(0)\n}\nbass",
        );
        let StmtKind::Switch { cases, default_arm, .. } = &program.main[1].kind else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 2);
        assert!(default_arm.is_some());
    }

    #[test]
    fn test_duplicate_default_rejected() {
        let (_, sink) =
            parse("shuru\nswitch (1) {\ndefault:\nbol(0)\ndefault:\nbol(1)\n}\nbass");
        assert!(sink.sorted().iter().any(|d| d.code == "duplicate_default"));
    }

    #[test]
    fn test_recovery_keeps_rest_of_block() {
        // The bad declaration reports; the print still parses.
        let (program, sink) = parse("shuru bhai a = bol(a) nikal 0 bass");
        assert!(sink.has_errors());
        assert!(program
            .main
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Print(_))));
        assert!(program
            .main
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Error)));
    }

    #[test]
    fn test_multiple_errors_collected_in_one_pass() {
        let (_, sink) = parse("shuru\nbhai x = 10\nbhai y = ;\nagar (x > ) {\nbol(\"oops\")\n}\nbass");
        assert!(sink.error_count() >= 2);
    }

    #[test]
    fn test_struct_and_function_declarations() {
        let program = parse_clean(
            "struct User {\nbhai age\ntext name\n}\nkaam bhai add(bhai a, bhai b) {\nnikal a + b\n}\nkaam twice(x) {\nnikal x * 2\n}\nshuru\nstruct User u\nu.age = 21\nbol(add(u.age, 2))\nbass",
        );
        assert_eq!(program.type_decls.len(), 1);
        assert_eq!(program.functions.len(), 2);
        assert_eq!(program.functions[1].params[0].type_name, TypeName::Int);
    }

    #[test]
    fn test_malformed_inputs_always_terminate() {
        // Property: parsing any input terminates with at least one
        // diagnostic and never panics.
        let nasty = [
            "",
            "bass",
            "shuru",
            "shuru )))) bass",
            "shuru { { { bass",
            "shuru bhai = = 3 bass",
            "shuru switch (1) { case : } bass",
            "kaam { shuru bass",
            "shuru jabtak (;;;;) {} bass",
            "shuru x ++ -- bass",
        ];
        for source in nasty {
            let (_, sink) = parse(source);
            assert!(!sink.is_empty(), "no diagnostics for {:?}", source);
        }
    }

    #[test]
    fn test_cast_parses_in_expression() {
        let program = parse_clean("shuru\ndecimal d = decimal(3) / 2.0\nbol(d)\nbass");
        let StmtKind::VarDecl { init: Some(init), .. } = &program.main[0].kind else {
            panic!("expected var decl");
        };
        let ExprKind::Binary { left, .. } = &init.kind else {
            panic!("expected division");
        };
        assert!(matches!(left.kind, ExprKind::Cast { .. }));
    }
}
