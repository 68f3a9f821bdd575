use std::{collections::HashMap, sync::LazyLock};

use logos::{Lexer, Logos, Skip};

use super::token::{Token, TokenType};
use crate::common::{unescape, FileId, Span};
use crate::diagnostics::DiagnosticSink;

// The scanner runs on the `logos` derive engine; everything that needs
// lookahead or bookkeeping (line counting inside block comments, keyword
// aliasing, error recovery) happens in callbacks and in the driver loop.
//
// extras = (current line, byte offset of the current line's start).

/// Keyword table, aliases included. Both spellings of a keyword map to the
/// same token type, so downstream stages never see which one was written.
static KEYWORDS: LazyLock<HashMap<&'static str, TokenType>> = LazyLock::new(|| {
    use TokenType::*;
    [
        ("import", ImportKeyword),
        ("laao", ImportKeyword),
        ("shuru", ShuruKeyword),
        ("start_bhai", ShuruKeyword),
        ("bass", BassKeyword),
        ("bas_kar", BassKeyword),
        ("bhai", BhaiKeyword),
        ("decimal", DecimalKeyword),
        ("float", DecimalKeyword),
        ("bool", BoolKeyword),
        ("text", TextKeyword),
        ("khali", KhaliKeyword),
        ("void", KhaliKeyword),
        ("kaam", KaamKeyword),
        ("agar", AgarKeyword),
        ("warna", WarnaKeyword),
        ("tabtak", WhileKeyword),
        ("while", WhileKeyword),
        ("jabtak", ForKeyword),
        ("for", ForKeyword),
        ("kar", DoKeyword),
        ("do", DoKeyword),
        ("switch", SwitchKeyword),
        ("case", CaseKeyword),
        ("default", DefaultKeyword),
        ("tod", BreakKeyword),
        ("break", BreakKeyword),
        ("jari", ContinueKeyword),
        ("continue", ContinueKeyword),
        ("bol", BolKeyword),
        ("nikal", NikalKeyword),
        ("sach", SachKeyword),
        ("jhooth", JhoothKeyword),
        ("struct", StructKeyword),
        ("kaksha", ClassKeyword),
        ("class", ClassKeyword),
        ("bata", BataKeyword),
        ("input", BataKeyword),
    ]
    .into()
});

fn block_comment_callback(lex: &mut Lexer<LogosToken>) -> Skip {
    let slice = lex.slice();
    let newlines = slice.bytes().filter(|b| *b == b'\n').count();
    if newlines > 0 {
        lex.extras.0 += newlines;
        let last = slice.rfind('\n').unwrap();
        lex.extras.1 = lex.span().start + last + 1;
    }
    Skip
}

#[derive(Logos, Debug, PartialEq)]
#[logos(extras = (usize, usize))]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"\u{feff}")]
#[logos(skip r"//[^\n]*")]
enum LogosToken {
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/", block_comment_callback)]
    BlockComment,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Word,

    // A float needs a decimal point or an exponent; a bare run of digits
    // is an integer. The malformed pattern catches digits glued to word
    // characters (`12abc`, `1.x`) before they split into two tokens.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+", priority = 10)]
    Float,
    #[regex(r"[0-9]+", priority = 5)]
    Int,
    #[regex(r"[0-9]+\.?[0-9]*[A-Za-z_][A-Za-z0-9_]*", priority = 1)]
    MalformedNumber,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    Str,

    #[token("\n")]
    Newline,

    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,

    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,

    #[token("=")]
    Equal,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    BangEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    PipePipe,
    #[token("!")]
    Bang,
}

/// Tokenize one source buffer. Lexical errors produce a diagnostic plus a
/// synthesized `Error` token and scanning continues; the stream always ends
/// with an EOF token.
pub fn lex_source(source: &str, file: FileId, sink: &mut DiagnosticSink) -> Vec<Token> {
    let mut lex = LogosToken::lexer(source);
    let mut tokens = vec![];

    while let Some(item) = lex.next() {
        let span_range = lex.span();
        let line = lex.extras.0 + 1;
        let column = span_range.start - lex.extras.1 + 1;
        let span = Span::new(file, line, column, span_range.start, span_range.len());

        match item {
            Ok(LogosToken::Newline) => {
                tokens.push(Token::new(TokenType::Newline, None, span));
                lex.extras.0 += 1;
                lex.extras.1 = span_range.end;
            }
            Ok(LogosToken::Word) => {
                let text = lex.slice();
                match KEYWORDS.get(text) {
                    Some(keyword) => tokens.push(Token::new(*keyword, None, span)),
                    None => tokens.push(Token::new(
                        TokenType::Identifier,
                        Some(text.to_owned()),
                        span,
                    )),
                }
            }
            Ok(LogosToken::Int) => {
                tokens.push(Token::new(
                    TokenType::IntLiteral,
                    Some(lex.slice().to_owned()),
                    span,
                ));
            }
            Ok(LogosToken::Float) => {
                tokens.push(Token::new(
                    TokenType::FloatLiteral,
                    Some(lex.slice().to_owned()),
                    span,
                ));
            }
            Ok(LogosToken::MalformedNumber) => {
                sink.error(
                    "unknown_char",
                    format!("Malformed number `{}`.", lex.slice()),
                    span,
                );
                tokens.push(Token::new(TokenType::Error, None, span));
            }
            Ok(LogosToken::Str) => {
                let raw = lex.slice();
                let inner = unescape(&raw[1..raw.len() - 1]);
                tokens.push(Token::new(TokenType::StringLiteral, Some(inner), span));
            }
            Ok(token) => {
                tokens.push(Token::new(fixed_token_type(&token), None, span));
            }
            Err(_) => {
                recover_from_error(&mut lex, span, sink, &mut tokens);
            }
        }
    }

    let end_line = lex.extras.0 + 1;
    let end_column = source.len() - lex.extras.1 + 1;
    tokens.push(Token::new(
        TokenType::EOF,
        None,
        Span::new(file, end_line, end_column, source.len(), 0),
    ));
    tokens
}

/// Error tokens never match a whole construct, so we classify by the first
/// offending character: an opening quote means an unterminated string (skip
/// to end of line), an open block comment swallows the rest of the file,
/// anything else is a stray character.
fn recover_from_error(
    lex: &mut Lexer<LogosToken>,
    span: Span,
    sink: &mut DiagnosticSink,
    tokens: &mut Vec<Token>,
) {
    let slice = lex.slice();
    let remainder = lex.remainder();

    if slice.starts_with('"') {
        let skip = remainder.find('\n').unwrap_or(remainder.len());
        lex.bump(skip);
        sink.error(
            "unterminated_string",
            "Unterminated string literal.".to_owned(),
            span,
        );
    } else if slice.starts_with('/') && remainder.starts_with('*') {
        lex.bump(remainder.len());
        sink.error(
            "unterminated_comment",
            "Unterminated block comment.".to_owned(),
            span,
        );
    } else {
        sink.error(
            "unknown_char",
            format!("Unknown character `{}`.", slice.escape_default()),
            span,
        );
    }

    tokens.push(Token::new(TokenType::Error, None, span));
}

fn fixed_token_type(token: &LogosToken) -> TokenType {
    use LogosToken::*;
    match token {
        OpenParen => TokenType::OpenParen,
        CloseParen => TokenType::CloseParen,
        OpenBrace => TokenType::OpenBrace,
        CloseBrace => TokenType::CloseBrace,
        OpenBracket => TokenType::OpenBracket,
        CloseBracket => TokenType::CloseBracket,
        Semicolon => TokenType::Semicolon,
        Comma => TokenType::Comma,
        Dot => TokenType::Dot,
        Colon => TokenType::Colon,
        Equal => TokenType::Equal,
        PlusEqual => TokenType::PlusEqual,
        MinusEqual => TokenType::MinusEqual,
        StarEqual => TokenType::StarEqual,
        SlashEqual => TokenType::SlashEqual,
        PercentEqual => TokenType::PercentEqual,
        PlusPlus => TokenType::PlusPlus,
        MinusMinus => TokenType::MinusMinus,
        Plus => TokenType::Plus,
        Minus => TokenType::Minus,
        Star => TokenType::Star,
        Slash => TokenType::Slash,
        Percent => TokenType::Percent,
        EqualEqual => TokenType::EqualEqual,
        BangEqual => TokenType::BangEqual,
        Less => TokenType::Less,
        LessEqual => TokenType::LessEqual,
        Greater => TokenType::Greater,
        GreaterEqual => TokenType::GreaterEqual,
        AndAnd => TokenType::AndAnd,
        PipePipe => TokenType::PipePipe,
        Bang => TokenType::Bang,
        Word | Int | Float | MalformedNumber | Str | Newline | BlockComment => unreachable!(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex(source: &str) -> (Vec<Token>, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        (tokens, sink)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenType> {
        tokens.iter().map(|t| t.token_type).collect()
    }

    #[test]
    fn test_aliases_fold_to_canonical_kinds() {
        let (a, _) = lex("tabtak jabtak kar shuru bass laao tod jari float void kaksha bata");
        let (b, _) = lex("while for do start_bhai bas_kar import break continue decimal khali class input");
        assert_eq!(kinds(&a), kinds(&b));
    }

    #[test]
    fn test_retokenizing_is_deterministic() {
        let source = "shuru\nbhai x = 1 + 2.5\nbol(x)\nbass\n";
        let (a, _) = lex(source);
        let (b, _) = lex(source);
        assert_eq!(a, b);
    }

    #[test]
    fn test_newlines_are_tokens_with_positions() {
        let (tokens, _) = lex("bhai x\nbol(x)");
        assert_eq!(tokens[2].token_type, TokenType::Newline);
        let bol = &tokens[3];
        assert_eq!(bol.token_type, TokenType::BolKeyword);
        assert_eq!(bol.span.line, 2);
        assert_eq!(bol.span.column, 1);
    }

    #[test]
    fn test_float_needs_point_or_exponent() {
        let (tokens, _) = lex("12 3.5 7e2 1.25e-3");
        assert_eq!(
            kinds(&tokens[..4]),
            vec![
                TokenType::IntLiteral,
                TokenType::FloatLiteral,
                TokenType::FloatLiteral,
                TokenType::FloatLiteral,
            ]
        );
    }

    #[test]
    fn test_string_escapes_resolved() {
        let (tokens, sink) = lex(r#""a\tb\n\"q\"""#);
        assert!(!sink.has_errors());
        assert_eq!(tokens[0].text(), "a\tb\n\"q\"");
    }

    #[test]
    fn test_compound_operators_and_increments() {
        let (tokens, _) = lex("+= -= *= /= %= ++ -- == != <= >= && ||");
        use TokenType::*;
        assert_eq!(
            kinds(&tokens[..13]),
            vec![
                PlusEqual, MinusEqual, StarEqual, SlashEqual, PercentEqual, PlusPlus, MinusMinus,
                EqualEqual, BangEqual, LessEqual, GreaterEqual, AndAnd, PipePipe,
            ]
        );
    }

    #[test]
    fn test_comments_do_not_produce_tokens() {
        let (tokens, sink) = lex("bhai x // trailing\n/* block\nspanning */ bol");
        assert!(!sink.has_errors());
        use TokenType::*;
        assert_eq!(
            kinds(&tokens),
            vec![BhaiKeyword, Identifier, Newline, BolKeyword, EOF]
        );
        // Lines inside the block comment still count.
        assert_eq!(tokens[3].span.line, 3);
    }

    #[test]
    fn test_invalid_character_recovers() {
        let (tokens, sink) = lex("bhai @ x");
        assert!(sink.has_errors());
        use TokenType::*;
        assert_eq!(kinds(&tokens), vec![BhaiKeyword, Error, Identifier, EOF]);
    }

    #[test]
    fn test_unterminated_string_skips_to_line_end() {
        let (tokens, sink) = lex("bol(\"oops\nbhai x");
        assert_eq!(sink.sorted()[0].code, "unterminated_string");
        assert!(kinds(&tokens).contains(&TokenType::BhaiKeyword));
    }

    #[test]
    fn test_unterminated_block_comment_reports() {
        let (_, sink) = lex("bhai x /* never closed");
        assert_eq!(sink.sorted()[0].code, "unterminated_comment");
    }
}
