use std::fmt::Write as _;

use derive_more::Display;

use crate::common::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Severity {
    #[display("note")]
    Note,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

/// One record in the shared diagnostic sink. `code` is the stable machine
/// name used to pick the nag-line; `message` is the technical text.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    seq: usize,
}

/// Ordered buffer of diagnostics threaded by `&mut` through every stage.
/// Stages append and keep going; the driver decides at stage boundaries
/// whether the pipeline may proceed.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, code: &'static str, message: String, span: Span) {
        if severity == Severity::Error {
            self.error_count += 1;
        }
        let seq = self.diagnostics.len();
        self.diagnostics.push(Diagnostic {
            severity,
            code,
            message,
            span,
            seq,
        });
    }

    pub fn error(&mut self, code: &'static str, message: String, span: Span) {
        self.report(Severity::Error, code, message, span);
    }

    pub fn warning(&mut self, code: &'static str, message: String, span: Span) {
        self.report(Severity::Warning, code, message, span);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics in report order: by file, then byte offset, then
    /// insertion order. The sequence number keeps the sort stable even if
    /// two records share a span.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut out: Vec<_> = self.diagnostics.iter().collect();
        out.sort_by_key(|d| (d.span.file, d.span.offset, d.seq));
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.sorted()
            .into_iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Render every diagnostic against the resolver, which maps a file id
    /// to its display path and (optionally) its source text for the frame.
    pub fn render(&self, resolve: impl Fn(usize) -> (String, Option<String>)) -> String {
        let mut out = String::new();
        for diag in self.sorted() {
            let (path, source) = resolve(diag.span.file);
            let _ = writeln!(out, "{}", diag.pretty(&path, source.as_deref()));
        }
        out
    }
}

impl Diagnostic {
    /// `<path>:<line>:<col>: <severity>: <message>` plus the nag-line and
    /// the source frame where available.
    pub fn pretty(&self, path: &str, source_text: Option<&str>) -> String {
        let mut out = format!(
            "{}:{}:{}: {}: {}",
            path, self.span.line, self.span.column, self.severity, self.message
        );
        if self.severity == Severity::Error {
            let _ = write!(out, "\n  {}", nag_line(self.code));
        }
        if let Some(text) = source_text {
            if let Some(frame) = source_frame(text, self.span.line, self.span.column) {
                let _ = write!(out, "\n{}", frame);
            }
        }
        out
    }
}

fn source_frame(source_text: &str, line: usize, column: usize) -> Option<String> {
    let content = source_text.lines().nth(line.checked_sub(1)?)?;
    let caret_pos = column.max(1);
    Some(format!(
        "  | {}\n  | {}^",
        content,
        " ".repeat(caret_pos - 1)
    ))
}

/// Supplementary one-liners attached to error diagnostics. The compiler's
/// trademark; keep them in sync with the codes each stage emits.
pub fn nag_line(code: &str) -> &'static str {
    match code {
        "unknown_char" => "Arre bhai, yeh character kya hai? Keyboard pe stunt mat karo.",
        "unterminated_string" => "Quote khola hai toh band bhi karo, warna compiler ro dega.",
        "unterminated_comment" => "Comment khola hai toh band bhi karo. `*/` kidhar hai?",
        "expected_start" => "Program start hi bhool gaya? `shuru` daal na bhai.",
        "expected_end" => "Scene close karna tha. `bass` ke bina compiler nahi rukega.",
        "missing_terminator" => "Statement ka end batao bhai. Semicolon ya nayi line chahiye.",
        "missing_semicolon" => "Semicolon kidhar gaya bhai? Line ka scene toot gaya.",
        "missing_lparen" => "Bracket kholna tha bhai. `(` missing hai.",
        "missing_rparen" => "Bracket bandh karo bhai. `)` missing hai.",
        "missing_lbrace" => "Block start ke liye `{` chahiye, hawa mein code mat udao.",
        "missing_rbrace" => "Block bandh karo `{...}` ka balance bigad gaya.",
        "invalid_statement" => "Yeh statement ka scene samajh nahi aaya. Syntax theek karo.",
        "invalid_expression" => "Expression ulta-pulta hai. Thoda seedha likh, bhai.",
        "unexpected_token" => "Token ka scene off hai. Jo expected tha woh nahi mila.",
        "undeclared_variable" => "Variable hawa mein bana diya kya? Pehle declare karo.",
        "redeclared_variable" => "Same variable do baar? Itna bhi overconfidence theek nahi.",
        "type_mismatch" => "Type mismatch ho gaya. Maths aur mood alag chal rahe hain.",
        "invalid_condition" => "Condition ka logic weak hai. Bool mein baat kar bhai.",
        "return_type" => "Return ka scene mismatch hai. Function type check kar.",
        "undeclared_function" => "Function ka naam suna nahi bhai. Pehle define kar.",
        "arity_mismatch" => "Arguments ka count ulta hai. Function ko jitna chahiye utna bhej.",
        "invalid_params" => "Function params ka syntax scene off hai.",
        "invalid_function" => "Function declaration ka format toot gaya.",
        "break_outside_loop" => "`tod` loop/switch ke bahar kaise chal raha hai bhai?",
        "continue_outside_loop" => "`jari` bhi loop ke bahar nahi chalega.",
        "unknown_type" => "Type ka naam compiler ko nahi mila.",
        "invalid_lvalue" => "Assignment ke left side pe valid target do.",
        "array_init_not_supported" => "Array init short syntax abhi support nahi hai.",
        "duplicate_default" => "Switch mein ek hi `default` hota hai, extra mat daalo bhai.",
        "invalid_case_label" => "Case label constant hona chahiye, random mat likho.",
        "duplicate_case" => "Same case value repeat kiya hai. Switch ka map clean rakho.",
        "missing_import" => "Import file missing hai bhai. Path check karo.",
        "circular_import" => "Import chain gol-gol ghoom rahi hai. Circular dependency hatao.",
        "internal_error" => "Compiler khud confuse ho gaya. Bug report kar do bhai.",
        _ => "Compiler confuse ho gaya bhai. Thoda code saaf likh.",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Span;

    #[test]
    fn test_diagnostic_line_format() {
        let mut sink = DiagnosticSink::new();
        sink.error(
            "unknown_char",
            "Unknown character `@`.".into(),
            Span::new(0, 3, 7, 21, 1),
        );
        let diag = sink.sorted()[0];
        let pretty = diag.pretty("demo.bhai", None);
        assert!(pretty.starts_with("demo.bhai:3:7: error: Unknown character `@`."));
        assert!(pretty.contains("Arre bhai"));
    }

    #[test]
    fn test_source_frame_points_at_column() {
        let source = "shuru\nbhai x =\nbass";
        let frame = source_frame(source, 2, 8).unwrap();
        assert!(frame.contains("| bhai x ="));
        assert!(frame.ends_with("       ^"));
    }

    #[test]
    fn test_ordering_by_file_then_offset_then_seq() {
        let mut sink = DiagnosticSink::new();
        sink.error("a", "second".into(), Span::new(0, 2, 1, 10, 1));
        sink.error("b", "first".into(), Span::new(0, 1, 1, 0, 1));
        sink.warning("c", "also first offset".into(), Span::new(0, 1, 1, 0, 1));
        let order: Vec<_> = sink.sorted().iter().map(|d| d.message.clone()).collect();
        assert_eq!(order, vec!["first", "also first offset", "second"]);
    }

    #[test]
    fn test_warnings_do_not_count_as_errors() {
        let mut sink = DiagnosticSink::new();
        sink.warning("unused_variable", "x unused".into(), Span::synthetic());
        assert!(!sink.has_errors());
        sink.error("type_mismatch", "boom".into(), Span::synthetic());
        assert_eq!(sink.error_count(), 1);
    }
}
