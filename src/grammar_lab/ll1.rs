use std::collections::{BTreeMap, BTreeSet};

use crate::lexer::TokenType;

pub const EPS: &str = "EPS";

/// Productions per nonterminal. The lab grammar is a curated LL(1) subset
/// of the language (single-type declarations, if/while, calls) — rich
/// enough to drive FIRST/FOLLOW/table construction and a predictive parse
/// trace, small enough to stay conflict-free.
pub type Grammar = BTreeMap<&'static str, Vec<Vec<&'static str>>>;

#[derive(Clone, Debug)]
pub struct Ll1Artifacts {
    pub grammar: Grammar,
    pub start_symbol: &'static str,
    pub terminals: BTreeSet<&'static str>,
    pub nonterminals: BTreeSet<&'static str>,
    pub first: BTreeMap<&'static str, BTreeSet<&'static str>>,
    pub follow: BTreeMap<&'static str, BTreeSet<&'static str>>,
    pub table: BTreeMap<(&'static str, &'static str), Vec<&'static str>>,
    pub conflicts: Vec<(
        &'static str,
        &'static str,
        Vec<&'static str>,
        Vec<&'static str>,
    )>,
}

pub fn subset_grammar() -> (Grammar, &'static str) {
    let grammar: Grammar = [
        (
            "Program",
            vec![vec!["FuncDecls", "START_BHAI", "StmtList", "BAS_KAR", "EOF"]],
        ),
        (
            "FuncDecls",
            vec![
                vec![
                    "KAAM", "IDENT", "LPAREN", "ParamsOpt", "RPAREN", "Block", "FuncDecls",
                ],
                vec![EPS],
            ],
        ),
        ("ParamsOpt", vec![vec!["IDENT", "ParamTail"], vec![EPS]]),
        (
            "ParamTail",
            vec![vec!["COMMA", "IDENT", "ParamTail"], vec![EPS]],
        ),
        ("Block", vec![vec!["LBRACE", "StmtList", "RBRACE"]]),
        ("StmtList", vec![vec!["Stmt", "StmtList"], vec![EPS]]),
        (
            "Stmt",
            vec![
                vec!["BHAI", "IDENT", "DeclTail", "SEMICOLON"],
                vec!["IDENT", "IdentStmtTail"],
                vec!["AGAR", "LPAREN", "Expr", "RPAREN", "Block", "ElsePart"],
                vec!["JABTAK", "LPAREN", "Expr", "RPAREN", "Block"],
                vec!["BOL", "LPAREN", "Expr", "RPAREN", "SEMICOLON"],
                vec!["NIKAL", "Expr", "SEMICOLON"],
                vec!["Block"],
            ],
        ),
        ("DeclTail", vec![vec!["ASSIGN", "Expr"], vec![EPS]]),
        (
            "IdentStmtTail",
            vec![
                vec!["ASSIGN", "Expr", "SEMICOLON"],
                vec!["LPAREN", "ArgListOpt", "RPAREN", "SEMICOLON"],
            ],
        ),
        ("ElsePart", vec![vec!["WARNA", "Block"], vec![EPS]]),
        ("ArgListOpt", vec![vec!["Expr", "ArgTail"], vec![EPS]]),
        ("ArgTail", vec![vec!["COMMA", "Expr", "ArgTail"], vec![EPS]]),
        ("Expr", vec![vec!["OrExpr"]]),
        ("OrExpr", vec![vec!["AndExpr", "OrTail"]]),
        ("OrTail", vec![vec!["OR", "AndExpr", "OrTail"], vec![EPS]]),
        ("AndExpr", vec![vec!["EqExpr", "AndTail"]]),
        ("AndTail", vec![vec!["AND", "EqExpr", "AndTail"], vec![EPS]]),
        ("EqExpr", vec![vec!["RelExpr", "EqTail"]]),
        (
            "EqTail",
            vec![
                vec!["EQ", "RelExpr", "EqTail"],
                vec!["NEQ", "RelExpr", "EqTail"],
                vec![EPS],
            ],
        ),
        ("RelExpr", vec![vec!["AddExpr", "RelTail"]]),
        (
            "RelTail",
            vec![
                vec!["LT", "AddExpr", "RelTail"],
                vec!["LTE", "AddExpr", "RelTail"],
                vec!["GT", "AddExpr", "RelTail"],
                vec!["GTE", "AddExpr", "RelTail"],
                vec![EPS],
            ],
        ),
        ("AddExpr", vec![vec!["MulExpr", "AddTail"]]),
        (
            "AddTail",
            vec![
                vec!["PLUS", "MulExpr", "AddTail"],
                vec!["MINUS", "MulExpr", "AddTail"],
                vec![EPS],
            ],
        ),
        ("MulExpr", vec![vec!["UnaryExpr", "MulTail"]]),
        (
            "MulTail",
            vec![
                vec!["STAR", "UnaryExpr", "MulTail"],
                vec!["SLASH", "UnaryExpr", "MulTail"],
                vec![EPS],
            ],
        ),
        (
            "UnaryExpr",
            vec![vec!["NOT", "UnaryExpr"], vec!["MINUS", "UnaryExpr"], vec!["Primary"]],
        ),
        (
            "Primary",
            vec![
                vec!["NUMBER"],
                vec!["STRING"],
                vec!["SACH"],
                vec!["JHOOTH"],
                vec!["IDENT", "PrimaryTail"],
                vec!["LPAREN", "Expr", "RPAREN"],
            ],
        ),
        (
            "PrimaryTail",
            vec![vec!["LPAREN", "ArgListOpt", "RPAREN"], vec![EPS]],
        ),
    ]
    .into_iter()
    .collect();
    (grammar, "Program")
}

pub fn build_ll1_artifacts() -> Ll1Artifacts {
    let (grammar, start_symbol) = subset_grammar();
    let nonterminals: BTreeSet<&'static str> = grammar.keys().copied().collect();
    let terminals = collect_terminals(&grammar, &nonterminals);
    let first = compute_first_sets(&grammar, &nonterminals);
    let follow = compute_follow_sets(&grammar, start_symbol, &first, &nonterminals);
    let (table, conflicts) = build_parse_table(&grammar, &first, &follow, &nonterminals);
    Ll1Artifacts {
        grammar,
        start_symbol,
        terminals,
        nonterminals,
        first,
        follow,
        table,
        conflicts,
    }
}

fn collect_terminals(
    grammar: &Grammar,
    nonterminals: &BTreeSet<&'static str>,
) -> BTreeSet<&'static str> {
    let mut terminals = BTreeSet::new();
    for productions in grammar.values() {
        for production in productions {
            for &symbol in production {
                if symbol != EPS && !nonterminals.contains(symbol) {
                    terminals.insert(symbol);
                }
            }
        }
    }
    terminals
}

pub fn compute_first_sets(
    grammar: &Grammar,
    nonterminals: &BTreeSet<&'static str>,
) -> BTreeMap<&'static str, BTreeSet<&'static str>> {
    let mut first: BTreeMap<&'static str, BTreeSet<&'static str>> =
        nonterminals.iter().map(|&nt| (nt, BTreeSet::new())).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (&lhs, productions) in grammar {
            for production in productions {
                let prod_first = first_of_sequence(production, &first, nonterminals);
                let entry = first.get_mut(lhs).unwrap();
                let before = entry.len();
                let merged: BTreeSet<&'static str> =
                    entry.union(&prod_first).copied().collect();
                *entry = merged;
                if entry.len() != before {
                    changed = true;
                }
            }
        }
    }
    first
}

pub fn compute_follow_sets(
    grammar: &Grammar,
    start_symbol: &'static str,
    first: &BTreeMap<&'static str, BTreeSet<&'static str>>,
    nonterminals: &BTreeSet<&'static str>,
) -> BTreeMap<&'static str, BTreeSet<&'static str>> {
    let mut follow: BTreeMap<&'static str, BTreeSet<&'static str>> =
        nonterminals.iter().map(|&nt| (nt, BTreeSet::new())).collect();
    follow.get_mut(start_symbol).unwrap().insert("EOF");

    let mut changed = true;
    while changed {
        changed = false;
        for (&lhs, productions) in grammar {
            for production in productions {
                for (i, &symbol) in production.iter().enumerate() {
                    if !nonterminals.contains(symbol) {
                        continue;
                    }
                    let suffix = &production[i + 1..];
                    let suffix_first = if suffix.is_empty() {
                        BTreeSet::from([EPS])
                    } else {
                        first_of_sequence(suffix, first, nonterminals)
                    };

                    let mut additions: BTreeSet<&'static str> = suffix_first
                        .iter()
                        .copied()
                        .filter(|&s| s != EPS)
                        .collect();
                    if suffix_first.contains(EPS) || suffix.is_empty() {
                        additions.extend(follow.get(lhs).unwrap().iter().copied());
                    }

                    let entry = follow.get_mut(symbol).unwrap();
                    let before = entry.len();
                    entry.extend(additions);
                    if entry.len() != before {
                        changed = true;
                    }
                }
            }
        }
    }
    follow
}

fn build_parse_table(
    grammar: &Grammar,
    first: &BTreeMap<&'static str, BTreeSet<&'static str>>,
    follow: &BTreeMap<&'static str, BTreeSet<&'static str>>,
    nonterminals: &BTreeSet<&'static str>,
) -> (
    BTreeMap<(&'static str, &'static str), Vec<&'static str>>,
    Vec<(
        &'static str,
        &'static str,
        Vec<&'static str>,
        Vec<&'static str>,
    )>,
) {
    let mut table: BTreeMap<(&'static str, &'static str), Vec<&'static str>> = BTreeMap::new();
    let mut conflicts = vec![];

    for (&lhs, productions) in grammar {
        for production in productions {
            let first_set = first_of_sequence(production, first, nonterminals);
            let mut targets: BTreeSet<&'static str> =
                first_set.iter().copied().filter(|&s| s != EPS).collect();
            if first_set.contains(EPS) {
                targets.extend(follow.get(lhs).unwrap().iter().copied());
            }
            for terminal in targets {
                let key = (lhs, terminal);
                match table.get(&key) {
                    Some(existing) if existing != production => {
                        conflicts.push((lhs, terminal, existing.clone(), production.clone()));
                    }
                    _ => {
                        table.insert(key, production.clone());
                    }
                }
            }
        }
    }
    (table, conflicts)
}

fn first_of_sequence(
    sequence: &[&'static str],
    first: &BTreeMap<&'static str, BTreeSet<&'static str>>,
    nonterminals: &BTreeSet<&'static str>,
) -> BTreeSet<&'static str> {
    if sequence.is_empty() {
        return BTreeSet::from([EPS]);
    }
    let mut out = BTreeSet::new();
    let mut all_nullable = true;
    for &symbol in sequence {
        if symbol == EPS {
            out.insert(EPS);
            continue;
        }
        if !nonterminals.contains(symbol) {
            out.insert(symbol);
            all_nullable = false;
            break;
        }
        let symbol_first = first.get(symbol).unwrap();
        out.extend(symbol_first.iter().copied().filter(|&s| s != EPS));
        if !symbol_first.contains(EPS) {
            all_nullable = false;
            break;
        }
    }
    if all_nullable {
        out.insert(EPS);
    }
    out
}

/// Drive the LL(1) table over a token-kind stream, recording every
/// expansion, match, and the first error.
pub fn predictive_parse_trace(token_kinds: &[&str], artifacts: &Ll1Artifacts) -> Vec<String> {
    let mut input: Vec<&str> = token_kinds.to_vec();
    if input.last() != Some(&"EOF") {
        input.push("EOF");
    }

    let mut stack: Vec<&str> = vec!["EOF", artifacts.start_symbol];
    let mut index = 0;
    let mut trace = vec![];

    while let Some(top) = stack.pop() {
        let lookahead = input.get(index).copied().unwrap_or("EOF");

        if top == EPS {
            trace.push("epsilon".to_owned());
            continue;
        }
        if !artifacts.nonterminals.contains(top) {
            if top == lookahead {
                trace.push(format!("match {}", lookahead));
                index += 1;
                if top == "EOF" {
                    break;
                }
            } else {
                trace.push(format!("error terminal expected={} got={}", top, lookahead));
                break;
            }
            continue;
        }

        match artifacts.table.get(&(top, lookahead)) {
            Some(production) => {
                trace.push(format!("{} -> {}", top, production.join(" ")));
                for &symbol in production.iter().rev() {
                    if symbol != EPS {
                        stack.push(symbol);
                    }
                }
            }
            None => {
                trace.push(format!("error no-rule ({}, {})", top, lookahead));
                break;
            }
        }
    }
    trace
}

/// Grammar terminal name for a token kind; lexical noise (newlines, error
/// tokens) maps to `None` and is dropped before tracing.
pub fn terminal_name(token_type: TokenType) -> Option<&'static str> {
    use TokenType::*;
    Some(match token_type {
        Identifier => "IDENT",
        IntLiteral => "NUMBER",
        FloatLiteral => "FLOAT",
        StringLiteral => "STRING",
        ImportKeyword => "IMPORT",
        ShuruKeyword => "START_BHAI",
        BassKeyword => "BAS_KAR",
        BhaiKeyword => "BHAI",
        DecimalKeyword => "DECIMAL",
        BoolKeyword => "BOOL",
        TextKeyword => "TEXT",
        KhaliKeyword => "VOID",
        KaamKeyword => "KAAM",
        AgarKeyword => "AGAR",
        WarnaKeyword => "WARNA",
        WhileKeyword => "JABTAK",
        ForKeyword => "FOR",
        DoKeyword => "DO",
        SwitchKeyword => "SWITCH",
        CaseKeyword => "CASE",
        DefaultKeyword => "DEFAULT",
        BreakKeyword => "BREAK",
        ContinueKeyword => "CONTINUE",
        BolKeyword => "BOL",
        NikalKeyword => "NIKAL",
        SachKeyword => "SACH",
        JhoothKeyword => "JHOOTH",
        StructKeyword => "STRUCT",
        ClassKeyword => "CLASS",
        BataKeyword => "BATA",
        OpenParen => "LPAREN",
        CloseParen => "RPAREN",
        OpenBrace => "LBRACE",
        CloseBrace => "RBRACE",
        OpenBracket => "LBRACKET",
        CloseBracket => "RBRACKET",
        Semicolon => "SEMICOLON",
        Comma => "COMMA",
        Dot => "DOT",
        Colon => "COLON",
        Equal => "ASSIGN",
        PlusEqual => "PLUS_ASSIGN",
        MinusEqual => "MINUS_ASSIGN",
        StarEqual => "STAR_ASSIGN",
        SlashEqual => "SLASH_ASSIGN",
        PercentEqual => "MOD_ASSIGN",
        PlusPlus => "INCR",
        MinusMinus => "DECR",
        Plus => "PLUS",
        Minus => "MINUS",
        Star => "STAR",
        Slash => "SLASH",
        Percent => "MOD",
        EqualEqual => "EQ",
        BangEqual => "NEQ",
        Less => "LT",
        LessEqual => "LTE",
        Greater => "GT",
        GreaterEqual => "GTE",
        AndAnd => "AND",
        PipePipe => "OR",
        Bang => "NOT",
        EOF => "EOF",
        Newline | Error => return None,
    })
}

pub fn format_ll1_artifacts(artifacts: &Ll1Artifacts, parse_trace: Option<&[String]>) -> String {
    let mut lines = vec![];
    lines.push("FIRST sets".to_owned());
    for nt in &artifacts.nonterminals {
        let values: Vec<&str> = artifacts.first[nt].iter().copied().collect();
        lines.push(format!("  FIRST({}) = {{ {} }}", nt, values.join(", ")));
    }
    lines.push(String::new());
    lines.push("FOLLOW sets".to_owned());
    for nt in &artifacts.nonterminals {
        let values: Vec<&str> = artifacts.follow[nt].iter().copied().collect();
        lines.push(format!("  FOLLOW({}) = {{ {} }}", nt, values.join(", ")));
    }
    lines.push(String::new());
    lines.push("LL(1) table entries".to_owned());
    for ((lhs, terminal), production) in &artifacts.table {
        lines.push(format!(
            "  M[{}, {}] = {}",
            lhs,
            terminal,
            production.join(" ")
        ));
    }
    lines.push(String::new());
    lines.push("Conflicts".to_owned());
    if artifacts.conflicts.is_empty() {
        lines.push("  <none>".to_owned());
    } else {
        for (lhs, terminal, old, new) in &artifacts.conflicts {
            lines.push(format!(
                "  ({}, {}): {}  <->  {}",
                lhs,
                terminal,
                old.join(" "),
                new.join(" ")
            ));
        }
    }
    if let Some(trace) = parse_trace {
        lines.push(String::new());
        lines.push("Predictive parse trace".to_owned());
        for step in trace {
            lines.push(format!("  {}", step));
        }
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_subset_grammar_is_conflict_free() {
        let artifacts = build_ll1_artifacts();
        assert!(artifacts.conflicts.is_empty(), "{:?}", artifacts.conflicts);
    }

    #[test]
    fn test_trace_accepts_simple_program() {
        let artifacts = build_ll1_artifacts();
        let kinds = [
            "START_BHAI",
            "BHAI",
            "IDENT",
            "ASSIGN",
            "NUMBER",
            "SEMICOLON",
            "BOL",
            "LPAREN",
            "IDENT",
            "RPAREN",
            "SEMICOLON",
            "BAS_KAR",
            "EOF",
        ];
        let trace = predictive_parse_trace(&kinds, &artifacts);
        assert!(trace.iter().any(|step| step == "match EOF"));
        assert!(!trace.iter().any(|step| step.starts_with("error")));
    }

    #[test]
    fn test_trace_reports_error_on_bad_input() {
        let artifacts = build_ll1_artifacts();
        let trace = predictive_parse_trace(&["BAS_KAR"], &artifacts);
        assert!(trace.iter().any(|step| step.starts_with("error")));
    }

    #[test]
    fn test_formatting_contains_sections() {
        let artifacts = build_ll1_artifacts();
        let text = format_ll1_artifacts(&artifacts, None);
        assert!(text.contains("FIRST sets"));
        assert!(text.contains("FOLLOW sets"));
        assert!(text.contains("LL(1) table entries"));
        assert!(text.contains("<none>"));
    }
}
