use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend_c::generate_c;
use crate::backend_stack::generate_stack;
use crate::common::FileId;
use crate::diagnostics::DiagnosticSink;
use crate::ir::{lower_program, IrProgram};
use crate::lexer::{lex_source, Token};
use crate::optimizer::{build_cfgs, optimize_program, Cfg, OptimizationPasses};
use crate::parser::ast::{
    Block, CaseArm, Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind, TypeDecl,
};
use crate::parser::parse_tokens;
use crate::semantic::{analyze_program, SemanticResult};

/// Pipeline configuration threaded through the stages. Backends and emit
/// toggles live in the CLI; this only carries what the stages themselves
/// need.
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

/// Every source buffer touched during a compilation, indexed by `FileId`.
/// Diagnostics resolve their file ids against this for rendering.
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<(String, String)>,
}

impl SourceMap {
    pub fn add(&mut self, display: String, text: String) -> FileId {
        self.files.push((display, text));
        self.files.len() - 1
    }

    pub fn display(&self, file: FileId) -> String {
        self.files
            .get(file)
            .map(|(display, _)| display.clone())
            .unwrap_or_else(|| "<unknown>".to_owned())
    }

    pub fn text(&self, file: FileId) -> Option<String> {
        self.files.get(file).map(|(_, text)| text.clone())
    }

    pub fn resolve(&self, file: FileId) -> (String, Option<String>) {
        (self.display(file), self.text(file))
    }
}

/// Everything the pipeline produced for one compilation unit.
pub struct CompilationResult {
    pub tokens: Vec<Token>,
    pub ast: Program,
    pub semantic: SemanticResult,
    pub ir_raw: IrProgram,
    pub ir_optimized: IrProgram,
    pub cfgs: BTreeMap<String, Cfg>,
    pub c_code: String,
    pub stack_code: String,
}

pub struct CompileOutcome {
    pub source_map: SourceMap,
    pub sink: DiagnosticSink,
    /// `None` when a stage reported errors and the pipeline stopped at the
    /// stage boundary. The sink holds the story either way.
    pub result: Option<CompilationResult>,
}

pub fn compile_file(path: &Path, options: CompileOptions) -> std::io::Result<CompileOutcome> {
    let text = fs::read_to_string(path)?;
    Ok(compile_source(&text, Some(path), options))
}

/// Run the full pipeline: lex → parse (+ import resolution) → semantic →
/// IR → optimizer → both backends. Each stage boundary checks the sink;
/// warnings never stop progression, errors do.
pub fn compile_source(text: &str, path: Option<&Path>, options: CompileOptions) -> CompileOutcome {
    let mut source_map = SourceMap::default();
    let mut sink = DiagnosticSink::new();

    let display = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<source>".to_owned());
    let entry_file = source_map.add(display, text.to_owned());

    let tokens = lex_source(text, entry_file, &mut sink);
    if sink.has_errors() {
        return CompileOutcome {
            source_map,
            sink,
            result: None,
        };
    }

    let mut ast = parse_tokens(tokens.clone(), &mut sink);

    if !ast.imports.is_empty() {
        match path {
            Some(path) => {
                ast = resolve_imports(ast, path, &mut source_map, &mut sink);
            }
            None => {
                let span = ast.imports[0].span;
                sink.error(
                    "missing_import",
                    "Import resolution needs a source file path context.".to_owned(),
                    span,
                );
            }
        }
    }
    if sink.has_errors() {
        return CompileOutcome {
            source_map,
            sink,
            result: None,
        };
    }

    let semantic = analyze_program(&mut ast, &mut sink);
    if sink.has_errors() {
        return CompileOutcome {
            source_map,
            sink,
            result: None,
        };
    }

    let ir_raw = lower_program(&ast, &semantic.signatures, &mut sink);
    if sink.has_errors() {
        return CompileOutcome {
            source_map,
            sink,
            result: None,
        };
    }

    let ir_optimized = if options.optimize {
        optimize_program(ir_raw.clone(), OptimizationPasses::default())
    } else {
        ir_raw.clone()
    };
    let cfgs = build_cfgs(&ir_optimized);

    let c_code = generate_c(&ir_optimized, &semantic.signatures);
    let stack_code = generate_stack(&ir_optimized);

    CompileOutcome {
        source_map,
        sink,
        result: Some(CompilationResult {
            tokens,
            ast,
            semantic,
            ir_raw,
            ir_optimized,
            cfgs,
            c_code,
            stack_code,
        }),
    }
}

// ---- import resolution --------------------------------------------------

struct ParsedUnit {
    ast: Program,
}

/// Depth-first import collection with an in-progress stack for cycle
/// detection and a visited map so each file parses at most once. Imported
/// `shuru…bass` bodies are ignored — the importer's main block is
/// authoritative; imported mains exist only so a module runs standalone.
fn resolve_imports(
    entry_ast: Program,
    entry_path: &Path,
    source_map: &mut SourceMap,
    sink: &mut DiagnosticSink,
) -> Program {
    let entry_path = canonical(entry_path);
    let mut resolver = ImportResolver {
        units: HashMap::new(),
        order: vec![],
        visiting: vec![entry_path.clone()],
        source_map,
        sink,
    };

    let deps = resolver.dependencies_of(&entry_ast, &entry_path);
    for dep in &deps {
        resolver.collect(dep);
    }

    let mut merged = Program {
        imports: entry_ast.imports.clone(),
        type_decls: vec![],
        functions: vec![],
        main: entry_ast.main,
    };
    for dep_path in resolver.order.clone() {
        if let Some(unit) = resolver.units.remove(&dep_path) {
            merged.type_decls.extend(unit.ast.type_decls);
            merged.functions.extend(unit.ast.functions);
        }
    }
    merged.type_decls.extend(entry_ast.type_decls);
    merged.functions.extend(entry_ast.functions);
    merged
}

struct ImportResolver<'a> {
    units: HashMap<PathBuf, ParsedUnit>,
    /// Dependency-first order for the merge.
    order: Vec<PathBuf>,
    visiting: Vec<PathBuf>,
    source_map: &'a mut SourceMap,
    sink: &'a mut DiagnosticSink,
}

impl<'a> ImportResolver<'a> {
    fn collect(&mut self, path: &PathBuf) {
        if self.units.contains_key(path) {
            return;
        }
        if self.visiting.contains(path) {
            let start = self.visiting.iter().position(|p| p == path).unwrap();
            let mut participants: Vec<String> = self.visiting[start..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            participants.push(path.display().to_string());
            self.sink.error(
                "circular_import",
                format!("Circular import detected: {}", participants.join(" -> ")),
                crate::common::Span::synthetic(),
            );
            return;
        }

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                self.sink.error(
                    "missing_import",
                    format!("Imported module not found: `{}`.", path.display()),
                    crate::common::Span::synthetic(),
                );
                return;
            }
        };

        let file_id = self.source_map.add(path.display().to_string(), text.clone());
        let tokens = lex_source(&text, file_id, self.sink);
        let ast = parse_tokens(tokens, self.sink);
        let deps = self.dependencies_of(&ast, path);

        self.visiting.push(path.clone());
        for dep in &deps {
            self.collect(dep);
        }
        self.visiting.pop();

        self.units.insert(path.clone(), ParsedUnit { ast });
        self.order.push(path.clone());
    }

    fn dependencies_of(&mut self, ast: &Program, importer: &Path) -> Vec<PathBuf> {
        let base = importer.parent().map(Path::to_path_buf).unwrap_or_default();
        ast.imports
            .iter()
            .map(|import| {
                let mut candidate = PathBuf::from(&import.path);
                if !candidate.is_absolute() {
                    candidate = base.join(candidate);
                }
                if candidate.extension().is_none() {
                    candidate.set_extension("bhai");
                }
                canonical(&candidate)
            })
            .collect()
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ---- artifact formatters -------------------------------------------------

pub fn format_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let _ = writeln!(
            out,
            "{}:{}  {:<16} {:?}",
            token.span.line,
            token.span.column,
            format!("{:?}", token.token_type),
            token.value.as_deref().unwrap_or("")
        );
    }
    out
}

pub fn format_ir(program: &IrProgram) -> String {
    format!("{}", program)
}

pub fn format_symbols(semantic: &SemanticResult, sink: &DiagnosticSink) -> String {
    let mut lines: Vec<String> = vec![];

    lines.push("Types".to_owned());
    if semantic.signatures.records.is_empty() {
        lines.push("  <none>".to_owned());
    }
    for record in &semantic.signatures.records {
        lines.push(format!("  {} {}", record.kind, record.name));
        for (field, ty) in &record.fields {
            lines.push(format!("    {}: {}", field, ty));
        }
    }
    lines.push(String::new());

    lines.push("Functions".to_owned());
    if semantic.signatures.functions.is_empty() {
        lines.push("  <none>".to_owned());
    }
    for (name, sig) in &semantic.signatures.functions {
        let params: Vec<String> = sig
            .params
            .iter()
            .map(|(param, ty)| format!("{} {}", ty, param))
            .collect();
        lines.push(format!(
            "  {}/{} -> {} ({})",
            name,
            sig.params.len(),
            sig.return_type,
            params.join(", ")
        ));
    }
    lines.push(String::new());

    lines.push("Locals by function".to_owned());
    for (function, locals) in &semantic.locals_by_function {
        let joined = if locals.is_empty() {
            "<none>".to_owned()
        } else {
            locals.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        lines.push(format!("  {}: {}", function, joined));
    }
    lines.push(String::new());

    lines.push("Scope snapshots".to_owned());
    for (scope, symbols) in &semantic.scope_snapshots {
        let joined = if symbols.is_empty() {
            "<empty>".to_owned()
        } else {
            symbols
                .iter()
                .map(|(name, ty)| format!("{}:{}", name, ty))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!("  {} => {}", scope, joined));
    }
    lines.push(String::new());

    lines.push("Warnings".to_owned());
    let warnings: Vec<String> = sink
        .warnings()
        .map(|w| format!("  {}:{} [{}] {}", w.span.line, w.span.column, w.code, w.message))
        .collect();
    if warnings.is_empty() {
        lines.push("  <none>".to_owned());
    } else {
        lines.extend(warnings);
    }

    lines.join("\n") + "\n"
}

pub fn format_cfg(cfgs: &BTreeMap<String, Cfg>) -> String {
    let mut lines: Vec<String> = vec![];
    for (name, cfg) in cfgs {
        lines.push(format!("CFG {}", name));
        if cfg.blocks.is_empty() {
            lines.push("  <no-blocks>".to_owned());
            lines.push(String::new());
            continue;
        }
        for block in &cfg.blocks {
            let succ: Vec<String> = block.successors.iter().map(|s| s.to_string()).collect();
            let pred: Vec<String> = block.predecessors.iter().map(|p| p.to_string()).collect();
            lines.push(format!(
                "  B{} {} pred[{}] succ[{}]",
                block.id,
                block.label,
                if pred.is_empty() { "-".to_owned() } else { pred.join(",") },
                if succ.is_empty() { "-".to_owned() } else { succ.join(",") },
            ));
            for instruction in &block.instructions {
                lines.push(format!("    {}", instruction));
            }
        }
        lines.push(String::new());
    }
    let mut text = lines.join("\n");
    while text.ends_with('\n') {
        text.pop();
    }
    text + "\n"
}

pub fn format_cfg_dot(cfgs: &BTreeMap<String, Cfg>) -> String {
    let mut lines: Vec<String> = vec![
        "digraph CFG {".to_owned(),
        "  node [shape=rectangle];".to_owned(),
    ];
    for (name, cfg) in cfgs {
        let cluster = sanitize_dot_id(name);
        lines.push(format!("  subgraph cluster_{} {{", cluster));
        lines.push(format!("    label=\"{}\";", name));
        for block in &cfg.blocks {
            let mut label_lines = vec![format!("B{} {}", block.id, block.label)];
            label_lines.extend(block.instructions.iter().map(|i| format!("{}", i)));
            let safe = label_lines
                .iter()
                .map(|l| l.replace('"', "\\\""))
                .collect::<Vec<_>>()
                .join("\\l")
                + "\\l";
            lines.push(format!("    {}_B{} [label=\"{}\"];", cluster, block.id, safe));
        }
        for block in &cfg.blocks {
            for succ in &block.successors {
                lines.push(format!("    {}_B{} -> {}_B{};", cluster, block.id, cluster, succ));
            }
        }
        lines.push("  }".to_owned());
    }
    lines.push("}".to_owned());
    lines.join("\n") + "\n"
}

fn sanitize_dot_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn format_ast(program: &Program) -> String {
    let mut lines: Vec<String> = vec!["Program".to_owned()];
    if !program.imports.is_empty() {
        lines.push("  Imports".to_owned());
        for import in &program.imports {
            lines.push(format!("    {}", import.path));
        }
    }
    for type_decl in &program.type_decls {
        fmt_type_decl(type_decl, &mut lines);
    }
    for function in &program.functions {
        fmt_function(function, &mut lines);
    }
    lines.push("  Main".to_owned());
    for stmt in &program.main {
        fmt_stmt(stmt, &mut lines, "    ");
    }
    lines.join("\n") + "\n"
}

fn fmt_type_decl(decl: &TypeDecl, lines: &mut Vec<String>) {
    lines.push(format!("  {} {}", decl.kind, decl.name));
    for field in &decl.fields {
        let suffix = field
            .array_size
            .map(|n| format!("[{}]", n))
            .unwrap_or_default();
        lines.push(format!("    Field {} {}{}", field.type_name, field.name, suffix));
    }
}

fn fmt_function(function: &FunctionDecl, lines: &mut Vec<String>) {
    let params: Vec<String> = function
        .params
        .iter()
        .map(|p| format!("{} {}", p.type_name, p.name))
        .collect();
    lines.push(format!(
        "  Function {} {}({})",
        function.return_type,
        function.name,
        params.join(", ")
    ));
    fmt_block(&function.body, lines, "    ");
}

fn fmt_block(block: &Block, lines: &mut Vec<String>, indent: &str) {
    lines.push(format!("{}Block", indent));
    for stmt in &block.statements {
        fmt_stmt(stmt, lines, &format!("{}  ", indent));
    }
}

fn fmt_stmt(stmt: &Stmt, lines: &mut Vec<String>, indent: &str) {
    let deeper = format!("{}  ", indent);
    match &stmt.kind {
        StmtKind::VarDecl {
            type_name,
            name,
            array_size,
            init,
        } => {
            let suffix = array_size.map(|n| format!("[{}]", n)).unwrap_or_default();
            lines.push(format!("{}VarDecl {} {}{}", indent, type_name, name, suffix));
            if let Some(init) = init {
                fmt_expr(init, lines, &deeper);
            }
        }
        StmtKind::Assign { target, value } => {
            lines.push(format!("{}Assign", indent));
            fmt_expr(target, lines, &deeper);
            fmt_expr(value, lines, &deeper);
        }
        StmtKind::If {
            condition,
            then_block,
            else_block,
        } => {
            lines.push(format!("{}If", indent));
            fmt_expr(condition, lines, &deeper);
            fmt_block(then_block, lines, &deeper);
            if let Some(else_block) = else_block {
                lines.push(format!("{}Else", indent));
                fmt_block(else_block, lines, &deeper);
            }
        }
        StmtKind::While { condition, body } => {
            lines.push(format!("{}While", indent));
            fmt_expr(condition, lines, &deeper);
            fmt_block(body, lines, &deeper);
        }
        StmtKind::For {
            init,
            condition,
            post,
            body,
        } => {
            lines.push(format!("{}For", indent));
            if let Some(init) = init {
                fmt_stmt(init, lines, &deeper);
            }
            if let Some(condition) = condition {
                fmt_expr(condition, lines, &deeper);
            }
            if let Some(post) = post {
                fmt_stmt(post, lines, &deeper);
            }
            fmt_block(body, lines, &deeper);
        }
        StmtKind::DoWhile { body, condition } => {
            lines.push(format!("{}DoWhile", indent));
            fmt_block(body, lines, &deeper);
            fmt_expr(condition, lines, &deeper);
        }
        StmtKind::Switch {
            discriminant,
            cases,
            default_arm,
        } => {
            lines.push(format!("{}Switch", indent));
            fmt_expr(discriminant, lines, &deeper);
            for CaseArm { value, body, .. } in cases {
                lines.push(format!("{}  Case", indent));
                fmt_expr(value, lines, &format!("{}    ", indent));
                fmt_block(body, lines, &format!("{}    ", indent));
            }
            if let Some(default_arm) = default_arm {
                lines.push(format!("{}  Default", indent));
                fmt_block(default_arm, lines, &format!("{}    ", indent));
            }
        }
        StmtKind::Break => lines.push(format!("{}Break", indent)),
        StmtKind::Continue => lines.push(format!("{}Continue", indent)),
        StmtKind::Print(value) => {
            lines.push(format!("{}Print", indent));
            fmt_expr(value, lines, &deeper);
        }
        StmtKind::Return(value) => {
            lines.push(format!("{}Return", indent));
            if let Some(value) = value {
                fmt_expr(value, lines, &deeper);
            }
        }
        StmtKind::Expr(expr) => {
            lines.push(format!("{}ExprStmt", indent));
            fmt_expr(expr, lines, &deeper);
        }
        StmtKind::Block(block) => fmt_block(block, lines, indent),
        StmtKind::Error => lines.push(format!("{}Error", indent)),
    }
}

fn fmt_expr(expr: &Expr, lines: &mut Vec<String>, indent: &str) {
    let deeper = format!("{}  ", indent);
    match &expr.kind {
        ExprKind::IntLit(v) => lines.push(format!("{}Literal {}", indent, v)),
        ExprKind::FloatLit(v) => lines.push(format!("{}Literal {}", indent, v)),
        ExprKind::BoolLit(v) => {
            lines.push(format!("{}Literal {}", indent, if *v { "sach" } else { "jhooth" }))
        }
        ExprKind::StrLit(v) => lines.push(format!("{}Literal {:?}", indent, v)),
        ExprKind::Name(name) => lines.push(format!("{}Identifier {}", indent, name)),
        ExprKind::Unary { op, operand } => {
            lines.push(format!("{}Unary {}", indent, op));
            fmt_expr(operand, lines, &deeper);
        }
        ExprKind::Binary { op, left, right } => {
            lines.push(format!("{}Binary {}", indent, op));
            fmt_expr(left, lines, &deeper);
            fmt_expr(right, lines, &deeper);
        }
        ExprKind::Logical { op, left, right } => {
            lines.push(format!("{}Logical {}", indent, op));
            fmt_expr(left, lines, &deeper);
            fmt_expr(right, lines, &deeper);
        }
        ExprKind::Cast { target, operand } => {
            lines.push(format!("{}Cast {}", indent, target));
            fmt_expr(operand, lines, &deeper);
        }
        ExprKind::Call { callee, args } => {
            lines.push(format!("{}Call {}", indent, callee));
            for arg in args {
                fmt_expr(arg, lines, &deeper);
            }
        }
        ExprKind::Index { base, index } => {
            lines.push(format!("{}Index", indent));
            fmt_expr(base, lines, &deeper);
            fmt_expr(index, lines, &deeper);
        }
        ExprKind::Field { base, name } => {
            lines.push(format!("{}Member .{}", indent, name));
            fmt_expr(base, lines, &deeper);
        }
        ExprKind::Input => lines.push(format!("{}Input", indent)),
        ExprKind::Increment { op, fixity, target } => {
            let fixity = match fixity {
                crate::parser::ast::Fixity::Pre => "pre",
                crate::parser::ast::Fixity::Post => "post",
            };
            lines.push(format!("{}Increment {} ({})", indent, op, fixity));
            fmt_expr(target, lines, &deeper);
        }
        ExprKind::Error => lines.push(format!("{}Error", indent)),
    }
}

pub fn format_ast_dot(program: &Program) -> String {
    let mut dot = DotWriter {
        lines: vec![
            "digraph AST {".to_owned(),
            "  node [shape=box];".to_owned(),
        ],
        counter: 0,
    };

    let root = dot.node("Program");
    let imports = dot.node("Imports");
    dot.edge(&root, &imports);
    for import in &program.imports {
        let node = dot.node(&import.path);
        dot.edge(&imports, &node);
    }

    let types = dot.node("Types");
    dot.edge(&root, &types);
    for type_decl in &program.type_decls {
        let node = dot.node(&format!("{} {}", type_decl.kind, type_decl.name));
        dot.edge(&types, &node);
        for field in &type_decl.fields {
            let suffix = field
                .array_size
                .map(|n| format!("[{}]", n))
                .unwrap_or_default();
            let field_node = dot.node(&format!("{} {}{}", field.type_name, field.name, suffix));
            dot.edge(&node, &field_node);
        }
    }

    let functions = dot.node("Functions");
    dot.edge(&root, &functions);
    for function in &program.functions {
        let params: Vec<String> = function.params.iter().map(|p| p.name.clone()).collect();
        let node = dot.node(&format!(
            "{} {}({})",
            function.return_type,
            function.name,
            params.join(", ")
        ));
        dot.edge(&functions, &node);
        dot_block(&function.body, &node, &mut dot);
    }

    let main = dot.node("Main");
    dot.edge(&root, &main);
    for stmt in &program.main {
        let node = dot_stmt(stmt, &mut dot);
        dot.edge(&main, &node);
    }

    dot.lines.push("}".to_owned());
    dot.lines.join("\n") + "\n"
}

struct DotWriter {
    lines: Vec<String>,
    counter: usize,
}

impl DotWriter {
    fn node(&mut self, label: &str) -> String {
        let id = format!("n{}", self.counter);
        self.counter += 1;
        let safe = label.replace('"', "\\\"");
        self.lines.push(format!("  {} [label=\"{}\"];", id, safe));
        id
    }

    fn edge(&mut self, from: &str, to: &str) {
        self.lines.push(format!("  {} -> {};", from, to));
    }
}

fn dot_block(block: &Block, parent: &str, dot: &mut DotWriter) {
    let node = dot.node("Block");
    dot.edge(parent, &node);
    for stmt in &block.statements {
        let child = dot_stmt(stmt, dot);
        dot.edge(&node, &child);
    }
}

fn dot_stmt(stmt: &Stmt, dot: &mut DotWriter) -> String {
    match &stmt.kind {
        StmtKind::VarDecl {
            type_name,
            name,
            array_size,
            init,
        } => {
            let suffix = array_size.map(|n| format!("[{}]", n)).unwrap_or_default();
            let node = dot.node(&format!("VarDecl {} {}{}", type_name, name, suffix));
            if let Some(init) = init {
                let child = dot_expr(init, dot);
                dot.edge(&node, &child);
            }
            node
        }
        StmtKind::Assign { target, value } => {
            let node = dot.node("Assign");
            let target = dot_expr(target, dot);
            let value = dot_expr(value, dot);
            dot.edge(&node, &target);
            dot.edge(&node, &value);
            node
        }
        StmtKind::If {
            condition,
            then_block,
            else_block,
        } => {
            let node = dot.node("If");
            let condition = dot_expr(condition, dot);
            dot.edge(&node, &condition);
            dot_block(then_block, &node, dot);
            if let Some(else_block) = else_block {
                dot_block(else_block, &node, dot);
            }
            node
        }
        StmtKind::While { condition, body } => {
            let node = dot.node("While");
            let condition = dot_expr(condition, dot);
            dot.edge(&node, &condition);
            dot_block(body, &node, dot);
            node
        }
        StmtKind::For {
            init,
            condition,
            post,
            body,
        } => {
            let node = dot.node("For");
            if let Some(init) = init {
                let child = dot_stmt(init, dot);
                dot.edge(&node, &child);
            }
            if let Some(condition) = condition {
                let child = dot_expr(condition, dot);
                dot.edge(&node, &child);
            }
            if let Some(post) = post {
                let child = dot_stmt(post, dot);
                dot.edge(&node, &child);
            }
            dot_block(body, &node, dot);
            node
        }
        StmtKind::DoWhile { body, condition } => {
            let node = dot.node("DoWhile");
            dot_block(body, &node, dot);
            let condition = dot_expr(condition, dot);
            dot.edge(&node, &condition);
            node
        }
        StmtKind::Switch {
            discriminant,
            cases,
            default_arm,
        } => {
            let node = dot.node("Switch");
            let discriminant = dot_expr(discriminant, dot);
            dot.edge(&node, &discriminant);
            for case in cases {
                let case_node = dot.node("Case");
                let value = dot_expr(&case.value, dot);
                dot.edge(&case_node, &value);
                dot_block(&case.body, &case_node, dot);
                dot.edge(&node, &case_node);
            }
            if let Some(default_arm) = default_arm {
                let default_node = dot.node("Default");
                dot_block(default_arm, &default_node, dot);
                dot.edge(&node, &default_node);
            }
            node
        }
        StmtKind::Break => dot.node("Break"),
        StmtKind::Continue => dot.node("Continue"),
        StmtKind::Print(value) => {
            let node = dot.node("Print");
            let value = dot_expr(value, dot);
            dot.edge(&node, &value);
            node
        }
        StmtKind::Return(value) => {
            let node = dot.node("Return");
            if let Some(value) = value {
                let value = dot_expr(value, dot);
                dot.edge(&node, &value);
            }
            node
        }
        StmtKind::Expr(expr) => {
            let node = dot.node("ExprStmt");
            let expr = dot_expr(expr, dot);
            dot.edge(&node, &expr);
            node
        }
        StmtKind::Block(block) => {
            let node = dot.node("Block");
            for stmt in &block.statements {
                let child = dot_stmt(stmt, dot);
                dot.edge(&node, &child);
            }
            node
        }
        StmtKind::Error => dot.node("Error"),
    }
}

fn dot_expr(expr: &Expr, dot: &mut DotWriter) -> String {
    match &expr.kind {
        ExprKind::IntLit(v) => dot.node(&format!("Lit {}", v)),
        ExprKind::FloatLit(v) => dot.node(&format!("Lit {}", v)),
        ExprKind::BoolLit(v) => dot.node(&format!("Lit {}", if *v { "sach" } else { "jhooth" })),
        ExprKind::StrLit(v) => dot.node(&format!("Lit {:?}", v)),
        ExprKind::Name(name) => dot.node(&format!("Id {}", name)),
        ExprKind::Unary { op, operand } => {
            let node = dot.node(&format!("Unary {}", op));
            let child = dot_expr(operand, dot);
            dot.edge(&node, &child);
            node
        }
        ExprKind::Binary { op, left, right } => {
            let node = dot.node(&format!("Binary {}", op));
            let left = dot_expr(left, dot);
            let right = dot_expr(right, dot);
            dot.edge(&node, &left);
            dot.edge(&node, &right);
            node
        }
        ExprKind::Logical { op, left, right } => {
            let node = dot.node(&format!("Logical {}", op));
            let left = dot_expr(left, dot);
            let right = dot_expr(right, dot);
            dot.edge(&node, &left);
            dot.edge(&node, &right);
            node
        }
        ExprKind::Cast { target, operand } => {
            let node = dot.node(&format!("Cast {}", target));
            let child = dot_expr(operand, dot);
            dot.edge(&node, &child);
            node
        }
        ExprKind::Call { callee, args } => {
            let node = dot.node(&format!("Call {}", callee));
            for arg in args {
                let child = dot_expr(arg, dot);
                dot.edge(&node, &child);
            }
            node
        }
        ExprKind::Index { base, index } => {
            let node = dot.node("Index");
            let base = dot_expr(base, dot);
            let index = dot_expr(index, dot);
            dot.edge(&node, &base);
            dot.edge(&node, &index);
            node
        }
        ExprKind::Field { base, name } => {
            let node = dot.node(&format!("Member .{}", name));
            let base = dot_expr(base, dot);
            dot.edge(&node, &base);
            node
        }
        ExprKind::Input => dot.node("Input"),
        ExprKind::Increment { op, .. } => dot.node(&format!("Increment {}", op)),
        ExprKind::Error => dot.node("Error"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "patakha-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_pipeline_produces_all_artifacts() {
        let outcome = compile_source(
            "shuru\nbhai x = 2 + 3 * 4\nbol(x)\nnikal 0\nbass",
            None,
            CompileOptions::default(),
        );
        assert!(!outcome.sink.has_errors());
        let result = outcome.result.unwrap();
        assert!(result.c_code.contains("int main(void)"));
        assert!(result.stack_code.contains("MAIN"));
        assert!(!result.cfgs.is_empty());
        assert!(format_ir(&result.ir_optimized).contains("func __main__"));
        assert!(format_tokens(&result.tokens).contains("BhaiKeyword"));
        assert!(format_ast(&result.ast).contains("Program"));
        assert!(format_ast_dot(&result.ast).starts_with("digraph AST {"));
        assert!(format_cfg(&result.cfgs).contains("CFG __main__"));
        assert!(format_cfg_dot(&result.cfgs).starts_with("digraph CFG {"));
        assert!(format_symbols(&result.semantic, &outcome.sink).contains("Locals by function"));
    }

    #[test]
    fn test_pipeline_halts_on_parse_errors_with_diagnostics() {
        let outcome = compile_source(
            "shuru bhai a = bol(a) nikal 0 bass",
            None,
            CompileOptions::default(),
        );
        assert!(outcome.sink.has_errors());
        assert!(outcome.result.is_none());
        let rendered = outcome.sink.render(|f| outcome.source_map.resolve(f));
        assert!(rendered.contains("error:"));
    }

    #[test]
    fn test_warnings_do_not_halt_pipeline() {
        let outcome = compile_source(
            "shuru\nbhai unused = 1\nbol(2)\nbass",
            None,
            CompileOptions::default(),
        );
        assert!(!outcome.sink.has_errors());
        assert!(!outcome.sink.is_empty());
        assert!(outcome.result.is_some());
    }

    #[test]
    fn test_import_without_path_context_fails() {
        let outcome = compile_source(
            "import \"lib.bhai\"\nshuru\nnikal 0\nbass",
            None,
            CompileOptions::default(),
        );
        let codes: Vec<_> = outcome.sink.sorted().iter().map(|d| d.code).collect();
        assert!(codes.contains(&"missing_import"));
    }

    #[test]
    fn test_imported_functions_merge_into_program() {
        let dir = scratch_dir("imports");
        let lib = dir.join("lib.bhai");
        let main = dir.join("main.bhai");
        fs::write(
            &lib,
            "kaam decimal twice(decimal x) {\nnikal x * 2.0\n}\nshuru\nbass\n",
        )
        .unwrap();
        fs::write(
            &main,
            "import \"lib.bhai\"\nshuru\ndecimal a = 3.5\nbol(twice(a))\nnikal 0\nbass\n",
        )
        .unwrap();

        let outcome = compile_file(&main, CompileOptions::default()).unwrap();
        assert!(
            !outcome.sink.has_errors(),
            "{}",
            outcome.sink.render(|f| outcome.source_map.resolve(f))
        );
        let result = outcome.result.unwrap();
        assert!(result.c_code.contains("double twice(double x)"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_imported_main_block_is_ignored() {
        let dir = scratch_dir("imported-main");
        let lib = dir.join("lib.bhai");
        let main = dir.join("main.bhai");
        fs::write(
            &lib,
            "kaam bhai seven() {\nnikal 7\n}\nshuru\nbol(999)\nbass\n",
        )
        .unwrap();
        fs::write(
            &main,
            "import \"lib.bhai\"\nshuru\nbol(seven())\nbass\n",
        )
        .unwrap();

        let outcome = compile_file(&main, CompileOptions::default()).unwrap();
        assert!(!outcome.sink.has_errors());
        let result = outcome.result.unwrap();
        // The importer's main is authoritative; 999 never makes it in.
        assert!(!result.c_code.contains("999"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_import_cycle_reports_once_and_terminates() {
        // a.bhai <-> b.bhai yields exactly one cycle diagnostic naming
        // both files, and no stack overflow.
        let dir = scratch_dir("cycle");
        let a = dir.join("a.bhai");
        let b = dir.join("b.bhai");
        fs::write(&a, "import \"b.bhai\"\nshuru\nnikal 0\nbass\n").unwrap();
        fs::write(&b, "import \"a.bhai\"\nshuru\nbass\n").unwrap();

        let outcome = compile_file(&a, CompileOptions::default()).unwrap();
        let cycles: Vec<_> = outcome
            .sink
            .sorted()
            .into_iter()
            .filter(|d| d.code == "circular_import")
            .cloned()
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.contains("a.bhai"));
        assert!(cycles[0].message.contains("b.bhai"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_import_reported() {
        let dir = scratch_dir("missing");
        let main = dir.join("main.bhai");
        fs::write(&main, "import \"nope.bhai\"\nshuru\nbass\n").unwrap();
        let outcome = compile_file(&main, CompileOptions::default()).unwrap();
        assert!(outcome
            .sink
            .sorted()
            .iter()
            .any(|d| d.code == "missing_import"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_deterministic_artifacts() {
        // Identical input, byte-identical artifacts.
        let source = "kaam bhai f(bhai n) {\nnikal n * n\n}\nshuru\nbhai i = 0\ntabtak (i < 3) {\nbol(f(i))\ni = i + 1\n}\nbass";
        let first = compile_source(source, None, CompileOptions::default())
            .result
            .unwrap();
        let second = compile_source(source, None, CompileOptions::default())
            .result
            .unwrap();
        assert_eq!(first.c_code, second.c_code);
        assert_eq!(first.stack_code, second.stack_code);
        assert_eq!(format_ir(&first.ir_optimized), format_ir(&second.ir_optimized));
        assert_eq!(format_cfg(&first.cfgs), format_cfg(&second.cfgs));
    }
}
