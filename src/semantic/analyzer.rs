use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::symbol_table::{Symbol, SymbolKind, SymbolTable};
use super::types::{FunctionSig, RecordDef, Signatures, Type};
use crate::common::Span;
use crate::diagnostics::DiagnosticSink;
use crate::parser::ast::*;

const BUILTINS: [&str; 2] = ["len", "max"];

const KEYWORD_HINTS: [&str; 14] = [
    "agar", "warna", "tabtak", "jabtak", "kar", "switch", "case", "default", "tod", "jari",
    "nikal", "bol", "shuru", "bass",
];

/// What survives semantic analysis besides the annotated AST: the public
/// signatures for codegen and the symbol dumps for `--dump-symbols`.
#[derive(Clone, Debug, Default)]
pub struct SemanticResult {
    pub signatures: Signatures,
    pub locals_by_function: BTreeMap<String, BTreeSet<String>>,
    pub scope_snapshots: Vec<(String, Vec<(String, Type)>)>,
}

/// Type-check the program in place (every surviving expression gets its
/// resolved type), collecting errors and warnings into the sink. Analysis
/// keeps going after an error wherever it safely can; subtrees that failed
/// carry `Type::Error`, which suppresses cascading reports.
pub fn analyze_program(program: &mut Program, sink: &mut DiagnosticSink) -> SemanticResult {
    let mut analyzer = Analyzer::new(sink);
    analyzer.collect_records(&program.type_decls);
    analyzer.collect_signatures(&program.functions);

    for function in &mut program.functions {
        analyzer.check_function(function);
    }

    analyzer.current_function = "__main__".to_owned();
    analyzer.current_return = Type::Int;
    analyzer.table.push_scope("__main__", "main");
    let mut terminated = false;
    for stmt in &mut program.main {
        if terminated {
            analyzer.sink.warning(
                "unreachable_code",
                "Unreachable statement after control-flow exit.".to_owned(),
                stmt.span,
            );
            continue;
        }
        terminated = analyzer.visit_stmt(stmt);
    }
    analyzer.close_scope();

    SemanticResult {
        signatures: Signatures {
            functions: analyzer.functions,
            records: analyzer.records,
        },
        locals_by_function: analyzer.locals_by_function,
        scope_snapshots: analyzer.scope_snapshots,
    }
}

struct Analyzer<'a> {
    sink: &'a mut DiagnosticSink,
    records: Vec<RecordDef>,
    functions: BTreeMap<String, FunctionSig>,
    table: SymbolTable,
    locals_by_function: BTreeMap<String, BTreeSet<String>>,
    scope_snapshots: Vec<(String, Vec<(String, Type)>)>,
    current_function: String,
    current_return: Type,
    loop_depth: usize,
    switch_depth: usize,
}

#[derive(Clone, Debug, PartialEq)]
enum ConstValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ConstValue {
    fn truthy(&self) -> bool {
        match self {
            ConstValue::Int(v) => *v != 0,
            ConstValue::Float(v) => *v != 0.0,
            ConstValue::Bool(v) => *v,
            ConstValue::Text(v) => !v.is_empty(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CaseKey {
    Int(i64),
    Text(String),
}

impl<'a> Analyzer<'a> {
    fn new(sink: &'a mut DiagnosticSink) -> Self {
        let mut locals = BTreeMap::new();
        locals.insert("__main__".to_owned(), BTreeSet::new());
        Self {
            sink,
            records: vec![],
            functions: BTreeMap::new(),
            table: SymbolTable::new(),
            locals_by_function: locals,
            scope_snapshots: vec![],
            current_function: "__main__".to_owned(),
            current_return: Type::Int,
            loop_depth: 0,
            switch_depth: 0,
        }
    }

    fn error(&mut self, code: &'static str, message: String, span: Span) {
        self.sink.error(code, message, span);
    }

    fn warn(&mut self, code: &'static str, message: String, span: Span) {
        self.sink.warning(code, message, span);
    }

    // ---- collection passes ---------------------------------------------

    fn collect_records(&mut self, decls: &[TypeDecl]) {
        // Names first so fields may reference aggregates declared later.
        let mut seen = HashSet::new();
        for decl in decls {
            if BUILTINS.contains(&decl.name.as_str()) {
                self.error(
                    "redeclared_variable",
                    format!("Type `{}` uses reserved name.", decl.name),
                    decl.span,
                );
                continue;
            }
            if !seen.insert(decl.name.clone()) {
                self.error(
                    "redeclared_variable",
                    format!("Type `{}` already declared.", decl.name),
                    decl.span,
                );
                continue;
            }
            self.records.push(RecordDef {
                kind: decl.kind,
                name: decl.name.clone(),
                fields: vec![],
            });
        }

        for decl in decls {
            let mut fields: Vec<(String, Type)> = vec![];
            for field in &decl.fields {
                if fields.iter().any(|(name, _)| name == &field.name) {
                    self.error(
                        "redeclared_variable",
                        format!("Field `{}` duplicated in `{}`.", field.name, decl.name),
                        field.span,
                    );
                    continue;
                }
                let field_type = self.resolve_type(&field.type_name, false, field.span);
                if field.array_size.is_some() {
                    // Arrays live in named locals only; an array field has
                    // no slot the aggregate load/store ops could move.
                    self.error(
                        "array_init_not_supported",
                        format!(
                            "Array field `{}` is not supported; declare the array as a variable.",
                            field.name
                        ),
                        field.span,
                    );
                    continue;
                }
                fields.push((field.name.clone(), field_type));
            }
            if let Some(record) = self.records.iter_mut().find(|r| r.name == decl.name) {
                record.fields = fields;
            }
        }
    }

    fn collect_signatures(&mut self, functions: &[FunctionDecl]) {
        for function in functions {
            if BUILTINS.contains(&function.name.as_str()) {
                self.error(
                    "redeclared_variable",
                    format!("Function `{}` conflicts with builtin name.", function.name),
                    function.span,
                );
                continue;
            }
            if self.records.iter().any(|r| r.name == function.name) {
                self.error(
                    "redeclared_variable",
                    format!("Function `{}` conflicts with type name.", function.name),
                    function.span,
                );
                continue;
            }
            if self.functions.contains_key(&function.name) {
                self.error(
                    "redeclared_variable",
                    format!("Function `{}` already declared.", function.name),
                    function.span,
                );
                continue;
            }

            let mut params: Vec<(String, Type)> = vec![];
            for param in &function.params {
                if params.iter().any(|(name, _)| name == &param.name) {
                    self.error(
                        "invalid_params",
                        format!("Duplicate parameter `{}` in `{}`.", param.name, function.name),
                        param.span,
                    );
                    continue;
                }
                let ty = self.resolve_type(&param.type_name, false, param.span);
                params.push((param.name.clone(), ty));
            }
            let return_type = self.resolve_type(&function.return_type, true, function.span);

            self.locals_by_function.insert(
                function.name.clone(),
                params.iter().map(|(name, _)| name.clone()).collect(),
            );
            self.functions.insert(
                function.name.clone(),
                FunctionSig {
                    return_type,
                    params,
                },
            );
        }
    }

    fn check_function(&mut self, function: &mut FunctionDecl) {
        let Some(sig) = self.functions.get(&function.name).cloned() else {
            return;
        };
        let previous_function =
            std::mem::replace(&mut self.current_function, function.name.clone());
        let previous_return = std::mem::replace(&mut self.current_return, sig.return_type.clone());

        self.table
            .push_scope(&function.name, &format!("fn {}", function.name));
        for (param, decl) in sig.params.iter().zip(&function.params) {
            let symbol = Symbol::new(SymbolKind::Param, param.1.clone(), decl.span);
            let _ = self.table.declare(&param.0, symbol);
        }
        let always_returns = self.visit_block(&mut function.body, false);
        if sig.return_type != Type::Void && !always_returns {
            self.warn(
                "missing_return",
                format!(
                    "Function `{}` may exit without `nikal` value.",
                    function.name
                ),
                function.span,
            );
        }
        self.close_scope();

        self.current_function = previous_function;
        self.current_return = previous_return;
    }

    // ---- statements ----------------------------------------------------

    fn visit_block(&mut self, block: &mut Block, create_scope: bool) -> bool {
        if create_scope {
            self.table.push_scope(&self.current_function.clone(), "block");
        }
        let mut terminated = false;
        for stmt in &mut block.statements {
            if terminated {
                self.warn(
                    "unreachable_code",
                    "Unreachable statement after control-flow exit.".to_owned(),
                    stmt.span,
                );
                continue;
            }
            terminated = self.visit_stmt(stmt);
        }
        if create_scope {
            self.close_scope();
        }
        terminated
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> bool {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::VarDecl {
                type_name,
                name,
                array_size,
                init,
            } => {
                let type_name = type_name.clone();
                let name = name.clone();
                let array_size = *array_size;
                self.visit_var_decl(&type_name, &name, array_size, init.as_mut(), span);
                false
            }
            StmtKind::Assign { target, value } => {
                let lhs = self.infer_lvalue(target);
                let rhs = self.infer_expr(value);
                if lhs.is_array() {
                    self.error(
                        "type_mismatch",
                        "Arrays cannot be assigned as a whole.".to_owned(),
                        span,
                    );
                } else if !assignable(&lhs, &rhs) {
                    self.error(
                        "type_mismatch",
                        format!("Cannot assign {} to {}.", rhs, lhs),
                        span,
                    );
                }
                false
            }
            StmtKind::If {
                condition,
                then_block,
                else_block,
            } => {
                self.check_condition(condition, span);
                let then_returns = self.visit_block(then_block, true);
                let else_returns = match else_block {
                    Some(block) => self.visit_block(block, true),
                    None => false,
                };
                else_block.is_some() && then_returns && else_returns
            }
            StmtKind::While { condition, body } => {
                self.check_condition(condition, span);
                self.loop_depth += 1;
                self.visit_block(body, true);
                self.loop_depth -= 1;
                false
            }
            StmtKind::For {
                init,
                condition,
                post,
                body,
            } => {
                self.table.push_scope(&self.current_function.clone(), "for");
                if let Some(init) = init {
                    self.visit_stmt(init);
                }
                if let Some(condition) = condition {
                    self.check_condition(condition, span);
                }
                self.loop_depth += 1;
                self.visit_block(body, true);
                self.loop_depth -= 1;
                if let Some(post) = post {
                    self.visit_stmt(post);
                }
                self.close_scope();
                false
            }
            StmtKind::DoWhile { body, condition } => {
                self.loop_depth += 1;
                self.visit_block(body, true);
                self.loop_depth -= 1;
                self.check_condition(condition, span);
                false
            }
            StmtKind::Switch {
                discriminant,
                cases,
                default_arm,
            } => {
                self.visit_switch(discriminant, cases, default_arm.as_mut(), span);
                false
            }
            StmtKind::Break => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    self.error(
                        "break_outside_loop",
                        "`tod` used outside loop/switch.".to_owned(),
                        span,
                    );
                }
                true
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.error(
                        "continue_outside_loop",
                        "`jari` used outside loop.".to_owned(),
                        span,
                    );
                }
                true
            }
            StmtKind::Print(value) => {
                let ty = self.infer_expr(value);
                if !ty.is_error() && !ty.is_printable() {
                    self.error(
                        "type_mismatch",
                        format!("`bol` supports int/float/bool/text, got {}.", ty),
                        span,
                    );
                }
                false
            }
            StmtKind::Return(value) => {
                self.visit_return(value.as_mut(), span);
                true
            }
            StmtKind::Expr(expr) => {
                self.infer_expr(expr);
                false
            }
            StmtKind::Block(block) => self.visit_block(block, true),
            StmtKind::Error => false,
        }
    }

    fn visit_var_decl(
        &mut self,
        type_name: &TypeName,
        name: &str,
        array_size: Option<usize>,
        init: Option<&mut Expr>,
        span: Span,
    ) {
        if BUILTINS.contains(&name)
            || self.functions.contains_key(name)
            || self.records.iter().any(|r| r.name == name)
        {
            self.error(
                "redeclared_variable",
                format!(
                    "Variable `{}` conflicts with reserved/function/type name.",
                    name
                ),
                span,
            );
            return;
        }

        let mut declared = self.resolve_type(type_name, false, span);
        if let Some(size) = array_size {
            if size == 0 {
                self.error(
                    "type_mismatch",
                    "Array size must be positive.".to_owned(),
                    span,
                );
            }
            declared = Type::Array(Box::new(declared), size);
            if init.is_some() {
                self.error(
                    "array_init_not_supported",
                    "Array declaration with initializer is not supported yet.".to_owned(),
                    span,
                );
            }
        }

        if self.table.shadows_outer(name) {
            self.warn(
                "shadowed_variable",
                format!("Variable `{}` shadows an outer declaration.", name),
                span,
            );
        }

        let mut symbol = Symbol::new(SymbolKind::Var, declared.clone(), span);
        symbol.initialized = init.is_some();
        if self.table.declare(name, symbol).is_err() {
            self.error(
                "redeclared_variable",
                format!("Variable `{}` is already declared in this scope.", name),
                span,
            );
            return;
        }
        self.locals_by_function
            .entry(self.current_function.clone())
            .or_default()
            .insert(name.to_owned());

        if let Some(init) = init {
            let rhs = self.infer_expr(init);
            if !assignable(&declared, &rhs) {
                self.error(
                    "type_mismatch",
                    format!("Cannot initialize `{}` ({}) with {}.", name, declared, rhs),
                    span,
                );
            }
        }
    }

    fn visit_switch(
        &mut self,
        discriminant: &mut Expr,
        cases: &mut [CaseArm],
        default_arm: Option<&mut Block>,
        span: Span,
    ) {
        let disc_type = self.infer_expr(discriminant);
        if !disc_type.is_error() && !matches!(disc_type, Type::Int | Type::Bool | Type::Text) {
            self.error(
                "invalid_condition",
                format!("Switch condition should be int/bool/text, got {}.", disc_type),
                span,
            );
        }

        let mut seen: HashSet<CaseKey> = HashSet::new();
        self.switch_depth += 1;
        for case in cases.iter_mut() {
            let case_type = self.infer_expr(&mut case.value);
            if !case_type.is_error() && !disc_type.is_error() && case_type != disc_type {
                self.error(
                    "type_mismatch",
                    format!(
                        "Case label type {} mismatches switch type {}.",
                        case_type, disc_type
                    ),
                    case.span,
                );
            }
            match eval_constant(&case.value) {
                Some(value) => {
                    let key = match value {
                        ConstValue::Int(v) => Some(CaseKey::Int(v)),
                        ConstValue::Bool(v) => Some(CaseKey::Int(v as i64)),
                        ConstValue::Text(v) => Some(CaseKey::Text(v)),
                        ConstValue::Float(_) => None,
                    };
                    match key {
                        Some(key) => {
                            if !seen.insert(key.clone()) {
                                let shown = match key {
                                    CaseKey::Int(v) => v.to_string(),
                                    CaseKey::Text(v) => format!("\"{}\"", v),
                                };
                                self.error(
                                    "duplicate_case",
                                    format!("Duplicate case label value `{}` in switch.", shown),
                                    case.span,
                                );
                            }
                        }
                        None => self.error(
                            "invalid_case_label",
                            "Case label must be an int/bool/text constant.".to_owned(),
                            case.span,
                        ),
                    }
                }
                None => {
                    if !case_type.is_error() {
                        self.error(
                            "invalid_case_label",
                            "Case label must be a compile-time constant expression.".to_owned(),
                            case.span,
                        );
                    }
                }
            }
            self.visit_block(&mut case.body, true);
        }
        if let Some(block) = default_arm {
            self.visit_block(block, true);
        }
        self.switch_depth -= 1;
    }

    fn visit_return(&mut self, value: Option<&mut Expr>, span: Span) {
        let expected = self.current_return.clone();
        match value {
            None => {
                if expected != Type::Void {
                    self.error(
                        "return_type",
                        format!("Function expects return type {}.", expected),
                        span,
                    );
                }
            }
            Some(value) => {
                if expected == Type::Void {
                    self.error(
                        "return_type",
                        "Khali function cannot return a value.".to_owned(),
                        span,
                    );
                    return;
                }
                let actual = self.infer_expr(value);
                if !assignable(&expected, &actual) {
                    self.error(
                        "return_type",
                        format!("Return type mismatch: expected {}, got {}.", expected, actual),
                        span,
                    );
                }
            }
        }
    }

    fn check_condition(&mut self, condition: &mut Expr, span: Span) {
        let ty = self.infer_expr(condition);
        if !ty.is_error() && ty != Type::Bool {
            self.error(
                "invalid_condition",
                format!("Condition should be bool, got {}; cast with bool(...).", ty),
                span,
            );
            return;
        }
        if let Some(value) = eval_constant(condition) {
            let verdict = if value.truthy() { "sach" } else { "jhooth" };
            self.warn(
                "constant_condition",
                format!("Condition is always {}; branch/loop may be redundant.", verdict),
                span,
            );
        }
    }

    // ---- expressions ---------------------------------------------------

    fn infer_expr(&mut self, expr: &mut Expr) -> Type {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::IntLit(_) => Type::Int,
            ExprKind::FloatLit(_) => Type::Float,
            ExprKind::BoolLit(_) => Type::Bool,
            ExprKind::StrLit(_) => Type::Text,
            ExprKind::Input => Type::Int,
            ExprKind::Error => Type::Error,
            ExprKind::Name(name) => {
                let name = name.clone();
                self.read_variable(&name, span)
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let operand_type = self.infer_expr(operand);
                self.check_unary(op, operand_type, span)
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let left_type = self.infer_expr(left);
                let right_type = self.infer_expr(right);
                let hint = MixedSignHint::of(left, right);
                self.check_binary(op, left_type, right_type, hint, span)
            }
            ExprKind::Logical { left, right, .. } => {
                let left_type = self.infer_expr(left);
                let right_type = self.infer_expr(right);
                for ty in [&left_type, &right_type] {
                    if !ty.is_error() && *ty != Type::Bool {
                        self.error(
                            "type_mismatch",
                            format!("Logical operators expect bool operands, got {}.", ty),
                            span,
                        );
                        break;
                    }
                }
                Type::Bool
            }
            ExprKind::Cast { target, operand } => {
                let target = target.clone();
                let source = self.infer_expr(operand);
                let target_type = self.resolve_type(&target, false, span);
                if !source.castable_to(&target_type) {
                    self.error(
                        "type_mismatch",
                        format!("Cannot cast {} to {}.", source, target_type),
                        span,
                    );
                }
                target_type
            }
            ExprKind::Call { callee, args } => {
                let callee = callee.clone();
                self.infer_call(&callee, args, span)
            }
            ExprKind::Index { base, index } => {
                let base_type = self.infer_expr(base);
                let index_type = self.infer_expr(index);
                if !index_type.is_error() && index_type != Type::Int {
                    self.error(
                        "type_mismatch",
                        format!("Array index should be int, got {}.", index_type),
                        span,
                    );
                }
                match base_type {
                    Type::Array(element, _) => *element,
                    Type::Text => Type::Int,
                    Type::Error => Type::Error,
                    other => {
                        self.error(
                            "type_mismatch",
                            format!("Index access requires array/text, got {}.", other),
                            span,
                        );
                        Type::Error
                    }
                }
            }
            ExprKind::Field { base, name } => {
                let name = name.clone();
                let base_type = self.infer_expr(base);
                self.field_type(base_type, &name, span)
            }
            ExprKind::Increment { target, .. } => {
                let target_type = self.infer_lvalue(target);
                // The operand is read as well as written.
                self.count_read(target);
                if !target_type.is_error() && !target_type.is_numeric() {
                    self.error(
                        "type_mismatch",
                        format!("Increment/decrement expects int/float, got {}.", target_type),
                        span,
                    );
                }
                target_type
            }
        };
        expr.ty = Some(ty.clone());
        ty
    }

    fn infer_lvalue(&mut self, expr: &mut Expr) -> Type {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Name(name) => {
                let name = name.clone();
                match self.table.lookup_mut(&name) {
                    Some(symbol) => {
                        symbol.writes += 1;
                        symbol.initialized = true;
                        symbol.ty.clone()
                    }
                    None => {
                        self.report_undeclared(&name, span);
                        Type::Error
                    }
                }
            }
            ExprKind::Index { base, index } => {
                let base_type = self.infer_expr(base);
                let index_type = self.infer_expr(index);
                if !index_type.is_error() && index_type != Type::Int {
                    self.error(
                        "type_mismatch",
                        format!("Array index should be int, got {}.", index_type),
                        span,
                    );
                }
                match base_type {
                    Type::Array(element, _) => *element,
                    Type::Error => Type::Error,
                    _ => {
                        self.error(
                            "invalid_lvalue",
                            "Index assignment requires array target.".to_owned(),
                            span,
                        );
                        Type::Error
                    }
                }
            }
            ExprKind::Field { base, name } => {
                let name = name.clone();
                let base_type = self.infer_expr(base);
                self.field_type(base_type, &name, span)
            }
            _ => {
                self.error(
                    "invalid_lvalue",
                    "Invalid assignment target.".to_owned(),
                    span,
                );
                Type::Error
            }
        };
        expr.ty = Some(ty.clone());
        ty
    }

    fn read_variable(&mut self, name: &str, span: Span) -> Type {
        match self.table.lookup_mut(name) {
            Some(symbol) => {
                symbol.reads += 1;
                symbol.ty.clone()
            }
            None => {
                self.report_undeclared(name, span);
                Type::Error
            }
        }
    }

    fn count_read(&mut self, expr: &Expr) {
        if let ExprKind::Name(name) = &expr.kind {
            if let Some(symbol) = self.table.lookup_mut(name) {
                symbol.reads += 1;
            }
        }
    }

    fn report_undeclared(&mut self, name: &str, span: Span) {
        let mut candidates = self.table.visible_names();
        candidates.extend(KEYWORD_HINTS.iter().map(|s| s.to_string()));
        let hint = match did_you_mean(name, &candidates) {
            Some(suggestion) => format!(" Did you mean `{}`?", suggestion),
            None => String::new(),
        };
        self.error(
            "undeclared_variable",
            format!("Variable `{}` is not declared.{}", name, hint),
            span,
        );
    }

    fn check_unary(&mut self, op: UnaryOp, operand: Type, span: Span) -> Type {
        if operand.is_error() {
            return Type::Error;
        }
        match op {
            UnaryOp::Negate => {
                if operand.is_numeric() {
                    operand
                } else {
                    self.error(
                        "type_mismatch",
                        format!("Unary `-` expects int/float, got {}.", operand),
                        span,
                    );
                    Type::Error
                }
            }
            UnaryOp::Not => {
                if operand == Type::Bool {
                    Type::Bool
                } else {
                    self.error(
                        "type_mismatch",
                        format!("Unary `!` expects bool, got {}.", operand),
                        span,
                    );
                    Type::Error
                }
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        left: Type,
        right: Type,
        hint: MixedSignHint,
        span: Span,
    ) -> Type {
        if left.is_error() || right.is_error() {
            return if op.is_arithmetic() { Type::Error } else { Type::Bool };
        }

        if op.is_arithmetic() {
            if op == BinaryOp::Remainder && (left != Type::Int || right != Type::Int) {
                self.error(
                    "type_mismatch",
                    "Operator `%` expects int operands.".to_owned(),
                    span,
                );
                return Type::Error;
            }
            if left == right && left.is_numeric() {
                return left;
            }
            if left.is_numeric() && right.is_numeric() {
                self.error(
                    "type_mismatch",
                    format!(
                        "Operator `{}` mixes {} and {}; cast one side explicitly.",
                        op, left, right
                    ),
                    span,
                );
            } else {
                self.error(
                    "type_mismatch",
                    format!("Operator `{}` expects numeric operands.", op),
                    span,
                );
            }
            return Type::Error;
        }

        if op.is_relational() {
            if left == right && left.is_numeric() {
                if let MixedSignHint::NegativeAgainstNonNegative = hint {
                    self.warn(
                        "mixed_sign_comparison",
                        "Comparing a never-negative value against a negative constant."
                            .to_owned(),
                        span,
                    );
                }
                return Type::Bool;
            }
            if left.is_numeric() && right.is_numeric() {
                self.error(
                    "type_mismatch",
                    format!(
                        "Comparison mixes {} and {}; cast one side explicitly.",
                        left, right
                    ),
                    span,
                );
            } else {
                self.error(
                    "type_mismatch",
                    format!("Operator `{}` expects numeric operands.", op),
                    span,
                );
            }
            return Type::Bool;
        }

        // Equality.
        if left == right && left.is_printable() {
            return Type::Bool;
        }
        self.error(
            "type_mismatch",
            format!("Cannot compare {} with {}.", left, right),
            span,
        );
        Type::Bool
    }

    fn infer_call(&mut self, callee: &str, args: &mut [Expr], span: Span) -> Type {
        if callee == "max" {
            if args.len() != 2 {
                self.error(
                    "arity_mismatch",
                    "`max` expects 2 arguments.".to_owned(),
                    span,
                );
                return Type::Error;
            }
            let a = self.infer_expr(&mut args[0]);
            let b = self.infer_expr(&mut args[1]);
            if a.is_error() || b.is_error() {
                return Type::Error;
            }
            if a == b && a.is_numeric() {
                return a;
            }
            self.error(
                "type_mismatch",
                "`max` expects two numeric arguments of the same type.".to_owned(),
                span,
            );
            return Type::Error;
        }

        if callee == "len" {
            if args.len() != 1 {
                self.error(
                    "arity_mismatch",
                    "`len` expects 1 argument.".to_owned(),
                    span,
                );
                return Type::Error;
            }
            let ty = self.infer_expr(&mut args[0]);
            if !ty.is_error() && ty != Type::Text && !ty.is_array() {
                self.error(
                    "type_mismatch",
                    "`len` supports text/array arguments.".to_owned(),
                    span,
                );
            }
            return Type::Int;
        }

        let Some(sig) = self.functions.get(callee).cloned() else {
            let mut candidates: Vec<String> =
                BUILTINS.iter().map(|s| s.to_string()).collect();
            candidates.extend(self.functions.keys().cloned());
            let hint = match did_you_mean(callee, &candidates) {
                Some(suggestion) => format!(" Did you mean `{}`?", suggestion),
                None => String::new(),
            };
            self.error(
                "undeclared_function",
                format!("Function `{}` is not declared.{}", callee, hint),
                span,
            );
            for arg in args {
                self.infer_expr(arg);
            }
            return Type::Error;
        };

        if args.len() != sig.params.len() {
            self.error(
                "arity_mismatch",
                format!(
                    "Function `{}` expects {} argument(s), got {}.",
                    callee,
                    sig.params.len(),
                    args.len()
                ),
                span,
            );
        }
        for (arg, (_, param_type)) in args.iter_mut().zip(sig.params.iter()) {
            let arg_type = self.infer_expr(arg);
            if !assignable(param_type, &arg_type) {
                self.error(
                    "type_mismatch",
                    format!(
                        "Argument type mismatch: expected {}, got {}.",
                        param_type, arg_type
                    ),
                    span,
                );
            }
        }
        sig.return_type
    }

    fn field_type(&mut self, base_type: Type, field: &str, span: Span) -> Type {
        match base_type {
            Type::Record(name) => {
                let Some(record) = self.records.iter().find(|r| r.name == name) else {
                    return Type::Error;
                };
                match record.field_type(field) {
                    Some(ty) => ty.clone(),
                    None => {
                        self.error(
                            "undeclared_variable",
                            format!("Type `{}` has no field `{}`.", name, field),
                            span,
                        );
                        Type::Error
                    }
                }
            }
            Type::Error => Type::Error,
            other => {
                self.error(
                    "type_mismatch",
                    format!("Member access requires kaksha/struct, got {}.", other),
                    span,
                );
                Type::Error
            }
        }
    }

    fn resolve_type(&mut self, type_name: &TypeName, allow_void: bool, span: Span) -> Type {
        match type_name {
            TypeName::Int => Type::Int,
            TypeName::Float => Type::Float,
            TypeName::Bool => Type::Bool,
            TypeName::Text => Type::Text,
            TypeName::Void => {
                if allow_void {
                    Type::Void
                } else {
                    self.error(
                        "type_mismatch",
                        "`khali` type not allowed here.".to_owned(),
                        span,
                    );
                    Type::Error
                }
            }
            TypeName::Named(name) => {
                if self.records.iter().any(|r| &r.name == name) {
                    Type::Record(name.clone())
                } else {
                    let candidates: Vec<String> = ["bhai", "decimal", "bool", "text"]
                        .iter()
                        .map(|s| s.to_string())
                        .chain(self.records.iter().map(|r| r.name.clone()))
                        .collect();
                    let hint = match did_you_mean(name, &candidates) {
                        Some(suggestion) => format!(" Did you mean `{}`?", suggestion),
                        None => String::new(),
                    };
                    self.error("unknown_type", format!("Unknown type `{}`.{}", name, hint), span);
                    Type::Error
                }
            }
        }
    }

    fn close_scope(&mut self) {
        let (label, symbols) = self.table.pop_scope();
        let mut snapshot = vec![];
        for (name, symbol) in symbols {
            match symbol.kind {
                SymbolKind::Param => {
                    if symbol.reads == 0 {
                        self.warn(
                            "unused_parameter",
                            format!("Parameter `{}` is never read.", name),
                            symbol.span,
                        );
                    }
                }
                SymbolKind::Var => {
                    if symbol.reads == 0 && symbol.writes == 0 {
                        self.warn(
                            "unused_variable",
                            format!("Variable `{}` declared but never used.", name),
                            symbol.span,
                        );
                    } else if symbol.reads == 0 {
                        self.warn(
                            "never_read",
                            format!("Variable `{}` is written but never read.", name),
                            symbol.span,
                        );
                    }
                }
            }
            snapshot.push((name, symbol.ty));
        }
        self.scope_snapshots.push((label, snapshot));
    }
}

/// Assignment compatibility: identical types only (plus the error sponge).
/// The explicit-cast rule is the whole point, so no numeric widening here.
fn assignable(dst: &Type, src: &Type) -> bool {
    dst.is_error() || src.is_error() || dst == src
}

/// Structural hint for the mixed-sign warning: a relational comparison of a
/// never-negative quantity (`len(...)` result) with a negative constant is
/// always decided.
enum MixedSignHint {
    None,
    NegativeAgainstNonNegative,
}

impl MixedSignHint {
    fn of(left: &Expr, right: &Expr) -> Self {
        let negative = |e: &Expr| matches!(eval_constant(e), Some(ConstValue::Int(v)) if v < 0);
        let non_negative = |e: &Expr| matches!(&e.kind, ExprKind::Call { callee, .. } if callee == "len");
        if (negative(left) && non_negative(right)) || (negative(right) && non_negative(left)) {
            Self::NegativeAgainstNonNegative
        } else {
            Self::None
        }
    }
}

fn eval_constant(expr: &Expr) -> Option<ConstValue> {
    use ConstValue::*;
    match &expr.kind {
        ExprKind::IntLit(v) => Some(Int(*v)),
        ExprKind::FloatLit(v) => Some(Float(*v)),
        ExprKind::BoolLit(v) => Some(Bool(*v)),
        ExprKind::StrLit(v) => Some(Text(v.clone())),
        ExprKind::Unary { op, operand } => {
            let value = eval_constant(operand)?;
            match (op, value) {
                (UnaryOp::Negate, Int(v)) => Some(Int(-v)),
                (UnaryOp::Negate, Float(v)) => Some(Float(-v)),
                (UnaryOp::Not, Bool(v)) => Some(Bool(!v)),
                _ => None,
            }
        }
        ExprKind::Cast { target, operand } => {
            let value = eval_constant(operand)?;
            match (target, value) {
                (TypeName::Int, Int(v)) => Some(Int(v)),
                (TypeName::Int, Float(v)) => Some(Int(v as i64)),
                (TypeName::Int, Bool(v)) => Some(Int(v as i64)),
                (TypeName::Float, Int(v)) => Some(Float(v as f64)),
                (TypeName::Float, Float(v)) => Some(Float(v)),
                (TypeName::Float, Bool(v)) => Some(Float(v as i64 as f64)),
                (TypeName::Bool, Int(v)) => Some(Bool(v != 0)),
                (TypeName::Bool, Float(v)) => Some(Bool(v != 0.0)),
                (TypeName::Bool, Bool(v)) => Some(Bool(v)),
                _ => None,
            }
        }
        ExprKind::Logical { op, left, right } => {
            let left = eval_constant(left)?;
            let right = eval_constant(right)?;
            match op {
                LogicalOp::And => Some(Bool(left.truthy() && right.truthy())),
                LogicalOp::Or => Some(Bool(left.truthy() || right.truthy())),
            }
        }
        ExprKind::Binary { op, left, right } => {
            let left = eval_constant(left)?;
            let right = eval_constant(right)?;
            eval_const_binary(*op, left, right)
        }
        _ => None,
    }
}

fn eval_const_binary(op: BinaryOp, left: ConstValue, right: ConstValue) -> Option<ConstValue> {
    use BinaryOp::*;
    use ConstValue::*;

    if let (Int(a), Int(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        return match op {
            Add => Some(Int(a.wrapping_add(b))),
            Subtract => Some(Int(a.wrapping_sub(b))),
            Multiply => Some(Int(a.wrapping_mul(b))),
            Divide => (b != 0).then(|| Int(a.wrapping_div(b))),
            Remainder => (b != 0).then(|| Int(a.wrapping_rem(b))),
            Less => Some(Bool(a < b)),
            LessEqual => Some(Bool(a <= b)),
            Greater => Some(Bool(a > b)),
            GreaterEqual => Some(Bool(a >= b)),
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
        };
    }

    if let (Float(a), Float(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        return match op {
            Add => Some(Float(a + b)),
            Subtract => Some(Float(a - b)),
            Multiply => Some(Float(a * b)),
            Divide => (b != 0.0).then(|| Float(a / b)),
            Remainder => None,
            Less => Some(Bool(a < b)),
            LessEqual => Some(Bool(a <= b)),
            Greater => Some(Bool(a > b)),
            GreaterEqual => Some(Bool(a >= b)),
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
        };
    }

    if let (Bool(a), Bool(b)) = (&left, &right) {
        return match op {
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            _ => None,
        };
    }

    if let (Text(a), Text(b)) = (&left, &right) {
        return match op {
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            _ => None,
        };
    }

    None
}

/// Closest-match suggestion over the candidate set; a normalized edit
/// distance stands in for the usual sequence matcher, same 0.72 cutoff.
fn did_you_mean(name: &str, candidates: &[String]) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut best: Option<(f64, &str)> = None;
    let mut sorted: Vec<&str> = candidates.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    for candidate in sorted {
        if candidate == name {
            continue;
        }
        let distance = edit_distance(name, candidate);
        let longest = name.len().max(candidate.len());
        let score = 1.0 - (distance as f64 / longest as f64);
        if score >= 0.72 && best.map_or(true, |(s, _)| score > s) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, candidate)| candidate.to_owned())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex_source;
    use crate::parser::parse_tokens;

    fn analyze(source: &str) -> (Program, SemanticResult, DiagnosticSink) {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let mut program = parse_tokens(tokens, &mut sink);
        assert!(!sink.has_errors(), "syntax errors in test source");
        let result = analyze_program(&mut program, &mut sink);
        (program, result, sink)
    }

    fn error_codes(sink: &DiagnosticSink) -> Vec<&'static str> {
        sink.sorted().iter().map(|d| d.code).collect()
    }

    fn warning_codes(sink: &DiagnosticSink) -> Vec<&'static str> {
        sink.warnings().map(|d| d.code).collect()
    }

    #[test]
    fn test_every_expression_gets_a_type() {
        let (program, _, sink) =
            analyze("shuru\nbhai x = 1 + 2\nbol(x)\nnikal 0\nbass");
        assert!(!sink.has_errors());
        let StmtKind::VarDecl { init: Some(init), .. } = &program.main[0].kind else {
            panic!("expected init");
        };
        assert_eq!(init.resolved_type(), Type::Int);
    }

    #[test]
    fn test_int_float_mix_requires_cast() {
        let (_, _, sink) = analyze("shuru\ndecimal d = 3 / 2.0\nbass");
        assert!(error_codes(&sink).contains(&"type_mismatch"));
        let (_, _, sink) = analyze("shuru\ndecimal d = decimal(3) / 2.0\nbol(d)\nbass");
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_conditions_must_be_bool() {
        let (_, _, sink) = analyze("shuru\nbhai x = 1\nagar (x) { bol(x) }\nbass");
        assert!(error_codes(&sink).contains(&"invalid_condition"));
        let (_, _, sink) = analyze("shuru\nbhai x = 1\nagar (x > 0) { bol(x) }\nbass");
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_text_concatenation_rejected() {
        let (_, _, sink) = analyze("shuru\ntext a = \"x\"\ntext b = \"y\"\nbol(a + b)\nbass");
        assert!(error_codes(&sink).contains(&"type_mismatch"));
    }

    #[test]
    fn test_undeclared_with_suggestion() {
        let (_, _, sink) = analyze("shuru\nbhai score = 10\nbol(scor)\nnikal 0\nbass");
        let diag = sink.sorted().into_iter().find(|d| d.code == "undeclared_variable").unwrap();
        assert!(diag.message.contains("Did you mean `score`?"));
    }

    #[test]
    fn test_function_arity_and_argument_types() {
        let (_, _, sink) = analyze(
            "kaam bhai add(bhai a, bhai b) {\nnikal a + b\n}\nshuru\nbol(add(1))\nbass",
        );
        assert!(error_codes(&sink).contains(&"arity_mismatch"));
        let (_, _, sink) = analyze(
            "kaam bhai add(bhai a, bhai b) {\nnikal a + b\n}\nshuru\nbol(add(1, 2.5))\nbass",
        );
        assert!(error_codes(&sink).contains(&"type_mismatch"));
    }

    #[test]
    fn test_void_function_rejects_value_return() {
        let (_, _, sink) = analyze("kaam khali hello() {\nnikal 1\n}\nshuru\nnikal 0\nbass");
        assert!(error_codes(&sink).contains(&"return_type"));
    }

    #[test]
    fn test_switch_duplicate_case_rejected() {
        let (_, _, sink) = analyze(
            "shuru\nbhai x = 2\nswitch (x) {\ncase 1:\nbol(1)\ncase 1:\nbol(2)\n}\nbass",
        );
        assert!(error_codes(&sink).contains(&"duplicate_case"));
    }

    #[test]
    fn test_switch_on_text_with_constant_labels() {
        let (_, _, sink) = analyze(
            "shuru\ntext t = \"hi\"\nswitch (t) {\ncase \"hi\":\nbol(1)\ncase \"bye\":\nbol(2)\n}\nbass",
        );
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_non_constant_case_label_rejected() {
        let (_, _, sink) = analyze(
            "shuru\nbhai x = 2\nbhai y = 3\nswitch (x) {\ncase y:\nbol(1)\n}\nbass",
        );
        assert!(error_codes(&sink).contains(&"invalid_case_label"));
    }

    #[test]
    fn test_break_continue_placement() {
        let (_, _, sink) = analyze("shuru\ntod\nbass");
        assert!(error_codes(&sink).contains(&"break_outside_loop"));
        let (_, _, sink) = analyze("shuru\nswitch (1) {\ncase 1:\njari\n}\nbass");
        assert!(error_codes(&sink).contains(&"continue_outside_loop"));
    }

    #[test]
    fn test_struct_field_checks() {
        let (_, _, sink) = analyze(
            "struct User {\nbhai age\n}\nshuru\nstruct User u\nu.age = 21\nbol(u.age)\nbass",
        );
        assert!(!sink.has_errors());
        let (_, _, sink) = analyze(
            "struct User {\nbhai age\n}\nshuru\nstruct User u\nu.height = 9\nbass",
        );
        assert!(error_codes(&sink).contains(&"undeclared_variable"));
    }

    #[test]
    fn test_warning_set() {
        let (_, _, sink) = analyze(
            "shuru\nbhai unused = 1\nbhai sunk = 2\nsunk = 3\nbhai x = 4\nagar (sach) {\nbhai x = 5\nbol(x)\nnikal 0\nbhai dead = 7\n}\nbol(x)\nbass",
        );
        let warnings = warning_codes(&sink);
        assert!(warnings.contains(&"unused_variable"));
        assert!(warnings.contains(&"never_read"));
        assert!(warnings.contains(&"shadowed_variable"));
        assert!(warnings.contains(&"constant_condition"));
        assert!(warnings.contains(&"unreachable_code"));
    }

    #[test]
    fn test_mixed_sign_comparison_warning() {
        let (_, _, sink) = analyze(
            "shuru\ntext t = \"abc\"\nagar (len(t) < -1) { bol(1) }\nbass",
        );
        assert!(warning_codes(&sink).contains(&"mixed_sign_comparison"));
    }

    #[test]
    fn test_unused_parameter_warning() {
        let (_, _, sink) = analyze(
            "kaam bhai same(bhai a, bhai b) {\nnikal a\n}\nshuru\nbol(same(1, 2))\nbass",
        );
        assert!(warning_codes(&sink).contains(&"unused_parameter"));
    }

    #[test]
    fn test_signatures_exported_for_codegen() {
        let (_, result, _) = analyze(
            "struct Box {\nbhai w\nbhai h\n}\nkaam decimal twice(decimal x) {\nnikal x * 2.0\n}\nshuru\nnikal 0\nbass",
        );
        let sig = result.signatures.functions.get("twice").unwrap();
        assert_eq!(sig.return_type, Type::Float);
        let record = result.signatures.record("Box").unwrap();
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.fields[0].0, "w");
    }

    #[test]
    fn test_error_subtree_does_not_cascade() {
        let (_, _, sink) = analyze("shuru\nbhai x = nope + 1\nbhai y = x + 2\nbol(y)\nbass");
        assert_eq!(sink.error_count(), 1);
    }
}
