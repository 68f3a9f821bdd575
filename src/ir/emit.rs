use std::collections::{HashMap, HashSet};

use super::instruction::*;
use crate::common::Span;
use crate::diagnostics::DiagnosticSink;
use crate::parser::ast::{self, Block, Expr, ExprKind, Program, Stmt, StmtKind, TypeName};
use crate::semantic::{Signatures, Type};

/// Lower the typed AST to three-address IR, one function at a time with
/// `__main__` last. The AST is assumed error-free (the driver gates on the
/// sink); any hole found here is an internal compiler error, reported once
/// and patched over so the dump stays usable.
pub fn lower_program(
    program: &Program,
    signatures: &Signatures,
    sink: &mut DiagnosticSink,
) -> IrProgram {
    let mut functions = vec![];

    for function in &program.functions {
        let mut lowerer = Lowerer::new(signatures, sink);
        let return_type = signatures
            .functions
            .get(&function.name)
            .map(|sig| sig.return_type.clone())
            .unwrap_or(Type::Int);
        functions.push(lowerer.emit_function(
            &function.name,
            &function.params,
            &function.body.statements,
            return_type,
        ));
    }

    let mut lowerer = Lowerer::new(signatures, sink);
    functions.push(lowerer.emit_function(IrProgram::MAIN, &[], &program.main, Type::Int));

    IrProgram { functions }
}

struct LoopContext {
    break_label: Label,
    continue_label: Option<Label>,
}

struct Lowerer<'a> {
    signatures: &'a Signatures,
    sink: &'a mut DiagnosticSink,
    instructions: Vec<Instruction>,
    temp_types: Vec<IrType>,
    locals: Vec<(String, IrType)>,
    scopes: Vec<HashMap<String, String>>,
    used_names: HashSet<String>,
    rename_counter: usize,
    label_counter: usize,
    loop_stack: Vec<LoopContext>,
}

impl<'a> Lowerer<'a> {
    fn new(signatures: &'a Signatures, sink: &'a mut DiagnosticSink) -> Self {
        Self {
            signatures,
            sink,
            instructions: vec![],
            temp_types: vec![],
            locals: vec![],
            scopes: vec![],
            used_names: HashSet::new(),
            rename_counter: 0,
            label_counter: 0,
            loop_stack: vec![],
        }
    }

    fn emit_function(
        &mut self,
        name: &str,
        params: &[ast::Param],
        statements: &[Stmt],
        return_type: Type,
    ) -> IrFunction {
        self.push_scope();
        let mut param_names = vec![];
        for param in params {
            let ty = self
                .signatures
                .functions
                .get(name)
                .and_then(|sig| {
                    sig.params
                        .iter()
                        .find(|(n, _)| n == &param.name)
                        .map(|(_, t)| t.clone())
                })
                .unwrap_or(Type::Int);
            param_names.push(self.declare_var(&param.name, self.type_to_ir(&ty)));
        }

        for stmt in statements {
            self.lower_stmt(stmt);
        }
        self.pop_scope();

        if !matches!(self.instructions.last(), Some(Instruction::Return(_))) {
            let fallback = self.fallback_return(&return_type);
            self.emit(Instruction::Return(fallback));
        }

        IrFunction {
            name: name.to_owned(),
            params: param_names,
            body: std::mem::take(&mut self.instructions),
            temp_types: std::mem::take(&mut self.temp_types),
            locals: std::mem::take(&mut self.locals),
        }
    }

    fn fallback_return(&mut self, return_type: &Type) -> Option<Value> {
        match return_type {
            Type::Void => None,
            Type::Int | Type::Error => Some(Constant::Int(0).into()),
            Type::Float => Some(Constant::Float(0.0).into()),
            Type::Bool => Some(Constant::Bool(false).into()),
            Type::Text => Some(Constant::Str(String::new()).into()),
            Type::Record(name) => {
                // A zero-initialized record slot stands in for the missing
                // return value.
                let slot = self.new_temp(IrType::Record(name.clone()));
                Some(slot.into())
            }
            Type::Array(..) => None,
        }
    }

    // ---- plumbing ------------------------------------------------------

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn new_temp(&mut self, ty: IrType) -> Place {
        let id = self.temp_types.len();
        self.temp_types.push(ty);
        Place::Temp(id)
    }

    fn new_label(&mut self, tag: &'static str) -> Label {
        let index = self.label_counter;
        self.label_counter += 1;
        Label { tag, index }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Bind a source name in the current scope, renaming when an earlier
    /// scope already claimed the spelling so the flat function namespace
    /// stays collision-free.
    fn declare_var(&mut self, source_name: &str, ty: IrType) -> String {
        let mut internal = source_name.to_owned();
        while !self.used_names.insert(internal.clone()) {
            internal = format!("{}__{}", source_name, self.rename_counter);
            self.rename_counter += 1;
        }
        self.scopes
            .last_mut()
            .expect("scope stack is never empty during lowering")
            .insert(source_name.to_owned(), internal.clone());
        self.locals.push((internal.clone(), ty));
        internal
    }

    fn resolve_var(&self, source_name: &str) -> String {
        for scope in self.scopes.iter().rev() {
            if let Some(internal) = scope.get(source_name) {
                return internal.clone();
            }
        }
        source_name.to_owned()
    }

    fn ice(&mut self, span: Span, detail: &str) {
        self.sink.error(
            "internal_error",
            format!("internal compiler error in IR builder: {}", detail),
            span,
        );
    }

    fn type_to_ir(&self, ty: &Type) -> IrType {
        match ty {
            Type::Int | Type::Error => IrType::Scalar(ScalarType::Int),
            Type::Float => IrType::Scalar(ScalarType::Float),
            Type::Bool => IrType::Scalar(ScalarType::Bool),
            Type::Text => IrType::Scalar(ScalarType::Text),
            Type::Void => IrType::Scalar(ScalarType::Int),
            Type::Record(name) => IrType::Record(name.clone()),
            Type::Array(element, size) => {
                IrType::Array(Box::new(self.type_to_ir(element)), *size)
            }
        }
    }

    fn decl_type(&self, type_name: &TypeName, array_size: Option<usize>) -> IrType {
        let base = match type_name {
            TypeName::Int | TypeName::Void => IrType::Scalar(ScalarType::Int),
            TypeName::Float => IrType::Scalar(ScalarType::Float),
            TypeName::Bool => IrType::Scalar(ScalarType::Bool),
            TypeName::Text => IrType::Scalar(ScalarType::Text),
            TypeName::Named(name) => IrType::Record(name.clone()),
        };
        match array_size {
            Some(size) => IrType::Array(Box::new(base), size),
            None => base,
        }
    }

    fn scalar_of(&mut self, expr: &Expr) -> ScalarType {
        match expr.resolved_type() {
            Type::Int => ScalarType::Int,
            Type::Float => ScalarType::Float,
            Type::Bool => ScalarType::Bool,
            Type::Text => ScalarType::Text,
            other => {
                self.ice(expr.span, &format!("expected scalar type, found {}", other));
                ScalarType::Int
            }
        }
    }

    fn expr_ir_type(&mut self, expr: &Expr) -> IrType {
        let ty = expr.resolved_type();
        self.type_to_ir(&ty)
    }

    /// Force a value into a place; constants get copied into a fresh temp.
    fn as_place(&mut self, value: Value, ty: IrType) -> Place {
        match value {
            Value::Place(place) => place,
            constant => {
                let temp = self.new_temp(ty);
                self.emit(Instruction::Copy(constant, temp.clone()));
                temp
            }
        }
    }

    // ---- statements ----------------------------------------------------

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl {
                type_name,
                name,
                array_size,
                init,
            } => {
                let ty = self.decl_type(type_name, *array_size);
                let internal = self.declare_var(name, ty);
                if let Some(init) = init {
                    let value = self.lower_expr(init);
                    self.emit(Instruction::Copy(value, Place::Var(internal)));
                }
            }
            StmtKind::Assign { target, value } => {
                let rhs = self.lower_expr(value);
                self.store_into(target, rhs);
            }
            StmtKind::If {
                condition,
                then_block,
                else_block,
            } => self.lower_if(condition, then_block, else_block.as_ref()),
            StmtKind::While { condition, body } => self.lower_while(condition, body),
            StmtKind::For {
                init,
                condition,
                post,
                body,
            } => self.lower_for(init.as_deref(), condition.as_ref(), post.as_deref(), body),
            StmtKind::DoWhile { body, condition } => self.lower_do_while(body, condition),
            StmtKind::Switch {
                discriminant,
                cases,
                default_arm,
            } => self.lower_switch(discriminant, cases, default_arm.as_ref()),
            StmtKind::Break => match self.loop_stack.last() {
                Some(context) => {
                    let label = context.break_label;
                    self.emit(Instruction::Jump(label));
                }
                None => self.ice(stmt.span, "break outside loop survived analysis"),
            },
            StmtKind::Continue => {
                let target = self
                    .loop_stack
                    .iter()
                    .rev()
                    .find_map(|context| context.continue_label);
                match target {
                    Some(label) => self.emit(Instruction::Jump(label)),
                    None => self.ice(stmt.span, "continue outside loop survived analysis"),
                }
            }
            StmtKind::Print(value) => {
                let scalar = self.scalar_of(value);
                let lowered = self.lower_expr(value);
                self.emit(Instruction::Print(lowered, scalar));
            }
            StmtKind::Return(value) => {
                let lowered = value.as_ref().map(|v| self.lower_expr(v));
                self.emit(Instruction::Return(lowered));
            }
            StmtKind::Expr(expr) => {
                if let ExprKind::Call { callee, args } = &expr.kind {
                    self.lower_call(callee, args, expr, false);
                } else {
                    self.lower_expr(expr);
                }
            }
            StmtKind::Block(block) => {
                self.push_scope();
                for inner in &block.statements {
                    self.lower_stmt(inner);
                }
                self.pop_scope();
            }
            StmtKind::Error => {}
        }
    }

    fn lower_if(&mut self, condition: &Expr, then_block: &Block, else_block: Option<&Block>) {
        let then_label = self.new_label("then");
        let else_label = self.new_label("else");

        match else_block {
            Some(else_block) => {
                let end_label = self.new_label("end_if");
                self.lower_cond_jump(condition, then_label, else_label);
                self.emit(Instruction::Label(then_label));
                self.lower_block_scoped(then_block);
                self.emit(Instruction::Jump(end_label));
                self.emit(Instruction::Label(else_label));
                self.lower_block_scoped(else_block);
                self.emit(Instruction::Label(end_label));
            }
            None => {
                self.lower_cond_jump(condition, then_label, else_label);
                self.emit(Instruction::Label(then_label));
                self.lower_block_scoped(then_block);
                self.emit(Instruction::Label(else_label));
            }
        }
    }

    /// Loops get a header holding the test, the body, and a latch; `jari`
    /// jumps to the latch (the header when there is no post clause) and
    /// `tod` to the exit.
    fn lower_while(&mut self, condition: &Expr, body: &Block) {
        let header = self.new_label("loop_header");
        let body_label = self.new_label("loop_body");
        let end = self.new_label("loop_end");

        self.emit(Instruction::Label(header));
        self.lower_cond_jump(condition, body_label, end);
        self.emit(Instruction::Label(body_label));
        self.loop_stack.push(LoopContext {
            break_label: end,
            continue_label: Some(header),
        });
        self.lower_block_scoped(body);
        self.loop_stack.pop();
        self.emit(Instruction::Jump(header));
        self.emit(Instruction::Label(end));
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        condition: Option<&Expr>,
        post: Option<&Stmt>,
        body: &Block,
    ) {
        let header = self.new_label("loop_header");
        let body_label = self.new_label("loop_body");
        let latch = self.new_label("loop_latch");
        let end = self.new_label("loop_end");

        self.push_scope();
        if let Some(init) = init {
            self.lower_stmt(init);
        }
        self.emit(Instruction::Label(header));
        if let Some(condition) = condition {
            self.lower_cond_jump(condition, body_label, end);
        }
        self.emit(Instruction::Label(body_label));
        self.loop_stack.push(LoopContext {
            break_label: end,
            continue_label: Some(latch),
        });
        self.lower_block_scoped(body);
        self.loop_stack.pop();
        self.emit(Instruction::Label(latch));
        if let Some(post) = post {
            self.lower_stmt(post);
        }
        self.emit(Instruction::Jump(header));
        self.emit(Instruction::Label(end));
        self.pop_scope();
    }

    fn lower_do_while(&mut self, body: &Block, condition: &Expr) {
        let body_label = self.new_label("loop_body");
        let latch = self.new_label("loop_latch");
        let end = self.new_label("loop_end");

        self.emit(Instruction::Label(body_label));
        self.loop_stack.push(LoopContext {
            break_label: end,
            continue_label: Some(latch),
        });
        self.lower_block_scoped(body);
        self.loop_stack.pop();
        self.emit(Instruction::Label(latch));
        self.lower_cond_jump(condition, body_label, end);
        self.emit(Instruction::Label(end));
    }

    /// Ordered compare-and-branch chain; cases never fall through, each
    /// arm jumps to the exit on completion.
    fn lower_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[ast::CaseArm],
        default_arm: Option<&Block>,
    ) {
        let scalar = self.expr_ir_type(discriminant);
        let disc_value = self.lower_expr(discriminant);
        let disc_place = self.as_place(disc_value, scalar);

        let end = self.new_label("switch_end");
        let default_label = if default_arm.is_some() {
            self.new_label("switch_default")
        } else {
            end
        };
        let case_labels: Vec<Label> = cases.iter().map(|_| self.new_label("switch_case")).collect();

        for (case, label) in cases.iter().zip(&case_labels) {
            let case_value = self.lower_expr(&case.value);
            let matched = self.new_temp(IrType::Scalar(ScalarType::Bool));
            self.emit(Instruction::Binary(
                BinaryOp::Equal,
                disc_place.clone().into(),
                case_value,
                matched.clone(),
            ));
            self.emit(Instruction::JumpIfNotZero(matched.into(), *label));
        }
        self.emit(Instruction::Jump(default_label));

        self.loop_stack.push(LoopContext {
            break_label: end,
            continue_label: None,
        });
        for (case, label) in cases.iter().zip(&case_labels) {
            self.emit(Instruction::Label(*label));
            self.lower_block_scoped(&case.body);
            self.emit(Instruction::Jump(end));
        }
        if let Some(block) = default_arm {
            self.emit(Instruction::Label(default_label));
            self.lower_block_scoped(block);
        }
        self.loop_stack.pop();
        self.emit(Instruction::Label(end));
    }

    fn lower_block_scoped(&mut self, block: &Block) {
        self.push_scope();
        for stmt in &block.statements {
            self.lower_stmt(stmt);
        }
        self.pop_scope();
    }

    /// Write `value` into an l-value. Nested field paths load the
    /// intermediate record into a temp, update it, and write it back.
    fn store_into(&mut self, target: &Expr, value: Value) {
        match &target.kind {
            ExprKind::Name(name) => {
                let internal = self.resolve_var(name);
                self.emit(Instruction::Copy(value, Place::Var(internal)));
            }
            ExprKind::Index { base, index } => {
                let ExprKind::Name(base_name) = &base.kind else {
                    self.ice(target.span, "array store through a non-variable base");
                    return;
                };
                let index_value = self.lower_expr(index);
                self.emit(Instruction::IndexStore {
                    base: Place::Var(self.resolve_var(base_name)),
                    index: index_value,
                    value,
                });
            }
            ExprKind::Field { base, name } => {
                if let ExprKind::Name(base_name) = &base.kind {
                    self.emit(Instruction::FieldStore {
                        base: Place::Var(self.resolve_var(base_name)),
                        field: name.clone(),
                        value,
                    });
                } else {
                    let base_ty = self.expr_ir_type(base);
                    let loaded = self.lower_expr(base);
                    let slot = self.as_place(loaded, base_ty);
                    self.emit(Instruction::FieldStore {
                        base: slot.clone(),
                        field: name.clone(),
                        value,
                    });
                    self.store_into(base, slot.into());
                }
            }
            _ => self.ice(target.span, "invalid store target survived analysis"),
        }
    }

    // ---- expressions ---------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::IntLit(v) => Constant::Int(*v).into(),
            ExprKind::FloatLit(v) => Constant::Float(*v).into(),
            ExprKind::BoolLit(v) => Constant::Bool(*v).into(),
            ExprKind::StrLit(v) => Constant::Str(v.clone()).into(),
            ExprKind::Name(name) => Place::Var(self.resolve_var(name)).into(),
            ExprKind::Unary { op, operand } => {
                let ir_op = match op {
                    ast::UnaryOp::Negate => UnaryOp::Negate,
                    ast::UnaryOp::Not => UnaryOp::Not,
                };
                let ty = self.expr_ir_type(expr);
                let value = self.lower_expr(operand);
                let dest = self.new_temp(ty);
                self.emit(Instruction::Unary(ir_op, value, dest.clone()));
                dest.into()
            }
            ExprKind::Binary { op, left, right } => {
                let ty = self.expr_ir_type(expr);
                let lhs = self.lower_expr(left);
                let rhs = self.lower_expr(right);
                let dest = self.new_temp(ty);
                self.emit(Instruction::Binary(
                    binary_op(*op),
                    lhs,
                    rhs,
                    dest.clone(),
                ));
                dest.into()
            }
            ExprKind::Logical { .. } => self.lower_bool_value(expr),
            ExprKind::Cast { operand, .. } => {
                let from = operand.resolved_type();
                let to = expr.resolved_type();
                let value = self.lower_expr(operand);
                match cast_op(&from, &to) {
                    Some(op) => {
                        let dest = self.new_temp(self.type_to_ir(&to));
                        self.emit(Instruction::Cast(op, value, dest.clone()));
                        dest.into()
                    }
                    // Identity casts collapse to the operand itself.
                    None => value,
                }
            }
            ExprKind::Call { callee, args } => self
                .lower_call(callee, args, expr, true)
                .unwrap_or_else(|| Constant::Int(0).into()),
            ExprKind::Index { base, index } => {
                let element = self.expr_ir_type(expr);
                let base_ty = self.expr_ir_type(base);
                let base_value = self.lower_expr(base);
                let base_place = self.as_place(base_value, base_ty);
                let index_value = self.lower_expr(index);
                let dest = self.new_temp(element);
                self.emit(Instruction::IndexLoad {
                    base: base_place,
                    index: index_value,
                    dest: dest.clone(),
                });
                dest.into()
            }
            ExprKind::Field { base, name } => {
                let field_ty = self.expr_ir_type(expr);
                let base_ty = self.expr_ir_type(base);
                let base_value = self.lower_expr(base);
                let base_place = self.as_place(base_value, base_ty);
                let dest = self.new_temp(field_ty);
                self.emit(Instruction::FieldLoad {
                    base: base_place,
                    field: name.clone(),
                    dest: dest.clone(),
                });
                dest.into()
            }
            ExprKind::Input => {
                let dest = self.new_temp(IrType::Scalar(ScalarType::Int));
                self.emit(Instruction::Read(dest.clone()));
                dest.into()
            }
            ExprKind::Increment { op, fixity, target } => self.lower_increment(*op, *fixity, target),
            ExprKind::Error => {
                self.ice(expr.span, "error expression survived analysis");
                Constant::Int(0).into()
            }
        }
    }

    /// Post forms yield the pre-update value, pre forms the post-update
    /// value; both write the target exactly once.
    fn lower_increment(
        &mut self,
        op: ast::IncDecOp,
        fixity: ast::Fixity,
        target: &Expr,
    ) -> Value {
        let ty = target.resolved_type();
        let one: Value = match ty {
            Type::Float => Constant::Float(1.0).into(),
            _ => Constant::Int(1).into(),
        };
        let ir_ty = self.type_to_ir(&ty);
        let ir_op = match op {
            ast::IncDecOp::Increment => BinaryOp::Add,
            ast::IncDecOp::Decrement => BinaryOp::Subtract,
        };

        let current = self.lower_expr(target);
        let updated = self.new_temp(ir_ty.clone());

        let result: Value = match fixity {
            ast::Fixity::Post => {
                let saved = self.new_temp(ir_ty);
                self.emit(Instruction::Copy(current.clone(), saved.clone()));
                self.emit(Instruction::Binary(ir_op, current, one, updated.clone()));
                self.store_into(target, updated.into());
                saved.into()
            }
            ast::Fixity::Pre => {
                self.emit(Instruction::Binary(ir_op, current, one, updated.clone()));
                self.store_into(target, updated.clone().into());
                updated.into()
            }
        };
        result
    }

    fn lower_call(
        &mut self,
        callee: &str,
        args: &[Expr],
        expr: &Expr,
        want_result: bool,
    ) -> Option<Value> {
        if callee == "len" {
            let arg = &args[0];
            match arg.resolved_type() {
                Type::Array(_, size) => return Some(Constant::Int(size as i64).into()),
                _ => {
                    let value = self.lower_expr(arg);
                    let dest = self.new_temp(IrType::Scalar(ScalarType::Int));
                    self.emit(Instruction::Call {
                        name: "len".to_owned(),
                        args: vec![value],
                        dest: Some(dest.clone()),
                    });
                    return Some(dest.into());
                }
            }
        }

        if callee == "max" {
            // max(a, b) inlines to a compare and a conditional overwrite.
            let ty = self.expr_ir_type(expr);
            let lhs = self.lower_expr(&args[0]);
            let rhs = self.lower_expr(&args[1]);
            let dest = self.new_temp(ty);
            let bigger = self.new_temp(IrType::Scalar(ScalarType::Bool));
            let done = self.new_label("max_done");
            self.emit(Instruction::Copy(lhs.clone(), dest.clone()));
            self.emit(Instruction::Binary(
                BinaryOp::Greater,
                rhs.clone(),
                lhs,
                bigger.clone(),
            ));
            self.emit(Instruction::JumpIfZero(bigger.into(), done));
            self.emit(Instruction::Copy(rhs, dest.clone()));
            self.emit(Instruction::Label(done));
            return Some(dest.into());
        }

        let lowered: Vec<Value> = args.iter().map(|arg| self.lower_expr(arg)).collect();
        let dest = if want_result {
            let return_type = self
                .signatures
                .functions
                .get(callee)
                .map(|sig| sig.return_type.clone())
                .unwrap_or(Type::Int);
            Some(self.new_temp(self.type_to_ir(&return_type)))
        } else {
            None
        };
        self.emit(Instruction::Call {
            name: callee.to_owned(),
            args: lowered,
            dest: dest.clone(),
        });
        dest.map(Into::into)
    }

    /// Short-circuit operators in value position: branches writing 0/1
    /// into a bool temp, never arithmetic.
    fn lower_bool_value(&mut self, expr: &Expr) -> Value {
        let dest = self.new_temp(IrType::Scalar(ScalarType::Bool));
        let true_label = self.new_label("bool_true");
        let false_label = self.new_label("bool_false");
        let end_label = self.new_label("bool_end");

        self.emit(Instruction::Copy(Constant::Bool(false).into(), dest.clone()));
        self.lower_cond_jump(expr, true_label, false_label);
        self.emit(Instruction::Label(true_label));
        self.emit(Instruction::Copy(Constant::Bool(true).into(), dest.clone()));
        self.emit(Instruction::Jump(end_label));
        self.emit(Instruction::Label(false_label));
        self.emit(Instruction::Label(end_label));
        dest.into()
    }

    fn lower_cond_jump(&mut self, condition: &Expr, true_label: Label, false_label: Label) {
        match &condition.kind {
            ExprKind::BoolLit(value) => {
                let target = if *value { true_label } else { false_label };
                self.emit(Instruction::Jump(target));
            }
            ExprKind::Unary {
                op: ast::UnaryOp::Not,
                operand,
            } => {
                self.lower_cond_jump(operand, false_label, true_label);
            }
            ExprKind::Logical {
                op: ast::LogicalOp::And,
                left,
                right,
            } => {
                let mid = self.new_label("and_rhs");
                self.lower_cond_jump(left, mid, false_label);
                self.emit(Instruction::Label(mid));
                self.lower_cond_jump(right, true_label, false_label);
            }
            ExprKind::Logical {
                op: ast::LogicalOp::Or,
                left,
                right,
            } => {
                let mid = self.new_label("or_rhs");
                self.lower_cond_jump(left, true_label, mid);
                self.emit(Instruction::Label(mid));
                self.lower_cond_jump(right, true_label, false_label);
            }
            _ => {
                let value = self.lower_expr(condition);
                self.emit(Instruction::JumpIfNotZero(value, true_label));
                self.emit(Instruction::Jump(false_label));
            }
        }
    }
}

fn binary_op(op: ast::BinaryOp) -> BinaryOp {
    match op {
        ast::BinaryOp::Add => BinaryOp::Add,
        ast::BinaryOp::Subtract => BinaryOp::Subtract,
        ast::BinaryOp::Multiply => BinaryOp::Multiply,
        ast::BinaryOp::Divide => BinaryOp::Divide,
        ast::BinaryOp::Remainder => BinaryOp::Remainder,
        ast::BinaryOp::Equal => BinaryOp::Equal,
        ast::BinaryOp::NotEqual => BinaryOp::NotEqual,
        ast::BinaryOp::Less => BinaryOp::Less,
        ast::BinaryOp::LessEqual => BinaryOp::LessEqual,
        ast::BinaryOp::Greater => BinaryOp::Greater,
        ast::BinaryOp::GreaterEqual => BinaryOp::GreaterEqual,
    }
}

fn cast_op(from: &Type, to: &Type) -> Option<CastOp> {
    match (from, to) {
        (Type::Int, Type::Float) => Some(CastOp::IntToFloat),
        (Type::Float, Type::Int) => Some(CastOp::FloatToInt),
        (Type::Int, Type::Bool) => Some(CastOp::IntToBool),
        (Type::Bool, Type::Int) => Some(CastOp::BoolToInt),
        (Type::Float, Type::Bool) => Some(CastOp::FloatToBool),
        (Type::Bool, Type::Float) => Some(CastOp::BoolToFloat),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lexer::lex_source;
    use crate::parser::parse_tokens;
    use crate::semantic::analyze_program;

    fn lower(source: &str) -> IrProgram {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let mut program = parse_tokens(tokens, &mut sink);
        let semantic = analyze_program(&mut program, &mut sink);
        assert!(
            !sink.has_errors(),
            "errors lowering test source: {}",
            sink.render(|_| ("test.bhai".into(), None))
        );
        lower_program(&program, &semantic.signatures, &mut sink)
    }

    fn main_body(program: &IrProgram) -> &[Instruction] {
        &program.function(IrProgram::MAIN).unwrap().body
    }

    #[test]
    fn test_arithmetic_lowers_to_three_address() {
        let ir = lower("shuru\nbhai x = 2 + 3 * 4\nbol(x)\nnikal 0\nbass");
        let body = main_body(&ir);
        let binaries = body
            .iter()
            .filter(|i| matches!(i, Instruction::Binary(..)))
            .count();
        assert_eq!(binaries, 2);
        assert!(matches!(body.last(), Some(Instruction::Return(_))));
    }

    #[test]
    fn test_logical_and_lowers_to_branches() {
        let ir = lower("shuru\nbool a = sach\nbool b = jhooth\nbool c = a && b\nbol(c)\nbass");
        let body = main_body(&ir);
        assert!(body
            .iter()
            .any(|i| matches!(i, Instruction::JumpIfNotZero(..))));
        // Never lowered as an arithmetic instruction.
        assert!(!body.iter().any(|i| matches!(
            i,
            Instruction::Binary(BinaryOp::Multiply | BinaryOp::Add, ..)
        )));
    }

    #[test]
    fn test_while_has_header_and_exit() {
        let ir = lower("shuru\nbhai i = 0\ntabtak (i < 3) {\ni = i + 1\n}\nbol(i)\nbass");
        let body = main_body(&ir);
        let labels: Vec<&str> = body
            .iter()
            .filter_map(|i| match i {
                Instruction::Label(l) => Some(l.tag),
                _ => None,
            })
            .collect();
        assert!(labels.contains(&"loop_header"));
        assert!(labels.contains(&"loop_end"));
    }

    #[test]
    fn test_continue_targets_latch_in_for_loop() {
        let ir = lower(
            "shuru\nbhai sum = 0\njabtak (bhai i = 0; i < 5; ++i) {\nagar (i == 2) { jari }\nsum += i\n}\nbol(sum)\nbass",
        );
        let body = main_body(&ir);
        let latch = body.iter().find_map(|i| match i {
            Instruction::Label(l) if l.tag == "loop_latch" => Some(*l),
            _ => None,
        });
        let latch = latch.expect("for loop should have a latch");
        assert!(body
            .iter()
            .any(|i| matches!(i, Instruction::Jump(l) if *l == latch)));
    }

    #[test]
    fn test_switch_lowered_to_ordered_branches() {
        let ir = lower(
            "shuru\nbhai x = 2\nswitch (x) {\ncase 1:\nbol(1)\ncase 2:\nbol(2)\ndefault:\nbol(0)\n}\nbass",
        );
        let body = main_body(&ir);
        let compares = body
            .iter()
            .filter(|i| matches!(i, Instruction::Binary(BinaryOp::Equal, ..)))
            .count();
        assert_eq!(compares, 2);
    }

    #[test]
    fn test_post_increment_preserves_old_value() {
        let ir = lower("shuru\nbhai x = 5\nbhai y = x++\nbol(y)\nbol(x)\nbass");
        let body = main_body(&ir);
        // A copy of the pre-update value must happen before the add.
        let copy_index = body
            .iter()
            .position(|i| matches!(i, Instruction::Copy(Value::Place(Place::Var(v)), _) if v == "x"))
            .expect("saved copy of x");
        let add_index = body
            .iter()
            .position(|i| matches!(i, Instruction::Binary(BinaryOp::Add, ..)))
            .expect("increment add");
        assert!(copy_index < add_index);
    }

    #[test]
    fn test_len_of_array_folds_to_constant() {
        let ir = lower("shuru\nbhai arr[4]\nbol(len(arr))\nbass");
        let body = main_body(&ir);
        assert!(body
            .iter()
            .any(|i| matches!(i, Instruction::Print(Value::Constant(Constant::Int(4)), _))));
    }

    #[test]
    fn test_functions_precede_main_and_main_is_last() {
        let ir = lower("kaam bhai id(bhai x) {\nnikal x\n}\nshuru\nbol(id(7))\nbass");
        assert_eq!(ir.functions.len(), 2);
        assert_eq!(ir.functions.last().unwrap().name, IrProgram::MAIN);
    }

    #[test]
    fn test_temps_are_dense_per_function() {
        let ir = lower(
            "kaam bhai poly(bhai x) {\nnikal x * x + x\n}\nshuru\nbol(poly(3))\nbass",
        );
        for function in &ir.functions {
            let mut max_temp = None;
            for instruction in &function.body {
                if let Some(Place::Temp(id)) = instruction.defined_place() {
                    max_temp = Some(max_temp.map_or(*id, |m: usize| m.max(*id)));
                }
            }
            if let Some(max_temp) = max_temp {
                assert!(max_temp < function.temp_types.len());
            }
        }
    }

    #[test]
    fn test_shadowed_locals_get_unique_slots() {
        let ir = lower(
            "shuru\nbhai x = 1\nagar (x > 0) {\nbhai x = 2\nbol(x)\n}\nbol(x)\nbass",
        );
        let main = ir.function(IrProgram::MAIN).unwrap();
        let names: Vec<&str> = main.locals.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"x"));
        assert!(names.iter().any(|n| n.starts_with("x__")));
    }
}
