use std::collections::BTreeMap;

use crate::common::{escape, format_float};
use crate::ir::{
    BinaryOp, CastOp, Constant, Instruction, IrFunction, IrProgram, IrType, Label, Place,
    ScalarType, UnaryOp, Value,
};
use crate::semantic::{Signatures, Type};

/// Emit one C11 translation unit from the optimized IR: aggregate
/// typedefs, the input helper, prototypes, then definitions with
/// `__main__` as `int main(void)`. Temporaries become locals, branches
/// become labels and `goto`; the canonical short-circuit IR window is
/// re-lowered to `&&`/`||` where it survived optimization intact.
pub fn generate_c(program: &IrProgram, signatures: &Signatures) -> String {
    let mut out = CWriter::default();

    let uses_input = program.functions.iter().any(|function| {
        function
            .body
            .iter()
            .any(|instruction| matches!(instruction, Instruction::Read(_)))
    });
    let uses_string_h = program.functions.iter().any(|function| {
        function.body.iter().any(|instruction| match instruction {
            Instruction::Call { name, .. } => name == "len",
            Instruction::Binary(op, lhs, rhs, _) => {
                matches!(op, BinaryOp::Equal | BinaryOp::NotEqual)
                    && (is_text(lhs)
                        || is_text(rhs)
                        || text_place(function, lhs)
                        || text_place(function, rhs))
            }
            _ => false,
        })
    });

    out.line("#include <stdio.h>");
    if uses_string_h {
        out.line("#include <string.h>");
    }
    if uses_input {
        out.line("#include <stdlib.h>");
    }
    out.line("");

    for record in &signatures.records {
        out.line(&format!("typedef struct {} {{", record.name));
        out.indent += 1;
        for (field, ty) in &record.fields {
            let decl = declare(&semantic_to_c(ty), field);
            out.line(&format!("{};", decl));
        }
        out.indent -= 1;
        out.line(&format!("}} {};", record.name));
        out.line("");
    }

    if uses_input {
        out.line("typedef char patakha_line[256];");
        out.line("");
        out.line("static int patakha_read_int(void) {");
        out.indent += 1;
        out.line("patakha_line buf;");
        out.line("if (!fgets(buf, sizeof buf, stdin)) return 0;");
        out.line("return (int)strtol(buf, NULL, 10);");
        out.indent -= 1;
        out.line("}");
        out.line("");
    }

    let mut emitted_prototype = false;
    for function in &program.functions {
        if function.name == IrProgram::MAIN {
            continue;
        }
        out.line(&format!("{};", function_signature(function, signatures)));
        emitted_prototype = true;
    }
    if emitted_prototype {
        out.line("");
    }

    for function in &program.functions {
        emit_function(&mut out, function, signatures);
        out.line("");
    }

    let mut text = out.lines.join("\n");
    while text.ends_with("\n\n") {
        text.pop();
    }
    text.push('\n');
    text
}

#[derive(Default)]
struct CWriter {
    lines: Vec<String>,
    indent: usize,
}

impl CWriter {
    fn line(&mut self, line: &str) {
        if line.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", "    ".repeat(self.indent), line));
        }
    }
}

fn function_signature(function: &IrFunction, signatures: &Signatures) -> String {
    let sig = signatures.functions.get(&function.name);
    let return_type = sig
        .map(|s| semantic_to_c(&s.return_type))
        .unwrap_or_else(|| "int".to_owned());

    let params: Vec<String> = function
        .params
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let ty = sig
                .and_then(|s| s.params.get(index))
                .map(|(_, t)| semantic_to_c(t))
                .unwrap_or_else(|| "int".to_owned());
            declare(&ty, name)
        })
        .collect();
    let params = if params.is_empty() {
        "void".to_owned()
    } else {
        params.join(", ")
    };
    format!("{} {}({})", return_type, function.name, params)
}

fn emit_function(out: &mut CWriter, function: &IrFunction, signatures: &Signatures) {
    if function.name == IrProgram::MAIN {
        out.line("int main(void) {");
    } else {
        out.line(&format!("{} {{", function_signature(function, signatures)));
    }
    out.indent += 1;

    for (name, ty) in &function.locals {
        if function.params.contains(name) {
            continue;
        }
        out.line(&format!("{};", declare_initialized(ty, name)));
    }
    for (id, ty) in function.temp_types.iter().enumerate() {
        out.line(&format!("{};", declare_initialized(ty, &temp_name(id))));
    }
    if !function.locals.is_empty() || !function.temp_types.is_empty() {
        out.line("");
    }

    let label_targets = count_jump_targets(&function.body);
    let mut index = 0;
    while index < function.body.len() {
        if let Some((rendered, consumed)) =
            match_short_circuit(&function.body[index..], &label_targets)
        {
            out.line(&rendered);
            index += consumed;
            continue;
        }
        emit_instruction(out, &function.body[index], function);
        index += 1;
    }

    out.indent -= 1;
    out.line("}");
}

fn emit_instruction(out: &mut CWriter, instruction: &Instruction, function: &IrFunction) {
    match instruction {
        Instruction::Label(label) => {
            // Labels carry an empty statement so one may sit at block end.
            let text = format!("{}: ;", c_label(label));
            // Keep labels flush with the braces for readability.
            let indent = out.indent;
            out.indent = indent.saturating_sub(1);
            out.line(&text);
            out.indent = indent;
        }
        Instruction::Jump(label) => out.line(&format!("goto {};", c_label(label))),
        Instruction::JumpIfZero(value, label) => {
            out.line(&format!("if (!({})) goto {};", render(value), c_label(label)));
        }
        Instruction::JumpIfNotZero(value, label) => {
            out.line(&format!("if ({}) goto {};", render(value), c_label(label)));
        }
        Instruction::Copy(value, dest) => {
            out.line(&format!("{} = {};", render_place(dest), render(value)));
        }
        Instruction::Unary(op, value, dest) => {
            let symbol = match op {
                UnaryOp::Negate => "-",
                UnaryOp::Not => "!",
            };
            out.line(&format!(
                "{} = {}({});",
                render_place(dest),
                symbol,
                render(value)
            ));
        }
        Instruction::Binary(op, lhs, rhs, dest) => {
            if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual)
                && (is_text(lhs)
                    || is_text(rhs)
                    || text_place(function, lhs)
                    || text_place(function, rhs))
            {
                let comparison = if *op == BinaryOp::Equal { "==" } else { "!=" };
                out.line(&format!(
                    "{} = (strcmp({}, {}) {} 0);",
                    render_place(dest),
                    render(lhs),
                    render(rhs),
                    comparison
                ));
            } else {
                out.line(&format!(
                    "{} = {} {} {};",
                    render_place(dest),
                    render(lhs),
                    op,
                    render(rhs)
                ));
            }
        }
        Instruction::Cast(op, value, dest) => {
            let rendered = render(value);
            let cast = match op {
                CastOp::IntToFloat | CastOp::BoolToFloat => format!("(double)({})", rendered),
                CastOp::FloatToInt => format!("(int)({})", rendered),
                CastOp::IntToBool | CastOp::FloatToBool => format!("(({}) != 0)", rendered),
                CastOp::BoolToInt => rendered,
            };
            out.line(&format!("{} = {};", render_place(dest), cast));
        }
        Instruction::IndexLoad { base, index, dest } => {
            out.line(&format!(
                "{} = {}[{}];",
                render_place(dest),
                render_place(base),
                render(index)
            ));
        }
        Instruction::IndexStore { base, index, value } => {
            out.line(&format!(
                "{}[{}] = {};",
                render_place(base),
                render(index),
                render(value)
            ));
        }
        Instruction::FieldLoad { base, field, dest } => {
            out.line(&format!(
                "{} = {}.{};",
                render_place(dest),
                render_place(base),
                field
            ));
        }
        Instruction::FieldStore { base, field, value } => {
            out.line(&format!(
                "{}.{} = {};",
                render_place(base),
                field,
                render(value)
            ));
        }
        Instruction::Call { name, args, dest } => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            let call = if name == "len" {
                format!("(int)strlen({})", rendered.join(", "))
            } else {
                format!("{}({})", name, rendered.join(", "))
            };
            match dest {
                Some(dest) => out.line(&format!("{} = {};", render_place(dest), call)),
                None => out.line(&format!("{};", call)),
            }
        }
        Instruction::Return(value) => match value {
            Some(value) => out.line(&format!("return {};", render(value))),
            None => out.line("return;"),
        },
        Instruction::Print(value, scalar) => {
            let format_spec = match scalar {
                ScalarType::Int | ScalarType::Bool => "%d",
                ScalarType::Float => "%g",
                ScalarType::Text => "%s",
            };
            out.line(&format!(
                "printf(\"{}\\n\", {});",
                format_spec,
                render(value)
            ));
        }
        Instruction::Read(dest) => {
            out.line(&format!("{} = patakha_read_int();", render_place(dest)));
        }
    }
}

/// The IR builder lowers `a && b` / `a || b` in value position to one
/// fixed eleven-instruction window. When that window survives to codegen
/// with its labels untouched from elsewhere, natural C comes back out.
fn match_short_circuit(
    window: &[Instruction],
    label_targets: &BTreeMap<Label, usize>,
) -> Option<(String, usize)> {
    use Instruction::*;

    if window.len() < 11 {
        return None;
    }

    let Copy(Value::Constant(zero), dest) = &window[0] else {
        return None;
    };
    if !zero.is_zero() {
        return None;
    }

    let (JumpIfNotZero(first, first_target), Jump(after_first)) = (&window[1], &window[2]) else {
        return None;
    };
    let Label(mid) = &window[3] else {
        return None;
    };
    let (JumpIfNotZero(second, true_1), Jump(false_1)) = (&window[4], &window[5]) else {
        return None;
    };
    let (Label(true_2), Copy(Value::Constant(one), dest_2), Jump(end_1)) =
        (&window[6], &window[7], &window[8])
    else {
        return None;
    };
    let (Label(false_2), Label(end_2)) = (&window[9], &window[10]) else {
        return None;
    };

    if one.is_zero() || dest != dest_2 || true_1 != true_2 || false_1 != false_2 || end_1 != end_2
    {
        return None;
    }

    // AND: first operand falls to the rhs check on success, bails to the
    // false label otherwise. OR: first success jumps straight to true.
    let (operator, expected): (&str, [(crate::ir::Label, usize); 4]) =
        if first_target == mid && after_first == false_1 {
            ("&&", [(*mid, 1), (*true_1, 1), (*false_1, 2), (*end_1, 1)])
        } else if first_target == true_1 && after_first == mid {
            ("||", [(*mid, 1), (*true_1, 2), (*false_1, 1), (*end_1, 1)])
        } else {
            return None;
        };

    // All four labels must be private to this window.
    for (label, count) in expected {
        if label_targets.get(&label).copied().unwrap_or(0) != count {
            return None;
        }
    }

    Some((
        format!(
            "{} = ({}) {} ({});",
            render_place(dest),
            render(first),
            operator,
            render(second)
        ),
        11,
    ))
}

fn count_jump_targets(body: &[Instruction]) -> BTreeMap<Label, usize> {
    let mut counts = BTreeMap::new();
    for instruction in body {
        if let Some(target) = instruction.jump_target() {
            *counts.entry(target).or_insert(0) += 1;
        }
    }
    counts
}

fn render(value: &Value) -> String {
    match value {
        Value::Constant(Constant::Int(v)) => format!("{}", v),
        Value::Constant(Constant::Float(v)) => format_float(*v),
        Value::Constant(Constant::Bool(v)) => format!("{}", *v as i32),
        Value::Constant(Constant::Str(v)) => format!("\"{}\"", escape(v)),
        Value::Place(place) => render_place(place),
    }
}

fn render_place(place: &Place) -> String {
    match place {
        Place::Temp(id) => temp_name(*id),
        Place::Var(name) => name.clone(),
    }
}

fn temp_name(id: usize) -> String {
    format!("_t{}", id)
}

fn c_label(label: &Label) -> String {
    format!("{}_{}", label.tag, label.index)
}

fn is_text(value: &Value) -> bool {
    matches!(value, Value::Constant(Constant::Str(_)))
}

fn text_place(function: &IrFunction, value: &Value) -> bool {
    match value {
        Value::Place(Place::Temp(id)) => {
            matches!(
                function.temp_types.get(*id),
                Some(IrType::Scalar(ScalarType::Text))
            )
        }
        Value::Place(Place::Var(name)) => {
            matches!(
                function.local_type(name),
                Some(IrType::Scalar(ScalarType::Text))
            )
        }
        _ => false,
    }
}

fn semantic_to_c(ty: &Type) -> String {
    match ty {
        Type::Int | Type::Bool | Type::Error => "int".to_owned(),
        Type::Float => "double".to_owned(),
        Type::Text => "char *".to_owned(),
        Type::Void => "void".to_owned(),
        Type::Record(name) => name.clone(),
        Type::Array(element, _) => semantic_to_c(element),
    }
}

fn ir_to_c(ty: &IrType) -> String {
    match ty {
        IrType::Scalar(ScalarType::Int) | IrType::Scalar(ScalarType::Bool) => "int".to_owned(),
        IrType::Scalar(ScalarType::Float) => "double".to_owned(),
        IrType::Scalar(ScalarType::Text) => "char *".to_owned(),
        IrType::Record(name) => name.clone(),
        IrType::Array(element, _) => ir_to_c(element),
    }
}

fn declare(c_type: &str, name: &str) -> String {
    if c_type.ends_with('*') {
        format!("{}{}", c_type, name)
    } else {
        format!("{} {}", c_type, name)
    }
}

/// Locals and temps start zeroed so the C build matches the reference
/// interpreter's defaults.
fn declare_initialized(ty: &IrType, name: &str) -> String {
    match ty {
        IrType::Scalar(ScalarType::Text) => format!("char *{} = \"\"", name),
        IrType::Scalar(ScalarType::Float) => format!("double {} = 0", name),
        IrType::Scalar(_) => format!("int {} = 0", name),
        IrType::Record(record) => format!("{} {} = {{0}}", record, name),
        IrType::Array(element, size) => {
            format!("{} {}[{}] = {{0}}", ir_to_c(element), name, size)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::ir::lower_program;
    use crate::lexer::lex_source;
    use crate::optimizer::{optimize_program, OptimizationPasses};
    use crate::parser::parse_tokens;
    use crate::semantic::analyze_program;

    fn emit(source: &str, optimize: bool) -> String {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let mut program = parse_tokens(tokens, &mut sink);
        let semantic = analyze_program(&mut program, &mut sink);
        assert!(
            !sink.has_errors(),
            "errors in test source: {}",
            sink.render(|_| ("test.bhai".into(), None))
        );
        let mut ir = lower_program(&program, &semantic.signatures, &mut sink);
        if optimize {
            ir = optimize_program(ir, OptimizationPasses::default());
        }
        generate_c(&ir, &semantic.signatures)
    }

    #[test]
    fn test_main_prints_folded_constant() {
        // The folded constant 14 survives into the printf call.
        let c = emit("shuru\nbhai x = 2 + 3 * 4\nbol(x)\nnikal 0\nbass", true);
        assert!(c.contains("int main(void) {"));
        assert!(c.contains("printf(\"%d\\n\", 14);"));
        assert!(c.contains("return 0;"));
    }

    #[test]
    fn test_function_signature_and_prototype() {
        let c = emit(
            "kaam decimal twice(decimal x) {\nnikal x * 2.0\n}\nshuru\nbol(twice(3.5))\nbass",
            false,
        );
        assert!(c.contains("double twice(double x);"));
        assert!(c.contains("double twice(double x) {"));
    }

    #[test]
    fn test_struct_typedef_preserves_field_order() {
        let c = emit(
            "struct User {\nbhai age\ntext name\n}\nshuru\nstruct User u\nu.age = 21\nbol(u.age)\nbass",
            false,
        );
        let typedef_at = c.find("typedef struct User {").unwrap();
        let age_at = c.find("int age;").unwrap();
        let name_at = c.find("char *name;").unwrap();
        assert!(typedef_at < age_at && age_at < name_at);
        assert!(c.contains("u.age = 21;"));
    }

    #[test]
    fn test_short_circuit_relowers_to_native_operator() {
        let c = emit(
            "shuru\nbool a = sach\nbool b = jhooth\nbool c = a && b\nbool d = a || b\nbol(c)\nbol(d)\nbass",
            false,
        );
        assert!(c.contains("(a) && (b);"));
        assert!(c.contains("(a) || (b);"));
    }

    #[test]
    fn test_branches_fall_back_to_goto() {
        let c = emit(
            "shuru\nbhai i = 0\ntabtak (i < 3) {\ni = i + 1\n}\nbol(i)\nbass",
            false,
        );
        assert!(c.contains("goto loop_header_"));
        assert!(c.contains("loop_end_"));
    }

    #[test]
    fn test_cast_is_explicit() {
        let c = emit("shuru\ndecimal d = decimal(3) / 2.0\nbol(d)\nbass", false);
        assert!(c.contains("(double)(3)"));
        assert!(c.contains("printf(\"%g\\n\""));
    }

    #[test]
    fn test_input_helper_emitted_only_when_used() {
        let with_input = emit("shuru\nbhai x = bata()\nbol(x)\nbass", false);
        assert!(with_input.contains("static int patakha_read_int(void)"));
        assert!(with_input.contains("patakha_line"));
        let without = emit("shuru\nbol(1)\nbass", false);
        assert!(!without.contains("patakha_read_int"));
    }

    #[test]
    fn test_text_equality_uses_strcmp() {
        let c = emit(
            "shuru\ntext t = \"hi\"\nswitch (t) {\ncase \"hi\":\nbol(1)\n}\nbass",
            false,
        );
        assert!(c.contains("strcmp"));
        assert!(c.contains("#include <string.h>"));
    }

    #[test]
    fn test_arrays_declared_with_size() {
        let c = emit("shuru\nbhai arr[4]\narr[0] = 1\nbol(arr[0])\nbass", false);
        assert!(c.contains("int arr[4] = {0};"));
        assert!(c.contains("arr[0] = 1;"));
    }
}
