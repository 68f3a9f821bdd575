use crate::common::{escape, format_float};
use crate::ir::{
    BinaryOp, CastOp, Constant, Instruction, IrFunction, IrProgram, Label, Place, UnaryOp, Value,
};

/// Emit textual stack-machine assembly from the optimized IR. Functions
/// come first as `FN name … END` blocks; the entry body follows under the
/// `MAIN` label. The VM has value semantics: `SETFIELD`/`SETINDEX` pop the
/// aggregate, push the updated copy, and a `STORE` writes it back.
pub fn generate_stack(program: &IrProgram) -> String {
    let mut out: Vec<String> = vec![];

    for function in &program.functions {
        if function.name == IrProgram::MAIN {
            continue;
        }
        out.push(format!("FN {}", function.name));
        for param in &function.params {
            out.push(format!("PARAM {}", param));
        }
        emit_body(&mut out, function);
        out.push("END".to_owned());
        out.push(String::new());
    }

    if let Some(main) = program.function(IrProgram::MAIN) {
        out.push("MAIN".to_owned());
        emit_body(&mut out, main);
        out.push("END".to_owned());
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn emit_body(out: &mut Vec<String>, function: &IrFunction) {
    for instruction in &function.body {
        emit_instruction(out, instruction);
    }
}

fn emit_instruction(out: &mut Vec<String>, instruction: &Instruction) {
    match instruction {
        Instruction::Label(label) => out.push(format!("LABEL {}", label_name(label))),
        Instruction::Jump(label) => out.push(format!("JMP {}", label_name(label))),
        Instruction::JumpIfZero(value, label) => {
            push(out, value);
            out.push(format!("JZ {}", label_name(label)));
        }
        Instruction::JumpIfNotZero(value, label) => {
            push(out, value);
            out.push(format!("JNZ {}", label_name(label)));
        }
        Instruction::Copy(value, dest) => {
            push(out, value);
            store(out, dest);
        }
        Instruction::Unary(op, value, dest) => {
            push(out, value);
            out.push(
                match op {
                    UnaryOp::Negate => "NEG",
                    UnaryOp::Not => "NOT",
                }
                .to_owned(),
            );
            store(out, dest);
        }
        Instruction::Binary(op, lhs, rhs, dest) => {
            push(out, lhs);
            push(out, rhs);
            out.push(binary_mnemonic(*op).to_owned());
            store(out, dest);
        }
        Instruction::Cast(op, value, dest) => {
            push(out, value);
            match op {
                CastOp::IntToFloat => out.push("I2F".to_owned()),
                CastOp::FloatToInt => out.push("F2I".to_owned()),
                CastOp::IntToBool => out.push("I2B".to_owned()),
                CastOp::BoolToInt => out.push("B2I".to_owned()),
                // Truncation must not decide truthiness, so float→bool is
                // a comparison against zero.
                CastOp::FloatToBool => {
                    out.push("PUSH 0.0".to_owned());
                    out.push("NE".to_owned());
                }
                CastOp::BoolToFloat => out.push("I2F".to_owned()),
            }
            store(out, dest);
        }
        Instruction::IndexLoad { base, index, dest } => {
            load(out, base);
            push(out, index);
            out.push("GETINDEX".to_owned());
            store(out, dest);
        }
        Instruction::IndexStore { base, index, value } => {
            load(out, base);
            push(out, index);
            push(out, value);
            out.push("SETINDEX".to_owned());
            store(out, base);
        }
        Instruction::FieldLoad { base, field, dest } => {
            load(out, base);
            out.push(format!("GETFIELD {}", field));
            store(out, dest);
        }
        Instruction::FieldStore { base, field, value } => {
            load(out, base);
            push(out, value);
            out.push(format!("SETFIELD {}", field));
            store(out, base);
        }
        Instruction::Call { name, args, dest } => {
            for arg in args {
                push(out, arg);
            }
            if name == "len" {
                out.push("LEN".to_owned());
            } else {
                out.push(format!("CALL {}/{}", name, args.len()));
            }
            match dest {
                Some(dest) => store(out, dest),
                None => out.push("POP".to_owned()),
            }
        }
        Instruction::Return(value) => {
            match value {
                Some(value) => push(out, value),
                None => out.push("PUSH 0".to_owned()),
            }
            out.push("RET".to_owned());
        }
        Instruction::Print(value, _) => {
            push(out, value);
            out.push("PRINT".to_owned());
        }
        Instruction::Read(dest) => {
            out.push("READ int".to_owned());
            store(out, dest);
        }
    }
}

fn push(out: &mut Vec<String>, value: &Value) {
    match value {
        Value::Constant(Constant::Int(v)) => out.push(format!("PUSH {}", v)),
        Value::Constant(Constant::Float(v)) => out.push(format!("PUSH {}", format_float(*v))),
        Value::Constant(Constant::Bool(v)) => out.push(format!("PUSH {}", *v as i64)),
        Value::Constant(Constant::Str(v)) => out.push(format!("PUSH \"{}\"", escape(v))),
        Value::Place(place) => load(out, place),
    }
}

fn load(out: &mut Vec<String>, place: &Place) {
    out.push(format!("LOAD {}", slot_name(place)));
}

fn store(out: &mut Vec<String>, place: &Place) {
    out.push(format!("STORE {}", slot_name(place)));
}

fn slot_name(place: &Place) -> String {
    match place {
        Place::Temp(id) => format!("t{}", id),
        Place::Var(name) => name.clone(),
    }
}

fn label_name(label: &Label) -> String {
    format!("{}_{}", label.tag, label.index)
}

fn binary_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "ADD",
        BinaryOp::Subtract => "SUB",
        BinaryOp::Multiply => "MUL",
        BinaryOp::Divide => "DIV",
        BinaryOp::Remainder => "MOD",
        BinaryOp::Equal => "EQ",
        BinaryOp::NotEqual => "NE",
        BinaryOp::Less => "LT",
        BinaryOp::LessEqual => "LE",
        BinaryOp::Greater => "GT",
        BinaryOp::GreaterEqual => "GE",
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
        assert!(!sink.has_errors());
        let mut ir = lower_program(&program, &semantic.signatures, &mut sink);
        if optimize {
            ir = optimize_program(ir, OptimizationPasses::default());
        }
        generate_stack(&ir)
    }

    #[test]
    fn test_main_block_labeled_and_terminated() {
        let asm = emit("shuru\nbhai x = 1\nbol(x)\nbass", false);
        assert!(asm.starts_with("MAIN\n"));
        assert!(asm.trim_end().ends_with("END"));
        assert!(asm.contains("PRINT"));
    }

    #[test]
    fn test_arithmetic_uses_stack_ops() {
        let asm = emit("shuru\nbhai x = 2\nbhai y = x + 3 * x\nbol(y)\nbass", false);
        assert!(asm.contains("MUL"));
        assert!(asm.contains("ADD"));
        assert!(asm.contains("STORE y"));
    }

    #[test]
    fn test_folded_program_pushes_constant() {
        // The add disappears after optimization.
        let asm = emit("shuru\nbhai y = 1 + 2\nbol(y)\nbass", true);
        assert!(asm.contains("PUSH 3"));
        assert!(!asm.contains("ADD"));
    }

    #[test]
    fn test_function_block_and_call_syntax() {
        let asm = emit(
            "kaam bhai add(bhai a, bhai b) {\nnikal a + b\n}\nshuru\nbol(add(1, 2))\nbass",
            false,
        );
        assert!(asm.contains("FN add"));
        assert!(asm.contains("PARAM a"));
        assert!(asm.contains("PARAM b"));
        assert!(asm.contains("CALL add/2"));
        assert!(asm.contains("RET"));
    }

    #[test]
    fn test_casts_map_to_conversion_ops() {
        let asm = emit(
            "shuru\ndecimal d = decimal(3) / 2.0\nbhai i = bhai(d)\nbol(i)\nbass",
            false,
        );
        assert!(asm.contains("I2F"));
        assert!(asm.contains("F2I"));
    }

    #[test]
    fn test_branches_use_jz_jnz() {
        let asm = emit(
            "shuru\nbhai x = bata()\nagar (x > 0) {\nbol(x)\n} warna {\nbol(0)\n}\nbass",
            false,
        );
        assert!(asm.contains("READ int"));
        assert!(asm.contains("JNZ "));
        assert!(asm.contains("JMP "));
        assert!(asm.contains("LABEL "));
    }

    #[test]
    fn test_aggregate_helpers() {
        let asm = emit(
            "struct Box {\nbhai w\n}\nshuru\nstruct Box b\nb.w = 3\nbhai arr[2]\narr[1] = b.w\nbol(arr[1])\nbass",
            false,
        );
        assert!(asm.contains("SETFIELD w"));
        assert!(asm.contains("GETFIELD w"));
        assert!(asm.contains("SETINDEX"));
        assert!(asm.contains("GETINDEX"));
    }

    #[test]
    fn test_switch_compares_and_branches() {
        let asm = emit(
            "shuru\nbhai x = bata()\nswitch (x) {\ncase 1:\nbol(1)\ndefault:\nbol(0)\n}\nbass",
            false,
        );
        assert!(asm.contains("EQ"));
        assert!(asm.contains("JNZ switch_case_"));
    }
}
