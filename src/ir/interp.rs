use std::collections::{BTreeMap, HashMap, VecDeque};

use thiserror::Error;

use super::instruction::*;
use crate::semantic::{Signatures, Type};

/// Reference interpreter over the IR. This is the behavioral oracle: the
/// optimizer must preserve its observable output, and both backends must
/// agree with it.
#[derive(Clone, Debug, PartialEq)]
pub enum RtValue {
    Int(i64),
    Float(f64),
    Text(String),
    Record(BTreeMap<String, RtValue>),
    Array(Vec<RtValue>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// One entry per `bol` line, formatted exactly as the C backend would
    /// print it.
    pub output: Vec<String>,
    pub exit: i64,
    /// How many `bata()` reads were consumed.
    pub inputs_consumed: usize,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("step limit exceeded (runaway loop?)")]
    StepLimit,
    #[error("bad IR: {0}")]
    BadIr(String),
    #[error("division by zero")]
    DivisionByZero,
}

const STEP_LIMIT: usize = 5_000_000;

pub fn run_ir(
    program: &IrProgram,
    signatures: &Signatures,
    inputs: &[i64],
) -> Result<ExecOutcome, ExecError> {
    let mut machine = Machine {
        program,
        signatures,
        inputs: inputs.iter().copied().collect(),
        output: vec![],
        steps: 0,
        inputs_consumed: 0,
    };
    let exit = machine.call(IrProgram::MAIN, vec![])?;
    Ok(ExecOutcome {
        output: machine.output,
        exit: match exit {
            RtValue::Int(v) => v,
            _ => 0,
        },
        inputs_consumed: machine.inputs_consumed,
    })
}

struct Machine<'a> {
    program: &'a IrProgram,
    signatures: &'a Signatures,
    inputs: VecDeque<i64>,
    output: Vec<String>,
    steps: usize,
    inputs_consumed: usize,
}

struct Frame {
    temps: Vec<RtValue>,
    vars: HashMap<String, RtValue>,
}

impl<'a> Machine<'a> {
    fn call(&mut self, name: &str, args: Vec<RtValue>) -> Result<RtValue, ExecError> {
        let function = self
            .program
            .function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_owned()))?;

        let mut frame = Frame {
            temps: function
                .temp_types
                .iter()
                .map(|ty| self.default_ir(ty))
                .collect(),
            vars: HashMap::new(),
        };
        for (local, ty) in &function.locals {
            frame.vars.insert(local.clone(), self.default_ir(ty));
        }
        for (param, value) in function.params.iter().zip(args) {
            frame.vars.insert(param.clone(), value);
        }

        let labels: HashMap<Label, usize> = function
            .body
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| match instruction {
                Instruction::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect();

        let mut pc = 0usize;
        while pc < function.body.len() {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(ExecError::StepLimit);
            }

            let mut jump_to = None;
            match &function.body[pc] {
                Instruction::Label(_) => {}
                Instruction::Copy(src, dest) => {
                    let value = self.read(&frame, src)?;
                    self.write(&mut frame, dest, value);
                }
                Instruction::Unary(op, src, dest) => {
                    let value = self.read(&frame, src)?;
                    let result = match (op, value) {
                        (UnaryOp::Negate, RtValue::Int(v)) => RtValue::Int(-v),
                        (UnaryOp::Negate, RtValue::Float(v)) => RtValue::Float(-v),
                        (UnaryOp::Not, RtValue::Int(v)) => RtValue::Int((v == 0) as i64),
                        (op, value) => {
                            return Err(ExecError::BadIr(format!(
                                "unary {} on {:?}",
                                op, value
                            )))
                        }
                    };
                    self.write(&mut frame, dest, result);
                }
                Instruction::Binary(op, lhs, rhs, dest) => {
                    let lhs = self.read(&frame, lhs)?;
                    let rhs = self.read(&frame, rhs)?;
                    let result = apply_binary(*op, lhs, rhs)?;
                    self.write(&mut frame, dest, result);
                }
                Instruction::Cast(op, src, dest) => {
                    let value = self.read(&frame, src)?;
                    let result = apply_cast(*op, value)?;
                    self.write(&mut frame, dest, result);
                }
                Instruction::IndexLoad { base, index, dest } => {
                    let index = self.read_int(&frame, index)?;
                    let value = match self.read_place(&frame, base)? {
                        RtValue::Array(items) => items
                            .get(index as usize)
                            .cloned()
                            .ok_or_else(|| ExecError::BadIr("index out of range".into()))?,
                        RtValue::Text(text) => RtValue::Int(
                            text.chars().nth(index as usize).map(|c| c as i64).unwrap_or(0),
                        ),
                        other => {
                            return Err(ExecError::BadIr(format!("index into {:?}", other)))
                        }
                    };
                    self.write(&mut frame, dest, value);
                }
                Instruction::IndexStore { base, index, value } => {
                    let index = self.read_int(&frame, index)?;
                    let value = self.read(&frame, value)?;
                    match self.place_mut(&mut frame, base)? {
                        RtValue::Array(items) => {
                            let slot = items
                                .get_mut(index as usize)
                                .ok_or_else(|| ExecError::BadIr("index out of range".into()))?;
                            *slot = value;
                        }
                        other => {
                            return Err(ExecError::BadIr(format!("index store into {:?}", other)))
                        }
                    }
                }
                Instruction::FieldLoad { base, field, dest } => {
                    let value = match self.read_place(&frame, base)? {
                        RtValue::Record(fields) => fields
                            .get(field)
                            .cloned()
                            .ok_or_else(|| ExecError::BadIr(format!("no field {}", field)))?,
                        other => {
                            return Err(ExecError::BadIr(format!("field load from {:?}", other)))
                        }
                    };
                    self.write(&mut frame, dest, value);
                }
                Instruction::FieldStore { base, field, value } => {
                    let value = self.read(&frame, value)?;
                    match self.place_mut(&mut frame, base)? {
                        RtValue::Record(fields) => {
                            fields.insert(field.clone(), value);
                        }
                        other => {
                            return Err(ExecError::BadIr(format!("field store into {:?}", other)))
                        }
                    }
                }
                Instruction::Jump(label) => jump_to = Some(*label),
                Instruction::JumpIfZero(value, label) => {
                    if !self.truthy(&frame, value)? {
                        jump_to = Some(*label);
                    }
                }
                Instruction::JumpIfNotZero(value, label) => {
                    if self.truthy(&frame, value)? {
                        jump_to = Some(*label);
                    }
                }
                Instruction::Call { name, args, dest } => {
                    let arguments: Result<Vec<_>, _> =
                        args.iter().map(|arg| self.read(&frame, arg)).collect();
                    let arguments = arguments?;
                    let result = if name == "len" {
                        match arguments.into_iter().next() {
                            Some(RtValue::Text(text)) => {
                                RtValue::Int(text.chars().count() as i64)
                            }
                            Some(RtValue::Array(items)) => RtValue::Int(items.len() as i64),
                            other => {
                                return Err(ExecError::BadIr(format!("len of {:?}", other)))
                            }
                        }
                    } else {
                        self.call(name, arguments)?
                    };
                    if let Some(dest) = dest {
                        self.write(&mut frame, dest, result);
                    }
                }
                Instruction::Return(value) => {
                    return match value {
                        Some(value) => self.read(&frame, value),
                        None => Ok(RtValue::Int(0)),
                    };
                }
                Instruction::Print(value, scalar) => {
                    let value = self.read(&frame, value)?;
                    let line = format_printed(&value, *scalar);
                    self.output.push(line);
                }
                Instruction::Read(dest) => {
                    let value = self.inputs.pop_front().unwrap_or(0);
                    self.inputs_consumed += 1;
                    self.write(&mut frame, dest, RtValue::Int(value));
                }
            }

            match jump_to {
                Some(label) => {
                    pc = *labels
                        .get(&label)
                        .ok_or_else(|| ExecError::BadIr(format!("missing label {}", label)))?;
                }
                None => pc += 1,
            }
        }

        Ok(RtValue::Int(0))
    }

    fn read(&self, frame: &Frame, value: &Value) -> Result<RtValue, ExecError> {
        match value {
            Value::Constant(Constant::Int(v)) => Ok(RtValue::Int(*v)),
            Value::Constant(Constant::Float(v)) => Ok(RtValue::Float(*v)),
            Value::Constant(Constant::Bool(v)) => Ok(RtValue::Int(*v as i64)),
            Value::Constant(Constant::Str(v)) => Ok(RtValue::Text(v.clone())),
            Value::Place(place) => self.read_place(frame, place),
        }
    }

    fn read_place(&self, frame: &Frame, place: &Place) -> Result<RtValue, ExecError> {
        match place {
            Place::Temp(id) => frame
                .temps
                .get(*id)
                .cloned()
                .ok_or_else(|| ExecError::BadIr(format!("temp %t{} out of range", id))),
            Place::Var(name) => frame
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExecError::BadIr(format!("undefined variable {}", name))),
        }
    }

    fn read_int(&self, frame: &Frame, value: &Value) -> Result<i64, ExecError> {
        match self.read(frame, value)? {
            RtValue::Int(v) => Ok(v),
            other => Err(ExecError::BadIr(format!("expected int, got {:?}", other))),
        }
    }

    fn truthy(&self, frame: &Frame, value: &Value) -> Result<bool, ExecError> {
        Ok(match self.read(frame, value)? {
            RtValue::Int(v) => v != 0,
            RtValue::Float(v) => v != 0.0,
            RtValue::Text(v) => !v.is_empty(),
            _ => false,
        })
    }

    fn write(&self, frame: &mut Frame, place: &Place, value: RtValue) {
        match place {
            Place::Temp(id) => {
                if *id >= frame.temps.len() {
                    frame.temps.resize(*id + 1, RtValue::Int(0));
                }
                frame.temps[*id] = value;
            }
            Place::Var(name) => {
                frame.vars.insert(name.clone(), value);
            }
        }
    }

    fn place_mut<'f>(
        &self,
        frame: &'f mut Frame,
        place: &Place,
    ) -> Result<&'f mut RtValue, ExecError> {
        match place {
            Place::Temp(id) => frame
                .temps
                .get_mut(*id)
                .ok_or_else(|| ExecError::BadIr(format!("temp %t{} out of range", id))),
            Place::Var(name) => frame
                .vars
                .get_mut(name)
                .ok_or_else(|| ExecError::BadIr(format!("undefined variable {}", name))),
        }
    }

    fn default_ir(&self, ty: &IrType) -> RtValue {
        match ty {
            IrType::Scalar(ScalarType::Int) | IrType::Scalar(ScalarType::Bool) => RtValue::Int(0),
            IrType::Scalar(ScalarType::Float) => RtValue::Float(0.0),
            IrType::Scalar(ScalarType::Text) => RtValue::Text(String::new()),
            IrType::Record(name) => self.default_record(name),
            IrType::Array(element, size) => {
                RtValue::Array(vec![self.default_ir(element); *size])
            }
        }
    }

    fn default_record(&self, name: &str) -> RtValue {
        let mut fields = BTreeMap::new();
        if let Some(record) = self.signatures.record(name) {
            for (field, ty) in &record.fields {
                fields.insert(field.clone(), self.default_semantic(ty));
            }
        }
        RtValue::Record(fields)
    }

    fn default_semantic(&self, ty: &Type) -> RtValue {
        match ty {
            Type::Float => RtValue::Float(0.0),
            Type::Text => RtValue::Text(String::new()),
            Type::Record(name) => self.default_record(name),
            Type::Array(element, size) => {
                RtValue::Array(vec![self.default_semantic(element); *size])
            }
            _ => RtValue::Int(0),
        }
    }
}

/// Print formatting shared with the C backend's `%d`/`%g`/`%s` choices.
fn format_printed(value: &RtValue, scalar: ScalarType) -> String {
    match (value, scalar) {
        (RtValue::Float(v), _) => format!("{}", v),
        (RtValue::Int(v), _) => format!("{}", v),
        (RtValue::Text(v), _) => v.clone(),
        (other, _) => format!("{:?}", other),
    }
}

fn apply_binary(op: BinaryOp, lhs: RtValue, rhs: RtValue) -> Result<RtValue, ExecError> {
    use BinaryOp::*;
    use RtValue::*;

    let bool_int = |b: bool| Int(b as i64);

    match (lhs, rhs) {
        (Int(a), Int(b)) => Ok(match op {
            Add => Int(a.wrapping_add(b)),
            Subtract => Int(a.wrapping_sub(b)),
            Multiply => Int(a.wrapping_mul(b)),
            Divide => {
                if b == 0 {
                    return Err(ExecError::DivisionByZero);
                }
                Int(a.wrapping_div(b))
            }
            Remainder => {
                if b == 0 {
                    return Err(ExecError::DivisionByZero);
                }
                Int(a.wrapping_rem(b))
            }
            Equal => bool_int(a == b),
            NotEqual => bool_int(a != b),
            Less => bool_int(a < b),
            LessEqual => bool_int(a <= b),
            Greater => bool_int(a > b),
            GreaterEqual => bool_int(a >= b),
        }),
        (Float(a), Float(b)) => Ok(match op {
            Add => Float(a + b),
            Subtract => Float(a - b),
            Multiply => Float(a * b),
            Divide => {
                if b == 0.0 {
                    return Err(ExecError::DivisionByZero);
                }
                Float(a / b)
            }
            Remainder => return Err(ExecError::BadIr("float remainder".into())),
            Equal => bool_int(a == b),
            NotEqual => bool_int(a != b),
            Less => bool_int(a < b),
            LessEqual => bool_int(a <= b),
            Greater => bool_int(a > b),
            GreaterEqual => bool_int(a >= b),
        }),
        (Text(a), Text(b)) => Ok(match op {
            Equal => bool_int(a == b),
            NotEqual => bool_int(a != b),
            _ => return Err(ExecError::BadIr("text arithmetic".into())),
        }),
        (lhs, rhs) => Err(ExecError::BadIr(format!(
            "binary {} on {:?} and {:?}",
            op, lhs, rhs
        ))),
    }
}

fn apply_cast(op: CastOp, value: RtValue) -> Result<RtValue, ExecError> {
    use RtValue::*;
    Ok(match (op, value) {
        (CastOp::IntToFloat, Int(v)) => Float(v as f64),
        (CastOp::FloatToInt, Float(v)) => Int(v as i64),
        (CastOp::IntToBool, Int(v)) => Int((v != 0) as i64),
        (CastOp::BoolToInt, Int(v)) => Int(v),
        (CastOp::FloatToBool, Float(v)) => Int((v != 0.0) as i64),
        (CastOp::BoolToFloat, Int(v)) => Float(v as f64),
        (op, value) => {
            return Err(ExecError::BadIr(format!("cast {} of {:?}", op, value)));
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::ir::lower_program;
    use crate::lexer::lex_source;
    use crate::parser::parse_tokens;
    use crate::semantic::analyze_program;

    fn run(source: &str, inputs: &[i64]) -> ExecOutcome {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let mut program = parse_tokens(tokens, &mut sink);
        let semantic = analyze_program(&mut program, &mut sink);
        assert!(
            !sink.has_errors(),
            "errors in test source: {}",
            sink.render(|_| ("test.bhai".into(), None))
        );
        let ir = lower_program(&program, &semantic.signatures, &mut sink);
        run_ir(&ir, &semantic.signatures, inputs).expect("execution failed")
    }

    #[test]
    fn test_arithmetic_precedence_prints_14() {
        // 2 + 3 * 4 = 14.
        let outcome = run("shuru\nbhai x = 2 + 3 * 4\nbol(x)\nnikal 0\nbass", &[]);
        assert_eq!(outcome.output, vec!["14"]);
        assert_eq!(outcome.exit, 0);
    }

    #[test]
    fn test_counted_for_accumulates_10() {
        // The sum of 0..4 is 10.
        let outcome = run(
            "shuru\nbhai sum = 0\njabtak (bhai i = 0; i < 5; ++i) {\nsum += i\n}\nbol(sum)\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["10"]);
    }

    #[test]
    fn test_float_cast_division_prints_1_5() {
        // decimal(3) / 2.0 = 1.5.
        let outcome = run("shuru\ndecimal d = decimal(3) / 2.0\nbol(d)\nbass", &[]);
        assert_eq!(outcome.output, vec!["1.5"]);
    }

    #[test]
    fn test_short_circuit_skips_rhs_effects() {
        let outcome = run(
            "kaam bool loud() {\nbol(\"side\")\nnikal sach\n}\nshuru\nbool x = jhooth && loud()\nbol(x)\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["0"]);
    }

    #[test]
    fn test_do_while_runs_at_least_once() {
        let outcome = run(
            "shuru\nbhai n = 10\nkar {\nbol(n)\nn = n - 1\n} tabtak (n > 8)\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["10", "9"]);
    }

    #[test]
    fn test_switch_selects_case_without_fallthrough() {
        let outcome = run(
            "shuru\nbhai x = 2\nswitch (x) {\ncase 1:\nbol(\"one\")\ncase 2:\nbol(\"two\")\ndefault:\nbol(\"other\")\n}\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["two"]);
    }

    #[test]
    fn test_switch_on_text() {
        let outcome = run(
            "shuru\ntext t = \"hi\"\nswitch (t) {\ncase \"hi\":\nbol(1)\ncase \"bye\":\nbol(2)\n}\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["1"]);
    }

    #[test]
    fn test_input_feeds_reads_in_order() {
        let outcome = run(
            "shuru\nbhai a = bata()\nbhai b = bata()\nbol(a + b)\nbass",
            &[40, 2],
        );
        assert_eq!(outcome.output, vec!["42"]);
        assert_eq!(outcome.inputs_consumed, 2);
    }

    #[test]
    fn test_records_and_arrays() {
        let outcome = run(
            "struct Box {\nbhai w\nbhai h\n}\nshuru\nstruct Box b\nb.w = 3\nb.h = 4\nbhai arr[3]\narr[0] = b.w * b.h\nbol(arr[0])\nbol(len(arr))\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["12", "3"]);
    }

    #[test]
    fn test_recursion() {
        let outcome = run(
            "kaam bhai fib(bhai n) {\nagar (n < 2) {\nnikal n\n}\nnikal fib(n - 1) + fib(n - 2)\n}\nshuru\nbol(fib(10))\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["55"]);
    }

    #[test]
    fn test_pre_and_post_increment_values() {
        let outcome = run(
            "shuru\nbhai x = 5\nbhai a = x++\nbhai b = ++x\nbol(a)\nbol(b)\nbol(x)\nbass",
            &[],
        );
        assert_eq!(outcome.output, vec!["5", "7", "7"]);
    }

    #[test]
    fn test_max_builtin_inlined() {
        let outcome = run("shuru\nbol(max(3, 9))\nbol(max(9, 3))\nbass", &[]);
        assert_eq!(outcome.output, vec!["9", "9"]);
    }
}
