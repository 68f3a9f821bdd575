use std::collections::BTreeMap;

use super::control_flow::Cfg;
use crate::ir::{BinaryOp, CastOp, Constant, Instruction, Place, UnaryOp, Value};

/// Known constant value per place at a program point. The analysis starts
/// every block at bottom (nothing known) and iterates to a fixpoint with
/// an equal-value intersection at joins.
type Env = BTreeMap<Place, Constant>;

/// Forward constant propagation with folding and branch simplification.
/// Returns whether anything changed; folded conditional branches leave
/// unreachable blocks behind for the follow-up cleanup.
pub fn run(cfg: &mut Cfg) -> bool {
    let in_envs = analyze(cfg);
    rewrite(cfg, &in_envs)
}

fn analyze(cfg: &Cfg) -> Vec<Env> {
    let n = cfg.blocks.len();
    let mut in_envs: Vec<Env> = vec![Env::new(); n];
    let mut out_envs: Vec<Env> = vec![Env::new(); n];

    let mut changed = true;
    while changed {
        changed = false;
        for block in &cfg.blocks {
            let merged = merge_envs(
                block
                    .predecessors
                    .iter()
                    .map(|&pred| &out_envs[pred])
                    .collect(),
            );
            if merged != in_envs[block.id] {
                in_envs[block.id] = merged.clone();
                changed = true;
            }

            let mut env = merged;
            for instruction in &block.instructions {
                let mut simulated = instruction.clone();
                substitute(&mut simulated, &env);
                update_env(&mut env, &simulated);
            }
            if env != out_envs[block.id] {
                out_envs[block.id] = env;
                changed = true;
            }
        }
    }
    in_envs
}

fn rewrite(cfg: &mut Cfg, in_envs: &[Env]) -> bool {
    let mut changed = false;
    let mut branches_folded = false;
    let block_count = cfg.blocks.len();

    for id in 0..block_count {
        let fallthrough_label = cfg.blocks.get(id + 1).map(|b| b.label);
        let mut env = in_envs[id].clone();
        for instruction in &mut cfg.blocks[id].instructions {
            let before = instruction.clone();
            substitute(instruction, &env);

            if let Some(folded) = fold(instruction) {
                *instruction = folded;
            }

            // A decided conditional branch collapses to a plain jump.
            let decided = match instruction {
                Instruction::JumpIfZero(Value::Constant(c), target) => {
                    Some(if c.is_zero() { Some(*target) } else { None })
                }
                Instruction::JumpIfNotZero(Value::Constant(c), target) => {
                    Some(if c.is_zero() { None } else { Some(*target) })
                }
                _ => None,
            };
            if let Some(taken) = decided {
                let target = taken.or(fallthrough_label);
                if let Some(target) = target {
                    *instruction = Instruction::Jump(target);
                    branches_folded = true;
                }
            }

            update_env(&mut env, instruction);
            if *instruction != before {
                changed = true;
            }
        }
    }

    if branches_folded {
        cfg.rebuild_edges();
    }
    changed
}

/// Replace place operands that carry a known constant. Aggregate bases are
/// never replaced; only value operands are.
fn substitute(instruction: &mut Instruction, env: &Env) {
    instruction.replace_operands(|value| match value {
        Value::Place(place) => env.get(place).cloned().map(Value::Constant),
        Value::Constant(_) => None,
    });
}

fn update_env(env: &mut Env, instruction: &Instruction) {
    match instruction {
        Instruction::Copy(Value::Constant(constant), dest) => {
            env.insert(dest.clone(), constant.clone());
        }
        _ => {
            if let Some(dest) = instruction.defined_place() {
                env.remove(dest);
            }
        }
    }
}

fn merge_envs(envs: Vec<&Env>) -> Env {
    let Some(first) = envs.first() else {
        return Env::new();
    };
    let mut merged: Env = (*first).clone();
    for env in &envs[1..] {
        merged.retain(|place, constant| env.get(place) == Some(constant));
    }
    merged
}

/// Fold pure computations over constant operands into plain copies.
fn fold(instruction: &Instruction) -> Option<Instruction> {
    match instruction {
        Instruction::Unary(op, Value::Constant(c), dest) => {
            fold_unary(*op, c).map(|folded| Instruction::Copy(folded.into(), dest.clone()))
        }
        Instruction::Binary(op, Value::Constant(a), Value::Constant(b), dest) => {
            fold_binary(*op, a, b).map(|folded| Instruction::Copy(folded.into(), dest.clone()))
        }
        Instruction::Cast(op, Value::Constant(c), dest) => {
            fold_cast(*op, c).map(|folded| Instruction::Copy(folded.into(), dest.clone()))
        }
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, c: &Constant) -> Option<Constant> {
    match (op, c) {
        (UnaryOp::Negate, Constant::Int(v)) => Some(Constant::Int(v.wrapping_neg())),
        (UnaryOp::Negate, Constant::Float(v)) => Some(Constant::Float(-v)),
        (UnaryOp::Not, Constant::Bool(v)) => Some(Constant::Bool(!v)),
        (UnaryOp::Not, Constant::Int(v)) => Some(Constant::Bool(*v == 0)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, a: &Constant, b: &Constant) -> Option<Constant> {
    use BinaryOp::*;
    use Constant::*;

    match (a, b) {
        (Int(a), Int(b)) => match op {
            Add => Some(Int(a.wrapping_add(*b))),
            Subtract => Some(Int(a.wrapping_sub(*b))),
            Multiply => Some(Int(a.wrapping_mul(*b))),
            Divide => (*b != 0).then(|| Int(a.wrapping_div(*b))),
            Remainder => (*b != 0).then(|| Int(a.wrapping_rem(*b))),
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            Less => Some(Bool(a < b)),
            LessEqual => Some(Bool(a <= b)),
            Greater => Some(Bool(a > b)),
            GreaterEqual => Some(Bool(a >= b)),
        },
        (Float(a), Float(b)) => match op {
            Add => Some(Float(a + b)),
            Subtract => Some(Float(a - b)),
            Multiply => Some(Float(a * b)),
            Divide => (*b != 0.0).then(|| Float(a / b)),
            Remainder => None,
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            Less => Some(Bool(a < b)),
            LessEqual => Some(Bool(a <= b)),
            Greater => Some(Bool(a > b)),
            GreaterEqual => Some(Bool(a >= b)),
        },
        (Bool(a), Bool(b)) => match op {
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            _ => None,
        },
        (Str(a), Str(b)) => match op {
            Equal => Some(Bool(a == b)),
            NotEqual => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_cast(op: CastOp, c: &Constant) -> Option<Constant> {
    use Constant::*;
    match (op, c) {
        (CastOp::IntToFloat, Int(v)) => Some(Float(*v as f64)),
        (CastOp::FloatToInt, Float(v)) => Some(Int(*v as i64)),
        (CastOp::IntToBool, Int(v)) => Some(Bool(*v != 0)),
        (CastOp::BoolToInt, Bool(v)) => Some(Int(*v as i64)),
        (CastOp::FloatToBool, Float(v)) => Some(Bool(*v != 0.0)),
        (CastOp::BoolToFloat, Bool(v)) => Some(Float(*v as i64 as f64)),
        _ => None,
    }
}
