use super::control_flow::Cfg;
use crate::ir::{Instruction, Place, Value};

/// An expression available for reuse within the current block: its
/// canonical rendering, the places it reads, and the place that holds it.
struct Available {
    key: String,
    operands: Vec<Place>,
    holder: Place,
}

/// Block-local common subexpression elimination. Pure computations are
/// remembered under a canonicalized key (commutative operands sorted) and
/// later occurrences become copies. Calls and aggregate stores drop the
/// whole table; redefining a place drops every entry touching it. An
/// expression reading its own destination (`x = x + 1`) is never recorded.
pub fn run(cfg: &mut Cfg) -> bool {
    let mut changed = false;

    for block in &mut cfg.blocks {
        let mut available: Vec<Available> = vec![];

        for instruction in &mut block.instructions {
            let candidate = match &*instruction {
                Instruction::Binary(op, lhs, rhs, dest) => {
                    let (a, b) = if op.is_commutative() && format!("{}", lhs) > format!("{}", rhs)
                    {
                        (rhs, lhs)
                    } else {
                        (lhs, rhs)
                    };
                    Some((
                        format!("bin|{}|{}|{}", op, a, b),
                        operand_places(&[a, b]),
                        dest.clone(),
                    ))
                }
                Instruction::Unary(op, operand, dest) => Some((
                    format!("un|{}|{}", op, operand),
                    operand_places(&[operand]),
                    dest.clone(),
                )),
                Instruction::Cast(op, operand, dest) => Some((
                    format!("cast|{}|{}", op, operand),
                    operand_places(&[operand]),
                    dest.clone(),
                )),
                _ => None,
            };

            let mut reused = false;
            if let Some((key, _, dest)) = &candidate {
                if let Some(entry) = available.iter().find(|entry| &entry.key == key) {
                    *instruction = Instruction::Copy(entry.holder.clone().into(), dest.clone());
                    changed = true;
                    reused = true;
                }
            }

            if matches!(
                instruction,
                Instruction::Call { .. }
                    | Instruction::IndexStore { .. }
                    | Instruction::FieldStore { .. }
            ) {
                available.clear();
            }
            if let Some(dest) = instruction.defined_place() {
                available
                    .retain(|entry| entry.holder != *dest && !entry.operands.contains(dest));
            }

            if !reused {
                if let Some((key, operands, dest)) = candidate {
                    if !operands.contains(&dest) {
                        available.push(Available {
                            key,
                            operands,
                            holder: dest,
                        });
                    }
                }
            }
        }
    }

    changed
}

fn operand_places(values: &[&Value]) -> Vec<Place> {
    values
        .iter()
        .filter_map(|value| value.as_place().cloned())
        .collect()
}
