use std::collections::{BTreeMap, BTreeSet};

use super::control_flow::{Cfg, NaturalLoop};
use crate::ir::{Instruction, Place};

/// Conservative loop-invariant code motion. A pure definition moves to a
/// synthetic pre-header when:
///   - the loop's header is its sole entry,
///   - the instruction sits in a block dominating the back-edge source,
///   - it defines a temporary exactly once in the loop (temporaries born
///     inside a loop are never read after it, so early evaluation of a
///     pure computation is unobservable when the body never runs),
///   - every operand is defined outside the loop or by an instruction
///     hoisted before it.
/// At most one loop moves per invocation; the optimizer's fixpoint loop
/// drives repetition on fresh ids.
pub fn run(cfg: &mut Cfg) -> bool {
    let loops = cfg.natural_loops();
    let dominators = cfg.dominators();

    for natural_loop in loops {
        if !sole_entry(cfg, &natural_loop) {
            continue;
        }

        let assigned = assigned_places(cfg, &natural_loop);
        let def_counts = definition_counts(cfg, &natural_loop);

        // Blocks that dominate the back-edge source are guaranteed to run
        // on every iteration that takes the back edge.
        let eligible_blocks: Vec<usize> = natural_loop
            .blocks
            .iter()
            .copied()
            .filter(|&block| dominators[natural_loop.tail].contains(&block))
            .collect();

        let mut hoisted: Vec<Instruction> = vec![];
        let mut hoisted_defs: BTreeSet<Place> = BTreeSet::new();
        let mut hoisted_slots: BTreeSet<(usize, usize)> = BTreeSet::new();

        let mut grew = true;
        while grew {
            grew = false;
            for &block_id in &eligible_blocks {
                for (index, instruction) in cfg.blocks[block_id].instructions.iter().enumerate() {
                    if hoisted_slots.contains(&(block_id, index)) {
                        continue;
                    }
                    if !instruction.is_pure_definition() {
                        continue;
                    }
                    let Some(dest) = instruction.defined_place() else {
                        continue;
                    };
                    if !dest.is_temp() || def_counts.get(dest) != Some(&1) {
                        continue;
                    }
                    let invariant = instruction.used_places().iter().all(|place| {
                        !assigned.contains(*place) || hoisted_defs.contains(*place)
                    });
                    if !invariant {
                        continue;
                    }
                    hoisted.push(instruction.clone());
                    hoisted_defs.insert(dest.clone());
                    hoisted_slots.insert((block_id, index));
                    grew = true;
                }
            }
        }

        if hoisted.is_empty() {
            continue;
        }

        for &block_id in &eligible_blocks {
            let block = &mut cfg.blocks[block_id];
            let mut index = 0;
            block.instructions.retain(|_| {
                let keep = !hoisted_slots.contains(&(block_id, index));
                index += 1;
                keep
            });
        }
        cfg.insert_preheader(natural_loop.header, &natural_loop.blocks, hoisted);
        return true;
    }

    false
}

/// The header is the only block through which control can enter the loop.
fn sole_entry(cfg: &Cfg, natural_loop: &NaturalLoop) -> bool {
    natural_loop
        .blocks
        .iter()
        .filter(|&&block| block != natural_loop.header)
        .all(|&block| {
            cfg.blocks[block]
                .predecessors
                .iter()
                .all(|pred| natural_loop.blocks.contains(pred))
        })
}

/// Every place written anywhere in the loop, aggregate mutation included.
fn assigned_places(cfg: &Cfg, natural_loop: &NaturalLoop) -> BTreeSet<Place> {
    let mut assigned = BTreeSet::new();
    for &block_id in &natural_loop.blocks {
        for instruction in &cfg.blocks[block_id].instructions {
            if let Some(dest) = instruction.defined_place() {
                assigned.insert(dest.clone());
            }
            match instruction {
                Instruction::IndexStore { base, .. } | Instruction::FieldStore { base, .. } => {
                    assigned.insert(base.clone());
                }
                _ => {}
            }
        }
    }
    assigned
}

fn definition_counts(cfg: &Cfg, natural_loop: &NaturalLoop) -> BTreeMap<Place, usize> {
    let mut counts = BTreeMap::new();
    for &block_id in &natural_loop.blocks {
        for instruction in &cfg.blocks[block_id].instructions {
            if let Some(dest) = instruction.defined_place() {
                *counts.entry(dest.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}
