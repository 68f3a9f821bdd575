use std::collections::BTreeSet;

use super::control_flow::Cfg;
use crate::ir::Place;

type LiveSet = BTreeSet<Place>;

/// Remove pure definitions whose result is never read. Liveness is exact
/// per block and conservative across blocks (anything a successor reads,
/// transitively, stays live); side-effecting instructions are untouchable.
/// Locals are dead at function exit, so the final write into a never-read
/// variable goes away too.
pub fn run(cfg: &mut Cfg) -> bool {
    let n = cfg.blocks.len();

    let mut uses: Vec<LiveSet> = Vec::with_capacity(n);
    let mut defs: Vec<LiveSet> = Vec::with_capacity(n);
    for block in &cfg.blocks {
        let mut block_uses = LiveSet::new();
        let mut block_defs = LiveSet::new();
        for instruction in &block.instructions {
            for place in instruction.used_places() {
                if !block_defs.contains(place) {
                    block_uses.insert(place.clone());
                }
            }
            if let Some(dest) = instruction.defined_place() {
                block_defs.insert(dest.clone());
            }
        }
        uses.push(block_uses);
        defs.push(block_defs);
    }

    let mut live_in: Vec<LiveSet> = vec![LiveSet::new(); n];
    let mut live_out: Vec<LiveSet> = vec![LiveSet::new(); n];
    let mut changed = true;
    while changed {
        changed = false;
        for block in cfg.blocks.iter().rev() {
            let id = block.id;
            let mut out = LiveSet::new();
            for &succ in &block.successors {
                out.extend(live_in[succ].iter().cloned());
            }
            let mut incoming: LiveSet = uses[id].clone();
            incoming.extend(out.difference(&defs[id]).cloned());
            if out != live_out[id] {
                live_out[id] = out;
                changed = true;
            }
            if incoming != live_in[id] {
                live_in[id] = incoming;
                changed = true;
            }
        }
    }

    let mut removed_any = false;
    for block in &mut cfg.blocks {
        let mut live = live_out[block.id].clone();
        let mut kept = Vec::with_capacity(block.instructions.len());
        for instruction in block.instructions.drain(..).rev() {
            let dest = instruction.defined_place().cloned();
            let removable = !instruction.has_side_effect() && dest.is_some();
            if removable {
                let dest = dest.as_ref().unwrap();
                if !live.contains(dest) {
                    removed_any = true;
                    continue;
                }
            }
            if let Some(dest) = dest {
                live.remove(&dest);
            }
            for place in instruction.used_places() {
                live.insert(place.clone());
            }
            kept.push(instruction);
        }
        kept.reverse();
        block.instructions = kept;
    }

    removed_any
}
