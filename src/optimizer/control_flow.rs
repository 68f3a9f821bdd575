use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ir::{Instruction, IrFunction, Label};

/// One basic block: a label, a straight-line body, and exactly one
/// terminator as the last instruction. Edges are block indices into the
/// owning `Cfg`'s vector.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    pub id: usize,
    pub label: Label,
    /// Body including the trailing terminator, excluding the leading label.
    pub instructions: Vec<Instruction>,
    pub successors: BTreeSet<usize>,
    pub predecessors: BTreeSet<usize>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }
}

#[derive(Clone, Debug)]
pub struct Cfg {
    pub function_name: String,
    pub blocks: Vec<BasicBlock>,
    next_label_index: usize,
}

/// A back edge `tail -> header` where the header dominates the tail, plus
/// the set of blocks forming the natural loop.
#[derive(Clone, Debug)]
pub struct NaturalLoop {
    pub header: usize,
    pub tail: usize,
    pub blocks: BTreeSet<usize>,
}

impl Cfg {
    /// Partition a function body into basic blocks by leaders (labels and
    /// the instructions following terminators), then wire the edges. Every
    /// block gets an explicit label and an explicit terminator, so the
    /// flattened form can always be re-partitioned to the same graph.
    pub fn build(function: &IrFunction) -> Self {
        let mut next_label_index = function
            .body
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Label(label) => Some(label.index),
                _ => instruction.jump_target().map(|label| label.index),
            })
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);

        // Partition into chunks at labels and after terminators.
        let mut chunks: Vec<Vec<Instruction>> = vec![];
        let mut current: Vec<Instruction> = vec![];
        for instruction in &function.body {
            if matches!(instruction, Instruction::Label(_)) && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let ends_block = instruction.is_terminator();
            current.push(instruction.clone());
            if ends_block {
                chunks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        if chunks.is_empty() {
            chunks.push(vec![]);
        }

        // Assign labels, synthesizing one where a chunk has none.
        let mut blocks: Vec<BasicBlock> = vec![];
        for (id, mut chunk) in chunks.into_iter().enumerate() {
            let label = match chunk.first() {
                Some(Instruction::Label(label)) => {
                    let label = *label;
                    chunk.remove(0);
                    label
                }
                _ => {
                    let label = Label {
                        tag: "bb",
                        index: next_label_index,
                    };
                    next_label_index += 1;
                    label
                }
            };
            blocks.push(BasicBlock {
                id,
                label,
                instructions: chunk,
                successors: BTreeSet::new(),
                predecessors: BTreeSet::new(),
            });
        }

        // Give every block exactly one terminator: fall-through becomes an
        // explicit jump to the next block.
        for id in 0..blocks.len() {
            if blocks[id].terminator().is_none() {
                let target = if id + 1 < blocks.len() {
                    blocks[id + 1].label
                } else {
                    // The lowering always ends a function with a return, so
                    // only an empty trailing block can land here.
                    blocks[id].label
                };
                if id + 1 < blocks.len() {
                    blocks[id].instructions.push(Instruction::Jump(target));
                } else {
                    blocks[id].instructions.push(Instruction::Return(None));
                }
            }
        }

        let mut cfg = Self {
            function_name: function.name.clone(),
            blocks,
            next_label_index,
        };
        cfg.rebuild_edges();
        cfg
    }

    pub fn fresh_label(&mut self, tag: &'static str) -> Label {
        let label = Label {
            tag,
            index: self.next_label_index,
        };
        self.next_label_index += 1;
        label
    }

    pub fn label_to_block(&self) -> BTreeMap<Label, usize> {
        self.blocks
            .iter()
            .map(|block| (block.label, block.id))
            .collect()
    }

    /// Recompute successor/predecessor sets from the terminators.
    pub fn rebuild_edges(&mut self) {
        let label_map = self.label_to_block();
        for block in &mut self.blocks {
            block.successors.clear();
            block.predecessors.clear();
        }
        let mut edges: Vec<(usize, usize)> = vec![];
        for block in &self.blocks {
            match block.terminator() {
                Some(Instruction::Jump(target)) => {
                    if let Some(&to) = label_map.get(target) {
                        edges.push((block.id, to));
                    }
                }
                Some(Instruction::JumpIfZero(_, target))
                | Some(Instruction::JumpIfNotZero(_, target)) => {
                    if let Some(&to) = label_map.get(target) {
                        edges.push((block.id, to));
                    }
                    if block.id + 1 < self.blocks.len() {
                        edges.push((block.id, block.id + 1));
                    }
                }
                _ => {}
            }
        }
        for (from, to) in edges {
            self.blocks[from].successors.insert(to);
            self.blocks[to].predecessors.insert(from);
        }
    }

    /// Drop blocks unreachable from the entry and renumber the survivors.
    /// Runs after constant propagation has folded branches.
    pub fn remove_unreachable_blocks(&mut self) -> bool {
        if self.blocks.is_empty() {
            return false;
        }
        let mut reachable = BTreeSet::new();
        let mut queue = VecDeque::from([0usize]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            queue.extend(self.blocks[id].successors.iter().copied());
        }
        if reachable.len() == self.blocks.len() {
            return false;
        }

        let survivors: Vec<BasicBlock> = self
            .blocks
            .drain(..)
            .filter(|block| reachable.contains(&block.id))
            .collect();
        let remap: BTreeMap<usize, usize> = survivors
            .iter()
            .enumerate()
            .map(|(new_id, block)| (block.id, new_id))
            .collect();
        self.blocks = survivors
            .into_iter()
            .enumerate()
            .map(|(new_id, mut block)| {
                block.id = new_id;
                block.successors = block
                    .successors
                    .iter()
                    .filter_map(|s| remap.get(s).copied())
                    .collect();
                block.predecessors = block
                    .predecessors
                    .iter()
                    .filter_map(|p| remap.get(p).copied())
                    .collect();
                block
            })
            .collect();
        true
    }

    /// Serialize back to a flat instruction list. Jumps straight to the
    /// next block are dropped again; `build` re-synthesizes them.
    pub fn flatten(&self) -> Vec<Instruction> {
        let mut out = vec![];
        for (index, block) in self.blocks.iter().enumerate() {
            out.push(Instruction::Label(block.label));
            let next_label = self.blocks.get(index + 1).map(|b| b.label);
            for (i, instruction) in block.instructions.iter().enumerate() {
                let is_last = i + 1 == block.instructions.len();
                if is_last {
                    if let Instruction::Jump(target) = instruction {
                        if Some(*target) == next_label {
                            continue;
                        }
                    }
                }
                out.push(instruction.clone());
            }
        }
        out
    }

    /// Iterative dominator sets over block ids; entry dominates itself.
    pub fn dominators(&self) -> Vec<BTreeSet<usize>> {
        let n = self.blocks.len();
        if n == 0 {
            return vec![];
        }
        let all: BTreeSet<usize> = (0..n).collect();
        let mut dom: Vec<BTreeSet<usize>> = vec![all; n];
        dom[0] = BTreeSet::from([0]);

        let mut changed = true;
        while changed {
            changed = false;
            for id in 1..n {
                let mut meet: Option<BTreeSet<usize>> = None;
                for &pred in &self.blocks[id].predecessors {
                    meet = Some(match meet {
                        None => dom[pred].clone(),
                        Some(acc) => acc.intersection(&dom[pred]).copied().collect(),
                    });
                }
                let mut next = meet.unwrap_or_default();
                next.insert(id);
                if next != dom[id] {
                    dom[id] = next;
                    changed = true;
                }
            }
        }
        dom
    }

    /// Natural loops: one per back edge whose target dominates its source.
    /// The loop body is everything that reaches the tail without passing
    /// through the header.
    pub fn natural_loops(&self) -> Vec<NaturalLoop> {
        let dom = self.dominators();
        let mut loops = vec![];
        for block in &self.blocks {
            for &succ in &block.successors {
                if dom[block.id].contains(&succ) {
                    let header = succ;
                    let tail = block.id;
                    let mut body = BTreeSet::from([header, tail]);
                    let mut stack = vec![tail];
                    while let Some(current) = stack.pop() {
                        if current == header {
                            continue;
                        }
                        for &pred in &self.blocks[current].predecessors {
                            if body.insert(pred) {
                                stack.push(pred);
                            }
                        }
                    }
                    loops.push(NaturalLoop {
                        header,
                        tail,
                        blocks: body,
                    });
                }
            }
        }
        loops
    }

    /// Splice a pre-header block in front of `header`, retargeting every
    /// edge from outside the loop. Returns the pre-header's new id.
    pub fn insert_preheader(
        &mut self,
        header: usize,
        loop_blocks: &BTreeSet<usize>,
        instructions: Vec<Instruction>,
    ) -> usize {
        let preheader_label = self.fresh_label("preheader");
        let header_label = self.blocks[header].label;

        // Renumber: everything at or after the header shifts up by one.
        let shift = |id: usize| if id >= header { id + 1 } else { id };
        for block in &mut self.blocks {
            block.id = shift(block.id);
            block.successors = block.successors.iter().map(|&s| shift(s)).collect();
            block.predecessors = block.predecessors.iter().map(|&p| shift(p)).collect();
        }
        let shifted_loop: BTreeSet<usize> = loop_blocks.iter().map(|&b| shift(b)).collect();
        let new_header = header + 1;

        let mut body = instructions;
        body.push(Instruction::Jump(header_label));
        let preheader = BasicBlock {
            id: header,
            label: preheader_label,
            instructions: body,
            successors: BTreeSet::from([new_header]),
            predecessors: BTreeSet::new(),
        };
        self.blocks.insert(header, preheader);

        // Out-of-loop predecessors now enter through the pre-header.
        let outside_preds: Vec<usize> = self.blocks[new_header]
            .predecessors
            .iter()
            .copied()
            .filter(|p| !shifted_loop.contains(p))
            .collect();
        for pred in outside_preds {
            self.blocks[pred].successors.remove(&new_header);
            self.blocks[pred].successors.insert(header);
            self.blocks[header].predecessors.insert(pred);
            self.blocks[new_header].predecessors.remove(&pred);
            for instruction in &mut self.blocks[pred].instructions {
                match instruction {
                    Instruction::Jump(target)
                    | Instruction::JumpIfZero(_, target)
                    | Instruction::JumpIfNotZero(_, target)
                        if *target == header_label =>
                    {
                        *target = preheader_label;
                    }
                    _ => {}
                }
            }
        }
        self.blocks[new_header].predecessors.insert(header);

        header
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::ir::{lower_program, IrFunction, IrProgram};
    use crate::lexer::lex_source;
    use crate::parser::parse_tokens;
    use crate::semantic::analyze_program;

    fn cfg_of(source: &str) -> Cfg {
        let mut sink = DiagnosticSink::new();
        let tokens = lex_source(source, 0, &mut sink);
        let mut program = parse_tokens(tokens, &mut sink);
        let semantic = analyze_program(&mut program, &mut sink);
        assert!(!sink.has_errors());
        let ir = lower_program(&program, &semantic.signatures, &mut sink);
        Cfg::build(ir.function(IrProgram::MAIN).unwrap())
    }

    #[test]
    fn test_every_block_ends_in_exactly_one_terminator() {
        let cfg = cfg_of(
            "shuru\nbhai i = 0\ntabtak (i < 3) {\nagar (i == 1) { bol(i) }\ni = i + 1\n}\nbol(i)\nbass",
        );
        for block in &cfg.blocks {
            assert!(block.terminator().is_some(), "block {} unterminated", block.id);
            let terminators = block
                .instructions
                .iter()
                .filter(|i| i.is_terminator())
                .count();
            assert_eq!(terminators, 1, "block {} has {} terminators", block.id, terminators);
        }
    }

    #[test]
    fn test_branch_targets_resolve_to_blocks() {
        let cfg = cfg_of("shuru\nbhai x = 1\nagar (x > 0) {\nbol(x)\n} warna {\nbol(0)\n}\nbass");
        let labels = cfg.label_to_block();
        for block in &cfg.blocks {
            for instruction in &block.instructions {
                if let Some(target) = instruction.jump_target() {
                    assert!(labels.contains_key(&target), "dangling target {}", target);
                }
            }
        }
    }

    #[test]
    fn test_edges_are_symmetric() {
        let cfg = cfg_of(
            "shuru\nbhai i = 0\nkar {\ni = i + 1\n} tabtak (i < 3)\nbol(i)\nbass",
        );
        for block in &cfg.blocks {
            for &succ in &block.successors {
                assert!(cfg.blocks[succ].predecessors.contains(&block.id));
            }
            for &pred in &block.predecessors {
                assert!(cfg.blocks[pred].successors.contains(&block.id));
            }
        }
    }

    #[test]
    fn test_flatten_rebuild_round_trips() {
        let cfg = cfg_of(
            "shuru\nbhai i = 0\njabtak (bhai k = 0; k < 4; ++k) {\ni += k\n}\nbol(i)\nbass",
        );
        let flat = cfg.flatten();
        let function = IrFunction {
            name: "__main__".into(),
            params: vec![],
            body: flat.clone(),
            temp_types: vec![],
            locals: vec![],
        };
        let rebuilt = Cfg::build(&function);
        assert_eq!(rebuilt.flatten(), flat);
    }

    #[test]
    fn test_loop_is_detected_with_dominating_header() {
        let cfg = cfg_of(
            "shuru\nbhai i = 0\ntabtak (i < 10) {\ni = i + 1\n}\nbol(i)\nbass",
        );
        let loops = cfg.natural_loops();
        assert_eq!(loops.len(), 1);
        let dom = cfg.dominators();
        assert!(dom[loops[0].tail].contains(&loops[0].header));
        assert!(loops[0].blocks.contains(&loops[0].header));
    }
}
