use std::collections::BTreeMap;

use crate::ir::{IrFunction, IrProgram};

mod constant_propagation;
pub mod control_flow;
mod dead_store_elimination;
mod local_cse;
mod loop_invariant;

pub use control_flow::{BasicBlock, Cfg, NaturalLoop};

/// Which passes run inside the fixpoint loop. All on by default; tests and
/// the equivalence harness toggle them individually.
#[derive(Clone, Copy, Debug)]
pub struct OptimizationPasses {
    pub constant_propagation: bool,
    pub dead_store_elimination: bool,
    pub local_cse: bool,
    pub loop_invariant_motion: bool,
}

impl Default for OptimizationPasses {
    fn default() -> Self {
        Self {
            constant_propagation: true,
            dead_store_elimination: true,
            local_cse: true,
            loop_invariant_motion: true,
        }
    }
}

impl OptimizationPasses {
    pub fn none() -> Self {
        Self {
            constant_propagation: false,
            dead_store_elimination: false,
            local_cse: false,
            loop_invariant_motion: false,
        }
    }
}

/// Run the pass pipeline over one function until the instruction stream
/// stops changing. Pass order is fixed: constant propagation (with branch
/// folding and unreachable-block cleanup), dead-store elimination, local
/// CSE, then loop-invariant motion.
pub fn optimize_function(mut function: IrFunction, passes: OptimizationPasses) -> IrFunction {
    if function.body.is_empty() {
        return function;
    }

    loop {
        let mut cfg = Cfg::build(&function);

        if passes.constant_propagation {
            constant_propagation::run(&mut cfg);
            cfg.remove_unreachable_blocks();
        }
        if passes.dead_store_elimination {
            dead_store_elimination::run(&mut cfg);
        }
        if passes.local_cse {
            local_cse::run(&mut cfg);
        }
        if passes.loop_invariant_motion {
            loop_invariant::run(&mut cfg);
        }

        let optimized = cfg.flatten();
        if optimized == function.body {
            return function;
        }
        function.body = optimized;
    }
}

pub fn optimize_program(program: IrProgram, passes: OptimizationPasses) -> IrProgram {
    IrProgram {
        functions: program
            .functions
            .into_iter()
            .map(|function| optimize_function(function, passes))
            .collect(),
    }
}

/// Final control-flow graphs for `--dump-cfg` / `--dump-cfg-dot`, keyed by
/// function name.
pub fn build_cfgs(program: &IrProgram) -> BTreeMap<String, Cfg> {
    program
        .functions
        .iter()
        .map(|function| (function.name.clone(), Cfg::build(function)))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diagnostics::DiagnosticSink;
    use crate::ir::interp::{run_ir, ExecOutcome};
    use crate::ir::{lower_program, BinaryOp, Constant, Instruction, Value};
    use crate::lexer::lex_source;
    use crate::parser::parse_tokens;
    use crate::semantic::{analyze_program, Signatures};

    fn compile_ir(source: &str) -> (IrProgram, Signatures) {
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
        (ir, semantic.signatures)
    }

    fn optimized_main(source: &str) -> Vec<Instruction> {
        let (ir, _) = compile_ir(source);
        let optimized = optimize_program(ir, OptimizationPasses::default());
        optimized.function(IrProgram::MAIN).unwrap().body.clone()
    }

    fn run_both_ways(source: &str, inputs: &[i64]) -> (ExecOutcome, ExecOutcome) {
        let (ir, signatures) = compile_ir(source);
        let raw = run_ir(&ir, &signatures, inputs).expect("raw execution");
        let optimized = optimize_program(ir, OptimizationPasses::default());
        let opt = run_ir(&optimized, &signatures, inputs).expect("optimized execution");
        (raw, opt)
    }

    #[test]
    fn test_constant_fold_removes_add() {
        // `bhai y = 1 + 2` folds away; the print sees the constant 3
        // and no add instruction survives into the dump.
        let body = optimized_main("shuru\nbhai y = 1 + 2\nbol(y)\nbass");
        assert!(!body
            .iter()
            .any(|i| matches!(i, Instruction::Binary(BinaryOp::Add, ..))));
        assert!(body.iter().any(|i| matches!(
            i,
            Instruction::Print(Value::Constant(Constant::Int(3)), _)
        )));
    }

    #[test]
    fn test_constant_branch_folds_and_dead_arm_vanishes() {
        let body = optimized_main(
            "shuru\nagar (sach) {\nbol(1)\n} warna {\nbol(2)\n}\nbass",
        );
        assert!(!body
            .iter()
            .any(|i| matches!(i, Instruction::JumpIfNotZero(..) | Instruction::JumpIfZero(..))));
        let prints = body
            .iter()
            .filter(|i| matches!(i, Instruction::Print(..)))
            .count();
        assert_eq!(prints, 1);
    }

    #[test]
    fn test_dead_store_eliminated() {
        let body = optimized_main(
            "shuru\nbhai live = 1\nbhai dead = 2\ndead = 3\nbol(live)\nbass",
        );
        assert!(!body.iter().any(|i| {
            matches!(i, Instruction::Copy(_, crate::ir::Place::Var(name)) if name == "dead")
        }));
    }

    #[test]
    fn test_local_cse_reuses_subexpression() {
        let (ir, _) = compile_ir(
            "shuru\nbhai a = bata()\nbhai b = bata()\nbhai x = a * b + 1\nbhai y = a * b + 2\nbol(x)\nbol(y)\nbass",
        );
        let optimized = optimize_program(ir, OptimizationPasses::default());
        let body = &optimized.function(IrProgram::MAIN).unwrap().body;
        let multiplies = body
            .iter()
            .filter(|i| matches!(i, Instruction::Binary(BinaryOp::Multiply, ..)))
            .count();
        assert_eq!(multiplies, 1);
    }

    #[test]
    fn test_licm_hoists_invariant_multiply() {
        let (ir, _) = compile_ir(
            "shuru\nbhai n = bata()\nbhai sum = 0\nbhai i = 0\ntabtak (i < 10) {\nsum = sum + n * n\ni = i + 1\n}\nbol(sum)\nbass",
        );
        let optimized = optimize_program(ir, OptimizationPasses::default());
        let main = optimized.function(IrProgram::MAIN).unwrap();
        let cfg = Cfg::build(main);
        let loops = cfg.natural_loops();
        assert_eq!(loops.len(), 1);
        let in_loop_multiplies: usize = loops[0]
            .blocks
            .iter()
            .map(|&b| {
                cfg.blocks[b]
                    .instructions
                    .iter()
                    .filter(|i| matches!(i, Instruction::Binary(BinaryOp::Multiply, ..)))
                    .count()
            })
            .sum();
        assert_eq!(in_loop_multiplies, 0, "multiply should move to the pre-header");
        let total_multiplies: usize = main
            .body
            .iter()
            .filter(|i| matches!(i, Instruction::Binary(BinaryOp::Multiply, ..)))
            .count();
        assert_eq!(total_multiplies, 1);
    }

    #[test]
    fn test_optimizer_preserves_behavior() {
        // Prints, consumed inputs and exit value must agree before and
        // after optimization.
        let programs: &[(&str, &[i64])] = &[
            (
                "shuru\nbhai sum = 0\njabtak (bhai i = 0; i < 5; ++i) {\nagar (i == 2) { jari }\nsum += i\n}\nbol(sum)\nnikal sum\nbass",
                &[],
            ),
            (
                "shuru\nbhai a = bata()\nbhai b = bata()\nbol(max(a, b))\nkar {\na = a - 1\n} tabtak (a > b)\nbol(a)\nbass",
                &[9, 4],
            ),
            (
                "kaam bhai gcd(bhai a, bhai b) {\ntabtak (b != 0) {\nbhai t = b\nb = a % b\na = t\n}\nnikal a\n}\nshuru\nbol(gcd(54, 24))\nbass",
                &[],
            ),
            (
                "shuru\ndecimal d = decimal(3) / 2.0\nbol(d)\nbool ok = d > 1.0 && d < 2.0\nbol(ok)\nbass",
                &[],
            ),
            (
                "shuru\nbhai x = bata()\nswitch (x) {\ncase 1:\nbol(\"one\")\ncase 2:\nbol(\"two\")\ndefault:\nbol(\"many\")\n}\nbass",
                &[2],
            ),
        ];
        for (source, inputs) in programs {
            let (raw, opt) = run_both_ways(source, inputs);
            assert_eq!(raw, opt, "behavior diverged for {:?}", source);
        }
    }

    #[test]
    fn test_side_effects_never_removed() {
        let body = optimized_main("shuru\nbhai ignored = bata()\nbol(1)\nbass");
        assert!(body.iter().any(|i| matches!(i, Instruction::Read(_))));
    }

    #[test]
    fn test_fixpoint_terminates_on_empty_main() {
        let body = optimized_main("shuru\nbass");
        assert!(body.iter().any(|i| matches!(i, Instruction::Return(_))));
    }
}
