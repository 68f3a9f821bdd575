use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use clap::{Parser, ValueEnum};

use patakha::compiler::{
    compile_file, format_ast, format_ast_dot, format_cfg, format_cfg_dot, format_ir,
    format_symbols, format_tokens, CompilationResult, CompileOptions, CompileOutcome,
};
use patakha::grammar_lab::{
    build_demo_slr, build_ll1_artifacts, format_ll1_artifacts, format_slr_artifacts,
    predictive_parse_trace, slr_parse_trace, terminal_name,
};

// Exit codes: 0 success, 1 diagnostics with errors (or a failed C compile),
// 2 usage error (clap's default), 3 I/O failure.
const EXIT_DIAGNOSTICS: i32 = 1;
const EXIT_IO: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    C,
    Stack,
}

#[derive(Debug, Parser)]
#[command(name = "patakha", about = "Patakha compiler for .bhai sources", version)]
struct Options {
    /// Path to the .bhai source file
    source: PathBuf,

    /// Output path (default: .c for the C backend, .stk for stack)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Primary backend output
    #[arg(long, value_enum, default_value_t = Backend::C)]
    backend: Backend,

    /// Compile the generated C with gcc (C backend only)
    #[arg(long)]
    gcc: bool,

    /// Executable path for --gcc (default: source stem)
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Write warnings to <source>.warnings.txt
    #[arg(long)]
    emit_warnings: bool,

    /// Write tokens to <source>.tokens.txt
    #[arg(long)]
    emit_tokens: bool,

    /// Write pre-optimization IR to <source>.raw.ir
    #[arg(long)]
    emit_raw_ir: bool,

    /// Write optimized IR to <source>.ir
    #[arg(long)]
    emit_ir: bool,

    /// Write stack backend code to <source>.stk
    #[arg(long)]
    emit_stack: bool,

    /// Write the AST tree to <source>.ast.txt
    #[arg(long)]
    dump_ast: bool,

    /// Write the AST dot graph to <source>.ast.dot
    #[arg(long)]
    dump_ast_dot: bool,

    /// Write the symbol table dump to <source>.symbols.txt
    #[arg(long)]
    dump_symbols: bool,

    /// Write the CFG dump to <source>.cfg.txt
    #[arg(long)]
    dump_cfg: bool,

    /// Write the CFG dot graph to <source>.cfg.dot
    #[arg(long)]
    dump_cfg_dot: bool,

    /// Write LL(1) FIRST/FOLLOW/table artifacts to <source>.ll1.txt
    #[arg(long)]
    dump_ll1: bool,

    /// Write the SLR lab artifacts to <source>.slr.txt
    #[arg(long)]
    dump_slr: bool,
}

fn main() {
    let options = Options::parse();
    process::exit(run(&options));
}

fn run(options: &Options) -> i32 {
    let outcome = match compile_file(&options.source, CompileOptions::default()) {
        Ok(outcome) => outcome,
        Err(error) => {
            eprintln!(
                "Could not read source file `{}`: {}",
                options.source.display(),
                error
            );
            return EXIT_IO;
        }
    };

    let CompileOutcome {
        source_map,
        sink,
        result,
    } = outcome;

    if sink.has_errors() {
        eprint!("{}", sink.render(|file| source_map.resolve(file)));
        return EXIT_DIAGNOSTICS;
    }

    let source_display = options.source.display().to_string();
    for warning in sink.warnings() {
        println!("{}", warning.pretty(&source_display, None));
    }

    let Some(result) = result else {
        return EXIT_DIAGNOSTICS;
    };

    match emit_artifacts(options, &result, &sink) {
        Ok(()) => {}
        Err(error) => {
            eprintln!("{}", error);
            return EXIT_IO;
        }
    }

    if options.gcc {
        return drive_gcc(options);
    }

    0
}

fn emit_artifacts(
    options: &Options,
    result: &CompilationResult,
    sink: &patakha::diagnostics::DiagnosticSink,
) -> std::io::Result<()> {
    let source = &options.source;

    match options.backend {
        Backend::C => {
            let path = output_path(options, "c");
            fs::write(&path, &result.c_code)?;
            println!("[ok] C code generated: {}", path.display());
        }
        Backend::Stack => {
            let path = output_path(options, "stk");
            fs::write(&path, &result.stack_code)?;
            println!("[ok] Stack code generated: {}", path.display());
        }
    }

    if options.emit_warnings {
        let path = with_suffix(source, "warnings.txt");
        let source_display = source.display().to_string();
        let warnings: Vec<String> = sink
            .warnings()
            .map(|w| w.pretty(&source_display, None))
            .collect();
        let text = if warnings.is_empty() {
            "<no warnings>\n".to_owned()
        } else {
            warnings.join("\n") + "\n"
        };
        fs::write(&path, text)?;
        println!("[ok] Warnings written: {}", path.display());
    }

    if options.emit_tokens {
        let path = with_suffix(source, "tokens.txt");
        fs::write(&path, format_tokens(&result.tokens))?;
        println!("[ok] Tokens written: {}", path.display());
    }

    if options.emit_raw_ir {
        let path = with_suffix(source, "raw.ir");
        fs::write(&path, format_ir(&result.ir_raw))?;
        println!("[ok] Raw IR written: {}", path.display());
    }

    if options.emit_ir {
        let path = with_suffix(source, "ir");
        fs::write(&path, format_ir(&result.ir_optimized))?;
        println!("[ok] IR written: {}", path.display());
    }

    if options.emit_stack {
        let path = with_suffix(source, "stk");
        fs::write(&path, &result.stack_code)?;
        println!("[ok] Stack code written: {}", path.display());
    }

    if options.dump_ast {
        let path = with_suffix(source, "ast.txt");
        fs::write(&path, format_ast(&result.ast))?;
        println!("[ok] AST written: {}", path.display());
    }

    if options.dump_ast_dot {
        let path = with_suffix(source, "ast.dot");
        fs::write(&path, format_ast_dot(&result.ast))?;
        println!("[ok] AST dot written: {}", path.display());
    }

    if options.dump_symbols {
        let path = with_suffix(source, "symbols.txt");
        fs::write(&path, format_symbols(&result.semantic, sink))?;
        println!("[ok] Symbols written: {}", path.display());
    }

    if options.dump_cfg {
        let path = with_suffix(source, "cfg.txt");
        fs::write(&path, format_cfg(&result.cfgs))?;
        println!("[ok] CFG written: {}", path.display());
    }

    if options.dump_cfg_dot {
        let path = with_suffix(source, "cfg.dot");
        fs::write(&path, format_cfg_dot(&result.cfgs))?;
        println!("[ok] CFG dot written: {}", path.display());
    }

    if options.dump_ll1 {
        let artifacts = build_ll1_artifacts();
        let kinds: Vec<&str> = result
            .tokens
            .iter()
            .filter_map(|token| terminal_name(token.token_type))
            .collect();
        let trace = predictive_parse_trace(&kinds, &artifacts);
        let path = with_suffix(source, "ll1.txt");
        fs::write(&path, format_ll1_artifacts(&artifacts, Some(&trace)))?;
        println!("[ok] LL1 artifacts written: {}", path.display());
    }

    if options.dump_slr {
        let artifacts = build_demo_slr();
        let trace = slr_parse_trace(&["id", "+", "id", "*", "id"], &artifacts);
        let path = with_suffix(source, "slr.txt");
        fs::write(&path, format_slr_artifacts(&artifacts, Some(&trace)))?;
        println!("[ok] SLR artifacts written: {}", path.display());
    }

    Ok(())
}

fn drive_gcc(options: &Options) -> i32 {
    if options.backend != Backend::C {
        eprintln!("--gcc works only with --backend c");
        return EXIT_DIAGNOSTICS;
    }
    let c_path = output_path(options, "c");
    let exe_path = options.exe.clone().unwrap_or_else(|| {
        if cfg!(windows) {
            options.source.with_extension("exe")
        } else {
            options.source.with_extension("")
        }
    });

    let output = Command::new("gcc")
        .arg(&c_path)
        .arg("-o")
        .arg(&exe_path)
        .output();

    match output {
        Err(_) => {
            eprintln!("`gcc` not found in PATH. Install GCC/MinGW first.");
            EXIT_DIAGNOSTICS
        }
        Ok(output) if !output.status.success() => {
            eprintln!("gcc compilation failed:");
            eprint!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            EXIT_DIAGNOSTICS
        }
        Ok(_) => {
            println!("[ok] Executable generated: {}", exe_path.display());
            0
        }
    }
}

fn output_path(options: &Options, extension: &str) -> PathBuf {
    options
        .output
        .clone()
        .unwrap_or_else(|| options.source.with_extension(extension))
}

fn with_suffix(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_owned());
    source.with_file_name(format!("{}.{}", stem, suffix))
}
