use std::io::{self, Write};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use regex_greedy::{CompiledPattern, MatchMode, PatternBuilder, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAIRS};
use tracing_subscriber::EnvFilter;

/// Demo driver for the greedy regex dialect
#[derive(Parser, Debug)]
#[command(name = "regreedy", version, about)]
struct Args {
    /// Log compile and scan events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Maximum pairs per pattern level
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PAIRS)]
    max_pairs: usize,
    /// Maximum group nesting depth
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the structure of a compiled pattern
    Dump { pattern: String },
    /// Output DOT (Graphviz) representation of a compiled pattern
    Dot { pattern: String },
    /// Match pattern against one or more inputs
    Match {
        pattern: String,
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Stop collecting spans after this many matches per input
        #[arg(long, default_value_t = 16)]
        max_matches: usize,
        /// Resume scanning after each match instead of one byte later
        #[arg(long)]
        disjoint: bool,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("REGREEDY_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn compile_pattern(builder: &PatternBuilder, pattern: &str) -> Option<CompiledPattern> {
    match builder.build(pattern) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            eprintln!("error: failed to compile pattern {pattern:?}: {e}");
            None
        }
    }
}

fn run_dump(compiled: &CompiledPattern) -> ExitCode {
    print!("{}", compiled.dump());
    ExitCode::SUCCESS
}

fn run_dot(compiled: &CompiledPattern) -> ExitCode {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match compiled.to_dot(&mut out).and_then(|()| out.flush()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: failed to write DOT output: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_match(
    compiled: &CompiledPattern,
    inputs: &[String],
    max_matches: usize,
    mode: MatchMode,
) -> ExitCode {
    eprintln!("pattern: {compiled}");
    eprintln!("memory_size: {} bytes", compiled.memory_size());
    eprintln!();

    let mut any_failed = false;
    for input in inputs {
        let matches = compiled.match_all_with(input, max_matches, mode);
        if matches.is_empty() {
            println!("  \x1b[31mNO MATCH\x1b[0m  {input:?}");
            any_failed = true;
            continue;
        }

        println!("  \x1b[32mMATCH\x1b[0m  {input:?}");
        for found in matches.iter() {
            let text = String::from_utf8_lossy(&input.as_bytes()[found.range()]);
            println!("    \x1b[36m{found}\x1b[0m  {text:?}");
        }
        if matches.truncated() {
            println!("    ... more than {max_matches} matches");
        }
    }

    if any_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let builder = PatternBuilder::new()
        .max_pairs(args.max_pairs)
        .max_depth(args.max_depth);
    let pattern = match &args.command {
        Command::Dump { pattern } | Command::Dot { pattern } | Command::Match { pattern, .. } => {
            pattern
        }
    };
    let Some(compiled) = compile_pattern(&builder, pattern) else {
        return ExitCode::FAILURE;
    };

    match &args.command {
        Command::Dump { .. } => run_dump(&compiled),
        Command::Dot { .. } => run_dot(&compiled),
        Command::Match {
            inputs,
            max_matches,
            disjoint,
            ..
        } => {
            let mode = if *disjoint {
                MatchMode::Disjoint
            } else {
                MatchMode::Overlapping
            };
            run_match(&compiled, inputs, *max_matches, mode)
        }
    }
}
