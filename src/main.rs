use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tapebf::{CompileError, DEFAULT_TAPE_CAPACITY, Executor, Program, Tape, compile};

#[derive(Parser)]
#[command(name = "tapebf", about = "Compile and run programs for the eight-instruction byte tape machine")]
struct Cli {
    /// Log filter, e.g. `debug` or `tapebf=trace`. Defaults to RUST_LOG, then `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a program and execute it with stdin as input and stdout as output.
    Run {
        /// Source file.
        file: PathBuf,

        /// Number of tape cells.
        #[arg(long, env = "TAPEBF_TAPE_SIZE", default_value_t = DEFAULT_TAPE_CAPACITY)]
        tape_size: NonZeroUsize,

        /// Print the compiled program to stderr before running it.
        #[arg(long)]
        dump: bool,
    },

    /// Compile every file (in parallel) and report bracket errors.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the compiled form of a program, one instruction per line.
    Dump {
        file: PathBuf,
    },
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    // Program output owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command) -> Result<ExitCode> {
    match command {
        Command::Run {
            file,
            tape_size,
            dump,
        } => run(&file, tape_size, dump),
        Command::Check { files } => Ok(check(&files)),
        Command::Dump { file } => {
            let Some(program) = load(&file)? else {
                return Ok(ExitCode::FAILURE);
            };
            print!("{}", program.disassemble());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Compile `path`, printing a diagnostic and returning `None` on a compile fault.
fn load(path: &Path) -> Result<Option<Program>> {
    match compile_file(path)? {
        Ok(program) => Ok(Some(program)),
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            Ok(None)
        }
    }
}

/// Outer error: the file could not be opened. Inner error: it did not compile.
fn compile_file(path: &Path) -> Result<Result<Program, CompileError>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(compile(file))
}

fn run(path: &Path, tape_size: NonZeroUsize, dump: bool) -> Result<ExitCode> {
    let Some(program) = load(path)? else {
        return Ok(ExitCode::FAILURE);
    };
    if dump {
        eprint!("{}", program.disassemble());
    }

    let mut tape = Tape::new(tape_size);
    info!(file = %path.display(), cells = tape_size.get(), "running");

    let mut executor = Executor::new(&mut tape, io::stdin().lock(), io::stdout().lock());
    let result = executor.run(&program);
    let steps = executor.steps();

    match result {
        Ok(()) => {
            info!(steps, "finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check(files: &[PathBuf]) -> ExitCode {
    let results: Vec<_> = files
        .par_iter()
        .map(|path| (path, compile_file(path)))
        .collect();

    let mut failed = 0usize;
    for (path, result) in results {
        match result {
            Ok(Ok(program)) => {
                debug!(file = %path.display(), instructions = program.instruction_count(), "ok");
            }
            Ok(Err(e)) => {
                eprintln!("{}: {e}", path.display());
                failed += 1;
            }
            Err(e) => {
                eprintln!("error: {e:#}");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{failed} of {} files failed", files.len());
        ExitCode::FAILURE
    }
}
