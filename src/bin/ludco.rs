//! Compile Ludwieg `.lud` packages and report problems or show the result.
//!
//! Usage:
//!   ludco check [OPTIONS] <PATH>...
//!   ludco show [--json] [OPTIONS] <PATH>...
//!
//! Directories are scanned (non-recursively) for `*.lud` files. Exit status is
//! 1 when any file fails to parse or validate, or the batch has conflicts.
//! Log verbosity follows `RUST_LOG` (default `ludco=info`).

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use ludco::{compile_paths, dump, CompileError, FileError, ParseOptions, Parser};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

#[derive(ClapParser)]
#[command(name = "ludco", version, about = "Ludwieg IDL compiler front end")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Cache rule results while parsing (linear time, more memory)
    #[arg(long, global = true)]
    memoize: bool,

    /// Give up on a file after evaluating this many grammar expressions
    #[arg(long, global = true, value_name = "N")]
    max_expressions: Option<u64>,

    /// Reject input whose grammar rules nest deeper than this
    #[arg(long, global = true, value_name = "N")]
    max_depth: Option<usize>,

    /// Trace every grammar rule entry and exit (needs RUST_LOG=ludco=trace)
    #[arg(long, global = true)]
    debug_grammar: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate, printing only diagnostics
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Compile and print every package as a tree
    Show {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Print the model as JSON instead
        #[arg(long)]
        json: bool,
    },
}

fn collect_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "lud"))
                .collect();
            found.sort();
            debug!(dir = %path.display(), files = found.len(), "scanned");
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn report(err: &CompileError) {
    match err {
        CompileError::Files(failures) => {
            for failure in failures {
                match failure {
                    FileError::Invalid {
                        file,
                        package,
                        errors,
                    } => {
                        eprintln!("{file}: package `{package}':");
                        for e in errors {
                            eprintln!("  {e}");
                        }
                    }
                    other => eprintln!("{other}"),
                }
            }
            eprintln!("ludco: {err}");
        }
        CompileError::Batch(conflicts) => {
            for c in conflicts {
                eprintln!("{c}");
            }
            eprintln!("ludco: {err}");
        }
        CompileError::Internal { .. } => eprintln!("ludco: internal error: {err}"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ludco=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut options = ParseOptions::default()
        .with_memoize(cli.memoize)
        .with_debug(cli.debug_grammar);
    if let Some(max) = cli.max_expressions {
        options = options.with_max_expressions(max);
    }
    if let Some(depth) = cli.max_depth {
        options = options.with_max_depth(depth);
    }
    let parser = Parser::with_options(options).context("building grammar")?;

    let (paths, json) = match &cli.command {
        Command::Check { paths } => (paths, None),
        Command::Show { paths, json } => (paths, Some(*json)),
    };
    let files = collect_inputs(paths)?;
    if files.is_empty() {
        anyhow::bail!("no .lud files found");
    }
    info!(files = files.len(), "compiling");

    let packages = match compile_paths(&parser, &files) {
        Ok(packages) => packages,
        Err(err) => {
            report(&err);
            std::process::exit(1);
        }
    };

    match json {
        None => println!("{} package(s) OK", packages.len()),
        Some(true) => println!("{}", serde_json::to_string_pretty(&packages)?),
        Some(false) => print!("{}", dump::render(&packages)),
    }
    Ok(())
}
