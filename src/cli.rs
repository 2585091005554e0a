//! CLI argument parsing for calltrace

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for exported traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// JSON document for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "calltrace")]
#[command(version)]
#[command(about = "Shadow-stack function tracer and call-graph profiler", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON enter/exit event script and print the exported trace
    Replay(ReplayArgs),
}

#[derive(clap::Args, Debug)]
pub struct ReplayArgs {
    /// Path to the event script
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Measurement mode bitmask (1=cpu, 2=mu, 4=pmu, 8=no-builtins, 16=alloc, 48=alloc-as-mu)
    #[arg(long = "flags", value_name = "N", default_value = "0")]
    pub flags: i64,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Also print aggregated call-graph edges
    #[arg(long = "callgraph")]
    pub callgraph: bool,
}
