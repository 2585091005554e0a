use anyhow::{Context, Result};
use calltrace::cli::{Cli, Command, OutputFormat, ReplayArgs};
use calltrace::replay::{self, ReplayOutcome};
use calltrace::TraceFlags;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_text(outcome: &ReplayOutcome) {
    println!(
        "{:<40} {:>10} {:>10} {:>10}",
        "function", "start", "end", "ms"
    );
    println!("{}", "─".repeat(73));
    for frame in &outcome.frames {
        println!(
            "{:<40} {:>10} {:>10} {:>10}",
            frame.function_name, frame.wt_start, frame.wt_end, frame.duration
        );
    }
    println!("{}", "─".repeat(73));
    println!(
        "{} frames recorded, {} dropped",
        outcome.frames.len(),
        outcome.summary.dropped_frames
    );

    if let Some(edges) = &outcome.callgraph {
        println!();
        println!("{:<50} {:>8} {:>10}", "edge", "calls", "wall ms");
        println!("{}", "─".repeat(70));
        for edge in edges {
            println!("{:<50} {:>8} {:>10}", edge.edge, edge.ct, edge.wt);
        }
    }
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let events = replay::load_script(&args.script)
        .with_context(|| format!("Failed to load {}", args.script.display()))?;
    let outcome = replay::replay(&events, TraceFlags::from_raw(args.flags), args.callgraph)?;

    match args.format {
        OutputFormat::Text => print_text(&outcome),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match &args.command {
        Command::Replay(replay_args) => run_replay(replay_args)?,
    }

    Ok(())
}
