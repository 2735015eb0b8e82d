use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, Write};
use tickprof::{cli::Cli, tick_processor::TickProcessor};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber: warnings by default, everything with --debug
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = args.load_config().context("Failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let file = File::open(&args.log_file)
        .with_context(|| format!("Failed to open log file {}", args.log_file.display()))?;

    let mut processor =
        TickProcessor::from_config(&config).context("Failed to set up tick processor")?;
    processor.set_log_name(args.log_file.display().to_string());
    processor
        .process_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", args.log_file.display()))?;

    let output = if config.serialize_vm_symbols {
        serde_json::to_string(&processor.vm_symbols())?
    } else {
        processor.statistics().render(config.format)?
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        writeln!(stdout)?;
    }
    Ok(())
}
