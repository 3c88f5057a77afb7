//! pscan - parallel byte counter

mod cli;
mod error;
mod input;
mod logging;
mod output;
mod scan;

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr, Stream::Stdout};

use cli::Cli;
use logging::LogConfig;
use output::ScanReport;
use scan::{Coordinator, CoordinatorConfig, Job};

const STAGES: usize = 4;

/// Parse arguments, run the scan and report errors with their cause chain.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    if let Err(e) = run(&cli) {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init(config);
}

/// Print a numbered progress line on stderr unless `--quiet`.
fn stage(cli: &Cli, step: usize, message: std::fmt::Arguments<'_>) {
    if cli.quiet {
        return;
    }
    let prefix = format!("[{}/{}]", step, STAGES);
    eprintln!(
        "{} {}",
        prefix.if_supports_color(Stderr, |text| text.dimmed()),
        message
    );
}

fn run(cli: &Cli) -> Result<()> {
    let started = Instant::now();

    // Validate everything before touching the filesystem or spawning.
    let target = cli.target_byte()?;
    let workers = scan::parse_worker_count(&cli.workers)?;

    let buffer = input::load_buffer(&cli.input)?;
    stage(
        cli,
        1,
        format_args!("Read {} bytes from {}", buffer.len(), cli.input.display()),
    );

    let job = Job::new(buffer, target, workers)?;
    stage(
        cli,
        2,
        format_args!("Scanning with {} worker processes", job.workers()),
    );

    let coordinator = Coordinator::new(CoordinatorConfig {
        collect_timeout: cli.collect_timeout(),
        throttle: cli.throttle(),
        ..CoordinatorConfig::default()
    });
    tracing::debug!(
        timeout_ms = coordinator.config().collect_timeout.as_millis() as u64,
        throttle_us = cli.throttle_us.unwrap_or(0),
        "Coordinator configured"
    );

    let outcome = coordinator.run(&job)?;
    for partial in &outcome.partials {
        tracing::debug!(
            worker_id = partial.worker_id,
            segment = %partial.segment,
            count = partial.count,
            "Partial result"
        );
    }
    stage(
        cli,
        3,
        format_args!(
            "Counted {} occurrences in {}ms",
            outcome.total,
            outcome.elapsed.as_millis()
        ),
    );

    let report = ScanReport::new(
        &cli.input,
        target,
        outcome.total,
        job.workers(),
        started.elapsed().as_millis() as u64,
    );
    output::write_result(&cli.output, &report.render(cli.format.into()))?;
    stage(
        cli,
        4,
        format_args!("Wrote result to {}", cli.output.display()),
    );

    if !cli.quiet {
        println!(
            "{} '{}' appears {} times in {}",
            "✓".if_supports_color(Stdout, |text| text.green()),
            report.target,
            report
                .occurrences
                .if_supports_color(Stdout, |text| text.bold()),
            cli.input.display()
        );
    }

    Ok(())
}
