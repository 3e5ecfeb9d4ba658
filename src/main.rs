// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use simple_logger::SimpleLogger;
use std::io;
use std::sync::Arc;

use raceprobe::catalog::{ListCatalog, UrlCatalog};
use raceprobe::cli::{Cli, Commands};
use raceprobe::commands;
use raceprobe::orchestrator::BatchOrchestrator;
use raceprobe::report::{create_file_sink, ConsoleSink, ReportSink, ScanSummary};
use raceprobe::storage::HistoryDatabase;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = SimpleLogger::new().with_level(cli.log_level_filter()).init() {
        eprintln!("Failed to initialise logger: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn confirm_authorization() -> Result<bool> {
    println!(
        "{}",
        "This tool sends bursts of concurrent requests that can change server state"
            .bright_yellow()
    );
    println!("   (redeem vouchers, place orders, transfer funds).");
    println!("   You MUST have explicit authorization to test these targets.");
    println!();
    println!(
        "{}",
        "Do you have explicit written authorization to test all target systems? (yes/NO):"
            .bright_yellow()
    );
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read authorization answer")?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

/// Stdin carries the targets in that mode, so it cannot also answer the
/// authorization prompt.
fn check_authorization_mode(cli: &Cli) -> Result<()> {
    if cli.reads_targets_from_stdin() && !cli.skip_authorization_check {
        bail!("Reading targets from stdin requires --i-have-authorization");
    }
    Ok(())
}

fn load_catalog(cli: &Cli) -> Result<ListCatalog> {
    if let Some(url) = &cli.url {
        return Ok(ListCatalog::from_urls([url]));
    }
    if let Some(path) = &cli.input_file {
        return ListCatalog::from_file(path)
            .with_context(|| format!("Failed to read targets from {}", path.display()));
    }
    ListCatalog::from_reader(io::stdin().lock()).context("Failed to read targets from stdin")
}

fn open_history(cli: &Cli) -> Result<HistoryDatabase> {
    HistoryDatabase::new(cli.db.clone())
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::History(args)) => {
            return commands::handle_history_command(args, &open_history(&cli)?).await
        }
        Some(Commands::Stats(args)) => {
            return commands::handle_stats_command(args, &open_history(&cli)?).await
        }
        None => {}
    }

    let config = cli.build_config()?;
    let policy = cli.build_policy()?;

    if config.concurrency() < 2 {
        warn!("Concurrency below 2 cannot expose divergence; every target will be CONSISTENT or INCONCLUSIVE");
    }

    check_authorization_mode(&cli)?;
    if !cli.skip_authorization_check && !confirm_authorization()? {
        println!("{}", "Authorization not confirmed. Exiting for safety.".red());
        println!("   Use --i-have-authorization flag only if you have proper authorization.");
        return Ok(());
    }

    let history = if cli.no_store_history {
        None
    } else {
        Some(Arc::new(open_history(&cli)?))
    };

    let mut catalog = load_catalog(&cli)?;
    if let Some(history) = &history {
        catalog = catalog.with_history(history.clone());
    }
    if catalog.is_empty() {
        eprintln!(
            "{}",
            "No targets specified. Use --url, -i or pipe targets on stdin".red()
        );
        return Ok(());
    }

    let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
    if !cli.quiet {
        sinks.push(Box::new(ConsoleSink::new(cli.verbose)));
    }
    if let Some(path) = &cli.output {
        sinks.push(create_file_sink(path, cli.report_format())?);
    }

    let orchestrator = BatchOrchestrator::new(config, policy)?;
    let planned = orchestrator
        .config()
        .max_targets()
        .map_or(catalog.len(), |cap| catalog.len().min(cap));
    info!(
        "Scanning {} target(s), {} requests per burst",
        planned,
        orchestrator.config().concurrency()
    );

    let pb = ProgressBar::new(planned as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}",
            )
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    if cli.quiet {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut summary = ScanSummary::default();
    let mut redirects = Vec::new();
    {
        let mut verdicts = Box::pin(orchestrator.run_catalog(&mut catalog));
        while let Some(verdict) = verdicts.next().await {
            pb.set_message(verdict.target_url.clone());
            for sink in sinks.iter_mut() {
                pb.suspend(|| sink.publish(&verdict))?;
            }
            if let Some(history) = &history {
                history.store_verdict(&verdict)?;
            }
            redirects.extend(verdict.redirected_to.iter().cloned());
            summary.record(&verdict);
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    for url in &redirects {
        catalog.record_discovered(url)?;
    }

    for sink in sinks.iter_mut() {
        sink.finish()?;
    }
    if let Some(history) = &history {
        history.flush()?;
    }

    if !cli.quiet {
        println!("{}", summary.render());
        let discovered = catalog.discovered().count();
        if discovered > 0 {
            println!("Discovered {} new URL(s) through redirects", discovered);
        }
    }
    Ok(())
}
