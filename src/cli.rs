// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ScanConfig, DEFAULT_USER_AGENT};
use crate::error::{RaceError, RaceResult};
use crate::policy::{parse_status_set, ComparisonPolicy, PolicyPreset};
use crate::report::ReportFormat;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(long = "url", help = "Single target URL")]
    pub url: Option<String>,

    #[arg(
        short = 'i',
        long = "input-file",
        help = "File with one target per line (stdin when neither --url nor this is given)"
    )]
    pub input_file: Option<PathBuf>,

    #[arg(short = 'o', long = "output", help = "Write verdicts to this file")]
    pub output: Option<PathBuf>,

    #[arg(long = "format", value_enum, help = "Output format (default: from file extension, else jsonl)")]
    pub format: Option<ReportFormat>,

    #[arg(
        short = 'c',
        long = "concurrency",
        default_value_t = 10,
        help = "Requests per burst"
    )]
    pub concurrency: usize,

    #[arg(
        short = 't',
        long = "timeout",
        default_value_t = 10,
        help = "HTTP request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(long = "deadline", help = "Burst deadline in milliseconds")]
    pub deadline: Option<u64>,

    #[arg(
        long = "grace",
        default_value_t = 500,
        help = "Milliseconds to wait for all units to reach the barrier"
    )]
    pub grace: u64,

    #[arg(long = "policy", value_enum, default_value = "consistency")]
    pub policy: PolicyPreset,

    #[arg(
        long = "expect-max-success",
        help = "More accepted responses than this flag the target"
    )]
    pub expect_max_success: Option<usize>,

    #[arg(
        long = "success-status",
        help = "Accepted status codes, e.g. 200-299,302"
    )]
    pub success_status: Option<String>,

    #[arg(long = "ignore-field", help = "JSON field to strip before hashing")]
    pub ignore_field: Vec<String>,

    #[arg(long = "ignore-pattern", help = "Regex removed from bodies before hashing")]
    pub ignore_pattern: Vec<String>,

    #[arg(long = "ignore-volatile", help = "Strip timestamps, UUIDs and tokens before hashing")]
    pub ignore_volatile: bool,

    #[arg(short = 'X', long = "method", default_value = "GET")]
    pub method: String,

    #[arg(short = 'H', long = "header", help = "Extra header as 'Name: value'")]
    pub header: Vec<String>,

    #[arg(
        short = 'd',
        long = "data",
        help = "Request body; {{slot}} is replaced by the slot index"
    )]
    pub data: Option<String>,

    #[arg(long = "user-agent", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(short = 'w', long = "workers", default_value_t = 1, help = "Targets scanned in parallel")]
    pub workers: usize,

    #[arg(short = 'r', long = "rate-limit", default_value_t = 10, help = "Target starts per second")]
    pub rate_limit: u32,

    #[arg(long = "max-targets", help = "Stop after this many targets (default: no limit)")]
    pub max_targets: Option<usize>,

    #[arg(long = "max-body", default_value_t = 65536, help = "Bytes of body kept per response")]
    pub max_body: usize,

    #[arg(long = "no-prewarm", help = "Do not open connections before the barrier")]
    pub no_prewarm: bool,

    #[arg(long = "no-redirects", help = "Do not follow redirects")]
    pub no_redirects: bool,

    #[arg(long = "insecure", help = "Accept invalid TLS certificates")]
    pub insecure: bool,

    #[arg(
        long = "fast-threshold",
        help = "Report responses faster than this many milliseconds"
    )]
    pub fast_threshold: Option<u64>,

    #[arg(
        long = "db",
        global = true,
        help = "History database directory (default: <local data dir>/raceprobe/history)"
    )]
    pub db: Option<PathBuf>,

    #[arg(long = "no-store-history", help = "Do not persist verdicts and discovered URLs")]
    pub no_store_history: bool,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", help = "Reduce output verbosity")]
    pub quiet: bool,

    #[arg(long = "no-color", global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long = "i-have-authorization")]
    pub skip_authorization_check: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show stored verdicts or discovered URLs
    History(HistoryArgs),
    /// Show history database statistics
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(help = "Target URL to show verdicts for")]
    pub url: Option<String>,

    #[arg(short = 'l', long = "limit", default_value_t = 20)]
    pub limit: usize,

    #[arg(long = "discovered", help = "List URLs discovered through redirects")]
    pub discovered: bool,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[arg(long = "detailed", help = "List every target flagged as likely vulnerable")]
    pub detailed: bool,
}

impl Cli {
    /// Targets come from stdin when neither `--url` nor `-i` is given.
    pub fn reads_targets_from_stdin(&self) -> bool {
        self.url.is_none() && self.input_file.is_none()
    }

    pub fn build_config(&self) -> RaceResult<ScanConfig> {
        let mut config = ScanConfig::new();
        config.set_concurrency(self.concurrency);
        config.set_timeout(Duration::from_secs(self.timeout));
        config.set_deadline(self.deadline.map(Duration::from_millis));
        config.set_grace(Duration::from_millis(self.grace));
        config.set_workers(self.workers);
        config.set_rate_limit(self.rate_limit);
        config.set_max_targets(self.max_targets);
        config.set_max_body_bytes(self.max_body);
        config.set_prewarm(!self.no_prewarm);
        config.set_follow_redirects(!self.no_redirects);
        config.set_insecure(self.insecure);
        config.set_user_agent(self.user_agent.clone());
        config.set_method(self.method.to_uppercase());
        for header in &self.header {
            let (name, value) = parse_header(header)?;
            config.set_header(name, value);
        }
        config.set_body(self.data.as_ref().map(|d| d.as_bytes().to_vec()));
        config.validate()?;
        Ok(config)
    }

    pub fn build_policy(&self) -> RaceResult<ComparisonPolicy> {
        let mut policy = ComparisonPolicy::from_preset(self.policy);
        if let Some(max) = self.expect_max_success {
            policy = policy.with_max_successes(max);
        }
        if let Some(statuses) = &self.success_status {
            policy = policy.with_success_statuses(parse_status_set(statuses)?);
        }
        for field in &self.ignore_field {
            policy = policy.with_ignored_field(field.clone());
        }
        for pattern in &self.ignore_pattern {
            policy = policy.with_ignore_pattern(pattern)?;
        }
        if self.ignore_volatile {
            policy = policy.with_volatile_patterns();
        }
        if let Some(ms) = self.fast_threshold {
            policy = policy.with_fast_response_threshold(Duration::from_millis(ms));
        }
        Ok(policy)
    }

    /// `-q` wins over `-v`, both win over `--log-level`.
    pub fn log_level_filter(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        if self.verbose {
            return LevelFilter::Debug;
        }
        match self.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        }
    }

    pub fn report_format(&self) -> ReportFormat {
        self.format
            .or_else(|| self.output.as_deref().and_then(ReportFormat::from_path))
            .unwrap_or(ReportFormat::Jsonl)
    }
}

fn parse_header(raw: &str) -> RaceResult<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| RaceError::Config(format!("header '{}' is not 'Name: value'", raw)))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(RaceError::Config(format!("header '{}' has no name", raw)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
