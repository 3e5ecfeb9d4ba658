// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::analyzer::{Classification, Verdict};

/// Receives verdicts one at a time, in target order.
pub trait ReportSink {
    fn publish(&mut self, verdict: &Verdict) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
    Jsonl,
}

impl ReportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "txt" | "log" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "jsonl" | "ndjson" => Some(ReportFormat::Jsonl),
            _ => None,
        }
    }
}

pub fn create_file_sink(path: &Path, format: ReportFormat) -> Result<Box<dyn ReportSink>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;
    let writer = BufWriter::new(file);
    Ok(match format {
        ReportFormat::Text => Box::new(TextSink::new(writer)),
        ReportFormat::Json => Box::new(JsonSink::new(writer)),
        ReportFormat::Jsonl => Box::new(JsonlSink::new(writer)),
    })
}

fn classification_label(classification: Classification) -> ColoredString {
    let label = classification.to_string();
    match classification {
        Classification::LikelyVulnerable => label.bright_red().bold(),
        Classification::Inconsistent => label.yellow().bold(),
        Classification::Consistent => label.green(),
        Classification::Inconclusive => label.dimmed(),
    }
}

pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ReportSink for ConsoleSink {
    fn publish(&mut self, verdict: &Verdict) -> Result<()> {
        println!(
            "{} {} [{}/{} responded, {} accepted, codes {:?}]",
            classification_label(verdict.classification),
            verdict.target_url,
            verdict.succeeded,
            verdict.total_requests,
            verdict.accepted,
            verdict.distinct_status_codes
        );
        let shown = if self.verbose || verdict.classification != Classification::Consistent {
            verdict.evidence.len()
        } else {
            0
        };
        for finding in verdict.evidence.iter().take(shown) {
            println!("    {}", finding.dimmed());
        }
        Ok(())
    }
}

pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ReportSink for JsonlSink<W> {
    fn publish(&mut self, verdict: &Verdict) -> Result<()> {
        let json = serde_json::to_string(verdict).context("Failed to serialize verdict")?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Buffers verdicts and writes a single JSON array on `finish`.
pub struct JsonSink<W: Write> {
    writer: W,
    verdicts: Vec<Verdict>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            verdicts: Vec::new(),
        }
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn publish(&mut self, verdict: &Verdict) -> Result<()> {
        self.verdicts.push(verdict.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.verdicts)
            .map_err(|e| anyhow::anyhow!("Failed to serialize report to JSON: {}", e))?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }
}

pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> ReportSink for TextSink<W> {
    fn publish(&mut self, verdict: &Verdict) -> Result<()> {
        writeln!(self.writer, "{}", "=".repeat(79))?;
        writeln!(self.writer, "Target:         {}", verdict.target_url)?;
        writeln!(
            self.writer,
            "Scanned:        {}",
            verdict.scanned_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(self.writer, "Classification: {}", verdict.classification)?;
        writeln!(
            self.writer,
            "Requests:       {} sent, {} responded, {} accepted, {} failed",
            verdict.total_requests, verdict.succeeded, verdict.accepted, verdict.failed
        )?;
        writeln!(
            self.writer,
            "Status codes:   {:?}",
            verdict.distinct_status_codes
        )?;
        writeln!(
            self.writer,
            "Body hashes:    {}",
            verdict.distinct_body_hashes.len()
        )?;
        writeln!(self.writer, "Evidence:")?;
        for finding in &verdict.evidence {
            writeln!(self.writer, "  - {}", finding)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Tally over a whole run, printed after the last verdict.
#[derive(Debug, Default)]
pub struct ScanSummary {
    total: usize,
    by_classification: BTreeMap<String, usize>,
    flagged: Vec<String>,
}

impl ScanSummary {
    pub fn record(&mut self, verdict: &Verdict) {
        self.total += 1;
        *self
            .by_classification
            .entry(verdict.classification.to_string())
            .or_insert(0) += 1;
        if verdict.classification == Classification::LikelyVulnerable {
            self.flagged.push(verdict.target_url.clone());
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.by_classification
            .get(&classification.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Targets classified LIKELY_VULNERABLE, in the order they were seen.
    pub fn flagged(&self) -> &[String] {
        &self.flagged
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("\nScan Summary\n================\n");
        out.push_str(&format!("Targets scanned: {}\n", self.total));
        for (classification, count) in &self.by_classification {
            out.push_str(&format!("  {}: {}\n", classification, count));
        }
        if !self.flagged.is_empty() {
            out.push_str("Likely vulnerable:\n");
            for url in &self.flagged {
                out.push_str(&format!("  {}\n", url));
            }
        }
        out
    }
}
