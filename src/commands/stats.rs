// File: stats.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;
use std::collections::HashMap;

use super::{format_file_size, print_info};
use crate::analyzer::Classification;
use crate::cli::StatsArgs;
use crate::report::ScanSummary;
use crate::storage::HistoryDatabase;

const CLASSIFICATIONS: [Classification; 4] = [
    Classification::LikelyVulnerable,
    Classification::Inconsistent,
    Classification::Consistent,
    Classification::Inconclusive,
];

pub async fn execute(args: &StatsArgs, db: &HistoryDatabase) -> Result<()> {
    print_info("Generating history statistics...");

    let database_info = db.stats()?;
    let mut summary = ScanSummary::default();
    for verdict in db.recent_verdicts(usize::MAX)? {
        summary.record(&verdict);
    }

    print!("{}", render_stats(&database_info, &summary, args.detailed));
    Ok(())
}

fn render_stats(database_info: &HashMap<String, u64>, summary: &ScanSummary, detailed: bool) -> String {
    let stat = |key: &str| database_info.get(key).copied().unwrap_or(0);

    let mut out = String::new();
    out.push_str("\nHistory Statistics\n==================\n");
    out.push_str(&format!("Stored verdicts: {}\n", summary.total()));
    for classification in CLASSIFICATIONS {
        out.push_str(&format!(
            "  {}: {}\n",
            classification,
            summary.count(classification)
        ));
    }
    out.push_str(&format!("Discovered URLs: {}\n", stat("discovered_urls")));
    out.push_str(&format!(
        "Database size: {}\n",
        format_file_size(stat("size_bytes"))
    ));

    if detailed && !summary.flagged().is_empty() {
        out.push_str("Likely vulnerable targets:\n");
        for url in summary.flagged() {
            out.push_str(&format!("  {}\n", url));
        }
    }
    out
}
