// File: history.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;

use super::{print_info, print_success, print_warning};
use crate::analyzer::Verdict;
use crate::cli::HistoryArgs;
use crate::storage::HistoryDatabase;

pub async fn execute(args: &HistoryArgs, db: &HistoryDatabase) -> Result<()> {
    if args.discovered {
        return show_discovered(args, db);
    }

    let verdicts = match &args.url {
        Some(url) => {
            print_info(&format!("Retrieving verdicts for: {}", url));
            let mut verdicts = db.verdicts_for(url)?;
            verdicts.truncate(args.limit);
            verdicts
        }
        None => {
            print_info("Retrieving recent verdicts");
            db.recent_verdicts(args.limit)?
        }
    };

    if verdicts.is_empty() {
        print_warning("No stored verdicts found");
        return Ok(());
    }

    print_success(&format!("Found {} verdict(s)", verdicts.len()));
    print!("{}", render_verdict_table(&verdicts));
    Ok(())
}

fn show_discovered(args: &HistoryArgs, db: &HistoryDatabase) -> Result<()> {
    print_info("Retrieving discovered URLs");
    let urls = db.discovered_urls()?;
    if urls.is_empty() {
        print_warning("No discovered URLs recorded");
        return Ok(());
    }
    print_success(&format!("Found {} discovered URL(s)", urls.len()));
    for url in urls.iter().take(args.limit) {
        println!("  {}", url);
    }
    Ok(())
}

fn render_verdict_table(verdicts: &[Verdict]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:<18} {:>8} {:>8} {:>6}  {}\n",
        "Scanned", "Classification", "Accepted", "Failed", "Total", "Target"
    ));
    out.push_str(&format!("{}\n", "-".repeat(90)));
    for verdict in verdicts {
        out.push_str(&format!(
            "{:<20} {:<18} {:>8} {:>8} {:>6}  {}\n",
            verdict.scanned_at.format("%Y-%m-%d %H:%M:%S"),
            verdict.classification.to_string(),
            verdict.accepted,
            verdict.failed,
            verdict.total_requests,
            verdict.target_url
        ));
    }
    out
}
