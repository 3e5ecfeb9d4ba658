// File: storage.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use chrono::Utc;
use dirs::data_local_dir;
use sled::{Config, Db};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::analyzer::Verdict;

/// On-disk history of discovered URLs and verdicts.
///
/// The `urls` tree is keyed by the URL itself, which is what makes
/// discovered URLs unique. Verdicts are keyed by scan time and target.
#[derive(Debug)]
pub struct HistoryDatabase {
    db: Db,
    urls_tree: sled::Tree,
    verdicts_tree: sled::Tree,
}

impl HistoryDatabase {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let db_path = data_dir.unwrap_or_else(default_data_dir);

        std::fs::create_dir_all(&db_path).context("Failed to create database directory")?;

        let db = Config::default()
            .path(&db_path)
            .open()
            .context("Failed to open database")?;

        let urls_tree = db.open_tree(b"urls").context("Failed to open urls tree")?;
        let verdicts_tree = db
            .open_tree(b"verdicts")
            .context("Failed to open verdicts tree")?;

        Ok(Self {
            db,
            urls_tree,
            verdicts_tree,
        })
    }

    /// Returns true when the URL was not known before.
    pub fn record_discovered(&self, url: &str) -> Result<bool> {
        let stamp = Utc::now().to_rfc3339();
        let previous = self
            .urls_tree
            .compare_and_swap(url.as_bytes(), None as Option<&[u8]>, Some(stamp.as_bytes()))
            .context("Failed to record discovered URL")?;
        Ok(previous.is_ok())
    }

    pub fn discovered_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for entry in self.urls_tree.iter() {
            let (key, _) = entry.context("Failed to iterate discovered URLs")?;
            urls.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(urls)
    }

    pub fn store_verdict(&self, verdict: &Verdict) -> Result<()> {
        let key = format!(
            "{:016x}_{}",
            verdict.scanned_at.timestamp_millis() as u64,
            verdict.target_url
        );
        let value = serde_json::to_vec(verdict).context("Failed to serialize verdict")?;
        self.verdicts_tree
            .insert(key.as_bytes(), value)
            .context("Failed to store verdict")?;
        Ok(())
    }

    /// Stored verdicts for `target_url`, newest first.
    pub fn verdicts_for(&self, target_url: &str) -> Result<Vec<Verdict>> {
        let mut results = Vec::new();
        for entry in self.verdicts_tree.iter() {
            let (_, value) = entry.context("Failed to iterate verdicts")?;
            let verdict: Verdict =
                serde_json::from_slice(&value).context("Failed to deserialize verdict")?;
            if verdict.target_url == target_url {
                results.push(verdict);
            }
        }
        results.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at));
        Ok(results)
    }

    /// Up to `limit` stored verdicts across all targets, newest first.
    pub fn recent_verdicts(&self, limit: usize) -> Result<Vec<Verdict>> {
        let mut results = Vec::new();
        for entry in self.verdicts_tree.iter().rev().take(limit) {
            let (_, value) = entry.context("Failed to iterate verdicts")?;
            results.push(serde_json::from_slice(&value).context("Failed to deserialize verdict")?);
        }
        Ok(results)
    }

    pub fn stats(&self) -> Result<HashMap<String, u64>> {
        let mut stats = HashMap::new();
        stats.insert("discovered_urls".to_string(), self.urls_tree.len() as u64);
        stats.insert("verdicts".to_string(), self.verdicts_tree.len() as u64);
        stats.insert(
            "size_bytes".to_string(),
            self.db.size_on_disk().context("Failed to get database size")?,
        );
        Ok(stats)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush database")?;
        Ok(())
    }
}

/// `<local data dir>/raceprobe/history`, or `./raceprobe/history` when the
/// platform has no local data dir.
pub fn default_data_dir() -> PathBuf {
    data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("raceprobe")
        .join("history")
}
