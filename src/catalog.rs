// File: catalog.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::RaceResult;
use crate::storage::HistoryDatabase;
use log::debug;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Source of targets and sink for URLs found along the way.
pub trait UrlCatalog {
    fn next(&mut self) -> Option<String>;

    /// Idempotent: recording a URL twice is not an error.
    fn record_discovered(&mut self, url: &str) -> anyhow::Result<()>;
}

/// Targets from a list, a file or stdin, deduplicated, in input order.
#[derive(Debug, Default)]
pub struct ListCatalog {
    pending: VecDeque<String>,
    discovered: BTreeSet<String>,
    history: Option<Arc<HistoryDatabase>>,
}

impl ListCatalog {
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let pending = urls
            .into_iter()
            .filter_map(|line| normalize_target(line.as_ref()))
            .filter(|url| seen.insert(url.clone()))
            .collect();
        Self {
            pending,
            discovered: BTreeSet::new(),
            history: None,
        }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> RaceResult<Self> {
        let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_urls(lines))
    }

    pub fn from_file(path: &Path) -> RaceResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Discovered URLs are also persisted to `history`.
    pub fn with_history(mut self, history: Arc<HistoryDatabase>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn discovered(&self) -> impl Iterator<Item = &String> {
        self.discovered.iter()
    }
}

impl UrlCatalog for ListCatalog {
    fn next(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    fn record_discovered(&mut self, url: &str) -> anyhow::Result<()> {
        if self.discovered.insert(url.to_string()) {
            debug!("Discovered {}", url);
            if let Some(history) = &self.history {
                history.record_discovered(url)?;
            }
        }
        Ok(())
    }
}

/// Blank lines and `#` comments yield nothing; bare hosts get `http://`.
fn normalize_target(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{}", trimmed))
    }
}
