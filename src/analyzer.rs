// File: analyzer.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::policy::ComparisonPolicy;
use crate::record::ResponseRecord;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Consistent,
    Inconsistent,
    LikelyVulnerable,
    Inconclusive,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Consistent => write!(f, "CONSISTENT"),
            Classification::Inconsistent => write!(f, "INCONSISTENT"),
            Classification::LikelyVulnerable => write!(f, "LIKELY_VULNERABLE"),
            Classification::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Classified outcome of one target's burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub target_url: String,
    pub scanned_at: DateTime<Utc>,
    pub total_requests: usize,
    pub succeeded: usize,
    pub accepted: usize,
    pub failed: usize,
    pub distinct_status_codes: BTreeSet<u16>,
    pub distinct_body_hashes: BTreeSet<String>,
    pub classification: Classification,
    pub max_start_skew: Duration,
    pub redirected_to: BTreeSet<String>,
    pub evidence: Vec<String>,
}

impl Verdict {
    /// Verdict for a target whose batch could not run at all.
    pub fn inconclusive(target_url: &str, total_requests: usize, reason: String) -> Self {
        Verdict {
            target_url: target_url.to_string(),
            scanned_at: Utc::now(),
            total_requests,
            succeeded: 0,
            accepted: 0,
            failed: total_requests,
            distinct_status_codes: BTreeSet::new(),
            distinct_body_hashes: BTreeSet::new(),
            classification: Classification::Inconclusive,
            max_start_skew: Duration::ZERO,
            redirected_to: BTreeSet::new(),
            evidence: vec![reason],
        }
    }
}

pub struct DivergenceAnalyzer;

impl DivergenceAnalyzer {
    /// Classifies a frozen snapshot. The classification depends only on
    /// `records` and `policy`.
    ///
    /// Bursts of a single request can only come out `Consistent` or
    /// `Inconclusive`; callers wanting a signal must send at least two.
    pub fn analyze(target_url: &str, records: &[ResponseRecord], policy: &ComparisonPolicy) -> Verdict {
        let mut ordered: Vec<&ResponseRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.index());

        let (succeeded, failed): (Vec<&ResponseRecord>, Vec<&ResponseRecord>) =
            ordered.iter().copied().partition(|r| r.succeeded());

        let mut by_status: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        let mut by_hash: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accepted_slots = Vec::new();

        for record in &succeeded {
            let status = record.status_code().unwrap_or_default();
            by_status.entry(status).or_default().push(record.index());
            by_hash
                .entry(policy.fingerprint(record.body()))
                .or_default()
                .push(record.index());
            if policy.is_success_status(status) {
                accepted_slots.push(record.index());
            }
        }

        let total = ordered.len();
        let comparable = total >= 2;
        let mut evidence = Vec::new();
        // Per-slot lines, keyed by the first slot they mention.
        let mut slot_lines: Vec<(usize, String)> = Vec::new();

        let classification = if succeeded.is_empty() {
            evidence.push(format!("all {} requests failed", total));
            Classification::Inconclusive
        } else if let Some(limit) = policy
            .max_successes()
            .filter(|limit| comparable && accepted_slots.len() > *limit)
        {
            evidence.push(format!(
                "{} of {} requests returned success status, expected ≤ {} (slots {})",
                accepted_slots.len(),
                total,
                limit,
                join_slots(&accepted_slots)
            ));
            Classification::LikelyVulnerable
        } else if comparable && (by_status.len() > 1 || by_hash.len() > 1) {
            evidence.push(format!(
                "responses diverged: {} distinct status codes, {} distinct body hashes",
                by_status.len(),
                by_hash.len()
            ));
            if by_status.len() > 1 {
                for (status, slots) in &by_status {
                    slot_lines.push((slots[0], format!("status {} from slots {}", status, join_slots(slots))));
                }
            }
            if by_hash.len() > 1 {
                for (hash, slots) in &by_hash {
                    slot_lines.push((
                        slots[0],
                        format!("body sha256:{} from slots {}", &hash[..12], join_slots(slots)),
                    ));
                }
            }
            Classification::Inconsistent
        } else {
            let status = by_status.keys().next().copied().unwrap_or_default();
            evidence.push(format!(
                "{} responding requests returned status {} with identical normalized bodies",
                succeeded.len(),
                status
            ));
            Classification::Consistent
        };

        for record in &ordered {
            if let Some(kind) = record.error() {
                slot_lines.push((record.index(), format!("slot {}: {}", record.index(), kind)));
            } else if record.truncated() {
                slot_lines.push((
                    record.index(),
                    format!("slot {}: body truncated at capture limit", record.index()),
                ));
            }
        }
        slot_lines.sort_by_key(|(first_slot, _)| *first_slot);
        evidence.extend(slot_lines.into_iter().map(|(_, line)| line));

        let max_start_skew = start_skew(&succeeded);
        if succeeded.len() >= 2 {
            evidence.push(format!(
                "start skew across responding requests: {:.3} ms",
                max_start_skew.as_secs_f64() * 1000.0
            ));
        }

        if let Some(threshold) = policy.fast_response_threshold() {
            let fast: Vec<usize> = succeeded
                .iter()
                .filter(|r| r.elapsed() < threshold)
                .map(|r| r.index())
                .collect();
            if !fast.is_empty() {
                evidence.push(format!(
                    "responses under {} ms: slots {}",
                    threshold.as_millis(),
                    join_slots(&fast)
                ));
            }
        }

        let requested = Url::parse(target_url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| target_url.to_string());
        let redirected_to: BTreeSet<String> = succeeded
            .iter()
            .filter_map(|r| r.final_url())
            .filter(|u| *u != requested)
            .map(str::to_string)
            .collect();

        debug!(
            "Analyzed {}: {} ({} succeeded, {} accepted, {} failed)",
            target_url,
            classification,
            succeeded.len(),
            accepted_slots.len(),
            failed.len()
        );

        Verdict {
            target_url: target_url.to_string(),
            scanned_at: Utc::now(),
            total_requests: total,
            succeeded: succeeded.len(),
            accepted: accepted_slots.len(),
            failed: failed.len(),
            distinct_status_codes: by_status.keys().copied().collect(),
            distinct_body_hashes: by_hash.into_keys().collect(),
            classification,
            max_start_skew,
            redirected_to,
            evidence,
        }
    }
}

fn start_skew(records: &[&ResponseRecord]) -> Duration {
    let offsets = records.iter().map(|r| r.start_offset());
    match (offsets.clone().min(), offsets.max()) {
        (Some(min), Some(max)) => max - min,
        _ => Duration::ZERO,
    }
}

fn join_slots(slots: &[usize]) -> String {
    slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
