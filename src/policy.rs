// File: policy.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{RaceError, RaceResult};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::ops::RangeInclusive;
use std::time::Duration;

static VOLATILE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
            .unwrap(),
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
            .unwrap(),
        Regex::new(r"(?i)\b[0-9a-f]{32,}\b").unwrap(),
        Regex::new(r"\b1\d{9}(?:\d{3})?\b").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyPreset {
    /// Flag any divergence among responses.
    Consistency,
    /// A single-use action: at most one request may succeed.
    SingleSuccess,
}

/// How a completed burst is judged.
///
/// `max_successes` is the success-count expectation: more accepted responses
/// than this marks the target as likely vulnerable. Bodies are fingerprinted
/// after `ignore_fields` (JSON keys, any depth) and `ignore_patterns` are
/// stripped.
#[derive(Debug, Clone)]
pub struct ComparisonPolicy {
    max_successes: Option<usize>,
    success_statuses: Vec<RangeInclusive<u16>>,
    ignore_fields: Vec<String>,
    ignore_patterns: Vec<Regex>,
    fast_response_threshold: Option<Duration>,
}

impl Default for ComparisonPolicy {
    fn default() -> Self {
        Self::consistency()
    }
}

impl ComparisonPolicy {
    pub fn consistency() -> Self {
        Self {
            max_successes: None,
            success_statuses: vec![200..=299],
            ignore_fields: Vec::new(),
            ignore_patterns: Vec::new(),
            fast_response_threshold: None,
        }
    }

    pub fn single_success() -> Self {
        Self::consistency().with_max_successes(1)
    }

    pub fn from_preset(preset: PolicyPreset) -> Self {
        match preset {
            PolicyPreset::Consistency => Self::consistency(),
            PolicyPreset::SingleSuccess => Self::single_success(),
        }
    }

    pub fn with_max_successes(mut self, max: usize) -> Self {
        self.max_successes = Some(max);
        self
    }

    pub fn with_success_statuses(mut self, statuses: Vec<RangeInclusive<u16>>) -> Self {
        self.success_statuses = statuses;
        self
    }

    pub fn with_ignored_field(mut self, field: impl Into<String>) -> Self {
        self.ignore_fields.push(field.into());
        self
    }

    pub fn with_ignore_pattern(mut self, pattern: &str) -> RaceResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| RaceError::Config(format!("bad ignore pattern '{}': {}", pattern, e)))?;
        self.ignore_patterns.push(regex);
        Ok(self)
    }

    pub fn with_volatile_patterns(mut self) -> Self {
        self.ignore_patterns.extend(VOLATILE_PATTERNS.iter().cloned());
        self
    }

    pub fn with_fast_response_threshold(mut self, threshold: Duration) -> Self {
        self.fast_response_threshold = Some(threshold);
        self
    }

    pub fn max_successes(&self) -> Option<usize> {
        self.max_successes
    }

    pub fn fast_response_threshold(&self) -> Option<Duration> {
        self.fast_response_threshold
    }

    pub fn is_success_status(&self, status: u16) -> bool {
        self.success_statuses.iter().any(|r| r.contains(&status))
    }

    pub fn normalize(&self, body: &[u8]) -> Vec<u8> {
        let mut normalized = if self.ignore_fields.is_empty() {
            body.to_vec()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(mut value) => {
                    strip_fields(&mut value, &self.ignore_fields);
                    serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
                }
                Err(_) => body.to_vec(),
            }
        };

        for pattern in &self.ignore_patterns {
            normalized = pattern.replace_all(&normalized, &b""[..]).into_owned();
        }
        normalized
    }

    /// SHA-256 of the normalized body, lower-case hex.
    pub fn fingerprint(&self, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalize(body));
        format!("{:x}", hasher.finalize())
    }
}

fn strip_fields(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !fields.iter().any(|f| f == key));
            for child in map.values_mut() {
                strip_fields(child, fields);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_fields(item, fields);
            }
        }
        _ => {}
    }
}

/// Parses `"200-299,302"` style status lists.
pub fn parse_status_set(raw: &str) -> RaceResult<Vec<RangeInclusive<u16>>> {
    let mut ranges = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let bad = || RaceError::Config(format!("invalid status range '{}'", part));
        let range = match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo.trim().parse().map_err(|_| bad())?;
                let hi: u16 = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                lo..=hi
            }
            None => {
                let code: u16 = part.parse().map_err(|_| bad())?;
                code..=code
            }
        };
        ranges.push(range);
    }
    if ranges.is_empty() {
        return Err(RaceError::Config("empty status set".to_string()));
    }
    Ok(ranges)
}
