// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{RaceError, RaceResult};
use std::collections::BTreeMap;
use std::time::Duration;

const DEADLINE_EPSILON: Duration = Duration::from_millis(250);

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Settings for one scan run. Built once, then handed to the orchestrator
/// by value.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    concurrency: usize,
    timeout: Duration,
    deadline: Option<Duration>,
    grace: Duration,
    workers: usize,
    rate_limit: u32,
    max_targets: Option<usize>,
    max_body_bytes: usize,
    prewarm: bool,
    insecure: bool,
    follow_redirects: bool,
    user_agent: String,
    method: String,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self {
            concurrency: 10,
            timeout: Duration::from_secs(10),
            deadline: None,
            grace: Duration::from_millis(500),
            workers: 1,
            rate_limit: 10,
            max_targets: None,
            max_body_bytes: 64 * 1024,
            prewarm: true,
            insecure: false,
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn validate(&self) -> RaceResult<()> {
        if self.concurrency == 0 {
            return Err(RaceError::Config("concurrency must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(RaceError::Config("workers must be at least 1".into()));
        }
        if self.rate_limit == 0 {
            return Err(RaceError::Config("rate limit must be at least 1".into()));
        }
        if self.grace.is_zero() {
            return Err(RaceError::Config("grace window must be non-zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(RaceError::Config("timeout must be non-zero".into()));
        }
        if matches!(self.deadline, Some(d) if d.is_zero()) {
            return Err(RaceError::Config("deadline must be non-zero".into()));
        }
        Ok(())
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency;
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.deadline = deadline;
    }

    /// Global batch deadline. Defaults to the per-request timeout plus the
    /// barrier grace window and a small epsilon.
    pub fn deadline(&self) -> Duration {
        self.deadline
            .unwrap_or(self.timeout + self.grace + DEADLINE_EPSILON)
    }

    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers;
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn set_rate_limit(&mut self, rate_limit: u32) {
        self.rate_limit = rate_limit;
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn set_max_targets(&mut self, max_targets: Option<usize>) {
        self.max_targets = max_targets;
    }

    /// Optional cap on targets per run. `None` scans everything.
    pub fn max_targets(&self) -> Option<usize> {
        self.max_targets
    }

    pub fn set_max_body_bytes(&mut self, max_body_bytes: usize) {
        self.max_body_bytes = max_body_bytes;
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn set_prewarm(&mut self, prewarm: bool) {
        self.prewarm = prewarm;
    }

    pub fn prewarm(&self) -> bool {
        self.prewarm
    }

    pub fn set_insecure(&mut self, insecure: bool) {
        self.insecure = insecure;
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    pub fn set_follow_redirects(&mut self, follow_redirects: bool) {
        self.follow_redirects = follow_redirects;
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn set_user_agent(&mut self, user_agent: String) {
        self.user_agent = user_agent;
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_method(&mut self, method: String) {
        self.method = method;
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.headers.insert(name, value);
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn set_body(&mut self, body: Option<Vec<u8>>) {
        self.body = body;
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}
