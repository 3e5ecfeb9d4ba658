// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use raceprobe::config::ScanConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

/// Grants the first `grants` requests it sees and rejects the rest with 409,
/// like a voucher endpoint with a check-then-act window.
pub struct SingleUseVoucher {
    grants: usize,
    seen: AtomicUsize,
}

impl SingleUseVoucher {
    pub fn new(grants: usize) -> Self {
        Self {
            grants,
            seen: AtomicUsize::new(0),
        }
    }
}

impl Respond for SingleUseVoucher {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.grants {
            ResponseTemplate::new(200).set_body_string(r#"{"redeemed":true}"#)
        } else {
            ResponseTemplate::new(409).set_body_string(r#"{"error":"already redeemed"}"#)
        }
    }
}

/// Delays the first `slow` responses by `delay`, answers the rest at once.
pub struct SlowFirst {
    slow: usize,
    delay: Duration,
    seen: AtomicUsize,
}

impl SlowFirst {
    pub fn new(slow: usize, delay: Duration) -> Self {
        Self {
            slow,
            delay,
            seen: AtomicUsize::new(0),
        }
    }
}

impl Respond for SlowFirst {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let template = ResponseTemplate::new(200).set_body_string("balance: 100");
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.slow {
            template.set_delay(self.delay)
        } else {
            template
        }
    }
}

/// Sends the request body straight back.
pub struct Echo;

impl Respond for Echo {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(request.body.clone())
    }
}

pub fn test_config(concurrency: usize) -> ScanConfig {
    let mut config = ScanConfig::new();
    config.set_concurrency(concurrency);
    config.set_timeout(Duration::from_secs(5));
    config.set_grace(Duration::from_millis(500));
    config.set_rate_limit(100);
    config
}
