// File: orchestrator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::analyzer::{DivergenceAnalyzer, Verdict};
use crate::catalog::UrlCatalog;
use crate::config::ScanConfig;
use crate::dispatch::BurstDispatcher;
use crate::error::{RaceError, RaceResult};
use crate::policy::ComparisonPolicy;
use crate::request::RequestDescriptor;
use futures::stream::{self, Stream, StreamExt};
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::{info, warn};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Drives targets through dispatch and analysis, one verdict per target.
pub struct BatchOrchestrator {
    config: ScanConfig,
    policy: ComparisonPolicy,
    dispatcher: BurstDispatcher,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl BatchOrchestrator {
    pub fn new(config: ScanConfig, policy: ComparisonPolicy) -> RaceResult<Self> {
        config.validate()?;
        let rate = NonZeroU32::new(config.rate_limit())
            .ok_or_else(|| RaceError::Config("rate limit must be at least 1".into()))?;
        let dispatcher = BurstDispatcher::new(&config)?;

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            config,
            policy,
            dispatcher,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Lazily scans `targets` in input order, with at most `workers` bursts
    /// in flight. Each call starts a fresh run.
    pub fn run<'a, I>(&'a self, targets: I) -> impl Stream<Item = Verdict> + 'a
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        stream::iter(capped(targets.into_iter(), self.config.max_targets()))
            .map(move |target| self.scan_target(target))
            .buffered(self.config.workers())
    }

    pub fn run_catalog<'a>(
        &'a self,
        catalog: &'a mut dyn UrlCatalog,
    ) -> impl Stream<Item = Verdict> + 'a {
        self.run(std::iter::from_fn(move || catalog.next()))
    }

    pub async fn scan_target(&self, target: String) -> Verdict {
        self.rate_limiter.until_ready().await;
        let burst = self.config.concurrency();

        let descriptor = match RequestDescriptor::new(
            self.config.method(),
            &target,
            self.config.headers().clone(),
            self.config.body().map(<[u8]>::to_vec),
            self.config.timeout(),
        ) {
            Ok(descriptor) => Arc::new(descriptor),
            Err(e) => {
                warn!("Skipping {}: {}", target, e);
                return Verdict::inconclusive(&target, burst, e.to_string());
            }
        };

        match self
            .dispatcher
            .dispatch(descriptor, burst, self.config.deadline())
            .await
        {
            Ok(store) => {
                let verdict = DivergenceAnalyzer::analyze(&target, &store.snapshot(), &self.policy);
                info!("{} -> {}", target, verdict.classification);
                verdict
            }
            Err(e) => {
                warn!("Burst against {} could not run: {}", target, e);
                Verdict::inconclusive(&target, burst, e.to_string())
            }
        }
    }
}

/// Yields at most `cap` targets. Hitting the cap drains the rest of the
/// input so the warning can say how many were left out.
fn capped<I>(mut targets: I, cap: Option<usize>) -> impl Iterator<Item = String>
where
    I: Iterator<Item = String>,
{
    let mut taken = 0usize;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        if cap.is_some_and(|cap| taken >= cap) {
            done = true;
            let skipped = targets.by_ref().count();
            if skipped > 0 {
                warn!(
                    "Target cap of {} reached, {} target(s) not scanned",
                    taken, skipped
                );
            }
            return None;
        }
        let next = targets.next();
        if next.is_some() {
            taken += 1;
        } else {
            done = true;
        }
        next
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Classification;
    use serial_test::serial;
    use std::sync::Mutex;
    use std::time::Duration;

    fn quick_config() -> ScanConfig {
        let mut config = ScanConfig::new();
        config.set_concurrency(2);
        config.set_timeout(Duration::from_secs(2));
        config.set_rate_limit(100);
        config
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = quick_config();
        config.set_workers(0);
        assert!(BatchOrchestrator::new(config, ComparisonPolicy::default()).is_err());
    }

    #[tokio::test]
    async fn test_bad_target_yields_inconclusive() {
        let orchestrator = BatchOrchestrator::new(quick_config(), ComparisonPolicy::default()).unwrap();
        let verdicts: Vec<Verdict> = orchestrator
            .run(vec!["not a url".to_string(), "http://nothing-here.invalid/".to_string()])
            .collect()
            .await;

        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].target_url, "not a url");
        assert!(verdicts
            .iter()
            .all(|v| v.classification == Classification::Inconclusive));
        assert!(verdicts[0].evidence[0].starts_with("Invalid request"));
        assert!(verdicts[1].evidence[0].starts_with("Dispatch failed"));
    }

    struct CapturingLogger;

    static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static LOGGER: CapturingLogger = CapturingLogger;

    impl log::Log for CapturingLogger {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                CAPTURED.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    fn captured_warnings() -> Vec<String> {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Warn);
        CAPTURED.lock().unwrap().clone()
    }

    #[test]
    fn test_capped_without_limit_yields_everything() {
        let targets: Vec<String> = (0..600).map(|i| format!("t{}", i)).collect();
        assert_eq!(capped(targets.into_iter(), None).count(), 600);
    }

    #[tokio::test]
    #[serial]
    async fn test_default_config_scans_every_target() {
        let mut config = quick_config();
        config.set_rate_limit(100_000);
        let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::default()).unwrap();
        let verdicts: Vec<Verdict> = orchestrator
            .run((0..600).map(|i| format!("not a url {}", i)))
            .collect()
            .await;
        assert_eq!(verdicts.len(), 600);
        assert_eq!(verdicts[599].target_url, "not a url 599");
    }

    #[tokio::test]
    #[serial]
    async fn test_max_targets_caps_run_and_warns() {
        captured_warnings();
        let mut config = quick_config();
        config.set_max_targets(Some(2));
        let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::default()).unwrap();
        let verdicts: Vec<Verdict> = orchestrator
            .run(vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string(), "e".to_string()])
            .collect()
            .await;

        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[1].target_url, "b");
        assert!(captured_warnings()
            .iter()
            .any(|line| line == "Target cap of 2 reached, 3 target(s) not scanned"));
    }

    #[tokio::test]
    #[serial]
    async fn test_cap_equal_to_input_does_not_warn() {
        captured_warnings();
        let mut config = quick_config();
        config.set_max_targets(Some(3));
        let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::default()).unwrap();
        let verdicts: Vec<Verdict> = orchestrator
            .run(vec!["x1".to_string(), "x2".to_string(), "x3".to_string()])
            .collect()
            .await;

        assert_eq!(verdicts.len(), 3);
        assert!(!captured_warnings()
            .iter()
            .any(|line| line.starts_with("Target cap of 3 reached")));
    }
}
