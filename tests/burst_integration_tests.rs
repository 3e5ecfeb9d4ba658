// File: burst_integration_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use common::{test_config, Echo, SingleUseVoucher, SlowFirst};
use futures::StreamExt;
use raceprobe::analyzer::{Classification, DivergenceAnalyzer, Verdict};
use raceprobe::catalog::{ListCatalog, UrlCatalog};
use raceprobe::dispatch::BurstDispatcher;
use raceprobe::error::RaceError;
use raceprobe::orchestrator::BatchOrchestrator;
use raceprobe::policy::ComparisonPolicy;
use raceprobe::record::ErrorKind;
use raceprobe::request::RequestDescriptor;
use serial_test::serial;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_static_endpoint_is_consistent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_string("balance: 100"))
        .expect(4)
        .mount(&mock_server)
        .await;

    let orchestrator =
        BatchOrchestrator::new(test_config(4), ComparisonPolicy::consistency()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/balance", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::Consistent);
    assert_eq!(verdict.total_requests, 4);
    assert_eq!(verdict.succeeded, 4);
    assert_eq!(verdict.failed, 0);
    assert_eq!(verdict.distinct_status_codes.len(), 1);
    assert_eq!(verdict.distinct_body_hashes.len(), 1);
    assert!(verdict.redirected_to.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_single_use_voucher_redeemed_twice_is_flagged() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/redeem"))
        .respond_with(SingleUseVoucher::new(3))
        .mount(&mock_server)
        .await;

    let mut config = test_config(5);
    config.set_method("POST".to_string());
    config.set_header("Content-Type".to_string(), "application/json".to_string());
    config.set_body(Some(br#"{"code":"SAVE10"}"#.to_vec()));

    let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::single_success()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/redeem", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::LikelyVulnerable);
    assert_eq!(verdict.accepted, 3);
    assert_eq!(verdict.succeeded, 5);
    assert_eq!(
        verdict.distinct_status_codes.iter().copied().collect::<Vec<_>>(),
        vec![200, 409]
    );
    assert!(verdict.evidence[0].starts_with("3 of 5 requests returned success status"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_mixed_statuses_are_inconsistent_under_consistency_policy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/redeem"))
        .respond_with(SingleUseVoucher::new(1))
        .mount(&mock_server)
        .await;

    let mut config = test_config(4);
    config.set_method("POST".to_string());

    let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::consistency()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/redeem", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::Inconsistent);
    assert_eq!(verdict.accepted, 1);
    assert!(verdict
        .evidence
        .iter()
        .any(|line| line.starts_with("status 409 from slots")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_every_slot_carries_its_own_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(Echo)
        .expect(6)
        .mount(&mock_server)
        .await;

    let descriptor = RequestDescriptor::new(
        "POST",
        &format!("{}/echo", mock_server.uri()),
        BTreeMap::new(),
        Some(b"slot={{slot}}".to_vec()),
        Duration::from_secs(5),
    )
    .unwrap();
    let dispatcher = BurstDispatcher::new(&test_config(6)).unwrap();
    let store = dispatcher
        .dispatch(Arc::new(descriptor), 6, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(store.is_frozen());
    let records = store.snapshot();
    assert_eq!(records.len(), 6);
    for (position, record) in records.iter().enumerate() {
        assert_eq!(record.index(), position);
        assert_eq!(record.status_code(), Some(200));
        assert_eq!(record.body(), format!("slot={}", position).as_bytes());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_deadline_fills_every_slot() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let descriptor =
        RequestDescriptor::get(&format!("{}/slow", mock_server.uri()), Duration::from_secs(5))
            .unwrap();
    let dispatcher = BurstDispatcher::new(&test_config(3)).unwrap();
    let started = std::time::Instant::now();
    let store = dispatcher
        .dispatch(Arc::new(descriptor), 3, Duration::from_millis(800))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    let records = store.snapshot();
    assert_eq!(records.len(), 3);
    assert!(records
        .iter()
        .all(|r| r.error() == Some(ErrorKind::Timeout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_one_timed_out_slot_does_not_break_consistency() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/balance"))
        .respond_with(SlowFirst::new(1, Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let mut config = test_config(3);
    config.set_timeout(Duration::from_secs(1));
    config.set_deadline(Some(Duration::from_secs(4)));

    let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::consistency()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/balance", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::Consistent);
    assert_eq!(verdict.succeeded, 2);
    assert_eq!(verdict.failed, 1);
    assert!(verdict.evidence.iter().any(|line| line.ends_with(": timeout")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_large_bodies_are_truncated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
        .mount(&mock_server)
        .await;

    let mut config = test_config(2);
    config.set_max_body_bytes(128);
    let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::consistency()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/export", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::Consistent);
    assert!(verdict
        .evidence
        .iter()
        .any(|line| line.ends_with("body truncated at capture limit")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_verdicts_keep_input_order_with_parallel_workers() {
    let mock_server = MockServer::start().await;
    let delays = [("/a", 600), ("/b", 0), ("/c", 300), ("/d", 0)];
    for (route, delay) in delays {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(route)
                    .set_delay(Duration::from_millis(delay)),
            )
            .mount(&mock_server)
            .await;
    }

    let mut config = test_config(2);
    config.set_workers(4);
    let orchestrator = BatchOrchestrator::new(config, ComparisonPolicy::consistency()).unwrap();
    let targets: Vec<String> = delays
        .iter()
        .map(|(route, _)| format!("{}{}", mock_server.uri(), route))
        .collect();

    let verdicts: Vec<Verdict> = orchestrator.run(targets.clone()).collect().await;

    let order: Vec<String> = verdicts.iter().map(|v| v.target_url.clone()).collect();
    assert_eq!(order, targets);
    assert!(verdicts
        .iter()
        .all(|v| v.classification == Classification::Consistent));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_catalog_run_mixes_reachable_and_unresolvable_targets() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let mut catalog = ListCatalog::from_urls([
        "http://nothing-here.invalid/claim".to_string(),
        format!("{}/ok", mock_server.uri()),
    ]);
    let orchestrator =
        BatchOrchestrator::new(test_config(2), ComparisonPolicy::consistency()).unwrap();

    let verdicts: Vec<Verdict> = orchestrator.run_catalog(&mut catalog).collect().await;

    assert_eq!(verdicts.len(), 2);
    assert_eq!(verdicts[0].classification, Classification::Inconclusive);
    assert_eq!(verdicts[0].succeeded, 0);
    assert_eq!(verdicts[1].classification, Classification::Consistent);
    assert!(catalog.next().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_redirect_destination_is_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "/new"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&mock_server)
        .await;

    let orchestrator =
        BatchOrchestrator::new(test_config(2), ComparisonPolicy::consistency()).unwrap();
    let verdict = orchestrator
        .scan_target(format!("{}/old", mock_server.uri()))
        .await;

    assert_eq!(verdict.classification, Classification::Consistent);
    assert!(verdict
        .redirected_to
        .contains(&format!("{}/new", mock_server.uri())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_unit_late_to_barrier_is_not_ready_and_batch_completes() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(SlowFirst::new(1, Duration::from_secs(2)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_string("claimed"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = test_config(3);
    config.set_grace(Duration::from_millis(300));
    let dispatcher = BurstDispatcher::new(&config).unwrap();
    let target = format!("{}/claim", mock_server.uri());
    let descriptor = RequestDescriptor::get(&target, Duration::from_secs(5)).unwrap();

    let store = dispatcher
        .dispatch(Arc::new(descriptor), 3, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(store.is_complete());
    let records = store.snapshot();
    let late: Vec<_> = records
        .iter()
        .filter(|r| r.error() == Some(ErrorKind::NotReady))
        .collect();
    assert_eq!(late.len(), 1);
    assert_eq!(
        records.iter().filter(|r| r.status_code() == Some(200)).count(),
        2
    );

    let verdict = DivergenceAnalyzer::analyze(&target, &records, &ComparisonPolicy::consistency());
    assert_eq!(verdict.classification, Classification::Consistent);
    assert!(verdict
        .evidence
        .contains(&format!("slot {}: not ready at barrier release", late[0].index())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_burst_with_every_unit_late_is_dispatch_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config(3);
    config.set_grace(Duration::from_millis(300));
    let dispatcher = BurstDispatcher::new(&config).unwrap();
    let descriptor =
        RequestDescriptor::get(&format!("{}/claim", mock_server.uri()), Duration::from_secs(5))
            .unwrap();

    let err = dispatcher
        .dispatch(Arc::new(descriptor), 3, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, RaceError::Dispatch { .. }));
}
