// File: dispatch.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::ScanConfig;
use crate::error::{RaceError, RaceResult};
use crate::record::{ErrorKind, ResponseRecord};
use crate::request::RequestDescriptor;
use crate::store::{ResponseRecordStore, SlotHandle};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Launches bursts of identical requests with their send times pinned to a
/// shared start barrier.
#[derive(Debug, Clone)]
pub struct BurstDispatcher {
    client: reqwest::Client,
    grace: Duration,
    max_body_bytes: usize,
    prewarm: bool,
}

/// What a unit brings back from the wire.
struct Captured {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    truncated: bool,
    final_url: String,
}

struct BurstUnit {
    client: reqwest::Client,
    descriptor: Arc<RequestDescriptor>,
    slot: SlotHandle,
    max_body_bytes: usize,
    prewarm: Option<Duration>,
    ready: Arc<AtomicUsize>,
    ready_notify: Arc<Notify>,
    release: watch::Receiver<Option<Instant>>,
}

impl BurstDispatcher {
    pub fn new(config: &ScanConfig) -> RaceResult<Self> {
        let redirect = if config.follow_redirects() {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        // One connection per unit: the idle pool must never force units to
        // queue behind each other.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .danger_accept_invalid_certs(config.insecure())
            .redirect(redirect)
            .pool_max_idle_per_host(usize::MAX)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            grace: config.grace(),
            max_body_bytes: config.max_body_bytes(),
            prewarm: config.prewarm(),
        })
    }

    /// Fires `concurrency` copies of `descriptor` and returns the frozen
    /// store. Each request is bounded by the descriptor's timeout; the whole
    /// batch by `deadline`, after which outstanding units are aborted and
    /// their slots read as `Timeout`.
    ///
    /// Fails only when no unit could attempt the request at all.
    pub async fn dispatch(
        &self,
        descriptor: Arc<RequestDescriptor>,
        concurrency: usize,
        deadline: Duration,
    ) -> RaceResult<Arc<ResponseRecordStore>> {
        let target = descriptor.url().to_string();
        if concurrency == 0 {
            return Err(RaceError::Config("burst size must be at least 1".into()));
        }

        Self::resolve(&descriptor).await?;

        info!("Dispatching burst of {} {} requests to {}", concurrency, descriptor.method(), target);

        let batch_start = Instant::now();
        let store = ResponseRecordStore::new(concurrency);
        let (release_tx, release_rx) = watch::channel::<Option<Instant>>(None);
        let ready = Arc::new(AtomicUsize::new(0));
        let ready_notify = Arc::new(Notify::new());
        // Connection setup is bounded by the request timeout, not the grace
        // window: a unit still connecting when the barrier drops is late.
        let prewarm = self.prewarm.then(|| descriptor.timeout());

        let mut units = JoinSet::new();
        for index in 0..concurrency {
            let unit = BurstUnit {
                client: self.client.clone(),
                descriptor: Arc::clone(&descriptor),
                slot: store.reserve_slot(index)?,
                max_body_bytes: self.max_body_bytes,
                prewarm,
                ready: Arc::clone(&ready),
                ready_notify: Arc::clone(&ready_notify),
                release: release_rx.clone(),
            };
            units.spawn(unit.run());
        }

        let all_ready = async {
            loop {
                let notified = ready_notify.notified();
                if ready.load(Ordering::Acquire) >= concurrency {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(self.grace, all_ready).await.is_err() {
            warn!(
                "{} of {} units ready after {:?}, releasing barrier anyway",
                ready.load(Ordering::Acquire),
                concurrency,
                self.grace
            );
        }
        let released_at = Instant::now();
        let _ = release_tx.send(Some(released_at));
        debug!(
            "Barrier released for {} after {:?}",
            target,
            released_at - batch_start
        );

        match tokio::time::timeout_at(batch_start + deadline, store.wait_complete()).await {
            Ok(()) => debug!("All {} slots filled for {}", concurrency, target),
            Err(_) => warn!(
                "Deadline of {:?} hit for {} with {}/{} slots filled",
                deadline,
                target,
                store.completed(),
                concurrency
            ),
        }

        // Freeze before aborting so nothing that lands during shutdown counts.
        let records = store.snapshot();
        units.shutdown().await;

        if records
            .iter()
            .all(|r| r.error().is_some_and(|kind| kind.never_attempted()))
        {
            return Err(RaceError::dispatch(
                target,
                "no request in the burst could be attempted",
            ));
        }

        Ok(store)
    }

    async fn resolve(descriptor: &RequestDescriptor) -> RaceResult<()> {
        let target = descriptor.url().as_str();
        let domain = match descriptor.url().host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            Some(_) => return Ok(()),
            None => return Err(RaceError::dispatch(target, "URL has no host")),
        };

        let lookup = tokio::time::timeout(
            descriptor.timeout(),
            tokio::net::lookup_host((domain.as_str(), descriptor.port())),
        )
        .await;

        match lookup {
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    Ok(())
                } else {
                    Err(RaceError::dispatch(target, format!("{} resolved to no addresses", domain)))
                }
            }
            Ok(Err(e)) => Err(RaceError::dispatch(
                target,
                format!("cannot resolve host {}: {}", domain, e),
            )),
            Err(_) => Err(RaceError::dispatch(
                target,
                format!("resolving {} timed out", domain),
            )),
        }
    }
}

impl BurstUnit {
    async fn run(self) {
        let BurstUnit {
            client,
            descriptor,
            slot,
            max_body_bytes,
            prewarm,
            ready,
            ready_notify,
            mut release,
        } = self;
        let index = slot.index();

        if let Some(budget) = prewarm {
            Self::prewarm(&client, &descriptor, budget).await;
        }
        let prepared = Self::build_request(&client, &descriptor, index);

        if release.borrow().is_some() {
            debug!("Unit {} missed the barrier", index);
            slot.write(ResponseRecord::failed(
                index,
                ErrorKind::NotReady,
                Duration::ZERO,
                Duration::ZERO,
            ));
            return;
        }

        ready.fetch_add(1, Ordering::AcqRel);
        ready_notify.notify_one();

        let released_at = {
            match release.wait_for(|at| at.is_some()).await {
                Ok(at) => (*at).unwrap_or_else(Instant::now),
                Err(_) => Instant::now(),
            }
        };

        let request = match prepared {
            Ok(request) => request,
            Err(kind) => {
                slot.write(ResponseRecord::failed(index, kind, Duration::ZERO, Duration::ZERO));
                return;
            }
        };

        let sent_at = Instant::now();
        let start_offset = sent_at.saturating_duration_since(released_at);
        let outcome = tokio::time::timeout(
            descriptor.timeout(),
            Self::execute(&client, request, max_body_bytes),
        )
        .await;
        let elapsed = sent_at.elapsed();

        let record = match outcome {
            Ok(Ok(captured)) => ResponseRecord::new_with_all(
                index,
                captured.status,
                captured.headers,
                captured.body,
                captured.truncated,
                elapsed,
                start_offset,
                Some(captured.final_url),
            ),
            Ok(Err(kind)) => ResponseRecord::failed(index, kind, elapsed, start_offset),
            Err(_) => ResponseRecord::failed(index, ErrorKind::Timeout, elapsed, start_offset),
        };

        debug!(
            "Unit {} done: status={:?} error={:?} offset={:?} elapsed={:?}",
            index,
            record.status_code(),
            record.error(),
            start_offset,
            elapsed
        );

        if !slot.write(record) {
            debug!("Unit {} finished after the batch was frozen", index);
        }
    }

    /// Opens a pooled connection to the origin so the real send skips
    /// connection setup. Failures only mean the unit goes in cold.
    async fn prewarm(client: &reqwest::Client, descriptor: &RequestDescriptor, budget: Duration) {
        let origin = match descriptor.url().join("/") {
            Ok(origin) => origin,
            Err(_) => return,
        };
        match tokio::time::timeout(budget, client.head(origin).send()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Pre-warm failed for {}: {}", descriptor.url(), e),
            Err(_) => debug!("Pre-warm timed out for {}", descriptor.url()),
        }
    }

    fn build_request(
        client: &reqwest::Client,
        descriptor: &RequestDescriptor,
        index: usize,
    ) -> Result<reqwest::Request, ErrorKind> {
        let mut builder = client
            .request(descriptor.method().clone(), descriptor.url().clone())
            .headers(descriptor.header_map())
            .timeout(descriptor.timeout());
        if let Some(body) = descriptor.render_body(index) {
            builder = builder.body(body);
        }
        builder.build().map_err(|e| {
            warn!("Unit {} could not build its request: {}", index, e);
            ErrorKind::Transport
        })
    }

    async fn execute(
        client: &reqwest::Client,
        request: reqwest::Request,
        max_body_bytes: usize,
    ) -> Result<Captured, ErrorKind> {
        let mut response = client
            .execute(request)
            .await
            .map_err(|e| ErrorKind::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ErrorKind::from_reqwest(&e))?
        {
            let room = max_body_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Captured {
            status,
            headers,
            body,
            truncated,
            final_url,
        })
    }
}
