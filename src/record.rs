// File: record.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as _;
use std::fmt;
use std::time::Duration;

/// Why a slot holds no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    NotReady,
    Timeout,
    Connect,
    Dns,
    Tls,
    Transport,
    Body,
}

impl ErrorKind {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return ErrorKind::Timeout;
        }
        if err.is_body() || err.is_decode() {
            return ErrorKind::Body;
        }

        // Only the source chain: the top-level message embeds the request URL.
        let mut chain = String::new();
        let mut refused = false;
        let mut source = err.source();
        while let Some(inner) = source {
            if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                refused |= matches!(
                    io.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                );
            }
            chain.push(' ');
            chain.push_str(&inner.to_string().to_lowercase());
            source = inner.source();
        }

        if refused {
            ErrorKind::Connect
        } else if chain.contains("dns error") || chain.contains("failed to lookup address") {
            ErrorKind::Dns
        } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl")
        {
            ErrorKind::Tls
        } else if err.is_connect() {
            ErrorKind::Connect
        } else {
            ErrorKind::Transport
        }
    }

    /// The unit never got a request onto the wire.
    pub fn never_attempted(&self) -> bool {
        matches!(self, ErrorKind::NotReady | ErrorKind::Dns)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotReady => write!(f, "not ready at barrier release"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Connect => write!(f, "connection failed"),
            ErrorKind::Dns => write!(f, "dns resolution failed"),
            ErrorKind::Tls => write!(f, "tls failure"),
            ErrorKind::Transport => write!(f, "transport error"),
            ErrorKind::Body => write!(f, "failed to read body"),
        }
    }
}

/// Outcome of one slot in a burst. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    index: usize,
    status_code: Option<u16>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    truncated: bool,
    elapsed: Duration,
    start_offset: Duration,
    final_url: Option<String>,
    error: Option<ErrorKind>,
}

impl ResponseRecord {
    pub fn new_with_all(
        index: usize,
        status_code: u16,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
        truncated: bool,
        elapsed: Duration,
        start_offset: Duration,
        final_url: Option<String>,
    ) -> Self {
        ResponseRecord {
            index,
            status_code: Some(status_code),
            headers,
            body,
            truncated,
            elapsed,
            start_offset,
            final_url,
            error: None,
        }
    }

    pub fn failed(index: usize, kind: ErrorKind, elapsed: Duration, start_offset: Duration) -> Self {
        ResponseRecord {
            index,
            status_code: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            truncated: false,
            elapsed,
            start_offset,
            final_url: None,
            error: Some(kind),
        }
    }

    pub fn timed_out(index: usize) -> Self {
        Self::failed(index, ErrorKind::Timeout, Duration::ZERO, Duration::ZERO)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn start_offset(&self) -> Duration {
        self.start_offset
    }

    pub fn final_url(&self) -> Option<&str> {
        self.final_url.as_deref()
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn succeeded(&self) -> bool {
        self.status_code.is_some()
    }
}
