// File: request.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{RaceError, RaceResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const SLOT_TOKEN: &str = "{{slot}}";

const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

/// One HTTP call, shared read-only by every unit of a burst.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
    timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> RaceResult<Self> {
        let upper = method.trim().to_ascii_uppercase();
        if !KNOWN_METHODS.contains(&upper.as_str()) {
            return Err(RaceError::InvalidRequest(format!(
                "unrecognized HTTP method '{}'",
                method
            )));
        }
        let method = Method::from_bytes(upper.as_bytes())
            .map_err(|e| RaceError::InvalidRequest(format!("bad method: {}", e)))?;

        let url = Url::parse(url.trim())
            .map_err(|e| RaceError::InvalidRequest(format!("'{}' is not a URL: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(RaceError::InvalidRequest(format!(
                "'{}' is not an absolute http(s) URL",
                url
            )));
        }

        for (name, value) in &headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                RaceError::InvalidRequest(format!("invalid header name '{}'", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                RaceError::InvalidRequest(format!("invalid value for header '{}'", name))
            })?;
        }

        if timeout.is_zero() {
            return Err(RaceError::InvalidRequest(
                "request timeout must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout,
        })
    }

    pub fn get(url: &str, timeout: Duration) -> RaceResult<Self> {
        Self::new("GET", url, BTreeMap::new(), None, timeout)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Header map for the wire. Names and values were checked in `new`.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Body for the unit in `slot`, with every `{{slot}}` token substituted.
    pub fn render_body(&self, slot: usize) -> Option<Vec<u8>> {
        let body = self.body.as_ref()?;
        match std::str::from_utf8(body) {
            Ok(text) if text.contains(SLOT_TOKEN) => {
                Some(text.replace(SLOT_TOKEN, &slot.to_string()).into_bytes())
            }
            _ => Some(body.clone()),
        }
    }
}
