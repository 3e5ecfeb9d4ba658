// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use thiserror::Error;

/// Batch-level and construction-level failures.
///
/// Per-slot network failures are not represented here: they are recorded as
/// [`crate::record::ErrorKind`] inside the slot's record and never escalate.
#[derive(Debug, Error)]
pub enum RaceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dispatch failed for {target}: {reason}")]
    Dispatch { target: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Slot error: {0}")]
    Slot(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RaceError {
    pub fn dispatch(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

pub type RaceResult<T> = Result<T, RaceError>;
