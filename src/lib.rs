// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod analyzer;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod record;
pub mod report;
pub mod request;
pub mod storage;
pub mod store;

pub use analyzer::{Classification, DivergenceAnalyzer, Verdict};
pub use config::ScanConfig;
pub use dispatch::BurstDispatcher;
pub use error::{RaceError, RaceResult};
pub use orchestrator::BatchOrchestrator;
pub use policy::ComparisonPolicy;
pub use request::RequestDescriptor;
pub use store::ResponseRecordStore;
