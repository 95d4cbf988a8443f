//! Harvester Core Library
//!
//! This library provides resumable bulk acquisition of media from a
//! cursor-paginated content API: it pages through item metadata, downloads
//! each item through a bounded worker pool, identifies the real file type
//! from its bytes, files it by content rating, and records every outcome so
//! repeated runs never fetch the same item twice.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Metadata API client, item ingestion, filters and the cursor paginator
//! - [`catalog`] - Download records, generation parameters and tags
//! - [`classify`] - Content-rating normalization and category folders
//! - [`config`] - Engine configuration and the optional JSON config file
//! - [`db`] - Database connection and schema management
//! - [`download`] - Streaming media transfer, retry/backoff and rate limiting
//! - [`engine`] - Run coordination, pause/resume, shutdown and status
//! - [`ledger`] - Append-only dedup ledger
//! - [`sniff`] - Magic-byte content sniffing
//! - [`storage`] - Output layout and contained file placement

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod ledger;
pub mod sniff;
pub mod storage;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use api::{ApiClient, ClientFilter, FilterCriteria, ItemDescriptor, Page, Paginator};
pub use catalog::{Catalog, CatalogError, DownloadRecord, RecordStatus};
pub use classify::{Category, classify};
pub use config::{EngineConfig, Target};
pub use db::Database;
pub use download::{HttpClient, MediaSource, RateLimiter, RetryPolicy};
pub use engine::{Engine, EngineError, EngineStatus, Phase, RunHandle, RunSummary};
pub use ledger::Ledger;
pub use sniff::{MediaKind, sniff};
