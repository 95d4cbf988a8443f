//! Remote metadata API.
//!
//! - [`ApiClient`] / [`PageSource`] - one page request against the images endpoint
//! - [`Paginator`] - cursor walk with rate limiting and retry
//! - [`ItemDescriptor`] / [`Page`] - normalized response shapes
//! - [`FilterCriteria`] / [`ClientFilter`] - server- and client-side filtering
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use harvester_core::api::{ApiClient, DEFAULT_API_BASE, FilterCriteria, Paginator};
//! use harvester_core::download::{HttpSettings, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(DEFAULT_API_BASE, None, &HttpSettings::default())?;
//! let mut pages = Paginator::new(
//!     Arc::new(client),
//!     FilterCriteria::default(),
//!     100,
//!     Duration::from_millis(500),
//!     RetryPolicy::default(),
//! );
//! while let Some(page) = pages.next_page(None).await? {
//!     println!("{} items", page.items.len());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod filter;
mod item;
mod paginator;

pub use client::{ApiClient, DEFAULT_API_BASE, PageRequest, PageSource};
pub use error::ApiError;
pub use filter::{
    ADULT_LEVEL, ClientFilter, FilterCriteria, MAX_PAGE_SIZE, Period, RatingFilter, SortOrder,
};
pub use item::{GenerationMeta, IngestError, ItemDescriptor, Page, Stats};
pub use paginator::Paginator;
