//! Everything that talks to the source site.
//!
//! - [`SiteClient`] - page fetch and streaming image download
//! - [`PageParser`] / [`HtmlPageParser`] - HTML to structured fields
//! - [`CatalogEnumerator`] - remote collection id listing
//! - [`RateLimiter`] - optional per-host request spacing

pub mod catalog;
pub mod client;
mod error;
pub mod parser;
pub mod rate_limiter;
mod user_agent;

pub use catalog::CatalogEnumerator;
pub use client::SiteClient;
pub use error::{FetchError, ParseError};
pub use parser::{CollectionFields, HtmlPageParser, PageParser, PageSelectors};
pub use rate_limiter::{RateLimiter, parse_retry_after};
