//! Shared helpers for integration tests: mock site pages and pipeline setup.

#![allow(dead_code)]

pub mod socket_guard;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gallery_sync::{CollectionId, Database, Jitter, PipelineConfig, SiteConfig, Store};
use wiremock::{Request, Respond, ResponseTemplate};

/// Catalog page linking every id under `{base}/{id}`.
pub fn catalog_html(base: &str, ids: &[&str]) -> String {
    let items: String = ids
        .iter()
        .map(|id| format!(r#"<li><p class="url"><a href="{base}/{id}">{id}</a></p></li>"#))
        .collect();
    format!(r#"<html><body><div class="all"><ul class="archives">{items}</ul></div></body></html>"#)
}

/// Collection page whose first image is `first_image` and whose pager ends at `count`.
pub fn collection_html(name: &str, tags: &[&str], count: u32, first_image: &str) -> String {
    let tag_links: String = tags
        .iter()
        .map(|tag| format!(r#"<a href="/tag/{tag}/">{tag}</a>"#))
        .collect();
    format!(
        r#"<html><body>
        <h2 class="main-title">{name}</h2>
        <div class="main-tags">{tag_links}</div>
        <div class="main-image"><p><a href="/next"><img src="{first_image}" alt="{name}"></a></p></div>
        <div class="pagenavi">
            <a href="/1"><span>1</span></a>
            <a href="/2"><span>2</span></a>
            <a href="/{count}"><span>{count}</span></a>
            <a href="/2"><span>next</span></a>
        </div>
        </body></html>"#
    )
}

/// Pipeline config pointed at a mock server with every delay removed.
pub fn test_config(base_path: &Path, server_uri: &str) -> PipelineConfig {
    let mut config = PipelineConfig::with_base_path(base_path);
    config.site = SiteConfig::new(server_uri, format!("{server_uri}/all/"));
    config.page_jitter = Jitter::NONE;
    config.image_jitter = Jitter::NONE;
    config.retry_base_delay = Duration::ZERO;
    config.rate_limit_cooldown = Duration::from_millis(10);
    config.request_timeout = Duration::from_secs(5);
    config
}

/// Store over a fresh file database inside `dir`.
pub async fn file_store(dir: &Path) -> Arc<Store> {
    let db = Database::new(&dir.join("gallery.db")).await.unwrap();
    Arc::new(Store::new(db))
}

/// Parses literal ids, panicking on malformed input.
pub fn ids(raw: &[&str]) -> Vec<CollectionId> {
    raw.iter().map(|s| CollectionId::parse(s).unwrap()).collect()
}

/// `n` distinct numeric ids starting at `start`.
pub fn numeric_ids(start: u64, n: u64) -> Vec<String> {
    (start..start + n).map(|i| i.to_string()).collect()
}

/// Responds 429 for the first `limited` requests, then 200 with `body`.
pub struct RateLimitThenOk {
    pub hits: Arc<AtomicUsize>,
    pub limited: usize,
    pub body: Vec<u8>,
}

impl Respond for RateLimitThenOk {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        if n < self.limited {
            ResponseTemplate::new(429)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

/// Counts requests and always answers with `status`.
pub struct CountingResponder {
    pub hits: Arc<AtomicUsize>,
    pub status: u16,
    pub body: Vec<u8>,
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.hits.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.status).set_body_bytes(self.body.clone())
    }
}
