//! Catalog enumeration: the remote list of every collection identifier.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};
use url::Url;

use super::client::SiteClient;
use super::error::FetchError;
use super::parser::PageParser;

/// Lists collection identifiers from one or more catalog pages.
#[derive(Clone)]
pub struct CatalogEnumerator {
    client: SiteClient,
    parser: Arc<dyn PageParser>,
    catalog_urls: Vec<String>,
}

impl std::fmt::Debug for CatalogEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEnumerator")
            .field("catalog_urls", &self.catalog_urls)
            .finish_non_exhaustive()
    }
}

impl CatalogEnumerator {
    /// Enumerator over `catalog_urls`, fetched through `client` with links
    /// pulled out by `parser`.
    #[must_use]
    pub fn new(client: SiteClient, parser: Arc<dyn PageParser>, catalog_urls: Vec<String>) -> Self {
        Self {
            client,
            parser,
            catalog_urls,
        }
    }

    /// Fetches every catalog page and returns the raw identifiers found.
    ///
    /// Identifiers are the final path segment of each listing link,
    /// deduplicated, in first-seen order. They are not validated here.
    ///
    /// # Errors
    ///
    /// Returns the first [`FetchError`]; a partial catalog is never returned.
    #[instrument(skip(self), fields(pages = self.catalog_urls.len()))]
    pub async fn enumerate(&self) -> Result<Vec<String>, FetchError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for catalog_url in &self.catalog_urls {
            let html = self.client.fetch_page(catalog_url).await?;
            let hrefs = self.parser.parse_catalog(&html);
            debug!(url = %catalog_url, links = hrefs.len(), "catalog page parsed");

            for href in hrefs {
                if let Some(id) = last_path_segment(catalog_url, &href)
                    && seen.insert(id.clone())
                {
                    ids.push(id);
                }
            }
        }

        info!(ids = ids.len(), "catalog enumerated");
        Ok(ids)
    }
}

/// Final non-empty path segment of `href`, resolved against `base`.
///
/// ```
/// use gallery_sync::site::catalog::last_path_segment;
///
/// let base = "https://www.example.com/all/";
/// assert_eq!(last_path_segment(base, "/204315/").as_deref(), Some("204315"));
/// assert_eq!(last_path_segment(base, "https://www.example.com/99").as_deref(), Some("99"));
/// ```
#[must_use]
pub fn last_path_segment(base: &str, href: &str) -> Option<String> {
    let resolved = Url::parse(base)
        .and_then(|base| base.join(href))
        .or_else(|_| Url::parse(href));

    match resolved {
        Ok(url) => url
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .next_back()
            .map(ToString::to_string),
        Err(_) => href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(ToString::to_string),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::site::parser::HtmlPageParser;
    use crate::site::rate_limiter::RateLimiter;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn enumerator(catalog_urls: Vec<String>) -> CatalogEnumerator {
        let client = SiteClient::with_timeouts(
            "https://www.example.com",
            Duration::from_secs(5),
            Duration::from_secs(2),
            Arc::new(RateLimiter::disabled()),
        )
        .unwrap();
        CatalogEnumerator::new(client, Arc::new(HtmlPageParser::default()), catalog_urls)
    }

    #[test]
    fn test_last_path_segment_relative_href() {
        assert_eq!(
            last_path_segment("https://www.example.com/all/", "/1234").as_deref(),
            Some("1234")
        );
    }

    #[test]
    fn test_last_path_segment_keeps_malformed_ids() {
        assert_eq!(
            last_path_segment("https://www.example.com/all/", "/tag/abc").as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_last_path_segment_root_is_none() {
        assert!(last_path_segment("https://www.example.com/all/", "/").is_none());
    }

    #[tokio::test]
    async fn test_enumerate_dedupes_across_pages() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/all/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="all"><a href="/300">a</a><a href="/200/">b</a><a href="/300">c</a></div>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/old/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="all"><a href="/200">b</a><a href="/100">d</a></div>"#,
            ))
            .mount(&mock_server)
            .await;

        let ids = enumerator(vec![
            format!("{}/all/", mock_server.uri()),
            format!("{}/old/", mock_server.uri()),
        ])
        .enumerate()
        .await
        .unwrap();

        assert_eq!(ids, vec!["300", "200", "100"]);
    }

    #[tokio::test]
    async fn test_enumerate_non_200_is_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let result = enumerator(vec![format!("{}/all/", mock_server.uri())])
            .enumerate()
            .await;

        assert!(matches!(result, Err(FetchError::HttpStatus { status: 503, .. })));
    }
}
