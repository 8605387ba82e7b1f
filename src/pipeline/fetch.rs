//! Collection fetch worker pool: page → parsed metadata → store.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use super::error::CollectionError;
use super::retry::{RetryPolicy, request_with_retry, store_write_with_retry};
use super::stats::PipelineStats;
use super::work_queue::run_pool;
use crate::collection::{CollectionId, ImageDate, UrlTemplate};
use crate::config::{Jitter, SiteConfig};
use crate::site::{ParseError, PageParser, SiteClient};
use crate::store::{CollectionMetadata, CrawlRepository, SaveOutcome};

/// Everything a fetch worker needs; shared by all workers of a pass.
pub(crate) struct FetchContext {
    pub repo: Arc<dyn CrawlRepository>,
    pub client: SiteClient,
    pub parser: Arc<dyn PageParser>,
    pub site: SiteConfig,
    pub policy: RetryPolicy,
    pub page_jitter: Jitter,
    pub stats: Arc<PipelineStats>,
}

/// Drains `ids` through `workers` concurrent fetch workers.
///
/// Failures leave the id's flag unset; nothing propagates out of a worker.
pub(crate) async fn run_fetch_pass(ctx: Arc<FetchContext>, ids: Vec<CollectionId>, workers: usize) {
    info!(queued = ids.len(), workers, "metadata fetch pass starting");

    run_pool("fetch", ids, workers, move |id: CollectionId| {
        let ctx = Arc::clone(&ctx);
        async move {
            match fetch_collection(&ctx, &id).await {
                Ok(SaveOutcome::Inserted) => {
                    ctx.stats.increment_collections_fetched();
                    info!(collection_id = %id, "metadata stored");
                }
                Ok(SaveOutcome::AlreadyStored) => {
                    ctx.stats.increment_collections_fetched();
                    info!(collection_id = %id, "metadata already stored, flag set");
                }
                Err(error) => {
                    ctx.stats.increment_collections_failed();
                    warn!(collection_id = %id, error = %error, "metadata fetch failed");
                }
            }
        }
    })
    .await;
}

/// Fetches, parses and stores one collection.
#[instrument(skip(ctx, id), fields(collection_id = %id))]
pub(crate) async fn fetch_collection(
    ctx: &FetchContext,
    id: &CollectionId,
) -> Result<SaveOutcome, CollectionError> {
    let delay = ctx.page_jitter.sample();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let url = ctx.site.collection_url(id.as_str());
    let html = request_with_retry(
        &ctx.policy,
        ctx.client.rate_limiter(),
        &ctx.stats,
        &url,
        || ctx.client.fetch_page(&url),
    )
    .await?;

    let metadata = build_metadata(ctx.parser.as_ref(), id, &url, &html)?;
    Ok(store_write_with_retry(|| ctx.repo.save_collection(&metadata)).await?)
}

/// Parses a collection page into storable metadata.
///
/// The first image `src` is resolved against the page URL before the
/// template is derived from it.
pub(crate) fn build_metadata(
    parser: &dyn PageParser,
    id: &CollectionId,
    page_url: &str,
    html: &str,
) -> Result<CollectionMetadata, ParseError> {
    let fields = parser.parse_collection(html)?;

    let sample = Url::parse(page_url)
        .and_then(|base| base.join(&fields.first_image_url))
        .map_err(|e| ParseError::UrlTemplate(format!("{}: {e}", fields.first_image_url)))?
        .to_string();
    let template =
        UrlTemplate::from_sample(&sample).map_err(|e| ParseError::UrlTemplate(e.to_string()))?;

    Ok(CollectionMetadata {
        id: id.clone(),
        name: fields.name,
        image_count: fields.image_count,
        date: ImageDate::from_sample(&sample),
        template,
        tags: fields.tag_names,
    })
}
