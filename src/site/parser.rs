//! HTML extraction for catalog and collection pages.
//!
//! The pipeline only sees the [`PageParser`] trait. [`HtmlPageParser`] is the
//! CSS-selector implementation for the site's current markup; the selectors
//! are data so a markup change is a configuration change.

use scraper::{ElementRef, Html, Selector};

use super::error::ParseError;

/// Fields extracted from one collection page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFields {
    /// Heading text.
    pub name: String,
    /// Tag anchor texts, in page order.
    pub tag_names: Vec<String>,
    /// Total number of images (from the pagination bar).
    pub image_count: u32,
    /// `src` of the first image, possibly relative.
    pub first_image_url: String,
}

/// Turns page HTML into structured data.
pub trait PageParser: Send + Sync {
    /// Every collection link `href` on a catalog page, in page order.
    fn parse_catalog(&self, html: &str) -> Vec<String>;

    /// Required fields of a collection page.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when a required field is absent or malformed.
    fn parse_collection(&self, html: &str) -> Result<CollectionFields, ParseError>;
}

/// CSS selectors used by [`HtmlPageParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelectors {
    /// Collection anchors inside the catalog listing.
    pub catalog_links: String,
    /// Tag anchors on a collection page.
    pub tags: String,
    /// Pagination anchors; the second-to-last one holds the page count.
    pub pagination: String,
    /// Collection heading.
    pub title: String,
    /// First image element.
    pub first_image: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            catalog_links: "div.all a[href]".to_string(),
            tags: "div.main-tags a".to_string(),
            pagination: "div.pagenavi a".to_string(),
            title: "h2.main-title".to_string(),
            first_image: "div.main-image img[src]".to_string(),
        }
    }
}

/// Selector-driven [`PageParser`].
#[derive(Debug, Clone)]
pub struct HtmlPageParser {
    catalog_links: Selector,
    tags: Selector,
    pagination: Selector,
    title: Selector,
    first_image: Selector,
}

impl HtmlPageParser {
    /// Compiles the given selectors.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Selector`] for the first selector that fails to compile.
    pub fn new(selectors: &PageSelectors) -> Result<Self, ParseError> {
        Ok(Self {
            catalog_links: compile(&selectors.catalog_links)?,
            tags: compile(&selectors.tags)?,
            pagination: compile(&selectors.pagination)?,
            title: compile(&selectors.title)?,
            first_image: compile(&selectors.first_image)?,
        })
    }
}

impl Default for HtmlPageParser {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self::new(&PageSelectors::default()).expect("default selectors are valid") // Static selectors, safe to panic
    }
}

fn compile(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Whitespace-normalised text content of an element.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

impl PageParser for HtmlPageParser {
    fn parse_catalog(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.catalog_links)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    fn parse_collection(&self, html: &str) -> Result<CollectionFields, ParseError> {
        let document = Html::parse_document(html);

        let name = document
            .select(&self.title)
            .next()
            .map(element_text)
            .filter(|text| !text.is_empty())
            .ok_or(ParseError::MissingField("title"))?;

        let tag_names = document
            .select(&self.tags)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect();

        let pages: Vec<ElementRef<'_>> = document.select(&self.pagination).collect();
        let count_text = pages
            .len()
            .checked_sub(2)
            .and_then(|index| pages.get(index))
            .map(|anchor| element_text(*anchor))
            .ok_or(ParseError::MissingField("image count"))?;
        let image_count = count_text
            .parse::<u32>()
            .map_err(|_| ParseError::MalformedCount(count_text.clone()))?;

        let first_image_url = document
            .select(&self.first_image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::trim)
            .filter(|src| !src.is_empty())
            .map(ToString::to_string)
            .ok_or(ParseError::MissingField("first image"))?;

        Ok(CollectionFields {
            name,
            tag_names,
            image_count,
            first_image_url,
        })
    }
}
