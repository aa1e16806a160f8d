//! HTML metadata extraction for file-host pages

use scraper::{ElementRef, Html};

use super::selectors::{
    DETAILS_INDEX, DETAILS_ITEM, DETAILS_LIST, DOWNLOAD_ATTR, DOWNLOAD_BUTTON, FILENAME,
    LISTING_LINK, LISTING_TABLE,
};
use super::MetadataExtractor;
use crate::models::PageMetadata;
use crate::utils::error::ExtractError;
use crate::utils::resolve_url;

/// Placeholder shown when a page has no details list
pub const NO_DETAILS: &str = "No details available";

/// scraper-based [`MetadataExtractor`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlMetadataExtractor;

impl HtmlMetadataExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

impl MetadataExtractor for HtmlMetadataExtractor {
    fn extract(&self, body: &str) -> Result<PageMetadata, ExtractError> {
        let document = Html::parse_document(body);

        let heading = document
            .select(&FILENAME)
            .next()
            .ok_or(ExtractError::FilenameNotFound)?;
        let filename = element_text(heading);

        let details = heading
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| parent.select(&DETAILS_LIST).next())
            .and_then(|list| list.select(&DETAILS_ITEM).nth(DETAILS_INDEX))
            .map(element_text)
            .unwrap_or_else(|| NO_DETAILS.to_string());

        Ok(PageMetadata { filename, details })
    }

    fn download_target(&self, body: &str, page_url: &str) -> Result<String, ExtractError> {
        let document = Html::parse_document(body);

        let button = document
            .select(&DOWNLOAD_BUTTON)
            .next()
            .ok_or(ExtractError::DownloadButtonNotFound)?;

        let href = button
            .value()
            .attr(DOWNLOAD_ATTR)
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .ok_or(ExtractError::DownloadTargetMissing)?;

        resolve_url(page_url, href).map_err(|_| ExtractError::Unresolvable {
            base: page_url.to_string(),
            href: href.to_string(),
        })
    }

    fn listing_links(&self, body: &str, base_url: &str) -> Vec<String> {
        extract_listing_links(body, base_url)
    }
}

/// File links of a folder page, resolved against `base_url`
///
/// Returns an empty list when the page is not a folder listing. Anchors and
/// links back to the site root are skipped, as are duplicates.
pub fn extract_listing_links(body: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let Some(table) = document.select(&LISTING_TABLE).next() else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for anchor in table.select(&LISTING_LINK) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href == "/" {
            continue;
        }
        match resolve_url(base_url, href) {
            Ok(url) if !links.contains(&url) => links.push(url),
            Ok(_) => {}
            Err(e) => tracing::debug!(href = href, error = %e, "Skipping unresolvable listing link"),
        }
    }
    links
}
