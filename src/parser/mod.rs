//! HTML parsing and metadata extraction
//!
//! Pulls the file name, the file details and the download target out of a
//! link page, and the file links out of a folder page.

pub mod html;
pub mod selectors;

pub use html::{extract_listing_links, HtmlMetadataExtractor, NO_DETAILS};

use crate::models::PageMetadata;
use crate::utils::error::ExtractError;

/// Placeholder shown for links whose page never yielded a file name
pub const UNKNOWN_FILENAME: &str = "Unknown Filename";

/// Reads the pieces of a fetched page the scheduler cares about
pub trait MetadataExtractor: Send + Sync {
    /// File name and description shown on the page
    fn extract(&self, body: &str) -> Result<PageMetadata, ExtractError>;

    /// Absolute URL behind the page's download button
    fn download_target(&self, body: &str, page_url: &str) -> Result<String, ExtractError>;

    /// File links of a folder page, empty if the page is not a listing
    fn listing_links(&self, body: &str, base_url: &str) -> Vec<String>;
}
