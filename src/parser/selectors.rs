//! CSS selectors for file-host pages
//!
//! Link pages show the file name in a large heading span with a details list
//! next to it, and a download button that fetches its target through htmx.
//! Folder pages list their files in a `table.fs`.

use lazy_static::lazy_static;
use scraper::Selector;

// Helper macro to parse selectors safely at compile time
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    /// File name heading
    pub static ref FILENAME: Selector = parse_selector!("span.text-2xl");

    /// Details list, searched under the heading's parent
    pub static ref DETAILS_LIST: Selector = parse_selector!("ul");
    pub static ref DETAILS_ITEM: Selector = parse_selector!("li");

    /// Download affordance; the target lives in `hx-get`
    pub static ref DOWNLOAD_BUTTON: Selector = parse_selector!("a.link-button.gay-button");

    /// Folder listing table and the file links inside it
    pub static ref LISTING_TABLE: Selector = parse_selector!("table.fs");
    pub static ref LISTING_LINK: Selector = parse_selector!(r#"a[target="_blank"][href]"#);
}

/// Attribute holding the download target
pub const DOWNLOAD_ATTR: &str = "hx-get";

/// Position of the file details entry in the details list
pub const DETAILS_INDEX: usize = 2;
