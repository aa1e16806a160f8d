use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, REFERER,
    USER_AGENT,
};

/// Build browser-like headers for link page visits
///
/// Mirrors what a desktop Firefox sends for an htmx navigation. Accept-Encoding
/// is left to reqwest so that compressed bodies are decoded transparently.
///
/// # Examples
///
/// ```
/// use revisit::crawler::headers::build_browser_headers;
///
/// let headers = build_browser_headers("Mozilla/5.0 (X11; Linux x86_64)");
/// assert!(headers.contains_key("user-agent"));
/// ```
pub fn build_browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("pt-BR,pt;q=0.8,en-US;q=0.5,en;q=0.3"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );

    headers
}

/// Same headers plus a Referer pointing at the page the click came from
pub fn build_download_headers(user_agent: &str, referer: &str) -> HeaderMap {
    let mut headers = build_browser_headers(user_agent);
    if let Ok(value) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_browser_headers() {
        let headers = build_browser_headers("Mozilla/5.0");

        assert_eq!(
            headers.get(USER_AGENT).unwrap(),
            HeaderValue::from_static("Mozilla/5.0")
        );
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
        assert!(headers.contains_key("sec-fetch-dest"));
        assert!(headers.contains_key("sec-fetch-mode"));
        assert!(headers.contains_key("sec-fetch-site"));
        assert!(!headers.contains_key(REFERER));
        assert!(!headers.contains_key("accept-encoding"));
    }

    #[test]
    fn test_download_headers_carry_referer() {
        let page = "https://files.example.com/d/abc?x=1&y=2";
        let headers = build_download_headers("Mozilla/5.0", page);
        assert_eq!(
            headers.get(REFERER).unwrap(),
            HeaderValue::from_str(page).unwrap()
        );
    }

    #[test]
    fn test_invalid_values_are_skipped() {
        let headers = build_download_headers("bad\nagent", "bad\nreferer");
        assert!(!headers.contains_key(USER_AGENT));
        assert!(!headers.contains_key(REFERER));
        assert!(headers.contains_key(ACCEPT));
    }
}
