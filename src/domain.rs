//! Utility functions for canonicalizing and classifying business websites.

use crate::error::{AppError, Result};
use url::Url;

/// Marker of a short redirect page that has no real external destination.
pub(crate) const REDIRECT_ONLY_MARKER: &str = "g.page";

/// Mapping and social platforms that never count as a business's own website.
const PLATFORM_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "google.com",
    "goo.gl",
];

/// Extracts the base domain name (e.g., "example.com") from a given URL string.
/// Handles missing schemes, "www." prefixes, and ports.
///
/// # Returns
/// * `Ok(String)` containing the lowercase domain name if successful.
/// * `Err(AppError::DomainExtraction)` if the URL is empty or cannot be parsed.
pub(crate) fn get_domain_from_url(website_url_str: &str) -> Result<String> {
    if website_url_str.is_empty() {
        return Err(AppError::DomainExtraction(
            "Input URL string is empty".to_string(),
        ));
    }

    let url = normalize_url(website_url_str)?;

    let host = url.host_str().ok_or_else(|| {
        AppError::DomainExtraction(format!(
            "Could not extract host from parsed URL: {}",
            website_url_str
        ))
    })?;

    let domain = host.strip_prefix("www.").unwrap_or(host);
    Ok(domain.to_lowercase())
}

/// Parses the input website string into a valid Url object, adding a scheme if necessary.
pub(crate) fn normalize_url(website_url_str: &str) -> Result<Url> {
    if website_url_str.is_empty() {
        return Err(AppError::InsufficientInput(
            "Website URL is empty".to_string(),
        ));
    }
    let url_str_with_scheme = if website_url_str.starts_with("//") {
        format!("https:{}", website_url_str)
    } else if !website_url_str.starts_with("http://") && !website_url_str.starts_with("https://")
    {
        format!("https://{}", website_url_str)
    } else {
        website_url_str.to_string()
    };
    Url::parse(&url_str_with_scheme).map_err(AppError::UrlParse)
}

/// Reduces a raw outbound link to the canonical website stored with a lead.
///
/// A search-engine wrapper (`.../url?q=<target>&...`) is unwrapped to its `q`
/// target first, then any query string or fragment is dropped.
pub(crate) fn clean_website_url(raw: &str) -> String {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if let Some(idx) = url.find("/url?") {
        let query = &url[idx + "/url?".len()..];
        let target = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "q")
            .map(|(_, value)| value.into_owned());
        if let Some(target) = target {
            url = target;
        }
    }

    if let Some(idx) = url.find(|c: char| c == '?' || c == '#') {
        url.truncate(idx);
    }
    url.trim().to_string()
}

/// True when the link belongs to a mapping or social platform.
pub(crate) fn is_platform_website(website: &str) -> bool {
    let Ok(domain) = get_domain_from_url(website) else {
        return false;
    };
    PLATFORM_DOMAINS
        .iter()
        .any(|platform| domain == *platform || domain.ends_with(&format!(".{}", platform)))
}

/// True when the link is a short redirect page rather than a real website.
pub(crate) fn is_redirect_only(website: &str) -> bool {
    website.to_lowercase().contains(REDIRECT_ONLY_MARKER)
}

/// Whether the enrichment chain should visit this website at all.
pub(crate) fn should_visit_website(website: &str) -> bool {
    !website.is_empty() && !is_platform_website(website) && !is_redirect_only(website)
}

/// A business with no usable website: nothing at all, or only a redirect page.
pub(crate) fn is_high_value_website(website: &str) -> bool {
    let website = website.trim();
    website.is_empty() || is_redirect_only(website)
}

/// Normalized email half of the store's uniqueness key.
pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalized website half of the store's uniqueness key.
pub(crate) fn website_key(website: &str) -> String {
    website.trim().trim_end_matches('/').to_lowercase()
}
