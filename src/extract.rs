//! Pulls contact fields (email, phone, rating, website, contact link) out of
//! raw page markup. Everything here is pure; the enrichment chain decides
//! which page the markup came from.

use crate::domain::is_platform_website;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Longest phone number, in digits, that is still plausible.
pub(crate) const MAX_PHONE_DIGITS: usize = 15;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Z|a-z]{2,}\b")
        .expect("Failed to compile email regex pattern. This should not happen.")
});

/// International-leaning first, strict 3-3-4 grouping second.
static PHONE_REGEXES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9}")
            .expect("Failed to compile international phone pattern."),
        Regex::new(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}")
            .expect("Failed to compile 3-3-4 phone pattern."),
    ]
});

static WEBSITE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[a-zA-Z0-9.\-]+\.[A-Za-z]{2,}(?:/[^\s"'<>]*)?"#)
        .expect("Failed to compile website regex pattern.")
});

static RATING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("Failed to compile rating pattern."));

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to parse anchor selector."));

/// Substrings that mark an address as a placeholder, tracker or asset name.
const INVALID_EMAIL_PATTERNS: &[&str] = &[
    "example.com",
    "@example",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".webp",
    ".svg",
    "sampleemail",
    "youremail",
    "your-email",
    "noreply",
    "no-reply",
    "wixpress",
    "sentry",
    "placeholder",
    "test@",
    "email@",
    "qodeinteractive",
];

/// Hosts whose links show up in listing markup but are never the business site.
const WEBSITE_SKIP_KEYWORDS: &[&str] = &[
    "google",
    "facebook",
    "instagram",
    "youtube",
    "linkedin",
    "twitter",
    "gstatic",
    "googleapis",
    "schema.org",
    "yelp",
    "tripadvisor",
    "booking.com",
];

/// Link text or href fragments that point to a contact-style page.
const CONTACT_KEYWORDS: &[&str] = &[
    "contact",
    "kontakt",
    "contacto",
    "contatto",
    "contactez",
    "impressum",
    "about",
    "επικοινωνία",
];

/// All acceptable emails in `text`, in document order, deduplicated
/// case-insensitively. Original casing is kept.
pub(crate) fn extract_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in EMAIL_REGEX.find_iter(text) {
        let email = m.as_str().trim();
        let lower = email.to_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        if INVALID_EMAIL_PATTERNS.iter().any(|p| lower.contains(p)) {
            continue;
        }
        seen.insert(lower);
        out.push(email.to_string());
    }
    out
}

/// The single best email in `text`: the first one that survives the exclusion list.
pub(crate) fn extract_first_email(text: &str) -> Option<String> {
    extract_emails(text).into_iter().next()
}

fn digits_of(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Rejects digit strings that are really years/timestamps or filler.
fn is_invalid_phone(digits: &str) -> bool {
    if digits.len() == 8 {
        if let Ok(year) = digits[..4].parse::<u32>() {
            if (1900..=2100).contains(&year) {
                return true;
            }
        }
    }
    if digits.len() > MAX_PHONE_DIGITS {
        return true;
    }
    let mut chars = digits.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

/// Normalized display form for 10-digit and `1` + 10-digit numbers; anything
/// else is returned as matched.
pub(crate) fn format_phone(matched: &str) -> String {
    let digits = digits_of(matched);
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => {
            format!("+1 ({}) {}-{}", &digits[1..4], &digits[4..7], &digits[7..])
        }
        _ => matched.trim().to_string(),
    }
}

/// The first plausible phone number in `text`, formatted for display.
pub(crate) fn extract_phone(text: &str, min_digits: usize) -> Option<String> {
    for regex in PHONE_REGEXES.iter() {
        for m in regex.find_iter(text) {
            let digits = digits_of(m.as_str());
            if digits.len() < min_digits || digits.len() > MAX_PHONE_DIGITS {
                continue;
            }
            if is_invalid_phone(&digits) {
                continue;
            }
            return Some(format_phone(m.as_str()));
        }
    }
    None
}

/// First numeric token of the rating text; `0.0` means unknown.
pub(crate) fn parse_rating(text: &str) -> f64 {
    RATING_REGEX
        .find(text.trim())
        .and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// First absolute link in listing markup that is not a platform/CDN host.
pub(crate) fn extract_website_from_html(html: &str) -> Option<String> {
    WEBSITE_REGEX
        .find_iter(html)
        .map(|m| m.as_str().trim())
        .find(|candidate| {
            let lower = candidate.to_lowercase();
            !WEBSITE_SKIP_KEYWORDS.iter().any(|bad| lower.contains(bad))
        })
        .map(str::to_string)
}

/// Finds the first anchor whose text or href names a contact-style page and
/// returns it as an absolute URL resolved against `page_url`.
pub(crate) fn find_contact_link(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        let href_lower = href.to_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || href_lower.starts_with("mailto:")
            || href_lower.starts_with("tel:")
            || href_lower.starts_with("javascript:")
        {
            continue;
        }

        let text = anchor.text().collect::<String>().to_lowercase();
        let matches = CONTACT_KEYWORDS
            .iter()
            .any(|kw| text.contains(kw) || href_lower.contains(kw));
        if !matches {
            continue;
        }

        let resolved = if let Some(rest) = href.strip_prefix("//") {
            Some(format!("https://{}", rest))
        } else {
            match &base {
                Some(base) => base.join(href).ok().map(|u| u.to_string()),
                None => Url::parse(href).ok().map(|u| u.to_string()),
            }
        };

        match resolved {
            Some(url) if !is_platform_website(&url) => return Some(url),
            Some(url) => {
                tracing::debug!("Ignoring contact link on a platform host: {}", url);
            }
            None => {
                tracing::debug!("Could not resolve contact link '{}' against {}", href, page_url);
            }
        }
    }
    None
}
