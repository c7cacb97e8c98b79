//! Contact enrichment for one candidate: detail page first, then the
//! business website, then the website's contact page.

use crate::config::Config;
use crate::domain::{clean_website_url, should_visit_website};
use crate::driver::{PageDriver, bounded, open_page};
use crate::error::Result;
use crate::extract::{
    extract_first_email, extract_phone, extract_website_from_html, find_contact_link, parse_rating,
};
use crate::models::{CandidateRef, ContactFindings, Lead, Query, Source, UNKNOWN_NAME};
use crate::selectors::{self, CONSENT_BUTTONS};
use chrono::Utc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct EnrichmentSettings {
    pub phone_min_digits: usize,
    pub detail_timeout: Duration,
    pub website_timeout: Duration,
    pub contact_timeout: Duration,
    pub page_settle: Duration,
}

impl From<&Config> for EnrichmentSettings {
    fn from(config: &Config) -> Self {
        Self {
            phone_min_digits: config.phone_min_digits,
            detail_timeout: config.detail_timeout,
            website_timeout: config.website_timeout,
            contact_timeout: config.contact_timeout,
            page_settle: config.page_settle,
        }
    }
}

/// What the detail page shows about the business.
#[derive(Debug, Default)]
struct DetailPage {
    name: String,
    address: String,
    rating: f64,
    website_href: String,
    html: String,
}

/// Reads the listing fields from the loaded detail page. A field no strategy
/// resolves is left empty.
async fn read_detail_fields<D: PageDriver + ?Sized>(driver: &D, html: String) -> DetailPage {
    if let Some(strategy) = selectors::click_first(driver, CONSENT_BUTTONS).await {
        tracing::debug!(target: "enrich_task", "Dismissed consent dialog via {}", strategy);
    }

    let name = selectors::resolve_text(driver, "name", selectors::NAME).await;
    let address = selectors::resolve_text(driver, "address", selectors::ADDRESS).await;
    let rating_text = selectors::resolve_text(driver, "rating", selectors::RATING).await;
    let website_href =
        selectors::resolve_attribute(driver, "website", selectors::WEBSITE, "href").await;

    DetailPage {
        name,
        address,
        rating: parse_rating(&rating_text),
        website_href,
        html,
    }
}

/// Loads `url` and returns its markup.
async fn fetch_markup<D: PageDriver + ?Sized>(driver: &D, url: &str, settle: Duration) -> Result<String> {
    open_page(driver, url, settle).await?;
    driver.outer_html().await
}

/// Extracts a lead from one candidate.
///
/// Only loading the detail page is bounded by the detail timeout; field
/// lookups run after it and a miss leaves the field empty. Website and
/// contact-page failures (including timeouts) are logged and leave the
/// findings untouched. Only a failure to load the detail page is returned.
pub(crate) async fn enrich_candidate<D: PageDriver + ?Sized>(
    driver: &D,
    settings: &EnrichmentSettings,
    candidate: &CandidateRef,
    query: &Query,
) -> Result<Lead> {
    let detail_url = candidate.as_str();
    let html = bounded(
        "detail",
        detail_url,
        settings.detail_timeout,
        fetch_markup(driver, detail_url, settings.page_settle),
    )
    .await?;
    let detail = read_detail_fields(driver, html).await;

    let mut findings = ContactFindings::default();
    findings.absorb(
        Source::DetailPage,
        extract_first_email(&detail.html),
        extract_phone(&detail.html, settings.phone_min_digits),
    );

    let raw_website = if detail.website_href.is_empty() {
        extract_website_from_html(&detail.html).unwrap_or_default()
    } else {
        detail.website_href.clone()
    };
    let website = clean_website_url(&raw_website);

    if should_visit_website(&website) {
        tracing::info!(target: "enrich_task", "Checking website: {}", website);
        match bounded(
            "website",
            &website,
            settings.website_timeout,
            fetch_markup(driver, &website, settings.page_settle),
        )
        .await
        {
            Ok(site_html) => {
                let site_email = extract_first_email(&site_html);
                let site_has_email = site_email.is_some();
                findings.absorb(
                    Source::Website,
                    site_email,
                    extract_phone(&site_html, settings.phone_min_digits),
                );

                // A listing email does not count: the website's own pages are preferred.
                if !site_has_email {
                    if let Some(contact_url) = find_contact_link(&site_html, &website) {
                        visit_contact_page(driver, settings, &contact_url, &mut findings).await;
                    } else {
                        tracing::debug!(target: "enrich_task", "No contact link on {}", website);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "enrich_task",
                    "Skipping website for {}: {}", candidate, e
                );
            }
        }
    } else if !website.is_empty() {
        tracing::debug!(target: "enrich_task", "Not visiting platform/redirect link {}", website);
    }

    let name = if detail.name.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        detail.name
    };

    Ok(Lead {
        name,
        address: detail.address,
        phone: findings.phone().to_string(),
        website,
        email: findings.email().to_string(),
        rating: detail.rating,
        query: query.text(),
        scraped_at: Utc::now(),
    })
}

async fn visit_contact_page<D: PageDriver + ?Sized>(
    driver: &D,
    settings: &EnrichmentSettings,
    contact_url: &str,
    findings: &mut ContactFindings,
) {
    tracing::info!(target: "enrich_task", "Checking contact page: {}", contact_url);
    match bounded(
        "contact",
        contact_url,
        settings.contact_timeout,
        fetch_markup(driver, contact_url, settings.page_settle),
    )
    .await
    {
        Ok(contact_html) => findings.absorb(
            Source::ContactPage,
            extract_first_email(&contact_html),
            extract_phone(&contact_html, settings.phone_min_digits),
        ),
        Err(e) => {
            tracing::warn!(target: "enrich_task", "Skipping contact page {}: {}", contact_url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{ScriptedDriver, ScriptedPage};
    use crate::error::AppError;
    use crate::selectors::{NAME, RATING, SelectorStrategy, WEBSITE};
    use async_trait::async_trait;

    /// Charges `miss_cost` for every lookup that finds nothing, the way a
    /// live browser spends time before giving up on a selector.
    struct SlowMisses {
        inner: ScriptedDriver,
        miss_cost: Duration,
    }

    #[async_trait]
    impl PageDriver for SlowMisses {
        async fn navigate(&self, url: &str) -> Result<()> {
            self.inner.navigate(url).await
        }

        async fn wait_ready(&self) -> Result<()> {
            self.inner.wait_ready().await
        }

        async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
            self.inner.evaluate(script).await
        }

        async fn read_text(&self, strategy: &SelectorStrategy) -> Result<String> {
            let result = self.inner.read_text(strategy).await;
            if result.is_err() {
                tokio::time::sleep(self.miss_cost).await;
            }
            result
        }

        async fn read_attribute(&self, strategy: &SelectorStrategy, name: &str) -> Result<Option<String>> {
            let result = self.inner.read_attribute(strategy, name).await;
            if !matches!(result, Ok(Some(_))) {
                tokio::time::sleep(self.miss_cost).await;
            }
            result
        }

        async fn outer_html(&self) -> Result<String> {
            self.inner.outer_html().await
        }

        async fn click(&self, strategy: &SelectorStrategy) -> Result<()> {
            let result = self.inner.click(strategy).await;
            if result.is_err() {
                tokio::time::sleep(self.miss_cost).await;
            }
            result
        }
    }

    const DETAIL: &str = "https://www.google.com/maps/place/realbiz/data=!1";

    fn settings() -> EnrichmentSettings {
        EnrichmentSettings {
            phone_min_digits: 10,
            detail_timeout: Duration::from_secs(5),
            website_timeout: Duration::from_millis(50),
            contact_timeout: Duration::from_millis(50),
            page_settle: Duration::ZERO,
        }
    }

    fn query() -> Query {
        Query::new("Plumber", "Athens").unwrap()
    }

    fn detail_page(website_href: Option<&str>) -> ScriptedPage {
        let page = ScriptedPage::html("<div>Call (555) 123-4567 today</div>")
            .with_text(&NAME[0], "Real Biz")
            .with_text(&RATING[0], "4,7");
        match website_href {
            Some(href) => page.with_attribute(&WEBSITE[0], "href", href),
            None => page,
        }
    }

    #[tokio::test]
    async fn test_website_email_wins_detail_phone_kept() {
        let driver = ScriptedDriver::new(vec![
            (DETAIL, detail_page(Some("https://www.google.com/url?q=https://acme-plumbing.co/&sa=U"))),
            (
                "https://acme-plumbing.co/",
                ScriptedPage::html("<p>info@x.com</p><p>555-000-0000</p>"),
            ),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.email, "info@x.com");
        assert_eq!(lead.phone, "(555) 123-4567");
        assert_eq!(lead.website, "https://acme-plumbing.co/");
        assert_eq!(lead.name, "Real Biz");
        assert_eq!(lead.rating, 4.7);
        assert_eq!(lead.query, "Plumber Athens");
        assert!(!lead.is_high_value());
        // Email found on the website, so no contact page lookup.
        assert_eq!(driver.visited(), vec![DETAIL.to_string(), "https://acme-plumbing.co/".to_string()]);
    }

    #[tokio::test]
    async fn test_contact_page_followed_when_website_has_no_email() {
        let driver = ScriptedDriver::new(vec![
            (DETAIL, detail_page(Some("https://acme-plumbing.co/"))),
            (
                "https://acme-plumbing.co/",
                ScriptedPage::html(r#"<a href="/contact-us">Contact</a>"#),
            ),
            (
                "https://acme-plumbing.co/contact-us",
                ScriptedPage::html("<p>Write to hello@acme-plumbing.co or call 210-555-0199</p>"),
            ),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.email, "hello@acme-plumbing.co");
        assert_eq!(lead.phone, "(555) 123-4567");
        assert_eq!(driver.visited().len(), 3);
    }

    #[tokio::test]
    async fn test_contact_page_email_replaces_listing_email() {
        let listing = ScriptedPage::html("<p>listing@maps-biz.co</p>")
            .with_text(&NAME[0], "Biz")
            .with_attribute(&WEBSITE[0], "href", "https://biz.co/");
        let driver = ScriptedDriver::new(vec![
            (DETAIL, listing),
            ("https://biz.co/", ScriptedPage::html(r#"<a href="/contact">Contact</a>"#)),
            ("https://biz.co/contact", ScriptedPage::html("<p>owner@biz.co</p>")),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.email, "owner@biz.co");
        assert_eq!(
            driver.visited(),
            vec![
                DETAIL.to_string(),
                "https://biz.co/".to_string(),
                "https://biz.co/contact".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_sparse_listing_with_slow_lookups_still_yields_lead() {
        // Name and phone only: every consent, address, rating and website
        // lookup misses, and together they outlast the detail bound.
        let sparse = ScriptedPage::html("<div>Call (555) 123-4567 today</div>").with_text(&NAME[0], "Corner Shop");
        let driver = SlowMisses {
            inner: ScriptedDriver::new(vec![(DETAIL, sparse)]),
            miss_cost: Duration::from_millis(30),
        };
        let settings = EnrichmentSettings {
            detail_timeout: Duration::from_millis(450),
            page_settle: Duration::from_millis(20),
            ..settings()
        };

        let lead = enrich_candidate(&driver, &settings, &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.name, "Corner Shop");
        assert_eq!(lead.phone, "(555) 123-4567");
        assert_eq!(lead.address, "");
        assert!(lead.is_high_value());
    }

    #[tokio::test]
    async fn test_unreachable_website_keeps_detail_data() {
        let driver = ScriptedDriver::new(vec![
            (DETAIL, detail_page(Some("https://down.example.net/"))),
            ("https://down.example.net/", ScriptedPage::broken()),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.phone, "(555) 123-4567");
        assert_eq!(lead.email, "");
        assert_eq!(lead.website, "https://down.example.net/");
    }

    #[tokio::test]
    async fn test_hanging_website_times_out_without_losing_lead() {
        let driver = ScriptedDriver::new(vec![
            (DETAIL, detail_page(Some("https://slow.biz/"))),
            ("https://slow.biz/", ScriptedPage::hanging()),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.name, "Real Biz");
        assert_eq!(lead.phone, "(555) 123-4567");
    }

    #[tokio::test]
    async fn test_platform_website_is_not_visited_and_missing_name_defaults() {
        let page = ScriptedPage::html("<p>no contact data</p>").with_attribute(
            &WEBSITE[0],
            "href",
            "https://www.facebook.com/realbiz?ref=maps",
        );
        let driver = ScriptedDriver::new(vec![(DETAIL, page)]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.name, UNKNOWN_NAME);
        assert_eq!(lead.website, "https://www.facebook.com/realbiz");
        assert_eq!(lead.rating, 0.0);
        assert_eq!(driver.visited(), vec![DETAIL.to_string()]);
    }

    #[tokio::test]
    async fn test_redirect_only_link_yields_high_value_lead() {
        let driver = ScriptedDriver::new(vec![(DETAIL, detail_page(Some("https://g.page/realbiz")))]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert!(lead.is_high_value());
        assert_eq!(driver.visited().len(), 1);
    }

    #[tokio::test]
    async fn test_website_falls_back_to_markup_link() {
        let page = ScriptedPage::html(
            r#"<a href="https://www.google.com/maps">map</a> <a href="https://bakery.gr/?src=gmb">site</a>"#,
        );
        let driver = ScriptedDriver::new(vec![
            (DETAIL, page),
            ("https://bakery.gr/", ScriptedPage::html("<p>orders@bakery.gr</p>")),
        ]);

        let lead = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap();

        assert_eq!(lead.website, "https://bakery.gr/");
        assert_eq!(lead.email, "orders@bakery.gr");
    }

    #[tokio::test]
    async fn test_unreachable_detail_page_fails_candidate() {
        let driver = ScriptedDriver::new(vec![(DETAIL, ScriptedPage::broken())]);
        let err = enrich_candidate(&driver, &settings(), &CandidateRef::new(DETAIL), &query())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Browser(_)));
    }
}
