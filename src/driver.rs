//! The browser capability the pipeline drives, and a timeout helper for it.

use crate::error::{AppError, Result};
use crate::selectors::SelectorStrategy;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// One rendered page session. Every call suspends until the browser reports
/// completion; callers bound the waiting with [`bounded`].
#[async_trait]
pub(crate) trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Waits until the document body is available.
    async fn wait_ready(&self) -> Result<()>;

    /// Runs a script in the page and returns its JSON-compatible value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Visible text of the first element matched by `strategy`.
    async fn read_text(&self, strategy: &SelectorStrategy) -> Result<String>;

    /// Attribute of the first element matched by `strategy`; `None` when the
    /// element exists but carries no such attribute.
    async fn read_attribute(&self, strategy: &SelectorStrategy, name: &str)
    -> Result<Option<String>>;

    /// Markup of the whole current document.
    async fn outer_html(&self) -> Result<String>;

    async fn click(&self, strategy: &SelectorStrategy) -> Result<()>;
}

/// Opens browser sessions. Each worker owns the session it opened.
#[async_trait]
pub(crate) trait SessionFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn PageDriver>>;
}

/// Runs `fut` with an upper bound; elapsing yields [`AppError::Timeout`].
pub(crate) async fn bounded<T, F>(stage: &'static str, url: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            stage,
            url: url.to_string(),
            limit,
        }),
    }
}

/// Navigates, waits for the body, then lets client-side rendering settle.
pub(crate) async fn open_page<D: PageDriver + ?Sized>(driver: &D, url: &str, settle: Duration) -> Result<()> {
    driver.navigate(url).await?;
    driver.wait_ready().await?;
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    Ok(())
}

/// Interprets a script result as a list of strings. Scripts may return an
/// array directly or a JSON-encoded array string.
pub(crate) fn string_list(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(encoded) => {
            serde_json::from_str::<Vec<String>>(&encoded).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory driver that replays scripted pages and feed snapshots.

    use super::*;
    use crate::collector::{SCROLL_FEED_SCRIPT, count_script, references_script};
    use crate::selectors::FEED_ITEMS;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// A page the scripted browser can navigate to.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedPage {
        pub html: String,
        /// Visible text keyed by the strategy's display form.
        pub texts: HashMap<String, String>,
        /// Attribute values keyed by (strategy display form, attribute name).
        pub attributes: HashMap<(String, String), String>,
        /// Navigation to this page fails.
        pub broken: bool,
        /// Navigation to this page never completes.
        pub hangs: bool,
    }

    impl ScriptedPage {
        pub(crate) fn html(html: &str) -> Self {
            Self {
                html: html.to_string(),
                ..Self::default()
            }
        }

        pub(crate) fn with_text(mut self, strategy: &SelectorStrategy, text: &str) -> Self {
            self.texts.insert(strategy.to_string(), text.to_string());
            self
        }

        pub(crate) fn with_attribute(mut self, strategy: &SelectorStrategy, name: &str, value: &str) -> Self {
            self.attributes
                .insert((strategy.to_string(), name.to_string()), value.to_string());
            self
        }

        pub(crate) fn broken() -> Self {
            Self {
                broken: true,
                ..Self::default()
            }
        }

        pub(crate) fn hanging() -> Self {
            Self {
                hangs: true,
                ..Self::default()
            }
        }
    }

    #[derive(Debug, Default)]
    struct State {
        current_url: String,
        visited: Vec<String>,
        feed_reads: usize,
        scrolls: usize,
    }

    #[derive(Debug, Default)]
    struct Inner {
        pages: HashMap<String, ScriptedPage>,
        /// Feed references visible after each successive read.
        feed: Vec<Vec<String>>,
        /// Feeds shown only while a given search page is loaded.
        feeds_by_url: HashMap<String, Vec<Vec<String>>>,
        /// Display form of the feed strategy that matches; others count zero.
        feed_strategy: Option<String>,
        state: Mutex<State>,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct ScriptedDriver {
        inner: Arc<Inner>,
    }

    impl ScriptedDriver {
        pub(crate) fn new(pages: Vec<(&str, ScriptedPage)>) -> Self {
            Self::with_feed(pages, None, Vec::new())
        }

        pub(crate) fn with_feed(
            pages: Vec<(&str, ScriptedPage)>,
            feed_strategy: Option<&SelectorStrategy>,
            feed: Vec<Vec<String>>,
        ) -> Self {
            Self::with_feeds(pages, feed_strategy, feed, Vec::new())
        }

        /// Like [`ScriptedDriver::with_feed`], with separate feeds for some
        /// search pages. Other pages show `feed`.
        pub(crate) fn with_feeds(
            pages: Vec<(&str, ScriptedPage)>,
            feed_strategy: Option<&SelectorStrategy>,
            feed: Vec<Vec<String>>,
            feeds_by_url: Vec<(String, Vec<Vec<String>>)>,
        ) -> Self {
            Self {
                inner: Arc::new(Inner {
                    pages: pages
                        .into_iter()
                        .map(|(url, page)| (url.to_string(), page))
                        .collect(),
                    feed,
                    feeds_by_url: feeds_by_url.into_iter().collect(),
                    feed_strategy: feed_strategy.map(ToString::to_string),
                    state: Mutex::new(State::default()),
                }),
            }
        }

        /// A driver over the same pages and feeds with its own browsing state.
        pub(crate) fn fresh(&self) -> Self {
            Self {
                inner: Arc::new(Inner {
                    pages: self.inner.pages.clone(),
                    feed: self.inner.feed.clone(),
                    feeds_by_url: self.inner.feeds_by_url.clone(),
                    feed_strategy: self.inner.feed_strategy.clone(),
                    state: Mutex::new(State::default()),
                }),
            }
        }

        pub(crate) fn visited(&self) -> Vec<String> {
            self.inner.state.lock().unwrap().visited.clone()
        }

        pub(crate) fn feed_reads(&self) -> usize {
            self.inner.state.lock().unwrap().feed_reads
        }

        pub(crate) fn scrolls(&self) -> usize {
            self.inner.state.lock().unwrap().scrolls
        }

        fn current_page(&self) -> Result<ScriptedPage> {
            let url = self.inner.state.lock().unwrap().current_url.clone();
            self.inner
                .pages
                .get(&url)
                .cloned()
                .ok_or_else(|| AppError::Browser(format!("no page loaded at '{}'", url)))
        }

        fn feed_snapshot(&self, advance: bool) -> Vec<String> {
            let mut state = self.inner.state.lock().unwrap();
            let feed = self
                .inner
                .feeds_by_url
                .get(&state.current_url)
                .unwrap_or(&self.inner.feed);
            let idx = state.feed_reads.min(feed.len().saturating_sub(1));
            if advance {
                state.feed_reads += 1;
            }
            feed.get(idx).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn navigate(&self, url: &str) -> Result<()> {
            let page = self.inner.pages.get(url).cloned().unwrap_or_default();
            {
                let mut state = self.inner.state.lock().unwrap();
                state.visited.push(url.to_string());
                state.current_url = url.to_string();
            }
            if page.hangs {
                std::future::pending::<()>().await;
            }
            if page.broken || !self.inner.pages.contains_key(url) {
                return Err(AppError::Browser(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
            }
            Ok(())
        }

        async fn wait_ready(&self) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
            if script == SCROLL_FEED_SCRIPT {
                self.inner.state.lock().unwrap().scrolls += 1;
                return Ok(serde_json::Value::Bool(true));
            }
            for strategy in FEED_ITEMS {
                let matches = self.inner.feed_strategy.as_deref() == Some(strategy.to_string().as_str());
                if script == count_script(strategy) {
                    let count = if matches { self.feed_snapshot(false).len() } else { 0 };
                    return Ok(serde_json::json!(count));
                }
                if script == references_script(strategy) {
                    let refs = if matches { self.feed_snapshot(true) } else { Vec::new() };
                    return Ok(serde_json::json!(refs));
                }
            }
            Err(AppError::Browser("unscripted evaluate call".to_string()))
        }

        async fn read_text(&self, strategy: &SelectorStrategy) -> Result<String> {
            self.current_page()?
                .texts
                .get(&strategy.to_string())
                .cloned()
                .ok_or_else(|| AppError::Browser(format!("no node for {}", strategy)))
        }

        async fn read_attribute(&self, strategy: &SelectorStrategy, name: &str) -> Result<Option<String>> {
            let page = self.current_page()?;
            Ok(page
                .attributes
                .get(&(strategy.to_string(), name.to_string()))
                .cloned())
        }

        async fn outer_html(&self) -> Result<String> {
            Ok(self.current_page()?.html)
        }

        async fn click(&self, strategy: &SelectorStrategy) -> Result<()> {
            Err(AppError::Browser(format!("no clickable node for {}", strategy)))
        }
    }

    /// Hands out the same scripted driver to every worker.
    pub(crate) struct ScriptedSessions(pub ScriptedDriver);

    #[async_trait]
    impl SessionFactory for ScriptedSessions {
        async fn open_session(&self) -> Result<Box<dyn PageDriver>> {
            Ok(Box::new(self.0.clone()))
        }
    }

    /// Opens an independent driver per session, one per worker, and keeps a
    /// handle on each for inspection.
    pub(crate) struct FreshSessions {
        template: ScriptedDriver,
        opened: Mutex<Vec<ScriptedDriver>>,
    }

    impl FreshSessions {
        pub(crate) fn new(template: ScriptedDriver) -> Self {
            Self {
                template,
                opened: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn opened(&self) -> Vec<ScriptedDriver> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionFactory for FreshSessions {
        async fn open_session(&self) -> Result<Box<dyn PageDriver>> {
            let driver = self.template.fresh();
            self.opened.lock().unwrap().push(driver.clone());
            Ok(Box::new(driver))
        }
    }
}
