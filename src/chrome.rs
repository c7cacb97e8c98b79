//! [`PageDriver`] backed by a local Chrome/Chromium through `headless_chrome`.
//!
//! The protocol client is blocking, so every call runs on the blocking pool.

use crate::config::Config;
use crate::driver::{PageDriver, SessionFactory};
use crate::error::{AppError, Result};
use crate::selectors::SelectorStrategy;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Keeps the browser alive across pacing sleeps and slow pages.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

/// Tab-level timeout for protocol waits such as navigation. The per-stage
/// bounds are enforced by the caller, so this only has to outlast the longest.
fn navigation_timeout(config: &Config) -> Duration {
    config
        .detail_timeout
        .max(config.website_timeout)
        .max(config.contact_timeout)
}

/// Launches one browser and opens a tab per session.
pub(crate) struct ChromeSessionFactory {
    browser: Browser,
    user_agent: String,
    navigation_timeout: Duration,
    element_timeout: Duration,
}

impl ChromeSessionFactory {
    pub(crate) fn launch(config: &Config) -> Result<Self> {
        let args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--lang=en-US"),
        ];
        let options = LaunchOptions {
            headless: config.headless,
            sandbox: false,
            path: config.chrome_path.clone(),
            window_size: Some((1366, 900)),
            idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
            args,
            ..Default::default()
        };
        let browser = Browser::new(options)
            .map_err(|e| AppError::Browser(format!("Failed to launch Chrome: {}", e)))?;
        tracing::info!(
            "Launched Chrome (headless: {}, path: {:?})",
            config.headless,
            config.chrome_path
        );
        Ok(Self {
            browser,
            user_agent: config.user_agent.clone(),
            navigation_timeout: navigation_timeout(config),
            element_timeout: config.element_timeout,
        })
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open_session(&self) -> Result<Box<dyn PageDriver>> {
        let browser = self.browser.clone();
        let user_agent = self.user_agent.clone();
        let navigation_timeout = self.navigation_timeout;
        let tab = tokio::task::spawn_blocking(move || -> anyhow::Result<Arc<Tab>> {
            let tab = browser.new_tab()?;
            tab.set_default_timeout(navigation_timeout);
            tab.set_user_agent(&user_agent, Some("en-US,en"), None)?;
            Ok(tab)
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
        .map_err(|e| AppError::Browser(format!("Failed to open tab: {}", e)))?;
        Ok(Box::new(ChromeSession {
            tab,
            element_timeout: self.element_timeout,
        }))
    }
}

/// One browser tab. Field lookups are single script evaluations, so a
/// missing element costs one round trip rather than a wait.
pub(crate) struct ChromeSession {
    tab: Arc<Tab>,
    element_timeout: Duration,
}

impl ChromeSession {
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| AppError::Task(e.to_string()))?
            .map_err(|e| AppError::Browser(e.to_string()))
    }
}

fn expect_string(value: serde_json::Value, strategy: &SelectorStrategy) -> anyhow::Result<String> {
    match value {
        serde_json::Value::String(text) => Ok(text),
        _ => anyhow::bail!("no visible element for {}", strategy),
    }
}

#[async_trait]
impl PageDriver for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn wait_ready(&self) -> Result<()> {
        let element_timeout = self.element_timeout;
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout("body", element_timeout)?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let script = script.to_string();
        self.blocking(move |tab| {
            let remote = tab.evaluate(&script, false)?;
            Ok(remote.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn read_text(&self, strategy: &SelectorStrategy) -> Result<String> {
        let strategy = *strategy;
        self.blocking(move |tab| {
            let value = tab.evaluate(&strategy.visible_text_script(), false)?.value;
            expect_string(value.unwrap_or_default(), &strategy)
        })
        .await
    }

    async fn read_attribute(&self, strategy: &SelectorStrategy, name: &str) -> Result<Option<String>> {
        let script = strategy.visible_attribute_script(name);
        self.blocking(move |tab| {
            let value = tab.evaluate(&script, false)?.value;
            Ok(value.and_then(|v| v.as_str().map(str::to_string)))
        })
        .await
    }

    async fn outer_html(&self) -> Result<String> {
        self.blocking(|tab| Ok(tab.get_content()?)).await
    }

    async fn click(&self, strategy: &SelectorStrategy) -> Result<()> {
        let strategy = *strategy;
        self.blocking(move |tab| {
            let value = tab.evaluate(&strategy.click_script(), false)?.value;
            match value {
                Some(serde_json::Value::Bool(true)) => Ok(()),
                _ => anyhow::bail!("no visible element to click for {}", strategy),
            }
        })
        .await
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            tracing::debug!("Failed to close tab: {}", e);
        }
    }
}
