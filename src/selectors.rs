//! Ordered element-selection strategies per logical field, and the resolver
//! that tries them against a live page. The tables follow the map platform's
//! markup and are revised as it drifts.

use crate::driver::PageDriver;
use std::fmt;

/// One way of locating an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectorStrategy {
    /// A CSS query.
    Css(&'static str),
    /// Elements whose accessibility label contains the given text.
    AriaLabel(&'static str),
    /// `tag` elements whose text content contains `needle`.
    Text {
        tag: &'static str,
        needle: &'static str,
    },
}

impl SelectorStrategy {
    /// CSS form, when the strategy has one.
    pub(crate) fn css(&self) -> Option<String> {
        match self {
            SelectorStrategy::Css(css) => Some((*css).to_string()),
            SelectorStrategy::AriaLabel(label) => Some(format!(r#"[aria-label*="{}"]"#, label)),
            SelectorStrategy::Text { .. } => None,
        }
    }

    /// XPath form, used for text-content search.
    pub(crate) fn xpath(&self) -> Option<String> {
        match self {
            SelectorStrategy::Text { tag, needle } => Some(format!(
                r#"//{}[contains(normalize-space(.), "{}")]"#,
                tag, needle
            )),
            _ => None,
        }
    }

    /// A script expression evaluating to the array of matched elements.
    pub(crate) fn elements_js(&self) -> String {
        if let Some(css) = self.css() {
            return format!(
                "Array.from(document.querySelectorAll({}))",
                serde_json::Value::String(css)
            );
        }
        match self.xpath() {
            Some(xpath) => format!(
                "(function() {{ const r = document.evaluate({}, document, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
                 for (let i = 0; i < r.snapshotLength; i++) {{ out.push(r.snapshotItem(i)); }} \
                 return out; }})()",
                serde_json::Value::String(xpath)
            ),
            None => "[]".to_string(),
        }
    }

    /// Script evaluating to the trimmed text of the first rendered match with
    /// non-empty text, or `null`. Elements without client rects are hidden.
    pub(crate) fn visible_text_script(&self) -> String {
        format!(
            "(function() {{ for (const el of {}) {{ \
             if (el.getClientRects().length === 0) continue; \
             const text = (el.innerText || '').trim(); \
             if (text) return text; }} \
             return null; }})()",
            self.elements_js()
        )
    }

    /// Script evaluating to the `name` attribute of the first rendered match
    /// that carries a non-empty one, or `null`.
    pub(crate) fn visible_attribute_script(&self, name: &str) -> String {
        format!(
            "(function() {{ for (const el of {}) {{ \
             if (el.getClientRects().length === 0) continue; \
             const value = el.getAttribute({}); \
             if (value && value.trim()) return value.trim(); }} \
             return null; }})()",
            self.elements_js(),
            serde_json::Value::String(name.to_string())
        )
    }

    /// Script that clicks the first rendered match and evaluates to whether
    /// one was found.
    pub(crate) fn click_script(&self) -> String {
        format!(
            "(function() {{ for (const el of {}) {{ \
             if (el.getClientRects().length === 0) continue; \
             el.click(); return true; }} \
             return false; }})()",
            self.elements_js()
        )
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorStrategy::Css(css) => write!(f, "css:{}", css),
            SelectorStrategy::AriaLabel(label) => write!(f, "aria:{}", label),
            SelectorStrategy::Text { tag, needle } => write!(f, "text:{}:{}", tag, needle),
        }
    }
}

pub(crate) const NAME: &[SelectorStrategy] = &[
    SelectorStrategy::Css("h1.DUwDvf"),
    SelectorStrategy::Css("h1.fontHeadlineLarge"),
    SelectorStrategy::Css("div[role=\"main\"] h1"),
];

pub(crate) const ADDRESS: &[SelectorStrategy] = &[
    SelectorStrategy::Css(r#"button[data-item-id="address"]"#),
    SelectorStrategy::Css(r#"[data-item-id="address"]"#),
    SelectorStrategy::AriaLabel("Address"),
];

pub(crate) const RATING: &[SelectorStrategy] = &[
    SelectorStrategy::Css("span.F7nice"),
    SelectorStrategy::Css(r#"div.F7nice span span[aria-hidden="true"]"#),
    SelectorStrategy::AriaLabel("stars"),
];

/// The listing's canonical "website" link; read through its `href`.
pub(crate) const WEBSITE: &[SelectorStrategy] = &[
    SelectorStrategy::Css(r#"a[data-item-id="authority"]"#),
    SelectorStrategy::AriaLabel("Website"),
];

/// Result entries in the search feed, each linking to a detail page.
pub(crate) const FEED_ITEMS: &[SelectorStrategy] = &[
    SelectorStrategy::Css(r#"a[href*="/maps/place/"]"#),
    SelectorStrategy::Css("div.Nv2PK a"),
    SelectorStrategy::Css("a.hfpxzc"),
    SelectorStrategy::Css(r#"div[role="article"] a"#),
];

pub(crate) const CONSENT_BUTTONS: &[SelectorStrategy] = &[
    SelectorStrategy::Css(r#"button[aria-label="Accept all"]"#),
    SelectorStrategy::Css(r#"button[aria-label="I agree"]"#),
    SelectorStrategy::Css(r#"button[aria-label="Accept all cookies"]"#),
    SelectorStrategy::Css(r#"button[jsname="b3VHJd"]"#),
    SelectorStrategy::Text {
        tag: "button",
        needle: "Accept all",
    },
    SelectorStrategy::Text {
        tag: "button",
        needle: "Agree to all",
    },
    SelectorStrategy::Text {
        tag: "button",
        needle: "Αποδοχή όλων",
    },
];

/// Text of the first strategy that yields a non-empty value; empty when none does.
pub(crate) async fn resolve_text<D: PageDriver + ?Sized>(
    driver: &D,
    field: &str,
    strategies: &[SelectorStrategy],
) -> String {
    for strategy in strategies {
        match driver.read_text(strategy).await {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    tracing::debug!("Resolved {} via {}", field, strategy);
                    return text.to_string();
                }
            }
            Err(e) => {
                tracing::debug!("Strategy {} for {} missed: {}", strategy, field, e);
            }
        }
    }
    tracing::debug!("No strategy resolved {}", field);
    String::new()
}

/// Attribute of the first strategy that yields a non-empty value; empty when none does.
pub(crate) async fn resolve_attribute<D: PageDriver + ?Sized>(
    driver: &D,
    field: &str,
    strategies: &[SelectorStrategy],
    attribute: &str,
) -> String {
    for strategy in strategies {
        match driver.read_attribute(strategy, attribute).await {
            Ok(Some(value)) if !value.trim().is_empty() => {
                tracing::debug!("Resolved {} via {}", field, strategy);
                return value.trim().to_string();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Strategy {} for {} missed: {}", strategy, field, e);
            }
        }
    }
    String::new()
}

/// Clicks the first element any strategy finds. Returns the strategy that worked.
pub(crate) async fn click_first<D: PageDriver + ?Sized>(
    driver: &D,
    strategies: &[SelectorStrategy],
) -> Option<SelectorStrategy> {
    for strategy in strategies {
        if driver.click(strategy).await.is_ok() {
            tracing::debug!("Clicked {}", strategy);
            return Some(*strategy);
        }
    }
    None
}
