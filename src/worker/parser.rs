//! HTML extraction for fetched pages
//!
//! Pulls three things out of a document:
//! - the title, cut to a bounded length
//! - the visible text, whitespace-collapsed, for the document index
//! - outbound links, resolved against the page URL

use scraper::{Html, Selector};
use url::Url;

/// Longest title handed to the index, in characters
pub const MAX_TITLE_CHARS: usize = 200;

/// Title used when a page has none
pub const UNTITLED: &str = "No Title";

/// Content extracted from one HTML page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub title: String,

    /// Visible text of the body, words separated by single spaces
    pub text: String,

    /// Absolute http(s) links in document order, without duplicates
    pub links: Vec<String>,
}

/// Extracts title, text and links from an HTML document
///
/// Anchors carrying a `download` attribute are skipped, as are
/// `javascript:`, `mailto:`, `tel:` and `data:` targets and same-page
/// fragments. `rel="nofollow"` links are kept.
///
/// # Example
///
/// ```
/// use crawl_relay::worker::extract_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Docs</title></head><body><a href="/next">Next</a></body></html>"#;
/// let page = extract_page(html, &Url::parse("https://a.test/").unwrap());
/// assert_eq!(page.title, "Docs");
/// assert_eq!(page.links, vec!["https://a.test/next"]);
/// ```
pub fn extract_page(html: &str, page_url: &Url) -> PageContent {
    let document = Html::parse_document(html);

    PageContent {
        title: extract_title(&document),
        text: extract_text(&document),
        links: extract_links(&document, page_url),
    }
}

fn extract_title(document: &Html) -> String {
    let Ok(selector) = Selector::parse("title") else {
        return UNTITLED.to_string();
    };

    document
        .select(&selector)
        .next()
        .map(|element| collapse_whitespace(element.text()))
        .filter(|title| !title.is_empty())
        .map(|title| title.chars().take(MAX_TITLE_CHARS).collect())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn extract_text(document: &Html) -> String {
    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };
    let Ok(hidden) = Selector::parse("script, style, noscript, template") else {
        return String::new();
    };

    let Some(root) = document.select(&body).next() else {
        return String::new();
    };

    let hidden_ids: Vec<_> = root.select(&hidden).map(|element| element.id()).collect();
    let visible = root.descendants().filter_map(|node| {
        let in_hidden = node
            .ancestors()
            .any(|ancestor| hidden_ids.contains(&ancestor.id()));
        match node.value().as_text() {
            Some(text) if !in_hidden => Some(&**text),
            _ => None,
        }
    });

    collapse_whitespace(visible)
}

fn extract_links(document: &Html, page_url: &Url) -> Vec<String> {
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for element in document.select(&anchors) {
        if element.value().attr("download").is_some() {
            continue;
        }
        let Some(link) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, page_url))
        else {
            continue;
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

/// Resolves an href against the page URL, keeping only http(s) targets
fn resolve_link(href: &str, page_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let mut resolved = page_url.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
