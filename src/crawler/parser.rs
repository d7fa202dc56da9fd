//! HTML link and title extraction
//!
//! Links come from `<a href>` and `<link rel="canonical">`. Relative links
//! resolve against `<base href>` when the page declares one. Download links,
//! same-page anchors and non-HTTP schemes are skipped. `rel="nofollow"` links
//! are kept.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What a fetched page contributes to the crawl
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub title: Option<String>,

    /// Absolute HTTP(S) links, first occurrence order, no duplicates
    pub links: Vec<Url>,
}

/// Parses a document fetched from `page_url`
///
/// # Example
///
/// ```
/// use gleaner::crawler::parse_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Widgets</title></head><body><a href="/products">Products</a></body></html>"#;
/// let page = parse_page(html, &Url::parse("https://example.com/").unwrap());
/// assert_eq!(page.title.as_deref(), Some("Widgets"));
/// assert_eq!(page.links[0].as_str(), "https://example.com/products");
/// ```
pub fn parse_page(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = declared_base(&document, page_url).unwrap_or_else(|| page_url.clone());

    ParsedPage {
        title: select_title(&document),
        links: collect_links(&document, &base),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn select_title(document: &Html) -> Option<String> {
    let title = selector("title")?;
    document
        .select(&title)
        .next()
        .map(|el| el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn declared_base(document: &Html, page_url: &Url) -> Option<Url> {
    let base = selector("base[href]")?;
    let href = document.select(&base).next()?.value().attr("href")?;
    page_url.join(href.trim()).ok()
}

fn collect_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let anchors = selector("a[href]");
    let canonical = selector("link[rel='canonical'][href]");

    let anchor_hrefs = anchors.iter().flat_map(|s| {
        document
            .select(s)
            .filter(|el| el.value().attr("download").is_none())
            .filter_map(|el| el.value().attr("href"))
    });
    let canonical_hrefs = canonical
        .iter()
        .flat_map(|s| document.select(s).filter_map(|el| el.value().attr("href")));

    for href in anchor_hrefs.chain(canonical_hrefs) {
        if let Some(url) = resolve(href, base) {
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    }

    links
}

fn resolve(href: &str, base: &Url) -> Option<Url> {
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

    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
