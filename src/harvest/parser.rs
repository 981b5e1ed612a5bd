//! Search results parser
//!
//! Extracts item descriptors from the serialized DOM of a result page using
//! the library's known result-list structure. Three strategies are tried in
//! order; the first that yields anything wins:
//!
//! 1. `xpl-results-item` entries with a title link
//! 2. document links inside a results-list container
//! 3. `xpl-document-card` entries outside recommendation blocks

use crate::storage::ItemDescriptor;
use crate::url::document_key;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

const TITLE_SELECTORS: &[&str] = &["h2 a", "h3 a", ".result-item-title a", "a.fw-bold"];
const DOCUMENT_LINK: &str = "a[href*='/document/']";
const AUTHOR_SELECTOR: &str = "xpl-authors-name-list a, .author a, p.author a";
const CONTAINER_SELECTOR: &str = "xpl-results-list, .results-list, .List-results-items";

/// Container links shorter than this are navigation, not titles
const MIN_CONTAINER_TITLE_LEN: usize = 10;

/// Parses a search results page into item descriptors, in page order
///
/// # Arguments
///
/// * `html` - Page source of the results page
/// * `base_url` - URL the page was loaded from, for resolving item links
///
/// # Returns
///
/// Descriptors without duplicate keys; empty when the page has no results
pub fn parse_search_results(html: &str, base_url: &Url) -> Vec<ItemDescriptor> {
    let document = Html::parse_document(html);

    let items = extract_result_items(&document, base_url);
    if !items.is_empty() {
        return items;
    }

    let items = extract_from_container(&document, base_url);
    if !items.is_empty() {
        return items;
    }

    extract_document_cards(&document, base_url)
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(href: &str, base_url: &Url) -> Option<String> {
    base_url.join(href.trim()).ok().map(String::from)
}

/// Reads the four-digit year following a `Year:` marker
fn extract_year(text: &str) -> Option<i32> {
    let (_, rest) = text.split_once("Year:")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

fn extract_authors(entry: ElementRef<'_>) -> Vec<String> {
    let Some(author_selector) = selector(AUTHOR_SELECTOR) else {
        return Vec::new();
    };

    let mut authors: Vec<String> = Vec::new();
    for link in entry.select(&author_selector) {
        let name = collapse_text(link);
        if !name.is_empty() && !authors.contains(&name) {
            authors.push(name);
        }
    }
    authors
}

fn descriptor_from_link(link: ElementRef<'_>, base_url: &Url) -> Option<ItemDescriptor> {
    let href = link.value().attr("href")?;
    let key = document_key(href)?;
    let title = collapse_text(link);
    if title.is_empty() {
        return None;
    }

    Some(ItemDescriptor {
        key,
        title,
        authors: Vec::new(),
        source_url: resolve(href, base_url),
        year: None,
    })
}

fn extract_result_items(document: &Html, base_url: &Url) -> Vec<ItemDescriptor> {
    let (Some(entry_selector), Some(link_selector)) =
        (selector("xpl-results-item"), selector(DOCUMENT_LINK))
    else {
        return Vec::new();
    };
    let title_selectors: Vec<Selector> = TITLE_SELECTORS.iter().filter_map(|s| selector(s)).collect();

    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for entry in document.select(&entry_selector) {
        let title_link = title_selectors
            .iter()
            .find_map(|s| entry.select(s).next())
            .or_else(|| entry.select(&link_selector).next());

        let Some(mut item) = title_link.and_then(|link| descriptor_from_link(link, base_url)) else {
            continue;
        };
        if !seen.insert(item.key.clone()) {
            continue;
        }

        item.authors = extract_authors(entry);
        item.year = extract_year(&collapse_text(entry));
        items.push(item);
    }

    items
}

fn extract_from_container(document: &Html, base_url: &Url) -> Vec<ItemDescriptor> {
    let (Some(container_selector), Some(link_selector)) =
        (selector(CONTAINER_SELECTOR), selector(DOCUMENT_LINK))
    else {
        return Vec::new();
    };
    let Some(container) = document.select(&container_selector).next() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    container
        .select(&link_selector)
        .filter_map(|link| descriptor_from_link(link, base_url))
        .filter(|item| item.title.chars().count() >= MIN_CONTAINER_TITLE_LEN)
        .filter(|item| seen.insert(item.key.clone()))
        .collect()
}

/// True when an ancestor marks a recommendation block
fn in_recommendations(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| {
            let value = ancestor.value();
            let marker = format!(
                "{} {} {}",
                value.name(),
                value.attr("class").unwrap_or_default(),
                value.attr("id").unwrap_or_default()
            )
            .to_lowercase();
            marker.contains("recommend") || marker.contains("more-like-this")
        })
}

fn extract_document_cards(document: &Html, base_url: &Url) -> Vec<ItemDescriptor> {
    let (Some(card_selector), Some(link_selector)) =
        (selector("xpl-document-card"), selector(DOCUMENT_LINK))
    else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for card in document.select(&card_selector) {
        if in_recommendations(card) {
            continue;
        }
        for link in card.select(&link_selector) {
            if let Some(item) = descriptor_from_link(link, base_url) {
                if seen.insert(item.key.clone()) {
                    items.push(item);
                }
            }
        }
    }

    items
}
