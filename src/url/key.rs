use crate::{UrlError, UrlResult};
use url::Url;

/// Extracts the document number from an item link
///
/// The key is the run of digits in the path segment following `document`,
/// e.g. `/document/9876543/` or `https://host/document/9876543?x=y`.
///
/// # Arguments
///
/// * `href` - Absolute or site-relative item link
///
/// # Returns
///
/// * `Some(String)` - The document number
/// * `None` - The link does not point at a document
///
/// # Examples
///
/// ```
/// use paper_harvest::url::document_key;
///
/// assert_eq!(document_key("/document/9876543/"), Some("9876543".to_string()));
/// assert_eq!(document_key("/author/37085"), None);
/// ```
pub fn document_key(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let mut segments = path.split('/');

    while let Some(segment) = segments.next() {
        if segment == "document" {
            let candidate = segments.next()?;
            let digits: String = candidate.chars().take_while(|c| c.is_ascii_digit()).collect();
            return if digits.is_empty() { None } else { Some(digits) };
        }
    }

    None
}

/// Resolves a `src`/`href` attribute against the page it was read from
pub fn resolve_href(base: &str, href: &str) -> UrlResult<String> {
    let base = Url::parse(base)?;
    let resolved = base.join(href.trim())?;
    Ok(resolved.to_string())
}

/// Extracts the document number, failing when the link has none
pub fn require_document_key(href: &str) -> UrlResult<String> {
    document_key(href).ok_or_else(|| UrlError::MissingDocumentNumber(href.to_string()))
}
