use crate::{UrlError, UrlResult};
use std::fmt;
use url::Url;

const SEARCH_PATH: &str = "search/searchresult.jsp";
const PAGE_PARAM: &str = "pageNumber";
const ROWS_PARAM: &str = "rowsPerPage";

/// Inclusive publication-year filter for a keyword search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub from: i32,
    pub to: i32,
}

impl YearRange {
    /// Builds a range from optional bounds; a single bound covers that one year
    pub fn from_bounds(from: Option<i32>, to: Option<i32>) -> Option<Self> {
        match (from, to) {
            (Some(from), Some(to)) => Some(Self {
                from: from.min(to),
                to: from.max(to),
            }),
            (Some(year), None) | (None, Some(year)) => Some(Self { from: year, to: year }),
            (None, None) => None,
        }
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_Year", self.from, self.to)
    }
}

/// URL builder for one library deployment
///
/// # Examples
///
/// ```
/// use paper_harvest::url::LibraryUrls;
///
/// let urls = LibraryUrls::new("https://ieeexplore.ieee.org").unwrap();
/// assert_eq!(
///     urls.landing_page("123"),
///     "https://ieeexplore.ieee.org/stamp/stamp.jsp?tp=&arnumber=123"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct LibraryUrls {
    base: Url,
}

impl LibraryUrls {
    /// Creates a builder rooted at `base_url`
    pub fn new(base_url: &str) -> UrlResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Keyword search results page
    ///
    /// # Arguments
    ///
    /// * `query` - Free-text query
    /// * `years` - Optional publication-year filter
    /// * `page` - 1-based page index
    /// * `rows` - Results per page
    pub fn search_page(
        &self,
        query: &str,
        years: Option<YearRange>,
        page: u32,
        rows: u32,
    ) -> UrlResult<String> {
        let mut url = self.base.join(SEARCH_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("newsearch", "true")
                .append_pair("queryText", query)
                .append_pair(PAGE_PARAM, &page.to_string())
                .append_pair(ROWS_PARAM, &rows.to_string());
            if let Some(years) = years {
                pairs.append_pair("ranges", &years.to_string());
            }
        }
        Ok(url.into())
    }

    /// Rewrites an existing search results URL to point at `page`
    ///
    /// Every other query parameter (refinements, sort order) is kept as is.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The page URL
    /// * `Err(UrlError::NotSearchResults)` - The URL is not a search results page
    pub fn from_existing(search_url: &str, page: u32, rows: u32) -> UrlResult<String> {
        let mut url = Url::parse(search_url.trim())?;
        if !url.path().contains("searchresult.jsp") {
            return Err(UrlError::NotSearchResults(search_url.to_string()));
        }

        let page = page.to_string();
        let rows = rows.to_string();
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        for (name, value) in [(PAGE_PARAM, &page), (ROWS_PARAM, &rows)] {
            match pairs.iter_mut().find(|(k, _)| k == name) {
                Some(pair) => pair.1 = value.clone(),
                None => pairs.push((name.to_string(), value.clone())),
            }
        }
        // Keep a single page/rows parameter
        let mut seen_page = false;
        let mut seen_rows = false;
        pairs.retain(|(k, _)| match k.as_str() {
            PAGE_PARAM => !std::mem::replace(&mut seen_page, true),
            ROWS_PARAM => !std::mem::replace(&mut seen_rows, true),
            _ => true,
        });

        url.query_pairs_mut().clear().extend_pairs(pairs);
        Ok(url.into())
    }

    /// Direct PDF resource for a document
    pub fn direct_resource(&self, key: &str) -> String {
        format!("{}stampPDF/getPDF.jsp?tp=&arnumber={}&ref=", self.base, key)
    }

    /// Landing page hosting the embedded viewer and the download control
    pub fn landing_page(&self, key: &str) -> String {
        format!("{}stamp/stamp.jsp?tp=&arnumber={}", self.base, key)
    }

    /// Canonical abstract page of a document
    pub fn document(&self, key: &str) -> String {
        format!("{}document/{}/", self.base, key)
    }
}
