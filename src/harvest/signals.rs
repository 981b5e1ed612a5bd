//! Access-restriction and rate-limit detection on loaded pages

use crate::config::SignalConfig;

/// What a loaded page says about the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// The item is outside the subscription; carries the matched phrase
    AccessDenied(String),
    /// The library is throttling the session; carries the matched phrase
    RateLimited(String),
}

/// Phrases the denied-redirect URL must be paired with
const DENIED_CONTEXT: &[&str] = &["subscription", "purchase", "access"];

#[derive(Debug, Clone)]
pub struct SignalMatcher {
    access_denied: Vec<String>,
    rate_limited: Vec<String>,
}

impl SignalMatcher {
    pub fn new(config: &SignalConfig) -> Self {
        let lower = |phrases: &[String]| {
            phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            access_denied: lower(&config.access_denied),
            rate_limited: lower(&config.rate_limited),
        }
    }

    /// Classifies a page by its visible text and URL
    ///
    /// Access restrictions take precedence over rate limiting.
    pub fn classify(&self, page_text: &str, page_url: &str) -> Option<PageSignal> {
        let text = page_text.to_lowercase();

        if let Some(phrase) = self.access_denied.iter().find(|p| text.contains(p.as_str())) {
            return Some(PageSignal::AccessDenied(phrase.clone()));
        }

        if page_url.to_lowercase().contains("denied=") {
            if let Some(context) = DENIED_CONTEXT.iter().find(|c| text.contains(*c)) {
                return Some(PageSignal::AccessDenied(format!("denied redirect ({})", context)));
            }
        }

        self.rate_limited
            .iter()
            .find(|p| text.contains(p.as_str()))
            .map(|p| PageSignal::RateLimited(p.clone()))
    }
}
