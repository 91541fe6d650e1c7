//! Page image discovery.
//!
//! Two strategies share the [`ScrapeStrategy`] capability: a markup-pattern
//! strategy that runs regex matchers over raw HTML, and a structural strategy
//! that hands fetch+render to an external scraping service and filters the
//! DOM it returns. Each also tells the pipeline how its candidates should be
//! acquired.

pub mod markup;
pub mod payload;
pub mod structural;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{Discovery, HarvestResult};

pub use markup::{MarkupStrategy, SiteOverride};
pub use payload::{ScrapePayload, ScrapeSnapshot, ScreenshotRef};
pub use structural::{HttpScrapeService, ScrapeService, StructuralStrategy};

/// URL substrings that mark site chrome rather than page art.
pub const BLOCKED_URL_FRAGMENTS: &[&str] =
    &["icon", "logo", "banner", "button", "thumbnail", "avatar"];

/// How a strategy's candidates are downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One request at a time with a fixed pause in between.
    Sequential { delay: Duration },
    /// Up to `max_in_flight` requests at once over the shared pool.
    Concurrent { max_in_flight: usize },
}

/// Which discovery strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    Markup,
    Structural,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "regex" => Ok(StrategyKind::Markup),
            "structural" | "dom" => Ok(StrategyKind::Structural),
            other => Err(format!("unknown strategy '{other}' (expected markup or structural)")),
        }
    }
}

/// A way of turning a page URL into candidate image references.
#[async_trait]
pub trait ScrapeStrategy: Send + Sync {
    /// Discover candidate images on a single page.
    ///
    /// A failed page fetch is an error; a page with no usable images yields
    /// [`Discovery::Empty`].
    async fn discover(&self, source_url: &str) -> HarvestResult<Discovery>;

    /// Acquisition path for this strategy's candidates.
    fn acquisition_mode(&self) -> AcquisitionMode;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// True when the URL's lowercase form contains a blocklisted fragment.
pub fn is_blocked_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    BLOCKED_URL_FRAGMENTS.iter().any(|frag| lower.contains(frag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocklist() {
        assert!(is_blocked_url("https://cdn.x/site-LOGO.png"));
        assert!(is_blocked_url("https://cdn.x/icons/a.png"));
        assert!(is_blocked_url("https://cdn.x/thumbnail/ep1.jpg"));
        assert!(!is_blocked_url("https://cdn.x/chapter1/001.jpg"));
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("markup".parse::<StrategyKind>().unwrap(), StrategyKind::Markup);
        assert_eq!("Structural".parse::<StrategyKind>().unwrap(), StrategyKind::Structural);
        assert!("crawler".parse::<StrategyKind>().is_err());
    }
}
