//! Regex matchers over raw page markup.
//!
//! The page is fetched once and never parsed into a DOM: each matcher runs
//! against the raw HTML, so lazy-load attributes, meta references and inline
//! CSS backgrounds are caught even on malformed markup.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::{is_blocked_url, AcquisitionMode, ScrapeStrategy};
use crate::http::HttpClient;
use crate::types::{CandidateAsset, Discovery, HarvestError, HarvestResult};

/// Pause between sequential downloads for this strategy.
pub const POLITENESS_DELAY: Duration = Duration::from_millis(500);

/// Absolute http(s) image URL with a raster extension, captured as group 1.
const IMAGE_URL: &str = r#"(https?://[^"']+\.(?:jpg|jpeg|png|gif|webp))"#;

fn base_patterns() -> Vec<String> {
    vec![
        format!(r#"<img[^>]+src=["']{IMAGE_URL}["']"#),
        format!(r#"<img[^>]+data-src=["']{IMAGE_URL}["']"#),
        format!(r#"<img[^>]+data-original=["']{IMAGE_URL}["']"#),
        format!(r#"content=["']{IMAGE_URL}["']"#),
        format!(r#"background-image:\s*url\(["']?{IMAGE_URL}["']?\)"#),
    ]
}

/// Extra matchers applied when the page host contains `host_fragment`.
#[derive(Debug, Clone)]
pub struct SiteOverride {
    pub host_fragment: String,
    pub patterns: Vec<String>,
}

impl SiteOverride {
    /// Built-in overrides for reader layouts the generic matchers miss.
    pub fn builtin() -> Vec<SiteOverride> {
        vec![SiteOverride {
            host_fragment: "asuracomic.net".to_string(),
            patterns: vec![
                format!(r#"<div class="page-break[^>]*>.*?<img[^>]+src=["']{IMAGE_URL}["']"#),
                format!(r#"<div class="reading-content[^>]*>.*?<img[^>]+src=["']{IMAGE_URL}["']"#),
            ],
        }]
    }
}

struct CompiledOverride {
    host_fragment: String,
    matchers: Vec<Regex>,
}

/// Discovery by pattern matching over fetched HTML.
pub struct MarkupStrategy {
    http: HttpClient,
    matchers: Vec<Regex>,
    overrides: Vec<CompiledOverride>,
}

impl MarkupStrategy {
    /// Strategy with the standard matchers and built-in site overrides.
    pub fn new(http: HttpClient) -> HarvestResult<Self> {
        Self::with_overrides(http, SiteOverride::builtin())
    }

    /// Strategy with caller-supplied site overrides.
    pub fn with_overrides(http: HttpClient, overrides: Vec<SiteOverride>) -> HarvestResult<Self> {
        let matchers = compile_all(&base_patterns())?;
        let overrides = overrides
            .into_iter()
            .map(|o| {
                Ok(CompiledOverride {
                    matchers: compile_all(&o.patterns)?,
                    host_fragment: o.host_fragment.to_lowercase(),
                })
            })
            .collect::<HarvestResult<Vec<_>>>()?;

        Ok(Self {
            http,
            matchers,
            overrides,
        })
    }

    /// Run every applicable matcher over `html` and build the candidate list.
    pub fn candidates_from_html(&self, html: &str, source_url: &str) -> Vec<CandidateAsset> {
        let host = url::Url::parse(source_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| source_url.to_lowercase());

        let mut matchers: Vec<&Regex> = self.matchers.iter().collect();
        for o in &self.overrides {
            if host.contains(&o.host_fragment) {
                info!("Applying site-specific matchers for {}", o.host_fragment);
                matchers.extend(o.matchers.iter());
            }
        }

        let mut seen = HashSet::new();
        let mut all_urls = Vec::new();
        for re in matchers {
            for caps in re.captures_iter(html) {
                if let Some(m) = caps.get(1) {
                    let url = m.as_str();
                    if seen.insert(url.to_string()) {
                        all_urls.push(url.to_string());
                    }
                }
            }
        }
        info!("Found {} potential image URLs", all_urls.len());

        let candidates: Vec<CandidateAsset> = all_urls
            .into_iter()
            .filter(|u| {
                let blocked = is_blocked_url(u);
                if blocked {
                    debug!("Dropping blocklisted URL {u}");
                }
                !blocked
            })
            .enumerate()
            .map(|(i, u)| CandidateAsset::new(u, i + 1))
            .collect();
        info!("After filtering: {} image URLs", candidates.len());

        candidates
    }
}

#[async_trait]
impl ScrapeStrategy for MarkupStrategy {
    async fn discover(&self, source_url: &str) -> HarvestResult<Discovery> {
        let page = self.http.get_page(source_url).await.map_err(|e| match e {
            HarvestError::Transport(_) => e,
            other => HarvestError::Transport(format!("failed to fetch {source_url}: {other}")),
        })?;
        Ok(Discovery::from_candidates(
            self.candidates_from_html(&page.body, source_url),
        ))
    }

    fn acquisition_mode(&self) -> AcquisitionMode {
        AcquisitionMode::Sequential {
            delay: POLITENESS_DELAY,
        }
    }

    fn name(&self) -> &'static str {
        "markup"
    }
}

fn compile_all(patterns: &[String]) -> HarvestResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| HarvestError::Config(format!("invalid matcher {p}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> MarkupStrategy {
        let http = HttpClient::new("test-agent", Duration::from_secs(5)).unwrap();
        MarkupStrategy::new(http).unwrap()
    }

    fn urls(candidates: &[CandidateAsset]) -> Vec<&str> {
        candidates.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn test_blocklisted_urls_dropped() {
        let html = r#"
            <img src="https://cdn.example.com/ch1/001.jpg">
            <img src="https://cdn.example.com/site-icon.png">
            <img src="https://cdn.example.com/ch1/002.jpg">
            <img src="https://cdn.example.com/logo.png">
            <img src="https://cdn.example.com/ch1/003.jpg">
        "#;
        let found = strategy().candidates_from_html(html, "https://example.com/ch1");
        assert_eq!(
            urls(&found),
            vec![
                "https://cdn.example.com/ch1/001.jpg",
                "https://cdn.example.com/ch1/002.jpg",
                "https://cdn.example.com/ch1/003.jpg",
            ]
        );
        let ordinals: Vec<usize> = found.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_repeated_urls_appear_once() {
        let html = r#"
            <meta property="og:image" content="https://cdn.example.com/ch1/001.jpg">
            <img src="https://cdn.example.com/ch1/001.jpg">
            <img class="lazy" data-src="https://cdn.example.com/ch1/001.jpg">
            <img src="https://cdn.example.com/ch1/002.png">
        "#;
        let found = strategy().candidates_from_html(html, "https://example.com/ch1");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_lazy_and_css_sources() {
        let html = r#"
            <img class="lazy" data-original="https://cdn.example.com/p/01.webp">
            <div style="background-image: url('https://cdn.example.com/p/bg.gif')"></div>
            <img src="/relative/ignored.jpg">
            <img src="https://cdn.example.com/p/not-an-image.svg">
        "#;
        let found = strategy().candidates_from_html(html, "https://example.com/p");
        assert_eq!(
            urls(&found),
            vec!["https://cdn.example.com/p/01.webp", "https://cdn.example.com/p/bg.gif"]
        );
    }

    #[test]
    fn test_site_override_only_for_matching_host() {
        let overrides = vec![SiteOverride {
            host_fragment: "reader.test".to_string(),
            patterns: vec![format!(r#"data-page=["']{IMAGE_URL}["']"#)],
        }];
        let http = HttpClient::new("test-agent", Duration::from_secs(5)).unwrap();
        let s = MarkupStrategy::with_overrides(http, overrides).unwrap();
        let html = r#"<div data-page="https://cdn.reader.test/1.jpg"></div>"#;

        assert_eq!(s.candidates_from_html(html, "https://www.reader.test/ch/1").len(), 1);
        assert!(s.candidates_from_html(html, "https://other.test/ch/1").is_empty());
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let http = HttpClient::new("test-agent", Duration::from_secs(5)).unwrap();
        let bad = vec![SiteOverride {
            host_fragment: "x".to_string(),
            patterns: vec!["(unclosed".to_string()],
        }];
        assert!(matches!(
            MarkupStrategy::with_overrides(http, bad),
            Err(HarvestError::Config(_))
        ));
    }

    #[test]
    fn test_sequential_mode() {
        assert_eq!(
            strategy().acquisition_mode(),
            AcquisitionMode::Sequential {
                delay: POLITENESS_DELAY
            }
        );
    }
}
