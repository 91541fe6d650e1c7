//! Discovery through an external render-and-scrape service.
//!
//! The service fetches and renders the page and returns a DOM snapshot plus a
//! full-page screenshot. Image nodes are pulled from the snapshot and filtered
//! against page chrome: comment threads, profile blocks, share widgets, social
//! icons and vector art. When nothing survives, the screenshot stands in as a
//! single fallback asset.
//!
//! DOM filtering is synchronous because `scraper::Html` is `!Send`; the
//! document never lives across an await point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::payload::{ScrapePayload, ScrapeSnapshot, ScreenshotRef};
use super::{AcquisitionMode, ScrapeStrategy};
use crate::http::HttpClient;
use crate::types::{CandidateAsset, Discovery, FallbackAsset, HarvestError, HarvestResult};

/// Image source attributes, first non-empty one wins per node.
const SOURCE_ATTRIBUTES: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

/// Containers whose images are never page art.
const NON_CONTENT_CONTAINERS: &str = "[id*='comment'] img, [class*='comment'] img, \
     #disqus_thread img, [class*='profile'] img, [class*='avatar'] img, \
     [class*='author'] img, [class*='share'] img, [class*='social'] img";

const SOCIAL_ICON_PATTERNS: &[&str] = &[
    "facebook", "twitter", "x.com/", "instagram", "pinterest", "reddit", "whatsapp", "tiktok",
    "discord", "telegram", "tumblr", "/share", "social",
];

const PROFILE_KEYWORDS: &[&str] = &["avatar", "profile", "gravatar", "userpic", "author"];

const VECTOR_EXTENSIONS: &[&str] = &[".svg", ".svgz"];

const TINY_DIMENSION: u32 = 50;
const SMALL_DIMENSION: u32 = 100;

/// A render-and-scrape backend.
#[async_trait]
pub trait ScrapeService: Send + Sync {
    /// Render `url` and return its DOM snapshot and screenshot.
    async fn scrape(&self, url: &str) -> HarvestResult<ScrapeSnapshot>;
}

/// JSON-over-HTTP scraping service client.
pub struct HttpScrapeService {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpScrapeService {
    pub fn new(
        http: HttpClient,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl ScrapeService for HttpScrapeService {
    async fn scrape(&self, url: &str) -> HarvestResult<ScrapeSnapshot> {
        let request = json!({
            "url": url,
            "formats": ["rawHtml", "screenshot@fullPage"],
        });

        let reply = self
            .http
            .post_json(&self.endpoint, &request, self.api_key.as_deref(), self.timeout)
            .await
            .map_err(|e| match e {
                HarvestError::Transport(_) => e,
                other => HarvestError::Transport(format!("scrape service call failed: {other}")),
            })?;

        if reply.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            return Err(HarvestError::Transport(format!(
                "scrape service reported failure: {reason}"
            )));
        }

        let snapshot = ScrapePayload::classify(reply)
            .map(ScrapePayload::into_snapshot)
            .ok_or_else(|| HarvestError::Transport("unrecognized scrape service reply".into()))?;
        // A reply with nothing in it is a failed scrape, not an empty page.
        if snapshot.is_empty() {
            return Err(HarvestError::Transport(
                "scrape service returned no page content".into(),
            ));
        }
        Ok(snapshot)
    }
}

/// An `<img>` node reduced to what the filters look at.
#[derive(Debug, Clone)]
struct ImageNode {
    url: String,
    width: u32,
    height: u32,
    alt: Option<String>,
    class: Option<String>,
}

/// Discovery by delegating render to a [`ScrapeService`].
pub struct StructuralStrategy {
    service: Arc<dyn ScrapeService>,
    http: HttpClient,
    max_in_flight: usize,
}

impl StructuralStrategy {
    /// `http` is only used to fetch a screenshot the service returns by URL.
    pub fn new(service: Arc<dyn ScrapeService>, http: HttpClient, max_in_flight: usize) -> Self {
        Self {
            service,
            http,
            max_in_flight: max_in_flight.max(1),
        }
    }

    async fn resolve_screenshot(
        &self,
        shot: ScreenshotRef,
        source_url: &str,
    ) -> Option<FallbackAsset> {
        match shot {
            ScreenshotRef::Inline(bytes) => Some(FallbackAsset {
                bytes,
                content_type: None,
            }),
            ScreenshotRef::Remote(url) => match self.http.get_image(&url, source_url).await {
                Ok(resp) if resp.is_success() => Some(FallbackAsset {
                    bytes: resp.body,
                    content_type: Some(resp.content_type).filter(|ct| !ct.is_empty()),
                }),
                Ok(resp) => {
                    warn!("Screenshot fetch returned status {}", resp.status);
                    None
                }
                Err(e) => {
                    warn!("Screenshot fetch failed: {e}");
                    None
                }
            },
        }
    }
}

#[async_trait]
impl ScrapeStrategy for StructuralStrategy {
    async fn discover(&self, source_url: &str) -> HarvestResult<Discovery> {
        let snapshot = self.service.scrape(source_url).await?;

        let candidates = match &snapshot.html {
            Some(html) => candidates_from_dom(html, source_url),
            None => candidates_from_urls(&snapshot.image_urls, source_url),
        };

        if !candidates.is_empty() {
            return Ok(Discovery::Candidates(candidates));
        }

        if let Some(shot) = snapshot.screenshot {
            info!("No candidates survived filtering, using page screenshot");
            if let Some(fallback) = self.resolve_screenshot(shot, source_url).await {
                return Ok(Discovery::Fallback(fallback));
            }
        }

        Ok(Discovery::Empty)
    }

    fn acquisition_mode(&self) -> AcquisitionMode {
        AcquisitionMode::Concurrent {
            max_in_flight: self.max_in_flight,
        }
    }

    fn name(&self) -> &'static str {
        "structural"
    }
}

/// Filter the image nodes of a DOM snapshot into ordered candidates.
pub fn candidates_from_dom(html: &str, page_url: &str) -> Vec<CandidateAsset> {
    let document = Html::parse_document(html);
    let base = url::Url::parse(page_url).ok();

    let excluded: HashSet<String> = match Selector::parse(NON_CONTENT_CONTAINERS) {
        Ok(sel) => document
            .select(&sel)
            .filter_map(|el| node_url(&el, base.as_ref()))
            .collect(),
        Err(_) => HashSet::new(),
    };
    debug!("{} image URLs inside non-content containers", excluded.len());

    let Ok(img_sel) = Selector::parse("img") else {
        return Vec::new();
    };

    let nodes: Vec<ImageNode> = document
        .select(&img_sel)
        .filter_map(|el| {
            let url = node_url(&el, base.as_ref())?;
            let attr = |name: &str| el.value().attr(name).map(str::to_string);
            Some(ImageNode {
                url,
                width: parse_dimension(el.value().attr("width")),
                height: parse_dimension(el.value().attr("height")),
                alt: attr("alt"),
                class: attr("class"),
            })
        })
        .collect();

    finalize(nodes, &excluded)
}

/// Candidates from a URL list supplied by the service; dimensions are unknown.
pub fn candidates_from_urls(urls: &[String], page_url: &str) -> Vec<CandidateAsset> {
    let base = url::Url::parse(page_url).ok();
    let nodes = urls
        .iter()
        .filter_map(|raw| resolve(raw, base.as_ref()))
        .map(|url| ImageNode {
            url,
            width: 0,
            height: 0,
            alt: None,
            class: None,
        })
        .collect();
    finalize(nodes, &HashSet::new())
}

fn finalize(nodes: Vec<ImageNode>, excluded: &HashSet<String>) -> Vec<CandidateAsset> {
    let total = nodes.len();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for node in nodes {
        if let Some(reason) = drop_reason(&node, excluded) {
            debug!("Dropping {} ({reason})", node.url);
            continue;
        }
        if !seen.insert(node.url.clone()) {
            continue;
        }
        candidates.push(CandidateAsset {
            ordinal: candidates.len() + 1,
            hint_width: Some(node.width).filter(|w| *w > 0),
            hint_height: Some(node.height).filter(|h| *h > 0),
            url: node.url,
            alt_text: node.alt,
            class_hint: node.class,
        });
    }

    info!("Kept {} of {} image nodes", candidates.len(), total);
    candidates
}

fn drop_reason(node: &ImageNode, excluded: &HashSet<String>) -> Option<&'static str> {
    let url = node.url.to_lowercase();
    let alt = node.alt.as_deref().unwrap_or("").to_lowercase();

    if excluded.contains(&node.url) {
        return Some("non-content container");
    }

    let tiny = node.width < TINY_DIMENSION || node.height < TINY_DIMENSION;
    if tiny && SOCIAL_ICON_PATTERNS.iter().any(|p| url.contains(p)) {
        return Some("social icon");
    }

    let small = node.width < SMALL_DIMENSION && node.height < SMALL_DIMENSION;
    let profile_like = PROFILE_KEYWORDS
        .iter()
        .any(|k| url.contains(k) || alt.contains(k));
    if small && profile_like {
        return Some("profile image");
    }

    let path = url.split(['?', '#']).next().unwrap_or("");
    if VECTOR_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Some("vector image");
    }

    None
}

fn node_url(el: &ElementRef<'_>, base: Option<&url::Url>) -> Option<String> {
    SOURCE_ATTRIBUTES.iter().find_map(|attr| {
        let raw = el.value().attr(attr)?.trim();
        if raw.is_empty() || raw.starts_with("data:") {
            return None;
        }
        resolve(raw, base)
    })
}

fn resolve(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let parsed = match base {
        Some(b) => b.join(raw).ok()?,
        None => url::Url::parse(raw).ok()?,
    };
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

fn parse_dimension(raw: Option<&str>) -> u32 {
    raw.map(|s| s.trim().trim_end_matches("px"))
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://reader.test/series/ep-1";

    fn urls(candidates: &[CandidateAsset]) -> Vec<&str> {
        candidates.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn test_filters_chrome_and_keeps_order() {
        let html = r##"
            <html><body>
              <div class="viewer">
                <img data-src="/img/ep1/001.jpg" src="data:image/gif;base64,R0lG" width="800" height="1200">
                <img src="https://cdn.reader.test/img/ep1/002.jpg" width="800" height="1200">
                <img src="/img/logo.svg" width="200" height="60">
                <img src="https://cdn.reader.test/img/ep1/003.jpg">
              </div>
              <a href="#"><img src="https://static.facebook.com/share.png" width="24" height="24"></a>
              <img src="/u/avatar_42.jpg" alt="avatar" width="64" height="64">
              <section id="comments">
                <img src="/img/commenter.jpg" width="400" height="400">
              </section>
              <img src="/img/commenter.jpg" width="400" height="400">
            </body></html>
        "##;

        let found = candidates_from_dom(html, PAGE);
        assert_eq!(
            urls(&found),
            vec![
                "https://reader.test/img/ep1/001.jpg",
                "https://cdn.reader.test/img/ep1/002.jpg",
                "https://cdn.reader.test/img/ep1/003.jpg",
            ]
        );
        assert_eq!(found[0].ordinal, 1);
        assert_eq!(found[2].ordinal, 3);
        assert_eq!(found[0].hint_width, Some(800));
        assert_eq!(found[2].hint_width, None);
    }

    #[test]
    fn test_large_social_image_kept() {
        let html = r#"<img src="https://cdn.test/pinterest-share-art.jpg" width="900" height="1400">"#;
        assert_eq!(candidates_from_dom(html, PAGE).len(), 1);
    }

    #[test]
    fn test_profile_keyword_in_alt() {
        let html = r#"
            <img src="https://cdn.test/u/42.jpg" alt="Profile picture" width="80" height="80">
            <img src="https://cdn.test/p/01.jpg" alt="Profile of the hero" width="800" height="1200">
        "#;
        assert_eq!(urls(&candidates_from_dom(html, PAGE)), vec!["https://cdn.test/p/01.jpg"]);
    }

    #[test]
    fn test_unparseable_dimensions_default_to_zero() {
        assert_eq!(parse_dimension(Some("auto")), 0);
        assert_eq!(parse_dimension(Some("640px")), 640);
        assert_eq!(parse_dimension(None), 0);
    }

    #[test]
    fn test_url_list_payload() {
        let list = vec![
            "/p/01.jpg".to_string(),
            "/p/01.jpg".to_string(),
            "/p/diagram.svg?v=2".to_string(),
            "/p/02.png".to_string(),
        ];
        assert_eq!(
            urls(&candidates_from_urls(&list, PAGE)),
            vec!["https://reader.test/p/01.jpg", "https://reader.test/p/02.png"]
        );
    }

    struct FixedService(ScrapeSnapshot);

    #[async_trait]
    impl ScrapeService for FixedService {
        async fn scrape(&self, _url: &str) -> HarvestResult<ScrapeSnapshot> {
            Ok(self.0.clone())
        }
    }

    struct DownService;

    #[async_trait]
    impl ScrapeService for DownService {
        async fn scrape(&self, _url: &str) -> HarvestResult<ScrapeSnapshot> {
            Err(HarvestError::Transport("connection refused".into()))
        }
    }

    fn strategy(service: Arc<dyn ScrapeService>) -> StructuralStrategy {
        let http = HttpClient::new("test-agent", Duration::from_secs(5)).unwrap();
        StructuralStrategy::new(service, http, 4)
    }

    #[tokio::test]
    async fn test_screenshot_fallback_when_nothing_survives() {
        let snapshot = ScrapeSnapshot {
            html: Some(r#"<img src="/logo.svg">"#.to_string()),
            screenshot: Some(ScreenshotRef::Inline(vec![0x89, b'P', b'N', b'G'])),
            image_urls: Vec::new(),
        };
        let discovery = strategy(Arc::new(FixedService(snapshot)))
            .discover(PAGE)
            .await
            .unwrap();
        match discovery {
            Discovery::Fallback(f) => assert_eq!(f.bytes, vec![0x89, b'P', b'N', b'G']),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_without_screenshot() {
        let snapshot = ScrapeSnapshot {
            html: Some("<p>no art here</p>".to_string()),
            ..Default::default()
        };
        let discovery = strategy(Arc::new(FixedService(snapshot)))
            .discover(PAGE)
            .await
            .unwrap();
        assert!(discovery.is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_is_transport_error() {
        let err = strategy(Arc::new(DownService)).discover(PAGE).await.unwrap_err();
        assert!(matches!(err, HarvestError::Transport(_)));
    }

    #[test]
    fn test_concurrent_mode() {
        let s = strategy(Arc::new(DownService));
        assert_eq!(
            s.acquisition_mode(),
            AcquisitionMode::Concurrent { max_in_flight: 4 }
        );
    }
}
