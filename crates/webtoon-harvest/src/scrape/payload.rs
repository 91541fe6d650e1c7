//! Shape-tolerant decoding of scraping-service replies.
//!
//! Services disagree on where they put the rendered DOM and screenshot: some
//! answer with a flat object, some wrap it in `data`/`result`, some return a
//! bare list of image URLs. The reply is first classified into a
//! [`ScrapePayload`] variant, then an ordered set of rules pulls out what the
//! structural strategy needs.

use base64::Engine;
use serde_json::{Map, Value};

/// Keys that may hold the rendered page HTML, in preference order.
const HTML_KEYS: &[&str] = &["rawHtml", "html", "dom", "domSnapshot"];
/// Keys that may hold the full-page screenshot.
const SCREENSHOT_KEYS: &[&str] = &["screenshot", "fullPageScreenshot", "screenshotUrl"];
/// Keys that may hold an already-extracted image URL list.
const IMAGE_LIST_KEYS: &[&str] = &["images", "imageUrls", "image_urls"];
/// Wrapper keys some services nest the real payload under.
const WRAPPER_KEYS: &[&str] = &["data", "result", "results", "page"];

const MAX_NESTING: usize = 4;

/// A scrape reply classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapePayload {
    /// A bare list of strings (image URLs).
    List(Vec<String>),
    /// A single object carrying the fields directly.
    Object(Map<String, Value>),
    /// An object whose useful content sits under a wrapper key.
    Nested(Map<String, Value>),
}

/// Screenshot as delivered by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenshotRef {
    Inline(Vec<u8>),
    Remote(String),
}

/// What the structural strategy can work with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeSnapshot {
    pub html: Option<String>,
    pub screenshot: Option<ScreenshotRef>,
    /// Image URLs supplied directly by the service.
    pub image_urls: Vec<String>,
}

impl ScrapeSnapshot {
    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.screenshot.is_none() && self.image_urls.is_empty()
    }
}

impl ScrapePayload {
    /// Classify a raw JSON reply. Returns `None` for scalars and `null`.
    pub fn classify(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                if let Some(Value::Object(first)) = items.iter().find(|v| v.is_object()).cloned()
                {
                    return Some(Self::from_object(first));
                }
                let urls = items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                Some(ScrapePayload::List(urls))
            }
            Value::Object(map) => Some(Self::from_object(map)),
            _ => None,
        }
    }

    fn from_object(map: Map<String, Value>) -> Self {
        let has_direct = HTML_KEYS
            .iter()
            .chain(SCREENSHOT_KEYS)
            .chain(IMAGE_LIST_KEYS)
            .any(|k| map.contains_key(*k));
        let has_wrapper = WRAPPER_KEYS
            .iter()
            .any(|k| map.get(*k).is_some_and(|v| v.is_object() || v.is_array()));

        if !has_direct && has_wrapper {
            ScrapePayload::Nested(map)
        } else {
            ScrapePayload::Object(map)
        }
    }

    /// Apply the extraction rules in order until one yields content.
    pub fn into_snapshot(self) -> ScrapeSnapshot {
        self.extract(0)
    }

    fn extract(self, depth: usize) -> ScrapeSnapshot {
        match self {
            ScrapePayload::List(urls) => ScrapeSnapshot {
                image_urls: urls,
                ..Default::default()
            },
            ScrapePayload::Object(map) => snapshot_from_object(&map),
            ScrapePayload::Nested(map) => {
                if depth >= MAX_NESTING {
                    return ScrapeSnapshot::default();
                }
                for key in WRAPPER_KEYS {
                    let Some(inner) = map.get(*key).cloned() else {
                        continue;
                    };
                    if let Some(payload) = ScrapePayload::classify(inner) {
                        let snapshot = payload.extract(depth + 1);
                        if !snapshot.is_empty() {
                            return snapshot;
                        }
                    }
                }
                ScrapeSnapshot::default()
            }
        }
    }
}

fn snapshot_from_object(map: &Map<String, Value>) -> ScrapeSnapshot {
    let html = HTML_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);

    let screenshot = SCREENSHOT_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .and_then(parse_screenshot);

    let image_urls = IMAGE_LIST_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    ScrapeSnapshot {
        html,
        screenshot,
        image_urls,
    }
}

fn parse_screenshot(raw: &str) -> Option<ScreenshotRef> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(ScreenshotRef::Remote(raw.to_string()));
    }
    let data = match raw.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, d)| d)?,
        None => raw,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .ok()
        .filter(|b| !b.is_empty())
        .map(ScreenshotRef::Inline)
}
