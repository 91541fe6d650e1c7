//! Configuration loading and resolution.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_UPLOADS_ROOT: &str = "static/uploads";
const DEFAULT_DATA_FILE: &str = "data/project_data.json";
const DEFAULT_PUBLIC_BASE: &str = "/static/uploads";
const DEFAULT_PAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ASSET_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Chrome-like user-agent sent with every outbound request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Connection details for the external render-and-scrape service.
#[derive(Debug, Clone)]
pub struct ScrapeServiceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

/// Runtime settings for extraction, sessions, and archives.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub uploads_root: PathBuf,
    pub session_prefix: String,
    pub asset_prefix: String,
    /// Public URL prefix under which the uploads root is served.
    pub public_base: String,
    pub data_file: PathBuf,
    pub page_timeout: Duration,
    pub asset_timeout: Duration,
    /// Cap on simultaneous downloads along the concurrent acquisition path.
    pub max_in_flight: usize,
    pub user_agent: String,
    pub scrape_service: Option<ScrapeServiceConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_ROOT),
            session_prefix: "webtoon".to_string(),
            asset_prefix: "image".to_string(),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            page_timeout: Duration::from_millis(DEFAULT_PAGE_TIMEOUT_MS),
            asset_timeout: Duration::from_millis(DEFAULT_ASSET_TIMEOUT_MS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            scrape_service: None,
        }
    }
}

impl HarvestConfig {
    /// Defaults overridden by `WEBTOON_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let scrape_service = read_env_string("WEBTOON_SCRAPE_ENDPOINT").map(|endpoint| {
            ScrapeServiceConfig {
                endpoint,
                api_key: read_env_string("WEBTOON_SCRAPE_API_KEY"),
            }
        });

        Self {
            uploads_root: read_env_string("WEBTOON_UPLOADS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_root),
            data_file: read_env_string("WEBTOON_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_file),
            public_base: read_env_string("WEBTOON_PUBLIC_BASE").unwrap_or(defaults.public_base),
            page_timeout: Duration::from_millis(
                read_env_u64("WEBTOON_PAGE_TIMEOUT_MS", DEFAULT_PAGE_TIMEOUT_MS).max(1),
            ),
            asset_timeout: Duration::from_millis(
                read_env_u64("WEBTOON_ASSET_TIMEOUT_MS", DEFAULT_ASSET_TIMEOUT_MS).max(1),
            ),
            max_in_flight: read_env_usize("WEBTOON_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT).max(1),
            scrape_service,
            ..defaults
        }
    }

    /// Point both the uploads root and the project file below `base`.
    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            uploads_root: base.join(DEFAULT_UPLOADS_ROOT),
            data_file: base.join(DEFAULT_DATA_FILE),
            ..Self::default()
        }
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    read_env_string(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_usize(name: &str, default: usize) -> usize {
    read_env_string(name)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HarvestConfig::default();
        assert_eq!(cfg.uploads_root, PathBuf::from("static/uploads"));
        assert_eq!(cfg.session_prefix, "webtoon");
        assert_eq!(cfg.asset_prefix, "image");
        assert_eq!(cfg.max_in_flight, 8);
        assert!(cfg.scrape_service.is_none());
    }

    #[test]
    fn test_rooted_at() {
        let cfg = HarvestConfig::rooted_at("/tmp/x");
        assert_eq!(cfg.uploads_root, PathBuf::from("/tmp/x/static/uploads"));
        assert_eq!(cfg.data_file, PathBuf::from("/tmp/x/data/project_data.json"));
    }
}
