//! One extraction run from source URL to a populated session folder.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::acquire::{Acquirer, BatchReport};
use crate::archive::Archiver;
use crate::config::HarvestConfig;
use crate::http::HttpClient;
use crate::project::JsonFileStore;
use crate::scrape::{
    HttpScrapeService, MarkupStrategy, ScrapeService, ScrapeStrategy, StrategyKind,
    StructuralStrategy,
};
use crate::session::SessionManager;
use crate::types::{
    AcquiredAsset, Discovery, ExtractionSession, HarvestError, HarvestResult, ItemFailure,
};

/// Result of a successful extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub session: ExtractionSession,
    /// Accepted assets in ordinal order.
    pub assets: Vec<AcquiredAsset>,
    /// Candidates that were skipped, in ordinal order.
    pub failures: Vec<ItemFailure>,
}

/// Wires strategies, acquisition and sessions together from one config.
pub struct Harvester {
    config: HarvestConfig,
    sessions: SessionManager,
    acquirer: Acquirer,
    page_http: HttpClient,
    markup: Arc<dyn ScrapeStrategy>,
    structural: Option<Arc<dyn ScrapeStrategy>>,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> HarvestResult<Self> {
        let page_http = HttpClient::new(&config.user_agent, config.page_timeout)?;
        let asset_http = HttpClient::new(&config.user_agent, config.asset_timeout)?;

        let markup: Arc<dyn ScrapeStrategy> = Arc::new(MarkupStrategy::new(page_http.clone())?);
        let mut harvester = Self {
            sessions: SessionManager::from_config(&config),
            acquirer: Acquirer::new(asset_http, &config.asset_prefix, &config.public_base),
            page_http,
            markup,
            structural: None,
            config,
        };

        if let Some(svc) = harvester.config.scrape_service.clone() {
            let service = HttpScrapeService::new(
                harvester.page_http.clone(),
                svc.endpoint,
                svc.api_key,
                harvester.config.page_timeout,
            );
            harvester = harvester.with_scrape_service(Arc::new(service));
        }
        Ok(harvester)
    }

    /// Enable the structural strategy on top of the given service.
    pub fn with_scrape_service(mut self, service: Arc<dyn ScrapeService>) -> Self {
        self.structural = Some(Arc::new(StructuralStrategy::new(
            service,
            self.page_http.clone(),
            self.config.max_in_flight,
        )));
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn archiver(&self) -> Archiver {
        Archiver::from_config(&self.config, self.sessions.clone())
    }

    pub fn project_store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.config.data_file)
    }

    fn strategy(&self, kind: StrategyKind) -> HarvestResult<&Arc<dyn ScrapeStrategy>> {
        match kind {
            StrategyKind::Markup => Ok(&self.markup),
            StrategyKind::Structural => self.structural.as_ref().ok_or_else(|| {
                HarvestError::Config(
                    "structural extraction needs a scrape service (WEBTOON_SCRAPE_ENDPOINT)"
                        .into(),
                )
            }),
        }
    }

    /// Discover, acquire and persist the images of one page.
    ///
    /// A session folder is only kept when at least one asset was accepted.
    pub async fn extract(
        &self,
        source_url: &str,
        kind: StrategyKind,
    ) -> HarvestResult<ExtractionOutcome> {
        let parsed = url::Url::parse(source_url)
            .map_err(|e| HarvestError::Validation(format!("invalid source url {source_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HarvestError::Validation(format!(
                "unsupported url scheme '{}'",
                parsed.scheme()
            )));
        }

        let strategy = self.strategy(kind)?;
        info!("Extracting {source_url} with {} strategy", strategy.name());

        let discovery = strategy.discover(source_url).await?;
        if discovery.is_empty() {
            return Err(HarvestError::EmptyResult(format!(
                "no images found on {source_url}"
            )));
        }

        let session = self.sessions.create_session()?;
        let report: BatchReport = match discovery {
            Discovery::Candidates(candidates) => {
                self.acquirer
                    .acquire(&candidates, source_url, &session, strategy.acquisition_mode())
                    .await
            }
            Discovery::Fallback(fallback) => self.acquirer.acquire_fallback(fallback, &session).await,
            Discovery::Empty => BatchReport::default(),
        };

        let (assets, failures) = report.into_parts();
        if assets.is_empty() {
            if let Err(e) = self.sessions.remove_session(&session) {
                warn!("Failed to remove empty session {}: {e}", session.folder_path.display());
            }
            return Err(HarvestError::EmptyResult(format!(
                "no downloadable images on {source_url} ({} candidates failed)",
                failures.len()
            )));
        }

        info!(
            "Extraction complete: {} images in {}",
            assets.len(),
            session.folder_path.display()
        );
        Ok(ExtractionOutcome {
            session,
            assets,
            failures,
        })
    }
}
