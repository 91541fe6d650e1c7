//! webtoon-harvest: pull comic page images off a web page and bundle them with project state.

pub mod acquire;
pub mod archive;
pub mod config;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod project;
pub mod scrape;
pub mod session;
pub mod types;
pub mod validate;

pub use acquire::{Acquirer, BatchReport};
pub use archive::{pack, Archiver, RestoreReport};
pub use config::{HarvestConfig, ScrapeServiceConfig};
pub use pipeline::{ExtractionOutcome, Harvester};
pub use project::{JsonFileStore, ProjectState, ProjectStore};
pub use scrape::{AcquisitionMode, ScrapeService, ScrapeStrategy, StrategyKind};
pub use session::SessionManager;
pub use types::*;
