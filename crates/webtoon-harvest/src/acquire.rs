//! Download, validate, normalize and persist candidate images.
//!
//! Every candidate produces exactly one [`ItemOutcome`]. Failures never abort
//! the batch; they are collected next to the successes and only aggregated at
//! the [`BatchReport`] boundary. Outcomes are always reported in ordinal
//! order, whatever order the network completed them in.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::http::HttpClient;
use crate::normalize::normalize;
use crate::scrape::AcquisitionMode;
use crate::types::{
    AcquiredAsset, CandidateAsset, ExtractionSession, FailureKind, FallbackAsset, HarvestError,
    HarvestResult, ItemFailure, ItemOutcome,
};
use crate::validate::{
    asset_filename, canonical_extension, filename_collides, is_real_image, ImageKind,
};

/// Outcomes of one acquisition batch, ordered by ordinal.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    fn from_unordered(mut outcomes: Vec<ItemOutcome>) -> Self {
        outcomes.sort_by_key(outcome_ordinal);
        Self { outcomes }
    }

    pub fn accepted(&self) -> impl Iterator<Item = &AcquiredAsset> {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().count()
    }

    /// Split into accepted assets and failures, both in ordinal order.
    pub fn into_parts(self) -> (Vec<AcquiredAsset>, Vec<ItemFailure>) {
        let mut assets = Vec::new();
        let mut failures = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                Ok(a) => assets.push(a),
                Err(f) => failures.push(f),
            }
        }
        (assets, failures)
    }

    /// Accepted assets, or `EmptyResult` when nothing made it through.
    pub fn into_assets(self) -> HarvestResult<Vec<AcquiredAsset>> {
        let (assets, failures) = self.into_parts();
        if assets.is_empty() {
            return Err(HarvestError::EmptyResult(format!(
                "no downloadable images ({} candidates failed)",
                failures.len()
            )));
        }
        Ok(assets)
    }
}

fn outcome_ordinal(outcome: &ItemOutcome) -> usize {
    match outcome {
        Ok(a) => a.ordinal,
        Err(f) => f.ordinal,
    }
}

/// Fetches candidates into a session folder.
#[derive(Clone)]
pub struct Acquirer {
    http: HttpClient,
    asset_prefix: String,
    public_base: String,
}

impl Acquirer {
    pub fn new(
        http: HttpClient,
        asset_prefix: impl Into<String>,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            asset_prefix: asset_prefix.into(),
            public_base: public_base.into(),
        }
    }

    /// Acquire every candidate along the given path.
    ///
    /// `referer` is the page the candidates were discovered on.
    pub async fn acquire(
        &self,
        candidates: &[CandidateAsset],
        referer: &str,
        session: &ExtractionSession,
        mode: AcquisitionMode,
    ) -> BatchReport {
        info!(
            "Acquiring {} candidates into {} ({:?})",
            candidates.len(),
            session.folder_path.display(),
            mode
        );

        let outcomes = match mode {
            AcquisitionMode::Sequential { delay } => {
                let mut outcomes = Vec::with_capacity(candidates.len());
                for (i, candidate) in candidates.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(delay).await;
                    }
                    outcomes.push(self.acquire_one(candidate, referer, session).await);
                }
                outcomes
            }
            AcquisitionMode::Concurrent { max_in_flight } => {
                stream::iter(candidates.iter())
                    .map(|candidate| self.acquire_one(candidate, referer, session))
                    .buffer_unordered(max_in_flight.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };

        let report = BatchReport::from_unordered(outcomes);
        info!(
            "Accepted {} of {} candidates",
            report.accepted_count(),
            candidates.len()
        );
        report
    }

    /// Persist a single fallback asset (a page screenshot) as ordinal 1.
    pub async fn acquire_fallback(
        &self,
        fallback: FallbackAsset,
        session: &ExtractionSession,
    ) -> BatchReport {
        let content_type = fallback
            .content_type
            .or_else(|| ImageKind::sniff(&fallback.bytes).map(|k| k.mime().to_string()))
            .unwrap_or_default();
        let outcome = self
            .store(fallback.bytes, &content_type, 1, "screenshot", session)
            .await;
        BatchReport::from_unordered(vec![outcome])
    }

    async fn acquire_one(
        &self,
        candidate: &CandidateAsset,
        referer: &str,
        session: &ExtractionSession,
    ) -> ItemOutcome {
        let fail = |kind: FailureKind, reason: String| {
            warn!("Error downloading image {}: {reason}", candidate.url);
            ItemFailure {
                ordinal: candidate.ordinal,
                url: candidate.url.clone(),
                kind,
                reason,
            }
        };

        let resp = self
            .http
            .get_image(&candidate.url, referer)
            .await
            .map_err(|e| fail(FailureKind::Transport, e.to_string()))?;

        if !resp.is_success() {
            return Err(fail(
                FailureKind::Transport,
                format!("status {}", resp.status),
            ));
        }

        self.store(
            resp.body,
            &resp.content_type,
            candidate.ordinal,
            &candidate.url,
            session,
        )
        .await
    }

    /// Validate, normalize and write one payload.
    async fn store(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        ordinal: usize,
        url: &str,
        session: &ExtractionSession,
    ) -> ItemOutcome {
        let fail = |kind: FailureKind, reason: String| {
            warn!("Rejected image {url}: {reason}");
            ItemFailure {
                ordinal,
                url: url.to_string(),
                kind,
                reason,
            }
        };

        if !is_real_image(content_type, &bytes) {
            return Err(fail(
                FailureKind::Validation,
                format!("not a valid image (content-type '{content_type}')"),
            ));
        }

        let kind = ImageKind::resolve(content_type, &bytes);
        let Some(extension) = canonical_extension(kind) else {
            return Err(fail(
                FailureKind::Validation,
                format!("unsupported image format (content-type '{content_type}')"),
            ));
        };
        let filename = asset_filename(&self.asset_prefix, ordinal, extension);
        if filename_collides(&session.folder_path, &filename) {
            return Err(fail(
                FailureKind::Validation,
                format!("{filename} already exists in session"),
            ));
        }

        let stored = match tokio::task::spawn_blocking(move || normalize(bytes, kind)).await {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => return Err(fail(FailureKind::FormatConversion, e.to_string())),
            Err(e) => {
                return Err(fail(
                    FailureKind::FormatConversion,
                    format!("normalizer task failed: {e}"),
                ))
            }
        };

        let path = session.folder_path.join(&filename);
        tokio::fs::write(&path, &stored)
            .await
            .map_err(|e| fail(FailureKind::Io, format!("write {}: {e}", path.display())))?;

        info!("Successfully saved image: {filename}");
        Ok(AcquiredAsset {
            public_ref: format!(
                "{}/{}/{}",
                self.public_base.trim_end_matches('/'),
                session.folder_name(),
                filename
            ),
            filename,
            stored_path: path,
            ordinal,
        })
    }
}
