//! Shelfsheet ingestion pipeline.
//!
//! Ties the blob store and the metadata store together: media in a submitted
//! sheet is validated and uploaded, the aggregate is written, and blobs the
//! sheet stops referencing are deleted in the background.

pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod reclaimer;
pub mod service;

pub use error::{NormalizeError, PipelineError, PipelineResult};
pub use normalizer::{MediaNormalizer, Normalized};
pub use reclaimer::{OrphanBlobReclaimer, ReclaimHandle, ReclaimReport};
pub use service::SheetService;

use shelfsheet_core::config::AppConfig;

/// Build a [`SheetService`] with the backends named in `config`.
pub async fn from_config(config: &AppConfig) -> PipelineResult<SheetService> {
    config.validate().map_err(PipelineError::Config)?;

    let blobs = shelfsheet_storage::from_config(&config.storage)
        .await
        .map_err(|e| PipelineError::Config(format!("failed to initialize storage: {e}")))?;
    tracing::info!(backend = blobs.backend_name(), "blob store ready");

    let metadata = shelfsheet_metadata::from_config(&config.metadata).await?;

    let allowlist = config.media.allowlist(&config.storage);
    let normalizer = MediaNormalizer::new(
        blobs.clone(),
        config.media.validator(),
        allowlist.clone(),
        config.media.path_prefix.clone(),
    );
    let reclaimer = OrphanBlobReclaimer::new(blobs, allowlist);

    Ok(SheetService::new(metadata, normalizer, reclaimer))
}
