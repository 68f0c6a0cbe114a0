//! Sheet save, read and delete orchestration.
//!
//! A save normalizes media first, then writes the aggregate in one
//! transaction. Blobs that end up unreferenced, whether because the write
//! failed or because the new version dropped them, are handed to the
//! reclaimer once the outcome is known. Finished reclaims are reaped each
//! time a new one is scheduled.

use crate::error::{NormalizeError, PipelineError, PipelineResult};
use crate::metrics;
use crate::normalizer::{MediaNormalizer, Normalized};
use crate::reclaimer::{OrphanBlobReclaimer, ReclaimHandle, ReclaimReport};
use shelfsheet_core::Sheet;
use shelfsheet_metadata::{
    ManufacturerRepo, ManufacturerRow, MetadataStore, Page, SheetPage, SheetRepo,
};
use std::sync::{Arc, Mutex, MutexGuard};
use time::{Duration, OffsetDateTime};
use tracing::instrument;
use uuid::Uuid;

/// Entry point for every sheet operation.
pub struct SheetService {
    metadata: Arc<dyn MetadataStore>,
    normalizer: MediaNormalizer,
    reclaimer: OrphanBlobReclaimer,
    pending: Mutex<PendingReclaims>,
}

/// Reclaims still running, plus the totals of those already reaped.
#[derive(Default)]
struct PendingReclaims {
    handles: Vec<ReclaimHandle>,
    settled: ReclaimReport,
}

impl PendingReclaims {
    /// Drop finished handles, folding their reports into `settled`.
    fn reap(&mut self) {
        let settled = &mut self.settled;
        self.handles.retain_mut(|handle| match handle.try_report() {
            Some(report) => {
                *settled = settled.merge(report);
                false
            }
            None => true,
        });
    }
}

impl SheetService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        normalizer: MediaNormalizer,
        reclaimer: OrphanBlobReclaimer,
    ) -> Self {
        Self {
            metadata,
            normalizer,
            reclaimer,
            pending: Mutex::new(PendingReclaims::default()),
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Normalize and persist `sheet`, returning the stored aggregate.
    ///
    /// Blank sheet and product IDs are minted here so uploaded objects land
    /// under the IDs they will be stored with.
    #[instrument(skip(self, sheet), fields(sheet_id = tracing::field::Empty))]
    pub async fn save(&self, mut sheet: Sheet) -> PipelineResult<Sheet> {
        assign_ids(&mut sheet);
        tracing::Span::current().record("sheet_id", sheet.id.as_str());

        if let Err(e) = sheet.check() {
            metrics::record_save_failure("validation");
            return Err(e.into());
        }

        let previous = self.metadata.get_sheet(&sheet.id).await?;

        let Normalized {
            sheet: normalized,
            uploaded,
        } = match self.normalizer.normalize(&sheet).await {
            Ok(normalized) => normalized,
            Err(e) => {
                let stage = match &e {
                    NormalizeError::Validation(_) => "validation",
                    NormalizeError::Upload { .. } => "upload",
                };
                metrics::record_save_failure(stage);
                self.track(self.reclaimer.reclaim_urls(e.uploaded().iter().cloned()));
                return Err(e.into());
            }
        };

        match self.metadata.upsert_sheet(&normalized).await {
            Ok(saved) => {
                self.track(self.reclaimer.reclaim(previous.as_ref(), Some(&saved)));
                metrics::SHEETS_SAVED.inc();
                tracing::info!(products = saved.products.len(), "sheet saved");
                Ok(saved)
            }
            Err(e) => {
                if e.is_constraint_violation() {
                    tracing::warn!(error = %e, "sheet rejected by metadata store");
                } else {
                    tracing::error!(error = %e, "sheet transaction failed");
                }
                metrics::record_save_failure("transaction");
                // Only this call's uploads. Hosted URLs that passed through may
                // belong to other sheets.
                self.track(self.reclaimer.reclaim_urls(uploaded));
                Err(PipelineError::Transaction)
            }
        }
    }

    pub async fn get(&self, sheet_id: &str) -> PipelineResult<Sheet> {
        self.metadata
            .get_sheet(sheet_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(sheet_id.to_string()))
    }

    /// Newest sheets first, optionally restricted to one manufacturer.
    pub async fn list(&self, manufacturer: Option<&str>, page: Page) -> PipelineResult<SheetPage> {
        let page = match manufacturer {
            Some(name) => self.metadata.list_sheets_by_manufacturer(name, page).await?,
            None => self.metadata.list_sheets(page).await?,
        };
        Ok(page)
    }

    /// Remove a sheet and reclaim its media. Deleting an unknown sheet is a
    /// no-op that returns `None`.
    #[instrument(skip(self))]
    pub async fn delete(&self, sheet_id: &str) -> PipelineResult<Option<Sheet>> {
        let removed = self.metadata.delete_sheet(sheet_id).await?;
        if let Some(sheet) = &removed {
            metrics::SHEETS_DELETED.inc();
            self.track(self.reclaimer.reclaim(Some(sheet), None));
            tracing::info!("sheet deleted");
        }
        Ok(removed)
    }

    /// Delete every sheet created more than `horizon` ago.
    #[instrument(skip(self))]
    pub async fn purge(&self, horizon: Duration) -> PipelineResult<Vec<Sheet>> {
        let cutoff = OffsetDateTime::now_utc() - horizon;
        let removed = self.metadata.delete_sheets_created_before(cutoff).await?;
        if !removed.is_empty() {
            metrics::SHEETS_DELETED.inc_by(removed.len() as u64);
            self.track(self.reclaimer.reclaim(&removed, None));
        }
        tracing::info!(cutoff = %cutoff, removed = removed.len(), "retention purge finished");
        Ok(removed)
    }

    pub async fn manufacturers(&self) -> PipelineResult<Vec<ManufacturerRow>> {
        Ok(self.metadata.list_manufacturers().await?)
    }

    /// Wait for every reclaim scheduled so far and return their combined
    /// report, including reclaims that finished earlier.
    pub async fn drain_reclaims(&self) -> ReclaimReport {
        let PendingReclaims { handles, settled } = std::mem::take(&mut *self.lock_pending());
        let mut report = settled;
        for handle in handles {
            report = report.merge(handle.join().await);
        }
        report
    }

    /// Number of reclaims scheduled but not yet finished.
    pub fn pending_reclaims(&self) -> usize {
        let mut pending = self.lock_pending();
        pending.reap();
        pending.handles.len()
    }

    fn track(&self, handle: ReclaimHandle) {
        if handle.is_empty() {
            return;
        }
        tracing::debug!(urls = handle.urls().len(), "scheduled blob reclaim");
        let mut pending = self.lock_pending();
        pending.reap();
        pending.handles.push(handle);
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingReclaims> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn assign_ids(sheet: &mut Sheet) {
    if sheet.id.trim().is_empty() {
        sheet.id = Uuid::new_v4().to_string();
    }
    for product in &mut sheet.products {
        if product.id.trim().is_empty() {
            product.id = Uuid::new_v4().to_string();
        }
    }
}
