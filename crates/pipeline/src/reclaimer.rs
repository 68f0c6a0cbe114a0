//! Best-effort deletion of blobs a sheet no longer references.

use crate::metrics;
use futures::FutureExt;
use shelfsheet_core::sheet::media_urls;
use shelfsheet_core::{HostAllowlist, Sheet};
use shelfsheet_storage::BlobStore;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

/// Outcome of one reclaim run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub deleted: usize,
    pub failed: usize,
}

impl ReclaimReport {
    pub fn merge(self, other: ReclaimReport) -> ReclaimReport {
        ReclaimReport {
            deleted: self.deleted + other.deleted,
            failed: self.failed + other.failed,
        }
    }
}

/// A scheduled reclaim. Dropping the handle leaves the deletions running.
#[derive(Debug)]
pub struct ReclaimHandle {
    urls: Vec<String>,
    task: Option<JoinHandle<ReclaimReport>>,
}

impl ReclaimHandle {
    fn empty() -> Self {
        Self {
            urls: Vec::new(),
            task: None,
        }
    }

    /// URLs scheduled for deletion.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Wait for the deletions to finish.
    pub async fn join(mut self) -> ReclaimReport {
        match self.task.take() {
            Some(task) => self.settle(task.await),
            None => ReclaimReport::default(),
        }
    }

    /// The report if the deletions are done, without waiting.
    pub fn try_report(&mut self) -> Option<ReclaimReport> {
        let Some(task) = self.task.as_mut() else {
            return Some(ReclaimReport::default());
        };
        if !task.is_finished() {
            return None;
        }
        let outcome = task.now_or_never()?;
        self.task = None;
        Some(self.settle(outcome))
    }

    fn settle(&self, outcome: Result<ReclaimReport, JoinError>) -> ReclaimReport {
        match outcome {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, urls = self.urls.len(), "reclaim task did not complete");
                ReclaimReport {
                    deleted: 0,
                    failed: self.urls.len(),
                }
            }
        }
    }
}

/// Deletes managed blobs that dropped out of a sheet.
#[derive(Clone)]
pub struct OrphanBlobReclaimer {
    store: Arc<dyn BlobStore>,
    allowlist: HostAllowlist,
}

impl OrphanBlobReclaimer {
    pub fn new(store: Arc<dyn BlobStore>, allowlist: HostAllowlist) -> Self {
        Self { store, allowlist }
    }

    /// Delete every managed URL referenced by `before` but not by `after`.
    pub fn reclaim<'a>(
        &self,
        before: impl IntoIterator<Item = &'a Sheet>,
        after: impl IntoIterator<Item = &'a Sheet>,
    ) -> ReclaimHandle {
        let kept = media_urls(after);
        let orphaned = media_urls(before)
            .into_iter()
            .filter(|url| !kept.contains(url))
            .collect::<Vec<_>>();
        self.reclaim_urls(orphaned)
    }

    /// Delete an explicit list of URLs. Anything off the managed domain is
    /// skipped.
    pub fn reclaim_urls(&self, urls: impl IntoIterator<Item = String>) -> ReclaimHandle {
        let mut urls: Vec<String> = urls
            .into_iter()
            .filter(|url| self.allowlist.is_managed_url(url))
            .collect();
        urls.sort();
        urls.dedup();
        if urls.is_empty() {
            return ReclaimHandle::empty();
        }

        let store = Arc::clone(&self.store);
        let scheduled = urls.clone();
        let task = tokio::spawn(async move {
            let results = store.delete_many(&scheduled).await;
            let mut report = ReclaimReport::default();
            for (url, result) in scheduled.iter().zip(results) {
                match result {
                    Ok(()) => {
                        report.deleted += 1;
                        metrics::BLOBS_RECLAIMED.inc();
                    }
                    Err(e) => {
                        report.failed += 1;
                        metrics::BLOB_RECLAIM_FAILURES.inc();
                        tracing::warn!(url = %url, error = %e, "failed to reclaim blob");
                    }
                }
            }
            tracing::debug!(deleted = report.deleted, failed = report.failed, "reclaim finished");
            report
        });

        ReclaimHandle {
            urls,
            task: Some(task),
        }
    }
}
