//! Prometheus metrics for media ingestion and sheet persistence.

use prometheus::{self, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Media metrics
pub static MEDIA_UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shelfsheet_media_uploads_total",
            "Total media payloads uploaded by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static MEDIA_UPLOADED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "shelfsheet_media_uploaded_bytes_total",
        "Total bytes of decoded media uploaded",
    )
    .expect("metric creation failed")
});

pub static VALIDATION_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shelfsheet_media_rejections_total",
            "Total media references rejected by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Sheet metrics
pub static SHEETS_SAVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("shelfsheet_sheets_saved_total", "Total sheets saved")
        .expect("metric creation failed")
});

pub static SHEET_SAVE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "shelfsheet_sheet_save_failures_total",
            "Total failed sheet saves by stage",
        ),
        &["stage"],
    )
    .expect("metric creation failed")
});

pub static SHEETS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "shelfsheet_sheets_deleted_total",
        "Total sheets deleted directly or by retention",
    )
    .expect("metric creation failed")
});

// Reclaim metrics
pub static BLOBS_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "shelfsheet_blobs_reclaimed_total",
        "Total orphaned blobs deleted",
    )
    .expect("metric creation failed")
});

pub static BLOB_RECLAIM_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "shelfsheet_blob_reclaim_failures_total",
        "Total orphaned blob deletions that failed",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(MEDIA_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MEDIA_UPLOADED_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(VALIDATION_REJECTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SHEETS_SAVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SHEET_SAVE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SHEETS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOBS_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_RECLAIM_FAILURES.clone()))
            .expect("metric registration failed");
    });
}

/// Text exposition of every registered metric.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(e) => format!("# failed to encode metrics: {e}\n"),
    }
}

/// Helper to record a rejected media reference.
pub fn record_rejection(reason: &str) {
    VALIDATION_REJECTIONS.with_label_values(&[reason]).inc();
}

/// Helper to record a failed save by the stage that failed.
pub fn record_save_failure(stage: &str) {
    SHEET_SAVE_FAILURES.with_label_values(&[stage]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_exposition_lists_counters() {
        register_metrics();
        record_rejection("unsupported_type");
        let text = encode_metrics();
        assert!(text.contains("shelfsheet_media_rejections_total"));
        assert!(text.contains("reason=\"unsupported_type\""));
    }
}
