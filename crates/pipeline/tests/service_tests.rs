mod common;

use common::*;
use shelfsheet_core::sheet::media_urls;
use shelfsheet_metadata::Page;
use shelfsheet_pipeline::{PipelineError, ReclaimReport};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use time::Duration;

#[tokio::test]
async fn test_save_persists_normalized_sheet() {
    let pipeline = TestPipeline::new().await;

    let saved = pipeline
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap();

    assert_eq!(pipeline.blobs.len(), 3);
    let urls = media_urls([&saved]);
    assert_eq!(urls.len(), 3);
    assert!(urls.iter().all(|url| pipeline.blobs.contains_url(url)));

    let loaded = pipeline.service.get("S1").await.unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(pipeline.service.drain_reclaims().await, ReclaimReport::default());
}

#[tokio::test]
async fn test_save_mints_blank_ids() {
    let pipeline = TestPipeline::new().await;

    let saved = pipeline
        .service
        .save(sheet_with_media("", ""))
        .await
        .unwrap();

    assert!(uuid::Uuid::parse_str(&saved.id).is_ok());
    let product_id = &saved.products[0].id;
    assert!(uuid::Uuid::parse_str(product_id).is_ok());
    let image = saved.products[0].product_image.as_deref().unwrap();
    assert!(image.contains(&format!("/sheets/{}/products/{product_id}/image/", saved.id)));
    for url in media_urls([&saved]) {
        assert!(url.contains(&format!("/sheets/{}/", saved.id)));
    }
}

#[tokio::test]
async fn test_resave_reclaims_dropped_media() {
    let pipeline = TestPipeline::new().await;
    let first = pipeline
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap();
    let old_image = first.products[0].product_image.clone().unwrap();
    let sheet_attachment = first.attachments[0].url.clone();

    let mut edited = first.clone();
    edited.products[0].product_image = Some(png_uri(1024, 768));
    let second = pipeline.service.save(edited).await.unwrap();

    let report = pipeline.service.drain_reclaims().await;
    assert_eq!(
        report,
        ReclaimReport {
            deleted: 1,
            failed: 0
        }
    );
    assert!(!pipeline.blobs.contains_url(&old_image));
    assert!(pipeline.blobs.contains_url(&sheet_attachment));
    let new_image = second.products[0].product_image.as_deref().unwrap();
    assert_ne!(new_image, old_image);
    assert!(pipeline.blobs.contains_url(new_image));
    assert_eq!(pipeline.blobs.len(), 3);
}

#[tokio::test]
async fn test_validation_failure_writes_nothing() {
    let pipeline = TestPipeline::new().await;

    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.products[0].promo_image = Some(data_uri("image/x-icon", b"\0\0\x01\0"));

    let err = pipeline.service.save(sheet).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(pipeline.blobs.puts.load(Ordering::SeqCst), 0);
    assert!(matches!(
        pipeline.service.get("S1").await,
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_sheet_rejected_before_uploads() {
    let pipeline = TestPipeline::new().await;

    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.products[0].manufacturer_name = "  ".to_string();

    let err = pipeline.service.save(sheet).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidSheet(_)));
    assert_eq!(pipeline.blobs.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_partial_upload_failure_reclaims_uploaded_blobs() {
    let pipeline = TestPipeline::new().await;
    pipeline.blobs.fail_puts_containing("/attachments/");

    let err = pipeline
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Upload(_)));

    // The product image uploaded before the failure surfaced.
    let report = pipeline.service.drain_reclaims().await;
    assert_eq!(report.deleted, 1);
    assert_eq!(pipeline.blobs.len(), 0);
    assert!(pipeline.service.get("S1").await.is_err());
}

#[tokio::test]
async fn test_transaction_failure_reclaims_new_uploads_only() {
    let seeded = TestPipeline::new().await;
    let first = seeded
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap();

    // Same database and blobs, but every further write fails.
    let metadata = seeded.metadata.clone();
    let failing = shelfsheet_pipeline::SheetService::new(
        Arc::new(FailingUpserts { inner: metadata }),
        normalizer(&seeded.blobs, standard_validator()),
        reclaimer(&seeded.blobs),
    );

    let mut edited = first.clone();
    edited.products[0].promo_image = Some(png_uri(320, 240));
    let err = failing.save(edited).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transaction));
    assert_eq!(err.to_string(), "failed to save sheet");

    let report = failing.drain_reclaims().await;
    assert_eq!(report.deleted, 1);
    // The persisted version still resolves.
    for url in media_urls([&first]) {
        assert!(seeded.blobs.contains_url(&url));
    }
    assert_eq!(seeded.blobs.len(), 3);
    assert_eq!(seeded.service.get("S1").await.unwrap(), first);
}

#[tokio::test]
async fn test_transaction_failure_keeps_media_shared_with_other_sheets() {
    let seeded = TestPipeline::new().await;
    let other = seeded
        .service
        .save(sheet_with_media("S2", "P-2"))
        .await
        .unwrap();
    let shared_image = other.products[0].product_image.clone().unwrap();

    let failing = shelfsheet_pipeline::SheetService::new(
        Arc::new(FailingUpserts {
            inner: seeded.metadata.clone(),
        }),
        normalizer(&seeded.blobs, standard_validator()),
        reclaimer(&seeded.blobs),
    );

    // S1 reuses S2's stored image by URL and uploads its own attachments.
    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.products[0].product_image = Some(shared_image.clone());
    let err = failing.save(sheet).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transaction));

    let report = failing.drain_reclaims().await;
    assert_eq!(
        report,
        ReclaimReport {
            deleted: 2,
            failed: 0
        }
    );
    assert!(seeded.blobs.contains_url(&shared_image));
    for url in media_urls([&other]) {
        assert!(seeded.blobs.contains_url(&url));
    }
    assert_eq!(seeded.blobs.len(), 3);
    assert_eq!(seeded.service.get("S2").await.unwrap(), other);
}

#[tokio::test]
async fn test_finished_reclaims_are_not_retained() {
    let pipeline = TestPipeline::new().await;
    let rounds = 100;

    for _ in 0..rounds {
        pipeline
            .service
            .save(sheet_with_media("S1", "P-1"))
            .await
            .unwrap();
        pipeline.service.delete("S1").await.unwrap();
        assert!(pipeline.service.pending_reclaims() < 10);
    }

    for _ in 0..100 {
        if pipeline.service.pending_reclaims() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(pipeline.service.pending_reclaims(), 0);
    assert_eq!(pipeline.blobs.len(), 0);

    // Reaped reports still count towards the drained total.
    let report = pipeline.service.drain_reclaims().await;
    assert_eq!(report.deleted, 3 * rounds);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_delete_reclaims_all_media_and_is_idempotent() {
    let pipeline = TestPipeline::new().await;
    pipeline
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap();

    let removed = pipeline.service.delete("S1").await.unwrap();
    assert_eq!(removed.map(|s| s.id), Some("S1".to_string()));
    assert_eq!(pipeline.service.drain_reclaims().await.deleted, 3);
    assert_eq!(pipeline.blobs.len(), 0);

    assert!(pipeline.service.delete("S1").await.unwrap().is_none());
    assert_eq!(pipeline.service.drain_reclaims().await, ReclaimReport::default());
}

#[tokio::test]
async fn test_purge_removes_old_sheets_and_their_media() {
    let pipeline = TestPipeline::new().await;

    let mut old = sheet_with_media("OLD", "P-OLD");
    old.created_at = time::OffsetDateTime::now_utc() - Duration::days(400);
    pipeline.service.save(old).await.unwrap();
    let fresh = pipeline
        .service
        .save(sheet_with_media("NEW", "P-NEW"))
        .await
        .unwrap();

    let removed = pipeline.service.purge(Duration::days(365)).await.unwrap();
    assert_eq!(
        removed.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        vec!["OLD"]
    );
    assert_eq!(pipeline.service.drain_reclaims().await.deleted, 3);

    let remaining = pipeline.service.list(None, Page::all()).await.unwrap();
    assert_eq!(remaining.sheets, vec![fresh.clone()]);
    for url in media_urls([&fresh]) {
        assert!(pipeline.blobs.contains_url(&url));
    }
}

#[tokio::test]
async fn test_list_by_manufacturer_and_manufacturers() {
    let pipeline = TestPipeline::new().await;
    pipeline
        .service
        .save(sheet_with_media("S1", "P-1"))
        .await
        .unwrap();
    let mut other = sheet_with_media("S2", "P-2");
    other.manufacturer_name = "Globex".to_string();
    pipeline.service.save(other).await.unwrap();

    let acme = pipeline
        .service
        .list(Some("Acme"), Page::new(0, 10))
        .await
        .unwrap();
    assert_eq!(acme.sheets.len(), 1);
    assert_eq!(acme.sheets[0].id, "S1");
    assert!(!acme.has_more);

    let names: Vec<String> = pipeline
        .service
        .manufacturers()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert!(names.contains(&"Acme".to_string()));
    assert!(names.contains(&"Globex".to_string()));
}
