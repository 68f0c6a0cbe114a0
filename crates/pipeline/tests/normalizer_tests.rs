mod common;

use common::*;
use shelfsheet_core::{Sheet, ValidationError};
use shelfsheet_pipeline::{NormalizeError, Normalized};
use std::sync::atomic::Ordering;

fn sheet_with_images(product_image: String, promo_image: Option<String>) -> Sheet {
    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.attachments.clear();
    sheet.products[0].product_attachments.clear();
    sheet.products[0].product_image = Some(product_image);
    sheet.products[0].promo_image = promo_image;
    sheet
}

#[tokio::test]
async fn test_embedded_media_becomes_managed_urls() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let Normalized {
        sheet: normalized,
        uploaded,
    } = normalizer
        .normalize(&sheet_with_media("S1", "P-1"))
        .await
        .unwrap();

    assert_eq!(store.len(), 3);
    assert_eq!(uploaded.len(), 3);
    let list = allowlist();

    let sheet_attachment = &normalized.attachments[0];
    assert!(list.is_managed_url(&sheet_attachment.url));
    assert!(sheet_attachment.url.contains("/sheets/S1/attachments/"));
    assert!(sheet_attachment.url.contains("-layout_plan"));
    assert_eq!(sheet_attachment.data_url, None);
    assert_eq!(sheet_attachment.size, b"%PDF-1.4 layout".len() as u64);

    let product = &normalized.products[0];
    let image = product.product_image.as_deref().unwrap();
    assert!(list.is_managed_url(image));
    assert!(image.contains("/sheets/S1/products/P-1/image/"));
    assert!(image.ends_with(".png"));
    assert_eq!(store.content_type(image).as_deref(), Some("image/png"));

    let product_attachment = &product.product_attachments[0];
    assert!(product_attachment.url.contains("/sheets/S1/products/P-1/attachments/"));
    assert_eq!(product_attachment.mime_type, "text/plain");
    assert_eq!(product_attachment.size, b"ingredients: aloe".len() as u64);

    // Everything that is not media is untouched.
    assert_eq!(product.specific_ingredients, vec!["aloe".to_string()]);
    assert_eq!(normalized.title, "Spring shelf");
}

#[tokio::test]
async fn test_disallowed_mime_creates_no_blobs() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    // The bad payload sits after fields that would upload fine.
    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.products[0].product_attachments[0].url =
        data_uri("application/x-msdownload", b"MZ\x90\x00");

    let err = normalizer.normalize(&sheet).await.unwrap_err();
    assert!(matches!(
        err,
        NormalizeError::Validation(ValidationError::UnsupportedType { .. })
    ));
    assert!(err.uploaded().is_empty());
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_resolution_floor_rejects_low_resolution_image() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, high_resolution_validator());

    let err = normalizer
        .normalize(&sheet_with_images(png_uri(1200, 2000), None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NormalizeError::Validation(ValidationError::ResolutionTooLow {
            width: 1200,
            height: 2000,
            min_short_side: 1500,
        })
    ));
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolution_floor_accepts_print_quality_image() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, high_resolution_validator());

    let normalized = normalizer
        .normalize(&sheet_with_images(png_uri(1600, 2667), None))
        .await
        .unwrap()
        .sheet;

    let url = normalized.products[0].product_image.as_deref().unwrap();
    assert!(allowlist().is_managed_url(url));
    assert!(store.contains_url(url));
}

#[tokio::test]
async fn test_unsniffable_image_rejected_when_floor_configured() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, high_resolution_validator());

    let err = normalizer
        .normalize(&sheet_with_images(
            data_uri("image/png", b"not really a png"),
            None,
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        NormalizeError::Validation(ValidationError::FormatUnrecognized { .. })
    ));
}

#[tokio::test]
async fn test_hosted_urls_checked_against_allowlist() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let partner = format!("https://{PARTNER_HOST}/p1.png");
    let managed = format!("https://eu.{MANAGED_DOMAIN}/sheets/p1-promo.png");
    let normalized = normalizer
        .normalize(&sheet_with_images(partner.clone(), Some(managed.clone())))
        .await
        .unwrap();
    assert_eq!(normalized.sheet.products[0].product_image, Some(partner));
    assert_eq!(normalized.sheet.products[0].promo_image, Some(managed));
    assert!(normalized.uploaded.is_empty());
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);

    for rejected in [
        "https://evil.example/p1.png",
        "https://notblobs.shelfsheet.test.evil.example/p1.png",
        "ftp://cdn.partner.example/p1.png",
        "javascript:alert(1)",
    ] {
        let err = normalizer
            .normalize(&sheet_with_images(rejected.to_string(), None))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                NormalizeError::Validation(ValidationError::DisallowedSource(_))
            ),
            "{rejected} should be refused, got {err:?}"
        );
    }
}

#[tokio::test]
async fn test_empty_attachment_is_malformed() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let mut sheet = sheet_with_media("S1", "P-1");
    sheet.attachments[0].data_url = None;
    sheet.attachments[0].url = String::new();

    let err = normalizer.normalize(&sheet).await.unwrap_err();
    assert!(matches!(
        err,
        NormalizeError::Validation(ValidationError::MalformedPayload(_))
    ));
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_images_become_absent() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let normalized = normalizer
        .normalize(&sheet_with_images("   ".to_string(), Some(String::new())))
        .await
        .unwrap()
        .sheet;

    assert_eq!(normalized.products[0].product_image, None);
    assert_eq!(normalized.products[0].promo_image, None);
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_renormalizing_is_a_no_op() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let once = normalizer
        .normalize(&sheet_with_media("S1", "P-1"))
        .await
        .unwrap()
        .sheet;
    let puts = store.puts.load(Ordering::SeqCst);

    let twice = normalizer.normalize(&once).await.unwrap();
    assert_eq!(twice.sheet, once);
    assert!(twice.uploaded.is_empty());
    assert_eq!(store.puts.load(Ordering::SeqCst), puts);
}

#[tokio::test]
async fn test_same_payload_twice_mints_two_blobs() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let image = png_uri(640, 480);
    let normalized = normalizer
        .normalize(&sheet_with_images(image.clone(), Some(image)))
        .await
        .unwrap()
        .sheet;

    let product = &normalized.products[0];
    assert_ne!(product.product_image, product.promo_image);
    assert!(product.promo_image.as_deref().unwrap().contains("/promo/"));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_partial_upload_failure_reports_stored_urls() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());
    store.fail_puts_containing("/promo/");

    let sheet = sheet_with_images(png_uri(640, 480), Some(png_uri(800, 600)));
    let err = normalizer.normalize(&sheet).await.unwrap_err();

    assert!(matches!(err, NormalizeError::Upload { .. }));
    // Both uploads were attempted; only the image landed.
    assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    assert_eq!(err.uploaded().len(), 1);
    assert!(err.uploaded()[0].contains("/image/"));
    assert!(store.contains_url(&err.uploaded()[0]));
}

#[tokio::test]
async fn test_uploads_are_keyed_under_the_sheet_id() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let mut sheet = sheet_with_media("S-42", "P-1");
    sheet.products[0].promo_image = Some(png_uri(320, 240));
    let normalized = normalizer.normalize(&sheet).await.unwrap();

    assert_eq!(normalized.uploaded.len(), 4);
    for url in &normalized.uploaded {
        assert!(url.contains("/sheets/S-42/"), "{url} is not under its sheet");
    }

    // Two sheets attaching the same file name land in different directories.
    let other = normalizer
        .normalize(&sheet_with_media("S-43", "P-1"))
        .await
        .unwrap();
    let first = &normalized.sheet.attachments[0].url;
    let second = &other.sheet.attachments[0].url;
    assert!(second.contains("/sheets/S-43/attachments/"));
    assert_ne!(
        first.rsplit_once('/').map(|(dir, _)| dir),
        second.rsplit_once('/').map(|(dir, _)| dir)
    );
}

#[tokio::test]
async fn test_uploaded_lists_only_fresh_blobs() {
    let store = MemoryBlobStore::new();
    let normalizer = normalizer(&store, standard_validator());

    let hosted = format!("https://{PARTNER_HOST}/p1.png");
    let normalized = normalizer
        .normalize(&sheet_with_images(hosted.clone(), Some(png_uri(320, 240))))
        .await
        .unwrap();

    assert_eq!(normalized.sheet.products[0].product_image, Some(hosted));
    assert_eq!(
        normalized.uploaded,
        vec![normalized.sheet.products[0].promo_image.clone().unwrap()]
    );
}
