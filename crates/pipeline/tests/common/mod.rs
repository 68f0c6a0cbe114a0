#![allow(dead_code)]

pub mod mocks;

pub use mocks::{FailingUpserts, MemoryBlobStore};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use shelfsheet_core::{HostAllowlist, MediaPolicy, MediaValidator, Sheet};
use shelfsheet_metadata::{MetadataStore, SqliteStore};
use shelfsheet_pipeline::{MediaNormalizer, OrphanBlobReclaimer, SheetService};
use std::sync::Arc;
use tempfile::TempDir;

pub const MANAGED_DOMAIN: &str = "blobs.shelfsheet.test";
pub const PARTNER_HOST: &str = "cdn.partner.example";

pub fn allowlist() -> HostAllowlist {
    HostAllowlist::new([PARTNER_HOST], Some(MANAGED_DOMAIN))
}

pub fn standard_validator() -> MediaValidator {
    MediaValidator::new(
        MediaPolicy::standard_image(),
        MediaPolicy::standard_attachment(),
    )
}

pub fn high_resolution_validator() -> MediaValidator {
    MediaValidator::new(
        MediaPolicy::high_resolution_image(),
        MediaPolicy::standard_attachment(),
    )
}

pub fn normalizer(store: &Arc<MemoryBlobStore>, validator: MediaValidator) -> MediaNormalizer {
    MediaNormalizer::new(store.clone(), validator, allowlist(), "sheets")
}

pub fn reclaimer(store: &Arc<MemoryBlobStore>) -> OrphanBlobReclaimer {
    OrphanBlobReclaimer::new(store.clone(), allowlist())
}

/// A service over SQLite metadata and an in-memory blob store.
pub struct TestPipeline {
    pub service: SheetService,
    pub blobs: Arc<MemoryBlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

impl TestPipeline {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::new(temp_dir.path().join("shelfsheet.db"))
            .await
            .unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(sqlite);
        let blobs = MemoryBlobStore::new();
        let service = SheetService::new(
            metadata.clone(),
            normalizer(&blobs, standard_validator()),
            reclaimer(&blobs),
        );
        Self {
            service,
            blobs,
            metadata,
            _temp_dir: temp_dir,
        }
    }
}

/// Minimal PNG: signature plus an IHDR chunk.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    out.extend_from_slice(&13u32.to_be_bytes());
    out.extend_from_slice(b"IHDR");
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&[8, 6, 0, 0, 0]);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

pub fn png_uri(width: u32, height: u32) -> String {
    data_uri("image/png", &png(width, height))
}

/// A sheet with one embedded product image and one embedded attachment on
/// each of the sheet and the product.
pub fn sheet_with_media(id: &str, product_id: &str) -> Sheet {
    let json = serde_json::json!({
        "id": id,
        "creatorId": "user-1",
        "creatorName": "Sato",
        "manufacturerName": "Acme",
        "title": "Spring shelf",
        "attachments": [
            {"name": "layout plan.pdf", "type": "application/pdf", "size": 0,
             "dataUrl": data_uri("application/pdf", b"%PDF-1.4 layout")}
        ],
        "products": [{
            "id": product_id,
            "manufacturerName": "Acme",
            "productName": "Aloe gel",
            "productImage": png_uri(640, 480),
            "specificIngredients": ["aloe"],
            "productAttachments": [
                {"name": "spec.txt", "type": "", "size": 0,
                 "url": data_uri("text/plain", b"ingredients: aloe")}
            ]
        }]
    });
    serde_json::from_value(json).unwrap()
}
