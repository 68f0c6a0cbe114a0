//! Media normalization: every embedded payload in a sheet becomes a hosted URL.
//!
//! Normalization has two phases. The first decodes and validates every media
//! field of the sheet and plans its upload; nothing is written. The second
//! issues all uploads concurrently and waits for every one of them. A sheet
//! that fails validation anywhere therefore never leaves blobs behind.

use crate::error::NormalizeError;
use crate::metrics;
use futures::future::join_all;
use shelfsheet_core::media::{extension_for_mime, sanitize_file_name};
use shelfsheet_core::{
    Attachment, DataPayload, HostAllowlist, MediaKind, MediaSource, MediaValidator, Sheet,
    ValidationError,
};
use shelfsheet_storage::BlobStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Which field of the sheet an upload replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    SheetAttachment(usize),
    ProductImage(usize),
    PromoImage(usize),
    ProductAttachment { product: usize, attachment: usize },
}

#[derive(Debug)]
struct PlannedUpload {
    slot: Slot,
    kind: MediaKind,
    path: String,
    payload: DataPayload,
}

/// A field value after phase one.
enum Resolved {
    Upload(DataPayload),
    Hosted(String),
}

/// A normalized sheet and the blobs stored while producing it.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub sheet: Sheet,
    /// Fresh uploads only. Hosted URLs that passed through are not listed.
    pub uploaded: Vec<String>,
}

/// Rewrites embedded media payloads in a sheet into blob store URLs.
pub struct MediaNormalizer {
    store: Arc<dyn BlobStore>,
    validator: MediaValidator,
    allowlist: HostAllowlist,
    path_prefix: String,
}

impl MediaNormalizer {
    pub fn new(
        store: Arc<dyn BlobStore>,
        validator: MediaValidator,
        allowlist: HostAllowlist,
        path_prefix: impl Into<String>,
    ) -> Self {
        let path_prefix = path_prefix.into().trim_matches('/').to_string();
        Self {
            store,
            validator,
            allowlist,
            path_prefix,
        }
    }

    /// Return a copy of `sheet` whose media fields all hold hosted URLs,
    /// together with the URLs this call stored.
    ///
    /// Already-hosted URLs on allowed hosts pass through untouched and are not
    /// listed as uploads, so normalizing a normalized sheet is a no-op.
    #[instrument(skip(self, sheet), fields(sheet_id = %sheet.id))]
    pub async fn normalize(&self, sheet: &Sheet) -> Result<Normalized, NormalizeError> {
        let mut normalized = sheet.clone();
        let plan = self.plan(&mut normalized).inspect_err(|e| {
            metrics::record_rejection(e.reason());
            tracing::info!(reason = e.reason(), error = %e, "rejected sheet media");
        })?;

        if plan.is_empty() {
            return Ok(Normalized {
                sheet: normalized,
                uploaded: Vec::new(),
            });
        }
        tracing::debug!(uploads = plan.len(), "uploading sheet media");

        let results = join_all(plan.iter().map(|upload| {
            self.store.put(
                &upload.path,
                upload.payload.bytes.clone(),
                &upload.payload.mime,
            )
        }))
        .await;

        let mut uploaded = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (upload, result) in plan.iter().zip(results) {
            match result {
                Ok(blob) => {
                    metrics::MEDIA_UPLOADS
                        .with_label_values(&[upload.kind.as_str()])
                        .inc();
                    metrics::MEDIA_UPLOADED_BYTES.inc_by(upload.payload.bytes.len() as u64);
                    uploaded.push((upload, blob.url));
                }
                Err(e) => {
                    tracing::warn!(path = %upload.path, error = %e, "media upload failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(source) = first_error {
            return Err(NormalizeError::Upload {
                source,
                uploaded: uploaded.into_iter().map(|(_, url)| url).collect(),
            });
        }

        let mut urls = Vec::with_capacity(uploaded.len());
        for (upload, url) in uploaded {
            urls.push(url.clone());
            apply(&mut normalized, upload, url);
        }
        Ok(Normalized {
            sheet: normalized,
            uploaded: urls,
        })
    }

    /// Phase one: validate every field, rewrite hosted attachment fields in
    /// place, and list the uploads still needed.
    fn plan(&self, sheet: &mut Sheet) -> Result<Vec<PlannedUpload>, ValidationError> {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let root = path_segment(&sheet.id);
        let mut plan = Vec::new();

        for (index, attachment) in sheet.attachments.iter_mut().enumerate() {
            if let Some(payload) = self.resolve_attachment(attachment)? {
                plan.push(PlannedUpload {
                    slot: Slot::SheetAttachment(index),
                    kind: MediaKind::Attachment,
                    path: self.attachment_path(
                        &format!("{root}/attachments"),
                        millis,
                        &attachment.name,
                    ),
                    payload,
                });
            }
        }

        for (index, product) in sheet.products.iter_mut().enumerate() {
            let segment = format!("{root}/products/{}", path_segment(&product.id));

            if let Some(value) = non_blank(product.product_image.as_deref()) {
                if let Resolved::Upload(payload) = self.resolve(value, MediaKind::Image)? {
                    plan.push(PlannedUpload {
                        slot: Slot::ProductImage(index),
                        kind: MediaKind::Image,
                        path: self.image_path(&format!("{segment}/image"), millis, &payload),
                        payload,
                    });
                }
            } else {
                product.product_image = None;
            }

            if let Some(value) = non_blank(product.promo_image.as_deref()) {
                if let Resolved::Upload(payload) = self.resolve(value, MediaKind::Image)? {
                    plan.push(PlannedUpload {
                        slot: Slot::PromoImage(index),
                        kind: MediaKind::Image,
                        path: self.image_path(&format!("{segment}/promo"), millis, &payload),
                        payload,
                    });
                }
            } else {
                product.promo_image = None;
            }

            let subpath = format!("{segment}/attachments");
            for (position, attachment) in product.product_attachments.iter_mut().enumerate() {
                if let Some(payload) = self.resolve_attachment(attachment)? {
                    plan.push(PlannedUpload {
                        slot: Slot::ProductAttachment {
                            product: index,
                            attachment: position,
                        },
                        kind: MediaKind::Attachment,
                        path: self.attachment_path(&subpath, millis, &attachment.name),
                        payload,
                    });
                }
            }
        }

        Ok(plan)
    }

    fn resolve(&self, value: &str, kind: MediaKind) -> Result<Resolved, ValidationError> {
        match MediaSource::parse(value)? {
            MediaSource::Embedded(payload) => {
                self.validator.validate(&payload.mime, &payload.bytes, kind)?;
                Ok(Resolved::Upload(payload))
            }
            MediaSource::Hosted(url) if self.allowlist.allows_url(&url) => {
                Ok(Resolved::Hosted(value.trim().to_string()))
            }
            MediaSource::Hosted(url) => Err(ValidationError::DisallowedSource(url.to_string())),
        }
    }

    /// Hosted sources are written back to `url` immediately; embedded ones are
    /// returned for upload.
    fn resolve_attachment(
        &self,
        attachment: &mut Attachment,
    ) -> Result<Option<DataPayload>, ValidationError> {
        let source = attachment.source().map(str::to_string).ok_or_else(|| {
            ValidationError::MalformedPayload(format!(
                "attachment {:?} has no content",
                attachment.name
            ))
        })?;
        match self.resolve(&source, MediaKind::Attachment)? {
            Resolved::Upload(payload) => Ok(Some(payload)),
            Resolved::Hosted(url) => {
                attachment.url = url;
                attachment.data_url = None;
                Ok(None)
            }
        }
    }

    fn object_path(&self, subpath: &str, millis: i128, file_name: &str) -> String {
        format!("{}/{subpath}/{millis}-{file_name}", self.path_prefix)
    }

    fn attachment_path(&self, subpath: &str, millis: i128, name: &str) -> String {
        self.object_path(subpath, millis, &sanitize_file_name(name))
    }

    fn image_path(&self, subpath: &str, millis: i128, payload: &DataPayload) -> String {
        let file_name = format!("image.{}", extension_for_mime(&payload.mime));
        self.object_path(subpath, millis, &file_name)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Path segment for a sheet or product ID. IDs are client supplied.
fn path_segment(id: &str) -> String {
    if id.trim().is_empty() {
        "unassigned".to_string()
    } else {
        sanitize_file_name(id)
    }
}

/// Phase two: write an uploaded URL into its field.
fn apply(sheet: &mut Sheet, upload: &PlannedUpload, url: String) {
    let finish_attachment = |attachment: &mut Attachment, url: String| {
        attachment.url = url;
        attachment.data_url = None;
        attachment.size = upload.payload.bytes.len() as u64;
        if attachment.mime_type.trim().is_empty() {
            attachment.mime_type = upload.payload.mime.clone();
        }
    };

    match upload.slot {
        Slot::SheetAttachment(index) => {
            if let Some(attachment) = sheet.attachments.get_mut(index) {
                finish_attachment(attachment, url);
            }
        }
        Slot::ProductImage(index) => {
            if let Some(product) = sheet.products.get_mut(index) {
                product.product_image = Some(url);
            }
        }
        Slot::PromoImage(index) => {
            if let Some(product) = sheet.products.get_mut(index) {
                product.promo_image = Some(url);
            }
        }
        Slot::ProductAttachment {
            product,
            attachment,
        } => {
            if let Some(attachment) = sheet
                .products
                .get_mut(product)
                .and_then(|p| p.product_attachments.get_mut(attachment))
            {
                finish_attachment(attachment, url);
            }
        }
    }
}
