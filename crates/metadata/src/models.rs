//! Database models mapping to the sheet schema.

use crate::error::{MetadataError, MetadataResult};
use shelfsheet_core::sheet::{Attachment, AttachmentOwner};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Largest page a listing may request.
pub const MAX_PAGE_LIMIT: u32 = 500;

// =============================================================================
// Manufacturers
// =============================================================================

/// Manufacturer master record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, serde::Serialize)]
pub struct ManufacturerRow {
    pub manufacturer_id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Sheets
// =============================================================================

/// Sheet header joined to its manufacturer.
#[derive(Debug, Clone, FromRow)]
pub struct SheetRow {
    pub sheet_id: String,
    pub creator_id: String,
    pub creator_name: String,
    pub manufacturer_name: String,
    pub email: String,
    pub phone_number: String,
    pub title: String,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Product row joined to its manufacturer.
#[derive(Debug, Clone, FromRow)]
pub struct ProductRow {
    pub product_id: String,
    pub sheet_id: String,
    pub position: i32,
    pub manufacturer_name: String,
    pub shelf_name: String,
    pub jan_code: String,
    pub product_name: String,
    pub product_image: Option<String>,
    pub risk_classification: Option<String>,
    pub catch_copy: Option<String>,
    pub product_message: Option<String>,
    pub product_notes: Option<String>,
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    pub facing_count: i32,
    pub arrival_date: Option<String>,
    pub has_promo_material: String,
    pub promo_sample: Option<String>,
    pub special_fixture: Option<String>,
    pub promo_width: Option<f64>,
    pub promo_height: Option<f64>,
    pub promo_depth: Option<f64>,
    pub promo_image: Option<String>,
}

/// One specific ingredient of a product.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IngredientRow {
    pub product_id: String,
    pub position: i32,
    pub name: String,
}

/// Attachment row. Exactly one of `sheet_id` / `product_id` is set; rows are
/// only built through [`AttachmentRow::new`], which takes an
/// [`AttachmentOwner`].
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AttachmentRow {
    pub attachment_id: Uuid,
    pub sheet_id: Option<String>,
    pub product_id: Option<String>,
    pub position: i32,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub url: String,
}

impl AttachmentRow {
    pub fn new(owner: &AttachmentOwner, position: i32, attachment: &Attachment) -> MetadataResult<Self> {
        let size_bytes = i64::try_from(attachment.size).map_err(|_| {
            MetadataError::Constraint(format!(
                "attachment {} size {} exceeds storable range",
                attachment.name, attachment.size
            ))
        })?;
        Ok(Self {
            attachment_id: Uuid::new_v4(),
            sheet_id: owner.sheet_id().map(str::to_string),
            product_id: owner.product_id().map(str::to_string),
            position,
            name: attachment.name.clone(),
            size_bytes,
            mime_type: attachment.mime_type.clone(),
            url: attachment.url.clone(),
        })
    }

    /// The owner recorded on the row.
    pub fn owner(&self) -> MetadataResult<AttachmentOwner> {
        match (&self.sheet_id, &self.product_id) {
            (Some(sheet_id), None) => Ok(AttachmentOwner::Sheet(sheet_id.clone())),
            (None, Some(product_id)) => Ok(AttachmentOwner::Product(product_id.clone())),
            _ => Err(MetadataError::Internal(format!(
                "attachment {} has no single owner",
                self.attachment_id
            ))),
        }
    }

    pub fn into_attachment(self) -> MetadataResult<Attachment> {
        let size = u64::try_from(self.size_bytes).map_err(|_| {
            MetadataError::Internal(format!(
                "attachment {} has negative size {}",
                self.attachment_id, self.size_bytes
            ))
        })?;
        Ok(Attachment {
            name: self.name,
            size,
            mime_type: self.mime_type,
            url: self.url,
            data_url: None,
        })
    }
}

// =============================================================================
// Paging
// =============================================================================

/// Offset/limit window for listings. `limit = None` returns every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: Option<u32>,
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: Some(limit.clamp(1, MAX_PAGE_LIMIT)),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Rows to request: one past the limit, so a full extra row signals more.
    pub fn fetch_limit(&self) -> Option<i64> {
        self.limit.map(|limit| i64::from(limit) + 1)
    }
}

/// One page of assembled sheets.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPage {
    pub sheets: Vec<shelfsheet_core::Sheet>,
    pub has_more: bool,
}
