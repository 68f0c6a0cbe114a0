//! The entry sheet aggregate.
//!
//! A [`Sheet`] owns an ordered list of [`Product`]s; both may carry
//! [`Attachment`]s. Field names serialize in camelCase to match the JSON
//! documents clients submit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Workflow state of a sheet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetStatus {
    #[default]
    Draft,
    Completed,
}

impl SheetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SheetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SheetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "completed" => Ok(Self::Completed),
            other => Err(Error::InvalidSheet(format!("unknown status: {other}"))),
        }
    }
}

/// Whether a product ships with promotional material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromoMaterial {
    Yes,
    #[default]
    No,
}

impl PromoMaterial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl FromStr for PromoMaterial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            other => Err(Error::InvalidSheet(format!(
                "unknown promo material flag: {other}"
            ))),
        }
    }
}

/// A named file bound to a sheet or a product.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    /// Durable URL. Clients may also submit a `data:` payload here.
    #[serde(default)]
    pub url: String,
    /// Embedded payload awaiting upload. Always `None` once normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

impl Attachment {
    /// The value that should be resolved to a durable URL: `dataUrl` when
    /// present, else `url`.
    pub fn source(&self) -> Option<&str> {
        self.data_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(self.url.as_str()).filter(|s| !s.trim().is_empty()))
    }
}

/// The single owner of a persisted attachment row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentOwner {
    Sheet(String),
    Product(String),
}

impl AttachmentOwner {
    pub fn sheet_id(&self) -> Option<&str> {
        match self {
            Self::Sheet(id) => Some(id),
            Self::Product(_) => None,
        }
    }

    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::Sheet(_) => None,
            Self::Product(id) => Some(id),
        }
    }
}

/// One retail item on a sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Client-supplied identifier. Blank or colliding values are replaced
    /// when the sheet is saved.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub shelf_name: String,
    #[serde(default)]
    pub manufacturer_name: String,
    #[serde(default)]
    pub jan_code: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_classification: Option<String>,
    #[serde(default)]
    pub specific_ingredients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_copy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_notes: Option<String>,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub facing_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_date: Option<String>,
    #[serde(default)]
    pub has_promo_material: PromoMaterial,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_fixture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_image: Option<String>,
    #[serde(default)]
    pub product_attachments: Vec<Attachment>,
}

impl Product {
    /// Ingredients trimmed, with blanks dropped and duplicates collapsed to
    /// their first occurrence.
    pub fn normalized_ingredients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.specific_ingredients
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .filter(|i| seen.insert(*i))
            .map(str::to_string)
            .collect()
    }
}

fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// The aggregate root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    /// Assigned by the caller on first save when blank.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub manufacturer_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: SheetStatus,
    #[serde(default = "now_utc", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "now_utc", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Sheet {
    /// Parse a sheet document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Reject structurally unusable sheets before any media work starts.
    pub fn check(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidSheet("sheet id is required".to_string()));
        }
        if self.manufacturer_name.trim().is_empty() {
            return Err(Error::InvalidSheet(
                "sheet manufacturer name is required".to_string(),
            ));
        }
        for (index, product) in self.products.iter().enumerate() {
            if product.manufacturer_name.trim().is_empty() {
                return Err(Error::InvalidSheet(format!(
                    "product {index} has no manufacturer name"
                )));
            }
        }
        Ok(())
    }

    /// Distinct trimmed manufacturer names referenced by the sheet and its
    /// products, in first-seen order.
    pub fn manufacturer_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(self.manufacturer_name.as_str())
            .chain(self.products.iter().map(|p| p.manufacturer_name.as_str()))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect()
    }

    /// Every media reference held by the sheet, including ones still
    /// embedded as data payloads.
    pub fn media_refs(&self) -> impl Iterator<Item = &str> {
        let sheet_level = self.attachments.iter().filter_map(Attachment::source);
        let product_level = self.products.iter().flat_map(|p| {
            p.product_image
                .as_deref()
                .into_iter()
                .chain(p.promo_image.as_deref())
                .chain(p.product_attachments.iter().filter_map(Attachment::source))
        });
        sheet_level
            .chain(product_level)
            .filter(|s| !s.trim().is_empty())
    }

    /// Durable URLs referenced by the sheet.
    pub fn media_urls(&self) -> BTreeSet<String> {
        self.media_refs()
            .filter(|s| !crate::media::is_data_uri(s))
            .map(|s| s.trim().to_string())
            .collect()
    }
}

/// Durable URLs referenced by any of `sheets`.
pub fn media_urls<'a>(sheets: impl IntoIterator<Item = &'a Sheet>) -> BTreeSet<String> {
    sheets
        .into_iter()
        .flat_map(|s| s.media_urls())
        .collect()
}
