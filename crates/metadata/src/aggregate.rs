//! Backend-independent pieces of sheet persistence: product ID resolution,
//! child row batches, and assembly of rows back into aggregates.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{AttachmentRow, IngredientRow, ProductRow, SheetRow};
use shelfsheet_core::sheet::{AttachmentOwner, Product, PromoMaterial, Sheet, SheetStatus};
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// Current time truncated to microseconds, the coarsest precision of the
/// supported databases.
pub(crate) fn now_micros() -> OffsetDateTime {
    truncate_micros(OffsetDateTime::now_utc())
}

pub(crate) fn truncate_micros(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.nanosecond() / 1_000 * 1_000)
        .unwrap_or(at)
}

pub(crate) fn position(index: usize) -> MetadataResult<i32> {
    i32::try_from(index)
        .map_err(|_| MetadataError::Constraint(format!("position {index} out of range")))
}

/// Manufacturer ids resolved during one upsert. Never shared across calls.
#[derive(Debug, Default)]
pub(crate) struct ManufacturerIds(HashMap<String, Uuid>);

impl ManufacturerIds {
    pub(crate) fn insert(&mut self, name: String, id: Uuid) {
        self.0.insert(name, id);
    }

    pub(crate) fn get(&self, name: &str) -> MetadataResult<Uuid> {
        self.0.get(name.trim()).copied().ok_or_else(|| {
            MetadataError::Internal(format!("manufacturer {name:?} was not resolved"))
        })
    }
}

/// Reject sheets the schema cannot hold.
pub(crate) fn check_sheet(sheet: &Sheet) -> MetadataResult<()> {
    sheet
        .check()
        .map_err(|e| MetadataError::Constraint(e.to_string()))
}

/// Distinct non-blank incoming product IDs.
pub(crate) fn incoming_product_ids(products: &[Product]) -> Vec<String> {
    let mut seen = HashSet::new();
    products
        .iter()
        .map(|p| p.id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Final product IDs, index-aligned with `products`.
///
/// `owners` maps incoming IDs that already exist to the sheet owning them. An
/// ID is kept only when it is non-blank, unused earlier in this payload, and
/// either new or owned by `sheet_id`; otherwise a fresh UUID is minted.
pub(crate) fn resolve_product_ids(
    sheet_id: &str,
    products: &[Product],
    owners: &HashMap<String, String>,
) -> Vec<String> {
    let mut used = HashSet::new();
    products
        .iter()
        .map(|product| {
            let id = product.id.trim();
            let foreign = owners.get(id).is_some_and(|owner| owner != sheet_id);
            if id.is_empty() || foreign || used.contains(id) {
                let minted = Uuid::new_v4().to_string();
                if !id.is_empty() {
                    tracing::debug!(
                        sheet_id = %sheet_id,
                        incoming = %id,
                        minted = %minted,
                        foreign,
                        "replacing product id"
                    );
                }
                used.insert(minted.clone());
                minted
            } else {
                used.insert(id.to_string());
                id.to_string()
            }
        })
        .collect()
}

/// Child rows of a sheet, accumulated before the bulk inserts.
#[derive(Debug, Default)]
pub(crate) struct ChildBatches {
    pub ingredients: Vec<IngredientRow>,
    pub product_attachments: Vec<AttachmentRow>,
    pub sheet_attachments: Vec<AttachmentRow>,
}

impl ChildBatches {
    pub(crate) fn build(sheet: &Sheet, product_ids: &[String]) -> MetadataResult<Self> {
        let mut batches = Self::default();

        for (product, product_id) in sheet.products.iter().zip(product_ids) {
            for (index, name) in product.normalized_ingredients().into_iter().enumerate() {
                batches.ingredients.push(IngredientRow {
                    product_id: product_id.clone(),
                    position: position(index)?,
                    name,
                });
            }
            let owner = AttachmentOwner::Product(product_id.clone());
            for (index, attachment) in product.product_attachments.iter().enumerate() {
                batches
                    .product_attachments
                    .push(AttachmentRow::new(&owner, position(index)?, attachment)?);
            }
        }

        let owner = AttachmentOwner::Sheet(sheet.id.clone());
        for (index, attachment) in sheet.attachments.iter().enumerate() {
            batches
                .sheet_attachments
                .push(AttachmentRow::new(&owner, position(index)?, attachment)?);
        }

        Ok(batches)
    }
}

/// The aggregate as persisted by an upsert: resolved IDs, trimmed
/// manufacturer names, deduplicated ingredients, no embedded payloads.
pub(crate) fn persisted_view(
    sheet: &Sheet,
    product_ids: &[String],
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
) -> Sheet {
    let mut saved = sheet.clone();
    saved.manufacturer_name = saved.manufacturer_name.trim().to_string();
    saved.created_at = created_at;
    saved.updated_at = updated_at;
    for (product, id) in saved.products.iter_mut().zip(product_ids) {
        product.id = id.clone();
        product.manufacturer_name = product.manufacturer_name.trim().to_string();
        product.specific_ingredients = product.normalized_ingredients();
        for attachment in &mut product.product_attachments {
            attachment.data_url = None;
        }
    }
    for attachment in &mut saved.attachments {
        attachment.data_url = None;
    }
    saved
}

fn product_from_row(
    row: ProductRow,
    ingredients: Vec<String>,
    attachments: Vec<shelfsheet_core::Attachment>,
) -> MetadataResult<Product> {
    let has_promo_material = row
        .has_promo_material
        .parse::<PromoMaterial>()
        .map_err(|e| MetadataError::Internal(e.to_string()))?;
    Ok(Product {
        id: row.product_id,
        shelf_name: row.shelf_name,
        manufacturer_name: row.manufacturer_name,
        jan_code: row.jan_code,
        product_name: row.product_name,
        product_image: row.product_image,
        risk_classification: row.risk_classification,
        specific_ingredients: ingredients,
        catch_copy: row.catch_copy,
        product_message: row.product_message,
        product_notes: row.product_notes,
        width: row.width,
        height: row.height,
        depth: row.depth,
        facing_count: row.facing_count,
        arrival_date: row.arrival_date,
        has_promo_material,
        promo_sample: row.promo_sample,
        special_fixture: row.special_fixture,
        promo_width: row.promo_width,
        promo_height: row.promo_height,
        promo_depth: row.promo_depth,
        promo_image: row.promo_image,
        product_attachments: attachments,
    })
}

/// Group child rows under their headers. Header order is preserved; children
/// are ordered by position.
pub(crate) fn assemble(
    headers: Vec<SheetRow>,
    mut products: Vec<ProductRow>,
    mut ingredients: Vec<IngredientRow>,
    mut attachments: Vec<AttachmentRow>,
) -> MetadataResult<Vec<Sheet>> {
    products.sort_by_key(|p| p.position);
    ingredients.sort_by_key(|i| i.position);
    attachments.sort_by_key(|a| a.position);

    let mut ingredients_by_product: HashMap<String, Vec<String>> = HashMap::new();
    for row in ingredients {
        ingredients_by_product
            .entry(row.product_id)
            .or_default()
            .push(row.name);
    }

    let mut sheet_attachments: HashMap<String, Vec<shelfsheet_core::Attachment>> = HashMap::new();
    let mut product_attachments: HashMap<String, Vec<shelfsheet_core::Attachment>> =
        HashMap::new();
    for row in attachments {
        match row.owner()? {
            AttachmentOwner::Sheet(id) => sheet_attachments
                .entry(id)
                .or_default()
                .push(row.into_attachment()?),
            AttachmentOwner::Product(id) => product_attachments
                .entry(id)
                .or_default()
                .push(row.into_attachment()?),
        }
    }

    let mut products_by_sheet: HashMap<String, Vec<Product>> = HashMap::new();
    for row in products {
        let sheet_id = row.sheet_id.clone();
        let ingredients = ingredients_by_product
            .remove(&row.product_id)
            .unwrap_or_default();
        let attachments = product_attachments
            .remove(&row.product_id)
            .unwrap_or_default();
        products_by_sheet
            .entry(sheet_id)
            .or_default()
            .push(product_from_row(row, ingredients, attachments)?);
    }

    headers
        .into_iter()
        .map(|row| {
            let status = row
                .status
                .parse::<SheetStatus>()
                .map_err(|e| MetadataError::Internal(e.to_string()))?;
            Ok(Sheet {
                products: products_by_sheet.remove(&row.sheet_id).unwrap_or_default(),
                attachments: sheet_attachments.remove(&row.sheet_id).unwrap_or_default(),
                id: row.sheet_id,
                creator_id: row.creator_id,
                creator_name: row.creator_name,
                manufacturer_name: row.manufacturer_name,
                email: row.email,
                phone_number: row.phone_number,
                title: row.title,
                notes: row.notes,
                status,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .collect()
}

/// Split a `limit + 1` fetch into the page and the "more available" flag.
pub(crate) fn split_page<T>(mut rows: Vec<T>, limit: Option<u32>) -> (Vec<T>, bool) {
    match limit {
        Some(limit) if rows.len() > limit as usize => {
            rows.truncate(limit as usize);
            (rows, true)
        }
        _ => (rows, false),
    }
}
