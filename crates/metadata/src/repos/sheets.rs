//! Entry sheet aggregate repository.

use crate::error::MetadataResult;
use crate::models::{Page, SheetPage};
use async_trait::async_trait;
use shelfsheet_core::Sheet;
use time::OffsetDateTime;

/// Repository for whole-aggregate sheet persistence.
///
/// A sheet is always written and read together with its products, their
/// ingredients, and every attachment.
#[async_trait]
pub trait SheetRepo: Send + Sync {
    /// Insert or fully replace a sheet aggregate in one transaction.
    ///
    /// Returns the aggregate as stored, including product IDs minted for
    /// blank, repeated, or foreign-owned incoming IDs. `created_at` of an
    /// existing sheet is kept.
    async fn upsert_sheet(&self, sheet: &Sheet) -> MetadataResult<Sheet>;

    /// Load one aggregate.
    async fn get_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>>;

    /// List aggregates, newest first.
    async fn list_sheets(&self, page: Page) -> MetadataResult<SheetPage>;

    /// List aggregates whose sheet manufacturer is `manufacturer_name`.
    async fn list_sheets_by_manufacturer(
        &self,
        manufacturer_name: &str,
        page: Page,
    ) -> MetadataResult<SheetPage>;

    /// Delete an aggregate, returning what was removed.
    async fn delete_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>>;

    /// Delete every aggregate created before `cutoff`, returning them.
    async fn delete_sheets_created_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<Sheet>>;
}
