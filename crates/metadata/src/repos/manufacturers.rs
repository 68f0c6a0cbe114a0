//! Manufacturer master repository.

use crate::error::MetadataResult;
use crate::models::ManufacturerRow;
use async_trait::async_trait;

/// Repository for manufacturer records.
#[async_trait]
pub trait ManufacturerRepo: Send + Sync {
    /// Return the manufacturer named `name` (trimmed), creating it if needed.
    async fn find_or_create_manufacturer(&self, name: &str) -> MetadataResult<ManufacturerRow>;

    /// All manufacturers ordered by name.
    async fn list_manufacturers(&self) -> MetadataResult<Vec<ManufacturerRow>>;
}
