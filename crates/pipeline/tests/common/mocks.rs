use async_trait::async_trait;
use bytes::Bytes;
use shelfsheet_core::Sheet;
use shelfsheet_metadata::{
    ManufacturerRepo, ManufacturerRow, MetadataError, MetadataResult, MetadataStore, Page,
    SheetPage, SheetRepo,
};
use shelfsheet_storage::{BlobStore, StorageError, StorageResult, StoredBlob};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

pub const BASE_URL: &str = "http://blobs.shelfsheet.test/media";

/// In-memory blob store that counts calls and can be told to fail.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    fail_puts_containing: Mutex<Option<String>>,
    fail_deletes: Mutex<HashSet<String>>,
    next_suffix: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every put whose path contains `fragment`.
    pub fn fail_puts_containing(&self, fragment: &str) {
        *self.fail_puts_containing.lock().unwrap() = Some(fragment.to_string());
    }

    /// Fail deletes of `url`. The object stays in place.
    pub fn fail_delete_of(&self, url: &str) {
        self.fail_deletes.lock().unwrap().insert(url.to_string());
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.key_for(url)
            .is_some_and(|key| self.objects.lock().unwrap().contains_key(key))
    }

    pub fn content_type(&self, url: &str) -> Option<String> {
        let key = self.key_for(url)?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, content_type)| content_type.clone())
    }

    /// Place an object directly, bypassing counters.
    pub fn seed(&self, key: &str) -> String {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (Bytes::from_static(b"seed"), "text/plain".to_string()),
        );
        format!("{BASE_URL}/{key}")
    }

    fn key_for<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(BASE_URL)?.strip_prefix('/')
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> StorageResult<StoredBlob> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(fragment) = self.fail_puts_containing.lock().unwrap().as_deref()
            && path.contains(fragment)
        {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected put failure for {path}"
            ))));
        }

        let suffix = self.next_suffix.fetch_add(1, Ordering::SeqCst);
        let key = match path.rsplit_once('.') {
            Some((stem, ext)) if !ext.contains('/') => format!("{stem}-{suffix:04}.{ext}"),
            _ => format!("{path}-{suffix:04}"),
        };
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), (data, content_type.to_string()));
        Ok(StoredBlob {
            url: format!("{BASE_URL}/{key}"),
            key,
        })
    }

    async fn delete(&self, url: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let key = self
            .key_for(url)
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))?;
        if self.fail_deletes.lock().unwrap().contains(url) {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected delete failure for {url}"
            ))));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        self.key_for(url).is_some()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Metadata store whose sheet writes always fail. Everything else is
/// forwarded.
pub struct FailingUpserts {
    pub inner: Arc<dyn MetadataStore>,
}

#[async_trait]
impl SheetRepo for FailingUpserts {
    async fn upsert_sheet(&self, sheet: &Sheet) -> MetadataResult<Sheet> {
        Err(MetadataError::Constraint(format!(
            "injected failure writing sheet {}",
            sheet.id
        )))
    }

    async fn get_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>> {
        self.inner.get_sheet(sheet_id).await
    }

    async fn list_sheets(&self, page: Page) -> MetadataResult<SheetPage> {
        self.inner.list_sheets(page).await
    }

    async fn list_sheets_by_manufacturer(
        &self,
        manufacturer_name: &str,
        page: Page,
    ) -> MetadataResult<SheetPage> {
        self.inner
            .list_sheets_by_manufacturer(manufacturer_name, page)
            .await
    }

    async fn delete_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>> {
        self.inner.delete_sheet(sheet_id).await
    }

    async fn delete_sheets_created_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<Sheet>> {
        self.inner.delete_sheets_created_before(cutoff).await
    }
}

#[async_trait]
impl ManufacturerRepo for FailingUpserts {
    async fn find_or_create_manufacturer(&self, name: &str) -> MetadataResult<ManufacturerRow> {
        self.inner.find_or_create_manufacturer(name).await
    }

    async fn list_manufacturers(&self) -> MetadataResult<Vec<ManufacturerRow>> {
        self.inner.list_manufacturers().await
    }
}

#[async_trait]
impl MetadataStore for FailingUpserts {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}
