//! Shared harness for metadata integration tests.

#![allow(dead_code)]

use shelfsheet_core::{Attachment, Product, Sheet};
use shelfsheet_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// Raw pool of whichever backend a test runs against.
pub enum RawPool {
    Sqlite(Pool<Sqlite>),
    Postgres(Pool<SqlxPostgres>),
}

impl RawPool {
    /// Row count of `table` matching `column = value`.
    pub async fn count_where(&self, table: &str, column: &str, value: &str) -> i64 {
        match self {
            RawPool::Sqlite(pool) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?"))
                    .bind(value)
                    .fetch_one(pool)
                    .await
                    .unwrap()
            }
            RawPool::Postgres(pool) => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE {column} = $1"))
                    .bind(value)
                    .fetch_one(pool)
                    .await
                    .unwrap()
            }
        }
    }

    /// Insert an attachment row directly, bypassing the repository.
    pub async fn insert_attachment(
        &self,
        sheet_id: Option<&str>,
        product_id: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let id = uuid::Uuid::new_v4();
        match self {
            RawPool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO attachments (attachment_id, sheet_id, product_id, position, name, \
                     size_bytes, mime_type, url) VALUES (?, ?, ?, 0, 'x.pdf', 1, 'application/pdf', \
                     'https://blobs.example.com/x.pdf')",
                )
                .bind(id)
                .bind(sheet_id)
                .bind(product_id)
                .execute(pool)
                .await?;
            }
            RawPool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO attachments (attachment_id, sheet_id, product_id, position, name, \
                     size_bytes, mime_type, url) VALUES ($1, $2, $3, 0, 'x.pdf', 1, 'application/pdf', \
                     'https://blobs.example.com/x.pdf')",
                )
                .bind(id)
                .bind(sheet_id)
                .bind(product_id)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }
}

/// SQLite store in a temporary directory.
pub struct TestMetadata {
    pub store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db")).await?;
        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub fn raw(&self) -> RawPool {
        RawPool::Sqlite(self.store.pool().clone())
    }
}

/// PostgreSQL store backed by a testcontainer.
pub struct PostgresTestMetadata {
    pub store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{POSTGRES_CONTAINER_START_ERR_PREFIX} Failed to start PostgreSQL container: {e}"
                ))
            })?;

        let host = container.get_host().await.map_err(|e| {
            MetadataError::Internal(format!("{POSTGRES_CONTAINER_START_ERR_PREFIX} {e}"))
        })?;
        let port = container.get_host_port_ipv4(5432).await.map_err(|e| {
            MetadataError::Internal(format!("{POSTGRES_CONTAINER_START_ERR_PREFIX} {e}"))
        })?;

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");
        let store = PostgresStore::from_url(&url, 5, Some(30_000)).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub fn raw(&self) -> RawPool {
        RawPool::Postgres(self.store.pool().clone())
    }
}

/// Run a test against SQLite and, when Docker is available, PostgreSQL.
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>, RawPool) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store(), sqlite.raw()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestMetadata::new().await {
            Ok(postgres) => test_fn(postgres.store(), postgres.raw()).await,
            Err(err) => eprintln!("Skipping PostgreSQL metadata tests: {err}"),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn attachment(name: &str) -> Attachment {
    Attachment {
        name: name.to_string(),
        size: 1024,
        mime_type: "application/pdf".to_string(),
        url: format!("https://blobs.example.com/media/{name}"),
        data_url: None,
    }
}

pub fn product(id: &str, manufacturer: &str) -> Product {
    Product {
        id: id.to_string(),
        shelf_name: "Skin care".to_string(),
        manufacturer_name: manufacturer.to_string(),
        jan_code: "4901234567894".to_string(),
        product_name: format!("Product {id}"),
        product_image: Some(format!("https://blobs.example.com/media/{id}.png")),
        specific_ingredients: vec!["aloe".to_string(), "mint".to_string()],
        width: 5.5,
        height: 12.0,
        depth: 3.25,
        facing_count: 2,
        product_attachments: vec![attachment(&format!("{id}-spec.pdf"))],
        ..Product::default()
    }
}

pub fn sheet(id: &str, manufacturer: &str, products: Vec<Product>) -> Sheet {
    let mut sheet = Sheet::from_json(&format!(
        r#"{{"id":"{id}","creatorId":"u-1","creatorName":"Kana","manufacturerName":"{manufacturer}",
            "email":"kana@example.com","phoneNumber":"03-0000-0000","title":"Spring shelf"}}"#
    ))
    .expect("fixture sheet parses");
    sheet.products = products;
    sheet.attachments = vec![attachment(&format!("{id}-layout.pdf"))];
    sheet
}

/// Product IDs of `sheet` in order.
pub fn product_ids(sheet: &Sheet) -> Vec<String> {
    sheet.products.iter().map(|p| p.id.clone()).collect()
}
