//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ManufacturerRepo, SheetRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SheetRepo + ManufacturerRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Cascades and the attachment owner check depend on this.
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes writers instead of failing with
        // "database is locked".
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "opened sqlite metadata store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::aggregate::{
        ChildBatches, ManufacturerIds, assemble, check_sheet, incoming_product_ids, now_micros,
        persisted_view, position, resolve_product_ids, split_page, truncate_micros,
    };
    use crate::models::*;
    use shelfsheet_core::Sheet;
    use sqlx::{QueryBuilder, SqliteConnection};
    use std::collections::{HashMap, HashSet};
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Bound parameters per statement supported by every SQLite build.
    const MAX_BINDS: usize = 999;

    const SHEET_SELECT: &str = r#"
        SELECT s.sheet_id, s.creator_id, s.creator_name, m.name AS manufacturer_name,
               s.email, s.phone_number, s.title, s.notes, s.status, s.created_at, s.updated_at
        FROM sheets s
        JOIN manufacturers m ON m.manufacturer_id = s.manufacturer_id
    "#;

    const PRODUCT_SELECT: &str = r#"
        SELECT p.product_id, p.sheet_id, p.position, m.name AS manufacturer_name,
               p.shelf_name, p.jan_code, p.product_name, p.product_image,
               p.risk_classification, p.catch_copy, p.product_message, p.product_notes,
               p.width, p.height, p.depth, p.facing_count, p.arrival_date,
               p.has_promo_material, p.promo_sample, p.special_fixture,
               p.promo_width, p.promo_height, p.promo_depth, p.promo_image
        FROM products p
        JOIN manufacturers m ON m.manufacturer_id = p.manufacturer_id
    "#;

    /// Newest first; julianday() keeps ordering correct across the varying
    /// fractional-second widths of stored timestamps.
    const NEWEST_FIRST: &str = " ORDER BY julianday(s.created_at) DESC, s.sheet_id";

    fn push_in_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
        builder.push(" (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");
    }

    async fn find_or_create_manufacturer_in(
        conn: &mut SqliteConnection,
        name: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<ManufacturerRow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MetadataError::Constraint(
                "manufacturer name must not be blank".to_string(),
            ));
        }
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, ManufacturerRow>(
            r#"
            INSERT INTO manufacturers (manufacturer_id, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING manufacturer_id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    async fn fetch_products(
        conn: &mut SqliteConnection,
        sheet_ids: &[String],
    ) -> MetadataResult<Vec<ProductRow>> {
        let mut rows = Vec::new();
        for chunk in sheet_ids.chunks(MAX_BINDS) {
            let mut builder = QueryBuilder::<Sqlite>::new(PRODUCT_SELECT);
            builder.push(" WHERE p.sheet_id IN");
            push_in_list(&mut builder, chunk);
            rows.extend(
                builder
                    .build_query_as::<ProductRow>()
                    .fetch_all(&mut *conn)
                    .await?,
            );
        }
        Ok(rows)
    }

    async fn fetch_ingredients(
        conn: &mut SqliteConnection,
        sheet_ids: &[String],
    ) -> MetadataResult<Vec<IngredientRow>> {
        let mut rows = Vec::new();
        for chunk in sheet_ids.chunks(MAX_BINDS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT i.product_id, i.position, i.name FROM product_ingredients i \
                 JOIN products p ON p.product_id = i.product_id WHERE p.sheet_id IN",
            );
            push_in_list(&mut builder, chunk);
            rows.extend(
                builder
                    .build_query_as::<IngredientRow>()
                    .fetch_all(&mut *conn)
                    .await?,
            );
        }
        Ok(rows)
    }

    async fn fetch_attachments(
        conn: &mut SqliteConnection,
        sheet_ids: &[String],
    ) -> MetadataResult<Vec<AttachmentRow>> {
        let mut rows = Vec::new();
        // Two bind lists per statement.
        for chunk in sheet_ids.chunks(MAX_BINDS / 2) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT a.attachment_id, a.sheet_id, a.product_id, a.position, a.name, \
                 a.size_bytes, a.mime_type, a.url FROM attachments a \
                 LEFT JOIN products p ON p.product_id = a.product_id \
                 WHERE a.sheet_id IN",
            );
            push_in_list(&mut builder, chunk);
            builder.push(" OR p.sheet_id IN");
            push_in_list(&mut builder, chunk);
            rows.extend(
                builder
                    .build_query_as::<AttachmentRow>()
                    .fetch_all(&mut *conn)
                    .await?,
            );
        }
        Ok(rows)
    }

    async fn fetch_headers_before(
        conn: &mut SqliteConnection,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<SheetRow>> {
        let sql = format!(
            "{SHEET_SELECT} WHERE julianday(s.created_at) < julianday(?){NEWEST_FIRST}"
        );
        let rows = sqlx::query_as::<_, SheetRow>(&sql)
            .bind(cutoff)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn fetch_header(
        conn: &mut SqliteConnection,
        sheet_id: &str,
    ) -> MetadataResult<Option<SheetRow>> {
        let sql = format!("{SHEET_SELECT} WHERE s.sheet_id = ?");
        let row = sqlx::query_as::<_, SheetRow>(&sql)
            .bind(sheet_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Load children for `headers` sequentially on one connection (used
    /// inside transactions).
    async fn load_in(
        conn: &mut SqliteConnection,
        headers: Vec<SheetRow>,
    ) -> MetadataResult<Vec<Sheet>> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();
        let products = fetch_products(conn, &ids).await?;
        let ingredients = fetch_ingredients(conn, &ids).await?;
        let attachments = fetch_attachments(conn, &ids).await?;
        assemble(headers, products, ingredients, attachments)
    }

    async fn insert_ingredients(
        conn: &mut SqliteConnection,
        rows: &[IngredientRow],
    ) -> MetadataResult<()> {
        for chunk in rows.chunks(MAX_BINDS / 3) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO product_ingredients (product_id, position, name) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.product_id.as_str())
                    .push_bind(row.position)
                    .push_bind(row.name.as_str());
            });
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn insert_attachments(
        conn: &mut SqliteConnection,
        rows: &[AttachmentRow],
    ) -> MetadataResult<()> {
        for chunk in rows.chunks(MAX_BINDS / 8) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO attachments \
                 (attachment_id, sheet_id, product_id, position, name, size_bytes, mime_type, url) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.attachment_id)
                    .push_bind(row.sheet_id.as_deref())
                    .push_bind(row.product_id.as_deref())
                    .push_bind(row.position)
                    .push_bind(row.name.as_str())
                    .push_bind(row.size_bytes)
                    .push_bind(row.mime_type.as_str())
                    .push_bind(row.url.as_str());
            });
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn delete_products(conn: &mut SqliteConnection, ids: &[String]) -> MetadataResult<()> {
        for chunk in ids.chunks(MAX_BINDS) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM products WHERE product_id IN");
            push_in_list(&mut builder, chunk);
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn delete_sheet_rows(conn: &mut SqliteConnection, ids: &[String]) -> MetadataResult<()> {
        for chunk in ids.chunks(MAX_BINDS) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM sheets WHERE sheet_id IN");
            push_in_list(&mut builder, chunk);
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    impl SqliteStore {
        /// Assemble aggregates for `headers`, running the three child queries
        /// concurrently on the pool.
        async fn load(&self, headers: Vec<SheetRow>) -> MetadataResult<Vec<Sheet>> {
            if headers.is_empty() {
                return Ok(Vec::new());
            }
            let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();

            let products = async {
                let mut conn = self.pool.acquire().await?;
                let rows = fetch_products(&mut conn, &ids).await?;
                Ok::<_, MetadataError>(rows)
            };
            let ingredients = async {
                let mut conn = self.pool.acquire().await?;
                let rows = fetch_ingredients(&mut conn, &ids).await?;
                Ok::<_, MetadataError>(rows)
            };
            let attachments = async {
                let mut conn = self.pool.acquire().await?;
                let rows = fetch_attachments(&mut conn, &ids).await?;
                Ok::<_, MetadataError>(rows)
            };
            let (products, ingredients, attachments) =
                tokio::try_join!(products, ingredients, attachments)?;

            assemble(headers, products, ingredients, attachments)
        }

        async fn list_page(
            &self,
            manufacturer_name: Option<&str>,
            page: Page,
        ) -> MetadataResult<SheetPage> {
            let mut builder = QueryBuilder::<Sqlite>::new(SHEET_SELECT);
            if let Some(name) = manufacturer_name {
                builder.push(" WHERE m.name = ");
                builder.push_bind(name.trim());
            }
            builder.push(NEWEST_FIRST);
            // LIMIT -1 means unbounded in SQLite.
            builder.push(" LIMIT ");
            builder.push_bind(page.fetch_limit().unwrap_or(-1));
            builder.push(" OFFSET ");
            builder.push_bind(i64::from(page.offset));

            let headers = builder
                .build_query_as::<SheetRow>()
                .fetch_all(&self.pool)
                .await?;
            let (headers, has_more) = split_page(headers, page.limit);
            let sheets = self.load(headers).await?;
            Ok(SheetPage { sheets, has_more })
        }
    }

    #[async_trait]
    impl ManufacturerRepo for SqliteStore {
        async fn find_or_create_manufacturer(&self, name: &str) -> MetadataResult<ManufacturerRow> {
            let mut conn = self.pool.acquire().await?;
            find_or_create_manufacturer_in(&mut conn, name, now_micros()).await
        }

        async fn list_manufacturers(&self) -> MetadataResult<Vec<ManufacturerRow>> {
            let rows = sqlx::query_as::<_, ManufacturerRow>(
                "SELECT manufacturer_id, name, created_at FROM manufacturers ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl SheetRepo for SqliteStore {
        async fn upsert_sheet(&self, sheet: &Sheet) -> MetadataResult<Sheet> {
            check_sheet(sheet)?;
            let now = now_micros();
            let mut tx = self.pool.begin().await?;

            let mut manufacturers = ManufacturerIds::default();
            for name in sheet.manufacturer_names() {
                let row = find_or_create_manufacturer_in(&mut tx, &name, now).await?;
                manufacturers.insert(name, row.manufacturer_id);
            }

            let created_at: OffsetDateTime = sqlx::query_scalar(
                r#"
                INSERT INTO sheets (sheet_id, creator_id, creator_name, manufacturer_id, email,
                                    phone_number, title, notes, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(sheet_id) DO UPDATE SET
                    creator_id = excluded.creator_id,
                    creator_name = excluded.creator_name,
                    manufacturer_id = excluded.manufacturer_id,
                    email = excluded.email,
                    phone_number = excluded.phone_number,
                    title = excluded.title,
                    notes = excluded.notes,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                RETURNING created_at
                "#,
            )
            .bind(&sheet.id)
            .bind(&sheet.creator_id)
            .bind(&sheet.creator_name)
            .bind(manufacturers.get(&sheet.manufacturer_name)?)
            .bind(&sheet.email)
            .bind(&sheet.phone_number)
            .bind(&sheet.title)
            .bind(&sheet.notes)
            .bind(sheet.status.as_str())
            .bind(truncate_micros(sheet.created_at))
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let existing: Vec<String> =
                sqlx::query_scalar("SELECT product_id FROM products WHERE sheet_id = ?")
                    .bind(&sheet.id)
                    .fetch_all(&mut *tx)
                    .await?;

            let incoming = incoming_product_ids(&sheet.products);
            let mut owners = HashMap::new();
            for chunk in incoming.chunks(MAX_BINDS) {
                let mut builder = QueryBuilder::<Sqlite>::new(
                    "SELECT product_id, sheet_id FROM products WHERE product_id IN",
                );
                push_in_list(&mut builder, chunk);
                let rows: Vec<(String, String)> =
                    builder.build_query_as().fetch_all(&mut *tx).await?;
                owners.extend(rows);
            }
            let product_ids = resolve_product_ids(&sheet.id, &sheet.products, &owners);

            for (index, (product, product_id)) in
                sheet.products.iter().zip(&product_ids).enumerate()
            {
                let result = sqlx::query(
                    r#"
                    INSERT INTO products (product_id, sheet_id, position, manufacturer_id,
                        shelf_name, jan_code, product_name, product_image, risk_classification,
                        catch_copy, product_message, product_notes, width, height, depth,
                        facing_count, arrival_date, has_promo_material, promo_sample,
                        special_fixture, promo_width, promo_height, promo_depth, promo_image)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(product_id) DO UPDATE SET
                        position = excluded.position,
                        manufacturer_id = excluded.manufacturer_id,
                        shelf_name = excluded.shelf_name,
                        jan_code = excluded.jan_code,
                        product_name = excluded.product_name,
                        product_image = excluded.product_image,
                        risk_classification = excluded.risk_classification,
                        catch_copy = excluded.catch_copy,
                        product_message = excluded.product_message,
                        product_notes = excluded.product_notes,
                        width = excluded.width,
                        height = excluded.height,
                        depth = excluded.depth,
                        facing_count = excluded.facing_count,
                        arrival_date = excluded.arrival_date,
                        has_promo_material = excluded.has_promo_material,
                        promo_sample = excluded.promo_sample,
                        special_fixture = excluded.special_fixture,
                        promo_width = excluded.promo_width,
                        promo_height = excluded.promo_height,
                        promo_depth = excluded.promo_depth,
                        promo_image = excluded.promo_image
                    WHERE products.sheet_id = excluded.sheet_id
                    "#,
                )
                .bind(product_id)
                .bind(&sheet.id)
                .bind(position(index)?)
                .bind(manufacturers.get(&product.manufacturer_name)?)
                .bind(&product.shelf_name)
                .bind(&product.jan_code)
                .bind(&product.product_name)
                .bind(&product.product_image)
                .bind(&product.risk_classification)
                .bind(&product.catch_copy)
                .bind(&product.product_message)
                .bind(&product.product_notes)
                .bind(product.width)
                .bind(product.height)
                .bind(product.depth)
                .bind(product.facing_count)
                .bind(&product.arrival_date)
                .bind(product.has_promo_material.as_str())
                .bind(&product.promo_sample)
                .bind(&product.special_fixture)
                .bind(product.promo_width)
                .bind(product.promo_height)
                .bind(product.promo_depth)
                .bind(&product.promo_image)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(MetadataError::Constraint(format!(
                        "product {product_id} is owned by another sheet"
                    )));
                }
            }

            let kept: HashSet<&str> = product_ids.iter().map(String::as_str).collect();
            let dropped: Vec<String> = existing
                .into_iter()
                .filter(|id| !kept.contains(id.as_str()))
                .collect();
            delete_products(&mut tx, &dropped).await?;

            let batches = ChildBatches::build(sheet, &product_ids)?;

            sqlx::query(
                "DELETE FROM product_ingredients WHERE product_id IN \
                 (SELECT product_id FROM products WHERE sheet_id = ?)",
            )
            .bind(&sheet.id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "DELETE FROM attachments WHERE product_id IN \
                 (SELECT product_id FROM products WHERE sheet_id = ?)",
            )
            .bind(&sheet.id)
            .execute(&mut *tx)
            .await?;
            insert_ingredients(&mut tx, &batches.ingredients).await?;
            insert_attachments(&mut tx, &batches.product_attachments).await?;

            sqlx::query("DELETE FROM attachments WHERE sheet_id = ?")
                .bind(&sheet.id)
                .execute(&mut *tx)
                .await?;
            insert_attachments(&mut tx, &batches.sheet_attachments).await?;

            tx.commit().await?;

            tracing::debug!(
                sheet_id = %sheet.id,
                products = product_ids.len(),
                dropped_products = dropped.len(),
                "upserted sheet"
            );
            Ok(persisted_view(sheet, &product_ids, created_at, now))
        }

        async fn get_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>> {
            let mut conn = self.pool.acquire().await?;
            let header = fetch_header(&mut conn, sheet_id).await?;
            drop(conn);
            let Some(header) = header else {
                return Ok(None);
            };
            Ok(self.load(vec![header]).await?.pop())
        }

        async fn list_sheets(&self, page: Page) -> MetadataResult<SheetPage> {
            self.list_page(None, page).await
        }

        async fn list_sheets_by_manufacturer(
            &self,
            manufacturer_name: &str,
            page: Page,
        ) -> MetadataResult<SheetPage> {
            self.list_page(Some(manufacturer_name), page).await
        }

        async fn delete_sheet(&self, sheet_id: &str) -> MetadataResult<Option<Sheet>> {
            let mut tx = self.pool.begin().await?;
            let Some(header) = fetch_header(&mut tx, sheet_id).await? else {
                return Ok(None);
            };
            let removed = load_in(&mut tx, vec![header]).await?.pop();
            sqlx::query("DELETE FROM sheets WHERE sheet_id = ?")
                .bind(sheet_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(removed)
        }

        async fn delete_sheets_created_before(
            &self,
            cutoff: OffsetDateTime,
        ) -> MetadataResult<Vec<Sheet>> {
            let mut tx = self.pool.begin().await?;
            let headers = fetch_headers_before(&mut tx, cutoff).await?;
            let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();
            let removed = load_in(&mut tx, headers).await?;
            delete_sheet_rows(&mut tx, &ids).await?;
            tx.commit().await?;
            Ok(removed)
        }
    }
}

impl std::convert::From<std::io::Error> for crate::MetadataError {
    fn from(e: std::io::Error) -> Self {
        crate::MetadataError::Config(e.to_string())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS manufacturers (
    manufacturer_id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sheets (
    sheet_id TEXT PRIMARY KEY,
    creator_id TEXT NOT NULL,
    creator_name TEXT NOT NULL,
    manufacturer_id BLOB NOT NULL REFERENCES manufacturers(manufacturer_id),
    email TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    title TEXT NOT NULL,
    notes TEXT,
    status TEXT NOT NULL CHECK (status IN ('draft', 'completed')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sheets_created_at ON sheets(created_at);
CREATE INDEX IF NOT EXISTS idx_sheets_manufacturer ON sheets(manufacturer_id);

CREATE TABLE IF NOT EXISTS products (
    product_id TEXT PRIMARY KEY,
    sheet_id TEXT NOT NULL REFERENCES sheets(sheet_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    manufacturer_id BLOB NOT NULL REFERENCES manufacturers(manufacturer_id),
    shelf_name TEXT NOT NULL,
    jan_code TEXT NOT NULL,
    product_name TEXT NOT NULL,
    product_image TEXT,
    risk_classification TEXT,
    catch_copy TEXT,
    product_message TEXT,
    product_notes TEXT,
    width REAL NOT NULL,
    height REAL NOT NULL,
    depth REAL NOT NULL,
    facing_count INTEGER NOT NULL,
    arrival_date TEXT,
    has_promo_material TEXT NOT NULL CHECK (has_promo_material IN ('yes', 'no')),
    promo_sample TEXT,
    special_fixture TEXT,
    promo_width REAL,
    promo_height REAL,
    promo_depth REAL,
    promo_image TEXT
);
CREATE INDEX IF NOT EXISTS idx_products_sheet ON products(sheet_id);

CREATE TABLE IF NOT EXISTS product_ingredients (
    product_id TEXT NOT NULL REFERENCES products(product_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (product_id, name)
);

-- Exactly one owner per attachment.
CREATE TABLE IF NOT EXISTS attachments (
    attachment_id BLOB PRIMARY KEY,
    sheet_id TEXT REFERENCES sheets(sheet_id) ON DELETE CASCADE,
    product_id TEXT REFERENCES products(product_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    mime_type TEXT NOT NULL,
    url TEXT NOT NULL,
    CHECK ((sheet_id IS NULL) <> (product_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_attachments_sheet ON attachments(sheet_id);
CREATE INDEX IF NOT EXISTS idx_attachments_product ON attachments(product_id);
"#;
