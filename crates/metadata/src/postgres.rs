//! PostgreSQL-based metadata store implementation.

use crate::aggregate::{
    ChildBatches, ManufacturerIds, assemble, check_sheet, incoming_product_ids, now_micros,
    persisted_view, position, resolve_product_ids, split_page, truncate_micros,
};
use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ManufacturerRepo, SheetRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use shelfsheet_core::Sheet;
use shelfsheet_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Executor, PgConnection, Pool, Postgres, QueryBuilder};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

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
    WHERE p.sheet_id = ANY($1)
"#;

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from the environment.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Assemble aggregates for `headers`; the three child queries run
    /// concurrently on the pool.
    async fn load(&self, headers: Vec<SheetRow>) -> MetadataResult<Vec<Sheet>> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();
        let (products, ingredients, attachments) = tokio::try_join!(
            fetch_products(&self.pool, &ids),
            fetch_ingredients(&self.pool, &ids),
            fetch_attachments(&self.pool, &ids),
        )?;
        assemble(headers, products, ingredients, attachments)
    }

    async fn list_page(
        &self,
        manufacturer_name: Option<&str>,
        page: Page,
    ) -> MetadataResult<SheetPage> {
        let mut builder = QueryBuilder::<Postgres>::new(SHEET_SELECT);
        if let Some(name) = manufacturer_name {
            builder.push(" WHERE m.name = ");
            builder.push_bind(name.trim());
        }
        // LIMIT NULL means unbounded.
        builder.push(" ORDER BY s.created_at DESC, s.sheet_id LIMIT ");
        builder.push_bind(page.fetch_limit());
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

async fn fetch_products<'e, E>(executor: E, sheet_ids: &[String]) -> MetadataResult<Vec<ProductRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, ProductRow>(PRODUCT_SELECT)
        .bind(sheet_ids)
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

async fn fetch_ingredients<'e, E>(
    executor: E,
    sheet_ids: &[String],
) -> MetadataResult<Vec<IngredientRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, IngredientRow>(
        r#"
        SELECT i.product_id, i.position, i.name
        FROM product_ingredients i
        JOIN products p ON p.product_id = i.product_id
        WHERE p.sheet_id = ANY($1)
        "#,
    )
    .bind(sheet_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

async fn fetch_attachments<'e, E>(
    executor: E,
    sheet_ids: &[String],
) -> MetadataResult<Vec<AttachmentRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, AttachmentRow>(
        r#"
        SELECT a.attachment_id, a.sheet_id, a.product_id, a.position, a.name,
               a.size_bytes, a.mime_type, a.url
        FROM attachments a
        LEFT JOIN products p ON p.product_id = a.product_id
        WHERE a.sheet_id = ANY($1) OR p.sheet_id = ANY($1)
        "#,
    )
    .bind(sheet_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

async fn fetch_header<'e, E>(executor: E, sheet_id: &str) -> MetadataResult<Option<SheetRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("{SHEET_SELECT} WHERE s.sheet_id = $1");
    let row = sqlx::query_as::<_, SheetRow>(&sql)
        .bind(sheet_id)
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Sequential child load on one connection (inside transactions).
async fn load_in(conn: &mut PgConnection, headers: Vec<SheetRow>) -> MetadataResult<Vec<Sheet>> {
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();
    let products = fetch_products(&mut *conn, &ids).await?;
    let ingredients = fetch_ingredients(&mut *conn, &ids).await?;
    let attachments = fetch_attachments(&mut *conn, &ids).await?;
    assemble(headers, products, ingredients, attachments)
}

async fn find_or_create_manufacturer_in<'e, E>(
    executor: E,
    name: &str,
    now: OffsetDateTime,
) -> MetadataResult<ManufacturerRow>
where
    E: Executor<'e, Database = Postgres>,
{
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
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING manufacturer_id, name, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

async fn insert_ingredients(conn: &mut PgConnection, rows: &[IngredientRow]) -> MetadataResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let product_ids: Vec<&str> = rows.iter().map(|r| r.product_id.as_str()).collect();
    let positions: Vec<i32> = rows.iter().map(|r| r.position).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    sqlx::query(
        r#"
        INSERT INTO product_ingredients (product_id, position, name)
        SELECT * FROM UNNEST($1::text[], $2::int4[], $3::text[])
        "#,
    )
    .bind(&product_ids)
    .bind(&positions)
    .bind(&names)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_attachments(conn: &mut PgConnection, rows: &[AttachmentRow]) -> MetadataResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.attachment_id).collect();
    let sheet_ids: Vec<Option<String>> = rows.iter().map(|r| r.sheet_id.clone()).collect();
    let product_ids: Vec<Option<String>> = rows.iter().map(|r| r.product_id.clone()).collect();
    let positions: Vec<i32> = rows.iter().map(|r| r.position).collect();
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    let sizes: Vec<i64> = rows.iter().map(|r| r.size_bytes).collect();
    let mime_types: Vec<&str> = rows.iter().map(|r| r.mime_type.as_str()).collect();
    let urls: Vec<&str> = rows.iter().map(|r| r.url.as_str()).collect();
    sqlx::query(
        r#"
        INSERT INTO attachments
            (attachment_id, sheet_id, product_id, position, name, size_bytes, mime_type, url)
        SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::int4[],
                             $5::text[], $6::int8[], $7::text[], $8::text[])
        "#,
    )
    .bind(&ids)
    .bind(&sheet_ids)
    .bind(&product_ids)
    .bind(&positions)
    .bind(&names)
    .bind(&sizes)
    .bind(&mime_types)
    .bind(&urls)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements hold one statement each.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ManufacturerRepo for PostgresStore {
    async fn find_or_create_manufacturer(&self, name: &str) -> MetadataResult<ManufacturerRow> {
        find_or_create_manufacturer_in(&self.pool, name, now_micros()).await
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
impl SheetRepo for PostgresStore {
    async fn upsert_sheet(&self, sheet: &Sheet) -> MetadataResult<Sheet> {
        check_sheet(sheet)?;
        let now = now_micros();
        let mut tx = self.pool.begin().await?;

        let mut manufacturers = ManufacturerIds::default();
        for name in sheet.manufacturer_names() {
            let row = find_or_create_manufacturer_in(&mut *tx, &name, now).await?;
            manufacturers.insert(name, row.manufacturer_id);
        }

        let created_at: OffsetDateTime = sqlx::query_scalar(
            r#"
            INSERT INTO sheets (sheet_id, creator_id, creator_name, manufacturer_id, email,
                                phone_number, title, notes, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (sheet_id) DO UPDATE SET
                creator_id = EXCLUDED.creator_id,
                creator_name = EXCLUDED.creator_name,
                manufacturer_id = EXCLUDED.manufacturer_id,
                email = EXCLUDED.email,
                phone_number = EXCLUDED.phone_number,
                title = EXCLUDED.title,
                notes = EXCLUDED.notes,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
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
            sqlx::query_scalar("SELECT product_id FROM products WHERE sheet_id = $1")
                .bind(&sheet.id)
                .fetch_all(&mut *tx)
                .await?;

        let incoming = incoming_product_ids(&sheet.products);
        let owners: HashMap<String, String> = if incoming.is_empty() {
            HashMap::new()
        } else {
            sqlx::query_as::<_, (String, String)>(
                "SELECT product_id, sheet_id FROM products WHERE product_id = ANY($1)",
            )
            .bind(&incoming)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect()
        };
        let product_ids = resolve_product_ids(&sheet.id, &sheet.products, &owners);

        for (index, (product, product_id)) in sheet.products.iter().zip(&product_ids).enumerate() {
            let result = sqlx::query(
                r#"
                INSERT INTO products (product_id, sheet_id, position, manufacturer_id,
                    shelf_name, jan_code, product_name, product_image, risk_classification,
                    catch_copy, product_message, product_notes, width, height, depth,
                    facing_count, arrival_date, has_promo_material, promo_sample,
                    special_fixture, promo_width, promo_height, promo_depth, promo_image)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20, $21, $22, $23, $24)
                ON CONFLICT (product_id) DO UPDATE SET
                    position = EXCLUDED.position,
                    manufacturer_id = EXCLUDED.manufacturer_id,
                    shelf_name = EXCLUDED.shelf_name,
                    jan_code = EXCLUDED.jan_code,
                    product_name = EXCLUDED.product_name,
                    product_image = EXCLUDED.product_image,
                    risk_classification = EXCLUDED.risk_classification,
                    catch_copy = EXCLUDED.catch_copy,
                    product_message = EXCLUDED.product_message,
                    product_notes = EXCLUDED.product_notes,
                    width = EXCLUDED.width,
                    height = EXCLUDED.height,
                    depth = EXCLUDED.depth,
                    facing_count = EXCLUDED.facing_count,
                    arrival_date = EXCLUDED.arrival_date,
                    has_promo_material = EXCLUDED.has_promo_material,
                    promo_sample = EXCLUDED.promo_sample,
                    special_fixture = EXCLUDED.special_fixture,
                    promo_width = EXCLUDED.promo_width,
                    promo_height = EXCLUDED.promo_height,
                    promo_depth = EXCLUDED.promo_depth,
                    promo_image = EXCLUDED.promo_image
                WHERE products.sheet_id = EXCLUDED.sheet_id
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
        if !dropped.is_empty() {
            sqlx::query("DELETE FROM products WHERE product_id = ANY($1)")
                .bind(&dropped)
                .execute(&mut *tx)
                .await?;
        }

        let batches = ChildBatches::build(sheet, &product_ids)?;

        sqlx::query(
            "DELETE FROM product_ingredients WHERE product_id IN \
             (SELECT product_id FROM products WHERE sheet_id = $1)",
        )
        .bind(&sheet.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM attachments WHERE product_id IN \
             (SELECT product_id FROM products WHERE sheet_id = $1)",
        )
        .bind(&sheet.id)
        .execute(&mut *tx)
        .await?;
        insert_ingredients(&mut tx, &batches.ingredients).await?;
        insert_attachments(&mut tx, &batches.product_attachments).await?;

        sqlx::query("DELETE FROM attachments WHERE sheet_id = $1")
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
        let Some(header) = fetch_header(&self.pool, sheet_id).await? else {
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
        let Some(header) = fetch_header(&mut *tx, sheet_id).await? else {
            return Ok(None);
        };
        let removed = load_in(&mut tx, vec![header]).await?.pop();
        sqlx::query("DELETE FROM sheets WHERE sheet_id = $1")
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
        let sql = format!("{SHEET_SELECT} WHERE s.created_at < $1 ORDER BY s.created_at DESC, s.sheet_id");
        let headers = sqlx::query_as::<_, SheetRow>(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await?;
        let ids: Vec<String> = headers.iter().map(|h| h.sheet_id.clone()).collect();
        let removed = load_in(&mut tx, headers).await?;
        if !ids.is_empty() {
            sqlx::query("DELETE FROM sheets WHERE sheet_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_statements() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        assert!(statements.iter().all(|s| !s.trim().is_empty()));
        assert!(
            statements
                .iter()
                .any(|s| s.contains("CREATE TABLE IF NOT EXISTS attachments"))
        );
        assert!(statements.iter().any(|s| s.contains("attachments_single_owner")));
    }

    #[test]
    fn comment_only_fragments_are_dropped() {
        let statements = postgres_schema_statements("-- only a comment\n;\nSELECT 1;\n");
        assert_eq!(statements, ["SELECT 1"]);
    }
}
