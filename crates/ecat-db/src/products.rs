//! Database operations for `products` and its embedded variation list.
//!
//! Reads used by the HTTP layer are plain functions over any executor.
//! Writes go through [`PgProductStore`], which holds one transaction for a
//! whole catalog operation so a failed variation sync leaves nothing behind.
//! [`in_transaction`] runs such an operation and re-runs it when Postgres
//! aborts it as a deadlock victim or serialization failure.

use std::future::Future;

use chrono::{DateTime, Utc};
use ecat_core::{
    CatalogError, NewProduct, Product, ProductId, ProductPatch, ProductStore, VariationRef,
};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::DbError;

const PRODUCT_COLUMNS: &str = "id, name, slug, sku, barcode, parent_category, price, offer_price, \
     image, is_active, featured, self_variation_text, reverse_variation_text, variations, \
     attributes, version, created_at, updated_at";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub parent_category: String,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub image: Option<String>,
    pub is_active: bool,
    pub featured: bool,
    pub self_variation_text: Option<String>,
    pub reverse_variation_text: Option<String>,
    /// JSONB array of `{"product": "<uuid>", "variationText": "..."}`.
    pub variations: Json<Vec<VariationRef>>,
    pub attributes: serde_json::Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::from(row.id),
            name: row.name,
            slug: row.slug,
            sku: row.sku,
            barcode: row.barcode,
            parent_category: row.parent_category,
            price: row.price,
            offer_price: row.offer_price,
            image: row.image,
            is_active: row.is_active,
            featured: row.featured,
            self_variation_text: row.self_variation_text,
            reverse_variation_text: row.reverse_variation_text,
            variations: row.variations.0,
            attributes: row.attributes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetch one product by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product<'e, E>(executor: E, id: ProductId) -> Result<Option<Product>, DbError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
    let row = sqlx::query_as::<_, ProductRow>(&sql)
        .bind(id.as_uuid())
        .fetch_optional(executor)
        .await?;
    Ok(row.map(Product::from))
}

/// Fetch every product whose id is in `ids`, in no particular order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_products_by_ids<'e, E>(
    executor: E,
    ids: &[ProductId],
) -> Result<Vec<Product>, DbError>
where
    E: PgExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let uuids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
    let rows = sqlx::query_as::<_, ProductRow>(&sql)
        .bind(uuids)
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(Product::from).collect())
}

/// Newest products first, at most `limit` rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_products(pool: &PgPool, limit: i64) -> Result<Vec<Product>, DbError> {
    let sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    );
    let rows = sqlx::query_as::<_, ProductRow>(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Product::from).collect())
}

/// Ids of every product, oldest first. Used by bulk re-sync.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_product_ids(pool: &PgPool) -> Result<Vec<ProductId>, DbError> {
    let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM products ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(ProductId::from).collect())
}

// ---------------------------------------------------------------------------
// Transactional store
// ---------------------------------------------------------------------------

/// [`ProductStore`] over a single Postgres transaction.
///
/// Nothing is visible to other connections until [`PgProductStore::commit`];
/// dropping the store rolls the transaction back.
pub struct PgProductStore {
    tx: Transaction<'static, Postgres>,
}

impl PgProductStore {
    /// Open a transaction on `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if no connection can be acquired.
    pub async fn begin(pool: &PgPool) -> Result<Self, DbError> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    /// Commit every write made through this store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the commit fails.
    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Run `op` on a fresh [`PgProductStore`] and commit the store it hands back.
///
/// When Postgres aborts the transaction with a deadlock or serialization
/// failure ([`DbError::is_retryable`]), the whole operation is re-run on a
/// new transaction, up to `max_attempts` runs in total. Once they are used
/// up the last such error is returned.
///
/// # Errors
///
/// Returns the error `op` fails with, or [`CatalogError::Store`] if the
/// transaction cannot be opened or committed.
pub async fn in_transaction<T, F, Fut>(
    pool: &PgPool,
    max_attempts: u32,
    mut op: F,
) -> Result<T, CatalogError<DbError>>
where
    F: FnMut(PgProductStore) -> Fut,
    Fut: Future<Output = Result<(PgProductStore, T), CatalogError<DbError>>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let store = PgProductStore::begin(pool)
            .await
            .map_err(CatalogError::Store)?;
        // on error `op` has dropped the store, which rolls back
        let outcome = match op(store).await {
            Ok((store, value)) => store
                .commit()
                .await
                .map(|()| value)
                .map_err(CatalogError::Store),
            Err(e) => Err(e),
        };

        match outcome {
            Err(CatalogError::Store(e)) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, error = %e, "transaction aborted by postgres; retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl ProductStore for PgProductStore {
    type Error = DbError;

    async fn find_by_id(&mut self, id: ProductId) -> Result<Option<Product>, DbError> {
        get_product(&mut *self.tx, id).await
    }

    async fn find_referencing(&mut self, id: ProductId) -> Result<Vec<Product>, DbError> {
        // containment on the jsonb_path_ops GIN index
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE variations @> jsonb_build_array(jsonb_build_object('product', $1::text)) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id.to_string())
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<(), DbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let uuids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        // LockRows sits above the sort, so rows are locked in id order
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(uuids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert(&mut self, product: &NewProduct) -> Result<Product, DbError> {
        let sql = format!(
            "INSERT INTO products \
               (name, slug, sku, barcode, parent_category, price, offer_price, image, \
                is_active, featured, self_variation_text, reverse_variation_text, attributes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(&product.name)
            .bind(&product.slug)
            .bind(&product.sku)
            .bind(&product.barcode)
            .bind(&product.parent_category)
            .bind(product.price)
            .bind(product.offer_price)
            .bind(&product.image)
            .bind(product.is_active)
            .bind(product.featured)
            .bind(&product.self_variation_text)
            .bind(&product.reverse_variation_text)
            .bind(&product.attributes)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.into())
    }

    async fn update_fields(
        &mut self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, DbError> {
        // Nullable columns take a "supplied" flag plus the value, so that
        // Some(None) can clear a column while None keeps it.
        let sql = format!(
            "UPDATE products \
             SET name                   = COALESCE($2, name), \
                 slug                   = COALESCE($3, slug), \
                 sku                    = CASE WHEN $4::BOOL  THEN $5  ELSE sku END, \
                 barcode                = CASE WHEN $6::BOOL  THEN $7  ELSE barcode END, \
                 parent_category        = COALESCE($8, parent_category), \
                 price                  = CASE WHEN $9::BOOL  THEN $10 ELSE price END, \
                 offer_price            = CASE WHEN $11::BOOL THEN $12 ELSE offer_price END, \
                 image                  = CASE WHEN $13::BOOL THEN $14 ELSE image END, \
                 is_active              = COALESCE($15, is_active), \
                 featured               = COALESCE($16, featured), \
                 self_variation_text    = CASE WHEN $17::BOOL THEN $18 ELSE self_variation_text END, \
                 reverse_variation_text = CASE WHEN $19::BOOL THEN $20 ELSE reverse_variation_text END, \
                 attributes             = COALESCE($21, attributes), \
                 version                = version + 1, \
                 updated_at             = NOW() \
             WHERE id = $1 \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id.as_uuid())
            .bind(patch.name.as_deref())
            .bind(patch.slug.as_deref())
            .bind(patch.sku.is_some())
            .bind(patch.sku.clone().flatten())
            .bind(patch.barcode.is_some())
            .bind(patch.barcode.clone().flatten())
            .bind(patch.parent_category.as_deref())
            .bind(patch.price.is_some())
            .bind(patch.price.flatten())
            .bind(patch.offer_price.is_some())
            .bind(patch.offer_price.flatten())
            .bind(patch.image.is_some())
            .bind(patch.image.clone().flatten())
            .bind(patch.is_active)
            .bind(patch.featured)
            .bind(patch.self_variation_text.is_some())
            .bind(patch.self_variation_text.clone().flatten())
            .bind(patch.reverse_variation_text.is_some())
            .bind(patch.reverse_variation_text.clone().flatten())
            .bind(patch.attributes.as_ref())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Product::from))
    }

    async fn save_variations(
        &mut self,
        id: ProductId,
        expected_version: i64,
        variations: &[VariationRef],
    ) -> Result<Option<i64>, DbError> {
        let version = sqlx::query_scalar::<_, i64>(
            "UPDATE products \
             SET variations = $3, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING version",
        )
        .bind(id.as_uuid())
        .bind(expected_version)
        .bind(Json(variations))
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(version)
    }

    async fn remove_references_to(&mut self, id: ProductId) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE products \
             SET variations = COALESCE( \
                     (SELECT jsonb_agg(e.elem ORDER BY e.ord) \
                      FROM jsonb_array_elements(variations) WITH ORDINALITY AS e(elem, ord) \
                      WHERE e.elem->>'product' <> $1), \
                     '[]'::jsonb), \
                 version = version + 1, \
                 updated_at = NOW() \
             WHERE variations @> jsonb_build_array(jsonb_build_object('product', $1::text))",
        )
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await?;
        tracing::debug!(product = %id, detached = result.rows_affected(), "references removed");
        Ok(result.rows_affected())
    }

    async fn delete(&mut self, id: ProductId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
