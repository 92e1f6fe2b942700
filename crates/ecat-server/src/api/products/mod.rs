//! Product read handlers. Write handlers live in `write`.

mod types;
mod write;

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use ecat_core::{variations, Product, ProductId};
use ecat_db::PgProductStore;

use crate::middleware::RequestId;

use super::{
    map_catalog_error, map_db_error, normalize_limit, not_found, ApiError, ApiResponse, AppState,
};
use types::{ListProductsQuery, ProductView, VariationGroupView};

pub(super) use write::{create_product, delete_product, duplicate_product, update_product};

/// Parse a path segment into a product id.
fn parse_product_id(request_id: &str, raw: &str) -> Result<ProductId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::new(
            request_id,
            "bad_request",
            format!("'{raw}' is not a valid product id"),
        )
    })
}

/// Resolve the variation lists of `products` with one lookup and build views.
async fn populate(
    pool: &sqlx::PgPool,
    request_id: &str,
    products: Vec<Product>,
) -> Result<Vec<ProductView>, ApiError> {
    let mut seen = HashSet::new();
    let ids: Vec<ProductId> = products
        .iter()
        .flat_map(Product::variation_ids)
        .filter(|id| seen.insert(*id))
        .collect();
    let targets = ecat_db::get_products_by_ids(pool, &ids)
        .await
        .map_err(|e| map_db_error(request_id.to_owned(), &e))?;

    Ok(products
        .into_iter()
        .map(|product| {
            let wanted: Vec<Product> = targets
                .iter()
                .filter(|t| product.links_to(t.id))
                .cloned()
                .collect();
            let linked = variations::join_linked(&product, wanted);
            ProductView::new(product, linked)
        })
        .collect())
}

/// GET /api/products: newest first.
pub(super) async fn list_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ListProductsQuery>,
) -> Result<Json<ApiResponse<Vec<ProductView>>>, ApiError> {
    let rid = &req_id.0;
    let products = ecat_db::list_products(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let data = populate(&state.pool, rid, products).await?;

    Ok(Json(ApiResponse::new(data, req_id.0)))
}

/// GET /api/products/{id}: one product with populated variations.
pub(super) async fn get_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse<ProductView>>, ApiError> {
    let rid = &req_id.0;
    let id = parse_product_id(rid, &raw_id)?;
    let product = ecat_db::get_product(&state.pool, id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| not_found(rid, id))?;

    let view = populate(&state.pool, rid, vec![product])
        .await?
        .pop()
        .ok_or_else(|| not_found(rid, id))?;

    Ok(Json(ApiResponse::new(view, req_id.0)))
}

/// GET /api/products/{id}/variation-group: the reachable group and its audit.
pub(super) async fn get_variation_group(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse<VariationGroupView>>, ApiError> {
    let rid = &req_id.0;
    let id = parse_product_id(rid, &raw_id)?;

    let mut store = PgProductStore::begin(&state.pool)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let (members, audit) = variations::inspect_group(&mut store, id)
        .await
        .map_err(|e| map_catalog_error(rid, e))?;
    store
        .commit()
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    if !audit.is_consistent() {
        tracing::warn!(
            product = %id,
            asymmetric = audit.asymmetric.len(),
            dangling = audit.dangling.len(),
            "variation group is out of sync"
        );
    }

    Ok(Json(ApiResponse::new(
        VariationGroupView {
            members: members.into_iter().map(Into::into).collect(),
            audit: audit.into(),
        },
        req_id.0,
    )))
}
