//! Product write handlers: create, update, duplicate, delete.
//!
//! Each handler runs the whole catalog operation, variation sync included,
//! through [`ecat_db::in_transaction`]: one transaction per attempt,
//! committed only on success and re-run if Postgres aborts it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ecat_core::{
    catalog, variations, CatalogError, LinkedVariation, Product, ProductInput, ProductPatch,
};
use ecat_db::{DbError, PgProductStore};

use crate::middleware::RequestId;

use super::super::{map_catalog_error, ApiError, ApiResponse, AppState};
use super::parse_product_id;
use super::types::{CreateProductRequest, DeletedProductView, ProductView, UpdateProductRequest};

type Written<T> = Result<(PgProductStore, T), CatalogError<DbError>>;

/// Resolve the variation list inside the transaction and hand the store back.
async fn with_linked<R>(
    mut store: PgProductStore,
    product: Product,
    report: R,
) -> Written<(Product, Vec<LinkedVariation>, R)> {
    let linked = variations::linked_variations(&mut store, &product).await?;
    Ok((store, (product, linked, report)))
}

/// POST /api/products: create a product and link its variations.
pub(in crate::api) async fn create_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductView>>), ApiError> {
    let rid = &req_id.0;
    let input = ProductInput::from(body);
    let policy = state.sync_policy;

    let (product, linked, report) =
        ecat_db::in_transaction(&state.pool, policy.max_attempts, |mut store| {
            let input = input.clone();
            async move {
                let (product, report) = catalog::create_product(&mut store, input, policy).await?;
                with_linked(store, product, report).await
            }
        })
        .await
        .map_err(|e| map_catalog_error(rid, e))?;

    let view = ProductView::new(product, linked).with_sync(Some(report));
    Ok((StatusCode::CREATED, Json(ApiResponse::new(view, req_id.0))))
}

/// PUT /api/products/{id}: sparse update; re-links only when `variations` is sent.
pub(in crate::api) async fn update_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
    Json(body): Json<UpdateProductRequest>,
) -> Result<Json<ApiResponse<ProductView>>, ApiError> {
    let rid = &req_id.0;
    let id = parse_product_id(rid, &raw_id)?;
    let patch = ProductPatch::from(body);
    let policy = state.sync_policy;

    let (product, linked, report) =
        ecat_db::in_transaction(&state.pool, policy.max_attempts, |mut store| {
            let patch = patch.clone();
            async move {
                let (product, report) =
                    catalog::update_product(&mut store, id, patch, policy).await?;
                with_linked(store, product, report).await
            }
        })
        .await
        .map_err(|e| map_catalog_error(rid, e))?;

    let view = ProductView::new(product, linked).with_sync(report);
    Ok(Json(ApiResponse::new(view, req_id.0)))
}

/// POST /api/products/{id}/duplicate: clone into the source's variation group.
pub(in crate::api) async fn duplicate_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<ProductView>>), ApiError> {
    let rid = &req_id.0;
    let id = parse_product_id(rid, &raw_id)?;
    let policy = state.sync_policy;

    let (clone, linked, report) =
        ecat_db::in_transaction(&state.pool, policy.max_attempts, |mut store| async move {
            let (clone, report) = catalog::duplicate_product(&mut store, id, policy).await?;
            with_linked(store, clone, report).await
        })
        .await
        .map_err(|e| map_catalog_error(rid, e))?;

    let view = ProductView::new(clone, linked).with_sync(Some(report));
    Ok((StatusCode::CREATED, Json(ApiResponse::new(view, req_id.0))))
}

/// DELETE /api/products/{id}: detach every reference, then delete.
pub(in crate::api) async fn delete_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse<DeletedProductView>>, ApiError> {
    let rid = &req_id.0;
    let id = parse_product_id(rid, &raw_id)?;

    let detached = ecat_db::in_transaction(
        &state.pool,
        state.sync_policy.max_attempts,
        |mut store| async move {
            let detached = catalog::delete_product(&mut store, id).await?;
            Ok::<_, CatalogError<DbError>>((store, detached))
        },
    )
    .await
    .map_err(|e| map_catalog_error(rid, e))?;

    Ok(Json(ApiResponse::new(
        DeletedProductView {
            id,
            deleted: true,
            detached,
        },
        req_id.0,
    )))
}
