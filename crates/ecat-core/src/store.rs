//! Store port for product persistence.
//!
//! The variation sync only needs a handful of document operations; they are
//! collected here so the same routines run against Postgres and the
//! in-process store used by tests.

use std::future::Future;

use crate::products::{NewProduct, Product, ProductId, ProductPatch, VariationRef};

/// Document-store operations over products.
///
/// Methods take `&mut self` so an implementation can wrap a single
/// transaction. Every write bumps the product's `version`.
pub trait ProductStore: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load one product, or `None` if no product has that id.
    fn find_by_id(
        &mut self,
        id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, Self::Error>> + Send;

    /// All products whose variation list references `id`.
    fn find_referencing(
        &mut self,
        id: ProductId,
    ) -> impl Future<Output = Result<Vec<Product>, Self::Error>> + Send;

    /// Hold write locks on every product in `ids` until the store's unit of
    /// work ends. `ids` arrive sorted and deduplicated, and implementations
    /// must acquire the locks in that order. Unknown ids are ignored.
    ///
    /// Callers pass a write's whole lock set in one call, before mutating.
    fn lock_products(
        &mut self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Insert a new product with an empty variation list and a fresh id.
    fn insert(
        &mut self,
        product: &NewProduct,
    ) -> impl Future<Output = Result<Product, Self::Error>> + Send;

    /// Overlay the scalar fields of `patch` onto a product.
    ///
    /// Returns `None` if the product does not exist.
    fn update_fields(
        &mut self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> impl Future<Output = Result<Option<Product>, Self::Error>> + Send;

    /// Replace a product's variation list if its version still equals
    /// `expected_version`.
    ///
    /// Returns the new version, or `None` when the product changed (or
    /// vanished) since it was read.
    fn save_variations(
        &mut self,
        id: ProductId,
        expected_version: i64,
        variations: &[VariationRef],
    ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send;

    /// Remove every reference to `id` from every product's variation list.
    ///
    /// Returns the number of products changed.
    fn remove_references_to(
        &mut self,
        id: ProductId,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Delete a product. Returns `true` if it existed.
    fn delete(&mut self, id: ProductId) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
