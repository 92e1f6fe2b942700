//! Product write operations: validate, persist, then sync the variation graph.
//!
//! Each function performs the whole logical request against one store. With
//! the Postgres store that store is a single transaction, so the caller
//! decides whether everything commits.

use thiserror::Error;
use uuid::Uuid;

use crate::products::{NewProduct, Product, ProductId, ProductInput, ProductPatch};
use crate::store::ProductStore;
use crate::variations::{self, SyncPolicy, SyncReport};
use crate::CoreError;

#[derive(Debug, Error)]
pub enum CatalogError<E> {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("product {0} not found")]
    NotFound(ProductId),
    #[error("product {0} kept changing during variation sync")]
    Contended(ProductId),
    #[error(transparent)]
    Store(E),
}

impl<E> From<CoreError> for CatalogError<E> {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
        }
    }
}

/// Validate and insert a product, then link it with its requested variations.
///
/// # Errors
///
/// Returns [`CatalogError::Validation`] before any write when the input is
/// invalid; otherwise see [`variations::link`].
pub async fn create_product<S: ProductStore>(
    store: &mut S,
    input: ProductInput,
    policy: SyncPolicy,
) -> Result<(Product, SyncReport), CatalogError<S::Error>> {
    let (draft, requested) = input.validate()?;
    let product = store.insert(&draft).await.map_err(CatalogError::Store)?;
    tracing::info!(product = %product.id, slug = %product.slug, "product created");

    let report = variations::link(store, product.id, &requested, policy).await?;
    let product = reload(store, product.id).await?;
    Ok((product, report))
}

/// Apply a sparse update. The variation graph is re-synced only when the
/// patch carries a variation list.
///
/// # Errors
///
/// Returns [`CatalogError::Validation`] before any write when the patch is
/// invalid, [`CatalogError::NotFound`] for an unknown id; otherwise see
/// [`variations::relink`].
pub async fn update_product<S: ProductStore>(
    store: &mut S,
    id: ProductId,
    patch: ProductPatch,
    policy: SyncPolicy,
) -> Result<(Product, Option<SyncReport>), CatalogError<S::Error>> {
    let patch = patch.validate()?;
    if let Some(ref requested) = patch.variations {
        variations::lock_for_relink(store, id, requested).await?;
    }

    if patch.touches_fields() {
        store
            .update_fields(id, &patch)
            .await
            .map_err(CatalogError::Store)?
            .ok_or(CatalogError::NotFound(id))?;
    } else {
        reload(store, id).await?;
    }

    let report = match patch.variations {
        Some(ref requested) => Some(variations::relink(store, id, requested, policy).await?),
        None => None,
    };

    let product = reload(store, id).await?;
    tracing::info!(product = %id, resynced = report.is_some(), "product updated");
    Ok((product, report))
}

/// Clone a product and make the clone a member of the source's variation group.
///
/// # Errors
///
/// Returns [`CatalogError::NotFound`] for an unknown source; otherwise see
/// [`variations::join_group`].
pub async fn duplicate_product<S: ProductStore>(
    store: &mut S,
    source_id: ProductId,
    policy: SyncPolicy,
) -> Result<(Product, SyncReport), CatalogError<S::Error>> {
    let source = reload(store, source_id).await?;
    variations::lock_in_order(
        store,
        std::iter::once(source_id).chain(source.variation_ids()),
    )
    .await?;
    // the group is stable from here on
    let source = reload(store, source_id).await?;
    let draft = NewProduct::duplicate_of(&source, &copy_token());
    let clone = store.insert(&draft).await.map_err(CatalogError::Store)?;
    tracing::info!(source = %source_id, clone = %clone.id, "product duplicated");

    let report = variations::join_group(store, &source, clone.id, policy).await?;
    let clone = reload(store, clone.id).await?;
    Ok((clone, report))
}

/// Remove every reference to a product, then delete it.
///
/// The product and its current referrers are locked first.
///
/// Returns the number of products that lost a reference.
///
/// # Errors
///
/// Returns [`CatalogError::NotFound`] for an unknown id or
/// [`CatalogError::Store`] on a store failure.
pub async fn delete_product<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<u64, CatalogError<S::Error>> {
    reload(store, id).await?;
    let referencing = store
        .find_referencing(id)
        .await
        .map_err(CatalogError::Store)?;
    variations::lock_in_order(
        store,
        std::iter::once(id).chain(referencing.iter().map(|p| p.id)),
    )
    .await?;
    let detached = store
        .remove_references_to(id)
        .await
        .map_err(CatalogError::Store)?;
    if !store.delete(id).await.map_err(CatalogError::Store)? {
        return Err(CatalogError::NotFound(id));
    }
    tracing::info!(product = %id, detached, "product deleted");
    Ok(detached)
}

async fn reload<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<Product, CatalogError<S::Error>> {
    store
        .find_by_id(id)
        .await
        .map_err(CatalogError::Store)?
        .ok_or(CatalogError::NotFound(id))
}

fn copy_token() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProductStore;
    use crate::products::VariationRef;

    fn input(name: &str) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            parent_category: "phones".to_string(),
            ..ProductInput::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_before_writing() {
        let mut store = MemoryProductStore::new();
        let err = create_product(&mut store, input(""), SyncPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_unknown_product_is_not_found() {
        let mut store = MemoryProductStore::new();
        let missing = ProductId::new();
        let patch = ProductPatch {
            name: Some("Renamed".to_string()),
            ..ProductPatch::default()
        };
        let err = update_product(&mut store, missing, patch, SyncPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn update_without_variations_leaves_graph_untouched() {
        let mut store = MemoryProductStore::new();
        let policy = SyncPolicy::default();
        let (b, _) = create_product(&mut store, input("B"), policy).await.unwrap();
        let mut d_input = input("D");
        d_input.variations = vec![VariationRef::bare(b.id)];
        let (d, _) = create_product(&mut store, d_input, policy).await.unwrap();

        let patch = ProductPatch {
            featured: Some(true),
            ..ProductPatch::default()
        };
        let (updated, report) = update_product(&mut store, d.id, patch, policy)
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(updated.featured);
        assert!(updated.links_to(b.id));
        assert!(store.get(b.id).unwrap().links_to(d.id));
    }

    #[tokio::test]
    async fn duplicate_unknown_source_is_not_found() {
        let mut store = MemoryProductStore::new();
        let err = duplicate_product(&mut store, ProductId::new(), SyncPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_detaches_every_reference() {
        let mut store = MemoryProductStore::new();
        let policy = SyncPolicy::default();
        let (a, _) = create_product(&mut store, input("A"), policy).await.unwrap();
        let (b, _) = create_product(&mut store, input("B"), policy).await.unwrap();
        let mut c_input = input("C");
        c_input.variations = vec![VariationRef::bare(a.id), VariationRef::bare(b.id)];
        let (c, _) = create_product(&mut store, c_input, policy).await.unwrap();

        let detached = delete_product(&mut store, c.id).await.unwrap();
        assert_eq!(detached, 2);
        assert!(store.get(c.id).is_none());
        assert!(!store.get(a.id).unwrap().links_to(c.id));
        assert!(!store.get(b.id).unwrap().links_to(c.id));
        // the fan-out link between the two remaining members survives
        assert!(store.get(a.id).unwrap().links_to(b.id));
        assert!(store.get(b.id).unwrap().links_to(a.id));
    }

    #[test]
    fn copy_token_is_eight_hex_chars() {
        let token = copy_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
