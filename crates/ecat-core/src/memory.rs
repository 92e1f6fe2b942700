//! In-process [`ProductStore`] backed by a `Vec`, used by unit tests.
//!
//! Compiled for this crate's tests, or elsewhere with the `test-util` feature.

use chrono::Utc;
use thiserror::Error;

use crate::products::{NewProduct, Product, ProductId, ProductPatch, VariationRef};
use crate::store::ProductStore;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    #[error("duplicate {field}: '{value}'")]
    Duplicate { field: &'static str, value: String },
}

/// Products kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryProductStore {
    products: Vec<Product>,
}

impl MemoryProductStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one product, for assertions.
    #[must_use]
    pub fn get(&self, id: ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn get_mut(&mut self, id: ProductId) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| p.id == id)
    }

    fn check_unique(
        &self,
        skip: Option<ProductId>,
        slug: &str,
        sku: Option<&str>,
        barcode: Option<&str>,
    ) -> Result<(), MemoryStoreError> {
        for other in self.products.iter().filter(|p| Some(p.id) != skip) {
            if other.slug == slug {
                return Err(MemoryStoreError::Duplicate {
                    field: "slug",
                    value: slug.to_owned(),
                });
            }
            if sku.is_some() && other.sku.as_deref() == sku {
                return Err(MemoryStoreError::Duplicate {
                    field: "sku",
                    value: sku.unwrap_or_default().to_owned(),
                });
            }
            if barcode.is_some() && other.barcode.as_deref() == barcode {
                return Err(MemoryStoreError::Duplicate {
                    field: "barcode",
                    value: barcode.unwrap_or_default().to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl ProductStore for MemoryProductStore {
    type Error = MemoryStoreError;

    async fn find_by_id(&mut self, id: ProductId) -> Result<Option<Product>, Self::Error> {
        Ok(self.get(id).cloned())
    }

    async fn find_referencing(&mut self, id: ProductId) -> Result<Vec<Product>, Self::Error> {
        Ok(self
            .products
            .iter()
            .filter(|p| p.links_to(id))
            .cloned()
            .collect())
    }

    async fn lock_products(&mut self, _ids: &[ProductId]) -> Result<(), Self::Error> {
        // `&mut self` already gives exclusive access
        Ok(())
    }

    async fn insert(&mut self, product: &NewProduct) -> Result<Product, Self::Error> {
        self.check_unique(
            None,
            &product.slug,
            product.sku.as_deref(),
            product.barcode.as_deref(),
        )?;
        let row = product.clone().into_product(ProductId::new(), Utc::now());
        self.products.push(row.clone());
        Ok(row)
    }

    async fn update_fields(
        &mut self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, Self::Error> {
        let Some(current) = self.get(id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        next.apply_patch(patch);
        self.check_unique(
            Some(id),
            &next.slug,
            next.sku.as_deref(),
            next.barcode.as_deref(),
        )?;
        next.version += 1;
        next.updated_at = Utc::now();
        if let Some(slot) = self.get_mut(id) {
            *slot = next.clone();
        }
        Ok(Some(next))
    }

    async fn save_variations(
        &mut self,
        id: ProductId,
        expected_version: i64,
        variations: &[VariationRef],
    ) -> Result<Option<i64>, Self::Error> {
        match self.get_mut(id) {
            Some(product) if product.version == expected_version => {
                product.variations = variations.to_vec();
                product.version += 1;
                product.updated_at = Utc::now();
                Ok(Some(product.version))
            }
            _ => Ok(None),
        }
    }

    async fn remove_references_to(&mut self, id: ProductId) -> Result<u64, Self::Error> {
        let mut changed = 0;
        for product in self.products.iter_mut().filter(|p| p.links_to(id)) {
            product.variations.retain(|v| v.product != id);
            product.version += 1;
            product.updated_at = Utc::now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&mut self, id: ProductId) -> Result<bool, Self::Error> {
        let before = self.products.len();
        self.products.retain(|p| p.id != id);
        Ok(self.products.len() < before)
    }
}
