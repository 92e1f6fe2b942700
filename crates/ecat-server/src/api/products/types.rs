//! Wire types for the product endpoints. Field names are camelCase.

use chrono::{DateTime, Utc};
use ecat_core::{
    GroupAudit, LinkedVariation, Product, ProductId, ProductInput, ProductPatch, SyncReport,
    VariationRef,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ListProductsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct CreateProductRequest {
    #[serde(default)]
    pub name: String,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    #[serde(default)]
    pub parent_category: String,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub image: Option<String>,
    pub is_active: Option<bool>,
    pub featured: Option<bool>,
    pub self_variation_text: Option<String>,
    pub reverse_variation_text: Option<String>,
    #[serde(default)]
    pub variations: Vec<VariationRef>,
    pub attributes: Option<serde_json::Value>,
}

impl From<CreateProductRequest> for ProductInput {
    fn from(req: CreateProductRequest) -> Self {
        Self {
            name: req.name,
            slug: req.slug,
            sku: req.sku,
            barcode: req.barcode,
            parent_category: req.parent_category,
            price: req.price,
            offer_price: req.offer_price,
            image: req.image,
            is_active: req.is_active,
            featured: req.featured,
            self_variation_text: req.self_variation_text,
            reverse_variation_text: req.reverse_variation_text,
            variations: req.variations,
            attributes: req.attributes,
        }
    }
}

// Option<Option<T>>: outer None = "not in request" (keep current),
// Some(None) = "explicitly null" (clear), Some(Some(v)) = "set to value".
#[allow(clippy::option_option)]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct UpdateProductRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub sku: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub barcode: Option<Option<String>>,
    pub parent_category: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "present")]
    pub offer_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "present")]
    pub image: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub featured: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub self_variation_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub reverse_variation_text: Option<Option<String>>,
    pub attributes: Option<serde_json::Value>,
    pub variations: Option<Vec<VariationRef>>,
}

/// Marks a field as present, so `null` becomes `Some(None)` rather than `None`.
#[allow(clippy::option_option)]
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl From<UpdateProductRequest> for ProductPatch {
    fn from(req: UpdateProductRequest) -> Self {
        Self {
            name: req.name,
            slug: req.slug,
            sku: req.sku,
            barcode: req.barcode,
            parent_category: req.parent_category,
            price: req.price,
            offer_price: req.offer_price,
            image: req.image,
            is_active: req.is_active,
            featured: req.featured,
            self_variation_text: req.self_variation_text,
            reverse_variation_text: req.reverse_variation_text,
            attributes: req.attributes,
            variations: req.variations,
        }
    }
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

/// A linked variation as shown to clients.
///
/// `variationText` is the annotation stored on the edge; `label` is what the
/// linked product presents and is what a UI should display.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct VariationView {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub sku: Option<String>,
    pub image: Option<String>,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub self_variation_text: Option<String>,
    pub reverse_variation_text: Option<String>,
    pub variation_text: String,
    pub label: String,
}

impl From<LinkedVariation> for VariationView {
    fn from(linked: LinkedVariation) -> Self {
        let label = linked.label().to_owned();
        let p = linked.product;
        Self {
            id: p.id,
            name: p.name,
            slug: p.slug,
            sku: p.sku,
            image: p.image,
            price: p.price,
            offer_price: p.offer_price,
            self_variation_text: p.self_variation_text,
            reverse_variation_text: p.reverse_variation_text,
            variation_text: linked.edge.variation_text,
            label,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct ProductView {
    pub id: ProductId,
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
    pub label: String,
    pub variations: Vec<VariationView>,
    pub attributes: serde_json::Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncView>,
}

impl ProductView {
    pub(in crate::api) fn new(product: Product, linked: Vec<LinkedVariation>) -> Self {
        let label = product.display_label().to_owned();
        Self {
            id: product.id,
            name: product.name,
            slug: product.slug,
            sku: product.sku,
            barcode: product.barcode,
            parent_category: product.parent_category,
            price: product.price,
            offer_price: product.offer_price,
            image: product.image,
            is_active: product.is_active,
            featured: product.featured,
            self_variation_text: product.self_variation_text,
            reverse_variation_text: product.reverse_variation_text,
            label,
            variations: linked.into_iter().map(VariationView::from).collect(),
            attributes: product.attributes,
            version: product.version,
            created_at: product.created_at,
            updated_at: product.updated_at,
            sync: None,
        }
    }

    pub(in crate::api) fn with_sync(mut self, report: Option<SyncReport>) -> Self {
        self.sync = report.map(SyncView::from);
        self
    }
}

/// Outcome of the variation sync a write triggered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct SyncView {
    pub linked: Vec<ProductId>,
    pub skipped: Vec<ProductId>,
    pub unlinked: Vec<ProductId>,
}

impl From<SyncReport> for SyncView {
    fn from(report: SyncReport) -> Self {
        Self {
            linked: report.linked,
            skipped: report.skipped,
            unlinked: report.unlinked,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct GroupMemberView {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub label: String,
    pub variations: Vec<ProductId>,
}

impl From<Product> for GroupMemberView {
    fn from(product: Product) -> Self {
        Self {
            label: product.display_label().to_owned(),
            variations: product.variation_ids().collect(),
            id: product.id,
            name: product.name,
            slug: product.slug,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct EdgeView {
    pub from: ProductId,
    pub to: ProductId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct AuditView {
    pub consistent: bool,
    pub asymmetric: Vec<EdgeView>,
    pub dangling: Vec<EdgeView>,
}

impl From<GroupAudit> for AuditView {
    fn from(audit: GroupAudit) -> Self {
        let edges = |pairs: Vec<(ProductId, ProductId)>| -> Vec<EdgeView> {
            pairs
                .into_iter()
                .map(|(from, to)| EdgeView { from, to })
                .collect()
        };
        Self {
            consistent: audit.is_consistent(),
            asymmetric: edges(audit.asymmetric),
            dangling: edges(audit.dangling),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct VariationGroupView {
    pub members: Vec<GroupMemberView>,
    pub audit: AuditView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct DeletedProductView {
    pub id: ProductId,
    pub deleted: bool,
    pub detached: u64,
}
