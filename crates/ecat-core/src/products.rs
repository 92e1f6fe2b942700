use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// Store-generated product identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(Uuid);

impl ProductId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ProductId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ProductId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One edge of a product's variation adjacency list.
///
/// `variation_text` is a per-edge annotation set by direct edits only; the
/// label shown for the linked product comes from that product itself (see
/// [`Product::display_label`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationRef {
    pub product: ProductId,
    #[serde(default)]
    pub variation_text: String,
}

impl VariationRef {
    /// An edge without annotation, as written by propagation.
    #[must_use]
    pub fn bare(product: ProductId) -> Self {
        Self {
            product,
            variation_text: String::new(),
        }
    }
}

/// A persisted product document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    /// Opaque category reference; category management lives elsewhere.
    pub parent_category: String,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub image: Option<String>,
    pub is_active: bool,
    pub featured: bool,
    pub self_variation_text: Option<String>,
    /// Deprecated alias of `self_variation_text`, read as a fallback only.
    pub reverse_variation_text: Option<String>,
    pub variations: Vec<VariationRef>,
    /// Remaining commerce payload (stock, media, specs), copied verbatim on duplicate.
    pub attributes: serde_json::Value,
    /// Bumped on every write; guards read-modify-write cycles.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns `true` if this product's variation list references `id`.
    #[must_use]
    pub fn links_to(&self, id: ProductId) -> bool {
        self.variations.iter().any(|v| v.product == id)
    }

    /// Ids referenced by this product's variation list, in list order.
    pub fn variation_ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.variations.iter().map(|v| v.product)
    }

    /// The label this product presents when listed as a variation of another product.
    #[must_use]
    pub fn display_label(&self) -> &str {
        effective_label(
            self.self_variation_text.as_deref(),
            self.reverse_variation_text.as_deref(),
        )
    }

    /// Overlay a sparse patch onto this product. `variations` is ignored; the
    /// list is owned by the sync routines.
    pub fn apply_patch(&mut self, patch: &ProductPatch) {
        if let Some(ref name) = patch.name {
            self.name.clone_from(name);
        }
        if let Some(ref slug) = patch.slug {
            self.slug.clone_from(slug);
        }
        if let Some(ref sku) = patch.sku {
            self.sku.clone_from(sku);
        }
        if let Some(ref barcode) = patch.barcode {
            self.barcode.clone_from(barcode);
        }
        if let Some(ref category) = patch.parent_category {
            self.parent_category.clone_from(category);
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(offer_price) = patch.offer_price {
            self.offer_price = offer_price;
        }
        if let Some(ref image) = patch.image {
            self.image.clone_from(image);
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        if let Some(featured) = patch.featured {
            self.featured = featured;
        }
        if let Some(ref text) = patch.self_variation_text {
            self.self_variation_text.clone_from(text);
        }
        if let Some(ref text) = patch.reverse_variation_text {
            self.reverse_variation_text.clone_from(text);
        }
        if let Some(ref attributes) = patch.attributes {
            self.attributes.clone_from(attributes);
        }
    }
}

/// Resolve the label a product presents to its variation group.
///
/// Empty strings count as absent: a blank `self_text` falls back to the
/// deprecated `reverse_text`, and both blank yields `""`.
#[must_use]
pub fn effective_label<'a>(self_text: Option<&'a str>, reverse_text: Option<&'a str>) -> &'a str {
    self_text
        .filter(|s| !s.is_empty())
        .or_else(|| reverse_text.filter(|s| !s.is_empty()))
        .unwrap_or("")
}

/// Generate a URL-safe slug from a product name.
#[must_use]
pub fn slug_from_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else if c.is_whitespace() || c == '/' || c == '_' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|&c| c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Client-supplied fields for a new product, before validation.
#[derive(Debug, Clone, Default)]
pub struct ProductInput {
    pub name: String,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub parent_category: String,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub image: Option<String>,
    pub is_active: Option<bool>,
    pub featured: Option<bool>,
    pub self_variation_text: Option<String>,
    pub reverse_variation_text: Option<String>,
    pub variations: Vec<VariationRef>,
    pub attributes: Option<serde_json::Value>,
}

/// A validated product ready for insertion. The store assigns `id` and
/// `version`; the variation list starts empty and is filled by the sync.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
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
    pub attributes: serde_json::Value,
}

impl ProductInput {
    /// Validate and normalize the input, splitting off the requested variation list.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when a required field is blank, a
    /// price is negative, or `attributes` is not a JSON object.
    pub fn validate(self) -> Result<(NewProduct, Vec<VariationRef>), CoreError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(CoreError::Validation("name is required".to_string()));
        }
        let parent_category = self.parent_category.trim().to_owned();
        if parent_category.is_empty() {
            return Err(CoreError::Validation(
                "parent category is required".to_string(),
            ));
        }

        let slug = match normalize_optional(self.slug) {
            Some(raw) => slug_from_name(&raw),
            None => slug_from_name(&name),
        };
        if slug.is_empty() {
            return Err(CoreError::Validation(format!(
                "cannot derive a slug from '{name}'; provide one explicitly"
            )));
        }

        validate_price("price", self.price)?;
        validate_price("offer price", self.offer_price)?;

        let attributes = self
            .attributes
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        validate_attributes(&attributes)?;

        let product = NewProduct {
            name,
            slug,
            sku: normalize_optional(self.sku),
            barcode: normalize_optional(self.barcode),
            parent_category,
            price: self.price,
            offer_price: self.offer_price,
            image: normalize_optional(self.image),
            is_active: self.is_active.unwrap_or(true),
            featured: self.featured.unwrap_or(false),
            self_variation_text: self.self_variation_text,
            reverse_variation_text: self.reverse_variation_text,
            attributes,
        };
        Ok((product, self.variations))
    }
}

impl NewProduct {
    /// Build the insertable copy of `source` used by product duplication.
    ///
    /// Identity fields are made fresh using `token` (a short random hex
    /// string); the clone starts inactive, unfeatured, and without a label.
    #[must_use]
    pub fn duplicate_of(source: &Product, token: &str) -> Self {
        Self {
            name: format!("{} (Copy)", source.name),
            slug: format!("{}-copy-{}", source.slug, token.to_lowercase()),
            sku: source
                .sku
                .as_ref()
                .map(|sku| format!("{sku}-COPY-{}", token.to_uppercase())),
            barcode: None,
            parent_category: source.parent_category.clone(),
            price: source.price,
            offer_price: source.offer_price,
            image: source.image.clone(),
            is_active: false,
            featured: false,
            self_variation_text: None,
            reverse_variation_text: None,
            attributes: source.attributes.clone(),
        }
    }

    /// Materialize a full product for stores that generate rows in process.
    #[must_use]
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> Product {
        Product {
            id,
            name: self.name,
            slug: self.slug,
            sku: self.sku,
            barcode: self.barcode,
            parent_category: self.parent_category,
            price: self.price,
            offer_price: self.offer_price,
            image: self.image,
            is_active: self.is_active,
            featured: self.featured,
            self_variation_text: self.self_variation_text,
            reverse_variation_text: self.reverse_variation_text,
            variations: Vec::new(),
            attributes: self.attributes,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sparse update of a product.
///
/// Outer `None` keeps the current value; for nullable fields `Some(None)`
/// clears it. `variations: None` leaves the variation graph untouched.
// Option<Option<T>> carries PATCH semantics for nullable columns.
#[allow(clippy::option_option)]
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<Option<String>>,
    pub barcode: Option<Option<String>>,
    pub parent_category: Option<String>,
    pub price: Option<Option<Decimal>>,
    pub offer_price: Option<Option<Decimal>>,
    pub image: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub featured: Option<bool>,
    pub self_variation_text: Option<Option<String>>,
    pub reverse_variation_text: Option<Option<String>>,
    pub attributes: Option<serde_json::Value>,
    pub variations: Option<Vec<VariationRef>>,
}

impl ProductPatch {
    /// Validate and normalize the patch in place.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] when a supplied required field is
    /// blank, a price is negative, or `attributes` is not a JSON object.
    pub fn validate(mut self) -> Result<Self, CoreError> {
        if let Some(ref name) = self.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(CoreError::Validation("name is required".to_string()));
            }
            self.name = Some(trimmed.to_owned());
        }
        if let Some(ref category) = self.parent_category {
            let trimmed = category.trim();
            if trimmed.is_empty() {
                return Err(CoreError::Validation(
                    "parent category is required".to_string(),
                ));
            }
            self.parent_category = Some(trimmed.to_owned());
        }
        if let Some(ref raw) = self.slug {
            let slug = slug_from_name(raw);
            if slug.is_empty() {
                return Err(CoreError::Validation(format!("invalid slug '{raw}'")));
            }
            self.slug = Some(slug);
        }

        self.sku = self.sku.map(normalize_optional);
        self.barcode = self.barcode.map(normalize_optional);
        self.image = self.image.map(normalize_optional);

        validate_price("price", self.price.flatten())?;
        validate_price("offer price", self.offer_price.flatten())?;
        if let Some(ref attributes) = self.attributes {
            validate_attributes(attributes)?;
        }

        Ok(self)
    }

    /// Returns `true` if the patch changes any scalar field.
    #[must_use]
    pub fn touches_fields(&self) -> bool {
        self.name.is_some()
            || self.slug.is_some()
            || self.sku.is_some()
            || self.barcode.is_some()
            || self.parent_category.is_some()
            || self.price.is_some()
            || self.offer_price.is_some()
            || self.image.is_some()
            || self.is_active.is_some()
            || self.featured.is_some()
            || self.self_variation_text.is_some()
            || self.reverse_variation_text.is_some()
            || self.attributes.is_some()
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn validate_price(field: &str, value: Option<Decimal>) -> Result<(), CoreError> {
    match value {
        Some(v) if v.is_sign_negative() && !v.is_zero() => Err(CoreError::Validation(format!(
            "{field} must not be negative"
        ))),
        _ => Ok(()),
    }
}

fn validate_attributes(value: &serde_json::Value) -> Result<(), CoreError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(CoreError::Validation(
            "attributes must be a JSON object".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, category: &str) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            parent_category: category.to_string(),
            ..ProductInput::default()
        }
    }

    fn product(name: &str) -> Product {
        let (draft, _) = input(name, "phones").validate().expect("valid input");
        draft.into_product(ProductId::new(), Utc::now())
    }

    #[test]
    fn slug_simple_name() {
        assert_eq!(slug_from_name("Galaxy S24 Ultra"), "galaxy-s24-ultra");
    }

    #[test]
    fn slug_strips_punctuation_and_collapses_dashes() {
        assert_eq!(slug_from_name("iPhone 15 \u{2014} 8GB / 256GB!"), "iphone-15-8gb-256gb");
    }

    #[test]
    fn slug_drops_non_ascii() {
        // Non-ASCII chars are stripped; no dash inserted between adjacent ASCII chars
        assert_eq!(slug_from_name("Café Crème"), "caf-crme");
    }

    #[test]
    fn effective_label_prefers_self_text() {
        assert_eq!(effective_label(Some("8GB"), Some("old")), "8GB");
    }

    #[test]
    fn effective_label_falls_back_to_reverse_text() {
        assert_eq!(effective_label(None, Some("12GB")), "12GB");
        assert_eq!(effective_label(Some(""), Some("12GB")), "12GB");
    }

    #[test]
    fn effective_label_empty_when_both_absent() {
        assert_eq!(effective_label(None, None), "");
        assert_eq!(effective_label(Some(""), Some("")), "");
    }

    #[test]
    fn validate_requires_name() {
        let err = input("   ", "phones").validate().unwrap_err();
        assert!(err.to_string().contains("name is required"));
    }

    #[test]
    fn validate_requires_parent_category() {
        let err = input("Pixel 9", " ").validate().unwrap_err();
        assert!(err.to_string().contains("parent category"));
    }

    #[test]
    fn validate_rejects_negative_price() {
        let mut raw = input("Pixel 9", "phones");
        raw.price = Some(Decimal::new(-100, 2));
        let err = raw.validate().unwrap_err();
        assert!(err.to_string().contains("price must not be negative"));
    }

    #[test]
    fn validate_rejects_non_object_attributes() {
        let mut raw = input("Pixel 9", "phones");
        raw.attributes = Some(serde_json::json!([1, 2]));
        let err = raw.validate().unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn validate_derives_slug_and_blanks_optional_fields() {
        let mut raw = input("  Pixel 9 Pro ", "phones");
        raw.sku = Some("  ".to_string());
        raw.barcode = Some(String::new());
        let (draft, variations) = raw.validate().expect("valid");
        assert_eq!(draft.name, "Pixel 9 Pro");
        assert_eq!(draft.slug, "pixel-9-pro");
        assert!(draft.sku.is_none());
        assert!(draft.barcode.is_none());
        assert!(draft.is_active);
        assert!(!draft.featured);
        assert!(draft.attributes.is_object());
        assert!(variations.is_empty());
    }

    #[test]
    fn validate_rejects_name_without_slug_characters() {
        let err = input("!!!", "phones").validate().unwrap_err();
        assert!(err.to_string().contains("cannot derive a slug"));
    }

    #[test]
    fn duplicate_of_refreshes_identity_and_keeps_payload() {
        let mut source = product("Pixel 9");
        source.sku = Some("PX9-128".to_string());
        source.barcode = Some("0840244700001".to_string());
        source.featured = true;
        source.self_variation_text = Some("128GB".to_string());
        source.attributes = serde_json::json!({ "stock": 4, "ram": "12GB" });

        let copy = NewProduct::duplicate_of(&source, "ab12cd34");
        assert_eq!(copy.name, "Pixel 9 (Copy)");
        assert_eq!(copy.slug, "pixel-9-copy-ab12cd34");
        assert_eq!(copy.sku.as_deref(), Some("PX9-128-COPY-AB12CD34"));
        assert!(copy.barcode.is_none());
        assert!(!copy.is_active);
        assert!(!copy.featured);
        assert!(copy.self_variation_text.is_none());
        assert_eq!(copy.attributes, source.attributes);
        assert_eq!(copy.parent_category, source.parent_category);
    }

    #[test]
    fn apply_patch_overlays_only_supplied_fields() {
        let mut p = product("Pixel 9");
        p.sku = Some("PX9".to_string());
        let patch = ProductPatch {
            name: Some("Pixel 9a".to_string()),
            sku: Some(None),
            featured: Some(true),
            ..ProductPatch::default()
        };
        p.apply_patch(&patch);
        assert_eq!(p.name, "Pixel 9a");
        assert!(p.sku.is_none());
        assert!(p.featured);
        assert_eq!(p.slug, "pixel-9");
    }

    #[test]
    fn patch_validate_normalizes_slug_and_blank_sku() {
        let patch = ProductPatch {
            slug: Some("New Slug".to_string()),
            sku: Some(Some("  ".to_string())),
            ..ProductPatch::default()
        }
        .validate()
        .expect("valid patch");
        assert_eq!(patch.slug.as_deref(), Some("new-slug"));
        assert_eq!(patch.sku, Some(None));
        assert!(patch.touches_fields());
    }

    #[test]
    fn patch_with_only_variations_touches_no_fields() {
        let patch = ProductPatch {
            variations: Some(vec![]),
            ..ProductPatch::default()
        };
        assert!(!patch.touches_fields());
    }

    #[test]
    fn variation_ref_deserializes_without_text() {
        let id = ProductId::new();
        let raw = serde_json::json!({ "product": id.to_string() });
        let edge: VariationRef = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(edge.product, id);
        assert_eq!(edge.variation_text, "");
    }

    #[test]
    fn display_label_reads_own_fields() {
        let mut p = product("Pixel 9");
        p.reverse_variation_text = Some("legacy".to_string());
        assert_eq!(p.display_label(), "legacy");
        p.self_variation_text = Some("16GB".to_string());
        assert_eq!(p.display_label(), "16GB");
    }
}
