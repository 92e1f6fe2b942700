pub mod app_config;
pub mod catalog;
pub mod config;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod products;
pub mod store;
pub mod variations;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use catalog::CatalogError;
pub use config::{load_app_config, load_app_config_from_env};
pub use products::{
    effective_label, slug_from_name, NewProduct, Product, ProductId, ProductInput, ProductPatch,
    VariationRef,
};
pub use store::ProductStore;
pub use variations::{GroupAudit, LinkedVariation, SyncPolicy, SyncReport};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
