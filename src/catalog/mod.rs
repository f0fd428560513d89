//! Product catalog: the relational store and the read cache behind the
//! `/products` routes. Both are built by the supervisor and closed on shutdown.

mod cache;
mod repository;

pub use cache::ProductCache;
pub use repository::{InMemoryProductRepository, ProductRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub image_path: Option<String>,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Invalid("name must not be empty".to_string()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(CatalogError::Invalid(
                "price must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid product: {0}")]
    Invalid(String),

    #[error("product {0} not found")]
    NotFound(Uuid),

    #[error("catalog is closed")]
    Closed,
}

/// Repository plus cache, as the handlers see them.
#[derive(Clone)]
pub struct ProductService {
    repository: Arc<dyn ProductRepository>,
    cache: Arc<ProductCache>,
}

impl ProductService {
    pub fn new(repository: Arc<dyn ProductRepository>, cache: Arc<ProductCache>) -> Self {
        Self { repository, cache }
    }

    pub async fn create(&self, new_product: NewProduct) -> Result<Product, CatalogError> {
        new_product.validate()?;
        let product = self.repository.create(new_product).await?;
        self.cache.insert(product.clone());
        Ok(product)
    }

    pub async fn get(&self, id: Uuid) -> Result<Product, CatalogError> {
        if let Some(product) = self.cache.get(&id) {
            debug!(product_id = %id, "Product cache hit");
            return Ok(product);
        }
        let product = self.repository.get(id).await?;
        self.cache.insert(product.clone());
        Ok(product)
    }

    pub async fn list(&self) -> Result<Vec<Product>, CatalogError> {
        self.repository.list().await
    }

    pub async fn close(&self) {
        self.cache.close();
        self.repository.close().await;
    }
}
