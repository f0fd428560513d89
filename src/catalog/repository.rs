use super::{CatalogError, NewProduct, Product};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn create(&self, new_product: NewProduct) -> Result<Product, CatalogError>;

    async fn get(&self, id: Uuid) -> Result<Product, CatalogError>;

    /// All products, oldest first.
    async fn list(&self) -> Result<Vec<Product>, CatalogError>;

    async fn close(&self);
}

/// Process-local product table. Contents do not survive a restart.
#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<Uuid, Product>>,
    closed: AtomicBool,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), CatalogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CatalogError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn create(&self, new_product: NewProduct) -> Result<Product, CatalogError> {
        self.ensure_open()?;
        let product = Product {
            id: Uuid::new_v4(),
            name: new_product.name.trim().to_string(),
            description: new_product.description,
            price: new_product.price,
            image_path: new_product.image_path,
            created_at: Utc::now(),
        };
        self.products
            .write()
            .await
            .insert(product.id, product.clone());
        info!(product_id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    async fn get(&self, id: Uuid) -> Result<Product, CatalogError> {
        self.ensure_open()?;
        self.products
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Product>, CatalogError> {
        self.ensure_open()?;
        let mut products: Vec<Product> = self.products.read().await.values().cloned().collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let count = self.products.read().await.len();
            info!(products = count, "Product repository closed");
        }
    }
}
