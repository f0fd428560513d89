use super::Product;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Bounded read-through cache of products keyed by id.
pub struct ProductCache {
    entries: Mutex<LruCache<Uuid, Product>>,
}

impl ProductCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        info!(capacity = capacity.get(), "Product cache initialized");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Uuid, Product>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &Uuid) -> Option<Product> {
        self.lock().get(id).cloned()
    }

    pub fn insert(&self, product: Product) {
        self.lock().put(product.id, product);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn close(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        info!(entries = dropped, "Product cache closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(name: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            price: 0.0,
            image_path: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = ProductCache::new(2);
        let a = product("a");
        let b = product("b");
        let c = product("c");

        cache.insert(a.clone());
        cache.insert(b.clone());
        assert!(cache.get(&a.id).is_some());
        cache.insert(c.clone());

        assert!(cache.get(&b.id).is_none());
        assert!(cache.get(&a.id).is_some());
        assert!(cache.get(&c.id).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_close_empties_cache() {
        let cache = ProductCache::new(0);
        cache.insert(product("a"));
        assert_eq!(cache.len(), 1);

        cache.close();
        assert_eq!(cache.len(), 0);
    }
}
