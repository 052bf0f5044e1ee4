//! Local model cache with single-flight loading
//!
//! Concurrent loads of the same model share one underlying fetch: the first
//! caller claims the loading marker and everyone else polls until the model
//! appears (or the load fails and they retry the claim). A model is served
//! only while it sits in this cache; the set of cached ids IS the preloaded
//! set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use infermesh_core::protocol::ModelMetadata;
use infermesh_core::Result;

use crate::predictor::Predictor;

/// A model resident on this worker
pub struct LoadedModel {
    pub id: String,
    pub model_type: String,
    pub version: String,
    pub metadata: ModelMetadata,
    /// Expected input shape, when the model advertises one
    pub input_shape: Option<Vec<u64>>,
    pub predictor: Arc<dyn Predictor>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id)
            .field("model_type", &self.model_type)
            .field("version", &self.version)
            .field("metadata", &self.metadata)
            .field("input_shape", &self.input_shape)
            .finish()
    }
}

impl LoadedModel {
    /// Run the model's predict capability
    pub async fn predict(&self, input: &Value) -> Result<Value> {
        self.predictor.predict(input).await
    }
}

struct CacheSlot {
    model: Arc<LoadedModel>,
    last_accessed: Instant,
}

/// Marker cleanup for the single-flight set; removal must survive panics
/// and early returns in the loader.
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashSet<String>>,
    model_id: String,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading
            .lock()
            .expect("loading set poisoned")
            .remove(&self.model_id);
    }
}

/// Bounded cache of loaded models
pub struct ModelCache {
    capacity: usize,
    models: RwLock<HashMap<String, CacheSlot>>,
    loading: Mutex<HashSet<String>>,
}

impl ModelCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            models: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch a cached model and refresh its access time
    pub fn get(&self, model_id: &str) -> Option<Arc<LoadedModel>> {
        let mut models = self.models.write().expect("cache lock poisoned");
        let slot = models.get_mut(model_id)?;
        slot.last_accessed = Instant::now();
        Some(Arc::clone(&slot.model))
    }

    /// Whether a model is preloaded
    pub fn contains(&self, model_id: &str) -> bool {
        self.models
            .read()
            .expect("cache lock poisoned")
            .contains_key(model_id)
    }

    /// Ids of every preloaded model
    pub fn preloaded_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .models
            .read()
            .expect("cache lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the model, loading it through `loader` if absent
    ///
    /// Returns the model and whether it was already cached. Concurrent
    /// callers for the same id share the first caller's load.
    pub async fn get_or_load<F, Fut>(
        &self,
        model_id: &str,
        loader: F,
    ) -> Result<(Arc<LoadedModel>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<LoadedModel>>,
    {
        loop {
            if let Some(model) = self.get(model_id) {
                return Ok((model, true));
            }
            {
                let mut loading = self.loading.lock().expect("loading set poisoned");
                if !loading.contains(model_id) {
                    loading.insert(model_id.to_string());
                    break;
                }
            }
            // Another task is fetching this model; wait for its result
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _guard = LoadingGuard {
            loading: &self.loading,
            model_id: model_id.to_string(),
        };

        let model = Arc::new(loader().await?);
        self.insert(Arc::clone(&model));
        Ok((model, false))
    }

    fn insert(&self, model: Arc<LoadedModel>) {
        let mut models = self.models.write().expect("cache lock poisoned");
        let id = model.id.clone();
        models.insert(
            id.clone(),
            CacheSlot {
                model,
                last_accessed: Instant::now(),
            },
        );

        if models.len() > self.capacity {
            let evict = models
                .iter()
                .filter(|(other, _)| **other != id)
                .min_by_key(|(_, slot)| slot.last_accessed)
                .map(|(other, _)| other.clone());
            if let Some(evict) = evict {
                models.remove(&evict);
                tracing::info!(model_id = %evict, "evicted least recently used model");
            }
        }
    }

    /// Drop a model from the cache; returns whether it was present
    pub fn unload(&self, model_id: &str) -> bool {
        self.models
            .write()
            .expect("cache lock poisoned")
            .remove(model_id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::SyntheticPredictor;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_model(id: &str) -> LoadedModel {
        let now = Utc::now();
        LoadedModel {
            id: id.to_string(),
            model_type: "classifier".to_string(),
            version: "1.0".to_string(),
            metadata: ModelMetadata {
                model_id: id.to_string(),
                model_type: "classifier".to_string(),
                version: "1.0".to_string(),
                description: String::new(),
                storage_key: format!("{}.model", id),
                checksum: "abc".to_string(),
                size: 1,
                created_at: now,
                updated_at: now,
            },
            input_shape: None,
            predictor: Arc::new(SyntheticPredictor::new(id.as_bytes())),
        }
    }

    #[tokio::test]
    async fn test_load_then_hit() {
        let cache = ModelCache::new(4);
        let (_, cached) = cache
            .get_or_load("m1", || async { Ok(test_model("m1")) })
            .await
            .unwrap();
        assert!(!cached);

        let (_, cached) = cache
            .get_or_load("m1", || async { panic!("must not reload") })
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(cache.preloaded_models(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let cache = Arc::new(ModelCache::new(4));
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("m1", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(test_model("m1"))
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_releases_marker() {
        let cache = ModelCache::new(4);
        let err = cache
            .get_or_load("m1", || async {
                Err(infermesh_core::Error::TransportError("manager down".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, infermesh_core::Error::TransportError(_)));

        // A later load must be able to claim the marker again
        let (_, cached) = cache
            .get_or_load("m1", || async { Ok(test_model("m1")) })
            .await
            .unwrap();
        assert!(!cached);
    }

    #[tokio::test]
    async fn test_eviction_over_capacity() {
        let cache = ModelCache::new(2);
        for id in ["m1", "m2"] {
            cache
                .get_or_load(id, || async { Ok(test_model(id)) })
                .await
                .unwrap();
        }
        // Touch m1 so m2 is the eviction candidate
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get("m1");

        cache
            .get_or_load("m3", || async { Ok(test_model("m3")) })
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("m1"));
        assert!(cache.contains("m3"));
        assert!(!cache.contains("m2"));
    }

    #[tokio::test]
    async fn test_unload() {
        let cache = ModelCache::new(4);
        cache
            .get_or_load("m1", || async { Ok(test_model("m1")) })
            .await
            .unwrap();
        assert!(cache.unload("m1"));
        assert!(!cache.unload("m1"));
        assert!(!cache.contains("m1"));
    }
}
