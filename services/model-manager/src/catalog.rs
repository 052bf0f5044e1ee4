//! In-memory model catalog
//!
//! Three indices: the primary `model_id -> metadata` map, a secondary
//! `type -> model ids` index, and a `model_id -> versions` set. All three
//! mutate under one write lock, so an index entry always resolves to a live
//! primary entry. Listing follows insertion order within a process lifetime.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use infermesh_core::protocol::{ModelMetadata, ModelMetadataInput};
use infermesh_core::{Error, Result};

/// Search filters for catalog queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(rename = "type", default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub name_contains: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Aggregate catalog numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_models: usize,
    pub models_by_type: HashMap<String, usize>,
    pub total_bytes: u64,
}

#[derive(Default)]
struct CatalogInner {
    models: HashMap<String, ModelMetadata>,
    /// Insertion order of model ids, for stable listing
    order: Vec<String>,
    by_type: HashMap<String, HashSet<String>>,
    versions: HashMap<String, BTreeSet<String>>,
}

/// Catalog of model metadata with type and version indices
#[derive(Default)]
pub struct ModelCatalog {
    inner: RwLock<CatalogInner>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the metadata for a model
    pub fn put(&self, metadata: ModelMetadata) {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        let model_id = metadata.model_id.clone();

        if let Some(previous) = inner.models.get(&model_id).cloned() {
            if previous.model_type != metadata.model_type {
                remove_from_type_index(&mut inner, &previous.model_type, &model_id);
            }
        } else {
            inner.order.push(model_id.clone());
        }

        inner
            .by_type
            .entry(metadata.model_type.clone())
            .or_default()
            .insert(model_id.clone());
        inner
            .versions
            .entry(model_id.clone())
            .or_default()
            .insert(metadata.version.clone());
        inner.models.insert(model_id, metadata);
    }

    /// Look up a model, optionally pinning an exact version
    pub fn get(&self, model_id: &str, version: Option<&str>) -> Option<ModelMetadata> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let metadata = inner.models.get(model_id)?;
        match version {
            Some(v) if v != metadata.version => None,
            _ => Some(metadata.clone()),
        }
    }

    /// Versions ever recorded for a model
    pub fn versions(&self, model_id: &str) -> Vec<String> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        inner
            .versions
            .get(model_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a metadata patch; identity fields stay fixed
    ///
    /// `updated_at` always moves forward, even against a stalled clock.
    pub fn update(&self, model_id: &str, patch: &ModelMetadataInput) -> Result<ModelMetadata> {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        let Some(current) = inner.models.get(model_id).cloned() else {
            return Err(Error::ModelNotFound(format!(
                "cannot update unknown model {}",
                model_id
            )));
        };

        let mut updated = current.clone();
        if let Some(model_type) = &patch.model_type {
            updated.model_type = model_type.clone();
        }
        if let Some(version) = &patch.version {
            updated.version = version.clone();
        }
        if let Some(description) = &patch.description {
            updated.description = description.clone();
        }

        let now = Utc::now();
        updated.updated_at = if now > current.updated_at {
            now
        } else {
            current.updated_at + Duration::milliseconds(1)
        };

        if current.model_type != updated.model_type {
            remove_from_type_index(&mut inner, &current.model_type, model_id);
            inner
                .by_type
                .entry(updated.model_type.clone())
                .or_default()
                .insert(model_id.to_string());
        }
        inner
            .versions
            .entry(model_id.to_string())
            .or_default()
            .insert(updated.version.clone());
        inner.models.insert(model_id.to_string(), updated.clone());

        Ok(updated)
    }

    /// Remove a model, or just one recorded version
    ///
    /// Deleting a non-current version only shrinks the version set; deleting
    /// the current version (or passing no version) removes the model from
    /// every index.
    pub fn delete(&self, model_id: &str, version: Option<&str>) -> bool {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        let Some(current) = inner.models.get(model_id).cloned() else {
            return false;
        };

        if let Some(v) = version {
            if v != current.version {
                return inner
                    .versions
                    .get_mut(model_id)
                    .map(|set| set.remove(v))
                    .unwrap_or(false);
            }
        }

        inner.models.remove(model_id);
        inner.order.retain(|id| id != model_id);
        inner.versions.remove(model_id);
        remove_from_type_index(&mut inner, &current.model_type, model_id);
        true
    }

    /// List models in insertion order, optionally filtered by type
    pub fn list(&self, model_type: Option<&str>, limit: Option<usize>) -> Vec<ModelMetadata> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let iter = inner
            .order
            .iter()
            .filter_map(|id| inner.models.get(id))
            .filter(|m| model_type.map_or(true, |t| m.model_type == t))
            .cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Search by type, id substring, and version
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<ModelMetadata> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let iter = inner
            .order
            .iter()
            .filter_map(|id| inner.models.get(id))
            .filter(|m| {
                criteria
                    .model_type
                    .as_deref()
                    .map_or(true, |t| m.model_type == t)
            })
            .filter(|m| {
                criteria
                    .name_contains
                    .as_deref()
                    .map_or(true, |s| m.model_id.contains(s))
            })
            .filter(|m| criteria.version.as_deref().map_or(true, |v| m.version == v))
            .cloned();
        match criteria.max_results {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Counts and sizes across the catalog
    pub fn stats(&self) -> CatalogStats {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let models_by_type = inner
            .by_type
            .iter()
            .map(|(t, ids)| (t.clone(), ids.len()))
            .collect();
        CatalogStats {
            total_models: inner.models.len(),
            models_by_type,
            total_bytes: inner.models.values().map(|m| m.size).sum(),
        }
    }

    /// Whether the catalog knows this model id
    pub fn contains(&self, model_id: &str) -> bool {
        self.inner
            .read()
            .expect("catalog lock poisoned")
            .models
            .contains_key(model_id)
    }
}

fn remove_from_type_index(inner: &mut CatalogInner, model_type: &str, model_id: &str) {
    if let Some(set) = inner.by_type.get_mut(model_type) {
        set.remove(model_id);
        if set.is_empty() {
            inner.by_type.remove(model_type);
        }
    }
}
