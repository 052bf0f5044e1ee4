//! API key store: authentication and permission checks
//!
//! Keys arrive in `X-Api-Key` or `Authorization: Bearer <key>`. A hit stamps
//! `last_used` and yields the caller's identity and permission set; `*`
//! grants everything. With authentication disabled the store waves every
//! request through.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use infermesh_core::{Error, Result};

/// One issued API key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub name: String,
    pub permissions: HashSet<String>,
}

impl AuthContext {
    /// Whether this caller holds `permission` (or the wildcard)
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.contains("*") || self.permissions.contains(permission)
    }
}

/// In-memory key store
pub struct ApiKeyStore {
    enabled: bool,
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl ApiKeyStore {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Add a pre-shared key (e.g. from deployment config)
    pub fn insert(&self, key: impl Into<String>, name: impl Into<String>, permissions: &[&str]) {
        let key = key.into();
        let entry = ApiKey {
            key: key.clone(),
            name: name.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            created_at: Utc::now(),
            last_used: None,
        };
        self.keys
            .write()
            .expect("key store poisoned")
            .insert(key, entry);
    }

    /// Issue a fresh key and return it
    pub fn issue(&self, name: impl Into<String>, permissions: &[&str]) -> String {
        let key = format!("imk-{}", uuid::Uuid::new_v4().simple());
        self.insert(key.clone(), name, permissions);
        key
    }

    /// Revoke a key; returns whether it existed
    pub fn revoke(&self, key: &str) -> bool {
        self.keys
            .write()
            .expect("key store poisoned")
            .remove(key)
            .is_some()
    }

    /// Authenticate from the two accepted headers
    pub fn authenticate(
        &self,
        api_key_header: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<AuthContext> {
        if !self.enabled {
            return Ok(AuthContext {
                name: "anonymous".to_string(),
                permissions: HashSet::from(["*".to_string()]),
            });
        }

        let presented = api_key_header
            .or_else(|| authorization.and_then(|h| h.strip_prefix("Bearer ")))
            .ok_or_else(|| {
                Error::Unauthenticated(
                    "provide X-Api-Key or Authorization: Bearer <key>".to_string(),
                )
            })?;

        let mut keys = self.keys.write().expect("key store poisoned");
        let Some(entry) = keys.get_mut(presented) else {
            return Err(Error::Unauthenticated("unknown API key".to_string()));
        };
        entry.last_used = Some(Utc::now());
        Ok(AuthContext {
            name: entry.name.clone(),
            permissions: entry.permissions.clone(),
        })
    }

    /// Require a permission on an authenticated context
    pub fn authorize(&self, context: &AuthContext, permission: &str) -> Result<()> {
        if context.allows(permission) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "{} lacks the {} permission",
                context.name, permission
            )))
        }
    }

    /// Look up a key's record (without stamping `last_used`)
    pub fn get(&self, key: &str) -> Option<ApiKey> {
        self.keys
            .read()
            .expect("key store poisoned")
            .get(key)
            .cloned()
    }
}
