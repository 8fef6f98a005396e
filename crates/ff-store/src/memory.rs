// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory adapter implementations.
//!
//! Values are held as serialized JSON under the exact persisted key layout,
//! so reads go through the same parse-then-validate gate a durable backend
//! would exercise.

use crate::keys;
use crate::{CodeStore, FunctionRegistry, StoreError, StubCache};
use async_trait::async_trait;
use ff_core::validate::decode_stored;
use ff_core::{CodeArtifact, FunctionMetadata, FunctionStub};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend {
        message: format!("serialize: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// In-memory metadata registry.
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, String>>,
    overwrite_redeploy: bool,
}

impl MemoryRegistry {
    /// Registry that rejects redeploys of an existing `(id, version)`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            overwrite_redeploy: false,
        }
    }

    /// Registry that overwrites redeploys idempotently.
    #[must_use]
    pub fn with_overwrite() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            overwrite_redeploy: true,
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FunctionRegistry for MemoryRegistry {
    async fn get_latest(&self, id: &str) -> Result<Option<FunctionMetadata>, StoreError> {
        let key = keys::registry_key(id);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(raw) => Ok(Some(decode_stored(raw, &key)?)),
            None => Ok(None),
        }
    }

    async fn get_version(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Option<FunctionMetadata>, StoreError> {
        let key = keys::registry_version_key(id, version);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(raw) => Ok(Some(decode_stored(raw, &key)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, metadata: &FunctionMetadata) -> Result<(), StoreError> {
        let versioned = keys::registry_version_key(&metadata.id, &metadata.version);
        let mut entries = self.entries.write().await;
        if !self.overwrite_redeploy && entries.contains_key(&versioned) {
            return Err(StoreError::Conflict {
                id: metadata.id.clone(),
                version: metadata.version.clone(),
            });
        }
        let raw = encode(metadata)?;
        entries.insert(keys::registry_key(&metadata.id), raw.clone());
        entries.insert(versioned, raw);
        Ok(())
    }

    async fn replace(&self, metadata: &FunctionMetadata) -> Result<(), StoreError> {
        let raw = encode(metadata)?;
        let mut entries = self.entries.write().await;
        entries.insert(keys::registry_key(&metadata.id), raw.clone());
        entries.insert(keys::registry_version_key(&metadata.id, &metadata.version), raw);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let latest = keys::registry_key(id);
        let version_prefix = format!("{latest}:");
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| k != &latest && !k.starts_with(&version_prefix));
        Ok(entries.len() != before)
    }

    async fn list(&self) -> Result<Vec<FunctionMetadata>, StoreError> {
        let entries = self.entries.read().await;
        let mut out: Vec<FunctionMetadata> = Vec::new();
        for (key, raw) in entries.iter() {
            // Latest pointers are exactly `registry:<id>`; ids cannot
            // contain ':'.
            let Some(rest) = key.strip_prefix("registry:") else {
                continue;
            };
            if rest.contains(':') {
                continue;
            }
            out.push(decode_stored(raw, key)?);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Code store
// ---------------------------------------------------------------------------

/// In-memory code store.
#[derive(Default)]
pub struct MemoryCodeStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryCodeStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn get(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<CodeArtifact>, StoreError> {
        let blobs = self.blobs.read().await;
        let key = match version {
            Some(v) => keys::code_version_key(id, v),
            None => {
                // Compiled sibling wins for the latest pointer.
                let compiled = keys::code_compiled_key(id);
                if blobs.contains_key(&compiled) {
                    compiled
                } else {
                    keys::code_key(id)
                }
            }
        };
        match blobs.get(&key) {
            Some(raw) => Ok(Some(decode_stored(raw, &key)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, id: &str, version: &str, artifact: &CodeArtifact) -> Result<(), StoreError> {
        let raw = encode(artifact)?;
        let mut blobs = self.blobs.write().await;
        blobs.insert(keys::code_key(id), raw.clone());
        blobs.insert(keys::code_version_key(id, version), raw);
        Ok(())
    }

    async fn put_compiled(&self, id: &str, artifact: &CodeArtifact) -> Result<(), StoreError> {
        let raw = encode(artifact)?;
        self.blobs
            .write()
            .await
            .insert(keys::code_compiled_key(id), raw);
        Ok(())
    }

    async fn put_source_map(&self, id: &str, source_map: &str) -> Result<(), StoreError> {
        self.blobs
            .write()
            .await
            .insert(keys::code_sourcemap_key(id), source_map.to_string());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let latest = keys::code_key(id);
        let prefix = format!("{latest}:");
        let mut blobs = self.blobs.write().await;
        let before = blobs.len();
        blobs.retain(|k, _| k != &latest && !k.starts_with(&prefix));
        Ok(blobs.len() != before)
    }
}

// ---------------------------------------------------------------------------
// Stub cache
// ---------------------------------------------------------------------------

/// In-memory stand-in for the shared edge cache.
#[derive(Default)]
pub struct MemoryStubCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStubCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StubCache for MemoryStubCache {
    async fn get(&self, key: &str) -> Result<Option<FunctionStub>, StoreError> {
        {
            let entries = self.entries.read().await;
            if let Some((raw, expires_at)) = entries.get(key) {
                if Instant::now() < *expires_at {
                    return Ok(Some(decode_stored(raw, key)?));
                }
            } else {
                return Ok(None);
            }
        }
        // Entry existed but is expired; drop it.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, stub: &FunctionStub, ttl: Duration) -> Result<(), StoreError> {
        let raw = encode(stub)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (raw, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
