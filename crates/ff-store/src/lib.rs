// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-store
//!
//! Adapter seams for the persistent collaborators the serving pipeline
//! consumes: the metadata registry, the code store, and the shared stub
//! cache. The pipeline only sees the traits here; the in-memory
//! implementations back tests and single-node deployments and honor the
//! same persisted key layout a durable backend would use.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Persisted key layout helpers.
pub mod keys;
/// In-memory adapter implementations.
pub mod memory;

use async_trait::async_trait;
use ff_core::{CodeArtifact, ErrorKind, FunctionMetadata, FunctionStub, ValidationError};
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryCodeStore, MemoryRegistry, MemoryStubCache};

/// Errors surfaced by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(id, version)` pair already exists and the policy rejects
    /// redeploys.
    #[error("function {id}@{version} already exists")]
    Conflict {
        /// Function id.
        id: String,
        /// Conflicting version.
        version: String,
    },

    /// The backing store failed.
    #[error("store backend failure: {message}")]
    Backend {
        /// Backend detail.
        message: String,
    },

    /// Stored JSON failed the parse-then-validate gate.
    #[error(transparent)]
    Corrupt(#[from] ValidationError),
}

impl StoreError {
    /// Taxonomy kind for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Validation,
            Self::Backend { .. } => ErrorKind::ServiceUnavailable,
            Self::Corrupt(_) => ErrorKind::Internal,
        }
    }
}

/// Fetches and stores function metadata by id (+ optional version).
#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    /// Fetch the latest metadata for `id`.
    async fn get_latest(&self, id: &str) -> Result<Option<FunctionMetadata>, StoreError>;

    /// Fetch a pinned version. Only meaningful when
    /// [`supports_versions`](Self::supports_versions) is true.
    async fn get_version(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Option<FunctionMetadata>, StoreError>;

    /// Whether the backend stores versioned entries. Backends that do not
    /// serve only the latest pointer; the loader overrides the version on
    /// the way out.
    fn supports_versions(&self) -> bool {
        true
    }

    /// Store metadata under both the latest pointer and the versioned key.
    ///
    /// Subject to the backend's redeploy policy: the same `(id, version)`
    /// pair is either rejected with [`StoreError::Conflict`] or overwritten
    /// idempotently.
    async fn put(&self, metadata: &FunctionMetadata) -> Result<(), StoreError>;

    /// Replace stored metadata unconditionally. Used by metadata updates
    /// (PATCH), which mutate fields without bumping the version.
    async fn replace(&self, metadata: &FunctionMetadata) -> Result<(), StoreError>;

    /// Remove every entry for `id`. Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// List the latest metadata of every deployed function.
    async fn list(&self) -> Result<Vec<FunctionMetadata>, StoreError>;
}

/// Fetches and stores code artifacts by id (+ optional version).
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Fetch the executable artifact for `id`.
    ///
    /// For the latest pointer a compiled sibling takes precedence over the
    /// source blob; pinned versions resolve the versioned key directly.
    async fn get(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<Option<CodeArtifact>, StoreError>;

    /// Store an artifact under both the latest pointer and the versioned
    /// key.
    async fn put(
        &self,
        id: &str,
        version: &str,
        artifact: &CodeArtifact,
    ) -> Result<(), StoreError>;

    /// Store the compiled sibling for code whose source required
    /// compilation.
    async fn put_compiled(&self, id: &str, artifact: &CodeArtifact) -> Result<(), StoreError>;

    /// Store the source-map sibling.
    async fn put_source_map(&self, id: &str, source_map: &str) -> Result<(), StoreError>;

    /// Remove every blob for `id`. Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Shared edge cache for loader stubs, keyed by synthetic URL.
///
/// Read-after-write is immediate within an instance; across instances the
/// cache is eventually consistent, bounded by the entry TTL.
#[async_trait]
pub trait StubCache: Send + Sync {
    /// Fetch an unexpired cached stub.
    async fn get(&self, key: &str) -> Result<Option<FunctionStub>, StoreError>;

    /// Store a stub with the given TTL.
    async fn put(&self, key: &str, stub: &FunctionStub, ttl: Duration) -> Result<(), StoreError>;

    /// Invalidate a cached entry.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
