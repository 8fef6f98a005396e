// SPDX-License-Identifier: MIT OR Apache-2.0
//! Code artifacts.
//!
//! An artifact is either a text blob (source, or compiled JS with an
//! optional sibling source map) or a binary blob (validated WASM bytes).
//! Artifacts are owned by the code store and immutable per `(id, version)`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// WASM module magic number (`\0asm`).
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

/// Errors constructing an artifact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// The binary blob does not start with the WASM magic number.
    #[error("binary artifact is not a WASM module (bad magic)")]
    NotWasm,
    /// The binary blob is too short to be a WASM module.
    #[error("binary artifact is truncated ({len} bytes)")]
    Truncated {
        /// Observed length.
        len: usize,
    },
}

/// A code blob stored for a deployed function.
///
/// Binary payloads are serialized base64-encoded; everything else in the
/// persisted layout is plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CodeArtifact {
    /// Source text or compiled JavaScript.
    Text {
        /// The code itself.
        content: String,
        /// Optional sibling source map.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_map: Option<String>,
    },
    /// Compiled WASM bytes.
    Binary {
        /// Raw module bytes (base64 on the wire).
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        /// Exported symbol names, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exports: Option<Vec<String>>,
    },
}

impl CodeArtifact {
    /// Build a text artifact without a source map.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            source_map: None,
        }
    }

    /// Build a binary artifact, validating the WASM magic number.
    pub fn binary(bytes: Vec<u8>) -> Result<Self, ArtifactError> {
        if bytes.len() < 8 {
            return Err(ArtifactError::Truncated { len: bytes.len() });
        }
        if bytes[..4] != WASM_MAGIC {
            return Err(ArtifactError::NotWasm);
        }
        Ok(Self::Binary {
            bytes,
            exports: None,
        })
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text { content, .. } => content.len(),
            Self::Binary { bytes, .. } => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(de)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
