// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation rules applied at every trust boundary.
//!
//! Deploy bodies are validated field-by-field *before* the typed parse so
//! the first violation wins in a fixed order: id → version → language →
//! code presence → entry point → dependencies, then the kind-specific
//! semantic checks. JSON ingested from persistent stores goes through
//! [`decode_stored`]; parse-then-validate, never silent coercion.

use crate::{
    CascadeFunction, FunctionKind, FunctionMetadata, Language, MAX_FUNCTION_ID_LENGTH,
    MAX_SCHEMA_BYTES, ToolImplementation, ToolSpec,
};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A validation failure. The `Display` impl is the client-facing message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("missing required field: {field}")]
    MissingField {
        /// Field name as it appears on the wire.
        field: &'static str,
    },

    /// The function id violates the identifier rules.
    #[error("invalid function id: {reason}")]
    InvalidId {
        /// What rule was broken.
        reason: String,
    },

    /// The version is not strict SemVer.
    #[error("invalid version: {reason}")]
    InvalidVersion {
        /// Parser detail.
        reason: String,
    },

    /// The language is not one of the accepted set.
    #[error("unsupported language: {language}")]
    InvalidLanguage {
        /// The rejected value.
        language: String,
    },

    /// A code function was deployed without a code artifact.
    #[error("code functions require a code artifact")]
    MissingCode,

    /// The entry point violates the path rules.
    #[error("invalid entry point: {reason}")]
    InvalidEntryPoint {
        /// What rule was broken.
        reason: String,
    },

    /// A declared dependency is malformed.
    #[error("invalid dependency '{name}': {reason}")]
    InvalidDependency {
        /// Dependency name.
        name: String,
        /// What rule was broken.
        reason: String,
    },

    /// A numeric parameter is outside its permitted range.
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// What range was violated.
        reason: String,
    },

    /// A user-supplied JSON Schema exceeds the serialized size cap.
    #[error("{field} exceeds {MAX_SCHEMA_BYTES} bytes when serialized ({size} bytes)")]
    SchemaTooLarge {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Observed serialized size.
        size: usize,
    },

    /// A user-supplied JSON Schema does not serialize or compile.
    #[error("{field} is not a valid JSON Schema: {reason}")]
    InvalidSchema {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Compiler or serializer detail.
        reason: String,
    },

    /// A tool declaration is malformed.
    #[error("invalid tool '{name}': {reason}")]
    InvalidTool {
        /// Tool name (may be empty when the name itself is the problem).
        name: String,
        /// What rule was broken.
        reason: String,
    },

    /// An assignee declaration is malformed.
    #[error("invalid assignee at index {index}: {reason}")]
    InvalidAssignee {
        /// Position in the assignees array.
        index: usize,
        /// What rule was broken.
        reason: String,
    },

    /// A cascade declaration is malformed.
    #[error("invalid cascade: {reason}")]
    InvalidCascade {
        /// What rule was broken.
        reason: String,
    },

    /// The `(id, version)` pair is already deployed and the registry policy
    /// rejects redeploys.
    #[error("function {id}@{version} is already deployed")]
    DuplicateVersion {
        /// Function id.
        id: String,
        /// Conflicting version.
        version: String,
    },

    /// The payload does not match the expected structure.
    #[error("malformed payload: {detail}")]
    Malformed {
        /// Parser detail.
        detail: String,
    },
}

impl ValidationError {
    /// Taxonomy kind for this error (always `validation`).
    #[must_use]
    pub fn kind(&self) -> crate::ErrorKind {
        crate::ErrorKind::Validation
    }
}

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

/// Validate a function identifier.
///
/// Rules: `^[A-Za-z][A-Za-z0-9_-]*$`, no doubled separators, ≤ 64 chars.
pub fn validate_function_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::InvalidId {
            reason: "must not be empty".into(),
        });
    }
    if id.len() > MAX_FUNCTION_ID_LENGTH {
        return Err(ValidationError::InvalidId {
            reason: format!(
                "must be at most {MAX_FUNCTION_ID_LENGTH} characters (got {})",
                id.len()
            ),
        });
    }

    let mut chars = id.chars();
    let first = chars.next().unwrap_or_default();
    if !first.is_ascii_alphabetic() {
        return Err(ValidationError::InvalidId {
            reason: format!("must start with a letter (got '{first}')"),
        });
    }

    let mut prev_separator = false;
    for c in id.chars() {
        let is_separator = c == '-' || c == '_';
        if !is_separator && !c.is_ascii_alphanumeric() {
            return Err(ValidationError::InvalidId {
                reason: format!("contains invalid character '{c}'"),
            });
        }
        if is_separator && prev_separator {
            return Err(ValidationError::InvalidId {
                reason: "contains doubled separators".into(),
            });
        }
        prev_separator = is_separator;
    }

    Ok(())
}

/// Validate a function version string as strict SemVer 2.0.
///
/// The `semver` grammar already rejects leading zeros and `v` prefixes.
pub fn validate_version(version: &str) -> Result<semver::Version, ValidationError> {
    semver::Version::parse(version).map_err(|e| ValidationError::InvalidVersion {
        reason: e.to_string(),
    })
}

/// Validate a language name against the accepted set.
pub fn validate_language(language: &str) -> Result<Language, ValidationError> {
    language
        .parse()
        .map_err(|()| ValidationError::InvalidLanguage {
            language: language.to_string(),
        })
}

/// Validate an entry-point path: relative, no `..`, no `//`.
pub fn validate_entry_point(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::InvalidEntryPoint {
            reason: "must not be empty".into(),
        });
    }
    if path.starts_with('/') {
        return Err(ValidationError::InvalidEntryPoint {
            reason: "must be a relative path".into(),
        });
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(ValidationError::InvalidEntryPoint {
            reason: "must not contain '..'".into(),
        });
    }
    if path.contains("//") {
        return Err(ValidationError::InvalidEntryPoint {
            reason: "must not contain '//'".into(),
        });
    }
    Ok(())
}

/// Validate a dependency map: non-empty names, parseable semver
/// requirements.
pub fn validate_dependencies<'a, I>(dependencies: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (name, requirement) in dependencies {
        if name.is_empty() {
            return Err(ValidationError::InvalidDependency {
                name: name.to_string(),
                reason: "name must not be empty".into(),
            });
        }
        if let Err(e) = semver::VersionReq::parse(requirement) {
            return Err(ValidationError::InvalidDependency {
                name: name.to_string(),
                reason: format!("requirement '{requirement}' is not semver: {e}"),
            });
        }
    }
    Ok(())
}

/// Validate a user-supplied JSON Schema.
///
/// The schema must serialize (a failure to serialize is treated as a cycle
/// per the contract), stay within [`MAX_SCHEMA_BYTES`], and compile.
pub fn validate_schema_value(schema: &Value, field: &'static str) -> Result<(), ValidationError> {
    let serialized =
        serde_json::to_string(schema).map_err(|e| ValidationError::InvalidSchema {
            field,
            reason: format!("could not be serialized (cycle?): {e}"),
        })?;
    if serialized.len() > MAX_SCHEMA_BYTES {
        return Err(ValidationError::SchemaTooLarge {
            field,
            size: serialized.len(),
        });
    }
    jsonschema::validator_for(schema).map_err(|e| ValidationError::InvalidSchema {
        field,
        reason: e.to_string(),
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Deploy-body validation (the ordered surface)
// ---------------------------------------------------------------------------

const KNOWN_KINDS: &[&str] = &["code", "generative", "agentic", "human", "cascade"];

/// Validate a raw deploy body and produce typed metadata.
///
/// This is the fallible surface (`validate_safe`): the first violation wins,
/// checked in the order id → version → language → code presence → entry
/// point → dependencies, then the typed parse and kind-specific checks.
///
/// `has_code` reports whether the deploy carried a code artifact alongside
/// the metadata.
pub fn validate_deploy(body: &Value, has_code: bool) -> Result<FunctionMetadata, ValidationError> {
    let obj = body.as_object().ok_or_else(|| ValidationError::Malformed {
        detail: "deploy body must be a JSON object".into(),
    })?;

    // 1. id
    let id = match obj.get("id") {
        Some(Value::String(id)) => id.as_str(),
        Some(_) => {
            return Err(ValidationError::InvalidId {
                reason: "must be a string".into(),
            });
        }
        None => return Err(ValidationError::MissingField { field: "id" }),
    };
    validate_function_id(id)?;

    // 2. version
    let version = match obj.get("version") {
        Some(Value::String(v)) => v.as_str(),
        Some(_) => {
            return Err(ValidationError::InvalidVersion {
                reason: "must be a string".into(),
            });
        }
        None => return Err(ValidationError::MissingField { field: "version" }),
    };
    validate_version(version)?;

    let kind = obj.get("kind").and_then(Value::as_str);

    // 3. language; checked whenever present so a bad value is reported in
    // order even when the kind tag is absent or wrong.
    match obj.get("language") {
        Some(Value::String(lang)) => {
            validate_language(lang)?;
        }
        Some(_) => {
            return Err(ValidationError::InvalidLanguage {
                language: "(non-string)".into(),
            });
        }
        None if kind == Some("code") => {
            return Err(ValidationError::MissingField { field: "language" });
        }
        None => {}
    }

    // 4. code presence
    if kind == Some("code") && !has_code {
        return Err(ValidationError::MissingCode);
    }

    // 5. entry point
    match obj.get("entryPoint") {
        Some(Value::String(ep)) => validate_entry_point(ep)?,
        Some(_) => {
            return Err(ValidationError::InvalidEntryPoint {
                reason: "must be a string".into(),
            });
        }
        None if kind == Some("code") => {
            return Err(ValidationError::MissingField { field: "entryPoint" });
        }
        None => {}
    }

    // 6. dependencies
    if let Some(deps) = obj.get("dependencies") {
        let map = deps.as_object().ok_or_else(|| ValidationError::Malformed {
            detail: "dependencies must be an object".into(),
        })?;
        let mut pairs = Vec::with_capacity(map.len());
        for (name, req) in map {
            let req = req.as_str().ok_or_else(|| ValidationError::InvalidDependency {
                name: name.clone(),
                reason: "requirement must be a string".into(),
            })?;
            pairs.push((name.as_str(), req));
        }
        validate_dependencies(pairs)?;
    }

    // Kind tag; unknown tags are rejected here, before the typed parse, so
    // the message names the tag instead of a serde internals string.
    match kind {
        None => return Err(ValidationError::MissingField { field: "kind" }),
        Some(k) if !KNOWN_KINDS.contains(&k) => {
            return Err(ValidationError::Malformed {
                detail: format!("unknown kind: {k}"),
            });
        }
        Some(_) => {}
    }

    let metadata: FunctionMetadata =
        serde_json::from_value(body.clone()).map_err(|e| ValidationError::Malformed {
            detail: e.to_string(),
        })?;

    validate_metadata(&metadata)?;
    Ok(metadata)
}

/// Legacy throwing surface: same rules as [`validate_deploy`], with the
/// structured error erased for callers that only bubble.
pub fn ensure_deploy_valid(
    body: &Value,
    has_code: bool,
) -> Result<FunctionMetadata, Box<dyn std::error::Error + Send + Sync>> {
    validate_deploy(body, has_code).map_err(Into::into)
}

// ---------------------------------------------------------------------------
// Typed-metadata validation (kind-specific semantics)
// ---------------------------------------------------------------------------

/// Validate typed metadata. Used after the ordered deploy checks, by PATCH
/// merges, and when re-ingesting metadata from persistent stores.
pub fn validate_metadata(metadata: &FunctionMetadata) -> Result<(), ValidationError> {
    validate_function_id(&metadata.id)?;
    validate_version(&metadata.version)?;

    match &metadata.kind {
        FunctionKind::Code(code) => {
            validate_entry_point(&code.entry_point)?;
            validate_dependencies(
                code.dependencies
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )?;
        }
        FunctionKind::Generative(generative) => {
            if generative.user_prompt.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "userPrompt",
                });
            }
            if let Some(t) = generative.temperature {
                if !t.is_finite() || !(0.0..=2.0).contains(&t) {
                    return Err(ValidationError::OutOfRange {
                        field: "temperature",
                        reason: format!("must be within [0, 2] (got {t})"),
                    });
                }
            }
            if generative.max_tokens == Some(0) {
                return Err(ValidationError::OutOfRange {
                    field: "maxTokens",
                    reason: "must be positive".into(),
                });
            }
            if let Some(schema) = &generative.output_schema {
                validate_schema_value(schema, "outputSchema")?;
            }
            if let Some(schema) = &generative.input_schema {
                validate_schema_value(schema, "inputSchema")?;
            }
        }
        FunctionKind::Agentic(agentic) => {
            if agentic.system_prompt.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "systemPrompt",
                });
            }
            if agentic.goal.trim().is_empty() {
                return Err(ValidationError::MissingField { field: "goal" });
            }
            if agentic.max_iterations == Some(0) {
                return Err(ValidationError::OutOfRange {
                    field: "maxIterations",
                    reason: "must be positive".into(),
                });
            }
            if agentic.token_budget == Some(0) {
                return Err(ValidationError::OutOfRange {
                    field: "tokenBudget",
                    reason: "must be positive".into(),
                });
            }
            validate_tools(&agentic.tools)?;
            if let Some(schema) = &agentic.output_schema {
                validate_schema_value(schema, "outputSchema")?;
            }
        }
        FunctionKind::Human(human) => {
            for (index, assignee) in human.assignees.iter().enumerate() {
                if assignee.kind.trim().is_empty() {
                    return Err(ValidationError::InvalidAssignee {
                        index,
                        reason: "type must not be empty".into(),
                    });
                }
                if assignee.value.trim().is_empty() {
                    return Err(ValidationError::InvalidAssignee {
                        index,
                        reason: "value must not be empty".into(),
                    });
                }
            }
        }
        FunctionKind::Cascade(cascade) => validate_cascade(cascade)?,
    }

    Ok(())
}

fn validate_tools(tools: &[ToolSpec]) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err(ValidationError::InvalidTool {
                name: tool.name.clone(),
                reason: "name must not be empty".into(),
            });
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(ValidationError::InvalidTool {
                name: tool.name.clone(),
                reason: "duplicate tool name".into(),
            });
        }
        if tool.description.trim().is_empty() {
            return Err(ValidationError::InvalidTool {
                name: tool.name.clone(),
                reason: "description must not be empty".into(),
            });
        }
        if let Some(schema) = &tool.input_schema {
            validate_schema_value(schema, "inputSchema")?;
        }
        match &tool.implementation {
            ToolImplementation::Builtin { name } => {
                if name.trim().is_empty() {
                    return Err(ValidationError::InvalidTool {
                        name: tool.name.clone(),
                        reason: "builtin name must not be empty".into(),
                    });
                }
            }
            ToolImplementation::Api { endpoint, .. } => {
                if endpoint.trim().is_empty() {
                    return Err(ValidationError::InvalidTool {
                        name: tool.name.clone(),
                        reason: "api endpoint must not be empty".into(),
                    });
                }
            }
            ToolImplementation::Function { function_id } => {
                validate_function_id(function_id).map_err(|e| ValidationError::InvalidTool {
                    name: tool.name.clone(),
                    reason: e.to_string(),
                })?;
            }
            // Inline tools are structurally valid metadata; execution is
            // where they are rejected.
            ToolImplementation::Inline { .. } => {}
        }
    }
    Ok(())
}

fn validate_cascade(cascade: &CascadeFunction) -> Result<(), ValidationError> {
    if cascade.steps.is_empty() {
        return Err(ValidationError::InvalidCascade {
            reason: "steps must not be empty".into(),
        });
    }
    for step in &cascade.steps {
        validate_function_id(&step.function_id).map_err(|e| ValidationError::InvalidCascade {
            reason: format!("step '{}': {e}", step.function_id),
        })?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store ingestion
// ---------------------------------------------------------------------------

/// Parse-then-validate JSON ingested from a persistent store.
///
/// A structural failure raises a [`ValidationError::Malformed`] naming the
/// ingestion context; stored garbage is never silently coerced.
pub fn decode_stored<T: serde::de::DeserializeOwned>(
    raw: &str,
    context: &str,
) -> Result<T, ValidationError> {
    serde_json::from_str(raw).map_err(|e| ValidationError::Malformed {
        detail: format!("{context}: {e}"),
    })
}
