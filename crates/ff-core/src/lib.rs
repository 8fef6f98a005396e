// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-core
//!
//! The stable contract for Function Fabric: function metadata with its
//! kind-discriminated payloads, code artifacts, runnable stubs, invocation
//! fingerprints, the error taxonomy, and the validation rules applied at
//! every trust boundary.
//!
//! If you only take one dependency, take this one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Code artifacts (text and binary blobs) owned by the code store.
pub mod artifact;
/// Error taxonomy shared across the serving pipeline.
pub mod error;
/// Canonical JSON serialization and invocation fingerprints.
pub mod fingerprint;
/// Validation rules applied at every trust boundary.
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub use artifact::CodeArtifact;
pub use error::ErrorKind;
pub use fingerprint::{canonical_json, invocation_fingerprint, sha256_hex};
pub use validate::ValidationError;

/// Service name advertised by the health endpoint and audit events.
pub const SERVICE_NAME: &str = "function-fabric";

/// Maximum length of a function identifier.
pub const MAX_FUNCTION_ID_LENGTH: usize = 64;

/// Maximum serialized size of a user-supplied JSON Schema, in bytes.
pub const MAX_SCHEMA_BYTES: usize = 100_000;

/// Maximum deploy body size, gated on `Content-Length` (50 MB).
pub const MAX_DEPLOY_BODY_BYTES: usize = 50 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Function metadata
// ---------------------------------------------------------------------------

/// Deployed-function metadata, identified by `(id, version)`.
///
/// Metadata is immutable once stored for a given `(id, version)` pair; the
/// registry decides whether a redeploy of the same pair is rejected or
/// overwrites idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionMetadata {
    /// Function identifier (`^[A-Za-z][A-Za-z0-9_-]*$`, ≤ 64 chars, no
    /// doubled separators).
    pub id: String,

    /// Semantic version (`MAJOR.MINOR.PATCH`, optional prerelease/build,
    /// no leading zeros, no `v` prefix).
    pub version: String,

    /// Execution kind and its kind-specific payload.
    #[serde(flatten)]
    pub kind: FunctionKind,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Server-assigned creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Server-assigned last-update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Execution kind discriminator with the kind-specific record.
///
/// Serialized with `#[serde(tag = "kind")]`; unknown tags are rejected at
/// the deserialization boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FunctionKind {
    /// Deterministic code, executed by the host sandbox (tier 1).
    Code(CodeFunction),
    /// Single-shot AI generation (tier 2).
    Generative(GenerativeFunction),
    /// Multi-step AI agent with tools (tier 3).
    Agentic(AgenticFunction),
    /// Human-in-the-loop task (tier 4).
    Human(HumanFunction),
    /// Pipeline of function invocations threaded output → input.
    Cascade(CascadeFunction),
}

impl FunctionKind {
    /// Wire label for this kind (`"code"`, `"generative"`, ...).
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Code(_) => "code",
            Self::Generative(_) => "generative",
            Self::Agentic(_) => "agentic",
            Self::Human(_) => "human",
            Self::Cascade(_) => "cascade",
        }
    }

    /// Execution tier for this kind. Cascades have no tier of their own;
    /// each step runs in its declared tier.
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Self::Code(_) => Some(Tier::Code),
            Self::Generative(_) => Some(Tier::Generative),
            Self::Agentic(_) => Some(Tier::Agentic),
            Self::Human(_) => Some(Tier::Human),
            Self::Cascade(_) => None,
        }
    }
}

/// Numeric execution tier with an associated timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Tier 1: deterministic code, 5 s budget.
    Code,
    /// Tier 2: single-shot generation, 30 s budget.
    Generative,
    /// Tier 3: agent loop, 5 min budget.
    Agentic,
    /// Tier 4: human task, 24 h budget.
    Human,
}

impl Tier {
    /// Numeric tier (1–4) as reported in `_meta.tier`.
    #[must_use]
    pub fn number(&self) -> u8 {
        match self {
            Self::Code => 1,
            Self::Generative => 2,
            Self::Agentic => 3,
            Self::Human => 4,
        }
    }

    /// Default timeout budget for this tier.
    #[must_use]
    pub fn default_budget(&self) -> Duration {
        match self {
            Self::Code => Duration::from_secs(5),
            Self::Generative => Duration::from_secs(30),
            Self::Agentic => Duration::from_secs(5 * 60),
            Self::Human => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Generative => write!(f, "generative"),
            Self::Agentic => write!(f, "agentic"),
            Self::Human => write!(f, "human"),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind payloads
// ---------------------------------------------------------------------------

/// Payload for `kind = "code"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFunction {
    /// Source language of the deployed code.
    pub language: Language,

    /// Entry point, a relative path inside the artifact (no `..`, no `//`,
    /// not absolute).
    pub entry_point: String,

    /// Declared dependencies, name → semver requirement.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

/// Languages accepted for code functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Language {
    Typescript,
    Javascript,
    Rust,
    Go,
    Zig,
    Assemblyscript,
    Python,
    Csharp,
}

impl Language {
    /// All accepted languages, in wire order.
    pub const ALL: &'static [Language] = &[
        Language::Typescript,
        Language::Javascript,
        Language::Rust,
        Language::Go,
        Language::Zig,
        Language::Assemblyscript,
        Language::Python,
        Language::Csharp,
    ];

    /// Wire name of this language.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typescript => "typescript",
            Self::Javascript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Zig => "zig",
            Self::Assemblyscript => "assemblyscript",
            Self::Python => "python",
            Self::Csharp => "csharp",
        }
    }

    /// Whether sources in this language go through the external compile
    /// service before execution.
    #[must_use]
    pub fn requires_compilation(&self) -> bool {
        !matches!(self, Self::Javascript | Self::Python)
    }
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or(())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for `kind = "generative"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerativeFunction {
    /// Model identifier; the executor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// User prompt template; `{{var}}` placeholders are substituted with
    /// JSON-stringified input fields.
    pub user_prompt: String,

    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// JSON Schema the model output must satisfy. When set, the first text
    /// content of the response is parsed as JSON and validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,

    /// Sampling temperature in `[0, 2]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Completion token cap (positive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Few-shot examples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<PromptExample>,

    /// JSON Schema describing expected invocation input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// A single few-shot example attached to a generative function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptExample {
    /// Example input.
    pub input: serde_json::Value,
    /// Expected output.
    pub output: serde_json::Value,
}

/// Payload for `kind = "agentic"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticFunction {
    /// Model identifier; the executor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System prompt establishing the agent persona.
    pub system_prompt: String,

    /// The goal the agent iterates toward.
    pub goal: String,

    /// Tools available to the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    /// Iteration cap for the agent loop (positive; executor default 10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    /// Cumulative token budget across iterations (positive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,

    /// JSON Schema the final answer must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// A tool exposed to an agentic function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool name, unique within the function.
    pub name: String,

    /// Description handed to the model.
    pub description: String,

    /// JSON Schema for the tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    /// How the tool is implemented.
    pub implementation: ToolImplementation,
}

/// Tool implementation variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ToolImplementation {
    /// One of the fixed built-in tools (`web_search`, `web_fetch`).
    Builtin {
        /// Built-in tool name.
        name: String,
    },
    /// HTTP POST with a JSON body to an external endpoint.
    Api {
        /// Endpoint URL.
        endpoint: String,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Inline code string. Never executed; rejected at execution time;
    /// callers must deploy the code as a function and reference it by id.
    Inline {
        /// The (unsupported) code string.
        code: String,
    },
    /// Nested dispatch to another deployed function.
    Function {
        /// Target function id.
        function_id: String,
    },
}

/// Payload for `kind = "human"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanFunction {
    /// Interaction style presented to the assignee.
    #[serde(default)]
    pub interaction_type: InteractionType,

    /// Free-form UI hints for the task frontend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<serde_json::Value>,

    /// Who the task is routed to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<Assignee>,

    /// Completion deadline configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaSpec>,

    /// Reminder schedule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<Reminder>,

    /// Escalation target when the SLA lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

/// Human-task interaction styles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum InteractionType {
    #[default]
    Approval,
    Review,
    Input,
    Selection,
    Annotation,
    Verification,
    Custom,
}

/// A human-task assignee reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignee {
    /// Assignee addressing scheme (`user`, `email`, `role`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Address within the scheme.
    pub value: String,
}

/// SLA for a human task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaSpec {
    /// Time allowed before the task expires, in milliseconds.
    pub timeout_ms: u64,
}

/// A reminder sent while a human task is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    /// Delay after task creation, in milliseconds.
    pub after_ms: u64,
    /// Optional reminder message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Escalation applied when a human task exceeds its SLA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    /// Delay after task creation before escalating, in milliseconds.
    pub after_ms: u64,
    /// Escalation assignees.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<Assignee>,
}

/// Payload for `kind = "cascade"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeFunction {
    /// Ordered pipeline steps.
    pub steps: Vec<CascadeStep>,

    /// How step failures are handled.
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

/// One step of a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeStep {
    /// Function invoked by this step.
    pub function_id: String,
    /// Tier the step is declared to run in.
    pub tier: Tier,
}

/// Cascade failure policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandling {
    /// First failure aborts the cascade.
    #[default]
    FailFast,
    /// Failures are collected and remaining steps proceed.
    Continue,
    /// Like `continue`; the cascade reports whatever succeeded.
    BestEffort,
}

// ---------------------------------------------------------------------------
// Function stub
// ---------------------------------------------------------------------------

/// Cacheable runtime view of `(metadata, artifact)`.
///
/// Created by the loader, referenced by the dispatcher per invocation, and
/// released by cache eviction. The stub is pure data; the dispatcher gives
/// it behavior by selecting the tier executor for its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStub {
    /// Resolved metadata.
    pub metadata: FunctionMetadata,

    /// Code artifact, present for code functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<CodeArtifact>,

    /// When the loader materialized this stub.
    pub loaded_at: DateTime<Utc>,

    /// Version the stub was resolved to.
    pub version: String,
}

impl FunctionStub {
    /// Build a stub from loaded parts, stamping `loaded_at` with now.
    #[must_use]
    pub fn new(metadata: FunctionMetadata, artifact: Option<CodeArtifact>) -> Self {
        let version = metadata.version.clone();
        Self {
            metadata,
            artifact,
            loaded_at: Utc::now(),
            version,
        }
    }
}
