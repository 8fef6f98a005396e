// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted key layout.
//!
//! Metadata lives under `registry:<id>` (latest pointer) and
//! `registry:<id>:<version>`; code under `code:<id>` /
//! `code:<id>:<version>` with `:compiled` and `:sourcemap` siblings. Stub
//! cache entries key on a synthetic URL under `loader-cache.internal`.
//! Function ids cannot contain `:` or `/`, so the layout is unambiguous.

/// Origin of the synthetic stub-cache URLs.
pub const STUB_CACHE_ORIGIN: &str = "https://loader-cache.internal";

/// Latest-pointer metadata key.
#[must_use]
pub fn registry_key(id: &str) -> String {
    format!("registry:{id}")
}

/// Versioned metadata key.
#[must_use]
pub fn registry_version_key(id: &str, version: &str) -> String {
    format!("registry:{id}:{version}")
}

/// Latest-pointer code key.
#[must_use]
pub fn code_key(id: &str) -> String {
    format!("code:{id}")
}

/// Versioned code key.
#[must_use]
pub fn code_version_key(id: &str, version: &str) -> String {
    format!("code:{id}:{version}")
}

/// Compiled-output sibling key.
#[must_use]
pub fn code_compiled_key(id: &str) -> String {
    format!("code:{id}:compiled")
}

/// Source-map sibling key.
#[must_use]
pub fn code_sourcemap_key(id: &str) -> String {
    format!("code:{id}:sourcemap")
}

/// Stub-cache key for `id` at `version` (or the latest pointer).
#[must_use]
pub fn stub_cache_key(id: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{STUB_CACHE_ORIGIN}/stubs/{id}/{v}"),
        None => format!("{STUB_CACHE_ORIGIN}/stubs/{id}/latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_contract() {
        assert_eq!(registry_key("sum"), "registry:sum");
        assert_eq!(registry_version_key("sum", "1.2.3"), "registry:sum:1.2.3");
        assert_eq!(code_key("sum"), "code:sum");
        assert_eq!(code_version_key("sum", "1.2.3"), "code:sum:1.2.3");
        assert_eq!(code_compiled_key("sum"), "code:sum:compiled");
        assert_eq!(code_sourcemap_key("sum"), "code:sum:sourcemap");
        assert_eq!(
            stub_cache_key("sum", None),
            "https://loader-cache.internal/stubs/sum/latest"
        );
        assert_eq!(
            stub_cache_key("sum", Some("1.2.3")),
            "https://loader-cache.internal/stubs/sum/1.2.3"
        );
    }
}
