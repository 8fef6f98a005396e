// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config-file loading tests.

use ff_gateway::config::{ConfigError, GatewayConfig};
use std::io::Write;

#[test]
fn loads_and_validates_a_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
            bind = "127.0.0.1:9099"
            serviceName = "fabric-it"

            [auth]
            publicPaths = ["/", "/health"]

            [rateLimit.ip]
            windowMs = 60000
            maxRequests = 50

            [loader]
            cacheTtlSecs = 600

            [loader.breaker]
            failureThreshold = 3
        "#
    )
    .unwrap();

    let config = GatewayConfig::load(file.path()).unwrap();
    assert_eq!(config.bind, "127.0.0.1:9099");
    assert_eq!(config.service_name, "fabric-it");
    assert_eq!(config.loader.cache_ttl_secs, 600);
    assert_eq!(config.loader.breaker.failure_threshold, 3);
    assert_eq!(config.rate_limit.ip.unwrap().max_requests, 50);
}

#[test]
fn missing_file_is_reported() {
    let err = GatewayConfig::load(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn invalid_bind_fails_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "bind = \"not-an-addr\"").unwrap();

    let err = GatewayConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}
