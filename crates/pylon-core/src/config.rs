// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration surfaces for the two pylon processes.
//!
//! The load balancer is configured entirely through environment
//! variables ([`LbConfig`], [`HealthConfig`]); the note store reads a
//! JSON file ([`StoreConfig`]) plus a small set of environment
//! variables ([`NodeEnv`]). All of them are parsed exactly once at
//! startup and passed down explicitly.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Replication mode for the note store, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// The primary for an item migrates to whichever replica last
    /// wrote it.
    #[serde(rename = "local-write")]
    LocalWrite,
    /// A fixed primary (`replicas[0]`) serializes all writes.
    #[serde(rename = "remote-write")]
    RemoteWrite,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalWrite => write!(f, "local-write"),
            Self::RemoteWrite => write!(f, "remote-write"),
        }
    }
}

/// Note store configuration file.
///
/// ```json
/// { "servicePort": 8080,
///   "sync": "remote-write",
///   "replicas": ["10.0.0.2:8080", "10.0.0.3:8080"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Port the note store API listens on.
    pub service_port: u16,
    /// Replication mode.
    pub sync: SyncMode,
    /// Fixed, ordered replica set as `host:port` entries. Position 0
    /// is the designated primary under remote-write.
    pub replicas: Vec<String>,
}

impl StoreConfig {
    /// Load and validate the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse and validate a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or fails
    /// validation.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the port range and replica list.
    ///
    /// Replica address syntax is deliberately not validated.
    fn validate(&self) -> Result<()> {
        if self.service_port == 0 {
            return Err(Error::Config("servicePort must be in the range [1, 65535]".into()));
        }
        if self.replicas.is_empty() {
            return Err(Error::Config("at least one replica is required".into()));
        }
        Ok(())
    }
}

/// Environment surface for one note store replica.
#[derive(Debug, Clone)]
pub struct NodeEnv {
    /// Directory for `<id>.json` note files (`SEPH_DATA`).
    pub data_dir: PathBuf,
    /// Whether this process is the fixed primary (`IS_REPLICA_0`
    /// set to `TRUE`).
    pub is_replica0: bool,
    /// Self identifier used as the `primary` header value under
    /// local-write (`REPLICA_ID`). Must match this replica's own
    /// entry in the configured replica list.
    pub replica_id: Option<String>,
}

impl NodeEnv {
    /// Reads the note store environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = match std::env::var("SEPH_DATA") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                warn!("$SEPH_DATA not set, defaulting to ./data");
                PathBuf::from("./data")
            }
        };

        Self {
            data_dir,
            is_replica0: std::env::var("IS_REPLICA_0").is_ok_and(|v| v == "TRUE"),
            replica_id: std::env::var("REPLICA_ID").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Health check tuning for the load balancer's control channels.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Sleep between consecutive probes (`HEALTH_CHECK_INTERVAL`).
    pub interval: Duration,
    /// Deadline for a probe reply (`HEALTH_CHECK_TIMEOUT`).
    pub timeout: Duration,
    /// Consecutive failures before a replica is evicted
    /// (`HEALTH_CHECK_MAX_FAILURE`).
    pub max_failure: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), timeout: Duration::from_secs(5), max_failure: 5 }
    }
}

impl HealthConfig {
    /// Reads the health check environment variables, falling back to
    /// the defaults on anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: Duration::from_secs(env_seconds(
                "HEALTH_CHECK_INTERVAL",
                defaults.interval.as_secs(),
            )),
            timeout: Duration::from_secs(env_seconds(
                "HEALTH_CHECK_TIMEOUT",
                defaults.timeout.as_secs(),
            )),
            max_failure: env_seconds("HEALTH_CHECK_MAX_FAILURE", u64::from(defaults.max_failure))
                as u32,
        }
    }
}

/// Load balancer configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct LbConfig {
    /// Public address both the control plane and every data-plane
    /// listener bind to (`LB_LISTEN_ADDR`).
    pub listen_addr: IpAddr,
    /// Control plane port (`LB_LISTEN_PORT`).
    pub listen_port: u16,
    /// Health check tuning.
    pub health: HealthConfig,
}

impl Default for LbConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 8080,
            health: HealthConfig::default(),
        }
    }
}

impl LbConfig {
    /// Reads the load balancer environment variables.
    ///
    /// `LB_LISTEN_ADDR` accepts either a plain IP or CIDR notation
    /// (the network part is used); anything unparsable falls back to
    /// `0.0.0.0` with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let listen_addr = match std::env::var("LB_LISTEN_ADDR") {
            Ok(raw) if !raw.is_empty() => parse_cidr_or_ip(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "could not parse $LB_LISTEN_ADDR, defaulting to 0.0.0.0");
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let listen_port = match std::env::var("LB_LISTEN_PORT") {
            Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "could not parse $LB_LISTEN_PORT, defaulting to 8080");
                8080
            }),
            _ => 8080,
        };

        Self { listen_addr, listen_port, health: HealthConfig::from_env() }
    }
}

/// Parses `a.b.c.d` or `a.b.c.d/len` into an address.
fn parse_cidr_or_ip(raw: &str) -> Option<IpAddr> {
    let addr_part = raw.split('/').next()?;
    addr_part.trim().parse().ok()
}

/// Reads an integer environment variable, warning and defaulting on
/// anything invalid.
fn env_seconds(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "could not parse as integer, using default");
            default
        }),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let config = StoreConfig::parse(
            r#"{"servicePort": 8080, "sync": "remote-write",
                "replicas": ["10.0.0.2:8080", "10.0.0.3:8080"]}"#,
        )
        .unwrap();

        assert_eq!(config.service_port, 8080);
        assert_eq!(config.sync, SyncMode::RemoteWrite);
        assert_eq!(config.replicas.len(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.json");
        std::fs::write(
            &path,
            r#"{"servicePort": 8080, "sync": "local-write", "replicas": ["a:1", "b:1"]}"#,
        )
        .unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.sync, SyncMode::LocalWrite);

        let err = StoreConfig::from_file(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_reject_unknown_sync_mode() {
        let err = StoreConfig::parse(
            r#"{"servicePort": 8080, "sync": "quorum-write", "replicas": ["a:1"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_reject_zero_port() {
        let err = StoreConfig::parse(
            r#"{"servicePort": 0, "sync": "local-write", "replicas": ["a:1"]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("servicePort"));
    }

    #[test]
    fn test_reject_empty_replicas() {
        let err = StoreConfig::parse(
            r#"{"servicePort": 8080, "sync": "local-write", "replicas": []}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_port_65535_accepted() {
        let config = StoreConfig::parse(
            r#"{"servicePort": 65535, "sync": "local-write", "replicas": ["a:1"]}"#,
        )
        .unwrap();
        assert_eq!(config.service_port, 65535);
    }

    #[test]
    fn test_parse_cidr_or_ip() {
        assert_eq!(parse_cidr_or_ip("10.1.2.3"), Some("10.1.2.3".parse().unwrap()));
        assert_eq!(parse_cidr_or_ip("192.168.0.0/24"), Some("192.168.0.0".parse().unwrap()));
        assert_eq!(parse_cidr_or_ip("not-an-address"), None);
    }

    #[test]
    fn test_sync_mode_display() {
        assert_eq!(SyncMode::LocalWrite.to_string(), "local-write");
        assert_eq!(SyncMode::RemoteWrite.to_string(), "remote-write");
    }

    #[test]
    fn test_health_defaults() {
        let health = HealthConfig::default();
        assert_eq!(health.interval, Duration::from_secs(2));
        assert_eq!(health.timeout, Duration::from_secs(5));
        assert_eq!(health.max_failure, 5);
    }
}
