// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Benchmark configuration.
//!
//! Two kinds of configuration exist:
//! - [`BenchConfig`]: process-wide tunables (transport naming, timeouts,
//!   padding, timer calibration), loaded with Figment.
//! - [`SessionConfig`]: the per-session parameters negotiated over the
//!   control channel. The initiator builds it from the command line; the
//!   responder builds it from the received parameters.
//!
//! `BenchConfig` sources in priority order (lowest to highest):
//! 1. Code defaults
//! 2. TOML file from the `MMAP_BENCH_CONFIG_PATH` environment variable
//! 3. Environment variables (`MMAP_BENCH_*`, `MMAP_BENCH_TRANSPORT_*`)
//! 4. Programmatic overrides passed to [`BenchConfig::extract_from`]

use std::time::Duration;

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

/// ENV pointing at an optional TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "MMAP_BENCH_CONFIG_PATH";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Transport tunables shared by both roles.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    /// Prefix of shared-memory endpoint names.
    #[validate(length(min = 1, max = 32))]
    pub shm_prefix: String,

    /// Bound on the endpoint address exchange, in milliseconds.
    #[validate(range(min = 1))]
    pub address_exchange_timeout_ms: u64,

    /// Extra bytes the responder registers past `region_length * thread_count`.
    pub region_padding: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            shm_prefix: "mmb".to_string(),
            address_exchange_timeout_ms: 5000,
            region_padding: 4096,
        }
    }
}

impl TransportConfig {
    pub fn address_exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.address_exchange_timeout_ms)
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BenchConfig {
    /// Name prefixed to every report line.
    #[validate(length(min = 1))]
    pub app_name: String,

    /// Window used to calibrate the cycle counter, in milliseconds.
    #[validate(range(min = 1, max = 10000))]
    pub calibration_ms: u64,

    #[validate(nested)]
    pub transport: TransportConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            app_name: "mmap-bench".to_string(),
            calibration_ms: 100,
            transport: TransportConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Create a Figment configuration with all sources merged.
    pub fn figment() -> Figment {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(BenchConfig::default()))
            .merge(Toml::file(&config_path))
            // MMAP_BENCH_TRANSPORT_SHM_PREFIX, MMAP_BENCH_TRANSPORT_REGION_PADDING, ...
            .merge(
                Env::prefixed("MMAP_BENCH_TRANSPORT_")
                    .map(|k| format!("transport.{}", k.as_str().to_lowercase()).into()),
            )
            // MMAP_BENCH_APP_NAME, MMAP_BENCH_CALIBRATION_MS
            .merge(Env::prefixed("MMAP_BENCH_").only(&["app_name", "calibration_ms"]))
    }

    /// Load configuration from the default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract and validate configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default figment with an additional TOML file merged on top.
    pub fn figment_with_file(path: &std::path::Path) -> Figment {
        Self::figment().merge(Toml::file(path))
    }

    pub fn calibration_window(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }
}

impl Provider for BenchConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("BenchConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

/// Parameters of one session. Immutable once negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Peer node: the host to connect to (initiator) or the peer address (responder).
    pub remote_node: String,
    /// Service (port) of the control channel.
    pub service_name: String,
    /// Bytes scanned by each worker thread.
    pub region_length: u64,
    pub thread_count: u64,
    /// Ask the responder to stop accepting after this session.
    pub once_mode: bool,
}

impl SessionConfig {
    /// Bytes mapped by the initiator: `region_length * thread_count`.
    pub fn mapped_length(&self) -> Option<usize> {
        let total = self.region_length.checked_mul(self.thread_count)?;
        usize::try_from(total).ok()
    }

    /// Bytes registered by the responder: the mapped length plus `padding`.
    pub fn registered_length(&self, padding: usize) -> Option<usize> {
        self.mapped_length()?.checked_add(padding)
    }

    /// Per-thread length as a host size.
    pub fn region_length_usize(&self) -> Option<usize> {
        usize::try_from(self.region_length).ok()
    }

    /// Thread count as a host size.
    pub fn thread_count_usize(&self) -> Option<usize> {
        usize::try_from(self.thread_count).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ENV_VARS: [&str; 5] = [
        CONFIG_PATH_ENV,
        "MMAP_BENCH_APP_NAME",
        "MMAP_BENCH_CALIBRATION_MS",
        "MMAP_BENCH_TRANSPORT_SHM_PREFIX",
        "MMAP_BENCH_TRANSPORT_ADDRESS_EXCHANGE_TIMEOUT_MS",
    ];

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.app_name, "mmap-bench");
        assert_eq!(config.transport.region_padding, 4096);
        assert_eq!(
            config.transport.address_exchange_timeout(),
            Duration::from_secs(5)
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_figment_defaults() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let config = BenchConfig::from_env().unwrap();
            assert_eq!(config.calibration_ms, 100);
            assert_eq!(config.transport.shm_prefix, "mmb");
        });
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, None),
                ("MMAP_BENCH_APP_NAME", Some("zmmap")),
                ("MMAP_BENCH_CALIBRATION_MS", None),
                ("MMAP_BENCH_TRANSPORT_SHM_PREFIX", Some("bench")),
                ("MMAP_BENCH_TRANSPORT_ADDRESS_EXCHANGE_TIMEOUT_MS", Some("250")),
            ],
            || {
                let config = BenchConfig::from_env().unwrap();
                assert_eq!(config.app_name, "zmmap");
                assert_eq!(config.transport.shm_prefix, "bench");
                assert_eq!(config.transport.address_exchange_timeout_ms, 250);
            },
        );
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "calibration_ms = 20\n\n[transport]\nregion_padding = 0"
        )
        .unwrap();

        temp_env::with_vars_unset(ENV_VARS, || {
            let config =
                BenchConfig::extract_from(BenchConfig::figment_with_file(file.path())).unwrap();
            assert_eq!(config.calibration_ms, 20);
            assert_eq!(config.transport.region_padding, 0);
        });
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        temp_env::with_vars_unset(ENV_VARS, || {
            let result = BenchConfig::extract_from(
                BenchConfig::figment().merge(("transport.address_exchange_timeout_ms", 0u64)),
            );
            assert!(matches!(result, Err(ConfigError::Validation(_))));
        });
    }

    #[test]
    fn test_session_lengths() {
        let session = SessionConfig {
            remote_node: "localhost".into(),
            service_name: "22222".into(),
            region_length: 4096,
            thread_count: 4,
            once_mode: false,
        };
        assert_eq!(session.mapped_length(), Some(16384));
        assert_eq!(session.registered_length(4096), Some(20480));

        let overflow = SessionConfig {
            region_length: u64::MAX,
            thread_count: 2,
            ..session
        };
        assert_eq!(overflow.mapped_length(), None);
    }
}
