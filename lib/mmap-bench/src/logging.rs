// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! - Configuration loaded from:
//!   1. The `MMAP_BENCH_LOG` environment variable (highest priority).
//!   2. Optional TOML file pointed to by the `MMAP_BENCH_LOGGING_CONFIG_PATH` environment variable.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `MMAP_BENCH_LOGGING_JSONL` environment variable to `1`.
//!
//! To use local timezone for logging timestamps, set `MMAP_BENCH_LOG_USE_LOCAL_TZ` to `1`.
//! Colour is disabled with `MMAP_BENCH_SDK_DISABLE_ANSI_LOGGING=1`. Logs go to stderr;
//! stdout carries only the per-thread report lines.
//!
//! Example:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "dynamo_mmap_bench::engine" = "debug"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt};

/// ENV used to set the log level
const FILTER_ENV: &str = "MMAP_BENCH_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// ENV used to set the path to the logging configuration file
const CONFIG_PATH_ENV: &str = "MMAP_BENCH_LOGGING_CONFIG_PATH";

const JSONL_ENV: &str = "MMAP_BENCH_LOGGING_JSONL";
const DISABLE_ANSI_ENV: &str = "MMAP_BENCH_SDK_DISABLE_ANSI_LOGGING";
const LOCAL_TZ_ENV: &str = "MMAP_BENCH_LOG_USE_LOCAL_TZ";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::new(),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter_layer = filters(load_config());
    // The generics mean we have to repeat everything. Each builder method returns a
    // specialized type.
    if env_is_truthy(JSONL_ENV) {
        let l = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).init();
    } else if env_is_truthy(LOCAL_TZ_ENV) {
        let l = fmt::layer()
            .with_ansi(!env_is_truthy(DISABLE_ANSI_ENV))
            .with_thread_names(true)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).init();
    } else {
        let l = fmt::layer()
            .with_ansi(!env_is_truthy(DISABLE_ANSI_ENV))
            .with_thread_names(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).init();
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config.log_level.parse::<Directive>().unwrap_or_else(|e| {
        eprintln!(
            "Invalid log level '{}': {e}; using {DEFAULT_FILTER_LEVEL}",
            config.log_level
        );
        tracing::level_filters::LevelFilter::INFO.into()
    });
    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    // apply the log_filters from the config file
    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();
    let figment = Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(config_path));

    figment.extract().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid logging configuration: {e}");
        LoggingConfig::default()
    })
}

fn env_is_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            assert_eq!(load_config(), LoggingConfig::default());
        });
    }

    #[test]
    fn test_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log_level = \"warn\"\n\n[log_filters]\n\"dynamo_mmap_bench::engine\" = \"debug\""
        )
        .unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(file.path()), || {
            let config = load_config();
            assert_eq!(config.log_level, "warn");
            assert_eq!(
                config.log_filters.get("dynamo_mmap_bench::engine").map(String::as_str),
                Some("debug")
            );
        });
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = [1, 2]").unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(file.path()), || {
            assert_eq!(load_config(), LoggingConfig::default());
        });
    }

    #[test]
    fn test_truthy() {
        temp_env::with_vars(
            [("MMAP_BENCH_TEST_FLAG_A", Some("1")), ("MMAP_BENCH_TEST_FLAG_B", Some("off"))],
            || {
                assert!(env_is_truthy("MMAP_BENCH_TEST_FLAG_A"));
                assert!(!env_is_truthy("MMAP_BENCH_TEST_FLAG_B"));
                assert!(!env_is_truthy("MMAP_BENCH_TEST_FLAG_UNSET"));
            },
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialized twice");
    }
}
