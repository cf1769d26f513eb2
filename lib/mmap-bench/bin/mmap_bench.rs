// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dynamo_mmap_bench::{BenchConfig, BenchError, OsSpawner, Server, SessionConfig, logging};

#[derive(Parser)]
#[command(
    name = "mmap-bench",
    version,
    about = "Multi-threaded remote memory read benchmark"
)]
struct Cli {
    /// Extra TOML configuration file merged over the environment
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept connections and serve one responder session at a time
    Server {
        /// Port to listen on
        service: String,
    },
    /// Connect to a server and run one benchmark
    Client {
        /// Ask the server to exit after this session
        #[arg(short, long)]
        once: bool,

        /// Number of worker threads
        #[arg(short, long, default_value_t = 1)]
        threads: u64,

        /// Server host
        node: String,

        /// Server port
        service: String,

        /// Bytes scanned per thread; accepts k, m and g suffixes (powers of 1024)
        #[arg(value_parser = parse_length)]
        length: u64,
    },
}

/// Parse a byte count with an optional `k`, `m` or `g` suffix.
fn parse_length(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_lowercase() {
                'k' => 10,
                'm' => 20,
                'g' => 30,
                _ => return Err(format!("unknown size suffix '{c}'")),
            };
            (&s[..i], shift)
        }
        _ => (s, 0),
    };
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid length '{s}': {e}"))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("length '{s}' is too large"))
}

fn load_config(path: Option<&PathBuf>) -> Result<BenchConfig, BenchError> {
    let figment = match path {
        Some(path) => BenchConfig::figment_with_file(path),
        None => BenchConfig::figment(),
    };
    Ok(BenchConfig::extract_from(figment)?)
}

#[cfg(unix)]
fn transport(bench: &BenchConfig) -> dynamo_mmap_transport::shm::ShmTransport {
    dynamo_mmap_transport::shm::ShmTransport::new(bench.transport.shm_prefix.clone())
}

#[cfg(unix)]
fn run(cli: Cli) -> Result<()> {
    let bench = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    tracing::debug!(?bench, "Loaded configuration");
    let transport = transport(&bench);

    match cli.command {
        Command::Server { service } => {
            let server = Server::bind(&service)
                .with_context(|| format!("Failed to listen on service {service}"))?;
            server.run(&transport, &bench)?;
        }
        Command::Client {
            once,
            threads,
            node,
            service,
            length,
        } => {
            let session = SessionConfig {
                remote_node: node,
                service_name: service,
                region_length: length,
                thread_count: threads,
                once_mode: once,
            };
            tracing::info!(
                node = %session.remote_node,
                service = %session.service_name,
                len = session.region_length,
                threads = session.thread_count,
                once = session.once_mode,
                "Starting benchmark"
            );
            dynamo_mmap_bench::run_client(&transport, session, &bench, &OsSpawner).result?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn run(_cli: Cli) -> Result<()> {
    anyhow::bail!("the shared-memory transport requires a Unix host")
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<BenchError>()
                .and_then(|e| u8::try_from(e.code().unsigned_abs()).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
