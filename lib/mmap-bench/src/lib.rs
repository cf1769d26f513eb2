// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Remote memory read benchmark.
//!
//! A responder registers a zeroed region sized for the requested workers and
//! hands the initiator a credential over a small control channel. The
//! initiator maps the region, lines up `thread_count` workers on a two-phase
//! barrier, has each scan its own slice, and reports per-thread throughput.
//! The leader worker tells the responder it may release the region.
//!
//! Entry points:
//! - [`Server`]: accept loop running one responder session per connection.
//! - [`run_client`]: one initiator session with measurement and reporting.

pub mod barrier;
pub mod client;
pub mod config;
pub mod cycles;
pub mod engine;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod report;
pub mod server;
pub mod session;
pub mod worker;

pub use client::{ClientRun, run_client};
pub use config::{BenchConfig, ConfigError, SessionConfig};
pub use engine::{BarrierEngine, OsSpawner, WorkerSpawner};
pub use error::{BenchError, ErrorCategory, Result};
pub use server::Server;
pub use session::SessionOutcome;
