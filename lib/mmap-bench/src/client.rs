// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One client invocation: handshake, measurement, report, teardown.

use dynamo_mmap_transport::Transport;

use crate::config::{BenchConfig, SessionConfig};
use crate::cycles::global_clock;
use crate::engine::WorkerSpawner;
use crate::error::Result;
use crate::report::{ThreadReport, aggregate, build_reports};
use crate::session::Initiator;

/// Outcome of [`run_client`].
#[derive(Debug)]
pub struct ClientRun {
    /// One report per started worker, in index order. Empty when the
    /// handshake failed.
    pub reports: Vec<ThreadReport>,
    /// First error of the invocation, if any.
    pub result: Result<()>,
}

/// Run one benchmark against `config.remote_node`, printing a report line per
/// worker.
pub fn run_client<T: Transport, S: WorkerSpawner>(
    transport: &T,
    config: SessionConfig,
    bench: &BenchConfig,
    spawner: &S,
) -> ClientRun {
    // Calibrate before connecting so the responder is not kept waiting.
    let clock = global_clock(bench.calibration_window());
    let region_length = config.region_length;

    let initiator = match Initiator::start(transport, config, bench) {
        Ok(initiator) => initiator,
        Err(err) => {
            return ClientRun {
                reports: Vec::new(),
                result: Err(err),
            };
        }
    };

    let (reports, result) = match initiator.run_workers(spawner) {
        Ok(run) => {
            let reports = build_reports(&bench.app_name, &run.slots, region_length, &clock);
            (reports, aggregate(run))
        }
        Err(err) => (Vec::new(), Err(err)),
    };
    initiator.stop();

    for report in &reports {
        report.emit();
    }
    if let Err(err) = &result {
        tracing::error!(
            operation = err.operation(),
            code = err.code(),
            category = %err.category(),
            "Benchmark failed: {err}"
        );
    }

    ClientRun { reports, result }
}
