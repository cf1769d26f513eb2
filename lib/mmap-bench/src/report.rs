// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Result aggregation and per-thread throughput reports.

use std::fmt;

use crate::cycles::CycleClock;
use crate::engine::{EngineRun, ThreadSlot};
use crate::error::{BenchError, Result};

/// Keeps the first error it is given. Later errors and successes never
/// replace it.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    first: Option<BenchError>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, status: Result<()>) {
        if let Err(err) = status {
            self.record_error(err);
        }
    }

    pub fn record_error(&mut self, err: BenchError) {
        match &self.first {
            None => self.first = Some(err),
            Some(first) => {
                tracing::debug!(kept = %first, dropped = %err, "Discarding later error");
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    pub fn finish(self) -> Result<()> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Fold an engine run into one status: the setup error first, then the
/// slots in index order.
pub fn aggregate(run: EngineRun) -> Result<()> {
    let mut errors = ErrorAccumulator::new();
    if let Some(err) = run.setup_error {
        errors.record_error(err);
    }
    for slot in run.slots {
        errors.record(slot.status);
    }
    errors.finish()
}

/// Throughput of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadReport {
    pub app_name: String,
    pub index: usize,
    pub region_length: u64,
    pub elapsed_us: f64,
    /// Megabytes (10^6 bytes) per second; zero when no time elapsed.
    pub mb_per_sec: f64,
}

impl ThreadReport {
    pub fn new(app_name: &str, slot: &ThreadSlot, region_length: u64, clock: &CycleClock) -> Self {
        let elapsed_us = clock.cycles_to_usec(slot.elapsed_cycles);
        let mb_per_sec = if elapsed_us > 0.0 {
            region_length as f64 / elapsed_us
        } else {
            0.0
        };
        Self {
            app_name: app_name.to_string(),
            index: slot.index,
            region_length,
            elapsed_us,
            mb_per_sec,
        }
    }

    /// Print to stdout and emit the matching log event.
    pub fn emit(&self) {
        println!("{self}");
        tracing::info!(
            thread = self.index,
            len = self.region_length,
            elapsed_us = self.elapsed_us,
            mb_per_sec = self.mb_per_sec,
            "Thread report"
        );
    }
}

impl fmt::Display for ThreadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:thread {} len {} time, us {:.3}  MB/s {:.3}",
            self.app_name, self.index, self.region_length, self.elapsed_us, self.mb_per_sec
        )
    }
}

/// One report per slot, in slot order.
pub fn build_reports(
    app_name: &str,
    slots: &[ThreadSlot],
    region_length: u64,
    clock: &CycleClock,
) -> Vec<ThreadReport> {
    slots
        .iter()
        .map(|slot| ThreadReport::new(app_name, slot, region_length, clock))
        .collect()
}
