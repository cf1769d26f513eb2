// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cycle counter and its calibration against the monotonic clock.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Returns the current cycle count.
///
/// `rdtscp` on x86_64; nanoseconds since first use elsewhere.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let mut aux = 0u32;
    // SAFETY: rdtscp is available on every x86_64 CPU this runs on and only
    // writes `aux`.
    unsafe { std::arch::x86_64::__rdtscp(&mut aux) }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    monotonic_ns()
}

#[cfg(not(target_arch = "x86_64"))]
fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Calibrated conversion from cycles to wall time.
#[derive(Debug, Clone, Copy)]
pub struct CycleClock {
    cycles_per_sec: f64,
}

impl CycleClock {
    /// Measure the cycle rate over `window` of wall time.
    pub fn calibrate(window: Duration) -> Self {
        let wall_start = Instant::now();
        let cycles_start = read_cycles();
        std::thread::sleep(window);
        let cycles = read_cycles().wrapping_sub(cycles_start);
        let elapsed = wall_start.elapsed().as_secs_f64();

        let cycles_per_sec = if elapsed > 0.0 && cycles > 0 {
            cycles as f64 / elapsed
        } else {
            1e9
        };
        tracing::debug!(cycles_per_sec, "Calibrated cycle counter");
        Self { cycles_per_sec }
    }

    /// A clock with a known rate.
    pub fn with_rate(cycles_per_sec: f64) -> Self {
        Self { cycles_per_sec }
    }

    pub fn cycles_per_sec(&self) -> f64 {
        self.cycles_per_sec
    }

    pub fn cycles_to_usec(&self, cycles: u64) -> f64 {
        cycles as f64 * 1e6 / self.cycles_per_sec
    }
}

/// Process-wide clock, calibrated once on first use.
pub fn global_clock(window: Duration) -> CycleClock {
    static CLOCK: OnceLock<CycleClock> = OnceLock::new();
    *CLOCK.get_or_init(|| CycleClock::calibrate(window))
}
