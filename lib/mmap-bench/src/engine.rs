// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker thread orchestration.
//!
//! [`BarrierEngine::run`] starts one scoped thread per worker, lines them up
//! on a [`PhaseBarrier`], lets each scan its slice, and has the leader run the
//! finalization step (the completion signal) once everyone has finished.
//! Every thread is joined before `run` returns, whatever happened.

use std::io;
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::barrier::PhaseBarrier;
use crate::error::{BenchError, Result};
use crate::worker::ScanSample;

/// Worker that performs the finalization step.
pub const LEADER: usize = 0;

/// What a worker thread hands back when joined.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub sample: ScanSample,
    pub status: Result<()>,
}

impl WorkerOutcome {
    fn interrupted(index: usize) -> Self {
        Self {
            sample: ScanSample::default(),
            status: Err(BenchError::Interrupted { index }),
        }
    }
}

/// Per-thread record, filled exactly once when the thread is joined.
#[derive(Debug)]
pub struct ThreadSlot {
    pub index: usize,
    pub accumulated_value: u64,
    pub elapsed_cycles: u64,
    pub status: Result<()>,
}

/// Result of [`BarrierEngine::run`].
#[derive(Debug)]
pub struct EngineRun {
    /// Failure observed before any worker could report: a spawn failure, or
    /// the finalization error when there were no workers.
    pub setup_error: Option<BenchError>,
    /// One slot per started worker, in index order.
    pub slots: Vec<ThreadSlot>,
}

/// Starts worker threads inside a scope.
pub trait WorkerSpawner: Sync {
    fn spawn<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, WorkerOutcome>>
    where
        F: FnOnce() -> WorkerOutcome + Send + 'scope;
}

/// Named OS threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl WorkerSpawner for OsSpawner {
    fn spawn<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, WorkerOutcome>>
    where
        F: FnOnce() -> WorkerOutcome + Send + 'scope,
    {
        thread::Builder::new()
            .name(format!("mmap-worker-{index}"))
            .spawn_scoped(scope, f)
    }
}

pub struct BarrierEngine {
    barrier: PhaseBarrier,
}

impl BarrierEngine {
    pub fn new(thread_count: usize) -> Self {
        Self {
            barrier: PhaseBarrier::new(thread_count),
        }
    }

    pub fn barrier(&self) -> &PhaseBarrier {
        &self.barrier
    }

    /// Run `scan` on every worker, then `finalize` on the leader.
    ///
    /// A spawn failure cancels the barrier so the workers already started
    /// return `Interrupted` instead of waiting for peers that will never come.
    /// With zero workers `finalize` runs inline.
    pub fn run<S, W, F>(&self, spawner: &S, scan: W, finalize: F) -> EngineRun
    where
        S: WorkerSpawner,
        W: Fn(usize) -> Result<ScanSample> + Sync,
        F: Fn() -> Result<()> + Sync,
    {
        let thread_count = self.barrier.thread_count();
        if thread_count == 0 {
            let status = finalize();
            self.barrier.release();
            return EngineRun {
                setup_error: status.err(),
                slots: Vec::new(),
            };
        }

        thread::scope(|scope| {
            let barrier = &self.barrier;
            let scan = &scan;
            let finalize = &finalize;

            // Sized by started threads, not by `thread_count`.
            let mut handles = Vec::new();
            let mut setup_error = None;
            for index in 0..thread_count {
                let spawned = spawner.spawn(scope, index, move || {
                    run_worker(index, barrier, scan, finalize)
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        tracing::error!(thread = index, error = %source, "Failed to spawn worker thread");
                        setup_error = Some(BenchError::Spawn { index, source });
                        barrier.cancel();
                        break;
                    }
                }
            }

            let slots = handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        tracing::error!(thread = index, "Worker thread panicked");
                        WorkerOutcome::interrupted(index)
                    });
                    ThreadSlot {
                        index,
                        accumulated_value: outcome.sample.accumulated,
                        elapsed_cycles: outcome.sample.elapsed_cycles,
                        status: outcome.status,
                    }
                })
                .collect();

            EngineRun { setup_error, slots }
        })
    }
}

/// Cancels the barrier if the worker unwinds, so its peers are not left
/// waiting on it.
struct CancelOnUnwind<'a>(&'a PhaseBarrier);

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

fn run_worker<W, F>(index: usize, barrier: &PhaseBarrier, scan: &W, finalize: &F) -> WorkerOutcome
where
    W: Fn(usize) -> Result<ScanSample>,
    F: Fn() -> Result<()>,
{
    let _guard = CancelOnUnwind(barrier);

    if barrier.arrive().is_err() {
        tracing::debug!(thread = index, "Worker cancelled before start");
        return WorkerOutcome::interrupted(index);
    }

    // A failed scan still goes through the second rendezvous: the others
    // cannot finish without it.
    let (sample, scanned) = match scan(index) {
        Ok(sample) => (sample, Ok(())),
        Err(err) => {
            tracing::error!(
                thread = index,
                operation = err.operation(),
                code = err.code(),
                "Scan failed: {err}"
            );
            (ScanSample::default(), Err(err))
        }
    };

    let finished = if index == LEADER {
        match barrier.finish_leader() {
            Ok(()) => {
                let sent = finalize();
                barrier.release();
                if let Err(err) = &sent {
                    tracing::error!(
                        operation = err.operation(),
                        code = err.code(),
                        "Finalization failed: {err}"
                    );
                }
                sent
            }
            Err(_) => Err(BenchError::Interrupted { index }),
        }
    } else {
        barrier
            .finish_follower()
            .map_err(|_| BenchError::Interrupted { index })
    };

    WorkerOutcome {
        sample,
        status: scanned.and(finished),
    }
}
