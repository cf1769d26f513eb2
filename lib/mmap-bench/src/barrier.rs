// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Two-phase barrier with a leader hand-off.
//!
//! `thread_count` workers pass through two rendezvous points around their
//! scan. After the second one the leader (index 0) performs the network step
//! while everyone else waits for it to publish `Done`.
//!
//! ```text
//!                   last arrival                 leader released
//! AwaitingArrival ───────────────► Running ─────────────────────► Done
//!
//! arrive()          +1 arrived; last one flips to Running and wakes cv_main;
//!                   wait on cv_main while AwaitingArrival; -1 arrived
//! finish_follower() +1 finished; last one wakes cv_leader_ready;
//!                   wait on cv_main until Done; -1 finished
//! finish_leader()   +1 finished; wait on cv_leader_ready until all finished;
//!                   -1 finished
//! release()         Done; wake cv_main
//! ```
//!
//! The leader waits on its own condition variable so a wake meant for the
//! followers can never be consumed by it, and vice versa. The second phase
//! counts into `finished_count` rather than re-using `arrived_count`, so a
//! fast worker finishing its scan is never mistaken for a slow worker still
//! leaving the first rendezvous.
//!
//! [`PhaseBarrier::cancel`] wakes every waiter with [`Cancelled`]. Workers
//! only observe it at a wait; a scan in progress runs to completion.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    AwaitingArrival,
    Running,
    Done,
}

/// Returned by a wait that was woken by [`PhaseBarrier::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("barrier cancelled")]
pub struct Cancelled;

/// Point-in-time view of the barrier bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSnapshot {
    pub state: BarrierState,
    pub arrived_count: usize,
    pub finished_count: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
struct BarrierInner {
    arrived_count: usize,
    finished_count: usize,
    state: BarrierState,
    cancelled: bool,
}

#[derive(Debug)]
pub struct PhaseBarrier {
    thread_count: usize,
    inner: Mutex<BarrierInner>,
    cv_main: Condvar,
    cv_leader_ready: Condvar,
}

impl PhaseBarrier {
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count,
            inner: Mutex::new(BarrierInner {
                arrived_count: 0,
                finished_count: 0,
                state: BarrierState::AwaitingArrival,
                cancelled: false,
            }),
            cv_main: Condvar::new(),
            cv_leader_ready: Condvar::new(),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// First rendezvous. Returns once every worker has arrived.
    pub fn arrive(&self) -> Result<(), Cancelled> {
        let mut inner = self.inner.lock();
        inner.arrived_count += 1;
        debug_assert!(inner.arrived_count <= self.thread_count);

        if inner.arrived_count == self.thread_count {
            inner.state = BarrierState::Running;
            self.cv_main.notify_all();
        }
        while inner.state == BarrierState::AwaitingArrival && !inner.cancelled {
            self.cv_main.wait(&mut inner);
        }
        inner.arrived_count -= 1;

        if inner.state == BarrierState::AwaitingArrival {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Second rendezvous for every worker but the leader. Returns once the
    /// leader has called [`PhaseBarrier::release`].
    pub fn finish_follower(&self) -> Result<(), Cancelled> {
        let mut inner = self.inner.lock();
        inner.finished_count += 1;
        debug_assert!(inner.finished_count <= self.thread_count);

        if inner.finished_count == self.thread_count {
            self.cv_leader_ready.notify_one();
        }
        while inner.state != BarrierState::Done && !inner.cancelled {
            self.cv_main.wait(&mut inner);
        }
        inner.finished_count -= 1;

        if inner.state != BarrierState::Done {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Second rendezvous for the leader. Returns once every worker has
    /// finished its scan; the caller must then call [`PhaseBarrier::release`].
    pub fn finish_leader(&self) -> Result<(), Cancelled> {
        let mut inner = self.inner.lock();
        inner.finished_count += 1;
        debug_assert!(inner.finished_count <= self.thread_count);

        while inner.finished_count != self.thread_count && !inner.cancelled {
            self.cv_leader_ready.wait(&mut inner);
        }
        let all_finished = inner.finished_count == self.thread_count;
        inner.finished_count -= 1;

        if !all_finished {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Publish `Done` and let the followers return.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.state = BarrierState::Done;
        drop(inner);
        self.cv_main.notify_all();
    }

    /// Wake every waiter with [`Cancelled`].
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        drop(inner);
        self.cv_main.notify_all();
        self.cv_leader_ready.notify_all();
    }

    pub fn snapshot(&self) -> BarrierSnapshot {
        let inner = self.inner.lock();
        BarrierSnapshot {
            state: inner.state,
            arrived_count: inner.arrived_count,
            finished_count: inner.finished_count,
            cancelled: inner.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_thread_passes_through() {
        let barrier = PhaseBarrier::new(1);
        barrier.arrive().unwrap();
        assert_eq!(barrier.snapshot().state, BarrierState::Running);
        barrier.finish_leader().unwrap();
        barrier.release();

        let snap = barrier.snapshot();
        assert_eq!(snap.state, BarrierState::Done);
        assert_eq!(snap.arrived_count, 0);
        assert_eq!(snap.finished_count, 0);
    }

    #[test]
    fn test_nobody_passes_before_last_arrival() {
        let barrier = Arc::new(PhaseBarrier::new(3));
        let passed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                let passed = passed.clone();
                thread::spawn(move || {
                    barrier.arrive().unwrap();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(passed.load(Ordering::SeqCst), 0);
        assert_eq!(barrier.snapshot().state, BarrierState::AwaitingArrival);

        barrier.arrive().unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 2);
        assert_eq!(barrier.snapshot().arrived_count, 0);
    }

    #[test]
    fn test_leader_waits_for_followers() {
        let barrier = Arc::new(PhaseBarrier::new(2));

        let follower = {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.arrive().unwrap();
                thread::sleep(Duration::from_millis(50));
                barrier.finish_follower()
            })
        };

        barrier.arrive().unwrap();
        barrier.finish_leader().unwrap();
        // The follower counted itself in before the leader could proceed.
        assert_eq!(barrier.snapshot().finished_count, 1);
        assert_ne!(barrier.snapshot().state, BarrierState::Done);

        barrier.release();
        follower.join().unwrap().unwrap();
        assert_eq!(barrier.snapshot().finished_count, 0);
    }

    #[test]
    fn test_cancel_wakes_arrival_waiters() {
        let barrier = Arc::new(PhaseBarrier::new(4));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = barrier.clone();
                thread::spawn(move || barrier.arrive())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        barrier.cancel();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Err(Cancelled));
        }
        let snap = barrier.snapshot();
        assert!(snap.cancelled);
        assert_eq!(snap.arrived_count, 0);
        assert_eq!(snap.state, BarrierState::AwaitingArrival);
    }

    #[test]
    fn test_cancel_wakes_leader_and_followers() {
        let barrier = Arc::new(PhaseBarrier::new(3));
        let workers: Vec<_> = (0..3)
            .map(|index| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.arrive().unwrap();
                    match index {
                        0 => barrier.finish_leader(),
                        1 => barrier.finish_follower(),
                        // Never reaches the second rendezvous.
                        _ => Ok(()),
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        barrier.cancel();

        let results: Vec<_> = workers.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![Err(Cancelled), Err(Cancelled), Ok(())]);
        assert_eq!(barrier.snapshot().finished_count, 0);
    }
}
