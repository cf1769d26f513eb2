// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control-channel sessions.
//!
//! Message order on the control channel:
//! ```text
//! initiator                              responder
//!     │ ── Parameters (17 B) ──────────────► │
//!     │ ◄──────── endpoint address swap ───► │   bounded by the exchange timeout
//!     │ ◄────────────── AccessCredential ─── │   after register + zero + commit
//!     │    map, workers scan                 │
//!     │ ── Completion (0 B) ───────────────► │
//! ```
//!
//! Both roles keep what they acquire in a [`SessionContext`], which releases it
//! on every exit path.

mod context;
mod initiator;
mod responder;

pub use context::SessionContext;
pub use initiator::Initiator;
pub use responder::run_responder;

/// What the accept loop should do after a responder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Keep accepting connections.
    Continue,
    /// The session asked for once mode; stop accepting.
    Stop,
}
