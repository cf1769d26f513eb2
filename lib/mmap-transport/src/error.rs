// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::socket::ChannelError;

/// Errors returned by [`Transport`](crate::Transport) implementations.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// An operating system call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The control channel failed during a transport sub-exchange.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The peer sent addressing information this transport cannot use.
    #[error("invalid peer address: {0}")]
    InvalidPeerAddress(String),

    /// No region is registered under the given key.
    #[error("unknown remote key {0:#018x}")]
    UnknownKey(u64),

    /// The peer region is smaller than the requested mapping.
    #[error("remote region holds {available} bytes, {requested} requested")]
    RegionTooSmall { requested: usize, available: usize },

    /// A commit range does not lie inside its descriptor.
    #[error("range {offset}+{len} outside descriptor of {size} bytes")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Fault injected by a test transport.
    #[error("injected failure in {0}")]
    Injected(&'static str),
}

impl TransportError {
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        TransportError::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Underlying OS error number, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransportError::Os { source, .. } => source.raw_os_error(),
            TransportError::Channel(err) => err.raw_os_error(),
            _ => None,
        }
    }
}
