// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Session error taxonomy.
//!
//! Every failure that can end a session is a [`BenchError`]. Consumers inspect
//! [`BenchError::category`] to decide how to report it and
//! [`BenchError::code`] to derive a process exit status. Teardown failures are
//! never represented here: they are logged where they happen and dropped.

use std::fmt;

use dynamo_mmap_transport::{ChannelError, TransportError};

use crate::config::ConfigError;

/// Coarse classification of a [`BenchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Domain, endpoint, region or mapping failures.
    TransportSetup,
    /// Short reads, resets, unexpected messages on the control channel.
    ControlChannel,
    /// Worker creation failures and interruptions.
    ThreadManagement,
    /// Invalid configuration or negotiated parameters.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::TransportSetup => write!(f, "TransportSetup"),
            ErrorCategory::ControlChannel => write!(f, "ControlChannel"),
            ErrorCategory::ThreadManagement => write!(f, "ThreadManagement"),
            ErrorCategory::Configuration => write!(f, "Configuration"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("{op} failed: {source}")]
    Control {
        op: &'static str,
        #[source]
        source: ChannelError,
    },

    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker thread {index} was interrupted")]
    Interrupted { index: usize },

    #[error("invalid session parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BenchError {
    pub fn transport(op: &'static str, source: TransportError) -> Self {
        // Address exchange failures are control-channel failures in disguise.
        match source {
            TransportError::Channel(source) => BenchError::Control { op, source },
            source => BenchError::Transport { op, source },
        }
    }

    pub fn control(op: &'static str, source: ChannelError) -> Self {
        BenchError::Control { op, source }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BenchError::Transport { .. } => ErrorCategory::TransportSetup,
            BenchError::Control { .. } => ErrorCategory::ControlChannel,
            BenchError::Spawn { .. } | BenchError::Interrupted { .. } => {
                ErrorCategory::ThreadManagement
            }
            BenchError::InvalidParameters(_) | BenchError::Config(_) => {
                ErrorCategory::Configuration
            }
        }
    }

    /// Negative errno-style status for this error.
    pub fn code(&self) -> i32 {
        let errno = match self {
            BenchError::Transport { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            BenchError::Control { source, .. } => match source {
                ChannelError::Timeout => libc::ETIMEDOUT,
                ChannelError::Closed => libc::ECONNRESET,
                ChannelError::LengthMismatch { .. } | ChannelError::TooLarge(_) => libc::EPROTO,
                other => other.raw_os_error().unwrap_or(libc::EIO),
            },
            BenchError::Spawn { source, .. } => source.raw_os_error().unwrap_or(libc::EAGAIN),
            BenchError::Interrupted { .. } => libc::EINTR,
            BenchError::InvalidParameters(_) | BenchError::Config(_) => libc::EINVAL,
        };
        -errno
    }

    /// Name of the operation that failed, for diagnostics.
    pub fn operation(&self) -> &'static str {
        match self {
            BenchError::Transport { op, .. } | BenchError::Control { op, .. } => op,
            BenchError::Spawn { .. } => "thread spawn",
            BenchError::Interrupted { .. } => "thread join",
            BenchError::InvalidParameters(_) => "parameter validation",
            BenchError::Config(_) => "configuration",
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_errors_inside_transport_are_control_errors() {
        let err = BenchError::transport(
            "address exchange",
            TransportError::Channel(ChannelError::Timeout),
        );
        assert_eq!(err.category(), ErrorCategory::ControlChannel);
        assert_eq!(err.code(), -libc::ETIMEDOUT);
        assert_eq!(err.operation(), "address exchange");
    }

    #[test]
    fn test_codes() {
        assert_eq!(BenchError::Interrupted { index: 3 }.code(), -libc::EINTR);
        assert_eq!(
            BenchError::control("recv credential", ChannelError::Closed).code(),
            -libc::ECONNRESET
        );
        assert_eq!(
            BenchError::transport("commit", TransportError::Injected("commit")).code(),
            -libc::EIO
        );
        assert_eq!(
            BenchError::InvalidParameters("overflow".into()).category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_spawn_error_display() {
        let err = BenchError::Spawn {
            index: 2,
            source: std::io::Error::from_raw_os_error(libc::EAGAIN),
        };
        assert_eq!(err.category(), ErrorCategory::ThreadManagement);
        assert_eq!(err.code(), -libc::EAGAIN);
        assert!(err.to_string().starts_with("failed to spawn worker thread 2"));
    }
}
