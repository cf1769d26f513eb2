// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control-channel messages.
//!
//! Wire format (big-endian, fixed size, no version field):
//! ```text
//! Parameters        [u64: region_length][u64: thread_count][u8: once_mode]   17 bytes
//! AccessCredential  [u64: remote_key]                                          8 bytes
//! Completion        (empty)                                                    0 bytes
//! ```
//!
//! Message order is the protocol version. Size mismatches are detected by the
//! blob receive primitive, so decoding a correctly sized buffer cannot fail.

use bytes::{Buf, BufMut};

use crate::config::SessionConfig;

/// Initiator → responder benchmark parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub region_length: u64,
    pub thread_count: u64,
    pub once_mode: bool,
}

impl Parameters {
    pub const WIRE_SIZE: usize = 8 + 8 + 1;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        let mut out = &mut buf[..];
        out.put_u64(self.region_length);
        out.put_u64(self.thread_count);
        out.put_u8(u8::from(self.once_mode));
        buf
    }

    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        let mut src = &buf[..];
        Self {
            region_length: src.get_u64(),
            thread_count: src.get_u64(),
            once_mode: src.get_u8() != 0,
        }
    }
}

impl From<&SessionConfig> for Parameters {
    fn from(config: &SessionConfig) -> Self {
        Self {
            region_length: config.region_length,
            thread_count: config.thread_count,
            once_mode: config.once_mode,
        }
    }
}

/// Responder → initiator capability for mapping the responder's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCredential {
    pub remote_key: u64,
}

impl AccessCredential {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        self.remote_key.to_be_bytes()
    }

    pub fn decode(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            remote_key: u64::from_be_bytes(*buf),
        }
    }
}

/// Payload of the completion signal.
pub const COMPLETION: [u8; 0] = [];
