// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport collaborators for the mmap benchmark.
//!
//! The benchmark core never touches a fabric or a socket directly. It drives
//! the [`Transport`] trait to build a domain and endpoint, register a local
//! region for the peer, map the peer's region, and keep caches coherent, and
//! it talks to the peer through a [`ControlChannel`] carrying length-prefixed
//! blobs.
//!
//! Two transports are provided:
//! - [`shm::ShmTransport`]: POSIX shared memory, both peers on one host (Unix only).
//! - `testing::HeapTransport`: in-process heap regions with fault injection
//!   (feature `testing`).
//!
//! # Lifecycle
//!
//! ```text
//! setup_domain ─► setup_endpoint ─► exchange_addresses ─┬─► register_region ─► commit   (responder)
//!                                                       └─► map ─► commit ─► unmap     (initiator)
//! ```
//!
//! Domains, endpoints and registered regions are released by dropping them.
//! Mappings are released with [`Transport::unmap`] so callers can observe and
//! log the failure.

mod cache;
mod error;
pub mod socket;

#[cfg(unix)]
pub mod shm;

#[cfg(feature = "testing")]
pub mod testing;

use std::time::Duration;

pub use cache::commit_descriptor;
pub use error::TransportError;
pub use socket::{ChannelError, ControlChannel, connect_sock};

/// Cache line size assumed by the commit implementations.
pub const CACHE_LINE_SIZE: usize = 64;

/// A contiguous range of process-visible memory.
pub trait MemoryDescriptor {
    /// Base virtual address of the range.
    fn addr(&self) -> usize;

    /// Size of the range in bytes.
    fn size(&self) -> usize;

    fn as_ptr(&self) -> *const u8 {
        self.addr() as *const u8
    }
}

/// A local region registered with the transport and exposed to the peer.
pub trait LocalRegion: MemoryDescriptor + Send {
    /// Opaque key the peer needs to map this region.
    fn key(&self) -> u64;

    /// Mutable view of the whole region.
    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Cache maintenance requested by [`Transport::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitFlags {
    /// Write dirty lines back to memory.
    pub write_back: bool,
    /// Drop the lines from the cache so the next read goes to memory.
    pub invalidate: bool,
    /// Perform the operation even when the transport believes it is unnecessary.
    pub force: bool,
}

impl CommitFlags {
    /// Write back and invalidate unconditionally. Used after zeroing a freshly
    /// registered region.
    pub const FLUSH_ALL: CommitFlags = CommitFlags {
        write_back: true,
        invalidate: true,
        force: true,
    };

    /// Write back and invalidate, letting the transport skip redundant work.
    pub const INVALIDATE: CommitFlags = CommitFlags {
        write_back: true,
        invalidate: true,
        force: false,
    };
}

/// Access rights requested for a remote mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    ReadOnly,
    ReadWrite,
}

/// Opaque addressing information received from the peer during
/// [`Transport::exchange_addresses`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress(Vec<u8>);

impl PeerAddress {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Remote memory transport used by both session roles.
///
/// Implementations must be shareable across worker threads: `commit` is
/// called concurrently on disjoint slices of one mapping.
pub trait Transport: Send + Sync {
    type Domain: Send;
    type Endpoint: Send;
    type Region: LocalRegion;
    type Mapping: MemoryDescriptor + Send + Sync;

    /// Open the fabric domain.
    fn setup_domain(&self) -> Result<Self::Domain, TransportError>;

    /// Create the endpoint used for every subsequent memory operation.
    fn setup_endpoint(&self, domain: &Self::Domain) -> Result<Self::Endpoint, TransportError>;

    /// Swap endpoint addresses with the peer over the control channel.
    ///
    /// This is the only control-channel exchange that is bounded by `timeout`.
    fn exchange_addresses(
        &self,
        endpoint: &Self::Endpoint,
        channel: &ControlChannel,
        timeout: Duration,
    ) -> Result<PeerAddress, TransportError>;

    /// Allocate and register `len` bytes that the peer may map.
    fn register_region(
        &self,
        endpoint: &Self::Endpoint,
        len: usize,
    ) -> Result<Self::Region, TransportError>;

    /// Cache maintenance over `[offset, offset + len)` of `target`.
    fn commit(
        &self,
        target: &dyn MemoryDescriptor,
        offset: usize,
        len: usize,
        flags: CommitFlags,
    ) -> Result<(), TransportError>;

    /// Map `len` bytes of the peer region identified by `remote_key`.
    fn map(
        &self,
        endpoint: &Self::Endpoint,
        peer: &PeerAddress,
        remote_key: u64,
        len: usize,
        access: MapAccess,
    ) -> Result<Self::Mapping, TransportError>;

    /// Release a mapping created by [`Transport::map`].
    fn unmap(&self, mapping: Self::Mapping) -> Result<(), TransportError>;
}

/// Largest peer address accepted by the built-in transports.
pub const MAX_PEER_ADDRESS_LEN: usize = 256;

/// Address exchange shared by the built-in transports: send ours first, then
/// read the peer's, with `timeout` applied to the read.
pub(crate) fn swap_addresses(
    channel: &ControlChannel,
    local: &[u8],
    timeout: Duration,
) -> Result<PeerAddress, TransportError> {
    channel.send_blob(local)?;
    channel.set_read_timeout(Some(timeout))?;
    let received = channel.recv_var_blob(MAX_PEER_ADDRESS_LEN);
    let cleared = channel.set_read_timeout(None);
    let peer = received?;
    cleared?;
    if peer.is_empty() {
        return Err(TransportError::InvalidPeerAddress(
            "peer sent an empty address".to_string(),
        ));
    }
    Ok(PeerAddress::new(peer))
}
