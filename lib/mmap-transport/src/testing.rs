// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process heap transport for tests.
//!
//! Regions are heap allocations published in a registry shared by every
//! [`HeapTransport`] created through [`HeapTransport::peer`], so an initiator
//! and a responder running in one process can map each other's memory. Each
//! instance carries its own [`Faults`] so one side can be made to fail.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
    CACHE_LINE_SIZE, CommitFlags, ControlChannel, LocalRegion, MapAccess, MemoryDescriptor,
    PeerAddress, Transport, TransportError, commit_descriptor, swap_addresses,
};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub setup_domain: bool,
    pub register_region: bool,
    pub commit: bool,
    pub map: bool,
    pub unmap: bool,
}

struct HeapBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// SAFETY: the buffer is plain memory; callers coordinate access.
unsafe impl Send for HeapBuffer {}
unsafe impl Sync for HeapBuffer {}

impl HeapBuffer {
    fn zeroed(len: usize) -> Result<Self, TransportError> {
        let layout = Layout::from_size_align(len.max(1), CACHE_LINE_SIZE).map_err(|_| {
            TransportError::Os {
                op: "alloc",
                source: std::io::Error::other("invalid layout"),
            }
        })?;
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(TransportError::Os {
            op: "alloc",
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })?;
        Ok(Self { ptr, layout, len })
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

type Registry = Arc<Mutex<HashMap<u64, Arc<HeapBuffer>>>>;

#[derive(Default)]
struct Shared {
    next_key: AtomicU64,
    next_endpoint: AtomicU64,
    live_mappings: Arc<AtomicUsize>,
}

/// Heap-backed [`Transport`] with fault injection.
#[derive(Clone)]
pub struct HeapTransport {
    shared: Arc<Shared>,
    registry: Registry,
    faults: Arc<Mutex<Faults>>,
    commits: Arc<AtomicUsize>,
}

impl Default for HeapTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                next_key: AtomicU64::new(0x1000),
                ..Default::default()
            }),
            registry: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Faults::default())),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Another instance over the same registry, with its own faults and counters.
    pub fn peer(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            faults: Arc::new(Mutex::new(Faults::default())),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        *self.faults.lock() = faults;
        self
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    /// Number of `commit` calls made through this instance.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Keys of the regions currently registered by any peer.
    pub fn registered_keys(&self) -> Vec<u64> {
        self.registry.lock().keys().copied().collect()
    }

    /// Mappings not yet released, across all peers.
    pub fn live_mappings(&self) -> usize {
        self.shared.live_mappings.load(Ordering::SeqCst)
    }

    /// Overwrite part of a registered region, as the owning peer would.
    pub fn write_region(&self, key: u64, offset: usize, bytes: &[u8]) -> Result<(), TransportError> {
        let buffer = self
            .registry
            .lock()
            .get(&key)
            .cloned()
            .ok_or(TransportError::UnknownKey(key))?;
        let end = offset.checked_add(bytes.len()).unwrap_or(usize::MAX);
        if end > buffer.len {
            return Err(TransportError::OutOfRange {
                offset,
                len: bytes.len(),
                size: buffer.len,
            });
        }
        // SAFETY: range checked above; the buffer is alive through the Arc.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                buffer.ptr.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    fn fault(&self, pick: impl Fn(&Faults) -> bool, op: &'static str) -> Result<(), TransportError> {
        let faults = *self.faults.lock();
        if pick(&faults) {
            tracing::debug!(op, "Injecting transport failure");
            return Err(TransportError::Injected(op));
        }
        Ok(())
    }
}

pub struct HeapDomain;

pub struct HeapEndpoint {
    id: u64,
}

pub struct HeapRegion {
    buffer: Arc<HeapBuffer>,
    key: u64,
    registry: Registry,
}

impl MemoryDescriptor for HeapRegion {
    fn addr(&self) -> usize {
        self.buffer.ptr.as_ptr() as usize
    }

    fn size(&self) -> usize {
        self.buffer.len
    }
}

impl LocalRegion for HeapRegion {
    fn key(&self) -> u64 {
        self.key
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the buffer holds `len` initialized bytes.
        unsafe { std::slice::from_raw_parts_mut(self.buffer.ptr.as_ptr(), self.buffer.len) }
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

pub struct HeapMapping {
    buffer: Arc<HeapBuffer>,
    len: usize,
    live: Arc<AtomicUsize>,
}

impl MemoryDescriptor for HeapMapping {
    fn addr(&self) -> usize {
        self.buffer.ptr.as_ptr() as usize
    }

    fn size(&self) -> usize {
        self.len
    }
}

impl Drop for HeapMapping {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for HeapTransport {
    type Domain = HeapDomain;
    type Endpoint = HeapEndpoint;
    type Region = HeapRegion;
    type Mapping = HeapMapping;

    fn setup_domain(&self) -> Result<HeapDomain, TransportError> {
        self.fault(|f| f.setup_domain, "setup_domain")?;
        Ok(HeapDomain)
    }

    fn setup_endpoint(&self, _domain: &HeapDomain) -> Result<HeapEndpoint, TransportError> {
        let id = self.shared.next_endpoint.fetch_add(1, Ordering::SeqCst);
        Ok(HeapEndpoint { id })
    }

    fn exchange_addresses(
        &self,
        endpoint: &HeapEndpoint,
        channel: &ControlChannel,
        timeout: Duration,
    ) -> Result<PeerAddress, TransportError> {
        swap_addresses(channel, format!("heap-{}", endpoint.id).as_bytes(), timeout)
    }

    fn register_region(
        &self,
        _endpoint: &HeapEndpoint,
        len: usize,
    ) -> Result<HeapRegion, TransportError> {
        self.fault(|f| f.register_region, "register_region")?;
        let buffer = Arc::new(HeapBuffer::zeroed(len)?);
        let key = self.shared.next_key.fetch_add(1, Ordering::SeqCst);
        self.registry.lock().insert(key, buffer.clone());
        Ok(HeapRegion {
            buffer,
            key,
            registry: self.registry.clone(),
        })
    }

    fn commit(
        &self,
        target: &dyn MemoryDescriptor,
        offset: usize,
        len: usize,
        flags: CommitFlags,
    ) -> Result<(), TransportError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.fault(|f| f.commit, "commit")?;
        commit_descriptor(target, offset, len, flags)
    }

    fn map(
        &self,
        _endpoint: &HeapEndpoint,
        _peer: &PeerAddress,
        remote_key: u64,
        len: usize,
        _access: MapAccess,
    ) -> Result<HeapMapping, TransportError> {
        self.fault(|f| f.map, "map")?;
        let buffer = self
            .registry
            .lock()
            .get(&remote_key)
            .cloned()
            .ok_or(TransportError::UnknownKey(remote_key))?;
        if buffer.len < len {
            return Err(TransportError::RegionTooSmall {
                requested: len,
                available: buffer.len,
            });
        }
        self.shared.live_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(HeapMapping {
            buffer,
            len,
            live: self.shared.live_mappings.clone(),
        })
    }

    fn unmap(&self, mapping: HeapMapping) -> Result<(), TransportError> {
        drop(mapping);
        self.fault(|f| f.unmap, "unmap")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_share_regions() {
        let responder = HeapTransport::new();
        let initiator = responder.peer();

        let endpoint = responder.setup_endpoint(&HeapDomain).unwrap();
        let mut region = responder.register_region(&endpoint, 64).unwrap();
        region.as_mut_slice()[0] = 9;

        let peer = PeerAddress::new(b"heap-0".to_vec());
        let mapping = initiator
            .map(&endpoint, &peer, region.key(), 64, MapAccess::ReadWrite)
            .unwrap();
        assert_eq!(initiator.live_mappings(), 1);
        // SAFETY: mapping holds 64 bytes.
        assert_eq!(unsafe { *mapping.as_ptr() }, 9);

        initiator.unmap(mapping).unwrap();
        assert_eq!(initiator.live_mappings(), 0);

        drop(region);
        assert!(responder.registered_keys().is_empty());
    }

    #[test]
    fn test_faults_are_per_instance() {
        let responder = HeapTransport::new().with_faults(Faults {
            commit: true,
            ..Default::default()
        });
        let initiator = responder.peer();

        let endpoint = responder.setup_endpoint(&HeapDomain).unwrap();
        let region = responder.register_region(&endpoint, 64).unwrap();

        assert!(matches!(
            responder.commit(&region, 0, 64, CommitFlags::FLUSH_ALL),
            Err(TransportError::Injected("commit"))
        ));
        initiator
            .commit(&region, 0, 64, CommitFlags::FLUSH_ALL)
            .unwrap();
        assert_eq!(responder.commit_count(), 1);
        assert_eq!(initiator.commit_count(), 1);
    }

    #[test]
    fn test_write_region_bounds() {
        let transport = HeapTransport::new();
        let endpoint = transport.setup_endpoint(&HeapDomain).unwrap();
        let region = transport.register_region(&endpoint, 16).unwrap();

        transport.write_region(region.key(), 8, &[1u8; 8]).unwrap();
        assert!(transport.write_region(region.key(), 9, &[1u8; 8]).is_err());
        assert!(matches!(
            transport.write_region(0xffff, 0, &[0]),
            Err(TransportError::UnknownKey(0xffff))
        ));
    }
}
