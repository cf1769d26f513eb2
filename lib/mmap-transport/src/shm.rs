// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! POSIX shared-memory transport.
//!
//! Both peers must run on the same host. A registered region is a shared
//! memory object named after the responder's endpoint and the region key:
//!
//! ```text
//! /{prefix}-{pid}-{nonce}-{key:016x}
//! ```
//!
//! The initiator learns `{prefix}-{pid}-{nonce}` during address exchange and
//! the key from the access credential, and maps the object read/write shared.
//! The object is unlinked when the responder drops its region, so a stale key
//! cannot be mapped after the session ends.

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::Duration;

use crate::{
    CommitFlags, ControlChannel, LocalRegion, MapAccess, MemoryDescriptor, PeerAddress, Transport,
    TransportError, commit_descriptor, swap_addresses,
};

/// Shared-memory transport. `prefix` namespaces the endpoint names.
#[derive(Debug, Clone)]
pub struct ShmTransport {
    prefix: String,
}

impl ShmTransport {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[derive(Debug)]
pub struct ShmDomain {
    prefix: String,
}

#[derive(Debug)]
pub struct ShmEndpoint {
    name: String,
}

impl ShmEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Locally registered shared-memory object.
pub struct ShmRegion {
    ptr: NonNull<u8>,
    len: usize,
    mapped_len: usize,
    key: u64,
    name: CString,
}

// SAFETY: the region owns its mapping; access is coordinated by the caller.
unsafe impl Send for ShmRegion {}

impl MemoryDescriptor for ShmRegion {
    fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    fn size(&self) -> usize {
        self.len
    }
}

impl LocalRegion for ShmRegion {
    fn key(&self) -> u64 {
        self.key
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is at least `len` bytes and lives as long as self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/mapped_len come from a successful mmap in register_region.
        if let Err(e) = unsafe { unmap_raw(self.ptr, self.mapped_len) } {
            tracing::warn!(key = self.key, "Failed to unmap registered region: {}", e);
        }
        // SAFETY: name is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(self.name.as_ptr()) } == -1 {
            tracing::warn!(
                key = self.key,
                "Failed to unlink shared memory object: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Peer region mapped into this process.
pub struct ShmMapping {
    ptr: Option<NonNull<u8>>,
    len: usize,
    mapped_len: usize,
}

// SAFETY: workers read disjoint slices; the mapping itself is immutable.
unsafe impl Send for ShmMapping {}
unsafe impl Sync for ShmMapping {}

impl MemoryDescriptor for ShmMapping {
    fn addr(&self) -> usize {
        self.ptr.map(|p| p.as_ptr() as usize).unwrap_or(0)
    }

    fn size(&self) -> usize {
        self.len
    }
}

impl ShmMapping {
    fn release(&mut self) -> Result<(), TransportError> {
        match self.ptr.take() {
            // SAFETY: ptr/mapped_len come from a successful mmap in map().
            Some(ptr) => unsafe { unmap_raw(ptr, self.mapped_len) },
            None => Ok(()),
        }
    }
}

impl Drop for ShmMapping {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to unmap peer region: {}", e);
        }
    }
}

impl Transport for ShmTransport {
    type Domain = ShmDomain;
    type Endpoint = ShmEndpoint;
    type Region = ShmRegion;
    type Mapping = ShmMapping;

    fn setup_domain(&self) -> Result<ShmDomain, TransportError> {
        if self.prefix.is_empty() || self.prefix.contains('/') {
            return Err(TransportError::InvalidPeerAddress(format!(
                "invalid shared memory prefix '{}'",
                self.prefix
            )));
        }
        Ok(ShmDomain {
            prefix: self.prefix.clone(),
        })
    }

    fn setup_endpoint(&self, domain: &ShmDomain) -> Result<ShmEndpoint, TransportError> {
        let name = format!(
            "{}-{}-{:08x}",
            domain.prefix,
            std::process::id(),
            rand::random::<u32>()
        );
        tracing::debug!(endpoint = %name, "Shared memory endpoint ready");
        Ok(ShmEndpoint { name })
    }

    fn exchange_addresses(
        &self,
        endpoint: &ShmEndpoint,
        channel: &ControlChannel,
        timeout: Duration,
    ) -> Result<PeerAddress, TransportError> {
        let peer = swap_addresses(channel, endpoint.name.as_bytes(), timeout)?;
        peer_name(&peer)?;
        Ok(peer)
    }

    fn register_region(
        &self,
        endpoint: &ShmEndpoint,
        len: usize,
    ) -> Result<ShmRegion, TransportError> {
        let key = rand::random::<u64>();
        let name = object_name(&endpoint.name, key)?;
        let mapped_len = round_to_page(len);

        // SAFETY: name is a valid C string; the fd is closed on every path.
        unsafe {
            let fd = libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd == -1 {
                return Err(TransportError::last_os_error("shm_open"));
            }

            if libc::ftruncate(fd, mapped_len as libc::off_t) == -1 {
                let err = TransportError::last_os_error("ftruncate");
                libc::close(fd);
                libc::shm_unlink(name.as_ptr());
                return Err(err);
            }

            let addr = libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);

            if addr == libc::MAP_FAILED {
                let err = TransportError::last_os_error("mmap");
                libc::shm_unlink(name.as_ptr());
                return Err(err);
            }

            let Some(ptr) = NonNull::new(addr as *mut u8) else {
                libc::shm_unlink(name.as_ptr());
                return Err(TransportError::Os {
                    op: "mmap",
                    source: std::io::Error::other("mmap returned null"),
                });
            };

            tracing::debug!(key, len, "Registered shared memory region");
            Ok(ShmRegion {
                ptr,
                len,
                mapped_len,
                key,
                name,
            })
        }
    }

    fn commit(
        &self,
        target: &dyn MemoryDescriptor,
        offset: usize,
        len: usize,
        flags: CommitFlags,
    ) -> Result<(), TransportError> {
        commit_descriptor(target, offset, len, flags)
    }

    fn map(
        &self,
        _endpoint: &ShmEndpoint,
        peer: &PeerAddress,
        remote_key: u64,
        len: usize,
        access: MapAccess,
    ) -> Result<ShmMapping, TransportError> {
        let name = object_name(peer_name(peer)?, remote_key)?;
        let mapped_len = round_to_page(len);
        let (oflag, prot) = match access {
            MapAccess::ReadOnly => (libc::O_RDONLY, libc::PROT_READ),
            MapAccess::ReadWrite => (libc::O_RDWR, libc::PROT_READ | libc::PROT_WRITE),
        };

        // SAFETY: name is a valid C string; the fd is closed on every path.
        unsafe {
            let fd = libc::shm_open(name.as_ptr(), oflag, 0);
            if fd == -1 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ENOENT) {
                    return Err(TransportError::UnknownKey(remote_key));
                }
                return Err(TransportError::Os {
                    op: "shm_open",
                    source: err,
                });
            }

            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) == -1 {
                let err = TransportError::last_os_error("fstat");
                libc::close(fd);
                return Err(err);
            }
            let available = stat.st_size as usize;
            if available < len {
                libc::close(fd);
                return Err(TransportError::RegionTooSmall {
                    requested: len,
                    available,
                });
            }

            let addr = libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                prot,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);

            if addr == libc::MAP_FAILED {
                return Err(TransportError::last_os_error("mmap"));
            }

            tracing::debug!(remote_key, len, "Mapped peer shared memory region");
            Ok(ShmMapping {
                ptr: NonNull::new(addr as *mut u8),
                len,
                mapped_len,
            })
        }
    }

    fn unmap(&self, mut mapping: ShmMapping) -> Result<(), TransportError> {
        mapping.release()
    }
}

fn peer_name(peer: &PeerAddress) -> Result<&str, TransportError> {
    let name = std::str::from_utf8(peer.as_bytes())
        .map_err(|_| TransportError::InvalidPeerAddress("not valid UTF-8".to_string()))?;
    if name.contains('/') || name.contains('\0') {
        return Err(TransportError::InvalidPeerAddress(name.to_string()));
    }
    Ok(name)
}

fn object_name(endpoint: &str, key: u64) -> Result<CString, TransportError> {
    CString::new(format!("/{endpoint}-{key:016x}"))
        .map_err(|_| TransportError::InvalidPeerAddress(endpoint.to_string()))
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

/// Round up to whole pages; zero-length requests still map one page.
fn round_to_page(len: usize) -> usize {
    let page = page_size();
    len.max(1).div_ceil(page) * page
}

unsafe fn unmap_raw(ptr: NonNull<u8>, len: usize) -> Result<(), TransportError> {
    // SAFETY: forwarded from the caller.
    if unsafe { libc::munmap(ptr.as_ptr().cast(), len) } == -1 {
        return Err(TransportError::last_os_error("munmap"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ShmTransport, ShmEndpoint) {
        let transport = ShmTransport::new("mmbtest");
        let domain = transport.setup_domain().unwrap();
        let endpoint = transport.setup_endpoint(&domain).unwrap();
        (transport, endpoint)
    }

    #[test]
    fn test_register_and_map() {
        let (transport, endpoint) = setup();
        let mut region = transport.register_region(&endpoint, 8192).unwrap();
        region.as_mut_slice()[..8].copy_from_slice(&42u64.to_ne_bytes());

        let peer = PeerAddress::new(endpoint.name().as_bytes().to_vec());
        let mapping = transport
            .map(&endpoint, &peer, region.key(), 8192, MapAccess::ReadWrite)
            .unwrap();
        assert_eq!(mapping.size(), 8192);

        // SAFETY: the mapping holds at least 8 bytes.
        let value = unsafe { std::ptr::read_volatile(mapping.as_ptr() as *const u64) };
        assert_eq!(value, 42);

        transport.unmap(mapping).unwrap();
    }

    #[test]
    fn test_map_unknown_key() {
        let (transport, endpoint) = setup();
        let peer = PeerAddress::new(endpoint.name().as_bytes().to_vec());
        let result = transport.map(&endpoint, &peer, 0xdead_beef, 4096, MapAccess::ReadOnly);
        assert!(matches!(result, Err(TransportError::UnknownKey(0xdead_beef))));
    }

    #[test]
    fn test_region_unlinked_on_drop() {
        let (transport, endpoint) = setup();
        let region = transport.register_region(&endpoint, 4096).unwrap();
        let key = region.key();
        drop(region);

        let peer = PeerAddress::new(endpoint.name().as_bytes().to_vec());
        assert!(matches!(
            transport.map(&endpoint, &peer, key, 4096, MapAccess::ReadOnly),
            Err(TransportError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_map_larger_than_region() {
        let (transport, endpoint) = setup();
        let region = transport.register_region(&endpoint, 4096).unwrap();
        let peer = PeerAddress::new(endpoint.name().as_bytes().to_vec());

        let oversized = round_to_page(4096) + 1;
        assert!(matches!(
            transport.map(&endpoint, &peer, region.key(), oversized, MapAccess::ReadOnly),
            Err(TransportError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn test_peer_name_rejects_paths() {
        assert!(peer_name(&PeerAddress::new(b"../etc".to_vec())).is_err());
        assert!(peer_name(&PeerAddress::new(vec![0xff, 0xfe])).is_err());
        assert_eq!(peer_name(&PeerAddress::new(b"mmb-1-2".to_vec())).unwrap(), "mmb-1-2");
    }

    #[test]
    fn test_round_to_page() {
        let page = page_size();
        assert_eq!(round_to_page(0), page);
        assert_eq!(round_to_page(1), page);
        assert_eq!(round_to_page(page), page);
        assert_eq!(round_to_page(page + 1), 2 * page);
    }
}
