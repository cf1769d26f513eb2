// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use dynamo_mmap_transport::{ControlChannel, PeerAddress, Transport};

use crate::config::SessionConfig;

/// Everything one session acquires, released in reverse order on drop.
///
/// Handles are filled in as the session progresses; teardown skips the ones
/// that were never acquired and can run any number of times.
pub struct SessionContext<'t, T: Transport> {
    transport: &'t T,
    config: Option<SessionConfig>,
    channel: Option<ControlChannel>,
    domain: Option<T::Domain>,
    endpoint: Option<T::Endpoint>,
    peer: Option<PeerAddress>,
    region: Option<T::Region>,
    mapping: Option<T::Mapping>,
}

impl<'t, T: Transport> SessionContext<'t, T> {
    pub fn new(transport: &'t T, channel: ControlChannel) -> Self {
        Self {
            transport,
            config: None,
            channel: Some(channel),
            domain: None,
            endpoint: None,
            peer: None,
            region: None,
            mapping: None,
        }
    }

    pub fn transport(&self) -> &'t T {
        self.transport
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn channel(&self) -> Option<&ControlChannel> {
        self.channel.as_ref()
    }

    pub fn domain(&self) -> Option<&T::Domain> {
        self.domain.as_ref()
    }

    pub fn endpoint(&self) -> Option<&T::Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn peer(&self) -> Option<&PeerAddress> {
        self.peer.as_ref()
    }

    pub fn region(&self) -> Option<&T::Region> {
        self.region.as_ref()
    }

    pub fn region_mut(&mut self) -> Option<&mut T::Region> {
        self.region.as_mut()
    }

    pub fn mapping(&self) -> Option<&T::Mapping> {
        self.mapping.as_ref()
    }

    pub(crate) fn set_config(&mut self, config: SessionConfig) -> &SessionConfig {
        self.config.insert(config)
    }

    pub(crate) fn set_domain(&mut self, domain: T::Domain) -> &T::Domain {
        self.domain.insert(domain)
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: T::Endpoint) -> &T::Endpoint {
        self.endpoint.insert(endpoint)
    }

    pub(crate) fn set_peer(&mut self, peer: PeerAddress) -> &PeerAddress {
        self.peer.insert(peer)
    }

    pub(crate) fn set_region(&mut self, region: T::Region) -> &mut T::Region {
        self.region.insert(region)
    }

    pub(crate) fn set_mapping(&mut self, mapping: T::Mapping) -> &T::Mapping {
        self.mapping.insert(mapping)
    }

    /// Release every acquired handle: mapping, region, endpoint, domain, then
    /// the control channel.
    ///
    /// An unmap failure is logged and otherwise ignored so it never replaces
    /// the error that ended the session.
    pub fn teardown(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            if let Err(e) = self.transport.unmap(mapping) {
                tracing::warn!(error = %e, "Failed to unmap remote region");
            }
        }
        drop(self.region.take());
        drop(self.endpoint.take());
        drop(self.domain.take());
        self.peer = None;

        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

impl<T: Transport> Drop for SessionContext<'_, T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
