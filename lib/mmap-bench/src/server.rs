// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sequential accept loop running one responder session per connection.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};

use dynamo_mmap_transport::{ChannelError, ControlChannel, Transport};

use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::session::{SessionOutcome, run_responder};

pub struct Server {
    listener: TcpListener,
    service_name: String,
}

impl Server {
    /// Listen on every address for `service`, preferring the IPv6 wildcard
    /// and falling back to IPv4 when IPv6 is unavailable.
    pub fn bind(service: &str) -> Result<Self> {
        let port: u16 = service.parse().map_err(|_| {
            BenchError::control("bind", ChannelError::InvalidService(service.to_string()))
        })?;

        let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
        let listener = match TcpListener::bind(v6) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::debug!("IPv6 bind failed ({}), falling back to IPv4", e);
                TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
                    .map_err(|e| BenchError::control("bind", ChannelError::Io(e)))?
            }
        };
        Ok(Self::from_listener(listener, service))
    }

    /// Serve on a pre-bound listener.
    pub fn from_listener(listener: TcpListener, service: &str) -> Self {
        Self {
            listener,
            service_name: service.to_string(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| BenchError::control("local address", ChannelError::Io(e)))
    }

    /// Accept and serve connections one at a time.
    ///
    /// Returns `Ok` after a session that requested once mode. Any session
    /// failure ends the loop with that failure.
    pub fn run<T: Transport>(&self, transport: &T, bench: &BenchConfig) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Control listener bound to {}", addr);
        }

        let mut sessions = 0u64;
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .map_err(|e| BenchError::control("accept", ChannelError::Io(e)))?;
            sessions += 1;
            tracing::info!(session = sessions, "Accepted control connection from {}", peer);

            let channel = ControlChannel::from_stream(stream);
            match run_responder(transport, channel, &self.service_name, bench)? {
                SessionOutcome::Continue => continue,
                SessionOutcome::Stop => {
                    tracing::info!(sessions, "Once mode requested, stopping");
                    return Ok(());
                }
            }
        }
    }
}
