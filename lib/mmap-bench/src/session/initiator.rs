// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use dynamo_mmap_transport::{ControlChannel, MapAccess, Transport, connect_sock};

use super::SessionContext;
use crate::config::{BenchConfig, SessionConfig};
use crate::engine::{BarrierEngine, EngineRun, WorkerSpawner};
use crate::error::{BenchError, Result};
use crate::protocol::{AccessCredential, COMPLETION, Parameters};
use crate::worker::scan_slice;

/// Client side of a session.
///
/// ```text
/// start        connect, send Parameters, endpoint + address exchange,
///              receive AccessCredential, map the remote region
/// run_workers  barrier engine; the leader sends Completion
/// stop         teardown (also done on drop)
/// ```
pub struct Initiator<'t, T: Transport> {
    ctx: SessionContext<'t, T>,
    config: SessionConfig,
    credential: AccessCredential,
}

impl<'t, T: Transport> Initiator<'t, T> {
    /// Connect to `config.remote_node:config.service_name` and run the
    /// handshake up to the mapped region.
    pub fn start(transport: &'t T, config: SessionConfig, bench: &BenchConfig) -> Result<Self> {
        let channel = connect_sock(&config.remote_node, &config.service_name)
            .map_err(|e| BenchError::control("connect", e))?;
        Self::start_on(transport, channel, config, bench)
    }

    /// Run the handshake over an already connected channel.
    pub fn start_on(
        transport: &'t T,
        channel: ControlChannel,
        config: SessionConfig,
        bench: &BenchConfig,
    ) -> Result<Self> {
        let span = tracing::info_span!(
            "initiator",
            node = %config.remote_node,
            service = %config.service_name
        );
        let _enter = span.enter();

        let mut ctx = SessionContext::new(transport, channel);
        match handshake(&mut ctx, &config, bench) {
            Ok(credential) => {
                ctx.set_config(config.clone());
                Ok(Self {
                    ctx,
                    config,
                    credential,
                })
            }
            Err(err) => {
                tracing::error!(
                    operation = err.operation(),
                    code = err.code(),
                    "Initiator handshake failed: {err}"
                );
                Err(err)
            }
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn credential(&self) -> AccessCredential {
        self.credential
    }

    pub fn context(&self) -> &SessionContext<'t, T> {
        &self.ctx
    }

    /// Scan the mapped region with `thread_count` workers; the leader sends
    /// the completion signal once every scan is done.
    pub fn run_workers<S: WorkerSpawner>(&self, spawner: &S) -> Result<EngineRun> {
        let thread_count = self.config.thread_count_usize().ok_or_else(|| {
            BenchError::InvalidParameters(format!("{} threads", self.config.thread_count))
        })?;
        let region_length = self.config.region_length_usize().ok_or_else(|| {
            BenchError::InvalidParameters(format!("{} byte slices", self.config.region_length))
        })?;
        let channel = self
            .ctx
            .channel()
            .ok_or_else(|| BenchError::InvalidParameters("control channel already closed".into()))?;
        let transport = self.ctx.transport();
        let mapping = self.ctx.mapping();

        let engine = BarrierEngine::new(thread_count);
        let run = engine.run(
            spawner,
            |index| scan_slice(transport, mapping, index, region_length),
            || {
                channel
                    .send_blob(&COMPLETION)
                    .map_err(|e| BenchError::control("send completion", e))
            },
        );
        tracing::debug!(
            threads = thread_count,
            started = run.slots.len(),
            "Workers joined"
        );
        Ok(run)
    }

    /// Tear the session down.
    pub fn stop(mut self) {
        self.ctx.teardown();
    }
}

fn handshake<T: Transport>(
    ctx: &mut SessionContext<'_, T>,
    config: &SessionConfig,
    bench: &BenchConfig,
) -> Result<AccessCredential> {
    let transport = ctx.transport();
    let mapped_len = config.mapped_length().ok_or_else(|| {
        BenchError::InvalidParameters(format!(
            "{} bytes x {} threads overflows",
            config.region_length, config.thread_count
        ))
    })?;

    let params = Parameters::from(config);
    control(ctx)?
        .send_blob(&params.encode())
        .map_err(|e| BenchError::control("send parameters", e))?;

    let domain = transport
        .setup_domain()
        .map_err(|e| BenchError::transport("setup domain", e))?;
    let domain = ctx.set_domain(domain);
    let endpoint = transport
        .setup_endpoint(domain)
        .map_err(|e| BenchError::transport("setup endpoint", e))?;
    ctx.set_endpoint(endpoint);

    let endpoint = ctx
        .endpoint()
        .ok_or_else(|| BenchError::InvalidParameters("endpoint not initialized".into()))?;
    let peer = transport
        .exchange_addresses(
            endpoint,
            control(ctx)?,
            bench.transport.address_exchange_timeout(),
        )
        .map_err(|e| BenchError::transport("exchange addresses", e))?;

    let mut wire = [0u8; AccessCredential::WIRE_SIZE];
    control(ctx)?
        .recv_fixed_blob(&mut wire)
        .map_err(|e| BenchError::control("receive credential", e))?;
    let credential = AccessCredential::decode(&wire);
    tracing::debug!(key = credential.remote_key, "Received credential");

    if mapped_len > 0 {
        let mapping = transport
            .map(endpoint, &peer, credential.remote_key, mapped_len, MapAccess::ReadWrite)
            .map_err(|e| BenchError::transport("map remote region", e))?;
        ctx.set_mapping(mapping);
    }
    ctx.set_peer(peer);

    Ok(credential)
}

fn control<'a, T: Transport>(ctx: &'a SessionContext<'_, T>) -> Result<&'a ControlChannel> {
    ctx.channel()
        .ok_or_else(|| BenchError::InvalidParameters("control channel already closed".into()))
}
