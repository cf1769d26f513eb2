// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use dynamo_mmap_transport::{CommitFlags, ControlChannel, LocalRegion, Transport};

use super::{SessionContext, SessionOutcome};
use crate::config::{BenchConfig, SessionConfig};
use crate::error::{BenchError, Result};
use crate::protocol::{AccessCredential, Parameters};

/// Serve one accepted control connection to completion.
///
/// The context is torn down before returning, whatever the outcome.
pub fn run_responder<T: Transport>(
    transport: &T,
    channel: ControlChannel,
    service_name: &str,
    bench: &BenchConfig,
) -> Result<SessionOutcome> {
    let peer = channel
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let span = tracing::info_span!("responder", peer = %peer);
    let _enter = span.enter();

    let mut ctx = SessionContext::new(transport, channel);
    let result = serve(&mut ctx, peer, service_name, bench);
    ctx.teardown();

    match result {
        Ok(params) => {
            tracing::info!(
                region_length = params.region_length,
                thread_count = params.thread_count,
                once_mode = params.once_mode,
                "Session complete"
            );
            Ok(if params.once_mode {
                SessionOutcome::Stop
            } else {
                SessionOutcome::Continue
            })
        }
        Err(err) => {
            tracing::error!(
                operation = err.operation(),
                code = err.code(),
                "Responder session failed: {err}"
            );
            Err(err)
        }
    }
}

fn serve<T: Transport>(
    ctx: &mut SessionContext<'_, T>,
    peer: String,
    service_name: &str,
    bench: &BenchConfig,
) -> Result<Parameters> {
    let transport = ctx.transport();

    let mut wire = [0u8; Parameters::WIRE_SIZE];
    control(ctx)?
        .recv_fixed_blob(&mut wire)
        .map_err(|e| BenchError::control("receive parameters", e))?;
    let params = Parameters::decode(&wire);
    tracing::debug!(?params, "Received parameters");

    let config = ctx.set_config(SessionConfig {
        remote_node: peer,
        service_name: service_name.to_string(),
        region_length: params.region_length,
        thread_count: params.thread_count,
        once_mode: params.once_mode,
    });
    let padding = bench.transport.region_padding;
    let region_len = config.registered_length(padding).ok_or_else(|| {
        BenchError::InvalidParameters(format!(
            "{} bytes x {} threads + {padding} overflows",
            params.region_length, params.thread_count
        ))
    })?;

    let domain = transport
        .setup_domain()
        .map_err(|e| BenchError::transport("setup domain", e))?;
    let domain = ctx.set_domain(domain);
    let endpoint = transport
        .setup_endpoint(domain)
        .map_err(|e| BenchError::transport("setup endpoint", e))?;
    ctx.set_endpoint(endpoint);

    let peer_address = transport
        .exchange_addresses(
            endpoint_of(ctx)?,
            control(ctx)?,
            bench.transport.address_exchange_timeout(),
        )
        .map_err(|e| BenchError::transport("exchange addresses", e))?;
    ctx.set_peer(peer_address);

    let region = transport
        .register_region(endpoint_of(ctx)?, region_len)
        .map_err(|e| BenchError::transport("register region", e))?;
    let region = ctx.set_region(region);
    region.as_mut_slice().fill(0);
    transport
        .commit(&*region, 0, region_len, CommitFlags::FLUSH_ALL)
        .map_err(|e| BenchError::transport("commit region", e))?;
    let credential = AccessCredential {
        remote_key: region.key(),
    };
    tracing::debug!(len = region_len, key = credential.remote_key, "Region registered");

    let channel = control(ctx)?;
    channel
        .send_blob(&credential.encode())
        .map_err(|e| BenchError::control("send credential", e))?;

    channel
        .recv_fixed_blob(&mut [])
        .map_err(|e| BenchError::control("receive completion", e))?;

    Ok(params)
}

fn control<'a, T: Transport>(ctx: &'a SessionContext<'_, T>) -> Result<&'a ControlChannel> {
    ctx.channel()
        .ok_or_else(|| BenchError::InvalidParameters("control channel already closed".into()))
}

fn endpoint_of<'a, T: Transport>(ctx: &'a SessionContext<'_, T>) -> Result<&'a T::Endpoint> {
    ctx.endpoint()
        .ok_or_else(|| BenchError::InvalidParameters("endpoint not initialized".into()))
}
