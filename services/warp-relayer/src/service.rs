// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Relayer Service Module 🕸️
//!
//! A module for starting long-running tasks for message relaying.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its lifetime.
//! One catch-up coordinator is spawned per configured source chain, next to
//! the health and metrics API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::signal::unix;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use warp_relayer_catch_up::{CatchUpCoordinator, MessageSource};
use warp_relayer_config::setup::{
    create_store, load_config, setup_logger, SetupOptions,
};
use warp_relayer_config::SourceBlockchainConfig;
use warp_relayer_context::RelayerContext;
use warp_relayer_store::CheckpointStore;
use warp_relayer_utils::probe;
use warp_relayer_validators::{
    CanonicalValidatorClient, JsonRpcPlatformClient, PlatformClient,
    QuorumRequirement,
};

use crate::delivery::{AttestedDelivery, DestinationSubmitter, SignatureCollector};
use crate::routes;

/// The chain specific parts of the relayer.
///
/// Reading source chains, talking to the validators and submitting to
/// destination chains depend on the chains being bridged, so they are
/// provided by the embedder.
pub trait ChainBackend: Send + Sync {
    /// The message feed of a configured source chain.
    fn message_source(
        &self,
        chain: &SourceBlockchainConfig,
    ) -> crate::Result<Arc<dyn MessageSource>>;

    /// Gathers attestations from the validators.
    fn signature_collector(&self) -> Arc<dyn SignatureCollector>;

    /// Submits attested messages to their destination.
    fn destination_submitter(&self) -> Arc<dyn DestinationSubmitter>;
}

/// Builds the health and metrics routes.
pub fn build_router(ctx: RelayerContext) -> Router {
    Router::new()
        .route("/health", get(routes::handle_health))
        .route("/metrics", get(routes::handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
}

/// Serves the health and metrics API on `api-port` until shutdown.
pub async fn build_axum_services(ctx: RelayerContext) -> crate::Result<()> {
    let socket_addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.api_port));
    let mut shutdown = ctx.shutdown_signal();
    let app = build_router(ctx).into_make_service();
    tracing::info!("Starting the server on {}", socket_addr);
    axum::Server::bind(&socket_addr)
        .serve(app)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

/// Starts one coordinator per source chain, using the platform chain API
/// configured in `p-chain-api`.
///
/// This does not block, the coordinators run on background tasks.
pub fn ignite<S, B>(
    ctx: &RelayerContext,
    store: S,
    backend: &B,
) -> crate::Result<Vec<JoinHandle<()>>>
where
    S: CheckpointStore + 'static,
    B: ChainBackend + ?Sized,
{
    let platform = JsonRpcPlatformClient::new(&ctx.config.p_chain_api)?
        .with_metrics(ctx.metrics.clone());
    ignite_with_platform(ctx, store, backend, platform)
}

/// Same as [`ignite`], with an explicit platform chain client.
pub fn ignite_with_platform<S, B, P>(
    ctx: &RelayerContext,
    store: S,
    backend: &B,
    platform: P,
) -> crate::Result<Vec<JoinHandle<()>>>
where
    S: CheckpointStore + 'static,
    B: ChainBackend + ?Sized,
    P: PlatformClient + 'static,
{
    let validators = Arc::new(CanonicalValidatorClient::new(platform));
    for chain in &ctx.config.source_blockchains {
        if let Some(subnet_id) = chain.subnet_id {
            validators.remember_subnet(chain.blockchain_id, subnet_id);
        }
    }
    let requirement =
        QuorumRequirement::from_percentage(ctx.config.quorum_percentage)?;
    let policy = Arc::new(ctx.config.admission_policy());
    let collector = backend.signature_collector();
    let submitter = backend.destination_submitter();

    let mut handles = Vec::with_capacity(ctx.config.source_blockchains.len());
    for chain in &ctx.config.source_blockchains {
        let pipeline = AttestedDelivery::builder()
            .validators(validators.clone())
            .collector(collector.clone())
            .submitter(submitter.clone())
            .requirement(requirement)
            .config(ctx.config.signature_collection)
            .build();
        let coordinator = CatchUpCoordinator::builder()
            .source_blockchain(chain.blockchain_id)
            .source(backend.message_source(chain)?)
            .pipeline(pipeline)
            .store(store.clone())
            .policy(policy.clone())
            .config(ctx.config.catch_up)
            .start_height(chain.process_historical_blocks_from_height.unwrap_or(0))
            .build();
        let ctx = ctx.clone();
        let chain_id = chain.blockchain_id;
        tracing::debug!(%chain_id, "Starting catch-up coordinator");
        handles.push(tokio::task::spawn(async move {
            match coordinator.run(&ctx).await {
                Ok(()) => tracing::debug!(%chain_id, "coordinator stopped"),
                Err(e) => tracing::error!(
                    %chain_id,
                    error = %e,
                    "coordinator stopped on an unrecoverable error, restart the relayer once fixed",
                ),
            }
        }));
    }
    Ok(handles)
}

/// Runs a relayer until it receives a termination signal.
///
/// Loads the configuration, sets up the logger, the checkpoint store and
/// the API, then ignites the coordinators.
pub async fn run<B>(
    opts: SetupOptions,
    verbosity: i32,
    backend: &B,
) -> anyhow::Result<()>
where
    B: ChainBackend + ?Sized,
{
    setup_logger(verbosity)?;
    // The configuration is validated and configured from the given directory
    let config = load_config(opts.config_dir.clone())?;
    // persistent storage for the relayer
    let store = create_store(&opts, &config)?;
    let ctx = RelayerContext::new(config)?;

    let cloned_store = store.clone();
    let metrics_clone = ctx.metrics.clone();
    // metric for data stored which is determined every 1 hour
    let store_metric_task_handle = tokio::task::spawn(async move {
        let mut data_metric_interval =
            tokio::time::interval(Duration::from_secs(3600));
        loop {
            data_metric_interval.tick().await;
            metrics_clone
                .total_amount_of_data_stored
                .set(cloned_store.data_stored_size() as f64);
        }
    });

    let server_handle = tokio::spawn(build_axum_services(ctx.clone()));
    let coordinators = ignite(&ctx, store, backend)?;
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    tokio::select! {
        _ = ctrlc_signal.recv() => tracing::warn!("Interrupted (Ctrl+C) ..."),
        _ = termination_signal.recv() => tracing::warn!("Got Terminate signal ..."),
        _ = quit_signal.recv() => tracing::warn!("Quitting ..."),
    }

    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the application.
    ctx.shutdown();
    for handle in coordinators {
        let _ = handle.await;
    }
    store_metric_task_handle.abort();
    match server_handle.await {
        Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
        Err(e) => tracing::error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }
    tracing::info!("Clean Exit ..");
    Ok(())
}
