// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use idsign_server::{
    api::router,
    config::{Config, LogFormat},
    events::WebhookNotifier,
    state::AppState,
};

/// Time in-flight requests get to finish after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };
    init_tracing(config.log_format);

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let (state, events_rx) = match AppState::from_config(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %e, "Startup failed");
            process::exit(1);
        }
    };
    if state.verifier.is_none() {
        info!("No vision backend configured; /verify endpoints will answer 503");
    }

    let shutdown = CancellationToken::new();
    let notifier = match WebhookNotifier::new(state.db.clone(), events_rx, config.webhook_timeout) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!(error = %e, "Failed to build webhook client");
            process::exit(1);
        }
    };
    let notifier_task = tokio::spawn(notifier.run(shutdown.clone()));

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, host = %config.host, "Invalid bind address");
            process::exit(1);
        }
    };

    let handle = Handle::new();
    {
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutting down...");
            shutdown.cancel();
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });
    }

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let served = match &config.tls {
        Some((cert_path, key_path)) => {
            let tls = match RustlsConfig::from_pem_file(cert_path, key_path).await {
                Ok(tls) => tls,
                Err(e) => {
                    error!(error = %e, "Failed to load TLS certificate");
                    process::exit(1);
                }
            };
            info!(%addr, "idsign listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app)
                .await
        }
        None => {
            info!(%addr, "idsign listening on http (docs at /docs)");
            axum_server::bind(addr).handle(handle).serve(app).await
        }
    };
    if let Err(e) = served {
        error!(error = %e, "Server failed");
    }

    // Let the notifier drain what is already queued
    shutdown.cancel();
    if let Err(e) = notifier_task.await {
        error!(error = %e, "Webhook notifier panicked");
    }
}
