//! `logtopus-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use logtopus_api::auth::TokenAuthority;
use logtopus_api::config::{Config, StoreKind};
use logtopus_api::server::Server;
use logtopus_core::influx::InfluxBackend;
use logtopus_core::observability::{LogFormat, init_logging};
use logtopus_core::store::{MemoryPointStore, PointStore};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn PointStore>> {
    match config.store {
        StoreKind::Influx => {
            tracing::info!(
                url = %config.influx.url,
                org = %config.influx.org,
                bucket = %config.influx.bucket,
                "Using InfluxDB store"
            );
            let backend =
                InfluxBackend::new(config.influx.clone()).context("create InfluxDB store")?;
            Ok(Arc::new(backend))
        }
        StoreKind::Memory => {
            if !config.debug {
                anyhow::bail!("LOGTOPUS_INFLUX_URL is required when LOGTOPUS_DEBUG=false");
            }
            tracing::warn!("LOGTOPUS_INFLUX_URL not set; using in-memory store (debug only)");
            Ok(Arc::new(MemoryPointStore::new()))
        }
    }
}

/// Flips `stop` to `true` on SIGINT or SIGTERM.
fn spawn_signal_handler(stop: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }
        tracing::info!("Server shutdown requested");
        stop.send_replace(true);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let authority =
        TokenAuthority::from_config(&config.jwt).context("can't create a token authority")?;
    tracing::info!(ttl_secs = authority.ttl().as_secs(), "token authority ready");
    let store = build_store(&config)?;

    let server = Server::builder()
        .config(config)
        .store(store)
        .authority(Arc::new(authority))
        .build();

    let (stop, shutdown) = watch::channel(false);
    spawn_signal_handler(stop);

    server.serve(shutdown).await?;
    Ok(())
}
