//! Application struct that encapsulates server assembly and serving logic.

use axum::ServiceExt;
use reqscope_core::config::Config;
use reqscope_core::lifecycle::shutdown::Shutdown;
use std::net::SocketAddr;
use std::time::Duration;

pub struct Application {
    config: Config,
}

impl Application {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        tracing::info!(
            "Access log as '{}', mounted at '{}'",
            config.access_logger,
            if config.script_name.is_empty() {
                "/"
            } else {
                &config.script_name
            }
        );
        Ok(Self { config })
    }

    /// Serve until a shutdown signal arrives, then drain in-flight requests for
    /// at most `shutdown-timeout` seconds.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self { config } = self;

        let shutdown = Shutdown::new();
        let signals = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = signals.listen_for_signals().await {
                tracing::error!("Signal listener failed: {e}");
            }
        });

        let addr = format!("{}:{}", config.host, config.port);
        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        let app = reqscope_server::build_app(&config);
        let graceful = shutdown.clone();
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { graceful.requested().await });

        let grace = Duration::from_secs(config.shutdown_timeout);
        tokio::select! {
            result = server.into_future() => result?,
            _ = shutdown.deadline(grace) => {
                tracing::warn!(
                    "Connections still open after {}s, shutting down anyway",
                    config.shutdown_timeout
                );
            }
        }

        tracing::info!("Server shut down.");
        Ok(())
    }
}
