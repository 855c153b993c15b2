//! Serve command - runs the HTTP API

use std::net::SocketAddr;

use clap::Args;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::api::create_router;
use crate::config::AppConfig;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::observability::init_metrics;

/// Arguments for the serve command
#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
}

/// Run the server until Ctrl+C or SIGTERM
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    let metrics = init_metrics(&config.metrics);
    let state = crate::create_app_state(&config).await?;
    let app = create_router(
        state,
        metrics.map(|m| (m, config.metrics.path.as_str())),
    );

    let addr = build_socket_addr(&config, &args)?;
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_socket_addr(config: &AppConfig, args: &ServeArgs) -> anyhow::Result<SocketAddr> {
    let host = args.host.as_deref().unwrap_or(&config.server.host);
    Ok(SocketAddr::from((
        host.parse::<std::net::IpAddr>()?,
        args.port.unwrap_or(config.server.port),
    )))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_from_config() {
        let addr = build_socket_addr(&AppConfig::default(), &ServeArgs::default()).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_args_override_config() {
        let args = ServeArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(3000),
        };
        let addr = build_socket_addr(&AppConfig::default(), &args).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let args = ServeArgs {
            host: Some("not-an-ip".to_string()),
            port: None,
        };
        assert!(build_socket_addr(&AppConfig::default(), &args).is_err());
    }
}
