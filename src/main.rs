use anyhow::{Context, Result};
use clap::Parser;
use mapanima_server::{auth, cli, config, openapi, routes, services, state, static_assets};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind mapanima-server listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind mapanima-server listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!("{}", serde_json::to_string_pretty(&openapi::openapi_json())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::ServerConfig::from_env(args.static_root)?;

    let auth = Arc::new(auth::AuthManager::new(config.session_ttl_hours));
    let http = reqwest::Client::new();
    let catalog = Arc::new(services::catalog::TerritoryCatalog::new(
        &config,
        http.clone(),
    ));

    let state = state::AppState {
        config: config.clone(),
        auth,
        catalog: catalog.clone(),
        http,
    };

    // The dashboard stays up even when the source layer is
    // unreachable; status reports the failure instead.
    if let Err(err) = catalog.reload().await {
        tracing::warn!(error = %err, "initial territory catalog load failed");
    }

    let cancel = CancellationToken::new();
    if config.enable_catalog_refresh {
        catalog.clone().start(
            cancel.clone(),
            Duration::from_secs(config.catalog_refresh_interval_seconds),
        );
    }

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(60)
            .methods(vec![
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .use_headers()
            .finish()
            .context("failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = routes::router(state)
        .layer(GovernorLayer::new(governor_conf))
        .fallback_service(static_assets::service(config.static_root.clone())?);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    cancel.cancel();
    Ok(())
}
