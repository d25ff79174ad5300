use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meshroom::config::RelayConfig;
use meshroom::relay::{self, RelayState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // ── Install rustls CryptoProvider (required by rustls 0.23+) ────────
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("a rustls crypto provider was already installed");
    }

    // Load .env before anything else so MESHROOM_LOG_LEVEL is available.
    let _ = dotenvy::dotenv();
    let log_level = std::env::var("MESHROOM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    if let Err(e) = run(RelayConfig::from_env()).await {
        error!("relay stopped: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: RelayConfig) -> Result<(), BoxError> {
    let bind_addr = cfg.bind_addr.clone();
    let tls = if cfg.tls_enabled {
        let cert_path = cfg
            .tls_cert_path
            .clone()
            .ok_or("MESHROOM_TLS_CERT_PATH must be set when TLS is enabled")?;
        let key_path = cfg
            .tls_key_path
            .clone()
            .ok_or("MESHROOM_TLS_KEY_PATH must be set when TLS is enabled")?;
        Some(load_tls_config(&cert_path, &key_path).await?)
    } else {
        None
    };

    let state = Arc::new(RelayState::new(cfg));
    let app = relay::router(state);

    match tls {
        Some(tls_config) => {
            let addr: SocketAddr = bind_addr.parse()?;
            info!("meshroom relay listening on https://{bind_addr}");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            info!("meshroom relay listening on http://{bind_addr}");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}

async fn load_tls_config(cert_path: &str, key_path: &str) -> Result<RustlsConfig, BoxError> {
    info!("Loading TLS certificate from {cert_path}");
    info!("Loading TLS private key from {key_path}");
    Ok(RustlsConfig::from_pem_file(cert_path, key_path).await?)
}
