//! Headless participant: joins a room with synthetic media and logs what
//! happens until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meshroom::config::ClientConfig;
use meshroom::media::synthetic::{pump_silence, SyntheticMediaSource};
use meshroom::media::{acquire_local_media, MediaSource};
use meshroom::relay_client::WsRelayConnector;
use meshroom::session::{self, JoinRequest, SessionContext};
use meshroom::transport::WebRtcTransport;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "meshroom-client", version, about = "Join a meshroom room with synthetic media")]
struct Args {
    /// Room to join.
    room: String,

    /// Display name announced to the other participants.
    #[arg(long, default_value = "meshroom-bot")]
    name: String,

    #[arg(long, env = "MESHROOM_ROOM_PASSWORD")]
    password: Option<String>,

    /// Overrides MESHROOM_RELAY_URL.
    #[arg(long)]
    relay_url: Option<String>,

    /// Offer no video track.
    #[arg(long)]
    audio_only: bool,
}

#[tokio::main]
async fn main() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("a rustls crypto provider was already installed");
    }

    let _ = dotenvy::dotenv();
    let log_level = std::env::var("MESHROOM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("client stopped: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    let mut cfg = ClientConfig::from_env();
    if let Some(url) = args.relay_url {
        cfg.relay_url = url;
    }

    let source: Arc<dyn MediaSource> = Arc::new(SyntheticMediaSource::new(!args.audio_only));
    let local_media = acquire_local_media(source.as_ref()).await?;

    let ctx = SessionContext::new(
        &cfg,
        Arc::new(WebRtcTransport::new(&cfg)?),
        Arc::new(WsRelayConnector::new(cfg.relay_url.clone())),
        source,
    );
    let request = JoinRequest {
        room_id: args.room,
        display_name: args.name,
        password: args.password,
    };

    let pump_cancel = CancellationToken::new();
    let pump = tokio::spawn(pump_silence(local_media.clone(), pump_cancel.clone()));

    let room = session::join(ctx, local_media, request).await?;
    let mut notices = room.notices();
    info!(self_id = %room.view().local_id, "in room, Ctrl-C to leave");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("leaving");
                break;
            }
            _ = room.closed() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => match serde_json::to_string(&notice) {
                    Ok(json) => info!(notice = notice.kind.as_str(), "{json}"),
                    Err(e) => warn!("failed to encode notice: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    room.leave().await?;
    pump_cancel.cancel();
    let _ = pump.await;
    Ok(())
}
