use anyhow::Context;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talespin::config::ServerConfig;
use talespin::room::directory;
use talespin::{api, cards, ws, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env before any env var reads
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(_)) {
            eprintln!("Warning: failed to load .env file: {}", err);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talespin=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        "starting talespin (cards {}:{} at {}px, format {:?}, cache {})",
        config.ratio_width,
        config.ratio_height,
        config.long_side,
        config.card_format,
        config.cards_cache_dir().display()
    );

    let registry = Arc::new(cards::build_registry(&config).await?);
    let state = Arc::new(AppState::new(registry, config.default_win_points));

    directory::spawn_room_gc(Arc::clone(&state.rooms));
    directory::spawn_room_maintenance(Arc::clone(&state.rooms));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/cards/:card_id", get(api::card_bytes))
        .route("/create", post(api::create_room))
        .route("/exists", post(api::room_exists))
        .route("/stats", get(api::directory_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
