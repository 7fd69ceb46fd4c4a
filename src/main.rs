use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use dotenvy::dotenv;
use http::HeaderValue;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use docsync::bootstrap::Config;
use docsync::infrastructure::{AllowAuthenticatedAuthorizer, JwtAuthenticator, PostgresServerProvider};
use docsync::server::{ws::ws_entry, Dispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "docsync=debug,axum=info,tower_http=info".into()))
        .init();

    let cfg = Config::from_env()?;
    info!(?cfg, "starting docsync server");

    let provider = Arc::new(PostgresServerProvider::<Value, Value>::connect(&cfg.database_url).await?);
    let authenticator = Arc::new(JwtAuthenticator::new(cfg.jwt_secret.clone()));
    let authorizer = Arc::new(AllowAuthenticatedAuthorizer);
    let dispatcher = Arc::new(Dispatcher::new(provider, authenticator, authorizer));

    let cors = match cfg.frontend_url.as_deref().and_then(|u| HeaderValue::from_str(u).ok()) {
        Some(origin) => CorsLayer::new().allow_origin(origin).allow_credentials(true),
        None if cfg.is_production => CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("http://invalid"))),
        None => CorsLayer::new().allow_origin(AllowOrigin::mirror_request()).allow_credentials(true),
    };

    let app = Router::new()
        .route("/ws", get(ws_entry::<PostgresServerProvider<Value, Value>, JwtAuthenticator, AllowAuthenticatedAuthorizer>))
        .with_state(dispatcher)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.bind_port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!(?err, "server exited with error");
    }

    Ok(())
}
