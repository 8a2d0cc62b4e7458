mod error;
mod handlers;

use crate::dispatcher::Lamp;
use crate::effects::EffectRunner;
use axum::Router;
use axum::routing::{get, post};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Everything a request handler may touch.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub lamp: Arc<Lamp>,
    pub effects: Arc<EffectRunner>,
}

pub fn router(context: AppContext) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/connect", post(handlers::connect))
        .route("/disconnect", post(handlers::disconnect))
        .route("/check", post(handlers::check))
        .route("/reconnect", post(handlers::reconnect))
        .route("/power", post(handlers::power))
        .route("/mode", post(handlers::mode))
        .route("/brightness", post(handlers::brightness))
        .route("/temperature", post(handlers::temperature))
        .route("/white", post(handlers::white))
        .route("/color", post(handlers::color))
        .route("/scene", post(handlers::scene))
        .route("/dps", post(handlers::dps))
        .route("/effects/stop_all", post(handlers::stop_all_effects))
        .route("/effects/status", get(handlers::effects_status))
        .route("/effects/:kind/start", post(handlers::start_effect))
        .route("/effects/:kind/stop", post(handlers::stop_effect))
        .with_state(context)
}

pub async fn serve<F>(bind: SocketAddr, context: AppContext, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind).await?;
    info!("🌐 API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(context)).with_graceful_shutdown(shutdown).await
}
