mod health;
mod metrics;
mod predict;

use crate::{model_service::ModelLoader, server::SharedState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub use health::{healthcheck, liveness};
pub use metrics::metrics_handler;
pub use predict::predict;

pub fn api_routes<L: ModelLoader>(body_limit: usize) -> Router<SharedState<L>> {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler::<L>))
        .route(
            "/predict",
            post(predict::<L>).layer(DefaultBodyLimit::max(body_limit)),
        )
}
