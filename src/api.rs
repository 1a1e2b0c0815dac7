use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::aggregator::{AggregateParams, AggregateResult, Aggregator, SingleSourceResult};
use crate::mention::SourceType;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/aggregate", post(aggregate))
        .route("/sources", get(list_sources))
        .route("/source/{name}", post(refresh_source))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Partial source failures still answer 200 with a populated `errors`
/// array; how that renders is the consuming UI's call.
async fn aggregate(
    State(state): State<AppState>,
    Json(params): Json<AggregateParams>,
) -> Json<AggregateResult> {
    Json(state.aggregator.aggregate(&params).await)
}

#[derive(Deserialize)]
struct RefreshReq {
    terms: Vec<String>,
    brand: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    days_back: Option<u32>,
}

async fn refresh_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RefreshReq>,
) -> Json<SingleSourceResult> {
    Json(
        state
            .aggregator
            .fetch_single_source(
                &name,
                &req.terms,
                &req.brand,
                req.max_results,
                req.days_back,
            )
            .await,
    )
}

#[derive(Serialize)]
struct SourceInfo {
    name: &'static str,
    source_type: SourceType,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    Json(
        state
            .aggregator
            .source_names()
            .into_iter()
            .map(|(name, source_type)| SourceInfo { name, source_type })
            .collect(),
    )
}
