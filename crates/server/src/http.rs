//! HTTP endpoints
//!
//! REST API over the match pipelines.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use fault_match_core::{Error, Hints};
use fault_match_pipeline::{MatchOptions, MatchResponse, RemoteMatchOptions};
use fault_match_retrieval::normalize_query;

use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/match", get(local_match))
        .route("/match/hybrid", get(hybrid_match))
        .route("/opensearch/match", post(remote_match))
        .route("/opensearch/stats", get(remote_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn error_response(err: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = if err.is_client_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else if matches!(err, Error::Remote(_)) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "reason": err.reason_code(),
        })),
    )
}

/// Reject queries that normalize to nothing before any retrieval runs.
/// Library callers of the pipelines get a `no_match` decision instead; the
/// HTTP surface turns the same condition into a 422.
fn require_query(q: &str) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    if normalize_query(q).is_empty() {
        return Err(error_response(&Error::input(
            "query is empty after normalization",
        )));
    }
    Ok(())
}

/// Liveness plus the list of available data sources.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut sources: Vec<&str> = state.local.sources();
    if state.remote.is_some() {
        sources.push("opensearch");
        if state
            .remote
            .as_ref()
            .is_some_and(|r| r.semantic_available())
        {
            sources.push("opensearch_semantic");
        }
    }
    Json(json!({
        "status": "ok",
        "opensearch_available": state.remote.is_some(),
        "semantic_available": state.semantic_available,
        "data_sources": sources,
    }))
}

#[derive(Debug, Deserialize)]
struct LocalMatchParams {
    q: String,
    system: Option<String>,
    part: Option<String>,
    /// Vehicle model hint
    model: Option<String>,
    /// Model-year hint; accepted for API compatibility, not used in ranking
    #[allow(dead_code)]
    year: Option<String>,
    #[serde(default = "default_topk")]
    topk_vec: usize,
    #[serde(default = "default_topk")]
    topk_kw: usize,
    #[serde(default = "default_topn")]
    topn_return: usize,
}

fn default_topk() -> usize {
    50
}
fn default_topn() -> usize {
    3
}

impl LocalMatchParams {
    fn hints(&self) -> Hints {
        Hints {
            system: self.system.clone(),
            part: self.part.clone(),
            vehicletype: self.model.clone(),
            faultcode: None,
        }
    }

    fn options(&self) -> MatchOptions {
        MatchOptions {
            topk_vec: self.topk_vec,
            topk_kw: self.topk_kw,
            topn_return: self.topn_return,
            ..MatchOptions::default()
        }
    }
}

/// Local fused retrieval with routing.
async fn local_match(
    State(state): State<AppState>,
    Query(params): Query<LocalMatchParams>,
) -> Result<Json<MatchResponse>, (StatusCode, Json<serde_json::Value>)> {
    require_query(&params.q)?;
    state
        .local
        .matching(&params.q, params.hints(), &params.options())
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "local match failed");
            error_response(&e)
        })
}

#[derive(Debug, Deserialize)]
struct HybridMatchParams {
    q: String,
    system: Option<String>,
    part: Option<String>,
    vehicletype: Option<String>,
    #[serde(default = "default_true")]
    use_remote: bool,
    #[serde(default = "default_topn")]
    topn_return: usize,
}

fn default_true() -> bool {
    true
}

/// Local + remote retrieval side by side.
///
/// Hits referring to the same case stay distinct between the two result
/// sets; the score scales are not comparable across corpora.
async fn hybrid_match(
    State(state): State<AppState>,
    Query(params): Query<HybridMatchParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    require_query(&params.q)?;
    let hints = Hints {
        system: params.system.clone(),
        part: params.part.clone(),
        vehicletype: params.vehicletype.clone(),
        faultcode: None,
    };
    let options = MatchOptions {
        topn_return: params.topn_return,
        ..MatchOptions::default()
    };

    let local = state
        .local
        .matching(&params.q, hints.clone(), &options)
        .await
        .map_err(|e| {
            error!(error = %e, "local side of hybrid match failed");
            error_response(&e)
        })?;

    let remote = if params.use_remote {
        match &state.remote {
            Some(pipeline) => {
                match pipeline
                    .matching(&params.q, hints, &RemoteMatchOptions::default())
                    .await
                {
                    Ok(response) => Some(response),
                    Err(e) => {
                        // remote trouble degrades hybrid to local-only
                        error!(error = %e, "remote side of hybrid match failed");
                        None
                    }
                }
            }
            None => None,
        }
    } else {
        None
    };

    let local_direct = local
        .decision
        .as_ref()
        .is_some_and(|d| d.mode == fault_match_core::DecisionMode::Direct);
    let remote_direct = remote
        .as_ref()
        .and_then(|r| r.decision.as_ref())
        .is_some_and(|d| d.mode == fault_match_core::DecisionMode::Direct);
    let local_confidence = local.decision.as_ref().map_or(0.0, |d| d.confidence);
    let remote_confidence = remote
        .as_ref()
        .and_then(|r| r.decision.as_ref())
        .map_or(0.0, |d| d.confidence);

    Ok(Json(json!({
        "query": local.query.clone(),
        "local_result": local,
        "opensearch_result": remote,
        "recommendation": {
            "use_local": local_direct,
            "use_opensearch": remote_direct,
            "confidence_comparison": {
                "local": local_confidence,
                "opensearch": remote_confidence,
            },
        },
    })))
}

#[derive(Debug, Deserialize)]
struct RemoteMatchRequest {
    q: String,
    system: Option<String>,
    part: Option<String>,
    vehicletype: Option<String>,
    fault_code: Option<String>,
    #[serde(default = "default_size")]
    size: usize,
    #[serde(default = "default_true")]
    use_decision: bool,
    #[serde(default = "default_true")]
    use_semantic: bool,
    semantic_weight: Option<f64>,
    #[serde(default = "default_topk")]
    vector_k: usize,
    #[serde(default)]
    use_llm: bool,
    #[serde(default = "default_llm_topn")]
    llm_topn: usize,
}

fn default_size() -> usize {
    10
}
fn default_llm_topn() -> usize {
    5
}

/// Remote-only retrieval with optional routing and LLM adjudication.
async fn remote_match(
    State(state): State<AppState>,
    Json(request): Json<RemoteMatchRequest>,
) -> Result<Json<MatchResponse>, (StatusCode, Json<serde_json::Value>)> {
    require_query(&request.q)?;
    let Some(pipeline) = &state.remote else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "remote search is not configured",
                "reason": "remote_unavailable",
            })),
        ));
    };

    let hints = Hints {
        system: request.system.clone(),
        part: request.part.clone(),
        vehicletype: request.vehicletype.clone(),
        faultcode: request.fault_code.clone(),
    };
    let options = RemoteMatchOptions {
        size: request.size,
        use_decision: request.use_decision,
        use_semantic: request.use_semantic,
        semantic_weight: request.semantic_weight,
        vector_k: request.vector_k,
        use_llm: request.use_llm,
        llm_topn: request.llm_topn,
    };

    pipeline
        .matching(&request.q, hints, &options)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "remote match failed");
            error_response(&e)
        })
}

/// Document counts and fusion weight metadata.
async fn remote_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(search) = &state.remote_search else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "remote search is not configured",
                "reason": "remote_unavailable",
            })),
        ));
    };

    let stats = search.stats().await.map_err(|e| {
        error!(error = %e, "remote stats failed");
        error_response(&Error::Remote(e.to_string()))
    })?;

    Ok(Json(json!({
        "index": stats,
        "fusion_weights": state.settings.fusion_weights(),
        "thresholds": {
            "pass": state.settings.pass_threshold,
            "gray_low": state.settings.gray_low_threshold,
        },
    })))
}
