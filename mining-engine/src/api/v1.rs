//! API version 1 endpoints.

use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiError;
use crate::{
    assumptions::{self, AssumptionsView},
    calc::{self, CalculationRequest, CalculationResult},
    catalog::{Catalog, MinerSpec, Preset},
    live::LiveDataAggregator,
    tracing::prelude::*,
};

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Live data aggregator, owner of the live data cache
    pub live: Arc<LiveDataAggregator>,
    /// Miner and preset records
    pub catalog: Catalog,
}

impl AppState {
    pub fn new(live: Arc<LiveDataAggregator>) -> Self {
        Self {
            live,
            catalog: Catalog::builtin(),
        }
    }
}

/// Query string of `GET /v1/assumptions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssumptionsQuery {
    pub version: Option<String>,
}

/// Published assumptions versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub current: String,
    pub versions: Vec<String>,
}

async fn list_presets(State(state): State<AppState>) -> Json<&'static [Preset]> {
    Json(state.catalog.presets())
}

async fn list_miners(State(state): State<AppState>) -> Json<&'static [MinerSpec]> {
    Json(state.catalog.miners())
}

/// Assumptions for `?version=`, or the current version.
///
/// # Example
/// ```bash
/// curl 'http://localhost:8000/v1/assumptions?version=2024.04.0'
/// ```
async fn get_assumptions(
    Query(query): Query<AssumptionsQuery>,
) -> Result<Json<AssumptionsView<'static>>, ApiError> {
    let assumptions = assumptions::get_assumptions(query.version.as_deref())?;
    Ok(Json(AssumptionsView::from(assumptions)))
}

async fn list_versions() -> Json<VersionsResponse> {
    Json(VersionsResponse {
        current: assumptions::current().assumptions_version.to_string(),
        versions: assumptions::versions()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

/// Run a calculation.
///
/// # Example
/// ```bash
/// curl -X POST http://localhost:8000/v1/calculate \
///    -H "Content-Type: application/json" \
///    -d '{"miners_count": 1, "miner_id": "antminer_s21_200th_air", ...}'
/// ```
async fn calculate(
    State(state): State<AppState>,
    payload: Result<Json<CalculationRequest>, JsonRejection>,
) -> Result<Json<CalculationResult>, ApiError> {
    let Json(request) = payload?;
    let assumptions = assumptions::get_assumptions(request.assumptions_version.as_deref())?;
    let result = calc::calculate(&request, assumptions, &state.catalog)?;
    debug!(
        miners = request.miners_count,
        version = assumptions.assumptions_version,
        "Calculated"
    );
    Ok(Json(result))
}

/// Current live network and market data.
///
/// Partially degraded data is still a 200; only a cold-start total outage
/// fails.
async fn live(State(state): State<AppState>) -> Result<Response, ApiError> {
    let payload = state.live.get_live_data().await?;
    Ok(Json(payload.as_ref()).into_response())
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/presets", get(list_presets))
        .route("/miners", get(list_miners))
        .route("/assumptions", get(get_assumptions))
        .route("/assumptions/versions", get(list_versions))
        .route("/calculate", post(calculate))
        .route("/live", get(live))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::LiveConfig, testing::FakeUpstream, upstream::Resource};
    use axum::http::StatusCode;

    fn state(upstream: Arc<FakeUpstream>) -> AppState {
        AppState::new(Arc::new(LiveDataAggregator::new(
            upstream,
            LiveConfig::default(),
        )))
    }

    fn home_request() -> CalculationRequest {
        Catalog::builtin()
            .preset("home_miner")
            .unwrap()
            .to_request()
    }

    #[tokio::test]
    async fn test_calculate_preset() {
        let state = state(Arc::new(FakeUpstream::new()));
        let Json(result) = calculate(State(state), Ok(Json(home_request())))
            .await
            .unwrap();
        assert_eq!(
            result.assumptions_version,
            assumptions::current().assumptions_version
        );
        assert_eq!(
            result.daily_profit_eur,
            result.daily_revenue_eur - result.daily_cost_eur
        );
    }

    #[tokio::test]
    async fn test_calculate_validation_error() {
        let state = state(Arc::new(FakeUpstream::new()));
        let mut request = home_request();
        request.uptime = 1.5;
        let err = calculate(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.body.field.as_deref(), Some("uptime"));
    }

    #[tokio::test]
    async fn test_calculate_unknown_version() {
        let state = state(Arc::new(FakeUpstream::new()));
        let mut request = home_request();
        request.assumptions_version = Some("1999.01.0".into());
        let err = calculate(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_assumptions_by_version() {
        let Json(view) = get_assumptions(Query(AssumptionsQuery {
            version: Some("2024.04.0".into()),
        }))
        .await
        .unwrap();
        assert_eq!(view.assumptions.assumptions_version, "2024.04.0");

        let err = get_assumptions(Query(AssumptionsQuery {
            version: Some("nope".into()),
        }))
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_versions_lists_current() {
        let Json(versions) = list_versions().await;
        assert!(versions.versions.contains(&versions.current));
    }

    #[tokio::test]
    async fn test_live_cold_outage_is_503() {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.fail_all();
        let Err(err) = live(State(state(upstream))).await else {
            panic!("expected cold outage to fail");
        };
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.body.error.contains("simulated"));
    }

    #[tokio::test]
    async fn test_live_partial_is_200() {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.fail(Resource::RecommendedFees);
        let response = live(State(state(upstream))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
