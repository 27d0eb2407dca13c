use crate::config::AppConfig;
use crate::error::AggregateError;
use crate::meteomatics::{Bounds, Coordinates, MeteomaticsClient};
use crate::processing::{self, ChartSeries, Choropleth};
use crate::spatial::BoundarySet;
use crate::types::{RawSeries, YearlyCountryMetric};
use anyhow::Result;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

pub struct AppState {
    pub config: AppConfig,
    pub cases: YearlyCountryMetric,
    pub uv: YearlyCountryMetric,
    pub boundaries: BoundarySet,
    pub meteomatics: MeteomaticsClient,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(anyhow::Error),
}

// Aggregates here only run over loaded or fetched data, never over the
// client's query, so anything but a missing year is an upstream fault.
impl From<AggregateError> for ApiError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::EmptyYear(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Upstream(other.into()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Upstream(e) => {
                error!("Upstream failure: {:#}", e);
                (StatusCode::BAD_GATEWAY, format!("{:#}", e))
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;
type QueryResult<T> = std::result::Result<Query<T>, QueryRejection>;

fn resolve_year(state: &AppState, year: Option<i32>) -> std::result::Result<i32, ApiError> {
    let years = &state.config.years;
    let year = year.unwrap_or(years.default);
    if !years.contains(year) {
        return Err(ApiError::BadRequest(format!(
            "year {} is outside {}..={}",
            year, years.min, years.max
        )));
    }
    Ok(year)
}

#[derive(Serialize)]
pub struct DataResponse {
    data: YearlyCountryMetric,
}

#[derive(Deserialize)]
pub struct YearParams {
    year: Option<i32>,
}

#[derive(Deserialize)]
pub struct ChartParams {
    country: String,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
    year: Option<i32>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    name: String,
    year: i32,
    value: Option<f64>,
    uv: Option<f64>,
    popup: String,
}

#[derive(Deserialize)]
pub struct UvAverageParams {
    year: i32,
    coordinates: String,
}

#[derive(Serialize)]
pub struct UvAverageResponse {
    #[serde(rename = "avgUV")]
    avg_uv: f64,
}

#[derive(Deserialize)]
pub struct UvVisualParams {
    year: i32,
    bounds: String,
}

#[derive(Serialize)]
pub struct UvVisualResponse {
    image: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/skin-cancer", get(skin_cancer_handler))
        .route("/api/avg-uv-by-country", get(avg_uv_handler))
        .route("/api/choropleth", get(choropleth_handler))
        .route("/api/chart", get(chart_handler))
        .route("/api/countries", get(countries_handler))
        .route("/api/query", get(query_handler))
        .route("/api/meteomatics/avg-uv-by-country", get(uv_average_handler))
        .route("/api/meteomatics/uv-visual", get(uv_visual_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: AppState) -> Result<()> {
    let port = state.config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let app = router(Arc::new(state));

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn skin_cancer_handler(State(state): State<Arc<AppState>>) -> Json<DataResponse> {
    Json(DataResponse { data: state.cases.clone() })
}

async fn avg_uv_handler(State(state): State<Arc<AppState>>) -> Json<DataResponse> {
    Json(DataResponse { data: state.uv.clone() })
}

async fn choropleth_handler(
    State(state): State<Arc<AppState>>,
    params: QueryResult<YearParams>,
) -> ApiResult<Choropleth> {
    let Query(params) = params?;
    let year = resolve_year(&state, params.year)?;
    Ok(Json(processing::build_choropleth(
        &state.cases,
        &state.uv,
        year,
        &state.boundaries.boundaries,
        state.config.color.degenerate,
        state.config.color.legend_stops,
    )))
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    params: QueryResult<ChartParams>,
) -> ApiResult<ChartSeries> {
    let Query(params) = params?;
    let known = processing::countries(&state.cases).contains(&params.country)
        || processing::countries(&state.uv).contains(&params.country);
    if !known {
        return Err(ApiError::NotFound(format!("no data for country '{}'", params.country)));
    }
    Ok(Json(processing::chart_series(&state.cases, &state.uv, &params.country)))
}

async fn countries_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    let mut all = processing::countries(&state.cases);
    all.extend(processing::countries(&state.uv));
    Json(all.into_iter().collect())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    params: QueryResult<QueryParams>,
) -> ApiResult<Option<QueryResponse>> {
    let Query(params) = params?;
    let year = resolve_year(&state, params.year)?;

    let hit = state
        .boundaries
        .locate(params.lon, params.lat)
        .and_then(|i| state.boundaries.get(i));

    Ok(Json(hit.map(|boundary| {
        let value = processing::value_for(&state.cases, year, &boundary.name);
        let uv = processing::value_for(&state.uv, year, &boundary.name);
        QueryResponse {
            name: boundary.name.clone(),
            year,
            value,
            uv,
            popup: processing::popup_text(&boundary.name, value, uv),
        }
    })))
}

async fn uv_average_handler(
    State(state): State<Arc<AppState>>,
    params: QueryResult<UvAverageParams>,
) -> ApiResult<UvAverageResponse> {
    let Query(params) = params?;
    let at: Coordinates = params
        .coordinates
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(format!("coordinates: {:#}", e)))?;

    let token = state.meteomatics.token().await.map_err(ApiError::Upstream)?;
    let series = state
        .meteomatics
        .uv_series(&token, at, params.year)
        .await
        .map_err(ApiError::Upstream)?;
    average_response(&series)
}

/// Bad samples in a fetched series are the remote API's fault, not the
/// client's.
fn average_response(series: &RawSeries) -> ApiResult<UvAverageResponse> {
    let avg_uv = processing::average_series(series).map_err(|e| ApiError::Upstream(e.into()))?;
    Ok(Json(UvAverageResponse { avg_uv }))
}

async fn uv_visual_handler(
    State(state): State<Arc<AppState>>,
    params: QueryResult<UvVisualParams>,
) -> ApiResult<UvVisualResponse> {
    let Query(params) = params?;
    let bounds: Bounds = params
        .bounds
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(format!("bounds: {:#}", e)))?;

    let token = state.meteomatics.token().await.map_err(ApiError::Upstream)?;
    let image = state
        .meteomatics
        .uv_overlay(&token, bounds, params.year)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(UvVisualResponse { image }))
}
