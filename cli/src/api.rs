//! Read-only query API plus start/stop control of one server-owned indexer.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /api/transfers/:address?limit&offset`
//! - `GET  /api/transfers?limit&offset`
//! - `GET  /api/status`
//! - `POST /api/indexer/start`
//! - `POST /api/indexer/stop`

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use transferindex_core::error::IndexerError;
use transferindex_core::ledger::Ledger;
use transferindex_core::query::{validate_address, PageRequest, Pagination};
use transferindex_core::types::StoredTransfer;
use transferindex_evm::Indexer;

/// Builds a fresh indexer (with its own ledger handle) on `POST /api/indexer/start`.
pub type IndexerFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Indexer, IndexerError>> + Send + Sync>;

pub struct ApiState {
    ledger: Arc<dyn Ledger>,
    token_address: String,
    factory: IndexerFactory,
    indexer: Mutex<Option<Arc<Indexer>>>,
}

impl ApiState {
    pub fn new(ledger: Arc<dyn Ledger>, token_address: impl Into<String>, factory: IndexerFactory) -> Self {
        Self {
            ledger,
            token_address: token_address.into().to_ascii_lowercase(),
            factory,
            indexer: Mutex::new(None),
        }
    }

    /// Build and start a new indexer unless one is already running.
    pub async fn start(&self) -> Result<(), ApiError> {
        let indexer = {
            let mut slot = self.indexer.lock().await;
            if slot.is_some() {
                return Err(ApiError::bad_request("Indexer is already running"));
            }
            let indexer = match (self.factory)().await {
                Ok(indexer) => Arc::new(indexer),
                Err(e) => {
                    error!(error = %e, "failed to build indexer");
                    return Err(ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to start indexer",
                    ));
                }
            };
            *slot = Some(Arc::clone(&indexer));
            indexer
        };

        if let Err(e) = indexer.start().await {
            self.indexer.lock().await.take();
            error!(error = %e, "failed to start indexer");
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to start indexer",
            ));
        }
        info!("indexer started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ApiError> {
        let Some(indexer) = self.indexer.lock().await.take() else {
            return Err(ApiError::bad_request("Indexer is not running"));
        };
        if let Err(e) = indexer.stop().await {
            error!(error = %e, "failed to stop indexer");
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to stop indexer",
            ));
        }
        info!("indexer stopped");
        Ok(())
    }

    /// Stop the server-owned indexer, if any.
    pub async fn shutdown(&self) {
        if let Some(indexer) = self.indexer.lock().await.take() {
            if let Err(e) = indexer.stop().await {
                error!(error = %e, "failed to stop indexer");
            }
        }
    }
}

/// Create the API router with all endpoints.
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/transfers", get(list_transfers))
        .route("/api/transfers/:address", get(transfers_by_address))
        .route("/api/status", get(status))
        .route("/api/indexer/start", post(start_indexer))
        .route("/api/indexer/stop", post(stop_indexer))
        .fallback(not_found)
        .with_state(state)
}

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PageParams {
    limit: Option<u64>,
    offset: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TransferPage {
    data: Vec<StoredTransfer>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    last_indexed_block: u64,
    scanned_through: Option<u64>,
    token_address: String,
    indexer_running: bool,
    indexer_state: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!(error = %err, "{context}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn page_request(params: Result<Query<PageParams>, QueryRejection>) -> Result<PageRequest, ApiError> {
    let Query(params) = params.map_err(|e| {
        ApiError::bad_request(format!("Invalid query parameters: {}", e.body_text()))
    })?;
    PageRequest::new(params.limit, params.offset).map_err(|e| ApiError::bad_request(e.to_string()))
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn transfers_by_address(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<TransferPage>, ApiError> {
    validate_address(&address).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let page = page_request(params)?;

    let data = state
        .ledger
        .query_by_address(&address, page.limit, page.offset)
        .await
        .map_err(|e| ApiError::internal("failed to fetch transfers", e))?;
    let total = state
        .ledger
        .count_by_address(&address)
        .await
        .map_err(|e| ApiError::internal("failed to count transfers", e))?;

    Ok(Json(TransferPage {
        data,
        pagination: Pagination::new(total, page),
    }))
}

async fn list_transfers(
    State(state): State<Arc<ApiState>>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<TransferPage>, ApiError> {
    let page = page_request(params)?;

    let data = state
        .ledger
        .query_all(page.limit, page.offset)
        .await
        .map_err(|e| ApiError::internal("failed to fetch transfers", e))?;
    let total = state
        .ledger
        .count_all()
        .await
        .map_err(|e| ApiError::internal("failed to count transfers", e))?;

    Ok(Json(TransferPage {
        data,
        pagination: Pagination::new(total, page),
    }))
}

async fn status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusResponse>, ApiError> {
    let last_indexed_block = state
        .ledger
        .high_water_mark()
        .await
        .map_err(|e| ApiError::internal("failed to read high-water mark", e))?;
    let scanned_through = state
        .ledger
        .load_checkpoint(&state.token_address)
        .await
        .map_err(|e| ApiError::internal("failed to read checkpoint", e))?
        .and_then(|cp| cp.scanned_through());

    let indexer_state = state.indexer.lock().await.as_ref().map(|i| i.state());

    Ok(Json(StatusResponse {
        last_indexed_block,
        scanned_through,
        token_address: state.token_address.clone(),
        indexer_running: indexer_state.map(|s| s.is_running()).unwrap_or(false),
        indexer_state: indexer_state.map(|s| s.to_string()),
    }))
}

async fn start_indexer(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.start().await?;
    Ok(Json(json!({ "message": "Indexer started successfully" })))
}

async fn stop_indexer(State(state): State<Arc<ApiState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.stop().await?;
    Ok(Json(json!({ "message": "Indexer stopped successfully" })))
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::FutureExt;
    use tower::ServiceExt;

    use transferindex_core::config::IndexerConfig;
    use transferindex_core::ledger::LedgerStore;
    use transferindex_core::types::Transfer;
    use transferindex_evm::MockLogSource;
    use transferindex_storage::InMemoryLedger;

    const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    fn transfer(block: u64, from: &str, to: &str) -> Transfer {
        Transfer {
            transaction_hash: format!("0x{block:064x}"),
            block_number: block,
            block_timestamp: 1_700_000_000,
            from: from.into(),
            to: to.into(),
            value: "1".into(),
            token_address: TOKEN.into(),
            log_index: 0,
            transaction_index: 0,
        }
    }

    fn mock_factory() -> IndexerFactory {
        Arc::new(|| {
            async {
                let config = IndexerConfig {
                    token_address: TOKEN.into(),
                    batch_delay_ms: 0,
                    ..Default::default()
                };
                Ok(Indexer::new(
                    config,
                    Arc::new(MockLogSource::new()),
                    Arc::new(InMemoryLedger::new()),
                ))
            }
            .boxed()
        })
    }

    async fn app_with(transfers: &[Transfer]) -> (Router, Arc<ApiState>) {
        let ledger = Arc::new(InMemoryLedger::new());
        for t in transfers {
            ledger.insert(t).await.unwrap();
        }
        let state = Arc::new(ApiState::new(ledger, TOKEN, mock_factory()));
        (create_api_router(Arc::clone(&state)), state)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app_with(&[]).await;
        let (status, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn transfers_by_address_paginates() {
        let rows: Vec<_> = (1..=25).map(|b| transfer(b, ALICE, BOB)).collect();
        let (app, _) = app_with(&rows).await;

        let (status, body) = call(
            &app,
            "GET",
            "/api/transfers/0x2222222222222222222222222222222222222222?limit=10&offset=20",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 5);
        assert_eq!(body["pagination"]["total"], 25);
        assert_eq!(body["pagination"]["hasMore"], false);
        assert_eq!(body["data"][0]["blockNumber"], 5);
        assert_eq!(body["data"][0]["transactionHash"], format!("0x{:064x}", 5));

        let (_, body) = call(&app, "GET", &format!("/api/transfers/{ALICE}?limit=10&offset=10")).await;
        assert_eq!(body["pagination"]["hasMore"], true);
        assert_eq!(body["pagination"]["limit"], 10);
    }

    #[tokio::test]
    async fn mixed_case_address_is_accepted() {
        let (app, _) = app_with(&[transfer(1, ALICE, "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd")]).await;
        let (status, body) =
            call(&app, "GET", "/api/transfers/0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["pagination"]["limit"], 100);
    }

    #[tokio::test]
    async fn rejects_bad_address_and_large_limit() {
        let (app, _) = app_with(&[]).await;

        let (status, body) = call(&app, "GET", "/api/transfers/0x1234").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid Ethereum address format");

        let (status, body) = call(&app, "GET", &format!("/api/transfers/{ALICE}?limit=1001")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Limit cannot exceed 1000");

        let (status, _) = call(&app, "GET", "/api/transfers?limit=5000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_numeric_paging_is_a_json_400() {
        let (app, _) = app_with(&[]).await;

        let (status, body) = call(&app, "GET", "/api/transfers?limit=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid query parameters"));

        let (status, body) = call(&app, "GET", &format!("/api/transfers/{ALICE}?offset=-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn list_all_transfers() {
        let (app, _) = app_with(&[transfer(3, ALICE, BOB), transfer(7, BOB, ALICE)]).await;
        let (status, body) = call(&app, "GET", "/api/transfers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["blockNumber"], 7);
        assert_eq!(body["pagination"]["total"], 2);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (app, _) = app_with(&[]).await;
        let (status, body) = call(&app, "GET", "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let (app, state) = app_with(&[transfer(42, ALICE, BOB)]).await;

        let (_, body) = call(&app, "GET", "/api/status").await;
        assert_eq!(body["lastIndexedBlock"], 42);
        assert_eq!(body["indexerRunning"], false);
        assert_eq!(body["tokenAddress"], TOKEN);

        let (status, _) = call(&app, "POST", "/api/indexer/stop").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "POST", "/api/indexer/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Indexer started successfully");

        let (status, body) = call(&app, "POST", "/api/indexer/start").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Indexer is already running");

        let (_, body) = call(&app, "GET", "/api/status").await;
        assert_eq!(body["indexerRunning"], true);
        assert_eq!(body["indexerState"], "live");

        let (status, _) = call(&app, "POST", "/api/indexer/stop").await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/api/status").await;
        assert_eq!(body["indexerRunning"], false);

        state.shutdown().await;
    }
}
