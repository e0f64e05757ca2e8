//! REST API Handlers
//!
//! Implements the REST API endpoints for primary storage lifecycle, capacity
//! reports and capacity queries.

use crate::capacity::{CapacityReport, CapacityReportSender};
use crate::controlplane::capacity_query::CapacityQuery;
use crate::controlplane::orchestrator::{PrimaryStorageFilter, PrimaryStorageService};
use crate::domain::model::{CreatePrimaryStorageRequest, StorageId, StorageTypeId};
use crate::error::Error;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Authorization scheme carrying the session id
const SESSION_SCHEME: &str = "OAuth";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query string of the list endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPrimaryStorageParams {
    /// Comma separated storage uuids
    #[serde(default)]
    pub uuids: Option<String>,
    #[serde(default)]
    pub zone_uuid: Option<String>,
    #[serde(default, rename = "type")]
    pub storage_type: Option<String>,
}

/// Query string of the capacity endpoint; list values are comma separated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityQueryParams {
    #[serde(default)]
    pub zone_uuids: Option<String>,
    #[serde(default)]
    pub cluster_uuids: Option<String>,
    #[serde(default)]
    pub primary_storage_uuids: Option<String>,
    #[serde(default)]
    pub all: Option<bool>,
    #[serde(default)]
    pub system_tags: Option<String>,
    #[serde(default)]
    pub user_tags: Option<String>,
}

impl CapacityQueryParams {
    fn into_query(self, session_id: Option<String>) -> CapacityQuery {
        CapacityQuery {
            zone_uuids: split_list(self.zone_uuids.as_deref()),
            cluster_uuids: split_list(self.cluster_uuids.as_deref()),
            primary_storage_uuids: split_list(self.primary_storage_uuids.as_deref())
                .into_iter()
                .map(StorageId::new)
                .collect(),
            all: self.all.unwrap_or(false),
            system_tags: split_list(self.system_tags.as_deref()),
            user_tags: split_list(self.user_tags.as_deref()),
            session_id,
        }
    }
}

/// Accepted capacity report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAcceptedResponse {
    pub status: String,
    pub storage_type: String,
    pub cluster_name: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<PrimaryStorageService>,
    reports: CapacityReportSender,
}

impl RestRouter {
    pub fn new(service: Arc<PrimaryStorageService>, reports: CapacityReportSender) -> Self {
        Self { service, reports }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
            reports: self.reports,
        };

        Router::new()
            // Primary storage endpoints
            .route(
                "/v1/primary-storage",
                post(create_primary_storage).get(list_primary_storage),
            )
            .route(
                "/v1/primary-storage/:uuid",
                get(get_primary_storage).delete(delete_primary_storage),
            )
            .route(
                "/v1/primary-storage/:uuid/clusters/:cluster_uuid",
                post(attach_cluster),
            )
            .route(
                "/v1/primary-storage/:uuid/backup-storage",
                get(find_backup_storage),
            )
            // Capacity endpoints
            .route("/v1/capacities/primary-storage", get(get_capacity))
            .route("/v1/capacity-reports", post(report_capacity))
            // Status endpoints
            .route("/v1/status", get(status))
            .route("/health", get(health_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<PrimaryStorageService>,
    reports: CapacityReportSender,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::UnknownStorageType { .. } | Error::JsonParse(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::SessionRequired | Error::SessionInvalid => StatusCode::UNAUTHORIZED,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::PersistenceConflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        debug!(error = %err, "Request rejected");
    }
    let code = err.to_error_code();
    (
        status,
        Json(ApiErrorResponse {
            error: code.code,
            message: code.description,
            details: code.details,
        }),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Create primary storage
async fn create_primary_storage(
    State(state): State<AppState>,
    Json(request): Json<CreatePrimaryStorageRequest>,
) -> Response {
    info!(
        name = %request.name,
        storage_type = %request.storage_type,
        "Creating primary storage via API"
    );

    match state.service.create(request).await {
        Ok(inventory) => (StatusCode::CREATED, Json(inventory)).into_response(),
        Err(e) => error_response(e),
    }
}

/// List primary storage
async fn list_primary_storage(
    State(state): State<AppState>,
    Query(params): Query<ListPrimaryStorageParams>,
) -> Response {
    let filter = PrimaryStorageFilter {
        uuids: split_list(params.uuids.as_deref())
            .into_iter()
            .map(StorageId::new)
            .collect(),
        zone_uuid: params.zone_uuid,
        storage_type: params.storage_type.map(StorageTypeId::new),
    };

    match state.service.list(&filter).await {
        Ok(inventories) => (StatusCode::OK, Json(inventories)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Get primary storage inventory
async fn get_primary_storage(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    match state.service.get_inventory(&StorageId::new(uuid)).await {
        Ok(inventory) => (StatusCode::OK, Json(inventory)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Delete primary storage
async fn delete_primary_storage(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Response {
    match state.service.delete(&StorageId::new(uuid)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Attach primary storage to a cluster
async fn attach_cluster(
    State(state): State<AppState>,
    Path((uuid, cluster_uuid)): Path<(String, String)>,
) -> Response {
    match state
        .service
        .attach_cluster(&StorageId::new(uuid), &cluster_uuid)
        .await
    {
        Ok(inventory) => (StatusCode::OK, Json(inventory)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Backup storages usable by a primary storage
async fn find_backup_storage(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    match state.service.find_backup_storage(&StorageId::new(uuid)).await {
        Ok(uuids) => (StatusCode::OK, Json(uuids)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Aggregated capacity
async fn get_capacity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CapacityQueryParams>,
) -> Response {
    let query = params.into_query(session_from_headers(&headers));
    match state.service.capacity(&query).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Enqueue a capacity report
async fn report_capacity(
    State(state): State<AppState>,
    Json(report): Json<CapacityReport>,
) -> Response {
    if report.cluster_name.trim().is_empty() {
        return error_response(Error::Validation("clusterName is required".into()));
    }
    if !state.service.registry().contains(&report.storage_type) {
        return error_response(Error::unknown_type(report.storage_type.as_str()));
    }

    let accepted = ReportAcceptedResponse {
        status: "accepted".into(),
        storage_type: report.storage_type.to_string(),
        cluster_name: report.cluster_name.clone(),
    };
    match state.reports.send(report).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Service status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.service.status().await))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Split a comma separated query value, dropping empty items
fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Session id from `Authorization: OAuth <session>`
fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, session) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(SESSION_SCHEME) {
        return None;
    }
    let session = session.trim();
    (!session.is_empty()).then(|| session.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{CapacityIntake, CapacityUpdaterConfig};
    use crate::controlplane::capacity_query::SessionPolicy;
    use crate::controlplane::providers::{ProviderFactory, ProvidersConfig, CLUSTER_BLOCK_TYPE};
    use crate::registry::StorageTypeRegistry;
    use crate::store::Persistence;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn router() -> (Router, Arc<PrimaryStorageService>) {
        let persistence = Persistence::in_memory();
        let mut builder = StorageTypeRegistry::builder();
        ProviderFactory::register_builtin(&mut builder, &ProvidersConfig::default(), &persistence)
            .unwrap();
        let service = PrimaryStorageService::new(
            builder.build(),
            persistence,
            CapacityUpdaterConfig::default(),
            SessionPolicy::tokens(["session-1"]),
        );
        let (reports, _worker) =
            CapacityIntake::spawn(service.clone(), 16, CancellationToken::new());
        (RestRouter::new(service.clone(), reports).build(), service)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn create_body(uuid: &str) -> Value {
        json!({
            "resourceUuid": uuid,
            "name": "block",
            "zoneUuid": "zone-1",
            "type": CLUSTER_BLOCK_TYPE,
            "clusterName": "c1"
        })
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_session_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_from_headers(&headers), None);

        headers.insert(AUTHORIZATION, "OAuth session-1".parse().unwrap());
        assert_eq!(session_from_headers(&headers), Some("session-1".to_string()));

        headers.insert(AUTHORIZATION, "Bearer session-1".parse().unwrap());
        assert_eq!(session_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (app, _) = router();

        let response = app
            .clone()
            .oneshot(post_json("/v1/primary-storage", create_body("ps-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["uuid"], "ps-1");
        assert_eq!(created["pools"]["rootVolumePool"], "pri-v-r-ps-1");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/primary-storage/ps-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/v1/primary-storage", create_body("ps-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (app, _) = router();

        let unknown = json!({"name": "x", "zoneUuid": "zone-1", "type": "Ceph"});
        let response = app
            .clone()
            .oneshot(post_json("/v1/primary-storage", unknown))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "PS.1000");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/primary-storage/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_capacity_requires_session() {
        let (app, _) = router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/capacities/primary-storage?all=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/capacities/primary-storage?all=true")
                    .header("authorization", "OAuth session-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["matched"], 0);
    }

    #[tokio::test]
    async fn test_capacity_report_roundtrip() {
        let (app, service) = router();
        service
            .create(
                CreatePrimaryStorageRequest::new("block", "zone-1", CLUSTER_BLOCK_TYPE)
                    .with_resource_uuid("ps-1")
                    .with_cluster_name("c1"),
            )
            .await
            .unwrap();

        let report = json!({
            "type": CLUSTER_BLOCK_TYPE,
            "clusterName": "c1",
            "totalBytes": 100,
            "availableBytes": 80
        });
        let response = app
            .clone()
            .oneshot(post_json("/v1/capacity-reports", report))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The intake worker applies the report asynchronously
        let id = StorageId::new("ps-1");
        let mut total = 0;
        for _ in 0..100 {
            total = service.get_inventory(&id).await.unwrap().total_capacity;
            if total == 100 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(total, 100);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/capacities/primary-storage?primaryStorageUuids=ps-1")
                    .header("authorization", "OAuth session-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["availableCapacity"], 80);
    }

    #[tokio::test]
    async fn test_report_for_unknown_type_rejected() {
        let (app, _) = router();
        let report = json!({
            "type": "Ceph",
            "clusterName": "c1",
            "totalBytes": 1,
            "availableBytes": 1
        });
        let response = app
            .oneshot(post_json("/v1/capacity-reports", report))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
