//! HTTP API for profiles, the active mesh and compensation requests

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bed_mesh::BedMesh;
use crate::compensation::{Outcome, ScanCompensation};
use crate::console::{ConsoleLog, ConsoleMessage};
use crate::error::CompensationError;
use crate::profile::PROFILE_VERSION;

/// Shared application state
pub struct AppState {
    /// Compensation command handler with the loaded profiles
    compensation: ScanCompensation,
    /// Owner of the active mesh. Held for the whole of a compensation pass.
    bed_mesh: Mutex<BedMesh>,
    /// Operator console history
    console: Mutex<ConsoleLog>,
}

impl AppState {
    pub fn new(compensation: ScanCompensation, bed_mesh: BedMesh, console: ConsoleLog) -> Self {
        Self {
            compensation,
            bed_mesh: Mutex::new(bed_mesh),
            console: Mutex::new(console),
        }
    }

    /// Run one compensation request with the active mesh locked
    pub fn apply(&self, profile: Option<&str>) -> Result<Outcome, CompensationError> {
        let mut bed_mesh = self.bed_mesh.lock();
        let mut console = self.console.lock();
        self.compensation.cmd_apply(profile, &mut *bed_mesh, &mut *console)
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/profiles", get(get_profiles))
        .route("/api/profiles/:name", get(get_profile))
        .route("/api/mesh", get(get_mesh))
        .route("/api/compensate", post(compensate))
        .route("/api/console", get(get_console))
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Stored profile names
#[derive(Serialize)]
struct ProfilesResponse {
    current_version: i64,
    default_reference: String,
    profiles: Vec<String>,
    incompatible: Vec<String>,
}

async fn get_profiles(State(state): State<Arc<AppState>>) -> Json<ProfilesResponse> {
    let profiles = state.compensation.profiles();

    Json(ProfilesResponse {
        current_version: PROFILE_VERSION,
        default_reference: state.compensation.default_reference().to_string(),
        profiles: profiles.get_profiles().keys().cloned().collect(),
        incompatible: profiles.incompatible_profiles().to_vec(),
    })
}

/// Stored profile as loaded at startup. Profiles rewritten by compensation
/// show up in `/api/mesh` but not here until the service restarts.
async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.compensation.profiles().get_profile(&name) {
        Some(profile) => Json(profile.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Profile {} not found", name)),
    }
}

/// Get the active mesh
async fn get_mesh(State(state): State<Arc<AppState>>) -> Response {
    match state.bed_mesh.lock().status() {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No active mesh".to_string()),
    }
}

/// Compensation request, `profile` defaults to the configured reference
#[derive(Deserialize)]
struct CompensateRequest {
    #[serde(default)]
    profile: Option<String>,
}

#[derive(Serialize)]
struct CompensateResponse {
    #[serde(flatten)]
    outcome: Outcome,
    message: String,
}

async fn compensate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompensateRequest>,
) -> Response {
    match state.apply(req.profile.as_deref()) {
        Ok(outcome) => {
            let message = outcome.message();
            Json(CompensateResponse { outcome, message }).into_response()
        }
        Err(e) => {
            tracing::warn!("Compensation request rejected: {}", e);
            error_response(error_status(&e), e.to_string())
        }
    }
}

fn error_status(err: &CompensationError) -> StatusCode {
    match err {
        CompensationError::InvalidArgument => StatusCode::BAD_REQUEST,
        CompensationError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        CompensationError::ProfileLoad { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

async fn get_console(State(state): State<Arc<AppState>>) -> Json<Vec<ConsoleMessage>> {
    Json(state.console.lock().messages().cloned().collect())
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    active_profile: Option<String>,
    profile_count: usize,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let active_profile = state.bed_mesh.lock().status().map(|s| s.profile_name);

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_profile,
        profile_count: state.compensation.profiles().get_profiles().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileStore, DEFAULT_PREFIX};
    use crate::storage::SectionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const STORED: &str = r#"
["bed_mesh Contact"]
version = 1
points = "1.0, 1.0\n1.0, 1.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 2
y_count = 2
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2

["bed_mesh default"]
version = 1
points = "5.0, 5.0, 5.0\n5.0, 5.0, 5.0\n5.0, 5.0, 5.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 3
y_count = 3
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2

["bed_mesh Broken"]
version = 1
points = "1.0, 1.0\n1.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 2
y_count = 2
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2

["bed_mesh ancient"]
version = 0
"#;

    fn state() -> Arc<AppState> {
        // No path, so saves stay in memory
        let storage = SectionStore::parse(STORED).unwrap();
        let profiles = Arc::new(ProfileStore::load(&storage, DEFAULT_PREFIX).unwrap());
        let mut bed_mesh = BedMesh::new(storage, DEFAULT_PREFIX);
        bed_mesh.load_profile(&profiles, "default").unwrap();

        Arc::new(AppState::new(
            ScanCompensation::new(profiles, "Contact"),
            bed_mesh,
            ConsoleLog::new(10),
        ))
    }

    async fn post_compensate(
        state: Arc<AppState>,
        body: &'static str,
    ) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/compensate")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_compensate_default_reference() {
        let state = state();
        let (status, body) = post_compensate(state.clone(), "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "compensated");
        assert_eq!(body["profile"], "default");
        assert_eq!(body["reference"], "Contact");

        let mesh = state.bed_mesh.lock().status().unwrap();
        assert_eq!(mesh.probed_matrix, vec![vec![1.0; 3]; 3]);
        assert_eq!(state.console.lock().messages().count(), 1);
    }

    #[tokio::test]
    async fn test_compensate_error_statuses() {
        let (status, body) = post_compensate(state(), r#"{"profile": "  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Value for parameter 'PROFILE' must be specified");

        let (status, _) = post_compensate(state(), r#"{"profile": "DoesNotExist"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = post_compensate(state(), r#"{"profile": "Broken"}"#).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("Broken"));
    }

    #[tokio::test]
    async fn test_list_profiles() {
        let response = router(state())
            .oneshot(Request::builder().uri("/api/profiles").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["profiles"], serde_json::json!(["Broken", "Contact", "default"]));
        assert_eq!(body["incompatible"], serde_json::json!(["ancient"]));
    }

    #[tokio::test]
    async fn test_missing_mesh_is_not_found() {
        let state = state();
        state.bed_mesh.lock().clear_mesh();

        let response = router(state)
            .oneshot(Request::builder().uri("/api/mesh").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
