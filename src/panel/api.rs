use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::ws::{WsMessage, broadcast_message};
use crate::catalog::CommandCategory;
use crate::errors::{CatalogError, PanelError, SupervisorError, WorkspaceError};
use crate::orchestrator::{LaunchOutcome, PanelContext, ServerStatus, drive};
use crate::reports::{self, ReportInfo};
use crate::workspace::{CloneOutcome, CloneRequest, TargetKind};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub ctx: Arc<PanelContext>,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Deserialize)]
pub struct UseCaseRequest {
    pub title: String,
    pub description: String,
}

#[derive(Deserialize)]
pub struct RunRequest {
    pub target: String,
    pub command: String,
}

#[derive(Serialize)]
pub struct TargetView {
    pub name: String,
    pub kind: TargetKind,
    pub port: Option<u16>,
    pub reports: Vec<ReportInfo>,
}

#[derive(Serialize)]
pub struct CatalogEntryView {
    pub name: String,
    pub category: CommandCategory,
    pub output_file: Option<String>,
}

#[derive(Serialize)]
pub struct DocsView {
    pub port: Option<u16>,
    pub server: Option<ServerStatus>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        let msg = err.to_string();
        match err {
            PanelError::Session(_) => ApiError::Conflict(msg),
            PanelError::Catalog(CatalogError::UnknownCommand(_)) => ApiError::NotFound(msg),
            PanelError::Workspace(e) => e.into(),
            PanelError::Supervisor(SupervisorError::MissingArtifacts { .. }) => {
                ApiError::NotFound(msg)
            }
            _ => ApiError::Internal(msg),
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        let msg = err.to_string();
        match err {
            WorkspaceError::TargetNotFound(_) | WorkspaceError::ReportNotAllowed(_) => {
                ApiError::NotFound(msg)
            }
            WorkspaceError::InvalidName(_) | WorkspaceError::InvalidSource(_) => {
                ApiError::BadRequest(msg)
            }
            WorkspaceError::UseCaseExists(_) => ApiError::Conflict(msg),
            WorkspaceError::CloneFailed(_) | WorkspaceError::Io { .. } => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/targets", get(list_targets))
        .route("/api/targets/clone", post(clone_target))
        .route("/api/targets/use-case", post(create_use_case))
        .route("/api/targets/{name}/reports", get(list_reports))
        .route("/api/targets/{name}/reports/{file}", get(get_report))
        .route("/api/targets/{name}/risk", get(get_risk))
        .route("/api/catalog", get(get_catalog))
        .route("/api/runs", post(start_run))
        .route("/api/session", get(get_session))
        .route("/api/docs", get(docs_overview))
        .route("/api/docs/{name}", get(docs_status))
        .route("/api/docs/{name}/restart", post(restart_docs))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_targets(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let targets = state.ctx.workspace().targets()?;
    let mut views = Vec::with_capacity(targets.len());
    for target in targets {
        // Ports are handed out as targets are first listed.
        let port = state.ctx.port_for(&target.path).ok();
        views.push(TargetView {
            reports: reports::available_reports(&target),
            name: target.name,
            kind: target.kind,
            port,
        });
    }
    Ok(Json(views))
}

async fn clone_target(
    State(state): State<SharedState>,
    Json(req): Json<CloneRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.ctx.workspace().clone_repository(&req).await?;
    match outcome {
        CloneOutcome::Cloned(target) => {
            broadcast_message(&state.ws_tx, &WsMessage::TargetAdded { target: target.clone() });
            Ok((StatusCode::CREATED, Json(target)))
        }
        CloneOutcome::AlreadyPresent(target) => Ok((StatusCode::OK, Json(target))),
    }
}

async fn create_use_case(
    State(state): State<SharedState>,
    Json(req): Json<UseCaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state
        .ctx
        .workspace()
        .save_use_case(&req.title, &req.description)?;
    broadcast_message(&state.ws_tx, &WsMessage::TargetAdded { target: target.clone() });
    Ok((StatusCode::CREATED, Json(target)))
}

async fn list_reports(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.ctx.workspace().target(&name)?;
    Ok(Json(reports::available_reports(&target)))
}

async fn get_report(
    State(state): State<SharedState>,
    Path((name, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.ctx.workspace().target(&name)?;
    if reports::label_for(&file).is_some() && !target.path.join(&file).is_file() {
        return Err(ApiError::NotFound(format!("Report '{}' not generated yet", file)));
    }
    Ok(Json(reports::load_report(&target, &file)?))
}

async fn get_risk(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let target = state.ctx.workspace().target(&name)?;
    match state.ctx.workspace().risk_graph(&target)? {
        Some(svg) => Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()),
        None => Err(ApiError::NotFound(format!("No risk graph for '{}'", name))),
    }
}

async fn get_catalog(State(state): State<SharedState>) -> impl IntoResponse {
    let catalog = state.ctx.catalog();
    let entries: Vec<CatalogEntryView> = catalog
        .entries()
        .iter()
        .map(|e| CatalogEntryView {
            name: e.name.clone(),
            category: e.category(),
            output_file: e.output_file.clone(),
        })
        .collect();
    Json(entries)
}

async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.ctx.launch(&req.target, &req.command).await?;
    let status = match &outcome {
        LaunchOutcome::Started { run_id, .. } => {
            broadcast_message(
                &state.ws_tx,
                &WsMessage::RunStarted {
                    run_id: *run_id,
                    command: req.command.clone(),
                    target: req.target.clone(),
                },
            );
            spawn_driver(Arc::clone(&state));
            StatusCode::ACCEPTED
        }
        LaunchOutcome::AlreadySatisfied { .. } => StatusCode::OK,
        LaunchOutcome::DocsRestarted(server) => {
            broadcast_message(&state.ws_tx, &WsMessage::DocsStarted { server: server.clone() });
            StatusCode::OK
        }
    };
    Ok((status, Json(outcome)))
}

/// Follow the run in the background, pushing its progress to WebSocket clients.
fn spawn_driver(state: SharedState) {
    tokio::spawn(async move {
        let tx = state.ws_tx.clone();
        let completion = drive(&state.ctx, |event| {
            broadcast_message(&tx, &WsMessage::from(event));
        })
        .await;
        tracing::debug!(?completion, "Run driver finished");
    });
}

async fn get_session(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.ctx.session().snapshot();
    Json(snapshot)
}

async fn docs_overview(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.ctx.docs_overview().await)
}

async fn docs_status(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.ctx.workspace().target(&name)?;
    let port = state.ctx.assigned_port(&target.path);
    let server = state.ctx.docs_status(&target).await;
    Ok(Json(DocsView { port, server }))
}

async fn restart_docs(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.ctx.workspace().target(&name)?;
    match state.ctx.restart_docs(&target).await {
        Ok(server) => {
            broadcast_message(&state.ws_tx, &WsMessage::DocsStarted { server: server.clone() });
            Ok(Json(server))
        }
        Err(e) => {
            broadcast_message(
                &state.ws_tx,
                &WsMessage::DocsFailed {
                    target: name,
                    error: e.to_string(),
                },
            );
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PanelConfig, RaToml};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const CATALOG: &str = "\
Overview, echo overview > $REPOSITORY/ra-overview.md, ra-overview.md
Slow, sleep 0.5
Generate Documentation, mkdir -p $REPOSITORY/_ra
";

    fn test_state(dir: &TempDir) -> SharedState {
        std::fs::write(dir.path().join("commands.md"), CATALOG).unwrap();
        std::fs::create_dir_all(dir.path().join("workspace/app")).unwrap();
        let mut toml = RaToml::default();
        toml.docs.release_delay_ms = 0;
        toml.docs.install = vec!["true".into()];
        toml.docs.build = vec!["true".into()];
        toml.docs.serve = vec!["sleep".into(), "30".into()];
        toml.docs.base_port = 19205;
        let ctx = PanelContext::new(PanelConfig::from_toml(dir.path(), toml));
        let (ws_tx, _) = broadcast::channel(64);
        Arc::new(AppState {
            ctx: Arc::new(ctx),
            ws_tx,
        })
    }

    fn test_app(state: &SharedState) -> Router {
        api_router().with_state(Arc::clone(state))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, json: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn wait_idle(state: &SharedState) {
        for _ in 0..500 {
            let snapshot = state.ctx.session().snapshot();
            if snapshot.phase == crate::orchestrator::SessionPhase::Idle && snapshot.run.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never settled");
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = TempDir::new().unwrap();
        let app = test_app(&test_state(&dir));

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_list_targets_assigns_ports() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        std::fs::create_dir_all(dir.path().join("workspace/zed")).unwrap();

        let response = test_app(&state).oneshot(get("/api/targets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let targets: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0]["name"], "app");
        assert_eq!(targets[0]["kind"], "repository");
        assert_eq!(targets[0]["port"], 19205);
        assert_eq!(targets[1]["port"], 19206);

        // Listing again keeps the same ports.
        let response = test_app(&state).oneshot(get("/api/targets")).await.unwrap();
        let targets: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(targets[0]["port"], 19205);
    }

    #[tokio::test]
    async fn test_create_use_case_then_conflict() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let body = serde_json::json!({"title": "Book Flight", "description": "search, pay"});

        let response = test_app(&state)
            .oneshot(post_json("/api/targets/use-case", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let target: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(target["name"], "book-flight");
        assert_eq!(target["kind"], "use_case");

        let response = test_app(&state)
            .oneshot(post_json("/api/targets/use-case", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_clone_existing_directory_returns_ok() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let body = serde_json::json!({"method": "url", "url": "https://example.invalid/app.git"});

        let response = test_app(&state)
            .oneshot(post_json("/api/targets/clone", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let target: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(target["name"], "app");
    }

    #[tokio::test]
    async fn test_catalog_lists_categories() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let response = test_app(&state).oneshot(get("/api/catalog")).await.unwrap();
        let entries: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["output_file"], "ra-overview.md");
        assert_eq!(entries[2]["category"], "documentation");
    }

    #[tokio::test]
    async fn test_run_then_report_is_viewable() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = test_app(&state)
            .oneshot(post_json("/api/runs", serde_json::json!({"target": "app", "command": "Overview"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let outcome: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(outcome["outcome"], "started");

        wait_idle(&state).await;

        let response = test_app(&state).oneshot(get("/api/targets/app/reports")).await.unwrap();
        let reports: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["label"], "Architecture Overview");

        let response = test_app(&state)
            .oneshot(get("/api/targets/app/reports/ra-overview.md"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(report["segments"][0]["kind"], "markdown");
        assert_eq!(report["segments"][0]["content"], "overview\n");

        // Output exists now, so a second run is already satisfied.
        let response = test_app(&state)
            .oneshot(post_json("/api/runs", serde_json::json!({"target": "app", "command": "Overview"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(outcome["outcome"], "already_satisfied");
    }

    #[tokio::test]
    async fn test_second_run_while_running_conflicts() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let body = serde_json::json!({"target": "app", "command": "Slow"});

        let first = test_app(&state).oneshot(post_json("/api/runs", body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = test_app(&state).oneshot(post_json("/api/runs", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let err: serde_json::Value = body_json(second.into_body()).await;
        assert!(err["error"].as_str().unwrap().contains("already running"));

        wait_idle(&state).await;
    }

    #[tokio::test]
    async fn test_run_events_are_broadcast() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let mut rx = state.ws_tx.subscribe();

        test_app(&state)
            .oneshot(post_json("/api/runs", serde_json::json!({"target": "app", "command": "Slow"})))
            .await
            .unwrap();
        wait_idle(&state).await;

        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("RunStarted"));
        assert_eq!(kinds.last().map(String::as_str), Some("RunFinished"));
    }

    #[tokio::test]
    async fn test_unknown_target_and_command_are_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = test_app(&state)
            .oneshot(post_json("/api/runs", serde_json::json!({"target": "nope", "command": "Overview"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = test_app(&state)
            .oneshot(post_json("/api/runs", serde_json::json!({"target": "app", "command": "Nope"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_outside_allow_list_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        std::fs::write(dir.path().join("workspace/app/notes.md"), "x").unwrap();

        let response = test_app(&state)
            .oneshot(get("/api/targets/app/reports/notes.md"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_risk_graph_served_as_svg() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let response = test_app(&state).oneshot(get("/api/targets/app/risk")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        std::fs::write(dir.path().join("workspace/app/ra-risk.svg"), "<svg/>").unwrap();
        let response = test_app(&state).oneshot(get("/api/targets/app/risk")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
    }

    #[tokio::test]
    async fn test_restart_docs_without_artifacts_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let response = test_app(&state)
            .oneshot(post_json("/api/docs/app/restart", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let err: serde_json::Value = body_json(response.into_body()).await;
        assert!(err["error"].as_str().unwrap().contains("Directory not found"));
    }

    #[tokio::test]
    async fn test_restart_docs_then_status() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        std::fs::create_dir_all(dir.path().join("workspace/app/_ra")).unwrap();

        let response = test_app(&state)
            .oneshot(post_json("/api/docs/app/restart", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let started: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(started["url"], "http://localhost:19205");

        let response = test_app(&state).oneshot(get("/api/docs/app")).await.unwrap();
        let view: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(view["port"], 19205);
        assert_eq!(view["server"]["alive"], true);

        let response = test_app(&state).oneshot(get("/api/docs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let overview: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(overview.len(), 1);
        assert_eq!(overview[0]["port"], 19205);
        assert_eq!(overview[0]["running"], true);

        state.ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_snapshot_starts_idle() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let response = test_app(&state).oneshot(get("/api/session")).await.unwrap();
        let snapshot: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(snapshot["phase"], "idle");
        assert!(snapshot["run"].is_null());
    }
}
