/**
 * API REST NODEGRID - Serveur HTTP du dashboard
 *
 * RÔLE :
 * Sert la page du dashboard (index.html + fichiers statiques) et expose
 * les opérations du dashboard en JSON pour le navigateur.
 *
 * FONCTIONNEMENT :
 * - GET / : index.html du dossier public (500 texte si illisible)
 * - autres GET : fichiers statiques, 404 sinon
 * - routes de session : header x-session-token (absent/inconnu -> 401)
 * - erreurs : { "ok": false, "msg": ... } avec le code HTTP du type d'erreur
 *
 * SÉCURITÉ :
 * - si NODEGRID_API_KEY est défini, header x-api-key obligatoire sur toutes
 *   les routes API ; /, /health et les fichiers statiques restent publics
 */

use crate::configure::ConfigureRequest;
use crate::dashboard::{Dashboard, DashboardError};
use crate::prompts::PresetAnswers;
use crate::session::{Session, SessionRegistry};
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub sessions: Arc<SessionRegistry>,
    pub public_dir: PathBuf,
    pub api_key: Option<String>,
}

pub struct ApiError(DashboardError);

impl From<DashboardError> for ApiError {
    fn from(e: DashboardError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            DashboardError::Validation(_) => StatusCode::BAD_REQUEST,
            DashboardError::NoSession => StatusCode::UNAUTHORIZED,
            DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (code, Json(json!({ "ok": false, "msg": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let public_dir = app_state.public_dir.clone();
    Router::new()
        .route("/system/health", get(get_system_health))
        .route("/session", post(open_session).delete(close_session))
        .route("/session/balance", put(update_balance))
        .route("/instances", get(get_instances).post(create_instance))
        .route("/instances/refresh", post(refresh_instances))
        .route("/instances/{id}", delete(delete_instance))
        .route("/ssh-keys", get(list_ssh_keys).post(register_ssh_key))
        .route("/ssh-keys/generate", post(generate_ssh_key))
        .route("/compute", get(get_compute))
        .route("/nodes/{id}/ping", post(ping_node))
        .route("/nodes/{id}/configure", post(configure_card))
        .route("/configure-node", post(configure_node))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .route("/", get(index))
        .route("/health", get(|| async { "ok" }))
        .fallback_service(ServeDir::new(public_dir))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

fn session_from(app: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|token| app.sessions.get(token))
        .ok_or(ApiError(DashboardError::NoSession))
}

/// Corps optionnel : vide -> réponses par défaut (aucune confirmation)
fn prompt_answers(body: &Bytes) -> Result<PresetAnswers, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PresetAnswers::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(DashboardError::Validation(format!("invalid request body: {e}"))))
}

// GET / (index.html)
async fn index(State(app): State<AppState>) -> Response {
    match tokio::fs::read_to_string(app.public_dir.join("index.html")).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "error serving HTML file");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<crate::health::KernelHealth> {
    Json(app.dashboard.health().get_health(app.sessions.len()))
}

#[derive(Debug, Deserialize)]
struct OpenSession {
    address: String,
    #[serde(default)]
    balance: f64,
}

// POST /session
async fn open_session(State(app): State<AppState>, Json(body): Json<OpenSession>) -> ApiResult {
    let session = app
        .sessions
        .open(&body.address, body.balance)
        .map_err(DashboardError::from)?;
    Ok(Json(json!({
        "token": session.token,
        "address": session.address,
        "display": session.display_address(),
    }))
    .into_response())
}

// DELETE /session
async fn close_session(State(app): State<AppState>, headers: HeaderMap) -> ApiResult {
    let session = session_from(&app, &headers)?;
    app.sessions.close(&session.token);
    Ok(Json(json!({ "ok": true })).into_response())
}

#[derive(Debug, Deserialize)]
struct BalanceUpdate {
    balance: f64,
}

// PUT /session/balance
async fn update_balance(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BalanceUpdate>,
) -> ApiResult {
    let session = session_from(&app, &headers)?;
    session.set_balance(body.balance);
    Ok(Json(json!({ "ok": true, "balance": session.balance() })).into_response())
}

// GET /instances (état courant de la grille)
async fn get_instances(State(app): State<AppState>, headers: HeaderMap) -> ApiResult {
    let session = session_from(&app, &headers)?;
    Ok(Json(app.dashboard.snapshot(&session)).into_response())
}

// POST /instances/refresh
async fn refresh_instances(State(app): State<AppState>, headers: HeaderMap) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let result = app.dashboard.list_instances(&session).await;
    Ok(Json(json!({ "result": result, "grid": app.dashboard.snapshot(&session) })).into_response())
}

// POST /instances (réponses aux prompts dans le corps)
async fn create_instance(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let answers = prompt_answers(&body)?;
    let outcome = app.dashboard.create_instance(&session, &answers).await?;
    Ok(Json(outcome).into_response())
}

// DELETE /instances/{id} ({"confirm": true} dans le corps)
async fn delete_instance(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let answers = prompt_answers(&body)?;
    let outcome = app.dashboard.delete_instance(&session, &id, &answers).await?;
    Ok(Json(outcome).into_response())
}

// GET /ssh-keys
async fn list_ssh_keys(State(app): State<AppState>, headers: HeaderMap) -> ApiResult {
    let session = session_from(&app, &headers)?;
    Ok(Json(app.dashboard.ssh_keys(&session).await).into_response())
}

#[derive(Debug, Deserialize)]
struct NewSshKey {
    #[serde(default)]
    label: String,
    #[serde(default)]
    key: String,
}

// POST /ssh-keys
async fn register_ssh_key(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewSshKey>,
) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let item_hash = app.dashboard.register_ssh_key(&session, &body.label, &body.key).await?;
    Ok(Json(json!({ "ok": true, "item_hash": item_hash })).into_response())
}

#[derive(Debug, Deserialize)]
struct KeyLabel {
    #[serde(default)]
    label: String,
}

// POST /ssh-keys/generate (clé privée rendue une seule fois)
async fn generate_ssh_key(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KeyLabel>,
) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let generated = app.dashboard.generate_ssh_key(&session, &body.label).await?;
    Ok(Json(generated).into_response())
}

// GET /compute
async fn get_compute(State(app): State<AppState>, headers: HeaderMap) -> ApiResult {
    let session = session_from(&app, &headers)?;
    Ok(Json(app.dashboard.compute(&session)).into_response())
}

// POST /nodes/{id}/ping
async fn ping_node(State(app): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult {
    let session = session_from(&app, &headers)?;
    Ok(Json(app.dashboard.ping(&session, &id).await?).into_response())
}

// POST /nodes/{id}/configure
async fn configure_card(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ConfigureRequest>,
) -> ApiResult {
    let session = session_from(&app, &headers)?;
    let result = app.dashboard.configure_card(&session, &id, request).await?;
    Ok(Json(json!({ "ok": true, "result": result })).into_response())
}

// POST /configure-node
async fn configure_node(State(app): State<AppState>, Json(request): Json<ConfigureRequest>) -> ApiResult {
    let result = app.dashboard.configure(request).await?;
    Ok(Json(json!({ "ok": true, "result": result })).into_response())
}
