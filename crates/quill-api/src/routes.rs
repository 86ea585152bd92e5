use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use quill_core::authority::{AuthorityError, AuthorityStore};
use quill_core::models::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, CursorResponse, LabelId, LabelRecord,
    NoteId, NoteRecord, SyncScope, UpdateLabelRequest, UpdateNoteRequest,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;

const DEFAULT_SEARCH_LIMIT: usize = 50;
const MAX_PAGE_SIZE: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<Mutex<AuthorityStore>>,
    verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: AuthorityStore) -> Self {
        Self {
            verifier: Arc::new(JwtVerifier::new(&config)),
            store: Arc::new(Mutex::new(store)),
            config,
        }
    }

    /// Open the authority database named by the config
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AuthorityError> {
        let store = AuthorityStore::open(&config.database_path)?;
        Ok(Self::new(config, store))
    }

    pub fn verifier(&self) -> &JwtVerifier {
        &self.verifier
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/notes", post(create_note).get(list_notes))
        .route("/notes/search", get(search_notes))
        .route(
            "/notes/{id}",
            get(get_note).put(update_note).delete(delete_note),
        )
        .route("/notes/{id}/restore", post(restore_note))
        .route("/notes/{id}/permanent", delete(purge_note))
        .route("/labels", post(create_label).get(list_labels))
        .route("/labels/{id}", put(update_label).delete(delete_label))
        .route("/sync/changes", get(sync_changes))
        .route("/sync/snapshot", get(sync_snapshot))
        .route("/sync/cursor", get(sync_cursor))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

// ----------------------------------------------------------------------
// Notes
// ----------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    include_deleted: bool,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn create_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<NoteRecord>), AppError> {
    let record = state.store.lock().await.create_note(&user.owner, request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<NoteRecord>>, AppError> {
    let limit = query.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let notes = state.store.lock().await.list_notes(
        &user.owner,
        query.include_deleted,
        limit,
        query.offset,
    )?;
    Ok(Json(notes))
}

async fn search_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<NoteRecord>>, AppError> {
    if query.q.trim().is_empty() {
        return Err(AppError::bad_request("Search query must not be empty"));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_PAGE_SIZE);
    let notes = state
        .store
        .lock()
        .await
        .search_notes(&user.owner, &query.q, limit)?;
    Ok(Json(notes))
}

async fn get_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<NoteRecord>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state.store.lock().await.get_note(&user.owner, &id)?;
    Ok(Json(note))
}

async fn update_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateNoteRequest>,
) -> Result<Json<NoteRecord>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state
        .store
        .lock()
        .await
        .update_note(&user.owner, &id, request)?;
    Ok(Json(note))
}

async fn delete_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<NoteRecord>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state.store.lock().await.delete_note(&user.owner, &id)?;
    Ok(Json(note))
}

async fn restore_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<NoteRecord>, AppError> {
    let id = parse_note_id(&id)?;
    let note = state.store.lock().await.restore_note(&user.owner, &id)?;
    Ok(Json(note))
}

async fn purge_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_note_id(&id)?;
    state.store.lock().await.purge_note(&user.owner, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------------
// Labels
// ----------------------------------------------------------------------

async fn create_label(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateLabelRequest>,
) -> Result<(StatusCode, Json<LabelRecord>), AppError> {
    let label = state.store.lock().await.create_label(&user.owner, request)?;
    Ok((StatusCode::CREATED, Json(label)))
}

async fn list_labels(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<LabelRecord>>, AppError> {
    let labels = state
        .store
        .lock()
        .await
        .list_labels(&user.owner, query.include_deleted)?;
    Ok(Json(labels))
}

async fn update_label(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(request): Json<UpdateLabelRequest>,
) -> Result<Json<LabelRecord>, AppError> {
    let id = parse_label_id(&id)?;
    let label = state
        .store
        .lock()
        .await
        .update_label(&user.owner, &id, request)?;
    Ok(Json(label))
}

async fn delete_label(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<LabelRecord>, AppError> {
    let id = parse_label_id(&id)?;
    let label = state.store.lock().await.delete_label(&user.owner, &id)?;
    Ok(Json(label))
}

// ----------------------------------------------------------------------
// Sync feed
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: i64,
    label_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    label_id: Option<String>,
}

async fn sync_changes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangeSet>, AppError> {
    let scope = parse_scope(query.label_id.as_deref())?;
    let changes = state
        .store
        .lock()
        .await
        .changes_since(&user.owner, &scope, query.since)?;
    tracing::debug!(
        owner = %user.owner,
        scope = %scope,
        since = query.since,
        notes = changes.notes.len(),
        labels = changes.labels.len(),
        "Served change feed"
    );
    Ok(Json(changes))
}

async fn sync_snapshot(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<ChangeSet>, AppError> {
    let scope = parse_scope(query.label_id.as_deref())?;
    let snapshot = state
        .store
        .lock()
        .await
        .full_snapshot(&user.owner, &scope)?;
    tracing::debug!(
        owner = %user.owner,
        scope = %scope,
        notes = snapshot.notes.len(),
        labels = snapshot.labels.len(),
        "Served full snapshot"
    );
    Ok(Json(snapshot))
}

async fn sync_cursor(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<CursorResponse>, AppError> {
    let scope = parse_scope(query.label_id.as_deref())?;
    let cursor = state
        .store
        .lock()
        .await
        .current_cursor(&user.owner, &scope)?;
    Ok(Json(CursorResponse { scope, cursor }))
}

fn parse_note_id(raw: &str) -> Result<NoteId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid note id '{raw}'")))
}

fn parse_label_id(raw: &str) -> Result<LabelId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid label id '{raw}'")))
}

fn parse_scope(label_id: Option<&str>) -> Result<SyncScope, AppError> {
    label_id
        .map(parse_label_id)
        .transpose()
        .map(SyncScope::from)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Method, Request as HttpRequest};
    use pretty_assertions::assert_eq;
    use quill_core::auth::{Identity, SharedIdentity};
    use quill_core::config::SyncSettings;
    use quill_core::models::{LabelDraft, NoteDraft};
    use quill_core::remote::{HttpRemote, RemoteStore};
    use quill_core::services::ReplicaService;
    use quill_core::sync::{SyncOrchestrator, SyncOutcome};
    use quill_core::OwnerId;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn state() -> AppState {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            database_path: ":memory:".into(),
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            jwt_issuer: None,
            auth_clock_skew: Duration::from_secs(30),
            token_ttl: Duration::from_secs(3_600),
        };
        AppState::new(Arc::new(config), AuthorityStore::open_in_memory().unwrap())
    }

    fn token(state: &AppState, owner: &str) -> String {
        state
            .verifier()
            .mint(&OwnerId::new(owner), Duration::from_secs(600))
            .unwrap()
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn healthz_needs_no_token() {
        let app = app_router(state());
        let (status, body) = call(&app, Method::GET, "/healthz", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_require_bearer_token() {
        let app = app_router(state());
        let (status, body) = call(&app, Method::GET, "/v1/notes", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(&app, Method::GET, "/v1/notes", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_note_replay_returns_the_same_note() {
        let state = state();
        let token = token(&state, "user-1");
        let app = app_router(state);
        let id = NoteId::new().to_string();
        let body = json!({ "id": id, "title": "Groceries", "body": "eggs" });

        let (status, first) =
            call(&app, Method::POST, "/v1/notes", Some(&token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, second) = call(&app, Method::POST, "/v1/notes", Some(&token), Some(body)).await;
        assert_eq!(first, second);

        let (status, list) = call(&app, Method::GET, "/v1/notes", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn notes_are_invisible_to_other_owners() {
        let state = state();
        let alice = token(&state, "alice");
        let bob = token(&state, "bob");
        let app = app_router(state);

        let (_, note) = call(
            &app,
            Method::POST,
            "/v1/notes",
            Some(&alice),
            Some(json!({ "body": "private" })),
        )
        .await;
        let uri = format!("/v1/notes/{}", note["id"].as_str().unwrap());
        let (status, body) = call(&app, Method::GET, &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn duplicate_label_name_is_rejected() {
        let state = state();
        let token = token(&state, "user-1");
        let app = app_router(state);

        let (status, _) = call(
            &app,
            Method::POST,
            "/v1/labels",
            Some(&token),
            Some(json!({ "name": "Work" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/labels",
            Some(&token),
            Some(json!({ "name": "work" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "rejected");
    }

    #[tokio::test]
    async fn change_feed_and_cursor_agree() {
        let state = state();
        let token = token(&state, "user-1");
        let app = app_router(state);
        call(
            &app,
            Method::POST,
            "/v1/notes",
            Some(&token),
            Some(json!({ "title": "One" })),
        )
        .await;

        let (status, changes) =
            call(&app, Method::GET, "/v1/sync/changes?since=0", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(changes["scope"], "global");
        assert_eq!(changes["notes"].as_array().map(Vec::len), Some(1));

        let (_, cursor) = call(&app, Method::GET, "/v1/sync/cursor", Some(&token), None).await;
        assert_eq!(cursor["cursor"], changes["cursor"]);

        let uri = format!("/v1/sync/changes?since={}", changes["cursor"]);
        let (_, later) = call(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(later["notes"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn malformed_ids_are_bad_requests() {
        let state = state();
        let token = token(&state, "user-1");
        let app = app_router(state);

        let (status, _) = call(&app, Method::GET, "/v1/notes/nope", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(
            &app,
            Method::GET,
            "/v1/sync/snapshot?label_id=nope",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_remote_syncs_against_the_router() {
        let state = state();
        let token = token(&state, "user-1");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            axum::serve(listener, app_router(state)).await.unwrap();
        });

        let owner = OwnerId::new("user-1");
        let identity = SharedIdentity::new(Identity::new(owner.clone(), token));
        let remote = HttpRemote::new(&base_url, identity, Duration::from_secs(5)).unwrap();
        remote.health().await.unwrap();

        let replica = ReplicaService::open_in_memory().unwrap();
        let label = replica
            .create_label(
                &owner,
                LabelDraft {
                    name: "Work".to_string(),
                    color: None,
                },
            )
            .await
            .unwrap();
        replica
            .create_note(
                &owner,
                NoteDraft {
                    title: Some("Buy milk".to_string()),
                    body: None,
                    label_ids: vec![label.id],
                },
            )
            .await
            .unwrap();

        let orchestrator = SyncOrchestrator::new(
            replica,
            Arc::new(remote.clone()),
            SyncSettings::default(),
        );
        let report = orchestrator.run_sync(&owner).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.pushed, 2);

        let notes = remote.list_notes(&owner, false).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].label_ids, vec![label.id]);

        server.abort();
    }
}
