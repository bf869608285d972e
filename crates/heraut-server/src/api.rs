use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use heraut_federation::{ActorProfile, DispatchReport, Federation};
use heraut_shared::{AccountId, ProtocolObject, Status};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

const DEFAULT_PAGE: u32 = 20;
const MAX_PAGE: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub federation: Arc<Federation>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/inbox", post(inbox))
        .route("/accounts", post(create_account))
        .route("/users/:handle/statuses", post(create_status))
        .route("/users/:handle/home", get(home_timeline))
        .route("/users/:handle/notifications", get(notifications))
        .route("/users/:handle/outbox", post(outbox))
        .route("/actors/resolve", get(resolve_actor))
        .layer(DefaultBodyLimit::max(state.config.max_payload_size))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    domain: String,
    url: String,
    version: &'static str,
}

#[derive(Deserialize)]
struct CreateAccountRequest {
    handle: String,
}

#[derive(Serialize)]
struct CreateAccountResponse {
    id: AccountId,
}

#[derive(Deserialize)]
struct CreateStatusRequest {
    body: String,
}

#[derive(Serialize)]
struct FailedRecipient {
    recipient: String,
    error: String,
}

#[derive(Serialize)]
struct CreateStatusResponse {
    status: Status,
    recipients: Vec<AccountId>,
    delivered: usize,
    failed: Vec<FailedRecipient>,
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<u32>,
}

impl PageQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
    }
}

#[derive(Deserialize)]
struct OutboxRequest {
    activity: Value,
    inboxes: Vec<String>,
}

#[derive(Serialize)]
struct OutboxResponse {
    delivered: Vec<String>,
    failed: Vec<FailedRecipient>,
    dispatch: DispatchReport,
}

#[derive(Deserialize)]
struct ResolveQuery {
    id: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        domain: state.config.instance_domain.clone(),
        url: state.config.public_url.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse_object(value: Value) -> Result<ProtocolObject, ServerError> {
    match value {
        Value::Object(map) => ProtocolObject::from_map(map)
            .map_err(|e| ServerError::BadRequest(e.to_string())),
        _ => Err(ServerError::BadRequest("expected a JSON object".to_string())),
    }
}

async fn inbox(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<DispatchReport>), ServerError> {
    let object = parse_object(payload)?;
    let report = state.federation.receive(object).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), ServerError> {
    let id = state.federation.register_local_account(req.handle.trim()).await?;
    info!(account = %id, "Registered local account");
    Ok((StatusCode::CREATED, Json(CreateAccountResponse { id })))
}

async fn create_status(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Json(req): Json<CreateStatusRequest>,
) -> Result<(StatusCode, Json<CreateStatusResponse>), ServerError> {
    let (status, report) = state.federation.post_status(&handle, &req.body).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateStatusResponse {
            status,
            delivered: report.delivered.len(),
            failed: report
                .failed
                .into_iter()
                .map(|(recipient, error)| FailedRecipient {
                    recipient: recipient.to_string(),
                    error,
                })
                .collect(),
            recipients: report.recipients,
        }),
    ))
}

async fn home_timeline(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Status>>, ServerError> {
    Ok(Json(state.federation.home_timeline(&handle, page.limit())?))
}

async fn notifications(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<ProtocolObject>>, ServerError> {
    Ok(Json(state.federation.notifications(&handle, page.limit())?))
}

async fn outbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Json(req): Json<OutboxRequest>,
) -> Result<Json<OutboxResponse>, ServerError> {
    if req.inboxes.is_empty() {
        return Err(ServerError::BadRequest("no inboxes given".to_string()));
    }
    let activity = parse_object(req.activity)?;
    let report = state.federation.send(&handle, activity, &req.inboxes).await?;
    Ok(Json(OutboxResponse {
        delivered: report.delivered,
        failed: report
            .failed
            .into_iter()
            .map(|(recipient, error)| FailedRecipient { recipient, error })
            .collect(),
        dispatch: report.dispatch,
    }))
}

async fn resolve_actor(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ActorProfile>, ServerError> {
    Ok(Json(state.federation.actors().resolve(&query.id).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::json;
    use tower::ServiceExt;

    use heraut_federation::{ActorFetcher, DeliveryTransport, FetchError};
    use heraut_store::Database;

    use super::*;

    struct OneRemoteActor;

    #[async_trait]
    impl ActorFetcher for OneRemoteActor {
        async fn fetch_actor(&self, identifier: &str) -> Result<ActorProfile, FetchError> {
            if identifier.contains("bob") {
                Ok(ActorProfile {
                    account: "bob@remote.example".to_string(),
                    url: "https://remote.example/users/bob".to_string(),
                    attributes: Default::default(),
                })
            } else {
                Err(FetchError::NotFound)
            }
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl DeliveryTransport for AcceptAll {
        async fn post_activity(
            &self,
            _inbox: &str,
            _activity: &ProtocolObject,
        ) -> heraut_federation::Result<()> {
            Ok(())
        }
    }

    fn app() -> Router {
        let config = ServerConfig {
            public_url: "https://local.example".to_string(),
            instance_domain: "local.example".to_string(),
            ..ServerConfig::default()
        };
        let db = Database::open_in_memory().unwrap().into_shared();
        let federation = Federation::new(
            db,
            Arc::new(OneRemoteActor),
            Arc::new(AcceptAll),
            config.federation_config(),
        )
        .unwrap();
        build_router(AppState {
            federation: Arc::new(federation),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
            config: Arc::new(config),
        })
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let app = app();
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, get("/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["domain"], "local.example");
        assert_eq!(body["url"], "https://local.example");
    }

    #[tokio::test]
    async fn test_post_status_lands_in_home_timelines() {
        let app = app();
        for handle in ["alice", "carol"] {
            let (status, _) = call(&app, post("/accounts", json!({ "handle": handle }))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = call(
            &app,
            post("/users/alice/statuses", json!({ "body": "hi @carol" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["delivered"], 2);
        assert_eq!(body["failed"], json!([]));

        let (status, home) = call(&app, get("/users/carol/home?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(home.as_array().unwrap().len(), 1);
        assert_eq!(home[0]["body"], "hi @carol");
    }

    #[tokio::test]
    async fn test_inbox_follow_creates_notification() {
        let app = app();
        call(&app, post("/accounts", json!({ "handle": "alice" }))).await;

        let follow = json!({
            "id": "https://remote.example/follows/1",
            "type": "Follow",
            "actor": "https://remote.example/users/bob",
            "object": "https://local.example/users/alice",
        });
        let (status, report) = call(&app, post("/inbox", follow.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(report["persistence"], "created");

        let (status, report) = call(&app, post("/inbox", follow)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(report["persistence"], "duplicate");

        let (_, notifications) = call(&app, get("/users/alice/notifications")).await;
        let notifications = notifications.as_array().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["notificationType"], "follow");
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let app = app();

        let (status, body) = call(&app, post("/inbox", json!(["not", "an", "object"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, post("/accounts", json!({ "handle": "bad handle" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, get("/users/nobody/home")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            post(
                "/users/nobody/outbox",
                json!({ "activity": {}, "inboxes": [] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_resolve_actor() {
        let app = app();
        let (status, body) = call(&app, get("/actors/resolve?id=bob@remote.example")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "https://remote.example/users/bob");

        let (status, _) = call(&app, get("/actors/resolve?id=eve@remote.example")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_routes() {
        let config = ServerConfig::default();
        let db = Database::open_in_memory().unwrap().into_shared();
        let federation = Federation::new(
            db,
            Arc::new(OneRemoteActor),
            Arc::new(AcceptAll),
            config.federation_config(),
        )
        .unwrap();
        let app = build_router(AppState {
            federation: Arc::new(federation),
            rate_limiter: RateLimiter::new(0.0, 1.0),
            config: Arc::new(config),
        });

        let (status, _) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }
}
