//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bottle_core::config::GatewayConfig;
use bottle_core::error::BottleError;
use bottle_core::types::UserId;
use bottle_mailbox::Mailbox;
use bottle_scheduler::{LaneScheduler, SchedulerEngine};

use super::routes::{self, ApiError};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub mailbox: Mailbox,
    /// Header carrying the authenticated user id.
    pub user_header: String,
    pub start_time: std::time::Instant,
    /// Reported on `/health` when the process runs the scheduler.
    pub scheduler: Option<SchedulerHandle>,
}

impl AppState {
    pub fn new(mailbox: Mailbox, config: &GatewayConfig) -> Self {
        Self {
            mailbox,
            user_header: config.user_header.clone(),
            start_time: std::time::Instant::now(),
            scheduler: None,
        }
    }

    pub fn with_scheduler(
        mut self,
        engine: Arc<tokio::sync::Mutex<SchedulerEngine>>,
        lanes: Arc<LaneScheduler>,
    ) -> Self {
        self.scheduler = Some(SchedulerHandle { engine, lanes });
        self
    }
}

#[derive(Clone)]
pub struct SchedulerHandle {
    pub engine: Arc<tokio::sync::Mutex<SchedulerEngine>>,
    pub lanes: Arc<LaneScheduler>,
}

/// The authenticated caller, inserted by `require_user`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: UserId,
    pub email: String,
}

/// Caller auth middleware: resolves the user header to an active user.
async fn require_user(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(state.user_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok());
    let Some(id) = id else {
        return ApiError(BottleError::Unauthenticated(format!(
            "Missing or invalid {} header",
            state.user_header
        )))
        .into_response();
    };

    match state.mailbox.caller(id) {
        Ok(user) => {
            req.extensions_mut().insert(Caller {
                id: user.id,
                email: user.email,
            });
            next.run(req).await
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    // Protected routes: require a known, active caller
    let protected = Router::new()
        .route("/api/message/draft", post(routes::save_draft))
        .route("/api/message/draft/all", get(routes::list_drafts))
        .route("/api/message/draft/{id}", delete(routes::delete_draft))
        .route("/api/message/send", post(routes::send_message))
        .route("/api/message/received", get(routes::list_received))
        .route("/api/message/received/{id}", get(routes::get_received))
        .route("/api/message/sent", get(routes::list_sent))
        .route("/api/message/sent/{id}", get(routes::get_sent))
        .route("/api/message/read/{id}", post(routes::mark_read))
        .route("/api/message/scheduled/{id}", delete(routes::cancel_scheduled))
        .route("/api/message/{id}", delete(routes::delete_message))
        .route("/api/calendar/{day}/{month}/{year}", get(routes::calendar_day))
        .route("/api/recipients", get(routes::list_recipients))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_user,
        ));

    // Public routes: no auth
    let public = Router::new().route("/health", get(routes::health_check));

    protected
        .merge(public)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: BOTTLEMAIL_CORS_ORIGINS=https://mail.example.com,https://app.example.com
            if let Ok(origins_str) = std::env::var("BOTTLEMAIL_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and run until `shutdown` resolves.
pub async fn start(
    state: AppState,
    config: &GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("👋 Gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bottle_core::config::BottleConfig;
    use bottle_mailbox::{MailboxContext, MailboxDb, sweeper::sweep_at};
    use bottle_scheduler::{QueueHandle, RecordingTransport};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        mailbox: Mailbox,
        a: UserId,
        b: UserId,
    }

    fn test_app() -> TestApp {
        let config = BottleConfig::default();
        let engine = Arc::new(tokio::sync::Mutex::new(SchedulerEngine::new(100)));
        let lanes = Arc::new(LaneScheduler::default());
        let ctx = MailboxContext::new(
            Arc::new(MailboxDb::open_in_memory().unwrap()),
            Arc::new(QueueHandle::new(engine.clone())),
            Arc::new(RecordingTransport::new()),
            &config,
        );
        let a = ctx.db.create_user("ada@test.com", "Ada", "Lovelace").unwrap();
        let b = ctx.db.create_user("bob@test.com", "Bob", "Builder").unwrap();
        let mailbox = Mailbox::new(Arc::new(ctx));
        TestApp {
            router: build_router(
                AppState::new(mailbox.clone(), &config.gateway).with_scheduler(engine, lanes),
            ),
            mailbox,
            a,
            b,
        }
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user.to_string());
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app();
        let (status, body) = call(&app.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler"]["accepting"], true);
        assert_eq!(body["scheduler"]["pending_tasks"], 0);
        assert_eq!(body["scheduler"]["lanes"].as_array().unwrap().len(), 3);
        assert_eq!(body["notifications"]["failed"], 0);
    }

    #[tokio::test]
    async fn test_health_reports_queued_work() {
        let TestApp { router, mailbox, a, b } = test_app();
        mailbox
            .send(a, &[b], "Later", Utc::now() + Duration::hours(1), None, None)
            .await
            .unwrap();
        let (_, body) = call(&router, "GET", "/health", None, None).await;
        assert_eq!(body["scheduler"]["pending_tasks"], 1);
        assert!(body["scheduler"]["next_wakeup"].is_string());
        assert_eq!(body["scheduler"]["jobs"]["succeeded"], 0);
    }

    #[tokio::test]
    async fn test_malformed_input_is_json_validation_error() {
        let TestApp { router, a, b, .. } = test_app();
        let (status, body) = call(
            &router,
            "POST",
            "/api/message/send",
            Some(a),
            Some(json!({"recipients": [b], "text": "Hello", "delivery_date": "tomorrow"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Validation error"));

        let (status, body) = call(&router, "POST", "/api/message/draft", Some(a), Some(json!({"recipient": b}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        for uri in ["/api/message/received/notanumber", "/api/calendar/x/1/2026"] {
            let (status, body) = call(&router, "GET", uri, Some(a), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["ok"], false);
        }
        let (status, body) = call(&router, "DELETE", "/api/message/scheduled/abc", Some(a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_requires_known_active_user() {
        let app = test_app();
        let (status, body) = call(&app.router, "GET", "/api/message/received", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], false);

        let (status, _) = call(&app.router, "GET", "/api/message/received", Some(999), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        app.mailbox.context().db.set_user_active(app.b, false).unwrap();
        let (status, _) = call(&app.router, "GET", "/api/recipients", Some(app.b), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_message_flow_over_http() {
        let TestApp { router, mailbox, a, b } = test_app();

        let (status, body) = call(
            &router,
            "POST",
            "/api/message/draft",
            Some(a),
            Some(json!({"text": "Hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let draft = body["message_id"].as_i64().unwrap();

        let (status, _) = call(
            &router,
            "POST",
            "/api/message/send",
            Some(a),
            Some(json!({
                "recipients": [b],
                "text": "Hello",
                "delivery_date": (Utc::now() - Duration::seconds(5)).to_rfc3339(),
                "draft_id": draft,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let at = Utc::now() + Duration::seconds(60);
        let (status, body) = call(
            &router,
            "POST",
            "/api/message/send",
            Some(a),
            Some(json!({
                "recipients": [b],
                "text": "Hello",
                "delivery_date": at.to_rfc3339(),
                "draft_id": draft,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message_ids"], json!([draft]));

        let (_, body) = call(&router, "GET", "/api/message/received", Some(b), None).await;
        assert_eq!(body["messages"], json!([]));

        sweep_at(mailbox.context(), at + Duration::seconds(1)).await;
        let (_, body) = call(&router, "GET", "/api/message/received", Some(b), None).await;
        assert_eq!(body["messages"][0]["id_message"], draft);

        let uri = format!("/api/message/{draft}");
        let (status, _) = call(&router, "DELETE", &uri, Some(b), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let read = format!("/api/message/read/{draft}");
        let (status, _) = call(&router, "POST", &read, Some(b), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, "DELETE", &uri, Some(b), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&router, "DELETE", &uri, Some(b), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_cancel_scheduled_over_http() {
        let TestApp { router, mailbox, a, b } = test_app();
        let id = mailbox
            .send(a, &[b], "Later", Utc::now() + Duration::days(1), None, None)
            .await
            .unwrap()[0];

        let uri = format!("/api/message/scheduled/{id}");
        let (status, _) = call(&router, "DELETE", &uri, Some(a), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, "DELETE", &uri, Some(a), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let user = mailbox.context().db.get_user(a).unwrap().unwrap();
        assert_eq!(user.points, -60);
    }

    #[tokio::test]
    async fn test_calendar_and_recipients() {
        let TestApp { router, a, b, .. } = test_app();
        let (status, _) = call(&router, "GET", "/api/calendar/31/2/2026", Some(a), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&router, "GET", "/api/calendar/1/1/2026", Some(a), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"], json!([]));

        let (_, body) = call(&router, "GET", "/api/recipients", Some(a), None).await;
        assert_eq!(body["recipients"][0]["id"], b);
    }

    #[tokio::test]
    async fn test_drafts_over_http() {
        let TestApp { router, a, b, .. } = test_app();
        let (_, body) = call(
            &router,
            "POST",
            "/api/message/draft",
            Some(a),
            Some(json!({"text": "v1", "recipient": b})),
        )
        .await;
        let id = body["message_id"].as_i64().unwrap();

        let (_, body) = call(&router, "GET", "/api/message/draft/all", Some(a), None).await;
        assert_eq!(body["drafts"][0]["counterpart"]["id"], b);

        let (status, _) = call(&router, "POST", "/api/message/draft", Some(a), Some(json!({"text": " "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/message/draft/{id}");
        let (status, _) = call(&router, "DELETE", &uri, Some(b), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&router, "DELETE", &uri, Some(a), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
