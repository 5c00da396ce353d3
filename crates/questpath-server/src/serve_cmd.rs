use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use questpath_core::billing::{
    self, BillingConfig, CancelError, CheckoutError, NotificationError, PaymentGateway, Reconciler,
};
use questpath_core::events::EventSink;
use questpath_core::goal::{self, CreateGoalError, CreationPipeline, QuotaCause, QuotaPolicy, TopicError};
use questpath_core::metrics::{BusinessMetrics, MetricsSnapshot};
use questpath_core::producer::PlanProducer;
use questpath_db::models::User;
use questpath_db::queries::users;

/// Header carrying the caller's user id, set by the upstream auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const SIGNATURE_HEADER: &str = "stripe-signature";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    pipeline: Arc<CreationPipeline>,
    reconciler: Arc<Reconciler>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSink,
    metrics: Arc<BusinessMetrics>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        producer: Arc<dyn PlanProducer>,
        gateway: Arc<dyn PaymentGateway>,
        billing: BillingConfig,
        quota: QuotaPolicy,
        generation_timeout: Duration,
    ) -> Self {
        let metrics = Arc::new(BusinessMetrics::new());
        let pipeline = CreationPipeline::new(pool.clone(), producer, quota, metrics.clone())
            .with_generation_timeout(generation_timeout);
        let reconciler = Reconciler::new(pool.clone(), gateway.clone(), billing, metrics.clone());
        Self {
            events: EventSink::new(pool.clone()),
            pool,
            pipeline: Arc::new(pipeline),
            reconciler: Arc::new(reconciler),
            gateway,
            metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            details: Map::new(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
    }

    /// Log the full chain; the client only sees a generic message.
    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "An unexpected error occurred. Please try again.",
        )
    }

    fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_owned(), value.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let mut body = self.details;
        body.insert("message".into(), Value::String(self.message));
        body.insert("code".into(), Value::String(self.code.into()));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<CreateGoalError> for AppError {
    fn from(err: CreateGoalError) -> Self {
        match err {
            CreateGoalError::InvalidRequest(msg) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg)
            }
            CreateGoalError::UserNotFound(_) => Self::not_found("User not found"),
            CreateGoalError::QuotaExceeded {
                current,
                max,
                cause,
            } => {
                let message = match cause {
                    QuotaCause::PremiumExpired => format!(
                        "Your premium subscription has expired. Free accounts can have up to {max} goals."
                    ),
                    QuotaCause::FreeTier => format!(
                        "Free accounts can have up to {max} goals. Upgrade to premium for unlimited goals."
                    ),
                };
                Self::new(StatusCode::FORBIDDEN, cause.code(), message)
                    .with_detail("redirect", "/pricing")
                    .with_detail("current_goals", current)
                    .with_detail("max_goals", max)
            }
            CreateGoalError::MalformedOutput(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_AI_RESPONSE",
                "Failed to generate a valid roadmap. Please try rephrasing your goal description.",
            ),
            CreateGoalError::UpstreamUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "AI_SERVICE_ERROR",
                "AI service is temporarily unavailable. Please try again in a moment.",
            ),
            CreateGoalError::Unknown(e) => Self::internal(e),
        }
    }
}

impl From<TopicError> for AppError {
    fn from(err: TopicError) -> Self {
        match err {
            TopicError::StageNotFound(_) => Self::not_found("Level not found"),
            e @ TopicError::InvalidTopicIndex { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_TOPIC_INDEX", e.to_string())
            }
            TopicError::Store(e) => Self::internal(e),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::AlreadyPremium { expiry } => Self::new(
                StatusCode::BAD_REQUEST,
                "ALREADY_PREMIUM",
                format!("You already have an active premium subscription until {}", expiry.date_naive()),
            ),
            CheckoutError::Gateway(e) => {
                error!(error = %format!("{e:#}"), "checkout session creation failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CHECKOUT_ERROR",
                    "Unable to create checkout session. Please try again.",
                )
            }
        }
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        match err {
            e @ CancelError::NotPremium => Self::new(StatusCode::BAD_REQUEST, "NOT_PREMIUM", e.to_string()),
            e @ CancelError::NoCustomer => Self::new(StatusCode::NOT_FOUND, "NO_CUSTOMER", e.to_string()),
            e @ CancelError::NoActiveSubscription => {
                Self::new(StatusCode::NOT_FOUND, "NO_ACTIVE_SUBSCRIPTION", e.to_string())
            }
            CancelError::Gateway(e) => {
                error!(error = %format!("{e:#}"), "subscription cancellation failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CANCEL_ERROR",
                    "Unable to cancel subscription. Please try again.",
                )
            }
        }
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Unauthentic(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", "Invalid signature")
            }
            NotificationError::MalformedPayload(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", "Invalid payload")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The authenticated caller, loaded from [`USER_ID_HEADER`].
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| AppError::unauthorized("Missing or invalid user identity"))?;

        let user = users::get_user(&state.pool, user_id)
            .await
            .map_err(AppError::internal)?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        Ok(Self(user))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub access_until: chrono::DateTime<Utc>,
    pub subscription_id: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/goals", post(create_goal))
        .route("/goals/me", get(list_my_goals))
        .route("/goals/{id}", get(get_goal))
        .route("/goals/levels/{stage_id}/topics/{index}", patch(toggle_topic))
        .route("/payment/checkout", post(start_checkout))
        .route("/payment/cancel-subscription", post(cancel_subscription))
        .route("/payment/webhook", post(payment_webhook))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("questpath listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("questpath shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C; shutting down");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_goal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CreateGoalRequest>,
) -> Result<axum::response::Response, AppError> {
    let tree = state.pipeline.create_goal(user.id, &request.description).await?;
    Ok((StatusCode::CREATED, Json(tree)).into_response())
}

async fn list_my_goals(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<axum::response::Response, AppError> {
    let goals = goal::list_goals(&state.pool, user.id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(goals).into_response())
}

async fn get_goal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tree = goal::get_goal_tree(&state.pool, user.id, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found("Goal not found"))?;
    Ok(Json(tree).into_response())
}

async fn toggle_topic(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((stage_id, index)): Path<(Uuid, i64)>,
) -> Result<axum::response::Response, AppError> {
    let topic = goal::toggle_topic(&state.pool, &state.events, user.id, stage_id, index).await?;
    Ok(Json(topic).into_response())
}

async fn start_checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<axum::response::Response, AppError> {
    let url = billing::start_checkout(state.gateway.as_ref(), &user, Utc::now()).await?;
    Ok(Json(CheckoutResponse { url }).into_response())
}

async fn cancel_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<axum::response::Response, AppError> {
    let receipt = billing::cancel_subscription(state.gateway.as_ref(), &user, Utc::now()).await?;
    Ok(Json(CancelResponse {
        message: "Subscription will be cancelled at the end of the current billing period".into(),
        access_until: receipt.access_until,
        subscription_id: receipt.subscription_id,
    })
    .into_response())
}

/// Always acknowledges an authentic notification, whatever processing did.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    state.reconciler.handle(&body, signature).await?;
    Ok(Json(json!({ "status": "success" })).into_response())
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
