//! HTTP API: conversations, messages, moderation logs, reports, and
//! creator settings.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};

use crate::database::{
    Conversation, ConversationSummary, CreatorSettings, Database, ModerationLogEntry,
    StoredMessage,
};
use crate::error::ChaperoneError;
use crate::models::{
    ModerationAction, NewMessage, SenderType, Verdict, MAX_MESSAGE_LENGTH,
};
use crate::pipeline::ModerationPipeline;
use crate::policy::WARNINGS_BEFORE_BLOCK;
use crate::reports::ReportService;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Request logging middleware layer
#[derive(Clone)]
pub struct RequestLoggingLayer;

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingService { inner }
    }
}

/// Service that logs all requests with method, path, status, and response time
#[derive(Clone)]
pub struct RequestLoggingService<S> {
    inner: S,
}

impl<S> Service<Request> for RequestLoggingService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let start = std::time::Instant::now();

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            let duration = start.elapsed();
            let status = response.status();

            tracing::info!(
                method = %method,
                path = %uri.path(),
                status = %status.as_u16(),
                duration_ms = %duration.as_millis(),
                "HTTP request"
            );

            Ok(response)
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub pipeline: Arc<ModerationPipeline>,
    pub reports: Arc<ReportService>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, msg: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
}

/// Map a service error to an HTTP response, logging the full error and
/// returning only its user-facing message.
fn api_error(error: ChaperoneError) -> ApiError {
    let status = match &error {
        ChaperoneError::Validation(_) => StatusCode::BAD_REQUEST,
        ChaperoneError::NotFound(_) => StatusCode::NOT_FOUND,
        ChaperoneError::DuplicateReport => StatusCode::CONFLICT,
        ChaperoneError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ChaperoneError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChaperoneError::ClassifierApi(_) | ChaperoneError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }

    error_response(status, &error.user_message())
}

// ========== Conversations ==========

#[derive(Deserialize)]
struct CreateConversationRequest {
    #[serde(rename = "creatorName")]
    creator_name: Option<String>,
    #[serde(rename = "buyerName")]
    buyer_name: Option<String>,
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let creator = non_empty(body.creator_name, "creatorName")?;
    let buyer = non_empty(body.buyer_name, "buyerName")?;

    let (conversation, created) = state
        .db
        .find_or_create_conversation(&creator, &buyer)
        .await
        .map_err(api_error)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(conversation)))
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    user: Option<String>,
    role: Option<String>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let user = non_empty(query.user, "user")?;
    let role = parse_role(query.role.as_deref())?;

    let conversations = state
        .db
        .list_conversations(&user, role)
        .await
        .map_err(api_error)?;

    Ok(Json(conversations))
}

// ========== Messages ==========

async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    state
        .db
        .get_conversation(conversation_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Conversation not found"))?;

    let messages = state
        .db
        .list_messages(conversation_id)
        .await
        .map_err(api_error)?;

    Ok(Json(messages))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: Option<String>,
    #[serde(rename = "senderType")]
    sender_type: Option<String>,
    #[serde(rename = "senderName")]
    sender_name: Option<String>,
}

/// Advisory included with every blocked message response.
const BLOCKED_ADVISORY: &str = "Sharing contact information or attempting to take business off-platform is not allowed. Repeated violations may result in account restrictions.";

/// Response for a message the pipeline rejected.
#[derive(Serialize)]
struct BlockedResponse {
    error: &'static str,
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<crate::models::ViolationCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<crate::models::Severity>,
    action: ModerationAction,
    warning: &'static str,
}

/// Response for a stored message, carrying soft-warning fields when the
/// sender was warned.
#[derive(Serialize)]
struct SendMessageResponse {
    #[serde(flatten)]
    message: StoredMessage,
    #[serde(rename = "softWarning", skip_serializing_if = "Option::is_none")]
    soft_warning: Option<bool>,
    #[serde(rename = "warningMessage", skip_serializing_if = "Option::is_none")]
    warning_message: Option<String>,
    #[serde(rename = "warningCategory", skip_serializing_if = "Option::is_none")]
    warning_category: Option<crate::models::ViolationCategory>,
    #[serde(rename = "warningsRemaining", skip_serializing_if = "Option::is_none")]
    warnings_remaining: Option<u32>,
}

async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    use axum::response::IntoResponse;

    let content = non_empty(body.content, "content")?;
    validate_content_length(&content)?;
    let sender_type = parse_role(body.sender_type.as_deref())?;
    let sender_name = non_empty(body.sender_name, "senderName")?;

    let conversation = state
        .db
        .get_conversation(conversation_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Conversation not found"))?;

    let message = NewMessage {
        content,
        sender_type,
        sender_name,
    };
    let verdict = state.pipeline.moderate(&message, &conversation).await;

    if !verdict.allowed {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(BlockedResponse {
                error: "Message blocked by moderation",
                reason: verdict.reason,
                category: verdict.category,
                severity: verdict.severity,
                action: verdict.action,
                warning: BLOCKED_ADVISORY,
            }),
        )
            .into_response());
    }

    let stored = state
        .db
        .insert_message(
            conversation_id,
            message.sender_type,
            &message.sender_name,
            &message.content,
        )
        .await
        .map_err(api_error)?;
    state
        .db
        .touch_conversation(conversation_id)
        .await
        .map_err(api_error)?;

    let response = match verdict.action {
        ModerationAction::Warn => SendMessageResponse {
            message: stored,
            soft_warning: Some(true),
            warning_message: Some(warning_message(&verdict)),
            warning_category: verdict.category,
            warnings_remaining: verdict.warnings_remaining,
        },
        _ => SendMessageResponse {
            message: stored,
            soft_warning: None,
            warning_message: None,
            warning_category: None,
            warnings_remaining: None,
        },
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

fn warning_message(verdict: &Verdict) -> String {
    let reason = verdict.reason.as_deref().unwrap_or("Policy violation");
    let remaining = verdict
        .warnings_remaining
        .unwrap_or(WARNINGS_BEFORE_BLOCK);
    format!(
        "{}. You have {} warning(s) left before messages like this are blocked.",
        reason, remaining
    )
}

// ========== Moderation logs ==========

#[derive(Deserialize)]
struct ModerationLogsQuery {
    limit: Option<u32>,
}

async fn moderation_logs(
    State(state): State<AppState>,
    Query(query): Query<ModerationLogsQuery>,
) -> Result<Json<Vec<ModerationLogEntry>>, ApiError> {
    let logs = state
        .db
        .recent_moderation_logs(query.limit.unwrap_or(crate::database::MAX_AUDIT_PAGE))
        .await
        .map_err(api_error)?;

    Ok(Json(logs))
}

// ========== Reports ==========

#[derive(Deserialize)]
struct ReportRequest {
    reason: Option<String>,
    details: Option<String>,
    #[serde(rename = "reporterName")]
    reporter_name: Option<String>,
    #[serde(rename = "reporterRole")]
    reporter_role: Option<String>,
}

async fn report_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Json(body): Json<ReportRequest>,
) -> Result<(StatusCode, Json<crate::reports::MessageReport>), ApiError> {
    let reason = non_empty(body.reason, "reason")?;
    let reporter_name = non_empty(body.reporter_name, "reporterName")?;
    let reporter_role = parse_role(body.reporter_role.as_deref())?;

    let report = state
        .reports
        .report_message(
            message_id,
            &reporter_name,
            reporter_role,
            &reason,
            body.details.as_deref(),
        )
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(report)))
}

// ========== Creator settings ==========

#[derive(Serialize)]
struct CreatorSettingsResponse {
    #[serde(rename = "creatorName")]
    creator_name: String,
    #[serde(rename = "autoBlockThreshold")]
    auto_block_threshold: u32,
}

impl From<CreatorSettings> for CreatorSettingsResponse {
    fn from(settings: CreatorSettings) -> Self {
        Self {
            creator_name: settings.creator_name,
            auto_block_threshold: settings.auto_block_threshold,
        }
    }
}

async fn get_creator_settings(
    State(state): State<AppState>,
    Path(creator_name): Path<String>,
) -> Result<Json<CreatorSettingsResponse>, ApiError> {
    let settings = state
        .db
        .get_creator_settings(&creator_name)
        .await
        .map_err(api_error)?;

    Ok(Json(settings.into()))
}

#[derive(Deserialize)]
struct UpdateCreatorSettingsRequest {
    #[serde(rename = "autoBlockThreshold")]
    auto_block_threshold: Option<u32>,
}

async fn update_creator_settings(
    State(state): State<AppState>,
    Path(creator_name): Path<String>,
    Json(body): Json<UpdateCreatorSettingsRequest>,
) -> Result<Json<CreatorSettingsResponse>, ApiError> {
    let Some(threshold) = body.auto_block_threshold else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "autoBlockThreshold is required",
        ));
    };

    let settings = CreatorSettings {
        creator_name,
        auto_block_threshold: threshold,
    };
    state
        .db
        .set_creator_settings(&settings)
        .await
        .map_err(api_error)?;

    Ok(Json(settings.into()))
}

// ========== Health ==========

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    build_timestamp: &'static str,
    commit: &'static str,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.db.health_check().await.map_err(api_error)?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        commit: env!("GIT_COMMIT"),
    }))
}

// ========== Helpers ==========

fn non_empty(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("{} is required", field),
        )),
    }
}

/// The limit is in characters, not bytes, so multibyte text is not
/// penalized.
fn validate_content_length(content: &str) -> Result<(), ApiError> {
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("content must be at most {} characters", MAX_MESSAGE_LENGTH),
        ));
    }
    Ok(())
}

fn parse_role(value: Option<&str>) -> Result<SenderType, ApiError> {
    value
        .unwrap_or("")
        .parse()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "role must be creator or buyer"))
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/moderation-logs", get(moderation_logs))
        .route("/api/messages/{id}/report", post(report_message))
        .route(
            "/api/creators/{name}/settings",
            get(get_creator_settings).put(update_creator_settings),
        )
        .route("/health", get(health))
        .layer(RequestLoggingLayer)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_match_error_kinds() {
        let (status, _) = api_error(ChaperoneError::Validation("bad".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = api_error(ChaperoneError::NotFound("Message".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = api_error(ChaperoneError::DuplicateReport);
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = api_error(ChaperoneError::Database("down".to_string()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = api_error(ChaperoneError::RateLimited { retry_after_ms: 1000 });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn non_empty_rejects_blank_and_missing() {
        assert!(non_empty(None, "content").is_err());
        assert!(non_empty(Some("   ".to_string()), "content").is_err());
        assert_eq!(
            non_empty(Some("hi".to_string()), "content").expect("should pass"),
            "hi"
        );
    }

    #[test]
    fn parse_role_accepts_both_roles_only() {
        assert_eq!(parse_role(Some("creator")).expect("valid"), SenderType::Creator);
        assert_eq!(parse_role(Some("buyer")).expect("valid"), SenderType::Buyer);
        assert!(parse_role(Some("admin")).is_err());
        assert!(parse_role(None).is_err());
    }

    #[test]
    fn content_limit_counts_characters_not_bytes() {
        // 1500 three-byte characters: 4500 bytes, well under the limit.
        let multibyte = "\u{3042}".repeat(1500);
        assert!(validate_content_length(&multibyte).is_ok());

        let at_limit = "a".repeat(MAX_MESSAGE_LENGTH);
        assert!(validate_content_length(&at_limit).is_ok());

        let over = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(validate_content_length(&over).is_err());
    }

    #[test]
    fn blocked_response_carries_advisory() {
        let verdict = Verdict::block(
            crate::models::ViolationCategory::Threats,
            "Threatening language",
        );
        let body = BlockedResponse {
            error: "Message blocked by moderation",
            reason: verdict.reason,
            category: verdict.category,
            severity: verdict.severity,
            action: verdict.action,
            warning: BLOCKED_ADVISORY,
        };

        let json = serde_json::to_value(&body).expect("should serialize");
        assert_eq!(
            json["warning"],
            "Sharing contact information or attempting to take business off-platform is not allowed. Repeated violations may result in account restrictions."
        );
        assert_eq!(json["action"], "block");
        assert_eq!(json["category"], "threats");
    }

    #[test]
    fn warning_message_carries_remaining_count() {
        let verdict = Verdict::warn(
            crate::models::ViolationCategory::OffPlatform,
            "Phone number detected",
            1,
        );
        let msg = warning_message(&verdict);
        assert!(msg.contains("Phone number detected"));
        assert!(msg.contains("1 warning(s)"));
    }
}
