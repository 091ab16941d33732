//! The daemon's HTTP surface: four routes behind auth, request-id, logging,
//! gzip, panic recovery and a request timeout.

pub mod auth;
pub mod error;
pub mod tls;

use std::{sync::Arc, time::Duration};

use axum::{
    error_handling::HandleErrorLayer,
    extract::{FromRequest, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use proxops_common::{
    api::{EditUsersRequest, ErrorBody, StartRequest, StartResponse, StatusResponse},
    error::Error,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
    CompressionLevel,
};
use tracing::info_span;

use crate::{service::NodeService, supervisor::PlatformSupervisor};

use self::{
    auth::{require_auth, AuthState},
    error::ApiError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const GZIP_LEVEL: CompressionLevel = CompressionLevel::Precise(2);

type Service = Arc<NodeService<PlatformSupervisor>>;

/// Json extractor whose rejections map to the API error shape (415 for
/// content type, 400 for body problems).
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct AppJson<T>(T);

pub fn router(service: Service, auth: AuthState) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/editUsers", post(edit_users))
        .layer(middleware::from_fn_with_state(auth, require_auth))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        info_span!(
                            "request",
                            %request_id,
                            method = %request.method(),
                            uri = %request.uri(),
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::new())
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new().gzip(true).quality(GZIP_LEVEL)),
        )
        .with_state(service)
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, Json<ErrorBody>) {
    if err.is::<tower::timeout::error::Elapsed>() {
        return (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorBody {
                message: "Request timed out".to_string(),
                details: None,
            }),
        );
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: "Internal server error".to_string(),
            details: Some(err.to_string()),
        }),
    )
}

async fn start(
    State(service): State<Service>,
    AppJson(request): AppJson<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let properties = service.start(request.users).await?;
    Ok(Json(StartResponse { properties }))
}

async fn stop(State(service): State<Service>) -> Result<Json<Value>, ApiError> {
    service.stop().await?;
    Ok(Json(json!({})))
}

async fn status(State(service): State<Service>) -> Result<Json<StatusResponse>, ApiError> {
    let service_status = service.status().await?;
    Ok(Json(StatusResponse { service_status }))
}

async fn edit_users(
    State(service): State<Service>,
    AppJson(request): AppJson<EditUsersRequest>,
) -> Result<Json<Value>, ApiError> {
    service.edit_users(&request.add, &request.remove).await?;
    Ok(Json(json!({})))
}

/// Serve plaintext until shutdown.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Service(format!("http server: {e}")))
}
