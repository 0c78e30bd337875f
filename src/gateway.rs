//! Local HTTP gateway: the interception surface in front of the manager.
//!
//! Every GET on a non-control path is classified and resolved through the
//! strategy table; non-GET requests are proxied to the origin untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path as RoutePath, Query, Request, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::cache::{CacheManager, Served, SqliteStorage};
use crate::config::NotificationConfig;
use crate::control::message::{self, PageMessage};
use crate::control::{push, sync};
use crate::net::HttpFetcher;
use crate::policy::{Destination, StashRequest};

type Manager = CacheManager<SqliteStorage, HttpFetcher>;

/// Largest request body forwarded through the passthrough path.
const MAX_PASSTHROUGH_BODY: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
  manager: Arc<Manager>,
  passthrough: reqwest::Client,
  notifications: NotificationConfig,
}

/// Bind and serve the gateway until the process is stopped.
pub async fn run(
  manager: Arc<Manager>,
  passthrough: reqwest::Client,
  notifications: NotificationConfig,
  addr: SocketAddr,
) -> Result<()> {
  let state = AppState {
    manager,
    passthrough,
    notifications,
  };

  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  let app = Router::new()
    .route("/_stash/health", get(health))
    .route("/_stash/message", post(control_message))
    .route("/_stash/sync/{tag}", post(control_sync))
    .route("/_stash/push", post(push_payload))
    .route("/_stash/notification-click", post(notification_click))
    .route("/_stash/events", get(events))
    .fallback(intercept)
    .layer(cors)
    .with_state(state);

  info!(%addr, "Gateway listening");
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  axum::serve(listener, app)
    .await
    .map_err(|e| eyre!("Gateway failed: {}", e))?;

  Ok(())
}

#[derive(Serialize)]
struct HealthReply {
  status: String,
  version: String,
  state: String,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
  let lifecycle = state
    .manager
    .state()
    .map(|s| format!("{:?}", s).to_lowercase())
    .unwrap_or_else(|_| "unknown".to_string());

  Json(HealthReply {
    status: "ok".to_string(),
    version: state.manager.version().to_string(),
    state: lifecycle,
  })
}

async fn control_message(
  State(state): State<AppState>,
  Json(message): Json<PageMessage>,
) -> Response {
  match message::dispatch(&state.manager, message).await {
    Ok(reply) => Json(reply).into_response(),
    Err(e) => {
      warn!(error = %e, "Control message failed");
      (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
    }
  }
}

async fn control_sync(State(state): State<AppState>, RoutePath(tag): RoutePath<String>) -> Response {
  match sync::handle_tag(&state.manager, &tag).await {
    Ok(()) => StatusCode::NO_CONTENT.into_response(),
    Err(e) => {
      warn!(tag = %tag, error = %e, "Sync failed");
      (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
    }
  }
}

/// Shape an incoming push payload into the notification to display.
async fn push_payload(State(state): State<AppState>, body: Bytes) -> Response {
  let payload = if body.is_empty() {
    None
  } else {
    Some(body.as_ref())
  };
  Json(push::shape(&state.notifications, payload)).into_response()
}

#[derive(Deserialize)]
struct ClickQuery {
  action: Option<String>,
}

/// Where a notification click should navigate, if anywhere.
async fn notification_click(Query(query): Query<ClickQuery>) -> Response {
  match push::click_target(query.action.as_deref()) {
    Some(target) => Json(serde_json::json!({ "open": target })).into_response(),
    None => StatusCode::NO_CONTENT.into_response(),
  }
}

async fn events(
  State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, axum::Error>>> {
  let rx = state.manager.notices().subscribe();
  let stream = BroadcastStream::new(rx)
    .filter_map(|notice| notice.ok())
    .map(|notice| SseEvent::default().json_data(&notice));

  Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Interception entry point for everything outside `/_stash`.
async fn intercept(State(state): State<AppState>, request: Request) -> Response {
  let method = request.method().clone();
  let path = request.uri().path().to_string();
  let path_and_query = request
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/")
    .to_string();
  let accept = request
    .headers()
    .get(ACCEPT)
    .and_then(|v| v.to_str().ok())
    .map(|s| s.to_string());

  let url = match state.manager.resolve(&path_and_query) {
    Ok(url) => url,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  // Only GET is intercepted; everything else bypasses the cache
  if method != Method::GET {
    return passthrough(&state, method, &url, request).await;
  }

  let destination = Destination::classify(&path, accept.as_deref());
  let served = state
    .manager
    .handle_request(&StashRequest { url, destination })
    .await;

  serve_response(served)
}

async fn passthrough(state: &AppState, method: Method, url: &str, request: Request) -> Response {
  let content_type = request.headers().get(CONTENT_TYPE).cloned();

  let body = match axum::body::to_bytes(request.into_body(), MAX_PASSTHROUGH_BODY).await {
    Ok(bytes) => bytes,
    Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
  };

  let method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
    Ok(method) => method,
    Err(_) => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
  };

  let mut upstream = state.passthrough.request(method, url).body(body);
  if let Some(content_type) = content_type.and_then(|v| v.to_str().map(String::from).ok()) {
    upstream = upstream.header("content-type", content_type);
  }

  match upstream.send().await {
    Ok(response) => {
      let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
      let bytes = response.bytes().await.unwrap_or_default();
      (status, bytes.to_vec()).into_response()
    }
    Err(e) => {
      warn!(url = %url, error = %e, "Passthrough failed");
      (StatusCode::BAD_GATEWAY, "Upstream unreachable".to_string()).into_response()
    }
  }
}

fn serve_response(served: Served) -> Response {
  let status = StatusCode::from_u16(served.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

  let mut builder = Response::builder().status(status);
  for (name, value) in &served.headers {
    if let (Ok(name), Ok(value)) = (
      HeaderName::try_from(name.as_str()),
      HeaderValue::try_from(value.as_str()),
    ) {
      builder = builder.header(name, value);
    }
  }

  builder
    .body(Body::from(served.body))
    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
