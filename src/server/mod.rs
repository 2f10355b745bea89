//! HTTP server setup and request plumbing.
//!
//! # Responsibilities
//! - Create the axum Router with a catch-all entry route
//! - Wire up middleware (tracing, request timeout)
//! - Extract request facts (verb, path, headers, client address, body)
//! - Run the dispatcher inside a panic supervisor
//! - Convert the buffered response state into an HTTP response, applying
//!   output throttling when the matched route asked for it
//!
//! # Design Decisions
//! - One catch-all axum route; all real routing happens in the dispatcher
//! - Any panic escaping dispatch is converted into a bare 500 rather than
//!   tearing down the connection task

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use futures_util::FutureExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::App;
use crate::dispatch::context::RequestContext;
use crate::dispatch::throttled_stream;
use crate::hive::RequestFacts;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY: usize = 2 * 1024 * 1024;

impl App {
    /// Serve the application on the given listener until ctrl-c.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        serve(self, listener).await
    }
}

pub async fn serve(app: App, listener: TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    let router = Router::new()
        .route("/", any(entry))
        .route("/{*path}", any(entry))
        .with_state(app)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http());

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn entry(
    State(app): State<App>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let facts = match extract_facts(addr, request).await {
        Ok(facts) => facts,
        Err(status) => return plain_response(status, "request rejected"),
    };
    tracing::debug!(
        request_id = %request_id,
        method = %facts.verb,
        path = %facts.path,
        "dispatching"
    );

    // supervisor boundary: a panic that escapes dispatch becomes a 500
    match std::panic::AssertUnwindSafe(app.dispatch(facts))
        .catch_unwind()
        .await
    {
        Ok((mut ctx, _result)) => into_response(&mut ctx),
        Err(_) => {
            tracing::error!(request_id = %request_id, "dispatch panicked");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

async fn extract_facts(
    addr: SocketAddr,
    request: Request<Body>,
) -> Result<RequestFacts, StatusCode> {
    let (parts, body) = request.into_parts();
    let mut verb = parts.method.as_str().to_uppercase();
    let mut headers = Vec::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            headers.push((name.as_str().to_string(), value.to_string()));
        }
    }
    if let Some(over) = parts
        .headers
        .get("x-http-method-override")
        .and_then(|v| v.to_str().ok())
    {
        verb = over.to_uppercase();
    }
    let scheme = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| *v == "https")
        .unwrap_or("http")
        .to_string();
    let host_header = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let (host, host_port) = match host_header.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => {
            (host.to_string(), port.parse::<u16>().ok())
        }
        _ => (host_header.to_string(), None),
    };
    let port = parts
        .headers
        .get("x-forwarded-port")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u16>().ok())
        .or(host_port)
        .unwrap_or(if scheme == "https" { 443 } else { 80 });

    let body = to_bytes(body, MAX_BODY)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    Ok(RequestFacts {
        verb,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().unwrap_or("").to_string(),
        fragment: String::new(),
        headers,
        scheme,
        host,
        port,
        ip: addr.ip().to_string(),
        body: body.to_vec(),
        base: String::new(),
        cli: false,
    })
}

/// Materialize the buffered response: status, headers, throttled or plain
/// body. QUIET requests and HEAD responses ship no body.
fn into_response(ctx: &mut RequestContext) -> Response {
    let quiet = ctx.hive().truthy("QUIET");
    let head = ctx.hive().get_str("VERB") == "HEAD";
    let state = ctx.hive().response.clone();

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(state.status).unwrap_or(StatusCode::OK));
    for (name, value) in &state.headers {
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::try_from(name.as_str()),
            header::HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }
    let body = if quiet || head {
        Body::empty()
    } else if state.kbps > 0 {
        Body::from_stream(throttled_stream(state.body, state.kbps))
    } else {
        Body::from(state.body)
    };
    builder
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn plain_response(status: StatusCode, text: &'static str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(text))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
