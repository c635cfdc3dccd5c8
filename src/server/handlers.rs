//! Route handlers and the rate-limit middleware

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::RequestInput;
use crate::app::App;
use crate::error::ProxyError;
use crate::limiter::Admission;

/// Identity used for rate limiting when the peer address is unknown
const UNKNOWN_CLIENT: &str = "unknown";

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// Proxy route, GET or POST
pub async fn proxy(
    State(app): State<App>,
    Query(query): Query<HashMap<String, String>>,
    path: Option<Path<HashMap<String, String>>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let input = RequestInput {
        query,
        body: parse_body(&body)?,
        path: path.map(|Path(params)| params).unwrap_or_default(),
    };
    let response = app.handle(input).await?;
    Ok(Json(response))
}

/// Decodes an optional JSON body; an empty body is no body
pub(crate) fn parse_body(body: &[u8]) -> Result<Option<Value>, ProxyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ProxyError::InvalidParameter(format!("Request body is not valid JSON: {}", e)))
}

/// Remote address of the request, or `unknown`
pub(crate) fn client_id(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Admits or rejects the request before it reaches the proxy route
pub async fn rate_limit(State(app): State<App>, request: Request, next: Next) -> Response {
    let client = client_id(&request);
    match app.limiter().admit(&client) {
        Admission::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if app.limiter().config().requests_per_window > 0 {
                let headers = response.headers_mut();
                if let Ok(limit) = HeaderValue::from_str(&app.limiter().config().describe()) {
                    headers.insert("x-ratelimit-limit", limit);
                }
                headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            }
            response
        }
        Admission::Denied { retry_after, limit } => {
            debug!(client = %client, "Rate limit exceeded");
            ProxyError::RateLimited { retry_after, limit }.into_response()
        }
    }
}
