//! Logging setup for the binaries and a middleware for logging emulator requests and responses.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// The JSON fields whose values are never written to the log.
const REDACTED_FIELDS: [&str; 2] = ["password", "token"];

/// The longest body, in bytes, that is logged at the `info` level.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

/// Install a global subscriber that writes to stderr.
///
/// The filter is read from the environment variable `env_var` using the
/// `tracing_subscriber` directive syntax, e.g. `BUDGET_LOG=debug`, falling back
/// to `default_directive` when the variable is unset or invalid.
pub fn init_logging(env_var: &str, default_directive: &str) {
    let filter =
        EnvFilter::try_from_env(env_var).unwrap_or_else(|_| EnvFilter::new(default_directive));

    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if let Err(error) = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_log)
        .try_init()
    {
        eprintln!("could not install the logger: {error}");
    }
}

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level with the
/// values of password and token fields in JSON bodies replaced by asterisks.
/// If a body is longer than [LOG_BODY_LENGTH_LIMIT] bytes, it is truncated and
/// the full body is logged at the `debug` level.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!("could not read the request body: {error}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let display_text = body_display_text(&parts.headers, &body_bytes);
    tracing::info!(
        "Received request: {} {}\nbody: {}",
        parts.method,
        parts.uri,
        truncate(&display_text)
    );
    tracing::debug!("Full request body: {display_text:?}");

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!("could not read the response body: {error}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let display_text = body_display_text(&parts.headers, &body_bytes);
    tracing::info!(
        "Sending response: {}\nbody: {}",
        parts.status,
        truncate(&display_text)
    );
    tracing::debug!("Full response body: {display_text:?}");

    Response::from_parts(parts, Body::from(body_bytes))
}

fn body_display_text(headers: &HeaderMap, body: &Bytes) -> String {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if !is_json {
        return String::from_utf8_lossy(body).into_owned();
    }

    // Malformed JSON cannot be redacted, so only its size is logged.
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            redact_secrets(&mut value);
            value.to_string()
        }
        Err(_) => format!("<{} bytes of malformed JSON>", body.len()),
    }
}

/// Replace the values of password and token fields anywhere in `value`.
fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    *field = Value::String("********".to_owned());
                } else {
                    redact_secrets(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= LOG_BODY_LENGTH_LIMIT {
        return text.to_owned();
    }

    let mut end = LOG_BODY_LENGTH_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &text[..end])
}
