//! SCEP over HTTP
//!
//! `GET|POST {/, /scep, /cgi-bin/pkiclient.exe}?operation=...`

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn, Instrument};

use crate::scep::ScepService;

/// Maximum time to receive a request body
pub const REQUEST_BODY_TIMEOUT: Duration = Duration::from_secs(60);
/// Maximum time to handle a request and produce the response. Covers a full
/// ACME order at the longest accepted propagation delay.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(360);

const CONTENT_TYPE_CAPS: &str = "text/plain";
const CONTENT_TYPE_CA_CERT: &str = "application/x-x509-ca-cert";
const CONTENT_TYPE_CA_RA_CERT: &str = "application/x-x509-ca-ra-cert";
const CONTENT_TYPE_PKI_MESSAGE: &str = "application/x-pki-message";

type SharedService = Arc<dyn ScepService>;

#[derive(Debug, Default, Deserialize)]
pub struct ScepQuery {
    operation: Option<String>,
    message: Option<String>,
}

/// Build the SCEP router around `service`.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/", get(handle_get).post(handle_post))
        .route("/scep", get(handle_get).post(handle_post))
        .route("/cgi-bin/pkiclient.exe", get(handle_get).post(handle_post))
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyTimeoutLayer::new(REQUEST_BODY_TIMEOUT))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    REQUEST_TIMEOUT,
                )),
        )
}

async fn handle_get(State(service): State<SharedService>, Query(query): Query<ScepQuery>) -> Response {
    dispatch(service, query, None).await
}

async fn handle_post(
    State(service): State<SharedService>,
    Query(query): Query<ScepQuery>,
    body: Bytes,
) -> Response {
    dispatch(service, query, Some(body)).await
}

async fn dispatch(service: SharedService, query: ScepQuery, body: Option<Bytes>) -> Response {
    let operation = query.operation.unwrap_or_default();
    let span = crate::scep_span!(operation);

    async move {
        match operation.as_str() {
            "GetCACaps" => match service.get_ca_caps().await {
                Ok(caps) => ok(CONTENT_TYPE_CAPS, caps),
                Err(e) => internal_error(&operation, e),
            },
            "GetCACert" => {
                let message = query.message.unwrap_or_default();
                match service.get_ca_cert(&message).await {
                    Ok((body, 1)) => ok(CONTENT_TYPE_CA_CERT, body),
                    Ok((body, _)) => ok(CONTENT_TYPE_CA_RA_CERT, body),
                    Err(e) => internal_error(&operation, e),
                }
            }
            "PKIOperation" => {
                let data = match body {
                    Some(body) => body.to_vec(),
                    None => match decode_message(query.message.as_deref()) {
                        Some(data) => data,
                        None => {
                            warn!("PKIOperation message is missing or not base64");
                            return bad_request("invalid PKIOperation message");
                        }
                    },
                };
                match service.pki_operation(&data).await {
                    Ok(reply) => ok(CONTENT_TYPE_PKI_MESSAGE, reply),
                    Err(e) => internal_error(&operation, e),
                }
            }
            other => {
                warn!(operation = %other, "unknown SCEP operation");
                bad_request("unknown operation")
            }
        }
    }
    .instrument(span)
    .await
}

/// Decode a GET `message` parameter. Form decoding turns unescaped `+` into
/// spaces, so those are restored first.
fn decode_message(message: Option<&str>) -> Option<Vec<u8>> {
    let message = message?.trim().replace(' ', "+");
    STANDARD.decode(message).ok()
}

fn ok(content_type: &'static str, body: Vec<u8>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn internal_error(operation: &str, error: crate::Error) -> Response {
    error!(operation = %operation, error = %error, "SCEP operation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::issuance_budget;
    use crate::config::MAX_PROPAGATION_DELAY_SECS;

    #[test]
    fn enrollment_fits_in_request_timeout() {
        let longest = issuance_budget(Duration::from_secs(MAX_PROPAGATION_DELAY_SECS));
        assert!(longest < REQUEST_TIMEOUT, "{longest:?} exceeds {REQUEST_TIMEOUT:?}");
    }

    #[test]
    fn decode_message_restores_plus_signs() {
        let encoded = STANDARD.encode([0xfb, 0xef, 0xbe]);
        assert_eq!(encoded, "++++");
        assert_eq!(decode_message(Some("++++")), Some(vec![0xfb, 0xef, 0xbe]));
        assert_eq!(decode_message(Some("+ ++")), Some(vec![0xfb, 0xef, 0xbe]));
        assert_eq!(decode_message(Some("not base64!")), None);
        assert_eq!(decode_message(None), None);
    }
}
