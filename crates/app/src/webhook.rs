use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::signature::{self, SignatureError};

pub(crate) const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub(crate) const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub(crate) const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub(crate) const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

/// Everything `encodeURIComponent` escapes: all but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `POST /`: verifies the EventSub signature, then answers by message type.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();

    let Some(provided) = headers.get(HEADER_SIGNATURE) else {
        debug!(stage = "ingress", "request without eventsub signature, acknowledging");
        return Ok(ok());
    };

    let message_id = header_value(&headers, HEADER_MESSAGE_ID).unwrap_or_default();
    let timestamp = header_value(&headers, HEADER_TIMESTAMP).unwrap_or_default();
    let message_type =
        MessageType::from(header_value(&headers, HEADER_MESSAGE_TYPE).unwrap_or_default());
    let message_label = message_type.metric_label();

    let secret = state.webhook_secret();
    let verified = match provided.to_str() {
        Ok(provided) => signature::verify(&secret, message_id, timestamp, &body, provided),
        Err(_) => Err(SignatureError::Mismatch),
    };
    if let Err(err) = verified {
        warn!(
            stage = "ingress",
            %message_id,
            message_type = message_label,
            error = %err,
            "rejected eventsub request"
        );
        counter!("eventsub_invalid_signature_total", "reason" => err.metric_label()).increment(1);
        record_latency(message_label, start);
        return Err(ProblemResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            err.problem_type(),
            err.to_string(),
        ));
    }

    counter!("eventsub_ingress_total", "type" => message_label).increment(1);

    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(stage = "ingress", %message_id, error = %err, "verified body is not valid JSON");
            None
        }
    };

    let response = match message_type {
        MessageType::Verification => {
            match payload.as_ref().and_then(|payload| payload.get("challenge")) {
                Some(challenge) => {
                    info!(stage = "ingress", %message_id, "answering verification challenge");
                    challenge_response(challenge)
                }
                None => {
                    warn!(stage = "ingress", %message_id, "verification request without challenge");
                    record_latency(message_label, start);
                    return Err(ProblemResponse::new(
                        StatusCode::FORBIDDEN,
                        "missing_challenge",
                        "verification payload must include challenge",
                    ));
                }
            }
        }
        MessageType::Revocation => {
            let subscription = payload.as_ref().and_then(|payload| payload.get("subscription"));
            let subscription_id = subscription
                .and_then(|sub| sub.get("id"))
                .and_then(|id| id.as_str())
                .unwrap_or_default();
            let status = subscription
                .and_then(|sub| sub.get("status"))
                .and_then(|status| status.as_str())
                .unwrap_or_default();
            warn!(
                stage = "ingress",
                %message_id,
                subscription_id,
                status,
                "subscription revoked by twitch"
            );
            ok()
        }
        MessageType::Notification => {
            match payload {
                Some(payload) => {
                    state.enricher().dispatch(message_id.to_string(), payload);
                }
                None => {
                    error!(
                        stage = "dispatch",
                        %message_id,
                        "notification dropped, body is not JSON"
                    );
                }
            }
            ok()
        }
        MessageType::Other(ref kind) => {
            info!(
                stage = "ingress",
                %message_id,
                message_type = %kind,
                "ignoring unhandled message type"
            );
            ok()
        }
    };

    record_latency(message_label, start);
    Ok(response)
}

fn ok() -> Response {
    (StatusCode::OK, "Ok").into_response()
}

/// Echoes the challenge percent-encoded like `encodeURIComponent`.
fn challenge_response(challenge: &Value) -> Response {
    let raw = match challenge {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        utf8_percent_encode(&raw, URI_COMPONENT).to_string(),
    )
        .into_response()
}

fn record_latency(label: &'static str, start: Instant) {
    histogram!("webhook_ack_latency_seconds", "type" => label)
        .record(start.elapsed().as_secs_f64());
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MessageType {
    Verification,
    Notification,
    Revocation,
    Other(String),
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            "webhook_callback_verification" => Self::Verification,
            "notification" => Self::Notification,
            "revocation" => Self::Revocation,
            other => Self::Other(other.to_string()),
        }
    }
}

impl MessageType {
    fn metric_label(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
            Self::Other(_) => "other",
        }
    }
}
