//! Call-upload handler
//!
//! Recorders post either a multipart form or a JSON envelope. This route is
//! deliberately outside the general rate limiter (uploaders burst hard); the
//! API-key check inside the pipeline is the only gate.

use crate::handlers::error_response;
use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;
use wavecap_core::utils;
use wavecap_core::Error;
use wavecap_ingest::RawCall;

/// JSON envelope accepted as an alternative to the multipart form
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadEnvelope {
    /// API key secret
    #[validate(length(min = 1, max = 255))]
    pub key: String,
    /// Target system reference
    pub system: i32,
    /// Target talkgroup reference
    pub talkgroup: i32,
    /// Call time: epoch milliseconds, epoch seconds or RFC 3339
    pub date_time: serde_json::Value,
    /// Base64 of the audio bytes
    pub audio: String,
    /// Audio filename
    #[validate(length(min = 1, max = 255))]
    pub audio_name: String,
    /// Declared audio MIME type
    #[serde(default)]
    pub audio_type: Option<String>,
    /// Frequencies observed during the call
    #[serde(default)]
    pub frequencies: Vec<i64>,
    /// Source units heard on the call
    #[serde(default)]
    pub sources: Vec<i32>,
    /// Receive site
    #[serde(default)]
    pub site: Option<i32>,
}

/// Fields accumulated while walking a multipart form
#[derive(Default)]
struct FormCall {
    key: Option<String>,
    system: Option<i32>,
    talkgroup: Option<i32>,
    timestamp_ms: Option<i64>,
    audio: Option<Vec<u8>>,
    audio_name: Option<String>,
    audio_type: Option<String>,
    frequencies: Vec<i64>,
    sources: Vec<i32>,
    site: Option<i32>,
    test: bool,
}

/// Parse a recorder-supplied timestamp field
///
/// Accepts epoch milliseconds, epoch seconds (scaled up) or RFC 3339 text.
fn parse_datetime(text: &str) -> Option<i64> {
    if let Ok(value) = text.parse::<i64>() {
        // Anything below ~1973 in milliseconds is treated as seconds
        if value.abs() < 100_000_000_000 {
            return Some(value * 1_000);
        }
        return Some(value);
    }

    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn parse_datetime_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| parse_datetime(&v.to_string())),
        serde_json::Value::String(s) => parse_datetime(s),
        _ => None,
    }
}

/// Handle one call upload, multipart or JSON
pub async fn handle_call_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let raw = if content_type.starts_with("multipart/form-data") {
        match Multipart::from_request(request, &state).await {
            Ok(multipart) => match collect_multipart(multipart).await {
                Ok(Collected::Call(raw)) => raw,
                Ok(Collected::Test) => {
                    return (
                        StatusCode::OK,
                        Json(serde_json::json!({"status": "ok", "callId": "test"})),
                    )
                        .into_response();
                }
                Err(e) => return error_response(&e),
            },
            Err(_) => {
                return error_response(&Error::InvalidArgument {
                    field: "body".to_string(),
                    message: "malformed multipart form".to_string(),
                });
            }
        }
    } else {
        match axum::extract::Json::<UploadEnvelope>::from_request(request, &state).await {
            Ok(axum::extract::Json(envelope)) => match envelope_to_raw(envelope) {
                Ok(raw) => raw,
                Err(e) => return error_response(&e),
            },
            Err(e) => {
                return error_response(&Error::InvalidArgument {
                    field: "body".to_string(),
                    message: format!("malformed JSON envelope: {e}"),
                });
            }
        }
    };

    match state.ingest.ingest(raw).await {
        Ok(call_id) => (
            StatusCode::OK,
            Json(serde_json::json!({ "callId": call_id })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

use axum::extract::FromRequest;

enum Collected {
    Call(RawCall),
    Test,
}

async fn collect_multipart(mut multipart: Multipart) -> Result<Collected, Error> {
    let mut form = FormCall::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::InvalidArgument {
            field: "body".to_string(),
            message: format!("invalid multipart field: {e}"),
        }
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "audio" => {
                form.audio_name = field.file_name().map(String::from);
                if form.audio_type.is_none() {
                    form.audio_type = field.content_type().map(String::from);
                }
                let bytes = field.bytes().await.map_err(|e| Error::InvalidArgument {
                    field: "audio".to_string(),
                    message: format!("failed to read audio field: {e}"),
                })?;
                form.audio = Some(bytes.to_vec());
            }
            "key" => {
                if let Ok(text) = field.text().await {
                    form.key = Some(text);
                }
            }
            "system" => {
                if let Ok(text) = field.text().await {
                    form.system = text.trim().parse().ok();
                }
            }
            "talkgroup" => {
                if let Ok(text) = field.text().await {
                    form.talkgroup = text.trim().parse().ok();
                }
            }
            "dateTime" | "datetime" => {
                if let Ok(text) = field.text().await {
                    form.timestamp_ms = parse_datetime(text.trim());
                }
            }
            "audioName" => {
                if let Ok(text) = field.text().await {
                    if !text.is_empty() {
                        form.audio_name = Some(text);
                    }
                }
            }
            "audioType" => {
                if let Ok(text) = field.text().await {
                    if !text.is_empty() {
                        form.audio_type = Some(text);
                    }
                }
            }
            "frequencies" | "freqList" => {
                if let Ok(text) = field.text().await {
                    if let Ok(list) = serde_json::from_str::<Vec<i64>>(&text) {
                        form.frequencies = list;
                    }
                }
            }
            "sources" => {
                if let Ok(text) = field.text().await {
                    if let Ok(list) = serde_json::from_str::<Vec<i32>>(&text) {
                        form.sources = list;
                    }
                }
            }
            "site" => {
                if let Ok(text) = field.text().await {
                    form.site = text.trim().parse().ok();
                }
            }
            "test" => {
                if let Ok(text) = field.text().await {
                    form.test = !text.is_empty() && text != "0";
                }
            }
            // Recorders send extra fields; ignore them for compatibility
            _ => {}
        }
    }

    if form.test {
        return Ok(Collected::Test);
    }

    let missing = |field: &str| Error::InvalidArgument {
        field: field.to_string(),
        message: "required field missing".to_string(),
    };

    Ok(Collected::Call(RawCall {
        api_key: form.key.ok_or_else(|| missing("key"))?,
        system_ref: form.system.ok_or_else(|| missing("system"))?,
        talkgroup_ref: form.talkgroup.ok_or_else(|| missing("talkgroup"))?,
        timestamp_ms: form.timestamp_ms.ok_or_else(|| Error::InvalidArgument {
            field: "dateTime".to_string(),
            message: "missing or unparseable timestamp".to_string(),
        })?,
        audio: form.audio.ok_or_else(|| missing("audio"))?,
        audio_mime: form
            .audio_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        audio_filename: form
            .audio_name
            .unwrap_or_else(|| format!("call-{}.bin", utils::now_ms())),
        site_ref: form.site,
        source_refs: form.sources,
        frequencies: form.frequencies,
    }))
}

fn envelope_to_raw(envelope: UploadEnvelope) -> Result<RawCall, Error> {
    envelope.validate().map_err(|e| Error::InvalidArgument {
        field: "body".to_string(),
        message: e.to_string(),
    })?;

    let timestamp_ms =
        parse_datetime_value(&envelope.date_time).ok_or_else(|| Error::InvalidArgument {
            field: "dateTime".to_string(),
            message: "missing or unparseable timestamp".to_string(),
        })?;

    let audio = BASE64
        .decode(envelope.audio.as_bytes())
        .map_err(|e| Error::InvalidArgument {
            field: "audio".to_string(),
            message: format!("audio is not valid base64: {e}"),
        })?;

    Ok(RawCall {
        api_key: envelope.key,
        system_ref: envelope.system,
        talkgroup_ref: envelope.talkgroup,
        timestamp_ms,
        audio,
        audio_mime: envelope
            .audio_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        audio_filename: envelope.audio_name,
        site_ref: envelope.site,
        source_refs: envelope.sources,
        frequencies: envelope.frequencies,
    })
}
