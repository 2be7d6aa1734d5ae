//! Wire messages exchanged with session clients
//!
//! Every frame is a JSON object `{"command": <name>, "payload": <value>}`.
//! Unknown inbound commands are ignored at the parse site; the outbound set
//! is closed.

use crate::search::{SearchOptions, SearchResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use wavecap_core::types::{Call, CallId, FilterMatrix, SystemRef, TalkgroupRef};
use wavecap_core::ErrorKind;

/// Fixed string sent with the single `error` frame before a forced disconnect
pub const ACCESS_REVOKED: &str = "access revoked";

/// Fixed string sent when the per-IP login penalty is active
pub const LOGIN_PENALIZED: &str = "too many failed logins, try again later";

/// Commands accepted from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Authenticate with a PIN or token
    Login(LoginRequest),
    /// Request the visible-config snapshot
    Config,
    /// Replace the filter matrix and go live
    Livefeed(FilterMatrix),
    /// Alias of `livefeed` used by older clients
    Pin(FilterMatrix),
    /// Load one archived call and play it (playback mode)
    Call(CallRequest),
    /// Run an archive search
    List(SearchOptions),
    /// Stop playback and return to the live feed
    Stop,
}

/// Credentials carried by a `login` command
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// PIN credential
    #[serde(default)]
    pub pin: Option<String>,
    /// Token credential, accepted in place of a PIN
    #[serde(default)]
    pub token: Option<String>,
}

impl LoginRequest {
    /// The secret the client presented, whichever field carried it
    #[must_use]
    pub fn secret(&self) -> Option<&str> {
        self.pin.as_deref().or(self.token.as_deref())
    }
}

/// Payload of an inbound `call` command
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CallRequest {
    /// Archived call to load
    pub id: CallId,
}

/// Commands sent to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// One call delivery (live, replayed or playback)
    Call(Box<CallPayload>),
    /// Visible-config snapshot
    Config(serde_json::Value),
    /// Search results
    List(SearchResponse),
    /// Echo of the accepted filter matrix
    LivefeedMap(FilterMatrix),
    /// Ask the client to present credentials
    Pin,
    /// Terminal or recoverable error, fixed-string payloads only
    Error(ErrorPayload),
    /// Session is ready for commands
    Ready,
}

impl OutboundMessage {
    /// Build an `error` frame carrying the fixed string for `kind`
    #[must_use]
    pub fn error(kind: ErrorKind) -> Self {
        Self::Error(ErrorPayload {
            kind: kind.as_str().to_string(),
            message: kind.client_message().to_string(),
        })
    }

    /// Build an `error` frame with an explicit fixed string
    #[must_use]
    pub fn error_with_message(kind: ErrorKind, message: &str) -> Self {
        Self::Error(ErrorPayload {
            kind: kind.as_str().to_string(),
            message: message.to_string(),
        })
    }
}

/// Payload of an outbound `error` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-parseable error kind
    pub kind: String,
    /// Fixed user-facing string
    pub message: String,
}

/// A call as delivered to clients, audio base64-encoded for JSON transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    /// Persisted call id
    pub id: CallId,
    /// Owning system reference
    pub system: SystemRef,
    /// Talkgroup reference
    pub talkgroup: TalkgroupRef,
    /// Call time, milliseconds since epoch
    pub date_time: i64,
    /// Base64 of the audio blob
    pub audio: String,
    /// Audio MIME type
    pub audio_mime: String,
    /// Audio filename
    pub audio_filename: String,
    /// Source units heard on the call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<i32>,
    /// Frequencies observed during the call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frequencies: Vec<i64>,
    /// Tag label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Group labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Transcription text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl From<&Call> for CallPayload {
    fn from(call: &Call) -> Self {
        Self {
            id: call.id,
            system: call.system_ref,
            talkgroup: call.talkgroup_ref,
            date_time: call.timestamp_ms,
            audio: BASE64.encode(&call.audio),
            audio_mime: call.audio_mime.clone(),
            audio_filename: call.audio_filename.clone(),
            sources: call.source_refs.clone(),
            frequencies: call.frequencies.clone(),
            tag: call.tag.clone(),
            groups: call.groups.clone(),
            transcript: call.transcript.clone(),
        }
    }
}

impl OutboundMessage {
    /// Wrap a call for delivery
    #[must_use]
    pub fn call(call: &Call) -> Self {
        Self::Call(Box::new(CallPayload::from(call)))
    }
}
