//! Core data types for the wavecap server

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};

/// System reference type (stable external id of a radio system)
pub type SystemRef = i32;

/// Talkgroup reference type (unique within a system)
pub type TalkgroupRef = i32;

/// Persisted call identifier, assigned monotonically by the call store
pub type CallId = i64;

/// User identifier type
pub type UserId = i64;

/// Smallest storable call timestamp, milliseconds since the Unix epoch
/// (year 1)
pub const MIN_CALL_TIMESTAMP_MS: i64 = -62_135_596_800_000;

/// Largest storable call timestamp, milliseconds since the Unix epoch
/// (year 9999)
pub const MAX_CALL_TIMESTAMP_MS: i64 = 253_402_300_799_999;

/// Whether a millisecond timestamp falls in the representable year range
/// 1..=9999. Historical rows holding microsecond-magnitude values fail this.
#[must_use]
pub const fn timestamp_is_valid(millis: i64) -> bool {
    millis >= MIN_CALL_TIMESTAMP_MS && millis <= MAX_CALL_TIMESTAMP_MS
}

/// An access scope: everything, or an enumerated set of references
///
/// Serialized as the string `"*"` or as a JSON array of references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Matches every reference
    Wildcard,
    /// Matches only the enumerated references
    Enumerated(BTreeSet<i32>),
}

impl Scope {
    /// Whether the scope covers `reference`
    #[must_use]
    pub fn contains(&self, reference: i32) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Enumerated(set) => set.contains(&reference),
        }
    }

    /// Whether this is the wildcard scope
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::Wildcard
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Wildcard => serializer.serialize_str("*"),
            Self::Enumerated(set) => set.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(BTreeSet<i32>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s == "*" => Ok(Self::Wildcard),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or a list of references, got {s:?}"
            ))),
            Raw::List(set) => Ok(Self::Enumerated(set)),
        }
    }
}

/// Kind of radio system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    /// Conventional (fixed-frequency) system
    Conventional,
    /// Trunked system
    Trunked,
}

/// A receive site of a trunked system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Site reference within the system
    pub id: i32,
    /// Display label
    pub label: String,
}

/// A known radio unit of a system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit reference within the system
    pub id: i32,
    /// Display label
    pub label: String,
}

/// A talkgroup within a system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Talkgroup {
    /// Talkgroup reference, unique within the owning system
    pub id: TalkgroupRef,

    /// Short display label
    pub label: String,

    /// Full name
    pub name: String,

    /// Owning tag, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<i64>,

    /// Group memberships, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<i64>,

    /// Nominal frequency in Hz, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,
}

/// A radio system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    /// Stable external reference
    pub id: SystemRef,

    /// Display label
    pub label: String,

    /// Conventional or trunked
    pub kind: SystemKind,

    /// Talkgroups in display order
    pub talkgroups: Vec<Talkgroup>,

    /// Receive sites
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sites: Vec<Site>,

    /// Known units
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,

    /// Talkgroups whose uploads are rejected at ingest
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blacklist: BTreeSet<TalkgroupRef>,
}

/// A labeled tag used by UI filters and search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag identifier
    pub id: i64,
    /// Display label
    pub label: String,
    /// Display order
    #[serde(default)]
    pub order: u32,
    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A labeled group used by UI filters and search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier
    pub id: i64,
    /// Display label
    pub label: String,
    /// Display order
    #[serde(default)]
    pub order: u32,
    /// Display color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// An uploader API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key identifier
    pub id: i64,

    /// Hex-encoded SHA-256 of the key material
    pub key_hash: String,

    /// Description of the key
    pub label: String,

    /// Whether the key is accepted at ingest
    pub enabled: bool,

    /// Systems this key may upload for
    pub systems: Scope,
}

/// A registered listener account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,

    /// Short opaque login secret
    pub pin: String,

    /// Contact address, unique when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Systems the user may receive
    pub systems: Scope,

    /// Talkgroups the user may receive
    pub talkgroups: Scope,

    /// Group whitelist; when present, at least one of the call's groups must
    /// be listed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_allow: Option<BTreeSet<i64>>,

    /// Group blacklist; any overlap with the call's groups denies it
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub group_deny: BTreeSet<i64>,

    /// Maximum simultaneous sessions, unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_limit: Option<u32>,

    /// PIN expiry as milliseconds since epoch, zero means never
    #[serde(default)]
    pub pin_expires_at_ms: i64,

    /// Whether the account passed verification
    #[serde(default)]
    pub verified: bool,
}

impl User {
    /// Whether the PIN is expired at `now_ms`
    #[must_use]
    pub const fn pin_expired(&self, now_ms: i64) -> bool {
        self.pin_expires_at_ms != 0 && self.pin_expires_at_ms <= now_ms
    }
}

/// Identity key for a user, preferring the numeric id over the PIN
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    /// Keyed by numeric user id
    Id(UserId),
    /// Keyed by PIN, for accounts without a numeric id
    Pin(String),
}

impl UserKey {
    /// Build the key for a user, preferring the numeric id
    #[must_use]
    pub fn for_user(user: &User) -> Self {
        if user.id != 0 {
            Self::Id(user.id)
        } else {
            Self::Pin(user.pin.clone())
        }
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Pin(pin) => write!(f, "pin:{pin}"),
        }
    }
}

/// A persisted call recording with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Store-assigned monotonic identifier
    pub id: CallId,

    /// Owning system reference
    pub system_ref: SystemRef,

    /// Talkgroup reference within the system
    pub talkgroup_ref: TalkgroupRef,

    /// Call time, milliseconds since the Unix epoch
    pub timestamp_ms: i64,

    /// Receive site, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_ref: Option<i32>,

    /// Source units heard on the call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<i32>,

    /// Frequencies observed during the call, in Hz
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frequencies: Vec<i64>,

    /// Audio blob
    pub audio: Vec<u8>,

    /// Audio MIME type
    pub audio_mime: String,

    /// Audio filename
    pub audio_filename: String,

    /// Transcription text, when post-processing produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// Tag label resolved from the talkgroup at ingest time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Group labels resolved from the talkgroup at ingest time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Group ids resolved from the talkgroup at ingest time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_ids: Vec<i64>,
}

/// A call that has not yet been persisted; the store assigns the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCall {
    /// Owning system reference
    pub system_ref: SystemRef,
    /// Talkgroup reference within the system
    pub talkgroup_ref: TalkgroupRef,
    /// Call time, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Receive site, when known
    pub site_ref: Option<i32>,
    /// Source units heard on the call
    pub source_refs: Vec<i32>,
    /// Frequencies observed during the call, in Hz
    pub frequencies: Vec<i64>,
    /// Audio blob
    pub audio: Vec<u8>,
    /// Audio MIME type
    pub audio_mime: String,
    /// Audio filename
    pub audio_filename: String,
    /// Transcription text
    pub transcript: Option<String>,
    /// Tag label resolved at ingest
    pub tag: Option<String>,
    /// Group labels resolved at ingest
    pub groups: Vec<String>,
    /// Group ids resolved at ingest
    pub group_ids: Vec<i64>,
}

impl NewCall {
    /// Attach the store-assigned id, producing the persisted form
    #[must_use]
    pub fn into_call(self, id: CallId) -> Call {
        Call {
            id,
            system_ref: self.system_ref,
            talkgroup_ref: self.talkgroup_ref,
            timestamp_ms: self.timestamp_ms,
            site_ref: self.site_ref,
            source_refs: self.source_refs,
            frequencies: self.frequencies,
            audio: self.audio,
            audio_mime: self.audio_mime,
            audio_filename: self.audio_filename,
            transcript: self.transcript,
            tag: self.tag,
            groups: self.groups,
            group_ids: self.group_ids,
        }
    }
}

/// A call row without the audio blob, as returned by search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    /// Store-assigned identifier
    pub id: CallId,
    /// Owning system reference
    pub system_ref: SystemRef,
    /// Talkgroup reference within the system
    pub talkgroup_ref: TalkgroupRef,
    /// Call time, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Audio MIME type
    pub audio_mime: String,
    /// Audio filename
    pub audio_filename: String,
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

impl From<&Call> for CallSummary {
    fn from(call: &Call) -> Self {
        Self {
            id: call.id,
            system_ref: call.system_ref,
            talkgroup_ref: call.talkgroup_ref,
            timestamp_ms: call.timestamp_ms,
            audio_mime: call.audio_mime.clone(),
            audio_filename: call.audio_filename.clone(),
            tag: call.tag.clone(),
            groups: call.groups.clone(),
            transcript: call.transcript.clone(),
        }
    }
}

/// Per-session filter matrix: `system -> talkgroup -> enabled`
///
/// A call passes iff the entry for its (system, talkgroup) pair exists and is
/// true. The matrix is client-driven; the server only evaluates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterMatrix(pub HashMap<SystemRef, HashMap<TalkgroupRef, bool>>);

impl FilterMatrix {
    /// An empty matrix that accepts nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the matrix accepts the (system, talkgroup) pair
    #[must_use]
    pub fn accepts(&self, system: SystemRef, talkgroup: TalkgroupRef) -> bool {
        self.0
            .get(&system)
            .and_then(|talkgroups| talkgroups.get(&talkgroup))
            .copied()
            .unwrap_or(false)
    }

    /// Set one entry
    pub fn set(&mut self, system: SystemRef, talkgroup: TalkgroupRef, enabled: bool) {
        self.0.entry(system).or_default().insert(talkgroup, enabled);
    }

    /// Whether any entry is enabled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self
            .0
            .values()
            .any(|talkgroups| talkgroups.values().any(|enabled| *enabled))
    }
}

/// Audio normalization profile applied during transcoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// Audio is stored as uploaded
    #[default]
    Disabled,
    /// Broadcast loudness, minimal band filtering
    Conservative,
    /// Recommended loudness, gentle band filtering
    Standard,
    /// Dispatcher-optimized loudness, moderate band filtering
    Aggressive,
    /// Very loud, tight band filtering
    Maximum,
}

/// Target audio codec for transcoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    /// Opus in an Ogg container
    #[default]
    Opus,
    /// AAC in a fragmented MP4 container
    Aac,
}
