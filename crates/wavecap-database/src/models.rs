//! Database row types and conversions to the core model
//!
//! Scopes and other irregular values (wildcard-or-list) are stored as JSON
//! text columns and parsed at the boundary, so the rest of the workspace only
//! ever sees the typed forms.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use wavecap_core::types::{
    ApiKey, Call, CallSummary, Group, Scope, System, SystemKind, Tag, Talkgroup, User,
};
use wavecap_core::{Error, Result};

fn parse_scope(text: &str) -> Result<Scope> {
    serde_json::from_str(text).map_err(|e| Error::Internal {
        message: format!("malformed scope column {text:?}: {e}"),
    })
}

/// Full call row including the audio blob
#[derive(Debug, Clone, FromRow)]
pub struct CallRow {
    /// Monotonic call id
    pub id: i64,
    /// Owning system reference
    pub system_ref: i32,
    /// Talkgroup reference
    pub talkgroup_ref: i32,
    /// Call time in milliseconds since epoch
    pub timestamp_ms: i64,
    /// Receive site
    pub site_ref: Option<i32>,
    /// Source units
    pub source_refs: Vec<i32>,
    /// Observed frequencies in Hz
    pub frequencies: Vec<i64>,
    /// Audio blob
    pub audio: Vec<u8>,
    /// Audio MIME type
    pub audio_mime: String,
    /// Audio filename
    pub audio_filename: String,
    /// Transcription text
    pub transcript: Option<String>,
    /// Resolved tag label
    pub tag: Option<String>,
    /// Resolved group labels
    pub groups: Vec<String>,
    /// Resolved group ids
    pub group_ids: Vec<i64>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

impl From<CallRow> for Call {
    fn from(row: CallRow) -> Self {
        Self {
            id: row.id,
            system_ref: row.system_ref,
            talkgroup_ref: row.talkgroup_ref,
            timestamp_ms: row.timestamp_ms,
            site_ref: row.site_ref,
            source_refs: row.source_refs,
            frequencies: row.frequencies,
            audio: row.audio,
            audio_mime: row.audio_mime,
            audio_filename: row.audio_filename,
            transcript: row.transcript,
            tag: row.tag,
            groups: row.groups,
            group_ids: row.group_ids,
        }
    }
}

/// Call row without the audio blob, as selected by search
#[derive(Debug, Clone, FromRow)]
pub struct CallSummaryRow {
    /// Monotonic call id
    pub id: i64,
    /// Owning system reference
    pub system_ref: i32,
    /// Talkgroup reference
    pub talkgroup_ref: i32,
    /// Call time in milliseconds since epoch
    pub timestamp_ms: i64,
    /// Audio MIME type
    pub audio_mime: String,
    /// Audio filename
    pub audio_filename: String,
    /// Resolved tag label
    pub tag: Option<String>,
    /// Resolved group labels
    pub groups: Vec<String>,
    /// Transcription text
    pub transcript: Option<String>,
}

impl From<CallSummaryRow> for CallSummary {
    fn from(row: CallSummaryRow) -> Self {
        Self {
            id: row.id,
            system_ref: row.system_ref,
            talkgroup_ref: row.talkgroup_ref,
            timestamp_ms: row.timestamp_ms,
            audio_mime: row.audio_mime,
            audio_filename: row.audio_filename,
            tag: row.tag,
            groups: row.groups,
            transcript: row.transcript,
        }
    }
}

/// Listener account row
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// User id
    pub id: i64,
    /// Login PIN
    pub pin: String,
    /// Contact address
    pub email: Option<String>,
    /// Systems scope as JSON text
    pub systems: String,
    /// Talkgroups scope as JSON text
    pub talkgroups: String,
    /// Group whitelist as JSON text, null for none
    pub group_allow: Option<String>,
    /// Group blacklist as JSON text
    pub group_deny: String,
    /// Session cap
    pub connection_limit: Option<i32>,
    /// PIN expiry, milliseconds since epoch, zero for never
    pub pin_expires_at_ms: i64,
    /// Verification flag
    pub verified: bool,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let group_allow = row
            .group_allow
            .as_deref()
            .map(|text| {
                serde_json::from_str(text).map_err(|e| Error::Internal {
                    message: format!("malformed group_allow column: {e}"),
                })
            })
            .transpose()?;

        let group_deny = serde_json::from_str(&row.group_deny).map_err(|e| Error::Internal {
            message: format!("malformed group_deny column: {e}"),
        })?;

        Ok(Self {
            id: row.id,
            pin: row.pin,
            email: row.email,
            systems: parse_scope(&row.systems)?,
            talkgroups: parse_scope(&row.talkgroups)?,
            group_allow,
            group_deny,
            connection_limit: row.connection_limit.map(|l| l.unsigned_abs()),
            pin_expires_at_ms: row.pin_expires_at_ms,
            verified: row.verified,
        })
    }
}

/// Uploader API key row
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    /// Key id
    pub id: i64,
    /// Hex SHA-256 of the key material
    pub key_hash: String,
    /// Description
    pub label: String,
    /// Whether the key is accepted
    pub enabled: bool,
    /// Systems scope as JSON text
    pub systems: String,
}

impl TryFrom<ApiKeyRow> for ApiKey {
    type Error = Error;

    fn try_from(row: ApiKeyRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            key_hash: row.key_hash,
            label: row.label,
            enabled: row.enabled,
            systems: parse_scope(&row.systems)?,
        })
    }
}

/// Radio system row
#[derive(Debug, Clone, FromRow)]
pub struct SystemRow {
    /// System reference
    pub id: i32,
    /// Display label
    pub label: String,
    /// `conventional` or `trunked`
    pub kind: String,
    /// Blacklisted talkgroups as JSON text
    pub blacklist: String,
    /// Display order
    pub display_order: i32,
}

/// Talkgroup row
#[derive(Debug, Clone, FromRow)]
pub struct TalkgroupRow {
    /// Owning system reference
    pub system_ref: i32,
    /// Talkgroup reference
    pub talkgroup_ref: i32,
    /// Short label
    pub label: String,
    /// Full name
    pub name: String,
    /// Owning tag
    pub tag_id: Option<i64>,
    /// Group memberships as JSON text
    pub group_ids: String,
    /// Nominal frequency
    pub frequency: Option<i64>,
    /// Display order
    pub display_order: i32,
}

/// Tag row
#[derive(Debug, Clone, FromRow)]
pub struct TagRow {
    /// Tag id
    pub id: i64,
    /// Display label
    pub label: String,
    /// Display order
    pub display_order: i32,
    /// Display color
    pub color: Option<String>,
}

impl From<TagRow> for Tag {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            order: row.display_order.unsigned_abs(),
            color: row.color,
        }
    }
}

/// Group row
#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    /// Group id
    pub id: i64,
    /// Display label
    pub label: String,
    /// Display order
    pub display_order: i32,
    /// Display color
    pub color: Option<String>,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            order: row.display_order.unsigned_abs(),
            color: row.color,
        }
    }
}

/// Assemble systems from their rows and grouped talkgroup rows
///
/// Talkgroup rows must be ordered by display order; systems keep that order.
///
/// # Errors
///
/// Returns an error when a JSON text column is malformed.
pub fn assemble_systems(
    system_rows: Vec<SystemRow>,
    talkgroup_rows: Vec<TalkgroupRow>,
) -> Result<Vec<System>> {
    let mut systems = Vec::with_capacity(system_rows.len());

    for row in system_rows {
        let kind = match row.kind.as_str() {
            "conventional" => SystemKind::Conventional,
            "trunked" => SystemKind::Trunked,
            other => {
                return Err(Error::Internal {
                    message: format!("unknown system kind {other:?} for system {}", row.id),
                });
            }
        };

        let blacklist = serde_json::from_str(&row.blacklist).map_err(|e| Error::Internal {
            message: format!("malformed blacklist column for system {}: {e}", row.id),
        })?;

        let talkgroups = talkgroup_rows
            .iter()
            .filter(|tg| tg.system_ref == row.id)
            .map(|tg| {
                let group_ids =
                    serde_json::from_str(&tg.group_ids).map_err(|e| Error::Internal {
                        message: format!(
                            "malformed group_ids column for talkgroup {}/{}: {e}",
                            tg.system_ref, tg.talkgroup_ref
                        ),
                    })?;
                Ok(Talkgroup {
                    id: tg.talkgroup_ref,
                    label: tg.label.clone(),
                    name: tg.name.clone(),
                    tag_id: tg.tag_id,
                    group_ids,
                    frequency: tg.frequency,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        systems.push(System {
            id: row.id,
            label: row.label,
            kind,
            talkgroups,
            sites: Vec::new(),
            units: Vec::new(),
            blacklist,
        });
    }

    Ok(systems)
}
