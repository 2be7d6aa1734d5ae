//! Call ingest pipeline for wavecap
//!
//! Uploads are validated against the current directory epoch, optionally
//! re-encoded, persisted, post-processed and announced to the dispatcher, in
//! that order. Persistence is the only step that can fail an accepted upload;
//! transcoding degrades to the original audio and hooks run detached.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod hooks;
pub mod migrate;
pub mod transcode;

pub use hooks::{CallHook, KeywordFlagHook};
pub use migrate::{MigrationReport, OpusMigration};
pub use transcode::{TranscodeMetadata, Transcoder};

use std::sync::Arc;
use tokio::sync::mpsc;
use wavecap_core::types::{timestamp_is_valid, Call, CallId, NewCall, SystemRef, TalkgroupRef};
use wavecap_core::{DirectoryStore, Error, Result};
use wavecap_database::CallStore;

/// An upload as it arrives from a recorder, before validation
#[derive(Debug, Clone)]
pub struct RawCall {
    /// Presented API key secret
    pub api_key: String,
    /// Target system reference
    pub system_ref: SystemRef,
    /// Target talkgroup reference
    pub talkgroup_ref: TalkgroupRef,
    /// Call time, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Uploaded audio bytes
    pub audio: Vec<u8>,
    /// Declared audio MIME type
    pub audio_mime: String,
    /// Uploaded filename
    pub audio_filename: String,
    /// Receive site, when the recorder reports one
    pub site_ref: Option<i32>,
    /// Source units heard on the call
    pub source_refs: Vec<i32>,
    /// Frequencies observed during the call
    pub frequencies: Vec<i64>,
}

/// The ingest pipeline: validate, normalize, persist, announce
pub struct IngestPipeline {
    directory: Arc<DirectoryStore>,
    store: Arc<dyn CallStore>,
    transcoder: Arc<Transcoder>,
    hooks: Vec<Arc<dyn CallHook>>,
    announce: mpsc::Sender<Arc<Call>>,
}

impl IngestPipeline {
    /// Wire the pipeline to its collaborators
    ///
    /// `announce` is the persisted-call feed consumed by the dispatcher.
    #[must_use]
    pub fn new(
        directory: Arc<DirectoryStore>,
        store: Arc<dyn CallStore>,
        transcoder: Arc<Transcoder>,
        hooks: Vec<Arc<dyn CallHook>>,
        announce: mpsc::Sender<Arc<Call>>,
    ) -> Self {
        Self {
            directory,
            store,
            transcoder,
            hooks,
            announce,
        }
    }

    /// Accept one upload
    ///
    /// # Errors
    ///
    /// - `Unauthorized` for a missing or disabled API key
    /// - `Forbidden` when the key's scope excludes the system, or the
    ///   talkgroup is blacklisted
    /// - `NotFound` for an unknown system
    /// - `InvalidArgument` for an out-of-range timestamp or empty audio
    /// - `Transient` when persistence fails
    pub async fn ingest(&self, raw: RawCall) -> Result<CallId> {
        let directory = self.directory.current();

        let key = directory
            .api_key(&raw.api_key)
            .ok_or_else(|| Error::Unauthorized {
                message: "unknown or disabled API key".to_string(),
            })?;

        if !key.systems.contains(raw.system_ref) {
            return Err(Error::Forbidden {
                message: format!(
                    "API key {} may not upload for system {}",
                    key.id, raw.system_ref
                ),
            });
        }

        let system = directory
            .system(raw.system_ref)
            .ok_or_else(|| Error::NotFound {
                resource: format!("system {}", raw.system_ref),
            })?;

        if directory.is_blacklisted(raw.system_ref, raw.talkgroup_ref) {
            return Err(Error::Forbidden {
                message: format!(
                    "talkgroup {} is blacklisted on system {}",
                    raw.talkgroup_ref, raw.system_ref
                ),
            });
        }

        if !timestamp_is_valid(raw.timestamp_ms) {
            return Err(Error::InvalidArgument {
                field: "dateTime".to_string(),
                message: format!("timestamp {} is outside years 1..=9999", raw.timestamp_ms),
            });
        }

        if raw.audio.is_empty() {
            return Err(Error::InvalidArgument {
                field: "audio".to_string(),
                message: "audio must not be empty".to_string(),
            });
        }

        // Orphan talkgroups may persist; memberships resolve to nothing
        let (tag, groups, group_ids) =
            directory.resolve_memberships(raw.system_ref, raw.talkgroup_ref);

        let mut call = NewCall {
            system_ref: raw.system_ref,
            talkgroup_ref: raw.talkgroup_ref,
            timestamp_ms: raw.timestamp_ms,
            site_ref: raw.site_ref,
            source_refs: raw.source_refs,
            frequencies: raw.frequencies,
            audio: raw.audio,
            audio_mime: raw.audio_mime,
            audio_filename: raw.audio_filename,
            transcript: None,
            tag,
            groups,
            group_ids,
        };

        if self.transcoder.is_active() {
            let metadata = TranscodeMetadata {
                system_label: system.label.clone(),
                talkgroup_label: directory
                    .talkgroup(call.system_ref, call.talkgroup_ref)
                    .map(|tg| tg.label.clone())
                    .unwrap_or_default(),
                talkgroup_name: directory
                    .talkgroup(call.system_ref, call.talkgroup_ref)
                    .map(|tg| tg.name.clone())
                    .unwrap_or_default(),
                tag: call.tag.clone(),
                timestamp_ms: call.timestamp_ms,
            };

            match self
                .transcoder
                .convert(&call.audio, &call.audio_filename, &metadata)
                .await
            {
                Ok(output) => {
                    call.audio = output.audio;
                    call.audio_mime = output.mime.to_string();
                    call.audio_filename = output.filename;
                }
                Err(e) => {
                    tracing::warn!(
                        system = call.system_ref,
                        talkgroup = call.talkgroup_ref,
                        error = %e,
                        "audio conversion failed, keeping original audio"
                    );
                }
            }
        }

        let id = self.store.append(&call).await?;
        let call = Arc::new(call.into_call(id));

        tracing::info!(
            call_id = id,
            system = call.system_ref,
            talkgroup = call.talkgroup_ref,
            bytes = call.audio.len(),
            "call persisted"
        );

        hooks::run_hooks(&self.hooks, &call);

        // The feed is sized for bursts; a lagging dispatcher applies
        // backpressure here, never the session outboxes.
        if self.announce.send(call).await.is_err() {
            tracing::error!(call_id = id, "dispatcher feed closed, call not announced");
        }

        Ok(id)
    }
}
