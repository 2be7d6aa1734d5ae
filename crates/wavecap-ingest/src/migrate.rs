//! Batch migration of legacy archive audio to opus
//!
//! Walks the call store for aac/m4a/mp3 era audio and rewrites each call via
//! `update_audio`. Per-call failures are skipped so a single bad blob never
//! aborts the batch; re-running the migration converges.

use crate::transcode::{TranscodeMetadata, Transcoder};
use std::sync::Arc;
use wavecap_core::Result;
use wavecap_database::{CallStore, SearchQuery};

/// Audio MIME types the migration rewrites
pub const LEGACY_AUDIO_MIMES: [&str; 6] = [
    "audio/mp4",
    "audio/m4a",
    "audio/aac",
    "audio/x-m4a",
    "audio/mpeg",
    "audio/mp3",
];

/// Outcome of one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Calls holding legacy audio that were examined
    pub scanned: u64,
    /// Calls rewritten to opus
    pub converted: u64,
    /// Calls whose conversion failed and were left untouched
    pub failed: u64,
    /// Bytes of legacy audio read
    pub bytes_before: u64,
    /// Bytes of opus audio written
    pub bytes_after: u64,
    /// Whether this was a dry run
    pub dry_run: bool,
}

/// The archive-to-opus migration
pub struct OpusMigration {
    store: Arc<dyn CallStore>,
    transcoder: Arc<Transcoder>,
}

impl OpusMigration {
    /// Wire the migration to the archive and an opus-configured transcoder
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>, transcoder: Arc<Transcoder>) -> Self {
        Self { store, transcoder }
    }

    /// Run the migration
    ///
    /// A dry run only counts matching calls. A live run converts in batches
    /// of `batch_size`; rows that fail conversion stay legacy and are skipped
    /// on subsequent batches within the same run.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store itself fails; conversion errors
    /// are counted in the report.
    pub async fn run(&self, batch_size: i64, dry_run: bool) -> Result<MigrationReport> {
        let mimes: Vec<String> = LEGACY_AUDIO_MIMES.iter().map(ToString::to_string).collect();
        let mut report = MigrationReport {
            dry_run,
            ..MigrationReport::default()
        };

        loop {
            // Converted rows stop matching the mime filter, so the offset
            // only needs to step over rows that failed and stayed legacy.
            let offset = i64::try_from(report.failed).unwrap_or(i64::MAX);
            let batch = self
                .store
                .search(&SearchQuery {
                    mimes: Some(mimes.clone()),
                    sort_desc: false,
                    limit: batch_size.max(1),
                    offset: if dry_run {
                        i64::try_from(report.scanned).unwrap_or(i64::MAX)
                    } else {
                        offset
                    },
                    ..SearchQuery::default()
                })
                .await?;

            if batch.is_empty() {
                break;
            }

            report.scanned += batch.len() as u64;

            if dry_run {
                continue;
            }

            for summary in batch {
                let call = self.store.get(summary.id).await?;
                report.bytes_before += call.audio.len() as u64;

                let metadata = TranscodeMetadata {
                    system_label: String::new(),
                    talkgroup_label: String::new(),
                    talkgroup_name: String::new(),
                    tag: call.tag.clone(),
                    timestamp_ms: call.timestamp_ms,
                };

                match self
                    .transcoder
                    .convert(&call.audio, &call.audio_filename, &metadata)
                    .await
                {
                    Ok(output) => {
                        report.bytes_after += output.audio.len() as u64;
                        self.store
                            .update_audio(call.id, output.audio, output.mime, &output.filename)
                            .await?;
                        report.converted += 1;
                    }
                    Err(e) => {
                        tracing::warn!(call_id = call.id, error = %e, "opus migration skipped call");
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            converted = report.converted,
            failed = report.failed,
            dry_run = report.dry_run,
            "opus migration finished"
        );

        Ok(report)
    }
}
