//! Paginated historical search over the call archive
//!
//! The engine turns client options into a repository query: it clamps the
//! page size, applies the default look-back window to undated newest-first
//! queries, fetches one extra row to learn whether a further page exists and
//! bounds the whole thing with a wall-clock timeout. Rows whose timestamp
//! falls outside years 1..=9999 are skipped silently but still count toward
//! `hasMore`, exactly as the underlying query saw them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use wavecap_core::config::SearchConfig;
use wavecap_core::types::{
    timestamp_is_valid, Call, CallId, CallSummary, SystemRef, TalkgroupRef,
};
use wavecap_core::{utils, Error, Result};
use wavecap_database::{CallStore, SearchQuery};

/// Client-facing search options, any subset may be present
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// Reference instant, milliseconds since epoch; upper bound for
    /// newest-first queries, lower bound for oldest-first ones
    pub date: Option<i64>,
    /// Restrict to one system
    pub system: Option<SystemRef>,
    /// Restrict to one talkgroup
    pub talkgroup: Option<TalkgroupRef>,
    /// Restrict to a group label
    pub group: Option<String>,
    /// Restrict to a tag label
    pub tag: Option<String>,
    /// Page size; clamped to the configured maximum
    pub limit: Option<i64>,
    /// Rows to skip
    pub offset: i64,
    /// +1 ascending by time, -1 descending
    pub sort: i8,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            date: None,
            system: None,
            talkgroup: None,
            group: None,
            tag: None,
            limit: None,
            offset: 0,
            sort: -1,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Up to `limit` call summaries in the requested order
    pub calls: Vec<CallSummary>,
    /// Paginator affordance: `offset + len(calls)`, plus one when another
    /// page exists. Deliberately not an exact total.
    pub count: i64,
    /// Whether the store holds at least one more matching row
    pub has_more: bool,
}

/// The search/playback engine
pub struct SearchEngine {
    store: Arc<dyn CallStore>,
    config: SearchConfig,
}

impl SearchEngine {
    /// Wire the engine to the archive
    #[must_use]
    pub fn new(store: Arc<dyn CallStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Run one paginated query
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the query exceeds the configured bound (never
    /// a partial page), or whatever the store reports.
    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResponse> {
        let limit = options
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);
        let offset = options.offset.max(0);
        let sort_desc = options.sort < 1;

        let (since_ms, until_ms) = match (sort_desc, options.date) {
            (true, Some(date)) => (None, Some(date)),
            // Undated newest-first queries stay cheap on large stores
            (true, None) => (
                Some(utils::now_ms() - self.config.default_lookback_secs * 1_000),
                None,
            ),
            (false, Some(date)) => (Some(date), None),
            // Oldest-first browsing walks the whole archive
            (false, None) => (None, None),
        };

        let query = SearchQuery {
            system: options.system,
            talkgroup: options.talkgroup,
            tag: options.tag.clone(),
            group: options.group.clone(),
            mimes: None,
            since_ms,
            until_ms,
            sort_desc,
            // One extra row answers hasMore without a counting scan
            limit: limit + 1,
            offset,
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let rows = tokio::time::timeout(timeout, self.store.search(&query))
            .await
            .map_err(|_| Error::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })??;

        let has_more = rows.len() as i64 > limit;
        let calls: Vec<CallSummary> = rows
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .filter(|row| timestamp_is_valid(row.timestamp_ms))
            .collect();

        let count = offset + calls.len() as i64 + i64::from(has_more);

        Ok(SearchResponse {
            calls,
            count,
            has_more,
        })
    }

    /// Load one archived call for playback
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or whatever the store reports.
    pub async fn load_call(&self, id: CallId) -> Result<Call> {
        self.store.get(id).await
    }
}
