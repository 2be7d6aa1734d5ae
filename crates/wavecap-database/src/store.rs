//! Call repository contract and the in-memory reference implementation
//!
//! Every backend guarantees strictly increasing call ids, atomic appends and
//! the ordering semantics the search engine relies on. The in-memory store
//! backs the unit and integration suites; the Postgres store in
//! [`crate::queries`] is the production backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use wavecap_core::types::{Call, CallId, CallSummary, NewCall, SystemRef, TalkgroupRef};
use wavecap_core::{Error, Result};

/// Filters and paging for a repository-level search
///
/// This is the storage contract, not the client one: the search engine
/// derives windows, limits and the extra has-more row before building it.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Restrict to one system
    pub system: Option<SystemRef>,
    /// Restrict to one talkgroup (meaningful with `system`)
    pub talkgroup: Option<TalkgroupRef>,
    /// Restrict to calls carrying this tag label
    pub tag: Option<String>,
    /// Restrict to calls belonging to this group label
    pub group: Option<String>,
    /// Restrict to calls whose audio MIME is one of these
    pub mimes: Option<Vec<String>>,
    /// Inclusive lower bound on the call timestamp, milliseconds
    pub since_ms: Option<i64>,
    /// Inclusive upper bound on the call timestamp, milliseconds
    pub until_ms: Option<i64>,
    /// Newest-first when true, oldest-first otherwise
    pub sort_desc: bool,
    /// Maximum rows returned
    pub limit: i64,
    /// Rows skipped before the first returned one
    pub offset: i64,
}

impl SearchQuery {
    fn matches(&self, row: &Call) -> bool {
        if self.system.is_some_and(|s| s != row.system_ref) {
            return false;
        }
        if self.talkgroup.is_some_and(|t| t != row.talkgroup_ref) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if row.tag.as_deref() != Some(tag.as_str()) {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if !row.groups.iter().any(|g| g == group) {
                return false;
            }
        }
        if let Some(mimes) = &self.mimes {
            if !mimes.iter().any(|m| *m == row.audio_mime) {
                return false;
            }
        }
        if self.since_ms.is_some_and(|since| row.timestamp_ms < since) {
            return false;
        }
        if self.until_ms.is_some_and(|until| row.timestamp_ms > until) {
            return false;
        }
        true
    }
}

/// The persisted call archive
///
/// Implementations guarantee monotonically increasing ids, atomic `append`,
/// and `search` ordering by (timestamp, id) in the requested direction.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Persist a call, assigning the next id
    async fn append(&self, call: &NewCall) -> Result<CallId>;

    /// Fetch one call including its audio
    async fn get(&self, id: CallId) -> Result<Call>;

    /// Query summaries under the given filters and paging
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CallSummary>>;

    /// Replace the audio of a persisted call (migration path)
    async fn update_audio(
        &self,
        id: CallId,
        audio: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<()>;

    /// Delete calls by id, returning how many existed
    async fn delete(&self, ids: &[CallId]) -> Result<u64>;
}

/// In-memory call store used by tests and local tooling
#[derive(Debug, Default)]
pub struct MemoryCallStore {
    rows: Mutex<Vec<Call>>,
    next_id: AtomicI64,
}

impl MemoryCallStore {
    /// Create an empty store; the first call gets id 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn append(&self, call: &NewCall) -> Result<CallId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().push(call.clone().into_call(id));
        Ok(id)
    }

    async fn get(&self, id: CallId) -> Result<Call> {
        self.rows
            .lock()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                resource: format!("call {id}"),
            })
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CallSummary>> {
        let rows = self.rows.lock();

        let mut matched: Vec<&Call> = rows.iter().filter(|c| query.matches(c)).collect();
        if query.sort_desc {
            matched.sort_by(|a, b| (b.timestamp_ms, b.id).cmp(&(a.timestamp_ms, a.id)));
        } else {
            matched.sort_by(|a, b| (a.timestamp_ms, a.id).cmp(&(b.timestamp_ms, b.id)));
        }

        let offset = usize::try_from(query.offset.max(0)).unwrap_or(0);
        let limit = usize::try_from(query.limit.max(0)).unwrap_or(0);

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(CallSummary::from)
            .collect())
    }

    async fn update_audio(
        &self,
        id: CallId,
        audio: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        let call = rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound {
                resource: format!("call {id}"),
            })?;

        call.audio = audio;
        call.audio_mime = mime.to_string();
        call.audio_filename = filename.to_string();
        Ok(())
    }

    async fn delete(&self, ids: &[CallId]) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|c| !ids.contains(&c.id));
        Ok((before - rows.len()) as u64)
    }
}
