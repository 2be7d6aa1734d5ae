//! Reloadable directory of systems, talkgroups, tags, groups and API keys
//!
//! The directory is an immutable arena keyed by the stable numeric references
//! clients and uploads already use. A reload builds a whole new arena and
//! swaps it behind the store handle, so readers never observe a half-applied
//! epoch and references are never cached across a reload.

use crate::types::{ApiKey, Group, Scope, System, SystemRef, Tag, Talkgroup, TalkgroupRef};
use crate::utils;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// One immutable configuration epoch
#[derive(Debug, Default)]
pub struct Directory {
    systems: Vec<System>,
    tags: Vec<Tag>,
    groups: Vec<Group>,
    api_keys: Vec<ApiKey>,

    system_index: HashMap<SystemRef, usize>,
    talkgroup_index: HashMap<(SystemRef, TalkgroupRef), (usize, usize)>,
    tag_index: HashMap<i64, usize>,
    group_index: HashMap<i64, usize>,
}

impl Directory {
    /// Build an epoch from its parts, indexing every reference
    #[must_use]
    pub fn new(
        systems: Vec<System>,
        tags: Vec<Tag>,
        groups: Vec<Group>,
        api_keys: Vec<ApiKey>,
    ) -> Self {
        let mut system_index = HashMap::with_capacity(systems.len());
        let mut talkgroup_index = HashMap::new();

        for (si, system) in systems.iter().enumerate() {
            system_index.insert(system.id, si);
            for (ti, talkgroup) in system.talkgroups.iter().enumerate() {
                talkgroup_index.insert((system.id, talkgroup.id), (si, ti));
            }
        }

        let tag_index = tags.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let group_index = groups.iter().enumerate().map(|(i, g)| (g.id, i)).collect();

        Self {
            systems,
            tags,
            groups,
            api_keys,
            system_index,
            talkgroup_index,
            tag_index,
            group_index,
        }
    }

    /// All systems in display order
    #[must_use]
    pub fn systems(&self) -> &[System] {
        &self.systems
    }

    /// All tags in display order
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// All groups in display order
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Look up a system by reference
    #[must_use]
    pub fn system(&self, system: SystemRef) -> Option<&System> {
        self.system_index.get(&system).map(|i| &self.systems[*i])
    }

    /// Look up a talkgroup by (system, talkgroup) reference pair
    #[must_use]
    pub fn talkgroup(&self, system: SystemRef, talkgroup: TalkgroupRef) -> Option<&Talkgroup> {
        self.talkgroup_index
            .get(&(system, talkgroup))
            .map(|(si, ti)| &self.systems[*si].talkgroups[*ti])
    }

    /// Whether the (system, talkgroup) pair exists in this epoch
    #[must_use]
    pub fn has_talkgroup(&self, system: SystemRef, talkgroup: TalkgroupRef) -> bool {
        self.talkgroup_index.contains_key(&(system, talkgroup))
    }

    /// Look up a tag by id
    #[must_use]
    pub fn tag(&self, id: i64) -> Option<&Tag> {
        self.tag_index.get(&id).map(|i| &self.tags[*i])
    }

    /// Look up a group by id
    #[must_use]
    pub fn group(&self, id: i64) -> Option<&Group> {
        self.group_index.get(&id).map(|i| &self.groups[*i])
    }

    /// Whether uploads for this talkgroup are rejected at ingest
    #[must_use]
    pub fn is_blacklisted(&self, system: SystemRef, talkgroup: TalkgroupRef) -> bool {
        self.system(system)
            .is_some_and(|s| s.blacklist.contains(&talkgroup))
    }

    /// Find an enabled API key matching the presented secret
    #[must_use]
    pub fn api_key(&self, presented: &str) -> Option<&ApiKey> {
        let hash = utils::hash_key(presented);
        self.api_keys
            .iter()
            .find(|key| key.enabled && key.key_hash == hash)
    }

    /// Resolve the tag and group labels a call inherits from its talkgroup
    #[must_use]
    pub fn resolve_memberships(
        &self,
        system: SystemRef,
        talkgroup: TalkgroupRef,
    ) -> (Option<String>, Vec<String>, Vec<i64>) {
        let Some(tg) = self.talkgroup(system, talkgroup) else {
            return (None, Vec::new(), Vec::new());
        };

        let tag = tg
            .tag_id
            .and_then(|id| self.tag(id))
            .map(|t| t.label.clone());

        let mut labels = Vec::with_capacity(tg.group_ids.len());
        let mut ids = Vec::with_capacity(tg.group_ids.len());
        for gid in &tg.group_ids {
            if let Some(group) = self.group(*gid) {
                labels.push(group.label.clone());
                ids.push(*gid);
            }
        }

        (tag, labels, ids)
    }

    /// Expand a tag label to every (system, talkgroup) pair carrying it
    #[must_use]
    pub fn talkgroups_for_tag(&self, label: &str) -> Vec<(SystemRef, TalkgroupRef)> {
        let Some(tag) = self.tags.iter().find(|t| t.label == label) else {
            return Vec::new();
        };

        let mut pairs = Vec::new();
        for system in &self.systems {
            for tg in &system.talkgroups {
                if tg.tag_id == Some(tag.id) {
                    pairs.push((system.id, tg.id));
                }
            }
        }
        pairs
    }

    /// Expand a group label to every (system, talkgroup) pair belonging to it
    #[must_use]
    pub fn talkgroups_for_group(&self, label: &str) -> Vec<(SystemRef, TalkgroupRef)> {
        let Some(group) = self.groups.iter().find(|g| g.label == label) else {
            return Vec::new();
        };

        let mut pairs = Vec::new();
        for system in &self.systems {
            for tg in &system.talkgroups {
                if tg.group_ids.contains(&group.id) {
                    pairs.push((system.id, tg.id));
                }
            }
        }
        pairs
    }

    /// The configuration snapshot visible to clients, scoped to a user's ACL
    ///
    /// API keys and blacklists never leave the server.
    #[must_use]
    pub fn visible_config(&self, systems: &Scope, talkgroups: &Scope) -> serde_json::Value {
        let systems: Vec<serde_json::Value> = self
            .systems
            .iter()
            .filter(|s| systems.contains(s.id))
            .map(|s| {
                let talkgroups: Vec<serde_json::Value> = s
                    .talkgroups
                    .iter()
                    .filter(|tg| talkgroups.contains(tg.id))
                    .map(|tg| {
                        json!({
                            "id": tg.id,
                            "label": tg.label,
                            "name": tg.name,
                            "tag": tg.tag_id.and_then(|id| self.tag(id)).map(|t| &t.label),
                            "groups": tg
                                .group_ids
                                .iter()
                                .filter_map(|id| self.group(*id))
                                .map(|g| &g.label)
                                .collect::<Vec<_>>(),
                        })
                    })
                    .collect();

                json!({
                    "id": s.id,
                    "label": s.label,
                    "kind": s.kind,
                    "talkgroups": talkgroups,
                })
            })
            .collect();

        json!({
            "systems": systems,
            "tags": self.tags,
            "groups": self.groups,
        })
    }
}

/// Process-wide handle to the current directory epoch
///
/// Readers call [`DirectoryStore::current`] once per operation and keep the
/// returned `Arc` for its duration; a concurrent reload never invalidates it.
#[derive(Debug)]
pub struct DirectoryStore {
    inner: RwLock<Arc<Directory>>,
}

impl DirectoryStore {
    /// Install an initial epoch
    #[must_use]
    pub fn new(directory: Directory) -> Self {
        Self {
            inner: RwLock::new(Arc::new(directory)),
        }
    }

    /// The current epoch
    #[must_use]
    pub fn current(&self) -> Arc<Directory> {
        Arc::clone(&self.inner.read())
    }

    /// Atomically replace the epoch
    pub fn reload(&self, directory: Directory) {
        let mut guard = self.inner.write();
        *guard = Arc::new(directory);
        tracing::info!(
            systems = guard.systems.len(),
            tags = guard.tags.len(),
            groups = guard.groups.len(),
            "directory reloaded"
        );
    }
}

impl Default for DirectoryStore {
    fn default() -> Self {
        Self::new(Directory::default())
    }
}
