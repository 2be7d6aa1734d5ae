//! User accounts and the authorization gate
//!
//! The access store keeps every account in memory behind a lock so the
//! dispatcher can evaluate ACLs without touching the database. Mutations
//! arrive from the management port; persistence is the caller's concern.

use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::types::{Call, Scope, User, UserId, UserKey};
use crate::utils;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether `user` may receive `call` under the directory epoch `directory`
///
/// The systems scope must cover the call's system and the talkgroups scope
/// its talkgroup. An enumerated talkgroups scope additionally requires the
/// talkgroup to exist in the current epoch, so orphan calls never match a
/// narrowed ACL. Group black/whitelists apply on top.
#[must_use]
pub fn authorize(user: &User, call: &Call, directory: &Directory) -> bool {
    if !user.systems.contains(call.system_ref) {
        return false;
    }

    match &user.talkgroups {
        Scope::Wildcard => {}
        Scope::Enumerated(set) => {
            if !set.contains(&call.talkgroup_ref) {
                return false;
            }
            if !directory.has_talkgroup(call.system_ref, call.talkgroup_ref) {
                return false;
            }
        }
    }

    if call.group_ids.iter().any(|g| user.group_deny.contains(g)) {
        return false;
    }

    if let Some(allow) = &user.group_allow {
        if !call.group_ids.iter().any(|g| allow.contains(g)) {
            return false;
        }
    }

    true
}

/// In-memory store of listener accounts
#[derive(Debug, Default)]
pub struct AccessStore {
    users: RwLock<HashMap<UserId, Arc<User>>>,
}

impl AccessStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every account, e.g. after a database (re)load
    pub fn replace_all(&self, users: Vec<User>) {
        let mut guard = self.users.write();
        guard.clear();
        for user in users {
            guard.insert(user.id, Arc::new(user));
        }
    }

    /// Look up an account by id
    #[must_use]
    pub fn get(&self, id: UserId) -> Option<Arc<User>> {
        self.users.read().get(&id).cloned()
    }

    /// Look up an account by identity key
    #[must_use]
    pub fn get_by_key(&self, key: &UserKey) -> Option<Arc<User>> {
        match key {
            UserKey::Id(id) => self.get(*id),
            UserKey::Pin(pin) => self.users.read().values().find(|u| u.pin == *pin).cloned(),
        }
    }

    /// All accounts, unordered
    #[must_use]
    pub fn list(&self) -> Vec<Arc<User>> {
        self.users.read().values().cloned().collect()
    }

    /// Authenticate a PIN, enforcing verification and expiry
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for an unknown, unverified or expired PIN.
    pub fn authenticate_pin(&self, pin: &str) -> Result<Arc<User>> {
        let user = self
            .users
            .read()
            .values()
            .find(|u| u.pin == pin)
            .cloned()
            .ok_or_else(|| Error::Unauthorized {
                message: "unknown PIN".to_string(),
            })?;

        if !user.verified {
            return Err(Error::Unauthorized {
                message: format!("user {} is not verified", user.id),
            });
        }

        if user.pin_expired(utils::now_ms()) {
            return Err(Error::Unauthorized {
                message: format!("PIN expired for user {}", user.id),
            });
        }

        Ok(user)
    }

    /// Insert or update an account
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when another account already holds the same PIN or
    /// email.
    pub fn upsert(&self, user: User) -> Result<Arc<User>> {
        let mut guard = self.users.write();

        let duplicate = guard.values().any(|existing| {
            existing.id != user.id
                && (existing.pin == user.pin
                    || (user.email.is_some() && existing.email == user.email))
        });
        if duplicate {
            return Err(Error::Conflict {
                message: format!("PIN or email already in use (user {})", user.id),
            });
        }

        let user = Arc::new(user);
        guard.insert(user.id, Arc::clone(&user));
        Ok(user)
    }

    /// Revoke access: bump the PIN expiry to now
    ///
    /// Revocation is a mutation, not a deletion; the account and its history
    /// remain. Returns the revoked account so the caller can tear down its
    /// sessions.
    #[must_use]
    pub fn revoke(&self, key: &UserKey) -> Option<Arc<User>> {
        let mut guard = self.users.write();

        let id = match key {
            UserKey::Id(id) => *id,
            UserKey::Pin(pin) => guard.values().find(|u| u.pin == *pin).map(|u| u.id)?,
        };

        let user = guard.get(&id)?;
        let mut revoked = (**user).clone();
        revoked.pin_expires_at_ms = utils::now_ms();
        let revoked = Arc::new(revoked);
        guard.insert(id, Arc::clone(&revoked));
        Some(revoked)
    }

    /// Remove an account entirely
    #[must_use]
    pub fn remove(&self, id: UserId) -> Option<Arc<User>> {
        self.users.write().remove(&id)
    }

    /// Apply a batch of connection-limit updates
    ///
    /// Unknown ids are skipped; the new limits bind at the next connection
    /// attempt.
    pub fn set_connection_limits(&self, updates: &[(UserId, Option<u32>)]) {
        let mut guard = self.users.write();
        for (id, limit) in updates {
            if let Some(user) = guard.get(id) {
                let mut updated = (**user).clone();
                updated.connection_limit = *limit;
                guard.insert(*id, Arc::new(updated));
            }
        }
    }
}
