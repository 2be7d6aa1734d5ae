//! The management port
//!
//! External management components (admin routes, provisioning sync) drive
//! user lifecycle through this facade. Mutations apply to the in-memory
//! access store first and write through to the database when a pool is
//! attached; revocation tears down every session the user owns.

use crate::commands;
use crate::registry::SessionRegistry;
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use wavecap_core::types::{User, UserKey};
use wavecap_core::{AccessStore, DirectoryStore, Error, ErrorKind, Result};
use wavecap_database::{PgPool, UserQueries};

/// Facade over user and directory administration
pub struct Management {
    access: Arc<AccessStore>,
    registry: Arc<SessionRegistry>,
    directory: Arc<DirectoryStore>,
    pool: RwLock<Option<PgPool>>,
    pin_min_length: usize,
}

impl Management {
    /// Wire the port to the stores it administers
    #[must_use]
    pub fn new(
        access: Arc<AccessStore>,
        registry: Arc<SessionRegistry>,
        directory: Arc<DirectoryStore>,
        pin_min_length: usize,
    ) -> Self {
        Self {
            access,
            registry,
            directory,
            pool: RwLock::new(None),
            pin_min_length,
        }
    }

    /// Attach a database pool so mutations persist
    pub fn attach_pool(&self, pool: PgPool) {
        *self.pool.write() = Some(pool);
    }

    fn pool(&self) -> Option<PgPool> {
        self.pool.read().clone()
    }

    /// Create or update an account
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a too-short PIN, `Conflict` for a
    /// duplicate PIN or email, or a database error.
    pub async fn grant_or_update_user(&self, user: User) -> Result<Arc<User>> {
        if user.pin.len() < self.pin_min_length {
            return Err(Error::InvalidArgument {
                field: "pin".to_string(),
                message: format!("PIN must be at least {} characters", self.pin_min_length),
            });
        }

        let stored = self.access.upsert(user)?;
        if let Some(pool) = self.pool() {
            UserQueries::upsert(&pool, &stored).await?;
        }

        tracing::info!(user = stored.id, "user granted or updated");
        Ok(stored)
    }

    /// Revoke a user's access and disconnect every session they own
    ///
    /// The PIN expiry is bumped to now, each open session receives one
    /// `error` frame with the fixed revocation string, and the transports
    /// close. Returns the number of sessions torn down.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown identity, or a database error.
    pub async fn revoke_user(&self, key: &UserKey) -> Result<usize> {
        let user = self.access.revoke(key).ok_or_else(|| Error::NotFound {
            resource: format!("user {key}"),
        })?;

        if let Some(pool) = self.pool() {
            UserQueries::set_pin_expiry(&pool, user.id, user.pin_expires_at_ms).await?;
        }

        let sessions = self.registry.sessions_for_user(user.id);
        let count = sessions.len();
        for session in sessions {
            session.close_with_error(ErrorKind::Forbidden, commands::ACCESS_REVOKED);
        }

        tracing::info!(user = user.id, sessions = count, "user revoked");
        Ok(count)
    }

    /// Apply a batch of connection-limit changes
    ///
    /// New limits bind at each user's next connection attempt.
    ///
    /// # Errors
    ///
    /// Returns a database error when persistence fails; the in-memory store
    /// is already updated at that point and will reconcile on next load.
    pub async fn batch_update_connection_limit(
        &self,
        updates: &[(i64, Option<u32>)],
    ) -> Result<()> {
        self.access.set_connection_limits(updates);
        if let Some(pool) = self.pool() {
            UserQueries::set_connection_limits(&pool, updates).await?;
        }
        Ok(())
    }

    /// Every known account
    #[must_use]
    pub fn list_users(&self) -> Vec<Arc<User>> {
        let mut users = self.access.list();
        users.sort_by_key(|u| u.id);
        users
    }

    /// The full directory snapshot for administrators
    #[must_use]
    pub fn list_systems_talkgroups_groups(&self) -> serde_json::Value {
        let directory = self.directory.current();
        json!({
            "systems": directory.systems(),
            "tags": directory.tags(),
            "groups": directory.groups(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use crate::commands::OutboundMessage;
    use crate::session::SessionState;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::net::{IpAddr, Ipv4Addr};
    use wavecap_core::directory::Directory;
    use wavecap_core::types::Scope;

    fn test_user(id: i64, pin: &str) -> User {
        User {
            id,
            pin: pin.into(),
            email: None,
            systems: Scope::Wildcard,
            talkgroups: Scope::Wildcard,
            group_allow: None,
            group_deny: BTreeSet::new(),
            connection_limit: None,
            pin_expires_at_ms: 0,
            verified: true,
        }
    }

    fn management() -> (Management, Arc<AccessStore>, Arc<SessionRegistry>) {
        let access = Arc::new(AccessStore::new());
        let registry = Arc::new(SessionRegistry::new(8));
        let management = Management::new(
            Arc::clone(&access),
            Arc::clone(&registry),
            Arc::new(DirectoryStore::new(Directory::default())),
            4,
        );
        (management, access, registry)
    }

    #[tokio::test]
    async fn test_grant_validates_pin_length() {
        let (m, _access, _registry) = management();

        let result = m.grant_or_update_user(test_user(1, "12")).await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));

        assert!(m.grant_or_update_user(test_user(1, "1234")).await.is_ok());
    }

    #[tokio::test]
    async fn test_grant_conflicts_on_duplicate_pin() {
        let (m, _access, _registry) = management();

        m.grant_or_update_user(test_user(1, "1234")).await.unwrap();
        let result = m.grant_or_update_user(test_user(2, "1234")).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_revoke_disconnects_all_owned_sessions() {
        let (m, access, registry) = management();
        access.replace_all(vec![test_user(7, "7777")]);

        let user = access.get(7).unwrap();
        let (a, mut rx_a) = registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
        a.set_user(Arc::clone(&user));
        a.set_state(SessionState::Live);
        let (b, mut rx_b) = registry.open(IpAddr::V4(Ipv4Addr::LOCALHOST));
        b.set_user(Arc::clone(&user));
        b.set_state(SessionState::Live);

        let closed = m.revoke_user(&UserKey::Id(7)).await.unwrap();
        assert_eq!(closed, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.outbox.try_recv() {
                Ok(OutboundMessage::Error(payload)) => {
                    assert_eq!(payload.message, commands::ACCESS_REVOKED);
                }
                other => panic!("expected revocation error, got {other:?}"),
            }
            assert!(rx.outbox.try_recv().is_err(), "exactly one frame");
            assert!(*rx.shutdown.borrow());
        }

        // Access is gone for new logins too
        assert!(access.authenticate_pin("7777").is_err());
    }

    #[tokio::test]
    async fn test_revoke_unknown_user_is_not_found() {
        let (m, _access, _registry) = management();
        let result = m.revoke_user(&UserKey::Id(404)).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_batch_connection_limits() {
        let (m, access, _registry) = management();
        access.replace_all(vec![test_user(1, "1111"), test_user(2, "2222")]);

        m.batch_update_connection_limit(&[(1, Some(4)), (2, None)])
            .await
            .unwrap();

        assert_eq!(access.get(1).unwrap().connection_limit, Some(4));
        assert_eq!(access.get(2).unwrap().connection_limit, None);
    }

    #[tokio::test]
    async fn test_list_users_sorted() {
        let (m, access, _registry) = management();
        access.replace_all(vec![test_user(3, "3333"), test_user(1, "1111")]);

        let users = m.list_users();
        assert_eq!(users.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
