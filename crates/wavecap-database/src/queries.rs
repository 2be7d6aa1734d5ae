//! Postgres query operations for wavecap

use crate::models::{
    assemble_systems, ApiKeyRow, CallRow, CallSummaryRow, GroupRow, SystemRow, TagRow,
    TalkgroupRow, UserRow,
};
use crate::store::{CallStore, SearchQuery};
use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder, Row};
use wavecap_core::directory::Directory;
use wavecap_core::types::{ApiKey, Call, CallId, CallSummary, NewCall, User, UserId};
use wavecap_core::{Error, Result};

fn db_error(e: sqlx::Error) -> Error {
    Error::Transient {
        message: format!("database error: {e}"),
    }
}

/// Production call archive backed by Postgres
#[derive(Debug, Clone)]
pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    /// Wrap a connection pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    async fn append(&self, call: &NewCall) -> Result<CallId> {
        let query = r"
            INSERT INTO calls (
                system_ref, talkgroup_ref, timestamp_ms, site_ref, source_refs,
                frequencies, audio, audio_mime, audio_filename, transcript,
                tag, groups, group_ids
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            )
            RETURNING id
        ";

        let row = sqlx::query(query)
            .bind(call.system_ref)
            .bind(call.talkgroup_ref)
            .bind(call.timestamp_ms)
            .bind(call.site_ref)
            .bind(&call.source_refs)
            .bind(&call.frequencies)
            .bind(&call.audio)
            .bind(&call.audio_mime)
            .bind(&call.audio_filename)
            .bind(&call.transcript)
            .bind(&call.tag)
            .bind(&call.groups)
            .bind(&call.group_ids)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let id: i64 = row.get("id");
        Ok(id)
    }

    async fn get(&self, id: CallId) -> Result<Call> {
        let query = "SELECT * FROM calls WHERE id = $1";

        let row = sqlx::query_as::<_, CallRow>(query)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => Error::NotFound {
                    resource: format!("call {id}"),
                },
                other => db_error(other),
            })?;

        Ok(row.into())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CallSummary>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, system_ref, talkgroup_ref, timestamp_ms, audio_mime, \
             audio_filename, tag, groups, transcript FROM calls WHERE TRUE",
        );

        if let Some(system) = query.system {
            builder.push(" AND system_ref = ").push_bind(system);
        }
        if let Some(talkgroup) = query.talkgroup {
            builder.push(" AND talkgroup_ref = ").push_bind(talkgroup);
        }
        if let Some(tag) = &query.tag {
            builder.push(" AND tag = ").push_bind(tag.clone());
        }
        if let Some(group) = &query.group {
            builder
                .push(" AND ")
                .push_bind(group.clone())
                .push(" = ANY(groups)");
        }
        if let Some(mimes) = &query.mimes {
            builder
                .push(" AND audio_mime = ANY(")
                .push_bind(mimes.clone())
                .push(")");
        }
        if let Some(since) = query.since_ms {
            builder.push(" AND timestamp_ms >= ").push_bind(since);
        }
        if let Some(until) = query.until_ms {
            builder.push(" AND timestamp_ms <= ").push_bind(until);
        }

        builder.push(if query.sort_desc {
            " ORDER BY timestamp_ms DESC, id DESC"
        } else {
            " ORDER BY timestamp_ms ASC, id ASC"
        });
        builder.push(" LIMIT ").push_bind(query.limit);
        builder.push(" OFFSET ").push_bind(query.offset);

        let rows = builder
            .build_query_as::<CallSummaryRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.into_iter().map(CallSummary::from).collect())
    }

    async fn update_audio(
        &self,
        id: CallId,
        audio: Vec<u8>,
        mime: &str,
        filename: &str,
    ) -> Result<()> {
        let query = r"
            UPDATE calls
            SET audio = $1, audio_mime = $2, audio_filename = $3
            WHERE id = $4
        ";

        let result = sqlx::query(query)
            .bind(&audio)
            .bind(mime)
            .bind(filename)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                resource: format!("call {id}"),
            });
        }

        Ok(())
    }

    async fn delete(&self, ids: &[CallId]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM calls WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}

/// Directory table operations
pub struct DirectoryQueries;

impl DirectoryQueries {
    /// Load a complete directory epoch from the configuration tables
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails or a column is malformed.
    pub async fn load(pool: &PgPool) -> Result<Directory> {
        let system_rows =
            sqlx::query_as::<_, SystemRow>("SELECT * FROM systems ORDER BY display_order, id")
                .fetch_all(pool)
                .await
                .map_err(db_error)?;

        let talkgroup_rows = sqlx::query_as::<_, TalkgroupRow>(
            "SELECT * FROM talkgroups ORDER BY system_ref, display_order, talkgroup_ref",
        )
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

        let tag_rows =
            sqlx::query_as::<_, TagRow>("SELECT * FROM tags ORDER BY display_order, id")
                .fetch_all(pool)
                .await
                .map_err(db_error)?;

        let group_rows =
            sqlx::query_as::<_, GroupRow>("SELECT * FROM groups ORDER BY display_order, id")
                .fetch_all(pool)
                .await
                .map_err(db_error)?;

        let key_rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(db_error)?;

        let systems = assemble_systems(system_rows, talkgroup_rows)?;
        let tags = tag_rows.into_iter().map(Into::into).collect();
        let groups = group_rows.into_iter().map(Into::into).collect();
        let api_keys = key_rows
            .into_iter()
            .map(ApiKey::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Directory::new(systems, tags, groups, api_keys))
    }
}

/// Listener account operations
pub struct UserQueries;

impl UserQueries {
    /// Load every account
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a scope column is malformed.
    pub async fn list(pool: &PgPool) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(User::try_from).collect()
    }

    /// Insert or update an account
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the PIN or email is already taken by another
    /// account, `Transient` for other database failures.
    pub async fn upsert(pool: &PgPool, user: &User) -> Result<()> {
        let systems = serde_json::to_string(&user.systems)?;
        let talkgroups = serde_json::to_string(&user.talkgroups)?;
        let group_allow = user
            .group_allow
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let group_deny = serde_json::to_string(&user.group_deny)?;

        let query = r"
            INSERT INTO users (
                id, pin, email, systems, talkgroups, group_allow, group_deny,
                connection_limit, pin_expires_at_ms, verified
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                pin = EXCLUDED.pin,
                email = EXCLUDED.email,
                systems = EXCLUDED.systems,
                talkgroups = EXCLUDED.talkgroups,
                group_allow = EXCLUDED.group_allow,
                group_deny = EXCLUDED.group_deny,
                connection_limit = EXCLUDED.connection_limit,
                pin_expires_at_ms = EXCLUDED.pin_expires_at_ms,
                verified = EXCLUDED.verified
        ";

        sqlx::query(query)
            .bind(user.id)
            .bind(&user.pin)
            .bind(&user.email)
            .bind(systems)
            .bind(talkgroups)
            .bind(group_allow)
            .bind(group_deny)
            .bind(user.connection_limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
            .bind(user.pin_expires_at_ms)
            .bind(user.verified)
            .execute(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict {
                    message: format!("PIN or email already in use (user {})", user.id),
                },
                _ => db_error(e),
            })?;

        Ok(())
    }

    /// Bump the PIN expiry of an account, revoking access
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn set_pin_expiry(pool: &PgPool, id: UserId, expires_at_ms: i64) -> Result<()> {
        sqlx::query("UPDATE users SET pin_expires_at_ms = $1 WHERE id = $2")
            .bind(expires_at_ms)
            .bind(id)
            .execute(pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }

    /// Apply a batch of connection-limit updates in one transaction
    ///
    /// # Errors
    ///
    /// Returns an error and rolls back if any update fails.
    pub async fn set_connection_limits(
        pool: &PgPool,
        updates: &[(UserId, Option<u32>)],
    ) -> Result<()> {
        let mut tx = pool.begin().await.map_err(db_error)?;

        for (id, limit) in updates {
            sqlx::query("UPDATE users SET connection_limit = $1 WHERE id = $2")
                .bind(limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    /// Delete an account
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete(pool: &PgPool, id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}

/// Uploader API key operations
pub struct ApiKeyQueries;

impl ApiKeyQueries {
    /// Load every key
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a scope column is malformed.
    pub async fn list(pool: &PgPool) -> Result<Vec<ApiKey>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(ApiKey::try_from).collect()
    }

    /// Insert a key, returning its id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn insert(pool: &PgPool, key: &ApiKey) -> Result<i64> {
        let systems = serde_json::to_string(&key.systems)?;

        let row = sqlx::query(
            "INSERT INTO api_keys (key_hash, label, enabled, systems) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&key.key_hash)
        .bind(&key.label)
        .bind(key.enabled)
        .bind(systems)
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

        Ok(row.get("id"))
    }
}

// The tests below exercise the live Postgres paths and stay ignored until a
// test database is provisioned; the MemoryCallStore suite covers the
// contract itself.
#[cfg(test)]
#[allow(clippy::missing_panics_doc)]
mod tests {
    use super::*;
    use wavecap_core::types::Scope;

    async fn test_pool() -> PgPool {
        let url = std::env::var("WAVECAP_TEST_DATABASE_URL")
            .expect("WAVECAP_TEST_DATABASE_URL must point at a scratch database");
        PgPool::connect(&url).await.expect("connect test database")
    }

    fn sample_call(timestamp_ms: i64) -> NewCall {
        NewCall {
            system_ref: 1,
            talkgroup_ref: 100,
            timestamp_ms,
            site_ref: None,
            source_refs: vec![4001],
            frequencies: vec![854_000_000],
            audio: vec![0u8; 128],
            audio_mime: "audio/mpeg".into(),
            audio_filename: "sample.mp3".into(),
            transcript: None,
            tag: Some("Police".into()),
            groups: vec!["Dispatch".into()],
            group_ids: vec![10],
        }
    }

    #[tokio::test]
    #[ignore] // needs WAVECAP_TEST_DATABASE_URL
    async fn test_append_get_roundtrip() {
        let pool = test_pool().await;
        let store = PgCallStore::new(pool);

        let id = store.append(&sample_call(1_704_067_200_000)).await.unwrap();
        let call = store.get(id).await.unwrap();

        assert_eq!(call.id, id);
        assert_eq!(call.system_ref, 1);
        assert_eq!(call.audio.len(), 128);
    }

    #[tokio::test]
    #[ignore] // needs WAVECAP_TEST_DATABASE_URL
    async fn test_ids_are_monotonic() {
        let pool = test_pool().await;
        let store = PgCallStore::new(pool);

        let first = store.append(&sample_call(1_704_067_200_000)).await.unwrap();
        let second = store.append(&sample_call(1_704_067_201_000)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    #[ignore] // needs WAVECAP_TEST_DATABASE_URL
    async fn test_search_orders_descending() {
        let pool = test_pool().await;
        let store = PgCallStore::new(pool);

        store.append(&sample_call(1_704_067_200_000)).await.unwrap();
        store.append(&sample_call(1_704_067_205_000)).await.unwrap();

        let rows = store
            .search(&SearchQuery {
                system: Some(1),
                sort_desc: true,
                limit: 10,
                ..SearchQuery::default()
            })
            .await
            .unwrap();

        assert!(rows.windows(2).all(|w| w[0].timestamp_ms >= w[1].timestamp_ms));
    }

    #[tokio::test]
    #[ignore] // needs WAVECAP_TEST_DATABASE_URL
    async fn test_user_upsert_and_conflict() {
        let pool = test_pool().await;

        let user = User {
            id: 9_001,
            pin: "87654321".into(),
            email: None,
            systems: Scope::Wildcard,
            talkgroups: Scope::Wildcard,
            group_allow: None,
            group_deny: std::collections::BTreeSet::new(),
            connection_limit: Some(2),
            pin_expires_at_ms: 0,
            verified: true,
        };

        UserQueries::upsert(&pool, &user).await.unwrap();

        let mut duplicate_pin = user.clone();
        duplicate_pin.id = 9_002;
        let result = UserQueries::upsert(&pool, &duplicate_pin).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));

        UserQueries::delete(&pool, 9_001).await.unwrap();
    }
}
