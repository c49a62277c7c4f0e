//! Revision-log engine (C4) — the heart of `kine`. Implements
//! Create/Update/Delete/Range/Count/Fill on top of the single `kine` table
//! (spec.md §4.4).

mod range;

use std::sync::Arc;

use sqlx::Row;

use crate::driver::Driver;
use crate::error::{CResult, Error};
use crate::schema::COMPACT_REV_KEY;
use crate::telemetry::{Outcome, Telemetry};

/// One row of the `kine` table (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRow {
    pub id: i64,
    pub name: String,
    pub created: bool,
    pub deleted: bool,
    pub create_revision: i64,
    pub prev_revision: i64,
    pub lease: i64,
    pub value: Option<Vec<u8>>,
    pub old_value: Option<Vec<u8>>,
}

impl LogRow {
    fn from_sql(row: &sqlx::any::AnyRow) -> CResult<LogRow> {
        Ok(LogRow {
            id: row.try_get::<i64, _>("id")?,
            name: row.try_get::<String, _>("name")?,
            created: row.try_get::<i64, _>("created")? != 0,
            deleted: row.try_get::<i64, _>("deleted")? != 0,
            create_revision: row.try_get::<i64, _>("create_revision")?,
            prev_revision: row.try_get::<i64, _>("prev_revision")?,
            lease: row.try_get::<i64, _>("lease")?,
            value: row.try_get::<Option<Vec<u8>>, _>("value")?,
            old_value: row.try_get::<Option<Vec<u8>>, _>("old_value")?,
        })
    }
}

/// Result of a CAS write: `(new_revision, ok)` — see spec.md §4.4's
/// primitive contract table. `ok = false` is never an error.
pub type CasResult = (i64, bool);

/// The revision-log engine. Cheap to clone (shares the driver + telemetry).
#[derive(Clone)]
pub struct Store {
    driver: Arc<Driver>,
    telemetry: Telemetry,
}

impl Store {
    pub fn new(driver: Arc<Driver>, telemetry: Telemetry) -> Self {
        Store { driver, telemetry }
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// `MAX(id)` over the whole table (spec.md §3 "Current revision").
    pub async fn current_revision(&self) -> CResult<i64> {
        let sql = self.driver.sql("SELECT COALESCE(MAX(id), 0) AS rev FROM kine");
        let rows = self
            .driver
            .query("current_revision", || async { sqlx::query(&sql).fetch_all(self.driver.pool()).await })
            .await?;
        Ok(rows.first().map(|r| r.get::<i64, _>("rev")).unwrap_or(0))
    }

    /// `(compact_revision, current_revision)` in one round trip.
    pub async fn get_compact_revision(&self) -> CResult<(i64, i64)> {
        let sql = self.driver.sql(
            "SELECT \
                (SELECT prev_revision FROM kine WHERE name = ?) AS compact_rev, \
                (SELECT COALESCE(MAX(id), 0) FROM kine) AS current_rev",
        );
        let key = COMPACT_REV_KEY.to_string();
        let rows = self
            .driver
            .query("get_compact_revision", || {
                let sql = sql.clone();
                let key = key.clone();
                async move { sqlx::query(&sql).bind(key).fetch_all(self.driver.pool()).await }
            })
            .await?;
        let row = rows.first().ok_or_else(|| Error::Internal("missing compact_rev_key sentinel row".into()))?;
        Ok((row.get::<i64, _>("compact_rev"), row.get::<i64, _>("current_rev")))
    }

    /// Inserts a row with `created=1` iff the key has no live row (spec.md
    /// §4.4 "Create").
    pub async fn create(&self, key: &str, value: Vec<u8>, lease: i64) -> CResult<CasResult> {
        validate_key(key)?;
        let insert_sql = self.driver.sql(
            "INSERT INTO kine (name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
             SELECT ?, 1, 0, 0, 0, ?, ?, NULL \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM kine AS cur \
                 WHERE cur.name = ? AND cur.deleted = 0 \
                   AND cur.id = (SELECT MAX(id) FROM kine WHERE name = ?) \
             )",
        );
        let fixup_sql = self.driver.sql("UPDATE kine SET create_revision = id WHERE id = ?");

        let key_owned = key.to_string();
        let result = self
            .driver
            .transact("create", move |pool| {
                let insert_sql = insert_sql.clone();
                let fixup_sql = fixup_sql.clone();
                let key = key_owned.clone();
                let value = value.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    let outcome = sqlx::query(&insert_sql)
                        .bind(&key)
                        .bind(lease)
                        .bind(value)
                        .bind(&key)
                        .bind(&key)
                        .execute(&mut *tx)
                        .await?;
                    if outcome.rows_affected() == 0 {
                        tx.rollback().await?;
                        return Ok(None);
                    }
                    let new_id = outcome.last_insert_id().unwrap_or(0);
                    sqlx::query(&fixup_sql).bind(new_id).execute(&mut *tx).await?;
                    tx.commit().await?;
                    Ok(Some(new_id))
                }
            })
            .await?;

        match result {
            Some(id) => {
                self.telemetry.record_op("create", Outcome::Ok);
                Ok((id, true))
            }
            None => {
                self.telemetry.record_op("create", Outcome::CasMiss);
                Ok((0, false))
            }
        }
    }

    /// Inserts a row iff the live row's id equals `expected_prev_rev`,
    /// carrying forward `create_revision` (spec.md §4.4 "Update",
    /// "Carry-forward of create_revision"). `expected_prev_rev = 0` is a
    /// strict CAS against "no prior row at all" (SPEC_FULL.md §9).
    pub async fn update(&self, key: &str, value: Vec<u8>, lease: i64, expected_prev_rev: i64) -> CResult<CasResult> {
        validate_key(key)?;
        self.cas_write(key, value, lease, expected_prev_rev, false).await
    }

    /// Inserts a tombstone iff the live row's id equals `expected_prev_rev`
    /// (spec.md §4.4 "Delete").
    pub async fn delete(&self, key: &str, expected_prev_rev: i64) -> CResult<CasResult> {
        validate_key(key)?;
        self.cas_write(key, Vec::new(), 0, expected_prev_rev, true).await
    }

    async fn cas_write(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: i64,
        expected_prev_rev: i64,
        is_delete: bool,
    ) -> CResult<CasResult> {
        let op = if is_delete { "delete" } else { "update" };
        let created_flag: i64 = 0;
        let deleted_flag: i64 = if is_delete { 1 } else { 0 };
        let value_bind: Option<Vec<u8>> = if is_delete { None } else { Some(value) };

        let sql = if expected_prev_rev == 0 {
            self.driver.sql(
                "INSERT INTO kine (name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
                 SELECT ?, ?, ?, 0, 0, ?, ?, NULL \
                 WHERE NOT EXISTS (SELECT 1 FROM kine WHERE name = ?)",
            )
        } else {
            self.driver.sql(
                "INSERT INTO kine (name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
                 SELECT ?, ?, ?, \
                        CASE WHEN prev.created = 1 THEN prev.id ELSE prev.create_revision END, \
                        prev.id, ?, ?, prev.value \
                 FROM kine AS prev \
                 WHERE prev.name = ? AND prev.id = ? \
                   AND prev.id = (SELECT MAX(id) FROM kine WHERE name = ?)",
            )
        };

        let key_owned = key.to_string();
        let new_id = self
            .driver
            .transact(op, move |pool| {
                let sql = sql.clone();
                let key = key_owned.clone();
                let value_bind = value_bind.clone();
                async move {
                    let outcome = if expected_prev_rev == 0 {
                        sqlx::query(&sql)
                            .bind(&key)
                            .bind(created_flag)
                            .bind(deleted_flag)
                            .bind(lease)
                            .bind(value_bind)
                            .bind(&key)
                            .execute(pool)
                            .await?
                    } else {
                        sqlx::query(&sql)
                            .bind(&key)
                            .bind(created_flag)
                            .bind(deleted_flag)
                            .bind(lease)
                            .bind(value_bind)
                            .bind(&key)
                            .bind(expected_prev_rev)
                            .bind(&key)
                            .execute(pool)
                            .await?
                    };
                    if outcome.rows_affected() == 0 {
                        Ok(None)
                    } else {
                        Ok(outcome.last_insert_id())
                    }
                }
            })
            .await?;

        match new_id {
            Some(id) => {
                self.telemetry.record_op(op, Outcome::Ok);
                Ok((id, true))
            }
            None => {
                self.telemetry.record_op(op, Outcome::CasMiss);
                Ok((0, false))
            }
        }
    }

    /// Inserts a synthetic row at an explicit id to close a gap left by a
    /// write transaction that allocated an id but never committed (spec.md
    /// §4.4 "Fill", §6 "Gap marker convention"). Returns
    /// `Error::ConstraintViolation` if `rev` collides with an existing row
    /// (SPEC_FULL.md §9).
    pub async fn fill(&self, rev: i64) -> CResult<()> {
        let sql = self.driver.sql(
            "INSERT INTO kine (id, name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
             VALUES (?, ?, 0, 0, 0, 0, 0, NULL, NULL)",
        );
        let name = format!("gap-{rev}");
        self.driver
            .execute("fill", || {
                let sql = sql.clone();
                let name = name.clone();
                async move { sqlx::query(&sql).bind(rev).bind(name).execute(self.driver.pool()).await }
            })
            .await?;
        self.telemetry.record_op("fill", Outcome::Ok);
        Ok(())
    }

    /// Deletes exactly the row with `id`, used by compactor-adjacent tools
    /// (spec.md §4.4 "DeleteRevision").
    pub async fn delete_revision(&self, id: i64) -> CResult<()> {
        let sql = self.driver.sql("DELETE FROM kine WHERE id = ?");
        self.driver
            .execute("delete_revision", || {
                let sql = sql.clone();
                async move { sqlx::query(&sql).bind(id).execute(self.driver.pool()).await }
            })
            .await?;
        Ok(())
    }

    /// `(current_rev, count_of_live_keys_in_range)` as of now (spec.md §4.4
    /// "CountCurrent").
    pub async fn count_current(&self, prefix: &str, start_key: Option<&str>) -> CResult<(i64, i64)> {
        self.count_at(prefix, start_key, None).await
    }

    /// As `count_current`, but as of a fixed revision; `Compacted` if `rev`
    /// predates the compact watermark (spec.md §4.4 "Count").
    pub async fn count(&self, prefix: &str, start_key: Option<&str>, rev: i64) -> CResult<(i64, i64)> {
        let (compact_rev, _) = self.get_compact_revision().await?;
        if rev < compact_rev {
            return Err(Error::Compacted);
        }
        self.count_at(prefix, start_key, Some(rev)).await
    }

    async fn count_at(&self, prefix: &str, start_key: Option<&str>, rev: Option<i64>) -> CResult<(i64, i64)> {
        let (start, end) = byte_range(prefix, start_key)?;
        let current_rev = self.current_revision().await?;
        let effective_rev = rev.unwrap_or(current_rev);

        let sql = self.driver.sql(
            "SELECT COUNT(*) AS n FROM kine AS kv \
             INNER JOIN ( \
                 SELECT name, MAX(id) AS id FROM kine \
                 WHERE name >= ? AND name < ? AND name != ? AND id <= ? \
                 GROUP BY name \
             ) AS latest ON latest.name = kv.name AND latest.id = kv.id \
             WHERE kv.deleted = 0",
        );
        let rows = self
            .driver
            .query("count", || {
                let sql = sql.clone();
                let start = start.clone();
                let end = end.clone();
                async move {
                    sqlx::query(&sql)
                        .bind(&start)
                        .bind(&end)
                        .bind(COMPACT_REV_KEY)
                        .bind(effective_rev)
                        .fetch_all(self.driver.pool())
                        .await
                }
            })
            .await?;
        let count = rows.first().map(|r| r.get::<i64, _>("n")).unwrap_or(0);
        Ok((current_rev, count))
    }

    /// Ordered live-row listing as of now (spec.md §4.4 "ListCurrent").
    pub async fn list_current(
        &self,
        prefix: &str,
        start_key: Option<&str>,
        limit: i64,
        include_deleted: bool,
    ) -> CResult<Vec<LogRow>> {
        self.list_at(prefix, start_key, limit, None, include_deleted).await
    }

    /// MVCC read at a fixed revision, rows in `name ASC, id ASC` order
    /// (spec.md §4.4 "List", "MVCC reads").
    pub async fn list(
        &self,
        prefix: &str,
        start_key: Option<&str>,
        limit: i64,
        rev: i64,
        include_deleted: bool,
    ) -> CResult<Vec<LogRow>> {
        let (compact_rev, _) = self.get_compact_revision().await?;
        if rev != 0 && rev < compact_rev {
            return Err(Error::Compacted);
        }
        self.list_at(prefix, start_key, limit, Some(rev), include_deleted).await
    }

    async fn list_at(
        &self,
        prefix: &str,
        start_key: Option<&str>,
        limit: i64,
        rev: Option<i64>,
        include_deleted: bool,
    ) -> CResult<Vec<LogRow>> {
        let (start, end) = byte_range(prefix, start_key)?;
        let effective_rev = match rev {
            Some(0) | None => self.current_revision().await?,
            Some(r) => r,
        };

        let sql = self.driver.sql(if include_deleted {
            "SELECT id, name, created, deleted, create_revision, prev_revision, lease, value, old_value \
             FROM kine AS kv \
             INNER JOIN ( \
                 SELECT name, MAX(id) AS id FROM kine \
                 WHERE name >= ? AND name < ? AND name != ? AND id <= ? \
                 GROUP BY name \
             ) AS latest ON latest.name = kv.name AND latest.id = kv.id \
             ORDER BY kv.name ASC, kv.id ASC LIMIT ?"
        } else {
            "SELECT id, name, created, deleted, create_revision, prev_revision, lease, value, old_value \
             FROM kine AS kv \
             INNER JOIN ( \
                 SELECT name, MAX(id) AS id FROM kine \
                 WHERE name >= ? AND name < ? AND name != ? AND id <= ? \
                 GROUP BY name \
             ) AS latest ON latest.name = kv.name AND latest.id = kv.id \
             WHERE kv.deleted = 0 \
             ORDER BY kv.name ASC, kv.id ASC LIMIT ?"
        });
        let bound_limit = effective_limit(limit);

        let rows = self
            .driver
            .query("list", || {
                let sql = sql.clone();
                let start = start.clone();
                let end = end.clone();
                async move {
                    sqlx::query(&sql)
                        .bind(&start)
                        .bind(&end)
                        .bind(COMPACT_REV_KEY)
                        .bind(effective_rev)
                        .bind(bound_limit)
                        .fetch_all(self.driver.pool())
                        .await
                }
            })
            .await?;
        rows.iter().map(LogRow::from_sql).collect()
    }

    /// Raw tail read for a prefix, used by the watch poller (spec.md §4.4
    /// "AfterPrefix").
    pub async fn after_prefix(&self, prefix: &str, after_rev: i64, limit: i64) -> CResult<Vec<LogRow>> {
        let (start, end) = byte_range(prefix, None)?;
        let sql = self.driver.sql(
            "SELECT id, name, created, deleted, create_revision, prev_revision, lease, value, old_value \
             FROM kine WHERE name >= ? AND name < ? AND id > ? ORDER BY id ASC LIMIT ?",
        );
        let bound_limit = effective_limit(limit);
        let rows = self
            .driver
            .query("after_prefix", || {
                let sql = sql.clone();
                let start = start.clone();
                let end = end.clone();
                async move {
                    sqlx::query(&sql)
                        .bind(&start)
                        .bind(&end)
                        .bind(after_rev)
                        .bind(bound_limit)
                        .fetch_all(self.driver.pool())
                        .await
                }
            })
            .await?;
        rows.iter().map(LogRow::from_sql).collect()
    }

    /// Raw tail read over the whole log, used by the watch poller (spec.md
    /// §4.4 "After").
    pub async fn after(&self, after_rev: i64, limit: i64) -> CResult<Vec<LogRow>> {
        let sql = self.driver.sql(
            "SELECT id, name, created, deleted, create_revision, prev_revision, lease, value, old_value \
             FROM kine WHERE id > ? ORDER BY id ASC LIMIT ?",
        );
        let bound_limit = effective_limit(limit);
        let rows = self
            .driver
            .query("after", || {
                let sql = sql.clone();
                async move { sqlx::query(&sql).bind(after_rev).bind(bound_limit).fetch_all(self.driver.pool()).await }
            })
            .await?;
        rows.iter().map(LogRow::from_sql).collect()
    }
}

/// Normalizes a caller-supplied `limit` to the value bound in the SQL
/// `LIMIT ?` clause: non-positive means "unbounded".
fn effective_limit(limit: i64) -> i64 {
    if limit > 0 {
        limit
    } else {
        i64::MAX
    }
}

fn validate_key(key: &str) -> CResult<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".to_string()));
    }
    Ok(())
}

/// The empty prefix means "every key"; `range::prefix_range`'s generic
/// `\x01`-suffix rule would instead bound the scan to the single empty key,
/// so it is special-cased to an unbounded range here.
const UNBOUNDED_END: &str = "\u{10ffff}";

fn byte_range(prefix: &str, start_key: Option<&str>) -> CResult<(String, String)> {
    if prefix.is_empty() && start_key.is_none() {
        return Ok((String::new(), UNBOUNDED_END.to_string()));
    }
    let (start, end) = range::prefix_range(prefix.as_bytes(), start_key.map(str::as_bytes));
    let start = String::from_utf8(start).map_err(|e| Error::Internal(e.to_string()))?;
    let end = String::from_utf8(end).map_err(|e| Error::Internal(e.to_string()))?;
    Ok((start, end))
}
