//! Schema & migrations (C3). Ensures the single `kine` table, its `(name,
//! id)` index, the `compact_rev_key` sentinel row and the `kine_db_info`
//! migration-tracking table exist. Every statement is idempotent so startup
//! can always re-run the full list safely; `kine_db_info` just avoids paying
//! for that on every boot.

use sqlx::any::AnyKind;
use sqlx::Row;

use crate::driver::Driver;
use crate::error::CResult;

/// Name of the immutable sentinel row that carries the compact watermark
/// (spec.md §3, "Sentinel row").
pub const COMPACT_REV_KEY: &str = "compact_rev_key";

/// Reserved id for the sentinel row, outside the positive autoincrement
/// sequence real keys use, so it never competes with a real row for an id
/// (spec.md §8: `Create("foo", ...)` must yield `rev=1`, not `rev=2`).
/// `0` is avoided because MySQL's default `NO_AUTO_VALUE_ON_ZERO`-off
/// behavior silently re-generates an explicit `0` on an `AUTO_INCREMENT`
/// column instead of storing it literally.
const SENTINEL_ID: i64 = -1;

const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    sqlite: &'static str,
    postgres: &'static str,
    mysql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sqlite: r#"
            CREATE TABLE IF NOT EXISTS kine (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                create_revision INTEGER NOT NULL,
                prev_revision INTEGER NOT NULL,
                lease INTEGER NOT NULL,
                value BLOB NULL,
                old_value BLOB NULL
            )"#,
        postgres: r#"
            CREATE TABLE IF NOT EXISTS kine (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                created INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                create_revision BIGINT NOT NULL,
                prev_revision BIGINT NOT NULL,
                lease BIGINT NOT NULL,
                value BYTEA NULL,
                old_value BYTEA NULL
            )"#,
        mysql: r#"
            CREATE TABLE IF NOT EXISTS kine (
                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                name VARCHAR(630) NOT NULL,
                created INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                create_revision BIGINT NOT NULL,
                prev_revision BIGINT NOT NULL,
                lease BIGINT NOT NULL,
                value MEDIUMBLOB NULL,
                old_value MEDIUMBLOB NULL
            )"#,
    },
    Migration {
        version: 2,
        sqlite: "CREATE INDEX IF NOT EXISTS kine_name_id_index ON kine (name, id)",
        postgres: "CREATE INDEX IF NOT EXISTS kine_name_id_index ON kine (name, id)",
        mysql: "CREATE INDEX kine_name_id_index ON kine (name, id)",
    },
];

/// Applies every migration in order, then ensures the sentinel row exists.
/// Idempotent: safe to call on every startup (spec.md §4.3).
pub async fn migrate(driver: &Driver) -> CResult<()> {
    ensure_db_info_table(driver).await?;
    let applied = current_version(driver).await?;

    for m in MIGRATIONS {
        if m.version <= applied {
            continue;
        }
        let ddl = dialect_ddl(driver, m);
        run_ddl(driver, ddl, m.version == 2).await?;
        set_version(driver, m.version).await?;
        tracing::info!(version = m.version, "applied kine schema migration");
    }

    ensure_sentinel_row(driver).await?;
    Ok(())
}

fn dialect_ddl<'a>(driver: &Driver, m: &'a Migration) -> &'a str {
    match driver.pool().any_kind() {
        AnyKind::Postgres => m.postgres,
        AnyKind::MySql => m.mysql,
        _ => m.sqlite,
    }
}

async fn run_ddl(driver: &Driver, ddl: &str, tolerate_duplicate_index: bool) -> CResult<()> {
    let result = sqlx::query(ddl).execute(driver.pool()).await;
    match result {
        Ok(_) => Ok(()),
        // MySQL has no `CREATE INDEX IF NOT EXISTS`; a duplicate-key error
        // on re-run of an already-applied migration is expected and benign.
        Err(sqlx::Error::Database(db_err)) if tolerate_duplicate_index && db_err.is_unique_violation() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn ensure_db_info_table(driver: &Driver) -> CResult<()> {
    let ddl = match driver.pool().any_kind() {
        AnyKind::Postgres | AnyKind::MySql => {
            "CREATE TABLE IF NOT EXISTS kine_db_info (id INTEGER PRIMARY KEY, version BIGINT NOT NULL)"
        }
        _ => "CREATE TABLE IF NOT EXISTS kine_db_info (id INTEGER PRIMARY KEY, version INTEGER NOT NULL)",
    };
    sqlx::query(ddl).execute(driver.pool()).await?;
    Ok(())
}

async fn current_version(driver: &Driver) -> CResult<i64> {
    let row = sqlx::query("SELECT version FROM kine_db_info WHERE id = 1")
        .fetch_optional(driver.pool())
        .await?;
    Ok(row.map(|r| r.get::<i64, _>("version")).unwrap_or(0))
}

async fn set_version(driver: &Driver, version: i64) -> CResult<()> {
    let sql = match driver.pool().any_kind() {
        AnyKind::Postgres => {
            "INSERT INTO kine_db_info (id, version) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET version = excluded.version"
        }
        AnyKind::MySql => "INSERT INTO kine_db_info (id, version) VALUES (1, ?) ON DUPLICATE KEY UPDATE version = VALUES(version)",
        _ => "INSERT INTO kine_db_info (id, version) VALUES (1, ?) ON CONFLICT (id) DO UPDATE SET version = excluded.version",
    };
    sqlx::query(sql).bind(version).execute(driver.pool()).await?;
    Ok(())
}

async fn ensure_sentinel_row(driver: &Driver) -> CResult<()> {
    let existing = sqlx::query("SELECT id FROM kine WHERE name = ?")
        .bind(COMPACT_REV_KEY)
        .fetch_optional(driver.pool())
        .await?;
    if existing.is_some() {
        return Ok(());
    }
    let sql = match driver.pool().any_kind() {
        AnyKind::Postgres => {
            "INSERT INTO kine (id, name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
             VALUES ($1, $2, 0, 0, 0, 0, 0, NULL, NULL)"
        }
        _ => {
            "INSERT INTO kine (id, name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
             VALUES (?, ?, 0, 0, 0, 0, 0, NULL, NULL)"
        }
    };
    sqlx::query(sql).bind(SENTINEL_ID).bind(COMPACT_REV_KEY).execute(driver.pool()).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::CURRENT_SCHEMA_VERSION;

    #[test]
    fn current_schema_version_matches_migration_count() {
        assert_eq!(CURRENT_SCHEMA_VERSION as usize, super::MIGRATIONS.len());
    }
}
