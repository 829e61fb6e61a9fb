//! Database migrations
//!
//! The schema version lives in SQLite's `user_version` pragma; each step in
//! `MIGRATIONS` runs once, in order, inside its own transaction.

use crate::Result;
use rusqlite::Connection;

type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: &[(&str, Migration)] = &[("settings table", migrate_v1)];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = schema_version(conn)?;

    for (index, (name, migrate)) in MIGRATIONS.iter().enumerate() {
        let version = index as i32 + 1;
        if version <= current_version {
            continue;
        }

        tracing::info!(version, migration = %name, "Running migration");
        conn.execute_batch("BEGIN")?;
        let applied = migrate(conn).and_then(|_| {
            conn.pragma_update(None, "user_version", version)?;
            Ok(())
        });
        match applied {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
        }
    }

    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    // Recent sessions, bypass hosts and the library root all live here as
    // individual keys.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
    )?;

    Ok(())
}
