//! Activity repository: append-only audit log of context lifecycle events.

use rusqlite::{Connection, params};
use serde_json::Value;

use crate::errors::Result;
use crate::sqlite::row_types::ActivityRow;
use crate::types::ActivityAction;

/// Activity repository.
pub struct ActivityRepo;

impl ActivityRepo {
    /// Append an entry; returns its row ID.
    pub fn record(
        conn: &Connection,
        context_id: &str,
        user_id: &str,
        action: ActivityAction,
        detail: Option<&Value>,
        now: &str,
    ) -> Result<i64> {
        let detail = detail.map(serde_json::to_string).transpose()?;
        let _ = conn.execute(
            "INSERT INTO context_activity (context_id, user_id, action, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![context_id, user_id, action.as_str(), detail, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Entries for one context, oldest first.
    pub fn list_for_context(conn: &Connection, context_id: &str) -> Result<Vec<ActivityRow>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM context_activity WHERE context_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![context_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent entries for a user, newest first.
    pub fn list_recent_for_user(
        conn: &Connection,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<ActivityRow>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM context_activity WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRow> {
        Ok(ActivityRow {
            id: row.get("id")?,
            context_id: row.get("context_id")?,
            user_id: row.get("user_id")?,
            action: row.get("action")?,
            detail: row.get("detail")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();
        let _ = conn
            .execute(
                "INSERT INTO contexts (id, user_id, reference_id, context_type, context_data,
                 status, created_at, updated_at, expires_at)
                 VALUES ('ctx_a', 'u', 'MB-2026-00001', 'email', '{}', 'active',
                 '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z', '2026-02-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        conn
    }

    #[test]
    fn record_and_list() {
        let conn = setup();
        let first = ActivityRepo::record(
            &conn,
            "ctx_a",
            "u",
            ActivityAction::Created,
            None,
            "2026-01-01T00:00:00.000Z",
        )
        .unwrap();
        let second = ActivityRepo::record(
            &conn,
            "ctx_a",
            "u",
            ActivityAction::Claimed,
            Some(&json!({"stage": "reference"})),
            "2026-01-02T00:00:00.000Z",
        )
        .unwrap();
        assert!(second > first);

        let rows = ActivityRepo::list_for_context(&conn, "ctx_a").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "created");
        assert_eq!(rows[1].detail.as_deref(), Some(r#"{"stage":"reference"}"#));

        let recent = ActivityRepo::list_recent_for_user(&conn, "u", 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "claimed");
    }

    #[test]
    fn unknown_context_violates_foreign_key() {
        let conn = setup();
        let result = ActivityRepo::record(
            &conn,
            "ctx_missing",
            "u",
            ActivityAction::Created,
            None,
            "2026-01-01T00:00:00.000Z",
        );
        assert!(result.is_err());
    }
}
