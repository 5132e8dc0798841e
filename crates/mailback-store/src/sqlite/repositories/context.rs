//! Context repository: rows of the `contexts` table.
//!
//! Status changes go through [`ContextRepo::transition`], a single
//! conditional `UPDATE ... RETURNING` that only matches while the row is
//! still in the expected status and unexpired. Zero matched rows means the
//! caller lost a race or the context aged out.

use mailback_core::time::format_timestamp;
use mailback_core::{ContextStatus, ConversationContext};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::ContextRow;

const OPEN_STATUSES: &str = "('active', 'awaiting_disambiguation')";

/// Context repository; stateless, every method takes `&Connection`.
pub struct ContextRepo;

impl ContextRepo {
    /// Insert a fully-formed context.
    pub fn insert(conn: &Connection, ctx: &ConversationContext) -> Result<()> {
        let payload = serde_json::to_string(&ctx.context_data.payload()?)?;
        let template = ctx.template.as_ref().map(serde_json::to_string).transpose()?;

        let _ = conn.execute(
            "INSERT INTO contexts (id, user_id, reference_id, context_type, context_data,
             summary, template, status, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ctx.id.as_str(),
                ctx.user_id.as_str(),
                ctx.reference_id.as_str(),
                ctx.context_type.as_str(),
                payload,
                ctx.summary,
                template,
                ctx.status.as_sql(),
                format_timestamp(ctx.created_at),
                format_timestamp(ctx.updated_at),
                format_timestamp(ctx.expires_at),
            ],
        )?;
        Ok(())
    }

    /// Get a context by ID, in any status.
    pub fn get_by_id(conn: &Connection, context_id: &str) -> Result<Option<ContextRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM contexts WHERE id = ?1",
                params![context_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get a user's context by reference code, in any status.
    pub fn get_by_reference(
        conn: &Connection,
        user_id: &str,
        reference_id: &str,
    ) -> Result<Option<ContextRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM contexts WHERE reference_id = ?1 AND user_id = ?2",
                params![reference_id, user_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// A user's open, unexpired contexts, most recently updated first.
    ///
    /// With `updated_since`, only contexts updated at or after that instant.
    /// Ties on `updated_at` are broken by ID, newest first.
    pub fn list_open_by_user(
        conn: &Connection,
        user_id: &str,
        now: &str,
        updated_since: Option<&str>,
    ) -> Result<Vec<ContextRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM contexts
             WHERE user_id = ?1
               AND status IN {OPEN_STATUSES}
               AND expires_at > ?2
               AND (?3 IS NULL OR updated_at >= ?3)
             ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_id, now, updated_since], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move a context from `from` to `to` if it is still in `from`, owned
    /// by `user_id`, and unexpired at `now`. Returns the updated row, or
    /// `None` when nothing matched.
    pub fn transition(
        conn: &Connection,
        context_id: &str,
        user_id: &str,
        from: ContextStatus,
        to: ContextStatus,
        now: &str,
    ) -> Result<Option<ContextRow>> {
        let row = conn
            .query_row(
                "UPDATE contexts SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4 AND status = ?5 AND expires_at > ?2
                 RETURNING *",
                params![to.as_sql(), now, context_id, user_id, from.as_sql()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mark every open context whose TTL has elapsed at `now` as expired.
    ///
    /// Returns `(context_id, user_id)` for each row changed.
    pub fn expire_due(conn: &Connection, now: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare(&format!(
            "UPDATE contexts SET status = 'expired', updated_at = ?1
             WHERE status IN {OPEN_STATUSES} AND expires_at <= ?1
             RETURNING id, user_id"
        ))?;
        let rows = stmt
            .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count of a user's contexts per status.
    pub fn count_by_status(conn: &Connection, user_id: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM contexts WHERE user_id = ?1
             GROUP BY status ORDER BY status",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRow> {
        Ok(ContextRow {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            reference_id: row.get("reference_id")?,
            context_type: row.get("context_type")?,
            context_data: row.get("context_data")?,
            summary: row.get("summary")?,
            template: row.get("template")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            expires_at: row.get("expires_at")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use mailback_core::{ContextData, ContextId, ReferenceId, UserId};
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    fn ctx(id: &str, user: &str, seq: u32, updated: DateTime<Utc>, ttl: Duration) -> ConversationContext {
        ConversationContext {
            id: ContextId::from(id),
            user_id: UserId::from(user),
            reference_id: ReferenceId::from_canonical(format!("MB-2026-{seq:05}")),
            context_type: mailback_core::ContextType::Email,
            context_data: ContextData::Email(json!({"thread": id})),
            summary: None,
            template: None,
            status: ContextStatus::Active,
            created_at: t0(),
            updated_at: updated,
            expires_at: t0() + ttl,
        }
    }

    fn ts(d: DateTime<Utc>) -> String {
        format_timestamp(d)
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let conn = setup();
        let c = ctx("ctx_a", "u1", 1, t0(), Duration::days(1));
        ContextRepo::insert(&conn, &c).unwrap();

        let back = ContextRepo::get_by_id(&conn, "ctx_a")
            .unwrap()
            .unwrap()
            .into_context()
            .unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn get_by_reference_is_scoped_to_user() {
        let conn = setup();
        ContextRepo::insert(&conn, &ctx("ctx_a", "u1", 1, t0(), Duration::days(1))).unwrap();

        assert!(ContextRepo::get_by_reference(&conn, "u1", "MB-2026-00001")
            .unwrap()
            .is_some());
        assert!(ContextRepo::get_by_reference(&conn, "u2", "MB-2026-00001")
            .unwrap()
            .is_none());
    }

    #[test]
    fn list_open_filters_expiry_status_and_window() {
        let conn = setup();
        let now = t0() + Duration::hours(10);
        ContextRepo::insert(&conn, &ctx("ctx_old", "u", 1, t0() + Duration::hours(1), Duration::days(1))).unwrap();
        ContextRepo::insert(&conn, &ctx("ctx_new", "u", 2, t0() + Duration::hours(9), Duration::days(1))).unwrap();
        ContextRepo::insert(&conn, &ctx("ctx_dead", "u", 3, t0(), Duration::hours(10))).unwrap();
        ContextRepo::insert(&conn, &ctx("ctx_other", "v", 4, t0(), Duration::days(1))).unwrap();

        let all: Vec<String> = ContextRepo::list_open_by_user(&conn, "u", &ts(now), None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec!["ctx_new", "ctx_old"]);

        let since = ts(now - Duration::hours(2));
        let recent: Vec<String> = ContextRepo::list_open_by_user(&conn, "u", &ts(now), Some(&since))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(recent, vec!["ctx_new"]);
    }

    #[test]
    fn equal_updated_at_orders_by_id_desc() {
        let conn = setup();
        ContextRepo::insert(&conn, &ctx("ctx_1", "u", 1, t0(), Duration::days(1))).unwrap();
        ContextRepo::insert(&conn, &ctx("ctx_2", "u", 2, t0(), Duration::days(1))).unwrap();
        let ids: Vec<String> = ContextRepo::list_open_by_user(&conn, "u", &ts(t0()), None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["ctx_2", "ctx_1"]);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let conn = setup();
        ContextRepo::insert(&conn, &ctx("ctx_a", "u", 1, t0(), Duration::days(1))).unwrap();
        let now = ts(t0() + Duration::hours(1));

        let first = ContextRepo::transition(
            &conn,
            "ctx_a",
            "u",
            ContextStatus::Active,
            ContextStatus::Consumed,
            &now,
        )
        .unwrap();
        assert_eq!(first.unwrap().status, "consumed");

        let second = ContextRepo::transition(
            &conn,
            "ctx_a",
            "u",
            ContextStatus::Active,
            ContextStatus::Consumed,
            &now,
        )
        .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn transition_refuses_expired_and_foreign_rows() {
        let conn = setup();
        ContextRepo::insert(&conn, &ctx("ctx_a", "u", 1, t0(), Duration::hours(1))).unwrap();

        let late = ts(t0() + Duration::hours(1));
        assert!(ContextRepo::transition(&conn, "ctx_a", "u", ContextStatus::Active, ContextStatus::Consumed, &late)
            .unwrap()
            .is_none());

        let early = ts(t0());
        assert!(ContextRepo::transition(&conn, "ctx_a", "intruder", ContextStatus::Active, ContextStatus::Consumed, &early)
            .unwrap()
            .is_none());
    }

    #[test]
    fn expire_due_only_touches_open_past_ttl() {
        let conn = setup();
        ContextRepo::insert(&conn, &ctx("ctx_due", "u", 1, t0(), Duration::hours(1))).unwrap();
        ContextRepo::insert(&conn, &ctx("ctx_live", "u", 2, t0(), Duration::days(1))).unwrap();
        let now = ts(t0() + Duration::hours(2));

        let expired = ContextRepo::expire_due(&conn, &now).unwrap();
        assert_eq!(expired, vec![("ctx_due".to_string(), "u".to_string())]);
        assert!(ContextRepo::expire_due(&conn, &now).unwrap().is_empty());

        let counts = ContextRepo::count_by_status(&conn, "u").unwrap();
        assert_eq!(counts, vec![("active".to_string(), 1), ("expired".to_string(), 1)]);
    }
}
