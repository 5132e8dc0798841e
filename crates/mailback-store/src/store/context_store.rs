//! High-level transactional `ContextStore` API.
//!
//! Composes the repositories into atomic, user-scoped operations. Every
//! write runs inside a single `BEGIN IMMEDIATE` transaction so concurrent
//! writers queue on the busy timeout instead of interleaving. Reads filter
//! on `expires_at` at query time and never depend on the sweep having run.

use chrono::{DateTime, Datelike, Duration, Utc};
use mailback_core::time::format_timestamp;
use mailback_core::{
    ContextData, ContextId, ContextStatus, ContextType, ConversationContext, DisambiguationPayload,
    NewContext, ReferenceGrammar, ReferenceId, ReplyFamily, ReplyTemplate, UserId,
};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::errors::{ContextStoreError, Result};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::activity::ActivityRepo;
use crate::sqlite::repositories::context::ContextRepo;
use crate::sqlite::repositories::sequence::SequenceRepo;
use crate::sqlite::row_types::ContextRow;
use crate::types::{ActivityAction, ActivityEntry, ListedChoice, NewDisambiguation};

/// High-level context store wrapping a connection pool and the reference grammar.
#[derive(Clone)]
pub struct ContextStore {
    pool: ConnectionPool,
    grammar: ReferenceGrammar,
}

impl ContextStore {
    /// Create a store over an already-migrated pool.
    pub fn new(pool: ConnectionPool, grammar: ReferenceGrammar) -> Self {
        Self { pool, grammar }
    }

    /// Open (and migrate) a file-backed store.
    pub fn open(path: &str, config: &ConnectionConfig, grammar: ReferenceGrammar) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self::new(pool, grammar))
    }

    /// Single-connection in-memory store with migrations applied.
    pub fn in_memory(grammar: ReferenceGrammar) -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig {
            pool_size: 1,
            ..ConnectionConfig::default()
        })?;
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self::new(pool, grammar))
    }

    /// The reference grammar codes are allocated with.
    pub fn grammar(&self) -> &ReferenceGrammar {
        &self.grammar
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a new active context with a freshly allocated reference code.
    pub fn create_context(
        &self,
        new: &NewContext,
        now: DateTime<Utc>,
    ) -> Result<ConversationContext> {
        if new.ttl <= Duration::zero() {
            return Err(ContextStoreError::InvalidOperation(
                "context TTL must be positive".into(),
            ));
        }
        if new.context_data.context_type() == ContextType::Disambiguation {
            return Err(ContextStoreError::InvalidOperation(
                "disambiguation contexts are issued by the correlation engine".into(),
            ));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ctx = ConversationContext {
            id: ContextId::new(),
            user_id: new.user_id.clone(),
            reference_id: self.allocate_reference(&tx, now)?,
            context_type: new.context_data.context_type(),
            context_data: new.context_data.clone(),
            summary: new.summary.clone(),
            template: new.template.clone(),
            status: ContextStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + new.ttl,
        };
        ContextRepo::insert(&tx, &ctx)?;
        let _ = ActivityRepo::record(
            &tx,
            &ctx.id,
            &ctx.user_id,
            ActivityAction::Created,
            Some(&json!({ "referenceId": ctx.reference_id, "contextType": ctx.context_type })),
            &format_timestamp(now),
        )?;
        tx.commit()?;

        info!(
            user_id = %ctx.user_id,
            context_id = %ctx.id,
            reference_id = %ctx.reference_id,
            context_type = %ctx.context_type,
            "context created"
        );
        Ok(ctx)
    }

    fn allocate_reference(&self, conn: &Connection, now: DateTime<Utc>) -> Result<ReferenceId> {
        let year = now.year();
        let sequence = SequenceRepo::next(conn, self.grammar.prefix(), year)?;
        let width = u32::try_from(self.grammar.sequence_width()).unwrap_or(u32::MAX);
        if 10_u64.checked_pow(width).is_some_and(|limit| sequence >= limit) {
            return Err(ContextStoreError::InvalidOperation(format!(
                "reference sequence exhausted for {}-{year}",
                self.grammar.prefix()
            )));
        }
        Ok(self.grammar.format(year, sequence))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Get a context by ID, in any status.
    pub fn get_context(&self, context_id: &ContextId) -> Result<Option<ConversationContext>> {
        let conn = self.conn()?;
        ContextRepo::get_by_id(&conn, context_id)?
            .map(ContextRow::into_context)
            .transpose()
    }

    /// Look up a user's context by reference code, in any status.
    ///
    /// Callers decide visibility; this lets them tell an expired reference
    /// apart from an unknown one.
    pub fn find_by_reference(
        &self,
        user_id: &UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<ConversationContext>> {
        let conn = self.conn()?;
        ContextRepo::get_by_reference(&conn, user_id, reference_id.as_str())?
            .map(ContextRow::into_context)
            .transpose()
    }

    /// A user's open contexts unexpired at `now`, most recently updated first.
    ///
    /// With `window`, only contexts updated within `window` before `now`.
    pub fn find_active_by_user(
        &self,
        user_id: &UserId,
        window: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConversationContext>> {
        let conn = self.conn()?;
        let since = window.map(|w| format_timestamp(now - w));
        ContextRepo::list_open_by_user(&conn, user_id, &format_timestamp(now), since.as_deref())?
            .into_iter()
            .map(ContextRow::into_context)
            .collect()
    }

    /// Number of a user's contexts in each status.
    pub fn status_counts(&self, user_id: &UserId) -> Result<Vec<(ContextStatus, i64)>> {
        let conn = self.conn()?;
        ContextRepo::count_by_status(&conn, user_id)?
            .into_iter()
            .map(|(status, n)| {
                status
                    .parse::<ContextStatus>()
                    .map(|s| (s, n))
                    .map_err(|e| ContextStoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Claim
    // ─────────────────────────────────────────────────────────────────────

    /// Atomically consume a context that is still in `expected` status.
    ///
    /// # Errors
    ///
    /// [`ContextStoreError::ClaimConflict`] if the context is no longer in
    /// `expected`, has expired, or is not owned by `user_id`.
    pub fn claim(
        &self,
        user_id: &UserId,
        context_id: &ContextId,
        expected: ContextStatus,
        now: DateTime<Utc>,
    ) -> Result<ConversationContext> {
        if !expected.can_transition_to(ContextStatus::Consumed) {
            return Err(ContextStoreError::InvalidOperation(format!(
                "cannot claim from status {expected}"
            )));
        }

        let ts = format_timestamp(now);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = ContextRepo::transition(
            &tx,
            context_id,
            user_id,
            expected,
            ContextStatus::Consumed,
            &ts,
        )?;
        let Some(row) = claimed else {
            record_conflict(&tx, user_id, context_id, expected, &ts)?;
            tx.commit()?;
            warn!(%user_id, %context_id, %expected, "claim conflict");
            return Err(ContextStoreError::ClaimConflict {
                context_id: context_id.clone(),
                expected,
            });
        };

        let _ = ActivityRepo::record(
            &tx,
            context_id,
            user_id,
            ActivityAction::Claimed,
            Some(&json!({ "from": expected })),
            &ts,
        )?;
        tx.commit()?;

        debug!(%user_id, %context_id, from = %expected, "context claimed");
        row.into_context()
    }

    /// Consume a clarification context and the choice it resolved to, together.
    ///
    /// Returns `(clarification, chosen)`. If either claim fails, neither
    /// context changes.
    pub fn claim_with_disambiguation(
        &self,
        user_id: &UserId,
        disambiguation_id: &ContextId,
        chosen_id: &ContextId,
        chosen_expected: ContextStatus,
        now: DateTime<Utc>,
    ) -> Result<(ConversationContext, ConversationContext)> {
        let ts = format_timestamp(now);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let disambiguation = ContextRepo::transition(
            &tx,
            disambiguation_id,
            user_id,
            ContextStatus::Active,
            ContextStatus::Consumed,
            &ts,
        )?;
        let chosen = match disambiguation {
            Some(_) => ContextRepo::transition(
                &tx,
                chosen_id,
                user_id,
                chosen_expected,
                ContextStatus::Consumed,
                &ts,
            )?,
            None => None,
        };

        let lost_disambiguation = disambiguation.is_none();
        let (Some(disambiguation), Some(chosen)) = (disambiguation, chosen) else {
            tx.rollback()?;
            let (context_id, expected) = if lost_disambiguation {
                (disambiguation_id, ContextStatus::Active)
            } else {
                (chosen_id, chosen_expected)
            };
            record_conflict(&conn, user_id, context_id, expected, &ts)?;
            warn!(%user_id, %context_id, %expected, "clarification claim conflict");
            return Err(ContextStoreError::ClaimConflict {
                context_id: context_id.clone(),
                expected,
            });
        };

        for (id, detail) in [
            (disambiguation_id, json!({ "from": ContextStatus::Active, "resolvedTo": chosen_id })),
            (chosen_id, json!({ "from": chosen_expected, "via": disambiguation_id })),
        ] {
            let _ = ActivityRepo::record(&tx, id, user_id, ActivityAction::Claimed, Some(&detail), &ts)?;
        }
        tx.commit()?;

        debug!(%user_id, %disambiguation_id, %chosen_id, "clarification resolved");
        Ok((disambiguation.into_context()?, chosen.into_context()?))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Disambiguation
    // ─────────────────────────────────────────────────────────────────────

    /// Persist a clarification context listing `request.choices`.
    ///
    /// In one transaction: consumes every superseded clarification (all must
    /// still be active), allocates a reference code, inserts the new
    /// `disambiguation` context, and moves each listed context from its
    /// expected status to `awaiting_disambiguation`. A listed context no
    /// longer in its expected status aborts the whole issuance with
    /// [`ContextStoreError::ClaimConflict`].
    pub fn issue_disambiguation(
        &self,
        request: &NewDisambiguation,
        now: DateTime<Utc>,
    ) -> Result<ConversationContext> {
        if request.choices.len() < 2 {
            return Err(ContextStoreError::InvalidOperation(format!(
                "a clarification needs at least two choices, got {}",
                request.choices.len()
            )));
        }
        if request.ttl <= Duration::zero() {
            return Err(ContextStoreError::InvalidOperation(
                "clarification TTL must be positive".into(),
            ));
        }
        if let Some(closed) = request.choices.iter().find(|c| !c.expected.is_open()) {
            return Err(ContextStoreError::InvalidOperation(format!(
                "cannot list {} from status {}",
                closed.choice.context_id, closed.expected
            )));
        }

        let ts = format_timestamp(now);
        let user_id = &request.user_id;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for stale in &request.supersedes {
            if ContextRepo::transition(
                &tx,
                stale,
                user_id,
                ContextStatus::Active,
                ContextStatus::Consumed,
                &ts,
            )?
            .is_none()
            {
                drop(tx);
                warn!(%user_id, context_id = %stale, "superseded clarification already closed");
                return Err(ContextStoreError::ClaimConflict {
                    context_id: stale.clone(),
                    expected: ContextStatus::Active,
                });
            }
        }

        let count = request.choices.len();
        let ctx = ConversationContext {
            id: ContextId::new(),
            user_id: user_id.clone(),
            reference_id: self.allocate_reference(&tx, now)?,
            context_type: ContextType::Disambiguation,
            context_data: ContextData::Disambiguation(DisambiguationPayload {
                choices: request.choices.iter().map(|c| c.choice.clone()).collect(),
                origin_stage: request.origin_stage.clone(),
                round: request.round,
            }),
            summary: Some(format!("Clarification between {count} items")),
            template: Some(
                ReplyTemplate::new(ReplyFamily::OptionSelection)
                    .with_option_count(u32::try_from(count).unwrap_or(u32::MAX)),
            ),
            status: ContextStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + request.ttl,
        };
        ContextRepo::insert(&tx, &ctx)?;

        let listed: Vec<&str> = request
            .choices
            .iter()
            .map(|c| c.choice.context_id.as_str())
            .collect();
        let _ = ActivityRepo::record(
            &tx,
            &ctx.id,
            user_id,
            ActivityAction::DisambiguationIssued,
            Some(&json!({
                "choices": listed,
                "originStage": request.origin_stage,
                "round": request.round,
            })),
            &ts,
        )?;
        for stale in &request.supersedes {
            let _ = ActivityRepo::record(
                &tx,
                stale,
                user_id,
                ActivityAction::Claimed,
                Some(&json!({ "supersededBy": ctx.id })),
                &ts,
            )?;
        }

        for ListedChoice { choice, expected } in &request.choices {
            let moved = ContextRepo::transition(
                &tx,
                &choice.context_id,
                user_id,
                *expected,
                ContextStatus::AwaitingDisambiguation,
                &ts,
            )?;
            if moved.is_none() {
                tx.rollback()?;
                record_conflict(&conn, user_id, &choice.context_id, *expected, &ts)?;
                warn!(%user_id, context_id = %choice.context_id, %expected, "listed context changed before clarification");
                return Err(ContextStoreError::ClaimConflict {
                    context_id: choice.context_id.clone(),
                    expected: *expected,
                });
            }
            let _ = ActivityRepo::record(
                &tx,
                &choice.context_id,
                user_id,
                ActivityAction::AwaitingDisambiguation,
                Some(&json!({ "disambiguationId": ctx.id, "from": expected })),
                &ts,
            )?;
        }
        tx.commit()?;

        info!(
            %user_id,
            context_id = %ctx.id,
            reference_id = %ctx.reference_id,
            choices = count,
            origin_stage = %request.origin_stage,
            "clarification issued"
        );
        Ok(ctx)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expiry and audit
    // ─────────────────────────────────────────────────────────────────────

    /// Transition every open context past its TTL at `now` to expired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContextId>> {
        let ts = format_timestamp(now);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let expired = ContextRepo::expire_due(&tx, &ts)?;
        for (context_id, user_id) in &expired {
            let _ = ActivityRepo::record(&tx, context_id, user_id, ActivityAction::Expired, None, &ts)?;
        }
        tx.commit()?;

        if !expired.is_empty() {
            info!(count = expired.len(), "expired contexts swept");
        }
        Ok(expired
            .into_iter()
            .map(|(id, _)| ContextId::from_string(id))
            .collect())
    }

    /// Append an entry to the activity log.
    pub fn record_activity(
        &self,
        context_id: &ContextId,
        user_id: &UserId,
        action: ActivityAction,
        detail: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        ActivityRepo::record(&conn, context_id, user_id, action, detail, &format_timestamp(now))
    }

    /// Activity log of one context, oldest first.
    pub fn list_activity(&self, context_id: &ContextId) -> Result<Vec<ActivityEntry>> {
        let conn = self.conn()?;
        ActivityRepo::list_for_context(&conn, context_id)?
            .into_iter()
            .map(|row| row.into_entry())
            .collect()
    }

    /// Most recent activity of a user, newest first.
    pub fn recent_activity(&self, user_id: &UserId, limit: u32) -> Result<Vec<ActivityEntry>> {
        let conn = self.conn()?;
        ActivityRepo::list_recent_for_user(&conn, user_id, limit)?
            .into_iter()
            .map(|row| row.into_entry())
            .collect()
    }
}

/// Log a lost claim against a context the user owns; unknown IDs are skipped.
fn record_conflict(
    conn: &Connection,
    user_id: &UserId,
    context_id: &ContextId,
    expected: ContextStatus,
    ts: &str,
) -> Result<()> {
    let Some(row) = ContextRepo::get_by_id(conn, context_id)? else {
        return Ok(());
    };
    if row.user_id != user_id.as_str() {
        return Ok(());
    }
    let _ = ActivityRepo::record(
        conn,
        context_id,
        user_id,
        ActivityAction::ClaimConflict,
        Some(&json!({ "expected": expected, "actual": row.status })),
        ts,
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
