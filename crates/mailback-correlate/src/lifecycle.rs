//! Claim-with-retry and TTL enforcement.
//!
//! The claim is the only mutating step of a resolution. A lost race is not
//! an error for the job: the next-best candidate is tried once, then the
//! caller degrades to a "no context" outcome.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use mailback_core::{ContextId, ConversationContext, UserId};
use mailback_store::ContextStore;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Claim and expiry operations over the store.
#[derive(Clone)]
pub struct LifecycleManager {
    store: ContextStore,
    retry_next: bool,
}

impl LifecycleManager {
    /// Create a manager. With `retry_next`, one lost claim falls through to
    /// the next ranked candidate.
    pub fn new(store: ContextStore, retry_next: bool) -> Self {
        Self { store, retry_next }
    }

    /// Claim the first of `ranked` that can still be claimed.
    ///
    /// Each candidate is claimed from the status it was read in. Returns
    /// `None` when every attempt lost to a concurrent claim.
    pub fn claim_with_retry(
        &self,
        user_id: &UserId,
        ranked: &[&ConversationContext],
        now: DateTime<Utc>,
    ) -> Result<Option<ConversationContext>> {
        let attempts = if self.retry_next { 2 } else { 1 };
        for (attempt, ctx) in ranked.iter().take(attempts).enumerate() {
            match self.store.claim(user_id, &ctx.id, ctx.status, now) {
                Ok(claimed) => {
                    debug!(%user_id, context_id = %claimed.id, attempt, "claimed");
                    return Ok(Some(claimed));
                }
                Err(e) if e.is_claim_conflict() => {
                    warn!(%user_id, context_id = %ctx.id, attempt, "claim lost to concurrent resolution");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Expire every open context past its TTL.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<ContextId>> {
        Ok(self.store.sweep_expired(now)?)
    }

    /// Run [`sweep`](Self::sweep) every `period` on a background task.
    ///
    /// Each sweep runs on the blocking pool. Failures are logged and the
    /// loop continues. Abort the returned handle on shutdown.
    pub fn spawn_sweeper(&self, period: StdDuration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = interval.tick().await;
                let sweeper = manager.clone();
                match tokio::task::spawn_blocking(move || sweeper.sweep(Utc::now())).await {
                    Ok(Ok(expired)) if !expired.is_empty() => {
                        info!(count = expired.len(), "sweeper expired contexts");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "sweep failed"),
                    Err(e) => warn!(error = %e, "sweep task panicked"),
                }
            }
        })
    }
}
