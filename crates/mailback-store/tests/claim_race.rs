//! Concurrent claimers racing for the same context through a shared file database.

#![allow(unused_results)]

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use mailback_core::{ContextData, ContextStatus, NewContext, ReferenceGrammar, UserId};
use mailback_store::{ActivityAction, ConnectionConfig, ContextStore, ContextStoreError};
use serde_json::json;

const CLAIMERS: usize = 8;

fn open_store(dir: &tempfile::TempDir) -> ContextStore {
    let path = dir.path().join("race.db");
    ContextStore::open(
        path.to_str().unwrap(),
        &ConnectionConfig {
            pool_size: CLAIMERS as u32,
            ..ConnectionConfig::default()
        },
        ReferenceGrammar::new("MB", 5).unwrap(),
    )
    .unwrap()
}

#[test]
fn exactly_one_concurrent_claim_wins() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
    let user = UserId::from("racer");

    let ctx = store
        .create_context(
            &NewContext::new(user.clone(), ContextData::Shopping(json!({"sku": 7})), Duration::days(7)),
            now,
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(CLAIMERS));
    let handles: Vec<_> = (0..CLAIMERS)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let user = user.clone();
            let id = ctx.id.clone();
            thread::spawn(move || {
                barrier.wait();
                store.claim(&user, &id, ContextStatus::Active, now)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(ContextStoreError::ClaimConflict { .. })))
        .count();

    assert_eq!(winners, 1, "{results:?}");
    assert_eq!(conflicts, CLAIMERS - 1, "{results:?}");

    let log = store.list_activity(&ctx.id).unwrap();
    assert_eq!(
        log.iter().filter(|e| e.action == ActivityAction::Claimed).count(),
        1
    );
    assert_eq!(
        log.iter().filter(|e| e.action == ActivityAction::ClaimConflict).count(),
        CLAIMERS - 1
    );
}

#[test]
fn concurrent_creates_never_share_a_reference() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

    let barrier = Arc::new(Barrier::new(CLAIMERS));
    let handles: Vec<_> = (0..CLAIMERS)
        .map(|i| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .create_context(
                        &NewContext::new(
                            format!("user-{}", i % 2),
                            ContextData::Email(json!({"n": i})),
                            Duration::days(1),
                        ),
                        now,
                    )
                    .unwrap()
                    .reference_id
            })
        })
        .collect();

    let mut refs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    refs.sort();
    refs.dedup();
    assert_eq!(refs.len(), CLAIMERS);
}
