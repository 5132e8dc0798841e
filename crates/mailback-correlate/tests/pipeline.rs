//! End-to-end correlation against a file-backed store.

#![allow(unused_results)]

use std::sync::{Arc, Barrier};
use std::thread;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mailback_core::{
    Annotation, AnnotationKind, BoundingBox, ContextData, ContextStatus, ContextType,
    ConversationContext, InboundDocument, NewContext, ReferenceGrammar, Selection,
};
use mailback_correlate::{
    CorrelationEngine, MatchOutcome, MatchStage, NoContextReason, Resolution,
};
use mailback_settings::MailbackSettings;
use mailback_store::{ActivityAction, ConnectionConfig, ContextStore};
use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use serde_json::json;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn engine(dir: &tempfile::TempDir) -> Arc<CorrelationEngine> {
    let path = dir.path().join("pipeline.db");
    let store = ContextStore::open(
        path.to_str().unwrap(),
        &ConnectionConfig {
            pool_size: 4,
            ..ConnectionConfig::default()
        },
        ReferenceGrammar::new("MB", 5).unwrap(),
    )
    .unwrap();
    Arc::new(CorrelationEngine::new(store, &MailbackSettings::default()))
}

fn create(
    engine: &CorrelationEngine,
    user: &str,
    data: ContextData,
    ttl: Duration,
    age: Duration,
) -> ConversationContext {
    engine
        .store()
        .create_context(&NewContext::new(user, data, ttl), now() - age)
        .unwrap()
}

fn circled(text: &str) -> Annotation {
    Annotation {
        kind: AnnotationKind::Circle,
        bounding_box: BoundingBox::new(0.4, 0.5, 0.1, 0.04),
        associated_text: Some(text.into()),
        confidence: 0.95,
    }
}

fn written(text: &str) -> Annotation {
    Annotation {
        kind: AnnotationKind::Handwriting,
        ..circled(text)
    }
}

#[test]
fn slot_marking_reaches_the_appointment() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    create(&engine, "u1", ContextData::Shopping(json!({})), Duration::days(7), Duration::hours(3));
    let appt = create(
        &engine,
        "u1",
        ContextData::Appointment(json!({"clinic": "north"})),
        Duration::days(7),
        Duration::days(2),
    );

    let doc = InboundDocument::new("u1", "").with_annotation(circled("Tue 10:00"));
    assert_matches!(
        engine.resolve(&doc, now()).unwrap(),
        Resolution::Claimed { context, stage: MatchStage::Template, selection: Some(Selection::Slot(slot)) }
            if context.id == appt.id && slot == "Tue 10:00"
    );
}

#[test]
fn other_users_codes_are_invisible() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let theirs = create(&engine, "u2", ContextData::Email(json!({})), Duration::days(7), Duration::hours(1));

    let doc = InboundDocument::new("u1", theirs.reference_id.to_string());
    let eval = engine.evaluate(&doc, now()).unwrap();
    assert_eq!(eval.outcome, MatchOutcome::NotFound);
    assert!(eval.notes.is_empty());
}

#[test]
fn swept_context_is_audited_when_referenced() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let old = create(&engine, "u1", ContextData::Inquiry(json!({})), Duration::hours(2), Duration::hours(5));

    let swept = engine.lifecycle().sweep(now()).unwrap();
    assert_eq!(swept, vec![old.id.clone()]);

    let doc = InboundDocument::new("u1", format!("about {}", old.reference_id));
    assert_eq!(
        engine.resolve(&doc, now()).unwrap(),
        Resolution::NoContext { reason: NoContextReason::NothingMatched }
    );
    let actions: Vec<ActivityAction> = engine
        .store()
        .list_activity(&old.id)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![ActivityAction::Created, ActivityAction::Expired, ActivityAction::ExpiredReference]
    );
}

#[test]
fn concurrent_duplicate_deliveries_claim_once() {
    const WORKERS: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let ctx = create(&engine, "u1", ContextData::Shopping(json!({})), Duration::days(7), Duration::hours(1));
    let doc = InboundDocument::new("u1", ctx.reference_id.to_string()).with_annotation(circled("A"));

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let doc = doc.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.resolve(&doc, now()).unwrap()
            })
        })
        .collect();
    let results: Vec<Resolution> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let claimed = results
        .iter()
        .filter(|r| matches!(r, Resolution::Claimed { .. }))
        .count();
    assert_eq!(claimed, 1);
    assert!(results.iter().all(|r| matches!(
        r,
        Resolution::Claimed { .. }
            | Resolution::NoContext {
                reason: NoContextReason::ClaimConflict | NoContextReason::NothingMatched
            }
    )));
    assert_eq!(
        engine.store().get_context(&ctx.id).unwrap().unwrap().status,
        ContextStatus::Consumed
    );
}

#[test]
fn clarification_follow_up_by_written_letter() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let first = create(&engine, "u1", ContextData::Email(json!({})), Duration::days(7), Duration::hours(4));
    let second = create(&engine, "u1", ContextData::Inquiry(json!({})), Duration::days(7), Duration::hours(2));

    let Resolution::Clarification { artifact, .. } =
        engine.resolve(&InboundDocument::new("u1", "yes please"), now()).unwrap()
    else {
        panic!("expected a clarification");
    };
    assert_eq!(artifact.candidates.len(), 2);
    for ctx in [&first, &second] {
        assert_eq!(
            engine.store().get_context(&ctx.id).unwrap().unwrap().status,
            ContextStatus::AwaitingDisambiguation
        );
    }

    // second was listed first (most recent), so "B" means the email
    let answer = InboundDocument::new("u1", format!("{}\nB", artifact.new_reference_id))
        .with_annotation(written("B"));
    assert_matches!(
        engine.resolve(&answer, now() + Duration::hours(1)).unwrap(),
        Resolution::Claimed { context, selection: Some(Selection::Clarified(m)), .. }
            if context.id == first.id && m == "B"
    );
}

#[test]
fn selection_of_a_closed_choice_is_not_redirected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let shop = create(&engine, "u1", ContextData::Shopping(json!({})), Duration::days(7), Duration::hours(4));
    let mail = create(&engine, "u1", ContextData::Email(json!({})), Duration::days(7), Duration::hours(2));

    let Resolution::Clarification { artifact, disambiguation_context } =
        engine.resolve(&InboundDocument::new("u1", "yes please"), now()).unwrap()
    else {
        panic!("expected a clarification");
    };
    let payload = disambiguation_context.context_data.as_disambiguation().unwrap();
    assert_eq!(payload.choice_by_marker("A").unwrap().context_id, mail.id);

    // the email is answered directly by its own code first
    let direct = InboundDocument::new("u1", mail.reference_id.to_string());
    assert_matches!(
        engine.resolve(&direct, now() + Duration::minutes(10)).unwrap(),
        Resolution::Claimed { context, stage: MatchStage::Reference, .. } if context.id == mail.id
    );

    let later = now() + Duration::minutes(20);
    let answer = InboundDocument::new("u1", artifact.new_reference_id.to_string())
        .with_annotation(circled("A"));
    assert_eq!(
        engine.resolve(&answer, later).unwrap(),
        Resolution::NoContext { reason: NoContextReason::NothingMatched }
    );
    assert_eq!(
        engine.store().get_context(&shop.id).unwrap().unwrap().status,
        ContextStatus::AwaitingDisambiguation
    );
    let actions: Vec<ActivityAction> = engine
        .store()
        .list_activity(&mail.id)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions.last(), Some(&ActivityAction::ConsumedReference));

    // B still resolves through the same form
    let answer = InboundDocument::new("u1", artifact.new_reference_id.to_string())
        .with_annotation(circled("B"));
    assert_matches!(
        engine.resolve(&answer, later).unwrap(),
        Resolution::Claimed { context, selection: Some(Selection::Clarified(m)), .. }
            if context.id == shop.id && m == "B"
    );
}

#[test]
fn concurrent_codeless_duplicates_send_one_form() {
    const ROUNDS: usize = 10;
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);

    for round in 0..ROUNDS {
        let user = format!("dup-{round}");
        create(&engine, &user, ContextData::Email(json!({})), Duration::days(7), Duration::hours(3));
        create(&engine, &user, ContextData::Inquiry(json!({})), Duration::days(7), Duration::hours(1));
        let doc = InboundDocument::new(user.as_str(), "yes please");

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                let doc = doc.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.resolve(&doc, now()).unwrap()
                })
            })
            .collect();
        let results: Vec<Resolution> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let forms = results
            .iter()
            .filter(|r| matches!(r, Resolution::Clarification { .. }))
            .count();
        assert_eq!(forms, 1, "round {round}: {results:?}");
        assert!(
            results.iter().all(|r| matches!(
                r,
                Resolution::Clarification { .. }
                    | Resolution::NoContext {
                        reason: NoContextReason::ClarificationPending | NoContextReason::ClaimConflict
                    }
            )),
            "round {round}: {results:?}"
        );

        let open = engine
            .store()
            .find_active_by_user(&user.as_str().into(), None, now())
            .unwrap();
        let clarifications = open
            .iter()
            .filter(|c| c.context_type == ContextType::Disambiguation)
            .count();
        assert_eq!(clarifications, 1, "round {round}");
    }
}

#[test]
fn evaluation_is_pure_and_never_leaks() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    create(&engine, "u1", ContextData::Shopping(json!({})), Duration::days(7), Duration::hours(1));
    create(&engine, "u1", ContextData::Appointment(json!({})), Duration::days(7), Duration::hours(30));
    create(&engine, "u1", ContextData::Email(json!({})), Duration::hours(1), Duration::hours(2));
    create(&engine, "u2", ContextData::Email(json!({})), Duration::days(7), Duration::minutes(5));

    let letters = prop::sample::select(vec!["A", "B", "C", "Tue 9am", "7", "dear team"]);
    let strategy = ("[A-Za-z0-9 \\-]{0,24}", prop::option::of(letters));
    let mut runner = TestRunner::new(Config::with_cases(64));
    runner
        .run(&strategy, |(text, mark)| {
            let mut doc = InboundDocument::new("u1", text);
            if let Some(mark) = mark {
                doc = doc.with_annotation(circled(mark));
            }
            let first = engine.evaluate(&doc, now()).unwrap();
            let second = engine.evaluate(&doc, now()).unwrap();
            prop_assert_eq!(&first, &second);

            for candidate in first.outcome.candidates() {
                let ctx = &candidate.context;
                prop_assert_eq!(ctx.user_id.as_str(), "u1");
                prop_assert!(ctx.is_visible_at(now()));
                if first.stage == Some(MatchStage::Template) {
                    prop_assert_ne!(ctx.context_type, ContextType::Email);
                }
            }
            Ok(())
        })
        .unwrap();

    let counts = engine.store().status_counts(&"u1".into()).unwrap();
    assert!(counts.iter().all(|(status, _)| *status != ContextStatus::Consumed));
}
