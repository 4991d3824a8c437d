//! End-to-end runs against the in-memory mailbox

mod common;

use common::*;
use gmail_cleaner::classifier::MatchReason;
use gmail_cleaner::error::CleanerError;
use gmail_cleaner::orchestrator::{Orchestrator, RunMode, RunObserver, SilentObserver, Stage};
use gmail_cleaner::ProgressCallback;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Records stage boundaries and progress per stage
#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
    fetched: Arc<AtomicU64>,
    applied: Arc<AtomicU64>,
}

impl RunObserver for RecordingObserver {
    fn stage_started(&self, stage: Stage, total: u64) -> ProgressCallback {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {} {}", stage, total));
        let counter = match stage {
            Stage::ApplyLabel => Arc::clone(&self.applied),
            _ => Arc::clone(&self.fetched),
        };
        Arc::new(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        })
    }

    fn stage_finished(&self, stage: Stage) {
        self.events.lock().unwrap().push(format!("end {}", stage));
    }
}

#[tokio::test(start_paused = true)]
async fn test_deals_sender_scenario() {
    let (messages, rules) = deals_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));
    let cancel = CancellationToken::new();

    let dry = orchestrator
        .run(RunMode::DryRun, &rules, &SilentObserver, &cancel)
        .await
        .unwrap();
    assert_eq!((dry.total, dry.promotional, dry.kept), (3, 2, 1));
    assert_eq!(dry.labeled, 0);
    assert_eq!(fake.calls().list_labels, 0);
    assert!(fake.calls().add_label_batches.is_empty());
    assert!(fake.labeled_with(TARGET).is_empty());

    let plan = orchestrator.plan(&rules, &SilentObserver, &cancel).await.unwrap();
    assert_eq!(plan.promotional, vec!["a", "c"]);
    assert_eq!(plan.moves[0].reason, MatchReason::Sender("deals@".to_string()));
    assert_eq!(plan.moves[1].reason, MatchReason::CategoryLabel);

    let report = orchestrator.commit(&plan, &SilentObserver, &cancel).await.unwrap();
    assert_eq!(report.labeled, 2);

    let calls = fake.calls();
    // One lookup that found nothing, then one create
    assert_eq!(calls.list_labels, 1);
    assert_eq!(calls.create_label, vec![TARGET.to_string()]);
    assert_eq!(calls.add_label_batches.len(), 1);
    assert_eq!(calls.add_label_batches[0].0, vec!["a".to_string(), "c".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_three_message_dry_run() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let report = orchestrator
        .run(RunMode::DryRun, &rules, &SilentObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.promotional, 2);
    assert_eq!(report.kept, 1);
    assert_eq!(report.unknown, 0);
    assert_eq!(report.labeled, 0);
    assert!(!report.has_failures());

    let calls = fake.calls();
    assert_eq!(calls.list_labels, 0);
    assert!(calls.create_label.is_empty());
    assert!(calls.add_label_batches.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_three_message_commit() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages).with_label("Label_7", TARGET));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let report = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.mode, RunMode::Commit);
    assert_eq!(report.labeled, 2);
    assert_eq!(report.label_failed, 0);

    let calls = fake.calls();
    assert_eq!(calls.list_labels, 1);
    assert_eq!(calls.add_label_batches.len(), 1);
    assert_eq!(
        calls.add_label_batches[0],
        (vec!["a".to_string(), "c".to_string()], "Label_7".to_string())
    );
    assert_eq!(fake.labeled_with("Label_7"), vec!["a", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_plan_commits_without_refetch() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));
    let cancel = CancellationToken::new();

    let plan = orchestrator.plan(&rules, &SilentObserver, &cancel).await.unwrap();
    assert_eq!(plan.promotional, vec!["a", "c"]);
    assert_eq!(plan.moves[0].reason, MatchReason::Domain("notion.so".to_string()));
    assert_eq!(plan.moves[1].reason, MatchReason::CategoryLabel);

    let report = orchestrator.commit(&plan, &SilentObserver, &cancel).await.unwrap();
    assert_eq!(report.labeled, 2);
    assert_eq!(report.run_id, plan.run_id);

    let calls = fake.calls();
    assert_eq!(calls.list_unread, 1);
    assert_eq!(calls.metadata_batches.len(), 1);
    // Label did not exist yet
    assert_eq!(calls.create_label, vec![TARGET.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_finds_nothing_new() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));
    let cancel = CancellationToken::new();

    orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &cancel)
        .await
        .unwrap();
    let second = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &cancel)
        .await
        .unwrap();

    // Labeled messages drop out of the unread query
    assert_eq!(second.total, 1);
    assert_eq!(second.promotional, 0);
    assert_eq!(fake.calls().add_label_batches.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_inbox_is_nothing_to_do() {
    let fake = Arc::new(FakeGmail::new(Vec::new()));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let report = orchestrator
        .run(
            RunMode::Commit,
            &rules(&["deals@"], &[], &[]),
            &SilentObserver,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.total, 0);
    assert!(report.summary_line().starts_with("Nothing to do"));
    let calls = fake.calls();
    assert!(calls.metadata_batches.is_empty());
    assert_eq!(calls.list_labels, 0);
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_aborts_before_mutation() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    fake.state().fail_list_unread = true;
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let result = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(CleanerError::ServerError { .. })));
    let calls = fake.calls();
    assert!(calls.metadata_batches.is_empty());
    assert!(calls.add_label_batches.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_stage_failure_aborts_before_mutation() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    fake.state().fail_fetch_from.insert("a".to_string());
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let result = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(CleanerError::ApiError(_))));
    assert!(fake.calls().add_label_batches.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_messages_are_never_labeled() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    fake.state().missing.insert("c".to_string());
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let report = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.unknown, 1);
    assert_eq!(report.promotional, 1);
    assert_eq!(report.kept, 1);
    assert_eq!(report.labeled, 1);
    assert!(report.has_failures());
    assert!(report.summary_line().ends_with("[incomplete]"));
    assert_eq!(fake.calls().add_label_batches[0].0, vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_stage_order_and_progress() {
    let mut messages = create_plain_messages(4);
    messages.push(create_test_message(
        "p0",
        "Deals <deals@store.example>",
        "Weekend SALE",
        &["INBOX"],
    ));
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(2));
    let observer = RecordingObserver::default();

    orchestrator
        .run(RunMode::Commit, &rules(&[], &[], &[]), &observer, &CancellationToken::new())
        .await
        .unwrap();

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "end list unread",
            "start fetch metadata 5",
            "end fetch metadata",
            "end classify",
            "start apply label 1",
            "end apply label",
            "end report",
        ]
    );
    assert_eq!(observer.fetched.load(Ordering::SeqCst), 5);
    assert_eq!(observer.applied.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_messages_caps_listing() {
    let messages = create_plain_messages(10);
    let fake = Arc::new(FakeGmail::new(messages));
    let mut config = test_config(100);
    config.cleaner.max_messages = Some(4);
    let orchestrator = Orchestrator::new(Arc::clone(&fake), config);

    let report = orchestrator
        .run(RunMode::DryRun, &rules(&[], &[], &[]), &SilentObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_sends_no_label_batches() {
    let (messages, rules) = three_message_inbox();
    let fake = Arc::new(FakeGmail::new(messages));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
        .run(RunMode::Commit, &rules, &SilentObserver, &cancel)
        .await;

    assert!(matches!(result, Err(CleanerError::Cancelled(_))));
    assert!(fake.calls().add_label_batches.is_empty());
}

#[tokio::test]
async fn test_check_connection_counts_labels() {
    let fake = Arc::new(FakeGmail::new(Vec::new()).with_label("Label_1", TARGET));
    let orchestrator = Orchestrator::new(Arc::clone(&fake), test_config(100));

    let report = orchestrator
        .check_connection(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.labels, 3);
    assert_eq!(fake.calls().list_labels, 1);
}
