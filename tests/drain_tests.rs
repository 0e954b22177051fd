//! Integration tests for batch mutation and the drain loop

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{fast_retry, item_refs, user_label, FakeMailbox, MockTransport, MutateBehavior};
use gmail_sweep::cli::{run_drain, ActionArgs, FilterArgs, ProgressReporter};
use gmail_sweep::config::Config;
use gmail_sweep::error::GmailError;
use gmail_sweep::mutation::{BatchMutationExecutor, DrainBudget, Mutation, MutationSpec};
use gmail_sweep::pagination::PaginatedFetcher;
use gmail_sweep::query::Filter;
use tokio_util::sync::CancellationToken;

fn promotions() -> Filter {
    Filter::new().from_addr("deals@shop.example")
}

fn no_labels() -> BTreeSet<String> {
    BTreeSet::new()
}

fn trash() -> Mutation {
    Mutation::Relabel(MutationSpec::trash())
}

#[tokio::test]
async fn test_drain_shrinking_set_terminates_with_total() {
    let mailbox = FakeMailbox::new(item_refs("m", 2500), MutateBehavior::Shrink);
    let executor = BatchMutationExecutor::new(&mailbox).with_retry(fast_retry());

    let mutated = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mutated, 2500);
    assert_eq!(mailbox.remaining(), 0);

    let sizes: Vec<usize> = mailbox.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
    for (add, remove) in mailbox.batch_labels() {
        assert_eq!(add, vec!["TRASH".to_string()]);
        assert!(remove.is_empty());
    }
}

#[tokio::test]
async fn test_drain_round_limit_splits_into_rounds() {
    let mailbox = FakeMailbox::new(item_refs("m", 25), MutateBehavior::Shrink);
    let fetcher = PaginatedFetcher::new(&mailbox).with_page_size(5);
    let executor = BatchMutationExecutor::new(&mailbox)
        .with_fetcher(fetcher)
        .with_round_limit(10)
        .with_batch_size(4);

    let mutated = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mutated, 25);
    // rounds of 10, 10, 5 in batches of at most 4
    let sizes: Vec<usize> = mailbox.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 4, 2, 4, 4, 2, 4, 1]);
}

#[tokio::test]
async fn test_drain_empty_match_makes_no_batch_calls() {
    let mailbox = FakeMailbox::new(Vec::new(), MutateBehavior::Shrink);
    let mutated = BatchMutationExecutor::new(&mailbox)
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mutated, 0);
    assert_eq!(mailbox.list_calls(), 1);
    assert_eq!(mailbox.batch_calls(), 0);
}

#[tokio::test]
async fn test_drain_is_idempotent() {
    let mailbox = FakeMailbox::new(item_refs("m", 30), MutateBehavior::Shrink);
    let executor = BatchMutationExecutor::new(&mailbox);
    let cancel = CancellationToken::new();

    let first = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &cancel)
        .await
        .unwrap();
    let calls_after_first = mailbox.batch_calls();
    let second = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &cancel)
        .await
        .unwrap();

    assert_eq!(first, 30);
    assert_eq!(second, 0);
    assert_eq!(mailbox.batch_calls(), calls_after_first);
}

#[tokio::test]
async fn test_drain_stuck_set_stops_at_round_budget() {
    let mailbox = FakeMailbox::new(item_refs("m", 3), MutateBehavior::Stuck);
    let executor = BatchMutationExecutor::new(&mailbox).with_budget(DrainBudget {
        max_rounds: 4,
        max_duration: None,
    });

    let result = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await;

    match result {
        Err(GmailError::MutationFailed { mutated, source }) => {
            assert_eq!(mutated, 12);
            assert!(matches!(*source, GmailError::DrainBudgetExceeded { rounds: 4 }));
        }
        other => panic!("expected MutationFailed, got {other:?}"),
    }
    assert_eq!(mailbox.batch_calls(), 4);
    assert_eq!(mailbox.list_calls(), 5);
}

#[tokio::test]
async fn test_drain_stuck_set_stops_on_cancellation() {
    let mailbox = FakeMailbox::new(item_refs("m", 3), MutateBehavior::Stuck);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let executor = BatchMutationExecutor::new(&mailbox)
        .with_budget(DrainBudget {
            max_rounds: u32::MAX,
            max_duration: None,
        })
        .with_progress(Arc::new(move |done| {
            if done >= 6 {
                trigger.cancel();
            }
        }));

    let result = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &cancel)
        .await;

    match result {
        Err(GmailError::MutationFailed { mutated, source }) => {
            assert_eq!(mutated, 6);
            assert!(matches!(
                source.root_cause(),
                GmailError::OperationCancelled(_)
            ));
        }
        other => panic!("expected MutationFailed, got {other:?}"),
    }
    assert_eq!(mailbox.batch_calls(), 2);
}

#[tokio::test]
async fn test_drain_failure_reports_partial_progress() {
    let mailbox = FakeMailbox::new(item_refs("m", 10), MutateBehavior::Shrink)
        .fail_batch_call(3, GmailError::Forbidden("insufficient scope".to_string()));
    let executor = BatchMutationExecutor::new(&mailbox)
        .with_batch_size(4)
        .with_retry(fast_retry());

    let result = executor
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await;

    match result {
        Err(GmailError::MutationFailed { mutated, source }) => {
            assert_eq!(mutated, 8);
            assert!(matches!(*source, GmailError::Forbidden(_)));
        }
        other => panic!("expected MutationFailed, got {other:?}"),
    }
    // applied batches stay applied
    assert_eq!(mailbox.remaining(), 2);
}

#[tokio::test]
async fn test_drain_transient_batch_failure_is_retried() {
    let mailbox = FakeMailbox::new(item_refs("m", 5), MutateBehavior::Shrink).fail_batch_call(
        1,
        GmailError::RateLimitExceeded { retry_after: 0 },
    );
    let mutated = BatchMutationExecutor::new(&mailbox)
        .with_retry(fast_retry())
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mutated, 5);
    assert_eq!(mailbox.batch_calls(), 2);
}

#[tokio::test]
async fn test_drain_permanent_delete_uses_batch_delete() {
    let mailbox = FakeMailbox::new(item_refs("m", 3), MutateBehavior::Shrink);
    let mutated = BatchMutationExecutor::new(&mailbox)
        .drain_matching(
            &promotions(),
            &no_labels(),
            &Mutation::PermanentDelete,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(mutated, 3);
    assert_eq!(mailbox.deleted(), vec!["m0", "m1", "m2"]);
    assert!(mailbox.batch_labels().is_empty());
}

#[tokio::test]
async fn test_trash_drain_converges_when_config_includes_trash() {
    let mailbox = FakeMailbox::new(item_refs("m", 3), MutateBehavior::Trash);
    let mut config = Config::default();
    config.fetch.include_spam_trash = true;

    let mutated = BatchMutationExecutor::from_config(&mailbox, &config)
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mutated, 3);
    assert_eq!(mailbox.batch_calls(), 1);
    assert_eq!(mailbox.remaining(), 0);
    let requests = mailbox.list_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| !r.include_spam_trash));
}

#[tokio::test]
async fn test_non_trash_drain_keeps_configured_trash_listing() {
    let mailbox = FakeMailbox::new(item_refs("m", 3), MutateBehavior::Shrink);
    let mut config = Config::default();
    config.fetch.include_spam_trash = true;

    let mutated = BatchMutationExecutor::from_config(&mailbox, &config)
        .drain_matching(
            &promotions(),
            &no_labels(),
            &Mutation::Relabel(MutationSpec::archive()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(mutated, 3);
    assert!(mailbox.list_requests().iter().all(|r| r.include_spam_trash));
}

#[tokio::test]
async fn test_drain_reports_progress() {
    let mailbox = FakeMailbox::new(item_refs("m", 9), MutateBehavior::Shrink);
    let seen = Arc::new(AtomicUsize::new(0));
    let recorder = Arc::clone(&seen);

    BatchMutationExecutor::new(&mailbox)
        .with_batch_size(4)
        .with_progress(Arc::new(move |done| recorder.store(done, Ordering::SeqCst)))
        .drain_matching(&promotions(), &no_labels(), &trash(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_drain_invalid_filter_makes_no_calls() {
    let mut mock = MockTransport::new();
    mock.expect_list_page().times(0);
    mock.expect_batch_modify().times(0);

    let filter = Filter::new().subject("   ");
    let result = BatchMutationExecutor::new(&mock)
        .drain_matching(&filter, &no_labels(), &trash(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(GmailError::Validation { .. })));
}

#[test]
fn test_empty_mutation_spec_is_rejected() {
    let empty: [&str; 0] = [];
    assert!(matches!(
        MutationSpec::new(empty, empty),
        Err(GmailError::Validation { field: "mutation", .. })
    ));
    assert!(MutationSpec::new(["TRASH"], ["TRASH"]).is_err());
}

#[tokio::test]
async fn test_drain_command_without_action_makes_no_calls() {
    let mut mock = MockTransport::new();
    mock.expect_list_labels().times(0);
    mock.expect_list_page().times(0);
    mock.expect_batch_modify().times(0);

    let filter = FilterArgs {
        from: Some("deals@shop.example".to_string()),
        ..Default::default()
    };
    let result = run_drain(
        &mock,
        &Config::default(),
        &filter,
        &ActionArgs::default(),
        None,
        false,
        &CancellationToken::new(),
        &ProgressReporter::new(),
    )
    .await;

    assert!(matches!(result, Err(GmailError::Validation { .. })));
}

#[tokio::test]
async fn test_drain_command_refuses_unfiltered_mailbox() {
    let mut mock = MockTransport::new();
    mock.expect_list_page().times(0);

    let action = ActionArgs {
        trash: true,
        ..Default::default()
    };
    let result = run_drain(
        &mock,
        &Config::default(),
        &FilterArgs::default(),
        &action,
        None,
        false,
        &CancellationToken::new(),
        &ProgressReporter::new(),
    )
    .await;

    assert!(matches!(result, Err(GmailError::Validation { field: "filter", .. })));
}

#[tokio::test]
async fn test_drain_command_rejects_zero_rounds() {
    let mut mock = MockTransport::new();
    mock.expect_list_labels().times(0);
    mock.expect_list_page().times(0);
    mock.expect_batch_modify().times(0);

    let filter = FilterArgs {
        from: Some("deals@shop.example".to_string()),
        ..Default::default()
    };
    let action = ActionArgs {
        trash: true,
        ..Default::default()
    };
    let result = run_drain(
        &mock,
        &Config::default(),
        &filter,
        &action,
        Some(0),
        false,
        &CancellationToken::new(),
        &ProgressReporter::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(GmailError::Validation { field: "max_rounds", .. })
    ));
}

#[tokio::test]
async fn test_drain_command_resolves_label_names() {
    let mailbox = FakeMailbox::new(item_refs("m", 4), MutateBehavior::Shrink)
        .with_label(user_label("Label_3", "Newsletters"));
    let filter = FilterArgs {
        labels: vec!["newsletters".to_string()],
        ..Default::default()
    };
    let action = ActionArgs {
        remove: vec!["INBOX".to_string()],
        ..Default::default()
    };

    run_drain(
        &mailbox,
        &Config::default(),
        &filter,
        &action,
        None,
        false,
        &CancellationToken::new(),
        &ProgressReporter::new(),
    )
    .await
    .unwrap();

    assert_eq!(mailbox.list_requests()[0].label_ids, vec!["Label_3"]);
    assert_eq!(
        mailbox.batch_labels(),
        vec![(Vec::<String>::new(), vec!["INBOX".to_string()])]
    );
    assert_eq!(mailbox.remaining(), 0);
}

#[tokio::test]
async fn test_drain_command_dry_run_mutates_nothing() {
    let mailbox = FakeMailbox::new(item_refs("m", 4), MutateBehavior::Shrink);
    let filter = FilterArgs {
        unread: true,
        ..Default::default()
    };
    let action = ActionArgs {
        delete: true,
        ..Default::default()
    };

    run_drain(
        &mailbox,
        &Config::default(),
        &filter,
        &action,
        None,
        true,
        &CancellationToken::new(),
        &ProgressReporter::new(),
    )
    .await
    .unwrap();

    assert_eq!(mailbox.batch_calls(), 0);
    assert_eq!(mailbox.remaining(), 4);
}

#[tokio::test]
async fn test_apply_batch_rejects_oversized_batch() {
    let mut mock = MockTransport::new();
    mock.expect_batch_modify().times(0);

    let executor = BatchMutationExecutor::new(&mock);
    let too_many = item_refs("m", 1001);
    let result = executor.apply_batch(&too_many, &trash()).await;
    assert!(matches!(result, Err(GmailError::Validation { .. })));

    let result = executor.apply_batch(&[], &trash()).await;
    assert!(matches!(result, Err(GmailError::Validation { .. })));
}

#[tokio::test]
async fn test_apply_batch_sends_label_sets() {
    let mut mock = MockTransport::new();
    mock.expect_batch_modify()
        .withf(|ids, add, remove| {
            ids.len() == 2 && add == ["Label_9".to_string()] && remove == ["INBOX".to_string()]
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let spec = MutationSpec::new(["Label_9"], ["INBOX"]).unwrap();
    BatchMutationExecutor::new(&mock)
        .apply_batch(&item_refs("m", 2), &Mutation::Relabel(spec))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_apply_batch_wraps_provider_rejection() {
    let mut mock = MockTransport::new();
    mock.expect_batch_delete()
        .times(1)
        .returning(|_| Err(GmailError::NotFound("m0".to_string())));

    let result = BatchMutationExecutor::new(&mock)
        .with_retry(fast_retry())
        .apply_batch(&item_refs("m", 1), &Mutation::PermanentDelete)
        .await;

    match result {
        Err(GmailError::MutationFailed { mutated, source }) => {
            assert_eq!(mutated, 0);
            assert!(matches!(*source, GmailError::NotFound(_)));
        }
        other => panic!("expected MutationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_item_operations() {
    let mailbox = FakeMailbox::new(Vec::new(), MutateBehavior::Shrink);
    let executor = BatchMutationExecutor::new(&mailbox);

    executor.trash_message("m1").await.unwrap();
    executor.untrash_message("m1").await.unwrap();
    executor.modify_message("m2", &MutationSpec::mark_read()).await.unwrap();
    executor.delete_message("m3").await.unwrap();
    executor.trash_thread("t1").await.unwrap();
    executor.untrash_thread("t1").await.unwrap();
    executor.modify_thread("t2", &MutationSpec::archive()).await.unwrap();

    assert_eq!(
        mailbox.single_calls(),
        vec![
            "trash_message m1".to_string(),
            "untrash_message m1".to_string(),
            "modify_message m2 +[] -[\"UNREAD\"]".to_string(),
            "delete_message m3".to_string(),
            "trash_thread t1".to_string(),
            "untrash_thread t1".to_string(),
            "modify_thread t2 +[] -[\"INBOX\"]".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_single_item_rejects_empty_id() {
    let mut mock = MockTransport::new();
    mock.expect_trash_message().times(0);

    let result = BatchMutationExecutor::new(&mock).trash_message(" ").await;
    assert!(matches!(result, Err(GmailError::Validation { .. })));
}
