use boardwatch_core::error::AppError;
use boardwatch_core::testutil::candidate;
use boardwatch_core::traits::{ListingRun, ListingStore};

use crate::integration::common::setup_repo;

#[tokio::test]
async fn insert_then_find_by_external_id() {
    let (repo, _container) = setup_repo().await;

    let mut board = candidate(4711, "Pyzel Ghost 6'0");
    board.price = Some(450.0);
    board.volume = Some(32.5);

    let mut run = repo.begin_run().await.unwrap();
    let id = run.insert(&board).await.unwrap();
    let found = run
        .find_by_external_id(4711)
        .await
        .unwrap()
        .expect("Should find the listing");
    run.commit().await.unwrap();

    assert_eq!(found.id, id);
    assert!(found.matches(&board));
    assert!(!found.removed);
    // absent is stored as NULL, not zero
    assert_eq!(found.length, None);
    assert_eq!(found.weight, None);
}

#[tokio::test]
async fn update_keeps_identity_and_first_seen() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    let id = run.insert(&candidate(1, "Fish 5'8")).await.unwrap();
    run.commit().await.unwrap();
    let before = repo.get(1).await.unwrap().unwrap();

    let mut fresh = candidate(1, "Fish 5'8 - price drop");
    fresh.price = Some(199.0);
    let mut run = repo.begin_run().await.unwrap();
    run.mark_all_removed().await.unwrap();
    let updated_id = run.update(&fresh, false).await.unwrap();
    run.commit().await.unwrap();

    let after = repo.get(1).await.unwrap().unwrap();
    assert_eq!(updated_id, id);
    assert_eq!(after.id, id);
    assert_eq!(after.first_seen_at, before.first_seen_at);
    assert!(after.last_seen_at >= before.last_seen_at);
    assert!(after.matches(&fresh));
    assert!(!after.removed);
}

#[tokio::test]
async fn update_of_unknown_listing_is_not_found() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    let err = run.update(&candidate(99, "Ghost"), false).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    run.rollback().await.unwrap();
}

#[tokio::test]
async fn duplicate_insert_is_constraint_violation_and_run_continues() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    run.insert(&candidate(1, "A")).await.unwrap();
    let err = run.insert(&candidate(1, "A again")).await.unwrap_err();
    assert!(matches!(err, AppError::ConstraintViolation(_)));

    // the failed statement was rolled back to its savepoint only
    run.insert(&candidate(2, "B")).await.unwrap();
    run.commit().await.unwrap();

    assert_eq!(repo.get(1).await.unwrap().unwrap().title, "A");
    assert!(repo.get(2).await.unwrap().is_some());
}

#[tokio::test]
async fn fence_is_invisible_until_commit() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    run.insert(&candidate(1, "A")).await.unwrap();
    run.insert(&candidate(2, "B")).await.unwrap();
    run.commit().await.unwrap();

    let mut run = repo.begin_run().await.unwrap();
    assert_eq!(run.mark_all_removed().await.unwrap(), 2);
    run.update(&candidate(2, "B"), false).await.unwrap();
    assert_eq!(run.count_removed().await.unwrap(), 1);

    // other readers still see the committed state
    assert!(!repo.get(1).await.unwrap().unwrap().removed);
    assert_eq!(repo.count(true).await.unwrap(), 0);

    run.commit().await.unwrap();
    assert!(repo.get(1).await.unwrap().unwrap().removed);
    assert!(!repo.get(2).await.unwrap().unwrap().removed);
    assert_eq!(repo.count(true).await.unwrap(), 1);
    assert_eq!(repo.count(false).await.unwrap(), 1);
}

#[tokio::test]
async fn rollback_undoes_fence_and_writes() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    run.insert(&candidate(1, "A")).await.unwrap();
    run.commit().await.unwrap();

    let mut run = repo.begin_run().await.unwrap();
    run.mark_all_removed().await.unwrap();
    run.insert(&candidate(2, "B")).await.unwrap();
    run.rollback().await.unwrap();

    assert!(!repo.get(1).await.unwrap().unwrap().removed);
    assert!(repo.get(2).await.unwrap().is_none());
}

#[tokio::test]
async fn list_hides_removed_unless_asked() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    run.insert(&candidate(1, "A")).await.unwrap();
    run.insert(&candidate(2, "B")).await.unwrap();
    run.commit().await.unwrap();

    let mut run = repo.begin_run().await.unwrap();
    run.mark_all_removed().await.unwrap();
    run.update(&candidate(2, "B"), false).await.unwrap();
    run.commit().await.unwrap();

    let active = repo.list(false, 10).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].external_id, 2);

    let all = repo.list(true, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    repo.health_check().await.unwrap();
}
