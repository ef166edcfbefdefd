use boardwatch_core::testutil::{MockFetcher, MockNotifier, candidate, index_page, listing_html};
use boardwatch_core::traits::{ListingRun, ListingStore};
use boardwatch_core::{ListingExtractor, ListingLayout, RunConfig, RunService};
use tokio_util::sync::CancellationToken;

use crate::integration::common::setup_repo;

const START: &str = "https://www.slosurf.com/ad-category/surf/deske-2/";

#[tokio::test]
async fn full_run_against_postgres() {
    let (repo, _container) = setup_repo().await;

    let mut run = repo.begin_run().await.unwrap();
    run.insert(&candidate(1, "Old board")).await.unwrap();
    run.commit().await.unwrap();

    let fetcher = MockFetcher::new().page(
        START,
        &index_page(
            &[
                listing_html(2, "Board for sale", "100,00€"),
                listing_html(3, "Kupim masko", ""),
            ],
            None,
        ),
    );
    let notifier = MockNotifier::new();
    let extractor = ListingExtractor::new(&ListingLayout::default()).unwrap();
    let svc = RunService::new(
        fetcher,
        repo.clone(),
        notifier.clone(),
        extractor,
        RunConfig::new(START),
    );

    let report = svc.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.removed, Some(1));

    assert!(repo.get(1).await.unwrap().unwrap().removed);
    let new = repo.get(2).await.unwrap().unwrap();
    assert_eq!(new.price, Some(100.0));
    assert!(!new.removed);
    assert!(repo.get(3).await.unwrap().is_none());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Board for sale"));

    // unchanged site: second run changes nothing and announces nothing
    let second = svc.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.stats.unchanged, 1);
    assert_eq!(second.stats.inserted, 0);
    assert_eq!(repo.get(2).await.unwrap().unwrap().id, new.id);
    assert_eq!(notifier.sent().len(), 1);
}
