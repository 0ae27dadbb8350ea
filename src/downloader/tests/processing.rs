use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::downloader::test_helpers::{StubBackend, TestSetup, album, track};
use crate::error::{DownloadError, Error};
use crate::models::ArtistInfo;
use crate::types::{
    DownloadRequest, Event, JobStatus, MediaIdentification, MediaKind, TrackStatus,
};

fn album_of(backend: &StubBackend, ids: &[&str]) {
    backend.add_album("a1", album("Record", ids));
    for id in ids {
        backend.add_track(id, track(&format!("Song {id}"), "a1"));
    }
}

fn album_request() -> DownloadRequest {
    DownloadRequest::new("stub", vec![MediaIdentification::new(MediaKind::Album, "a1")])
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn active_pipelines_never_exceed_the_limit() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "2", "3", "4", "5"]);
    let gate = Arc::new(Semaphore::new(0));
    backend.gate_downloads(gate.clone());
    let mut setup = TestSetup::new().with_backend("stub", &backend, 1);
    setup.config.download.concurrent_downloads = 2;
    let downloader = setup.build();

    let run = tokio::spawn(async move { downloader.run(&album_request()).await });

    wait_until("two active downloads", || backend.active_downloads() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.active_downloads(), 2);

    gate.add_permits(5);
    let outcome = run.await.unwrap().unwrap();

    assert_eq!(outcome.completed.len(), 5);
    assert_eq!(backend.max_active_downloads(), 2);
}

#[tokio::test]
async fn first_failure_aborts_the_run_when_configured() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "3"]);
    backend.add_album("a1", album("Record", &["1", "2", "3"]));
    let mut setup = TestSetup::new().with_backend("stub", &backend, 1);
    setup.config.download.concurrent_downloads = 1;
    setup.config.download.abort_on_single_failure = true;
    let downloader = setup.build();

    let err = downloader.run(&album_request()).await.unwrap_err();

    let Error::Download(DownloadError::Aborted { track_id, reason }) = err else {
        panic!("expected an abort, got {err:?}");
    };
    assert_eq!(track_id, "2");
    assert!(reason.contains("track metadata missing"));

    let job = &downloader.queue().jobs().await[0];
    assert!(!job.is_finished());
    assert!(!job.completed.contains("3"));
    assert_eq!(job.status, JobStatus::Partial);
    assert!(downloader.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn abort_interrupts_tracks_waiting_to_retry() {
    let backend = StubBackend::default();
    album_of(&backend, &["1"]);
    backend.add_album("a1", album("Record", &["1", "2"]));
    backend.fail_transiently("1", 10);
    let mut setup = TestSetup::new().with_backend("stub", &backend, 1);
    setup.config.download.abort_on_single_failure = true;
    setup.config.track_retry.initial_delay = Duration::from_secs(30);
    setup.config.track_retry.max_delay = Duration::from_secs(30);
    let downloader = setup.build();

    let err = tokio::time::timeout(Duration::from_secs(5), downloader.run(&album_request()))
        .await
        .expect("run kept waiting on the retry delay")
        .unwrap_err();

    assert!(matches!(err, Error::Download(DownloadError::Aborted { ref track_id, .. }) if track_id == "2"));
    let job = &downloader.queue().jobs().await[0];
    assert!(!job.completed.contains("1"));
    assert!(!job.failed.contains_key("1"));
}

#[tokio::test]
async fn failures_do_not_abort_by_default() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "3"]);
    backend.add_album("a1", album("Record", &["1", "2", "3"]));
    let mut setup = TestSetup::new().with_backend("stub", &backend, 1);
    setup.config.download.concurrent_downloads = 1;

    let outcome = setup.build().run(&album_request()).await.unwrap();

    assert_eq!(outcome.completed, vec!["1", "3"]);
    assert_eq!(outcome.failed.len(), 1);
}

#[tokio::test]
async fn external_cancellation_stops_in_flight_tracks_unmarked() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "2"]);
    let gate = Arc::new(Semaphore::new(0));
    backend.gate_downloads(gate.clone());
    let setup = TestSetup::new().with_backend("stub", &backend, 1);
    let downloader = setup.build();
    let token = downloader.cancellation_token().clone();
    let queue = downloader.queue().clone();

    let run = tokio::spawn(async move { downloader.run(&album_request()).await });

    wait_until("both downloads in flight", || backend.active_downloads() == 2).await;
    token.cancel();
    gate.add_permits(2);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Download(DownloadError::Cancelled)));

    let job = &queue.jobs().await[0];
    assert_eq!(job.finished_tracks(), 0);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(setup.tagger.calls().is_empty());
}

#[tokio::test]
async fn panicking_pipeline_fails_only_its_track() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "2"]);
    backend.panic_on("2");
    let setup = TestSetup::new().with_backend("stub", &backend, 1);

    let outcome = setup.build().run(&album_request()).await.unwrap();

    assert_eq!(outcome.completed, vec!["1"]);
    assert_eq!(
        outcome.failed,
        vec![("2".to_string(), "track pipeline panicked".to_string())]
    );
}

#[tokio::test]
async fn empty_request_finishes_immediately() {
    let backend = StubBackend::default();
    let setup = TestSetup::new().with_backend("stub", &backend, 1);
    let mut events = setup.events.subscribe();

    let outcome = setup.build().run(&DownloadRequest::new("stub", Vec::new())).await.unwrap();

    assert!(outcome.completed.is_empty());
    assert!(outcome.failed.is_empty());
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::QueueReady { jobs: 0, tracks: 0 }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::DownloadFinished { completed: 0, failed: 0 }
    ));
}

#[tokio::test]
async fn run_events_bracket_track_progress() {
    let backend = StubBackend::default();
    album_of(&backend, &["1", "2"]);
    let setup = TestSetup::new().with_backend("stub", &backend, 1);
    let mut events = setup.events.subscribe();

    setup.build().run(&album_request()).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    let lifecycle: Vec<&Event> = received
        .iter()
        .filter(|e| !matches!(e, Event::TrackProgress(_)))
        .collect();
    assert_eq!(lifecycle.len(), 3, "got {lifecycle:?}");
    assert!(matches!(lifecycle[0], Event::QueueReady { jobs: 1, tracks: 2 }));
    assert!(matches!(
        lifecycle[1],
        Event::JobFinished { status: JobStatus::Completed, completed: 2, .. }
    ));
    assert!(matches!(
        lifecycle[2],
        Event::DownloadFinished { completed: 2, failed: 0 }
    ));
    assert!(received.iter().any(|e| matches!(e, Event::TrackProgress(_))));
}

#[tokio::test]
async fn tasks_dropped_by_failover_end_in_a_terminal_state() {
    let backend = StubBackend::default();
    backend.add_artist(
        "ar",
        ArtistInfo {
            name: "Artist".into(),
            albums: vec!["a1".into(), "a2".into()],
            ..Default::default()
        },
    );
    album_of(&backend, &["1", "2"]);
    backend.add_album("a2", album("Second", &["3"]));
    backend.add_track("3", track("Song 3", "a2"));
    backend.restrict_item(0, "a2");
    let setup = TestSetup::new().with_backend("stub", &backend, 2);
    let mut events = setup.events.subscribe();

    let request = DownloadRequest::new("stub", vec![MediaIdentification::new(MediaKind::Artist, "ar")]);
    let outcome = setup.build().run(&request).await.unwrap();
    assert_eq!(outcome.completed.len(), 3);

    let mut last_status = HashMap::new();
    while let Ok(event) = events.try_recv() {
        if let Event::TrackProgress(progress) = event {
            last_status.insert(progress.task_id, progress.status);
        }
    }
    assert!(last_status.len() > 3, "account 0 tasks were never reported");
    let stuck: Vec<_> = last_status
        .iter()
        .filter(|(_, status)| !status.is_terminal())
        .collect();
    assert!(stuck.is_empty(), "tasks left open: {stuck:?}");
    let skipped = last_status
        .values()
        .filter(|status| **status == TrackStatus::Skipped)
        .count();
    assert_eq!(skipped, last_status.len() - 3);
}
