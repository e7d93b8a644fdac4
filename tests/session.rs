use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hostvisor::host::{InMemoryDocument, InMemoryHost, InMemoryProcesses};
use hostvisor::{
    DocumentState, Event, EventKind, ForceReason, PageOutcome, Session, SessionBuilder,
    SessionConfig, SessionError, SessionOutcome, SessionReport, Subscribe,
};
use tokio::task::JoinHandle;

const PID: u32 = 31337;

struct Harness {
    _dir: tempfile::TempDir,
    host: Arc<InMemoryHost>,
    procs: Arc<InMemoryProcesses>,
    session: Arc<Session>,
}

fn config(dir: &tempfile::TempDir) -> SessionConfig {
    SessionConfig {
        output_dir: dir.path().join("out"),
        deadline: Duration::from_secs(2),
        poll_interval: Duration::from_millis(100),
        cancel_on_signal: false,
        ..SessionConfig::default()
    }
}

fn harness_with(edit: impl FnOnce(&mut SessionConfig), subs: Vec<Arc<dyn Subscribe>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir);
    edit(&mut cfg);

    let host = InMemoryHost::new();
    let procs = InMemoryProcesses::new();
    procs.spawn(PID, true);
    host.bind_process(procs.clone(), PID);

    let session = SessionBuilder::new(cfg, host.clone(), procs.clone())
        .with_subscribers(subs)
        .build();
    Harness {
        _dir: dir,
        host,
        procs,
        session,
    }
}

fn harness() -> Harness {
    harness_with(|_| {}, Vec::new())
}

fn spawn_run(session: &Arc<Session>) -> JoinHandle<SessionReport> {
    let s = Arc::clone(session);
    tokio::spawn(async move { s.run().await })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

fn track(h: &Harness, name: &str, pages: u32) -> (InMemoryDocument, hostvisor::DocumentId) {
    let doc = h.host.add_document(name, pages);
    let id = h.session.track(doc.proxy()).unwrap();
    (doc, id)
}

#[tokio::test(start_paused = true)]
async fn graceful_close_exports_releases_and_quits_host() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 3);
    let run = spawn_run(&h.session);
    settle().await;

    h.host.close(&doc);
    let report = run.await.unwrap();

    assert_eq!(report.outcome, Ok(SessionOutcome::AllClosedGracefully));
    assert_eq!(report.host_pid, Some(PID));
    let entry = report.document(id).unwrap();
    assert_eq!(entry.state, DocumentState::ResourceReleased);
    assert!(!entry.forced);
    let job = entry.job.as_ref().unwrap();
    assert_eq!(job.succeeded(), 3);
    for i in 1..=3 {
        assert!(h.session.config().output_dir.join(format!("Page_{i}.png")).is_file());
    }

    assert_eq!(doc.release_calls(), 1);
    assert_eq!(h.host.terminate_calls(), 1);
    assert_eq!(h.host.release_calls(), 1);
    assert_eq!(h.procs.kill_calls(), 0);
    assert!(report.cleanup_failures.is_empty());
}

#[tokio::test(start_paused = true)]
async fn untracked_documents_are_never_touched() {
    let h = harness();
    let (_mine, id) = track(&h, "mine.pptx", 2);
    let stranger = h.host.add_document("stranger.pptx", 4);
    let run = spawn_run(&h.session);
    settle().await;

    for _ in 0..3 {
        h.host.save(&stranger);
    }
    h.host.close(&stranger);
    settle().await;

    assert_eq!(stranger.export_calls(), 0);
    assert_eq!(stranger.page_listing_calls(), 0);
    assert_eq!(stranger.release_calls(), 0);
    assert_eq!(h.session.registry().state(id), Some(DocumentState::Open));

    h.session.cancellation_token().cancel();
    run.await.unwrap();
    assert_eq!(stranger.release_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn save_then_close_exports_once_and_releases_once() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 2);
    let run = spawn_run(&h.session);
    settle().await;

    h.host.save(&doc);
    h.host.save(&doc);
    h.host.close(&doc);
    h.host.fire(hostvisor::host::HostEventClass::CloseFinal, &doc);
    let report = run.await.unwrap();

    assert!(report.is_graceful());
    assert_eq!(doc.export_calls(), 2);
    assert_eq!(doc.release_calls(), 1);
    assert_eq!(report.document(id).unwrap().job.as_ref().unwrap().pages.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_export_returns_the_recorded_job() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 3);

    let first = h.session.export(id).unwrap();
    let calls = doc.export_calls();
    let second = h.session.export(id).unwrap();

    assert_eq!(first, second);
    assert_eq!(doc.export_calls(), calls);
    assert_eq!(h.session.registry().state(id), Some(DocumentState::Closed));
}

#[tokio::test(start_paused = true)]
async fn one_failing_page_does_not_abort_the_job() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 4);
    doc.page(3).unwrap().fail_exports();

    let job = h.session.export(id).unwrap();

    assert_eq!(job.pages.len(), 4);
    assert_eq!(job.succeeded(), 3);
    assert_eq!(job.failed(), 1);
    assert!(matches!(job.pages[2].outcome, PageOutcome::Failed { .. }));
    assert_eq!(job.pages[2].index, 3);
    assert!(!h.session.config().output_dir.join("Page_3.png").exists());
    assert!(h.session.config().output_dir.join("Page_4.png").is_file());
    for i in 1..=4 {
        assert_eq!(doc.page(i).unwrap().release_calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn events_for_b_never_mutate_a() {
    let h = harness();
    let (a, ida) = track(&h, "a.pptx", 2);
    let (b, idb) = track(&h, "b.pptx", 2);
    let run = spawn_run(&h.session);
    settle().await;

    h.host.save(&b);
    h.host.close(&b);
    settle().await;

    assert_eq!(h.session.registry().state(ida), Some(DocumentState::Open));
    assert_eq!(a.export_calls(), 0);
    assert_eq!(a.release_calls(), 0);
    assert_eq!(h.session.registry().state(idb), Some(DocumentState::ResourceReleased));

    h.host.close(&a);
    let report = run.await.unwrap();
    assert!(report.is_graceful());
}

#[tokio::test(start_paused = true)]
async fn deadline_forces_release_before_kill() {
    let h = harness();
    let (doc, id) = track(&h, "stuck.pptx", 1);

    let started = tokio::time::Instant::now();
    let report = h.session.run().await;

    assert_eq!(
        report.outcome,
        Ok(SessionOutcome::ForcedTermination {
            reason: ForceReason::DeadlineElapsed,
            killed: true,
        })
    );
    assert!(started.elapsed() >= Duration::from_secs(2));
    let entry = report.document(id).unwrap();
    assert_eq!(entry.state, DocumentState::ResourceReleased);
    assert!(entry.forced);
    assert_eq!(doc.release_calls(), 1);
    assert_eq!(h.procs.kill_calls(), 1);
    assert_eq!(h.host.terminate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn partial_progress_does_not_refresh_the_deadline() {
    let h = harness();
    let (a, ida) = track(&h, "a.pptx", 1);
    let (b, idb) = track(&h, "b.pptx", 1);
    let (_c, idc) = track(&h, "c.pptx", 1);
    let run = spawn_run(&h.session);

    tokio::time::sleep(Duration::from_millis(800)).await;
    h.host.close(&a);
    tokio::time::sleep(Duration::from_millis(800)).await;
    h.host.close(&b);

    let started = tokio::time::Instant::now();
    let report = run.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(
        report.outcome,
        Ok(SessionOutcome::ForcedTermination {
            reason: ForceReason::DeadlineElapsed,
            killed: true,
        })
    );
    let forced: Vec<_> = report.documents.iter().filter(|d| d.forced).map(|d| d.id).collect();
    assert_eq!(forced, vec![idc]);
    for id in [ida, idb, idc] {
        assert_eq!(report.document(id).unwrap().state, DocumentState::ResourceReleased);
    }
}

#[tokio::test(start_paused = true)]
async fn invisible_candidates_are_ambiguous_and_never_killed() {
    let dir = tempfile::tempdir().unwrap();
    let host = InMemoryHost::new();
    let procs = InMemoryProcesses::new();
    procs.spawn(10, false);
    procs.spawn(11, false);
    let session = SessionBuilder::new(config(&dir), host.clone(), procs.clone()).build();
    let doc = host.add_document("deck.pptx", 1);
    let id = session.track(doc.proxy()).unwrap();

    let report = session.run().await;

    assert_eq!(
        report.outcome,
        Err(SessionError::AmbiguousProcess {
            candidates: vec![10, 11],
            visible: vec![],
        })
    );
    assert_eq!(report.host_pid, None);
    assert_eq!(procs.kill_calls(), 0);
    assert_eq!(doc.release_calls(), 1);
    assert_eq!(report.document(id).unwrap().state, DocumentState::ResourceReleased);
}

#[tokio::test(start_paused = true)]
async fn cancellation_cleans_up_without_waiting_for_the_deadline() {
    let h = harness_with(|cfg| cfg.deadline = Duration::from_secs(3600), Vec::new());
    let (doc, _id) = track(&h, "deck.pptx", 1);
    let run = spawn_run(&h.session);
    settle().await;

    h.session.cancellation_token().cancel();
    let report = run.await.unwrap();

    assert_eq!(
        report.outcome,
        Ok(SessionOutcome::ForcedTermination {
            reason: ForceReason::Cancelled,
            killed: true,
        })
    );
    assert_eq!(doc.release_calls(), 1);
    assert_eq!(h.host.release_calls(), 1);
    for class in hostvisor::host::HostEventClass::ALL {
        assert_eq!(h.host.subscriber_count(class), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn unkillable_host_fails_the_session() {
    let h = harness();
    track(&h, "deck.pptx", 1);
    h.procs.fail_kills(
        hostvisor::HostError::PermissionDenied {
            error: "access denied".into(),
        },
        true,
    );

    let report = h.session.run().await;

    match report.outcome {
        Err(SessionError::ForcedTerminationFailed { pid, deadline, .. }) => {
            assert_eq!(pid, PID);
            assert_eq!(deadline, Duration::from_secs(2));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn release_failures_are_reported_not_fatal() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 1);
    doc.fail_release();
    let run = spawn_run(&h.session);
    settle().await;

    h.host.close(&doc);
    let report = run.await.unwrap();

    assert!(report.is_graceful());
    assert_eq!(report.cleanup_failures.len(), 1);
    assert_eq!(report.failed_cleanup_documents(), vec![id]);
    assert_eq!(doc.release_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unlistable_pages_still_release_the_document() {
    let h = harness();
    let (doc, id) = track(&h, "deck.pptx", 2);
    doc.fail_page_listing();
    let run = spawn_run(&h.session);
    settle().await;

    h.host.close(&doc);
    let report = run.await.unwrap();

    let job = report.document(id).unwrap().job.clone().unwrap();
    assert!(job.listing_error.is_some());
    assert!(job.pages.is_empty());
    assert_eq!(doc.release_calls(), 1);
    assert!(report.is_graceful());
}

#[tokio::test(start_paused = true)]
async fn open_tracks_documents_by_path() {
    let h = harness();
    h.host.stage_file("/decks/q3.pptx", 5);

    let id = h.session.open("/decks/q3.pptx").unwrap();
    assert_eq!(h.session.registry().state(id), Some(DocumentState::Open));
    assert_eq!(h.session.export(id).unwrap().succeeded(), 5);

    assert!(h.session.open("/decks/missing.pptx").is_err());
    assert_eq!(h.session.registry().len(), 1);
}

#[derive(Default)]
struct Recorder {
    kinds: Mutex<Vec<EventKind>>,
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.kinds.lock().unwrap().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_the_whole_run() {
    let rec = Arc::new(Recorder::default());
    let h = harness_with(|_| {}, vec![rec.clone()]);
    let (doc, _id) = track(&h, "deck.pptx", 2);
    let run = spawn_run(&h.session);
    settle().await;

    h.host.close(&doc);
    run.await.unwrap();

    let kinds = rec.kinds.lock().unwrap().clone();
    for expected in [
        EventKind::ProcessCaptured,
        EventKind::CloseRequested,
        EventKind::ExportStarted,
        EventKind::PageExported,
        EventKind::ExportCompleted,
        EventKind::CloseFinal,
        EventKind::DocumentReleased,
        EventKind::HostTerminateRequested,
        EventKind::AllClosedGracefully,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
    let completed = kinds.iter().position(|k| *k == EventKind::ExportCompleted);
    let released = kinds.iter().position(|k| *k == EventKind::DocumentReleased);
    assert!(completed < released);
}
