//! # Demo: export_on_close
//!
//! Supervises an in-memory host with three open documents, two of them tracked.
//! One tracked deck is closed by the "user"; the other is left open, so the
//! session ends on its deadline with a forced cleanup and a kill.
//!
//! ## Flow
//! ```text
//! SessionBuilder::build()
//!   ├─► track(q3.pptx), open(roadmap.pptx)        (notes.pptx stays untracked)
//!   ├─► run()
//!   │     ├─► capture pid 4242
//!   │     ├─► host closes q3 + notes ──► router: export q3, release q3; notes dropped
//!   │     └─► deadline ──► release_all(roadmap) ──► kill(4242)
//!   └─► SessionReport
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example export_on_close
//! ```

use std::sync::Arc;
use std::time::Duration;

use hostvisor::host::{InMemoryHost, InMemoryProcesses};
use hostvisor::{LogWriter, SessionBuilder, SessionConfig, Subscribe};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out = tempfile::tempdir()?;
    let cfg = SessionConfig {
        output_dir: out.path().join("slides"),
        deadline: Duration::from_secs(2),
        poll_interval: Duration::from_millis(100),
        ..SessionConfig::default()
    };

    let host = InMemoryHost::new();
    let procs = InMemoryProcesses::new();
    procs.spawn(4242, true);
    procs.spawn(4243, false);
    host.bind_process(procs.clone(), 4242);
    host.stage_file("roadmap.pptx", 2);

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let session = SessionBuilder::new(cfg, host.clone(), procs.clone())
        .with_subscribers(subs)
        .build();

    let q3 = host.add_document("q3.pptx", 4);
    let notes = host.add_document("notes.pptx", 1);
    session.track(q3.proxy())?;
    session.open("roadmap.pptx")?;

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    host.close(&notes);
    host.close(&q3);

    let report = runner.await?;
    println!("outcome: {:?}", report.outcome);
    for doc in &report.documents {
        let pages = doc
            .job
            .as_ref()
            .map(|j| format!("{}/{} pages", j.succeeded(), j.page_count))
            .unwrap_or_else(|| "not exported".to_string());
        println!(
            "{} [{}] {:?} forced={} {}",
            doc.id, doc.tag, doc.state, doc.forced, pages
        );
    }
    println!("kills issued: {}", procs.kill_calls());
    Ok(())
}
