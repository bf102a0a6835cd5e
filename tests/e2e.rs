//! End-to-end integration tests for docx2pdf-pipeline.
//!
//! These tests talk to a live Redis server. They are gated behind the
//! `E2E_ENABLED` environment variable and need `REDIS_URL` pointing at a
//! disposable instance, so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 REDIS_URL=redis://127.0.0.1:6379 cargo test --test e2e -- --nocapture
//!
//! Every test uses its own key prefix and keys expire after a minute.

use async_trait::async_trait;
use docx2pdf_pipeline::{
    Collaborators, ConversionJob, ConvertError, Converter, FileState, IdempotencyStore,
    LocalQueue, Pipeline, PipelineConfig, ProcessInspector, RedisQueue, RedisStore,
    StateTracker, StoreError, WorkItem, WorkQueue,
};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ── Test helpers ─────────────────────────────────────────────────────────────

const TTL: Duration = Duration::from_secs(60);

/// Skip this test unless E2E_ENABLED and REDIS_URL are set; yields the URL.
macro_rules! e2e_redis_url {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        init_tracing();
        match std::env::var("REDIS_URL") {
            Ok(url) => url,
            Err(_) => {
                println!("SKIP — set REDIS_URL to a disposable Redis instance");
                return;
            }
        }
    }};
}

/// Route library logs through the test harness; `RUST_LOG` overrides.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docx2pdf_pipeline=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn unique_prefix(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("e2e-{test}-{}-{nanos}", std::process::id())
}

/// Copies the source to the target and counts calls across pipelines.
#[derive(Default)]
struct CopyConverter {
    calls: AtomicUsize,
}

#[async_trait]
impl Converter for CopyConverter {
    async fn convert(&self, job: ConversionJob<'_>) -> Result<(), ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::fs::copy(job.source, job.target)
            .await
            .map(|_| ())
            .map_err(|source| ConvertError::Output {
                path: job.target.to_path_buf(),
                source,
            })
    }
}

struct NoProcesses;

#[async_trait]
impl ProcessInspector for NoProcesses {
    async fn list(&self) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn kill(&self, _pid: u32) -> io::Result<()> {
        Ok(())
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let url = e2e_redis_url!();
    let store: Arc<dyn IdempotencyStore> = Arc::new(RedisStore::connect(&url).await.unwrap());
    let ns = format!("{}:state:", unique_prefix("claim"));
    let tracker = StateTracker::for_processing(store.clone(), ns, TTL);

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let t = tracker.clone();
            tokio::spawn(async move { t.try_claim("report.docx").await })
        })
        .collect();
    let mut wins = 0;
    for a in attempts {
        if a.await.unwrap() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(
        tracker.state("report.docx").await.unwrap(),
        FileState::Processing
    );
    assert!(tracker.mark_processed("report.docx").await);
    assert!(tracker
        .is_in_state("report.docx", FileState::Processed)
        .await
        .unwrap());
    assert!(tracker.remove("report.docx").await);
    store.close().await;
}

#[tokio::test]
async fn test_ttl_expiry_readmits() {
    let url = e2e_redis_url!();
    let store: Arc<dyn IdempotencyStore> = Arc::new(RedisStore::connect(&url).await.unwrap());
    let ns = format!("{}:state:", unique_prefix("ttl"));
    let tracker = StateTracker::for_processing(store.clone(), ns, Duration::from_secs(1));

    assert!(tracker.try_claim("a.docx").await);
    assert!(tracker.mark_processed("a.docx").await);
    assert!(!tracker.try_claim("a.docx").await);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tracker.state("a.docx").await.unwrap(), FileState::New);
    assert!(tracker.try_claim("a.docx").await);
    store.close().await;
}

#[tokio::test]
async fn test_closed_store_fails_closed() {
    let url = e2e_redis_url!();
    let store: Arc<dyn IdempotencyStore> = Arc::new(RedisStore::connect(&url).await.unwrap());
    let tracker = StateTracker::for_processing(
        store.clone(),
        format!("{}:state:", unique_prefix("closed")),
        TTL,
    );
    store.close().await;

    assert!(!tracker.try_claim("a.docx").await);
    assert!(matches!(
        tracker.state("a.docx").await,
        Err(StoreError::Closed)
    ));
}

// ── Queue ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_redis_queue_shared_between_instances() {
    let url = e2e_redis_url!();
    let name = unique_prefix("queue");
    let producer = RedisQueue::connect(&url, &name).await.unwrap();
    let consumer = RedisQueue::connect(&url, &name).await.unwrap();

    let payload = vec![0x50, 0x4b, 0x03, 0x04, 0x00, 0xff];
    producer
        .publish(WorkItem::new("report.docx", payload.clone()))
        .await
        .unwrap();

    let item = consumer.next().await.unwrap().expect("item within BLPOP window");
    assert_eq!(item.filename, "report.docx");
    assert_eq!(item.payload, payload);
    assert!(consumer.next().await.unwrap().is_none(), "queue drained");
}

// ── Full pipeline ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_instances_convert_each_file_once() {
    let url = e2e_redis_url!();
    let dir = tempfile::TempDir::new().unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();
    let prefix = unique_prefix("pipeline");
    let converter = Arc::new(CopyConverter::default());

    let mut pipelines = Vec::new();
    for i in 0..2 {
        let config = PipelineConfig::builder()
            .input_dir(&input)
            .output_dir(dir.path().join("out"))
            .scratch_dir(dir.path().join(format!("scratch-{i}")))
            .key_prefix(&prefix)
            .state_ttl(TTL)
            .workers(2)
            .scan_interval(Duration::from_millis(50))
            .build()
            .unwrap();
        let parts = Collaborators {
            store: Arc::new(RedisStore::connect(&url).await.unwrap()),
            queue: Arc::new(LocalQueue::new("fileQueue", 16)),
            converter: converter.clone(),
            inspector: Arc::new(NoProcesses),
        };
        pipelines.push(Pipeline::start(config, parts).await.unwrap());
    }

    for name in ["report.docx", "invoice.docx", "notes.txt"] {
        let staged = dir.path().join(format!("{name}.part"));
        std::fs::write(&staged, name.as_bytes()).unwrap();
        std::fs::rename(&staged, input.join(name)).unwrap();
    }

    let observer = StateTracker::for_processing(
        Arc::new(RedisStore::connect(&url).await.unwrap()),
        format!("{prefix}:state:"),
        TTL,
    );
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let a = observer.state("report.docx").await.unwrap();
            let b = observer.state("invoice.docx").await.unwrap();
            if a == FileState::Processed && b == FileState::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("both files processed");

    tokio::time::sleep(Duration::from_millis(200)).await;
    for p in pipelines {
        p.shutdown().await.unwrap();
    }

    assert_eq!(converter.calls.load(Ordering::SeqCst), 2);
    let out = dir.path().join("out");
    assert_eq!(std::fs::read(out.join("report.pdf")).unwrap(), b"report.docx");
    assert!(out.join("invoice.pdf").is_file());
    assert!(!out.join("notes.pdf").exists());
}
