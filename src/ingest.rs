//! Ingestion pipeline.
//!
//! Reads a newline-delimited JSON stream of snapshots, reconciles each one
//! on its own task and hands the result to the configured publisher:
//!
//! ```text
//! JSONL line → decode Snapshot → Reconciler::reconcile (timeout) → Publisher
//! ```
//!
//! At most `ingest.concurrency` snapshots are in flight; reading pauses
//! while the pool is full. Failures are logged, counted and optionally
//! dead-lettered. Nothing is retried: redelivery is the stream's job.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use docmerge_core::merge::MergeOutcome;
use docmerge_core::models::Snapshot;
use docmerge_core::store::memory::InMemoryStore;
use docmerge_core::ReconcileError;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::progress::{IngestProgress, ProgressMode, ProgressReporter};
use crate::publish::{self, NoopPublisher, Publisher};
use crate::reconcile::{validate, Reconciler};
use crate::sqlite_store::SqliteStore;

/// Knobs for one ingest run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    pub progress_every: u64,
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.ingest.concurrency,
            timeout: config.ingest.timeout(),
            progress_every: config.ingest.progress_every,
            dry_run: false,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Non-blank lines read from the input.
    pub read: u64,
    pub reconciled: u64,
    pub created: u64,
    pub widened: u64,
    pub unchanged: u64,
    /// Undecodable lines and invalid snapshots. Never retried.
    pub dropped: u64,
    /// Storage, guard and timeout failures. Safe to redeliver.
    pub failed: u64,
    pub published: u64,
    pub publish_failed: u64,
}

#[derive(Default)]
struct Counters {
    read: AtomicU64,
    reconciled: AtomicU64,
    created: AtomicU64,
    widened: AtomicU64,
    unchanged: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    published: AtomicU64,
    publish_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IngestSummary {
        IngestSummary {
            read: self.read.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            widened: self.widened.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
        }
    }
}

/// Sink for lines that could not be reconciled.
pub struct DeadLetters {
    file: Option<Mutex<File>>,
}

#[derive(Serialize)]
struct DeadLetter<'a> {
    line: u64,
    reason: &'a str,
    raw: &'a str,
}

impl DeadLetters {
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open dead-letter file: {}", path.display()))?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    async fn record(&self, line: u64, reason: &str, raw: &str) {
        let Some(file) = &self.file else {
            return;
        };
        let entry = DeadLetter { line, reason, raw };
        let mut bytes = match serde_json::to_vec(&entry) {
            Ok(b) => b,
            Err(e) => {
                warn!(line, error = %e, "failed to encode dead letter");
                return;
            }
        };
        bytes.push(b'\n');
        let mut file = file.lock().await;
        let written = match file.write_all(&bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(line, error = %e, "failed to write dead letter");
        }
    }
}

/// Run `docmerge ingest <input>` against the configured database.
///
/// `input` is a file path, or `-` for stdin.
pub async fn run_ingest(
    config: &Config,
    input: &str,
    dry_run: bool,
    concurrency: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let mut opts = IngestOptions::from_config(config);
    opts.dry_run = dry_run;
    if let Some(n) = concurrency {
        if n == 0 {
            anyhow::bail!("--concurrency must be > 0");
        }
        opts.concurrency = n;
    }

    // A dry run only decodes, so it never opens the database or any output file.
    let (pool, reconciler, publisher, dead_letters): (
        Option<SqlitePool>,
        Reconciler,
        Arc<dyn Publisher>,
        DeadLetters,
    ) = if dry_run {
        (
            None,
            Reconciler::new(Arc::new(InMemoryStore::new())),
            Arc::new(NoopPublisher),
            DeadLetters::disabled(),
        )
    } else {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let reconciler = Reconciler::new(Arc::new(SqliteStore::new(pool.clone())));
        let dead_letters = match &config.ingest.dead_letter_path {
            Some(path) => DeadLetters::open(path).await?,
            None => DeadLetters::disabled(),
        };
        (
            Some(pool),
            reconciler,
            Arc::from(publish::from_config(config).await?),
            dead_letters,
        )
    };
    let reporter = progress.reporter();

    let summary = if input == "-" {
        let reader = BufReader::new(tokio::io::stdin());
        ingest_stream(
            reader,
            "stdin",
            &reconciler,
            publisher,
            Arc::new(dead_letters),
            &opts,
            reporter.as_ref(),
        )
        .await?
    } else {
        let path = PathBuf::from(input);
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open input: {}", path.display()))?;
        ingest_stream(
            BufReader::new(file),
            input,
            &reconciler,
            publisher,
            Arc::new(dead_letters),
            &opts,
            reporter.as_ref(),
        )
        .await?
    };

    print_summary(input, &summary, config.publish.is_enabled(), dry_run);

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

fn print_summary(input: &str, summary: &IngestSummary, publishing: bool, dry_run: bool) {
    if dry_run {
        println!("ingest {} (dry-run)", input);
        println!("  read: {} snapshots", summary.read);
        println!("  valid: {}", summary.read - summary.dropped);
        println!("  dropped: {}", summary.dropped);
        return;
    }
    println!("ingest {}", input);
    println!("  read: {} snapshots", summary.read);
    println!(
        "  reconciled: {} (created {}, widened {}, unchanged {})",
        summary.reconciled, summary.created, summary.widened, summary.unchanged
    );
    println!("  dropped: {}", summary.dropped);
    println!("  failed: {}", summary.failed);
    if publishing {
        println!("  published: {}", summary.published);
        println!("  publish failures: {}", summary.publish_failed);
    }
    println!("ok");
}

/// Consume a JSONL snapshot stream until EOF.
///
/// Returns once every spawned reconcile has finished.
pub async fn ingest_stream<R>(
    mut reader: R,
    label: &str,
    reconciler: &Reconciler,
    publisher: Arc<dyn Publisher>,
    dead_letters: Arc<DeadLetters>,
    opts: &IngestOptions,
    reporter: &dyn ProgressReporter,
) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    info!(input = label, concurrency = opts.concurrency, dry_run = opts.dry_run, "ingest started");

    let counters = Arc::new(Counters::default());
    let slots = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let n = match reader.read_until(b'\n', &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                // Let in-flight reconciles finish before giving up on the input.
                while let Some(joined) = tasks.join_next().await {
                    reap(joined, &counters);
                }
                return Err(e).with_context(|| format!("Failed to read {}", label));
            }
        };
        if n == 0 {
            break;
        }
        line_no += 1;

        let line = String::from_utf8_lossy(&buf);
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        Counters::bump(&counters.read);

        let decoded = match std::str::from_utf8(&buf) {
            Ok(text) => decode(text.trim()),
            Err(e) => Err(format!("undecodable snapshot: {}", e)),
        };
        let snapshot = match decoded {
            Ok(s) => s,
            Err(reason) => {
                warn!(line = line_no, %reason, "dropping snapshot");
                Counters::bump(&counters.dropped);
                dead_letters.record(line_no, &reason, raw).await;
                continue;
            }
        };

        if !opts.dry_run {
            let permit = slots.clone().acquire_owned().await?;
            let reconciler = reconciler.clone();
            let publisher = Arc::clone(&publisher);
            let dead_letters = Arc::clone(&dead_letters);
            let counters = Arc::clone(&counters);
            let timeout = opts.timeout;
            let raw = raw.to_string();
            tasks.spawn(async move {
                process(
                    snapshot,
                    line_no,
                    &raw,
                    &reconciler,
                    publisher.as_ref(),
                    &dead_letters,
                    &counters,
                    timeout,
                )
                .await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.try_join_next() {
            reap(joined, &counters);
        }

        let read = counters.read.load(Ordering::Relaxed);
        if read % opts.progress_every.max(1) == 0 {
            reporter.report(&progress_event(label, &counters));
        }
    }

    while let Some(joined) = tasks.join_next().await {
        reap(joined, &counters);
    }
    reporter.report(&progress_event(label, &counters));

    let summary = counters.snapshot();
    info!(
        input = label,
        read = summary.read,
        reconciled = summary.reconciled,
        dropped = summary.dropped,
        failed = summary.failed,
        "ingest finished"
    );
    Ok(summary)
}

fn decode(raw: &str) -> std::result::Result<Snapshot, String> {
    let snapshot: Snapshot =
        serde_json::from_str(raw).map_err(|e| format!("undecodable snapshot: {}", e))?;
    validate(&snapshot).map_err(|e| e.to_string())?;
    Ok(snapshot)
}

#[allow(clippy::too_many_arguments)]
async fn process(
    snapshot: Snapshot,
    line_no: u64,
    raw: &str,
    reconciler: &Reconciler,
    publisher: &dyn Publisher,
    dead_letters: &DeadLetters,
    counters: &Counters,
    timeout: Duration,
) {
    let url = snapshot.url.clone();

    // Dropping the reconcile future on timeout releases the URL's section.
    let reconciled = match tokio::time::timeout(timeout, reconciler.reconcile(snapshot)).await {
        Ok(Ok(reconciled)) => reconciled,
        Ok(Err(err)) => {
            let counter = match err {
                ReconcileError::InvalidInput(_) => &counters.dropped,
                ReconcileError::Storage { .. } | ReconcileError::Guard(_) => &counters.failed,
            };
            warn!(line = line_no, url = %url, error = %err, retryable = err.is_retryable(), "reconcile failed");
            Counters::bump(counter);
            dead_letters.record(line_no, &err.to_string(), raw).await;
            return;
        }
        Err(_) => {
            warn!(line = line_no, url = %url, timeout_secs = timeout.as_secs(), "reconcile timed out");
            Counters::bump(&counters.failed);
            dead_letters.record(line_no, "reconcile timed out", raw).await;
            return;
        }
    };

    Counters::bump(&counters.reconciled);
    Counters::bump(match reconciled.outcome {
        MergeOutcome::Created => &counters.created,
        MergeOutcome::Widened { .. } => &counters.widened,
        MergeOutcome::Unchanged => &counters.unchanged,
    });

    // The merge is already persisted; a publish failure does not undo it.
    match publisher.publish(&reconciled.record).await {
        Ok(()) => Counters::bump(&counters.published),
        Err(e) => {
            warn!(line = line_no, url = %url, error = %e, "publish failed");
            Counters::bump(&counters.publish_failed);
        }
    }
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>, counters: &Counters) {
    if let Err(e) = joined {
        warn!(error = %e, "reconcile task aborted");
        Counters::bump(&counters.failed);
    }
}

fn progress_event(label: &str, counters: &Counters) -> IngestProgress {
    IngestProgress {
        input: label.to_string(),
        read: counters.read.load(Ordering::Relaxed),
        reconciled: counters.reconciled.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::publish::ChannelPublisher;
    use docmerge_core::store::RecordStore;

    fn opts(concurrency: usize) -> IngestOptions {
        IngestOptions {
            concurrency,
            timeout: Duration::from_secs(5),
            progress_every: 1000,
            dry_run: false,
        }
    }

    async fn run(input: &str, reconciler: &Reconciler, opts: &IngestOptions) -> IngestSummary {
        ingest_stream(
            input.as_bytes(),
            "test",
            reconciler,
            Arc::new(NoopPublisher),
            Arc::new(DeadLetters::disabled()),
            opts,
            &NoProgress,
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stream_is_folded_per_url() {
        let input = r#"
{"url":"u1","pub_date":100,"fetch_time":200,"text":"v1"}
{"url":"u1","pub_date":50,"fetch_time":150,"text":"v0"}
{"url":"u2","pub_date":7,"fetch_time":70,"text":"other"}
{"url":"u1","pub_date":999,"fetch_time":250,"text":"v2"}
{"url":"u1","pub_date":100,"fetch_time":200,"text":"v1"}
"#;
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let summary = run(input, &reconciler, &opts(8)).await;

        assert_eq!(summary.read, 5);
        assert_eq!(summary.reconciled, 5);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 0);

        let u1 = reconciler.store().get("u1").await.unwrap().unwrap();
        assert_eq!(
            (u1.pub_date, u1.first_fetch_time, u1.fetch_time, u1.text.as_str()),
            (50, 150, 250, "v2")
        );
        assert_eq!(reconciler.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bad_lines_are_dropped_not_fatal() {
        let input = "not json\n{\"url\":\"\",\"pub_date\":1,\"fetch_time\":2}\n\n{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"ok\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let summary = run(input, &reconciler, &opts(2)).await;

        assert_eq!(summary.read, 3);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.reconciled, 1);
    }

    #[tokio::test]
    async fn non_utf8_line_is_dropped_and_run_continues() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("dead.jsonl");
        let dead = DeadLetters::open(&path).await.unwrap();
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));

        let mut input = b"{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"a\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"url\":\"u2\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"b\"}\n");

        let summary = ingest_stream(
            input.as_slice(),
            "test",
            &reconciler,
            Arc::new(NoopPublisher),
            Arc::new(dead),
            &opts(2),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.read, 3);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.reconciled, 2);
        assert!(reconciler.store().get("u1").await.unwrap().is_some());
        assert!(reconciler.store().get("u2").await.unwrap().is_some());

        let content = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["line"], 2);
        assert!(entry["raw"].as_str().unwrap().ends_with("garbage"));
    }

    #[tokio::test]
    async fn zero_progress_interval_is_treated_as_one() {
        let input = "{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"a\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let mut o = opts(1);
        o.progress_every = 0;
        let summary = run(input, &reconciler, &o).await;
        assert_eq!(summary.reconciled, 1);
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        let input = "{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"ok\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let mut o = opts(2);
        o.dry_run = true;
        let summary = run(input, &reconciler, &o).await;

        assert_eq!(summary.read, 1);
        assert_eq!(summary.reconciled, 0);
        assert_eq!(reconciler.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_guard_counts_as_failed() {
        let input = "{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"ok\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        reconciler.shutdown();
        let summary = run(input, &reconciler, &opts(2)).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.reconciled, 0);
    }

    #[tokio::test]
    async fn every_reconciled_record_is_published() {
        let input = "{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"a\"}\n{\"url\":\"u2\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"b\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);

        let summary = ingest_stream(
            input.as_bytes(),
            "test",
            &reconciler,
            Arc::new(ChannelPublisher::new(tx)),
            Arc::new(DeadLetters::disabled()),
            &opts(2),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.published, 2);
        let mut urls = vec![rx.recv().await.unwrap().url, rx.recv().await.unwrap().url];
        urls.sort();
        assert_eq!(urls, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn publish_failure_keeps_merge() {
        let input = "{\"url\":\"u1\",\"pub_date\":1,\"fetch_time\":2,\"text\":\"a\"}\n";
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);

        let summary = ingest_stream(
            input.as_bytes(),
            "test",
            &reconciler,
            Arc::new(ChannelPublisher::new(tx)),
            Arc::new(DeadLetters::disabled()),
            &opts(1),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(summary.publish_failed, 1);
        assert!(reconciler.store().get("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dead_letters_capture_dropped_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("dead.jsonl");
        let dead = DeadLetters::open(&path).await.unwrap();
        let reconciler = Reconciler::new(Arc::new(InMemoryStore::new()));

        ingest_stream(
            "garbage\n".as_bytes(),
            "test",
            &reconciler,
            Arc::new(NoopPublisher),
            Arc::new(dead),
            &opts(1),
            &NoProgress,
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["line"], 1);
        assert_eq!(entry["raw"], "garbage");
    }
}
