//! The background transcode worker.
//!
//! Exactly one OS thread does the CPU-bound work. Jobs go in over a std
//! channel, and [`WorkerEvent`]s come back over a tokio channel so the async
//! side can await them. A panic inside the [`Transcoder`] is caught at the
//! thread boundary and reported as [`WorkerEvent::Fatal`]; the thread then
//! exits and the worker is considered dead.

mod lifecycle;

pub(crate) use self::lifecycle::{Spawned, WorkerHandle, WorkerLifecycle};
pub use self::lifecycle::WorkerStatus;
use crate::error::Result;
use crate::{CacheKey, TransformParameters};
use std::any::Any;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tokio::sync::mpsc::UnboundedSender;

/// The CPU-bound half of transcoding.
///
/// Runs on the worker thread, never on the async runtime.
pub trait Transcoder: Send + Sync + 'static {
    fn transcode(&self, source: &Path, params: &TransformParameters) -> Result<Vec<u8>>;
}

/// A unit of work handed to the worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub key: CacheKey,
    pub source_path: PathBuf,
    pub save_path: PathBuf,
    pub params: TransformParameters,
}

/// Messages from the worker thread.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// The thread is up and pulling jobs.
    Started,
    Completed { key: CacheKey, outcome: std::result::Result<Vec<u8>, String> },
    /// The worker is unusable. Every outstanding job is lost.
    Fatal(String),
}

/// Body of the worker thread.
pub(crate) fn run(transcoder: Arc<dyn Transcoder>, jobs: mpsc::Receiver<Job>, events: UnboundedSender<WorkerEvent>) {
    if events.send(WorkerEvent::Started).is_err() {
        return;
    }
    let result = catch_unwind(AssertUnwindSafe(|| {
        while let Ok(job) = jobs.recv() {
            let outcome = process(transcoder.as_ref(), &job);
            if events.send(WorkerEvent::Completed { key: job.key, outcome }).is_err() {
                // Nobody is listening anymore.
                break;
            }
        }
    }));
    if let Err(payload) = result {
        let _ = events.send(WorkerEvent::Fatal(panic_message(payload.as_ref())));
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(key = %job.key))]
fn process(transcoder: &dyn Transcoder, job: &Job) -> std::result::Result<Vec<u8>, String> {
    // A previous job may have produced this key after the caller's check.
    if let Ok(bytes) = std::fs::read(&job.save_path) {
        tracing::debug!("Cache file appeared before the job ran");
        return Ok(bytes);
    }
    let bytes = transcoder.transcode(&job.source_path, &job.params).map_err(|err| (*err).to_string())?;
    if let Err(err) = write_atomic(&job.save_path, &bytes) {
        // The output is still good; only the next request pays for this.
        tracing::warn!(path = %job.save_path.display(), error = %err, "Failed to write cache file");
    }
    Ok(bytes)
}

/// Write via a temporary file in the destination directory so readers never
/// observe a partially written cache file.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(message), _) => format!("worker panicked: {message}"),
        (_, Some(message)) => format!("worker panicked: {message}"),
        _ => "worker panicked".to_string(),
    }
}
