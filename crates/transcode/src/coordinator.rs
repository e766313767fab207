use crate::error::{ErrorKind, Result};
use crate::worker::{Job, Transcoder, WorkerEvent, WorkerLifecycle, WorkerStatus};
use crate::worker::{Spawned, WorkerHandle};
use crate::{CacheKey, TransformParameters};
use exn::ResultExt;
use stash_storage::resolve_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type JobResult = std::result::Result<Vec<u8>, JobFailure>;

#[derive(Debug, Clone)]
enum JobFailure {
    Failed(String),
    Fatal(String),
}

/// Point-in-time view of the coordinator, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Distinct keys currently being transcoded.
    pub in_flight: usize,
    /// Callers waiting on those keys.
    pub waiters: usize,
    pub worker: WorkerStatus,
    pub workers_spawned: u64,
    pub jobs_submitted: u64,
}

struct State {
    jobs: HashMap<CacheKey, Vec<oneshot::Sender<JobResult>>>,
    lifecycle: WorkerLifecycle,
    teardown: Option<JoinHandle<()>>,
    submitted: u64,
}

struct Inner {
    cache_root: PathBuf,
    idle: Duration,
    // Never held across an await point.
    state: Mutex<State>,
}

enum Teardown {
    Deferred,
    Released(WorkerHandle),
    Stale,
}

/// Single-flight, disk-cached transcoding.
///
/// - A cache file under `cache_root` named after the [`CacheKey`] is served
///   without touching the worker.
/// - Concurrent requests for the same key share one job, and every caller
///   receives its own copy of the output.
/// - A failure is delivered to that key's callers only and is not cached.
/// - If the worker dies, every outstanding caller (for any key) gets
///   [`WorkerFatal`](ErrorKind::WorkerFatal) and the next request starts a
///   fresh worker.
/// - After `idle` without new submissions, the worker is torn down, unless
///   jobs are still outstanding, in which case the check is repeated.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct TranscodeCoordinator {
    inner: Arc<Inner>,
}

impl TranscodeCoordinator {
    /// `cache_root` must be an absolute path. It is created on first write.
    pub fn new(cache_root: impl Into<PathBuf>, transcoder: Arc<dyn Transcoder>, idle: Duration) -> Self {
        let state = State { jobs: HashMap::new(), lifecycle: WorkerLifecycle::new(transcoder), teardown: None, submitted: 0 };
        Self { inner: Arc::new(Inner { cache_root: cache_root.into(), idle, state: Mutex::new(state) }) }
    }

    pub fn cache_root(&self) -> &Path {
        &self.inner.cache_root
    }

    /// Where the output for `key` is (or will be) cached.
    pub async fn cache_path(&self, key: &CacheKey) -> Result<PathBuf> {
        resolve_path(&self.inner.cache_root, key.as_ref()).await.map_err(|err| match err.is_forbidden() {
            true => err.raise(ErrorKind::Forbidden),
            false => err.raise(ErrorKind::Io),
        })
    }

    /// Produce the output for `key` from the file at `source`.
    ///
    /// Dropping the returned future does not cancel the job: other callers
    /// may be waiting on it, and its output is cached either way.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn transcode(&self, key: &CacheKey, source: &Path, params: &TransformParameters) -> Result<Vec<u8>> {
        let save_path = self.cache_path(key).await?;
        match tokio::fs::read(&save_path).await {
            Ok(bytes) => {
                tracing::debug!(bytes = bytes.len(), "Serving cached transcode");
                return Ok(bytes);
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        }

        let job = Job { key: key.clone(), source_path: source.to_path_buf(), save_path, params: *params };
        let receiver = self.inner.enqueue(job)?;
        match receiver.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(JobFailure::Failed(reason))) => exn::bail!(ErrorKind::TranscodeFailed(reason)),
            Ok(Err(JobFailure::Fatal(reason))) => exn::bail!(ErrorKind::WorkerFatal(reason)),
            Err(_) => exn::bail!(ErrorKind::WorkerFatal("job abandoned".to_string())),
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.lock();
        CoordinatorStats {
            in_flight: state.jobs.len(),
            waiters: state.jobs.values().map(Vec::len).sum(),
            worker: state.lifecycle.status(),
            workers_spawned: state.lifecycle.spawned(),
            jobs_submitted: state.submitted,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing panics while holding the lock, but a poisoned table is
        // still consistent enough to keep serving.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, job: Job) -> Result<oneshot::Receiver<JobResult>> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.lock();
        if let Some(waiters) = state.jobs.get_mut(&job.key) {
            waiters.push(sender);
            tracing::debug!(waiters = waiters.len(), "Joined in-flight transcode");
            return Ok(receiver);
        }

        if let Some(spawned) = state.lifecycle.ensure_ready()? {
            tokio::spawn(pump(Arc::downgrade(self), spawned));
        }
        let key = job.key.clone();
        // On failure the worker has exited, and its event stream closing
        // takes care of everyone else.
        state.lifecycle.submit(job)?;
        state.jobs.insert(key, vec![sender]);
        state.submitted += 1;
        self.schedule_teardown(&mut state);
        Ok(receiver)
    }

    /// (Re-)arm the idle timer for the live worker.
    fn schedule_teardown(self: &Arc<Self>, state: &mut State) {
        let Some(generation) = state.lifecycle.generation() else {
            return;
        };
        if let Some(timer) = state.teardown.take() {
            timer.abort();
        }
        let inner = Arc::downgrade(self);
        let idle = self.idle;
        state.teardown = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(idle).await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                match inner.try_teardown(generation) {
                    Teardown::Deferred => continue,
                    Teardown::Stale => return,
                    Teardown::Released(handle) => {
                        drop(inner);
                        join(generation, handle).await;
                        return;
                    },
                }
            }
        }));
    }

    fn try_teardown(&self, generation: u64) -> Teardown {
        let mut state = self.lock();
        if state.lifecycle.generation() != Some(generation) {
            return Teardown::Stale;
        }
        if !state.jobs.is_empty() {
            tracing::debug!(generation, in_flight = state.jobs.len(), "Worker busy, deferring teardown");
            return Teardown::Deferred;
        }
        // This task is the timer; dropping its handle only detaches it.
        state.teardown = None;
        match state.lifecycle.release(generation) {
            Some(handle) => Teardown::Released(handle),
            None => Teardown::Stale,
        }
    }

    fn complete(&self, key: &CacheKey, outcome: std::result::Result<Vec<u8>, String>) {
        let waiters = self.lock().jobs.remove(key).unwrap_or_default();
        match &outcome {
            Ok(bytes) => tracing::debug!(%key, waiters = waiters.len(), bytes = bytes.len(), "Transcode complete"),
            Err(reason) => tracing::warn!(%key, waiters = waiters.len(), reason, "Transcode failed"),
        }
        let result = outcome.map_err(JobFailure::Failed);
        for waiter in waiters {
            // A caller that went away simply doesn't get its copy.
            let _ = waiter.send(result.clone());
        }
    }

    fn fail_worker(&self, generation: u64, reason: &str) {
        let (handle, jobs, timer) = {
            let mut state = self.lock();
            let Some(handle) = state.lifecycle.release(generation) else {
                return;
            };
            (handle, std::mem::take(&mut state.jobs), state.teardown.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        tracing::error!(generation, reason, outstanding = jobs.len(), "Transcode worker failed");
        let failure: JobResult = Err(JobFailure::Fatal(reason.to_string()));
        for waiter in jobs.into_values().flatten() {
            let _ = waiter.send(failure.clone());
        }
        // Detach; the thread has exited or will once its queue is closed.
        drop(handle);
    }
}

/// Forward one worker's events into the coordinator until the worker goes away.
async fn pump(inner: Weak<Inner>, spawned: Spawned) {
    let Spawned { generation, mut events } = spawned;
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Started => inner.lock().lifecycle.mark_ready(generation),
            WorkerEvent::Completed { key, outcome } => inner.complete(&key, outcome),
            WorkerEvent::Fatal(reason) => inner.fail_worker(generation, &reason),
        }
    }
    // A released worker is no longer live, so this only fires for a worker
    // that vanished without saying why.
    if let Some(inner) = inner.upgrade() {
        inner.fail_worker(generation, "worker exited unexpectedly");
    }
}

async fn join(generation: u64, handle: WorkerHandle) {
    match tokio::task::spawn_blocking(move || handle.shutdown()).await {
        Ok(Ok(())) => tracing::debug!(generation, "Idle transcode worker shut down"),
        Ok(Err(_)) => tracing::warn!(generation, "Transcode worker panicked while shutting down"),
        Err(err) => tracing::warn!(generation, error = %err, "Failed to join transcode worker"),
    }
}
