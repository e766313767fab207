use super::{Job, Transcoder, WorkerEvent, run};
use crate::error::{ErrorKind, Result};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

/// Observable state of the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Absent,
    /// Spawned, but the thread has not reported in yet. Jobs submitted now
    /// queue up and run once it does.
    Starting,
    Ready,
}

/// A live worker thread and its job queue.
pub(crate) struct WorkerHandle {
    generation: u64,
    jobs: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Close the job queue and wait for the thread to finish.
    pub(crate) fn shutdown(self) -> std::thread::Result<()> {
        drop(self.jobs);
        self.thread.join()
    }
}

/// A freshly spawned worker whose events the caller must start consuming.
pub(crate) struct Spawned {
    pub(crate) generation: u64,
    pub(crate) events: UnboundedReceiver<WorkerEvent>,
}

enum WorkerState {
    Absent,
    Starting(WorkerHandle),
    Ready(WorkerHandle),
}

/// Owns the (at most one) worker thread.
///
/// Every spawn gets a new generation number. Anything that refers to a
/// worker (readiness, teardown, fatal errors) names its generation, so a
/// late message about a worker that has already been replaced can never
/// affect the current one.
pub(crate) struct WorkerLifecycle {
    transcoder: Arc<dyn Transcoder>,
    state: WorkerState,
    spawned: u64,
}

impl WorkerLifecycle {
    pub(crate) fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder, state: WorkerState::Absent, spawned: 0 }
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        match self.state {
            WorkerState::Absent => WorkerStatus::Absent,
            WorkerState::Starting(_) => WorkerStatus::Starting,
            WorkerState::Ready(_) => WorkerStatus::Ready,
        }
    }

    /// Total number of workers started so far.
    pub(crate) fn spawned(&self) -> u64 {
        self.spawned
    }

    /// Generation of the live worker, if any.
    pub(crate) fn generation(&self) -> Option<u64> {
        match &self.state {
            WorkerState::Absent => None,
            WorkerState::Starting(handle) | WorkerState::Ready(handle) => Some(handle.generation),
        }
    }

    /// Start a worker unless one is already starting or ready.
    ///
    /// Returns the new worker's event stream when a thread was spawned.
    pub(crate) fn ensure_ready(&mut self) -> Result<Option<Spawned>> {
        if !matches!(self.state, WorkerState::Absent) {
            return Ok(None);
        }
        let generation = self.spawned + 1;
        let (jobs, job_queue) = mpsc::channel();
        let (event_sink, events) = unbounded_channel();
        let transcoder = Arc::clone(&self.transcoder);
        let thread = std::thread::Builder::new()
            .name(format!("stash-transcode-{generation}"))
            .spawn(move || run(transcoder, job_queue, event_sink))
            .map_err(|e| ErrorKind::WorkerFatal(format!("failed to start worker: {e}")))?;
        self.spawned = generation;
        self.state = WorkerState::Starting(WorkerHandle { generation, jobs, thread });
        tracing::debug!(generation, "Spawned transcode worker");
        Ok(Some(Spawned { generation, events }))
    }

    pub(crate) fn mark_ready(&mut self, generation: u64) {
        if self.generation() != Some(generation) {
            return;
        }
        if let WorkerState::Starting(handle) = std::mem::replace(&mut self.state, WorkerState::Absent) {
            self.state = WorkerState::Ready(handle);
        }
        tracing::debug!(generation, "Transcode worker ready");
    }

    /// Queue a job on the live worker.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let (WorkerState::Starting(handle) | WorkerState::Ready(handle)) = &self.state else {
            exn::bail!(ErrorKind::WorkerFatal("no worker running".to_string()));
        };
        handle.jobs.send(job).map_err(|_| ErrorKind::WorkerFatal("worker exited".to_string()))?;
        Ok(())
    }

    /// Detach the worker of the given generation, leaving the lifecycle
    /// `Absent`. The caller decides whether to join the returned handle.
    pub(crate) fn release(&mut self, generation: u64) -> Option<WorkerHandle> {
        if self.generation() != Some(generation) {
            return None;
        }
        match std::mem::replace(&mut self.state, WorkerState::Absent) {
            WorkerState::Starting(handle) | WorkerState::Ready(handle) => Some(handle),
            WorkerState::Absent => None,
        }
    }
}
