//! Bounded-concurrency tile job scheduler.
//!
//! The scheduler turns tile requests into fetch+decode tasks on the tokio
//! runtime while keeping at most `concurrency_limit` of them in flight.
//! Requests beyond the limit wait in a [`PriorityQueue`] and are dispatched
//! lazily, so a priority changed while a job waits is honored when a slot
//! frees.
//!
//! # Architecture
//!
//! ```text
//!   submit ──► slot free? ──yes──► spawn task ──┐
//!                 │ no                          │ load + decode
//!                 ▼                             ▼
//!          ┌──────────────┐            ┌────────────────┐
//!          │ PriorityQueue│            │  mpsc channel  │
//!          └──────┬───────┘            └───────┬────────┘
//!                 │ dispatch                   │ poll(now)
//!                 └─────────► slots ◄──────────┘
//!                              ▲
//!                  deadline sweep (timeout_ms)
//! ```
//!
//! Tasks never touch scheduler state. Each finished task sends a message on
//! the completion channel, and [`JobScheduler::poll`] drains that channel on
//! the caller's thread. A completion for a job that was cancelled or timed
//! out in the meantime is discarded there.
//!
//! # Example
//!
//! ```ignore
//! use deepzoom::scheduler::{JobScheduler, JobRequest};
//!
//! let mut scheduler = JobScheduler::new(config, Arc::new(loader));
//! let handle = scheduler.submit(request);
//!
//! loop {
//!     for event in scheduler.poll(now_ms()) {
//!         // route Completed / Failed to the owning layer
//!     }
//! }
//! ```

mod job;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::TileError;
use crate::io::TileLoader;
use crate::queue::{Priority, PriorityQueue};
use crate::tile::{CacheKey, TileDecoder, TileResource};

pub use job::{JobEvent, JobHandle, JobOwner, JobRequest, JobState};

use job::{Completion, Job, Phase};

/// Counters describing scheduler activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub submitted: u64,
    pub deduplicated: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub discarded: u64,
}

/// Runs tile jobs with bounded concurrency.
pub struct JobScheduler {
    config: SchedulerConfig,
    loader: Arc<dyn TileLoader>,
    decoder: TileDecoder,
    runtime: Handle,

    jobs: HashMap<JobHandle, Job>,
    by_key: HashMap<CacheKey, JobHandle>,
    queue: PriorityQueue<JobHandle>,
    running: usize,
    next_handle: u64,

    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    inbox: VecDeque<Completion>,
    pending_events: Vec<JobEvent>,

    now: u64,
    stats: SchedulerStats,
}

impl JobScheduler {
    /// Create a scheduler that spawns jobs on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(config: SchedulerConfig, loader: Arc<dyn TileLoader>) -> Self {
        Self::with_runtime(config, loader, Handle::current())
    }

    /// Create a scheduler that spawns jobs on `runtime`.
    pub fn with_runtime(
        config: SchedulerConfig,
        loader: Arc<dyn TileLoader>,
        runtime: Handle,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            config,
            loader,
            decoder: TileDecoder::new(),
            runtime,
            jobs: HashMap::new(),
            by_key: HashMap::new(),
            queue: PriorityQueue::new(),
            running: 0,
            next_handle: 1,
            completion_tx,
            completion_rx,
            inbox: VecDeque::new(),
            pending_events: Vec::new(),
            now: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of jobs occupying a slot.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Number of jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether no job is queued or running.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_state(&self, handle: JobHandle) -> Option<JobState> {
        self.jobs.get(&handle).map(Job::state)
    }

    /// Live job fetching `key`, if any.
    pub fn handle_for_key(&self, key: &CacheKey) -> Option<JobHandle> {
        self.by_key.get(key).copied()
    }

    pub fn owners(&self, handle: JobHandle) -> &[JobOwner] {
        self.jobs
            .get(&handle)
            .map(|job| job.owners.as_slice())
            .unwrap_or(&[])
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.len(),
            running: self.running,
            ..self.stats
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a tile request.
    ///
    /// Starts the job right away when a slot is free, otherwise queues it at
    /// `request.priority`. A request for a key that already has a live job
    /// joins that job as an extra owner and gets the same handle back.
    pub fn submit(&mut self, request: JobRequest) -> JobHandle {
        self.stats.submitted += 1;

        if let Some(&handle) = self.by_key.get(&request.key) {
            self.stats.deduplicated += 1;
            if let Some(job) = self.jobs.get_mut(&handle) {
                if !job.owners.contains(&request.owner) {
                    job.owners.push(request.owner);
                }
                if let Phase::Queued { entry } = job.phase {
                    if request.priority < job.priority {
                        job.priority = request.priority;
                        self.queue.change_priority(entry, request.priority);
                    }
                }
            }
            debug!(job = %handle, key = %request.key, "joined existing job");
            return handle;
        }

        let handle = JobHandle::from_raw(self.next_handle);
        self.next_handle += 1;

        let phase = if self.running < self.config.concurrency_limit {
            self.start(handle, &request.address, request.post_data.clone(), request.priority)
        } else {
            let entry = self.queue.insert(handle, request.priority);
            debug!(job = %handle, priority = %request.priority, "queued");
            Phase::Queued { entry }
        };

        self.by_key.insert(request.key.clone(), handle);
        self.jobs.insert(
            handle,
            Job {
                key: request.key,
                address: request.address,
                post_data: request.post_data,
                priority: request.priority,
                owners: vec![request.owner],
                phase,
            },
        );
        handle
    }

    /// Change the priority of a queued job.
    ///
    /// Returns `false` if the job is unknown or already running.
    pub fn reprioritize(&mut self, handle: JobHandle, priority: Priority) -> bool {
        let Some(job) = self.jobs.get_mut(&handle) else {
            return false;
        };
        match job.phase {
            Phase::Queued { entry } => {
                job.priority = priority;
                self.queue.change_priority(entry, priority)
            }
            Phase::Running { .. } => false,
        }
    }

    /// Cancel a job.
    ///
    /// A queued job is dropped silently. A running job has its task aborted
    /// and its slot freed at once; whatever the task still reports is
    /// discarded. Returns `false` if the job is unknown.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        let Some(job) = self.remove_job(handle) else {
            return false;
        };
        self.stats.cancelled += 1;
        debug!(job = %handle, key = %job.key, "cancelled");
        true
    }

    /// Drop `owner`'s interest in a job, cancelling it once no owner is left.
    ///
    /// Returns `true` if the job was cancelled.
    pub fn release_owner(&mut self, handle: JobHandle, owner: JobOwner) -> bool {
        let Some(job) = self.jobs.get_mut(&handle) else {
            return false;
        };
        job.owners.retain(|o| *o != owner);
        if job.owners.is_empty() {
            self.cancel(handle)
        } else {
            false
        }
    }

    /// Cancel every queued and running job.
    pub fn cancel_all(&mut self) {
        let handles: Vec<JobHandle> = self.jobs.keys().copied().collect();
        for handle in handles {
            self.cancel(handle);
        }
        self.pending_events.clear();
    }

    // =========================================================================
    // Progress
    // =========================================================================

    /// Process everything that happened up to `now_ms`.
    ///
    /// Drains finished tasks, fails running jobs older than `timeout_ms`,
    /// then fills free slots from the queue. Returns the resulting events
    /// in the order they happened.
    pub fn poll(&mut self, now_ms: u64) -> Vec<JobEvent> {
        self.now = self.now.max(now_ms);
        let mut events = std::mem::take(&mut self.pending_events);

        while let Ok(completion) = self.completion_rx.try_recv() {
            self.inbox.push_back(completion);
        }
        while let Some(completion) = self.inbox.pop_front() {
            if let Some(event) = self.finish(completion) {
                events.push(event);
            }
        }

        self.sweep_deadlines(&mut events);
        self.dispatch();
        events.append(&mut self.pending_events);
        events
    }

    /// Start queued jobs while slots are free. Returns how many started.
    ///
    /// Start events are reported by the next [`JobScheduler::poll`].
    pub fn dispatch(&mut self) -> usize {
        let mut started = 0;
        while self.running < self.config.concurrency_limit && !self.queue.is_empty() {
            let handle = match self.queue.pop_min() {
                Ok(handle) => handle,
                Err(e) => {
                    debug_assert!(false, "dispatch on empty queue: {e}");
                    break;
                }
            };
            let Some(mut job) = self.jobs.remove(&handle) else {
                continue;
            };
            job.phase = self.start(handle, &job.address, job.post_data.clone(), job.priority);
            self.pending_events.push(JobEvent::Started {
                handle,
                owners: job.owners.clone(),
            });
            self.jobs.insert(handle, job);
            started += 1;
        }
        started
    }

    /// Wait until at least one task has reported back.
    ///
    /// Returns `false` without waiting when nothing is running. The message
    /// is kept for the next [`JobScheduler::poll`].
    pub async fn wait_for_completion(&mut self) -> bool {
        if !self.inbox.is_empty() {
            return true;
        }
        if self.running == 0 {
            return false;
        }
        match self.completion_rx.recv().await {
            Some(completion) => {
                self.inbox.push_back(completion);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Spawn the task for a job and take a slot.
    fn start(
        &mut self,
        handle: JobHandle,
        address: &str,
        post_data: Option<String>,
        priority: Priority,
    ) -> Phase {
        let cancel = CancellationToken::new();
        self.running += 1;
        debug_assert!(self.running <= self.config.concurrency_limit);

        let loader = Arc::clone(&self.loader);
        let decoder = self.decoder.clone();
        let address = address.to_string();
        let task_cancel = cancel.clone();
        let timeout_ms = self.config.timeout_ms;
        let tx = self.completion_tx.clone();

        debug!(job = %handle, address = %address, priority = %priority, "started");

        self.runtime.spawn(async move {
            let work = run_job(loader, decoder, address.clone(), post_data);
            let result = tokio::select! {
                _ = task_cancel.cancelled() => Err(TileError::Cancelled),
                outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), work) => {
                    outcome.unwrap_or(Err(TileError::Timeout { address, timeout_ms }))
                }
            };
            // The receiver only goes away with the scheduler
            let _ = tx.send(Completion { handle, result });
        });

        Phase::Running {
            started_at: self.now,
            cancel,
        }
    }

    /// Turn a task message into an event, or discard it if the job is gone.
    fn finish(&mut self, completion: Completion) -> Option<JobEvent> {
        let Completion { handle, result } = completion;

        let is_running = matches!(
            self.jobs.get(&handle).map(Job::state),
            Some(JobState::Running)
        );
        if !is_running {
            self.stats.discarded += 1;
            debug!(job = %handle, "discarded stale completion");
            return None;
        }

        let job = self.remove_job(handle)?;
        match result {
            Ok(resource) => {
                self.stats.completed += 1;
                debug!(job = %handle, key = %job.key, "completed");
                Some(JobEvent::Completed {
                    handle,
                    key: job.key,
                    owners: job.owners,
                    resource,
                })
            }
            Err(error) => {
                if matches!(error, TileError::Timeout { .. }) {
                    self.stats.timed_out += 1;
                }
                self.stats.failed += 1;
                warn!(job = %handle, error = %error, "tile failed");
                Some(JobEvent::Failed {
                    handle,
                    key: job.key,
                    owners: job.owners,
                    error,
                })
            }
        }
    }

    fn sweep_deadlines(&mut self, events: &mut Vec<JobEvent>) {
        let timeout_ms = self.config.timeout_ms;
        let now = self.now;

        let expired: Vec<JobHandle> = self
            .jobs
            .iter()
            .filter_map(|(handle, job)| match job.phase {
                Phase::Running { started_at, .. }
                    if now.saturating_sub(started_at) > timeout_ms =>
                {
                    Some(*handle)
                }
                _ => None,
            })
            .collect();

        for handle in expired {
            let Some(job) = self.remove_job(handle) else {
                continue;
            };
            self.stats.timed_out += 1;
            self.stats.failed += 1;
            warn!(job = %handle, address = %job.address, timeout_ms, "tile timed out");
            events.push(JobEvent::Failed {
                handle,
                error: TileError::Timeout {
                    address: job.address,
                    timeout_ms,
                },
                key: job.key,
                owners: job.owners,
            });
        }
    }

    /// Forget a job, freeing its queue entry or slot.
    fn remove_job(&mut self, handle: JobHandle) -> Option<Job> {
        let job = self.jobs.remove(&handle)?;
        if self.by_key.get(&job.key) == Some(&handle) {
            self.by_key.remove(&job.key);
        }
        match &job.phase {
            Phase::Queued { entry } => {
                self.queue.remove(*entry);
            }
            Phase::Running { cancel, .. } => {
                cancel.cancel();
                self.running -= 1;
            }
        }
        Some(job)
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .field("loader", &self.loader.identifier())
            .field("running", &self.running)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Fetch and decode one tile.
async fn run_job(
    loader: Arc<dyn TileLoader>,
    decoder: TileDecoder,
    address: String,
    post_data: Option<String>,
) -> Result<TileResource, TileError> {
    let payload = loader.load(&address, post_data.as_deref()).await?;

    let decode_address = address.clone();
    let decoded = tokio::task::spawn_blocking(move || decoder.decode(&decode_address, &payload))
        .await
        .map_err(|e| TileError::DecodeFailure {
            address,
            message: e.to_string(),
        })??;

    Ok(Arc::new(decoded))
}
