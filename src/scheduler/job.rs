//! Job data model.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::error::TileError;
use crate::queue::{EntryId, Priority};
use crate::tile::{CacheKey, LayerId, TileCoord, TileResource};

/// Opaque handle to a submitted job. Never reused within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// The tile a job was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobOwner {
    pub layer: LayerId,
    pub coord: TileCoord,
}

impl JobOwner {
    pub fn new(layer: LayerId, coord: TileCoord) -> Self {
        Self { layer, coord }
    }
}

/// A request to fetch and decode one tile.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub key: CacheKey,
    pub address: String,
    pub post_data: Option<String>,
    pub priority: Priority,
    pub owner: JobOwner,
}

/// Where a live job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the priority queue
    Queued,

    /// Occupying a concurrency slot
    Running,
}

/// Something that happened to a job, reported by [`super::JobScheduler::poll`].
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A queued job took a free slot
    Started {
        handle: JobHandle,
        owners: Vec<JobOwner>,
    },

    /// Fetch and decode succeeded
    Completed {
        handle: JobHandle,
        key: CacheKey,
        owners: Vec<JobOwner>,
        resource: TileResource,
    },

    /// Network, decode or timeout failure
    Failed {
        handle: JobHandle,
        key: CacheKey,
        owners: Vec<JobOwner>,
        error: TileError,
    },
}

impl JobEvent {
    pub fn handle(&self) -> JobHandle {
        match self {
            JobEvent::Started { handle, .. }
            | JobEvent::Completed { handle, .. }
            | JobEvent::Failed { handle, .. } => *handle,
        }
    }

    pub fn owners(&self) -> &[JobOwner] {
        match self {
            JobEvent::Started { owners, .. }
            | JobEvent::Completed { owners, .. }
            | JobEvent::Failed { owners, .. } => owners,
        }
    }
}

/// Message sent by a job task when it finishes.
#[derive(Debug)]
pub(crate) struct Completion {
    pub handle: JobHandle,
    pub result: Result<TileResource, TileError>,
}

/// Scheduler-side bookkeeping for one job.
#[derive(Debug)]
pub(crate) struct Job {
    pub key: CacheKey,
    pub address: String,
    pub post_data: Option<String>,
    pub priority: Priority,
    pub owners: Vec<JobOwner>,
    pub phase: Phase,
}

#[derive(Debug)]
pub(crate) enum Phase {
    Queued {
        entry: EntryId,
    },
    Running {
        started_at: u64,
        cancel: CancellationToken,
    },
}

impl Job {
    pub fn state(&self) -> JobState {
        match self.phase {
            Phase::Queued { .. } => JobState::Queued,
            Phase::Running { .. } => JobState::Running,
        }
    }
}
