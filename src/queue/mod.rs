//! Distributed job queue.
//!
//! Each node keeps its own FIFO of `RemoteJob`s, runs them one at a time
//! through a `JobRunner`, and talks to peers over HTTP to hand out shards
//! and to stop work once a target is solved.

pub mod job;
pub mod manager;
pub mod peer;
pub mod store;

pub use job::{
    CreateJobRequest, JobSettings, JobStatus, JobUpdate, QueueStatus, RemoteJob, StatusCounts,
    StopJobRequest,
};
pub use manager::{JobOutcome, JobRunner, QueueManager};
pub use peer::PeerClient;
pub use store::{QueueStore, QUEUE_STATE_FILE};
