//! Campaign execution on a single node.
//!
//! A campaign is one sweep of a unit range for one target key. The
//! coordinator filters out already-attempted units, chunks the rest across
//! workers, and turns their reports into a `CampaignOutcome`.

pub mod coordinator;
pub mod partition;
pub mod signal;
pub mod worker;

pub use coordinator::{CampaignCoordinator, CampaignOutcome, CampaignReport, CampaignSpec};
pub use partition::{chunk_units, split_range_across_nodes, UnitRange};
pub use signal::{StopSignal, SuccessReporter};
pub use worker::{StopReason, Worker, WorkerContext, WorkerPhase, WorkerReport};
