//! Durable per-target progress tracking.
//!
//! The store answers three questions for a target key: has this unit been
//! probed, is it blocklisted, and has any non-blocklisted unit already
//! succeeded. Restarted campaigns use it to skip finished work.

pub mod store;

pub use store::{unit_key, ProgressStats, ProgressStore, ValidUnit};
