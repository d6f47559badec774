//! Probing: the target contract, retry loop and circuit breaker.

pub mod breaker;
pub mod command;
pub mod executor;
pub mod target;

pub use breaker::CircuitBreaker;
pub use command::CommandProbe;
pub use executor::{ProbeAttempt, ProbeExecutor};
pub use target::{ProbeResult, ProbeTarget};
