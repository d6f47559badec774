//! Scarce resources and the egress channels derived from them.
//!
//! A resource is an identity credential; a channel is the egress endpoint a
//! provisioner derives from it. Workers lease one resource, acquire a
//! channel, and rotate the channel once it passes its TTL.

pub mod channel;
pub mod pool;
pub mod provisioning;

pub use channel::{Channel, ChannelGrant};
pub use pool::{ResourceBinding, ResourcePool};
pub use provisioning::{ChannelProvisioner, StaticProvisioner};
