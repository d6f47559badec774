//! Channel provisioning seam.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ResourceSpec;
use crate::error::ProvisionError;

use super::channel::ChannelGrant;

/// External service that turns a resource id into a usable channel.
///
/// Callers treat every failure as transient.
#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    async fn request_channel(&self, resource_id: &str) -> Result<ChannelGrant, ProvisionError>;
}

/// Provisioner backed by a fixed `id -> address` table.
#[derive(Debug, Clone, Default)]
pub struct StaticProvisioner {
    addresses: HashMap<String, String>,
}

impl StaticProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[ResourceSpec]) -> Self {
        let addresses = specs
            .iter()
            .map(|spec| (spec.id.clone(), spec.address.clone()))
            .collect();
        Self { addresses }
    }

    pub fn with_address(mut self, id: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(id.into(), address.into());
        self
    }
}

#[async_trait]
impl ChannelProvisioner for StaticProvisioner {
    async fn request_channel(&self, resource_id: &str) -> Result<ChannelGrant, ProvisionError> {
        self.addresses
            .get(resource_id)
            .map(|address| ChannelGrant::new(address.clone()))
            .ok_or_else(|| {
                ProvisionError::Unavailable(format!("no address configured for '{}'", resource_id))
            })
    }
}
