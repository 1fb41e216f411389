//! Allocation lookup against the scheduler API
//!
//! `GET {allocation_url}/{instance_id}` returns `{ "vm_ipv6": "..." }` once the
//! instance is scheduled on a node.

use crate::view_model::AddressResolver;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("allocation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("allocation lookup returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct Allocation {
    #[serde(default)]
    vm_ipv6: Option<String>,
}

pub struct SchedulerResolver {
    client: reqwest::Client,
    allocation_url: String,
}

impl SchedulerResolver {
    pub fn new(allocation_url: &str, timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            allocation_url: allocation_url.trim_end_matches('/').to_string(),
        })
    }

    fn allocation_endpoint(&self, instance_id: &str) -> String {
        format!("{}/{}", self.allocation_url, instance_id)
    }
}

#[async_trait]
impl AddressResolver for SchedulerResolver {
    async fn resolve(&self, instance_id: &str) -> Result<Option<String>, ResolveError> {
        let response = self.client.get(self.allocation_endpoint(instance_id)).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Status(response.status().as_u16()));
        }
        let allocation: Allocation = response.json().await?;
        debug!(instance = %instance_id, ipv6 = ?allocation.vm_ipv6, "allocation resolved");
        Ok(allocation.vm_ipv6.filter(|ip| !ip.is_empty()))
    }
}
