//! Connector Registry: owns every connector, looked up by server-id,
//! disposed all-at-once at shutdown with aggregated (never short-circuiting)
//! failures.

use std::collections::HashMap;

use anyhow::{Result, bail};
use futures::future::join_all;

use crate::config::ServerDescriptor;
use crate::connector::Connector;

pub struct ConnectorRegistry {
    connectors: HashMap<String, Connector>,
}

impl ConnectorRegistry {
    pub fn new(servers: Vec<(String, ServerDescriptor)>) -> Self {
        let connectors = servers
            .into_iter()
            .map(|(id, descriptor)| (id.clone(), Connector::spawn(id, descriptor)))
            .collect();
        Self { connectors }
    }

    /// Returns the connector for `server_id`, or *invalid-request* if unknown.
    pub fn get(&self, server_id: &str) -> Result<&Connector> {
        self.connectors
            .get(server_id)
            .ok_or_else(|| anyhow::anyhow!("unknown MCP server: {server_id}"))
    }

    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    /// Disposes every connector concurrently, waiting for all to settle.
    /// Never short-circuits; aggregates failures joined with `"; "`.
    pub async fn dispose_all(&self) -> Result<()> {
        let results = join_all(self.connectors.values().map(|connector| connector.dispose())).await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err().map(|error| error.to_string()))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            bail!(failures.join("; "));
        }
    }
}
