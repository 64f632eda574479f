//! HTTP status endpoint probe
//!
//! High-availability managers such as governor or patroni expose a status
//! port that answers 200 on the primary and a fixed error code on replicas.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{BackendKind, Node, ProbeFailure, ProbeOutcome, Prober, Role};
use crate::error::{Error, Result};

/// Maps the status code of `GET http://host:port/` to a role
pub struct HttpStatusProber {
    client: Client,
    replica_status: StatusCode,
    request_timeout: Duration,
}

impl HttpStatusProber {
    /// Create a prober whose requests give up after `request_timeout`
    pub fn new(request_timeout: Duration, replica_status_code: u16) -> Result<Self> {
        let replica_status = StatusCode::from_u16(replica_status_code).map_err(|e| {
            Error::Configuration(format!("Invalid replica status code {replica_status_code}: {e}"))
        })?;

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            replica_status,
            request_timeout,
        })
    }

    fn status_url(node: &Node) -> String {
        format!("http://{}:{}/", node.host, node.port)
    }
}

#[async_trait]
impl Prober for HttpStatusProber {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn probe(&self, node: &Node) -> ProbeOutcome {
        let response = match self.client.get(Self::status_url(node)).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ProbeOutcome::Error(ProbeFailure::Timeout(self.request_timeout));
            }
            Err(e) => {
                debug!(node = %node, error = %e, "Status endpoint unreachable");
                return ProbeOutcome::Unreachable(e.to_string());
            }
        };

        let status = response.status();
        if status == self.replica_status {
            return ProbeOutcome::RoleDetected(Role::Replica);
        }
        if status != StatusCode::OK {
            debug!(node = %node, status = %status, "Status endpoint answered without a role");
            return ProbeOutcome::ReachableNoRole;
        }

        // A primary always describes itself; an empty 200 means the manager
        // is up but has no opinion about the database yet.
        match response.text().await {
            Ok(body) if !body.trim().is_empty() => ProbeOutcome::RoleDetected(Role::Primary),
            Ok(_) => ProbeOutcome::ReachableNoRole,
            Err(e) if e.is_timeout() => {
                ProbeOutcome::Error(ProbeFailure::Timeout(self.request_timeout))
            }
            Err(e) => {
                debug!(node = %node, error = %e, "Failed to read status body");
                ProbeOutcome::ReachableNoRole
            }
        }
    }
}
