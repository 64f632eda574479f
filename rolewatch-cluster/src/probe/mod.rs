//! Node probers
//!
//! A prober answers one question about a node: is it currently the primary,
//! a replica, or can it not tell us. Each backend kind (PostgreSQL, HTTP
//! status endpoint, Redis sentinel) implements [`Prober`]; the polling cycle
//! only ever talks to the trait.

pub mod http;
pub mod sentinel;
pub mod sql;

use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};

pub use http::HttpStatusProber;
pub use sentinel::{Sentinel, SentinelMasterCheck, SentinelProber, Topology};
pub use sql::{PgClusterEndpointProbe, PgCredentials, SqlRecoveryProber};

/// Address of a probe target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub host: String,
    pub port: u16,
}

impl Node {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role a node reports for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

/// Why a reachable probe still produced no answer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("query failed: {0}")]
    Query(String),
}

/// Raw result of probing one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    RoleDetected(Role),
    /// The node answered, but without usable role data
    ReachableNoRole,
    Unreachable(String),
    Error(ProbeFailure),
}

/// Backend kind, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sql,
    Http,
    Sentinel,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Http => "http",
            Self::Sentinel => "sentinel",
        }
    }
}

/// One node's probe result together with how long it took
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub node: Node,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
}

/// Probe results of one cycle, in configuration order
#[derive(Debug, Clone, Default)]
pub struct Survey {
    pub results: Vec<ProbeResult>,
    /// Set when role discovery went through an arbiter that could not agree
    /// on a master; per-node results are meaningless in that case.
    pub quorum_lost: bool,
}

/// Capability to report the role state of cluster nodes
#[async_trait]
pub trait Prober: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Probe a single node. Must not panic and must give up on its own
    /// within a bounded time; failures are expressed in the outcome.
    async fn probe(&self, node: &Node) -> ProbeOutcome;

    /// Probe every node of the cluster once.
    ///
    /// Probes run concurrently and each is cut off after `limit`; the survey
    /// only returns once every node has an outcome.
    async fn survey(&self, nodes: &[Node], limit: Duration) -> Survey {
        let results =
            futures::future::join_all(nodes.iter().map(|node| timed_probe(self, node, limit)))
                .await;

        Survey {
            results,
            quorum_lost: false,
        }
    }
}

/// Run `prober.probe(node)` under a deadline, recording its latency
pub async fn timed_probe<P: Prober + ?Sized>(prober: &P, node: &Node, limit: Duration) -> ProbeResult {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(limit, prober.probe(node)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::debug!(node = %node, backend = prober.kind().as_str(), "Probe timed out");
            ProbeOutcome::Error(ProbeFailure::Timeout(limit))
        }
    };

    ProbeResult {
        node: node.clone(),
        outcome,
        latency: started.elapsed(),
    }
}

/// Coarse cluster-wide up/down check against a shared endpoint
#[async_trait]
pub trait AggregateProbe: Send + Sync {
    /// Returns true when the cluster-wide endpoint answered correctly.
    /// Failures are logged and reported as false.
    async fn check(&self) -> bool;
}
