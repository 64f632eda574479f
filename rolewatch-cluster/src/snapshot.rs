//! Cluster-wide snapshot of one polling cycle

use tracing::warn;

use crate::classify::{NodeHealth, NodeState};
use crate::probe::Survey;

/// Cluster health derived from one survey
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// Host of the primary, last candidate wins when several claim the role
    pub primary: Option<String>,
    /// Every host classified primary, in probe order
    pub primary_candidates: Vec<String>,
    pub replicas: Vec<String>,
    /// Nodes classified offline or degraded
    pub offline_count: usize,
    pub degraded_count: usize,
    pub cluster_up: bool,
    pub quorum_lost: bool,
    pub nodes: Vec<NodeHealth>,
}

impl ClusterSnapshot {
    /// Aggregate a survey into a snapshot
    ///
    /// `aggregate_up` is the result of the cluster-wide endpoint check, `None`
    /// when the cluster has no such endpoint.
    #[must_use]
    pub fn build(survey: Survey, aggregate_up: Option<bool>) -> Self {
        let nodes: Vec<NodeHealth> = survey.results.into_iter().map(NodeHealth::from).collect();

        let hosts_in = |state: NodeState| -> Vec<String> {
            nodes
                .iter()
                .filter(|n| n.state == state)
                .map(|n| n.node.host.clone())
                .collect()
        };
        let primary_candidates = hosts_in(NodeState::Primary);
        let replicas = hosts_in(NodeState::Replica);
        let degraded_count = nodes.iter().filter(|n| n.state == NodeState::Degraded).count();
        let offline_count = degraded_count + nodes.iter().filter(|n| n.state == NodeState::Offline).count();

        if primary_candidates.len() > 1 {
            warn!(
                candidates = ?primary_candidates,
                "More than one node reports itself as primary, keeping the last one"
            );
        }

        let primary = if survey.quorum_lost {
            None
        } else {
            primary_candidates.last().cloned()
        };

        let any_answered = nodes.is_empty() || nodes.iter().any(|n| n.state != NodeState::Offline);
        let cluster_up = !survey.quorum_lost && aggregate_up.unwrap_or(true) && any_answered;

        Self {
            primary,
            primary_candidates,
            replicas,
            offline_count,
            degraded_count,
            cluster_up,
            quorum_lost: survey.quorum_lost,
            nodes,
        }
    }

    /// More than one node claimed to be primary
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.primary_candidates.len() > 1
    }

    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Nodes that reported a role, primary or replica
    #[must_use]
    pub fn role_reporting_count(&self) -> usize {
        self.primary_candidates.len() + self.replicas.len()
    }
}
