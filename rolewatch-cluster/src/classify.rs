//! Liveness classification of probe outcomes

use std::time::Duration;

use crate::probe::{Node, ProbeOutcome, ProbeResult, Role};

/// Per-node state for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Primary,
    Replica,
    /// Answered, but without usable role data
    Degraded,
    /// Could not be reached at all
    Offline,
}

impl NodeState {
    /// Gauge value: 2 primary, 1 replica, 0 otherwise
    #[must_use]
    pub const fn status_code(self) -> i64 {
        match self {
            Self::Primary => 2,
            Self::Replica => 1,
            Self::Degraded | Self::Offline => 0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

/// Map a raw probe outcome to a node state
#[must_use]
pub const fn classify(outcome: &ProbeOutcome) -> NodeState {
    match outcome {
        ProbeOutcome::RoleDetected(Role::Primary) => NodeState::Primary,
        ProbeOutcome::RoleDetected(Role::Replica) => NodeState::Replica,
        ProbeOutcome::ReachableNoRole => NodeState::Degraded,
        ProbeOutcome::Unreachable(_) | ProbeOutcome::Error(_) => NodeState::Offline,
    }
}

/// Classified health of one node in one cycle
#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub node: Node,
    pub state: NodeState,
    /// Raw outcome, kept for diagnostics
    pub outcome: ProbeOutcome,
    pub latency: Duration,
}

impl From<ProbeResult> for NodeHealth {
    fn from(result: ProbeResult) -> Self {
        Self {
            state: classify(&result.outcome),
            node: result.node,
            outcome: result.outcome,
            latency: result.latency,
        }
    }
}
