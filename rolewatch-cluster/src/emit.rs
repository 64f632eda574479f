//! Metric emission
//!
//! Cycles hand their results to a [`MetricSink`] as plain named gauges.
//! Names follow the `<Prefix>/<Metric>[/<host>]` scheme dashboards already
//! know, e.g. `PG_Cluster/ClusterRole/db1` or `Redis_Cluster/SwitchOver`.

use parking_lot::Mutex;

use rolewatch_core::metrics::CLUSTER_GAUGES;

use crate::snapshot::ClusterSnapshot;

/// Receiver of derived cluster facts
pub trait MetricSink: Send + Sync {
    fn emit(&self, name: &str, value: f64);
}

/// Publishes every value as `rolewatch_gauge{metric="<name>"}`
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricSink for PrometheusSink {
    fn emit(&self, name: &str, value: f64) {
        CLUSTER_GAUGES.with_label_values(&[name]).set(value);
    }
}

/// Keeps emitted values in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingSink {
    values: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value emitted under `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    #[must_use]
    pub fn values(&self) -> Vec<(String, f64)> {
        self.values.lock().clone()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }
}

impl MetricSink for RecordingSink {
    fn emit(&self, name: &str, value: f64) {
        self.values.lock().push((name.to_string(), value));
    }
}

/// Which gauges a cycle publishes, and under which names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNames {
    pub prefix: &'static str,
    /// Per-node status code, `<prefix>/<node_status>/<host>`
    pub node_status: &'static str,
    /// Number of nodes that reported a role
    pub role_reporting: Option<&'static str>,
    /// Aggregate up/down flag
    pub cluster_up: Option<&'static str>,
    /// Replica/offline/degraded counts and the ambiguity flag
    pub counts: bool,
    /// Switch-over flag
    pub switch_over: bool,
}

impl MetricNames {
    /// Governor HTTP status endpoints of a PostgreSQL cluster
    pub const PG_HTTP: Self = Self {
        prefix: "PG_Cluster",
        node_status: "HttpStatus",
        role_reporting: Some("HttpStatusServersNum"),
        cluster_up: None,
        counts: false,
        switch_over: false,
    };

    /// SQL role detection of a PostgreSQL cluster
    pub const PG_SQL: Self = Self {
        prefix: "PG_Cluster",
        node_status: "ClusterRole",
        role_reporting: None,
        cluster_up: Some("ClusterStatus"),
        counts: true,
        switch_over: true,
    };

    /// Sentinel-managed Redis
    pub const REDIS_SENTINEL: Self = Self {
        prefix: "Redis_Cluster",
        node_status: "ClusterStatus",
        role_reporting: None,
        cluster_up: Some("MasterStatus"),
        counts: true,
        switch_over: true,
    };

    #[must_use]
    pub fn name(&self, metric: &str) -> String {
        format!("{}/{metric}", self.prefix)
    }

    #[must_use]
    pub fn node_name(&self, host: &str) -> String {
        format!("{}/{}/{host}", self.prefix, self.node_status)
    }

    /// Publish everything derived from the snapshot
    pub fn emit_snapshot(&self, snapshot: &ClusterSnapshot, sink: &dyn MetricSink) {
        for health in &snapshot.nodes {
            sink.emit(&self.node_name(&health.node.host), health.state.status_code() as f64);
        }

        if let Some(metric) = self.role_reporting {
            sink.emit(&self.name(metric), snapshot.role_reporting_count() as f64);
        }

        if self.counts {
            sink.emit(&self.name("SlavesNum"), snapshot.replica_count() as f64);
            sink.emit(&self.name("OfflineNum"), snapshot.offline_count as f64);
            sink.emit(&self.name("DegradedNum"), snapshot.degraded_count as f64);
            sink.emit(&self.name("AmbiguousPrimary"), bool_gauge(snapshot.is_ambiguous()));
        }

        if let Some(metric) = self.cluster_up {
            sink.emit(&self.name(metric), bool_gauge(snapshot.cluster_up));
        }
    }

    /// Publish the switch-over flag, if this cycle tracks transitions
    pub fn emit_switch_over(&self, flag: i64, sink: &dyn MetricSink) {
        if self.switch_over {
            sink.emit(&self.name("SwitchOver"), flag as f64);
        }
    }
}

const fn bool_gauge(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
