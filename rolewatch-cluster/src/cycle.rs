//! One polling cycle: probe, aggregate, track, emit

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use rolewatch_core::metrics::{AMBIGUOUS_PRIMARY_TOTAL, CYCLE_DURATION, PROBE_DURATION};

use crate::classify::classify;
use crate::emit::{MetricNames, MetricSink};
use crate::error::Result;
use crate::probe::{AggregateProbe, Node, Prober};
use crate::snapshot::ClusterSnapshot;
use crate::transition::{Transition, TransitionTracker};

/// What a finished cycle observed
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: ClusterSnapshot,
    /// None when the cycle does not track transitions or quorum was lost
    pub transition: Option<Transition>,
}

/// Polls one cluster through one backend
pub struct PollingCycle {
    job: String,
    names: MetricNames,
    nodes: Vec<Node>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    aggregate: Option<Arc<dyn AggregateProbe>>,
    tracker: Option<TransitionTracker>,
}

impl PollingCycle {
    #[must_use]
    pub fn new(
        job: impl Into<String>,
        names: MetricNames,
        nodes: Vec<Node>,
        prober: Arc<dyn Prober>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            job: job.into(),
            names,
            nodes,
            prober,
            probe_timeout,
            aggregate: None,
            tracker: None,
        }
    }

    /// Also run a cluster-wide check, folded into `cluster_up`
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: Arc<dyn AggregateProbe>) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    /// Track primary changes and emit the switch-over flag
    #[must_use]
    pub fn with_tracker(mut self, tracker: TransitionTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Run the cycle once
    ///
    /// Snapshot gauges are always emitted. A failing state store aborts the
    /// cycle after that, without a switch-over value.
    pub async fn run(&self, sink: &dyn MetricSink) -> Result<CycleReport> {
        let started = Instant::now();

        let aggregate = async {
            match &self.aggregate {
                Some(probe) => Some(probe.check().await),
                None => None,
            }
        };
        let (survey, aggregate_up) =
            tokio::join!(self.prober.survey(&self.nodes, self.probe_timeout), aggregate);

        let backend = self.prober.kind().as_str();
        for result in &survey.results {
            PROBE_DURATION
                .with_label_values(&[backend, classify(&result.outcome).as_str()])
                .observe(result.latency.as_secs_f64());
        }

        let snapshot = ClusterSnapshot::build(survey, aggregate_up);
        if snapshot.is_ambiguous() {
            AMBIGUOUS_PRIMARY_TOTAL.with_label_values(&[self.job.as_str()]).inc();
        }
        self.names.emit_snapshot(&snapshot, sink);

        let transition = self.track(&snapshot, sink).await;
        CYCLE_DURATION
            .with_label_values(&[self.job.as_str()])
            .observe(started.elapsed().as_secs_f64());
        let transition = transition?;

        info!(
            job = %self.job,
            primary = snapshot.primary.as_deref().unwrap_or(""),
            replicas = snapshot.replica_count(),
            offline = snapshot.offline_count,
            cluster_up = snapshot.cluster_up,
            switch_over = transition.as_ref().map_or(0, Transition::flag),
            "Cycle finished"
        );

        Ok(CycleReport {
            snapshot,
            transition,
        })
    }

    async fn track(&self, snapshot: &ClusterSnapshot, sink: &dyn MetricSink) -> Result<Option<Transition>> {
        let Some(tracker) = &self.tracker else {
            return Ok(None);
        };

        // Without an agreed master the record would flip on every outage
        if snapshot.quorum_lost {
            warn!(job = %self.job, key = tracker.key(), "Quorum lost, primary record left untouched");
            self.names.emit_switch_over(0, sink);
            return Ok(None);
        }

        let transition = tracker.observe(snapshot.primary.as_deref()).await?;
        self.names.emit_switch_over(transition.flag(), sink);
        Ok(Some(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::RecordingSink;
    use crate::error::Error;
    use crate::probe::{BackendKind, ProbeOutcome, Role, Survey};
    use crate::store::{DurableStore, MemoryStore, MockDurableStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Reports fixed roles per host
    struct FixedProber {
        roles: Mutex<HashMap<String, ProbeOutcome>>,
        quorum_lost: bool,
    }

    impl FixedProber {
        fn new(roles: &[(&str, ProbeOutcome)]) -> Self {
            Self {
                roles: Mutex::new(
                    roles
                        .iter()
                        .map(|(host, outcome)| ((*host).to_string(), outcome.clone()))
                        .collect(),
                ),
                quorum_lost: false,
            }
        }
    }

    #[async_trait]
    impl Prober for FixedProber {
        fn kind(&self) -> BackendKind {
            BackendKind::Sql
        }

        async fn probe(&self, node: &Node) -> ProbeOutcome {
            self.roles
                .lock()
                .get(&node.host)
                .cloned()
                .unwrap_or_else(|| ProbeOutcome::Unreachable("unknown".to_string()))
        }

        async fn survey(&self, nodes: &[Node], limit: Duration) -> Survey {
            let mut results = Vec::new();
            for node in nodes {
                results.push(crate::probe::timed_probe(self, node, limit).await);
            }
            Survey {
                results,
                quorum_lost: self.quorum_lost,
            }
        }
    }

    struct FixedAggregate(bool);

    #[async_trait]
    impl AggregateProbe for FixedAggregate {
        async fn check(&self) -> bool {
            self.0
        }
    }

    fn nodes() -> Vec<Node> {
        vec![Node::new("A", 5432), Node::new("B", 5432)]
    }

    fn cycle(prober: FixedProber, store: Arc<dyn DurableStore>) -> PollingCycle {
        PollingCycle::new("pg_sql", MetricNames::PG_SQL, nodes(), Arc::new(prober), Duration::from_secs(5))
            .with_aggregate(Arc::new(FixedAggregate(true)))
            .with_tracker(TransitionTracker::new(store, "pg_master"))
    }

    #[tokio::test]
    async fn test_cycle_emits_snapshot_and_switch_over() {
        let store = Arc::new(MemoryStore::new());
        let prober = FixedProber::new(&[
            ("A", ProbeOutcome::RoleDetected(Role::Primary)),
            ("B", ProbeOutcome::RoleDetected(Role::Replica)),
        ]);
        let sink = RecordingSink::new();

        let report = cycle(prober, store.clone()).run(&sink).await.unwrap();

        assert_eq!(report.snapshot.primary.as_deref(), Some("A"));
        assert_eq!(report.transition.map(|t| t.flag()), Some(1));
        assert_eq!(sink.get("PG_Cluster/ClusterRole/A"), Some(2.0));
        assert_eq!(sink.get("PG_Cluster/ClusterStatus"), Some(1.0));
        assert_eq!(sink.get("PG_Cluster/SwitchOver"), Some(1.0));
        assert_eq!(store.read("pg_master").await.unwrap(), "A");
    }

    #[tokio::test]
    async fn test_aggregate_failure_marks_cluster_down() {
        let prober = FixedProber::new(&[("A", ProbeOutcome::RoleDetected(Role::Primary))]);
        let sink = RecordingSink::new();

        PollingCycle::new("pg_sql", MetricNames::PG_SQL, nodes(), Arc::new(prober), Duration::from_secs(5))
            .with_aggregate(Arc::new(FixedAggregate(false)))
            .run(&sink)
            .await
            .unwrap();

        assert_eq!(sink.get("PG_Cluster/ClusterStatus"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/SwitchOver"), None);
    }

    #[tokio::test]
    async fn test_quorum_loss_skips_tracking() {
        let mut store = MockDurableStore::new();
        store.expect_read().never();
        store.expect_write().never();

        let mut prober = FixedProber::new(&[("A", ProbeOutcome::Unreachable("no quorum".to_string()))]);
        prober.quorum_lost = true;
        let sink = RecordingSink::new();

        let report = cycle(prober, Arc::new(store)).run(&sink).await.unwrap();

        assert!(report.transition.is_none());
        assert_eq!(sink.get("PG_Cluster/SwitchOver"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/ClusterStatus"), Some(0.0));
    }

    #[tokio::test]
    async fn test_store_failure_still_emits_snapshot() {
        let mut store = MockDurableStore::new();
        store
            .expect_read()
            .returning(|_| Err(Error::Store("permission denied".to_string())));

        let prober = FixedProber::new(&[
            ("A", ProbeOutcome::RoleDetected(Role::Primary)),
            ("B", ProbeOutcome::RoleDetected(Role::Replica)),
        ]);
        let sink = RecordingSink::new();

        let result = cycle(prober, Arc::new(store)).run(&sink).await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(sink.get("PG_Cluster/ClusterRole/A"), Some(2.0));
        assert_eq!(sink.get("PG_Cluster/SlavesNum"), Some(1.0));
        assert_eq!(sink.get("PG_Cluster/SwitchOver"), None);
    }
}
