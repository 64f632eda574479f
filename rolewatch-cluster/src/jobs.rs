//! Poll jobs built from the configuration

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rolewatch_core::config::{PgClusterConfig, RedisClusterConfig, RedisQueuesConfig, SentinelNodeConfig};
use rolewatch_core::Config;

use crate::cycle::PollingCycle;
use crate::emit::{MetricNames, MetricSink};
use crate::error::{Error, Result};
use crate::probe::{
    HttpStatusProber, Node, PgClusterEndpointProbe, PgCredentials, Sentinel, SentinelMasterCheck,
    SentinelProber, SqlRecoveryProber,
};
use crate::queues::QueueLengthPoller;
use crate::store::DurableStore;
use crate::transition::TransitionTracker;

/// Store key of the last PostgreSQL primary
pub const PG_MASTER_KEY: &str = "pg_master";
/// Store key of the last Redis master
pub const REDIS_MASTER_KEY: &str = "redis_master";

/// Unit of work run by the monitor on every tick
#[async_trait]
pub trait PollJob: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self, sink: &dyn MetricSink) -> Result<()>;
}

/// Runs polling cycles of one cluster one after another
pub struct ClusterJob {
    name: String,
    cycles: Vec<PollingCycle>,
}

impl ClusterJob {
    #[must_use]
    pub fn new(name: impl Into<String>, cycles: Vec<PollingCycle>) -> Self {
        Self {
            name: name.into(),
            cycles,
        }
    }
}

#[async_trait]
impl PollJob for ClusterJob {
    fn name(&self) -> &str {
        &self.name
    }

    /// A failing cycle does not stop the ones after it; the first error is
    /// returned once all have run.
    async fn poll(&self, sink: &dyn MetricSink) -> Result<()> {
        let mut first_error = None;
        for cycle in &self.cycles {
            if let Err(e) = cycle.run(sink).await {
                tracing::error!(job = %self.name, cycle = cycle.job(), error = %e, "Polling cycle failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Publishes `Redis_Queues/<queue>` lengths
pub struct QueueJob {
    name: String,
    poller: QueueLengthPoller,
}

impl QueueJob {
    #[must_use]
    pub fn new(name: impl Into<String>, poller: QueueLengthPoller) -> Self {
        Self {
            name: name.into(),
            poller,
        }
    }
}

#[async_trait]
impl PollJob for QueueJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, sink: &dyn MetricSink) -> Result<()> {
        for (queue, length) in self.poller.lengths().await {
            sink.emit(&format!("Redis_Queues/{queue}"), length as f64);
        }
        Ok(())
    }
}

fn sentinel_nodes(nodes: &[SentinelNodeConfig]) -> Vec<Node> {
    nodes
        .iter()
        .map(|n| Node::new(n.host.clone(), n.sentinel_port))
        .collect()
}

fn pg_job(config: &PgClusterConfig, store: Arc<dyn DurableStore>, probe_timeout: Duration) -> Result<ClusterJob> {
    let credentials = PgCredentials {
        user: config.user.clone(),
        password: config.password.clone(),
        dbname: config.dbname.clone(),
    };

    let status_nodes = config
        .nodes
        .iter()
        .map(|n| Node::new(n.host.clone(), n.status_port))
        .collect();
    let http = PollingCycle::new(
        "pg_http",
        MetricNames::PG_HTTP,
        status_nodes,
        Arc::new(HttpStatusProber::new(probe_timeout, config.replica_status_code)?),
        probe_timeout,
    );

    let sql_nodes = config
        .nodes
        .iter()
        .map(|n| Node::new(n.host.clone(), n.port))
        .collect();
    let endpoint = Node::new(config.cluster_host.clone(), config.cluster_port);
    let sql = PollingCycle::new(
        "pg_sql",
        MetricNames::PG_SQL,
        sql_nodes,
        Arc::new(SqlRecoveryProber::new(credentials.clone(), probe_timeout)),
        probe_timeout,
    )
    .with_aggregate(Arc::new(PgClusterEndpointProbe::new(endpoint, credentials, probe_timeout)))
    .with_tracker(TransitionTracker::new(store, PG_MASTER_KEY));

    Ok(ClusterJob::new("pg_cluster", vec![http, sql]))
}

fn redis_job(config: &RedisClusterConfig, store: Arc<dyn DurableStore>, probe_timeout: Duration) -> ClusterJob {
    let nodes = sentinel_nodes(&config.nodes);
    let sentinel = Arc::new(Sentinel::new(nodes.clone(), config.master_name.clone(), probe_timeout));

    let cycle = PollingCycle::new(
        "redis_sentinel",
        MetricNames::REDIS_SENTINEL,
        nodes,
        Arc::new(SentinelProber::new(sentinel.clone())),
        probe_timeout,
    )
    .with_aggregate(Arc::new(SentinelMasterCheck::new(
        sentinel,
        config.password.clone(),
        config.test_db,
    )))
    .with_tracker(TransitionTracker::new(store, REDIS_MASTER_KEY));

    ClusterJob::new("redis_cluster", vec![cycle])
}

fn queue_job(config: &RedisQueuesConfig, probe_timeout: Duration) -> QueueJob {
    let sentinel = Arc::new(Sentinel::new(
        sentinel_nodes(&config.nodes),
        config.master_name.clone(),
        probe_timeout,
    ));

    QueueJob::new(
        "redis_queues",
        QueueLengthPoller::new(sentinel, config.password.clone(), config.db, config.queues.clone()),
    )
}

/// Build one job per configured section
pub fn build_jobs(config: &Config, store: Arc<dyn DurableStore>) -> Result<Vec<Arc<dyn PollJob>>> {
    let probe_timeout = Duration::from_secs(config.poller.probe_timeout_seconds);
    let mut jobs: Vec<Arc<dyn PollJob>> = Vec::new();

    if let Some(pg) = &config.pg_cluster {
        jobs.push(Arc::new(pg_job(pg, store.clone(), probe_timeout)?));
    }
    if let Some(redis) = &config.redis_cluster {
        jobs.push(Arc::new(redis_job(redis, store.clone(), probe_timeout)));
    }
    if let Some(queues) = &config.redis_queues {
        jobs.push(Arc::new(queue_job(queues, probe_timeout)));
    }

    if jobs.is_empty() {
        return Err(Error::Configuration("No cluster configured".to_string()));
    }

    info!(
        jobs = ?jobs.iter().map(|job| job.name().to_string()).collect::<Vec<_>>(),
        "Poll jobs ready"
    );
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::RecordingSink;
    use crate::store::MemoryStore;
    use rolewatch_core::config::PgNodeConfig;

    #[test]
    fn test_no_sections_is_an_error() {
        let result = build_jobs(&Config::default(), Arc::new(MemoryStore::new()));

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_one_job_per_section() {
        let config = Config {
            pg_cluster: Some(PgClusterConfig {
                nodes: vec![PgNodeConfig {
                    host: "db1".to_string(),
                    port: 5432,
                    status_port: 15432,
                }],
                ..PgClusterConfig::default()
            }),
            redis_queues: Some(RedisQueuesConfig {
                queues: vec!["mail".to_string()],
                ..RedisQueuesConfig::default()
            }),
            ..Config::default()
        };

        let jobs = build_jobs(&config, Arc::new(MemoryStore::new())).unwrap();
        let names: Vec<&str> = jobs.iter().map(|job| job.name()).collect();

        assert_eq!(names, vec!["pg_cluster", "redis_queues"]);
    }

    #[test]
    fn test_invalid_replica_status_code() {
        let config = Config {
            pg_cluster: Some(PgClusterConfig {
                replica_status_code: 1000,
                ..PgClusterConfig::default()
            }),
            ..Config::default()
        };

        assert!(matches!(
            build_jobs(&config, Arc::new(MemoryStore::new())),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_job_reports_unknown_lengths() {
        let config = RedisQueuesConfig {
            nodes: vec![SentinelNodeConfig {
                host: "127.0.0.1".to_string(),
                sentinel_port: 1,
            }],
            queues: vec!["mail".to_string()],
            ..RedisQueuesConfig::default()
        };
        let sink = RecordingSink::new();

        queue_job(&config, Duration::from_millis(500)).poll(&sink).await.unwrap();

        assert_eq!(sink.get("Redis_Queues/mail"), Some(-1.0));
    }

    #[tokio::test]
    async fn test_pg_job_with_nothing_listening() {
        // Nothing listens on port 1; both cycles still emit their gauges
        let config = PgClusterConfig {
            nodes: vec![PgNodeConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                status_port: 1,
            }],
            cluster_host: "127.0.0.1".to_string(),
            cluster_port: 1,
            ..PgClusterConfig::default()
        };
        let sink = RecordingSink::new();

        let job = pg_job(&config, Arc::new(MemoryStore::new()), Duration::from_secs(2)).unwrap();
        job.poll(&sink).await.unwrap();

        assert_eq!(sink.get("PG_Cluster/HttpStatus/127.0.0.1"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/HttpStatusServersNum"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/ClusterRole/127.0.0.1"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/ClusterStatus"), Some(0.0));
        assert_eq!(sink.get("PG_Cluster/SwitchOver"), Some(0.0));
    }
}
