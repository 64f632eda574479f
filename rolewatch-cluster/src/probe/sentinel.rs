//! Redis sentinel discovery
//!
//! Instead of asking every Redis node for its role, the sentinels are asked
//! which node they currently consider master and which replicas follow it.
//! The first sentinel with a healthy view of the master wins.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{AggregateProbe, BackendKind, Node, ProbeOutcome, ProbeResult, Prober, Role, Survey};
use crate::error::{Error, Result};

/// Key written on the master by [`SentinelMasterCheck`]
const CHECK_KEY: &str = "rolewatch:master_check";
const CHECK_KEY_TTL_SECS: u64 = 300;

/// Flags that disqualify a master or replica entry
const DOWN_FLAGS: [&str; 2] = ["s_down", "o_down"];

/// Master and replicas as seen by one sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub master: Node,
    pub replicas: Vec<Node>,
}

impl Topology {
    /// Role of a configured node, matched on host only
    #[must_use]
    pub fn role_of(&self, node: &Node) -> ProbeOutcome {
        if self.master.host == node.host {
            ProbeOutcome::RoleDetected(Role::Primary)
        } else if self.replicas.iter().any(|r| r.host == node.host) {
            ProbeOutcome::RoleDetected(Role::Replica)
        } else {
            ProbeOutcome::Unreachable("not reported by sentinel".to_string())
        }
    }
}

fn has_flag(state: &HashMap<String, String>, wanted: &[&str]) -> bool {
    state
        .get("flags")
        .is_some_and(|flags| flags.split(',').any(|flag| wanted.contains(&flag)))
}

fn node_from_state(state: &HashMap<String, String>) -> Option<Node> {
    let host = state.get("ip")?;
    let port = state.get("port")?.parse().ok()?;
    Some(Node::new(host.clone(), port))
}

/// Turn `SENTINEL master` and `SENTINEL slaves` replies into a topology.
/// Returns None when the master is considered down.
fn parse_topology(
    master: &HashMap<String, String>,
    replicas: &[HashMap<String, String>],
) -> Option<Topology> {
    if has_flag(master, &DOWN_FLAGS) {
        return None;
    }
    let master = node_from_state(master)?;

    let replicas = replicas
        .iter()
        .filter(|state| !has_flag(state, &["s_down", "o_down", "disconnected"]))
        .filter_map(node_from_state)
        .collect();

    Some(Topology { master, replicas })
}

/// Client for a group of sentinels watching one master name
pub struct Sentinel {
    sentinels: Vec<Node>,
    master_name: String,
    op_timeout: Duration,
}

impl Sentinel {
    #[must_use]
    pub fn new(sentinels: Vec<Node>, master_name: impl Into<String>, op_timeout: Duration) -> Self {
        Self {
            sentinels,
            master_name: master_name.into(),
            op_timeout,
        }
    }

    #[must_use]
    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    async fn connect(&self, url: &str, target: &Node) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis address {target}: {e}")))?;

        timeout(self.op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Timeout(format!("Redis connection to {target} timed out")))?
            .map_err(|e| Error::Redis(format!("Redis connection to {target} failed: {e}")))
    }

    async fn query<T: FromRedisValue>(
        &self,
        conn: &mut MultiplexedConnection,
        cmd: &redis::Cmd,
        target: &Node,
    ) -> Result<T> {
        timeout(self.op_timeout, cmd.query_async::<T>(conn))
            .await
            .map_err(|_| Error::Timeout(format!("Redis command on {target} timed out")))?
            .map_err(|e| Error::Redis(format!("Redis command on {target} failed: {e}")))
    }

    /// Ask a single sentinel for the topology
    async fn ask(&self, sentinel: &Node) -> Result<Option<Topology>> {
        let mut conn = self
            .connect(&format!("redis://{}:{}/", sentinel.host, sentinel.port), sentinel)
            .await?;

        let master: HashMap<String, String> = self
            .query(
                &mut conn,
                redis::cmd("SENTINEL").arg("master").arg(&self.master_name),
                sentinel,
            )
            .await?;
        // `slaves` is still understood by every sentinel version, `replicas` is not
        let replicas: Vec<HashMap<String, String>> = self
            .query(
                &mut conn,
                redis::cmd("SENTINEL").arg("slaves").arg(&self.master_name),
                sentinel,
            )
            .await?;

        Ok(parse_topology(&master, &replicas))
    }

    /// Discover the current master and its replicas
    pub async fn discover(&self) -> Result<Topology> {
        for sentinel in &self.sentinels {
            match self.ask(sentinel).await {
                Ok(Some(topology)) => {
                    debug!(
                        sentinel = %sentinel,
                        master = %topology.master,
                        replicas = topology.replicas.len(),
                        "Sentinel reported topology"
                    );
                    return Ok(topology);
                }
                Ok(None) => {
                    debug!(sentinel = %sentinel, master_name = %self.master_name, "Sentinel considers master down");
                }
                Err(e) => {
                    debug!(sentinel = %sentinel, error = %e, "Sentinel query failed");
                }
            }
        }

        Err(Error::NoQuorum(self.master_name.clone()))
    }

    /// Connect to the current master, authenticated and on database `db`
    pub async fn master_connection(&self, password: &str, db: i64) -> Result<(Node, MultiplexedConnection)> {
        let master = self.discover().await?.master;
        let url = if password.is_empty() {
            format!("redis://{}:{}/{db}", master.host, master.port)
        } else {
            let password = utf8_percent_encode(password, NON_ALPHANUMERIC);
            format!("redis://:{password}@{}:{}/{db}", master.host, master.port)
        };

        let conn = self.connect(&url, &master).await?;
        Ok((master, conn))
    }

    pub(crate) async fn run<T: FromRedisValue>(
        &self,
        conn: &mut MultiplexedConnection,
        cmd: &redis::Cmd,
        target: &Node,
    ) -> Result<T> {
        self.query(conn, cmd, target).await
    }
}

/// Role detection through sentinel discovery
///
/// One discovery per cycle answers for every node at once, so `survey` is
/// overridden; a failed discovery marks the whole survey as `quorum_lost`.
pub struct SentinelProber {
    sentinel: Arc<Sentinel>,
}

impl SentinelProber {
    #[must_use]
    pub const fn new(sentinel: Arc<Sentinel>) -> Self {
        Self { sentinel }
    }
}

#[async_trait]
impl Prober for SentinelProber {
    fn kind(&self) -> BackendKind {
        BackendKind::Sentinel
    }

    async fn probe(&self, node: &Node) -> ProbeOutcome {
        match self.sentinel.discover().await {
            Ok(topology) => topology.role_of(node),
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }

    // Discovery as a whole is cut off after `limit`; running out of time
    // counts as lost quorum.
    async fn survey(&self, nodes: &[Node], limit: Duration) -> Survey {
        let started = Instant::now();
        let discovered = match timeout(limit, self.sentinel.discover()).await {
            Ok(discovered) => discovered,
            Err(_) => Err(Error::Timeout(format!(
                "Master discovery for {} timed out after {limit:?}",
                self.sentinel.master_name()
            ))),
        };
        let latency = started.elapsed();

        match discovered {
            Ok(topology) => Survey {
                results: nodes
                    .iter()
                    .map(|node| ProbeResult {
                        node: node.clone(),
                        outcome: topology.role_of(node),
                        latency,
                    })
                    .collect(),
                quorum_lost: false,
            },
            Err(e) => {
                warn!(master_name = %self.sentinel.master_name(), error = %e, "Master discovery failed");
                Survey {
                    results: nodes
                        .iter()
                        .map(|node| ProbeResult {
                            node: node.clone(),
                            outcome: ProbeOutcome::Unreachable(e.to_string()),
                            latency,
                        })
                        .collect(),
                    quorum_lost: true,
                }
            }
        }
    }
}

/// Write/read round trip on the discovered master
pub struct SentinelMasterCheck {
    sentinel: Arc<Sentinel>,
    password: String,
    db: i64,
}

impl SentinelMasterCheck {
    #[must_use]
    pub fn new(sentinel: Arc<Sentinel>, password: impl Into<String>, db: i64) -> Self {
        Self {
            sentinel,
            password: password.into(),
            db,
        }
    }

    async fn round_trip(&self) -> Result<bool> {
        let (master, mut conn) = self.sentinel.master_connection(&self.password, self.db).await?;
        let value = nanoid::nanoid!(8);

        let _: () = self
            .sentinel
            .run(
                &mut conn,
                redis::cmd("SET").arg(CHECK_KEY).arg(&value).arg("EX").arg(CHECK_KEY_TTL_SECS),
                &master,
            )
            .await?;
        let stored: Option<String> = self
            .sentinel
            .run(&mut conn, redis::cmd("GET").arg(CHECK_KEY), &master)
            .await?;

        Ok(stored.as_deref() == Some(value.as_str()))
    }
}

#[async_trait]
impl AggregateProbe for SentinelMasterCheck {
    async fn check(&self) -> bool {
        match self.round_trip().await {
            Ok(true) => true,
            Ok(false) => {
                warn!(master_name = %self.sentinel.master_name(), "Master returned a different value than written");
                false
            }
            Err(e) => {
                warn!(master_name = %self.sentinel.master_name(), error = %e, "Master write check failed");
                false
            }
        }
    }
}
