//! PostgreSQL probes
//!
//! Role detection asks the node itself whether it is in recovery: a server
//! replaying WAL is a replica, anything else accepts writes.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{AggregateProbe, BackendKind, Node, ProbeFailure, ProbeOutcome, Prober, Role};

const RECOVERY_QUERY: &str = "SELECT pg_is_in_recovery()";
const CLUSTER_QUERY: &str = "SELECT count(*) FROM pg_stat_database";

/// Login used for every PostgreSQL probe
#[derive(Debug, Clone)]
pub struct PgCredentials {
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl PgCredentials {
    fn connect_options(&self, node: &Node) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&node.host)
            .port(node.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.dbname)
            .application_name("rolewatch")
    }
}

/// Open a dedicated connection; the caller owns it for one probe only
async fn connect(
    credentials: &PgCredentials,
    node: &Node,
    limit: Duration,
) -> Result<PgConnection, ProbeOutcome> {
    let options = credentials.connect_options(node);
    match timeout(limit, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => {
            debug!(node = %node, error = %e, "PostgreSQL connection failed");
            Err(ProbeOutcome::Unreachable(e.to_string()))
        }
        Err(_) => Err(ProbeOutcome::Error(ProbeFailure::Timeout(limit))),
    }
}

async fn close(conn: PgConnection, node: &Node) {
    if let Err(e) = conn.close().await {
        debug!(node = %node, error = %e, "Failed to close PostgreSQL connection cleanly");
    }
}

/// Detects primary/replica via `pg_is_in_recovery()`
pub struct SqlRecoveryProber {
    credentials: PgCredentials,
    connect_timeout: Duration,
}

impl SqlRecoveryProber {
    #[must_use]
    pub const fn new(credentials: PgCredentials, connect_timeout: Duration) -> Self {
        Self {
            credentials,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Prober for SqlRecoveryProber {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    async fn probe(&self, node: &Node) -> ProbeOutcome {
        let mut conn = match connect(&self.credentials, node, self.connect_timeout).await {
            Ok(conn) => conn,
            Err(outcome) => return outcome,
        };

        let in_recovery = sqlx::query_scalar::<_, bool>(RECOVERY_QUERY)
            .fetch_one(&mut conn)
            .await;
        close(conn, node).await;

        match in_recovery {
            Ok(false) => ProbeOutcome::RoleDetected(Role::Primary),
            Ok(true) => ProbeOutcome::RoleDetected(Role::Replica),
            Err(e) => {
                debug!(node = %node, error = %e, "Recovery query failed");
                ProbeOutcome::Unreachable(format!("recovery query failed: {e}"))
            }
        }
    }
}

/// Cluster-wide check through the virtual endpoint in front of the nodes
///
/// Up when the endpoint accepts a login and returns database statistics.
pub struct PgClusterEndpointProbe {
    endpoint: Node,
    credentials: PgCredentials,
    connect_timeout: Duration,
}

impl PgClusterEndpointProbe {
    #[must_use]
    pub const fn new(endpoint: Node, credentials: PgCredentials, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            credentials,
            connect_timeout,
        }
    }
}

impl PgClusterEndpointProbe {
    async fn has_databases(&self) -> bool {
        let mut conn = match connect(&self.credentials, &self.endpoint, self.connect_timeout).await {
            Ok(conn) => conn,
            Err(outcome) => {
                warn!(endpoint = %self.endpoint, outcome = ?outcome, "Cluster endpoint unreachable");
                return false;
            }
        };

        let databases = sqlx::query_scalar::<_, i64>(CLUSTER_QUERY)
            .fetch_one(&mut conn)
            .await;
        close(conn, &self.endpoint).await;

        match databases {
            Ok(count) if count > 0 => true,
            Ok(_) => {
                warn!(endpoint = %self.endpoint, "Cluster endpoint returned no database statistics");
                false
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Cluster endpoint query failed");
                false
            }
        }
    }
}

#[async_trait]
impl AggregateProbe for PgClusterEndpointProbe {
    /// Connect, query and close all share one deadline
    async fn check(&self) -> bool {
        match timeout(self.connect_timeout, self.has_databases()).await {
            Ok(up) => up,
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    timeout = ?self.connect_timeout,
                    "Cluster endpoint check timed out"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SSL_REQUEST_CODE: i32 = 80_877_103;

    /// Completes the PostgreSQL startup handshake, then never answers again
    async fn silent_after_login() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            loop {
                let Ok(len) = socket.read_i32().await else {
                    return;
                };
                let mut body = vec![0u8; usize::try_from(len).unwrap_or(4).saturating_sub(4)];
                if socket.read_exact(&mut body).await.is_err() {
                    return;
                }
                if body == SSL_REQUEST_CODE.to_be_bytes() {
                    let _ = socket.write_all(b"N").await;
                    continue;
                }
                break;
            }

            // AuthenticationOk, then ReadyForQuery (idle)
            let _ = socket
                .write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0, b'Z', 0, 0, 0, 5, b'I'])
                .await;
            // Holding the socket keeps the session open
            std::future::pending::<()>().await;
        });

        port
    }

    fn credentials() -> PgCredentials {
        PgCredentials {
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "postgres".to_string(),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Bind then drop a listener to get a local port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = SqlRecoveryProber::new(credentials(), Duration::from_secs(2));
        let outcome = prober.probe(&Node::new("127.0.0.1", port)).await;

        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)), "{outcome:?}");
    }

    #[tokio::test]
    async fn test_unreachable_cluster_endpoint_is_down() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = PgClusterEndpointProbe::new(
            Node::new("127.0.0.1", port),
            credentials(),
            Duration::from_secs(2),
        );

        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_stalled_cluster_endpoint_gives_up() {
        let port = silent_after_login().await;
        let probe = PgClusterEndpointProbe::new(
            Node::new("127.0.0.1", port),
            credentials(),
            Duration::from_secs(1),
        );

        let up = tokio::time::timeout(Duration::from_secs(5), probe.check())
            .await
            .expect("check must give up within its own timeout");
        assert!(!up);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL on localhost:5432"]
    async fn test_local_server_reports_a_role() {
        let prober = SqlRecoveryProber::new(credentials(), Duration::from_secs(2));
        let outcome = prober.probe(&Node::new("localhost", 5432)).await;

        assert!(matches!(outcome, ProbeOutcome::RoleDetected(_)), "{outcome:?}");
    }
}
