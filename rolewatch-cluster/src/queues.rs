//! Redis list lengths on the current master

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::probe::{Node, Sentinel};

/// Reported when a queue length could not be read
pub const UNKNOWN_LENGTH: i64 = -1;

/// Source of Redis list lengths
#[cfg_attr(test, mockall::automock)]
#[async_trait]
trait ListLength: Send {
    async fn llen(&mut self, key: &str) -> Result<i64>;
}

/// Lists on the connected master
struct MasterLists<'a> {
    sentinel: &'a Sentinel,
    master: Node,
    conn: MultiplexedConnection,
}

#[async_trait]
impl ListLength for MasterLists<'_> {
    async fn llen(&mut self, key: &str) -> Result<i64> {
        self.sentinel
            .run::<i64>(&mut self.conn, redis::cmd("LLEN").arg(key), &self.master)
            .await
    }
}

/// One failed key reports [`UNKNOWN_LENGTH`] without affecting the others
async fn read_lengths(queues: &[String], lists: &mut dyn ListLength) -> Vec<(String, i64)> {
    let mut lengths = Vec::with_capacity(queues.len());
    for queue in queues {
        let length = match lists.llen(queue).await {
            Ok(length) => length,
            Err(e) => {
                warn!(queue = %queue, error = %e, "LLEN failed");
                UNKNOWN_LENGTH
            }
        };
        debug!(queue = %queue, length, "Queue length");
        lengths.push((queue.clone(), length));
    }
    lengths
}

/// Reads `LLEN` of configured queues from whichever node is master
pub struct QueueLengthPoller {
    sentinel: Arc<Sentinel>,
    password: String,
    db: i64,
    queues: Vec<String>,
}

impl QueueLengthPoller {
    #[must_use]
    pub fn new(sentinel: Arc<Sentinel>, password: impl Into<String>, db: i64, queues: Vec<String>) -> Self {
        Self {
            sentinel,
            password: password.into(),
            db,
            queues,
        }
    }

    #[must_use]
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Length of every queue, in configuration order
    ///
    /// Never fails: a queue whose length is unknown reports [`UNKNOWN_LENGTH`].
    pub async fn lengths(&self) -> Vec<(String, i64)> {
        if self.queues.is_empty() {
            return Vec::new();
        }

        let (master, conn) = match self.sentinel.master_connection(&self.password, self.db).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(master_name = %self.sentinel.master_name(), error = %e, "No master for queue lengths");
                return self.unknown();
            }
        };

        let mut lists = MasterLists {
            sentinel: &self.sentinel,
            master,
            conn,
        };
        read_lengths(&self.queues, &mut lists).await
    }

    fn unknown(&self) -> Vec<(String, i64)> {
        self.queues
            .iter()
            .map(|queue| (queue.clone(), UNKNOWN_LENGTH))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    fn unreachable_sentinel() -> Arc<Sentinel> {
        Arc::new(Sentinel::new(
            vec![Node::new("127.0.0.1", 1)],
            "redis-master",
            Duration::from_millis(500),
        ))
    }

    #[tokio::test]
    async fn test_failed_key_reports_unknown_alone() {
        let mut lists = MockListLength::new();
        lists.expect_llen().times(3).returning(|key| match key {
            "mail" => Ok(12),
            "jobs" => Err(Error::Redis("WRONGTYPE Operation against a key".to_string())),
            _ => Ok(0),
        });
        let queues = vec!["mail".to_string(), "jobs".to_string(), "reports".to_string()];

        assert_eq!(
            read_lengths(&queues, &mut lists).await,
            vec![
                ("mail".to_string(), 12),
                ("jobs".to_string(), -1),
                ("reports".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_queues_no_lengths() {
        let poller = QueueLengthPoller::new(unreachable_sentinel(), "", 5, Vec::new());

        assert!(poller.lengths().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_master_reports_unknown() {
        let poller = QueueLengthPoller::new(
            unreachable_sentinel(),
            "secret",
            5,
            vec!["mail".to_string(), "jobs".to_string()],
        );

        assert_eq!(
            poller.lengths().await,
            vec![("mail".to_string(), -1), ("jobs".to_string(), -1)]
        );
    }

    #[tokio::test]
    #[ignore = "Requires Redis Sentinel"]
    async fn test_lengths_from_live_master() {
        let sentinel = Arc::new(Sentinel::new(
            vec![Node::new("127.0.0.1", 26379)],
            "mymaster",
            Duration::from_secs(2),
        ));
        let poller = QueueLengthPoller::new(sentinel, "", 0, vec!["rolewatch:test:queue".to_string()]);

        let lengths = poller.lengths().await;
        assert_eq!(lengths.len(), 1);
        assert!(lengths[0].1 >= 0);
    }
}
