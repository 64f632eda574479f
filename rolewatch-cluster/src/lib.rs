//! Role detection and health polling for replicated database clusters
//!
//! Nodes are probed through a backend specific [`Prober`], classified,
//! folded into a [`ClusterSnapshot`] and published through a [`MetricSink`].
//! Primary changes are remembered across restarts by a [`DurableStore`].

pub mod probe;
pub mod classify;
pub mod snapshot;
pub mod transition;
pub mod store;
pub mod emit;
pub mod cycle;
pub mod queues;
pub mod jobs;
pub mod monitor;
pub mod error;

pub use error::{Error, Result};
pub use probe::{AggregateProbe, Node, ProbeOutcome, Prober, Role, Survey};
pub use classify::{classify, NodeHealth, NodeState};
pub use snapshot::ClusterSnapshot;
pub use transition::{Transition, TransitionTracker};
pub use store::{open_store, DurableStore, FileStore, MemoryStore, RedisStore};
pub use emit::{MetricNames, MetricSink, PrometheusSink, RecordingSink};
pub use cycle::{CycleReport, PollingCycle};
pub use jobs::{build_jobs, ClusterJob, PollJob, QueueJob};
pub use queues::QueueLengthPoller;
pub use monitor::Monitor;
