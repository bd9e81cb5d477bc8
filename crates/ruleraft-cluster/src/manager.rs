//! # manager
//!
//! why: run one RaftNode on tokio without ever blocking it on the network
//! relations: owns ruleraft-core's RaftNode, talks to peers through transport.rs, records into ruleraft-history
//! what: ConsensusManager builder, ConsensusHandle, the serialized event loop
//!
//! A single task owns the node and handles one event at a time: timer
//! ticks, inbound rpcs, rpc replies and proposals. Outbound rpcs run on
//! their own tasks and come back as events, so the loop only ever waits on
//! its queue. Readers get the committed rule and node status from `watch`
//! channels and never touch the loop. History writes go to a blocking
//! writer thread.
//!
//! The loop, its ticker and its rpc tasks hold only weak senders, so the
//! loop stops once every `ConsensusHandle` is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use ruleraft_core::{
    ConsensusError, Envelope, NodeId, NodeState, NodeStatus, RaftMessage, RaftNode, RuleId,
    RuleVersion,
};
use ruleraft_history::HistoryStore;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::config::NodeConfig;
use crate::error::ClusterError;
use crate::transport::Transport;

const EVENT_QUEUE: usize = 1024;

type ProposeReply = oneshot::Sender<Result<RuleVersion, ConsensusError>>;
type DeliverReply = oneshot::Sender<Option<RaftMessage>>;

enum Event {
    Tick,
    Inbound {
        from: NodeId,
        message: RaftMessage,
        reply: DeliverReply,
    },
    Response {
        from: NodeId,
        message: RaftMessage,
    },
    Propose {
        payload: String,
        reply: ProposeReply,
    },
    Shutdown,
}

/// A proposal waiting for its entry to commit. It outlives a step-down:
/// the entry may still commit under the next leader.
struct Pending {
    term: u64,
    /// `replication_rounds` value at which the proposal gives up
    give_up_at: u64,
    reply: ProposeReply,
}

/// Builder for a node's consensus runtime.
pub struct ConsensusManager {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    history: Option<Box<dyn HistoryStore>>,
    history_set: bool,
}

impl ConsensusManager {
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            clock: Arc::new(MonotonicClock::new()),
            history: None,
            history_set: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record commits into `store` instead of whatever `config.history` names.
    pub fn with_history(mut self, store: Box<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self.history_set = true;
        self
    }

    /// Start the event loop and its ticker. Must be called inside a tokio runtime.
    pub fn spawn(self) -> Result<ConsensusHandle, ClusterError> {
        self.config.validate()?;
        let history = if self.history_set {
            self.history
        } else {
            self.config.history.open()?
        };

        let node = RaftNode::with_config(
            self.config.node_id,
            self.config.cluster_nodes(),
            self.config.raft.clone(),
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (rule_tx, rule_rx) = watch::channel(Arc::new(RuleVersion::empty()));
        let (status_tx, status_rx) = watch::channel(node.status());

        info!(
            node_id = self.config.node_id,
            cluster = ?node.cluster_nodes,
            "starting consensus manager"
        );

        let ticker = tokio::spawn(run_ticker(events_tx.downgrade(), self.config.tick_interval()));
        let history = history.map(|store| HistoryWriter::spawn(self.config.node_id, store));
        let event_loop = EventLoop {
            node,
            clock: self.clock,
            transport: self.transport,
            events: events_tx.downgrade(),
            rule_tx,
            status_tx,
            pending: BTreeMap::new(),
            history,
        };
        let task = tokio::spawn(event_loop.run(events_rx, ticker));

        Ok(ConsensusHandle {
            id: self.config.node_id,
            events: events_tx,
            rule: rule_rx,
            status: status_rx,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        })
    }
}

async fn run_ticker(events: mpsc::WeakSender<Event>, period: std::time::Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(events) = events.upgrade() else {
            break;
        };
        if events.send(Event::Tick).await.is_err() {
            break;
        }
    }
}

/// Records committed rules on a blocking thread, in commit order.
struct HistoryWriter {
    rules: mpsc::UnboundedSender<RuleVersion>,
    task: JoinHandle<()>,
}

impl HistoryWriter {
    fn spawn(node_id: NodeId, mut store: Box<dyn HistoryStore>) -> Self {
        let (rules, mut queue) = mpsc::unbounded_channel::<RuleVersion>();
        let task = tokio::task::spawn_blocking(move || {
            while let Some(rule) = queue.blocking_recv() {
                if let Err(err) = store.record(&rule) {
                    warn!(node_id, version = rule.version(), error = %err, "failed to record rule history");
                }
            }
        });
        Self { rules, task }
    }

    fn record(&self, rule: RuleVersion) {
        let _ = self.rules.send(rule);
    }

    /// Wait for queued rules to be written.
    async fn finish(self) {
        drop(self.rules);
        let _ = self.task.await;
    }
}

/// Cheap, cloneable access to a running node.
#[derive(Clone)]
pub struct ConsensusHandle {
    id: NodeId,
    events: mpsc::Sender<Event>,
    rule: watch::Receiver<Arc<RuleVersion>>,
    status: watch::Receiver<NodeStatus>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl ConsensusHandle {
    pub fn node_id(&self) -> NodeId {
        self.id
    }

    /// Propose a new rule payload. Resolves once the entry commits.
    ///
    /// Fails with `NotLeader` on a non-leader, or when a newer leader
    /// overwrote the entry, and `QuorumUnavailable` when a majority does not
    /// acknowledge within the retry budget. A leader that steps down keeps
    /// waiting: the entry resolves once it commits or is overwritten.
    pub async fn propose(&self, payload: impl Into<String>) -> Result<RuleVersion, ConsensusError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Propose {
                payload: payload.into(),
                reply,
            })
            .await
            .map_err(|_| ConsensusError::Shutdown)?;
        rx.await.map_err(|_| ConsensusError::Shutdown)?
    }

    /// Hand an rpc from `from` to this node. Requests get `Some(reply)`.
    pub async fn deliver(
        &self,
        from: NodeId,
        message: RaftMessage,
    ) -> Result<Option<RaftMessage>, ConsensusError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Inbound {
                from,
                message,
                reply,
            })
            .await
            .map_err(|_| ConsensusError::Shutdown)?;
        rx.await.map_err(|_| ConsensusError::Shutdown)
    }

    /// Committed rule, or the empty sentinel before the first commit.
    pub fn current_rule(&self) -> RuleVersion {
        (**self.rule.borrow()).clone()
    }

    pub fn is_latest(&self, id: &RuleId) -> bool {
        self.rule.borrow().id() == *id
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> NodeState {
        self.status.borrow().state
    }

    pub fn subscribe_rule(&self) -> watch::Receiver<Arc<RuleVersion>> {
        self.rule.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Stop the loop and its ticker. Pending proposals fail with `Shutdown`.
    pub async fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct EventLoop {
    node: RaftNode,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    events: mpsc::WeakSender<Event>,
    rule_tx: watch::Sender<Arc<RuleVersion>>,
    status_tx: watch::Sender<NodeStatus>,
    /// Keyed by log index
    pending: BTreeMap<u64, Pending>,
    history: Option<HistoryWriter>,
}

impl EventLoop {
    async fn run(mut self, mut events: mpsc::Receiver<Event>, ticker: JoinHandle<()>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Tick => {
                    let outbound = self.node.tick(self.clock.now_ms());
                    self.dispatch(outbound);
                }
                Event::Inbound {
                    from,
                    message,
                    reply,
                } => {
                    let step = self.node.step(from, message);
                    let _ = reply.send(step.reply);
                    self.dispatch(step.outbound);
                }
                Event::Response { from, message } => {
                    let step = self.node.step(from, message);
                    self.dispatch(step.outbound);
                }
                Event::Propose { payload, reply } => self.propose(payload, reply),
                Event::Shutdown => break,
            }
            self.settle();
        }

        ticker.abort();
        for (_, pending) in std::mem::take(&mut self.pending) {
            let _ = pending.reply.send(Err(ConsensusError::Shutdown));
        }
        if let Some(history) = self.history.take() {
            history.finish().await;
        }
        info!(node_id = self.node.id, "consensus manager stopped");
    }

    fn propose(&mut self, payload: String, reply: ProposeReply) {
        match self.node.append_entry(payload) {
            Ok(entry) => {
                let give_up_at =
                    self.node.replication_rounds + self.node.config.replication_retry_budget;
                self.pending.insert(
                    entry.index,
                    Pending {
                        term: entry.term,
                        give_up_at,
                        reply,
                    },
                );
                let outbound = self.node.broadcast_append_entries();
                self.dispatch(outbound);
            }
            Err(err) => {
                debug!(node_id = self.node.id, error = %err, "proposal rejected");
                let _ = reply.send(Err(err));
            }
        }
    }

    fn dispatch(&self, outbound: Vec<Envelope>) {
        for Envelope { from, to, message } in outbound {
            let transport = Arc::clone(&self.transport);
            let events = self.events.clone();
            tokio::spawn(async move {
                match transport.send(from, to, message).await {
                    Ok(reply) => {
                        if let Some(events) = events.upgrade() {
                            let _ = events.send(Event::Response { from: to, message: reply }).await;
                        }
                    }
                    Err(err) => debug!(node_id = from, peer = to, error = %err, "rpc failed"),
                }
            });
        }
    }

    /// Publish commits and resolve proposals after every event.
    fn settle(&mut self) {
        let applied = self.node.get_entries_to_apply();
        if !applied.is_empty() {
            if let Some(history) = &self.history {
                for entry in &applied {
                    history.record(entry.rule.clone());
                }
            }
            let rule = self.node.current_rule();
            debug!(node_id = self.node.id, version = rule.version(), "published committed rule");
            self.rule_tx.send_replace(Arc::new(rule));
        }

        self.resolve_pending();

        let status = self.node.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn resolve_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let commit_index = self.node.commit_index;
        let current_term = self.node.current_term;
        let leading = self.node.is_leader();
        let rounds = self.node.replication_rounds;

        let indexes: Vec<u64> = self.pending.keys().copied().collect();
        for index in indexes {
            let outcome = {
                let pending = &self.pending[&index];
                match self.node.get_entry(index) {
                    Some(entry) if entry.term == pending.term => {
                        if index <= commit_index {
                            Some(Ok(entry.rule.clone()))
                        } else if leading && current_term == pending.term && rounds >= pending.give_up_at {
                            warn!(node_id = self.node.id, index, term = current_term, "quorum unavailable, giving up on proposal");
                            Some(Err(ConsensusError::QuorumUnavailable {
                                index,
                                attempts: self.node.config.replication_retry_budget,
                            }))
                        } else {
                            None
                        }
                    }
                    _ => {
                        debug!(node_id = self.node.id, index, term = pending.term, "proposed entry overwritten by a newer leader");
                        Some(Err(ConsensusError::NotLeader {
                            known_leader: self.node.leader_id,
                        }))
                    }
                }
            };

            if let Some(result) = outcome {
                if let Some(pending) = self.pending.remove(&index) {
                    let _ = pending.reply.send(result);
                }
            }
        }
    }
}
