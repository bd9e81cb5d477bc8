//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management
//! what: NodeState enum, RaftNode struct, election/heartbeat deadlines on a logical clock
//!
//! Every transition is a plain method call that mutates the node and returns
//! the messages it wants sent. Time only moves through [`RaftNode::tick`], so
//! a test can replay an election exactly by feeding the same clock values.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RaftConfig;
use crate::error::ConsensusError;
use crate::log::{verify_entries, LogEntry, ReplicationLog};
use crate::message::{Envelope, RaftMessage};
use crate::rule::{RuleId, RuleVersion};
use crate::NodeId;

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

/// Point-in-time view of a node, safe to hand to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub leader_id: Option<NodeId>,
    pub commit_index: u64,
    pub last_log_index: u64,
}

/// Result of feeding one message into the node.
#[derive(Debug, Default)]
pub struct Step {
    /// Reply to the sender, present for requests
    pub reply: Option<RaftMessage>,
    /// Further messages the node wants sent
    pub outbound: Vec<Envelope>,
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Every voting member, including this node
    pub cluster_nodes: Vec<NodeId>,
    pub config: RaftConfig,
    /// Current state (Follower, Candidate, or Leader)
    pub state: NodeState,
    /// Current term number
    pub current_term: u64,
    /// Node ID that received our vote in current term (if any)
    pub voted_for: Option<NodeId>,
    /// Leader this node currently believes in
    pub leader_id: Option<NodeId>,
    pub log: ReplicationLog,
    /// Highest index known to be replicated on a majority
    pub commit_index: u64,
    /// Highest index handed out by `get_entries_to_apply`
    pub last_applied: u64,
    /// Votes collected while Candidate
    pub votes_received: Vec<NodeId>,
    /// Leader only: next index to send to each peer
    pub next_index: BTreeMap<NodeId, u64>,
    /// Leader only: highest index known replicated on each peer
    pub match_index: BTreeMap<NodeId, u64>,
    /// Heartbeat rounds broadcast since this node was created
    pub replication_rounds: u64,
    now: u64,
    election_deadline: u64,
    heartbeat_deadline: u64,
    rng: StdRng,
}

impl RaftNode {
    /// Create a new Raft node in Follower state
    pub fn new(id: NodeId, cluster_nodes: Vec<NodeId>) -> Self {
        Self::with_config(id, cluster_nodes, RaftConfig::default())
    }

    pub fn with_config(id: NodeId, mut cluster_nodes: Vec<NodeId>, config: RaftConfig) -> Self {
        if !cluster_nodes.contains(&id) {
            cluster_nodes.push(id);
        }
        cluster_nodes.sort_unstable();
        cluster_nodes.dedup();

        let rng = StdRng::seed_from_u64(config.rng_seed.unwrap_or(id));
        let mut node = Self {
            id,
            cluster_nodes,
            config,
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: ReplicationLog::new(),
            commit_index: 0,
            last_applied: 0,
            votes_received: Vec::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            replication_rounds: 0,
            now: 0,
            election_deadline: 0,
            heartbeat_deadline: 0,
            rng,
        };
        node.reset_election_timer();
        node
    }

    // -- cluster membership --

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cluster_nodes.iter().copied().filter(move |&n| n != self.id)
    }

    /// Strict majority of the cluster
    pub fn quorum_size(&self) -> usize {
        self.cluster_nodes.len() / 2 + 1
    }

    pub fn has_quorum(&self) -> bool {
        self.votes_received.len() >= self.quorum_size()
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    // -- timers --

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn election_deadline(&self) -> u64 {
        self.election_deadline
    }

    fn reset_election_timer(&mut self) {
        let timeout = self
            .rng
            .gen_range(self.config.election_timeout_min..=self.config.election_timeout_max);
        self.election_deadline = self.now + timeout;
    }

    /// Advance the logical clock and fire whichever timer is due.
    pub fn tick(&mut self, now: u64) -> Vec<Envelope> {
        self.now = self.now.max(now);

        if self.is_leader() {
            if self.now < self.heartbeat_deadline {
                return Vec::new();
            }
            self.replication_rounds += 1;
            return self.broadcast_append_entries();
        }

        if self.now < self.election_deadline {
            return Vec::new();
        }

        let request = self.start_election();
        if self.has_quorum() {
            // single-node cluster: own vote is a majority
            self.become_leader();
            return self.broadcast_append_entries();
        }
        self.peers()
            .map(|to| Envelope {
                from: self.id,
                to,
                message: request.clone(),
            })
            .collect()
    }

    // -- elections --

    /// Become Candidate for the next term and build the vote request.
    pub fn start_election(&mut self) -> RaftMessage {
        self.state = NodeState::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received = vec![self.id];
        self.reset_election_timer();

        info!(node_id = self.id, term = self.current_term, "starting election");

        RaftMessage::RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        }
    }

    /// Decide on a vote request. Returns the response and whether the
    /// election timer was reset.
    pub fn handle_vote_request(
        &mut self,
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    ) -> (RaftMessage, bool) {
        if term > self.current_term {
            // timer only moves if the vote is granted below
            self.adopt_term(term);
        }

        let our_term = self.last_log_term();
        let log_ok = last_log_term > our_term
            || (last_log_term == our_term && last_log_index >= self.last_log_index());
        let can_vote = self.voted_for.map_or(true, |v| v == candidate_id);
        let granted = term == self.current_term && log_ok && can_vote;

        if granted {
            self.voted_for = Some(candidate_id);
            self.reset_election_timer();
        }
        debug!(
            node_id = self.id,
            term = self.current_term,
            candidate_id,
            granted,
            "vote request"
        );

        let response = RaftMessage::VoteResponse {
            term: self.current_term,
            vote_granted: granted,
        };
        (response, granted)
    }

    /// Count a vote. Returns true when this vote made the node Leader.
    pub fn handle_vote_response(&mut self, term: u64, vote_granted: bool, from: NodeId) -> bool {
        if term > self.current_term {
            self.become_follower(term);
            return false;
        }
        if self.state != NodeState::Candidate || term < self.current_term {
            return false;
        }
        if vote_granted && self.cluster_nodes.contains(&from) && !self.votes_received.contains(&from) {
            self.votes_received.push(from);
        }
        if self.has_quorum() {
            self.become_leader();
            return true;
        }
        false
    }

    /// Step down. A higher term also forgets the vote and the leader.
    pub fn become_follower(&mut self, term: u64) {
        self.adopt_term(term);
        self.reset_election_timer();
    }

    /// Follower at `term` or later, leaving the election timer alone unless
    /// this node was leading, since a leader never armed one.
    fn adopt_term(&mut self, term: u64) {
        let was_leader = self.is_leader();
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        if self.state != NodeState::Follower {
            info!(node_id = self.id, term = self.current_term, from = ?self.state, "stepping down to follower");
        }
        self.state = NodeState::Follower;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
        if was_leader {
            self.reset_election_timer();
        }
    }

    fn become_leader(&mut self) {
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let next = self.last_log_index() + 1;
        let peers: Vec<NodeId> = self.peers().collect();
        self.next_index = peers.iter().map(|&p| (p, next)).collect();
        self.match_index = peers.iter().map(|&p| (p, 0)).collect();
        self.heartbeat_deadline = self.now;

        info!(node_id = self.id, term = self.current_term, "became leader");
    }

    // -- replication, leader side --

    /// Append a new rule version at the current term. Only the leader may do this.
    pub fn append_entry(&mut self, payload: impl Into<String>) -> Result<LogEntry, ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader {
                known_leader: self.leader_id,
            });
        }

        let version = self.log.last_rule_version() + 1;
        let entry = LogEntry::new(
            self.current_term,
            self.last_log_index() + 1,
            RuleVersion::new(version, payload),
        );
        self.log.push(entry.clone());
        debug!(node_id = self.id, index = entry.index, version, "appended rule");

        self.advance_commit_index();
        Ok(entry)
    }

    /// AppendEntries for one peer, carrying whatever it is missing.
    pub fn create_append_entries(&self, peer: NodeId) -> Option<RaftMessage> {
        if !self.is_leader() {
            return None;
        }
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(self.last_log_index() + 1)
            .max(1);
        let prev_log_index = next - 1;

        Some(RaftMessage::AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term: self.log.term_at(prev_log_index),
            entries: self.log.entries_from(next, self.config.max_entries_per_append),
            leader_commit: self.commit_index,
        })
    }

    /// Send every peer its pending entries, or an empty heartbeat.
    pub fn broadcast_append_entries(&mut self) -> Vec<Envelope> {
        if !self.is_leader() {
            return Vec::new();
        }
        self.heartbeat_deadline = self.now + self.config.heartbeat_interval;

        let peers: Vec<NodeId> = self.peers().collect();
        peers
            .into_iter()
            .filter_map(|to| {
                self.create_append_entries(to).map(|message| Envelope {
                    from: self.id,
                    to,
                    message,
                })
            })
            .collect()
    }

    /// Record a follower's answer. Returns true when the commit index moved.
    pub fn handle_append_entries_response(
        &mut self,
        term: u64,
        success: bool,
        from: NodeId,
        match_index: u64,
    ) -> bool {
        if term > self.current_term {
            self.become_follower(term);
            return false;
        }
        if !self.is_leader() || term < self.current_term {
            return false;
        }

        let last = self.last_log_index();
        if success {
            let matched = self.match_index.entry(from).or_insert(0);
            *matched = (*matched).max(match_index.min(last));
            let next = *matched + 1;
            self.next_index.insert(from, next);
            self.advance_commit_index()
        } else {
            let next = self.next_index.entry(from).or_insert(last + 1);
            *next = next.saturating_sub(1).max(1);
            false
        }
    }

    /// Commit the highest current-term index held by a majority.
    fn advance_commit_index(&mut self) -> bool {
        let quorum = self.quorum_size();
        for n in (self.commit_index + 1..=self.last_log_index()).rev() {
            if self.log.term_at(n) != self.current_term {
                // earlier entries commit indirectly once a current-term entry does
                break;
            }
            let replicas = 1 + self.match_index.values().filter(|&&m| m >= n).count();
            if replicas >= quorum {
                info!(node_id = self.id, term = self.current_term, commit_index = n, "commit index advanced");
                self.commit_index = n;
                return true;
            }
        }
        false
    }

    // -- replication, follower side --

    /// Apply an AppendEntries request. Returns the response and whether the
    /// election timer was reset.
    pub fn handle_append_entries(
        &mut self,
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> (RaftMessage, bool) {
        if term < self.current_term {
            debug!(node_id = self.id, term, current = self.current_term, "rejecting stale append");
            return (self.append_response(false, 0), false);
        }

        self.become_follower(term);
        self.leader_id = Some(leader_id);

        if !self.log.matches(prev_log_index, prev_log_term) {
            debug!(node_id = self.id, prev_log_index, prev_log_term, "log mismatch, leader must back up");
            return (self.append_response(false, 0), true);
        }
        if let Err(err) = verify_entries(&entries) {
            error!(node_id = self.id, leader_id, error = %err, "rejecting corrupted entries");
            return (self.append_response(false, 0), true);
        }

        let mut last_new = prev_log_index;
        for (offset, entry) in entries.into_iter().enumerate() {
            let expected = prev_log_index + 1 + offset as u64;
            if entry.index != expected {
                warn!(node_id = self.id, index = entry.index, expected, "out of sequence entry");
                return (self.append_response(false, 0), true);
            }

            match self.log.get(entry.index).map(|e| e.term) {
                Some(existing) if existing == entry.term => {}
                Some(_) => {
                    if entry.index <= self.commit_index {
                        error!(node_id = self.id, index = entry.index, "conflict below commit index");
                        return (self.append_response(false, 0), true);
                    }
                    debug!(node_id = self.id, from_index = entry.index, "truncating conflicting suffix");
                    self.log.truncate_from(entry.index);
                    self.log.push(entry);
                }
                None => self.log.push(entry),
            }
            last_new = expected;
        }

        if leader_commit > self.commit_index {
            self.commit_index = self.commit_index.max(leader_commit.min(last_new));
        }
        (self.append_response(true, last_new), true)
    }

    fn append_response(&self, success: bool, match_index: u64) -> RaftMessage {
        RaftMessage::AppendEntriesResponse {
            term: self.current_term,
            success,
            match_index,
        }
    }

    // -- dispatch --

    /// Feed any message from `from` into the node.
    pub fn step(&mut self, from: NodeId, message: RaftMessage) -> Step {
        match message {
            RaftMessage::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                let (reply, _) =
                    self.handle_vote_request(term, candidate_id, last_log_index, last_log_term);
                Step {
                    reply: Some(reply),
                    outbound: Vec::new(),
                }
            }
            RaftMessage::AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => {
                let (reply, _) = self.handle_append_entries(
                    term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit,
                );
                Step {
                    reply: Some(reply),
                    outbound: Vec::new(),
                }
            }
            RaftMessage::VoteResponse { term, vote_granted } => {
                let outbound = if self.handle_vote_response(term, vote_granted, from) {
                    self.broadcast_append_entries()
                } else {
                    Vec::new()
                };
                Step {
                    reply: None,
                    outbound,
                }
            }
            RaftMessage::AppendEntriesResponse {
                term,
                success,
                match_index,
            } => {
                self.handle_append_entries_response(term, success, from, match_index);
                // retry a rejected follower straight away at the lower index
                let outbound = if !success && self.is_leader() && term == self.current_term {
                    self.create_append_entries(from)
                        .map(|message| Envelope {
                            from: self.id,
                            to: from,
                            message,
                        })
                        .into_iter()
                        .collect()
                } else {
                    Vec::new()
                };
                Step {
                    reply: None,
                    outbound,
                }
            }
        }
    }

    // -- log helpers --

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last_term()
    }

    pub fn get_entry(&self, index: u64) -> Option<&LogEntry> {
        self.log.get(index)
    }

    pub fn get_term_at(&self, index: u64) -> u64 {
        self.log.term_at(index)
    }

    /// Committed entries not yet handed out, advancing `last_applied`.
    pub fn get_entries_to_apply(&mut self) -> Vec<LogEntry> {
        if self.last_applied >= self.commit_index {
            return Vec::new();
        }
        let count = (self.commit_index - self.last_applied) as usize;
        let entries = self.log.entries_from(self.last_applied + 1, count);
        self.last_applied = self.commit_index;
        entries
    }

    // -- committed rule --

    /// Rule at the commit index, or the empty sentinel.
    pub fn current_rule(&self) -> RuleVersion {
        self.log
            .get(self.commit_index)
            .map(|e| e.rule.clone())
            .unwrap_or_default()
    }

    /// Whether `id` names the committed rule.
    pub fn is_latest(&self, id: &RuleId) -> bool {
        match self.log.get(self.commit_index) {
            Some(entry) => entry.rule.version() == id.version && entry.rule.checksum() == id.checksum,
            None => id.version == 0,
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            state: self.state,
            term: self.current_term,
            leader_id: self.leader_id,
            commit_index: self.commit_index,
            last_log_index: self.last_log_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_as_follower() {
        let node = RaftNode::new(1, vec![1, 2, 3]);
        assert_eq!(node.state, NodeState::Follower);
        assert_eq!(node.current_term, 0);
        assert_eq!(node.voted_for, None);
        assert!(node.current_rule().is_empty());
    }

    #[test]
    fn self_is_added_to_membership() {
        let node = RaftNode::new(4, vec![1, 2, 3]);
        assert_eq!(node.cluster_nodes, vec![1, 2, 3, 4]);
        assert_eq!(node.peers().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn election_deadline_within_configured_range() {
        let node = RaftNode::new(1, vec![1, 2, 3]);
        let deadline = node.election_deadline();
        assert!((150..=300).contains(&deadline));
    }

    #[test]
    fn same_seed_replays_same_deadline() {
        let a = RaftNode::new(7, vec![7, 8]);
        let b = RaftNode::new(7, vec![7, 8]);
        assert_eq!(a.election_deadline(), b.election_deadline());
    }

    #[test]
    fn tick_before_deadline_is_quiet() {
        let mut node = RaftNode::new(1, vec![1, 2, 3]);
        assert!(node.tick(10).is_empty());
        assert_eq!(node.state, NodeState::Follower);
    }

    #[test]
    fn tick_past_deadline_solicits_votes_from_peers() {
        let mut node = RaftNode::new(1, vec![1, 2, 3]);
        let out = node.tick(1_000);
        assert_eq!(node.state, NodeState::Candidate);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| matches!(e.message, RaftMessage::RequestVote { term: 1, .. })));
    }
}
