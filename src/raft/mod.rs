//! Replication Engine: election, log replication, commit advancement,
//! persistence, and the command-dispatch boundary to the application
//! state machine (spec.md 4.1-4.3).

pub mod client;
pub mod errors;
pub mod rpc;
pub mod state;

use crate::{store, LogEntry, NodeId, RaftMessage, RaftPersistentState};
use errors::RaftError;
use log::{debug, error, info};
use rand::Rng;
use state::{LeaderState, RaftState, Role};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::sleep;

/// A pure, deterministic application state machine: `apply` consumes one
/// committed command envelope and returns the encoded response. Every
/// replica must produce byte-identical output for the same command.
pub trait StateMachine: Send + Sync {
    fn apply(&self, command: &[u8]) -> Vec<u8>;

    /// Lets the state machine stamp leader-assigned, deterministic
    /// metadata (e.g. an `issued_at` timestamp) into a command before it
    /// is appended to the log, so every replica observes the same value
    /// on replay instead of reading its own clock. Default: no-op.
    fn stamp(&self, command: Vec<u8>, _issued_at_unix_secs: i64) -> Vec<u8> {
        command
    }
}

#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Logical cluster identity (spec.md 3): used as the RequestVote
    /// `candidateId` / `votedFor` value and as the persisted-state file
    /// name. Never dialed over the network -- see `self_addr` for that.
    pub server_id: NodeId,
    /// This node's own dialable address, exactly as its peers name it in
    /// their `peers` lists. Reported as `leaderId` in AppendEntries and
    /// ClientResponse redirects, since that is the only thing a Client
    /// Router (spec.md 4.4) can actually reconnect to.
    pub self_addr: NodeId,
    /// All peer addresses, excluding self.
    pub peers: Vec<NodeId>,
    pub election_timeout_min: u64, // ms
    pub election_timeout_max: u64, // ms
    pub heartbeat_interval: u64,   // ms
    pub append_entries_timeout_ms: u64,
    pub client_commit_timeout_ms: u64,
    /// Directory the persistent state file lives in.
    pub base_dir: PathBuf,
}

impl RaftConfig {
    pub fn state_file_path(&self) -> PathBuf {
        store::state_file_path(&self.base_dir, &self.server_id)
    }
}

const APPLIED_CACHE_CAPACITY: usize = 256;
const MAX_ENTRIES_PER_RPC: usize = 64;

pub struct RaftNode {
    pub config: RaftConfig,
    state: Mutex<RaftState>,
    /// Signalled whenever commit_index or last_applied advances.
    progress: Notify,
    state_machine: Arc<dyn StateMachine>,
    /// Bounded cache of applied results, keyed by log index, so a
    /// ClientRequest caller can observe both "committed" and the
    /// handler's own result for the entry it proposed.
    applied_cache: Mutex<VecDeque<(u64, Vec<u8>)>>,
    is_leader_tx: watch::Sender<bool>,
}

impl RaftNode {
    pub fn new(config: RaftConfig, state_machine: Arc<dyn StateMachine>) -> Arc<Self> {
        let mut state = RaftState::new();
        if let Some(persisted) = store::load(&config.state_file_path()) {
            apply_persisted(&mut state, persisted);
            info!(
                "[{}] loaded persisted state: term={} voted_for={:?} log_len={} commit_index={}",
                config.server_id, state.current_term, state.voted_for, state.log.len(), state.commit_index
            );
        }

        let (is_leader_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            progress: Notify::new(),
            state_machine,
            applied_cache: Mutex::new(VecDeque::with_capacity(APPLIED_CACHE_CAPACITY)),
            is_leader_tx,
        })
    }

    /// Subscribe to this node's leadership transitions (used to gate the
    /// leader-only LLM dispatcher, spec.md 4.3).
    pub fn leadership_watch(&self) -> watch::Receiver<bool> {
        self.is_leader_tx.subscribe()
    }

    async fn persist_to_disk(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            RaftPersistentState {
                current_term: state.current_term,
                voted_for: state.voted_for.clone(),
                log: state.log.clone(),
                commit_index: state.commit_index,
                last_applied: state.last_applied,
            }
        };
        if let Err(e) = store::persist(&self.config.state_file_path(), &snapshot).await {
            error!("[{}] FATAL: failed to persist state: {}", self.config.server_id, e);
            // InternalError on persistence must halt the node (spec.md 7).
            std::process::exit(1);
        }
    }

    /// Start the election timer, heartbeat sender, and apply loop.
    pub async fn start(self: &Arc<Self>) {
        let election = Arc::clone(self);
        tokio::spawn(async move { election.run_election_timer().await });

        let heartbeat = Arc::clone(self);
        tokio::spawn(async move { heartbeat.run_heartbeat_sender().await });

        let apply = Arc::clone(self);
        tokio::spawn(async move { apply.run_apply_loop().await });
    }

    fn random_election_timeout(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let ms = rng.gen_range(self.config.election_timeout_min..=self.config.election_timeout_max);
        Duration::from_millis(ms)
    }

    async fn run_election_timer(self: Arc<Self>) {
        loop {
            let timeout = self.random_election_timeout();
            sleep(timeout).await;

            let should_start = {
                let state = self.state.lock().await;
                !state.role.is_leader() && state.last_heartbeat.elapsed() >= timeout
            };
            if should_start {
                self.start_election().await;
            }
        }
    }

    async fn run_heartbeat_sender(self: Arc<Self>) {
        loop {
            sleep(Duration::from_millis(self.config.heartbeat_interval)).await;
            let (is_leader, term, leader_commit) = {
                let state = self.state.lock().await;
                (state.role.is_leader(), state.current_term, state.commit_index)
            };
            if is_leader {
                self.send_append_entries(term, leader_commit).await;
            }
        }
    }

    /// Candidate role: increment term, vote for self, request votes from
    /// every peer in parallel (spec.md 4.1).
    pub async fn start_election(self: &Arc<Self>) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().await;
            state.current_term += 1;
            state.voted_for = Some(self.config.server_id.clone());
            let mut votes = HashSet::new();
            votes.insert(self.config.server_id.clone());
            state.role = Role::Candidate { votes_received: votes };
            state.last_heartbeat = Instant::now();
            info!("[{}] starting election for term {}", self.config.server_id, state.current_term);
            (state.current_term, state.last_log_index(), state.last_log_term())
        };
        self.persist_to_disk().await;

        let cluster_size = self.config.peers.len() + 1;
        let majority = cluster_size / 2 + 1;
        if 1 >= majority {
            // Single-node cluster: we already have our own vote.
            self.become_leader().await;
            return;
        }

        let mut handles = Vec::new();
        for peer in self.config.peers.clone() {
            let req = RaftMessage::RequestVote {
                term,
                candidate_id: self.config.server_id.clone(),
                last_log_index,
                last_log_term,
            };
            let timeout = Duration::from_millis(rand::thread_rng().gen_range(800..=2500));
            handles.push(tokio::spawn(async move {
                rpc::call::<RaftMessage, RaftMessage>(&peer, &req, timeout).await
            }));
        }

        let mut granted = 1usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(RaftMessage::RequestVoteResponse { term: resp_term, vote_granted, .. })) => {
                    if resp_term > term {
                        self.step_down(resp_term).await;
                        return;
                    }
                    if vote_granted {
                        granted += 1;
                    }
                }
                Ok(Ok(_)) => debug!("[{}] unexpected RequestVote reply shape", self.config.server_id),
                Ok(Err(e)) => debug!("[{}] RequestVote failed: {}", self.config.server_id, e),
                Err(e) => debug!("[{}] RequestVote task join error: {}", self.config.server_id, e),
            }
        }

        let still_candidate = {
            let state = self.state.lock().await;
            matches!(state.role, Role::Candidate { .. }) && state.current_term == term
        };
        if !still_candidate {
            return;
        }
        if granted >= majority {
            self.become_leader().await;
        } else {
            info!("[{}] election for term {} failed ({}/{} votes)", self.config.server_id, term, granted, majority);
        }
    }

    async fn step_down(&self, new_term: u64) {
        let mut state = self.state.lock().await;
        if new_term > state.current_term || !matches!(state.role, Role::Follower) {
            state.current_term = new_term.max(state.current_term);
            state.voted_for = None;
            state.role = Role::Follower;
            drop(state);
            let _ = self.is_leader_tx.send(false);
            self.persist_to_disk().await;
        }
    }

    async fn become_leader(self: &Arc<Self>) {
        let (term, leader_commit) = {
            let mut state = self.state.lock().await;
            if !matches!(state.role, Role::Candidate { .. }) {
                return;
            }
            let last_index = state.last_log_index();
            let mut leader_state = LeaderState::default();
            for peer in &self.config.peers {
                leader_state.next_index.insert(peer.clone(), last_index + 1);
                leader_state.match_index.insert(peer.clone(), 0);
            }
            leader_state
                .match_index
                .insert(self.config.self_addr.clone(), last_index);
            state.role = Role::Leader(leader_state);
            state.leader_id = Some(self.config.self_addr.clone());
            info!("[{}] became leader for term {}", self.config.server_id, state.current_term);
            (state.current_term, state.commit_index)
        };
        let _ = self.is_leader_tx.send(true);
        self.persist_to_disk().await;
        self.send_append_entries(term, leader_commit).await;
    }

    /// Fan out AppendEntries to every peer (empty `entries` is a
    /// heartbeat). Snapshots under the lock, sends without holding it,
    /// then reacquires to apply each reply (spec.md 5).
    async fn send_append_entries(self: &Arc<Self>, term: u64, leader_commit: u64) {
        let leader_id = self.config.self_addr.clone();

        struct Outbound {
            peer: NodeId,
            msg: RaftMessage,
            prev_log_index: u64,
            entries_len: usize,
        }

        let mut outbound = Vec::new();
        {
            let state = self.state.lock().await;
            let last_index = state.last_log_index();
            for peer in &self.config.peers {
                let next_index = state.next_index_or(peer, last_index + 1).unwrap_or(last_index + 1);
                let prev_log_index = next_index.saturating_sub(1);
                let prev_log_term = state.term_at(prev_log_index);
                let entries: Vec<LogEntry> = if next_index <= last_index {
                    let start = (next_index - 1) as usize;
                    let end = std::cmp::min(start + MAX_ENTRIES_PER_RPC, state.log.len());
                    state.log[start..end].to_vec()
                } else {
                    Vec::new()
                };
                let entries_len = entries.len();
                outbound.push(Outbound {
                    peer: peer.clone(),
                    msg: RaftMessage::AppendEntries {
                        term,
                        leader_id: leader_id.clone(),
                        prev_log_index,
                        prev_log_term,
                        entries,
                        leader_commit,
                    },
                    prev_log_index,
                    entries_len,
                });
            }
        }

        let timeout = Duration::from_millis(self.config.append_entries_timeout_ms);
        let mut handles = Vec::new();
        for ob in outbound {
            handles.push(tokio::spawn(async move {
                let resp = rpc::call::<RaftMessage, RaftMessage>(&ob.peer, &ob.msg, timeout).await;
                (ob.peer, ob.prev_log_index, ob.entries_len, resp)
            }));
        }

        for handle in handles {
            let (peer, prev_idx, entries_len, resp) = match handle.await {
                Ok(v) => v,
                Err(e) => {
                    debug!("[{}] AppendEntries task join error: {}", self.config.server_id, e);
                    continue;
                }
            };
            match resp {
                Ok(RaftMessage::AppendEntriesResponse { term: resp_term, success, last_log_index, .. }) => {
                    if resp_term > term {
                        self.step_down(resp_term).await;
                        return;
                    }
                    self.on_append_entries_reply(&peer, success, prev_idx, entries_len, last_log_index, term)
                        .await;
                }
                Ok(_) => debug!("[{}] unexpected AppendEntries reply shape", self.config.server_id),
                Err(e) => debug!("[{}] AppendEntries to {} failed: {}", self.config.server_id, peer, e),
            }
        }
    }

    async fn on_append_entries_reply(
        &self,
        peer: &str,
        success: bool,
        prev_idx: u64,
        entries_len: usize,
        follower_last_index: u64,
        term: u64,
    ) {
        let mut state = self.state.lock().await;
        if state.current_term != term || !state.role.is_leader() {
            return;
        }
        let cluster_size = self.config.peers.len() + 1;
        let majority = cluster_size / 2 + 1;
        let self_id = self.config.self_addr.clone();

        if success {
            let new_match = std::cmp::max(prev_idx + entries_len as u64, follower_last_index);
            if let Some(ls) = state.leader_state_mut() {
                let cur_match = ls.match_index.get(peer).copied().unwrap_or(0);
                if new_match > cur_match {
                    ls.match_index.insert(peer.to_string(), new_match);
                }
                let cur_next = ls.next_index.get(peer).copied().unwrap_or(1);
                let desired_next = new_match.saturating_add(1);
                if desired_next > cur_next {
                    ls.next_index.insert(peer.to_string(), desired_next);
                }
            }
        } else if let Some(ls) = state.leader_state_mut() {
            let cur_next = ls.next_index.get(peer).copied().unwrap_or(1);
            let new_next = cur_next.saturating_sub(1).max(1);
            if new_next < cur_next {
                ls.next_index.insert(peer.to_string(), new_next);
            }
        }

        // Commit advancement: largest N such that a majority of
        // match_index[p] >= N and log[N].term == currentTerm.
        let last_index = state.last_log_index();
        let commit_index = state.commit_index;
        let current_term = state.current_term;
        let term_of = |log: &[LogEntry], n: u64| -> u64 {
            if n == 0 {
                0
            } else {
                log.get((n - 1) as usize).map(|e| e.term).unwrap_or(0)
            }
        };

        let mut new_commit = None;
        if let Some(ls) = state.leader_state_mut() {
            ls.match_index.insert(self_id, last_index);
            let mut candidate = commit_index;
            for n in (commit_index + 1)..=last_index {
                let replica_count = ls.match_index.values().filter(|&&m| m >= n).count();
                if replica_count >= majority {
                    candidate = n;
                }
            }
            if candidate > commit_index {
                new_commit = Some(candidate);
            }
        }

        if let Some(mut candidate) = new_commit {
            // Leader Completeness: only commit entries from the leader's own term directly.
            while candidate > commit_index && term_of(&state.log, candidate) != current_term {
                candidate -= 1;
            }
            if candidate > state.commit_index {
                state.commit_index = candidate;
                info!("[{}] leader advanced commit_index to {}", self.config.server_id, candidate);
            }
        }
        drop(state);
        self.progress.notify_waiters();
    }

    /// Peer RPC entry point: dispatches on message kind and returns the
    /// reply to send back over the wire (None for response-only variants).
    pub async fn handle_raft_message(self: &Arc<Self>, message: RaftMessage) -> Option<RaftMessage> {
        match message {
            RaftMessage::RequestVote { term, candidate_id, last_log_index, last_log_term } => {
                Some(self.handle_request_vote(term, candidate_id, last_log_index, last_log_term).await)
            }
            RaftMessage::AppendEntries { term, leader_id, prev_log_index, prev_log_term, entries, leader_commit } => {
                Some(
                    self.handle_append_entries(term, leader_id, prev_log_index, prev_log_term, entries, leader_commit)
                        .await,
                )
            }
            RaftMessage::ClientRequest { command } => Some(self.handle_client_request(command).await),
            RaftMessage::RequestVoteResponse { .. }
            | RaftMessage::AppendEntriesResponse { .. }
            | RaftMessage::ClientResponse { .. } => None,
        }
    }

    async fn handle_request_vote(
        self: &Arc<Self>,
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    ) -> RaftMessage {
        let mut state = self.state.lock().await;
        if term > state.current_term {
            state.current_term = term;
            state.voted_for = None;
            state.role = Role::Follower;
            let _ = self.is_leader_tx.send(false);
        }

        let current_term = state.current_term;
        if term < current_term {
            return RaftMessage::RequestVoteResponse {
                term: current_term,
                vote_granted: false,
                voter_id: self.config.server_id.clone(),
            };
        }

        let log_ok = last_log_term > state.last_log_term()
            || (last_log_term == state.last_log_term() && last_log_index >= state.last_log_index());
        let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(candidate_id.as_str());

        let granted = can_vote && log_ok;
        if granted {
            state.voted_for = Some(candidate_id.clone());
            state.last_heartbeat = Instant::now();
            info!("[{}] granted vote to {} for term {}", self.config.server_id, candidate_id, term);
        }
        drop(state);
        if granted {
            self.persist_to_disk().await;
        }

        RaftMessage::RequestVoteResponse {
            term: current_term,
            vote_granted: granted,
            voter_id: self.config.server_id.clone(),
        }
    }

    async fn handle_append_entries(
        self: &Arc<Self>,
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> RaftMessage {
        let mut state = self.state.lock().await;
        if term > state.current_term {
            state.current_term = term;
            state.voted_for = None;
            let _ = self.is_leader_tx.send(false);
        }

        let current_term = state.current_term;
        if term < current_term {
            return RaftMessage::AppendEntriesResponse {
                term: current_term,
                follower_id: self.config.server_id.clone(),
                success: false,
                last_log_index: state.last_log_index(),
            };
        }

        state.role = Role::Follower;
        state.leader_id = Some(leader_id);
        state.last_heartbeat = Instant::now();
        let _ = self.is_leader_tx.send(false);

        let prev_ok = prev_log_index == 0 || state.term_at(prev_log_index) == prev_log_term;
        if !prev_ok {
            if state.last_log_index() >= prev_log_index {
                // Term mismatch at prev_log_index: truncate the uncommitted suffix.
                state.log.truncate((prev_log_index.saturating_sub(1)) as usize);
            }
            drop(state);
            self.persist_to_disk().await;
            return RaftMessage::AppendEntriesResponse {
                term: current_term,
                follower_id: self.config.server_id.clone(),
                success: false,
                last_log_index: self.state.lock().await.last_log_index(),
            };
        }

        let mut changed = false;
        let mut insert_at = prev_log_index; // 0-based count of entries already accepted
        for entry in entries {
            insert_at += 1;
            let idx0 = (insert_at - 1) as usize;
            if idx0 < state.log.len() {
                if state.log[idx0].term != entry.term {
                    state.log.truncate(idx0);
                    state.log.push(entry);
                    changed = true;
                }
            } else {
                state.log.push(entry);
                changed = true;
            }
        }
        let last_new_index = insert_at;

        if leader_commit > state.commit_index {
            state.commit_index = std::cmp::min(leader_commit, last_new_index);
            changed = true;
        }

        let last_log_index = state.last_log_index();
        drop(state);
        if changed {
            self.persist_to_disk().await;
        }
        self.progress.notify_waiters();

        RaftMessage::AppendEntriesResponse {
            term: current_term,
            follower_id: self.config.server_id.clone(),
            success: true,
            last_log_index,
        }
    }

    /// Peer RPC / Client Router entry point for `ClientRequest`. Empty
    /// `command` is the leader-probe form (spec.md 4.2).
    pub async fn handle_client_request(self: &Arc<Self>, command: Vec<u8>) -> RaftMessage {
        let (is_leader, leader_id, term) = {
            let state = self.state.lock().await;
            (state.role.is_leader(), state.leader_id.clone(), state.current_term)
        };
        if !is_leader {
            return RaftMessage::ClientResponse {
                success: false,
                message: "Not the leader".to_string(),
                leader_id: leader_id.unwrap_or_default(),
                payload: Vec::new(),
            };
        }
        if command.is_empty() {
            // Probe form: confirm leadership without touching the log.
            return RaftMessage::ClientResponse {
                success: true,
                message: String::new(),
                leader_id: String::new(),
                payload: Vec::new(),
            };
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let command = self.state_machine.stamp(command, now);

        match self.propose_and_wait(term, command).await {
            Ok(response) => RaftMessage::ClientResponse {
                success: true,
                message: "Command accepted".to_string(),
                leader_id: String::new(),
                payload: response,
            },
            Err(RaftError::NotLeader { leader_id }) => RaftMessage::ClientResponse {
                success: false,
                message: "Not the leader".to_string(),
                leader_id: leader_id.unwrap_or_default(),
                payload: Vec::new(),
            },
            Err(e) => RaftMessage::ClientResponse {
                success: false,
                message: e.to_string(),
                leader_id: String::new(),
                payload: Vec::new(),
            },
        }
    }

    /// Propose `command`, block until it commits and applies, and return
    /// the application handler's encoded response (spec.md 9: commit
    /// ack + applied result, since the two are distinct events here).
    pub async fn propose_and_wait(self: &Arc<Self>, expected_term: u64, command: Vec<u8>) -> Result<Vec<u8>, RaftError> {
        let index = {
            let mut state = self.state.lock().await;
            if !state.role.is_leader() || state.current_term != expected_term {
                return Err(RaftError::NotLeader { leader_id: state.leader_id.clone() });
            }
            let entry = LogEntry { term: state.current_term, command };
            state.log.push(entry);
            let index = state.last_log_index();
            if let Some(ls) = state.leader_state_mut() {
                ls.match_index.insert(self.config.self_addr.clone(), index);
            }
            index
        };
        self.persist_to_disk().await;
        self.send_append_entries(expected_term, self.state.lock().await.commit_index).await;

        let timeout = Duration::from_millis(self.config.client_commit_timeout_ms);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = self.applied_result(index).await {
                return Ok(result);
            }
            let still_leader = {
                let state = self.state.lock().await;
                state.role.is_leader() && state.current_term == expected_term
            };
            if !still_leader {
                return Err(RaftError::NotLeader { leader_id: None });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RaftError::CommitTimeout);
            }
            let _ = tokio::time::timeout(remaining, self.progress.notified()).await;
        }
    }

    async fn applied_result(&self, index: u64) -> Option<Vec<u8>> {
        let cache = self.applied_cache.lock().await;
        cache.iter().find(|(i, _)| *i == index).map(|(_, r)| r.clone())
    }

    /// Applies every committed-but-unapplied entry in order (spec.md 4.1).
    async fn run_apply_loop(self: Arc<Self>) {
        loop {
            let pending: Vec<(u64, Vec<u8>)> = {
                let state = self.state.lock().await;
                if state.last_applied >= state.commit_index {
                    Vec::new()
                } else {
                    ((state.last_applied + 1)..=state.commit_index)
                        .map(|i| (i, state.log[(i - 1) as usize].command.clone()))
                        .collect()
                }
            };

            if pending.is_empty() {
                self.progress.notified().await;
                continue;
            }

            for (index, command) in pending {
                let response = self.state_machine.apply(&command);
                {
                    let mut state = self.state.lock().await;
                    state.last_applied = index;
                }
                {
                    let mut cache = self.applied_cache.lock().await;
                    if cache.len() >= APPLIED_CACHE_CAPACITY {
                        cache.pop_front();
                    }
                    cache.push_back((index, response));
                }
                debug!("[{}] applied entry {}", self.config.server_id, index);
            }
            self.persist_to_disk().await;
            self.progress.notify_waiters();
        }
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role.is_leader()
    }

    pub async fn get_leader_id(&self) -> Option<NodeId> {
        self.state.lock().await.leader_id.clone()
    }

    pub async fn current_term(&self) -> u64 {
        self.state.lock().await.current_term
    }

    pub async fn log_len(&self) -> usize {
        self.state.lock().await.log.len()
    }

    pub async fn commit_index(&self) -> u64 {
        self.state.lock().await.commit_index
    }

    /// Test helper: true if some log entry's command equals `needle`.
    pub async fn log_contains(&self, needle: &[u8]) -> bool {
        self.state.lock().await.log.iter().any(|e| e.command == needle)
    }
}

impl RaftState {
    /// Reads `next_index[peer]`, defaulting to `default` when the leader
    /// has not seen this peer before, or `None` when this node is not
    /// currently leader.
    fn next_index_or(&self, peer: &str, default: u64) -> Option<u64> {
        match &self.role {
            Role::Leader(ls) => Some(ls.next_index.get(peer).copied().unwrap_or(default)),
            _ => None,
        }
    }
}

fn apply_persisted(state: &mut RaftState, persisted: RaftPersistentState) {
    state.current_term = persisted.current_term;
    state.voted_for = persisted.voted_for;
    state.log = persisted.log;
    state.commit_index = persisted.commit_index;
    state.last_applied = persisted.last_applied;
}

/// Used by the Client Router (src/raft/client.rs) to distinguish a
/// transport failure from an application-level redirect.
pub fn is_redirect(msg: &RaftMessage) -> Option<Option<String>> {
    match msg {
        RaftMessage::ClientResponse { success: false, leader_id, .. } if !leader_id.is_empty() => {
            Some(Some(leader_id.clone()))
        }
        RaftMessage::ClientResponse { success: false, .. } => Some(None),
        _ => None,
    }
}

pub use errors::RaftError as Error;
