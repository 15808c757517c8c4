use serde::{Deserialize, Serialize};

pub mod app;
pub mod raft;
pub mod store;

/// Cluster node identifier, carried on the wire and used as a HashMap key
/// for per-peer replication state.
pub type NodeId = String;

/// A single entry in the replicated log. Position (1-based index) is not
/// stored in the entry itself -- it is implied by the entry's slot in the
/// node's `log` vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    /// Opaque to the replication engine; meaningful only to the
    /// application state machine (see `app::commands`).
    pub command: Vec<u8>,
}

/// The subset of node state that must hit stable storage before it is
/// observable externally.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RaftPersistentState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub commit_index: u64,
    pub last_applied: u64,
}

/// Wire messages exchanged between peers on the Raft RPC port, and between
/// a leader and a client on the same port. Framed as length-prefixed JSON
/// (see `raft::rpc`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        vote_granted: bool,
        voter_id: NodeId,
    },
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    AppendEntriesResponse {
        term: u64,
        follower_id: NodeId,
        success: bool,
        last_log_index: u64,
    },
    /// `command` empty is the leader-probe form (spec 4.2); non-empty is
    /// a real client write routed through the log.
    ClientRequest {
        command: Vec<u8>,
    },
    ClientResponse {
        success: bool,
        message: String,
        leader_id: String,
        /// Encoded `app::AppOutcome` for the entry this request committed,
        /// empty for the probe form and for non-commit failures (spec.md
        /// 9: commit-ack and handler-success are distinct events, so the
        /// Client Router fetches both in one reply rather than a second
        /// "direct application-service call").
        payload: Vec<u8>,
    },
}

/// Wire messages for the stub LLM adapter RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmQueryRequest {
    pub query_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmQueryResponse {
    pub query_id: i64,
    pub message: String,
}
