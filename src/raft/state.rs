use crate::{LogEntry, NodeId};
use std::collections::HashMap;
use std::time::Instant;

/// Leader-only volatile state. Lives inside `Role::Leader` rather than as
/// always-present fields on `RaftState`, per the spec's re-architecture
/// guidance (role-scoped fields should not exist outside their role).
#[derive(Debug, Clone, Default)]
pub struct LeaderState {
    /// Next log index to send to each peer.
    pub next_index: HashMap<NodeId, u64>,
    /// Highest log index known replicated to each peer.
    pub match_index: HashMap<NodeId, u64>,
}

#[derive(Debug, Clone)]
pub enum Role {
    Follower,
    Candidate { votes_received: std::collections::HashSet<NodeId> },
    Leader(LeaderState),
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }
}

/// Volatile + durable node state, guarded by a single `tokio::sync::Mutex`
/// in `RaftNode` (see raft/mod.rs).
pub struct RaftState {
    // --- Durable (persisted via `store::persist` on every mutation) ---
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub commit_index: u64,
    pub last_applied: u64,

    // --- Volatile ---
    pub role: Role,
    pub leader_id: Option<NodeId>,
    pub last_heartbeat: Instant,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            role: Role::Follower,
            leader_id: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// 1-based index of the last log entry, 0 if the log is empty.
    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Term of the entry at 1-based `index`, 0 if `index == 0` or absent.
    pub fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.log
            .get((index - 1) as usize)
            .map(|e| e.term)
            .unwrap_or(0)
    }

    pub fn leader_state_mut(&mut self) -> Option<&mut LeaderState> {
        match &mut self.role {
            Role::Leader(ls) => Some(ls),
            _ => None,
        }
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}
