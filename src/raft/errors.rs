use thiserror::Error;

/// Error kinds surfaced at the replication-engine boundary (spec.md 7).
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("peer unreachable or slow: {0}")]
    TransportError(String),

    #[error("observed higher term {0}, stepping down")]
    TermStale(u64),

    #[error("not the leader")]
    NotLeader { leader_id: Option<String> },

    #[error("log conflict at index {0}")]
    LogConflict(u64),

    #[error("leader lost quorum before entry committed")]
    CommitTimeout,

    #[error("internal persistence failure: {0}")]
    InternalError(String),
}
