//! Application State Machine: the command-dispatch boundary between the
//! replication engine and the learning-management domain logic
//! (spec.md 4.3).

pub mod auth;
pub mod db;
pub mod llm;
pub mod registry;

pub use auth::AppError;
pub use registry::{encode_command, encode_command_with_auth, stamp_issued_at, CommandEnvelope, UpdateLlmResponseRequest};

use crate::raft::StateMachine;
use db::AppDb;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Wire-safe wrapper around a handler's `Result<Vec<u8>, AppError>` so the
/// applied-result cache (keyed by log index in `RaftNode`) can hand the
/// outcome back to whichever caller proposed the entry.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppOutcome {
    Ok(Vec<u8>),
    Err(AppError),
}

/// In-memory queue of `(query_id, content)` pairs awaiting an LLM call,
/// owned by the apply loop (populated deterministically at apply time,
/// drained only by the leader-only dispatcher in `app::llm`).
pub struct TodoQueue {
    queue: Mutex<VecDeque<(i64, String)>>,
    notify: Notify,
}

impl Default for TodoQueue {
    fn default() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }
}

impl TodoQueue {
    pub fn push(&self, query_id: i64, content: String) {
        self.queue.lock().unwrap().push_back((query_id, content));
        self.notify.notify_one();
    }

    pub async fn pop_or_wait(&self) -> (i64, String) {
        loop {
            if let Some(item) = self.queue.lock().unwrap().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }
}

/// Implements `raft::StateMachine` over the LMS command registry. One
/// instance per node, constructed once at startup and shared between the
/// apply loop and the LLM dispatcher.
pub struct AppStateMachine {
    db: AppDb,
    pub todo: TodoQueue,
}

impl AppStateMachine {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        Ok(Self { db: AppDb::open(db_path)?, todo: TodoQueue::default() })
    }

    /// In-memory database variant used by integration tests and anything
    /// else that wants a throwaway node without touching the filesystem.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self { db: AppDb::open_in_memory()?, todo: TodoQueue::default() })
    }
}

impl StateMachine for AppStateMachine {
    fn stamp(&self, command: Vec<u8>, issued_at_unix_secs: i64) -> Vec<u8> {
        stamp_issued_at(command, issued_at_unix_secs)
    }

    fn apply(&self, command: &[u8]) -> Vec<u8> {
        let outcome = match bincode::deserialize::<CommandEnvelope>(command) {
            Ok(envelope) => {
                // `Login` and the internally-originated `UpdateLLMResponse`
                // command carry no token; the registry enforces `require_ctx`
                // for every other method, so an absent token simply fails
                // there rather than needing special-casing here.
                let auth_ctx = match &envelope.authorization {
                    Some(token) => match auth::verify_token(token) {
                        Ok(ctx) => Some(ctx),
                        Err(e) => return encode_outcome(AppOutcome::Err(e)),
                    },
                    None => None,
                };
                match registry::dispatch(&envelope.method, &envelope.request, envelope.issued_at, auth_ctx.as_ref(), &self.db, &self.todo) {
                    Ok(bytes) => AppOutcome::Ok(bytes),
                    Err(e) => AppOutcome::Err(e),
                }
            }
            Err(e) => {
                warn!("dropped malformed command envelope: {}", e);
                AppOutcome::Err(AppError::Conflict("malformed command envelope".to_string()))
            }
        };
        encode_outcome(outcome)
    }
}

fn encode_outcome(outcome: AppOutcome) -> Vec<u8> {
    bincode::serialize(&outcome).expect("AppOutcome serialization is infallible")
}

pub fn decode_outcome(bytes: &[u8]) -> anyhow::Result<AppOutcome> {
    Ok(bincode::deserialize(bytes)?)
}
