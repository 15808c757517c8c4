//! LLM side effect: a leader-only background task that drains the
//! pending-query queue, calls the stub LLM RPC service, and feeds the
//! result back through the normal replicated log (spec.md 4.3).

use crate::app::registry::encode_command;
use crate::app::AppStateMachine;
use crate::raft::rpc;
use crate::raft::RaftNode;
use crate::{LlmQueryRequest, LlmQueryResponse};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn call_llm(addr: &str, query_id: i64, message: &str) -> anyhow::Result<String> {
    let req = LlmQueryRequest { query_id, message: message.to_string() };
    let resp: LlmQueryResponse = rpc::call(addr, &req, LLM_CALL_TIMEOUT).await?;
    Ok(resp.message)
}

/// Runs for the lifetime of the process, only doing work while `node` is
/// leader. Uses the leadership watch channel to start/stop draining
/// without a separate spawn/abort dance at every role transition.
pub async fn run_dispatcher(node: Arc<RaftNode>, state_machine: Arc<AppStateMachine>, llm_addr: String) {
    let mut leadership = node.leadership_watch();
    loop {
        if !*leadership.borrow() {
            if leadership.changed().await.is_err() {
                return;
            }
            continue;
        }

        tokio::select! {
            _ = drain_while_leader(&node, &state_machine, &llm_addr) => {}
            changed = leadership.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

async fn drain_while_leader(node: &Arc<RaftNode>, state_machine: &Arc<AppStateMachine>, llm_addr: &str) {
    let todo = &state_machine.todo;
    loop {
        let (query_id, content) = todo.pop_or_wait().await;
        match call_llm(llm_addr, query_id, &content).await {
            Ok(response_text) => {
                let command = encode_command("UpdateLLMResponse", &crate::app::UpdateLlmResponseRequest {
                    query_id,
                    response: response_text,
                });
                let term = node.current_term().await;
                match node.propose_and_wait(term, command).await {
                    Ok(_) => info!("LLM response for query {} committed", query_id),
                    Err(e) => warn!("failed to commit LLM response for query {}: {}", query_id, e),
                }
            }
            Err(e) => error!("LLM adapter call failed for query {}: {}", query_id, e),
        }
    }
}
