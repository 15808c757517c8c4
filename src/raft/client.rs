//! Client Router: the library half of the client-side leader-discovery
//! loop (spec.md 4.2's "probe, redirect-follow, retry" contract). The
//! `client` binary is a thin `clap` CLI wrapped around this.

use crate::raft::{is_redirect, rpc};
use crate::RaftMessage;
use anyhow::{anyhow, bail, Result};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_RETRIES: usize = 3;
const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// Tracks a cached leader hint across calls so a long-lived client (or a
/// CLI invocation reading `servers.conf` fresh each time) doesn't have to
/// re-probe the whole cluster for every request.
pub struct ClientRouter {
    servers: Vec<String>,
    cached_leader: Option<String>,
}

impl ClientRouter {
    pub fn new(servers: Vec<String>) -> Result<Self> {
        if servers.is_empty() {
            bail!("no server addresses configured");
        }
        Ok(Self { servers, cached_leader: None })
    }

    /// Submit a command envelope to the cluster, following leader
    /// redirects and retrying transport failures, until it either
    /// commits or the retry budget is exhausted. Returns the encoded
    /// `app::AppOutcome` for the committed entry (spec.md 9: the commit
    /// ack and the handler's own result are fetched together, folding
    /// the "direct application-service call" spec.md 4.4 describes into
    /// the same `ClientResponse`).
    pub async fn send(&mut self, command: Vec<u8>) -> Result<Vec<u8>> {
        let mut last_err = None;

        for attempt in 0..DEFAULT_RETRIES {
            if attempt > 0 {
                sleep(RETRY_BACKOFF * (attempt as u32)).await;
            }

            let candidates = self.candidate_order();
            for addr in candidates {
                let req = RaftMessage::ClientRequest { command: command.clone() };
                match rpc::call::<RaftMessage, RaftMessage>(&addr, &req, RPC_TIMEOUT).await {
                    Ok(RaftMessage::ClientResponse { success: true, payload, .. }) => {
                        self.cached_leader = Some(addr.clone());
                        info!("command accepted by {}", addr);
                        return Ok(payload);
                    }
                    Ok(ref resp @ RaftMessage::ClientResponse { .. }) => match is_redirect(resp) {
                        Some(Some(leader_id)) => {
                            debug!("{} redirected us to {}", addr, leader_id);
                            self.cached_leader = Some(leader_id);
                        }
                        Some(None) => {
                            debug!("{} has no leader yet", addr);
                            self.cached_leader = None;
                        }
                        None => unreachable!("success responses are handled above"),
                    },
                    Ok(_) => warn!("unexpected reply shape from {}", addr),
                    Err(e) => {
                        debug!("{} unreachable: {}", addr, e);
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no server in the cluster accepted the request")))
    }

    /// Cached leader first (if any), then every other known server.
    fn candidate_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.servers.len());
        if let Some(leader) = &self.cached_leader {
            order.push(leader.clone());
        }
        for s in &self.servers {
            if Some(s) != self.cached_leader.as_ref() {
                order.push(s.clone());
            }
        }
        order
    }
}

/// Reads newline-separated `host:port` entries, ignoring blank lines.
pub fn load_servers(path: &std::path::Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read server list {}: {}", path.display(), e))?;
    let servers: Vec<String> = content.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
    if servers.is_empty() {
        bail!("no servers found in {}", path.display());
    }
    Ok(servers)
}
