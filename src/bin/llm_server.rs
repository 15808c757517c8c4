//! Stub LLM adapter RPC service (spec.md 6): a trivial unary
//! request/response server the leader-only dispatcher (`app::llm`) calls
//! to populate a query's `llm_response`. Grounded on
//! `original_source/llm_server.py`'s `LLMServicer.Query`, reimplemented
//! over the crate's own length-prefixed-JSON-over-TCP framing instead of
//! gRPC/ollama -- the spec explicitly characterizes this service as "a
//! trivial request/response stub", so no model runtime is wired in here.

use anyhow::Result;
use clap::Parser;
use lms_raft::raft::rpc;
use lms_raft::{LlmQueryRequest, LlmQueryResponse};
use log::{error, info};
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address this stub service listens on.
    #[arg(long, default_value = "127.0.0.1:7900")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let listener = TcpListener::bind(&cli.addr).await?;
    info!("llm_server listening on {}", cli.addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream).await {
                        error!("connection from {} failed: {}", peer_addr, e);
                    }
                });
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
}

async fn handle_connection(mut stream: TcpStream) -> Result<()> {
    let req: LlmQueryRequest = rpc::read_message(&mut stream).await?;
    info!("answering query {}", req.query_id);
    let resp = LlmQueryResponse { query_id: req.query_id, message: canned_response(&req.message) };
    rpc::write_message(&mut stream, &resp).await
}

/// A canned response standing in for an actual model call, matching the
/// spec's framing of this service as a stub rather than a real adapter.
fn canned_response(message: &str) -> String {
    format!("This is a stub LLM response to: {}", message)
}
