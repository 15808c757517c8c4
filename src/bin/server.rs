use anyhow::Result;
use clap::Parser;
use lms_raft::app::{llm, AppStateMachine};
use lms_raft::raft::{rpc, RaftConfig, RaftNode};
use lms_raft::RaftMessage;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};

/// One replica of the replicated learning-management state machine.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// This node's id, used for the state-file and database-file names.
    #[arg(long)]
    id: String,

    /// Address this node listens on for both Raft and client RPCs.
    #[arg(long)]
    addr: String,

    /// Comma-separated addresses of every other node in the cluster.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Address of the LLM stub service consulted by the leader-only dispatcher.
    #[arg(long, default_value = "127.0.0.1:7900")]
    llm_addr: String,

    /// Directory holding this node's persisted state and database files.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[arg(long, default_value_t = 150)]
    election_timeout_min_ms: u64,

    #[arg(long, default_value_t = 300)]
    election_timeout_max_ms: u64,

    #[arg(long, default_value_t = 50)]
    heartbeat_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)?;

    let config = RaftConfig {
        server_id: cli.id.clone(),
        self_addr: cli.addr.clone(),
        peers: cli.peers.clone(),
        election_timeout_min: cli.election_timeout_min_ms,
        election_timeout_max: cli.election_timeout_max_ms,
        heartbeat_interval: cli.heartbeat_interval_ms,
        append_entries_timeout_ms: 1000,
        client_commit_timeout_ms: 5000,
        base_dir: cli.data_dir.clone(),
    };

    let db_path = cli.data_dir.join(format!("lms_{}.db", cli.id));
    let state_machine = Arc::new(AppStateMachine::open(&db_path)?);

    let node = RaftNode::new(config, state_machine.clone());
    node.start().await;

    let dispatcher_node = Arc::clone(&node);
    let dispatcher_state_machine = Arc::clone(&state_machine);
    tokio::spawn(llm::run_dispatcher(dispatcher_node, dispatcher_state_machine, cli.llm_addr.clone()));

    let listener = TcpListener::bind(&cli.addr).await?;
    info!("[{}] listening on {}", cli.id, cli.addr);

    let accept_node = Arc::clone(&node);
    let accept_loop = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let node = Arc::clone(&accept_node);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, node).await {
                            error!("connection from {} failed: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => error!("accept failed: {}", e),
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("[{}] shutting down", cli.id);
    accept_loop.abort();

    Ok(())
}

async fn handle_connection(mut stream: TcpStream, node: Arc<RaftNode>) -> Result<()> {
    let message: RaftMessage = rpc::read_message(&mut stream).await?;
    if let Some(response) = node.handle_raft_message(message).await {
        rpc::write_message(&mut stream, &response).await?;
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
