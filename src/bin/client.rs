use anyhow::Result;
use clap::{Parser, Subcommand};
use lms_raft::app::db::{PostType, QueryTarget, UserRole};
use lms_raft::app::registry::{
    self, AddFeedbackRequest, AssignGradeRequest, CreateUserRequest, DownloadPostRequest, DownloadSolutionRequest,
    GetRepliesRequest, GetSolutionsRequest, LoginRequest, PostContentRequest, PostQueryRequest, PostReplyRequest,
    UploadSolutionRequest,
};
use lms_raft::app::{decode_outcome, AppOutcome};
use lms_raft::raft::client::{load_servers, ClientRouter};
use std::path::PathBuf;

const SERVER_CONFIG_FILE: &str = "servers.conf";

/// Leader-discovery CLI for the replicated learning-management service.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the newline-separated list of server addresses.
    #[arg(long, default_value = SERVER_CONFIG_FILE)]
    servers: PathBuf,

    /// Bearer token from a prior `login`, required by every command but `login`.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Login { username: String, password: String },
    CreateUser { username: String, password: String, #[arg(value_enum)] role: RoleArg },
    ListUsers,
    PostContent { title: String, description: String, filename: String, content_path: PathBuf, #[arg(value_enum)] kind: PostTypeArg },
    GetPosts,
    DownloadPost { post_id: i64 },
    UploadSolution { post_id: i64, filename: String, content_path: PathBuf },
    GetSolutions { post_id: i64 },
    DownloadSolution { solution_id: i64 },
    AssignGrade { solution_id: i64, grade: f64 },
    ViewGrades,
    PostQuery { content: String, #[arg(value_enum)] target: QueryTargetArg },
    GetQueries,
    PostReply { query_id: i64, content: String },
    GetReplies { query_id: i64 },
    AddFeedback { solution_id: i64, feedback: String },
    GetAllGrades,
}

#[derive(Clone, clap::ValueEnum)]
enum RoleArg {
    Student,
    Instructor,
    Admin,
}

impl From<RoleArg> for UserRole {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Student => UserRole::Student,
            RoleArg::Instructor => UserRole::Instructor,
            RoleArg::Admin => UserRole::Admin,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum PostTypeArg {
    Assignment,
    Material,
    Announcement,
}

impl From<PostTypeArg> for PostType {
    fn from(t: PostTypeArg) -> Self {
        match t {
            PostTypeArg::Assignment => PostType::Assignment,
            PostTypeArg::Material => PostType::Material,
            PostTypeArg::Announcement => PostType::Announcement,
        }
    }
}

#[derive(Clone, clap::ValueEnum)]
enum QueryTargetArg {
    Professor,
    Llm,
}

impl From<QueryTargetArg> for QueryTarget {
    fn from(t: QueryTargetArg) -> Self {
        match t {
            QueryTargetArg::Professor => QueryTarget::Professor,
            QueryTargetArg::Llm => QueryTarget::Llm,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let servers = load_servers(&cli.servers)?;
    let mut router = ClientRouter::new(servers)?;

    let (method, request_bytes): (&str, Vec<u8>) = match cli.command {
        Commands::Login { username, password } => ("Login", bincode::serialize(&LoginRequest { username, password })?),
        Commands::CreateUser { username, password, role } => {
            ("CreateUser", bincode::serialize(&CreateUserRequest { username, password, role: role.into() })?)
        }
        Commands::ListUsers => ("ListUsers", Vec::new()),
        Commands::PostContent { title, description, filename, content_path, kind } => (
            "PostContent",
            bincode::serialize(&PostContentRequest {
                title,
                description,
                kind: kind.into(),
                filename,
                content: std::fs::read(content_path)?,
            })?,
        ),
        Commands::GetPosts => ("GetPosts", Vec::new()),
        Commands::DownloadPost { post_id } => ("DownloadPost", bincode::serialize(&DownloadPostRequest { post_id })?),
        Commands::UploadSolution { post_id, filename, content_path } => (
            "UploadSolution",
            bincode::serialize(&UploadSolutionRequest { post_id, filename, content: std::fs::read(content_path)? })?,
        ),
        Commands::GetSolutions { post_id } => ("GetSolutions", bincode::serialize(&GetSolutionsRequest { post_id })?),
        Commands::DownloadSolution { solution_id } => {
            ("DownloadSolution", bincode::serialize(&DownloadSolutionRequest { solution_id })?)
        }
        Commands::AssignGrade { solution_id, grade } => ("AssignGrade", bincode::serialize(&AssignGradeRequest { solution_id, grade })?),
        Commands::ViewGrades => ("ViewGrades", Vec::new()),
        Commands::PostQuery { content, target } => ("PostQuery", bincode::serialize(&PostQueryRequest { content, target: target.into() })?),
        Commands::GetQueries => ("GetQueries", Vec::new()),
        Commands::PostReply { query_id, content } => ("PostReply", bincode::serialize(&PostReplyRequest { query_id, content })?),
        Commands::GetReplies { query_id } => ("GetReplies", bincode::serialize(&GetRepliesRequest { query_id })?),
        Commands::AddFeedback { solution_id, feedback } => ("AddFeedback", bincode::serialize(&AddFeedbackRequest { solution_id, feedback })?),
        Commands::GetAllGrades => ("GetAllGrades", Vec::new()),
    };

    let command = registry::encode_raw_command_with_auth(method, request_bytes, cli.token.clone());
    let payload = router.send(command).await?;
    print_outcome(&payload);

    Ok(())
}

/// Output formatting is explicitly out of scope (spec.md Non-goals:
/// "user-interface ergonomics") -- this prints a `Debug` dump, nothing
/// fancier.
fn print_outcome(bytes: &[u8]) {
    if bytes.is_empty() {
        println!("committed (no response payload)");
        return;
    }
    match decode_outcome(bytes) {
        Ok(AppOutcome::Ok(payload)) => println!("{:?}", payload),
        Ok(AppOutcome::Err(e)) => println!("error: {}", e),
        Err(e) => println!("malformed response: {}", e),
    }
}
