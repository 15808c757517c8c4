//! Command envelope encoding and the method-name -> handler registry
//! (spec.md 4.3). Every handler is a pure function of `(request bytes,
//! issued_at, auth context, &AppDb)`, so replaying the same entry on any
//! replica produces byte-identical results.

use crate::app::auth::{self, AppError, AuthContext};
use crate::app::db::{AppDb, PostType, QueryTarget, UserRole};
use crate::app::TodoQueue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub method: String,
    pub request: Vec<u8>,
    /// Leader-assigned wall-clock time (unix seconds) at append time; see
    /// `auth::issue_token` for why this replaces each replica's own clock.
    pub issued_at: i64,
    /// Bearer token produced by `Login`, absent only for `Login` itself.
    pub authorization: Option<String>,
}

pub fn encode_command<T: Serialize>(method: &str, request: &T) -> Vec<u8> {
    let envelope = CommandEnvelope {
        method: method.to_string(),
        request: bincode::serialize(request).expect("request serialization is infallible"),
        issued_at: 0, // filled in by the leader at append time, see RaftNode::propose_and_wait callers
        authorization: None,
    };
    bincode::serialize(&envelope).expect("envelope serialization is infallible")
}

pub fn encode_command_with_auth<T: Serialize>(method: &str, request: &T, token: Option<String>) -> Vec<u8> {
    encode_raw_command_with_auth(method, bincode::serialize(request).expect("request serialization is infallible"), token)
}

/// Same as `encode_command_with_auth`, but for a caller that already holds
/// a bincode-serialized request body (e.g. a CLI dispatching on a method
/// name picked at runtime, where every arm's request type differs). Takes
/// `request_bytes` verbatim instead of serializing it a second time.
pub fn encode_raw_command_with_auth(method: &str, request_bytes: Vec<u8>, token: Option<String>) -> Vec<u8> {
    let envelope = CommandEnvelope {
        method: method.to_string(),
        request: request_bytes,
        issued_at: 0,
        authorization: token,
    };
    bincode::serialize(&envelope).expect("envelope serialization is infallible")
}

pub fn stamp_issued_at(mut bytes: Vec<u8>, issued_at: i64) -> Vec<u8> {
    if let Ok(mut envelope) = bincode::deserialize::<CommandEnvelope>(&bytes) {
        envelope.issued_at = issued_at;
        bytes = bincode::serialize(&envelope).expect("envelope serialization is infallible");
    }
    bytes
}

// ---- Request/response payloads, one pair per application method ----

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostContentRequest {
    pub title: String,
    pub description: String,
    pub kind: PostType,
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub kind: PostType,
    pub filename: String,
    pub timestamp: i64,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetPostsResponse {
    pub posts: Vec<PostResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadPostRequest {
    pub post_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadSolutionRequest {
    pub post_id: i64,
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SolutionResponse {
    pub id: i64,
    pub post_id: i64,
    pub student_id: i64,
    pub filename: String,
    pub timestamp: i64,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetSolutionsRequest {
    pub post_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SolutionListResponse {
    pub solutions: Vec<SolutionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadSolutionRequest {
    pub solution_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignGradeRequest {
    pub solution_id: i64,
    pub grade: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostQueryRequest {
    pub content: String,
    pub target: QueryTarget,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub id: i64,
    pub student_id: i64,
    pub content: String,
    pub timestamp: i64,
    pub target: QueryTarget,
    pub llm_response: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetQueriesResponse {
    pub queries: Vec<QueryResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostReplyRequest {
    pub query_id: i64,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub id: i64,
    pub query_id: i64,
    pub user_id: i64,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRepliesRequest {
    pub query_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRepliesResponse {
    pub replies: Vec<ReplyResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddFeedbackRequest {
    pub solution_id: i64,
    pub feedback: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetAllGradesResponse {
    pub solutions: Vec<SolutionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateLlmResponseRequest {
    pub query_id: i64,
    pub response: String,
}

fn solution_to_response(s: crate::app::db::Solution, with_content: bool) -> SolutionResponse {
    SolutionResponse {
        id: s.id,
        post_id: s.post_id,
        student_id: s.student_id,
        filename: s.filename,
        timestamp: s.timestamp,
        grade: s.grade,
        feedback: s.feedback,
        content: if with_content { Some(s.content) } else { None },
    }
}

/// Dispatches one decoded command. `auth_ctx` is `None` only for `Login`
/// (which establishes identity) and for the internally-originated
/// `UpdateLLMResponse` command, which carries no token because it never
/// reaches the network (see `app::mod`'s `AppStateMachine::apply`);
/// every other method requires `Some`.
pub fn dispatch(
    method: &str,
    request: &[u8],
    issued_at: i64,
    auth_ctx: Option<&AuthContext>,
    db: &AppDb,
    todo: &TodoQueue,
) -> Result<Vec<u8>, AppError> {
    match method {
        "Login" => {
            let req: LoginRequest = decode(request)?;
            let (user, verifier) = db.find_user_by_username(&req.username).map_err(db_err)?.ok_or(AppError::AuthError)?;
            if !auth::verify_password(&req.password, &verifier) {
                return Err(AppError::AuthError);
            }
            let token = auth::issue_token(user.id, &user.username, user.role, issued_at)?;
            encode(&LoginResponse { token })
        }
        "CreateUser" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Admin])?;
            let req: CreateUserRequest = decode(request)?;
            let id = db
                .create_user(&req.username, &req.password, req.role)
                .map_err(|_| AppError::Conflict(format!("username {} already exists", req.username)))?;
            encode(&UserResponse { id, username: req.username, role: req.role })
        }
        "ListUsers" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Admin])?;
            let users = db.list_users().map_err(db_err)?;
            encode(&ListUsersResponse {
                users: users.into_iter().map(|u| UserResponse { id: u.id, username: u.username, role: u.role }).collect(),
            })
        }
        "PostContent" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let req: PostContentRequest = decode(request)?;
            let id = db
                .insert_post(&req.title, &req.description, req.kind, &req.filename, &req.content, issued_at)
                .map_err(db_err)?;
            encode(&PostResponse {
                id,
                title: req.title,
                description: req.description,
                kind: req.kind,
                filename: req.filename,
                timestamp: issued_at,
                content: None,
            })
        }
        "GetPosts" => {
            require_ctx(auth_ctx)?;
            let posts = db.list_posts().map_err(db_err)?;
            encode(&GetPostsResponse {
                posts: posts
                    .into_iter()
                    .map(|p| PostResponse {
                        id: p.id,
                        title: p.title,
                        description: p.description,
                        kind: p.kind,
                        filename: p.filename,
                        timestamp: p.timestamp,
                        content: None,
                    })
                    .collect(),
            })
        }
        "DownloadPost" => {
            require_ctx(auth_ctx)?;
            let req: DownloadPostRequest = decode(request)?;
            let post = db.get_post(req.post_id).map_err(db_err)?.ok_or(AppError::NotFound)?;
            encode(&PostResponse {
                id: post.id,
                title: post.title,
                description: post.description,
                kind: post.kind,
                filename: post.filename,
                timestamp: post.timestamp,
                content: Some(post.content),
            })
        }
        "UploadSolution" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Student])?;
            let req: UploadSolutionRequest = decode(request)?;
            let id = db
                .insert_solution(req.post_id, ctx.user_id, &req.filename, &req.content, issued_at)
                .map_err(db_err)?;
            encode(&SolutionResponse {
                id,
                post_id: req.post_id,
                student_id: ctx.user_id,
                filename: req.filename,
                timestamp: issued_at,
                grade: None,
                feedback: None,
                content: None,
            })
        }
        "GetSolutions" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let req: GetSolutionsRequest = decode(request)?;
            let solutions = db.list_solutions_for_post(req.post_id).map_err(db_err)?;
            encode(&SolutionListResponse { solutions: solutions.into_iter().map(|s| solution_to_response(s, false)).collect() })
        }
        "DownloadSolution" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let req: DownloadSolutionRequest = decode(request)?;
            let solution = db.get_solution(req.solution_id).map_err(db_err)?.ok_or(AppError::NotFound)?;
            encode(&solution_to_response(solution, true))
        }
        "AssignGrade" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let req: AssignGradeRequest = decode(request)?;
            db.assign_grade(req.solution_id, req.grade).map_err(db_err)?;
            let solution = db.get_solution(req.solution_id).map_err(db_err)?.ok_or(AppError::NotFound)?;
            encode(&solution_to_response(solution, false))
        }
        "ViewGrades" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Student])?;
            let solutions = db.list_solutions_for_student(ctx.user_id).map_err(db_err)?;
            encode(&SolutionListResponse { solutions: solutions.into_iter().map(|s| solution_to_response(s, false)).collect() })
        }
        "PostQuery" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Student])?;
            let req: PostQueryRequest = decode(request)?;
            let pending = matches!(req.target, QueryTarget::Llm).then_some(crate::app::db::PENDING_LLM_RESPONSE);
            let id = db.insert_query(ctx.user_id, &req.content, issued_at, req.target, pending).map_err(db_err)?;
            if matches!(req.target, QueryTarget::Llm) {
                todo.push(id, req.content.clone());
            }
            encode(&QueryResponse {
                id,
                student_id: ctx.user_id,
                content: req.content,
                timestamp: issued_at,
                target: req.target,
                llm_response: pending.map(str::to_string),
            })
        }
        "UpdateLLMResponse" => {
            // System-internal only: never reachable from a network client
            // (see RaftNode::handle_client_request / Client Router).
            let req: UpdateLlmResponseRequest = decode(request)?;
            db.update_llm_response(req.query_id, &req.response).map_err(db_err)?;
            encode(&())
        }
        "GetQueries" => {
            require_ctx(auth_ctx)?;
            let queries = db.list_queries().map_err(db_err)?;
            encode(&GetQueriesResponse {
                queries: queries
                    .into_iter()
                    .map(|q| QueryResponse {
                        id: q.id,
                        student_id: q.student_id,
                        content: q.content,
                        timestamp: q.timestamp,
                        target: q.target,
                        llm_response: q.llm_response,
                    })
                    .collect(),
            })
        }
        "PostReply" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor, UserRole::Admin])?;
            let req: PostReplyRequest = decode(request)?;
            let id = db.insert_reply(req.query_id, ctx.user_id, &req.content, issued_at).map_err(db_err)?;
            encode(&ReplyResponse { id, query_id: req.query_id, user_id: ctx.user_id, content: req.content, timestamp: issued_at })
        }
        "GetReplies" => {
            require_ctx(auth_ctx)?;
            let req: GetRepliesRequest = decode(request)?;
            let replies = db.list_replies_for_query(req.query_id).map_err(db_err)?;
            encode(&GetRepliesResponse {
                replies: replies
                    .into_iter()
                    .map(|r| ReplyResponse { id: r.id, query_id: r.query_id, user_id: r.user_id, content: r.content, timestamp: r.timestamp })
                    .collect(),
            })
        }
        "AddFeedback" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let req: AddFeedbackRequest = decode(request)?;
            db.add_feedback(req.solution_id, &req.feedback).map_err(db_err)?;
            let solution = db.get_solution(req.solution_id).map_err(db_err)?.ok_or(AppError::NotFound)?;
            encode(&solution_to_response(solution, false))
        }
        "GetAllGrades" => {
            let ctx = require_ctx(auth_ctx)?;
            auth::require_role(ctx, &[UserRole::Instructor])?;
            let solutions = db.all_grades().map_err(db_err)?;
            encode(&GetAllGradesResponse { solutions: solutions.into_iter().map(|s| solution_to_response(s, false)).collect() })
        }
        other => Err(AppError::Conflict(format!("unknown method {}", other))),
    }
}

fn require_ctx<'a>(ctx: Option<&'a AuthContext>) -> Result<&'a AuthContext, AppError> {
    ctx.ok_or(AppError::AuthError)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, AppError> {
    bincode::deserialize(bytes).map_err(|_| AppError::Conflict("malformed request payload".to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, AppError> {
    bincode::serialize(value).map_err(|_| AppError::Conflict("response serialization failed".to_string()))
}

fn db_err(e: rusqlite::Error) -> AppError {
    AppError::Conflict(e.to_string())
}
