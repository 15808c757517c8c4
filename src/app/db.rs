//! Application database: the `users/posts/solutions/queries/replies`
//! schema every replica maintains locally, driven only by applied log
//! entries (never by direct client writes).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Student,
    Instructor,
    Admin,
}

impl UserRole {
    fn as_i64(self) -> i64 {
        match self {
            UserRole::Student => 0,
            UserRole::Instructor => 1,
            UserRole::Admin => 2,
        }
    }

    fn from_i64(v: i64) -> Self {
        match v {
            1 => UserRole::Instructor,
            2 => UserRole::Admin,
            _ => UserRole::Student,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostType {
    Assignment,
    Material,
    Announcement,
}

impl PostType {
    fn as_i64(self) -> i64 {
        match self {
            PostType::Assignment => 0,
            PostType::Material => 1,
            PostType::Announcement => 2,
        }
    }

    fn from_i64(v: i64) -> Self {
        match v {
            1 => PostType::Material,
            2 => PostType::Announcement,
            _ => PostType::Assignment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryTarget {
    Professor,
    Llm,
}

impl QueryTarget {
    fn as_i64(self) -> i64 {
        match self {
            QueryTarget::Professor => 0,
            QueryTarget::Llm => 1,
        }
    }

    fn from_i64(v: i64) -> Self {
        match v {
            1 => QueryTarget::Llm,
            _ => QueryTarget::Professor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub kind: PostType,
    pub filename: String,
    pub content: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub kind: PostType,
    pub filename: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub id: i64,
    pub post_id: i64,
    pub student_id: i64,
    pub filename: String,
    pub content: Vec<u8>,
    pub timestamp: i64,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub student_id: i64,
    pub content: String,
    pub timestamp: i64,
    pub target: QueryTarget,
    pub llm_response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: i64,
    pub query_id: i64,
    pub user_id: i64,
    pub content: String,
    pub timestamp: i64,
}

pub const PENDING_LLM_RESPONSE: &str = "pending";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Owns the node-local rusqlite connection. `rusqlite::Connection` is not
/// `Sync`; a `std::sync::Mutex` serializes access the same way the apply
/// loop already serializes calls into the state machine.
pub struct AppDb {
    conn: Mutex<Connection>,
}

impl AppDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.create_tables()?;
        db.seed_default_admin()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.create_tables()?;
        db.seed_default_admin()?;
        Ok(db)
    }

    fn create_tables(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_verifier TEXT NOT NULL,
                role INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                type INTEGER NOT NULL,
                filename TEXT NOT NULL,
                content BLOB NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS solutions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL,
                student_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                content BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                grade REAL,
                feedback TEXT
            );
            CREATE TABLE IF NOT EXISTS queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                target INTEGER NOT NULL,
                llm_response TEXT
            );
            CREATE TABLE IF NOT EXISTS replies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn seed_default_admin(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> =
            conn.query_row("SELECT id FROM users WHERE username = ?1", params!["admin"], |r| r.get(0)).optional()?;
        if exists.is_none() {
            let verifier = crate::app::auth::hash_password("admin", DEFAULT_ADMIN_PASSWORD);
            conn.execute(
                "INSERT INTO users (username, password_verifier, role) VALUES (?1, ?2, ?3)",
                params!["admin", verifier, UserRole::Admin.as_i64()],
            )?;
        }
        Ok(())
    }

    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let verifier = crate::app::auth::hash_password(username, password);
        conn.execute(
            "INSERT INTO users (username, password_verifier, role) VALUES (?1, ?2, ?3)",
            params![username, verifier, role.as_i64()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn find_user_by_username(&self, username: &str) -> rusqlite::Result<Option<(User, String)>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, password_verifier, role FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok((
                    User { id: row.get(0)?, username: row.get(1)?, role: UserRole::from_i64(row.get(3)?) },
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
    }

    pub fn list_users(&self) -> rusqlite::Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, username, role FROM users ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(User { id: row.get(0)?, username: row.get(1)?, role: UserRole::from_i64(row.get(2)?) })
        })?;
        rows.collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_post(
        &self,
        title: &str,
        description: &str,
        kind: PostType,
        filename: &str,
        content: &[u8],
        timestamp: i64,
    ) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO posts (title, description, type, filename, content, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![title, description, kind.as_i64(), filename, content, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_posts(&self) -> rusqlite::Result<Vec<PostSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, title, description, type, filename, timestamp FROM posts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(PostSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                kind: PostType::from_i64(row.get(3)?),
                filename: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn get_post(&self, post_id: i64) -> rusqlite::Result<Option<Post>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, description, type, filename, content, timestamp FROM posts WHERE id = ?1",
            params![post_id],
            |row| {
                Ok(Post {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    kind: PostType::from_i64(row.get(3)?),
                    filename: row.get(4)?,
                    content: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            },
        )
        .optional()
    }

    pub fn insert_solution(
        &self,
        post_id: i64,
        student_id: i64,
        filename: &str,
        content: &[u8],
        timestamp: i64,
    ) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO solutions (post_id, student_id, filename, content, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![post_id, student_id, filename, content, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_solutions_for_post(&self, post_id: i64) -> rusqlite::Result<Vec<Solution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, student_id, filename, content, timestamp, grade, feedback
             FROM solutions WHERE post_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![post_id], Self::row_to_solution)?;
        rows.collect()
    }

    pub fn list_solutions_for_student(&self, student_id: i64) -> rusqlite::Result<Vec<Solution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, student_id, filename, content, timestamp, grade, feedback
             FROM solutions WHERE student_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![student_id], Self::row_to_solution)?;
        rows.collect()
    }

    pub fn get_solution(&self, solution_id: i64) -> rusqlite::Result<Option<Solution>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, post_id, student_id, filename, content, timestamp, grade, feedback
             FROM solutions WHERE id = ?1",
            params![solution_id],
            Self::row_to_solution,
        )
        .optional()
    }

    fn row_to_solution(row: &rusqlite::Row) -> rusqlite::Result<Solution> {
        Ok(Solution {
            id: row.get(0)?,
            post_id: row.get(1)?,
            student_id: row.get(2)?,
            filename: row.get(3)?,
            content: row.get(4)?,
            timestamp: row.get(5)?,
            grade: row.get(6)?,
            feedback: row.get(7)?,
        })
    }

    pub fn assign_grade(&self, solution_id: i64, grade: f64) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE solutions SET grade = ?1 WHERE id = ?2", params![grade, solution_id])
    }

    pub fn add_feedback(&self, solution_id: i64, feedback: &str) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE solutions SET feedback = ?1 WHERE id = ?2", params![feedback, solution_id])
    }

    pub fn insert_query(
        &self,
        student_id: i64,
        content: &str,
        timestamp: i64,
        target: QueryTarget,
        llm_response: Option<&str>,
    ) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queries (student_id, content, timestamp, target, llm_response) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![student_id, content, timestamp, target.as_i64(), llm_response],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_llm_response(&self, query_id: i64, response: &str) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE queries SET llm_response = ?1 WHERE id = ?2", params![response, query_id])
    }

    pub fn list_queries(&self) -> rusqlite::Result<Vec<Query>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, student_id, content, timestamp, target, llm_response FROM queries ORDER BY id")?;
        let rows = stmt.query_map([], Self::row_to_query)?;
        rows.collect()
    }

    pub fn get_query(&self, query_id: i64) -> rusqlite::Result<Option<Query>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, student_id, content, timestamp, target, llm_response FROM queries WHERE id = ?1",
            params![query_id],
            Self::row_to_query,
        )
        .optional()
    }

    fn row_to_query(row: &rusqlite::Row) -> rusqlite::Result<Query> {
        Ok(Query {
            id: row.get(0)?,
            student_id: row.get(1)?,
            content: row.get(2)?,
            timestamp: row.get(3)?,
            target: QueryTarget::from_i64(row.get(4)?),
            llm_response: row.get(5)?,
        })
    }

    pub fn insert_reply(&self, query_id: i64, user_id: i64, content: &str, timestamp: i64) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO replies (query_id, user_id, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![query_id, user_id, content, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_replies_for_query(&self, query_id: i64) -> rusqlite::Result<Vec<Reply>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, query_id, user_id, content, timestamp FROM replies WHERE query_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![query_id], |row| {
            Ok(Reply { id: row.get(0)?, query_id: row.get(1)?, user_id: row.get(2)?, content: row.get(3)?, timestamp: row.get(4)? })
        })?;
        rows.collect()
    }

    /// All grades across all students, for an instructor's gradebook view.
    pub fn all_grades(&self) -> rusqlite::Result<Vec<Solution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, post_id, student_id, filename, content, timestamp, grade, feedback
             FROM solutions WHERE grade IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_solution)?;
        rows.collect()
    }
}
