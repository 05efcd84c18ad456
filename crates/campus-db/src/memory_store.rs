use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use campus_common::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::migrations::MEMORY_SCHEMA_V1;

/// Candidate rows scanned per recall before ranking.
const RECALL_SCAN_LIMIT: usize = 200;

/// Persisted memory entry used for prompt context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub kind: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Relevance assigned by the last recall; zero when not ranked.
    #[serde(default)]
    pub score: f32,
}

/// Insert shape for new memory records before persistence assigns ID/timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemoryEntry {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub kind: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallQuery {
    pub user_id: String,
    pub query_text: String,
    pub limit: usize,
}

/// Supplies ranked memory snippets for a `(query, user)` pair.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn remember(&self, entry: NewMemoryEntry) -> Result<String>;

    async fn recall(&self, query: RecallQuery) -> Result<Vec<MemoryEntry>>;
}

/// Backing store for per-user conversational memory.
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening memory store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open memory database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(MEMORY_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("memory migration failed: {e}")))?;
        Ok(())
    }

    pub fn insert(&self, entry: &NewMemoryEntry) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO memory_entries (id, user_id, conversation_id, content, kind, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    entry.user_id,
                    entry.conversation_id,
                    entry.content,
                    entry.kind,
                    entry.metadata.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert memory: {e}")))?;
        Ok(id)
    }

    /// Rank the user's recent entries by term overlap with the query.
    pub fn search(&self, query: &RecallQuery) -> Result<Vec<MemoryEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, conversation_id, content, kind, metadata, created_at
                 FROM memory_entries
                 WHERE user_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(format!("failed to prepare recall query: {e}")))?;

        let rows = stmt
            .query_map(
                params![query.user_id, RECALL_SCAN_LIMIT as i64],
                |row| {
                    let metadata_raw: String = row.get(5)?;
                    let created_raw: String = row.get(6)?;
                    Ok(MemoryEntry {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        conversation_id: row.get(2)?,
                        content: row.get(3)?,
                        kind: row.get(4)?,
                        metadata: serde_json::from_str(&metadata_raw)
                            .unwrap_or(serde_json::Value::Null),
                        created_at: parse_timestamp(&created_raw),
                        score: 0.0,
                    })
                },
            )
            .map_err(|e| Error::Database(format!("failed to recall memory: {e}")))?;

        let terms = query_terms(&query.query_text);
        let mut scored = Vec::new();
        for row in rows {
            let mut entry =
                row.map_err(|e| Error::Database(format!("failed to read memory row: {e}")))?;
            let hits = terms.iter().filter(|t| entry.content.contains(t.as_str())).count();
            if hits == 0 {
                continue;
            }
            entry.score = hits as f32 / terms.len().max(1) as f32;
            scored.push(entry);
        }

        // Stable sort keeps newest-first among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(query.limit);
        Ok(scored)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// `MemoryProvider` over a mutex-guarded SQLite store.
pub struct SqliteMemory {
    store: Arc<Mutex<MemoryStore>>,
}

impl SqliteMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }
}

#[async_trait]
impl MemoryProvider for SqliteMemory {
    async fn remember(&self, entry: NewMemoryEntry) -> Result<String> {
        self.store.lock().await.insert(&entry)
    }

    async fn recall(&self, query: RecallQuery) -> Result<Vec<MemoryEntry>> {
        self.store.lock().await.search(&query)
    }
}

/// Whitespace words plus CJK character bigrams, lowercased.
fn query_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation()) {
        let word = word.trim().to_lowercase();
        if word.is_empty() {
            continue;
        }
        let chars: Vec<char> = word.chars().collect();
        if chars.iter().any(|c| !c.is_ascii()) && chars.len() > 2 {
            for pair in chars.windows(2) {
                terms.push(pair.iter().collect());
            }
        } else if chars.len() >= 2 {
            terms.push(word);
        }
    }
    terms.sort();
    terms.dedup();
    terms
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
