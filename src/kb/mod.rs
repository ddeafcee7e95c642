//! Knowledge base interface
//!
//! The orchestrator consumes a narrow contract: add statements, query,
//! touch, list/resolve issues. The real storage engine is an external
//! collaborator; a JSONL-file backend ships so the daemon endpoints work
//! out of the box, and an in-memory backend backs tests.

pub mod ingest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum KbError {
    #[error("knowledge base IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("knowledge base record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no such record {0}")]
    NotFound(Uuid),
}

/// A remembered observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbStatement {
    pub id: Uuid,
    pub statement: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
    pub touch_count: u32,
}

/// A problem the knowledge pipeline wants a human decision on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbIssue {
    pub id: Uuid,
    pub title: String,
    pub detail: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// The contract the core consumes from the storage engine.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn add_statement(&self, statement: &str, source: &str) -> Result<KbStatement, KbError>;
    /// Statements matching a query, best first.
    async fn query(&self, q: &str, limit: usize) -> Result<Vec<KbStatement>, KbError>;
    async fn fetch(&self, id: Uuid) -> Result<Option<KbStatement>, KbError>;
    /// Mark a statement as used, refreshing its recency.
    async fn touch(&self, id: Uuid) -> Result<(), KbError>;
    async fn add_issue(&self, title: &str, detail: &str) -> Result<KbIssue, KbError>;
    async fn issues(&self) -> Result<Vec<KbIssue>, KbError>;
    async fn resolve_issue(&self, id: Uuid) -> Result<(), KbError>;

    /// Unresolved issue count, for the state snapshot.
    async fn open_issue_count(&self) -> Result<usize, KbError> {
        Ok(self.issues().await?.iter().filter(|i| !i.resolved).count())
    }
}

/// Open the default backend at the given path.
pub fn open(path: &Path) -> Result<std::sync::Arc<dyn KnowledgeBase>, KbError> {
    Ok(std::sync::Arc::new(JsonlKb::open(path)?))
}

#[derive(Debug, Default)]
struct KbData {
    statements: HashMap<Uuid, KbStatement>,
    issues: HashMap<Uuid, KbIssue>,
}

impl KbData {
    fn query(&self, q: &str, limit: usize) -> Vec<KbStatement> {
        let needle = q.to_lowercase();
        let mut hits: Vec<KbStatement> = self
            .statements
            .values()
            .filter(|s| needle.is_empty() || s.statement.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.touch_count
                .cmp(&a.touch_count)
                .then(b.touched_at.cmp(&a.touched_at))
        });
        hits.truncate(limit);
        hits
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum KbRecord {
    Statement(KbStatement),
    Issue(KbIssue),
}

/// Line-oriented JSON file backend. The whole store is loaded at open and
/// rewritten on mutation; observation stores stay small.
pub struct JsonlKb {
    path: PathBuf,
    data: Mutex<KbData>,
}

impl JsonlKb {
    pub fn open(path: &Path) -> Result<Self, KbError> {
        let mut data = KbData::default();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<KbRecord>(line)? {
                        KbRecord::Statement(s) => {
                            data.statements.insert(s.id, s);
                        }
                        KbRecord::Issue(i) => {
                            data.issues.insert(i.id, i);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &KbData) -> Result<(), KbError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for statement in data.statements.values() {
            out.push_str(&serde_json::to_string(&KbRecord::Statement(statement.clone()))?);
            out.push('\n');
        }
        for issue in data.issues.values() {
            out.push_str(&serde_json::to_string(&KbRecord::Issue(issue.clone()))?);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBase for JsonlKb {
    async fn add_statement(&self, statement: &str, source: &str) -> Result<KbStatement, KbError> {
        let record = new_statement(statement, source);
        let mut data = self.data.lock().unwrap();
        data.statements.insert(record.id, record.clone());
        self.persist(&data)?;
        Ok(record)
    }

    async fn query(&self, q: &str, limit: usize) -> Result<Vec<KbStatement>, KbError> {
        Ok(self.data.lock().unwrap().query(q, limit))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<KbStatement>, KbError> {
        Ok(self.data.lock().unwrap().statements.get(&id).cloned())
    }

    async fn touch(&self, id: Uuid) -> Result<(), KbError> {
        let mut data = self.data.lock().unwrap();
        let statement = data.statements.get_mut(&id).ok_or(KbError::NotFound(id))?;
        statement.touch_count += 1;
        statement.touched_at = Utc::now();
        self.persist(&data)
    }

    async fn add_issue(&self, title: &str, detail: &str) -> Result<KbIssue, KbError> {
        let issue = new_issue(title, detail);
        let mut data = self.data.lock().unwrap();
        data.issues.insert(issue.id, issue.clone());
        self.persist(&data)?;
        Ok(issue)
    }

    async fn issues(&self) -> Result<Vec<KbIssue>, KbError> {
        let mut issues: Vec<KbIssue> = self.data.lock().unwrap().issues.values().cloned().collect();
        issues.sort_by_key(|i| i.created_at);
        Ok(issues)
    }

    async fn resolve_issue(&self, id: Uuid) -> Result<(), KbError> {
        let mut data = self.data.lock().unwrap();
        let issue = data.issues.get_mut(&id).ok_or(KbError::NotFound(id))?;
        issue.resolved = true;
        self.persist(&data)
    }
}

/// Volatile backend for tests.
#[derive(Default)]
pub struct MemoryKb {
    data: Mutex<KbData>,
}

impl MemoryKb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeBase for MemoryKb {
    async fn add_statement(&self, statement: &str, source: &str) -> Result<KbStatement, KbError> {
        let record = new_statement(statement, source);
        self.data
            .lock()
            .unwrap()
            .statements
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn query(&self, q: &str, limit: usize) -> Result<Vec<KbStatement>, KbError> {
        Ok(self.data.lock().unwrap().query(q, limit))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<KbStatement>, KbError> {
        Ok(self.data.lock().unwrap().statements.get(&id).cloned())
    }

    async fn touch(&self, id: Uuid) -> Result<(), KbError> {
        let mut data = self.data.lock().unwrap();
        let statement = data.statements.get_mut(&id).ok_or(KbError::NotFound(id))?;
        statement.touch_count += 1;
        statement.touched_at = Utc::now();
        Ok(())
    }

    async fn add_issue(&self, title: &str, detail: &str) -> Result<KbIssue, KbError> {
        let issue = new_issue(title, detail);
        self.data.lock().unwrap().issues.insert(issue.id, issue.clone());
        Ok(issue)
    }

    async fn issues(&self) -> Result<Vec<KbIssue>, KbError> {
        let mut issues: Vec<KbIssue> = self.data.lock().unwrap().issues.values().cloned().collect();
        issues.sort_by_key(|i| i.created_at);
        Ok(issues)
    }

    async fn resolve_issue(&self, id: Uuid) -> Result<(), KbError> {
        let mut data = self.data.lock().unwrap();
        let issue = data.issues.get_mut(&id).ok_or(KbError::NotFound(id))?;
        issue.resolved = true;
        Ok(())
    }
}

fn new_statement(statement: &str, source: &str) -> KbStatement {
    let now = Utc::now();
    KbStatement {
        id: Uuid::new_v4(),
        statement: statement.to_string(),
        source: source.to_string(),
        created_at: now,
        touched_at: now,
        touch_count: 0,
    }
}

fn new_issue(title: &str, detail: &str) -> KbIssue {
    KbIssue {
        id: Uuid::new_v4(),
        title: title.to_string(),
        detail: detail.to_string(),
        resolved: false,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let kb = MemoryKb::new();
        let added = kb.add_statement("tests run with cargo nextest", "session x").await.unwrap();
        let hits = kb.query("nextest", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, added.id);
        assert!(kb.query("unrelated", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_touch_orders_results() {
        let kb = MemoryKb::new();
        let a = kb.add_statement("fact alpha", "s").await.unwrap();
        let b = kb.add_statement("fact beta", "s").await.unwrap();
        kb.touch(b.id).await.unwrap();
        let hits = kb.query("fact", 10).await.unwrap();
        assert_eq!(hits[0].id, b.id);
        assert_eq!(hits[1].id, a.id);
    }

    #[tokio::test]
    async fn test_touch_unknown_id() {
        let kb = MemoryKb::new();
        assert!(matches!(
            kb.touch(Uuid::new_v4()).await.unwrap_err(),
            KbError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_issue_lifecycle() {
        let kb = MemoryKb::new();
        let issue = kb.add_issue("conflicting facts", "a vs b").await.unwrap();
        assert_eq!(kb.open_issue_count().await.unwrap(), 1);
        kb.resolve_issue(issue.id).await.unwrap();
        assert_eq!(kb.open_issue_count().await.unwrap(), 0);
        assert!(kb.issues().await.unwrap()[0].resolved);
    }

    #[tokio::test]
    async fn test_jsonl_persists_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.db");

        let added = {
            let kb = JsonlKb::open(&path).unwrap();
            let added = kb.add_statement("persisted", "s").await.unwrap();
            kb.add_issue("pending", "detail").await.unwrap();
            added
        };

        let kb = JsonlKb::open(&path).unwrap();
        let fetched = kb.fetch(added.id).await.unwrap().unwrap();
        assert_eq!(fetched.statement, "persisted");
        assert_eq!(kb.issues().await.unwrap().len(), 1);
    }
}
