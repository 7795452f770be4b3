//! Per-project conversation history.
//!
//! One JSON file per conversation under
//! `<root>/<project-slug>/<timestamp>.json`, where the slug combines the
//! sanitized project basename with a short hash of its absolute path so
//! same-named projects do not collide.

use crate::StoreError;
use axe_core::types::{Message, Role};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";
const SUMMARY_CHARS: usize = 50;

/// One stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_dir: String,
    pub messages: Vec<Message>,
}

pub struct HistoryStore {
    dir: PathBuf,
    project_dir: String,
}

fn project_slug(dir: &str) -> String {
    let base = Path::new(dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut slug: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if slug.is_empty() {
        slug = "default".to_string();
    }
    let digest = Sha256::digest(dir.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{slug}-{}", &hex[..8])
}

impl HistoryStore {
    /// Store rooted at `<home>/.axe/history` for the given project.
    pub fn for_project(project_dir: &str) -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".axe")
            .join("history");
        Self::new(root, project_dir)
    }

    pub fn new(root: PathBuf, project_dir: &str) -> Self {
        let dir = if project_dir.is_empty() {
            root
        } else {
            root.join(project_slug(project_dir))
        };
        Self {
            dir,
            project_dir: project_dir.to_string(),
        }
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        if !self.project_dir.is_empty() {
            fs::write(self.dir.join(".project"), &self.project_dir).await?;
        }
        Ok(())
    }

    /// Path for a new conversation file, named by the current timestamp.
    pub async fn new_file_path(&self) -> Result<PathBuf, StoreError> {
        self.ensure_dir().await?;
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        Ok(self.dir.join(format!("{stamp}.json")))
    }

    /// Write the conversation to `path`. An existing record keeps its
    /// `created_at`; `updated_at` always moves to now.
    pub async fn save_to(&self, path: &Path, messages: &[Message]) -> Result<(), StoreError> {
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let created_at = match fs::read_to_string(path).await {
            Ok(data) => serde_json::from_str::<Record>(&data)
                .map(|r| r.created_at)
                .unwrap_or_else(|_| now.clone()),
            Err(_) => now.clone(),
        };
        let record = Record {
            created_at,
            updated_at: now,
            project_dir: self.project_dir.clone(),
            messages: messages.to_vec(),
        };
        let data = serde_json::to_string_pretty(&record)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        fs::write(path, data).await?;
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn load_file(path: &Path) -> Result<Record, StoreError> {
        let data = fs::read_to_string(path).await?;
        serde_json::from_str(&data).map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// The lexicographically last (newest) conversation.
    pub async fn load_latest(&self) -> Result<(PathBuf, Vec<Message>), StoreError> {
        let files = self.list_files().await?;
        let path = files.last().ok_or(StoreError::NoHistory)?.clone();
        let record = Self::load_file(&path).await?;
        Ok((path, record.messages))
    }

    /// The `index`-th (1-based) conversation in sorted order.
    pub async fn load_by_index(&self, index: usize) -> Result<(PathBuf, Vec<Message>), StoreError> {
        let files = self.list_files().await?;
        if files.is_empty() {
            return Err(StoreError::NoHistory);
        }
        if index < 1 || index > files.len() {
            return Err(StoreError::InvalidIndex {
                index,
                len: files.len(),
            });
        }
        let path = files[index - 1].clone();
        let record = Self::load_file(&path).await?;
        Ok((path, record.messages))
    }

    /// One summary line per conversation for the most recent `n`.
    pub async fn list_recent(&self, n: usize) -> Result<Vec<String>, StoreError> {
        let files = self.list_files().await?;
        if files.is_empty() {
            return Ok(vec!["No history found.".to_string()]);
        }
        let start = files.len().saturating_sub(n);
        let mut lines = Vec::new();
        for (i, path) in files[start..].iter().enumerate() {
            let Ok(record) = Self::load_file(path).await else {
                continue;
            };
            let summary = first_user_text(&record)
                .map(|text| truncate_chars(&text, SUMMARY_CHARS))
                .unwrap_or_else(|| "(empty)".to_string());
            let stamp = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            lines.push(format!("  [{}] {stamp}  {summary}", start + i + 1));
        }
        Ok(lines)
    }

    /// Substring scan across stored conversations; newest first, up to `n`
    /// results.
    pub async fn search(&self, keyword: &str, n: usize) -> Result<Vec<String>, StoreError> {
        let files = self.list_files().await?;
        let mut results = Vec::new();
        for (idx, path) in files.iter().enumerate().rev() {
            if results.len() >= n {
                break;
            }
            let Ok(record) = Self::load_file(path).await else {
                continue;
            };
            let matched = record.messages.iter().any(|m| {
                m.content
                    .iter()
                    .any(|b| b.text.contains(keyword) || b.content.contains(keyword))
            });
            if matched {
                let summary = first_user_text(&record)
                    .map(|text| truncate_chars(&text, SUMMARY_CHARS))
                    .unwrap_or_else(|| "(empty)".to_string());
                let stamp = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                results.push(format!("  [{}] {stamp}  {summary}", idx + 1));
            }
        }
        Ok(results)
    }
}

fn first_user_text(record: &Record) -> Option<String> {
    for message in &record.messages {
        if message.role != Role::User {
            continue;
        }
        for block in &message.content {
            if block.block_type == "text" && !block.text.is_empty() {
                return Some(block.text.clone());
            }
        }
    }
    None
}

fn truncate_chars(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}...", &s[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axe_core::types::ContentBlock;

    fn conversation(text: &str) -> Vec<Message> {
        vec![
            Message::user_text(text),
            Message::assistant(vec![ContentBlock::text("done")]),
        ]
    }

    fn store(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::new(dir.path().join("history"), "/work/myproject")
    }

    #[test]
    fn slug_is_sanitized_basename_plus_hash() {
        let slug = project_slug("/work/my project!");
        let (name, hash) = slug.rsplit_once('-').expect("slug has hash suffix");
        assert_eq!(name, "myproject");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        // Same basename, different path: different slug.
        assert_ne!(project_slug("/a/app"), project_slug("/b/app"));
        // Fully non-ASCII basenames fall back.
        assert!(project_slug("/work/项目").starts_with("default-"));
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.new_file_path().await.unwrap();
        let messages = conversation("build the parser");

        store.save_to(&path, &messages).await.unwrap();

        let (latest_path, loaded) = store.load_latest().await.unwrap();
        assert_eq!(latest_path, path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content[0].text, "build the parser");

        // The project meta file is written alongside.
        let meta = std::fs::read_to_string(path.parent().unwrap().join(".project")).unwrap();
        assert_eq!(meta, "/work/myproject");
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.new_file_path().await.unwrap();

        store.save_to(&path, &conversation("one")).await.unwrap();
        let first: Record =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        // Rewrite the file with a forged old created_at, then update.
        let mut forged = first.clone();
        forged.created_at = "2020-01-01_000000".to_string();
        std::fs::write(&path, serde_json::to_string(&forged).unwrap()).unwrap();

        store.save_to(&path, &conversation("two")).await.unwrap();
        let second: Record =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(second.created_at, "2020-01-01_000000");
        assert_ne!(second.updated_at, "2020-01-01_000000");
        assert_eq!(second.messages[0].content[0].text, "two");
    }

    #[tokio::test]
    async fn load_by_index_is_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.ensure_dir().await.unwrap();
        for (name, text) in [("a.json", "first"), ("b.json", "second")] {
            let path = store.dir.join(name);
            store.save_to(&path, &conversation(text)).await.unwrap();
        }

        let (_, msgs) = store.load_by_index(1).await.unwrap();
        assert_eq!(msgs[0].content[0].text, "first");
        let (_, msgs) = store.load_by_index(2).await.unwrap();
        assert_eq!(msgs[0].content[0].text, "second");

        let err = store.load_by_index(3).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIndex { index: 3, len: 2 }));
        let err = store.load_by_index(0).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIndex { index: 0, len: 2 }));
    }

    #[tokio::test]
    async fn empty_store_behaviors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.load_latest().await.unwrap_err(),
            StoreError::NoHistory
        ));
        let lines = store.list_recent(10).await.unwrap();
        assert_eq!(lines, ["No history found."]);
        assert!(store.search("anything", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_recent_truncates_summary_to_fifty_chars() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.new_file_path().await.unwrap();
        let long = "修".repeat(60);
        store.save_to(&path, &conversation(&long)).await.unwrap();

        let lines = store.list_recent(10).await.unwrap();
        assert_eq!(lines.len(), 1);
        let summary = lines[0].rsplit("  ").next().unwrap();
        assert!(summary.ends_with("..."));
        let chars = summary.trim_end_matches("...").chars().count();
        assert_eq!(chars, 50);
    }

    #[tokio::test]
    async fn search_finds_substring_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.ensure_dir().await.unwrap();
        store
            .save_to(&store.dir.join("a.json"), &conversation("refactor the lexer"))
            .await
            .unwrap();
        store
            .save_to(&store.dir.join("b.json"), &conversation("fix login bug"))
            .await
            .unwrap();

        let hits = store.search("lexer", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].contains("refactor the lexer"));

        assert!(store.search("postgres", 10).await.unwrap().is_empty());
    }
}
