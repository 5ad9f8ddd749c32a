use anyhow::{Context, Result};
use forum_core::posts::{self, CreatePostReq};
use forum_core::users::{self, AddUserRequest};
use forum_core::{ForumConfig, IndexError, PostId, Store, Txn, UserId};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use walkdir::WalkDir;

/// One item of a Hacker News style dump.
#[derive(Debug, Deserialize)]
pub struct InputPost {
    pub id: u64,
    #[serde(default)]
    pub by: String,
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
}

impl InputPost {
    fn content(&self) -> String {
        [self.title.as_str(), self.url.as_str(), self.text.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub files: usize,
    pub posts: usize,
    pub users_created: usize,
    pub skipped: usize,
}

pub fn collect_files(input: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
        files.sort();
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

pub fn read_records(file: &Path) -> Result<Vec<InputPost>> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        return Ok(records);
    }
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(items) => {
            Ok(items.into_iter().map(serde_json::from_value).collect::<Result<_, _>>()?)
        }
        obj @ serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(obj)?]),
        _ => Ok(Vec::new()),
    }
}

fn resolve_user(
    tx: &mut Txn<'_>,
    name: &str,
    known: &mut HashMap<String, UserId>,
    stats: &mut ImportStats,
) -> Result<Option<UserId>> {
    if let Some(&id) = known.get(name) {
        return Ok(Some(id));
    }
    let id = match users::find_user(tx, name)? {
        Some(user) => user.id,
        None => {
            let req = AddUserRequest { username: name.to_string(), email: format!("{name}.hn@example.com") };
            match users::add_user(tx, req) {
                Ok(user) => {
                    stats.users_created += 1;
                    user.id
                }
                Err(IndexError::UsernameInvalid) => {
                    tracing::warn!(username = name, "skipping author with unusable username");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    };
    known.insert(name.to_string(), id);
    Ok(Some(id))
}

/// Stores `records` oldest id first so parents land before their replies.
/// Parents outside the batch are dropped and the item becomes a top-level post.
pub fn import_records(tx: &mut Txn<'_>, mut records: Vec<InputPost>, config: &ForumConfig) -> Result<ImportStats> {
    records.sort_by_key(|r| r.id);
    let mut stats = ImportStats::default();
    let mut known_users = HashMap::new();
    let mut imported: HashMap<u64, PostId> = HashMap::new();

    for record in records {
        if record.by.is_empty() {
            tracing::warn!(id = record.id, "skipping item without an author");
            stats.skipped += 1;
            continue;
        }
        let Some(user_id) = resolve_user(tx, &record.by, &mut known_users, &mut stats)? else {
            stats.skipped += 1;
            continue;
        };
        let parent_id = match record.parent {
            Some(external) => {
                let mapped = imported.get(&external).copied();
                if mapped.is_none() {
                    tracing::warn!(id = record.id, parent = external, "parent not in this import");
                }
                mapped
            }
            None => None,
        };
        let created_at = OffsetDateTime::from_unix_timestamp(record.time)
            .with_context(|| format!("item {} has an invalid time", record.id))?;
        let req = CreatePostReq { user_id, parent_id, content: record.content() };
        let post = posts::create_post_at(tx, req, created_at, config)?;
        imported.insert(record.id, post.id);
        stats.posts += 1;
    }
    Ok(stats)
}

/// Imports every dump under `input` in one write transaction.
pub fn run_import(store: &Store, input: &Path, config: &ForumConfig) -> Result<ImportStats> {
    let files = collect_files(input);
    let mut records = Vec::new();
    for file in &files {
        records.extend(read_records(file)?);
    }
    let mut tx = store.write_tx();
    let mut stats = import_records(&mut tx, records, config)?;
    tx.commit()?;
    stats.files = files.len();
    tracing::info!(files = stats.files, posts = stats.posts, users = stats.users_created, skipped = stats.skipped, "import complete");
    Ok(stats)
}
