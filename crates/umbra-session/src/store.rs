//! On-disk session persistence
//!
//! One JSON file per session under the store root, named
//! `session_{id}.json`. The file's mtime is the authoritative expiry clock;
//! a session idle past the timeout is deleted by `cleanup_expired`. An
//! in-memory cache fronts the directory for `info`/`list` and is capped at
//! `max_sessions` entries.
//!
//! Mutators are serialized per session id. Readers can race with writers and
//! therefore skip files that are missing or transiently invalid.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cookies::CookieRecord;
use crate::error::{SessionError, SessionResult};
use crate::epoch_now;

/// Serialized session state, with runtime handles omitted and cookies in
/// neutral record form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentSession {
    pub session_id: String,
    pub profile_name: String,
    pub user_agent: String,
    pub start_time: f64,
    pub last_activity: f64,
    pub pages_visited: u64,
    pub actions_performed: Vec<String>,
    pub cookies: Vec<CookieRecord>,
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    #[serde(default)]
    pub session_storage: HashMap<String, String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub language: String,
    pub timezone: String,
}

/// Where a listed session currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Memory,
    Disk,
}

/// Lightweight view of a session for `info`/`list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub profile_name: String,
    pub start_time: f64,
    pub last_activity: f64,
    pub pages_visited: u64,
    pub actions_count: usize,
    pub is_active: bool,
    pub storage: StorageTier,
}

/// Persists session state on disk with TTL expiry.
pub struct SessionStore {
    root: PathBuf,
    session_timeout: Duration,
    max_sessions: usize,
    active: DashMap<String, PersistentSession>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionStore {
    /// Open a store rooted at `root` (created if absent).
    pub fn new(root: impl Into<PathBuf>, session_timeout: Duration) -> SessionResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "session store opened");
        Ok(Self {
            root,
            session_timeout,
            max_sessions: 1000,
            active: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    /// Idle threshold after which a session is considered expired.
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Save a session, overwriting any previous file.
    pub async fn save(&self, mut session: PersistentSession) -> SessionResult<()> {
        let session_id = session.session_id.clone();
        let path = self.session_path(&session_id)?;
        let guard = self.lock_for(&session_id);
        let _held = guard.lock().await;

        session.last_activity = epoch_now();
        let bytes = serde_json::to_vec_pretty(&session)?;
        tokio::fs::write(&path, bytes).await?;

        self.cache_insert(session);
        debug!(session_id = %session_id, "session saved");
        Ok(())
    }

    /// Load a session by id. Returns `None` for unknown, expired, or
    /// unreadable sessions.
    pub async fn load(&self, session_id: &str) -> SessionResult<Option<PersistentSession>> {
        if let Some(entry) = self.active.get(session_id) {
            return Ok(Some(entry.clone()));
        }

        let path = self.session_path(session_id)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => return Ok(None),
        };
        if self.mtime_expired(&metadata) {
            return Ok(None);
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        match serde_json::from_slice::<PersistentSession>(&bytes) {
            Ok(session) => {
                self.cache_insert(session.clone());
                Ok(Some(session))
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "skipping unreadable session file");
                Ok(None)
            }
        }
    }

    /// Delete a session from memory and disk.
    pub async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let path = self.session_path(session_id)?;
        let guard = self.lock_for(session_id);
        let _held = guard.lock().await;

        self.active.remove(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SessionError::Io(e)),
        }
        debug!(session_id = %session_id, "session deleted");
        Ok(())
    }

    /// Summary of one session without fully deserializing hot paths.
    pub async fn info(&self, session_id: &str) -> Option<SessionSummary> {
        if let Some(entry) = self.active.get(session_id) {
            return Some(self.summarize(&entry, StorageTier::Memory));
        }

        let path = self.session_path(session_id).ok()?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        let session: PersistentSession = serde_json::from_slice(&bytes).ok()?;
        Some(self.summarize(&session, StorageTier::Disk))
    }

    /// List all sessions (memory first, then disk-only files), most recent
    /// activity first. Unreadable files are skipped.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: HashMap<String, SessionSummary> = HashMap::new();

        for entry in self.active.iter() {
            summaries.insert(
                entry.key().clone(),
                self.summarize(entry.value(), StorageTier::Memory),
            );
        }

        if let Ok(mut dir) = tokio::fs::read_dir(&self.root).await {
            while let Ok(Some(entry)) = dir.next_entry().await {
                let Some(session_id) = session_id_from_path(&entry.path()) else {
                    continue;
                };
                if summaries.contains_key(&session_id) {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(entry.path()).await else {
                    continue;
                };
                let Ok(session) = serde_json::from_slice::<PersistentSession>(&bytes) else {
                    continue;
                };
                summaries.insert(session_id, self.summarize(&session, StorageTier::Disk));
            }
        }

        let mut list: Vec<SessionSummary> = summaries.into_values().collect();
        list.sort_by(|a, b| {
            b.last_activity
                .partial_cmp(&a.last_activity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        list
    }

    /// Delete expired sessions from memory and disk. Returns the number of
    /// entries removed. File mtime is authoritative for on-disk expiry.
    pub async fn cleanup_expired(&self) -> usize {
        let now = epoch_now();
        let timeout = self.session_timeout.as_secs_f64();
        let mut deleted = 0usize;

        let expired_ids: Vec<String> = self
            .active
            .iter()
            .filter(|entry| now - entry.value().last_activity > timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in expired_ids {
            self.active.remove(&session_id);
            deleted += 1;
        }

        if let Ok(mut dir) = tokio::fs::read_dir(&self.root).await {
            while let Ok(Some(entry)) = dir.next_entry().await {
                if session_id_from_path(&entry.path()).is_none() {
                    continue;
                }
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                if self.mtime_expired(&metadata)
                    && tokio::fs::remove_file(entry.path()).await.is_ok()
                {
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            debug!(deleted, "cleaned up expired sessions");
        }
        deleted
    }

    fn summarize(&self, session: &PersistentSession, storage: StorageTier) -> SessionSummary {
        let now = epoch_now();
        SessionSummary {
            session_id: session.session_id.clone(),
            profile_name: session.profile_name.clone(),
            start_time: session.start_time,
            last_activity: session.last_activity,
            pages_visited: session.pages_visited,
            actions_count: session.actions_performed.len(),
            is_active: now - session.last_activity < self.session_timeout.as_secs_f64(),
            storage,
        }
    }

    fn cache_insert(&self, session: PersistentSession) {
        // Bound the cache: drop the stalest entry when full.
        if self.active.len() >= self.max_sessions && !self.active.contains_key(&session.session_id)
        {
            let stalest = self
                .active
                .iter()
                .min_by(|a, b| {
                    a.value()
                        .last_activity
                        .partial_cmp(&b.value().last_activity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|entry| entry.key().clone());
            if let Some(key) = stalest {
                self.active.remove(&key);
            }
        }
        self.active.insert(session.session_id.clone(), session);
    }

    fn mtime_expired(&self, metadata: &std::fs::Metadata) -> bool {
        match metadata.modified() {
            Ok(modified) => match SystemTime::now().duration_since(modified) {
                Ok(age) => age > self.session_timeout,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_path(&self, session_id: &str) -> SessionResult<PathBuf> {
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            || session_id.contains("..")
        {
            return Err(SessionError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.root.join(format!("session_{session_id}.json")))
    }
}

fn session_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    stem.strip_prefix("session_").map(|s| s.to_string())
}
