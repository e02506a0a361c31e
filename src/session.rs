//! Persisted injection sessions.
//!
//! Every scenario unit creates an [`InjectionSession`] record in the state
//! directory before injecting, rewrites it on every status transition, and
//! moves it to `archive/` once a terminal status is reached. A startup scan
//! over the live directory finds sessions left behind by a crash and hands
//! them to the Recovery Coordinator.

use crate::error::{FaultlineError, Result};
use crate::types::{SessionId, SessionStatus, TargetResource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One fault-injection session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionSession {
    /// Unique session ID.
    pub id: SessionId,
    /// Scenario this session runs.
    pub scenario: String,
    /// Primary resource under test.
    pub target: TargetResource,
    /// Session creation time.
    pub started_at: DateTime<Utc>,
    /// When the fault is planned to expire.
    pub planned_end: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Why the session aborted early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl InjectionSession {
    pub fn new(scenario: &str, target: TargetResource, planned_duration: Duration) -> Self {
        let started_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scenario: scenario.to_string(),
            target,
            started_at,
            planned_end: started_at
                + chrono::Duration::from_std(planned_duration)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0)),
            status: SessionStatus::Pending,
            abort_reason: None,
        }
    }
}

/// Filesystem-backed store for session records.
pub struct SessionStore {
    state_dir: PathBuf,
}

impl SessionStore {
    /// Open the store, creating the live and archive directories.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;
        std::fs::create_dir_all(state_dir.join("archive"))?;
        Ok(Self { state_dir })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.state_dir.join(format!("session-{}.json", id))
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.state_dir
            .join("archive")
            .join(format!("session-{}.json", id))
    }

    /// Write (or rewrite) a session record. Called on creation and on every
    /// status transition; the write goes through a temp file and rename so a
    /// crash never leaves a truncated record.
    pub fn persist(&self, session: &InjectionSession) -> Result<()> {
        let path = self.session_path(&session.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(
            session_id = %session.id,
            status = %session.status,
            "Persisted session record"
        );
        Ok(())
    }

    /// Transition a session to a new status and rewrite its record. Terminal
    /// statuses move the record into `archive/`.
    pub fn transition(&self, session: &mut InjectionSession, status: SessionStatus) -> Result<()> {
        session.status = status;
        self.persist(session)?;
        if status.is_terminal() {
            self.archive(&session.id)?;
        }
        Ok(())
    }

    /// Load one session by ID from the live directory.
    pub fn load(&self, id: &str) -> Result<InjectionSession> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(FaultlineError::SessionNotFound(id.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Move a terminal session record into `archive/`.
    pub fn archive(&self, id: &str) -> Result<()> {
        let from = self.session_path(id);
        if !from.exists() {
            return Err(FaultlineError::SessionNotFound(id.to_string()));
        }
        std::fs::rename(&from, self.archive_path(id))?;
        debug!(session_id = %id, "Archived session record");
        Ok(())
    }

    /// Scan the live directory for sessions that never reached a terminal
    /// status. Unreadable records are logged and skipped, not fatal; a stale
    /// record from an older build must not block recovery of the rest.
    pub fn scan_stale(&self) -> Result<Vec<InjectionSession>> {
        let mut stale = Vec::new();

        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session record");
                    continue;
                }
            };
            let session: InjectionSession = match serde_json::from_str(&content) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed session record");
                    continue;
                }
            };

            if !session.status.is_terminal() {
                info!(
                    session_id = %session.id,
                    scenario = %session.scenario,
                    status = %session.status,
                    "Found stale session from a previous run"
                );
                stale.push(session);
            }
        }

        stale.sort_by_key(|s| s.started_at);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn session() -> InjectionSession {
        InjectionSession::new(
            "service_stop",
            TargetResource::new("nginx"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_persist_and_load() {
        let (_dir, store) = store();
        let s = session();
        store.persist(&s).unwrap();

        let loaded = store.load(&s.id).unwrap();
        assert_eq!(loaded.id, s.id);
        assert_eq!(loaded.status, SessionStatus::Pending);
        assert_eq!(loaded.target, TargetResource::new("nginx"));
    }

    #[test]
    fn test_load_missing_session() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("no-such-id"),
            Err(FaultlineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_terminal_transition_archives() {
        let (dir, store) = store();
        let mut s = session();
        store.persist(&s).unwrap();

        store.transition(&mut s, SessionStatus::Active).unwrap();
        assert!(store.load(&s.id).is_ok());

        store.transition(&mut s, SessionStatus::Completed).unwrap();
        // Gone from the live dir, present under archive/.
        assert!(store.load(&s.id).is_err());
        assert!(dir
            .path()
            .join("archive")
            .join(format!("session-{}.json", s.id))
            .exists());
    }

    #[test]
    fn test_scan_finds_only_non_terminal() {
        let (_dir, store) = store();

        let mut active = session();
        store.persist(&active).unwrap();
        store.transition(&mut active, SessionStatus::Active).unwrap();

        let mut done = session();
        store.persist(&done).unwrap();
        store.transition(&mut done, SessionStatus::Completed).unwrap();

        let stale = store.scan_stale().unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, active.id);
    }

    #[test]
    fn test_scan_skips_malformed_records() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("session-bad.json"), "{not json").unwrap();

        let s = session();
        store.persist(&s).unwrap();

        let stale = store.scan_stale().unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, s.id);
    }
}
