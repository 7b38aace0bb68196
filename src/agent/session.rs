// Per-client agent sessions
//
// Each session owns its conversational memory and counters. Requests on the
// same session are serialized through the session mutex; different sessions
// run concurrently.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use uuid::Uuid;

use super::memory::MemoryContext;
use super::response::AgentStatus;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub messages_processed: u64,
    pub tools_executed: u64,
    pub reasoning_calls: u64,
    pub errors: u64,
    /// Seconds
    pub avg_response_time: f64,
}

impl SessionStats {
    pub fn record_message(&mut self, execution_time: f64, success: bool) {
        self.messages_processed += 1;
        if !success {
            self.errors += 1;
        }
        let n = self.messages_processed as f64;
        self.avg_response_time = (self.avg_response_time * (n - 1.0) + execution_time) / n;
    }
}

#[derive(Debug, Clone)]
pub struct AgentSession {
    pub id: String,
    pub memory: MemoryContext,
    pub status: AgentStatus,
    pub stats: SessionStats,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(id: impl Into<String>, memory_size: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            memory: MemoryContext::new(memory_size),
            status: AgentStatus::Idle,
            stats: SessionStats::default(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

pub type SharedSession = Arc<Mutex<AgentSession>>;

struct SessionEntry {
    session: SharedSession,
    last_activity: DateTime<Utc>,
}

impl SessionEntry {
    fn is_expired(&self, timeout_minutes: u64) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_activity);
        elapsed.num_minutes() >= timeout_minutes as i64
    }
}

/// Concurrent session map with expiry and a session cap
pub struct SessionManager {
    sessions: Arc<DashMap<String, SessionEntry>>,
    max_sessions: usize,
    timeout_minutes: u64,
    memory_size: usize,
}

impl SessionManager {
    /// Create the manager and start the expiry sweep
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(max_sessions: usize, timeout_minutes: u64, memory_size: usize) -> Self {
        let manager = Self {
            sessions: Arc::new(DashMap::new()),
            max_sessions,
            timeout_minutes,
            memory_size,
        };
        manager.start_cleanup_task();
        manager
    }

    /// Existing session for `session_id`, or a new one
    ///
    /// A caller-supplied id that is not known yet names the new session, so
    /// clients may choose their own ids.
    pub fn get_or_create(&self, session_id: Option<&str>) -> anyhow::Result<SharedSession> {
        if let Some(id) = session_id {
            if let Some(mut entry) = self.sessions.get_mut(id) {
                entry.last_activity = Utc::now();
                return Ok(Arc::clone(&entry.session));
            }
        }

        if self.sessions.len() >= self.max_sessions {
            anyhow::bail!(
                "Maximum session limit reached ({}/{})",
                self.sessions.len(),
                self.max_sessions
            );
        }

        let id = session_id
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_activity = Utc::now();
                return Ok(Arc::clone(&entry.get().session));
            }
            Entry::Vacant(entry) => {
                let session = Arc::new(Mutex::new(AgentSession::new(id.clone(), self.memory_size)));
                entry.insert(SessionEntry {
                    session: Arc::clone(&session),
                    last_activity: Utc::now(),
                });
                session
            }
        };

        // Concurrent creators may all pass the first check; the one that
        // lands past the cap backs out.
        if self.sessions.len() > self.max_sessions {
            self.sessions.remove(&id);
            anyhow::bail!("Maximum session limit reached ({})", self.max_sessions);
        }

        tracing::info!(session_id = %id, "Created new session");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.get(session_id).map(|e| Arc::clone(&e.session))
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    fn start_cleanup_task(&self) {
        let sessions = Arc::clone(&self.sessions);
        let timeout_minutes = self.timeout_minutes;

        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = cleanup_expired(&sessions, timeout_minutes);
                if removed > 0 {
                    tracing::info!(removed, active = sessions.len(), "Cleaned up expired sessions");
                }
            }
        });
    }
}

fn cleanup_expired(sessions: &DashMap<String, SessionEntry>, timeout_minutes: u64) -> usize {
    let expired: Vec<String> = sessions
        .iter()
        .filter(|entry| entry.value().is_expired(timeout_minutes))
        .map(|entry| entry.key().clone())
        .collect();

    let mut removed = 0;
    for session_id in expired {
        if sessions.remove(&session_id).is_some() {
            removed += 1;
            tracing::debug!(session_id = %session_id, "Removed expired session");
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_creation() {
        let manager = SessionManager::new(10, 30, 20);

        let first = manager.get_or_create(None).unwrap();
        let second = manager.get_or_create(None).unwrap();
        assert_eq!(manager.active_count(), 2);
        assert_ne!(first.lock().await.id, second.lock().await.id);
    }

    #[tokio::test]
    async fn test_session_retrieval_shares_memory() {
        let manager = SessionManager::new(10, 30, 20);

        let session = manager.get_or_create(Some("cliente-1")).unwrap();
        session
            .lock()
            .await
            .memory
            .add_message(crate::providers::ChatRole::User, "hola", None);

        let again = manager.get_or_create(Some("cliente-1")).unwrap();
        assert_eq!(again.lock().await.memory.len(), 1);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let manager = SessionManager::new(2, 30, 20);

        manager.get_or_create(None).unwrap();
        manager.get_or_create(None).unwrap();

        let result = manager.get_or_create(None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Maximum session limit"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_limit_under_concurrent_creates() {
        let manager = Arc::new(SessionManager::new(5, 30, 20));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create(None).is_ok() })
            })
            .collect();
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }

        assert!(manager.active_count() <= 5);
        assert!(created <= 5);
        assert_eq!(created, manager.active_count());
    }

    #[tokio::test]
    async fn test_session_deletion() {
        let manager = SessionManager::new(10, 30, 20);
        manager.get_or_create(Some("s1")).unwrap();

        assert!(manager.delete("s1"));
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.delete("s1"));
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept() {
        let manager = SessionManager::new(10, 0, 20);
        manager.get_or_create(Some("viejo")).unwrap();

        assert_eq!(cleanup_expired(&manager.sessions, 0), 1);
        assert!(manager.get("viejo").is_none());
    }

    #[test]
    fn test_stats_running_average() {
        let mut stats = SessionStats::default();
        stats.record_message(1.0, true);
        stats.record_message(3.0, false);
        assert_eq!(stats.messages_processed, 2);
        assert_eq!(stats.errors, 1);
        assert!((stats.avg_response_time - 2.0).abs() < 1e-9);
    }
}
