//! Session Registry - process-local mapping of session id to log state.
//!
//! The registry exclusively owns session state: each session binds an
//! opaque id to its own tabular store, the derived schema, a bounded
//! conversation history, and a ring of recent validation summaries.
//! Sessions are evicted once idle beyond the TTL; sweeping runs on the
//! shared scheduled executor.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use super::ingest::{IngestError, LogIngester};
use super::store::TabularStore;
use super::validator::ValidationSummary;
use crate::models::{ConversationTurn, IngestReport, LogSchema};
use crate::utils::ScheduledTask;

/// Validation summaries retained per session
const VALIDATION_HISTORY_LIMIT: usize = 50;

/// One server-side conversation bound to an ingested log.
///
/// The table set is fully established before `create` returns and is
/// read-only afterwards.
pub struct ChatSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    last_access: RwLock<DateTime<Utc>>,
    pub store: TabularStore,
    pub schema: LogSchema,
    pub ingest_report: IngestReport,
    history: Mutex<VecDeque<ConversationTurn>>,
    history_limit: usize,
    validations: Mutex<VecDeque<ValidationSummary>>,
    message_count: AtomicUsize,
    /// Serializes turns on this session: a new turn observes all effects
    /// of the previous one
    pub turn_gate: tokio::sync::Mutex<()>,
}

impl ChatSession {
    fn new(
        store: TabularStore,
        schema: LogSchema,
        ingest_report: IngestReport,
        history_limit: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_access: RwLock::new(now),
            store,
            schema,
            ingest_report,
            history: Mutex::new(VecDeque::new()),
            history_limit,
            validations: Mutex::new(VecDeque::new()),
            message_count: AtomicUsize::new(0),
            turn_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn touch(&self) {
        if let Ok(mut guard) = self.last_access.write() {
            *guard = Utc::now();
        }
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.last_access.read().map(|g| *g).unwrap_or(self.created_at)
    }

    pub fn is_expired(&self, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(self.last_access());
        idle.num_seconds() >= 0 && idle.num_seconds() as u64 > ttl_seconds
    }

    /// Append the final (user, assistant) pair of a completed turn,
    /// discarding turns beyond the trailing window
    pub fn append_exchange(&self, user_text: &str, assistant_text: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push_back(ConversationTurn::user(user_text));
            history.push_back(ConversationTurn::assistant(assistant_text));
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_snapshot(&self) -> Vec<ConversationTurn> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_validation(&self, summary: ValidationSummary) {
        if let Ok(mut ring) = self.validations.lock() {
            ring.push_back(summary);
            while ring.len() > VALIDATION_HISTORY_LIMIT {
                ring.pop_front();
            }
        }
    }

    pub fn validation_history(&self) -> Vec<ValidationSummary> {
        self.validations
            .lock()
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn available_tables(&self) -> Vec<String> {
        self.schema.values().map(|t| t.table.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub total_messages: usize,
    pub oldest_session_age_secs: Option<i64>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ChatSession>>,
    ttl_seconds: u64,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(ttl_seconds: u64, history_limit: usize) -> Self {
        Self { sessions: DashMap::new(), ttl_seconds, history_limit }
    }

    /// Ingest a parsed log and register a fresh session for it
    pub fn create(&self, log: &serde_json::Value) -> Result<Arc<ChatSession>, IngestError> {
        let store = TabularStore::new()?;
        let (schema, report) = LogIngester::ingest(log, &store)?;
        let session = Arc::new(ChatSession::new(store, schema, report, self.history_limit));
        tracing::info!(
            session_id = %session.id,
            tables = session.schema.len(),
            "Session created"
        );
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Look up a live session, refreshing its last-access time.
    /// Expired sessions are dropped on sight.
    pub fn get(&self, id: &str) -> Option<Arc<ChatSession>> {
        let session = self.sessions.get(id).map(|s| Arc::clone(&s))?;
        if session.is_expired(self.ttl_seconds, Utc::now()) {
            drop(self.sessions.remove(id));
            tracing::info!(session_id = %id, "Session expired on access");
            return None;
        }
        session.touch();
        Some(session)
    }

    /// Evict every session idle beyond the TTL; returns the eviction count
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired(self.ttl_seconds, now));
        let evicted = before - self.sessions.len();
        if evicted > 0 {
            tracing::info!("Swept {} expired sessions", evicted);
        }
        evicted
    }

    pub fn stats(&self) -> RegistryStats {
        let now = Utc::now();
        let mut total_messages = 0;
        let mut oldest: Option<i64> = None;
        for entry in self.sessions.iter() {
            let session = entry.value();
            total_messages += session.message_count();
            let age = now.signed_duration_since(session.created_at).num_seconds();
            oldest = Some(oldest.map_or(age, |o: i64| o.max(age)));
        }
        RegistryStats {
            active_sessions: self.sessions.len(),
            total_messages,
            oldest_session_age_secs: oldest,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Periodic eviction task driven by the scheduled executor
pub struct SessionSweeper {
    registry: Arc<SessionRegistry>,
}

impl SessionSweeper {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

impl ScheduledTask for SessionSweeper {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            self.registry.sweep();
            Ok(())
        })
    }
}
