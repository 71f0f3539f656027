//! Per-user conversation threads.
//!
//! A thread is created on first use and lives until it is removed or
//! evicted. Its `tokio::sync::Mutex` is held for a whole pipeline run, so
//! turns of one session are strictly ordered while different sessions run
//! side by side.
//!
//! Creating a session first drops threads idle for longer than the idle TTL,
//! then, while the store is at capacity, the least recently used ones. A
//! thread some request still holds is never evicted, so the cap can be
//! exceeded by the number of sessions with a run in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{Decision, PipelineResponse, TurnContext};

pub const DEFAULT_TURN_LIMIT: usize = 20;
pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRecord {
    pub user_message: String,
    pub decision: Option<Decision>,
    pub final_sql: Option<String>,
    pub result_summary: String,
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    turns: VecDeque<TurnRecord>,
    turn_limit: usize,
}

impl ConversationThread {
    #[must_use]
    pub fn new(turn_limit: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            turn_limit: turn_limit.max(1),
        }
    }

    #[must_use]
    pub fn turns(&self) -> &VecDeque<TurnRecord> {
        &self.turns
    }

    /// Context the next run starts from: the most recent question, the most
    /// recent SQL and the most recent result summary, each taken from the
    /// latest turn that has one.
    #[must_use]
    pub fn context(&self) -> TurnContext {
        let latest = |pick: fn(&TurnRecord) -> Option<&str>| {
            self.turns
                .iter()
                .rev()
                .find_map(pick)
                .unwrap_or_default()
                .to_string()
        };
        TurnContext {
            last_query: latest(|turn| Some(turn.user_message.as_str())),
            last_sql: latest(|turn| turn.final_sql.as_deref()),
            last_result_summary: latest(|turn| {
                Some(turn.result_summary.as_str()).filter(|summary| !summary.is_empty())
            }),
        }
    }

    /// Records a finished run. Failed runs keep the question but not their
    /// SQL or summary.
    pub fn record(&mut self, user_message: &str, response: &PipelineResponse) {
        let succeeded = !response.is_failure();
        let final_sql = response
            .sql_debug
            .final_sql
            .clone()
            .filter(|_| succeeded && response.result.is_some());
        let result_summary = if succeeded {
            response
                .explanation
                .as_ref()
                .map(|explanation| explanation.result_summary.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        self.turns.push_back(TurnRecord {
            user_message: user_message.to_string(),
            decision: response.decision,
            final_sql,
            result_summary,
        });
        while self.turns.len() > self.turn_limit {
            self.turns.pop_front();
        }
    }
}

pub type SharedThread = Arc<Mutex<ConversationThread>>;

#[derive(Debug)]
struct SessionEntry {
    thread: SharedThread,
    last_used: Instant,
}

impl SessionEntry {
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.thread) > 1
    }
}

#[derive(Debug)]
pub struct SessionStore {
    threads: DashMap<String, SessionEntry>,
    turn_limit: usize,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_TURN_LIMIT)
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(turn_limit: usize) -> Self {
        Self {
            threads: DashMap::new(),
            turn_limit,
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_ttl: DEFAULT_SESSION_IDLE_TTL,
        }
    }

    #[must_use]
    pub fn with_eviction(mut self, max_sessions: usize, idle_ttl: Duration) -> Self {
        self.max_sessions = max_sessions.max(1);
        self.idle_ttl = idle_ttl;
        self
    }

    /// The user's thread, created on first use. A blank user id maps to the
    /// default session.
    #[must_use]
    pub fn thread(&self, user: &str) -> SharedThread {
        let key = session_key(user);
        let now = Instant::now();
        if let Some(mut entry) = self.threads.get_mut(&key) {
            entry.last_used = now;
            return Arc::clone(&entry.thread);
        }

        self.evict(now);
        let mut entry = self.threads.entry(key).or_insert_with(|| SessionEntry {
            thread: Arc::new(Mutex::new(ConversationThread::new(self.turn_limit))),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.thread)
    }

    /// Ends a session. Returns whether it existed.
    pub fn remove(&self, user: &str) -> bool {
        self.threads.remove(&session_key(user)).is_some()
    }

    #[must_use]
    pub fn contains(&self, user: &str) -> bool {
        self.threads.contains_key(&session_key(user))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    fn evict(&self, now: Instant) {
        let before = self.threads.len();
        self.threads.retain(|_, entry| {
            entry.in_use() || now.saturating_duration_since(entry.last_used) < self.idle_ttl
        });

        while self.threads.len() >= self.max_sessions {
            let oldest = self
                .threads
                .iter()
                .filter(|entry| !entry.in_use())
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            let Some(key) = oldest else {
                break;
            };
            self.threads.remove(&key);
        }

        let evicted = before.saturating_sub(self.threads.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.threads.len(), "evicted idle sessions");
        }
    }
}

fn session_key(user: &str) -> String {
    let trimmed = user.trim();
    if trimmed.is_empty() {
        DEFAULT_USER.to_string()
    } else {
        trimmed.to_string()
    }
}
