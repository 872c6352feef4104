//! Per-session turn history.
//!
//! Each `session_id` owns its own bounded queue of turns; sessions never
//! see each other's history. The oldest turn is dropped once a session
//! holds `max_turns`.
//!
//! Sessions live in a `moka` cache capped at `max_sessions` entries and
//! expire after `idle` without a query, so anonymous callers that get a
//! fresh session id per query cannot grow the store without bound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::sync::Cache;

use crate::model::{SessionContext, Turn};

type Turns = Arc<Mutex<VecDeque<Turn>>>;

pub struct SessionStore {
    sessions: Cache<String, Turns>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize, max_sessions: u64, idle: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(max_sessions)
            .time_to_idle(idle)
            .build();
        Self {
            sessions,
            max_turns,
        }
    }

    /// Context for the next query of `session_id`, carrying its history.
    pub fn context(&self, session_id: &str, user_id: &str) -> SessionContext {
        let mut ctx = SessionContext::new(session_id, user_id);
        if let Some(turns) = self.sessions.get(session_id) {
            if let Ok(turns) = turns.lock() {
                ctx.history = turns.iter().cloned().collect();
            }
        }
        ctx
    }

    pub fn record(&self, session_id: &str, turn: Turn) {
        if self.max_turns == 0 {
            return;
        }
        let turns = self
            .sessions
            .get_with(session_id.to_string(), || Arc::new(Mutex::new(VecDeque::new())));
        let Ok(mut turns) = turns.lock() else {
            return;
        };
        turns.push_back(turn);
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// Live sessions, after pending evictions have been applied.
    pub fn session_count(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str) -> Turn {
        Turn {
            query: q.to_string(),
            response: format!("re: {q}"),
        }
    }

    fn store(max_turns: usize, max_sessions: u64) -> SessionStore {
        SessionStore::new(max_turns, max_sessions, Duration::from_secs(3600))
    }

    #[test]
    fn sessions_are_isolated() {
        let store = store(5, 100);
        store.record("a", turn("one"));
        store.record("b", turn("two"));
        let a = store.context("a", "u");
        assert_eq!(a.history.len(), 1);
        assert_eq!(a.history[0].query, "one");
        assert!(store.context("c", "u").history.is_empty());
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn history_is_bounded_oldest_first_out() {
        let store = store(2, 100);
        for q in ["1", "2", "3"] {
            store.record("s", turn(q));
        }
        let queries: Vec<String> = store.context("s", "u").history.into_iter().map(|t| t.query).collect();
        assert_eq!(queries, vec!["2", "3"]);
    }

    #[test]
    fn session_count_is_capped() {
        let store = store(5, 4);
        for i in 0..50 {
            store.record(&format!("anon-{i}"), turn("hi"));
        }
        assert!(store.session_count() <= 4);
    }

    #[test]
    fn idle_sessions_expire() {
        let store = SessionStore::new(5, 100, Duration::from_millis(50));
        store.record("s", turn("hi"));
        std::thread::sleep(Duration::from_millis(120));
        assert!(store.context("s", "u").history.is_empty());
        assert_eq!(store.session_count(), 0);
    }
}
