//! In-memory page sessions keyed by an opaque cookie id.
//!
//! A session ends once it has been idle longer than the store's TTL; expired
//! entries are swept whenever a new session is created.

use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::chat::ChatSession;
use crate::filter::FilterCriteria;
use crate::logging::{log, obj, v_num, Domain, Level};

pub const SESSION_COOKIE: &str = "sid";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3_600);

/// Chat and filter state are locked separately so a slow completion call
/// never holds up a filter submission of the same session.
#[derive(Debug, Default)]
pub struct Session {
    pub chat: AsyncMutex<ChatSession>,
    last_criteria: Mutex<Option<FilterCriteria>>,
}

impl Session {
    /// Selection shown back in the filter form.
    pub fn criteria(&self) -> Option<FilterCriteria> {
        lock(&self.last_criteria).clone()
    }

    pub fn remember_criteria(&self, criteria: FilterCriteria) {
        *lock(&self.last_criteria) = Some(criteria);
    }
}

pub type SharedSession = Arc<Session>;

#[derive(Debug)]
struct Entry {
    session: SharedSession,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Live session for `id`, refreshing its idle clock. Never creates one.
    pub fn get(&self, id: Option<&str>) -> Option<SharedSession> {
        self.get_at(id?, Instant::now())
    }

    fn get_at(&self, id: &str, now: Instant) -> Option<SharedSession> {
        let mut sessions = lock(&self.sessions);
        if now.saturating_duration_since(sessions.get(id)?.last_seen) > self.ttl {
            sessions.remove(id);
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.last_seen = now;
        Some(Arc::clone(&entry.session))
    }

    /// Live session for `id`, or a fresh one under a new id.
    /// The flag is true when a session was created.
    pub fn get_or_create(&self, id: Option<&str>) -> (String, SharedSession, bool) {
        self.get_or_create_at(id, Instant::now())
    }

    fn get_or_create_at(&self, id: Option<&str>, now: Instant) -> (String, SharedSession, bool) {
        if let Some(id) = id {
            if let Some(session) = self.get_at(id, now) {
                return (id.to_string(), session, false);
            }
        }

        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, e| now.saturating_duration_since(e.last_seen) <= self.ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            log(
                Level::Debug,
                Domain::Http,
                "sessions_expired",
                obj(&[("count", v_num(evicted as f64))]),
            );
        }

        let id = new_session_id();
        let session = Arc::new(Session::default());
        sessions.insert(
            id.clone(),
            Entry {
                session: Arc::clone(&session),
                last_seen: now,
            },
        );
        (id, session, true)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Value of the session cookie in a `Cookie` header.
pub fn session_id_from_cookie(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{SizeRange, StateSelection};

    #[test]
    fn same_id_returns_same_session() {
        let store = SessionStore::default();
        let (id, first, created) = store.get_or_create(None);
        assert!(created);
        let (again, second, created) = store.get_or_create(Some(&id));
        assert!(!created);
        assert_eq!(id, again);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_gets_fresh_session() {
        let store = SessionStore::default();
        let (id, _, created) = store.get_or_create(Some("stale"));
        assert!(created);
        assert_ne!(id, "stale");
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn lookup_never_creates() {
        let store = SessionStore::default();
        assert!(store.get(None).is_none());
        assert!(store.get(Some("nobody")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn idle_session_expires_and_id_is_replaced() {
        let store = SessionStore::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let (old_id, old, _) = store.get_or_create_at(None, t0);

        // Touched within the TTL: still alive, clock refreshed.
        let (_, same, created) = store.get_or_create_at(Some(&old_id), t0 + Duration::from_secs(50));
        assert!(!created);
        assert!(Arc::ptr_eq(&old, &same));

        let later = t0 + Duration::from_secs(50 + 61);
        assert!(store.get_at(&old_id, later).is_none());
        let (new_id, fresh, created) = store.get_or_create_at(Some(&old_id), later);
        assert!(created);
        assert_ne!(new_id, old_id);
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn creation_sweeps_expired_sessions() {
        let store = SessionStore::new(Duration::from_secs(10));
        let t0 = Instant::now();
        for _ in 0..100 {
            store.get_or_create_at(None, t0);
        }
        assert_eq!(store.len(), 100);
        store.get_or_create_at(None, t0 + Duration::from_secs(11));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn criteria_lock_is_independent_of_chat() {
        let session = Session::default();
        let _chat = session.chat.try_lock().unwrap();
        session.remember_criteria(FilterCriteria {
            state: StateSelection::Only("CA".into()),
            keyword: String::new(),
            size: SizeRange { min: 0, max: 10 },
            max_total_cost: 1.0,
        });
        assert_eq!(session.criteria().map(|c| c.state), Some(StateSelection::Only("CA".into())));
    }

    #[test]
    fn cookie_header_parsing() {
        assert_eq!(session_id_from_cookie("a=1; sid=abc; b=2"), Some("abc"));
        assert_eq!(session_id_from_cookie("sid="), None);
        assert_eq!(session_id_from_cookie("other=x"), None);
    }
}
