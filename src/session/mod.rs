//! Server-side session storage.
//!
//! Sessions are started lazily: the first hive access under `SESSION`
//! opens (or mints) one. The dispatcher commits mutations back at request
//! teardown and at long-poll yield points.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::hive::value::Value;

/// Cookie under which the session id travels.
pub const SESSION_COOKIE: &str = "sid";

type SessionData = BTreeMap<String, Value>;

/// In-process session store keyed by session id.
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<String, SessionData>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open the session for `sid`, minting a fresh one when the id is
    /// missing or unknown. Returns `(sid, data, fresh)`.
    pub fn open(&self, sid: Option<&str>) -> (String, SessionData, bool) {
        if let Some(sid) = sid {
            if let Some(data) = self.sessions.get(sid) {
                return (sid.to_string(), data.value().clone(), false);
            }
        }
        let sid = Uuid::new_v4().simple().to_string();
        self.sessions.insert(sid.clone(), SessionData::new());
        (sid, SessionData::new(), true)
    }

    pub fn commit(&self, sid: &str, data: SessionData) {
        self.sessions.insert(sid.to_string(), data);
    }

    pub fn destroy(&self, sid: &str) {
        self.sessions.remove(sid);
    }

    pub fn live(&self, sid: &str) -> bool {
        self.sessions.contains_key(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_commit_reopen() {
        let mgr = SessionManager::new();
        let (sid, mut data, fresh) = mgr.open(None);
        assert!(fresh);
        data.insert("hello".into(), Value::Str("world".into()));
        mgr.commit(&sid, data);
        let (sid2, data, fresh) = mgr.open(Some(&sid));
        assert_eq!(sid, sid2);
        assert!(!fresh);
        assert_eq!(data.get("hello"), Some(&Value::Str("world".into())));
    }

    #[test]
    fn destroy_forgets_everything() {
        let mgr = SessionManager::new();
        let (sid, _, _) = mgr.open(None);
        mgr.destroy(&sid);
        assert!(!mgr.live(&sid));
        let (_, data, fresh) = mgr.open(Some(&sid));
        assert!(fresh);
        assert!(data.is_empty());
    }
}
