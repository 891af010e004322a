//! Connection registry for session and identity tracking.
//!
//! Maps live sessions to the user they asserted with `hello`, and users back
//! to their session so pushes can be routed in O(1). A user has at most one
//! live session; a second `hello` for the same user is refused.

use std::collections::HashMap;

use hushline_proto::UserId;

/// Information about a registered session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// User ID bound by `hello`
    pub user_id: Option<UserId>,
    /// Whether the session has completed `hello`
    pub authenticated: bool,
}

impl SessionInfo {
    /// Create a new unauthenticated session info.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an authenticated session info with user ID.
    pub fn authenticated(user_id: UserId) -> Self {
        Self { user_id: Some(user_id), authenticated: true }
    }

    /// The bound user, only once authenticated.
    pub fn authenticated_user(&self) -> Option<UserId> {
        self.user_id.filter(|_| self.authenticated)
    }
}

/// Registry for tracking sessions and their bound users.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Session ID → session info
    sessions: HashMap<u64, SessionInfo>,
    /// User ID → session ID (reverse index). Enforces one session per user
    user_sessions: HashMap<UserId, u64>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// Returns `false` if the session already exists, or if `info` names a
    /// user that already has another session.
    pub fn register_session(&mut self, session_id: u64, info: SessionInfo) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        if let Some(user_id) = info.user_id {
            if self.user_sessions.contains_key(&user_id) {
                return false;
            }
            self.user_sessions.insert(user_id, session_id);
        }

        self.sessions.insert(session_id, info);
        true
    }

    /// Unregister a session, releasing its user binding.
    pub fn unregister_session(&mut self, session_id: u64) -> Option<SessionInfo> {
        let info = self.sessions.remove(&session_id)?;

        if let Some(user_id) = info.user_id {
            // Only drop the reverse entry if it still points here
            if self.user_sessions.get(&user_id) == Some(&session_id) {
                self.user_sessions.remove(&user_id);
            }
        }

        Some(info)
    }

    /// Session metadata. `None` if session doesn't exist.
    pub fn sessions(&self, session_id: u64) -> Option<&SessionInfo> {
        self.sessions.get(&session_id)
    }

    /// Check if a session is registered.
    pub fn has_session(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Update session info while maintaining the reverse index.
    ///
    /// Returns `false` if the session doesn't exist or the new user is
    /// already bound to a different session.
    pub fn update_session_info(&mut self, session_id: u64, new_info: SessionInfo) -> bool {
        let Some(old_info) = self.sessions.get(&session_id).cloned() else {
            return false;
        };

        if let Some(new_user_id) = new_info.user_id
            && Some(new_user_id) != old_info.user_id
            && self.user_sessions.contains_key(&new_user_id)
        {
            return false;
        }

        if let Some(old_user_id) = old_info.user_id {
            self.user_sessions.remove(&old_user_id);
        }
        if let Some(new_user_id) = new_info.user_id {
            self.user_sessions.insert(new_user_id, session_id);
        }

        self.sessions.insert(session_id, new_info);
        true
    }

    /// Find the live session of a user. O(1) via the reverse index.
    pub fn session_id_for_user(&self, user_id: UserId) -> Option<u64> {
        self.user_sessions.get(&user_id).copied()
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_session() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.register_session(1, SessionInfo::new()));
        assert!(registry.has_session(1));
        assert!(!registry.has_session(2));

        let info = registry.sessions(1).unwrap();
        assert!(!info.authenticated);
        assert_eq!(info.authenticated_user(), None);
    }

    #[test]
    fn register_duplicate_session_fails() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.register_session(1, SessionInfo::new()));
        assert!(!registry.register_session(1, SessionInfo::new()));
    }

    #[test]
    fn unregister_releases_user() {
        let mut registry = ConnectionRegistry::new();
        registry.register_session(1, SessionInfo::authenticated(42));

        let info = registry.unregister_session(1).unwrap();
        assert_eq!(info.authenticated_user(), Some(42));
        assert_eq!(registry.session_id_for_user(42), None);

        // User can bind again from a new connection
        assert!(registry.register_session(2, SessionInfo::authenticated(42)));
        assert_eq!(registry.session_id_for_user(42), Some(2));
    }

    #[test]
    fn one_session_per_user() {
        let mut registry = ConnectionRegistry::new();
        registry.register_session(1, SessionInfo::authenticated(42));
        registry.register_session(2, SessionInfo::new());

        assert!(!registry.update_session_info(2, SessionInfo::authenticated(42)));
        assert_eq!(registry.sessions(2).unwrap().authenticated_user(), None);
        assert_eq!(registry.session_id_for_user(42), Some(1));
    }

    #[test]
    fn update_session_info_rebinds_reverse_index() {
        let mut registry = ConnectionRegistry::new();
        registry.register_session(200, SessionInfo::new());
        registry.register_session(300, SessionInfo::authenticated(99));

        assert!(registry.update_session_info(200, SessionInfo::authenticated(42)));
        assert_eq!(registry.session_id_for_user(42), Some(200));
        assert_eq!(registry.session_id_for_user(99), Some(300));
        assert_eq!(registry.session_id_for_user(999), None);

        // Same user again is not a conflict
        assert!(registry.update_session_info(200, SessionInfo::authenticated(42)));
        assert!(!registry.update_session_info(404, SessionInfo::authenticated(1)));
    }

    #[test]
    fn session_count() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.session_count(), 0);

        registry.register_session(1, SessionInfo::new());
        registry.register_session(2, SessionInfo::new());
        assert_eq!(registry.session_count(), 2);

        registry.unregister_session(1);
        assert_eq!(registry.session_count(), 1);
        assert!(registry.unregister_session(1).is_none());
    }
}
