//! Table of running sessions
//!
//! Sessions are looked up by [`SessionId`] for process events and by
//! [`ImageKey`] for the one-session-per-image check. Neither lookup consults
//! the configuration, so a session outlives its image being edited away.

use std::collections::HashMap;

use hpd_core::prelude::*;
use hpd_core::ImageKey;

use crate::session::{ProcessSession, SessionId};

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<SessionId, ProcessSession>,
    by_key: HashMap<ImageKey, SessionId>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; refuses a second session for the same image
    pub fn insert(&mut self, session: ProcessSession) -> Result<SessionId> {
        if self.by_key.contains_key(&session.key) {
            return Err(Error::process(format!(
                "{} already has a running session",
                session.key
            )));
        }

        let id = session.id;
        self.by_key.insert(session.key.clone(), id);
        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Remove a session and its key index entry
    pub fn remove(&mut self, session_id: SessionId) -> Option<ProcessSession> {
        let session = self.sessions.remove(&session_id)?;
        self.by_key.remove(&session.key);
        Some(session)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&ProcessSession> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut ProcessSession> {
        self.sessions.get_mut(&session_id)
    }

    /// Session running the given image, if any
    pub fn find_by_key(&self, key: &ImageKey) -> Option<SessionId> {
        self.by_key.get(key).copied()
    }

    pub fn is_running(&self, key: &ImageKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessSession> {
        self.sessions.values()
    }

    /// Request termination of every session's process.
    ///
    /// Sessions stay registered until their exit events arrive.
    pub fn kill_all(&mut self) -> usize {
        let mut killed = 0;
        for session in self.sessions.values_mut() {
            if session.process.is_running() {
                session.process.kill();
                killed += 1;
            }
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::next_session_id;
    use hpd_core::{DeviceId, ProcessEvent};
    use hpd_daemon::ImageProcess;
    use tokio::sync::mpsc;

    fn key(name: &str) -> ImageKey {
        ImageKey::new(DeviceId::new("1234:5678"), name)
    }

    fn session(name: &str) -> (ProcessSession, mpsc::Receiver<ProcessEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let process = ImageProcess::spawn("exec sleep 30", tx).unwrap();
        (
            ProcessSession::new(next_session_id(), key(name), "Example", "sleep", process),
            rx,
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let mut manager = SessionManager::new();
        assert!(manager.is_empty());

        let (s, _rx) = session("target");
        let id = manager.insert(s).unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_by_key(&key("target")), Some(id));
        assert!(manager.is_running(&key("target")));
        assert!(!manager.is_running(&key("target2")));
        assert_eq!(manager.get(id).map(|s| s.id), Some(id));
        manager.kill_all();
    }

    #[tokio::test]
    async fn test_insert_refuses_second_session_for_image() {
        let mut manager = SessionManager::new();
        let (first, _rx1) = session("target");
        let (second, _rx2) = session("target");

        manager.insert(first).unwrap();
        assert!(manager.insert(second).is_err());
        assert_eq!(manager.len(), 1);
        manager.kill_all();
    }

    #[tokio::test]
    async fn test_remove_clears_index() {
        let mut manager = SessionManager::new();
        let (s, _rx) = session("target");
        let id = manager.insert(s).unwrap();

        let mut removed = manager.remove(id).unwrap();
        removed.teardown();

        assert!(manager.is_empty());
        assert_eq!(manager.find_by_key(&key("target")), None);
        assert!(manager.remove(id).is_none());
    }

    #[tokio::test]
    async fn test_kill_all_counts_running() {
        let mut manager = SessionManager::new();
        let (a, _rx1) = session("a");
        let (b, _rx2) = session("b");
        manager.insert(a).unwrap();
        manager.insert(b).unwrap();

        assert_eq!(manager.kill_all(), 2);
        // Still registered until exit events are handled
        assert_eq!(manager.len(), 2);
    }
}
