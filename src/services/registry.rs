// src/services/registry.rs
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{InvalidTransition, Session, SessionId, SessionState};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("session {0} is already registered")]
    AlreadyRegistered(SessionId),

    #[error("call {0} already has a live session")]
    DuplicateCall(String),

    #[error("session {0} is not registered")]
    NotRegistered(SessionId),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Which side ended the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupOrigin {
    /// BYE or CANCEL from the far end, or the signaling connection went away.
    Remote,
    /// Requested through the HTTP surface.
    Local,
}

/// Cancellation token that remembers who pulled it first.
#[derive(Debug, Clone, Default)]
pub struct HangupSignal {
    token: CancellationToken,
    origin: Arc<OnceLock<HangupOrigin>>,
}

impl HangupSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a token that may already have been cancelled by the
    /// signaling side while the call was still being admitted.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            origin: Arc::default(),
        }
    }

    pub fn trigger(&self, origin: HangupOrigin) {
        let _ = self.origin.set(origin);
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn origin(&self) -> Option<HangupOrigin> {
        if !self.is_triggered() {
            return None;
        }
        Some(self.origin.get().copied().unwrap_or(HangupOrigin::Remote))
    }

    pub async fn triggered(&self) -> HangupOrigin {
        self.token.cancelled().await;
        self.origin.get().copied().unwrap_or(HangupOrigin::Remote)
    }
}

struct Entry {
    session: Session,
    hangup: HangupSignal,
}

/// Live call sessions, keyed by session id.
///
/// The entry count always equals the number of sessions created and not yet
/// terminated; every read and write takes the lock, so readers never see a
/// half-applied change.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        session: Session,
        hangup: HangupSignal,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&session.id) {
            return Err(RegistryError::AlreadyRegistered(session.id));
        }
        if sessions.values().any(|e| e.session.call_id == session.call_id) {
            return Err(RegistryError::DuplicateCall(session.call_id));
        }

        debug!(session_id = %session.id, call_id = %session.call_id, "session registered");
        sessions.insert(session.id, Entry { session, hangup });
        Ok(())
    }

    /// Removes the session and hands it back; a second call for the same id
    /// fails and leaves the count untouched.
    pub async fn deregister(&self, id: &SessionId) -> Result<Session, RegistryError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .remove(id)
            .ok_or(RegistryError::NotRegistered(*id))?;

        debug!(session_id = %id, remaining = sessions.len(), "session deregistered");
        Ok(entry.session)
    }

    pub async fn transition(&self, id: &SessionId, next: SessionState) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or(RegistryError::NotRegistered(*id))?;
        entry.session.advance(next)?;
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_call(&self, call_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .values()
            .any(|e| e.session.call_id == call_id)
    }

    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).map(|e| e.session.clone())
    }

    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Signals hangup to the session carrying this Call-ID.
    pub async fn hangup_call(&self, call_id: &str, origin: HangupOrigin) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.values().find(|e| e.session.call_id == call_id) {
            Some(entry) => {
                entry.hangup.trigger(origin);
                true
            }
            None => false,
        }
    }

    pub async fn hangup_session(&self, id: &SessionId, origin: HangupOrigin) -> bool {
        match self.sessions.read().await.get(id) {
            Some(entry) => {
                entry.hangup.trigger(origin);
                true
            }
            None => false,
        }
    }

    /// Signals hangup to every session that arrived on `transport_id`.
    pub async fn hangup_transport(&self, transport_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        let mut count = 0;
        for entry in sessions
            .values()
            .filter(|e| e.session.transport_id == transport_id)
        {
            entry.hangup.trigger(HangupOrigin::Remote);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = SessionRegistry::new();
        let session = Session::new("call-1", "t1", None);
        let id = session.id;

        tokio_test::assert_ok!(registry.register(session, HangupSignal::new()).await);
        assert_eq!(registry.count().await, 1);

        let removed = tokio_test::assert_ok!(registry.deregister(&id).await);
        assert_eq!(removed.call_id, "call-1");
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_double_registration_rejected() {
        let registry = SessionRegistry::new();
        let session = Session::new("call-1", "t1", None);

        registry
            .register(session.clone(), HangupSignal::new())
            .await
            .unwrap();
        assert_eq!(
            registry.register(session.clone(), HangupSignal::new()).await,
            Err(RegistryError::AlreadyRegistered(session.id))
        );

        let other = Session::new("call-1", "t1", None);
        assert_eq!(
            registry.register(other, HangupSignal::new()).await,
            Err(RegistryError::DuplicateCall("call-1".into()))
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_double_deregistration_is_rejected() {
        let registry = SessionRegistry::new();
        let keep = Session::new("call-keep", "t1", None);
        let session = Session::new("call-1", "t1", None);
        let id = session.id;

        registry.register(keep, HangupSignal::new()).await.unwrap();
        registry.register(session, HangupSignal::new()).await.unwrap();

        registry.deregister(&id).await.unwrap();
        assert_eq!(
            registry.deregister(&id).await.unwrap_err(),
            RegistryError::NotRegistered(id)
        );
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_transition_validated() {
        let registry = SessionRegistry::new();
        let session = Session::new("call-1", "t1", None);
        let id = session.id;
        registry.register(session, HangupSignal::new()).await.unwrap();

        tokio_test::assert_ok!(registry.transition(&id, SessionState::Active).await);
        let err = tokio_test::assert_err!(registry.transition(&id, SessionState::Terminated).await);
        assert!(matches!(err, RegistryError::Transition(_)));
        assert_eq!(
            registry.get(&id).await.map(|s| s.state()),
            Some(SessionState::Active)
        );
    }

    #[tokio::test]
    async fn test_hangup_by_transport() {
        let registry = SessionRegistry::new();
        let signals: Vec<_> = (0..3).map(|_| HangupSignal::new()).collect();

        for (i, signal) in signals.iter().enumerate() {
            let transport = if i < 2 { "t1" } else { "t2" };
            registry
                .register(Session::new(format!("call-{}", i), transport, None), signal.clone())
                .await
                .unwrap();
        }

        assert_eq!(registry.hangup_transport("t1").await, 2);
        assert_eq!(signals[0].origin(), Some(HangupOrigin::Remote));
        assert!(signals[1].is_triggered());
        assert!(!signals[2].is_triggered());

        assert!(registry.hangup_call("call-2", HangupOrigin::Local).await);
        assert_eq!(signals[2].origin(), Some(HangupOrigin::Local));
        assert!(!registry.hangup_call("call-9", HangupOrigin::Remote).await);
    }

    #[tokio::test]
    async fn test_first_origin_wins() {
        let signal = HangupSignal::new();
        assert_eq!(signal.origin(), None);

        signal.trigger(HangupOrigin::Local);
        signal.trigger(HangupOrigin::Remote);
        assert_eq!(signal.triggered().await, HangupOrigin::Local);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_reads_as_remote() {
        let token = CancellationToken::new();
        token.cancel();

        let signal = HangupSignal::from_token(token);
        assert_eq!(signal.origin(), Some(HangupOrigin::Remote));
    }
}
