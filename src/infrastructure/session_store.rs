//! In-memory session checkpoint store
//!
//! Sufficient for a single-process deployment; a durable implementation of
//! `SessionStore` is required for crash-resume. The store is constructed by
//! the caller and injected - never a process-global singleton - so tests and
//! multi-tenant runs stay isolated.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::gateways::SessionStore;
use crate::domain::session::CrawlSession;

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, CrawlSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn checkpoint(&self, session: &CrawlSession) -> anyhow::Result<()> {
        debug!(
            session_id = %session.session_id,
            cursor = session.cursor,
            batch_ordinal = session.batch_ordinal,
            accumulated = session.accumulated.len(),
            "checkpointing session"
        );
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn restore(&self, session_id: &str) -> anyhow::Result<Option<CrawlSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn remove(&self, session_id: &str) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::CrawlParams;

    #[tokio::test]
    async fn test_checkpoint_restore_round_trip() {
        let store = InMemorySessionStore::new();
        let mut session = CrawlSession::new("s1".to_string(), CrawlParams::default());
        session.cursor = 40;
        session.batch_ordinal = 2;
        session.consecutive_empty_responses = 1;

        store.checkpoint(&session).await.unwrap();
        let restored = store.restore("s1").await.unwrap().unwrap();
        assert_eq!(restored.cursor, 40);
        assert_eq!(restored.batch_ordinal, 2);
        assert_eq!(restored.consecutive_empty_responses, 1);

        assert!(store.restore("missing").await.unwrap().is_none());

        store.remove("s1").await.unwrap();
        assert!(store.restore("s1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_checkpoint_overwrites_previous_state() {
        let store = InMemorySessionStore::new();
        let mut session = CrawlSession::new("s1".to_string(), CrawlParams::default());
        store.checkpoint(&session).await.unwrap();

        session.cursor = 20;
        store.checkpoint(&session).await.unwrap();

        let restored = store.restore("s1").await.unwrap().unwrap();
        assert_eq!(restored.cursor, 20);
        assert_eq!(store.len().await, 1);
    }
}
