use std::collections::HashMap;

use async_trait::async_trait;
use srdgen_core::{Artifact, ArtifactTag, OrchestrationError, RegenerationState, Session, SessionId};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session store failure: {0}")]
    Backend(String),
}

impl From<StoreError> for OrchestrationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::SessionNotFound(id),
            StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

/// Session persistence. Writes address a single tag so that concurrent
/// regenerations of different tags in one session never overwrite each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), StoreError>;
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;
    async fn set_state(
        &self,
        id: &SessionId,
        tag: ArtifactTag,
        state: RegenerationState,
    ) -> Result<(), StoreError>;
    async fn commit_artifact(
        &self,
        id: &SessionId,
        artifact: Artifact,
        state: RegenerationState,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn set_state(
        &self,
        id: &SessionId,
        tag: ArtifactTag,
        state: RegenerationState,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        session.set_state(tag, state);
        Ok(())
    }

    async fn commit_artifact(
        &self,
        id: &SessionId,
        artifact: Artifact,
        state: RegenerationState,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        session.commit_artifact(artifact, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use srdgen_core::{Artifact, ArtifactTag, RegenerationState, Session, SessionId};

    use super::{InMemorySessionStore, SessionStore, StoreError};

    fn session(id: &str) -> Session {
        Session::new(
            SessionId(id.to_string()),
            vec![
                Artifact::initial(ArtifactTag::Frontend, "screens"),
                Artifact::initial(ArtifactTag::Backend, "endpoints"),
            ],
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn commits_for_different_tags_do_not_clobber() -> Result<(), StoreError> {
        let store = InMemorySessionStore::default();
        let id = SessionId("S-1".to_string());
        assert!(store.is_empty().await);
        store.insert(session("S-1")).await?;
        assert_eq!(store.len().await, 1);

        let stale_view = store.find(&id).await?.expect("session stored");
        let frontend = stale_view.artifact(ArtifactTag::Frontend).expect("frontend").revised("v2");
        let backend = stale_view.artifact(ArtifactTag::Backend).expect("backend").revised("v2");

        store.commit_artifact(&id, frontend, RegenerationState::Stable).await?;
        store.commit_artifact(&id, backend, RegenerationState::Stable).await?;

        let current = store.find(&id).await?.expect("session stored");
        assert_eq!(current.artifact(ArtifactTag::Frontend).map(|a| a.version), Some(2));
        assert_eq!(current.artifact(ArtifactTag::Backend).map(|a| a.version), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn writes_to_unknown_session_fail() {
        let store = InMemorySessionStore::default();
        let id = SessionId("missing".to_string());

        let error = store
            .set_state(&id, ArtifactTag::Frontend, RegenerationState::FeedbackPending)
            .await
            .unwrap_err();
        assert_eq!(error, StoreError::NotFound(id));
    }
}
