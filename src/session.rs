use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::storage::Store;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session token")]
    TokenNotFound,
}

/// The current authenticated session. At most one is current at a time; it is
/// shared by every in-flight request and overwritten on each refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Option<i64>,
}

/// Process-wide holder of the bearer token and user id: an in-memory cache
/// over the durable [`Store`]. All mutation goes through this type.
pub struct Manager {
    store: Arc<Store>,
    current: RwLock<Option<AuthSession>>,
}

impl Manager {
    pub fn new(store: Arc<Store>) -> Result<Self> {
        let token = store.token()?;
        let user_id = store.user_id()?;
        let current = token.map(|token| AuthSession { token, user_id });
        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.current.read().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    pub fn user_id(&self) -> Option<i64> {
        self.current.read().as_ref().and_then(|s| s.user_id)
    }

    /// Rotates the token, keeping the user id. Writes through to storage.
    pub fn set_token(&self, token: &str) -> Result<()> {
        self.store.set_token(token)?;
        let mut current = self.current.write();
        match current.as_mut() {
            Some(session) => session.token = token.to_string(),
            None => {
                *current = Some(AuthSession {
                    token: token.to_string(),
                    user_id: None,
                });
            }
        }
        Ok(())
    }

    pub fn set_session(&self, token: &str, user_id: Option<i64>) -> Result<()> {
        self.store.set_token(token)?;
        if let Some(id) = user_id {
            self.store.set_user_id(id)?;
        }
        *self.current.write() = Some(AuthSession {
            token: token.to_string(),
            user_id,
        });
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear_session()?;
        *self.current.write() = None;
        Ok(())
    }
}
