//! User persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use clientdesk_auth::User;
use clientdesk_core::UserId;

use crate::repository::{RepositoryError, poisoned};

pub mod postgres;

pub use postgres::PostgresUserRepository;

/// User storage. Names are unique.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] when the name is taken.
    async fn insert(&self, user: &User) -> Result<(), RepositoryError>;
}

/// In-memory user repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.values().find(|u| u.name == name).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        if users.values().any(|u| u.name == user.name) {
            return Err(RepositoryError::Conflict(format!("user name {:?} is taken", user.name)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }
}
