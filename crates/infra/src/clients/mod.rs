//! Client persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use clientdesk_clients::Client;
use clientdesk_core::{ClientId, Page, PageRequest};

use crate::repository::{RepositoryError, poisoned};

pub mod postgres;

pub use postgres::PostgresClientRepository;

/// Client storage. Soft-deleted clients are invisible to `get` and `list`.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn insert(&self, client: &Client) -> Result<(), RepositoryError>;

    async fn get(&self, id: ClientId) -> Result<Option<Client>, RepositoryError>;

    /// Live clients, most recently updated first.
    async fn list(&self, page: PageRequest) -> Result<Page<Client>, RepositoryError>;

    /// Overwrite a stored client (including its deletion marker).
    async fn save(&self, client: &Client) -> Result<(), RepositoryError>;
}

/// In-memory client repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryClientRepository {
    clients: RwLock<HashMap<ClientId, Client>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn insert(&self, client: &Client) -> Result<(), RepositoryError> {
        let mut clients = self.clients.write().map_err(|_| poisoned())?;
        if clients.contains_key(&client.id) {
            return Err(RepositoryError::Conflict(format!("client {} already exists", client.id)));
        }
        clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get(&self, id: ClientId) -> Result<Option<Client>, RepositoryError> {
        let clients = self.clients.read().map_err(|_| poisoned())?;
        Ok(clients.get(&id).filter(|c| !c.is_deleted()).cloned())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<Client>, RepositoryError> {
        let clients = self.clients.read().map_err(|_| poisoned())?;
        let mut live: Vec<&Client> = clients.values().filter(|c| !c.is_deleted()).collect();
        live.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        let items = page.slice(&live).iter().map(|c| (*c).clone()).collect();
        Ok(Page::new(live.len() as u64, items))
    }

    async fn save(&self, client: &Client) -> Result<(), RepositoryError> {
        let mut clients = self.clients.write().map_err(|_| poisoned())?;
        match clients.get_mut(&client.id) {
            Some(stored) => {
                *stored = client.clone();
                Ok(())
            }
            None => Err(RepositoryError::Storage(format!("client {} does not exist", client.id))),
        }
    }
}
