//! Storage facade consumed by the core, plus an in-memory implementation
//! used by tests and single-process deployments.
//!
//! Entities are addressed by a stable id within their kind; saves are atomic
//! per entity but not transactional across entities. Multi-entity updates
//! rely on the write-serialization queue.

use crate::error::ServerError;
use crate::models::{Account, AuthRecord, KeyStoreEntry, Org, Session, Vault};
use crate::utils::email_id;
use crate::Server;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Auth,
    Session,
    Org,
    Vault,
    KeyStoreEntry,
}

/// Typed union of everything the core persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Account(Account),
    Auth(AuthRecord),
    Session(Session),
    Org(Org),
    Vault(Vault),
    KeyStoreEntry(KeyStoreEntry),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Account(_) => EntityKind::Account,
            Entity::Auth(_) => EntityKind::Auth,
            Entity::Session(_) => EntityKind::Session,
            Entity::Org(_) => EntityKind::Org,
            Entity::Vault(_) => EntityKind::Vault,
            Entity::KeyStoreEntry(_) => EntityKind::KeyStoreEntry,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Entity::Account(a) => a.id.to_string(),
            Entity::Auth(a) => a.id.clone(),
            Entity::Session(s) => s.id.to_string(),
            Entity::Org(o) => o.id.to_string(),
            Entity::Vault(v) => v.id.to_string(),
            Entity::KeyStoreEntry(k) => k.id.to_string(),
        }
    }
}

/// Durable storage backend. `get` fails with NotFound on a miss.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity, ServerError>;
    async fn save(&self, entity: Entity) -> Result<(), ServerError>;
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), ServerError>;
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    entities: DashMap<(EntityKind, String), Entity>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity, ServerError> {
        self.entities
            .get(&(kind, id.to_string()))
            .map(|e| e.value().clone())
            .ok_or(ServerError::NotFound)
    }

    async fn save(&self, entity: Entity) -> Result<(), ServerError> {
        self.entities.insert((entity.kind(), entity.id()), entity);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), ServerError> {
        self.entities.remove(&(kind, id.to_string()));
        Ok(())
    }
}

/// Byte storage for vault attachments, consumed as an external collaborator.
#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    async fn put(&self, vault_id: &Uuid, id: &Uuid, data: &[u8]) -> Result<(), ServerError>;
    async fn get(&self, vault_id: &Uuid, id: &Uuid) -> Result<Vec<u8>, ServerError>;
    async fn delete(&self, vault_id: &Uuid, id: &Uuid) -> Result<(), ServerError>;
    async fn delete_all(&self, vault_id: &Uuid) -> Result<(), ServerError>;

    /// Total bytes currently stored for a vault, used for quota accounting.
    async fn usage(&self, vault_id: &Uuid) -> Result<u64, ServerError>;
}

#[derive(Default)]
pub struct MemoryAttachmentStorage {
    blobs: DashMap<(Uuid, Uuid), Vec<u8>>,
}

impl MemoryAttachmentStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttachmentStorage for MemoryAttachmentStorage {
    async fn put(&self, vault_id: &Uuid, id: &Uuid, data: &[u8]) -> Result<(), ServerError> {
        self.blobs.insert((*vault_id, *id), data.to_vec());
        Ok(())
    }

    async fn get(&self, vault_id: &Uuid, id: &Uuid) -> Result<Vec<u8>, ServerError> {
        self.blobs
            .get(&(*vault_id, *id))
            .map(|b| b.value().clone())
            .ok_or(ServerError::NotFound)
    }

    async fn delete(&self, vault_id: &Uuid, id: &Uuid) -> Result<(), ServerError> {
        self.blobs.remove(&(*vault_id, *id));
        Ok(())
    }

    async fn delete_all(&self, vault_id: &Uuid) -> Result<(), ServerError> {
        self.blobs.retain(|(v, _), _| v != vault_id);
        Ok(())
    }

    async fn usage(&self, vault_id: &Uuid) -> Result<u64, ServerError> {
        Ok(self
            .blobs
            .iter()
            .filter(|entry| entry.key().0 == *vault_id)
            .map(|entry| entry.value().len() as u64)
            .sum())
    }
}

/// Typed fetch/save helpers over the untyped facade.
impl Server {
    pub(crate) async fn fetch_account(&self, id: &Uuid) -> Result<Account, ServerError> {
        match self.storage.get(EntityKind::Account, &id.to_string()).await? {
            Entity::Account(account) => Ok(account),
            other => Err(unexpected_kind(EntityKind::Account, &other)),
        }
    }

    pub(crate) async fn fetch_auth(&self, email: &str) -> Result<AuthRecord, ServerError> {
        match self.storage.get(EntityKind::Auth, &email_id(email)).await? {
            Entity::Auth(auth) => Ok(auth),
            other => Err(unexpected_kind(EntityKind::Auth, &other)),
        }
    }

    /// Resolve the auth record for an email, creating an ephemeral one if
    /// none exists. Callers must not let the outcome reveal whether the
    /// account is registered.
    pub(crate) async fn fetch_auth_or_new(&self, email: &str) -> Result<AuthRecord, ServerError> {
        match self.fetch_auth(email).await {
            Ok(auth) => Ok(auth),
            Err(ServerError::NotFound) => Ok(AuthRecord::new(email)),
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn fetch_session(&self, id: &Uuid) -> Result<Session, ServerError> {
        match self.storage.get(EntityKind::Session, &id.to_string()).await? {
            Entity::Session(session) => Ok(session),
            other => Err(unexpected_kind(EntityKind::Session, &other)),
        }
    }

    pub(crate) async fn fetch_org(&self, id: &Uuid) -> Result<Org, ServerError> {
        match self.storage.get(EntityKind::Org, &id.to_string()).await? {
            Entity::Org(org) => Ok(org),
            other => Err(unexpected_kind(EntityKind::Org, &other)),
        }
    }

    pub(crate) async fn fetch_vault(&self, id: &Uuid) -> Result<Vault, ServerError> {
        match self.storage.get(EntityKind::Vault, &id.to_string()).await? {
            Entity::Vault(vault) => Ok(vault),
            other => Err(unexpected_kind(EntityKind::Vault, &other)),
        }
    }

    pub(crate) async fn fetch_key_store_entry(
        &self,
        id: &Uuid,
    ) -> Result<KeyStoreEntry, ServerError> {
        match self
            .storage
            .get(EntityKind::KeyStoreEntry, &id.to_string())
            .await?
        {
            Entity::KeyStoreEntry(entry) => Ok(entry),
            other => Err(unexpected_kind(EntityKind::KeyStoreEntry, &other)),
        }
    }
}

fn unexpected_kind(expected: EntityKind, got: &Entity) -> ServerError {
    ServerError::Internal(anyhow::anyhow!(
        "storage returned {:?} where {:?} was expected",
        got.kind(),
        expected
    ))
}
