use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

/// Handle for one live transport session.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("identity {0:?} is already registered")]
    DuplicateIdentity(String),
    #[error("connection is already registered as {0:?}")]
    AlreadyRegistered(String),
}

/// Bidirectional identity <-> connection map.
///
/// An identity maps to at most one connection and a connection carries at
/// most one identity. `order` keeps identities in registration order for
/// presence snapshots.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_identity: HashMap<String, ConnectionId>,
    by_connection: HashMap<ConnectionId, String>,
    order: Vec<String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`. Leaves the registry untouched on error.
    pub fn register(&mut self, identity: &str, connection: ConnectionId) -> Result<(), RegistryError> {
        if self.by_identity.contains_key(identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }
        if let Some(existing) = self.by_connection.get(&connection) {
            return Err(RegistryError::AlreadyRegistered(existing.clone()));
        }

        self.by_identity.insert(identity.to_string(), connection);
        self.by_connection.insert(connection, identity.to_string());
        self.order.push(identity.to_string());
        Ok(())
    }

    /// Drop whatever identity is bound to `connection`, returning it.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<String> {
        let identity = self.by_connection.remove(&connection)?;
        self.by_identity.remove(&identity);
        self.order.retain(|entry| entry != &identity);
        Some(identity)
    }

    pub fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.by_identity.get(identity).copied()
    }

    pub fn identity_of(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    pub fn identities(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
