//! Shared handle to the local node registry.

use std::sync::{Arc, Mutex};

use canopy_store::{Database, LocalUser, NewLocalUser, StoreError};

use crate::error::RegistryError;

/// The node registry service.
///
/// Constructed once at startup and cloned into every component that needs
/// it. SQLite work is synchronous, so the lock is never held across an
/// `.await`.
#[derive(Clone)]
pub struct NodeRegistry {
    db: Arc<Mutex<Database>>,
}

impl NodeRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` with exclusive access to the database.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, RegistryError> {
        let db = self.db.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(f(&*db)?)
    }

    /// Register a user for `client_id` and make them current.
    pub fn register_user(
        &self,
        client_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<LocalUser, RegistryError> {
        let new_user = NewLocalUser {
            user_id: user_id.to_string(),
            username: username.to_string(),
            client_id: client_id.to_string(),
            make_current: true,
        };
        self.with(|db| db.add_local_user(&new_user))
    }

    /// Node id of the client's current user, if one is registered.
    pub fn current_node_id(&self, client_id: &str) -> Result<Option<String>, RegistryError> {
        self.with(|db| Ok(db.get_current_user(client_id)?.and_then(|u| u.node_id)))
    }
}
