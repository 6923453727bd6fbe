use async_trait::async_trait;
use bcrypt::{hash, verify};
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::OnceCell;
use tracing::debug;

use super::CredentialStore;
use crate::{errors::StoreError, models::User};

/// bcrypt is deliberately slow, so it runs off the async workers.
pub(crate) async fn hash_password(password: &str, cost: u32) -> Result<String, StoreError> {
    let password = password.to_owned();
    let hashed = tokio::task::spawn_blocking(move || hash(password, cost)).await??;
    Ok(hashed)
}

/// Constant-time comparison is done inside `bcrypt::verify`.
pub(crate) async fn verify_password(password: &str, hashed: &str) -> Result<bool, StoreError> {
    let password = password.to_owned();
    let hashed = hashed.to_owned();
    let valid = tokio::task::spawn_blocking(move || verify(password, &hashed)).await??;
    Ok(valid)
}

/// Stand-in hash verified for unknown usernames, so a miss costs the same
/// bcrypt work as a wrong password.
pub(crate) struct DecoyHash {
    cost: u32,
    hash: OnceCell<String>,
}

impl DecoyHash {
    pub(crate) fn new(cost: u32) -> Self {
        Self {
            cost,
            hash: OnceCell::new(),
        }
    }

    /// Always `false`.
    pub(crate) async fn reject(&self, password: &str) -> Result<bool, StoreError> {
        let hashed = self
            .hash
            .get_or_try_init(|| hash_password("decoy", self.cost))
            .await?;
        verify_password(password, hashed).await?;
        Ok(false)
    }
}

/// In-process credential store keyed by username.
pub struct MemoryCredentialStore {
    users: DashMap<String, User>,
    cost: u32,
    decoy: DecoyHash,
}

impl MemoryCredentialStore {
    pub fn new(cost: u32) -> Self {
        Self {
            users: DashMap::new(),
            cost,
            decoy: DecoyHash::new(cost),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn add_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        if self.users.contains_key(username) {
            return Ok(false);
        }

        let hashed_password = hash_password(password, self.cost).await?;

        // The entry lock makes check-and-insert a single step, so two
        // concurrent signups for one name cannot both win.
        match self.users.entry(username.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(User {
                    username: username.to_owned(),
                    hashed_password,
                });
                debug!("Stored credentials for {}", username);
                Ok(true)
            }
        }
    }

    async fn check_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let Some(hashed) = self
            .users
            .get(username)
            .map(|user| user.hashed_password.clone())
        else {
            return self.decoy.reject(password).await;
        };

        verify_password(password, &hashed).await
    }
}
