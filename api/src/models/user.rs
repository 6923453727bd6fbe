use serde::{Deserialize, Serialize};

/// Stored credential record. Only the bcrypt hash of the password is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub hashed_password: String,
}
