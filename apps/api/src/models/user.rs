use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub password: String,
    pub email: String,
}

/// Registration payload. No credential validation — auth is out of scope
/// and the password is stored as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
}
