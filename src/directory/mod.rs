//! Read-only view over stored users and their roles.
//!
//! The dispatch path never touches the directory; it backs listing of what
//! the downstream service has created.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresUserDirectory;

/// A role granted to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: Uuid,
    pub role_code: String,
    pub role_type: String,
}

/// A stored user with its roles. Passwords are never loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub birthday: Option<NaiveDate>,
    pub address: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub roles: Vec<RoleRecord>,
}

impl UserRecord {
    pub fn has_role(&self, role_code: &str) -> bool {
        self.roles.iter().any(|r| r.role_code == role_code)
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Every user with its roles, ordered by username. Users without roles
    /// are included with an empty role list.
    async fn load_all_with_roles(&self) -> Result<Vec<UserRecord>>;
}

/// Directory held in memory, keyed by username.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert(&self, user: UserRecord) {
        self.users.write().insert(user.username.clone(), user);
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn load_all_with_roles(&self) -> Result<Vec<UserRecord>> {
        Ok(self.users.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str, roles: &[&str]) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            birthday: None,
            address: None,
            created_at: Some(Utc::now()),
            updated_at: None,
            roles: roles
                .iter()
                .map(|code| RoleRecord {
                    id: Uuid::new_v4(),
                    role_code: code.to_string(),
                    role_type: "SYSTEM".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_directory_orders_by_username() {
        let directory = InMemoryUserDirectory::new();
        directory.insert(user("carol", &[]));
        directory.insert(user("alice", &["ADMIN"]));
        directory.insert(user("bob", &["USER"]));

        let users = directory.load_all_with_roles().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert!(users[0].has_role("ADMIN"));
        assert!(users[2].roles.is_empty());
    }

    #[tokio::test]
    async fn test_insert_replaces_existing_username() {
        let directory = InMemoryUserDirectory::new();
        directory.insert(user("alice", &[]));
        directory.insert(user("alice", &["ADMIN"]));

        assert_eq!(directory.len(), 1);
        let users = directory.load_all_with_roles().await.unwrap();
        assert!(users[0].has_role("ADMIN"));
    }
}
