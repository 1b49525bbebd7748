//! PostgreSQL-backed user directory.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{RoleRecord, UserDirectory, UserRecord};
use crate::error::Result;

/// One row of the users/roles join; a user appears once per role, or once
/// with null role columns.
#[derive(sqlx::FromRow)]
struct UserRoleRow {
    id: Uuid,
    username: String,
    email: String,
    birthday: Option<NaiveDate>,
    address: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    role_id: Option<Uuid>,
    role_code: Option<String>,
    role_type: Option<String>,
}

pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserDirectory for PostgresUserDirectory {
    #[tracing::instrument(skip(self))]
    async fn load_all_with_roles(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRoleRow>(
            r#"
            SELECT
                u.id, u.username, u.email, u.birthday, u.address,
                u.created_at, u.updated_at,
                r.id AS role_id, r.role_code, r.role_type
            FROM users u
            LEFT JOIN user_role ur ON ur.user_id = u.id
            LEFT JOIN roles r ON r.id = ur.role_id
            ORDER BY u.username, r.role_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut users: Vec<UserRecord> = Vec::new();
        for row in rows {
            let role = match (row.role_id, row.role_code, row.role_type) {
                (Some(id), Some(role_code), Some(role_type)) => Some(RoleRecord {
                    id,
                    role_code,
                    role_type,
                }),
                _ => None,
            };

            // Rows are ordered by username, so a user's rows are contiguous
            match users.last_mut() {
                Some(last) if last.id == row.id => last.roles.extend(role),
                _ => users.push(UserRecord {
                    id: row.id,
                    username: row.username,
                    email: row.email,
                    birthday: row.birthday,
                    address: row.address,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    roles: role.into_iter().collect(),
                }),
            }
        }

        tracing::debug!(users = users.len(), "Loaded users with roles");
        Ok(users)
    }
}
