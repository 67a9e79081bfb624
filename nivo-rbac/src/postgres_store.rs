//! `RoleStore` backed by PostgreSQL.
//!
//! # Schema
//! ```sql
//! CREATE TABLE roles (
//!     id UUID PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     parent_id UUID REFERENCES roles(id),
//!     permissions TEXT[] NOT NULL DEFAULT '{}'
//! );
//!
//! CREATE TABLE role_assignments (
//!     user_id TEXT NOT NULL,
//!     role_id UUID NOT NULL REFERENCES roles(id),
//!     expires_at TIMESTAMPTZ,
//!     active BOOLEAN NOT NULL DEFAULT TRUE,
//!     PRIMARY KEY (user_id, role_id)
//! );
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;

use crate::RbacError;
use crate::RbacResult;
use crate::Role;
use crate::RoleAssignment;
use crate::RoleId;
use crate::RoleStore;
use crate::UserId;

#[derive(Clone)]
pub struct PostgresRoleStore {
    pool: PgPool,
}

impl PostgresRoleStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(err: sqlx::Error) -> RbacError {
        RbacError::Storage(nivo_persistence::pg::classify(err).to_string())
    }
}

#[async_trait]
impl RoleStore for PostgresRoleStore {
    async fn upsert_role(&self, role: Role) -> RbacResult<Role> {
        if let Some(parent_id) = role.parent_id {
            let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Self::classify)?;
            if exists.is_none() {
                return Err(RbacError::NotFound(parent_id));
            }
        }
        let permissions: Vec<String> = role.permissions.iter().cloned().collect();
        sqlx::query(
            "INSERT INTO roles (id, name, parent_id, permissions)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET name = EXCLUDED.name,
                 parent_id = EXCLUDED.parent_id,
                 permissions = EXCLUDED.permissions",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(role.parent_id)
        .bind(&permissions)
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> RbacResult<Option<Role>> {
        let row = sqlx::query("SELECT id, name, parent_id, permissions FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(row.map(row_to_role))
    }

    async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        let rows = sqlx::query("SELECT id, name, parent_id, permissions FROM roles")
            .fetch_all(&self.pool)
            .await
            .map_err(Self::classify)?;
        Ok(rows.into_iter().map(row_to_role).collect())
    }

    async fn assign_role(&self, assignment: RoleAssignment) -> RbacResult<()> {
        let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1")
            .bind(assignment.role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::classify)?;
        if exists.is_none() {
            return Err(RbacError::NotFound(assignment.role_id));
        }
        sqlx::query(
            "INSERT INTO role_assignments (user_id, role_id, expires_at, active)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, role_id) DO UPDATE
             SET expires_at = EXCLUDED.expires_at,
                 active = EXCLUDED.active",
        )
        .bind(&assignment.user_id)
        .bind(assignment.role_id)
        .bind(assignment.expires_at)
        .bind(assignment.active)
        .execute(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(())
    }

    async fn list_assignments(&self, user_id: &UserId) -> RbacResult<Vec<RoleAssignment>> {
        let rows = sqlx::query(
            "SELECT user_id, role_id, expires_at, active FROM role_assignments WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::classify)?;
        Ok(rows
            .into_iter()
            .map(|row| RoleAssignment {
                user_id: row.get("user_id"),
                role_id: row.get("role_id"),
                expires_at: row.get("expires_at"),
                active: row.get("active"),
            })
            .collect())
    }
}

fn row_to_role(row: sqlx::postgres::PgRow) -> Role {
    let permissions: Vec<String> = row.get("permissions");
    Role {
        id: row.get("id"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
        permissions: permissions.into_iter().collect(),
    }
}
