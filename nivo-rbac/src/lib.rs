#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Role-permission graph evaluator.
//!
//! Roles form a DAG with a single parent per role; permissions are
//! `(service, resource, action)` triples. Effective permissions for a user
//! are the transitive union of the permissions attached to every active,
//! unexpired role the user is assigned, closed over parent ancestry.
//!
//! The evaluator is deliberately uncached (spec: "designed to be
//! cache-friendly but not cached in this spec") — every [`RbacEngine::check`]
//! call re-reads the backing [`RoleStore`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use nivo_envelope::ErrorCode;
use nivo_envelope::IntoEnvelopeError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod http;
#[cfg(feature = "postgres")]
pub mod postgres_store;

pub type RoleId = Uuid;
pub type UserId = String;
pub type RbacResult<T> = Result<T, RbacError>;

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("role {0} not found")]
    NotFound(RoleId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoEnvelopeError for RbacError {
    fn code(&self) -> ErrorCode {
        match self {
            RbacError::NotFound(_) => ErrorCode::NotFound,
            RbacError::Validation(_) => ErrorCode::Validation,
            RbacError::Storage(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// A `(service, resource, action)` triple, e.g. `transaction:transfer:create`.
#[derive(Debug, Clone, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub service: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    #[must_use]
    pub fn new(service: impl Into<String>, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    #[must_use]
    pub fn canonical_name(&self) -> String {
        format!("{}:{}:{}", self.service, self.resource, self.action)
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, ':');
        let service = parts.next()?.to_string();
        let resource = parts.next()?.to_string();
        let action = parts.next()?.to_string();
        Some(Self {
            service,
            resource,
            action,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub parent_id: Option<RoleId>,
    pub permissions: HashSet<String>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_id: None,
            permissions: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: RoleId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl RoleAssignment {
    #[must_use]
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn upsert_role(&self, role: Role) -> RbacResult<Role>;
    async fn get_role(&self, id: RoleId) -> RbacResult<Option<Role>>;
    async fn list_roles(&self) -> RbacResult<Vec<Role>>;
    async fn assign_role(&self, assignment: RoleAssignment) -> RbacResult<()>;
    async fn list_assignments(&self, user_id: &UserId) -> RbacResult<Vec<RoleAssignment>>;
}

#[derive(Default)]
struct State {
    roles: std::collections::HashMap<RoleId, Role>,
    assignments: Vec<RoleAssignment>,
}

#[derive(Default)]
pub struct InMemoryRoleStore {
    state: tokio::sync::RwLock<State>,
}

impl InMemoryRoleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn upsert_role(&self, role: Role) -> RbacResult<Role> {
        if let Some(parent_id) = role.parent_id {
            let guard = self.state.read().await;
            if !guard.roles.contains_key(&parent_id) {
                return Err(RbacError::NotFound(parent_id));
            }
        }
        let mut guard = self.state.write().await;
        guard.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> RbacResult<Option<Role>> {
        let guard = self.state.read().await;
        Ok(guard.roles.get(&id).cloned())
    }

    async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        let guard = self.state.read().await;
        Ok(guard.roles.values().cloned().collect())
    }

    async fn assign_role(&self, assignment: RoleAssignment) -> RbacResult<()> {
        let mut guard = self.state.write().await;
        if !guard.roles.contains_key(&assignment.role_id) {
            return Err(RbacError::NotFound(assignment.role_id));
        }
        guard
            .assignments
            .retain(|a| !(a.user_id == assignment.user_id && a.role_id == assignment.role_id));
        guard.assignments.push(assignment);
        Ok(())
    }

    async fn list_assignments(&self, user_id: &UserId) -> RbacResult<Vec<RoleAssignment>> {
        let guard = self.state.read().await;
        Ok(guard
            .assignments
            .iter()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Evaluates effective permissions for a user by traversing the role DAG.
#[derive(Clone)]
pub struct RbacEngine {
    store: Arc<dyn RoleStore>,
}

impl RbacEngine {
    #[must_use]
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    /// Collects the union of permissions across every active, unexpired
    /// role assignment for `user_id`, transitively closed over parent
    /// ancestry. Ancestry traversal tolerates cycles defensively via a
    /// `visited` set even though the storage layer is expected to forbid
    /// them.
    pub async fn effective_permissions(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> RbacResult<HashSet<String>> {
        let assignments = self.store.list_assignments(user_id).await?;
        let mut permissions = HashSet::new();
        let mut visited = HashSet::new();

        for assignment in assignments.iter().filter(|a| a.is_effective(now)) {
            let mut frontier = Some(assignment.role_id);
            while let Some(role_id) = frontier {
                if !visited.insert(role_id) {
                    break;
                }
                let Some(role) = self.store.get_role(role_id).await? else {
                    break;
                };
                permissions.extend(role.permissions.iter().cloned());
                frontier = role.parent_id;
            }
        }

        Ok(permissions)
    }

    pub async fn check(
        &self,
        user_id: &UserId,
        permission_name: &str,
        now: DateTime<Utc>,
    ) -> RbacResult<bool> {
        let permissions = self.effective_permissions(user_id, now).await?;
        Ok(permissions.contains(permission_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn check_true_for_directly_assigned_permission() {
        let store = Arc::new(InMemoryRoleStore::new());
        let role = Role::new("teller").with_permission("transaction:transfer:create");
        store.upsert_role(role.clone()).await.expect("upsert role");
        store
            .assign_role(RoleAssignment {
                user_id: "user-1".into(),
                role_id: role.id,
                expires_at: None,
                active: true,
            })
            .await
            .expect("assign role");

        let engine = RbacEngine::new(store);
        let allowed = engine
            .check(&"user-1".to_string(), "transaction:transfer:create", now())
            .await
            .expect("check succeeds");
        assert!(allowed);
    }

    #[tokio::test]
    async fn check_inherits_permission_from_parent_role() {
        let store = Arc::new(InMemoryRoleStore::new());
        let parent = Role::new("base").with_permission("wallet:wallet:read");
        store.upsert_role(parent.clone()).await.expect("upsert parent");
        let child = Role::new("teller").with_parent(parent.id);
        store.upsert_role(child.clone()).await.expect("upsert child");
        store
            .assign_role(RoleAssignment {
                user_id: "user-1".into(),
                role_id: child.id,
                expires_at: None,
                active: true,
            })
            .await
            .expect("assign role");

        let engine = RbacEngine::new(store);
        let allowed = engine
            .check(&"user-1".to_string(), "wallet:wallet:read", now())
            .await
            .expect("check succeeds");
        assert!(allowed);
    }

    #[tokio::test]
    async fn expired_assignment_grants_nothing() {
        let store = Arc::new(InMemoryRoleStore::new());
        let role = Role::new("teller").with_permission("transaction:transfer:create");
        store.upsert_role(role.clone()).await.expect("upsert role");
        store
            .assign_role(RoleAssignment {
                user_id: "user-1".into(),
                role_id: role.id,
                expires_at: Some(now() - chrono::Duration::days(1)),
                active: true,
            })
            .await
            .expect("assign role");

        let engine = RbacEngine::new(store);
        let allowed = engine
            .check(&"user-1".to_string(), "transaction:transfer:create", now())
            .await
            .expect("check succeeds");
        assert!(!allowed);
    }

    #[tokio::test]
    async fn inactive_assignment_grants_nothing() {
        let store = Arc::new(InMemoryRoleStore::new());
        let role = Role::new("teller").with_permission("transaction:transfer:create");
        store.upsert_role(role.clone()).await.expect("upsert role");
        store
            .assign_role(RoleAssignment {
                user_id: "user-1".into(),
                role_id: role.id,
                expires_at: None,
                active: false,
            })
            .await
            .expect("assign role");

        let engine = RbacEngine::new(store);
        let allowed = engine
            .check(&"user-1".to_string(), "transaction:transfer:create", now())
            .await
            .expect("check succeeds");
        assert!(!allowed);
    }

    #[tokio::test]
    async fn cyclic_ancestry_terminates_instead_of_looping() {
        let store = Arc::new(InMemoryRoleStore::new());
        let a = Role::new("a").with_permission("x:y:z");
        let b = Role::new("b").with_parent(a.id);
        store.upsert_role(a.clone()).await.expect("upsert a");
        store.upsert_role(b.clone()).await.expect("upsert b");
        // Force a cycle directly through the in-memory map, bypassing the
        // constructor validation that normally prevents it, to exercise the
        // defensive `visited` guard.
        let mut cyclic_a = a.clone();
        cyclic_a.parent_id = Some(b.id);
        {
            let mut guard = store.state.write().await;
            guard.roles.insert(cyclic_a.id, cyclic_a);
        }
        store
            .assign_role(RoleAssignment {
                user_id: "user-1".into(),
                role_id: b.id,
                expires_at: None,
                active: true,
            })
            .await
            .expect("assign role");

        let engine = RbacEngine::new(store);
        let result = engine
            .check(&"user-1".to_string(), "x:y:z", now())
            .await;
        assert_eq!(result, Ok(true));
    }

    #[test]
    fn permission_canonical_name_round_trips() {
        let permission = Permission::new("transaction", "transfer", "create");
        assert_eq!(permission.canonical_name(), "transaction:transfer:create");
        assert_eq!(Permission::parse("transaction:transfer:create"), Some(permission));
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_name() == other.canonical_name()
    }
}
