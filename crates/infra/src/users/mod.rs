//! Application users, keyed by the auth provider's uid.
//!
//! Deleting a user also removes their stored form responses; see [`delete_user`].

pub mod postgres;

use core::str::FromStr;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use counsel_core::UserId;

use crate::responses::{ResponseStore, ResponseStoreError};

pub use postgres::PostgresUserStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Student,
    Counselor,
    Parent,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Counselor => "counselor",
            UserRole::Parent => "parent",
        }
    }
}

impl core::fmt::Display for UserRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(UserRole::Student),
            "counselor" => Ok(UserRole::Counselor),
            "parent" => Ok(UserRole::Parent),
            other => Err(format!("unknown user role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub grade: Option<String>,
    pub counselor_id: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Registration payload, sent right after the client signs in with the auth provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewUser {
    #[serde(alias = "userId")]
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub counselor_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub counselor_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl User {
    fn register(new: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            user_id: new.user_id,
            email: new.email.trim().to_string(),
            name: new.name.trim().to_string(),
            role: new.role,
            grade: new.grade,
            counselor_id: new.counselor_id,
            parent_id: new.parent_id,
            created_at: now,
            last_login: None,
        }
    }

    fn apply(&mut self, patch: UserPatch) {
        if let Some(email) = patch.email {
            self.email = email.trim().to_string();
        }
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if patch.grade.is_some() {
            self.grade = patch.grade;
        }
        if patch.counselor_id.is_some() {
            self.counselor_id = patch.counselor_id;
        }
        if patch.parent_id.is_some() {
            self.parent_id = patch.parent_id;
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UserStoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid user record: {0}")]
    Invalid(String),
    #[error("user {0} already exists")]
    AlreadyExists(UserId),
}

impl From<ResponseStoreError> for UserStoreError {
    fn from(err: ResponseStoreError) -> Self {
        match err {
            ResponseStoreError::Unavailable(msg) => UserStoreError::Unavailable(msg),
            other => UserStoreError::Invalid(other.to_string()),
        }
    }
}

fn validate_required(field: &str, value: &str) -> Result<(), UserStoreError> {
    if value.trim().is_empty() {
        return Err(UserStoreError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_new(new: &NewUser) -> Result<(), UserStoreError> {
    validate_required("email", &new.email)?;
    validate_required("name", &new.name)
}

fn validate_patch(patch: &UserPatch) -> Result<(), UserStoreError> {
    if let Some(email) = &patch.email {
        validate_required("email", email)?;
    }
    if let Some(name) = &patch.name {
        validate_required("name", name)?;
    }
    Ok(())
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, UserStoreError>;

    async fn get(&self, user_id: &UserId) -> Result<Option<User>, UserStoreError>;

    /// The updated user, or `None` if there is no such user.
    async fn update(&self, user_id: &UserId, patch: UserPatch) -> Result<Option<User>, UserStoreError>;

    /// Returns whether the user exists.
    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<bool, UserStoreError>;

    /// Returns whether a user was deleted.
    async fn delete(&self, user_id: &UserId) -> Result<bool, UserStoreError>;

    /// Users with `role`, oldest first.
    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, UserStoreError>;
}

/// Delete a user together with their form responses.
///
/// Responses go first, so a user record never outlives a failed cascade. Returns whether
/// the user existed.
pub async fn delete_user(
    users: &dyn UserStore,
    responses: &dyn ResponseStore,
    user_id: &UserId,
) -> Result<bool, UserStoreError> {
    let removed_responses = responses.delete_for_user(user_id).await?;
    let deleted = users.delete(user_id).await?;
    info!(%user_id, deleted, removed_responses, "deleted user");
    Ok(deleted)
}

/// In-memory user store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> UserStoreError {
    UserStoreError::Unavailable("user store lock poisoned".to_string())
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, UserStoreError> {
        validate_new(&new)?;
        let mut users = self.users.write().map_err(poisoned)?;
        if users.contains_key(&new.user_id) {
            return Err(UserStoreError::AlreadyExists(new.user_id));
        }
        let user = User::register(new, Utc::now());
        users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    async fn get(&self, user_id: &UserId) -> Result<Option<User>, UserStoreError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(user_id).cloned())
    }

    async fn update(&self, user_id: &UserId, patch: UserPatch) -> Result<Option<User>, UserStoreError> {
        validate_patch(&patch)?;
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.get_mut(user_id).map(|user| {
            user.apply(patch);
            user.clone()
        }))
    }

    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<bool, UserStoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.get_mut(user_id).map(|user| user.last_login = Some(at)).is_some())
    }

    async fn delete(&self, user_id: &UserId) -> Result<bool, UserStoreError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.remove(user_id).is_some())
    }

    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, UserStoreError> {
        let users = self.users.read().map_err(poisoned)?;
        let mut found: Vec<User> = users.values().filter(|u| u.role == role).cloned().collect();
        found.sort_by(|a, b| (a.created_at, &a.user_id).cmp(&(b.created_at, &b.user_id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::{InMemoryResponseStore, ResponseUpsert};
    use serde_json::json;

    fn new_user(uid: &str, role: UserRole) -> NewUser {
        NewUser {
            user_id: UserId::parse(uid).unwrap(),
            email: format!("{uid}@example.com"),
            name: "Ada Student".to_string(),
            role,
            grade: Some("11".to_string()),
            counselor_id: None,
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn users_are_created_once() {
        let store = InMemoryUserStore::new();
        let created = store.create(new_user("u1", UserRole::Student)).await.unwrap();
        assert!(created.last_login.is_none());

        let err = store.create(new_user("u1", UserRole::Student)).await.unwrap_err();
        assert!(matches!(err, UserStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_only_touches_fields_that_are_set() {
        let store = InMemoryUserStore::new();
        let u1 = UserId::parse("u1").unwrap();
        store.create(new_user("u1", UserRole::Student)).await.unwrap();

        let patch = UserPatch {
            grade: Some("12".to_string()),
            ..Default::default()
        };
        let updated = store.update(&u1, patch).await.unwrap().unwrap();
        assert_eq!(updated.grade.as_deref(), Some("12"));
        assert_eq!(updated.name, "Ada Student");

        let missing = UserId::parse("nobody").unwrap();
        assert!(store.update(&missing, UserPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let store = InMemoryUserStore::new();
        let mut user = new_user("u1", UserRole::Student);
        user.name = "  ".to_string();
        assert!(matches!(store.create(user).await, Err(UserStoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn login_is_recorded_for_known_users_only() {
        let store = InMemoryUserStore::new();
        let u1 = UserId::parse("u1").unwrap();
        store.create(new_user("u1", UserRole::Student)).await.unwrap();

        let at = Utc::now();
        assert!(store.record_login(&u1, at).await.unwrap());
        assert_eq!(store.get(&u1).await.unwrap().unwrap().last_login, Some(at));
        assert!(!store.record_login(&UserId::parse("u2").unwrap(), at).await.unwrap());
    }

    #[tokio::test]
    async fn list_by_role_filters() {
        let store = InMemoryUserStore::new();
        store.create(new_user("s1", UserRole::Student)).await.unwrap();
        store.create(new_user("c1", UserRole::Counselor)).await.unwrap();
        store.create(new_user("s2", UserRole::Student)).await.unwrap();

        let students = store.list_by_role(UserRole::Student).await.unwrap();
        assert_eq!(students.len(), 2);
        assert!(students.iter().all(|u| u.role == UserRole::Student));
    }

    #[tokio::test]
    async fn deleting_a_user_removes_their_responses() {
        let users = InMemoryUserStore::new();
        let responses = InMemoryResponseStore::new();
        let u1 = UserId::parse("u1").unwrap();
        users.create(new_user("u1", UserRole::Student)).await.unwrap();
        for (owner, form) in [("u1", "college_goals"), ("u2", "college_goals")] {
            responses
                .upsert(ResponseUpsert {
                    user_id: UserId::parse(owner).unwrap(),
                    form_id: form.to_string(),
                    responses: Vec::new(),
                })
                .await
                .unwrap();
        }

        assert!(delete_user(&users, &responses, &u1).await.unwrap());
        assert!(users.get(&u1).await.unwrap().is_none());
        assert!(responses.list_for_user(&u1).await.unwrap().is_empty());
        assert_eq!(
            responses.list_for_user(&UserId::parse("u2").unwrap()).await.unwrap().len(),
            1
        );

        assert!(!delete_user(&users, &responses, &u1).await.unwrap());
    }

    #[test]
    fn registration_accepts_the_camel_case_uid() {
        let new: NewUser = serde_json::from_value(json!({
            "userId": "firebase-uid",
            "email": "ada@example.com",
            "name": "Ada",
        }))
        .unwrap();
        assert_eq!(new.user_id.as_str(), "firebase-uid");
        assert_eq!(new.role, UserRole::Student);
    }
}
