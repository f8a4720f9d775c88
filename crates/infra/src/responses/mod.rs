//! Stored onboarding-form answers: one record per `(user, form)`.
//!
//! The generation pipelines read these through [`counsel_ai::ResponseSource`]; the
//! `/responses` routes write them.

pub mod postgres;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use counsel_ai::{AiError, AnswerEntry, FormResponse, ResponseSource};
use counsel_core::UserId;

pub use postgres::PostgresResponseStore;

/// Create-or-replace payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseUpsert {
    pub user_id: UserId,
    pub form_id: String,
    #[serde(default)]
    pub responses: Vec<AnswerEntry>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResponseStoreError {
    #[error("response store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response record: {0}")]
    Invalid(String),
    #[error("response already exists for user {user_id}, form {form_id}")]
    AlreadyExists { user_id: UserId, form_id: String },
}

#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Replace the answers for `(user_id, form_id)`, creating the record if needed.
    /// `response_id` and `created_at` survive a replace.
    async fn upsert(&self, upsert: ResponseUpsert) -> Result<FormResponse, ResponseStoreError>;

    /// Insert a new record; `AlreadyExists` if `(user_id, form_id)` is taken.
    async fn create(&self, new: ResponseUpsert) -> Result<FormResponse, ResponseStoreError>;

    /// Replace the answers of an existing record. `None` if there is no such record.
    async fn update(
        &self,
        user_id: &UserId,
        form_id: &str,
        responses: Vec<AnswerEntry>,
    ) -> Result<Option<FormResponse>, ResponseStoreError>;

    /// All of a user's form responses, oldest form first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FormResponse>, ResponseStoreError>;

    async fn get(&self, user_id: &UserId, form_id: &str) -> Result<Option<FormResponse>, ResponseStoreError>;

    /// Returns whether a record was deleted.
    async fn delete(&self, user_id: &UserId, form_id: &str) -> Result<bool, ResponseStoreError>;

    /// Remove every form response of a user; returns how many were removed.
    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, ResponseStoreError>;
}

fn validate_form_id(form_id: &str) -> Result<String, ResponseStoreError> {
    let trimmed = form_id.trim();
    if trimmed.is_empty() {
        return Err(ResponseStoreError::Invalid("form_id must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// In-memory response store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResponseStore {
    records: RwLock<HashMap<(UserId, String), FormResponse>>,
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> ResponseStoreError {
    ResponseStoreError::Unavailable("response store lock poisoned".to_string())
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn upsert(&self, upsert: ResponseUpsert) -> Result<FormResponse, ResponseStoreError> {
        let form_id = validate_form_id(&upsert.form_id)?;
        let now = Utc::now();
        let mut records = self.records.write().map_err(poisoned)?;

        let record = records
            .entry((upsert.user_id.clone(), form_id.clone()))
            .and_modify(|existing| {
                existing.responses = upsert.responses.clone();
                existing.updated_at = now;
            })
            .or_insert_with(|| FormResponse {
                response_id: Uuid::now_v7().to_string(),
                user_id: upsert.user_id.clone(),
                form_id,
                responses: upsert.responses.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn create(&self, new: ResponseUpsert) -> Result<FormResponse, ResponseStoreError> {
        let form_id = validate_form_id(&new.form_id)?;
        let now = Utc::now();
        let mut records = self.records.write().map_err(poisoned)?;

        let key = (new.user_id.clone(), form_id.clone());
        if records.contains_key(&key) {
            return Err(ResponseStoreError::AlreadyExists {
                user_id: new.user_id,
                form_id,
            });
        }
        let record = FormResponse {
            response_id: Uuid::now_v7().to_string(),
            user_id: new.user_id,
            form_id,
            responses: new.responses,
            created_at: now,
            updated_at: now,
        };
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        user_id: &UserId,
        form_id: &str,
        responses: Vec<AnswerEntry>,
    ) -> Result<Option<FormResponse>, ResponseStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records
            .get_mut(&(user_id.clone(), form_id.trim().to_string()))
            .map(|existing| {
                existing.responses = responses;
                existing.updated_at = Utc::now();
                existing.clone()
            }))
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FormResponse>, ResponseStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut found: Vec<FormResponse> = records
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.created_at, &a.form_id).cmp(&(b.created_at, &b.form_id)));
        Ok(found)
    }

    async fn get(&self, user_id: &UserId, form_id: &str) -> Result<Option<FormResponse>, ResponseStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&(user_id.clone(), form_id.trim().to_string())).cloned())
    }

    async fn delete(&self, user_id: &UserId, form_id: &str) -> Result<bool, ResponseStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(&(user_id.clone(), form_id.trim().to_string())).is_some())
    }

    async fn delete_for_user(&self, user_id: &UserId) -> Result<u64, ResponseStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let before = records.len();
        records.retain(|(owner, _), _| owner != user_id);
        Ok((before - records.len()) as u64)
    }
}

/// Exposes a [`ResponseStore`] to the generation pipelines.
pub struct StoreResponseSource<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ResponseStore + ?Sized> StoreResponseSource<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ResponseStore + ?Sized> ResponseSource for StoreResponseSource<S> {
    async fn responses_for(&self, user_id: &UserId) -> Result<Vec<FormResponse>, AiError> {
        self.store
            .list_for_user(user_id)
            .await
            .map_err(|e| AiError::Context(e.to_string()))
    }
}
