use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use counsel_ai::{ChatMessage, FormResponse};
use counsel_core::UserId;
use counsel_infra::jobs::{GenerationJob, StartOutcome};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

// -------------------------
// JSON mapping helpers
// -------------------------

/// Field names one generation kind uses on the wire.
#[derive(Debug, Clone, Copy)]
pub struct GenerationFields {
    /// Human label used in messages ("Recommendation", "Profile").
    pub noun: &'static str,
    pub id: &'static str,
    pub results: &'static str,
    pub count: &'static str,
}

pub const RECOMMENDATION_FIELDS: GenerationFields = GenerationFields {
    noun: "Recommendation",
    id: "recommendation_id",
    results: "recommendations",
    count: "recommendation_count",
};

pub const PROFILE_FIELDS: GenerationFields = GenerationFields {
    noun: "Profile",
    id: "generation_id",
    results: "student_profile",
    count: "section_count",
};

pub fn start_to_json(fields: GenerationFields, outcome: &StartOutcome) -> JsonValue {
    let (message, at_key) = if outcome.reused {
        (format!("{} generation already in progress", fields.noun), "updated_at")
    } else {
        (format!("{} generation started", fields.noun), "started_at")
    };

    let mut body = Map::new();
    body.insert("status".into(), outcome.status.as_str().into());
    body.insert("message".into(), message.into());
    body.insert(fields.id.into(), outcome.job_id.to_string().into());
    body.insert(at_key.into(), outcome.at.to_rfc3339().into());
    JsonValue::Object(body)
}

pub fn status_to_json(fields: GenerationFields, job: &GenerationJob) -> JsonValue {
    let mut body = Map::new();
    body.insert("status".into(), job.status.as_str().into());
    body.insert(fields.id.into(), job.id.to_string().into());
    body.insert("updated_at".into(), job.updated_at.to_rfc3339().into());
    if let Some(error) = &job.error {
        body.insert("error".into(), error.clone().into());
    }
    if let Some(result) = &job.result {
        body.insert("generation_metadata".into(), metadata_json(job));
        body.insert(fields.count.into(), result.item_count().into());
    }
    JsonValue::Object(body)
}

pub fn not_found_to_json(fields: GenerationFields) -> JsonValue {
    serde_json::json!({
        "status": "not_found",
        "message": format!("No {} generation found for this user", fields.noun.to_lowercase()),
    })
}

pub fn completed_to_json(fields: GenerationFields, job: &GenerationJob) -> JsonValue {
    let mut body = Map::new();
    body.insert("status".into(), job.status.as_str().into());
    body.insert(fields.results.into(), items_json(job));
    body.insert("generation_metadata".into(), metadata_json(job));
    body.insert("updated_at".into(), job.updated_at.to_rfc3339().into());
    JsonValue::Object(body)
}

pub fn history_item_to_json(fields: GenerationFields, job: &GenerationJob) -> JsonValue {
    let mut body = Map::new();
    body.insert("id".into(), job.id.to_string().into());
    body.insert("status".into(), job.status.as_str().into());
    body.insert(fields.results.into(), items_json(job));
    body.insert("error".into(), job.error.clone().map_or(JsonValue::Null, JsonValue::from));
    body.insert("generation_metadata".into(), metadata_json(job));
    body.insert("created_at".into(), job.created_at.to_rfc3339().into());
    body.insert("updated_at".into(), job.updated_at.to_rfc3339().into());
    JsonValue::Object(body)
}

fn items_json(job: &GenerationJob) -> JsonValue {
    job.result
        .as_ref()
        .map_or(JsonValue::Array(Vec::new()), |r| r.items_json())
}

fn metadata_json(job: &GenerationJob) -> JsonValue {
    serde_json::to_value(&job.metadata).unwrap_or(JsonValue::Null)
}

pub fn response_to_json(response: &FormResponse) -> JsonValue {
    serde_json::to_value(response).unwrap_or(JsonValue::Null)
}

/// What `GET /responses/:user_id/:form_id` returns when nothing is stored.
pub fn empty_response_shell(user_id: &UserId, form_id: &str) -> JsonValue {
    serde_json::json!({
        "user_id": user_id.as_str(),
        "form_id": form_id,
        "responses": [],
        "created_at": null,
        "updated_at": null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use counsel_ai::{GenerationMetadata, GenerationResult};
    use counsel_infra::jobs::{JobKind, JobStatus};

    fn completed_profile() -> GenerationJob {
        let now = Utc::now();
        let mut job = GenerationJob::new_generating(UserId::parse("u1").unwrap(), JobKind::Profile, now);
        job.status = JobStatus::Completed;
        job.result = Some(GenerationResult::Profile {
            student_profile: vec![counsel_ai::ProfileSection::no_data()],
        });
        job.metadata = GenerationMetadata::from_user_responses().with_model("gpt-4o");
        job.updated_at = now + Duration::seconds(5);
        job
    }

    #[test]
    fn start_body_switches_timestamp_key_when_reused() {
        let outcome = StartOutcome {
            job_id: counsel_core::JobId::new(),
            status: JobStatus::Generating,
            at: Utc::now(),
            reused: true,
        };
        let body = start_to_json(RECOMMENDATION_FIELDS, &outcome);
        assert_eq!(body["message"], "Recommendation generation already in progress");
        assert!(body.get("updated_at").is_some());
        assert!(body.get("started_at").is_none());
        assert_eq!(body["recommendation_id"], outcome.job_id.to_string());
    }

    #[test]
    fn status_body_uses_kind_specific_names() {
        let job = completed_profile();
        let body = status_to_json(PROFILE_FIELDS, &job);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["generation_id"], job.id.to_string());
        assert_eq!(body["section_count"], 1);
        assert_eq!(body["generation_metadata"]["model"], "gpt-4o");
        assert!(body.get("error").is_none());
    }

    #[test]
    fn generating_status_omits_result_fields() {
        let job = GenerationJob::new_generating(UserId::parse("u1").unwrap(), JobKind::Recommendations, Utc::now());
        let body = status_to_json(RECOMMENDATION_FIELDS, &job);
        assert_eq!(body["status"], "generating");
        assert!(body.get("recommendation_count").is_none());
        assert!(body.get("generation_metadata").is_none());
    }

    #[test]
    fn completed_body_carries_plain_item_list() {
        let body = completed_to_json(PROFILE_FIELDS, &completed_profile());
        assert_eq!(body["student_profile"][0]["section_id"], "no_data");
    }
}
